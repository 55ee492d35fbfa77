pub mod broker_model;
pub mod quote_feed;
pub mod telephony;
