pub mod account;
pub mod call_schedule;
pub mod call_session;
pub mod position;
pub mod trade;
pub mod transcript;
