pub mod phone;
pub mod price;
pub mod shares;
pub mod ticker;
