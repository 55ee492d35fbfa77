pub mod intent;
pub mod locks;
pub mod market_data;
pub mod scripts;
pub mod ticker_directory;
