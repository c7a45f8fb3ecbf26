pub mod board;
pub mod config;
pub mod errors;
pub mod identity;
pub mod logging;
pub mod store;
