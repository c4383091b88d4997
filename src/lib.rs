pub mod client;
pub mod config;
pub mod error;
pub mod server;
pub mod signal;

pub type Result<T> = std::result::Result<T, crate::error::CallError>;
