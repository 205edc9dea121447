pub mod api;
pub mod config;
pub mod engine;
pub mod error;
pub mod lifecycle;
pub mod protocol;
pub mod storage;
pub mod types;

pub use config::Config;
pub use error::CancelError;
pub use types::*;
