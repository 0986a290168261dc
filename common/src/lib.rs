pub mod config;
pub mod error;
pub mod log;
pub mod protocol;
pub mod trigger;
