pub mod config;
pub mod contracts;
pub mod error;
