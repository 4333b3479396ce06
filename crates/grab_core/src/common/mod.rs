pub mod config;
pub mod error;
pub mod landmarks;
pub mod template;
pub mod types;
