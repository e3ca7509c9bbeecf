pub mod assignment;
pub mod chain;
pub mod config;
pub mod engine;
pub mod error;
pub mod service;
pub mod sled_store;
pub mod store;
pub mod types;
pub mod utils;
