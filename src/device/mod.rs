pub mod adapter;
pub mod client;
pub mod connection;
pub mod constants;
pub mod decoder;
pub mod resolver;
pub mod scanner;
pub mod types;
