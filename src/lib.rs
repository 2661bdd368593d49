pub mod config;
pub mod constants;
pub mod engine;
pub mod host;
pub mod messaging;
pub mod registry;
pub mod server_protocol;
pub mod server_utils;
pub mod types;
