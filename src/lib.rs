pub mod config;
pub mod github;
pub mod handlers;
pub mod logger;
