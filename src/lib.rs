pub mod artifacts;
pub mod config;
pub mod crawler;
pub mod error;
pub mod filters;
pub mod logging;
pub mod merge;
pub mod pipeline;
pub mod server;
pub mod session;
pub mod sink;
pub mod types;
