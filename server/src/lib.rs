pub mod app;
pub mod config;
pub mod contacts;
pub mod error;
pub mod gateway;
pub mod lifecycle;
pub mod queue;
pub mod store;
pub mod thread;
pub mod types;
pub mod workflow;
