pub mod config;
pub mod error;
pub mod message;
pub mod provider;
pub mod session;
pub mod ui;
pub mod usage;
