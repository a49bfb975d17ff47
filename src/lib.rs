pub mod bot;
pub mod cli;
pub mod core;
pub mod providers;
pub mod storage;
pub mod stream;
