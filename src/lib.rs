pub mod catalog;
pub mod chain;
pub mod config;
pub mod engine;
pub mod errors;
pub mod init;
pub mod ledger;
pub mod logging;
pub mod notify;
pub mod reaper_config;
pub mod scheduler;
pub mod store;
pub mod ui;
