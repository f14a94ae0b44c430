pub mod config;
pub mod error;
pub mod notifier;
pub mod output;
pub mod profile_client;
pub mod reminder_store;
pub mod snapshot_store;
pub mod storage;
