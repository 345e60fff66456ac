// Library module for snapvault
// Re-exports modules for use in integration tests and external crates

pub mod config;
pub mod error;
pub mod fs;
pub mod records;
pub mod state;
pub mod sync;

pub use error::{SyncError, SyncResult};
