pub mod config;
pub mod core;
pub mod error;
pub mod logging;
pub mod progress;
pub mod storage;
pub mod testing;

pub use config::AppConfig;
pub use crate::core::{diff, LocationMap, ReconcileConfig, ReconcileReport, Reconciler, TransferJob, Walker};
pub use error::{ConfigError, ListingError, TransferError};
pub use storage::{create_listing, ListingSource, Root};
