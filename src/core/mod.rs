pub mod comparator;
pub mod engine;
pub mod transfer;
pub mod walker;

pub use comparator::{diff, write_report, DiffSummary};
pub use engine::{ReconcileConfig, ReconcileReport, Reconciler};
pub use transfer::{LinkMode, TransferJob, TransferOutcome, TEMP_SUFFIX};
pub use walker::{spawn_walk, walk_both, LocationMap, VisitCounter, Walker};
