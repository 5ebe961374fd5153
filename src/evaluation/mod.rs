mod holdout;
mod metrics;

pub use holdout::{Batch, BatchedHoldout, HoldoutSet};
pub use metrics::MetricReport;
