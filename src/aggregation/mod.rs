mod aggregator;
mod coefficients;

pub use aggregator::{aggregate, aggregate_sessions, combine};
pub use coefficients::MixingCoefficients;
