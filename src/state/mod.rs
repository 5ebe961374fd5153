mod global;
mod snapshot;

pub use global::GlobalState;
pub use snapshot::ModelSnapshot;
