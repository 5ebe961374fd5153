mod capabilities;
mod coordinator;
mod record;
mod state;

pub use capabilities::Capabilities;
pub use coordinator::Coordinator;
pub use record::{BestRound, RoundOutcome, RoundRecord, best_rounds};
pub use state::CoordinatorState;
