pub mod aggregation;
pub mod checkpoint;
pub mod config;
pub mod coordinator;
pub mod error;
pub mod evaluation;
pub mod execution;
pub mod learner;
pub mod sampling;
pub mod session;
pub mod state;
pub mod transmission;

mod test;

pub use config::{CheckpointConfig, ServerConfig};
pub use coordinator::{Capabilities, Coordinator, CoordinatorState, RoundRecord};
pub use error::{FederationErr, Result};
pub use learner::{Learner, LearnerErr};
pub use session::ClientSession;
pub use state::{GlobalState, ModelSnapshot};
