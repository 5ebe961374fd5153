mod dispatcher;
mod outcome;

pub use dispatcher::{DispatchMode, Dispatcher};
pub use outcome::{DispatchOutcome, SessionFailure};
