//! The job pipeline: stage machine, dispatcher, lease keeper, progress
//! throttle, failure policy, and the stage workers.

pub mod dispatcher;
pub mod failure;
pub mod lease;
pub mod stage;
pub mod throttle;
pub mod workers;

pub use dispatcher::{Dispatcher, DispatcherConfig};
pub use stage::Stage;
