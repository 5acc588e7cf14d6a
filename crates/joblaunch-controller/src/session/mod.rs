//! Launch session: lifecycle guard, acknowledgment tracking and the
//! controller that drives setup, dispatch, wait and cleanup.

mod controller;
mod lifecycle;
mod tracker;

pub use controller::{
    LaunchRequest, Session, SessionController, SessionError, SessionOutcome,
};
pub use lifecycle::{SessionLifecycle, SessionState};
pub use tracker::{AckOutcome, AckTracker};
