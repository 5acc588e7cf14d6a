//! `joblaunch` Controller Library
//!
//! Drives one launch session end to end:
//! - Transport adapter connecting to remote agents
//! - Session controller (setup, dispatch, wait, cleanup)
//! - Acknowledgment tracking of per-host status reports
//! - Interrupt handling with a best-effort `stop` broadcast

pub mod cli;
pub mod interrupt;
pub mod session;
pub mod transport;
