//! Session state guard.
//!
//! `Uninitialized -> Valid -> CleanedUp`, with `CleanedUp` terminal. The
//! transition into `CleanedUp` is a compare-and-swap so exactly one caller
//! wins the right to tear the session down.

use std::fmt;
use std::sync::atomic::{AtomicU8, Ordering};

/// Observable session state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Uninitialized,
    Valid,
    CleanedUp,
}

impl SessionState {
    const fn as_u8(self) -> u8 {
        match self {
            Self::Uninitialized => 0,
            Self::Valid => 1,
            Self::CleanedUp => 2,
        }
    }

    const fn from_u8(value: u8) -> Self {
        match value {
            0 => Self::Uninitialized,
            1 => Self::Valid,
            _ => Self::CleanedUp,
        }
    }
}

impl fmt::Display for SessionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Uninitialized => "uninitialized",
            Self::Valid => "valid",
            Self::CleanedUp => "cleaned-up",
        };
        f.write_str(s)
    }
}

#[derive(Debug)]
pub struct SessionLifecycle {
    state: AtomicU8,
}

impl Default for SessionLifecycle {
    fn default() -> Self {
        Self::new()
    }
}

impl SessionLifecycle {
    pub const fn new() -> Self {
        Self {
            state: AtomicU8::new(SessionState::Uninitialized.as_u8()),
        }
    }

    pub fn state(&self) -> SessionState {
        SessionState::from_u8(self.state.load(Ordering::Acquire))
    }

    pub fn is_valid(&self) -> bool {
        self.state() == SessionState::Valid
    }

    /// Move `Uninitialized -> Valid`. Returns false from any other state.
    pub fn activate(&self) -> bool {
        self.state
            .compare_exchange(
                SessionState::Uninitialized.as_u8(),
                SessionState::Valid.as_u8(),
                Ordering::AcqRel,
                Ordering::Acquire,
            )
            .is_ok()
    }

    /// Claim the cleanup. Only the first caller gets `true`.
    pub fn begin_cleanup(&self) -> bool {
        self.state.swap(SessionState::CleanedUp.as_u8(), Ordering::AcqRel)
            != SessionState::CleanedUp.as_u8()
    }
}
