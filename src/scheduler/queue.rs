//! Job priority.
//!
//! Lower number = higher priority. Priorities are carried on every job and
//! shown in listings, but admission under backpressure is first-come: nothing
//! reorders deferred executions by priority.

use std::fmt;

use serde::{Deserialize, Serialize};

/// Small-integer job priority.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Priority(pub u8);

impl Priority {
    pub const HIGH: Priority = Priority(1);
    pub const NORMAL: Priority = Priority(5);
    pub const LOW: Priority = Priority(9);
}

impl Default for Priority {
    fn default() -> Self {
        Priority::NORMAL
    }
}

impl fmt::Display for Priority {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}
