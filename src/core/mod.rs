//! Core module - session orchestration

mod session;

pub use session::{InitReport, Session};

use serde::{Deserialize, Serialize};

/// Snapshot of a session
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionState {
    pub readings: usize,
    pub is_fitted: bool,
    pub is_stale: bool,
    pub failed_readings: usize,
}
