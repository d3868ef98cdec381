//! # Cell liveness tracker.
//!
//! Keeps the set of cells that are currently booted, fed by the host listener.
//! Used at shutdown to name the cells that did not stop within the grace period.
//!
//! ```text
//! Bus ──► host listener ──► AliveTracker::update(&ev)
//!                                   │
//!                                   ▼
//!                      HashMap<cell, {last_seq, alive}>
//! ```
//!
//! ## Rules
//! - `CellStarting` marks a cell alive; `CellFailed` / `CellStopped` mark it down.
//! - Events without a cell are ignored.
//! - Events with `seq <= last_seq` for that cell are stale and rejected.

use std::collections::HashMap;

use tokio::sync::RwLock;

use crate::events::{Event, EventKind};

#[derive(Debug, Clone, Copy)]
struct CellState {
    last_seq: u64,
    alive: bool,
}

/// Thread-safe tracker of booted cells.
#[derive(Default)]
pub struct AliveTracker {
    state: RwLock<HashMap<String, CellState>>,
}

impl AliveTracker {
    /// Creates an empty tracker.
    pub fn new() -> Self {
        Self::default()
    }

    /// Applies `ev`; returns true if the alive flag of its cell was set.
    pub async fn update(&self, ev: &Event) -> bool {
        let Some(cell) = ev.cell.as_deref() else {
            return false;
        };
        let mut state = self.state.write().await;
        let entry = state.entry(cell.to_string()).or_insert(CellState {
            last_seq: 0,
            alive: false,
        });
        if ev.seq <= entry.last_seq {
            return false;
        }
        entry.last_seq = ev.seq;
        match ev.kind {
            EventKind::CellStarting => {
                entry.alive = true;
                true
            }
            EventKind::CellStopped | EventKind::CellFailed => {
                entry.alive = false;
                true
            }
            _ => false,
        }
    }

    /// Sorted names of the cells currently booted.
    pub async fn snapshot(&self) -> Vec<String> {
        let state = self.state.read().await;
        let mut alive: Vec<String> = state
            .iter()
            .filter(|(_, s)| s.alive)
            .map(|(name, _)| name.clone())
            .collect();
        alive.sort_unstable();
        alive
    }

    /// Returns true if `cell` is booted.
    pub async fn is_alive(&self, cell: &str) -> bool {
        self.state
            .read()
            .await
            .get(cell)
            .is_some_and(|s| s.alive)
    }
}
