//! Budget controller — the single admission-control authority of a session.
//!
//! Tracks consumption of tokens, cost, iterations, wall time, recursion depth
//! and sub-query count against immutable ceilings.
//!
//! Policy is *exceed-then-stop*: an operation is admitted while the counter of
//! its kind is still below the ceiling, and is allowed to overshoot (true cost
//! is often only known afterwards). The next admission of that kind is denied
//! with [`RlmError::BudgetExceeded`] and the kind stays exhausted for the life
//! of the session.
//!
//! Depth is different: it follows the logical call stack. A [`CallFrame`]
//! carries the caller's depth; [`BudgetController::enter`] authorizes one
//! more level and hands back a [`DepthGuard`] that releases the frame when
//! dropped, whatever the outcome of the nested call. The reported current
//! depth is the deepest frame still live.
//!
//! # Example
//!
//! ```rust
//! use rlm_core::budget::{BudgetController, BudgetKind, BudgetLimits};
//!
//! let budget = BudgetController::new(BudgetLimits::new().with_max_iterations(2));
//! budget.check_and_consume(BudgetKind::Iterations, 1.0).unwrap();
//! budget.check_and_consume(BudgetKind::Iterations, 1.0).unwrap();
//! assert!(budget.check_and_consume(BudgetKind::Iterations, 1.0).is_err());
//! ```

mod limits;

pub use limits::BudgetLimits;

use std::collections::{BTreeMap, BTreeSet};
use std::sync::Mutex;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{RlmError, RlmResult};

/// The kinds of consumption a budget tracks.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BudgetKind {
    Tokens,
    Cost,
    Iterations,
    WallTime,
    Depth,
    SubQueries,
}

impl BudgetKind {
    pub const ALL: [BudgetKind; 6] = [
        BudgetKind::Tokens,
        BudgetKind::Cost,
        BudgetKind::Iterations,
        BudgetKind::WallTime,
        BudgetKind::Depth,
        BudgetKind::SubQueries,
    ];
}

impl std::fmt::Display for BudgetKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            BudgetKind::Tokens => "tokens",
            BudgetKind::Cost => "cost",
            BudgetKind::Iterations => "iterations",
            BudgetKind::WallTime => "wall_time",
            BudgetKind::Depth => "depth",
            BudgetKind::SubQueries => "sub_queries",
        };
        f.write_str(s)
    }
}

/// Mutable consumption counters.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct BudgetCounters {
    pub tokens: u64,
    pub cost_usd: f64,
    pub iterations: u64,
    pub wall_time_ms: u64,
    /// Depth of the currently active call frame (0 = top level).
    pub current_depth: u32,
    /// Deepest frame ever entered.
    pub max_depth_reached: u32,
    pub sub_queries: u64,
}

impl BudgetCounters {
    fn value(&self, kind: BudgetKind) -> f64 {
        match kind {
            BudgetKind::Tokens => self.tokens as f64,
            BudgetKind::Cost => self.cost_usd,
            BudgetKind::Iterations => self.iterations as f64,
            BudgetKind::WallTime => self.wall_time_ms as f64,
            BudgetKind::Depth => self.current_depth as f64,
            BudgetKind::SubQueries => self.sub_queries as f64,
        }
    }

    fn add(&mut self, kind: BudgetKind, amount: f64) {
        let whole = amount.max(0.0).ceil() as u64;
        match kind {
            BudgetKind::Tokens => self.tokens = self.tokens.saturating_add(whole),
            BudgetKind::Cost => self.cost_usd += amount.max(0.0),
            BudgetKind::Iterations => self.iterations = self.iterations.saturating_add(whole),
            BudgetKind::WallTime => self.wall_time_ms = self.wall_time_ms.saturating_add(whole),
            BudgetKind::SubQueries => self.sub_queries = self.sub_queries.saturating_add(whole),
            // Depth only moves through `enter`.
            BudgetKind::Depth => {}
        }
    }
}

/// Depth position of a logical call.
///
/// The top-level caller is at depth 0; a sub-query issued from depth `d` runs
/// at `d + 1`. `limit` is the deepest level this frame's descendants may reach.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CallFrame {
    pub depth: u32,
    pub limit: u32,
}

impl CallFrame {
    pub fn root(max_depth: u32) -> Self {
        Self {
            depth: 0,
            limit: max_depth,
        }
    }
}

/// Point-in-time view of a budget.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BudgetSnapshot {
    pub limits: BudgetLimits,
    pub counters: BudgetCounters,
    pub exhausted: Vec<BudgetKind>,
    /// Remaining headroom per limited kind (never negative).
    pub remaining: Vec<(BudgetKind, f64)>,
}

#[derive(Debug, Clone, Default)]
struct BudgetState {
    counters: BudgetCounters,
    exhausted: BTreeSet<BudgetKind>,
    /// Live frame count per depth.
    frames: BTreeMap<u32, usize>,
}

impl BudgetState {
    fn sync_depth(&mut self) {
        self.counters.current_depth = self.frames.keys().next_back().copied().unwrap_or(0);
    }
}

/// Per-session budget controller. All methods take `&self`; mutation goes
/// through an internal lock so each check/consume is atomic.
#[derive(Debug)]
pub struct BudgetController {
    limits: BudgetLimits,
    state: Mutex<BudgetState>,
}

impl BudgetController {
    pub fn new(limits: BudgetLimits) -> Self {
        Self {
            limits,
            state: Mutex::new(BudgetState::default()),
        }
    }

    /// Rebuild a controller from persisted counters.
    pub fn restore(
        limits: BudgetLimits,
        mut counters: BudgetCounters,
        exhausted: impl IntoIterator<Item = BudgetKind>,
    ) -> Self {
        // No call is in flight across a restore.
        counters.current_depth = 0;
        let mut exhausted: BTreeSet<BudgetKind> = exhausted.into_iter().collect();
        exhausted.remove(&BudgetKind::Depth);
        Self {
            limits,
            state: Mutex::new(BudgetState {
                counters,
                exhausted,
                frames: BTreeMap::new(),
            }),
        }
    }

    pub fn limits(&self) -> &BudgetLimits {
        &self.limits
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, BudgetState> {
        // A poisoned lock only means a panic happened mid-update of plain
        // counters; the data is still usable.
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Admission check for `kind` without consuming anything.
    pub fn check(&self, kind: BudgetKind) -> RlmResult<()> {
        let mut state = self.lock();
        self.admit(&mut state, kind)
    }

    /// Record consumption of `kind` after the fact. Never fails.
    pub fn consume(&self, kind: BudgetKind, amount: f64) {
        let mut state = self.lock();
        state.counters.add(kind, amount);
    }

    /// Atomic admission check followed by consumption.
    pub fn check_and_consume(&self, kind: BudgetKind, amount: f64) -> RlmResult<()> {
        let mut state = self.lock();
        self.admit(&mut state, kind)?;
        state.counters.add(kind, amount);
        Ok(())
    }

    /// Charge measured wall time.
    pub fn charge_elapsed(&self, elapsed: Duration) {
        self.consume(BudgetKind::WallTime, elapsed.as_millis() as f64);
    }

    fn admit(&self, state: &mut BudgetState, kind: BudgetKind) -> RlmResult<()> {
        let Some(limit) = self.limits.limit(kind) else {
            return Ok(());
        };
        let consumed = state.counters.value(kind);
        if state.exhausted.contains(&kind) || consumed >= limit {
            state.exhausted.insert(kind);
            tracing::debug!(%kind, consumed, limit, "budget admission denied");
            return Err(RlmError::BudgetExceeded {
                kind,
                consumed,
                limit,
            });
        }
        Ok(())
    }

    /// Enter a nested call below `parent`.
    ///
    /// `depth_budget` optionally narrows how many further levels the new
    /// frame's subtree may use. Fails with `BudgetExceeded(Depth)` before
    /// anything runs if the child would be deeper than allowed.
    pub fn enter(&self, parent: &CallFrame, depth_budget: Option<u32>) -> RlmResult<DepthGuard<'_>> {
        let depth = parent.depth + 1;
        if depth > parent.limit {
            return Err(RlmError::BudgetExceeded {
                kind: BudgetKind::Depth,
                consumed: depth as f64,
                limit: parent.limit as f64,
            });
        }
        let limit = match depth_budget {
            Some(extra) => parent.limit.min(depth.saturating_add(extra)),
            None => parent.limit,
        };

        let mut state = self.lock();
        *state.frames.entry(depth).or_insert(0) += 1;
        state.sync_depth();
        state.counters.max_depth_reached = state.counters.max_depth_reached.max(depth);
        drop(state);

        Ok(DepthGuard {
            controller: self,
            frame: CallFrame { depth, limit },
        })
    }

    /// Frame for a top-level call on this budget.
    pub fn root_frame(&self) -> CallFrame {
        CallFrame::root(self.limits.max_depth)
    }

    pub fn counters(&self) -> BudgetCounters {
        self.lock().counters.clone()
    }

    pub fn exhausted(&self) -> Vec<BudgetKind> {
        self.lock().exhausted.iter().copied().collect()
    }

    pub fn is_exhausted(&self, kind: BudgetKind) -> bool {
        self.lock().exhausted.contains(&kind)
    }

    pub fn snapshot(&self) -> BudgetSnapshot {
        let state = self.lock();
        let remaining = BudgetKind::ALL
            .iter()
            .filter(|k| **k != BudgetKind::Depth)
            .filter_map(|k| {
                self.limits
                    .limit(*k)
                    .map(|limit| (*k, (limit - state.counters.value(*k)).max(0.0)))
            })
            .collect();
        BudgetSnapshot {
            limits: self.limits.clone(),
            counters: state.counters.clone(),
            exhausted: state.exhausted.iter().copied().collect(),
            remaining,
        }
    }
}

/// Releases its frame when the nested call returns.
#[derive(Debug)]
pub struct DepthGuard<'a> {
    controller: &'a BudgetController,
    frame: CallFrame,
}

impl DepthGuard<'_> {
    pub fn frame(&self) -> CallFrame {
        self.frame
    }
}

impl Drop for DepthGuard<'_> {
    fn drop(&mut self) {
        let mut state = self.controller.lock();
        let depth = self.frame.depth;
        let remaining = match state.frames.get_mut(&depth) {
            Some(count) => {
                *count -= 1;
                *count
            }
            None => 0,
        };
        if remaining == 0 {
            state.frames.remove(&depth);
        }
        state.sync_depth();
    }
}
