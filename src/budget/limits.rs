use std::time::Duration;

use serde::{Deserialize, Serialize};

use super::BudgetKind;

/// Immutable ceilings for one session. `None` means unlimited.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BudgetLimits {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_tokens: Option<u64>,

    /// USD ceiling across all sub-queries.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_cost_usd: Option<f64>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_iterations: Option<u64>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_wall_time_ms: Option<u64>,

    /// Maximum recursion depth for sub-queries. Always bounded.
    #[serde(default = "default_max_depth")]
    pub max_depth: u32,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_sub_queries: Option<u64>,
}

fn default_max_depth() -> u32 {
    2
}

impl BudgetLimits {
    /// Defaults used when nothing is configured.
    pub fn new() -> Self {
        Self {
            max_tokens: None,
            max_cost_usd: None,
            max_iterations: None,
            max_wall_time_ms: None,
            max_depth: default_max_depth(),
            max_sub_queries: None,
        }
    }

    /// No ceilings at all, except a generous depth bound.
    pub fn unlimited() -> Self {
        Self {
            max_depth: 64,
            ..Self::new()
        }
    }

    pub fn with_max_tokens(mut self, tokens: u64) -> Self {
        self.max_tokens = Some(tokens);
        self
    }

    pub fn with_max_cost(mut self, usd: f64) -> Self {
        self.max_cost_usd = Some(usd);
        self
    }

    pub fn with_max_iterations(mut self, iterations: u64) -> Self {
        self.max_iterations = Some(iterations);
        self
    }

    pub fn with_max_wall_time(mut self, wall_time: Duration) -> Self {
        self.max_wall_time_ms = Some(wall_time.as_millis() as u64);
        self
    }

    pub fn with_max_depth(mut self, depth: u32) -> Self {
        self.max_depth = depth;
        self
    }

    pub fn with_max_sub_queries(mut self, count: u64) -> Self {
        self.max_sub_queries = Some(count);
        self
    }

    /// Ceiling for an admission-controlled kind. Depth is enforced through
    /// call frames and has no counter ceiling here.
    pub fn limit(&self, kind: BudgetKind) -> Option<f64> {
        match kind {
            BudgetKind::Tokens => self.max_tokens.map(|v| v as f64),
            BudgetKind::Cost => self.max_cost_usd,
            BudgetKind::Iterations => self.max_iterations.map(|v| v as f64),
            BudgetKind::WallTime => self.max_wall_time_ms.map(|v| v as f64),
            BudgetKind::SubQueries => self.max_sub_queries.map(|v| v as f64),
            BudgetKind::Depth => None,
        }
    }

    /// Per-kind minimum of two limit sets. Used when restoring a snapshot so
    /// a restart can never loosen the ceilings a session started with.
    pub fn stricter(&self, other: &BudgetLimits) -> BudgetLimits {
        fn min_opt<T: PartialOrd + Copy>(a: Option<T>, b: Option<T>) -> Option<T> {
            match (a, b) {
                (Some(x), Some(y)) => Some(if y < x { y } else { x }),
                (x, None) => x,
                (None, y) => y,
            }
        }
        BudgetLimits {
            max_tokens: min_opt(self.max_tokens, other.max_tokens),
            max_cost_usd: min_opt(self.max_cost_usd, other.max_cost_usd),
            max_iterations: min_opt(self.max_iterations, other.max_iterations),
            max_wall_time_ms: min_opt(self.max_wall_time_ms, other.max_wall_time_ms),
            max_depth: self.max_depth.min(other.max_depth),
            max_sub_queries: min_opt(self.max_sub_queries, other.max_sub_queries),
        }
    }
}

impl Default for BudgetLimits {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn builder_sets_limits() {
        let limits = BudgetLimits::new()
            .with_max_tokens(1_000)
            .with_max_cost(2.5)
            .with_max_iterations(30)
            .with_max_wall_time(Duration::from_secs(60))
            .with_max_depth(3)
            .with_max_sub_queries(10);
        assert_eq!(limits.limit(BudgetKind::Tokens), Some(1_000.0));
        assert_eq!(limits.limit(BudgetKind::Cost), Some(2.5));
        assert_eq!(limits.limit(BudgetKind::WallTime), Some(60_000.0));
        assert_eq!(limits.limit(BudgetKind::Depth), None);
        assert_eq!(limits.max_depth, 3);
    }

    #[test]
    fn stricter_takes_minimum() {
        let a = BudgetLimits::new().with_max_tokens(100).with_max_depth(4);
        let b = BudgetLimits::new()
            .with_max_tokens(500)
            .with_max_iterations(7)
            .with_max_depth(2);
        let merged = a.stricter(&b);
        assert_eq!(merged.max_tokens, Some(100));
        assert_eq!(merged.max_iterations, Some(7));
        assert_eq!(merged.max_depth, 2);
        assert_eq!(merged.max_cost_usd, None);
    }

    #[test]
    fn serializes_without_unset_limits() {
        let limits = BudgetLimits::new().with_max_iterations(5);
        let json = serde_json::to_string(&limits).unwrap();
        assert!(!json.contains("max_tokens"));
        let back: BudgetLimits = serde_json::from_str(&json).unwrap();
        assert_eq!(back, limits);
    }

    #[test]
    fn missing_depth_defaults() {
        let limits: BudgetLimits = serde_json::from_str("{}").unwrap();
        assert_eq!(limits.max_depth, 2);
    }
}
