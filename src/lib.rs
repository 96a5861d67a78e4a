//! # rlm-core
//!
//! Stateful recursive-reasoning session engine. A calling agent keeps large
//! text or data outside its own context window as addressable contexts,
//! explores them through search, slicing and a restricted program sandbox,
//! records citations as evidence, and delegates sub-problems to bounded
//! sub-queries that share one resource budget.
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use rlm_core::config::EngineConfig;
//! use rlm_core::engine::Engine;
//! use rlm_core::evidence::{Citation, EvidenceSource};
//! use rlm_core::types::Span;
//!
//! # async fn demo() -> rlm_core::error::RlmResult<()> {
//! let engine = Engine::new(EngineConfig::load(None)?)?;
//!
//! engine.load("s1", "log", "a\nb\nc\nERROR x\nd", None, false).await?;
//! let hits = engine.search("s1", "log", "ERROR", 10, 1).await?;
//!
//! let item = engine
//!     .record_evidence(
//!         "s1",
//!         Citation::new("log", Span::lines(hits[0].line, hits[0].line), EvidenceSource::Search),
//!     )
//!     .await?;
//! engine.finalize("s1", "1 error found", &[item.sequence]).await?;
//! engine.save("s1", "/tmp/s1.json").await?;
//! # Ok(())
//! # }
//! ```
//!
//! ## Architecture
//!
//! | Module | Purpose |
//! |--------|---------|
//! | [`context`] | Named immutable buffers: line index, peek, regex search, chunking, diff |
//! | [`sandbox`] | Allow-list DSL interpreter with capability checks, deadline and output cap |
//! | [`evidence`] | Append-only citation ledger |
//! | [`budget`] | Ceilings, counters, exceed-then-stop admission, call-stack depth |
//! | [`subquery`] | Backend adapters (HTTP API, CLI agents, scripted) and recursive dispatch |
//! | [`session`] | Session aggregate, lifecycle, task tracking, registry, snapshot/restore |
//! | [`engine`] | The operation surface, one method per operation |
//! | [`config`] | Immutable configuration from defaults, TOML and `RLM_*` variables |
//! | [`logging`] | `tracing` subscriber setup |
//! | [`error`] | Error taxonomy with thiserror |
//! | [`types`] | Shared value types: units, spans, content kinds, token usage |

pub mod budget;
pub mod config;
pub mod context;
pub mod engine;
pub mod error;
pub mod evidence;
pub mod logging;
pub mod sandbox;
pub mod session;
pub mod subquery;
pub mod types;

pub use config::EngineConfig;
pub use engine::Engine;
pub use error::{ErrorCategory, RlmError, RlmResult};
pub use types::*;
