//! Context store — named, immutable content buffers addressable by char or
//! line range, searchable by regex, chunkable, and comparable.
//!
//! Content, line index and parsed JSON value are reference-counted, so a
//! context is cheap to hand to the sandbox worker. The index and the parsed
//! value are derived on load and never persisted.

mod chunk;
mod diff;
mod index;
mod search;

pub use chunk::ChunkSpan;
pub use diff::{
    diff_lines, diff_values, DiffReport, LineChange, LineChangeKind, LineDiff, ValueChange,
    ValueDiff,
};
pub use index::LineIndex;
pub use search::{compile_pattern, SearchMatch};

use std::collections::BTreeMap;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::{RlmError, RlmResult};
use crate::types::{estimate_tokens, ContentKind, Span, Unit};

const MAX_ID_LEN: usize = 128;

/// A loaded buffer.
#[derive(Debug, Clone)]
pub struct Context {
    id: String,
    content: Arc<str>,
    kind: ContentKind,
    index: Arc<LineIndex>,
    structured: Option<Arc<serde_json::Value>>,
    created_at: DateTime<Utc>,
}

impl Context {
    /// Build a context. `kind = None` detects the kind from the content.
    pub fn new(id: impl Into<String>, content: impl Into<Arc<str>>, kind: Option<ContentKind>) -> Self {
        Self::with_created_at(id, content, kind, Utc::now())
    }

    pub(crate) fn with_created_at(
        id: impl Into<String>,
        content: impl Into<Arc<str>>,
        kind: Option<ContentKind>,
        created_at: DateTime<Utc>,
    ) -> Self {
        let content: Arc<str> = content.into();
        let kind = kind.unwrap_or_else(|| ContentKind::detect(&content));
        let structured = match kind {
            ContentKind::Json => serde_json::from_str(&content).ok().map(Arc::new),
            _ => None,
        };
        Self {
            id: id.into(),
            index: Arc::new(LineIndex::build(&content)),
            content,
            kind,
            structured,
            created_at,
        }
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn content(&self) -> &str {
        &self.content
    }

    pub fn shared_content(&self) -> Arc<str> {
        Arc::clone(&self.content)
    }

    pub fn kind(&self) -> ContentKind {
        self.kind
    }

    pub fn line_index(&self) -> &LineIndex {
        &self.index
    }

    /// Parsed value for JSON contexts.
    pub fn structured(&self) -> Option<&serde_json::Value> {
        self.structured.as_deref()
    }

    pub fn created_at(&self) -> DateTime<Utc> {
        self.created_at
    }

    pub fn meta(&self) -> ContextMeta {
        ContextMeta {
            id: self.id.clone(),
            kind: self.kind,
            chars: self.index.total_chars(),
            bytes: self.index.total_bytes(),
            lines: self.index.line_count(),
            estimated_tokens: estimate_tokens(&self.content),
            created_at: self.created_at,
        }
    }

    /// Read a range. See [`PeekOutcome`] for how out-of-range requests are
    /// reported.
    pub fn peek(&self, start: usize, end: usize, unit: Unit) -> RlmResult<PeekOutcome> {
        let requested = Span { start, end, unit };
        if start > end {
            return Err(RlmError::InvalidArgument(format!(
                "start ({start}) is greater than end ({end})"
            )));
        }

        match unit {
            Unit::Char => {
                let extent = self.index.total_chars();
                if start >= extent {
                    return Ok(PeekOutcome::OutOfRange { requested, extent });
                }
                let clamped_end = end.min(extent);
                let from = self.index.byte_of_char(&self.content, start);
                let to = self.index.byte_of_char(&self.content, clamped_end);
                Ok(PeekOutcome::Slice(PeekSlice {
                    text: self.content[from..to].to_string(),
                    span: Span::chars(start, clamped_end),
                    requested,
                    clamped: clamped_end != end,
                }))
            }
            Unit::Line => {
                if start == 0 {
                    return Err(RlmError::InvalidArgument(
                        "line numbers are 1-based".into(),
                    ));
                }
                let extent = self.index.line_count();
                if start > extent {
                    return Ok(PeekOutcome::OutOfRange { requested, extent });
                }
                let clamped_end = end.min(extent);
                let (from, to) = self.index.line_range_bytes(&self.content, start, clamped_end);
                Ok(PeekOutcome::Slice(PeekSlice {
                    text: self.content[from..to].to_string(),
                    span: Span::lines(start, clamped_end),
                    requested,
                    clamped: clamped_end != end,
                }))
            }
        }
    }

    pub fn search(
        &self,
        pattern: &str,
        max_results: usize,
        context_lines: usize,
    ) -> RlmResult<Vec<SearchMatch>> {
        search::search(self, pattern, max_results, context_lines)
    }

    pub fn chunk(&self, size: usize, unit: Unit) -> RlmResult<Vec<ChunkSpan>> {
        chunk::chunk(self, size, unit)
    }
}

/// Metadata describing a loaded context.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ContextMeta {
    pub id: String,
    pub kind: ContentKind,
    pub chars: usize,
    pub bytes: usize,
    pub lines: usize,
    pub estimated_tokens: u64,
    pub created_at: DateTime<Utc>,
}

/// Text returned for an in-range peek.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PeekSlice {
    pub text: String,
    /// Effective range after clamping.
    pub span: Span,
    pub requested: Span,
    /// True if the requested end extended past the buffer.
    pub clamped: bool,
}

/// Outcome of a peek.
///
/// A request that starts inside the buffer is clamped to its extent. A
/// request that starts at or beyond the end returns `OutOfRange` rather than
/// an empty slice, so callers can tell "nothing there" from "empty text".
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum PeekOutcome {
    Slice(PeekSlice),
    OutOfRange { requested: Span, extent: usize },
}

impl PeekOutcome {
    pub fn text(&self) -> Option<&str> {
        match self {
            PeekOutcome::Slice(s) => Some(&s.text),
            PeekOutcome::OutOfRange { .. } => None,
        }
    }
}

pub(crate) fn validate_id(id: &str) -> RlmResult<()> {
    if id.is_empty() {
        return Err(RlmError::InvalidArgument("id must not be empty".into()));
    }
    if id.chars().count() > MAX_ID_LEN {
        return Err(RlmError::InvalidArgument(format!(
            "id longer than {MAX_ID_LEN} characters"
        )));
    }
    if id.chars().any(|c| c.is_whitespace() || c.is_control()) {
        return Err(RlmError::InvalidArgument(format!(
            "id \"{id}\" contains whitespace or control characters"
        )));
    }
    Ok(())
}

/// Per-session context store, ordered by id.
#[derive(Debug, Clone, Default)]
pub struct ContextStore {
    contexts: BTreeMap<String, Context>,
}

impl ContextStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Load content under `id`. Fails with `DuplicateId` if the id is taken
    /// and `overwrite` is false.
    pub fn load(
        &mut self,
        id: &str,
        content: impl Into<Arc<str>>,
        kind: Option<ContentKind>,
        overwrite: bool,
    ) -> RlmResult<ContextMeta> {
        validate_id(id)?;
        if !overwrite && self.contexts.contains_key(id) {
            return Err(RlmError::DuplicateId { id: id.to_string() });
        }
        let ctx = Context::new(id, content, kind);
        let meta = ctx.meta();
        self.contexts.insert(id.to_string(), ctx);
        Ok(meta)
    }

    pub(crate) fn insert(&mut self, ctx: Context) {
        self.contexts.insert(ctx.id.clone(), ctx);
    }

    pub fn get(&self, id: &str) -> RlmResult<&Context> {
        self.contexts
            .get(id)
            .ok_or_else(|| RlmError::UnknownContext { id: id.to_string() })
    }

    pub fn contains(&self, id: &str) -> bool {
        self.contexts.contains_key(id)
    }

    pub fn list(&self) -> Vec<ContextMeta> {
        self.contexts.values().map(Context::meta).collect()
    }

    pub fn iter(&self) -> impl Iterator<Item = &Context> {
        self.contexts.values()
    }

    pub fn len(&self) -> usize {
        self.contexts.len()
    }

    pub fn is_empty(&self) -> bool {
        self.contexts.is_empty()
    }

    pub fn peek(&self, id: &str, start: usize, end: usize, unit: Unit) -> RlmResult<PeekOutcome> {
        self.get(id)?.peek(start, end, unit)
    }

    pub fn search(
        &self,
        id: &str,
        pattern: &str,
        max_results: usize,
        context_lines: usize,
    ) -> RlmResult<Vec<SearchMatch>> {
        self.get(id)?.search(pattern, max_results, context_lines)
    }

    pub fn chunk(&self, id: &str, size: usize, unit: Unit) -> RlmResult<Vec<ChunkSpan>> {
        self.get(id)?.chunk(size, unit)
    }

    /// Compare two contexts. JSON pairs are compared by value, everything
    /// else line by line.
    pub fn diff(&self, a: &str, b: &str) -> RlmResult<DiffReport> {
        let ca = self.get(a)?;
        let cb = self.get(b)?;
        Ok(match (ca.structured(), cb.structured()) {
            (Some(va), Some(vb)) => DiffReport::Values(diff_values(va, vb)),
            _ => DiffReport::Lines(diff_lines(ca.content(), cb.content())),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn store_with(id: &str, text: &str) -> ContextStore {
        let mut store = ContextStore::new();
        store.load(id, text, None, false).unwrap();
        store
    }

    #[test]
    fn load_reports_metadata() {
        let mut store = ContextStore::new();
        let meta = store.load("log", "a\nb\nc\nERROR x\nd", None, false).unwrap();
        assert_eq!(meta.chars, 15);
        assert_eq!(meta.bytes, 15);
        assert_eq!(meta.lines, 5);
        assert_eq!(meta.estimated_tokens, 4);
        assert_eq!(meta.kind, ContentKind::Text);
    }

    #[test]
    fn duplicate_ids_need_overwrite() {
        let mut store = store_with("doc", "first");
        let err = store.load("doc", "second", None, false).unwrap_err();
        assert!(matches!(err, RlmError::DuplicateId { .. }));
        store.load("doc", "second", None, true).unwrap();
        assert_eq!(store.get("doc").unwrap().content(), "second");
    }

    #[test]
    fn invalid_ids_are_rejected() {
        let mut store = ContextStore::new();
        assert!(store.load("", "x", None, false).is_err());
        assert!(store.load("has space", "x", None, false).is_err());
        assert!(store.load(&"x".repeat(200), "x", None, false).is_err());
    }

    #[test]
    fn unknown_context() {
        let store = ContextStore::new();
        assert!(matches!(
            store.peek("nope", 0, 1, Unit::Char),
            Err(RlmError::UnknownContext { .. })
        ));
    }

    #[test]
    fn peek_chars_clamps() {
        let store = store_with("doc", "hello world");
        let PeekOutcome::Slice(slice) = store.peek("doc", 6, 100, Unit::Char).unwrap() else {
            panic!("expected slice");
        };
        assert_eq!(slice.text, "world");
        assert!(slice.clamped);
        assert_eq!(slice.span, Span::chars(6, 11));

        let PeekOutcome::Slice(slice) = store.peek("doc", 0, 5, Unit::Char).unwrap() else {
            panic!("expected slice");
        };
        assert_eq!(slice.text, "hello");
        assert!(!slice.clamped);
    }

    #[test]
    fn peek_out_of_range_is_explicit() {
        let store = store_with("doc", "short");
        let outcome = store.peek("doc", 10, 20, Unit::Char).unwrap();
        assert_eq!(
            outcome,
            PeekOutcome::OutOfRange {
                requested: Span::chars(10, 20),
                extent: 5,
            }
        );
        let outcome = store.peek("doc", 2, 4, Unit::Line).unwrap();
        assert!(matches!(outcome, PeekOutcome::OutOfRange { extent: 1, .. }));
    }

    #[test]
    fn peek_rejects_inverted_ranges() {
        let store = store_with("doc", "abc");
        assert!(matches!(
            store.peek("doc", 2, 1, Unit::Char),
            Err(RlmError::InvalidArgument(_))
        ));
        assert!(matches!(
            store.peek("doc", 0, 1, Unit::Line),
            Err(RlmError::InvalidArgument(_))
        ));
    }

    #[test]
    fn peek_lines_matches_search_numbering() {
        let store = store_with("log", "a\nb\nc\nERROR x\nd");
        let hit = &store.search("log", "ERROR", 5, 0).unwrap()[0];
        let outcome = store.peek("log", hit.line, hit.line, Unit::Line).unwrap();
        assert_eq!(outcome.text(), Some("ERROR x"));
    }

    #[test]
    fn peek_multibyte_chars() {
        let store = store_with("doc", "naïve café");
        let outcome = store.peek("doc", 6, 10, Unit::Char).unwrap();
        assert_eq!(outcome.text(), Some("café"));
    }

    #[test]
    fn json_contexts_keep_parsed_value() {
        let store = store_with("cfg", r#"{"a": 1}"#);
        let ctx = store.get("cfg").unwrap();
        assert_eq!(ctx.kind(), ContentKind::Json);
        assert_eq!(ctx.structured(), Some(&serde_json::json!({"a": 1})));
    }

    #[test]
    fn diff_picks_mode() {
        let mut store = ContextStore::new();
        store.load("a", r#"{"x": 1}"#, None, false).unwrap();
        store.load("b", r#"{"x": 2}"#, None, false).unwrap();
        store.load("t1", "one\ntwo", None, false).unwrap();
        store.load("t2", "one\nthree", None, false).unwrap();
        assert!(matches!(store.diff("a", "b").unwrap(), DiffReport::Values(_)));
        assert!(matches!(store.diff("t1", "t2").unwrap(), DiffReport::Lines(_)));
        assert!(matches!(store.diff("a", "t1").unwrap(), DiffReport::Lines(_)));
        assert!(store.diff("a", "missing").is_err());
    }

    #[test]
    fn list_is_ordered_by_id() {
        let mut store = ContextStore::new();
        store.load("zeta", "z", None, false).unwrap();
        store.load("alpha", "a", None, false).unwrap();
        let ids: Vec<_> = store.list().into_iter().map(|m| m.id).collect();
        assert_eq!(ids, vec!["alpha", "zeta"]);
    }
}
