//! Evidence ledger — append-only citations backing a session's conclusions.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::context::{ContextStore, PeekOutcome};
use crate::error::{RlmError, RlmResult};
use crate::types::Span;

/// Longest snippet copied into the ledger.
pub const MAX_SNIPPET_CHARS: usize = 2_000;

/// What produced an evidence item.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EvidenceSource {
    Manual,
    Execution,
    Search,
    SubQuery,
}

impl std::fmt::Display for EvidenceSource {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            EvidenceSource::Manual => "manual",
            EvidenceSource::Execution => "execution",
            EvidenceSource::Search => "search",
            EvidenceSource::SubQuery => "sub_query",
        };
        f.write_str(s)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EvidenceItem {
    /// 1-based, strictly increasing within a session.
    pub sequence: u64,
    pub context_id: String,
    pub span: Span,
    /// Text of the span, copied when recorded.
    pub snippet: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub note: Option<String>,
    pub source: EvidenceSource,
    pub recorded_at: DateTime<Utc>,
}

/// A citation that has not yet been given a sequence number.
#[derive(Debug, Clone, PartialEq)]
pub struct Citation {
    pub context_id: String,
    pub span: Span,
    pub snippet: Option<String>,
    pub note: Option<String>,
    pub source: EvidenceSource,
}

impl Citation {
    pub fn new(context_id: impl Into<String>, span: Span, source: EvidenceSource) -> Self {
        Self {
            context_id: context_id.into(),
            span,
            snippet: None,
            note: None,
            source,
        }
    }

    pub fn with_note(mut self, note: impl Into<String>) -> Self {
        self.note = Some(note.into());
        self
    }

    pub fn with_snippet(mut self, snippet: impl Into<String>) -> Self {
        self.snippet = Some(snippet.into());
        self
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct EvidenceLedger {
    items: Vec<EvidenceItem>,
}

impl EvidenceLedger {
    pub fn new() -> Self {
        Self::default()
    }

    /// Rebuild from persisted items, checking sequence contiguity.
    pub fn from_items(items: Vec<EvidenceItem>) -> RlmResult<Self> {
        for (i, item) in items.iter().enumerate() {
            let expected = i as u64 + 1;
            if item.sequence != expected {
                return Err(RlmError::CorruptSnapshot(format!(
                    "evidence sequence {} found where {} was expected",
                    item.sequence, expected
                )));
            }
        }
        Ok(Self { items })
    }

    /// Append a citation. The context must exist and the span must start
    /// inside it; the stored span is the clamped one. The snippet is copied
    /// from the context unless supplied.
    pub fn record(&mut self, contexts: &ContextStore, citation: Citation) -> RlmResult<&EvidenceItem> {
        let ctx = contexts.get(&citation.context_id)?;
        let requested = citation.span;
        let slice = match ctx.peek(requested.start, requested.end, requested.unit)? {
            PeekOutcome::Slice(slice) => slice,
            PeekOutcome::OutOfRange { extent, .. } => {
                return Err(RlmError::InvalidArgument(format!(
                    "cannot cite {requested}: context \"{}\" has {extent} {}s",
                    citation.context_id, requested.unit
                )));
            }
        };
        let snippet = citation.snippet.unwrap_or(slice.text);
        let snippet = truncate_chars(&snippet, MAX_SNIPPET_CHARS);

        let item = EvidenceItem {
            sequence: self.items.len() as u64 + 1,
            context_id: citation.context_id,
            span: slice.span,
            snippet,
            note: citation.note,
            source: citation.source,
            recorded_at: Utc::now(),
        };
        tracing::debug!(
            sequence = item.sequence,
            context_id = %item.context_id,
            source = %item.source,
            "evidence recorded"
        );
        self.items.push(item);
        Ok(&self.items[self.items.len() - 1])
    }

    pub fn items(&self) -> &[EvidenceItem] {
        &self.items
    }

    pub fn get(&self, sequence: u64) -> Option<&EvidenceItem> {
        sequence
            .checked_sub(1)
            .and_then(|i| self.items.get(i as usize))
    }

    pub fn contains(&self, sequence: u64) -> bool {
        self.get(sequence).is_some()
    }

    /// Items with `sequence > after`, optionally only for one context.
    pub fn since(&self, after: u64, context_id: Option<&str>) -> Vec<EvidenceItem> {
        self.items
            .iter()
            .filter(|e| e.sequence > after)
            .filter(|e| context_id.map_or(true, |id| e.context_id == id))
            .cloned()
            .collect()
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }
}

fn truncate_chars(text: &str, max: usize) -> String {
    match text.char_indices().nth(max) {
        Some((byte, _)) => text[..byte].to_string(),
        None => text.to_string(),
    }
}
