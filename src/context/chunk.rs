use serde::{Deserialize, Serialize};

use super::Context;
use crate::error::{RlmError, RlmResult};
use crate::types::Unit;

const PREVIEW_CHARS: usize = 80;

/// One contiguous piece of a chunked context.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChunkSpan {
    pub index: usize,
    /// Char range, 0-based half-open.
    pub start: usize,
    pub end: usize,
    /// Line range, 1-based inclusive.
    pub start_line: usize,
    pub end_line: usize,
    pub chars: usize,
    pub preview: String,
}

pub(crate) fn chunk(ctx: &Context, size: usize, unit: Unit) -> RlmResult<Vec<ChunkSpan>> {
    if size == 0 {
        return Err(RlmError::InvalidArgument(
            "chunk size must be greater than zero".into(),
        ));
    }

    let index = ctx.line_index();
    let total = index.total_chars();
    let bounds: Vec<(usize, usize)> = match unit {
        Unit::Char => (0..total)
            .step_by(size)
            .map(|start| (start, start.saturating_add(size).min(total)))
            .collect(),
        Unit::Line => (1..=index.line_count())
            .step_by(size)
            .map(|first| {
                (
                    index.line_start_char(first),
                    index.line_start_char(first.saturating_add(size)),
                )
            })
            .collect(),
    };

    let content = ctx.content();
    Ok(bounds
        .into_iter()
        .enumerate()
        .map(|(i, (start, end))| {
            let from = index.byte_of_char(content, start);
            let preview: String = content[from..].chars().take(PREVIEW_CHARS.min(end - start)).collect();
            ChunkSpan {
                index: i,
                start,
                end,
                start_line: index.line_of_char(start),
                end_line: index.line_of_char(end.saturating_sub(1).max(start)),
                chars: end - start,
                preview,
            }
        })
        .collect())
}
