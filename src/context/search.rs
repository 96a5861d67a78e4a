use regex::{Regex, RegexBuilder};
use serde::{Deserialize, Serialize};

use super::Context;
use crate::error::{RlmError, RlmResult};

/// Upper bound on compiled program size for user-supplied patterns.
const REGEX_SIZE_LIMIT: usize = 10 * (1 << 20);

/// One regex hit inside a context.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SearchMatch {
    /// 1-based line of the match start.
    pub line: usize,
    /// 0-based char offset of the match start.
    pub offset: usize,
    pub matched: String,
    /// First and last line of the surrounding window (1-based, inclusive).
    pub context_start_line: usize,
    pub context_end_line: usize,
    pub context: String,
}

/// Compile a user pattern in multi-line mode so `^` and `$` anchor per line.
pub fn compile_pattern(pattern: &str) -> RlmResult<Regex> {
    RegexBuilder::new(pattern)
        .multi_line(true)
        .size_limit(REGEX_SIZE_LIMIT)
        .build()
        .map_err(|e| RlmError::pattern(pattern, e))
}

pub(crate) fn search(
    ctx: &Context,
    pattern: &str,
    max_results: usize,
    context_lines: usize,
) -> RlmResult<Vec<SearchMatch>> {
    let re = compile_pattern(pattern)?;
    let content = ctx.content();
    let index = ctx.line_index();
    let last_line = index.line_count();

    let matches = re
        .find_iter(content)
        .take(max_results)
        .map(|m| {
            let line = index.line_of_byte(m.start());
            let context_start_line = line.saturating_sub(context_lines).max(1);
            let context_end_line = line.saturating_add(context_lines).min(last_line.max(1));
            let (s, e) = index.line_range_bytes(content, context_start_line, context_end_line);
            SearchMatch {
                line,
                offset: index.char_of_byte(content, m.start()),
                matched: m.as_str().to_string(),
                context_start_line,
                context_end_line,
                context: content[s..e].to_string(),
            }
        })
        .collect();

    Ok(matches)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::ContentKind;

    fn ctx(text: &str) -> Context {
        Context::new("doc", text, Some(ContentKind::Text))
    }

    #[test]
    fn finds_error_line_with_window() {
        let c = ctx("a\nb\nc\nERROR x\nd");
        let hits = search(&c, "ERROR", 10, 2).unwrap();
        assert_eq!(hits.len(), 1);
        let hit = &hits[0];
        assert_eq!(hit.line, 4);
        assert_eq!(hit.offset, 6);
        assert_eq!(hit.matched, "ERROR");
        assert_eq!(hit.context_start_line, 2);
        assert_eq!(hit.context_end_line, 5);
        assert_eq!(hit.context, "b\nc\nERROR x\nd");
    }

    #[test]
    fn returns_min_of_limit_and_matches_in_order() {
        let c = ctx("x1\nx2\nx3\nx4\nx5");
        let hits = search(&c, r"x\d", 3, 0).unwrap();
        assert_eq!(hits.len(), 3);
        assert!(hits.windows(2).all(|w| w[0].offset < w[1].offset));
        assert_eq!(hits[2].matched, "x3");

        let hits = search(&c, r"x\d", 50, 0).unwrap();
        assert_eq!(hits.len(), 5);
        assert!(search(&c, r"x\d", 0, 0).unwrap().is_empty());
    }

    #[test]
    fn anchors_are_per_line() {
        let c = ctx("alpha\nbeta\nalpine");
        let hits = search(&c, "^al", 10, 0).unwrap();
        assert_eq!(hits.iter().map(|h| h.line).collect::<Vec<_>>(), vec![1, 3]);
    }

    #[test]
    fn invalid_pattern_is_rejected() {
        let c = ctx("anything");
        let err = search(&c, "([unclosed", 10, 0).unwrap_err();
        assert!(matches!(err, RlmError::Pattern { .. }));
    }

    #[test]
    fn window_clamps_to_buffer() {
        let c = ctx("ERROR first\nsecond");
        let hit = &search(&c, "ERROR", 1, 5).unwrap()[0];
        assert_eq!(hit.context_start_line, 1);
        assert_eq!(hit.context_end_line, 2);
    }

    #[test]
    fn huge_window_covers_whole_buffer() {
        let c = ctx("a\nb\nc");
        let hit = &search(&c, "b", 10, usize::MAX).unwrap()[0];
        assert_eq!((hit.context_start_line, hit.context_end_line), (1, 3));
        assert_eq!(hit.context, "a\nb\nc");
    }

    #[test]
    fn char_offsets_with_multibyte_text() {
        let c = ctx("héllo\nwörld ERROR");
        let hit = &search(&c, "ERROR", 1, 0).unwrap()[0];
        assert_eq!(hit.offset, 12);
        assert_eq!(hit.line, 2);
    }
}
