use proptest::prelude::*;

use rlm_core::budget::{BudgetController, BudgetKind, BudgetLimits};
use rlm_core::context::{Context, PeekOutcome};
use rlm_core::types::Unit;

fn content() -> impl Strategy<Value = String> {
    // Mix of ASCII, multi-byte chars and newlines, including empty lines.
    prop::collection::vec(
        prop_oneof![
            Just("\n".to_string()),
            "[a-z ]{0,12}",
            Just("é".to_string()),
            Just("日本".to_string()),
        ],
        0..40,
    )
    .prop_map(|parts| parts.concat())
}

proptest! {
    #[test]
    fn chunks_are_deterministic_and_cover_the_buffer(text in content(), size in 1usize..50) {
        let ctx = Context::new("doc", text.clone(), None);
        for unit in [Unit::Char, Unit::Line] {
            let first = ctx.chunk(size, unit).unwrap();
            let second = ctx.chunk(size, unit).unwrap();
            prop_assert_eq!(&first, &second);

            let total = text.chars().count();
            let mut cursor = 0;
            for (i, chunk) in first.iter().enumerate() {
                prop_assert_eq!(chunk.index, i);
                prop_assert_eq!(chunk.start, cursor);
                prop_assert!(chunk.end > chunk.start);
                cursor = chunk.end;
            }
            prop_assert_eq!(cursor, total);
            if unit == Unit::Char {
                prop_assert!(first.iter().all(|c| c.chars <= size));
            }
        }
    }

    #[test]
    fn peek_stays_inside_the_buffer(text in content(), start in 0usize..200, len in 0usize..200) {
        let ctx = Context::new("doc", text.clone(), None);
        let total = text.chars().count();
        match ctx.peek(start, start + len, Unit::Char).unwrap() {
            PeekOutcome::Slice(slice) => {
                prop_assert!(start < total);
                prop_assert!(slice.span.end <= total);
                prop_assert_eq!(slice.text.chars().count(), slice.span.end - slice.span.start);
                let expected: String = text.chars().skip(start).take(len).collect();
                prop_assert_eq!(slice.text, expected);
            }
            PeekOutcome::OutOfRange { extent, .. } => {
                prop_assert!(start >= total);
                prop_assert_eq!(extent, total);
            }
        }
    }

    #[test]
    fn search_returns_min_of_limit_and_matches(words in prop::collection::vec("(hit|miss)", 0..60), limit in 0usize..30) {
        let text = words.join("\n");
        let ctx = Context::new("doc", text, None);
        let expected = words.iter().filter(|w| *w == "hit").count();
        let hits = ctx.search("hit", limit, 0).unwrap();
        prop_assert_eq!(hits.len(), expected.min(limit));
        prop_assert!(hits.windows(2).all(|w| w[0].offset < w[1].offset));
    }

    #[test]
    fn denial_latches_once_the_ceiling_is_reached(ceiling in 1u64..20, attempts in 1usize..40) {
        let budget = BudgetController::new(BudgetLimits::new().with_max_iterations(ceiling));
        let mut admitted = 0u64;
        let mut denied = false;
        for _ in 0..attempts {
            match budget.check_and_consume(BudgetKind::Iterations, 1.0) {
                Ok(()) => {
                    prop_assert!(!denied, "admitted after a denial");
                    admitted += 1;
                }
                Err(_) => denied = true,
            }
        }
        prop_assert_eq!(admitted, ceiling.min(attempts as u64));
    }
}
