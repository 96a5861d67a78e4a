//! Structural comparison of two contexts.
//!
//! Text is compared line by line: the common prefix and suffix are trimmed
//! and the remaining middle is aligned with a longest-common-subsequence
//! table. Middles too large for the table are reported as one replaced
//! block. JSON contexts are compared value by value and changes are reported
//! by JSON pointer.

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Largest LCS table (rows x columns) built before falling back to a
/// whole-block replacement.
const MAX_LCS_CELLS: usize = 4_000_000;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LineChangeKind {
    Added,
    Removed,
}

/// A line present in only one of the two contexts.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LineChange {
    pub kind: LineChangeKind,
    /// 1-based line in the first context (removals).
    #[serde(skip_serializing_if = "Option::is_none")]
    pub line_a: Option<usize>,
    /// 1-based line in the second context (additions).
    #[serde(skip_serializing_if = "Option::is_none")]
    pub line_b: Option<usize>,
    pub text: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LineDiff {
    pub identical: bool,
    pub unchanged: usize,
    pub added: usize,
    pub removed: usize,
    pub changes: Vec<LineChange>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "change", rename_all = "lowercase")]
pub enum ValueChange {
    Added { path: String, value: Value },
    Removed { path: String, value: Value },
    Changed { path: String, before: Value, after: Value },
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ValueDiff {
    pub identical: bool,
    pub changes: Vec<ValueChange>,
}

/// Result of comparing two contexts.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "mode", rename_all = "lowercase")]
pub enum DiffReport {
    Lines(LineDiff),
    Values(ValueDiff),
}

impl DiffReport {
    pub fn identical(&self) -> bool {
        match self {
            DiffReport::Lines(d) => d.identical,
            DiffReport::Values(d) => d.identical,
        }
    }
}

pub fn diff_lines(a: &str, b: &str) -> LineDiff {
    let la: Vec<&str> = a.lines().collect();
    let lb: Vec<&str> = b.lines().collect();

    let prefix = la.iter().zip(&lb).take_while(|(x, y)| x == y).count();
    let max_suffix = la.len().min(lb.len()) - prefix;
    let suffix = la
        .iter()
        .rev()
        .zip(lb.iter().rev())
        .take(max_suffix)
        .take_while(|(x, y)| x == y)
        .count();

    let mid_a = &la[prefix..la.len() - suffix];
    let mid_b = &lb[prefix..lb.len() - suffix];

    let mut changes = Vec::new();
    let mut unchanged = prefix + suffix;

    let cells = (mid_a.len() + 1).saturating_mul(mid_b.len() + 1);
    if !mid_a.is_empty() && !mid_b.is_empty() && cells <= MAX_LCS_CELLS {
        unchanged += align(mid_a, mid_b, prefix, &mut changes);
    } else {
        push_removed(&mut changes, mid_a, prefix);
        push_added(&mut changes, mid_b, prefix);
    }

    let added = changes
        .iter()
        .filter(|c| c.kind == LineChangeKind::Added)
        .count();
    let removed = changes.len() - added;

    LineDiff {
        identical: changes.is_empty(),
        unchanged,
        added,
        removed,
        changes,
    }
}

/// LCS alignment of two non-empty line slices. Returns the number of
/// common lines and appends changes in document order.
fn align(a: &[&str], b: &[&str], offset: usize, out: &mut Vec<LineChange>) -> usize {
    let (n, m) = (a.len(), b.len());
    let width = m + 1;
    // table[i * width + j] = LCS length of a[i..] and b[j..]
    let mut table = vec![0u32; (n + 1) * width];
    for i in (0..n).rev() {
        for j in (0..m).rev() {
            table[i * width + j] = if a[i] == b[j] {
                table[(i + 1) * width + j + 1] + 1
            } else {
                table[(i + 1) * width + j].max(table[i * width + j + 1])
            };
        }
    }

    let (mut i, mut j, mut common) = (0, 0, 0);
    while i < n && j < m {
        if a[i] == b[j] {
            common += 1;
            i += 1;
            j += 1;
        } else if table[(i + 1) * width + j] >= table[i * width + j + 1] {
            out.push(removed(offset + i + 1, a[i]));
            i += 1;
        } else {
            out.push(added(offset + j + 1, b[j]));
            j += 1;
        }
    }
    push_removed(out, &a[i..], offset + i);
    push_added(out, &b[j..], offset + j);
    common
}

fn removed(line: usize, text: &str) -> LineChange {
    LineChange {
        kind: LineChangeKind::Removed,
        line_a: Some(line),
        line_b: None,
        text: text.to_string(),
    }
}

fn added(line: usize, text: &str) -> LineChange {
    LineChange {
        kind: LineChangeKind::Added,
        line_a: None,
        line_b: Some(line),
        text: text.to_string(),
    }
}

fn push_removed(out: &mut Vec<LineChange>, lines: &[&str], offset: usize) {
    out.extend(lines.iter().enumerate().map(|(k, l)| removed(offset + k + 1, l)));
}

fn push_added(out: &mut Vec<LineChange>, lines: &[&str], offset: usize) {
    out.extend(lines.iter().enumerate().map(|(k, l)| added(offset + k + 1, l)));
}

pub fn diff_values(a: &Value, b: &Value) -> ValueDiff {
    let mut changes = Vec::new();
    walk(String::new(), a, b, &mut changes);
    ValueDiff {
        identical: changes.is_empty(),
        changes,
    }
}

/// RFC 6901 escaping of one pointer segment.
fn pointer(base: &str, segment: &str) -> String {
    format!("{}/{}", base, segment.replace('~', "~0").replace('/', "~1"))
}

fn walk(path: String, a: &Value, b: &Value, out: &mut Vec<ValueChange>) {
    match (a, b) {
        (Value::Object(ma), Value::Object(mb)) => {
            for (key, va) in ma {
                let p = pointer(&path, key);
                match mb.get(key) {
                    Some(vb) => walk(p, va, vb, out),
                    None => out.push(ValueChange::Removed {
                        path: p,
                        value: va.clone(),
                    }),
                }
            }
            for (key, vb) in mb {
                if !ma.contains_key(key) {
                    out.push(ValueChange::Added {
                        path: pointer(&path, key),
                        value: vb.clone(),
                    });
                }
            }
        }
        (Value::Array(xa), Value::Array(xb)) => {
            for (i, va) in xa.iter().enumerate() {
                let p = pointer(&path, &i.to_string());
                match xb.get(i) {
                    Some(vb) => walk(p, va, vb, out),
                    None => out.push(ValueChange::Removed {
                        path: p,
                        value: va.clone(),
                    }),
                }
            }
            for (i, vb) in xb.iter().enumerate().skip(xa.len()) {
                out.push(ValueChange::Added {
                    path: pointer(&path, &i.to_string()),
                    value: vb.clone(),
                });
            }
        }
        _ if a != b => out.push(ValueChange::Changed {
            path,
            before: a.clone(),
            after: b.clone(),
        }),
        _ => {}
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn identical_text() {
        let d = diff_lines("a\nb\nc", "a\nb\nc");
        assert!(d.identical);
        assert_eq!(d.unchanged, 3);
    }

    #[test]
    fn single_line_edit() {
        let d = diff_lines("a\nb\nc", "a\nB\nc");
        assert_eq!(d.added, 1);
        assert_eq!(d.removed, 1);
        assert_eq!(d.unchanged, 2);
        assert_eq!(d.changes[0], removed(2, "b"));
        assert_eq!(d.changes[1], added(2, "B"));
    }

    #[test]
    fn insertion_in_middle_keeps_alignment() {
        let d = diff_lines("a\nb\nc\nd", "a\nx\nb\nc\ny\nd");
        assert_eq!(d.removed, 0);
        assert_eq!(d.added, 2);
        assert_eq!(d.unchanged, 4);
        let lines: Vec<_> = d.changes.iter().map(|c| c.line_b).collect();
        assert_eq!(lines, vec![Some(2), Some(5)]);
    }

    #[test]
    fn one_side_empty() {
        let d = diff_lines("", "x\ny");
        assert_eq!(d.added, 2);
        let d = diff_lines("x\ny", "");
        assert_eq!(d.removed, 2);
    }

    #[test]
    fn json_paths() {
        let a = json!({"name": "svc", "ports": [80, 443], "tls": true, "a/b": 1});
        let b = json!({"name": "svc2", "ports": [80], "debug": 1, "a/b": 1, "tls": true});
        let d = diff_values(&a, &b);
        assert!(!d.identical);
        assert!(d.changes.contains(&ValueChange::Changed {
            path: "/name".into(),
            before: json!("svc"),
            after: json!("svc2"),
        }));
        assert!(d.changes.contains(&ValueChange::Removed {
            path: "/ports/1".into(),
            value: json!(443),
        }));
        assert!(d.changes.contains(&ValueChange::Added {
            path: "/debug".into(),
            value: json!(1),
        }));
        assert_eq!(d.changes.len(), 3);
    }

    #[test]
    fn pointer_escapes_segments() {
        assert_eq!(pointer("", "a/b~c"), "/a~1b~0c");
    }

    #[test]
    fn root_scalar_change() {
        let d = diff_values(&json!(1), &json!(2));
        assert_eq!(
            d.changes,
            vec![ValueChange::Changed {
                path: String::new(),
                before: json!(1),
                after: json!(2),
            }]
        );
    }
}
