//! Capability classes and the allow-list check run before a program starts.
//!
//! Every operation belongs to one capability. Grantable capabilities are
//! filtered by glob patterns over `capability:operation` (lower case, e.g.
//! `text:upper`); the rest are refused whatever the allow-list says.

use std::fmt;

use super::dsl::{Program, Stmt, StmtKind};
use crate::error::{RlmError, RlmResult};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Capability {
    Read,
    Search,
    Chunk,
    Cite,
    Text,
    Control,
    Filesystem,
    Network,
    Process,
    Introspection,
    SubQuery,
}

impl Capability {
    pub fn grantable(self) -> bool {
        matches!(
            self,
            Capability::Read
                | Capability::Search
                | Capability::Chunk
                | Capability::Cite
                | Capability::Text
                | Capability::Control
        )
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Capability::Read => "read",
            Capability::Search => "search",
            Capability::Chunk => "chunk",
            Capability::Cite => "cite",
            Capability::Text => "text",
            Capability::Control => "control",
            Capability::Filesystem => "filesystem",
            Capability::Network => "network",
            Capability::Process => "process",
            Capability::Introspection => "introspection",
            Capability::SubQuery => "sub_query",
        }
    }
}

impl fmt::Display for Capability {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

const FORBIDDEN: &[(&str, Capability)] = &[
    ("READ_FILE", Capability::Filesystem),
    ("WRITE_FILE", Capability::Filesystem),
    ("LIST_DIR", Capability::Filesystem),
    ("OPEN", Capability::Filesystem),
    ("FETCH", Capability::Network),
    ("HTTP", Capability::Network),
    ("SHELL", Capability::Process),
    ("SPAWN", Capability::Process),
    ("EXEC", Capability::Process),
    ("ENV", Capability::Introspection),
    ("GLOBALS", Capability::Introspection),
    ("IMPORT", Capability::Introspection),
    ("QUERY", Capability::SubQuery),
    ("QUERY_BATCH", Capability::SubQuery),
    ("MAP", Capability::SubQuery),
    ("FILTER", Capability::SubQuery),
];

/// True for operations recognised only so they can be refused.
pub fn is_forbidden(operation: &str) -> bool {
    FORBIDDEN.iter().any(|(op, _)| *op == operation)
}

/// Capability an operation belongs to, or `None` for unknown operations.
pub fn capability_of(operation: &str) -> Option<Capability> {
    let cap = match operation {
        "PEEK" | "LINES" => Capability::Read,
        "SEARCH" | "GREP" | "COUNT" | "EXTRACT" => Capability::Search,
        "CHUNK" | "SPLIT" | "WORDS" => Capability::Chunk,
        "CITE" | "CITE_LINES" => Capability::Cite,
        "SLICE" | "LEN" | "JOIN" | "GET" | "CONCAT" | "INDEX" | "TEXT" | "REPLACE" | "UPPER"
        | "LOWER" | "TRIM" | "HEAD" | "TAIL" | "SORT" | "UNIQUE" => Capability::Text,
        "PRINT" | "SHOW_VARS" | "FINAL" | "FINAL_TEXT" | "FOR" | "REPEAT" | "LOOP" | "STOP_IF" => {
            Capability::Control
        }
        other => {
            return FORBIDDEN
                .iter()
                .find(|(op, _)| *op == other)
                .map(|(_, cap)| *cap)
        }
    };
    Some(cap)
}

/// Matches a string against a glob pattern.
///
/// `*` matches zero or more characters, `?` matches exactly one character.
pub fn glob_match(pattern: &str, name: &str) -> bool {
    let pattern_bytes = pattern.as_bytes();
    let name_bytes = name.as_bytes();
    let (plen, nlen) = (pattern_bytes.len(), name_bytes.len());

    // dp[i][j] = pattern[..i] matches name[..j]
    let mut dp = vec![vec![false; nlen + 1]; plen + 1];
    dp[0][0] = true;
    for i in 1..=plen {
        if pattern_bytes[i - 1] == b'*' {
            dp[i][0] = dp[i - 1][0];
        }
    }
    for i in 1..=plen {
        for j in 1..=nlen {
            dp[i][j] = match pattern_bytes[i - 1] {
                b'*' => dp[i - 1][j] || dp[i][j - 1],
                b'?' => dp[i - 1][j - 1],
                c => dp[i - 1][j - 1] && c == name_bytes[j - 1],
            };
        }
    }
    dp[plen][nlen]
}

/// Allow-list of grantable operations.
#[derive(Debug, Clone)]
pub struct CapabilityPolicy {
    allow: Vec<String>,
}

impl CapabilityPolicy {
    pub fn new(allow: impl IntoIterator<Item = impl Into<String>>) -> Self {
        Self {
            allow: allow
                .into_iter()
                .map(|p| p.into().to_ascii_lowercase())
                .collect(),
        }
    }

    pub fn permits(&self, operation: &str) -> Result<(), Capability> {
        let cap = capability_of(operation).unwrap_or(Capability::Introspection);
        if !cap.grantable() {
            return Err(cap);
        }
        let key = format!("{}:{}", cap, operation.to_ascii_lowercase());
        if self.allow.iter().any(|p| glob_match(p, &key)) {
            Ok(())
        } else {
            Err(cap)
        }
    }

    /// Check every statement, nested ones included, before anything runs.
    pub fn check(&self, program: &Program) -> RlmResult<()> {
        self.check_block(&program.statements)
    }

    fn check_block(&self, stmts: &[Stmt]) -> RlmResult<()> {
        for stmt in stmts {
            let operation = stmt.kind.operation();
            if let Err(cap) = self.permits(operation) {
                tracing::warn!(operation, capability = %cap, line = stmt.line, "sandbox capability denied");
                return Err(RlmError::DeniedCapability {
                    operation: operation.to_string(),
                    capability: cap.to_string(),
                });
            }
            match &stmt.kind {
                StmtKind::For { body, .. }
                | StmtKind::Repeat { body, .. }
                | StmtKind::Loop { body } => self.check_block(body)?,
                _ => {}
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::SandboxConfig;
    use crate::sandbox::dsl::DslParser;

    fn default_policy() -> CapabilityPolicy {
        CapabilityPolicy::new(SandboxConfig::default().allow)
    }

    #[test]
    fn glob_basics() {
        assert!(glob_match("*", ""));
        assert!(glob_match("text:*", "text:upper"));
        assert!(glob_match("search:gr?p", "search:grep"));
        assert!(!glob_match("read:*", "text:upper"));
    }

    #[test]
    fn default_policy_allows_grantable_set() {
        let policy = default_policy();
        for op in ["PEEK", "SEARCH", "CHUNK", "CITE_LINES", "UPPER", "LOOP"] {
            assert!(policy.permits(op).is_ok(), "{op} should be allowed");
        }
    }

    #[test]
    fn never_grantable_even_with_wildcard() {
        let policy = CapabilityPolicy::new(["*"]);
        assert_eq!(policy.permits("READ_FILE"), Err(Capability::Filesystem));
        assert_eq!(policy.permits("FETCH"), Err(Capability::Network));
        assert_eq!(policy.permits("SHELL"), Err(Capability::Process));
        assert_eq!(policy.permits("GLOBALS"), Err(Capability::Introspection));
        assert_eq!(policy.permits("QUERY"), Err(Capability::SubQuery));
    }

    #[test]
    fn narrowed_allow_list() {
        let policy = CapabilityPolicy::new(["read:*", "control:*", "search:grep"]);
        assert!(policy.permits("LINES").is_ok());
        assert!(policy.permits("GREP").is_ok());
        assert_eq!(policy.permits("SEARCH"), Err(Capability::Search));
        assert_eq!(policy.permits("UPPER"), Err(Capability::Text));
    }

    #[test]
    fn check_finds_nested_denials() {
        let program = DslParser::parse(
            "LET x = TEXT \"a\"\nLOOP\n  REPEAT 2\n    LET y = FETCH \"http://x\"\n  END\nEND",
        )
        .unwrap();
        let err = default_policy().check(&program).unwrap_err();
        match err {
            RlmError::DeniedCapability {
                operation,
                capability,
            } => {
                assert_eq!(operation, "FETCH");
                assert_eq!(capability, "network");
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn clean_program_passes() {
        let program =
            DslParser::parse("LET hits = SEARCH \"x\"\nFOR h IN hits\n  PRINT h\nEND").unwrap();
        default_policy().check(&program).unwrap();
    }
}
