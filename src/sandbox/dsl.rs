//! Line-oriented program language run by the sandbox.
//!
//! ```text
//! LET hits = SEARCH "ERROR" LIMIT 5
//! LET n = LEN hits
//! LET chunks = CHUNK context BY_LINES 100
//! FOR c IN chunks
//!   LET k = COUNT c "timeout"
//!   STOP_IF k > 0
//! END
//! LET part = LINES 10 20
//! CITE_LINES 10 20 "config block"
//! PRINT part
//! FINAL_TEXT "done"
//! ```
//!
//! Statements, one per line: `LET <var> = <OP> ...`, `PRINT`, `SHOW_VARS`,
//! `FINAL`, `FINAL_TEXT`, `CITE`, `CITE_LINES`, `STOP_IF`, and the blocks
//! `FOR <var> IN <source>`, `REPEAT <n>`, `LOOP`, each closed by `END`.
//! Lines starting with `#` or `//` are comments.
//!
//! Operations that reach outside the context (files, network, processes,
//! environment, sub-queries) are recognised so they can be refused by the
//! capability check; they never execute.

use std::fmt;

use super::capability;
use crate::types::Unit;

/// Name bound to the read-only text of the target context.
pub const CONTEXT_VAR: &str = "context";

#[derive(Debug, Clone, PartialEq)]
pub struct Program {
    pub statements: Vec<Stmt>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Stmt {
    /// 1-based source line.
    pub line: usize,
    pub kind: StmtKind,
}

#[derive(Debug, Clone, PartialEq)]
pub enum StmtKind {
    Let { target: String, expr: Expr },
    Print(Operand),
    ShowVars,
    Final(String),
    FinalText(String),
    Cite {
        start: Operand,
        end: Operand,
        unit: Unit,
        note: Option<String>,
    },
    For {
        var: String,
        source: String,
        body: Vec<Stmt>,
    },
    Repeat { times: Operand, body: Vec<Stmt> },
    Loop { body: Vec<Stmt> },
    StopIf(Condition),
    /// A statement-level operation that is never allowed to run.
    Forbidden { operation: String },
}

#[derive(Debug, Clone, PartialEq)]
pub enum Expr {
    Peek { start: Operand, end: Operand },
    Lines { start: Operand, end: Operand },
    Search { pattern: String, limit: Option<Operand> },
    Chunk { source: String, by: ChunkBy },
    Slice { source: String, start: Operand, end: Operand },
    Len { source: String },
    Join { source: String, separator: String },
    Get { source: String },
    Concat { left: Operand, right: Operand },
    Index { source: String, index: Operand },
    Text(String),
    Count { source: String, pattern: String },
    Grep { source: String, pattern: String },
    Extract { source: String, pattern: String },
    Split { source: String, separator: String },
    Replace {
        source: String,
        pattern: String,
        replacement: String,
    },
    Upper { source: String },
    Lower { source: String },
    Trim { source: String },
    Words { source: String },
    Head { source: String, count: Operand },
    Tail { source: String, count: Operand },
    Sort { source: String },
    Unique { source: String },
    /// An expression-level operation that is never allowed to run.
    Forbidden { operation: String },
}

#[derive(Debug, Clone, PartialEq)]
pub enum ChunkBy {
    Lines(Operand),
    Chars(Operand),
    Regex(String),
}

/// A literal or a variable reference.
#[derive(Debug, Clone, PartialEq)]
pub enum Operand {
    Number(usize),
    Str(String),
    Var(String),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CmpOp {
    Eq,
    Ne,
    Lt,
    Le,
    Gt,
    Ge,
    Contains,
}

/// `STOP_IF a` (truthiness) or `STOP_IF a <op> b`.
#[derive(Debug, Clone, PartialEq)]
pub struct Condition {
    pub left: Operand,
    pub compare: Option<(CmpOp, Operand)>,
}

impl Expr {
    /// Upper-case operation keyword, as written in programs.
    pub fn operation(&self) -> &str {
        match self {
            Expr::Peek { .. } => "PEEK",
            Expr::Lines { .. } => "LINES",
            Expr::Search { .. } => "SEARCH",
            Expr::Chunk { .. } => "CHUNK",
            Expr::Slice { .. } => "SLICE",
            Expr::Len { .. } => "LEN",
            Expr::Join { .. } => "JOIN",
            Expr::Get { .. } => "GET",
            Expr::Concat { .. } => "CONCAT",
            Expr::Index { .. } => "INDEX",
            Expr::Text(_) => "TEXT",
            Expr::Count { .. } => "COUNT",
            Expr::Grep { .. } => "GREP",
            Expr::Extract { .. } => "EXTRACT",
            Expr::Split { .. } => "SPLIT",
            Expr::Replace { .. } => "REPLACE",
            Expr::Upper { .. } => "UPPER",
            Expr::Lower { .. } => "LOWER",
            Expr::Trim { .. } => "TRIM",
            Expr::Words { .. } => "WORDS",
            Expr::Head { .. } => "HEAD",
            Expr::Tail { .. } => "TAIL",
            Expr::Sort { .. } => "SORT",
            Expr::Unique { .. } => "UNIQUE",
            Expr::Forbidden { operation } => operation,
        }
    }
}

impl StmtKind {
    pub fn operation(&self) -> &str {
        match self {
            StmtKind::Let { expr, .. } => expr.operation(),
            StmtKind::Print(_) => "PRINT",
            StmtKind::ShowVars => "SHOW_VARS",
            StmtKind::Final(_) => "FINAL",
            StmtKind::FinalText(_) => "FINAL_TEXT",
            StmtKind::Cite { unit: Unit::Char, .. } => "CITE",
            StmtKind::Cite { unit: Unit::Line, .. } => "CITE_LINES",
            StmtKind::For { .. } => "FOR",
            StmtKind::Repeat { .. } => "REPEAT",
            StmtKind::Loop { .. } => "LOOP",
            StmtKind::StopIf(_) => "STOP_IF",
            StmtKind::Forbidden { operation } => operation,
        }
    }
}

#[derive(Debug, Clone)]
pub struct DslError {
    pub line: usize,
    pub message: String,
    pub source_line: String,
}

impl fmt::Display for DslError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Line {}: {} ({})", self.line, self.message, self.source_line)
    }
}

impl std::error::Error for DslError {}

enum BlockHead {
    For { var: String, source: String },
    Repeat { times: Operand },
    Loop,
}

struct OpenBlock {
    line: usize,
    source_line: String,
    head: BlockHead,
    body: Vec<Stmt>,
}

pub struct DslParser;

impl DslParser {
    pub fn parse(input: &str) -> Result<Program, DslError> {
        let mut root: Vec<Stmt> = Vec::new();
        let mut open: Vec<OpenBlock> = Vec::new();

        for (idx, raw) in input.lines().enumerate() {
            let line = idx + 1;
            let trimmed = raw.trim();
            if trimmed.is_empty() || trimmed.starts_with('#') || trimmed.starts_with("//") {
                continue;
            }
            let err = |message: String| DslError {
                line,
                message,
                source_line: trimmed.to_string(),
            };
            let tokens = Self::tokenize(trimmed).map_err(err)?;
            let keyword = tokens[0].to_ascii_uppercase();

            match keyword.as_str() {
                "FOR" | "REPEAT" | "LOOP" => {
                    let head = Self::parse_block_head(&keyword, &tokens).map_err(err)?;
                    open.push(OpenBlock {
                        line,
                        source_line: trimmed.to_string(),
                        head,
                        body: Vec::new(),
                    });
                }
                "END" => {
                    if tokens.len() > 1 {
                        return Err(err("END takes no arguments".into()));
                    }
                    let block = open
                        .pop()
                        .ok_or_else(|| err("END without an open block".into()))?;
                    let kind = match block.head {
                        BlockHead::For { var, source } => StmtKind::For {
                            var,
                            source,
                            body: block.body,
                        },
                        BlockHead::Repeat { times } => StmtKind::Repeat {
                            times,
                            body: block.body,
                        },
                        BlockHead::Loop => StmtKind::Loop { body: block.body },
                    };
                    let stmt = Stmt {
                        line: block.line,
                        kind,
                    };
                    match open.last_mut() {
                        Some(parent) => parent.body.push(stmt),
                        None => root.push(stmt),
                    }
                }
                _ => {
                    let kind = Self::parse_statement(&keyword, &tokens).map_err(err)?;
                    let stmt = Stmt { line, kind };
                    match open.last_mut() {
                        Some(parent) => parent.body.push(stmt),
                        None => root.push(stmt),
                    }
                }
            }
        }

        if let Some(block) = open.pop() {
            return Err(DslError {
                line: block.line,
                message: "block is never closed with END".into(),
                source_line: block.source_line,
            });
        }
        Ok(Program { statements: root })
    }

    fn parse_block_head(keyword: &str, tokens: &[String]) -> Result<BlockHead, String> {
        match keyword {
            "FOR" => {
                // FOR var IN source
                if tokens.len() != 4 || !tokens[2].eq_ignore_ascii_case("IN") {
                    return Err("FOR syntax: FOR <var> IN <source>".into());
                }
                Ok(BlockHead::For {
                    var: Self::target(&tokens[1])?,
                    source: Self::name(&tokens[3])?,
                })
            }
            "REPEAT" => {
                if tokens.len() != 2 {
                    return Err("REPEAT syntax: REPEAT <count>".into());
                }
                Ok(BlockHead::Repeat {
                    times: Self::operand(&tokens[1])?,
                })
            }
            _ => {
                if tokens.len() != 1 {
                    return Err("LOOP takes no arguments".into());
                }
                Ok(BlockHead::Loop)
            }
        }
    }

    fn parse_statement(keyword: &str, tokens: &[String]) -> Result<StmtKind, String> {
        match keyword {
            "LET" => Self::parse_let(tokens),
            "PRINT" => {
                let arg = tokens.get(1).ok_or("PRINT requires a variable or quoted text")?;
                Ok(StmtKind::Print(Self::operand(arg)?))
            }
            "SHOW_VARS" => Ok(StmtKind::ShowVars),
            "FINAL" => {
                let name = tokens.get(1).ok_or("FINAL requires a variable name")?;
                Ok(StmtKind::Final(Self::name(name)?))
            }
            "FINAL_TEXT" => {
                let text = tokens.get(1).ok_or("FINAL_TEXT requires quoted text")?;
                Ok(StmtKind::FinalText(Self::quoted(text)?))
            }
            "CITE" | "CITE_LINES" => {
                // CITE start end ["note"]
                if tokens.len() < 3 || tokens.len() > 4 {
                    return Err(format!("{keyword} syntax: {keyword} <start> <end> [\"note\"]"));
                }
                let note = tokens.get(3).map(|t| Self::quoted(t)).transpose()?;
                Ok(StmtKind::Cite {
                    start: Self::operand(&tokens[1])?,
                    end: Self::operand(&tokens[2])?,
                    unit: if keyword == "CITE" { Unit::Char } else { Unit::Line },
                    note,
                })
            }
            "STOP_IF" => Ok(StmtKind::StopIf(Self::parse_condition(&tokens[1..])?)),
            op if capability::is_forbidden(op) => Ok(StmtKind::Forbidden {
                operation: op.to_string(),
            }),
            _ => Err(format!("Unknown command: {}", tokens[0])),
        }
    }

    fn parse_condition(tokens: &[String]) -> Result<Condition, String> {
        match tokens.len() {
            1 => Ok(Condition {
                left: Self::operand(&tokens[0])?,
                compare: None,
            }),
            3 => {
                let op = match tokens[1].to_ascii_uppercase().as_str() {
                    "==" => CmpOp::Eq,
                    "!=" => CmpOp::Ne,
                    "<" => CmpOp::Lt,
                    "<=" => CmpOp::Le,
                    ">" => CmpOp::Gt,
                    ">=" => CmpOp::Ge,
                    "CONTAINS" => CmpOp::Contains,
                    other => return Err(format!("Unknown comparison: {other}")),
                };
                Ok(Condition {
                    left: Self::operand(&tokens[0])?,
                    compare: Some((op, Self::operand(&tokens[2])?)),
                })
            }
            _ => Err("STOP_IF syntax: STOP_IF <value> [<op> <value>]".into()),
        }
    }

    fn parse_let(tokens: &[String]) -> Result<StmtKind, String> {
        // LET target = OPERATION ...
        if tokens.len() < 4 || tokens[2] != "=" {
            return Err("LET syntax: LET <var> = <operation> ...".into());
        }
        let target = Self::target(&tokens[1])?;
        let operation = tokens[3].to_ascii_uppercase();
        let args = &tokens[4..];

        let arity = |n: usize, usage: &str| -> Result<(), String> {
            if args.len() == n {
                Ok(())
            } else {
                Err(format!("{operation} syntax: {operation} {usage}"))
            }
        };

        let expr = match operation.as_str() {
            "PEEK" => {
                arity(2, "<start> <end>")?;
                Expr::Peek {
                    start: Self::operand(&args[0])?,
                    end: Self::operand(&args[1])?,
                }
            }
            "LINES" => {
                arity(2, "<first> <last>")?;
                Expr::Lines {
                    start: Self::operand(&args[0])?,
                    end: Self::operand(&args[1])?,
                }
            }
            "SEARCH" => {
                // SEARCH "pattern" [LIMIT n]
                let limit = match args.len() {
                    1 => None,
                    3 if args[1].eq_ignore_ascii_case("LIMIT") => Some(Self::operand(&args[2])?),
                    _ => return Err("SEARCH syntax: SEARCH \"pattern\" [LIMIT n]".into()),
                };
                Expr::Search {
                    pattern: Self::quoted(&args[0])?,
                    limit,
                }
            }
            "CHUNK" => {
                arity(3, "<source> BY_LINES|BY_CHARS|BY_REGEX <value>")?;
                let source = Self::name(&args[0])?;
                let by = match args[1].to_ascii_uppercase().as_str() {
                    "BY_LINES" => ChunkBy::Lines(Self::operand(&args[2])?),
                    "BY_CHARS" => ChunkBy::Chars(Self::operand(&args[2])?),
                    "BY_REGEX" => ChunkBy::Regex(Self::quoted(&args[2])?),
                    other => return Err(format!("Unknown chunk strategy: {other}")),
                };
                Expr::Chunk { source, by }
            }
            "SLICE" => {
                arity(3, "<source> <start> <end>")?;
                Expr::Slice {
                    source: Self::name(&args[0])?,
                    start: Self::operand(&args[1])?,
                    end: Self::operand(&args[2])?,
                }
            }
            "LEN" => {
                arity(1, "<source>")?;
                Expr::Len {
                    source: Self::name(&args[0])?,
                }
            }
            "JOIN" => {
                arity(2, "<source> \"separator\"")?;
                Expr::Join {
                    source: Self::name(&args[0])?,
                    separator: Self::quoted(&args[1])?,
                }
            }
            "GET" => {
                arity(1, "<source>")?;
                Expr::Get {
                    source: Self::name(&args[0])?,
                }
            }
            "CONCAT" => {
                arity(2, "<left> <right>")?;
                Expr::Concat {
                    left: Self::operand(&args[0])?,
                    right: Self::operand(&args[1])?,
                }
            }
            "INDEX" => {
                arity(2, "<source> <index>")?;
                Expr::Index {
                    source: Self::name(&args[0])?,
                    index: Self::operand(&args[1])?,
                }
            }
            "TEXT" => {
                arity(1, "\"text\"")?;
                Expr::Text(Self::quoted(&args[0])?)
            }
            "COUNT" | "GREP" | "EXTRACT" => {
                arity(2, "<source> \"pattern\"")?;
                let source = Self::name(&args[0])?;
                let pattern = Self::quoted(&args[1])?;
                match operation.as_str() {
                    "COUNT" => Expr::Count { source, pattern },
                    "GREP" => Expr::Grep { source, pattern },
                    _ => Expr::Extract { source, pattern },
                }
            }
            "SPLIT" => {
                arity(2, "<source> \"separator\"")?;
                Expr::Split {
                    source: Self::name(&args[0])?,
                    separator: Self::quoted(&args[1])?,
                }
            }
            "REPLACE" => {
                arity(3, "<source> \"pattern\" \"replacement\"")?;
                Expr::Replace {
                    source: Self::name(&args[0])?,
                    pattern: Self::quoted(&args[1])?,
                    replacement: Self::quoted(&args[2])?,
                }
            }
            "UPPER" | "LOWER" | "TRIM" | "WORDS" | "SORT" | "UNIQUE" => {
                arity(1, "<source>")?;
                let source = Self::name(&args[0])?;
                match operation.as_str() {
                    "UPPER" => Expr::Upper { source },
                    "LOWER" => Expr::Lower { source },
                    "TRIM" => Expr::Trim { source },
                    "WORDS" => Expr::Words { source },
                    "SORT" => Expr::Sort { source },
                    _ => Expr::Unique { source },
                }
            }
            "HEAD" | "TAIL" => {
                arity(2, "<source> <count>")?;
                let source = Self::name(&args[0])?;
                let count = Self::operand(&args[1])?;
                if operation == "HEAD" {
                    Expr::Head { source, count }
                } else {
                    Expr::Tail { source, count }
                }
            }
            op if capability::is_forbidden(op) => Expr::Forbidden {
                operation: op.to_string(),
            },
            _ => return Err(format!("Unknown operation: {operation}")),
        };
        Ok(StmtKind::Let { target, expr })
    }

    /// Split a line into tokens. Quoted strings stay one token, quotes
    /// included, with `\"` and `\\` escapes honoured.
    fn tokenize(line: &str) -> Result<Vec<String>, String> {
        let mut tokens = Vec::new();
        let mut current = String::new();
        let mut chars = line.chars().peekable();

        while let Some(c) = chars.next() {
            if c == '"' {
                if !current.is_empty() {
                    tokens.push(std::mem::take(&mut current));
                }
                let mut quoted = String::from('"');
                let mut closed = false;
                while let Some(ch) = chars.next() {
                    if ch == '\\' {
                        quoted.push(ch);
                        if let Some(next) = chars.next() {
                            quoted.push(next);
                        }
                    } else if ch == '"' {
                        quoted.push(ch);
                        closed = true;
                        break;
                    } else {
                        quoted.push(ch);
                    }
                }
                if !closed {
                    return Err("Unterminated quoted string".into());
                }
                tokens.push(quoted);
            } else if c.is_whitespace() {
                if !current.is_empty() {
                    tokens.push(std::mem::take(&mut current));
                }
            } else {
                current.push(c);
            }
        }
        if !current.is_empty() {
            tokens.push(current);
        }
        if tokens.is_empty() {
            return Err("Empty line".into());
        }
        Ok(tokens)
    }

    fn is_quoted(token: &str) -> bool {
        token.len() >= 2 && token.starts_with('"') && token.ends_with('"')
    }

    fn quoted(token: &str) -> Result<String, String> {
        if !Self::is_quoted(token) {
            return Err(format!("Expected quoted string, got: {token}"));
        }
        Ok(Self::unescape(&token[1..token.len() - 1]))
    }

    fn unescape(raw: &str) -> String {
        let mut out = String::with_capacity(raw.len());
        let mut chars = raw.chars();
        while let Some(c) = chars.next() {
            if c != '\\' {
                out.push(c);
                continue;
            }
            match chars.next() {
                Some('n') => out.push('\n'),
                Some('t') => out.push('\t'),
                Some('"') => out.push('"'),
                Some('\\') => out.push('\\'),
                Some(other) => {
                    out.push('\\');
                    out.push(other);
                }
                None => out.push('\\'),
            }
        }
        out
    }

    fn operand(token: &str) -> Result<Operand, String> {
        if Self::is_quoted(token) {
            return Ok(Operand::Str(Self::quoted(token)?));
        }
        if let Ok(n) = token.parse::<usize>() {
            return Ok(Operand::Number(n));
        }
        Ok(Operand::Var(Self::name(token)?))
    }

    fn name(token: &str) -> Result<String, String> {
        let mut chars = token.chars();
        let valid = matches!(chars.next(), Some(c) if c.is_ascii_alphabetic() || c == '_')
            && chars.all(|c| c.is_ascii_alphanumeric() || c == '_');
        if valid {
            Ok(token.to_string())
        } else {
            Err(format!("Invalid variable name: {token}"))
        }
    }

    /// A name that may be assigned.
    fn target(token: &str) -> Result<String, String> {
        let name = Self::name(token)?;
        if name == CONTEXT_VAR {
            return Err(format!("`{CONTEXT_VAR}` is read-only"));
        }
        Ok(name)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn single(src: &str) -> StmtKind {
        let program = DslParser::parse(src).unwrap();
        assert_eq!(program.statements.len(), 1);
        program.statements.into_iter().next().unwrap().kind
    }

    #[test]
    fn parse_chunk_by_lines() {
        let kind = single("LET chunks = CHUNK context BY_LINES 100");
        assert!(matches!(kind, StmtKind::Let { target, expr: Expr::Chunk { source, by: ChunkBy::Lines(Operand::Number(100)) } }
            if target == "chunks" && source == "context"));
    }

    #[test]
    fn parse_chunk_by_regex() {
        let kind = single(r#"LET sections = CHUNK context BY_REGEX "^## ""#);
        assert!(matches!(kind, StmtKind::Let { expr: Expr::Chunk { by: ChunkBy::Regex(p), .. }, .. } if p == "^## "));
    }

    #[test]
    fn parse_search_with_limit() {
        let kind = single(r#"LET hits = SEARCH "ERROR \d+" LIMIT n"#);
        assert!(matches!(kind, StmtKind::Let { expr: Expr::Search { pattern, limit: Some(Operand::Var(v)) }, .. }
            if pattern == r"ERROR \d+" && v == "n"));
    }

    #[test]
    fn parse_join_unescapes_separator() {
        let kind = single(r#"LET combined = JOIN results "\n""#);
        assert!(matches!(kind, StmtKind::Let { expr: Expr::Join { separator, .. }, .. } if separator == "\n"));
    }

    #[test]
    fn quoted_strings_keep_spaces_and_escaped_quotes() {
        let kind = single(r#"FINAL_TEXT "say \"hi\" to all""#);
        assert_eq!(kind, StmtKind::FinalText(r#"say "hi" to all"#.into()));
    }

    #[test]
    fn parse_cite_forms() {
        let kind = single(r#"CITE_LINES 4 4 "the error""#);
        assert_eq!(
            kind,
            StmtKind::Cite {
                start: Operand::Number(4),
                end: Operand::Number(4),
                unit: Unit::Line,
                note: Some("the error".into()),
            }
        );
        let kind = single("CITE a b");
        assert!(matches!(kind, StmtKind::Cite { unit: Unit::Char, note: None, .. }));
    }

    #[test]
    fn parse_nested_blocks() {
        let src = "\
LET chunks = CHUNK context BY_LINES 2
FOR c IN chunks
  REPEAT 2
    PRINT c
  END
  STOP_IF c CONTAINS \"x\"
END
LOOP
  STOP_IF 1
END";
        let program = DslParser::parse(src).unwrap();
        assert_eq!(program.statements.len(), 3);
        let StmtKind::For { var, body, .. } = &program.statements[1].kind else {
            panic!("expected FOR");
        };
        assert_eq!(var, "c");
        assert_eq!(body.len(), 2);
        assert!(matches!(body[0].kind, StmtKind::Repeat { .. }));
        assert_eq!(body[1].line, 6);
        assert!(matches!(
            &body[1].kind,
            StmtKind::StopIf(Condition { compare: Some((CmpOp::Contains, _)), .. })
        ));
        assert!(matches!(program.statements[2].kind, StmtKind::Loop { .. }));
    }

    #[test]
    fn unclosed_block_reports_its_line() {
        let err = DslParser::parse("PRINT context\nLOOP\n  PRINT context").unwrap_err();
        assert_eq!(err.line, 2);
        assert!(err.message.contains("END"));
    }

    #[test]
    fn stray_end_is_an_error() {
        let err = DslParser::parse("END").unwrap_err();
        assert_eq!(err.line, 1);
    }

    #[test]
    fn comments_and_blank_lines_are_skipped() {
        let program = DslParser::parse("# comment\n\n// another\nSHOW_VARS").unwrap();
        assert_eq!(program.statements.len(), 1);
        assert_eq!(program.statements[0].line, 4);
    }

    #[test]
    fn forbidden_operations_are_recognised() {
        let kind = single(r#"LET data = READ_FILE "/etc/passwd""#);
        assert!(matches!(kind, StmtKind::Let { expr: Expr::Forbidden { operation }, .. } if operation == "READ_FILE"));
        let kind = single(r#"SHELL "rm -rf /""#);
        assert!(matches!(kind, StmtKind::Forbidden { operation } if operation == "SHELL"));
        let kind = single(r#"LET r = QUERY "summarize" WITH context"#);
        assert_eq!(kind.operation(), "QUERY");
    }

    #[test]
    fn context_is_read_only() {
        let err = DslParser::parse(r#"LET context = TEXT "x""#).unwrap_err();
        assert!(err.message.contains("read-only"));
        assert!(DslParser::parse("FOR context IN chunks\nEND").is_err());
    }

    #[test]
    fn syntax_errors_carry_line_numbers() {
        let err = DslParser::parse("SHOW_VARS\nLET x = SLICE context 0").unwrap_err();
        assert_eq!(err.line, 2);
        assert!(err.message.contains("SLICE"));
        let err = DslParser::parse("BOGUS x").unwrap_err();
        assert!(err.message.contains("Unknown command"));
        let err = DslParser::parse(r#"PRINT "unterminated"#).unwrap_err();
        assert!(err.message.contains("Unterminated"));
    }
}
