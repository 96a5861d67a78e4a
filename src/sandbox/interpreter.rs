use std::borrow::Cow;
use std::collections::{BTreeMap, BTreeSet, HashSet};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Instant;

use regex::Regex;

use super::dsl::{ChunkBy, CmpOp, Condition, Expr, Operand, Program, Stmt, StmtKind, CONTEXT_VAR};
use super::output::SharedOutput;
use super::value::Variable;
use crate::context::{compile_pattern, Context, PeekOutcome};
use crate::evidence::{Citation, EvidenceSource};
use crate::types::Unit;

/// Results returned by `SEARCH` when no `LIMIT` is given.
pub const DEFAULT_SEARCH_LIMIT: usize = 100;

/// Helper loops check for interruption every this many items.
const POLL_EVERY: usize = 256;

/// What the worker hands back to the runner.
#[derive(Debug, Default)]
pub(crate) struct RunOutcome {
    pub bindings: BTreeMap<String, Variable>,
    pub citations: Vec<Citation>,
    pub final_answer: Option<String>,
    pub error: Option<String>,
    pub interrupted: bool,
}

enum Flow {
    Continue,
    /// `STOP_IF` fired: leave the innermost loop.
    Break,
    /// `FINAL` / `FINAL_TEXT`: end the program.
    Halt,
}

enum Stop {
    /// Line 0 means "not yet attributed".
    Fault { line: usize, message: String },
    Interrupted,
}

impl Stop {
    fn at(self, line: usize) -> Self {
        match self {
            Stop::Fault { line: 0, message } => Stop::Fault { line, message },
            other => other,
        }
    }
}

type Step<T> = Result<T, Stop>;

fn fail<T>(message: impl Into<String>) -> Step<T> {
    Err(Stop::Fault {
        line: 0,
        message: message.into(),
    })
}

pub(crate) struct Interpreter {
    context: Context,
    variables: BTreeMap<String, Variable>,
    written: BTreeSet<String>,
    citations: Vec<Citation>,
    final_answer: Option<String>,
    output: SharedOutput,
    interrupt: Arc<AtomicBool>,
    deadline: Instant,
}

impl Interpreter {
    pub fn new(
        context: Context,
        variables: BTreeMap<String, Variable>,
        output: SharedOutput,
        interrupt: Arc<AtomicBool>,
        deadline: Instant,
    ) -> Self {
        Self {
            context,
            variables,
            written: BTreeSet::new(),
            citations: Vec::new(),
            final_answer: None,
            output,
            interrupt,
            deadline,
        }
    }

    pub fn run(mut self, program: &Program) -> RunOutcome {
        let mut outcome = RunOutcome::default();
        match self.block(&program.statements) {
            Ok(_) => {}
            Err(Stop::Fault { line, message }) => {
                outcome.error = Some(format!("line {line}: {message}"));
            }
            Err(Stop::Interrupted) => outcome.interrupted = true,
        }
        outcome.bindings = self
            .written
            .iter()
            .filter_map(|name| self.variables.get(name).map(|v| (name.clone(), v.clone())))
            .collect();
        outcome.citations = self.citations;
        outcome.final_answer = self.final_answer;
        outcome
    }

    fn poll(&self) -> Step<()> {
        if self.interrupt.load(Ordering::Relaxed) || Instant::now() >= self.deadline {
            return Err(Stop::Interrupted);
        }
        Ok(())
    }

    fn poll_every(&self, i: usize) -> Step<()> {
        if i % POLL_EVERY == 0 {
            self.poll()
        } else {
            Ok(())
        }
    }

    fn block(&mut self, stmts: &[Stmt]) -> Step<Flow> {
        for stmt in stmts {
            self.poll()?;
            match self.exec(stmt).map_err(|e| e.at(stmt.line))? {
                Flow::Continue => {}
                flow => return Ok(flow),
            }
        }
        Ok(Flow::Continue)
    }

    /// Run a loop body once; `Some` means leave the loop with that flow.
    fn iteration(&mut self, body: &[Stmt]) -> Step<Option<Flow>> {
        self.poll()?;
        Ok(match self.block(body)? {
            Flow::Continue => None,
            Flow::Break => Some(Flow::Continue),
            Flow::Halt => Some(Flow::Halt),
        })
    }

    fn exec(&mut self, stmt: &Stmt) -> Step<Flow> {
        match &stmt.kind {
            StmtKind::Let { target, expr } => {
                let value = self.eval(expr)?;
                self.assign(target, value);
            }
            StmtKind::Print(operand) => {
                let text = self.operand_text(operand)?;
                self.output.push_line(&text);
            }
            StmtKind::ShowVars => {
                self.output.push_line("Variables:");
                self.output.push_line(&format!(
                    "  {CONTEXT_VAR}: text ({} chars, read-only)",
                    self.context.line_index().total_chars()
                ));
                for (name, value) in &self.variables {
                    self.output
                        .push_line(&format!("  {name}: {}", value.describe()));
                }
            }
            StmtKind::Final(name) => {
                self.final_answer = Some(self.text(name)?.into_owned());
                return Ok(Flow::Halt);
            }
            StmtKind::FinalText(text) => {
                self.final_answer = Some(text.clone());
                return Ok(Flow::Halt);
            }
            StmtKind::Cite {
                start,
                end,
                unit,
                note,
            } => {
                let start = self.number(start)?;
                let end = self.number(end)?;
                self.cite(start, end, *unit, note.clone())?;
            }
            StmtKind::For { var, source, body } => {
                let items = self.list(source)?;
                for item in items {
                    self.assign(var, Variable::Text(item));
                    if let Some(flow) = self.iteration(body)? {
                        return Ok(flow);
                    }
                }
            }
            StmtKind::Repeat { times, body } => {
                let times = self.number(times)?;
                for _ in 0..times {
                    if let Some(flow) = self.iteration(body)? {
                        return Ok(flow);
                    }
                }
            }
            StmtKind::Loop { body } => loop {
                if let Some(flow) = self.iteration(body)? {
                    return Ok(flow);
                }
            },
            StmtKind::StopIf(condition) => {
                if self.condition(condition)? {
                    return Ok(Flow::Break);
                }
            }
            StmtKind::Forbidden { operation } => {
                return fail(format!("{operation} is not permitted"));
            }
        }
        Ok(Flow::Continue)
    }

    fn eval(&self, expr: &Expr) -> Step<Variable> {
        let value = match expr {
            Expr::Peek { start, end } => {
                Variable::Text(self.peek(self.number(start)?, self.number(end)?, Unit::Char)?)
            }
            Expr::Lines { start, end } => {
                Variable::Text(self.peek(self.number(start)?, self.number(end)?, Unit::Line)?)
            }
            Expr::Search { pattern, limit } => {
                let limit = match limit {
                    Some(op) => self.number(op)?,
                    None => DEFAULT_SEARCH_LIMIT,
                };
                let hits = self
                    .context
                    .search(pattern, limit, 0)
                    .or_else(|e| fail(e.to_string()))?;
                Variable::List(
                    hits.into_iter()
                        .map(|m| format!("{}: {}", m.line, m.context))
                        .collect(),
                )
            }
            Expr::Chunk { source, by } => {
                let text = self.text(source)?;
                Variable::List(self.chunk(&text, by)?)
            }
            Expr::Slice { source, start, end } => {
                let (start, end) = (self.number(start)?, self.number(end)?);
                if start > end {
                    return fail(format!("SLICE start ({start}) is greater than end ({end})"));
                }
                let text = self.text(source)?;
                Variable::Text(text.chars().skip(start).take(end - start).collect())
            }
            Expr::Len { source } => Variable::Number(match source.as_str() {
                CONTEXT_VAR => self.context.line_index().total_chars(),
                _ => self.var_ref(source)?.len(),
            }),
            Expr::Join { source, separator } => Variable::Text(self.list(source)?.join(separator)),
            Expr::Get { source } => self.var(source)?,
            Expr::Concat { left, right } => {
                let mut out = self.operand_text(left)?.into_owned();
                out.push_str(&self.operand_text(right)?);
                Variable::Text(out)
            }
            Expr::Index { source, index } => {
                let index = self.number(index)?;
                let mut list = self.list(source)?;
                if index >= list.len() {
                    return fail(format!(
                        "Index {index} out of bounds for {source} (len={})",
                        list.len()
                    ));
                }
                Variable::Text(list.swap_remove(index))
            }
            Expr::Text(text) => Variable::Text(text.clone()),
            Expr::Count { source, pattern } => {
                let re = self.regex(pattern)?;
                let text = self.text(source)?;
                let mut count = 0;
                for (i, _) in re.find_iter(&text).enumerate() {
                    self.poll_every(i)?;
                    count += 1;
                }
                Variable::Number(count)
            }
            Expr::Grep { source, pattern } => {
                let re = self.regex(pattern)?;
                let text = self.text(source)?;
                let mut lines = Vec::new();
                for (i, line) in text.lines().enumerate() {
                    self.poll_every(i)?;
                    if re.is_match(line) {
                        lines.push(line.to_string());
                    }
                }
                Variable::List(lines)
            }
            Expr::Extract { source, pattern } => {
                let re = self.regex(pattern)?;
                let text = self.text(source)?;
                let mut found = Vec::new();
                for (i, caps) in re.captures_iter(&text).enumerate() {
                    self.poll_every(i)?;
                    let m = caps.get(1).or_else(|| caps.get(0));
                    if let Some(m) = m {
                        found.push(m.as_str().to_string());
                    }
                }
                Variable::List(found)
            }
            Expr::Split { source, separator } => {
                if separator.is_empty() {
                    return fail("SPLIT separator must not be empty");
                }
                let text = self.text(source)?;
                Variable::List(text.split(separator.as_str()).map(str::to_string).collect())
            }
            Expr::Replace {
                source,
                pattern,
                replacement,
            } => {
                let re = self.regex(pattern)?;
                let text = self.text(source)?;
                Variable::Text(re.replace_all(&text, replacement.as_str()).into_owned())
            }
            Expr::Upper { source } => Variable::Text(self.text(source)?.to_uppercase()),
            Expr::Lower { source } => Variable::Text(self.text(source)?.to_lowercase()),
            Expr::Trim { source } => Variable::Text(self.text(source)?.trim().to_string()),
            Expr::Words { source } => Variable::List(
                self.text(source)?
                    .split_whitespace()
                    .map(str::to_string)
                    .collect(),
            ),
            Expr::Head { source, count } => self.take_end(source, self.number(count)?, false)?,
            Expr::Tail { source, count } => self.take_end(source, self.number(count)?, true)?,
            Expr::Sort { source } => {
                let mut items = self.list(source)?;
                items.sort();
                Variable::List(items)
            }
            Expr::Unique { source } => {
                let items = self.list(source)?;
                let mut seen = HashSet::new();
                let mut unique = Vec::new();
                for (i, item) in items.into_iter().enumerate() {
                    self.poll_every(i)?;
                    if seen.insert(item.clone()) {
                        unique.push(item);
                    }
                }
                Variable::List(unique)
            }
            Expr::Forbidden { operation } => {
                return fail(format!("{operation} is not permitted"));
            }
        };
        Ok(value)
    }

    fn chunk(&self, text: &str, by: &ChunkBy) -> Step<Vec<String>> {
        let mut chunks = Vec::new();
        match by {
            ChunkBy::Lines(n) => {
                let n = self.positive(n, "BY_LINES")?;
                let lines: Vec<&str> = text.lines().collect();
                for (i, group) in lines.chunks(n).enumerate() {
                    self.poll_every(i)?;
                    chunks.push(group.join("\n"));
                }
            }
            ChunkBy::Chars(n) => {
                let n = self.positive(n, "BY_CHARS")?;
                let mut current = String::new();
                let mut len = 0;
                for (i, c) in text.chars().enumerate() {
                    self.poll_every(i)?;
                    current.push(c);
                    len += 1;
                    if len == n {
                        chunks.push(std::mem::take(&mut current));
                        len = 0;
                    }
                }
                if !current.is_empty() {
                    chunks.push(current);
                }
            }
            ChunkBy::Regex(pattern) => {
                let re = self.regex(pattern)?;
                for (i, part) in re.split(text).enumerate() {
                    self.poll_every(i)?;
                    if !part.trim().is_empty() {
                        chunks.push(part.to_string());
                    }
                }
            }
        }
        Ok(chunks)
    }

    fn take_end(&self, source: &str, count: usize, tail: bool) -> Step<Variable> {
        match self.var(source)? {
            Variable::List(items) => {
                let skip = if tail { items.len().saturating_sub(count) } else { 0 };
                Ok(Variable::List(items.into_iter().skip(skip).take(count).collect()))
            }
            Variable::Text(text) => {
                let lines: Vec<&str> = text.lines().collect();
                let skip = if tail { lines.len().saturating_sub(count) } else { 0 };
                Ok(Variable::Text(
                    lines.into_iter().skip(skip).take(count).collect::<Vec<_>>().join("\n"),
                ))
            }
            Variable::Number(_) => fail(format!("{source} is a number, not text or a list")),
        }
    }

    fn peek(&self, start: usize, end: usize, unit: Unit) -> Step<String> {
        match self.context.peek(start, end, unit) {
            Ok(PeekOutcome::Slice(slice)) => Ok(slice.text),
            Ok(PeekOutcome::OutOfRange { extent, .. }) => fail(format!(
                "range {start}..{end} is outside the context ({extent} {unit}s)"
            )),
            Err(e) => fail(e.to_string()),
        }
    }

    fn cite(&mut self, start: usize, end: usize, unit: Unit, note: Option<String>) -> Step<()> {
        let slice = match self.context.peek(start, end, unit) {
            Ok(PeekOutcome::Slice(slice)) => slice,
            Ok(PeekOutcome::OutOfRange { extent, .. }) => {
                return fail(format!(
                    "cannot cite {start}..{end}: outside the context ({extent} {unit}s)"
                ))
            }
            Err(e) => return fail(e.to_string()),
        };
        let mut citation = Citation::new(self.context.id(), slice.span, EvidenceSource::Execution)
            .with_snippet(slice.text);
        citation.note = note;
        self.citations.push(citation);
        Ok(())
    }

    fn condition(&self, cond: &Condition) -> Step<bool> {
        let left = self.operand_value(&cond.left)?;
        let Some((op, right)) = &cond.compare else {
            return Ok(left.truthy());
        };
        let right = self.operand_value(right)?;

        if *op == CmpOp::Contains {
            let needle = right.as_text();
            return Ok(match &left {
                Variable::List(items) => items.iter().any(|i| *i == needle),
                other => other.as_text().contains(&needle),
            });
        }

        let ordering = match (left.as_number(), right.as_number()) {
            (Some(a), Some(b)) => a.cmp(&b),
            _ => left.as_text().cmp(&right.as_text()),
        };
        Ok(match op {
            CmpOp::Eq => ordering.is_eq(),
            CmpOp::Ne => ordering.is_ne(),
            CmpOp::Lt => ordering.is_lt(),
            CmpOp::Le => ordering.is_le(),
            CmpOp::Gt => ordering.is_gt(),
            CmpOp::Ge => ordering.is_ge(),
            CmpOp::Contains => false,
        })
    }

    // ─── Helpers ─────────────────────────────────────────────────────────

    fn assign(&mut self, name: &str, value: Variable) {
        self.variables.insert(name.to_string(), value);
        self.written.insert(name.to_string());
    }

    fn regex(&self, pattern: &str) -> Step<Regex> {
        compile_pattern(pattern).or_else(|e| fail(e.to_string()))
    }

    fn unknown(&self, name: &str) -> Stop {
        let mut available: Vec<&str> = vec![CONTEXT_VAR];
        available.extend(self.variables.keys().map(String::as_str));
        Stop::Fault {
            line: 0,
            message: format!("Variable '{name}' not found. Available: {available:?}"),
        }
    }

    fn var(&self, name: &str) -> Step<Variable> {
        if name == CONTEXT_VAR {
            return Ok(Variable::Text(self.context.content().to_string()));
        }
        self.variables
            .get(name)
            .cloned()
            .ok_or_else(|| self.unknown(name))
    }

    fn text(&self, name: &str) -> Step<Cow<'_, str>> {
        if name == CONTEXT_VAR {
            return Ok(Cow::Borrowed(self.context.content()));
        }
        match self.variables.get(name) {
            Some(Variable::Text(s)) => Ok(Cow::Borrowed(s.as_str())),
            Some(other) => Ok(Cow::Owned(other.as_text())),
            None => Err(self.unknown(name)),
        }
    }

    fn list(&self, name: &str) -> Step<Vec<String>> {
        if name == CONTEXT_VAR {
            return Ok(vec![self.context.content().to_string()]);
        }
        self.variables
            .get(name)
            .map(Variable::as_list)
            .ok_or_else(|| self.unknown(name))
    }

    fn number(&self, operand: &Operand) -> Step<usize> {
        match operand {
            Operand::Number(n) => Ok(*n),
            Operand::Str(s) => s
                .trim()
                .parse()
                .or_else(|_| fail(format!("\"{s}\" is not a number"))),
            Operand::Var(name) => match self.var_ref(name)?.as_number() {
                Some(n) => Ok(n),
                None => fail(format!("{name} is not a number")),
            },
        }
    }

    fn positive(&self, operand: &Operand, what: &str) -> Step<usize> {
        match self.number(operand)? {
            0 => fail(format!("{what} requires a positive size")),
            n => Ok(n),
        }
    }

    fn var_ref(&self, name: &str) -> Step<Cow<'_, Variable>> {
        if name == CONTEXT_VAR {
            return self.var(name).map(Cow::Owned);
        }
        self.variables
            .get(name)
            .map(Cow::Borrowed)
            .ok_or_else(|| self.unknown(name))
    }

    fn operand_text(&self, operand: &Operand) -> Step<Cow<'_, str>> {
        match operand {
            Operand::Number(n) => Ok(Cow::Owned(n.to_string())),
            Operand::Str(s) => Ok(Cow::Owned(s.clone())),
            Operand::Var(name) => self.text(name),
        }
    }

    fn operand_value(&self, operand: &Operand) -> Step<Variable> {
        match operand {
            Operand::Number(n) => Ok(Variable::Number(*n)),
            Operand::Str(s) => Ok(Variable::Text(s.clone())),
            Operand::Var(name) => self.var(name),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sandbox::dsl::DslParser;
    use crate::types::{ContentKind, Span};
    use std::time::Duration;

    fn run_with(src: &str, content: &str, vars: BTreeMap<String, Variable>) -> (RunOutcome, String) {
        let program = DslParser::parse(src).unwrap();
        let output = SharedOutput::new(10_000);
        let interp = Interpreter::new(
            Context::new("doc", content, Some(ContentKind::Text)),
            vars,
            output.clone(),
            Arc::new(AtomicBool::new(false)),
            Instant::now() + Duration::from_secs(5),
        );
        let outcome = interp.run(&program);
        (outcome, output.render().0)
    }

    fn run(src: &str, content: &str) -> (RunOutcome, String) {
        run_with(src, content, BTreeMap::new())
    }

    #[test]
    fn search_and_cite_scenario() {
        let (outcome, out) = run(
            "LET hits = SEARCH \"ERROR\"\nLET n = LEN hits\nPRINT n\nCITE_LINES 4 4 \"error line\"\nFINAL_TEXT \"found\"",
            "a\nb\nc\nERROR x\nd",
        );
        assert!(outcome.error.is_none());
        assert_eq!(out, "1\n");
        assert_eq!(outcome.bindings["hits"], Variable::List(vec!["4: ERROR x".into()]));
        assert_eq!(outcome.citations.len(), 1);
        assert_eq!(outcome.citations[0].snippet.as_deref(), Some("ERROR x"));
        assert_eq!(outcome.citations[0].span, Span::lines(4, 4));
        assert_eq!(outcome.final_answer.as_deref(), Some("found"));
    }

    #[test]
    fn chunk_and_iterate() {
        let text = (0..10).map(|i| format!("Line {i}")).collect::<Vec<_>>().join("\n");
        let (outcome, out) = run(
            "LET chunks = CHUNK context BY_LINES 3\nFOR c IN chunks\n  LET first = HEAD c 1\n  PRINT first\nEND",
            &text,
        );
        assert!(outcome.error.is_none(), "{:?}", outcome.error);
        assert_eq!(out, "Line 0\nLine 3\nLine 6\nLine 9\n");
        assert_eq!(outcome.bindings["chunks"].len(), 4);
    }

    #[test]
    fn chunk_by_chars_is_char_safe() {
        let (outcome, _) = run("LET parts = CHUNK context BY_CHARS 2", "héllo");
        assert_eq!(
            outcome.bindings["parts"],
            Variable::List(vec!["hé".into(), "ll".into(), "o".into()])
        );
    }

    #[test]
    fn slice_is_char_safe_and_clamped() {
        let (outcome, _) = run("LET s = SLICE context 1 100", "héllo");
        assert_eq!(outcome.bindings["s"], Variable::Text("éllo".into()));
    }

    #[test]
    fn text_helpers() {
        let (outcome, _) = run(
            "LET up = UPPER context\n\
             LET w = WORDS context\n\
             LET u = UNIQUE w\n\
             LET s = SORT u\n\
             LET j = JOIN s \",\"\n\
             LET r = REPLACE context \"b+\" \"B\"\n\
             LET c = COUNT context \"a\"\n\
             LET e = EXTRACT context \"(a)b\"\n\
             LET parts = SPLIT context \" \"\n\
             LET t = TAIL parts 1\n\
             LET g = GREP context \"^a\"",
            "cab abb cab",
        );
        assert!(outcome.error.is_none(), "{:?}", outcome.error);
        let b = &outcome.bindings;
        assert_eq!(b["up"], Variable::Text("CAB ABB CAB".into()));
        assert_eq!(b["j"], Variable::Text("abb,cab".into()));
        assert_eq!(b["r"], Variable::Text("caB aB caB".into()));
        assert_eq!(b["c"], Variable::Number(3));
        assert_eq!(b["e"], Variable::List(vec!["a".into(), "a".into(), "a".into()]));
        assert_eq!(b["t"], Variable::List(vec!["cab".into()]));
        assert_eq!(b["g"], Variable::List(vec![]));
    }

    #[test]
    fn session_variables_are_visible() {
        let mut vars = BTreeMap::new();
        vars.insert("prev".to_string(), Variable::Number(41));
        let (outcome, out) = run_with("PRINT prev\nLET copy = GET prev", "x", vars);
        assert_eq!(out, "41\n");
        // Only names written by this program are reported.
        assert_eq!(outcome.bindings.len(), 1);
        assert_eq!(outcome.bindings["copy"], Variable::Number(41));
    }

    #[test]
    fn runtime_fault_keeps_earlier_bindings() {
        let (outcome, _) = run(
            "LET a = TEXT \"kept\"\nCITE 0 1\nLET b = INDEX a 5\nLET c = TEXT \"never\"",
            "xyz",
        );
        let error = outcome.error.unwrap();
        assert!(error.starts_with("line 3:"), "{error}");
        assert!(error.contains("out of bounds"));
        assert!(outcome.bindings.contains_key("a"));
        assert!(!outcome.bindings.contains_key("c"));
        assert_eq!(outcome.citations.len(), 1);
    }

    #[test]
    fn unknown_variable_fault_names_it() {
        let (outcome, _) = run("PRINT missing", "x");
        assert!(outcome.error.unwrap().contains("'missing'"));
    }

    #[test]
    fn fault_inside_block_reports_inner_line() {
        let (outcome, _) = run("REPEAT 2\n  PRINT nope\nEND", "x");
        assert!(outcome.error.unwrap().starts_with("line 2:"));
    }

    #[test]
    fn stop_if_breaks_innermost_loop() {
        let (outcome, out) = run(
            "LET i = TEXT \"\"\nLOOP\n  LET i = CONCAT i \"x\"\n  LET n = LEN i\n  STOP_IF n >= 3\nEND\nPRINT i",
            "",
        );
        assert!(outcome.error.is_none(), "{:?}", outcome.error);
        assert_eq!(out, "xxx\n");
    }

    #[test]
    fn final_halts_program() {
        let (outcome, out) = run("LET a = TEXT \"answer\"\nFINAL a\nPRINT a", "");
        assert_eq!(outcome.final_answer.as_deref(), Some("answer"));
        assert!(out.is_empty());
    }

    #[test]
    fn peek_out_of_range_is_a_fault() {
        let (outcome, _) = run("LET p = PEEK 10 20", "short");
        assert!(outcome.error.unwrap().contains("outside the context"));
    }

    #[test]
    fn interrupt_flag_stops_infinite_loop() {
        let program = DslParser::parse("LOOP\nEND").unwrap();
        let flag = Arc::new(AtomicBool::new(true));
        let interp = Interpreter::new(
            Context::new("doc", "x", None),
            BTreeMap::new(),
            SharedOutput::new(100),
            flag,
            Instant::now() + Duration::from_secs(60),
        );
        assert!(interp.run(&program).interrupted);
    }

    #[test]
    fn deadline_stops_infinite_loop() {
        let program = DslParser::parse("LOOP\n  LET x = TEXT \"spin\"\nEND").unwrap();
        let interp = Interpreter::new(
            Context::new("doc", "x", None),
            BTreeMap::new(),
            SharedOutput::new(100),
            Arc::new(AtomicBool::new(false)),
            Instant::now() + Duration::from_millis(50),
        );
        let outcome = interp.run(&program);
        assert!(outcome.interrupted);
        assert!(outcome.error.is_none());
    }

    #[test]
    fn show_vars_lists_context_and_bindings() {
        let (_, out) = run("LET n = LEN context\nSHOW_VARS", "abc");
        assert!(out.contains("context: text (3 chars, read-only)"));
        assert!(out.contains("n: number = 3"));
    }
}
