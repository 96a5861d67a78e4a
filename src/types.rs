use serde::{Deserialize, Serialize};

// ─── Addressing ──────────────────────────────────────────────────────────────

/// Unit used to address a range inside a context.
///
/// `Char` ranges are 0-based and half-open (`start..end`). `Line` ranges are
/// 1-based and inclusive (`start..=end`), matching the line numbers reported
/// by search.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum Unit {
    #[default]
    Char,
    Line,
}

impl std::fmt::Display for Unit {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Unit::Char => write!(f, "char"),
            Unit::Line => write!(f, "line"),
        }
    }
}

/// A range inside a context, in the given unit.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Span {
    pub start: usize,
    pub end: usize,
    #[serde(default)]
    pub unit: Unit,
}

impl Span {
    pub fn chars(start: usize, end: usize) -> Self {
        Self {
            start,
            end,
            unit: Unit::Char,
        }
    }

    pub fn lines(start: usize, end: usize) -> Self {
        Self {
            start,
            end,
            unit: Unit::Line,
        }
    }
}

impl std::fmt::Display for Span {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}..{} ({}s)", self.start, self.end, self.unit)
    }
}

// ─── Content Kind ────────────────────────────────────────────────────────────

/// Kind of content held by a context.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ContentKind {
    Text,
    Json,
    Csv,
    Markdown,
    Code,
}

impl ContentKind {
    /// Detect the content kind from the raw text.
    pub fn detect(content: &str) -> Self {
        let trimmed = content.trim_start();
        if (trimmed.starts_with('{') || trimmed.starts_with('['))
            && serde_json::from_str::<serde_json::Value>(content).is_ok()
        {
            return ContentKind::Json;
        }

        let sample: Vec<&str> = content
            .lines()
            .filter(|l| !l.trim().is_empty())
            .take(20)
            .collect();

        if sample.len() >= 2 {
            let commas = sample[0].matches(',').count();
            if commas > 0 && sample.iter().all(|l| l.matches(',').count() == commas) {
                return ContentKind::Csv;
            }
        }

        if sample.iter().any(|l| l.starts_with("# ") || l.starts_with("## "))
            || content.contains("\n```")
        {
            return ContentKind::Markdown;
        }

        const CODE_MARKERS: &[&str] = &[
            "fn ", "def ", "class ", "import ", "#include", "function ", "pub struct", "const ",
        ];
        let code_lines = sample
            .iter()
            .filter(|l| {
                let t = l.trim_start();
                CODE_MARKERS.iter().any(|m| t.starts_with(m))
            })
            .count();
        if code_lines >= 2 {
            return ContentKind::Code;
        }

        ContentKind::Text
    }

    pub fn parse_hint(hint: &str) -> Option<Self> {
        match hint.trim().to_ascii_lowercase().as_str() {
            "text" | "txt" | "plain" => Some(ContentKind::Text),
            "json" => Some(ContentKind::Json),
            "csv" => Some(ContentKind::Csv),
            "markdown" | "md" => Some(ContentKind::Markdown),
            "code" => Some(ContentKind::Code),
            _ => None,
        }
    }
}

impl std::fmt::Display for ContentKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            ContentKind::Text => "text",
            ContentKind::Json => "json",
            ContentKind::Csv => "csv",
            ContentKind::Markdown => "markdown",
            ContentKind::Code => "code",
        };
        f.write_str(s)
    }
}

// ─── Token Usage ─────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
pub struct TokenUsage {
    pub input_tokens: u64,
    pub output_tokens: u64,
}

impl TokenUsage {
    pub fn new(input: u64, output: u64) -> Self {
        Self {
            input_tokens: input,
            output_tokens: output,
        }
    }

    pub fn total(&self) -> u64 {
        self.input_tokens + self.output_tokens
    }
}

/// Rough token estimate: one token per four characters, rounded up.
pub fn estimate_tokens(text: &str) -> u64 {
    (text.chars().count() as u64 + 3) / 4
}
