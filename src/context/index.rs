//! Line-offset index over a context's content, built in one linear pass.

/// Byte and char offsets of every line start.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LineIndex {
    line_starts_byte: Vec<usize>,
    line_starts_char: Vec<usize>,
    total_bytes: usize,
    total_chars: usize,
    ascii: bool,
}

impl LineIndex {
    pub fn build(content: &str) -> Self {
        let mut line_starts_byte = Vec::new();
        let mut line_starts_char = Vec::new();
        let mut chars = 0usize;
        let mut at_line_start = true;

        for (byte, c) in content.char_indices() {
            if at_line_start {
                line_starts_byte.push(byte);
                line_starts_char.push(chars);
                at_line_start = false;
            }
            chars += 1;
            if c == '\n' {
                at_line_start = true;
            }
        }

        Self {
            line_starts_byte,
            line_starts_char,
            total_bytes: content.len(),
            total_chars: chars,
            ascii: content.is_ascii(),
        }
    }

    pub fn line_count(&self) -> usize {
        self.line_starts_byte.len()
    }

    pub fn total_chars(&self) -> usize {
        self.total_chars
    }

    pub fn total_bytes(&self) -> usize {
        self.total_bytes
    }

    /// 0-based line containing the given char offset (clamped to the last line).
    fn line_of_char0(&self, char_offset: usize) -> usize {
        self.line_starts_char
            .partition_point(|&s| s <= char_offset)
            .saturating_sub(1)
    }

    /// 1-based line number containing `char_offset`.
    pub fn line_of_char(&self, char_offset: usize) -> usize {
        self.line_of_char0(char_offset) + 1
    }

    /// 1-based line number containing `byte_offset`.
    pub fn line_of_byte(&self, byte_offset: usize) -> usize {
        self.line_starts_byte
            .partition_point(|&s| s <= byte_offset)
            .saturating_sub(1)
            + 1
    }

    /// Byte offset of a char offset. `char_offset == total_chars` maps to the end.
    pub fn byte_of_char(&self, content: &str, char_offset: usize) -> usize {
        if char_offset >= self.total_chars {
            return self.total_bytes;
        }
        if self.ascii {
            return char_offset;
        }
        let line = self.line_of_char0(char_offset);
        let line_byte = self.line_starts_byte[line];
        let skip = char_offset - self.line_starts_char[line];
        content[line_byte..]
            .char_indices()
            .nth(skip)
            .map(|(b, _)| line_byte + b)
            .unwrap_or(self.total_bytes)
    }

    /// Char offset of a byte offset (which must lie on a char boundary).
    pub fn char_of_byte(&self, content: &str, byte_offset: usize) -> usize {
        if byte_offset >= self.total_bytes {
            return self.total_chars;
        }
        if self.ascii {
            return byte_offset;
        }
        let line = self.line_of_byte(byte_offset) - 1;
        let line_byte = self.line_starts_byte[line];
        self.line_starts_char[line] + content[line_byte..byte_offset].chars().count()
    }

    /// Char offset where a 1-based line starts; `line_count + 1` maps to the end.
    pub fn line_start_char(&self, line: usize) -> usize {
        self.line_starts_char
            .get(line.saturating_sub(1))
            .copied()
            .unwrap_or(self.total_chars)
    }

    /// Byte range of 1-based inclusive lines `first..=last`, without the final
    /// line terminator.
    pub fn line_range_bytes(&self, content: &str, first: usize, last: usize) -> (usize, usize) {
        let start = self
            .line_starts_byte
            .get(first.saturating_sub(1))
            .copied()
            .unwrap_or(self.total_bytes);
        let mut end = self
            .line_starts_byte
            .get(last)
            .copied()
            .unwrap_or(self.total_bytes);
        let bytes = content.as_bytes();
        if end > start && bytes[end - 1] == b'\n' {
            end -= 1;
            if end > start && bytes[end - 1] == b'\r' {
                end -= 1;
            }
        }
        (start, end)
    }
}
