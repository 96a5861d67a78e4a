use std::sync::{Arc, Mutex};

/// Capped program output, shared between the worker and the watchdog so the
/// watchdog can read what was printed before a timeout.
#[derive(Debug, Clone)]
pub(crate) struct SharedOutput {
    inner: Arc<Mutex<OutputBuffer>>,
}

#[derive(Debug)]
struct OutputBuffer {
    text: String,
    chars: usize,
    cap: usize,
    truncated: bool,
}

impl SharedOutput {
    pub fn new(cap: usize) -> Self {
        Self {
            inner: Arc::new(Mutex::new(OutputBuffer {
                text: String::new(),
                chars: 0,
                cap,
                truncated: false,
            })),
        }
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, OutputBuffer> {
        self.inner.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Append one line. Text past the cap is dropped and the buffer is
    /// marked truncated.
    pub fn push_line(&self, line: &str) {
        let mut buf = self.lock();
        if buf.truncated {
            return;
        }
        for piece in [line, "\n"] {
            let room = buf.cap - buf.chars;
            let len = piece.chars().count();
            if len <= room {
                buf.text.push_str(piece);
                buf.chars += len;
            } else {
                let cut = piece
                    .char_indices()
                    .nth(room)
                    .map(|(b, _)| b)
                    .unwrap_or(piece.len());
                buf.text.push_str(&piece[..cut]);
                buf.chars = buf.cap;
                buf.truncated = true;
                return;
            }
        }
    }

    /// Final text and whether it was truncated. Truncated output ends with a
    /// fixed marker naming the cap.
    pub fn render(&self) -> (String, bool) {
        let buf = self.lock();
        if buf.truncated {
            (truncation_marker(&buf.text, buf.cap), true)
        } else {
            (buf.text.clone(), false)
        }
    }
}

fn truncation_marker(head: &str, cap: usize) -> String {
    format!("{head}\n... [output truncated at {cap} chars]")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn keeps_head_and_marks_truncation() {
        let out = SharedOutput::new(10);
        out.push_line("12345");
        out.push_line("abcdefgh");
        out.push_line("never shown");
        let (text, truncated) = out.render();
        assert!(truncated);
        assert_eq!(text, "12345\nabcd\n... [output truncated at 10 chars]");
    }

    #[test]
    fn under_cap_is_verbatim() {
        let out = SharedOutput::new(100);
        out.push_line("hello");
        assert_eq!(out.render(), ("hello\n".to_string(), false));
    }

    #[test]
    fn counts_chars_not_bytes() {
        let out = SharedOutput::new(4);
        out.push_line("ééé");
        let (text, truncated) = out.render();
        assert!(!truncated);
        assert_eq!(text, "ééé\n");
    }
}
