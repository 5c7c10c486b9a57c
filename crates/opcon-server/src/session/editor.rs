//! The line-editing collaborator consumed by stream and direct sessions.
//!
//! Rich interactive editing (history recall, tab-completion UI, escape
//! handling) is an external service. The session engine only needs the
//! contract below: it supplies the dispatch table's keyword set as the
//! completion vocabulary and otherwise reads lines and writes text.

use std::io::{self, BufRead, Write};

/// Result of waiting for one line of input.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LineEvent {
    /// A complete line, trailing newline stripped.
    Line(String),
    /// No input arrived within the session's idle window.
    IdleTimeout,
    /// The input channel closed.
    Closed,
}

/// Line-oriented input/output service for interactive sessions.
pub trait LineEditor {
    /// Shows `prompt` and waits for a line, the idle window, or close.
    ///
    /// # Errors
    ///
    /// Returns the underlying IO error when the channel fails outright.
    fn read_line(&mut self, prompt: &str) -> io::Result<LineEvent>;

    /// Writes text to the session's output channel.
    ///
    /// # Errors
    ///
    /// Returns the underlying IO error when the channel fails.
    fn write(&mut self, text: &str) -> io::Result<()>;

    /// Adds a keyword to the completion vocabulary. Optional.
    fn add_completion(&mut self, _word: &str) {}

    /// Records an accepted line in the input history. Optional.
    fn add_history(&mut self, _line: &str) {}
}

/// Plain stdin/stdout editor used by direct in-process sessions.
///
/// No editing, no history, no idle timeout: direct sessions run in the
/// hosting process's own interactive channel, which decides its own fate.
#[derive(Debug, Default)]
pub struct StdioLineEditor;

impl StdioLineEditor {
    /// Creates the editor.
    #[must_use]
    pub fn new() -> Self {
        Self
    }
}

impl LineEditor for StdioLineEditor {
    fn read_line(&mut self, prompt: &str) -> io::Result<LineEvent> {
        let mut stdout = io::stdout().lock();
        stdout.write_all(prompt.as_bytes())?;
        stdout.flush()?;

        let mut line = String::new();
        let read = io::stdin().lock().read_line(&mut line)?;
        if read == 0 {
            return Ok(LineEvent::Closed);
        }
        while line.ends_with('\n') || line.ends_with('\r') {
            line.pop();
        }
        Ok(LineEvent::Line(line))
    }

    fn write(&mut self, text: &str) -> io::Result<()> {
        let mut stdout = io::stdout().lock();
        stdout.write_all(text.as_bytes())?;
        stdout.flush()
    }
}

#[cfg(test)]
pub(crate) mod test_support {
    use super::*;
    use std::collections::VecDeque;

    /// Scripted editor feeding canned lines and capturing output.
    #[derive(Debug, Default)]
    pub(crate) struct ScriptedEditor {
        pub(crate) lines: VecDeque<LineEvent>,
        pub(crate) output: String,
        pub(crate) completions: Vec<String>,
        pub(crate) history: Vec<String>,
    }

    impl ScriptedEditor {
        pub(crate) fn with_lines(lines: &[&str]) -> Self {
            Self {
                lines: lines
                    .iter()
                    .map(|line| LineEvent::Line((*line).to_owned()))
                    .collect(),
                ..Self::default()
            }
        }
    }

    impl LineEditor for ScriptedEditor {
        fn read_line(&mut self, _prompt: &str) -> io::Result<LineEvent> {
            Ok(self.lines.pop_front().unwrap_or(LineEvent::Closed))
        }

        fn write(&mut self, text: &str) -> io::Result<()> {
            self.output.push_str(text);
            Ok(())
        }

        fn add_completion(&mut self, word: &str) {
            self.completions.push(word.to_owned());
        }

        fn add_history(&mut self, line: &str) {
            self.history.push(line.to_owned());
        }
    }
}
