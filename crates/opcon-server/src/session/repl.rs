//! Shared interactive loop for stream and direct sessions.
//!
//! The loop reads lines from a [`LineEditor`], resolves them against the
//! dispatch table plus the synthesized session commands (`help`, `exit`,
//! `batch`), and flushes command output back through the editor. Resolution
//! and argument errors print a one-line diagnostic and re-prompt; they never
//! end the session.

use std::fs;
use std::io;

use tracing::debug;

use crate::dispatch::{DispatchOutcome, DispatchTable, OutputSink, Resolution};

use super::SESSION_TARGET;
use super::editor::{LineEditor, LineEvent};

/// Nesting ceiling for `batch` files replaying other `batch` files.
const MAX_BATCH_DEPTH: usize = 4;

/// Synthesized commands present in every stream and direct session.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Builtin {
    Help,
    Exit,
    Batch,
}

const BUILTINS: [(&str, &str, Builtin); 3] = [
    ("help", "list available commands", Builtin::Help),
    ("exit", "end the console session", Builtin::Exit),
    ("batch", "replay commands from a file", Builtin::Batch),
];

/// Why the loop ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum ReplEnd {
    /// The user asked to leave.
    Exit,
    /// The idle window elapsed with no input.
    IdleTimeout,
    /// The input channel closed.
    Closed,
}

/// One interactive session over a dispatch table.
pub(crate) struct Repl<'a> {
    table: &'a mut DispatchTable,
    banner: &'a str,
    title: &'a str,
    prompt: &'a str,
}

enum Target {
    Builtin(Builtin),
    Command(usize),
    NotFound,
    Ambiguous(Vec<String>),
}

impl<'a> Repl<'a> {
    pub(crate) fn new(
        table: &'a mut DispatchTable,
        banner: &'a str,
        title: &'a str,
        prompt: &'a str,
    ) -> Self {
        Self {
            table,
            banner,
            title,
            prompt,
        }
    }

    /// Runs the loop until exit, idle timeout, or channel close.
    pub(crate) fn run(&mut self, editor: &mut dyn LineEditor) -> io::Result<ReplEnd> {
        for (name, _, _) in BUILTINS {
            editor.add_completion(name);
        }
        let keywords: Vec<String> = self.table.keywords().map(str::to_owned).collect();
        for keyword in &keywords {
            editor.add_completion(keyword);
        }
        if !self.banner.is_empty() {
            editor.write(self.banner)?;
            editor.write("\n")?;
        }
        if !self.title.is_empty() {
            editor.write(self.title)?;
            editor.write("\n")?;
        }

        loop {
            match editor.read_line(self.prompt)? {
                LineEvent::Line(line) => {
                    let trimmed = line.trim();
                    if trimmed.is_empty() {
                        continue;
                    }
                    editor.add_history(trimmed);
                    if let Some(end) = self.process_line(trimmed, editor, 0)? {
                        return Ok(end);
                    }
                }
                LineEvent::IdleTimeout => {
                    let _ = editor.write("idle timeout; closing session\n");
                    return Ok(ReplEnd::IdleTimeout);
                }
                LineEvent::Closed => return Ok(ReplEnd::Closed),
            }
        }
    }

    /// Handles one input line; `Some` ends the session.
    fn process_line(
        &mut self,
        line: &str,
        editor: &mut dyn LineEditor,
        depth: usize,
    ) -> io::Result<Option<ReplEnd>> {
        let mut tokens = line.split_whitespace();
        let Some(keyword) = tokens.next() else {
            return Ok(None);
        };
        let args: Vec<String> = tokens.map(str::to_owned).collect();

        match self.resolve(keyword) {
            Target::NotFound => {
                editor.write(&format!("unknown command: '{keyword}'\n"))?;
            }
            Target::Ambiguous(candidates) => {
                editor.write(&format!(
                    "ambiguous command: '{keyword}' (matches {})\n",
                    candidates.join(", ")
                ))?;
            }
            Target::Builtin(Builtin::Help) => {
                editor.write(&self.render_session_listing())?;
            }
            Target::Builtin(Builtin::Exit) => {
                return Ok(Some(ReplEnd::Exit));
            }
            Target::Builtin(Builtin::Batch) => {
                return self.run_batch(&args, editor, depth);
            }
            Target::Command(index) => {
                let mut sink = OutputSink::new();
                let outcome = self.table.dispatch(index, &args, &mut sink);
                if outcome == DispatchOutcome::InvalidArgCount {
                    debug!(
                        target: SESSION_TARGET,
                        keyword,
                        args = args.len(),
                        "argument count rejected"
                    );
                }
                let output = sink.take();
                if !output.is_empty() {
                    editor.write(&output)?;
                }
            }
        }
        Ok(None)
    }

    /// Resolves against registered commands and session builtins together,
    /// so an abbreviation shared between the two is still ambiguous.
    ///
    /// A keyword typed in full is never ambiguous: it dispatches directly,
    /// with a registered command shadowing a builtin of the same name.
    fn resolve(&self, keyword: &str) -> Target {
        if let Some(index) = self.table.keywords().position(|name| name == keyword) {
            return Target::Command(index);
        }
        if let Some(builtin) = BUILTINS
            .iter()
            .find(|(name, _, _)| *name == keyword)
            .map(|(_, _, builtin)| *builtin)
        {
            return Target::Builtin(builtin);
        }
        let builtins: Vec<(&str, Builtin)> = BUILTINS
            .iter()
            .filter(|(name, _, _)| name.starts_with(keyword))
            .map(|(name, _, builtin)| (*name, *builtin))
            .collect();
        match (self.table.resolve(keyword), builtins.as_slice()) {
            (Resolution::Matched(index), []) => Target::Command(index),
            (Resolution::NotFound, []) => Target::NotFound,
            (Resolution::NotFound, [(_, builtin)]) => Target::Builtin(*builtin),
            (resolution, builtins) => {
                let mut candidates: Vec<String> = match resolution {
                    Resolution::Ambiguous(names) => names,
                    Resolution::Matched(index) => self
                        .table
                        .keywords()
                        .nth(index)
                        .map(str::to_owned)
                        .into_iter()
                        .collect(),
                    Resolution::NotFound => Vec::new(),
                };
                candidates.extend(builtins.iter().map(|(name, _)| (*name).to_owned()));
                Target::Ambiguous(candidates)
            }
        }
    }

    /// Replays a file of commands line-by-line through the session.
    fn run_batch(
        &mut self,
        args: &[String],
        editor: &mut dyn LineEditor,
        depth: usize,
    ) -> io::Result<Option<ReplEnd>> {
        let [path] = args else {
            editor.write("usage: batch <file>\n")?;
            return Ok(None);
        };
        if depth >= MAX_BATCH_DEPTH {
            editor.write(&format!("batch nesting too deep: '{path}'\n"))?;
            return Ok(None);
        }
        let content = match fs::read_to_string(path) {
            Ok(content) => content,
            Err(error) => {
                editor.write(&format!("cannot read '{path}': {error}\n"))?;
                return Ok(None);
            }
        };
        for line in content.lines() {
            let trimmed = line.trim();
            if trimmed.is_empty() || trimmed.starts_with('#') {
                continue;
            }
            if let Some(end) = self.process_line(trimmed, editor, depth + 1)? {
                return Ok(Some(end));
            }
        }
        Ok(None)
    }

    /// Command listing including the synthesized session commands.
    fn render_session_listing(&self) -> String {
        let width = BUILTINS
            .iter()
            .map(|(name, _, _)| name.len())
            .max()
            .unwrap_or(0)
            .max(self.table.longest_keyword());
        let mut listing = String::new();
        for (name, description) in self.table.listing_entries() {
            listing.push_str(&format!("{name:<width$}  -  {description}\n"));
        }
        for (name, description, _) in BUILTINS {
            listing.push_str(&format!("{name:<width$}  -  {description}\n"));
        }
        listing
    }
}

#[cfg(test)]
mod tests {
    #![expect(clippy::expect_used, reason = "tests use expect for clarity")]

    use std::io::Write as _;

    use super::*;
    use crate::dispatch::CommandDescriptor;
    use crate::session::editor::test_support::ScriptedEditor;

    fn sample_table() -> DispatchTable {
        let mut table = DispatchTable::new();
        table
            .register(CommandDescriptor::new("hello", "say hello", |args, sink| {
                sink.writeln(format!("hello {}", args.join(" ")));
            })
            .with_args(0, 20, "hello [names...]"))
            .expect("register hello");
        table
            .register(
                CommandDescriptor::new("status", "report status", |_args, sink| {
                    sink.writeln("all good");
                }),
            )
            .expect("register status");
        table
    }

    fn run_session(table: &mut DispatchTable, lines: &[&str]) -> (ScriptedEditor, ReplEnd) {
        let mut editor = ScriptedEditor::with_lines(lines);
        let end = Repl::new(table, "", "", "> ")
            .run(&mut editor)
            .expect("repl io");
        (editor, end)
    }

    #[test]
    fn dispatches_full_keywords_and_flushes_output() {
        let mut table = sample_table();
        let (editor, end) = run_session(&mut table, &["hello world", "exit"]);
        assert_eq!(end, ReplEnd::Exit);
        assert!(editor.output.contains("hello world\n"));
    }

    #[test]
    fn unique_prefix_dispatches() {
        let mut table = sample_table();
        let (editor, _) = run_session(&mut table, &["st"]);
        assert!(editor.output.contains("all good\n"));
    }

    #[test]
    fn prefix_shared_with_a_builtin_is_ambiguous() {
        let mut table = sample_table();
        let (editor, _) = run_session(&mut table, &["hel"]);
        assert!(editor.output.contains("ambiguous command: 'hel'"));
        assert!(editor.output.contains("hello"));
        assert!(editor.output.contains("help"));
    }

    #[test]
    fn full_builtin_name_wins_over_a_longer_command() {
        let mut table = sample_table();
        table
            .register(CommandDescriptor::new("helper", "assist", |_args, sink| {
                sink.writeln("assisting");
            }))
            .expect("register helper");
        let (editor, _) = run_session(&mut table, &["help"]);
        assert!(!editor.output.contains("ambiguous"));
        assert!(editor.output.contains("helper  -  assist\n"));
        assert!(editor.output.contains("end the console session"));
    }

    #[test]
    fn full_keyword_wins_over_a_builtin_prefix() {
        let mut table = sample_table();
        table
            .register(CommandDescriptor::new("ex", "expand", |_args, sink| {
                sink.writeln("expanded");
            }))
            .expect("register ex");
        let (editor, end) = run_session(&mut table, &["ex"]);
        assert!(editor.output.contains("expanded\n"));
        assert_eq!(end, ReplEnd::Closed);
    }

    #[test]
    fn unknown_commands_diagnose_and_continue() {
        let mut table = sample_table();
        let (editor, end) = run_session(&mut table, &["bogus", "status"]);
        assert!(editor.output.contains("unknown command: 'bogus'"));
        assert!(editor.output.contains("all good\n"));
        assert_eq!(end, ReplEnd::Closed);
    }

    #[test]
    fn help_lists_registered_and_builtin_commands() {
        let mut table = sample_table();
        let (editor, _) = run_session(&mut table, &["help"]);
        assert!(editor.output.contains("hello   -  say hello\n"));
        assert!(editor.output.contains("status  -  report status\n"));
        assert!(editor.output.contains("exit    -  end the console session\n"));
        assert!(editor.output.contains("batch   -  replay commands from a file\n"));
    }

    #[test]
    fn completion_vocabulary_covers_table_and_builtins() {
        let mut table = sample_table();
        let (editor, _) = run_session(&mut table, &[]);
        for word in ["help", "exit", "batch", "hello", "status"] {
            assert!(
                editor.completions.iter().any(|entry| entry == word),
                "missing completion {word}"
            );
        }
    }

    #[test]
    fn idle_timeout_ends_the_session_with_a_notice() {
        let mut table = sample_table();
        let mut editor = ScriptedEditor::default();
        editor.lines.push_back(LineEvent::IdleTimeout);
        let end = Repl::new(&mut table, "", "", "> ")
            .run(&mut editor)
            .expect("repl io");
        assert_eq!(end, ReplEnd::IdleTimeout);
        assert!(editor.output.contains("idle timeout"));
    }

    #[test]
    fn banner_and_title_print_before_the_first_prompt() {
        let mut table = sample_table();
        let mut editor = ScriptedEditor::default();
        let end = Repl::new(&mut table, "welcome", "trace console", "> ")
            .run(&mut editor)
            .expect("repl io");
        assert_eq!(end, ReplEnd::Closed);
        assert!(editor.output.starts_with("welcome\ntrace console\n"));
    }

    #[test]
    fn batch_replays_a_file_and_skips_comments() {
        let mut table = sample_table();
        let mut file = tempfile::NamedTempFile::new().expect("temp file");
        writeln!(file, "# comment").expect("write");
        writeln!(file, "status").expect("write");
        writeln!(file).expect("write");
        writeln!(file, "hello from batch").expect("write");
        let path = file.path().display().to_string();

        let line = format!("batch {path}");
        let (editor, _) = run_session(&mut table, &[line.as_str()]);
        assert!(editor.output.contains("all good\n"));
        assert!(editor.output.contains("hello from batch\n"));
    }

    #[test]
    fn batch_requires_exactly_one_argument() {
        let mut table = sample_table();
        let (editor, _) = run_session(&mut table, &["batch"]);
        assert!(editor.output.contains("usage: batch <file>"));
    }

    #[test]
    fn history_records_accepted_lines() {
        let mut table = sample_table();
        let (editor, _) = run_session(&mut table, &["status", "   ", "exit"]);
        assert_eq!(editor.history, vec!["status".to_owned(), "exit".to_owned()]);
    }
}
