//! The insertion-ordered command registry and its resolution rules.

use tracing::debug;

use super::descriptor::{CommandDescriptor, RegisterError, is_help_request};
use super::output::OutputSink;
use super::DISPATCH_TARGET;

/// Insertion-ordered collection of command descriptors.
///
/// Owned exclusively by one server instance; dispatch is sequential, so a
/// callback may assume nothing else runs on the same table concurrently.
#[derive(Debug, Default)]
pub struct DispatchTable {
    entries: Vec<CommandDescriptor>,
    longest_keyword: usize,
}

/// Outcome of resolving a typed keyword against the table.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Resolution {
    /// Exactly one registered keyword matched; dispatch with the index.
    Matched(usize),
    /// No registered keyword starts with the typed string.
    NotFound,
    /// Two or more keywords share the typed prefix.
    Ambiguous(Vec<String>),
}

/// Outcome of dispatching a resolved command.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DispatchOutcome {
    /// The callback ran (or a help token printed the usage string).
    Done,
    /// The argument count fell outside [min, max]; usage was written to the
    /// sink and the callback was not invoked.
    InvalidArgCount,
}

impl DispatchTable {
    /// Creates an empty table.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a descriptor.
    ///
    /// # Errors
    ///
    /// Returns a [`RegisterError`] and leaves the table unchanged when the
    /// descriptor is malformed or its keyword is already taken.
    pub fn register(&mut self, descriptor: CommandDescriptor) -> Result<(), RegisterError> {
        descriptor.validate()?;
        if self.entries.iter().any(|entry| entry.name == descriptor.name) {
            return Err(RegisterError::Duplicate {
                keyword: descriptor.name,
            });
        }
        self.longest_keyword = self.longest_keyword.max(descriptor.name.len());
        debug!(
            target: DISPATCH_TARGET,
            keyword = %descriptor.name,
            "command registered"
        );
        self.entries.push(descriptor);
        Ok(())
    }

    /// Resolves a typed keyword by case-sensitive prefix match.
    ///
    /// A keyword typed in full always resolves to exactly that command, even
    /// when longer keywords share it as a prefix. The empty string matches
    /// nothing.
    #[must_use]
    pub fn resolve(&self, typed: &str) -> Resolution {
        if typed.is_empty() {
            return Resolution::NotFound;
        }
        if let Some(index) = self.entries.iter().position(|entry| entry.name == typed) {
            return Resolution::Matched(index);
        }
        let matches: Vec<usize> = self
            .entries
            .iter()
            .enumerate()
            .filter(|(_, entry)| entry.name.starts_with(typed))
            .map(|(index, _)| index)
            .collect();
        match matches.as_slice() {
            [] => Resolution::NotFound,
            [index] => Resolution::Matched(*index),
            many => Resolution::Ambiguous(
                many.iter()
                    .filter_map(|index| self.entries.get(*index))
                    .map(|entry| entry.name.clone())
                    .collect(),
            ),
        }
    }

    /// Dispatches the command at `index` (from [`Resolution::Matched`]).
    ///
    /// Validates the argument count, honours bare help tokens, and invokes
    /// the callback with all output captured in `sink`.
    pub fn dispatch(
        &mut self,
        index: usize,
        args: &[String],
        sink: &mut OutputSink,
    ) -> DispatchOutcome {
        let Some(entry) = self.entries.get_mut(index) else {
            return DispatchOutcome::Done;
        };
        if is_help_request(args) && entry.usage_on_help {
            let usage = if entry.usage.is_empty() {
                entry.name.as_str()
            } else {
                entry.usage.as_str()
            };
            sink.writeln(usage);
            return DispatchOutcome::Done;
        }
        if !is_help_request(args) && (args.len() < entry.min_args || args.len() > entry.max_args) {
            sink.writeln(format!("usage: {}", entry.usage));
            return DispatchOutcome::InvalidArgCount;
        }
        (entry.callback)(args, sink);
        DispatchOutcome::Done
    }

    /// Renders the human-readable command listing, one `name  -  description`
    /// line per command, names padded to the longest keyword.
    #[must_use]
    pub fn render_listing(&self) -> String {
        let width = self.longest_keyword;
        let mut listing = String::new();
        for entry in &self.entries {
            listing.push_str(&format!(
                "{:<width$}  -  {}\n",
                entry.name, entry.description
            ));
        }
        listing
    }

    /// Renders the machine-readable keyword list (space-delimited), consumed
    /// by clients for tab completion.
    #[must_use]
    pub fn keyword_list(&self) -> String {
        self.keywords().collect::<Vec<_>>().join(" ")
    }

    /// Iterates the registered keywords in insertion order.
    pub fn keywords(&self) -> impl Iterator<Item = &str> {
        self.entries.iter().map(|entry| entry.name.as_str())
    }

    /// Iterates `(keyword, description)` pairs in insertion order.
    pub fn listing_entries(&self) -> impl Iterator<Item = (&str, &str)> {
        self.entries
            .iter()
            .map(|entry| (entry.name.as_str(), entry.description.as_str()))
    }

    /// Length of the longest registered keyword, for display alignment.
    #[must_use]
    pub fn longest_keyword(&self) -> usize {
        self.longest_keyword
    }

    /// Number of registered commands.
    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// True when no commands are registered.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}
