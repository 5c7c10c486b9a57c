//! Command descriptors registered by the hosting application.

use std::fmt;

use thiserror::Error;

use super::OutputSink;

/// Callback invoked when a command dispatches.
///
/// Receives the whitespace-split arguments (the keyword itself excluded) and
/// the invocation's output sink.
pub type CommandCallback = Box<dyn FnMut(&[String], &mut OutputSink) + Send>;

/// Tokens that request a command's usage string instead of invoking it.
const HELP_TOKENS: [&str; 5] = ["?", "-h", "--help", "-help", "--h"];

/// True when the argument list is a single bare help token.
pub(crate) fn is_help_request(args: &[String]) -> bool {
    matches!(args, [only] if HELP_TOKENS.contains(&only.as_str()))
}

/// A named, argument-taking command registered against a dispatch table.
///
/// Immutable once registered; destroyed with the table.
pub struct CommandDescriptor {
    pub(crate) name: String,
    pub(crate) description: String,
    pub(crate) usage: String,
    pub(crate) min_args: usize,
    pub(crate) max_args: usize,
    pub(crate) usage_on_help: bool,
    pub(crate) callback: CommandCallback,
}

impl CommandDescriptor {
    /// Builds a descriptor taking no arguments.
    ///
    /// Argument bounds and usage are added with
    /// [`with_args`](Self::with_args); help tokens show the usage string
    /// unless [`forward_help`](Self::forward_help) is set.
    pub fn new(
        name: impl Into<String>,
        description: impl Into<String>,
        callback: impl FnMut(&[String], &mut OutputSink) + Send + 'static,
    ) -> Self {
        Self {
            name: name.into(),
            description: description.into(),
            usage: String::new(),
            min_args: 0,
            max_args: 0,
            usage_on_help: true,
            callback: Box::new(callback),
        }
    }

    /// Declares the accepted argument range and the usage string shown when
    /// the count falls outside it.
    #[must_use]
    pub fn with_args(mut self, min: usize, max: usize, usage: impl Into<String>) -> Self {
        self.min_args = min;
        self.max_args = max;
        self.usage = usage.into();
        self
    }

    /// Forwards bare help tokens to the callback instead of printing the
    /// usage string, letting the command self-report its help.
    #[must_use]
    pub fn forward_help(mut self) -> Self {
        self.usage_on_help = false;
        self
    }

    /// The unique keyword invoking this command.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// One-line description shown in command listings.
    #[must_use]
    pub fn description(&self) -> &str {
        &self.description
    }

    /// Usage string shown on argument errors and help requests.
    #[must_use]
    pub fn usage(&self) -> &str {
        &self.usage
    }

    /// Validates the descriptor against the registration contract.
    pub(crate) fn validate(&self) -> Result<(), RegisterError> {
        if self.name.is_empty() {
            return Err(RegisterError::EmptyKeyword);
        }
        if self.name.chars().any(char::is_whitespace) {
            return Err(RegisterError::WhitespaceKeyword {
                keyword: self.name.clone(),
            });
        }
        if self.min_args > self.max_args {
            return Err(RegisterError::InvalidArgRange {
                keyword: self.name.clone(),
                min: self.min_args,
                max: self.max_args,
            });
        }
        if self.max_args > 0 && self.usage.is_empty() {
            return Err(RegisterError::MissingUsage {
                keyword: self.name.clone(),
            });
        }
        Ok(())
    }
}

impl fmt::Debug for CommandDescriptor {
    fn fmt(&self, formatter: &mut fmt::Formatter<'_>) -> fmt::Result {
        formatter
            .debug_struct("CommandDescriptor")
            .field("name", &self.name)
            .field("min_args", &self.min_args)
            .field("max_args", &self.max_args)
            .field("usage_on_help", &self.usage_on_help)
            .finish_non_exhaustive()
    }
}

/// Reasons a descriptor is rejected at registration time.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum RegisterError {
    /// The keyword was empty.
    #[error("command keyword is empty")]
    EmptyKeyword,
    /// The keyword contained whitespace.
    #[error("command keyword '{keyword}' contains whitespace")]
    WhitespaceKeyword {
        /// The offending keyword.
        keyword: String,
    },
    /// Another descriptor already owns the keyword.
    #[error("command keyword '{keyword}' is already registered")]
    Duplicate {
        /// The duplicated keyword.
        keyword: String,
    },
    /// Arguments were declared without a usage string to show on errors.
    #[error("command '{keyword}' declares arguments but no usage string")]
    MissingUsage {
        /// The offending keyword.
        keyword: String,
    },
    /// The minimum argument count exceeded the maximum.
    #[error("command '{keyword}' declares min {min} > max {max} arguments")]
    InvalidArgRange {
        /// The offending keyword.
        keyword: String,
        /// Declared minimum.
        min: usize,
        /// Declared maximum.
        max: usize,
    },
}
