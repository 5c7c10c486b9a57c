//! Per-logical-name configuration overrides.
//!
//! The console core consumes overrides through [`OverrideSource`]; where
//! they come from (a file, a database, the environment) is the embedding
//! application's business. [`EnvOverrides`] is the built-in source.

use std::env;
use std::time::Duration;

/// Optional overrides applied to one named server or control connection
/// before it binds or connects.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ConsoleOverrides {
    /// Replacement host for network endpoints.
    pub host: Option<String>,
    /// Replacement base port for network endpoints.
    pub port: Option<u16>,
    /// Replacement interactive prompt.
    pub prompt: Option<String>,
    /// Replacement banner shown when a session opens.
    pub banner: Option<String>,
    /// Replacement session title.
    pub title: Option<String>,
    /// Replacement timeout (idle timeout for servers, call timeout for
    /// clients).
    pub timeout: Option<Duration>,
}

impl ConsoleOverrides {
    /// True when no field is set.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        *self == Self::default()
    }
}

/// Supplies overrides for a logical server or connection name.
pub trait OverrideSource {
    /// Returns the overrides for `name`, or `None` when there are none.
    fn overrides_for(&self, name: &str) -> Option<ConsoleOverrides>;
}

/// Source that never overrides anything.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoOverrides;

impl OverrideSource for NoOverrides {
    fn overrides_for(&self, _name: &str) -> Option<ConsoleOverrides> {
        None
    }
}

/// Reads overrides from environment variables.
///
/// For a logical name `trace-server` the variables consulted are
/// `OPCON_TRACE_SERVER_HOST`, `..._PORT`, `..._PROMPT`, `..._BANNER`,
/// `..._TITLE`, and `..._TIMEOUT_MS` (hyphens map to underscores, names
/// upper-cased).
#[derive(Debug, Clone, Copy, Default)]
pub struct EnvOverrides;

impl EnvOverrides {
    fn variable(name: &str, field: &str) -> Option<String> {
        let key = format!(
            "OPCON_{}_{field}",
            name.to_uppercase().replace(['-', '.'], "_")
        );
        env::var(key).ok().filter(|value| !value.is_empty())
    }
}

impl OverrideSource for EnvOverrides {
    fn overrides_for(&self, name: &str) -> Option<ConsoleOverrides> {
        let overrides = ConsoleOverrides {
            host: Self::variable(name, "HOST"),
            port: Self::variable(name, "PORT").and_then(|value| value.parse().ok()),
            prompt: Self::variable(name, "PROMPT"),
            banner: Self::variable(name, "BANNER"),
            title: Self::variable(name, "TITLE"),
            timeout: Self::variable(name, "TIMEOUT_MS")
                .and_then(|value| value.parse().ok())
                .map(Duration::from_millis),
        };
        if overrides.is_empty() {
            None
        } else {
            Some(overrides)
        }
    }
}

#[cfg(test)]
mod tests {
    #![expect(clippy::expect_used, reason = "tests use expect for clarity")]

    use super::*;

    #[test]
    fn no_overrides_always_declines() {
        assert!(NoOverrides.overrides_for("anything").is_none());
    }

    #[test]
    fn env_overrides_map_name_and_fields() {
        // Process-global environment; use a name no other test touches.
        unsafe {
            env::set_var("OPCON_OVERRIDE_PROBE_PORT", "4100");
            env::set_var("OPCON_OVERRIDE_PROBE_TIMEOUT_MS", "250");
        }
        let overrides = EnvOverrides
            .overrides_for("override-probe")
            .expect("overrides present");
        assert_eq!(overrides.port, Some(4100));
        assert_eq!(overrides.timeout, Some(Duration::from_millis(250)));
        assert!(overrides.host.is_none());
        unsafe {
            env::remove_var("OPCON_OVERRIDE_PROBE_PORT");
            env::remove_var("OPCON_OVERRIDE_PROBE_TIMEOUT_MS");
        }
    }

    #[test]
    fn env_overrides_decline_when_nothing_is_set() {
        assert!(EnvOverrides.overrides_for("unset-name-xyz").is_none());
    }
}
