//! Built-in defaults applied before any per-name overrides.

use std::time::Duration;

/// Default UDP/stream port a console server binds when none is configured.
pub const DEFAULT_PORT: u16 = 1976;

/// Default idle timeout closing an inactive stream session.
pub const DEFAULT_IDLE_TIMEOUT: Duration = Duration::from_secs(600);

/// Default per-call timeout for control-client sends.
pub const DEFAULT_CLIENT_TIMEOUT: Duration = Duration::from_secs(5);

/// Default number of successive ports probed when the base port is taken.
pub const DEFAULT_PORT_PROBE_LIMIT: u16 = 16;

/// Default number of candidate names tried when claiming a local endpoint.
pub const DEFAULT_CLAIM_ATTEMPTS: usize = 16;

/// Default interactive prompt derived from the server's logical name.
#[must_use]
pub fn default_prompt(name: &str) -> String {
    format!("{name}> ")
}
