//! Endpoint, runtime-path, and override configuration shared by the console
//! server and the control client.
//!
//! Both sides need to agree on where filesystem-backed datagram endpoints
//! live and how abandoned ones are reclaimed, so the claim logic lives here
//! rather than in either binary-facing crate.

mod claim;
mod defaults;
mod endpoint;
mod overrides;
mod runtime;

pub use claim::{ClaimError, PathClaim, reclaim_orphans};
pub use defaults::{
    DEFAULT_CLAIM_ATTEMPTS, DEFAULT_CLIENT_TIMEOUT, DEFAULT_IDLE_TIMEOUT, DEFAULT_PORT,
    DEFAULT_PORT_PROBE_LIMIT, default_prompt,
};
pub use endpoint::{Endpoint, EndpointParseError, EndpointPrepareError};
pub use overrides::{ConsoleOverrides, EnvOverrides, NoOverrides, OverrideSource};
pub use runtime::{RuntimeDirError, lock_path_for, runtime_dir, socket_path};
