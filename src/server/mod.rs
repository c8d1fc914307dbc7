//! The rotator daemon: listener and worker pool, per-client sessions, and
//! the byte relay.

#[allow(clippy::module_inception)]
pub mod server;
pub mod session;
pub mod relay;

pub use server::*;
pub use session::*;
pub use relay::*;
