//! Upstream descriptors, the proxy-list format, and the rotation pool.

pub mod descriptor;
pub mod pool;

pub use descriptor::*;
pub use pool::*;
