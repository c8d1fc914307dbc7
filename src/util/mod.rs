/// Error types and Result alias
pub mod error;
pub mod net;

pub use error::*;
pub use net::*;
