//! SOCKS5 wire protocol: RFC 1928 method negotiation and the RFC 1929
//! username/password sub-negotiation, on both sides of the rotator.
//!
//! The server half faces accepted clients; the client half faces upstream
//! proxies, including the CONNECT requests that link chain hops together.

pub mod client;
pub mod server;

/// SOCKS5 protocol version
pub const SOCKS5_VERSION: u8 = 0x05;

/// Username/password sub-negotiation version (RFC 1929)
pub const USERPASS_VERSION: u8 = 0x01;

/// Authentication methods
pub const AUTH_NO_AUTHENTICATION: u8 = 0x00;
pub const AUTH_USERNAME_PASSWORD: u8 = 0x02;
pub const AUTH_NOT_ACCEPTABLE: u8 = 0xFF;

/// Command types
pub const CMD_CONNECT: u8 = 0x01;

/// Address types
pub const ATYP_IPV4: u8 = 0x01;
pub const ATYP_DOMAIN: u8 = 0x03;
pub const ATYP_IPV6: u8 = 0x04;

/// Sub-negotiation status codes
pub const STATUS_SUCCESS: u8 = 0x00;
pub const STATUS_FAILURE: u8 = 0x01;
