//! Upstream proxy descriptors and the proxy-list line format.
//!
//! A proxy list is line-oriented text. Each line is blank, a `#` comment, or
//! a record of one or more hops separated by `|`:
//!
//! ```text
//! socks5h proxy.example.net 1080
//! socks5 10.0.0.1 1080 alice s3cret
//! socks5h hop1.example 1080 | socks5h hop2.example 1080 u p
//! ```

use crate::util::{Result, SocksRotError};
use std::fmt;
use std::iter::Peekable;
use std::str::FromStr;

/// Upstream proxy protocols.
///
/// `socks5h` resolves destination names at the proxy, `socks5` locally. Both
/// speak the same wire protocol here; chain hops are always addressed by
/// domain name, which is compatible with either.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Protocol {
    Socks5,
    Socks5h,
}

impl Protocol {
    pub fn as_str(&self) -> &'static str {
        match self {
            Protocol::Socks5 => "socks5",
            Protocol::Socks5h => "socks5h",
        }
    }
}

impl FromStr for Protocol {
    type Err = SocksRotError;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "socks5" => Ok(Protocol::Socks5),
            "socks5h" => Ok(Protocol::Socks5h),
            other => Err(SocksRotError::Config(format!(
                "unsupported protocol `{other}`"
            ))),
        }
    }
}

impl fmt::Display for Protocol {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One upstream hop.
///
/// `chain` links to the next hop when this record is an intermediate proxy:
/// the CONNECT issued through this hop targets the chained hop's host and
/// port. The terminal hop of a record has no `chain`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Upstream {
    pub protocol: Protocol,
    pub host: String,
    pub port: u16,
    pub user: Option<String>,
    pub pass: Option<String>,
    pub chain: Option<Box<Upstream>>,
}

impl Upstream {
    /// `host:port` form used when dialing or reporting this hop.
    pub fn endpoint(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }

    /// Credential-free description for log lines: `protocol host:port` per
    /// hop, chain hops joined by ` | `. `Display` keeps the full proxy-list
    /// form including credentials; never log that one.
    pub fn log_label(&self) -> String {
        let mut label = format!("{} {}", self.protocol, self.endpoint());
        let mut hop = self;
        while let Some(next) = &hop.chain {
            label.push_str(" | ");
            label.push_str(&next.protocol.to_string());
            label.push(' ');
            label.push_str(&next.endpoint());
            hop = next;
        }
        label
    }

    /// Parse one proxy-list line.
    ///
    /// Returns `Ok(None)` for blank lines and comment lines. A `#` token mid
    /// line starts a trailing comment; everything after it is ignored.
    pub fn parse_line(line: &str) -> Result<Option<Upstream>> {
        let line = line.trim_end_matches(['\r', '\n']);
        let mut tokens = line
            .split_ascii_whitespace()
            .take_while(|token| !token.starts_with('#'))
            .peekable();

        if tokens.peek().is_none() {
            return Ok(None);
        }

        let mut head = parse_hop(&mut tokens, line)?;

        let mut tail = &mut head;
        while let Some(token) = tokens.next() {
            if token != "|" {
                return Err(parse_error(line, &format!("unexpected token `{token}`")));
            }
            if tokens.peek().is_none() {
                return Err(parse_error(line, "dangling `|`"));
            }
            let hop = parse_hop(&mut tokens, line)?;
            tail = &mut **tail.chain.insert(Box::new(hop));
        }

        Ok(Some(head))
    }
}

impl fmt::Display for Upstream {
    /// Formats the record in proxy-list syntax, chain hops joined by ` | `.
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {} {}", self.protocol, self.host, self.port)?;
        if let Some(user) = &self.user {
            write!(f, " {user}")?;
        }
        if let Some(pass) = &self.pass {
            write!(f, " {pass}")?;
        }
        if let Some(next) = &self.chain {
            write!(f, " | {next}")?;
        }
        Ok(())
    }
}

/// Parse every record in a proxy list, preserving input order.
///
/// The caller owns file access; this consumes any iterator of lines.
pub fn parse_proxy_list<I, S>(lines: I) -> Result<Vec<Upstream>>
where
    I: IntoIterator<Item = S>,
    S: AsRef<str>,
{
    let mut upstreams = Vec::new();
    for line in lines {
        if let Some(upstream) = Upstream::parse_line(line.as_ref())? {
            upstreams.push(upstream);
        }
    }
    Ok(upstreams)
}

/// Consume one hop: `protocol host port [user [pass]]`. Stops short of a `|`
/// separator so the caller can continue the chain.
fn parse_hop<'a, I>(tokens: &mut Peekable<I>, line: &str) -> Result<Upstream>
where
    I: Iterator<Item = &'a str>,
{
    let protocol_token = tokens
        .next()
        .ok_or_else(|| parse_error(line, "missing protocol"))?;
    let protocol = protocol_token.parse::<Protocol>().map_err(|_| {
        parse_error(line, &format!("unsupported protocol `{protocol_token}`"))
    })?;

    let host = tokens
        .next()
        .ok_or_else(|| parse_error(line, "missing host"))?
        .to_string();

    let port_token = tokens
        .next()
        .ok_or_else(|| parse_error(line, "missing port"))?;
    let port = parse_port(port_token).ok_or_else(|| {
        parse_error(line, &format!("invalid port `{port_token}`"))
    })?;

    let mut user = None;
    let mut pass = None;
    if tokens.peek().is_some_and(|token| *token != "|") {
        user = tokens.next().map(str::to_string);
        if tokens.peek().is_some_and(|token| *token != "|") {
            pass = tokens.next().map(str::to_string);
        }
    }

    Ok(Upstream {
        protocol,
        host,
        port,
        user,
        pass,
        chain: None,
    })
}

/// A port is a run of ASCII digits in `[1, 65535]`.
fn parse_port(token: &str) -> Option<u16> {
    if token.is_empty() || !token.bytes().all(|b| b.is_ascii_digit()) {
        return None;
    }
    match token.parse::<u16>() {
        Ok(0) | Err(_) => None,
        Ok(port) => Some(port),
    }
}

fn parse_error(line: &str, reason: &str) -> SocksRotError {
    SocksRotError::Config(format!("could not parse proxy `{line}`: {reason}"))
}
