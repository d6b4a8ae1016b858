//! `CONNECT` request-line parsing.
//!
//! Only the request line is interpreted. The parser does not buffer across
//! reads: the whole request line is expected in the first read from a
//! client, and a line split across two reads is rejected. Headers are never
//! parsed; [`HeadScanner`] only finds where they end so they are not relayed.

use thiserror::Error;

/// Destination requested by a client.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct HostPort {
    pub host: String,
    pub port: u16,
}

impl std::fmt::Display for HostPort {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}:{}", self.host, self.port)
    }
}

/// Reasons a request line is refused.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ParseError {
    #[error("empty request")]
    Empty,

    #[error("request line is not valid UTF-8")]
    NotUtf8,

    #[error("request line has no target")]
    MissingTarget,

    #[error("unsupported method {0:?}")]
    UnsupportedMethod(String),

    #[error("target has no port")]
    MissingPort,

    #[error("target {0:?} must contain exactly one ':'")]
    InvalidTarget(String),

    #[error("target has an empty host")]
    EmptyHost,

    #[error("invalid port {0:?}")]
    InvalidPort(String),
}

/// Parses the first line of `buffer` as `CONNECT host:port VERSION`.
///
/// The line ends at the first `\n` (an optional preceding `\r` is ignored)
/// or at the end of the buffer. The version token is not checked.
pub fn parse_connect(buffer: &[u8]) -> Result<HostPort, ParseError> {
    let line = match buffer.iter().position(|&b| b == b'\n') {
        Some(end) => &buffer[..end],
        None => buffer,
    };
    let line = line.strip_suffix(b"\r").unwrap_or(line);

    let line = std::str::from_utf8(line).map_err(|_| ParseError::NotUtf8)?;
    let mut tokens = line.split_ascii_whitespace();

    let method = tokens.next().ok_or(ParseError::Empty)?;
    if method != "CONNECT" {
        return Err(ParseError::UnsupportedMethod(method.to_string()));
    }

    let target = tokens.next().ok_or(ParseError::MissingTarget)?;

    let (host, port) = target.split_once(':').ok_or(ParseError::MissingPort)?;
    if port.contains(':') {
        return Err(ParseError::InvalidTarget(target.to_string()));
    }
    if host.is_empty() {
        return Err(ParseError::EmptyHost);
    }

    // `u16::from_str` accepts a leading '+', which is not a port.
    if port.is_empty() || !port.bytes().all(|b| b.is_ascii_digit()) {
        return Err(ParseError::InvalidPort(port.to_string()));
    }
    let port = port
        .parse::<u16>()
        .map_err(|_| ParseError::InvalidPort(port.to_string()))?;

    Ok(HostPort {
        host: host.to_string(),
        port,
    })
}

/// Incremental search for the blank line ending a request head.
///
/// Lines end the way [`parse_connect`] ends them: at `\n`, with an optional
/// `\r` before it. The head therefore ends at `\r\n\r\n`, `\n\n`, `\n\r\n`
/// or `\r\n\n`. Progress is kept between calls so a terminator split
/// across reads is still found.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct HeadScanner {
    state: LineState,
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
enum LineState {
    /// Inside a line.
    #[default]
    Text,
    /// Right after a `\n`.
    LineStart,
    /// A `\r` at the start of a line.
    CarriageReturn,
}

impl HeadScanner {
    pub fn new() -> Self {
        Self::default()
    }

    /// Feeds `bytes` to the scanner.
    ///
    /// Returns the offset just past the terminator if it completes within
    /// `bytes`; everything from that offset on is payload.
    pub fn scan(&mut self, bytes: &[u8]) -> Option<usize> {
        for (i, &b) in bytes.iter().enumerate() {
            self.state = match (self.state, b) {
                (LineState::LineStart | LineState::CarriageReturn, b'\n') => {
                    self.state = LineState::Text;
                    return Some(i + 1);
                }
                (_, b'\n') => LineState::LineStart,
                (LineState::LineStart, b'\r') => LineState::CarriageReturn,
                _ => LineState::Text,
            };
        }

        None
    }
}
