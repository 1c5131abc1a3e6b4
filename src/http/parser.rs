use bytes::Bytes;

use crate::http::request::{Method, Request};

/// Header section terminator.
pub const HEADER_TERMINATOR: &[u8] = b"\r\n\r\n";

#[derive(Debug, PartialEq, Eq)]
pub enum ParseError {
    /// The head is not valid UTF-8 or the request line is missing tokens.
    InvalidRequest,
    /// No header terminator yet; more bytes are needed.
    Incomplete,
}

impl std::fmt::Display for ParseError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ParseError::InvalidRequest => f.write_str("invalid request line"),
            ParseError::Incomplete => f.write_str("incomplete request head"),
        }
    }
}

impl std::error::Error for ParseError {}

/// Parses one request from the front of `buf`.
///
/// Returns the request and the number of bytes it consumed. For `POST`,
/// everything after the terminator is taken as the body; no `Content-Length`
/// is consulted, so the body is whatever has arrived so far.
pub fn parse_http_request(buf: &[u8]) -> Result<(Request, usize), ParseError> {
    let headers_end = find_headers_end(buf).ok_or(ParseError::Incomplete)?;
    let header_bytes = &buf[..headers_end];
    let body_start = headers_end + HEADER_TERMINATOR.len();

    let headers_str = std::str::from_utf8(header_bytes).map_err(|_| ParseError::InvalidRequest)?;

    let mut lines = headers_str.split("\r\n");

    // Request line
    let request_line = lines.next().ok_or(ParseError::InvalidRequest)?;
    let mut parts = request_line.split_whitespace();

    let method_str = parts.next().ok_or(ParseError::InvalidRequest)?;
    let path = parts.next().ok_or(ParseError::InvalidRequest)?;
    let version = parts.next().unwrap_or("HTTP/1.0");

    let method = Method::from_token(method_str);

    let headers = lines
        .filter(|line| !line.is_empty())
        .map(str::to_string)
        .collect();

    let (body, consumed) = if method == Method::POST {
        (Some(Bytes::copy_from_slice(&buf[body_start..])), buf.len())
    } else {
        (None, body_start)
    };

    let request = Request {
        method,
        path: path.to_string(),
        version: version.to_string(),
        headers,
        body,
    };

    Ok((request, consumed))
}

/// Offset of the first CRLFCRLF in `buf`, if any.
pub fn find_headers_end(buf: &[u8]) -> Option<usize> {
    buf.windows(HEADER_TERMINATOR.len())
        .position(|w| w == HEADER_TERMINATOR)
}
