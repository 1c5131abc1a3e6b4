use bytes::Bytes;

/// Value of the `Server` response header.
pub const SERVER_NAME: &str = concat!("switchboard/", env!("CARGO_PKG_VERSION"));

const HTTP_VERSION: &str = "HTTP/1.1";

/// HTTP status codes the server answers with.
///
/// - `Ok` (200): Request successful
/// - `BadRequest` (400): Request line could not be parsed
/// - `NotFound` (404): No handler for method and path
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StatusCode {
    /// 200 OK
    Ok,
    /// 400 Bad Request
    BadRequest,
    /// 404 Not Found
    NotFound,
}

impl StatusCode {
    /// Returns the numeric HTTP status code.
    ///
    /// ```
    /// # use switchboard::http::response::StatusCode;
    /// assert_eq!(StatusCode::Ok.as_u16(), 200);
    /// assert_eq!(StatusCode::NotFound.as_u16(), 404);
    /// ```
    pub fn as_u16(&self) -> u16 {
        match self {
            StatusCode::Ok => 200,
            StatusCode::BadRequest => 400,
            StatusCode::NotFound => 404,
        }
    }

    /// Returns the standard HTTP reason phrase for this status code.
    pub fn reason_phrase(&self) -> &'static str {
        match self {
            StatusCode::Ok => "OK",
            StatusCode::BadRequest => "Bad Request",
            StatusCode::NotFound => "Not Found",
        }
    }
}

/// Outbound side of a connection, filled in by handlers.
///
/// Body fragments are kept as separate chunks in queue order and only
/// concatenated when the connection starts sending. The first `queue` call
/// puts the header block in front, so a response carries exactly one header
/// block however many fragments follow it.
#[derive(Debug)]
pub struct Response {
    status: StatusCode,
    headers_queued: bool,
    send_buffer: Vec<Bytes>,
}

impl Default for Response {
    fn default() -> Self {
        Self::new()
    }
}

impl Response {
    pub fn new() -> Self {
        Self {
            status: StatusCode::Ok,
            headers_queued: false,
            send_buffer: Vec::new(),
        }
    }

    pub fn status(&self) -> StatusCode {
        self.status
    }

    /// Sets the status line. Has no effect once something has been queued.
    pub fn set_status(&mut self, status: StatusCode) {
        if self.headers_queued {
            tracing::warn!(
                status = status.as_u16(),
                "status changed after headers were queued, ignoring"
            );
            return;
        }
        self.status = status;
    }

    /// Appends a body fragment, preceded by the header block on first use.
    pub fn queue(&mut self, data: impl Into<Bytes>) {
        if !self.headers_queued {
            self.send_buffer.push(header_block(self.status));
            self.headers_queued = true;
        }
        self.send_buffer.push(data.into());
    }

    /// True while fragments are waiting to be handed to the writer.
    pub fn has_pending(&self) -> bool {
        !self.send_buffer.is_empty()
    }

    /// Number of queued fragments, header block included.
    pub fn pending_chunks(&self) -> usize {
        self.send_buffer.len()
    }

    /// Concatenates every queued fragment into one blob and empties the
    /// buffer.
    pub fn take_pending(&mut self) -> Bytes {
        let chunks = std::mem::take(&mut self.send_buffer);
        if chunks.len() == 1 {
            return chunks.into_iter().next().unwrap_or_default();
        }
        Bytes::from(chunks.concat())
    }
}

/// Status line plus the fixed header set, terminated by the blank line.
pub fn header_block(status: StatusCode) -> Bytes {
    Bytes::from(format!(
        "{} {} {}\r\n\
         Server: {}\r\n\
         Content-Type: text/html; charset=UTF-8\r\n\
         Connection: close\r\n\
         \r\n",
        HTTP_VERSION,
        status.as_u16(),
        status.reason_phrase(),
        SERVER_NAME,
    ))
}
