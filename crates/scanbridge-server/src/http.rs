// SPDX-License-Identifier: MIT
//
// Minimal HTTP/1.1 framing -- just enough parsing to serve the scan
// hand-off API without a full web framework.
//
// Requests are read incrementally: headers up to the blank line, then
// exactly Content-Length body bytes, with a hard cap on total request
// size to bound memory against misbehaving clients.

use serde::Serialize;
use tokio::io::{AsyncRead, AsyncReadExt};

use scanbridge_core::error::{Result, ScanbridgeError};

/// Separator between HTTP headers and body.
const HEADER_TERMINATOR: &[u8] = b"\r\n\r\n";

/// A parsed incoming HTTP request.
#[derive(Debug)]
pub struct HttpRequest {
    pub method: String,
    pub path: String,
    pub body: Vec<u8>,
}

impl HttpRequest {
    /// Deserialize the body as JSON.
    pub fn json<'a, T: serde::Deserialize<'a>>(&'a self) -> Result<T> {
        serde_json::from_slice(&self.body)
            .map_err(|e| ScanbridgeError::InvalidRequest(format!("malformed JSON body: {e}")))
    }
}

/// An outgoing HTTP response.
#[derive(Debug)]
pub struct HttpResponse {
    pub status: u16,
    content_type: &'static str,
    body: Vec<u8>,
}

impl HttpResponse {
    /// JSON response with the given status code.
    pub fn json<T: Serialize>(status: u16, value: &T) -> Self {
        Self {
            status,
            content_type: "application/json",
            // Serialization of our plain response structs cannot fail.
            body: serde_json::to_vec(value).unwrap_or_else(|_| b"{}".to_vec()),
        }
    }

    /// Binary PDF response.
    pub fn pdf(body: Vec<u8>) -> Self {
        Self {
            status: 200,
            content_type: "application/pdf",
            body,
        }
    }

    /// Serialise into wire bytes, headers included.
    pub fn into_bytes(self) -> Vec<u8> {
        let head = format!(
            "HTTP/1.1 {} {}\r\n\
             Content-Type: {}\r\n\
             Content-Length: {}\r\n\
             Connection: close\r\n\
             \r\n",
            self.status,
            reason_phrase(self.status),
            self.content_type,
            self.body.len()
        );

        let mut bytes = head.into_bytes();
        bytes.extend_from_slice(&self.body);
        bytes
    }
}

/// Reason phrase for the status codes this server emits.
fn reason_phrase(status: u16) -> &'static str {
    match status {
        200 => "OK",
        201 => "Created",
        400 => "Bad Request",
        404 => "Not Found",
        405 => "Method Not Allowed",
        413 => "Payload Too Large",
        429 => "Too Many Requests",
        _ => "Internal Server Error",
    }
}

/// Read one HTTP request from the stream.
///
/// Returns `Ok(None)` if the peer closed the connection without sending
/// anything. Oversized requests are rejected before the body is buffered
/// in full.
pub async fn read_request<R>(stream: &mut R, max_bytes: usize) -> Result<Option<HttpRequest>>
where
    R: AsyncRead + Unpin,
{
    let mut buf: Vec<u8> = Vec::with_capacity(8192);
    let mut chunk = [0u8; 4096];

    // Read until the header terminator shows up.
    let header_end = loop {
        if let Some(pos) = find_subsequence(&buf, HEADER_TERMINATOR) {
            break pos;
        }
        if buf.len() > max_bytes {
            return Err(ScanbridgeError::InvalidRequest(format!(
                "request headers exceed {max_bytes} bytes"
            )));
        }

        let n = stream
            .read(&mut chunk)
            .await
            .map_err(|e| ScanbridgeError::Server(format!("read request: {e}")))?;
        if n == 0 {
            if buf.is_empty() {
                return Ok(None);
            }
            return Err(ScanbridgeError::InvalidRequest(
                "connection closed mid-headers".into(),
            ));
        }
        buf.extend_from_slice(&chunk[..n]);
    };

    let (method, path, content_length) = parse_request_head(&buf[..header_end])?;

    let body_start = header_end + HEADER_TERMINATOR.len();
    let content_length = content_length.unwrap_or(0);
    // Content-Length is attacker-controlled; saturate rather than trust
    // the sum not to wrap.
    if content_length.saturating_add(body_start) > max_bytes {
        return Err(ScanbridgeError::InvalidRequest(format!(
            "request body exceeds {max_bytes} bytes"
        )));
    }

    // Read the remainder of the body, if any.
    let mut body = buf.split_off(body_start);
    while body.len() < content_length {
        let n = stream
            .read(&mut chunk)
            .await
            .map_err(|e| ScanbridgeError::Server(format!("read body: {e}")))?;
        if n == 0 {
            return Err(ScanbridgeError::InvalidRequest(
                "connection closed mid-body".into(),
            ));
        }
        body.extend_from_slice(&chunk[..n]);
    }
    body.truncate(content_length);

    Ok(Some(HttpRequest { method, path, body }))
}

/// Parse the request line and headers, returning method, path, and
/// Content-Length.
fn parse_request_head(head: &[u8]) -> Result<(String, String, Option<usize>)> {
    let text = std::str::from_utf8(head)
        .map_err(|_| ScanbridgeError::InvalidRequest("non-UTF-8 request head".into()))?;

    let mut lines = text.lines();
    let request_line = lines
        .next()
        .ok_or_else(|| ScanbridgeError::InvalidRequest("empty request".into()))?;

    let mut parts = request_line.split_whitespace();
    let method = parts
        .next()
        .ok_or_else(|| ScanbridgeError::InvalidRequest("missing method".into()))?
        .to_ascii_uppercase();
    let path = parts
        .next()
        .ok_or_else(|| ScanbridgeError::InvalidRequest("missing request path".into()))?
        .to_string();

    let content_length = lines
        .filter_map(|line| line.split_once(':'))
        .find(|(name, _)| name.eq_ignore_ascii_case("content-length"))
        .and_then(|(_, value)| value.trim().parse::<usize>().ok());

    Ok((method, path, content_length))
}

/// Find the first occurrence of `needle` in `haystack`.
fn find_subsequence(haystack: &[u8], needle: &[u8]) -> Option<usize> {
    haystack
        .windows(needle.len())
        .position(|window| window == needle)
}
