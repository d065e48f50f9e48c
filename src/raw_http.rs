//! Raw HTTP Head Codec
//!
//! Wire-level HTTP/1.1 head parsing and formatting, shared by the inbound
//! server (request heads) and the passthrough responder (upstream response
//! heads). Bodies never pass through here; they are copied or streamed by
//! the callers.

use crate::{GatewayError, Result};

/// Find the end of an HTTP header block (offset of the `\r\n\r\n`)
pub fn find_header_end(bytes: &[u8]) -> Option<usize> {
    (0..bytes.len().saturating_sub(3)).find(|&i| &bytes[i..i + 4] == b"\r\n\r\n")
}

/// Parsed request line plus headers, order and casing preserved
#[derive(Debug, Clone)]
pub struct RequestHead {
    pub method: String,
    pub target: String,
    pub version: String,
    pub headers: Vec<(String, String)>,
}

impl RequestHead {
    /// Case-insensitive single-header lookup
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(n, _)| n.eq_ignore_ascii_case(name))
            .map(|(_, v)| v.as_str())
    }

    /// Whether the client allows the connection to be reused after the
    /// response. HTTP/1.0 must opt in; HTTP/1.1 must opt out.
    pub fn keep_alive(&self) -> bool {
        let connection = self
            .header("connection")
            .map(|v| v.to_ascii_lowercase())
            .unwrap_or_default();

        if self.version == "HTTP/1.0" {
            connection.contains("keep-alive")
        } else {
            !connection.contains("close")
        }
    }
}

/// Parse a request head from the bytes of its header section (everything up
/// to, not including, the blank line).
pub fn parse_request_head(bytes: &[u8]) -> Result<RequestHead> {
    let text = std::str::from_utf8(bytes)
        .map_err(|_| GatewayError::HttpError("request head is not valid UTF-8".to_string()))?;

    let mut lines = text.lines();

    let request_line = lines
        .next()
        .filter(|line| !line.is_empty())
        .ok_or_else(|| GatewayError::HttpError("empty request line".to_string()))?;

    let mut parts = request_line.split_whitespace();
    let (method, target, version) = match (parts.next(), parts.next(), parts.next()) {
        (Some(method), Some(target), Some(version)) => (method, target, version),
        _ => {
            return Err(GatewayError::HttpError(format!(
                "malformed request line: {}",
                request_line
            )))
        }
    };

    if !version.starts_with("HTTP/") {
        return Err(GatewayError::HttpError(format!(
            "unsupported protocol version: {}",
            version
        )));
    }

    Ok(RequestHead {
        method: method.to_string(),
        target: target.to_string(),
        version: version.to_string(),
        headers: parse_header_lines(lines),
    })
}

/// Parsed status line plus headers of an upstream response
#[derive(Debug, Clone)]
pub struct ResponseHead {
    pub status: u16,
    pub reason: String,
    pub headers: Vec<(String, String)>,
}

impl ResponseHead {
    /// Case-insensitive single-header lookup
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(n, _)| n.eq_ignore_ascii_case(name))
            .map(|(_, v)| v.as_str())
    }
}

/// Parse an upstream response head from the bytes of its header section
pub fn parse_response_head(bytes: &[u8]) -> Result<ResponseHead> {
    let text = String::from_utf8_lossy(bytes);
    let mut lines = text.lines();

    let status_line = lines
        .next()
        .ok_or_else(|| GatewayError::HttpError("response has no status line".to_string()))?;

    let (status, reason) = parse_status_line(status_line)?;

    Ok(ResponseHead {
        status,
        reason,
        headers: parse_header_lines(lines),
    })
}

/// Split "HTTP/1.1 200 OK" into the status code and the reason phrase (which
/// may legitimately be empty or contain spaces)
pub fn parse_status_line(status_line: &str) -> Result<(u16, String)> {
    let mut parts = status_line.splitn(3, ' ');

    let _version = parts
        .next()
        .ok_or_else(|| GatewayError::HttpError("empty status line".to_string()))?;

    let code = parts
        .next()
        .ok_or_else(|| GatewayError::HttpError(format!("no status code in: {}", status_line)))?
        .trim()
        .parse::<u16>()
        .map_err(|e| GatewayError::HttpError(format!("invalid status code: {}", e)))?;

    if !(100..=599).contains(&code) {
        return Err(GatewayError::HttpError(format!(
            "status code out of range: {}",
            code
        )));
    }

    let reason = parts.next().unwrap_or("").trim().to_string();

    Ok((code, reason))
}

/// Format a complete response head: status line, headers, blank line
pub fn format_head(status: u16, reason: &str, headers: &[(String, String)]) -> Vec<u8> {
    let mut head = Vec::new();

    head.extend_from_slice(format!("HTTP/1.1 {} {}\r\n", status, reason).as_bytes());
    for (name, value) in headers {
        head.extend_from_slice(format!("{}: {}\r\n", name, value).as_bytes());
    }
    head.extend_from_slice(b"\r\n");

    head
}

/// Header lines are `Name: value`; lines without a colon are skipped
fn parse_header_lines<'a>(lines: impl Iterator<Item = &'a str>) -> Vec<(String, String)> {
    let mut headers = Vec::new();

    for line in lines {
        if line.is_empty() {
            continue;
        }
        if let Some((name, value)) = line.split_once(':') {
            headers.push((name.trim().to_string(), value.trim().to_string()));
        }
    }

    headers
}
