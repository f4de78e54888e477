//! Minimal HTTP/1.1 request-head reader shared by both listeners.

use thiserror::Error;
use tokio::io::{AsyncRead, AsyncReadExt};

const HEAD_TERMINATOR: &[u8] = b"\r\n\r\n";

#[derive(Debug, Error)]
pub enum RequestError {
    #[error("socket read failed: {0}")]
    Io(#[from] std::io::Error),

    #[error("request head exceeds {0} bytes")]
    HeadTooLarge(usize),

    #[error("connection closed mid-request")]
    Incomplete,

    #[error("malformed request head")]
    Malformed,

    #[error("request body of {size} bytes exceeds the {limit} byte limit")]
    BodyTooLarge { size: usize, limit: usize },
}

/// Parsed request line and headers.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RequestHead {
    pub method: String,
    pub path: String,
    headers: Vec<(String, String)>,
}

impl RequestHead {
    pub fn parse(raw: &[u8]) -> Result<Self, RequestError> {
        let text = std::str::from_utf8(raw).map_err(|_| RequestError::Malformed)?;
        let mut lines = text.split("\r\n");

        let request_line = lines.next().ok_or(RequestError::Malformed)?;
        let mut parts = request_line.split_whitespace();
        let method = parts.next().ok_or(RequestError::Malformed)?;
        let path = parts.next().ok_or(RequestError::Malformed)?;
        let version = parts.next().ok_or(RequestError::Malformed)?;
        if !version.starts_with("HTTP/") {
            return Err(RequestError::Malformed);
        }

        let headers = lines
            .take_while(|line| !line.is_empty())
            .filter_map(|line| {
                let (name, value) = line.split_once(':')?;
                Some((name.trim().to_ascii_lowercase(), value.trim().to_string()))
            })
            .collect();

        Ok(Self {
            method: method.to_ascii_uppercase(),
            path: path.to_string(),
            headers,
        })
    }

    /// Case-insensitive header lookup. Returns the first match.
    pub fn header(&self, name: &str) -> Option<&str> {
        let name = name.to_ascii_lowercase();
        self.headers
            .iter()
            .find(|(k, _)| *k == name)
            .map(|(_, v)| v.as_str())
    }

    /// Whether a comma-separated header contains `token`, ignoring case.
    pub fn has_token(&self, name: &str, token: &str) -> bool {
        self.header(name).is_some_and(|value| {
            value
                .split(',')
                .any(|part| part.trim().eq_ignore_ascii_case(token))
        })
    }

    pub fn content_length(&self) -> Result<usize, RequestError> {
        match self.header("content-length") {
            None => Ok(0),
            Some(raw) => raw.parse().map_err(|_| RequestError::Malformed),
        }
    }
}

/// Read up to the end of the request head.
///
/// Returns the parsed head plus any bytes already read past it. `Ok(None)`
/// means the peer closed the connection without sending anything.
pub async fn read_head<R>(
    reader: &mut R,
    limit: usize,
) -> Result<Option<(RequestHead, Vec<u8>)>, RequestError>
where
    R: AsyncRead + Unpin,
{
    let mut buf = Vec::with_capacity(1024);
    let mut chunk = [0u8; 1024];

    loop {
        let n = reader.read(&mut chunk).await?;
        if n == 0 {
            if buf.is_empty() {
                return Ok(None);
            }
            return Err(RequestError::Incomplete);
        }

        // Only rescan the tail that could contain a new terminator.
        let scan_from = buf.len().saturating_sub(HEAD_TERMINATOR.len() - 1);
        buf.extend_from_slice(&chunk[..n]);

        if let Some(pos) = find(&buf[scan_from..], HEAD_TERMINATOR) {
            let end = scan_from + pos + HEAD_TERMINATOR.len();
            let head = RequestHead::parse(&buf[..end])?;
            let rest = buf.split_off(end);
            return Ok(Some((head, rest)));
        }

        if buf.len() > limit {
            return Err(RequestError::HeadTooLarge(limit));
        }
    }
}

/// Read a `Content-Length` body, starting with bytes left over from the head.
pub async fn read_body<R>(
    reader: &mut R,
    head: &RequestHead,
    mut leftover: Vec<u8>,
    limit: usize,
) -> Result<Vec<u8>, RequestError>
where
    R: AsyncRead + Unpin,
{
    let size = head.content_length()?;
    if size > limit {
        return Err(RequestError::BodyTooLarge { size, limit });
    }

    leftover.truncate(size);
    let have = leftover.len();
    leftover.resize(size, 0);
    reader
        .read_exact(&mut leftover[have..])
        .await
        .map_err(|e| match e.kind() {
            std::io::ErrorKind::UnexpectedEof => RequestError::Incomplete,
            _ => RequestError::Io(e),
        })?;
    Ok(leftover)
}

fn find(haystack: &[u8], needle: &[u8]) -> Option<usize> {
    haystack.windows(needle.len()).position(|w| w == needle)
}
