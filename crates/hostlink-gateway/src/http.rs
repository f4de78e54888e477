//! HTTP command listener: one POSTed envelope in, one JSON result out.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use tokio::io::AsyncWriteExt;
use tokio::net::TcpStream;
use tracing::{debug, warn};

use hostlink_core::config::CorsConfig;
use hostlink_core::protocol::{codes, CommandEnvelope, CommandResult};

use crate::request::{self, RequestError, RequestHead};
use crate::state::GatewayState;

const MAX_HEAD_BYTES: usize = 16 * 1024;

/// A response before CORS and framing headers are applied.
#[derive(Debug, Clone, PartialEq)]
pub struct HttpResponse {
    pub status: u16,
    pub body: Option<String>,
}

impl HttpResponse {
    fn empty(status: u16) -> Self {
        Self { status, body: None }
    }

    fn json(status: u16, result: &CommandResult) -> Self {
        let body = serde_json::to_string(result).unwrap_or_else(|_| {
            r#"{"success":false,"message":"Failed to serialize result","data":null}"#.to_string()
        });
        Self {
            status,
            body: Some(body),
        }
    }

    fn from_result(result: &CommandResult) -> Self {
        Self::json(if result.success { 200 } else { 500 }, result)
    }

    /// Serialize with status line and headers.
    pub fn render(&self, cors: &CorsConfig) -> Vec<u8> {
        let body = self.body.as_deref().unwrap_or("");
        let mut out = format!(
            "HTTP/1.1 {} {}\r\n\
             Access-Control-Allow-Origin: {}\r\n\
             Access-Control-Allow-Methods: POST, OPTIONS\r\n\
             Access-Control-Allow-Headers: Content-Type\r\n",
            self.status,
            reason(self.status),
            cors.allow_origin
        );
        if self.body.is_some() {
            out.push_str("Content-Type: application/json\r\n");
        }
        out.push_str(&format!(
            "Content-Length: {}\r\nConnection: close\r\n\r\n{body}",
            body.len()
        ));
        out.into_bytes()
    }
}

fn reason(status: u16) -> &'static str {
    match status {
        200 => "OK",
        400 => "Bad Request",
        405 => "Method Not Allowed",
        408 => "Request Timeout",
        413 => "Payload Too Large",
        500 => "Internal Server Error",
        _ => "",
    }
}

/// Serve one HTTP request on an accepted connection, then close it.
pub async fn handle_http_connection(
    state: Arc<GatewayState>,
    mut stream: TcpStream,
    peer: SocketAddr,
) {
    let read_timeout = Duration::from_millis(state.config.read_timeout_ms);
    let request = tokio::time::timeout(read_timeout, read_request(&state, &mut stream));
    let response = match request.await {
        Ok(Ok(Some((head, body)))) => route(&state, &head, &body).await,
        Ok(Ok(None)) => return,
        Ok(Err(e)) => {
            debug!(%peer, %e, "Bad HTTP request");
            request_error_response(&e)
        }
        Err(_) => {
            debug!(%peer, "HTTP request timed out");
            HttpResponse::empty(408)
        }
    };

    if let Err(e) = stream.write_all(&response.render(&state.config.cors)).await {
        debug!(%peer, %e, "Failed to write HTTP response");
    }
    let _ = stream.shutdown().await;
}

async fn read_request(
    state: &GatewayState,
    stream: &mut TcpStream,
) -> Result<Option<(RequestHead, Vec<u8>)>, RequestError> {
    let Some((head, leftover)) = request::read_head(stream, MAX_HEAD_BYTES).await? else {
        return Ok(None);
    };
    let body = if head.method == "POST" {
        request::read_body(stream, &head, leftover, state.config.http.max_body_bytes).await?
    } else {
        Vec::new()
    };
    Ok(Some((head, body)))
}

fn request_error_response(e: &RequestError) -> HttpResponse {
    match e {
        RequestError::BodyTooLarge { .. } => HttpResponse::json(
            413,
            &CommandResult::failure(e.to_string(), codes::INVALID_ENVELOPE),
        ),
        _ => HttpResponse::empty(400),
    }
}

/// Decide the response for a fully-read request.
pub async fn route(state: &GatewayState, head: &RequestHead, body: &[u8]) -> HttpResponse {
    match head.method.as_str() {
        "OPTIONS" if state.config.cors.answer_preflight => HttpResponse::empty(200),
        "POST" => match CommandEnvelope::parse(body) {
            Ok(envelope) => {
                debug!(command = envelope.name(), path = %head.path, "HTTP command");
                let result = state.execute(envelope).await;
                HttpResponse::from_result(&result)
            }
            Err(e) => {
                warn!(%e, "Invalid command envelope");
                state.stats.record_command(false);
                HttpResponse::from_result(&CommandResult::failure(
                    format!("Invalid command envelope: {e}"),
                    codes::INVALID_ENVELOPE,
                ))
            }
        },
        method => HttpResponse::json(
            405,
            &CommandResult::failure(
                format!("Method {method} not allowed; send commands with POST"),
                codes::METHOD_NOT_ALLOWED,
            ),
        ),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use hostlink_core::config::GatewayConfig;

    fn head(method: &str) -> RequestHead {
        RequestHead::parse(format!("{method} / HTTP/1.1\r\nHost: x\r\n\r\n").as_bytes()).unwrap()
    }

    fn state(answer_preflight: bool) -> GatewayState {
        let mut config = GatewayConfig::default();
        config.cors.answer_preflight = answer_preflight;
        config.queue.timeout_ms = 10;
        GatewayState::new(config).0
    }

    #[tokio::test]
    async fn test_preflight() {
        let response = route(&state(true), &head("OPTIONS"), b"").await;
        assert_eq!(response, HttpResponse::empty(200));

        let refused = route(&state(false), &head("OPTIONS"), b"").await;
        assert_eq!(refused.status, 405);
    }

    #[tokio::test]
    async fn test_get_not_allowed() {
        let response = route(&state(true), &head("GET"), b"").await;
        assert_eq!(response.status, 405);
        assert!(response.body.unwrap().contains(codes::METHOD_NOT_ALLOWED));
    }

    #[tokio::test]
    async fn test_invalid_envelope_is_500() {
        let state = state(true);
        let response = route(&state, &head("POST"), b"{nope").await;
        assert_eq!(response.status, 500);
        assert!(response.body.unwrap().contains(codes::INVALID_ENVELOPE));
        assert_eq!(state.stats.snapshot().commands_failed, 1);
    }

    #[test]
    fn test_render_headers() {
        let cors = CorsConfig {
            allow_origin: "http://localhost:3000".into(),
            answer_preflight: true,
        };
        let rendered = String::from_utf8(
            HttpResponse::from_result(&CommandResult::ok("fine")).render(&cors),
        )
        .unwrap();
        assert!(rendered.starts_with("HTTP/1.1 200 OK\r\n"));
        assert!(rendered.contains("Access-Control-Allow-Origin: http://localhost:3000\r\n"));
        assert!(rendered.contains("Content-Type: application/json\r\n"));
        let (_, body) = rendered.split_once("\r\n\r\n").unwrap();
        assert!(rendered.contains(&format!("Content-Length: {}\r\n", body.len())));

        let empty = String::from_utf8(HttpResponse::empty(200).render(&cors)).unwrap();
        assert!(empty.contains("Content-Length: 0\r\n"));
        assert!(!empty.lines().any(|line| line.starts_with("Content-Type:")));
        assert!(empty.contains("Access-Control-Allow-Headers: Content-Type\r\n"));
    }
}
