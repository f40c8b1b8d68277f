use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{anyhow, bail, Context};
use tokio::io::{AsyncBufReadExt, AsyncReadExt, AsyncWriteExt, BufReader};
use tokio::net::{TcpListener, TcpStream};
use tracing::{debug, info, warn};

use crate::functions::solve::SolverConfig;
use crate::response::{Request, Response};
use crate::{analyze, ExtremaError};

pub const ENDPOINT: &str = "/find_extrema";

const MAX_BODY_BYTES: usize = 64 * 1024;
const MAX_HEADER_LINES: usize = 64;
/// How long a client gets to deliver a complete request.
const READ_TIMEOUT: Duration = Duration::from_secs(10);

/// A parsed HTTP/1.1 request, reduced to what the endpoint needs.
#[derive(Debug, Clone, PartialEq)]
pub struct HttpRequest {
  pub method: String,
  pub path: String,
  pub content_type: Option<String>,
  pub body: Vec<u8>,
}

pub fn run(addr: SocketAddr, config: SolverConfig) -> anyhow::Result<()> {
  tokio::runtime::Runtime::new()?
    .block_on(async { run_impl(addr, config).await })
}

async fn run_impl(
  addr: SocketAddr,
  config: SolverConfig,
) -> anyhow::Result<()> {
  let listener = TcpListener::bind(addr)
    .await
    .with_context(|| format!("cannot listen on {addr}"))?;
  info!(%addr, endpoint = ENDPOINT, "serving");

  let config = Arc::new(config);
  loop {
    let (stream, peer) = listener.accept().await?;
    let config = Arc::clone(&config);
    tokio::spawn(async move {
      if let Err(err) = handle_connection(stream, config).await {
        warn!(%peer, error = %err, "request failed");
      }
    });
  }
}

async fn handle_connection(
  stream: TcpStream,
  config: Arc<SolverConfig>,
) -> anyhow::Result<()> {
  let (read_half, mut write_half) = stream.into_split();
  let reader = BufReader::new(read_half);
  let (status, body) = match read_request_within(reader, READ_TIMEOUT).await {
    Ok(Some(request)) => {
      debug!(method = %request.method, path = %request.path, "request");
      route(request, config).await?
    }
    Ok(None) => {
      warn!(timeout = ?READ_TIMEOUT, "client sent no complete request");
      let reply = Response::Failure {
        error: format!("no complete request within {READ_TIMEOUT:?}"),
      };
      (408, reply.to_json())
    }
    Err(err) => {
      warn!(error = %err, "malformed HTTP request");
      let reply = Response::Failure {
        error: err.to_string(),
      };
      (400, reply.to_json())
    }
  };
  write_response(&mut write_half, status, &body).await
}

/// [`read_request`] bounded by `limit`. `None` means the client was too slow.
async fn read_request_within<R>(
  reader: BufReader<R>,
  limit: Duration,
) -> anyhow::Result<Option<HttpRequest>>
where
  R: tokio::io::AsyncRead + Unpin,
{
  match tokio::time::timeout(limit, read_request(reader)).await {
    Ok(request) => request.map(Some),
    Err(_) => Ok(None),
  }
}

async fn read_request<R>(
  mut reader: BufReader<R>,
) -> anyhow::Result<HttpRequest>
where
  R: tokio::io::AsyncRead + Unpin,
{
  let mut line = String::new();
  reader.read_line(&mut line).await?;
  let mut parts = line.split_whitespace();
  let (method, path) = match (parts.next(), parts.next()) {
    (Some(method), Some(path)) => (method.to_string(), path.to_string()),
    _ => bail!("invalid request line {:?}", line.trim_end()),
  };

  let mut content_length = 0usize;
  let mut content_type = None;
  for _ in 0..MAX_HEADER_LINES {
    line.clear();
    if reader.read_line(&mut line).await? == 0 {
      break;
    }
    let header = line.trim_end();
    if header.is_empty() {
      break;
    }
    if let Some((name, value)) = header.split_once(':') {
      let value = value.trim();
      if name.eq_ignore_ascii_case("content-length") {
        content_length = value
          .parse()
          .map_err(|_| anyhow!("invalid Content-Length {value:?}"))?;
      } else if name.eq_ignore_ascii_case("content-type") {
        content_type = Some(value.to_string());
      }
    }
  }

  if content_length > MAX_BODY_BYTES {
    bail!("request body of {content_length} bytes is too large");
  }
  let mut body = vec![0; content_length];
  reader.read_exact(&mut body).await?;

  // Ignore any query string when routing
  let path = path.split('?').next().unwrap_or_default().to_string();
  Ok(HttpRequest {
    method,
    path,
    content_type,
    body,
  })
}

/// Dispatch one request. The analysis itself runs on the blocking pool.
pub async fn route(
  request: HttpRequest,
  config: Arc<SolverConfig>,
) -> anyhow::Result<(u16, String)> {
  if request.path != ENDPOINT {
    let reply = Response::Failure {
      error: format!("no route for {}", request.path),
    };
    return Ok((404, reply.to_json()));
  }
  if request.method != "POST" {
    let reply = Response::Failure {
      error: format!("{ENDPOINT} expects POST, got {}", request.method),
    };
    return Ok((405, reply.to_json()));
  }

  let decoded = decode_request(request.content_type.as_deref(), &request.body);
  let reply = tokio::task::spawn_blocking(move || match decoded {
    Ok(request) => find_extrema(&request, &config),
    Err(err) => (status_for(&err), Response::failure(&err).to_json()),
  })
  .await?;
  Ok(reply)
}

/// Run the analysis and render the reply with its HTTP status.
pub fn find_extrema(request: &Request, config: &SolverConfig) -> (u16, String) {
  match analyze(request, config) {
    Ok(analysis) => (200, Response::from(&analysis).to_json()),
    Err(err) => (status_for(&err), Response::failure(&err).to_json()),
  }
}

pub fn status_for(err: &ExtremaError) -> u16 {
  if err.is_parse_error() || matches!(err, ExtremaError::InvalidRequest(_)) {
    400
  } else {
    500
  }
}

/// Decode a JSON or form-encoded request body.
pub fn decode_request(
  content_type: Option<&str>,
  body: &[u8],
) -> Result<Request, ExtremaError> {
  let is_json = content_type
    .map(|value| value.to_ascii_lowercase().starts_with("application/json"))
    .unwrap_or(false);
  if is_json {
    return serde_json::from_slice(body)
      .map_err(|err| ExtremaError::InvalidRequest(err.to_string()));
  }

  let text = String::from_utf8_lossy(body);
  let mut function = None;
  let mut domain = None;
  for field in text.split('&').filter(|field| !field.is_empty()) {
    let (name, value) = field.split_once('=').unwrap_or((field, ""));
    match percent_decode(name).as_str() {
      "function" => function = Some(percent_decode(value)),
      "domain" => {
        let raw = percent_decode(value);
        if !raw.trim().is_empty() {
          let bounds = serde_json::from_str::<Vec<[f64; 2]>>(&raw).map_err(
            |err| ExtremaError::InvalidRequest(format!("domain: {err}")),
          )?;
          domain = Some(bounds);
        }
      }
      _ => {}
    }
  }

  let function = function.ok_or_else(|| {
    ExtremaError::InvalidRequest("missing field `function`".into())
  })?;
  Ok(Request { function, domain })
}

/// Decode `application/x-www-form-urlencoded` text.
pub fn percent_decode(text: &str) -> String {
  let bytes = text.as_bytes();
  let mut decoded = Vec::with_capacity(bytes.len());
  let mut i = 0;
  while i < bytes.len() {
    match bytes[i] {
      b'+' => decoded.push(b' '),
      b'%' if i + 2 < bytes.len() => {
        let hex = std::str::from_utf8(&bytes[i + 1..i + 3]).ok();
        match hex.and_then(|hex| u8::from_str_radix(hex, 16).ok()) {
          Some(byte) => {
            decoded.push(byte);
            i += 2;
          }
          None => decoded.push(b'%'),
        }
      }
      byte => decoded.push(byte),
    }
    i += 1;
  }
  String::from_utf8_lossy(&decoded).into_owned()
}

fn reason_phrase(status: u16) -> &'static str {
  match status {
    200 => "OK",
    400 => "Bad Request",
    404 => "Not Found",
    405 => "Method Not Allowed",
    408 => "Request Timeout",
    _ => "Internal Server Error",
  }
}

async fn write_response<W>(
  writer: &mut W,
  status: u16,
  body: &str,
) -> anyhow::Result<()>
where
  W: tokio::io::AsyncWrite + Unpin,
{
  let head = format!(
    "HTTP/1.1 {status} {}\r\n\
     Content-Type: application/json\r\n\
     Content-Length: {}\r\n\
     Connection: close\r\n\r\n",
    reason_phrase(status),
    body.len()
  );
  writer.write_all(head.as_bytes()).await?;
  writer.write_all(body.as_bytes()).await?;
  writer.flush().await?;
  Ok(())
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn form_body_is_decoded() {
    let request =
      decode_request(None, b"function=x%5E2+%2B+y%5E2&domain=").unwrap();
    assert_eq!(request.function, "x^2 + y^2");
    assert_eq!(request.domain, None);
  }

  #[test]
  fn form_domain_is_json() {
    let body = b"function=x&domain=%5B%5B-1%2C2%5D%5D";
    let request = decode_request(None, body).unwrap();
    assert_eq!(request.domain, Some(vec![[-1.0, 2.0]]));
  }

  #[test]
  fn json_body_is_decoded() {
    let body = br#"{"function": "x*y", "domain": [[-1, 1], [-2, 2]]}"#;
    let request =
      decode_request(Some("application/json; charset=utf-8"), body).unwrap();
    assert_eq!(request.function, "x*y");
    assert_eq!(request.domain, Some(vec![[-1.0, 1.0], [-2.0, 2.0]]));
  }

  #[test]
  fn missing_function_field() {
    let err = decode_request(None, b"domain=").unwrap_err();
    assert!(matches!(err, ExtremaError::InvalidRequest(_)));
    assert_eq!(status_for(&err), 400);
  }

  #[test]
  fn stray_percent_signs_survive() {
    assert_eq!(percent_decode("50%"), "50%");
    assert_eq!(percent_decode("%zz"), "%zz");
    assert_eq!(percent_decode("a%20b"), "a b");
  }

  #[tokio::test]
  async fn unknown_route_is_404() {
    let request = HttpRequest {
      method: "GET".into(),
      path: "/".into(),
      content_type: None,
      body: Vec::new(),
    };
    let (status, body) =
      route(request, Arc::new(SolverConfig::default())).await.unwrap();
    assert_eq!(status, 404);
    assert!(body.starts_with("{\"error\""));
  }

  #[tokio::test]
  async fn endpoint_answers_post() {
    let request = HttpRequest {
      method: "POST".into(),
      path: ENDPOINT.into(),
      content_type: Some("application/x-www-form-urlencoded".into()),
      body: b"function=x%5E2".to_vec(),
    };
    let (status, body) =
      route(request, Arc::new(SolverConfig::default())).await.unwrap();
    assert_eq!(status, 200);
    let json: serde_json::Value = serde_json::from_str(&body).unwrap();
    assert_eq!(json["classifications"][0], "LocalMin");
  }

  #[tokio::test]
  async fn raw_request_is_parsed() {
    let raw = b"POST /find_extrema?x=1 HTTP/1.1\r\n\
      Host: localhost\r\n\
      content-length: 10\r\n\
      Content-Type: application/x-www-form-urlencoded\r\n\r\n\
      function=x";
    let request = read_request(BufReader::new(&raw[..])).await.unwrap();
    assert_eq!(request.method, "POST");
    assert_eq!(request.path, ENDPOINT);
    assert_eq!(request.body, b"function=x");
  }

  #[tokio::test]
  async fn silent_client_times_out() {
    // Holding the other end open keeps the reader waiting instead of at EOF
    let (_client, server) = tokio::io::duplex(64);
    let outcome =
      read_request_within(BufReader::new(server), Duration::from_millis(50))
        .await
        .unwrap();
    assert!(outcome.is_none());
  }

  #[tokio::test]
  async fn complete_request_beats_the_timeout() {
    let raw = b"GET /find_extrema HTTP/1.1\r\n\r\n";
    let outcome =
      read_request_within(BufReader::new(&raw[..]), Duration::from_secs(5))
        .await
        .unwrap();
    let method = outcome.map(|request| request.method);
    assert_eq!(method.as_deref(), Some("GET"));
  }

  #[test]
  fn timeout_has_a_reason_phrase() {
    assert_eq!(reason_phrase(408), "Request Timeout");
  }
}
