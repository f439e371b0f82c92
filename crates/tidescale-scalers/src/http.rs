//! Minimal HTTP/1 JSON client shared by the HTTP-based scalers.
//!
//! Opens one connection per request with `hyper`'s low-level client, the
//! same way the health prober does; plain `http://` only.

use std::time::Duration;

use bytes::Bytes;
use http_body_util::{BodyExt, Empty};
use tracing::debug;

use crate::error::ScalerError;

const USER_AGENT: &str = "tidescale/0.1";

/// Default per-request timeout when a trigger does not set one.
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(5);

/// GET `uri` and decode the response body as JSON.
///
/// Non-2xx responses, malformed bodies and connection failures are all
/// errors; the whole exchange is bounded by `timeout`.
pub async fn get_json(
    uri: &str,
    headers: &[(String, String)],
    timeout: Duration,
) -> Result<serde_json::Value, ScalerError> {
    let parsed: http::Uri = uri
        .parse()
        .map_err(|e| ScalerError::Connection(format!("invalid url {uri}: {e}")))?;

    if parsed.scheme_str() != Some("http") {
        return Err(ScalerError::Connection(format!(
            "unsupported url scheme in {uri} (only http is supported)"
        )));
    }
    let authority = parsed
        .authority()
        .ok_or_else(|| ScalerError::Connection(format!("url {uri} has no host")))?
        .clone();
    let address = format!("{}:{}", authority.host(), authority.port_u16().unwrap_or(80));
    let path = parsed
        .path_and_query()
        .map(|p| p.as_str().to_string())
        .unwrap_or_else(|| "/".to_string());

    let exchange = async {
        let stream = tokio::net::TcpStream::connect(&address)
            .await
            .map_err(|e| ScalerError::Connection(format!("{address}: {e}")))?;

        let io = hyper_util::rt::TokioIo::new(stream);
        let (mut sender, conn) = hyper::client::conn::http1::handshake(io)
            .await
            .map_err(|e| ScalerError::Connection(format!("handshake with {address}: {e}")))?;

        // Drive the connection in the background.
        tokio::spawn(async move {
            let _ = conn.await;
        });

        let mut builder = http::Request::builder()
            .method("GET")
            .uri(path.as_str())
            .header("host", authority.as_str())
            .header("user-agent", USER_AGENT)
            .header("accept", "application/json");
        for (name, value) in headers {
            builder = builder.header(name.as_str(), value.as_str());
        }
        let request = builder
            .body(Empty::<Bytes>::new())
            .map_err(|e| ScalerError::Connection(format!("building request for {uri}: {e}")))?;

        let response = sender
            .send_request(request)
            .await
            .map_err(|e| ScalerError::Connection(format!("request to {uri} failed: {e}")))?;

        let status = response.status();
        let body = response
            .into_body()
            .collect()
            .await
            .map_err(|e| ScalerError::Connection(format!("reading body from {uri}: {e}")))?
            .to_bytes();

        if !status.is_success() {
            debug!(%status, %uri, "scaler endpoint returned non-2xx");
            return Err(ScalerError::Response(format!("{uri} returned {status}")));
        }

        serde_json::from_slice(&body)
            .map_err(|e| ScalerError::Response(format!("invalid json from {uri}: {e}")))
    };

    match tokio::time::timeout(timeout, exchange).await {
        Ok(result) => result,
        Err(_) => {
            debug!(%uri, "scaler request timed out");
            Err(ScalerError::Timeout(timeout))
        }
    }
}

/// Percent-encode a query-string component (RFC 3986 unreserved set kept).
pub fn encode_query_component(raw: &str) -> String {
    let mut out = String::with_capacity(raw.len());
    for byte in raw.bytes() {
        match byte {
            b'A'..=b'Z' | b'a'..=b'z' | b'0'..=b'9' | b'-' | b'_' | b'.' | b'~' => {
                out.push(byte as char)
            }
            _ => out.push_str(&format!("%{byte:02X}")),
        }
    }
    out
}

/// Walk a dotted path (`data.items.0.depth`) through a JSON value.
///
/// Numeric segments index into arrays. Numbers and numeric strings are
/// accepted as leaf values.
pub fn value_at(root: &serde_json::Value, location: &str) -> Result<f64, ScalerError> {
    let mut current = root;
    for segment in location.split('.').filter(|s| !s.is_empty()) {
        let next = match current {
            serde_json::Value::Object(map) => map.get(segment),
            serde_json::Value::Array(items) => {
                segment.parse::<usize>().ok().and_then(|i| items.get(i))
            }
            _ => None,
        };
        current = next.ok_or_else(|| {
            ScalerError::Response(format!("value location `{location}` not found at `{segment}`"))
        })?;
    }

    let value = match current {
        serde_json::Value::Number(n) => n.as_f64(),
        serde_json::Value::String(s) => s.trim().parse::<f64>().ok(),
        _ => None,
    };
    value.ok_or_else(|| ScalerError::Response(format!("value at `{location}` is not numeric")))
}
