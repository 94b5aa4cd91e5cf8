//! Probes that feed the readiness poller.
//!
//! Two kinds: scheduler CLI output (membership listing) and HTTP GET
//! against a health endpoint. Both map onto [`PollOutcome`]; transport and
//! dispatch failures become `ProbeError` so the poller can tolerate them.

use std::future::Future;
use std::pin::Pin;
use std::time::Duration;

use bytes::Bytes;
use http_body_util::{BodyExt, Empty};
use thiserror::Error;
use tracing::debug;

use devgrid_exec::{CommandOutput, ExecResult};

use crate::poller::PollOutcome;
use crate::status::members_ready;

/// Status and body of an HTTP response.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HttpResponse {
    pub status: u16,
    pub body: String,
}

impl HttpResponse {
    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum HttpProbeError {
    #[error("invalid probe url {0:?}")]
    InvalidUrl(String),

    #[error("connection failed: {0}")]
    Connect(String),

    #[error("request failed: {0}")]
    Request(String),

    #[error("no response within {0:?}")]
    TimedOut(Duration),
}

/// Boxed future returned by [`HttpProber::get`].
pub type HttpProbeFuture<'a> =
    Pin<Box<dyn Future<Output = Result<HttpResponse, HttpProbeError>> + Send + 'a>>;

/// Performs a single HTTP GET. Injected for testability.
pub trait HttpProber: Send + Sync {
    fn get<'a>(&'a self, url: &'a str, timeout: Duration) -> HttpProbeFuture<'a>;
}

/// [`HttpProber`] over a hyper HTTP/1 client connection. Plain `http://` only.
#[derive(Debug, Clone, Copy, Default)]
pub struct HyperProber;

impl HttpProber for HyperProber {
    fn get<'a>(&'a self, url: &'a str, timeout: Duration) -> HttpProbeFuture<'a> {
        Box::pin(async move {
            tokio::time::timeout(timeout, fetch(url))
                .await
                .map_err(|_| HttpProbeError::TimedOut(timeout))?
        })
    }
}

async fn fetch(url: &str) -> Result<HttpResponse, HttpProbeError> {
    let uri: http::Uri = url
        .parse()
        .map_err(|_| HttpProbeError::InvalidUrl(url.to_string()))?;
    if uri.scheme_str() != Some("http") {
        return Err(HttpProbeError::InvalidUrl(url.to_string()));
    }
    let host = uri
        .host()
        .ok_or_else(|| HttpProbeError::InvalidUrl(url.to_string()))?;
    let port = uri.port_u16().unwrap_or(80);
    let authority = uri.authority().map(|a| a.as_str()).unwrap_or(host);
    let path = uri.path_and_query().map(|p| p.as_str()).unwrap_or("/");

    let stream = tokio::net::TcpStream::connect((host, port))
        .await
        .map_err(|e| HttpProbeError::Connect(e.to_string()))?;

    let io = hyper_util::rt::TokioIo::new(stream);
    let (mut sender, conn) = hyper::client::conn::http1::handshake(io)
        .await
        .map_err(|e| HttpProbeError::Connect(e.to_string()))?;

    // Drive the connection in the background.
    tokio::spawn(async move {
        let _ = conn.await;
    });

    let req = http::Request::builder()
        .method(http::Method::GET)
        .uri(path)
        .header(http::header::HOST, authority)
        .header(http::header::USER_AGENT, "devgrid/0.1")
        .body(Empty::<Bytes>::new())
        .map_err(|e| HttpProbeError::Request(e.to_string()))?;

    let resp = sender
        .send_request(req)
        .await
        .map_err(|e| HttpProbeError::Request(e.to_string()))?;
    let status = resp.status().as_u16();
    let body = resp
        .into_body()
        .collect()
        .await
        .map_err(|e| HttpProbeError::Request(e.to_string()))?
        .to_bytes();

    Ok(HttpResponse {
        status,
        body: String::from_utf8_lossy(&body).into_owned(),
    })
}

/// Classify an HTTP health response: ready iff 2xx and the body contains
/// `expect_body`. Non-2xx and transport errors are retryable probe errors.
pub fn http_outcome(result: Result<HttpResponse, HttpProbeError>, expect_body: &str) -> PollOutcome {
    match result {
        Ok(resp) if !resp.is_success() => {
            PollOutcome::ProbeError(format!("health endpoint returned {}", resp.status))
        }
        Ok(resp) if resp.body.contains(expect_body) => PollOutcome::Ready,
        Ok(resp) => {
            debug!(status = resp.status, "health body does not report ready");
            PollOutcome::Pending
        }
        Err(e) => PollOutcome::ProbeError(e.to_string()),
    }
}

/// Classify a membership listing: ready iff the command succeeded and its
/// stdout contains `ready_token`.
pub fn membership_outcome(result: ExecResult<CommandOutput>, ready_token: &str) -> PollOutcome {
    match result {
        Ok(output) if !output.success() => PollOutcome::ProbeError(format!(
            "exit code {}: {}",
            output.code,
            output.stderr.trim()
        )),
        Ok(output) if members_ready(&output.stdout, ready_token) => PollOutcome::Ready,
        Ok(_) => PollOutcome::Pending,
        Err(e) => PollOutcome::ProbeError(e.to_string()),
    }
}
