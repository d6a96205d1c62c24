//! RequestForwarder — relay one HTTP request into a live workload.
//!
//! The target address is `service_host(id, service):port`. Connecting,
//! sending, and reading the whole response share one timeout; running out
//! of it, or failing to connect at all, is `ContainerUnreachable`.

use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use envgrid_core::{EnvgridError, EnvgridResult, normalize_id};
use envgrid_runtime::WorkloadRuntime;
use http::{HeaderMap, Method, Request, StatusCode, header};
use http_body_util::{BodyExt, Full};
use hyper::client::conn::http1;
use hyper_util::rt::TokioIo;
use tokio::net::TcpStream;
use tracing::{debug, warn};

/// Inbound headers that describe the inbound connection, not the request.
const HOP_BY_HOP: [header::HeaderName; 4] = [
    header::HOST,
    header::CONNECTION,
    header::CONTENT_LENGTH,
    header::TRANSFER_ENCODING,
];

/// A request to relay.
#[derive(Debug, Clone)]
pub struct ForwardRequest {
    pub method: Method,
    /// Origin-form target, e.g. `/health?verbose=1`.
    pub path_and_query: String,
    pub headers: HeaderMap,
    pub body: Bytes,
}

/// The workload's response, as received.
#[derive(Debug, Clone)]
pub struct ForwardResponse {
    pub status: StatusCode,
    pub headers: HeaderMap,
    pub body: Bytes,
}

pub struct RequestForwarder<R: WorkloadRuntime> {
    runtime: Arc<R>,
    timeout: Duration,
    default_port: u16,
}

impl<R: WorkloadRuntime> RequestForwarder<R> {
    pub fn new(runtime: Arc<R>, timeout: Duration, default_port: u16) -> Self {
        Self {
            runtime,
            timeout,
            default_port,
        }
    }

    pub fn address(&self, id: &str, service: &str, port: Option<u16>) -> String {
        format!(
            "{}:{}",
            self.runtime.service_host(id, service),
            port.unwrap_or(self.default_port)
        )
    }

    pub async fn forward(
        &self,
        id: &str,
        service: &str,
        port: Option<u16>,
        request: ForwardRequest,
    ) -> EnvgridResult<ForwardResponse> {
        let id = normalize_id(id)?;
        let address = self.address(&id, service, port);
        debug!(deployment_id = %id, %service, %address, method = %request.method, path = %request.path_and_query, "forwarding request");
        forward_to(&address, request, self.timeout).await
    }
}

fn unreachable(address: &str, message: impl Into<String>) -> EnvgridError {
    EnvgridError::ContainerUnreachable {
        address: address.to_string(),
        message: message.into(),
    }
}

/// Send `request` to `address` (`host:port`) over HTTP/1.1.
pub async fn forward_to(
    address: &str,
    request: ForwardRequest,
    timeout: Duration,
) -> EnvgridResult<ForwardResponse> {
    let path = if request.path_and_query.starts_with('/') {
        request.path_and_query
    } else {
        format!("/{}", request.path_and_query)
    };

    let mut builder = Request::builder().method(request.method).uri(path.as_str());
    for (name, value) in request.headers.iter() {
        if !HOP_BY_HOP.contains(name) {
            builder = builder.header(name, value);
        }
    }
    let outbound = builder
        .header(header::HOST, address)
        .body(Full::new(request.body))
        .map_err(|e| unreachable(address, format!("invalid request: {e}")))?;

    let exchange = async {
        let stream = TcpStream::connect(address)
            .await
            .map_err(|e| unreachable(address, e.to_string()))?;
        let (mut sender, conn) = http1::handshake(TokioIo::new(stream))
            .await
            .map_err(|e| unreachable(address, e.to_string()))?;

        tokio::spawn(async move {
            if let Err(e) = conn.await {
                warn!(error = %e, "forwarded connection error");
            }
        });

        let response = sender
            .send_request(outbound)
            .await
            .map_err(|e| unreachable(address, e.to_string()))?;
        let status = response.status();
        let headers = response.headers().clone();
        let body = response
            .into_body()
            .collect()
            .await
            .map_err(|e| unreachable(address, e.to_string()))?
            .to_bytes();
        Ok(ForwardResponse {
            status,
            headers,
            body,
        })
    };

    match tokio::time::timeout(timeout, exchange).await {
        Ok(result) => result,
        Err(_) => {
            debug!(%address, timeout_ms = timeout.as_millis() as u64, "forwarded request timed out");
            Err(unreachable(
                address,
                format!("no response within {}ms", timeout.as_millis()),
            ))
        }
    }
}
