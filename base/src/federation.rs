//! Outbound federation client.
//!
//! Requests are signed the same way on both transports: the canonical JSON of
//! `{method, uri, origin, destination, content}` is signed with the server key
//! and sent in an `X-Matrix` `Authorization` header. Conventional servers are
//! reached over HTTPS by server name; overlay servers are reached over the
//! `/matrix` tunnel by peer ID.

use plinth_core::SigningKeyMaterial;
use plinth_overlay::{OverlayError, OverlayHandle, OverlayRequest, PeerId};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value, json};
use std::fmt;
use std::sync::Arc;
use thiserror::Error;

/// Errors from outbound federation requests.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum FederationError {
    /// The destination cannot be addressed on this transport
    #[error("Invalid destination '{destination}': {reason}")]
    InvalidDestination {
        /// The destination server name
        destination: String,
        /// Why it is unusable
        reason: String,
    },

    /// The request could not be sent or no response arrived
    #[error("Request to {destination} failed: {reason}")]
    Request {
        /// The destination server name
        destination: String,
        /// Transport error
        reason: String,
    },

    /// The remote server answered with a non-success status
    #[error("{destination} returned {status}: {body}")]
    Status {
        /// The destination server name
        destination: String,
        /// HTTP status code
        status: u16,
        /// Response body
        body: String,
    },

    /// The response body was not JSON
    #[error("Invalid response from {destination}: {reason}")]
    Decode {
        /// The destination server name
        destination: String,
        /// Parser message
        reason: String,
    },
}

/// Which network federation requests travel over.
#[derive(Clone)]
pub enum FederationTransport {
    /// HTTPS to the destination server name
    Https {
        /// Shared connection pool
        http: reqwest::Client,
        /// URL scheme, `https` unless overridden for test deployments
        scheme: &'static str,
    },
    /// The overlay tunnel to the destination peer ID
    Overlay(OverlayHandle),
}

impl FederationTransport {
    /// Short name used in logs and metric labels.
    #[must_use]
    pub const fn name(&self) -> &'static str {
        match self {
            Self::Https { .. } => "https",
            Self::Overlay(_) => "overlay",
        }
    }
}

impl fmt::Debug for FederationTransport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Https { scheme, .. } => write!(f, "Https({scheme})"),
            Self::Overlay(handle) => write!(f, "Overlay({})", handle.local_peer_id()),
        }
    }
}

/// A federation transaction of persistent and ephemeral events.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Transaction {
    /// Sending server
    pub origin: String,
    /// Send time, milliseconds since the epoch
    pub origin_server_ts: u64,
    /// Persistent events
    #[serde(default)]
    pub pdus: Vec<Value>,
    /// Ephemeral events
    #[serde(default)]
    pub edus: Vec<Value>,
}

/// Signs and sends federation requests as this server.
#[derive(Clone, Debug)]
pub struct FederationClient {
    origin: String,
    key: Arc<SigningKeyMaterial>,
    transport: FederationTransport,
}

impl FederationClient {
    /// Client sending over HTTPS as `origin`.
    ///
    /// Destinations are used verbatim as the URL authority: requests go to
    /// `https://{destination}{path}`. There is no server-name resolution, so
    /// no `.well-known` delegation, no SRV lookup and no default port 8448. A
    /// bare name reaches port 443; give the port explicitly
    /// (`example.org:8448`) when the remote listens elsewhere.
    #[must_use]
    pub fn https(
        origin: impl Into<String>,
        key: SigningKeyMaterial,
        http: reqwest::Client,
    ) -> Self {
        Self {
            origin: origin.into(),
            key: Arc::new(key),
            transport: FederationTransport::Https {
                http,
                scheme: "https",
            },
        }
    }

    /// Client sending over the overlay tunnel as `origin`, the local peer ID.
    #[must_use]
    pub fn overlay(
        origin: impl Into<String>,
        key: SigningKeyMaterial,
        handle: OverlayHandle,
    ) -> Self {
        Self {
            origin: origin.into(),
            key: Arc::new(key),
            transport: FederationTransport::Overlay(handle),
        }
    }

    /// Use plain HTTP instead of HTTPS. No effect on the overlay transport.
    #[must_use]
    pub fn with_plain_http(mut self) -> Self {
        if let FederationTransport::Https { scheme, .. } = &mut self.transport {
            *scheme = "http";
        }
        self
    }

    /// Server name requests are sent as.
    #[must_use]
    pub fn origin(&self) -> &str {
        &self.origin
    }

    /// The active transport.
    #[must_use]
    pub const fn transport(&self) -> &FederationTransport {
        &self.transport
    }

    /// Send a transaction.
    ///
    /// # Errors
    ///
    /// Returns [`FederationError`] if the request fails.
    pub async fn send_transaction(
        &self,
        destination: &str,
        transaction_id: &str,
        transaction: &Transaction,
    ) -> Result<Value, FederationError> {
        let path = format!("/_matrix/federation/v1/send/{}", encode_segment(transaction_id));
        let content = serde_json::to_value(transaction).map_err(|e| FederationError::Request {
            destination: destination.to_string(),
            reason: e.to_string(),
        })?;
        self.request_json("PUT", destination, &path, Some(content)).await
    }

    /// Fetch one event from a remote server.
    ///
    /// # Errors
    ///
    /// Returns [`FederationError`] if the request fails.
    pub async fn get_event(
        &self,
        destination: &str,
        event_id: &str,
    ) -> Result<Value, FederationError> {
        let path = format!("/_matrix/federation/v1/event/{}", encode_segment(event_id));
        self.request_json("GET", destination, &path, None).await
    }

    /// Fetch the published signing keys of a remote server.
    ///
    /// # Errors
    ///
    /// Returns [`FederationError`] if the request fails.
    pub async fn get_server_keys(&self, destination: &str) -> Result<Value, FederationError> {
        self.request_json("GET", destination, "/_matrix/key/v2/server", None)
            .await
    }

    /// Send a signed request and decode the JSON response.
    ///
    /// # Errors
    ///
    /// Returns [`FederationError`] if the destination is unusable, the
    /// request fails, the status is not 2xx or the body is not JSON.
    pub async fn request_json(
        &self,
        method: &str,
        destination: &str,
        path: &str,
        content: Option<Value>,
    ) -> Result<Value, FederationError> {
        let authorization = self.authorization(method, destination, path, content.as_ref());
        let body = match &content {
            Some(content) => serde_json::to_vec(content).map_err(|e| FederationError::Request {
                destination: destination.to_string(),
                reason: e.to_string(),
            })?,
            None => Vec::new(),
        };

        let result = match &self.transport {
            FederationTransport::Https { http, scheme } => {
                send_https(http, scheme, method, destination, path, authorization, body).await
            }
            FederationTransport::Overlay(handle) => {
                send_overlay(handle, method, destination, path, authorization, body).await
            }
        };

        let outcome = if result.is_ok() { "success" } else { "failure" };
        metrics::counter!(
            "federation_requests_total",
            "direction" => "outbound",
            "transport" => self.transport.name(),
            "outcome" => outcome
        )
        .increment(1);
        if let Err(e) = &result {
            tracing::debug!(destination, method, path, error = %e, "Federation request failed");
        }
        result
    }

    /// `X-Matrix` authorization header for a request.
    #[must_use]
    pub fn authorization(
        &self,
        method: &str,
        destination: &str,
        path: &str,
        content: Option<&Value>,
    ) -> String {
        let mut signable = Map::new();
        signable.insert("method".to_string(), json!(method));
        signable.insert("uri".to_string(), json!(path));
        signable.insert("origin".to_string(), json!(self.origin));
        signable.insert("destination".to_string(), json!(destination));
        if let Some(content) = content {
            signable.insert("content".to_string(), content.clone());
        }

        let signature = self.key.sign_base64(&canonical_json(&Value::Object(signable)));
        format!(
            r#"X-Matrix origin="{}",destination="{}",key="{}",sig="{}""#,
            self.origin,
            destination,
            self.key.key_id(),
            signature
        )
    }
}

async fn send_https(
    http: &reqwest::Client,
    scheme: &str,
    method: &str,
    destination: &str,
    path: &str,
    authorization: String,
    body: Vec<u8>,
) -> Result<Value, FederationError> {
    let method =
        reqwest::Method::from_bytes(method.as_bytes()).map_err(|e| FederationError::Request {
            destination: destination.to_string(),
            reason: e.to_string(),
        })?;
    let url = format!("{scheme}://{destination}{path}");

    let mut request = http
        .request(method, &url)
        .header(reqwest::header::AUTHORIZATION, authorization);
    if !body.is_empty() {
        request = request
            .header(reqwest::header::CONTENT_TYPE, "application/json")
            .body(body);
    }

    let response = request.send().await.map_err(|e| FederationError::Request {
        destination: destination.to_string(),
        reason: e.to_string(),
    })?;

    let status = response.status();
    let bytes = response.bytes().await.map_err(|e| FederationError::Request {
        destination: destination.to_string(),
        reason: e.to_string(),
    })?;
    decode_response(destination, status.as_u16(), &bytes)
}

async fn send_overlay(
    handle: &OverlayHandle,
    method: &str,
    destination: &str,
    path: &str,
    authorization: String,
    body: Vec<u8>,
) -> Result<Value, FederationError> {
    let peer = destination
        .parse::<PeerId>()
        .map_err(|e| FederationError::InvalidDestination {
            destination: destination.to_string(),
            reason: e.to_string(),
        })?;

    let mut headers = vec![("Authorization".to_string(), authorization)];
    if !body.is_empty() {
        headers.push(("Content-Type".to_string(), "application/json".to_string()));
    }

    let response = handle
        .send_request(
            peer,
            OverlayRequest {
                method: method.to_string(),
                path: path.to_string(),
                headers,
                body,
            },
        )
        .await
        .map_err(|e: OverlayError| FederationError::Request {
            destination: destination.to_string(),
            reason: e.to_string(),
        })?;

    decode_response(destination, response.status, &response.body)
}

fn decode_response(destination: &str, status: u16, body: &[u8]) -> Result<Value, FederationError> {
    if !(200..300).contains(&status) {
        return Err(FederationError::Status {
            destination: destination.to_string(),
            status,
            body: String::from_utf8_lossy(body).into_owned(),
        });
    }
    if body.is_empty() {
        return Ok(Value::Object(Map::new()));
    }
    serde_json::from_slice(body).map_err(|e| FederationError::Decode {
        destination: destination.to_string(),
        reason: e.to_string(),
    })
}

/// Canonical JSON encoding: sorted keys, no insignificant whitespace.
#[must_use]
pub fn canonical_json(value: &Value) -> Vec<u8> {
    let mut out = Vec::new();
    write_canonical(value, &mut out);
    out
}

fn write_canonical(value: &Value, out: &mut Vec<u8>) {
    match value {
        Value::Object(map) => {
            let mut entries: Vec<_> = map.iter().collect();
            entries.sort_by(|a, b| a.0.cmp(b.0));
            out.push(b'{');
            for (i, (key, value)) in entries.into_iter().enumerate() {
                if i > 0 {
                    out.push(b',');
                }
                out.extend_from_slice(Value::String(key.clone()).to_string().as_bytes());
                out.push(b':');
                write_canonical(value, out);
            }
            out.push(b'}');
        }
        Value::Array(items) => {
            out.push(b'[');
            for (i, item) in items.iter().enumerate() {
                if i > 0 {
                    out.push(b',');
                }
                write_canonical(item, out);
            }
            out.push(b']');
        }
        scalar => out.extend_from_slice(scalar.to_string().as_bytes()),
    }
}

fn encode_segment(segment: &str) -> String {
    let mut encoded = String::with_capacity(segment.len());
    for byte in segment.bytes() {
        if byte.is_ascii_alphanumeric() || matches!(byte, b'-' | b'.' | b'_' | b'~') {
            encoded.push(char::from(byte));
        } else {
            encoded.push_str(&format!("%{byte:02X}"));
        }
    }
    encoded
}
