//! Typed clients for sibling components.
//!
//! Every operation is a JSON `POST` to `{base}/api/{component}/{operation}`.
//! Sibling components trust each other at the network level, so requests
//! are not signed. Clients are cheap to clone and share one connection pool.

pub mod appservice;
pub mod federation_sender;
pub mod roomserver;
pub mod typing;

pub use appservice::AppServiceQueryApi;
pub use federation_sender::FederationSenderQueryApi;
pub use roomserver::{RoomserverAliasApi, RoomserverClients, RoomserverInputApi, RoomserverQueryApi};
pub use typing::TypingServerInputApi;

use plinth_runtime::metrics::InternalApiMetrics;
use serde::Serialize;
use serde::de::DeserializeOwned;
use std::time::Instant;
use thiserror::Error;

/// Errors from calls to sibling components.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ClientError {
    /// The request could not be sent or no response arrived
    #[error("Request to {url} failed: {reason}")]
    Request {
        /// Target URL
        url: String,
        /// Transport error
        reason: String,
    },

    /// The component answered with a non-success status
    #[error("{url} returned {status}: {body}")]
    Status {
        /// Target URL
        url: String,
        /// HTTP status code
        status: u16,
        /// Response body
        body: String,
    },

    /// The response body was not the expected JSON
    #[error("Invalid response from {url}: {reason}")]
    Decode {
        /// Target URL
        url: String,
        /// Parser message
        reason: String,
    },
}

/// Untyped client for one sibling component.
#[derive(Clone, Debug)]
pub struct InternalClient {
    http: reqwest::Client,
    base_url: String,
    component: &'static str,
}

impl InternalClient {
    /// Client for `component` reachable at `base_url`.
    #[must_use]
    pub fn new(
        http: reqwest::Client,
        base_url: impl Into<String>,
        component: &'static str,
    ) -> Self {
        Self {
            http,
            base_url: base_url.into().trim_end_matches('/').to_string(),
            component,
        }
    }

    /// Base URL of the component.
    #[must_use]
    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    /// Component path segment.
    #[must_use]
    pub const fn component(&self) -> &'static str {
        self.component
    }

    /// URL of an operation.
    #[must_use]
    pub fn operation_url(&self, operation: &str) -> String {
        format!("{}/api/{}/{operation}", self.base_url, self.component)
    }

    /// Call an operation.
    ///
    /// # Errors
    ///
    /// Returns [`ClientError`] on transport failure, a non-2xx status or an
    /// undecodable body.
    pub async fn call<Req, Resp>(&self, operation: &str, request: &Req) -> Result<Resp, ClientError>
    where
        Req: Serialize + Sync,
        Resp: DeserializeOwned,
    {
        let started = Instant::now();
        let result = self.call_inner(operation, request).await;
        InternalApiMetrics::record_request(self.component, started.elapsed(), result.is_ok());

        if let Err(e) = &result {
            tracing::debug!(
                component = self.component,
                operation,
                error = %e,
                "Internal API call failed"
            );
        }
        result
    }

    async fn call_inner<Req, Resp>(
        &self,
        operation: &str,
        request: &Req,
    ) -> Result<Resp, ClientError>
    where
        Req: Serialize + Sync,
        Resp: DeserializeOwned,
    {
        let url = self.operation_url(operation);
        let response = self
            .http
            .post(&url)
            .json(request)
            .send()
            .await
            .map_err(|e| ClientError::Request {
                url: url.clone(),
                reason: e.to_string(),
            })?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(ClientError::Status {
                url,
                status: status.as_u16(),
                body,
            });
        }

        response.json::<Resp>().await.map_err(|e| ClientError::Decode {
            url,
            reason: e.to_string(),
        })
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use serde::Deserialize;
    use serde_json::json;
    use wiremock::matchers::{body_json, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    #[derive(Serialize)]
    struct Ping {
        n: u32,
    }

    #[derive(Deserialize, Debug, PartialEq)]
    struct Pong {
        n: u32,
    }

    #[test]
    fn operation_urls_are_built_from_the_base() {
        let client = InternalClient::new(
            reqwest::Client::new(),
            "http://localhost:7770/",
            "roomserver",
        );
        assert_eq!(
            client.operation_url("query_events_by_id"),
            "http://localhost:7770/api/roomserver/query_events_by_id"
        );
    }

    #[tokio::test]
    async fn posts_json_and_decodes_the_reply() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/api/test/ping"))
            .and(body_json(json!({"n": 4})))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({"n": 5})))
            .expect(1)
            .mount(&server)
            .await;

        let client = InternalClient::new(reqwest::Client::new(), server.uri(), "test");
        let pong: Pong = client.call("ping", &Ping { n: 4 }).await.unwrap();
        assert_eq!(pong, Pong { n: 5 });
    }

    #[tokio::test]
    async fn error_status_is_reported_with_body() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(500).set_body_string("boom"))
            .mount(&server)
            .await;

        let client = InternalClient::new(reqwest::Client::new(), server.uri(), "test");
        let err = client.call::<_, Pong>("ping", &Ping { n: 1 }).await.unwrap_err();
        assert!(matches!(err, ClientError::Status { status: 500, ref body, .. } if body == "boom"));
    }

    #[tokio::test]
    async fn garbage_body_is_a_decode_error() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(200).set_body_string("not json"))
            .mount(&server)
            .await;

        let client = InternalClient::new(reqwest::Client::new(), server.uri(), "test");
        let err = client.call::<_, Pong>("ping", &Ping { n: 1 }).await.unwrap_err();
        assert!(matches!(err, ClientError::Decode { .. }));
    }

    #[tokio::test]
    async fn unreachable_component_is_a_request_error() {
        let client = InternalClient::new(reqwest::Client::new(), "http://127.0.0.1:1", "test");
        let err = client.call::<_, Pong>("ping", &Ping { n: 1 }).await.unwrap_err();
        assert!(matches!(err, ClientError::Request { .. }));
    }
}
