//! Typing server input.

use super::{ClientError, InternalClient};
use serde::{Deserialize, Serialize};

/// Component path segment of the typing server.
pub const COMPONENT: &str = "typingserver";

/// A typing notification from a local or remote user.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TypingEvent {
    /// User who started or stopped typing
    pub user_id: String,
    /// Room they are typing in
    pub room_id: String,
    /// Started (`true`) or stopped
    pub typing: bool,
    /// How long the notification stays valid, in milliseconds
    pub timeout_ms: u64,
}

/// Request for [`TypingServerInputApi::input_typing_event`].
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InputTypingEventRequest {
    /// The notification
    pub input_typing_event: TypingEvent,
}

#[derive(Debug, Default, Deserialize)]
struct InputTypingEventResponse {}

/// Input accepted by the typing server.
#[derive(Clone, Debug)]
pub struct TypingServerInputApi {
    client: InternalClient,
}

impl TypingServerInputApi {
    /// Client for the typing server at `base_url`.
    #[must_use]
    pub fn new(http: reqwest::Client, base_url: impl Into<String>) -> Self {
        Self {
            client: InternalClient::new(http, base_url, COMPONENT),
        }
    }

    /// Submit a typing notification.
    ///
    /// # Errors
    ///
    /// Returns [`ClientError`] if the call fails.
    pub async fn input_typing_event(&self, event: TypingEvent) -> Result<(), ClientError> {
        let _: InputTypingEventResponse = self
            .client
            .call(
                "input_typing_event",
                &InputTypingEventRequest {
                    input_typing_event: event,
                },
            )
            .await?;
        Ok(())
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use serde_json::json;
    use wiremock::matchers::{body_json, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    #[tokio::test]
    async fn typing_event_is_posted() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/api/typingserver/input_typing_event"))
            .and(body_json(json!({
                "input_typing_event": {
                    "user_id": "@alice:example.org",
                    "room_id": "!room:example.org",
                    "typing": true,
                    "timeout_ms": 30000
                }
            })))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({})))
            .expect(1)
            .mount(&server)
            .await;

        let api = TypingServerInputApi::new(reqwest::Client::new(), server.uri());
        api.input_typing_event(TypingEvent {
            user_id: "@alice:example.org".to_string(),
            room_id: "!room:example.org".to_string(),
            typing: true,
            timeout_ms: 30_000,
        })
        .await
        .unwrap();
    }
}
