//! Federation sender queries.

use super::{ClientError, InternalClient};
use serde::{Deserialize, Serialize};

/// Component path segment of the federation sender.
pub const COMPONENT: &str = "federationsender";

/// A remote server with at least one joined member in a room.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct JoinedHost {
    /// Membership event that put the host in the room
    pub member_event_id: String,
    /// The host
    pub server_name: String,
}

#[derive(Debug, Serialize)]
struct RoomRequest<'a> {
    room_id: &'a str,
}

#[derive(Debug, Default, Deserialize)]
struct JoinedHostsResponse {
    #[serde(default)]
    joined_hosts: Vec<JoinedHost>,
}

#[derive(Debug, Default, Deserialize)]
struct ServerNamesResponse {
    #[serde(default)]
    server_names: Vec<String>,
}

/// Queries answered by the federation sender.
#[derive(Clone, Debug)]
pub struct FederationSenderQueryApi {
    client: InternalClient,
}

impl FederationSenderQueryApi {
    /// Client for the federation sender at `base_url`.
    #[must_use]
    pub fn new(http: reqwest::Client, base_url: impl Into<String>) -> Self {
        Self {
            client: InternalClient::new(http, base_url, COMPONENT),
        }
    }

    /// Remote hosts joined to `room_id`, with the membership event of each.
    ///
    /// # Errors
    ///
    /// Returns [`ClientError`] if the call fails.
    pub async fn query_joined_hosts_in_room(
        &self,
        room_id: &str,
    ) -> Result<Vec<JoinedHost>, ClientError> {
        let response: JoinedHostsResponse = self
            .client
            .call("query_joined_hosts_in_room", &RoomRequest { room_id })
            .await?;
        Ok(response.joined_hosts)
    }

    /// Names of the remote hosts joined to `room_id`.
    ///
    /// # Errors
    ///
    /// Returns [`ClientError`] if the call fails.
    pub async fn query_joined_host_server_names_in_room(
        &self,
        room_id: &str,
    ) -> Result<Vec<String>, ClientError> {
        let response: ServerNamesResponse = self
            .client
            .call("query_joined_host_server_names_in_room", &RoomRequest { room_id })
            .await?;
        Ok(response.server_names)
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
    async fn joined_hosts_are_decoded() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/api/federationsender/query_joined_hosts_in_room"))
            .and(body_json(json!({"room_id": "!r:example.org"})))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "joined_hosts": [
                    {"member_event_id": "$a", "server_name": "one.example"},
                    {"member_event_id": "$b", "server_name": "two.example"}
                ]
            })))
            .mount(&server)
            .await;

        let api = FederationSenderQueryApi::new(reqwest::Client::new(), server.uri());
        let hosts = api.query_joined_hosts_in_room("!r:example.org").await.unwrap();
        assert_eq!(hosts.len(), 2);
        assert_eq!(hosts[1].server_name, "two.example");
    }

    #[tokio::test]
    async fn missing_server_names_is_empty() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/api/federationsender/query_joined_host_server_names_in_room"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({})))
            .mount(&server)
            .await;

        let api = FederationSenderQueryApi::new(reqwest::Client::new(), server.uri());
        let names = api
            .query_joined_host_server_names_in_room("!r:example.org")
            .await
            .unwrap();
        assert!(names.is_empty());
    }
}
