//! Room server clients: aliases, event input and room state queries.

use super::{ClientError, InternalClient};
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Component path segment of the room server.
pub const COMPONENT: &str = "roomserver";

/// A `(type, state_key)` pair selecting one piece of room state.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct StateKeyTuple {
    /// Event type, e.g. `m.room.member`
    pub event_type: String,
    /// State key, e.g. a user ID
    pub state_key: String,
}

impl StateKeyTuple {
    /// Build a tuple.
    #[must_use]
    pub fn new(event_type: impl Into<String>, state_key: impl Into<String>) -> Self {
        Self {
            event_type: event_type.into(),
            state_key: state_key.into(),
        }
    }
}

/// How the room server should treat an input event.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum InputKind {
    /// Not part of the room graph, e.g. an auth event fetched on demand
    Outlier,
    /// Newest event in the room
    New,
    /// Older event filling a gap
    Backfill,
}

/// An event submitted to the room server.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InputRoomEvent {
    /// How to treat the event
    pub kind: InputKind,
    /// The event JSON
    pub event: Value,
    /// Events that authorise it
    #[serde(default)]
    pub auth_event_ids: Vec<String>,
    /// Server to send it as, if it should be federated
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub send_as_server: Option<String>,
}

/// Response of [`RoomserverQueryApi::query_latest_events_and_state`].
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LatestEventsAndState {
    /// Whether the room server knows the room
    pub room_exists: bool,
    /// Forward extremities of the room
    pub latest_events: Vec<String>,
    /// Requested state at the forward extremities
    pub state_events: Vec<Value>,
    /// Depth of the newest event
    pub depth: i64,
}

/// Response of [`RoomserverQueryApi::query_state_after_events`].
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct StateAfterEvents {
    /// Whether the room server knows the room
    pub room_exists: bool,
    /// Whether every previous event is known
    pub prev_events_exist: bool,
    /// Requested state after the previous events
    pub state_events: Vec<Value>,
}

/// Response of [`RoomserverQueryApi::query_membership_for_user`].
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct MembershipForUser {
    /// The user was in the room at some point
    pub has_been_in_room: bool,
    /// The user is in the room now
    pub is_in_room: bool,
    /// Current membership, e.g. `join` or `leave`
    pub membership: Option<String>,
}

#[derive(Debug, Serialize)]
struct SetRoomAliasRequest<'a> {
    user_id: &'a str,
    alias: &'a str,
    room_id: &'a str,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct SetRoomAliasResponse {
    alias_exists: bool,
}

#[derive(Debug, Serialize)]
struct AliasRequest<'a> {
    alias: &'a str,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct RoomIdResponse {
    room_id: String,
}

#[derive(Debug, Serialize)]
struct RoomRequest<'a> {
    room_id: &'a str,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct AliasesResponse {
    aliases: Vec<String>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct CreatorResponse {
    user_id: String,
}

#[derive(Debug, Serialize)]
struct RemoveRoomAliasRequest<'a> {
    user_id: &'a str,
    alias: &'a str,
}

#[derive(Debug, Serialize)]
struct InputRoomEventsRequest<'a> {
    input_room_events: &'a [InputRoomEvent],
}

#[derive(Debug, Default, Deserialize)]
struct EmptyResponse {}

#[derive(Debug, Serialize)]
struct LatestEventsRequest<'a> {
    room_id: &'a str,
    state_to_fetch: &'a [StateKeyTuple],
}

#[derive(Debug, Serialize)]
struct StateAfterEventsRequest<'a> {
    room_id: &'a str,
    prev_event_ids: &'a [String],
    state_to_fetch: &'a [StateKeyTuple],
}

#[derive(Debug, Serialize)]
struct EventsByIdRequest<'a> {
    event_ids: &'a [String],
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct EventsResponse {
    events: Vec<Value>,
}

#[derive(Debug, Serialize)]
struct MembershipRequest<'a> {
    room_id: &'a str,
    user_id: &'a str,
}

fn non_empty(value: String) -> Option<String> {
    if value.is_empty() { None } else { Some(value) }
}

/// Room alias management.
#[derive(Clone, Debug)]
pub struct RoomserverAliasApi {
    client: InternalClient,
}

impl RoomserverAliasApi {
    /// Client for the room server at `base_url`.
    #[must_use]
    pub fn new(http: reqwest::Client, base_url: impl Into<String>) -> Self {
        Self {
            client: InternalClient::new(http, base_url, COMPONENT),
        }
    }

    /// Point `alias` at `room_id` on behalf of `user_id`.
    ///
    /// Returns `true` if the alias was already taken, in which case nothing
    /// changed.
    ///
    /// # Errors
    ///
    /// Returns [`ClientError`] if the call fails.
    pub async fn set_room_alias(
        &self,
        user_id: &str,
        alias: &str,
        room_id: &str,
    ) -> Result<bool, ClientError> {
        let response: SetRoomAliasResponse = self
            .client
            .call(
                "set_room_alias",
                &SetRoomAliasRequest {
                    user_id,
                    alias,
                    room_id,
                },
            )
            .await?;
        Ok(response.alias_exists)
    }

    /// Room an alias points at, if any.
    ///
    /// # Errors
    ///
    /// Returns [`ClientError`] if the call fails.
    pub async fn get_room_id_for_alias(&self, alias: &str) -> Result<Option<String>, ClientError> {
        let response: RoomIdResponse = self
            .client
            .call("get_room_id_for_alias", &AliasRequest { alias })
            .await?;
        Ok(non_empty(response.room_id))
    }

    /// Every alias pointing at a room.
    ///
    /// # Errors
    ///
    /// Returns [`ClientError`] if the call fails.
    pub async fn get_aliases_for_room_id(&self, room_id: &str) -> Result<Vec<String>, ClientError> {
        let response: AliasesResponse = self
            .client
            .call("get_aliases_for_room_id", &RoomRequest { room_id })
            .await?;
        Ok(response.aliases)
    }

    /// User who created an alias, if the alias exists.
    ///
    /// # Errors
    ///
    /// Returns [`ClientError`] if the call fails.
    pub async fn get_creator_id_for_alias(
        &self,
        alias: &str,
    ) -> Result<Option<String>, ClientError> {
        let response: CreatorResponse = self
            .client
            .call("get_creator_id_for_alias", &AliasRequest { alias })
            .await?;
        Ok(non_empty(response.user_id))
    }

    /// Remove an alias on behalf of `user_id`.
    ///
    /// # Errors
    ///
    /// Returns [`ClientError`] if the call fails.
    pub async fn remove_room_alias(&self, user_id: &str, alias: &str) -> Result<(), ClientError> {
        let _: EmptyResponse = self
            .client
            .call("remove_room_alias", &RemoveRoomAliasRequest { user_id, alias })
            .await?;
        Ok(())
    }
}

/// Event input.
#[derive(Clone, Debug)]
pub struct RoomserverInputApi {
    client: InternalClient,
}

impl RoomserverInputApi {
    /// Client for the room server at `base_url`.
    #[must_use]
    pub fn new(http: reqwest::Client, base_url: impl Into<String>) -> Self {
        Self {
            client: InternalClient::new(http, base_url, COMPONENT),
        }
    }

    /// Submit events in order.
    ///
    /// # Errors
    ///
    /// Returns [`ClientError`] if the call fails.
    pub async fn input_room_events(&self, events: &[InputRoomEvent]) -> Result<(), ClientError> {
        let _: EmptyResponse = self
            .client
            .call(
                "input_room_events",
                &InputRoomEventsRequest {
                    input_room_events: events,
                },
            )
            .await?;
        Ok(())
    }
}

/// Room state queries.
#[derive(Clone, Debug)]
pub struct RoomserverQueryApi {
    client: InternalClient,
}

impl RoomserverQueryApi {
    /// Client for the room server at `base_url`.
    #[must_use]
    pub fn new(http: reqwest::Client, base_url: impl Into<String>) -> Self {
        Self {
            client: InternalClient::new(http, base_url, COMPONENT),
        }
    }

    /// Forward extremities of a room and the requested state at them.
    ///
    /// # Errors
    ///
    /// Returns [`ClientError`] if the call fails.
    pub async fn query_latest_events_and_state(
        &self,
        room_id: &str,
        state_to_fetch: &[StateKeyTuple],
    ) -> Result<LatestEventsAndState, ClientError> {
        self.client
            .call(
                "query_latest_events_and_state",
                &LatestEventsRequest {
                    room_id,
                    state_to_fetch,
                },
            )
            .await
    }

    /// The requested state after a set of previous events.
    ///
    /// # Errors
    ///
    /// Returns [`ClientError`] if the call fails.
    pub async fn query_state_after_events(
        &self,
        room_id: &str,
        prev_event_ids: &[String],
        state_to_fetch: &[StateKeyTuple],
    ) -> Result<StateAfterEvents, ClientError> {
        self.client
            .call(
                "query_state_after_events",
                &StateAfterEventsRequest {
                    room_id,
                    prev_event_ids,
                    state_to_fetch,
                },
            )
            .await
    }

    /// Events by ID. Unknown IDs are left out of the result.
    ///
    /// # Errors
    ///
    /// Returns [`ClientError`] if the call fails.
    pub async fn query_events_by_id(
        &self,
        event_ids: &[String],
    ) -> Result<Vec<Value>, ClientError> {
        let response: EventsResponse = self
            .client
            .call("query_events_by_id", &EventsByIdRequest { event_ids })
            .await?;
        Ok(response.events)
    }

    /// Membership of a user in a room.
    ///
    /// # Errors
    ///
    /// Returns [`ClientError`] if the call fails.
    pub async fn query_membership_for_user(
        &self,
        room_id: &str,
        user_id: &str,
    ) -> Result<MembershipForUser, ClientError> {
        self.client
            .call("query_membership_for_user", &MembershipRequest { room_id, user_id })
            .await
    }
}

/// The three room server clients, sharing one connection pool.
#[derive(Clone, Debug)]
pub struct RoomserverClients {
    /// Alias management
    pub alias: RoomserverAliasApi,
    /// Event input
    pub input: RoomserverInputApi,
    /// State queries
    pub query: RoomserverQueryApi,
}

impl RoomserverClients {
    /// All three clients for the room server at `base_url`.
    #[must_use]
    pub fn new(http: &reqwest::Client, base_url: &str) -> Self {
        Self {
            alias: RoomserverAliasApi::new(http.clone(), base_url),
            input: RoomserverInputApi::new(http.clone(), base_url),
            query: RoomserverQueryApi::new(http.clone(), base_url),
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use serde_json::json;
    use wiremock::matchers::{body_json, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    async fn respond(server: &MockServer, operation: &str, body: Value) {
        Mock::given(method("POST"))
            .and(path(format!("/api/roomserver/{operation}")))
            .respond_with(ResponseTemplate::new(200).set_body_json(body))
            .mount(server)
            .await;
    }

    #[tokio::test]
    async fn alias_operations() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/api/roomserver/set_room_alias"))
            .and(body_json(json!({
                "user_id": "@alice:example.org",
                "alias": "#lobby:example.org",
                "room_id": "!abc:example.org"
            })))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({"alias_exists": false})))
            .mount(&server)
            .await;
        respond(&server, "get_room_id_for_alias", json!({"room_id": ""})).await;
        respond(
            &server,
            "get_aliases_for_room_id",
            json!({"aliases": ["#lobby:example.org"]}),
        )
        .await;
        respond(
            &server,
            "get_creator_id_for_alias",
            json!({"user_id": "@alice:example.org"}),
        )
        .await;
        respond(&server, "remove_room_alias", json!({})).await;

        let api = RoomserverAliasApi::new(reqwest::Client::new(), server.uri());
        assert!(
            !api.set_room_alias("@alice:example.org", "#lobby:example.org", "!abc:example.org")
                .await
                .unwrap()
        );
        assert_eq!(api.get_room_id_for_alias("#gone:example.org").await.unwrap(), None);
        assert_eq!(
            api.get_aliases_for_room_id("!abc:example.org").await.unwrap(),
            vec!["#lobby:example.org".to_string()]
        );
        assert_eq!(
            api.get_creator_id_for_alias("#lobby:example.org").await.unwrap().as_deref(),
            Some("@alice:example.org")
        );
        api.remove_room_alias("@alice:example.org", "#lobby:example.org")
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn input_events_are_sent_in_order() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/api/roomserver/input_room_events"))
            .and(body_json(json!({
                "input_room_events": [
                    {"kind": "outlier", "event": {"n": 1}, "auth_event_ids": []},
                    {
                        "kind": "new",
                        "event": {"n": 2},
                        "auth_event_ids": ["$1"],
                        "send_as_server": "example.org"
                    }
                ]
            })))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({})))
            .expect(1)
            .mount(&server)
            .await;

        let api = RoomserverInputApi::new(reqwest::Client::new(), server.uri());
        api.input_room_events(&[
            InputRoomEvent {
                kind: InputKind::Outlier,
                event: json!({"n": 1}),
                auth_event_ids: Vec::new(),
                send_as_server: None,
            },
            InputRoomEvent {
                kind: InputKind::New,
                event: json!({"n": 2}),
                auth_event_ids: vec!["$1".to_string()],
                send_as_server: Some("example.org".to_string()),
            },
        ])
        .await
        .unwrap();
    }

    #[tokio::test]
    async fn state_queries() {
        let server = MockServer::start().await;
        respond(
            &server,
            "query_latest_events_and_state",
            json!({
                "room_exists": true,
                "latest_events": ["$9"],
                "state_events": [{"type": "m.room.create"}],
                "depth": 9
            }),
        )
        .await;
        respond(
            &server,
            "query_state_after_events",
            json!({"room_exists": true, "prev_events_exist": false}),
        )
        .await;
        respond(&server, "query_events_by_id", json!({"events": [{"event_id": "$1"}]})).await;
        respond(
            &server,
            "query_membership_for_user",
            json!({"has_been_in_room": true, "is_in_room": false, "membership": "leave"}),
        )
        .await;

        let clients = RoomserverClients::new(&reqwest::Client::new(), &server.uri());
        let create = [StateKeyTuple::new("m.room.create", "")];

        let latest = clients
            .query
            .query_latest_events_and_state("!abc:example.org", &create)
            .await
            .unwrap();
        assert_eq!(latest.depth, 9);
        assert_eq!(latest.latest_events, vec!["$9".to_string()]);

        let after = clients
            .query
            .query_state_after_events("!abc:example.org", &["$8".to_string()], &create)
            .await
            .unwrap();
        assert!(!after.prev_events_exist);
        assert!(after.state_events.is_empty());

        let events = clients.query.query_events_by_id(&["$1".to_string()]).await.unwrap();
        assert_eq!(events.len(), 1);

        let membership = clients
            .query
            .query_membership_for_user("!abc:example.org", "@bob:example.org")
            .await
            .unwrap();
        assert!(membership.has_been_in_room);
        assert_eq!(membership.membership.as_deref(), Some("leave"));
    }
}
