//! Application service gateway queries.

use super::{ClientError, InternalClient};
use serde::{Deserialize, Serialize};

/// Component path segment of the application service gateway.
pub const COMPONENT: &str = "appservice";

/// Request for [`AppServiceQueryApi::room_alias_exists`].
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RoomAliasExistsRequest {
    /// Alias to look up, e.g. `#irc_foo:example.org`
    pub alias: String,
}

/// Response of [`AppServiceQueryApi::room_alias_exists`].
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RoomAliasExistsResponse {
    /// An application service created or claimed the alias
    pub alias_exists: bool,
}

/// Request for [`AppServiceQueryApi::user_id_exists`].
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UserIdExistsRequest {
    /// Fully qualified user ID
    pub user_id: String,
}

/// Response of [`AppServiceQueryApi::user_id_exists`].
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct UserIdExistsResponse {
    /// An application service created or claimed the user
    pub user_id_exists: bool,
}

/// Queries answered by the application service gateway.
#[derive(Clone, Debug)]
pub struct AppServiceQueryApi {
    client: InternalClient,
}

impl AppServiceQueryApi {
    /// Client for the gateway at `base_url`.
    #[must_use]
    pub fn new(http: reqwest::Client, base_url: impl Into<String>) -> Self {
        Self {
            client: InternalClient::new(http, base_url, COMPONENT),
        }
    }

    /// Ask the application services whether they own `alias`.
    ///
    /// # Errors
    ///
    /// Returns [`ClientError`] if the call fails.
    pub async fn room_alias_exists(&self, alias: &str) -> Result<bool, ClientError> {
        let response: RoomAliasExistsResponse = self
            .client
            .call(
                "room_alias_exists",
                &RoomAliasExistsRequest {
                    alias: alias.to_string(),
                },
            )
            .await?;
        Ok(response.alias_exists)
    }

    /// Ask the application services whether they own `user_id`.
    ///
    /// # Errors
    ///
    /// Returns [`ClientError`] if the call fails.
    pub async fn user_id_exists(&self, user_id: &str) -> Result<bool, ClientError> {
        let response: UserIdExistsResponse = self
            .client
            .call(
                "user_id_exists",
                &UserIdExistsRequest {
                    user_id: user_id.to_string(),
                },
            )
            .await?;
        Ok(response.user_id_exists)
    }
}
