//! Federation tunnel protocol.
//!
//! Federation requests travel over libp2p request-response streams negotiated
//! under [`FEDERATION_PROTOCOL`] and encoded as CBOR. A request carries what an
//! HTTP request would: method, path, headers and body.

use crate::error::OverlayError;
use libp2p::{PeerId, StreamProtocol};
use serde::{Deserialize, Serialize};
use tokio::sync::oneshot;

/// Protocol federation traffic is tunnelled over.
pub const FEDERATION_PROTOCOL: StreamProtocol = StreamProtocol::new("/matrix");

/// Kademlia protocol name of the overlay DHT.
pub const KAD_PROTOCOL: StreamProtocol = StreamProtocol::new("/matrix/kad/1.0.0");

/// Service tag shared by peers of this overlay.
///
/// Advertised as the identify protocol version; peers announcing a different
/// tag are not added to the routing table.
pub const SERVICE_TAG: &str = "_matrix-plinth-p2p._tcp";

/// A tunnelled federation request.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct OverlayRequest {
    /// HTTP method
    pub method: String,
    /// Path and query
    pub path: String,
    /// Request headers
    pub headers: Vec<(String, String)>,
    /// Request body
    pub body: Vec<u8>,
}

/// A tunnelled federation response.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct OverlayResponse {
    /// HTTP status code
    pub status: u16,
    /// Response headers
    pub headers: Vec<(String, String)>,
    /// Response body
    pub body: Vec<u8>,
}

impl OverlayResponse {
    /// A response with a status and JSON body.
    #[must_use]
    pub fn json(status: u16, body: Vec<u8>) -> Self {
        Self {
            status,
            headers: vec![("Content-Type".to_string(), "application/json".to_string())],
            body,
        }
    }

    /// Sent when nobody in this process handles inbound federation.
    #[must_use]
    pub fn unavailable() -> Self {
        Self::json(
            503,
            br#"{"errcode":"M_UNAVAILABLE","error":"No federation handler"}"#.to_vec(),
        )
    }
}

/// An inbound federation request waiting for a reply.
#[derive(Debug)]
pub struct InboundRequest {
    /// Peer that sent it
    pub peer: PeerId,
    /// The request
    pub request: OverlayRequest,
    reply: oneshot::Sender<OverlayResponse>,
}

impl InboundRequest {
    pub(crate) const fn new(
        peer: PeerId,
        request: OverlayRequest,
        reply: oneshot::Sender<OverlayResponse>,
    ) -> Self {
        Self {
            peer,
            request,
            reply,
        }
    }

    /// Send the reply back through the overlay.
    ///
    /// # Errors
    ///
    /// Returns [`OverlayError::Stopped`] if the host is gone.
    pub fn respond(self, response: OverlayResponse) -> Result<(), OverlayError> {
        self.reply.send(response).map_err(|_| OverlayError::Stopped)
    }
}
