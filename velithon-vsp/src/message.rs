//! VSP wire message: `{header: {request_id, service, endpoint, is_response}, body}`.
//!
//! Ported from `velithon/vsp/message.py`'s `VSPMessage`/`VSPError`. The
//! Python version keys its header off a plain dict; here the header is a
//! struct so `rmp_serde` gives us the exact map shape from spec.md §6
//! without hand-rolled (de)serialization.

use serde::{Deserialize, Serialize};

/// Maximum accepted frame body size: spec.md §6 says implementers MUST
/// reject frames over 16 MiB unless configured otherwise.
pub const MAX_FRAME_LEN: u32 = 16 * 1024 * 1024;

#[derive(Debug, thiserror::Error)]
pub enum VspError {
    #[error("frame length {0} exceeds maximum of {MAX_FRAME_LEN}")]
    FrameTooLarge(u32),
    #[error("message encode failed: {0}")]
    Encode(#[from] rmp_serde::encode::Error),
    #[error("message decode failed: {0}")]
    Decode(#[from] rmp_serde::decode::Error),
    #[error("transport closed")]
    TransportClosed,
    #[error("request timed out")]
    Timeout,
    #[error("service {0} not found or unhealthy")]
    ServiceUnavailable(String),
    #[error("{0}")]
    Remote(String),
    #[error(transparent)]
    Io(#[from] std::io::Error),
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VspHeader {
    pub request_id: String,
    pub service: String,
    pub endpoint: String,
    #[serde(default)]
    pub is_response: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VspMessage {
    pub header: VspHeader,
    pub body: serde_json::Value,
}

impl VspMessage {
    pub fn new(
        request_id: impl Into<String>,
        service: impl Into<String>,
        endpoint: impl Into<String>,
        body: serde_json::Value,
        is_response: bool,
    ) -> Self {
        Self {
            header: VspHeader {
                request_id: request_id.into(),
                service: service.into(),
                endpoint: endpoint.into(),
                is_response,
            },
            body,
        }
    }

    pub fn response_to(&self, endpoint: impl Into<String>, body: serde_json::Value) -> Self {
        Self::new(
            self.header.request_id.clone(),
            self.header.service.clone(),
            endpoint,
            body,
            true,
        )
    }

    pub fn error_response(&self, message: impl std::fmt::Display) -> Self {
        self.response_to(
            self.header.endpoint.clone(),
            serde_json::json!({ "error": message.to_string() }),
        )
    }

    /// Body's error payload, if this message carries one (`{"error": ...}`).
    pub fn body_error(&self) -> Option<String> {
        self.body.get("error").and_then(|v| v.as_str()).map(str::to_owned)
    }

    pub fn to_bytes(&self) -> Result<Vec<u8>, VspError> {
        Ok(rmp_serde::to_vec_named(self)?)
    }

    pub fn from_bytes(data: &[u8]) -> Result<Self, VspError> {
        Ok(rmp_serde::from_slice(data)?)
    }
}
