// Signaling envelope vocabulary
// JSON objects with a `type` discriminator, field names as the pairing server expects

use serde::{Deserialize, Serialize};
use serde_json::Value;

use super::codec;
use crate::error::ProtocolError;

/// Literal the pairing server uses for "no partner" / "no matched interest"
pub const NO_PARTNER: &str = "Null";

/// Kind of a session description
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SdpKind {
    Offer,
    Answer,
}

/// An SDP blob tagged with its role, shaped like the browser's RTCSessionDescriptionInit
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionDescription {
    #[serde(rename = "type")]
    pub kind: SdpKind,
    pub sdp: String,
}

impl SessionDescription {
    pub fn offer(sdp: impl Into<String>) -> Self {
        Self {
            kind: SdpKind::Offer,
            sdp: sdp.into(),
        }
    }

    pub fn answer(sdp: impl Into<String>) -> Self {
        Self {
            kind: SdpKind::Answer,
            sdp: sdp.into(),
        }
    }
}

/// A trickled ICE candidate, shaped like the browser's RTCIceCandidateInit
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct IceCandidateInit {
    pub candidate: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sdp_mid: Option<String>,
    #[serde(default, rename = "sdpMLineIndex", skip_serializing_if = "Option::is_none")]
    pub sdp_m_line_index: Option<u16>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub username_fragment: Option<String>,
}

impl IceCandidateInit {
    pub fn new(candidate: impl Into<String>) -> Self {
        Self {
            candidate: candidate.into(),
            sdp_mid: None,
            sdp_m_line_index: None,
            username_fragment: None,
        }
    }

    /// Browsers signal end-of-candidates with an empty candidate line
    pub fn is_end_of_candidates(&self) -> bool {
        self.candidate.trim().is_empty()
    }
}

/// Every message exchanged with the pairing server
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum Envelope {
    /// Ask the server for our identity
    #[serde(rename = "getId")]
    GetId,

    /// Server-assigned identity
    #[serde(rename = "id")]
    Id { id: String },

    /// Partner assignment; `None` means no partner (left, or not matched yet)
    #[serde(rename = "partnerId")]
    PartnerId {
        #[serde(rename = "partnerId", with = "sentinel")]
        partner_id: Option<String>,
        #[serde(
            rename = "matchedInterest",
            default,
            with = "sentinel",
            skip_serializing_if = "Option::is_none"
        )]
        matched_interest: Option<String>,
    },

    #[serde(rename = "partnerName")]
    PartnerName { name: String },

    #[serde(rename = "message")]
    Message {
        text: String,
        #[serde(default)]
        name: String,
        sender: String,
        #[serde(default)]
        timestamp: String,
    },

    /// Image as a data URL
    #[serde(rename = "image")]
    Image {
        #[serde(rename = "imageBase64")]
        image_data: String,
        #[serde(default)]
        name: String,
        sender: String,
        #[serde(default)]
        timestamp: String,
    },

    #[serde(rename = "imageReq")]
    ImageRequest {
        #[serde(default)]
        name: String,
        sender: String,
        #[serde(default)]
        timestamp: String,
    },

    #[serde(rename = "typing")]
    Typing,

    #[serde(rename = "notTyping")]
    NotTyping,

    #[serde(rename = "disconnect")]
    Disconnect,

    #[serde(rename = "offer")]
    Offer {
        offer: SessionDescription,
        sender: String,
    },

    #[serde(rename = "answer")]
    Answer {
        answer: SessionDescription,
        sender: String,
    },

    #[serde(rename = "ice-candidate")]
    IceCandidate {
        candidate: IceCandidateInit,
        sender: String,
    },

    /// Anything with a `type` we don't know; kept verbatim so it re-encodes unchanged
    #[serde(skip)]
    Unknown { kind: String, payload: Value },
}

const KNOWN_KINDS: &[&str] = &[
    "getId",
    "id",
    "partnerId",
    "partnerName",
    "message",
    "image",
    "imageReq",
    "typing",
    "notTyping",
    "disconnect",
    "offer",
    "answer",
    "ice-candidate",
];

impl Envelope {
    /// Wire name of this envelope's `type`
    pub fn kind(&self) -> &str {
        match self {
            Envelope::GetId => "getId",
            Envelope::Id { .. } => "id",
            Envelope::PartnerId { .. } => "partnerId",
            Envelope::PartnerName { .. } => "partnerName",
            Envelope::Message { .. } => "message",
            Envelope::Image { .. } => "image",
            Envelope::ImageRequest { .. } => "imageReq",
            Envelope::Typing => "typing",
            Envelope::NotTyping => "notTyping",
            Envelope::Disconnect => "disconnect",
            Envelope::Offer { .. } => "offer",
            Envelope::Answer { .. } => "answer",
            Envelope::IceCandidate { .. } => "ice-candidate",
            Envelope::Unknown { kind, .. } => kind,
        }
    }

    pub fn is_known_kind(kind: &str) -> bool {
        KNOWN_KINDS.contains(&kind)
    }

    /// Serialize to JSON text for a WebSocket text frame
    pub fn encode(&self) -> Result<String, ProtocolError> {
        codec::encode(self)
    }

    /// Parse a single typed envelope
    pub fn decode(text: &str) -> Result<Self, ProtocolError> {
        codec::decode(text)
    }
}

/// Maps the server's "Null" sentinel (and its spellings) to `None`
mod sentinel {
    use super::NO_PARTNER;
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(value: &Option<String>, serializer: S) -> Result<S::Ok, S::Error> {
        match value {
            Some(v) => serializer.serialize_str(v),
            None => serializer.serialize_str(NO_PARTNER),
        }
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Option<String>, D::Error> {
        let raw: Option<String> = Option::deserialize(deserializer)?;
        Ok(raw.filter(|v| !is_sentinel(v)))
    }

    pub fn is_sentinel(value: &str) -> bool {
        value.is_empty() || value == NO_PARTNER || value.eq_ignore_ascii_case("none")
    }
}
