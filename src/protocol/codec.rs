// Envelope codec: JSON text <-> Envelope

use serde_json::{Map, Value};

use super::envelope::Envelope;
use crate::error::ProtocolError;

/// Encode an envelope as JSON text
pub fn encode(envelope: &Envelope) -> Result<String, ProtocolError> {
    let encoded = match envelope {
        Envelope::Unknown { payload, .. } => serde_json::to_string(payload),
        known => serde_json::to_string(known),
    };
    encoded.map_err(|e| ProtocolError::Encode(e.to_string()))
}

/// Decode a single typed envelope
///
/// Unrecognized `type` values decode to `Envelope::Unknown`; a recognized
/// type with missing or mistyped fields is a `ProtocolError`.
pub fn decode(text: &str) -> Result<Envelope, ProtocolError> {
    decode_value(parse(text)?)
}

/// Decode one inbound WebSocket frame into the envelopes it carries
///
/// The pairing server announces assignments as an untyped object
/// `{"id", "partnerId", "matchedInterest"}`. Such a frame yields `Id`
/// followed by `PartnerId`; typed frames yield exactly one envelope.
pub fn decode_frame(text: &str) -> Result<Vec<Envelope>, ProtocolError> {
    let value = parse(text)?;
    let object = value.as_object().ok_or(ProtocolError::NotAnObject)?;

    if object.contains_key("type") {
        return decode_value(value).map(|env| vec![env]);
    }

    let mut envelopes = Vec::with_capacity(2);

    if let Some(id) = object.get("id") {
        let id = id.as_str().ok_or_else(|| ProtocolError::InvalidFields {
            kind: "id".into(),
            reason: "id is not a string".into(),
        })?;
        envelopes.push(Envelope::Id { id: id.to_string() });
    }

    if object.contains_key("partnerId") {
        let mut typed = Map::with_capacity(3);
        typed.insert("type".into(), Value::String("partnerId".into()));
        for key in ["partnerId", "matchedInterest"] {
            if let Some(field) = object.get(key) {
                typed.insert(key.into(), field.clone());
            }
        }
        envelopes.push(decode_value(Value::Object(typed))?);
    }

    if envelopes.is_empty() {
        return Err(ProtocolError::MissingType);
    }
    Ok(envelopes)
}

fn parse(text: &str) -> Result<Value, ProtocolError> {
    serde_json::from_str(text).map_err(|e| ProtocolError::Malformed(e.to_string()))
}

fn decode_value(value: Value) -> Result<Envelope, ProtocolError> {
    let kind = match value.as_object().map(|obj| obj.get("type")) {
        None => return Err(ProtocolError::NotAnObject),
        Some(None) => return Err(ProtocolError::MissingType),
        Some(Some(Value::String(kind))) => kind.clone(),
        Some(Some(other)) => {
            return Err(ProtocolError::InvalidFields {
                kind: other.to_string(),
                reason: "type is not a string".into(),
            })
        }
    };

    if !Envelope::is_known_kind(&kind) {
        return Ok(Envelope::Unknown {
            kind,
            payload: value,
        });
    }

    serde_json::from_value(value).map_err(|e| ProtocolError::InvalidFields {
        kind,
        reason: e.to_string(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::{IceCandidateInit, SessionDescription};
    use serde_json::json;

    #[test]
    fn test_assignment_frame_splits_into_id_then_partner() {
        let frame = r#"{"id":"a-1","partnerId":"b-2","matchedInterest":"music"}"#;
        let envelopes = decode_frame(frame).unwrap();
        assert_eq!(
            envelopes,
            vec![
                Envelope::Id { id: "a-1".into() },
                Envelope::PartnerId {
                    partner_id: Some("b-2".into()),
                    matched_interest: Some("music".into()),
                },
            ]
        );
    }

    #[test]
    fn test_waiting_assignment_frame() {
        let frame = r#"{"id":"a-1","partnerId":"Null","matchedInterest":"Null"}"#;
        let envelopes = decode_frame(frame).unwrap();
        assert_eq!(envelopes.len(), 2);
        assert_eq!(
            envelopes[1],
            Envelope::PartnerId {
                partner_id: None,
                matched_interest: None,
            }
        );
    }

    #[test]
    fn test_untyped_frame_without_assignment_is_rejected() {
        assert_eq!(decode_frame(r#"{"hello":"world"}"#), Err(ProtocolError::MissingType));
        assert_eq!(decode(r#"{"id":"a-1"}"#), Err(ProtocolError::MissingType));
    }

    #[test]
    fn test_unknown_type_is_not_an_error() {
        let text = r#"{"type":"reaction","emoji":"wave"}"#;
        let env = decode(text).unwrap();
        match &env {
            Envelope::Unknown { kind, payload } => {
                assert_eq!(kind, "reaction");
                assert_eq!(payload["emoji"], "wave");
            }
            other => panic!("expected Unknown, got {:?}", other),
        }

        // Forwarded unchanged when re-encoded
        let reencoded: Value = serde_json::from_str(&encode(&env).unwrap()).unwrap();
        assert_eq!(reencoded, json!({ "type": "reaction", "emoji": "wave" }));
    }

    #[test]
    fn test_missing_required_field_is_protocol_error() {
        let err = decode(r#"{"type":"message","text":"hi"}"#).unwrap_err();
        match err {
            ProtocolError::InvalidFields { kind, .. } => assert_eq!(kind, "message"),
            other => panic!("unexpected error: {:?}", other),
        }

        assert!(matches!(
            decode(r#"{"type":"offer","sender":"a"}"#),
            Err(ProtocolError::InvalidFields { .. })
        ));
        assert!(matches!(
            decode(r#"{"type":"id","id":7}"#),
            Err(ProtocolError::InvalidFields { .. })
        ));
    }

    #[test]
    fn test_structural_garbage() {
        assert!(matches!(decode("not json"), Err(ProtocolError::Malformed(_))));
        assert_eq!(decode("[1,2,3]"), Err(ProtocolError::NotAnObject));
        assert!(matches!(
            decode(r#"{"type":42}"#),
            Err(ProtocolError::InvalidFields { .. })
        ));
    }

    #[test]
    fn test_bare_video_page_message_defaults_optional_fields() {
        let env = decode(r#"{"type":"message","text":"yo","sender":"b-2"}"#).unwrap();
        assert_eq!(
            env,
            Envelope::Message {
                text: "yo".into(),
                name: String::new(),
                sender: "b-2".into(),
                timestamp: String::new(),
            }
        );
    }

    #[test]
    fn test_every_envelope_round_trips() {
        let envelopes = vec![
            Envelope::GetId,
            Envelope::Id { id: "a-1".into() },
            Envelope::PartnerId {
                partner_id: Some("b-2".into()),
                matched_interest: Some("jazz".into()),
            },
            Envelope::PartnerId {
                partner_id: Some("b-2".into()),
                matched_interest: None,
            },
            Envelope::PartnerId {
                partner_id: None,
                matched_interest: None,
            },
            Envelope::PartnerName { name: "Ann".into() },
            Envelope::Message {
                text: "hi \u{1F44B}".into(),
                name: "Ann".into(),
                sender: "a-1".into(),
                timestamp: "2024-05-01T12:00:00.000Z".into(),
            },
            Envelope::Image {
                image_data: "data:image/png;base64,iVBORw==".into(),
                name: "Ann".into(),
                sender: "a-1".into(),
                timestamp: "2024-05-01T12:00:01.000Z".into(),
            },
            Envelope::ImageRequest {
                name: "Bob".into(),
                sender: "b-2".into(),
                timestamp: "2024-05-01T12:00:02.000Z".into(),
            },
            Envelope::Typing,
            Envelope::NotTyping,
            Envelope::Disconnect,
            Envelope::Offer {
                offer: SessionDescription::offer("v=0\r\no=- 1 2 IN IP4 0.0.0.0\r\n"),
                sender: "a-1".into(),
            },
            Envelope::Answer {
                answer: SessionDescription::answer("v=0\r\no=- 3 4 IN IP4 0.0.0.0\r\n"),
                sender: "b-2".into(),
            },
            Envelope::IceCandidate {
                candidate: IceCandidateInit {
                    candidate: "candidate:2 1 udp 1694498815 203.0.113.9 40000 typ srflx".into(),
                    sdp_mid: Some("0".into()),
                    sdp_m_line_index: Some(0),
                    username_fragment: Some("uf".into()),
                },
                sender: "b-2".into(),
            },
            Envelope::IceCandidate {
                candidate: IceCandidateInit::new("candidate:1 1 udp 2122260223 192.168.1.4 50000 typ host"),
                sender: "a-1".into(),
            },
            Envelope::Unknown {
                kind: "wave".into(),
                payload: json!({ "type": "wave", "hand": "left", "count": 2 }),
            },
        ];

        for envelope in envelopes {
            let text = encode(&envelope).unwrap();
            assert_eq!(decode(&text).unwrap(), envelope, "{}", text);
        }
    }

    #[test]
    fn test_no_partner_encodes_as_server_sentinel() {
        let text = encode(&Envelope::PartnerId {
            partner_id: None,
            matched_interest: None,
        })
        .unwrap();
        let value: Value = serde_json::from_str(&text).unwrap();
        assert_eq!(value, json!({ "type": "partnerId", "partnerId": "Null" }));
    }

    #[test]
    fn test_browser_offer_extra_fields_ignored() {
        // The browser client also attaches a `receiver` field
        let text = json!({
            "type": "offer",
            "offer": { "type": "offer", "sdp": "v=0" },
            "sender": "a-1",
            "receiver": "b-2",
        })
        .to_string();
        let env = decode(&text).unwrap();
        assert_eq!(
            env,
            Envelope::Offer {
                offer: SessionDescription::offer("v=0"),
                sender: "a-1".into(),
            }
        );
    }
}
