//! Session wire protocol
//!
//! Transport-agnostic JSON messages exchanged with the remote tutoring
//! service, plus the owned hand-off types the capture components push
//! into the session loop. Messages are immutable once created.

use serde::{Deserialize, Serialize};

use crate::constants::PLAYBACK_SAMPLE_RATE;

/// A message on the wire, tagged by `type`.
///
/// Outbound types are `text`, `audio`, `screen`, `image`, `end_of_turn`
/// and `end_conversation`; inbound types are `text`, `audio` and `error`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum WireMessage {
    Text {
        content: String,
        #[serde(skip_serializing_if = "Option::is_none")]
        is_system_message: Option<bool>,
        #[serde(default)]
        end_of_turn: bool,
    },
    Audio {
        /// Base64-encoded little-endian PCM16
        data: String,
        #[serde(rename = "sampleRate", default = "default_inbound_rate")]
        sample_rate: u32,
    },
    Screen {
        data: String,
    },
    Image {
        data: String,
        image_type: ImageKind,
        #[serde(skip_serializing_if = "Option::is_none")]
        metadata: Option<serde_json::Value>,
    },
    Error {
        error: String,
        #[serde(skip_serializing_if = "Option::is_none")]
        details: Option<String>,
    },
    EndOfTurn,
    EndConversation,
}

fn default_inbound_rate() -> u32 {
    PLAYBACK_SAMPLE_RATE
}

impl WireMessage {
    /// Whether sending this message arms the response timer.
    ///
    /// Continuous media chunks never expect a direct reply; turn-ending
    /// text, the end-of-turn signal and image submissions do.
    pub fn expects_reply(&self) -> bool {
        match self {
            WireMessage::Text {
                is_system_message,
                end_of_turn,
                ..
            } => *end_of_turn && !is_system_message.unwrap_or(false),
            WireMessage::EndOfTurn => true,
            WireMessage::Image { .. } => true,
            _ => false,
        }
    }
}

/// Origin of an image payload
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ImageKind {
    ScreenShare,
    CanvasSnapshot,
    ProblemSubmission,
    WorkspaceSnapshot,
}

/// Encoded media handed from a capture component to the session.
///
/// Ownership transfers with the value; the producer never touches a
/// chunk again after pushing it.
#[derive(Debug, Clone)]
pub enum MediaChunk {
    Audio { data: String, sample_rate: u32 },
    Screen { data: String },
}

/// Opaque connect-time context forwarded by the curriculum layer.
///
/// The session echoes these in the connect URL query string and in the
/// initial context message without interpreting them.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SessionParams {
    pub subject: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub skill: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub subskill: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub package_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub student_id: Option<String>,
}

impl SessionParams {
    /// Append the parameters to a connect URL as query pairs.
    pub fn apply_to_url(&self, url: &mut url::Url) {
        let mut pairs = url.query_pairs_mut();
        pairs.append_pair("subject", &self.subject);
        if let Some(skill) = &self.skill {
            pairs.append_pair("skill", skill);
        }
        if let Some(subskill) = &self.subskill {
            pairs.append_pair("subskill", subskill);
        }
        if let Some(package_id) = &self.package_id {
            pairs.append_pair("package_id", package_id);
        }
        if let Some(student_id) = &self.student_id {
            pairs.append_pair("student_id", student_id);
        }
    }
}

/// Connection lifecycle states. Transitions are serialized by the
/// session loop; there is never more than one transition in flight.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    Disconnected,
    Connecting,
    Connected,
    AwaitingInitialContext,
    Responding,
}

/// Events surfaced to the UI layer
#[derive(Debug, Clone)]
pub enum SessionEvent {
    StateChanged(ConnectionState),
    /// Inbound tutor text
    Text { content: String, end_of_turn: bool },
    /// Recoverable error reported by the remote; the connection stays open
    RemoteError {
        error: String,
        details: Option<String>,
    },
    /// Transport closed or failed; the session is now disconnected
    ConnectionError(String),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_text_wire_shape() {
        let msg = WireMessage::Text {
            content: "What is 3/4 of 12?".to_string(),
            is_system_message: None,
            end_of_turn: true,
        };
        let json = serde_json::to_value(&msg).unwrap();
        assert_eq!(json["type"], "text");
        assert_eq!(json["content"], "What is 3/4 of 12?");
        assert_eq!(json["end_of_turn"], true);
        assert!(json.get("is_system_message").is_none());
    }

    #[test]
    fn test_audio_sample_rate_field_name() {
        let msg = WireMessage::Audio {
            data: "AAAA".to_string(),
            sample_rate: 16000,
        };
        let json = serde_json::to_value(&msg).unwrap();
        assert_eq!(json["sampleRate"], 16000);
    }

    #[test]
    fn test_inbound_audio_defaults_to_24k() {
        let msg: WireMessage =
            serde_json::from_str(r#"{"type": "audio", "data": "AAAA"}"#).unwrap();
        match msg {
            WireMessage::Audio { sample_rate, .. } => assert_eq!(sample_rate, 24000),
            other => panic!("unexpected message: {:?}", other),
        }
    }

    #[test]
    fn test_image_kind_tags() {
        let msg = WireMessage::Image {
            data: "AAAA".to_string(),
            image_type: ImageKind::CanvasSnapshot,
            metadata: None,
        };
        let json = serde_json::to_value(&msg).unwrap();
        assert_eq!(json["image_type"], "canvas_snapshot");
    }

    #[test]
    fn test_end_conversation_has_no_payload() {
        let json = serde_json::to_value(WireMessage::EndConversation).unwrap();
        assert_eq!(json, serde_json::json!({"type": "end_conversation"}));
    }

    #[test]
    fn test_inbound_error_round_trip() {
        let msg: WireMessage = serde_json::from_str(
            r#"{"type": "error", "error": "rate limited", "details": "retry later"}"#,
        )
        .unwrap();
        assert_eq!(
            msg,
            WireMessage::Error {
                error: "rate limited".to_string(),
                details: Some("retry later".to_string()),
            }
        );
    }

    #[test]
    fn test_expects_reply() {
        assert!(WireMessage::EndOfTurn.expects_reply());
        assert!(WireMessage::Image {
            data: String::new(),
            image_type: ImageKind::ProblemSubmission,
            metadata: None,
        }
        .expects_reply());
        assert!(!WireMessage::Audio {
            data: String::new(),
            sample_rate: 16000,
        }
        .expects_reply());
        // System messages never arm the timer, even turn-ending ones
        assert!(!WireMessage::Text {
            content: String::new(),
            is_system_message: Some(true),
            end_of_turn: true,
        }
        .expects_reply());
    }

    #[test]
    fn test_params_query_string() {
        let params = SessionParams {
            subject: "math".to_string(),
            skill: Some("fractions".to_string()),
            subskill: None,
            package_id: Some("pkg-7".to_string()),
            student_id: None,
        };
        let mut url = url::Url::parse("ws://localhost:8765/session").unwrap();
        params.apply_to_url(&mut url);
        let query = url.query().unwrap();
        assert!(query.contains("subject=math"));
        assert!(query.contains("skill=fractions"));
        assert!(query.contains("package_id=pkg-7"));
        assert!(!query.contains("subskill"));
    }
}
