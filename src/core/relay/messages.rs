//! Control frames received from the voice service.
//!
//! Text frames on the upstream socket are JSON objects discriminated by a
//! `type` field:
//!
//! - `call_started` - the remote call is up (`callId`)
//! - `state` - the agent changed state (`state`)
//! - `transcript` - transcript fragment (`final`, `role`, `medium`, `text`)
//! - `playback_clear_buffer` - the client should drop buffered playback
//! - `error` - the service reported an application error
//!
//! Any other `type` is surfaced as [`ControlEvent::Unrecognized`].

use serde::{Deserialize, Serialize};
use serde_json::Value;

use super::base::{RelayError, RelayResult};

/// An interpreted control frame.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ControlEvent {
    /// The remote call started
    CallStarted { call_id: Option<String> },
    /// Agent state change notice
    State { state: String },
    /// A finalized transcript fragment
    Transcript {
        role: String,
        medium: String,
        text: String,
    },
    /// The consumer should discard buffered playback
    PlaybackClearBuffer,
    /// Application error reported by the service; the session continues
    Error { error: Value },
    /// A frame with a type the relay does not interpret
    Unrecognized { message_type: Option<String> },
}

impl ControlEvent {
    /// The wire `type` this event was parsed from.
    pub fn kind(&self) -> &str {
        match self {
            ControlEvent::CallStarted { .. } => "call_started",
            ControlEvent::State { .. } => "state",
            ControlEvent::Transcript { .. } => "transcript",
            ControlEvent::PlaybackClearBuffer => "playback_clear_buffer",
            ControlEvent::Error { .. } => "error",
            ControlEvent::Unrecognized { message_type } => {
                message_type.as_deref().unwrap_or("<none>")
            }
        }
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct CallStartedFrame {
    #[serde(default)]
    call_id: Option<String>,
}

#[derive(Debug, Deserialize)]
struct StateFrame {
    state: String,
}

#[derive(Debug, Deserialize)]
struct TranscriptFrame {
    #[serde(default, rename = "final")]
    is_final: bool,
    #[serde(default)]
    role: Option<String>,
    #[serde(default)]
    medium: Option<String>,
    #[serde(default)]
    text: Option<String>,
}

/// Parse a text frame.
///
/// Returns `Ok(None)` for frames that are deliberately ignored (partial
/// transcripts). Text that is not JSON, or a known type whose fields have the
/// wrong shape, is a [`RelayError::MalformedControlMessage`].
pub fn parse_control_frame(text: &str) -> RelayResult<Option<ControlEvent>> {
    let frame: Value = serde_json::from_str(text)
        .map_err(|e| RelayError::MalformedControlMessage(e.to_string()))?;

    let message_type = frame.get("type").and_then(Value::as_str).map(str::to_owned);

    let event = match message_type.as_deref() {
        Some("call_started") => {
            let parsed: CallStartedFrame = decode(frame)?;
            ControlEvent::CallStarted {
                call_id: parsed.call_id,
            }
        }
        Some("state") => {
            let parsed: StateFrame = decode(frame)?;
            ControlEvent::State {
                state: parsed.state,
            }
        }
        Some("transcript") => {
            let parsed: TranscriptFrame = decode(frame)?;
            if !parsed.is_final {
                return Ok(None);
            }
            ControlEvent::Transcript {
                role: parsed.role.unwrap_or_default(),
                medium: parsed.medium.unwrap_or_default(),
                text: parsed.text.unwrap_or_default(),
            }
        }
        Some("playback_clear_buffer") => ControlEvent::PlaybackClearBuffer,
        Some("error") => {
            let error = frame.get("error").cloned().unwrap_or(frame);
            ControlEvent::Error { error }
        }
        _ => ControlEvent::Unrecognized { message_type },
    };

    Ok(Some(event))
}

fn decode<T: for<'de> Deserialize<'de>>(frame: Value) -> RelayResult<T> {
    serde_json::from_value(frame).map_err(|e| RelayError::MalformedControlMessage(e.to_string()))
}
