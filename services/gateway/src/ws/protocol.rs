//! Wire messages exchanged with the browser over the session WebSocket.

use bytes::Bytes;
use serde::Serialize;

/// Text frame the caller sends once it finished playing an audio reply.
pub const PLAYBACK_FINISHED: &str = "audio_playback_finished";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum TranscriptionStatus {
    Streaming,
    Final,
}

/// JSON frames sent to the caller.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ServerMessage {
    Transcription {
        status: TranscriptionStatus,
        text: String,
    },
    Response {
        text: String,
    },
}

/// Frames received from the caller, after classification by the reader task.
#[derive(Debug, Clone)]
pub enum ClientEvent {
    Audio(Bytes),
    PlaybackFinished,
    Text(String),
}

/// Frames queued for the writer task.
#[derive(Debug, Clone)]
pub enum Outbound {
    Message(ServerMessage),
    Audio(Bytes),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn transcription_message_shape() {
        let msg = ServerMessage::Transcription {
            status: TranscriptionStatus::Streaming,
            text: "привет".into(),
        };
        let json = serde_json::to_value(&msg).unwrap();
        assert_eq!(
            json,
            serde_json::json!({
                "type": "transcription",
                "status": "streaming",
                "text": "привет",
            })
        );
    }

    #[test]
    fn final_transcription_message_shape() {
        let msg = ServerMessage::Transcription {
            status: TranscriptionStatus::Final,
            text: "привет мир".into(),
        };
        let json = serde_json::to_value(&msg).unwrap();
        assert_eq!(json["status"], "final");
    }

    #[test]
    fn response_message_shape() {
        let msg = ServerMessage::Response {
            text: "здравствуйте".into(),
        };
        let json = serde_json::to_value(&msg).unwrap();
        assert_eq!(
            json,
            serde_json::json!({
                "type": "response",
                "text": "здравствуйте",
            })
        );
    }
}
