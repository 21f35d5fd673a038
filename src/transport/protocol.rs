//! Gemini Live wire protocol
//!
//! JSON messages exchanged over the `BidiGenerateContent` WebSocket. Only
//! the fields this client reads or writes are modelled; unknown fields are
//! ignored on input.

use serde::{Deserialize, Serialize};

use crate::voice::AudioFrame;

/// Requested response modality
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Modality {
    Audio,
}

/// Inline binary payload
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Blob {
    pub mime_type: String,
    pub data: String,
}

impl From<&AudioFrame> for Blob {
    fn from(frame: &AudioFrame) -> Self {
        Self {
            mime_type: frame.mime_type().to_string(),
            data: frame.data().to_string(),
        }
    }
}

/// One part of a content turn
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Part {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub text: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub inline_data: Option<Blob>,
}

/// Content turn (system instruction or model output)
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Content {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub role: Option<String>,
    #[serde(default)]
    pub parts: Vec<Part>,
}

impl Content {
    /// Content holding a single text part
    #[must_use]
    pub fn text(text: impl Into<String>) -> Self {
        Self {
            role: None,
            parts: vec![Part {
                text: Some(text.into()),
                inline_data: None,
            }],
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PrebuiltVoiceConfig {
    pub voice_name: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct VoiceConfig {
    pub prebuilt_voice_config: PrebuiltVoiceConfig,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SpeechConfig {
    pub voice_config: VoiceConfig,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct GenerationConfig {
    pub response_modalities: Vec<Modality>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub speech_config: Option<SpeechConfig>,
}

/// Marker object enabling transcription (`{}` on the wire)
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct AudioTranscriptionConfig {}

/// Session setup, the first message on the socket
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Setup {
    pub model: String,
    pub generation_config: GenerationConfig,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub system_instruction: Option<Content>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub input_audio_transcription: Option<AudioTranscriptionConfig>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub output_audio_transcription: Option<AudioTranscriptionConfig>,
}

/// Streaming input
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RealtimeInput {
    pub media_chunks: Vec<Blob>,
}

/// Messages sent by the client
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub enum ClientMessage {
    Setup(Setup),
    RealtimeInput(RealtimeInput),
}

impl ClientMessage {
    /// Realtime input carrying one audio frame
    #[must_use]
    pub fn audio(frame: &AudioFrame) -> Self {
        Self::RealtimeInput(RealtimeInput {
            media_chunks: vec![Blob::from(frame)],
        })
    }
}

/// Transcription fragment
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
pub struct Transcription {
    #[serde(default)]
    pub text: String,
}

/// Model output and turn signals
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ServerContent {
    #[serde(default)]
    pub model_turn: Option<Content>,
    #[serde(default)]
    pub turn_complete: bool,
    #[serde(default)]
    pub interrupted: bool,
    #[serde(default)]
    pub input_transcription: Option<Transcription>,
    #[serde(default)]
    pub output_transcription: Option<Transcription>,
}

/// Server notice that the connection will end soon
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GoAway {
    #[serde(default)]
    pub time_left: Option<String>,
}

/// Any message received from the server
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ServerMessage {
    #[serde(default)]
    pub setup_complete: Option<serde_json::Value>,
    #[serde(default)]
    pub server_content: Option<ServerContent>,
    #[serde(default)]
    pub go_away: Option<GoAway>,
}

impl ServerMessage {
    /// Whether this acknowledges the setup message
    #[must_use]
    pub const fn is_setup_complete(&self) -> bool {
        self.setup_complete.is_some()
    }

    /// Inline audio blobs of the model turn, in order
    pub fn audio_chunks(&self) -> impl Iterator<Item = &Blob> {
        self.server_content
            .iter()
            .filter_map(|c| c.model_turn.as_ref())
            .flat_map(|turn| turn.parts.iter())
            .filter_map(|part| part.inline_data.as_ref())
            .filter(|blob| blob.mime_type.starts_with("audio/"))
    }

    /// Model turn carrying a single inline audio blob
    #[must_use]
    pub fn audio(mime_type: &str, data: &str) -> Self {
        Self {
            server_content: Some(ServerContent {
                model_turn: Some(Content {
                    role: Some("model".to_string()),
                    parts: vec![Part {
                        text: None,
                        inline_data: Some(Blob {
                            mime_type: mime_type.to_string(),
                            data: data.to_string(),
                        }),
                    }],
                }),
                ..ServerContent::default()
            }),
            ..Self::default()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_setup_serialization() {
        let setup = ClientMessage::Setup(Setup {
            model: "models/gemini".to_string(),
            generation_config: GenerationConfig {
                response_modalities: vec![Modality::Audio],
                speech_config: Some(SpeechConfig {
                    voice_config: VoiceConfig {
                        prebuilt_voice_config: PrebuiltVoiceConfig {
                            voice_name: "Kore".to_string(),
                        },
                    },
                }),
            },
            system_instruction: Some(Content::text("be brief")),
            input_audio_transcription: Some(AudioTranscriptionConfig {}),
            output_audio_transcription: None,
        });

        let json = serde_json::to_value(&setup).unwrap();
        assert_eq!(json["setup"]["model"], "models/gemini");
        assert_eq!(
            json["setup"]["generationConfig"]["responseModalities"][0],
            "AUDIO"
        );
        assert_eq!(
            json["setup"]["generationConfig"]["speechConfig"]["voiceConfig"]["prebuiltVoiceConfig"]
                ["voiceName"],
            "Kore"
        );
        assert_eq!(
            json["setup"]["systemInstruction"]["parts"][0]["text"],
            "be brief"
        );
        assert!(json["setup"]["inputAudioTranscription"].is_object());
        assert!(json["setup"].get("outputAudioTranscription").is_none());
    }

    #[test]
    fn test_realtime_input_serialization() {
        let frame = crate::voice::codec::encode(&[0.0; 2]);
        let json = serde_json::to_value(ClientMessage::audio(&frame)).unwrap();

        let chunk = &json["realtimeInput"]["mediaChunks"][0];
        assert_eq!(chunk["mimeType"], "audio/pcm;rate=16000");
        assert_eq!(chunk["data"], "AAAAAA==");
    }

    #[test]
    fn test_parse_setup_complete() {
        let msg: ServerMessage = serde_json::from_str(r#"{"setupComplete":{}}"#).unwrap();
        assert!(msg.is_setup_complete());
        assert_eq!(msg.audio_chunks().count(), 0);
    }

    #[test]
    fn test_parse_model_audio() {
        let raw = r#"{
            "serverContent": {
                "modelTurn": {
                    "parts": [
                        {"inlineData": {"mimeType": "audio/pcm;rate=24000", "data": "AAA="}},
                        {"text": "thinking"},
                        {"inlineData": {"mimeType": "audio/pcm;rate=24000", "data": "AQA="}}
                    ]
                }
            },
            "usageMetadata": {"totalTokenCount": 3}
        }"#;
        let msg: ServerMessage = serde_json::from_str(raw).unwrap();

        let data: Vec<&str> = msg.audio_chunks().map(|b| b.data.as_str()).collect();
        assert_eq!(data, vec!["AAA=", "AQA="]);
        assert!(!msg.is_setup_complete());
    }

    #[test]
    fn test_parse_turn_signals() {
        let raw = r#"{"serverContent":{"turnComplete":true,"outputTranscription":{"text":"Hallo"}}}"#;
        let msg: ServerMessage = serde_json::from_str(raw).unwrap();
        let content = msg.server_content.unwrap();
        assert!(content.turn_complete);
        assert!(!content.interrupted);
        assert_eq!(content.output_transcription.unwrap().text, "Hallo");
    }

    #[test]
    fn test_parse_go_away() {
        let msg: ServerMessage = serde_json::from_str(r#"{"goAway":{"timeLeft":"10s"}}"#).unwrap();
        assert_eq!(msg.go_away.unwrap().time_left.as_deref(), Some("10s"));
    }
}
