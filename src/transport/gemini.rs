//! Gemini Live WebSocket transport

use std::sync::Arc;

use async_trait::async_trait;
use futures::stream::{SplitSink, SplitStream};
use futures::{SinkExt, StreamExt};
use tokio::net::TcpStream;
use tokio::sync::{Mutex, mpsc};
use tokio::task::JoinHandle;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream, connect_async};

use super::protocol::{
    AudioTranscriptionConfig, ClientMessage, Content, GenerationConfig, Modality,
    PrebuiltVoiceConfig, ServerMessage, Setup, SpeechConfig, VoiceConfig,
};
use super::{EVENT_CHANNEL_CAPACITY, LiveTransport, SessionSetup, TransportConnector, TransportEvent};
use crate::voice::AudioFrame;
use crate::{Error, Result};

type RawWs = WebSocketStream<MaybeTlsStream<TcpStream>>;
type WsSink = SplitSink<RawWs, Message>;
type WsStream = SplitStream<RawWs>;

/// Connects to the Gemini Live `BidiGenerateContent` endpoint
#[derive(Clone)]
pub struct GeminiLiveConnector {
    endpoint: String,
    api_key: Option<String>,
}

impl std::fmt::Debug for GeminiLiveConnector {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("GeminiLiveConnector")
            .field("endpoint", &self.endpoint)
            .field("api_key", &self.api_key.as_ref().map(|_| "<redacted>"))
            .finish()
    }
}

impl GeminiLiveConnector {
    /// Create a connector for `endpoint`
    #[must_use]
    pub fn new(endpoint: impl Into<String>, api_key: Option<String>) -> Self {
        Self {
            endpoint: endpoint.into(),
            api_key: api_key.filter(|k| !k.trim().is_empty()),
        }
    }

    fn api_key(&self) -> Result<&str> {
        self.api_key.as_deref().ok_or_else(|| {
            Error::MissingCredential(
                "API key not found (set GEMINI_API_KEY or api_key in config.toml)".to_string(),
            )
        })
    }
}

#[async_trait]
impl TransportConnector for GeminiLiveConnector {
    fn preflight(&self) -> Result<()> {
        self.api_key().map(|_| ())
    }

    async fn connect(
        &self,
        setup: &SessionSetup,
    ) -> Result<(Arc<dyn LiveTransport>, mpsc::Receiver<TransportEvent>)> {
        let url = url::Url::parse_with_params(&self.endpoint, &[("key", self.api_key()?)])
            .map_err(|e| Error::Config(format!("invalid live endpoint: {e}")))?;

        tracing::debug!(endpoint = %self.endpoint, model = %setup.model, "dialing live endpoint");

        let (ws, _response) = connect_async(url.as_str())
            .await
            .map_err(|e| Error::Transport(format!("websocket connect failed: {e}")))?;

        let (mut sink, stream) = ws.split();

        let payload = serde_json::to_string(&ClientMessage::Setup(build_setup(setup)))?;
        sink.send(Message::text(payload))
            .await
            .map_err(|e| Error::Transport(format!("failed to send setup: {e}")))?;

        let (event_tx, event_rx) = mpsc::channel(EVENT_CHANNEL_CAPACITY);
        let reader = tokio::spawn(read_pump(stream, event_tx));

        let transport: Arc<dyn LiveTransport> = Arc::new(GeminiLiveTransport {
            sink: Mutex::new(Some(sink)),
            reader,
        });

        Ok((transport, event_rx))
    }
}

/// Send half of an open Gemini Live socket plus its read pump
struct GeminiLiveTransport {
    sink: Mutex<Option<WsSink>>,
    reader: JoinHandle<()>,
}

#[async_trait]
impl LiveTransport for GeminiLiveTransport {
    async fn send_realtime_input(&self, frame: &AudioFrame) -> Result<()> {
        let payload = serde_json::to_string(&ClientMessage::audio(frame))?;

        let mut guard = self.sink.lock().await;
        let sink = guard
            .as_mut()
            .ok_or_else(|| Error::Transport("socket is closed".to_string()))?;

        sink.send(Message::text(payload))
            .await
            .map_err(|e| Error::Transport(format!("websocket send failed: {e}")))
    }

    async fn close(&self) {
        let Some(mut sink) = self.sink.lock().await.take() else {
            return;
        };

        if let Err(e) = sink.send(Message::Close(None)).await {
            tracing::debug!(error = %e, "close frame not sent");
        }
        let _ = sink.close().await;

        // The remote may never answer the close frame
        self.reader.abort();
        tracing::debug!("live socket closed");
    }
}

/// Build the setup message for a session
fn build_setup(setup: &SessionSetup) -> Setup {
    let model = if setup.model.starts_with("models/") {
        setup.model.clone()
    } else {
        format!("models/{}", setup.model)
    };

    let speech_config = (!setup.voice.is_empty()).then(|| SpeechConfig {
        voice_config: VoiceConfig {
            prebuilt_voice_config: PrebuiltVoiceConfig {
                voice_name: setup.voice.clone(),
            },
        },
    });

    Setup {
        model,
        generation_config: GenerationConfig {
            response_modalities: vec![Modality::Audio],
            speech_config,
        },
        system_instruction: (!setup.system_instruction.is_empty())
            .then(|| Content::text(setup.system_instruction.clone())),
        input_audio_transcription: setup
            .input_transcription
            .then_some(AudioTranscriptionConfig {}),
        output_audio_transcription: setup
            .output_transcription
            .then_some(AudioTranscriptionConfig {}),
    }
}

/// Forward socket messages as transport events until the socket ends
async fn read_pump(mut stream: WsStream, events: mpsc::Sender<TransportEvent>) {
    while let Some(item) = stream.next().await {
        let event = match item {
            Ok(Message::Text(text)) => parse_server_message(text.as_bytes()),
            Ok(Message::Binary(data)) => parse_server_message(&data),
            Ok(Message::Close(frame)) => {
                let reason = frame.and_then(|f| {
                    let reason = f.reason.as_str().trim().to_string();
                    (!reason.is_empty()).then(|| format!("{reason} (code {})", u16::from(f.code)))
                });
                tracing::debug!(?reason, "live socket closed by remote");
                let _ = events.send(TransportEvent::Closed(reason)).await;
                return;
            }
            Ok(_) => continue,
            Err(e) => {
                tracing::warn!(error = %e, "live socket error");
                let _ = events.send(TransportEvent::Error(e.to_string())).await;
                return;
            }
        };

        if let Some(event) = event
            && events.send(event).await.is_err()
        {
            tracing::trace!("event receiver dropped, stopping read pump");
            return;
        }
    }

    let _ = events.send(TransportEvent::Closed(None)).await;
}

/// Classify one JSON payload from the server
fn parse_server_message(raw: &[u8]) -> Option<TransportEvent> {
    match serde_json::from_slice::<ServerMessage>(raw) {
        Ok(msg) if msg.is_setup_complete() => Some(TransportEvent::Opened),
        Ok(msg) => Some(TransportEvent::Message(msg)),
        Err(e) => {
            tracing::warn!(error = %e, bytes = raw.len(), "ignoring unparseable server message");
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn setup() -> SessionSetup {
        SessionSetup {
            model: "gemini-2.5-flash-native-audio-preview-09-2025".to_string(),
            system_instruction: "Sei freundlich.".to_string(),
            voice: "Kore".to_string(),
            input_transcription: true,
            output_transcription: true,
        }
    }

    #[test]
    fn test_missing_key_fails_preflight() {
        let connector = GeminiLiveConnector::new("wss://example.invalid/ws", None);
        assert!(matches!(
            connector.preflight(),
            Err(Error::MissingCredential(_))
        ));

        let blank = GeminiLiveConnector::new("wss://example.invalid/ws", Some("  ".to_string()));
        assert!(blank.preflight().is_err());

        let ok = GeminiLiveConnector::new("wss://example.invalid/ws", Some("k".to_string()));
        assert!(ok.preflight().is_ok());
    }

    #[test]
    fn test_debug_redacts_key() {
        let connector = GeminiLiveConnector::new("wss://x", Some("secret-key".to_string()));
        let debug = format!("{connector:?}");
        assert!(!debug.contains("secret-key"));
        assert!(debug.contains("<redacted>"));
    }

    #[test]
    fn test_build_setup_prefixes_model() {
        let built = build_setup(&setup());
        assert_eq!(
            built.model,
            "models/gemini-2.5-flash-native-audio-preview-09-2025"
        );

        let mut already = setup();
        already.model = "models/custom".to_string();
        assert_eq!(build_setup(&already).model, "models/custom");
    }

    #[test]
    fn test_build_setup_carries_options() {
        let built = build_setup(&setup());
        assert_eq!(built.generation_config.response_modalities, vec![Modality::Audio]);
        assert_eq!(
            built
                .generation_config
                .speech_config
                .unwrap()
                .voice_config
                .prebuilt_voice_config
                .voice_name,
            "Kore"
        );
        assert_eq!(
            built.system_instruction.unwrap().parts[0].text.as_deref(),
            Some("Sei freundlich.")
        );
        assert!(built.input_audio_transcription.is_some());
        assert!(built.output_audio_transcription.is_some());

        let mut bare = setup();
        bare.input_transcription = false;
        bare.output_transcription = false;
        bare.voice = String::new();
        let built = build_setup(&bare);
        assert!(built.input_audio_transcription.is_none());
        assert!(built.output_audio_transcription.is_none());
        assert!(built.generation_config.speech_config.is_none());
    }

    #[test]
    fn test_parse_server_message() {
        assert_eq!(
            parse_server_message(br#"{"setupComplete":{}}"#),
            Some(TransportEvent::Opened)
        );
        assert!(matches!(
            parse_server_message(br#"{"serverContent":{"turnComplete":true}}"#),
            Some(TransportEvent::Message(_))
        ));
        assert_eq!(parse_server_message(b"not json"), None);
    }

    #[tokio::test]
    async fn test_close_stops_read_pump_when_remote_stays_silent() {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let (setup_tx, setup_rx) = tokio::sync::oneshot::channel();

        // Accepts, reads the setup, then holds the socket without ever replying
        tokio::spawn(async move {
            let (tcp, _) = listener.accept().await.unwrap();
            let mut ws = tokio_tungstenite::accept_async(tcp).await.unwrap();
            let first = ws.next().await.unwrap().unwrap();
            let _ = setup_tx.send(first.into_text().unwrap().as_str().to_owned());
            let _held = ws;
            std::future::pending::<()>().await;
        });

        let connector = GeminiLiveConnector::new(format!("ws://{addr}/live"), Some("k".to_string()));
        let (transport, mut events) = connector.connect(&setup()).await.unwrap();

        let sent = setup_rx.await.unwrap();
        assert!(sent.contains("\"setup\""), "{sent}");
        assert!(sent.contains("models/gemini-2.5"), "{sent}");

        transport.close().await;

        let next = tokio::time::timeout(std::time::Duration::from_secs(1), events.recv())
            .await
            .expect("read pump still running after close");
        assert_eq!(next, None);
    }
}
