//! Turn loop for one voice session.
//!
//! Each turn streams caller audio into a recognition worker, waits for the
//! worker's end-of-turn sentinel, then runs the chat/synthesis pipeline and
//! waits for the caller to acknowledge playback. An empty turn (the caller
//! stayed silent until end-of-utterance) ends the session.

use std::sync::Arc;
use std::time::Duration;

use anyhow::{Result, anyhow};
use govor_core::chat::{ChatMessage, ChatModel, ChatRole};
use govor_core::recognizer::RecognizerSpawner;
use govor_core::relay::RelayChannel;
use govor_core::synth::Synthesizer;
use tokio::sync::mpsc::{Receiver, Sender};
use tracing::{debug, info, warn};

use crate::tokens::{GIGA_CHAT, SALUTE_SPEECH, TokenSource};
use crate::ws::protocol::{ClientEvent, Outbound, ServerMessage, TranscriptionStatus};

/// How often the turn loop drains the transcript queue while streaming.
const EVENT_POLL_INTERVAL: Duration = Duration::from_millis(20);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum SessionState {
    AwaitingAudio,
    Streaming,
    Finalizing,
    AwaitingPlaybackAck,
}

/// What a single streaming turn produced.
enum TurnOutcome {
    /// The recognizer produced a final transcript.
    Final(String),
    /// End of utterance with no recognized speech.
    Empty,
    /// The caller's connection went away mid-turn.
    CallerGone,
}

pub struct Orchestrator {
    session_id: String,
    channel: RelayChannel,
    recognizer: Arc<dyn RecognizerSpawner>,
    chat: Arc<dyn ChatModel>,
    synth: Arc<dyn Synthesizer>,
    tokens: Arc<dyn TokenSource>,
    history: Vec<ChatMessage>,
    state: SessionState,
}

impl Orchestrator {
    pub fn new(
        session_id: String,
        recognizer: Arc<dyn RecognizerSpawner>,
        chat: Arc<dyn ChatModel>,
        synth: Arc<dyn Synthesizer>,
        tokens: Arc<dyn TokenSource>,
        system_prompt: &str,
    ) -> Self {
        Self {
            session_id,
            channel: RelayChannel::new(),
            recognizer,
            chat,
            synth,
            tokens,
            history: vec![ChatMessage::new(ChatRole::System, system_prompt)],
            state: SessionState::AwaitingAudio,
        }
    }

    /// Runs the session to completion.
    pub async fn run(
        mut self,
        mut caller_rx: Receiver<ClientEvent>,
        out_tx: Sender<Outbound>,
    ) -> Result<()> {
        let result = self.drive(&mut caller_rx, &out_tx).await;
        info!(session_id = %self.session_id, "Session terminated");
        result
    }

    async fn drive(
        &mut self,
        caller_rx: &mut Receiver<ClientEvent>,
        out_tx: &Sender<Outbound>,
    ) -> Result<()> {
        loop {
            let token = self.tokens.token(SALUTE_SPEECH).await?;
            self.channel.reset();
            let worker = self.recognizer.spawn(token, self.channel.clone());

            let outcome = self.stream_turn(caller_rx, out_tx).await;
            worker.abort();
            // The reset at the top of the next turn requires no concurrent
            // writer; the worker's drop guard must have fired before then.
            let _ = worker.await;

            let text = match outcome {
                Ok(TurnOutcome::Final(text)) => text,
                Ok(TurnOutcome::Empty) => {
                    info!(session_id = %self.session_id, "Silent turn, ending session");
                    return Ok(());
                }
                Ok(TurnOutcome::CallerGone) => return Ok(()),
                Err(e) => return Err(e),
            };

            self.finalize(&text, out_tx).await?;

            self.state = SessionState::AwaitingPlaybackAck;
            if !self.await_playback_ack(caller_rx).await {
                return Ok(());
            }
        }
    }

    /// Relays caller audio to the worker and transcript events back until the
    /// worker finishes its turn.
    async fn stream_turn(
        &mut self,
        caller_rx: &mut Receiver<ClientEvent>,
        out_tx: &Sender<Outbound>,
    ) -> Result<TurnOutcome> {
        self.state = SessionState::AwaitingAudio;
        let mut last_text = String::new();
        let mut poll = tokio::time::interval(EVENT_POLL_INTERVAL);

        loop {
            tokio::select! {
                event = caller_rx.recv() => match event {
                    Some(ClientEvent::Audio(chunk)) => {
                        if self.state == SessionState::AwaitingAudio {
                            self.state = SessionState::Streaming;
                        }
                        self.channel.push_audio(chunk);
                    }
                    Some(ClientEvent::PlaybackFinished) => {
                        warn!(session_id = %self.session_id, "Unexpected playback ack mid-turn");
                    }
                    Some(ClientEvent::Text(other)) => {
                        warn!(session_id = %self.session_id, text = %other, "Ignoring unrecognized text frame");
                    }
                    None => return Ok(TurnOutcome::CallerGone),
                },
                _ = poll.tick() => {}
            }

            while let Some(event) = self.channel.pop_event() {
                if event.is_sentinel() {
                    return Ok(if last_text.trim().is_empty() {
                        TurnOutcome::Empty
                    } else {
                        TurnOutcome::Final(last_text)
                    });
                }
                last_text = event.text.clone();
                if !event.is_final {
                    debug!(session_id = %self.session_id, text = %event.text, "Partial transcript");
                    let update = ServerMessage::Transcription {
                        status: TranscriptionStatus::Streaming,
                        text: event.text,
                    };
                    if out_tx.send(Outbound::Message(update)).await.is_err() {
                        return Ok(TurnOutcome::CallerGone);
                    }
                }
            }
        }
    }

    /// Final transcript in hand: confirm it to the caller, ask the chat model
    /// for a reply, and stream synthesized audio back.
    async fn finalize(&mut self, text: &str, out_tx: &Sender<Outbound>) -> Result<()> {
        self.state = SessionState::Finalizing;
        info!(session_id = %self.session_id, text, "Final transcript");

        let confirmation = ServerMessage::Transcription {
            status: TranscriptionStatus::Final,
            text: text.to_string(),
        };
        out_tx
            .send(Outbound::Message(confirmation))
            .await
            .map_err(|_| anyhow!("Caller connection closed"))?;

        self.history.push(ChatMessage::new(ChatRole::User, text));
        let chat_token = self.tokens.token(GIGA_CHAT).await?;
        let reply = self.chat.reply(&chat_token, &self.history).await?;
        self.history.push(ChatMessage::new(ChatRole::Assistant, &reply));

        out_tx
            .send(Outbound::Message(ServerMessage::Response {
                text: reply.clone(),
            }))
            .await
            .map_err(|_| anyhow!("Caller connection closed"))?;

        let synth_token = self.tokens.token(SALUTE_SPEECH).await?;
        let audio = self.synth.synthesize(&synth_token, &reply).await?;
        out_tx
            .send(Outbound::Audio(audio))
            .await
            .map_err(|_| anyhow!("Caller connection closed"))?;

        Ok(())
    }

    /// Blocks until the caller confirms it finished playing the reply.
    /// Returns false if the connection closed instead.
    async fn await_playback_ack(&self, caller_rx: &mut Receiver<ClientEvent>) -> bool {
        loop {
            match caller_rx.recv().await {
                Some(ClientEvent::PlaybackFinished) => return true,
                Some(ClientEvent::Audio(_)) => {
                    // Audio sent before the ack belongs to no turn; the next
                    // worker has not been spawned yet.
                    warn!(session_id = %self.session_id, "Discarding audio received before playback ack");
                }
                Some(ClientEvent::Text(other)) => {
                    warn!(session_id = %self.session_id, text = %other, "Ignoring unrecognized text frame");
                }
                None => return false,
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use bytes::Bytes;
    use govor_core::error::SpeechError;
    use govor_core::relay::TranscriptEvent;
    use std::collections::VecDeque;
    use std::sync::Mutex;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use tokio::sync::mpsc;
    use tokio::task::JoinHandle;

    /// Recognizer that replays a scripted event list per spawn, then finishes
    /// the channel like the real worker's sentinel guard would.
    struct ScriptedRecognizer {
        scripts: Mutex<VecDeque<Vec<TranscriptEvent>>>,
        spawns: AtomicUsize,
    }

    impl ScriptedRecognizer {
        fn new(scripts: Vec<Vec<TranscriptEvent>>) -> Self {
            Self {
                scripts: Mutex::new(scripts.into_iter().collect()),
                spawns: AtomicUsize::new(0),
            }
        }
    }

    impl RecognizerSpawner for ScriptedRecognizer {
        fn spawn(&self, _token: String, channel: RelayChannel) -> JoinHandle<()> {
            self.spawns.fetch_add(1, Ordering::SeqCst);
            let script = self
                .scripts
                .lock()
                .expect("script lock poisoned")
                .pop_front()
                .unwrap_or_default();
            tokio::spawn(async move {
                for event in script {
                    channel.push_event(event);
                }
                channel.finish();
            })
        }
    }

    /// Recognizer whose workers emit their scripted events, then stay alive
    /// until aborted; the channel is finished through a drop guard, like the
    /// real worker's.
    struct GuardedRecognizer {
        scripts: Mutex<VecDeque<Vec<TranscriptEvent>>>,
        spawns: AtomicUsize,
    }

    impl GuardedRecognizer {
        fn new(scripts: Vec<Vec<TranscriptEvent>>) -> Self {
            Self {
                scripts: Mutex::new(scripts.into_iter().collect()),
                spawns: AtomicUsize::new(0),
            }
        }
    }

    struct FinishOnDrop(RelayChannel);

    impl Drop for FinishOnDrop {
        fn drop(&mut self) {
            self.0.finish();
        }
    }

    impl RecognizerSpawner for GuardedRecognizer {
        fn spawn(&self, _token: String, channel: RelayChannel) -> JoinHandle<()> {
            self.spawns.fetch_add(1, Ordering::SeqCst);
            let script = self
                .scripts
                .lock()
                .expect("script lock poisoned")
                .pop_front()
                .unwrap_or_default();
            let guard = FinishOnDrop(channel.clone());
            tokio::spawn(async move {
                let _guard = guard;
                for event in script {
                    channel.push_event(event);
                }
                std::future::pending::<()>().await;
            })
        }
    }

    /// Recognizer whose worker never produces anything and never finishes on
    /// its own; the channel only completes through the sentinel guard.
    struct HangingRecognizer;

    impl RecognizerSpawner for HangingRecognizer {
        fn spawn(&self, _token: String, channel: RelayChannel) -> JoinHandle<()> {
            tokio::spawn(async move {
                let _channel = channel;
                std::future::pending::<()>().await;
            })
        }
    }

    struct FakeChat {
        calls: AtomicUsize,
        fail: bool,
    }

    impl FakeChat {
        fn new(fail: bool) -> Self {
            Self {
                calls: AtomicUsize::new(0),
                fail,
            }
        }
    }

    #[async_trait]
    impl ChatModel for FakeChat {
        async fn reply(
            &self,
            _token: &str,
            history: &[ChatMessage],
        ) -> Result<String, SpeechError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            if self.fail {
                return Err(SpeechError::Chat("model unavailable".into()));
            }
            let last = history.last().expect("history never empty");
            Ok(format!("echo: {}", last.content))
        }
    }

    struct FakeSynth {
        calls: AtomicUsize,
    }

    impl FakeSynth {
        fn new() -> Self {
            Self {
                calls: AtomicUsize::new(0),
            }
        }
    }

    #[async_trait]
    impl Synthesizer for FakeSynth {
        async fn synthesize(&self, _token: &str, _text: &str) -> Result<Bytes, SpeechError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            Ok(Bytes::from_static(b"wav-bytes"))
        }
    }

    struct FixedTokens;

    #[async_trait]
    impl TokenSource for FixedTokens {
        async fn token(&self, _name: &str) -> Result<String> {
            Ok("test-token".into())
        }
    }

    fn orchestrator(
        recognizer: Arc<dyn RecognizerSpawner>,
        chat: Arc<FakeChat>,
        synth: Arc<FakeSynth>,
    ) -> Orchestrator {
        Orchestrator::new(
            "test-session".into(),
            recognizer,
            chat,
            synth,
            Arc::new(FixedTokens),
            "Ты — голосовой ассистент.",
        )
    }

    fn partial(text: &str) -> TranscriptEvent {
        TranscriptEvent {
            text: text.to_string(),
            is_final: false,
            eou_reason: None,
        }
    }

    fn final_event(text: &str) -> TranscriptEvent {
        TranscriptEvent {
            text: text.to_string(),
            is_final: true,
            eou_reason: Some("organic".to_string()),
        }
    }

    #[tokio::test]
    async fn silent_turn_ends_session_without_chat_or_synthesis() {
        let recognizer = Arc::new(ScriptedRecognizer::new(vec![vec![]]));
        let chat = Arc::new(FakeChat::new(false));
        let synth = Arc::new(FakeSynth::new());
        let orch = orchestrator(recognizer.clone(), chat.clone(), synth.clone());

        let (_caller_tx, caller_rx) = mpsc::channel(8);
        let (out_tx, mut out_rx) = mpsc::channel(8);

        orch.run(caller_rx, out_tx).await.unwrap();

        assert!(out_rx.try_recv().is_err(), "no frames for a silent turn");
        assert_eq!(recognizer.spawns.load(Ordering::SeqCst), 1);
        assert_eq!(chat.calls.load(Ordering::SeqCst), 0);
        assert_eq!(synth.calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn full_turn_streams_transcript_reply_and_audio() {
        let recognizer = Arc::new(ScriptedRecognizer::new(vec![
            vec![partial("прив"), final_event("привет")],
            vec![],
        ]));
        let chat = Arc::new(FakeChat::new(false));
        let synth = Arc::new(FakeSynth::new());
        let orch = orchestrator(recognizer.clone(), chat.clone(), synth.clone());

        let (caller_tx, caller_rx) = mpsc::channel(8);
        let (out_tx, mut out_rx) = mpsc::channel(8);

        let session = tokio::spawn(orch.run(caller_rx, out_tx));

        match out_rx.recv().await.unwrap() {
            Outbound::Message(ServerMessage::Transcription { status, text }) => {
                assert_eq!(status, TranscriptionStatus::Streaming);
                assert_eq!(text, "прив");
            }
            other => panic!("expected streaming transcription, got {other:?}"),
        }
        match out_rx.recv().await.unwrap() {
            Outbound::Message(ServerMessage::Transcription { status, text }) => {
                assert_eq!(status, TranscriptionStatus::Final);
                assert_eq!(text, "привет");
            }
            other => panic!("expected final transcription, got {other:?}"),
        }
        match out_rx.recv().await.unwrap() {
            Outbound::Message(ServerMessage::Response { text }) => {
                assert_eq!(text, "echo: привет");
            }
            other => panic!("expected response, got {other:?}"),
        }
        match out_rx.recv().await.unwrap() {
            Outbound::Audio(audio) => assert_eq!(audio.as_ref(), b"wav-bytes"),
            other => panic!("expected audio, got {other:?}"),
        }

        // Acknowledge playback; the second, silent turn ends the session.
        caller_tx
            .send(ClientEvent::PlaybackFinished)
            .await
            .unwrap();
        session.await.unwrap().unwrap();

        assert_eq!(recognizer.spawns.load(Ordering::SeqCst), 2);
        assert_eq!(chat.calls.load(Ordering::SeqCst), 1);
        assert_eq!(synth.calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn audio_before_playback_ack_is_discarded() {
        let recognizer = Arc::new(ScriptedRecognizer::new(vec![
            vec![final_event("да")],
            vec![],
        ]));
        let chat = Arc::new(FakeChat::new(false));
        let synth = Arc::new(FakeSynth::new());
        let orch = orchestrator(recognizer.clone(), chat.clone(), synth.clone());

        let (caller_tx, caller_rx) = mpsc::channel(8);
        let (out_tx, mut out_rx) = mpsc::channel(8);

        let session = tokio::spawn(orch.run(caller_rx, out_tx));

        // Drain the reply pipeline for the first turn.
        loop {
            match out_rx.recv().await.unwrap() {
                Outbound::Audio(_) => break,
                Outbound::Message(_) => {}
            }
        }

        // Stray audio before the ack must not start a new worker.
        caller_tx
            .send(ClientEvent::Audio(Bytes::from_static(b"stray")))
            .await
            .unwrap();
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert_eq!(recognizer.spawns.load(Ordering::SeqCst), 1);

        caller_tx
            .send(ClientEvent::PlaybackFinished)
            .await
            .unwrap();
        session.await.unwrap().unwrap();
        assert_eq!(recognizer.spawns.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn aborted_worker_cannot_leak_completion_into_next_turn() {
        // Each turn ends on a stream-side final-empty frame while the worker
        // is still alive, so its drop guard fires only on abort. The guard's
        // late completion signal must never survive into the next turn.
        let recognizer = Arc::new(GuardedRecognizer::new(vec![
            vec![partial("прив"), final_event("")],
            vec![final_event("ещё"), final_event("")],
            vec![final_event("")],
        ]));
        let chat = Arc::new(FakeChat::new(false));
        let synth = Arc::new(FakeSynth::new());
        let orch = orchestrator(recognizer.clone(), chat.clone(), synth.clone());

        let (caller_tx, caller_rx) = mpsc::channel(8);
        let (out_tx, mut out_rx) = mpsc::channel(8);

        let session = tokio::spawn(orch.run(caller_rx, out_tx));

        let mut responses = Vec::new();
        while let Some(frame) = out_rx.recv().await {
            match frame {
                Outbound::Message(ServerMessage::Response { text }) => responses.push(text),
                Outbound::Audio(_) => {
                    caller_tx
                        .send(ClientEvent::PlaybackFinished)
                        .await
                        .unwrap();
                }
                Outbound::Message(_) => {}
            }
        }
        session.await.unwrap().unwrap();

        // A leaked completion would have ended the session after one turn.
        assert_eq!(responses, vec!["echo: прив", "echo: ещё"]);
        assert_eq!(recognizer.spawns.load(Ordering::SeqCst), 3);
        assert_eq!(chat.calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn caller_disconnect_mid_turn_ends_session() {
        let chat = Arc::new(FakeChat::new(false));
        let synth = Arc::new(FakeSynth::new());
        let orch = orchestrator(Arc::new(HangingRecognizer), chat.clone(), synth.clone());

        let (caller_tx, caller_rx) = mpsc::channel(8);
        let (out_tx, _out_rx) = mpsc::channel(8);

        let session = tokio::spawn(orch.run(caller_rx, out_tx));
        drop(caller_tx);

        session.await.unwrap().unwrap();
        assert_eq!(chat.calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn chat_failure_fails_the_session_before_synthesis() {
        let recognizer = Arc::new(ScriptedRecognizer::new(vec![vec![final_event("привет")]]));
        let chat = Arc::new(FakeChat::new(true));
        let synth = Arc::new(FakeSynth::new());
        let orch = orchestrator(recognizer, chat.clone(), synth.clone());

        let (_caller_tx, caller_rx) = mpsc::channel(8);
        let (out_tx, mut out_rx) = mpsc::channel(8);

        let result = orch.run(caller_rx, out_tx).await;
        assert!(result.is_err());
        assert_eq!(synth.calls.load(Ordering::SeqCst), 0);

        // The final transcript still reached the caller before the failure.
        match out_rx.recv().await.unwrap() {
            Outbound::Message(ServerMessage::Transcription { status, .. }) => {
                assert_eq!(status, TranscriptionStatus::Final);
            }
            other => panic!("expected final transcription, got {other:?}"),
        }
    }
}
