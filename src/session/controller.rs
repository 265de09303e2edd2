//! The session controller state machine.
//!
//! One task owns the session state, the conversation log, the endpointer,
//! the active speech stream and the playback coordinator, and drives them
//! from a single `select!` loop. It is the sole component allowed to start
//! or stop the microphone and the speaker, so neither device ever has two
//! competing owners.
//!
//! Echo avoidance is structural: entering `Suspended` stops the speech
//! stream before a reply can be synthesized, and listening resumes only
//! after playback completion plus a guard delay, so the recognizer never
//! hears the assistant's own voice.

use crate::audio::playback::{PlaybackCoordinator, PlaybackEvent};
use crate::backend::Dispatcher;
use crate::config::SessionConfig;
use crate::error::{Result, SessionError};
use crate::runtime::SessionEvent;
use crate::session::endpointer::SilenceEndpointer;
use crate::session::messages::{
    ChatMessage, Reply, SessionCommand, SessionState, SpeechEvent, SpeechStreamItem, StreamFault,
};
use crate::speech::{SpeechCapability, SpeechStreamHandle};
use std::sync::Arc;
use tokio::sync::{broadcast, mpsc};
use tokio::task::JoinHandle;
use tokio::time::Instant as TokioInstant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

/// Broadcast capacity for session events. Observers that lag simply miss
/// intermediate previews.
const EVENT_CHANNEL_SIZE: usize = 64;

/// Per-turn failure copy appended to the conversation log.
fn turn_error_text(detail: &str) -> String {
    format!(
        "Lo siento, hubo un problema al procesar tu consulta: {detail}. \
         Por favor, intenta de nuevo."
    )
}

/// What a pending one-shot timer will do when it fires.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum PendingTimer {
    /// Reactivate the speech stream after the echo guard delay.
    ResumeListening,
    /// Restart the stream after a transient end-of-stream backoff.
    RestartStream,
}

/// Handle for issuing user commands to a running session and observing it.
#[derive(Clone)]
pub struct SessionHandle {
    cmd_tx: mpsc::UnboundedSender<SessionCommand>,
    events_tx: broadcast::Sender<SessionEvent>,
    cancel: CancellationToken,
}

impl SessionHandle {
    /// Begin continuous listening (`Idle -> Listening`).
    ///
    /// # Errors
    ///
    /// Returns a channel error if the session task is gone.
    pub fn start_voice(&self) -> Result<()> {
        self.send(SessionCommand::Start)
    }

    /// Stop listening and playback from any state (`-> Idle`).
    ///
    /// # Errors
    ///
    /// Returns a channel error if the session task is gone.
    pub fn stop_voice(&self) -> Result<()> {
        self.send(SessionCommand::Stop)
    }

    /// Dispatch a typed message, identical in semantics to a finalized
    /// utterance.
    ///
    /// # Errors
    ///
    /// Returns a channel error if the session task is gone.
    pub fn submit_text(&self, text: impl Into<String>) -> Result<()> {
        self.send(SessionCommand::SubmitText(text.into()))
    }

    /// Subscribe to session events.
    pub fn subscribe(&self) -> broadcast::Receiver<SessionEvent> {
        self.events_tx.subscribe()
    }

    /// Tear the whole session task down.
    pub fn shutdown(&self) {
        self.cancel.cancel();
    }

    fn send(&self, cmd: SessionCommand) -> Result<()> {
        self.cmd_tx
            .send(cmd)
            .map_err(|_| SessionError::Channel("session task is gone".into()))
    }
}

/// The orchestrating state machine for one continuous voice session.
pub struct SessionController {
    config: SessionConfig,
    speech: Arc<dyn SpeechCapability>,
    playback: PlaybackCoordinator,
    dispatcher: Arc<dyn Dispatcher>,
    state: SessionState,
    endpointer: SilenceEndpointer,
    /// Append-only conversation log. Never mutated after append.
    log: Vec<ChatMessage>,
    events_tx: broadcast::Sender<SessionEvent>,
    /// Next stream instance token, monotonically increasing.
    next_instance: u64,
    /// Token of the stream whose events are currently honored. `None` while
    /// no stream is live; items carrying any other token are ignored.
    live_instance: Option<u64>,
    active: Option<SpeechStreamHandle>,
    /// At most one turn is in flight at a time.
    in_flight: Option<JoinHandle<Result<Reply>>>,
    awaiting_playback: bool,
    stop_requested: bool,
    timer: Option<(TokioInstant, PendingTimer)>,
}

impl SessionController {
    /// Spawn a session controller task.
    ///
    /// `playback_events` is the receiving half of the channel the playback
    /// sink reports completions on (see
    /// [`crate::audio::playback_event_channel`]).
    pub fn spawn(
        config: SessionConfig,
        speech: Arc<dyn SpeechCapability>,
        playback: PlaybackCoordinator,
        playback_events: mpsc::UnboundedReceiver<PlaybackEvent>,
        dispatcher: Arc<dyn Dispatcher>,
    ) -> (SessionHandle, JoinHandle<()>) {
        let (cmd_tx, cmd_rx) = mpsc::unbounded_channel();
        let (events_tx, _) = broadcast::channel(EVENT_CHANNEL_SIZE);
        let cancel = CancellationToken::new();

        let endpointer = SilenceEndpointer::new(config.endpointing.quiet_period());
        let controller = Self {
            config,
            speech,
            playback,
            dispatcher,
            state: SessionState::Idle,
            endpointer,
            log: Vec::new(),
            events_tx: events_tx.clone(),
            next_instance: 0,
            live_instance: None,
            active: None,
            in_flight: None,
            awaiting_playback: false,
            stop_requested: false,
            timer: None,
        };

        let handle = SessionHandle {
            cmd_tx,
            events_tx,
            cancel: cancel.clone(),
        };
        let task = tokio::spawn(controller.run(cmd_rx, playback_events, cancel));
        (handle, task)
    }

    async fn run(
        mut self,
        mut cmd_rx: mpsc::UnboundedReceiver<SessionCommand>,
        mut playback_rx: mpsc::UnboundedReceiver<PlaybackEvent>,
        cancel: CancellationToken,
    ) {
        info!("session controller running");
        let mut playback_closed = false;

        loop {
            let silence_deadline = if self.state == SessionState::Listening {
                self.endpointer.deadline().map(TokioInstant::from_std)
            } else {
                None
            };
            let timer_deadline = self.timer.map(|(at, _)| at);

            tokio::select! {
                () = cancel.cancelled() => break,

                cmd = cmd_rx.recv() => {
                    match cmd {
                        Some(cmd) => self.handle_command(cmd),
                        // All handles dropped: nothing can drive us anymore.
                        None => break,
                    }
                }

                item = next_stream_item(&mut self.active) => {
                    match item {
                        Some(item) => self.handle_stream_item(item),
                        // Producer went away without a terminal item.
                        None => self.active = None,
                    }
                }

                () = sleep_until_opt(silence_deadline) => {
                    self.finalize_utterance();
                }

                () = sleep_until_opt(timer_deadline) => {
                    self.handle_timer();
                }

                result = join_turn(&mut self.in_flight) => {
                    self.in_flight = None;
                    self.handle_reply(result);
                }

                ev = playback_rx.recv(), if !playback_closed => {
                    match ev {
                        Some(ev) => self.handle_playback_event(ev),
                        None => {
                            playback_closed = true;
                            self.handle_playback_event(PlaybackEvent::Failed(
                                "audio sink is gone".into(),
                            ));
                        }
                    }
                }
            }
        }

        self.teardown();
    }

    fn handle_command(&mut self, cmd: SessionCommand) {
        match cmd {
            SessionCommand::Start => {
                if self.state != SessionState::Idle {
                    debug!(state = ?self.state, "ignoring start command");
                    return;
                }
                self.stop_requested = false;
                self.start_stream();
            }
            SessionCommand::Stop => self.user_stop(),
            SessionCommand::SubmitText(text) => {
                if self.state != SessionState::Listening {
                    debug!(state = ?self.state, "ignoring typed message");
                    return;
                }
                let text = text.trim().to_owned();
                if text.is_empty() {
                    return;
                }
                self.begin_turn(text);
            }
        }
    }

    /// Start a fresh stream instance. On success the session is
    /// `Listening`; on failure the fault is surfaced and the session is
    /// `Idle`.
    fn start_stream(&mut self) {
        let instance = self.next_instance;
        self.next_instance += 1;
        self.endpointer.clear();

        match self.speech.start(&self.config.recognition, instance) {
            Ok(handle) => {
                self.active = Some(handle);
                self.live_instance = Some(instance);
                self.set_state(SessionState::Listening);
                info!(instance, "speech stream active");
            }
            Err(e) => {
                error!("failed to start speech stream: {e}");
                self.emit(SessionEvent::Fault(e.to_string()));
                self.active = None;
                self.live_instance = None;
                self.set_state(SessionState::Idle);
            }
        }
    }

    fn handle_stream_item(&mut self, item: SpeechStreamItem) {
        match item {
            SpeechStreamItem::Event(ev) => self.handle_speech_event(ev),
            SpeechStreamItem::Ended { instance, fault } => {
                // Whatever ended, the handle that yielded this item is done.
                self.active = None;

                if self.live_instance != Some(instance) {
                    debug!(instance, "superseded stream torn down");
                    return;
                }
                self.live_instance = None;

                match fault {
                    // Transient: restart after a short backoff, staying in
                    // Listening. A clean engine-initiated end (platform
                    // silence limit) is treated the same way.
                    Some(StreamFault::NoSpeechTimeout) | None => {
                        if self.stop_requested || self.state != SessionState::Listening {
                            return;
                        }
                        info!("speech stream ended without speech, scheduling restart");
                        self.timer = Some((
                            TokioInstant::now() + self.config.controller.restart_backoff(),
                            PendingTimer::RestartStream,
                        ));
                    }
                    // Session-ending: surface the fault, user must restart.
                    Some(StreamFault::DeviceError(reason)) => {
                        self.end_session_on_fault(format!("microphone error: {reason}"));
                    }
                    Some(StreamFault::Fatal(reason)) => {
                        self.end_session_on_fault(format!("recognition error: {reason}"));
                    }
                }
            }
        }
    }

    fn handle_speech_event(&mut self, ev: SpeechEvent) {
        // Stale-instance rule: only the live stream's events count. This is
        // checked by token, not by state, so callbacks racing a stop are
        // dropped deterministically.
        if self.state != SessionState::Listening || self.live_instance != Some(ev.instance) {
            debug!(
                instance = ev.instance,
                "ignoring event from superseded stream"
            );
            return;
        }

        let now = TokioInstant::now().into_std();
        self.endpointer.ingest(&ev, now);
        self.emit(SessionEvent::Preview(self.endpointer.preview_line()));
    }

    fn end_session_on_fault(&mut self, fault: String) {
        error!("{fault}");
        self.emit(SessionEvent::Fault(fault));
        self.timer = None;
        self.endpointer.clear();
        self.emit(SessionEvent::Preview(String::new()));
        self.set_state(SessionState::Idle);
    }

    /// The silence deadline elapsed: emit at most one utterance.
    fn finalize_utterance(&mut self) {
        let now = TokioInstant::now().into_std();
        if let Some(utterance) = self.endpointer.take_due(now) {
            info!("utterance finalized: \"{}\"", utterance.text);
            self.begin_turn(utterance.text);
        }
    }

    /// `Listening -> Suspended`: stop the microphone, record the user
    /// message and dispatch the turn.
    fn begin_turn(&mut self, text: String) {
        // Suspend recognition first so the synthesized reply cannot be
        // transcribed. The stopped stream keeps draining until its Ended
        // item arrives; the token check drops anything it still delivers.
        if let Some(handle) = &self.active {
            handle.stop();
        }
        self.live_instance = None;
        self.endpointer.clear();
        self.emit(SessionEvent::Preview(String::new()));
        self.set_state(SessionState::Suspended);

        self.append(ChatMessage::user(text.clone()));

        let dispatcher = Arc::clone(&self.dispatcher);
        self.in_flight = Some(tokio::spawn(
            async move { dispatcher.dispatch(&text).await },
        ));
    }

    fn handle_reply(&mut self, result: Result<Reply>) {
        match result {
            Ok(reply) => {
                let has_audio = reply.audio_clip.is_some();
                if let Some(ref tts_error) = reply.tts_error {
                    warn!("reply arrived without audio: {tts_error}");
                }
                self.append(ChatMessage::assistant(
                    reply.response_text.clone(),
                    has_audio,
                    reply.used_knowledge_base,
                ));

                if self.stop_requested || self.state != SessionState::Suspended {
                    debug!("session stopped during turn; reply audio not played");
                    return;
                }

                match reply.audio_clip {
                    Some(clip) => match self.playback.play(clip) {
                        Ok(()) => self.awaiting_playback = true,
                        Err(e) => {
                            // Playback did not happen: resume immediately.
                            warn!("reply playback unavailable: {e}");
                            self.schedule_resume(false);
                        }
                    },
                    // No clip: skip playback, still keep the echo guard
                    // between the turn and re-listening.
                    None => self.schedule_resume(true),
                }
            }
            Err(e) => {
                error!("turn failed: {e}");
                self.append(ChatMessage::turn_error(turn_error_text(&e.user_detail())));

                if self.stop_requested || self.state != SessionState::Suspended {
                    return;
                }
                // No audio to wait for: go straight back to listening.
                self.schedule_resume(true);
            }
        }
    }

    fn handle_playback_event(&mut self, ev: PlaybackEvent) {
        if !self.awaiting_playback {
            debug!(?ev, "playback event outside an active turn");
            return;
        }
        self.awaiting_playback = false;

        if self.stop_requested || self.state != SessionState::Suspended {
            return;
        }

        match ev {
            PlaybackEvent::Finished | PlaybackEvent::Stopped => self.schedule_resume(true),
            PlaybackEvent::Failed(reason) => {
                // Treated as "playback did not happen": no echo to guard
                // against, resume immediately.
                warn!("playback failed: {reason}");
                self.schedule_resume(false);
            }
        }
    }

    /// Arm the resume timer, with or without the echo guard delay.
    fn schedule_resume(&mut self, with_guard: bool) {
        let delay = if with_guard {
            self.config.controller.guard_delay()
        } else {
            std::time::Duration::ZERO
        };
        self.timer = Some((TokioInstant::now() + delay, PendingTimer::ResumeListening));
    }

    fn handle_timer(&mut self) {
        let Some((_, kind)) = self.timer.take() else {
            return;
        };
        match kind {
            PendingTimer::ResumeListening => {
                if self.stop_requested || self.state != SessionState::Suspended {
                    return;
                }
                self.start_stream();
            }
            PendingTimer::RestartStream => {
                if self.stop_requested || self.state != SessionState::Listening {
                    return;
                }
                self.start_stream();
            }
        }
    }

    /// `userStop`: cancel timers, stop the stream, stop playback, discard
    /// buffered transcript, in that order. Safe from any state. An
    /// in-flight turn still completes and its message is appended, but no
    /// audio is played and the session stays idle.
    fn user_stop(&mut self) {
        debug!("user stop requested");
        self.stop_requested = true;
        self.timer = None;
        if let Some(handle) = &self.active {
            handle.stop();
        }
        self.live_instance = None;
        self.playback.stop();
        self.awaiting_playback = false;
        self.endpointer.clear();
        self.emit(SessionEvent::Preview(String::new()));
        self.set_state(SessionState::Idle);
    }

    fn teardown(&mut self) {
        if let Some(handle) = &self.active {
            handle.stop();
        }
        self.active = None;
        self.live_instance = None;
        if let Some(task) = self.in_flight.take() {
            task.abort();
        }
        self.playback.stop();
        info!("session controller stopped");
    }

    fn set_state(&mut self, state: SessionState) {
        if self.state != state {
            info!(from = ?self.state, to = ?state, "session state changed");
            self.state = state;
            self.emit(SessionEvent::StateChanged(state));
        }
    }

    fn append(&mut self, message: ChatMessage) {
        self.emit(SessionEvent::MessageAppended(message.clone()));
        self.log.push(message);
    }

    fn emit(&self, event: SessionEvent) {
        // Best-effort: observers may be absent or lagging.
        let _ = self.events_tx.send(event);
    }
}

/// Receive from the active stream, or park when no stream is live.
async fn next_stream_item(active: &mut Option<SpeechStreamHandle>) -> Option<SpeechStreamItem> {
    match active {
        Some(handle) => handle.next_item().await,
        None => std::future::pending().await,
    }
}

/// Await the in-flight turn, or park when none is pending.
async fn join_turn(task: &mut Option<JoinHandle<Result<Reply>>>) -> Result<Reply> {
    match task {
        Some(handle) => match handle.await {
            Ok(result) => result,
            Err(e) => Err(SessionError::Channel(format!("turn task failed: {e}"))),
        },
        None => std::future::pending().await,
    }
}

/// Sleep until the given deadline, or park when there is none.
async fn sleep_until_opt(deadline: Option<TokioInstant>) {
    match deadline {
        Some(at) => tokio::time::sleep_until(at).await,
        None => std::future::pending().await,
    }
}
