//! Live session events over Server-Sent Events and WebSocket.
//!
//! The session manager publishes a [`SessionEvent`] after every committed
//! transition. Each session has its own broadcast channel in the
//! [`StreamHub`]; clients only see events published after they attach.
//!
//! # Event Types
//!
//! - `question` - A new question is open
//! - `feedback` - An answer was analyzed
//! - `complete` - The session reached `Completed` or `Stopped`
//! - `error` - A request failed mid-interview
//!
//! Over WebSocket, clients may also send commands (`submit_answer`,
//! `next_question`, `stop`). A failed command is answered with a `rejected`
//! frame addressed only to that client.

use std::collections::HashMap;
use std::convert::Infallible;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use axum::{
    extract::{
        ws::{Message, WebSocket},
        Path, State, WebSocketUpgrade,
    },
    response::{
        sse::{Event, KeepAlive, Sse},
        IntoResponse, Response,
    },
};
use futures::{SinkExt, Stream, StreamExt};
use parley_gateway::{Difficulty, FinalFeedback};
use serde::{Deserialize, Serialize};
use tokio::sync::{broadcast, mpsc};
use tokio::time::interval;
use tracing::{debug, info, warn};

use crate::api::{ApiError, AppState, Caller};
use crate::config::DisconnectPolicy;
use crate::error::{ErrorKind, ParleyError};
use crate::manager::SessionManager;
use crate::session::SessionStatus;

// ============================================================================
// Event Payloads
// ============================================================================

/// Payload for the `question` event.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct QuestionPayload {
    /// Session the question belongs to.
    pub session_id: String,
    /// 1-based question number.
    pub question_number: u32,
    /// Questions in a complete interview.
    pub total_questions: u32,
    /// Question text.
    pub question: String,
    /// Question level.
    pub difficulty: Difficulty,
    /// Spoken question, when speech is enabled.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub audio_url: Option<String>,
}

/// Payload for the `feedback` event.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct FeedbackPayload {
    /// Session the answer belongs to.
    pub session_id: String,
    /// Number of the answered question.
    pub question_number: u32,
    /// Feedback on the answer.
    pub feedback: String,
}

/// Payload for the `complete` event.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CompletePayload {
    /// Session that ended.
    pub session_id: String,
    /// `Completed` or `Stopped`.
    pub status: SessionStatus,
    /// Final feedback recorded with the transition.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub final_feedback: Option<FinalFeedback>,
}

/// Payload for the `error` event.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ErrorPayload {
    /// Session the failure concerns.
    pub session_id: String,
    /// Error category, as in HTTP error bodies.
    pub kind: ErrorKind,
    /// Human-readable message.
    pub message: String,
}

// ============================================================================
// SessionEvent
// ============================================================================

/// Event delivered to stream subscribers, serialized with a `type` tag.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum SessionEvent {
    /// A new question is open.
    Question(QuestionPayload),
    /// An answer was analyzed.
    Feedback(FeedbackPayload),
    /// The session ended.
    Complete(CompletePayload),
    /// A request failed.
    Error(ErrorPayload),
}

impl SessionEvent {
    /// Creates an `Error` event mirroring `err`.
    #[must_use]
    pub fn error(session_id: impl Into<String>, err: &ParleyError) -> Self {
        Self::Error(ErrorPayload {
            session_id: session_id.into(),
            kind: err.kind(),
            message: err.to_string(),
        })
    }

    /// Returns the event name.
    #[must_use]
    pub const fn event_name(&self) -> &'static str {
        match self {
            Self::Question(_) => "question",
            Self::Feedback(_) => "feedback",
            Self::Complete(_) => "complete",
            Self::Error(_) => "error",
        }
    }

    /// Returns `true` for events that end a stream.
    #[must_use]
    pub const fn is_final(&self) -> bool {
        matches!(self, Self::Complete(_) | Self::Error(_))
    }
}

// ============================================================================
// StreamHub
// ============================================================================

/// Per-session broadcast channels.
///
/// Channels are created on first subscription and dropped when the session
/// ends or the last subscriber goes away.
#[derive(Debug)]
pub struct StreamHub {
    capacity: usize,
    channels: Mutex<HashMap<String, broadcast::Sender<SessionEvent>>>,
}

impl StreamHub {
    /// Creates a hub whose channels buffer `capacity` events per subscriber.
    #[must_use]
    pub fn new(capacity: usize) -> Self {
        Self {
            capacity: capacity.max(1),
            channels: Mutex::new(HashMap::new()),
        }
    }

    /// Subscribes to events published from now on.
    #[must_use]
    pub fn subscribe(&self, session_id: &str) -> broadcast::Receiver<SessionEvent> {
        let mut channels = self.channels.lock().unwrap_or_else(PoisonError::into_inner);
        channels
            .entry(session_id.to_string())
            .or_insert_with(|| broadcast::channel(self.capacity).0)
            .subscribe()
    }

    /// Publishes an event, returning how many subscribers will receive it.
    pub fn publish(&self, session_id: &str, event: SessionEvent) -> usize {
        let mut channels = self.channels.lock().unwrap_or_else(PoisonError::into_inner);
        let Some(sender) = channels.get(session_id) else {
            return 0;
        };
        let delivered = sender.send(event).unwrap_or(0);
        if delivered == 0 {
            channels.remove(session_id);
        }
        delivered
    }

    /// Drops the session's channel. Subscribers drain buffered events, then
    /// see the stream end.
    pub fn close(&self, session_id: &str) {
        self.channels
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(session_id);
    }

    /// Drops the session's channel if nobody is subscribed to it.
    pub fn release(&self, session_id: &str) {
        let mut channels = self.channels.lock().unwrap_or_else(PoisonError::into_inner);
        if channels
            .get(session_id)
            .is_some_and(|sender| sender.receiver_count() == 0)
        {
            channels.remove(session_id);
        }
    }

    /// Number of attached subscribers for a session.
    #[must_use]
    pub fn receiver_count(&self, session_id: &str) -> usize {
        self.channels
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .get(session_id)
            .map_or(0, broadcast::Sender::receiver_count)
    }
}

#[cfg(test)]
impl StreamHub {
    pub(crate) fn channel_count(&self) -> usize {
        self.channels
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }
}

impl Default for StreamHub {
    fn default() -> Self {
        Self::new(100)
    }
}

// ============================================================================
// Disconnect handling
// ============================================================================

/// Applies the disconnect policy when a stream is dropped before it ended.
struct DisconnectGuard {
    manager: Arc<SessionManager>,
    session_id: String,
    candidate_id: String,
    finished: bool,
}

impl Drop for DisconnectGuard {
    fn drop(&mut self) {
        if self.finished || self.manager.disconnect_policy() == DisconnectPolicy::Keep {
            return;
        }
        let Ok(handle) = tokio::runtime::Handle::try_current() else {
            return;
        };
        let manager = Arc::clone(&self.manager);
        let session_id = std::mem::take(&mut self.session_id);
        let candidate_id = std::mem::take(&mut self.candidate_id);
        handle.spawn(async move {
            manager.handle_disconnect(&session_id, &candidate_id).await;
        });
    }
}

// ============================================================================
// SSE Handler
// ============================================================================

/// Handler for `GET /sessions/:id/stream`.
pub async fn sse_handler(
    State(state): State<Arc<AppState>>,
    Path(session_id): Path<String>,
    caller: Caller,
) -> Result<Sse<impl Stream<Item = Result<Event, Infallible>>>, ApiError> {
    let events = state
        .manager
        .open_stream(&session_id, &caller.candidate_id)
        .await?;
    info!(session_id = %session_id, "SSE client attached");
    let heartbeat = Duration::from_secs(state.config.stream.heartbeat_secs.max(1));

    let guard = DisconnectGuard {
        manager: Arc::clone(&state.manager),
        session_id,
        candidate_id: caller.candidate_id,
        finished: false,
    };

    let stream = async_stream::stream! {
        // Owned by the stream so the policy runs when the client goes away.
        let mut guard = guard;
        let mut events = events;
        while let Some(event) = events.next().await {
            let is_final = event.is_final();
            match Event::default().event(event.event_name()).json_data(&event) {
                Ok(frame) => yield Ok(frame),
                Err(e) => warn!(error = %e, "Failed to serialize event"),
            }
            if is_final {
                break;
            }
        }
        guard.finished = true;
    };

    // Keep-alive writes also surface dropped clients to the disconnect guard.
    Ok(Sse::new(stream).keep_alive(KeepAlive::new().interval(heartbeat)))
}

// ============================================================================
// WebSocket Handler
// ============================================================================

/// Maximum number of missed pong responses before disconnecting.
const MAX_MISSED_PONGS: u8 = 3;

/// Commands a WebSocket client may send.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case", rename_all_fields = "camelCase")]
pub enum ClientCommand {
    /// Answer the open question.
    SubmitAnswer {
        /// Answer text.
        answer: String,
        /// Question being answered.
        #[serde(default)]
        question_number: Option<u32>,
    },
    /// Retry generation of an owed question.
    NextQuestion,
    /// Stop the interview.
    Stop,
}

/// Frame sent to a single client whose command failed.
#[derive(Debug, Clone, Serialize)]
struct RejectedFrame {
    #[serde(rename = "type")]
    frame_type: &'static str,
    kind: ErrorKind,
    error: String,
}

impl RejectedFrame {
    fn new(err: &ParleyError) -> Self {
        Self {
            frame_type: "rejected",
            kind: err.kind(),
            error: err.to_string(),
        }
    }
}

/// Handler for `GET /sessions/:id/ws`.
pub async fn ws_handler(
    ws: WebSocketUpgrade,
    State(state): State<Arc<AppState>>,
    Path(session_id): Path<String>,
    caller: Caller,
) -> Response {
    match state
        .manager
        .open_stream(&session_id, &caller.candidate_id)
        .await
    {
        Ok(events) => {
            info!(session_id = %session_id, "New WebSocket connection request");
            let heartbeat = Duration::from_secs(state.config.stream.heartbeat_secs.max(1));
            ws.on_upgrade(move |socket| {
                handle_socket(
                    socket,
                    Arc::clone(&state.manager),
                    session_id,
                    caller.candidate_id,
                    events,
                    heartbeat,
                )
            })
        }
        Err(err) => ApiError::from(err).into_response(),
    }
}

async fn handle_socket(
    socket: WebSocket,
    manager: Arc<SessionManager>,
    session_id: String,
    candidate_id: String,
    mut events: futures::stream::BoxStream<'static, SessionEvent>,
    heartbeat: Duration,
) {
    let (mut sender, mut receiver) = socket.split();
    let (reject_tx, mut reject_rx) = mpsc::channel::<RejectedFrame>(8);

    let mut heartbeat_interval = interval(heartbeat);
    heartbeat_interval.tick().await;
    let mut missed_pongs = 0u8;
    let mut finished = false;

    loop {
        tokio::select! {
            msg = receiver.next() => {
                match msg {
                    Some(Ok(Message::Text(text))) => {
                        dispatch_command(&text, &manager, &session_id, &candidate_id, &reject_tx);
                    }
                    Some(Ok(Message::Pong(_))) => {
                        missed_pongs = 0;
                        debug!("Received pong from client");
                    }
                    Some(Ok(Message::Ping(data))) => {
                        if sender.send(Message::Pong(data)).await.is_err() {
                            debug!("Failed to send pong, client disconnected");
                            break;
                        }
                    }
                    Some(Ok(Message::Binary(_))) => {
                        debug!("Ignoring binary message from client");
                    }
                    Some(Ok(Message::Close(_))) => {
                        info!("Client requested close");
                        break;
                    }
                    Some(Err(e)) => {
                        debug!("WebSocket error: {}", e);
                        break;
                    }
                    None => {
                        debug!("WebSocket stream ended");
                        break;
                    }
                }
            }

            event = events.next() => {
                let Some(event) = event else {
                    finished = true;
                    break;
                };
                let is_final = event.is_final();
                match serde_json::to_string(&event) {
                    Ok(json) => {
                        if sender.send(Message::Text(json)).await.is_err() {
                            debug!("Failed to send event, client disconnected");
                            break;
                        }
                    }
                    Err(e) => warn!("Failed to serialize event: {}", e),
                }
                if is_final {
                    finished = true;
                    let _ = sender.send(Message::Close(None)).await;
                    break;
                }
            }

            Some(frame) = reject_rx.recv() => {
                if let Ok(json) = serde_json::to_string(&frame) {
                    if sender.send(Message::Text(json)).await.is_err() {
                        break;
                    }
                }
            }

            _ = heartbeat_interval.tick() => {
                if sender.send(Message::Ping(vec![])).await.is_err() {
                    debug!("Failed to send ping, client disconnected");
                    break;
                }
                missed_pongs += 1;
                if missed_pongs >= MAX_MISSED_PONGS {
                    info!("Client missed {} pongs, closing connection", MAX_MISSED_PONGS);
                    break;
                }
            }
        }
    }

    drop(events);
    if !finished {
        manager.handle_disconnect(&session_id, &candidate_id).await;
    }
    info!(session_id = %session_id, "WebSocket client disconnected");
}

/// Runs a client command in the background; successes surface as events.
fn dispatch_command(
    text: &str,
    manager: &Arc<SessionManager>,
    session_id: &str,
    candidate_id: &str,
    reject_tx: &mpsc::Sender<RejectedFrame>,
) {
    let command = match serde_json::from_str::<ClientCommand>(text) {
        Ok(command) => command,
        Err(e) => {
            let err = ParleyError::validation(format!("invalid command: {e}"));
            let _ = reject_tx.try_send(RejectedFrame::new(&err));
            return;
        }
    };

    debug!(session_id = %session_id, ?command, "Received client command");
    let manager = Arc::clone(manager);
    let session_id = session_id.to_string();
    let candidate_id = candidate_id.to_string();
    let reject_tx = reject_tx.clone();

    tokio::spawn(async move {
        let result = match command {
            ClientCommand::SubmitAnswer {
                answer,
                question_number,
            } => manager
                .submit_answer(&session_id, &candidate_id, &answer, question_number)
                .await
                .map(drop),
            ClientCommand::NextQuestion => manager
                .advance_session(&session_id, &candidate_id)
                .await
                .map(drop),
            ClientCommand::Stop => manager
                .stop_session(&session_id, &candidate_id)
                .await
                .map(drop),
        };
        if let Err(err) = result {
            let _ = reject_tx.send(RejectedFrame::new(&err)).await;
        }
    });
}
