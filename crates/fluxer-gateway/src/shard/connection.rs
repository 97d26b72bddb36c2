//! Shard connection
//!
//! One [`ShardConnection`] owns one gateway socket at a time. A supervisor
//! task drives it through connect, Hello, Identify or Resume and READY, runs
//! the read loop inline, and on disconnect decides whether to resume,
//! identify again or stop. Per socket it spawns a writer task and a
//! heartbeat task, both bound to a child cancellation token.

use super::heartbeat::{first_beat_delay, HeartbeatState};
use super::{ConnectionState, DisconnectReason, SessionState, ShardDescriptor};
use crate::config::{GatewayConfig, SendPolicy};
use crate::error::{FatalError, FatalKind, GatewayError, GatewayResult, TransportError};
use crate::events::{DispatchEvent, GatewayEvent, GatewayEventType};
use crate::handler::{EventHandler, ShardEvent};
use crate::protocol::{
    CloseClassification, DispatchFrame, GatewayMessage, IdentifyPayload, InboundFrame, OpCode,
    PresenceUpdatePayload, RequestGuildMembersPayload, ResumePayload, VoiceStateUpdatePayload,
};
use crate::ratelimit::{CommandRateLimiter, IdentifyLimiter, RateBudget};
use crate::transport::{gateway_url, Connector, Frame, FrameDecoder, FrameSink, FrameStream};
use parking_lot::{Mutex, RwLock};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, watch};
use tokio::task::{AbortHandle, JoinHandle};
use tokio::time::{Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::Instrument;

/// Queued caller commands per socket
const COMMAND_BUFFER: usize = 64;

/// Queued heartbeat / handshake frames per socket
const PRIORITY_BUFFER: usize = 8;

/// Upper bound for our side of the close handshake
const CLOSE_TIMEOUT: Duration = Duration::from_secs(5);

/// A single gateway shard
pub struct ShardConnection {
    descriptor: ShardDescriptor,
    config: Arc<GatewayConfig>,
    connector: Arc<dyn Connector>,
    identify: Arc<dyn IdentifyLimiter>,
    handler: Arc<dyn EventHandler>,

    state: watch::Sender<ConnectionState>,

    /// Snapshot of the supervisor's session, refreshed on every change
    session: RwLock<SessionState>,

    /// Presence advertised in the next Identify
    presence: Mutex<Option<PresenceUpdatePayload>>,

    limiter: CommandRateLimiter,
    heartbeat: Mutex<HeartbeatState>,

    /// Command queue of the live socket, present only while `Connected`
    commands: Mutex<Option<mpsc::Sender<String>>>,

    cancel: CancellationToken,
    task: Mutex<Option<JoinHandle<()>>>,
    abort: Mutex<Option<AbortHandle>>,
    failure: Mutex<Option<FatalError>>,

    /// Reason sent in the close frame of a caller-initiated close
    close_reason: Mutex<Option<String>>,
}

/// Result of one socket lifetime
struct SocketOutcome {
    reason: DisconnectReason,
    /// READY or RESUMED was reached on this socket
    connected: bool,
}

/// Per-socket handles used by the read loop
struct SocketContext {
    cancel: CancellationToken,
    priority: mpsc::Sender<String>,
    commands: mpsc::Sender<String>,
    control: mpsc::Sender<DisconnectReason>,
    decoder: Box<dyn FrameDecoder>,
    resume: bool,
    connected: bool,
    heartbeat_task: Option<JoinHandle<()>>,
}

impl ShardConnection {
    #[must_use]
    pub fn new(
        descriptor: ShardDescriptor,
        config: Arc<GatewayConfig>,
        connector: Arc<dyn Connector>,
        identify: Arc<dyn IdentifyLimiter>,
        handler: Arc<dyn EventHandler>,
    ) -> Arc<Self> {
        let (state, _) = watch::channel(ConnectionState::Disconnected);
        let session = config.session.clone().unwrap_or_default();
        let presence = config.presence.clone();
        let limiter = CommandRateLimiter::from_config(&config.rate_limit);

        Arc::new(Self {
            descriptor,
            config,
            connector,
            identify,
            handler,
            state,
            session: RwLock::new(session),
            presence: Mutex::new(presence),
            limiter,
            heartbeat: Mutex::new(HeartbeatState::default()),
            commands: Mutex::new(None),
            cancel: CancellationToken::new(),
            task: Mutex::new(None),
            abort: Mutex::new(None),
            failure: Mutex::new(None),
            close_reason: Mutex::new(None),
        })
    }

    // === Accessors ===

    #[must_use]
    pub fn descriptor(&self) -> ShardDescriptor {
        self.descriptor
    }

    #[must_use]
    pub fn shard_id(&self) -> u32 {
        self.descriptor.shard_id()
    }

    #[must_use]
    pub fn state(&self) -> ConnectionState {
        *self.state.borrow()
    }

    /// Watch state transitions
    #[must_use]
    pub fn subscribe_state(&self) -> watch::Receiver<ConnectionState> {
        self.state.subscribe()
    }

    /// Current session, e.g. to persist it for a later resume
    #[must_use]
    pub fn session(&self) -> SessionState {
        self.session.read().clone()
    }

    /// Round trip of the last acknowledged heartbeat
    #[must_use]
    pub fn latency(&self) -> Option<Duration> {
        self.heartbeat.lock().latency()
    }

    /// Presence the next Identify will carry
    #[must_use]
    pub fn presence(&self) -> Option<PresenceUpdatePayload> {
        self.presence.lock().clone()
    }

    #[must_use]
    pub fn rate_budget(&self) -> RateBudget {
        self.limiter.budget()
    }

    /// Terminal error, once the shard has failed
    #[must_use]
    pub fn failure(&self) -> Option<FatalError> {
        self.failure.lock().clone()
    }

    // === Lifecycle ===

    /// Start the shard and wait until it is `Connected`.
    ///
    /// Transient failures are retried in the background; only a terminal
    /// failure or a concurrent `close` returns an error. Calling `open` on a
    /// running shard just waits for it to connect.
    pub async fn open(self: &Arc<Self>) -> GatewayResult<()> {
        self.config.validate()?;

        {
            let mut task = self.task.lock();
            if task.is_none() && self.state() != ConnectionState::Closed {
                if self.cancel.is_cancelled() {
                    return Err(GatewayError::Closing);
                }
                let span = tracing::info_span!(
                    "shard",
                    shard_id = self.descriptor.shard_id(),
                    shard_count = self.descriptor.shard_count()
                );
                let handle = tokio::spawn(Arc::clone(self).run().instrument(span));
                *self.abort.lock() = Some(handle.abort_handle());
                *task = Some(handle);
            }
        }

        let mut rx = self.state.subscribe();
        let state = *rx
            .wait_for(|s| matches!(s, ConnectionState::Connected | ConnectionState::Closed))
            .await
            .map_err(|_| GatewayError::Closing)?;

        if state == ConnectionState::Closed {
            return Err(self.failure().map_or(GatewayError::Closing, GatewayError::Fatal));
        }
        Ok(())
    }

    /// Close the shard and wait until it is `Closed`. Idempotent.
    pub async fn close(&self) {
        self.close_with_reason(DisconnectReason::Local.to_string()).await;
    }

    /// Close with code 1000 and `reason` in the close frame. Only the first
    /// close of a shard picks the reason.
    pub async fn close_with_reason(&self, reason: impl Into<String>) {
        {
            let mut close_reason = self.close_reason.lock();
            if close_reason.is_none() {
                *close_reason = Some(reason.into());
            }
        }
        self.cancel.cancel();

        let task = self.task.lock().take();
        let never_opened = self.abort.lock().is_none();
        match task {
            Some(handle) => {
                if handle.await.is_err() {
                    // Aborted or panicked before reaching `Closed` itself
                    self.state.send_replace(ConnectionState::Closed);
                }
            }
            None if never_opened => {
                self.state.send_replace(ConnectionState::Closed);
            }
            None => {}
        }

        let mut rx = self.state.subscribe();
        let _ = rx.wait_for(|s| *s == ConnectionState::Closed).await;
    }

    /// Stop the shard immediately without a close handshake
    pub fn abort(&self) {
        self.cancel.cancel();
        if let Some(handle) = self.abort.lock().as_ref() {
            handle.abort();
        }
        *self.commands.lock() = None;
        self.state.send_replace(ConnectionState::Closed);
    }

    // === Sending ===

    /// Send a caller command, honoring the configured [`SendPolicy`].
    ///
    /// Heartbeat, Identify and Resume are reserved for the connection itself.
    pub async fn send(&self, message: GatewayMessage) -> GatewayResult<()> {
        self.check_sendable(message.op)?;
        let json = message.to_json()?;

        match self.config.send_policy {
            SendPolicy::Block => {
                tokio::select! {
                    () = self.cancel.cancelled() => return Err(GatewayError::Closing),
                    acquired = self.limiter.acquire(1) => acquired?,
                }
            }
            SendPolicy::NonBlocking => self.limiter.try_acquire(1)?,
        }

        let tx = self.command_sender()?;
        tokio::select! {
            () = self.cancel.cancelled() => Err(GatewayError::Closing),
            sent = tx.send(json) => sent.map_err(|_| GatewayError::NotConnected),
        }?;

        tracing::trace!(shard_id = self.shard_id(), op = %message.op, "Command queued");
        Ok(())
    }

    /// Send a caller command without waiting for budget or queue space
    pub fn try_send(&self, message: GatewayMessage) -> GatewayResult<()> {
        self.check_sendable(message.op)?;
        let json = message.to_json()?;
        self.limiter.try_acquire(1)?;

        self.command_sender()?.try_send(json).map_err(|e| match e {
            mpsc::error::TrySendError::Full(_) => {
                GatewayError::Transport(TransportError::Send("command queue full".to_string()))
            }
            mpsc::error::TrySendError::Closed(_) => GatewayError::NotConnected,
        })
    }

    /// Update presence now and remember it for future Identify frames
    pub async fn update_presence(&self, presence: PresenceUpdatePayload) -> GatewayResult<()> {
        let message = GatewayMessage::presence_update(&presence)?;
        *self.presence.lock() = Some(presence);
        self.send(message).await
    }

    pub async fn update_voice_state(&self, payload: VoiceStateUpdatePayload) -> GatewayResult<()> {
        self.send(GatewayMessage::voice_state_update(&payload)?).await
    }

    /// Request guild members; returns the nonce that tags the chunks.
    pub async fn request_guild_members(
        &self,
        mut payload: RequestGuildMembersPayload,
    ) -> GatewayResult<String> {
        let nonce = payload.ensure_nonce().to_string();
        self.send(GatewayMessage::request_guild_members(&payload)?).await?;
        Ok(nonce)
    }

    fn check_sendable(&self, op: OpCode) -> GatewayResult<()> {
        if op.is_priority() || !op.is_send_op() {
            return Err(GatewayError::ForbiddenOpcode(op));
        }
        if self.cancel.is_cancelled() {
            return Err(GatewayError::Closing);
        }
        if !self.state().is_connected() {
            return Err(GatewayError::NotConnected);
        }
        Ok(())
    }

    fn command_sender(&self) -> GatewayResult<mpsc::Sender<String>> {
        self.commands.lock().clone().ok_or(GatewayError::NotConnected)
    }

    // === Supervisor ===

    async fn run(self: Arc<Self>) {
        let mut session = self.config.session.clone().unwrap_or_default();
        let mut resume = session.can_resume();
        let mut failures: u32 = 0;

        let failure = loop {
            let outcome = self.run_socket(&mut session, resume).await;
            self.publish_session(&session);
            if outcome.connected {
                failures = 0;
            }

            let reason = outcome.reason;
            if reason == DisconnectReason::Local || self.cancel.is_cancelled() {
                break None;
            }

            let classification = reason.classify();
            tracing::warn!(
                reason = %reason,
                close_code = ?reason.close_code(),
                classification = ?classification,
                "Shard disconnected"
            );

            if classification.is_fatal() {
                break Some(self.fatal(FatalKind::CloseCode, &reason));
            }
            if !self.config.auto_reconnect {
                break Some(self.fatal(FatalKind::ReconnectDisabled, &reason));
            }
            if classification == CloseClassification::MustReidentify {
                session.clear();
                self.publish_session(&session);
            }
            resume = classification == CloseClassification::ResumeAllowed && session.can_resume();

            failures = failures.saturating_add(1);
            if self.config.backoff.should_give_up(failures) {
                break Some(self.fatal(FatalKind::RetriesExhausted, &reason));
            }

            let delay = self.config.backoff.delay_for_attempt(failures - 1);
            tracing::info!(
                attempt = failures,
                delay_ms = delay.as_millis() as u64,
                resume,
                "Reconnecting"
            );
            self.set_state(ConnectionState::Disconnected);
            self.handler
                .on_shard_event(ShardEvent::Reconnecting {
                    shard_id: self.shard_id(),
                    attempt: failures,
                    delay,
                    reason,
                })
                .await;

            tokio::select! {
                () = self.cancel.cancelled() => break None,
                () = tokio::time::sleep(delay) => {}
            }
        };

        match failure {
            Some(err) => {
                tracing::error!(error = %err, "Shard failed");
                *self.failure.lock() = Some(err.clone());
                self.set_state(ConnectionState::Closed);
                self.handler.on_shard_event(ShardEvent::Failed(err)).await;
            }
            None => {
                // A 1000 close ends the session on the server
                session.clear();
                self.publish_session(&session);
                self.set_state(ConnectionState::Closed);
                tracing::info!("Shard closed");
            }
        }

        self.handler
            .on_shard_event(ShardEvent::Closed {
                shard_id: self.shard_id(),
            })
            .await;
    }

    fn fatal(&self, kind: FatalKind, reason: &DisconnectReason) -> FatalError {
        FatalError {
            shard_id: self.shard_id(),
            kind,
            close_code: reason.close_code(),
            reason: reason.to_string(),
        }
    }

    fn set_state(&self, state: ConnectionState) {
        let previous = self.state.send_replace(state);
        if previous != state {
            tracing::debug!(from = %previous, to = %state, "State changed");
        }
    }

    fn publish_session(&self, session: &SessionState) {
        *self.session.write() = session.clone();
    }

    // === Socket ===

    async fn run_socket(self: &Arc<Self>, session: &mut SessionState, resume: bool) -> SocketOutcome {
        if !resume {
            session.clear();
            self.publish_session(session);
        }

        self.set_state(ConnectionState::Connecting);
        self.handler
            .on_shard_event(ShardEvent::Connecting {
                shard_id: self.shard_id(),
                resume,
            })
            .await;

        let base = match (&session.resume_url, resume) {
            (Some(url), true) => url.as_str(),
            _ => self.config.gateway_url.as_str(),
        };
        let url = gateway_url(base, self.config.version, self.config.compression);
        tracing::debug!(url = %url, resume, "Connecting");

        let connected = tokio::select! {
            () = self.cancel.cancelled() => None,
            connected = self.connector.connect(&url) => Some(connected),
        };
        let (sink, mut stream): (Box<dyn FrameSink>, Box<dyn FrameStream>) = match connected {
            None => {
                return SocketOutcome {
                    reason: DisconnectReason::Local,
                    connected: false,
                }
            }
            Some(Err(e)) => {
                return SocketOutcome {
                    reason: DisconnectReason::TransportError(e.to_string()),
                    connected: false,
                }
            }
            Some(Ok(halves)) => halves,
        };

        self.limiter.reset();
        self.heartbeat.lock().reset(session.last_sequence);
        self.set_state(ConnectionState::AwaitingHello);

        let socket_cancel = self.cancel.child_token();
        let (priority_tx, priority_rx) = mpsc::channel(PRIORITY_BUFFER);
        let (command_tx, command_rx) = mpsc::channel(COMMAND_BUFFER);
        let (control_tx, mut control_rx) = mpsc::channel(4);

        let writer = tokio::spawn(
            write_loop(sink, priority_rx, command_rx, socket_cancel.clone(), control_tx.clone())
                .in_current_span(),
        );

        let mut ctx = SocketContext {
            cancel: socket_cancel,
            priority: priority_tx,
            commands: command_tx,
            control: control_tx,
            decoder: self.config.new_decoder(),
            resume,
            connected: false,
            heartbeat_task: None,
        };

        let reason = loop {
            let next = tokio::select! {
                biased;
                () = self.cancel.cancelled() => break DisconnectReason::Local,
                Some(reason) = control_rx.recv() => break reason,
                frame = stream.next_frame() => frame,
            };

            let text = match next {
                Some(Ok(Frame::Text(text))) => text,
                Some(Ok(Frame::Binary(data))) => match ctx.decoder.decode(&data) {
                    Ok(Some(text)) => text,
                    Ok(None) => continue,
                    Err(e) => {
                        tracing::warn!(error = %e, "Dropping undecodable binary frame");
                        continue;
                    }
                },
                Some(Ok(Frame::Close(close))) => {
                    let (code, reason) = close.map_or((1005, String::new()), |c| (c.code, c.reason));
                    break DisconnectReason::Closed(super::CloseEvent::remote(code, reason));
                }
                Some(Err(e)) => break DisconnectReason::TransportError(e.to_string()),
                None => break DisconnectReason::TransportError("stream ended".to_string()),
            };

            if let Some(reason) = self.handle_text(&text, &mut ctx, session).await {
                break reason;
            }
        };

        *self.commands.lock() = None;
        ctx.cancel.cancel();
        if let Some(task) = ctx.heartbeat_task.take() {
            task.abort();
        }

        if reason == DisconnectReason::Local {
            self.set_state(ConnectionState::Closing);
        }

        match writer.await {
            Ok(mut sink) if !matches!(reason, DisconnectReason::Closed(_)) => {
                let code = reason.local_close_code();
                let close_reason = match reason {
                    DisconnectReason::Local => self.close_reason.lock().clone(),
                    _ => None,
                }
                .unwrap_or_else(|| reason.to_string());
                match tokio::time::timeout(CLOSE_TIMEOUT, sink.close(code, &close_reason)).await {
                    Ok(Ok(())) => tracing::debug!(close_code = code, "Socket closed"),
                    Ok(Err(e)) => tracing::debug!(error = %e, "Close handshake failed"),
                    Err(_) => tracing::debug!("Close handshake timed out"),
                }
            }
            Ok(_) => {}
            Err(e) => tracing::warn!(error = %e, "Writer task failed"),
        }

        SocketOutcome {
            reason,
            connected: ctx.connected,
        }
    }

    /// Handle one inbound text frame; `Some` ends the socket.
    async fn handle_text(
        self: &Arc<Self>,
        text: &str,
        ctx: &mut SocketContext,
        session: &mut SessionState,
    ) -> Option<DisconnectReason> {
        let frame = match InboundFrame::decode(text) {
            Ok(frame) => frame,
            Err(e) => {
                tracing::warn!(error = %e, "Dropping malformed frame");
                return None;
            }
        };
        tracing::trace!(op = frame.op(), "Frame received");

        match frame {
            InboundFrame::Hello(hello) => {
                if ctx.heartbeat_task.is_some() {
                    tracing::debug!("Ignoring repeated Hello");
                    return None;
                }
                let interval = Duration::from_millis(hello.heartbeat_interval);
                tracing::debug!(heartbeat_interval_ms = hello.heartbeat_interval, "Hello received");
                ctx.heartbeat_task = Some(self.spawn_heartbeat(interval, ctx));
                self.start_handshake(ctx, session);
            }
            InboundFrame::HeartbeatAck => {
                let latency = self.heartbeat.lock().record_ack(Instant::now());
                if let Some(latency) = latency {
                    tracing::trace!(latency_ms = latency.as_millis() as u64, "Heartbeat acknowledged");
                    self.handler
                        .on_shard_event(ShardEvent::HeartbeatAck {
                            shard_id: self.shard_id(),
                            latency,
                        })
                        .await;
                }
            }
            InboundFrame::Heartbeat => {
                tracing::debug!("Server requested a heartbeat");
                send_heartbeat(&self.heartbeat, &ctx.priority).await;
            }
            InboundFrame::Reconnect => return Some(DisconnectReason::Reconnect),
            InboundFrame::InvalidSession { resumable } => {
                return Some(DisconnectReason::InvalidSession { resumable });
            }
            InboundFrame::Dispatch(dispatch) => self.handle_dispatch(dispatch, ctx, session).await,
            InboundFrame::Unknown { op } => tracing::debug!(op, "Ignoring unexpected op code"),
        }

        None
    }

    async fn handle_dispatch(
        &self,
        dispatch: DispatchFrame,
        ctx: &mut SocketContext,
        session: &mut SessionState,
    ) {
        if let Some(sequence) = dispatch.sequence {
            session.observe_sequence(sequence);
            self.heartbeat.lock().set_sequence(session.last_sequence);
        }

        let kind = GatewayEventType::from_str(&dispatch.event_type);
        let event = GatewayEvent::decode(kind, &dispatch.data).unwrap_or_else(|e| {
            tracing::warn!(event_type = %dispatch.event_type, error = %e, "Failed to decode event payload");
            GatewayEvent::Other(dispatch.data.clone())
        });

        match &event {
            _ if kind == GatewayEventType::Ready => {
                let (session_id, resume_url) = ready_session(&event, &dispatch.data);
                match &session_id {
                    Some(id) => session.establish(id.clone(), resume_url),
                    None => {
                        tracing::warn!("READY without a session id, the next reconnect will identify");
                        session.session_id = None;
                    }
                }
                self.mark_connected(ctx);
                tracing::info!(session_id = ?session_id, "Shard ready");
                self.handler
                    .on_shard_event(ShardEvent::Ready {
                        shard_id: self.shard_id(),
                        session_id: session_id.unwrap_or_default(),
                    })
                    .await;
            }
            GatewayEvent::Resumed => {
                self.mark_connected(ctx);
                tracing::info!(seq = ?session.last_sequence, "Session resumed");
                self.handler
                    .on_shard_event(ShardEvent::Resumed {
                        shard_id: self.shard_id(),
                    })
                    .await;
            }
            GatewayEvent::RateLimited(limited) => {
                tracing::warn!(
                    opcode = limited.opcode,
                    retry_after_ms = limited.retry_after().as_millis() as u64,
                    "Server rate limited a command"
                );
            }
            _ => {}
        }
        self.publish_session(session);

        self.handler
            .on_dispatch(DispatchEvent {
                shard_id: self.shard_id(),
                sequence: dispatch.sequence,
                event_type: dispatch.event_type,
                kind,
                data: dispatch.data,
                event,
            })
            .await;
    }

    fn mark_connected(&self, ctx: &mut SocketContext) {
        ctx.connected = true;
        *self.commands.lock() = Some(ctx.commands.clone());
        self.set_state(ConnectionState::Connected);
    }

    /// Send Resume, or queue Identify behind the identify gate
    fn start_handshake(self: &Arc<Self>, ctx: &SocketContext, session: &SessionState) {
        self.set_state(ConnectionState::Identifying);

        if ctx.resume {
            if let (Some(session_id), Some(seq)) = (&session.session_id, session.last_sequence) {
                let resume = ResumePayload {
                    token: self.config.token.clone(),
                    session_id: session_id.clone(),
                    seq,
                };
                tracing::debug!(session_id = %session_id, seq, "Sending Resume");
                queue_priority(&ctx.priority, GatewayMessage::resume(&resume));
                return;
            }
        }

        let shard = Arc::clone(self);
        let cancel = ctx.cancel.clone();
        let priority = ctx.priority.clone();
        let control = ctx.control.clone();
        tokio::spawn(
            async move {
                let acquired = tokio::select! {
                    () = cancel.cancelled() => return,
                    acquired = shard.identify.acquire(shard.shard_id()) => acquired,
                };
                if let Err(e) = acquired {
                    tracing::warn!(error = %e, "Identify gate refused");
                    let _ = control.send(DisconnectReason::IdentifyTimeout).await;
                    return;
                }

                let identify = shard.identify_payload();
                let moved = shard.state.send_if_modified(|state| {
                    if *state == ConnectionState::Identifying {
                        *state = ConnectionState::AwaitingReady;
                        true
                    } else {
                        false
                    }
                });
                if !moved || cancel.is_cancelled() {
                    return;
                }
                tracing::debug!(intents = %identify.intents, "Sending Identify");
                queue_priority(&priority, GatewayMessage::identify(&identify));
            }
            .in_current_span(),
        );
    }

    fn identify_payload(&self) -> IdentifyPayload {
        IdentifyPayload {
            token: self.config.token.clone(),
            properties: self.config.properties.clone(),
            intents: self.config.intents,
            compress: false,
            large_threshold: Some(self.config.large_threshold),
            shard: Some(self.descriptor.as_array()),
            presence: self.presence(),
        }
    }

    fn spawn_heartbeat(self: &Arc<Self>, interval: Duration, ctx: &SocketContext) -> JoinHandle<()> {
        let shard = Arc::clone(self);
        let cancel = ctx.cancel.clone();
        let priority = ctx.priority.clone();
        let control = ctx.control.clone();

        tokio::spawn(
            async move {
                let first = first_beat_delay(interval);
                tracing::trace!(first_beat_ms = first.as_millis() as u64, "Heartbeat scheduled");

                let period = interval.max(Duration::from_millis(1));
                let mut ticker = tokio::time::interval_at(Instant::now() + first, period);
                ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

                loop {
                    tokio::select! {
                        () = cancel.cancelled() => return,
                        _ = ticker.tick() => {}
                    }

                    if shard.heartbeat.lock().is_zombie() {
                        tracing::warn!("Heartbeat not acknowledged, connection is zombied");
                        let _ = control.send(DisconnectReason::Zombie).await;
                        return;
                    }
                    if !send_heartbeat(&shard.heartbeat, &priority).await {
                        return;
                    }
                }
            }
            .in_current_span(),
        )
    }
}

impl std::fmt::Debug for ShardConnection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ShardConnection")
            .field("descriptor", &self.descriptor)
            .field("state", &self.state())
            .field("session_id", &self.session.read().session_id)
            .finish()
    }
}

/// Send a heartbeat with the current sequence; `false` once the writer is gone.
async fn send_heartbeat(state: &Mutex<HeartbeatState>, priority: &mpsc::Sender<String>) -> bool {
    let sequence = state.lock().sequence();
    let json = match GatewayMessage::heartbeat(sequence).to_json() {
        Ok(json) => json,
        Err(e) => {
            tracing::warn!(error = %e, "Failed to encode heartbeat");
            return true;
        }
    };

    state.lock().record_sent(Instant::now());
    tracing::trace!(seq = ?sequence, "Sending heartbeat");
    priority.send(json).await.is_ok()
}

fn queue_priority(
    priority: &mpsc::Sender<String>,
    message: Result<GatewayMessage, serde_json::Error>,
) {
    match message.and_then(|m| Ok((m.op, m.to_json()?))) {
        Ok((op, json)) => {
            if priority.try_send(json).is_err() {
                tracing::warn!(op = %op, "Priority queue unavailable, frame dropped");
            }
        }
        Err(e) => tracing::warn!(error = %e, "Failed to encode handshake frame"),
    }
}

/// Session id and resume URL of a READY. Read from the raw payload when the
/// typed decode failed, so an unexpected `user` or `guilds` shape still
/// connects the shard.
fn ready_session(
    event: &GatewayEvent,
    data: &serde_json::Value,
) -> (Option<String>, Option<String>) {
    if let GatewayEvent::Ready(ready) = event {
        return (Some(ready.session_id.clone()), ready.resume_gateway_url.clone());
    }
    let field = |name: &str| {
        data.get(name)
            .and_then(serde_json::Value::as_str)
            .map(str::to_string)
    };
    (field("session_id"), field("resume_gateway_url"))
}

/// Forward queued frames to the socket, heartbeats and handshakes first.
async fn write_loop(
    mut sink: Box<dyn FrameSink>,
    mut priority: mpsc::Receiver<String>,
    mut commands: mpsc::Receiver<String>,
    cancel: CancellationToken,
    control: mpsc::Sender<DisconnectReason>,
) -> Box<dyn FrameSink> {
    loop {
        let text = tokio::select! {
            biased;
            () = cancel.cancelled() => break,
            Some(text) = priority.recv() => text,
            Some(text) = commands.recv() => text,
            else => break,
        };

        if let Err(e) = sink.send(Frame::Text(text)).await {
            tracing::debug!(error = %e, "Write failed");
            let _ = control.try_send(DisconnectReason::TransportError(e.to_string()));
            break;
        }
    }
    sink
}
