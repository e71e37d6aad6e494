//! Stream supervisor
//!
//! Keeps at most one live connection to the notification stream for the
//! current session. A single driver task owns the [`ConnectionMachine`] and
//! is the only place that opens or closes transports, arms the reconnect
//! timer, or talks to the sink, so there is never more than one pending
//! timer or live handle.
//!
//! The driver reacts to four inputs: session changes, the in-flight open,
//! events from the live handle, and the reconnect timer. Teardown is a
//! command; dropping the [`Supervisor`] has the same effect.

use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tokio::time::Sleep;
use tracing::{debug, info, warn};

use crate::config::StreamConfig;
use crate::connection::{Action, AttemptId, BackoffPolicy, ConnectionMachine, ConnectionState};
use crate::events::{EventSink, SinkSlot};
use crate::session::{Session, StreamTarget};
use crate::transport::{Transport, TransportError, TransportEvent, TransportHandle};

type OpenFuture = Pin<Box<dyn Future<Output = Result<TransportHandle, TransportError>> + Send>>;

enum Command {
    Teardown,
}

/// Handle to the supervising task
pub struct Supervisor {
    commands: mpsc::UnboundedSender<Command>,
    state: watch::Receiver<ConnectionState>,
    sink: SinkSlot,
    task: JoinHandle<()>,
}

impl Supervisor {
    /// Start supervising; must be called inside a tokio runtime
    ///
    /// The current session is bound immediately. A connection is attempted
    /// only when streaming is enabled and the session carries a token.
    pub fn spawn(
        config: &StreamConfig,
        target: StreamTarget,
        sessions: watch::Receiver<Session>,
        transport: Arc<dyn Transport>,
        sink: Arc<dyn EventSink>,
    ) -> Self {
        let (commands, command_rx) = mpsc::unbounded_channel();
        let (state_tx, state) = watch::channel(ConnectionState::Idle);
        let sink = SinkSlot::new(sink);

        let driver = Driver {
            machine: ConnectionMachine::new(BackoffPolicy::from(config), config.enabled),
            target,
            transport,
            sink: sink.clone(),
            state_tx,
            pending: None,
            live: None,
            timer: None,
        };
        let task = tokio::spawn(driver.run(command_rx, sessions));

        Self {
            commands,
            state,
            sink,
            task,
        }
    }

    pub fn state(&self) -> ConnectionState {
        *self.state.borrow()
    }

    pub fn subscribe_state(&self) -> watch::Receiver<ConnectionState> {
        self.state.clone()
    }

    /// Route subsequent events to `sink`
    pub fn set_sink(&self, sink: Arc<dyn EventSink>) {
        self.sink.replace(sink);
    }

    /// Close the connection, cancel any timer and wait for the driver to exit
    ///
    /// No event reaches the sink afterwards.
    pub async fn teardown(self) {
        if self.commands.send(Command::Teardown).is_err() {
            debug!("Stream supervisor already stopped");
        }
        if let Err(e) = self.task.await {
            if e.is_panic() {
                warn!("Stream supervisor panicked: {}", e);
            }
        }
    }
}

struct Driver {
    machine: ConnectionMachine,
    target: StreamTarget,
    transport: Arc<dyn Transport>,
    sink: SinkSlot,
    state_tx: watch::Sender<ConnectionState>,
    pending: Option<(AttemptId, OpenFuture)>,
    live: Option<(AttemptId, TransportHandle)>,
    timer: Option<Pin<Box<Sleep>>>,
}

impl Driver {
    async fn run(
        mut self,
        mut commands: mpsc::UnboundedReceiver<Command>,
        mut sessions: watch::Receiver<Session>,
    ) {
        let initial = sessions.borrow_and_update().clone();
        let actions = self.machine.start(initial);
        self.apply(actions).await;

        // The provider may go away; the last session then stays in force.
        let mut sessions_live = true;

        loop {
            tokio::select! {
                biased;

                command = commands.recv() => match command {
                    Some(Command::Teardown) | None => break,
                },

                changed = sessions.changed(), if sessions_live => match changed {
                    Ok(()) => {
                        let session = sessions.borrow_and_update().clone();
                        debug!("Session changed ({:?})", session);
                        let actions = self.machine.session_changed(session);
                        self.apply(actions).await;
                    }
                    Err(_) => sessions_live = false,
                },

                (attempt, result) = next_open(&mut self.pending) => {
                    self.pending = None;
                    self.on_open(attempt, result).await;
                }

                (attempt, event) = next_event(&mut self.live) => {
                    self.on_event(attempt, event).await;
                }

                _ = next_tick(&mut self.timer) => {
                    self.timer = None;
                    let actions = self.machine.timer_fired();
                    self.apply(actions).await;
                }
            }
        }

        let actions = self.machine.teardown();
        self.apply(actions).await;
        debug!("Stream supervisor stopped");
    }

    async fn on_open(&mut self, attempt: AttemptId, result: Result<TransportHandle, TransportError>) {
        match result {
            Ok(mut handle) => {
                if self.machine.opened(attempt) {
                    info!("Stream open ({}, handle {})", self.target, handle.id());
                    self.live = Some((attempt, handle));
                    self.publish_state().await;
                } else {
                    handle.close();
                }
            }
            Err(e) => {
                warn!("Stream connect failed: {}", e);
                let actions = self.machine.failed(attempt);
                self.apply(actions).await;
            }
        }
    }

    async fn on_event(&mut self, attempt: AttemptId, event: TransportEvent) {
        match event {
            TransportEvent::Message(message) => {
                if attempt != self.machine.current_attempt() {
                    return;
                }
                if let Err(e) = self.sink.current().emit_message(&message).await {
                    warn!("Failed to deliver message {}: {}", message.id, e);
                }
            }
            TransportEvent::Error(e) => {
                warn!("Stream error: {}", e);
                let actions = self.machine.failed(attempt);
                self.apply(actions).await;
            }
            TransportEvent::Closed(code) => {
                info!("Stream closed by server (code {:?})", code);
                let actions = self.machine.failed(attempt);
                self.apply(actions).await;
            }
        }
    }

    async fn apply(&mut self, actions: Vec<Action>) {
        for action in actions {
            match action {
                Action::BindSession(session) => {
                    if let Err(e) = self.sink.current().emit_session_bound(&session).await {
                        warn!("Failed to bind session: {}", e);
                    }
                }
                Action::Open { attempt, session } => {
                    let transport = Arc::clone(&self.transport);
                    let target = self.target.clone();
                    debug!("Opening stream ({}, attempt {})", target, attempt.0);
                    self.pending = Some((
                        attempt,
                        Box::pin(async move { transport.open(&session, &target).await }),
                    ));
                }
                Action::Close => {
                    self.pending = None;
                    if let Some((_, mut handle)) = self.live.take() {
                        handle.close();
                    }
                }
                Action::ScheduleReconnect(delay) => {
                    info!("Reconnecting in {}ms", delay.as_millis());
                    self.timer = Some(Box::pin(tokio::time::sleep(delay)));
                }
                Action::CancelTimer => self.timer = None,
            }
        }
        self.publish_state().await;
    }

    async fn publish_state(&mut self) {
        let state = self.machine.state();
        if *self.state_tx.borrow() == state {
            return;
        }
        self.state_tx.send_replace(state);
        if let Err(e) = self.sink.current().emit_state(state).await {
            warn!("Failed to report state {}: {}", state, e);
        }
    }
}

async fn next_open(
    pending: &mut Option<(AttemptId, OpenFuture)>,
) -> (AttemptId, Result<TransportHandle, TransportError>) {
    match pending {
        Some((attempt, open)) => (*attempt, open.await),
        None => std::future::pending().await,
    }
}

async fn next_event(live: &mut Option<(AttemptId, TransportHandle)>) -> (AttemptId, TransportEvent) {
    match live {
        Some((attempt, handle)) => (*attempt, handle.next_event().await),
        None => std::future::pending().await,
    }
}

async fn next_tick(timer: &mut Option<Pin<Box<Sleep>>>) {
    match timer {
        Some(sleep) => sleep.as_mut().await,
        None => std::future::pending().await,
    }
}
