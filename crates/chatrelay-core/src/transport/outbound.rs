//! Outbound transport actor.
//!
//! State machine: `Disconnected -> Connecting -> Connected -> Disconnected`,
//! plus `Connected -> IdleClosed` when the inactivity reaper closes the link.
//!
//! All state lives in one task, so:
//! - `connect()` is single-flight: a second request while `Connecting` or
//!   `Connected` is a no-op.
//! - The queue drains in FIFO order right after a link opens, and sends that
//!   arrive mid-drain wait in the command channel behind it.
//! - At most one reconnect is ever scheduled; the delay is fixed and attempts
//!   are unbounded.

use std::collections::VecDeque;
use std::sync::Arc;
use std::time::Duration;

use chatrelay_types::error::TransportError;
use chatrelay_types::wire::{InboundEvent, OutboundPayload};
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tracing::{debug, info, warn};

use super::link::{Connector, DuplexLink};

/// Observable connection state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    Disconnected,
    Connecting,
    Connected,
    /// Closed deliberately for inactivity; reconnects on the next send.
    IdleClosed,
}

#[derive(Debug)]
enum Command {
    Connect,
    Send(String),
    CloseIdle,
    Shutdown,
}

/// Cheap, clonable handle to the transport actor.
#[derive(Clone)]
pub struct OutboundTransport {
    commands: mpsc::UnboundedSender<Command>,
    state: watch::Receiver<ConnectionState>,
}

impl OutboundTransport {
    /// Spawn the transport actor.
    ///
    /// Parsed backend frames are pushed to `inbound`. Nothing connects until
    /// the first `connect()` or `send()`.
    pub fn spawn<C: Connector>(
        connector: C,
        reconnect_delay: Duration,
        inbound: mpsc::UnboundedSender<InboundEvent>,
    ) -> (Self, JoinHandle<()>) {
        let (command_tx, command_rx) = mpsc::unbounded_channel();
        let (state_tx, state_rx) = watch::channel(ConnectionState::Disconnected);

        let actor = TransportActor {
            connector: Arc::new(connector),
            reconnect_delay,
            commands: command_rx,
            inbound,
            state: state_tx,
            queue: VecDeque::new(),
            link: None,
            connecting: None,
            reconnect_at: None,
        };
        let task = tokio::spawn(actor.run());

        (
            Self {
                commands: command_tx,
                state: state_rx,
            },
            task,
        )
    }

    /// Open the link unless it is already open or opening.
    pub fn connect(&self) {
        let _ = self.commands.send(Command::Connect);
    }

    /// Serialize and send `payload`, queueing it while disconnected.
    ///
    /// Only fails when the actor has stopped.
    pub fn send(&self, payload: &OutboundPayload) -> Result<(), TransportError> {
        let text = serde_json::to_string(payload).map_err(|e| TransportError::Send(e.to_string()))?;
        self.send_text(text)
    }

    pub fn send_text(&self, text: String) -> Result<(), TransportError> {
        self.commands
            .send(Command::Send(text))
            .map_err(|_| TransportError::Stopped)
    }

    /// Close the link for inactivity. No reconnect is scheduled.
    pub fn close_idle(&self) {
        let _ = self.commands.send(Command::CloseIdle);
    }

    /// Stop the actor, closing any open link.
    pub fn shutdown(&self) {
        let _ = self.commands.send(Command::Shutdown);
    }

    pub fn state(&self) -> ConnectionState {
        *self.state.borrow()
    }

    pub fn subscribe(&self) -> watch::Receiver<ConnectionState> {
        self.state.clone()
    }
}

struct TransportActor<C: Connector> {
    connector: Arc<C>,
    reconnect_delay: Duration,
    commands: mpsc::UnboundedReceiver<Command>,
    inbound: mpsc::UnboundedSender<InboundEvent>,
    state: watch::Sender<ConnectionState>,
    queue: VecDeque<String>,
    link: Option<C::Link>,
    connecting: Option<JoinHandle<Result<C::Link, TransportError>>>,
    reconnect_at: Option<Instant>,
}

impl<C: Connector> TransportActor<C> {
    async fn run(mut self) {
        loop {
            tokio::select! {
                command = self.commands.recv() => match command {
                    Some(Command::Shutdown) | None => break,
                    Some(command) => self.handle_command(command).await,
                },
                result = join_connect(&mut self.connecting) => {
                    self.connecting = None;
                    self.on_connect_result(result).await;
                }
                frame = next_frame(&mut self.link) => {
                    self.on_frame(frame);
                }
                _ = wait_until(self.reconnect_at) => {
                    self.reconnect_at = None;
                    info!("reconnecting duplex transport");
                    self.start_connect();
                }
            }
        }

        if let Some(task) = self.connecting.take() {
            task.abort();
        }
        if let Some(mut link) = self.link.take() {
            link.close().await;
        }
        self.set_state(ConnectionState::Disconnected);
        debug!(queued = self.queue.len(), "duplex transport stopped");
    }

    async fn handle_command(&mut self, command: Command) {
        match command {
            Command::Connect => match self.current_state() {
                ConnectionState::Connecting | ConnectionState::Connected => {
                    debug!("connect requested while already connecting or connected");
                }
                _ => {
                    self.reconnect_at = None;
                    self.start_connect();
                }
            },
            Command::Send(text) => self.send_or_queue(text).await,
            Command::CloseIdle => self.close_idle().await,
            Command::Shutdown => {}
        }
    }

    async fn send_or_queue(&mut self, text: String) {
        if let Some(link) = self.link.as_mut() {
            if let Err(err) = link.send(text.clone()).await {
                warn!(error = %err, "duplex send failed, requeueing payload");
                self.queue.push_front(text);
                self.drop_link();
                self.schedule_reconnect();
            }
            return;
        }

        self.queue.push_back(text);
        warn!(queued = self.queue.len(), "duplex transport not open, payload queued");

        let idle = matches!(
            self.current_state(),
            ConnectionState::Disconnected | ConnectionState::IdleClosed
        );
        if idle && self.reconnect_at.is_none() {
            info!("opening duplex transport due to outbound activity");
            self.start_connect();
        }
    }

    async fn close_idle(&mut self) {
        if let Some(task) = self.connecting.take() {
            task.abort();
        }
        self.reconnect_at = None;
        if let Some(mut link) = self.link.take() {
            link.close().await;
            info!("duplex transport closed for inactivity");
        }
        self.set_state(ConnectionState::IdleClosed);
    }

    fn start_connect(&mut self) {
        if self.connecting.is_some() || self.link.is_some() {
            return;
        }
        self.set_state(ConnectionState::Connecting);
        let connector = Arc::clone(&self.connector);
        self.connecting = Some(tokio::spawn(async move { connector.connect().await }));
    }

    async fn on_connect_result(&mut self, result: Result<C::Link, TransportError>) {
        match result {
            Ok(link) => {
                self.link = Some(link);
                self.set_state(ConnectionState::Connected);
                info!(queued = self.queue.len(), "duplex transport connected");
                self.drain_queue().await;
            }
            Err(err) => {
                warn!(error = %err, "duplex connect failed");
                self.set_state(ConnectionState::Disconnected);
                self.schedule_reconnect();
            }
        }
    }

    async fn drain_queue(&mut self) {
        let mut drained = 0usize;
        while let Some(text) = self.queue.pop_front() {
            let Some(link) = self.link.as_mut() else {
                self.queue.push_front(text);
                break;
            };
            if let Err(err) = link.send(text.clone()).await {
                warn!(error = %err, remaining = self.queue.len() + 1, "queue drain interrupted");
                self.queue.push_front(text);
                self.drop_link();
                self.schedule_reconnect();
                break;
            }
            drained += 1;
        }
        if drained > 0 {
            info!(drained, "processed queued messages");
        }
    }

    fn on_frame(&mut self, frame: Option<Result<String, TransportError>>) {
        match frame {
            Some(Ok(text)) => match serde_json::from_str::<InboundEvent>(&text) {
                Ok(event) => {
                    if self.inbound.send(event).is_err() {
                        debug!("inbound router gone, dropping backend frame");
                    }
                }
                Err(err) => {
                    warn!(raw = %text, error = %err, "ignoring malformed backend frame");
                }
            },
            Some(Err(err)) => {
                warn!(error = %err, "duplex receive failed");
                self.drop_link();
                self.schedule_reconnect();
            }
            None => {
                info!("duplex transport closed by peer");
                self.drop_link();
                self.schedule_reconnect();
            }
        }
    }

    fn drop_link(&mut self) {
        self.link = None;
        self.set_state(ConnectionState::Disconnected);
    }

    fn schedule_reconnect(&mut self) {
        if self.reconnect_at.is_some() {
            debug!("reconnect already scheduled");
            return;
        }
        self.reconnect_at = Some(Instant::now() + self.reconnect_delay);
        info!(delay_ms = self.reconnect_delay.as_millis() as u64, "reconnect scheduled");
    }

    fn current_state(&self) -> ConnectionState {
        *self.state.borrow()
    }

    fn set_state(&self, state: ConnectionState) {
        self.state.send_replace(state);
    }
}

async fn join_connect<L>(
    task: &mut Option<JoinHandle<Result<L, TransportError>>>,
) -> Result<L, TransportError> {
    match task {
        Some(task) => match task.await {
            Ok(result) => result,
            Err(err) => Err(TransportError::Connect(err.to_string())),
        },
        None => std::future::pending().await,
    }
}

async fn next_frame<L: DuplexLink>(link: &mut Option<L>) -> Option<Result<String, TransportError>> {
    match link {
        Some(link) => link.recv().await,
        None => std::future::pending().await,
    }
}

async fn wait_until(deadline: Option<Instant>) {
    match deadline {
        Some(deadline) => tokio::time::sleep_until(deadline).await,
        None => std::future::pending().await,
    }
}
