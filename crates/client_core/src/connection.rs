use std::{
    pin::Pin,
    sync::{
        atomic::{AtomicBool, Ordering},
        Arc,
    },
    time::Duration,
};

use futures::{future::BoxFuture, FutureExt};
use shared::{
    domain::{ChatMessage, ConnectionState, ConnectionTarget},
    protocol::{
        decode_server_frame, ClientFrame, ServerFrame, CHAT_PATH, CLOSE_IDLE, CLOSE_UNAUTHORIZED,
    },
};
use tokio::{
    sync::{mpsc, oneshot, watch},
    task::JoinHandle,
    time::{sleep, Sleep},
};
use tracing::{debug, info, warn};
use url::Url;

use crate::{
    events::ConnectionCallbacks,
    transport::{redacted, Transport, TransportError, TransportEvent, TransportLink},
};

pub const UNAUTHORIZED_MESSAGE: &str = "Unauthorized: check your auth token";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReconnectPolicy {
    pub base_delay: Duration,
    /// Consecutive failed attempts after which the manager stops in `Error`.
    pub max_attempts: u32,
    /// Delay stops growing once `attempt - 1` reaches this exponent.
    pub max_exponent: u32,
}

impl Default for ReconnectPolicy {
    fn default() -> Self {
        Self {
            base_delay: Duration::from_millis(1000),
            max_attempts: 8,
            max_exponent: 5,
        }
    }
}

impl ReconnectPolicy {
    /// Delay before the `attempt`-th reconnect (1-based).
    pub fn delay_for(&self, attempt: u32) -> Duration {
        let exponent = attempt.saturating_sub(1).min(self.max_exponent);
        let factor = 2u32.checked_pow(exponent).unwrap_or(u32::MAX);
        self.base_delay.saturating_mul(factor)
    }
}

/// Socket endpoint for `target`: `https` becomes `wss`, anything else `ws`,
/// the chat path is appended and the token goes into the query when set.
pub fn endpoint_for(target: &ConnectionTarget) -> Result<Url, TransportError> {
    let base = target.url.trim();
    let scheme = if base.starts_with("https") { "wss" } else { "ws" };
    let host = base
        .strip_prefix("https://")
        .or_else(|| base.strip_prefix("http://"))
        .unwrap_or(base)
        .trim_end_matches('/');
    let raw = format!("{scheme}://{host}{CHAT_PATH}");
    let invalid = |source| TransportError::InvalidEndpoint {
        endpoint: raw.clone(),
        source,
    };
    if host.is_empty() {
        return Err(invalid(url::ParseError::EmptyHost));
    }

    let mut endpoint = Url::parse(&raw).map_err(invalid)?;
    if endpoint.host_str().is_none() {
        return Err(invalid(url::ParseError::EmptyHost));
    }
    if target.is_authenticated() {
        endpoint.set_query(Some(&format!("token={}", encode_component(&target.token))));
    }
    Ok(endpoint)
}

/// Percent-encodes a query value; spaces become `%20`, never `+`.
fn encode_component(value: &str) -> String {
    url::form_urlencoded::byte_serialize(value.as_bytes())
        .collect::<String>()
        .replace('+', "%20")
}

enum Command {
    Connect {
        target: ConnectionTarget,
        callbacks: Arc<dyn ConnectionCallbacks>,
        done: oneshot::Sender<()>,
    },
    Disconnect {
        done: oneshot::Sender<()>,
    },
    Send(ClientFrame),
}

/// Owns one auto-reconnecting chat connection.
///
/// All transport work happens on a driver task spawned by [`ConnectionManager::new`];
/// callbacks are invoked from that task only, so they never overlap. Dropping
/// the manager stops the driver and closes the transport.
pub struct ConnectionManager {
    commands: mpsc::UnboundedSender<Command>,
    state: watch::Receiver<ConnectionState>,
    open: Arc<AtomicBool>,
    driver: JoinHandle<()>,
}

impl ConnectionManager {
    /// Must be called from within a tokio runtime.
    pub fn new(transport: Arc<dyn Transport>, policy: ReconnectPolicy) -> Self {
        let (commands, command_rx) = mpsc::unbounded_channel();
        let (state_tx, state) = watch::channel(ConnectionState::Disconnected);
        let open = Arc::new(AtomicBool::new(false));

        let driver = Driver {
            transport,
            policy,
            commands: command_rx,
            state: state_tx,
            open: Arc::clone(&open),
            target: None,
            callbacks: None,
            retry_count: 0,
            link: None,
            opening: None,
            reconnect: None,
        };

        Self {
            commands,
            state,
            open,
            driver: tokio::spawn(driver.run()),
        }
    }

    /// Tears down any current connection and starts connecting to `target`.
    /// Resolves once the attempt has started; the outcome arrives via callbacks.
    pub async fn connect(&self, target: ConnectionTarget, callbacks: Arc<dyn ConnectionCallbacks>) {
        let (done, accepted) = oneshot::channel();
        if self
            .commands
            .send(Command::Connect {
                target,
                callbacks,
                done,
            })
            .is_ok()
        {
            let _ = accepted.await;
        }
    }

    /// Cancels any pending reconnect, closes the transport and reports
    /// `Disconnected`. No callback fires for the old transport once this
    /// resolves.
    pub async fn disconnect(&self) {
        let (done, finished) = oneshot::channel();
        if self.commands.send(Command::Disconnect { done }).is_ok() {
            let _ = finished.await;
        }
    }

    /// Sends `content` if the transport is open. The returned message is the
    /// local copy for display and is produced whether or not it was sent.
    pub fn send(&self, content: impl Into<String>) -> ChatMessage {
        let message = ChatMessage::user(content);
        if self.is_connected() {
            let _ = self
                .commands
                .send(Command::Send(ClientFrame::message(message.content.clone())));
        } else {
            debug!(message_id = %message.id, "not connected; message not transmitted");
        }
        message
    }

    pub fn ping(&self) {
        if self.is_connected() {
            let _ = self.commands.send(Command::Send(ClientFrame::Ping));
        }
    }

    pub fn is_connected(&self) -> bool {
        self.open.load(Ordering::SeqCst)
    }

    pub fn state(&self) -> ConnectionState {
        *self.state.borrow()
    }

    pub fn subscribe_state(&self) -> watch::Receiver<ConnectionState> {
        self.state.clone()
    }
}

impl Drop for ConnectionManager {
    fn drop(&mut self) {
        self.driver.abort();
    }
}

type PendingOpen = BoxFuture<'static, Result<TransportLink, TransportError>>;

struct ReconnectTimer {
    attempt: u32,
    sleep: Pin<Box<Sleep>>,
}

struct Driver {
    transport: Arc<dyn Transport>,
    policy: ReconnectPolicy,
    commands: mpsc::UnboundedReceiver<Command>,
    state: watch::Sender<ConnectionState>,
    open: Arc<AtomicBool>,
    target: Option<ConnectionTarget>,
    callbacks: Option<Arc<dyn ConnectionCallbacks>>,
    retry_count: u32,
    link: Option<TransportLink>,
    opening: Option<PendingOpen>,
    reconnect: Option<ReconnectTimer>,
}

impl Driver {
    async fn run(mut self) {
        loop {
            tokio::select! {
                biased;

                command = self.commands.recv() => match command {
                    Some(command) => self.handle_command(command),
                    None => {
                        self.teardown();
                        break;
                    }
                },
                opened = wait_open(&mut self.opening) => {
                    self.opening = None;
                    self.handle_open(opened);
                }
                event = wait_event(&mut self.link) => self.handle_transport_event(event),
                attempt = wait_timer(&mut self.reconnect) => {
                    self.reconnect = None;
                    info!(attempt, "reconnecting");
                    self.start_attempt();
                }
            }
        }
    }

    fn handle_command(&mut self, command: Command) {
        match command {
            Command::Connect {
                target,
                callbacks,
                done,
            } => {
                self.teardown();
                self.report_state(ConnectionState::Disconnected);
                self.target = Some(target);
                self.callbacks = Some(callbacks);
                self.retry_count = 0;
                self.start_attempt();
                let _ = done.send(());
            }
            Command::Disconnect { done } => {
                self.teardown();
                self.report_state(ConnectionState::Disconnected);
                let _ = done.send(());
            }
            Command::Send(frame) => match &self.link {
                Some(link) => {
                    if !link.send(frame.encode()) {
                        debug!("transport went away; frame dropped");
                    }
                }
                None => debug!("no open transport; frame dropped"),
            },
        }
    }

    fn start_attempt(&mut self) {
        let Some(target) = self.target.as_ref() else {
            return;
        };
        let endpoint = endpoint_for(target);
        self.report_state(ConnectionState::Connecting);

        match endpoint {
            Ok(endpoint) => {
                info!(
                    endpoint = %redacted(&endpoint),
                    retry_count = self.retry_count,
                    "opening transport"
                );
                let transport = Arc::clone(&self.transport);
                self.opening = Some(async move { transport.open(&endpoint).await }.boxed());
            }
            Err(err) => self.handle_open_failure(err),
        }
    }

    fn handle_open(&mut self, result: Result<TransportLink, TransportError>) {
        match result {
            Ok(link) => {
                self.retry_count = 0;
                self.link = Some(link);
                self.open.store(true, Ordering::SeqCst);
                info!("transport open");
                self.report_state(ConnectionState::Connected);
            }
            Err(err) => self.handle_open_failure(err),
        }
    }

    fn handle_open_failure(&mut self, err: TransportError) {
        warn!(error = %err, "failed to open transport");
        self.report_state(ConnectionState::Error);
        self.schedule_reconnect();
    }

    fn handle_transport_event(&mut self, event: TransportEvent) {
        match event {
            TransportEvent::Message(raw) => self.dispatch_frame(&raw),
            TransportEvent::Error(reason) => {
                warn!(%reason, "transport error");
                self.report_state(ConnectionState::Error);
            }
            TransportEvent::Closed(code) => self.handle_close(code),
        }
    }

    fn handle_close(&mut self, code: Option<u16>) {
        self.link = None;
        self.open.store(false, Ordering::SeqCst);

        match code {
            Some(CLOSE_UNAUTHORIZED) => {
                warn!("server rejected the token; not reconnecting");
                if let Some(callbacks) = &self.callbacks {
                    callbacks.on_error(UNAUTHORIZED_MESSAGE.to_string());
                }
                self.report_state(ConnectionState::Error);
            }
            Some(CLOSE_IDLE) => {
                info!("server closed idle session; reconnecting now");
                self.report_state(ConnectionState::Disconnected);
                self.start_attempt();
            }
            other => {
                info!(code = ?other, "transport closed");
                self.report_state(ConnectionState::Disconnected);
                self.schedule_reconnect();
            }
        }
    }

    fn schedule_reconnect(&mut self) {
        if self.retry_count >= self.policy.max_attempts {
            warn!(
                attempts = self.retry_count,
                "reconnect attempts exhausted; staying in error state"
            );
            self.report_state(ConnectionState::Error);
            return;
        }

        self.retry_count += 1;
        let delay = self.policy.delay_for(self.retry_count);
        debug!(
            attempt = self.retry_count,
            delay_ms = delay.as_millis() as u64,
            "reconnect scheduled"
        );
        self.reconnect = Some(ReconnectTimer {
            attempt: self.retry_count,
            sleep: Box::pin(sleep(delay)),
        });
    }

    fn dispatch_frame(&self, raw: &str) {
        let frame = match decode_server_frame(raw) {
            Ok(frame) => frame,
            Err(err) => {
                debug!(error = %err, "ignoring inbound frame");
                return;
            }
        };
        let Some(callbacks) = &self.callbacks else {
            return;
        };

        match frame {
            ServerFrame::Connected { session_id } => callbacks.on_session_id(session_id),
            ServerFrame::Message {
                role,
                content,
                timestamp,
            } => callbacks.on_message(ChatMessage::new(role, content, timestamp)),
            ServerFrame::Typing { status } => callbacks.on_typing(status),
            ServerFrame::Error { content } => callbacks.on_error(content),
            ServerFrame::Pong => debug!("pong"),
        }
    }

    /// Drops the pending timer, any open in progress and the live transport.
    fn teardown(&mut self) {
        if let Some(timer) = self.reconnect.take() {
            debug!(attempt = timer.attempt, "reconnect cancelled");
        }
        self.opening = None;
        if self.link.take().is_some() {
            info!("transport closed locally");
        }
        self.open.store(false, Ordering::SeqCst);
    }

    fn report_state(&self, state: ConnectionState) {
        self.state.send_replace(state);
        if let Some(callbacks) = &self.callbacks {
            callbacks.on_state_change(state);
        }
    }
}

async fn wait_open(opening: &mut Option<PendingOpen>) -> Result<TransportLink, TransportError> {
    match opening {
        Some(open) => open.await,
        None => std::future::pending().await,
    }
}

async fn wait_event(link: &mut Option<TransportLink>) -> TransportEvent {
    match link {
        Some(link) => link.next_event().await,
        None => std::future::pending().await,
    }
}

async fn wait_timer(timer: &mut Option<ReconnectTimer>) -> u32 {
    match timer {
        Some(timer) => {
            timer.sleep.as_mut().await;
            timer.attempt
        }
        None => std::future::pending().await,
    }
}

#[cfg(test)]
#[path = "tests/connection_tests.rs"]
mod tests;
