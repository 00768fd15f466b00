// MIT License - Copyright (c) 2021 TJForc
// Direct TCP command session with a DMP panel

use std::fmt;

use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;
use tokio::sync::{Mutex, watch};
use tokio::time::{Instant, sleep, timeout};
use tracing::{debug, error, info, warn};

use crate::codec::{DmpCodec, Response};
use crate::config::PanelConfig;
use crate::error::{DmpError, Result};
use crate::protocol::{AccountId, Command};
use crate::transport::Transport;
use crate::transport::registry::{ConnectionRegistry, PanelIdentity, Registration};

const READ_CHUNK_SIZE: usize = 4096;

/// Lifecycle of a [`Session`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Disconnected,
    Connecting,
    Authenticating,
    Ready,
}

impl fmt::Display for SessionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            SessionState::Disconnected => "disconnected",
            SessionState::Connecting => "connecting",
            SessionState::Authenticating => "authenticating",
            SessionState::Ready => "ready",
        };
        f.write_str(name)
    }
}

/// One authenticated TCP connection to a panel.
///
/// Commands are written and their replies drained one at a time; the socket
/// lock is held for the whole exchange. The end of a reply is detected by
/// the read going idle, so a panel that stalls longer than the idle timeout
/// mid-reply gets its reply truncated. Pacing between commands is left to
/// [`CommandQueue`](crate::transport::queue::CommandQueue).
pub struct Session {
    config: PanelConfig,
    identity: PanelIdentity,
    codec: DmpCodec,
    auth: Command,
    registry: ConnectionRegistry,
    stream: Mutex<Option<TcpStream>>,
    registration: Mutex<Option<Registration>>,
    state: watch::Sender<SessionState>,
}

impl Session {
    /// Validate the account and key and prepare an unconnected session.
    pub fn new(config: PanelConfig, registry: ConnectionRegistry) -> Result<Self> {
        let account = AccountId::new(&config.account)?;
        let auth = Command::auth(config.remote_key.clone())?;
        let identity = PanelIdentity::new(config.host.clone(), config.port, account.as_str());
        let codec = DmpCodec::new(account, &config.remote_key);
        let (state, _) = watch::channel(SessionState::Disconnected);

        Ok(Self {
            config,
            identity,
            codec,
            auth,
            registry,
            stream: Mutex::new(None),
            registration: Mutex::new(None),
            state,
        })
    }

    pub fn identity(&self) -> &PanelIdentity {
        &self.identity
    }

    pub fn config(&self) -> &PanelConfig {
        &self.config
    }

    pub fn state(&self) -> SessionState {
        *self.state.borrow()
    }

    /// Watch state transitions.
    pub fn subscribe_state(&self) -> watch::Receiver<SessionState> {
        self.state.subscribe()
    }

    pub fn is_connected(&self) -> bool {
        self.state() == SessionState::Ready
    }

    fn set_state(&self, state: SessionState) {
        let previous = self.state.send_replace(state);
        if previous != state {
            debug!("Session {} state: {} -> {}", self.identity, previous, state);
        }
    }

    /// Open the socket and authenticate.
    ///
    /// Fails with `AlreadyConnected` before dialing if another session holds
    /// this identity in the registry.
    pub async fn connect(&self) -> Result<()> {
        if self.is_connected() {
            return Ok(());
        }

        let registration = self.registry.register(self.identity.clone())?;
        self.set_state(SessionState::Connecting);

        let addr = format!("{}:{}", self.config.host, self.config.port);
        info!("Connecting to panel at {}", addr);

        let stream = match timeout(self.config.connect_timeout(), TcpStream::connect(&addr)).await
        {
            Ok(Ok(stream)) => stream,
            Ok(Err(e)) => {
                error!("TCP connect to {} failed: {}", addr, e);
                self.set_state(SessionState::Disconnected);
                return Err(DmpError::Connection(format!("{}: {}", addr, e)));
            }
            Err(_) => {
                error!("TCP connect to {} timed out", addr);
                self.set_state(SessionState::Disconnected);
                return Err(DmpError::Timeout(format!(
                    "connecting to {} after {:?}",
                    addr,
                    self.config.connect_timeout()
                )));
            }
        };
        if let Err(e) = stream.set_nodelay(true) {
            debug!("Could not set TCP_NODELAY: {}", e);
        }

        *self.stream.lock().await = Some(stream);
        *self.registration.lock().await = Some(registration);
        self.set_state(SessionState::Authenticating);

        let reply = self.exchange(&self.auth).await;
        let closed = self.stream.lock().await.is_none();
        match reply {
            Ok(response) if closed => {
                // answered, then hung up: the key was refused
                error!(
                    "Panel {} closed the connection during authentication ({} reply)",
                    self.identity,
                    response.kind()
                );
                self.teardown().await;
                Err(DmpError::Authentication(format!(
                    "{} closed the connection after the auth reply",
                    self.identity
                )))
            }
            Ok(response) => {
                debug!("Authentication reply: {}", response.kind());
                self.set_state(SessionState::Ready);
                info!("Connected to panel {}", self.identity);
                Ok(())
            }
            Err(e) => {
                error!("Authentication with {} failed: {}", self.identity, e);
                self.teardown().await;
                Err(DmpError::Authentication(e.to_string()))
            }
        }
    }

    /// Send one command and decode its reply. Requires a ready session.
    pub async fn send(&self, command: &Command) -> Result<Response> {
        if !self.is_connected() {
            return Err(DmpError::NotConnected);
        }
        self.exchange(command).await
    }

    /// Send the keep-alive command. Callers may ignore the reply.
    pub async fn keep_alive(&self) -> Result<Response> {
        self.send(&Command::KeepAlive).await
    }

    /// Send `!V0` if possible, then close. Always ends Disconnected.
    pub async fn disconnect(&self) {
        let mut guard = self.stream.lock().await;
        if let Some(mut stream) = guard.take() {
            match self.codec.encode(&Command::Disconnect) {
                Ok(frame) => {
                    if let Err(e) = stream.write_all(&frame).await {
                        warn!("Disconnect command to {} failed: {}", self.identity, e);
                    }
                }
                Err(e) => warn!("Could not encode disconnect command: {}", e),
            }
            if let Err(e) = stream.shutdown().await {
                debug!("Socket shutdown error: {}", e);
            }
            info!("Disconnected from panel {}", self.identity);
        }
        drop(guard);
        self.release().await;
    }

    /// Write a command and drain its reply while holding the socket.
    async fn exchange(&self, command: &Command) -> Result<Response> {
        let frame = self.codec.encode(command)?;

        let mut guard = self.stream.lock().await;
        let Some(stream) = guard.as_mut() else {
            return Err(DmpError::NotConnected);
        };

        debug!("Sending command: {}", command);
        let result = async {
            stream.write_all(&frame).await?;
            stream.flush().await?;
            self.read_reply(stream).await
        }
        .await;

        match result {
            Ok((buffer, closed)) => {
                if closed {
                    warn!("Panel {} closed the connection", self.identity);
                    guard.take();
                    drop(guard);
                    self.release().await;
                }
                debug!("Received {} bytes for {}", buffer.len(), command);
                self.codec.decode(&buffer)
            }
            Err(e) => {
                error!("I/O error talking to {}: {}", self.identity, e);
                guard.take();
                drop(guard);
                self.release().await;
                Err(DmpError::Io(e))
            }
        }
    }

    /// Drain a reply until the socket goes idle.
    ///
    /// Returns the bytes read and whether the peer closed the socket. EOF
    /// before any byte arrived is an error.
    async fn read_reply(&self, stream: &mut TcpStream) -> std::io::Result<(Vec<u8>, bool)> {
        sleep(self.config.settle_delay()).await;

        let idle = self.config.read_idle_timeout();
        let max = self.config.max_response_time();
        let deadline = Instant::now() + max;
        let mut buffer = Vec::new();
        let mut chunk = [0u8; READ_CHUNK_SIZE];

        loop {
            let remaining = deadline.saturating_duration_since(Instant::now());
            if remaining.is_zero() {
                warn!(
                    "Reply from {} still arriving after {:?}, decoding {} bytes",
                    self.identity,
                    max,
                    buffer.len()
                );
                return Ok((buffer, false));
            }

            match timeout(idle.min(remaining), stream.read(&mut chunk)).await {
                Err(_) => {
                    if remaining <= idle {
                        continue;
                    }
                    return Ok((buffer, false));
                }
                Ok(Ok(0)) => {
                    if buffer.is_empty() {
                        return Err(std::io::Error::new(
                            std::io::ErrorKind::UnexpectedEof,
                            "connection closed by panel",
                        ));
                    }
                    return Ok((buffer, true));
                }
                Ok(Ok(n)) => buffer.extend_from_slice(&chunk[..n]),
                Ok(Err(e)) => return Err(e),
            }
        }
    }

    async fn teardown(&self) {
        if let Some(mut stream) = self.stream.lock().await.take() {
            let _ = stream.shutdown().await;
        }
        self.release().await;
    }

    /// Drop the registry claim and mark the session disconnected.
    async fn release(&self) {
        self.registration.lock().await.take();
        self.set_state(SessionState::Disconnected);
    }
}

impl fmt::Debug for Session {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Session")
            .field("identity", &self.identity)
            .field("state", &self.state())
            .finish()
    }
}

impl Transport for Session {
    async fn send(&self, command: &Command) -> Result<Response> {
        Session::send(self, command).await
    }

    async fn close(&self) {
        self.disconnect().await
    }

    fn is_connected(&self) -> bool {
        Session::is_connected(self)
    }
}
