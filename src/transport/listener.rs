// MIT License - Copyright (c) 2021 TJForc
// Inbound push-event server

use std::net::SocketAddr;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, RwLock};

use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::watch;
use tokio::task::{JoinHandle, JoinSet};
use tokio::time::{Duration, timeout};
use tracing::{debug, error, info, warn};

use crate::config::ListenerConfig;
use crate::constants::{ACK, CR, LF, STX};
use crate::error::{DmpError, Result};
use crate::event::{EventReceiver, EventSender, PushEvent, classify, event_channel};
use crate::protocol::AccountId;

const READ_CHUNK_SIZE: usize = 4096;
/// Upper bound on how long `stop()` waits for connections to wind down.
const STOP_GRACE: Duration = Duration::from_secs(5);

type Callback = Arc<dyn Fn(&str) + Send + Sync>;

struct Shared {
    config: ListenerConfig,
    callbacks: RwLock<Vec<Callback>>,
    events: EventSender,
    active: AtomicUsize,
}

struct Running {
    local_addr: SocketAddr,
    shutdown: watch::Sender<bool>,
    task: JoinHandle<()>,
}

/// TCP server the panel connects to when it pushes realtime events.
///
/// Each line is passed to every registered callback in registration order,
/// then classified and published to every [`subscribe`](Self::subscribe)r.
/// Connections are serviced concurrently; lines within one connection are
/// handled in arrival order.
pub struct EventListener {
    shared: Arc<Shared>,
    running: Mutex<Option<Running>>,
}

impl EventListener {
    pub fn new(config: ListenerConfig) -> Self {
        let (events, _) = event_channel(config.event_capacity);
        Self {
            shared: Arc::new(Shared {
                config,
                callbacks: RwLock::new(Vec::new()),
                events,
                active: AtomicUsize::new(0),
            }),
            running: Mutex::new(None),
        }
    }

    fn lock_running(&self) -> MutexGuard<'_, Option<Running>> {
        self.running
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    pub fn config(&self) -> &ListenerConfig {
        &self.shared.config
    }

    /// Register a raw-line callback. Callbacks run synchronously on the
    /// connection's task, so a slow one delays that connection only.
    pub fn register_callback<F>(&self, callback: F)
    where
        F: Fn(&str) + Send + Sync + 'static,
    {
        self.shared
            .callbacks
            .write()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .push(Arc::new(callback));
    }

    /// Receive every classified event from now on.
    pub fn subscribe(&self) -> EventReceiver {
        self.shared.events.subscribe()
    }

    /// Bind and start accepting. Returns the bound address; a second call
    /// while running returns the existing address.
    pub async fn start(&self) -> Result<SocketAddr> {
        if let Some(addr) = self.local_addr() {
            return Ok(addr);
        }

        let bind = self.shared.config.bind_address();
        let listener = TcpListener::bind(&bind).await.map_err(|e| {
            error!("Failed to bind event listener on {}: {}", bind, e);
            DmpError::Io(e)
        })?;
        let local_addr = listener
            .local_addr()
            .map_err(|e| DmpError::Listener(format!("no local address for {}: {}", bind, e)))?;

        let mut running = self.lock_running();
        if let Some(existing) = running.as_ref() {
            return Ok(existing.local_addr);
        }

        let (shutdown, shutdown_rx) = watch::channel(false);
        let task = tokio::spawn(accept_loop(listener, self.shared.clone(), shutdown_rx));
        *running = Some(Running {
            local_addr,
            shutdown,
            task,
        });
        info!("Event listener started on {}", local_addr);
        Ok(local_addr)
    }

    /// Close the listening socket and every accepted connection.
    pub async fn stop(&self) {
        let Some(running) = self.lock_running().take() else {
            return;
        };

        let _ = running.shutdown.send(true);
        let mut task = running.task;
        match timeout(STOP_GRACE, &mut task).await {
            Ok(Ok(())) => {}
            Ok(Err(e)) => warn!("Event listener task ended abnormally: {}", e),
            Err(_) => {
                warn!("Event listener did not stop within {:?}, aborting", STOP_GRACE);
                task.abort();
            }
        }
        info!("Event listener on {} stopped", running.local_addr);
    }

    pub fn is_running(&self) -> bool {
        self.lock_running().is_some()
    }

    pub fn local_addr(&self) -> Option<SocketAddr> {
        self.lock_running().as_ref().map(|r| r.local_addr)
    }

    /// Number of inbound connections currently being serviced.
    pub fn active_connections(&self) -> usize {
        self.shared.active.load(Ordering::SeqCst)
    }
}

impl Drop for EventListener {
    fn drop(&mut self) {
        if let Some(running) = self.lock_running().take() {
            let _ = running.shutdown.send(true);
        }
    }
}

async fn accept_loop(
    listener: TcpListener,
    shared: Arc<Shared>,
    mut shutdown: watch::Receiver<bool>,
) {
    let mut connections = JoinSet::new();

    loop {
        tokio::select! {
            _ = shutdown.changed() => break,
            accepted = listener.accept() => match accepted {
                Ok((stream, peer)) => {
                    info!("Panel connected from {}", peer);
                    connections.spawn(handle_connection(
                        stream,
                        peer,
                        shared.clone(),
                        shutdown.clone(),
                    ));
                }
                Err(e) => warn!("Accept failed: {}", e),
            },
            Some(finished) = connections.join_next(), if !connections.is_empty() => {
                if let Err(e) = finished {
                    warn!("Connection task failed: {}", e);
                }
            }
        }
    }

    drop(listener);
    while connections.join_next().await.is_some() {}
    debug!("Accept loop exited");
}

/// Keeps the active-connection count accurate however the task ends.
struct ConnectionGuard<'a>(&'a AtomicUsize);

impl<'a> ConnectionGuard<'a> {
    fn new(counter: &'a AtomicUsize) -> Self {
        counter.fetch_add(1, Ordering::SeqCst);
        Self(counter)
    }
}

impl Drop for ConnectionGuard<'_> {
    fn drop(&mut self) {
        self.0.fetch_sub(1, Ordering::SeqCst);
    }
}

async fn handle_connection(
    mut stream: TcpStream,
    peer: SocketAddr,
    shared: Arc<Shared>,
    shutdown: watch::Receiver<bool>,
) {
    let _guard = ConnectionGuard::new(&shared.active);
    let poll = shared.config.poll_interval();
    let max_line = shared.config.max_line_len;
    let mut buffer: Vec<u8> = Vec::new();
    let mut discarding = false;
    let mut chunk = [0u8; READ_CHUNK_SIZE];

    loop {
        if *shutdown.borrow() {
            debug!("Closing connection from {} on shutdown", peer);
            break;
        }

        match timeout(poll, stream.read(&mut chunk)).await {
            Err(_) => continue,
            Ok(Ok(0)) => {
                debug!("Panel {} closed the connection", peer);
                break;
            }
            Ok(Ok(n)) => {
                buffer.extend_from_slice(&chunk[..n]);
                while let Some(end) = buffer.iter().position(|b| *b == CR || *b == LF) {
                    let line: Vec<u8> = buffer.drain(..=end).collect();
                    if discarding {
                        // tail of an oversized line
                        discarding = false;
                        continue;
                    }
                    shared.handle_line(&line[..end], &mut stream).await;
                }
                if discarding {
                    buffer.clear();
                } else if buffer.len() > max_line {
                    warn!(
                        "Discarding {} bytes from {} without a line terminator",
                        buffer.len(),
                        peer
                    );
                    buffer.clear();
                    discarding = true;
                }
            }
            Ok(Err(e)) => {
                warn!("Read error from {}: {}", peer, e);
                break;
            }
        }
    }

    if !buffer.is_empty() && !discarding {
        shared.handle_line(&buffer, &mut stream).await;
    }
    let _ = stream.shutdown().await;
    info!("Connection from {} closed", peer);
}

impl Shared {
    async fn handle_line(&self, raw: &[u8], stream: &mut TcpStream) {
        let text = String::from_utf8_lossy(raw);
        let line = text.trim_start_matches(|c| c == STX as char || c == LF as char);
        if line.trim().is_empty() {
            return;
        }
        debug!("Push line: {:?}", line);

        let callbacks: Vec<Callback> = self
            .callbacks
            .read()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .clone();
        for callback in &callbacks {
            callback(line);
        }

        let event = classify(line);
        if self.config.acknowledge {
            self.acknowledge(&event, stream).await;
        }
        // no subscribers is fine
        let _ = self.events.send(event);
    }

    async fn acknowledge(&self, event: &PushEvent, stream: &mut TcpStream) {
        let Ok(account) = AccountId::new(&event.account) else {
            return;
        };
        let mut ack = vec![STX];
        ack.extend_from_slice(account.wire_field().as_bytes());
        ack.push(ACK);
        ack.push(CR);
        if let Err(e) = stream.write_all(&ack).await {
            debug!("Could not acknowledge event for account {}: {}", account, e);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    use std::sync::Mutex as StdMutex;

    fn test_config() -> ListenerConfig {
        ListenerConfig::builder()
            .host("127.0.0.1")
            .port(0)
            .poll_interval_ms(20)
            .max_line_len(64)
            .build()
    }

    async fn wait_until(mut check: impl FnMut() -> bool) {
        for _ in 0..100 {
            if check() {
                return;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        panic!("condition not reached");
    }

    #[tokio::test]
    async fn test_start_is_idempotent() {
        let listener = EventListener::new(test_config());
        let first = listener.start().await.unwrap();
        let second = listener.start().await.unwrap();
        assert_eq!(first, second);
        assert_ne!(first.port(), 0);
        listener.stop().await;
        listener.stop().await;
        assert!(!listener.is_running());
        assert_eq!(listener.local_addr(), None);
    }

    #[tokio::test]
    async fn test_callbacks_in_order_and_ack() {
        let listener = EventListener::new(test_config());
        let seen = Arc::new(StdMutex::new(Vec::new()));
        for tag in ["first", "second"] {
            let seen = seen.clone();
            listener.register_callback(move |line| {
                seen.lock().unwrap().push(format!("{}:{}", tag, line));
            });
        }
        let mut events = listener.subscribe();
        let addr = listener.start().await.unwrap();

        let mut panel = TcpStream::connect(addr).await.unwrap();
        panel
            .write_all(b"\x02    1 Zq\\t \"OP\\a 1\"House\\\r")
            .await
            .unwrap();

        let event = events.recv().await.unwrap();
        assert_eq!(event.account, "1");
        assert_eq!(event.area_name.as_deref(), Some("House"));

        let mut ack = [0u8; 8];
        panel.read_exact(&mut ack).await.unwrap();
        assert_eq!(&ack, b"\x02    1\x06\r");

        let seen = seen.lock().unwrap().clone();
        assert_eq!(
            seen,
            vec![
                "first:    1 Zq\\t \"OP\\a 1\"House\\".to_string(),
                "second:    1 Zq\\t \"OP\\a 1\"House\\".to_string(),
            ]
        );
        listener.stop().await;
    }

    #[tokio::test]
    async fn test_split_lines_and_oversized_discard() {
        let listener = EventListener::new(test_config());
        let lines = Arc::new(StdMutex::new(Vec::new()));
        let sink = lines.clone();
        listener.register_callback(move |line| sink.lock().unwrap().push(line.to_string()));
        let addr = listener.start().await.unwrap();

        let mut panel = TcpStream::connect(addr).await.unwrap();
        panel.write_all(b"1 Zs\\s 0").await.unwrap();
        tokio::time::sleep(Duration::from_millis(30)).await;
        panel.write_all(b"08\\\r\n\r\n").await.unwrap();
        panel.write_all(&[b'x'; 100]).await.unwrap();
        tokio::time::sleep(Duration::from_millis(30)).await;
        panel.write_all(b"\n1 Zq\\t \"CL\\\r").await.unwrap();

        let check = lines.clone();
        wait_until(move || check.lock().unwrap().len() >= 2).await;
        let lines = lines.lock().unwrap().clone();
        assert_eq!(lines, vec!["1 Zs\\s 008\\", "1 Zq\\t \"CL\\"]);
        listener.stop().await;
    }

    #[tokio::test]
    async fn test_oversized_line_tail_is_dropped() {
        let listener = EventListener::new(test_config());
        let lines = Arc::new(StdMutex::new(Vec::new()));
        let sink = lines.clone();
        listener.register_callback(move |line| sink.lock().unwrap().push(line.to_string()));
        let addr = listener.start().await.unwrap();

        let mut panel = TcpStream::connect(addr).await.unwrap();
        panel.write_all(&[b'x'; 70]).await.unwrap();
        tokio::time::sleep(Duration::from_millis(50)).await;
        panel.write_all(&[b'y'; 30]).await.unwrap();
        tokio::time::sleep(Duration::from_millis(50)).await;
        panel.write_all(b"\r1 Zq\\t \"OP\\\r").await.unwrap();

        let check = lines.clone();
        wait_until(move || !check.lock().unwrap().is_empty()).await;
        tokio::time::sleep(Duration::from_millis(50)).await;
        let lines = lines.lock().unwrap().clone();
        assert_eq!(lines, vec!["1 Zq\\t \"OP\\"]);
        listener.stop().await;
    }

    #[tokio::test]
    async fn test_stop_closes_active_connections() {
        let listener = EventListener::new(test_config());
        let addr = listener.start().await.unwrap();

        let mut a = TcpStream::connect(addr).await.unwrap();
        let mut b = TcpStream::connect(addr).await.unwrap();
        wait_until(|| listener.active_connections() == 2).await;

        listener.stop().await;
        assert_eq!(listener.active_connections(), 0);

        let mut buf = [0u8; 1];
        assert_eq!(a.read(&mut buf).await.unwrap_or(0), 0);
        assert_eq!(b.read(&mut buf).await.unwrap_or(0), 0);
        assert!(TcpStream::connect(addr).await.is_err());
    }

    #[tokio::test]
    async fn test_no_ack_when_disabled() {
        let config = ListenerConfig {
            acknowledge: false,
            ..test_config()
        };
        let listener = EventListener::new(config);
        let mut events = listener.subscribe();
        let addr = listener.start().await.unwrap();

        let mut panel = TcpStream::connect(addr).await.unwrap();
        panel.write_all(b"1 Zq\\t \"OP\\\r").await.unwrap();
        events.recv().await.unwrap();

        let mut buf = [0u8; 1];
        let read = timeout(Duration::from_millis(100), panel.read(&mut buf)).await;
        assert!(read.is_err(), "unexpected bytes from listener");
        listener.stop().await;
    }
}
