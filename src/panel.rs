// MIT License - Copyright (c) 2021 TJForc
// High-level panel API over the command queue

use std::sync::{Arc, Mutex, MutexGuard};

use tokio::sync::{RwLock, watch};
use tokio::task::JoinHandle;
use tokio::time::{Duration, sleep};
use tracing::{debug, info, warn};

use crate::codec::Response;
use crate::config::PanelConfig;
use crate::constants::{MIN_KEEPALIVE_INTERVAL, STATUS_CONTINUATIONS};
use crate::error::{DmpError, Result};
use crate::protocol::{ArmOptions, Command, OutputMode};
use crate::records::{
    AreaStatus, StatusSnapshot, UserCodeRecord, UserProfileRecord, ZoneStatus,
};
use crate::transport::Transport;
use crate::transport::queue::CommandQueue;
use crate::transport::registry::ConnectionRegistry;
use crate::transport::session::Session;

struct KeepAliveTask {
    shutdown: watch::Sender<bool>,
    handle: JoinHandle<()>,
}

/// The main public API for talking to a DMP panel.
///
/// Every command goes through one [`CommandQueue`], so calls from several
/// tasks are serialized and paced. The last status read is cached.
///
/// # Example
///
/// ```no_run
/// use dmp_lan_bridge::{ArmOptions, ConnectionRegistry, DmpPanel, PanelConfig};
///
/// #[tokio::main]
/// async fn main() -> anyhow::Result<()> {
///     let config = PanelConfig::builder()
///         .host("192.168.1.50")
///         .account("12345")
///         .remote_key("SECRET")
///         .build();
///
///     let panel = DmpPanel::connect(config, ConnectionRegistry::new()).await?;
///     panel.start_keepalive(std::time::Duration::from_secs(10));
///
///     let status = panel.status().await;
///     for area in status.areas.values() {
///         println!("Area {}: {} ({:?})", area.number, area.name, area.state);
///     }
///
///     panel.arm_areas(&[1], ArmOptions::default()).await?;
///     panel.disconnect().await;
///     Ok(())
/// }
/// ```
pub struct DmpPanel<T: Transport = Session> {
    queue: CommandQueue<T>,
    status: Arc<RwLock<StatusSnapshot>>,
    keepalive: Mutex<Option<KeepAliveTask>>,
}

impl DmpPanel<Session> {
    /// Open a session, start the queue and read the initial status.
    ///
    /// If the initial status read fails the session is closed again and the
    /// error returned.
    pub async fn connect(config: PanelConfig, registry: ConnectionRegistry) -> Result<Self> {
        let interval = config.command_interval();
        let session = Session::new(config, registry)?;
        session.connect().await?;

        let panel = Self::from_transport(Arc::new(session), interval);
        if let Err(e) = panel.update_status().await {
            warn!("Initial status update failed: {}", e);
            panel.disconnect().await;
            return Err(e);
        }
        info!("Panel connected and initialized");
        Ok(panel)
    }
}

impl<T: Transport> DmpPanel<T> {
    /// Wrap an already connected transport. Must be called inside a Tokio runtime.
    pub fn from_transport(transport: Arc<T>, min_interval: Duration) -> Self {
        let queue = CommandQueue::new(transport, min_interval);
        queue.start();
        Self {
            queue,
            status: Arc::new(RwLock::new(StatusSnapshot::new())),
            keepalive: Mutex::new(None),
        }
    }

    pub fn transport(&self) -> &Arc<T> {
        self.queue.transport()
    }

    pub fn queue(&self) -> &CommandQueue<T> {
        &self.queue
    }

    pub fn is_connected(&self) -> bool {
        self.transport().is_connected()
    }

    /// Send any command through the queue.
    pub async fn send(&self, command: Command) -> Result<Response> {
        self.queue.execute(command).await
    }

    // --- Status ---

    /// Query zone status from the first zone plus the continuation pages and
    /// merge them into the cached snapshot. Returns the updated snapshot.
    pub async fn update_status(&self) -> Result<StatusSnapshot> {
        debug!("Updating panel status");

        // enqueue the whole batch at once so other callers can't interleave
        let mut handles = Vec::with_capacity(STATUS_CONTINUATIONS + 1);
        handles.push(self.queue.enqueue(Command::zone_status(1)?)?);
        for _ in 0..STATUS_CONTINUATIONS {
            handles.push(self.queue.enqueue(Command::ZoneStatusContinue)?);
        }

        let mut merged = StatusSnapshot::new();
        for handle in handles {
            if let Response::Status(page) = handle.wait().await? {
                merged.merge(page);
            }
        }

        let mut status = self.status.write().await;
        status.merge(merged);
        info!(
            "Status updated: {} areas, {} zones",
            status.areas.len(),
            status.zones.len()
        );
        Ok(status.clone())
    }

    /// The cached snapshot from the last [`update_status`](Self::update_status).
    pub async fn status(&self) -> StatusSnapshot {
        self.status.read().await.clone()
    }

    pub async fn area(&self, number: &str) -> Option<AreaStatus> {
        self.status.read().await.area(number).cloned()
    }

    pub async fn zone(&self, number: &str) -> Option<ZoneStatus> {
        self.status.read().await.zone(number).cloned()
    }

    // --- Commands ---

    pub async fn arm_areas(&self, areas: &[u8], options: ArmOptions) -> Result<()> {
        debug!("Arming areas {:?} ({:?})", areas, options);
        self.control(Command::arm(areas, options)?).await
    }

    pub async fn disarm_areas(&self, areas: &[u8]) -> Result<()> {
        debug!("Disarming areas {:?}", areas);
        self.control(Command::disarm(areas)?).await
    }

    pub async fn bypass_zone(&self, zone: u16) -> Result<()> {
        self.control(Command::bypass_zone(zone)?).await
    }

    pub async fn restore_zone(&self, zone: u16) -> Result<()> {
        self.control(Command::restore_zone(zone)?).await
    }

    pub async fn set_output(&self, output: u16, mode: OutputMode) -> Result<()> {
        self.control(Command::output(output, mode)?).await
    }

    pub async fn sensor_reset(&self) -> Result<()> {
        self.control(Command::SensorReset).await
    }

    /// Send a control command and require an ack.
    async fn control(&self, command: Command) -> Result<()> {
        let label = command.to_string();
        match self.send(command).await? {
            Response::Ack => Ok(()),
            Response::Nak => {
                warn!("Panel rejected {}", label);
                Err(DmpError::Rejected { command: label })
            }
            other => Err(DmpError::InvalidResponse {
                details: format!("expected ack for {}, got {}", label, other.kind()),
            }),
        }
    }

    // --- Users ---

    /// Read every user code, following the panel's pagination.
    pub async fn user_codes(&self) -> Result<Vec<UserCodeRecord>> {
        let mut users = Vec::new();
        let mut start = 0u16;
        loop {
            let Response::UserCodes(page) = self.send(Command::user_codes(start)?).await? else {
                break;
            };
            let next = page.next_start();
            users.extend(page.records);
            match next {
                Some(next) if next > start && Command::user_codes(next).is_ok() => start = next,
                _ => break,
            }
        }
        debug!("Read {} user codes", users.len());
        Ok(users)
    }

    /// Read every user profile, following the panel's pagination.
    pub async fn user_profiles(&self) -> Result<Vec<UserProfileRecord>> {
        let mut profiles = Vec::new();
        let mut start = 0u16;
        loop {
            let Response::UserProfiles(page) = self.send(Command::user_profiles(start)?).await?
            else {
                break;
            };
            let next = page.next_start();
            profiles.extend(page.records);
            match next {
                Some(next) if next > start && Command::user_profiles(next).is_ok() => {
                    start = next
                }
                _ => break,
            }
        }
        debug!("Read {} user profiles", profiles.len());
        Ok(profiles)
    }

    /// Find the first user whose code (or PIN, if `include_pin`) equals `code`.
    pub async fn check_code(&self, code: &str, include_pin: bool) -> Result<Option<UserCodeRecord>> {
        let code = code.trim();
        if code.is_empty() {
            return Ok(None);
        }
        let users = self.user_codes().await?;
        Ok(users
            .into_iter()
            .find(|u| u.code == code || (include_pin && !u.pin.is_empty() && u.pin == code)))
    }

    // --- Keep-alive ---

    fn lock_keepalive(&self) -> MutexGuard<'_, Option<KeepAliveTask>> {
        self.keepalive
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Send `!H` every `interval` (at least one second) while connected.
    /// Replaces a loop that is already running.
    pub fn start_keepalive(&self, interval: Duration) {
        let interval = interval.max(MIN_KEEPALIVE_INTERVAL);
        let (shutdown, mut shutdown_rx) = watch::channel(false);
        let queue = self.queue.clone();

        let handle = tokio::spawn(async move {
            debug!("Keep-alive loop started ({:?})", interval);
            while queue.transport().is_connected() {
                match queue.execute(Command::KeepAlive).await {
                    Ok(_) => {}
                    Err(DmpError::QueueShutdown) => break,
                    Err(e) => debug!("Keep-alive send failed: {}", e),
                }
                tokio::select! {
                    _ = sleep(interval) => {}
                    _ = shutdown_rx.changed() => break,
                }
            }
            debug!("Keep-alive loop stopped");
        });

        if let Some(previous) = self
            .lock_keepalive()
            .replace(KeepAliveTask { shutdown, handle })
        {
            let _ = previous.shutdown.send(true);
            previous.handle.abort();
        }
    }

    /// Stop the keep-alive loop if running.
    pub async fn stop_keepalive(&self) {
        let Some(task) = self.lock_keepalive().take() else {
            return;
        };
        let _ = task.shutdown.send(true);
        if let Err(e) = task.handle.await
            && !e.is_cancelled()
        {
            warn!("Keep-alive task ended abnormally: {}", e);
        }
    }

    pub fn keepalive_running(&self) -> bool {
        self.lock_keepalive()
            .as_ref()
            .is_some_and(|task| !task.handle.is_finished())
    }

    /// Stop keep-alive, drain the queue and close the transport. Never fails.
    pub async fn disconnect(&self) {
        info!("Disconnecting from panel");
        self.stop_keepalive().await;
        self.queue.stop().await;
        self.transport().close().await;
        *self.status.write().await = StatusSnapshot::new();
    }
}

impl<T: Transport> Drop for DmpPanel<T> {
    fn drop(&mut self) {
        if let Some(task) = self.lock_keepalive().take() {
            let _ = task.shutdown.send(true);
            task.handle.abort();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    use std::collections::VecDeque;
    use std::sync::atomic::{AtomicBool, Ordering};

    use crate::records::{AreaState, RecordPage, UserCodePage, UserProfilePage, ZoneState};

    /// Replies from a script and records the wire body of each command.
    #[derive(Default)]
    struct ScriptedTransport {
        script: Mutex<VecDeque<Result<Response>>>,
        sent: Mutex<Vec<String>>,
        closed: AtomicBool,
    }

    impl ScriptedTransport {
        fn with(replies: Vec<Result<Response>>) -> Arc<Self> {
            Arc::new(Self {
                script: Mutex::new(replies.into()),
                ..Default::default()
            })
        }

        fn sent(&self) -> Vec<String> {
            self.sent.lock().unwrap().clone()
        }
    }

    impl Transport for ScriptedTransport {
        async fn send(&self, command: &Command) -> Result<Response> {
            self.sent.lock().unwrap().push(command.to_wire_string());
            self.script
                .lock()
                .unwrap()
                .pop_front()
                .unwrap_or(Ok(Response::NoData))
        }

        async fn close(&self) {
            self.closed.store(true, Ordering::SeqCst);
        }

        fn is_connected(&self) -> bool {
            !self.closed.load(Ordering::SeqCst)
        }
    }

    fn panel(transport: &Arc<ScriptedTransport>) -> DmpPanel<ScriptedTransport> {
        DmpPanel::from_transport(transport.clone(), Duration::ZERO)
    }

    fn status_page(areas: &[&str], zones: &[&str]) -> Response {
        let mut snapshot = StatusSnapshot::new();
        for record in areas {
            snapshot.upsert_area(AreaStatus::parse(record).unwrap());
        }
        for record in zones {
            snapshot.upsert_zone(ZoneStatus::parse(record).unwrap());
        }
        Response::Status(snapshot)
    }

    fn user(number: &str, code: &str, pin: &str) -> UserCodeRecord {
        UserCodeRecord {
            number: number.into(),
            code: code.into(),
            pin: pin.into(),
            profiles: Default::default(),
            temp_date: String::new(),
            exp_date: String::new(),
            name: format!("USER {}", number),
        }
    }

    #[tokio::test]
    async fn test_update_status_merges_pages() {
        let transport = ScriptedTransport::with(vec![
            Ok(status_page(&["A  1DHome"], &["L001NFront", "L002OBack"])),
            Ok(status_page(&[], &["L002NBack", "L003SGarage"])),
            Ok(Response::NoData),
        ]);
        let panel = panel(&transport);

        let status = panel.update_status().await.unwrap();
        assert_eq!(status.areas["1"].state, AreaState::Disarmed);
        assert_eq!(status.zones.len(), 3);
        // later page wins
        assert_eq!(status.zones["002"].state, ZoneState::Normal);
        assert_eq!(status.zones["003"].state, ZoneState::Short);

        let mut expected = vec!["?WB**Y001".to_string()];
        expected.extend(std::iter::repeat_n("?WB".to_string(), 10));
        assert_eq!(transport.sent(), expected);

        assert_eq!(panel.zone("003").await.unwrap().name, "Garage");
        assert_eq!(panel.area("1").await.unwrap().name, "Home");
        panel.disconnect().await;
    }

    #[tokio::test]
    async fn test_update_status_propagates_errors() {
        let transport = ScriptedTransport::with(vec![
            Ok(status_page(&["A  1DHome"], &[])),
            Err(DmpError::NotConnected),
        ]);
        let panel = panel(&transport);
        assert!(matches!(
            panel.update_status().await,
            Err(DmpError::NotConnected)
        ));
        assert!(panel.status().await.is_empty());
    }

    #[tokio::test]
    async fn test_control_results() {
        let transport = ScriptedTransport::with(vec![
            Ok(Response::Ack),
            Ok(Response::Nak),
            Ok(Response::NoData),
        ]);
        let panel = panel(&transport);

        panel
            .arm_areas(&[1, 2], ArmOptions { bypass_faulted: true, ..Default::default() })
            .await
            .unwrap();
        match panel.disarm_areas(&[1]).await {
            Err(DmpError::Rejected { command }) => assert_eq!(command, "!O01"),
            other => panic!("expected rejection, got {:?}", other),
        }
        assert!(matches!(
            panel.bypass_zone(5).await,
            Err(DmpError::InvalidResponse { .. })
        ));
        assert_eq!(transport.sent(), vec!["!C0102,YN", "!O01", "!X005"]);
    }

    #[tokio::test]
    async fn test_invalid_arguments_never_reach_the_wire() {
        let transport = ScriptedTransport::with(vec![]);
        let panel = panel(&transport);
        assert!(matches!(panel.bypass_zone(0).await, Err(DmpError::Protocol(_))));
        assert!(matches!(panel.arm_areas(&[], ArmOptions::default()).await, Err(DmpError::Protocol(_))));
        assert!(transport.sent().is_empty());
    }

    #[tokio::test]
    async fn test_output_and_sensor_reset() {
        let transport = ScriptedTransport::with(vec![Ok(Response::Ack), Ok(Response::Ack)]);
        let panel = panel(&transport);
        panel.set_output(3, OutputMode::Pulse).await.unwrap();
        panel.sensor_reset().await.unwrap();
        assert_eq!(transport.sent(), vec!["!Q003P", "!E001"]);
    }

    #[tokio::test]
    async fn test_user_codes_follow_pages() {
        let first: UserCodePage = RecordPage {
            records: vec![user("0001", "1234", "99"), user("0002", "5555", "")],
            has_more: true,
            last_number: Some("0002".into()),
        };
        let second: UserCodePage = RecordPage {
            records: vec![user("0003", "7777", "")],
            has_more: false,
            last_number: Some("0003".into()),
        };
        let transport = ScriptedTransport::with(vec![
            Ok(Response::UserCodes(first)),
            Ok(Response::UserCodes(second)),
        ]);
        let panel = panel(&transport);

        let users = panel.user_codes().await.unwrap();
        assert_eq!(users.len(), 3);
        assert_eq!(transport.sent(), vec!["?P=0000", "?P=0003"]);
    }

    #[tokio::test]
    async fn test_user_codes_stop_on_stalled_cursor() {
        let page: UserCodePage = RecordPage {
            records: vec![],
            has_more: true,
            last_number: None,
        };
        let transport = ScriptedTransport::with(vec![Ok(Response::UserCodes(page))]);
        let panel = panel(&transport);
        assert!(panel.user_codes().await.unwrap().is_empty());
        assert_eq!(transport.sent().len(), 1);
    }

    #[tokio::test]
    async fn test_user_profiles_follow_pages() {
        let profile = UserProfileRecord::parse("0011234567800000000002YYNNYYNNMASTER");
        let first: UserProfilePage = RecordPage {
            records: vec![profile.clone()],
            has_more: true,
            last_number: Some("001".into()),
        };
        let transport = ScriptedTransport::with(vec![
            Ok(Response::UserProfiles(first)),
            Ok(Response::NoData),
        ]);
        let panel = panel(&transport);

        assert_eq!(panel.user_profiles().await.unwrap(), vec![profile]);
        assert_eq!(transport.sent(), vec!["?U000", "?U002"]);
    }

    #[tokio::test]
    async fn test_check_code() {
        let page = || {
            Ok(Response::UserCodes(RecordPage {
                records: vec![user("0001", "1234", "99"), user("0002", "5555", "")],
                has_more: false,
                last_number: Some("0002".into()),
            }))
        };
        let transport = ScriptedTransport::with(vec![page(), page(), page()]);
        let panel = panel(&transport);

        let found = panel.check_code("5555", false).await.unwrap();
        assert_eq!(found.unwrap().number, "0002");
        assert!(panel.check_code("99", false).await.unwrap().is_none());
        assert_eq!(panel.check_code("99", true).await.unwrap().unwrap().number, "0001");
        // blank input never queries the panel
        assert!(panel.check_code("  ", true).await.unwrap().is_none());
        assert_eq!(transport.sent().len(), 3);
    }

    #[tokio::test]
    async fn test_keepalive_loop() {
        let transport = ScriptedTransport::with(vec![]);
        let panel = panel(&transport);

        panel.start_keepalive(Duration::from_millis(10));
        assert!(panel.keepalive_running());
        tokio::time::sleep(Duration::from_millis(50)).await;
        panel.stop_keepalive().await;
        assert!(!panel.keepalive_running());

        // interval is floored at one second, so only the first tick ran
        let sent = transport.sent();
        assert_eq!(sent, vec!["!H"]);
    }

    #[tokio::test]
    async fn test_disconnect_closes_transport() {
        let transport = ScriptedTransport::with(vec![]);
        let panel = panel(&transport);
        panel.start_keepalive(Duration::from_secs(5));
        panel.disconnect().await;
        panel.disconnect().await;

        assert!(!panel.is_connected());
        assert!(!panel.keepalive_running());
        assert!(!panel.queue().is_running());
        assert!(matches!(
            panel.send(Command::KeepAlive).await,
            Err(DmpError::QueueShutdown)
        ));
    }
}
