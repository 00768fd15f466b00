// MIT License - Copyright (c) 2021 TJForc
// DMP alarm panel protocol engine
//
//! # dmp-lan-bridge
//!
//! Direct TCP/IP communication with DMP XR-series alarm panels.
//!
//! The outbound side opens an authenticated command session (default port
//! 2011) and serializes every command through a paced queue. The inbound
//! side runs a small TCP server the panel pushes realtime events to; each
//! line is classified into a [`PushEvent`].
//!
//! ## Quick Start
//!
//! ```no_run
//! use dmp_lan_bridge::{
//!     ArmOptions, ConnectionRegistry, DmpPanel, EventListener, ListenerConfig, PanelConfig,
//! };
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let config = PanelConfig::builder()
//!         .host("192.168.1.50")
//!         .account("12345")
//!         .remote_key("SECRET")
//!         .build();
//!
//!     let panel = DmpPanel::connect(config, ConnectionRegistry::new()).await?;
//!
//!     let listener = EventListener::new(ListenerConfig::default());
//!     let mut events = listener.subscribe();
//!     listener.start().await?;
//!     tokio::spawn(async move {
//!         while let Ok(event) = events.recv().await {
//!             println!("Event: {:?}", event);
//!         }
//!     });
//!
//!     panel.arm_areas(&[1], ArmOptions::default()).await?;
//!
//!     tokio::signal::ctrl_c().await?;
//!     listener.stop().await;
//!     panel.disconnect().await;
//!     Ok(())
//! }
//! ```

pub mod codec;
pub mod config;
pub mod constants;
pub mod crypto;
pub mod error;
pub mod event;
pub mod panel;
pub mod protocol;
pub mod records;
pub mod transport;

// Re-exports for convenience
pub use codec::{DmpCodec, Response};
pub use config::{ListenerConfig, ListenerConfigBuilder, PanelConfig, PanelConfigBuilder};
pub use constants::EventCategory;
pub use crypto::UserCodeCipher;
pub use error::{DmpError, Result};
pub use event::{EventCode, EventReceiver, PushEvent, PushMessage, classify};
pub use panel::DmpPanel;
pub use protocol::{AccountId, ArmOptions, Command, OutputMode};
pub use records::{
    AreaState, AreaStatus, RecordPage, StatusSnapshot, UserCodeRecord, UserProfileRecord,
    ZoneState, ZoneStatus,
};
pub use transport::Transport;
pub use transport::listener::EventListener;
pub use transport::queue::{CommandHandle, CommandQueue};
pub use transport::registry::{ConnectionRegistry, PanelIdentity};
pub use transport::session::{Session, SessionState};
