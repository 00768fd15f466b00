// MIT License - Copyright (c) 2021 TJForc
// Session and listener configuration

use std::time::Duration;

use crate::constants::{
    DEFAULT_COMMAND_INTERVAL, DEFAULT_CONNECT_TIMEOUT, DEFAULT_KEEPALIVE_INTERVAL,
    DEFAULT_LISTEN_HOST, DEFAULT_LISTEN_PORT, DEFAULT_LISTENER_POLL_INTERVAL,
    DEFAULT_MAX_LINE_LEN, DEFAULT_MAX_RESPONSE_TIME, DEFAULT_PORT, DEFAULT_READ_IDLE_TIMEOUT,
    DEFAULT_SETTLE_DELAY,
};

/// Configuration for an outbound command session to a DMP panel.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PanelConfig {
    /// Panel host name or IP address
    pub host: String,
    /// Panel TCP port (default: 2011)
    pub port: u16,
    /// Account number, 1-5 characters, stored unpadded
    pub account: String,
    /// Remote key sent during authentication
    pub remote_key: String,
    /// TCP connect timeout in milliseconds (default: 10000)
    pub connect_timeout_ms: u64,
    /// Minimum spacing between commands in milliseconds, applied by the command queue
    pub command_interval_ms: u64,
    /// Delay between a write and the first read in milliseconds
    pub settle_delay_ms: u64,
    /// Per-chunk idle timeout that ends a reply, in milliseconds
    pub read_idle_timeout_ms: u64,
    /// Cap on draining one reply, in milliseconds
    pub max_response_ms: u64,
    /// Keep-alive interval in milliseconds (floored at 1000)
    pub keepalive_interval_ms: u64,
}

impl Default for PanelConfig {
    fn default() -> Self {
        Self {
            host: "192.168.0.100".to_string(),
            port: DEFAULT_PORT,
            account: "1".to_string(),
            remote_key: String::new(),
            connect_timeout_ms: DEFAULT_CONNECT_TIMEOUT.as_millis() as u64,
            command_interval_ms: DEFAULT_COMMAND_INTERVAL.as_millis() as u64,
            settle_delay_ms: DEFAULT_SETTLE_DELAY.as_millis() as u64,
            read_idle_timeout_ms: DEFAULT_READ_IDLE_TIMEOUT.as_millis() as u64,
            max_response_ms: DEFAULT_MAX_RESPONSE_TIME.as_millis() as u64,
            keepalive_interval_ms: DEFAULT_KEEPALIVE_INTERVAL.as_millis() as u64,
        }
    }
}

impl PanelConfig {
    /// Create a new config builder starting from defaults.
    pub fn builder() -> PanelConfigBuilder {
        PanelConfigBuilder::default()
    }

    pub fn connect_timeout(&self) -> Duration {
        Duration::from_millis(self.connect_timeout_ms)
    }

    pub fn command_interval(&self) -> Duration {
        Duration::from_millis(self.command_interval_ms)
    }

    pub fn settle_delay(&self) -> Duration {
        Duration::from_millis(self.settle_delay_ms)
    }

    pub fn read_idle_timeout(&self) -> Duration {
        Duration::from_millis(self.read_idle_timeout_ms)
    }

    pub fn max_response_time(&self) -> Duration {
        Duration::from_millis(self.max_response_ms)
    }

    pub fn keepalive_interval(&self) -> Duration {
        Duration::from_millis(self.keepalive_interval_ms)
    }
}

/// Builder for PanelConfig.
#[derive(Debug, Clone, Default)]
pub struct PanelConfigBuilder {
    config: PanelConfig,
}

impl PanelConfigBuilder {
    pub fn host(mut self, host: impl Into<String>) -> Self {
        self.config.host = host.into();
        self
    }

    pub fn port(mut self, port: u16) -> Self {
        self.config.port = port;
        self
    }

    pub fn account(mut self, account: impl Into<String>) -> Self {
        self.config.account = account.into();
        self
    }

    pub fn remote_key(mut self, key: impl Into<String>) -> Self {
        self.config.remote_key = key.into();
        self
    }

    pub fn connect_timeout_ms(mut self, ms: u64) -> Self {
        self.config.connect_timeout_ms = ms;
        self
    }

    pub fn command_interval_ms(mut self, ms: u64) -> Self {
        self.config.command_interval_ms = ms;
        self
    }

    pub fn settle_delay_ms(mut self, ms: u64) -> Self {
        self.config.settle_delay_ms = ms;
        self
    }

    pub fn read_idle_timeout_ms(mut self, ms: u64) -> Self {
        self.config.read_idle_timeout_ms = ms;
        self
    }

    pub fn max_response_ms(mut self, ms: u64) -> Self {
        self.config.max_response_ms = ms;
        self
    }

    pub fn keepalive_interval_ms(mut self, ms: u64) -> Self {
        self.config.keepalive_interval_ms = ms;
        self
    }

    pub fn build(self) -> PanelConfig {
        self.config
    }
}

/// Configuration for the inbound realtime event listener.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ListenerConfig {
    /// Bind address (default: 0.0.0.0)
    pub host: String,
    /// Bind port (default: 5001, 0 picks an ephemeral port)
    pub port: u16,
    /// How often blocked reads re-check the shutdown flag, in milliseconds
    pub poll_interval_ms: u64,
    /// Whether each received line is answered with an ACK frame
    pub acknowledge: bool,
    /// Partial lines longer than this are discarded
    pub max_line_len: usize,
    /// Capacity of the classified event broadcast channel
    pub event_capacity: usize,
}

impl Default for ListenerConfig {
    fn default() -> Self {
        Self {
            host: DEFAULT_LISTEN_HOST.to_string(),
            port: DEFAULT_LISTEN_PORT,
            poll_interval_ms: DEFAULT_LISTENER_POLL_INTERVAL.as_millis() as u64,
            acknowledge: true,
            max_line_len: DEFAULT_MAX_LINE_LEN,
            event_capacity: 256,
        }
    }
}

impl ListenerConfig {
    pub fn builder() -> ListenerConfigBuilder {
        ListenerConfigBuilder::default()
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }

    pub fn bind_address(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

#[derive(Debug, Clone, Default)]
pub struct ListenerConfigBuilder {
    config: ListenerConfig,
}

impl ListenerConfigBuilder {
    pub fn host(mut self, host: impl Into<String>) -> Self {
        self.config.host = host.into();
        self
    }

    pub fn port(mut self, port: u16) -> Self {
        self.config.port = port;
        self
    }

    pub fn poll_interval_ms(mut self, ms: u64) -> Self {
        self.config.poll_interval_ms = ms;
        self
    }

    pub fn acknowledge(mut self, acknowledge: bool) -> Self {
        self.config.acknowledge = acknowledge;
        self
    }

    pub fn max_line_len(mut self, len: usize) -> Self {
        self.config.max_line_len = len;
        self
    }

    pub fn event_capacity(mut self, capacity: usize) -> Self {
        self.config.event_capacity = capacity;
        self
    }

    pub fn build(self) -> ListenerConfig {
        self.config
    }
}
