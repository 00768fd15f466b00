// MIT License - Copyright (c) 2021 TJForc
// Outbound session, command queue and inbound listener

pub mod listener;
pub mod queue;
pub mod registry;
pub mod session;

use std::future::Future;

use crate::codec::Response;
use crate::error::Result;
use crate::protocol::Command;

/// Something that can carry one command to a panel and return its decoded reply.
///
/// Implemented by [`session::Session`]; tests substitute scripted doubles.
/// Implementations never pace commands themselves; the command queue owns pacing.
pub trait Transport: Send + Sync + 'static {
    /// Send a command and wait for the decoded reply.
    fn send(&self, command: &Command) -> impl Future<Output = Result<Response>> + Send;

    /// Close the connection. Never fails.
    fn close(&self) -> impl Future<Output = ()> + Send;

    /// Whether the transport is currently connected.
    fn is_connected(&self) -> bool;
}
