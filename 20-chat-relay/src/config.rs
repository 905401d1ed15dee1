use std::{
    net::{Ipv4Addr, SocketAddr},
    time::Duration,
};

use clap::ValueEnum;

use crate::codec::DEFAULT_MAX_FRAME_LEN;

pub const DEFAULT_SHUTDOWN_TIMEOUT: Duration = Duration::from_secs(5);
pub const DEFAULT_WRITE_TIMEOUT: Duration = Duration::from_secs(2);

/// Which sessions a broadcast is addressed to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, ValueEnum)]
pub enum BroadcastScope {
    /// Only sessions that are currently logged in.
    #[default]
    LoggedIn,
    /// Every session in the registry, including logged-out ones whose
    /// connection is still open.
    All,
}

#[derive(Debug, Clone)]
pub struct ServerConfig {
    pub listen: SocketAddr,
    /// Bound on draining connection handlers after shutdown is requested.
    pub shutdown_timeout: Duration,
    /// Bound on a single frame write to one connection.
    pub write_timeout: Duration,
    pub max_frame_len: usize,
    pub broadcast_scope: BroadcastScope,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            listen: SocketAddr::from((Ipv4Addr::LOCALHOST, 8080)),
            shutdown_timeout: DEFAULT_SHUTDOWN_TIMEOUT,
            write_timeout: DEFAULT_WRITE_TIMEOUT,
            max_frame_len: DEFAULT_MAX_FRAME_LEN,
            broadcast_scope: BroadcastScope::default(),
        }
    }
}
