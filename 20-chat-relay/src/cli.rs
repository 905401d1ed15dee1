use std::{net::SocketAddr, time::Duration};

use clap::{Args, Parser, Subcommand};

use crate::config::{BroadcastScope, ServerConfig};

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Run the chat relay, accepting TCP connections.
    Serve(ServeArgs),
    /// Connect to a relay and chat from the terminal.
    Client(ClientArgs),
}

#[derive(Args, Debug, Clone)]
pub struct ServeArgs {
    /// Socket address the relay should bind to. Use port 0 for an ephemeral port.
    #[arg(long, default_value = "127.0.0.1:8080")]
    pub listen: SocketAddr,

    /// How long shutdown waits for open connections to finish, in milliseconds.
    #[arg(long, default_value_t = 5_000)]
    pub shutdown_timeout_ms: u64,

    /// Upper bound for delivering one frame to one client, in milliseconds.
    #[arg(long, default_value_t = 2_000)]
    pub write_timeout_ms: u64,

    /// Largest accepted frame in bytes, delimiter included.
    #[arg(long, default_value_t = crate::codec::DEFAULT_MAX_FRAME_LEN)]
    pub max_frame_len: usize,

    /// Which sessions receive broadcasts.
    #[arg(long, value_enum, default_value_t = BroadcastScope::LoggedIn)]
    pub broadcast_scope: BroadcastScope,
}

impl From<&ServeArgs> for ServerConfig {
    fn from(args: &ServeArgs) -> Self {
        Self {
            listen: args.listen,
            shutdown_timeout: Duration::from_millis(args.shutdown_timeout_ms),
            write_timeout: Duration::from_millis(args.write_timeout_ms),
            max_frame_len: args.max_frame_len,
            broadcast_scope: args.broadcast_scope,
        }
    }
}

#[derive(Args, Debug, Clone)]
pub struct ClientArgs {
    /// Address of the relay to connect to.
    #[arg(long, default_value = "127.0.0.1:8080")]
    pub server: SocketAddr,
}
