//! Startup configuration
//!
//! Listen interface and port, parsed from the command line with clap.

use clap::Parser;

/// Default interface to listen on
pub const DEFAULT_INTERFACE: &str = "localhost";

/// Command line configuration
#[derive(Debug, Clone, Parser)]
#[command(name = "nick_relay", version, about = "Line-based chat relay with unique nicknames")]
pub struct Config {
    /// Interface on which the server should listen
    #[arg(short, long, default_value = DEFAULT_INTERFACE)]
    pub interface: String,

    /// Port on which the server will run (0 picks a free port)
    #[arg(short, long, default_value_t = 0)]
    pub port: u16,
}

impl Config {
    /// Address string suitable for `TcpListener::bind`
    pub fn bind_addr(&self) -> String {
        format!("{}:{}", self.interface, self.port)
    }
}
