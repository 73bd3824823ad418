//! Server settings from the command line and environment.

use clap::Parser;
use std::path::PathBuf;
use std::time::Duration;

/// Rift Mock - directory-driven multi-tenant HTTP mock server
#[derive(Parser, Debug, Clone)]
#[command(name = "rift-mock")]
#[command(author, version, about, long_about = None)]
pub struct ServerConfig {
    /// Mock directory laid out as <dir>/<port>/<domain>/<path...>/<rule file>
    #[arg(short, long, env = "RIFT_MOCK_DIR", default_value = "mock")]
    pub dir: PathBuf,

    /// Address every port listener binds to
    #[arg(long, env = "RIFT_MOCK_HOST", default_value = "0.0.0.0")]
    pub host: String,

    /// Largest accepted request body, in bytes
    #[arg(long, env = "RIFT_MOCK_BODY_LIMIT", default_value_t = 10 * 1024 * 1024)]
    pub body_limit: usize,

    /// Timeout for requests forwarded to proxy upstreams, in seconds
    #[arg(long, env = "RIFT_MOCK_UPSTREAM_TIMEOUT_SECS", default_value_t = 30)]
    pub upstream_timeout_secs: u64,

    /// Append recorded pairs to this file as JSON lines
    #[arg(long, env = "RIFT_MOCK_RECORD_FILE")]
    pub record_file: Option<PathBuf>,

    /// Recorded pairs kept in memory when no record file is given (oldest dropped first)
    #[arg(long, env = "RIFT_MOCK_RECORD_CAPACITY", default_value_t = 10_000)]
    pub record_capacity: usize,

    /// Log filter used when RUST_LOG is not set
    #[arg(long, env = "RIFT_MOCK_LOG", default_value = "info")]
    pub log: String,
}

impl ServerConfig {
    pub fn upstream_timeout(&self) -> Duration {
        Duration::from_secs(self.upstream_timeout_secs)
    }

    /// Base URL that relative hook paths of `port` resolve against.
    pub fn hook_base_url(&self, port: u16) -> String {
        let host = match self.host.as_str() {
            "0.0.0.0" | "::" | "[::]" => "127.0.0.1",
            host => host,
        };
        format!("http://{host}:{port}")
    }
}
