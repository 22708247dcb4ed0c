use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;

/// Server configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Bind address
    pub bind_addr: String,

    /// Port to listen on (0 picks an ephemeral port)
    pub port: u16,

    /// Path to FeOx data file (None for memory-only)
    pub data_path: Option<String>,

    /// File size for persistent storage (in bytes)
    /// Only used when data_path is set
    pub file_size: Option<u64>,

    /// Maximum memory for the FeOx store
    pub max_memory: Option<usize>,

    /// Receive buffer capacity per connection. A request that does not fit
    /// is rejected and the connection is closed.
    pub connection_buffer_size: usize,

    /// Maximum number of concurrently open client connections
    pub max_connections: usize,

    /// TCP nodelay
    pub tcp_nodelay: bool,

    /// Always answer `+OK` to SET, even when the write failed.
    /// Off by default: storage errors are sent back as error replies.
    pub strict_set_ack: bool,

    /// Log level
    pub log_level: String,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            bind_addr: "127.0.0.1".to_string(),
            port: 8323,
            data_path: None,
            file_size: Some(1024 * 1024 * 1024), // 1GB
            max_memory: Some(1024 * 1024 * 1024),
            connection_buffer_size: 8192,
            max_connections: 1024,
            tcp_nodelay: true,
            strict_set_ack: false,
            log_level: "info".to_string(),
        }
    }
}

impl Config {
    /// Load configuration from a TOML file
    ///
    /// Fields missing from the file keep their default values.
    ///
    /// # Example
    ///
    /// ```no_run
    /// use feox_lite::Config;
    ///
    /// # fn main() -> anyhow::Result<()> {
    /// let config = Config::from_file("feox-lite.toml")?;
    /// # Ok(())
    /// # }
    /// ```
    pub fn from_file<P: AsRef<Path>>(path: P) -> anyhow::Result<Self> {
        let contents = fs::read_to_string(path)?;
        let config: Config = toml::from_str(&contents)?;
        Ok(config)
    }

    /// Save configuration to a TOML file
    pub fn to_file<P: AsRef<Path>>(&self, path: P) -> anyhow::Result<()> {
        let contents = toml::to_string_pretty(self)?;
        fs::write(path, contents)?;
        Ok(())
    }

    /// Validate configuration
    pub fn validate(&self) -> anyhow::Result<()> {
        if self.connection_buffer_size < 64 {
            anyhow::bail!("connection_buffer_size must be >= 64");
        }

        if self.max_connections == 0 {
            anyhow::bail!("max_connections must be > 0");
        }

        if let Some(ref path) = self.data_path {
            if path.is_empty() {
                anyhow::bail!("data_path must not be empty");
            }
        }

        Ok(())
    }

    /// Address string suitable for `TcpListener::bind`
    pub fn listen_addr(&self) -> String {
        format!("{}:{}", self.bind_addr, self.port)
    }
}
