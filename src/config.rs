//! Daemon configuration: TOML file with per-field CLI overrides.

use anyhow::{bail, Context, Result};
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::cli::DaemonOpts;
use crate::protocol::{DEFAULT_BACKLOG, DEFAULT_BIND, DEFAULT_WORKERS, MAX_BLOB_SIZE};

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    /// Listen address (host:port)
    pub bind: String,
    /// Pending-connection queue length handed to listen(2)
    pub backlog: u32,
    /// Maximum number of exchanges served at once
    pub workers: usize,
    /// Directory holding the stored files
    pub data_dir: PathBuf,
    /// Persisted `id:filename` listing
    pub registry_path: PathBuf,
    /// Per read/write deadline for an exchange; unset means wait forever
    pub io_timeout_ms: Option<u64>,
    /// How long shutdown waits for in-flight exchanges before aborting them
    pub shutdown_grace_ms: u64,
    /// Optional append-only audit log of store outcomes
    pub audit_log: Option<PathBuf>,
    pub max_blob_size: usize,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind: DEFAULT_BIND.to_string(),
            backlog: DEFAULT_BACKLOG,
            workers: DEFAULT_WORKERS,
            data_dir: PathBuf::from("data"),
            registry_path: PathBuf::from("registry.txt"),
            io_timeout_ms: None,
            shutdown_grace_ms: 5_000,
            audit_log: None,
            max_blob_size: MAX_BLOB_SIZE,
        }
    }
}

impl ServerConfig {
    pub fn from_toml_str(data: &str) -> Result<Self> {
        let cfg: ServerConfig = toml::from_str(data)?;
        Ok(cfg)
    }

    pub fn load(path: &Path) -> Result<Self> {
        let data = std::fs::read_to_string(path)
            .with_context(|| format!("read config {}", path.display()))?;
        Self::from_toml_str(&data).with_context(|| format!("parse config {}", path.display()))
    }

    /// Config file (if any) first, then command-line overrides, then validation.
    pub fn from_opts(opts: &DaemonOpts) -> Result<Self> {
        let mut cfg = match opts.config {
            Some(ref p) => Self::load(p)?,
            None => Self::default(),
        };
        if let Some(ref bind) = opts.bind {
            cfg.bind = bind.clone();
        }
        if let Some(backlog) = opts.backlog {
            cfg.backlog = backlog;
        }
        if let Some(workers) = opts.workers {
            cfg.workers = workers;
        }
        if let Some(ref dir) = opts.data_dir {
            cfg.data_dir = dir.clone();
        }
        if let Some(ref reg) = opts.registry {
            cfg.registry_path = reg.clone();
        }
        if let Some(ms) = opts.io_timeout_ms {
            cfg.io_timeout_ms = Some(ms);
        }
        if let Some(ref log) = opts.audit_log {
            cfg.audit_log = Some(log.clone());
        }
        cfg.validate()?;
        Ok(cfg)
    }

    pub fn validate(&self) -> Result<()> {
        if self.workers == 0 {
            bail!("workers must be at least 1");
        }
        if self.backlog == 0 {
            bail!("backlog must be at least 1");
        }
        if self.max_blob_size > i32::MAX as usize {
            bail!(
                "max_blob_size {} exceeds the wire limit of {} bytes",
                self.max_blob_size,
                i32::MAX
            );
        }
        Ok(())
    }

    pub fn io_timeout(&self) -> Option<Duration> {
        self.io_timeout_ms.map(Duration::from_millis)
    }

    pub fn shutdown_grace(&self) -> Duration {
        Duration::from_millis(self.shutdown_grace_ms)
    }
}
