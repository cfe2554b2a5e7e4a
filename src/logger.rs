use anyhow::Result;
use chrono::Utc;
use std::fs::{File, OpenOptions};
use std::io::Write;
use std::path::Path;
use std::sync::Mutex;

use crate::registry::FileId;

/// Audit trail of store outcomes, one call per finished exchange.
pub trait Logger: Send + Sync {
    fn stored(&self, _id: FileId, _filename: &str, _bytes: usize) {}
    fn fetched(&self, _identifier: &str, _bytes: usize) {}
    fn deleted(&self, _identifier: &str) {}
    fn rejected(&self, _action: &str, _identifier: &str, _status: i32) {}
    fn shutdown(&self, _entries: usize, _persisted: bool) {}
}

pub struct NoopLogger;
impl Logger for NoopLogger {}

pub struct TextLogger {
    file: Mutex<File>,
}

impl TextLogger {
    pub fn new<P: AsRef<Path>>(path: P) -> Result<Self> {
        if let Some(parent) = path.as_ref().parent() {
            std::fs::create_dir_all(parent).ok();
        }
        let f = OpenOptions::new().create(true).append(true).open(path)?;
        Ok(Self {
            file: Mutex::new(f),
        })
    }

    fn line(&self, s: &str) {
        if let Ok(mut f) = self.file.lock() {
            let _ = writeln!(f, "[{}] {}", Utc::now().to_rfc3339(), s);
        }
    }
}

impl Logger for TextLogger {
    fn stored(&self, id: FileId, filename: &str, bytes: usize) {
        self.line(&format!("PUT id={} name={} bytes={}", id, filename, bytes));
    }
    fn fetched(&self, identifier: &str, bytes: usize) {
        self.line(&format!("GET target={} bytes={}", identifier, bytes));
    }
    fn deleted(&self, identifier: &str) {
        self.line(&format!("DELETE target={}", identifier));
    }
    fn rejected(&self, action: &str, identifier: &str, status: i32) {
        self.line(&format!("REJECT action={} target={} status={}", action, identifier, status));
    }
    fn shutdown(&self, entries: usize, persisted: bool) {
        self.line(&format!("SHUTDOWN entries={entries} persisted={persisted}"));
    }
}
