//! In-memory id -> filename index with a flat `id:filename` listing on disk.

use anyhow::{Context, Result};
use std::collections::BTreeMap;
use std::io::Write as _;
use std::path::Path;

pub type FileId = u32;

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Registry {
    entries: BTreeMap<FileId, String>,
}

impl Registry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Load the listing at `path`. A missing or unreadable file yields an empty registry.
    /// Lines that are not valid UTF-8 are skipped like any other malformed line.
    pub fn load(path: &Path) -> Self {
        match std::fs::read(path) {
            Ok(bytes) => {
                let text = bytes
                    .split(|&b| b == b'\n')
                    .filter_map(|line| std::str::from_utf8(line).ok())
                    .collect::<Vec<_>>()
                    .join("\n");
                Self::parse(&text)
            }
            Err(e) => {
                tracing::debug!(path = %path.display(), error = %e, "no registry listing, starting empty");
                Self::new()
            }
        }
    }

    /// Parse `id:filename` lines, splitting on the first colon.
    /// Blank lines, lines without a colon, empty halves and bad ids are skipped.
    pub fn parse(text: &str) -> Self {
        let mut entries = BTreeMap::new();
        for line in text.lines() {
            let Some((id, filename)) = line.split_once(':') else {
                continue;
            };
            let (id, filename) = (id.trim(), filename.trim());
            if id.is_empty() || filename.is_empty() {
                continue;
            }
            if let Ok(id) = id.parse::<FileId>() {
                entries.insert(id, filename.to_string());
            }
        }
        Self { entries }
    }

    pub fn render(&self) -> String {
        let mut out = String::new();
        for (id, filename) in &self.entries {
            out.push_str(&format!("{}:{}\n", id, filename));
        }
        out
    }

    /// Overwrite the listing at `path`. Written to a temp file in the same
    /// directory and renamed into place.
    pub fn save(&self, path: &Path) -> Result<()> {
        let dir = match path.parent() {
            Some(p) if !p.as_os_str().is_empty() => p,
            _ => Path::new("."),
        };
        std::fs::create_dir_all(dir)
            .with_context(|| format!("create registry dir {}", dir.display()))?;
        let mut tmp = tempfile::NamedTempFile::new_in(dir)
            .with_context(|| format!("create temp file in {}", dir.display()))?;
        tmp.write_all(self.render().as_bytes())?;
        tmp.flush()?;
        tmp.persist(path)
            .with_context(|| format!("persist registry to {}", path.display()))?;
        Ok(())
    }

    /// Assign an id to `filename`: start probing at the current entry count and
    /// take the first free id. After removals this can skip freed ids below the
    /// count; e.g. {0,1,2} minus 1 probes 2 (taken) and lands on 3.
    pub fn allocate_id(&mut self, filename: &str) -> FileId {
        let mut id = self.entries.len() as FileId;
        while self.entries.contains_key(&id) {
            id += 1;
        }
        self.entries.insert(id, filename.to_string());
        id
    }

    pub fn lookup_filename(&self, id: FileId) -> Option<&str> {
        self.entries.get(&id).map(String::as_str)
    }

    pub fn lookup_id(&self, filename: &str) -> Option<FileId> {
        self.entries
            .iter()
            .find(|(_, name)| name.as_str() == filename)
            .map(|(id, _)| *id)
    }

    pub fn remove(&mut self, id: FileId) -> Option<String> {
        self.entries.remove(&id)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (FileId, &str)> {
        self.entries.iter().map(|(id, name)| (*id, name.as_str()))
    }
}
