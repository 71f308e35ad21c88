//! Raw listing structure of selected members, for debugging the realignment.
//!
//! One JSON object per line, appended to the trace file.

use std::fs::OpenOptions;
use std::io::Write;
use std::path::PathBuf;

use chrono::Local;
use log::{error, info};
use serde::Serialize;

use crate::resolve::RawMemberBlock;
use crate::Result;

#[derive(Serialize)]
struct TraceEntry<'a> {
    timestamp: String,
    member: &'a str,
    tokens: &'a [String],
    token_count: usize,
}

#[derive(Debug, Clone)]
pub struct MemberTrace {
    names: Vec<String>,
    path: PathBuf,
}

impl MemberTrace {
    /// `None` when no member names are given.
    pub fn new(names: Vec<String>, path: impl Into<PathBuf>) -> Option<Self> {
        if names.is_empty() {
            return None;
        }
        Some(Self {
            names,
            path: path.into(),
        })
    }

    pub fn is_traced(&self, display_name: &str) -> bool {
        self.names.iter().any(|name| name == display_name)
    }

    /// Records `block` if its display name is traced. Failures are only logged.
    pub fn observe(&self, block: &RawMemberBlock) {
        let Some(name) = block.display_name() else {
            return;
        };
        if !self.is_traced(name) {
            return;
        }
        info!("Listing structure of {name} ({} tokens): {:?}", block.len(), block.tokens());
        if let Err(err) = self.append(name, block) {
            error!("Couldn't write the member trace: {err}");
        }
    }

    fn append(&self, name: &str, block: &RawMemberBlock) -> Result<()> {
        let entry = TraceEntry {
            timestamp: Local::now().to_rfc3339(),
            member: name,
            tokens: block.tokens(),
            token_count: block.len(),
        };
        let mut line = serde_json::to_string(&entry)?;
        line.push('\n');

        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)?;
        file.write_all(line.as_bytes())?;
        Ok(())
    }
}
