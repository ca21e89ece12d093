//! Configuration for the session engine

use std::fs::File;
use std::io::{BufReader, BufWriter};
use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::error::Result;

/// Session engine configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// Shell to run when `open_session` is given an empty command line.
    /// Falls back to `$SHELL`, then `/bin/sh`, when unset.
    pub shell: Option<String>,
    /// TERM value exported to the child
    pub term: String,
    /// Bytes read from the master per read(2) call
    pub read_chunk: usize,
    /// Maximum read iterations per `read_pump` invocation before control
    /// returns to the hosting event loop
    pub reads_per_pump: usize,
    /// Readiness wait between read iterations, in milliseconds
    pub poll_timeout_ms: i32,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            shell: None,
            term: "vt100".to_string(),
            read_chunk: 512,
            reads_per_pump: 8,
            poll_timeout_ms: 10,
        }
    }
}

impl Config {
    /// Load configuration from a JSON file
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let file = File::open(path)?;
        let config = serde_json::from_reader(BufReader::new(file))
            .map_err(|e| std::io::Error::new(std::io::ErrorKind::InvalidData, e))?;
        Ok(config)
    }

    /// Save configuration to a JSON file
    pub fn save<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        let file = File::create(path)?;
        serde_json::to_writer_pretty(BufWriter::new(file), self)
            .map_err(|e| std::io::Error::new(std::io::ErrorKind::InvalidData, e))?;
        Ok(())
    }

    /// Resolve the shell to execute for an empty command line
    pub fn resolve_shell(&self) -> String {
        self.shell
            .clone()
            .or_else(|| std::env::var("SHELL").ok())
            .unwrap_or_else(|| "/bin/sh".to_string())
    }
}
