use anyhow::Context;
use chrono::Local;
use serde_json::Value;
use std::fs::OpenOptions;
use std::io::Write;
use std::path::Path;
use std::sync::{Arc, Mutex};

/// Append-only text file shared by the logger and the RPC traffic tracer.
#[derive(Clone)]
pub struct FileTracer {
    file: Arc<Mutex<std::fs::File>>,
}

impl FileTracer {
    pub fn new(path: &Path) -> anyhow::Result<Self> {
        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(path)
            .with_context(|| format!("open log file {}", path.display()))?;
        Ok(Self {
            file: Arc::new(Mutex::new(file)),
        })
    }

    pub fn line(&self, text: &str) {
        if let Ok(mut file) = self.file.lock() {
            _ = writeln!(file, "{text}");
        }
    }

    /// Record one JSON-RPC message, `direction` is `<-` for inbound and `->` for outbound.
    pub fn rpc(&self, connection: &str, direction: &str, message: &Value) {
        self.line(&format!(
            "{} rpc {connection} {direction} {message}",
            Local::now().to_rfc3339()
        ));
    }
}
