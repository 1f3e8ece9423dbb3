//! Best-effort recording of identifications. Nothing here can slow down or
//! fail a match.

use std::fs::{File, OpenOptions};
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};
use std::sync::mpsc::{sync_channel, Receiver, SyncSender, TrySendError};
use std::thread::JoinHandle;

use chrono::{SecondsFormat, Utc};
use serde::Serialize;

use crate::error::{Result, SightError};
use crate::matcher::ConfidenceTier;
use crate::result::MatchResult;

const QUEUE_DEPTH: usize = 64;

pub trait MatchObserver: Send + Sync {
    fn record(&self, result: &MatchResult);
}

pub struct NullObserver;

impl MatchObserver for NullObserver {
    fn record(&self, _result: &MatchResult) {}
}

#[derive(Debug, Serialize)]
struct ScanRecord {
    timestamp: String,
    id: u32,
    name: String,
    set_code: String,
    vote_count: usize,
    confidence_tier: ConfidenceTier,
}

/// Appends one JSON line per successful identification from a background
/// writer thread. A full queue drops the record.
pub struct JsonlScanLog {
    tx: Option<SyncSender<ScanRecord>>,
    writer: Option<JoinHandle<()>>,
}

impl JsonlScanLog {
    pub fn open(path: &Path) -> Result<Self> {
        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(path)
            .map_err(|e| SightError::io(path, e))?;
        let (tx, rx) = sync_channel(QUEUE_DEPTH);
        let log_path = path.to_path_buf();
        let writer = std::thread::Builder::new()
            .name("scan-log".into())
            .spawn(move || write_records(rx, file, log_path))
            .map_err(|e| SightError::io(path, e))?;
        Ok(Self {
            tx: Some(tx),
            writer: Some(writer),
        })
    }
}

fn write_records(rx: Receiver<ScanRecord>, file: File, path: PathBuf) {
    let mut out = BufWriter::new(file);
    for record in rx {
        let written = serde_json::to_string(&record)
            .map_err(std::io::Error::from)
            .and_then(|line| writeln!(out, "{}", line))
            .and_then(|_| out.flush());
        if let Err(e) = written {
            tracing::warn!(path = %path.display(), error = %e, "failed to append scan record");
        }
    }
}

impl MatchObserver for JsonlScanLog {
    fn record(&self, result: &MatchResult) {
        let MatchResult::Matched {
            id,
            name,
            set_code,
            vote_count,
            confidence_tier,
            ..
        } = result
        else {
            return;
        };
        let Some(tx) = &self.tx else { return };
        let record = ScanRecord {
            timestamp: Utc::now().to_rfc3339_opts(SecondsFormat::Millis, true),
            id: *id,
            name: name.clone(),
            set_code: set_code.clone(),
            vote_count: *vote_count,
            confidence_tier: *confidence_tier,
        };
        match tx.try_send(record) {
            Ok(()) => {}
            Err(TrySendError::Full(_)) => tracing::debug!("scan log queue full, record dropped"),
            Err(TrySendError::Disconnected(_)) => tracing::warn!("scan log writer is gone"),
        }
    }
}

impl Drop for JsonlScanLog {
    fn drop(&mut self) {
        // closing the channel ends the writer loop
        self.tx.take();
        if let Some(writer) = self.writer.take() {
            let _ = writer.join();
        }
    }
}
