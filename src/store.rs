//! Append-only persistence for event sourcing. One JSON document per
//! line so a crashed run leaves at most one bad tail line.

use crate::events::{EventRecord, SnapshotRecord};
use anyhow::{Context, Result};
use std::fs::{File, OpenOptions};
use std::io::{BufRead, BufReader, BufWriter, Write};
use std::path::{Path, PathBuf};

pub const EVENTS_FILE: &str = "events.jsonl";
pub const SNAPSHOTS_FILE: &str = "snapshots.jsonl";

/// Where event records end up. The recorder drives this and deals with
/// failures, implementations just write.
pub trait EventStore: Send {
    fn append_event(&mut self, record: &EventRecord) -> Result<()>;
    fn append_snapshot(&mut self, snapshot: &SnapshotRecord) -> Result<()>;
    fn flush(&mut self) -> Result<()>;
}

/// Two JSONL files in one directory, opened for append so history
/// accumulates across restarts.
pub struct JsonlEventStore {
    events: BufWriter<File>,
    snapshots: BufWriter<File>,
    dir: PathBuf,
}

impl JsonlEventStore {
    pub fn open(dir: impl AsRef<Path>) -> Result<Self> {
        let dir = dir.as_ref().to_path_buf();
        std::fs::create_dir_all(&dir)
            .with_context(|| format!("creating event directory {}", dir.display()))?;

        let events = append_writer(&dir.join(EVENTS_FILE))?;
        let snapshots = append_writer(&dir.join(SNAPSHOTS_FILE))?;
        Ok(Self { events, snapshots, dir })
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }
}

impl EventStore for JsonlEventStore {
    fn append_event(&mut self, record: &EventRecord) -> Result<()> {
        write_line(&mut self.events, record).context("appending event record")
    }

    fn append_snapshot(&mut self, snapshot: &SnapshotRecord) -> Result<()> {
        write_line(&mut self.snapshots, snapshot).context("appending snapshot record")
    }

    fn flush(&mut self) -> Result<()> {
        self.events.flush()?;
        self.snapshots.flush()?;
        Ok(())
    }
}

fn append_writer(path: &Path) -> Result<BufWriter<File>> {
    let file = OpenOptions::new()
        .create(true)
        .append(true)
        .open(path)
        .with_context(|| format!("opening {}", path.display()))?;
    Ok(BufWriter::new(file))
}

// Every record hits the disk on its own, a crash loses nothing acknowledged
fn write_line<T: serde::Serialize>(writer: &mut BufWriter<File>, value: &T) -> Result<()> {
    serde_json::to_writer(&mut *writer, value)?;
    writer.write_all(b"\n")?;
    writer.flush()?;
    Ok(())
}

/// In-memory store for tests and for running without persistence.
#[derive(Debug, Default)]
pub struct MemoryEventStore {
    pub events: Vec<EventRecord>,
    pub snapshots: Vec<SnapshotRecord>,
}

impl MemoryEventStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl EventStore for MemoryEventStore {
    fn append_event(&mut self, record: &EventRecord) -> Result<()> {
        self.events.push(record.clone());
        Ok(())
    }

    fn append_snapshot(&mut self, snapshot: &SnapshotRecord) -> Result<()> {
        self.snapshots.push(snapshot.clone());
        Ok(())
    }

    fn flush(&mut self) -> Result<()> {
        Ok(())
    }
}

pub fn read_events(path: impl AsRef<Path>) -> Result<Vec<EventRecord>> {
    read_jsonl(path.as_ref())
}

pub fn read_snapshots(path: impl AsRef<Path>) -> Result<Vec<SnapshotRecord>> {
    read_jsonl(path.as_ref())
}

fn read_jsonl<T: serde::de::DeserializeOwned>(path: &Path) -> Result<Vec<T>> {
    let file = File::open(path).with_context(|| format!("opening {}", path.display()))?;
    let reader = BufReader::new(file);

    let mut records = Vec::new();
    for line in reader.lines() {
        let line = line?;
        if line.trim().is_empty() {
            continue;
        }
        let record = serde_json::from_str(&line)
            .with_context(|| format!("parsing record in {}", path.display()))?;
        records.push(record);
    }
    Ok(records)
}
