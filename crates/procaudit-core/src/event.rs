use std::{
    fmt::{self, Display},
    fs::File,
    io,
    path::Path,
};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use uuid::Uuid;

use crate::Pid;

/// A finished process lifecycle event, ready for delivery to the sinks.
///
/// Events are immutable once constructed: the header carries a run-unique
/// id and the canonical timestamp, the data carries the typed payload.
#[derive(Debug, Clone, Serialize)]
pub struct Event {
    pub(crate) header: Header,
    pub(crate) data: EventData,
}

impl Event {
    /// Build a `process started` event with a fresh unique id.
    pub fn process_started(time: DateTime<Utc>, data: ProcessStartedData) -> Self {
        Self {
            header: Header::new(time, EventType::Started),
            data: EventData::ProcessStarted(data),
        }
    }

    /// Build a `process stopped` event with a fresh unique id.
    pub fn process_stopped(time: DateTime<Utc>, data: ProcessStoppedData) -> Self {
        Self {
            header: Header::new(time, EventType::Stopped),
            data: EventData::ProcessStopped(data),
        }
    }

    pub fn header(&self) -> &Header {
        &self.header
    }

    pub fn data(&self) -> &EventData {
        &self.data
    }

    pub fn pid(&self) -> Pid {
        match &self.data {
            EventData::ProcessStarted(data) => data.pid,
            EventData::ProcessStopped(data) => data.pid,
        }
    }

    pub fn ppid(&self) -> Option<Pid> {
        match &self.data {
            EventData::ProcessStarted(data) => data.ppid,
            EventData::ProcessStopped(data) => data.ppid,
        }
    }
}

impl fmt::Display for Event {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let time = self.header.time.format("%Y-%m-%dT%TZ");
        let pid = self.pid();
        match self.ppid() {
            Some(ppid) => write!(f, "[{time} {}] pid: {pid}, ppid: {ppid}", self.header.event_type),
            None => write!(f, "[{time} {}] pid: {pid}", self.header.event_type),
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct Header {
    pub id: Uuid,
    pub time: DateTime<Utc>,
    pub object_type: ObjectType,
    pub event_type: EventType,
}

impl Header {
    fn new(time: DateTime<Utc>, event_type: EventType) -> Self {
        Self {
            id: Uuid::new_v4(),
            time,
            object_type: ObjectType::Process,
            event_type,
        }
    }
}

/// The kind of object an event describes. Closed enumeration: adding a
/// variant forces every match site to be revisited.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ObjectType {
    Process,
}

impl Display for ObjectType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ObjectType::Process => write!(f, "process"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventType {
    Started,
    Stopped,
}

impl Display for EventType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            EventType::Started => write!(f, "STARTED"),
            EventType::Stopped => write!(f, "STOPPED"),
        }
    }
}

/// Typed event payload. The discriminant is carried by
/// [`Header::event_type`], so the payload serializes as a flat record.
#[derive(Debug, Clone, Serialize)]
#[serde(untagged)]
pub enum EventData {
    ProcessStarted(ProcessStartedData),
    ProcessStopped(ProcessStoppedData),
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProcessStartedData {
    pub pid: Pid,
    pub ppid: Option<Pid>,
    pub create_time: Option<DateTime<Utc>>,
    pub executable: Option<FileInfo>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProcessStoppedData {
    pub pid: Pid,
    pub ppid: Option<Pid>,
    pub create_time: Option<DateTime<Utc>>,
    pub exit_time: Option<DateTime<Utc>>,
    pub exit_code: Option<i32>,
    pub executable: Option<FileInfo>,
}

/// Executable metadata attached to process events.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FileInfo {
    pub path: String,
    pub filename: String,
    pub size: Option<u64>,
    pub hashes: Option<Hashes>,
}

impl FileInfo {
    pub fn new(path: &Path) -> Self {
        let filename = path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default();
        Self {
            path: path.to_string_lossy().into_owned(),
            filename,
            size: None,
            hashes: None,
        }
    }

    /// Stat and hash the file at `path`, best effort. The process may be
    /// gone and its executable with it, so every step is allowed to fail
    /// without failing the event.
    pub fn inspect(path: &Path) -> Self {
        let mut info = Self::new(path);
        if let Ok(meta) = std::fs::metadata(path) {
            info.size = Some(meta.len());
        }
        info.hashes = Hashes::of_file(path).ok();
        info
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Hashes {
    pub sha256: String,
}

impl Hashes {
    pub fn of_file(path: &Path) -> io::Result<Self> {
        let mut file = File::open(path)?;
        let mut hasher = Sha256::new();
        io::copy(&mut file, &mut hasher)?;
        Ok(Self {
            sha256: format!("{:x}", hasher.finalize()),
        })
    }
}
