use std::error::Error;
use std::fmt;
use std::path::Path;

use chrono::{DateTime, Local};
use serde::Serialize;
use uuid::Uuid;

/// Component that produced a log entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum LogSource {
    Orchestrator,
    Ambulance,
    TrafficBrain,
    TrafficSignal,
    Mesh,
}

impl LogSource {
    pub fn as_str(self) -> &'static str {
        match self {
            LogSource::Orchestrator => "ORCHESTRATOR",
            LogSource::Ambulance => "AMBULANCE",
            LogSource::TrafficBrain => "TRAFFIC_BRAIN",
            LogSource::TrafficSignal => "TRAFFIC_SIGNAL",
            LogSource::Mesh => "MESH",
        }
    }
}

impl fmt::Display for LogSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum LogSeverity {
    Info,
    Success,
    Warning,
    Error,
    Mesh,
}

impl LogSeverity {
    pub fn as_str(self) -> &'static str {
        match self {
            LogSeverity::Info => "info",
            LogSeverity::Success => "success",
            LogSeverity::Warning => "warning",
            LogSeverity::Error => "error",
            LogSeverity::Mesh => "mesh",
        }
    }
}

/// One immutable entry of the mission log.
#[derive(Debug, Clone, PartialEq)]
pub struct AgentLog {
    pub id: Uuid,
    pub source: LogSource,
    pub message: String,
    pub timestamp: DateTime<Local>,
    pub severity: LogSeverity,
}

impl fmt::Display for AgentLog {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "[{}] {:<14} {:<7} {}",
            self.timestamp.format("%H:%M:%S"),
            self.source,
            self.severity.as_str(),
            self.message
        )
    }
}

#[derive(Debug, Serialize)]
struct AgentLogRecord<'a> {
    id: String,
    timestamp: String,
    source: &'static str,
    severity: &'static str,
    message: &'a str,
}

/// Append-only record of notable events. Entries are only ever added at the
/// end and are handed out by shared reference.
#[derive(Debug, Default)]
pub struct MissionLog {
    entries: Vec<AgentLog>,
}

impl MissionLog {
    pub fn new() -> Self {
        Self::default()
    }

    /// Appends an entry stamped with a fresh id and the current local time,
    /// mirrors it to the `log` facade and returns it.
    pub fn record(
        &mut self,
        source: LogSource,
        message: impl Into<String>,
        severity: LogSeverity,
    ) -> &AgentLog {
        let entry = AgentLog {
            id: Uuid::new_v4(),
            source,
            message: message.into(),
            timestamp: Local::now(),
            severity,
        };
        match severity {
            LogSeverity::Error => log::error!("[{}] {}", source, entry.message),
            LogSeverity::Warning => log::warn!("[{}] {}", source, entry.message),
            _ => log::info!("[{}] {}", source, entry.message),
        }
        self.entries.push(entry);
        &self.entries[self.entries.len() - 1]
    }

    pub fn entries(&self) -> &[AgentLog] {
        &self.entries
    }

    /// The last `n` entries, oldest first.
    pub fn tail(&self, n: usize) -> &[AgentLog] {
        &self.entries[self.entries.len().saturating_sub(n)..]
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Writes the whole log to `path` as CSV, replacing any previous file.
    pub fn export_csv<P: AsRef<Path>>(&self, path: P) -> Result<usize, Box<dyn Error>> {
        let mut wtr = csv::Writer::from_path(path)?;
        for entry in &self.entries {
            wtr.serialize(AgentLogRecord {
                id: entry.id.to_string(),
                timestamp: entry.timestamp.to_rfc3339(),
                source: entry.source.as_str(),
                severity: entry.severity.as_str(),
                message: &entry.message,
            })?;
        }
        wtr.flush()?;
        Ok(self.entries.len())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn entries_keep_call_order() {
        let mut log = MissionLog::new();
        for i in 0..25 {
            log.record(LogSource::TrafficSignal, format!("event {}", i), LogSeverity::Info);
        }
        assert_eq!(log.len(), 25);
        for (i, entry) in log.entries().iter().enumerate() {
            assert_eq!(entry.message, format!("event {}", i));
        }
        assert!(log.entries().windows(2).all(|w| w[0].timestamp <= w[1].timestamp));
    }

    #[test]
    fn ids_are_unique_and_earlier_entries_unchanged() {
        let mut log = MissionLog::new();
        let first = log
            .record(LogSource::Orchestrator, "Initiating dispatch", LogSeverity::Info)
            .clone();
        log.record(LogSource::Mesh, "Solace Agent Mesh Connected", LogSeverity::Mesh);
        log.record(LogSource::Ambulance, "Dispatched", LogSeverity::Success);

        assert_eq!(log.entries()[0], first);
        assert_ne!(log.entries()[0].id, log.entries()[1].id);
        assert_ne!(log.entries()[1].id, log.entries()[2].id);
    }

    #[test]
    fn tail_returns_most_recent_entries() {
        let mut log = MissionLog::new();
        for i in 0..5 {
            log.record(LogSource::Mesh, format!("m{}", i), LogSeverity::Mesh);
        }
        let tail: Vec<_> = log.tail(2).iter().map(|e| e.message.as_str()).collect();
        assert_eq!(tail, vec!["m3", "m4"]);
        assert_eq!(log.tail(10).len(), 5);
    }

    #[test]
    fn export_writes_header_and_rows() {
        let mut log = MissionLog::new();
        log.record(LogSource::TrafficBrain, "Preemption at 42, green", LogSeverity::Warning);
        log.record(LogSource::Ambulance, "MISSION ACCOMPLISHED", LogSeverity::Success);

        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("mission_log.csv");
        assert_eq!(log.export_csv(&path).unwrap(), 2);

        let mut rdr = csv::Reader::from_path(&path).unwrap();
        let headers = rdr.headers().unwrap().clone();
        assert_eq!(
            headers.iter().collect::<Vec<_>>(),
            vec!["id", "timestamp", "source", "severity", "message"]
        );
        let rows: Vec<csv::StringRecord> = rdr.records().map(Result::unwrap).collect();
        assert_eq!(rows.len(), 2);
        assert_eq!(&rows[0][2], "TRAFFIC_BRAIN");
        assert_eq!(&rows[0][4], "Preemption at 42, green");
        assert_eq!(&rows[1][3], "success");
    }
}
