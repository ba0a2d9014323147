//! Attendance ledger: one record per registered identity per session.
//!
//! The ledger always reports on the whole roster, never just the faces that
//! were seen. Records are append-only; repeating a session for the same
//! date and subject appends a second set of rows.

use chrono::{NaiveDate, NaiveTime, Timelike};
use rollcall_core::Identity;
use serde::Serialize;
use std::collections::BTreeSet;
use std::fs::{self, OpenOptions};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, PoisonError};

use crate::error::{Error, Result};
use crate::store::{file_is_empty, StoreError};

/// Accepted session date format.
pub const DATE_FORMAT: &str = "%Y-%m-%d";
/// Format of the recorded time-of-day.
pub const TIME_FORMAT: &str = "%H:%M:%S";

const LOG_HEADER: [&str; 6] = ["student_id", "name", "date", "time", "subject", "status"];

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum AttendanceStatus {
    Present,
    Absent,
}

impl AttendanceStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            AttendanceStatus::Present => "Present",
            AttendanceStatus::Absent => "Absent",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct AttendanceRecord {
    pub identity_id: String,
    pub display_name: String,
    pub date: NaiveDate,
    pub time: NaiveTime,
    pub subject: String,
    pub status: AttendanceStatus,
}

impl AttendanceRecord {
    /// Row in log column order: student_id, name, date, time, subject, status.
    fn to_row(&self) -> [String; 6] {
        [
            self.identity_id.clone(),
            self.display_name.clone(),
            self.date.format(DATE_FORMAT).to_string(),
            self.time.format(TIME_FORMAT).to_string(),
            self.subject.clone(),
            self.status.as_str().to_string(),
        ]
    }
}

/// Parse a `YYYY-MM-DD` session date.
pub fn parse_session_date(date: &str) -> Result<NaiveDate> {
    NaiveDate::parse_from_str(date, DATE_FORMAT).map_err(|_| Error::InvalidDate(date.to_string()))
}

/// Append-only sink for attendance records.
pub trait AttendanceLog: Send {
    fn append(&mut self, records: &[AttendanceRecord]) -> Result<(), StoreError>;
}

impl<L: AttendanceLog + ?Sized> AttendanceLog for Box<L> {
    fn append(&mut self, records: &[AttendanceRecord]) -> Result<(), StoreError> {
        (**self).append(records)
    }
}

/// In-memory log. Clones share the same rows, so a handle kept outside the
/// ledger sees everything written through it.
#[derive(Debug, Clone, Default)]
pub struct MemoryLog {
    records: Arc<Mutex<Vec<AttendanceRecord>>>,
}

impl MemoryLog {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn records(&self) -> Vec<AttendanceRecord> {
        self.records.lock().unwrap_or_else(PoisonError::into_inner).clone()
    }
}

impl AttendanceLog for MemoryLog {
    fn append(&mut self, records: &[AttendanceRecord]) -> Result<(), StoreError> {
        self.records
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .extend_from_slice(records);
        Ok(())
    }
}

/// CSV log: `student_id,name,date,time,subject,status`, header written once.
#[derive(Debug, Clone)]
pub struct CsvLog {
    path: PathBuf,
}

impl CsvLog {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl AttendanceLog for CsvLog {
    fn append(&mut self, records: &[AttendanceRecord]) -> Result<(), StoreError> {
        let is_new = file_is_empty(&self.path);
        if let Some(parent) = self.path.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent)?;
        }
        let file = OpenOptions::new().create(true).append(true).open(&self.path)?;
        let mut writer = csv::WriterBuilder::new().has_headers(false).from_writer(file);

        if is_new {
            writer.write_record(LOG_HEADER)?;
        }
        for record in records {
            writer.write_record(record.to_row())?;
        }
        writer.flush()?;
        Ok(())
    }
}

/// Sole writer of the attendance log.
pub struct Ledger<L: AttendanceLog = Box<dyn AttendanceLog>> {
    log: Mutex<L>,
}

impl<L: AttendanceLog> Ledger<L> {
    pub fn new(log: L) -> Self {
        Self { log: Mutex::new(log) }
    }

    /// Emit and persist one record per roster identity for this session.
    ///
    /// `date` is validated before anything is written. An empty roster
    /// writes nothing and yields no records.
    pub fn record_session(
        &self,
        roster: &[Identity],
        subject: &str,
        present_ids: &BTreeSet<String>,
        date: &str,
        time: NaiveTime,
    ) -> Result<Vec<AttendanceRecord>> {
        let date = parse_session_date(date)?;
        let time = time.with_nanosecond(0).unwrap_or(time);

        let records: Vec<AttendanceRecord> = roster
            .iter()
            .map(|identity| AttendanceRecord {
                identity_id: identity.id.clone(),
                display_name: identity.display_name.clone(),
                date,
                time,
                subject: subject.to_string(),
                status: if present_ids.contains(&identity.id) {
                    AttendanceStatus::Present
                } else {
                    AttendanceStatus::Absent
                },
            })
            .collect();

        if records.is_empty() {
            return Ok(records);
        }

        self.log
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .append(&records)?;

        let present = records.iter().filter(|r| r.status == AttendanceStatus::Present).count();
        tracing::info!(
            subject,
            date = %date,
            present,
            absent = records.len() - present,
            "attendance session recorded"
        );
        Ok(records)
    }
}
