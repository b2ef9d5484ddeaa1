//! Append-only, timestamped telemetry recording.
//!
//! Each record is the wall-clock receive time as microseconds since the
//! Unix epoch (`u64`, little-endian) immediately followed by the payload
//! bytes. Records carry no length prefix, so a failed write ends the
//! recording: nothing is appended after a record that may be partial.

use std::fs::{self, File, OpenOptions};
use std::io::{self, BufWriter, Write};
use std::path::{Path, PathBuf};
use std::time::{SystemTime, UNIX_EPOCH};

use chrono::{Local, NaiveDateTime};
use tracing::{debug, info, warn};

/// Bytes of timestamp preceding each record's payload.
pub const TIMESTAMP_LEN: usize = 8;

/// Numbered alternatives tried when the base log name is taken.
pub const MAX_NAME_SUFFIXES: usize = 10;

/// Logs no larger than this are removed on close.
pub const EMPTY_LOG_THRESHOLD: u64 = 1;

/// What happened to the log file on close.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LogDisposition {
    Kept { path: PathBuf, size: u64 },
    Removed { path: PathBuf },
}

/// An open telemetry log file.
#[derive(Debug)]
pub struct TelemetryLog {
    path: PathBuf,
    writer: BufWriter<File>,
    records: u64,
    record: Vec<u8>,
    failed: bool,
}

impl TelemetryLog {
    /// Create a log in `dir` named after the current local time.
    pub fn create(dir: &Path) -> io::Result<Self> {
        Self::create_at(dir, Local::now().naive_local())
    }

    /// Create a log in `dir` named after `started`.
    ///
    /// If the name is taken, `_0` through `_9` are tried; if all are taken
    /// the last candidate is appended to.
    pub fn create_at(dir: &Path, started: NaiveDateTime) -> io::Result<Self> {
        fs::create_dir_all(dir)?;
        let path = choose_path(dir, &log_file_name(&started));
        let file = OpenOptions::new().create(true).append(true).open(&path)?;
        info!(path = %path.display(), "telemetry log opened");
        Ok(Self::with_writer(path, BufWriter::new(file)))
    }

    fn with_writer(path: PathBuf, writer: BufWriter<File>) -> Self {
        Self {
            path,
            writer,
            records: 0,
            record: Vec::new(),
            failed: false,
        }
    }

    /// Append one record stamped with the current time.
    pub fn append(&mut self, payload: &[u8]) -> io::Result<()> {
        self.append_at(unix_micros(), payload)
    }

    /// Append one record with an explicit timestamp.
    ///
    /// Fails without writing once an earlier write or flush has failed.
    pub fn append_at(&mut self, micros: u64, payload: &[u8]) -> io::Result<()> {
        self.ensure_writable()?;
        self.record.clear();
        self.record.extend_from_slice(&micros.to_le_bytes());
        self.record.extend_from_slice(payload);
        if let Err(err) = self.writer.write_all(&self.record) {
            return Err(self.fail(err));
        }
        self.records += 1;
        Ok(())
    }

    pub fn flush(&mut self) -> io::Result<()> {
        self.ensure_writable()?;
        self.writer.flush().map_err(|err| self.fail(err))
    }

    /// Whether recording stopped after a failed write.
    pub fn is_failed(&self) -> bool {
        self.failed
    }

    fn ensure_writable(&self) -> io::Result<()> {
        if self.failed {
            return Err(io::Error::other("telemetry log stopped after a failed write"));
        }
        Ok(())
    }

    fn fail(&mut self, err: io::Error) -> io::Error {
        warn!(path = %self.path.display(), records = self.records, error = %err, "telemetry log write failed, recording stopped");
        self.failed = true;
        err
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Records appended through this handle.
    pub fn records(&self) -> u64 {
        self.records
    }

    /// Flush and close; remove the file if it holds no data.
    pub fn close(mut self) -> io::Result<LogDisposition> {
        if !self.failed {
            self.writer.flush()?;
        }
        let Self { path, writer, .. } = self;
        // Unflushed bytes of a failed log are discarded, not retried.
        let _ = writer.into_parts();

        let size = fs::metadata(&path)?.len();
        if size <= EMPTY_LOG_THRESHOLD {
            fs::remove_file(&path)?;
            debug!(path = %path.display(), size, "removed empty telemetry log");
            return Ok(LogDisposition::Removed { path });
        }
        info!(path = %path.display(), size, "telemetry log closed");
        Ok(LogDisposition::Kept { path, size })
    }
}

/// Base file name for a log started at `started`.
pub fn log_file_name(started: &NaiveDateTime) -> String {
    started.format("TELEMETRY_%Y-%m-%d_%H%M").to_string()
}

fn choose_path(dir: &Path, base: &str) -> PathBuf {
    let mut candidate = dir.join(base);
    if !candidate.exists() {
        return candidate;
    }
    for i in 0..MAX_NAME_SUFFIXES {
        candidate = dir.join(format!("{base}_{i}"));
        if !candidate.exists() {
            return candidate;
        }
    }
    candidate
}

fn unix_micros() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_micros() as u64)
        .unwrap_or(0)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDate;

    fn noon() -> NaiveDateTime {
        NaiveDate::from_ymd_opt(2024, 5, 1)
            .and_then(|d| d.and_hms_opt(12, 30, 0))
            .expect("valid date")
    }

    #[test]
    fn name_encodes_start_minute() {
        assert_eq!(log_file_name(&noon()), "TELEMETRY_2024-05-01_1230");
    }

    #[test]
    fn records_are_timestamp_then_payload() {
        let dir = tempfile::tempdir().unwrap();
        let mut log = TelemetryLog::create_at(dir.path(), noon()).unwrap();
        log.append_at(0x0102_0304_0506_0708, b"abc").unwrap();
        log.append_at(1, b"").unwrap();
        assert_eq!(log.records(), 2);
        let path = log.path().to_path_buf();

        let disposition = log.close().unwrap();
        assert_eq!(disposition, LogDisposition::Kept { path: path.clone(), size: 19 });

        let bytes = fs::read(&path).unwrap();
        assert_eq!(&bytes[..TIMESTAMP_LEN], &0x0102_0304_0506_0708u64.to_le_bytes());
        assert_eq!(&bytes[TIMESTAMP_LEN..TIMESTAMP_LEN + 3], b"abc");
        assert_eq!(&bytes[11..], &1u64.to_le_bytes());
    }

    #[test]
    fn live_timestamps_are_recent() {
        let dir = tempfile::tempdir().unwrap();
        let before = unix_micros();
        let mut log = TelemetryLog::create_at(dir.path(), noon()).unwrap();
        log.append(b"x").unwrap();
        log.flush().unwrap();

        let bytes = fs::read(log.path()).unwrap();
        let mut ts = [0u8; TIMESTAMP_LEN];
        ts.copy_from_slice(&bytes[..TIMESTAMP_LEN]);
        let stamped = u64::from_le_bytes(ts);
        assert!(stamped >= before);
        assert!(stamped <= unix_micros());
    }

    #[test]
    fn empty_log_is_removed_on_close() {
        let dir = tempfile::tempdir().unwrap();
        let log = TelemetryLog::create_at(dir.path(), noon()).unwrap();
        let path = log.path().to_path_buf();
        assert!(path.exists());

        assert_eq!(log.close().unwrap(), LogDisposition::Removed { path: path.clone() });
        assert!(!path.exists());
    }

    #[test]
    fn taken_names_get_numbered_suffixes() {
        let dir = tempfile::tempdir().unwrap();
        let base = log_file_name(&noon());
        fs::write(dir.path().join(&base), b"older run").unwrap();
        fs::write(dir.path().join(format!("{base}_0")), b"older run").unwrap();

        let log = TelemetryLog::create_at(dir.path(), noon()).unwrap();
        assert_eq!(log.path(), dir.path().join(format!("{base}_1")));
    }

    #[test]
    fn exhausted_suffixes_append_to_last_candidate() {
        let dir = tempfile::tempdir().unwrap();
        let base = log_file_name(&noon());
        fs::write(dir.path().join(&base), b"x").unwrap();
        for i in 0..MAX_NAME_SUFFIXES {
            fs::write(dir.path().join(format!("{base}_{i}")), b"prior").unwrap();
        }

        let mut log = TelemetryLog::create_at(dir.path(), noon()).unwrap();
        let last = dir.path().join(format!("{base}_{}", MAX_NAME_SUFFIXES - 1));
        assert_eq!(log.path(), last);
        log.append_at(0, b"!").unwrap();
        log.close().unwrap();

        let bytes = fs::read(&last).unwrap();
        assert!(bytes.starts_with(b"prior"));
        assert_eq!(bytes.len(), 5 + TIMESTAMP_LEN + 1);
    }

    #[cfg(target_os = "linux")]
    fn full_device_log() -> TelemetryLog {
        let file = OpenOptions::new().write(true).open("/dev/full").unwrap();
        TelemetryLog::with_writer(PathBuf::from("/dev/full"), BufWriter::with_capacity(0, file))
    }

    #[cfg(target_os = "linux")]
    #[test]
    fn failed_write_stops_recording() {
        let mut log = full_device_log();
        assert!(log.append_at(1, b"first").is_err());
        assert!(log.is_failed());
        assert_eq!(log.records(), 0);

        let err = log.append_at(2, b"second").unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::Other);
        assert!(log.flush().is_err());
    }

    #[cfg(target_os = "linux")]
    #[test]
    fn failed_flush_stops_recording() {
        let file = OpenOptions::new().write(true).open("/dev/full").unwrap();
        let mut log = TelemetryLog::with_writer(PathBuf::from("/dev/full"), BufWriter::new(file));
        log.append_at(1, b"buffered").unwrap();
        assert!(log.flush().is_err());
        assert!(log.is_failed());
        assert!(log.append_at(2, b"after").is_err());
        assert_eq!(log.records(), 1);
    }

    #[test]
    fn missing_directory_is_created() {
        let dir = tempfile::tempdir().unwrap();
        let nested = dir.path().join("logs/telemetry");
        let log = TelemetryLog::create_at(&nested, noon()).unwrap();
        assert!(log.path().starts_with(&nested));
    }
}
