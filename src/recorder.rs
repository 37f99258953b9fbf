//! JSONL recording of every request/response pair the proxy handles.
//!
//! One call produces two lines: a `request` line written at handler entry
//! and a `response` line written just before the handler returns, so the
//! request line for a call always precedes its response line. The mutex
//! is only ever held for the duration of a single `write_all`/`flush`
//! pair, never across the upstream call in between.

use std::fs::{File, OpenOptions};
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use std::time::SystemTime;

use serde::Serialize;
use serde_json::Value;

use crate::error::RecorderError;

/// Which side of a call a recorded message represents.
#[derive(Debug, Clone, Copy, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Direction {
    /// The inbound `tools/call` request.
    Request,
    /// The outbound result (or error) sent back to the host.
    Response,
}

#[derive(Serialize)]
struct RecordedMessage<'a> {
    timestamp: String,
    direction: Direction,
    message_type: &'static str,
    tool_name: &'a str,
    server_name: &'a str,
    message: &'a Value,
}

#[derive(Serialize)]
struct SessionHeader<'a> {
    start_time: String,
    server_info: &'a str,
    messages: [(); 0],
}

/// Appends JSONL records for a single recording session: two comment
/// lines, one session-header JSON object, then one JSON message object
/// per request/response.
pub struct RecorderSession {
    path: PathBuf,
    writer: Mutex<BufWriter<File>>,
}

impl RecorderSession {
    /// Opens (creating if necessary) the recording file at `path` in
    /// append mode and writes the two comment lines plus the session
    /// header object.
    ///
    /// # Errors
    ///
    /// Returns [`RecorderError::Io`] if the file cannot be created,
    /// opened, or written to, or [`RecorderError::Serialize`] if the
    /// header cannot be serialized (never happens in practice; kept for
    /// symmetry with [`Self::record_request`]/[`Self::record_response`]).
    pub fn start(path: impl AsRef<Path>, server_info: &str) -> Result<Self, RecorderError> {
        let path = path.as_ref().to_path_buf();

        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent).map_err(|e| RecorderError::Io {
                    message: format!("failed to create recording directory: {e}"),
                })?;
            }
        }

        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&path)
            .map_err(|e| RecorderError::Io {
                message: format!("failed to open recording file '{}': {e}", path.display()),
            })?;

        let session = Self {
            path,
            writer: Mutex::new(BufWriter::new(file)),
        };

        session.write_raw("# MCP Recording Session\n")?;
        session.write_raw(&format!("# Started: {}\n", Self::current_timestamp()))?;

        let header = SessionHeader {
            start_time: Self::current_timestamp(),
            server_info,
            messages: [],
        };
        session.write_line(&header)?;

        Ok(session)
    }

    /// The path this session is recording to.
    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Records the inbound `tools/call` request. Written before the
    /// upstream or management handler runs.
    ///
    /// # Errors
    ///
    /// Returns a [`RecorderError`] if serialization or the write fails.
    pub fn record_request(
        &self,
        tool_name: &str,
        server_name: &str,
        message: &Value,
    ) -> Result<(), RecorderError> {
        self.write_message(Direction::Request, tool_name, server_name, message)
    }

    /// Records the outbound result. Written after the handler has a
    /// result but before it returns to the transport, so the response
    /// line always follows its request line.
    ///
    /// # Errors
    ///
    /// Returns a [`RecorderError`] if serialization or the write fails.
    pub fn record_response(
        &self,
        tool_name: &str,
        server_name: &str,
        message: &Value,
    ) -> Result<(), RecorderError> {
        self.write_message(Direction::Response, tool_name, server_name, message)
    }

    /// The banner text injected as an extra content item into every
    /// successful `tools/call` response while recording is enabled.
    /// Begins with a fixed marker and names the recording file's absolute
    /// path (falling back to the configured path if it cannot be
    /// canonicalized, e.g. because the filesystem denies `stat`).
    #[must_use]
    pub fn banner(&self) -> String {
        let absolute = self
            .path
            .canonicalize()
            .unwrap_or_else(|_| self.path.clone());
        format!("[mcp-aggregator recording: {}]", absolute.display())
    }

    fn write_message(
        &self,
        direction: Direction,
        tool_name: &str,
        server_name: &str,
        message: &Value,
    ) -> Result<(), RecorderError> {
        let record = RecordedMessage {
            timestamp: Self::current_timestamp(),
            direction,
            message_type: "tool_call",
            tool_name,
            server_name,
            message,
        };
        self.write_line(&record)
    }

    fn write_raw(&self, text: &str) -> Result<(), RecorderError> {
        let mut guard = self.writer.lock().map_err(|_| RecorderError::Io {
            message: "recorder lock poisoned".to_string(),
        })?;
        guard.write_all(text.as_bytes()).map_err(|e| RecorderError::Io {
            message: format!("failed to write recording: {e}"),
        })?;
        guard.flush().map_err(|e| RecorderError::Io {
            message: format!("failed to flush recording: {e}"),
        })
    }

    fn write_line<T: Serialize>(&self, value: &T) -> Result<(), RecorderError> {
        let json = serde_json::to_string(value).map_err(|e| RecorderError::Serialize {
            message: e.to_string(),
        })?;
        self.write_raw(&format!("{json}\n"))
    }

    fn current_timestamp() -> String {
        let duration = SystemTime::now()
            .duration_since(SystemTime::UNIX_EPOCH)
            .unwrap_or_default();

        let secs = duration.as_secs();
        let millis = duration.subsec_millis();

        let days_since_epoch = secs / 86400;
        let time_of_day = secs % 86400;
        let hours = time_of_day / 3600;
        let minutes = (time_of_day % 3600) / 60;
        let seconds = time_of_day % 60;

        let (year, month, day) = days_to_ymd(days_since_epoch);

        format!("{year:04}-{month:02}-{day:02}T{hours:02}:{minutes:02}:{seconds:02}.{millis:03}Z")
    }
}

#[allow(clippy::cast_possible_wrap)]
#[allow(clippy::cast_possible_truncation)]
#[allow(clippy::cast_sign_loss)]
fn days_to_ymd(days: u64) -> (u32, u32, u32) {
    let mut remaining_days = days as i64;
    let mut year = 1970;

    loop {
        let days_in_year = if is_leap_year(year) { 366 } else { 365 };
        if remaining_days < days_in_year {
            break;
        }
        remaining_days -= days_in_year;
        year += 1;
    }

    let days_in_months: [i64; 12] = if is_leap_year(year) {
        [31, 29, 31, 30, 31, 30, 31, 31, 30, 31, 30, 31]
    } else {
        [31, 28, 31, 30, 31, 30, 31, 31, 30, 31, 30, 31]
    };

    let mut month = 1;
    for days_in_month in days_in_months {
        if remaining_days < days_in_month {
            break;
        }
        remaining_days -= days_in_month;
        month += 1;
    }

    let day = remaining_days as u32 + 1;
    (year, month, day)
}

const fn is_leap_year(year: u32) -> bool {
    (year % 4 == 0 && year % 100 != 0) || (year % 400 == 0)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn start_writes_header_lines_and_session_header_record() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("session.jsonl");
        let session = RecorderSession::start(&path, "mcp-aggregator/0.1.0").unwrap();
        drop(session);

        let contents = std::fs::read_to_string(&path).unwrap();
        assert!(contents.starts_with("# MCP Recording Session\n"));
        assert!(contents.contains("# Started: "));
        assert!(contents.contains("\"server_info\":\"mcp-aggregator/0.1.0\""));
        assert!(contents.contains("\"messages\":[]"));
    }

    #[test]
    fn one_call_writes_a_request_line_strictly_before_its_response_line() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("session.jsonl");
        let session = RecorderSession::start(&path, "test").unwrap();

        session
            .record_request("echo_ping", "echo", &serde_json::json!({"who": "a"}))
            .unwrap();
        session
            .record_response("echo_ping", "echo", &serde_json::json!({"content": []}))
            .unwrap();

        let contents = std::fs::read_to_string(&path).unwrap();
        let request_pos = contents.find("\"direction\":\"request\"").unwrap();
        let response_pos = contents.find("\"direction\":\"response\"").unwrap();
        assert!(request_pos < response_pos);
    }

    #[test]
    fn banner_names_the_absolute_recording_path() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("session.jsonl");
        let session = RecorderSession::start(&path, "test").unwrap();

        let banner = session.banner();
        assert!(banner.starts_with("[mcp-aggregator recording: "));
        assert!(banner.contains("session.jsonl"));
    }

    #[test]
    fn leap_year_detection_matches_calendar_rules() {
        assert!(is_leap_year(2000));
        assert!(!is_leap_year(1900));
        assert!(is_leap_year(2024));
        assert!(!is_leap_year(2023));
    }
}
