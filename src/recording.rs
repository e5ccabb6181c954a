//! Labelled recordings of aligned sensor triples.
//!
//! Each row is `mode,timestamp,acc_x,acc_y,acc_z,gyro_x,gyro_y,gyro_z,mag_x,mag_y,mag_z`
//! where `mode` is 1 when the device was held in the hands and 0 when it was
//! in a pocket, and `timestamp` is the latest of the three sample times.
//! Files are named `YYYYMMDD_HHMMSS_<mode>.txt`.

use crate::collector::types::Sample;
use crate::core::sync::AlignedTriple;
use chrono::Utc;
use chrono_tz::Tz;
use serde::{Deserialize, Serialize};
use std::fs::{File, OpenOptions};
use std::io::{BufRead, BufReader, BufWriter, Write};
use std::path::{Path, PathBuf};

/// Number of comma-separated fields in a row.
const ROW_FIELDS: usize = 11;

/// Label attached to recorded rows.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RecordingMode {
    Pocket,
    Hands,
}

impl RecordingMode {
    /// Numeric label written to the file.
    pub fn code(self) -> u8 {
        match self {
            RecordingMode::Pocket => 0,
            RecordingMode::Hands => 1,
        }
    }

    pub fn from_code(code: u8) -> Option<Self> {
        match code {
            0 => Some(RecordingMode::Pocket),
            1 => Some(RecordingMode::Hands),
            _ => None,
        }
    }
}

/// Destination for aligned triples.
pub trait LogSink: Send {
    fn record(&mut self, triple: &AlignedTriple, mode: RecordingMode) -> Result<(), RecordingError>;

    /// Push buffered rows to durable storage.
    fn flush(&mut self) -> Result<(), RecordingError> {
        Ok(())
    }
}

/// Appends rows to a recording file.
pub struct CsvRecorder {
    path: PathBuf,
    writer: BufWriter<File>,
    rows: u64,
}

impl CsvRecorder {
    /// Create a new recording file in `dir`, named from the current time in `tz`.
    pub fn create(dir: &Path, mode: RecordingMode, tz: Tz) -> Result<Self, RecordingError> {
        std::fs::create_dir_all(dir).map_err(|e| RecordingError::Io(e.to_string()))?;
        let stamp = Utc::now().with_timezone(&tz).format("%Y%m%d_%H%M%S");
        Self::open(dir.join(format!("{stamp}_{}.txt", mode.code())))
    }

    /// Open (or append to) a recording at an explicit path.
    pub fn open(path: PathBuf) -> Result<Self, RecordingError> {
        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&path)
            .map_err(|e| RecordingError::Io(format!("{}: {e}", path.display())))?;

        Ok(Self {
            path,
            writer: BufWriter::new(file),
            rows: 0,
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Rows written so far.
    pub fn rows(&self) -> u64 {
        self.rows
    }
}

impl LogSink for CsvRecorder {
    fn record(&mut self, triple: &AlignedTriple, mode: RecordingMode) -> Result<(), RecordingError> {
        self.writer
            .write_all(format_row(triple, mode).as_bytes())
            .map_err(|e| RecordingError::Io(e.to_string()))?;
        self.rows += 1;
        Ok(())
    }

    fn flush(&mut self) -> Result<(), RecordingError> {
        self.writer
            .flush()
            .map_err(|e| RecordingError::Io(e.to_string()))
    }
}

/// Format one recording row, newline included.
pub fn format_row(triple: &AlignedTriple, mode: RecordingMode) -> String {
    let a = &triple.accelerometer;
    let g = &triple.gyroscope;
    let m = &triple.magnetometer;
    format!(
        "{},{:.6},{:.6},{:.6},{:.6},{:.6},{:.6},{:.6},{:.6},{:.6},{:.6}\n",
        mode.code(),
        triple.max_timestamp(),
        a.x,
        a.y,
        a.z,
        g.x,
        g.y,
        g.z,
        m.x,
        m.y,
        m.z
    )
}

/// A parsed recording row.
#[derive(Debug, Clone, PartialEq)]
pub struct RecordedRow {
    pub mode: RecordingMode,
    pub timestamp: f64,
    pub accelerometer: Sample,
    pub gyroscope: Sample,
    pub magnetometer: Sample,
}

/// Parse a single recording row.
pub fn parse_row(line: &str) -> Result<RecordedRow, String> {
    let fields: Vec<&str> = line.trim().split(',').map(str::trim).collect();
    if fields.len() != ROW_FIELDS {
        return Err(format!(
            "expected {ROW_FIELDS} fields, found {}",
            fields.len()
        ));
    }

    let mode = fields[0]
        .parse::<u8>()
        .ok()
        .and_then(RecordingMode::from_code)
        .ok_or_else(|| format!("invalid mode '{}'", fields[0]))?;

    let mut values = [0.0f64; ROW_FIELDS - 1];
    for (slot, raw) in values.iter_mut().zip(&fields[1..]) {
        *slot = raw
            .parse::<f64>()
            .map_err(|e| format!("invalid number '{raw}': {e}"))?;
    }

    let timestamp = values[0];
    let sample = |offset: usize| {
        Sample::new(
            timestamp,
            values[offset],
            values[offset + 1],
            values[offset + 2],
        )
    };

    Ok(RecordedRow {
        mode,
        timestamp,
        accelerometer: sample(1),
        gyroscope: sample(4),
        magnetometer: sample(7),
    })
}

/// Read every row of a recording file. Blank lines are skipped.
pub fn read_recording(path: &Path) -> Result<Vec<RecordedRow>, RecordingError> {
    let file = File::open(path).map_err(|e| RecordingError::Io(format!("{}: {e}", path.display())))?;

    let mut rows = Vec::new();
    for (number, line) in BufReader::new(file).lines().enumerate() {
        let line = line.map_err(|e| RecordingError::Io(e.to_string()))?;
        if line.trim().is_empty() {
            continue;
        }
        let row = parse_row(&line).map_err(|message| RecordingError::Parse {
            line: number + 1,
            message,
        })?;
        rows.push(row);
    }
    Ok(rows)
}

/// A recording file found on disk.
#[derive(Debug, Clone, Serialize)]
pub struct RecordingInfo {
    pub name: String,
    pub path: PathBuf,
    pub size_bytes: u64,
}

/// List recording files in `dir`, sorted by name.
pub fn list_recordings(dir: &Path) -> Result<Vec<RecordingInfo>, RecordingError> {
    if !dir.exists() {
        return Ok(Vec::new());
    }

    let mut recordings: Vec<RecordingInfo> = std::fs::read_dir(dir)
        .map_err(|e| RecordingError::Io(e.to_string()))?
        .filter_map(|e| e.ok())
        .map(|e| e.path())
        .filter(|p| p.extension().map(|e| e == "txt").unwrap_or(false))
        .filter_map(|path| {
            let size_bytes = std::fs::metadata(&path).ok()?.len();
            let name = path.file_name()?.to_string_lossy().to_string();
            Some(RecordingInfo {
                name,
                path,
                size_bytes,
            })
        })
        .collect();

    recordings.sort_by(|a, b| a.name.cmp(&b.name));
    Ok(recordings)
}

/// Recording errors.
#[derive(Debug)]
pub enum RecordingError {
    Io(String),
    Parse { line: usize, message: String },
}

impl std::fmt::Display for RecordingError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            RecordingError::Io(e) => write!(f, "IO error: {e}"),
            RecordingError::Parse { line, message } => {
                write!(f, "Parse error on line {line}: {message}")
            }
        }
    }
}

impl std::error::Error for RecordingError {}
