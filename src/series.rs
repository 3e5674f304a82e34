//! Time-series provider interface and a wide-format frame.
//!
//! Stored readings are long-format `(timestamp_ns, tag, value, quality)`
//! rows; models want one row per timestamp with one column per tag.

use std::collections::BTreeMap;

use chrono::{DateTime, NaiveDate, NaiveDateTime, TimeZone, Utc};
use ndarray::{Array2, ArrayView2};
use tracing::debug;

use crate::error::{AnomalyError, Result};
use crate::tags::TagSet;

/// Quality code of a good reading.
pub const GOOD_QUALITY: i32 = 0;

/// A query bound in any of the accepted time formats.
#[derive(Debug, Clone, PartialEq)]
pub enum TimeBound {
    /// RFC 3339, `YYYY-MM-DD HH:MM:SS[.f]`, `YYYY-MM-DDTHH:MM:SS[.f]` or `YYYY-MM-DD`.
    /// Forms without an offset are read as UTC.
    Iso(String),
    DateTime(DateTime<Utc>),
    /// Nanoseconds since the Unix epoch, passed through unchanged.
    Nanos(i64),
}

impl TimeBound {
    pub fn to_nanos(&self) -> Result<i64> {
        match self {
            TimeBound::Nanos(ns) => Ok(*ns),
            TimeBound::DateTime(dt) => datetime_nanos(dt),
            TimeBound::Iso(text) => datetime_nanos(&parse_iso(text)?),
        }
    }
}

fn parse_iso(text: &str) -> Result<DateTime<Utc>> {
    let text = text.trim();
    if let Ok(dt) = DateTime::parse_from_rfc3339(text) {
        return Ok(dt.with_timezone(&Utc));
    }
    for format in ["%Y-%m-%d %H:%M:%S%.f", "%Y-%m-%dT%H:%M:%S%.f"] {
        if let Ok(naive) = NaiveDateTime::parse_from_str(text, format) {
            return Ok(Utc.from_utc_datetime(&naive));
        }
    }
    if let Ok(date) = NaiveDate::parse_from_str(text, "%Y-%m-%d") {
        if let Some(naive) = date.and_hms_opt(0, 0, 0) {
            return Ok(Utc.from_utc_datetime(&naive));
        }
    }
    Err(AnomalyError::InvalidTime(format!("unrecognised time '{text}'")))
}

fn datetime_nanos(dt: &DateTime<Utc>) -> Result<i64> {
    dt.timestamp_nanos_opt()
        .ok_or_else(|| AnomalyError::InvalidTime(format!("{dt} is outside the nanosecond range")))
}

impl From<&str> for TimeBound {
    fn from(text: &str) -> Self {
        TimeBound::Iso(text.to_string())
    }
}

impl From<String> for TimeBound {
    fn from(text: String) -> Self {
        TimeBound::Iso(text)
    }
}

impl From<DateTime<Utc>> for TimeBound {
    fn from(dt: DateTime<Utc>) -> Self {
        TimeBound::DateTime(dt)
    }
}

impl From<i64> for TimeBound {
    fn from(ns: i64) -> Self {
        TimeBound::Nanos(ns)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Reading {
    pub timestamp_ns: i64,
    pub tag: String,
    pub value: f64,
    pub quality: i32,
}

impl Reading {
    pub fn good(timestamp_ns: i64, tag: impl Into<String>, value: f64) -> Self {
        Reading {
            timestamp_ns,
            tag: tag.into(),
            value,
            quality: GOOD_QUALITY,
        }
    }
}

/// One row per timestamp, one column per tag, in tag-set order.
#[derive(Debug, Clone)]
pub struct WideFrame {
    timestamps: Vec<i64>,
    tags: TagSet,
    values: Array2<f64>,
}

impl WideFrame {
    /// Pivot good-quality readings of the given tags. Cells with no reading are NaN.
    /// A repeated `(timestamp, tag)` keeps the last reading.
    pub fn pivot<'a, I>(readings: I, tags: &TagSet) -> Self
    where
        I: IntoIterator<Item = &'a Reading>,
    {
        let width = tags.len();
        let mut rows: BTreeMap<i64, Vec<f64>> = BTreeMap::new();
        let mut dropped = 0usize;

        for reading in readings {
            if reading.quality != GOOD_QUALITY {
                dropped += 1;
                continue;
            }
            let Some(column) = tags.index_of(&reading.tag) else {
                continue;
            };
            let row = rows
                .entry(reading.timestamp_ns)
                .or_insert_with(|| vec![f64::NAN; width]);
            row[column] = reading.value;
        }

        if dropped > 0 {
            debug!(dropped, "skipped readings with bad quality");
        }

        let mut values = Array2::from_elem((rows.len(), width), f64::NAN);
        let mut timestamps = Vec::with_capacity(rows.len());
        for (i, (timestamp, row)) in rows.into_iter().enumerate() {
            timestamps.push(timestamp);
            for (j, value) in row.into_iter().enumerate() {
                values[[i, j]] = value;
            }
        }

        WideFrame {
            timestamps,
            tags: tags.clone(),
            values,
        }
    }

    pub fn timestamps(&self) -> &[i64] {
        &self.timestamps
    }

    pub fn tags(&self) -> &TagSet {
        &self.tags
    }

    pub fn values(&self) -> ArrayView2<'_, f64> {
        self.values.view()
    }

    pub fn into_values(self) -> Array2<f64> {
        self.values
    }

    pub fn rows(&self) -> usize {
        self.timestamps.len()
    }

    pub fn missing_cells(&self) -> usize {
        self.values.iter().filter(|v| v.is_nan()).count()
    }

    /// Fail if any cell is missing; models need a gap-free table.
    pub fn ensure_complete(&self) -> Result<()> {
        let missing = self.missing_cells();
        if missing > 0 {
            return Err(AnomalyError::NonFinite(format!(
                "wide frame ({missing} missing cells)"
            )));
        }
        Ok(())
    }
}

/// Source of wide-format sensor history.
pub trait SeriesSource {
    /// Readings with `start <= timestamp <= end`, good quality only.
    fn fetch(&self, start: TimeBound, end: TimeBound, tags: &TagSet) -> Result<WideFrame>;
}

/// In-memory readings, for tests and replay.
#[derive(Debug, Clone, Default)]
pub struct MemorySeries {
    readings: Vec<Reading>,
}

impl MemorySeries {
    pub fn new(readings: Vec<Reading>) -> Self {
        MemorySeries { readings }
    }

    pub fn push(&mut self, reading: Reading) {
        self.readings.push(reading);
    }

    pub fn len(&self) -> usize {
        self.readings.len()
    }

    pub fn is_empty(&self) -> bool {
        self.readings.is_empty()
    }
}

impl SeriesSource for MemorySeries {
    fn fetch(&self, start: TimeBound, end: TimeBound, tags: &TagSet) -> Result<WideFrame> {
        let start_ns = start.to_nanos()?;
        let end_ns = end.to_nanos()?;
        if start_ns > end_ns {
            return Err(AnomalyError::InvalidTime(format!(
                "start {start_ns} is after end {end_ns}"
            )));
        }
        debug!(start_ns, end_ns, tags = tags.len(), "fetching readings");

        let in_range = self
            .readings
            .iter()
            .filter(|r| r.timestamp_ns >= start_ns && r.timestamp_ns <= end_ns);
        Ok(WideFrame::pivot(in_range, tags))
    }
}
