//! Manifest loading for live window data
//!
//! Handles:
//! - Classifying a media url as DASH or HLS
//! - Fetching the manifest (and the timing resource or media playlist it points at)
//! - Extracting the live window, presentation time offset and time correction
//!
//! Network failures are errors. A manifest that was fetched but could not be
//! parsed is not: it yields placeholder [`TimeData`] and carries the parse
//! error so the caller can notify plugins.

mod dash;
mod hls;
mod loader;

pub use dash::{parse_mpd, timing_resource, DashAttributes};
pub use hls::{parse_m3u8, stream_url};
#[cfg(feature = "http")]
pub use loader::HttpUrlLoader;
pub use loader::{RemoteManifestLoader, UrlLoader};

use crate::{error_codes, Error, MediaError, Result, TransferFormat, WindowType};
use async_trait::async_trait;
use chrono::{DateTime, NaiveDateTime};
use serde::{Deserialize, Serialize};

/// Time window of a stream
///
/// Window times are epoch milliseconds, offsets and corrections are seconds.
/// Fields the manifest could not provide stay `None`.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct TimeData {
    pub window_start_time: Option<f64>,
    pub window_end_time: Option<f64>,
    pub presentation_time_offset_seconds: Option<f64>,
    pub time_correction_seconds: Option<f64>,
}

impl TimeData {
    /// Offset applied to every engine reported time
    pub fn time_correction(&self) -> f64 {
        self.time_correction_seconds.unwrap_or(0.0)
    }

    pub fn window_length_seconds(&self) -> Option<f64> {
        match (self.window_start_time, self.window_end_time) {
            (Some(start), Some(end)) => Some((end - start) / 1000.0),
            _ => None,
        }
    }

    /// Log line listing the values that are known
    pub fn describe(&self) -> String {
        let mut parts = Vec::new();
        if let Some(start) = self.window_start_time {
            parts.push(format!("Window start time [ms]: {start}."));
        }
        if let Some(end) = self.window_end_time {
            parts.push(format!("Window end time [ms]: {end}."));
        }
        if let Some(correction) = self.time_correction_seconds {
            parts.push(format!("Correction [s]: {correction}."));
        }
        if let Some(offset) = self.presentation_time_offset_seconds {
            parts.push(format!("Offset [s]: {offset}."));
        }
        parts.join(" ")
    }
}

/// Result of a manifest load
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ManifestData {
    pub time: TimeData,
    pub transfer_format: TransferFormat,
    /// Set when the manifest was fetched but its window could not be read
    pub parse_error: Option<MediaError>,
}

impl ManifestData {
    pub fn new(time: TimeData, transfer_format: TransferFormat) -> Self {
        Self {
            time,
            transfer_format,
            parse_error: None,
        }
    }

    /// Placeholder data for a manifest that failed to parse
    pub fn unparsed(transfer_format: TransferFormat, message: impl Into<String>) -> Self {
        Self {
            time: TimeData::default(),
            transfer_format,
            parse_error: Some(MediaError::new(error_codes::MANIFEST_PARSE, message)),
        }
    }
}

/// Options for a manifest load
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct LoadOptions {
    pub window_type: WindowType,
    /// Epoch milliseconds supplied by the host, used instead of `UTCTiming`
    pub initial_wallclock_time: Option<f64>,
}

/// Loads manifests and extracts their time window
#[async_trait]
pub trait ManifestLoader: Send + Sync {
    async fn load(&self, url: &str, options: LoadOptions) -> Result<ManifestData>;
}

/// Transfer format of a media url, by path suffix
///
/// A query string is allowed after the suffix.
pub fn classify_url(url: &str) -> Result<TransferFormat> {
    let path = url.split('?').next().unwrap_or(url);
    if path.ends_with(".mpd") {
        Ok(TransferFormat::Dash)
    } else if path.ends_with(".m3u8") {
        Ok(TransferFormat::Hls)
    } else {
        Err(Error::InvalidMediaUrl(url.to_string()))
    }
}

/// Parse a manifest date into epoch milliseconds
///
/// Accepts RFC 3339, offsets without a colon, dates without a zone (read as
/// UTC) and RFC 2822.
pub fn parse_date_ms(value: &str) -> Option<f64> {
    let value = value.trim();
    if let Ok(date) = DateTime::parse_from_rfc3339(value) {
        return Some(date.timestamp_millis() as f64);
    }
    if let Ok(date) = DateTime::parse_from_str(value, "%Y-%m-%dT%H:%M:%S%.f%z") {
        return Some(date.timestamp_millis() as f64);
    }
    if let Ok(date) = NaiveDateTime::parse_from_str(value, "%Y-%m-%dT%H:%M:%S%.f") {
        return Some(date.and_utc().timestamp_millis() as f64);
    }
    DateTime::parse_from_rfc2822(value)
        .ok()
        .map(|date| date.timestamp_millis() as f64)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_classify_url() {
        assert_eq!(classify_url("http://a/x.mpd").unwrap(), TransferFormat::Dash);
        assert_eq!(classify_url("http://a/x.mpd?token=1").unwrap(), TransferFormat::Dash);
        assert_eq!(classify_url("http://a/x.m3u8").unwrap(), TransferFormat::Hls);
        assert!(matches!(classify_url("http://a/x.mp4"), Err(Error::InvalidMediaUrl(_))));
        assert!(classify_url("http://a/x.mpd.mp4").is_err());
    }

    #[test]
    fn test_parse_date_formats() {
        assert_eq!(parse_date_ms("1970-01-01T00:00:10Z"), Some(10_000.0));
        assert_eq!(parse_date_ms("1970-01-01T00:00:10.500+0000"), Some(10_500.0));
        assert_eq!(parse_date_ms("1970-01-01T01:00:00+01:00"), Some(0.0));
        assert_eq!(parse_date_ms("1970-01-01T00:01:00"), Some(60_000.0));
        assert_eq!(parse_date_ms("not a date"), None);
    }

    #[test]
    fn test_time_data_window_length() {
        let time = TimeData {
            window_start_time: Some(1_000.0),
            window_end_time: Some(7_201_000.0),
            ..TimeData::default()
        };
        assert_eq!(time.window_length_seconds(), Some(7200.0));
        assert_eq!(time.time_correction(), 0.0);
        assert_eq!(TimeData::default().window_length_seconds(), None);
        assert_eq!(
            time.describe(),
            "Window start time [ms]: 1000. Window end time [ms]: 7201000."
        );
    }

    #[test]
    fn test_unparsed_manifest_carries_code() {
        let data = ManifestData::unparsed(TransferFormat::Hls, "manifest-hls-parse-error");
        assert_eq!(data.time, TimeData::default());
        assert_eq!(data.parse_error.map(|e| e.code), Some(7));
    }
}
