//! DASH MPD window extraction
//!
//! Reads just what the live window needs:
//! - `availabilityStartTime` and `timeShiftBufferDepth` on the MPD element
//! - `duration`, `timescale` and `presentationTimeOffset` on the first SegmentTemplate
//! - the `UTCTiming` value url used to learn the server wallclock

use super::{parse_date_ms, TimeData};
use crate::time::duration_to_seconds;
use crate::{Error, Result, WindowType};

const ATTRIBUTES_PARSE_ERROR: &str = "manifest-dash-attributes-parse-error";
const TIMING_ERROR: &str = "manifest-dash-timing-error";

/// Attributes of an MPD relevant to its time window
#[derive(Debug, Clone, PartialEq, Default)]
pub struct DashAttributes {
    pub availability_start_time: Option<String>,
    pub time_shift_buffer_depth: Option<String>,
    pub segment_duration: Option<f64>,
    pub timescale: Option<f64>,
    pub presentation_time_offset: Option<f64>,
}

impl DashAttributes {
    /// Extract the attributes from MPD text
    pub fn from_mpd(content: &str) -> Result<Self> {
        let mpd = element_attrs(content, "MPD")
            .ok_or_else(|| Error::ManifestParse("MPD element not found".to_string()))?;
        let template = element_attrs(content, "SegmentTemplate")
            .ok_or_else(|| Error::ManifestParse("SegmentTemplate element not found".to_string()))?;

        Ok(Self {
            availability_start_time: extract_attr(mpd, "availabilityStartTime"),
            time_shift_buffer_depth: extract_attr(mpd, "timeShiftBufferDepth"),
            segment_duration: number_attr(template, "duration"),
            timescale: number_attr(template, "timescale"),
            presentation_time_offset: number_attr(template, "presentationTimeOffset"),
        })
    }

    /// Segment length in milliseconds, if it is known and non-zero
    fn segment_length_ms(&self) -> Option<f64> {
        let length = 1000.0 * self.segment_duration? / self.timescale?;
        (length.is_finite() && length != 0.0).then_some(length)
    }

    fn availability_start_ms(&self) -> Option<f64> {
        self.availability_start_time.as_deref().and_then(parse_date_ms)
    }
}

/// The `UTCTiming` value url of an MPD, if any
pub fn timing_resource(content: &str) -> Option<String> {
    element_attrs(content, "UTCTiming").and_then(|attrs| extract_attr(attrs, "value"))
}

/// Extract the time window of an MPD
///
/// Live windows need the server `wallclock_ms`; without it the timing
/// resource could not be read and the window is unknown.
pub fn parse_mpd(
    content: &str,
    window_type: WindowType,
    wallclock_ms: Option<f64>,
) -> Result<TimeData> {
    let attributes = DashAttributes::from_mpd(content)?;

    match window_type {
        WindowType::Static => Ok(parse_static(&attributes)),
        WindowType::Sliding => {
            let wallclock =
                wallclock_ms.ok_or_else(|| Error::ManifestTiming(TIMING_ERROR.to_string()))?;
            parse_sliding(&attributes, wallclock)
        }
        WindowType::Growing => {
            let wallclock =
                wallclock_ms.ok_or_else(|| Error::ManifestTiming(TIMING_ERROR.to_string()))?;
            parse_growing(&attributes, wallclock)
        }
    }
}

fn parse_static(attributes: &DashAttributes) -> TimeData {
    let offset = match (attributes.presentation_time_offset, attributes.timescale) {
        (Some(offset), Some(timescale)) if timescale != 0.0 => Some(offset / timescale),
        _ => None,
    };
    TimeData {
        presentation_time_offset_seconds: offset,
        ..TimeData::default()
    }
}

fn parse_sliding(attributes: &DashAttributes, wallclock_ms: f64) -> Result<TimeData> {
    let (availability_start, segment_length) = live_attributes(attributes)?;

    let window_end = wallclock_ms - availability_start - segment_length;
    let window_start = attributes
        .time_shift_buffer_depth
        .as_deref()
        .and_then(duration_to_seconds)
        .map(|depth| window_end - depth * 1000.0);

    Ok(TimeData {
        window_start_time: window_start,
        window_end_time: Some(window_end),
        presentation_time_offset_seconds: None,
        time_correction_seconds: window_start.map(|start| start / 1000.0),
    })
}

fn parse_growing(attributes: &DashAttributes, wallclock_ms: f64) -> Result<TimeData> {
    let (availability_start, segment_length) = live_attributes(attributes)?;

    Ok(TimeData {
        window_start_time: Some(availability_start),
        window_end_time: Some(wallclock_ms - segment_length),
        ..TimeData::default()
    })
}

fn live_attributes(attributes: &DashAttributes) -> Result<(f64, f64)> {
    match (attributes.availability_start_ms(), attributes.segment_length_ms()) {
        (Some(start), Some(length)) => Ok((start, length)),
        _ => Err(Error::ManifestParse(ATTRIBUTES_PARSE_ERROR.to_string())),
    }
}

/// Attribute text of the first `<name` element
fn element_attrs<'a>(content: &'a str, name: &str) -> Option<&'a str> {
    let pattern = format!("<{name}");
    let mut search = content;
    while let Some(start) = search.find(&pattern) {
        let rest = &search[start + pattern.len()..];
        // skip longer element names sharing the prefix
        if rest.starts_with(|c: char| c.is_whitespace() || c == '>' || c == '/') {
            let end = rest.find('>')?;
            return Some(&rest[..end]);
        }
        search = rest;
    }
    None
}

/// Extract an attribute value from an element's attribute text
fn extract_attr(attrs: &str, name: &str) -> Option<String> {
    let pattern = format!("{name}=\"");
    let mut offset = 0;
    while let Some(found) = attrs[offset..].find(&pattern) {
        let start = offset + found;
        let preceded_by_space = attrs[..start]
            .chars()
            .next_back()
            .map_or(true, char::is_whitespace);
        let value_start = start + pattern.len();
        if preceded_by_space {
            let end = attrs[value_start..].find('"')?;
            return Some(attrs[value_start..value_start + end].to_string());
        }
        offset = value_start;
    }
    None
}

fn number_attr(attrs: &str, name: &str) -> Option<f64> {
    extract_attr(attrs, name).and_then(|value| value.trim().parse::<f64>().ok())
}
