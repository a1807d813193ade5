//! HLS playlist window extraction
//!
//! The master playlist only points at the media playlist. The window of the
//! media playlist is its `EXT-X-PROGRAM-DATE-TIME` plus the summed `EXTINF`
//! durations.

use super::{parse_date_ms, TimeData};
use crate::{Error, Result, WindowType};

const ATTRIBUTES_PARSE_ERROR: &str = "manifest-hls-attributes-parse-error";

/// Url of the first variant in a master playlist
///
/// Relative urls replace the last path segment of `master_url`.
pub fn stream_url(master: &str, master_url: &str) -> Result<String> {
    let parsed = m3u8_rs::parse_master_playlist_res(master.as_bytes())
        .map_err(|e| Error::ManifestParse(format!("Failed to parse HLS master: {:?}", e)))?;

    let uri = parsed
        .variants
        .iter()
        .map(|variant| variant.uri.trim())
        .find(|uri| !uri.is_empty())
        .ok_or_else(|| {
            let message = "Unable to retrieve playlist url from HLS master playlist";
            Error::ManifestFetch(message.to_string())
        })?;

    if uri.starts_with("http") {
        return Ok(uri.to_string());
    }
    if let Ok(resolved) = url::Url::parse(master_url).and_then(|base| base.join(uri)) {
        return Ok(resolved.to_string());
    }
    let mut parts: Vec<&str> = master_url.split('/').collect();
    parts.pop();
    parts.push(uri);
    Ok(parts.join("/"))
}

/// Extract the time window of a media playlist
pub fn parse_m3u8(content: &str, window_type: WindowType) -> Result<TimeData> {
    let program_date_time = program_date_time(content);
    let duration = window_size_seconds(content)?;

    let (program_date_time, duration) = match (program_date_time, duration) {
        (Some(date), duration) if duration != 0.0 => (date, duration),
        _ => return Err(Error::ManifestParse(ATTRIBUTES_PARSE_ERROR.to_string())),
    };

    if window_type == WindowType::Static {
        return Ok(TimeData {
            presentation_time_offset_seconds: Some(program_date_time / 1000.0),
            ..TimeData::default()
        });
    }

    Ok(TimeData {
        window_start_time: Some(program_date_time),
        window_end_time: Some(program_date_time + duration * 1000.0),
        ..TimeData::default()
    })
}

/// First `EXT-X-PROGRAM-DATE-TIME` as epoch milliseconds
fn program_date_time(content: &str) -> Option<f64> {
    content
        .lines()
        .find_map(|line| line.trim().strip_prefix("#EXT-X-PROGRAM-DATE-TIME:"))
        .and_then(parse_date_ms)
        .filter(|date| *date != 0.0)
}

/// Sum of segment durations, whole seconds
fn window_size_seconds(content: &str) -> Result<f64> {
    let playlist = m3u8_rs::parse_media_playlist_res(content.as_bytes())
        .map_err(|e| Error::ManifestParse(format!("Failed to parse HLS media: {:?}", e)))?;

    let total: f64 = playlist
        .segments
        .iter()
        .map(|segment| f64::from(segment.duration))
        .sum();
    Ok(total.floor())
}
