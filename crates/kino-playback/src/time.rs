//! Time and window utilities
//!
//! Pure conversions between wall-clock epoch time and video-relative time
//! for sliding and growing live windows.

use nom::{
    bytes::complete::tag,
    character::complete::{char, digit1, one_of},
    combinator::opt,
    IResult, Parser,
};

/// Parse an ISO 8601 `PT..H..M..S` duration into seconds
///
/// Returns `None` for unparseable or zero durations. A comma decimal separator
/// keeps only the whole part.
pub fn duration_to_seconds(duration: &str) -> Option<f64> {
    let parsed: IResult<&str, (&str, Option<f64>, Option<f64>, Option<f64>)> =
        (tag("PT"), opt(hours), opt(minutes), opt(seconds)).parse(duration);
    let (_, (_, hours, minutes, seconds)) = parsed.ok()?;

    let total =
        hours.unwrap_or(0.0) * 3600.0 + minutes.unwrap_or(0.0) * 60.0 + seconds.unwrap_or(0.0);
    (total != 0.0).then_some(total)
}

fn hours(input: &str) -> IResult<&str, f64> {
    designator(input, 'H')
}

fn minutes(input: &str) -> IResult<&str, f64> {
    designator(input, 'M')
}

fn seconds(input: &str) -> IResult<&str, f64> {
    designator(input, 'S')
}

fn designator(input: &str, unit: char) -> IResult<&str, f64> {
    let parsed: IResult<&str, (&str, Option<(char, &str)>, char)> =
        (digit1, opt((one_of(",."), digit1)), char(unit)).parse(input);
    let (rest, (whole, fraction, _)) = parsed?;

    let mut value = whole.parse::<f64>().unwrap_or(0.0);
    if let Some(('.', digits)) = fraction {
        value = format!("{whole}.{digits}").parse().unwrap_or(value);
    }
    Ok((rest, value))
}

/// Whole seconds between the window start and an epoch time
pub fn convert_to_video_time(epoch_ms: f64, window_start_ms: f64) -> f64 {
    ((epoch_ms - window_start_ms) / 1000.0).floor()
}

/// Like [`convert_to_video_time`] but never zero, which some devices reject
pub fn convert_to_seekable_video_time(epoch_ms: f64, window_start_ms: f64) -> f64 {
    convert_to_video_time(epoch_ms, window_start_ms).max(0.1)
}

/// Offset into a sliding DVR window for a seek to `time`
///
/// `paused_at_ms` is the wall-clock time playback was paused by the app, or 0.
/// While paused the window keeps sliding, so the elapsed pause is subtracted.
pub fn calculate_sliding_window_seek_offset(
    time: f64,
    dvr_range_start: f64,
    time_correction: f64,
    paused_at_ms: u64,
    now_ms: u64,
) -> f64 {
    let relative = time + time_correction - dvr_range_start;
    if paused_at_ms == 0 {
        return relative;
    }
    relative - now_ms.saturating_sub(paused_at_ms) as f64 / 1000.0
}
