//! Raw frame decoding.
//!
//! Physical scales disagree wildly on wire format: some stream ASCII lines
//! with or without unit markers, some push fixed-point integers, some push
//! IEEE floats, and several echo their own model code between readings.
//! Decoding is an ordered fallback chain; the first interpretation that
//! yields a plausible value wins, and anything unparseable is dropped
//! without interrupting the stream.

use std::sync::OnceLock;

use log::{debug, trace};
use regex::Regex;

use crate::core::bluetooth::types::{FrameSource, RawFrame, WeightReading};

/// Model codes like `xh2507024006`: a short alpha prefix followed by a long
/// digit run and nothing else. Not a reading.
fn self_id_pattern() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"^[A-Za-z]{1,4}\d{6,}$").unwrap())
}

/// A number behind an explicit weight marker (`W=`, `Weight:`), preferred
/// over a bare number when both appear in a frame.
fn marked_number_pattern() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"(?i)w(?:eight)?\s*[:=]\s*(\d+(?:[.,]\d+)?)").unwrap())
}

fn number_pattern() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"(\d+(?:[.,]\d+)?)").unwrap())
}

/// Decodes a raw payload into a numeric weight, or `None` if the frame
/// carries no plausible reading. Never panics.
pub fn parse(raw: &[u8], source: FrameSource) -> Option<f64> {
    if raw.is_empty() {
        trace!("[{}] empty frame", source);
        return None;
    }

    if let Ok(text) = std::str::from_utf8(raw) {
        let trimmed = text.trim();
        if self_id_pattern().is_match(trimmed) {
            debug!("[{}] skipping device self-identification frame {:?}", source, trimmed);
            return None;
        }
        if let Some(value) = parse_text(text) {
            trace!("[{}] text frame {:?} -> {}", source, trimmed, value);
            return Some(value);
        }
    }

    if raw.len() >= 2 {
        let raw_value = u16::from_le_bytes([raw[0], raw[1]]);
        // Hundredths-of-a-unit fixed point; zero and out-of-range values are
        // housekeeping, not readings
        if raw_value > 0 && (raw_value as u32) < 100_000 {
            let value = raw_value as f64 / 100.0;
            trace!("[{}] u16 frame {:?} -> {}", source, &raw[..2], value);
            return Some(value);
        }
    }

    if raw.len() >= 4 {
        let value = f32::from_le_bytes([raw[0], raw[1], raw[2], raw[3]]);
        if value.is_finite() && (-1000.0..=100_000.0).contains(&value) {
            trace!("[{}] f32 frame -> {}", source, value);
            return Some(value as f64);
        }
    }

    debug!("[{}] no decoding matched frame {:?}", source, raw);
    None
}

/// Convenience wrapper turning a frame into a display-ready reading.
pub fn parse_frame(frame: &RawFrame) -> Option<WeightReading> {
    parse(&frame.payload, frame.source).map(WeightReading::new)
}

fn parse_text(text: &str) -> Option<f64> {
    let captured = marked_number_pattern()
        .captures(text)
        .or_else(|| number_pattern().captures(text))?;
    let normalized = captured.get(1)?.as_str().replace(',', ".");
    normalized.parse::<f64>().ok()
}
