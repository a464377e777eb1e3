//! JSON output writers
//!
//! The output documents use fixed-decimal formatting (9 digits for event
//! fields, 6 for tempo fields), so they are rendered with `format!` rather
//! than a serializer.

use std::fmt::Write as _;
use std::fs;
use std::path::Path;

use crate::error::{Result, ScoreError};
use crate::notes::NoteEvent;
use crate::tempo::TempoEstimate;

fn push_event(out: &mut String, event: &NoteEvent, trailing_comma: bool) {
    let duration = (event.end_time_seconds - event.start_time_seconds).max(0.0);
    let _ = write!(
        out,
        "    {{\"startTimeSeconds\":{:.9},\"durationSeconds\":{:.9},\"pitchMidi\":{},\"amplitude\":{:.9}}}",
        event.start_time_seconds, duration, event.pitch_midi, event.amplitude
    );
    if trailing_comma {
        out.push(',');
    }
    out.push('\n');
}

/// Render the notes-only document: `{"events": [...]}`.
pub fn events_json(events: &[NoteEvent]) -> String {
    let mut out = String::new();
    out.push_str("{\n  \"events\": [\n");
    for (i, event) in events.iter().enumerate() {
        push_event(&mut out, event, i + 1 < events.len());
    }
    out.push_str("  ]\n}\n");
    out
}

/// Render the combined document: `{"events": [...], "tempoBpm": ...,
/// "tempoMap": [...]}`.
pub fn combined_json(events: &[NoteEvent], tempo: &TempoEstimate) -> String {
    let mut out = String::new();
    out.push_str("{\n  \"events\": [\n");
    for (i, event) in events.iter().enumerate() {
        push_event(&mut out, event, i + 1 < events.len());
    }
    out.push_str("  ],\n");
    let _ = writeln!(out, "  \"tempoBpm\": {:.6},", tempo.bpm);
    out.push_str("  \"tempoMap\": [\n");
    for (i, point) in tempo.tempo_map.iter().enumerate() {
        let _ = write!(
            out,
            "    {{\"timeSeconds\":{:.6},\"bpm\":{:.6}}}",
            point.time_seconds, point.bpm
        );
        if i + 1 < tempo.tempo_map.len() {
            out.push(',');
        }
        out.push('\n');
    }
    out.push_str("  ]\n}\n");
    out
}

/// Render the tempo CLI's single-line document.
pub fn tempo_json_line(estimate: &TempoEstimate, interpolate: bool, local_tempo: bool) -> String {
    let mut out = String::new();
    let _ = write!(
        out,
        "{{\"bpm\":{:.6},\"interpolate\":{}",
        estimate.bpm, interpolate
    );
    if local_tempo {
        out.push_str(",\"tempo_map\":[");
        for (i, point) in estimate.tempo_map.iter().enumerate() {
            if i > 0 {
                out.push(',');
            }
            let _ = write!(
                out,
                "{{\"time\":{:.6},\"bpm\":{:.6}}}",
                point.time_seconds, point.bpm
            );
        }
        out.push(']');
    }
    out.push('}');
    out
}

pub fn write_file<P: AsRef<Path>>(path: P, contents: &str) -> Result<()> {
    let path = path.as_ref();
    fs::write(path, contents).map_err(|e| {
        ScoreError::Io(format!(
            "Could not write output JSON {}: {}",
            path.display(),
            e
        ))
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tempo::TempoPoint;

    fn sample_event() -> NoteEvent {
        NoteEvent {
            start_time_seconds: 0.5,
            end_time_seconds: 1.25,
            pitch_midi: 69,
            amplitude: 0.75,
            pitch_bends: None,
        }
    }

    #[test]
    fn events_use_nine_decimals() {
        let json = events_json(&[sample_event()]);
        assert!(json.contains("\"startTimeSeconds\":0.500000000"));
        assert!(json.contains("\"durationSeconds\":0.750000000"));
        assert!(json.contains("\"pitchMidi\":69"));
        assert!(json.contains("\"amplitude\":0.750000000"));
        // the document must parse as JSON
        let parsed: serde_json::Value = serde_json::from_str(&json).unwrap();
        assert_eq!(parsed["events"].as_array().unwrap().len(), 1);
    }

    #[test]
    fn empty_event_list_is_valid_json() {
        let parsed: serde_json::Value = serde_json::from_str(&events_json(&[])).unwrap();
        assert_eq!(parsed["events"].as_array().unwrap().len(), 0);
    }

    #[test]
    fn combined_document_uses_six_decimal_tempo() {
        let tempo = TempoEstimate {
            bpm: 120.5,
            tempo_map: vec![
                TempoPoint {
                    time_seconds: 0.0,
                    bpm: 120.5,
                },
                TempoPoint {
                    time_seconds: 1.486077,
                    bpm: 121.25,
                },
            ],
        };
        let json = combined_json(&[sample_event()], &tempo);
        assert!(json.contains("\"tempoBpm\": 120.500000"));
        assert!(json.contains("{\"timeSeconds\":1.486077,\"bpm\":121.250000}"));
        let parsed: serde_json::Value = serde_json::from_str(&json).unwrap();
        assert_eq!(parsed["tempoMap"].as_array().unwrap().len(), 2);
    }

    #[test]
    fn tempo_line_omits_map_unless_requested() {
        let estimate = TempoEstimate {
            bpm: 96.0,
            tempo_map: vec![TempoPoint {
                time_seconds: 0.0,
                bpm: 96.0,
            }],
        };
        let bare = tempo_json_line(&estimate, true, false);
        assert_eq!(bare, "{\"bpm\":96.000000,\"interpolate\":true}");

        let with_map = tempo_json_line(&estimate, false, true);
        assert!(with_map.contains("\"tempo_map\":[{\"time\":0.000000,\"bpm\":96.000000}]"));
        assert!(!with_map.contains('\n'));
    }
}
