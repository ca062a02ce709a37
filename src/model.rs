//! Analysis data model and the lenient conversion from raw model JSON.
//!
//! The canonical chord timing is an interval (`start` + `duration`, seconds).
//! Responses that only carry a display `timestamp` are converted on the way
//! in; `ChordEvent::timestamp()` re-derives the display form.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use thiserror::Error;

use crate::chord::ChordSymbol;
use crate::extract::{extract_json, ExtractError};

#[derive(Error, Debug)]
pub enum NormalizeError {
    #[error("Expected a JSON object at the top level of the analysis")]
    NotAnObject,
}

#[derive(Error, Debug)]
pub enum DocumentError {
    #[error(transparent)]
    Extract(#[from] ExtractError),
    #[error(transparent)]
    Normalize(#[from] NormalizeError),
}

/// One chord over a time interval.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChordEvent {
    pub symbol: String,
    pub root: Option<String>,
    pub quality: Option<String>,
    pub extension: Option<String>,
    pub bass: Option<String>,
    /// Model confidence in [0, 1], when reported.
    pub confidence: Option<f64>,
    pub start: f64,
    pub duration: f64,
}

impl ChordEvent {
    pub fn end(&self) -> f64 {
        self.start + self.duration
    }

    /// Half-open interval test: `[start, end)`.
    pub fn contains(&self, t: f64) -> bool {
        t >= self.start && t < self.end()
    }

    /// Legacy display form of the start time.
    pub fn timestamp(&self) -> String {
        format_timestamp(self.start)
    }
}

/// A named time range of the song.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Section {
    pub name: String,
    pub start: f64,
    pub end: f64,
    pub color: String,
}

impl Section {
    pub fn contains(&self, t: f64) -> bool {
        t >= self.start && t < self.end
    }
}

/// The complete result of one analysis. Replaced wholesale, never edited.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SongAnalysis {
    pub key: String,
    pub time_signature: String,
    pub bpm: Option<f64>,
    pub modulations: Vec<String>,
    pub complexity: Option<String>,
    pub summary: String,
    pub chords: Vec<ChordEvent>,
    pub sections: Vec<Section>,
}

impl SongAnalysis {
    /// Beats per bar from the time signature numerator (4 when unreadable).
    pub fn beats_per_bar(&self) -> u32 {
        self.time_signature
            .split('/')
            .next()
            .and_then(|n| n.trim().parse::<u32>().ok())
            .filter(|&n| n > 0)
            .unwrap_or(4)
    }

    /// End of the last chord or section, whichever is later.
    pub fn span(&self) -> f64 {
        let chords = self.chords.last().map(|c| c.end()).unwrap_or(0.0);
        let sections = self.sections.iter().map(|s| s.end).fold(0.0, f64::max);
        chords.max(sections)
    }
}

/// What we know about the audio being analyzed.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AudioMetadata {
    pub file_name: String,
    pub mime_type: String,
    /// Seconds; 0.0 when the duration could not be determined.
    pub duration: f64,
    pub size_bytes: u64,
}

/// An analysis saved with `analyze --json`, read back by the other commands.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AnalysisDocument {
    pub metadata: AudioMetadata,
    pub analysis: SongAnalysis,
}

impl AnalysisDocument {
    /// Read a saved document, or failing that, a raw model response.
    pub fn from_text(text: &str, name: &str) -> Result<Self, DocumentError> {
        if let Ok(doc) = serde_json::from_str::<AnalysisDocument>(text) {
            return Ok(doc);
        }
        let value = extract_json(text)?;
        Ok(Self {
            metadata: AudioMetadata {
                file_name: name.to_string(),
                mime_type: String::new(),
                duration: 0.0,
                size_bytes: 0,
            },
            analysis: SongAnalysis::from_value(&value, 0.0)?,
        })
    }

    /// Playback length: the audio duration, else the end of the analysis.
    pub fn duration(&self) -> f64 {
        if self.metadata.duration > 0.0 {
            self.metadata.duration
        } else {
            self.analysis.span()
        }
    }
}

/// Section colors, cycled in order when the model does not supply one.
pub const SECTION_PALETTE: &[&str] = &[
    "#6366f1", "#ec4899", "#14b8a6", "#f59e0b", "#8b5cf6", "#ef4444", "#22c55e", "#0ea5e9",
];

/// Chord length used for the last chord when the audio duration is unknown
/// and there is no tempo either.
const FALLBACK_CHORD_SECS: f64 = 2.0;

/// Format seconds as `m:ss` (or `m:ss.s` when there is a fractional part).
pub fn format_timestamp(secs: f64) -> String {
    let secs = secs.max(0.0);
    let tenths = (secs * 10.0).round() as u64;
    let minutes = tenths / 600;
    let rem = tenths % 600;
    if rem % 10 == 0 {
        format!("{}:{:02}", minutes, rem / 10)
    } else {
        format!("{}:{:02}.{}", minutes, rem / 10, rem % 10)
    }
}

/// Parse `83.5`, `"83.5s"`, `"1:23"`, `"01:23.5"` or `"1:02:03"` into seconds.
pub fn parse_timestamp(raw: &str) -> Option<f64> {
    let s = raw.trim().trim_end_matches(['s', 'S']).trim();
    if s.is_empty() || is_placeholder(s) {
        return None;
    }
    let mut total = 0.0;
    for part in s.split(':') {
        let v: f64 = part.trim().parse().ok()?;
        if !v.is_finite() || v < 0.0 {
            return None;
        }
        total = total * 60.0 + v;
    }
    Some(total)
}

/// Model stand-ins for "no value".
pub fn is_placeholder(s: &str) -> bool {
    matches!(
        s.trim().to_lowercase().as_str(),
        "" | "none" | "null" | "n/a" | "na" | "-" | "--" | "undefined" | "nan"
    )
}

fn field<'a>(obj: &'a Map<String, Value>, names: &[&str]) -> Option<&'a Value> {
    names
        .iter()
        .find_map(|n| obj.get(*n))
        .filter(|v| !v.is_null())
}

fn text_field(obj: &Map<String, Value>, names: &[&str]) -> Option<String> {
    match field(obj, names)? {
        Value::String(s) if !is_placeholder(s) => Some(s.trim().to_string()),
        Value::Number(n) => Some(n.to_string()),
        _ => None,
    }
}

/// Numbers, numeric strings (`"120 BPM"`), or timestamps.
fn time_field(obj: &Map<String, Value>, names: &[&str]) -> Option<f64> {
    match field(obj, names)? {
        Value::Number(n) => n.as_f64().filter(|v| v.is_finite()),
        Value::String(s) => parse_timestamp(s).or_else(|| leading_number(s)),
        _ => None,
    }
}

fn leading_number(s: &str) -> Option<f64> {
    let s = s.trim();
    let end = s
        .char_indices()
        .find(|(_, c)| !(c.is_ascii_digit() || *c == '.'))
        .map(|(i, _)| i)
        .unwrap_or(s.len());
    s[..end].parse().ok()
}

fn list_field<'a>(obj: &'a Map<String, Value>, names: &[&str]) -> &'a [Value] {
    match field(obj, names) {
        Some(Value::Array(items)) => items.as_slice(),
        _ => &[],
    }
}

/// A chord as read from the response, before intervals are resolved.
struct RawChord {
    event: ChordEvent,
    start: Option<f64>,
    duration: Option<f64>,
    end: Option<f64>,
}

fn raw_chord(value: &Value) -> Option<RawChord> {
    let obj = match value {
        Value::Object(obj) => obj,
        _ => return None,
    };

    let symbol = text_field(obj, &["chord", "symbol", "name", "label"]).unwrap_or_default();
    let parsed = ChordSymbol::parse(&symbol);
    let root = text_field(obj, &["root", "rootNote", "root_note"])
        .or_else(|| parsed.as_ref().map(|p| p.root.clone()));
    if symbol.is_empty() && root.is_none() {
        return None;
    }

    let quality = text_field(obj, &["quality", "type"])
        .or_else(|| parsed.as_ref().map(|p| p.quality.label().to_string()));
    let extension = text_field(obj, &["extension", "extensions"]).or_else(|| {
        parsed
            .as_ref()
            .map(|p| p.extension.clone())
            .filter(|e| !e.is_empty())
    });
    let bass = text_field(obj, &["bass", "bassNote", "bass_note", "inversion"])
        .or_else(|| parsed.as_ref().and_then(|p| p.bass.clone()));

    let confidence = match field(obj, &["confidence", "score"]) {
        Some(Value::Number(n)) => n.as_f64(),
        Some(Value::String(s)) => leading_number(s.trim_end_matches('%')),
        _ => None,
    }
    .map(|c| if c > 1.0 { c / 100.0 } else { c })
    .map(|c| c.clamp(0.0, 1.0));

    Some(RawChord {
        event: ChordEvent {
            symbol,
            root,
            quality,
            extension,
            bass,
            confidence,
            start: 0.0,
            duration: 0.0,
        },
        start: time_field(obj, &["start", "seconds", "startTime", "start_time", "time", "timestamp"]),
        duration: time_field(obj, &["duration", "length", "durationSeconds"]),
        end: time_field(obj, &["end", "endTime", "end_time"]),
    })
}

fn modulation_text(value: &Value) -> Option<String> {
    match value {
        Value::String(s) if !is_placeholder(s) => Some(s.trim().to_string()),
        Value::Object(obj) => {
            let to = text_field(obj, &["toKey", "to", "key", "newKey", "to_key"])?;
            let mut text = match text_field(obj, &["fromKey", "from", "from_key"]) {
                Some(from) => format!("{from} → {to}"),
                None => format!("→ {to}"),
            };
            if let Some(at) = time_field(obj, &["time", "start", "timestamp", "at"]) {
                text.push_str(&format!(" at {}", format_timestamp(at)));
            }
            Some(text)
        }
        _ => None,
    }
}

impl SongAnalysis {
    /// Build an analysis from whatever JSON object the model produced.
    ///
    /// `duration` is the audio length in seconds (0.0 if unknown); times are
    /// clamped into it, and the final chord runs to it.
    pub fn from_value(value: &Value, duration: f64) -> Result<SongAnalysis, NormalizeError> {
        let mut obj = value.as_object().ok_or(NormalizeError::NotAnObject)?;

        // Some responses wrap everything in {"analysis": {...}}
        if field(obj, &["chords", "progression", "key"]).is_none() {
            if let Some(Value::Object(inner)) = field(obj, &["analysis", "result", "song"]) {
                obj = inner;
            }
        }

        let bpm = time_field(obj, &["bpm", "tempo", "tempoBpm", "tempo_bpm"]).filter(|b| *b > 0.0);
        let time_signature = text_field(obj, &["timeSignature", "time_signature", "meter"])
            .unwrap_or_else(|| "4/4".to_string());

        let mut analysis = SongAnalysis {
            key: text_field(obj, &["key", "detectedKey", "globalKey", "tonality"])
                .unwrap_or_else(|| "Unknown".to_string()),
            time_signature,
            bpm,
            modulations: list_field(obj, &["modulations", "keyChanges", "key_changes"])
                .iter()
                .filter_map(modulation_text)
                .collect(),
            complexity: text_field(obj, &["complexity", "complexityRating", "difficulty"]),
            summary: text_field(obj, &["summary", "description", "analysisSummary"])
                .unwrap_or_default(),
            chords: Vec::new(),
            sections: Vec::new(),
        };

        let raw: Vec<RawChord> = list_field(obj, &["chords", "progression", "chordProgression"])
            .iter()
            .filter_map(raw_chord)
            .collect();
        analysis.chords = resolve_chord_intervals(raw, duration, analysis.bar_length());
        analysis.sections = resolve_sections(
            list_field(obj, &["sections", "structure", "form"]),
            duration.max(analysis.chords.last().map(|c| c.end()).unwrap_or(0.0)),
        );

        log::debug!(
            "Normalized analysis: key={}, {} chords, {} sections",
            analysis.key,
            analysis.chords.len(),
            analysis.sections.len()
        );
        Ok(analysis)
    }

    fn bar_length(&self) -> Option<f64> {
        self.bpm.map(|bpm| self.beats_per_bar() as f64 * 60.0 / bpm)
    }
}

/// Turn raw chords into sorted, non-overlapping intervals inside the audio.
fn resolve_chord_intervals(raw: Vec<RawChord>, duration: f64, bar: Option<f64>) -> Vec<ChordEvent> {
    let total = raw.len();
    let mut timed: Vec<RawChord> = raw
        .into_iter()
        .filter_map(|mut r| {
            let start = r.start?.max(0.0);
            r.start = Some(start);
            (duration <= 0.0 || start < duration).then_some(r)
        })
        .collect();
    if timed.len() < total {
        log::warn!(
            "Dropped {} chords with missing or out-of-range start times",
            total - timed.len()
        );
    }

    timed.sort_by(|a, b| a.start.unwrap_or(0.0).total_cmp(&b.start.unwrap_or(0.0)));

    let starts: Vec<f64> = timed.iter().map(|r| r.start.unwrap_or(0.0)).collect();
    let mut events = Vec::with_capacity(timed.len());

    for (i, r) in timed.into_iter().enumerate() {
        let start = starts[i];
        let next = starts.get(i + 1).copied();

        let stated = r
            .duration
            .or_else(|| r.end.map(|e| e - start))
            .filter(|d| *d > 0.0);
        let mut end = match (stated, next) {
            (Some(d), _) => start + d,
            (None, Some(n)) => n,
            (None, None) if duration > 0.0 => duration,
            (None, None) => start + bar.unwrap_or(FALLBACK_CHORD_SECS),
        };
        if let Some(n) = next {
            end = end.min(n);
        }
        if duration > 0.0 {
            end = end.min(duration);
        }
        if end <= start {
            continue;
        }

        let mut event = r.event;
        event.start = start;
        event.duration = end - start;
        events.push(event);
    }
    events
}

fn resolve_sections(items: &[Value], end_of_song: f64) -> Vec<Section> {
    struct RawSection {
        name: String,
        start: f64,
        end: Option<f64>,
        color: Option<String>,
    }

    let mut raw: Vec<RawSection> = items
        .iter()
        .filter_map(|v| {
            let obj = v.as_object()?;
            Some(RawSection {
                name: text_field(obj, &["name", "label", "section", "type"])
                    .unwrap_or_else(|| "Section".to_string()),
                start: time_field(obj, &["start", "startTime", "start_time", "seconds", "timestamp"])?
                    .max(0.0),
                end: time_field(obj, &["end", "endTime", "end_time"]),
                color: text_field(obj, &["color", "colour"]),
            })
        })
        .filter(|s| end_of_song <= 0.0 || s.start < end_of_song)
        .collect();
    raw.sort_by(|a, b| a.start.total_cmp(&b.start));

    let starts: Vec<f64> = raw.iter().map(|s| s.start).collect();
    raw.into_iter()
        .enumerate()
        .filter_map(|(i, s)| {
            let next = starts.get(i + 1).copied();
            let mut end = s.end.filter(|e| *e > s.start).or(next).unwrap_or(end_of_song);
            if let Some(n) = next {
                end = end.min(n);
            }
            if end_of_song > 0.0 {
                end = end.min(end_of_song);
            }
            (end > s.start).then(|| Section {
                color: s
                    .color
                    .unwrap_or_else(|| SECTION_PALETTE[i % SECTION_PALETTE.len()].to_string()),
                name: s.name,
                start: s.start,
                end,
            })
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_timestamps() {
        assert_eq!(parse_timestamp("1:23"), Some(83.0));
        assert_eq!(parse_timestamp("01:23.5"), Some(83.5));
        assert_eq!(parse_timestamp("1:02:03"), Some(3723.0));
        assert_eq!(parse_timestamp("12.5s"), Some(12.5));
        assert_eq!(parse_timestamp("none"), None);
        assert_eq!(parse_timestamp("soon"), None);
        assert_eq!(format_timestamp(83.0), "1:23");
        assert_eq!(format_timestamp(83.5), "1:23.5");
        assert_eq!(format_timestamp(5.0), "0:05");
    }

    #[test]
    fn test_interval_form() {
        let v = json!({
            "key": "C Major",
            "bpm": 120,
            "timeSignature": "3/4",
            "chords": [
                {"chord": "C", "start": 0.0, "duration": 2.0, "confidence": 0.9},
                {"chord": "G/B", "start": 2.0, "duration": 2.0},
                {"chord": "Am7", "start": 4.0, "duration": 4.0}
            ]
        });
        let a = SongAnalysis::from_value(&v, 8.0).unwrap();
        assert_eq!(a.key, "C Major");
        assert_eq!(a.bpm, Some(120.0));
        assert_eq!(a.beats_per_bar(), 3);
        assert_eq!(a.chords.len(), 3);
        assert_eq!(a.chords[1].bass.as_deref(), Some("B"));
        assert_eq!(a.chords[2].quality.as_deref(), Some("minor"));
        assert_eq!(a.chords[2].extension.as_deref(), Some("7"));
        assert_eq!(a.chords[0].confidence, Some(0.9));
        assert_eq!(a.chords[2].end(), 8.0);
    }

    #[test]
    fn test_legacy_timestamp_form() {
        let v = json!({
            "key": "A minor",
            "chords": [
                {"chord": "Am", "timestamp": "0:00"},
                {"chord": "F", "timestamp": "0:04"},
                {"chord": "C", "timestamp": "0:08.5"}
            ]
        });
        let a = SongAnalysis::from_value(&v, 12.0).unwrap();
        let spans: Vec<(f64, f64)> = a.chords.iter().map(|c| (c.start, c.duration)).collect();
        assert_eq!(spans, vec![(0.0, 4.0), (4.0, 4.5), (8.5, 3.5)]);
        assert_eq!(a.chords[2].timestamp(), "0:08.5");
    }

    #[test]
    fn test_placeholders_unsorted_and_out_of_range() {
        let v = json!({
            "key": "none",
            "bpm": "96 BPM",
            "chords": [
                {"chord": "D", "seconds": 6.0},
                {"chord": "G", "seconds": "none"},
                {"chord": "A", "seconds": 2.0, "duration": 10.0},
                {"chord": "E", "seconds": 40.0},
                {"chord": "none"}
            ]
        });
        let a = SongAnalysis::from_value(&v, 10.0).unwrap();
        assert_eq!(a.key, "Unknown");
        assert_eq!(a.bpm, Some(96.0));
        let got: Vec<(&str, f64, f64)> = a
            .chords
            .iter()
            .map(|c| (c.symbol.as_str(), c.start, c.end()))
            .collect();
        // A's stated duration is cut at D; D runs to the end of the audio
        assert_eq!(got, vec![("A", 2.0, 6.0), ("D", 6.0, 10.0)]);
    }

    #[test]
    fn test_last_chord_without_duration_uses_bar() {
        let v = json!({"bpm": 60, "chords": [{"chord": "C", "start": 0}]});
        let a = SongAnalysis::from_value(&v, 0.0).unwrap();
        assert_eq!(a.chords[0].duration, 4.0);
    }

    #[test]
    fn test_sections() {
        let v = json!({
            "chords": [{"chord": "C", "start": 0, "duration": 30}],
            "sections": [
                {"name": "Chorus", "start": "0:10", "end": "0:30", "color": "#ff0000"},
                {"label": "Intro", "startTime": 0}
            ]
        });
        let a = SongAnalysis::from_value(&v, 0.0).unwrap();
        assert_eq!(a.sections.len(), 2);
        assert_eq!(a.sections[0].name, "Intro");
        assert_eq!(a.sections[0].end, 10.0);
        assert_eq!(a.sections[0].color, SECTION_PALETTE[0]);
        assert_eq!(a.sections[1].color, "#ff0000");
        assert_eq!(a.span(), 30.0);
    }

    #[test]
    fn test_modulations_and_wrapped_object() {
        let v = json!({
            "analysis": {
                "key": "E Major",
                "modulations": ["to C# minor in the bridge", {"from": "E", "to": "F#", "time": 95}],
                "complexity": 7,
                "chords": []
            }
        });
        let a = SongAnalysis::from_value(&v, 0.0).unwrap();
        assert_eq!(a.key, "E Major");
        assert_eq!(a.modulations, vec!["to C# minor in the bridge", "E → F# at 1:35"]);
        assert_eq!(a.complexity.as_deref(), Some("7"));
        assert!(a.chords.is_empty());
    }

    #[test]
    fn test_not_an_object() {
        assert!(SongAnalysis::from_value(&json!([1, 2]), 0.0).is_err());
    }

    #[test]
    fn test_confidence_percent() {
        let v = json!({"chords": [{"chord": "C", "start": 0, "confidence": "85%"}]});
        let a = SongAnalysis::from_value(&v, 4.0).unwrap();
        assert_eq!(a.chords[0].confidence, Some(0.85));
    }

    #[test]
    fn test_document_from_saved_or_raw_text() {
        let raw = "Here you go:\n```json\n{\"key\": \"G Major\", \"bpm\": 90, \"chords\": [{\"chord\": \"G\", \"start\": 0, \"duration\": 4}]}\n```";
        let doc = AnalysisDocument::from_text(raw, "take2").unwrap();
        assert_eq!(doc.metadata.file_name, "take2");
        assert_eq!(doc.analysis.key, "G Major");
        assert_eq!(doc.duration(), 4.0);

        let saved = serde_json::to_string(&doc).unwrap();
        assert_eq!(AnalysisDocument::from_text(&saved, "other").unwrap(), doc);

        assert!(matches!(
            AnalysisDocument::from_text("nothing", "x"),
            Err(DocumentError::Extract(_))
        ));
    }
}
