use serde::{Deserialize, Serialize};

use crate::chord::{normalize_accidentals, ChordSymbol, Quality, Seventh};
use crate::model::ChordEvent;

/// How much harmonic detail to show.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Complexity {
    /// Root and triad only.
    Basic,
    /// Sevenths and slash bass, no tensions.
    Intermediate,
    /// The symbol as the model wrote it.
    #[default]
    Advanced,
}

impl Complexity {
    pub fn label(&self) -> &'static str {
        match self {
            Self::Basic => "basic",
            Self::Intermediate => "intermediate",
            Self::Advanced => "advanced",
        }
    }
}

/// Format a chord event for display at the given level.
///
/// Falls back to the decomposed attributes when the symbol itself is empty.
pub fn format_chord(chord: &ChordEvent, level: Complexity) -> String {
    if !chord.symbol.trim().is_empty() {
        return format_symbol(&chord.symbol, level);
    }
    let Some(root) = chord.root.as_deref() else {
        return String::new();
    };
    let mut rebuilt = root.to_string();
    rebuilt.push_str(quality_marker(chord.quality.as_deref().unwrap_or("")));
    rebuilt.push_str(chord.extension.as_deref().unwrap_or(""));
    if let Some(bass) = &chord.bass {
        rebuilt.push('/');
        rebuilt.push_str(bass);
    }
    format_symbol(&rebuilt, level)
}

/// Format a raw chord symbol for display at the given level.
///
/// Idempotent: formatting the output again at the same level returns it
/// unchanged. Symbols without a recognizable root come back trimmed.
pub fn format_symbol(symbol: &str, level: Complexity) -> String {
    let trimmed = symbol.trim();
    if level == Complexity::Advanced {
        return normalize_accidentals(trimmed);
    }
    let Some(chord) = ChordSymbol::parse(trimmed) else {
        return trimmed.to_string();
    };

    match level {
        Complexity::Basic => format!("{}{}", chord.root, triad_suffix(chord.quality)),
        _ => {
            let mut out = format!("{}{}", chord.root, seventh_suffix(chord.quality, chord.seventh));
            if let Some(bass) = chord.bass {
                out.push('/');
                out.push_str(&bass);
            }
            out
        }
    }
}

/// Map a spelled-out quality ("minor", "half-diminished") to symbol form.
fn quality_marker(quality: &str) -> &str {
    match quality.trim().to_lowercase().as_str() {
        "major" | "maj" => "",
        "minor" | "min" => "m",
        "diminished" => "dim",
        "half-diminished" | "half diminished" => "ø",
        "augmented" => "aug",
        "power" => "5",
        _ => quality.trim(),
    }
}

fn triad_suffix(quality: Quality) -> &'static str {
    match quality {
        Quality::Major => "",
        Quality::Minor => "m",
        Quality::Diminished | Quality::HalfDiminished => "dim",
        Quality::Augmented => "aug",
        Quality::Sus2 => "sus2",
        Quality::Sus4 => "sus4",
        Quality::Power => "5",
    }
}

fn seventh_suffix(quality: Quality, seventh: Seventh) -> &'static str {
    use Seventh as S;
    match (quality, seventh) {
        (Quality::Major, S::None) => "",
        (Quality::Major, S::Sixth) => "6",
        (Quality::Major, S::Flat | S::Diminished) => "7",
        (Quality::Major, S::Major) => "maj7",

        (Quality::Minor, S::None) => "m",
        (Quality::Minor, S::Sixth) => "m6",
        (Quality::Minor, S::Flat | S::Diminished) => "m7",
        (Quality::Minor, S::Major) => "m(maj7)",

        (Quality::Diminished, S::Flat | S::Diminished) => "dim7",
        (Quality::Diminished, _) => "dim",
        (Quality::HalfDiminished, _) => "m7b5",

        (Quality::Augmented, S::Flat | S::Diminished) => "aug7",
        (Quality::Augmented, S::Major) => "aug(maj7)",
        (Quality::Augmented, _) => "aug",

        (Quality::Sus2, S::None) => "sus2",
        (Quality::Sus2, S::Sixth) => "6sus2",
        (Quality::Sus2, S::Flat | S::Diminished) => "7sus2",
        (Quality::Sus2, S::Major) => "maj7sus2",

        (Quality::Sus4, S::None) => "sus4",
        (Quality::Sus4, S::Sixth) => "6sus4",
        (Quality::Sus4, S::Flat | S::Diminished) => "7sus4",
        (Quality::Sus4, S::Major) => "maj7sus4",

        (Quality::Power, _) => "5",
    }
}
