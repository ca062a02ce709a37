use regex::Regex;
use serde::{Deserialize, Serialize};
use std::sync::LazyLock;

/// Triad family of a chord.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Quality {
    Major,
    Minor,
    Diminished,
    HalfDiminished,
    Augmented,
    Sus2,
    Sus4,
    Power,
}

impl Quality {
    /// Human-readable name, as used in chord tables.
    pub fn label(&self) -> &'static str {
        match self {
            Self::Major => "major",
            Self::Minor => "minor",
            Self::Diminished => "diminished",
            Self::HalfDiminished => "half-diminished",
            Self::Augmented => "augmented",
            Self::Sus2 => "sus2",
            Self::Sus4 => "sus4",
            Self::Power => "power",
        }
    }
}

/// The sixth/seventh layer stacked on the triad.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Seventh {
    None,
    Sixth,
    /// Flat seventh: dominant on a major triad, m7 on a minor one.
    Flat,
    Major,
    Diminished,
}

/// A chord symbol split into its parts.
///
/// `extension` keeps everything after the quality verbatim, e.g. `13(#11)`
/// for `Cmaj13(#11)/E`, so the Advanced display level never loses detail.
#[derive(Debug, Clone, PartialEq)]
pub struct ChordSymbol {
    pub root: String,
    pub quality: Quality,
    pub seventh: Seventh,
    pub extension: String,
    pub bass: Option<String>,
}

static ROOT_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^([A-G])([#b♯♭]?)(.*)$").unwrap());

static BASS_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^(.*?)\s*/\s*([A-G][#b♯♭]?)$").unwrap());

static DEGREE_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^\(?(6|7|9|11|13)").unwrap());

/// Replace unicode accidentals with their ASCII spelling.
pub fn normalize_accidentals(s: &str) -> String {
    s.replace('♯', "#").replace('♭', "b")
}

impl ChordSymbol {
    /// Parse a chord symbol such as `F#m7b5`, `Bbmaj9/D` or `G7sus4`.
    ///
    /// Returns `None` when there is no recognizable root note (placeholders,
    /// "N.C.", free text). Unrecognized suffix text is kept in `extension`.
    pub fn parse(input: &str) -> Option<Self> {
        let text: String = normalize_accidentals(input.trim())
            .chars()
            .filter(|c| !c.is_whitespace())
            .collect();

        let (body, bass) = match BASS_RE.captures(&text) {
            Some(caps) => (caps[1].to_string(), Some(caps[2].to_string())),
            None => (text.clone(), None),
        };

        let caps = ROOT_RE.captures(&body)?;
        let root = format!("{}{}", &caps[1], &caps[2]);
        let suffix = caps[3].to_string();

        let (mut quality, mut major_seventh, rest) = split_quality(&suffix);

        // "sus" can appear after the degree: C7sus4, C9sus
        if matches!(quality, Quality::Major) {
            if rest.contains("sus2") {
                quality = Quality::Sus2;
            } else if rest.contains("sus") {
                quality = Quality::Sus4;
            }
        }

        let degree = DEGREE_RE
            .captures(rest)
            .and_then(|c| c[1].parse::<u32>().ok());
        let has_add = rest.starts_with("add") || rest.starts_with("(add");

        if rest.starts_with("maj") || rest.starts_with("(maj") || rest.starts_with('M') {
            major_seventh = true;
        }

        let mut seventh = match degree {
            _ if has_add => Seventh::None,
            Some(6) => Seventh::Sixth,
            Some(_) if major_seventh => Seventh::Major,
            Some(_) => Seventh::Flat,
            None if major_seventh => Seventh::Major,
            None => Seventh::None,
        };

        // m7b5 is the spelled-out half-diminished chord
        if quality == Quality::Minor
            && seventh == Seventh::Flat
            && (rest.contains("b5") || rest.contains("-5"))
        {
            quality = Quality::HalfDiminished;
        }
        match quality {
            Quality::HalfDiminished => seventh = Seventh::Flat,
            Quality::Diminished if seventh == Seventh::Flat => seventh = Seventh::Diminished,
            _ => {}
        }

        Some(ChordSymbol {
            root,
            quality,
            seventh,
            extension: rest.to_string(),
            bass,
        })
    }
}

/// Split the quality marker off the front of a chord suffix.
/// Returns (quality, whether a major seventh was marked, remainder).
fn split_quality(suffix: &str) -> (Quality, bool, &str) {
    const MINOR_MAJOR: &[&str] = &["mMaj", "m(maj", "minmaj", "minMaj", "mM", "-maj", "-Maj"];
    const MAJOR: &[&str] = &["maj", "Maj", "MA", "M", "Δ", "^"];
    const MINOR: &[&str] = &["min", "mi", "m", "-"];
    const DIMINISHED: &[&str] = &["dim", "°", "o"];
    const AUGMENTED: &[&str] = &["aug", "+"];

    for p in MINOR_MAJOR {
        if let Some(rest) = suffix.strip_prefix(p) {
            return (Quality::Minor, true, rest.trim_end_matches(')'));
        }
    }
    for p in MAJOR {
        if let Some(rest) = suffix.strip_prefix(p) {
            let seventh_marked = !rest.is_empty() || matches!(*p, "Δ" | "^");
            return (Quality::Major, seventh_marked, rest);
        }
    }
    for p in MINOR {
        if let Some(rest) = suffix.strip_prefix(p) {
            return (Quality::Minor, false, rest);
        }
    }
    for p in DIMINISHED {
        if let Some(rest) = suffix.strip_prefix(p) {
            return (Quality::Diminished, false, rest);
        }
    }
    if let Some(rest) = suffix.strip_prefix('ø') {
        return (Quality::HalfDiminished, false, rest);
    }
    for p in AUGMENTED {
        if let Some(rest) = suffix.strip_prefix(p) {
            return (Quality::Augmented, false, rest);
        }
    }
    if suffix == "5" || suffix == "(5)" {
        return (Quality::Power, false, "");
    }
    (Quality::Major, false, suffix)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(s: &str) -> ChordSymbol {
        ChordSymbol::parse(s).unwrap_or_else(|| panic!("failed to parse {s}"))
    }

    #[test]
    fn test_plain_triads() {
        let c = parse("C");
        assert_eq!(c.root, "C");
        assert_eq!(c.quality, Quality::Major);
        assert_eq!(c.seventh, Seventh::None);
        assert_eq!(c.bass, None);

        assert_eq!(parse("Am").quality, Quality::Minor);
        assert_eq!(parse("Bbmin").quality, Quality::Minor);
        assert_eq!(parse("F#dim").quality, Quality::Diminished);
        assert_eq!(parse("Eaug").quality, Quality::Augmented);
        assert_eq!(parse("E+").quality, Quality::Augmented);
        assert_eq!(parse("D5").quality, Quality::Power);
        assert_eq!(parse("Dsus2").quality, Quality::Sus2);
        assert_eq!(parse("Dsus4").quality, Quality::Sus4);
    }

    #[test]
    fn test_sevenths() {
        assert_eq!(parse("G7").seventh, Seventh::Flat);
        assert_eq!(parse("Cmaj7").seventh, Seventh::Major);
        assert_eq!(parse("CM7").seventh, Seventh::Major);
        assert_eq!(parse("CΔ").seventh, Seventh::Major);
        assert_eq!(parse("Dm7").seventh, Seventh::Flat);
        assert_eq!(parse("Am6").seventh, Seventh::Sixth);
        assert_eq!(parse("Bdim7").seventh, Seventh::Diminished);
        assert_eq!(parse("Cadd9").seventh, Seventh::None);
        assert_eq!(parse("Cmaj").seventh, Seventh::None);
    }

    #[test]
    fn test_half_diminished_spellings() {
        for s in ["Bm7b5", "Bø", "Bø7", "Bm7(b5)"] {
            let c = parse(s);
            assert_eq!(c.quality, Quality::HalfDiminished, "{s}");
            assert_eq!(c.seventh, Seventh::Flat, "{s}");
        }
    }

    #[test]
    fn test_minor_major_seventh() {
        for s in ["CmMaj7", "Cm(maj7)", "CminMaj7"] {
            let c = parse(s);
            assert_eq!(c.quality, Quality::Minor, "{s}");
            assert_eq!(c.seventh, Seventh::Major, "{s}");
        }
    }

    #[test]
    fn test_extensions_and_bass() {
        let c = parse("Cmaj13(#11)/E");
        assert_eq!(c.root, "C");
        assert_eq!(c.quality, Quality::Major);
        assert_eq!(c.seventh, Seventh::Major);
        assert_eq!(c.extension, "13(#11)");
        assert_eq!(c.bass.as_deref(), Some("E"));

        let c = parse("G7sus4");
        assert_eq!(c.quality, Quality::Sus4);
        assert_eq!(c.seventh, Seventh::Flat);

        let c = parse("F♯m9 / C♯");
        assert_eq!(c.root, "F#");
        assert_eq!(c.bass.as_deref(), Some("C#"));
        assert_eq!(c.extension, "9");
    }

    #[test]
    fn test_six_nine_is_not_a_slash_chord() {
        let c = parse("C6/9");
        assert_eq!(c.bass, None);
        assert_eq!(c.seventh, Seventh::Sixth);
    }

    #[test]
    fn test_no_root() {
        assert!(ChordSymbol::parse("N.C.").is_none());
        assert!(ChordSymbol::parse("none").is_none());
        assert!(ChordSymbol::parse("").is_none());
    }
}
