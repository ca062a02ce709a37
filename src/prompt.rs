use crate::input::AudioInput;
use crate::model::{format_timestamp, AudioMetadata};

/// Instructions sent alongside the audio.
#[derive(Debug, Clone, PartialEq)]
pub struct Prompt {
    pub system: String,
    pub user: String,
    /// Ask the endpoint for `application/json` output.
    pub json_mode: bool,
}

const ROLE: &str = "You are an expert music theorist and session musician with perfect pitch. \
You transcribe the harmony of recordings precisely, the way a professional would write a lead sheet.";

const HEURISTICS: &str = "\
- Anchor pitch to A=440Hz. Do not transpose.
- Decide the mode from the evidence. Do not default to Major; check the relative minor and modal centers.
- Write full chord symbols with extensions and alterations (e.g. Cmaj13(#11), G7(b9), F#m7b5).
- Use slash notation for inversions and pedal bass (e.g. C/E).
- Chord times must be in seconds, non-decreasing, and inside the length of the audio.
- Report each chord change once; do not repeat a chord that continues.
- If something is not present, omit the field instead of writing \"none\".";

const SCHEMA: &str = r##"Respond with a single JSON object and nothing else:
{
  "key": "E Minor",
  "timeSignature": "4/4",
  "bpm": 92,
  "modulations": [{"from": "E Minor", "to": "G Major", "time": 64.0}],
  "complexity": "Intermediate",
  "summary": "One paragraph on the harmonic language of the piece.",
  "chords": [
    {"chord": "Em9", "root": "E", "quality": "minor", "extension": "9", "bass": null,
     "start": 0.0, "duration": 2.6, "confidence": 0.92}
  ],
  "sections": [{"name": "Intro", "start": 0.0, "end": 10.4, "color": "#6366f1"}]
}"##;

/// Build the prompt for one analysis request.
pub fn build_prompt(input: &AudioInput, metadata: &AudioMetadata, json_mode: bool) -> Prompt {
    let system = format!("{ROLE}\n\nRules:\n{HEURISTICS}");

    let mut user = String::new();
    match input {
        AudioInput::Inline { .. } => {
            user.push_str("Analyze the harmony of the attached recording");
            if !metadata.file_name.is_empty() {
                user.push_str(&format!(" (\"{}\")", metadata.file_name));
            }
            user.push_str(".\n");
        }
        AudioInput::Url(url) => {
            user.push_str(&format!("Analyze the harmony of the recording at this link: {url}\n"));
            user.push_str("If you cannot access it, base the analysis on the best-known version of the song.\n");
        }
    }
    if metadata.duration > 0.0 {
        user.push_str(&format!(
            "The audio is {} long ({:.1} seconds). Every time must lie between 0 and {:.1}.\n",
            format_timestamp(metadata.duration),
            metadata.duration,
            metadata.duration
        ));
    }
    user.push('\n');
    user.push_str(SCHEMA);

    Prompt {
        system,
        user,
        json_mode,
    }
}
