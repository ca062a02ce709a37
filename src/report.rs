use std::fmt::Write as _;
use std::path::Path;

use crate::model::{format_timestamp, AudioMetadata, SongAnalysis};
use crate::simplify::{format_chord, Complexity};

const STYLE: &str = "\
body{font-family:system-ui,-apple-system,sans-serif;max-width:920px;margin:2rem auto;padding:0 1rem;color:#1f2937;background:#fafafa}
h1{margin-bottom:.25rem}h2{margin-top:2rem;border-bottom:1px solid #e5e7eb;padding-bottom:.25rem}
.meta{color:#6b7280;font-size:.9rem}
.facts{display:flex;flex-wrap:wrap;gap:.75rem;margin:1rem 0}
.fact{background:#fff;border:1px solid #e5e7eb;border-radius:8px;padding:.5rem .9rem}
.fact b{display:block;font-size:.75rem;color:#6b7280;text-transform:uppercase}
.bar{display:flex;height:28px;border-radius:6px;overflow:hidden;margin:.5rem 0}
.bar div{color:#fff;font-size:.75rem;padding:6px;white-space:nowrap;overflow:hidden}
table{border-collapse:collapse;width:100%}
td,th{text-align:left;padding:.35rem .6rem;border-bottom:1px solid #f0f0f0}
td.chord{font-weight:600;font-size:1.05rem}
.conf{color:#9ca3af}
footer{margin-top:3rem;color:#9ca3af;font-size:.8rem}";

/// Escape text for HTML element and attribute content.
pub fn escape(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    for c in text.chars() {
        match c {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '"' => out.push_str("&quot;"),
            '\'' => out.push_str("&#39;"),
            _ => out.push(c),
        }
    }
    out
}

/// Only `#rgb` / `#rrggbb` colors reach the style attribute.
fn safe_color(color: &str) -> &str {
    let hex = color.strip_prefix('#').unwrap_or("");
    if matches!(hex.len(), 3 | 6) && hex.chars().all(|c| c.is_ascii_hexdigit()) {
        color
    } else {
        "#6b7280"
    }
}

fn fact(html: &mut String, label: &str, value: &str) {
    if !value.is_empty() {
        let _ = write!(html, "<div class=\"fact\"><b>{}</b>{}</div>", label, escape(value));
    }
}

/// Render a self-contained HTML report. The chord table uses `level`.
pub fn render_html(analysis: &SongAnalysis, metadata: &AudioMetadata, level: Complexity) -> String {
    let title = if metadata.file_name.is_empty() {
        "Harmonic analysis".to_string()
    } else {
        metadata.file_name.clone()
    };
    let mut html = String::new();
    let _ = write!(
        html,
        "<!DOCTYPE html>\n<html lang=\"en\">\n<head>\n<meta charset=\"utf-8\">\n<title>{}</title>\n<style>\n{}\n</style>\n</head>\n<body>\n",
        escape(&title),
        STYLE
    );
    let _ = writeln!(html, "<h1>{}</h1>", escape(&title));
    let _ = writeln!(
        html,
        "<p class=\"meta\">Generated {} &middot; chords shown at {} level</p>",
        chrono::Local::now().format("%Y-%m-%d %H:%M"),
        level.label()
    );

    html.push_str("<div class=\"facts\">");
    fact(&mut html, "Key", &analysis.key);
    fact(&mut html, "Time", &analysis.time_signature);
    if let Some(bpm) = analysis.bpm {
        fact(&mut html, "Tempo", &format!("{bpm:.0} BPM"));
    }
    fact(&mut html, "Complexity", analysis.complexity.as_deref().unwrap_or(""));
    if metadata.duration > 0.0 {
        fact(&mut html, "Length", &format_timestamp(metadata.duration));
    }
    html.push_str("</div>\n");

    if !analysis.summary.is_empty() {
        let _ = writeln!(html, "<h2>Summary</h2>\n<p>{}</p>", escape(&analysis.summary));
    }

    if !analysis.modulations.is_empty() {
        html.push_str("<h2>Modulations</h2>\n<ul>\n");
        for m in &analysis.modulations {
            let _ = writeln!(html, "<li>{}</li>", escape(m));
        }
        html.push_str("</ul>\n");
    }

    if !analysis.sections.is_empty() {
        html.push_str("<h2>Structure</h2>\n");
        let total = analysis.span().max(f64::EPSILON);
        html.push_str("<div class=\"bar\">");
        for s in &analysis.sections {
            let pct = ((s.end - s.start) / total * 100.0).max(0.0);
            let _ = write!(
                html,
                "<div style=\"width:{:.2}%;background:{}\" title=\"{}\">{}</div>",
                pct,
                safe_color(&s.color),
                escape(&s.name),
                escape(&s.name)
            );
        }
        html.push_str("</div>\n<table>\n<tr><th>Section</th><th>Start</th><th>End</th></tr>\n");
        for s in &analysis.sections {
            let _ = writeln!(
                html,
                "<tr><td>{}</td><td>{}</td><td>{}</td></tr>",
                escape(&s.name),
                format_timestamp(s.start),
                format_timestamp(s.end)
            );
        }
        html.push_str("</table>\n");
    }

    html.push_str("<h2>Chords</h2>\n");
    if analysis.chords.is_empty() {
        html.push_str("<p>No chords were detected.</p>\n");
    } else {
        html.push_str("<table>\n<tr><th>Time</th><th>Chord</th><th>Length</th><th>Confidence</th></tr>\n");
        for c in &analysis.chords {
            let conf = c
                .confidence
                .map(|v| format!("{:.0}%", v * 100.0))
                .unwrap_or_default();
            let _ = writeln!(
                html,
                "<tr><td>{}</td><td class=\"chord\">{}</td><td>{:.1}s</td><td class=\"conf\">{}</td></tr>",
                c.timestamp(),
                escape(&format_chord(c, level)),
                c.duration,
                conf
            );
        }
        html.push_str("</table>\n");
    }

    html.push_str("<footer>chordia</footer>\n</body>\n</html>\n");
    html
}

/// Render and write the report to `path`.
pub fn write_report(
    path: &Path,
    analysis: &SongAnalysis,
    metadata: &AudioMetadata,
    level: Complexity,
) -> std::io::Result<()> {
    std::fs::write(path, render_html(analysis, metadata, level))?;
    log::info!("Wrote report to {}", path.display());
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{ChordEvent, Section};

    fn analysis() -> SongAnalysis {
        SongAnalysis {
            key: "A Minor".into(),
            time_signature: "4/4".into(),
            bpm: Some(96.0),
            modulations: vec!["A Minor -> C Major at 1:04".into()],
            complexity: Some("Intermediate".into()),
            summary: "Dorian <colour> & borrowed chords".into(),
            chords: vec![ChordEvent {
                symbol: "Am7/G".into(),
                root: Some("A".into()),
                quality: Some("minor".into()),
                extension: Some("7".into()),
                bass: Some("G".into()),
                confidence: Some(0.87),
                start: 0.0,
                duration: 2.5,
            }],
            sections: vec![Section {
                name: "Intro".into(),
                start: 0.0,
                end: 2.5,
                color: "red;background:url(x)".into(),
            }],
        }
    }

    fn meta() -> AudioMetadata {
        AudioMetadata {
            file_name: "song \"one\".mp3".into(),
            mime_type: "audio/mpeg".into(),
            duration: 2.5,
            size_bytes: 1,
        }
    }

    #[test]
    fn test_report_is_escaped_and_self_contained() {
        let html = render_html(&analysis(), &meta(), Complexity::Advanced);
        assert!(html.starts_with("<!DOCTYPE html>"));
        assert!(html.contains("Dorian &lt;colour&gt; &amp; borrowed"));
        assert!(html.contains("song &quot;one&quot;.mp3"));
        assert!(!html.contains("url(x)"));
        assert!(!html.contains("<script"));
        assert!(!html.contains("<link"));
        assert!(html.contains("87%"));
        assert!(html.contains("A Minor -&gt; C Major"));
    }

    #[test]
    fn test_report_uses_complexity_level() {
        let advanced = render_html(&analysis(), &meta(), Complexity::Advanced);
        assert!(advanced.contains(">Am7/G<"));
        let basic = render_html(&analysis(), &meta(), Complexity::Basic);
        assert!(basic.contains("<td class=\"chord\">Am</td>"));
        assert!(basic.contains("at basic level"));
    }

    #[test]
    fn test_write_report() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("r.html");
        write_report(&path, &analysis(), &meta(), Complexity::Intermediate).unwrap();
        let html = std::fs::read_to_string(&path).unwrap();
        assert!(html.contains("<td class=\"chord\">Am7/G</td>"));
    }

    #[test]
    fn test_escape() {
        assert_eq!(escape("<a href='x'>&</a>"), "&lt;a href=&#39;x&#39;&gt;&amp;&lt;/a&gt;");
    }
}
