//! Active chord/section lookup and the scrolling terminal view.

use std::io::Write;

use crate::model::{format_timestamp, ChordEvent, Section, SongAnalysis};
use crate::playback::{MediaSnapshot, TimeObserver};
use crate::simplify::{format_chord, Complexity};

/// Chords and sections ordered by start time, queried by playback position.
#[derive(Debug, Clone)]
pub struct Timeline {
    chords: Vec<ChordEvent>,
    sections: Vec<Section>,
}

/// A chord visible in a window, with offsets relative to the playhead.
#[derive(Debug, Clone, PartialEq)]
pub struct WindowBlock<'a> {
    pub index: usize,
    pub chord: &'a ChordEvent,
    /// Seconds from the playhead to the chord start (negative = already started).
    pub offset_start: f64,
    pub offset_end: f64,
    pub active: bool,
}

impl Timeline {
    pub fn new(analysis: &SongAnalysis) -> Self {
        let mut chords = analysis.chords.clone();
        chords.sort_by(|a, b| a.start.total_cmp(&b.start));
        let mut sections = analysis.sections.clone();
        sections.sort_by(|a, b| a.start.total_cmp(&b.start));
        Self { chords, sections }
    }

    pub fn chords(&self) -> &[ChordEvent] {
        &self.chords
    }

    /// Index of the chord whose `[start, end)` contains `t`, if any.
    pub fn chord_index_at(&self, t: f64) -> Option<usize> {
        let idx = self.chords.partition_point(|c| c.start <= t);
        let i = idx.checked_sub(1)?;
        self.chords[i].contains(t).then_some(i)
    }

    pub fn chord_at(&self, t: f64) -> Option<&ChordEvent> {
        self.chord_index_at(t).map(|i| &self.chords[i])
    }

    /// First chord starting after `t`.
    pub fn next_chord(&self, t: f64) -> Option<&ChordEvent> {
        let idx = self.chords.partition_point(|c| c.start <= t);
        self.chords.get(idx)
    }

    pub fn section_at(&self, t: f64) -> Option<&Section> {
        let idx = self.sections.partition_point(|s| s.start <= t);
        let s = &self.sections[idx.checked_sub(1)?];
        s.contains(t).then_some(s)
    }

    /// Chords overlapping a window of `span` seconds centered on `t`.
    pub fn window(&self, t: f64, span: f64) -> Vec<WindowBlock<'_>> {
        let lo = t - span / 2.0;
        let hi = t + span / 2.0;
        let first = self.chords.partition_point(|c| c.end() <= lo);
        self.chords[first..]
            .iter()
            .enumerate()
            .take_while(|(_, c)| c.start < hi)
            .map(|(i, c)| WindowBlock {
                index: first + i,
                chord: c,
                offset_start: c.start - t,
                offset_end: c.end() - t,
                active: c.contains(t),
            })
            .collect()
    }

    /// Draw the window as a fixed-width strip. Each block starts with `|` and
    /// its label; the playhead sits at the center column.
    pub fn render_strip(&self, t: f64, span: f64, width: usize, level: Complexity) -> String {
        if width == 0 || span <= 0.0 {
            return String::new();
        }
        let mut cells = vec![' '; width];
        let secs_per_col = span / width as f64;
        let col_of = |offset: f64| ((offset + span / 2.0) / secs_per_col).floor() as isize;

        let blocks = self.window(t, span);
        for (i, block) in blocks.iter().enumerate() {
            let start = col_of(block.offset_start).max(0);
            let stop = blocks
                .get(i + 1)
                .map(|next| col_of(next.offset_start))
                .unwrap_or(width as isize)
                .min(width as isize);
            if start >= stop {
                continue;
            }
            let label = format_chord(block.chord, level);
            let text = std::iter::once('|').chain(label.chars());
            for (col, ch) in (start..stop).zip(text) {
                cells[col as usize] = ch;
            }
        }
        cells.into_iter().collect()
    }

    /// One status line: time, section, current and next chord, and the strip.
    pub fn render_line(&self, t: f64, level: Complexity, width: usize) -> String {
        let section = self.section_at(t).map(|s| s.name.as_str()).unwrap_or("-");
        let current = self
            .chord_at(t)
            .map(|c| format_chord(c, level))
            .unwrap_or_else(|| "N.C.".to_string());
        let next = self
            .next_chord(t)
            .map(|c| format_chord(c, level))
            .unwrap_or_default();
        let strip = self.render_strip(t, 8.0, width, level);
        format!(
            "{:>7} {:<10} [{:^8}] -> {:<8} {}",
            format_timestamp(t),
            section,
            current,
            next,
            strip
        )
    }
}

/// Redraws the status line in place whenever playback time is published.
pub struct TimelineView<W: Write> {
    timeline: Timeline,
    level: Complexity,
    width: usize,
    out: W,
    last: String,
}

impl<W: Write> TimelineView<W> {
    pub fn new(timeline: Timeline, level: Complexity, width: usize, out: W) -> Self {
        Self {
            timeline,
            level,
            width,
            out,
            last: String::new(),
        }
    }

    pub fn into_inner(self) -> W {
        self.out
    }
}

impl<W: Write> TimeObserver for TimelineView<W> {
    fn on_time(&mut self, snapshot: &MediaSnapshot) {
        let line = self
            .timeline
            .render_line(snapshot.position, self.level, self.width);
        if line == self.last {
            return;
        }
        if let Err(e) = write!(self.out, "\r{line}\x1b[K").and_then(|_| self.out.flush()) {
            log::debug!("Timeline redraw failed: {e}");
        }
        self.last = line;
    }
}
