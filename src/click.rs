//! Smart Click: a metronome that stays locked to the media position.
//!
//! Clicks are scheduled slightly ahead on the audio clock. Each tick compares
//! where the media should be (from the last anchor) with where it actually
//! is; a seek, rate change or drift beyond the tolerance re-anchors the beat
//! grid within the same tick and cancels clicks that were queued from the
//! stale grid.

use std::collections::VecDeque;
use std::io::Write;
use std::path::Path;

use thiserror::Error;

use crate::model::SongAnalysis;
use crate::playback::{
    CancelToken, ClickDriver, ManualTime, MediaSnapshot, SyncLoop, TimeSource, Transport,
};

#[derive(Error, Debug)]
pub enum ClickError {
    #[error("The analysis has no tempo; a click track needs one")]
    NoTempo,
    #[error("The analysis has no length; pass audio with a known duration or timed chords")]
    NoDuration,
    #[error("WAV error: {0}")]
    Wav(#[from] hound::Error),
}

const SPACING_EPSILON: f64 = 1e-6;

/// Scheduler tuning, in seconds of audio clock time.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ClickSettings {
    /// How far ahead of the audio clock clicks are queued.
    pub lookahead: f64,
    /// Allowed gap between predicted and actual media position.
    pub tolerance: f64,
    /// Output gain in [0, 1].
    pub volume: f32,
}

impl Default for ClickSettings {
    fn default() -> Self {
        Self {
            lookahead: 0.1,
            tolerance: 0.05,
            volume: 0.8,
        }
    }
}

/// One click on the audio clock.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ScheduledClick {
    pub at: f64,
    /// Beat number counted from the start of the song.
    pub beat: i64,
    pub accent: bool,
}

/// Where scheduled clicks go.
pub trait ClickSink {
    fn schedule(&mut self, click: &ScheduledClick);

    /// Called as the audio clock moves; sinks that play in real time fire
    /// due clicks here.
    fn advance(&mut self, _now: f64) {}

    /// Drop queued clicks later than `after`.
    fn cancel_pending(&mut self, _after: f64) {}
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum ClickState {
    Off,
    Idle,
    Locked {
        anchor_clock: f64,
        anchor_position: f64,
        rate: f64,
        next_beat: i64,
    },
}

#[derive(Debug, Clone)]
pub struct SmartClick {
    bpm: f64,
    beats_per_bar: u32,
    settings: ClickSettings,
    state: ClickState,
    /// Clicks handed to the sink that are not yet due.
    queued: VecDeque<ScheduledClick>,
    last_played: Option<f64>,
    relocks: u64,
}

impl SmartClick {
    /// Starts disabled. Returns `None` without a usable tempo.
    pub fn new(bpm: f64, beats_per_bar: u32, settings: ClickSettings) -> Option<Self> {
        if !bpm.is_finite() || bpm <= 0.0 {
            return None;
        }
        Some(Self {
            bpm,
            beats_per_bar: beats_per_bar.max(1),
            settings,
            state: ClickState::Off,
            queued: VecDeque::new(),
            last_played: None,
            relocks: 0,
        })
    }

    pub fn from_analysis(analysis: &SongAnalysis, settings: ClickSettings) -> Option<Self> {
        Self::new(analysis.bpm?, analysis.beats_per_bar(), settings)
    }

    pub fn state(&self) -> ClickState {
        self.state
    }

    pub fn is_enabled(&self) -> bool {
        self.state != ClickState::Off
    }

    /// Times the beat grid was re-anchored after the initial lock.
    pub fn relocks(&self) -> u64 {
        self.relocks
    }

    pub fn set_enabled(&mut self, enabled: bool, sink: &mut dyn ClickSink, now: f64) {
        if enabled == self.is_enabled() {
            return;
        }
        if enabled {
            self.state = ClickState::Idle;
        } else {
            self.unlock(sink, now);
            self.state = ClickState::Off;
        }
    }

    fn beat_length(&self) -> f64 {
        60.0 / self.bpm
    }

    fn unlock(&mut self, sink: &mut dyn ClickSink, now: f64) {
        sink.cancel_pending(now);
        self.queued.clear();
    }

    fn retire_played(&mut self, now: f64) {
        while let Some(c) = self.queued.front() {
            if c.at > now {
                break;
            }
            self.last_played = Some(c.at);
            self.queued.pop_front();
        }
    }

    fn lock(&mut self, now: f64, position: f64, rate: f64) {
        let beat = self.beat_length();
        let next_beat = (position / beat - SPACING_EPSILON).ceil() as i64;
        self.state = ClickState::Locked {
            anchor_clock: now,
            anchor_position: position,
            rate,
            next_beat,
        };
        log::debug!("click locked at {position:.3}s, next beat {next_beat}");
    }

    /// One scheduling pass. Returns the number of clicks newly scheduled.
    pub fn tick(
        &mut self,
        now: f64,
        snapshot: &MediaSnapshot,
        sink: &mut dyn ClickSink,
    ) -> usize {
        if self.state == ClickState::Off {
            return 0;
        }
        self.retire_played(now);

        if !snapshot.playing {
            self.unlock(sink, now);
            self.state = ClickState::Idle;
            return 0;
        }

        match self.state {
            ClickState::Locked {
                anchor_clock,
                anchor_position,
                rate,
                ..
            } => {
                let predicted = anchor_position + (now - anchor_clock) * rate;
                let drift = (predicted - snapshot.position).abs();
                if drift > self.settings.tolerance || rate != snapshot.rate {
                    log::debug!("click drift {drift:.3}s, re-anchoring");
                    self.unlock(sink, now);
                    self.lock(now, snapshot.position, snapshot.rate);
                    self.relocks += 1;
                }
            }
            _ => self.lock(now, snapshot.position, snapshot.rate),
        }

        let ClickState::Locked {
            anchor_clock,
            anchor_position,
            rate,
            mut next_beat,
        } = self.state
        else {
            return 0;
        };

        let beat = self.beat_length();
        let min_spacing = beat / rate;
        let horizon = now + self.settings.lookahead;
        let mut scheduled = 0;
        loop {
            let at = anchor_clock + (next_beat as f64 * beat - anchor_position) / rate;
            if at > horizon {
                break;
            }
            let previous = self.queued.back().map(|c| c.at).or(self.last_played);
            let too_close = previous.is_some_and(|p| at - p < min_spacing - SPACING_EPSILON);
            if at >= now - SPACING_EPSILON && !too_close {
                let click = ScheduledClick {
                    at,
                    beat: next_beat,
                    accent: next_beat.rem_euclid(self.beats_per_bar as i64) == 0,
                };
                sink.schedule(&click);
                self.queued.push_back(click);
                scheduled += 1;
            }
            next_beat += 1;
        }

        if let ClickState::Locked { next_beat: n, .. } = &mut self.state {
            *n = next_beat;
        }
        scheduled
    }
}

/// Renders the click sound.
#[derive(Debug, Clone, Copy)]
pub struct ClickSynth {
    pub sample_rate: u32,
    pub volume: f32,
}

impl ClickSynth {
    const LENGTH_SECS: f32 = 0.03;
    const DECAY: f32 = 160.0;

    pub fn new(sample_rate: u32, volume: f32) -> Self {
        Self {
            sample_rate,
            volume: volume.clamp(0.0, 1.0),
        }
    }

    /// A short exponentially decaying sine; accents are higher and louder.
    pub fn render(&self, accent: bool) -> Vec<f32> {
        let (freq, gain) = if accent { (1500.0, 1.0) } else { (1000.0, 0.7) };
        let n = (Self::LENGTH_SECS * self.sample_rate as f32) as usize;
        (0..n)
            .map(|i| {
                let t = i as f32 / self.sample_rate as f32;
                let env = (-t * Self::DECAY).exp();
                (2.0 * std::f32::consts::PI * freq * t).sin() * env * gain * self.volume
            })
            .collect()
    }
}

/// Mixes clicks into a mono buffer for export. Clicks land in the buffer
/// only once the clock passes them, so cancelled clicks leave no trace.
#[derive(Debug)]
pub struct WavClickSink {
    synth: ClickSynth,
    origin: f64,
    pending: Vec<ScheduledClick>,
    buffer: Vec<f32>,
    accent_sound: Vec<f32>,
    beat_sound: Vec<f32>,
}

impl WavClickSink {
    /// `origin` is the clock time that maps to sample 0.
    pub fn new(synth: ClickSynth, origin: f64) -> Self {
        Self {
            accent_sound: synth.render(true),
            beat_sound: synth.render(false),
            synth,
            origin,
            pending: Vec::new(),
            buffer: Vec::new(),
        }
    }

    fn mix(&mut self, click: &ScheduledClick) {
        let start = ((click.at - self.origin) * self.synth.sample_rate as f64).round();
        if start < 0.0 {
            return;
        }
        let start = start as usize;
        let sound = if click.accent { &self.accent_sound } else { &self.beat_sound };
        let end = start + sound.len();
        if self.buffer.len() < end {
            self.buffer.resize(end, 0.0);
        }
        for (dst, src) in self.buffer[start..end].iter_mut().zip(sound) {
            *dst = (*dst + src).clamp(-1.0, 1.0);
        }
    }

    /// Flush due clicks and return the buffer padded to `total_samples`.
    pub fn finish(mut self, total_samples: usize) -> Vec<f32> {
        for click in std::mem::take(&mut self.pending) {
            self.mix(&click);
        }
        if self.buffer.len() < total_samples {
            self.buffer.resize(total_samples, 0.0);
        }
        self.buffer
    }
}

impl ClickSink for WavClickSink {
    fn schedule(&mut self, click: &ScheduledClick) {
        self.pending.push(*click);
    }

    fn advance(&mut self, now: f64) {
        let (due, rest): (Vec<_>, Vec<_>) = std::mem::take(&mut self.pending)
            .into_iter()
            .partition(|c| c.at <= now);
        self.pending = rest;
        for click in &due {
            self.mix(click);
        }
    }

    fn cancel_pending(&mut self, after: f64) {
        self.pending.retain(|c| c.at <= after);
    }
}

/// Rings the terminal bell when a click falls due.
pub struct TerminalClickSink<W: Write> {
    out: W,
    pending: VecDeque<ScheduledClick>,
    fired: u64,
}

impl<W: Write> TerminalClickSink<W> {
    pub fn new(out: W) -> Self {
        Self {
            out,
            pending: VecDeque::new(),
            fired: 0,
        }
    }

    pub fn fired(&self) -> u64 {
        self.fired
    }
}

impl<W: Write> ClickSink for TerminalClickSink<W> {
    fn schedule(&mut self, click: &ScheduledClick) {
        self.pending.push_back(*click);
    }

    fn advance(&mut self, now: f64) {
        let mut rang = false;
        while self.pending.front().is_some_and(|c| c.at <= now) {
            self.pending.pop_front();
            rang |= self.out.write_all(b"\x07").is_ok();
            self.fired += 1;
        }
        if rang {
            let _ = self.out.flush();
        }
    }

    fn cancel_pending(&mut self, after: f64) {
        self.pending.retain(|c| c.at <= after);
    }
}

/// Render the click for a whole song as mono samples, played at `rate`.
///
/// Runs the same scheduler and frame loop as live playback against a manual
/// clock, so the export matches what the user hears.
pub fn render_click_track(
    analysis: &SongAnalysis,
    duration: f64,
    rate: f64,
    sample_rate: u32,
    settings: ClickSettings,
    schedule_interval: std::time::Duration,
) -> Result<Vec<f32>, ClickError> {
    let mut click = SmartClick::from_analysis(analysis, settings).ok_or(ClickError::NoTempo)?;
    let duration = if duration > 0.0 { duration } else { analysis.span() };
    if !(duration > 0.0 && duration.is_finite()) {
        return Err(ClickError::NoDuration);
    }

    let time = ManualTime::default();
    let mut transport = Transport::new(time.clone(), duration);
    transport.set_rate(rate);
    let mut sink = WavClickSink::new(ClickSynth::new(sample_rate, settings.volume), time.now());
    click.set_enabled(true, &mut sink, time.now());
    transport.play();

    let sync = SyncLoop {
        frame_interval: schedule_interval,
        schedule_interval,
    };
    sync.run(
        &mut transport,
        &mut [],
        Some(ClickDriver {
            click: &mut click,
            sink: &mut sink,
        }),
        &time,
        &CancelToken::new(),
    );

    let clock_secs = duration / transport.rate();
    let total = (clock_secs * sample_rate as f64).ceil() as usize;
    let mut samples = sink.finish(total);
    samples.truncate(total);
    log::info!(
        "Rendered click track: {:.1}s at {:.2}x, {} samples",
        clock_secs,
        transport.rate(),
        samples.len()
    );
    Ok(samples)
}

/// Write mono samples as a 16-bit WAV file.
pub fn write_wav(path: &Path, samples: &[f32], sample_rate: u32) -> Result<(), ClickError> {
    let spec = hound::WavSpec {
        channels: 1,
        sample_rate,
        bits_per_sample: 16,
        sample_format: hound::SampleFormat::Int,
    };
    let mut writer = hound::WavWriter::create(path, spec)?;
    for &s in samples {
        writer.write_sample((s.clamp(-1.0, 1.0) * i16::MAX as f32) as i16)?;
    }
    writer.finalize()?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Keeps only clicks that were never cancelled.
    #[derive(Default)]
    struct Recorder {
        clicks: Vec<ScheduledClick>,
        cancels: usize,
    }

    impl ClickSink for Recorder {
        fn schedule(&mut self, click: &ScheduledClick) {
            self.clicks.push(*click);
        }

        fn cancel_pending(&mut self, after: f64) {
            self.cancels += 1;
            self.clicks.retain(|c| c.at <= after);
        }
    }

    fn enabled(bpm: f64) -> SmartClick {
        let mut c = SmartClick::new(bpm, 4, ClickSettings::default()).unwrap();
        c.set_enabled(true, &mut Recorder::default(), 0.0);
        c
    }

    fn playing(position: f64, rate: f64) -> MediaSnapshot {
        MediaSnapshot { position, rate, playing: true }
    }

    fn assert_spacing(clicks: &[ScheduledClick], min: f64) {
        for pair in clicks.windows(2) {
            let gap = pair[1].at - pair[0].at;
            assert!(gap >= min - 1e-6, "clicks {:?} and {:?} are {gap}s apart", pair[0], pair[1]);
        }
    }

    #[test]
    fn test_no_tempo_no_click() {
        assert!(SmartClick::new(0.0, 4, ClickSettings::default()).is_none());
        assert!(SmartClick::new(f64::NAN, 4, ClickSettings::default()).is_none());
    }

    #[test]
    fn test_off_schedules_nothing() {
        let mut c = SmartClick::new(120.0, 4, ClickSettings::default()).unwrap();
        let mut sink = Recorder::default();
        assert_eq!(c.tick(0.0, &playing(0.0, 1.0), &mut sink), 0);
        assert!(sink.clicks.is_empty());
    }

    #[test]
    fn test_steady_playback_spacing_and_accents() {
        let mut c = enabled(120.0);
        let mut sink = Recorder::default();
        let mut now = 0.0;
        while now < 4.0 {
            c.tick(now, &playing(now, 1.0), &mut sink);
            now += 0.025;
        }
        // beats every 0.5s from 0.0 through the lookahead past 4.0
        assert_eq!(sink.clicks.len(), 9);
        assert_spacing(&sink.clicks, 0.5);
        let accents: Vec<i64> = sink.clicks.iter().filter(|c| c.accent).map(|c| c.beat).collect();
        assert_eq!(accents, vec![0, 4, 8]);
        assert_eq!(c.relocks(), 0);
    }

    #[test]
    fn test_rate_scales_clock_spacing() {
        let mut c = enabled(120.0);
        let mut sink = Recorder::default();
        let mut now = 0.0;
        while now < 2.0 {
            c.tick(now, &playing(now * 2.0, 2.0), &mut sink);
            now += 0.025;
        }
        assert_spacing(&sink.clicks, 0.25);
        assert!((sink.clicks[1].at - sink.clicks[0].at - 0.25).abs() < 1e-9);
    }

    #[test]
    fn test_seek_realigns_within_one_tick() {
        let mut c = enabled(120.0);
        let mut sink = Recorder::default();
        let mut now = 0.0;
        while now < 1.2 {
            c.tick(now, &playing(now, 1.0), &mut sink);
            now += 0.025;
        }
        let cancels_before = sink.cancels;

        // jump forward to 10.3s of media on the next tick
        let seek_at = now;
        let offset = 10.3 - seek_at;
        c.tick(now, &playing(now + offset, 1.0), &mut sink);
        assert_eq!(c.relocks(), 1);
        assert!(sink.cancels > cancels_before);
        let ClickState::Locked { anchor_position, .. } = c.state() else {
            panic!("expected lock");
        };
        assert!((anchor_position - 10.3).abs() < 1e-9);

        for _ in 0..40 {
            now += 0.025;
            c.tick(now, &playing(now + offset, 1.0), &mut sink);
        }
        assert_eq!(c.relocks(), 1);

        let after_seek: Vec<_> = sink.clicks.iter().filter(|k| k.at >= seek_at).collect();
        assert!(!after_seek.is_empty());
        for k in &after_seek {
            // new clicks sit on the media beat grid
            let media_time = k.at + offset;
            assert!((media_time / 0.5 - k.beat as f64).abs() < 1e-6);
        }
        assert_spacing(&sink.clicks, 0.5);
    }

    #[test]
    fn test_spacing_holds_under_jitter_and_seeks() {
        let mut c = enabled(100.0);
        let mut sink = Recorder::default();
        let mut now = 0.0;
        let mut position: f64 = 0.0;
        let mut step = 0u32;
        while now < 20.0 {
            step += 1;
            position += 0.025;
            if step % 7 == 0 {
                position += 0.03;
            }
            if step % 97 == 0 {
                position -= 1.7;
            }
            c.tick(now, &playing(position.max(0.0), 1.0), &mut sink);
            now += 0.025;
        }
        assert!(c.relocks() > 0);
        assert_spacing(&sink.clicks, 0.6);
    }

    #[test]
    fn test_pause_cancels_queue_and_idles() {
        let mut c = enabled(60.0);
        let mut sink = Recorder::default();
        c.tick(0.95, &playing(0.95, 1.0), &mut sink);
        assert_eq!(sink.clicks.len(), 1);
        c.tick(0.96, &MediaSnapshot { position: 0.96, rate: 1.0, playing: false }, &mut sink);
        assert!(sink.clicks.is_empty());
        assert_eq!(c.state(), ClickState::Idle);
    }

    #[test]
    fn test_render_click_track() {
        let analysis = SongAnalysis {
            key: "C".into(),
            time_signature: "3/4".into(),
            bpm: Some(60.0),
            modulations: vec![],
            complexity: None,
            summary: String::new(),
            chords: vec![],
            sections: vec![],
        };
        let samples = render_click_track(
            &analysis,
            3.0,
            1.0,
            8000,
            ClickSettings::default(),
            std::time::Duration::from_millis(25),
        )
        .unwrap();
        assert_eq!(samples.len(), 24_000);
        // clicks at 0, 1 and 2 seconds
        for at in [0usize, 8000, 16_000] {
            assert!(samples[at..at + 10].iter().any(|s| s.abs() > 0.01), "no click at {at}");
        }
        assert!(samples[4000..7900].iter().all(|s| *s == 0.0));

        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("click.wav");
        write_wav(&path, &samples, 8000).unwrap();
        assert_eq!(hound::WavReader::open(&path).unwrap().len(), 24_000);
    }

    #[test]
    fn test_render_without_tempo() {
        let mut analysis = SongAnalysis {
            key: String::new(),
            time_signature: String::new(),
            bpm: None,
            modulations: vec![],
            complexity: None,
            summary: String::new(),
            chords: vec![],
            sections: vec![],
        };
        let r = render_click_track(&analysis, 3.0, 1.0, 1000, ClickSettings::default(), std::time::Duration::from_millis(25));
        assert!(matches!(r, Err(ClickError::NoTempo)));
        analysis.bpm = Some(-5.0);
        assert!(SmartClick::from_analysis(&analysis, ClickSettings::default()).is_none());
    }

    #[test]
    fn test_render_without_any_length() {
        let analysis = SongAnalysis::from_value(
            &serde_json::json!({"key": "C Major", "bpm": 120, "chords": []}),
            0.0,
        )
        .unwrap();
        assert_eq!(analysis.span(), 0.0);
        let r = render_click_track(
            &analysis,
            0.0,
            1.0,
            100,
            ClickSettings::default(),
            std::time::Duration::from_millis(25),
        );
        assert!(matches!(r, Err(ClickError::NoDuration)));
    }
}
