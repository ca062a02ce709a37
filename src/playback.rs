//! Playback transport and the frame loop that publishes its position.
//!
//! The transport's media position is the single authority for "where are we
//! in the song". Everything else (the timeline view, the click scheduler, the
//! caller's own time state) reads it once per frame.

use std::cell::Cell;
use std::io::BufRead;
use std::rc::Rc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use crate::click::{ClickSink, SmartClick};
use crate::retry::Sleeper;

pub const MIN_RATE: f64 = 0.25;
pub const MAX_RATE: f64 = 4.0;

/// A monotonic clock in seconds.
pub trait TimeSource {
    fn now(&self) -> f64;
}

/// Wall clock, measured from construction.
#[derive(Debug, Clone, Copy)]
pub struct SystemClock {
    origin: Instant,
}

impl Default for SystemClock {
    fn default() -> Self {
        Self {
            origin: Instant::now(),
        }
    }
}

impl TimeSource for SystemClock {
    fn now(&self) -> f64 {
        self.origin.elapsed().as_secs_f64()
    }
}

/// A clock that only moves when told to. Sleeping on it advances it, so a
/// frame loop driven by `ManualTime` runs as fast as it can compute.
#[derive(Debug, Clone, Default)]
pub struct ManualTime(Rc<Cell<f64>>);

impl ManualTime {
    pub fn advance(&self, secs: f64) {
        self.0.set(self.0.get() + secs);
    }

    pub fn set(&self, secs: f64) {
        self.0.set(secs);
    }
}

impl TimeSource for ManualTime {
    fn now(&self) -> f64 {
        self.0.get()
    }
}

impl Sleeper for ManualTime {
    fn sleep(&self, duration: Duration) {
        self.advance(duration.as_secs_f64());
    }
}

/// Playback state as read at one instant.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct MediaSnapshot {
    pub position: f64,
    pub rate: f64,
    pub playing: bool,
}

/// Play/pause/seek/rate over a clock. Position advances at `rate` media
/// seconds per clock second while playing.
#[derive(Debug)]
pub struct Transport<T: TimeSource> {
    clock: T,
    /// 0.0 when unknown; playback then never auto-pauses.
    duration: f64,
    rate: f64,
    playing: bool,
    anchor_clock: f64,
    anchor_position: f64,
}

impl<T: TimeSource> Transport<T> {
    pub fn new(clock: T, duration: f64) -> Self {
        Self {
            clock,
            duration: duration.max(0.0),
            rate: 1.0,
            playing: false,
            anchor_clock: 0.0,
            anchor_position: 0.0,
        }
    }

    /// Current clock time (the audio clock the click scheduler targets).
    pub fn now(&self) -> f64 {
        self.clock.now()
    }

    pub fn duration(&self) -> f64 {
        self.duration
    }

    pub fn rate(&self) -> f64 {
        self.rate
    }

    pub fn is_playing(&self) -> bool {
        self.playing
    }

    fn clamp(&self, position: f64) -> f64 {
        if self.duration > 0.0 {
            position.clamp(0.0, self.duration)
        } else {
            position.max(0.0)
        }
    }

    pub fn position(&self) -> f64 {
        if self.playing {
            self.clamp(self.anchor_position + (self.clock.now() - self.anchor_clock) * self.rate)
        } else {
            self.anchor_position
        }
    }

    fn reanchor(&mut self) {
        self.anchor_position = self.position();
        self.anchor_clock = self.clock.now();
    }

    pub fn play(&mut self) {
        if self.playing {
            return;
        }
        if self.duration > 0.0 && self.anchor_position >= self.duration {
            self.anchor_position = 0.0;
        }
        self.anchor_clock = self.clock.now();
        self.playing = true;
        log::debug!("play at {:.2}s", self.anchor_position);
    }

    pub fn pause(&mut self) {
        if !self.playing {
            return;
        }
        self.reanchor();
        self.playing = false;
        log::debug!("pause at {:.2}s", self.anchor_position);
    }

    pub fn seek(&mut self, position: f64) {
        self.anchor_position = self.clamp(position);
        self.anchor_clock = self.clock.now();
        log::debug!("seek to {:.2}s", self.anchor_position);
    }

    pub fn set_rate(&mut self, rate: f64) {
        self.reanchor();
        self.rate = if rate.is_finite() {
            rate.clamp(MIN_RATE, MAX_RATE)
        } else {
            1.0
        };
    }

    /// Read the current state, pausing first if playback reached the end.
    pub fn poll(&mut self) -> MediaSnapshot {
        if self.playing && self.duration > 0.0 && self.position() >= self.duration {
            self.pause();
        }
        self.snapshot()
    }

    pub fn snapshot(&self) -> MediaSnapshot {
        MediaSnapshot {
            position: self.position(),
            rate: self.rate,
            playing: self.playing,
        }
    }
}

/// Receives the playback position once per frame.
pub trait TimeObserver {
    fn on_time(&mut self, snapshot: &MediaSnapshot);
}

/// The caller's copy of the current time, kept in step with the transport.
#[derive(Debug, Default, Clone)]
pub struct TimeTracker {
    pub position: f64,
    pub updates: u64,
}

impl TimeObserver for TimeTracker {
    fn on_time(&mut self, snapshot: &MediaSnapshot) {
        self.position = snapshot.position;
        self.updates += 1;
    }
}

/// Stops a running `SyncLoop` before its next frame.
#[derive(Debug, Clone, Default)]
pub struct CancelToken(Arc<AtomicBool>);

impl CancelToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }

    /// Block on `input` and cancel once the user enters a line.
    ///
    /// End of input (a closed or redirected stdin) and read errors leave the
    /// token alone. Returns whether it cancelled.
    pub fn cancel_on_line<R: BufRead>(&self, mut input: R) -> bool {
        let mut line = String::new();
        match input.read_line(&mut line) {
            Ok(n) if n > 0 => {
                self.cancel();
                true
            }
            Ok(_) => {
                log::debug!("Input closed; playback runs to the end");
                false
            }
            Err(e) => {
                log::debug!("Could not read input: {e}");
                false
            }
        }
    }
}

/// Click scheduler plus the sink its clicks go to.
pub struct ClickDriver<'a> {
    pub click: &'a mut SmartClick,
    pub sink: &'a mut dyn ClickSink,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct LoopStats {
    pub frames: u64,
    pub schedule_ticks: u64,
}

/// Frame loop: publishes the position to observers every `frame_interval`
/// and runs the click scheduler every `schedule_interval`. Runs only while
/// the transport is playing.
#[derive(Debug, Clone, Copy)]
pub struct SyncLoop {
    pub frame_interval: Duration,
    pub schedule_interval: Duration,
}

impl SyncLoop {
    pub fn new(frame_rate: u32, schedule_interval: Duration) -> Self {
        Self {
            frame_interval: Duration::from_secs_f64(1.0 / frame_rate.max(1) as f64),
            schedule_interval,
        }
    }

    /// Run until playback stops or `cancel` fires. Observers always get a
    /// final snapshot so they show where playback stopped.
    pub fn run<T: TimeSource>(
        &self,
        transport: &mut Transport<T>,
        observers: &mut [&mut dyn TimeObserver],
        mut click: Option<ClickDriver<'_>>,
        sleeper: &dyn Sleeper,
        cancel: &CancelToken,
    ) -> LoopStats {
        let step = self.frame_interval.min(self.schedule_interval).max(Duration::from_millis(1));
        let frame_secs = self.frame_interval.as_secs_f64();
        let schedule_secs = self.schedule_interval.as_secs_f64();
        let mut stats = LoopStats::default();
        let mut last_frame = f64::NEG_INFINITY;
        let mut last_schedule = f64::NEG_INFINITY;

        while !cancel.is_cancelled() {
            let snap = transport.poll();
            if !snap.playing {
                break;
            }
            let now = transport.now();

            if now - last_schedule >= schedule_secs - 1e-9 {
                if let Some(driver) = click.as_mut() {
                    driver.click.tick(now, &snap, &mut *driver.sink);
                }
                last_schedule = now;
                stats.schedule_ticks += 1;
            }
            if let Some(driver) = click.as_mut() {
                driver.sink.advance(now);
            }

            if now - last_frame >= frame_secs - 1e-9 {
                for observer in observers.iter_mut() {
                    observer.on_time(&snap);
                }
                last_frame = now;
                stats.frames += 1;
            }

            sleeper.sleep(step);
        }

        let snap = transport.snapshot();
        if let Some(driver) = click.as_mut() {
            let now = transport.now();
            driver.click.tick(now, &MediaSnapshot { playing: false, ..snap }, &mut *driver.sink);
            driver.sink.advance(now);
        }
        for observer in observers.iter_mut() {
            observer.on_time(&snap);
        }
        stats
    }
}
