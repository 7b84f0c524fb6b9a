//! per output frame accounting
//!
//! [`FrameReport`] records begin/end of every compositing pass per output and
//! logs an averaged summary about once a second. everything is counted as a
//! Riemann sum over the elapsed interval, so the exact report cadence does
//! not matter. all duration math is integer microseconds, no floats.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

/// monotonic time source, swappable for tests
pub trait Clock: Send + Sync {
    fn now(&self) -> Duration;
}

pub struct MonotonicClock {
    origin: Instant,
}

impl MonotonicClock {
    pub fn new() -> MonotonicClock {
        MonotonicClock { origin: Instant::now() }
    }
}

impl Default for MonotonicClock {
    fn default() -> Self {
        Self::new()
    }
}

impl Clock for MonotonicClock {
    fn now(&self) -> Duration {
        self.origin.elapsed()
    }
}

/// opaque id of one logical display output
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct OutputId(pub u64);

/// one reported interval for one output, the values that get logged
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FrameStats {
    /// frames per 1000 seconds, premultiplied to keep 3 decimals without floats
    pub frames_per_1000sec: i64,
    pub avg_frame_time_usec: i64,
    pub avg_latency_usec: i64,
    pub frames: u64,
    pub span_msec: i64,
}

#[derive(Default)]
struct Instance {
    start_of_frame: Duration,
    end_of_frame: Duration,
    total_time_sum: Duration,
    frame_time_sum: Duration,
    latency_sum: Duration,
    nframes: u64,
    last_reported_total_time_sum: Duration,
    last_reported_frame_time_sum: Duration,
    last_reported_latency_sum: Duration,
    last_reported_nframes: u64,
}

impl Instance {
    /// compute the delta against the last report and roll the baseline
    ///
    /// the first sample is valid accounting but yields `None`, two samples
    /// are needed for a meaningful delta
    fn report(&mut self) -> Option<FrameStats> {
        let stats = if self.last_reported_total_time_sum > Duration::ZERO {
            let dt = (self.total_time_sum - self.last_reported_total_time_sum).as_micros() as i64;
            let dn = self.nframes - self.last_reported_nframes;
            let df = (self.frame_time_sum - self.last_reported_frame_time_sum).as_micros() as i64;
            let dl = (self.latency_sum - self.last_reported_latency_sum).as_micros() as i64;

            Some(FrameStats {
                frames_per_1000sec: if dt != 0 { dn as i64 * 1_000_000_000 / dt } else { 0 },
                avg_frame_time_usec: if dn != 0 { df / dn as i64 } else { 0 },
                avg_latency_usec: if dn != 0 { dl / dn as i64 } else { 0 },
                frames: dn,
                span_msec: dt / 1000,
            })
        } else {
            None
        };

        self.last_reported_total_time_sum = self.total_time_sum;
        self.last_reported_frame_time_sum = self.frame_time_sum;
        self.last_reported_latency_sum = self.latency_sum;
        self.last_reported_nframes = self.nframes;
        stats
    }
}

struct State {
    instances: HashMap<OutputId, Instance>,
    last_report: Duration,
    last_scheduled: Duration,
}

pub struct FrameReport {
    clock: Arc<dyn Clock>,
    interval: Duration,
    state: Mutex<State>,
}

impl FrameReport {
    pub fn new(clock: Arc<dyn Clock>, interval: Duration) -> FrameReport {
        let last_report = clock.now();
        FrameReport {
            clock,
            interval,
            state: Mutex::new(State {
                instances: HashMap::new(),
                last_report,
                last_scheduled: Duration::ZERO,
            }),
        }
    }

    pub fn added_display(&self, width: u32, height: u32, x: i32, y: i32, id: OutputId) {
        tracing::info!(
            target: "compositor",
            "Added display {:#x}: {}x{} {:+}{:+}",
            id.0, width, height, x, y,
        );
    }

    pub fn started(&self) {
        tracing::info!(target: "compositor", "Started");
    }

    /// clears all accounting, a later `began_frame` starts fresh for any id
    pub fn stopped(&self) {
        tracing::info!(target: "compositor", "Stopped");
        self.state.lock().unwrap().instances.clear();
    }

    /// the compositing loop was scheduled to run, baseline for latency
    pub fn scheduled(&self) {
        let t = self.clock.now();
        self.state.lock().unwrap().last_scheduled = t;
    }

    pub fn began_frame(&self, id: OutputId) {
        let t = self.clock.now();
        let mut state = self.state.lock().unwrap();
        let last_scheduled = state.last_scheduled;
        let inst = state.instances.entry(id).or_default();
        inst.start_of_frame = t;
        inst.latency_sum += t.saturating_sub(last_scheduled);
    }

    /// record end of a compositing pass, logging summaries for every tracked
    /// output once the report interval elapsed. returns what was reported so
    /// callers need not scrape logs, empty when no report was due
    pub fn finished_frame(&self, id: OutputId) -> Vec<(OutputId, FrameStats)> {
        let t = self.clock.now();
        let mut state = self.state.lock().unwrap();
        let inst = state.instances.entry(id).or_default();
        inst.total_time_sum += t.saturating_sub(inst.end_of_frame);
        inst.frame_time_sum += t.saturating_sub(inst.start_of_frame);
        inst.end_of_frame = t;
        inst.nframes += 1;

        let mut reported = Vec::new();
        if t.saturating_sub(state.last_report) >= self.interval {
            state.last_report = t;
            for (&id, inst) in state.instances.iter_mut() {
                if let Some(stats) = inst.report() {
                    log_stats(id, &stats);
                    reported.push((id, stats));
                }
            }
        }
        reported
    }
}

fn log_stats(id: OutputId, stats: &FrameStats) {
    let fps = stats.frames_per_1000sec;
    let ft = stats.avg_frame_time_usec;
    let lat = stats.avg_latency_usec;
    tracing::info!(
        target: "compositor",
        "Display {:#x} averaged {}.{:03} FPS, {}.{:03} ms/frame, latency {}.{:03} ms, {} frames over {}.{:03} sec",
        id.0,
        fps / 1000, fps % 1000,
        ft / 1000, ft % 1000,
        lat / 1000, lat % 1000,
        stats.frames,
        stats.span_msec / 1000, stats.span_msec % 1000,
    );
}

#[cfg(test)]
mod tests {
    use super::*;

    struct FakeClock {
        now: Mutex<Duration>,
    }

    impl FakeClock {
        fn new() -> Arc<FakeClock> {
            Arc::new(FakeClock { now: Mutex::new(Duration::ZERO) })
        }

        fn advance(&self, by: Duration) {
            *self.now.lock().unwrap() += by;
        }
    }

    impl Clock for FakeClock {
        fn now(&self) -> Duration {
            *self.now.lock().unwrap()
        }
    }

    const FRAME: Duration = Duration::from_millis(16);
    const ID: OutputId = OutputId(0x7);

    /// drive `frames` passes at a fixed 16ms cadence, returning every report
    fn run_cadence(
        report: &FrameReport,
        clock: &FakeClock,
        frames: usize,
    ) -> Vec<(OutputId, FrameStats)> {
        let mut reported = Vec::new();
        for _ in 0..frames {
            report.scheduled();
            clock.advance(Duration::from_millis(1));
            report.began_frame(ID);
            clock.advance(FRAME - Duration::from_millis(1));
            reported.extend(report.finished_frame(ID));
        }
        reported
    }

    #[test]
    fn fixed_cadence_yields_expected_averages() {
        let clock = FakeClock::new();
        let report = FrameReport::new(clock.clone(), Duration::from_secs(1));
        report.started();

        // first report only rolls the baseline, the second carries deltas
        let reported = run_cadence(&report, &clock, 150);
        assert!(!reported.is_empty());
        let (id, stats) = reported[reported.len() - 1];
        assert_eq!(id, ID);

        // 16ms cadence is 62.5 FPS, premultiplied 62500 +- rounding
        assert!((stats.frames_per_1000sec - 62_500).abs() <= 100, "{stats:?}");
        // the pass begins 1ms after it was scheduled, so 15ms inside the frame
        assert!((stats.avg_frame_time_usec - 15_000).abs() <= 100, "{stats:?}");
        // latency: began_frame runs 1ms after scheduled()
        assert!((stats.avg_latency_usec - 1_000).abs() <= 100, "{stats:?}");
    }

    #[test]
    fn first_interval_is_suppressed() {
        let clock = FakeClock::new();
        let report = FrameReport::new(clock.clone(), Duration::from_secs(1));

        // 63 frames cross the 1s boundary exactly once
        let reported = run_cadence(&report, &clock, 63);
        assert!(reported.is_empty());
    }

    #[test]
    fn stop_start_accounts_like_a_fresh_id() {
        let clock = FakeClock::new();
        let report = FrameReport::new(clock.clone(), Duration::from_secs(1));

        let first = run_cadence(&report, &clock, 150);
        report.stopped();
        report.started();
        let second = run_cadence(&report, &clock, 150);

        let last = |r: &Vec<(OutputId, FrameStats)>| r.last().unwrap().1;
        let (a, b) = (last(&first), last(&second));
        assert_eq!(a.avg_frame_time_usec, b.avg_frame_time_usec);
        assert_eq!(a.frames_per_1000sec, b.frames_per_1000sec);
    }

    #[test]
    fn untracked_after_stop() {
        let clock = FakeClock::new();
        let report = FrameReport::new(clock.clone(), Duration::from_secs(1));
        run_cadence(&report, &clock, 80);
        report.stopped();

        // one pass after the restart reports nothing, the baseline is fresh
        report.began_frame(ID);
        clock.advance(FRAME);
        assert!(report.finished_frame(ID).is_empty());
    }
}
