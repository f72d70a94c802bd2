//! Closed-loop crawl rate governor.
//!
//! The controller watches a sliding window of fetch outcomes and publishes a
//! `(target_workers, delay)` pair. Workers report one [`Outcome`] per
//! navigation and read the current delay before each fetch; the pool manager
//! reads the worker target on its reconcile tick. The decision table is a
//! pure function over the window so it can be tested without a browser.
//!
//! Publication goes through a `tokio::sync::watch` channel: readers always
//! observe the latest published pair and never an earlier one.

use log::{debug, info};
use parking_lot::Mutex;
use std::collections::VecDeque;
use std::time::{Duration, Instant};
use tokio::sync::watch;

use super::crawl_types::Outcome;

/// Sliding-window length the decision table was tuned for.
pub const DEFAULT_WINDOW_SIZE: usize = 20;

/// Minimum spacing between timer-driven evaluations.
const DECISION_INTERVAL: Duration = Duration::from_secs(2);

/// Controller tunables, fixed for the lifetime of a run.
#[derive(Debug, Clone)]
pub struct Tunables {
    pub min_workers: u32,
    pub max_workers: u32,
    pub min_delay: Duration,
    pub max_delay: Duration,
    pub initial_workers: u32,
    pub initial_delay: Duration,
    /// Steeper backoff multipliers and double worker decrements.
    pub aggressive: bool,
    /// When false the controller holds the initial setpoints forever.
    pub adaptive: bool,
    pub window_size: usize,
}

impl Default for Tunables {
    fn default() -> Self {
        Self {
            min_workers: 1,
            max_workers: num_cpus::get().max(2) as u32,
            min_delay: Duration::from_millis(500),
            max_delay: Duration::from_secs(30),
            initial_workers: 2,
            initial_delay: Duration::from_secs(1),
            aggressive: false,
            adaptive: true,
            window_size: DEFAULT_WINDOW_SIZE,
        }
    }
}

/// The published control pair. `version` increases with every decision that
/// changes either value, giving readers monotonic visibility.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Setpoints {
    pub target_workers: u32,
    pub delay: Duration,
    pub version: u64,
}

/// What one evaluation of the window concluded.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Adjustment {
    /// Rate limiting observed: steep delay growth plus worker shed.
    BackoffRateLimited,
    /// Server errors elevated: gentler delay growth plus worker shed.
    BackoffServerError,
    /// Timeouts elevated: shed one worker, delay unchanged.
    ShedWorker,
    /// Clean window: shrink delay, eventually grow workers.
    Relax,
    Hold,
}

/// Pure decision table over the outcome window (oldest first).
///
/// `window_size` is the configured capacity, not `window.len()`; the
/// relax rule needs a half-window of history before it fires.
#[must_use]
pub fn decide(window: &[Outcome], window_size: usize) -> Adjustment {
    if window.is_empty() {
        return Adjustment::Hold;
    }
    let len = window.len();
    let frac = |count: usize| count as f64 / len as f64;

    let rate_limited = window.iter().filter(|o| **o == Outcome::RateLimited).count();
    let last_five = &window[len.saturating_sub(5)..];
    let recent_rate_limited = last_five
        .iter()
        .filter(|o| **o == Outcome::RateLimited)
        .count();
    if frac(rate_limited) >= 0.20 || recent_rate_limited >= 2 {
        return Adjustment::BackoffRateLimited;
    }

    let server_errors = window.iter().filter(|o| **o == Outcome::ServerError).count();
    if frac(server_errors) >= 0.30 {
        return Adjustment::BackoffServerError;
    }

    let timeouts = window.iter().filter(|o| **o == Outcome::Timeout).count();
    if frac(timeouts) >= 0.25 {
        return Adjustment::ShedWorker;
    }

    let half = (window_size / 2).max(1);
    if len >= half {
        let last_half = &window[len - half..];
        if rate_limited == 0 && last_half.iter().all(|o| *o == Outcome::Success) {
            return Adjustment::Relax;
        }
    }

    Adjustment::Hold
}

/// One outcome with its observation time, retained for checkpointing.
#[derive(Debug, Clone, Copy)]
pub struct OutcomeSample {
    pub outcome: Outcome,
    pub at: Instant,
}

struct ControllerState {
    window: VecDeque<OutcomeSample>,
    setpoints: Setpoints,
    /// Consecutive relax decisions that ended at `min_delay`.
    relax_streak: u32,
    last_evaluated: Instant,
}

/// Adaptive rate controller shared by workers and the pool manager.
pub struct RateController {
    tunables: Tunables,
    state: Mutex<ControllerState>,
    publisher: watch::Sender<Setpoints>,
}

impl RateController {
    #[must_use]
    pub fn new(tunables: Tunables) -> Self {
        let initial = Setpoints {
            target_workers: tunables
                .initial_workers
                .clamp(tunables.min_workers, tunables.max_workers),
            delay: tunables
                .initial_delay
                .clamp(tunables.min_delay, tunables.max_delay),
            version: 0,
        };
        let (publisher, _) = watch::channel(initial);
        Self {
            tunables,
            state: Mutex::new(ControllerState {
                window: VecDeque::with_capacity(DEFAULT_WINDOW_SIZE),
                setpoints: initial,
                relax_streak: 0,
                last_evaluated: Instant::now(),
            }),
            publisher,
        }
    }

    #[must_use]
    pub fn tunables(&self) -> &Tunables {
        &self.tunables
    }

    /// Subscribe to published setpoints. The receiver always yields the
    /// latest value.
    #[must_use]
    pub fn subscribe(&self) -> watch::Receiver<Setpoints> {
        self.publisher.subscribe()
    }

    /// Latest published pair.
    #[must_use]
    pub fn setpoints(&self) -> Setpoints {
        *self.publisher.borrow()
    }

    /// Record one fetch outcome and evaluate the window.
    pub fn record(&self, outcome: Outcome) {
        let mut state = self.state.lock();
        if state.window.len() >= self.tunables.window_size {
            state.window.pop_front();
        }
        state.window.push_back(OutcomeSample {
            outcome,
            at: Instant::now(),
        });
        self.evaluate(&mut state);
    }

    /// Timer-driven evaluation; the manager calls this so decisions happen
    /// at least every two seconds even while no outcomes arrive.
    pub fn tick(&self) {
        let mut state = self.state.lock();
        if state.last_evaluated.elapsed() >= DECISION_INTERVAL {
            self.evaluate(&mut state);
        }
    }

    fn evaluate(&self, state: &mut ControllerState) {
        state.last_evaluated = Instant::now();
        if !self.tunables.adaptive {
            return;
        }

        let outcomes: Vec<Outcome> = state.window.iter().map(|s| s.outcome).collect();
        let adjustment = decide(&outcomes, self.tunables.window_size);
        let t = &self.tunables;
        let mut sp = state.setpoints;

        match adjustment {
            Adjustment::BackoffRateLimited => {
                state.relax_streak = 0;
                let mult = if t.aggressive { 2.0 } else { 1.5 };
                sp.delay = clamp_delay(sp.delay.mul_f64(mult), t);
                let dec = if t.aggressive { 2 } else { 1 };
                sp.target_workers = sp.target_workers.saturating_sub(dec).max(t.min_workers);
            }
            Adjustment::BackoffServerError => {
                state.relax_streak = 0;
                sp.delay = clamp_delay(sp.delay.mul_f64(1.25), t);
                let dec = if t.aggressive { 2 } else { 1 };
                sp.target_workers = sp.target_workers.saturating_sub(dec).max(t.min_workers);
            }
            Adjustment::ShedWorker => {
                state.relax_streak = 0;
                sp.target_workers = sp.target_workers.saturating_sub(1).max(t.min_workers);
            }
            Adjustment::Relax => {
                sp.delay = clamp_delay(sp.delay.mul_f64(0.9), t);
                if sp.delay == t.min_delay {
                    state.relax_streak += 1;
                    let half = (t.window_size / 2).max(1) as u32;
                    if state.relax_streak >= half {
                        sp.target_workers = (sp.target_workers + 1).min(t.max_workers);
                        state.relax_streak = 0;
                    }
                } else {
                    state.relax_streak = 0;
                }
            }
            Adjustment::Hold => {
                state.relax_streak = 0;
                return;
            }
        }

        if sp.target_workers != state.setpoints.target_workers
            || sp.delay != state.setpoints.delay
        {
            sp.version = state.setpoints.version + 1;
            debug!(
                "controller decision {:?}: workers {} -> {}, delay {:.2}s -> {:.2}s",
                adjustment,
                state.setpoints.target_workers,
                sp.target_workers,
                state.setpoints.delay.as_secs_f64(),
                sp.delay.as_secs_f64()
            );
            state.setpoints = sp;
            self.publisher.send_replace(sp);
        }
    }

    /// Consistent view of the window for checkpointing: outcome plus age in
    /// seconds at snapshot time.
    #[must_use]
    pub fn window_snapshot(&self) -> Vec<(Outcome, f64)> {
        let state = self.state.lock();
        state
            .window
            .iter()
            .map(|s| (s.outcome, s.at.elapsed().as_secs_f64()))
            .collect()
    }

    /// Restore setpoints and window from a checkpoint, clamping into the
    /// configured bounds so the published invariant holds from the first
    /// observation.
    pub fn restore(&self, delay: Duration, target_workers: u32, window: Vec<Outcome>) {
        let t = &self.tunables;
        let mut state = self.state.lock();
        let restored = Setpoints {
            target_workers: target_workers.clamp(t.min_workers, t.max_workers),
            delay: delay.clamp(t.min_delay, t.max_delay),
            version: state.setpoints.version + 1,
        };
        state.window.clear();
        let now = Instant::now();
        for outcome in window.into_iter().rev().take(t.window_size).rev() {
            state.window.push_back(OutcomeSample { outcome, at: now });
        }
        state.relax_streak = 0;
        state.setpoints = restored;
        info!(
            "controller restored: {} workers, {:.2}s delay, {} window samples",
            restored.target_workers,
            restored.delay.as_secs_f64(),
            state.window.len()
        );
        self.publisher.send_replace(restored);
    }
}

fn clamp_delay(delay: Duration, t: &Tunables) -> Duration {
    delay.clamp(t.min_delay, t.max_delay)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn tunables() -> Tunables {
        Tunables {
            min_workers: 1,
            max_workers: 4,
            min_delay: Duration::from_millis(500),
            max_delay: Duration::from_secs(30),
            initial_workers: 2,
            initial_delay: Duration::from_secs(1),
            aggressive: false,
            adaptive: true,
            window_size: DEFAULT_WINDOW_SIZE,
        }
    }

    #[test]
    fn decide_backs_off_on_rate_limit_fraction() {
        let mut window = vec![Outcome::Success; 16];
        window.extend([Outcome::RateLimited; 4]);
        assert_eq!(
            decide(&window, DEFAULT_WINDOW_SIZE),
            Adjustment::BackoffRateLimited
        );
    }

    #[test]
    fn decide_backs_off_on_two_recent_rate_limits() {
        // Only 2/20 = 10% overall, but both inside the last five.
        let mut window = vec![Outcome::Success; 18];
        window.push(Outcome::RateLimited);
        window.push(Outcome::RateLimited);
        assert_eq!(
            decide(&window, DEFAULT_WINDOW_SIZE),
            Adjustment::BackoffRateLimited
        );
    }

    #[test]
    fn decide_server_error_and_timeout_thresholds() {
        let mut window = vec![Outcome::Success; 14];
        window.extend([Outcome::ServerError; 6]);
        assert_eq!(
            decide(&window, DEFAULT_WINDOW_SIZE),
            Adjustment::BackoffServerError
        );

        let mut window = vec![Outcome::Success; 15];
        window.extend([Outcome::Timeout; 5]);
        assert_eq!(decide(&window, DEFAULT_WINDOW_SIZE), Adjustment::ShedWorker);
    }

    #[test]
    fn decide_relax_requires_clean_half_window() {
        let window = vec![Outcome::Success; 10];
        assert_eq!(decide(&window, DEFAULT_WINDOW_SIZE), Adjustment::Relax);

        // too little history
        let window = vec![Outcome::Success; 5];
        assert_eq!(decide(&window, DEFAULT_WINDOW_SIZE), Adjustment::Hold);

        // one old rate limit anywhere in the window blocks relaxation
        let mut window = vec![Outcome::RateLimited];
        window.extend(vec![Outcome::Success; 19]);
        assert_ne!(decide(&window, DEFAULT_WINDOW_SIZE), Adjustment::Relax);
    }

    #[test]
    fn rate_limits_drive_to_max_delay_min_workers_and_no_further() {
        let controller = RateController::new(tunables());
        for _ in 0..40 {
            controller.record(Outcome::RateLimited);
        }
        let sp = controller.setpoints();
        assert_eq!(sp.delay, Duration::from_secs(30));
        assert_eq!(sp.target_workers, 1);
    }

    #[test]
    fn successes_drive_toward_min_delay_and_max_workers() {
        let controller = RateController::new(tunables());
        let mut last_delay = controller.setpoints().delay;
        for _ in 0..200 {
            controller.record(Outcome::Success);
            let delay = controller.setpoints().delay;
            assert!(delay <= last_delay, "delay must shrink monotonically");
            last_delay = delay;
        }
        let sp = controller.setpoints();
        assert_eq!(sp.delay, Duration::from_millis(500));
        assert_eq!(sp.target_workers, 4);
    }

    #[test]
    fn aggressive_mode_doubles_backoff() {
        let mut t = tunables();
        t.aggressive = true;
        t.initial_workers = 4;
        let controller = RateController::new(t);
        controller.record(Outcome::RateLimited);
        controller.record(Outcome::RateLimited);
        let sp = controller.setpoints();
        // one decision fires per record once the threshold is met
        assert!(sp.delay >= Duration::from_secs(2));
        assert!(sp.target_workers <= 2);
    }

    #[test]
    fn setpoints_stay_within_bounds() {
        let controller = RateController::new(tunables());
        let t = controller.tunables().clone();
        for outcome in [
            Outcome::RateLimited,
            Outcome::ServerError,
            Outcome::Timeout,
            Outcome::Success,
        ]
        .into_iter()
        .cycle()
        .take(200)
        {
            controller.record(outcome);
            let sp = controller.setpoints();
            assert!(sp.delay >= t.min_delay && sp.delay <= t.max_delay);
            assert!(sp.target_workers >= t.min_workers && sp.target_workers <= t.max_workers);
        }
    }

    #[test]
    fn non_adaptive_mode_holds_setpoints() {
        let mut t = tunables();
        t.adaptive = false;
        let controller = RateController::new(t);
        let before = controller.setpoints();
        for _ in 0..50 {
            controller.record(Outcome::RateLimited);
        }
        assert_eq!(controller.setpoints(), before);
    }

    #[test]
    fn restore_clamps_into_bounds() {
        let controller = RateController::new(tunables());
        controller.restore(Duration::from_secs(120), 99, vec![Outcome::Success]);
        let sp = controller.setpoints();
        assert_eq!(sp.delay, Duration::from_secs(30));
        assert_eq!(sp.target_workers, 4);
    }
}
