use crate::collect::Progress;
use core::fmt::{Debug, Formatter};
use core::sync::atomic::{AtomicBool, Ordering};
use core::time::Duration;
use indicatif::{ProgressBar, ProgressDrawTarget, ProgressStyle};
use std::sync::{Arc, Mutex};
use std::time::Instant;
use tokio::task::JoinHandle;

type StatusCallback = Box<dyn Fn() -> (u64, u64, String) + Send + Sync>;

/// Redraws per second.
const REFRESH_HZ: u8 = 10;

const BAR_TEMPLATE: &str = "{prefix:>12.bold.cyan} [{bar:25}] {pos}/{len} {msg}";
const BAR_TEMPLATE_PLAIN: &str = "{prefix:>12} [{bar:25}] {pos}/{len} {msg}";
const SPINNER_TEMPLATE: &str = "{prefix:>12.bold.cyan} {spinner} {msg}";
const SPINNER_TEMPLATE_PLAIN: &str = "{prefix:>12} {spinner} {msg}";
const SPINNER_TICKS: [&str; 8] = ["[=   ]", "[==  ]", "[=== ]", "[ ===]", "[  ==]", "[   =]", "[    ]", "[    ]"];

#[derive(Debug)]
struct RevealState {
    reveal_at: Instant,
    revealed: AtomicBool,
    spinning: AtomicBool,
    phase_started: Mutex<Instant>,
}

/// Progress indicator on stderr that only appears once a run has lasted longer than
/// a grace period, so short runs and runs with logging enabled stay quiet.
#[derive(Clone)]
pub struct ProgressReporter {
    bar: ProgressBar,
    state: Arc<RevealState>,
    status: Arc<Mutex<StatusCallback>>,
    refresher: Arc<JoinHandle<()>>,
    use_colors: bool,
}

impl ProgressReporter {
    /// Must be called from within a tokio runtime.
    #[must_use]
    pub fn new(delay: Duration, use_colors: bool) -> Self {
        let bar = ProgressBar::with_draw_target(None, ProgressDrawTarget::hidden());
        let state = Arc::new(RevealState {
            reveal_at: Instant::now() + delay,
            revealed: AtomicBool::new(false),
            spinning: AtomicBool::new(false),
            phase_started: Mutex::new(Instant::now()),
        });
        let status: Arc<Mutex<StatusCallback>> = Arc::new(Mutex::new(Box::new(|| (0, 0, String::new()))));

        Self {
            refresher: Arc::new(tokio::spawn(refresh(bar.clone(), Arc::clone(&state), Arc::clone(&status)))),
            bar,
            state,
            status,
            use_colors,
        }
    }

    fn set_status(&self, callback: StatusCallback) {
        if let Ok(mut status) = self.status.lock() {
            *status = callback;
        }
    }

    fn restart_clock(&self) {
        if let Ok(mut started) = self.state.phase_started.lock() {
            *started = Instant::now();
        }
    }
}

impl Progress for ProgressReporter {
    fn set_phase(&self, phase: &str) {
        self.bar.set_prefix(phase.to_string());
        self.restart_clock();
    }

    fn set_determinate(&self, callback: Box<dyn Fn() -> (u64, u64, String) + Send + Sync + 'static>) {
        self.set_status(callback);
        self.state.spinning.store(false, Ordering::Relaxed);
        self.bar.disable_steady_tick();
        self.bar.set_length(0);
        self.bar.set_position(0);

        let template = if self.use_colors { BAR_TEMPLATE } else { BAR_TEMPLATE_PLAIN };
        if let Ok(style) = ProgressStyle::default_bar().template(template) {
            self.bar.set_style(style.progress_chars("=> "));
        }
    }

    fn set_indeterminate(&self, callback: Box<dyn Fn() -> String + Send + Sync + 'static>) {
        self.set_status(Box::new(move || (0, 0, callback())));
        self.restart_clock();
        self.state.spinning.store(true, Ordering::Relaxed);
        self.bar.enable_steady_tick(Duration::from_millis(1000 / u64::from(REFRESH_HZ)));

        let template = if self.use_colors { SPINNER_TEMPLATE } else { SPINNER_TEMPLATE_PLAIN };
        if let Ok(style) = ProgressStyle::default_spinner().template(template) {
            self.bar.set_style(style.tick_strings(&SPINNER_TICKS));
        }
    }

    fn println(&self, msg: &str) {
        self.bar.suspend(|| eprintln!("{msg}"));
    }

    fn done(&self) {
        self.refresher.abort();
        if self.state.revealed.load(Ordering::Relaxed) {
            self.bar.finish_and_clear();
        }
    }
}

impl Debug for ProgressReporter {
    fn fmt(&self, f: &mut Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("ProgressReporter")
            .field("bar", &self.bar)
            .field("state", &self.state)
            .field("use_colors", &self.use_colors)
            .finish_non_exhaustive()
    }
}

async fn refresh(bar: ProgressBar, state: Arc<RevealState>, status: Arc<Mutex<StatusCallback>>) {
    let mut interval = tokio::time::interval(Duration::from_millis(1000 / u64::from(REFRESH_HZ)));
    #[expect(clippy::infinite_loop, reason = "task runs until aborted")]
    loop {
        let _ = interval.tick().await;

        if !state.revealed.load(Ordering::Relaxed) {
            if Instant::now() < state.reveal_at {
                continue;
            }
            state.revealed.store(true, Ordering::Relaxed);
            bar.set_draw_target(ProgressDrawTarget::stderr_with_hz(REFRESH_HZ));
        }

        let Some((length, position, mut message)) = status.lock().ok().map(|callback| callback()) else {
            continue;
        };

        if state.spinning.load(Ordering::Relaxed)
            && let Ok(started) = state.phase_started.lock()
        {
            message = format!("{}s: {message}", started.elapsed().as_secs());
        }

        if length > 0 {
            bar.set_length(length);
            bar.set_position(position);
        }
        bar.set_message(message);
    }
}
