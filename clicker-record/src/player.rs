use crate::{
    events::span_of, keymap, Action, ActionKind, ActionLog, ClickerError, MouseButtonId, Result,
};
use parking_lot::Mutex;
use rdev::EventType;
use serde::{Deserialize, Serialize};
use std::{
    fmt,
    num::NonZeroU32,
    sync::{
        atomic::{AtomicBool, Ordering},
        mpsc::{self, RecvTimeoutError},
        Arc,
    },
    thread::{self, JoinHandle},
    time::{Duration, Instant},
};
use tokio::sync::broadcast;
use tokio_stream::Stream;
use tracing::{debug, error, info, warn};

/// Configuration for the replay engine
#[derive(Debug, Clone)]
pub struct ReplayConfig {
    /// Longest single sleep while waiting for the next action; bounds cancellation latency
    pub tick: Duration,

    /// Pause between repeat cycles at speed 1.0, divided by the speed factor
    pub cycle_pause: Duration,

    /// How long `stop()` waits for the replay thread to exit
    pub stop_timeout: Duration,

    /// Interval between progress notifications while waiting for the next action
    pub progress_interval: Duration,

    /// Capacity of the notification channel
    pub event_capacity: usize,
}

impl Default for ReplayConfig {
    fn default() -> Self {
        Self {
            tick: Duration::from_millis(50),
            cycle_pause: Duration::from_millis(500),
            stop_timeout: Duration::from_secs(1),
            progress_interval: Duration::from_millis(250),
            event_capacity: 1024,
        }
    }
}

/// How many times a recording is played back
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RepeatCount {
    Times(NonZeroU32),
    Infinite,
}

impl RepeatCount {
    pub const ONCE: RepeatCount = RepeatCount::Times(NonZeroU32::MIN);

    /// A finite repeat count, rejecting zero
    pub fn finite(times: u32) -> Result<Self> {
        NonZeroU32::new(times)
            .map(RepeatCount::Times)
            .ok_or(ClickerError::InvalidRepeatCount(times))
    }

    /// Number of cycles, `None` when infinite
    pub fn cycles(self) -> Option<u32> {
        match self {
            RepeatCount::Times(n) => Some(n.get()),
            RepeatCount::Infinite => None,
        }
    }

    fn has_more_after(self, completed: u64) -> bool {
        match self {
            RepeatCount::Times(n) => completed < u64::from(n.get()),
            RepeatCount::Infinite => true,
        }
    }
}

impl Default for RepeatCount {
    fn default() -> Self {
        RepeatCount::ONCE
    }
}

impl fmt::Display for RepeatCount {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RepeatCount::Times(n) => write!(f, "{}", n),
            RepeatCount::Infinite => f.write_str("infinite"),
        }
    }
}

/// Whether a playback is in flight
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PlaybackState {
    Idle,
    Running,
}

/// What `play()` did with the request
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LaunchStatus {
    Started,
    /// Another playback was already running
    Ignored,
}

/// Notifications emitted by the replay thread
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "event", content = "data", rename_all = "snake_case")]
pub enum PlaybackEvent {
    Progress { current_ms: u64, total_ms: u64 },
    Finished,
    Error(String),
    Stopped,
}

impl PlaybackEvent {
    /// Whether this event ends a playback
    pub fn is_terminal(&self) -> bool {
        !matches!(self, PlaybackEvent::Progress { .. })
    }
}

/// Reproduces low-level input events on the host
pub trait InputSynthesizer: Send + 'static {
    fn synthesize(&mut self, event: &EventType) -> Result<()>;
}

/// Synthesizes input through `rdev::simulate`
#[derive(Debug, Default)]
pub struct RdevSynthesizer;

impl InputSynthesizer for RdevSynthesizer {
    fn synthesize(&mut self, event: &EventType) -> Result<()> {
        rdev::simulate(event)
            .map_err(|e| ClickerError::ActionSynthesis(format!("{:?} rejected: {:?}", event, e)))
    }
}

/// Translate one action into the input events that reproduce it
pub fn synthesis_events(kind: &ActionKind) -> Result<Vec<EventType>> {
    let events = match kind {
        ActionKind::MouseMove { x, y } => vec![pointer_at(*x, *y)],
        ActionKind::MouseClick {
            x,
            y,
            button,
            pressed,
        } => {
            let button = physical_button(button);
            let event = if *pressed {
                EventType::ButtonPress(button)
            } else {
                EventType::ButtonRelease(button)
            };
            vec![pointer_at(*x, *y), event]
        }
        ActionKind::MouseScroll { x, y, dx, dy } => vec![
            pointer_at(*x, *y),
            EventType::Wheel {
                delta_x: i64::from(*dx),
                delta_y: i64::from(*dy),
            },
        ],
        ActionKind::KeyPress { key } | ActionKind::KeyRelease { key } => {
            let physical = keymap::resolve_key(key)
                .ok_or_else(|| ClickerError::ActionSynthesis(format!("unknown key {}", key)))?;
            if matches!(kind, ActionKind::KeyPress { .. }) {
                vec![EventType::KeyPress(physical)]
            } else {
                vec![EventType::KeyRelease(physical)]
            }
        }
    };
    Ok(events)
}

fn pointer_at(x: i32, y: i32) -> EventType {
    EventType::MouseMove {
        x: f64::from(x),
        y: f64::from(y),
    }
}

fn physical_button(id: &MouseButtonId) -> rdev::Button {
    let (button, known) = keymap::resolve_button(id);
    if !known {
        warn!(button = %id, "Unknown mouse button, using left button");
    }
    button
}

fn secs(value: f64) -> Duration {
    Duration::try_from_secs_f64(value).unwrap_or(Duration::MAX)
}

fn millis(secs: f64) -> u64 {
    (secs * 1000.0).round() as u64
}

/// Playback length estimate: one cycle for infinite repeats, pauses excluded
fn estimated_total(actions: &[Action], repeat: RepeatCount, speed: f64) -> f64 {
    let cycle_secs = span_of(actions) / speed;
    match repeat {
        RepeatCount::Times(n) => cycle_secs * f64::from(n.get()),
        RepeatCount::Infinite => cycle_secs,
    }
}

pub(crate) fn check_speed(speed: f64) -> Result<()> {
    if speed.is_finite() && speed > 0.0 {
        Ok(())
    } else {
        Err(ClickerError::InvalidSpeedFactor(speed))
    }
}

#[derive(Debug)]
struct Status {
    state: PlaybackState,
    generation: u64,
    current_secs: f64,
    total_secs: f64,
}

impl Status {
    fn reset(&mut self) {
        self.state = PlaybackState::Idle;
        self.current_secs = 0.0;
        self.total_secs = 0.0;
    }
}

struct Run {
    generation: u64,
    cancel: Arc<AtomicBool>,
    done_rx: mpsc::Receiver<()>,
    thread: JoinHandle<()>,
}

enum Recording {
    Decoded(Vec<Action>),
    Raw(serde_json::Value),
}

impl Recording {
    fn into_actions(self) -> Result<Vec<Action>> {
        match self {
            Recording::Decoded(actions) => Ok(actions),
            Recording::Raw(value) => {
                let log = ActionLog::from_value(value)?;
                log.validate()?;
                Ok(log.sorted())
            }
        }
    }
}

type SharedSynthesizer = Arc<Mutex<Box<dyn InputSynthesizer>>>;

/// Replays action logs with their recorded timing on a dedicated thread
pub struct ReplayEngine {
    config: ReplayConfig,
    synthesizer: SharedSynthesizer,
    status: Arc<Mutex<Status>>,
    run: Mutex<Option<Run>>,
    event_tx: broadcast::Sender<PlaybackEvent>,
}

impl ReplayEngine {
    /// Create an engine that synthesizes through rdev
    pub fn new(config: ReplayConfig) -> Self {
        Self::with_synthesizer(config, RdevSynthesizer)
    }

    pub fn with_synthesizer<S: InputSynthesizer>(config: ReplayConfig, synthesizer: S) -> Self {
        let (event_tx, _) = broadcast::channel(config.event_capacity.max(1));
        Self {
            config,
            synthesizer: Arc::new(Mutex::new(Box::new(synthesizer))),
            status: Arc::new(Mutex::new(Status {
                state: PlaybackState::Idle,
                generation: 0,
                current_secs: 0.0,
                total_secs: 0.0,
            })),
            run: Mutex::new(None),
            event_tx,
        }
    }

    pub fn config(&self) -> &ReplayConfig {
        &self.config
    }

    /// Subscribe to playback notifications
    pub fn subscribe(&self) -> broadcast::Receiver<PlaybackEvent> {
        self.event_tx.subscribe()
    }

    /// Get a stream of playback notifications
    pub fn event_stream(&self) -> impl Stream<Item = PlaybackEvent> {
        let mut rx = self.event_tx.subscribe();
        Box::pin(async_stream::stream! {
            loop {
                match rx.recv().await {
                    Ok(event) => yield event,
                    Err(broadcast::error::RecvError::Lagged(skipped)) => {
                        debug!(skipped, "Playback event stream lagged");
                    }
                    Err(broadcast::error::RecvError::Closed) => break,
                }
            }
        })
    }

    pub fn state(&self) -> PlaybackState {
        self.status.lock().state
    }

    /// Seconds of playback completed, 0 when idle
    pub fn current_time(&self) -> f64 {
        let status = self.status.lock();
        match status.state {
            PlaybackState::Running => status.current_secs,
            PlaybackState::Idle => 0.0,
        }
    }

    /// Estimated playback length in seconds (pauses excluded), 0 when idle
    pub fn total_time(&self) -> f64 {
        let status = self.status.lock();
        match status.state {
            PlaybackState::Running => status.total_secs,
            PlaybackState::Idle => 0.0,
        }
    }

    /// Start replaying `log`. Returns immediately; completion is reported through
    /// [`PlaybackEvent`] notifications.
    pub fn play(&self, log: &ActionLog, repeat: RepeatCount, speed: f64) -> Result<LaunchStatus> {
        check_speed(speed)?;
        log.validate()?;
        self.launch(Recording::Decoded(log.sorted()), repeat, speed)
    }

    /// Start replaying an undecoded recording. Decoding happens on the replay
    /// thread; malformed data ends the run with [`PlaybackEvent::Error`].
    pub fn play_raw(
        &self,
        recording: serde_json::Value,
        repeat: RepeatCount,
        speed: f64,
    ) -> Result<LaunchStatus> {
        check_speed(speed)?;
        self.launch(Recording::Raw(recording), repeat, speed)
    }

    fn launch(&self, recording: Recording, repeat: RepeatCount, speed: f64) -> Result<LaunchStatus> {
        let mut run_slot = self.run.lock();

        let generation = {
            let mut status = self.status.lock();
            if status.state == PlaybackState::Running {
                warn!("Playback already running, ignoring play request");
                return Ok(LaunchStatus::Ignored);
            }
            status.generation += 1;
            status.state = PlaybackState::Running;
            status.current_secs = 0.0;
            status.total_secs = match &recording {
                Recording::Decoded(actions) => estimated_total(actions, repeat, speed),
                Recording::Raw(_) => 0.0,
            };
            status.generation
        };

        if let Some(previous) = run_slot.take() {
            if previous.thread.is_finished() {
                let _ = previous.thread.join();
            } else {
                debug!(generation = previous.generation, "Leaving stale replay thread detached");
            }
        }

        let cancel = Arc::new(AtomicBool::new(false));
        let (done_tx, done_rx) = mpsc::channel();
        let replay = Replay {
            generation,
            repeat,
            speed,
            config: self.config.clone(),
            cancel: Arc::clone(&cancel),
            status: Arc::clone(&self.status),
            events: self.event_tx.clone(),
            synthesizer: Arc::clone(&self.synthesizer),
        };

        let spawned = thread::Builder::new()
            .name(format!("clicker-replay-{}", generation))
            .spawn(move || {
                replay.run(recording);
                let _ = done_tx.send(());
            });

        let thread = match spawned {
            Ok(thread) => thread,
            Err(e) => {
                error!("Failed to spawn replay thread: {}", e);
                let mut status = self.status.lock();
                if status.generation == generation {
                    status.reset();
                }
                return Err(e.into());
            }
        };

        *run_slot = Some(Run {
            generation,
            cancel,
            done_rx,
            thread,
        });
        info!(generation, %repeat, speed, "Playback started");
        Ok(LaunchStatus::Started)
    }

    /// Cancel the current playback and wait (bounded) for the replay thread to exit.
    /// Safe to call at any time; does nothing when no playback is in flight.
    pub fn stop(&self) {
        let mut run_slot = self.run.lock();
        let Some(run) = run_slot.take() else {
            debug!("No playback to stop");
            return;
        };

        run.cancel.store(true, Ordering::SeqCst);

        match run.done_rx.recv_timeout(self.config.stop_timeout) {
            Ok(()) | Err(RecvTimeoutError::Disconnected) => {
                if run.thread.join().is_err() {
                    error!(generation = run.generation, "Replay thread panicked");
                }
            }
            Err(RecvTimeoutError::Timeout) => {
                warn!(
                    generation = run.generation,
                    timeout = ?self.config.stop_timeout,
                    "Replay thread did not exit in time, marking engine idle"
                );
                let mut status = self.status.lock();
                if status.generation == run.generation && status.state == PlaybackState::Running {
                    // Retire the generation so the stale thread can no longer report.
                    status.generation += 1;
                    status.reset();
                    let _ = self.event_tx.send(PlaybackEvent::Stopped);
                }
            }
        }
    }
}

impl Drop for ReplayEngine {
    fn drop(&mut self) {
        if let Some(run) = self.run.get_mut().take() {
            run.cancel.store(true, Ordering::SeqCst);
        }
    }
}

/// Everything a replay thread owns for one run
struct Replay {
    generation: u64,
    repeat: RepeatCount,
    speed: f64,
    config: ReplayConfig,
    cancel: Arc<AtomicBool>,
    status: Arc<Mutex<Status>>,
    events: broadcast::Sender<PlaybackEvent>,
    synthesizer: SharedSynthesizer,
}

impl Replay {
    fn run(self, recording: Recording) {
        let actions = match recording.into_actions() {
            Ok(actions) => actions,
            Err(e) => {
                error!(generation = self.generation, "Playback aborted: {}", e);
                self.finish(PlaybackEvent::Error(e.to_string()));
                return;
            }
        };

        if actions.is_empty() {
            info!(generation = self.generation, "Nothing to replay");
            self.finish(PlaybackEvent::Finished);
            return;
        }

        let cycle_secs = span_of(&actions) / self.speed;
        let total_secs = estimated_total(&actions, self.repeat, self.speed);
        self.with_status(|status| status.total_secs = total_secs);

        let pause = secs(self.config.cycle_pause.as_secs_f64() / self.speed);
        let mut completed: u64 = 0;

        loop {
            let offset = match self.repeat {
                RepeatCount::Times(_) => completed as f64 * cycle_secs,
                RepeatCount::Infinite => 0.0,
            };

            debug!(generation = self.generation, cycle = completed + 1, "Starting cycle");
            if !self.play_cycle(&actions, offset, total_secs) {
                break;
            }
            completed += 1;

            if !self.repeat.has_more_after(completed) {
                info!(generation = self.generation, cycles = completed, "Playback finished");
                self.finish(PlaybackEvent::Finished);
                return;
            }
            if !self.sleep_until(Instant::now(), pause, None) {
                break;
            }
        }

        info!(generation = self.generation, cycles = completed, "Playback stopped");
        self.finish(PlaybackEvent::Stopped);
    }

    /// Play one cycle; `false` when cancelled
    fn play_cycle(&self, actions: &[Action], offset: f64, total_secs: f64) -> bool {
        let Some(base) = actions.first().map(|a| a.timestamp) else {
            return true;
        };
        let cycle_start = Instant::now();

        for action in actions {
            let target = (action.timestamp - base) / self.speed;
            if !self.sleep_until(cycle_start, secs(target), Some((offset, total_secs))) {
                return false;
            }
            if !self.perform(action) {
                return false;
            }
            self.report(offset + target, total_secs);
        }
        true
    }

    /// Sleep in ticks until `start + target`; `false` when cancelled.
    /// With `progress`, emits periodic progress ticks relative to `start`.
    fn sleep_until(&self, start: Instant, target: Duration, progress: Option<(f64, f64)>) -> bool {
        let mut last_report = Instant::now();
        loop {
            if self.cancelled() {
                return false;
            }
            let elapsed = start.elapsed();
            if elapsed >= target {
                return true;
            }
            if let Some((offset, total_secs)) = progress {
                if last_report.elapsed() >= self.config.progress_interval {
                    self.report(offset + elapsed.as_secs_f64(), total_secs);
                    last_report = Instant::now();
                }
            }
            thread::sleep((target - elapsed).min(self.config.tick));
        }
    }

    /// Synthesize one action; `false` when cancelled part way through
    fn perform(&self, action: &Action) -> bool {
        let events = match synthesis_events(&action.kind) {
            Ok(events) => events,
            Err(e) => {
                warn!(timestamp = action.timestamp, "Skipping {}: {}", action.kind.label(), e);
                return true;
            }
        };

        let mut synthesizer = self.synthesizer.lock();
        for (index, event) in events.iter().enumerate() {
            if index > 0 && self.cancelled() {
                return false;
            }
            if let Err(e) = synthesizer.synthesize(event) {
                warn!(timestamp = action.timestamp, "Failed to replay {}: {}", action.kind.label(), e);
                break;
            }
        }
        true
    }

    fn cancelled(&self) -> bool {
        self.cancel.load(Ordering::SeqCst)
    }

    fn with_status(&self, update: impl FnOnce(&mut Status)) {
        let mut status = self.status.lock();
        if status.generation == self.generation && status.state == PlaybackState::Running {
            update(&mut status);
        }
    }

    fn report(&self, current_secs: f64, total_secs: f64) {
        let current_secs = current_secs.min(total_secs);
        let mut status = self.status.lock();
        if status.generation != self.generation || status.state != PlaybackState::Running {
            return;
        }
        status.current_secs = current_secs;
        let _ = self.events.send(PlaybackEvent::Progress {
            current_ms: millis(current_secs),
            total_ms: millis(total_secs),
        });
    }

    /// Mark the engine idle, then emit the terminal notification.
    /// A stop requested after the last action still ends the run as stopped.
    fn finish(&self, event: PlaybackEvent) {
        let event = match event {
            PlaybackEvent::Finished if self.cancelled() => {
                debug!(generation = self.generation, "Stop arrived after the last action");
                PlaybackEvent::Stopped
            }
            other => other,
        };
        let mut status = self.status.lock();
        if status.generation != self.generation {
            debug!(generation = self.generation, ?event, "Dropping outcome of a retired run");
            return;
        }
        status.reset();
        let _ = self.events.send(event);
    }
}
