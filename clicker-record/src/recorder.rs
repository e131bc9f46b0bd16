use crate::{keymap, Action, ActionKind, ActionLog, Result};
use parking_lot::Mutex;
use rdev::EventType;
use std::{
    sync::{mpsc, Arc},
    thread::{self, JoinHandle},
    time::{Duration, Instant},
};
use tracing::{debug, error, info, warn};

mod rdev_hook;

pub use self::rdev_hook::RdevHook;

/// Configuration for input capture
#[derive(Debug, Clone)]
pub struct CaptureConfig {
    /// Whether to record pointer events (moves, clicks, scrolls)
    pub record_mouse: bool,

    /// Whether to record keyboard events
    pub record_keyboard: bool,

    /// Whether to record pointer moves. Clicks and scrolls still use the
    /// latest pointer position when this is off.
    pub record_mouse_moves: bool,

    /// How long to wait for the OS hook to report an installation failure
    pub hook_install_timeout: Duration,
}

impl Default for CaptureConfig {
    fn default() -> Self {
        Self {
            record_mouse: true,
            record_keyboard: true,
            record_mouse_moves: true, // one action per move, no coalescing
            hook_install_timeout: Duration::from_millis(250),
        }
    }
}

/// A raw event as delivered by an input hook, stamped when the hook saw it
#[derive(Debug, Clone)]
pub struct RawInput {
    pub at: Instant,
    pub event: EventType,
}

/// Callback an input hook feeds raw events into
pub type InputRouter = Box<dyn Fn(RawInput) + Send + Sync>;

/// Source of system-wide input events
pub trait InputHook: Send + Sync {
    /// Start delivering raw events to `router`.
    ///
    /// Fails with [`crate::ClickerError::CaptureUnavailable`] when the OS hook cannot be installed.
    /// On failure the router must be dropped.
    fn attach(&self, router: InputRouter) -> Result<()>;

    /// Stop delivering events and drop the router. Must not return while a router call is in flight.
    fn detach(&self);
}

/// Receives captured actions, one call per action, from a capture channel thread.
/// Implementations must not block.
pub trait ActionSink: Send + Sync + 'static {
    fn deliver(&self, action: Action);
}

impl ActionSink for mpsc::Sender<Action> {
    fn deliver(&self, action: Action) {
        let _ = self.send(action);
    }
}

impl ActionSink for tokio::sync::mpsc::UnboundedSender<Action> {
    fn deliver(&self, action: Action) {
        let _ = self.send(action);
    }
}

/// Adapts a closure into an [`ActionSink`]
pub struct FnSink<F>(F);

/// Wrap a closure so it can receive captured actions
pub fn sink_fn<F>(f: F) -> FnSink<F>
where
    F: Fn(Action) + Send + Sync + 'static,
{
    FnSink(f)
}

impl<F> ActionSink for FnSink<F>
where
    F: Fn(Action) + Send + Sync + 'static,
{
    fn deliver(&self, action: Action) {
        (self.0)(action)
    }
}

/// Shared in-memory log that captured actions are appended to
#[derive(Debug, Clone, Default)]
pub struct ActionBuffer {
    log: Arc<Mutex<ActionLog>>,
}

impl ActionBuffer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Copy of everything captured so far
    pub fn snapshot(&self) -> ActionLog {
        self.log.lock().clone()
    }

    /// Take the captured log, leaving the buffer empty
    pub fn take(&self) -> ActionLog {
        std::mem::take(&mut *self.log.lock())
    }

    pub fn len(&self) -> usize {
        self.log.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.log.lock().is_empty()
    }
}

impl ActionSink for ActionBuffer {
    fn deliver(&self, action: Action) {
        self.log.lock().push(action);
    }
}

/// Whether a capture session is active
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CaptureState {
    Idle,
    Capturing,
}

struct Session {
    started_at: Instant,
    pointer: JoinHandle<()>,
    keyboard: JoinHandle<()>,
}

/// Records system-wide input as timestamped actions
pub struct EventCapture {
    config: CaptureConfig,
    hook: Arc<dyn InputHook>,
    session: Mutex<Option<Session>>,
    last_position: Arc<Mutex<Option<(i32, i32)>>>,
}

impl EventCapture {
    /// Create a capture backed by the global rdev hook
    pub fn new(config: CaptureConfig) -> Self {
        let hook = Arc::new(RdevHook::new(config.hook_install_timeout));
        Self::with_hook(config, hook)
    }

    /// Create a capture backed by a custom input hook
    pub fn with_hook(config: CaptureConfig, hook: Arc<dyn InputHook>) -> Self {
        Self {
            config,
            hook,
            session: Mutex::new(None),
            last_position: Arc::new(Mutex::new(None)),
        }
    }

    pub fn config(&self) -> &CaptureConfig {
        &self.config
    }

    pub fn state(&self) -> CaptureState {
        if self.session.lock().is_some() {
            CaptureState::Capturing
        } else {
            CaptureState::Idle
        }
    }

    /// Start capturing into `sink`.
    ///
    /// Starting while a session is active is a no-op. Hook installation
    /// failures are returned synchronously.
    pub fn start<S: ActionSink>(&self, sink: S) -> Result<()> {
        let mut session = self.session.lock();
        if session.is_some() {
            warn!("Capture already running, ignoring start request");
            return Ok(());
        }

        info!(config = ?self.config, "Starting input capture");

        let sink: Arc<dyn ActionSink> = Arc::new(sink);
        let started_at = Instant::now();
        let (pointer_tx, pointer_rx) = mpsc::channel::<RawInput>();
        let (keyboard_tx, keyboard_rx) = mpsc::channel::<RawInput>();

        let pointer = {
            let sink = Arc::clone(&sink);
            let last_position = Arc::clone(&self.last_position);
            let record_moves = self.config.record_mouse_moves;
            thread::Builder::new()
                .name("clicker-pointer".to_string())
                .spawn(move || {
                    run_pointer_channel(pointer_rx, started_at, sink, last_position, record_moves)
                })?
        };
        let keyboard = thread::Builder::new()
            .name("clicker-keyboard".to_string())
            .spawn(move || run_keyboard_channel(keyboard_rx, started_at, sink))?;

        let router = self.router(pointer_tx, keyboard_tx);
        if let Err(e) = self.hook.attach(router) {
            error!("Failed to attach input hook: {}", e);
            // The router held the only senders, so both channels have already closed.
            let _ = pointer.join();
            let _ = keyboard.join();
            return Err(e);
        }

        *session = Some(Session {
            started_at,
            pointer,
            keyboard,
        });
        info!("Input capture started");
        Ok(())
    }

    /// Stop capturing. When this returns, both channel threads have exited and
    /// the sink will not be called again.
    pub fn stop(&self) {
        let mut guard = self.session.lock();
        let Some(session) = guard.take() else {
            warn!("Capture is not running, ignoring stop request");
            return;
        };

        debug!("Detaching input hook");
        self.hook.detach();

        for (channel, handle) in [("pointer", session.pointer), ("keyboard", session.keyboard)] {
            if handle.join().is_err() {
                error!(channel, "Capture channel thread panicked");
            }
        }

        info!(
            duration_secs = session.started_at.elapsed().as_secs_f64(),
            "Input capture stopped"
        );
    }

    fn router(
        &self,
        pointer_tx: mpsc::Sender<RawInput>,
        keyboard_tx: mpsc::Sender<RawInput>,
    ) -> InputRouter {
        let record_mouse = self.config.record_mouse;
        let record_keyboard = self.config.record_keyboard;

        Box::new(move |input: RawInput| match input.event {
            EventType::KeyPress(_) | EventType::KeyRelease(_) => {
                if record_keyboard {
                    let _ = keyboard_tx.send(input);
                }
            }
            _ => {
                if record_mouse {
                    let _ = pointer_tx.send(input);
                }
            }
        })
    }
}

impl Drop for EventCapture {
    fn drop(&mut self) {
        if self.state() == CaptureState::Capturing {
            self.stop();
        }
    }
}

fn elapsed_secs(started_at: Instant, at: Instant) -> f64 {
    at.saturating_duration_since(started_at).as_secs_f64()
}

/// Saturates deltas that do not fit the recorded width
fn wheel_delta(delta: i64) -> i32 {
    i32::try_from(delta).unwrap_or(if delta < 0 { i32::MIN } else { i32::MAX })
}

fn run_pointer_channel(
    rx: mpsc::Receiver<RawInput>,
    started_at: Instant,
    sink: Arc<dyn ActionSink>,
    last_position: Arc<Mutex<Option<(i32, i32)>>>,
    record_moves: bool,
) {
    for input in rx {
        let kind = match input.event {
            EventType::MouseMove { x, y } => {
                let (x, y) = (x.round() as i32, y.round() as i32);
                *last_position.lock() = Some((x, y));
                if !record_moves {
                    continue;
                }
                ActionKind::MouseMove { x, y }
            }
            EventType::ButtonPress(button) | EventType::ButtonRelease(button) => {
                let Some((x, y)) = *last_position.lock() else {
                    debug!(?button, "Dropping button event, pointer position not known yet");
                    continue;
                };
                ActionKind::MouseClick {
                    x,
                    y,
                    button: keymap::identify_button(button),
                    pressed: matches!(input.event, EventType::ButtonPress(_)),
                }
            }
            EventType::Wheel { delta_x, delta_y } => {
                let Some((x, y)) = *last_position.lock() else {
                    debug!("Dropping wheel event, pointer position not known yet");
                    continue;
                };
                ActionKind::MouseScroll {
                    x,
                    y,
                    dx: wheel_delta(delta_x),
                    dy: wheel_delta(delta_y),
                }
            }
            _ => continue,
        };

        sink.deliver(Action::new(elapsed_secs(started_at, input.at), kind));
    }
    debug!("Pointer channel closed");
}

fn run_keyboard_channel(rx: mpsc::Receiver<RawInput>, started_at: Instant, sink: Arc<dyn ActionSink>) {
    for input in rx {
        let kind = match input.event {
            EventType::KeyPress(key) => ActionKind::KeyPress {
                key: keymap::identify_key(key),
            },
            EventType::KeyRelease(key) => ActionKind::KeyRelease {
                key: keymap::identify_key(key),
            },
            _ => continue,
        };

        sink.deliver(Action::new(elapsed_secs(started_at, input.at), kind));
    }
    debug!("Keyboard channel closed");
}
