use crate::{
    player::check_speed, ActionLog, ClickerError, LaunchStatus, PlaybackEvent, PlaybackState,
    ReplayEngine, RepeatCount, Result,
};
use chrono::{Local, NaiveDateTime, NaiveTime, TimeDelta};
use std::{sync::Arc, time::Duration};
use tokio::{
    sync::{broadcast::error::RecvError, watch},
    task::JoinHandle,
    time::Instant,
};
use tracing::{debug, info, warn};

/// When and how often a recording is played
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Schedule {
    /// Play immediately
    Once,
    /// Play one cycle now and then one per `interval`, measured launch to launch
    Every { interval: Duration, runs: RepeatCount },
    /// Play at the next local occurrence of `time`
    At { time: NaiveTime },
}

/// How a schedule ended
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScheduleOutcome {
    Completed,
    Cancelled,
}

/// Time left until the next occurrence of `at`, today or tomorrow
pub fn delay_until(now: NaiveDateTime, at: NaiveTime) -> Duration {
    let today = now.date().and_time(at);
    let target = if today >= now {
        today
    } else {
        today + TimeDelta::days(1)
    };
    (target - now).to_std().unwrap_or_default()
}

/// Handle to a running schedule. Dropping it cancels the schedule.
pub struct ScheduleHandle {
    cancel_tx: watch::Sender<bool>,
    task: JoinHandle<Result<ScheduleOutcome>>,
}

impl ScheduleHandle {
    /// Cancel pending timers and stop the playback in flight
    pub fn cancel(&self) {
        let _ = self.cancel_tx.send(true);
    }

    pub fn is_finished(&self) -> bool {
        self.task.is_finished()
    }

    /// Wait for the schedule to end. Must not be called again once it has returned.
    pub async fn wait(&mut self) -> Result<ScheduleOutcome> {
        (&mut self.task)
            .await
            .map_err(|e| ClickerError::ScheduleAborted(format!("schedule task failed: {}", e)))?
    }
}

enum RunResult {
    Finished,
    Skipped,
    Cancelled,
}

/// Triggers playbacks on a [`ReplayEngine`] and follows their outcome
#[derive(Clone)]
pub struct ScheduleDriver {
    engine: Arc<ReplayEngine>,
}

impl ScheduleDriver {
    pub fn new(engine: Arc<ReplayEngine>) -> Self {
        Self { engine }
    }

    pub fn engine(&self) -> &Arc<ReplayEngine> {
        &self.engine
    }

    /// Play `log` once with `repeat` and wait for the outcome
    pub async fn trigger_playback(
        &self,
        log: &ActionLog,
        repeat: RepeatCount,
        speed: f64,
    ) -> Result<ScheduleOutcome> {
        let (_cancel_tx, mut cancel_rx) = watch::channel(false);
        match launch_and_wait(&self.engine, log, repeat, speed, &mut cancel_rx).await? {
            RunResult::Finished => Ok(ScheduleOutcome::Completed),
            RunResult::Cancelled => Ok(ScheduleOutcome::Cancelled),
            RunResult::Skipped => Err(ClickerError::EngineBusy),
        }
    }

    /// Start `schedule` on a tokio task. Must be called from within a tokio runtime.
    ///
    /// `repeat` applies to `Once` and `At`; `Every` plays one cycle per trigger.
    pub fn start(
        &self,
        schedule: Schedule,
        log: ActionLog,
        repeat: RepeatCount,
        speed: f64,
    ) -> Result<ScheduleHandle> {
        check_speed(speed)?;
        log.validate()?;
        if let Schedule::Every { interval, .. } = schedule {
            if interval.is_zero() {
                return Err(ClickerError::InvalidSchedule(
                    "interval must be greater than zero".to_string(),
                ));
            }
        }

        info!(?schedule, %repeat, speed, actions = log.len(), "Starting schedule");

        let (cancel_tx, cancel_rx) = watch::channel(false);
        let engine = Arc::clone(&self.engine);
        let task = tokio::spawn(drive(engine, schedule, log, repeat, speed, cancel_rx));

        Ok(ScheduleHandle { cancel_tx, task })
    }
}

async fn drive(
    engine: Arc<ReplayEngine>,
    schedule: Schedule,
    log: ActionLog,
    repeat: RepeatCount,
    speed: f64,
    mut cancel: watch::Receiver<bool>,
) -> Result<ScheduleOutcome> {
    let outcome = match schedule {
        Schedule::Once => run_once(&engine, &log, repeat, speed, &mut cancel).await,
        Schedule::At { time } => {
            let delay = delay_until(Local::now().naive_local(), time);
            info!(%time, delay_secs = delay.as_secs(), "Waiting for scheduled time");
            if sleep_or_cancel(Instant::now() + delay, &mut cancel).await {
                run_once(&engine, &log, repeat, speed, &mut cancel).await
            } else {
                Ok(ScheduleOutcome::Cancelled)
            }
        }
        Schedule::Every { interval, runs } => {
            run_every(&engine, &log, interval, runs, speed, &mut cancel).await
        }
    };

    match &outcome {
        Ok(outcome) => info!(?outcome, "Schedule ended"),
        Err(e) => warn!("Schedule aborted: {}", e),
    }
    outcome
}

async fn run_once(
    engine: &Arc<ReplayEngine>,
    log: &ActionLog,
    repeat: RepeatCount,
    speed: f64,
    cancel: &mut watch::Receiver<bool>,
) -> Result<ScheduleOutcome> {
    match launch_and_wait(engine, log, repeat, speed, cancel).await? {
        RunResult::Finished => Ok(ScheduleOutcome::Completed),
        RunResult::Cancelled => Ok(ScheduleOutcome::Cancelled),
        RunResult::Skipped => Err(ClickerError::EngineBusy),
    }
}

async fn run_every(
    engine: &Arc<ReplayEngine>,
    log: &ActionLog,
    interval: Duration,
    runs: RepeatCount,
    speed: f64,
    cancel: &mut watch::Receiver<bool>,
) -> Result<ScheduleOutcome> {
    let mut completed: u32 = 0;

    loop {
        let launched_at = Instant::now();
        match launch_and_wait(engine, log, RepeatCount::ONCE, speed, cancel).await? {
            RunResult::Finished => {
                completed += 1;
                info!(completed, total = %runs, "Scheduled run finished");
            }
            RunResult::Skipped => warn!("Replay engine busy, skipping scheduled run"),
            RunResult::Cancelled => return Ok(ScheduleOutcome::Cancelled),
        }

        if runs.cycles().is_some_and(|total| completed >= total) {
            return Ok(ScheduleOutcome::Completed);
        }
        if !sleep_or_cancel(launched_at + interval, cancel).await {
            return Ok(ScheduleOutcome::Cancelled);
        }
    }
}

/// Launch one playback and follow its notifications until it ends
async fn launch_and_wait(
    engine: &Arc<ReplayEngine>,
    log: &ActionLog,
    repeat: RepeatCount,
    speed: f64,
    cancel: &mut watch::Receiver<bool>,
) -> Result<RunResult> {
    if *cancel.borrow() {
        return Ok(RunResult::Cancelled);
    }

    // Subscribe only once the engine is idle so an earlier run's outcome is never seen.
    if engine.state() == PlaybackState::Running {
        return Ok(RunResult::Skipped);
    }
    let mut events = engine.subscribe();
    if engine.play(log, repeat, speed)? == LaunchStatus::Ignored {
        return Ok(RunResult::Skipped);
    }

    loop {
        tokio::select! {
            _ = cancelled(cancel) => {
                debug!("Schedule cancelled, stopping playback");
                let engine = Arc::clone(engine);
                if let Err(e) = tokio::task::spawn_blocking(move || engine.stop()).await {
                    warn!("Failed to stop replay engine: {}", e);
                }
                return Ok(RunResult::Cancelled);
            }
            event = events.recv() => match event {
                Ok(PlaybackEvent::Progress { current_ms, total_ms }) => {
                    debug!(current_ms, total_ms, "Playback progress");
                }
                Ok(PlaybackEvent::Finished) => return Ok(RunResult::Finished),
                Ok(PlaybackEvent::Stopped) => return Ok(RunResult::Cancelled),
                Ok(PlaybackEvent::Error(message)) => {
                    return Err(ClickerError::ScheduleAborted(message));
                }
                Err(RecvError::Lagged(skipped)) => {
                    debug!(skipped, "Schedule fell behind playback notifications");
                }
                Err(RecvError::Closed) => {
                    return Err(ClickerError::ScheduleAborted(
                        "replay engine was dropped".to_string(),
                    ));
                }
            }
        }
    }
}

/// Resolves once cancellation is requested or the handle is gone
async fn cancelled(cancel: &mut watch::Receiver<bool>) {
    loop {
        if *cancel.borrow_and_update() {
            return;
        }
        if cancel.changed().await.is_err() {
            return;
        }
    }
}

/// `false` when cancelled before `deadline`
async fn sleep_or_cancel(deadline: Instant, cancel: &mut watch::Receiver<bool>) -> bool {
    tokio::select! {
        _ = tokio::time::sleep_until(deadline) => true,
        _ = cancelled(cancel) => false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{Action, InputSynthesizer, KeyIdentifier, ReplayConfig};
    use chrono::NaiveDate;
    use parking_lot::Mutex;
    use rdev::EventType;

    #[derive(Clone, Default)]
    struct CountingSynthesizer {
        presses: Arc<Mutex<Vec<std::time::Instant>>>,
    }

    impl InputSynthesizer for CountingSynthesizer {
        fn synthesize(&mut self, event: &EventType) -> Result<()> {
            if matches!(event, EventType::KeyPress(_)) {
                self.presses.lock().push(std::time::Instant::now());
            }
            Ok(())
        }
    }

    fn driver() -> (ScheduleDriver, Arc<Mutex<Vec<std::time::Instant>>>) {
        let synthesizer = CountingSynthesizer::default();
        let presses = Arc::clone(&synthesizer.presses);
        let config = ReplayConfig {
            cycle_pause: Duration::from_millis(20),
            ..ReplayConfig::default()
        };
        let engine = Arc::new(ReplayEngine::with_synthesizer(config, synthesizer));
        (ScheduleDriver::new(engine), presses)
    }

    fn tap_log(span: f64) -> ActionLog {
        vec![
            Action::key_press(0.0, KeyIdentifier::Char('a')),
            Action::key_release(span, KeyIdentifier::Char('a')),
        ]
        .into()
    }

    fn at(h: u32, m: u32, s: u32) -> NaiveDateTime {
        NaiveDate::from_ymd_opt(2024, 3, 1)
            .and_then(|d| d.and_hms_opt(h, m, s))
            .unwrap()
    }

    #[test]
    fn test_delay_until_later_today() {
        let time = NaiveTime::from_hms_opt(12, 30, 0).unwrap();
        assert_eq!(delay_until(at(12, 0, 0), time), Duration::from_secs(30 * 60));
    }

    #[test]
    fn test_delay_until_rolls_over_to_tomorrow() {
        let time = NaiveTime::from_hms_opt(8, 0, 0).unwrap();
        assert_eq!(
            delay_until(at(9, 0, 0), time),
            Duration::from_secs(23 * 3600)
        );
    }

    #[test]
    fn test_delay_until_now_is_immediate() {
        let time = NaiveTime::from_hms_opt(9, 0, 0).unwrap();
        assert_eq!(delay_until(at(9, 0, 0), time), Duration::ZERO);
    }

    #[tokio::test]
    async fn test_once_completes() {
        let (driver, presses) = driver();

        let mut handle = driver
            .start(Schedule::Once, tap_log(0.01), RepeatCount::finite(2).unwrap(), 1.0)
            .unwrap();
        let outcome = tokio::time::timeout(Duration::from_secs(5), handle.wait())
            .await
            .unwrap()
            .unwrap();

        assert_eq!(outcome, ScheduleOutcome::Completed);
        assert_eq!(presses.lock().len(), 2);
        assert_eq!(driver.engine().state(), PlaybackState::Idle);
    }

    #[tokio::test]
    async fn test_every_plays_one_cycle_per_interval() {
        let (driver, presses) = driver();
        let schedule = Schedule::Every {
            interval: Duration::from_millis(100),
            runs: RepeatCount::finite(3).unwrap(),
        };

        let mut handle = driver
            .start(schedule, tap_log(0.01), RepeatCount::finite(5).unwrap(), 1.0)
            .unwrap();
        let outcome = tokio::time::timeout(Duration::from_secs(5), handle.wait())
            .await
            .unwrap()
            .unwrap();

        assert_eq!(outcome, ScheduleOutcome::Completed);
        let presses = presses.lock();
        assert_eq!(presses.len(), 3);
        for pair in presses.windows(2) {
            assert!(pair[1].duration_since(pair[0]) >= Duration::from_millis(90));
        }
    }

    #[tokio::test]
    async fn test_cancel_stops_infinite_schedule() {
        let (driver, presses) = driver();
        let schedule = Schedule::Every {
            interval: Duration::from_millis(30),
            runs: RepeatCount::Infinite,
        };

        let mut handle = driver
            .start(schedule, tap_log(0.01), RepeatCount::ONCE, 1.0)
            .unwrap();
        tokio::time::sleep(Duration::from_millis(150)).await;
        handle.cancel();

        let outcome = tokio::time::timeout(Duration::from_secs(5), handle.wait())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(outcome, ScheduleOutcome::Cancelled);
        assert!(!presses.lock().is_empty());
        assert_eq!(driver.engine().state(), PlaybackState::Idle);
    }

    #[tokio::test]
    async fn test_cancel_stops_running_playback() {
        let (driver, presses) = driver();

        let mut handle = driver
            .start(Schedule::Once, tap_log(10.0), RepeatCount::ONCE, 1.0)
            .unwrap();
        tokio::time::sleep(Duration::from_millis(100)).await;
        assert_eq!(driver.engine().state(), PlaybackState::Running);
        handle.cancel();

        let outcome = tokio::time::timeout(Duration::from_secs(5), handle.wait())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(outcome, ScheduleOutcome::Cancelled);
        assert_eq!(presses.lock().len(), 1);
        assert_eq!(driver.engine().state(), PlaybackState::Idle);
    }

    #[tokio::test]
    async fn test_cancel_while_waiting_for_time() {
        let (driver, presses) = driver();
        let time = (Local::now() - TimeDelta::minutes(1)).time();

        let mut handle = driver
            .start(Schedule::At { time }, tap_log(0.01), RepeatCount::ONCE, 1.0)
            .unwrap();
        tokio::time::sleep(Duration::from_millis(20)).await;
        handle.cancel();

        let outcome = tokio::time::timeout(Duration::from_secs(5), handle.wait())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(outcome, ScheduleOutcome::Cancelled);
        assert!(presses.lock().is_empty());
    }

    #[tokio::test]
    async fn test_once_on_busy_engine_is_an_error() {
        let (driver, _) = driver();
        driver
            .engine()
            .play(&tap_log(10.0), RepeatCount::ONCE, 1.0)
            .unwrap();

        let mut handle = driver
            .start(Schedule::Once, tap_log(0.01), RepeatCount::ONCE, 1.0)
            .unwrap();
        let result = tokio::time::timeout(Duration::from_secs(5), handle.wait())
            .await
            .unwrap();
        assert!(matches!(result, Err(ClickerError::EngineBusy)));

        driver.engine().stop();
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_every_skips_busy_triggers() {
        let (driver, presses) = driver();
        driver
            .engine()
            .play(&tap_log(10.0), RepeatCount::ONCE, 1.0)
            .unwrap();

        let schedule = Schedule::Every {
            interval: Duration::from_millis(50),
            runs: RepeatCount::ONCE,
        };
        let mut handle = driver
            .start(schedule, tap_log(0.01), RepeatCount::ONCE, 1.0)
            .unwrap();

        tokio::time::sleep(Duration::from_millis(150)).await;
        assert!(!handle.is_finished());
        let engine = Arc::clone(driver.engine());
        tokio::task::spawn_blocking(move || engine.stop())
            .await
            .unwrap();

        let outcome = tokio::time::timeout(Duration::from_secs(5), handle.wait())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(outcome, ScheduleOutcome::Completed);
        // one press from the external playback, one from the scheduled run
        assert_eq!(presses.lock().len(), 2);
    }

    #[tokio::test]
    async fn test_trigger_playback_waits_for_outcome() {
        let (driver, presses) = driver();
        let outcome = driver
            .trigger_playback(&tap_log(0.01), RepeatCount::finite(3).unwrap(), 4.0)
            .await
            .unwrap();
        assert_eq!(outcome, ScheduleOutcome::Completed);
        assert_eq!(presses.lock().len(), 3);
    }

    #[test]
    fn test_zero_interval_is_rejected() {
        let (driver, _) = driver();
        let schedule = Schedule::Every {
            interval: Duration::ZERO,
            runs: RepeatCount::Infinite,
        };
        let err = driver
            .start(schedule, tap_log(0.01), RepeatCount::ONCE, 1.0)
            .err()
            .unwrap();
        assert!(matches!(err, ClickerError::InvalidSchedule(_)));
    }

    #[test]
    fn test_invalid_speed_is_rejected_up_front() {
        let (driver, _) = driver();
        let err = driver
            .start(Schedule::Once, tap_log(0.01), RepeatCount::ONCE, 0.0)
            .err()
            .unwrap();
        assert!(matches!(err, ClickerError::InvalidSpeedFactor(_)));
    }
}
