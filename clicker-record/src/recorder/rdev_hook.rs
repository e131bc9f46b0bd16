use super::{InputHook, InputRouter, RawInput};
use crate::{ClickerError, Result};
use parking_lot::{const_mutex, Mutex};
use std::{
    sync::mpsc::{self, RecvTimeoutError},
    thread,
    time::{Duration, Instant},
};
use tracing::{debug, error, info};

// rdev::listen installs a process-wide hook and never returns while it is
// healthy, so one listener thread serves every capture session and events are
// routed to whichever session is currently attached.
static LISTENER_RUNNING: Mutex<bool> = const_mutex(false);
static ROUTE: Mutex<Option<InputRouter>> = const_mutex(None);

/// Input hook backed by `rdev::listen`
#[derive(Debug, Clone)]
pub struct RdevHook {
    install_timeout: Duration,
}

impl RdevHook {
    pub fn new(install_timeout: Duration) -> Self {
        Self { install_timeout }
    }
}

impl InputHook for RdevHook {
    fn attach(&self, router: InputRouter) -> Result<()> {
        ensure_listener(self.install_timeout)?;

        let mut route = ROUTE.lock();
        if route.is_some() {
            return Err(ClickerError::CaptureUnavailable(
                "the system input hook is already attached to another capture session".to_string(),
            ));
        }
        *route = Some(router);
        debug!("Input route attached");
        Ok(())
    }

    fn detach(&self) {
        // Taking the lock waits out a router call that is in flight.
        if ROUTE.lock().take().is_some() {
            debug!("Input route detached");
        }
    }
}

fn ensure_listener(install_timeout: Duration) -> Result<()> {
    let mut running = LISTENER_RUNNING.lock();
    if *running {
        return Ok(());
    }

    let (failed_tx, failed_rx) = mpsc::channel::<String>();

    thread::Builder::new()
        .name("clicker-input-hook".to_string())
        .spawn(move || {
            info!("Installing system input hook");
            let result = rdev::listen(|event| {
                let input = RawInput {
                    at: Instant::now(),
                    event: event.event_type,
                };
                if let Some(router) = ROUTE.lock().as_ref() {
                    router(input);
                }
            });

            let message = match result {
                Err(e) => format!("{:?}", e),
                Ok(()) => "input listener exited".to_string(),
            };
            error!("System input hook stopped: {}", message);

            // Report first, the installer may still hold LISTENER_RUNNING.
            let _ = failed_tx.send(message);
            *LISTENER_RUNNING.lock() = false;
        })?;

    match failed_rx.recv_timeout(install_timeout) {
        Ok(message) => Err(ClickerError::CaptureUnavailable(message)),
        Err(RecvTimeoutError::Timeout) => {
            *running = true;
            info!("System input hook installed");
            Ok(())
        }
        Err(RecvTimeoutError::Disconnected) => Err(ClickerError::CaptureUnavailable(
            "input hook thread exited during installation".to_string(),
        )),
    }
}
