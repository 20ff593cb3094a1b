//! One slot timer scheduling. The machine never waits on more than one
//! deadline, so a new schedule replaces whatever was pending.

use crate::processor::{CommandChannel, Inbound};
use crate::types::TimerKind;
use embassy_futures::select::{select, Either};
use embassy_sync::channel::Channel;
use embassy_sync::blocking_mutex::raw::CriticalSectionRawMutex;
use embassy_time::{Duration, Instant, Timer};
use log::{debug, warn};
use std::sync::Arc;

/// Opaque ticket for a scheduled timer. Handles are never reused, which
/// lets late expirations be told apart from the live timer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TimerHandle(u64);

#[derive(Debug, Clone, Copy)]
pub enum TimerCtrl {
    Schedule {
        handle: TimerHandle,
        kind: TimerKind,
        deadline: Instant,
    },
    Cancel {
        handle: TimerHandle,
    },
}

// Each queued command can cancel one timer and schedule another, so this
// holds two control messages per slot of the command intake.
pub type TimerCtrlChannel = Channel<CriticalSectionRawMutex, TimerCtrl, 32>;

#[derive(Debug)]
pub enum SchedulerError {
    QueueFull,
}

impl std::fmt::Display for SchedulerError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SchedulerError::QueueFull => write!(f, "Timer control queue full"),
        }
    }
}

impl std::error::Error for SchedulerError {}

/// Issues timer handles and feeds the driver. Owned by the controller.
pub struct TimerScheduler {
    ctrl: Arc<TimerCtrlChannel>,
    next_handle: u64,
}

impl TimerScheduler {
    pub fn new(intake: Arc<CommandChannel>) -> (Self, TimerDriver) {
        let ctrl = Arc::new(Channel::new());
        let scheduler = Self {
            ctrl: Arc::clone(&ctrl),
            next_handle: 0,
        };
        let driver = TimerDriver {
            ctrl,
            intake,
            pending: None,
        };
        (scheduler, driver)
    }

    pub fn schedule(
        &mut self,
        after: Duration,
        kind: TimerKind,
    ) -> Result<TimerHandle, SchedulerError> {
        self.next_handle += 1;
        let handle = TimerHandle(self.next_handle);
        let deadline = Instant::now() + after;

        self.ctrl
            .try_send(TimerCtrl::Schedule { handle, kind, deadline })
            .map_err(|_| SchedulerError::QueueFull)?;

        debug!("scheduled {:?} timer {:?} in {}ms", kind, handle, after.as_millis());
        Ok(handle)
    }

    pub fn cancel(&mut self, handle: TimerHandle) {
        if self.ctrl.try_send(TimerCtrl::Cancel { handle }).is_err() {
            warn!("Failed to send timer cancel - channel full");
        }
    }
}

/// Waits on the single pending deadline and reports expirations into the
/// command intake, where they are serialized with everything else.
pub struct TimerDriver {
    ctrl: Arc<TimerCtrlChannel>,
    intake: Arc<CommandChannel>,
    pending: Option<(TimerHandle, TimerKind, Instant)>,
}

impl TimerDriver {
    pub async fn run(&mut self) {
        loop {
            match self.pending {
                None => {
                    let ctrl = self.ctrl.receive().await;
                    self.apply(ctrl);
                }
                Some((handle, kind, deadline)) => {
                    match select(Timer::at(deadline), self.ctrl.receive()).await {
                        Either::First(()) => {
                            self.pending = None;
                            debug!("{:?} timer {:?} fired", kind, handle);
                            self.intake.send(Inbound::TimerFired { handle, kind }).await;
                        }
                        Either::Second(ctrl) => self.apply(ctrl),
                    }
                }
            }
        }
    }

    fn apply(&mut self, ctrl: TimerCtrl) {
        match ctrl {
            TimerCtrl::Schedule { handle, kind, deadline } => {
                if let Some((old_handle, old_kind, _)) =
                    self.pending.replace((handle, kind, deadline))
                {
                    warn!("replacing pending {:?} timer {:?}", old_kind, old_handle);
                }
            }
            TimerCtrl::Cancel { handle } => match self.pending {
                Some((pending, kind, _)) if pending == handle => {
                    debug!("cancelled {:?} timer {:?}", kind, handle);
                    self.pending = None;
                }
                _ => debug!("cancel for inactive timer {:?}", handle),
            },
        }
    }
}
