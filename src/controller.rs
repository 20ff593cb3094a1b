//! Serialized control loop. Commands, timer expirations, and faults all
//! funnel through one channel, so the state machine never sees two
//! inputs at once.

use crate::events::{
    EventMessage, EventRecord, EventRecorder, StatusSink, StatusSnapshot, EVENT_STATE_CHANGED,
    EVENT_SYSTEM_STARTED,
};
use crate::processor::{CommandChannel, Inbound};
use crate::recipes::Catalog;
use crate::scheduler::{TimerHandle, TimerScheduler};
use crate::states::{CoffeeMachine, MachineInput, MachineOutput};
use crate::store::EventStore;
use crate::types::{Command, ErrorKind, MachineConfig, MachineState, TimerKind};
use chrono::Utc;
use log::{debug, error, info, warn};
use serde_json::{json, Value};
use std::sync::Arc;

pub struct CoffeeController {
    machine: CoffeeMachine,
    scheduler: TimerScheduler,
    recorder: EventRecorder,
    sink: Box<dyn StatusSink>,
    intake: Arc<CommandChannel>,

    // The one timer the machine may be waiting on. Expirations carrying
    // any other handle are leftovers from a cancelled wait.
    active_timer: Option<TimerHandle>,
}

impl CoffeeController {
    pub fn new(
        config: MachineConfig,
        catalog: Catalog,
        store: Box<dyn EventStore>,
        sink: Box<dyn StatusSink>,
        scheduler: TimerScheduler,
        intake: Arc<CommandChannel>,
    ) -> Self {
        let mut controller = Self {
            machine: CoffeeMachine::new(config, catalog),
            scheduler,
            recorder: EventRecorder::new(store),
            sink,
            intake,
            active_timer: None,
        };

        let started =
            controller
                .recorder
                .record(EVENT_SYSTEM_STARTED, None, controller.machine.state(), None);
        controller.publish_event(&started);
        controller.publish_status();
        info!("🚀 coffee machine controller up");
        controller
    }

    pub async fn run(&mut self) {
        info!("controller loop started");

        loop {
            match self.intake.receive().await {
                Inbound::Command { command, payload } => self.dispatch_command(command, payload),
                Inbound::TimerFired { handle, kind } => self.dispatch_timer(handle, kind),
                Inbound::Shutdown => {
                    self.shutdown();
                    break;
                }
            }
        }
    }

    pub fn state(&self) -> MachineState {
        self.machine.state()
    }

    pub fn machine(&self) -> &CoffeeMachine {
        &self.machine
    }

    pub fn status(&self) -> StatusSnapshot {
        StatusSnapshot {
            timestamp: Utc::now(),
            state: self.machine.state(),
            selected_beverage: self.machine.selected_beverage(),
            error_type: self.machine.error_kind(),
            resources: *self.machine.resources(),
            available_beverages: self.machine.catalog().beverages().collect(),
        }
    }

    fn dispatch_command(&mut self, command: Command, payload: Option<Value>) {
        debug!("dispatching {}", command.name());
        let outputs = self.machine.handle(&MachineInput::Command(command));
        let (reason, schedule_failed) = self.apply_outputs(outputs);

        if let Some(reason) = reason {
            self.record_transition(reason);
        }

        // The command itself goes on record too, rejected or not
        let event = self.recorder.record(
            &format!("command_{}", command.name()),
            self.machine.previous_state(),
            self.machine.state(),
            payload,
        );
        self.publish_event(&event);

        if schedule_failed {
            self.force_fault(ErrorKind::SystemError);
        }
    }

    fn dispatch_timer(&mut self, handle: TimerHandle, kind: TimerKind) {
        if self.active_timer != Some(handle) {
            debug!("ignoring stale {:?} timer {:?}", kind, handle);
            return;
        }
        self.active_timer = None;

        let outputs = self.machine.handle(&MachineInput::TimerElapsed(kind));
        let (reason, schedule_failed) = self.apply_outputs(outputs);

        if let Some(reason) = reason {
            self.record_transition(reason);
        }
        if schedule_failed {
            self.force_fault(ErrorKind::SystemError);
        }
    }

    /// Carry out the side effects the state machine asked for. The
    /// transition reason and any schedule failure are handed back so the
    /// caller can record them in the right order.
    fn apply_outputs(
        &mut self,
        outputs: heapless::Vec<MachineOutput, 8>,
    ) -> (Option<&'static str>, bool) {
        let mut reason = None;
        let mut schedule_failed = false;

        for output in outputs {
            match output {
                MachineOutput::Rejected(rejection) => {
                    warn!("command rejected: {}", rejection);
                }
                MachineOutput::CancelTimer => {
                    if let Some(handle) = self.active_timer.take() {
                        self.scheduler.cancel(handle);
                    }
                }
                MachineOutput::Schedule { kind, after } => {
                    if let Some(stale) = self.active_timer.take() {
                        warn!("replacing still active timer {:?}", stale);
                        self.scheduler.cancel(stale);
                    }
                    match self.scheduler.schedule(after, kind) {
                        Ok(handle) => self.active_timer = Some(handle),
                        Err(err) => {
                            error!("failed to schedule {:?} timer: {}", kind, err);
                            schedule_failed = true;
                        }
                    }
                }
                MachineOutput::Transitioned { reason: why } => reason = Some(why),
            }
        }

        (reason, schedule_failed)
    }

    /// Push the machine into the error state from the controller side,
    /// used when a side effect itself fails.
    fn force_fault(&mut self, kind: ErrorKind) {
        let outputs = self.machine.handle(&MachineInput::Fault(kind));
        let (reason, _) = self.apply_outputs(outputs);
        if let Some(reason) = reason {
            self.record_transition(reason);
        }
    }

    fn record_transition(&mut self, reason: &'static str) {
        let event = self.recorder.record(
            EVENT_STATE_CHANGED,
            self.machine.previous_state(),
            self.machine.state(),
            Some(json!({ "reason": reason })),
        );
        self.publish_event(&event);
        self.publish_status();
    }

    fn publish_event(&mut self, record: &EventRecord) {
        let message = EventMessage {
            timestamp: record.timestamp,
            event: record.event_type.clone(),
            state: record.new_state,
            data: record.payload.clone().unwrap_or_else(|| json!({})),
        };
        self.sink.publish_event(&message);
    }

    fn publish_status(&mut self) {
        let status = self.status();
        self.sink.publish_status(&status);
        self.recorder.snapshot(status.state, &status.resources);
    }

    fn shutdown(&mut self) {
        info!("controller shutting down");
        if let Some(handle) = self.active_timer.take() {
            self.scheduler.cancel(handle);
        }
        if let Err(err) = self.recorder.flush() {
            warn!("event history not fully persisted: {:#}", err);
        }
    }
}
