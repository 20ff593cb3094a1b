//! Dispensing state machine
//! States: Off, SelfCheck, Ready, AskBeverage, ProduceBeverage, SelfClean, Error

use crate::recipes::{Beverage, Catalog};
use crate::resources::Resources;
use crate::types::{
    Command, ErrorKind, MachineConfig, MachineState, Rejection, TimerKind, AMBIENT_TEMPERATURE_C,
    CLEANING_CYCLE_THRESHOLD, OPERATING_TEMPERATURE_C,
};
use embassy_time::Duration;
use log::{debug, info, warn};
use statig::prelude::*;

// Input events to the state machine
#[derive(Debug, Clone)]
pub enum MachineInput {
    Command(Command),
    TimerElapsed(TimerKind),
    Fault(ErrorKind),
}

// Output events from the state machine. Side effects stay out here:
// the caller owns timers and persistence.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum MachineOutput {
    Rejected(Rejection),
    Schedule { kind: TimerKind, after: Duration },
    CancelTimer,
    Transitioned { reason: &'static str },
}

// Shared context for the state machine
#[derive(Debug)]
pub struct MachineContext {
    pub resources: Resources,
    pub catalog: Catalog,
    pub config: MachineConfig,
    previous: Option<MachineState>,
    outputs: heapless::Vec<MachineOutput, 8>, // Collect outputs during event handling
}

impl MachineContext {
    fn new(config: MachineConfig, catalog: Catalog) -> Self {
        Self {
            resources: Resources::default(),
            catalog,
            config,
            previous: None,
            outputs: heapless::Vec::new(),
        }
    }

    fn emit(&mut self, output: MachineOutput) {
        if let Err(dropped) = self.outputs.push(output) {
            warn!("output queue full, dropping {:?}", dropped);
        }
    }
}

#[derive(Debug, Default)]
pub struct CoffeeStateMachine;

#[state_machine(
    initial = "State::off()",
    state(derive(Debug)),
    on_transition = "Self::on_transition"
)]
impl CoffeeStateMachine {
    /// Powered down. Everything except turning on is refused.
    #[state]
    fn off(context: &mut MachineContext, event: &MachineInput) -> Response<State> {
        use Response::*;

        match event {
            MachineInput::Command(command) => match command {
                Command::TurnOn => {
                    context.resources.temperature = AMBIENT_TEMPERATURE_C;
                    info!("🔍 self check starting");
                    context.emit(MachineOutput::Schedule {
                        kind: TimerKind::SelfCheck,
                        after: context.config.self_check_delay(),
                    });
                    context.emit(MachineOutput::Transitioned { reason: "power on" });
                    Transition(State::self_check())
                }
                Command::TurnOff => {
                    context.emit(MachineOutput::Rejected(Rejection::AlreadyOff));
                    Handled
                }
                Command::PlaceCup => Self::refuse_cup(context, Rejection::MachineOff),
                Command::RemoveCup => Self::take_cup(context),
                Command::SelectBeverage { .. } => {
                    Self::refuse_selection(context, MachineState::Off)
                }
                Command::ConfirmSelection => Self::refuse_confirm(context),
                Command::StartCleaning => Self::refuse_cleaning(context, MachineState::Off),
                Command::ResetError => Self::refuse_reset(context),
                Command::RefillWater => Self::top_up_water(context),
                Command::RefillCoffee => Self::top_up_coffee(context),
            },
            MachineInput::TimerElapsed(kind) => Self::stale_timer(*kind),
            MachineInput::Fault(kind) => Self::fail(context, *kind),
        }
    }

    /// Heating and checking subsystems. Ends on the self check timer.
    #[state]
    fn self_check(context: &mut MachineContext, event: &MachineInput) -> Response<State> {
        use Response::*;

        match event {
            MachineInput::Command(command) => match command {
                Command::TurnOn => {
                    context.emit(MachineOutput::Rejected(Rejection::AlreadyOn));
                    Handled
                }
                Command::TurnOff => Self::power_off(context),
                Command::PlaceCup => Self::refuse_cup(context, Rejection::SelfCheckRunning),
                Command::RemoveCup => Self::take_cup(context),
                Command::SelectBeverage { .. } => {
                    Self::refuse_selection(context, MachineState::SelfCheck)
                }
                Command::ConfirmSelection => Self::refuse_confirm(context),
                Command::StartCleaning => Self::refuse_cleaning(context, MachineState::SelfCheck),
                Command::ResetError => Self::refuse_reset(context),
                Command::RefillWater => Self::top_up_water(context),
                Command::RefillCoffee => Self::top_up_coffee(context),
            },
            MachineInput::TimerElapsed(TimerKind::SelfCheck) => {
                context.resources.temperature = OPERATING_TEMPERATURE_C;
                info!("✅ self check passed, {}°C", context.resources.temperature);
                context.emit(MachineOutput::Transitioned { reason: "self check passed" });
                Transition(State::ready())
            }
            MachineInput::TimerElapsed(kind) => Self::stale_timer(*kind),
            MachineInput::Fault(kind) => Self::fail(context, *kind),
        }
    }

    /// Warmed up and waiting for a cup.
    #[state]
    fn ready(context: &mut MachineContext, event: &MachineInput) -> Response<State> {
        use Response::*;

        match event {
            MachineInput::Command(command) => match command {
                Command::TurnOn => {
                    context.emit(MachineOutput::Rejected(Rejection::AlreadyOn));
                    Handled
                }
                Command::TurnOff => Self::power_off(context),
                Command::PlaceCup => {
                    if context.resources.cup_present {
                        context.emit(MachineOutput::Rejected(Rejection::CupAlreadyPresent));
                        Handled
                    } else {
                        context.resources.cup_present = true;
                        info!("🥤 cup placed");
                        Self::begin_selection(context, "cup placed")
                    }
                }
                Command::RemoveCup => Self::take_cup(context),
                Command::SelectBeverage { .. } => {
                    Self::refuse_selection(context, MachineState::Ready)
                }
                Command::ConfirmSelection => Self::refuse_confirm(context),
                Command::StartCleaning => Self::begin_cleaning(context, "manual cleaning"),
                Command::ResetError => Self::refuse_reset(context),
                Command::RefillWater => Self::top_up_water(context),
                Command::RefillCoffee => Self::top_up_coffee(context),
            },
            MachineInput::TimerElapsed(kind) => Self::stale_timer(*kind),
            MachineInput::Fault(kind) => Self::fail(context, *kind),
        }
    }

    /// Cup in place, waiting for a selection. The selection timeout runs
    /// for the whole stay in this state, selections do not restart it.
    #[state]
    fn ask_beverage(
        context: &mut MachineContext,
        event: &MachineInput,
        selection: &mut Option<Beverage>,
    ) -> Response<State> {
        use Response::*;

        match event {
            MachineInput::Command(command) => match command {
                Command::TurnOn => {
                    context.emit(MachineOutput::Rejected(Rejection::AlreadyOn));
                    Handled
                }
                Command::TurnOff => Self::power_off(context),
                Command::PlaceCup => {
                    Self::refuse_cup(context, Rejection::CupNotAccepted {
                        state: MachineState::AskBeverage,
                    })
                }
                Command::RemoveCup => {
                    if context.resources.cup_present {
                        context.resources.cup_present = false;
                        info!("🥤 cup removed");
                        context.emit(MachineOutput::CancelTimer);
                        context.emit(MachineOutput::Transitioned {
                            reason: "cup removed during selection",
                        });
                        Transition(State::ready())
                    } else {
                        context.emit(MachineOutput::Rejected(Rejection::NoCupToRemove));
                        Handled
                    }
                }
                Command::SelectBeverage { beverage } => {
                    // Reselecting just overwrites, confirmation is separate
                    *selection = Some(*beverage);
                    info!("☕ beverage selected: {}", beverage);
                    Handled
                }
                Command::ConfirmSelection => match *selection {
                    None => Self::refuse_confirm(context),
                    Some(beverage) => {
                        if let Some(kind) = context.resources.depleted_kind() {
                            Self::fail(context, kind)
                        } else {
                            let recipe = context.catalog.recipe(beverage);
                            info!("🔥 preparing {} ({} ms)", beverage, recipe.brew_ms);
                            context.emit(MachineOutput::CancelTimer);
                            context.emit(MachineOutput::Schedule {
                                kind: TimerKind::Brew,
                                after: recipe.brew_duration(),
                            });
                            context.emit(MachineOutput::Transitioned {
                                reason: "selection confirmed",
                            });
                            Transition(State::produce_beverage(beverage))
                        }
                    }
                },
                Command::StartCleaning => {
                    Self::refuse_cleaning(context, MachineState::AskBeverage)
                }
                Command::ResetError => Self::refuse_reset(context),
                Command::RefillWater => Self::top_up_water(context),
                Command::RefillCoffee => Self::top_up_coffee(context),
            },
            MachineInput::TimerElapsed(TimerKind::SelectionTimeout) => {
                info!("⏰ selection timed out");
                context.resources.cup_present = false;
                context.emit(MachineOutput::Transitioned { reason: "selection timeout" });
                Transition(State::ready())
            }
            MachineInput::TimerElapsed(kind) => Self::stale_timer(*kind),
            MachineInput::Fault(kind) => Self::fail(context, *kind),
        }
    }

    /// Brewing until the brew timer fires. Pulling the cup mid-brew is a fault.
    #[state]
    fn produce_beverage(
        context: &mut MachineContext,
        event: &MachineInput,
        beverage: &Beverage,
    ) -> Response<State> {
        use Response::*;

        match event {
            MachineInput::Command(command) => match command {
                Command::TurnOn => {
                    context.emit(MachineOutput::Rejected(Rejection::AlreadyOn));
                    Handled
                }
                Command::TurnOff => Self::power_off(context),
                Command::PlaceCup => {
                    Self::refuse_cup(context, Rejection::CupNotAccepted {
                        state: MachineState::ProduceBeverage,
                    })
                }
                Command::RemoveCup => {
                    if context.resources.cup_present {
                        context.resources.cup_present = false;
                        warn!("cup removed mid brew");
                        Self::fail(context, ErrorKind::CupMissing)
                    } else {
                        context.emit(MachineOutput::Rejected(Rejection::NoCupToRemove));
                        Handled
                    }
                }
                Command::SelectBeverage { .. } => {
                    Self::refuse_selection(context, MachineState::ProduceBeverage)
                }
                Command::ConfirmSelection => Self::refuse_confirm(context),
                Command::StartCleaning => {
                    Self::refuse_cleaning(context, MachineState::ProduceBeverage)
                }
                Command::ResetError => Self::refuse_reset(context),
                Command::RefillWater => Self::top_up_water(context),
                Command::RefillCoffee => Self::top_up_coffee(context),
            },
            MachineInput::TimerElapsed(TimerKind::Brew) => {
                let beverage = *beverage;
                let recipe = context.catalog.recipe(beverage);
                context.resources.consume(&recipe);
                context.resources.cleaning_cycles += 1;
                info!(
                    "✅ {} ready, water {:.0}% coffee {:.0}%",
                    beverage, context.resources.water_level, context.resources.coffee_level
                );

                if context.resources.cleaning_cycles >= CLEANING_CYCLE_THRESHOLD {
                    Self::begin_cleaning(context, "automatic cleaning")
                } else if context.resources.cup_present {
                    Self::begin_selection(context, "beverage dispensed - cup present")
                } else {
                    context.emit(MachineOutput::Transitioned {
                        reason: "beverage dispensed - cup removed",
                    });
                    Transition(State::ready())
                }
            }
            MachineInput::TimerElapsed(kind) => Self::stale_timer(*kind),
            MachineInput::Fault(kind) => Self::fail(context, *kind),
        }
    }

    /// Rinsing the brew group. Ends on the cleaning timer.
    #[state]
    fn self_clean(context: &mut MachineContext, event: &MachineInput) -> Response<State> {
        use Response::*;

        match event {
            MachineInput::Command(command) => match command {
                Command::TurnOn => {
                    context.emit(MachineOutput::Rejected(Rejection::AlreadyOn));
                    Handled
                }
                Command::TurnOff => Self::power_off(context),
                Command::PlaceCup => {
                    Self::refuse_cup(context, Rejection::CupNotAccepted {
                        state: MachineState::SelfClean,
                    })
                }
                Command::RemoveCup => Self::take_cup(context),
                Command::SelectBeverage { .. } => {
                    Self::refuse_selection(context, MachineState::SelfClean)
                }
                Command::ConfirmSelection => Self::refuse_confirm(context),
                Command::StartCleaning => {
                    Self::refuse_cleaning(context, MachineState::SelfClean)
                }
                Command::ResetError => Self::refuse_reset(context),
                Command::RefillWater => Self::top_up_water(context),
                Command::RefillCoffee => Self::top_up_coffee(context),
            },
            MachineInput::TimerElapsed(TimerKind::Cleaning) => {
                context.resources.cleaning_cycles = 0;
                info!("🧽 cleaning finished");
                context.emit(MachineOutput::Transitioned { reason: "cleaning finished" });
                Transition(State::ready())
            }
            MachineInput::TimerElapsed(kind) => Self::stale_timer(*kind),
            MachineInput::Fault(kind) => Self::fail(context, *kind),
        }
    }

    /// Faulted. Only reset, the matching refill, or power off leave this state.
    #[state]
    fn error(
        context: &mut MachineContext,
        event: &MachineInput,
        kind: &ErrorKind,
    ) -> Response<State> {
        use Response::*;

        match event {
            MachineInput::Command(command) => match command {
                Command::TurnOn => {
                    context.emit(MachineOutput::Rejected(Rejection::AlreadyOn));
                    Handled
                }
                Command::TurnOff => Self::power_off(context),
                Command::PlaceCup => Self::refuse_cup(context, Rejection::ErrorPending),
                Command::RemoveCup => Self::take_cup(context),
                Command::SelectBeverage { .. } => {
                    Self::refuse_selection(context, MachineState::Error)
                }
                Command::ConfirmSelection => Self::refuse_confirm(context),
                Command::StartCleaning => Self::refuse_cleaning(context, MachineState::Error),
                Command::ResetError => {
                    info!("error cleared: {}", kind.as_str());
                    context.emit(MachineOutput::Transitioned { reason: "error reset" });
                    Transition(State::ready())
                }
                Command::RefillWater => {
                    context.resources.refill_water();
                    info!("💧 water tank refilled");
                    if *kind == ErrorKind::WaterEmpty {
                        context.emit(MachineOutput::Transitioned { reason: "error reset" });
                        Transition(State::ready())
                    } else {
                        Handled
                    }
                }
                Command::RefillCoffee => {
                    context.resources.refill_coffee();
                    info!("☕ coffee hopper refilled");
                    if *kind == ErrorKind::CoffeeEmpty {
                        context.emit(MachineOutput::Transitioned { reason: "error reset" });
                        Transition(State::ready())
                    } else {
                        Handled
                    }
                }
            },
            MachineInput::TimerElapsed(kind) => Self::stale_timer(*kind),
            MachineInput::Fault(new_kind) => {
                if new_kind == kind {
                    Handled
                } else {
                    // Same observable state, so no transition record for this
                    warn!("fault replaced: {} -> {}", kind.as_str(), new_kind.as_str());
                    Transition(State::error(*new_kind))
                }
            }
        }
    }

    fn on_transition(&mut self, source: &State, target: &State) {
        let from = Self::to_machine_state(source);
        let to = Self::to_machine_state(target);

        if from != to {
            info!("🔄 state transition: {} -> {}", from, to);
        }
    }

    /// Convert internal State to MachineState for the external interface
    fn to_machine_state(state: &State) -> MachineState {
        match state {
            State::Off {} => MachineState::Off,
            State::SelfCheck {} => MachineState::SelfCheck,
            State::Ready {} => MachineState::Ready,
            State::AskBeverage { .. } => MachineState::AskBeverage,
            State::ProduceBeverage { .. } => MachineState::ProduceBeverage,
            State::SelfClean {} => MachineState::SelfClean,
            State::Error { .. } => MachineState::Error,
        }
    }
}

// Shared handling for commands whose outcome does not depend on the state
impl CoffeeStateMachine {
    /// A cup already in place wins over any state specific refusal.
    fn refuse_cup(context: &mut MachineContext, rejection: Rejection) -> Response<State> {
        use Response::*;

        if context.resources.cup_present {
            context.emit(MachineOutput::Rejected(Rejection::CupAlreadyPresent));
        } else {
            context.emit(MachineOutput::Rejected(rejection));
        }
        Handled
    }

    fn refuse_selection(context: &mut MachineContext, state: MachineState) -> Response<State> {
        use Response::*;

        context.emit(MachineOutput::Rejected(Rejection::SelectionNotAccepted { state }));
        Handled
    }

    fn refuse_confirm(context: &mut MachineContext) -> Response<State> {
        use Response::*;

        context.emit(MachineOutput::Rejected(Rejection::NoSelection));
        Handled
    }

    fn refuse_cleaning(context: &mut MachineContext, state: MachineState) -> Response<State> {
        use Response::*;

        context.emit(MachineOutput::Rejected(Rejection::CleaningNotAccepted { state }));
        Handled
    }

    fn refuse_reset(context: &mut MachineContext) -> Response<State> {
        use Response::*;

        context.emit(MachineOutput::Rejected(Rejection::NoErrorToReset));
        Handled
    }

    /// Plain cup removal, no state change.
    fn take_cup(context: &mut MachineContext) -> Response<State> {
        use Response::*;

        if context.resources.cup_present {
            context.resources.cup_present = false;
            info!("🥤 cup removed");
        } else {
            context.emit(MachineOutput::Rejected(Rejection::NoCupToRemove));
        }
        Handled
    }

    fn top_up_water(context: &mut MachineContext) -> Response<State> {
        use Response::*;

        context.resources.refill_water();
        info!("💧 water tank refilled");
        Handled
    }

    fn top_up_coffee(context: &mut MachineContext) -> Response<State> {
        use Response::*;

        context.resources.refill_coffee();
        info!("☕ coffee hopper refilled");
        Handled
    }

    fn stale_timer(kind: TimerKind) -> Response<State> {
        use Response::*;

        debug!("stale {:?} timer ignored", kind);
        Handled
    }

    /// Shut down from anywhere. Pending timers are cancelled, the cup
    /// tray is cleared, any error is forgotten.
    fn power_off(context: &mut MachineContext) -> Response<State> {
        use Response::*;

        context.resources.cup_present = false;
        context.emit(MachineOutput::CancelTimer);
        context.emit(MachineOutput::Transitioned { reason: "power off" });
        Transition(State::off())
    }

    /// Enter the error state, dropping whatever was pending.
    fn fail(context: &mut MachineContext, kind: ErrorKind) -> Response<State> {
        use Response::*;

        warn!("❌ machine fault: {}", kind.as_str());
        context.emit(MachineOutput::CancelTimer);
        context.emit(MachineOutput::Transitioned { reason: kind.as_str() });
        Transition(State::error(kind))
    }

    fn begin_selection(context: &mut MachineContext, reason: &'static str) -> Response<State> {
        use Response::*;

        context.emit(MachineOutput::Schedule {
            kind: TimerKind::SelectionTimeout,
            after: context.config.selection_timeout(),
        });
        context.emit(MachineOutput::Transitioned { reason });
        Transition(State::ask_beverage(None))
    }

    fn begin_cleaning(context: &mut MachineContext, reason: &'static str) -> Response<State> {
        use Response::*;

        info!("🧽 cleaning cycle starting");
        context.emit(MachineOutput::Schedule {
            kind: TimerKind::Cleaning,
            after: context.config.cleaning_delay(),
        });
        context.emit(MachineOutput::Transitioned { reason });
        Transition(State::self_clean())
    }
}

// Main interface around the state machine
pub struct CoffeeMachine {
    machine: statig::prelude::StateMachine<CoffeeStateMachine>,
    context: MachineContext,
}

impl CoffeeMachine {
    pub fn new(config: MachineConfig, catalog: Catalog) -> Self {
        Self {
            machine: CoffeeStateMachine::default().state_machine(),
            context: MachineContext::new(config, catalog),
        }
    }

    /// Process an input event and return output events
    pub fn handle(&mut self, input: &MachineInput) -> heapless::Vec<MachineOutput, 8> {
        // Clear previous outputs
        self.context.outputs.clear();

        // Capture current state before transition
        let before = self.state();

        // Handle the input with context
        let _ = self.machine.handle_with_context(input, &mut self.context);

        // Remember where the last transition came from
        if self.state() != before {
            self.context.previous = Some(before);
        }

        // Return collected outputs
        std::mem::take(&mut self.context.outputs)
    }

    pub fn state(&self) -> MachineState {
        CoffeeStateMachine::to_machine_state(self.machine.state())
    }

    /// Source side of the last completed transition, None before the first one.
    pub fn previous_state(&self) -> Option<MachineState> {
        self.context.previous
    }

    pub fn selected_beverage(&self) -> Option<Beverage> {
        match self.machine.state() {
            State::AskBeverage { selection } => *selection,
            State::ProduceBeverage { beverage } => Some(*beverage),
            _ => None,
        }
    }

    pub fn error_kind(&self) -> Option<ErrorKind> {
        match self.machine.state() {
            State::Error { kind } => Some(*kind),
            _ => None,
        }
    }

    pub fn resources(&self) -> &Resources {
        &self.context.resources
    }

    pub fn catalog(&self) -> &Catalog {
        &self.context.catalog
    }
}
