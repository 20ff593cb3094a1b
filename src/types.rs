use crate::recipes::Beverage;
use core::fmt;
use embassy_time::Duration;
use serde::{Deserialize, Serialize};

/// Externally visible machine states, mirrored from the internal state machine.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MachineState {
    Off,
    SelfCheck,
    Ready,
    AskBeverage,
    ProduceBeverage,
    SelfClean,
    Error,
}

impl MachineState {
    pub fn as_str(&self) -> &'static str {
        match self {
            MachineState::Off => "off",
            MachineState::SelfCheck => "self_check",
            MachineState::Ready => "ready",
            MachineState::AskBeverage => "ask_beverage",
            MachineState::ProduceBeverage => "produce_beverage",
            MachineState::SelfClean => "self_clean",
            MachineState::Error => "error",
        }
    }
}

impl fmt::Display for MachineState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    WaterEmpty,
    CoffeeEmpty,
    CupMissing,
    SystemError,
    CleaningError,
}

impl ErrorKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorKind::WaterEmpty => "water_empty",
            ErrorKind::CoffeeEmpty => "coffee_empty",
            ErrorKind::CupMissing => "cup_missing",
            ErrorKind::SystemError => "system_error",
            ErrorKind::CleaningError => "cleaning_error",
        }
    }
}

/// The deferred completions the machine can be waiting on, one at a time.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TimerKind {
    SelfCheck,
    SelectionTimeout,
    Brew,
    Cleaning,
}

/// User-facing commands, named as they appear on the wire.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Command {
    TurnOn,
    TurnOff,
    PlaceCup,
    RemoveCup,
    SelectBeverage { beverage: Beverage },
    ConfirmSelection,
    StartCleaning,
    ResetError,
    RefillWater,
    RefillCoffee,
}

impl Command {
    pub fn name(&self) -> &'static str {
        match self {
            Command::TurnOn => "turn_on",
            Command::TurnOff => "turn_off",
            Command::PlaceCup => "place_cup",
            Command::RemoveCup => "remove_cup",
            Command::SelectBeverage { .. } => "select_beverage",
            Command::ConfirmSelection => "confirm_selection",
            Command::StartCleaning => "start_cleaning",
            Command::ResetError => "reset_error",
            Command::RefillWater => "refill_water",
            Command::RefillCoffee => "refill_coffee",
        }
    }
}

/// Why a command was refused. Every refusal is reported, never silent.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Rejection {
    AlreadyOn,
    AlreadyOff,
    CupAlreadyPresent,
    NoCupToRemove,
    MachineOff,
    SelfCheckRunning,
    ErrorPending,
    CupNotAccepted { state: MachineState },
    SelectionNotAccepted { state: MachineState },
    NoSelection,
    CleaningNotAccepted { state: MachineState },
    NoErrorToReset,
}

impl fmt::Display for Rejection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Rejection::AlreadyOn => write!(f, "machine is already on"),
            Rejection::AlreadyOff => write!(f, "machine is already off"),
            Rejection::CupAlreadyPresent => write!(f, "a cup is already in place"),
            Rejection::NoCupToRemove => write!(f, "no cup to remove"),
            Rejection::MachineOff => write!(f, "turn the machine on first"),
            Rejection::SelfCheckRunning => write!(f, "wait for the self check to finish"),
            Rejection::ErrorPending => write!(f, "resolve the current error first"),
            Rejection::CupNotAccepted { state } => {
                write!(f, "cannot place a cup in state {}", state)
            }
            Rejection::SelectionNotAccepted { state } => {
                write!(f, "cannot select a beverage in state {}", state)
            }
            Rejection::NoSelection => write!(f, "no beverage selected"),
            Rejection::CleaningNotAccepted { state } => {
                write!(f, "cannot start cleaning in state {}", state)
            }
            Rejection::NoErrorToReset => write!(f, "no error to reset"),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MachineConfig {
    pub self_check_ms: u64,
    pub selection_timeout_ms: u64,
    pub cleaning_ms: u64,
}

impl Default for MachineConfig {
    fn default() -> Self {
        Self {
            self_check_ms: 3_000,
            selection_timeout_ms: 30_000,
            cleaning_ms: 8_000,
        }
    }
}

impl MachineConfig {
    pub fn self_check_delay(&self) -> Duration {
        Duration::from_millis(self.self_check_ms)
    }

    pub fn selection_timeout(&self) -> Duration {
        Duration::from_millis(self.selection_timeout_ms)
    }

    pub fn cleaning_delay(&self) -> Duration {
        Duration::from_millis(self.cleaning_ms)
    }
}

pub const FULL_LEVEL_PERCENT: f32 = 100.0;
pub const WATER_FLOOR_PERCENT: f32 = 10.0;
pub const COFFEE_FLOOR_PERCENT: f32 = 5.0;
pub const CLEANING_CYCLE_THRESHOLD: u32 = 10;
pub const AMBIENT_TEMPERATURE_C: i32 = 20;
pub const OPERATING_TEMPERATURE_C: i32 = 90;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_state_names_match_serde() {
        let json = serde_json::to_string(&MachineState::AskBeverage).unwrap();
        assert_eq!(json, "\"ask_beverage\"");
        assert_eq!(MachineState::AskBeverage.as_str(), "ask_beverage");
    }

    #[test]
    fn test_error_kind_names() {
        assert_eq!(ErrorKind::WaterEmpty.as_str(), "water_empty");
        let json = serde_json::to_string(&ErrorKind::CupMissing).unwrap();
        assert_eq!(json, "\"cup_missing\"");
    }

    #[test]
    fn test_default_config_durations() {
        let config = MachineConfig::default();
        assert_eq!(config.self_check_delay(), Duration::from_secs(3));
        assert_eq!(config.selection_timeout(), Duration::from_secs(30));
        assert_eq!(config.cleaning_delay(), Duration::from_secs(8));
    }
}
