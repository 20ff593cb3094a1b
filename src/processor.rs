//! JSON command intake. Parses wire requests into typed commands and
//! queues them for the controller, which owns all machine state.

use crate::recipes::Beverage;
use crate::scheduler::TimerHandle;
use crate::types::{Command, TimerKind};
use embassy_sync::blocking_mutex::raw::CriticalSectionRawMutex;
use embassy_sync::channel::Channel;
use log::{debug, warn};
use serde::Deserialize;
use serde_json::Value;
use std::sync::Arc;

/// Everything the controller loop can receive, already serialized.
#[derive(Debug, Clone)]
pub enum Inbound {
    Command {
        command: Command,
        payload: Option<Value>,
    },
    TimerFired {
        handle: TimerHandle,
        kind: TimerKind,
    },
    Shutdown,
}

pub type CommandChannel = Channel<CriticalSectionRawMutex, Inbound, 16>;

/// Wire shape of a request: {"command": "...", "payload": {...}}
#[derive(Debug, Deserialize)]
pub struct CommandRequest {
    pub command: String,
    #[serde(default)]
    pub payload: Option<Value>,
}

#[derive(Debug, Deserialize)]
struct BeveragePayload {
    beverage: String,
}

#[derive(Debug)]
pub enum ParseError {
    Malformed(serde_json::Error),
    UnknownCommand(String),
    MissingBeverage,
    UnknownBeverage(String),
}

impl std::fmt::Display for ParseError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ParseError::Malformed(err) => write!(f, "Malformed request: {}", err),
            ParseError::UnknownCommand(name) => write!(f, "Unknown command: {}", name),
            ParseError::MissingBeverage => write!(f, "select_beverage needs a beverage payload"),
            ParseError::UnknownBeverage(name) => {
                write!(f, "Beverage not available: {}, choose from:", name)?;
                for beverage in Beverage::ALL {
                    write!(f, " {}", beverage)?;
                }
                Ok(())
            }
        }
    }
}

impl std::error::Error for ParseError {}

/// Parse a raw JSON request into a command plus the payload it carried.
/// An empty payload object is treated the same as no payload.
pub fn parse_request(raw: &str) -> Result<(Command, Option<Value>), ParseError> {
    let request: CommandRequest = serde_json::from_str(raw).map_err(ParseError::Malformed)?;
    let command = parse_command(&request)?;
    let payload = request
        .payload
        .filter(|value| !matches!(value, Value::Object(map) if map.is_empty()));
    Ok((command, payload))
}

pub fn parse_command(request: &CommandRequest) -> Result<Command, ParseError> {
    match request.command.as_str() {
        "turn_on" => Ok(Command::TurnOn),
        "turn_off" => Ok(Command::TurnOff),
        "place_cup" => Ok(Command::PlaceCup),
        "remove_cup" => Ok(Command::RemoveCup),
        "select_beverage" => {
            let payload = request.payload.clone().ok_or(ParseError::MissingBeverage)?;
            let payload: BeveragePayload =
                serde_json::from_value(payload).map_err(|_| ParseError::MissingBeverage)?;
            let beverage = payload
                .beverage
                .parse()
                .map_err(|_| ParseError::UnknownBeverage(payload.beverage.clone()))?;
            Ok(Command::SelectBeverage { beverage })
        }
        "confirm_selection" => Ok(Command::ConfirmSelection),
        "start_cleaning" => Ok(Command::StartCleaning),
        "reset_error" => Ok(Command::ResetError),
        "refill_water" => Ok(Command::RefillWater),
        "refill_coffee" => Ok(Command::RefillCoffee),
        other => Err(ParseError::UnknownCommand(other.to_string())),
    }
}

/// Cheap cloneable front door to the controller.
#[derive(Clone)]
pub struct CommandProcessor {
    intake: Arc<CommandChannel>,
}

impl CommandProcessor {
    pub fn new(intake: Arc<CommandChannel>) -> Self {
        Self { intake }
    }

    /// Parse and enqueue a raw request. Parse failures are reported and
    /// dropped, they never reach the state machine.
    pub async fn submit_json(&self, raw: &str) {
        match parse_request(raw) {
            Ok((command, payload)) => {
                debug!("📨 command accepted: {}", command.name());
                self.intake.send(Inbound::Command { command, payload }).await;
            }
            Err(err) => warn!("❌ request refused: {}", err),
        }
    }

    pub async fn submit(&self, command: Command) {
        self.intake
            .send(Inbound::Command { command, payload: None })
            .await;
    }

    pub async fn shutdown(&self) {
        self.intake.send(Inbound::Shutdown).await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use embassy_futures::block_on;

    #[test]
    fn test_every_wire_name_parses() {
        let commands = [
            Command::TurnOn,
            Command::TurnOff,
            Command::PlaceCup,
            Command::RemoveCup,
            Command::ConfirmSelection,
            Command::StartCleaning,
            Command::ResetError,
            Command::RefillWater,
            Command::RefillCoffee,
        ];
        for command in commands {
            let raw = format!("{{\"command\": \"{}\"}}", command.name());
            let (parsed, payload) = parse_request(&raw).unwrap();
            assert_eq!(parsed, command);
            assert_eq!(payload, None);
        }
    }

    #[test]
    fn test_select_beverage_parses_payload() {
        let raw = r#"{"command": "select_beverage", "payload": {"beverage": "cappuccino"}}"#;
        let (command, payload) = parse_request(raw).unwrap();
        assert_eq!(command, Command::SelectBeverage { beverage: Beverage::Cappuccino });
        assert_eq!(
            payload,
            Some(serde_json::json!({"beverage": "cappuccino"}))
        );
    }

    #[test]
    fn test_select_beverage_without_payload() {
        let raw = r#"{"command": "select_beverage"}"#;
        assert!(matches!(
            parse_request(raw),
            Err(ParseError::MissingBeverage)
        ));
    }

    #[test]
    fn test_unknown_beverage_lists_menu() {
        let raw = r#"{"command": "select_beverage", "payload": {"beverage": "mocha"}}"#;
        let err = parse_request(raw).unwrap_err();
        assert!(matches!(&err, ParseError::UnknownBeverage(name) if name == "mocha"));
        let message = err.to_string();
        assert!(message.contains("espresso"));
        assert!(message.contains("cappuccino"));
        assert!(message.contains("americano"));
    }

    #[test]
    fn test_unknown_command_refused() {
        let raw = r#"{"command": "make_tea"}"#;
        assert!(matches!(
            parse_request(raw),
            Err(ParseError::UnknownCommand(name)) if name == "make_tea"
        ));
    }

    #[test]
    fn test_malformed_json_refused() {
        assert!(matches!(
            parse_request("not json"),
            Err(ParseError::Malformed(_))
        ));
    }

    #[test]
    fn test_empty_payload_normalized_away() {
        let raw = r#"{"command": "turn_on", "payload": {}}"#;
        let (command, payload) = parse_request(raw).unwrap();
        assert_eq!(command, Command::TurnOn);
        assert_eq!(payload, None);
    }

    #[test]
    fn test_submit_json_enqueues() {
        let intake: Arc<CommandChannel> = Arc::new(Channel::new());
        let processor = CommandProcessor::new(Arc::clone(&intake));

        block_on(processor.submit_json(r#"{"command": "turn_on"}"#));
        block_on(processor.submit_json("garbage"));

        match intake.try_receive() {
            Ok(Inbound::Command { command, payload }) => {
                assert_eq!(command, Command::TurnOn);
                assert_eq!(payload, None);
            }
            other => panic!("expected queued command, got {:?}", other),
        }
        // The garbage line never made it in
        assert!(intake.try_receive().is_err());
    }

    #[test]
    fn test_shutdown_enqueues() {
        let intake: Arc<CommandChannel> = Arc::new(Channel::new());
        let processor = CommandProcessor::new(Arc::clone(&intake));
        block_on(processor.shutdown());
        assert!(matches!(intake.try_receive(), Ok(Inbound::Shutdown)));
    }
}
