//! End to end scenarios driving the controller, timer driver, and command
//! processor together through the real channels and timers.

use barista_rs::controller::CoffeeController;
use barista_rs::events::{replay_states, EventMessage, StatusSink, StatusSnapshot};
use barista_rs::processor::{CommandChannel, CommandProcessor};
use barista_rs::recipes::{Beverage, Catalog};
use barista_rs::scheduler::{TimerDriver, TimerScheduler};
use barista_rs::store::{read_events, EventStore, JsonlEventStore, MemoryEventStore, EVENTS_FILE};
use barista_rs::types::{Command, ErrorKind, MachineConfig, MachineState};
use embassy_futures::block_on;
use embassy_futures::join::join;
use embassy_futures::select::{select, Either};
use embassy_time::{Duration, Timer};
use std::sync::{Arc, Mutex};

#[derive(Clone, Default)]
struct RecordingSink {
    statuses: Arc<Mutex<Vec<StatusSnapshot>>>,
    events: Arc<Mutex<Vec<EventMessage>>>,
}

impl StatusSink for RecordingSink {
    fn publish_status(&mut self, status: &StatusSnapshot) {
        self.statuses.lock().unwrap().push(status.clone());
    }

    fn publish_event(&mut self, event: &EventMessage) {
        self.events.lock().unwrap().push(event.clone());
    }
}

struct Harness {
    controller: CoffeeController,
    driver: TimerDriver,
    processor: CommandProcessor,
    sink: RecordingSink,
}

impl Harness {
    /// Run controller and timer driver side by side for a slice of real
    /// time, then suspend them. Pending timers survive across slices.
    async fn run_for(&mut self, ms: u64) {
        let engine = join(self.controller.run(), self.driver.run());
        let _ = select(engine, Timer::after(Duration::from_millis(ms))).await;
    }
}

// Millisecond timers so a scenario finishes in well under a second while
// every wait still has an order of magnitude of slack.
fn fast_config() -> MachineConfig {
    MachineConfig {
        self_check_ms: 20,
        selection_timeout_ms: 200,
        cleaning_ms: 20,
    }
}

fn fast_catalog() -> Catalog {
    let mut catalog = Catalog::standard();
    catalog.espresso.brew_ms = 20;
    catalog.cappuccino.brew_ms = 20;
    catalog.americano.brew_ms = 20;
    catalog
}

fn harness(catalog: Catalog, store: Box<dyn EventStore>) -> Harness {
    let sink = RecordingSink::default();
    let intake: Arc<CommandChannel> = Arc::new(CommandChannel::new());
    let (scheduler, driver) = TimerScheduler::new(Arc::clone(&intake));
    let controller = CoffeeController::new(
        fast_config(),
        catalog,
        store,
        Box::new(sink.clone()),
        scheduler,
        Arc::clone(&intake),
    );
    let processor = CommandProcessor::new(intake);
    Harness {
        controller,
        driver,
        processor,
        sink,
    }
}

#[test]
fn test_full_dispense_cycle() {
    let mut h = harness(fast_catalog(), Box::new(MemoryEventStore::new()));

    block_on(async {
        h.processor.submit_json(r#"{"command": "turn_on"}"#).await;
        h.run_for(100).await;
        h.processor.submit_json(r#"{"command": "place_cup"}"#).await;
        h.processor
            .submit_json(r#"{"command": "select_beverage", "payload": {"beverage": "espresso"}}"#)
            .await;
        h.processor
            .submit_json(r#"{"command": "confirm_selection"}"#)
            .await;
        h.run_for(100).await;
    });

    // Cup stayed in place, so the machine went back to offering
    assert_eq!(h.controller.state(), MachineState::AskBeverage);
    assert_eq!(h.controller.machine().selected_beverage(), None);

    let resources = h.controller.machine().resources();
    assert_eq!(resources.water_level, 97.0);
    assert_eq!(resources.coffee_level, 93.0);
    assert_eq!(resources.cleaning_cycles, 1);
    assert!(resources.cup_present);

    let events = h.sink.events.lock().unwrap();
    let select_event = events
        .iter()
        .find(|event| event.event == "command_select_beverage")
        .expect("select command should be on the event feed");
    assert_eq!(select_event.data["beverage"], "espresso");
}

#[test]
fn test_selection_window_expires_to_ready() {
    let mut h = harness(fast_catalog(), Box::new(MemoryEventStore::new()));

    block_on(async {
        h.processor.submit(Command::TurnOn).await;
        h.run_for(100).await;
        h.processor.submit(Command::PlaceCup).await;
        h.run_for(500).await;
    });

    assert_eq!(h.controller.state(), MachineState::Ready);
    assert!(!h.controller.machine().resources().cup_present);
}

#[test]
fn test_empty_water_faults_and_refill_recovers() {
    // First espresso drains the tank to 5%, below the 10% floor
    let mut catalog = fast_catalog();
    catalog.espresso.water_units = 950.0;
    let mut h = harness(catalog, Box::new(MemoryEventStore::new()));

    block_on(async {
        h.processor.submit(Command::TurnOn).await;
        h.run_for(100).await;
        h.processor.submit(Command::PlaceCup).await;
        h.processor
            .submit(Command::SelectBeverage {
                beverage: Beverage::Espresso,
            })
            .await;
        h.processor.submit(Command::ConfirmSelection).await;
        h.run_for(100).await;
        h.processor
            .submit(Command::SelectBeverage {
                beverage: Beverage::Espresso,
            })
            .await;
        h.processor.submit(Command::ConfirmSelection).await;
        h.run_for(50).await;
    });

    assert_eq!(h.controller.state(), MachineState::Error);
    assert_eq!(
        h.controller.machine().error_kind(),
        Some(ErrorKind::WaterEmpty)
    );
    assert_eq!(h.controller.machine().resources().water_level, 5.0);

    block_on(async {
        h.processor.submit(Command::RefillWater).await;
        h.run_for(50).await;
    });

    assert_eq!(h.controller.state(), MachineState::Ready);
    assert_eq!(h.controller.machine().resources().water_level, 100.0);
    assert_eq!(h.controller.machine().error_kind(), None);
}

#[test]
fn test_cup_removed_mid_brew_skips_deduction() {
    let mut catalog = fast_catalog();
    catalog.espresso.brew_ms = 300;
    let mut h = harness(catalog, Box::new(MemoryEventStore::new()));

    block_on(async {
        h.processor.submit(Command::TurnOn).await;
        h.run_for(100).await;
        h.processor.submit(Command::PlaceCup).await;
        h.processor
            .submit(Command::SelectBeverage {
                beverage: Beverage::Espresso,
            })
            .await;
        h.processor.submit(Command::ConfirmSelection).await;
        h.run_for(50).await;
        h.processor.submit(Command::RemoveCup).await;
        // Long enough for the cancelled brew deadline to pass
        h.run_for(400).await;
    });

    assert_eq!(h.controller.state(), MachineState::Error);
    assert_eq!(
        h.controller.machine().error_kind(),
        Some(ErrorKind::CupMissing)
    );

    let resources = h.controller.machine().resources();
    assert_eq!(resources.water_level, 100.0);
    assert_eq!(resources.coffee_level, 100.0);
    assert_eq!(resources.cleaning_cycles, 0);
}

#[test]
fn test_recorded_history_replays_to_live_sequence() {
    let dir = tempfile::tempdir().unwrap();
    let store = JsonlEventStore::open(dir.path()).unwrap();
    let mut h = harness(fast_catalog(), Box::new(store));

    block_on(async {
        h.processor.submit(Command::TurnOn).await;
        h.run_for(100).await;
        h.processor.submit(Command::PlaceCup).await;
        h.processor
            .submit(Command::SelectBeverage {
                beverage: Beverage::Espresso,
            })
            .await;
        h.processor.submit(Command::ConfirmSelection).await;
        h.run_for(100).await;
        h.processor.shutdown().await;
        h.run_for(100).await;
    });

    let records = read_events(dir.path().join(EVENTS_FILE)).unwrap();
    let states = replay_states(&records);
    assert_eq!(
        states,
        vec![
            MachineState::Off,
            MachineState::SelfCheck,
            MachineState::Ready,
            MachineState::AskBeverage,
            MachineState::ProduceBeverage,
            MachineState::AskBeverage,
        ]
    );

    let seqs: Vec<u64> = records.iter().map(|record| record.seq).collect();
    assert!(seqs.windows(2).all(|pair| pair[0] < pair[1]));
    assert!(records
        .iter()
        .any(|record| record.event_type == "command_turn_on"));
}

#[test]
fn test_status_published_on_every_transition() {
    let mut h = harness(fast_catalog(), Box::new(MemoryEventStore::new()));

    block_on(async {
        h.processor.submit(Command::TurnOn).await;
        h.run_for(100).await;
        h.processor.submit(Command::PlaceCup).await;
        h.processor
            .submit(Command::SelectBeverage {
                beverage: Beverage::Espresso,
            })
            .await;
        h.processor.submit(Command::ConfirmSelection).await;
        h.run_for(100).await;
    });

    let statuses = h.sink.statuses.lock().unwrap();
    // Startup plus five transitions; the selection itself does not move state
    assert_eq!(statuses.len(), 6);
    assert_eq!(statuses[0].state, MachineState::Off);

    let last = statuses.last().unwrap();
    assert_eq!(last.state, MachineState::AskBeverage);
    assert_eq!(last.resources.cleaning_cycles, 1);
    assert_eq!(last.available_beverages.len(), 3);
}

#[test]
fn test_queued_power_cycle_burst_never_faults() {
    let mut h = harness(fast_catalog(), Box::new(MemoryEventStore::new()));

    // A piped script can fill the whole intake before the engine gets a
    // turn; every command in the batch is valid, so none may fault
    block_on(async {
        for _ in 0..7 {
            h.processor.submit(Command::TurnOn).await;
            h.processor.submit(Command::TurnOff).await;
        }
        h.processor.submit(Command::TurnOn).await;
        h.run_for(100).await;
    });

    assert_eq!(h.controller.state(), MachineState::Ready);
    assert_eq!(h.controller.machine().error_kind(), None);

    let statuses = h.sink.statuses.lock().unwrap();
    assert!(statuses
        .iter()
        .all(|status| status.state != MachineState::Error));
    // Startup plus fifteen power flips plus the completed self check
    assert_eq!(statuses.len(), 17);
}

#[test]
fn test_shutdown_stops_controller() {
    let mut h = harness(fast_catalog(), Box::new(MemoryEventStore::new()));

    block_on(async {
        h.processor.submit(Command::TurnOn).await;
        h.processor.shutdown().await;
        let raced = select(h.controller.run(), h.driver.run()).await;
        assert!(matches!(raced, Either::First(())));
    });

    assert_eq!(h.controller.state(), MachineState::SelfCheck);
}
