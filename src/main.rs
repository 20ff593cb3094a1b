use barista_rs::controller::CoffeeController;
use barista_rs::events::{EventMessage, StatusSink, StatusSnapshot};
use barista_rs::processor::{CommandChannel, CommandProcessor};
use barista_rs::recipes::Catalog;
use barista_rs::scheduler::{TimerDriver, TimerScheduler};
use barista_rs::store::JsonlEventStore;
use barista_rs::types::MachineConfig;
use embassy_executor::Spawner;
use embassy_futures::block_on;
use log::info;
use std::io::BufRead;
use std::sync::Arc;

/// Writes status and event messages to stdout as JSON lines, one per
/// message, so the process can be piped into other tools.
struct StdoutSink;

impl StatusSink for StdoutSink {
    fn publish_status(&mut self, status: &StatusSnapshot) {
        match serde_json::to_string(status) {
            Ok(line) => println!("status {}", line),
            Err(e) => log::error!("Failed to encode status: {}", e),
        }
    }

    fn publish_event(&mut self, event: &EventMessage) {
        match serde_json::to_string(event) {
            Ok(line) => println!("event {}", line),
            Err(e) => log::error!("Failed to encode event: {}", e),
        }
    }
}

#[embassy_executor::main]
async fn main(spawner: Spawner) {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive(tracing_subscriber::filter::LevelFilter::INFO.into()),
        )
        .init();

    info!("Starting coffee machine controller");

    let data_dir =
        std::env::var("BARISTA_DATA_DIR").unwrap_or_else(|_| "dispenser-events".to_string());
    let store = match JsonlEventStore::open(&data_dir) {
        Ok(store) => store,
        Err(e) => {
            log::error!("Failed to open event store in {}: {:?}", data_dir, e);
            return;
        }
    };
    info!("Recording events under {}", data_dir);

    let intake: Arc<CommandChannel> = Arc::new(CommandChannel::new());
    let (scheduler, driver) = TimerScheduler::new(Arc::clone(&intake));
    let controller = CoffeeController::new(
        MachineConfig::default(),
        Catalog::standard(),
        Box::new(store),
        Box::new(StdoutSink),
        scheduler,
        Arc::clone(&intake),
    );
    let processor = CommandProcessor::new(intake);

    if let Err(e) = spawner.spawn(timer_task(driver)) {
        log::error!("Failed to spawn timer task: {:?}", e);
        return;
    }
    if let Err(e) = spawner.spawn(controller_task(controller)) {
        log::error!("Failed to spawn controller task: {:?}", e);
        return;
    }

    print_usage();

    // Stdin is blocking, so it gets its own OS thread instead of a task
    // on the executor.
    std::thread::spawn(move || {
        let stdin = std::io::stdin();
        for line in stdin.lock().lines() {
            let line = match line {
                Ok(line) => line,
                Err(_) => break,
            };
            let line = line.trim();
            if line.is_empty() {
                continue;
            }
            if line == "quit" || line == "exit" {
                break;
            }
            block_on(processor.submit_json(line));
        }
        block_on(processor.shutdown());
    });
}

fn print_usage() {
    println!("Commands are JSON lines, for example:");
    println!("  {{\"command\": \"turn_on\"}}");
    println!("  {{\"command\": \"place_cup\"}}");
    println!("  {{\"command\": \"select_beverage\", \"payload\": {{\"beverage\": \"espresso\"}}}}");
    println!("  {{\"command\": \"confirm_selection\"}}");
    println!("Type 'quit' to exit.");
}

#[embassy_executor::task]
async fn controller_task(mut controller: CoffeeController) {
    controller.run().await;
    info!("Controller stopped, exiting");
    std::process::exit(0);
}

#[embassy_executor::task]
async fn timer_task(mut driver: TimerDriver) {
    driver.run().await;
}
