pub mod types;
pub mod recipes;
pub mod resources;
pub mod states;
pub mod scheduler;
pub mod store;
pub mod events;
pub mod processor;
pub mod controller;

pub use types::*;
pub use controller::*;
