use crate::recipes::Recipe;
use crate::types::{
    ErrorKind, AMBIENT_TEMPERATURE_C, COFFEE_FLOOR_PERCENT, FULL_LEVEL_PERCENT,
    WATER_FLOOR_PERCENT,
};
use serde::{Deserialize, Serialize};

/// Consumable state of the machine. Levels are percentages of a full
/// tank/hopper, temperature in degrees Celsius.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Resources {
    pub water_level: f32,
    pub coffee_level: f32,
    pub temperature: i32,
    pub cup_present: bool,
    pub cleaning_cycles: u32,
}

impl Default for Resources {
    fn default() -> Self {
        Self {
            water_level: FULL_LEVEL_PERCENT,
            coffee_level: FULL_LEVEL_PERCENT,
            temperature: AMBIENT_TEMPERATURE_C,
            cup_present: false,
            cleaning_cycles: 0,
        }
    }
}

impl Resources {
    /// Fixed floor check: the gate does not look at what the next brew
    /// will actually cost.
    pub fn has_sufficient_resources(&self) -> bool {
        self.water_level >= WATER_FLOOR_PERCENT && self.coffee_level >= COFFEE_FLOOR_PERCENT
    }

    /// Which error a dispense attempt would raise right now. Water is
    /// checked before coffee, so a doubly empty machine reports water.
    pub fn depleted_kind(&self) -> Option<ErrorKind> {
        if self.has_sufficient_resources() {
            None
        } else if self.water_level < WATER_FLOOR_PERCENT {
            Some(ErrorKind::WaterEmpty)
        } else {
            Some(ErrorKind::CoffeeEmpty)
        }
    }

    pub fn consume(&mut self, recipe: &Recipe) {
        let water_cost = recipe.water_units / 10.0;
        self.water_level = (self.water_level - water_cost).clamp(0.0, FULL_LEVEL_PERCENT);
        self.coffee_level =
            (self.coffee_level - recipe.coffee_grams).clamp(0.0, FULL_LEVEL_PERCENT);
    }

    pub fn refill_water(&mut self) {
        self.water_level = FULL_LEVEL_PERCENT;
    }

    pub fn refill_coffee(&mut self) {
        self.coffee_level = FULL_LEVEL_PERCENT;
    }
}
