use core::fmt;
use core::str::FromStr;
use embassy_time::Duration;
use serde::{Deserialize, Serialize};

/// The fixed menu. Closed on purpose: an id that does not parse into this
/// enum never reaches the state machine.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Beverage {
    Espresso,
    Cappuccino,
    Americano,
}

impl Beverage {
    pub const ALL: [Beverage; 3] = [Beverage::Espresso, Beverage::Cappuccino, Beverage::Americano];

    pub fn as_str(&self) -> &'static str {
        match self {
            Beverage::Espresso => "espresso",
            Beverage::Cappuccino => "cappuccino",
            Beverage::Americano => "americano",
        }
    }
}

impl fmt::Display for Beverage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct UnknownBeverage;

impl fmt::Display for UnknownBeverage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "unknown beverage")
    }
}

impl std::error::Error for UnknownBeverage {}

impl FromStr for Beverage {
    type Err = UnknownBeverage;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "espresso" => Ok(Beverage::Espresso),
            "cappuccino" => Ok(Beverage::Cappuccino),
            "americano" => Ok(Beverage::Americano),
            _ => Err(UnknownBeverage),
        }
    }
}

/// Water is in tank units (10 units = 1% of the tank), coffee in grams
/// (1 g = 1% of the hopper).
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Recipe {
    pub brew_ms: u64,
    pub water_units: f32,
    pub coffee_grams: f32,
}

impl Recipe {
    pub fn brew_duration(&self) -> Duration {
        Duration::from_millis(self.brew_ms)
    }
}

/// One recipe per menu entry, fixed at construction.
#[derive(Debug, Clone)]
pub struct Catalog {
    pub espresso: Recipe,
    pub cappuccino: Recipe,
    pub americano: Recipe,
}

impl Catalog {
    pub fn standard() -> Self {
        Self {
            espresso: Recipe {
                brew_ms: 3_000,
                water_units: 30.0,
                coffee_grams: 7.0,
            },
            cappuccino: Recipe {
                brew_ms: 5_000,
                water_units: 150.0,
                coffee_grams: 7.0,
            },
            americano: Recipe {
                brew_ms: 4_000,
                water_units: 200.0,
                coffee_grams: 7.0,
            },
        }
    }

    pub fn recipe(&self, beverage: Beverage) -> Recipe {
        match beverage {
            Beverage::Espresso => self.espresso,
            Beverage::Cappuccino => self.cappuccino,
            Beverage::Americano => self.americano,
        }
    }

    pub fn beverages(&self) -> impl Iterator<Item = Beverage> + '_ {
        Beverage::ALL.iter().copied()
    }
}

impl Default for Catalog {
    fn default() -> Self {
        Self::standard()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_wire_names_round_trip() {
        for beverage in Beverage::ALL {
            assert_eq!(beverage.as_str().parse::<Beverage>(), Ok(beverage));
        }
    }

    #[test]
    fn test_unknown_name_rejected() {
        assert_eq!("mocha".parse::<Beverage>(), Err(UnknownBeverage));
        assert_eq!("Espresso".parse::<Beverage>(), Err(UnknownBeverage));
    }

    #[test]
    fn test_serde_matches_wire_names() {
        let json = serde_json::to_string(&Beverage::Cappuccino).unwrap();
        assert_eq!(json, "\"cappuccino\"");
        let parsed: Beverage = serde_json::from_str("\"americano\"").unwrap();
        assert_eq!(parsed, Beverage::Americano);
    }

    #[test]
    fn test_standard_catalog() {
        let catalog = Catalog::standard();
        let espresso = catalog.recipe(Beverage::Espresso);
        assert_eq!(espresso.brew_duration(), Duration::from_secs(3));
        assert_eq!(espresso.water_units, 30.0);
        assert_eq!(espresso.coffee_grams, 7.0);
        assert_eq!(catalog.recipe(Beverage::Cappuccino).brew_ms, 5_000);
        assert_eq!(catalog.recipe(Beverage::Americano).water_units, 200.0);
        assert_eq!(catalog.beverages().count(), 3);
    }
}
