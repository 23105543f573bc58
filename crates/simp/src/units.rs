use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

const PARSEC_IN_METERS: f64 = 3.085_677_581_491_367e16;

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum UnitError {
    #[error("unknown unit {0:?}")]
    Unknown(String),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum DistanceUnit {
    Meter,
    Kilometer,
    AstronomicalUnit,
    LightYear,
    #[default]
    Parsec,
    Kiloparsec,
    Megaparsec,
}

impl DistanceUnit {
    pub const ALL: [DistanceUnit; 7] = [
        DistanceUnit::Meter,
        DistanceUnit::Kilometer,
        DistanceUnit::AstronomicalUnit,
        DistanceUnit::LightYear,
        DistanceUnit::Parsec,
        DistanceUnit::Kiloparsec,
        DistanceUnit::Megaparsec,
    ];

    /// Token sent in `pos.unit` and `vel.unit`.
    pub fn as_str(&self) -> &'static str {
        match self {
            DistanceUnit::Meter => "m",
            DistanceUnit::Kilometer => "km",
            DistanceUnit::AstronomicalUnit => "AU",
            DistanceUnit::LightYear => "ly",
            DistanceUnit::Parsec => "pc",
            DistanceUnit::Kiloparsec => "kpc",
            DistanceUnit::Megaparsec => "Mpc",
        }
    }

    pub fn parsecs(&self) -> f64 {
        match self {
            DistanceUnit::Meter => 1.0 / PARSEC_IN_METERS,
            DistanceUnit::Kilometer => 1.0e3 / PARSEC_IN_METERS,
            DistanceUnit::AstronomicalUnit => 1.0 / 206_264.806_247_096_36,
            DistanceUnit::LightYear => 0.306_601_393_786_921_3,
            DistanceUnit::Parsec => 1.0,
            DistanceUnit::Kiloparsec => 1.0e3,
            DistanceUnit::Megaparsec => 1.0e6,
        }
    }
}

impl fmt::Display for DistanceUnit {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for DistanceUnit {
    type Err = UnitError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim() {
            "m" => Ok(DistanceUnit::Meter),
            "km" => Ok(DistanceUnit::Kilometer),
            "AU" | "au" => Ok(DistanceUnit::AstronomicalUnit),
            "ly" | "lyr" => Ok(DistanceUnit::LightYear),
            "pc" => Ok(DistanceUnit::Parsec),
            "kpc" => Ok(DistanceUnit::Kiloparsec),
            "Mpc" => Ok(DistanceUnit::Megaparsec),
            other => Err(UnitError::Unknown(other.to_string())),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum TimeUnit {
    #[default]
    Second,
    Minute,
    Hour,
    Year,
}

impl TimeUnit {
    /// Token sent in `vel.t.unit`.
    pub fn as_str(&self) -> &'static str {
        match self {
            TimeUnit::Second => "s",
            TimeUnit::Minute => "min",
            TimeUnit::Hour => "h",
            TimeUnit::Year => "yr",
        }
    }
}

impl fmt::Display for TimeUnit {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for TimeUnit {
    type Err = UnitError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim() {
            "s" => Ok(TimeUnit::Second),
            "min" => Ok(TimeUnit::Minute),
            "h" => Ok(TimeUnit::Hour),
            "yr" | "a" => Ok(TimeUnit::Year),
            other => Err(UnitError::Unknown(other.to_string())),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_distance_tokens_parse_back() {
        for unit in DistanceUnit::ALL {
            assert_eq!(unit.as_str().parse::<DistanceUnit>(), Ok(unit));
        }
        assert_eq!("lyr".parse::<DistanceUnit>(), Ok(DistanceUnit::LightYear));
    }

    #[test]
    fn test_parsec_scale() {
        assert_eq!(DistanceUnit::Kiloparsec.parsecs(), 1000.0);
        let au_per_pc = 1.0 / DistanceUnit::AstronomicalUnit.parsecs();
        assert!((au_per_pc - 206_264.8).abs() < 0.1);
        let ly_per_pc = 1.0 / DistanceUnit::LightYear.parsecs();
        assert!((ly_per_pc - 3.2616).abs() < 1e-3);
    }

    #[test]
    fn test_time_units() {
        assert_eq!("yr".parse::<TimeUnit>(), Ok(TimeUnit::Year));
        assert_eq!(TimeUnit::Minute.as_str(), "min");
        assert_eq!(
            "fortnight".parse::<TimeUnit>(),
            Err(UnitError::Unknown("fortnight".to_string()))
        );
    }

    #[test]
    fn test_unknown_distance() {
        assert!(matches!(
            "furlong".parse::<DistanceUnit>(),
            Err(UnitError::Unknown(unit)) if unit == "furlong"
        ));
    }
}
