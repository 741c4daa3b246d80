//! Threshold checks of a single reading against a preset. Pure; no I/O.

use std::fmt;

use crate::store::Preset;

/// The reading kinds a preset carries bounds for. Wire names are matched
/// exactly (case-sensitive).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReadingType {
    Temperature,
    AirHumidity,
    SoilHumidity,
}

impl ReadingType {
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "temperature" => Some(Self::Temperature),
            "air humidity" => Some(Self::AirHumidity),
            "soil humidity" => Some(Self::SoilHumidity),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Temperature => "temperature",
            Self::AirHumidity => "air humidity",
            Self::SoilHumidity => "soil humidity",
        }
    }
}

impl fmt::Display for ReadingType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Inclusive `[min, max]` range.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Bounds {
    pub min: f64,
    pub max: f64,
}

impl Bounds {
    pub fn contains(&self, value: f64) -> bool {
        value >= self.min && value <= self.max
    }
}

impl Preset {
    pub fn bounds(&self, kind: ReadingType) -> Bounds {
        match kind {
            ReadingType::Temperature => Bounds {
                min: self.min_temperature,
                max: self.max_temperature,
            },
            ReadingType::AirHumidity => Bounds {
                min: self.min_air_humidity,
                max: self.max_air_humidity,
            },
            ReadingType::SoilHumidity => Bounds {
                min: self.min_soil_humidity,
                max: self.max_soil_humidity,
            },
        }
    }
}

/// True when `value` lies strictly below the type's min or strictly above its
/// max. Types the preset does not model never alert.
pub fn is_out_of_range(reading_type: &str, value: f64, preset: &Preset) -> bool {
    match ReadingType::parse(reading_type) {
        Some(kind) => !preset.bounds(kind).contains(value),
        None => false,
    }
}

// ===========================================================================
// Tests
// ===========================================================================

#[cfg(test)]
mod tests {
    use super::*;

    fn preset() -> Preset {
        Preset {
            id: 1,
            name: "Test".into(),
            min_temperature: 10.0,
            max_temperature: 25.0,
            min_air_humidity: 40.0,
            max_air_humidity: 70.0,
            min_soil_humidity: 30.0,
            max_soil_humidity: 60.0,
            hours_of_light: 12,
        }
    }

    // -- ReadingType --------------------------------------------------------

    #[test]
    fn parse_recognised_types() {
        assert_eq!(ReadingType::parse("temperature"), Some(ReadingType::Temperature));
        assert_eq!(ReadingType::parse("air humidity"), Some(ReadingType::AirHumidity));
        assert_eq!(ReadingType::parse("soil humidity"), Some(ReadingType::SoilHumidity));
    }

    #[test]
    fn parse_is_case_sensitive() {
        assert_eq!(ReadingType::parse("Temperature"), None);
        assert_eq!(ReadingType::parse("AirHumidity"), None);
        assert_eq!(ReadingType::parse("soil_humidity"), None);
        assert_eq!(ReadingType::parse(""), None);
    }

    #[test]
    fn display_matches_wire_name() {
        for kind in [
            ReadingType::Temperature,
            ReadingType::AirHumidity,
            ReadingType::SoilHumidity,
        ] {
            assert_eq!(ReadingType::parse(&kind.to_string()), Some(kind));
        }
    }

    // -- is_out_of_range ----------------------------------------------------

    #[test]
    fn temperature_above_max_is_out_of_range() {
        assert!(is_out_of_range("temperature", 30.0, &preset()));
    }

    #[test]
    fn temperature_below_min_is_out_of_range() {
        assert!(is_out_of_range("temperature", 9.99, &preset()));
    }

    #[test]
    fn temperature_inside_is_in_range() {
        assert!(!is_out_of_range("temperature", 20.0, &preset()));
    }

    #[test]
    fn bounds_are_inclusive() {
        let p = preset();
        assert!(!is_out_of_range("temperature", 10.0, &p));
        assert!(!is_out_of_range("temperature", 25.0, &p));
        assert!(!is_out_of_range("air humidity", 40.0, &p));
        assert!(!is_out_of_range("air humidity", 70.0, &p));
        assert!(!is_out_of_range("soil humidity", 30.0, &p));
        assert!(!is_out_of_range("soil humidity", 60.0, &p));
    }

    #[test]
    fn each_type_uses_its_own_bounds() {
        let p = preset();
        // 35 is fine for soil (30..60) but too hot (10..25) and too dry (40..70).
        assert!(is_out_of_range("temperature", 35.0, &p));
        assert!(is_out_of_range("air humidity", 35.0, &p));
        assert!(!is_out_of_range("soil humidity", 35.0, &p));

        assert!(is_out_of_range("air humidity", 70.5, &p));
        assert!(is_out_of_range("soil humidity", 29.0, &p));
        assert!(is_out_of_range("soil humidity", 61.0, &p));
    }

    #[test]
    fn unrecognised_type_never_alerts() {
        let p = preset();
        assert!(!is_out_of_range("CO2 levels", 1e9, &p));
        assert!(!is_out_of_range("brightness", -1e9, &p));
        assert!(!is_out_of_range("Temperature", 1000.0, &p));
    }

    #[test]
    fn repeated_calls_agree() {
        let p = preset();
        let first = is_out_of_range("temperature", 30.0, &p);
        for _ in 0..10 {
            assert_eq!(is_out_of_range("temperature", 30.0, &p), first);
        }
    }

    #[test]
    fn definition_holds_over_a_sweep() {
        let p = preset();
        for kind in [
            ReadingType::Temperature,
            ReadingType::AirHumidity,
            ReadingType::SoilHumidity,
        ] {
            let b = p.bounds(kind);
            for step in -40..=200 {
                let v = step as f64 * 0.5;
                assert_eq!(
                    is_out_of_range(kind.as_str(), v, &p),
                    v < b.min || v > b.max,
                    "{kind} at {v}"
                );
                assert_eq!(b.contains(v), !is_out_of_range(kind.as_str(), v, &p));
            }
        }
    }
}
