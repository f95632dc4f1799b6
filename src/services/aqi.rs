//! US AQI → PM2.5 concentration.
//!
//! IQAir's free `city` endpoint only reports the US AQI and the name of the
//! dominant pollutant, while the model is trained on PM2.5 concentrations in
//! µg/m³. The index is piecewise linear in the concentration, so it can be
//! inverted segment by segment with the US EPA PM2.5 breakpoint table as
//! revised in February 2024 (in force since May 2024). Its "good" segment
//! ends at 9.0 µg/m³ instead of 12.0, and AQI 500 sits at 325.4 µg/m³.

use std::fmt;
use std::str::FromStr;

/// How the live AQI is turned into a value for the target column.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AqiConversion {
    /// Invert the PM2.5 AQI breakpoints to a concentration in µg/m³.
    Pm25,
    /// Use the AQI value as-is.
    Raw,
}

impl FromStr for AqiConversion {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "pm25" | "pm2.5" => Ok(AqiConversion::Pm25),
            "raw" => Ok(AqiConversion::Raw),
            other => Err(format!(
                "AQI_CONVERSION must be 'pm25' or 'raw', got '{}'",
                other
            )),
        }
    }
}

impl fmt::Display for AqiConversion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AqiConversion::Pm25 => write!(f, "pm25"),
            AqiConversion::Raw => write!(f, "raw"),
        }
    }
}

/// (AQI low, AQI high, concentration low, concentration high), EPA 2024.
const PM25_BREAKPOINTS: [(f64, f64, f64, f64); 6] = [
    (0.0, 50.0, 0.0, 9.0),
    (51.0, 100.0, 9.1, 35.4),
    (101.0, 150.0, 35.5, 55.4),
    (151.0, 200.0, 55.5, 125.4),
    (201.0, 300.0, 125.5, 225.4),
    (301.0, 500.0, 225.5, 325.4),
];

/// Convert a US AQI value to a PM2.5 concentration (µg/m³).
///
/// AQI values between two segments (e.g. 50.5) use the upper segment's
/// start; values above 500 extrapolate the last segment. Negative or
/// non-finite values have no concentration.
pub fn aqi_to_pm25(aqi: f64) -> Option<f64> {
    if !aqi.is_finite() || aqi < 0.0 {
        return None;
    }

    let (i_lo, i_hi, c_lo, c_hi) = PM25_BREAKPOINTS
        .iter()
        .copied()
        .find(|(_, i_hi, _, _)| aqi <= *i_hi)
        .unwrap_or(PM25_BREAKPOINTS[PM25_BREAKPOINTS.len() - 1]);

    let aqi = aqi.max(i_lo);
    Some((aqi - i_lo) * (c_hi - c_lo) / (i_hi - i_lo) + c_lo)
}

impl AqiConversion {
    pub fn apply(self, aqi: f64) -> Option<f64> {
        match self {
            AqiConversion::Pm25 => aqi_to_pm25(aqi),
            AqiConversion::Raw => aqi.is_finite().then_some(aqi),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn approx(a: f64, b: f64) -> bool {
        (a - b).abs() < 1e-9
    }

    #[test]
    fn test_segment_bounds() {
        assert!(approx(aqi_to_pm25(0.0).unwrap(), 0.0));
        assert!(approx(aqi_to_pm25(50.0).unwrap(), 9.0));
        assert!(approx(aqi_to_pm25(51.0).unwrap(), 9.1));
        assert!(approx(aqi_to_pm25(100.0).unwrap(), 35.4));
        assert!(approx(aqi_to_pm25(200.0).unwrap(), 125.4));
        assert!(approx(aqi_to_pm25(500.0).unwrap(), 325.4));
    }

    #[test]
    fn test_inside_segment() {
        // halfway through 0..50 → 4.5 µg/m³
        assert!(approx(aqi_to_pm25(25.0).unwrap(), 4.5));
        // AQI 151 starts the 55.5 segment
        assert!(approx(aqi_to_pm25(151.0).unwrap(), 55.5));
    }

    #[test]
    fn test_gap_between_segments() {
        assert!(approx(aqi_to_pm25(50.5).unwrap(), 9.1));
    }

    #[test]
    fn test_above_scale_extrapolates() {
        let c = aqi_to_pm25(600.0).unwrap();
        assert!(c > 325.4);
    }

    #[test]
    fn test_upper_segments_use_2024_table() {
        // 12.0 µg/m³ was the top of "good" before 2024; it is now moderate
        assert!(aqi_to_pm25(50.0).unwrap() < 12.0);
        // AQI 300 ends at 225.4 (250.4 before)
        assert!(approx(aqi_to_pm25(300.0).unwrap(), 225.4));
        // 301..500 is one segment
        assert!(approx(aqi_to_pm25(400.5).unwrap(), 275.45));
    }

    #[test]
    fn test_invalid_aqi() {
        assert_eq!(aqi_to_pm25(-1.0), None);
        assert_eq!(aqi_to_pm25(f64::NAN), None);
    }

    #[test]
    fn test_apply_raw_keeps_value() {
        assert_eq!(AqiConversion::Raw.apply(57.0), Some(57.0));
    }

    #[test]
    fn test_parse() {
        assert_eq!("PM25".parse::<AqiConversion>(), Ok(AqiConversion::Pm25));
        assert_eq!("raw".parse::<AqiConversion>(), Ok(AqiConversion::Raw));
        assert!("linear".parse::<AqiConversion>().is_err());
    }
}
