use serde::{Deserialize, Serialize};
use time::Time;
use time::macros::{format_description, time};

time::serde::format_description!(hhmm, Time, "[hour]:[minute]");

/// Error percentage used when the operator leaves the field empty.
pub const DEFAULT_ERROR_PERCENTAGE: f64 = 10.0;

/// Daily on/off window of a scheduled device.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ScheduleWindow {
    /// Time of day the device switches on
    #[serde(with = "hhmm")]
    pub start_time: Time,
    /// Time of day the device switches off
    #[serde(with = "hhmm")]
    pub end_time: Time,
}

impl ScheduleWindow {
    pub fn new(start_time: Time, end_time: Time) -> Self {
        Self {
            start_time,
            end_time,
        }
    }

    /// Parses a window from two `HH:MM` strings.
    pub fn parse(start: &str, end: &str) -> Result<Self, time::error::Parse> {
        let format = format_description!("[hour]:[minute]");

        Ok(Self {
            start_time: Time::parse(start, &format)?,
            end_time: Time::parse(end, &format)?,
        })
    }

    /// Whether `now` falls inside the window. Windows may wrap past midnight.
    pub fn contains(&self, now: Time) -> bool {
        if self.start_time <= self.end_time {
            now >= self.start_time && now < self.end_time
        } else {
            now >= self.start_time || now < self.end_time
        }
    }
}

impl Default for ScheduleWindow {
    fn default() -> Self {
        Self {
            start_time: time!(00:00),
            end_time: time!(23:59),
        }
    }
}

/// Clamps an operator supplied error percentage into `[1, 100]`.
///
/// Zero and non-finite input fall back to [`DEFAULT_ERROR_PERCENTAGE`].
pub fn clamp_error_percentage(percentage: f64) -> f64 {
    if !percentage.is_finite() || percentage == 0.0 {
        return DEFAULT_ERROR_PERCENTAGE;
    }

    percentage.clamp(1.0, 100.0)
}

/// Acceptable `[min, max]` range around a target value.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ThresholdBand {
    pub min: f64,
    pub max: f64,
}

impl ThresholdBand {
    /// Derives the band from a target and a tolerance in percent.
    pub fn around(target: f64, error_percentage: f64) -> Self {
        let percentage = clamp_error_percentage(error_percentage);

        Self {
            min: target * (1.0 - percentage / 100.0),
            max: target * (1.0 + percentage / 100.0),
        }
    }

    pub fn contains(&self, value: f64) -> bool {
        !(value < self.min || value > self.max)
    }
}

/// Extra fields of a plain `start` command.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StartCommand {
    pub command: String,
    #[serde(flatten)]
    pub schedule: Option<ScheduleWindow>,
}

impl StartCommand {
    pub fn new(schedule: Option<ScheduleWindow>) -> Self {
        Self {
            command: String::from("start"),
            schedule,
        }
    }
}

/// Extra fields of a threshold monitoring `start` command.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ThresholdStart {
    pub command: String,
    pub threshold_value: f64,
    pub min_threshold: f64,
    pub max_threshold: f64,
    pub error_percentage: f64,
    pub unit: String,
}

impl ThresholdStart {
    pub fn new(target: f64, error_percentage: f64, unit: impl Into<String>) -> Self {
        let error_percentage = clamp_error_percentage(error_percentage);
        let band = ThresholdBand::around(target, error_percentage);

        Self {
            command: String::from("start"),
            threshold_value: target,
            min_threshold: band.min,
            max_threshold: band.max,
            error_percentage,
            unit: unit.into(),
        }
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    #[test]
    fn test_band_matches_formula() {
        for (target, pct) in [(25.0, 10.0), (60.0, 5.0), (500.0, 100.0), (3.3, 1.0)] {
            let band = ThresholdBand::around(target, pct);
            assert_eq!(band.min, target * (1.0 - pct / 100.0));
            assert_eq!(band.max, target * (1.0 + pct / 100.0));
        }

        let band = ThresholdBand::around(25.0, 10.0);
        assert!((band.min - 22.5).abs() < 1e-9);
        assert!((band.max - 27.5).abs() < 1e-9);
        assert!(band.contains(22.5));
        assert!(band.contains(27.5));
        assert!(!band.contains(30.0));
        assert!(!band.contains(20.0));
    }

    #[test]
    fn test_error_percentage_clamped() {
        assert_eq!(clamp_error_percentage(0.0), DEFAULT_ERROR_PERCENTAGE);
        assert_eq!(clamp_error_percentage(f64::NAN), DEFAULT_ERROR_PERCENTAGE);
        assert_eq!(clamp_error_percentage(0.2), 1.0);
        assert_eq!(clamp_error_percentage(-4.0), 1.0);
        assert_eq!(clamp_error_percentage(250.0), 100.0);
        assert_eq!(clamp_error_percentage(15.0), 15.0);

        let band = ThresholdBand::around(100.0, 400.0);
        assert_eq!(band.min, 0.0);
        assert_eq!(band.max, 200.0);
    }

    #[test]
    fn test_schedule_wire_format() {
        let window = ScheduleWindow::parse("08:00", "18:00").unwrap();
        assert_eq!(
            serde_json::to_value(window).unwrap(),
            json!({ "startTime": "08:00", "endTime": "18:00" })
        );

        let parsed: ScheduleWindow =
            serde_json::from_value(json!({ "startTime": "06:30", "endTime": "21:05" })).unwrap();
        assert_eq!(parsed, ScheduleWindow::new(time!(06:30), time!(21:05)));

        assert!(ScheduleWindow::parse("8am", "18:00").is_err());
    }

    #[test]
    fn test_schedule_contains() {
        let day = ScheduleWindow::parse("08:00", "18:00").unwrap();
        assert!(day.contains(time!(12:00)));
        assert!(!day.contains(time!(18:00)));
        assert!(!day.contains(time!(07:59)));

        let night = ScheduleWindow::parse("22:00", "06:00").unwrap();
        assert!(night.contains(time!(23:30)));
        assert!(night.contains(time!(01:00)));
        assert!(!night.contains(time!(12:00)));
    }

    #[test]
    fn test_start_payloads() {
        assert_eq!(
            serde_json::to_value(StartCommand::new(None)).unwrap(),
            json!({ "command": "start" })
        );
        assert_eq!(
            serde_json::to_value(StartCommand::new(Some(ScheduleWindow::default()))).unwrap(),
            json!({ "command": "start", "startTime": "00:00", "endTime": "23:59" })
        );
        assert_eq!(
            serde_json::to_value(ThresholdStart::new(25.0, 10.0, "°C")).unwrap(),
            json!({
                "command": "start",
                "thresholdValue": 25.0,
                "minThreshold": 25.0 * (1.0 - 10.0 / 100.0),
                "maxThreshold": 25.0 * (1.0 + 10.0 / 100.0),
                "errorPercentage": 10.0,
                "unit": "°C"
            })
        );
    }
}
