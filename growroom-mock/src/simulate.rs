use std::f64::consts::PI;

use growroom_api::Sector;
use growroom_api::models::SensorUpdate;
use rand::Rng;
use time::OffsetDateTime;

/// Position of `now` within its day, in `[0, 1)`.
pub fn day_fraction(now: OffsetDateTime) -> f64 {
    let (hour, minute, second) = now.time().as_hms();
    let seconds = hour as u32 * 3600 + minute as u32 * 60 + second as u32;

    seconds as f64 / 86400.0
}

pub fn simulated_lux(day_fraction: f64) -> f64 {
    let radians = day_fraction * 2.0 * PI;

    const MAX_SUNLIGHT_LUX: f64 = 500.0;
    const MAX_MOONLIGHT_LUX: f64 = 5.0;

    const SUNRISE_START: f64 = 0.23;
    const SUNRISE_END: f64 = 0.25;
    const SUNSET_START: f64 = 0.73;
    const SUNSET_END: f64 = 0.75;

    if (SUNRISE_START..=SUNSET_END).contains(&day_fraction) {
        if day_fraction <= SUNRISE_END {
            let progress = (day_fraction - SUNRISE_START) / (SUNRISE_END - SUNRISE_START);
            (progress * PI / 2.0).sin() * MAX_SUNLIGHT_LUX
        } else if day_fraction >= SUNSET_START {
            let progress = (day_fraction - SUNSET_START) / (SUNSET_END - SUNSET_START);
            (progress * PI / 2.0).cos() * MAX_SUNLIGHT_LUX
        } else {
            MAX_SUNLIGHT_LUX
        }
    } else {
        // Moonlight peaks at midnight
        (radians + PI).cos().max(0.0) * (MAX_MOONLIGHT_LUX - 0.01) + 0.01
    }
}

pub fn simulated_humidity(day_fraction: f64) -> f64 {
    let radians = day_fraction * 2.0 * PI;

    if (0.3..=0.7).contains(&day_fraction) {
        (radians.sin().max(0.0) * 25.0 + 65.0).round()
    } else {
        (radians.cos().max(0.0) * 30.0 + 60.0).round()
    }
}

pub fn simulated_temperature(day_fraction: f64) -> f64 {
    let radians = day_fraction * 2.0 * PI;

    radians.sin().max(0.0) * 20.0 + 10.0
}

fn round1(value: f64) -> f64 {
    (value * 10.0).round() / 10.0
}

/// One pushed update for `sector`, with a little noise per sector.
pub fn sector_update(sector: Sector, day_fraction: f64) -> SensorUpdate {
    let mut rng = rand::rng();

    SensorUpdate {
        temperature: Some(round1(
            simulated_temperature(day_fraction) + rng.random_range(-0.5..0.5),
        )),
        humidity: Some(round1(
            (simulated_humidity(day_fraction) + rng.random_range(-1.0..1.0)).clamp(0.0, 100.0),
        )),
        light: Some(simulated_lux(day_fraction).round()),
        sector,
    }
}
