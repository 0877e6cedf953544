//! Field normalization: unit conversions and the EPA AQI calculation.

use iotsight_common::{Error, Result};

/// Normalization strategy attached to a metric definition.
///
/// Kept as plain data (a tagged variant plus numeric parameters) so the
/// catalogs stay inspectable tables rather than embedded closures.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Normalize {
    /// Export the raw value unchanged.
    Identity,

    /// `raw * factor` (percent to ratio, milliseconds to seconds, ...).
    Scale { factor: f64 },

    /// `raw * scale + offset` (Kelvin to Fahrenheit, fixed bias corrections).
    Affine { scale: f64, offset: f64 },

    /// `min(max, raw / 100 + offset)`.
    ///
    /// Used for the PurpleAir humidity reading, which runs on average 4%
    /// below ambient conditions inside the sensor housing.
    ClampedRatio { offset: f64, max: f64 },

    /// Visual range in meters derived from the 0.3 µm particle count:
    /// `3_900_000 / (raw * 0.0195 + 10)`.
    VisualRange,

    /// Light-scattering haze index in deciviews derived from the 0.3 µm
    /// particle count: `10 * ln((raw * 0.0195 + 10) / 10)`.
    Deciview,

    /// US EPA AQI; the pollutant class is parsed from the field name.
    Aqi,
}

impl Normalize {
    /// Apply this normalization to a raw field value.
    ///
    /// Only [`Normalize::Aqi`] can fail; the other strategies are total.
    pub fn apply(&self, field: &str, raw: f64) -> Result<f64> {
        Ok(match self {
            Normalize::Identity => raw,
            Normalize::Scale { factor } => raw * factor,
            Normalize::Affine { scale, offset } => raw * scale + offset,
            Normalize::ClampedRatio { offset, max } => (raw / 100.0 + offset).min(*max),
            Normalize::VisualRange => 3_900_000.0 / (raw * 0.0195 + 10.0),
            Normalize::Deciview => 10.0 * ((raw * 0.0195 + 10.0) / 10.0).ln(),
            Normalize::Aqi => calc_epa_aqi(field, raw)?,
        })
    }
}

/// PM2.5 concentration breakpoints (µg/m³).
const BREAKPOINTS_PM25: [f64; 7] = [12.0, 35.4, 55.4, 150.4, 250.4, 350.4, 500.4];

/// PM10 concentration breakpoints (µg/m³).
const BREAKPOINTS_PM10: [f64; 7] = [54.0, 154.0, 254.0, 354.0, 424.0, 504.0, 604.0];

/// AQI values at each concentration breakpoint.
const BREAKPOINTS_AQI: [f64; 7] = [50.0, 100.0, 150.0, 200.0, 300.0, 400.0, 500.0];

/// Calculate the US EPA AQI index for the given raw pollutant value based on:
/// <https://www.airnow.gov/sites/default/files/2020-05/aqi-technical-assistance-document-sept2018.pdf>
///
/// Currently only supports PM2.5 and PM10. The pollutant class is the part of
/// the field name before the first underscore (`pm2.5_alt_a` -> PM2.5).
pub fn calc_epa_aqi(field: &str, value: f64) -> Result<f64> {
    let pollutant = field
        .split('_')
        .next()
        .unwrap_or(field)
        .to_ascii_uppercase();

    let breakpoint_pollutant = match pollutant.as_str() {
        "PM2.5" => &BREAKPOINTS_PM25,
        "PM10.0" => &BREAKPOINTS_PM10,
        "O3" | "CO" | "SO2" | "NO2" => return Err(Error::UnsupportedPollutant(pollutant)),
        _ => return Err(Error::InvalidField(field.to_string())),
    };

    // First clamp based on min and max
    if value <= 0.0 {
        return Ok(0.0);
    }
    if value >= breakpoint_pollutant[6] {
        return Ok(BREAKPOINTS_AQI[6]);
    }

    // Walk breakpoints and interpolate between the surrounding pair
    let index = breakpoint_pollutant
        .iter()
        .position(|bp| value <= *bp)
        .unwrap_or(6);

    let (aqi_lo, bp_lo) = if index > 0 {
        (BREAKPOINTS_AQI[index - 1], breakpoint_pollutant[index - 1])
    } else {
        (0.0, 0.0)
    };
    let aqi_hi = BREAKPOINTS_AQI[index];
    let bp_hi = breakpoint_pollutant[index];

    Ok((aqi_hi - aqi_lo) / (bp_hi - bp_lo) * (value - bp_lo) + aqi_lo)
}
