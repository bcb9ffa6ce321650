//! US EPA PM2.5 air quality index.

use serde::Serialize;

/// `(concentration low, concentration high, index low, index high)` with
/// concentrations in tenths of ug/m3.
const PM25_BREAKPOINTS: [(i64, i64, i64, i64); 7] = [
    (0, 120, 0, 50),
    (121, 354, 51, 100),
    (355, 554, 101, 150),
    (555, 1504, 151, 200),
    (1505, 2504, 201, 300),
    (2505, 3504, 301, 400),
    (3505, 5004, 401, 500),
];
const MAX_AQI: u16 = 500;

/// Piecewise-linear PM2.5 to AQI conversion. The concentration is truncated to
/// 0.1 ug/m3 first; values past the table clamp to 500, negative to 0.
pub fn aqi_from_pm25(pm25: f64) -> u16 {
    if pm25.is_nan() || pm25 <= 0.0 {
        return 0;
    }
    // The epsilon keeps values such as 35.4 from truncating to 35.3.
    let tenths = (pm25 * 10.0 + 1e-6).floor();
    if tenths > PM25_BREAKPOINTS[PM25_BREAKPOINTS.len() - 1].1 as f64 {
        return MAX_AQI;
    }
    let tenths = tenths as i64;

    PM25_BREAKPOINTS
        .iter()
        .find(|(_, c_hi, _, _)| tenths <= *c_hi)
        .map(|&(c_lo, c_hi, i_lo, i_hi)| {
            let slope = (i_hi - i_lo) as f64 / (c_hi - c_lo) as f64;
            (slope * (tenths - c_lo) as f64 + i_lo as f64).round() as u16
        })
        .unwrap_or(MAX_AQI)
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Serialize)]
#[serde(rename_all = "camelCase")]
pub enum AqiCategory {
    Good,
    Moderate,
    UnhealthySensitive,
    Unhealthy,
    VeryUnhealthy,
    Hazardous,
}

impl AqiCategory {
    pub fn from_aqi(aqi: u16) -> Self {
        match aqi {
            0..=50 => Self::Good,
            51..=100 => Self::Moderate,
            101..=150 => Self::UnhealthySensitive,
            151..=200 => Self::Unhealthy,
            201..=300 => Self::VeryUnhealthy,
            _ => Self::Hazardous,
        }
    }

    pub fn label(self) -> &'static str {
        match self {
            Self::Good => "Good",
            Self::Moderate => "Moderate",
            Self::UnhealthySensitive => "Unhealthy for Sensitive Groups",
            Self::Unhealthy => "Unhealthy",
            Self::VeryUnhealthy => "Very Unhealthy",
            Self::Hazardous => "Hazardous",
        }
    }

    pub fn color(self) -> &'static str {
        match self {
            Self::Good => "#00e400",
            Self::Moderate => "#ffff00",
            Self::UnhealthySensitive => "#ff7e00",
            Self::Unhealthy => "#ff0000",
            Self::VeryUnhealthy => "#99004c",
            Self::Hazardous => "#7e0023",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn category_breakpoints_are_inclusive_upper_bounds() {
        assert_eq!(AqiCategory::from_aqi(0), AqiCategory::Good);
        assert_eq!(AqiCategory::from_aqi(50), AqiCategory::Good);
        assert_eq!(AqiCategory::from_aqi(51), AqiCategory::Moderate);
        assert_eq!(AqiCategory::from_aqi(150), AqiCategory::UnhealthySensitive);
        assert_eq!(AqiCategory::from_aqi(200), AqiCategory::Unhealthy);
        assert_eq!(AqiCategory::from_aqi(300), AqiCategory::VeryUnhealthy);
        assert_eq!(AqiCategory::from_aqi(301), AqiCategory::Hazardous);
    }

    #[test]
    fn known_concentrations_convert_to_epa_values() {
        assert_eq!(aqi_from_pm25(0.0), 0);
        assert_eq!(aqi_from_pm25(12.0), 50);
        assert_eq!(aqi_from_pm25(12.1), 51);
        assert_eq!(aqi_from_pm25(35.4), 100);
        assert_eq!(aqi_from_pm25(35.5), 101);
        assert_eq!(aqi_from_pm25(55.4), 150);
        assert_eq!(aqi_from_pm25(150.4), 200);
        assert_eq!(aqi_from_pm25(250.4), 300);
        assert_eq!(aqi_from_pm25(250.5), 301);
        assert_eq!(aqi_from_pm25(500.4), 500);
    }

    #[test]
    fn concentration_is_truncated_not_rounded() {
        assert_eq!(aqi_from_pm25(12.09), 50);
        assert_eq!(aqi_from_pm25(8.0), 33);
    }

    #[test]
    fn out_of_table_values_clamp() {
        assert_eq!(aqi_from_pm25(-3.0), 0);
        assert_eq!(aqi_from_pm25(f64::NAN), 0);
        assert_eq!(aqi_from_pm25(900.0), 500);
        assert_eq!(aqi_from_pm25(f64::INFINITY), 500);
    }

    #[test]
    fn pm25_to_category_is_monotonic() {
        let mut previous_aqi = 0;
        let mut previous_category = AqiCategory::Good;
        for step in 0..=6000 {
            let pm25 = step as f64 / 10.0;
            let aqi = aqi_from_pm25(pm25);
            let category = AqiCategory::from_aqi(aqi);
            assert!(aqi >= previous_aqi, "aqi dropped at {pm25}");
            assert!(category >= previous_category, "category dropped at {pm25}");
            previous_aqi = aqi;
            previous_category = category;
        }
    }

    #[test]
    fn labels_and_colors_match_legend() {
        assert_eq!(
            AqiCategory::UnhealthySensitive.label(),
            "Unhealthy for Sensitive Groups"
        );
        assert_eq!(AqiCategory::Hazardous.color(), "#7e0023");
    }
}
