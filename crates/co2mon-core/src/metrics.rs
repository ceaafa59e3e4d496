//! Air quality assessment for CO2 readings
//!
//! Bands match the ones the dashboard clients colour their readings with, so
//! the device log and the UI agree on what "Poor" means.

use crate::storage::Concentration;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum QualityLevel {
    /// Up to 600 ppm
    Good,
    /// Up to 800 ppm
    Moderate,
    /// Up to 1000 ppm
    Poor,
    /// Up to 1200 ppm
    Unhealthy,
    /// Up to 1500 ppm
    Severe,
    /// Above 1500 ppm
    Hazardous,
}

impl QualityLevel {
    /// Assess the quality level for a concentration. Band edges are inclusive.
    pub fn assess(concentration: Concentration) -> Self {
        match concentration.centi_ppm() {
            ..=60_000 => Self::Good,
            ..=80_000 => Self::Moderate,
            ..=100_000 => Self::Poor,
            ..=120_000 => Self::Unhealthy,
            ..=150_000 => Self::Severe,
            _ => Self::Hazardous,
        }
    }

    pub const fn label(self) -> &'static str {
        match self {
            Self::Good => "Good",
            Self::Moderate => "Moderate",
            Self::Poor => "Poor",
            Self::Unhealthy => "Unhealthy",
            Self::Severe => "Severe",
            Self::Hazardous => "Hazardous",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn level(centi_ppm: i32) -> QualityLevel {
        QualityLevel::assess(Concentration::from_centi_ppm(centi_ppm))
    }

    #[test]
    fn test_band_edges_are_inclusive() {
        assert_eq!(level(60_000), QualityLevel::Good);
        assert_eq!(level(60_001), QualityLevel::Moderate);
        assert_eq!(level(80_000), QualityLevel::Moderate);
        assert_eq!(level(100_000), QualityLevel::Poor);
        assert_eq!(level(120_000), QualityLevel::Unhealthy);
        assert_eq!(level(150_000), QualityLevel::Severe);
        assert_eq!(level(150_001), QualityLevel::Hazardous);
    }

    #[test]
    fn test_typical_indoor_air() {
        assert_eq!(level(41_250).label(), "Good");
        assert_eq!(level(95_000).label(), "Poor");
    }
}
