use core::fmt::{self, Display, Write as _};
use core::str::FromStr;

use thiserror_no_std::Error;

/// Longest possible persisted line: 20-digit timestamp, comma, signed
/// fixed-point value and the newline.
pub const MAX_LINE_LEN: usize = 40;

/// CO2 concentration in fixed-point hundredths of a ppm
///
/// - 412.5 ppm → 41250
/// - 76 ppm → 7600
///
/// Two decimals is the resolution the device has always logged and served,
/// so storing hundredths keeps the text form exact.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Concentration(i32);

impl Concentration {
    pub const fn from_centi_ppm(centi_ppm: i32) -> Self {
        Self(centi_ppm)
    }

    pub const fn centi_ppm(self) -> i32 {
        self.0
    }

    /// Round a ppm value to the nearest hundredth, halves away from zero.
    ///
    /// Returns `None` for NaN, infinities and values outside the fixed-point
    /// range.
    pub fn from_ppm(ppm: f64) -> Option<Self> {
        let scaled = ppm * 100.0;
        if !scaled.is_finite() || scaled < i32::MIN as f64 || scaled > i32::MAX as f64 {
            return None;
        }

        let rounded = if scaled >= 0.0 {
            scaled + 0.5
        } else {
            scaled - 0.5
        };
        Some(Self(rounded as i32))
    }

    pub fn as_ppm(self) -> f32 {
        self.0 as f32 / 100.0
    }
}

impl Display for Concentration {
    /// Decimal text with trailing zeros trimmed but at least one fraction
    /// digit: `412.5`, `400.0`, `412.05`.
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let sign = if self.0 < 0 { "-" } else { "" };
        let abs = self.0.unsigned_abs();
        let whole = abs / 100;
        let hundredths = abs % 100;

        if hundredths % 10 == 0 {
            write!(f, "{sign}{whole}.{}", hundredths / 10)
        } else {
            write!(f, "{sign}{whole}.{hundredths:02}")
        }
    }
}

impl FromStr for Concentration {
    type Err = RecordError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let ppm: f64 = s.trim().parse().map_err(|_| RecordError::Concentration)?;
        Self::from_ppm(ppm).ok_or(RecordError::Concentration)
    }
}

/// One logged measurement.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Reading {
    /// Seconds since the Unix epoch (or since boot when time is unknown)
    pub timestamp: u64,
    pub concentration: Concentration,
}

impl Reading {
    pub const fn new(timestamp: u64, concentration: Concentration) -> Self {
        Self {
            timestamp,
            concentration,
        }
    }

    /// Encode as a log line: `<timestamp>,<concentration>\n`.
    pub fn to_line(&self) -> heapless::String<MAX_LINE_LEN> {
        let mut line = heapless::String::new();
        // Cannot overflow: MAX_LINE_LEN covers the widest u64 and i32 renderings
        let _ = writeln!(line, "{},{}", self.timestamp, self.concentration);
        line
    }
}

impl Display for Reading {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "[Reading] timestamp: {}, co2: {} ppm",
            self.timestamp, self.concentration
        )
    }
}

#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
pub enum RecordError {
    #[error("expected 2 comma separated fields, found {0}")]
    FieldCount(usize),
    #[error("timestamp is not an unsigned integer")]
    Timestamp,
    #[error("concentration is not a finite decimal")]
    Concentration,
}

impl FromStr for Reading {
    type Err = RecordError;

    /// Parse one log line. Surrounding whitespace, including a trailing
    /// `\r\n`, is ignored.
    fn from_str(line: &str) -> Result<Self, Self::Err> {
        let line = line.trim();
        let mut fields = line.split(',');

        let (Some(timestamp), Some(concentration), None) =
            (fields.next(), fields.next(), fields.next())
        else {
            return Err(RecordError::FieldCount(line.split(',').count()));
        };

        let timestamp = timestamp
            .trim()
            .parse::<u64>()
            .map_err(|_| RecordError::Timestamp)?;
        let concentration = concentration.parse::<Concentration>()?;

        Ok(Self::new(timestamp, concentration))
    }
}
