//! Energy budget for one tick.
//!
//! Every unit of emitted intensity ends up in exactly one bucket: absorbed by
//! a sensor, lost inside an element, escaped through the scene boundary, or
//! truncated by one of the engine's limits. [`Powers::missing`] is whatever
//! is left over and should stay at rounding level.

use serde::{Deserialize, Serialize};
use std::{fmt, ops::*};

#[cfg(test)]
mod tests {

    use super::*;

    #[test]
    fn missing_closes_the_budget() {
        let mut powers = Powers::new();
        powers.input = 2.0;
        powers.sensed = 0.5;
        powers.absorbed = 0.7;
        powers.escaped = 0.3;
        powers.trnc_threshold = 0.1;
        powers.trnc_bounce = 0.2;
        powers.trnc_segments = 0.2;
        assert!(powers.missing().abs() < 1e-12, "{}", powers);
    }

    #[test]
    fn add_and_average() {
        let mut a = Powers::new();
        a.input = 1.0;
        a.sensed = 0.5;
        let mut total = a + a;
        total += a;
        total /= 3.0;
        assert_eq!(total, a);
    }
}

/// Intensity bookkeeping, in units of emitted `S0`.
#[derive(Debug, Copy, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Powers {
    pub input: f64,          // emitted by all emitters
    pub sensed: f64,         // absorbed by opaque sensors
    pub absorbed: f64,       // lost inside optical elements
    pub escaped: f64,        // left the scene boundary
    pub trnc_threshold: f64, // dropped below the intensity threshold
    pub trnc_bounce: f64,    // truncated at max bounces
    pub trnc_segments: f64,  // truncated at the segment cap
}

impl DivAssign<f64> for Powers {
    fn div_assign(&mut self, rhs: f64) {
        self.input /= rhs;
        self.sensed /= rhs;
        self.absorbed /= rhs;
        self.escaped /= rhs;
        self.trnc_threshold /= rhs;
        self.trnc_bounce /= rhs;
        self.trnc_segments /= rhs;
    }
}

impl Add for Powers {
    type Output = Self;

    fn add(self, other: Self) -> Self {
        Self {
            input: self.input + other.input,
            sensed: self.sensed + other.sensed,
            absorbed: self.absorbed + other.absorbed,
            escaped: self.escaped + other.escaped,
            trnc_threshold: self.trnc_threshold + other.trnc_threshold,
            trnc_bounce: self.trnc_bounce + other.trnc_bounce,
            trnc_segments: self.trnc_segments + other.trnc_segments,
        }
    }
}

impl AddAssign for Powers {
    fn add_assign(&mut self, other: Self) {
        *self = *self + other;
    }
}

impl Powers {
    pub fn new() -> Self {
        Self::default()
    }

    /// Emitted intensity not accounted for by any bucket.
    pub fn missing(&self) -> f64 {
        self.input
            - (self.sensed
                + self.absorbed
                + self.escaped
                + self.trnc_threshold
                + self.trnc_bounce
                + self.trnc_segments)
    }
}

impl fmt::Display for Powers {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "Powers:")?;
        writeln!(f, "  Input:            {:.6}", self.input)?;
        writeln!(f, "  Sensed:           {:.6}", self.sensed)?;
        writeln!(f, "  Absorbed:         {:.6}", self.absorbed)?;
        writeln!(f, "  Escaped:          {:.6}", self.escaped)?;
        writeln!(f, "  Trunc. Threshold: {:.6}", self.trnc_threshold)?;
        writeln!(f, "  Trunc. Bounce:    {:.6}", self.trnc_bounce)?;
        writeln!(f, "  Trunc. Segments:  {:.6}", self.trnc_segments)?;
        writeln!(f, "  Other:            {:.6}", self.missing())
    }
}
