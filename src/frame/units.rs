//! Physical length units and the unit declarations found in calibration data.

use std::fmt;
use std::str::FromStr;

use serde::Serialize;

/// A physical length unit.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum LengthUnit {
    Meter,
    Millimeter,
    Micrometer,
    Nanometer,
    Angstrom,
    Picometer,
}

impl LengthUnit {
    /// Power of ten of this unit relative to the metre.
    pub fn exponent(&self) -> i32 {
        match self {
            LengthUnit::Meter => 0,
            LengthUnit::Millimeter => -3,
            LengthUnit::Micrometer => -6,
            LengthUnit::Nanometer => -9,
            LengthUnit::Angstrom => -10,
            LengthUnit::Picometer => -12,
        }
    }

    /// Conventional symbol.
    pub fn symbol(&self) -> &'static str {
        match self {
            LengthUnit::Meter => "m",
            LengthUnit::Millimeter => "mm",
            LengthUnit::Micrometer => "µm",
            LengthUnit::Nanometer => "nm",
            LengthUnit::Angstrom => "Å",
            LengthUnit::Picometer => "pm",
        }
    }

    /// Convert `value` expressed in `self` into `target`.
    ///
    /// Scaling goes through an exact power of ten, multiplying or dividing
    /// so that identical inputs always give identical outputs.
    pub fn convert(&self, value: f64, target: LengthUnit) -> f64 {
        let diff = self.exponent() - target.exponent();
        if diff >= 0 {
            value * 10f64.powi(diff)
        } else {
            value / 10f64.powi(-diff)
        }
    }
}

impl fmt::Display for LengthUnit {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.symbol())
    }
}

impl FromStr for LengthUnit {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "m" | "meter" | "metre" => Ok(LengthUnit::Meter),
            "mm" | "millimeter" | "millimetre" => Ok(LengthUnit::Millimeter),
            "µm" | "μm" | "um" | "micron" | "micrometer" | "micrometre" => {
                Ok(LengthUnit::Micrometer)
            }
            "nm" | "nanometer" | "nanometre" => Ok(LengthUnit::Nanometer),
            "å" | "angstrom" => Ok(LengthUnit::Angstrom),
            "pm" | "picometer" | "picometre" => Ok(LengthUnit::Picometer),
            other => Err(format!("unknown length unit '{}'", other)),
        }
    }
}

/// Unit declared by a backend for a calibration value.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub enum UnitSpec {
    /// A convertible physical unit
    Physical(LengthUnit),
    /// Unit-less "reference frame" scale, resolved through a fallback length
    ReferenceFrame,
    /// Missing or unrecognised unit
    Unknown,
}

impl UnitSpec {
    /// Interpret a unit label as reported by a backend.
    pub fn parse(label: &str) -> Self {
        let normalized: String = label
            .chars()
            .filter(|c| !c.is_whitespace() && *c != '_' && *c != '.')
            .collect::<String>()
            .to_lowercase();

        if normalized == "referenceframe" {
            return UnitSpec::ReferenceFrame;
        }

        label
            .parse::<LengthUnit>()
            .map(UnitSpec::Physical)
            .unwrap_or(UnitSpec::Unknown)
    }
}

/// A numeric value with its declared unit.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct Measure {
    pub value: f64,
    pub unit: UnitSpec,
}

impl Measure {
    pub fn new(value: f64, unit: UnitSpec) -> Self {
        Self { value, unit }
    }

    /// A value in a physical unit.
    pub fn physical(value: f64, unit: LengthUnit) -> Self {
        Self::new(value, UnitSpec::Physical(unit))
    }

    /// A value with no usable unit.
    pub fn unknown(value: f64) -> Self {
        Self::new(value, UnitSpec::Unknown)
    }
}

/// A physical length.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct Length {
    pub value: f64,
    pub unit: LengthUnit,
}

impl Length {
    pub fn new(value: f64, unit: LengthUnit) -> Self {
        Self { value, unit }
    }

    /// Express this length in `target`.
    pub fn to(&self, target: LengthUnit) -> f64 {
        self.unit.convert(self.value, target)
    }
}
