//! Physical units: package weight and box geometry.
//!
//! Weights are stored in pounds on every `OrderPackage`; product weights may
//! arrive in kilograms and are converted with [`KG_TO_LB`].

use serde::{Deserialize, Serialize};

use crate::value_object::ValueObject;

/// Canonical kilogram → pound factor.
pub const KG_TO_LB: f64 = 2.2046226218488;

/// Default number of decimal places kept after a conversion.
pub const WEIGHT_PRECISION: u32 = 2;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum WeightUnit {
    #[serde(rename = "LB")]
    Lb,
    #[serde(rename = "LBS")]
    Lbs,
    #[serde(rename = "KG")]
    Kg,
}

impl WeightUnit {
    pub fn is_pounds(self) -> bool {
        matches!(self, WeightUnit::Lb | WeightUnit::Lbs)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            WeightUnit::Lb => "LB",
            WeightUnit::Lbs => "LBS",
            WeightUnit::Kg => "KG",
        }
    }
}

/// Round half away from zero to `places` decimals.
///
/// The fractional residual of the scaled value (`scaled % 1.0`) decides the
/// direction, so `22.046226…` becomes `22.05` and `22.044…` becomes `22.04`.
pub fn round_half_up(value: f64, places: u32) -> f64 {
    let scale = 10f64.powi(places as i32);
    let scaled = value * scale;
    let residual = scaled % 1.0;
    let truncated = scaled - residual;
    let rounded = if residual.abs() >= 0.5 {
        truncated + residual.signum()
    } else {
        truncated
    };
    rounded / scale
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Weight {
    pub value: f64,
    pub unit: WeightUnit,
}

impl ValueObject for Weight {}

impl Weight {
    pub fn new(value: f64, unit: WeightUnit) -> Self {
        Self { value, unit }
    }

    pub fn pounds(value: f64) -> Self {
        Self::new(value, WeightUnit::Lb)
    }

    pub fn zero() -> Self {
        Self::pounds(0.0)
    }

    /// Unrounded value in pounds, for accumulating sums before the final rounding.
    pub fn pounds_raw(&self, kg_to_lb: f64) -> f64 {
        match self.unit {
            WeightUnit::Kg => self.value * kg_to_lb,
            WeightUnit::Lb | WeightUnit::Lbs => self.value,
        }
    }

    /// Normalize to pounds with the canonical factor and precision.
    pub fn to_pounds(&self) -> Weight {
        self.to_pounds_with(KG_TO_LB, WEIGHT_PRECISION)
    }

    pub fn to_pounds_with(&self, kg_to_lb: f64, places: u32) -> Weight {
        Weight::pounds(round_half_up(self.pounds_raw(kg_to_lb), places))
    }

    /// Convert a pound weight back to `unit`.
    pub fn from_pounds_to(&self, unit: WeightUnit) -> Weight {
        let lb = self.pounds_raw(KG_TO_LB);
        let value = match unit {
            WeightUnit::Kg => lb / KG_TO_LB,
            WeightUnit::Lb | WeightUnit::Lbs => lb,
        };
        Weight::new(round_half_up(value, WEIGHT_PRECISION), unit)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum DimensionUnit {
    #[serde(rename = "IN")]
    In,
    #[serde(rename = "CM")]
    Cm,
}

/// Outer box geometry, copied onto a package when it is created.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Dimensions {
    pub length: f64,
    pub width: f64,
    pub height: f64,
    pub unit: DimensionUnit,
}

impl ValueObject for Dimensions {}

impl Dimensions {
    pub fn new(length: f64, width: f64, height: f64, unit: DimensionUnit) -> Self {
        Self {
            length,
            width,
            height,
            unit,
        }
    }
}
