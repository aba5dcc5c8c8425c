use super::Conversion;
use crate::analysis::{Analysis, NumericAnalysis};
use crate::element::NumericElement;
use crate::error::ConversionError;
use crate::metadata::{keys, MetaData};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum NormalizationKind {
    /// `(x - mean) / std_dev`
    Standard,
    /// `(x - min) / (max - min)`
    FeatureScale,
    /// `x / ||column||₂`
    Euclidean,
    /// `x / ||column||₁`
    Manhattan,
}

impl NormalizationKind {
    pub fn name(self) -> &'static str {
        match self {
            NormalizationKind::Standard => "Standard",
            NormalizationKind::FeatureScale => "FeatureScale",
            NormalizationKind::Euclidean => "Euclidean",
            NormalizationKind::Manhattan => "Manhattan",
        }
    }
}

impl fmt::Display for NormalizationKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for NormalizationKind {
    type Err = ConversionError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "Standard" => Ok(NormalizationKind::Standard),
            "FeatureScale" => Ok(NormalizationKind::FeatureScale),
            "Euclidean" => Ok(NormalizationKind::Euclidean),
            "Manhattan" => Ok(NormalizationKind::Manhattan),
            other => Err(ConversionError::Custom(format!(
                "unknown normalization type '{other}'"
            ))),
        }
    }
}

/// `x' = (x - subtract) / divide`
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct NormalizationParameters {
    pub kind: NormalizationKind,
    pub subtract: f64,
    pub divide: f64,
}

impl NormalizationParameters {
    /// Derive parameters from a completed numeric pass. A zero divisor (constant
    /// or empty column) becomes 1 so the output stays finite.
    pub fn from_analysis(kind: NormalizationKind, stats: &NumericAnalysis) -> Self {
        let (subtract, divide) = match kind {
            NormalizationKind::Standard => (stats.mean(), stats.std_dev()),
            NormalizationKind::FeatureScale => {
                let min = stats.min().unwrap_or(0.0);
                (min, stats.max().unwrap_or(min) - min)
            }
            NormalizationKind::Euclidean => (0.0, stats.l2_norm()),
            NormalizationKind::Manhattan => (0.0, stats.l1_norm()),
        };
        Self {
            kind,
            subtract,
            divide: if divide == 0.0 { 1.0 } else { divide },
        }
    }

    pub fn apply(&self, value: f64) -> f64 {
        (value - self.subtract) / self.divide
    }

    pub fn write_to(&self, metadata: &mut MetaData) {
        metadata.set(keys::NORMALIZATION_TYPE, self.kind.name());
        metadata.set(keys::NORMALIZE_SUBTRACT, self.subtract);
        metadata.set(keys::NORMALIZE_DIVIDE, self.divide);
    }

    pub fn from_metadata(metadata: &MetaData) -> Result<Self, ConversionError> {
        let missing = |key: &str| ConversionError::Custom(format!("metadata has no {key} entry"));
        let kind = metadata
            .get_str(keys::NORMALIZATION_TYPE)
            .ok_or_else(|| missing(keys::NORMALIZATION_TYPE))?
            .parse::<NormalizationKind>()?;
        Ok(Self {
            kind,
            subtract: metadata
                .get_f64(keys::NORMALIZE_SUBTRACT)
                .ok_or_else(|| missing(keys::NORMALIZE_SUBTRACT))?,
            divide: metadata
                .get_f64(keys::NORMALIZE_DIVIDE)
                .ok_or_else(|| missing(keys::NORMALIZE_DIVIDE))?,
        })
    }
}

/// Numeric pass that derives [`NormalizationParameters`] for one kind.
#[derive(Clone, Debug)]
pub struct NormalizationAnalysis {
    kind: NormalizationKind,
    stats: NumericAnalysis,
}

impl NormalizationAnalysis {
    pub fn new(kind: NormalizationKind) -> Self {
        Self {
            kind,
            stats: NumericAnalysis::new(),
        }
    }

    pub fn parameters(&self) -> NormalizationParameters {
        NormalizationParameters::from_analysis(self.kind, &self.stats)
    }
}

impl<T: NumericElement> Analysis<T> for NormalizationAnalysis {
    fn add(&mut self, item: &T) {
        self.stats.add_value(item.to_f64());
    }

    fn write_to(&self, metadata: &mut MetaData) {
        self.parameters().write_to(metadata);
    }
}

/// Applies [`NormalizationParameters`] to each element, producing doubles.
#[derive(Clone, Copy, Debug)]
pub struct NormalizeConversion {
    parameters: NormalizationParameters,
}

impl NormalizeConversion {
    pub fn new(parameters: NormalizationParameters) -> Self {
        Self { parameters }
    }

    pub fn from_metadata(metadata: &MetaData) -> Result<Self, ConversionError> {
        NormalizationParameters::from_metadata(metadata).map(Self::new)
    }
}

impl<T: NumericElement> Conversion<T> for NormalizeConversion {
    type Output = f64;

    fn convert(&mut self, item: &T) -> Result<f64, ConversionError> {
        Ok(self.parameters.apply(item.to_f64()))
    }

    fn write_metadata(&self, metadata: &mut MetaData) {
        self.parameters.write_to(metadata);
    }
}
