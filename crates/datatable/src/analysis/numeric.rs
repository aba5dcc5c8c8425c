use super::Analysis;
use crate::element::NumericElement;
use crate::metadata::{keys, MetaData};

/// Relative distance from the nearest integer still treated as integral.
const INTEGER_TOLERANCE: f64 = 4.0 * f64::EPSILON;

fn is_integral(value: f64) -> bool {
    (value - value.round()).abs() <= INTEGER_TOLERANCE * value.abs().max(1.0)
}

#[derive(Clone, Copy, Debug, Default, PartialEq)]
struct Range {
    min: Option<f64>,
    max: Option<f64>,
}

impl Range {
    fn add(&mut self, value: f64) {
        self.min = Some(self.min.map_or(value, |m| m.min(value)));
        self.max = Some(self.max.map_or(value, |m| m.max(value)));
    }

    fn write_to(&self, metadata: &mut MetaData) {
        if let (Some(min), Some(max)) = (self.min, self.max) {
            metadata.set(keys::MIN_VALUE, min);
            metadata.set(keys::MAX_VALUE, max);
        }
    }
}

/// Decides whether a column can be treated as numeric and collects its range.
///
/// NaN and infinite values are counted separately and excluded from the range
/// and the integer check.
#[derive(Clone, Debug, PartialEq)]
pub struct CastToNumericAnalysis {
    is_integer: bool,
    range: Range,
    nan_count: u64,
    infinity_count: u64,
}

impl Default for CastToNumericAnalysis {
    fn default() -> Self {
        Self {
            is_integer: true,
            range: Range::default(),
            nan_count: 0,
            infinity_count: 0,
        }
    }
}

impl CastToNumericAnalysis {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_integer(&self) -> bool {
        self.is_integer
    }

    pub fn min(&self) -> Option<f64> {
        self.range.min
    }

    pub fn max(&self) -> Option<f64> {
        self.range.max
    }

    pub fn nan_count(&self) -> u64 {
        self.nan_count
    }

    pub fn infinity_count(&self) -> u64 {
        self.infinity_count
    }

    pub fn add_value(&mut self, value: f64) {
        if value.is_nan() {
            self.nan_count += 1;
        } else if value.is_infinite() {
            self.infinity_count += 1;
        } else {
            if !is_integral(value) {
                self.is_integer = false;
            }
            self.range.add(value);
        }
    }
}

impl<T: NumericElement> Analysis<T> for CastToNumericAnalysis {
    fn add(&mut self, item: &T) {
        self.add_value(item.to_f64());
    }

    fn write_to(&self, metadata: &mut MetaData) {
        metadata.set(keys::IS_NUMERIC, true);
        metadata.set(keys::IS_INTEGER, self.is_integer);
        self.range.write_to(metadata);
        metadata.set(keys::NAN_COUNT, self.nan_count);
        metadata.set(keys::INFINITY_COUNT, self.infinity_count);
    }
}

/// Count, mean, population standard deviation and range of the finite values
/// of a column (Welford's online algorithm).
#[derive(Clone, Debug, Default, PartialEq)]
pub struct NumericAnalysis {
    count: u64,
    mean: f64,
    m2: f64,
    range: Range,
    sum_abs: f64,
    sum_squares: f64,
}

impl NumericAnalysis {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of finite values seen.
    pub fn count(&self) -> u64 {
        self.count
    }

    pub fn mean(&self) -> f64 {
        self.mean
    }

    pub fn variance(&self) -> f64 {
        if self.count == 0 {
            0.0
        } else {
            self.m2 / self.count as f64
        }
    }

    pub fn std_dev(&self) -> f64 {
        self.variance().sqrt()
    }

    pub fn min(&self) -> Option<f64> {
        self.range.min
    }

    pub fn max(&self) -> Option<f64> {
        self.range.max
    }

    /// Sum of absolute values (L1 norm).
    pub fn l1_norm(&self) -> f64 {
        self.sum_abs
    }

    /// Square root of the sum of squares (L2 norm).
    pub fn l2_norm(&self) -> f64 {
        self.sum_squares.sqrt()
    }

    pub fn add_value(&mut self, value: f64) {
        if !value.is_finite() {
            return;
        }
        self.count += 1;
        let delta = value - self.mean;
        self.mean += delta / self.count as f64;
        self.m2 += delta * (value - self.mean);
        self.range.add(value);
        self.sum_abs += value.abs();
        self.sum_squares += value * value;
    }
}

impl<T: NumericElement> Analysis<T> for NumericAnalysis {
    fn add(&mut self, item: &T) {
        self.add_value(item.to_f64());
    }

    fn write_to(&self, metadata: &mut MetaData) {
        metadata.set(keys::COUNT, self.count);
        metadata.set(keys::MEAN, self.mean);
        metadata.set(keys::STD_DEV, self.std_dev());
        self.range.write_to(metadata);
    }
}
