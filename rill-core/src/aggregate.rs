//! Streaming aggregation primitives.
//!
//! These are the pure cores behind the streaming arithmetic handlers:
//! transport-free, so they are trivial to test and reusable on either side
//! of a call.
use crate::error::RpcError;

/// Running arithmetic mean over a stream of integers.
#[derive(Debug, Default)]
pub struct MeanAccumulator {
    sum: i64,
    count: i64,
}

impl MeanAccumulator {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn observe(&mut self, value: i64) {
        self.sum += value;
        self.count += 1;
    }

    pub fn count(&self) -> i64 {
        self.count
    }

    /// The mean of everything observed. Zero observations are an error, not
    /// a NaN.
    pub fn finish(self) -> Result<f64, RpcError> {
        if self.count == 0 {
            return Err(RpcError::EmptyAggregation(
                "cannot average zero values".to_string(),
            ));
        }
        Ok(self.sum as f64 / self.count as f64)
    }
}

/// Running maximum that reports only strict improvements.
///
/// The first value always improves; equal values never do.
#[derive(Debug, Default)]
pub struct RunningMax {
    current: Option<i64>,
}

impl RunningMax {
    pub fn new() -> Self {
        Self::default()
    }

    /// Observes one value, returning the new maximum if it changed.
    pub fn observe(&mut self, value: i64) -> Option<i64> {
        if let Some(max) = self.current
            && value <= max
        {
            return None;
        }
        self.current = Some(value);
        Some(value)
    }
}

/// Lazy prime factorization of `value`, smallest factors first, with
/// multiplicity. Values below 2 have no factors.
pub fn prime_factors(value: i64) -> PrimeFactors {
    PrimeFactors {
        remaining: value,
        divisor: 2,
    }
}

#[derive(Debug)]
pub struct PrimeFactors {
    remaining: i64,
    divisor: i64,
}

impl Iterator for PrimeFactors {
    type Item = i64;

    fn next(&mut self) -> Option<i64> {
        while self.remaining > 1 {
            if self.remaining % self.divisor == 0 {
                self.remaining /= self.divisor;
                return Some(self.divisor);
            }
            self.divisor += 1;
        }
        None
    }
}
