use serde::{Deserialize, Serialize};

/// Distribution summary of per-grouping counts: size, mean, population
/// variance and maximum.
///
/// Two aggregates combine into the aggregate of the pooled values
/// (parallel mean/variance), and a combined aggregate can have one of its
/// parts removed again with the inverse formula.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct Aggregate {
    pub n: u64,
    pub mean: f64,
    pub variance: f64,
    pub max: u64,
}

impl Aggregate {
    pub fn empty() -> Self {
        Self::default()
    }

    /// Population statistics (divisor `n`) over the given counts.
    pub fn from_counts(values: &[u64]) -> Self {
        if values.is_empty() {
            return Self::empty();
        }
        let n = values.len() as f64;
        let mean = values.iter().map(|&v| v as f64).sum::<f64>() / n;
        let variance = values
            .iter()
            .map(|&v| (v as f64 - mean).powi(2))
            .sum::<f64>()
            / n;
        Self {
            n: values.len() as u64,
            mean,
            variance,
            max: values.iter().copied().max().unwrap_or(0),
        }
    }

    /// Rebuilds an aggregate from a stored mean and standard deviation.
    pub fn from_parts(n: u64, mean: f64, std_dev: f64, max: u64) -> Self {
        if n == 0 {
            return Self::empty();
        }
        Self {
            n,
            mean,
            variance: std_dev * std_dev,
            max,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.n == 0
    }

    pub fn std_dev(&self) -> f64 {
        self.variance.max(0.0).sqrt()
    }

    /// Aggregate of the union of both underlying value sets.
    pub fn combine(&self, other: &Aggregate) -> Aggregate {
        if other.is_empty() {
            return *self;
        }
        if self.is_empty() {
            return *other;
        }
        let (na, nb) = (self.n as f64, other.n as f64);
        let total = na + nb;
        let mean = (na * self.mean + nb * other.mean) / total;
        let variance = (na * (self.variance + (self.mean - mean).powi(2))
            + nb * (other.variance + (other.mean - mean).powi(2)))
            / total;
        Aggregate {
            n: self.n + other.n,
            mean,
            variance,
            max: self.max.max(other.max),
        }
    }

    /// Removes `part` from a combined aggregate.
    ///
    /// `max` is not invertible: the result keeps `self.max` and the caller is
    /// expected to recompute it from whatever provenance it retains.
    pub fn subtract(&self, part: &Aggregate) -> Aggregate {
        if part.is_empty() {
            return *self;
        }
        if part.n >= self.n {
            return Self::empty();
        }
        let (n, nb) = (self.n as f64, part.n as f64);
        let na = n - nb;
        let mean = (n * self.mean - nb * part.mean) / na;
        let pooled = n * self.variance - nb * (part.variance + (part.mean - self.mean).powi(2));
        let variance = (pooled / na - (mean - self.mean).powi(2)).max(0.0);
        Aggregate {
            n: self.n - part.n,
            mean,
            variance,
            max: self.max,
        }
    }
}
