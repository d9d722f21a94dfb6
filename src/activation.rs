//! Activation and aggregation functions for evolved neurons.
//!
//! Every neuron first folds its weighted inputs with an [`Aggregation`], then
//! passes `aggregate * response + bias` through an [`Activation`]. The
//! mutation engine draws replacements uniformly from the first N variants of
//! each set.

use serde::{Deserialize, Serialize};

/// Activation function applied to a neuron's scaled aggregate.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum Activation {
    /// Sigmoid: f(x) = 1 / (1 + e^(-x))
    #[default]
    Sigmoid,
    /// Hyperbolic tangent: f(x) = tanh(x)
    Tanh,
    /// Sine function: f(x) = sin(x)
    Sine,
}

impl Activation {
    /// All available activation functions, in draw order.
    pub const ALL: [Self; 3] = [Self::Sigmoid, Self::Tanh, Self::Sine];

    /// Apply this activation function to an input value.
    ///
    /// NaN propagates unchanged. Infinite inputs map to the limit of the
    /// function where one exists and to 0.0 for `Sine`.
    #[inline]
    #[must_use]
    pub fn apply(self, x: f64) -> f64 {
        if x.is_nan() {
            return f64::NAN;
        }

        match self {
            Self::Sigmoid => {
                if x == f64::INFINITY {
                    return 1.0;
                }
                if x == f64::NEG_INFINITY {
                    return 0.0;
                }
                // exp(709) is the last finite value
                let clamped = x.clamp(-700.0, 700.0);
                1.0 / (1.0 + (-clamped).exp())
            }
            Self::Tanh => x.tanh(),
            Self::Sine => {
                if x.is_infinite() {
                    return 0.0;
                }
                x.sin()
            }
        }
    }

    /// Draw one of the first `choices` variants uniformly.
    ///
    /// `choices` is clamped to `1..=3`.
    pub fn random<R: rand::Rng>(rng: &mut R, choices: u32) -> Self {
        let n = (choices as usize).clamp(1, Self::ALL.len());
        Self::ALL[rng.random_range(0..n)]
    }
}

/// Aggregation function folding a neuron's weighted inputs into one value.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum Aggregation {
    /// Σ(value × weight)
    #[default]
    Sum,
    /// Π(value × weight), seeded at 1.0
    Product,
    /// Σ(value × weight) / n
    Mean,
}

impl Aggregation {
    /// All available aggregation functions, in draw order.
    pub const ALL: [Self; 3] = [Self::Sum, Self::Product, Self::Mean];

    /// Fold an iterator of already weighted terms.
    ///
    /// An empty input aggregates to 0.0 for `Sum` and `Mean` and to 1.0 for
    /// `Product` (the empty product).
    #[inline]
    pub fn apply<I>(self, terms: I) -> f64
    where
        I: IntoIterator<Item = f64>,
    {
        match self {
            Self::Sum => terms.into_iter().sum(),
            Self::Product => terms.into_iter().fold(1.0, |acc, t| acc * t),
            Self::Mean => {
                let (sum, n) = terms
                    .into_iter()
                    .fold((0.0, 0usize), |(sum, n), t| (sum + t, n + 1));
                if n == 0 {
                    0.0
                } else {
                    sum / n as f64
                }
            }
        }
    }

    /// Draw one of the first `choices` variants uniformly.
    ///
    /// `choices` is clamped to `1..=3`.
    pub fn random<R: rand::Rng>(rng: &mut R, choices: u32) -> Self {
        let n = (choices as usize).clamp(1, Self::ALL.len());
        Self::ALL[rng.random_range(0..n)]
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::SeedableRng;
    use rand_chacha::ChaCha8Rng;

    #[test]
    fn test_sigmoid() {
        assert!((Activation::Sigmoid.apply(0.0) - 0.5).abs() < 1e-12);
        assert!((Activation::Sigmoid.apply(2.0) - 0.880_797_077_977_882_3).abs() < 1e-12);
        assert!(Activation::Sigmoid.apply(10.0) > 0.99);
        assert!(Activation::Sigmoid.apply(-10.0) < 0.01);
        assert_eq!(Activation::Sigmoid.apply(f64::INFINITY), 1.0);
        assert_eq!(Activation::Sigmoid.apply(f64::NEG_INFINITY), 0.0);
        assert!(Activation::Sigmoid.apply(-1.0e6).is_finite());
    }

    #[test]
    fn test_tanh() {
        assert!(Activation::Tanh.apply(0.0).abs() < 1e-12);
        assert!(Activation::Tanh.apply(10.0) > 0.99);
        assert!(Activation::Tanh.apply(-10.0) < -0.99);
    }

    #[test]
    fn test_sine() {
        use std::f64::consts::PI;
        assert!(Activation::Sine.apply(0.0).abs() < 1e-12);
        assert!((Activation::Sine.apply(PI / 2.0) - 1.0).abs() < 1e-12);
        assert_eq!(Activation::Sine.apply(f64::INFINITY), 0.0);
    }

    #[test]
    fn test_nan_propagates() {
        for act in Activation::ALL {
            assert!(act.apply(f64::NAN).is_nan());
        }
    }

    #[test]
    fn test_aggregations() {
        let terms = [2.0, 3.0, 4.0];
        assert!((Aggregation::Sum.apply(terms) - 9.0).abs() < 1e-12);
        assert!((Aggregation::Product.apply(terms) - 24.0).abs() < 1e-12);
        assert!((Aggregation::Mean.apply(terms) - 3.0).abs() < 1e-12);
    }

    #[test]
    fn test_product_is_not_stuck_at_zero() {
        assert!((Aggregation::Product.apply([0.5]) - 0.5).abs() < 1e-12);
        assert!((Aggregation::Product.apply(std::iter::empty()) - 1.0).abs() < 1e-12);
    }

    #[test]
    fn test_empty_mean_is_zero() {
        assert_eq!(Aggregation::Mean.apply(std::iter::empty()), 0.0);
    }

    #[test]
    fn test_random_respects_choices() {
        let mut rng = ChaCha8Rng::seed_from_u64(42);
        for _ in 0..50 {
            assert_eq!(Activation::random(&mut rng, 1), Activation::Sigmoid);
            assert_eq!(Aggregation::random(&mut rng, 0), Aggregation::Sum);
        }
        let drawn: std::collections::HashSet<_> =
            (0..200).map(|_| Activation::random(&mut rng, 3)).collect();
        assert_eq!(drawn.len(), 3);
    }
}
