//! Collections of possibly weighted numeric samples and the percentile math
//! used to summarize them.
//!
//! A [`Quantile`] accumulates duration observations during aggregation and
//! answers distribution queries (bounds, mean, percentiles) at reporting time.
//! Percentiles on unweighted collections use the R8 interpolation method from
//! Hyndman and Fan (1996); the weighted variant intentionally does not
//! interpolate (see [`Quantile::percentile`]).

/// A collection of possibly weighted data points.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct Quantile {
    /// The sample values.
    pub xs: Vec<f64>,

    /// `weights[i]` is the weight of sample `xs[i]`. If `weights` is `None`,
    /// all samples have weight 1. Weights must have the same length as `xs`
    /// and all values must be non-negative.
    pub weights: Option<Vec<f64>>,

    /// Indicates that `xs` is sorted in ascending order.
    pub sorted: bool,
}

/// Returns the minimum and maximum values of `xs`.
pub fn bounds(xs: &[f64]) -> (f64, f64) {
    if xs.is_empty() {
        return (0.0, 0.0);
    }
    let (mut min, mut max) = (xs[0], xs[0]);
    for &x in xs {
        if x < min {
            min = x;
        }
        if x > max {
            max = x;
        }
    }
    (min, max)
}

/// Returns the arithmetic mean of `xs`.
pub fn mean(xs: &[f64]) -> f64 {
    if xs.is_empty() {
        return f64::NAN;
    }
    let mut m = 0.0;
    for (i, &x) in xs.iter().enumerate() {
        m += (x - m) / (i + 1) as f64;
    }
    m
}

/// Returns the sample variance of `xs`.
pub fn variance(xs: &[f64]) -> f64 {
    if xs.is_empty() {
        return f64::NAN;
    } else if xs.len() <= 1 {
        return 0.0;
    }

    // Welford's online algorithm, which is more numerically stable than the
    // standard two-pass formula and not prone to massive cancellation.
    let (mut mean, mut m2) = (0.0, 0.0);
    for (n, &x) in xs.iter().enumerate() {
        let delta = x - mean;
        mean += delta / (n + 1) as f64;
        m2 += delta * (x - mean);
    }
    m2 / (xs.len() - 1) as f64
}

/// Returns the sample standard deviation of `xs`.
pub fn std_dev(xs: &[f64]) -> f64 {
    variance(xs).sqrt()
}

fn vec_sum(xs: &[f64]) -> f64 {
    xs.iter().sum()
}

impl Quantile {
    /// Creates an empty, unweighted collection.
    pub fn new() -> Self {
        Self::default()
    }

    /// Appends a sample value.
    pub fn add(&mut self, x: f64) {
        self.xs.push(x);
        self.sorted = false;
    }

    /// Appends all sample values from `xs`.
    pub fn add_all(&mut self, xs: &[f64]) {
        self.xs.extend_from_slice(xs);
        self.sorted = false;
    }

    /// Returns the number of samples.
    pub fn len(&self) -> usize {
        self.xs.len()
    }

    /// Returns `true` if the collection holds no samples.
    pub fn is_empty(&self) -> bool {
        self.xs.is_empty()
    }

    /// Returns the minimum and maximum values of the collection.
    ///
    /// If the collection is weighted, this ignores samples with zero weight.
    pub fn bounds(&self) -> (f64, f64) {
        if self.xs.is_empty() || (!self.sorted && self.weights.is_none()) {
            return bounds(&self.xs);
        }

        match &self.weights {
            None => (self.xs[0], self.xs[self.xs.len() - 1]),
            Some(weights) if self.sorted => {
                let (mut min, mut max) = (0.0, 0.0);
                for (i, &w) in weights.iter().enumerate() {
                    if w != 0.0 {
                        min = self.xs[i];
                        break;
                    }
                }
                for (i, &w) in weights.iter().enumerate().rev() {
                    if w != 0.0 {
                        max = self.xs[i];
                        break;
                    }
                }
                (min, max)
            }
            Some(weights) => {
                let (mut min, mut max) = (f64::INFINITY, f64::NEG_INFINITY);
                for (i, &x) in self.xs.iter().enumerate() {
                    let w = weights[i];
                    if x < min && w != 0.0 {
                        min = x;
                    }
                    if x > max && w != 0.0 {
                        max = x;
                    }
                }
                if min.is_infinite() {
                    return (0.0, 0.0);
                }
                (min, max)
            }
        }
    }

    /// Returns the possibly weighted sum of the collection.
    pub fn sum(&self) -> f64 {
        match &self.weights {
            None => vec_sum(&self.xs),
            Some(weights) => self
                .xs
                .iter()
                .zip(weights.iter())
                .map(|(x, w)| x * w)
                .sum(),
        }
    }

    /// Returns the total weight of the collection.
    pub fn weight(&self) -> f64 {
        match &self.weights {
            None => self.xs.len() as f64,
            Some(weights) => vec_sum(weights),
        }
    }

    /// Returns the arithmetic mean of the collection.
    pub fn mean(&self) -> f64 {
        let weights = match &self.weights {
            None => return mean(&self.xs),
            Some(_) if self.xs.is_empty() => return mean(&self.xs),
            Some(weights) => weights,
        };

        // Weighted incremental mean:
        //   m_i = m_(i-1) + (x_i - m_(i-1)) * (w_i / wsum_i)
        let (mut m, mut wsum) = (0.0, 0.0);
        for (i, &x) in self.xs.iter().enumerate() {
            let w = weights[i];
            wsum += w;
            m += (x - m) * w / wsum;
        }
        m
    }

    /// Returns the sample variance of the collection.
    ///
    /// The weighted variant is not implemented.
    pub fn variance(&self) -> f64 {
        if self.xs.is_empty() || self.weights.is_none() {
            return variance(&self.xs);
        }
        unimplemented!("weighted variance is not implemented");
    }

    /// Returns the sample standard deviation of the collection.
    ///
    /// The weighted variant is not implemented.
    pub fn std_dev(&self) -> f64 {
        if self.xs.is_empty() || self.weights.is_none() {
            return std_dev(&self.xs);
        }
        unimplemented!("weighted standard deviation is not implemented");
    }

    /// Returns the pctile'th value from the collection. For unweighted
    /// collections this uses interpolation method R8 from Hyndman and Fan
    /// (1996).
    ///
    /// `pctile` is capped to the range [0, 1]. An empty collection returns 0.
    ///
    /// `percentile(0.5)` is the median. `percentile(0.25)` and
    /// `percentile(0.75)` are the first and third quartiles, respectively.
    ///
    /// The weighted variant walks the cumulative weight from the low end and
    /// returns the sample at which it is consumed, without interpolating
    /// between neighbors. Call sites rely on this approximate behavior, so it
    /// must not be silently unified with the unweighted path.
    pub fn percentile(&self, pctile: f64) -> f64 {
        if self.xs.is_empty() {
            return 0.0;
        } else if pctile <= 0.0 {
            return self.bounds().0;
        } else if pctile >= 1.0 {
            return self.bounds().1;
        }

        if !self.sorted {
            let mut copy = self.clone();
            copy.sort();
            return copy.percentile(pctile);
        }

        match &self.weights {
            None => {
                let count = self.xs.len() as f64;
                let n = 1.0 / 3.0 + pctile * (count + 1.0 / 3.0); // R8
                let frac = n.fract();
                let k = n.trunc() as i64;
                if k <= 0 {
                    self.xs[0]
                } else if k as usize >= self.xs.len() {
                    self.xs[self.xs.len() - 1]
                } else {
                    let k = k as usize;
                    self.xs[k - 1] + frac * (self.xs[k] - self.xs[k - 1])
                }
            }
            Some(weights) => {
                let mut target = self.weight() * pctile;
                for (i, &weight) in weights.iter().enumerate() {
                    target -= weight;
                    if target < 0.0 {
                        return self.xs[i];
                    }
                }
                self.xs[self.xs.len() - 1]
            }
        }
    }

    /// Returns the interquartile range of the collection.
    pub fn iqr(&self) -> f64 {
        if !self.sorted {
            let mut copy = self.clone();
            copy.sort();
            return copy.iqr();
        }
        self.percentile(0.75) - self.percentile(0.25)
    }

    /// Sorts the samples in place, carrying weights along with their values.
    ///
    /// A sorted collection improves the performance of some queries.
    pub fn sort(&mut self) -> &mut Self {
        let already_sorted = self.xs.windows(2).all(|w| w[0] <= w[1]);
        if !self.sorted && !already_sorted {
            match &mut self.weights {
                None => self.xs.sort_by(f64::total_cmp),
                Some(weights) => {
                    let mut paired: Vec<(f64, f64)> = self
                        .xs
                        .iter()
                        .copied()
                        .zip(weights.iter().copied())
                        .collect();
                    paired.sort_by(|a, b| a.0.total_cmp(&b.0));
                    for (i, (x, w)) in paired.into_iter().enumerate() {
                        self.xs[i] = x;
                        weights[i] = w;
                    }
                }
            }
        }
        self.sorted = true;
        self
    }
}

impl From<Vec<f64>> for Quantile {
    fn from(xs: Vec<f64>) -> Self {
        Quantile {
            xs,
            weights: None,
            sorted: false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_empty() {
        let q = Quantile::new();
        assert_eq!(q.percentile(0.5), 0.0);
        assert_eq!(q.bounds(), (0.0, 0.0));
        assert!(q.mean().is_nan());
    }

    #[test]
    fn test_percentile_bounds() {
        let q = Quantile::from(vec![3.0, 1.0, 2.0]);
        assert_eq!(q.percentile(0.0), 1.0);
        assert_eq!(q.percentile(-1.0), 1.0);
        assert_eq!(q.percentile(1.0), 3.0);
        assert_eq!(q.percentile(2.0), 3.0);
    }

    #[test]
    fn test_percentile_median() {
        let q = Quantile::from(vec![1.0, 2.0, 3.0, 4.0, 5.0]);
        assert!((q.percentile(0.5) - 3.0).abs() < 1e-9);
    }

    #[test]
    fn test_percentile_interpolates() {
        let q = Quantile::from(vec![10.0, 20.0]);
        // R8: n = 1/3 + 0.5 * (2 + 1/3) = 1.5, so halfway between the two.
        assert!((q.percentile(0.5) - 15.0).abs() < 1e-9);
    }

    #[test]
    fn test_percentile_insertion_order_independent() {
        let a = Quantile::from(vec![5.0, 1.0, 4.0, 2.0, 3.0]);
        let b = Quantile::from(vec![3.0, 2.0, 4.0, 1.0, 5.0]);
        for p in [0.25, 0.5, 0.75, 0.9, 0.95, 0.99] {
            assert_eq!(a.percentile(p).to_bits(), b.percentile(p).to_bits());
        }
    }

    #[test]
    fn test_weighted_percentile_does_not_interpolate() {
        let q = Quantile {
            xs: vec![10.0, 20.0],
            weights: Some(vec![1.0, 1.0]),
            sorted: true,
        };
        // The weighted path returns an observed sample, never a blend.
        assert_eq!(q.percentile(0.5), 10.0);
        assert_eq!(q.percentile(0.75), 20.0);
    }

    #[test]
    fn test_weighted_ignores_zero_weight_bounds() {
        let q = Quantile {
            xs: vec![1.0, 2.0, 3.0],
            weights: Some(vec![0.0, 1.0, 0.0]),
            sorted: true,
        };
        assert_eq!(q.bounds(), (2.0, 2.0));
    }

    #[test]
    fn test_sort_carries_weights() {
        let mut q = Quantile {
            xs: vec![3.0, 1.0, 2.0],
            weights: Some(vec![30.0, 10.0, 20.0]),
            sorted: false,
        };
        q.sort();
        assert_eq!(q.xs, vec![1.0, 2.0, 3.0]);
        assert_eq!(q.weights, Some(vec![10.0, 20.0, 30.0]));
    }

    #[test]
    fn test_mean() {
        let q = Quantile::from(vec![1.0, 2.0, 3.0, 4.0]);
        assert_eq!(q.mean(), 2.5);

        let weighted = Quantile {
            xs: vec![1.0, 10.0],
            weights: Some(vec![3.0, 1.0]),
            sorted: true,
        };
        assert_eq!(weighted.mean(), 3.25);
    }

    #[test]
    fn test_variance() {
        let q = Quantile::from(vec![2.0, 4.0, 4.0, 4.0, 5.0, 5.0, 7.0, 9.0]);
        assert!((q.variance() - 32.0 / 7.0).abs() < 1e-12);
        assert_eq!(Quantile::from(vec![42.0]).variance(), 0.0);
    }

    #[test]
    fn test_add_marks_unsorted() {
        let mut q = Quantile::from(vec![1.0, 2.0]);
        q.sort();
        q.add(0.5);
        assert!(!q.sorted);
        assert_eq!(q.percentile(0.0), 0.5);
    }
}
