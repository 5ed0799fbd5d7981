//! Descriptive statistics over columns that may hold NaN.
//!
//! NaN marks an undefined per-scan value and is skipped by every function here.

fn finite(values: &[f64]) -> impl Iterator<Item = f64> + '_ {
    values.iter().copied().filter(|v| !v.is_nan())
}

/// The arithmetic mean of the non-NaN values, or NaN if there are none
pub fn mean(values: &[f64]) -> f64 {
    let (total, n) = finite(values).fold((0.0, 0usize), |(total, n), v| (total + v, n + 1));
    if n == 0 {
        f64::NAN
    } else {
        total / n as f64
    }
}

/// The standard deviation of the non-NaN values with `ddof` delta degrees of freedom
pub fn std_dev(values: &[f64], ddof: usize) -> f64 {
    let n = finite(values).count();
    if n <= ddof {
        return f64::NAN;
    }
    let mu = mean(values);
    let ss: f64 = finite(values).map(|v| (v - mu).powi(2)).sum();
    (ss / (n - ddof) as f64).sqrt()
}

/// Population (`ddof = 0`) standard deviation
pub fn population_std_dev(values: &[f64]) -> f64 {
    std_dev(values, 0)
}

/// Sample (`ddof = 1`) standard deviation
pub fn sample_std_dev(values: &[f64]) -> f64 {
    std_dev(values, 1)
}

pub fn sum(values: &[f64]) -> f64 {
    finite(values).sum()
}

pub fn median(values: &[f64]) -> f64 {
    let mut sorted: Vec<f64> = finite(values).collect();
    if sorted.is_empty() {
        return f64::NAN;
    }
    sorted.sort_by(|a, b| a.total_cmp(b));
    let mid = sorted.len() / 2;
    if sorted.len() % 2 == 0 {
        (sorted[mid - 1] + sorted[mid]) / 2.0
    } else {
        sorted[mid]
    }
}

/// The population standard deviation relative to the mean
pub fn relative_variability(values: &[f64]) -> f64 {
    population_std_dev(values) / mean(values)
}
