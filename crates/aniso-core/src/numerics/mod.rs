//! Shared numeric utilities: compensated summation, deterministic ordering,
//! and the empirical-distribution machinery behind the Kolmogorov–Smirnov
//! engine.

fn kahan_add(sum: &mut f64, correction: &mut f64, value: f64) {
    let corrected = value - *correction;
    let next = *sum + corrected;
    *correction = (next - *sum) - corrected;
    *sum = next;
}

pub fn stable_sum(values: &[f64]) -> f64 {
    let mut sum = 0.0;
    let mut correction = 0.0;

    for &value in values {
        kahan_add(&mut sum, &mut correction, value);
    }

    sum
}

pub fn stable_weighted_sum(values: &[f64], weights: &[f64]) -> Option<f64> {
    if values.len() != weights.len() {
        return None;
    }

    let mut sum = 0.0;
    let mut correction = 0.0;
    for (&value, &weight) in values.iter().zip(weights) {
        kahan_add(&mut sum, &mut correction, value * weight);
    }

    Some(sum)
}

/// Weighted mean with a compensated accumulator; `None` on shape mismatch or
/// zero total weight.
pub fn stable_weighted_mean(values: &[f64], weights: &[f64]) -> Option<f64> {
    if values.len() != weights.len() {
        return None;
    }

    let total_weight = stable_sum(weights);
    if total_weight == 0.0 {
        return None;
    }

    let weighted_sum = stable_weighted_sum(values, weights)?;
    Some(weighted_sum / total_weight)
}

pub fn mean(values: &[f64]) -> Option<f64> {
    if values.is_empty() {
        return None;
    }
    Some(stable_sum(values) / values.len() as f64)
}

/// Index order sorting by value with index ties broken ascending, so repeated
/// runs over identical data agree bit for bit.
pub fn deterministic_argsort(values: &[f64]) -> Vec<usize> {
    let mut indices: Vec<usize> = (0..values.len()).collect();
    indices.sort_unstable_by(|lhs, rhs| {
        values[*lhs]
            .total_cmp(&values[*rhs])
            .then_with(|| lhs.cmp(rhs))
    });
    indices
}

pub fn sorted_copy(values: &[f64]) -> Vec<f64> {
    let mut sorted = values.to_vec();
    sorted.sort_unstable_by(f64::total_cmp);
    sorted
}

/// Two-sample Kolmogorov–Smirnov statistic: the supremum distance between the
/// empirical CDFs of two sorted samples. `None` if either sample is empty.
pub fn ks_statistic(first_sorted: &[f64], second_sorted: &[f64]) -> Option<f64> {
    let n1 = first_sorted.len();
    let n2 = second_sorted.len();
    if n1 == 0 || n2 == 0 {
        return None;
    }

    let mut i = 0;
    let mut j = 0;
    let mut supremum = 0.0_f64;
    while i < n1 && j < n2 {
        let x1 = first_sorted[i];
        let x2 = second_sorted[j];
        if x1 <= x2 {
            i += 1;
        }
        if x2 <= x1 {
            j += 1;
        }
        let difference = (i as f64 / n1 as f64 - j as f64 / n2 as f64).abs();
        if difference > supremum {
            supremum = difference;
        }
    }

    Some(supremum)
}

/// Survival function of the Kolmogorov distribution,
/// `Q(lambda) = 2 sum_{k>=1} (-1)^{k-1} exp(-2 k^2 lambda^2)`.
pub fn kolmogorov_survival(lambda: f64) -> f64 {
    if lambda <= 0.0 {
        return 1.0;
    }

    let mut sum = 0.0_f64;
    let mut sign = 1.0_f64;
    let exponent_scale = -2.0 * lambda * lambda;
    for k in 1..=100 {
        let term = sign * (exponent_scale * (k * k) as f64).exp();
        sum += term;
        if term.abs() < 1.0e-12 {
            break;
        }
        sign = -sign;
    }

    (2.0 * sum).clamp(0.0, 1.0)
}

/// Asymptotic two-sample p-value with the finite-sample correction of the
/// effective size `n1 n2 / (n1 + n2)`.
pub fn ks_two_sample_p_value(statistic: f64, n1: usize, n2: usize) -> f64 {
    if n1 == 0 || n2 == 0 {
        return 1.0;
    }
    let effective = ((n1 * n2) as f64 / (n1 + n2) as f64).sqrt();
    let lambda = (effective + 0.12 + 0.11 / effective) * statistic;
    kolmogorov_survival(lambda)
}
