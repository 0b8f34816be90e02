//! Likelihood and confidence-level helpers.

/// Smallest model value used in log-likelihoods.
pub const MODEL_FLOOR: f64 = 1e-12;

/// Poisson log-likelihood term `n ln μ − μ` (constant `ln n!` dropped).
pub fn poisson_term(n: f64, mu: f64) -> f64 {
    let mu = mu.max(MODEL_FLOOR);
    if n > 0.0 {
        n * mu.ln() - mu
    } else {
        -mu
    }
}

/// Inverse of the standard normal CDF.
///
/// Rational approximation (Acklam), relative error below 1.2e-9.
pub fn normal_quantile(p: f64) -> f64 {
    const A: [f64; 6] = [
        -3.969683028665376e+01,
        2.209460984245205e+02,
        -2.759285104469687e+02,
        1.383577518672690e+02,
        -3.066479806614716e+01,
        2.506628277459239e+00,
    ];
    const B: [f64; 5] = [
        -5.447609879822406e+01,
        1.615858368580409e+02,
        -1.556989798598866e+02,
        6.680131188771972e+01,
        -1.328068155288572e+01,
    ];
    const C: [f64; 6] = [
        -7.784894002430293e-03,
        -3.223964580411365e-01,
        -2.400758277161838e+00,
        -2.549732539343734e+00,
        4.374664141464968e+00,
        2.938163982698783e+00,
    ];
    const D: [f64; 4] = [
        7.784695709041462e-03,
        3.224671290700398e-01,
        2.445134137142996e+00,
        3.754408661907416e+00,
    ];
    const P_LOW: f64 = 0.02425;

    if p <= 0.0 {
        return f64::NEG_INFINITY;
    }
    if p >= 1.0 {
        return f64::INFINITY;
    }
    if p < P_LOW {
        let q = (-2.0 * p.ln()).sqrt();
        (((((C[0] * q + C[1]) * q + C[2]) * q + C[3]) * q + C[4]) * q + C[5])
            / ((((D[0] * q + D[1]) * q + D[2]) * q + D[3]) * q + 1.0)
    } else if p <= 1.0 - P_LOW {
        let q = p - 0.5;
        let r = q * q;
        (((((A[0] * r + A[1]) * r + A[2]) * r + A[3]) * r + A[4]) * r + A[5]) * q
            / (((((B[0] * r + B[1]) * r + B[2]) * r + B[3]) * r + B[4]) * r + 1.0)
    } else {
        -normal_quantile(1.0 - p)
    }
}

/// Likelihood-ratio threshold `2ΔL` of a one-sided flux upper limit.
pub fn upper_limit_threshold(cl: f64) -> f64 {
    if cl <= 0.5 {
        return 0.0;
    }
    normal_quantile(cl).powi(2)
}

/// Likelihood-ratio threshold `2ΔL` of a two-parameter location contour.
pub fn location_threshold(cl: f64) -> f64 {
    if cl <= 0.0 {
        return 0.0;
    }
    -2.0 * (1.0 - cl.min(1.0 - 1e-12)).ln()
}
