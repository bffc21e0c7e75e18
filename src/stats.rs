use anyhow::ensure;

use crate::models::SignificanceTest;

/// Standard normal CDF, `Φ(x) = 0.5 * erfc(-x / √2)`.
pub fn normal_cdf(x: f64) -> f64 {
    0.5 * libm::erfc(-x / std::f64::consts::SQRT_2)
}

/// Two-tailed p-value `2 * (1 - Φ(|z|))`, evaluated on the lower tail.
pub fn two_tailed_p_value(z: f64) -> f64 {
    2.0 * normal_cdf(-z.abs())
}

/// Pooled two-proportion z-test of `successes_b / n_b` against
/// `successes_a / n_a`. A positive statistic means group B is higher.
pub fn two_proportion_z_test(
    successes_a: usize,
    n_a: usize,
    successes_b: usize,
    n_b: usize,
    alpha: f64,
) -> anyhow::Result<SignificanceTest> {
    ensure!(n_a > 0 && n_b > 0, "both groups need at least one member");
    ensure!(
        successes_a <= n_a && successes_b <= n_b,
        "successes cannot exceed group size"
    );

    let (n_a_f, n_b_f) = (n_a as f64, n_b as f64);
    let p_a = successes_a as f64 / n_a_f;
    let p_b = successes_b as f64 / n_b_f;
    let pooled_proportion = (successes_a + successes_b) as f64 / (n_a_f + n_b_f);
    let standard_error =
        (pooled_proportion * (1.0 - pooled_proportion) * (1.0 / n_a_f + 1.0 / n_b_f)).sqrt();

    // Both groups all-success or all-failure.
    if standard_error == 0.0 {
        return Ok(SignificanceTest {
            pooled_proportion,
            standard_error,
            z_statistic: 0.0,
            p_value: 1.0,
            alpha,
            significant: false,
        });
    }

    let z_statistic = (p_b - p_a) / standard_error;
    let p_value = two_tailed_p_value(z_statistic);

    Ok(SignificanceTest {
        pooled_proportion,
        standard_error,
        z_statistic,
        p_value,
        alpha,
        significant: p_value < alpha,
    })
}
