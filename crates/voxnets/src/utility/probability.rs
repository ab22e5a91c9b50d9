//! # Probability utilities.

/// Check that `prob` is a probability.
///
/// # Returns
///
/// `prob`.
///
/// # Panics
///
/// Unless ``0.0 <= prob <= 1.0``.
pub fn expect_probability(prob: f64) -> f64 {
    if let Err(err) = try_probability(prob) {
        panic!("{err}");
    }
    prob
}

/// Check that `prob` is a probability.
pub fn try_probability(prob: f64) -> Result<f64, String> {
    if (0.0..=1.0).contains(&prob) {
        Ok(prob)
    } else {
        Err(format!("invalid probability: {prob}"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_probability() {
        assert_eq!(expect_probability(0.0), 0.0);
        assert_eq!(expect_probability(1.0), 1.0);
        assert!(try_probability(-0.1).is_err());
        assert!(try_probability(f64::NAN).is_err());
    }

    #[test]
    #[should_panic(expected = "invalid probability: 1.5")]
    fn test_expect_probability_panics() {
        expect_probability(1.5);
    }
}
