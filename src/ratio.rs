use crate::error::InvariantViolation;

/// Decimal places kept on stored ratios.
const STORED_PRECISION: i32 = 2;

/// Unrounded `numerator / denominator`, zero when the denominator is zero.
///
/// Negative counts never come from a well-formed upstream response, so they
/// are reported as an [`InvariantViolation`] rather than clamped.
pub fn ratio_exact(numerator: i64, denominator: i64) -> Result<f64, InvariantViolation> {
    if numerator < 0 || denominator < 0 {
        return Err(InvariantViolation::NegativeCount {
            numerator,
            denominator,
        });
    }
    if denominator == 0 {
        return Ok(0.0);
    }

    let value = numerator as f64 / denominator as f64;
    Ok(if value.is_finite() { value } else { 0.0 })
}

/// Ratio as written to the store: [`ratio_exact`] rounded to two decimals.
pub fn ratio(numerator: i64, denominator: i64) -> Result<f64, InvariantViolation> {
    let exact = ratio_exact(numerator, denominator)?;
    let scale = 10f64.powi(STORED_PRECISION);
    Ok((exact * scale).round() / scale)
}
