//! Exponential backoff with jitter (spec §4.3): `min(base * 2^(n-1), cap) *
//! (0.5 + rand * 0.5)`. Split out from the service so the formula can be
//! exercised deterministically without a live task record.

/// Computes the backoff delay in milliseconds for the `n`th failed attempt,
/// given a jitter factor in `[0.5, 1.0]`. `attempts` is expected to be `>=
/// 1`; `0` is treated the same as `1` (no negative exponent).
pub fn backoff_ms(base_ms: u64, cap_ms: u64, attempts: u32, jitter: f64) -> u64 {
    let exponent = attempts.saturating_sub(1).min(32);
    let exp_backoff = base_ms.saturating_mul(1u64 << exponent);
    let capped = exp_backoff.min(cap_ms);
    (capped as f64 * jitter).round() as u64
}

/// Draws a fresh jitter factor in `[0.5, 1.0]`.
pub fn random_jitter() -> f64 {
    0.5 + rand::random::<f64>() * 0.5
}
