use std::time::Duration;

/// Exponential backoff delay with jitter for the given zero-based attempt.
///
/// Formula: `min(max_delay, base_delay * 2^attempt)` scaled by a random
/// factor in `[1 - jitter, 1 + jitter]`.
pub fn delay_for_attempt(
    attempt: u32,
    base_delay: Duration,
    max_delay: Duration,
    jitter_factor: f64,
) -> Duration {
    delay_with_random(attempt, base_delay, max_delay, jitter_factor, rand::random())
}

fn delay_with_random(
    attempt: u32,
    base_delay: Duration,
    max_delay: Duration,
    jitter_factor: f64,
    random: f64,
) -> Duration {
    let base_ms = base_delay.as_millis() as u64;
    let exponential = base_ms.saturating_mul(1u64 << attempt.min(31));
    let capped = exponential.min(max_delay.as_millis() as u64);

    // Maps random [0,1) to a factor in [1 - jitter, 1 + jitter].
    let jitter = 1.0 + (random * 2.0 - 1.0) * jitter_factor;
    let with_jitter = (capped as f64) * jitter;
    Duration::from_millis(with_jitter.round().max(0.0) as u64)
}
