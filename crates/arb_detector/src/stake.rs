/// Stake granularity ("kelipatan 5").
pub const STAKE_STEP: f64 = 5.0;

/// Round down to the step; `None` when the result is not tradeable.
pub fn round_stake(configured: f64) -> Option<f64> {
    if !configured.is_finite() {
        return None;
    }
    let rounded = (configured / STAKE_STEP).floor() * STAKE_STEP;
    (rounded >= STAKE_STEP).then_some(rounded)
}
