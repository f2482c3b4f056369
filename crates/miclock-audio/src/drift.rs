/// Drift decision: correct only when the distance from target exceeds the
/// tolerance band. Pure and deterministic; the boundary case
/// `|current - target| == epsilon` does not correct.
pub fn should_correct(current: f32, target: f32, epsilon: f32) -> bool {
    (current - target).abs() > epsilon
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn drift_beyond_epsilon_corrects() {
        assert!(should_correct(0.75, 0.8, 0.02));
        assert!(should_correct(0.85, 0.8, 0.02));
    }

    #[test]
    fn drift_within_band_is_ignored() {
        assert!(!should_correct(0.79, 0.8, 0.02));
        assert!(!should_correct(0.81, 0.8, 0.02));
        assert!(!should_correct(0.8, 0.8, 0.02));
    }

    #[test]
    fn boundary_equality_does_not_correct() {
        assert!(!should_correct(0.78, 0.8, 0.02));
        assert!(!should_correct(0.5, 0.75, 0.25));
    }

    #[test]
    fn zero_epsilon_corrects_any_difference() {
        assert!(should_correct(0.800001, 0.8, 0.0));
        assert!(!should_correct(0.8, 0.8, 0.0));
    }

    #[test]
    fn nan_input_never_corrects() {
        // A NaN read must not trigger a write; the read path surfaces the
        // failure through error classification instead.
        assert!(!should_correct(f32::NAN, 0.8, 0.02));
    }
}
