/// Asserts that a numerical value is in the provided interval `[a,b]` and panics
/// with a helpful message if not
///
/// ### Example
/// ```should_panic
/// # use ramp_rl::assert_interval;
/// let alpha = 2.0;
/// assert_interval!(alpha, 0.0, 1.0);
/// ```
/// This will panic with the message "Invalid value for \`alpha\`. Must be in the interval \[0, 1\]."
#[macro_export]
macro_rules! assert_interval {
    ($var:expr, $a:expr, $b:expr) => {
        assert!(
            $var >= $a && $var <= $b,
            "Invalid value for `{}`. Must be in the interval [{}, {}].",
            stringify!($var),
            $a,
            $b,
        );
    };
}

/// Checks that `value` lies in `[0, 1]`, for config validation where a panic is not wanted
pub(crate) fn check_unit_interval(
    field: &'static str,
    value: f64,
) -> Result<(), crate::error::ConfigError> {
    if (0.0..=1.0).contains(&value) {
        Ok(())
    } else {
        Err(crate::error::ConfigError::invalid(
            field,
            format!("{value} is outside [0, 1]"),
        ))
    }
}
