//! Utility maths functions

// ---------------------------------------------------------------------------
// IMPORTS
// ---------------------------------------------------------------------------

use num_traits::Float;

/// Map a value from one range into another.
pub fn lin_map<T>(source_range: (T, T), target_range: (T, T), value: T) -> T
where
    T: Float,
{
    target_range.0
        + ((value - source_range.0) * (target_range.1 - target_range.0)
            / (source_range.1 - source_range.0))
}

/// Sum of the absolute values of the elements (the L1 norm).
pub fn sum_abs<'a, T, I>(values: I) -> T
where
    T: Float + 'a,
    I: IntoIterator<Item = &'a T>,
{
    values.into_iter().fold(T::zero(), |acc, v| acc + v.abs())
}

/// Clamp a value into the range `[min, max]`.
///
/// Unlike `f64::clamp` this does not panic if `min > max`, the `max` bound
/// takes priority in that case.
pub fn clamp<T>(value: T, min: T, max: T) -> T
where
    T: Float,
{
    let mut ret = value;

    if ret < min {
        ret = min
    }
    if ret > max {
        ret = max
    }

    ret
}

/// Convert an array of angles in degrees into radians.
pub fn deg_to_rad<T, const N: usize>(deg: [T; N]) -> [T; N]
where
    T: Float,
{
    let mut rad = deg;
    for r in rad.iter_mut() {
        *r = r.to_radians();
    }
    rad
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn test_lin_map() {
        assert_eq!(lin_map((0.0, 2.0), (-0.05, 0.05), 1.0), 0.0);
        assert_eq!(lin_map((0.0, 2.0), (-0.05, 0.05), 0.0), -0.05);
        assert_eq!(lin_map((0.0, 2.0), (-0.05, 0.05), 2.0), 0.05);
    }

    #[test]
    fn test_sum_abs() {
        assert_eq!(sum_abs(&[1.0, -2.0, 0.5]), 3.5);
    }

    #[test]
    fn test_clamp() {
        assert_eq!(clamp(2.0, -1.0, 1.0), 1.0);
        assert_eq!(clamp(-2.0, -1.0, 1.0), -1.0);
        assert_eq!(clamp(0.5, -1.0, 1.0), 0.5);
        assert_eq!(clamp(0.5, 1.0, -1.0), -1.0);
    }

    #[test]
    fn test_deg_to_rad() {
        let r = deg_to_rad([180.0, -90.0]);
        assert!((r[0] - std::f64::consts::PI).abs() < 1e-12);
        assert!((r[1] + std::f64::consts::FRAC_PI_2).abs() < 1e-12);
    }
}
