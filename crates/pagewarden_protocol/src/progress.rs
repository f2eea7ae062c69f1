//! Pure progress calculation: unit-count ratios, never wall-clock time.

/// Percentage of processed units, floored, clamped to 0..=100.
///
/// An empty partition is complete the moment it is observed, so a total of
/// zero reports 100.
pub fn percent(done: usize, total: usize) -> i64 {
    if total == 0 {
        return 100;
    }
    let done = done.min(total);
    ((done as u64 * 100) / total as u64) as i64
}

#[cfg(test)]
mod tests {
    use super::percent;

    #[test]
    fn ratios() {
        assert_eq!(percent(0, 4), 0);
        assert_eq!(percent(1, 4), 25);
        assert_eq!(percent(1, 3), 33);
        assert_eq!(percent(3, 3), 100);
    }

    #[test]
    fn clamped_and_empty() {
        assert_eq!(percent(5, 3), 100);
        assert_eq!(percent(0, 0), 100);
    }

    #[test]
    fn monotone_in_done() {
        let total = 7;
        let mut last = -1;
        for done in 0..=total {
            let p = percent(done, total);
            assert!(p >= last);
            last = p;
        }
    }
}
