pub mod env;
pub mod telemetry;

/// Compares two strings without short-circuiting on the first differing byte, so the time taken
/// leaks nothing about how much of a signature guess was correct.
///
/// Length is not treated as secret: hex digests have a fixed, public length.
pub fn constant_time_cmp(a: &str, b: &str) -> bool {
    if a.len() != b.len() {
        return false;
    }

    let diff = a
        .as_bytes()
        .iter()
        .zip(b.as_bytes())
        .fold(0u8, |acc, (l, r)| acc | (l ^ r));

    std::hint::black_box(diff) == 0
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn test_const_time_cmp() {
        let expects = "5e8f0c2a";

        assert!(constant_time_cmp(expects, "5e8f0c2a"));
        assert!(!constant_time_cmp(expects, "__8f0c2a"));
        assert!(!constant_time_cmp(expects, "5e8f0c__"));
        assert!(!constant_time_cmp(expects, "5E8F0C2A"));
        assert!(!constant_time_cmp(expects, "5e8f0c2"));
        assert!(!constant_time_cmp(expects, "5e8f0c2a "));
        assert!(constant_time_cmp("", ""));
    }
}
