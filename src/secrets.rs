//! Secret broker — credential injection at skill execution time.
//!
//! Skills read secrets inside `execute`, never in `validate` or at
//! construction, so credentials only leave the environment when actually
//! needed and never land in prompt text or trace output. No caching: every
//! call re-reads the environment so rotated secrets are picked up without a
//! restart.

use crate::error::{Result, WardenError};

/// Read a secret from the environment at call time.
pub fn get(key: &str) -> Result<String> {
    match std::env::var(key) {
        Ok(value) if !value.is_empty() => Ok(value),
        _ => Err(WardenError::Secret(key.to_string())),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn missing_secret_errors_with_key_name() {
        let err = get("WARDEN_TEST_MISSING_SECRET").unwrap_err();
        assert!(err.to_string().contains("WARDEN_TEST_MISSING_SECRET"));
    }

    #[test]
    fn reads_are_uncached() {
        // SAFETY: test-only env mutation on a key nothing else reads.
        unsafe { std::env::set_var("WARDEN_TEST_ROTATED_SECRET", "first") };
        assert_eq!(get("WARDEN_TEST_ROTATED_SECRET").unwrap(), "first");
        unsafe { std::env::set_var("WARDEN_TEST_ROTATED_SECRET", "second") };
        assert_eq!(get("WARDEN_TEST_ROTATED_SECRET").unwrap(), "second");
        unsafe { std::env::remove_var("WARDEN_TEST_ROTATED_SECRET") };
        assert!(get("WARDEN_TEST_ROTATED_SECRET").is_err());
    }

    #[test]
    fn empty_value_counts_as_missing() {
        unsafe { std::env::set_var("WARDEN_TEST_EMPTY_SECRET", "") };
        assert!(get("WARDEN_TEST_EMPTY_SECRET").is_err());
        unsafe { std::env::remove_var("WARDEN_TEST_EMPTY_SECRET") };
    }
}
