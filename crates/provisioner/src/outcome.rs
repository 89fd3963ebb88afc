//! Uniform fallible result for adapter-facing operations
//!
//! Adapters never let errors cross into the engine. Every lookup, diff and
//! apply returns an [`Outcome`] that is either a value, an empty success
//! (for example a remote resource that does not exist) or a failure with
//! an optional message.

use std::fmt;

/// Result of an adapter operation
///
/// Three shapes are possible:
/// - success with a value ([`Outcome::of`])
/// - success without a value ([`Outcome::empty`]), used when the remote
///   state is absent
/// - failure with an optional message ([`Outcome::failure`])
#[derive(Debug, Clone, PartialEq, Eq)]
#[must_use]
pub struct Outcome<T> {
    result: Option<T>,
    failed: bool,
    message: Option<String>,
}

impl<T> Outcome<T> {
    /// Successful outcome carrying a value
    pub fn of(value: T) -> Self {
        Self {
            result: Some(value),
            failed: false,
            message: None,
        }
    }

    /// Successful outcome without a value
    pub fn empty() -> Self {
        Self {
            result: None,
            failed: false,
            message: None,
        }
    }

    /// Failed outcome with a message
    pub fn failure(message: impl Into<String>) -> Self {
        Self {
            result: None,
            failed: true,
            message: Some(message.into()),
        }
    }

    /// Failed outcome without any further detail
    pub fn failed() -> Self {
        Self {
            result: None,
            failed: true,
            message: None,
        }
    }

    /// Build an outcome from an optional value (`None` maps to empty)
    pub fn from_option(value: Option<T>) -> Self {
        match value {
            Some(v) => Self::of(v),
            None => Self::empty(),
        }
    }

    /// Build an outcome from a fallible operation, keeping the error text
    pub fn from_result<E: fmt::Display>(result: Result<Option<T>, E>) -> Self {
        match result {
            Ok(value) => Self::from_option(value),
            Err(e) => Self::failure(e.to_string()),
        }
    }

    pub fn is_failed(&self) -> bool {
        self.failed
    }

    /// True for a success that carries no value
    pub fn is_empty(&self) -> bool {
        !self.failed && self.result.is_none()
    }

    pub fn is_empty_or_failed(&self) -> bool {
        self.failed || self.result.is_none()
    }

    pub fn result(&self) -> Option<&T> {
        self.result.as_ref()
    }

    pub fn into_result(self) -> Option<T> {
        self.result
    }

    pub fn message(&self) -> Option<&str> {
        self.message.as_deref()
    }

    /// Message for logging, with a placeholder when none was given
    pub fn error_message(&self) -> String {
        self.message
            .clone()
            .unwrap_or_else(|| "<no message>".to_string())
    }

    /// Transform the carried value, keeping failure and emptiness
    pub fn map<U>(self, f: impl FnOnce(T) -> U) -> Outcome<U> {
        Outcome {
            result: self.result.map(f),
            failed: self.failed,
            message: self.message,
        }
    }

    /// Map a present value with `present`, an absent one with `missing`
    ///
    /// Failures are propagated unchanged. This is the usual shape of an
    /// adapter's diff: look the resource up, then compare what was found
    /// or report it as missing.
    pub fn map_or_else_missing<U>(
        self,
        present: impl FnOnce(T) -> U,
        missing: impl FnOnce() -> U,
    ) -> Outcome<U> {
        if self.failed {
            return Outcome {
                result: None,
                failed: true,
                message: self.message,
            };
        }

        match self.result {
            Some(value) => Outcome::of(present(value)),
            None => Outcome::of(missing()),
        }
    }
}

impl<T> Default for Outcome<T> {
    fn default() -> Self {
        Self::empty()
    }
}

impl<T> From<anyhow::Error> for Outcome<T> {
    fn from(err: anyhow::Error) -> Self {
        Self::failure(format!("{err:#}"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_of_carries_value() {
        let outcome = Outcome::of(42);
        assert!(!outcome.is_failed());
        assert!(!outcome.is_empty());
        assert_eq!(outcome.result(), Some(&42));
    }

    #[test]
    fn test_empty_is_not_a_failure() {
        let outcome: Outcome<u32> = Outcome::empty();
        assert!(outcome.is_empty());
        assert!(!outcome.is_failed());
        assert!(outcome.is_empty_or_failed());
    }

    #[test]
    fn test_failure_keeps_message() {
        let outcome: Outcome<u32> = Outcome::failure("boom");
        assert!(outcome.is_failed());
        assert!(!outcome.is_empty());
        assert_eq!(outcome.message(), Some("boom"));
        assert_eq!(outcome.error_message(), "boom");
    }

    #[test]
    fn test_error_message_placeholder() {
        let outcome: Outcome<u32> = Outcome::failed();
        assert_eq!(outcome.error_message(), "<no message>");
    }

    #[test]
    fn test_from_result() {
        let ok: Outcome<u32> = Outcome::from_result::<String>(Ok(Some(1)));
        assert_eq!(ok.into_result(), Some(1));

        let absent: Outcome<u32> = Outcome::from_result::<String>(Ok(None));
        assert!(absent.is_empty());

        let err: Outcome<u32> = Outcome::from_result(Err("connection refused"));
        assert!(err.is_failed());
        assert_eq!(err.message(), Some("connection refused"));
    }

    #[test]
    fn test_map_or_else_missing() {
        let present = Outcome::of("rules").map_or_else_missing(|r| r.len(), || 0);
        assert_eq!(present.into_result(), Some(5));

        let absent = Outcome::<&str>::empty().map_or_else_missing(|r| r.len(), || 0);
        assert_eq!(absent.into_result(), Some(0));

        let failed = Outcome::<&str>::failure("nope").map_or_else_missing(|r| r.len(), || 0);
        assert!(failed.is_failed());
        assert_eq!(failed.message(), Some("nope"));
    }

    #[test]
    fn test_from_anyhow() {
        let outcome: Outcome<()> = anyhow::anyhow!("remote unavailable").into();
        assert!(outcome.is_failed());
        assert_eq!(outcome.message(), Some("remote unavailable"));
    }
}
