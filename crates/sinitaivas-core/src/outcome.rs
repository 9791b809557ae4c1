// ABOUTME: Result type for best-effort pipeline stages that degrade instead of failing.
// ABOUTME: A Degraded outcome still carries a usable value plus the reasons it is incomplete.

/// The result of a stage that always produces a value, possibly a reduced one.
///
/// Every stage of the ingestion pipeline that can fail locally (content
/// decoding, checkpoint writes, envelope construction) returns an `Outcome`
/// rather than an error. Callers treat both variants as forward progress.
#[derive(Debug, Clone, PartialEq)]
pub enum Outcome<T> {
    Complete(T),
    Degraded { value: T, reasons: Vec<String> },
}

impl<T> Outcome<T> {
    /// Wrap a value produced without any loss.
    pub fn complete(value: T) -> Self {
        Outcome::Complete(value)
    }

    /// Wrap a value that is usable but incomplete.
    pub fn degraded(value: T, reason: impl Into<String>) -> Self {
        Outcome::Degraded {
            value,
            reasons: vec![reason.into()],
        }
    }

    pub fn is_degraded(&self) -> bool {
        matches!(self, Outcome::Degraded { .. })
    }

    pub fn value(&self) -> &T {
        match self {
            Outcome::Complete(value) => value,
            Outcome::Degraded { value, .. } => value,
        }
    }

    pub fn into_value(self) -> T {
        match self {
            Outcome::Complete(value) => value,
            Outcome::Degraded { value, .. } => value,
        }
    }

    /// Reasons recorded for a degraded outcome; empty when complete.
    pub fn reasons(&self) -> &[String] {
        match self {
            Outcome::Complete(_) => &[],
            Outcome::Degraded { reasons, .. } => reasons,
        }
    }

    /// Mark this outcome as degraded, appending a reason.
    pub fn degrade(self, reason: impl Into<String>) -> Self {
        match self {
            Outcome::Complete(value) => Outcome::degraded(value, reason),
            Outcome::Degraded { value, mut reasons } => {
                reasons.push(reason.into());
                Outcome::Degraded { value, reasons }
            }
        }
    }

    /// Transform the carried value, keeping any degradation reasons.
    pub fn map<U>(self, f: impl FnOnce(T) -> U) -> Outcome<U> {
        match self {
            Outcome::Complete(value) => Outcome::Complete(f(value)),
            Outcome::Degraded { value, reasons } => Outcome::Degraded {
                value: f(value),
                reasons,
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn complete_has_no_reasons() {
        let outcome = Outcome::complete(7);
        assert!(!outcome.is_degraded());
        assert!(outcome.reasons().is_empty());
        assert_eq!(outcome.into_value(), 7);
    }

    #[test]
    fn degrade_accumulates_reasons() {
        let outcome = Outcome::complete("record")
            .degrade("content fallback")
            .degrade("fallback failed");

        assert!(outcome.is_degraded());
        assert_eq!(outcome.reasons(), ["content fallback", "fallback failed"]);
        assert_eq!(*outcome.value(), "record");
    }

    #[test]
    fn map_preserves_degradation() {
        let outcome = Outcome::degraded(2, "partial").map(|n| n * 10);
        assert_eq!(outcome.reasons(), ["partial"]);
        assert_eq!(outcome.into_value(), 20);
    }
}
