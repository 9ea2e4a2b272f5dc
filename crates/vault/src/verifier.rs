//! Theorem dispatch and the success rule.

use anatomist::ParsedUnit;
use serde::{Deserialize, Serialize};

use crate::theorem::TheoremId;
use crate::VaultError;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VerificationResult {
    pub theorem: TheoremId,
    pub success: bool,
    pub pattern_before: bool,
    pub pattern_after: bool,
    pub marker_present: bool,
    /// Pattern absent before: the edit is a no-op that cannot regress.
    pub trivially_satisfied: bool,
    pub errors_before: usize,
    pub errors_after: usize,
    pub message: String,
}

impl VerificationResult {
    /// Verdict for an attempt that never reached its checker.
    pub fn failed(theorem: TheoremId, message: impl Into<String>) -> Self {
        Self {
            theorem,
            success: false,
            pattern_before: false,
            pattern_after: false,
            marker_present: false,
            trivially_satisfied: false,
            errors_before: 0,
            errors_after: 0,
            message: message.into(),
        }
    }
}

#[derive(Debug, Clone, Copy, Default)]
pub struct Verifier;

impl Verifier {
    /// Succeeds iff the pattern was fixed with the marker in place (or never
    /// present) and `after` carries no more parse errors than `before`.
    pub fn verify(
        &self,
        theorem: TheoremId,
        before: &ParsedUnit,
        after: &ParsedUnit,
    ) -> VerificationResult {
        let pattern_before = theorem.pattern_present(before);
        let pattern_after = theorem.pattern_present(after);
        let marker_present = pattern_before && theorem.marker_present(before, after);
        let errors_before = before.errors.len();
        let errors_after = after.errors.len();

        let fixed = pattern_before && !pattern_after && marker_present;
        let trivially_satisfied = !pattern_before;
        let no_regression = errors_after <= errors_before;
        let success = (fixed || trivially_satisfied) && no_regression;

        let message = if !no_regression {
            format!("parse errors increased from {errors_before} to {errors_after}")
        } else if trivially_satisfied {
            "pattern absent; trivially satisfied".to_string()
        } else if pattern_after {
            "pattern still present after transformation".to_string()
        } else if !marker_present {
            "corrective marker missing".to_string()
        } else {
            "pattern removed and marker present".to_string()
        };

        tracing::debug!(%theorem, success, file = %before.file, "verification");
        VerificationResult {
            theorem,
            success,
            pattern_before,
            pattern_after,
            marker_present,
            trivially_satisfied,
            errors_before,
            errors_after,
            message,
        }
    }

    /// String-keyed entry point. Unknown names are an error, never a pass.
    pub fn verify_named(
        &self,
        theorem: &str,
        before: &ParsedUnit,
        after: &ParsedUnit,
    ) -> Result<VerificationResult, VaultError> {
        Ok(self.verify(theorem.parse()?, before, after))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use anatomist::ParserHost;

    #[test]
    fn test_fixed_interpolation() {
        let mut host = ParserHost::in_memory().unwrap();
        let before = host.parse("a.js", "const s = 'Hi ${name}';\n");
        let after = host.parse("a.js", "const s = `Hi ${name}`;\n");
        let r = Verifier.verify(TheoremId::TemplateInterpolation, &before, &after);
        assert!(r.success, "{}", r.message);
        assert!(r.pattern_before && !r.pattern_after && r.marker_present);
    }

    #[test]
    fn test_unchanged_output_fails() {
        let mut host = ParserHost::in_memory().unwrap();
        let before = host.parse("a.js", "const s = 'Hi ${name}';\n");
        let r = Verifier.verify(TheoremId::TemplateInterpolation, &before, &before);
        assert!(!r.success);
        assert!(r.pattern_after);
    }

    #[test]
    fn test_trivial_and_regression() {
        let mut host = ParserHost::in_memory().unwrap();
        let clean = host.parse("a.js", "const s = 1;\n");
        let broken = host.parse("a.js", "const s = ;;; (\n");
        let r = Verifier.verify(TheoremId::StrayText, &clean, &clean);
        assert!(r.success && r.trivially_satisfied);

        let r = Verifier.verify(TheoremId::RenderBinding, &clean, &broken);
        assert!(!r.success);
        assert!(r.message.contains("parse errors increased"));
    }

    #[test]
    fn test_unknown_theorem_name_is_loud() {
        let mut host = ParserHost::in_memory().unwrap();
        let unit = host.parse("a.js", "1;");
        assert!(Verifier.verify_named("made-up", &unit, &unit).is_err());
        assert!(Verifier.verify_named("stray-text", &unit, &unit).unwrap().success);
    }
}
