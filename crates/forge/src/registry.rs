//! # Transformation Registry
//!
//! Owns the rule table, per-rule counters and the proof ledger. Every
//! attempt that reaches a registered rule leaves exactly one proof record,
//! whether it verified, failed verification, returned an error or panicked.

use std::any::Any;
use std::collections::BTreeMap;
use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;
use std::time::Instant;

use anatomist::{ParsedUnit, ParserHost};
use serde::Serialize;
use vault::{ProofLedger, VerificationResult};

use crate::edit::{apply_edits, TextEdit};
use crate::rules::{builtin_rules, RuleId, TransformContext, TransformationRule};
use crate::ForgeError;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct RuleStats {
    pub applied: u64,
    pub succeeded: u64,
    pub failed: u64,
}

#[derive(Debug, Clone, Serialize)]
pub struct TransformFailure {
    pub message: String,
    pub rule: String,
    pub timestamp_ms: u64,
}

#[derive(Debug, Clone, Serialize)]
pub struct TransformOutcome {
    pub rule: String,
    pub file: String,
    /// Verification passed.
    pub success: bool,
    /// Verification passed and the text changed.
    pub transformed: bool,
    /// Set only when `success`.
    pub new_source: Option<String>,
    #[serde(skip)]
    pub unit: Option<Arc<ParsedUnit>>,
    pub error: Option<TransformFailure>,
    pub verification: Option<VerificationResult>,
    pub proof_id: Option<String>,
    pub edits: usize,
}

impl TransformOutcome {
    fn failure(rule: &str, file: &str, message: String) -> Self {
        Self {
            rule: rule.to_string(),
            file: file.to_string(),
            success: false,
            transformed: false,
            new_source: None,
            unit: None,
            error: Some(TransformFailure {
                message,
                rule: rule.to_string(),
                timestamp_ms: common::now_millis(),
            }),
            verification: None,
            proof_id: None,
            edits: 0,
        }
    }
}

struct Attempt {
    edits: Vec<TextEdit>,
    new_source: String,
    after: Arc<ParsedUnit>,
    verification: VerificationResult,
}

pub struct TransformationRegistry {
    rules: Vec<Box<dyn TransformationRule>>,
    stats: BTreeMap<RuleId, RuleStats>,
    ledger: ProofLedger,
}

impl TransformationRegistry {
    /// Registry with the built-in rules.
    pub fn new(ledger: ProofLedger) -> Self {
        Self::with_rules(builtin_rules(), ledger)
    }

    pub fn with_rules(rules: Vec<Box<dyn TransformationRule>>, ledger: ProofLedger) -> Self {
        let stats = rules.iter().map(|r| (r.id(), RuleStats::default())).collect();
        Self {
            rules,
            stats,
            ledger,
        }
    }

    pub fn rule(&self, id: RuleId) -> Option<&dyn TransformationRule> {
        self.rules.iter().find(|r| r.id() == id).map(|r| r.as_ref())
    }

    pub fn rules(&self) -> impl Iterator<Item = &dyn TransformationRule> {
        self.rules.iter().map(|r| r.as_ref())
    }

    pub fn stats(&self) -> &BTreeMap<RuleId, RuleStats> {
        &self.stats
    }

    pub fn ledger(&self) -> &ProofLedger {
        &self.ledger
    }

    /// Rules whose defect pattern is present in `unit`, in table order.
    pub fn candidates(&self, unit: &ParsedUnit) -> Vec<RuleId> {
        self.rules
            .iter()
            .filter(|r| r.is_candidate(unit))
            .map(|r| r.id())
            .collect()
    }

    /// [`apply_transformation`] keyed by rule name.
    ///
    /// [`apply_transformation`]: TransformationRegistry::apply_transformation
    pub fn apply_named(
        &mut self,
        rule: &str,
        unit: &ParsedUnit,
        ctx: &TransformContext,
        host: &mut ParserHost,
    ) -> TransformOutcome {
        match rule.parse::<RuleId>() {
            Ok(id) => self.apply_transformation(id, unit, ctx, host),
            Err(e) => TransformOutcome::failure(rule, &ctx.file, e.to_string()),
        }
    }

    /// Applies one rule to `ctx.source`, reparses, verifies and records the
    /// verdict. Never panics and never returns an error: failures come back
    /// as an outcome with `success == false`.
    pub fn apply_transformation(
        &mut self,
        rule_id: RuleId,
        unit: &ParsedUnit,
        ctx: &TransformContext,
        host: &mut ParserHost,
    ) -> TransformOutcome {
        let Some(rule) = self.rules.iter().find(|r| r.id() == rule_id) else {
            tracing::warn!(rule = %rule_id, "rule not registered");
            return TransformOutcome::failure(
                rule_id.as_str(),
                &ctx.file,
                ForgeError::UnknownRule(rule_id.to_string()).to_string(),
            );
        };
        let theorem = rule.theorem();
        let started = Instant::now();

        let attempt = panic::catch_unwind(AssertUnwindSafe(|| -> Result<Attempt, ForgeError> {
            let edits = rule.apply(unit, ctx)?;
            let new_source = apply_edits(&ctx.source, &edits)?;
            let after = host.parse(&ctx.file, &new_source);
            let verification = rule.verify(unit, &after);
            Ok(Attempt {
                edits,
                new_source,
                after,
                verification,
            })
        }));
        let duration_ms = started.elapsed().as_millis() as u64;

        let mut outcome = match attempt {
            Ok(Ok(attempt)) => {
                let success = attempt.verification.success;
                TransformOutcome {
                    rule: rule_id.to_string(),
                    file: ctx.file.clone(),
                    success,
                    transformed: success && attempt.new_source != ctx.source,
                    new_source: success.then_some(attempt.new_source),
                    unit: success.then_some(attempt.after),
                    error: None,
                    verification: Some(attempt.verification),
                    proof_id: None,
                    edits: attempt.edits.len(),
                }
            }
            Ok(Err(e)) => {
                let mut outcome = TransformOutcome::failure(rule_id.as_str(), &ctx.file, e.to_string());
                outcome.verification = Some(VerificationResult::failed(theorem, e.to_string()));
                outcome
            }
            Err(payload) => {
                let message = format!("rule panicked: {}", panic_message(payload.as_ref()));
                let mut outcome = TransformOutcome::failure(rule_id.as_str(), &ctx.file, message.clone());
                outcome.verification = Some(VerificationResult::failed(theorem, message));
                outcome
            }
        };

        let verification = outcome
            .verification
            .clone()
            .unwrap_or_else(|| VerificationResult::failed(theorem, "no verdict"));
        match self
            .ledger
            .append(rule_id.as_str(), &ctx.file, verification, duration_ms)
        {
            Ok(record) => outcome.proof_id = Some(record.id.clone()),
            Err(e) => tracing::warn!(rule = %rule_id, error = %e, "proof record not written"),
        }

        let stats = self.stats.entry(rule_id).or_default();
        stats.applied += 1;
        if outcome.success {
            stats.succeeded += 1;
        } else {
            stats.failed += 1;
        }

        if outcome.success {
            tracing::debug!(rule = %rule_id, file = %ctx.file, edits = outcome.edits, "transformation verified");
        } else {
            let reason = outcome
                .error
                .as_ref()
                .map(|e| e.message.as_str())
                .or(outcome.verification.as_ref().map(|v| v.message.as_str()))
                .unwrap_or_default();
            tracing::warn!(rule = %rule_id, file = %ctx.file, reason, "transformation rejected");
        }
        outcome
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use anatomist::ParsedUnit;
    use vault::TheoremId;

    /// Edits like the real rule but always fails verification.
    struct NeverVerifies;

    impl TransformationRule for NeverVerifies {
        fn id(&self) -> RuleId {
            RuleId::StrayTextToComment
        }
        fn name(&self) -> &'static str {
            "never verifies"
        }
        fn theorem(&self) -> TheoremId {
            TheoremId::StrayText
        }
        fn proof_statement(&self) -> &'static str {
            ""
        }
        fn apply(&self, _: &ParsedUnit, ctx: &TransformContext) -> Result<Vec<TextEdit>, ForgeError> {
            Ok(vec![TextEdit::insert(ctx.source.len(), "\n")])
        }
        fn verify(&self, _: &ParsedUnit, _: &ParsedUnit) -> VerificationResult {
            VerificationResult::failed(TheoremId::StrayText, "rejected")
        }
    }

    struct Panics;

    impl TransformationRule for Panics {
        fn id(&self) -> RuleId {
            RuleId::InterpolateAttribute
        }
        fn name(&self) -> &'static str {
            "panics"
        }
        fn theorem(&self) -> TheoremId {
            TheoremId::TemplateInterpolation
        }
        fn proof_statement(&self) -> &'static str {
            ""
        }
        fn apply(&self, _: &ParsedUnit, _: &TransformContext) -> Result<Vec<TextEdit>, ForgeError> {
            panic!("boom")
        }
    }

    fn ctx(file: &str, source: &str) -> TransformContext {
        TransformContext {
            file: file.to_string(),
            source: source.to_string(),
        }
    }

    #[test]
    fn test_verified_transformation_records_proof() {
        let mut host = ParserHost::in_memory().unwrap();
        let mut registry = TransformationRegistry::new(ProofLedger::in_memory());
        let src = "const s = 'Hi ${name}';\n";
        let unit = host.parse("a.js", src);

        assert_eq!(registry.candidates(&unit), vec![RuleId::InterpolateAttribute]);
        let out = registry.apply_transformation(RuleId::InterpolateAttribute, &unit, &ctx("a.js", src), &mut host);
        assert!(out.success && out.transformed);
        assert_eq!(out.new_source.as_deref(), Some("const s = `Hi ${name}`;\n"));
        assert_eq!(registry.ledger().len(), 1);
        assert_eq!(
            registry.ledger().get(out.proof_id.as_deref().unwrap()).unwrap().context,
            "a.js"
        );
        assert_eq!(registry.stats()[&RuleId::InterpolateAttribute].succeeded, 1);
    }

    #[test]
    fn test_failed_verification_is_gated_and_recorded() {
        let mut host = ParserHost::in_memory().unwrap();
        let mut registry =
            TransformationRegistry::with_rules(vec![Box::new(NeverVerifies)], ProofLedger::in_memory());
        let src = "Stray words sit here.\nconst a = 1;\n";
        let unit = host.parse("a.js", src);

        for attempt in 1..=2u64 {
            let out = registry.apply_transformation(RuleId::StrayTextToComment, &unit, &ctx("a.js", src), &mut host);
            assert!(!out.success);
            assert!(!out.transformed);
            assert!(out.new_source.is_none());
            assert!(out.proof_id.is_some());
            let stats = registry.stats()[&RuleId::StrayTextToComment];
            assert_eq!((stats.applied, stats.failed, stats.succeeded), (attempt, attempt, 0));
        }
        let summary = registry.ledger().summary();
        assert_eq!((summary.total, summary.failed), (2, 2));
        assert_eq!(registry.ledger().verify_chain().unwrap(), 2);
    }

    #[test]
    fn test_panicking_rule_becomes_failure() {
        let mut host = ParserHost::in_memory().unwrap();
        let mut registry = TransformationRegistry::with_rules(vec![Box::new(Panics)], ProofLedger::in_memory());
        let unit = host.parse("a.js", "1;\n");
        let out = registry.apply_transformation(RuleId::InterpolateAttribute, &unit, &ctx("a.js", "1;\n"), &mut host);
        assert!(!out.success);
        let error = out.error.unwrap();
        assert!(error.message.contains("boom"));
        assert_eq!(error.rule, "interpolate-attribute");
        assert_eq!(registry.ledger().len(), 1);
    }

    #[test]
    fn test_unregistered_and_unknown_rules() {
        let mut host = ParserHost::in_memory().unwrap();
        let mut registry = TransformationRegistry::with_rules(Vec::new(), ProofLedger::in_memory());
        let unit = host.parse("a.js", "1;\n");
        let out = registry.apply_transformation(RuleId::EnsureRenderImport, &unit, &ctx("a.js", "1;\n"), &mut host);
        assert!(!out.success && out.proof_id.is_none());

        let out = registry.apply_named("no-such-rule", &unit, &ctx("a.js", "1;\n"), &mut host);
        assert!(out.error.unwrap().message.contains("no-such-rule"));
        assert!(registry.ledger().is_empty());
    }
}
