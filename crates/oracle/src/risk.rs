//! Vulnerability points, risk scoring and the execution plan.

use serde::Serialize;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum VulnerabilityKind {
    ParseError,
    ModuleSideEffect,
    MissingDependency,
    MissingImport,
    CircularDependency,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Severity {
    Low,
    Medium,
    High,
    Critical,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct VulnerabilityPoint {
    /// Node id, or `cycle:<n>` for circular dependencies.
    pub file: String,
    pub kind: VulnerabilityKind,
    pub severity: Severity,
    pub detail: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum RiskLevel {
    Low,
    Medium,
    High,
    Critical,
}

impl RiskLevel {
    pub fn from_score(score: u32) -> Self {
        match score {
            0 => Self::Low,
            1..=3 => Self::Medium,
            4..=10 => Self::High,
            _ => Self::Critical,
        }
    }

    pub fn success_probability(self) -> f64 {
        match self {
            Self::Low => 0.95,
            Self::Medium => 0.85,
            Self::High => 0.70,
            Self::Critical => 0.50,
        }
    }
}

/// Counts feeding the risk formula.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct RiskFactors {
    /// Parse-error files lying on some critical path.
    pub critical_parse_errors: u32,
    pub side_effects: u32,
    pub missing_dependencies: u32,
    pub cycles: u32,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct RiskAssessment {
    pub factors: RiskFactors,
    pub score: u32,
    pub level: RiskLevel,
    pub success_probability: f64,
}

impl RiskAssessment {
    /// `score = critical_parse_errors + side_effects + missing_dependencies + 2 × cycles`
    pub fn from_factors(factors: RiskFactors) -> Self {
        let score = factors.critical_parse_errors
            + factors.side_effects
            + factors.missing_dependencies
            + 2 * factors.cycles;
        let level = RiskLevel::from_score(score);
        Self {
            factors,
            score,
            level,
            success_probability: level.success_probability(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PlanPhase {
    pub name: &'static str,
    pub targets: Vec<String>,
    /// Fixed estimated-duration weight.
    pub weight: u32,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ExecutionPlan {
    pub phases: Vec<PlanPhase>,
    /// Sum of weights of phases with at least one target.
    pub total_weight: u32,
}

impl ExecutionPlan {
    pub fn new(
        critical_syntax: Vec<String>,
        side_effects: Vec<String>,
        unresolved: Vec<String>,
    ) -> Self {
        let phases = vec![
            PlanPhase {
                name: "critical_syntax_repair",
                targets: critical_syntax,
                weight: 5,
            },
            PlanPhase {
                name: "side_effect_isolation",
                targets: side_effects,
                weight: 3,
            },
            PlanPhase {
                name: "dependency_resolution",
                targets: unresolved,
                weight: 2,
            },
        ];
        let total_weight = phases
            .iter()
            .filter(|p| !p.targets.is_empty())
            .map(|p| p.weight)
            .sum();
        Self {
            phases,
            total_weight,
        }
    }
}
