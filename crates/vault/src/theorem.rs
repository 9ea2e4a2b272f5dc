//! The theorem catalogue.
//!
//! Each theorem names one class of source defect. Its checker answers three
//! questions about a before/after pair of units: is the triggering pattern
//! present before, is it still present after, and is the corrective marker
//! present after.

use std::fmt;
use std::str::FromStr;

use anatomist::patterns::{interpolated_templates, interpolation_hazards};
use anatomist::{detect_patterns, stray_text_lines, ParsedUnit};
use serde::{Deserialize, Serialize};

use crate::VaultError;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum TheoremId {
    StrayText,
    RenderBinding,
    TemplateInterpolation,
}

/// Human-readable statement of a theorem.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct Theorem {
    pub id: TheoremId,
    pub precondition: &'static str,
    pub postcondition: &'static str,
}

static CATALOGUE: [Theorem; 3] = [
    Theorem {
        id: TheoremId::StrayText,
        precondition: "Stray non-code text at module scope breaks parsing.",
        postcondition: "Replacing each stray line with a line comment restores validity.",
    },
    Theorem {
        id: TheoremId::RenderBinding,
        precondition: "Markup usage requires the rendering library bound in scope.",
        postcondition: "A default or namespace import of React is present.",
    },
    Theorem {
        id: TheoremId::TemplateInterpolation,
        precondition: "`${}` inside a quoted string is never interpolated.",
        postcondition: "The string is a template literal with a substitution.",
    },
];

impl TheoremId {
    pub const ALL: [TheoremId; 3] = [
        Self::StrayText,
        Self::RenderBinding,
        Self::TemplateInterpolation,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            Self::StrayText => "stray-text",
            Self::RenderBinding => "render-binding",
            Self::TemplateInterpolation => "template-interpolation",
        }
    }

    pub fn theorem(self) -> &'static Theorem {
        match self {
            Self::StrayText => &CATALOGUE[0],
            Self::RenderBinding => &CATALOGUE[1],
            Self::TemplateInterpolation => &CATALOGUE[2],
        }
    }

    /// Whether `unit` exhibits the triggering pattern.
    pub fn pattern_present(self, unit: &ParsedUnit) -> bool {
        match self {
            Self::StrayText => unit.has_errors() && !stray_text_lines(&unit.source).is_empty(),
            Self::RenderBinding => {
                let p = detect_patterns(unit);
                p.has_markup() && !p.binds_render_library
            }
            Self::TemplateInterpolation => !interpolation_hazards(unit).is_empty(),
        }
    }

    /// Whether `after` carries the corrective marker for `before`'s defect.
    pub fn marker_present(self, before: &ParsedUnit, after: &ParsedUnit) -> bool {
        match self {
            Self::StrayText => {
                let lines = stray_text_lines(&before.source);
                !lines.is_empty()
                    && lines.iter().all(|l| {
                        after
                            .source
                            .lines()
                            .any(|a| a.trim() == format!("// {}", l.text))
                    })
            }
            Self::RenderBinding => detect_patterns(after).binds_render_library,
            Self::TemplateInterpolation => interpolated_templates(after) > 0,
        }
    }
}

impl fmt::Display for TheoremId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for TheoremId {
    type Err = VaultError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .into_iter()
            .find(|t| t.as_str() == s)
            .ok_or_else(|| VaultError::UnknownTheorem(s.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use anatomist::ParserHost;

    #[test]
    fn test_names_round_trip() {
        for t in TheoremId::ALL {
            assert_eq!(t.as_str().parse::<TheoremId>().unwrap(), t);
            assert_eq!(t.theorem().id, t);
        }
        assert!(matches!(
            "no-such-theorem".parse::<TheoremId>(),
            Err(VaultError::UnknownTheorem(_))
        ));
    }

    #[test]
    fn test_serde_uses_kebab_names() {
        let json = serde_json::to_string(&TheoremId::TemplateInterpolation).unwrap();
        assert_eq!(json, "\"template-interpolation\"");
    }

    #[test]
    fn test_stray_text_checker() {
        let mut host = ParserHost::in_memory().unwrap();
        let before = host.parse("a.js", "This file is broken on purpose.\nexport const a = 1;\n");
        let after = host.parse("a.js", "// This file is broken on purpose.\nexport const a = 1;\n");
        assert!(TheoremId::StrayText.pattern_present(&before));
        assert!(!TheoremId::StrayText.pattern_present(&after));
        assert!(TheoremId::StrayText.marker_present(&before, &after));
    }

    #[test]
    fn test_render_binding_checker() {
        let mut host = ParserHost::in_memory().unwrap();
        let before = host.parse("W.jsx", "export const W = () => <b />;\n");
        let after = host.parse(
            "W.jsx",
            "import React from 'react';\nexport const W = () => <b />;\n",
        );
        assert!(TheoremId::RenderBinding.pattern_present(&before));
        assert!(!TheoremId::RenderBinding.pattern_present(&after));
        assert!(TheoremId::RenderBinding.marker_present(&before, &after));
    }
}
