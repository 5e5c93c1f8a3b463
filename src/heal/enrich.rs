//! Render-error enrichment
//!
//! Turns a raw renderer error into the text the next attempt's fix prompt is
//! built from. Classification is data: each rule maps substrings to guidance,
//! so a new failure class is one more table row.

use crate::pipeline::validate::Severity;
use serde::Serialize;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorCategory {
    GroupAnimation,
    Indentation,
    Syntax,
    Import,
    UndefinedName,
    Attribute,
    Latex,
    Infrastructure,
    Unknown,
}

impl ErrorCategory {
    pub fn label(&self) -> &'static str {
        match self {
            ErrorCategory::GroupAnimation => "GROUP ANIMATION",
            ErrorCategory::Indentation => "INDENTATION",
            ErrorCategory::Syntax => "SYNTAX",
            ErrorCategory::Import => "IMPORT",
            ErrorCategory::UndefinedName => "UNDEFINED NAME",
            ErrorCategory::Attribute => "ATTRIBUTE",
            ErrorCategory::Latex => "LATEX",
            ErrorCategory::Infrastructure => "INFRASTRUCTURE",
            ErrorCategory::Unknown => "UNKNOWN",
        }
    }
}

struct GuidanceRule {
    category: ErrorCategory,
    /// Lowercase substrings; any one matches.
    patterns: &'static [&'static str],
    guidance: &'static str,
    severity: Severity,
    summary: &'static str,
    suggestion: &'static str,
}

/// Ordered most specific first; `friendly_error` takes the first match.
const RULES: &[GuidanceRule] = &[
    GuidanceRule {
        category: ErrorCategory::GroupAnimation,
        patterns: &[
            "unexpected argument",
            "passed to scene.play",
            "is not an animation",
            "object is not an animation",
        ],
        guidance: "Never pass a VGroup/Group (or a star-unpacked group) to self.play() directly. Animate each member instead, using one of:\n  self.play(LaggedStart(*[FadeIn(m) for m in group], lag_ratio=0.2))\n  self.play(AnimationGroup(*[Create(m) for m in group]))\n  self.play(group.animate.shift(UP))",
        severity: Severity::Critical,
        summary: "The animation tried to play a group of shapes as if it were an animation.",
        suggestion: "Animate each member of the group, or use group.animate.",
    },
    GuidanceRule {
        category: ErrorCategory::Indentation,
        patterns: &["indentationerror", "unexpected indent", "unindent does not match", "expected an indented block"],
        guidance: "Fix the indentation: four spaces per level, no tabs, every block body indented one level deeper than its header.",
        severity: Severity::High,
        summary: "The generated code was not indented consistently.",
        suggestion: "Retry; the generator will re-indent the scene.",
    },
    GuidanceRule {
        category: ErrorCategory::Syntax,
        patterns: &["syntaxerror", "invalid syntax", "unterminated string", "was never closed"],
        guidance: "Fix the Python syntax error at the reported line: check brackets, quotes, colons and commas. Return a complete file, not a fragment.",
        severity: Severity::High,
        summary: "The generated code had a Python syntax error.",
        suggestion: "Retry, or simplify the request.",
    },
    GuidanceRule {
        category: ErrorCategory::Import,
        patterns: &["importerror", "modulenotfounderror", "no module named", "cannot import name"],
        guidance: "Only import from manim (`from manim import *`) and, for narration, manim_voiceover. Do not import any other package.",
        severity: Severity::Medium,
        summary: "The code imported something the renderer does not have.",
        suggestion: "Avoid requesting third-party libraries in the prompt.",
    },
    GuidanceRule {
        category: ErrorCategory::UndefinedName,
        patterns: &["nameerror", "is not defined"],
        guidance: "A name is used before it is defined or does not exist in Manim Community v0.18.1. Define every variable before use and replace unsupported classes (PieChart, LineChart, Histogram, ScatterPlot) with Axes-based drawings.",
        severity: Severity::Medium,
        summary: "The code referenced something that does not exist.",
        suggestion: "Retry; unsupported chart types are rebuilt from basic shapes.",
    },
    GuidanceRule {
        category: ErrorCategory::Attribute,
        patterns: &["attributeerror", "has no attribute"],
        guidance: "An attribute or method does not exist on that object in Manim Community v0.18.1. Use only documented methods; self.camera.frame requires MovingCameraScene.",
        severity: Severity::Medium,
        summary: "The code called a method that does not exist.",
        suggestion: "Retry; the generator will use supported methods.",
    },
    GuidanceRule {
        category: ErrorCategory::Latex,
        patterns: &["latex error", "latex compilation", "tex_to_svg", "missing $ inserted", "undefined control sequence"],
        guidance: "LaTeX failed to compile. Use raw strings (MathTex(r\"...\")), keep expressions simple, and put plain words in Text() instead of MathTex().",
        severity: Severity::Low,
        summary: "A formula could not be typeset.",
        suggestion: "Simplify the equations in the request.",
    },
    GuidanceRule {
        category: ErrorCategory::Infrastructure,
        patterns: &["timed out", "timeout", "connection refused", "connection reset", "service unavailable", "render request failed", "render service error"],
        guidance: "The renderer itself was unreachable or timed out. Keep the scene short and avoid heavy computation.",
        severity: Severity::Medium,
        summary: "The rendering service did not respond.",
        suggestion: "Try again in a few minutes.",
    },
];

const FALLBACK_PATH_MARKERS: &[&str] = &["fallback_scene.py", "fallback render failed"];

/// True when the failure came from the renderer's fallback post-processing
/// rather than the submitted scene.
pub fn is_fallback_path_failure(raw_error: &str, stderr: Option<&str>) -> bool {
    let haystack = format!("{}\n{}", raw_error, stderr.unwrap_or_default()).to_lowercase();
    FALLBACK_PATH_MARKERS.iter().any(|m| haystack.contains(m))
}

fn matching_rules(raw_error: &str, stderr: Option<&str>) -> Vec<&'static GuidanceRule> {
    let haystack = format!("{}\n{}", raw_error, stderr.unwrap_or_default()).to_lowercase();
    RULES
        .iter()
        .filter(|rule| rule.patterns.iter().any(|p| haystack.contains(p)))
        .collect()
}

/// Categories whose patterns occur in the error or stderr, in table order.
pub fn classify(raw_error: &str, stderr: Option<&str>) -> Vec<ErrorCategory> {
    matching_rules(raw_error, stderr)
        .into_iter()
        .map(|rule| rule.category)
        .collect()
}

/// Build the enriched error for a failure on `attempt` (1-based).
pub fn enrich_error(raw_error: &str, stderr: Option<&str>, attempt: usize) -> String {
    let raw_error = raw_error.trim();
    let mut out = if is_fallback_path_failure(raw_error, stderr) {
        format!(
            "The previous render failed inside the renderer's fallback post-processing, not in your scene logic.\nError: {}\nWrite code that renders directly so no fallback processing is needed: avoid voiceover blocks that depend on the speech service and any class Manim Community v0.18.1 does not provide.",
            raw_error
        )
    } else {
        let mut text = format!("Attempt {} render error: {}", attempt, raw_error);
        for rule in matching_rules(raw_error, stderr) {
            text.push_str("\n\n");
            text.push_str(rule.category.label());
            text.push_str(": ");
            text.push_str(rule.guidance);
        }
        text
    };

    if attempt > 1 {
        out.push_str(&format!(
            "\n\nThis is retry attempt {}. Review the error above and produce corrected code.",
            attempt
        ));
    }
    out
}

/// User-facing summary of a terminal failure.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct FriendlyError {
    pub category: ErrorCategory,
    pub severity: Severity,
    pub message: String,
    pub suggestion: String,
}

pub fn friendly_error(raw_error: &str) -> FriendlyError {
    let lower = raw_error.to_lowercase();
    match RULES
        .iter()
        .find(|rule| rule.patterns.iter().any(|p| lower.contains(p)))
    {
        Some(rule) => FriendlyError {
            category: rule.category,
            severity: rule.severity,
            message: rule.summary.to_string(),
            suggestion: rule.suggestion.to_string(),
        },
        None => FriendlyError {
            category: ErrorCategory::Unknown,
            severity: Severity::Medium,
            message: "The animation could not be rendered.".to_string(),
            suggestion: "Try rephrasing the request or shortening it.".to_string(),
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const GROUP_ERROR: &str =
        "TypeError: Unexpected argument VGroup(Dot, Dot) passed to Scene.play().";

    #[test]
    fn group_animation_error_gets_member_animation_guidance() {
        let enriched = enrich_error(GROUP_ERROR, None, 1);
        assert!(enriched.starts_with("Attempt 1 render error: TypeError"));
        assert!(enriched.contains("GROUP ANIMATION: Never pass a VGroup/Group"));
        assert!(enriched.contains("LaggedStart(*[FadeIn(m) for m in group]"));
        assert!(!enriched.contains("retry attempt"));
    }

    #[test]
    fn guidance_for_each_matching_category() {
        let enriched = enrich_error(
            "NameError: name 'PieChart' is not defined",
            Some("  File \"scene.py\", line 3\nIndentationError: unexpected indent"),
            2,
        );
        assert!(enriched.contains("INDENTATION:"));
        assert!(enriched.contains("UNDEFINED NAME:"));
        assert!(enriched.ends_with("This is retry attempt 2. Review the error above and produce corrected code."));
    }

    #[test]
    fn fallback_path_failure_points_away_from_scene_logic() {
        let stderr = "Traceback ... File \"fallback_scene.py\", line 9";
        assert!(is_fallback_path_failure("Render failed", Some(stderr)));
        let enriched = enrich_error("Render failed", Some(stderr), 1);
        assert!(enriched.contains("fallback post-processing, not in your scene logic"));
        assert!(!enriched.contains("Attempt 1 render error"));
        assert!(is_fallback_path_failure("Exception: Fallback render failed: boom", None));
    }

    #[test]
    fn enrichment_is_stable_up_to_attempt_number() {
        let a = enrich_error(GROUP_ERROR, None, 3);
        let b = enrich_error(GROUP_ERROR, None, 3);
        assert_eq!(a, b);
        let c = enrich_error(GROUP_ERROR, None, 4);
        assert_eq!(a.replace('3', "4"), c);
    }

    #[test]
    fn classify_preserves_table_order() {
        let categories = classify("SyntaxError: invalid syntax", Some("ModuleNotFoundError: No module named 'numpyy'"));
        assert_eq!(categories, vec![ErrorCategory::Syntax, ErrorCategory::Import]);
        assert!(classify("something odd", None).is_empty());
    }

    #[test]
    fn friendly_error_picks_most_specific_rule() {
        let friendly = friendly_error(GROUP_ERROR);
        assert_eq!(friendly.category, ErrorCategory::GroupAnimation);
        assert_eq!(friendly.severity, Severity::Critical);

        let unknown = friendly_error("segfault in renderer");
        assert_eq!(unknown.category, ErrorCategory::Unknown);
        assert!(!unknown.suggestion.is_empty());
    }
}
