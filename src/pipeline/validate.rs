//! Static validation of generated Manim source
//!
//! Pure pattern checks that catch the failure classes we keep paying renders
//! for. Nothing here executes or imports the code. `validate` never panics and
//! returns an empty list for clean input.

use super::scene::{find_scene_class, has_construct};
use crate::util::{cached_regex, indent_width};
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::fmt;
use std::sync::OnceLock;

/// Declaration order doubles as sort order: most severe first.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Severity {
    Critical,
    High,
    Medium,
    Low,
}

impl Severity {
    pub fn label(&self) -> &'static str {
        match self {
            Severity::Critical => "critical",
            Severity::High => "high",
            Severity::Medium => "medium",
            Severity::Low => "low",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum IssueCategory {
    /// A VGroup/Group handed straight to `self.play`
    GroupAnimation,
    MissingSceneClass,
    MalformedImport,
    MissingConstruct,
    VoiceoverSetup,
    UndefinedName,
    Indentation,
    TextLatex,
    ChartCompleteness,
}

impl IssueCategory {
    pub fn label(&self) -> &'static str {
        match self {
            IssueCategory::GroupAnimation => "group_animation",
            IssueCategory::MissingSceneClass => "missing_scene_class",
            IssueCategory::MalformedImport => "malformed_import",
            IssueCategory::MissingConstruct => "missing_construct",
            IssueCategory::VoiceoverSetup => "voiceover_setup",
            IssueCategory::UndefinedName => "undefined_name",
            IssueCategory::Indentation => "indentation",
            IssueCategory::TextLatex => "text_latex",
            IssueCategory::ChartCompleteness => "chart_completeness",
        }
    }

    pub fn severity(&self) -> Severity {
        match self {
            IssueCategory::GroupAnimation | IssueCategory::MissingSceneClass => Severity::Critical,
            IssueCategory::MalformedImport | IssueCategory::MissingConstruct => Severity::High,
            IssueCategory::VoiceoverSetup | IssueCategory::UndefinedName => Severity::Medium,
            IssueCategory::Indentation
            | IssueCategory::TextLatex
            | IssueCategory::ChartCompleteness => Severity::Low,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ValidationIssue {
    pub severity: Severity,
    pub category: IssueCategory,
    /// 1-based line number, when the issue is tied to one line
    pub line: Option<usize>,
    pub message: String,
}

impl ValidationIssue {
    fn new(category: IssueCategory, line: Option<usize>, message: impl Into<String>) -> Self {
        Self {
            severity: category.severity(),
            category,
            line,
            message: message.into(),
        }
    }
}

impl fmt::Display for ValidationIssue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.line {
            Some(line) => write!(
                f,
                "[{}] {} (line {}): {}",
                self.severity.label(),
                self.category.label(),
                line,
                self.message
            ),
            None => write!(
                f,
                "[{}] {}: {}",
                self.severity.label(),
                self.category.label(),
                self.message
            ),
        }
    }
}

/// Aggregate issue counts per severity.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SeverityCounts {
    pub critical: usize,
    pub high: usize,
    pub medium: usize,
    pub low: usize,
}

impl SeverityCounts {
    pub fn from_issues(issues: &[ValidationIssue]) -> Self {
        let mut counts = Self::default();
        for issue in issues {
            match issue.severity {
                Severity::Critical => counts.critical += 1,
                Severity::High => counts.high += 1,
                Severity::Medium => counts.medium += 1,
                Severity::Low => counts.low += 1,
            }
        }
        counts
    }

    pub fn total(&self) -> usize {
        self.critical + self.high + self.medium + self.low
    }
}

impl fmt::Display for SeverityCounts {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "critical={} high={} medium={} low={}",
            self.critical, self.high, self.medium, self.low
        )
    }
}

const UNDEFINED_CLASSES: &[&str] = &["PieChart", "LineChart", "Histogram", "ScatterPlot"];
const TEXT_MATH_MARKERS: &[&str] = &["^2", "^3", "\\frac", "\\sqrt", "\\pm", "\\times", "_1", "_2"];
const MAX_INDENTATION_ISSUES: usize = 5;

/// Scan `code` for known defect classes. `voice_style` is set when narration
/// was requested.
pub fn validate(code: &str, voice_style: Option<&str>) -> Vec<ValidationIssue> {
    let mut issues = Vec::new();

    check_scene_structure(code, &mut issues);
    check_imports(code, &mut issues);
    check_voiceover_setup(code, voice_style, &mut issues);
    check_group_animation(code, &mut issues);
    check_undefined_names(code, &mut issues);
    check_indentation(code, &mut issues);
    check_text_latex(code, &mut issues);
    check_chart_completeness(code, &mut issues);

    issues.sort_by_key(|issue| (issue.severity, issue.line.unwrap_or(usize::MAX)));
    issues
}

pub fn critical_issues(issues: &[ValidationIssue]) -> Vec<&ValidationIssue> {
    issues
        .iter()
        .filter(|issue| issue.severity == Severity::Critical)
        .collect()
}

fn check_scene_structure(code: &str, issues: &mut Vec<ValidationIssue>) {
    if find_scene_class(code).is_none() {
        issues.push(ValidationIssue::new(
            IssueCategory::MissingSceneClass,
            None,
            "No class deriving from Scene; the renderer has no entry point",
        ));
    } else if !has_construct(code) {
        issues.push(ValidationIssue::new(
            IssueCategory::MissingConstruct,
            None,
            "Scene class has no construct(self) method",
        ));
    }
}

static MANIM_IMPORT_RE: OnceLock<Option<Regex>> = OnceLock::new();

fn check_imports(code: &str, issues: &mut Vec<ValidationIssue>) {
    let mut has_manim_import = false;
    if let Some(re) = cached_regex(&MANIM_IMPORT_RE, r"^\s*from\s+manim\s+import\b(.*)$") {
        for (idx, line) in code.lines().enumerate() {
            if let Some(caps) = re.captures(line) {
                has_manim_import = true;
                let imported = caps.get(1).map(|m| m.as_str().trim()).unwrap_or_default();
                if imported.is_empty() || (imported == "(" && !code.contains(')')) {
                    issues.push(ValidationIssue::new(
                        IssueCategory::MalformedImport,
                        Some(idx + 1),
                        "`from manim import` imports nothing",
                    ));
                }
            }
        }
    }
    for (idx, line) in code.lines().enumerate() {
        let trimmed = line.trim_start();
        if trimmed == "import manim" || trimmed.starts_with("import manim ") {
            has_manim_import = true;
        }
        if trimmed.starts_with("from manimlib") || trimmed.starts_with("import manimlib") {
            issues.push(ValidationIssue::new(
                IssueCategory::MalformedImport,
                Some(idx + 1),
                "manimlib (ManimGL) import; the renderer runs Manim Community",
            ));
        }
    }
    if !has_manim_import {
        issues.push(ValidationIssue::new(
            IssueCategory::MalformedImport,
            None,
            "Missing `from manim import *`",
        ));
    }

    if code.contains("VoiceoverScene") && !code.contains("from manim_voiceover") {
        issues.push(ValidationIssue::new(
            IssueCategory::MalformedImport,
            None,
            "VoiceoverScene used without importing it from manim_voiceover",
        ));
    }
    let uses_speech_service = ["OpenAIService(", "GTTSService(", "AzureService("]
        .iter()
        .any(|service| code.contains(service));
    if uses_speech_service && !code.contains("manim_voiceover.services") {
        issues.push(ValidationIssue::new(
            IssueCategory::MalformedImport,
            None,
            "Speech service used without importing it from manim_voiceover.services",
        ));
    }
}

fn check_voiceover_setup(code: &str, voice_style: Option<&str>, issues: &mut Vec<ValidationIssue>) {
    let Some(voice_style) = voice_style else {
        return;
    };
    if !code.contains("VoiceoverScene") {
        issues.push(ValidationIssue::new(
            IssueCategory::VoiceoverSetup,
            None,
            format!(
                "Narration requested ({} voice) but the scene is not a VoiceoverScene",
                voice_style
            ),
        ));
    } else if !code.contains("set_speech_service(") {
        issues.push(ValidationIssue::new(
            IssueCategory::VoiceoverSetup,
            None,
            "VoiceoverScene never calls set_speech_service()",
        ));
    }
}

static GROUP_ASSIGN_RE: OnceLock<Option<Regex>> = OnceLock::new();
static KWARG_RE: OnceLock<Option<Regex>> = OnceLock::new();

fn check_group_animation(code: &str, issues: &mut Vec<ValidationIssue>) {
    let group_names: HashSet<&str> = cached_regex(
        &GROUP_ASSIGN_RE,
        r"(?m)^\s*([A-Za-z_]\w*)\s*=\s*(?:VGroup|Group)\(",
    )
    .map(|re| {
        re.captures_iter(code)
            .filter_map(|caps| caps.get(1))
            .map(|m| m.as_str())
            .collect()
    })
    .unwrap_or_default();
    let kwarg_re = cached_regex(&KWARG_RE, r"^[A-Za-z_]\w*\s*=[^=]");

    for (offset, _) in code.match_indices("self.play(") {
        let open = offset + "self.play".len();
        let Some(args) = call_arguments(code, open) else {
            continue;
        };
        let line = code[..offset].matches('\n').count() + 1;
        for arg in split_top_level(args) {
            let arg = arg.trim();
            if kwarg_re.is_some_and(|re| re.is_match(arg)) {
                continue;
            }
            let target = arg.trim_start_matches('*').trim();
            let base = target
                .strip_suffix(".submobjects")
                .unwrap_or(target);
            let direct_container =
                target.starts_with("VGroup(") || target.starts_with("Group(");
            if direct_container || group_names.contains(base) {
                issues.push(ValidationIssue::new(
                    IssueCategory::GroupAnimation,
                    Some(line),
                    format!(
                        "`{}` passes a group container to self.play(); animate its members or use .animate",
                        truncate_arg(target)
                    ),
                ));
            }
        }
    }
}

/// Text between the parenthesis at `open` and its matching close, skipping
/// string literals. `None` when unbalanced.
fn call_arguments(code: &str, open: usize) -> Option<&str> {
    let bytes = code.as_bytes();
    if bytes.get(open) != Some(&b'(') {
        return None;
    }
    let mut depth = 0usize;
    let mut quote: Option<u8> = None;
    let mut escaped = false;
    for (idx, &b) in bytes.iter().enumerate().skip(open) {
        if let Some(q) = quote {
            if escaped {
                escaped = false;
            } else if b == b'\\' {
                escaped = true;
            } else if b == q {
                quote = None;
            }
            continue;
        }
        match b {
            b'"' | b'\'' => quote = Some(b),
            b'(' | b'[' | b'{' => depth += 1,
            b')' | b']' | b'}' => {
                depth = depth.checked_sub(1)?;
                if depth == 0 {
                    return code.get(open + 1..idx);
                }
            }
            _ => {}
        }
    }
    None
}

/// Split on commas at bracket depth zero.
fn split_top_level(args: &str) -> Vec<&str> {
    let mut parts = Vec::new();
    let mut depth = 0i32;
    let mut quote: Option<char> = None;
    let mut start = 0;
    for (idx, c) in args.char_indices() {
        if let Some(q) = quote {
            if c == q {
                quote = None;
            }
            continue;
        }
        match c {
            '"' | '\'' => quote = Some(c),
            '(' | '[' | '{' => depth += 1,
            ')' | ']' | '}' => depth -= 1,
            ',' if depth == 0 => {
                parts.push(&args[start..idx]);
                start = idx + 1;
            }
            _ => {}
        }
    }
    parts.push(&args[start..]);
    parts.into_iter().filter(|p| !p.trim().is_empty()).collect()
}

fn truncate_arg(arg: &str) -> String {
    crate::util::truncate(&arg.split_whitespace().collect::<Vec<_>>().join(" "), 60)
}

static UNDEFINED_CLASS_RE: OnceLock<Option<Regex>> = OnceLock::new();

fn check_undefined_names(code: &str, issues: &mut Vec<ValidationIssue>) {
    let pattern = format!(r"\b({})\s*\(", UNDEFINED_CLASSES.join("|"));
    let class_re = cached_regex(&UNDEFINED_CLASS_RE, &pattern);
    let moving_camera = code.contains("MovingCameraScene");

    for (idx, line) in code.lines().enumerate() {
        let line_no = Some(idx + 1);
        if let Some(caps) = class_re.and_then(|re| re.captures(line)) {
            let name = caps.get(1).map(|m| m.as_str()).unwrap_or_default();
            issues.push(ValidationIssue::new(
                IssueCategory::UndefinedName,
                line_no,
                format!("{} is not defined in Manim Community v0.18.1", name),
            ));
        }
        if line.contains("config[\"style\"]") || line.contains("config['style']") || line.contains("config.style") {
            issues.push(ValidationIssue::new(
                IssueCategory::UndefinedName,
                line_no,
                "config has no `style` attribute",
            ));
        }
        if line.contains("self.camera.frame") && !moving_camera {
            issues.push(ValidationIssue::new(
                IssueCategory::UndefinedName,
                line_no,
                "self.camera.frame only exists on MovingCameraScene",
            ));
        }
    }
}

fn check_indentation(code: &str, issues: &mut Vec<ValidationIssue>) {
    let mut depth = 0i32;
    let mut reported = 0;
    for (idx, line) in code.lines().enumerate() {
        let continuation = depth > 0;
        depth += bracket_delta(line);
        if depth < 0 {
            depth = 0;
        }
        if line.trim().is_empty() || continuation || reported >= MAX_INDENTATION_ISSUES {
            continue;
        }
        let leading = &line[..line.len() - line.trim_start().len()];
        if leading.contains('\t') {
            reported += 1;
            issues.push(ValidationIssue::new(
                IssueCategory::Indentation,
                Some(idx + 1),
                "Tab indentation; use four spaces",
            ));
        } else if indent_width(line) % 4 != 0 {
            reported += 1;
            issues.push(ValidationIssue::new(
                IssueCategory::Indentation,
                Some(idx + 1),
                format!(
                    "Indentation of {} spaces is not a multiple of four",
                    indent_width(line)
                ),
            ));
        }
    }
}

fn bracket_delta(line: &str) -> i32 {
    let code_part = line.split('#').next().unwrap_or(line);
    let mut delta = 0;
    let mut quote: Option<char> = None;
    for c in code_part.chars() {
        if let Some(q) = quote {
            if c == q {
                quote = None;
            }
            continue;
        }
        match c {
            '"' | '\'' => quote = Some(c),
            '(' | '[' | '{' => delta += 1,
            ')' | ']' | '}' => delta -= 1,
            _ => {}
        }
    }
    delta
}

static TEXT_LITERAL_RE: OnceLock<Option<Regex>> = OnceLock::new();
static TEX_LITERAL_RE: OnceLock<Option<Regex>> = OnceLock::new();

fn check_text_latex(code: &str, issues: &mut Vec<ValidationIssue>) {
    if let Some(re) = cached_regex(&TEXT_LITERAL_RE, r#"\bText\(\s*r?["']([^"']*)["']"#) {
        for (idx, line) in code.lines().enumerate() {
            let has_math = re.captures_iter(line).any(|caps| {
                caps.get(1)
                    .is_some_and(|m| TEXT_MATH_MARKERS.iter().any(|p| m.as_str().contains(p)))
            });
            if has_math {
                issues.push(ValidationIssue::new(
                    IssueCategory::TextLatex,
                    Some(idx + 1),
                    "Mathematical notation inside Text(); use MathTex()",
                ));
                break;
            }
        }
    }

    if let Some(re) = cached_regex(&TEX_LITERAL_RE, r#"\b(?:MathTex|Tex)\(\s*"([^"]*)""#) {
        for (idx, line) in code.lines().enumerate() {
            let needs_raw = re
                .captures_iter(line)
                .any(|caps| caps.get(1).is_some_and(|m| m.as_str().contains('\\')));
            if needs_raw {
                issues.push(ValidationIssue::new(
                    IssueCategory::TextLatex,
                    Some(idx + 1),
                    "LaTeX without a raw string; backslashes will be mangled",
                ));
                break;
            }
        }
    }

    if code.contains("MathTex(") && code.contains("set_color_by_tex") && !code.contains("{{") {
        issues.push(ValidationIssue::new(
            IssueCategory::TextLatex,
            None,
            "MathTex coloured with set_color_by_tex should isolate parts with {{ }}",
        ));
    }
}

fn check_chart_completeness(code: &str, issues: &mut Vec<ValidationIssue>) {
    if !(code.contains("Axes(") || code.contains("ax.plot")) {
        return;
    }
    let lower = code.to_lowercase();
    if !code.contains("get_x_axis_label") && !lower.contains("x_label") {
        issues.push(ValidationIssue::new(
            IssueCategory::ChartCompleteness,
            None,
            "Chart missing x-axis label",
        ));
    }
    if !code.contains("get_y_axis_label") && !lower.contains("y_label") {
        issues.push(ValidationIssue::new(
            IssueCategory::ChartCompleteness,
            None,
            "Chart missing y-axis label",
        ));
    }
    if !code.contains("Text(") || !lower.contains("title") {
        issues.push(ValidationIssue::new(
            IssueCategory::ChartCompleteness,
            None,
            "Chart may be missing a title",
        ));
    }
}
