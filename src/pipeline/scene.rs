//! Scene identifiers and structural cleanup of synthesized source.

use crate::llm::parse::extract_code_block;
use crate::util::cached_regex;
use regex::Regex;
use std::sync::OnceLock;

const DEFAULT_SCENE_NAME: &str = "ExplainerScene";
const MAX_NAME_WORDS: usize = 5;
const BASE_SCENE_CLASSES: &[&str] = &[
    "Scene",
    "VoiceoverScene",
    "MovingCameraScene",
    "ThreeDScene",
    "ZoomedScene",
];

static SCENE_CLASS_RE: OnceLock<Option<Regex>> = OnceLock::new();
static CONSTRUCT_RE: OnceLock<Option<Regex>> = OnceLock::new();

fn scene_class_re() -> Option<&'static Regex> {
    cached_regex(
        &SCENE_CLASS_RE,
        r"(?m)^class\s+([A-Za-z_]\w*)\s*\(([^)]*Scene[^)]*)\)\s*:",
    )
}

fn construct_re() -> Option<&'static Regex> {
    cached_regex(&CONSTRUCT_RE, r"(?m)^\s+def\s+construct\s*\(\s*self\b")
}

/// Derive the scene class name from a job title.
///
/// Deterministic for a given title, so every retry targets the same entry point.
pub fn scene_name_from_title(title: &str) -> String {
    let mut name: String = title
        .split(|c: char| !c.is_ascii_alphanumeric())
        .filter(|word| !word.is_empty())
        .take(MAX_NAME_WORDS)
        .map(|word| {
            let mut chars = word.chars();
            match chars.next() {
                Some(first) => first.to_ascii_uppercase().to_string() + chars.as_str(),
                None => String::new(),
            }
        })
        .collect();

    if name.is_empty() {
        return DEFAULT_SCENE_NAME.to_string();
    }
    if name.starts_with(|c: char| c.is_ascii_digit()) {
        name.insert_str(0, "Scene");
    }
    if !name.ends_with("Scene") {
        name.push_str("Scene");
    }
    name
}

/// Name of the first `Scene` subclass declared in `code`, if any.
pub fn find_scene_class(code: &str) -> Option<String> {
    scene_class_re()?
        .captures(code)
        .and_then(|caps| caps.get(1))
        .map(|m| m.as_str().to_string())
}

pub fn has_construct(code: &str) -> bool {
    construct_re().is_some_and(|re| re.is_match(code))
}

/// Result of the structural cleanup pass.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CleanedCandidate {
    pub code: String,
    pub structurally_valid: bool,
    pub renamed_from: Option<String>,
}

/// Strip non-code wrapper content, normalize whitespace and align the scene
/// class name with `scene_name`.
pub fn clean_candidate(raw: &str, scene_name: &str) -> CleanedCandidate {
    let block = extract_code_block(raw);
    let normalized = normalize_source(&block);
    let code = drop_leading_prose(&normalized);

    let (code, renamed_from) = match find_scene_class(&code) {
        Some(existing) if existing != scene_name && !BASE_SCENE_CLASSES.contains(&existing.as_str()) => {
            (rename_identifier(&code, &existing, scene_name), Some(existing))
        }
        _ => (code, None),
    };

    let structurally_valid = find_scene_class(&code).is_some() && has_construct(&code);
    CleanedCandidate {
        code,
        structurally_valid,
        renamed_from,
    }
}

fn normalize_source(code: &str) -> String {
    let mut out = code
        .replace("\r\n", "\n")
        .lines()
        .map(|line| {
            let indent_len = line.len() - line.trim_start_matches([' ', '\t']).len();
            let (indent, rest) = line.split_at(indent_len);
            let indent = indent.replace('\t', "    ");
            format!("{}{}", indent, rest).trim_end().to_string()
        })
        .collect::<Vec<_>>()
        .join("\n");
    let trimmed_len = out.trim_end().len();
    out.truncate(trimmed_len);
    out.push('\n');
    out
}

fn drop_leading_prose(code: &str) -> String {
    let starts_code = |line: &str| {
        line.starts_with("from ")
            || line.starts_with("import ")
            || line.starts_with("class ")
            || line.starts_with('#')
            || line.starts_with("config")
    };
    let lines: Vec<&str> = code.lines().collect();
    match lines.iter().position(|line| starts_code(line)) {
        Some(0) | None => code.to_string(),
        Some(idx) => {
            let mut out = lines[idx..].join("\n");
            out.push('\n');
            out
        }
    }
}

/// Replace the identifier `from` with `to` in code only. String literals and
/// comments are copied through, so on-screen text naming the old class
/// survives the rename.
fn rename_identifier(code: &str, from: &str, to: &str) -> String {
    let mut out = String::with_capacity(code.len());
    let mut rest = code;
    while let Some(c) = rest.chars().next() {
        let len = if c == '#' {
            rest.find('\n').unwrap_or(rest.len())
        } else if c == '"' || c == '\'' {
            string_literal_len(rest, c)
        } else if c.is_alphabetic() || c == '_' {
            let end = rest
                .find(|ch: char| !(ch.is_alphanumeric() || ch == '_'))
                .unwrap_or(rest.len());
            let word = &rest[..end];
            out.push_str(if word == from { to } else { word });
            rest = &rest[end..];
            continue;
        } else {
            c.len_utf8()
        };
        out.push_str(&rest[..len]);
        rest = &rest[len..];
    }
    out
}

/// Byte length of the string literal opening `s`. Unterminated literals run
/// to the end of the line (or of the file for triple quotes).
fn string_literal_len(s: &str, quote: char) -> usize {
    let triple: String = std::iter::repeat(quote).take(3).collect();
    if let Some(body) = s.strip_prefix(triple.as_str()) {
        return body.find(triple.as_str()).map_or(s.len(), |i| i + 6);
    }
    let mut escaped = false;
    for (i, ch) in s.char_indices().skip(1) {
        if escaped {
            escaped = false;
            continue;
        }
        match ch {
            '\\' => escaped = true,
            '\n' => return i,
            c if c == quote => return i + c.len_utf8(),
            _ => {}
        }
    }
    s.len()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn scene_name_is_pascal_case_and_stable() {
        let a = scene_name_from_title("How does a binary search work?");
        let b = scene_name_from_title("How does a binary search work?");
        assert_eq!(a, "HowDoesABinarySearchScene");
        assert_eq!(a, b);
    }

    #[test]
    fn scene_name_handles_digits_empty_and_suffix() {
        assert_eq!(scene_name_from_title("3 laws of motion"), "Scene3LawsOfMotionScene");
        assert_eq!(scene_name_from_title("!!!"), "ExplainerScene");
        assert_eq!(scene_name_from_title("Intro scene"), "IntroScene");
        assert_eq!(scene_name_from_title("Ünïcode ok"), "NCodeOkScene");
    }

    #[test]
    fn cleanup_strips_fences_prose_and_renames_class() {
        let raw = "Here is your animation:\n```python\nfrom manim import *\r\n\nclass MyAnim(Scene):\n\tdef construct(self):\n\t\tself.play(Create(Circle()))   \n```\nEnjoy!";
        let cleaned = clean_candidate(raw, "CircleScene");
        assert!(cleaned.structurally_valid);
        assert_eq!(cleaned.renamed_from.as_deref(), Some("MyAnim"));
        assert!(cleaned.code.starts_with("from manim import *\n"));
        assert!(cleaned.code.contains("class CircleScene(Scene):"));
        assert!(cleaned.code.contains("        self.play(Create(Circle()))\n"));
        assert!(!cleaned.code.contains('\t'));
        assert!(!cleaned.code.contains("Enjoy"));
    }

    #[test]
    fn cleanup_drops_prose_without_fences() {
        let raw = "Sure, here it is.\nfrom manim import *\nclass A(Scene):\n    def construct(self):\n        pass";
        let cleaned = clean_candidate(raw, "A");
        assert!(cleaned.code.starts_with("from manim import *"));
        assert!(cleaned.renamed_from.is_none());
        assert!(cleaned.structurally_valid);
    }

    #[test]
    fn cleanup_flags_missing_construct() {
        let cleaned = clean_candidate("from manim import *\nclass A(Scene):\n    pass\n", "A");
        assert!(!cleaned.structurally_valid);
        let cleaned = clean_candidate("print('hello')", "A");
        assert!(!cleaned.structurally_valid);
    }

    #[test]
    fn rename_leaves_strings_and_comments_alone() {
        let raw = "from manim import *\n\n# Intro beat\nclass Intro(Scene):\n    def construct(self):\n        t = Text(\"Intro\")\n        s = Text('Intro to sorting')\n        super(Intro, self).construct()\n        self.play(Write(t))\n";
        let cleaned = clean_candidate(raw, "DotsInARowScene");
        assert_eq!(cleaned.renamed_from.as_deref(), Some("Intro"));
        assert!(cleaned.code.contains("class DotsInARowScene(Scene):"));
        assert!(cleaned.code.contains("t = Text(\"Intro\")"));
        assert!(cleaned.code.contains("Text('Intro to sorting')"));
        assert!(cleaned.code.contains("# Intro beat"));
        assert!(cleaned.code.contains("super(DotsInARowScene, self)"));
        assert!(!cleaned.code.contains("IntroScene"));
    }

    #[test]
    fn rename_skips_triple_quoted_and_escaped_strings() {
        let code = "doc = \"\"\"Intro\nIntro\"\"\"\nx = \"say \\\"Intro\\\"\"\nIntro()\nIntroduction = 1\n";
        let renamed = rename_identifier(code, "Intro", "Main");
        assert_eq!(
            renamed,
            "doc = \"\"\"Intro\nIntro\"\"\"\nx = \"say \\\"Intro\\\"\"\nMain()\nIntroduction = 1\n"
        );
    }

    #[test]
    fn cleanup_accepts_python3_fence_tag() {
        let raw = "Here:\n```python3\nfrom manim import *\nclass A(Scene):\n    def construct(self):\n        pass\n```\n";
        let cleaned = clean_candidate(raw, "A");
        assert!(cleaned.structurally_valid);
        assert!(!cleaned.code.contains("```"));
        assert!(cleaned.code.starts_with("from manim import *"));
    }

    #[test]
    fn cleanup_renames_voiceover_scene_subclass() {
        let code = "from manim import *\nclass Demo(VoiceoverScene):\n    def construct(self):\n        pass\n";
        let cleaned = clean_candidate(code, "DemoScene");
        assert!(cleaned.code.contains("class DemoScene(VoiceoverScene):"));
    }
}
