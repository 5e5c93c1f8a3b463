//! Parsing helpers for model replies: fenced code, loose JSON.

use crate::util::cached_regex;
use regex::Regex;
use std::sync::OnceLock;

/// Strip markdown code fences from a response
pub(crate) fn strip_markdown_fences(text: &str) -> &str {
    let trimmed = text.trim();
    let clean = if trimmed.starts_with("```json") {
        trimmed.strip_prefix("```json").unwrap_or(trimmed)
    } else if trimmed.starts_with("```") {
        trimmed.strip_prefix("```").unwrap_or(trimmed)
    } else {
        trimmed
    };
    let clean = if clean.ends_with("```") {
        clean.strip_suffix("```").unwrap_or(clean)
    } else {
        clean
    };
    clean.trim()
}

/// Extract a JSON fragment between matching delimiters
pub(crate) fn extract_json_fragment(text: &str, open: char, close: char) -> Option<&str> {
    let start = text.find(open)?;
    let end = text.rfind(close)?;
    if start <= end {
        Some(&text[start..=end])
    } else {
        None
    }
}

static TRAILING_COMMA_RE: OnceLock<Option<Regex>> = OnceLock::new();

/// Try to fix common JSON issues from LLM responses
pub(crate) fn fix_json_issues(json: &str) -> String {
    let mut fixed = json.to_string();

    // Remove trailing commas before ] or }
    if let Some(re) = cached_regex(&TRAILING_COMMA_RE, r",(\s*[\]}])") {
        fixed = re.replace_all(&fixed, "$1").into_owned();
    }

    fixed = fixed.replace('\u{201C}', "\"");
    fixed = fixed.replace('\u{201D}', "\"");
    fixed = fixed.replace('\u{2018}', "'");
    fixed = fixed.replace('\u{2019}', "'");

    fixed
        .chars()
        .filter(|c| !c.is_control() || *c == '\n' || *c == '\t')
        .collect()
}

/// Pull the most likely source block out of a reply.
///
/// Prefers the longest fenced block (any `py*` tag or untagged); without
/// fences the whole reply is returned.
pub(crate) fn extract_code_block(text: &str) -> String {
    let mut blocks = Vec::new();
    let mut rest = text;
    while let Some(open) = rest.find("```") {
        let after_open = &rest[open + 3..];
        let Some(newline) = after_open.find('\n') else {
            break;
        };
        let tag = after_open[..newline].trim().to_ascii_lowercase();
        let body = &after_open[newline + 1..];
        let Some(close) = body.find("```") else {
            // Unterminated fence: take everything after it.
            blocks.push((tag, body));
            break;
        };
        blocks.push((tag, &body[..close]));
        rest = &body[close + 3..];
    }

    blocks
        .into_iter()
        .filter(|(tag, _)| tag.is_empty() || tag.starts_with("py"))
        .map(|(_, body)| body)
        .max_by_key(|body| body.len())
        .unwrap_or(text)
        .to_string()
}
