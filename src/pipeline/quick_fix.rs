use super::scene::clean_candidate;
use super::validate::{Severity, ValidationIssue};
use crate::llm::prompts::QUICK_FIX_SYSTEM;
use crate::llm::{extract_text, CompletionProvider, CompletionRequest, ProviderError, Usage};
use std::fmt::Write as _;
use std::sync::Arc;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum FixError {
    #[error("completion provider failed: {0}")]
    Provider(#[from] ProviderError),
    #[error("fix reply was not usable source: {0}")]
    Unparseable(String),
}

/// Patched source plus the usage of the call that produced it.
#[derive(Debug, Clone)]
pub struct AppliedFix {
    pub code: String,
    pub usage: Option<Usage>,
}

/// Minimally-scoped repair of a candidate against a supplied issue list.
pub struct QuickFixer {
    provider: Arc<dyn CompletionProvider>,
}

impl QuickFixer {
    pub fn new(provider: Arc<dyn CompletionProvider>) -> Self {
        Self { provider }
    }

    /// Ask for a patch that resolves `issues` and nothing else. The reply's
    /// scene class is renamed to `scene_name`.
    ///
    /// `aggressive` lets the model rewrite whole offending statements instead
    /// of making the smallest textual edit.
    pub async fn fix(
        &self,
        code: &str,
        scene_name: &str,
        issues: &[ValidationIssue],
        aggressive: bool,
    ) -> Result<AppliedFix, FixError> {
        let user = fix_user_prompt(code, issues, aggressive);
        let request = CompletionRequest::new(QUICK_FIX_SYSTEM, user);
        let response = self.provider.complete(&request).await?;

        let text = extract_text(&response.body)
            .ok_or_else(|| FixError::Unparseable("empty reply".to_string()))?;
        let cleaned = clean_candidate(&text.text, scene_name);
        if !cleaned.structurally_valid {
            return Err(FixError::Unparseable(
                "reply has no Scene subclass with construct()".to_string(),
            ));
        }
        Ok(AppliedFix {
            code: cleaned.code,
            usage: response.usage,
        })
    }
}

fn fix_user_prompt(code: &str, issues: &[ValidationIssue], aggressive: bool) -> String {
    let mut listed = String::new();
    for issue in issues {
        let _ = writeln!(listed, "- {}", issue);
    }
    let mode = if aggressive {
        "Every CRITICAL issue must be gone in your output, even if that means rewriting the offending statements entirely. Leave everything else untouched."
    } else {
        "Make the smallest edit that resolves each issue."
    };
    let critical = issues
        .iter()
        .filter(|issue| issue.severity == Severity::Critical)
        .count();
    format!(
        "DETECTED ISSUES ({} total, {} critical):\n{}\n{}\n\nCODE:\n```python\n{}\n```",
        issues.len(),
        critical,
        listed.trim_end(),
        mode,
        code.trim_end(),
    )
}
