//! Staged candidate generation
//!
//! specification (or fix prompt) → synthesis → cleanup → static validation →
//! conditional repair. One call yields one candidate; persistence is the
//! controller's job.

use super::enhance::SpecEnhancer;
use super::fallback::prompt_fallback_scene;
use super::quick_fix::QuickFixer;
use super::scene::{clean_candidate, scene_name_from_title};
use super::validate::{critical_issues, validate, SeverityCounts};
use crate::job::GenerationOptions;
use crate::llm::extract::describe_keys;
use crate::llm::prompts::{build_user_prompt, fix_on_fail_prompt, system_prompt_for};
use crate::llm::{
    extract_text, merge_usage, CompletionProvider, CompletionRequest, ProviderError, Usage,
};
use std::sync::Arc;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum GenerationError {
    /// No usable text in the synthesis response.
    #[error("completion response contained no code (response keys: {0})")]
    Extraction(String),
    #[error("code synthesis failed: {0}")]
    Provider(#[from] ProviderError),
}

/// What a retry pass carries over from the failed attempt.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RetryInput {
    pub previous_code: String,
    pub previous_error: String,
}

/// One generated candidate, ready to render.
#[derive(Debug, Clone)]
pub struct Candidate {
    pub code: String,
    pub scene_name: String,
    /// Counts from the pre-repair validation pass.
    pub issue_counts: SeverityCounts,
    pub fixed: bool,
    pub used_fallback_scene: bool,
    pub used_specification: bool,
    pub usage: Option<Usage>,
}

pub struct CodeGenerator {
    provider: Arc<dyn CompletionProvider>,
    enhancer: SpecEnhancer,
    fixer: QuickFixer,
}

impl CodeGenerator {
    pub fn new(provider: Arc<dyn CompletionProvider>) -> Self {
        Self {
            enhancer: SpecEnhancer::new(provider.clone()),
            fixer: QuickFixer::new(provider.clone()),
            provider,
        }
    }

    /// Produce a candidate for `options`. `retry` switches the first stage
    /// from specification to the fix prompt.
    pub async fn generate(
        &self,
        options: &GenerationOptions,
        retry: Option<&RetryInput>,
    ) -> Result<Candidate, GenerationError> {
        let scene_name = scene_name_from_title(&options.title);
        let mut usage = None;

        // Stage A: specification, or the fix prompt on retries
        let mut used_specification = false;
        let user_prompt = match retry {
            Some(retry) => {
                fix_on_fail_prompt(&retry.previous_code, &retry.previous_error, &scene_name)
            }
            None => match self.enhancer.enhance(options).await {
                Ok((spec, spec_usage)) => {
                    usage = merge_usage(usage, spec_usage);
                    used_specification = true;
                    spec.to_prompt(options, &scene_name)
                }
                Err(err) => {
                    tracing::warn!(error = %err, "specification failed, using direct prompt");
                    build_user_prompt(options, &scene_name)
                }
            },
        };

        // Stage B: synthesis and structural cleanup
        let request = CompletionRequest::new(system_prompt_for(options), user_prompt);
        let response = self.provider.complete(&request).await?;
        usage = merge_usage(usage, response.usage.clone());
        let extracted = extract_text(&response.body)
            .ok_or_else(|| GenerationError::Extraction(describe_keys(&response.body)))?;
        tracing::debug!(shape = extracted.shape, model = %response.model, "synthesis reply");

        let cleaned = clean_candidate(&extracted.text, &scene_name);
        let used_fallback_scene = !cleaned.structurally_valid;
        let mut code = if used_fallback_scene {
            tracing::warn!(scene = %scene_name, "reply had no usable scene, substituting fallback scene");
            prompt_fallback_scene(options, &scene_name)
        } else {
            cleaned.code
        };

        // Stage C: static validation
        let voice_style = options.active_voice_style();
        let issues = validate(&code, voice_style);
        let issue_counts = SeverityCounts::from_issues(&issues);
        tracing::info!(
            critical = issue_counts.critical,
            high = issue_counts.high,
            medium = issue_counts.medium,
            low = issue_counts.low,
            "candidate validated"
        );

        // Stage D: repair only when something critical was found
        let mut fixed = false;
        let critical = critical_issues(&issues);
        if !critical.is_empty() {
            for issue in &critical {
                tracing::debug!(%issue, "critical issue");
            }
            match self.fixer.fix(&code, &scene_name, &issues, true).await {
                Ok(applied) => {
                    code = applied.code;
                    fixed = true;
                    usage = merge_usage(usage, applied.usage);
                    // Logged only; the fixed code proceeds regardless.
                    let after = SeverityCounts::from_issues(&validate(&code, voice_style));
                    tracing::info!(
                        critical_before = issue_counts.critical,
                        critical_after = after.critical,
                        "quick fix applied"
                    );
                }
                Err(err) => {
                    tracing::warn!(error = %err, "quick fix failed, keeping original candidate");
                }
            }
        }

        Ok(Candidate {
            code,
            scene_name,
            issue_counts,
            fixed,
            used_fallback_scene,
            used_specification,
            usage,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{ScriptedProvider, StageReplies, GOOD_SCENE, GROUP_PLAY_SCENE};

    fn options() -> GenerationOptions {
        GenerationOptions::new("Animate a bouncing dot").with_title("Bouncing dot")
    }

    #[tokio::test]
    async fn clean_candidate_skips_quick_fix() {
        let provider = Arc::new(ScriptedProvider::staged(StageReplies::default()));
        let generator = CodeGenerator::new(provider.clone());
        let candidate = generator.generate(&options(), None).await.unwrap();

        assert_eq!(candidate.scene_name, "BouncingDotScene");
        assert!(candidate.code.contains("class BouncingDotScene(Scene):"));
        assert!(candidate.used_specification);
        assert!(!candidate.fixed);
        assert_eq!(provider.fix_calls(), 0);
        assert_eq!(provider.calls(), 2);
    }

    #[tokio::test]
    async fn critical_issue_triggers_exactly_one_aggressive_fix() {
        let provider = Arc::new(ScriptedProvider::staged(StageReplies {
            code: vec![GROUP_PLAY_SCENE.to_string()],
            ..StageReplies::default()
        }));
        let generator = CodeGenerator::new(provider.clone());
        let candidate = generator.generate(&options(), None).await.unwrap();

        assert_eq!(candidate.issue_counts.critical, 1);
        assert!(candidate.fixed);
        assert!(!candidate.code.contains("self.play(dots)"));
        assert_eq!(provider.fix_calls(), 1);
    }

    #[tokio::test]
    async fn failed_fix_keeps_pre_fix_candidate() {
        let provider = Arc::new(ScriptedProvider::staged(StageReplies {
            code: vec![GROUP_PLAY_SCENE.to_string()],
            fix: None,
            ..StageReplies::default()
        }));
        let generator = CodeGenerator::new(provider.clone());
        let candidate = generator.generate(&options(), None).await.unwrap();

        assert!(!candidate.fixed);
        assert!(candidate.code.contains("self.play(dots)"));
        assert_eq!(provider.fix_calls(), 1);
    }

    #[tokio::test]
    async fn enhancer_failure_degrades_to_direct_prompt() {
        let provider = Arc::new(ScriptedProvider::staged(StageReplies {
            spec: None,
            ..StageReplies::default()
        }));
        let generator = CodeGenerator::new(provider.clone());
        let candidate = generator.generate(&options(), None).await.unwrap();

        assert!(!candidate.used_specification);
        assert!(!candidate.code.is_empty());
        let synth = provider.synthesis_requests();
        assert!(synth[0].user.contains("Create a Manim animation for this request"));
    }

    #[tokio::test]
    async fn retry_skips_specification_and_sends_fix_prompt() {
        let provider = Arc::new(ScriptedProvider::staged(StageReplies::default()));
        let generator = CodeGenerator::new(provider.clone());
        let retry = RetryInput {
            previous_code: "class Old(Scene): pass".to_string(),
            previous_error: "Attempt 1 render error: NameError".to_string(),
        };
        generator.generate(&options(), Some(&retry)).await.unwrap();

        assert_eq!(provider.spec_calls(), 0);
        let synth = provider.synthesis_requests();
        assert_eq!(synth.len(), 1);
        assert!(synth[0].user.contains("Attempt 1 render error: NameError"));
        assert!(synth[0].user.contains("class Old(Scene): pass"));
    }

    #[tokio::test]
    async fn unusable_reply_is_replaced_by_fallback_scene() {
        let provider = Arc::new(ScriptedProvider::staged(StageReplies {
            code: vec!["I would draw a circle here.".to_string()],
            ..StageReplies::default()
        }));
        let generator = CodeGenerator::new(provider);
        let candidate = generator.generate(&options(), None).await.unwrap();

        assert!(candidate.used_fallback_scene);
        assert!(candidate.code.contains("class BouncingDotScene(Scene):"));
    }

    #[tokio::test]
    async fn empty_reply_is_an_extraction_error() {
        let provider = Arc::new(ScriptedProvider::staged(StageReplies {
            code: vec!["   ".to_string()],
            ..StageReplies::default()
        }));
        let generator = CodeGenerator::new(provider);
        assert!(matches!(
            generator.generate(&options(), None).await,
            Err(GenerationError::Extraction(_))
        ));
    }

    #[tokio::test]
    async fn voiceover_selects_voiceover_system_prompt() {
        let provider = Arc::new(ScriptedProvider::staged(StageReplies::default()));
        let generator = CodeGenerator::new(provider.clone());
        generator
            .generate(&options().with_voiceover(true), None)
            .await
            .unwrap();
        assert!(provider.synthesis_requests()[0].system.contains("VoiceoverScene"));
    }

    #[test]
    fn good_scene_fixture_is_clean() {
        assert_eq!(SeverityCounts::from_issues(&validate(GOOD_SCENE, None)).total(), 0);
    }
}
