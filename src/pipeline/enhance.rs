//! Specification stage: free-text request → structured scene plan.
//!
//! Enhancement only improves synthesis quality. Callers treat every
//! `EnhancementError` as "use the raw options prompt instead".

use crate::job::GenerationOptions;
use crate::llm::parse::{extract_json_fragment, fix_json_issues, strip_markdown_fences};
use crate::llm::prompts::{spec_enhancer_user_prompt, SPEC_ENHANCER_SYSTEM};
use crate::llm::{extract_text, CompletionProvider, CompletionRequest, ProviderError, Usage};
use serde::Deserialize;
use std::fmt::Write as _;
use std::sync::Arc;
use thiserror::Error;

const DEFAULT_VISUAL_LANGUAGE: &str = "geometric";

#[derive(Debug, Error)]
pub enum EnhancementError {
    #[error("completion provider failed: {0}")]
    Provider(#[from] ProviderError),
    #[error("completion response carried no text")]
    EmptyResponse,
    #[error("specification could not be parsed: {0}")]
    Unparseable(String),
    #[error("specification contained no scenes")]
    NoScenes,
}

/// One planned beat of the animation.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct SceneSpec {
    #[serde(default)]
    pub title: String,
    #[serde(default)]
    pub description: String,
    #[serde(default, alias = "duration_seconds", alias = "duration")]
    pub duration_secs: Option<f64>,
    #[serde(default)]
    pub visuals: Vec<String>,
    #[serde(default)]
    pub narration: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct TechnicalSpecification {
    #[serde(default = "default_language")]
    pub language: String,
    #[serde(default)]
    pub visual_style: Option<String>,
    #[serde(default)]
    pub scenes: Vec<SceneSpec>,
}

fn default_language() -> String {
    DEFAULT_VISUAL_LANGUAGE.to_string()
}

impl TechnicalSpecification {
    /// Text submitted to synthesis on the first attempt.
    pub fn to_prompt(&self, options: &GenerationOptions, scene_name: &str) -> String {
        let mut out = format!(
            "Create a Manim animation from this technical specification.\n\nRequest: \"{}\"\nScene class name: {}\nTotal duration: {} seconds\nAspect ratio: {}\nResolution: {}\nVisual language: {}\n",
            options.prompt.trim(),
            scene_name,
            options.duration_secs,
            options.aspect_ratio,
            options.resolution,
            self.language,
        );
        if let Some(style) = self.visual_style.as_deref().filter(|s| !s.trim().is_empty()) {
            let _ = writeln!(out, "Visual style: {}", style.trim());
        }
        out.push_str("\nScenes (in order):\n");
        for (idx, scene) in self.scenes.iter().enumerate() {
            let _ = write!(out, "{}. {}", idx + 1, scene.title.trim());
            if let Some(secs) = scene.duration_secs {
                let _ = write!(out, " ({:.1}s)", secs);
            }
            out.push('\n');
            if !scene.description.trim().is_empty() {
                let _ = writeln!(out, "   {}", scene.description.trim());
            }
            if !scene.visuals.is_empty() {
                let _ = writeln!(out, "   Visuals: {}", scene.visuals.join(", "));
            }
            if options.has_voiceover {
                if let Some(narration) = scene.narration.as_deref().filter(|n| !n.trim().is_empty()) {
                    let _ = writeln!(out, "   Narration: \"{}\"", narration.trim());
                }
            }
        }
        out
    }
}

/// Parse a model reply into a specification, tolerating fences, prose around
/// the object, trailing commas and a `specification` wrapper.
pub fn parse_specification(text: &str) -> Result<TechnicalSpecification, EnhancementError> {
    let clean = strip_markdown_fences(text);
    let fragment = extract_json_fragment(clean, '{', '}')
        .ok_or_else(|| EnhancementError::Unparseable("no JSON object in reply".to_string()))?;

    let value: serde_json::Value = match serde_json::from_str(fragment) {
        Ok(value) => value,
        Err(initial) => serde_json::from_str(&fix_json_issues(fragment))
            .map_err(|_| EnhancementError::Unparseable(initial.to_string()))?,
    };
    let inner = value.get("specification").cloned().unwrap_or(value);
    let spec: TechnicalSpecification = serde_json::from_value(inner)
        .map_err(|e| EnhancementError::Unparseable(e.to_string()))?;

    if spec.scenes.is_empty() {
        return Err(EnhancementError::NoScenes);
    }
    Ok(spec)
}

pub struct SpecEnhancer {
    provider: Arc<dyn CompletionProvider>,
}

impl SpecEnhancer {
    pub fn new(provider: Arc<dyn CompletionProvider>) -> Self {
        Self { provider }
    }

    pub async fn enhance(
        &self,
        options: &GenerationOptions,
    ) -> Result<(TechnicalSpecification, Option<Usage>), EnhancementError> {
        let request = CompletionRequest::new(SPEC_ENHANCER_SYSTEM, spec_enhancer_user_prompt(options));
        let response = self.provider.complete(&request).await?;
        let text = extract_text(&response.body).ok_or(EnhancementError::EmptyResponse)?;
        let spec = parse_specification(&text.text)?;
        tracing::debug!(
            scenes = spec.scenes.len(),
            language = %spec.language,
            model = %response.model,
            "specification ready"
        );
        Ok((spec, response.usage))
    }
}
