//! Job-level data model
//!
//! What a caller asks for (`GenerationOptions`), what the controller reports to
//! the job store after each transition (`JobUpdate`), and what a finished run
//! returns (`GenerationResult`).

use crate::llm::Usage;
use crate::pipeline::validate::SeverityCounts;
use serde::{Deserialize, Serialize};
use thiserror::Error;

pub const DEFAULT_VOICE_STYLE: &str = "educational";
pub const DEFAULT_LANGUAGE: &str = "english";
pub const DEFAULT_DURATION_SECS: u32 = 8;
pub const DEFAULT_ASPECT_RATIO: &str = "16:9";
pub const DEFAULT_RESOLUTION: &str = "720p";
pub const DEFAULT_STYLE: &str = "auto";

const MIN_PROMPT_CHARS: usize = 10;
const MAX_PROMPT_CHARS: usize = 2000;
const MAX_TITLE_CHARS: usize = 100;
const MAX_DURATION_SECS: u32 = 180;

fn default_language() -> String {
    DEFAULT_LANGUAGE.to_string()
}

/// Immutable input to one generation run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GenerationOptions {
    pub prompt: String,
    pub title: String,
    #[serde(rename = "duration")]
    pub duration_secs: u32,
    pub aspect_ratio: String,
    pub resolution: String,
    pub style: String,
    pub has_voiceover: bool,
    #[serde(default)]
    pub voice_style: Option<String>,
    #[serde(default = "default_language")]
    pub language: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum OptionsError {
    #[error("prompt must be between {MIN_PROMPT_CHARS} and {MAX_PROMPT_CHARS} characters (got {0})")]
    PromptLength(usize),
    #[error("duration must be between 1 and {MAX_DURATION_SECS} seconds (got {0})")]
    DurationOutOfRange(u32),
    #[error("title must not be empty")]
    EmptyTitle,
}

impl GenerationOptions {
    /// Options for `prompt` with the request defaults applied.
    pub fn new(prompt: impl Into<String>) -> Self {
        let prompt = prompt.into();
        let title = prompt.trim().chars().take(MAX_TITLE_CHARS).collect();
        Self {
            prompt,
            title,
            duration_secs: DEFAULT_DURATION_SECS,
            aspect_ratio: DEFAULT_ASPECT_RATIO.to_string(),
            resolution: DEFAULT_RESOLUTION.to_string(),
            style: DEFAULT_STYLE.to_string(),
            has_voiceover: false,
            voice_style: Some(DEFAULT_VOICE_STYLE.to_string()),
            language: default_language(),
        }
    }

    pub fn with_title(mut self, title: impl Into<String>) -> Self {
        self.title = title.into();
        self
    }

    pub fn with_voiceover(mut self, has_voiceover: bool) -> Self {
        self.has_voiceover = has_voiceover;
        self
    }

    pub fn with_duration(mut self, secs: u32) -> Self {
        self.duration_secs = secs;
        self
    }

    /// Copy of these options with narration switched off, used when the
    /// speech service has already failed upstream.
    pub fn without_voiceover(&self) -> Self {
        Self {
            has_voiceover: false,
            ..self.clone()
        }
    }

    pub fn validate(&self) -> Result<(), OptionsError> {
        let len = self.prompt.trim().chars().count();
        if !(MIN_PROMPT_CHARS..=MAX_PROMPT_CHARS).contains(&len) {
            return Err(OptionsError::PromptLength(len));
        }
        if !(1..=MAX_DURATION_SECS).contains(&self.duration_secs) {
            return Err(OptionsError::DurationOutOfRange(self.duration_secs));
        }
        if self.title.trim().is_empty() {
            return Err(OptionsError::EmptyTitle);
        }
        Ok(())
    }

    /// Voice style, only when narration is requested.
    pub fn active_voice_style(&self) -> Option<&str> {
        if self.has_voiceover {
            self.voice_style.as_deref()
        } else {
            None
        }
    }
}

/// Job status as seen by store observers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobStatus {
    Processing,
    Completed,
    Failed,
}

impl JobStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            JobStatus::Processing => "processing",
            JobStatus::Completed => "completed",
            JobStatus::Failed => "failed",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, JobStatus::Completed | JobStatus::Failed)
    }
}

/// Partial, additive patch describing one visible state transition.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JobUpdate {
    pub status: JobStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub retry_count: Option<usize>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_error: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub manim_code: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub logs: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub stderr: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub output_url: Option<String>,
}

impl JobUpdate {
    pub fn new(status: JobStatus) -> Self {
        Self {
            status,
            retry_count: None,
            last_error: None,
            manim_code: None,
            logs: None,
            stderr: None,
            output_url: None,
        }
    }

    pub fn processing() -> Self {
        Self::new(JobStatus::Processing)
    }

    pub fn completed() -> Self {
        Self::new(JobStatus::Completed)
    }

    pub fn failed() -> Self {
        Self::new(JobStatus::Failed)
    }

    pub fn retry_count(mut self, count: usize) -> Self {
        self.retry_count = Some(count);
        self
    }

    pub fn last_error(mut self, error: Option<impl Into<String>>) -> Self {
        self.last_error = error.map(Into::into);
        self
    }

    pub fn manim_code(mut self, code: impl Into<String>) -> Self {
        self.manim_code = Some(code.into());
        self
    }

    pub fn logs(mut self, logs: Option<impl Into<String>>) -> Self {
        self.logs = logs.map(Into::into);
        self
    }

    pub fn stderr(mut self, stderr: Option<impl Into<String>>) -> Self {
        self.stderr = stderr.map(Into::into);
        self
    }

    pub fn output_url(mut self, url: impl Into<String>) -> Self {
        self.output_url = Some(url.into());
        self
    }

    /// True when the patch carries anything beyond the status itself.
    pub fn has_metadata(&self) -> bool {
        self.retry_count.is_some()
            || self.last_error.is_some()
            || self.manim_code.is_some()
            || self.logs.is_some()
            || self.stderr.is_some()
            || self.output_url.is_some()
    }
}

/// How far an attempt got before it ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AttemptStage {
    Generation,
    Render,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AttemptDiagnostics {
    pub attempt_index: usize,
    pub stage: AttemptStage,
    pub passed: bool,
    #[serde(default)]
    pub error: Option<String>,
    #[serde(default)]
    pub issue_counts: Option<SeverityCounts>,
    #[serde(default)]
    pub quick_fix_applied: bool,
    #[serde(default)]
    pub used_fallback_scene: bool,
    pub attempt_ms: u64,
}

/// Terminal output of one run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GenerationResult {
    pub success: bool,
    #[serde(default)]
    pub code: Option<String>,
    #[serde(default)]
    pub scene_name: Option<String>,
    #[serde(default)]
    pub output_url: Option<String>,
    #[serde(default)]
    pub logs: Option<String>,
    #[serde(default)]
    pub stderr: Option<String>,
    pub retry_count: usize,
    #[serde(default)]
    pub error: Option<String>,
    #[serde(default)]
    pub attempts: Vec<AttemptDiagnostics>,
    #[serde(skip)]
    pub usage: Option<Usage>,
}

impl GenerationResult {
    pub fn attempt_count(&self) -> usize {
        self.attempts.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn new_applies_request_defaults() {
        let options = GenerationOptions::new("Explain how a binary search narrows the range");
        assert_eq!(options.duration_secs, 8);
        assert_eq!(options.aspect_ratio, "16:9");
        assert_eq!(options.resolution, "720p");
        assert_eq!(options.style, "auto");
        assert_eq!(options.language, "english");
        assert_eq!(options.voice_style.as_deref(), Some("educational"));
        assert!(!options.has_voiceover);
        assert_eq!(options.title, options.prompt);
    }

    #[test]
    fn title_is_capped_at_one_hundred_chars() {
        let options = GenerationOptions::new("é".repeat(300));
        assert_eq!(options.title.chars().count(), 100);
    }

    #[test]
    fn validate_rejects_short_prompt_and_bad_duration() {
        assert_eq!(
            GenerationOptions::new("short").validate(),
            Err(OptionsError::PromptLength(5))
        );
        let options = GenerationOptions::new("A long enough prompt here").with_duration(0);
        assert_eq!(options.validate(), Err(OptionsError::DurationOutOfRange(0)));
        let options = GenerationOptions::new("A long enough prompt here").with_duration(181);
        assert!(options.validate().is_err());
        assert!(GenerationOptions::new("A long enough prompt here")
            .validate()
            .is_ok());
    }

    #[test]
    fn without_voiceover_keeps_everything_else() {
        let options = GenerationOptions::new("Narrated tour of the unit circle").with_voiceover(true);
        let silent = options.without_voiceover();
        assert!(!silent.has_voiceover);
        assert_eq!(silent.prompt, options.prompt);
        assert_eq!(silent.voice_style, options.voice_style);
        assert_eq!(silent.active_voice_style(), None);
        assert_eq!(options.active_voice_style(), Some("educational"));
    }

    #[test]
    fn options_deserialize_from_request_json() {
        let json = r#"{
            "prompt": "Animate the Pythagorean theorem",
            "title": "Pythagoras",
            "duration": 12,
            "aspectRatio": "9:16",
            "resolution": "1080p",
            "style": "dark",
            "hasVoiceover": true,
            "voiceStyle": "calm"
        }"#;
        let options: GenerationOptions = serde_json::from_str(json).unwrap();
        assert_eq!(options.duration_secs, 12);
        assert_eq!(options.aspect_ratio, "9:16");
        assert!(options.has_voiceover);
        assert_eq!(options.language, "english");
    }

    #[test]
    fn job_update_skips_absent_fields_when_serialized() {
        let update = JobUpdate::processing().retry_count(2);
        let value = serde_json::to_value(&update).unwrap();
        assert_eq!(value["status"], "processing");
        assert_eq!(value["retry_count"], 2);
        assert!(value.get("last_error").is_none());
        assert!(update.has_metadata());
        assert!(!JobUpdate::processing().has_metadata());
    }

    #[test]
    fn last_error_none_leaves_field_unset() {
        let update = JobUpdate::processing().last_error(None::<String>);
        assert!(update.last_error.is_none());
    }
}
