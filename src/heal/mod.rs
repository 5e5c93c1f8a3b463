//! Self-healing retry controller
//!
//! Generate → render → on failure enrich the error and try again, up to a
//! retry budget. The loop state is an explicit `AttemptContext` advanced by
//! the pure `advance` function; the async driver only performs I/O and
//! persists each transition.

pub mod enrich;


use crate::job::{AttemptDiagnostics, AttemptStage, GenerationOptions, GenerationResult, JobUpdate};
use crate::llm::{merge_usage, CompletionProvider, Usage};
use crate::pipeline::generate::{Candidate, CodeGenerator, RetryInput};
use crate::render::{RenderExecutor, RenderOutcome, RenderRequest};
use crate::store::{persist, JobStore};
use enrich::{enrich_error, friendly_error, FriendlyError};
use serde::Serialize;
use std::sync::Arc;
use std::time::Instant;

pub const DEFAULT_MAX_RETRIES: usize = 5;
pub const TTS_FALLBACK_MAX_RETRIES: usize = 3;
pub const TTS_FAILURE_MESSAGE: &str = "TTS service failed, rendering without voiceover";
const UNKNOWN_RENDER_ERROR: &str = "Unknown render error";

/// Retry state carried from one attempt to the next.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AttemptContext {
    /// 1-based index of the attempt about to run (or that just ran).
    pub attempt: usize,
    pub max_retries: usize,
    /// Attempts already spent on this job by an earlier loop.
    pub retry_base: usize,
    pub last_code: Option<String>,
    pub last_scene_name: Option<String>,
    /// Enriched render error, or the raw message of a generation failure.
    pub last_error: Option<String>,
    pub last_logs: Option<String>,
    pub last_stderr: Option<String>,
}

impl AttemptContext {
    /// A budget of zero still runs one attempt.
    pub fn new(max_retries: usize) -> Self {
        Self {
            attempt: 1,
            max_retries: max_retries.max(1),
            retry_base: 0,
            last_code: None,
            last_scene_name: None,
            last_error: None,
            last_logs: None,
            last_stderr: None,
        }
    }

    /// Failed attempts before this one; what observers see as `retry_count`.
    pub fn retry_count(&self) -> usize {
        self.retry_base + self.attempt - 1
    }

    pub fn is_retry(&self) -> bool {
        self.attempt > 1
    }

    pub fn is_last(&self) -> bool {
        self.attempt >= self.max_retries
    }

    /// Fix-prompt input for retry passes. A retry after a generation failure
    /// on the first attempt has no code to patch and sends an empty file.
    pub fn retry_input(&self) -> Option<RetryInput> {
        if !self.is_retry() {
            return None;
        }
        Some(RetryInput {
            previous_code: self.last_code.clone().unwrap_or_default(),
            previous_error: self
                .last_error
                .clone()
                .unwrap_or_else(|| UNKNOWN_RENDER_ERROR.to_string()),
        })
    }

    fn next(self) -> Self {
        Self {
            attempt: self.attempt + 1,
            ..self
        }
    }
}

/// How one attempt ended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AttemptOutcome {
    GenerationFailed {
        error: String,
    },
    RenderFailed {
        code: String,
        scene_name: String,
        error: String,
        logs: Option<String>,
        stderr: Option<String>,
    },
    Rendered {
        code: String,
        scene_name: String,
        logs: Option<String>,
        stderr: Option<String>,
    },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Transition {
    /// Run another attempt with this context.
    Continue(AttemptContext),
    Succeeded(AttemptContext),
    /// Budget spent; the context holds the last failure.
    Exhausted(AttemptContext),
}

/// Fold one attempt's outcome into the context.
pub fn advance(mut ctx: AttemptContext, outcome: AttemptOutcome) -> Transition {
    match outcome {
        AttemptOutcome::Rendered {
            code,
            scene_name,
            logs,
            stderr,
        } => {
            ctx.last_code = Some(code);
            ctx.last_scene_name = Some(scene_name);
            ctx.last_logs = logs;
            ctx.last_stderr = stderr;
            ctx.last_error = None;
            return Transition::Succeeded(ctx);
        }
        AttemptOutcome::GenerationFailed { error } => {
            ctx.last_error = Some(error);
            ctx.last_logs = None;
            ctx.last_stderr = None;
        }
        AttemptOutcome::RenderFailed {
            code,
            scene_name,
            error,
            logs,
            stderr,
        } => {
            ctx.last_error = Some(enrich_error(&error, stderr.as_deref(), ctx.attempt));
            ctx.last_code = Some(code);
            ctx.last_scene_name = Some(scene_name);
            ctx.last_logs = logs;
            ctx.last_stderr = stderr;
        }
    }

    if ctx.is_last() {
        Transition::Exhausted(ctx)
    } else {
        Transition::Continue(ctx.next())
    }
}

/// Outcome of `run_job`, including whether the silent re-run was needed.
#[derive(Debug, Clone, Serialize)]
pub struct JobReport {
    pub job_id: String,
    pub result: GenerationResult,
    pub tts_fallback_used: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub friendly_error: Option<FriendlyError>,
}

/// The controller. Collaborators are injected so each job can share one
/// provider, renderer and store.
pub struct SelfHealingPipeline {
    generator: CodeGenerator,
    renderer: Arc<dyn RenderExecutor>,
    store: Arc<dyn JobStore>,
}

impl SelfHealingPipeline {
    pub fn new(
        provider: Arc<dyn CompletionProvider>,
        renderer: Arc<dyn RenderExecutor>,
        store: Arc<dyn JobStore>,
    ) -> Self {
        Self {
            generator: CodeGenerator::new(provider),
            renderer,
            store,
        }
    }

    /// Run the generate/render loop for one job. Never fails: exhaustion is
    /// reported as `success: false`.
    pub async fn generate_with_retry(
        &self,
        options: &GenerationOptions,
        job_id: &str,
        upload_target: &str,
        max_retries: usize,
    ) -> GenerationResult {
        self.run_attempts(options, job_id, upload_target, max_retries, LoopPlan::standalone())
            .await
    }

    async fn run_attempts(
        &self,
        options: &GenerationOptions,
        job_id: &str,
        upload_target: &str,
        max_retries: usize,
        plan: LoopPlan,
    ) -> GenerationResult {
        let mut ctx = AttemptContext {
            retry_base: plan.retry_base,
            ..AttemptContext::new(max_retries)
        };
        let mut attempts = Vec::new();
        let mut usage: Option<Usage> = None;

        loop {
            tracing::info!(
                job_id,
                attempt = ctx.attempt,
                max_retries = ctx.max_retries,
                "starting attempt"
            );
            let error_for_observers = if ctx.is_retry() {
                ctx.last_error.clone()
            } else {
                None
            };
            persist(
                self.store.as_ref(),
                job_id,
                JobUpdate::processing()
                    .retry_count(ctx.retry_count())
                    .last_error(error_for_observers),
            )
            .await;

            let started = Instant::now();
            let retry = ctx.retry_input();
            let outcome = match self.generator.generate(options, retry.as_ref()).await {
                Err(err) => {
                    let error = err.to_string();
                    tracing::warn!(job_id, attempt = ctx.attempt, error = %error, "generation failed");
                    attempts.push(AttemptDiagnostics {
                        attempt_index: ctx.attempt,
                        stage: AttemptStage::Generation,
                        passed: false,
                        error: Some(error.clone()),
                        issue_counts: None,
                        quick_fix_applied: false,
                        used_fallback_scene: false,
                        attempt_ms: elapsed_ms(started),
                    });
                    AttemptOutcome::GenerationFailed { error }
                }
                Ok(candidate) => {
                    usage = merge_usage(usage, candidate.usage.clone());
                    persist(
                        self.store.as_ref(),
                        job_id,
                        JobUpdate::processing().manim_code(candidate.code.clone()),
                    )
                    .await;

                    let rendered = self
                        .render_candidate(&candidate, options, job_id, upload_target)
                        .await;
                    if !rendered.success {
                        let categories = enrich::classify(
                            rendered.error.as_deref().unwrap_or_default(),
                            rendered.stderr.as_deref(),
                        );
                        tracing::warn!(
                            job_id,
                            attempt = ctx.attempt,
                            ?categories,
                            "render failed"
                        );
                    }
                    attempts.push(AttemptDiagnostics {
                        attempt_index: ctx.attempt,
                        stage: AttemptStage::Render,
                        passed: rendered.success,
                        error: rendered.error.clone(),
                        issue_counts: Some(candidate.issue_counts),
                        quick_fix_applied: candidate.fixed,
                        used_fallback_scene: candidate.used_fallback_scene,
                        attempt_ms: elapsed_ms(started),
                    });
                    into_outcome(candidate, rendered)
                }
            };

            match advance(ctx, outcome) {
                Transition::Continue(next) => ctx = next,
                Transition::Succeeded(done) => {
                    tracing::info!(job_id, attempt = done.attempt, "render succeeded");
                    persist(
                        self.store.as_ref(),
                        job_id,
                        JobUpdate::completed()
                            .output_url(upload_target)
                            .logs(done.last_logs.clone())
                            .stderr(done.last_stderr.clone())
                            .retry_count(done.retry_count()),
                    )
                    .await;
                    return build_result(done, true, Some(upload_target), attempts, usage);
                }
                Transition::Exhausted(done) => {
                    tracing::warn!(
                        job_id,
                        attempts = done.attempt,
                        error = done.last_error.as_deref().unwrap_or_default(),
                        "retry budget exhausted"
                    );
                    let result = build_result(done, false, None, attempts, usage);
                    if plan.persist_failure {
                        persist(self.store.as_ref(), job_id, failure_update(&result)).await;
                    }
                    return result;
                }
            }
        }
    }

    /// Degraded entry point for when narration synthesis already failed:
    /// rerun silently on a smaller budget.
    pub async fn handle_tts_failure(
        &self,
        options: &GenerationOptions,
        job_id: &str,
        upload_target: &str,
    ) -> GenerationResult {
        self.silent_rerun(options, job_id, upload_target, 0).await
    }

    async fn silent_rerun(
        &self,
        options: &GenerationOptions,
        job_id: &str,
        upload_target: &str,
        retry_base: usize,
    ) -> GenerationResult {
        tracing::warn!(job_id, retry_base, "speech service failed, retrying without voiceover");
        persist(
            self.store.as_ref(),
            job_id,
            JobUpdate::processing()
                .retry_count(retry_base)
                .last_error(Some(TTS_FAILURE_MESSAGE)),
        )
        .await;
        self.run_attempts(
            &options.without_voiceover(),
            job_id,
            upload_target,
            TTS_FALLBACK_MAX_RETRIES,
            LoopPlan {
                retry_base,
                persist_failure: true,
            },
        )
        .await
    }

    /// Full job: the main loop, then the silent re-run when a narrated job
    /// failed for a reason other than the voiceover itself. A narrated job's
    /// failure is only written once no re-run follows, so observers never
    /// see a terminal status revert to `processing`.
    pub async fn run_job(
        &self,
        options: &GenerationOptions,
        job_id: &str,
        upload_target: &str,
        max_retries: usize,
    ) -> JobReport {
        let plan = LoopPlan {
            retry_base: 0,
            persist_failure: !options.has_voiceover,
        };
        let result = self
            .run_attempts(options, job_id, upload_target, max_retries, plan)
            .await;
        if result.success || !options.has_voiceover {
            return report(job_id, result, false);
        }

        let mentions_voiceover = result
            .error
            .as_deref()
            .is_some_and(|e| e.to_lowercase().contains("voiceover"));
        if mentions_voiceover {
            persist(self.store.as_ref(), job_id, failure_update(&result)).await;
            return report(job_id, result, false);
        }

        // The re-run continues the job's retry count.
        let spent = result.retry_count + 1;
        let fallback = self.silent_rerun(options, job_id, upload_target, spent).await;
        report(job_id, fallback, true)
    }

    async fn render_candidate(
        &self,
        candidate: &Candidate,
        options: &GenerationOptions,
        job_id: &str,
        upload_target: &str,
    ) -> RenderOutcome {
        let request = RenderRequest {
            code: candidate.code.clone(),
            scene_name: candidate.scene_name.clone(),
            upload_target: upload_target.to_string(),
            resolution: options.resolution.clone(),
            aspect_ratio: options.aspect_ratio.clone(),
            duration_secs: options.duration_secs,
            style: options.style.clone(),
            verbose: true,
        };
        tracing::info!(job_id, scene = %candidate.scene_name, "rendering");
        match self.renderer.render(&request).await {
            Ok(outcome) => outcome,
            Err(err) => {
                tracing::warn!(job_id, error = %err, "render service fault");
                RenderOutcome::failed(err.to_string(), None)
            }
        }
    }
}

/// Where a loop starts counting and whether it owns the terminal failure.
#[derive(Debug, Clone, Copy)]
struct LoopPlan {
    retry_base: usize,
    persist_failure: bool,
}

impl LoopPlan {
    fn standalone() -> Self {
        Self {
            retry_base: 0,
            persist_failure: true,
        }
    }
}

fn failure_update(result: &GenerationResult) -> JobUpdate {
    JobUpdate::failed()
        .last_error(result.error.clone())
        .retry_count(result.retry_count)
        .logs(result.logs.clone())
        .stderr(result.stderr.clone())
}

fn into_outcome(candidate: Candidate, rendered: RenderOutcome) -> AttemptOutcome {
    if rendered.success {
        AttemptOutcome::Rendered {
            code: candidate.code,
            scene_name: candidate.scene_name,
            logs: rendered.logs,
            stderr: rendered.stderr,
        }
    } else {
        AttemptOutcome::RenderFailed {
            code: candidate.code,
            scene_name: candidate.scene_name,
            error: rendered
                .error
                .filter(|e| !e.trim().is_empty())
                .unwrap_or_else(|| UNKNOWN_RENDER_ERROR.to_string()),
            logs: rendered.logs,
            stderr: rendered.stderr,
        }
    }
}

fn build_result(
    ctx: AttemptContext,
    success: bool,
    output_url: Option<&str>,
    attempts: Vec<AttemptDiagnostics>,
    usage: Option<Usage>,
) -> GenerationResult {
    let retry_count = ctx.retry_count();
    GenerationResult {
        success,
        code: ctx.last_code,
        scene_name: ctx.last_scene_name,
        output_url: output_url.map(str::to_string),
        logs: ctx.last_logs,
        stderr: ctx.last_stderr,
        retry_count,
        error: if success { None } else { ctx.last_error },
        attempts,
        usage,
    }
}

fn report(job_id: &str, result: GenerationResult, tts_fallback_used: bool) -> JobReport {
    let friendly_error = if result.success {
        None
    } else {
        Some(friendly_error(result.error.as_deref().unwrap_or(UNKNOWN_RENDER_ERROR)))
    };
    JobReport {
        job_id: job_id.to_string(),
        result,
        tts_fallback_used,
        friendly_error,
    }
}

fn elapsed_ms(started: Instant) -> u64 {
    started.elapsed().as_millis().min(u128::from(u64::MAX)) as u64
}
