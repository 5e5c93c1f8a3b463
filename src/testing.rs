//! Scripted collaborators for unit tests
//!
//! A provider that answers by pipeline stage, a renderer that plays back a
//! list of outcomes, and a store that always fails.

use crate::job::JobUpdate;
use crate::llm::prompts::{QUICK_FIX_SYSTEM, SPEC_ENHANCER_SYSTEM};
use crate::llm::{CompletionProvider, CompletionRequest, CompletionResponse, ProviderError};
use crate::render::{RenderError, RenderExecutor, RenderOutcome, RenderRequest};
use crate::store::{JobStore, StoreError};
use async_trait::async_trait;
use serde_json::{json, Value};
use std::sync::Mutex;

pub(crate) const GOOD_SCENE: &str = "from manim import *\n\nclass Whatever(Scene):\n    def construct(self):\n        dot = Dot()\n        self.play(FadeIn(dot), run_time=1)\n        self.play(dot.animate.shift(UP), run_time=1)\n        self.wait(1)\n";

pub(crate) const GROUP_PLAY_SCENE: &str = "from manim import *\n\nclass Whatever(Scene):\n    def construct(self):\n        dots = VGroup(Dot(), Dot())\n        self.play(dots)\n        self.wait(1)\n";

pub(crate) const FIXED_GROUP_SCENE: &str = "from manim import *\n\nclass Whatever(Scene):\n    def construct(self):\n        dots = VGroup(Dot(), Dot())\n        self.play(LaggedStart(*[FadeIn(d) for d in dots], lag_ratio=0.2))\n        self.wait(1)\n";

pub(crate) const SPEC_REPLY: &str = r#"{"language": "geometric", "scenes": [{"title": "Intro", "description": "A dot appears", "duration_seconds": 4, "visuals": ["Dot"]}]}"#;

/// Chat Completions envelope around `text`.
pub(crate) fn chat_body(text: &str) -> Value {
    json!({
        "choices": [{"message": {"role": "assistant", "content": text}}],
        "usage": {"prompt_tokens": 10, "completion_tokens": 20, "total_tokens": 30}
    })
}

fn fenced(code: &str) -> String {
    format!("```python\n{}```", code)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Stage {
    Specification,
    Synthesis,
    QuickFix,
}

pub(crate) fn stage_of(request: &CompletionRequest) -> Stage {
    if request.system == SPEC_ENHANCER_SYSTEM {
        Stage::Specification
    } else if request.system == QUICK_FIX_SYSTEM {
        Stage::QuickFix
    } else {
        Stage::Synthesis
    }
}

/// Per-stage replies. `None` makes that stage fail; synthesis replies are
/// consumed in order and the last one repeats. An empty `code` list makes
/// every synthesis call fail.
#[derive(Debug, Clone)]
pub(crate) struct StageReplies {
    pub spec: Option<String>,
    pub code: Vec<String>,
    pub fix: Option<String>,
}

impl Default for StageReplies {
    fn default() -> Self {
        Self {
            spec: Some(SPEC_REPLY.to_string()),
            code: vec![GOOD_SCENE.to_string()],
            fix: Some(FIXED_GROUP_SCENE.to_string()),
        }
    }
}

enum Script {
    Bodies(Vec<Value>),
    Staged(StageReplies),
    Failing,
}

pub(crate) struct ScriptedProvider {
    script: Script,
    requests: Mutex<Vec<CompletionRequest>>,
}

impl ScriptedProvider {
    fn new(script: Script) -> Self {
        Self {
            script,
            requests: Mutex::new(Vec::new()),
        }
    }

    /// Raw bodies returned in call order; extra calls fail.
    pub(crate) fn with_bodies(bodies: Vec<Value>) -> Self {
        Self::new(Script::Bodies(bodies))
    }

    pub(crate) fn with_replies(replies: Vec<&str>) -> Self {
        Self::with_bodies(replies.into_iter().map(chat_body).collect())
    }

    pub(crate) fn staged(replies: StageReplies) -> Self {
        Self::new(Script::Staged(replies))
    }

    /// Every call fails, like a provider outage.
    pub(crate) fn failing() -> Self {
        Self::new(Script::Failing)
    }

    pub(crate) fn requests(&self) -> Vec<CompletionRequest> {
        self.requests.lock().unwrap().clone()
    }

    pub(crate) fn calls(&self) -> usize {
        self.requests.lock().unwrap().len()
    }

    fn count(&self, stage: Stage) -> usize {
        self.requests()
            .iter()
            .filter(|r| stage_of(r) == stage)
            .count()
    }

    pub(crate) fn spec_calls(&self) -> usize {
        self.count(Stage::Specification)
    }

    pub(crate) fn fix_calls(&self) -> usize {
        self.count(Stage::QuickFix)
    }

    pub(crate) fn synthesis_requests(&self) -> Vec<CompletionRequest> {
        self.requests()
            .into_iter()
            .filter(|r| stage_of(r) == Stage::Synthesis)
            .collect()
    }

    fn outage() -> ProviderError {
        ProviderError::Other("simulated provider outage".to_string())
    }
}

#[async_trait]
impl CompletionProvider for ScriptedProvider {
    async fn complete(
        &self,
        request: &CompletionRequest,
    ) -> Result<CompletionResponse, ProviderError> {
        let call_index = {
            let mut requests = self.requests.lock().unwrap();
            requests.push(request.clone());
            requests.len() - 1
        };
        let body = match &self.script {
            Script::Failing => return Err(Self::outage()),
            Script::Bodies(bodies) => bodies.get(call_index).cloned().ok_or_else(Self::outage)?,
            Script::Staged(replies) => match stage_of(request) {
                Stage::Specification => chat_body(replies.spec.as_deref().ok_or_else(Self::outage)?),
                Stage::QuickFix => {
                    chat_body(&fenced(replies.fix.as_deref().ok_or_else(Self::outage)?))
                }
                Stage::Synthesis => {
                    let index = self.synthesis_requests().len().saturating_sub(1);
                    let reply = replies
                        .code
                        .get(index)
                        .or_else(|| replies.code.last())
                        .ok_or_else(Self::outage)?;
                    if reply.contains("class ") {
                        chat_body(&fenced(reply))
                    } else {
                        chat_body(reply)
                    }
                }
            },
        };
        Ok(CompletionResponse::from_body(body, "scripted"))
    }
}

/// Plays back outcomes in order; the last one repeats.
pub(crate) struct ScriptedRenderer {
    outcomes: Vec<Result<RenderOutcome, String>>,
    requests: Mutex<Vec<RenderRequest>>,
}

impl ScriptedRenderer {
    pub(crate) fn new(outcomes: Vec<Result<RenderOutcome, String>>) -> Self {
        Self {
            outcomes,
            requests: Mutex::new(Vec::new()),
        }
    }

    pub(crate) fn calls(&self) -> usize {
        self.requests.lock().unwrap().len()
    }

    pub(crate) fn requests(&self) -> Vec<RenderRequest> {
        self.requests.lock().unwrap().clone()
    }
}

#[async_trait]
impl RenderExecutor for ScriptedRenderer {
    async fn render(&self, request: &RenderRequest) -> Result<RenderOutcome, RenderError> {
        let index = {
            let mut requests = self.requests.lock().unwrap();
            requests.push(request.clone());
            requests.len() - 1
        };
        let step = self
            .outcomes
            .get(index)
            .or_else(|| self.outcomes.last())
            .cloned()
            .unwrap_or_else(|| Ok(RenderOutcome::succeeded("rendered")));
        step.map_err(|body| RenderError::Service { status: 503, body })
    }
}

/// Store whose every write fails.
pub(crate) struct FailingStore;

#[async_trait]
impl JobStore for FailingStore {
    async fn update_status(&self, job_id: &str, _update: &JobUpdate) -> Result<(), StoreError> {
        Err(StoreError::NotFound(job_id.to_string()))
    }
}
