use serde::Deserialize;

/// Model routes available to the completion provider
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Model {
    /// Primary route - reasoning model served through the Responses API (gpt-5)
    Primary,
    /// Fallback route - chat model served through Chat Completions (gpt-4o)
    Fallback,
}

/// Which wire API a model route speaks
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ApiFlavor {
    Responses,
    ChatCompletions,
}

const FALLBACK_MAX_TOKENS: u32 = 6000;

impl Model {
    pub fn default_id(&self) -> &'static str {
        match self {
            Model::Primary => "gpt-5",
            Model::Fallback => "gpt-4o",
        }
    }

    pub fn api(&self) -> ApiFlavor {
        match self {
            Model::Primary => ApiFlavor::Responses,
            Model::Fallback => ApiFlavor::ChatCompletions,
        }
    }

    pub fn max_tokens(&self) -> Option<u32> {
        match self {
            // Reasoning models size their own output budget.
            Model::Primary => None,
            Model::Fallback => Some(FALLBACK_MAX_TOKENS),
        }
    }

    pub fn label(&self) -> &'static str {
        match self {
            Model::Primary => "primary",
            Model::Fallback => "fallback",
        }
    }
}

/// API usage information, tolerant of both Chat Completions and Responses naming.
#[derive(Deserialize, Clone, Debug, Default, PartialEq)]
pub struct Usage {
    #[serde(default, alias = "input_tokens")]
    pub prompt_tokens: u32,
    #[serde(default, alias = "output_tokens")]
    pub completion_tokens: u32,
    #[serde(default)]
    pub total_tokens: u32,
}

impl Usage {
    pub fn from_body(body: &serde_json::Value) -> Option<Usage> {
        body.get("usage")
            .and_then(|u| serde_json::from_value(u.clone()).ok())
            .map(|mut usage: Usage| {
                if usage.total_tokens == 0 {
                    usage.total_tokens = usage.prompt_tokens + usage.completion_tokens;
                }
                usage
            })
    }
}

/// Sum two optional usage records.
pub fn merge_usage(a: Option<Usage>, b: Option<Usage>) -> Option<Usage> {
    match (a, b) {
        (None, None) => None,
        (Some(u), None) | (None, Some(u)) => Some(u),
        (Some(a), Some(b)) => Some(Usage {
            prompt_tokens: a.prompt_tokens + b.prompt_tokens,
            completion_tokens: a.completion_tokens + b.completion_tokens,
            total_tokens: a.total_tokens + b.total_tokens,
        }),
    }
}
