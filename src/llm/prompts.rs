use crate::job::GenerationOptions;

const CODE_RULES: &str = r#"HARD RULES (violations crash the renderer):
- Start with `from manim import *`. Target Manim Community v0.18.1.
- Exactly one scene class, named exactly as requested, with a `construct(self)` method.
- Never pass a VGroup/Group to self.play() directly. Animate its members instead:
  self.play(LaggedStart(*[FadeIn(m) for m in group], lag_ratio=0.2))
  self.play(AnimationGroup(*[Create(m) for m in group]))
  self.play(group.animate.shift(UP))
- Use MathTex(r"...") for equations and Text("...") for plain words; always raw strings for LaTeX.
- Do not use PieChart, LineChart, Histogram, ScatterPlot, config["style"] or self.camera.frame.
- Indent with four spaces. No tabs.
- FadeOut previous content before introducing the next section so nothing overlaps.
- Keep every self.wait() at least 1 second and give each self.play() an explicit run_time.

OUTPUT: only the Python source in a single ```python block. No commentary."#;

/// System prompt for silent (no narration) scenes.
pub fn standard_system_prompt(options: &GenerationOptions) -> String {
    format!(
        r#"You are an expert Manim animator producing short explainer videos.
Write a complete, self-contained Manim scene of about {duration} seconds.
Frame: {aspect} at {resolution}. Visual style: {style}.

{rules}"#,
        duration = options.duration_secs,
        aspect = options.aspect_ratio,
        resolution = options.resolution,
        style = options.style,
        rules = CODE_RULES,
    )
}

/// System prompt for narrated scenes built on manim-voiceover.
pub fn voiceover_system_prompt(options: &GenerationOptions) -> String {
    format!(
        r#"You are an expert Manim animator producing narrated explainer videos.
Write a complete, self-contained VoiceoverScene of about {duration} seconds.
Frame: {aspect} at {resolution}. Visual style: {style}.
Narration: {language}, {voice} voice.

VOICEOVER RULES:
- Import `from manim_voiceover import VoiceoverScene` and
  `from manim_voiceover.services.openai import OpenAIService`.
- Subclass VoiceoverScene and call self.set_speech_service(OpenAIService(voice="alloy")) first in construct.
- Wrap each narrated beat in `with self.voiceover(text="...") as tracker:` and pace
  animations with run_time=tracker.duration.

{rules}"#,
        duration = options.duration_secs,
        aspect = options.aspect_ratio,
        resolution = options.resolution,
        style = options.style,
        language = options.language,
        voice = options.voice_style.as_deref().unwrap_or("neutral"),
        rules = CODE_RULES,
    )
}

pub fn system_prompt_for(options: &GenerationOptions) -> String {
    if options.has_voiceover {
        voiceover_system_prompt(options)
    } else {
        standard_system_prompt(options)
    }
}

/// Direct prompt built from the raw options, used when no technical
/// specification is available.
pub fn build_user_prompt(options: &GenerationOptions, scene_name: &str) -> String {
    format!(
        "Create a Manim animation for this request:\n\"{}\"\n\nTitle: {}\nScene class name: {}\nTarget duration: {} seconds\nAspect ratio: {}\nResolution: {}\nStyle: {}",
        options.prompt.trim(),
        options.title.trim(),
        scene_name,
        options.duration_secs,
        options.aspect_ratio,
        options.resolution,
        options.style,
    )
}

/// Retry prompt: the previous candidate plus the enriched error that sank it.
pub fn fix_on_fail_prompt(previous_code: &str, previous_error: &str, scene_name: &str) -> String {
    format!(
        "The Manim code below failed to render. Fix it so it renders successfully.\n\nERROR REPORT:\n{}\n\nPREVIOUS CODE:\n```python\n{}\n```\n\nKeep the scene class named {} and preserve the intended animation. Patch the failing parts rather than starting over, and return the full corrected file.",
        previous_error.trim(),
        previous_code.trim_end(),
        scene_name,
    )
}

pub const SPEC_ENHANCER_SYSTEM: &str = r#"You are a motion-design director. Turn a short creative request into a technical specification for a Manim animation.

OUTPUT FORMAT (JSON only):
{
  "language": "visual idiom, e.g. geometric, data-viz, typographic, mathematical",
  "visual_style": "palette and mood in one sentence",
  "scenes": [
    {
      "title": "short scene title",
      "description": "what happens on screen",
      "duration_seconds": 4,
      "visuals": ["Manim objects and animations to use"],
      "narration": "optional spoken line"
    }
  ]
}

RULES:
- Scene durations must add up to the requested total.
- Only use objects that exist in Manim Community v0.18.1.
- Prefer staggered animation of group members over animating a group as one unit.
- Leave "narration" empty when narration is not requested."#;

pub fn spec_enhancer_user_prompt(options: &GenerationOptions) -> String {
    format!(
        "Request: {}\nTitle: {}\nTotal duration: {} seconds\nAspect ratio: {}\nStyle: {}\nNarration: {}",
        options.prompt.trim(),
        options.title.trim(),
        options.duration_secs,
        options.aspect_ratio,
        options.style,
        if options.has_voiceover {
            format!(
                "yes ({}, {})",
                options.language,
                options.voice_style.as_deref().unwrap_or("neutral")
            )
        } else {
            "no".to_string()
        }
    )
}

pub const QUICK_FIX_SYSTEM: &str = r#"You are a Manim code reviewer applying a surgical fix.

You will receive Manim source code and a list of detected issues.
- Fix ONLY the listed issues. Do not restructure, rename, or restyle unrelated code.
- Keep the scene class name and the overall animation exactly as they are.
- Never pass a VGroup/Group to self.play() directly; animate its members
  (LaggedStart(*[FadeIn(m) for m in group]) or AnimationGroup(...)) or use group.animate.

OUTPUT: the complete corrected file in a single ```python block. No commentary."#;
