//! Last-resort scene sources that need no provider call.

use super::scene::scene_name_from_title;
use crate::job::GenerationOptions;
use crate::util::truncate;

const MAX_TITLE_CHARS: usize = 50;

/// Minimal, always-valid scene for `options`: the prompt as a title, one
/// shape transform, then a fade out. Pure and deterministic.
pub fn create_safe_fallback_scene(options: &GenerationOptions) -> String {
    let scene_name = scene_name_from_title(&options.title);
    let title = python_literal(&truncate(options.prompt.trim(), MAX_TITLE_CHARS));
    format!(
        r#"from manim import *


class {scene_name}(Scene):
    def construct(self):
        title = Text({title}, font_size=36)
        title.to_edge(UP)
        self.play(Write(title), run_time=1)

        circle = Circle(radius=1.5, color=BLUE)
        square = Square(side_length=3, color=GREEN)
        self.play(Create(circle), run_time=1)
        self.play(Transform(circle, square), run_time=1.5)
        self.wait(1)

        self.play(FadeOut(title), FadeOut(circle), run_time=1)
"#
    )
}

/// Which canned visual a prompt maps to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum FallbackKind {
    Chart,
    Math,
    Circle,
    Square,
    Triangle,
    Shapes,
}

impl FallbackKind {
    /// First keyword group that matches wins.
    pub(crate) fn for_prompt(prompt: &str) -> Self {
        const TABLE: &[(&[&str], FallbackKind)] = &[
            (&["chart", "graph", "data", "plot"], FallbackKind::Chart),
            (&["math", "formula", "equation"], FallbackKind::Math),
            (&["circle", "round"], FallbackKind::Circle),
            (&["square", "rectangle"], FallbackKind::Square),
            (&["triangle"], FallbackKind::Triangle),
        ];
        let lower = prompt.to_lowercase();
        TABLE
            .iter()
            .find(|(keywords, _)| keywords.iter().any(|k| lower.contains(k)))
            .map(|(_, kind)| *kind)
            .unwrap_or(FallbackKind::Shapes)
    }

    fn body(&self) -> &'static str {
        match self {
            FallbackKind::Chart => {
                r#"        axes = Axes(
            x_range=[0, 5, 1],
            y_range=[0, 10, 2],
            axis_config={"include_numbers": True},
        )
        x_label = axes.get_x_axis_label("x")
        y_label = axes.get_y_axis_label("y")
        self.play(Create(axes), Write(x_label), Write(y_label), run_time=1.5)

        points = [(1, 2), (2, 5), (3, 4), (4, 8)]
        dots = [Dot(axes.c2p(x, y), color=YELLOW) for x, y in points]
        self.play(LaggedStart(*[FadeIn(d) for d in dots], lag_ratio=0.2), run_time=1.5)
        line = axes.plot_line_graph([p[0] for p in points], [p[1] for p in points], add_vertex_dots=False)
        self.play(Create(line), run_time=1.5)
        self.wait(1)
"#
            }
            FallbackKind::Math => {
                r#"        equation = MathTex(r"x = \frac{-b \pm \sqrt{b^2 - 4ac}}{2a}")
        equation.next_to(title, DOWN, buff=0.5)
        self.play(Write(equation), run_time=2)

        axes = Axes(x_range=[-3, 3, 1], y_range=[-1, 5, 1], x_length=6, y_length=3)
        axes.to_edge(DOWN)
        graph = axes.plot(lambda x: x ** 2 - 1, color=BLUE)
        self.play(Create(axes), run_time=1)
        self.play(Create(graph), run_time=1.5)
        self.wait(1)
"#
            }
            FallbackKind::Circle => {
                r#"        circle = Circle(radius=2, color=BLUE)
        self.play(Create(circle), run_time=1.5)
        self.play(circle.animate.set_fill(BLUE, opacity=0.5), run_time=1)
        self.play(circle.animate.scale(0.5), run_time=1)
        self.wait(1)
"#
            }
            FallbackKind::Square => {
                r#"        square = Square(side_length=3, color=GREEN)
        rectangle = Rectangle(width=5, height=2.5, color=ORANGE)
        self.play(Create(square), run_time=1.5)
        self.play(Transform(square, rectangle), run_time=1.5)
        self.wait(1)
"#
            }
            FallbackKind::Triangle => {
                r#"        triangle = Triangle(color=YELLOW).scale(2)
        self.play(Create(triangle), run_time=1.5)
        self.play(Rotate(triangle, angle=PI), run_time=1.5)
        self.wait(1)
"#
            }
            FallbackKind::Shapes => {
                r#"        shapes = VGroup(Circle(color=BLUE), Square(color=GREEN), Triangle(color=YELLOW))
        shapes.arrange(RIGHT, buff=1)
        self.play(LaggedStart(*[Create(s) for s in shapes], lag_ratio=0.3), run_time=2)
        self.play(shapes.animate.scale(0.8), run_time=1)
        self.wait(1)
"#
            }
        }
    }
}

/// Prompt-aware replacement for a structurally unusable model reply.
///
/// Always a plain `Scene` so it renders without the speech service.
pub fn prompt_fallback_scene(options: &GenerationOptions, scene_name: &str) -> String {
    let kind = FallbackKind::for_prompt(&options.prompt);
    let title = python_literal(&truncate(options.title.trim(), MAX_TITLE_CHARS));
    format!(
        r#"from manim import *


class {scene_name}(Scene):
    def construct(self):
        title = Text({title}, font_size=36)
        title.to_edge(UP)
        self.play(Write(title), run_time=1)

{body}
        self.play(*[FadeOut(m) for m in self.mobjects], run_time=1)
"#,
        body = kind.body().trim_end_matches('\n'),
    )
}

/// Double-quoted Python string literal.
fn python_literal(text: &str) -> String {
    let mut out = String::with_capacity(text.len() + 2);
    out.push('"');
    for c in text.chars() {
        match c {
            '\\' => out.push_str("\\\\"),
            '"' => out.push_str("\\\""),
            '\n' | '\r' | '\t' => out.push(' '),
            c if c.is_control() => {}
            c => out.push(c),
        }
    }
    out.push('"');
    out
}
