use criterion::{black_box, criterion_group, criterion_main, Criterion};
use manim_heal::enrich_error;
use manim_heal::llm::extract_text;
use manim_heal::pipeline::scene::clean_candidate;
use manim_heal::pipeline::validate::validate;
use serde_json::json;

fn synthetic_scene(beats: usize) -> String {
    let mut code = String::from(
        "from manim import *\n\nclass GeneratedScene(Scene):\n    def construct(self):\n",
    );
    for i in 0..beats {
        code.push_str(&format!(
            "        shape_{i} = VGroup(Circle(radius=0.{r}), Square(side_length=1))\n",
            r = i % 9 + 1
        ));
        code.push_str(&format!(
            "        self.play(LaggedStart(*[FadeIn(m) for m in shape_{i}], lag_ratio=0.1), run_time=0.5)\n"
        ));
        code.push_str(&format!("        self.play(shape_{i}.animate.shift(RIGHT * 0.1))\n"));
    }
    code.push_str("        self.wait(1)\n");
    code
}

fn bench_validate(c: &mut Criterion) {
    let small = synthetic_scene(10);
    let large = synthetic_scene(400);

    c.bench_function("validate_small_scene", |b| {
        b.iter(|| black_box(validate(black_box(&small), None).len()));
    });
    c.bench_function("validate_large_scene", |b| {
        b.iter(|| black_box(validate(black_box(&large), Some("educational")).len()));
    });
}

fn bench_enrich_error(c: &mut Criterion) {
    let stderr = "Traceback (most recent call last):\n".repeat(200)
        + "  File \"scene.py\", line 12\n    self.play(dots)\nTypeError: Object VGroup cannot be converted to an animation\n";

    c.bench_function("enrich_error_traceback", |b| {
        b.iter(|| {
            black_box(enrich_error(
                black_box("Render failed with exit code 1"),
                Some(black_box(&stderr)),
                3,
            ))
        });
    });
}

fn bench_clean_reply(c: &mut Criterion) {
    let scene = synthetic_scene(100);
    let body = json!({
        "choices": [{"message": {"role": "assistant", "content": format!("Here you go:\n```python\n{scene}```\nEnjoy!")}}]
    });

    c.bench_function("extract_and_clean_reply", |b| {
        b.iter(|| {
            let text = extract_text(black_box(&body)).map(|t| t.text).unwrap_or_default();
            black_box(clean_candidate(&text, "GeneratedScene").code.len())
        });
    });
}

criterion_group!(perf_core, bench_validate, bench_enrich_error, bench_clean_reply);
criterion_main!(perf_core);
