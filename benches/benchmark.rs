use criterion::{black_box, criterion_group, criterion_main, Criterion};
use html2img::config::{extract_inline_config, ConfigOverlay, EffectiveConfig};
use html2img::{batch, JobResult};
use std::path::PathBuf;
use std::time::Duration;

// Fast settings for all benchmarks
fn configure_fast_group(group: &mut criterion::BenchmarkGroup<criterion::measurement::WallTime>) {
    group.warm_up_time(Duration::from_millis(500));
    group.measurement_time(Duration::from_millis(500));
    group.sample_size(20);
}

fn benchmark_config_resolution(c: &mut Criterion) {
    let mut group = c.benchmark_group("config");
    configure_fast_group(&mut group);

    let file: ConfigOverlay = serde_json::from_str(
        r#"{"viewport": {"width": 1080, "height": 1440}, "output": {"format": "jpeg", "quality": 85}}"#,
    )
    .unwrap();
    let invocation: ConfigOverlay =
        serde_json::from_str(r#"{"timeouts": {"assetLoad": 500}}"#).unwrap();

    group.bench_function("resolve", |b| {
        b.iter(|| {
            let config = EffectiveConfig::resolve(Some(&file), &invocation, None);
            black_box(config);
        });
    });

    group.bench_function("validate", |b| {
        let config = EffectiveConfig::default();
        b.iter(|| {
            let result = config.validate();
            let _ = black_box(result);
        });
    });

    group.finish();
}

fn benchmark_inline_extraction(c: &mut Criterion) {
    let mut group = c.benchmark_group("inline_config");
    configure_fast_group(&mut group);

    let markup = r#"<html><head>
        <script id="h2i-config" type="application/json">
        {"format": "png", "width": 1080, "height": 1440, "quality": 95, "suffix": "-card"}
        </script>
        <meta name="h2i:deviceScaleFactor" content="1.5">
        </head><body><h1>content</h1></body></html>"#;

    group.bench_function("extract", |b| {
        b.iter(|| {
            let inline = extract_inline_config(black_box(markup));
            black_box(inline);
        });
    });

    group.finish();
}

fn benchmark_report_rendering(c: &mut Criterion) {
    let mut group = c.benchmark_group("report");
    configure_fast_group(&mut group);

    let results: Vec<JobResult> = (0..50)
        .map(|i| JobResult {
            success: i % 5 != 0,
            input: PathBuf::from(format!("doc-{i:02}.html")),
            output: Some(PathBuf::from(format!("doc-{i:02}.png"))),
            error: (i % 5 == 0).then(|| "invalid HTML document".to_string()),
            config: None,
        })
        .collect();

    group.bench_function("render", |b| {
        b.iter(|| {
            let report = batch::render_report(black_box(&results));
            black_box(report);
        });
    });

    group.finish();
}

criterion_group!(
    benches,
    benchmark_config_resolution,
    benchmark_inline_extraction,
    benchmark_report_rendering
);
criterion_main!(benches);
