//! Benchmarks for constraint compilation and stream decoding

use criterion::{black_box, criterion_group, criterion_main, Criterion, Throughput};
use structured_prefill::pattern::{compile_template, CompileOptions};
use structured_prefill::stream::Decoder;
use structured_prefill::{plan_constraint, BanList, Dialect, PrefillConfig};

const TEMPLATES: &[(&str, &str)] = &[
    ("literal", "Once upon a time, in a quiet village by the sea."),
    ("dialogue", "She said, \"[[w:3-5]]\" [[keep]][[free]]"),
    (
        "mixed",
        concat!(
            "[[opt:Morning|Noon|Night]], [[num:1-500]] days later. ",
            "*[[action]]* [[lines:1-3]] [[keep]][[free]]"
        ),
    ),
];

/// Benchmark template compilation per dialect
fn bench_compile(c: &mut Criterion) {
    let mut group = c.benchmark_group("compile");

    for dialect in [Dialect::Default, Dialect::Conservative] {
        let options = CompileOptions::new(dialect, "<br>");
        for (name, template) in TEMPLATES {
            group.bench_function(format!("{}_{}", name, dialect), |b| {
                b.iter(|| black_box(compile_template(black_box(template), &options)))
            });
        }
    }

    group.finish();
}

/// Benchmark ban-list automaton construction for growing lists
fn bench_ban_list(c: &mut Criterion) {
    let mut group = c.benchmark_group("ban_list");
    let phrases = [
        "gaze",
        "shivers down",
        "ministrations",
        "a testament to",
        "barely above a whisper",
        "unspoken",
        "palpable",
        "tapestry",
    ];

    for &count in &[1, 4, 8] {
        let list = BanList::from_phrases(&phrases[..count]);
        group.throughput(Throughput::Elements(count as u64));
        group.bench_function(format!("{}_phrases", count), |b| {
            b.iter(|| black_box(list.compile(Dialect::Default)))
        });
    }

    group.finish();
}

/// Benchmark the full compile phase
fn bench_plan(c: &mut Criterion) {
    let mut config = PrefillConfig::default();
    config.ban_list.phrases = vec!["gaze".to_string(), "palpable".to_string()];
    let base = "The storm had passed by morning, leaving every street in town washed clean.";

    c.bench_function("plan_continuation", |b| {
        b.iter(|| black_box(plan_constraint(TEMPLATES[1].1, Some(base), &config)))
    });
}

/// Benchmark decoding a payload as it grows
fn bench_decode(c: &mut Criterion) {
    let mut group = c.benchmark_group("decode");
    let sentence = "The wind moved through the \"old\" pines.<br>";

    for &repeats in &[1, 16, 128] {
        let value = sentence.repeat(repeats);
        let complete = serde_json::json!({ "value": value }).to_string();
        let partial = complete[..complete.len() - 2].to_string();
        group.throughput(Throughput::Bytes(complete.len() as u64));

        group.bench_function(format!("complete_{}", repeats), |b| {
            let mut decoder = Decoder::new("<br>", false);
            b.iter(|| black_box(decoder.decode(black_box(&complete))))
        });
        group.bench_function(format!("partial_{}", repeats), |b| {
            let mut decoder = Decoder::new("<br>", false);
            b.iter(|| black_box(decoder.decode(black_box(&partial))))
        });
    }

    group.finish();
}

criterion_group!(benches, bench_compile, bench_ban_list, bench_plan, bench_decode);
criterion_main!(benches);
