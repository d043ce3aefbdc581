use criterion::{criterion_group, criterion_main, Criterion};
use std::path::Path;

use mailstrip::classify::classify;
use mailstrip::parser::mime::parse_message;
use mailstrip::rebuild::{rebuild, PlaceholderPolicy};

fn fixture(name: &str) -> Vec<u8> {
    let path = Path::new(env!("CARGO_MANIFEST_DIR"))
        .join("tests")
        .join("fixtures")
        .join(name);
    std::fs::read(path).unwrap()
}

fn bench_parse_message(c: &mut Criterion) {
    let raw = fixture("nested_lf.eml");

    c.bench_function("parse_nested_message", |b| {
        b.iter(|| parse_message(&raw).unwrap().leaf_count())
    });
}

fn bench_strip_attachments(c: &mut Criterion) {
    let raw = fixture("report_pdf.eml");

    c.bench_function("strip_report_pdf", |b| {
        b.iter(|| {
            let root = parse_message(&raw).unwrap();
            let classified = classify(&root);
            rebuild(&root, &classified, PlaceholderPolicy::TextStub)
                .unwrap()
                .bytes
                .len()
        })
    });
}

criterion_group!(benches, bench_parse_message, bench_strip_attachments);
criterion_main!(benches);
