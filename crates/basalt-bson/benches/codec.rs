use basalt_bson::{Document, Value, doc};
use criterion::{BenchmarkId, Criterion, criterion_group, criterion_main};

// ── Helpers ─────────────────────────────────────────────────

fn generate_doc(fields: usize) -> Document {
    let mut builder = basalt_bson::DocumentBuilder::new();
    builder.push("_id", basalt_bson::ObjectId::new());
    for i in 0..fields {
        builder.push(format!("name-{i}"), format!("value {i}"));
        builder.push(format!("count-{i}"), i as i64);
        builder.push(
            format!("nested-{i}"),
            doc! { "status": "active", "score": (i % 80) as i32 },
        );
    }
    builder.build()
}

// ── Encode / decode ─────────────────────────────────────────

fn bench_encode(c: &mut Criterion) {
    let mut group = c.benchmark_group("encode");
    for fields in [4, 32, 256] {
        let doc = generate_doc(fields);
        group.bench_with_input(BenchmarkId::from_parameter(fields), &doc, |b, doc| {
            b.iter(|| doc.to_bytes().unwrap())
        });
    }
    group.finish();
}

fn bench_decode(c: &mut Criterion) {
    let mut group = c.benchmark_group("decode");
    for fields in [4, 32, 256] {
        let bytes = generate_doc(fields).to_bytes().unwrap();
        group.bench_with_input(BenchmarkId::from_parameter(fields), &bytes, |b, bytes| {
            b.iter(|| Document::from_bytes(bytes).unwrap())
        });
    }
    group.finish();
}

fn bench_size(c: &mut Criterion) {
    let doc = generate_doc(256);
    c.bench_function("size/256", |b| b.iter(|| doc.size()));

    let arr = doc! { "docs": Value::from(vec![1i64; 1000]) };
    c.bench_function("size/array-1000", |b| b.iter(|| arr.size()));
}

criterion_group!(benches, bench_encode, bench_decode, bench_size);
criterion_main!(benches);
