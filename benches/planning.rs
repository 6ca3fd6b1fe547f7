//! Benchmarks for write planning and response mapping

use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion, Throughput};
use serde_json::json;

use nebula::batch::plan_batch;
use nebula::normalizer::plan_write;
use nebula::{ContentPart, Memory, MemoryResponse};

fn bench_plan_write(c: &mut Criterion) {
    let mut group = c.benchmark_group("plan_write");
    group.throughput(Throughput::Elements(1));

    let text = Memory::new("bench", "Test content for benchmarking purposes ".repeat(50));
    group.bench_function("document_text", |b| b.iter(|| plan_write(black_box(&text))));

    let chunks = Memory::new(
        "bench",
        (0..100).map(|i| format!("chunk number {}", i)).collect::<Vec<_>>(),
    );
    group.bench_function("document_chunks", |b| b.iter(|| plan_write(black_box(&chunks))));

    let image = Memory::new(
        "bench",
        vec![
            ContentPart::image_from_bytes(&[0u8; 64 * 1024], Some("photo.png"), None),
            ContentPart::text("describe this"),
        ],
    )
    .with_vision_model("vlm");
    group.bench_function("multimodal", |b| b.iter(|| plan_write(black_box(&image))));

    let conversation = Memory::new("bench", "hello there").with_role("user");
    group.bench_function("conversation", |b| {
        b.iter(|| plan_write(black_box(&conversation)))
    });

    group.finish();
}

fn bench_plan_batch(c: &mut Criterion) {
    let mut group = c.benchmark_group("plan_batch");

    for size in [10, 100, 1000] {
        let memories: Vec<Memory> = (0..size)
            .map(|i| match i % 3 {
                0 => Memory::new("bench", format!("document {}", i)),
                1 => Memory::new("bench", format!("question {}", i))
                    .with_role("user")
                    .with_memory_id(format!("conv-{}", i % 7)),
                _ => Memory::new("bench", format!("answer {}", i)).with_role("assistant"),
            })
            .collect();

        group.throughput(Throughput::Elements(size as u64));
        group.bench_with_input(BenchmarkId::from_parameter(size), &memories, |b, memories| {
            b.iter(|| plan_batch(black_box(memories)))
        });
    }

    group.finish();
}

fn bench_map_memory(c: &mut Criterion) {
    let raw = json!({
        "results": {
            "id": "conv-1",
            "chunks": (0..200)
                .map(|i| json!({"id": format!("c{}", i), "text": format!("message {}", i), "role": "user"}))
                .collect::<Vec<_>>(),
            "collection_ids": ["col-1"],
            "created_at": "2025-01-15T10:00:00Z"
        }
    });

    c.bench_function("map_memory_response", |b| {
        b.iter(|| MemoryResponse::from_value(black_box(&raw)))
    });
}

criterion_group!(benches, bench_plan_write, bench_plan_batch, bench_map_memory);
criterion_main!(benches);
