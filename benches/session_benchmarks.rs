//! Benchmarks for session memory and template filling.
//!
//! Run with: cargo bench --bench session_benchmarks

use criterion::{black_box, criterion_group, criterion_main, Criterion};
use std::collections::HashMap;
use std::sync::Arc;

use prdgen::sessions::{ConversationEntry, InMemorySessionStore, SessionId, SessionStore};
use prdgen::templates::{bundled_template, BUNDLED_TEMPLATE_NAME};

fn bench_get_or_create(c: &mut Criterion) {
    let store = InMemorySessionStore::new(50);
    let ids: Vec<SessionId> = (0..1_000).map(|n| SessionId::new(format!("s{n}"))).collect();

    c.bench_function("get_or_create_1000_sessions", |b| {
        b.iter(|| {
            for id in &ids {
                black_box(store.get_or_create(id));
            }
        });
    });
}

fn bench_append_turn_capped(c: &mut Criterion) {
    let store = InMemorySessionStore::new(50);
    let history = store.get_or_create(&SessionId::from("bench"));

    c.bench_function("append_turn_capped_50", |b| {
        b.iter(|| {
            history.append_turn(
                Some(ConversationEntry::human("add success metrics")),
                ConversationEntry::assistant(black_box("Section 1\nSection 2")),
            );
        });
    });
}

fn bench_concurrent_turns(c: &mut Criterion) {
    let rt = tokio::runtime::Builder::new_multi_thread()
        .worker_threads(4)
        .build()
        .unwrap();
    let store: Arc<dyn SessionStore> = Arc::new(InMemorySessionStore::new(0));

    c.bench_function("concurrent_turns_8_sessions", |b| {
        b.to_async(&rt).iter(|| {
            let store = store.clone();
            async move {
                let mut handles = Vec::with_capacity(8);
                for n in 0..8 {
                    let store = store.clone();
                    handles.push(tokio::spawn(async move {
                        let history = store.get_or_create(&SessionId::new(format!("s{n}")));
                        history.append_turn(None, ConversationEntry::assistant("reply"));
                    }));
                }
                for handle in handles {
                    handle.await.unwrap();
                }
            }
        });
    });
}

fn bench_fill_bundled_template(c: &mut Criterion) {
    let template = bundled_template(BUNDLED_TEMPLATE_NAME).unwrap();
    let fields: HashMap<String, String> = template
        .variables()
        .iter()
        .map(|v| (v.clone(), format!("value for {v}")))
        .collect();

    c.bench_function("fill_bundled_prd_template", |b| {
        b.iter(|| black_box(template.fill(black_box(&fields)).unwrap()));
    });
}

criterion_group!(
    benches,
    bench_get_or_create,
    bench_append_turn_capped,
    bench_concurrent_turns,
    bench_fill_bundled_template
);
criterion_main!(benches);
