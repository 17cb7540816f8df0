use std::sync::Arc;

use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion, Throughput};
use podwatch::{BroadcastHub, EventKind, LocalSubscriber, ResourceEvent, SubscriberId, SubscriberRegistry};

const SUBSCRIBER_COUNTS: [usize; 4] = [1, 16, 256, 1024];
const BATCH: usize = 64;

fn bench_publish(c: &mut Criterion) {
    let mut group = c.benchmark_group("publish_fanout");
    let event = ResourceEvent {
        kind: EventKind::Updated,
        name: "web-7d9c8b6f5-x2x4q".to_string(),
        namespace: "production".to_string(),
    };
    let message = event.encode().expect("encode");

    for subscribers in SUBSCRIBER_COUNTS {
        group.throughput(Throughput::Elements((subscribers * BATCH) as u64));
        group.bench_with_input(BenchmarkId::from_parameter(subscribers), &subscribers, |b, &n| {
            let registry = Arc::new(SubscriberRegistry::new());
            let hub = BroadcastHub::new(Arc::clone(&registry));
            let receivers: Vec<_> = (0..n)
                .map(|_| {
                    let (sub, rx) = LocalSubscriber::channel(BATCH);
                    registry.register(SubscriberId::next(), Arc::new(sub));
                    rx
                })
                .collect();

            b.iter(|| {
                for _ in 0..BATCH {
                    black_box(hub.publish(black_box(&message)));
                }
                for rx in &receivers {
                    while rx.try_recv().is_ok() {}
                }
            });
            assert_eq!(registry.len(), n);
        });
    }
    group.finish();
}

fn bench_encode(c: &mut Criterion) {
    let event = ResourceEvent {
        kind: EventKind::Added,
        name: "web-7d9c8b6f5-x2x4q".to_string(),
        namespace: "production".to_string(),
    };
    c.bench_function("encode_event", |b| b.iter(|| black_box(&event).encode().expect("encode")));
}

criterion_group!(benches, bench_publish, bench_encode);
criterion_main!(benches);
