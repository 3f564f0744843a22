use std::sync::Arc;

use async_trait::async_trait;
use criterion::{BenchmarkId, Criterion, Throughput, criterion_group, criterion_main};
use serde_json::json;
use steploom::bus::{BoxError, EventHandler, InProcessBus, MessageBus, Subscription};
use steploom::event::FlowEvent;
use steploom::pattern::TopicPattern;
use steploom::registry::StepId;
use tokio::runtime::Runtime;

const BATCH_SIZES: &[usize] = &[64, 256, 1024];

struct Sink;

#[async_trait]
impl EventHandler for Sink {
    async fn handle(&self, _event: Arc<FlowEvent>) -> Result<(), BoxError> {
        Ok(())
    }
}

fn subscribed_bus() -> InProcessBus {
    let bus = InProcessBus::default();
    for (pattern, step) in [("order.*", "billing"), ("order.created", "audit"), ("*", "mirror")] {
        bus.subscribe(Subscription::new(
            TopicPattern::parse(pattern).expect("pattern"),
            StepId::from(step),
            Arc::new(Sink),
        ));
    }
    bus
}

async fn publish_batch(bus: &InProcessBus, batch: usize) {
    for i in 0..batch {
        bus.publish(FlowEvent::trigger(
            "order.created",
            json!({ "seq": i }),
            "bench",
        ))
        .await
        .expect("publish");
    }
}

fn bus_dispatch(c: &mut Criterion) {
    let runtime = Runtime::new().expect("runtime");
    let mut group = c.benchmark_group("bus_publish");

    for &batch in BATCH_SIZES {
        group.throughput(Throughput::Elements(batch as u64));
        group.bench_with_input(BenchmarkId::from_parameter(batch), &batch, |b, &size| {
            b.to_async(&runtime).iter(|| async {
                let bus = subscribed_bus();
                publish_batch(&bus, size).await;
            });
        });
    }

    group.finish();
}

criterion_group!(benches, bus_dispatch);
criterion_main!(benches);
