//! Benchmarks for the purchase state machine.
//!
//! The transition function runs once per event on the dispatcher task, so it
//! sits on the latency path between a door sensor edge and the lock command.
//!
//! ```sh
//! cargo bench --bench flow_bench
//! cargo bench --bench flow_bench -- decide
//! ```

use criterion::{BenchmarkId, Criterion, Throughput, criterion_group, criterion_main};
use std::hint::black_box;
use stockbox_core::Level;
use stockbox_flow::{FlowEvent, PurchaseMachine, PurchaseState, decide};

fn happy_path(level: Level) -> [(PurchaseState, FlowEvent); 6] {
    [
        (PurchaseState::Idle, FlowEvent::LevelSelected(level)),
        (PurchaseState::CheckingPurchase, FlowEvent::PurchaseValid),
        (PurchaseState::DoorUnlocked, FlowEvent::DoorOpened),
        (PurchaseState::DoorOpened, FlowEvent::DoorClosed),
        (PurchaseState::Completing, FlowEvent::CompletionAcked),
        (PurchaseState::Idle, FlowEvent::TimeoutSleep),
    ]
}

/// Single `decide` calls for representative events.
fn bench_decide(c: &mut Criterion) {
    let mut group = c.benchmark_group("decide");
    group.throughput(Throughput::Elements(1));

    let level = Level::new(3).unwrap();
    let cases = [
        ("select", PurchaseState::Idle, FlowEvent::LevelSelected(level)),
        ("valid", PurchaseState::CheckingPurchase, FlowEvent::PurchaseValid),
        ("door_closed", PurchaseState::DoorOpened, FlowEvent::DoorClosed),
        ("reset", PurchaseState::DoorAlarm, FlowEvent::Reset),
        ("ignored", PurchaseState::Sleep, FlowEvent::DoorOpened),
    ];

    for (name, state, event) in cases {
        group.bench_with_input(BenchmarkId::from_parameter(name), &(state, event), |b, &(state, event)| {
            b.iter(|| black_box(decide(black_box(state), Some(level), black_box(event))));
        });
    }

    group.finish();
}

/// A complete purchase through the machine, history included.
fn bench_purchase_cycle(c: &mut Criterion) {
    let mut group = c.benchmark_group("purchase_cycle");
    let level = Level::new(7).unwrap();
    let steps = happy_path(level);
    group.throughput(Throughput::Elements(steps.len() as u64));

    group.bench_function("machine", |b| {
        b.iter(|| {
            let mut machine = PurchaseMachine::new();
            for (_, event) in steps {
                black_box(machine.apply(Some(level), black_box(event)));
            }
            black_box(machine.state())
        });
    });

    group.bench_function("decide_only", |b| {
        b.iter(|| {
            for (state, event) in steps {
                black_box(decide(state, Some(level), event));
            }
        });
    });

    group.finish();
}

criterion_group!(benches, bench_decide, bench_purchase_cycle);
criterion_main!(benches);
