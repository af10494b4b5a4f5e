//! Task analysis throughput.
//!
//! Drives the analyser directly, without the processor thread, so the
//! numbers reflect dependency and version bookkeeping only.

use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion};
use strata_core::data::{DataLocation, VersionStore};
use strata_core::graph::{AppId, Direction, TaskAnalyser, TaskDescription, TaskId, TaskOutcome};
use strata_core::runtime::{InMemoryBackend, ReadyQueue};

const APP: AppId = AppId(1);

/// N tasks each updating the same object, ended in order.
fn bench_chain(c: &mut Criterion) {
    let mut group = c.benchmark_group("chain");

    for len in [16usize, 256, 1024] {
        group.bench_with_input(BenchmarkId::from_parameter(len), &len, |b, &len| {
            b.iter(|| {
                let mut analyser = TaskAnalyser::new(None);
                let mut store = VersionStore::new();
                let mut backend = InMemoryBackend::new();
                let mut ready = ReadyQueue::new();

                let ids: Vec<TaskId> = (0..len)
                    .map(|_| {
                        let id = TaskId::new();
                        let desc = TaskDescription::method(APP, "Acc", "add")
                            .object(Direction::InOut, 1, Some(serde_json::json!(0)));
                        analyser.process_task(id, desc, &mut store, &mut backend, &mut ready);
                        id
                    })
                    .collect();
                for id in ids {
                    analyser.end_task(TaskOutcome::finished(id), &mut store, &mut backend, &mut ready);
                }
                black_box(ready.drain().len())
            })
        });
    }

    group.finish();
}

/// One writer followed by many independent readers of the same file.
fn bench_fan_out(c: &mut Criterion) {
    let mut group = c.benchmark_group("fan_out");

    for readers in [16usize, 256, 1024] {
        group.bench_with_input(BenchmarkId::from_parameter(readers), &readers, |b, &readers| {
            b.iter(|| {
                let mut analyser = TaskAnalyser::new(None);
                let mut store = VersionStore::new();
                let mut backend = InMemoryBackend::new();
                let mut ready = ReadyQueue::new();
                let input = DataLocation::local("/bench/input");

                let writer = TaskId::new();
                analyser.process_task(
                    writer,
                    TaskDescription::method(APP, "Io", "load").file(Direction::Out, input.clone()),
                    &mut store,
                    &mut backend,
                    &mut ready,
                );
                for _ in 0..readers {
                    analyser.process_task(
                        TaskId::new(),
                        TaskDescription::method(APP, "Io", "scan").file(Direction::In, input.clone()),
                        &mut store,
                        &mut backend,
                        &mut ready,
                    );
                }
                analyser.end_task(TaskOutcome::finished(writer), &mut store, &mut backend, &mut ready);
                black_box(ready.drain().len())
            })
        });
    }

    group.finish();
}

criterion_group!(benches, bench_chain, bench_fan_out);
criterion_main!(benches);
