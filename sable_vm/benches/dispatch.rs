//! Dispatch-loop benchmarks.

use criterion::{criterion_group, criterion_main, Criterion};
use sable_compiler::Compiler;
use sable_vm::Machine;

fn bench_dispatch(c: &mut Criterion) {
    let arith = Compiler::compile_source(
        "let t = 0\nlet i = 0\nwhile i < 10000 {\n t = t + i * 3 - 1\n i = i + 1\n}\nt",
    )
    .unwrap();
    c.bench_function("arith_loop_10k", |b| {
        b.iter(|| {
            Machine::with_output(std::io::sink())
                .run(arith.clone())
                .unwrap()
        })
    });

    let calls = Compiler::compile_source(
        "fn fib(n) { if n < 2 { return n } return fib(n - 1) + fib(n - 2) }\nfib(18)",
    )
    .unwrap();
    c.bench_function("fib_18", |b| {
        b.iter(|| {
            Machine::with_output(std::io::sink())
                .run(calls.clone())
                .unwrap()
        })
    });

    let tasks = Compiler::compile_source(
        "async fn job(n) { return n }\nlet t = 0\nfor i in range(200) { t += await job(i) }\nt",
    )
    .unwrap();
    c.bench_function("spawn_await_200", |b| {
        b.iter(|| {
            Machine::with_output(std::io::sink())
                .run(tasks.clone())
                .unwrap()
        })
    });
}

criterion_group!(benches, bench_dispatch);
criterion_main!(benches);
