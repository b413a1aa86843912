use cb_virtdata::{BindingCompiler, Kind};
use criterion::{black_box, criterion_group, criterion_main, Criterion};

fn bench_bindings(c: &mut Criterion) {
    let compiler = BindingCompiler::default();
    let numeric = compiler.compile("Hash(); Mod(1000)", Kind::Value).unwrap();
    let text = compiler
        .compile("Template('user-{}-{}', Hash(), AlphaNumeric(8))", Kind::Value)
        .unwrap();

    c.bench_function("numeric_chain", |b| {
        let mut cycle = 0i64;
        b.iter(|| {
            cycle += 1;
            black_box(numeric.apply(cycle))
        });
    });

    c.bench_function("templated_text", |b| {
        let mut cycle = 0i64;
        let mut buf = String::with_capacity(64);
        b.iter(|| {
            cycle += 1;
            buf.clear();
            black_box(text.apply_text(cycle, &mut buf))
        });
    });
}

criterion_group!(benches, bench_bindings);
criterion_main!(benches);
