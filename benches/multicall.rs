use std::sync::Arc;

use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion};
use rulebind::{
    BindOptions, Binder, BoundExpression, CastResolver, ExecutionService, OpenMethod, RuntimeEnv,
    StandardCasts, SyntaxNode, TypeRegistry, Value,
};

/// A deliberately non-trivial per-element rule so forking has work to hide.
fn build_expr(parallel: bool) -> BoundExpression {
    let reg = TypeRegistry::new();
    let int = reg.get("int").unwrap();
    let score = OpenMethod::native("score", "Rules", vec![int.clone()], int, |_, args, _| {
        let mut acc = args[0].as_int().unwrap_or_default();
        for _ in 0..200 {
            acc = acc.wrapping_mul(6_364_136_223_846_793_005).wrapping_add(1);
        }
        Ok(Value::Int(acc))
    });
    let resolver: Arc<dyn CastResolver> = Arc::new(StandardCasts::new(&reg));
    Binder::new(Arc::new(reg), resolver)
        .with_options(BindOptions {
            parallel_multicall: parallel,
            ..BindOptions::default()
        })
        .with_function(score)
        .bind_with_params(
            &[("xs", "int[]")],
            &SyntaxNode::call("score", vec![SyntaxNode::ident("xs")]),
        )
}

fn bench_multicall(c: &mut Criterion) {
    let service = Arc::new(ExecutionService::new().unwrap());
    let sequential = build_expr(false);
    let parallel = build_expr(true);
    let mut group = c.benchmark_group("multicall");

    for &n in &[16_i64, 256, 4096] {
        let input = Value::from((0..n).map(Value::Int).collect::<Vec<_>>());

        group.bench_with_input(BenchmarkId::new("sequential", n), &input, |b, input| {
            let mut env = RuntimeEnv::new();
            env.set_local(0, input.clone());
            b.iter(|| sequential.evaluate(black_box(&mut env)).unwrap());
        });

        group.bench_with_input(BenchmarkId::new("parallel", n), &input, |b, input| {
            let mut env = RuntimeEnv::new().with_service(Arc::clone(&service));
            env.set_local(0, input.clone());
            b.iter(|| parallel.evaluate(black_box(&mut env)).unwrap());
        });
    }

    group.finish();
}

criterion_group!(benches, bench_multicall);
criterion_main!(benches);
