use std::sync::Arc;

use rulebind::{
    Binder, CastResolver, ExecutionService, OpenMethod, RuntimeEnv, StandardCasts, SyntaxNode,
    TypeRegistry, Value,
};

fn main() {
    let registry = TypeRegistry::new();
    let int = registry.get("int").expect("int is built in");
    let premium = OpenMethod::native("premium", "Tariff", vec![int.clone()], int, |_, args, _| {
        let age = args[0].as_int().unwrap_or_default();
        Ok(Value::Int(500 + (age - 40).abs() * 12))
    });

    let resolver: Arc<dyn CastResolver> = Arc::new(StandardCasts::new(&registry));
    let binder = Binder::new(Arc::new(registry), resolver).with_function(premium);

    // premium(ages) with ages: int[] binds as one call per element
    let expr = binder
        .bind_with_params(
            &[("ages", "int[]")],
            &SyntaxNode::call("premium", vec![SyntaxNode::ident("ages")]),
        )
        .into_result()
        .expect("failed to bind expression");

    let service = Arc::new(
        ExecutionService::builder()
            .threads(4)
            .thread_name("premium")
            .build()
            .expect("failed to start execution service"),
    );

    let ages: Vec<Value> = (18..82).map(Value::Int).collect();
    let mut env = RuntimeEnv::new().with_service(Arc::clone(&service));
    env.set_local(0, Value::from(ages));

    match expr.evaluate(&mut env) {
        Ok(Value::Array(premiums)) => {
            println!("computed {} premiums on {} threads", premiums.len(), service.threads());
            println!("first: {}, last: {}", premiums[0], premiums[premiums.len() - 1]);
        }
        Ok(other) => println!("unexpected result: {other}"),
        Err(err) => println!("Evaluation failed: {err}"),
    }
    println!("{:?}", service.stats());
}
