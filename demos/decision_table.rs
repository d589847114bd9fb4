use std::sync::Arc;

use rulebind::{
    Binder, CastResolver, CompareOp, DecisionTableBuilder, RuntimeEnv, StandardCasts, SyntaxNode,
    TypeRegistry, Value,
};

fn main() {
    let registry = TypeRegistry::new();
    let int = registry.get("int").expect("int is built in");
    let double = registry.get("double").expect("double is built in");
    let string = registry.get("String").expect("String is built in");
    let casts = StandardCasts::new(&registry);

    // Cells are written as whole numbers; the input is a double, so the cells
    // are converted once at compile time.
    let table = DecisionTableBuilder::new("risk_band", string)
        .condition("score", double, int, CompareOp::Gte)
        .row(|r| r.when(800).then("low"))
        .row(|r| r.when(650).then("medium"))
        .row(|r| r.any().then("high"))
        .compile(&casts)
        .expect("failed to compile decision table");

    for condition in table.conditions() {
        println!("{}: {:?}", condition.name(), condition.casts());
    }

    // Expose the table as a function and call it over an array of scores
    let method = Arc::new(table).into_method("Underwriting");
    let resolver: Arc<dyn CastResolver> = Arc::new(casts);
    let binder = Binder::new(Arc::new(registry), resolver).with_function(method);
    let expr = binder
        .bind_with_params(
            &[("scores", "double[]")],
            &SyntaxNode::call("risk_band", vec![SyntaxNode::ident("scores")]),
        )
        .into_result()
        .expect("failed to bind expression");

    let mut env = RuntimeEnv::new();
    env.set_local(
        0,
        Value::from(vec![Value::Float(812.5), Value::Float(700.0), Value::Float(410.0)]),
    );
    match expr.evaluate(&mut env) {
        Ok(value) => println!("Result: {value}"),
        Err(err) => println!("Evaluation failed: {err}"),
    }
}
