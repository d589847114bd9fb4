use std::sync::Arc;

use rulebind::{
    Binder, CastResolver, ObjectValue, OpenClass, OpenField, OpenMethod, RuntimeEnv,
    StandardCasts, SyntaxNode, TypeRegistry, Value,
};

fn main() {
    // Publish the host types
    let mut registry = TypeRegistry::new();
    let object = registry.get("Object");
    registry.register(OpenClass::reference("Driver", object));
    let int = registry.get("int").expect("int is built in");
    let double = registry.get("double").expect("double is built in");
    registry.add_field(OpenField::instance("age", "Driver", int.clone()));

    // Two overloads: the binder picks the closer one for each call site
    let surcharge_int = OpenMethod::native(
        "surcharge",
        "Tariff",
        vec![int.clone()],
        double.clone(),
        |_, args, _| {
            let age = args[0].as_int().unwrap_or_default();
            Ok(Value::Float(if age < 25 { 250.0 } else { 0.0 }))
        },
    );
    let surcharge_double = OpenMethod::native(
        "surcharge",
        "Tariff",
        vec![double.clone()],
        double,
        |_, args, _| Ok(Value::Float(args[0].as_float().unwrap_or_default() * 10.0)),
    );

    let resolver: Arc<dyn CastResolver> = Arc::new(StandardCasts::new(&registry));
    let binder = Binder::new(Arc::new(registry), resolver)
        .with_function(surcharge_int)
        .with_function(surcharge_double);

    // surcharge(driver.age)
    let expr = binder
        .bind_with_params(
            &[("driver", "Driver")],
            &SyntaxNode::call(
                "surcharge",
                vec![SyntaxNode::field(SyntaxNode::ident("driver"), "age")],
            ),
        )
        .into_result()
        .expect("failed to bind expression");

    println!("depends on:");
    for member in expr.dependencies.iter() {
        println!("  {member}");
    }

    let mut env = RuntimeEnv::new();
    env.set_local(0, ObjectValue::new("Driver").with("age", 22).into());
    match expr.evaluate(&mut env) {
        Ok(value) => println!("Result: {value}"),
        Err(err) => println!("Evaluation failed: {err}"),
    }
}
