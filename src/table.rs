//! Decision tables: rows of condition cells matched against typed inputs.

use std::collections::HashSet;
use std::sync::Arc;

use tracing::{debug, trace};

use crate::condition::{find_condition_casts, ConditionCasts};
use crate::error::EvalError;
use crate::types::{CastResolver, CompareOp, CompileError, OpenClass, OpenMethod};
use crate::Value;

/// Builder for a [`DecisionTable`].
///
/// # Example
///
/// ```
/// use rulebind::{CompareOp, DecisionTableBuilder, StandardCasts, TypeRegistry, Value};
///
/// let reg = TypeRegistry::new();
/// let int = reg.get("int").unwrap();
/// let table = DecisionTableBuilder::new("discount", reg.get("double").unwrap())
///     .condition("age", int.clone(), int.clone(), CompareOp::Gte)
///     .row(|r| r.when(65).then(0.3))
///     .row(|r| r.any().then(0.0))
///     .compile(&StandardCasts::new(&reg))
///     .unwrap();
/// assert_eq!(table.evaluate(&[Value::Int(70)]).unwrap(), Value::Float(0.3));
/// ```
#[derive(Debug)]
pub struct DecisionTableBuilder {
    name: String,
    return_type: Arc<OpenClass>,
    conditions: Vec<ConditionDecl>,
    rows: Vec<Row>,
}

#[derive(Debug)]
struct ConditionDecl {
    name: String,
    input_type: Arc<OpenClass>,
    param_type: Arc<OpenClass>,
    op: CompareOp,
}

/// One cell of a row.
#[derive(Debug, Clone, PartialEq)]
pub enum Cell {
    /// Matches every input.
    Any,
    Value(Value),
}

#[derive(Debug, Clone)]
struct Row {
    cells: Vec<Cell>,
    result: Value,
}

/// Intermediate builder passed to the row definition closure. Cells are
/// given in condition order.
#[derive(Debug, Default)]
pub struct RowBuilder {
    cells: Vec<Cell>,
    result: Value,
}

impl RowBuilder {
    #[must_use]
    pub fn when(mut self, value: impl Into<Value>) -> Self {
        self.cells.push(Cell::Value(value.into()));
        self
    }

    #[must_use]
    pub fn any(mut self) -> Self {
        self.cells.push(Cell::Any);
        self
    }

    /// Result returned when the row matches. Defaults to null.
    #[must_use]
    pub fn then(mut self, result: impl Into<Value>) -> Self {
        self.result = result.into();
        self
    }
}

impl DecisionTableBuilder {
    #[must_use]
    pub fn new(name: &str, return_type: Arc<OpenClass>) -> Self {
        Self {
            name: name.to_owned(),
            return_type,
            conditions: Vec::new(),
            rows: Vec::new(),
        }
    }

    /// Declare a condition comparing an input of `input_type` against cells
    /// typed as `param_type`: a row matches when `input <op> cell`.
    #[must_use]
    pub fn condition(
        mut self,
        name: &str,
        input_type: Arc<OpenClass>,
        param_type: Arc<OpenClass>,
        op: CompareOp,
    ) -> Self {
        self.conditions.push(ConditionDecl {
            name: name.to_owned(),
            input_type,
            param_type,
            op,
        });
        self
    }

    #[must_use]
    pub fn row(mut self, f: impl FnOnce(RowBuilder) -> RowBuilder) -> Self {
        let builder = f(RowBuilder::default());
        self.rows.push(Row {
            cells: builder.cells,
            result: builder.result,
        });
        self
    }

    /// Validate the table and plan each condition's conversion.
    ///
    /// Cells of conditions converted toward the input type are converted
    /// here, once, rather than on every evaluation.
    ///
    /// # Errors
    ///
    /// Returns [`CompileError`] for an empty table, a duplicate condition or
    /// a row whose cell count differs from the condition count.
    pub fn compile(self, resolver: &dyn CastResolver) -> Result<DecisionTable, CompileError> {
        if self.conditions.is_empty() {
            return Err(CompileError::NoConditions { table: self.name });
        }
        if self.rows.is_empty() {
            return Err(CompileError::NoRows { table: self.name });
        }
        let mut seen = HashSet::new();
        for condition in &self.conditions {
            if !seen.insert(condition.name.as_str()) {
                return Err(CompileError::DuplicateCondition {
                    table: self.name.clone(),
                    condition: condition.name.clone(),
                });
            }
        }
        for (index, row) in self.rows.iter().enumerate() {
            if row.cells.len() != self.conditions.len() {
                return Err(CompileError::RowArity {
                    table: self.name.clone(),
                    row: index,
                    expected: self.conditions.len(),
                    found: row.cells.len(),
                });
            }
        }

        let conditions: Vec<Condition> = self
            .conditions
            .into_iter()
            .map(|decl| Condition {
                casts: find_condition_casts(&decl.param_type, &decl.input_type, resolver),
                name: decl.name,
                input_type: decl.input_type,
                param_type: decl.param_type,
                op: decl.op,
            })
            .collect();

        let rows: Vec<Row> = self
            .rows
            .into_iter()
            .map(|row| Row {
                cells: row
                    .cells
                    .into_iter()
                    .zip(&conditions)
                    .map(|(cell, condition)| match cell {
                        Cell::Value(v) => Cell::Value(condition.casts.convert_condition(v)),
                        Cell::Any => Cell::Any,
                    })
                    .collect(),
                result: row.result,
            })
            .collect();

        debug!(
            table = %self.name,
            conditions = conditions.len(),
            rows = rows.len(),
            "compiled decision table"
        );
        Ok(DecisionTable {
            name: self.name,
            return_type: self.return_type,
            conditions,
            rows,
        })
    }
}

/// A compiled condition and its conversion plan.
#[derive(Debug, Clone)]
pub struct Condition {
    name: String,
    input_type: Arc<OpenClass>,
    param_type: Arc<OpenClass>,
    op: CompareOp,
    casts: ConditionCasts,
}

impl Condition {
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    #[must_use]
    pub fn input_type(&self) -> &Arc<OpenClass> {
        &self.input_type
    }

    #[must_use]
    pub fn param_type(&self) -> &Arc<OpenClass> {
        &self.param_type
    }

    #[must_use]
    pub fn op(&self) -> CompareOp {
        self.op
    }

    #[must_use]
    pub fn casts(&self) -> &ConditionCasts {
        &self.casts
    }
}

/// A compiled, immutable decision table. Thread-safe and designed to live
/// behind `Arc`.
#[derive(Debug, Clone)]
pub struct DecisionTable {
    name: String,
    return_type: Arc<OpenClass>,
    conditions: Vec<Condition>,
    rows: Vec<Row>,
}

impl DecisionTable {
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    #[must_use]
    pub fn conditions(&self) -> &[Condition] {
        &self.conditions
    }

    #[must_use]
    pub fn row_count(&self) -> usize {
        self.rows.len()
    }

    /// Result of the first row whose every cell matches, or null if none does.
    ///
    /// # Errors
    ///
    /// [`EvalError::TableArity`] if `inputs` does not have one value per condition.
    pub fn evaluate(&self, inputs: &[Value]) -> Result<Value, EvalError> {
        if inputs.len() != self.conditions.len() {
            return Err(EvalError::TableArity {
                table: self.name.clone(),
                expected: self.conditions.len(),
                found: inputs.len(),
            });
        }
        let inputs: Vec<Value> = inputs
            .iter()
            .zip(&self.conditions)
            .map(|(input, condition)| condition.casts.convert_input(input.clone()))
            .collect();

        let matched = self.rows.iter().position(|row| {
            row.cells
                .iter()
                .zip(&inputs)
                .zip(&self.conditions)
                .all(|((cell, input), condition)| match cell {
                    Cell::Any => true,
                    Cell::Value(v) => input.compare(condition.op, v) == Some(true),
                })
        });
        match matched {
            Some(row) => {
                trace!(table = %self.name, row, "decision table row matched");
                Ok(self.rows[row].result.clone())
            }
            None => Ok(Value::Null),
        }
    }

    /// Expose the table as a static method taking one argument per condition,
    /// typed by the condition's input type.
    #[must_use]
    pub fn into_method(self: Arc<Self>, declaring_class: &str) -> OpenMethod {
        let params = self
            .conditions
            .iter()
            .map(|c| Arc::clone(&c.input_type))
            .collect();
        let return_type = Arc::clone(&self.return_type);
        let name = self.name.clone();
        OpenMethod::native(&name, declaring_class, params, return_type, move |_, args, _| {
            self.evaluate(args)
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::env::RuntimeEnv;
    use crate::types::{StandardCasts, TypeRegistry};

    fn ty(reg: &TypeRegistry, name: &str) -> Arc<OpenClass> {
        reg.get(name).unwrap()
    }

    fn rate_table(reg: &TypeRegistry) -> DecisionTable {
        DecisionTableBuilder::new("rate", ty(reg, "double"))
            .condition("age", ty(reg, "int"), ty(reg, "int"), CompareOp::Lt)
            .condition("region", ty(reg, "String"), ty(reg, "String"), CompareOp::Eq)
            .row(|r| r.when(25).when("EU").then(1.5))
            .row(|r| r.when(25).any().then(1.8))
            .row(|r| r.any().when("EU").then(1.0))
            .compile(&StandardCasts::new(reg))
            .unwrap()
    }

    #[test]
    fn first_matching_row_wins() {
        let reg = TypeRegistry::new();
        let table = rate_table(&reg);
        let eval = |age: i64, region: &str| {
            table
                .evaluate(&[Value::Int(age), Value::from(region)])
                .unwrap()
        };
        assert_eq!(eval(20, "EU"), Value::Float(1.5));
        assert_eq!(eval(20, "US"), Value::Float(1.8));
        assert_eq!(eval(40, "EU"), Value::Float(1.0));
        assert_eq!(eval(40, "US"), Value::Null);
    }

    #[test]
    fn input_is_converted_toward_condition_type() {
        let reg = TypeRegistry::new();
        let table = DecisionTableBuilder::new("band", ty(&reg, "int"))
            .condition("amount", ty(&reg, "int"), ty(&reg, "double"), CompareOp::Gte)
            .row(|r| r.when(99.5).then(2))
            .row(|r| r.any().then(1))
            .compile(&StandardCasts::new(&reg))
            .unwrap();
        assert!(matches!(table.conditions()[0].casts(), ConditionCasts::ToCondition(_)));
        assert_eq!(table.evaluate(&[Value::Int(100)]).unwrap(), Value::Int(2));
        assert_eq!(table.evaluate(&[Value::Int(99)]).unwrap(), Value::Int(1));
    }

    #[test]
    fn cells_are_converted_toward_input_type() {
        let reg = TypeRegistry::new();
        let table = DecisionTableBuilder::new("band", ty(&reg, "int"))
            .condition("amount", ty(&reg, "double"), ty(&reg, "int"), CompareOp::Gte)
            .row(|r| r.when(100).then(2))
            .row(|r| r.any().then(1))
            .compile(&StandardCasts::new(&reg))
            .unwrap();
        assert!(matches!(table.conditions()[0].casts(), ConditionCasts::ToInput(_)));
        assert_eq!(table.evaluate(&[Value::Float(100.0)]).unwrap(), Value::Int(2));
        assert_eq!(table.evaluate(&[Value::Float(99.9)]).unwrap(), Value::Int(1));
    }

    #[test]
    fn compile_errors() {
        let reg = TypeRegistry::new();
        let casts = StandardCasts::new(&reg);
        let int = ty(&reg, "int");

        let err = DecisionTableBuilder::new("t", int.clone())
            .row(|r| r.then(1))
            .compile(&casts)
            .unwrap_err();
        assert_eq!(err, CompileError::NoConditions { table: "t".into() });

        let err = DecisionTableBuilder::new("t", int.clone())
            .condition("a", int.clone(), int.clone(), CompareOp::Eq)
            .compile(&casts)
            .unwrap_err();
        assert_eq!(err, CompileError::NoRows { table: "t".into() });

        let err = DecisionTableBuilder::new("t", int.clone())
            .condition("a", int.clone(), int.clone(), CompareOp::Eq)
            .condition("a", int.clone(), int.clone(), CompareOp::Eq)
            .row(|r| r.any().any())
            .compile(&casts)
            .unwrap_err();
        assert!(matches!(err, CompileError::DuplicateCondition { .. }));

        let err = DecisionTableBuilder::new("t", int.clone())
            .condition("a", int.clone(), int.clone(), CompareOp::Eq)
            .row(|r| r.any())
            .row(|r| r.when(1).when(2))
            .compile(&casts)
            .unwrap_err();
        assert_eq!(
            err,
            CompileError::RowArity {
                table: "t".into(),
                row: 1,
                expected: 1,
                found: 2,
            }
        );
    }

    #[test]
    fn wrong_input_count_is_an_error() {
        let reg = TypeRegistry::new();
        let table = rate_table(&reg);
        assert!(matches!(
            table.evaluate(&[Value::Int(1)]),
            Err(EvalError::TableArity { expected: 2, found: 1, .. })
        ));
    }

    #[test]
    fn table_as_method() {
        let reg = TypeRegistry::new();
        let method = Arc::new(rate_table(&reg)).into_method("Tariffs");
        assert_eq!(method.signature(), "rate(int, String)");
        let mut env = RuntimeEnv::new();
        assert_eq!(
            method
                .invoke(None, vec![Value::Int(30), Value::from("EU")], &mut env)
                .unwrap(),
            Value::Float(1.0)
        );
    }
}
