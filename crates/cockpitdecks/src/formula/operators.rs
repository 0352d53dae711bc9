use std::{collections::HashMap, fmt, sync::Arc};

use super::EvaluationError;
use crate::variables::round_to;

/// Numeric operator body: receives exactly `arity` operands, deepest first.
pub type NumericFn = Arc<dyn Fn(&[f64]) -> Result<f64, EvaluationError> + Send + Sync>;

/// Operators that work on the stack itself rather than on numbers.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum StackOp {
    /// Equality over numbers or text, pushes 1/0
    Eq,
    /// Inequality over numbers or text, pushes 1/0
    Ne,
    /// Duplicate the top value
    Dup,
    /// Swap the two top values
    Swap,
    /// Discard the top value
    Drop,
}

/// An entry of the [`OperatorTable`]
#[derive(Clone)]
pub enum Operator {
    /// Pops `arity` numbers, pushes one
    Numeric {
        /// Operand count
        arity: usize,
        /// Implementation
        apply: NumericFn,
    },
    /// Built-in stack manipulation
    Stack(StackOp),
}

impl fmt::Debug for Operator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Operator::Numeric { arity, .. } => write!(f, "Numeric({arity})"),
            Operator::Stack(op) => write!(f, "Stack({op:?})"),
        }
    }
}

/// Name to operator map used by the evaluator.
///
/// [`OperatorTable::default`] holds the builtin set; hosts add their own with
/// [`OperatorTable::register`].
#[derive(Clone, Debug)]
pub struct OperatorTable {
    operators: HashMap<String, Operator>,
}

fn flag(value: bool) -> f64 {
    if value { 1.0 } else { 0.0 }
}

fn floored_mod(a: f64, b: f64) -> Result<f64, EvaluationError> {
    if b == 0.0 {
        return Err(EvaluationError::DivisionByZero);
    }
    Ok(a - b * (a / b).floor())
}

impl Default for OperatorTable {
    fn default() -> Self {
        let mut table = Self {
            operators: HashMap::new(),
        };

        table.register("+", 2, |v| Ok(v[0] + v[1]));
        table.register("-", 2, |v| Ok(v[0] - v[1]));
        table.register("*", 2, |v| Ok(v[0] * v[1]));
        table.register("/", 2, |v| {
            if v[1] == 0.0 {
                Err(EvaluationError::DivisionByZero)
            } else {
                Ok(v[0] / v[1])
            }
        });
        table.register("%", 2, |v| floored_mod(v[0], v[1]));
        table.register("mod", 2, |v| floored_mod(v[0], v[1]));
        table.register("abs", 1, |v| Ok(v[0].abs()));
        table.register("chs", 1, |v| Ok(-v[0]));
        table.register("floor", 1, |v| Ok(v[0].floor()));
        table.register("ceil", 1, |v| Ok(v[0].ceil()));
        table.register("round", 1, |v| Ok(v[0].round()));
        table.register("roundn", 2, |v| Ok(round_to(v[0], v[1] as i32)));
        table.register("sqrt", 1, |v| Ok(v[0].sqrt()));
        table.register("min", 2, |v| Ok(v[0].min(v[1])));
        table.register("max", 2, |v| Ok(v[0].max(v[1])));

        table.register("lt", 2, |v| Ok(flag(v[0] < v[1])));
        table.register("gt", 2, |v| Ok(flag(v[0] > v[1])));
        table.register("le", 2, |v| Ok(flag(v[0] <= v[1])));
        table.register("ge", 2, |v| Ok(flag(v[0] >= v[1])));

        table.register("and", 2, |v| Ok(flag(v[0] != 0.0 && v[1] != 0.0)));
        table.register("or", 2, |v| Ok(flag(v[0] != 0.0 || v[1] != 0.0)));
        table.register("not", 1, |v| Ok(flag(v[0] == 0.0)));

        table.register("clamp", 3, |v| Ok(v[0].max(v[1]).min(v[2])));
        table.register("deg", 1, |v| Ok(v[0].to_degrees()));
        table.register("rad", 1, |v| Ok(v[0].to_radians()));
        table.register("sin", 1, |v| Ok(v[0].to_radians().sin()));
        table.register("cos", 1, |v| Ok(v[0].to_radians().cos()));

        table.insert("eq", Operator::Stack(StackOp::Eq));
        table.insert("ne", Operator::Stack(StackOp::Ne));
        table.insert("dup", Operator::Stack(StackOp::Dup));
        table.insert("swap", Operator::Stack(StackOp::Swap));
        table.insert("drop", Operator::Stack(StackOp::Drop));

        table
    }
}

impl OperatorTable {
    /// A table without any operator
    pub fn empty() -> Self {
        Self {
            operators: HashMap::new(),
        }
    }

    /// Add or replace a numeric operator
    ///
    /// ```rust
    /// use cockpitdecks::formula::{Formula, OperatorTable, evaluate};
    /// use cockpitdecks::variables::{Value, VariableStore};
    ///
    /// let mut ops = OperatorTable::default();
    /// ops.register("inhg", 1, |v| Ok(v[0] / 33.8639));
    /// let formula = Formula::parse("1013.25 inhg 2 roundn").unwrap();
    /// let value = evaluate(&formula, &VariableStore::new(), &ops).unwrap();
    /// assert_eq!(value, Value::Number(29.92));
    /// ```
    pub fn register(
        &mut self,
        name: &str,
        arity: usize,
        apply: impl Fn(&[f64]) -> Result<f64, EvaluationError> + Send + Sync + 'static,
    ) -> &mut Self {
        self.insert(
            name,
            Operator::Numeric {
                arity,
                apply: Arc::new(apply),
            },
        );
        self
    }

    fn insert(&mut self, name: &str, operator: Operator) {
        self.operators.insert(name.to_string(), operator);
    }

    /// Look up an operator by name
    pub fn get(&self, name: &str) -> Option<&Operator> {
        self.operators.get(name)
    }

    /// True if `name` is known
    pub fn contains(&self, name: &str) -> bool {
        self.operators.contains_key(name)
    }
}
