//! Postfix (RPN) formulas over variables.
//!
//! A formula is a whitespace separated list of numbers, `${variable}`
//! references and operators, evaluated left to right on a single stack:
//!
//! ```rust
//! use cockpitdecks::formula::{Formula, OperatorTable, evaluate};
//! use cockpitdecks::variables::{Value, VariableStore};
//!
//! let store = VariableStore::new();
//! store.set("sim/gear/deploy", 0.6);
//! let formula = Formula::parse("${sim/gear/deploy} 0.5 gt").unwrap();
//! let value = evaluate(&formula, &store, &OperatorTable::default()).unwrap();
//! assert_eq!(value, Value::Number(1.0));
//! ```
//!
//! Evaluation is pure: nothing is cached and nothing is written.

use std::collections::HashMap;

use thiserror::Error;

mod format;
mod operators;

pub use format::{FORMULA_PLACEHOLDER, NumberFormat, TextTemplate, evaluate_formatted, format_value};
pub use operators::{NumericFn, Operator, OperatorTable, StackOp};

use crate::variables::{Value, VariableStore};

/// Why a formula produced no value
#[derive(Error, Debug, Clone, PartialEq)]
pub enum EvaluationError {
    /// An operator found fewer operands than it needs
    #[error("stack underflow at '{operator}'")]
    StackUnderflow {
        /// Offending operator
        operator: String,
    },
    /// `/`, `%` or `mod` by zero
    #[error("division by zero")]
    DivisionByZero,
    /// Token is neither a number, a reference nor a known operator
    #[error("unknown operator '{0}'")]
    UnknownOperator(String),
    /// A referenced variable has no value yet
    #[error("variable '{0}' has no value")]
    Unresolved(String),
    /// A numeric operator met text or a vector
    #[error("'{operator}' needs numeric operands")]
    TypeMismatch {
        /// Offending operator
        operator: String,
    },
    /// More than one value remained at the end
    #[error("{0} values left on the stack")]
    Leftover(usize),
    /// Nothing to evaluate, or nothing left at the end
    #[error("empty formula")]
    Empty,
    /// `${` without its closing brace, or an empty name
    #[error("malformed variable reference '{0}'")]
    MalformedReference(String),
}

/// One formula token
#[derive(Clone, Debug, PartialEq)]
pub enum Token {
    /// Numeric literal
    Number(f64),
    /// `${name}`
    Variable(String),
    /// Anything else, looked up in the operator table
    Operator(String),
}

/// A parsed formula
#[derive(Clone, Debug, PartialEq)]
pub struct Formula {
    text: String,
    tokens: Vec<Token>,
}

fn looks_numeric(token: &str) -> bool {
    let unsigned = token.strip_prefix(['-', '+']).unwrap_or(token);
    unsigned
        .chars()
        .next()
        .is_some_and(|c| c.is_ascii_digit() || c == '.')
}

impl Formula {
    /// Tokenize `text`
    pub fn parse(text: &str) -> Result<Self, EvaluationError> {
        let mut tokens = Vec::new();
        for raw in text.split_whitespace() {
            let token = if let Some(rest) = raw.strip_prefix("${") {
                match rest.strip_suffix('}') {
                    Some(name) if !name.is_empty() && !name.contains(['{', '}']) => {
                        Token::Variable(name.to_string())
                    }
                    _ => return Err(EvaluationError::MalformedReference(raw.to_string())),
                }
            } else if looks_numeric(raw) {
                match raw.parse::<f64>() {
                    Ok(number) => Token::Number(number),
                    Err(_) => Token::Operator(raw.to_string()),
                }
            } else {
                Token::Operator(raw.to_string())
            };
            tokens.push(token);
        }
        if tokens.is_empty() {
            return Err(EvaluationError::Empty);
        }
        Ok(Self {
            text: text.to_string(),
            tokens,
        })
    }

    /// Source text
    pub fn text(&self) -> &str {
        &self.text
    }

    /// Parsed tokens
    pub fn tokens(&self) -> &[Token] {
        &self.tokens
    }

    /// Names of referenced variables, in order of first appearance
    pub fn variables(&self) -> Vec<&str> {
        let mut names: Vec<&str> = Vec::new();
        for token in &self.tokens {
            if let Token::Variable(name) = token
                && !names.contains(&name.as_str())
            {
                names.push(name);
            }
        }
        names
    }
}

/// Source of variable values during evaluation
pub trait VariableResolver {
    /// Current value, [`Value::Unset`] when unknown
    fn resolve(&self, name: &str) -> Value;
}

impl VariableResolver for VariableStore {
    fn resolve(&self, name: &str) -> Value {
        self.get(name)
    }
}

impl VariableResolver for HashMap<String, Value> {
    fn resolve(&self, name: &str) -> Value {
        self.get(name).cloned().unwrap_or_default()
    }
}

fn pop_operands(
    stack: &mut Vec<Value>,
    count: usize,
    operator: &str,
) -> Result<Vec<Value>, EvaluationError> {
    if stack.len() < count {
        return Err(EvaluationError::StackUnderflow {
            operator: operator.to_string(),
        });
    }
    Ok(stack.split_off(stack.len() - count))
}

fn values_equal(a: &Value, b: &Value) -> bool {
    match (a.as_number(), b.as_number()) {
        (Some(x), Some(y)) => x == y,
        _ => a == b,
    }
}

/// Evaluate `formula` against `resolver`.
///
/// Exactly one value must remain on the stack at the end.
pub fn evaluate<R: VariableResolver + ?Sized>(
    formula: &Formula,
    resolver: &R,
    operators: &OperatorTable,
) -> Result<Value, EvaluationError> {
    let mut stack: Vec<Value> = Vec::with_capacity(formula.tokens.len());

    for token in &formula.tokens {
        match token {
            Token::Number(number) => stack.push(Value::Number(*number)),
            Token::Variable(name) => match resolver.resolve(name) {
                Value::Unset => return Err(EvaluationError::Unresolved(name.clone())),
                value => stack.push(value),
            },
            Token::Operator(name) => {
                let operator = operators
                    .get(name)
                    .ok_or_else(|| EvaluationError::UnknownOperator(name.clone()))?;
                apply(operator, name, &mut stack)?;
            }
        }
    }

    match stack.len() {
        0 => Err(EvaluationError::Empty),
        1 => stack.pop().ok_or(EvaluationError::Empty),
        n => Err(EvaluationError::Leftover(n)),
    }
}

fn apply(operator: &Operator, name: &str, stack: &mut Vec<Value>) -> Result<(), EvaluationError> {
    match operator {
        Operator::Numeric { arity, apply } => {
            let operands = pop_operands(stack, *arity, name)?;
            let numbers = operands
                .iter()
                .map(|v| v.as_number())
                .collect::<Option<Vec<f64>>>()
                .ok_or_else(|| EvaluationError::TypeMismatch {
                    operator: name.to_string(),
                })?;
            stack.push(Value::Number(apply(&numbers)?));
        }
        Operator::Stack(StackOp::Eq) | Operator::Stack(StackOp::Ne) => {
            let operands = pop_operands(stack, 2, name)?;
            let equal = values_equal(&operands[0], &operands[1]);
            let result = if matches!(operator, Operator::Stack(StackOp::Eq)) {
                equal
            } else {
                !equal
            };
            stack.push(Value::from(result));
        }
        Operator::Stack(StackOp::Dup) => {
            let top = stack
                .last()
                .cloned()
                .ok_or_else(|| EvaluationError::StackUnderflow {
                    operator: name.to_string(),
                })?;
            stack.push(top);
        }
        Operator::Stack(StackOp::Swap) => {
            let mut operands = pop_operands(stack, 2, name)?;
            operands.reverse();
            stack.extend(operands);
        }
        Operator::Stack(StackOp::Drop) => {
            pop_operands(stack, 1, name)?;
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn eval(text: &str) -> Result<Value, EvaluationError> {
        let store = VariableStore::new();
        store.set("sim/a", 4.0);
        store.set("sim/b", 2.0);
        store.set("sim/tail", "N123AB");
        evaluate(&Formula::parse(text)?, &store, &OperatorTable::default())
    }

    fn number(text: &str) -> f64 {
        eval(text).unwrap().as_number().unwrap()
    }

    #[test]
    fn arithmetic_is_postfix() {
        assert_eq!(number("${sim/a} ${sim/b} -"), 2.0);
        assert_eq!(number("${sim/a} ${sim/b} /"), 2.0);
        assert_eq!(number("3 4 + 2 *"), 14.0);
        assert_eq!(number("-7 3 mod"), 2.0);
        assert_eq!(number("2.5 chs abs"), 2.5);
        assert_eq!(number("3.14159 2 roundn"), 3.14);
    }

    #[test]
    fn comparisons_push_flags() {
        assert_eq!(number("1 2 lt"), 1.0);
        assert_eq!(number("1 2 gt"), 0.0);
        assert_eq!(number("2 2 le"), 1.0);
        assert_eq!(number("2 2 ge"), 1.0);
        assert_eq!(number("2 3 ne"), 1.0);
        assert_eq!(number("1 0 and"), 0.0);
        assert_eq!(number("1 0 or"), 1.0);
        assert_eq!(number("0 not"), 1.0);
    }

    #[test]
    fn text_values_compare_for_equality() {
        let store = VariableStore::new();
        store.set("sim/tail", "N123AB");
        store.set("sim/other", "N123AB");
        let formula = Formula::parse("${sim/tail} ${sim/other} eq").unwrap();
        assert_eq!(
            evaluate(&formula, &store, &OperatorTable::default()).unwrap(),
            Value::Number(1.0)
        );
    }

    #[test]
    fn domain_helpers() {
        assert_eq!(number("150 0 100 clamp"), 100.0);
        assert!((number("90 sin") - 1.0).abs() < 1e-12);
        assert!((number("180 rad") - std::f64::consts::PI).abs() < 1e-12);
        assert_eq!(number("2 dup *"), 4.0);
        assert_eq!(number("1 2 swap -"), 1.0);
        assert_eq!(number("1 2 drop"), 1.0);
    }

    #[test]
    fn errors_are_values_not_panics() {
        assert_eq!(eval("1 0 /"), Err(EvaluationError::DivisionByZero));
        assert_eq!(eval("1 0 mod"), Err(EvaluationError::DivisionByZero));
        assert_eq!(
            eval("1 +"),
            Err(EvaluationError::StackUnderflow {
                operator: "+".to_string()
            })
        );
        assert_eq!(
            eval("1 2 frobnicate"),
            Err(EvaluationError::UnknownOperator("frobnicate".to_string()))
        );
        assert_eq!(eval("1 2"), Err(EvaluationError::Leftover(2)));
        assert_eq!(eval("1 drop"), Err(EvaluationError::Empty));
        assert_eq!(
            eval("${sim/missing} 1 +"),
            Err(EvaluationError::Unresolved("sim/missing".to_string()))
        );
        assert_eq!(
            eval("${sim/tail} 1 +"),
            Err(EvaluationError::TypeMismatch {
                operator: "+".to_string()
            })
        );
    }

    #[test]
    fn parse_rejects_broken_references_and_blank_input() {
        assert_eq!(
            Formula::parse("${sim/a 1 +"),
            Err(EvaluationError::MalformedReference("${sim/a".to_string()))
        );
        assert_eq!(Formula::parse("   "), Err(EvaluationError::Empty));
    }

    #[test]
    fn variables_are_listed_once() {
        let formula = Formula::parse("${a} ${b} + ${a} *").unwrap();
        assert_eq!(formula.variables(), vec!["a", "b"]);
    }

    fn well_formed() -> impl Strategy<Value = String> {
        // Start with one literal, then pair every further literal with a binary operator.
        let step = (
            1.0f64..1000.0,
            prop::sample::select(vec!["+", "-", "*", "min", "max", "lt", "ge", "and"]),
        );
        (1.0f64..1000.0, prop::collection::vec(step, 0..12)).prop_map(|(first, steps)| {
            let mut text = format!("{first}");
            for (operand, operator) in steps {
                text.push_str(&format!(" {operand} {operator}"));
            }
            text
        })
    }

    proptest! {
        #[test]
        fn well_formed_formulas_always_evaluate(text in well_formed()) {
            let formula = Formula::parse(&text).unwrap();
            let value = evaluate(&formula, &VariableStore::new(), &OperatorTable::default());
            prop_assert!(value.is_ok(), "{} gave {:?}", text, value);
        }

        #[test]
        fn underflow_is_deterministic(count in 0usize..2, operator in prop::sample::select(vec!["+", "*", "clamp", "swap"])) {
            let text = std::iter::repeat_n("1", count).chain([operator]).collect::<Vec<_>>().join(" ");
            let formula = Formula::parse(&text).unwrap();
            let first = evaluate(&formula, &VariableStore::new(), &OperatorTable::default());
            let second = evaluate(&formula, &VariableStore::new(), &OperatorTable::default());
            prop_assert!(matches!(first, Err(EvaluationError::StackUnderflow { .. })), "{} gave {:?}", text, first);
            prop_assert_eq!(first, second);
        }
    }
}
