//! Sandboxed condition expression evaluator
//!
//! Branch and loop conditions are plain strings in a restricted,
//! Python-flavoured expression grammar. They are parsed into a typed AST and
//! evaluated against the run's [`WorkflowState`]; no host interpreter is
//! involved, and nothing outside the grammar can execute.
//!
//! Exactly two names are in scope: `state` (the workflow state) and `context`
//! (alias for `state.context`). The only permitted call form is
//! `context.get(key)` / `context.get(key, default)`. Everything else,
//! including any other attribute access, call, or identifier, fails with
//! [`ExprError::NotAllowed`].

use serde_json::Value;
use thiserror::Error;

use crate::state::WorkflowState;

mod parser;

/// Errors raised while parsing or evaluating a condition expression
#[derive(Error, Debug, Clone, PartialEq)]
pub enum ExprError {
    /// The expression uses a construct outside the restricted grammar
    #[error("Expression not allowed: {0}")]
    NotAllowed(String),

    /// The expression is not syntactically valid
    #[error("Expression parse error: {0}")]
    Parse(String),

    /// The expression failed while evaluating against the state
    #[error("Expression evaluation error: {0}")]
    Eval(String),
}

/// Parsed expression tree
#[derive(Debug, Clone, PartialEq)]
pub enum Expr {
    /// Literal value (`None`, `True`, `False`, number, string)
    Literal(Value),
    /// The `state` identifier
    State,
    /// The `context` identifier
    Context,
    /// Subscript access `target[index]`
    Index {
        /// Subscripted expression
        target: Box<Expr>,
        /// Index expression
        index: Box<Expr>,
    },
    /// The `context.get(key)` / `context.get(key, default)` call form
    ContextGet {
        /// Key expression
        key: Box<Expr>,
        /// Optional default expression
        default: Option<Box<Expr>>,
    },
    /// Unary operator application
    Unary(UnaryOp, Box<Expr>),
    /// Binary arithmetic
    Binary {
        /// Operator
        op: BinaryOp,
        /// Left operand
        left: Box<Expr>,
        /// Right operand
        right: Box<Expr>,
    },
    /// Comparison chain (`a < b < c`)
    Compare {
        /// Leftmost operand
        first: Box<Expr>,
        /// Remaining `(operator, operand)` pairs
        rest: Vec<(CompareOp, Expr)>,
    },
    /// Short-circuiting `and` / `or` chain
    BoolChain {
        /// Chain operator
        op: BoolOp,
        /// Operands in source order
        operands: Vec<Expr>,
    },
}

/// Unary operators
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UnaryOp {
    /// Logical `not`
    Not,
    /// Numeric negation
    Neg,
    /// Numeric identity (`+x`)
    Pos,
}

/// Binary arithmetic operators
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BinaryOp {
    /// `+`
    Add,
    /// `-`
    Sub,
    /// `*`
    Mul,
    /// `/` (always produces a float)
    Div,
    /// `%` (result takes the sign of the divisor)
    Mod,
    /// `**`
    Pow,
}

/// Comparison operators
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CompareOp {
    /// `==`
    Eq,
    /// `!=`
    Ne,
    /// `<`
    Lt,
    /// `<=`
    Le,
    /// `>`
    Gt,
    /// `>=`
    Ge,
}

/// Boolean chain operators
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BoolOp {
    /// `and`
    And,
    /// `or`
    Or,
}

/// Parse and evaluate an expression against the given state
pub fn evaluate(source: &str, state: &WorkflowState) -> Result<Value, ExprError> {
    let expr = parser::parse(source)?;
    eval(&expr, state)
}

/// Parse and evaluate an expression, collapsing the result to truthiness
pub fn evaluate_truthy(source: &str, state: &WorkflowState) -> Result<bool, ExprError> {
    Ok(is_truthy(&evaluate(source, state)?))
}

/// Truthiness collapse: null / false / 0 / empty string / empty container
/// are false, everything else is true
pub fn is_truthy(value: &Value) -> bool {
    match value {
        Value::Null => false,
        Value::Bool(b) => *b,
        Value::Number(n) => n.as_f64().is_some_and(|f| f != 0.0),
        Value::String(s) => !s.is_empty(),
        Value::Array(items) => !items.is_empty(),
        Value::Object(map) => !map.is_empty(),
    }
}

fn eval(expr: &Expr, state: &WorkflowState) -> Result<Value, ExprError> {
    match expr {
        Expr::Literal(value) => Ok(value.clone()),
        Expr::State => serde_json::to_value(state)
            .map_err(|e| ExprError::Eval(format!("failed to serialize state: {e}"))),
        Expr::Context => Ok(Value::Object(state.context.clone())),
        Expr::Index { target, index } => {
            let target = eval(target, state)?;
            let index = eval(index, state)?;
            eval_index(&target, &index)
        }
        Expr::ContextGet { key, default } => {
            let key = eval(key, state)?;
            let hit = key.as_str().and_then(|k| state.context.get(k)).cloned();
            match hit {
                Some(value) => Ok(value),
                None => match default {
                    Some(default) => eval(default, state),
                    None => Ok(Value::Null),
                },
            }
        }
        Expr::Unary(op, operand) => {
            let value = eval(operand, state)?;
            eval_unary(*op, &value)
        }
        Expr::Binary { op, left, right } => {
            let left = eval(left, state)?;
            let right = eval(right, state)?;
            eval_binary(*op, &left, &right)
        }
        Expr::Compare { first, rest } => {
            let mut prev = eval(first, state)?;
            for (op, operand) in rest {
                let next = eval(operand, state)?;
                if !compare(*op, &prev, &next)? {
                    return Ok(Value::Bool(false));
                }
                prev = next;
            }
            Ok(Value::Bool(true))
        }
        Expr::BoolChain { op, operands } => {
            // Python semantics: the chain yields the deciding operand value
            let mut last = Value::Null;
            for (i, operand) in operands.iter().enumerate() {
                last = eval(operand, state)?;
                let truthy = is_truthy(&last);
                let decided = match op {
                    BoolOp::And => !truthy,
                    BoolOp::Or => truthy,
                };
                if decided && i + 1 < operands.len() {
                    return Ok(last);
                }
            }
            Ok(last)
        }
    }
}

fn eval_index(target: &Value, index: &Value) -> Result<Value, ExprError> {
    match target {
        Value::Object(map) => {
            let key = index
                .as_str()
                .ok_or_else(|| ExprError::Eval(format!("invalid mapping key: {index}")))?;
            map.get(key)
                .cloned()
                .ok_or_else(|| ExprError::Eval(format!("key '{key}' not found")))
        }
        Value::Array(items) => {
            let idx = resolve_sequence_index(index, items.len())?;
            Ok(items[idx].clone())
        }
        Value::String(s) => {
            let chars: Vec<char> = s.chars().collect();
            let idx = resolve_sequence_index(index, chars.len())?;
            Ok(Value::String(chars[idx].to_string()))
        }
        other => Err(ExprError::Eval(format!(
            "'{}' is not subscriptable",
            type_name(other)
        ))),
    }
}

fn resolve_sequence_index(index: &Value, len: usize) -> Result<usize, ExprError> {
    let raw = index
        .as_i64()
        .ok_or_else(|| ExprError::Eval(format!("sequence index must be an integer, got {index}")))?;
    let resolved = if raw < 0 { raw + len as i64 } else { raw };
    if resolved < 0 || resolved as usize >= len {
        return Err(ExprError::Eval("sequence index out of range".to_string()));
    }
    Ok(resolved as usize)
}

#[derive(Clone, Copy)]
enum Num {
    Int(i64),
    Float(f64),
}

impl Num {
    fn as_f64(self) -> f64 {
        match self {
            Num::Int(i) => i as f64,
            Num::Float(f) => f,
        }
    }
}

fn as_num(value: &Value) -> Option<Num> {
    match value {
        Value::Number(n) => {
            if let Some(i) = n.as_i64() {
                Some(Num::Int(i))
            } else {
                n.as_f64().map(Num::Float)
            }
        }
        _ => None,
    }
}

fn num_value(num: Num) -> Value {
    match num {
        Num::Int(i) => Value::from(i),
        Num::Float(f) => Value::from(f),
    }
}

fn eval_unary(op: UnaryOp, value: &Value) -> Result<Value, ExprError> {
    match op {
        UnaryOp::Not => Ok(Value::Bool(!is_truthy(value))),
        UnaryOp::Neg => match as_num(value) {
            Some(Num::Int(i)) => match i.checked_neg() {
                Some(n) => Ok(Value::from(n)),
                None => Ok(Value::from(-(i as f64))),
            },
            Some(Num::Float(f)) => Ok(Value::from(-f)),
            None => Err(ExprError::Eval(format!(
                "bad operand type for unary -: '{}'",
                type_name(value)
            ))),
        },
        UnaryOp::Pos => match as_num(value) {
            Some(n) => Ok(num_value(n)),
            None => Err(ExprError::Eval(format!(
                "bad operand type for unary +: '{}'",
                type_name(value)
            ))),
        },
    }
}

fn eval_binary(op: BinaryOp, left: &Value, right: &Value) -> Result<Value, ExprError> {
    if let (Some(a), Some(b)) = (as_num(left), as_num(right)) {
        return numeric_op(op, a, b);
    }

    // Non-numeric '+' also concatenates strings and lists
    if op == BinaryOp::Add {
        match (left, right) {
            (Value::String(a), Value::String(b)) => {
                return Ok(Value::String(format!("{a}{b}")));
            }
            (Value::Array(a), Value::Array(b)) => {
                let mut items = a.clone();
                items.extend(b.iter().cloned());
                return Ok(Value::Array(items));
            }
            _ => {}
        }
    }

    Err(ExprError::Eval(format!(
        "unsupported operand types: '{}' and '{}'",
        type_name(left),
        type_name(right)
    )))
}

fn numeric_op(op: BinaryOp, a: Num, b: Num) -> Result<Value, ExprError> {
    use Num::Int;

    match op {
        BinaryOp::Add => Ok(match (a, b) {
            (Int(x), Int(y)) => x
                .checked_add(y)
                .map(Value::from)
                .unwrap_or_else(|| Value::from(x as f64 + y as f64)),
            _ => Value::from(a.as_f64() + b.as_f64()),
        }),
        BinaryOp::Sub => Ok(match (a, b) {
            (Int(x), Int(y)) => x
                .checked_sub(y)
                .map(Value::from)
                .unwrap_or_else(|| Value::from(x as f64 - y as f64)),
            _ => Value::from(a.as_f64() - b.as_f64()),
        }),
        BinaryOp::Mul => Ok(match (a, b) {
            (Int(x), Int(y)) => x
                .checked_mul(y)
                .map(Value::from)
                .unwrap_or_else(|| Value::from(x as f64 * y as f64)),
            _ => Value::from(a.as_f64() * b.as_f64()),
        }),
        BinaryOp::Div => {
            let divisor = b.as_f64();
            if divisor == 0.0 {
                return Err(ExprError::Eval("division by zero".to_string()));
            }
            Ok(Value::from(a.as_f64() / divisor))
        }
        BinaryOp::Mod => match (a, b) {
            (Int(_), Int(0)) => Err(ExprError::Eval("modulo by zero".to_string())),
            (Int(x), Int(y)) => {
                // Result takes the sign of the divisor
                let mut r = x % y;
                if r != 0 && (r < 0) != (y < 0) {
                    r += y;
                }
                Ok(Value::from(r))
            }
            _ => {
                let divisor = b.as_f64();
                if divisor == 0.0 {
                    return Err(ExprError::Eval("modulo by zero".to_string()));
                }
                let mut r = a.as_f64() % divisor;
                if r != 0.0 && (r < 0.0) != (divisor < 0.0) {
                    r += divisor;
                }
                Ok(Value::from(r))
            }
        },
        BinaryOp::Pow => match (a, b) {
            (Int(x), Int(y)) if y >= 0 => {
                let result = u32::try_from(y).ok().and_then(|exp| x.checked_pow(exp));
                Ok(match result {
                    Some(n) => Value::from(n),
                    None => Value::from((x as f64).powf(y as f64)),
                })
            }
            _ => Ok(Value::from(a.as_f64().powf(b.as_f64()))),
        },
    }
}

fn values_equal(left: &Value, right: &Value) -> bool {
    if let (Some(a), Some(b)) = (as_num(left), as_num(right)) {
        return a.as_f64() == b.as_f64();
    }
    left == right
}

fn compare(op: CompareOp, left: &Value, right: &Value) -> Result<bool, ExprError> {
    match op {
        CompareOp::Eq => return Ok(values_equal(left, right)),
        CompareOp::Ne => return Ok(!values_equal(left, right)),
        _ => {}
    }

    let ordering = if let (Some(a), Some(b)) = (as_num(left), as_num(right)) {
        a.as_f64()
            .partial_cmp(&b.as_f64())
            .ok_or_else(|| ExprError::Eval("cannot order NaN".to_string()))?
    } else if let (Value::String(a), Value::String(b)) = (left, right) {
        a.cmp(b)
    } else {
        return Err(ExprError::Eval(format!(
            "'{}' and '{}' are not orderable",
            type_name(left),
            type_name(right)
        )));
    };

    Ok(match op {
        CompareOp::Lt => ordering.is_lt(),
        CompareOp::Le => ordering.is_le(),
        CompareOp::Gt => ordering.is_gt(),
        CompareOp::Ge => ordering.is_ge(),
        CompareOp::Eq | CompareOp::Ne => unreachable!("handled above"),
    })
}

fn type_name(value: &Value) -> &'static str {
    match value {
        Value::Null => "NoneType",
        Value::Bool(_) => "bool",
        Value::Number(n) => {
            if n.is_i64() || n.is_u64() {
                "int"
            } else {
                "float"
            }
        }
        Value::String(_) => "str",
        Value::Array(_) => "list",
        Value::Object(_) => "dict",
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn state_with(context: serde_json::Value) -> WorkflowState {
        let map = match context {
            Value::Object(map) => map,
            _ => panic!("context fixture must be an object"),
        };
        WorkflowState::with_context(map)
    }

    #[test]
    fn test_literals() {
        let state = WorkflowState::new();
        assert_eq!(evaluate("None", &state).unwrap(), json!(null));
        assert_eq!(evaluate("True", &state).unwrap(), json!(true));
        assert_eq!(evaluate("False", &state).unwrap(), json!(false));
        assert_eq!(evaluate("42", &state).unwrap(), json!(42));
        assert_eq!(evaluate("3.5", &state).unwrap(), json!(3.5));
        assert_eq!(evaluate("'hello'", &state).unwrap(), json!("hello"));
        assert_eq!(evaluate("\"world\"", &state).unwrap(), json!("world"));
    }

    #[test]
    fn test_arithmetic_and_precedence() {
        let state = WorkflowState::new();
        assert_eq!(evaluate("1 + 2 * 3", &state).unwrap(), json!(7));
        assert_eq!(evaluate("(1 + 2) * 3", &state).unwrap(), json!(9));
        assert_eq!(evaluate("7 % 3", &state).unwrap(), json!(1));
        assert_eq!(evaluate("-7 % 3", &state).unwrap(), json!(2));
        assert_eq!(evaluate("2 ** 10", &state).unwrap(), json!(1024));
        assert_eq!(evaluate("-2 ** 2", &state).unwrap(), json!(-4));
        assert_eq!(evaluate("10 / 4", &state).unwrap(), json!(2.5));
    }

    #[test]
    fn test_division_by_zero_is_eval_error() {
        let state = WorkflowState::new();
        assert!(matches!(
            evaluate("1 / 0", &state),
            Err(ExprError::Eval(_))
        ));
    }

    #[test]
    fn test_string_concatenation() {
        let state = WorkflowState::new();
        assert_eq!(evaluate("'ab' + 'cd'", &state).unwrap(), json!("abcd"));
    }

    #[test]
    fn test_context_get_with_default() {
        let state = state_with(json!({"issues": 3}));
        assert_eq!(evaluate("context.get('issues', 0)", &state).unwrap(), json!(3));
        assert_eq!(evaluate("context.get('missing', 0)", &state).unwrap(), json!(0));
        assert_eq!(evaluate("context.get('missing')", &state).unwrap(), json!(null));
    }

    #[test]
    fn test_subscripts() {
        let state = state_with(json!({
            "items": [1, 2, 3],
            "nested": {"inner": "value"},
            "word": "abc"
        }));
        assert_eq!(evaluate("context['items'][0]", &state).unwrap(), json!(1));
        assert_eq!(evaluate("context['items'][-1]", &state).unwrap(), json!(3));
        assert_eq!(
            evaluate("context['nested']['inner']", &state).unwrap(),
            json!("value")
        );
        assert_eq!(evaluate("context['word'][1]", &state).unwrap(), json!("b"));
        assert!(matches!(
            evaluate("context['items'][9]", &state),
            Err(ExprError::Eval(_))
        ));
        assert!(matches!(
            evaluate("context['absent']", &state),
            Err(ExprError::Eval(_))
        ));
    }

    #[test]
    fn test_comparisons_and_chaining() {
        let state = state_with(json!({"score": 75}));
        assert_eq!(
            evaluate("context.get('score', 0) > 50", &state).unwrap(),
            json!(true)
        );
        assert_eq!(evaluate("1 < 2 < 3", &state).unwrap(), json!(true));
        assert_eq!(evaluate("1 < 2 < 2", &state).unwrap(), json!(false));
        assert_eq!(evaluate("0 == 0.0", &state).unwrap(), json!(true));
        assert_eq!(evaluate("'a' < 'b'", &state).unwrap(), json!(true));
        assert!(matches!(
            evaluate("'a' < 1", &state),
            Err(ExprError::Eval(_))
        ));
    }

    #[test]
    fn test_boolean_operators_yield_operand_values() {
        let state = state_with(json!({"flag": true}));
        assert_eq!(evaluate("0 or 'fallback'", &state).unwrap(), json!("fallback"));
        assert_eq!(evaluate("1 and 2", &state).unwrap(), json!(2));
        assert_eq!(evaluate("0 and 2", &state).unwrap(), json!(0));
        assert_eq!(evaluate("not context.get('flag')", &state).unwrap(), json!(false));
        assert_eq!(
            evaluate("not context.get('missing')", &state).unwrap(),
            json!(true)
        );
    }

    #[test]
    fn test_truthiness_collapse() {
        assert!(!is_truthy(&json!(null)));
        assert!(!is_truthy(&json!(false)));
        assert!(!is_truthy(&json!(0)));
        assert!(!is_truthy(&json!(0.0)));
        assert!(!is_truthy(&json!("")));
        assert!(!is_truthy(&json!([])));
        assert!(!is_truthy(&json!({})));
        assert!(is_truthy(&json!(true)));
        assert!(is_truthy(&json!(-1)));
        assert!(is_truthy(&json!("x")));
        assert!(is_truthy(&json!([0])));
        assert!(is_truthy(&json!({"k": 0})));
    }

    #[test]
    fn test_state_is_visible_but_opaque() {
        let state = state_with(json!({"k": 1}));
        let value = evaluate("state", &state).unwrap();
        assert_eq!(value["context"]["k"], json!(1));
    }

    #[test]
    fn test_rejects_attribute_access() {
        let state = WorkflowState::new();
        assert!(matches!(
            evaluate("state.context", &state),
            Err(ExprError::NotAllowed(_))
        ));
        assert!(matches!(
            evaluate("context.keys()", &state),
            Err(ExprError::NotAllowed(_))
        ));
        assert!(matches!(
            evaluate("context.get", &state),
            Err(ExprError::NotAllowed(_))
        ));
    }

    #[test]
    fn test_rejects_unknown_names_and_calls() {
        let state = WorkflowState::new();
        assert!(matches!(
            evaluate("__import__('os').system('x')", &state),
            Err(ExprError::NotAllowed(_))
        ));
        assert!(matches!(
            evaluate("open('/etc/passwd')", &state),
            Err(ExprError::NotAllowed(_))
        ));
        assert!(matches!(
            evaluate("context['a']('b')", &state),
            Err(ExprError::NotAllowed(_))
        ));
    }

    #[test]
    fn test_rejects_statements() {
        let state = WorkflowState::new();
        assert!(matches!(
            evaluate("x = 1", &state),
            Err(ExprError::NotAllowed(_))
        ));
        assert!(matches!(
            evaluate("import os", &state),
            Err(ExprError::NotAllowed(_))
        ));
        assert!(evaluate("1 2", &state).is_err());
        assert!(evaluate("", &state).is_err());
    }
}
