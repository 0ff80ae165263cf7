//! AST walker and the variable context it runs against.

use std::cmp::Ordering;
use std::collections::HashMap;

use crate::error::ExprError;
use crate::parser::{BinaryOp, Expr, UnaryOp};
use crate::value::Value;

/// Per-evaluation variable bindings. Built fresh for every message;
/// never shared between workers.
#[derive(Debug, Default)]
pub struct Context {
    vars: HashMap<String, Value>,
}

impl Context {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set(&mut self, name: impl Into<String>, value: Value) {
        self.vars.insert(name.into(), value);
    }

    pub fn get(&self, name: &str) -> Option<&Value> {
        self.vars.get(name)
    }
}

/// Evaluate an expression against a context.
pub fn eval(expr: &Expr, ctx: &Context) -> Result<Value, ExprError> {
    match expr {
        Expr::Literal(value) => Ok(value.clone()),

        Expr::Ident(name) => ctx
            .get(name)
            .cloned()
            .ok_or_else(|| ExprError::eval(format!("unknown identifier '{name}'"))),

        Expr::Member(object, member) => match eval(object, ctx)? {
            Value::Object(map) => map
                .get(member)
                .cloned()
                .ok_or_else(|| ExprError::eval(format!("unknown member '{member}'"))),
            other => Err(ExprError::eval(format!(
                "cannot access member '{member}' on {}",
                other.type_name()
            ))),
        },

        // Map lookup: a missing key is `null`, not an error, so tag
        // probes like `parsedTags[59]` stay usable in conditions.
        Expr::Index(object, index) => match eval(object, ctx)? {
            Value::Object(map) => {
                let key = eval(index, ctx)?.display_string();
                Ok(map.get(&key).cloned().unwrap_or(Value::Null))
            }
            other => Err(ExprError::eval(format!(
                "cannot index into {}",
                other.type_name()
            ))),
        },

        Expr::Unary(op, operand) => {
            let value = eval(operand, ctx)?;
            match op {
                UnaryOp::Not => Ok(Value::Bool(!value.as_bool()?)),
                UnaryOp::Neg => match value {
                    Value::Int(i) => Ok(Value::Int(-i)),
                    Value::Float(f) => Ok(Value::Float(-f)),
                    other => Err(ExprError::eval(format!(
                        "cannot negate {}",
                        other.type_name()
                    ))),
                },
            }
        }

        Expr::Binary(op, lhs, rhs) => eval_binary(*op, lhs, rhs, ctx),

        Expr::Ternary(cond, then, otherwise) => {
            if eval(cond, ctx)?.as_bool()? {
                eval(then, ctx)
            } else {
                eval(otherwise, ctx)
            }
        }
    }
}

fn eval_binary(op: BinaryOp, lhs: &Expr, rhs: &Expr, ctx: &Context) -> Result<Value, ExprError> {
    // Logical operators short-circuit; everything else is strict.
    match op {
        BinaryOp::And => {
            return Ok(Value::Bool(
                eval(lhs, ctx)?.as_bool()? && eval(rhs, ctx)?.as_bool()?,
            ));
        }
        BinaryOp::Or => {
            return Ok(Value::Bool(
                eval(lhs, ctx)?.as_bool()? || eval(rhs, ctx)?.as_bool()?,
            ));
        }
        _ => {}
    }

    let left = eval(lhs, ctx)?;
    let right = eval(rhs, ctx)?;
    match op {
        BinaryOp::Eq => Ok(Value::Bool(left.loose_eq(&right))),
        BinaryOp::Ne => Ok(Value::Bool(!left.loose_eq(&right))),
        BinaryOp::Lt => Ok(Value::Bool(left.compare(&right)? == Ordering::Less)),
        BinaryOp::Le => Ok(Value::Bool(left.compare(&right)? != Ordering::Greater)),
        BinaryOp::Gt => Ok(Value::Bool(left.compare(&right)? == Ordering::Greater)),
        BinaryOp::Ge => Ok(Value::Bool(left.compare(&right)? != Ordering::Less)),
        BinaryOp::Add => left.add(&right),
        BinaryOp::Sub => left.sub(&right),
        BinaryOp::Mul => left.mul(&right),
        BinaryOp::Div => left.div(&right),
        BinaryOp::Rem => left.rem(&right),
        BinaryOp::And | BinaryOp::Or => unreachable!("handled above"),
    }
}

// ── Tests ───────────────────────────────────────────────────────────
