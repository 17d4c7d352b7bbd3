use std::cmp::Ordering;

use log::trace;
use rust_decimal::{Decimal, MathematicalOps, prelude::ToPrimitive};
use thiserror::Error;
use uuid::Uuid;

use crate::{
    ast::BinOp,
    compiler::{CompiledQuery, ParameterKind},
    ir::{Ir, IrKind, Reduction, StringTest},
    services::ServiceProvider,
    types::{IntKind, TypeRef},
    value::{EnumValue, Record, Value, parse_datetime},
};

/// Errors raised while running a compiled tree.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum EvalError {
    /// Operation applied to a value of the wrong runtime type
    #[error("Type error: {0}")]
    TypeError(String),

    #[error("Parameter '{0}' is not bound")]
    UnboundParameter(String),

    #[error("Service {0} is not registered")]
    MissingService(String),

    #[error("Division by zero")]
    DivisionByZero,

    #[error("Arithmetic overflow: {0}")]
    Overflow(String),

    #[error("Cannot convert {value} to {target}")]
    Conversion { value: String, target: String },

    /// Failure reported by a host function or service, passed through as is
    #[error("{0}")]
    Host(String),
}

/// Runs compiled queries.
pub trait Executor: Send + Sync {
    fn execute(
        &self,
        query: &CompiledQuery,
        context: Value,
        services: &ServiceProvider,
    ) -> Result<Value, EvalError>;
}

/// Bindings visible while evaluating: the query parameters plus the lambda
/// parameters of enclosing filters and projections.
struct EvalContext<'s> {
    bindings: Vec<(String, Value)>,
    services: &'s ServiceProvider,
}

impl<'s> EvalContext<'s> {
    fn new(services: &'s ServiceProvider) -> Self {
        EvalContext {
            bindings: Vec::new(),
            services,
        }
    }

    fn bind(&mut self, name: &str, value: Value) {
        self.bindings.push((name.to_string(), value));
    }

    fn unbind(&mut self) {
        self.bindings.pop();
    }

    fn lookup(&self, name: &str) -> Option<&Value> {
        self.bindings
            .iter()
            .rev()
            .find(|(n, _)| n == name)
            .map(|(_, v)| v)
    }
}

/// Tree-walking interpreter for compiled [`Ir`].
#[derive(Debug, Default, Clone, Copy)]
pub struct Evaluator;

impl Executor for Evaluator {
    fn execute(
        &self,
        query: &CompiledQuery,
        context: Value,
        services: &ServiceProvider,
    ) -> Result<Value, EvalError> {
        let mut ctx = EvalContext::new(services);
        let mut arguments = query.arguments.iter();
        for param in &query.parameters {
            match &param.kind {
                ParameterKind::Context => ctx.bind(&param.name, context.clone()),
                ParameterKind::Constant => {
                    let value = arguments
                        .next()
                        .cloned()
                        .ok_or_else(|| EvalError::UnboundParameter(param.name.clone()))?;
                    ctx.bind(&param.name, value);
                }
                ParameterKind::Service(key) => {
                    if !services.contains(key) {
                        return Err(EvalError::MissingService(key.name().to_string()));
                    }
                }
            }
        }
        self.eval(&query.body, &mut ctx)
    }
}

impl Evaluator {
    pub fn new() -> Self {
        Evaluator
    }

    fn eval(&self, ir: &Ir, ctx: &mut EvalContext<'_>) -> Result<Value, EvalError> {
        match &ir.kind {
            IrKind::Constant(value) => Ok(value.clone()),
            IrKind::Parameter(name) => ctx
                .lookup(name)
                .cloned()
                .ok_or_else(|| EvalError::UnboundParameter(name.clone())),
            IrKind::Member { object, name } => {
                let object = self.eval(object, ctx)?;
                self.member(&object, name)
            }
            IrKind::Binary { op, left, right } => self.eval_binary(*op, left, right, &ir.ty, ctx),
            IrKind::Not(operand) => match self.eval(operand, ctx)? {
                Value::Boolean(b) => Ok(Value::Boolean(!b)),
                Value::Null => Ok(Value::Null),
                other => Err(EvalError::TypeError(format!(
                    "Cannot negate {}",
                    other.type_name()
                ))),
            },
            IrKind::Conditional {
                test,
                then,
                otherwise,
            } => match self.eval(test, ctx)? {
                Value::Boolean(true) => self.eval(then, ctx),
                Value::Boolean(false) | Value::Null => self.eval(otherwise, ctx),
                other => Err(EvalError::TypeError(format!(
                    "Condition evaluated to {}",
                    other.type_name()
                ))),
            },
            IrKind::Convert(inner) => {
                let value = self.eval(inner, ctx)?;
                convert_value(value, &ir.ty)
            }
            IrKind::CompareStrings { left, right } => {
                let left = self.eval(left, ctx)?;
                let right = self.eval(right, ctx)?;
                let ordering = left.compare(&right).ok_or_else(|| {
                    EvalError::TypeError(format!(
                        "Cannot compare {} with {}",
                        left.type_name(),
                        right.type_name()
                    ))
                })?;
                Ok(Value::Integer(match ordering {
                    Ordering::Less => -1,
                    Ordering::Equal => 0,
                    Ordering::Greater => 1,
                }))
            }
            IrKind::StringTest {
                test,
                target,
                argument,
            } => {
                let target = self.eval(target, ctx)?;
                let argument = self.eval(argument, ctx)?;
                Ok(Value::Boolean(string_test(*test, &target, &argument)?))
            }
            IrKind::InSet { value, set } => {
                let value = self.eval(value, ctx)?;
                Ok(Value::Boolean(set.iter().any(|candidate| *candidate == value)))
            }
            IrKind::Filter {
                source,
                param,
                predicate,
            } => {
                let Some(items) = self.sequence(source, ctx)? else {
                    return Ok(Value::Null);
                };
                let mut kept = Vec::new();
                for item in items {
                    ctx.bind(param, item.clone());
                    let keep = self.eval(predicate, ctx);
                    ctx.unbind();
                    if keep? == Value::Boolean(true) {
                        kept.push(item);
                    }
                }
                Ok(Value::List(kept))
            }
            IrKind::Project {
                source,
                param,
                body,
            } => {
                let Some(items) = self.sequence(source, ctx)? else {
                    return Ok(Value::Null);
                };
                let mut projected = Vec::with_capacity(items.len());
                for item in items {
                    ctx.bind(param, item);
                    let value = self.eval(body, ctx);
                    ctx.unbind();
                    projected.push(value?);
                }
                Ok(Value::List(projected))
            }
            IrKind::NewRecord { record, fields } => {
                let mut instance = Record::new(record.clone());
                for (index, field) in fields.iter().enumerate() {
                    let value = self.eval(field, ctx)?;
                    instance.set(index, value);
                }
                Ok(Value::Record(instance))
            }
            IrKind::OrderBy {
                source,
                param,
                key,
                descending,
            } => {
                let Some(items) = self.sequence(source, ctx)? else {
                    return Ok(Value::Null);
                };
                let mut keyed = Vec::with_capacity(items.len());
                for item in items {
                    ctx.bind(param, item.clone());
                    let k = self.eval(key, ctx);
                    ctx.unbind();
                    keyed.push((k?, item));
                }
                // sort_by is stable, so equal keys keep their input order
                keyed.sort_by(|(a, _), (b, _)| {
                    let ordering = a.compare(b).unwrap_or(Ordering::Equal);
                    if *descending {
                        ordering.reverse()
                    } else {
                        ordering
                    }
                });
                Ok(Value::List(keyed.into_iter().map(|(_, item)| item).collect()))
            }
            IrKind::Take { source, count } | IrKind::Skip { source, count } => {
                let Some(items) = self.sequence(source, ctx)? else {
                    return Ok(Value::Null);
                };
                let count = self.eval(count, ctx)?;
                let n = count
                    .as_i128()
                    .ok_or_else(|| {
                        EvalError::TypeError(format!("Count must be an integer, got {}", count.type_name()))
                    })?
                    .clamp(0, items.len() as i128) as usize;
                let items = if matches!(ir.kind, IrKind::Skip { .. }) {
                    items.into_iter().skip(n).collect()
                } else {
                    items.into_iter().take(n).collect()
                };
                Ok(Value::List(items))
            }
            IrKind::Distinct(source) => {
                let Some(items) = self.sequence(source, ctx)? else {
                    return Ok(Value::Null);
                };
                let mut unique: Vec<Value> = Vec::with_capacity(items.len());
                for item in items {
                    if !unique.contains(&item) {
                        unique.push(item);
                    }
                }
                Ok(Value::List(unique))
            }
            IrKind::Reduce { source, op } => {
                let Some(items) = self.sequence(source, ctx)? else {
                    return Ok(Value::Null);
                };
                Ok(match op {
                    Reduction::First => items.into_iter().next().unwrap_or(Value::Null),
                    Reduction::Last => items.into_iter().last().unwrap_or(Value::Null),
                    Reduction::Count => Value::Integer(items.len() as i64),
                })
            }
            IrKind::With {
                source,
                param,
                body,
            } => {
                let value = self.eval(source, ctx)?;
                if value.is_null() {
                    return Ok(Value::Null);
                }
                ctx.bind(param, value);
                let result = self.eval(body, ctx);
                ctx.unbind();
                result
            }
            IrKind::HostCall {
                name,
                service,
                args,
                func,
            } => {
                let service = match service {
                    Some(key) => Some(
                        ctx.services
                            .get_dyn(key)
                            .ok_or_else(|| EvalError::MissingService(key.name().to_string()))?,
                    ),
                    None => None,
                };
                let mut values = Vec::with_capacity(args.len());
                for arg in args {
                    values.push(self.eval(arg, ctx)?);
                }
                trace!("calling host function '{}' with {} argument(s)", name, values.len());
                (func.0)(service, &values).map_err(EvalError::Host)
            }
        }
    }

    /// Evaluates `source` as a list; `None` for a null source.
    fn sequence(&self, source: &Ir, ctx: &mut EvalContext<'_>) -> Result<Option<Vec<Value>>, EvalError> {
        match self.eval(source, ctx)? {
            Value::List(items) => Ok(Some(items)),
            Value::Null => Ok(None),
            other => Err(EvalError::TypeError(format!(
                "Expected a list, got {}",
                other.type_name()
            ))),
        }
    }

    fn member(&self, object: &Value, name: &str) -> Result<Value, EvalError> {
        match object {
            Value::Null => Ok(Value::Null),
            Value::Object(o) => Ok(o.get(name).cloned().unwrap_or(Value::Null)),
            Value::Record(r) => r.get(name).cloned().ok_or_else(|| {
                EvalError::TypeError(format!("Record has no field '{}'", name))
            }),
            other => Err(EvalError::TypeError(format!(
                "Cannot access member '{}' on {}",
                name,
                other.type_name()
            ))),
        }
    }

    fn eval_binary(
        &self,
        op: BinOp,
        left: &Ir,
        right: &Ir,
        ty: &TypeRef,
        ctx: &mut EvalContext<'_>,
    ) -> Result<Value, EvalError> {
        // Logical operators short-circuit
        if op.is_logical() {
            let left = self.eval(left, ctx)?;
            let left = truth(&left)?;
            return match (op, left) {
                (BinOp::And, false) => Ok(Value::Boolean(false)),
                (BinOp::Or, true) => Ok(Value::Boolean(true)),
                _ => {
                    let right = self.eval(right, ctx)?;
                    Ok(Value::Boolean(truth(&right)?))
                }
            };
        }

        let left = self.eval(left, ctx)?;
        let right = self.eval(right, ctx)?;
        self.apply_binop(op, &left, &right, ty)
    }

    fn apply_binop(&self, op: BinOp, left: &Value, right: &Value, ty: &TypeRef) -> Result<Value, EvalError> {
        match op {
            BinOp::Equal => Ok(Value::Boolean(left == right)),
            BinOp::NotEqual => Ok(Value::Boolean(left != right)),
            BinOp::LessThan | BinOp::LessEqual | BinOp::GreaterThan | BinOp::GreaterEqual => {
                // Lifted comparisons: null on either side is false
                if left.is_null() || right.is_null() {
                    return Ok(Value::Boolean(false));
                }
                let ordering = left.compare(right).ok_or_else(|| {
                    EvalError::TypeError(format!(
                        "Cannot compare {} {} {}",
                        left.type_name(),
                        op,
                        right.type_name()
                    ))
                })?;
                Ok(Value::Boolean(match op {
                    BinOp::LessThan => ordering == Ordering::Less,
                    BinOp::LessEqual => ordering != Ordering::Greater,
                    BinOp::GreaterThan => ordering == Ordering::Greater,
                    _ => ordering != Ordering::Less,
                }))
            }
            BinOp::And | BinOp::Or => Ok(Value::Boolean(match op {
                BinOp::And => truth(left)? && truth(right)?,
                _ => truth(left)? || truth(right)?,
            })),
            _ => arithmetic(op, left, right, ty),
        }
    }
}

fn truth(value: &Value) -> Result<bool, EvalError> {
    match value {
        Value::Boolean(b) => Ok(*b),
        Value::Null => Ok(false),
        other => Err(EvalError::TypeError(format!(
            "Expected a boolean, got {}",
            other.type_name()
        ))),
    }
}

fn arithmetic(op: BinOp, left: &Value, right: &Value, ty: &TypeRef) -> Result<Value, EvalError> {
    if left.is_null() || right.is_null() {
        return Ok(Value::Null);
    }
    match (left, right) {
        (Value::String(a), Value::String(b)) if op == BinOp::Add => {
            Ok(Value::String(format!("{}{}", a, b)))
        }
        (Value::Integer(_) | Value::UInteger(_), Value::Integer(_) | Value::UInteger(_)) => {
            let kind = ty.int_kind().unwrap_or(IntKind::I64);
            match (left.as_i128(), right.as_i128()) {
                (Some(a), Some(b)) => integer_op(op, a, b, kind),
                _ => Err(EvalError::TypeError("Invalid integer operands".to_string())),
            }
        }
        (Value::Float(_), _) | (_, Value::Float(_)) => match (left.as_f64(), right.as_f64()) {
            (Some(a), Some(b)) => float_op(op, a, b),
            _ => Err(mismatched(op, left, right)),
        },
        _ => match (left.as_decimal(), right.as_decimal()) {
            (Some(a), Some(b)) => decimal_op(op, a, b),
            _ => Err(mismatched(op, left, right)),
        },
    }
}

fn mismatched(op: BinOp, left: &Value, right: &Value) -> EvalError {
    EvalError::TypeError(format!(
        "Cannot apply '{}' to {} and {}",
        op,
        left.type_name(),
        right.type_name()
    ))
}

fn integer_op(op: BinOp, a: i128, b: i128, kind: IntKind) -> Result<Value, EvalError> {
    let overflow = || EvalError::Overflow(format!("{} {} {} does not fit in {}", a, op, b, kind.name()));
    let result = match op {
        BinOp::Add => a.checked_add(b),
        BinOp::Subtract => a.checked_sub(b),
        BinOp::Multiply => a.checked_mul(b),
        BinOp::Divide => {
            if b == 0 {
                return Err(EvalError::DivisionByZero);
            }
            a.checked_div(b)
        }
        BinOp::Modulo => {
            if b == 0 {
                return Err(EvalError::DivisionByZero);
            }
            a.checked_rem(b)
        }
        BinOp::Power => {
            if b < 0 {
                return decimal_op(op, Decimal::from_i128_with_scale(a, 0), Decimal::from_i128_with_scale(b, 0));
            }
            let exp = u32::try_from(b).map_err(|_| overflow())?;
            a.checked_pow(exp)
        }
        _ => None,
    }
    .ok_or_else(overflow)?;
    Value::integer(result, kind).ok_or_else(overflow)
}

fn decimal_op(op: BinOp, a: Decimal, b: Decimal) -> Result<Value, EvalError> {
    let overflow = || EvalError::Overflow(format!("{} {} {}", a, op, b));
    let result = match op {
        BinOp::Add => a.checked_add(b),
        BinOp::Subtract => a.checked_sub(b),
        BinOp::Multiply => a.checked_mul(b),
        BinOp::Divide => {
            if b.is_zero() {
                return Err(EvalError::DivisionByZero);
            }
            a.checked_div(b)
        }
        BinOp::Modulo => {
            if b.is_zero() {
                return Err(EvalError::DivisionByZero);
            }
            a.checked_rem(b)
        }
        BinOp::Power => a.checked_powd(b),
        _ => None,
    };
    result.map(|d| Value::Decimal(d.normalize())).ok_or_else(overflow)
}

fn float_op(op: BinOp, a: f64, b: f64) -> Result<Value, EvalError> {
    Ok(Value::Float(match op {
        BinOp::Add => a + b,
        BinOp::Subtract => a - b,
        BinOp::Multiply => a * b,
        BinOp::Divide => a / b,
        BinOp::Modulo => a % b,
        BinOp::Power => a.powf(b),
        _ => return Err(EvalError::TypeError(format!("'{}' is not arithmetic", op))),
    }))
}

fn string_test(test: StringTest, target: &Value, argument: &Value) -> Result<bool, EvalError> {
    let (target, argument) = match (target, argument) {
        (Value::String(t), Value::String(a)) => (t.as_str(), a.as_str()),
        (Value::Null, _) | (_, Value::Null) => return Ok(test == StringTest::NotContains),
        (t, a) => {
            return Err(EvalError::TypeError(format!(
                "String test on {} with {}",
                t.type_name(),
                a.type_name()
            )));
        }
    };
    Ok(match test {
        StringTest::StartsWith => target.starts_with(argument),
        StringTest::EndsWith => target.ends_with(argument),
        StringTest::Contains => target.contains(argument),
        StringTest::NotContains => !target.contains(argument),
    })
}

/// Converts a runtime value to `target`. Null converts to null; integer
/// conversions are range-checked.
pub fn convert_value(value: Value, target: &TypeRef) -> Result<Value, EvalError> {
    let failed = |value: &Value| EvalError::Conversion {
        value: value.to_string(),
        target: target.to_string(),
    };
    match (target, value) {
        (_, Value::Null) => Ok(Value::Null),
        (TypeRef::Any, v) => Ok(v),
        (TypeRef::Nullable(inner), v) => convert_value(v, inner),
        (TypeRef::Int(kind), v) => {
            let n = match &v {
                Value::Integer(_) | Value::UInteger(_) | Value::Enum(_) => v.as_i128(),
                Value::Decimal(d) if d.fract().is_zero() => d.to_i128(),
                Value::Float(f) if f.fract() == 0.0 => Some(*f as i128),
                Value::String(s) => s.trim().parse::<i128>().ok(),
                _ => None,
            }
            .ok_or_else(|| failed(&v))?;
            Value::integer(n, *kind)
                .ok_or_else(|| EvalError::Overflow(format!("{} does not fit in {}", n, kind.name())))
        }
        (TypeRef::Decimal, v) => match &v {
            Value::String(s) => s.trim().parse::<Decimal>().map(Value::Decimal).map_err(|_| failed(&v)),
            _ => v.as_decimal().map(Value::Decimal).ok_or_else(|| failed(&v)),
        },
        (TypeRef::Float, v) => match &v {
            Value::String(s) => s.trim().parse::<f64>().map(Value::Float).map_err(|_| failed(&v)),
            _ => v.as_f64().map(Value::Float).ok_or_else(|| failed(&v)),
        },
        (TypeRef::Guid, Value::String(s)) => Uuid::parse_str(&s)
            .map(Value::Guid)
            .map_err(|_| failed(&Value::String(s))),
        (TypeRef::DateTime, Value::String(s)) => match parse_datetime(&s) {
            Some(dt) => Ok(Value::DateTime(dt)),
            None => Err(failed(&Value::String(s))),
        },
        (TypeRef::Enum(name), v @ (Value::Integer(_) | Value::UInteger(_))) => {
            let value = v
                .as_i128()
                .and_then(|n| i64::try_from(n).ok())
                .ok_or_else(|| failed(&v))?;
            Ok(Value::Enum(EnumValue {
                type_name: name.clone(),
                name: None,
                value,
            }))
        }
        (TypeRef::String, Value::String(s)) => Ok(Value::String(s)),
        (TypeRef::String, v @ (Value::Integer(_) | Value::UInteger(_) | Value::Decimal(_) | Value::Float(_) | Value::Boolean(_) | Value::Guid(_))) => {
            Ok(Value::String(v.to_string()))
        }
        (TypeRef::Boolean, v @ Value::Boolean(_))
        | (TypeRef::Guid, v @ Value::Guid(_))
        | (TypeRef::DateTime, v @ Value::DateTime(_))
        | (TypeRef::Enum(_), v @ Value::Enum(_))
        | (TypeRef::List(_), v @ Value::List(_))
        | (TypeRef::Object(_), v @ Value::Object(_))
        | (TypeRef::Record(_), v @ Value::Record(_)) => Ok(v),
        (_, v) => Err(failed(&v)),
    }
}
