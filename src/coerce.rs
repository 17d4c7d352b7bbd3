//! Operand reconciliation for binary operators.
//!
//! Rules, applied in order:
//! 1. string `+` concatenates; string `==`/`!=` compare directly
//! 2. string relational operators go through an ordinal three-way compare
//! 3. a Guid (or DateTime) operand converts text on the other side, folding
//!    identifier-shaped constants at compile time
//! 4. a nullable operand lifts the other side to the same nullable type
//! 5. integers of different kinds convert the right side to the left kind;
//!    comparisons never narrow and meet at a kind holding both sides
//! 6. enum operands convert integer or member-name operands to the enum
//! 7. anything else must already have matching types
//!
//! Mixed integer and decimal (or float) operands widen the integer side.

use once_cell::sync::Lazy;
use regex::Regex;
use uuid::Uuid;

use crate::{
    ast::BinOp,
    compiler::CompileError,
    ir::{Ir, IrKind},
    schema::Schema,
    types::{IntKind, TypeRef},
    value::{EnumValue, Value, parse_datetime},
};

static GUID_SHAPE: Lazy<Option<Regex>> = Lazy::new(|| {
    Regex::new(r"^[0-9a-fA-F]{8}-[0-9a-fA-F]{4}-[0-9a-fA-F]{4}-[0-9a-fA-F]{4}-[0-9a-fA-F]{12}$").ok()
});

static DATE_SHAPE: Lazy<Option<Regex>> = Lazy::new(|| {
    Regex::new(
        r"^\d{4}-\d{2}-\d{2}([T ]\d{2}:\d{2}(:\d{2}(\.\d+)?)?(Z|[+-]\d{2}:\d{2})?)?$",
    )
    .ok()
});

fn guid_shaped(text: &str) -> bool {
    GUID_SHAPE.as_ref().is_some_and(|re| re.is_match(text))
}

fn date_shaped(text: &str) -> bool {
    DATE_SHAPE.as_ref().is_some_and(|re| re.is_match(text))
}

fn mismatch(op: &str, left: &Ir, right: &Ir) -> CompileError {
    CompileError::TypeMismatch {
        op: op.to_string(),
        left: left.ty.clone(),
        right: right.ty.clone(),
    }
}

/// Builds `left op right`, converting operands as needed.
pub(crate) fn reconcile(op: BinOp, left: Ir, right: Ir, schema: &Schema) -> Result<Ir, CompileError> {
    if op.is_logical() {
        return logical(op, left, right);
    }

    let (left, right) = sniff_dynamic(left, right);
    if left.ty == TypeRef::Any || right.ty == TypeRef::Any {
        let ty = if op.is_comparison() {
            TypeRef::Boolean
        } else {
            TypeRef::Any
        };
        return Ok(Ir::binary(op, left, right, ty));
    }

    if left.ty.is_string() && right.ty.is_string() {
        return strings(op, left, right);
    }

    if left.ty == TypeRef::Null || right.ty == TypeRef::Null {
        return null_comparison(op, left, right);
    }

    let (left, right) = coerce_text(op, left, right)?;
    let (left, right) = coerce_enum(left, right, schema)?;
    let (left, right) = coerce_numeric(left, right, op.is_comparison());
    let (left, right) = align_nullability(left, right);
    direct(op, left, right)
}

fn logical(op: BinOp, left: Ir, right: Ir) -> Result<Ir, CompileError> {
    let err = mismatch(op.symbol(), &left, &right);
    match (as_predicate(left), as_predicate(right)) {
        (Some(left), Some(right)) => Ok(Ir::binary(op, left, right, TypeRef::Boolean)),
        _ => Err(err),
    }
}

fn strings(op: BinOp, left: Ir, right: Ir) -> Result<Ir, CompileError> {
    match op {
        BinOp::Add => Ok(Ir::binary(op, left, right, TypeRef::String)),
        op if op.is_equality() => Ok(Ir::binary(op, left, right, TypeRef::Boolean)),
        op if op.is_relational() => {
            let zero = Ir::typed_constant(Value::Integer(0), TypeRef::Int(IntKind::I32));
            Ok(Ir::binary(
                op,
                Ir::compare_strings(left, right),
                zero,
                TypeRef::Boolean,
            ))
        }
        op => Err(mismatch(op.symbol(), &left, &right)),
    }
}

fn null_comparison(op: BinOp, left: Ir, right: Ir) -> Result<Ir, CompileError> {
    if op.is_equality() && left.ty.admits_null() && right.ty.admits_null() {
        Ok(Ir::binary(op, left, right, TypeRef::Boolean))
    } else {
        Err(mismatch(op.symbol(), &left, &right))
    }
}

/// Against a dynamic operand, a text constant shaped like a Guid or a date
/// is taken as one.
fn sniff_dynamic(left: Ir, right: Ir) -> (Ir, Ir) {
    fn sniff(ir: Ir) -> Ir {
        let parsed = match ir.as_constant() {
            Some(Value::String(s)) if guid_shaped(s) => Uuid::parse_str(s).ok().map(Value::Guid),
            Some(Value::String(s)) if date_shaped(s) => parse_datetime(s).map(Value::DateTime),
            _ => None,
        };
        parsed.map(Ir::constant).unwrap_or(ir)
    }

    match (&left.ty, &right.ty) {
        (TypeRef::Any, TypeRef::String) => (left, sniff(right)),
        (TypeRef::String, TypeRef::Any) => (sniff(left), right),
        _ => (left, right),
    }
}

fn text_target(op: BinOp, ty: &TypeRef) -> Option<TypeRef> {
    match ty.underlying() {
        TypeRef::Guid if op.is_equality() => Some(TypeRef::Guid),
        TypeRef::DateTime if op.is_comparison() => Some(TypeRef::DateTime),
        _ => None,
    }
}

/// Parses constant text for a `Guid` or `DateTime` comparison. `None` when
/// the text does not have the target's shape.
fn text_to(ir: Ir, target: TypeRef) -> Result<Option<Ir>, CompileError> {
    let text = match ir.as_constant().cloned() {
        Some(Value::String(s)) => s,
        Some(Value::Null) => {
            return Ok(Some(Ir::typed_constant(Value::Null, TypeRef::nullable(target))));
        }
        _ => return Ok(Some(Ir::convert(ir, target))),
    };
    let parsed = match &target {
        TypeRef::Guid if guid_shaped(&text) => Uuid::parse_str(&text).ok().map(Value::Guid),
        TypeRef::DateTime if date_shaped(&text) => parse_datetime(&text).map(Value::DateTime),
        _ => return Ok(None),
    };
    parsed
        .map(|value| Some(Ir::typed_constant(value, target.clone())))
        .ok_or_else(|| CompileError::InvalidArgument {
            target: target.to_string(),
            message: format!("'{}' is not a valid {}", text, target),
        })
}

fn coerce_text(op: BinOp, left: Ir, right: Ir) -> Result<(Ir, Ir), CompileError> {
    if let Some(target) = text_target(op, &left.ty)
        && right.ty.is_string()
    {
        let err = mismatch(op.symbol(), &left, &right);
        return Ok((left, text_to(right, target)?.ok_or(err)?));
    }
    if let Some(target) = text_target(op, &right.ty)
        && left.ty.is_string()
    {
        let err = mismatch(op.symbol(), &left, &right);
        return Ok((text_to(left, target)?.ok_or(err)?, right));
    }
    Ok((left, right))
}

fn enum_operand(ir: Ir, name: &str, schema: &Schema) -> Result<Ir, CompileError> {
    let enum_ty = TypeRef::Enum(name.to_string());
    let declared = schema.get_enum(name);
    match ir.as_constant().cloned() {
        Some(Value::String(member)) => {
            let value = declared
                .and_then(|e| e.convert(&Value::String(member.clone())))
                .ok_or_else(|| CompileError::InvalidArgument {
                    target: name.to_string(),
                    message: format!("'{}' is not a member of {}", member, name),
                })?;
            Ok(Ir::typed_constant(value, enum_ty))
        }
        Some(constant @ (Value::Integer(_) | Value::UInteger(_))) => {
            let value = match declared.and_then(|e| e.convert(&constant)) {
                Some(value) => value,
                None => Value::Enum(EnumValue {
                    type_name: name.to_string(),
                    name: None,
                    value: constant
                        .as_i128()
                        .and_then(|n| i64::try_from(n).ok())
                        .ok_or_else(|| CompileError::InvalidArgument {
                            target: name.to_string(),
                            message: format!("{} is out of range", constant),
                        })?,
                }),
            };
            Ok(Ir::typed_constant(value, enum_ty))
        }
        _ if ir.ty.int_kind().is_some() => {
            let ty = if ir.ty.is_nullable() {
                TypeRef::nullable(enum_ty)
            } else {
                enum_ty
            };
            Ok(Ir::convert(ir, ty))
        }
        _ => Ok(ir),
    }
}

fn coerce_enum(left: Ir, right: Ir, schema: &Schema) -> Result<(Ir, Ir), CompileError> {
    match (left.ty.underlying(), right.ty.underlying()) {
        (TypeRef::Enum(a), TypeRef::Enum(b)) if a == b => Ok((left, right)),
        (TypeRef::Enum(name), _) => {
            let name = name.clone();
            Ok((left, enum_operand(right, &name, schema)?))
        }
        (_, TypeRef::Enum(name)) => {
            let name = name.clone();
            Ok((enum_operand(left, &name, schema)?, right))
        }
        _ => Ok((left, right)),
    }
}

fn like_nullability(target: TypeRef, like: &TypeRef) -> TypeRef {
    if like.is_nullable() {
        TypeRef::nullable(target)
    } else {
        target
    }
}

/// Converts `ir` to `ty`, folding constants that convert cleanly.
pub(crate) fn convert_operand(ir: Ir, ty: TypeRef) -> Ir {
    let folded = match (ir.as_constant(), ty.underlying()) {
        (Some(v), TypeRef::Int(kind)) => v.as_i128().and_then(|n| Value::integer(n, *kind)),
        (Some(v @ (Value::Integer(_) | Value::UInteger(_))), TypeRef::Decimal) => {
            v.as_decimal().map(Value::Decimal)
        }
        (Some(v @ (Value::Integer(_) | Value::UInteger(_) | Value::Decimal(_))), TypeRef::Float) => {
            v.as_f64().map(Value::Float)
        }
        _ => None,
    };
    match folded {
        Some(value) => Ir::typed_constant(value, ty),
        None => Ir::convert(ir, ty),
    }
}

/// Whether every value of `inner` is a value of `outer`.
fn int_contains(outer: IntKind, inner: IntKind) -> bool {
    outer.min() <= inner.min() && outer.max() >= inner.max()
}

fn constant_fits(ir: &Ir, kind: IntKind) -> bool {
    ir.as_constant()
        .and_then(Value::as_i128)
        .is_some_and(|n| kind.fits(n))
}

fn widen_to(ir: Ir, kind: IntKind) -> Ir {
    if ir.ty.int_kind() == Some(kind) {
        return ir;
    }
    let ty = like_nullability(TypeRef::Int(kind), &ir.ty);
    convert_operand(ir, ty)
}

/// Narrowest kind holding every value of both `a` and `b`.
fn common_kind(a: IntKind, b: IntKind) -> Option<IntKind> {
    [IntKind::I16, IntKind::U16, IntKind::I32, IntKind::U32, IntKind::I64, IntKind::U64]
        .into_iter()
        .find(|k| int_contains(*k, a) && int_contains(*k, b))
}

/// Without `widen` the right side converts to the left kind. With `widen`,
/// integers of different kinds meet at a kind holding both; a constant that
/// fits the other side converts instead, and kinds with no common kind
/// (`Int64` and `UInt64`) are left as they are.
fn coerce_numeric(left: Ir, right: Ir, widen: bool) -> (Ir, Ir) {
    let l = left.ty.underlying().clone();
    let r = right.ty.underlying().clone();
    match (&l, &r) {
        (TypeRef::Int(a), TypeRef::Int(b)) if a != b && widen => {
            if constant_fits(&right, *a) {
                let ty = like_nullability(l.clone(), &right.ty);
                return (left, convert_operand(right, ty));
            }
            if constant_fits(&left, *b) {
                let ty = like_nullability(r.clone(), &left.ty);
                return (convert_operand(left, ty), right);
            }
            match common_kind(*a, *b) {
                Some(kind) => (widen_to(left, kind), widen_to(right, kind)),
                None => (left, right),
            }
        }
        (TypeRef::Int(a), TypeRef::Int(b)) if a != b && b.converts_to(*a) => {
            let ty = like_nullability(l.clone(), &right.ty);
            (left, convert_operand(right, ty))
        }
        (TypeRef::Int(_), TypeRef::Decimal | TypeRef::Float) => {
            let ty = like_nullability(r.clone(), &left.ty);
            (convert_operand(left, ty), right)
        }
        (TypeRef::Decimal | TypeRef::Float, TypeRef::Int(_)) => {
            let ty = like_nullability(l.clone(), &right.ty);
            (left, convert_operand(right, ty))
        }
        (TypeRef::Float, TypeRef::Decimal) => {
            let ty = like_nullability(TypeRef::Decimal, &left.ty);
            (convert_operand(left, ty), right)
        }
        (TypeRef::Decimal, TypeRef::Float) => {
            let ty = like_nullability(TypeRef::Decimal, &right.ty);
            (left, convert_operand(right, ty))
        }
        _ => (left, right),
    }
}

fn align_nullability(left: Ir, right: Ir) -> (Ir, Ir) {
    if left.ty.is_nullable() && !right.ty.is_nullable() && left.ty.underlying() == &right.ty {
        let ty = left.ty.clone();
        (left, Ir::convert(right, ty))
    } else if right.ty.is_nullable() && !left.ty.is_nullable() && right.ty.underlying() == &left.ty {
        let ty = right.ty.clone();
        (Ir::convert(left, ty), right)
    } else {
        (left, right)
    }
}

fn direct(op: BinOp, left: Ir, right: Ir) -> Result<Ir, CompileError> {
    // Integers of any two kinds compare by value
    if op.is_comparison()
        && left.ty.int_kind().is_some()
        && right.ty.int_kind().is_some()
    {
        return Ok(Ir::binary(op, left, right, TypeRef::Boolean));
    }
    if left.ty != right.ty {
        return Err(mismatch(op.symbol(), &left, &right));
    }
    let ty = left.ty.clone();
    if op.is_equality() || (op.is_relational() && ty.is_orderable()) {
        Ok(Ir::binary(op, left, right, TypeRef::Boolean))
    } else if op.is_arithmetic() && ty.is_numeric() {
        Ok(Ir::binary(op, left, right, ty))
    } else {
        Err(mismatch(op.symbol(), &left, &right))
    }
}

/// Boolean form of a condition: booleans pass, nullable booleans test
/// `== true`, anything else is rejected.
pub(crate) fn as_predicate(ir: Ir) -> Option<Ir> {
    match &ir.ty {
        TypeRef::Boolean => Some(ir),
        TypeRef::Nullable(inner) if inner.is_boolean() => {
            let truth = Ir::typed_constant(Value::Boolean(true), ir.ty.clone());
            Some(Ir::binary(BinOp::Equal, ir, truth, TypeRef::Boolean))
        }
        TypeRef::Any => {
            let truth = Ir::constant(Value::Boolean(true));
            Some(Ir::binary(BinOp::Equal, ir, truth, TypeRef::Boolean))
        }
        _ => None,
    }
}

/// Brings both branches of a conditional to one type where numeric widening
/// or null lifting can; branches that still differ give an `Any` result.
pub(crate) fn unify_branches(then: Ir, otherwise: Ir) -> Result<(Ir, Ir, TypeRef), CompileError> {
    if then.ty == otherwise.ty {
        let ty = then.ty.clone();
        return Ok((then, otherwise, ty));
    }
    if then.ty == TypeRef::Any || otherwise.ty == TypeRef::Any {
        return Ok((then, otherwise, TypeRef::Any));
    }
    if matches!(then.ty, TypeRef::Null) || matches!(otherwise.ty, TypeRef::Null) {
        let ty = if matches!(then.ty, TypeRef::Null) {
            TypeRef::nullable(otherwise.ty.clone())
        } else {
            TypeRef::nullable(then.ty.clone())
        };
        let then = null_or_convert(then, &ty);
        let otherwise = null_or_convert(otherwise, &ty);
        return Ok((then, otherwise, ty));
    }
    let (then, otherwise) = coerce_numeric(then, otherwise, true);
    let (then, otherwise) = align_nullability(then, otherwise);
    let ty = if then.ty == otherwise.ty {
        then.ty.clone()
    } else {
        TypeRef::Any
    };
    Ok((then, otherwise, ty))
}

fn null_or_convert(ir: Ir, ty: &TypeRef) -> Ir {
    if matches!(ir.kind, IrKind::Constant(Value::Null)) {
        Ir::typed_constant(Value::Null, ty.clone())
    } else {
        Ir::convert(ir, ty.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema::EnumType;

    fn param(name: &str, ty: TypeRef) -> Ir {
        Ir::parameter(name, ty)
    }

    fn int32(n: i64) -> Ir {
        Ir::typed_constant(Value::Integer(n), TypeRef::Int(IntKind::I32))
    }

    #[test]
    fn string_relational_uses_ordinal_compare() {
        let ir = reconcile(
            BinOp::LessThan,
            param("a", TypeRef::String),
            Ir::constant(Value::from("m")),
            &Schema::default(),
        )
        .unwrap();
        match ir.kind {
            IrKind::Binary { left, right, .. } => {
                assert!(matches!(left.kind, IrKind::CompareStrings { .. }));
                assert_eq!(right.as_constant(), Some(&Value::Integer(0)));
            }
            other => panic!("unexpected {:?}", other),
        }
    }

    #[test]
    fn guid_text_folds_at_compile_time() {
        let ir = reconcile(
            BinOp::Equal,
            param("id", TypeRef::Guid),
            Ir::constant(Value::from("c5d0a7d4-86d1-4f8e-9a4e-3c8e8e4d6b01")),
            &Schema::default(),
        )
        .unwrap();
        match ir.kind {
            IrKind::Binary { right, .. } => {
                assert!(matches!(right.as_constant(), Some(Value::Guid(_))));
            }
            other => panic!("unexpected {:?}", other),
        }
    }

    #[test]
    fn nullable_side_lifts_the_other() {
        let nullable = TypeRef::nullable(TypeRef::Int(IntKind::I32));
        let ir = reconcile(BinOp::Equal, param("n", nullable.clone()), int32(3), &Schema::default())
            .unwrap();
        match ir.kind {
            IrKind::Binary { right, .. } => assert_eq!(right.ty, nullable),
            other => panic!("unexpected {:?}", other),
        }
    }

    #[test]
    fn integer_kinds_convert_right_side() {
        let ir = reconcile(
            BinOp::GreaterThan,
            param("n", TypeRef::Int(IntKind::U16)),
            int32(7),
            &Schema::default(),
        )
        .unwrap();
        match ir.kind {
            IrKind::Binary { right, .. } => {
                assert_eq!(right.ty, TypeRef::Int(IntKind::U16));
                assert!(right.is_constant());
            }
            other => panic!("unexpected {:?}", other),
        }
    }

    #[test]
    fn comparisons_widen_the_narrower_field() {
        let ir = reconcile(
            BinOp::Equal,
            param("small", TypeRef::Int(IntKind::I16)),
            param("big", TypeRef::Int(IntKind::I64)),
            &Schema::default(),
        )
        .unwrap();
        match ir.kind {
            IrKind::Binary { left, right, .. } => {
                assert_eq!(left.ty, TypeRef::Int(IntKind::I64));
                assert_eq!(right.ty, TypeRef::Int(IntKind::I64));
            }
            other => panic!("unexpected {:?}", other),
        }
    }

    #[test]
    fn signed_and_unsigned_meet_at_a_kind_holding_both() {
        let ir = reconcile(
            BinOp::LessThan,
            param("signed", TypeRef::Int(IntKind::I32)),
            param("unsigned", TypeRef::Int(IntKind::U32)),
            &Schema::default(),
        )
        .unwrap();
        assert_eq!(ir.ty, TypeRef::Boolean);
        match ir.kind {
            IrKind::Binary { left, right, .. } => {
                assert_eq!(left.ty, TypeRef::Int(IntKind::I64));
                assert_eq!(right.ty, TypeRef::Int(IntKind::I64));
            }
            other => panic!("unexpected {:?}", other),
        }
    }

    #[test]
    fn sixty_four_bit_kinds_compare_unconverted() {
        let ir = reconcile(
            BinOp::Equal,
            param("big", TypeRef::Int(IntKind::I64)),
            param("ubig", TypeRef::Int(IntKind::U64)),
            &Schema::default(),
        )
        .unwrap();
        assert_eq!(ir.ty, TypeRef::Boolean);
        match ir.kind {
            IrKind::Binary { left, right, .. } => {
                assert!(matches!(left.kind, IrKind::Parameter(_)));
                assert!(matches!(right.kind, IrKind::Parameter(_)));
            }
            other => panic!("unexpected {:?}", other),
        }
    }

    #[test]
    fn mismatched_branches_are_any() {
        let (_, _, ty) = unify_branches(int32(1), Ir::constant(Value::from("x"))).unwrap();
        assert_eq!(ty, TypeRef::Any);
        let (_, _, ty) = unify_branches(int32(1), param("n", TypeRef::Int(IntKind::I64))).unwrap();
        assert_eq!(ty, TypeRef::Int(IntKind::I64));
    }

    #[test]
    fn unshaped_text_against_guid_is_a_mismatch() {
        let err = reconcile(
            BinOp::Equal,
            param("id", TypeRef::Guid),
            Ir::constant(Value::from("abc")),
            &Schema::default(),
        )
        .unwrap_err();
        assert_eq!(
            err,
            CompileError::TypeMismatch {
                op: "=".into(),
                left: TypeRef::Guid,
                right: TypeRef::String,
            }
        );
    }

    #[test]
    fn enum_member_names_and_values() {
        let schema = Schema::builder("Query")
            .enumeration(EnumType::new("Status").member("Active", 1).member("Retired", 2))
            .build();
        let status = TypeRef::Enum("Status".into());
        assert!(reconcile(BinOp::Equal, param("s", status.clone()), Ir::constant(Value::from("Active")), &schema).is_ok());
        assert!(reconcile(BinOp::Equal, param("s", status.clone()), int32(2), &schema).is_ok());
        assert!(reconcile(BinOp::Equal, param("s", status), Ir::constant(Value::from("Gone")), &schema).is_err());
    }

    #[test]
    fn incompatible_operands_fail() {
        let err = reconcile(
            BinOp::Add,
            param("b", TypeRef::Boolean),
            int32(1),
            &Schema::default(),
        )
        .unwrap_err();
        assert!(matches!(err, CompileError::TypeMismatch { .. }));
        let err = reconcile(BinOp::And, param("n", TypeRef::Int(IntKind::I32)), Ir::constant(Value::Boolean(true)), &Schema::default()).unwrap_err();
        assert!(matches!(err, CompileError::TypeMismatch { ref op, .. } if op == "and"));
    }
}
