//! Grafting sequence methods below a member-access chain.
//!
//! `people.first().name.take(1)` has no sequence at the top: `name` is a
//! string. The splicer walks down the chain (`name` <- `first()` <-
//! `people`) to the nearest sequence, applies the method there and rebuilds
//! the chain on top, giving `people.take(1).first().name`.

use log::debug;

use crate::{
    compiler::CompileError,
    ir::{Ir, IrKind, TypedNode},
    types::TypeRef,
};

/// Whether `parent` can still be built over its (possibly regrafted) chain
/// child: reductions need a sequence, member access and `With` an object.
fn takes_chain_child(parent: &Ir) -> bool {
    match &parent.kind {
        IrKind::Reduce { source, .. } => {
            source.ty.is_sequence() || matches!(source.ty.underlying(), TypeRef::Any)
        }
        IrKind::Member { object: source, .. } | IrKind::With { source, .. } => matches!(
            source.ty.underlying(),
            TypeRef::Object(_) | TypeRef::Record(_) | TypeRef::Any
        ),
        _ => true,
    }
}

/// Applies `graft` to the nearest sequence-typed node in `node`'s chain and
/// re-wraps the nodes that were above it.
pub fn splice<F>(node: TypedNode, method: &str, graft: F) -> Result<TypedNode, CompileError>
where
    F: FnOnce(TypedNode) -> Result<TypedNode, CompileError>,
{
    if node.ty().is_sequence() {
        return graft(node);
    }

    let root_ty = node.ty().clone();
    let TypedNode {
        expr,
        constants,
        services,
    } = node;

    let mut tail: Vec<Ir> = Vec::new();
    let mut current = expr;
    while !current.ty.is_sequence() {
        let child = match current.chain_child_mut() {
            Some(child) => std::mem::replace(child, Ir::hole()),
            None => {
                return Err(CompileError::NoSequenceContext {
                    method: method.to_string(),
                    context_type: root_ty,
                });
            }
        };
        tail.push(current);
        current = child;
    }

    debug!(
        "splicing .{}() below {} chain node(s) of {}",
        method,
        tail.len(),
        root_ty
    );

    let grafted = graft(TypedNode {
        expr: current,
        constants,
        services,
    })?;
    let TypedNode {
        expr,
        constants,
        services,
    } = grafted;

    let mut rebuilt = expr;
    while let Some(mut parent) = tail.pop() {
        if let Some(slot) = parent.chain_child_mut() {
            *slot = rebuilt;
        }
        if !takes_chain_child(&parent) {
            return Err(CompileError::NoSequenceContext {
                method: method.to_string(),
                context_type: root_ty,
            });
        }
        if let IrKind::With {
            source,
            param,
            body,
        } = &mut parent.kind
        {
            let source_ty = source.ty.clone();
            body.rebind_parameter(param, source_ty.underlying());
        }
        parent.retype();
        rebuilt = parent;
    }

    Ok(TypedNode {
        expr: rebuilt,
        constants,
        services,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{ir::Reduction, record::RecordTypeCache, types::IntKind, value::Value};

    fn people() -> Ir {
        let person = RecordTypeCache::new().get_or_create(vec![
            ("name".to_string(), TypeRef::String),
            ("age".to_string(), TypeRef::Int(IntKind::I32)),
        ]);
        Ir::parameter("people", TypeRef::list(TypeRef::Record(person)))
    }

    #[test]
    fn grafts_at_nearest_sequence() {
        let first = Ir::reduce(people(), Reduction::First);
        let name = Ir::member(first, "name", TypeRef::String);
        let spliced = splice(TypedNode::new(name), "take", |seq| {
            Ok(seq.map(|source| {
                Ir::take(
                    source,
                    Ir::typed_constant(Value::Integer(1), TypeRef::Int(IntKind::I32)),
                )
            }))
        })
        .unwrap();

        assert_eq!(spliced.ty(), &TypeRef::String);
        let IrKind::Member { object, .. } = &spliced.expr.kind else {
            panic!("expected member access on top");
        };
        let IrKind::Reduce { source, .. } = &object.kind else {
            panic!("expected reduction below member access");
        };
        assert!(matches!(source.kind, IrKind::Take { .. }));
    }

    #[test]
    fn reducing_graft_below_a_reduction_fails() {
        let first = Ir::reduce(people(), Reduction::First);
        let name = Ir::member(first, "name", TypeRef::String);
        let err = splice(TypedNode::new(name), "count", |seq| {
            Ok(seq.map(|source| Ir::reduce(source, Reduction::Count)))
        })
        .unwrap_err();
        assert_eq!(
            err,
            CompileError::NoSequenceContext {
                method: "count".into(),
                context_type: TypeRef::String,
            }
        );
    }

    #[test]
    fn reports_missing_sequence() {
        let scalar = Ir::typed_constant(Value::Integer(3), TypeRef::Int(IntKind::I32));
        let err = splice(TypedNode::new(scalar), "where", Ok).unwrap_err();
        assert_eq!(
            err,
            CompileError::NoSequenceContext {
                method: "where".into(),
                context_type: TypeRef::Int(IntKind::I32),
            }
        );
    }
}
