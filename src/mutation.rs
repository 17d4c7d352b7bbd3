//! Registered business routines invoked by `mutation` operations.
//!
//! A [`MutationDescriptor`] declares the routine's arguments, the services it
//! needs and who may call it. Invocation checks authorization, binds the
//! supplied arguments into a synthesized argument record, resolves services
//! and then calls the routine.

use std::{any::Any, fmt, sync::Arc};

use log::debug;
use thiserror::Error;

use crate::{
    auth::{AuthorizationRequirement, ClaimSet, authorize},
    compiler::{CompileError, Variables},
    evaluator::EvalError,
    record::RecordTypeCache,
    schema::{ArgumentDefinition, Schema, bind_arguments, to_camel_case},
    services::{ResolvedServices, ServiceKey, ServiceProvider},
    types::TypeRef,
    value::{Record, Value},
};

#[derive(Debug, Clone, PartialEq, Error)]
pub enum MutationError {
    #[error(transparent)]
    Compile(#[from] CompileError),

    /// The routine itself reported a failure
    #[error("{0}")]
    Routine(String),

    #[error(transparent)]
    Eval(#[from] EvalError),
}

pub type MutationFn =
    Arc<dyn Fn(MutationInvocation) -> Result<MutationResult, String> + Send + Sync>;

/// Everything a routine receives when invoked.
#[derive(Debug)]
pub struct MutationInvocation {
    /// Fresh host context for this invocation
    pub context: Value,
    /// Bound arguments, one field per declared argument
    pub arguments: Record,
    pub services: ResolvedServices,
}

impl MutationInvocation {
    pub fn argument(&self, name: &str) -> Option<&Value> {
        self.arguments.get(name)
    }

    pub fn service<T: Any + Send + Sync>(&self) -> Option<&T> {
        self.services.get::<T>()
    }
}

/// What a routine hands back.
#[derive(Debug, Clone, PartialEq)]
pub enum MutationResult {
    /// A materialized result; the requested selection runs directly on it.
    Value { value: Value, ty: TypeRef },
    /// An EQL expression over a fresh host context that yields the result.
    Requery {
        expression: String,
        variables: Variables,
    },
}

impl MutationResult {
    pub fn value(value: impl Into<Value>) -> Self {
        let value = value.into();
        let ty = value.static_type();
        MutationResult::Value { value, ty }
    }

    pub fn typed(value: impl Into<Value>, ty: TypeRef) -> Self {
        MutationResult::Value {
            value: value.into(),
            ty,
        }
    }

    pub fn requery(expression: impl Into<String>) -> Self {
        MutationResult::Requery {
            expression: expression.into(),
            variables: Variables::new(),
        }
    }

    /// Adds a variable to a re-query; no effect on a materialized result.
    pub fn with_variable(mut self, name: impl Into<String>, value: impl Into<Value>) -> Self {
        if let MutationResult::Requery { variables, .. } = &mut self {
            variables.insert(name.into(), value.into());
        }
        self
    }
}

#[derive(Clone)]
pub struct MutationDescriptor {
    name: String,
    context_type: TypeRef,
    arguments: Vec<ArgumentDefinition>,
    services: Vec<ServiceKey>,
    authorization: Option<AuthorizationRequirement>,
    result_type: TypeRef,
    description: Option<String>,
    target: MutationFn,
}

impl MutationDescriptor {
    /// Descriptor for routine `name`, exposed under its camelCase name.
    pub fn new<F>(name: &str, result_type: TypeRef, target: F) -> Self
    where
        F: Fn(MutationInvocation) -> Result<MutationResult, String> + Send + Sync + 'static,
    {
        MutationDescriptor {
            name: to_camel_case(name),
            context_type: TypeRef::Any,
            arguments: Vec::new(),
            services: Vec::new(),
            authorization: None,
            result_type,
            description: None,
            target: Arc::new(target),
        }
    }

    /// Declares an argument. Its name is camelCased.
    pub fn with_argument(mut self, mut argument: ArgumentDefinition) -> Self {
        argument.name = to_camel_case(&argument.name);
        self.arguments.push(argument);
        self
    }

    pub fn with_service<T: Any + Send + Sync>(mut self) -> Self {
        self.services.push(ServiceKey::of::<T>());
        self
    }

    pub fn with_authorization(mut self, requirement: AuthorizationRequirement) -> Self {
        self.authorization = Some(requirement);
        self
    }

    pub fn with_context_type(mut self, ty: TypeRef) -> Self {
        self.context_type = ty;
        self
    }

    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = Some(description.into());
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn context_type(&self) -> &TypeRef {
        &self.context_type
    }

    pub fn result_type(&self) -> &TypeRef {
        &self.result_type
    }

    pub fn arguments(&self) -> &[ArgumentDefinition] {
        &self.arguments
    }

    pub fn description(&self) -> Option<&str> {
        self.description.as_deref()
    }

    /// Runs the routine for a caller holding `claims`.
    ///
    /// # Errors
    ///
    /// - `Authorization` when the caller's claims do not satisfy the
    ///   requirement; the routine is not called
    /// - `InvalidArgument` for unknown, missing or unconvertible arguments
    /// - `MissingService` when a declared service is not registered
    /// - `Routine` when the routine itself fails
    pub fn invoke(
        &self,
        context: Value,
        supplied: &[(String, Value)],
        services: &ServiceProvider,
        claims: &ClaimSet,
        schema: &Schema,
    ) -> Result<MutationResult, MutationError> {
        authorize(&self.name, self.authorization.as_ref(), claims)?;

        let bound = bind_arguments(&self.name, &self.arguments, supplied, schema)?;
        let record_type = RecordTypeCache::global().get_or_create(
            self.arguments
                .iter()
                .map(|arg| (arg.name.clone(), arg.ty.clone())),
        );
        let mut arguments = Record::new(record_type);
        for (index, (_, value)) in bound.iter().enumerate() {
            arguments.set(index, value.clone());
        }

        let services = services
            .resolve(&self.services)
            .map_err(|key| CompileError::MissingService(key.name().to_string()))?;

        debug!(
            "invoking mutation '{}' with {} argument(s) and {} service(s)",
            self.name,
            bound.len(),
            services.len()
        );
        (self.target)(MutationInvocation {
            context,
            arguments,
            services,
        })
        .map_err(MutationError::Routine)
    }
}

impl fmt::Debug for MutationDescriptor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MutationDescriptor")
            .field("name", &self.name)
            .field("context_type", &self.context_type)
            .field("arguments", &self.arguments)
            .field("services", &self.services)
            .field("result_type", &self.result_type)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::IntKind;

    struct Counter(i64);

    fn add() -> MutationDescriptor {
        MutationDescriptor::new("AddPoints", TypeRef::Int(IntKind::I64), |call| {
            let base = call.service::<Counter>().map(|c| c.0).unwrap_or_default();
            let points = call
                .argument("points")
                .and_then(Value::as_i128)
                .ok_or("points missing")?;
            Ok(MutationResult::value(Value::Integer(base + points as i64)))
        })
        .with_argument(ArgumentDefinition::new("Points", TypeRef::Int(IntKind::I32)))
        .with_service::<Counter>()
    }

    #[test]
    fn test_invokes_with_arguments_and_services() {
        let services = ServiceProvider::new().with(Counter(10));
        let result = add()
            .invoke(
                Value::Null,
                &[("points".into(), Value::Integer(5))],
                &services,
                &ClaimSet::new(),
                &Schema::default(),
            )
            .unwrap();
        assert_eq!(result, MutationResult::value(Value::Integer(15)));
    }

    #[test]
    fn test_missing_service() {
        let err = add()
            .invoke(
                Value::Null,
                &[("points".into(), Value::Integer(5))],
                &ServiceProvider::new(),
                &ClaimSet::new(),
                &Schema::default(),
            )
            .unwrap_err();
        assert!(matches!(err, MutationError::Compile(CompileError::MissingService(_))));
    }

    #[test]
    fn test_denied_before_binding() {
        let mutation = add().with_authorization(AuthorizationRequirement::new().require("admin"));
        // Arguments are invalid too, but authorization is checked first
        let err = mutation
            .invoke(
                Value::Null,
                &[],
                &ServiceProvider::new(),
                &ClaimSet::new(),
                &Schema::default(),
            )
            .unwrap_err();
        assert!(matches!(err, MutationError::Compile(CompileError::Authorization { .. })));
    }
}
