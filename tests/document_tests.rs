// tests/document_tests.rs

use std::sync::{
    Arc,
    atomic::{AtomicUsize, Ordering},
};

use eql_lang::{
    ArgumentDefinition, AuthorizationRequirement, ClaimSet, CompileError, DocumentCompiler,
    ExecutionContext, FieldOutcome, IntKind, Object, RecordTypeCache, Request, Schema, SchemaField,
    SchemaType, SequenceArguments, TypeRef, Value,
};
use pretty_assertions::assert_eq;
use rstest::rstest;
use rust_decimal::Decimal;
use serde_json::json;
use uuid::Uuid;

const ADA_ID: &str = "0b4f0d7e-5c3a-4d1e-8f7b-2a9c6e1d3f50";

fn schema() -> Schema {
    Schema::builder("Query")
        .object(
            SchemaType::new("Query")
                .field(
                    SchemaField::member("people", TypeRef::list(TypeRef::Object("Person".into())))
                        .with_sequence_arguments(SequenceArguments::all()),
                )
                .field(
                    SchemaField::computed(
                        "person",
                        TypeRef::Object("Person".into()),
                        "people.where(id = $id).first()",
                    )
                    .with_argument(ArgumentDefinition::new("id", TypeRef::Guid)),
                )
                .field(SchemaField::computed(
                    "headcount",
                    TypeRef::Int(IntKind::I32),
                    "people.count()",
                ))
                .field(
                    SchemaField::member("secret", TypeRef::String)
                        .with_authorization(AuthorizationRequirement::new().require("admin")),
                )
                .field(
                    SchemaField::member("payroll", TypeRef::Decimal).with_authorization(
                        AuthorizationRequirement::new()
                            .require("a")
                            .require_any(["b", "c"]),
                    ),
                )
                .member(
                    "audit",
                    TypeRef::list(TypeRef::Object("AuditEntry".into())),
                ),
        )
        .object(
            SchemaType::new("Person")
                .member("Id", TypeRef::Guid)
                .member("name", TypeRef::String)
                .member("age", TypeRef::Int(IntKind::I32))
                .member("manager", TypeRef::Object("Person".into())),
        )
        .object(
            SchemaType::new("AuditEntry")
                .member("action", TypeRef::String)
                .with_authorization(AuthorizationRequirement::new().require("auditor")),
        )
        .build()
}

fn person(id: Uuid, name: &str, age: i32, manager: Value) -> Value {
    Value::Object(
        Object::new("Person")
            .with("Id", id)
            .with("name", name)
            .with("age", age)
            .with("manager", manager),
    )
}

fn context() -> Value {
    let ada = person(Uuid::parse_str(ADA_ID).unwrap(), "Ada", 36, Value::Null);
    let bob = person(Uuid::new_v4(), "Bob", 17, ada.clone());
    let cy = person(Uuid::new_v4(), "Cy", 52, ada.clone());
    Value::Object(
        Object::new("Query")
            .with("people", vec![ada, bob, cy])
            .with("secret", "swordfish")
            .with("payroll", Decimal::new(125000, 2))
            .with(
                "audit",
                vec![Value::Object(Object::new("AuditEntry").with("action", "login"))],
            ),
    )
}

fn run(source: &str, request: &Request) -> serde_json::Value {
    let schema = schema();
    DocumentCompiler::new(&schema).run(source, request, &ExecutionContext::from_value(context()))
}

// ============================================================================
// Selections
// ============================================================================

#[test]
fn test_aliases_and_sequence_arguments() {
    let response = run(
        r#"{ adults: people(filter: "age >= 18", orderBy: "name") { name years: age } }"#,
        &Request::new(),
    );
    assert_eq!(
        response,
        json!({ "data": { "adults": [
            { "name": "Ada", "years": 36 },
            { "name": "Cy", "years": 52 }
        ] } })
    );
}

#[test]
fn test_paging_and_descending_order() {
    let response = run(
        r#"{ people(orderByDesc: "age", skip: 1, take: 1) { name } }"#,
        &Request::new(),
    );
    assert_eq!(response, json!({ "data": { "people": [{ "name": "Ada" }] } }));
}

#[test]
fn test_nested_object_selection_with_null_parent() {
    let response = run("{ people { name manager { name } } }", &Request::new());
    assert_eq!(
        response["data"]["people"],
        json!([
            { "name": "Ada", "manager": null },
            { "name": "Bob", "manager": { "name": "Ada" } },
            { "name": "Cy", "manager": { "name": "Ada" } }
        ])
    );
}

#[test]
fn test_fields_keep_request_order() {
    let response = run("{ people(take: 1) { name id age } }", &Request::new());
    let first = response["data"]["people"][0].as_object().unwrap();
    let keys: Vec<&str> = first.keys().map(String::as_str).collect();
    assert_eq!(keys, vec!["name", "id", "age"]);
    assert_eq!(first["id"], json!(ADA_ID));
}

#[test]
fn test_fragments_expand_at_every_level() {
    let response = run(
        r#"
        query {
            people(take: 2) { ...who }
        }
        fragment who on Person { name manager { ...named } }
        fragment named on Person { name }
        "#,
        &Request::new(),
    );
    assert_eq!(
        response["data"]["people"],
        json!([
            { "name": "Ada", "manager": null },
            { "name": "Bob", "manager": { "name": "Ada" } }
        ])
    );
}

#[test]
fn test_unknown_fragment_fails_only_its_field() {
    let schema = schema();
    let document = DocumentCompiler::new(&schema)
        .compile("{ headcount people { ...missing } }", &Request::new())
        .unwrap();
    assert!(document.query("headcount").is_some());
    let failures: Vec<_> = document.failures().collect();
    assert_eq!(failures.len(), 1);
    assert_eq!(failures[0].error, CompileError::UnknownFragment("missing".into()));
    assert_eq!(failures[0].path, vec!["people".to_string()]);

    let response = run("{ headcount people { ...missing } }", &Request::new());
    assert_eq!(
        response,
        json!({
            "data": { "headcount": 3, "people": null },
            "errors": [{ "message": "Fragment 'missing' is not defined", "path": ["people"] }]
        })
    );
}

#[test]
fn test_cyclic_fragment_fails_only_its_field() {
    let response = run(
        r#"
        { headcount people { ...a } }
        fragment a on Person { name manager { ...b } }
        fragment b on Person { ...a }
        "#,
        &Request::new(),
    );
    assert_eq!(response["data"]["headcount"], json!(3));
    assert_eq!(response["data"]["people"], json!(null));
    assert_eq!(
        response["errors"],
        json!([{ "message": "Fragment 'a' spreads itself", "path": ["people"] }])
    );
}

#[test]
fn test_field_arguments() {
    let source = format!(r#"{{ person(id: "{}") {{ name }} }}"#, ADA_ID);
    let response = run(&source, &Request::new());
    assert_eq!(response, json!({ "data": { "person": { "name": "Ada" } } }));
}

#[test]
fn test_selection_on_scalar_is_rejected() {
    let response = run("{ headcount { value } }", &Request::new());
    assert_eq!(response["data"]["headcount"], json!(null));
    assert_eq!(response["errors"][0]["path"], json!(["headcount"]));
}

// ============================================================================
// Variables and operations
// ============================================================================

#[rstest]
#[case(None, json!(["Ada", "Cy"]))]
#[case(Some(40), json!(["Cy"]))]
fn test_variable_defaults_and_overrides(#[case] min: Option<i32>, #[case] expected: serde_json::Value) {
    let mut request = Request::new();
    if let Some(min) = min {
        request = request.with_variable("min", min);
    }
    let response = run(
        r#"query Adults($min: Int = 18) { people(filter: "age >= $min") { name } }"#,
        &request,
    );
    let names: Vec<serde_json::Value> = response["data"]["people"]
        .as_array()
        .unwrap()
        .iter()
        .map(|p| p["name"].clone())
        .collect();
    assert_eq!(serde_json::Value::Array(names), expected);
}

#[test]
fn test_variables_in_arguments() {
    let request = Request::new().with_variable("who", ADA_ID);
    let response = run(
        r#"query Find($who: Guid!) { person(id: $who) { name } }"#,
        &request,
    );
    assert_eq!(response["data"]["person"]["name"], json!("Ada"));
}

#[test]
fn test_required_variable_must_be_supplied() {
    let response = run(
        r#"query Find($who: Guid!) { person(id: $who) { name } }"#,
        &Request::new(),
    );
    assert_eq!(response["data"], json!(null));
    assert!(
        response["errors"][0]["message"]
            .as_str()
            .unwrap()
            .contains("$who")
    );
}

#[test]
fn test_operation_selected_by_name() {
    let source = "query A { headcount } query B { people(take: 1) { name } }";
    let response = run(source, &Request::new().with_operation("B"));
    assert_eq!(response, json!({ "data": { "people": [{ "name": "Ada" }] } }));

    let response = run(source, &Request::new());
    assert_eq!(response, json!({ "data": { "headcount": 3 } }));
}

#[test]
fn test_unknown_operation_is_a_document_error() {
    let response = run("query A { headcount }", &Request::new().with_operation("B"));
    assert_eq!(response["data"], json!(null));
    assert_eq!(
        response["errors"],
        json!([{ "message": "Operation 'B' not found in document" }])
    );
}

// ============================================================================
// Errors
// ============================================================================

#[test]
fn test_field_errors_keep_siblings() {
    let response = run(
        r#"{ headcount bogus: people(filter: "age >") { name } nope person { name } }"#,
        &Request::new(),
    );
    assert_eq!(response["data"]["headcount"], json!(3));
    assert_eq!(response["data"]["bogus"], json!(null));
    assert_eq!(response["data"]["nope"], json!(null));
    assert_eq!(response["data"]["person"], json!(null));

    let paths: Vec<serde_json::Value> = response["errors"]
        .as_array()
        .unwrap()
        .iter()
        .map(|e| e["path"].clone())
        .collect();
    assert_eq!(paths, vec![json!(["bogus"]), json!(["nope"]), json!(["person"])]);
    assert_eq!(
        response["errors"][1]["message"],
        json!("Field 'nope' not found on type Query")
    );
}

#[test]
fn test_nested_error_path() {
    let schema = schema();
    let document = DocumentCompiler::new(&schema)
        .compile("{ people { name manager { shoeSize } } }", &Request::new())
        .unwrap();
    let failures: Vec<_> = document.failures().collect();
    assert_eq!(failures.len(), 1);
    assert_eq!(failures[0].path, vec!["people", "manager", "shoeSize"]);
}

#[test]
fn test_parse_error_fails_the_document() {
    let response = run("{ people { name ", &Request::new());
    assert_eq!(response["data"], json!(null));
    assert!(response["errors"][0]["path"].is_null());
}

#[test]
fn test_successful_response_has_no_errors_key() {
    let response = run("{ headcount }", &Request::new());
    assert!(response.get("errors").is_none());
}

// ============================================================================
// Authorization
// ============================================================================

#[test]
fn test_field_requirement() {
    let response = run("{ secret }", &Request::new());
    assert_eq!(
        response["errors"],
        json!([{ "message": "Not authorized to access 'Query.secret'", "path": ["secret"] }])
    );

    let request = Request::new().with_claims(ClaimSet::with_roles(["admin"]));
    assert_eq!(run("{ secret }", &request), json!({ "data": { "secret": "swordfish" } }));
}

#[test]
fn test_type_requirement() {
    let schema = schema();
    let document = DocumentCompiler::new(&schema)
        .compile("{ audit { action } }", &Request::new())
        .unwrap();
    match document.field("audit") {
        Some(FieldOutcome::Failed(failure)) => assert!(matches!(
            &failure.error,
            CompileError::Authorization { target, .. } if target == "AuditEntry"
        )),
        other => panic!("expected an authorization failure, got {:?}", other),
    }

    let request = Request::new().with_claims(ClaimSet::with_roles(["auditor"]));
    assert_eq!(
        run("{ audit { action } }", &request),
        json!({ "data": { "audit": [{ "action": "login" }] } })
    );
}

#[rstest]
#[case(&["a", "b"], true)]
#[case(&["a", "c"], true)]
#[case(&["a"], false)]
#[case(&["b"], false)]
#[case(&["b", "c"], false)]
fn test_every_group_must_be_met(#[case] roles: &[&str], #[case] permitted: bool) {
    let request = Request::new().with_claims(ClaimSet::with_roles(roles.iter().copied()));
    let response = run("{ payroll }", &request);
    if permitted {
        assert_eq!(response, json!({ "data": { "payroll": 1250 } }));
    } else {
        assert_eq!(response["data"]["payroll"], json!(null));
        assert_eq!(response["errors"][0]["path"], json!(["payroll"]));
    }
}

#[test]
fn test_roles_are_read_from_the_configured_claim_type() {
    let claims = ClaimSet::new()
        .with_role_claim_type("groups")
        .with_claim("role", "admin");
    let response = run("{ secret }", &Request::new().with_claims(claims));
    assert!(response.get("errors").is_some());

    let claims = ClaimSet::new()
        .with_role_claim_type("groups")
        .with_claim("groups", "admin");
    let response = run("{ secret }", &Request::new().with_claims(claims));
    assert_eq!(response["data"]["secret"], json!("swordfish"));
}

// ============================================================================
// Records and execution
// ============================================================================

#[test]
fn test_record_types_are_reused_by_shape() {
    let schema = schema();
    let cache = RecordTypeCache::new();
    let compiler = DocumentCompiler::new(&schema).with_record_cache(&cache);

    compiler.compile("{ people { name age } }", &Request::new()).unwrap();
    compiler
        .compile(r#"{ x: people(take: 1) { name age } }"#, &Request::new())
        .unwrap();
    assert_eq!(cache.len(), 1);

    compiler.compile("{ people { age name } }", &Request::new()).unwrap();
    assert_eq!(cache.len(), 2);
}

#[test]
fn test_query_fields_share_one_context() {
    let calls = Arc::new(AtomicUsize::new(0));
    let counter = Arc::clone(&calls);
    let exec = ExecutionContext::new(move || {
        counter.fetch_add(1, Ordering::SeqCst);
        context()
    });
    let schema = schema();
    let response = DocumentCompiler::new(&schema).run(
        "{ headcount people(take: 1) { name } }",
        &Request::new(),
        &exec,
    );
    assert!(response.get("errors").is_none());
    assert_eq!(calls.load(Ordering::SeqCst), 1);
}

#[test]
fn test_compiled_queries_are_reusable() {
    let schema = schema();
    let document = DocumentCompiler::new(&schema)
        .compile("{ headcount }", &Request::new())
        .unwrap();
    let query = document.query("headcount").unwrap();
    assert_eq!(query.execute(context()).unwrap(), Value::Integer(3));
    assert_eq!(query.execute(context()).unwrap(), Value::Integer(3));
}

#[test]
fn test_documents_compile_concurrently_on_a_shared_schema() {
    let schema = schema();
    let cache = RecordTypeCache::new();
    let exec = ExecutionContext::from_value(context());

    std::thread::scope(|scope| {
        let handles: Vec<_> = [0, 18, 40, 60]
            .into_iter()
            .map(|min| {
                let (schema, cache, exec) = (&schema, &cache, &exec);
                scope.spawn(move || {
                    let compiler = DocumentCompiler::new(schema).with_record_cache(cache);
                    let source = format!(
                        r#"{{ headcount people(filter: "age > {}", orderBy: "name") {{ name age }} }}"#,
                        min
                    );
                    (0..25)
                        .map(|_| compiler.run(&source, &Request::new(), exec))
                        .collect::<Vec<_>>()
                })
            })
            .collect();

        let expected = [
            json!(["Ada", "Bob", "Cy"]),
            json!(["Ada", "Cy"]),
            json!(["Cy"]),
            json!([]),
        ];
        for (handle, expected) in handles.into_iter().zip(expected) {
            for response in handle.join().unwrap() {
                assert!(response.get("errors").is_none(), "{}", response);
                assert_eq!(response["data"]["headcount"], json!(3));
                let names: Vec<_> = response["data"]["people"]
                    .as_array()
                    .unwrap()
                    .iter()
                    .map(|p| p["name"].clone())
                    .collect();
                assert_eq!(serde_json::Value::Array(names), expected);
            }
        }
    });

    assert_eq!(cache.len(), 1);
}
