// tests/compiler_tests.rs

use chrono::NaiveDate;
use eql_lang::{
    CompileError, EnumType, EnumValue, EvalError, IntKind, Object, Schema, SchemaField, SchemaType,
    SequenceArguments, ServiceProvider, TypeRef, Value, Variables, compile,
};
use pretty_assertions::assert_eq;
use rstest::rstest;
use rust_decimal::Decimal;
use uuid::Uuid;

const ADA_ID: &str = "c5d0a7d4-86d1-4f8e-9a4e-3c8e8e4d6b01";

struct Greeter {
    greeting: String,
}

fn schema() -> Schema {
    Schema::builder("Query")
        .enumeration(EnumType::new("Status").member("Active", 1).member("Retired", 2))
        .object(
            SchemaType::new("Query")
                .field(
                    SchemaField::member("people", TypeRef::list(TypeRef::Object("Person".into())))
                        .with_sequence_arguments(SequenceArguments::all()),
                )
                .member("title", TypeRef::String)
                .member("small", TypeRef::Int(IntKind::I16))
                .member("big", TypeRef::Int(IntKind::I64))
                .member("signed", TypeRef::Int(IntKind::I32))
                .member("unsigned", TypeRef::Int(IntKind::U32))
                .member("ubig", TypeRef::Int(IntKind::U64))
                .member("flag", TypeRef::nullable(TypeRef::Boolean))
                .field(SchemaField::computed(
                    "adultCount",
                    TypeRef::Int(IntKind::I32),
                    "people.count(age >= 18)",
                )),
        )
        .object(
            SchemaType::new("Person")
                .member("Id", TypeRef::Guid)
                .member("name", TypeRef::String)
                .member("age", TypeRef::Int(IntKind::I32))
                .member("salary", TypeRef::Decimal)
                .member("status", TypeRef::Enum("Status".into()))
                .member("born", TypeRef::DateTime)
                .member("manager", TypeRef::Object("Person".into()))
                .field(SchemaField::service::<Greeter, _>(
                    "greeting",
                    TypeRef::String,
                    &["name"],
                    |greeter, args| {
                        let name = args[0].as_str().ok_or("name must be a string")?;
                        if name.is_empty() {
                            return Err("cannot greet nobody".to_string());
                        }
                        Ok(Value::String(format!("{}, {}", greeter.greeting, name)))
                    },
                )),
        )
        .build()
}

fn person(id: Uuid, name: &str, age: i64, salary: Decimal, status: i64, born: (i32, u32, u32)) -> Value {
    let born = NaiveDate::from_ymd_opt(born.0, born.1, born.2)
        .and_then(|d| d.and_hms_opt(0, 0, 0))
        .unwrap();
    Value::Object(
        Object::new("Person")
            .with("Id", id)
            .with("name", name)
            .with("age", age)
            .with("salary", salary)
            .with(
                "status",
                Value::Enum(EnumValue {
                    type_name: "Status".into(),
                    name: None,
                    value: status,
                }),
            )
            .with("born", born)
            .with("manager", Value::Null),
    )
}

fn context() -> Value {
    let people = vec![
        person(Uuid::parse_str(ADA_ID).unwrap(), "Ada", 36, Decimal::new(1200050, 2), 1, (1988, 12, 10)),
        person(Uuid::nil(), "Bob", 17, Decimal::new(300, 0), 1, (2007, 3, 1)),
        person(Uuid::new_v4(), "Cy", 36, Decimal::new(4500, 1), 2, (1988, 1, 5)),
        person(Uuid::new_v4(), "", 52, Decimal::new(0, 0), 2, (1972, 6, 30)),
    ];
    Value::Object(
        Object::new("Query")
            .with("people", people)
            .with("title", "Staff")
            .with("small", 5)
            .with("big", 5i64)
            .with("signed", -1)
            .with("unsigned", 4_000_000_000u64)
            .with("ubig", u64::MAX)
            .with("flag", Value::Null),
    )
}

fn run(source: &str) -> Result<Value, String> {
    run_with(source, &Variables::new())
}

fn run_with(source: &str, variables: &Variables) -> Result<Value, String> {
    let schema = schema();
    let query = compile(source, schema.context_type(), Some(&schema), None, variables)
        .map_err(|e| e.to_string())?;
    let services = ServiceProvider::new().with(Greeter {
        greeting: "Hello".into(),
    });
    query
        .execute_with(context(), &services)
        .map_err(|e| e.to_string())
}

fn compile_err(source: &str) -> CompileError {
    let schema = schema();
    compile(source, schema.context_type(), Some(&schema), None, &Variables::new()).unwrap_err()
}

// ============================================================================
// Literals
// ============================================================================

#[rstest]
#[case(0)]
#[case(1)]
#[case(-1)]
#[case(2147483647)]
#[case(2147483648)]
#[case(-2147483649)]
#[case(i64::MAX)]
#[case(i64::MIN)]
fn test_integer_literals_round_trip(#[case] n: i64) {
    let query = compile(&n.to_string(), TypeRef::Any, None, None, &Variables::new()).unwrap();
    assert_eq!(query.execute(Value::Null).unwrap(), Value::Integer(n));
}

#[rstest]
#[case("12.50", Decimal::new(1250, 2))]
#[case("0.1", Decimal::new(1, 1))]
#[case("-3.25", Decimal::new(-325, 2))]
fn test_decimal_literals(#[case] source: &str, #[case] expected: Decimal) {
    let query = compile(source, TypeRef::Any, None, None, &Variables::new()).unwrap();
    assert_eq!(query.execute(Value::Null).unwrap(), Value::Decimal(expected));
}

#[test]
fn test_escaped_string_literal() {
    let query = compile(r#""\"Hello\" there""#, TypeRef::Any, None, None, &Variables::new()).unwrap();
    assert_eq!(query.execute(Value::Null).unwrap(), Value::from("\"Hello\" there"));
}

// ============================================================================
// Identifiers
// ============================================================================

#[test]
fn test_bare_identifier_reads_field() {
    assert_eq!(run("title").unwrap(), Value::from("Staff"));
}

#[test]
fn test_unknown_identifier_names_field_and_type() {
    assert_eq!(
        compile_err("email"),
        CompileError::UnknownField {
            field: "email".into(),
            context_type: "Query".into(),
        }
    );
}

#[test]
fn test_member_names_are_camel_cased() {
    assert_eq!(
        run("people.first().id").unwrap(),
        Value::Guid(Uuid::parse_str(ADA_ID).unwrap())
    );
    assert!(matches!(compile_err("people.first().Id"), CompileError::UnknownField { .. }));
}

#[test]
fn test_computed_field() {
    assert_eq!(run("adultCount").unwrap(), Value::Integer(3));
}

#[test]
fn test_null_member_access_propagates() {
    assert_eq!(run("people.first().manager.name").unwrap(), Value::Null);
    assert_eq!(
        run("people.where(name = \"Nobody\").first().name").unwrap(),
        Value::Null
    );
}

// ============================================================================
// Operators and coercion
// ============================================================================

#[test]
fn test_different_integer_widths_compare_by_value() {
    assert_eq!(run("small = big").unwrap(), Value::Boolean(true));
    assert_eq!(run("small < big + 1").unwrap(), Value::Boolean(true));
}

#[rstest]
#[case("signed = unsigned", false)]
#[case("unsigned = signed", false)]
#[case("signed != unsigned", true)]
#[case("signed < unsigned", true)]
#[case("unsigned > signed", true)]
#[case("big < ubig", true)]
#[case("ubig = big", false)]
#[case("unsigned > 3999999999", true)]
fn test_signed_and_unsigned_compare_without_overflow(#[case] source: &str, #[case] expected: bool) {
    assert_eq!(run(source).unwrap(), Value::Boolean(expected));
}

#[test]
fn test_arithmetic_precedence() {
    let query = compile("1 + 2 * 3 ^ 2 - 10 % 4", TypeRef::Any, None, None, &Variables::new()).unwrap();
    assert_eq!(query.execute(Value::Null).unwrap(), Value::Integer(17));
}

#[test]
fn test_decimal_arithmetic() {
    assert_eq!(
        run("people.first().salary * 2").unwrap(),
        Value::Decimal(Decimal::new(2400100, 2))
    );
    assert_eq!(
        run("people.first().salary + 0.5").unwrap(),
        Value::Decimal(Decimal::new(1200100, 2))
    );
}

#[test]
fn test_string_concatenation_and_ordering() {
    assert_eq!(run("title + \"!\"").unwrap(), Value::from("Staff!"));
    assert_eq!(
        run("people.where(name < \"B\" and name != \"\").count()").unwrap(),
        Value::Integer(1)
    );
}

#[test]
fn test_enum_member_names() {
    assert_eq!(run("people.count(status = \"Retired\")").unwrap(), Value::Integer(2));
    assert_eq!(run("people.count(status = 1)").unwrap(), Value::Integer(2));
    assert!(matches!(
        compile_err("people.count(status = \"Gone\")"),
        CompileError::InvalidArgument { .. }
    ));
}

#[test]
fn test_guid_text_comparison() {
    let source = format!("people.where(id = \"{}\").first().name", ADA_ID);
    assert_eq!(run(&source).unwrap(), Value::from("Ada"));
    assert_eq!(
        compile_err("people.count(id = \"abc\")"),
        CompileError::TypeMismatch {
            op: "=".into(),
            left: TypeRef::Guid,
            right: TypeRef::String,
        }
    );
}

#[test]
fn test_datetime_text_comparison() {
    assert_eq!(run("people.count(born < \"1988-06-01\")").unwrap(), Value::Integer(2));
    assert_eq!(
        run("people.count(born >= \"1988-12-10T00:00:00\")").unwrap(),
        Value::Integer(2)
    );
}

#[test]
fn test_nullable_boolean_predicate() {
    assert_eq!(run("if flag then 1 else 2").unwrap(), Value::Integer(2));
}

#[test]
fn test_type_mismatch() {
    assert!(matches!(
        compile_err("title - 1"),
        CompileError::TypeMismatch { .. }
    ));
    assert!(matches!(
        compile_err("small and true"),
        CompileError::TypeMismatch { .. }
    ));
}

#[test]
fn test_integer_overflow_is_an_error() {
    let err = run("small * 10000").unwrap_err();
    assert!(err.contains("overflow"), "{}", err);
}

#[test]
fn test_division_by_zero() {
    let query = compile("1 / 0", TypeRef::Any, None, None, &Variables::new()).unwrap();
    assert_eq!(query.execute(Value::Null), Err(EvalError::DivisionByZero));
}

// ============================================================================
// Conditionals
// ============================================================================

#[rstest]
#[case("if title then 1 else 2", "title")]
#[case("if small + 1 then 1 else 2", "small + 1")]
#[case("people ? 1 : 2", "people")]
fn test_non_boolean_condition_fails(#[case] source: &str, #[case] test: &str) {
    match compile_err(source) {
        CompileError::ConditionType { test: text, .. } => assert_eq!(text, test),
        other => panic!("expected a condition type error, got {:?}", other),
    }
}

#[test]
fn test_conditional_branches_unify() {
    assert_eq!(run("if small > 1 then big else 0").unwrap(), Value::Integer(5));
    assert_eq!(run("if small > 10 then 1 else null").unwrap(), Value::Null);
    assert_eq!(
        run("small > 1 ? \"many\" : \"few\"").unwrap(),
        Value::from("many")
    );
}

#[test]
fn test_conditional_branches_of_different_types() {
    assert_eq!(run("if flag then 1 else \"none\"").unwrap(), Value::from("none"));
    assert_eq!(run("if small > 1 then title else small").unwrap(), Value::from("Staff"));
    assert_eq!(run("if small > 10 then title else small").unwrap(), Value::Integer(5));
}

// ============================================================================
// Methods
// ============================================================================

#[test]
fn test_where_first_matches_manual_evaluation() {
    let expected = context()
        .get("people")
        .and_then(Value::as_list)
        .and_then(|people| {
            people
                .iter()
                .find(|p| p.get("age").and_then(Value::as_i128).is_some_and(|a| a > 30))
        })
        .and_then(|p| p.get("name"))
        .cloned()
        .unwrap();
    assert_eq!(run("people.where(age > 30).first().name").unwrap(), expected);
}

#[test]
fn test_first_last_count_with_predicates() {
    assert_eq!(run("people.first(age < 18).name").unwrap(), Value::from("Bob"));
    assert_eq!(run("people.last(age = 36).name").unwrap(), Value::from("Cy"));
    assert_eq!(run("people.count()").unwrap(), Value::Integer(4));
}

#[test]
fn test_order_by_is_stable() {
    assert_eq!(run("people.orderBy(age).last().name").unwrap(), Value::from(""));
    // Ada and Cy share age 36 and keep their input order in both directions
    assert_eq!(
        run("people.orderByDesc(age).skip(1).first().name").unwrap(),
        Value::from("Ada")
    );
    assert_eq!(
        run("people.orderBy(age).skip(1).first().name").unwrap(),
        Value::from("Ada")
    );
}

#[test]
fn test_skip_and_take() {
    assert_eq!(run("people.skip(1).take(2).count()").unwrap(), Value::Integer(2));
    assert_eq!(run("people.take(10).count()").unwrap(), Value::Integer(4));
    assert_eq!(run("people.skip(10).first().name").unwrap(), Value::Null);
}

#[test]
fn test_take_is_spliced_below_member_chain() {
    assert_eq!(run("people.first().name.take(1)").unwrap(), Value::from("Ada"));
}

#[test]
fn test_in_and_string_methods() {
    assert_eq!(
        run("people.count(name.in(\"Ada\", \"Cy\", \"Zed\"))").unwrap(),
        Value::Integer(2)
    );
    assert_eq!(run("people.count(age.in(17, 52))").unwrap(), Value::Integer(2));
    assert_eq!(run("people.count(name.startsWith(\"A\"))").unwrap(), Value::Integer(1));
    assert_eq!(run("people.count(name.endsWith(\"y\"))").unwrap(), Value::Integer(1));
    assert_eq!(run("people.count(name.contains(\"o\"))").unwrap(), Value::Integer(1));
    assert_eq!(run("people.count(name.notContains(\"o\"))").unwrap(), Value::Integer(3));
    assert!(matches!(
        compile_err("people.count(name.in(\"Ada\", 1))"),
        CompileError::UnsupportedType { .. }
    ));
}

#[test]
fn test_not() {
    assert_eq!(run("people.count(not(age > 18))").unwrap(), Value::Integer(1));
    assert_eq!(run("people.count(!name.startsWith(\"A\"))").unwrap(), Value::Integer(3));
}

#[test]
fn test_distinct() {
    assert_eq!(
        run("people.where(age = 36).distinct().count()").unwrap(),
        Value::Integer(2)
    );
}

#[test]
fn test_method_errors() {
    assert!(matches!(compile_err("people.sum()"), CompileError::UnknownMethod { .. }));
    assert!(matches!(
        compile_err("people.first(age > 1, age < 2)"),
        CompileError::Arity { actual: 2, .. }
    ));
    assert!(matches!(
        compile_err("people.where(name)"),
        CompileError::PredicateType { .. }
    ));
    assert_eq!(
        compile_err("title.count()"),
        CompileError::NoSequenceContext {
            method: "count".into(),
            context_type: TypeRef::String,
        }
    );
    assert_eq!(
        compile_err("people.first().name.count()"),
        CompileError::NoSequenceContext {
            method: "count".into(),
            context_type: TypeRef::String,
        }
    );
    assert!(matches!(
        compile_err("people.orderBy(manager)"),
        CompileError::UnsupportedType { .. }
    ));
}

// ============================================================================
// Variables
// ============================================================================

#[test]
fn test_variables_become_constants() {
    let mut vars = Variables::new();
    vars.insert("min".into(), Value::Integer(30));
    vars.insert("prefix".into(), Value::from("C"));
    assert_eq!(
        run_with("people.count(age > $min and name.startsWith($prefix))", &vars).unwrap(),
        Value::Integer(1)
    );
}

#[test]
fn test_unknown_variable() {
    assert_eq!(compile_err("$missing"), CompileError::UnknownVariable("missing".into()));
}

// ============================================================================
// Services
// ============================================================================

#[test]
fn test_service_field() {
    assert_eq!(run("people.first().greeting").unwrap(), Value::from("Hello, Ada"));
}

#[test]
fn test_service_errors_pass_through() {
    assert_eq!(run("people.last().greeting").unwrap_err(), "cannot greet nobody");
}

#[test]
fn test_missing_service_fails_fast() {
    let schema = schema();
    let query = compile(
        "people.first().greeting",
        schema.context_type(),
        Some(&schema),
        None,
        &Variables::new(),
    )
    .unwrap();
    assert_eq!(query.services().count(), 1);
    assert!(matches!(
        query.execute(context()),
        Err(EvalError::MissingService(_))
    ));
}

// ============================================================================
// Dynamic contexts
// ============================================================================

#[test]
fn test_dynamic_context() {
    let ctx = Value::Object(Object::new("Anything").with("count", 3).with("label", "x"));
    let query = compile("count * 2 + 1", TypeRef::Any, None, None, &Variables::new()).unwrap();
    assert_eq!(query.execute(ctx.clone()).unwrap(), Value::Integer(7));
    let query = compile("label = \"x\"", TypeRef::Any, None, None, &Variables::new()).unwrap();
    assert_eq!(query.execute(ctx).unwrap(), Value::Boolean(true));
}
