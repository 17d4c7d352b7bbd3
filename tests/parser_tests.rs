// tests/parser_tests.rs

use eql_lang::ast::{ArgValue, BinOp, Expr, OperationKind, Selection};
use eql_lang::lexer::Lexer;
use eql_lang::parser::Parser;
use rstest::rstest;

fn parse(source: &str) -> Expr {
    Parser::new(Lexer::new(source)).unwrap().parse().unwrap()
}

fn parse_err(source: &str) -> String {
    match Parser::new(Lexer::new(source)).and_then(|mut p| p.parse()) {
        Ok(expr) => panic!("expected parse error, got {:?}", expr),
        Err(e) => e.to_string(),
    }
}

// ============================================================================
// Literals
// ============================================================================

#[rstest]
#[case("0", 0)]
#[case("42", 42)]
#[case("-17", -17)]
#[case("9223372036854775807", i64::MAX)]
#[case("-9223372036854775808", i64::MIN)]
fn test_integer_literals(#[case] source: &str, #[case] expected: i64) {
    assert_eq!(parse(source), Expr::Integer(expected));
}

#[test]
fn test_integer_literal_out_of_range() {
    assert!(parse_err("9223372036854775808").contains("out of range"));
}

#[test]
fn test_escaped_string() {
    assert_eq!(
        parse(r#""\"Hello\" there""#),
        Expr::String("\"Hello\" there".into())
    );
}

// ============================================================================
// Operators
// ============================================================================

#[test]
fn test_comparison() {
    assert!(matches!(
        parse("price > 100"),
        Expr::BinaryOp {
            op: BinOp::GreaterThan,
            ..
        }
    ));
}

#[test]
fn test_parentheses() {
    // Should be: Multiply(Add(1, 2), 3)
    match parse("(1 + 2) * 3") {
        Expr::BinaryOp {
            op: BinOp::Multiply,
            left,
            right,
        } => {
            assert!(matches!(*left, Expr::BinaryOp { op: BinOp::Add, .. }));
            assert_eq!(*right, Expr::Integer(3));
        }
        other => panic!("Expected multiplication, got {:?}", other),
    }
}

#[rstest]
#[case("1 + 2 * 3", BinOp::Add)]
#[case("a or b and c", BinOp::Or)]
#[case("a = 1 and b = 2", BinOp::And)]
#[case("1 < 2 = true", BinOp::Equal)]
#[case("2 * 3 ^ 2", BinOp::Multiply)]
fn test_precedence(#[case] source: &str, #[case] root: BinOp) {
    match parse(source) {
        Expr::BinaryOp { op, .. } => assert_eq!(op, root),
        other => panic!("Expected binary op, got {:?}", other),
    }
}

#[test]
fn test_power_is_right_associative() {
    match parse("2 ^ 3 ^ 2") {
        Expr::BinaryOp {
            op: BinOp::Power,
            left,
            right,
        } => {
            assert_eq!(*left, Expr::Integer(2));
            assert!(matches!(*right, Expr::BinaryOp { op: BinOp::Power, .. }));
        }
        other => panic!("Expected power, got {:?}", other),
    }
}

#[test]
fn test_symbolic_logical_operators() {
    assert_eq!(parse("a && b"), parse("a and b"));
    assert_eq!(parse("a || b"), parse("a or b"));
    assert_eq!(parse("a == b"), parse("a = b"));
}

#[test]
fn test_unary_not() {
    let expected = Expr::Call {
        object: None,
        method: "not".into(),
        args: vec![Expr::Identifier("active".into())],
    };
    assert_eq!(parse("not active"), expected);
    assert_eq!(parse("!active"), expected);
}

// ============================================================================
// Paths and calls
// ============================================================================

#[test]
fn test_member_path() {
    assert_eq!(
        parse("manager.address.city"),
        Expr::Access {
            object: Box::new(Expr::Access {
                object: Box::new(Expr::Identifier("manager".into())),
                name: "address".into(),
            }),
            name: "city".into(),
        }
    );
}

#[test]
fn test_method_chain() {
    let Expr::Access { object, name } = parse("people.where(age > 18).first().name") else {
        panic!("expected member access");
    };
    assert_eq!(name, "name");
    let Expr::Call { object, method, args } = *object else {
        panic!("expected first()");
    };
    assert_eq!(method, "first");
    assert!(args.is_empty());
    let Some(object) = object else {
        panic!("expected a receiver");
    };
    assert!(matches!(*object, Expr::Call { ref method, .. } if method == "where"));
}

#[test]
fn test_call_without_receiver() {
    assert!(matches!(
        parse("count()"),
        Expr::Call { object: None, ref method, .. } if method == "count"
    ));
}

#[test]
fn test_keyword_as_member_name() {
    assert!(matches!(
        parse("flags.not"),
        Expr::Access { ref name, .. } if name == "not"
    ));
}

// ============================================================================
// Conditionals
// ============================================================================

#[test]
fn test_if_then_else_keeps_test_text() {
    let Expr::Conditional { test_text, .. } = parse("if age >= 18 then \"adult\" else \"minor\"") else {
        panic!("expected conditional");
    };
    assert_eq!(test_text, "age >= 18");
}

#[test]
fn test_ternary() {
    let Expr::Conditional { test_text, then, .. } = parse("age > 18 ? 1 : 2") else {
        panic!("expected conditional");
    };
    assert_eq!(test_text, "age > 18");
    assert_eq!(*then, Expr::Integer(1));
}

// ============================================================================
// Errors
// ============================================================================

#[rstest]
#[case("1 +")]
#[case("(1 + 2")]
#[case("people.")]
#[case("if a then b")]
#[case("1 2")]
fn test_malformed_expressions(#[case] source: &str) {
    parse_err(source);
}

// ============================================================================
// Documents
// ============================================================================

#[test]
fn test_document_shorthand() {
    let doc = Parser::new(Lexer::new("{ name, age }"))
        .unwrap()
        .parse_document()
        .unwrap();
    assert_eq!(doc.operations.len(), 1);
    assert_eq!(doc.operations[0].kind, OperationKind::Query);
    assert_eq!(doc.operations[0].selections.len(), 2);
}

#[test]
fn test_document_operations_and_fragments() {
    let source = r#"
        query Adults($min: Int! = 18, $tags: [String]) {
            adults: people(filter: "age >= $min", take: 10) {
                name
                ...contact
            }
        }
        mutation Add { addPerson(name: "Ada", tags: [A, B], meta: { x: -1.5 }) { id } }
        fragment contact on Person { email }
    "#;
    let doc = Parser::new(Lexer::new(source))
        .unwrap()
        .parse_document()
        .unwrap();

    assert_eq!(doc.operations.len(), 2);
    let query = &doc.operations[0];
    assert_eq!(query.name.as_deref(), Some("Adults"));
    assert_eq!(query.variables[0].type_name, "Int!");
    assert_eq!(query.variables[0].default, Some(ArgValue::Int(18)));
    assert_eq!(query.variables[1].type_name, "[String]");

    let Selection::Field(adults) = &query.selections[0] else {
        panic!("expected field");
    };
    assert_eq!(adults.response_name(), "adults");
    assert_eq!(adults.name, "people");
    assert_eq!(adults.arguments[1], ("take".to_string(), ArgValue::Int(10)));
    assert!(matches!(
        &adults.selections[1],
        Selection::FragmentSpread { name, .. } if name == "contact"
    ));

    let mutation = &doc.operations[1];
    assert_eq!(mutation.kind, OperationKind::Mutation);
    let Selection::Field(add) = &mutation.selections[0] else {
        panic!("expected field");
    };
    assert_eq!(
        add.arguments[1].1,
        ArgValue::List(vec![ArgValue::Enum("A".into()), ArgValue::Enum("B".into())])
    );
    assert!(matches!(&add.arguments[2].1, ArgValue::Object(fields) if fields.len() == 1));

    assert_eq!(doc.fragment("contact").unwrap().type_condition, "Person");
}

#[test]
fn test_unterminated_selection_set() {
    let err = Parser::new(Lexer::new("{ name"))
        .unwrap()
        .parse_document()
        .unwrap_err();
    assert!(err.message.contains("missing '}'"));
}

#[test]
fn test_empty_document() {
    assert!(Parser::new(Lexer::new("")).unwrap().parse_document().is_err());
}
