use pretty_assertions::assert_eq;
use quarry_parser::ast::*;
use quarry_parser::{parse_query, Token};
use quarry_protocol::Value;

fn field(segments: &[&str]) -> Vec<String> {
    segments.iter().map(|s| s.to_string()).collect()
}

#[test]
fn parses_root_type_predicate_and_pipeline() {
    let query = parse_query("objects/java.lang.String[shallow > 100] | top(10, shallow)").unwrap();

    assert_eq!(query.root, SourceRoot::Objects);
    assert_eq!(
        query.selector,
        TypeSelector {
            patterns: vec![TypePattern::exact("java.lang.String")],
            include_subtypes: false,
        }
    );
    assert_eq!(
        query.predicates,
        vec![BoolExpr::Compare {
            quantifier: Quantifier::Any,
            left: ValueExpr::field(&["shallow"]),
            op: CompareOp::Gt,
            right: ValueExpr::int(100),
        }]
    );
    assert_eq!(
        query.pipeline,
        vec![PipelineOp::Top {
            count: 10,
            order_by: Some(field(&["shallow"])),
            ascending: false,
        }]
    );
}

#[test]
fn instanceof_sets_the_subtypes_flag() {
    let query = parse_query("objects/instanceof java.util.AbstractMap").unwrap();

    assert!(query.selector.include_subtypes);
    assert_eq!(
        query.selector.patterns,
        vec![TypePattern::exact("java.util.AbstractMap")]
    );
}

#[test]
fn alternative_type_names_parse_as_a_set() {
    let query = parse_query("objects/(java.lang.String|java.lang.StringBuilder)").unwrap();

    assert_eq!(
        query.selector.patterns,
        vec![
            TypePattern::exact("java.lang.String"),
            TypePattern::exact("java.lang.StringBuilder"),
        ]
    );
}

#[test]
fn glob_patterns_are_detected() {
    let query = parse_query("objects/*String*").unwrap();

    assert_eq!(query.selector.patterns, vec![TypePattern::glob("*String*")]);
}

#[test]
fn java_array_suffixes_translate_to_descriptors() {
    let cases = [
        ("objects/int[]", "[I"),
        ("objects/byte[][]", "[[B"),
        ("objects/java.lang.Object[]", "[Ljava.lang.Object;"),
        ("objects/[I", "[I"),
        ("objects/[Ljava.lang.Object;", "[Ljava.lang.Object;"),
    ];

    for (source, expected) in cases {
        let query = parse_query(source).unwrap();
        assert_eq!(query.selector.patterns[0].name, expected, "for {}", source);
    }
}

#[test]
fn leading_check_leaks_expands_to_objects() {
    let query = parse_query("checkLeaks(detector=\"growth\")").unwrap();

    assert_eq!(query.root, SourceRoot::Objects);
    assert_eq!(
        query.pipeline,
        vec![PipelineOp::CheckLeaks(CheckLeaksArgs {
            detector: Some("growth".into()),
            ..CheckLeaksArgs::default()
        })]
    );
}

#[test]
fn check_leaks_requires_exactly_one_of_detector_and_filter() {
    let both = parse_query("objects | checkLeaks(detector=\"d\", filter=shallow > 1)");
    let neither = parse_query("objects | checkLeaks(threshold=0.5)");

    assert_eq!(both.unwrap_err().kind(), "ArgumentError");
    assert_eq!(neither.unwrap_err().kind(), "ArgumentError");
}

#[test]
fn keyword_arguments_mix_with_positional_at_any_position() {
    let leading = parse_query("objects | groupBy(agg=sum, class, value=shallow)").unwrap();
    let trailing = parse_query("objects | groupBy(class, agg=sum, value=shallow)").unwrap();

    assert_eq!(leading.pipeline, trailing.pipeline);
}

#[test]
fn duplicate_keyword_arguments_are_rejected() {
    let err = parse_query("objects | groupBy(class, agg=sum, agg=max)").unwrap_err();

    assert_eq!(err.kind(), "ArgumentError");
}

#[test]
fn unknown_operator_is_its_own_error_kind() {
    let err = parse_query("objects | explode(3)").unwrap_err();

    assert_eq!(err.kind(), "UnknownOperator");
}

#[test]
fn parse_errors_carry_the_byte_offset() {
    let source = "objects | top(oops!)";
    let err = parse_query(source).unwrap_err();

    assert_eq!(err.kind(), "ParseError");
    let span = err.span().expect("parse errors point into the source");
    assert!(span.start() >= source.find("oops").unwrap());
}

#[test]
fn size_suffixes_use_binary_multipliers() {
    for (source, expected) in [
        ("objects[shallow > 1K]", 1024i64),
        ("objects[shallow > 1MB]", 1_048_576),
        ("objects[shallow > 1G]", 1_073_741_824),
    ] {
        let query = parse_query(source).unwrap();
        match &query.predicates[0] {
            BoolExpr::Compare { right, .. } => {
                assert_eq!(right, &ValueExpr::Literal(Value::Int(expected)), "for {}", source)
            }
            other => panic!("expected comparison, got {:?}", other),
        }
    }
}

#[test]
fn numeric_overflow_is_rejected_at_parse_time() {
    let err = parse_query("objects[shallow > 9223372036854775807K]").unwrap_err();

    assert_eq!(err.kind(), "ParseError");
}

#[test]
fn boolean_operators_nest_with_expected_precedence() {
    let query = parse_query("objects[a > 1 or b > 2 and not c > 3]").unwrap();

    // or is loosest: a > 1 or (b > 2 and (not c > 3))
    match &query.predicates[0] {
        BoolExpr::Or(_, right) => match right.as_ref() {
            BoolExpr::And(_, inner) => assert!(matches!(inner.as_ref(), BoolExpr::Not(_))),
            other => panic!("expected and under or, got {:?}", other),
        },
        other => panic!("expected or at the top, got {:?}", other),
    }
}

#[test]
fn quantifier_wrappers_select_the_list_mode() {
    let query = parse_query("events[all(frames.line > 0) and none(frames.line > 9000)]").unwrap();

    match &query.predicates[0] {
        BoolExpr::And(left, right) => {
            assert!(matches!(
                left.as_ref(),
                BoolExpr::Compare {
                    quantifier: Quantifier::All,
                    ..
                }
            ));
            assert!(matches!(
                right.as_ref(),
                BoolExpr::Compare {
                    quantifier: Quantifier::None,
                    ..
                }
            ));
        }
        other => panic!("expected conjunction, got {:?}", other),
    }
}

#[test]
fn select_supports_expressions_and_aliases() {
    let query =
        parse_query(r#"chunks | select(path + " (" + bytes + " bytes)" as description)"#).unwrap();

    match &query.pipeline[0] {
        PipelineOp::Select(fields) => {
            assert_eq!(fields.len(), 1);
            assert_eq!(fields[0].alias.as_deref(), Some("description"));
            assert!(matches!(fields[0].expr, ValueExpr::Binary { .. }));
        }
        other => panic!("expected select, got {:?}", other),
    }
}

#[test]
fn tight_slash_descends_spaced_slash_divides() {
    let descend = parse_query("events | select(thread/name)").unwrap();
    match &descend.pipeline[0] {
        PipelineOp::Select(fields) => {
            assert_eq!(fields[0].expr, ValueExpr::field(&["thread", "name"]));
        }
        other => panic!("expected select, got {:?}", other),
    }

    let divide = parse_query("events | select(bytes / 2 as half)").unwrap();
    match &divide.pipeline[0] {
        PipelineOp::Select(fields) => {
            assert!(matches!(
                fields[0].expr,
                ValueExpr::Binary {
                    op: BinaryOp::Divide,
                    ..
                }
            ));
        }
        other => panic!("expected select, got {:?}", other),
    }
}

#[test]
fn stream_flags_override_the_heuristic() {
    assert_eq!(parse_query("objects | count()").unwrap().force_streaming, None);
    assert_eq!(
        parse_query("objects | count() --stream").unwrap().force_streaming,
        Some(true)
    );
    assert_eq!(
        parse_query("objects | count() --no-stream")
            .unwrap()
            .force_streaming,
        Some(false)
    );
}

#[test]
fn string_templates_parse_into_parts() {
    let query = parse_query(r#"events | select("${thread.name} used ${bytes}" as line)"#).unwrap();

    match &query.pipeline[0] {
        PipelineOp::Select(fields) => match &fields[0].expr {
            ValueExpr::Template(parts) => {
                assert_eq!(parts.len(), 3);
                assert_eq!(
                    parts[0],
                    TemplatePart::Expr(ValueExpr::field(&["thread", "name"]))
                );
                assert_eq!(parts[1], TemplatePart::Text(" used ".into()));
                assert_eq!(parts[2], TemplatePart::Expr(ValueExpr::field(&["bytes"])));
            }
            other => panic!("expected template, got {:?}", other),
        },
        other => panic!("expected select, got {:?}", other),
    }
}

#[test]
fn malformed_input_is_rejected_not_guessed() {
    for source in [
        "objects |",
        "objects[shallow >]",
        "objects[shallow 100]",
        "objects/",
        "frobnicate",
        "objects | top(10",
        "objects[\"unterminated]",
    ] {
        assert!(parse_query(source).is_err(), "accepted: {}", source);
    }
}

#[test]
fn tokens_are_exposed_for_completion() {
    let tokens: Vec<Token> = quarry_parser::lex_with_whitespace("objects | count()");

    assert!(tokens.len() > 4);
    assert_eq!(tokens.last().unwrap().kind, quarry_parser::TokenKind::Eof);
}
