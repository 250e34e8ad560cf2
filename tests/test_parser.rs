use withy::lineage::extract_lineage;
use withy::parser::{EnvelopeError, parse_serialized_sql, unwrap_fixture_format};

#[test]
fn test_should_parse() {
    let responses = [
        r#"{"error": false, "statements": [{"node": {"type": "SELECT_NODE"}}]}"#,
        r#"
        {
          "error": false,
          "statements": [
            {"node": {"type": "SELECT_NODE", "select_list": 42, "from_table": "weird"}},
            {"node": {"type": "SET_OPERATION_NODE", "left": null, "right": [1, 2]}}
          ],
          "unexpected_field": {"nested": true}
        }
        "#,
        r#"{"error": false, "statements": [{"node": {"type": "CREATE_NODE"}}, {}]}"#,
    ];

    for response in responses {
        println!("Testing parsing for response: {}", response);
        let serialized = parse_serialized_sql(response);
        if let Err(err) = &serialized {
            println!("Could not parse due to: {}", err);
        }
        assert!(serialized.is_ok());
        assert!(!serialized.unwrap().statements.is_empty());
    }
}

#[test]
fn test_should_not_parse() {
    let responses = [
        ("{not json", "Invalid JSON: "),
        ("[1, 2, 3]", "Expected a JSON object"),
        ("\"select\"", "Expected a JSON object"),
        (
            r#"{"error": true, "error_type": "parser", "error_message": "syntax error at or near \"SELEC\""}"#,
            "syntax error at or near \"SELEC\"",
        ),
        (r#"{"error": true, "error_type": "parser"}"#, "parser"),
        (r#"{"error": true}"#, "Unknown DuckDB error"),
        (
            r#"{"error": false, "statements": []}"#,
            "No statements in serialized SQL response",
        ),
        (r#"{"error": false}"#, "No statements in serialized SQL response"),
    ];

    for (response, message) in responses {
        println!("Testing parsing for response: {}", response);
        let err = parse_serialized_sql(response).unwrap_err();
        assert!(
            err.to_string().starts_with(message),
            "unexpected message {:?} for {}",
            err.to_string(),
            response
        );
    }
}

#[test]
fn test_error_kinds() {
    assert!(matches!(
        parse_serialized_sql(""),
        Err(EnvelopeError::InvalidJson(_))
    ));
    assert!(matches!(
        parse_serialized_sql("null"),
        Err(EnvelopeError::NotAnObject)
    ));
    assert!(matches!(
        parse_serialized_sql(r#"{"error": true, "error_message": "boom"}"#),
        Err(EnvelopeError::EngineReported(message)) if message == "boom"
    ));
}

#[test]
fn test_fixture_format() {
    let fixture = r#"
    [
      {
        "SELECT a FROM t": {
          "error": false,
          "statements": [{"node": {
            "type": "SELECT_NODE",
            "select_list": [{"class": "COLUMN_REF", "type": "COLUMN_REF", "column_names": ["a"]}],
            "from_table": {"type": "BASE_TABLE", "table_name": "t", "alias": ""}
          }}]
        }
      }
    ]
    "#;

    let serialized = parse_serialized_sql(&unwrap_fixture_format(fixture)).unwrap();
    let lineages = extract_lineage(&serialized.statements);
    assert_eq!(lineages.len(), 1);
    assert!(lineages[0].node("base:t").is_some());

    // a bare array is not a response
    assert!(matches!(
        parse_serialized_sql(fixture),
        Err(EnvelopeError::NotAnObject)
    ));
    // an array of several keyed entries is left alone
    let ambiguous = r#"[{"a": {}, "b": {}}]"#;
    assert_eq!(unwrap_fixture_format(ambiguous), ambiguous);
}
