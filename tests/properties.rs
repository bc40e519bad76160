use indexmap::indexmap;
use quarry::ast::SourceRoot;
use quarry::{parse_query, run_query, EngineConfig, Executor, InMemorySource, Row, Value};
use quickcheck_macros::quickcheck;

fn object(class: &str, shallow: i64) -> Row {
    indexmap! {
        "className".to_string() => Value::string(class),
        "shallow".to_string() => Value::int(shallow),
    }
    .into()
}

fn rows_from(values: &[(u8, i16)]) -> Vec<Row> {
    values
        .iter()
        .map(|(class, shallow)| object(&format!("C{}", class % 4), *shallow as i64))
        .collect()
}

/// §8.3: `count() ∘ filter(p)` agrees between the streaming and the
/// materialized path for arbitrary inputs and thresholds.
#[quickcheck]
fn stream_and_materialized_counts_agree(values: Vec<(u8, i16)>, threshold: i16) -> bool {
    let rows = rows_from(&values);
    let text = format!("objects | filter(shallow > {}) | count()", threshold);
    let query = parse_query(&text).unwrap();
    let executor = Executor::new(EngineConfig::default());

    let mut materialized_source =
        InMemorySource::new("m").with_rows(SourceRoot::Objects, rows.clone());
    let materialized = executor.execute(&query, &mut materialized_source).unwrap();

    let mut streamed_source = InMemorySource::new("s")
        .with_rows(SourceRoot::Objects, rows)
        .with_reported_count(SourceRoot::Objects, 6_000_000);
    let streamed = executor.execute(&query, &mut streamed_source).unwrap();

    materialized.rows == streamed.rows
}

/// Streaming sums fold the shared accumulator in input order, so they
/// are bit-equal to the materialized path even over floats.
#[quickcheck]
fn stream_and_materialized_sums_are_bit_equal(values: Vec<i32>) -> bool {
    let rows: Vec<Row> = values
        .iter()
        .map(|v| {
            Row::from(indexmap! {
                "className".to_string() => Value::string("A"),
                "shallow".to_string() => Value::float(*v as f64 * 0.001),
            })
        })
        .collect();
    let query = parse_query("objects | stats(shallow)").unwrap();
    let executor = Executor::new(EngineConfig::default());

    let mut materialized_source =
        InMemorySource::new("m").with_rows(SourceRoot::Objects, rows.clone());
    let materialized = executor.execute(&query, &mut materialized_source).unwrap();

    let mut streamed_source = InMemorySource::new("s")
        .with_rows(SourceRoot::Objects, rows)
        .with_reported_count(SourceRoot::Objects, 6_000_000);
    let streamed = executor.execute(&query, &mut streamed_source).unwrap();

    materialized.rows == streamed.rows
}

/// With distinct keys, a keyed `top(n)` is `sortBy(key desc) | head(n)`.
#[quickcheck]
fn top_is_sort_then_head_on_distinct_keys(values: Vec<i16>, n: u8) -> bool {
    // distinct by construction: the index breaks ties
    let rows: Vec<Row> = values
        .iter()
        .enumerate()
        .map(|(idx, v)| object("A", (*v as i64) * 1000 + idx as i64))
        .collect();
    let n = (n % 16) + 1;

    let mut source_a = InMemorySource::new("a").with_rows(SourceRoot::Objects, rows.clone());
    let top = run_query(&format!("objects | top({}, shallow)", n), &mut source_a).unwrap();

    let mut source_b = InMemorySource::new("b").with_rows(SourceRoot::Objects, rows);
    let sorted = run_query(
        &format!("objects | sortBy(shallow desc) | head({})", n),
        &mut source_b,
    )
    .unwrap();

    top.rows == sorted.rows
}

/// Pipelines are deterministic: the same input gives the same output.
#[quickcheck]
fn group_by_is_deterministic(values: Vec<(u8, i16)>) -> bool {
    let rows = rows_from(&values);
    let text = "objects | groupBy(className, agg=sum, value=shallow, sortBy=value)";

    let mut first_source = InMemorySource::new("a").with_rows(SourceRoot::Objects, rows.clone());
    let first = run_query(text, &mut first_source).unwrap();

    let mut second_source = InMemorySource::new("b").with_rows(SourceRoot::Objects, rows);
    let second = run_query(text, &mut second_source).unwrap();

    first.rows == second.rows
}

/// §8.6 end to end: suffixed and plain literals select the same rows.
#[test]
fn byte_suffix_literals_filter_identically() {
    let rows: Vec<Row> = (0..4096).map(|i| object("A", i * 512)).collect();

    for (suffixed, plain) in [
        ("objects[shallow > 1K] | count()", "objects[shallow > 1024] | count()"),
        (
            "objects[shallow > 1MB] | count()",
            "objects[shallow > 1048576] | count()",
        ),
        (
            "objects[shallow < 1G] | count()",
            "objects[shallow < 1073741824] | count()",
        ),
    ] {
        let mut source_a = InMemorySource::new("a").with_rows(SourceRoot::Objects, rows.clone());
        let mut source_b = InMemorySource::new("b").with_rows(SourceRoot::Objects, rows.clone());

        let with_suffix = run_query(suffixed, &mut source_a).unwrap();
        let without = run_query(plain, &mut source_b).unwrap();

        assert_eq!(with_suffix.rows, without.rows, "{} vs {}", suffixed, plain);
    }
}

/// §8.2 flavor: operators that define an order pin the exact row list;
/// rerunning an order-free pipeline still yields the same multiset.
#[quickcheck]
fn filter_preserves_input_order(values: Vec<(u8, i16)>) -> bool {
    let rows = rows_from(&values);
    let mut source = InMemorySource::new("a").with_rows(SourceRoot::Objects, rows.clone());
    let filtered = run_query("objects | filter(shallow >= 0)", &mut source).unwrap();

    let expected: Vec<Row> = rows
        .into_iter()
        .filter(|row| row.get("shallow").and_then(Value::as_int).unwrap() >= 0)
        .collect();
    filtered.rows == expected
}
