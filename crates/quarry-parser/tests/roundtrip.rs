//! Printing a parsed query and parsing the printout gives back the same
//! tree, whatever surface spelling the original used.

use pretty_assertions::assert_eq;
use quarry_parser::parse_query;

fn roundtrips(source: &str) {
    let first = parse_query(source).unwrap_or_else(|err| panic!("{}: {}", source, err));
    let printed = first.to_string();
    let second =
        parse_query(&printed).unwrap_or_else(|err| panic!("{} (printed from {}): {}", printed, source, err));

    assert_eq!(first, second, "printed as: {}", printed);
}

#[test]
fn roots_and_selectors() {
    roundtrips("objects");
    roundtrips("classes");
    roundtrips("gcroots");
    roundtrips("events");
    roundtrips("chunks");
    roundtrips("metadata/jdk.ExecutionSample");
    roundtrips("constantpool/java.lang.Thread");
    roundtrips("objects/java.lang.String");
    roundtrips("objects/instanceof java.util.AbstractMap");
    roundtrips("objects/(java.lang.String|java.lang.StringBuilder)");
    roundtrips("objects/*String*");
    roundtrips("objects/java.util.?ash*");
    roundtrips("objects/int[]");
    roundtrips("objects/java.lang.Object[][]");
    roundtrips("objects/[Ljava.lang.Object;");
}

#[test]
fn predicates() {
    roundtrips("objects[shallow > 100]");
    roundtrips("objects[shallow >= 1K and retained < 2MB]");
    roundtrips("objects[className ~ \"java\\\\.lang\\\\..*\"]");
    roundtrips("objects[className = \"java.lang.String\" or arrayLength != 0]");
    roundtrips("objects[not shallow <= 16]");
    roundtrips("objects[(shallow > 1 or retained > 2) and arrayLength > 3]");
    roundtrips("events[all(frames.line > 0)]");
    roundtrips("events[none(frames.line > 9000)]");
    roundtrips("events[(bytes + 8) * 2 > 128]");
    roundtrips("objects[stringValue == null]");
}

#[test]
fn pipelines() {
    roundtrips("objects | count()");
    roundtrips("objects | top(10, shallow)");
    roundtrips("objects | top(10, shallow, asc)");
    roundtrips("objects | top(100)");
    roundtrips("classes | sortBy(instanceCount desc, name) | head(20)");
    roundtrips("classes | tail(5)");
    roundtrips("classes | skip(5)");
    roundtrips("objects | distinct(className)");
    roundtrips("objects | sum(shallow)");
    roundtrips("objects | min(shallow)");
    roundtrips("objects | max(retained)");
    roundtrips("objects | avg(shallow)");
    roundtrips("objects | stats(shallow)");
    roundtrips("objects | groupBy(className, agg=sum, value=shallow)");
    roundtrips("objects | groupBy(className, agg=count)");
    roundtrips("objects | groupBy(className, agg=max, value=retained, sortBy=value, asc=false)");
    roundtrips("objects | groupBy(className, agg=avg, value=shallow, sortBy=key, asc=true)");
    roundtrips("events | filter(duration > 10 and thread.name ~ \"worker-.*\")");
    roundtrips("objects | uppercase(className)");
    roundtrips("objects | replace(className, \"java.lang.\", \"j.l.\")");
    roundtrips("objects | len(stringValue)");
    roundtrips(r#"chunks | select(path + " (" + bytes + " bytes)" as description)"#);
    roundtrips("events | select(thread.name as thread, bytes)");
    roundtrips(r#"events | select("${thread.name}: ${bytes}" as line)"#);
    roundtrips("events | select(if(bytes > 1024, \"big\", \"small\") as bucket)");
    roundtrips("events | select(coalesce(thread.name, \"unknown\") as who)");
}

#[test]
fn graph_operators() {
    roundtrips("objects[retained > 1M] | pathToRoot()");
    roundtrips("objects | pathToRoot(decoratorKey=\"route\")");
    roundtrips("objects | retentionPaths()");
    roundtrips("objects | retainedBreakdown(3)");
    roundtrips("objects | dominators(top)");
    roundtrips("objects | checkLeaks(detector=\"growth\", threshold=0.75)");
    roundtrips("objects | checkLeaks(filter=retained > 10M and shallow < 1K, minSize=1M)");
    roundtrips("checkLeaks(detector=\"stale-threads\", fields=\"className,count\")");
}

#[test]
fn flags_and_composites() {
    roundtrips("objects | count() --stream");
    roundtrips("objects | top(50, retained) --no-stream");
    roundtrips(
        "objects/instanceof java.util.AbstractMap[shallow > 1K] \
         | groupBy(className, agg=sum, value=shallow) | top(10) --stream",
    );
}
