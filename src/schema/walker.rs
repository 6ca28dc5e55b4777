//! Pre-pass over a capability tree collecting every distinct property name.
//!
//! The builder uses the resulting set to avoid re-deriving synthetic
//! properties that the schema already declares somewhere else in the tree.

use serde_json::Value;

/// Collect the ordered set of distinct property names appearing anywhere in
/// the tree, in first-seen document order.
///
/// A name is recorded when its node defines both `access` and a `name`
/// other than the `"x"`/`"y"` color fragments. Recursion continues below
/// matched nodes, but never into a field literally named `values` (an enum
/// value list, not a sub-schema). Structurally odd sub-nodes are skipped;
/// the walk itself never fails.
pub fn collect_property_names(node: &Value) -> Vec<String> {
    let mut names = Vec::new();

    let Some(obj) = node.as_object() else {
        return names;
    };

    if obj.get("access").is_some()
        && let Some(name) = obj.get("name").and_then(Value::as_str)
        && name != "x"
        && name != "y"
    {
        names.push(name.to_string());
    }

    for (key, child) in obj {
        if key == "values" {
            continue;
        }
        match child {
            Value::Object(_) => merge_names(&mut names, collect_property_names(child)),
            Value::Array(items) => {
                for item in items {
                    merge_names(&mut names, collect_property_names(item));
                }
            }
            _ => {}
        }
    }

    names
}

/// Merge a sub-walk's result into the accumulator, keeping first-seen order.
pub fn merge_names(into: &mut Vec<String>, from: Vec<String>) {
    for name in from {
        if !into.iter().any(|existing| *existing == name) {
            into.push(name);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_collects_nested_names_in_document_order() {
        let tree = json!({
            "type": "light",
            "features": [
                {"type": "binary", "name": "state", "property": "state", "access": 7},
                {"type": "numeric", "name": "brightness", "property": "brightness", "access": 7},
                {"type": "numeric", "name": "color_temp", "property": "color_temp", "access": 7}
            ]
        });
        assert_eq!(
            collect_property_names(&tree),
            vec!["state", "brightness", "color_temp"]
        );
    }

    #[test]
    fn test_never_reports_color_fragments() {
        let tree = json!({
            "type": "composite",
            "name": "color_xy",
            "property": "color",
            "access": 7,
            "features": [
                {"type": "numeric", "name": "x", "property": "x", "access": 7},
                {"type": "numeric", "name": "y", "property": "y", "access": 7}
            ]
        });
        let names = collect_property_names(&tree);
        assert_eq!(names, vec!["color_xy"]);
    }

    #[test]
    fn test_never_reports_a_name_twice() {
        let tree = json!({
            "features": [
                {"type": "binary", "name": "state", "property": "state", "access": 7},
                {"type": "binary", "name": "state", "property": "state", "access": 1}
            ]
        });
        assert_eq!(collect_property_names(&tree), vec!["state"]);
    }

    #[test]
    fn test_does_not_walk_enum_values() {
        // A "values" entry shaped like a sub-schema must not contribute names.
        let tree = json!({
            "type": "enum",
            "name": "effect",
            "property": "effect",
            "access": 2,
            "values": [
                {"name": "bogus", "access": 1}
            ]
        });
        assert_eq!(collect_property_names(&tree), vec!["effect"]);
    }

    #[test]
    fn test_requires_both_access_and_name() {
        let tree = json!({
            "features": [
                {"type": "binary", "name": "state"},
                {"type": "numeric", "property": "anonymous", "access": 1},
                {"type": "numeric", "name": "battery", "property": "battery", "access": 1}
            ]
        });
        assert_eq!(collect_property_names(&tree), vec!["battery"]);
    }

    #[test]
    fn test_recurses_below_matched_nodes() {
        let tree = json!({
            "type": "composite",
            "name": "options",
            "property": "options",
            "access": 2,
            "features": [
                {"type": "numeric", "name": "transition", "property": "transition", "access": 2}
            ]
        });
        assert_eq!(
            collect_property_names(&tree),
            vec!["options", "transition"]
        );
    }

    #[test]
    fn test_tolerates_structural_anomalies() {
        let tree = json!({
            "features": [
                42,
                "not a node",
                null,
                {"type": "binary", "name": "state", "property": "state", "access": 7},
                [{"type": "numeric", "name": "battery", "access": 1}]
            ]
        });
        // Malformed siblings are skipped, the rest still contribute. A nested
        // array is not an object node, so its contents are unreachable here.
        assert_eq!(collect_property_names(&tree), vec!["state"]);
    }
}
