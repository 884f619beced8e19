//! Layer merging
//!
//! - Tables: merged key by key, recursively
//! - Arrays: the later layer replaces the whole array
//! - Scalars: the later layer wins

use serde_json::Value;

/// Merge `overlay` into `base` and return the result.
pub fn deep_merge(mut base: Value, overlay: Value) -> Value {
    merge_into(&mut base, overlay);
    base
}

fn merge_into(base: &mut Value, overlay: Value) {
    match (base, overlay) {
        (Value::Object(base_map), Value::Object(overlay_map)) => {
            for (key, value) in overlay_map {
                match base_map.get_mut(&key) {
                    Some(existing) => merge_into(existing, value),
                    None => {
                        base_map.insert(key, value);
                    }
                }
            }
        }
        (slot, overlay) => *slot = overlay,
    }
}

/// Merge layers in precedence order (first is the base, last wins).
pub fn merge_layers(layers: Vec<Value>) -> Value {
    layers.into_iter().fold(Value::Null, deep_merge)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_scalar_override() {
        let merged = deep_merge(json!({"max_slots": 2}), json!({"max_slots": 4}));
        assert_eq!(merged["max_slots"], 4);
    }

    #[test]
    fn test_nested_tables_keep_unset_keys() {
        let base = json!({
            "stages": {
                "first": {"weight": 1, "extra_args": ["--1pass-only"]},
                "second": {"weight": 2}
            }
        });
        let overlay = json!({"stages": {"first": {"weight": 3}}});
        let merged = deep_merge(base, overlay);

        assert_eq!(merged["stages"]["first"]["weight"], 3);
        assert_eq!(merged["stages"]["first"]["extra_args"][0], "--1pass-only");
        assert_eq!(merged["stages"]["second"]["weight"], 2);
    }

    #[test]
    fn test_arrays_replace() {
        let base = json!({"adapter": {"args": ["--quiet", "--no-color"]}});
        let overlay = json!({"adapter": {"args": ["--verbose"]}});
        let merged = deep_merge(base, overlay);

        assert_eq!(merged["adapter"]["args"], json!(["--verbose"]));
    }

    #[test]
    fn test_table_replaces_scalar() {
        let merged = deep_merge(json!({"adapter": "x264"}), json!({"adapter": {"program": "enc"}}));
        assert_eq!(merged["adapter"]["program"], "enc");
    }

    #[test]
    fn test_merge_layers_precedence() {
        let builtin = json!({"max_slots": 2, "refresh_interval_secs": 1});
        let user = json!({"max_slots": 6, "workers": 3});
        let cli = json!({"max_slots": 4});

        let merged = merge_layers(vec![builtin, user, cli]);

        assert_eq!(merged["max_slots"], 4);
        assert_eq!(merged["workers"], 3);
        assert_eq!(merged["refresh_interval_secs"], 1);
    }

    #[test]
    fn test_no_layers_is_null() {
        assert!(merge_layers(Vec::new()).is_null());
    }
}
