//! Deterministic device id derivation (§3, §4.1, invariant 1 of §8).
//!
//! A device's id must be stable across restarts given identical
//! configuration, and must not depend on map iteration order. We hash
//! the plugin's namespace components together with the device's
//! configured `data` table, sorted by key so the digest doesn't depend
//! on how the TOML table happened to be built.

use sha2::{Digest, Sha256};

/// Hashes `namespace` (in order) and `data` (sorted by key) into a
/// stable hex-encoded id.
pub fn derive_id(namespace: &[String], data: &toml::value::Table) -> String {
    let mut hasher = Sha256::new();

    for component in namespace {
        hasher.update(component.as_bytes());
        hasher.update([0u8]);
    }

    let mut keys: Vec<&String> = data.keys().collect();

    keys.sort();

    for key in keys {
        hasher.update(key.as_bytes());
        hasher.update([0u8]);
        hasher.update(canonical_value(&data[key]).as_bytes());
        hasher.update([0u8]);
    }

    let digest = hasher.finalize();

    digest.iter().map(|b| format!("{:02x}", b)).collect()
}

/// Renders a `toml::Value` into a string representation stable enough
/// to hash. Nested tables are recursively sorted by key.
fn canonical_value(value: &toml::Value) -> String {
    match value {
        toml::Value::String(s) => format!("s:{}", s),
        toml::Value::Integer(i) => format!("i:{}", i),
        toml::Value::Float(f) => format!("f:{}", f),
        toml::Value::Boolean(b) => format!("b:{}", b),
        toml::Value::Datetime(d) => format!("d:{}", d),
        toml::Value::Array(items) => {
            let parts: Vec<String> = items.iter().map(canonical_value).collect();
            format!("a:[{}]", parts.join(","))
        }
        toml::Value::Table(table) => {
            let mut keys: Vec<&String> = table.keys().collect();
            keys.sort();
            let parts: Vec<String> = keys
                .into_iter()
                .map(|k| format!("{}={}", k, canonical_value(&table[k])))
                .collect();
            format!("t:{{{}}}", parts.join(","))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn table(pairs: &[(&str, toml::Value)]) -> toml::value::Table {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.clone()))
            .collect()
    }

    #[test]
    fn test_stable_across_key_order() {
        let a = table(&[
            ("id", toml::Value::String("a".into())),
            ("channel", toml::Value::Integer(3)),
        ]);
        let b = table(&[
            ("channel", toml::Value::Integer(3)),
            ("id", toml::Value::String("a".into())),
        ]);

        assert_eq!(
            derive_id(&["ns".to_string()], &a),
            derive_id(&["ns".to_string()], &b)
        );
    }

    #[test]
    fn test_distinguishes_data() {
        let a = table(&[("id", toml::Value::String("a".into()))]);
        let b = table(&[("id", toml::Value::String("b".into()))]);

        assert_ne!(
            derive_id(&["ns".to_string()], &a),
            derive_id(&["ns".to_string()], &b)
        );
    }

    #[test]
    fn test_namespace_participates() {
        let data = table(&[("id", toml::Value::String("a".into()))]);

        assert_ne!(
            derive_id(&["ns1".to_string()], &data),
            derive_id(&["ns2".to_string()], &data)
        );
    }
}
