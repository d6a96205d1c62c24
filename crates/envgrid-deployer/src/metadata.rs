//! Extraction of the reserved `x-metadata` manifest field.

use serde::Deserialize;
use serde_json::Value;
use tracing::warn;

/// Top-level manifest key carrying caller metadata.
pub const METADATA_KEY: &str = "x-metadata";

/// Return the first `x-metadata` mapping found in the manifest's YAML
/// documents, converted to JSON.
///
/// Manifests that are not YAML, or whose `x-metadata` is not a mapping,
/// have no metadata; that never fails a deployment.
pub fn extract(manifest: &str) -> Option<Value> {
    for document in serde_yaml::Deserializer::from_str(manifest) {
        let doc = match serde_yaml::Value::deserialize(document) {
            Ok(doc) => doc,
            Err(e) => {
                warn!(error = %e, "manifest is not valid YAML, skipping metadata");
                return None;
            }
        };
        let Some(raw) = doc.get(METADATA_KEY) else {
            continue;
        };
        if !raw.is_mapping() {
            warn!("{METADATA_KEY} is not a mapping, ignoring it");
            return None;
        }
        return match serde_json::to_value(raw) {
            Ok(value) => Some(value),
            Err(e) => {
                warn!(error = %e, "{METADATA_KEY} cannot be represented as JSON");
                None
            }
        };
    }
    None
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    #[test]
    fn compose_metadata() {
        let manifest = "services:\n  app:\n    image: busybox\nx-metadata:\n  owner: ci\n  ttl: 30\n";
        assert_eq!(extract(manifest), Some(json!({"owner": "ci", "ttl": 30})));
    }

    #[test]
    fn metadata_in_later_document() {
        let manifest = "apiVersion: v1\nkind: Service\n---\nx-metadata:\n  team: qa\n";
        assert_eq!(extract(manifest), Some(json!({"team": "qa"})));
    }

    #[test]
    fn absent_or_invalid_metadata_is_none() {
        assert_eq!(extract("services: {}\n"), None);
        assert_eq!(extract("x-metadata: just-a-string\n"), None);
        assert_eq!(extract("{ not: [yaml"), None);
        assert_eq!(extract(""), None);
    }
}
