//! Plugin metadata sidecar (`<name>.json` next to `<name>.wasm`)

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::Path;

/// Plugin role declared in metadata
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PluginKind {
    #[default]
    Generator,
    Verifier,
}

/// Plugin metadata
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PluginMetadata {
    pub name: String,
    pub version: String,
    pub author: String,
    pub description: String,
    pub license: String,
    #[serde(rename = "type")]
    pub kind: PluginKind,
    pub capabilities: HashMap<String, bool>,
    pub requirements: HashMap<String, String>,
}

impl Default for PluginMetadata {
    fn default() -> Self {
        Self {
            name: String::new(),
            version: "unknown".into(),
            author: String::new(),
            description: String::new(),
            license: String::new(),
            kind: PluginKind::default(),
            capabilities: HashMap::new(),
            requirements: HashMap::new(),
        }
    }
}

impl PluginMetadata {
    /// Load the sidecar for `name` from `dir`.
    ///
    /// A missing or unparsable sidecar yields defaults; the module name
    /// always wins over whatever the file says.
    pub fn load(dir: &Path, name: &str) -> Self {
        let path = dir.join(format!("{name}.json"));
        let mut metadata = match std::fs::read(&path) {
            Ok(bytes) => serde_json::from_slice(&bytes).unwrap_or_else(|e| {
                tracing::warn!(
                    plugin = name,
                    path = %path.display(),
                    error = %e,
                    "ignoring malformed plugin metadata"
                );
                PluginMetadata::default()
            }),
            Err(_) => PluginMetadata::default(),
        };
        metadata.name = name.to_string();
        metadata
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_missing_sidecar_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let meta = PluginMetadata::load(dir.path(), "simple");
        assert_eq!(meta.name, "simple");
        assert_eq!(meta.version, "unknown");
    }

    #[test]
    fn test_sidecar_parsed() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(
            dir.path().join("udp.json"),
            r#"{"name":"other","version":"1.2.0","type":"verifier","capabilities":{"imix":true}}"#,
        )
        .unwrap();

        let meta = PluginMetadata::load(dir.path(), "udp");
        assert_eq!(meta.name, "udp");
        assert_eq!(meta.version, "1.2.0");
        assert_eq!(meta.kind, PluginKind::Verifier);
        assert_eq!(meta.capabilities.get("imix"), Some(&true));
    }

    #[test]
    fn test_malformed_sidecar_ignored() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("bad.json"), b"{not json").unwrap();
        let meta = PluginMetadata::load(dir.path(), "bad");
        assert_eq!(meta.version, "unknown");
    }
}
