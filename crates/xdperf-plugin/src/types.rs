//! Wire types exchanged with generator and verifier plugins
//!
//! Everything crosses the sandbox boundary as JSON. Field names are
//! stable; raw packet bytes travel base64-encoded.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// Generator request
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GeneratorRequest {
    /// Total packets the run will transmit
    pub count: u64,
    /// Hardware address of the transmit device
    pub device_mac_addr: [u8; 6],
    /// Plugin-specific fields (src_ip, payload_size, ...)
    #[serde(flatten)]
    pub extra: serde_json::Map<String, serde_json::Value>,
}

impl GeneratorRequest {
    pub fn new(count: u64, device_mac_addr: [u8; 6]) -> Self {
        Self {
            count,
            device_mac_addr,
            extra: serde_json::Map::new(),
        }
    }
}

/// Sequence-driven request used by `generate_template`
#[derive(Debug, Clone, Serialize)]
pub(crate) struct SequenceRequest<'a> {
    pub sequence: u64,
    #[serde(with = "base64_bytes")]
    pub args: &'a [u8],
}

/// One generator output record
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GeneratorOutput {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub version: Option<String>,
    pub template: PacketTemplateDef,
    #[serde(default)]
    pub metadata: GeneratorMetadata,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub next_plugin: Option<String>,
}

/// Template section of a generator record
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PacketTemplateDef {
    pub base_packet: BasePacket,
}

/// Raw base packet plus its declared length
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BasePacket {
    #[serde(with = "base64_bytes")]
    pub data: Vec<u8>,
    pub length: u16,
}

/// Free-form per-template metadata
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct GeneratorMetadata {
    pub packet_count: u64,
    pub rate_pps: u64,
    pub tags: Vec<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub imix: Option<ImixConfig>,
}

/// IMIX packet-size mix
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ImixConfig {
    pub patterns: Vec<ImixPattern>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ImixPattern {
    pub size: u16,
    pub weight: u32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub template_id: Option<String>,
}

// ---------------------------------------------------------------------------
// Verifier
// ---------------------------------------------------------------------------

/// Verifier request
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct VerifierInput {
    pub version: String,
    pub packet: ProcessedPacket,
    pub context: VerificationContext,
    pub expected: ExpectedResults,
}

/// Packet after it went through the XDP program
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ProcessedPacket {
    #[serde(with = "base64_bytes")]
    pub data: Vec<u8>,
    pub length: u16,
    pub timestamp: i64,
    pub sequence: u64,
    pub template_id: String,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct VerificationContext {
    pub xdp_action: String,
    pub process_time: u64,
    pub cpu_core: u32,
    #[serde(default)]
    pub variables: HashMap<String, serde_json::Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub bpf_stats: Option<BpfStats>,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct BpfStats {
    pub instructions: u64,
    pub cycles: u64,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ExpectedResults {
    pub checksums: HashMap<String, bool>,
    pub fields: HashMap<String, serde_json::Value>,
    pub patterns: Vec<Pattern>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub constraints: Option<Constraints>,
}

/// Match rule, e.g. `{"type":"exact","target":"ipv4.ttl","value":64}`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Pattern {
    #[serde(rename = "type")]
    pub kind: String,
    pub target: String,
    pub value: serde_json::Value,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub flags: Option<String>,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct Constraints {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub min_length: Option<u16>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_length: Option<u16>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub layer_count: Option<u16>,
}

/// Verifier response
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct VerifierOutput {
    pub version: String,
    pub result: VerificationResult,
    pub details: Vec<VerificationDetail>,
    pub stats: VerifierStats,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub recommendations: Vec<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct VerificationResult {
    pub valid: bool,
    pub score: f64,
    pub errors: Vec<String>,
    pub warnings: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VerificationDetail {
    pub check: String,
    pub result: bool,
    #[serde(default)]
    pub expected: serde_json::Value,
    #[serde(default)]
    pub actual: serde_json::Value,
    #[serde(default)]
    pub message: String,
    /// "error", "warning" or "info"
    #[serde(default)]
    pub severity: String,
}

/// Aggregate verifier counters
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct VerifierStats {
    pub total_checks: u64,
    pub passed: u64,
    pub failed: u64,
    pub skipped: u64,
    pub execution_time_ms: f64,
}

mod base64_bytes {
    use base64::engine::general_purpose::STANDARD;
    use base64::Engine as _;
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer, T: AsRef<[u8]>>(
        bytes: T,
        serializer: S,
    ) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&STANDARD.encode(bytes.as_ref()))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Vec<u8>, D::Error> {
        let encoded = String::deserialize(deserializer)?;
        STANDARD.decode(encoded.as_bytes()).map_err(serde::de::Error::custom)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_request_mac_is_byte_array() {
        let req = GeneratorRequest::new(10, [0x02, 0, 0, 0, 0, 0x01]);
        let json = serde_json::to_value(&req).unwrap();
        assert_eq!(json["count"], 10);
        assert_eq!(json["device_mac_addr"], serde_json::json!([2, 0, 0, 0, 0, 1]));
    }

    #[test]
    fn test_request_extra_fields_flattened() {
        let mut req = GeneratorRequest::new(1, [0; 6]);
        req.extra.insert("payload_size".into(), serde_json::json!(64));
        let json = serde_json::to_value(&req).unwrap();
        assert_eq!(json["payload_size"], 64);
    }

    #[test]
    fn test_output_decodes_base64_packet() {
        let raw = concat!(
            r#"[{"template":{"base_packet":{"data":"AAECAw==","length":3}},"#,
            r#""metadata":{"packet_count":1,"rate_pps":0,"tags":[]}}]"#,
        );
        let out: Vec<GeneratorOutput> = serde_json::from_str(raw).unwrap();
        assert_eq!(out.len(), 1);
        assert_eq!(out[0].template.base_packet.data, vec![0, 1, 2, 3]);
        assert_eq!(out[0].template.base_packet.length, 3);
        assert_eq!(out[0].metadata.packet_count, 1);
    }

    #[test]
    fn test_output_metadata_optional() {
        let raw = r#"{"template":{"base_packet":{"data":"","length":0}}}"#;
        let out: GeneratorOutput = serde_json::from_str(raw).unwrap();
        assert_eq!(out.metadata, GeneratorMetadata::default());
    }
}
