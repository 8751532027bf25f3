//! Typed access to verifier plugins.

use std::sync::Arc;

use serde::Serialize;

use crate::error::AdapterError;
use crate::generator::call_json;
use crate::sandbox::PluginModule;
use crate::types::{VerifierInput, VerifierOutput, VerifierStats};

/// Control message asking a verifier for its counters
#[derive(Debug, Serialize)]
struct StatsRequest {
    command: &'static str,
}

const GET_STATS: StatsRequest = StatsRequest { command: "get_stats" };

/// Verifier plugin adapter
#[derive(Debug, Clone)]
pub struct VerifierAdapter {
    module: Arc<PluginModule>,
}

impl VerifierAdapter {
    pub fn new(module: Arc<PluginModule>) -> Self {
        Self { module }
    }

    pub fn name(&self) -> &str {
        self.module.name()
    }

    pub fn version(&self) -> &str {
        self.module.version()
    }

    pub fn initialize(&self, config: &[u8]) -> Result<(), AdapterError> {
        Ok(self.module.call_init(config)?)
    }

    pub fn cleanup(&self) -> Result<(), AdapterError> {
        Ok(self.module.cleanup()?)
    }

    pub fn verify_packet(&self, input: &VerifierInput) -> Result<VerifierOutput, AdapterError> {
        let output: VerifierOutput = call_json(&self.module, input)?;
        if !output.result.valid {
            tracing::debug!(
                plugin = %self.name(),
                sequence = input.packet.sequence,
                errors = output.result.errors.len(),
                "packet failed verification"
            );
        }
        Ok(output)
    }

    /// Counters accumulated by the verifier, fetched through `plugin_process`.
    pub fn stats(&self) -> Result<VerifierStats, AdapterError> {
        call_json(&self.module, &GET_STATS)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{const_guest, echo_guest, host_with};
    use crate::types::ProcessedPacket;

    #[test]
    fn test_stats_request_shape() {
        assert_eq!(serde_json::to_string(&GET_STATS).unwrap(), r#"{"command":"get_stats"}"#);
    }

    #[test]
    fn test_stats_sent_through_process() {
        let (_dir, host, _cb) = host_with(&[("echo", echo_guest())]);
        let adapter = VerifierAdapter::new(host.load("echo").unwrap());

        // Echo reply carries no counter fields, so every counter defaults.
        let stats = adapter.stats().unwrap();
        assert_eq!(stats, VerifierStats::default());
    }

    #[test]
    fn test_stats_decoded() {
        let reply =
            r#"{"total_checks":10,"passed":9,"failed":1,"skipped":0,"execution_time_ms":1.5}"#;
        let (_dir, host, _cb) = host_with(&[("v", const_guest(reply))]);
        let adapter = VerifierAdapter::new(host.load("v").unwrap());

        let stats = adapter.stats().unwrap();
        assert_eq!(stats.total_checks, 10);
        assert_eq!(stats.failed, 1);
        assert_eq!(stats.execution_time_ms, 1.5);
    }

    #[test]
    fn test_verify_packet() {
        let reply = concat!(
            r#"{"version":"1.0","#,
            r#""result":{"valid":false,"score":0.5,"errors":["ttl mismatch"],"warnings":[]},"#,
            r#""details":[{"check":"ipv4.ttl","result":false,"expected":64,"actual":1,"#,
            r#""message":"ttl mismatch","severity":"error"}],"#,
            r#""stats":{"total_checks":2,"passed":1,"failed":1}}"#,
        );
        let (_dir, host, _cb) = host_with(&[("v", const_guest(reply))]);
        let adapter = VerifierAdapter::new(host.load("v").unwrap());

        let input = VerifierInput {
            version: "1.0".into(),
            packet: ProcessedPacket {
                data: vec![0xde, 0xad],
                length: 2,
                sequence: 3,
                ..Default::default()
            },
            ..Default::default()
        };
        let out = adapter.verify_packet(&input).unwrap();
        assert!(!out.result.valid);
        assert_eq!(out.result.errors, vec!["ttl mismatch".to_string()]);
        assert_eq!(out.details[0].expected, serde_json::json!(64));
        assert_eq!(out.stats.passed, 1);
        assert!(out.recommendations.is_empty());
    }
}
