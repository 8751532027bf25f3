//! Typed access to generator plugins.

use std::sync::Arc;

use serde::de::DeserializeOwned;
use serde::Serialize;

use crate::error::AdapterError;
use crate::sandbox::PluginModule;
use crate::types::{GeneratorOutput, GeneratorRequest, SequenceRequest};

/// Serialize `req`, run it through `plugin_process` and decode the reply.
pub fn call_json<Req, Resp>(module: &PluginModule, req: &Req) -> Result<Resp, AdapterError>
where
    Req: Serialize + ?Sized,
    Resp: DeserializeOwned,
{
    let input = serde_json::to_vec(req).map_err(AdapterError::Encode)?;
    let output = module.call_process(&input)?;
    serde_json::from_slice(&output).map_err(AdapterError::Decode)
}

/// Generator plugin adapter
#[derive(Debug, Clone)]
pub struct GeneratorAdapter {
    module: Arc<PluginModule>,
}

impl GeneratorAdapter {
    pub fn new(module: Arc<PluginModule>) -> Self {
        Self { module }
    }

    pub fn name(&self) -> &str {
        self.module.name()
    }

    pub fn initialize(&self, config: &[u8]) -> Result<(), AdapterError> {
        Ok(self.module.call_init(config)?)
    }

    /// Run the guest's cleanup export directly. The module stays
    /// registered with its host.
    pub fn cleanup(&self) -> Result<(), AdapterError> {
        Ok(self.module.cleanup()?)
    }

    /// Ask the plugin for packet templates.
    pub fn generate(&self, req: &GeneratorRequest) -> Result<Vec<GeneratorOutput>, AdapterError> {
        let outputs: Vec<GeneratorOutput> = call_json(&self.module, req)?;
        tracing::debug!(
            plugin = %self.name(),
            templates = outputs.len(),
            count = req.count,
            "generator returned templates"
        );
        Ok(outputs)
    }

    /// Sequence-driven generation: `{"sequence": seq, "args": base64}` in,
    /// a single record out.
    pub fn generate_template(
        &self,
        sequence: u64,
        args: &[u8],
    ) -> Result<GeneratorOutput, AdapterError> {
        call_json(&self.module, &SequenceRequest { sequence, args })
    }

    /// Raw pass-through.
    pub fn call(&self, input: &[u8]) -> Result<Vec<u8>, AdapterError> {
        Ok(self.module.call_process(input)?)
    }

    pub fn call_json<Req, Resp>(&self, req: &Req) -> Result<Resp, AdapterError>
    where
        Req: Serialize + ?Sized,
        Resp: DeserializeOwned,
    {
        call_json(&self.module, req)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::PluginError;
    use crate::testing::{const_guest, echo_guest, host_with};

    const ONE_TEMPLATE: &str = concat!(
        r#"[{"template":{"base_packet":{"data":"AAECAwQ=","length":4}},"#,
        r#""metadata":{"packet_count":1,"rate_pps":0,"tags":["test"]}}]"#,
    );

    #[test]
    fn test_generate_single_template() {
        let (_dir, host, _cb) = host_with(&[("fixed", const_guest(ONE_TEMPLATE))]);
        let adapter = GeneratorAdapter::new(host.load("fixed").unwrap());

        let outputs = adapter.generate(&GeneratorRequest::new(1, [0x02, 0, 0, 0, 0, 1])).unwrap();
        assert_eq!(outputs.len(), 1);
        let packet = &outputs[0].template.base_packet;
        assert_eq!(packet.data, vec![0, 1, 2, 3, 4]);
        assert_eq!(packet.length, 4);
        assert_eq!(outputs[0].metadata.tags, vec!["test".to_string()]);
    }

    #[test]
    fn test_echo_sequence_calls() {
        let (_dir, host, _cb) = host_with(&[("hello", echo_guest())]);
        let adapter = GeneratorAdapter::new(host.load("hello").unwrap());
        adapter.initialize(b"{}").unwrap();

        for seq in 0..3u64 {
            let reply: serde_json::Value = adapter
                .call_json(&serde_json::json!({ "sequence": seq }))
                .unwrap();
            assert_eq!(reply["status"], "ok");
            assert_eq!(reply["sequence"], seq);
        }
    }

    #[test]
    fn test_sequence_envelope_is_base64() {
        let (_dir, host, _cb) = host_with(&[("hello", echo_guest())]);
        let adapter = GeneratorAdapter::new(host.load("hello").unwrap());

        let request = SequenceRequest {
            sequence: 9,
            args: b"hi",
        };
        let reply: serde_json::Value = adapter.call_json(&request).unwrap();
        assert_eq!(reply["sequence"], 9);
        assert_eq!(reply["args"], "aGk=");
    }

    #[test]
    fn test_undecodable_reply() {
        let (_dir, host, _cb) = host_with(&[("hello", echo_guest())]);
        let adapter = GeneratorAdapter::new(host.load("hello").unwrap());

        // The echo reply is an object, not a list of records.
        let err = adapter.generate(&GeneratorRequest::new(1, [0; 6])).unwrap_err();
        assert!(matches!(err, AdapterError::Decode(_)));
    }

    #[test]
    fn test_sandbox_error_propagates() {
        let (_dir, host, _cb) = host_with(&[("hello", echo_guest())]);
        let adapter = GeneratorAdapter::new(host.load("hello").unwrap());

        let err = adapter.initialize(b"").unwrap_err();
        assert!(matches!(err, AdapterError::Sandbox(PluginError::InitFailed(1))));
    }

    #[test]
    fn test_cleanup_delegates_to_guest() {
        let (_dir, host, cb) = host_with(&[("hello", echo_guest())]);
        let adapter = GeneratorAdapter::new(host.load("hello").unwrap());

        adapter.cleanup().unwrap();
        assert_eq!(cb.count_logs("cleanup"), 1);
        assert_eq!(host.list(), vec!["hello".to_string()]);
    }
}
