use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::collections::HashMap;

use crate::error::{BridgeError, BridgeResult};

/// Sampling parameters sent with every text generation request.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GenerationParams {
    pub max_new_tokens: u32,
    pub do_sample: bool,
    pub temperature: f32,
    pub top_p: f32,
    pub top_k: u32,
    pub min_p: f32,
    pub typical_p: f32,
    pub repetition_penalty: f32,
    pub encoder_repetition_penalty: f32,
    pub min_length: u32,
    pub no_repeat_ngram_size: u32,
    pub num_beams: u32,
    pub penalty_alpha: f32,
    pub length_penalty: f32,
    pub early_stopping: bool,
    pub seed: i64,
    pub add_bos_token: bool,
    pub skip_special_tokens: bool,
    pub stopping_strings: Vec<String>,
}

impl Default for GenerationParams {
    fn default() -> Self {
        Self {
            max_new_tokens: 1000,
            do_sample: true,
            temperature: 0.7,
            top_p: 0.1,
            top_k: 40,
            min_p: 0.0,
            typical_p: 1.0,
            repetition_penalty: 1.18,
            encoder_repetition_penalty: 1.0,
            min_length: 0,
            no_repeat_ngram_size: 0,
            num_beams: 1,
            penalty_alpha: 0.0,
            length_penalty: 1.0,
            early_stopping: false,
            seed: -1,
            add_bos_token: false,
            skip_special_tokens: true,
            stopping_strings: Vec::new(),
        }
    }
}

/// Optional per-deployment overrides for the base parameters.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct GenerationOverrides {
    pub max_new_tokens: Option<u32>,
    pub temperature: Option<f32>,
    pub top_p: Option<f32>,
    pub top_k: Option<u32>,
    pub min_p: Option<f32>,
    pub repetition_penalty: Option<f32>,
    pub num_beams: Option<u32>,
    pub seed: Option<i64>,
}

impl GenerationParams {
    pub fn with_overrides(&self, overrides: &GenerationOverrides) -> Self {
        let mut params = self.clone();
        if let Some(v) = overrides.max_new_tokens {
            params.max_new_tokens = v;
        }
        if let Some(v) = overrides.temperature {
            params.temperature = v;
        }
        if let Some(v) = overrides.top_p {
            params.top_p = v;
        }
        if let Some(v) = overrides.top_k {
            params.top_k = v;
        }
        if let Some(v) = overrides.min_p {
            params.min_p = v;
        }
        if let Some(v) = overrides.repetition_penalty {
            params.repetition_penalty = v;
        }
        if let Some(v) = overrides.num_beams {
            params.num_beams = v;
        }
        if let Some(v) = overrides.seed {
            params.seed = v;
        }
        params
    }

    pub fn with_stopping_strings(&self, stopping_strings: Vec<String>) -> Self {
        Self {
            stopping_strings,
            ..self.clone()
        }
    }

    /// Short, unpenalized call used to judge image-vs-text intent.
    pub fn for_classifier(&self, max_new_tokens: u32) -> Self {
        Self {
            max_new_tokens,
            repetition_penalty: 1.0,
            ..self.clone()
        }
    }

    /// Bounded call that writes an image caption.
    pub fn for_caption(&self, max_new_tokens: u32) -> Self {
        Self {
            max_new_tokens: max_new_tokens.min(self.max_new_tokens),
            ..self.clone()
        }
    }
}

/// A configured backend option forwarded verbatim in request payloads.
#[derive(Debug, Clone, PartialEq)]
pub enum PassthroughValue {
    Str(String),
    Int(i64),
    Float(f64),
    Bool(bool),
}

impl PassthroughValue {
    pub fn to_json(&self) -> Value {
        match self {
            PassthroughValue::Str(s) => Value::String(s.clone()),
            PassthroughValue::Int(i) => Value::from(*i),
            PassthroughValue::Float(f) => Value::from(*f),
            PassthroughValue::Bool(b) => Value::Bool(*b),
        }
    }
}

impl TryFrom<(&str, &Value)> for PassthroughValue {
    type Error = BridgeError;

    fn try_from((key, value): (&str, &Value)) -> BridgeResult<Self> {
        let unsupported = |kind| BridgeError::UnsupportedPassthrough {
            key: key.to_string(),
            kind,
        };
        match value {
            Value::String(s) => Ok(PassthroughValue::Str(s.clone())),
            Value::Bool(b) => Ok(PassthroughValue::Bool(*b)),
            Value::Number(n) => {
                if let Some(i) = n.as_i64() {
                    Ok(PassthroughValue::Int(i))
                } else if let Some(f) = n.as_f64() {
                    Ok(PassthroughValue::Float(f))
                } else {
                    Err(unsupported("number out of range"))
                }
            }
            Value::Null => Err(unsupported("null")),
            Value::Array(_) => Err(unsupported("array")),
            Value::Object(_) => Err(unsupported("table")),
        }
    }
}

/// Passthrough parameters resolved once when a client is built.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Passthrough {
    entries: Vec<(String, PassthroughValue)>,
}

impl Passthrough {
    pub fn resolve(raw: &HashMap<String, Value>) -> BridgeResult<Self> {
        let mut entries = raw
            .iter()
            .map(|(key, value)| {
                PassthroughValue::try_from((key.as_str(), value)).map(|v| (key.clone(), v))
            })
            .collect::<BridgeResult<Vec<_>>>()?;
        entries.sort_by(|a, b| a.0.cmp(&b.0));
        Ok(Self { entries })
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Writes every entry into `payload`, replacing fields of the same name.
    pub fn merge_into(&self, payload: &mut Map<String, Value>) {
        for (key, value) in &self.entries {
            payload.insert(key.clone(), value.to_json());
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_overrides_copy_base() {
        let base = GenerationParams::default();
        let tuned = base.with_overrides(&GenerationOverrides {
            max_new_tokens: Some(300),
            temperature: Some(1.1),
            ..Default::default()
        });

        assert_eq!(tuned.max_new_tokens, 300);
        assert_eq!(tuned.temperature, 1.1);
        assert_eq!(tuned.top_k, base.top_k);
        assert_eq!(base.max_new_tokens, 1000);
    }

    #[test]
    fn test_intent_variants() {
        let base = GenerationParams::default();
        let classifier = base.for_classifier(10);
        assert_eq!(classifier.max_new_tokens, 10);
        assert_eq!(classifier.repetition_penalty, 1.0);

        let caption = base.for_caption(5000);
        assert_eq!(caption.max_new_tokens, 1000);
        assert_eq!(base.repetition_penalty, 1.18);
    }

    #[test]
    fn test_passthrough_resolves_scalars() {
        let mut raw = HashMap::new();
        raw.insert("mode".to_string(), json!("chat"));
        raw.insert("truncation_length".to_string(), json!(4096));
        raw.insert("guidance_scale".to_string(), json!(1.5));
        raw.insert("ban_eos_token".to_string(), json!(false));

        let passthrough = Passthrough::resolve(&raw).unwrap();
        assert_eq!(passthrough.len(), 4);

        let mut payload = Map::new();
        payload.insert("mode".to_string(), json!("instruct"));
        passthrough.merge_into(&mut payload);
        assert_eq!(payload["mode"], json!("chat"));
        assert_eq!(payload["truncation_length"], json!(4096));
        assert_eq!(payload["guidance_scale"], json!(1.5));
        assert_eq!(payload["ban_eos_token"], json!(false));
    }

    #[test]
    fn test_passthrough_rejects_compound_values() {
        let mut raw = HashMap::new();
        raw.insert("sampler_priority".to_string(), json!(["top_k", "top_p"]));

        let err = Passthrough::resolve(&raw).unwrap_err();
        match err {
            BridgeError::UnsupportedPassthrough { key, kind } => {
                assert_eq!(key, "sampler_priority");
                assert_eq!(kind, "array");
            }
            other => panic!("unexpected error: {other}"),
        }
    }
}
