//! Remote configuration source.
//!
//! A payload fully replaces the previous one: fields it omits fall back to
//! lower-priority sources.

use super::options::TagsOption;
use super::{ConfigSource, Origin, add_tags};
use crate::normalize;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::collections::BTreeMap;

/// `tracing_header_tags` item.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HeaderTag {
    pub header: String,
    #[serde(default)]
    pub tag_name: Option<String>,
}

/// Tags pushed remotely, usually as `["key:value", ...]`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum RemoteTags {
    List(Vec<String>),
    Other(TagsOption),
}

/// Library configuration pushed by the remote configuration service.
///
/// Unknown fields are ignored; `null` fields are unset.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RemotePayload {
    #[serde(default)]
    pub tracing_sampling_rate: Option<f64>,
    #[serde(default)]
    pub tracing_sampling_rules: Option<Vec<Value>>,
    #[serde(default)]
    pub tracing_header_tags: Option<Vec<HeaderTag>>,
    #[serde(default)]
    pub tracing_tags: Option<RemoteTags>,
    #[serde(default)]
    pub dynamic_instrumentation_enabled: Option<bool>,
    #[serde(default)]
    pub code_origin_enabled: Option<bool>,
    #[serde(default)]
    pub log_injection_enabled: Option<bool>,
    #[serde(default)]
    pub tracing_enabled: Option<bool>,
}

/// Reshape remote rule tags `[{key, value_glob}]` into a `{key: glob}` map.
fn reshape_rule_tags(rules: Vec<Value>) -> Vec<Value> {
    rules
        .into_iter()
        .map(|mut rule| {
            if let Some(Value::Array(tags)) = rule.get("tags").cloned() {
                let reshaped: Map<String, Value> = tags
                    .iter()
                    .filter_map(|tag| {
                        let key = tag.get("key")?.as_str()?.to_string();
                        Some((key, tag.get("value_glob").cloned().unwrap_or(Value::Null)))
                    })
                    .collect();
                if let Some(fields) = rule.as_object_mut() {
                    fields.insert("tags".to_string(), Value::Object(reshaped));
                }
            }
            rule
        })
        .collect()
}

/// Build the remote source from a payload.
pub fn build(payload: &RemotePayload, runtime_id: &str) -> ConfigSource {
    let mut remote = ConfigSource::new(Origin::RemoteConfig);

    remote.set_bool_value(
        "dynamicInstrumentation.enabled",
        payload.dynamic_instrumentation_enabled,
    );
    remote.set_bool_value("codeOriginForSpans.enabled", payload.code_origin_enabled);
    remote.set_float(
        "sampleRate",
        payload.tracing_sampling_rate.map(|rate| rate.clamp(0.0, 1.0)),
    );
    remote.set_bool_value("logInjection", payload.log_injection_enabled);
    remote.set_bool_value("tracing", payload.tracing_enabled);

    match &payload.tracing_sampling_rules {
        Some(rules) => {
            remote.set_unprocessed("sampler.rules", Value::Array(rules.clone()));
            let rules = normalize::rename_rule_fields(reshape_rule_tags(rules.clone()));
            remote.set("sampler.rules", Value::Array(rules));
        }
        None => remote.unset("sampler.rules"),
    }

    remote.set_list(
        "headerTags",
        payload.tracing_header_tags.as_ref().map(|tags| {
            tags.iter()
                .map(|tag| match tag.tag_name.as_deref().filter(|t| !t.is_empty()) {
                    Some(tag_name) => format!("{}:{}", tag.header, tag_name),
                    None => tag.header.clone(),
                })
                .collect()
        }),
    );

    let mut tags = BTreeMap::new();
    match &payload.tracing_tags {
        Some(RemoteTags::List(items)) => add_tags(&mut tags, Some(&items.join(","))),
        Some(RemoteTags::Other(TagsOption::Text(text))) => add_tags(&mut tags, Some(text)),
        Some(RemoteTags::Other(TagsOption::Map(map))) => {
            tags.extend(map.iter().map(|(k, v)| (k.clone(), v.to_text())));
        }
        None => {}
    }
    if !tags.is_empty() {
        tags.insert("runtime-id".to_string(), runtime_id.to_string());
    }
    remote.set_tags("tags", tags);

    remote
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_payload_maps_fields() {
        let payload: RemotePayload = serde_json::from_value(json!({
            "tracing_sampling_rate": 0.3,
            "tracing_enabled": false,
            "tracing_header_tags": [{"header": "x-user", "tag_name": "user.id"}, {"header": "accept"}],
            "tracing_tags": ["team:core", "tier:1"],
            "log_injection_enabled": null,
            "some_future_field": 42
        }))
        .unwrap();

        let remote = build(&payload, "rid-1");
        assert_eq!(remote.get("sampleRate"), Some(&json!(0.3)));
        assert_eq!(remote.get("tracing"), Some(&json!(false)));
        assert_eq!(remote.get("headerTags"), Some(&json!(["x-user:user.id", "accept"])));
        assert_eq!(
            remote.get("tags"),
            Some(&json!({"team": "core", "tier": "1", "runtime-id": "rid-1"}))
        );
        assert_eq!(remote.get("logInjection"), None);
        assert_eq!(remote.get("sampler.rules"), None);
    }

    #[test]
    fn test_sampling_rule_tags_reshaped() {
        let payload = RemotePayload {
            tracing_sampling_rules: Some(vec![json!({
                "service": "web",
                "sample_rate": 0.5,
                "tags": [{"key": "env", "value_glob": "prod*"}]
            })]),
            ..Default::default()
        };

        let remote = build(&payload, "rid");
        assert_eq!(
            remote.get("sampler.rules"),
            Some(&json!([{"service": "web", "sampleRate": 0.5, "tags": {"env": "prod*"}}]))
        );
        assert_eq!(
            remote.unprocessed("sampler.rules").unwrap()[0]["tags"][0]["key"],
            json!("env")
        );
    }

    #[test]
    fn test_empty_tags_have_no_runtime_id() {
        let remote = build(&RemotePayload::default(), "rid");
        assert_eq!(remote.get("tags"), None);
    }
}
