//! Per-provider JSON Schema adaptation
//!
//! Function-calling validators disagree about JSON Schema details. The
//! adapter rewrites a draft-7 tool schema into a form the target provider
//! accepts. It is pure, applied recursively, stable, and idempotent.
//!
//! Rules:
//! - `openai`, `google`: remove `format: "uri"` (both validators reject
//!   strict URI formats inconsistently).
//! - `openai`: on every `type: object` node, set `additionalProperties: false`
//!   when absent (the caller's value is preserved when present). An explicit
//!   `required` array is preserved and never synthesized, since OpenAI rejects
//!   required fields that are semantically optional.
//! - Recursion descends into `properties.*` and, for `type: array`, into a
//!   single-object `items` schema. Non-object, non-array nodes pass through
//!   unchanged.

use bronte_protocol::ProviderKind;
use serde_json::Value;

/// Adapt a tool input schema for the given provider.
pub fn adapt_schema(kind: ProviderKind, schema: &Value) -> Value {
    match kind {
        ProviderKind::OpenAI | ProviderKind::Google => adapt_node(kind, schema),
        ProviderKind::Xai | ProviderKind::Azure | ProviderKind::Anthropic => schema.clone(),
    }
}

fn adapt_node(kind: ProviderKind, node: &Value) -> Value {
    let Some(obj) = node.as_object() else {
        return node.clone();
    };
    let mut out = obj.clone();

    if out.get("format").and_then(Value::as_str) == Some("uri") {
        out.remove("format");
    }

    let node_type = out.get("type").and_then(Value::as_str).map(|s| s.to_string());

    if kind == ProviderKind::OpenAI
        && node_type.as_deref() == Some("object")
        && !out.contains_key("additionalProperties")
    {
        out.insert("additionalProperties".to_string(), Value::Bool(false));
    }

    if let Some(Value::Object(props)) = out.get_mut("properties") {
        for (_name, prop) in props.iter_mut() {
            *prop = adapt_node(kind, &prop.clone());
        }
    }

    if node_type.as_deref() == Some("array") {
        if let Some(items) = out.get("items") {
            if items.is_object() {
                let adapted = adapt_node(kind, items);
                out.insert("items".to_string(), adapted);
            }
        }
    }

    Value::Object(out)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn openai_strips_uri_format_and_closes_objects() {
        let schema = json!({
            "type": "object",
            "properties": {"u": {"type": "string", "format": "uri"}},
            "required": ["u"]
        });
        let adapted = adapt_schema(ProviderKind::OpenAI, &schema);
        assert_eq!(
            adapted,
            json!({
                "type": "object",
                "additionalProperties": false,
                "properties": {"u": {"type": "string"}},
                "required": ["u"]
            })
        );
    }

    #[test]
    fn openai_preserves_explicit_additional_properties() {
        let schema = json!({"type": "object", "additionalProperties": true, "properties": {}});
        let adapted = adapt_schema(ProviderKind::OpenAI, &schema);
        assert_eq!(adapted["additionalProperties"], json!(true));
    }

    #[test]
    fn openai_never_synthesizes_required() {
        let schema = json!({"type": "object", "properties": {"a": {"type": "string"}}});
        let adapted = adapt_schema(ProviderKind::OpenAI, &schema);
        assert!(adapted.get("required").is_none());
    }

    #[test]
    fn google_strips_uri_but_leaves_objects_open() {
        let schema = json!({
            "type": "object",
            "properties": {"u": {"type": "string", "format": "uri"}}
        });
        let adapted = adapt_schema(ProviderKind::Google, &schema);
        assert!(adapted["properties"]["u"].get("format").is_none());
        assert!(adapted.get("additionalProperties").is_none());
    }

    #[test]
    fn other_formats_survive() {
        let schema = json!({
            "type": "object",
            "properties": {"when": {"type": "string", "format": "date-time"}}
        });
        let adapted = adapt_schema(ProviderKind::OpenAI, &schema);
        assert_eq!(adapted["properties"]["when"]["format"], json!("date-time"));
    }

    #[test]
    fn recursion_reaches_array_items() {
        let schema = json!({
            "type": "object",
            "properties": {
                "links": {
                    "type": "array",
                    "items": {
                        "type": "object",
                        "properties": {"href": {"type": "string", "format": "uri"}}
                    }
                }
            }
        });
        let adapted = adapt_schema(ProviderKind::OpenAI, &schema);
        let items = &adapted["properties"]["links"]["items"];
        assert_eq!(items["additionalProperties"], json!(false));
        assert!(items["properties"]["href"].get("format").is_none());
    }

    #[test]
    fn anthropic_passes_through_unchanged() {
        let schema = json!({
            "type": "object",
            "properties": {"u": {"type": "string", "format": "uri"}}
        });
        assert_eq!(adapt_schema(ProviderKind::Anthropic, &schema), schema);
    }

    #[test]
    fn adapt_is_idempotent() {
        let schema = json!({
            "type": "object",
            "properties": {
                "u": {"type": "string", "format": "uri"},
                "nested": {
                    "type": "object",
                    "properties": {"n": {"type": "number"}},
                    "required": ["n"]
                },
                "list": {"type": "array", "items": {"type": "object"}}
            }
        });
        for kind in [
            ProviderKind::OpenAI,
            ProviderKind::Google,
            ProviderKind::Anthropic,
        ] {
            let once = adapt_schema(kind, &schema);
            let twice = adapt_schema(kind, &once);
            assert_eq!(once, twice, "adapt not idempotent for {kind}");
        }
    }

    #[test]
    fn non_object_nodes_pass_through() {
        assert_eq!(
            adapt_schema(ProviderKind::OpenAI, &json!(true)),
            json!(true)
        );
        assert_eq!(
            adapt_schema(ProviderKind::OpenAI, &json!("string")),
            json!("string")
        );
    }
}
