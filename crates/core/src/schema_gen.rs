//! The JSON-Schema Generator from spec.md §4.8.
//!
//! Ported from
//! `examples/original_source/backend/app/services/evaluators/schema_generator.py`
//! (itself a Python port of a TypeScript visual-builder generator). The
//! field-list shape and the strict-schema output (`additionalProperties:
//! false`, every key required) are carried unchanged.

use serde::{Deserialize, Serialize};
use serde_json::{json, Map, Value};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FieldType {
    Number,
    Text,
    Boolean,
    Array,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ArrayItemType {
    String,
    Number,
    Boolean,
    Object,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ObjectItemProperty {
    pub key: String,
    #[serde(default = "default_property_type")]
    pub r#type: String,
    #[serde(default)]
    pub description: Option<String>,
}

fn default_property_type() -> String {
    "string".to_string()
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ArrayItemSchema {
    pub item_type: ArrayItemType,
    #[serde(default)]
    pub properties: Vec<ObjectItemProperty>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum DisplayMode {
    Number,
    Percentage,
    Badge,
    Text,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Thresholds {
    #[serde(default)]
    pub pass_min: Option<f64>,
    #[serde(default)]
    pub warn_min: Option<f64>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EvaluatorOutputField {
    pub key: String,
    pub r#type: FieldType,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub array_item_schema: Option<ArrayItemSchema>,
    #[serde(default)]
    pub thresholds: Option<Thresholds>,
    pub display_mode: DisplayMode,
    pub is_main_metric: bool,
}

fn generate_array_item_schema(schema: &Option<ArrayItemSchema>) -> Value {
    let Some(schema) = schema else {
        return json!({"type": "string"});
    };

    match schema.item_type {
        ArrayItemType::String => json!({"type": "string"}),
        ArrayItemType::Number => json!({"type": "number"}),
        ArrayItemType::Boolean => json!({"type": "boolean"}),
        ArrayItemType::Object => {
            if schema.properties.is_empty() {
                return json!({"type": "string"});
            }
            let mut properties = Map::new();
            let mut required = Vec::new();
            for prop in &schema.properties {
                let mut prop_schema = Map::new();
                prop_schema.insert("type".to_string(), Value::String(prop.r#type.clone()));
                if let Some(description) = &prop.description {
                    prop_schema.insert("description".to_string(), Value::String(description.clone()));
                }
                properties.insert(prop.key.clone(), Value::Object(prop_schema));
                required.push(Value::String(prop.key.clone()));
            }
            json!({
                "type": "object",
                "properties": properties,
                "required": required,
            })
        }
    }
}

fn generate_field_schema(field: &EvaluatorOutputField) -> Value {
    let mut base = Map::new();
    if let Some(description) = &field.description {
        base.insert("description".to_string(), Value::String(description.clone()));
    }

    match field.r#type {
        FieldType::Number => {
            base.insert("type".to_string(), Value::String("number".to_string()));
        }
        FieldType::Text => {
            base.insert("type".to_string(), Value::String("string".to_string()));
        }
        FieldType::Boolean => {
            base.insert("type".to_string(), Value::String("boolean".to_string()));
        }
        FieldType::Array => {
            base.insert("type".to_string(), Value::String("array".to_string()));
            base.insert("items".to_string(), generate_array_item_schema(&field.array_item_schema));
        }
    }

    Value::Object(base)
}

/// Converts a visual field-list into a strict JSON Schema object: every
/// key listed is required, and `additionalProperties` is `false` so the
/// provider's structured-output mode rejects stray keys.
pub fn generate_json_schema(fields: &[EvaluatorOutputField]) -> Value {
    let mut properties = Map::new();
    let mut required = Vec::new();

    for field in fields {
        properties.insert(field.key.clone(), generate_field_schema(field));
        required.push(Value::String(field.key.clone()));
    }

    json!({
        "type": "object",
        "properties": properties,
        "required": required,
        "additionalProperties": false,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn field(key: &str, ty: FieldType) -> EvaluatorOutputField {
        EvaluatorOutputField {
            key: key.to_string(),
            r#type: ty,
            description: None,
            array_item_schema: None,
            thresholds: None,
            display_mode: DisplayMode::Text,
            is_main_metric: false,
        }
    }

    #[test]
    fn scalar_fields_map_to_primitive_types() {
        let schema = generate_json_schema(&[field("score", FieldType::Number), field("passed", FieldType::Boolean)]);
        assert_eq!(schema["properties"]["score"]["type"], "number");
        assert_eq!(schema["properties"]["passed"]["type"], "boolean");
        assert_eq!(schema["additionalProperties"], false);
        assert_eq!(schema["required"], json!(["score", "passed"]));
    }

    #[test]
    fn array_field_without_item_schema_defaults_to_string_items() {
        let schema = generate_json_schema(&[field("tags", FieldType::Array)]);
        assert_eq!(schema["properties"]["tags"]["items"]["type"], "string");
    }

    #[test]
    fn array_of_objects_marks_every_sub_property_required() {
        let mut f = field("findings", FieldType::Array);
        f.array_item_schema = Some(ArrayItemSchema {
            item_type: ArrayItemType::Object,
            properties: vec![
                ObjectItemProperty {
                    key: "rule".to_string(),
                    r#type: "string".to_string(),
                    description: None,
                },
                ObjectItemProperty {
                    key: "followed".to_string(),
                    r#type: "boolean".to_string(),
                    description: Some("whether the rule was followed".to_string()),
                },
            ],
        });
        let schema = generate_json_schema(&[f]);
        let item_schema = &schema["properties"]["findings"]["items"];
        assert_eq!(item_schema["type"], "object");
        assert_eq!(item_schema["required"], json!(["rule", "followed"]));
        assert_eq!(item_schema["properties"]["followed"]["description"], "whether the rule was followed");
    }
}
