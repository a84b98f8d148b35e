//! Tool parameter schemas and their normalization.
//!
//! Providers hand us arbitrary JSON Schema. Several LLM providers with strict
//! function calling reject (or silently drop) declarations that use
//! `anyOf`/`oneOf`/`allOf` or `additionalProperties`, so every schema is
//! reduced to a plain subset before it is advertised:
//!
//! 1. `additionalProperties` is removed.
//! 2. `anyOf`/`oneOf` lose their null-only branches and are replaced by the
//!    **first** remaining branch, merged into the node. Alternative types are
//!    lost: `string | string[]` becomes `string`.
//! 3. `allOf` branches are merged into the node in order; later branches win,
//!    `properties` maps are merged key by key, `required` lists are unioned.
//! 4. `properties` and `items` (including tuple-form `items` arrays) are
//!    normalized recursively.
//! 5. A combinator keyword whose value is not an array is dropped.
//! 6. Every other key is kept as is.
//!
//! [`SchemaNode::sanitize`] is total and idempotent.

use std::collections::BTreeMap;

use serde::{Deserialize, Deserializer, Serialize, Serializer};
use serde_json::{Map, Value};

/// A parameter schema.
#[derive(Debug, Clone, PartialEq, Default)]
pub enum SchemaNode {
    /// No schema (`null`). Passes through normalization untouched.
    #[default]
    Null,
    /// A non-object schema value such as `true` or `false`.
    Literal(Value),
    /// A structured schema.
    Object(Box<Schema>),
}

/// The structured part of a schema, with the keys we act on pulled out.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct Schema {
    pub schema_type: Option<SchemaType>,
    pub properties: Option<BTreeMap<String, SchemaNode>>,
    pub items: Option<Items>,
    pub required: Option<Vec<String>>,
    pub additional_properties: Option<Box<SchemaNode>>,
    pub combinators: Vec<Combinator>,
    /// Keys with no special meaning here (`description`, `enum`, ...).
    pub extra: Map<String, Value>,
}

/// The `items` keyword: one schema for every element, or one per position.
#[derive(Debug, Clone, PartialEq)]
pub enum Items {
    Single(Box<SchemaNode>),
    Tuple(Vec<SchemaNode>),
}

impl Items {
    fn sanitize(self) -> Items {
        match self {
            Items::Single(node) => Items::Single(Box::new(node.sanitize())),
            Items::Tuple(nodes) => {
                Items::Tuple(nodes.into_iter().map(SchemaNode::sanitize).collect())
            }
        }
    }

    fn nodes(&self) -> &[SchemaNode] {
        match self {
            Items::Single(node) => std::slice::from_ref(&**node),
            Items::Tuple(nodes) => nodes,
        }
    }
}

const COMBINATOR_KEYWORDS: [&str; 3] = ["anyOf", "oneOf", "allOf"];

/// The `type` keyword.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SchemaType {
    Single(String),
    Multiple(Vec<String>),
}

/// Union and intersection keywords.
#[derive(Debug, Clone, PartialEq)]
pub enum Combinator {
    AnyOf(Vec<SchemaNode>),
    OneOf(Vec<SchemaNode>),
    AllOf(Vec<SchemaNode>),
}

impl Combinator {
    fn keyword(&self) -> &'static str {
        match self {
            Combinator::AnyOf(_) => "anyOf",
            Combinator::OneOf(_) => "oneOf",
            Combinator::AllOf(_) => "allOf",
        }
    }

    fn branches(&self) -> &[SchemaNode] {
        match self {
            Combinator::AnyOf(b) | Combinator::OneOf(b) | Combinator::AllOf(b) => b,
        }
    }
}

impl SchemaNode {
    /// Shorthand for `{"type": <name>}`.
    pub fn of_type(name: impl Into<String>) -> Self {
        SchemaNode::Object(Box::new(Schema {
            schema_type: Some(SchemaType::Single(name.into())),
            ..Default::default()
        }))
    }

    pub fn as_schema(&self) -> Option<&Schema> {
        match self {
            SchemaNode::Object(schema) => Some(schema),
            _ => None,
        }
    }

    /// Normalize into the subset strict providers accept.
    pub fn sanitize(self) -> SchemaNode {
        match self {
            SchemaNode::Object(schema) => SchemaNode::Object(Box::new(schema.sanitize())),
            other => other,
        }
    }

    /// Whether this node only says "null".
    fn is_null_marker(&self) -> bool {
        match self {
            SchemaNode::Null => true,
            SchemaNode::Literal(_) => false,
            SchemaNode::Object(schema) => {
                schema.schema_type == Some(SchemaType::Single("null".to_string()))
                    && schema.properties.is_none()
                    && schema.items.is_none()
                    && schema.required.is_none()
                    && schema.additional_properties.is_none()
                    && schema.combinators.is_empty()
                    && schema.extra.is_empty()
            }
        }
    }

    /// True if a combinator or `additionalProperties` appears anywhere in
    /// the normalized part of the tree (`properties` and `items`).
    pub fn has_unsupported_keywords(&self) -> bool {
        let Some(schema) = self.as_schema() else {
            return false;
        };
        !schema.combinators.is_empty()
            || schema.additional_properties.is_some()
            || schema
                .properties
                .iter()
                .flat_map(|p| p.values())
                .any(SchemaNode::has_unsupported_keywords)
            || schema
                .items
                .iter()
                .flat_map(Items::nodes)
                .any(SchemaNode::has_unsupported_keywords)
            || COMBINATOR_KEYWORDS.iter().any(|k| schema.extra.contains_key(*k))
    }
}

impl Schema {
    fn sanitize(mut self) -> Schema {
        self.additional_properties = None;
        // Only malformed combinators end up here.
        self.extra.retain(|key, _| !COMBINATOR_KEYWORDS.contains(&key.as_str()));
        let combinators = std::mem::take(&mut self.combinators);

        if let Some(properties) = self.properties.take() {
            self.properties = Some(
                properties
                    .into_iter()
                    .map(|(name, node)| (name, node.sanitize()))
                    .collect(),
            );
        }
        if let Some(items) = self.items.take() {
            self.items = Some(items.sanitize());
        }

        // Unions first, intersections second, whatever their key order.
        let (unions, intersections): (Vec<_>, Vec<_>) = combinators
            .into_iter()
            .partition(|c| !matches!(c, Combinator::AllOf(_)));

        for union in unions {
            let (Combinator::AnyOf(branches) | Combinator::OneOf(branches)) = union else {
                continue;
            };
            // An all-null union collapses to its first (null) branch.
            let first = branches.first().cloned();
            let chosen = branches.into_iter().find(|b| !b.is_null_marker()).or(first);
            if let Some(branch) = chosen {
                self.merge(branch.sanitize());
            }
        }

        for intersection in intersections {
            if let Combinator::AllOf(branches) = intersection {
                for branch in branches {
                    self.merge(branch.sanitize());
                }
            }
        }

        self
    }

    /// Shallow merge of an already normalized node into this one.
    fn merge(&mut self, other: SchemaNode) {
        let SchemaNode::Object(other) = other else {
            return;
        };
        let other = *other;

        if other.schema_type.is_some() {
            self.schema_type = other.schema_type;
        }
        if let Some(properties) = other.properties {
            self.properties.get_or_insert_with(BTreeMap::new).extend(properties);
        }
        if other.items.is_some() {
            self.items = other.items;
        }
        if let Some(required) = other.required {
            let merged = self.required.get_or_insert_with(Vec::new);
            for name in required {
                if !merged.contains(&name) {
                    merged.push(name);
                }
            }
        }
        self.extra.extend(other.extra);
    }
}

impl From<Value> for SchemaNode {
    fn from(value: Value) -> Self {
        match value {
            Value::Null => SchemaNode::Null,
            Value::Object(map) => SchemaNode::Object(Box::new(Schema::from_map(map))),
            other => SchemaNode::Literal(other),
        }
    }
}

impl Schema {
    fn from_map(map: Map<String, Value>) -> Schema {
        let mut schema = Schema::default();
        for (key, value) in map {
            match (key.as_str(), value) {
                ("type", Value::String(name)) => {
                    schema.schema_type = Some(SchemaType::Single(name));
                }
                ("type", Value::Array(names)) if names.iter().all(Value::is_string) => {
                    let names = names
                        .into_iter()
                        .filter_map(|n| n.as_str().map(str::to_string))
                        .collect();
                    schema.schema_type = Some(SchemaType::Multiple(names));
                }
                ("properties", Value::Object(properties)) => {
                    schema.properties = Some(
                        properties
                            .into_iter()
                            .map(|(name, node)| (name, SchemaNode::from(node)))
                            .collect(),
                    );
                }
                ("items", items @ (Value::Object(_) | Value::Bool(_))) => {
                    schema.items = Some(Items::Single(Box::new(SchemaNode::from(items))));
                }
                ("items", Value::Array(positions)) => {
                    schema.items = Some(Items::Tuple(
                        positions.into_iter().map(SchemaNode::from).collect(),
                    ));
                }
                ("required", Value::Array(names)) if names.iter().all(Value::is_string) => {
                    schema.required = Some(
                        names
                            .into_iter()
                            .filter_map(|n| n.as_str().map(str::to_string))
                            .collect(),
                    );
                }
                ("additionalProperties", value) => {
                    schema.additional_properties = Some(Box::new(SchemaNode::from(value)));
                }
                ("anyOf" | "oneOf" | "allOf", Value::Array(branches)) => {
                    let branches: Vec<SchemaNode> =
                        branches.into_iter().map(SchemaNode::from).collect();
                    schema.combinators.push(match key.as_str() {
                        "anyOf" => Combinator::AnyOf(branches),
                        "oneOf" => Combinator::OneOf(branches),
                        _ => Combinator::AllOf(branches),
                    });
                }
                (_, value) => {
                    schema.extra.insert(key, value);
                }
            }
        }
        schema
    }
}

impl From<SchemaNode> for Value {
    fn from(node: SchemaNode) -> Self {
        match node {
            SchemaNode::Null => Value::Null,
            SchemaNode::Literal(value) => value,
            SchemaNode::Object(schema) => Value::Object(schema.into_map()),
        }
    }
}

impl From<&SchemaNode> for Value {
    fn from(node: &SchemaNode) -> Self {
        Value::from(node.clone())
    }
}

impl Schema {
    fn into_map(self) -> Map<String, Value> {
        let mut map = self.extra;
        match self.schema_type {
            Some(SchemaType::Single(name)) => {
                map.insert("type".into(), Value::String(name));
            }
            Some(SchemaType::Multiple(names)) => {
                map.insert(
                    "type".into(),
                    Value::Array(names.into_iter().map(Value::String).collect()),
                );
            }
            None => {}
        }
        if let Some(properties) = self.properties {
            let properties = properties
                .into_iter()
                .map(|(name, node)| (name, Value::from(node)))
                .collect();
            map.insert("properties".into(), Value::Object(properties));
        }
        match self.items {
            Some(Items::Single(node)) => {
                map.insert("items".into(), Value::from(*node));
            }
            Some(Items::Tuple(nodes)) => {
                map.insert(
                    "items".into(),
                    Value::Array(nodes.into_iter().map(Value::from).collect()),
                );
            }
            None => {}
        }
        if let Some(required) = self.required {
            map.insert(
                "required".into(),
                Value::Array(required.into_iter().map(Value::String).collect()),
            );
        }
        if let Some(additional) = self.additional_properties {
            map.insert("additionalProperties".into(), Value::from(*additional));
        }
        for combinator in self.combinators {
            let keyword = combinator.keyword();
            let branches = combinator.branches().iter().map(Value::from).collect();
            map.insert(keyword.into(), Value::Array(branches));
        }
        map
    }
}

impl Serialize for SchemaNode {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        Value::from(self).serialize(serializer)
    }
}

impl<'de> Deserialize<'de> for SchemaNode {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        Value::deserialize(deserializer).map(SchemaNode::from)
    }
}

/// Normalize a raw JSON schema value.
pub fn sanitize(value: Value) -> Value {
    SchemaNode::from(value).sanitize().into()
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use serde_json::json;

    fn corpus() -> Vec<Value> {
        vec![
            Value::Null,
            json!(true),
            json!({}),
            json!({"type": "string", "description": "plain"}),
            json!({"anyOf": [{"type": "null"}, {"type": "string"}]}),
            json!({"oneOf": [{"type": "string"}, {"type": "array", "items": {"type": "string"}}]}),
            json!({"anyOf": [{"type": "null"}]}),
            json!({
                "type": "object",
                "additionalProperties": false,
                "properties": {
                    "nested": {
                        "type": "object",
                        "additionalProperties": {"type": "string"},
                        "properties": {
                            "deep": {"anyOf": [{"type": "integer"}, {"type": "null"}]}
                        }
                    },
                    "list": {
                        "type": "array",
                        "items": {
                            "type": "object",
                            "additionalProperties": true,
                            "properties": {"id": {"type": "number"}},
                            "required": ["id"]
                        }
                    }
                },
                "required": ["nested"]
            }),
            json!({
                "allOf": [
                    {"type": "object", "properties": {"a": {"type": "string"}}, "required": ["a"]},
                    {"properties": {"b": {"oneOf": [{"type": "boolean"}]}}, "required": ["b", "a"]}
                ]
            }),
            json!({
                "description": "both",
                "anyOf": [{"type": "string", "description": "branch"}],
                "allOf": [{"minLength": 1}]
            }),
            json!({"type": ["string", "null"], "enum": ["a", null]}),
            json!({"items": [{"type": "string"}], "type": "array"}),
            json!({
                "type": "array",
                "items": [
                    {"anyOf": [{"type": "null"}, {"type": "integer"}]},
                    {"additionalProperties": false}
                ]
            }),
            json!({"type": "string", "anyOf": {"type": "integer"}, "oneOf": "nope"}),
        ]
    }

    #[test]
    fn union_with_null_reduces_to_the_other_branch() {
        let out = sanitize(json!({"anyOf": [{"type": "null"}, {"type": "string"}]}));
        assert_eq!(out, json!({"type": "string"}));
    }

    #[test]
    fn null_passes_through() {
        assert_eq!(sanitize(Value::Null), Value::Null);
        assert_eq!(SchemaNode::Null.sanitize(), SchemaNode::Null);
    }

    #[test]
    fn literal_schemas_pass_through() {
        assert_eq!(sanitize(json!(false)), json!(false));
    }

    #[test]
    fn is_idempotent() {
        for schema in corpus() {
            let once = sanitize(schema.clone());
            let twice = sanitize(once.clone());
            assert_eq!(twice, once, "input: {schema}");
        }
    }

    #[test]
    fn output_has_no_unsupported_keywords() {
        for schema in corpus() {
            let node = SchemaNode::from(schema.clone()).sanitize();
            assert!(!node.has_unsupported_keywords(), "input: {schema}");
            let text = Value::from(node).to_string();
            for keyword in ["anyOf", "oneOf", "allOf", "additionalProperties"] {
                assert!(!text.contains(keyword), "{keyword} survived in {text}");
            }
        }
    }

    #[test]
    fn strips_additional_properties_at_every_depth() {
        let out = sanitize(corpus()[7].clone());
        assert_eq!(
            out,
            json!({
                "type": "object",
                "properties": {
                    "nested": {
                        "type": "object",
                        "properties": {"deep": {"type": "integer"}}
                    },
                    "list": {
                        "type": "array",
                        "items": {
                            "type": "object",
                            "properties": {"id": {"type": "number"}},
                            "required": ["id"]
                        }
                    }
                },
                "required": ["nested"]
            })
        );
    }

    // Known loss: a field accepting `string | string[]` only advertises the
    // first alternative. Callers rely on this, so it is pinned here.
    #[test]
    fn union_keeps_only_first_alternative() {
        let out = sanitize(json!({
            "oneOf": [{"type": "string"}, {"type": "array", "items": {"type": "string"}}]
        }));
        assert_eq!(out, json!({"type": "string"}));
    }

    #[test]
    fn all_null_union_collapses_to_null_type() {
        assert_eq!(sanitize(json!({"anyOf": [{"type": "null"}]})), json!({"type": "null"}));
    }

    #[test]
    fn intersection_merges_in_order() {
        let out = sanitize(corpus()[8].clone());
        assert_eq!(
            out,
            json!({
                "type": "object",
                "properties": {"a": {"type": "string"}, "b": {"type": "boolean"}},
                "required": ["a", "b"]
            })
        );
    }

    #[test]
    fn union_branch_overrides_node_keys() {
        let out = sanitize(corpus()[9].clone());
        assert_eq!(
            out,
            json!({"type": "string", "description": "branch", "minLength": 1})
        );
    }

    #[test]
    fn unknown_keys_are_kept() {
        let schema = json!({"type": ["string", "null"], "enum": ["a", null]});
        assert_eq!(sanitize(schema.clone()), schema);

        let tuple = json!({"items": [{"type": "string"}], "type": "array"});
        assert_eq!(sanitize(tuple.clone()), tuple);
    }

    #[test]
    fn tuple_items_are_normalized_per_position() {
        let out = sanitize(corpus()[12].clone());
        assert_eq!(
            out,
            json!({"type": "array", "items": [{"type": "integer"}, {}]})
        );
    }

    #[test]
    fn malformed_combinators_are_dropped() {
        let out = sanitize(corpus()[13].clone());
        assert_eq!(out, json!({"type": "string"}));
    }

    #[test]
    fn serde_roundtrip_is_lossless_for_plain_schemas() {
        let schema = json!({
            "type": "object",
            "properties": {"path": {"type": "string"}},
            "required": ["path"]
        });
        let node: SchemaNode = serde_json::from_value(schema.clone()).unwrap();
        assert_eq!(serde_json::to_value(&node).unwrap(), schema);
    }
}
