//! Request payloads and the typed node model they are ingested into.
//!
//! The wire records ([`NodeRecord`], [`FieldRecord`]) mirror the JSON the
//! mind-map front-end posts: lenient, full of nullable attributes, and with
//! field values whose shape depends on the field type. [`Node`] and
//! [`Field`] are the ingested form the pipeline works with: field values are
//! resolved exactly once into a [`FieldValue`] variant so no later stage
//! inspects the type tag again.

use crate::error::ExportError;
use serde::{Deserialize, Deserializer, Serialize};
use serde_json::Value;
use tracing::warn;

/// Id of the single root node of every file export.
pub const ROOT_ID: &str = "root";

// ── Wire records ─────────────────────────────────────────────────────────

/// A file (mind-map) export request.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct FileExport {
    #[serde(default, deserialize_with = "nullable")]
    pub meta: Meta,

    /// Requested output format (`"docx"`, `"pdf"`, …). Optional.
    #[serde(default)]
    pub format: Option<String>,

    /// Flat, parent-referenced node list.
    #[serde(default, deserialize_with = "nullable")]
    pub data: Vec<NodeRecord>,
}

impl FileExport {
    /// Parse a request body.
    pub fn from_json(json: &str) -> Result<Self, ExportError> {
        serde_json::from_str(json).map_err(|e| ExportError::InvalidRequest(e.to_string()))
    }

    /// The record with the root id, if any.
    pub fn root(&self) -> Option<&NodeRecord> {
        self.data.iter().find(|n| n.id == ROOT_ID)
    }
}

/// Document metadata attached to a file export.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Meta {
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default = "default_author", deserialize_with = "nullable_author")]
    pub author: String,
    #[serde(default = "default_version", deserialize_with = "nullable_version")]
    pub version: String,
    #[serde(default)]
    pub key: Option<String>,
}

impl Default for Meta {
    fn default() -> Self {
        Self {
            name: None,
            author: default_author(),
            version: default_version(),
            key: None,
        }
    }
}

fn default_author() -> String {
    "AutoMind".to_string()
}

fn default_version() -> String {
    "0".to_string()
}

fn nullable_author<'de, D: Deserializer<'de>>(d: D) -> Result<String, D::Error> {
    Ok(Option::<String>::deserialize(d)?.unwrap_or_else(default_author))
}

fn nullable_version<'de, D: Deserializer<'de>>(d: D) -> Result<String, D::Error> {
    Ok(Option::<String>::deserialize(d)?.unwrap_or_else(default_version))
}

/// Treat an explicit JSON `null` like a missing attribute.
fn nullable<'de, D, T>(d: D) -> Result<T, D::Error>
where
    D: Deserializer<'de>,
    T: Default + Deserialize<'de>,
{
    Ok(Option::<T>::deserialize(d)?.unwrap_or_default())
}

/// One node of the flat list as posted.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct NodeRecord {
    pub id: String,

    #[serde(rename = "parentid", alias = "parentId", default)]
    pub parent_id: Option<String>,

    #[serde(default, deserialize_with = "nullable")]
    pub topic: String,

    #[serde(default)]
    pub description: Option<String>,

    /// Depth hint, 1 for the root.
    #[serde(default)]
    pub layer: Option<i64>,

    #[serde(
        rename = "architectureDiagrams",
        alias = "diagrams",
        default,
        deserialize_with = "nullable"
    )]
    pub diagrams: Vec<Diagram>,

    #[serde(
        rename = "content",
        alias = "fields",
        default,
        deserialize_with = "nullable"
    )]
    pub fields: Vec<FieldRecord>,
}

impl NodeRecord {
    /// Heading level for this record, see [`Node::heading_level`].
    pub fn heading_level(&self, max_level: u8) -> u8 {
        clamp_heading(self.layer.unwrap_or(1), max_level)
    }
}

/// A custom field attached to a node, value still untyped.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FieldRecord {
    #[serde(default, deserialize_with = "nullable")]
    pub field_id: String,

    #[serde(rename = "fieldType", alias = "type")]
    pub field_type: FieldType,

    #[serde(default)]
    pub value: Value,

    #[serde(default)]
    pub order_number: Option<i64>,

    #[serde(default)]
    pub name: Option<String>,
}

/// An embeddable diagram reference.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Diagram {
    #[serde(default, deserialize_with = "nullable")]
    pub id: String,
    #[serde(default, deserialize_with = "nullable")]
    pub name: String,
    /// A URL or `data:` URI.
    #[serde(default, deserialize_with = "nullable")]
    pub data: String,
}

/// A knowledge-base article export request.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct KnowledgeDoc {
    #[serde(default)]
    pub title: Option<String>,
    #[serde(default)]
    pub content_html: Option<String>,
}

impl KnowledgeDoc {
    /// Parse a request body.
    pub fn from_json(json: &str) -> Result<Self, ExportError> {
        serde_json::from_str(json).map_err(|e| ExportError::InvalidRequest(e.to_string()))
    }
}

// ── Field types ──────────────────────────────────────────────────────────

/// Type tag of a custom field.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum FieldType {
    Text,
    Textarea,
    Number,
    Select,
    SelectMulti,
    SingleUserSelect,
    MultiUserSelect,
    Date,
    Label,
    Version,
    Link,
    Drawio,
    Status,
    Array,
    RichText,
    Attachment,
    PositiveInteger,
    MultiUserGroupSelect,
}

impl FieldType {
    /// Whether values of this type are collections.
    pub fn is_list(self) -> bool {
        matches!(
            self,
            FieldType::SelectMulti
                | FieldType::MultiUserSelect
                | FieldType::Label
                | FieldType::Array
                | FieldType::MultiUserGroupSelect
        )
    }

    /// Whether the value is a JSON-encoded diagram list.
    pub fn is_diagram(self) -> bool {
        self == FieldType::Drawio
    }
}

// ── Ingested model ───────────────────────────────────────────────────────

/// A field value resolved according to its type.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FieldValue {
    Empty,
    Scalar(String),
    List(Vec<String>),
    Diagrams(Vec<Diagram>),
}

impl FieldValue {
    /// Resolve a raw JSON value for `field_type`.
    ///
    /// Only diagram values can fail; malformed list values degrade to an
    /// empty list.
    pub fn resolve(field_type: FieldType, raw: &Value) -> Result<Self, String> {
        if raw.is_null() {
            return Ok(FieldValue::Empty);
        }
        if field_type.is_diagram() {
            return resolve_diagrams(raw);
        }
        if field_type.is_list() {
            return Ok(FieldValue::List(resolve_list(raw)));
        }
        Ok(match raw {
            Value::String(s) => FieldValue::Scalar(s.clone()),
            other => FieldValue::Scalar(other.to_string()),
        })
    }

    /// Whether the field carries no displayable content.
    pub fn is_empty(&self) -> bool {
        match self {
            FieldValue::Empty => true,
            FieldValue::Scalar(s) => s.trim().is_empty(),
            FieldValue::List(items) => items.is_empty(),
            FieldValue::Diagrams(d) => d.is_empty(),
        }
    }
}

fn resolve_diagrams(raw: &Value) -> Result<FieldValue, String> {
    let diagrams: Vec<Diagram> = match raw {
        Value::String(s) if s.trim().is_empty() => return Ok(FieldValue::Empty),
        Value::String(s) => serde_json::from_str(s).map_err(|e| e.to_string())?,
        Value::Array(_) => serde_json::from_value(raw.clone()).map_err(|e| e.to_string())?,
        other => return Err(format!("expected a JSON diagram list, got {other}")),
    };
    Ok(FieldValue::Diagrams(diagrams))
}

fn resolve_list(raw: &Value) -> Vec<String> {
    let items = match raw {
        Value::Array(items) => items.clone(),
        Value::String(s) => match serde_json::from_str::<Vec<Value>>(s) {
            Ok(items) => items,
            Err(e) => {
                warn!("List field value {:?} is not a JSON list: {}", s, e);
                Vec::new()
            }
        },
        other => {
            warn!("List field value {} is not a JSON list", other);
            Vec::new()
        }
    };
    items
        .into_iter()
        .map(|v| match v {
            Value::String(s) => s,
            other => other.to_string(),
        })
        .collect()
}

/// A custom field with its value resolved.
#[derive(Debug, Clone, PartialEq)]
pub struct Field {
    pub field_id: String,
    pub field_type: FieldType,
    pub name: Option<String>,
    pub order_number: Option<i64>,
    pub value: FieldValue,
}

impl Field {
    /// Whether the field carries no displayable content.
    pub fn is_empty_content(&self) -> bool {
        self.value.is_empty()
    }

    /// Diagrams carried by this field, if it is a non-empty diagram field.
    pub fn diagrams(&self) -> &[Diagram] {
        match &self.value {
            FieldValue::Diagrams(d) => d,
            _ => &[],
        }
    }
}

/// One topic of the hierarchy.
#[derive(Debug, Clone, PartialEq)]
pub struct Node {
    pub id: String,
    pub parent_id: Option<String>,
    pub topic: String,
    pub description: Option<String>,
    pub layer: i64,
    pub diagrams: Vec<Diagram>,
    pub fields: Vec<Field>,
}

impl Node {
    /// Resolve a wire record.
    pub fn ingest(record: &NodeRecord) -> Result<Self, ExportError> {
        let fields = record
            .fields
            .iter()
            .map(|f| {
                let value = FieldValue::resolve(f.field_type, &f.value).map_err(|reason| {
                    ExportError::DiagramDecode {
                        node_id: record.id.clone(),
                        field_id: f.field_id.clone(),
                        reason,
                    }
                })?;
                Ok(Field {
                    field_id: f.field_id.clone(),
                    field_type: f.field_type,
                    name: f.name.clone(),
                    order_number: f.order_number,
                    value,
                })
            })
            .collect::<Result<Vec<_>, ExportError>>()?;

        Ok(Node {
            id: record.id.clone(),
            parent_id: record.parent_id.clone(),
            topic: record.topic.clone(),
            description: record.description.clone(),
            layer: record.layer.unwrap_or(1),
            diagrams: record.diagrams.clone(),
            fields,
        })
    }

    /// Heading level for this node: `clamp(layer - 1, 1, max_level)`.
    pub fn heading_level(&self, max_level: u8) -> u8 {
        clamp_heading(self.layer, max_level)
    }

    /// The description, unless absent or blank.
    pub fn non_blank_description(&self) -> Option<&str> {
        self.description.as_deref().filter(|d| !d.trim().is_empty())
    }

    /// Direct diagrams followed by diagrams from diagram fields, in field order.
    pub fn all_diagrams(&self) -> Vec<&Diagram> {
        self.diagrams
            .iter()
            .chain(
                self.fields
                    .iter()
                    .filter(|f| f.field_type.is_diagram())
                    .flat_map(|f| f.diagrams().iter()),
            )
            .collect()
    }
}

/// `clamp(layer - 1, 1, max_level)`, for any layer.
fn clamp_heading(layer: i64, max_level: u8) -> u8 {
    let max = i64::from(max_level.max(1));
    layer.saturating_sub(1).clamp(1, max) as u8
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn field(field_type: FieldType, value: Value) -> Field {
        Field {
            field_id: "f".into(),
            field_type,
            name: None,
            order_number: None,
            value: FieldValue::resolve(field_type, &value).unwrap(),
        }
    }

    #[test]
    fn list_types() {
        assert!(FieldType::SelectMulti.is_list());
        assert!(FieldType::Label.is_list());
        assert!(FieldType::MultiUserGroupSelect.is_list());
        assert!(!FieldType::Drawio.is_list());
        assert!(!FieldType::Text.is_list());
    }

    #[test]
    fn empty_content_for_list_fields() {
        assert!(field(FieldType::Array, json!("[]")).is_empty_content());
        assert!(!field(FieldType::Array, json!("[\"x\"]")).is_empty_content());
        assert!(field(FieldType::Label, json!([])).is_empty_content());
        assert!(!field(FieldType::Label, json!(["urgent"])).is_empty_content());
        assert!(field(FieldType::Label, json!("not a list")).is_empty_content());
    }

    #[test]
    fn empty_content_for_scalar_fields() {
        assert!(field(FieldType::Text, json!("")).is_empty_content());
        assert!(field(FieldType::Text, json!("   ")).is_empty_content());
        assert!(field(FieldType::Text, Value::Null).is_empty_content());
        assert!(!field(FieldType::Text, json!("hello")).is_empty_content());
        assert!(!field(FieldType::Number, json!(0)).is_empty_content());
    }

    #[test]
    fn diagram_field_values() {
        let f = field(
            FieldType::Drawio,
            json!(r#"[{"id":"d1","name":"arch","data":"http://x/d.svg"}]"#),
        );
        assert_eq!(f.diagrams().len(), 1);
        assert_eq!(f.diagrams()[0].data, "http://x/d.svg");

        assert!(field(FieldType::Drawio, json!("")).is_empty_content());
        assert!(FieldValue::resolve(FieldType::Drawio, &json!("{oops")).is_err());
        assert!(FieldValue::resolve(FieldType::Drawio, &json!(12)).is_err());
    }

    #[test]
    fn node_record_accepts_wire_names() {
        let rec: NodeRecord = serde_json::from_value(json!({
            "id": "a",
            "parentid": "root",
            "topic": "Alpha",
            "layer": 2,
            "background-color": "#fff",
            "architectureDiagrams": null,
            "content": [
                {"fieldId": "f1", "fieldType": "DRAWIO", "value": "[{\"id\":\"d\",\"name\":\"n\",\"data\":\"u\"}]"}
            ]
        }))
        .unwrap();
        assert_eq!(rec.parent_id.as_deref(), Some("root"));
        assert!(rec.diagrams.is_empty());
        let node = Node::ingest(&rec).unwrap();
        assert_eq!(node.all_diagrams().len(), 1);
    }

    #[test]
    fn node_record_accepts_spec_names() {
        let rec: NodeRecord = serde_json::from_value(json!({
            "id": "a",
            "parentId": "root",
            "topic": null,
            "diagrams": [{"id": "d", "name": "n", "data": "u"}],
            "fields": [{"fieldId": "f", "type": "TEXT", "value": "v"}]
        }))
        .unwrap();
        let node = Node::ingest(&rec).unwrap();
        assert_eq!(node.topic, "");
        assert_eq!(node.layer, 1);
        assert_eq!(node.diagrams.len(), 1);
        assert_eq!(node.fields[0].value, FieldValue::Scalar("v".into()));
    }

    #[test]
    fn bad_diagram_field_fails_ingestion() {
        let rec: NodeRecord = serde_json::from_value(json!({
            "id": "n1",
            "content": [{"fieldId": "f9", "fieldType": "DRAWIO", "value": "not json"}]
        }))
        .unwrap();
        match Node::ingest(&rec) {
            Err(ExportError::DiagramDecode { node_id, field_id, .. }) => {
                assert_eq!(node_id, "n1");
                assert_eq!(field_id, "f9");
            }
            other => panic!("expected DiagramDecode, got {other:?}"),
        }
    }

    #[test]
    fn direct_diagrams_come_first() {
        let rec: NodeRecord = serde_json::from_value(json!({
            "id": "n",
            "diagrams": [{"id": "direct", "name": "", "data": "a"}],
            "fields": [
                {"fieldId": "x", "type": "DRAWIO", "value": null},
                {"fieldId": "y", "type": "DRAWIO", "value": [{"id": "field", "name": "", "data": "b"}]}
            ]
        }))
        .unwrap();
        let node = Node::ingest(&rec).unwrap();
        let ids: Vec<_> = node.all_diagrams().iter().map(|d| d.id.as_str()).collect();
        assert_eq!(ids, vec!["direct", "field"]);
    }

    #[test]
    fn heading_level_is_clamped() {
        let mut node = Node::ingest(&NodeRecord::default()).unwrap();
        for (layer, expected) in [(-3, 1), (0, 1), (1, 1), (2, 1), (3, 2), (10, 9), (42, 9)] {
            node.layer = layer;
            assert_eq!(node.heading_level(9), expected, "layer {layer}");
        }
        node.layer = 8;
        assert_eq!(node.heading_level(6), 6);
        node.layer = i64::MIN;
        assert_eq!(node.heading_level(6), 1);
        node.layer = i64::MAX;
        assert_eq!(node.heading_level(6), 6);
    }

    #[test]
    fn record_heading_level_defaults_to_layer_one() {
        let mut rec = NodeRecord::default();
        assert_eq!(rec.heading_level(9), 1);
        rec.layer = Some(i64::MIN);
        assert_eq!(rec.heading_level(9), 1);
        rec.layer = Some(5);
        assert_eq!(rec.heading_level(9), 4);
    }

    #[test]
    fn meta_defaults() {
        let req = FileExport::from_json(r#"{"meta":{"name":"Plan","author":null},"data":[]}"#)
            .unwrap();
        assert_eq!(req.meta.author, "AutoMind");
        assert_eq!(req.meta.version, "0");
        assert!(FileExport::from_json("{").is_err());
    }
}
