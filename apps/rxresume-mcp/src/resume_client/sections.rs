//! Single-section edits applied to a fetched resume before it is patched back.

use std::fmt;
use std::str::FromStr;

use serde_json::{json, Map, Value};
use thiserror::Error;

/// Sections Reactive Resume expects to find on every document.
pub const REQUIRED_SECTIONS: [&str; 14] = [
    "summary",
    "awards",
    "certifications",
    "education",
    "experience",
    "volunteer",
    "interests",
    "languages",
    "profiles",
    "projects",
    "publications",
    "references",
    "skills",
    "custom",
];

#[derive(Debug, Error, PartialEq)]
pub enum SectionError {
    #[error("Invalid operation. Must be one of: update, add, remove")]
    InvalidOperation,

    #[error("Unknown section '{0}'")]
    UnknownSection(String),

    #[error("Summary section only supports 'update' operation with 'content' field")]
    SummaryUpdateOnly,

    #[error("Item ID is required for {0} operation")]
    MissingItemId(SectionOperation),

    #[error("Item with ID {0} not found")]
    ItemNotFound(String),

    #[error("No matching items found with provided IDs for removal")]
    NothingRemoved,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SectionOperation {
    Update,
    Add,
    Remove,
}

impl FromStr for SectionOperation {
    type Err = SectionError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "update" => Ok(Self::Update),
            "add" => Ok(Self::Add),
            "remove" => Ok(Self::Remove),
            _ => Err(SectionError::InvalidOperation),
        }
    }
}

impl fmt::Display for SectionOperation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Update => "update",
            Self::Add => "add",
            Self::Remove => "remove",
        })
    }
}

/// Builds the PATCH body from a fetched resume: top-level identity fields plus
/// `basics`, `metadata` and `sections`, with every required section present.
pub fn build_update_payload(current: &Value) -> Value {
    let data = current.get("data");
    let field = |name: &str| data.and_then(|d| d.get(name)).cloned().unwrap_or_else(|| json!({}));

    let mut sections = match field("sections") {
        Value::Object(map) => map,
        _ => Map::new(),
    };
    ensure_required_sections(&mut sections);

    json!({
        "title": current.get("title").cloned().unwrap_or(Value::Null),
        "slug": current.get("slug").cloned().unwrap_or(Value::Null),
        "visibility": current.get("visibility").cloned().unwrap_or(Value::Null),
        "data": {
            "basics": field("basics"),
            "metadata": field("metadata"),
            "sections": Value::Object(sections),
        }
    })
}

pub fn ensure_required_sections(sections: &mut Map<String, Value>) {
    for name in REQUIRED_SECTIONS {
        match sections.get(name) {
            None => {
                let section = if name == "summary" {
                    json!({ "name": "Professional Summary", "id": "summary", "content": "" })
                } else {
                    json!({ "name": capitalize(name), "id": name, "items": [] })
                };
                sections.insert(name.to_string(), section);
            }
            Some(existing) if name == "summary" && existing.get("items").is_some() => {
                let content = existing
                    .get("content")
                    .cloned()
                    .unwrap_or_else(|| Value::String(String::new()));
                sections.insert(
                    name.to_string(),
                    json!({ "name": "Professional Summary", "id": "summary", "content": content }),
                );
            }
            Some(_) => {}
        }
    }
}

/// Applies one operation to `sections[section_name]`.
pub fn apply_section_change(
    sections: &mut Map<String, Value>,
    section_name: &str,
    operation: SectionOperation,
    data: &Value,
) -> Result<(), SectionError> {
    if section_name == "summary" {
        let content = data.get("content");
        return match (operation, content) {
            (SectionOperation::Update, Some(content)) => {
                sections.insert(
                    "summary".to_string(),
                    json!({ "name": "Professional Summary", "id": "summary", "content": content }),
                );
                Ok(())
            }
            _ => Err(SectionError::SummaryUpdateOnly),
        };
    }

    let section = sections
        .get_mut(section_name)
        .and_then(Value::as_object_mut)
        .ok_or_else(|| SectionError::UnknownSection(section_name.to_string()))?;

    let mut items = match section.remove("items") {
        Some(Value::Array(items)) => items,
        _ => Vec::new(),
    };
    let incoming: &[Value] = data
        .get("items")
        .and_then(Value::as_array)
        .map(Vec::as_slice)
        .unwrap_or_default();

    match operation {
        SectionOperation::Update => update_items(&mut items, incoming, section_name)?,
        SectionOperation::Add => {
            items.extend(incoming.iter().map(|item| new_item(item, section_name)));
        }
        SectionOperation::Remove => remove_items(&mut items, incoming)?,
    }

    section.insert("name".to_string(), Value::String(capitalize(section_name)));
    section.insert("id".to_string(), Value::String(section_name.to_string()));
    section.insert("items".to_string(), Value::Array(items));
    Ok(())
}

fn update_items(
    items: &mut [Value],
    incoming: &[Value],
    section_name: &str,
) -> Result<(), SectionError> {
    for patch in incoming {
        let id = item_id(patch).ok_or(SectionError::MissingItemId(SectionOperation::Update))?;
        let target = items
            .iter_mut()
            .find(|item| item_id(item) == Some(id))
            .ok_or_else(|| SectionError::ItemNotFound(id.to_string()))?;

        if let (Some(target), Some(patch)) = (target.as_object_mut(), patch.as_object()) {
            for (key, value) in patch {
                target.insert(key.clone(), value.clone());
            }
            target.entry("visible").or_insert(Value::Bool(true));
            match section_name {
                "skills" => {
                    target.entry("description").or_insert_with(|| json!(""));
                }
                "education" | "experience" => {
                    target
                        .entry("url")
                        .or_insert_with(|| json!({ "label": "", "href": "" }));
                }
                _ => {}
            }
        }
    }
    Ok(())
}

fn new_item(item: &Value, section_name: &str) -> Value {
    let mut item = match item {
        Value::Object(map) => map.clone(),
        _ => Map::new(),
    };
    item.remove("id");
    item.entry("visible").or_insert(Value::Bool(true));

    let defaults: Vec<(&str, Value)> = match section_name {
        "skills" => vec![
            ("name", json!("")),
            ("description", json!("")),
            ("level", json!(0)),
            ("keywords", json!([])),
        ],
        "education" => vec![
            ("institution", json!("")),
            ("degree", json!("")),
            ("area", json!("")),
            ("score", json!("")),
            ("date", json!("")),
            ("summary", json!("")),
            ("studyType", json!("Full-time")),
            ("url", json!({ "label": "", "href": "" })),
        ],
        "experience" => vec![
            ("company", json!("")),
            ("position", json!("")),
            ("summary", json!("")),
            ("date", json!("")),
            ("location", json!("")),
            ("url", json!({ "label": "", "href": "" })),
        ],
        _ => Vec::new(),
    };
    for (key, value) in defaults {
        item.entry(key).or_insert(value);
    }
    Value::Object(item)
}

fn remove_items(items: &mut Vec<Value>, incoming: &[Value]) -> Result<(), SectionError> {
    let ids: Vec<&str> = incoming
        .iter()
        .map(item_id)
        .collect::<Option<_>>()
        .ok_or(SectionError::MissingItemId(SectionOperation::Remove))?;

    let before = items.len();
    items.retain(|item| !item_id(item).is_some_and(|id| ids.contains(&id)));
    if items.len() == before {
        return Err(SectionError::NothingRemoved);
    }
    Ok(())
}

fn item_id(item: &Value) -> Option<&str> {
    item.get("id").and_then(Value::as_str).filter(|id| !id.is_empty())
}

fn capitalize(name: &str) -> String {
    let mut chars = name.chars();
    match chars.next() {
        Some(first) => first.to_uppercase().chain(chars).collect(),
        None => String::new(),
    }
}
