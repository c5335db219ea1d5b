//! Memo model

use std::collections::{BTreeSet, HashSet};
use std::fmt;
use std::str::FromStr;
use std::sync::OnceLock;

use chrono::{DateTime, Utc};
use regex::Regex;
use serde::{Deserialize, Serialize};
use serde_json::{json, Map, Value};

use crate::error::ValidationError;

use super::names::{AttachmentName, MemoName, UserName};
use super::{timestamp_to_wire, FieldReader, WireModel};

/// Who can read a memo.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Visibility {
    Private,
    Protected,
    Public,
}

impl Visibility {
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Private => "PRIVATE",
            Self::Protected => "PROTECTED",
            Self::Public => "PUBLIC",
        }
    }
}

impl fmt::Display for Visibility {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Visibility {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "PRIVATE" => Ok(Self::Private),
            "PROTECTED" => Ok(Self::Protected),
            "PUBLIC" => Ok(Self::Public),
            other => Err(format!(
                "unknown visibility '{other}' (expected PRIVATE, PROTECTED or PUBLIC)"
            )),
        }
    }
}

/// Row status of a memo.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum State {
    Normal,
    Archived,
}

impl State {
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Normal => "NORMAL",
            Self::Archived => "ARCHIVED",
        }
    }
}

impl fmt::Display for State {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for State {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "NORMAL" => Ok(Self::Normal),
            "ARCHIVED" => Ok(Self::Archived),
            other => Err(format!(
                "unknown state '{other}' (expected NORMAL or ARCHIVED)"
            )),
        }
    }
}

/// Geographic location attached to a memo.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct Location {
    pub placeholder: String,
    pub latitude: f64,
    pub longitude: f64,
}

impl Location {
    /// Check coordinate ranges, recording problems under `field`.
    pub(crate) fn check(&self, field: &str, errors: &mut ValidationError) {
        if !(-90.0..=90.0).contains(&self.latitude) {
            errors.push(
                format!("{field}.latitude"),
                "latitude must be between -90 and 90",
            );
        }
        if !(-180.0..=180.0).contains(&self.longitude) {
            errors.push(
                format!("{field}.longitude"),
                "longitude must be between -180 and 180",
            );
        }
    }

    pub(crate) fn to_wire(&self) -> Value {
        json!({
            "placeholder": self.placeholder,
            "latitude": self.latitude,
            "longitude": self.longitude,
        })
    }
}

/// A memo as returned by the server.
#[derive(Debug, Clone, PartialEq)]
pub struct Memo {
    /// Resource name, `memos/{id}`
    pub name: MemoName,
    pub state: State,
    pub creator: UserName,
    pub create_time: DateTime<Utc>,
    pub update_time: DateTime<Utc>,
    pub display_time: Option<DateTime<Utc>>,
    /// Markdown content
    pub content: String,
    /// Plain text snippet computed by the server
    pub snippet: String,
    pub visibility: Visibility,
    pub tags: BTreeSet<String>,
    pub pinned: bool,
    /// Attachments referenced by name only.
    pub attachments: Vec<AttachmentName>,
    pub parent: Option<MemoName>,
    pub location: Option<Location>,
}

impl Memo {
    /// Get first line as title preview, truncated to `max_len` characters
    #[must_use]
    pub fn title_preview(&self, max_len: usize) -> String {
        self.content
            .lines()
            .next()
            .unwrap_or("")
            .chars()
            .take(max_len)
            .collect()
    }

    #[must_use]
    pub fn has_tag(&self, tag: &str) -> bool {
        self.tags.contains(tag)
    }
}

impl WireModel for Memo {
    const KIND: &'static str = "memo";

    fn from_wire(value: &Value) -> Result<Self, ValidationError> {
        let mut reader = FieldReader::new(Self::KIND, value)?;

        let name = reader.required_with("name", "name", MemoName::parse_strict);
        let state = reader.required_with("state", "state", str::parse::<State>);
        let creator = reader.required_with("creator", "creator", UserName::parse_strict);
        let create_time = reader.required_timestamp("createTime", "create_time");
        let update_time = reader.required_timestamp("updateTime", "update_time");
        let display_time = reader.optional_timestamp("displayTime", "display_time");
        let content = reader.string_or_default("content", "content");
        let snippet = reader.string_or_default("snippet", "snippet");
        let visibility = reader.required_with("visibility", "visibility", str::parse::<Visibility>);
        let pinned = reader.bool_or_default("pinned", "pinned");
        let parent = reader.optional_with("parent", "parent", MemoName::parse_strict);

        let mut tags = BTreeSet::new();
        for (index, item) in reader.array("tags", "tags").iter().enumerate() {
            match item.as_str().map(validate_tag) {
                Some(Ok(tag)) => {
                    tags.insert(tag);
                }
                Some(Err(message)) => reader.violation(&format!("tags[{index}]"), message),
                None => reader.violation(&format!("tags[{index}]"), "expected a string"),
            }
        }

        let mut attachments = Vec::new();
        for (index, item) in reader.array("attachments", "attachments").iter().enumerate() {
            let raw = match item {
                Value::String(name) => Some(name.as_str()),
                Value::Object(object) => object.get("name").and_then(Value::as_str),
                _ => None,
            };
            match raw.map(AttachmentName::parse_strict) {
                Some(Ok(name)) => attachments.push(name),
                Some(Err(message)) => {
                    reader.violation(&format!("attachments[{index}].name"), message);
                }
                None => reader.violation(
                    &format!("attachments[{index}]"),
                    "expected an attachment name or object with a name",
                ),
            }
        }

        let location = decode_location(&mut reader);

        match (
            name,
            state,
            creator,
            create_time,
            update_time,
            display_time,
            visibility,
            parent,
            location,
        ) {
            (
                Some(name),
                Some(state),
                Some(creator),
                Some(create_time),
                Some(update_time),
                Ok(display_time),
                Some(visibility),
                Ok(parent),
                Ok(location),
            ) if reader.is_clean() => Ok(Self {
                name,
                state,
                creator,
                create_time,
                update_time,
                display_time,
                content,
                snippet,
                visibility,
                tags,
                pinned,
                attachments,
                parent,
                location,
            }),
            _ => Err(reader.into_error()),
        }
    }

    fn to_wire(&self) -> Value {
        let mut object = Map::new();
        object.insert("name".to_string(), json!(self.name));
        object.insert("state".to_string(), json!(self.state.as_str()));
        object.insert("creator".to_string(), json!(self.creator));
        object.insert("createTime".to_string(), timestamp_to_wire(&self.create_time));
        object.insert("updateTime".to_string(), timestamp_to_wire(&self.update_time));
        if let Some(display_time) = &self.display_time {
            object.insert("displayTime".to_string(), timestamp_to_wire(display_time));
        }
        object.insert("content".to_string(), json!(self.content));
        object.insert("snippet".to_string(), json!(self.snippet));
        object.insert("visibility".to_string(), json!(self.visibility.as_str()));
        object.insert("tags".to_string(), json!(self.tags));
        object.insert("pinned".to_string(), json!(self.pinned));
        object.insert(
            "attachments".to_string(),
            Value::Array(
                self.attachments
                    .iter()
                    .map(|name| json!({ "name": name }))
                    .collect(),
            ),
        );
        if let Some(parent) = &self.parent {
            object.insert("parent".to_string(), json!(parent));
        }
        if let Some(location) = &self.location {
            object.insert("location".to_string(), location.to_wire());
        }
        Value::Object(object)
    }
}

fn decode_location(reader: &mut FieldReader<'_>) -> Result<Option<Location>, ()> {
    let Some(object) = reader.object("location", "location")? else {
        return Ok(None);
    };
    let value = Value::Object(object.clone());
    let mut inner = FieldReader::new("location", &value).map_err(|_| ())?;
    let placeholder = inner.string_or_default("placeholder", "placeholder");
    let latitude = inner.optional_f64("latitude", "latitude");
    let longitude = inner.optional_f64("longitude", "longitude");

    let mut errors = inner.into_error();
    let location = match (latitude, longitude) {
        (Ok(latitude), Ok(longitude)) => Some(Location {
            placeholder,
            latitude: latitude.unwrap_or_default(),
            longitude: longitude.unwrap_or_default(),
        }),
        _ => None,
    };
    if let Some(location) = &location {
        location.check("location", &mut errors);
    }

    let failed = !errors.is_empty();
    for violation in errors.violations {
        let field = if violation.field.starts_with("location") {
            violation.field
        } else {
            format!("location.{}", violation.field)
        };
        reader.violation(&field, violation.message);
    }
    if failed {
        Err(())
    } else {
        Ok(location)
    }
}

/// One page of memo search results.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct MemoPage {
    pub memos: Vec<Memo>,
    /// Token for the next page; `None` on the last page.
    pub next_page_token: Option<String>,
}

fn tag_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| Regex::new(r"#([^\s#]+)").expect("Invalid regex"))
}

/// Validate a tag: non-empty, no whitespace, no `#`. A leading `#` is stripped.
pub fn validate_tag(raw: &str) -> Result<String, String> {
    let tag = raw.trim();
    let tag = tag.strip_prefix('#').unwrap_or(tag);
    if tag.is_empty() {
        return Err("tag must not be empty".to_string());
    }
    if tag.chars().any(|c| c.is_whitespace() || c == '#') {
        return Err(format!("tag '{tag}' must not contain whitespace or '#'"));
    }
    Ok(tag.to_string())
}

/// Extract `#tags` from memo content, preserving case and deduplicating.
///
/// # Examples
///
/// ```
/// use memos_client::models::extract_tags;
///
/// let tags = extract_tags("Hello #world this is #Rust-lang");
/// assert!(tags.contains("world"));
/// assert!(tags.contains("Rust-lang"));
/// ```
#[must_use]
pub fn extract_tags(text: &str) -> HashSet<String> {
    tag_pattern()
        .captures_iter(text)
        .map(|cap| cap[1].to_string())
        .collect()
}
