//! Caller-side request types for memo creation and update.

use chrono::{DateTime, Utc};
use serde_json::{json, Map, Value};

use crate::error::ValidationError;
use crate::models::{
    extract_tags, validate_tag, AttachmentName, Location, MemoName, State, Visibility,
};

/// A memo to create.
#[derive(Debug, Clone, PartialEq)]
pub struct CreateMemo {
    pub content: String,
    pub visibility: Visibility,
    /// Appended to the content as `#tag` when not already present.
    pub tags: Vec<String>,
    /// Attachment names or bare ids to link after creation.
    pub attachments: Vec<String>,
    pub location: Option<Location>,
    pub display_time: Option<DateTime<Utc>>,
    /// Client-chosen memo id.
    pub memo_id: Option<String>,
}

impl CreateMemo {
    pub fn new(content: impl Into<String>) -> Self {
        Self {
            content: content.into(),
            visibility: Visibility::Private,
            tags: Vec::new(),
            attachments: Vec::new(),
            location: None,
            display_time: None,
            memo_id: None,
        }
    }

    #[must_use]
    pub const fn visibility(mut self, visibility: Visibility) -> Self {
        self.visibility = visibility;
        self
    }

    #[must_use]
    pub fn tag(mut self, tag: impl Into<String>) -> Self {
        self.tags.push(tag.into());
        self
    }

    #[must_use]
    pub fn attachment(mut self, name: impl Into<String>) -> Self {
        self.attachments.push(name.into());
        self
    }

    #[must_use]
    pub fn location(mut self, location: Location) -> Self {
        self.location = Some(location);
        self
    }

    #[must_use]
    pub const fn display_time(mut self, display_time: DateTime<Utc>) -> Self {
        self.display_time = Some(display_time);
        self
    }

    #[must_use]
    pub fn memo_id(mut self, memo_id: impl Into<String>) -> Self {
        self.memo_id = Some(memo_id.into());
        self
    }

    /// Check every field and build the request body plus the attachment
    /// names to link afterwards.
    pub(crate) fn prepare(&self) -> Result<(Value, Vec<AttachmentName>), ValidationError> {
        let mut errors = ValidationError::new("create_memo request");

        if self.content.trim().is_empty() {
            errors.push("content", "must not be empty");
        }
        let tags = collect_tags(&self.tags, &mut errors);
        let attachments = self
            .attachments
            .iter()
            .enumerate()
            .filter_map(|(index, raw)| match AttachmentName::parse(raw) {
                Ok(name) => Some(name),
                Err(error) => {
                    for violation in error.violations {
                        errors.push(format!("attachments[{index}]"), violation.message);
                    }
                    None
                }
            })
            .collect::<Vec<_>>();
        if let Some(location) = &self.location {
            location.check("location", &mut errors);
        }
        let memo_id = match &self.memo_id {
            Some(raw) => match MemoName::parse(raw) {
                Ok(name) => Some(name.id().to_string()),
                Err(error) => {
                    for violation in error.violations {
                        errors.push("memo_id", violation.message);
                    }
                    None
                }
            },
            None => None,
        };
        errors.into_result()?;

        let mut memo = Map::new();
        memo.insert(
            "content".to_string(),
            json!(content_with_tags(&self.content, &tags)),
        );
        memo.insert("visibility".to_string(), json!(self.visibility.as_str()));
        if let Some(display_time) = &self.display_time {
            memo.insert(
                "displayTime".to_string(),
                crate::models::timestamp_to_wire(display_time),
            );
        }
        if let Some(location) = &self.location {
            memo.insert("location".to_string(), location.to_wire());
        }

        let mut body = Map::new();
        body.insert("memo".to_string(), Value::Object(memo));
        if let Some(memo_id) = memo_id {
            body.insert("memoId".to_string(), json!(memo_id));
        }
        Ok((Value::Object(body), attachments))
    }
}

/// Fields to change on an existing memo. Unset fields are left alone.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct MemoUpdate {
    pub content: Option<String>,
    /// Appended to the new content; requires `content`.
    pub tags: Vec<String>,
    pub visibility: Option<Visibility>,
    pub state: Option<State>,
    pub pinned: Option<bool>,
    pub location: Option<Location>,
    pub display_time: Option<DateTime<Utc>>,
}

impl MemoUpdate {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn content(mut self, content: impl Into<String>) -> Self {
        self.content = Some(content.into());
        self
    }

    #[must_use]
    pub fn tag(mut self, tag: impl Into<String>) -> Self {
        self.tags.push(tag.into());
        self
    }

    #[must_use]
    pub const fn visibility(mut self, visibility: Visibility) -> Self {
        self.visibility = Some(visibility);
        self
    }

    #[must_use]
    pub const fn state(mut self, state: State) -> Self {
        self.state = Some(state);
        self
    }

    #[must_use]
    pub const fn pinned(mut self, pinned: bool) -> Self {
        self.pinned = Some(pinned);
        self
    }

    #[must_use]
    pub fn location(mut self, location: Location) -> Self {
        self.location = Some(location);
        self
    }

    #[must_use]
    pub const fn display_time(mut self, display_time: DateTime<Utc>) -> Self {
        self.display_time = Some(display_time);
        self
    }

    /// Build the PATCH body with its update mask.
    pub(crate) fn prepare(&self, name: &MemoName) -> Result<Value, ValidationError> {
        let mut errors = ValidationError::new("update_memo request");
        let tags = collect_tags(&self.tags, &mut errors);

        let mut memo = Map::new();
        let mut paths = Vec::new();
        memo.insert("name".to_string(), json!(name));

        match &self.content {
            Some(content) if content.trim().is_empty() => {
                errors.push("content", "must not be empty");
            }
            Some(content) => {
                memo.insert("content".to_string(), json!(content_with_tags(content, &tags)));
                paths.push("content");
            }
            None if !tags.is_empty() => {
                errors.push("tags", "tags are stored in the content, so content must be set");
            }
            None => {}
        }
        if let Some(visibility) = self.visibility {
            memo.insert("visibility".to_string(), json!(visibility.as_str()));
            paths.push("visibility");
        }
        if let Some(state) = self.state {
            memo.insert("state".to_string(), json!(state.as_str()));
            paths.push("state");
        }
        if let Some(pinned) = self.pinned {
            memo.insert("pinned".to_string(), json!(pinned));
            paths.push("pinned");
        }
        if let Some(location) = &self.location {
            location.check("location", &mut errors);
            memo.insert("location".to_string(), location.to_wire());
            paths.push("location");
        }
        if let Some(display_time) = &self.display_time {
            memo.insert(
                "displayTime".to_string(),
                crate::models::timestamp_to_wire(display_time),
            );
            paths.push("display_time");
        }

        if paths.is_empty() && errors.is_empty() {
            errors.push("update", "at least one field must be set");
        }
        errors.into_result()?;

        Ok(json!({
            "memo": memo,
            "updateMask": { "paths": paths },
        }))
    }
}

fn collect_tags(raw: &[String], errors: &mut ValidationError) -> Vec<String> {
    let mut tags: Vec<String> = Vec::with_capacity(raw.len());
    for (index, tag) in raw.iter().enumerate() {
        match validate_tag(tag) {
            Ok(tag) if !tags.contains(&tag) => tags.push(tag),
            Ok(_) => {}
            Err(message) => errors.push(format!("tags[{index}]"), message),
        }
    }
    tags
}

/// Append `#tag` for each tag the content does not already mention.
pub(crate) fn content_with_tags(content: &str, tags: &[String]) -> String {
    let present = extract_tags(content);
    let missing: Vec<String> = tags
        .iter()
        .filter(|tag| !present.contains(tag.as_str()))
        .map(|tag| format!("#{tag}"))
        .collect();
    if missing.is_empty() {
        content.to_string()
    } else {
        format!("{}\n\n{}", content.trim_end(), missing.join(" "))
    }
}
