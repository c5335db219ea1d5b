//! Search filter for memo listing.
//!
//! Every recognized field is explicit. Building a filter from key/value pairs
//! or JSON rejects unknown keys instead of ignoring them.

use chrono::{DateTime, Utc};
use serde::Deserialize;

use crate::error::ValidationError;

use super::memo::{validate_tag, State, Visibility};
use super::names::UserName;

const DEFAULT_PAGE_SIZE: u32 = 50;
const MAX_PAGE_SIZE: u32 = 1000;

/// Result ordering.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SortOrder {
    #[default]
    DisplayTimeDesc,
    DisplayTimeAsc,
    CreateTimeDesc,
    CreateTimeAsc,
    UpdateTimeDesc,
    UpdateTimeAsc,
}

impl SortOrder {
    #[must_use]
    pub const fn as_query(self) -> &'static str {
        match self {
            Self::DisplayTimeDesc => "display_time desc",
            Self::DisplayTimeAsc => "display_time asc",
            Self::CreateTimeDesc => "create_time desc",
            Self::CreateTimeAsc => "create_time asc",
            Self::UpdateTimeDesc => "update_time desc",
            Self::UpdateTimeAsc => "update_time asc",
        }
    }
}

/// Query descriptor for `search_memos`. Constructed per call.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(deny_unknown_fields, default)]
pub struct SearchFilter {
    /// Substring match on content.
    pub text: Option<String>,
    /// Memos carrying any of these tags.
    pub tags: Vec<String>,
    /// Creator, as `users/{id}` or a bare id.
    pub creator: Option<String>,
    pub visibility: Option<Visibility>,
    /// Inclusive lower bound on creation time.
    pub created_after: Option<DateTime<Utc>>,
    /// Exclusive upper bound on creation time.
    pub created_before: Option<DateTime<Utc>>,
    pub state: State,
    pub page_size: u32,
    pub page_token: Option<String>,
    pub order: SortOrder,
}

impl Default for SearchFilter {
    fn default() -> Self {
        Self {
            text: None,
            tags: Vec::new(),
            creator: None,
            visibility: None,
            created_after: None,
            created_before: None,
            state: State::Normal,
            page_size: DEFAULT_PAGE_SIZE,
            page_token: None,
            order: SortOrder::default(),
        }
    }
}

impl SearchFilter {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn text(mut self, text: impl Into<String>) -> Self {
        self.text = Some(text.into());
        self
    }

    #[must_use]
    pub fn tag(mut self, tag: impl Into<String>) -> Self {
        self.tags.push(tag.into());
        self
    }

    #[must_use]
    pub fn tags<I, T>(mut self, tags: I) -> Self
    where
        I: IntoIterator<Item = T>,
        T: Into<String>,
    {
        self.tags.extend(tags.into_iter().map(Into::into));
        self
    }

    #[must_use]
    pub fn creator(mut self, creator: impl Into<String>) -> Self {
        self.creator = Some(creator.into());
        self
    }

    #[must_use]
    pub const fn visibility(mut self, visibility: Visibility) -> Self {
        self.visibility = Some(visibility);
        self
    }

    #[must_use]
    pub const fn state(mut self, state: State) -> Self {
        self.state = state;
        self
    }

    /// Server timestamps have whole-second precision, so a fractional
    /// upper bound is rounded up to keep memos from its own second.
    #[must_use]
    pub const fn created_between(
        mut self,
        after: Option<DateTime<Utc>>,
        before: Option<DateTime<Utc>>,
    ) -> Self {
        self.created_after = after;
        self.created_before = before;
        self
    }

    #[must_use]
    pub const fn page_size(mut self, page_size: u32) -> Self {
        self.page_size = page_size;
        self
    }

    #[must_use]
    pub fn page_token(mut self, token: impl Into<String>) -> Self {
        self.page_token = Some(token.into());
        self
    }

    #[must_use]
    pub const fn order(mut self, order: SortOrder) -> Self {
        self.order = order;
        self
    }

    /// Build a filter from string key/value pairs, rejecting unknown keys.
    ///
    /// Recognized keys: `text`, `tag` (repeatable), `tags` (comma separated),
    /// `creator`, `visibility`, `state`, `created_after`, `created_before`,
    /// `page_size`, `page_token`, `order`.
    pub fn from_pairs<'a, I>(pairs: I) -> Result<Self, ValidationError>
    where
        I: IntoIterator<Item = (&'a str, &'a str)>,
    {
        let mut filter = Self::default();
        let mut errors = ValidationError::new("search filter");

        for (key, value) in pairs {
            let value = value.trim();
            match key {
                "text" => filter.text = Some(value.to_string()),
                "tag" => filter.tags.push(value.to_string()),
                "tags" => filter.tags.extend(
                    value
                        .split(',')
                        .map(str::trim)
                        .filter(|tag| !tag.is_empty())
                        .map(ToString::to_string),
                ),
                "creator" => filter.creator = Some(value.to_string()),
                "visibility" => match value.parse::<Visibility>() {
                    Ok(visibility) => filter.visibility = Some(visibility),
                    Err(message) => errors.push(key, message),
                },
                "state" => match value.parse::<State>() {
                    Ok(state) => filter.state = state,
                    Err(message) => errors.push(key, message),
                },
                "created_after" | "created_before" => match DateTime::parse_from_rfc3339(value) {
                    Ok(timestamp) => {
                        let timestamp = Some(timestamp.with_timezone(&Utc));
                        if key == "created_after" {
                            filter.created_after = timestamp;
                        } else {
                            filter.created_before = timestamp;
                        }
                    }
                    Err(error) => errors.push(key, format!("invalid RFC 3339 timestamp: {error}")),
                },
                "page_size" => match value.parse::<u32>() {
                    Ok(page_size) => filter.page_size = page_size,
                    Err(error) => errors.push(key, format!("invalid page size: {error}")),
                },
                "page_token" => filter.page_token = Some(value.to_string()),
                "order" => {
                    match serde_json::from_value::<SortOrder>(serde_json::Value::String(
                        value.to_string(),
                    )) {
                        Ok(order) => filter.order = order,
                        Err(error) => errors.push(key, error.to_string()),
                    }
                }
                unknown => errors.push(unknown, "unknown filter key"),
            }
        }

        if let Err(validation) = filter.validate() {
            errors.violations.extend(validation.violations);
        }
        errors.into_result()?;
        Ok(filter)
    }

    /// Check every field, reporting all problems at once.
    pub fn validate(&self) -> Result<(), ValidationError> {
        let mut errors = ValidationError::new("search filter");

        if self.text.as_deref().is_some_and(|text| text.trim().is_empty()) {
            errors.push("text", "text must not be blank");
        }
        for (index, tag) in self.tags.iter().enumerate() {
            if let Err(message) = validate_tag(tag) {
                errors.push(format!("tags[{index}]"), message);
            }
        }
        if let Some(creator) = &self.creator {
            if let Err(error) = UserName::parse(creator) {
                for violation in error.violations {
                    errors.push("creator", violation.message);
                }
            }
        }
        if let (Some(after), Some(before)) = (self.created_after, self.created_before) {
            if after >= before {
                errors.push("created_after", "created_after must be before created_before");
            }
        }
        if self.page_size == 0 || self.page_size > MAX_PAGE_SIZE {
            errors.push(
                "page_size",
                format!("page_size must be between 1 and {MAX_PAGE_SIZE}"),
            );
        }

        errors.into_result()
    }

    /// The `filter` expression sent to the server, if any condition is set.
    pub fn filter_expression(&self) -> Result<Option<String>, ValidationError> {
        self.validate()?;

        let mut clauses = Vec::new();
        if let Some(text) = &self.text {
            clauses.push(format!("content.contains(\"{}\")", escape(text.trim())));
        }
        if !self.tags.is_empty() {
            let tag_clauses = self
                .tags
                .iter()
                .filter_map(|tag| validate_tag(tag).ok())
                .map(|tag| format!("tags.any(\"{}\")", escape(&tag)))
                .collect::<Vec<_>>();
            clauses.push(format!("({})", tag_clauses.join(" || ")));
        }
        if let Some(creator) = &self.creator {
            if let Ok(creator) = UserName::parse(creator) {
                clauses.push(format!("creator == \"{}\"", escape(creator.as_str())));
            }
        }
        if let Some(visibility) = self.visibility {
            clauses.push(format!("visibility == \"{visibility}\""));
        }
        if let Some(after) = self.created_after {
            clauses.push(format!("created_ts >= {}", after.timestamp()));
        }
        if let Some(before) = self.created_before {
            clauses.push(format!("created_ts < {}", ceil_seconds(before)));
        }

        if clauses.is_empty() {
            Ok(None)
        } else {
            Ok(Some(clauses.join(" && ")))
        }
    }

    /// Query parameters for `GET /api/v1/memos`.
    pub fn to_query(&self) -> Result<Vec<(String, String)>, ValidationError> {
        let mut query = vec![
            ("pageSize".to_string(), self.page_size.to_string()),
            ("state".to_string(), self.state.to_string()),
            ("orderBy".to_string(), self.order.as_query().to_string()),
        ];
        if let Some(filter) = self.filter_expression()? {
            query.push(("filter".to_string(), filter));
        }
        if let Some(token) = self.page_token.as_deref().filter(|token| !token.is_empty()) {
            query.push(("pageToken".to_string(), token.to_string()));
        }
        Ok(query)
    }
}

fn ceil_seconds(value: DateTime<Utc>) -> i64 {
    if value.timestamp_subsec_nanos() > 0 {
        value.timestamp() + 1
    } else {
        value.timestamp()
    }
}

fn escape(value: &str) -> String {
    value.replace('\\', "\\\\").replace('"', "\\\"")
}
