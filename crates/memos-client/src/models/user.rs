//! User model

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde_json::{json, Value};

use crate::error::ValidationError;

use super::names::UserName;
use super::{timestamp_to_wire, FieldReader, WireModel};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Role {
    Host,
    Admin,
    User,
}

impl Role {
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Host => "HOST",
            Self::Admin => "ADMIN",
            Self::User => "USER",
        }
    }
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Role {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "HOST" => Ok(Self::Host),
            "ADMIN" => Ok(Self::Admin),
            "USER" => Ok(Self::User),
            other => Err(format!(
                "unknown role '{other}' (expected HOST, ADMIN or USER)"
            )),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct User {
    pub name: UserName,
    pub username: String,
    pub email: String,
    pub nickname: String,
    pub avatar_url: String,
    pub description: String,
    pub role: Role,
    pub create_time: DateTime<Utc>,
    pub update_time: DateTime<Utc>,
}

impl User {
    /// Nickname, falling back to the username.
    #[must_use]
    pub fn display_name(&self) -> &str {
        if self.nickname.is_empty() {
            &self.username
        } else {
            &self.nickname
        }
    }

    #[must_use]
    pub const fn is_admin(&self) -> bool {
        matches!(self.role, Role::Host | Role::Admin)
    }
}

impl WireModel for User {
    const KIND: &'static str = "user";

    fn from_wire(value: &Value) -> Result<Self, ValidationError> {
        let mut reader = FieldReader::new(Self::KIND, value)?;

        let name = reader.required_with("name", "name", UserName::parse_strict);
        let username = reader.required_with("username", "username", |raw| {
            let trimmed = raw.trim();
            if trimmed.is_empty() {
                Err("username must not be empty".to_string())
            } else {
                Ok(trimmed.to_string())
            }
        });
        let email = reader.string_or_default("email", "email").trim().to_string();
        if !email.is_empty() && !email.contains('@') {
            reader.violation("email", format!("'{email}' is not an email address"));
        }
        let nickname = reader.string_or_default("nickname", "nickname");
        let avatar_url = reader.string_or_default("avatarUrl", "avatar_url");
        let description = reader.string_or_default("description", "description");
        let role = reader.required_with("role", "role", str::parse::<Role>);
        let create_time = reader.required_timestamp("createTime", "create_time");
        let update_time = reader.required_timestamp("updateTime", "update_time");

        match (name, username, role, create_time, update_time) {
            (Some(name), Some(username), Some(role), Some(create_time), Some(update_time))
                if reader.is_clean() =>
            {
                Ok(Self {
                    name,
                    username,
                    email,
                    nickname,
                    avatar_url,
                    description,
                    role,
                    create_time,
                    update_time,
                })
            }
            _ => Err(reader.into_error()),
        }
    }

    fn to_wire(&self) -> Value {
        json!({
            "name": self.name,
            "username": self.username,
            "email": self.email,
            "nickname": self.nickname,
            "avatarUrl": self.avatar_url,
            "description": self.description,
            "role": self.role.as_str(),
            "createTime": timestamp_to_wire(&self.create_time),
            "updateTime": timestamp_to_wire(&self.update_time),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{decode, encode};
    use chrono::TimeZone;

    fn sample() -> User {
        User {
            name: UserName::parse("1").unwrap(),
            username: "steven".to_string(),
            email: "steven@example.com".to_string(),
            nickname: String::new(),
            avatar_url: String::new(),
            description: "host".to_string(),
            role: Role::Host,
            create_time: Utc.with_ymd_and_hms(2023, 1, 1, 0, 0, 0).unwrap(),
            update_time: Utc.with_ymd_and_hms(2023, 1, 2, 0, 0, 0).unwrap(),
        }
    }

    #[test]
    fn user_round_trips() {
        let user = sample();
        let decoded: User = decode(&encode(&user)).unwrap();
        assert_eq!(decoded, user);
    }

    #[test]
    fn display_name_falls_back_to_username() {
        let mut user = sample();
        assert_eq!(user.display_name(), "steven");
        user.nickname = "Steve".to_string();
        assert_eq!(user.display_name(), "Steve");
        assert!(user.is_admin());
    }

    #[test]
    fn rejects_bad_email_and_role() {
        let mut wire = sample().to_wire();
        wire["email"] = json!("not-an-email");
        wire["role"] = json!("ROLE_UNSPECIFIED");
        let error = User::from_wire(&wire).unwrap_err();
        assert!(error.has_field("email"));
        assert!(error.has_field("role"));
    }
}
