//! memos-client - Client library for the Memos note-taking API
//!
//! This crate contains the authenticated request pipeline (credential
//! storage, token acquisition, retry/backoff, typed decoding) and the
//! `MemosClient` façade for memos, attachments and users.

pub mod auth;
pub mod config;
pub mod error;
pub mod models;
pub mod service;
pub mod transport;
pub mod util;

pub use auth::{AuthManager, Credential, CredentialStore, SessionToken, SsoCredentials};
pub use config::{BatchMode, ClientConfig, ClientConfigBuilder};
pub use error::{Error, FieldViolation, Result, ValidationError};
pub use models::{
    Attachment, AttachmentName, Location, Memo, MemoName, MemoPage, Role, SearchFilter,
    SortOrder, State, User, UserName, Visibility,
};
pub use service::{BatchItem, BatchOutcome, BatchReport, CreateMemo, MemoUpdate, MemosClient};
pub use transport::retry::{RetryMode, RetryPolicy};
pub use transport::upload::{AttachmentUpload, UploadSource};
