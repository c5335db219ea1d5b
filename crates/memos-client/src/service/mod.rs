//! Typed façade over the Memos API.

mod batch;
mod request;

use std::sync::Arc;

use futures::stream::{self, StreamExt};
use serde_json::{json, Value};
use tokio::io::AsyncWrite;

use crate::auth::AuthManager;
use crate::config::{BatchMode, ClientConfig};
use crate::models::{
    decode_list, Attachment, AttachmentName, Memo, MemoName, MemoPage, SearchFilter, User,
    UserName, WireModel,
};
use crate::transport::retry::RetryMode;
use crate::transport::upload::AttachmentUpload;
use crate::transport::{build_http_client, ApiRequest, Transport};
use crate::{Error, Result};

pub use batch::{BatchItem, BatchOutcome, BatchReport};
pub use request::{CreateMemo, MemoUpdate};

/// Client for one Memos server and one credential.
///
/// Cloning is cheap; clones share the connection pool and session token.
#[derive(Debug, Clone)]
pub struct MemosClient {
    inner: Arc<ClientInner>,
}

#[derive(Debug)]
struct ClientInner {
    config: ClientConfig,
    auth: Arc<AuthManager>,
    transport: Transport,
}

impl MemosClient {
    pub fn new(config: ClientConfig) -> Result<Self> {
        let http = build_http_client(&config)?;
        let auth = Arc::new(AuthManager::new(&config, http.clone()));
        let transport = Transport::new(&config, http, Arc::clone(&auth));
        Ok(Self {
            inner: Arc::new(ClientInner {
                config,
                auth,
                transport,
            }),
        })
    }

    /// Build a client from `MEMOS_*` environment variables.
    pub fn from_env() -> Result<Self> {
        let config = ClientConfig::from_env()?.ok_or_else(|| {
            Error::Configuration("MEMOS_BASE_URL and a credential must be set".to_string())
        })?;
        Self::new(config)
    }

    #[must_use]
    pub fn config(&self) -> &ClientConfig {
        &self.inner.config
    }

    #[must_use]
    pub fn auth(&self) -> &AuthManager {
        &self.inner.auth
    }

    #[must_use]
    pub fn transport(&self) -> &Transport {
        &self.inner.transport
    }

    async fn fetch<T: WireModel>(&self, request: ApiRequest) -> Result<T> {
        let value = self.inner.transport.request(request).await?;
        Ok(T::from_wire(&value)?)
    }

    // Memos

    /// Search memos; one page per call.
    pub async fn search_memos(&self, filter: &SearchFilter) -> Result<MemoPage> {
        let query = filter.to_query()?;
        let value = self
            .inner
            .transport
            .request(ApiRequest::get("search_memos", "memos").query(query))
            .await?;
        decode_memo_page(&value)
    }

    pub async fn get_memo(&self, name: &str) -> Result<Memo> {
        let name = MemoName::parse(name)?;
        self.fetch(ApiRequest::get("get_memo", name.as_str()).resource(name.as_str()))
            .await
    }

    /// Create a memo, then link its attachments when any are given.
    ///
    /// When linking fails the memo still exists on the server; the error
    /// names it as its resource.
    pub async fn create_memo(&self, memo: CreateMemo) -> Result<Memo> {
        let (created, attachments) = self.post_memo(memo).await?;
        if attachments.is_empty() {
            return Ok(created);
        }

        self.link_attachments(&created.name, &attachments).await?;
        self.get_memo(created.name.as_str()).await
    }

    async fn post_memo(&self, memo: CreateMemo) -> Result<(Memo, Vec<AttachmentName>)> {
        let (body, attachments) = memo.prepare()?;
        let created: Memo = self
            .fetch(ApiRequest::post("create_memo", "memos").json(body))
            .await?;
        Ok((created, attachments))
    }

    async fn create_batch_item(&self, memo: CreateMemo) -> BatchOutcome {
        let (created, attachments) = match self.post_memo(memo).await {
            Ok(posted) => posted,
            Err(error) => return BatchOutcome::Failed(error),
        };
        if attachments.is_empty() {
            return BatchOutcome::Created(created.name);
        }
        match self.link_attachments(&created.name, &attachments).await {
            Ok(()) => BatchOutcome::Created(created.name),
            Err(error) => BatchOutcome::CreatedWithErrors {
                name: created.name,
                error,
            },
        }
    }

    pub async fn update_memo(&self, name: &str, update: &MemoUpdate) -> Result<Memo> {
        let name = MemoName::parse(name)?;
        let body = update.prepare(&name)?;
        self.fetch(
            ApiRequest::patch("update_memo", name.as_str())
                .json(body)
                .resource(name.as_str()),
        )
        .await
    }

    pub async fn delete_memo(&self, name: &str) -> Result<()> {
        let name = MemoName::parse(name)?;
        self.inner
            .transport
            .request(ApiRequest::delete("delete_memo", name.as_str()).resource(name.as_str()))
            .await?;
        Ok(())
    }

    /// Replace the full attachment set of a memo.
    pub async fn set_memo_attachments<S: AsRef<str>>(
        &self,
        memo: &str,
        attachments: &[S],
    ) -> Result<()> {
        let memo = MemoName::parse(memo)?;
        let names = attachments
            .iter()
            .map(|raw| AttachmentName::parse(raw.as_ref()))
            .collect::<std::result::Result<Vec<_>, _>>()?;
        self.link_attachments(&memo, &names).await
    }

    async fn link_attachments(&self, memo: &MemoName, attachments: &[AttachmentName]) -> Result<()> {
        let body = json!({
            "name": memo,
            "attachments": attachments
                .iter()
                .map(|name| json!({ "name": name }))
                .collect::<Vec<_>>(),
        });
        // Setting the complete list is idempotent.
        self.inner
            .transport
            .request(
                ApiRequest::patch("set_memo_attachments", format!("{memo}/attachments"))
                    .json(body)
                    .retry(RetryMode::Always)
                    .resource(memo.as_str()),
            )
            .await?;
        Ok(())
    }

    pub async fn list_memo_attachments(&self, memo: &str) -> Result<Vec<Attachment>> {
        let memo = MemoName::parse(memo)?;
        let value = self
            .inner
            .transport
            .request(
                ApiRequest::get("list_memo_attachments", format!("{memo}/attachments"))
                    .resource(memo.as_str()),
            )
            .await?;
        Ok(decode_list(&value, "attachments")?)
    }

    /// Create memos per the configured [`BatchMode`].
    ///
    /// Never fails as a whole; see [`BatchReport::into_result`].
    pub async fn create_memos_batch(&self, memos: Vec<CreateMemo>) -> BatchReport {
        let tasks = memos.into_iter().enumerate().map(move |(index, memo)| async move {
            let outcome = self.create_batch_item(memo).await;
            if let Some(error) = outcome.error() {
                tracing::warn!("Batch item {} failed: {}", index, error);
            }
            BatchItem { index, outcome }
        });

        let items = match self.inner.config.batch_mode {
            BatchMode::Sequential => {
                let mut items = Vec::new();
                for task in tasks {
                    items.push(task.await);
                }
                items
            }
            BatchMode::Concurrent { max_in_flight } => {
                stream::iter(tasks)
                    .buffered(max_in_flight.max(1))
                    .collect::<Vec<_>>()
                    .await
            }
        };
        BatchReport::new(items)
    }

    // Attachments

    pub async fn upload_attachment(&self, upload: AttachmentUpload) -> Result<Attachment> {
        upload.validate()?;
        let resource = upload.file_name().to_string();
        self.fetch(
            ApiRequest::post("upload_attachment", "attachments")
                .upload(upload)
                .resource(resource),
        )
        .await
    }

    pub async fn get_attachment(&self, name: &str) -> Result<Attachment> {
        let name = AttachmentName::parse(name)?;
        self.fetch(ApiRequest::get("get_attachment", name.as_str()).resource(name.as_str()))
            .await
    }

    pub async fn list_attachments(&self) -> Result<Vec<Attachment>> {
        let value = self
            .inner
            .transport
            .request(ApiRequest::get("list_attachments", "attachments"))
            .await?;
        Ok(decode_list(&value, "attachments")?)
    }

    /// Stream the attachment's file into `writer`; returns bytes written.
    pub async fn download_attachment<W>(
        &self,
        attachment: &Attachment,
        thumbnail: bool,
        writer: &mut W,
    ) -> Result<u64>
    where
        W: AsyncWrite + Unpin + ?Sized,
    {
        let query: &[(&str, &str)] = if thumbnail {
            &[("thumbnail", "true")]
        } else {
            &[]
        };
        self.inner
            .transport
            .download(
                &attachment.file_path(),
                query,
                attachment.name.as_str(),
                writer,
            )
            .await
    }

    pub async fn delete_attachment(&self, name: &str) -> Result<()> {
        let name = AttachmentName::parse(name)?;
        self.inner
            .transport
            .request(
                ApiRequest::delete("delete_attachment", name.as_str()).resource(name.as_str()),
            )
            .await?;
        Ok(())
    }

    // Users and session

    pub async fn get_user(&self, name: &str) -> Result<User> {
        let name = UserName::parse(name)?;
        self.fetch(ApiRequest::get("get_user", name.as_str()).resource(name.as_str()))
            .await
    }

    /// The user the current session belongs to.
    pub async fn current_user(&self) -> Result<User> {
        let value = self
            .inner
            .transport
            .request(ApiRequest::get("current_user", "auth/sessions/current"))
            .await?;
        let user = value.get("user").unwrap_or(&value);
        Ok(User::from_wire(user)?)
    }

    /// End the server session and clear the local token.
    pub async fn sign_out(&self) -> Result<()> {
        self.inner.auth.sign_out().await
    }

    /// Clear the session token; later calls on any clone fail.
    pub fn close(&self) {
        self.inner.auth.close();
        tracing::debug!("Closed client for {}", self.inner.config.base_url());
    }
}

fn decode_memo_page(value: &Value) -> Result<MemoPage> {
    let memos = decode_list(value, "memos")?;
    let next_page_token = value
        .get("nextPageToken")
        .or_else(|| value.get("next_page_token"))
        .and_then(Value::as_str)
        .filter(|token| !token.is_empty())
        .map(str::to_string);
    Ok(MemoPage {
        memos,
        next_page_token,
    })
}
