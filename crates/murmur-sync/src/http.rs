//! REST implementation of [`MessageBackend`].
//!
//! | call              | route                                   |
//! |-------------------|-----------------------------------------|
//! | insert            | `POST   /rooms/{room}/messages`          |
//! | edit              | `PATCH  /messages/{id}`                  |
//! | delete            | `DELETE /messages/{id}`                  |
//! | add reaction      | `POST   /messages/{id}/reactions`        |
//! | remove reaction   | `DELETE /messages/{id}/reactions`        |
//! | history           | `GET    /rooms/{room}/messages?limit=&before=` |

use async_trait::async_trait;
use chrono::{DateTime, SecondsFormat, Utc};
use reqwest::{Client, Method, RequestBuilder, Response, Url};
use serde::de::DeserializeOwned;
use tracing::{debug, warn};

use murmur_types::api::{
    DeleteMessageRequest, EditMessageRequest, HistoryQuery, PersistResponse, ReactionRequest,
};
use murmur_types::{ContentType, Message};

use crate::backend::MessageBackend;
use crate::error::{Result, SyncError};

#[derive(Clone)]
pub struct HttpBackend {
    client: Client,
    base: Url,
    token: String,
}

impl HttpBackend {
    pub fn new(base_url: &str, token: impl Into<String>) -> Result<Self> {
        let base = Url::parse(base_url)
            .map_err(|e| SyncError::Config(format!("invalid API url {}: {}", base_url, e)))?;
        if base.cannot_be_a_base() {
            return Err(SyncError::Config(format!("API url {} cannot be a base", base_url)));
        }
        Ok(Self {
            client: Client::new(),
            base,
            token: token.into(),
        })
    }

    fn url(&self, segments: &[&str]) -> Result<Url> {
        let mut url = self.base.clone();
        url.path_segments_mut()
            .map_err(|_| SyncError::Config(format!("API url {} cannot be a base", self.base)))?
            .pop_if_empty()
            .extend(segments);
        Ok(url)
    }

    fn request(&self, method: Method, url: Url) -> RequestBuilder {
        self.client.request(method, url).bearer_auth(&self.token)
    }

    async fn persist(&self, request: RequestBuilder) -> Result<PersistResponse> {
        let response = request.send().await?;
        decode(response).await
    }
}

/// Non-2xx statuses are backend errors carrying the body text.
async fn decode<T: DeserializeOwned>(response: Response) -> Result<T> {
    let status = response.status();
    if !status.is_success() {
        let body = response.text().await.unwrap_or_default();
        warn!(%status, "backend request failed");
        return Err(SyncError::Backend(format!("{}: {}", status, body)));
    }
    let bytes = response.bytes().await?;
    Ok(serde_json::from_slice(&bytes)?)
}

#[async_trait]
impl MessageBackend for HttpBackend {
    async fn insert_message(&self, message: &Message) -> Result<PersistResponse> {
        let url = self.url(&["rooms", &message.room_id, "messages"])?;
        debug!(room_id = %message.room_id, temp_id = ?message.temp_id, "POST message");
        self.persist(self.request(Method::POST, url).json(message)).await
    }

    async fn edit_message(&self, id: &str, content: &str) -> Result<PersistResponse> {
        let url = self.url(&["messages", id])?;
        let body = EditMessageRequest {
            content: content.to_string(),
        };
        self.persist(self.request(Method::PATCH, url).json(&body)).await
    }

    async fn delete_message(
        &self,
        id: &str,
        content_type: ContentType,
        content: &str,
    ) -> Result<PersistResponse> {
        let url = self.url(&["messages", id])?;
        let body = DeleteMessageRequest {
            content_type,
            content: content.to_string(),
        };
        self.persist(self.request(Method::DELETE, url).json(&body)).await
    }

    async fn add_reaction(&self, id: &str, user_id: &str, emoji: &str) -> Result<PersistResponse> {
        let url = self.url(&["messages", id, "reactions"])?;
        let body = ReactionRequest {
            user_id: user_id.to_string(),
            emoji: emoji.to_string(),
        };
        self.persist(self.request(Method::POST, url).json(&body)).await
    }

    async fn remove_reaction(&self, id: &str, user_id: &str, emoji: &str) -> Result<PersistResponse> {
        let url = self.url(&["messages", id, "reactions"])?;
        let body = ReactionRequest {
            user_id: user_id.to_string(),
            emoji: emoji.to_string(),
        };
        self.persist(self.request(Method::DELETE, url).json(&body)).await
    }

    async fn fetch_history(
        &self,
        room_id: &str,
        before: Option<DateTime<Utc>>,
        limit: u32,
    ) -> Result<Vec<Message>> {
        let url = self.url(&["rooms", room_id, "messages"])?;
        let query = HistoryQuery {
            limit,
            before: before.map(|ts| ts.to_rfc3339_opts(SecondsFormat::Micros, true)),
        };
        debug!(room_id, limit, before = ?query.before, "GET history");
        let response = self.request(Method::GET, url).query(&query).send().await?;
        decode(response).await
    }
}
