//! Destination client: a Bluesky PDS spoken to over XRPC.

mod error;
mod types;

use std::time::Duration;

use async_trait::async_trait;
use reqwest::{Client, RequestBuilder};
use serde::de::DeserializeOwned;
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

pub use error::ClientError;
pub use types::{
    BlobRef, ByteSlice, CidLink, Embed, Facet, FacetFeature, ImageEmbed, ListRecordsResponse,
    ListedRecord, MediaEmbed, PostRecord, RecordEmbed, StrongRef,
};
use types::{
    CreateRecordRequest, CreateSessionRequest, DeleteRecordRequest, ResolveHandleResponse,
    Session, UploadBlobResponse,
};

use crate::config::Config;
use crate::constants::{LIST_PAGE_SIZE, POST_COLLECTION, USER_AGENT};

/// Operations the posting engine needs from the destination.
#[async_trait]
pub trait Destination: Send + Sync {
    /// Establish a session. Called once before any post is attempted.
    async fn authenticate(&self) -> Result<(), ClientError>;

    async fn create_post(&self, record: &PostRecord) -> Result<StrongRef, ClientError>;

    async fn upload_blob(&self, data: Vec<u8>, mime_type: &str) -> Result<BlobRef, ClientError>;

    /// Like [`Destination::upload_blob`] but allowed to take much longer.
    async fn upload_video(&self, data: Vec<u8>, mime_type: &str) -> Result<BlobRef, ClientError>;

    /// Resolve a handle to a DID. `Ok(None)` means the handle does not exist.
    async fn resolve_handle(&self, handle: &str) -> Result<Option<String>, ClientError>;
}

/// Authenticated client for one account on one PDS.
pub struct BlueskyClient {
    base_url: String,
    handle: String,
    password: String,
    http: Client,
    video_http: Client,
    session: Mutex<Option<Session>>,
}

impl BlueskyClient {
    /// Build a client from configuration. No request is made until first use.
    ///
    /// # Errors
    ///
    /// Returns an error if the HTTP client cannot be constructed.
    pub fn new(config: &Config) -> Result<Self, ClientError> {
        let build = |timeout: Duration| {
            Client::builder()
                .timeout(timeout)
                .user_agent(USER_AGENT)
                .build()
                .map_err(|e| ClientError::Network(format!("failed to create HTTP client: {e}")))
        };

        Ok(Self {
            base_url: config.pds_url.trim_end_matches('/').to_string(),
            handle: config.handle.clone(),
            password: config.password.clone(),
            http: build(config.request_timeout)?,
            video_http: build(config.video_timeout)?,
            session: Mutex::new(None),
        })
    }

    fn xrpc(&self, method: &str) -> String {
        format!("{}/xrpc/{method}", self.base_url)
    }

    async fn login(&self) -> Result<Session, ClientError> {
        debug!(handle = %self.handle, "Creating session");
        let request = self
            .http
            .post(self.xrpc("com.atproto.server.createSession"))
            .json(&CreateSessionRequest {
                identifier: &self.handle,
                password: &self.password,
            });

        match execute::<Session>(request).await {
            Ok(session) => {
                info!(handle = %self.handle, did = %session.did, "Authenticated");
                Ok(session)
            }
            // A rejected login is never worth retrying with the same credentials.
            Err(ClientError::Api { status, error, message }) if status < 500 => {
                Err(ClientError::Authentication(if message.is_empty() { error } else { message }))
            }
            Err(e) => Err(e),
        }
    }

    async fn refresh(&self, refresh_jwt: &str) -> Result<Session, ClientError> {
        let request = self
            .http
            .post(self.xrpc("com.atproto.server.refreshSession"))
            .bearer_auth(refresh_jwt);
        execute(request).await
    }

    /// Current session, logging in if there is none yet.
    async fn session(&self) -> Result<Session, ClientError> {
        let mut guard = self.session.lock().await;
        if let Some(session) = guard.as_ref() {
            return Ok(session.clone());
        }
        let session = self.login().await?;
        *guard = Some(session.clone());
        Ok(session)
    }

    /// Replace an expired session. Another task may already have done so.
    async fn renew(&self, stale: &Session) -> Result<Session, ClientError> {
        let mut guard = self.session.lock().await;
        if let Some(current) = guard.as_ref() {
            if current.access_jwt != stale.access_jwt {
                return Ok(current.clone());
            }
        }

        let session = match self.refresh(&stale.refresh_jwt).await {
            Ok(session) => {
                debug!("Session refreshed");
                session
            }
            Err(e) => {
                warn!(error = %e, "Session refresh failed, logging in again");
                self.login().await?
            }
        };
        *guard = Some(session.clone());
        Ok(session)
    }

    /// Run an authenticated request, replaying it once on an expired token.
    async fn send<T, F>(&self, build: F) -> Result<T, ClientError>
    where
        T: DeserializeOwned,
        F: Fn(&Session) -> RequestBuilder + Send + Sync,
    {
        let session = self.session().await?;
        match execute(build(&session).bearer_auth(&session.access_jwt)).await {
            Err(e) if e.is_expired_token() => {
                let session = self.renew(&session).await?;
                execute(build(&session).bearer_auth(&session.access_jwt)).await
            }
            other => other,
        }
    }

    async fn upload_with(
        &self,
        client: &Client,
        data: Vec<u8>,
        mime_type: &str,
    ) -> Result<BlobRef, ClientError> {
        let url = self.xrpc("com.atproto.repo.uploadBlob");
        let size = data.len();
        let response: UploadBlobResponse = self
            .send(|_| {
                client
                    .post(&url)
                    .header(reqwest::header::CONTENT_TYPE, mime_type)
                    .body(data.clone())
            })
            .await?;
        debug!(size, mime_type, cid = %response.blob.link.link, "Blob uploaded");
        Ok(response.blob)
    }

    /// DID of the authenticated account.
    ///
    /// # Errors
    ///
    /// Returns an error if no session can be established.
    pub async fn did(&self) -> Result<String, ClientError> {
        Ok(self.session().await?.did)
    }

    /// One page of this account's posts, newest first.
    ///
    /// # Errors
    ///
    /// Returns an error if the listing request fails.
    pub async fn list_posts(
        &self,
        cursor: Option<&str>,
    ) -> Result<ListRecordsResponse, ClientError> {
        let url = self.xrpc("com.atproto.repo.listRecords");
        let limit = LIST_PAGE_SIZE.to_string();
        self.send(|session| {
            let mut query = vec![
                ("repo", session.did.as_str()),
                ("collection", POST_COLLECTION),
                ("limit", limit.as_str()),
            ];
            if let Some(cursor) = cursor {
                query.push(("cursor", cursor));
            }
            self.http.get(&url).query(&query)
        })
        .await
    }

    /// Delete one of this account's posts by record key.
    ///
    /// # Errors
    ///
    /// Returns an error if the destination rejects the deletion.
    pub async fn delete_post(&self, rkey: &str) -> Result<(), ClientError> {
        let url = self.xrpc("com.atproto.repo.deleteRecord");
        let _: serde_json::Value = self
            .send(|session| {
                self.http.post(&url).json(&DeleteRecordRequest {
                    repo: &session.did,
                    collection: POST_COLLECTION,
                    rkey,
                })
            })
            .await?;
        debug!(rkey, "Post deleted");
        Ok(())
    }
}

#[async_trait]
impl Destination for BlueskyClient {
    async fn authenticate(&self) -> Result<(), ClientError> {
        self.session().await.map(|_| ())
    }

    async fn create_post(&self, record: &PostRecord) -> Result<StrongRef, ClientError> {
        let url = self.xrpc("com.atproto.repo.createRecord");
        let created: StrongRef = self
            .send(|session| {
                self.http.post(&url).json(&CreateRecordRequest {
                    repo: &session.did,
                    collection: POST_COLLECTION,
                    record,
                })
            })
            .await?;
        debug!(uri = %created.uri, "Record created");
        Ok(created)
    }

    async fn upload_blob(&self, data: Vec<u8>, mime_type: &str) -> Result<BlobRef, ClientError> {
        self.upload_with(&self.http, data, mime_type).await
    }

    async fn upload_video(&self, data: Vec<u8>, mime_type: &str) -> Result<BlobRef, ClientError> {
        self.upload_with(&self.video_http, data, mime_type).await
    }

    async fn resolve_handle(&self, handle: &str) -> Result<Option<String>, ClientError> {
        let request = self
            .http
            .get(self.xrpc("com.atproto.identity.resolveHandle"))
            .query(&[("handle", handle)]);

        match execute::<ResolveHandleResponse>(request).await {
            Ok(resolved) => Ok(Some(resolved.did)),
            Err(ClientError::Api { status: 400 | 404, .. }) => {
                debug!(handle, "Handle does not resolve");
                Ok(None)
            }
            Err(e) => Err(e),
        }
    }
}

/// Send a request and decode a JSON body, mapping failures to [`ClientError`].
async fn execute<T: DeserializeOwned>(request: RequestBuilder) -> Result<T, ClientError> {
    let response = request
        .send()
        .await
        .map_err(|e| ClientError::from_reqwest(&e))?;

    let status = response.status();
    let headers = response.headers().clone();
    let body = response
        .text()
        .await
        .map_err(|e| ClientError::from_reqwest(&e))?;

    if !status.is_success() {
        return Err(ClientError::from_status(status, &headers, &body));
    }

    // Some procedures answer with an empty body.
    let body = if body.trim().is_empty() { "null" } else { body.as_str() };
    serde_json::from_str(body).map_err(|e| ClientError::Decode(e.to_string()))
}
