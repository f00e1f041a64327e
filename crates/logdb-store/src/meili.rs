//! Meilisearch HTTP client.
//!
//! Speaks plain HTTP/1.1 through `hyper-util`'s pooled client. Every call is
//! bounded by the configured store timeout, which covers connect, write and
//! read.

use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use http_body_util::{BodyExt, Full};
use hyper::header::{HeaderValue, AUTHORIZATION, CONTENT_TYPE};
use hyper::{Method, Request, StatusCode, Uri};
use hyper_util::client::legacy::connect::HttpConnector;
use hyper_util::client::legacy::Client;
use hyper_util::rt::TokioExecutor;
use logdb_core::config::StoreConfig;
use logdb_core::{DestinationHandle, Record};
use serde::Deserialize;
use serde_json::json;

use crate::{DocumentStore, StoreError};

const INDEX_NOT_FOUND: &str = "index_not_found";
const PAGE_SIZE: usize = 100;

/// [`DocumentStore`] backed by a Meilisearch server.
#[derive(Clone)]
pub struct MeiliClient {
    base: String,
    auth: Option<HeaderValue>,
    timeout: Duration,
    http: Client<HttpConnector, Full<Bytes>>,
}

impl std::fmt::Debug for MeiliClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MeiliClient")
            .field("base", &self.base)
            .field("timeout", &self.timeout)
            .finish_non_exhaustive()
    }
}

impl MeiliClient {
    pub fn new(config: &StoreConfig) -> Result<Self, StoreError> {
        let base = config.url.trim_end_matches('/').to_string();
        let uri: Uri = base.parse().map_err(|e: hyper::http::uri::InvalidUri| {
            StoreError::InvalidUrl {
                url: config.url.clone(),
                reason: e.to_string(),
            }
        })?;
        if uri.scheme_str() != Some("http") || uri.host().is_none() {
            return Err(StoreError::InvalidUrl {
                url: config.url.clone(),
                reason: "expected http://host[:port]".to_string(),
            });
        }

        let auth = config
            .api_key()
            .map(|key| {
                HeaderValue::from_str(&format!("Bearer {key}")).map_err(|e| {
                    StoreError::InvalidUrl {
                        url: config.url.clone(),
                        reason: format!("api key is not a valid header value: {e}"),
                    }
                })
            })
            .transpose()?;

        let timeout = config.timeout();
        let mut connector = HttpConnector::new();
        connector.set_connect_timeout(Some(timeout));
        let http = Client::builder(TokioExecutor::new()).build(connector);

        Ok(Self {
            base,
            auth,
            timeout,
            http,
        })
    }

    /// Issue one request and collect the full response body.
    async fn send(
        &self,
        method: Method,
        path: &str,
        body: Option<Vec<u8>>,
    ) -> Result<(StatusCode, Bytes), StoreError> {
        let uri = format!("{}{}", self.base, path);
        let mut builder = Request::builder()
            .method(method)
            .uri(&uri)
            .header(CONTENT_TYPE, "application/json");
        if let Some(auth) = &self.auth {
            builder = builder.header(AUTHORIZATION, auth.clone());
        }
        let request = builder
            .body(Full::new(Bytes::from(body.unwrap_or_default())))
            .map_err(|e| StoreError::Transport(e.to_string()))?;

        let exchange = async {
            let response = self
                .http
                .request(request)
                .await
                .map_err(|e| StoreError::Transport(e.to_string()))?;
            let status = response.status();
            let body = response
                .into_body()
                .collect()
                .await
                .map_err(|e| StoreError::Transport(e.to_string()))?
                .to_bytes();
            Ok::<_, StoreError>((status, body))
        };

        let (status, body) = tokio::time::timeout(self.timeout, exchange)
            .await
            .map_err(|_| StoreError::Timeout(self.timeout))??;
        tracing::trace!(%uri, status = status.as_u16(), "store call");
        Ok((status, body))
    }

    async fn send_json(
        &self,
        method: Method,
        path: &str,
        body: &impl serde::Serialize,
    ) -> Result<(StatusCode, Bytes), StoreError> {
        let body =
            serde_json::to_vec(body).map_err(|e| StoreError::InvalidResponse(e.to_string()))?;
        self.send(method, path, Some(body)).await
    }
}

#[async_trait]
impl DocumentStore for MeiliClient {
    async fn list_indexes(&self) -> Result<Vec<DestinationHandle>, StoreError> {
        let mut handles = Vec::new();
        loop {
            let path = format!("/indexes?offset={}&limit={PAGE_SIZE}", handles.len());
            let (status, body) = self.send(Method::GET, &path, None).await?;
            if !status.is_success() {
                return Err(api_error(status, &body));
            }
            let page: IndexList = parse(&body)?;
            let (results, total) = match page {
                IndexList::Paged { results, total } => (results, total),
                IndexList::Plain(results) => {
                    let total = results.len();
                    (results, Some(total))
                }
            };
            let fetched = results.len();
            handles.extend(results.into_iter().map(DestinationHandle::with_default_name));
            let done = match total {
                Some(total) => handles.len() >= total,
                None => fetched < PAGE_SIZE,
            };
            if done || fetched == 0 {
                return Ok(handles);
            }
        }
    }

    async fn get_index(&self, uid: &str) -> Result<DestinationHandle, StoreError> {
        let (status, body) = self
            .send(Method::GET, &format!("/indexes/{uid}"), None)
            .await?;
        if status.is_success() {
            return parse::<DestinationHandle>(&body).map(DestinationHandle::with_default_name);
        }
        if status == StatusCode::NOT_FOUND {
            if let Ok(err) = serde_json::from_slice::<ErrorBody>(&body) {
                if err.code.as_deref().unwrap_or(INDEX_NOT_FOUND) == INDEX_NOT_FOUND {
                    return Err(StoreError::IndexNotFound {
                        uid: uid.to_string(),
                    });
                }
            }
        }
        Err(api_error(status, &body))
    }

    async fn create_index(
        &self,
        uid: &str,
        primary_key: &str,
    ) -> Result<DestinationHandle, StoreError> {
        let (status, body) = self
            .send_json(
                Method::POST,
                "/indexes",
                &json!({ "uid": uid, "primaryKey": primary_key }),
            )
            .await?;
        if !status.is_success() {
            return Err(api_error(status, &body));
        }
        // Older servers answer with the index, newer ones with an enqueued task.
        let handle = serde_json::from_slice::<DestinationHandle>(&body)
            .ok()
            .filter(|handle| handle.uid == uid)
            .map(DestinationHandle::with_default_name)
            .unwrap_or_else(|| {
                let mut handle = DestinationHandle::new(uid);
                handle.primary_key = Some(primary_key.to_string());
                handle
            });
        Ok(handle)
    }

    async fn add_or_replace_documents(
        &self,
        uid: &str,
        documents: &[Record],
    ) -> Result<(), StoreError> {
        let (status, body) = self
            .send_json(Method::POST, &format!("/indexes/{uid}/documents"), &documents)
            .await?;
        if status.is_success() {
            Ok(())
        } else {
            Err(api_error(status, &body))
        }
    }

    async fn health(&self) -> Result<(), StoreError> {
        let (status, body) = self.send(Method::GET, "/health", None).await?;
        if status.is_success() {
            Ok(())
        } else {
            Err(api_error(status, &body))
        }
    }
}

// ---------------------------------------------------------------------------
// Wire shapes
// ---------------------------------------------------------------------------

#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum IndexList {
    Paged {
        results: Vec<DestinationHandle>,
        #[serde(default)]
        total: Option<usize>,
    },
    Plain(Vec<DestinationHandle>),
}

#[derive(Debug, Deserialize)]
struct ErrorBody {
    #[serde(default)]
    message: String,
    #[serde(default)]
    code: Option<String>,
}

fn parse<T: serde::de::DeserializeOwned>(body: &[u8]) -> Result<T, StoreError> {
    serde_json::from_slice(body).map_err(|e| StoreError::InvalidResponse(e.to_string()))
}

fn api_error(status: StatusCode, body: &[u8]) -> StoreError {
    let (message, code) = match serde_json::from_slice::<ErrorBody>(body) {
        Ok(err) if !err.message.is_empty() => (err.message, err.code),
        Ok(err) => (status.to_string(), err.code),
        Err(_) if body.is_empty() => (status.to_string(), None),
        Err(_) => (String::from_utf8_lossy(body).into_owned(), None),
    };
    StoreError::Api {
        status: status.as_u16(),
        code,
        message,
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
