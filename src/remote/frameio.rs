//! Frame.io API Client
//!
//! Thin wrapper over the v2 REST endpoints used for project, folder and
//! asset management. Handles rate-limit backoff the same way for every
//! request; everything else is reported to the caller as a [`RemoteError`].
//! Creates are never re-sent after a transport failure, since the first
//! attempt may have landed.

use async_trait::async_trait;
use reqwest::{Client, RequestBuilder, Response, StatusCode};
use serde::Deserialize;
use serde_json::json;
use std::time::Duration;

use super::{FileHandle, RemoteError, RemoteHierarchy, RemoteNode, RemoteNodeKind, RemoteProject};
use crate::config::FrameioConfig;
use crate::model::{NodeMetadata, ProjectInfo, RemoteId};

/// Failures `send` tries again
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Retry {
    /// Rate limits and transport failures
    Always,
    /// Rate limits only; the request was refused before it took effect
    RateLimitOnly,
}

/// Frame.io API client
pub struct FrameioClient {
    client: Client,
    config: FrameioConfig,
}

impl FrameioClient {
    pub fn new(config: FrameioConfig) -> Result<Self, RemoteError> {
        let client = Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()
            .map_err(|e| RemoteError::Transport(format!("Failed to create HTTP client: {}", e)))?;

        Ok(Self { client, config })
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.config.base_url.trim_end_matches('/'), path)
    }

    fn authorized(&self, builder: RequestBuilder) -> RequestBuilder {
        builder.header("Authorization", format!("Bearer {}", self.config.token))
    }

    /// Send with retry on 429 and on transport failures
    async fn send(&self, make: impl Fn() -> RequestBuilder) -> Result<Response, RemoteError> {
        self.send_with(Retry::Always, make).await
    }

    async fn send_with(
        &self,
        retry_on: Retry,
        make: impl Fn() -> RequestBuilder,
    ) -> Result<Response, RemoteError> {
        let mut retry_delay = Duration::from_millis(self.config.retry_base_delay_ms);
        let max_retries = self.config.max_retries;

        for retry in 0..=max_retries {
            if retry > 0 {
                tokio::time::sleep(retry_delay).await;
                retry_delay *= 2;
            }

            match make().send().await {
                Ok(r) if r.status() == StatusCode::TOO_MANY_REQUESTS => {
                    tracing::warn!("Rate limited, retry {}/{}", retry + 1, max_retries);
                    if retry == max_retries {
                        return Err(RemoteError::RateLimited(format!(
                            "Still rate limited after {} retries",
                            max_retries
                        )));
                    }
                }
                Ok(r) if r.status().is_success() => return Ok(r),
                Ok(r) => return Err(error_from_response(r).await),
                Err(e) => {
                    if retry_on == Retry::RateLimitOnly {
                        return Err(RemoteError::Transport(format!("Request failed: {}", e)));
                    }
                    if retry == max_retries {
                        return Err(RemoteError::Transport(format!(
                            "Request failed after retries: {}",
                            e
                        )));
                    }
                    tracing::warn!("Request failed ({}), retry {}/{}", e, retry + 1, max_retries);
                }
            }
        }

        Err(RemoteError::Transport("Max retries exceeded".to_string()))
    }

    async fn get_asset_page(
        &self,
        parent: &RemoteId,
        page: u32,
    ) -> Result<(Vec<AssetResponse>, u32), RemoteError> {
        let url = self.url(&format!("/assets/{}/children", parent));
        let page_size = self.config.page_size;
        let response = self
            .send(|| {
                self.authorized(self.client.get(&url))
                    .query(&[("page", page), ("page_size", page_size)])
            })
            .await?;

        let total_pages = response
            .headers()
            .get("total-pages")
            .and_then(|v| v.to_str().ok())
            .and_then(|v| v.parse::<u32>().ok())
            .unwrap_or(1);

        let assets: Vec<AssetResponse> = response.json().await?;
        Ok((assets, total_pages))
    }

    /// Refuse to create a second node with the same name under one parent.
    /// The service itself would accept the duplicate silently.
    async fn ensure_name_free(&self, name: &str, parent: &RemoteId) -> Result<(), RemoteError> {
        let children = self.list_children(parent).await?;
        if let Some(existing) = children.into_iter().find(|c| c.name == name) {
            return Err(RemoteError::Conflict {
                name: name.to_string(),
                existing: Some(existing.id),
            });
        }
        Ok(())
    }

    /// PUT the file to the pre-signed chunk URLs handed out at asset creation
    async fn upload_chunks(&self, file: &mut FileHandle, urls: &[String]) -> Result<(), RemoteError> {
        if urls.is_empty() {
            return Ok(());
        }
        let chunk_size = chunk_size(file.size(), urls.len());

        for (index, url) in urls.iter().enumerate() {
            let chunk = file.read_chunk(chunk_size).await?;
            tracing::debug!(
                "Uploading chunk {}/{} ({})",
                index + 1,
                urls.len(),
                crate::utils::format_size(chunk.len() as u64)
            );

            let mime_type = file.mime_type().to_string();
            self.send(|| {
                self.client
                    .put(url)
                    .header("Content-Type", mime_type.as_str())
                    .header("x-amz-acl", "private")
                    .body(chunk.clone())
            })
            .await?;
        }

        Ok(())
    }
}

#[async_trait]
impl RemoteHierarchy for FrameioClient {
    async fn whoami(&self) -> Result<String, RemoteError> {
        let url = self.url("/me");
        let me: MeResponse = self
            .send(|| self.authorized(self.client.get(&url)))
            .await?
            .json()
            .await?;
        Ok(me.email)
    }

    async fn create_project(&self, name: &str) -> Result<RemoteProject, RemoteError> {
        let team_id = self.config.team_id.as_deref().ok_or_else(|| {
            RemoteError::Api {
                status: 400,
                message: "FRAMEIO_TEAM_ID is required to create projects".to_string(),
            }
        })?;

        let url = self.url(&format!("/teams/{}/projects", team_id));
        let body = json!({ "name": name, "private": true });
        let project: ProjectResponse = self
            .send_with(Retry::RateLimitOnly, || {
                self.authorized(self.client.post(&url)).json(&body)
            })
            .await?
            .json()
            .await?;

        Ok(RemoteProject {
            id: RemoteId::new(project.id),
            root_asset_id: RemoteId::new(project.root_asset_id),
            name: project.name.unwrap_or_else(|| name.to_string()),
        })
    }

    async fn create_folder(&self, name: &str, parent: &RemoteId) -> Result<RemoteId, RemoteError> {
        self.ensure_name_free(name, parent).await?;

        let url = self.url(&format!("/assets/{}/children", parent));
        let body = json!({ "type": "folder", "name": name });
        let asset: AssetResponse = self
            .send_with(Retry::RateLimitOnly, || {
                self.authorized(self.client.post(&url)).json(&body)
            })
            .await?
            .json()
            .await?;

        Ok(RemoteId::new(asset.id))
    }

    async fn create_asset(
        &self,
        name: &str,
        parent: &RemoteId,
        mut file: FileHandle,
    ) -> Result<RemoteId, RemoteError> {
        self.ensure_name_free(name, parent).await?;

        let url = self.url(&format!("/assets/{}/children", parent));
        let body = json!({
            "type": "file",
            "name": name,
            "filetype": file.mime_type(),
            "filesize": file.size(),
        });
        let asset: AssetResponse = self
            .send_with(Retry::RateLimitOnly, || {
                self.authorized(self.client.post(&url)).json(&body)
            })
            .await?
            .json()
            .await?;

        self.upload_chunks(&mut file, &asset.upload_urls).await?;
        Ok(RemoteId::new(asset.id))
    }

    async fn list_children(&self, parent: &RemoteId) -> Result<Vec<RemoteNode>, RemoteError> {
        let mut nodes = Vec::new();
        let mut page = 1;

        loop {
            let (assets, total_pages) = self.get_asset_page(parent, page).await?;
            nodes.extend(assets.into_iter().map(|a| a.into_node(parent)));
            if page >= total_pages {
                break;
            }
            page += 1;
        }

        Ok(nodes)
    }

    async fn rename(&self, node: &RemoteId, name: &str) -> Result<(), RemoteError> {
        let url = self.url(&format!("/assets/{}", node));
        let body = json!({ "name": name });
        self.send(|| self.authorized(self.client.put(&url)).json(&body))
            .await?;
        Ok(())
    }

    async fn update_metadata(&self, node: &RemoteId, metadata: &NodeMetadata) -> Result<(), RemoteError> {
        let url = self.url(&format!("/assets/{}", node));
        let body = metadata_body(metadata);
        self.send(|| self.authorized(self.client.put(&url)).json(&body))
            .await?;
        Ok(())
    }

    async fn update_project(&self, project: &RemoteId, info: &ProjectInfo) -> Result<(), RemoteError> {
        let url = self.url(&format!("/projects/{}", project));
        let body = json!({
            "description": info.description,
            "genre": info.genre,
            "director": info.director,
            "producer": info.producer,
        });
        self.send(|| self.authorized(self.client.put(&url)).json(&body))
            .await?;
        Ok(())
    }
}

/// Asset update payload. Absent fields are sent as null so a cleared value
/// is cleared remotely too.
fn metadata_body(metadata: &NodeMetadata) -> serde_json::Value {
    json!({
        "description": metadata.description,
        "tags": metadata.tags,
        "properties": { "duration": metadata.duration },
    })
}

/// Bytes per chunk so that `parts` chunks cover `size` bytes
fn chunk_size(size: u64, parts: usize) -> usize {
    if parts == 0 {
        return size as usize;
    }
    size.div_ceil(parts as u64).max(1) as usize
}

async fn error_from_response(response: Response) -> RemoteError {
    let status = response.status();
    let text = response.text().await.unwrap_or_default();
    let message = serde_json::from_str::<ApiErrorResponse>(&text)
        .ok()
        .and_then(|e| e.message.or(e.errors.into_iter().next().and_then(|d| d.detail)))
        .unwrap_or(text);

    match status {
        StatusCode::CONFLICT => RemoteError::Conflict {
            name: message,
            existing: None,
        },
        StatusCode::TOO_MANY_REQUESTS => RemoteError::RateLimited(message),
        s if s.is_server_error() && message.is_empty() => RemoteError::Api {
            status: s.as_u16(),
            message: s.canonical_reason().unwrap_or("server error").to_string(),
        },
        s => RemoteError::Api {
            status: s.as_u16(),
            message,
        },
    }
}

// API response types

#[derive(Deserialize)]
struct MeResponse {
    email: String,
}

#[derive(Deserialize)]
struct ProjectResponse {
    id: String,
    root_asset_id: String,
    name: Option<String>,
}

#[derive(Deserialize)]
struct AssetResponse {
    id: String,
    #[serde(default)]
    name: String,
    #[serde(rename = "type", default)]
    asset_type: String,
    #[serde(default)]
    parent_id: Option<String>,
    #[serde(default)]
    upload_urls: Vec<String>,
}

impl AssetResponse {
    fn into_node(self, listed_under: &RemoteId) -> RemoteNode {
        let kind = match self.asset_type.as_str() {
            "folder" => RemoteNodeKind::Folder,
            "file" | "version_stack" => RemoteNodeKind::File,
            _ => RemoteNodeKind::Other,
        };
        RemoteNode {
            id: RemoteId::new(self.id),
            name: self.name,
            kind,
            parent: Some(
                self.parent_id
                    .map(RemoteId::new)
                    .unwrap_or_else(|| listed_under.clone()),
            ),
        }
    }
}

#[derive(Deserialize)]
struct ApiErrorResponse {
    message: Option<String>,
    #[serde(default)]
    errors: Vec<ApiErrorDetail>,
}

#[derive(Deserialize)]
struct ApiErrorDetail {
    detail: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;
    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    use tokio::net::{TcpListener, TcpStream};

    #[test]
    fn test_chunk_size_covers_file() {
        assert_eq!(chunk_size(10, 3), 4);
        assert_eq!(chunk_size(9, 3), 3);
        assert_eq!(chunk_size(0, 2), 1);
        assert_eq!(chunk_size(10, 0), 10);
    }

    #[test]
    fn test_asset_response_into_node() {
        let raw = r#"{"id": "a1", "name": "seq01", "type": "folder", "parent_id": "root"}"#;
        let asset: AssetResponse = serde_json::from_str(raw).unwrap();
        let node = asset.into_node(&RemoteId::from("elsewhere"));
        assert_eq!(node.kind, RemoteNodeKind::Folder);
        assert_eq!(node.parent, Some(RemoteId::from("root")));

        let raw = r#"{"id": "a2", "name": "take.mov", "type": "version_stack"}"#;
        let asset: AssetResponse = serde_json::from_str(raw).unwrap();
        let node = asset.into_node(&RemoteId::from("seq"));
        assert_eq!(node.kind, RemoteNodeKind::File);
        assert_eq!(node.parent, Some(RemoteId::from("seq")));
    }

    #[test]
    fn test_metadata_body() {
        let body = metadata_body(&NodeMetadata {
            description: Some("Rooftop chase".to_string()),
            tags: vec!["wide".to_string()],
            duration: Some(12.5),
        });
        assert_eq!(body["description"], "Rooftop chase");
        assert_eq!(body["tags"], serde_json::json!(["wide"]));
        assert_eq!(body["properties"]["duration"], 12.5);

        let cleared = metadata_body(&NodeMetadata::default());
        assert!(cleared["description"].is_null());
        assert!(cleared["properties"]["duration"].is_null());
    }

    /// Read one request: headers plus a Content-Length body
    async fn read_request(stream: &mut TcpStream) -> String {
        let mut data = Vec::new();
        let mut buf = [0u8; 1024];
        loop {
            let n = stream.read(&mut buf).await.unwrap();
            if n == 0 {
                break;
            }
            data.extend_from_slice(&buf[..n]);
            let text = String::from_utf8_lossy(&data);
            if let Some(end) = text.find("\r\n\r\n") {
                let length = text[..end]
                    .lines()
                    .filter_map(|line| line.split_once(':'))
                    .find(|(key, _)| key.eq_ignore_ascii_case("content-length"))
                    .and_then(|(_, value)| value.trim().parse::<usize>().ok())
                    .unwrap_or(0);
                if data.len() >= end + 4 + length {
                    break;
                }
            }
        }
        String::from_utf8_lossy(&data).to_string()
    }

    /// Local server answering listings with `[]` and dropping the connection
    /// on every POST after reading it
    async fn dropping_server(posts: Arc<AtomicUsize>) -> String {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            while let Ok((mut stream, _)) = listener.accept().await {
                let posts = posts.clone();
                tokio::spawn(async move {
                    let request = read_request(&mut stream).await;
                    if request.starts_with("POST") {
                        posts.fetch_add(1, Ordering::SeqCst);
                        return;
                    }
                    let response = "HTTP/1.1 200 OK\r\ncontent-type: application/json\r\ncontent-length: 2\r\nconnection: close\r\n\r\n[]";
                    let _ = stream.write_all(response.as_bytes()).await;
                    let _ = stream.shutdown().await;
                });
            }
        });
        format!("http://{}", addr)
    }

    #[tokio::test]
    async fn test_create_is_not_resent_after_dropped_connection() {
        let posts = Arc::new(AtomicUsize::new(0));
        let base_url = dropping_server(posts.clone()).await;
        let client = FrameioClient::new(FrameioConfig {
            token: "t".to_string(),
            base_url,
            max_retries: 3,
            retry_base_delay_ms: 1,
            timeout_secs: 5,
            ..Default::default()
        })
        .unwrap();

        let result = client.create_folder("seq01", &RemoteId::from("root")).await;

        assert!(matches!(result, Err(RemoteError::Transport(_))));
        assert_eq!(posts.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_url_joins_base() {
        let client = FrameioClient::new(FrameioConfig {
            token: "t".to_string(),
            base_url: "https://api.frame.io/v2/".to_string(),
            ..Default::default()
        })
        .unwrap();
        assert_eq!(client.url("/me"), "https://api.frame.io/v2/me");
    }
}
