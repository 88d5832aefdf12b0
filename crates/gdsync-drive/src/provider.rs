//! DriveRemote - IRemoteDrive implementation for the Google Drive v3 API
//!
//! Wraps the [`DriveClient`] and maps the wire types from [`crate::api`]
//! onto the port contract. Every call goes through the retry-once policy;
//! paginated listings insert small delays between pages to stay clear of
//! rate-limit penalties.

use std::path::Path;
use std::time::Duration;

use anyhow::{Context, Result};
use reqwest::Method;
use tokio::io::AsyncWriteExt;
use tracing::{debug, warn};

use gdsync_core::domain::{ChangeToken, FileId, FileInfo};
use gdsync_core::ports::remote_drive::{ChangeBatch, IRemoteDrive, NewFile};

use crate::api::{
    ChangeListPage, DriveChangeResource, DriveFileResource, FileListPage, StartPageTokenResponse,
    FILE_FIELDS,
};
use crate::client::{try_twice, DriveClient};

/// Delay between pages of a folder-structure walk
const STRUCTURE_PAGE_DELAY: Duration = Duration::from_millis(100);

/// Delay between pages of a change-feed drain
const CHANGES_PAGE_DELAY: Duration = Duration::from_millis(500);

/// Page size requested from list endpoints
const PAGE_SIZE: u32 = 100;

/// Boundary for multipart/related upload bodies
const MULTIPART_BOUNDARY: &str = "gdsync_upload_boundary";

/// `IRemoteDrive` implementation backed by the Google Drive v3 REST API.
pub struct DriveRemote {
    client: DriveClient,
}

impl DriveRemote {
    /// Creates a new provider over the given client.
    pub fn new(client: DriveClient) -> Self {
        Self { client }
    }

    /// Streams `id`'s content into `dest`. Partial output is the caller's
    /// problem; [`IRemoteDrive::download_to`] removes it on error.
    async fn stream_to_file(&self, id: &FileId, dest: &Path) -> Result<()> {
        let request = self
            .client
            .request(Method::GET, &format!("/files/{id}"))
            .query(&[("alt", "media")]);
        let mut response = self.client.send_raw(request).await?;

        let mut file = tokio::fs::File::create(dest)
            .await
            .with_context(|| format!("Failed to create {}", dest.display()))?;

        let mut written: u64 = 0;
        while let Some(chunk) = response.chunk().await.context("Download stream failed")? {
            file.write_all(&chunk)
                .await
                .with_context(|| format!("Failed to write {}", dest.display()))?;
            written += chunk.len() as u64;
        }
        file.flush().await?;

        debug!(id = %id, dest = %dest.display(), bytes = written, "Download complete");
        Ok(())
    }
}

/// Builds a `multipart/related` body carrying JSON metadata plus content.
fn multipart_related_body(metadata: &serde_json::Value, content: &[u8]) -> Vec<u8> {
    let mut body = Vec::with_capacity(content.len() + 256);
    body.extend_from_slice(
        format!(
            "--{MULTIPART_BOUNDARY}\r\nContent-Type: application/json; charset=UTF-8\r\n\r\n{metadata}\r\n"
        )
        .as_bytes(),
    );
    body.extend_from_slice(
        format!("--{MULTIPART_BOUNDARY}\r\nContent-Type: application/octet-stream\r\n\r\n")
            .as_bytes(),
    );
    body.extend_from_slice(content);
    body.extend_from_slice(format!("\r\n--{MULTIPART_BOUNDARY}--\r\n").as_bytes());
    body
}

#[async_trait::async_trait]
impl IRemoteDrive for DriveRemote {
    async fn get_info(&self, id: &FileId) -> Result<FileInfo> {
        let resource: DriveFileResource = try_twice("files.get", || {
            let request = self
                .client
                .request(Method::GET, &format!("/files/{id}"))
                .query(&[("fields", FILE_FIELDS)]);
            self.client.send_json(request)
        })
        .await?;
        resource.into_file_info()
    }

    async fn list_folder(&self, parent: &FileId) -> Result<Vec<FileInfo>> {
        let query = format!("'{}' in parents and trashed = false", parent.as_str());
        let fields = format!("nextPageToken,files({FILE_FIELDS})");

        let mut files = Vec::new();
        let mut page_token: Option<String> = None;

        loop {
            let page: FileListPage = try_twice("files.list", || {
                let mut params = vec![
                    ("q", query.clone()),
                    ("pageSize", PAGE_SIZE.to_string()),
                    ("corpora", "user".to_string()),
                    ("spaces", "drive".to_string()),
                    ("fields", fields.clone()),
                ];
                if let Some(token) = &page_token {
                    params.push(("pageToken", token.clone()));
                }
                let request = self.client.request(Method::GET, "/files").query(&params);
                self.client.send_json(request)
            })
            .await?;

            for resource in page.files {
                files.push(resource.into_file_info()?);
            }

            match page.next_page_token {
                Some(token) => {
                    page_token = Some(token);
                    tokio::time::sleep(STRUCTURE_PAGE_DELAY).await;
                }
                None => break,
            }
        }

        debug!(parent = %parent, count = files.len(), "Folder listed");
        Ok(files)
    }

    async fn download_to(&self, id: &FileId, dest: &Path) -> Result<()> {
        let result = try_twice("files.get media", || self.stream_to_file(id, dest)).await;

        if result.is_err() {
            // A partial file must not survive, or the watcher would later
            // re-upload it as a local edit.
            if let Err(unlink_err) = tokio::fs::remove_file(dest).await {
                if unlink_err.kind() != std::io::ErrorKind::NotFound {
                    warn!(
                        dest = %dest.display(),
                        error = %unlink_err,
                        "Failed to remove partial download"
                    );
                }
            }
        }

        result
    }

    async fn create_file(&self, new: &NewFile, body: Option<Vec<u8>>) -> Result<FileInfo> {
        let mut metadata = serde_json::json!({
            "name": new.name,
            "parents": new.parents.iter().map(|p| p.as_str()).collect::<Vec<_>>(),
        });
        if let Some(mime) = &new.mime_type {
            metadata["mimeType"] = serde_json::Value::String(mime.clone());
        }

        let resource: DriveFileResource = match body {
            Some(content) => {
                try_twice("files.create multipart", || {
                    let request = self
                        .client
                        .upload_request(Method::POST, "/files")
                        .query(&[("uploadType", "multipart"), ("fields", FILE_FIELDS)])
                        .header(
                            reqwest::header::CONTENT_TYPE,
                            format!("multipart/related; boundary={MULTIPART_BOUNDARY}"),
                        )
                        .body(multipart_related_body(&metadata, &content));
                    self.client.send_json(request)
                })
                .await?
            }
            None => {
                try_twice("files.create", || {
                    let request = self
                        .client
                        .request(Method::POST, "/files")
                        .query(&[("fields", FILE_FIELDS)])
                        .json(&metadata);
                    self.client.send_json(request)
                })
                .await?
            }
        };

        resource.into_file_info()
    }

    async fn update_file(&self, id: &FileId, body: Vec<u8>) -> Result<FileInfo> {
        let resource: DriveFileResource = try_twice("files.update", || {
            let request = self
                .client
                .upload_request(Method::PATCH, &format!("/files/{id}"))
                .query(&[("uploadType", "media"), ("fields", FILE_FIELDS)])
                .header(reqwest::header::CONTENT_TYPE, "application/octet-stream")
                .body(body.clone());
            self.client.send_json(request)
        })
        .await?;
        resource.into_file_info()
    }

    async fn delete_file(&self, id: &FileId) -> Result<()> {
        try_twice("files.delete", || async {
            let request = self.client.request(Method::DELETE, &format!("/files/{id}"));
            self.client.send_raw(request).await?;
            Ok(())
        })
        .await
    }

    async fn changes_start_token(&self) -> Result<ChangeToken> {
        let response: StartPageTokenResponse = try_twice("changes.getStartPageToken", || {
            let request = self.client.request(Method::GET, "/changes/startPageToken");
            self.client.send_json(request)
        })
        .await?;
        Ok(ChangeToken::new(response.start_page_token)?)
    }

    async fn changes_list(&self, token: &ChangeToken) -> Result<ChangeBatch> {
        let fields = format!("nextPageToken,newStartPageToken,changes(fileId,removed,file({FILE_FIELDS}))");

        let mut changes = Vec::new();
        let mut page_token = token.as_str().to_string();
        let mut new_start_token: Option<String> = None;

        loop {
            let page: ChangeListPage = try_twice("changes.list", || {
                let params = vec![
                    ("pageToken", page_token.clone()),
                    ("pageSize", PAGE_SIZE.to_string()),
                    ("corpora", "user".to_string()),
                    ("spaces", "drive".to_string()),
                    ("restrictToMyDrive", "true".to_string()),
                    ("fields", fields.clone()),
                ];
                let request = self.client.request(Method::GET, "/changes").query(&params);
                self.client.send_json(request)
            })
            .await?;

            for resource in page.changes {
                changes.push(DriveChangeResource::into_change(resource)?);
            }

            if let Some(new_token) = page.new_start_page_token {
                new_start_token = Some(new_token);
            }

            match page.next_page_token {
                Some(token) => {
                    page_token = token;
                    tokio::time::sleep(CHANGES_PAGE_DELAY).await;
                }
                None => break,
            }
        }

        let new_token = match new_start_token {
            Some(token) => ChangeToken::new(token)?,
            None => {
                // The final page always carries a new start token in
                // practice; keep the cursor in place if it ever doesn't.
                warn!("Change feed returned no newStartPageToken, keeping cursor");
                token.clone()
            }
        };

        debug!(count = changes.len(), new_token = %new_token, "Change feed drained");
        Ok(ChangeBatch { changes, new_token })
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_multipart_body_layout() {
        let metadata = serde_json::json!({"name": "x.txt", "parents": ["p1"]});
        let body = multipart_related_body(&metadata, b"hello");
        let text = String::from_utf8_lossy(&body);

        assert!(text.starts_with(&format!("--{MULTIPART_BOUNDARY}\r\n")));
        assert!(text.contains("Content-Type: application/json; charset=UTF-8"));
        assert!(text.contains("\"name\":\"x.txt\""));
        assert!(text.contains("Content-Type: application/octet-stream\r\n\r\nhello"));
        assert!(text.ends_with(&format!("\r\n--{MULTIPART_BOUNDARY}--\r\n")));
    }

    #[test]
    fn test_multipart_body_binary_content_preserved() {
        let metadata = serde_json::json!({"name": "bin"});
        let content = [0u8, 159, 146, 150];
        let body = multipart_related_body(&metadata, &content);

        let needle = b"\r\n\r\n";
        let pos = body
            .windows(needle.len())
            .rposition(|w| w == needle)
            .unwrap();
        assert_eq!(&body[pos + 4..pos + 8], &content);
    }
}
