// Copyright 2025 Webmobix Solutions AG
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//     http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUTHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.

use super::backend::DriveBackend;
use crate::auth::Authenticator;
use crate::config::RetryPolicy;
use crate::utils::ModelError;
use anyhow::Result;
use async_trait::async_trait;
use google_drive3::{DriveHub, api::File, hyper_rustls};
use http_body_util::BodyExt;
use hyper_util::{client::legacy::connect::HttpConnector, rt::TokioExecutor};
use std::future::Future;
use std::io::Cursor;
use tokio::time::sleep;
use tracing::{debug, info, warn};

const FOLDER_MIME_TYPE: &str = "application/vnd.google-apps.folder";
const XLSX_MIME_TYPE: &str = "application/vnd.openxmlformats-officedocument.spreadsheetml.sheet";

pub type DriveApiHub = DriveHub<hyper_rustls::HttpsConnector<HttpConnector>>;

/// Failure classes that are worth another attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Transient {
    Tls,
    Network,
}

pub(crate) fn classify(message: &str) -> Option<Transient> {
    let message = message.to_lowercase();
    if message.contains("ssl") || message.contains("tls") || message.contains("handshake") {
        Some(Transient::Tls)
    } else if message.contains("timed out")
        || message.contains("timeout")
        || message.contains("connection")
        || message.contains("broken pipe")
    {
        Some(Transient::Network)
    } else {
        None
    }
}

/// Escapes a value for a Drive `q` string literal.
fn query_literal(value: &str) -> String {
    value.replace('\\', "\\\\").replace('\'', "\\'")
}

fn folder_query(name: &str, parent: Option<&str>) -> String {
    let mut query = format!(
        "name = '{}' and mimeType = '{}' and trashed = false",
        query_literal(name),
        FOLDER_MIME_TYPE
    );
    if let Some(parent) = parent {
        query.push_str(&format!(" and '{}' in parents", query_literal(parent)));
    }
    query
}

fn file_query(name: &str, parent: Option<&str>) -> String {
    let mut query = format!(
        "name = '{}' and mimeType != '{}' and trashed = false",
        query_literal(name),
        FOLDER_MIME_TYPE
    );
    if let Some(parent) = parent {
        query.push_str(&format!(" and '{}' in parents", query_literal(parent)));
    }
    query
}

/// [`DriveBackend`] over the Google Drive v3 API.
pub struct GoogleDriveBackend {
    hub: DriveApiHub,
    retry: RetryPolicy,
}

impl GoogleDriveBackend {
    pub fn new(auth: Authenticator, retry: RetryPolicy) -> Result<Self> {
        info!("🔑 Initializing Google Drive API connection...");
        let client = hyper_util::client::legacy::Client::builder(TokioExecutor::new()).build(
            hyper_rustls::HttpsConnectorBuilder::new()
                .with_native_roots()?
                .https_or_http()
                .enable_http1()
                .build(),
        );
        Ok(Self {
            hub: DriveHub::new(client, auth),
            retry,
        })
    }

    /// Retries TLS and connection failures with a linearly growing wait;
    /// anything else fails on the first attempt.
    async fn call_with_network_retry<T, F, Fut>(&self, description: &str, mut operation: F) -> Result<T>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, google_drive3::Error>>,
    {
        let mut attempt = 0usize;
        loop {
            attempt += 1;
            match operation().await {
                Ok(value) => return Ok(value),
                Err(err) => {
                    let message = err.to_string();
                    match classify(&message) {
                        Some(kind) if attempt < self.retry.max_attempts => {
                            let delay = self.retry.linear(attempt, kind == Transient::Tls);
                            warn!(
                                "🔁 {} failed with {:?} error (attempt {}/{}), retrying in {:?}: {}",
                                description, kind, attempt, self.retry.max_attempts, delay, message
                            );
                            sleep(delay).await;
                        }
                        _ => {
                            return Err(ModelError::DriveApi(format!(
                                "{} failed: {}",
                                description, message
                            ))
                            .into());
                        }
                    }
                }
            }
        }
    }

    async fn first_match(&self, description: &str, query: String) -> Result<Option<String>> {
        let hub = &self.hub;
        let query = query.as_str();
        let (_, list) = self
            .call_with_network_retry(description, || async move {
                hub.files()
                    .list()
                    .q(query)
                    .supports_all_drives(true)
                    .include_items_from_all_drives(true)
                    .param("fields", "files(id, name)")
                    .doit()
                    .await
            })
            .await?;
        Ok(list
            .files
            .unwrap_or_default()
            .into_iter()
            .find_map(|file| file.id))
    }
}

#[async_trait]
impl DriveBackend for GoogleDriveBackend {
    async fn find_folder(&self, name: &str, parent: Option<&str>) -> Result<Option<String>> {
        debug!("🔍 Looking up folder '{}'", name);
        self.first_match("folder lookup", folder_query(name, parent))
            .await
    }

    async fn create_folder(&self, name: &str, parent: Option<&str>) -> Result<String> {
        let metadata = File {
            name: Some(name.to_string()),
            mime_type: Some(FOLDER_MIME_TYPE.to_string()),
            parents: parent.map(|parent| vec![parent.to_string()]),
            ..Default::default()
        };
        let hub = &self.hub;
        let (_, folder) = self
            .call_with_network_retry("folder create", || {
                let metadata = metadata.clone();
                async move {
                    hub.files()
                        .create(metadata)
                        .supports_all_drives(true)
                        .upload(Cursor::new(Vec::new()), mime::APPLICATION_OCTET_STREAM)
                        .await
                }
            })
            .await?;
        let id = folder
            .id
            .ok_or_else(|| ModelError::DriveApi(format!("created folder '{}' has no id", name)))?;
        info!("📁 Created folder '{}' ({})", name, id);
        Ok(id)
    }

    async fn find_file(&self, name: &str, parent: Option<&str>) -> Result<Option<String>> {
        self.first_match("file lookup", file_query(name, parent))
            .await
    }

    async fn copy_file(&self, file_id: &str, name: &str, parent: Option<&str>) -> Result<String> {
        let metadata = File {
            name: Some(name.to_string()),
            parents: parent.map(|parent| vec![parent.to_string()]),
            ..Default::default()
        };
        let (_, copy) = self
            .hub
            .files()
            .copy(metadata, file_id)
            .supports_all_drives(true)
            .doit()
            .await
            .map_err(|err| ModelError::DriveApi(format!("template copy failed: {}", err)))?;
        copy.id
            .ok_or_else(|| ModelError::DriveApi(format!("copy of {} has no id", file_id)).into())
    }

    async fn delete_file(&self, file_id: &str) -> Result<()> {
        let hub = &self.hub;
        self.call_with_network_retry("file delete", || async move {
            hub.files()
                .delete(file_id)
                .supports_all_drives(true)
                .doit()
                .await
        })
        .await?;
        debug!("🗑️ Deleted file {}", file_id);
        Ok(())
    }

    async fn export_xlsx(&self, file_id: &str) -> Result<Vec<u8>> {
        let hub = &self.hub;
        let response = self
            .call_with_network_retry("workbook export", || async move {
                hub.files().export(file_id, XLSX_MIME_TYPE).doit().await
            })
            .await?;
        let bytes = response
            .into_body()
            .collect()
            .await
            .map_err(|err| ModelError::DriveApi(format!("reading export body failed: {}", err)))?
            .to_bytes();
        Ok(bytes.to_vec())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn classifies_transient_failures() {
        assert_eq!(classify("SSL: UNEXPECTED_EOF_WHILE_READING"), Some(Transient::Tls));
        assert_eq!(classify("tls handshake eof"), Some(Transient::Tls));
        assert_eq!(classify("operation timed out"), Some(Transient::Network));
        assert_eq!(classify("Connection reset by peer"), Some(Transient::Network));
        assert_eq!(classify("File not found: abc"), None);
    }

    #[test]
    fn folder_query_scopes_to_parent() {
        assert_eq!(
            folder_query("Model abc", Some("root-id")),
            "name = 'Model abc' and mimeType = 'application/vnd.google-apps.folder' \
             and trashed = false and 'root-id' in parents"
        );
        assert!(!folder_query("user-1", None).contains("in parents"));
    }

    #[test]
    fn query_literals_escape_quotes() {
        assert_eq!(query_literal("O'Brien"), "O\\'Brien");
        assert!(file_query("20250101", Some("folder")).contains("mimeType != "));
        assert!(!file_query("export 20250101", None).contains("in parents"));
    }
}
