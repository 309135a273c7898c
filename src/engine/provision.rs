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

//! Template copies and workbook exports on Drive.

use super::require_sheets;
use crate::config::RetryPolicy;
use crate::model::mapping::REQUIRED_SHEETS;
use crate::sheets::backend::{DriveBackend, SpreadsheetBackend, StructureChange};
use crate::sheets::drive::{Transient, classify};
use crate::utils::ModelError;
use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use regex::Regex;
use std::path::Path;
use tokio::time::sleep;
use tracing::{debug, info, warn};

pub const SHEET_URL_PREFIX: &str = "https://docs.google.com/spreadsheets/d/";
/// Tabs hidden, not removed, in exported workbooks.
pub const HIDDEN_ON_EXPORT: [&str; 1] = ["Underwriting Assumptions"];

pub fn sheet_url(spreadsheet_id: &str) -> String {
    format!("{}{}", SHEET_URL_PREFIX, spreadsheet_id)
}

/// Pulls the file id out of a `.../d/<id>/edit` style URL.
pub fn template_id_from_url(url: &str) -> Result<String, ModelError> {
    let pattern = Regex::new(r"/d/([a-zA-Z0-9_-]+)")
        .map_err(|err| ModelError::InvalidTemplateUrl(err.to_string()))?;
    pattern
        .captures(url)
        .and_then(|captures| captures.get(1))
        .map(|id| id.as_str().to_string())
        .ok_or_else(|| ModelError::InvalidTemplateUrl(url.to_string()))
}

/// Copies are named by their UTC creation time.
pub fn copy_name(now: DateTime<Utc>) -> String {
    now.format("%Y%m%d%H%M%S").to_string()
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProvisionedSheet {
    pub id: String,
    pub url: String,
}

pub struct Provisioner<'a> {
    drive: &'a dyn DriveBackend,
    parent_folder: Option<&'a str>,
    retry: RetryPolicy,
}

impl<'a> Provisioner<'a> {
    pub fn new(drive: &'a dyn DriveBackend, parent_folder: Option<&'a str>) -> Self {
        Self {
            drive,
            parent_folder,
            retry: RetryPolicy::default(),
        }
    }

    pub fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    /// Copies `source` as `name`, looking the name up before every attempt
    /// so a copy whose response was lost is picked up instead of repeated.
    async fn copy_once(&self, source: &str, name: &str, parent: Option<&str>) -> Result<String> {
        let mut attempt = 0usize;
        loop {
            attempt += 1;
            if let Some(existing) = self.drive.find_file(name, parent).await? {
                warn!("⚠️ Reusing existing copy '{}' ({})", name, existing);
                return Ok(existing);
            }
            match self.drive.copy_file(source, name, parent).await {
                Ok(id) => return Ok(id),
                Err(err) => {
                    let message = format!("{:#}", err);
                    match classify(&message) {
                        Some(kind) if attempt < self.retry.max_attempts => {
                            let delay = self.retry.linear(attempt, kind == Transient::Tls);
                            warn!(
                                "🔁 Copy '{}' failed with {:?} error (attempt {}/{}), retrying in {:?}: {}",
                                name, kind, attempt, self.retry.max_attempts, delay, message
                            );
                            sleep(delay).await;
                        }
                        _ => return Err(err),
                    }
                }
            }
        }
    }

    async fn folder(&self, name: &str, parent: Option<&str>) -> Result<String> {
        if let Some(id) = self.drive.find_folder(name, parent).await? {
            debug!("🔍 Reusing folder '{}' ({})", name, id);
            return Ok(id);
        }
        self.drive.create_folder(name, parent).await
    }

    /// Copies the template into `<owner>/Model <template id>/<timestamp>`.
    pub async fn provision_copy(&self, owner: &str, template_id: &str) -> Result<ProvisionedSheet> {
        self.provision_copy_at(owner, template_id, Utc::now()).await
    }

    /// A file already carrying the copy's name in the destination folder is
    /// reused, so a repeated run or a retried copy leaves no duplicate.
    pub async fn provision_copy_at(
        &self,
        owner: &str,
        template_id: &str,
        now: DateTime<Utc>,
    ) -> Result<ProvisionedSheet> {
        info!("📁 Preparing folders for {}", owner);
        let owner_folder = self
            .folder(owner, self.parent_folder)
            .await
            .with_context(|| format!("Failed to prepare folder for {}", owner))?;
        let model_folder = self
            .folder(&format!("Model {}", template_id), Some(&owner_folder))
            .await
            .context("Failed to prepare model folder")?;

        let name = copy_name(now);
        let id = self
            .copy_once(template_id, &name, Some(&model_folder))
            .await
            .context("Failed to copy template")?;

        let url = sheet_url(&id);
        info!("✅ Model sheet ready: {}", url);
        Ok(ProvisionedSheet { id, url })
    }

    /// Writes an `.xlsx` of `spreadsheet_id` to `path` without the mapping
    /// tabs. The work happens on a temporary copy that is deleted afterwards,
    /// whether or not the export succeeded. Returns the number of bytes.
    pub async fn export_xlsx(
        &self,
        sheets: &dyn SpreadsheetBackend,
        spreadsheet_id: &str,
        path: &Path,
    ) -> Result<usize> {
        let name = format!("export {}", copy_name(Utc::now()));
        let copy = self
            .copy_once(spreadsheet_id, &name, None)
            .await
            .context("Failed to create export copy")?;
        debug!("🔍 Export copy {} created", copy);

        let exported = self.export_copy(sheets, &copy).await;
        if let Err(err) = self.drive.delete_file(&copy).await {
            warn!("⚠️ Failed to delete export copy {}: {:#}", copy, err);
        }
        let bytes = exported?;

        std::fs::write(path, &bytes)
            .map_err(ModelError::from)
            .with_context(|| format!("Failed to write workbook: {}", path.display()))?;
        info!("✅ Exported {} bytes to {}", bytes.len(), path.display());
        Ok(bytes.len())
    }

    async fn export_copy(&self, sheets: &dyn SpreadsheetBackend, copy: &str) -> Result<Vec<u8>> {
        let sheet_ids = require_sheets(sheets, copy, &[]).await?;
        let mut changes: Vec<StructureChange> = REQUIRED_SHEETS
            .iter()
            .filter_map(|name| sheet_ids.get(*name))
            .map(|&sheet_id| StructureChange::DeleteSheet { sheet_id })
            .collect();
        changes.extend(
            HIDDEN_ON_EXPORT
                .iter()
                .filter_map(|name| sheet_ids.get(*name))
                .map(|&sheet_id| StructureChange::HideSheet { sheet_id }),
        );

        if !changes.is_empty() {
            sheets
                .apply_structure(copy, &changes)
                .await
                .context("Failed to strip mapping tabs from export copy")?;
        }
        self.drive.export_xlsx(copy).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sheets::fake::{FakeCall, FakeDrive, FakeSheets};
    use chrono::TimeZone;
    use std::time::Duration;
    use tempfile::TempDir;

    fn noon() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2025, 3, 14, 12, 30, 5).unwrap()
    }

    #[test]
    fn extracts_template_ids() {
        assert_eq!(
            template_id_from_url("https://docs.google.com/spreadsheets/d/1AbC-d_9/edit#gid=0").unwrap(),
            "1AbC-d_9"
        );
        assert!(matches!(
            template_id_from_url("https://example.com/sheet"),
            Err(ModelError::InvalidTemplateUrl(_))
        ));
    }

    #[test]
    fn copy_names_are_utc_timestamps() {
        assert_eq!(copy_name(noon()), "20250314123005");
    }

    #[tokio::test]
    async fn creates_folders_once_and_copies() {
        let drive = FakeDrive::default();
        let root = drive.add_folder("root", None);
        let provisioner = Provisioner::new(&drive, Some(&root));

        let sheet = provisioner.provision_copy_at("ana@example.com", "tmpl", noon()).await.unwrap();
        assert!(sheet.url.ends_with(&sheet.id));
        assert!(sheet.url.starts_with(SHEET_URL_PREFIX));

        let later = noon() + chrono::Duration::seconds(1);
        provisioner.provision_copy_at("ana@example.com", "tmpl", later).await.unwrap();

        let folders: Vec<_> = drive.files().into_iter().filter(|file| file.folder).collect();
        assert_eq!(folders.len(), 3);
        assert!(folders.iter().any(|folder| folder.name == "Model tmpl"));
        assert_eq!(drive.copies(), 2);
    }

    #[tokio::test]
    async fn retried_copy_reuses_existing_file() {
        let drive = FakeDrive::default();
        let provisioner = Provisioner::new(&drive, None);

        let first = provisioner.provision_copy_at("ana@example.com", "tmpl", noon()).await.unwrap();
        let second = provisioner.provision_copy_at("ana@example.com", "tmpl", noon()).await.unwrap();

        assert_eq!(first, second);
        assert_eq!(drive.copies(), 1);
    }

    #[tokio::test]
    async fn copy_with_lost_response_is_not_repeated() {
        let drive = FakeDrive::default();
        drive.lose_copy_responses(1);
        let retry = RetryPolicy {
            base_delay: Duration::ZERO,
            tls_base_delay: Duration::ZERO,
            ..RetryPolicy::default()
        };
        let provisioner = Provisioner::new(&drive, None).with_retry(retry);

        let sheet = provisioner.provision_copy_at("ana@example.com", "tmpl", noon()).await.unwrap();

        assert_eq!(drive.copies(), 1);
        let copies: Vec<_> = drive.files().into_iter().filter(|file| !file.folder).collect();
        assert_eq!(copies.len(), 1);
        assert_eq!(copies[0].id, sheet.id);
        assert_eq!(copies[0].name, "20250314123005");
    }

    #[tokio::test]
    async fn permanent_copy_errors_are_not_retried() {
        struct Denied(FakeDrive);

        #[async_trait::async_trait]
        impl DriveBackend for Denied {
            async fn find_folder(&self, name: &str, parent: Option<&str>) -> Result<Option<String>> {
                self.0.find_folder(name, parent).await
            }
            async fn create_folder(&self, name: &str, parent: Option<&str>) -> Result<String> {
                self.0.create_folder(name, parent).await
            }
            async fn find_file(&self, name: &str, parent: Option<&str>) -> Result<Option<String>> {
                self.0.find_file(name, parent).await
            }
            async fn copy_file(&self, _: &str, _: &str, _: Option<&str>) -> Result<String> {
                Err(ModelError::DriveApi("template copy failed: File not found: tmpl".to_string()).into())
            }
            async fn delete_file(&self, file_id: &str) -> Result<()> {
                self.0.delete_file(file_id).await
            }
            async fn export_xlsx(&self, file_id: &str) -> Result<Vec<u8>> {
                self.0.export_xlsx(file_id).await
            }
        }

        let drive = Denied(FakeDrive::default());
        let err = Provisioner::new(&drive, None)
            .provision_copy_at("ana@example.com", "tmpl", noon())
            .await
            .unwrap_err();
        assert!(format!("{:#}", err).contains("File not found"));
    }

    #[tokio::test]
    async fn export_strips_mapping_tabs_and_cleans_up() {
        let drive = FakeDrive::default();
        let sheets = FakeSheets::with_template_tabs();
        let dir = TempDir::new().expect("Failed to create temporary directory");
        let path = dir.path().join("model.xlsx");

        let bytes = Provisioner::new(&drive, None)
            .export_xlsx(&sheets, "model", &path)
            .await
            .unwrap();

        assert_eq!(bytes, 4);
        assert_eq!(std::fs::read(&path).unwrap(), b"PK\x03\x04");
        let structure = sheets
            .calls()
            .into_iter()
            .find_map(|call| match call {
                FakeCall::Structure(changes) => Some(changes),
                _ => None,
            })
            .unwrap();
        let deletes = structure
            .iter()
            .filter(|change| matches!(change, StructureChange::DeleteSheet { .. }))
            .count();
        assert_eq!(deletes, 3);
        assert!(matches!(structure.last(), Some(StructureChange::HideSheet { .. })));

        assert_eq!(drive.exports().len(), 1);
        assert_eq!(drive.deleted(), drive.exports());
        assert!(drive.files().is_empty());
    }
}
