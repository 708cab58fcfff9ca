//! Knowledge Base Setup
//!
//! The interview coach answers from a hosted vector store filled with rubric,
//! role and company documents. This module creates that store and uploads the
//! source files once at startup; retrieval itself happens inside the hosted
//! file-search tool.

use anyhow::{Context, Result};
use async_openai::{
    Client,
    config::OpenAIConfig,
    types::{
        CreateFileRequestArgs, CreateVectorStoreFileRequestArgs, CreateVectorStoreRequestArgs,
        FilePurpose,
    },
};
use async_trait::async_trait;
use serde::Serialize;
use std::path::{Path, PathBuf};
use tracing::{info, warn};

/// Source documents uploaded by default, relative to the knowledge root.
pub const DEFAULT_SOURCES: [&str; 3] = [
    "rubrics/competencies.txt",
    "roles/pm_intern/job_description.md",
    "company/values.md",
];

/// Summary of a freshly created vector store.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct VectorStoreInfo {
    pub id: String,
    pub name: String,
    pub created_at: i64,
    pub file_count: u32,
}

/// Result of uploading one source file.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum UploadOutcome {
    Success { file_id: String },
    Failed { error: String },
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct UploadReport {
    /// The file name only, e.g. `values.md`.
    pub file: String,
    #[serde(flatten)]
    pub outcome: UploadOutcome,
}

impl UploadReport {
    pub fn is_success(&self) -> bool {
        matches!(self.outcome, UploadOutcome::Success { .. })
    }
}

/// Hosted storage backing the knowledge agent's file search.
#[async_trait]
pub trait KnowledgeBase: Send + Sync {
    async fn create_vector_store(&self, name: &str) -> Result<VectorStoreInfo>;

    /// Uploads one file and attaches it to the store.
    async fn upload_file(&self, path: &Path, vector_store_id: &str) -> Result<String>;
}

/// Uploads every source, recording per-file outcomes instead of stopping at
/// the first failure.
pub async fn upload_sources(
    kb: &dyn KnowledgeBase,
    sources: &[PathBuf],
    vector_store_id: &str,
) -> Vec<UploadReport> {
    let mut reports = Vec::with_capacity(sources.len());
    for path in sources {
        let file = path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| path.display().to_string());
        let outcome = match kb.upload_file(path, vector_store_id).await {
            Ok(file_id) => {
                info!(%file, %file_id, "Uploaded knowledge file");
                UploadOutcome::Success { file_id }
            }
            Err(e) => {
                warn!(%file, error = ?e, "Knowledge file upload failed");
                UploadOutcome::Failed {
                    error: format!("{e:#}"),
                }
            }
        };
        reports.push(UploadReport { file, outcome });
    }
    reports
}

/// Creates the store and fills it. Store creation failure is fatal; a file
/// failure is only reported.
pub async fn provision(
    kb: &dyn KnowledgeBase,
    store_name: &str,
    sources: &[PathBuf],
) -> Result<(VectorStoreInfo, Vec<UploadReport>)> {
    let store = kb
        .create_vector_store(store_name)
        .await
        .context("Vector store creation failed")?;
    info!(id = %store.id, name = %store.name, "Vector store created");
    let reports = upload_sources(kb, sources, &store.id).await;
    Ok((store, reports))
}

/// An implementation of `KnowledgeBase` on the hosted files and vector-store APIs.
pub struct OpenAIKnowledgeBase {
    client: Client<OpenAIConfig>,
}

impl OpenAIKnowledgeBase {
    pub fn new(config: OpenAIConfig) -> Self {
        Self {
            client: Client::with_config(config),
        }
    }
}

#[async_trait]
impl KnowledgeBase for OpenAIKnowledgeBase {
    async fn create_vector_store(&self, name: &str) -> Result<VectorStoreInfo> {
        let request = CreateVectorStoreRequestArgs::default().name(name).build()?;
        let store = self.client.vector_stores().create(request).await?;
        Ok(VectorStoreInfo {
            id: store.id,
            name: name.to_string(),
            created_at: store.created_at as i64,
            file_count: store.file_counts.completed as u32,
        })
    }

    async fn upload_file(&self, path: &Path, vector_store_id: &str) -> Result<String> {
        if !path.is_file() {
            anyhow::bail!("{} does not exist", path.display());
        }
        let request = CreateFileRequestArgs::default()
            .file(path)
            .purpose(FilePurpose::Assistants)
            .build()?;
        let file = self
            .client
            .files()
            .create(request)
            .await
            .with_context(|| format!("Could not upload {}", path.display()))?;

        let attach = CreateVectorStoreFileRequestArgs::default()
            .file_id(file.id.clone())
            .build()?;
        self.client
            .vector_stores()
            .files(vector_store_id)
            .create(attach)
            .await
            .with_context(|| format!("Could not attach {} to {vector_store_id}", file.id))?;
        Ok(file.id)
    }
}

/// A `KnowledgeBase` that never leaves the process, for offline runs and tests.
#[derive(Debug, Default)]
pub struct MockKnowledgeBase;

#[async_trait]
impl KnowledgeBase for MockKnowledgeBase {
    async fn create_vector_store(&self, name: &str) -> Result<VectorStoreInfo> {
        Ok(VectorStoreInfo {
            id: "vs_mock".to_string(),
            name: name.to_string(),
            created_at: 0,
            file_count: 0,
        })
    }

    async fn upload_file(&self, path: &Path, _vector_store_id: &str) -> Result<String> {
        if path.is_file() {
            let stem = path
                .file_stem()
                .and_then(|s| s.to_str())
                .unwrap_or("file");
            Ok(format!("file_mock_{stem}"))
        } else {
            anyhow::bail!("{} does not exist", path.display())
        }
    }
}
