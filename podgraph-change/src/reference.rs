//! External reference loading
//!
//! `insertFromRefs` / `deleteFromRefs` point at documents outside the request.
//! A [`ReferenceLoader`] claims references it understands and streams their
//! statements; [`ReferenceLoaders`] picks the single loader for a reference.
//!
//! The built-in loaders are not incremental: [`FileReferenceLoader`] reads
//! and expands the whole document before its stream yields the first
//! statement. The materializer's batch size then bounds how many records are
//! added to the buffer at a time, not the loader's own memory. A loader for
//! large documents has to parse incrementally behind the same stream type.

use crate::error::{ChangeError, Result};
use crate::jsonld::{JsonLdContext, StatementBuilder};
use async_trait::async_trait;
use futures::stream::{self, BoxStream, StreamExt};
use parking_lot::RwLock;
use podgraph_core::{iri, ExternalReference, RdfStatement};
use rustc_hash::FxHashMap;
use serde_json::Value as JsonValue;
use std::path::{Component, Path, PathBuf};
use std::sync::Arc;

/// Statements streamed from one external reference
pub type StatementStream = BoxStream<'static, Result<RdfStatement>>;

/// Media types accepted for JSON-LD documents
const JSON_LD_FORMATS: &[&str] = &["application/ld+json", "application/json", "jsonld", "json"];

/// Resolves external references into statement streams
#[async_trait]
pub trait ReferenceLoader: Send + Sync {
    fn name(&self) -> &str;

    fn is_supported(&self, reference: &ExternalReference) -> bool;

    async fn load_reference(
        &self,
        pod_id: &str,
        reference: &ExternalReference,
    ) -> Result<StatementStream>;
}

/// Ordered set of loaders; each reference must match exactly one
#[derive(Clone, Default)]
pub struct ReferenceLoaders {
    loaders: Vec<Arc<dyn ReferenceLoader>>,
}

impl ReferenceLoaders {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, loader: Arc<dyn ReferenceLoader>) -> Self {
        self.loaders.push(loader);
        self
    }

    pub fn is_empty(&self) -> bool {
        self.loaders.is_empty()
    }

    /// The unique loader supporting `reference`
    pub fn resolve(&self, reference: &ExternalReference) -> Result<&Arc<dyn ReferenceLoader>> {
        let mut matching = self.loaders.iter().filter(|l| l.is_supported(reference));
        let first = matching.next().ok_or_else(|| {
            ChangeError::reference(format!("no loader supports reference '{reference}'"))
        })?;
        if let Some(second) = matching.next() {
            return Err(ChangeError::reference(format!(
                "reference '{reference}' is supported by both '{}' and '{}'",
                first.name(),
                second.name()
            )));
        }
        Ok(first)
    }

    pub async fn load(
        &self,
        pod_id: &str,
        reference: &ExternalReference,
    ) -> Result<StatementStream> {
        let loader = self.resolve(reference)?;
        tracing::debug!(loader = loader.name(), reference = %reference, "loading reference");
        loader.load_reference(pod_id, reference).await
    }
}

fn check_format(reference: &ExternalReference) -> Result<()> {
    match reference.format.as_deref() {
        None => Ok(()),
        Some(f) if JSON_LD_FORMATS.contains(&f) => Ok(()),
        Some(f) => Err(ChangeError::reference(format!(
            "unsupported format '{f}' for reference '{reference}'"
        ))),
    }
}

fn statements_from_document(document: &JsonValue) -> Result<StatementStream> {
    let statements = StatementBuilder::new().document(document, &JsonLdContext::new())?;
    Ok(stream::iter(statements.into_iter().map(Ok)).boxed())
}

/// Loads JSON-LD documents from `file://` URIs
///
/// The whole file is read and expanded up front.
#[derive(Debug, Clone, Default)]
pub struct FileReferenceLoader {
    root: Option<PathBuf>,
}

impl FileReferenceLoader {
    pub fn new() -> Self {
        Self::default()
    }

    /// Only serve files below `root`
    pub fn with_root(root: impl Into<PathBuf>) -> Self {
        Self {
            root: Some(root.into()),
        }
    }

    fn path_of(&self, reference: &ExternalReference) -> Result<PathBuf> {
        let raw = reference
            .uri
            .strip_prefix("file://")
            .ok_or_else(|| ChangeError::reference(format!("not a file URI: '{reference}'")))?;
        let path = Path::new(raw);
        if path.components().any(|c| matches!(c, Component::ParentDir)) {
            return Err(ChangeError::reference(format!(
                "file reference '{reference}' must not contain '..'"
            )));
        }
        let path = match &self.root {
            Some(root) if path.is_relative() => root.join(path),
            Some(root) if !path.starts_with(root) => {
                return Err(ChangeError::reference(format!(
                    "file reference '{reference}' is outside {}",
                    root.display()
                )))
            }
            _ => path.to_path_buf(),
        };
        Ok(path)
    }
}

#[async_trait]
impl ReferenceLoader for FileReferenceLoader {
    fn name(&self) -> &str {
        "file"
    }

    fn is_supported(&self, reference: &ExternalReference) -> bool {
        iri::scheme(&reference.uri) == Some("file")
    }

    async fn load_reference(
        &self,
        pod_id: &str,
        reference: &ExternalReference,
    ) -> Result<StatementStream> {
        check_format(reference)?;
        let path = self.path_of(reference)?;
        tracing::debug!(pod_id, path = %path.display(), "reading file reference");
        let text = tokio::fs::read_to_string(&path).await.map_err(|e| {
            ChangeError::reference(format!("cannot read {}: {e}", path.display()))
        })?;
        let document: JsonValue = serde_json::from_str(&text).map_err(|e| {
            ChangeError::reference(format!("{} is not valid JSON-LD: {e}", path.display()))
        })?;
        statements_from_document(&document)
    }
}

/// Serves statements registered in-process under `mem://<key>` URIs
#[derive(Debug, Default)]
pub struct MemoryReferenceLoader {
    documents: RwLock<FxHashMap<String, Vec<RdfStatement>>>,
}

impl MemoryReferenceLoader {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register statements under `mem://<key>`
    pub fn insert(&self, key: &str, statements: Vec<RdfStatement>) {
        self.documents.write().insert(key.to_string(), statements);
    }

    /// Register a JSON-LD document under `mem://<key>`
    pub fn insert_document(&self, key: &str, document: &JsonValue) -> Result<()> {
        let statements = StatementBuilder::new().document(document, &JsonLdContext::new())?;
        self.insert(key, statements);
        Ok(())
    }
}

#[async_trait]
impl ReferenceLoader for MemoryReferenceLoader {
    fn name(&self) -> &str {
        "memory"
    }

    fn is_supported(&self, reference: &ExternalReference) -> bool {
        reference.uri.starts_with("mem://")
    }

    async fn load_reference(
        &self,
        _pod_id: &str,
        reference: &ExternalReference,
    ) -> Result<StatementStream> {
        let key = reference.uri.trim_start_matches("mem://");
        let statements = self
            .documents
            .read()
            .get(key)
            .cloned()
            .ok_or_else(|| ChangeError::reference(format!("unknown reference '{reference}'")))?;
        Ok(stream::iter(statements.into_iter().map(Ok)).boxed())
    }
}
