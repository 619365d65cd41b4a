// Knowledge source reading a directory tree of text files.
// Source ids are paths relative to the root with `/` separators.


use chrono::{DateTime, Utc};
use futures::stream::{self, BoxStream, StreamExt, TryStreamExt};
use serde_json::Value;
use std::hash::Hasher;
use std::path::{Path, PathBuf};
use tracing::{debug, warn};
use twox_hash::XxHash64;

use super::{DataSource, DataSourceRecord, PluginCapabilities, PluginMetadata, PluginType};
use crate::database::JsonMap;
use crate::{Result, StoreError};

#[derive(Debug, Clone)]
pub struct FileShareSource {
    name: String,
    root: PathBuf,
    extensions: Vec<String>,
}

impl FileShareSource {
    /// An empty extension list accepts every file
    pub fn new(name: impl Into<String>, root: impl AsRef<Path>, extensions: Vec<String>) -> Self {
        Self {
            name: name.into(),
            root: root.as_ref().to_path_buf(),
            extensions: extensions
                .into_iter()
                .map(|ext| ext.trim_start_matches('.').to_ascii_lowercase())
                .collect(),
        }
    }

    pub fn metadata(&self) -> PluginMetadata {
        PluginMetadata::new(
            self.name.clone(),
            env!("CARGO_PKG_VERSION"),
            PluginType::KnowledgeSource,
        )
        .with_capabilities(PluginCapabilities {
            change_detection: true,
        })
    }

    async fn read_record(&self, relative: String) -> Result<DataSourceRecord> {
        let path = self.root.join(&relative);
        let bytes = tokio::fs::read(&path).await?;
        let file_meta = tokio::fs::metadata(&path).await?;

        let mut metadata = JsonMap::new();
        metadata.insert("path".to_string(), Value::String(relative.clone()));
        metadata.insert("size".to_string(), Value::from(file_meta.len()));
        if let Some(stem) = path.file_stem() {
            metadata.insert(
                "title".to_string(),
                Value::String(stem.to_string_lossy().into_owned()),
            );
        }
        if let Ok(modified) = file_meta.modified() {
            let modified: DateTime<Utc> = modified.into();
            metadata.insert("modified".to_string(), Value::String(modified.to_rfc3339()));
        }

        Ok(DataSourceRecord {
            source_id: relative,
            content: String::from_utf8_lossy(&bytes).into_owned(),
            metadata,
            fingerprint: Some(fingerprint(&bytes)),
        })
    }
}

impl DataSource for FileShareSource {
    fn name(&self) -> &str {
        &self.name
    }

    fn get_data(&self) -> BoxStream<'_, Result<DataSourceRecord>> {
        let root = self.root.clone();
        let extensions = self.extensions.clone();

        stream::once(async move {
            tokio::task::spawn_blocking(move || list_files(&root, &extensions))
                .await
                .map_err(|e| StoreError::Io(std::io::Error::other(e)))?
        })
        .map(|listing| match listing {
            Ok(paths) => stream::iter(paths.into_iter().map(Ok)).left_stream(),
            Err(e) => stream::once(async move { Err(e) }).right_stream(),
        })
        .flatten()
        .and_then(move |relative| self.read_record(relative))
        .boxed()
    }
}

/// Hex XxHash64 of the file contents
pub fn fingerprint(bytes: &[u8]) -> String {
    let mut hasher = XxHash64::with_seed(0);
    hasher.write(bytes);
    format!("{:016x}", hasher.finish())
}

/// Relative paths of every accepted file under `root`, sorted
fn list_files(root: &Path, extensions: &[String]) -> Result<Vec<String>> {
    let mut files = Vec::new();
    let mut pending = vec![root.to_path_buf()];

    while let Some(dir) = pending.pop() {
        for entry in std::fs::read_dir(&dir)? {
            let entry = entry?;
            let file_type = entry.file_type()?;
            let path = entry.path();

            if file_type.is_dir() {
                pending.push(path);
            } else if file_type.is_file() && accepts(&path, extensions) {
                match relative_id(root, &path) {
                    Some(relative) => files.push(relative),
                    None => warn!("Skipping file outside share root: {}", path.display()),
                }
            }
        }
    }

    files.sort();
    debug!("Found {} files under {}", files.len(), root.display());
    Ok(files)
}

fn accepts(path: &Path, extensions: &[String]) -> bool {
    if extensions.is_empty() {
        return true;
    }
    path.extension()
        .map(|ext| ext.to_string_lossy().to_ascii_lowercase())
        .is_some_and(|ext| extensions.contains(&ext))
}

fn relative_id(root: &Path, path: &Path) -> Option<String> {
    let relative = path.strip_prefix(root).ok()?;
    let parts: Vec<String> = relative
        .components()
        .map(|c| c.as_os_str().to_string_lossy().into_owned())
        .collect();
    Some(parts.join("/"))
}
