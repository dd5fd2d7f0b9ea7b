//! In-memory document collection mirrored to a JSON-lines file.
//!
//! Every mutation rewrites the whole file through a temporary sibling and a
//! rename, so a crash never leaves a half-written collection behind.

use super::{Document, DurableStore, Filter};
use crate::error::StoreError;
use async_trait::async_trait;
use serde_json::Value;
use std::collections::HashSet;
use std::path::{Path, PathBuf};
use tokio::sync::Mutex;
use tracing::{debug, info};

#[derive(Debug, Default)]
struct State {
    docs: Vec<Document>,
    unique: Vec<Vec<String>>,
}

#[derive(Debug)]
pub struct DocumentStore {
    path: Option<PathBuf>,
    state: Mutex<State>,
}

impl DocumentStore {
    /// Store without a backing file.
    pub fn in_memory() -> Self {
        Self {
            path: None,
            state: Mutex::new(State::default()),
        }
    }

    /// Store backed by `path`. Nothing is read until [`DurableStore::load`].
    pub fn open(path: impl Into<PathBuf>) -> Self {
        Self {
            path: Some(path.into()),
            state: Mutex::new(State::default()),
        }
    }

    pub fn path(&self) -> Option<&Path> {
        self.path.as_deref()
    }

    pub async fn len(&self) -> usize {
        self.state.lock().await.docs.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }

    async fn persist(&self, docs: &[Document]) -> Result<(), StoreError> {
        let Some(path) = &self.path else {
            return Ok(());
        };

        let mut contents = String::new();
        for doc in docs {
            let line = serde_json::to_string(doc).map_err(|e| StoreError::Codec {
                line: 0,
                reason: e.to_string(),
            })?;
            contents.push_str(&line);
            contents.push('\n');
        }

        ensure_parent(path).await?;
        let tmp = path.with_extension("tmp");
        tokio::fs::write(&tmp, contents).await?;
        tokio::fs::rename(&tmp, path).await?;
        Ok(())
    }
}

#[async_trait]
impl DurableStore for DocumentStore {
    async fn ensure_unique_index(&self, fields: &[&str]) -> Result<(), StoreError> {
        let fields: Vec<String> = fields.iter().map(|f| f.to_string()).collect();
        let mut state = self.state.lock().await;
        if state.unique.contains(&fields) {
            return Ok(());
        }

        check_unique(&state.docs, std::slice::from_ref(&fields))?;
        state.unique.push(fields);
        Ok(())
    }

    async fn load(&self) -> Result<usize, StoreError> {
        let mut state = self.state.lock().await;
        let Some(path) = &self.path else {
            return Ok(state.docs.len());
        };

        let contents = match tokio::fs::read_to_string(path).await {
            Ok(contents) => contents,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                info!("📁 Creating empty plant store at {}", path.display());
                ensure_parent(path).await?;
                tokio::fs::write(path, "").await?;
                String::new()
            }
            Err(e) => return Err(e.into()),
        };

        let mut docs = Vec::new();
        for (index, line) in contents.lines().enumerate() {
            if line.trim().is_empty() {
                continue;
            }
            let value: Value = serde_json::from_str(line).map_err(|e| StoreError::Codec {
                line: index + 1,
                reason: e.to_string(),
            })?;
            match value {
                Value::Object(doc) => docs.push(doc),
                other => return Err(StoreError::NotAnObject(other.to_string())),
            }
        }

        check_unique(&docs, &state.unique)?;
        debug!("📦 Loaded {} documents from {}", docs.len(), path.display());
        state.docs = docs;
        Ok(state.docs.len())
    }

    async fn find(&self, filter: &Filter) -> Result<Vec<Document>, StoreError> {
        let state = self.state.lock().await;
        Ok(state
            .docs
            .iter()
            .filter(|doc| filter.matches(doc))
            .cloned()
            .collect())
    }

    async fn insert(&self, docs: Vec<Document>) -> Result<Vec<Document>, StoreError> {
        if docs.is_empty() {
            return Ok(docs);
        }

        let mut state = self.state.lock().await;
        let mut combined = state.docs.clone();
        combined.extend(docs.iter().cloned());
        check_unique(&combined, &state.unique)?;

        self.persist(&combined).await?;
        state.docs = combined;
        Ok(docs)
    }

    async fn remove(&self, filter: &Filter, multi: bool) -> Result<usize, StoreError> {
        let mut state = self.state.lock().await;
        let mut kept = Vec::with_capacity(state.docs.len());
        let mut removed = 0;

        for doc in state.docs.iter() {
            if (multi || removed == 0) && filter.matches(doc) {
                removed += 1;
            } else {
                kept.push(doc.clone());
            }
        }

        if removed > 0 {
            self.persist(&kept).await?;
            state.docs = kept;
        }
        Ok(removed)
    }

    async fn update(&self, filter: &Filter, patch: &Document, multi: bool) -> Result<usize, StoreError> {
        let mut state = self.state.lock().await;
        let mut docs = state.docs.clone();
        let mut updated = 0;

        for doc in docs.iter_mut() {
            if !multi && updated > 0 {
                break;
            }
            if filter.matches(doc) {
                for (key, value) in patch {
                    doc.insert(key.clone(), value.clone());
                }
                updated += 1;
            }
        }

        if updated > 0 {
            check_unique(&docs, &state.unique)?;
            self.persist(&docs).await?;
            state.docs = docs;
        }
        Ok(updated)
    }

    async fn drop_all(&self) -> Result<(), StoreError> {
        let mut state = self.state.lock().await;
        self.persist(&[]).await?;
        state.docs.clear();
        Ok(())
    }

    async fn replace_all(&self, docs: Vec<Document>) -> Result<usize, StoreError> {
        let mut state = self.state.lock().await;
        check_unique(&docs, &state.unique)?;

        self.persist(&docs).await?;
        state.docs = docs;
        Ok(state.docs.len())
    }
}

async fn ensure_parent(path: &Path) -> Result<(), StoreError> {
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        tokio::fs::create_dir_all(parent).await?;
    }
    Ok(())
}

fn check_unique(docs: &[Document], indexes: &[Vec<String>]) -> Result<(), StoreError> {
    for fields in indexes {
        let mut seen = HashSet::with_capacity(docs.len());
        for doc in docs {
            let key = Value::Array(
                fields
                    .iter()
                    .map(|f| doc.get(f).cloned().unwrap_or(Value::Null))
                    .collect(),
            )
            .to_string();
            if !seen.insert(key.clone()) {
                return Err(StoreError::UniqueViolation {
                    fields: fields.clone(),
                    key,
                });
            }
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn plant(x: i64, y: i64, stage: i64) -> Document {
        match json!({"x": x, "y": y, "seed": 0, "stage": stage}) {
            Value::Object(doc) => doc,
            _ => unreachable!(),
        }
    }

    #[tokio::test]
    async fn test_unique_index_rejects_whole_batch() {
        let store = DocumentStore::in_memory();
        store.ensure_unique_index(&["x", "y"]).await.unwrap();

        store.insert(vec![plant(1, 1, 0)]).await.unwrap();
        let result = store.insert(vec![plant(2, 2, 0), plant(1, 1, 3)]).await;
        assert!(matches!(result, Err(StoreError::UniqueViolation { .. })));
        assert_eq!(store.len().await, 1);

        store.insert(vec![plant(1, 2, 0)]).await.unwrap();
        assert_eq!(store.len().await, 2);
    }

    #[tokio::test]
    async fn test_remove_single_and_multi() {
        let store = DocumentStore::in_memory();
        store
            .insert(vec![plant(1, 0, 0), plant(2, 0, 0), plant(3, 0, 1)])
            .await
            .unwrap();

        assert_eq!(store.remove(&Filter::eq("stage", 0), false).await.unwrap(), 1);
        assert_eq!(store.len().await, 2);
        assert_eq!(store.remove(&Filter::All, true).await.unwrap(), 2);
        assert!(store.is_empty().await);
    }

    #[tokio::test]
    async fn test_update_merges_patch() {
        let store = DocumentStore::in_memory();
        store.ensure_unique_index(&["x", "y"]).await.unwrap();
        store.insert(vec![plant(1, 1, 0), plant(2, 2, 0)]).await.unwrap();

        let mut patch = Document::new();
        patch.insert("stage".into(), json!(3));
        assert_eq!(store.update(&Filter::at(1, 1), &patch, true).await.unwrap(), 1);

        let found = store.find(&Filter::eq("stage", 3)).await.unwrap();
        assert_eq!(found, vec![plant(1, 1, 3)]);

        // moving onto an occupied cell violates the index
        let mut collide = Document::new();
        collide.insert("x".into(), json!(2));
        collide.insert("y".into(), json!(2));
        assert!(store.update(&Filter::at(1, 1), &collide, false).await.is_err());
        assert_eq!(store.find(&Filter::at(1, 1)).await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_persists_across_reopen() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("data").join("plants.jsonl");

        let store = DocumentStore::open(&path);
        assert_eq!(store.load().await.unwrap(), 0);
        assert!(path.exists());

        store.insert(vec![plant(1, 1, 0), plant(-5, 7, 2)]).await.unwrap();
        store.remove(&Filter::at(1, 1), false).await.unwrap();

        let reopened = DocumentStore::open(&path);
        reopened.ensure_unique_index(&["x", "y"]).await.unwrap();
        assert_eq!(reopened.load().await.unwrap(), 1);
        assert_eq!(reopened.find(&Filter::All).await.unwrap(), vec![plant(-5, 7, 2)]);

        reopened.drop_all().await.unwrap();
        assert_eq!(DocumentStore::open(&path).load().await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_replace_all_swaps_contents_in_one_write() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("plants.jsonl");

        let store = DocumentStore::open(&path);
        store.ensure_unique_index(&["x", "y"]).await.unwrap();
        store.insert(vec![plant(1, 1, 0), plant(2, 2, 0)]).await.unwrap();

        assert_eq!(store.replace_all(vec![plant(3, 3, 1)]).await.unwrap(), 1);
        assert_eq!(store.find(&Filter::All).await.unwrap(), vec![plant(3, 3, 1)]);
        assert_eq!(DocumentStore::open(&path).load().await.unwrap(), 1);

        // a rejected replacement keeps the old collection, in memory and on disk
        let result = store.replace_all(vec![plant(4, 4, 0), plant(4, 4, 2)]).await;
        assert!(matches!(result, Err(StoreError::UniqueViolation { .. })));
        assert_eq!(store.find(&Filter::All).await.unwrap(), vec![plant(3, 3, 1)]);

        let reopened = DocumentStore::open(&path);
        reopened.load().await.unwrap();
        assert_eq!(reopened.find(&Filter::All).await.unwrap(), vec![plant(3, 3, 1)]);
    }

    #[tokio::test]
    async fn test_load_reports_bad_lines() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("plants.jsonl");
        tokio::fs::write(&path, "{\"x\":1,\"y\":1}\n\nnot json\n").await.unwrap();

        let store = DocumentStore::open(&path);
        match store.load().await {
            Err(StoreError::Codec { line, .. }) => assert_eq!(line, 3),
            other => panic!("unexpected result: {other:?}"),
        }
    }
}
