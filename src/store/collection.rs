//! A single JSON-backed document collection.

use std::collections::hash_map::Values;
use std::collections::HashMap;
use std::path::{Path, PathBuf};

use serde::de::DeserializeOwned;
use serde::Serialize;
use tokio::sync::RwLock;

use super::{StoreError, StoreResult};

/// A document that can live in a [`Collection`].
pub trait Document: Clone + Serialize + DeserializeOwned + Send + Sync + 'static {
    /// Collection name, also used as the file stem on disk.
    const COLLECTION: &'static str;

    /// Primary key. Must not change once the document is stored.
    fn key(&self) -> String;
}

/// In-memory map of documents, optionally mirrored to `{dir}/{COLLECTION}.json`.
pub struct Collection<T: Document> {
    docs: RwLock<HashMap<String, T>>,
    storage_path: Option<PathBuf>,
}

impl<T: Document> Collection<T> {
    /// Collection that is never written to disk.
    pub fn in_memory() -> Self {
        Self {
            docs: RwLock::new(HashMap::new()),
            storage_path: None,
        }
    }

    /// Open the collection file under `dir`, loading existing documents.
    pub async fn open(dir: &Path) -> StoreResult<Self> {
        let storage_path = dir.join(format!("{}.json", T::COLLECTION));

        let docs = if tokio::fs::try_exists(&storage_path).await? {
            let contents = tokio::fs::read_to_string(&storage_path).await?;
            let loaded: Vec<T> =
                serde_json::from_str(&contents).map_err(|source| StoreError::Corrupt {
                    collection: T::COLLECTION,
                    source,
                })?;
            tracing::debug!(
                collection = T::COLLECTION,
                count = loaded.len(),
                "Loaded collection from {}",
                storage_path.display()
            );
            loaded.into_iter().map(|d| (d.key(), d)).collect()
        } else {
            HashMap::new()
        };

        Ok(Self {
            docs: RwLock::new(docs),
            storage_path: Some(storage_path),
        })
    }

    /// Write the whole collection. Called with the write lock held so that
    /// concurrent mutations hit the disk in the same order as memory.
    async fn persist(&self, docs: &HashMap<String, T>) -> StoreResult<()> {
        let Some(path) = &self.storage_path else {
            return Ok(());
        };

        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }

        let values: Vec<&T> = docs.values().collect();
        let contents = serde_json::to_string_pretty(&values)?;

        let tmp = path.with_extension("json.tmp");
        tokio::fs::write(&tmp, contents).await?;
        tokio::fs::rename(&tmp, path).await?;
        Ok(())
    }

    /// Make `next` the collection content once it is on disk. Memory is
    /// left untouched when the write fails.
    async fn commit(&self, docs: &mut HashMap<String, T>, next: HashMap<String, T>) -> StoreResult<()> {
        self.persist(&next).await?;
        *docs = next;
        Ok(())
    }

    /// Insert a new document. Fails if the key is already taken.
    pub async fn insert(&self, doc: T) -> StoreResult<T> {
        self.insert_if(doc, |_| Ok::<(), StoreError>(())).await
    }

    /// Insert a new document if `guard` accepts the documents already
    /// stored. The check and the insert happen under one write lock.
    pub async fn insert_if<E, G>(&self, doc: T, guard: G) -> Result<T, E>
    where
        E: From<StoreError>,
        G: FnOnce(Values<'_, String, T>) -> Result<(), E>,
    {
        let key = doc.key();
        let mut docs = self.docs.write().await;
        guard(docs.values())?;
        if docs.contains_key(&key) {
            return Err(StoreError::Duplicate {
                collection: T::COLLECTION,
                key,
            }
            .into());
        }
        let mut next = docs.clone();
        next.insert(key, doc.clone());
        self.commit(&mut docs, next).await?;
        Ok(doc)
    }

    /// Insert or replace a document by key.
    pub async fn upsert(&self, doc: T) -> StoreResult<()> {
        let mut docs = self.docs.write().await;
        let mut next = docs.clone();
        next.insert(doc.key(), doc);
        self.commit(&mut docs, next).await
    }

    pub async fn get(&self, key: &str) -> Option<T> {
        self.docs.read().await.get(key).cloned()
    }

    pub async fn all(&self) -> Vec<T> {
        self.docs.read().await.values().cloned().collect()
    }

    pub async fn find<F>(&self, pred: F) -> Vec<T>
    where
        F: Fn(&T) -> bool,
    {
        self.docs
            .read()
            .await
            .values()
            .filter(|d| pred(d))
            .cloned()
            .collect()
    }

    pub async fn find_one<F>(&self, pred: F) -> Option<T>
    where
        F: Fn(&T) -> bool,
    {
        self.docs.read().await.values().find(|d| pred(d)).cloned()
    }

    pub async fn count<F>(&self, pred: F) -> usize
    where
        F: Fn(&T) -> bool,
    {
        self.docs.read().await.values().filter(|d| pred(d)).count()
    }

    pub async fn len(&self) -> usize {
        self.docs.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.docs.read().await.is_empty()
    }

    /// Apply `f` to the document with `key`. Returns the updated document,
    /// or `None` if there is no such key.
    pub async fn update<F>(&self, key: &str, f: F) -> StoreResult<Option<T>>
    where
        F: FnOnce(&mut T),
    {
        let mut docs = self.docs.write().await;
        if !docs.contains_key(key) {
            return Ok(None);
        }
        let mut next = docs.clone();
        let Some(doc) = next.get_mut(key) else {
            return Ok(None);
        };
        f(doc);
        let updated = doc.clone();
        self.commit(&mut docs, next).await?;
        Ok(Some(updated))
    }

    /// Apply `f` to every matching document. Returns how many matched.
    pub async fn update_where<P, F>(&self, pred: P, mut f: F) -> StoreResult<usize>
    where
        P: Fn(&T) -> bool,
        F: FnMut(&mut T),
    {
        let mut docs = self.docs.write().await;
        let mut next = docs.clone();
        let mut matched = 0;
        for doc in next.values_mut().filter(|d| pred(d)) {
            f(doc);
            matched += 1;
        }
        if matched > 0 {
            self.commit(&mut docs, next).await?;
        }
        Ok(matched)
    }

    pub async fn delete(&self, key: &str) -> StoreResult<Option<T>> {
        let mut docs = self.docs.write().await;
        if !docs.contains_key(key) {
            return Ok(None);
        }
        let mut next = docs.clone();
        let removed = next.remove(key);
        self.commit(&mut docs, next).await?;
        Ok(removed)
    }

    /// Remove every matching document. Returns how many were removed.
    pub async fn delete_where<P>(&self, pred: P) -> StoreResult<usize>
    where
        P: Fn(&T) -> bool,
    {
        let mut docs = self.docs.write().await;
        let mut next = docs.clone();
        next.retain(|_, d| !pred(d));
        let removed = docs.len() - next.len();
        if removed > 0 {
            self.commit(&mut docs, next).await?;
        }
        Ok(removed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde::Deserialize;
    use tempfile::tempdir;

    #[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
    struct Note {
        id: String,
        body: String,
        pinned: bool,
    }

    impl Document for Note {
        const COLLECTION: &'static str = "notes";

        fn key(&self) -> String {
            self.id.clone()
        }
    }

    fn note(id: &str, pinned: bool) -> Note {
        Note {
            id: id.to_string(),
            body: format!("body of {}", id),
            pinned,
        }
    }

    #[tokio::test]
    async fn test_insert_rejects_duplicate_key() {
        let notes = Collection::<Note>::in_memory();
        notes.insert(note("a", false)).await.unwrap();

        let err = notes.insert(note("a", true)).await.unwrap_err();
        assert!(matches!(err, StoreError::Duplicate { key, .. } if key == "a"));
        assert_eq!(notes.len().await, 1);
    }

    #[tokio::test]
    async fn test_update_and_delete_where() {
        let notes = Collection::<Note>::in_memory();
        for (id, pinned) in [("a", true), ("b", false), ("c", true)] {
            notes.insert(note(id, pinned)).await.unwrap();
        }

        let updated = notes
            .update("b", |n| n.body = "edited".to_string())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(updated.body, "edited");
        assert!(notes.update("missing", |_| {}).await.unwrap().is_none());

        assert_eq!(notes.count(|n| n.pinned).await, 2);
        assert_eq!(notes.delete_where(|n| n.pinned).await.unwrap(), 2);
        assert_eq!(notes.all().await, vec![updated]);
    }

    #[tokio::test]
    async fn test_survives_reopen() {
        let temp = tempdir().unwrap();
        {
            let notes = Collection::<Note>::open(temp.path()).await.unwrap();
            notes.insert(note("a", true)).await.unwrap();
            notes.insert(note("b", false)).await.unwrap();
            notes.delete("b").await.unwrap();
        }

        let reopened = Collection::<Note>::open(temp.path()).await.unwrap();
        assert_eq!(reopened.len().await, 1);
        assert_eq!(reopened.get("a").await, Some(note("a", true)));
        assert!(temp.path().join("notes.json").exists());
    }

    #[tokio::test]
    async fn test_insert_if_checks_existing_documents() {
        let notes = Collection::<Note>::in_memory();
        notes.insert(note("a", true)).await.unwrap();

        fn only_one_pinned(mut existing: Values<'_, String, Note>) -> StoreResult<()> {
            if existing.any(|n| n.pinned) {
                Err(StoreError::Duplicate {
                    collection: "notes",
                    key: "pinned".to_string(),
                })
            } else {
                Ok(())
            }
        }
        assert!(notes.insert_if(note("b", true), only_one_pinned).await.is_err());
        assert!(notes.insert_if(note("c", false), only_one_pinned).await.is_ok());
        assert_eq!(notes.len().await, 2);
        assert!(notes.get("b").await.is_none());
    }

    #[tokio::test]
    async fn test_failed_write_leaves_memory_unchanged() {
        let temp = tempdir().unwrap();
        let notes = Collection::<Note>::open(temp.path()).await.unwrap();
        notes.insert(note("a", false)).await.unwrap();

        // A directory where the temp file goes makes every write fail.
        let blocker = temp.path().join("notes.json.tmp");
        std::fs::create_dir(&blocker).unwrap();

        assert!(notes.insert(note("b", false)).await.is_err());
        assert!(notes.get("b").await.is_none());
        assert!(notes.update("a", |n| n.pinned = true).await.is_err());
        assert!(!notes.get("a").await.unwrap().pinned);
        assert!(notes.delete("a").await.is_err());
        assert!(notes.delete_where(|_| true).await.is_err());
        assert_eq!(notes.len().await, 1);

        std::fs::remove_dir(&blocker).unwrap();
        notes.insert(note("b", false)).await.unwrap();
        let reopened = Collection::<Note>::open(temp.path()).await.unwrap();
        assert_eq!(reopened.len().await, 2);
    }

    #[tokio::test]
    async fn test_corrupt_file_is_reported() {
        let temp = tempdir().unwrap();
        std::fs::write(temp.path().join("notes.json"), "{ not json").unwrap();

        let result = Collection::<Note>::open(temp.path()).await;
        assert!(matches!(result, Err(StoreError::Corrupt { collection: "notes", .. })));
    }
}
