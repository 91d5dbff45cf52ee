//! In-memory repository

use super::{Predicate, Record, Repository, StorageError, StorageResult};
use async_trait::async_trait;
use std::sync::{PoisonError, RwLock};
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

/// Vec-backed repository; keeps insertion order
pub struct MemoryRepository<T> {
    records: RwLock<Vec<T>>,
}

impl<T: Record> MemoryRepository<T> {
    pub fn new() -> Self {
        Self {
            records: RwLock::new(Vec::new()),
        }
    }

    /// Seed from existing records, rejecting duplicates
    pub fn from_records(records: Vec<T>) -> StorageResult<Self> {
        let repo = Self::new();
        {
            let mut guard = repo.records.write().unwrap_or_else(PoisonError::into_inner);
            for record in records {
                check_unique(&guard, &record, None)?;
                guard.push(record);
            }
        }
        Ok(repo)
    }
}

impl<T: Record> Default for MemoryRepository<T> {
    fn default() -> Self {
        Self::new()
    }
}

fn ensure_live(cancel: &CancellationToken) -> StorageResult<()> {
    if cancel.is_cancelled() {
        Err(StorageError::Cancelled)
    } else {
        Ok(())
    }
}

/// Reject `record` when another entry (other than `skip`) shares its id or GUID
fn check_unique<T: Record>(records: &[T], record: &T, skip: Option<usize>) -> StorageResult<()> {
    for (idx, existing) in records.iter().enumerate() {
        if Some(idx) == skip {
            continue;
        }
        if existing.id() == record.id() {
            return Err(StorageError::Duplicate(format!("id '{}'", record.id())));
        }
        if existing.guid() == record.guid() {
            return Err(StorageError::Duplicate(format!("guid '{}'", record.guid())));
        }
    }
    Ok(())
}

#[async_trait]
impl<T: Record> Repository<T> for MemoryRepository<T> {
    async fn insert(&self, record: T, cancel: &CancellationToken) -> StorageResult<T> {
        ensure_live(cancel)?;
        let mut records = self.records.write().unwrap_or_else(PoisonError::into_inner);
        check_unique(&records, &record, None)?;
        records.push(record.clone());
        Ok(record)
    }

    async fn select_all(&self, cancel: &CancellationToken) -> StorageResult<Vec<T>> {
        ensure_live(cancel)?;
        Ok(self.records.read().unwrap_or_else(PoisonError::into_inner).clone())
    }

    async fn select_many(
        &self,
        predicate: Predicate<'_, T>,
        cancel: &CancellationToken,
    ) -> StorageResult<Vec<T>> {
        ensure_live(cancel)?;
        Ok(self
            .records
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .iter()
            .filter(|r| predicate(r))
            .cloned()
            .collect())
    }

    async fn select_by_id(&self, id: &str, cancel: &CancellationToken) -> StorageResult<Option<T>> {
        ensure_live(cancel)?;
        Ok(self
            .records
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .iter()
            .find(|r| r.id() == id)
            .cloned())
    }

    async fn select_by_guid(
        &self,
        guid: Uuid,
        cancel: &CancellationToken,
    ) -> StorageResult<Option<T>> {
        ensure_live(cancel)?;
        Ok(self
            .records
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .iter()
            .find(|r| r.guid() == guid)
            .cloned())
    }

    async fn update(&self, record: T, cancel: &CancellationToken) -> StorageResult<T> {
        ensure_live(cancel)?;
        let mut records = self.records.write().unwrap_or_else(PoisonError::into_inner);
        let idx = records
            .iter()
            .position(|r| r.guid() == record.guid())
            .ok_or_else(|| StorageError::NotFound(format!("guid '{}'", record.guid())))?;
        check_unique(&records, &record, Some(idx))?;
        records[idx] = record.clone();
        Ok(record)
    }

    async fn delete(&self, guid: Uuid, cancel: &CancellationToken) -> StorageResult<bool> {
        ensure_live(cancel)?;
        let mut records = self.records.write().unwrap_or_else(PoisonError::into_inner);
        let before = records.len();
        records.retain(|r| r.guid() != guid);
        Ok(records.len() != before)
    }

    async fn delete_many(
        &self,
        predicate: Predicate<'_, T>,
        cancel: &CancellationToken,
    ) -> StorageResult<usize> {
        ensure_live(cancel)?;
        let mut records = self.records.write().unwrap_or_else(PoisonError::into_inner);
        let before = records.len();
        records.retain(|r| !predicate(r));
        Ok(before - records.len())
    }

    async fn exists(&self, guid: Uuid, cancel: &CancellationToken) -> StorageResult<bool> {
        ensure_live(cancel)?;
        Ok(self
            .records
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .iter()
            .any(|r| r.guid() == guid))
    }

    async fn count(&self, cancel: &CancellationToken) -> StorageResult<usize> {
        ensure_live(cancel)?;
        Ok(self.records.read().unwrap_or_else(PoisonError::into_inner).len())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::OriginConfig;

    fn origin(id: &str, port: u16) -> OriginConfig {
        OriginConfig::new(id, "127.0.0.1", port)
    }

    #[tokio::test]
    async fn test_insert_and_select_keeps_order() {
        let repo = MemoryRepository::new();
        let cancel = CancellationToken::new();
        for (id, port) in [("c", 3), ("a", 1), ("b", 2)] {
            repo.insert(origin(id, port), &cancel).await.unwrap();
        }

        let ids: Vec<String> = repo
            .select_all(&cancel)
            .await
            .unwrap()
            .into_iter()
            .map(|o| o.id)
            .collect();
        assert_eq!(ids, vec!["c", "a", "b"]);
        assert_eq!(repo.count(&cancel).await.unwrap(), 3);
    }

    #[tokio::test]
    async fn test_insert_rejects_duplicates() {
        let repo = MemoryRepository::new();
        let cancel = CancellationToken::new();
        let first = origin("o1", 1);
        repo.insert(first.clone(), &cancel).await.unwrap();

        let err = repo.insert(origin("o1", 2), &cancel).await.unwrap_err();
        assert!(matches!(err, StorageError::Duplicate(_)));

        let mut same_guid = origin("o2", 2);
        same_guid.guid = first.guid;
        let err = repo.insert(same_guid, &cancel).await.unwrap_err();
        assert!(matches!(err, StorageError::Duplicate(_)));
    }

    #[tokio::test]
    async fn test_select_by_id_and_guid() {
        let repo = MemoryRepository::new();
        let cancel = CancellationToken::new();
        let o = repo.insert(origin("o1", 1), &cancel).await.unwrap();

        assert_eq!(repo.select_by_id("o1", &cancel).await.unwrap(), Some(o.clone()));
        assert_eq!(repo.select_by_guid(o.guid, &cancel).await.unwrap(), Some(o.clone()));
        assert_eq!(repo.select_by_id("nope", &cancel).await.unwrap(), None);
        assert!(repo.exists(o.guid, &cancel).await.unwrap());
        assert!(!repo.exists(Uuid::new_v4(), &cancel).await.unwrap());
    }

    #[tokio::test]
    async fn test_select_many_and_delete_many() {
        let repo = MemoryRepository::new();
        let cancel = CancellationToken::new();
        for (id, port) in [("a", 80), ("b", 443), ("c", 80)] {
            repo.insert(origin(id, port), &cancel).await.unwrap();
        }

        let on_80 = repo.select_many(&|o: &OriginConfig| o.port == 80, &cancel).await.unwrap();
        assert_eq!(on_80.len(), 2);

        let removed = repo.delete_many(&|o: &OriginConfig| o.port == 80, &cancel).await.unwrap();
        assert_eq!(removed, 2);
        assert_eq!(repo.count(&cancel).await.unwrap(), 1);
    }

    #[tokio::test]
    async fn test_update_and_delete() {
        let repo = MemoryRepository::new();
        let cancel = CancellationToken::new();
        let mut o = repo.insert(origin("o1", 1), &cancel).await.unwrap();
        repo.insert(origin("o2", 2), &cancel).await.unwrap();

        o.port = 9000;
        repo.update(o.clone(), &cancel).await.unwrap();
        assert_eq!(repo.select_by_id("o1", &cancel).await.unwrap().unwrap().port, 9000);

        // Renaming onto an existing id is rejected
        o.id = "o2".to_string();
        assert!(matches!(
            repo.update(o.clone(), &cancel).await.unwrap_err(),
            StorageError::Duplicate(_)
        ));

        let missing = origin("ghost", 1);
        assert!(matches!(
            repo.update(missing, &cancel).await.unwrap_err(),
            StorageError::NotFound(_)
        ));

        assert!(repo.delete(o.guid, &cancel).await.unwrap());
        assert!(!repo.delete(o.guid, &cancel).await.unwrap());
    }

    #[tokio::test]
    async fn test_cancelled_operations_fail() {
        let repo: MemoryRepository<OriginConfig> = MemoryRepository::new();
        let cancel = CancellationToken::new();
        cancel.cancel();

        assert_eq!(
            repo.insert(origin("o1", 1), &cancel).await.unwrap_err(),
            StorageError::Cancelled
        );
        assert_eq!(repo.select_all(&cancel).await.unwrap_err(), StorageError::Cancelled);
        assert_eq!(repo.count(&cancel).await.unwrap_err(), StorageError::Cancelled);
        assert_eq!(repo.count(&CancellationToken::new()).await.unwrap(), 0);
    }

    #[test]
    fn test_from_records_rejects_duplicates() {
        assert!(MemoryRepository::from_records(vec![origin("a", 1), origin("b", 2)]).is_ok());
        assert!(MemoryRepository::from_records(vec![origin("a", 1), origin("a", 2)]).is_err());
    }
}
