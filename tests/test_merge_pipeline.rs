//! Integration tests for the read-merge-write pipeline
//!
//! Documents are JSON arrays of strings; every merge appends one item.

use bytes::Bytes;
use pkgvault::storage::FileStorage;
use pkgvault::{Content, InMemoryStorage, Key, Result, Storage, ValuePipeline, VaultError};
use std::collections::BTreeSet;
use std::sync::Arc;

fn append_item(item: &str) -> impl FnOnce(Option<Bytes>, &mut Vec<u8>) -> Result<()> + Send + '_ {
    move |current, out| {
        let mut items: Vec<String> = match current {
            Some(bytes) => serde_json::from_slice(&bytes).map_err(|e| VaultError::InternalError(e.to_string()))?,
            None => Vec::new(),
        };
        items.push(item.to_string());
        let encoded = serde_json::to_vec(&items).map_err(|e| VaultError::InternalError(e.to_string()))?;
        out.extend_from_slice(&encoded);
        Ok(())
    }
}

async fn items(storage: &dyn Storage, key: &Key) -> BTreeSet<String> {
    let bytes = storage.value(key).await.unwrap().into_bytes().await.unwrap();
    serde_json::from_slice::<Vec<String>>(&bytes).unwrap().into_iter().collect()
}

#[tokio::test]
async fn test_append_to_absent_document() {
    let storage = InMemoryStorage::new();
    let key = Key::new("meta/index.json");
    ValuePipeline::new(&storage, &key).process(append_item("a")).await.unwrap();
    assert_eq!(items(&storage, &key).await, BTreeSet::from(["a".to_string()]));
}

#[tokio::test]
async fn test_merge_is_order_independent() {
    let key = Key::new("meta/index.json");
    let forward = InMemoryStorage::new();
    let backward = InMemoryStorage::new();

    ValuePipeline::new(&forward, &key).process(append_item("a")).await.unwrap();
    ValuePipeline::new(&forward, &key).process(append_item("b")).await.unwrap();
    ValuePipeline::new(&backward, &key).process(append_item("b")).await.unwrap();
    ValuePipeline::new(&backward, &key).process(append_item("a")).await.unwrap();

    assert_eq!(items(&forward, &key).await, items(&backward, &key).await);
    assert_eq!(items(&forward, &key).await.len(), 2);
}

#[tokio::test]
async fn test_failed_merge_leaves_value() {
    let storage = InMemoryStorage::new();
    let key = Key::new("doc");
    storage.save(&key, Content::from_bytes("[\"kept\"]")).await.unwrap();

    let err = ValuePipeline::new(&storage, &key)
        .process(|_, out| {
            out.extend_from_slice(b"partial");
            Err(VaultError::InternalError("merge failed".to_string()))
        })
        .await
        .unwrap_err();
    assert_eq!(err, VaultError::InternalError("merge failed".to_string()));
    assert_eq!(items(&storage, &key).await, BTreeSet::from(["kept".to_string()]));
}

#[tokio::test]
async fn test_concurrent_merges_on_fs_do_not_lose_items() {
    let dir = tempfile::tempdir().unwrap();
    let storage: Arc<dyn Storage> = Arc::new(FileStorage::new(dir.path()).unwrap());
    let key = Key::new("meta/index.json");

    let tasks: Vec<_> = (0..12)
        .map(|i| {
            let storage = storage.clone();
            let key = key.clone();
            tokio::spawn(async move {
                let item = format!("item-{}", i);
                ValuePipeline::new(storage.as_ref(), &key)
                    .process(append_item(&item))
                    .await
            })
        })
        .collect();
    for task in tasks {
        task.await.unwrap().unwrap();
    }

    let expected: BTreeSet<String> = (0..12).map(|i| format!("item-{}", i)).collect();
    assert_eq!(items(storage.as_ref(), &key).await, expected);
}

#[tokio::test]
async fn test_between_reads_one_key_writes_another() {
    let storage = InMemoryStorage::new();
    let (source, target) = (Key::new("staging/doc"), Key::new("published/doc"));
    storage.save(&source, Content::from_bytes("[\"draft\"]")).await.unwrap();

    let count = ValuePipeline::between(&storage, &source, &target)
        .process_with_result(|current, out| {
            let bytes = current.unwrap_or_default();
            let items: Vec<String> = serde_json::from_slice(&bytes).unwrap();
            out.extend_from_slice(&bytes);
            Ok(items.len())
        })
        .await
        .unwrap();

    assert_eq!(count, 1);
    assert_eq!(items(&storage, &target).await, items(&storage, &source).await);
}
