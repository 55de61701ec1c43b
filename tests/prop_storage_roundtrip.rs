// Property: saved values read back unchanged, deleted values are gone
//
// Checked against the in-memory and filesystem backends with the same
// generated keys and bodies.

use pkgvault::storage::FileStorage;
use pkgvault::{Content, InMemoryStorage, Key, Storage};
use proptest::prelude::*;
use tokio::runtime::Runtime;

fn key_strategy() -> impl Strategy<Value = String> {
    "[a-z0-9]{1,6}(/[a-z0-9._-]{1,6}){0,3}".prop_filter("no dot segments", |path| {
        path.split('/').all(|segment| segment != "." && segment != "..")
    })
}

async fn check_roundtrip(storage: &dyn Storage, key: &Key, data: &[u8]) -> Result<(), TestCaseError> {
    prop_assert!(!storage.exists(key).await.unwrap());
    prop_assert!(storage.value(key).await.unwrap_err().is_not_found());

    storage.save(key, Content::from_bytes(data.to_vec())).await.unwrap();
    prop_assert!(storage.exists(key).await.unwrap());
    prop_assert_eq!(storage.size(key).await.unwrap(), data.len() as u64);
    let read = storage.value(key).await.unwrap().into_bytes().await.unwrap();
    prop_assert_eq!(&read[..], data);

    storage.delete(key).await.unwrap();
    prop_assert!(!storage.exists(key).await.unwrap());
    prop_assert!(storage.delete(key).await.unwrap_err().is_not_found());
    Ok(())
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(64))]

    #[test]
    fn prop_memory_roundtrip(path in key_strategy(), data in prop::collection::vec(any::<u8>(), 0..512)) {
        let rt = Runtime::new().unwrap();
        let storage = InMemoryStorage::new();
        rt.block_on(check_roundtrip(&storage, &Key::new(&path), &data))?;
    }

    #[test]
    fn prop_fs_roundtrip(path in key_strategy(), data in prop::collection::vec(any::<u8>(), 0..512)) {
        let rt = Runtime::new().unwrap();
        let dir = tempfile::tempdir().unwrap();
        let storage = FileStorage::new(dir.path()).unwrap();
        rt.block_on(check_roundtrip(&storage, &Key::new(&path), &data))?;
    }

    #[test]
    fn prop_list_returns_saved_keys_sorted(paths in prop::collection::btree_set("[a-c]{1,2}/[a-c]{1,2}", 1..10)) {
        let rt = Runtime::new().unwrap();
        let storage = InMemoryStorage::new();
        let listed = rt.block_on(async {
            for path in &paths {
                storage.save(&Key::new(path), Content::from_bytes("x")).await.unwrap();
            }
            storage.list(&Key::ROOT).await.unwrap()
        });
        let mut expected: Vec<Key> = paths.iter().map(Key::new).collect();
        expected.sort();
        prop_assert_eq!(listed, expected);
    }
}

#[tokio::test]
async fn test_fs_list_and_delete_all() {
    let dir = tempfile::tempdir().unwrap();
    let storage = FileStorage::new(dir.path()).unwrap();
    for path in ["org/a/1.jar", "org/a/2.jar", "org/b/1.jar", "other/x"] {
        storage.save(&Key::new(path), Content::from_bytes(path)).await.unwrap();
    }

    assert_eq!(
        storage.list(&Key::new("org/a")).await.unwrap(),
        vec![Key::new("org/a/1.jar"), Key::new("org/a/2.jar")]
    );
    assert!(storage.list(&Key::new("missing")).await.unwrap().is_empty());

    storage.delete_all(&Key::new("org")).await.unwrap();
    assert_eq!(storage.list(&Key::ROOT).await.unwrap(), vec![Key::new("other/x")]);
    storage.delete_all(&Key::new("nothing/here")).await.unwrap();
}

#[tokio::test]
async fn test_move_overwrites_destination() {
    let storage = InMemoryStorage::new();
    let (from, to) = (Key::new("a"), Key::new("b"));
    storage.save(&from, Content::from_bytes("new")).await.unwrap();
    storage.save(&to, Content::from_bytes("old")).await.unwrap();

    storage.move_to(&from, &to).await.unwrap();
    assert!(!storage.exists(&from).await.unwrap());
    assert_eq!(&storage.value(&to).await.unwrap().into_bytes().await.unwrap()[..], b"new");
    assert!(storage.move_to(&from, &to).await.unwrap_err().is_not_found());
}
