//! Bounded breadth-first traversal of a DAG root. Grounded on the teacher's
//! `db/files.rs` listing/traversal style and the bounded-batch cursor pattern used in
//! `db/chunks.rs`, generalized from a flat chunk list to a collection/file tree.

use std::collections::{BTreeMap, VecDeque};

use serde::Serialize;

use tangled_common::node::{decode_collection, decode_file, NodeKind};
use tangled_common::realm::Realm;

use crate::error::AppError;
use crate::storage::blob_store::BlobStore;
use crate::storage::ownership::OwnershipIndex;

/// Display-oriented node info, one per emitted key in a `getTree` response. Keyed by
/// node rather than embedding the key in the value.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "kind", rename_all = "kebab-case")]
pub enum NodeInfo {
    Collection {
        size: u64,
        children: BTreeMap<String, String>,
    },
    File {
        size: u64,
        #[serde(rename = "contentType")]
        content_type: String,
        chunks: usize,
    },
    InlineFile {
        size: u64,
        #[serde(rename = "contentType")]
        content_type: String,
    },
}

pub struct TreeResult {
    pub nodes: BTreeMap<String, NodeInfo>,
    pub next_frontier: Option<String>,
}

/// Breadth-first walk from `root`, bounded by `node_budget`. Children owned by a
/// different realm (or not owned at all) are silently omitted — per spec this is
/// indistinguishable from "not present for this caller", not an error.
pub async fn get_tree(
    ownership: &dyn OwnershipIndex,
    blobs: &dyn BlobStore,
    realm: &Realm,
    root: &str,
    node_budget: usize,
) -> Result<TreeResult, AppError> {
    let mut visited = std::collections::HashSet::new();
    let mut queue = VecDeque::new();
    queue.push_back(root.to_string());
    visited.insert(root.to_string());

    let mut nodes = BTreeMap::new();

    while let Some(key) = queue.pop_front() {
        if nodes.len() >= node_budget {
            return Ok(TreeResult {
                nodes,
                next_frontier: Some(key),
            });
        }

        if !ownership.has_ownership(realm, &key).await? {
            continue;
        }

        let Some((bytes, meta)) = blobs.get(&key).await? else {
            // Owned but not in the blob store would be a backend inconsistency; treat it
            // as absent rather than failing the whole walk.
            continue;
        };

        match NodeKind::from_content_type(&meta.content_type) {
            NodeKind::Collection => {
                let collection = decode_collection(&bytes)
                    .map_err(|e| AppError::Internal(anyhow::anyhow!("corrupt collection {key}: {e}")))?;
                let size = collection.children.len() as u64;
                for child_key in collection.children.values() {
                    if visited.insert(child_key.clone()) {
                        queue.push_back(child_key.clone());
                    }
                }
                nodes.insert(
                    key,
                    NodeInfo::Collection {
                        size,
                        children: collection.children,
                    },
                );
            }
            NodeKind::File => {
                let file = decode_file(&bytes)
                    .map_err(|e| AppError::Internal(anyhow::anyhow!("corrupt file {key}: {e}")))?;
                nodes.insert(
                    key,
                    NodeInfo::File {
                        size: file.size,
                        content_type: file.content_type,
                        chunks: file.chunks.len(),
                    },
                );
                // Chunk children are intentionally never enqueued or expanded into the
                // output map — only file/collection manifests are tree nodes.
            }
            NodeKind::InlineFile => {
                let content_type = meta
                    .logical_content_type
                    .clone()
                    .unwrap_or_else(|| "application/octet-stream".to_string());
                nodes.insert(key, NodeInfo::InlineFile { size: meta.size, content_type });
            }
            NodeKind::Chunk => {
                // A raw chunk reached as a root or child reference outside a file
                // manifest isn't a tree node; skip it silently.
            }
        }
    }

    Ok(TreeResult {
        nodes,
        next_frontier: None,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::blob_store::FsBlobStore;
    use crate::storage::ownership::{CheckOwnershipResult, ListNodesResult, OwnershipRecord};
    use async_trait::async_trait;
    use std::collections::HashSet as StdHashSet;
    use std::sync::Mutex;
    use tangled_common::digest::compute_key;
    use tangled_common::node::{CollectionNode, FileNode, CONTENT_TYPE_COLLECTION, CONTENT_TYPE_FILE};

    struct FakeOwnership {
        owned: Mutex<StdHashSet<String>>,
    }

    #[async_trait]
    impl OwnershipIndex for FakeOwnership {
        async fn has_ownership(&self, _realm: &Realm, key: &str) -> Result<bool, AppError> {
            Ok(self.owned.lock().unwrap().contains(key))
        }
        async fn check_ownership(&self, _realm: &Realm, keys: &[String]) -> Result<CheckOwnershipResult, AppError> {
            let owned = self.owned.lock().unwrap();
            let (found, missing) = keys.iter().cloned().partition(|k| owned.contains(k));
            Ok(CheckOwnershipResult { found, missing })
        }
        async fn add_ownership(
            &self,
            _realm: &Realm,
            key: &str,
            issuer_token_id: &str,
            content_type: &str,
            size: u64,
        ) -> Result<OwnershipRecord, AppError> {
            self.owned.lock().unwrap().insert(key.to_string());
            Ok(OwnershipRecord {
                realm: "usr_1".into(),
                key: key.into(),
                content_type: content_type.into(),
                size,
                created_at: chrono::Utc::now(),
                created_by: issuer_token_id.into(),
            })
        }
        async fn list_nodes(&self, _realm: &Realm, _limit: i64, _cursor: Option<&str>) -> Result<ListNodesResult, AppError> {
            unimplemented!()
        }
    }

    #[tokio::test]
    async fn walk_emits_file_then_collection_and_omits_unowned_children() {
        let dir = tempfile::tempdir().unwrap();
        let blobs = FsBlobStore::new(dir.path());
        let ownership = FakeOwnership {
            owned: Mutex::new(StdHashSet::new()),
        };
        let realm = Realm::user("1");

        let chunk = b"hello";
        let chunk_key = compute_key(chunk);
        blobs.put_with_key(&chunk_key, chunk, "application/octet-stream").await.unwrap().unwrap();
        ownership.add_ownership(&realm, &chunk_key, "usr_1", "application/octet-stream", 5).await.unwrap();

        let file = FileNode::new(vec![chunk_key.clone()], "text/plain", 5);
        let file_key = file.key();
        blobs.put_with_key(&file_key, &file.canonical_bytes(), CONTENT_TYPE_FILE).await.unwrap().unwrap();
        ownership.add_ownership(&realm, &file_key, "usr_1", CONTENT_TYPE_FILE, 5).await.unwrap();

        let mut children = BTreeMap::new();
        children.insert("a.txt".to_string(), file_key.clone());
        children.insert("unowned.txt".to_string(), "sha256:aaaa".to_string());
        let collection = CollectionNode::new(children);
        let collection_key = collection.key();
        blobs
            .put_with_key(&collection_key, &collection.canonical_bytes(), CONTENT_TYPE_COLLECTION)
            .await
            .unwrap()
            .unwrap();
        ownership
            .add_ownership(&realm, &collection_key, "usr_1", CONTENT_TYPE_COLLECTION, 0)
            .await
            .unwrap();

        let result = get_tree(&ownership, &blobs, &realm, &collection_key, 10).await.unwrap();
        assert_eq!(result.nodes.len(), 2);
        assert!(result.nodes.contains_key(&collection_key));
        assert!(result.nodes.contains_key(&file_key));
        assert!(result.next_frontier.is_none());
    }

    #[tokio::test]
    async fn node_budget_returns_a_resumable_frontier() {
        let dir = tempfile::tempdir().unwrap();
        let blobs = FsBlobStore::new(dir.path());
        let ownership = FakeOwnership {
            owned: Mutex::new(StdHashSet::new()),
        };
        let realm = Realm::user("1");

        let mut children = BTreeMap::new();
        for i in 0..3 {
            let file = FileNode::new(vec![compute_key(format!("c{i}").as_bytes())], "text/plain", 1);
            let key = file.key();
            blobs.put_with_key(&key, &file.canonical_bytes(), CONTENT_TYPE_FILE).await.unwrap().unwrap();
            ownership.add_ownership(&realm, &key, "usr_1", CONTENT_TYPE_FILE, 1).await.unwrap();
            children.insert(format!("f{i}.txt"), key);
        }
        let collection = CollectionNode::new(children);
        let collection_key = collection.key();
        blobs
            .put_with_key(&collection_key, &collection.canonical_bytes(), CONTENT_TYPE_COLLECTION)
            .await
            .unwrap()
            .unwrap();
        ownership
            .add_ownership(&realm, &collection_key, "usr_1", CONTENT_TYPE_COLLECTION, 0)
            .await
            .unwrap();

        let result = get_tree(&ownership, &blobs, &realm, &collection_key, 1).await.unwrap();
        assert_eq!(result.nodes.len(), 1);
        assert!(result.next_frontier.is_some());
    }

    #[tokio::test]
    async fn inline_file_reports_its_logical_content_type_not_the_dispatch_label() {
        use tangled_common::node::CONTENT_TYPE_INLINE_FILE;

        let dir = tempfile::tempdir().unwrap();
        let blobs = FsBlobStore::new(dir.path());
        let ownership = FakeOwnership {
            owned: Mutex::new(StdHashSet::new()),
        };
        let realm = Realm::user("1");

        let bytes = b"Hello";
        let key = compute_key(bytes);
        blobs.put_with_key(&key, bytes, "application/octet-stream").await.unwrap().unwrap();
        blobs
            .retag(&key, CONTENT_TYPE_INLINE_FILE, Some("text/plain".to_string()))
            .await
            .unwrap();
        ownership.add_ownership(&realm, &key, "usr_1", CONTENT_TYPE_INLINE_FILE, 5).await.unwrap();

        let result = get_tree(&ownership, &blobs, &realm, &key, 10).await.unwrap();
        match result.nodes.get(&key).unwrap() {
            NodeInfo::InlineFile { size, content_type } => {
                assert_eq!(*size, 5);
                assert_eq!(content_type, "text/plain");
            }
            other => panic!("expected an inline file, got {other:?}"),
        }
    }
}
