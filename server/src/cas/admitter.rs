//! The commit admitter: atomic, all-or-nothing admission of a file/collection manifest
//! into a realm's ownership index.

use std::collections::{BTreeMap, BTreeSet};

use tangled_common::node::{CollectionNode, FileNode, CONTENT_TYPE_COLLECTION, CONTENT_TYPE_FILE, CONTENT_TYPE_INLINE_FILE};
use tangled_common::realm::Realm;

use crate::auth::authenticator::AuthContext;
use crate::auth::token::{CommitRights, Token};
use crate::error::AppError;
use crate::storage::blob_store::BlobStore;
use crate::storage::ownership::OwnershipIndex;

/// A submitted file manifest, as it appears in a commit request body — the same fields
/// as `FileNode` without the `kind` tag, since the wire body never repeats it per entry.
#[derive(Debug, Clone)]
pub struct SubmittedFile {
    pub chunks: Vec<String>,
    pub content_type: String,
    pub size: u64,
}

/// A submitted collection manifest.
#[derive(Debug, Clone)]
pub struct SubmittedCollection {
    pub children: BTreeMap<String, String>,
}

/// A submitted inline file: a chunk already uploaded under `/chunk/{key}` that the
/// client declares should be admitted as a one-chunk file in its own right, per spec
/// §3/§4.B — the key *is* the chunk's key, and `content_type`/`size` describe the file's
/// logical identity rather than being wrapped in a separate `FileNode` manifest.
#[derive(Debug, Clone)]
pub struct SubmittedInlineFile {
    pub content_type: String,
    pub size: u64,
}

pub struct CommitInput {
    pub root: String,
    pub files: BTreeMap<String, SubmittedFile>,
    pub collections: BTreeMap<String, SubmittedCollection>,
    pub inline_files: BTreeMap<String, SubmittedInlineFile>,
}

pub enum CommitOutcome {
    Success { root: String, committed: Vec<String> },
    MissingNodes(Vec<String>),
}

/// Runs the commit pre-checks, reference resolution and admission. The `auth context`'s
/// originating token (when a ticket) is consulted for the accept-list
/// and quota checks; `token` is passed separately because `AuthContext` itself does not
/// carry the ticket's `CommitRights` detail.
pub async fn commit(
    ownership: &dyn OwnershipIndex,
    blobs: &dyn BlobStore,
    auth: &AuthContext,
    token: Option<&Token>,
    realm: &Realm,
    input: CommitInput,
) -> Result<CommitOutcome, AppError> {
    if !auth.can_write {
        return Err(AppError::Forbidden("token does not grant commit rights".into()));
    }

    if let Some(Token::Ticket(ticket)) = token {
        if let Some(CommitRights::Limited { quota, accept_list }) = &ticket.commit {
            if let Some(accept) = accept_list {
                let content_types = input
                    .files
                    .values()
                    .map(|f| &f.content_type)
                    .chain(input.inline_files.values().map(|f| &f.content_type));
                for content_type in content_types {
                    if !accept.iter().any(|prefix| content_type.starts_with(prefix.as_str())) {
                        return Err(AppError::Forbidden(format!(
                            "content type {content_type} not in ticket's accept list"
                        )));
                    }
                }
            }
            let total: u64 = input.files.values().map(|f| f.size).sum::<u64>()
                + input.inline_files.values().map(|f| f.size).sum::<u64>();
            if total > *quota {
                return Err(AppError::QuotaExceeded(format!(
                    "commit of {total} bytes exceeds ticket quota of {quota} bytes"
                )));
            }
        }
    }

    let root_already_owned = ownership.has_ownership(realm, &input.root).await?;
    let root_in_this_commit = input.files.contains_key(&input.root)
        || input.collections.contains_key(&input.root)
        || input.inline_files.contains_key(&input.root);
    if !root_in_this_commit && !root_already_owned {
        return Err(AppError::InvalidRequest(
            "root must appear in files, collections, inline_files, or already be owned".into(),
        ));
    }

    if root_already_owned {
        // Committing a DAG whose root is already owned is a no-op.
        return Ok(CommitOutcome::Success {
            root: input.root,
            committed: vec![],
        });
    }

    // --- reference resolution ---------------------------------------------------
    let mut missing = BTreeSet::new();

    let mut referenced_chunks = BTreeSet::new();
    for file in input.files.values() {
        referenced_chunks.extend(file.chunks.iter().cloned());
    }
    for chunk_key in &referenced_chunks {
        let owned = ownership.has_ownership(realm, chunk_key).await?;
        let uploaded = blobs.exists(chunk_key).await?;
        if !owned && !uploaded {
            missing.insert(chunk_key.clone());
        }
    }

    for inline_key in input.inline_files.keys() {
        let owned = ownership.has_ownership(realm, inline_key).await?;
        let uploaded = blobs.exists(inline_key).await?;
        if !owned && !uploaded {
            missing.insert(inline_key.clone());
        }
    }

    let mut referenced_children = BTreeSet::new();
    for collection in input.collections.values() {
        referenced_children.extend(collection.children.values().cloned());
    }
    for child_key in &referenced_children {
        let in_this_commit = input.files.contains_key(child_key)
            || input.collections.contains_key(child_key)
            || input.inline_files.contains_key(child_key);
        if in_this_commit {
            continue;
        }
        if !ownership.has_ownership(realm, child_key).await? {
            missing.insert(child_key.clone());
        }
    }

    if !missing.is_empty() {
        return Ok(CommitOutcome::MissingNodes(missing.into_iter().collect()));
    }

    // --- validation: every declared key and size must check out *before* anything is
    // admitted. Ownership and blob writes only start once the whole submitted DAG has
    // validated, so a commit that fails validation never leaves partial ownership
    // behind (spec §4.G "do not admit partial state", §5 commit atomicity, §7 "a
    // rejected commit leaves the realm unchanged"). -----------------------------

    for (declared_key, file) in &input.files {
        let node = FileNode::new(file.chunks.clone(), file.content_type.clone(), file.size);
        let derived_key = node.key();
        if &derived_key != declared_key {
            return Err(AppError::InvalidNode(format!(
                "declared file key {declared_key} does not match canonical encoding (derived {derived_key})"
            )));
        }

        let mut chunk_size_sum = 0u64;
        for chunk_key in &file.chunks {
            let (bytes, _) = blobs
                .get(chunk_key)
                .await?
                .ok_or_else(|| AppError::Internal(anyhow::anyhow!("chunk {chunk_key} vanished mid-commit")))?;
            chunk_size_sum += bytes.len() as u64;
        }
        if chunk_size_sum != file.size {
            return Err(AppError::InvalidNode(format!(
                "file {declared_key} declares size {} but its chunks total {chunk_size_sum}",
                file.size
            )));
        }
    }

    for (declared_key, collection) in &input.collections {
        let node = CollectionNode::new(collection.children.clone());
        let derived_key = node.key();
        if &derived_key != declared_key {
            return Err(AppError::InvalidNode(format!(
                "declared collection key {declared_key} does not match canonical encoding (derived {derived_key})"
            )));
        }
    }

    for (declared_key, inline_file) in &input.inline_files {
        let (bytes, _) = blobs
            .get(declared_key)
            .await?
            .ok_or_else(|| AppError::Internal(anyhow::anyhow!("inline file {declared_key} vanished mid-commit")))?;
        if bytes.len() as u64 != inline_file.size {
            return Err(AppError::InvalidNode(format!(
                "inline file {declared_key} declares size {} but its chunk is {} bytes",
                inline_file.size,
                bytes.len()
            )));
        }
    }

    // --- admission: every declared node validated above; now write chunks, inline
    // files, files, then collections bottom-up. ----------------------------------
    let mut committed = Vec::new();

    for chunk_key in &referenced_chunks {
        if input.inline_files.contains_key(chunk_key) {
            // Admitted below as an inline file instead of a plain chunk.
            continue;
        }
        if !ownership.has_ownership(realm, chunk_key).await? {
            let (bytes, _) = blobs
                .get(chunk_key)
                .await?
                .ok_or_else(|| AppError::Internal(anyhow::anyhow!("chunk {chunk_key} vanished mid-commit")))?;
            ownership
                .add_ownership(realm, chunk_key, &auth.token_id, "application/octet-stream", bytes.len() as u64)
                .await?;
            committed.push(chunk_key.clone());
        }
    }

    for (declared_key, inline_file) in &input.inline_files {
        if ownership.has_ownership(realm, declared_key).await? {
            continue;
        }
        blobs
            .retag(declared_key, CONTENT_TYPE_INLINE_FILE, Some(inline_file.content_type.clone()))
            .await?;
        ownership
            .add_ownership(realm, declared_key, &auth.token_id, CONTENT_TYPE_INLINE_FILE, inline_file.size)
            .await?;
        committed.push(declared_key.clone());
    }

    for (declared_key, file) in &input.files {
        let node = FileNode::new(file.chunks.clone(), file.content_type.clone(), file.size);
        blobs
            .put_with_key(declared_key, &node.canonical_bytes(), CONTENT_TYPE_FILE)
            .await?
            .map_err(|mismatch| {
                AppError::Internal(anyhow::anyhow!(
                    "file node encoding hash mismatch: expected {}, got {}",
                    mismatch.expected,
                    mismatch.actual
                ))
            })?;
        ownership
            .add_ownership(realm, declared_key, &auth.token_id, CONTENT_TYPE_FILE, file.size)
            .await?;
        committed.push(declared_key.clone());
    }

    // Collections bottom-up: admit in order of increasing descendant depth so every
    // child a collection references is already owned by the time the collection itself
    // is admitted. A simple fixed-point loop over the (typically small) per-commit
    // collection set avoids needing an explicit topological sort. All keys were already
    // validated above, so this loop only writes.
    let mut remaining: BTreeMap<&String, &SubmittedCollection> = input.collections.iter().collect();
    while !remaining.is_empty() {
        let ready: Vec<String> = remaining
            .iter()
            .filter(|(_, c)| {
                c.children
                    .values()
                    .all(|child| !input.collections.contains_key(child) || committed_contains(&committed, child))
            })
            .map(|(k, _)| (*k).clone())
            .collect();

        if ready.is_empty() {
            return Err(AppError::Internal(anyhow::anyhow!(
                "cyclic or unresolvable collection references in commit"
            )));
        }

        for declared_key in &ready {
            let collection = remaining.remove(declared_key).expect("key came from remaining");
            let node = CollectionNode::new(collection.children.clone());
            blobs
                .put_with_key(declared_key, &node.canonical_bytes(), CONTENT_TYPE_COLLECTION)
                .await?
                .map_err(|mismatch| {
                    AppError::Internal(anyhow::anyhow!(
                        "collection node encoding hash mismatch: expected {}, got {}",
                        mismatch.expected,
                        mismatch.actual
                    ))
                })?;
            let size = node.children.len() as u64;
            ownership
                .add_ownership(realm, declared_key, &auth.token_id, CONTENT_TYPE_COLLECTION, size)
                .await?;
            committed.push(declared_key.clone());
        }
    }

    Ok(CommitOutcome::Success {
        root: input.root,
        committed,
    })
}

fn committed_contains(committed: &[String], key: &str) -> bool {
    committed.iter().any(|k| k == key)
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

    fn write_ctx() -> AuthContext {
        AuthContext {
            token_id: "usr_1".into(),
            user_id: Some("1".into()),
            realm: Realm::user("1"),
            can_read: true,
            can_write: true,
            can_issue_ticket: true,
            allowed_key: None,
        }
    }

    #[tokio::test]
    async fn commit_with_missing_chunk_returns_missing_nodes_and_admits_nothing() {
        let dir = tempfile::tempdir().unwrap();
        let blobs = FsBlobStore::new(dir.path());
        let ownership = FakeOwnership {
            owned: Mutex::new(StdHashSet::new()),
        };
        let realm = Realm::user("1");

        let chunk_key = compute_key(b"unseen");
        let file = FileNode::new(vec![chunk_key.clone()], "text/plain", 6);
        let file_key = file.key();

        let mut files = BTreeMap::new();
        files.insert(
            file_key.clone(),
            SubmittedFile {
                chunks: vec![chunk_key.clone()],
                content_type: "text/plain".into(),
                size: 6,
            },
        );

        let outcome = commit(
            &ownership,
            &blobs,
            &write_ctx(),
            None,
            &realm,
            CommitInput {
                root: file_key.clone(),
                files,
                collections: BTreeMap::new(),
                inline_files: BTreeMap::new(),
            },
        )
        .await
        .unwrap();

        match outcome {
            CommitOutcome::MissingNodes(missing) => assert_eq!(missing, vec![chunk_key]),
            CommitOutcome::Success { .. } => panic!("expected missing_nodes"),
        }
        assert!(!ownership.has_ownership(&realm, &file_key).await.unwrap());
    }

    #[tokio::test]
    async fn commit_admits_chunk_then_file_once_chunk_is_uploaded() {
        let dir = tempfile::tempdir().unwrap();
        let blobs = FsBlobStore::new(dir.path());
        let ownership = FakeOwnership {
            owned: Mutex::new(StdHashSet::new()),
        };
        let realm = Realm::user("1");

        let chunk_bytes = b"hello";
        let chunk_key = compute_key(chunk_bytes);
        blobs.put_with_key(&chunk_key, chunk_bytes, "application/octet-stream").await.unwrap().unwrap();

        let file = FileNode::new(vec![chunk_key.clone()], "text/plain", 5);
        let file_key = file.key();
        let mut files = BTreeMap::new();
        files.insert(
            file_key.clone(),
            SubmittedFile {
                chunks: vec![chunk_key.clone()],
                content_type: "text/plain".into(),
                size: 5,
            },
        );

        let outcome = commit(
            &ownership,
            &blobs,
            &write_ctx(),
            None,
            &realm,
            CommitInput {
                root: file_key.clone(),
                files,
                collections: BTreeMap::new(),
                inline_files: BTreeMap::new(),
            },
        )
        .await
        .unwrap();

        match outcome {
            CommitOutcome::Success { root, committed } => {
                assert_eq!(root, file_key);
                assert_eq!(committed.len(), 2);
            }
            CommitOutcome::MissingNodes(m) => panic!("unexpected missing nodes: {m:?}"),
        }
        assert!(ownership.has_ownership(&realm, &file_key).await.unwrap());
        assert!(ownership.has_ownership(&realm, &chunk_key).await.unwrap());
    }

    #[tokio::test]
    async fn commit_of_already_owned_root_is_a_no_op() {
        let dir = tempfile::tempdir().unwrap();
        let blobs = FsBlobStore::new(dir.path());
        let ownership = FakeOwnership {
            owned: Mutex::new(StdHashSet::new()),
        };
        let realm = Realm::user("1");
        ownership.add_ownership(&realm, "sha256:already", "usr_1", CONTENT_TYPE_COLLECTION, 0).await.unwrap();

        let outcome = commit(
            &ownership,
            &blobs,
            &write_ctx(),
            None,
            &realm,
            CommitInput {
                root: "sha256:already".into(),
                files: BTreeMap::new(),
                collections: BTreeMap::new(),
                inline_files: BTreeMap::new(),
            },
        )
        .await
        .unwrap();

        match outcome {
            CommitOutcome::Success { committed, .. } => assert!(committed.is_empty()),
            CommitOutcome::MissingNodes(_) => panic!("expected success"),
        }
    }

    #[tokio::test]
    async fn read_only_context_is_forbidden_from_committing() {
        let dir = tempfile::tempdir().unwrap();
        let blobs = FsBlobStore::new(dir.path());
        let ownership = FakeOwnership {
            owned: Mutex::new(StdHashSet::new()),
        };
        let realm = Realm::user("1");
        let mut ctx = write_ctx();
        ctx.can_write = false;

        let result = commit(
            &ownership,
            &blobs,
            &ctx,
            None,
            &realm,
            CommitInput {
                root: "sha256:whatever".into(),
                files: BTreeMap::new(),
                collections: BTreeMap::new(),
                inline_files: BTreeMap::new(),
            },
        )
        .await;

        assert!(matches!(result, Err(AppError::Forbidden(_))));
    }

    #[tokio::test]
    async fn commit_admits_a_sub_limit_chunk_as_an_inline_file() {
        let dir = tempfile::tempdir().unwrap();
        let blobs = FsBlobStore::new(dir.path());
        let ownership = FakeOwnership {
            owned: Mutex::new(StdHashSet::new()),
        };
        let realm = Realm::user("1");

        let bytes = b"Hello";
        let key = compute_key(bytes);
        blobs.put_with_key(&key, bytes, "application/octet-stream").await.unwrap().unwrap();

        let mut inline_files = BTreeMap::new();
        inline_files.insert(
            key.clone(),
            SubmittedInlineFile {
                content_type: "text/plain".into(),
                size: bytes.len() as u64,
            },
        );

        let outcome = commit(
            &ownership,
            &blobs,
            &write_ctx(),
            None,
            &realm,
            CommitInput {
                root: key.clone(),
                files: BTreeMap::new(),
                collections: BTreeMap::new(),
                inline_files,
            },
        )
        .await
        .unwrap();

        match outcome {
            CommitOutcome::Success { root, committed } => {
                assert_eq!(root, key);
                assert_eq!(committed, vec![key.clone()]);
            }
            CommitOutcome::MissingNodes(m) => panic!("unexpected missing nodes: {m:?}"),
        }
        assert!(ownership.has_ownership(&realm, &key).await.unwrap());
        let (stored_bytes, meta) = blobs.get(&key).await.unwrap().unwrap();
        assert_eq!(stored_bytes, bytes);
        assert_eq!(meta.content_type, CONTENT_TYPE_INLINE_FILE);
        assert_eq!(meta.logical_content_type.as_deref(), Some("text/plain"));
    }

    #[tokio::test]
    async fn commit_with_mismatched_file_key_admits_nothing() {
        let dir = tempfile::tempdir().unwrap();
        let blobs = FsBlobStore::new(dir.path());
        let ownership = FakeOwnership {
            owned: Mutex::new(StdHashSet::new()),
        };
        let realm = Realm::user("1");

        let chunk_bytes = b"hello";
        let chunk_key = compute_key(chunk_bytes);
        blobs.put_with_key(&chunk_key, chunk_bytes, "application/octet-stream").await.unwrap().unwrap();

        let mut files = BTreeMap::new();
        let bogus_key = "sha256:0000000000000000000000000000000000000000000000000000000000000000";
        files.insert(
            bogus_key.to_string(),
            SubmittedFile {
                chunks: vec![chunk_key.clone()],
                content_type: "text/plain".into(),
                size: 5,
            },
        );

        let result = commit(
            &ownership,
            &blobs,
            &write_ctx(),
            None,
            &realm,
            CommitInput {
                root: bogus_key.to_string(),
                files,
                collections: BTreeMap::new(),
                inline_files: BTreeMap::new(),
            },
        )
        .await;

        assert!(matches!(result, Err(AppError::InvalidNode(_))));
        assert!(!ownership.has_ownership(&realm, &chunk_key).await.unwrap());
        assert!(!ownership.has_ownership(&realm, bogus_key).await.unwrap());
    }
}
