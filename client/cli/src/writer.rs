//! Client-side staging arena: the buffered writer. Grounded on the teacher's
//! `client/cli/src/sync.rs` stage-then-upload flow and `client/cli/src/api/rest.rs`'s
//! REST transport, retargeted at the CAS engine's commit protocol instead of per-path file
//! sync.

use std::collections::{BTreeMap, VecDeque};
use std::path::Path;

use tangled_common::digest::{compute_key, needs_chunking_with_limit, split_into_chunks_with_limit};
use tangled_common::node::{CollectionNode, FileNode};

use crate::error::ClientError;
use crate::rest::{
    CollectionManifestWire, CommitOutcome, CommitRequestWire, FileManifestWire, InlineFileManifestWire, NodeInfoWire,
    RestClient, TreeResponseWire,
};

/// A staged one-chunk file: the key is the chunk's own key (held in `pending_chunks`), so
/// only the logical content type and size need to be remembered here.
#[derive(Debug, Clone)]
struct PendingInlineFile {
    content_type: String,
    size: u64,
}

/// Default node limit used when no ticket config is in play, matching
/// `tangled_common::digest::CHUNK_SIZE`.
pub const DEFAULT_NODE_LIMIT: usize = tangled_common::digest::CHUNK_SIZE;

/// Bounded retry count for the commit loop: exceeding it is a terminal error.
const MAX_COMMIT_RETRIES: u32 = 3;

/// What a [`PathResolver`] returns for a single path during `put_collection` — a tagged
/// union, not a struct with optional fields.
pub enum ResolvedEntry {
    File { bytes: Vec<u8>, content_type: String },
    /// A pointer to an already-admitted key; not staged by `put_collection`.
    Link(String),
    /// Names of this path's children, resolved recursively.
    Collection(Vec<String>),
}

pub trait PathResolver {
    fn resolve(&self, path: &str) -> anyhow::Result<ResolvedEntry>;
}

/// A filesystem-backed resolver for the `tangle put` CLI command: files become file
/// nodes, directories become collections of their entries.
pub struct FsResolver {
    root: std::path::PathBuf,
}

impl FsResolver {
    pub fn new(root: impl Into<std::path::PathBuf>) -> Self {
        Self { root: root.into() }
    }
}

impl PathResolver for FsResolver {
    fn resolve(&self, path: &str) -> anyhow::Result<ResolvedEntry> {
        let full = self.root.join(path.trim_start_matches('/'));
        let meta = std::fs::metadata(&full)?;
        if meta.is_dir() {
            let mut names = Vec::new();
            for entry in std::fs::read_dir(&full)? {
                names.push(entry?.file_name().to_string_lossy().into_owned());
            }
            names.sort();
            Ok(ResolvedEntry::Collection(names))
        } else {
            let bytes = std::fs::read(&full)?;
            Ok(ResolvedEntry::File {
                content_type: guess_content_type(path),
                bytes,
            })
        }
    }
}

fn guess_content_type(path: &str) -> String {
    match Path::new(path).extension().and_then(|e| e.to_str()) {
        Some("txt") | Some("md") => "text/plain",
        Some("json") => "application/json",
        Some("html") | Some("htm") => "text/html",
        Some("png") => "image/png",
        Some("jpg") | Some("jpeg") => "image/jpeg",
        _ => "application/octet-stream",
    }
    .to_string()
}

/// In-memory staging arena plus the commit protocol driving it against the server. Root
/// key is computed entirely locally, before any network call.
pub struct BufferedWriter {
    rest: RestClient,
    realm: String,
    node_limit: usize,
    pending_chunks: BTreeMap<String, Vec<u8>>,
    pending_files: BTreeMap<String, FileNode>,
    pending_collections: BTreeMap<String, CollectionNode>,
    pending_inline_files: BTreeMap<String, PendingInlineFile>,
    root_key: Option<String>,
}

impl BufferedWriter {
    pub fn new(rest: RestClient, realm: impl Into<String>) -> Self {
        Self {
            rest,
            realm: realm.into(),
            node_limit: DEFAULT_NODE_LIMIT,
            pending_chunks: BTreeMap::new(),
            pending_files: BTreeMap::new(),
            pending_collections: BTreeMap::new(),
            pending_inline_files: BTreeMap::new(),
            root_key: None,
        }
    }

    /// Overrides the chunking threshold, e.g. from a ticket's immutable `config.nodeLimit`.
    pub fn with_node_limit(mut self, node_limit: usize) -> Self {
        self.node_limit = node_limit;
        self
    }

    pub fn has_pending_writes(&self) -> bool {
        !self.pending_chunks.is_empty()
            || !self.pending_files.is_empty()
            || !self.pending_collections.is_empty()
            || !self.pending_inline_files.is_empty()
    }

    pub fn get_pending_keys(&self) -> Vec<String> {
        self.pending_chunks
            .keys()
            .chain(self.pending_files.keys())
            .chain(self.pending_collections.keys())
            .cloned()
            .collect()
    }

    pub fn get_root_key(&self) -> Option<&str> {
        self.root_key.as_deref()
    }

    pub fn discard(&mut self) {
        self.pending_chunks.clear();
        self.pending_files.clear();
        self.pending_collections.clear();
        self.pending_inline_files.clear();
        self.root_key = None;
    }

    /// Stages `bytes` as a file, chunking at `node_limit` if it's too large. A payload that
    /// fits in a single chunk is staged as an inline file — its key *is* the chunk's key,
    /// with no separate `FileNode` manifest wrapping it — rather than always producing a
    /// one-chunk `FileNode`. Records the resulting key as the writer's current root and
    /// returns it.
    pub fn put_file(&mut self, bytes: &[u8], content_type: &str) -> String {
        if !needs_chunking_with_limit(bytes.len(), self.node_limit) {
            let key = compute_key(bytes);
            self.pending_chunks.entry(key.clone()).or_insert_with(|| bytes.to_vec());
            self.pending_inline_files.insert(
                key.clone(),
                PendingInlineFile {
                    content_type: content_type.to_string(),
                    size: bytes.len() as u64,
                },
            );
            self.root_key = Some(key.clone());
            return key;
        }

        let chunk_slices = split_into_chunks_with_limit(bytes, self.node_limit);
        let mut chunk_keys = Vec::with_capacity(chunk_slices.len());
        for chunk in chunk_slices {
            let key = compute_key(chunk);
            self.pending_chunks.entry(key.clone()).or_insert_with(|| chunk.to_vec());
            chunk_keys.push(key);
        }

        let file = FileNode::new(chunk_keys, content_type, bytes.len() as u64);
        let key = file.key();
        self.pending_files.insert(key.clone(), file);
        self.root_key = Some(key.clone());
        key
    }

    /// Recursively stages a DAG under `resolver`, starting at `/`. Files are staged via
    /// `put_file`; collections are staged bottom-up, after all of their children. Links
    /// point to keys already admitted on the server and are not staged.
    pub fn put_collection(&mut self, resolver: &dyn PathResolver) -> anyhow::Result<String> {
        let key = self.stage_path(resolver, "/")?;
        self.root_key = Some(key.clone());
        Ok(key)
    }

    fn stage_path(&mut self, resolver: &dyn PathResolver, path: &str) -> anyhow::Result<String> {
        match resolver.resolve(path)? {
            ResolvedEntry::File { bytes, content_type } => Ok(self.put_file(&bytes, &content_type)),
            ResolvedEntry::Link(key) => Ok(key),
            ResolvedEntry::Collection(names) => {
                let mut children = BTreeMap::new();
                for name in names {
                    let child_path = if path == "/" {
                        format!("/{name}")
                    } else {
                        format!("{}/{}", path.trim_end_matches('/'), name)
                    };
                    let child_key = self.stage_path(resolver, &child_path)?;
                    children.insert(name, child_key);
                }
                let collection = CollectionNode::new(children);
                let key = collection.key();
                self.pending_collections.insert(key.clone(), collection);
                Ok(key)
            }
        }
    }

    /// Commits all staged nodes: upload pending chunks, then POST the file/collection
    /// manifests, retrying only on `missing_nodes` (never on `hash_mismatch`, `forbidden`,
    /// or `invalid_node`) up to `MAX_COMMIT_RETRIES` times. On success, clears staged
    /// state and returns the server's list of newly admitted keys.
    pub async fn commit(&mut self) -> Result<Vec<String>, ClientError> {
        let Some(root) = self.root_key.clone() else {
            return Ok(Vec::new());
        };

        self.upload_chunks(self.pending_chunks.keys().cloned().collect()).await?;

        let mut last_missing = Vec::new();
        for _attempt in 0..MAX_COMMIT_RETRIES {
            let request = self.build_commit_request(&root);
            match self.rest.commit(&self.realm, &request).await? {
                CommitOutcome::Success { committed, .. } => {
                    self.discard();
                    return Ok(committed);
                }
                CommitOutcome::MissingNodes(missing) => {
                    if let Some(unstaged) = missing.iter().find(|k| !self.pending_chunks.contains_key(*k)) {
                        return Err(ClientError::UnstagedMissingNode(unstaged.clone()));
                    }
                    self.upload_chunks(missing.clone()).await?;
                    last_missing = missing;
                }
            }
        }

        Err(ClientError::CommitExhausted {
            attempts: MAX_COMMIT_RETRIES,
            last_missing,
        })
    }

    async fn upload_chunks(&self, keys: Vec<String>) -> Result<(), ClientError> {
        let bar = (keys.len() > 1).then(|| {
            let bar = indicatif::ProgressBar::new(keys.len() as u64);
            bar.set_style(
                indicatif::ProgressStyle::with_template("{bar:40} {pos}/{len} chunks")
                    .unwrap_or_else(|_| indicatif::ProgressStyle::default_bar()),
            );
            bar
        });

        for key in keys {
            let Some(bytes) = self.pending_chunks.get(&key) else { continue };
            let result = self.rest.put_chunk(&self.realm, &key, bytes, "application/octet-stream").await?;
            if result.key != key {
                return Err(ClientError::HashMismatch { key, actual: result.key });
            }
            if let Some(bar) = &bar {
                bar.inc(1);
            }
        }
        if let Some(bar) = bar {
            bar.finish_and_clear();
        }
        Ok(())
    }

    fn build_commit_request(&self, root: &str) -> CommitRequestWire {
        let files = self
            .pending_files
            .iter()
            .map(|(k, f)| {
                (
                    k.clone(),
                    FileManifestWire {
                        chunks: f.chunks.clone(),
                        content_type: f.content_type.clone(),
                        size: f.size,
                    },
                )
            })
            .collect();
        let collections = self
            .pending_collections
            .iter()
            .map(|(k, c)| (k.clone(), CollectionManifestWire { children: c.children.clone() }))
            .collect();
        let inline_files = self
            .pending_inline_files
            .iter()
            .map(|(k, f)| {
                (
                    k.clone(),
                    InlineFileManifestWire {
                        content_type: f.content_type.clone(),
                        size: f.size,
                    },
                )
            })
            .collect();
        CommitRequestWire {
            root: root.to_string(),
            files,
            collections,
            inline_files,
        }
    }

    // -- Staged-read passthrough: tools reading back what they just wrote before
    // committing consult staged state first, then fall through to the server. --

    pub async fn open_file(&self, key: &str) -> Result<Vec<u8>, ClientError> {
        if self.pending_inline_files.contains_key(key) {
            if let Some(bytes) = self.pending_chunks.get(key) {
                return Ok(bytes.clone());
            }
        }
        if let Some(file) = self.pending_files.get(key) {
            let mut out = Vec::with_capacity(file.size as usize);
            for chunk_key in &file.chunks {
                if let Some(bytes) = self.pending_chunks.get(chunk_key) {
                    out.extend_from_slice(bytes);
                } else {
                    out.extend_from_slice(&self.rest.get_raw(&self.realm, chunk_key).await?.bytes);
                }
            }
            return Ok(out);
        }
        Ok(self.rest.get_raw(&self.realm, key).await?.bytes)
    }

    pub async fn get_tree(&self, key: &str) -> Result<TreeResponseWire, ClientError> {
        if self.pending_collections.contains_key(key)
            || self.pending_files.contains_key(key)
            || self.pending_inline_files.contains_key(key)
        {
            return Ok(self.local_tree(key));
        }
        self.rest.get_tree(&self.realm, key, None).await
    }

    fn local_tree(&self, root: &str) -> TreeResponseWire {
        let mut nodes = BTreeMap::new();
        let mut queue = VecDeque::new();
        queue.push_back(root.to_string());
        while let Some(key) = queue.pop_front() {
            if nodes.contains_key(&key) {
                continue;
            }
            if let Some(collection) = self.pending_collections.get(&key) {
                for child in collection.children.values() {
                    queue.push_back(child.clone());
                }
                nodes.insert(
                    key,
                    NodeInfoWire::Collection {
                        size: collection.children.len() as u64,
                        children: collection.children.clone(),
                    },
                );
            } else if let Some(file) = self.pending_files.get(&key) {
                nodes.insert(
                    key,
                    NodeInfoWire::File {
                        size: file.size,
                        content_type: file.content_type.clone(),
                        chunks: file.chunks.len(),
                    },
                );
            } else if let Some(inline) = self.pending_inline_files.get(&key) {
                nodes.insert(
                    key,
                    NodeInfoWire::InlineFile {
                        size: inline.size,
                        content_type: inline.content_type.clone(),
                    },
                );
            }
        }
        TreeResponseWire { nodes, next: None }
    }

    pub async fn get_raw(&self, key: &str) -> Result<Vec<u8>, ClientError> {
        if let Some(file) = self.pending_files.get(key) {
            return Ok(file.canonical_bytes());
        }
        if let Some(collection) = self.pending_collections.get(key) {
            return Ok(collection.canonical_bytes());
        }
        if let Some(bytes) = self.pending_chunks.get(key) {
            return Ok(bytes.clone());
        }
        Ok(self.rest.get_raw(&self.realm, key).await?.bytes)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::rest::Credential;

    fn writer() -> BufferedWriter {
        BufferedWriter::new(RestClient::new("http://localhost:1", Credential::None), "usr_1")
    }

    #[test]
    fn put_file_under_the_limit_is_staged_as_an_inline_file() {
        let mut w = writer().with_node_limit(1024);
        let key = w.put_file(b"hello", "text/plain");
        assert_eq!(w.get_root_key(), Some(key.as_str()));
        assert_eq!(key, compute_key(b"hello"));
        assert_eq!(w.pending_chunks.len(), 1);
        assert!(w.pending_files.is_empty());
        assert_eq!(w.pending_inline_files.len(), 1);
        let inline = w.pending_inline_files.get(&key).unwrap();
        assert_eq!(inline.content_type, "text/plain");
        assert_eq!(inline.size, 5);
    }

    #[test]
    fn put_file_over_the_limit_splits_into_multiple_chunks() {
        let mut w = writer().with_node_limit(1000);
        let data = vec![9u8; 2500];
        w.put_file(&data, "application/octet-stream");
        assert_eq!(w.pending_chunks.len(), 3);
        let file = w.pending_files.values().next().unwrap();
        assert_eq!(file.chunks.len(), 3);
        assert_eq!(file.size, 2500);
    }

    #[test]
    fn root_key_is_computed_before_any_network_call() {
        let mut w = writer();
        assert!(w.get_root_key().is_none());
        let key = w.put_file(b"data", "text/plain");
        assert_eq!(w.get_root_key(), Some(key.as_str()));
    }

    #[test]
    fn discard_clears_all_staged_state() {
        let mut w = writer();
        w.put_file(b"data", "text/plain");
        assert!(w.has_pending_writes());
        w.discard();
        assert!(!w.has_pending_writes());
        assert!(w.get_root_key().is_none());
    }

    struct FakeFs {
        files: BTreeMap<String, (Vec<u8>, String)>,
        dirs: BTreeMap<String, Vec<String>>,
    }

    impl PathResolver for FakeFs {
        fn resolve(&self, path: &str) -> anyhow::Result<ResolvedEntry> {
            if let Some(names) = self.dirs.get(path) {
                return Ok(ResolvedEntry::Collection(names.clone()));
            }
            if let Some((bytes, ct)) = self.files.get(path) {
                return Ok(ResolvedEntry::File {
                    bytes: bytes.clone(),
                    content_type: ct.clone(),
                });
            }
            anyhow::bail!("no such path: {path}")
        }
    }

    #[test]
    fn put_collection_stages_children_before_the_parent() {
        let mut dirs = BTreeMap::new();
        dirs.insert("/".to_string(), vec!["a.txt".to_string()]);
        let mut files = BTreeMap::new();
        files.insert("/a.txt".to_string(), (b"hi".to_vec(), "text/plain".to_string()));
        let fs = FakeFs { files, dirs };

        let mut w = writer();
        let root = w.put_collection(&fs).unwrap();
        assert_eq!(w.get_root_key(), Some(root.as_str()));
        assert_eq!(w.pending_collections.len(), 1);
        assert!(w.pending_files.is_empty());
        assert_eq!(w.pending_inline_files.len(), 1);
        let collection = w.pending_collections.get(&root).unwrap();
        assert!(collection.children.contains_key("a.txt"));
    }

    #[test]
    fn put_collection_honors_link_entries_without_staging_them() {
        let mut dirs = BTreeMap::new();
        dirs.insert("/".to_string(), vec!["linked.bin".to_string()]);
        let fs = FakeFs {
            files: BTreeMap::new(),
            dirs,
        };

        struct LinkFs(FakeFs);
        impl PathResolver for LinkFs {
            fn resolve(&self, path: &str) -> anyhow::Result<ResolvedEntry> {
                if path == "/linked.bin" {
                    return Ok(ResolvedEntry::Link("sha256:deadbeef".to_string()));
                }
                self.0.resolve(path)
            }
        }

        let mut w = writer();
        let root = w.put_collection(&LinkFs(fs)).unwrap();
        let collection = w.pending_collections.get(&root).unwrap();
        assert_eq!(collection.children.get("linked.bin"), Some(&"sha256:deadbeef".to_string()));
        assert!(w.pending_files.is_empty());
    }
}
