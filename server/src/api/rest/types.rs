//! Wire request/response types for the CAS, depot and commit-record endpoints. Kept
//! separate from the `cas`/`depot` business-logic modules so the HTTP shape can evolve
//! independently of the in-process types those modules pass around.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::cas::admitter::{CommitInput, SubmittedCollection, SubmittedFile, SubmittedInlineFile};
use crate::cas::commit_record::CommitRecord;
use crate::cas::depot::{Depot, DepotHistoryEntry};
use crate::storage::tree_walker::TreeResult;

#[derive(Debug, Serialize)]
pub struct ChunkUploadResponse {
    pub key: String,
    pub size: u64,
}

#[derive(Debug, Deserialize)]
pub struct FileManifestWire {
    pub chunks: Vec<String>,
    #[serde(rename = "contentType")]
    pub content_type: String,
    pub size: u64,
}

#[derive(Debug, Deserialize)]
pub struct CollectionManifestWire {
    pub children: BTreeMap<String, String>,
    /// Display-only; never fed back into key derivation (DESIGN.md Open Question 1).
    #[serde(default)]
    #[allow(dead_code)]
    pub size: Option<u64>,
}

/// A chunk already uploaded under `/chunk/{key}` that the client declares is, in its own
/// right, a whole file's content — the wire counterpart of `SubmittedInlineFile`.
#[derive(Debug, Deserialize)]
pub struct InlineFileManifestWire {
    #[serde(rename = "contentType")]
    pub content_type: String,
    pub size: u64,
}

#[derive(Debug, Deserialize)]
pub struct CommitRequestBody {
    pub root: String,
    #[serde(default)]
    pub files: BTreeMap<String, FileManifestWire>,
    #[serde(default)]
    pub collections: BTreeMap<String, CollectionManifestWire>,
    #[serde(default, rename = "inlineFiles")]
    pub inline_files: BTreeMap<String, InlineFileManifestWire>,
}

impl From<CommitRequestBody> for CommitInput {
    fn from(body: CommitRequestBody) -> Self {
        CommitInput {
            root: body.root,
            files: body
                .files
                .into_iter()
                .map(|(k, v)| {
                    (
                        k,
                        SubmittedFile {
                            chunks: v.chunks,
                            content_type: v.content_type,
                            size: v.size,
                        },
                    )
                })
                .collect(),
            collections: body
                .collections
                .into_iter()
                .map(|(k, v)| (k, SubmittedCollection { children: v.children }))
                .collect(),
            inline_files: body
                .inline_files
                .into_iter()
                .map(|(k, v)| {
                    (
                        k,
                        SubmittedInlineFile {
                            content_type: v.content_type,
                            size: v.size,
                        },
                    )
                })
                .collect(),
        }
    }
}

#[derive(Debug, Serialize)]
pub struct CommitResponseBody {
    pub success: bool,
    pub root: String,
    pub committed: Vec<String>,
}

#[derive(Debug, Serialize)]
pub struct TreeResponseBody {
    pub nodes: BTreeMap<String, crate::storage::tree_walker::NodeInfo>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub next: Option<String>,
}

impl From<TreeResult> for TreeResponseBody {
    fn from(result: TreeResult) -> Self {
        TreeResponseBody {
            nodes: result.nodes,
            next: result.next_frontier,
        }
    }
}

#[derive(Debug, Serialize)]
pub struct DepotResponse {
    pub id: String,
    pub name: String,
    pub root: String,
    pub version: i64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    pub created_at: chrono::DateTime<chrono::Utc>,
    pub updated_at: chrono::DateTime<chrono::Utc>,
}

impl From<Depot> for DepotResponse {
    fn from(d: Depot) -> Self {
        DepotResponse {
            id: d.id,
            name: d.name,
            root: d.root,
            version: d.version,
            description: d.description,
            created_at: d.created_at,
            updated_at: d.updated_at,
        }
    }
}

#[derive(Debug, Serialize)]
pub struct ListDepotsResponse {
    pub depots: Vec<DepotResponse>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub next: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct CreateDepotRequest {
    pub name: String,
    #[serde(default)]
    pub root: Option<String>,
    #[serde(default)]
    pub description: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct UpdateRootRequest {
    pub root: String,
    #[serde(default)]
    pub message: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct RollbackRequest {
    pub version: i64,
}

#[derive(Debug, Serialize)]
pub struct DepotHistoryResponse {
    pub version: i64,
    pub root: String,
    pub created_at: chrono::DateTime<chrono::Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
}

impl From<DepotHistoryEntry> for DepotHistoryResponse {
    fn from(e: DepotHistoryEntry) -> Self {
        DepotHistoryResponse {
            version: e.version,
            root: e.root,
            created_at: e.created_at,
            message: e.message,
        }
    }
}

#[derive(Debug, Serialize)]
pub struct CommitRecordResponse {
    pub root: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
    pub created_at: chrono::DateTime<chrono::Utc>,
    pub created_by: String,
}

impl From<CommitRecord> for CommitRecordResponse {
    fn from(c: CommitRecord) -> Self {
        CommitRecordResponse {
            root: c.root,
            title: c.title,
            created_at: c.created_at,
            created_by: c.created_by,
        }
    }
}

#[derive(Debug, Deserialize)]
pub struct CreateCommitRequest {
    #[serde(alias = "tree")]
    pub root: String,
    #[serde(default)]
    pub title: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct UpdateCommitTitleRequest {
    pub title: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct TicketResponse {
    pub id: String,
    pub endpoint: String,
    pub expires_at: chrono::DateTime<chrono::Utc>,
    pub realm: String,
    pub scope: crate::auth::token::Scope,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub commit: Option<crate::auth::token::CommitRights>,
    pub config: crate::auth::token::TicketConfig,
}
