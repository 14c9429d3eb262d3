//! Thin REST transport over the tangled CAS engine's HTTP surface. Grounded on
//! the teacher's `client/cli/src/api/rest.rs` (a `reqwest`-based client with one method per
//! endpoint, bailing with the response body on a non-2xx status).

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use tangled_common::error::ErrorBody;

use crate::error::ClientError;

/// How a request authenticates: a user/agent bearer, or a ticket id sent via the
/// `Authorization: Ticket <id>` header. A ticket may also be addressed purely
/// through the `tkt_<id>` realm path segment, in which case callers pass `Credential::None`
/// and put the ticket id directly in the realm they hand to each call.
#[derive(Debug, Clone)]
pub enum Credential {
    Bearer(String),
    Ticket(String),
    None,
}

#[derive(Debug, Clone)]
pub struct RestClient {
    base_url: String,
    http: reqwest::Client,
    credential: Credential,
}

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct FileManifestWire {
    pub chunks: Vec<String>,
    #[serde(rename = "contentType")]
    pub content_type: String,
    pub size: u64,
}

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct CollectionManifestWire {
    pub children: BTreeMap<String, String>,
}

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct InlineFileManifestWire {
    #[serde(rename = "contentType")]
    pub content_type: String,
    pub size: u64,
}

#[derive(Debug, Serialize)]
pub struct CommitRequestWire {
    pub root: String,
    pub files: BTreeMap<String, FileManifestWire>,
    pub collections: BTreeMap<String, CollectionManifestWire>,
    #[serde(rename = "inlineFiles")]
    pub inline_files: BTreeMap<String, InlineFileManifestWire>,
}

#[derive(Debug, Deserialize)]
pub struct CommitResponseWire {
    pub success: bool,
    pub root: String,
    pub committed: Vec<String>,
}

/// Outcome of a single `commit` HTTP call, before the buffered writer's retry loop decides
/// what to do with it.
pub enum CommitOutcome {
    Success { root: String, committed: Vec<String> },
    MissingNodes(Vec<String>),
}

#[derive(Debug, Deserialize)]
pub struct ChunkUploadResponseWire {
    pub key: String,
    pub size: u64,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "kind", rename_all = "kebab-case")]
pub enum NodeInfoWire {
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

#[derive(Debug, Deserialize)]
pub struct TreeResponseWire {
    pub nodes: BTreeMap<String, NodeInfoWire>,
    #[serde(default)]
    pub next: Option<String>,
}

pub struct RawNode {
    pub bytes: Vec<u8>,
    pub cas_content_type: String,
    pub cas_size: u64,
}

#[derive(Debug, Deserialize, Clone)]
pub struct DepotWire {
    pub id: String,
    pub name: String,
    pub root: String,
    pub version: i64,
    pub description: Option<String>,
    pub created_at: chrono::DateTime<chrono::Utc>,
    pub updated_at: chrono::DateTime<chrono::Utc>,
}

#[derive(Debug, Deserialize)]
pub struct ListDepotsResponseWire {
    pub depots: Vec<DepotWire>,
    pub next: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct DepotHistoryEntryWire {
    pub version: i64,
    pub root: String,
    pub created_at: chrono::DateTime<chrono::Utc>,
    pub message: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct CommitRecordWire {
    pub root: String,
    pub title: Option<String>,
    pub created_at: chrono::DateTime<chrono::Utc>,
    pub created_by: String,
}

#[derive(Debug, Serialize)]
struct LoginRequestWire<'a> {
    username: &'a str,
    password: &'a str,
}

#[derive(Debug, Deserialize)]
pub struct LoginResponseWire {
    pub bearer: String,
    pub realm: String,
}

impl RestClient {
    pub fn new(base_url: impl Into<String>, credential: Credential) -> Self {
        Self {
            base_url: base_url.into().trim_end_matches('/').to_string(),
            http: reqwest::Client::new(),
            credential,
        }
    }

    fn authorize(&self, builder: reqwest::RequestBuilder) -> reqwest::RequestBuilder {
        match &self.credential {
            Credential::Bearer(token) => builder.bearer_auth(token),
            Credential::Ticket(id) => builder.header("Authorization", format!("Ticket {id}")),
            Credential::None => builder,
        }
    }

    async fn error_from_response(resp: reqwest::Response) -> ClientError {
        let status = resp.status().as_u16();
        match resp.json::<ErrorBody>().await {
            Ok(body) => ClientError::Server {
                status,
                code: format!("{:?}", body.error),
                message: body.message,
            },
            Err(_) => ClientError::Server {
                status,
                code: "unknown".into(),
                message: "non-JSON error body".into(),
            },
        }
    }

    // -- Auth --

    pub async fn login(&self, username: &str, password: &str) -> Result<LoginResponseWire, ClientError> {
        let url = format!("{}/auth/login", self.base_url);
        let resp = self
            .http
            .post(&url)
            .json(&LoginRequestWire { username, password })
            .send()
            .await
            .map_err(|source| ClientError::Request { url: url.clone(), source })?;
        if !resp.status().is_success() {
            return Err(Self::error_from_response(resp).await);
        }
        Ok(resp.json().await.map_err(|source| ClientError::Request { url, source })?)
    }

    // -- CAS data plane --

    pub async fn put_chunk(
        &self,
        realm: &str,
        key: &str,
        bytes: &[u8],
        content_type: &str,
    ) -> Result<ChunkUploadResponseWire, ClientError> {
        let url = format!("{}/cas/{}/chunk/{}", self.base_url, realm, key);
        let resp = self
            .authorize(self.http.put(&url))
            .header("Content-Type", content_type)
            .body(bytes.to_vec())
            .send()
            .await
            .map_err(|source| ClientError::Request { url: url.clone(), source })?;
        if !resp.status().is_success() {
            return Err(Self::error_from_response(resp).await);
        }
        Ok(resp.json().await.map_err(|source| ClientError::Request { url, source })?)
    }

    pub async fn commit(&self, realm: &str, request: &CommitRequestWire) -> Result<CommitOutcome, ClientError> {
        let url = format!("{}/cas/{}/commit", self.base_url, realm);
        let resp = self
            .authorize(self.http.post(&url))
            .json(request)
            .send()
            .await
            .map_err(|source| ClientError::Request { url: url.clone(), source })?;

        if resp.status() == reqwest::StatusCode::CONFLICT {
            let body: ErrorBody = resp.json().await.map_err(|source| ClientError::Request { url, source })?;
            return Ok(CommitOutcome::MissingNodes(body.missing_nodes.unwrap_or_default()));
        }
        if !resp.status().is_success() {
            return Err(Self::error_from_response(resp).await);
        }
        let body: CommitResponseWire = resp.json().await.map_err(|source| ClientError::Request { url, source })?;
        Ok(CommitOutcome::Success {
            root: body.root,
            committed: body.committed,
        })
    }

    pub async fn get_tree(&self, realm: &str, root: &str, budget: Option<usize>) -> Result<TreeResponseWire, ClientError> {
        let mut url = format!("{}/cas/{}/tree/{}", self.base_url, realm, root);
        if let Some(budget) = budget {
            url = format!("{url}?budget={budget}");
        }
        let resp = self
            .authorize(self.http.get(&url))
            .send()
            .await
            .map_err(|source| ClientError::Request { url: url.clone(), source })?;
        if !resp.status().is_success() {
            return Err(Self::error_from_response(resp).await);
        }
        Ok(resp.json().await.map_err(|source| ClientError::Request { url, source })?)
    }

    pub async fn get_raw(&self, realm: &str, key: &str) -> Result<RawNode, ClientError> {
        let url = format!("{}/cas/{}/raw/{}", self.base_url, realm, key);
        let resp = self
            .authorize(self.http.get(&url))
            .send()
            .await
            .map_err(|source| ClientError::Request { url: url.clone(), source })?;
        if !resp.status().is_success() {
            return Err(Self::error_from_response(resp).await);
        }
        let cas_content_type = resp
            .headers()
            .get("x-cas-content-type")
            .and_then(|v| v.to_str().ok())
            .unwrap_or("application/octet-stream")
            .to_string();
        let cas_size = resp
            .headers()
            .get("x-cas-size")
            .and_then(|v| v.to_str().ok())
            .and_then(|v| v.parse().ok())
            .unwrap_or(0);
        let bytes = resp.bytes().await.map_err(|source| ClientError::Request { url, source })?.to_vec();
        Ok(RawNode {
            bytes,
            cas_content_type,
            cas_size,
        })
    }

    // -- Depots --

    pub async fn list_depots(&self, realm: &str) -> Result<ListDepotsResponseWire, ClientError> {
        let url = format!("{}/realm/{}/depots", self.base_url, realm);
        let resp = self
            .authorize(self.http.get(&url))
            .send()
            .await
            .map_err(|source| ClientError::Request { url: url.clone(), source })?;
        if !resp.status().is_success() {
            return Err(Self::error_from_response(resp).await);
        }
        Ok(resp.json().await.map_err(|source| ClientError::Request { url, source })?)
    }

    pub async fn create_depot(
        &self,
        realm: &str,
        name: &str,
        root: Option<&str>,
        description: Option<&str>,
    ) -> Result<DepotWire, ClientError> {
        let url = format!("{}/realm/{}/depots", self.base_url, realm);
        let resp = self
            .authorize(self.http.post(&url))
            .json(&serde_json::json!({ "name": name, "root": root, "description": description }))
            .send()
            .await
            .map_err(|source| ClientError::Request { url: url.clone(), source })?;
        if !resp.status().is_success() {
            return Err(Self::error_from_response(resp).await);
        }
        Ok(resp.json().await.map_err(|source| ClientError::Request { url, source })?)
    }

    pub async fn get_depot(&self, realm: &str, name: &str) -> Result<DepotWire, ClientError> {
        let url = format!("{}/realm/{}/depots/{}", self.base_url, realm, name);
        let resp = self
            .authorize(self.http.get(&url))
            .send()
            .await
            .map_err(|source| ClientError::Request { url: url.clone(), source })?;
        if !resp.status().is_success() {
            return Err(Self::error_from_response(resp).await);
        }
        Ok(resp.json().await.map_err(|source| ClientError::Request { url, source })?)
    }

    pub async fn update_depot_root(
        &self,
        realm: &str,
        name: &str,
        root: &str,
        message: Option<&str>,
    ) -> Result<DepotWire, ClientError> {
        let url = format!("{}/realm/{}/depots/{}", self.base_url, realm, name);
        let resp = self
            .authorize(self.http.put(&url))
            .json(&serde_json::json!({ "root": root, "message": message }))
            .send()
            .await
            .map_err(|source| ClientError::Request { url: url.clone(), source })?;
        if !resp.status().is_success() {
            return Err(Self::error_from_response(resp).await);
        }
        Ok(resp.json().await.map_err(|source| ClientError::Request { url, source })?)
    }

    pub async fn delete_depot(&self, realm: &str, name: &str) -> Result<(), ClientError> {
        let url = format!("{}/realm/{}/depots/{}", self.base_url, realm, name);
        let resp = self
            .authorize(self.http.delete(&url))
            .send()
            .await
            .map_err(|source| ClientError::Request { url: url.clone(), source })?;
        if !resp.status().is_success() {
            return Err(Self::error_from_response(resp).await);
        }
        Ok(())
    }

    pub async fn depot_history(&self, realm: &str, name: &str) -> Result<Vec<DepotHistoryEntryWire>, ClientError> {
        let url = format!("{}/realm/{}/depots/{}/history", self.base_url, realm, name);
        let resp = self
            .authorize(self.http.get(&url))
            .send()
            .await
            .map_err(|source| ClientError::Request { url: url.clone(), source })?;
        if !resp.status().is_success() {
            return Err(Self::error_from_response(resp).await);
        }
        Ok(resp.json().await.map_err(|source| ClientError::Request { url, source })?)
    }

    pub async fn rollback_depot(&self, realm: &str, name: &str, version: i64) -> Result<DepotWire, ClientError> {
        let url = format!("{}/realm/{}/depots/{}/rollback", self.base_url, realm, name);
        let resp = self
            .authorize(self.http.post(&url))
            .json(&serde_json::json!({ "version": version }))
            .send()
            .await
            .map_err(|source| ClientError::Request { url: url.clone(), source })?;
        if !resp.status().is_success() {
            return Err(Self::error_from_response(resp).await);
        }
        Ok(resp.json().await.map_err(|source| ClientError::Request { url, source })?)
    }

    // -- Commit records --

    pub async fn list_commits(&self, realm: &str) -> Result<Vec<CommitRecordWire>, ClientError> {
        let url = format!("{}/realm/{}/commits", self.base_url, realm);
        let resp = self
            .authorize(self.http.get(&url))
            .send()
            .await
            .map_err(|source| ClientError::Request { url: url.clone(), source })?;
        if !resp.status().is_success() {
            return Err(Self::error_from_response(resp).await);
        }
        Ok(resp.json().await.map_err(|source| ClientError::Request { url, source })?)
    }

    pub async fn create_commit_record(
        &self,
        realm: &str,
        root: &str,
        title: Option<&str>,
    ) -> Result<CommitRecordWire, ClientError> {
        let url = format!("{}/realm/{}/commits", self.base_url, realm);
        let resp = self
            .authorize(self.http.post(&url))
            .json(&serde_json::json!({ "root": root, "title": title }))
            .send()
            .await
            .map_err(|source| ClientError::Request { url: url.clone(), source })?;
        if !resp.status().is_success() {
            return Err(Self::error_from_response(resp).await);
        }
        Ok(resp.json().await.map_err(|source| ClientError::Request { url, source })?)
    }

    // -- Tickets --

    pub async fn create_ticket(&self, body: serde_json::Value) -> Result<serde_json::Value, ClientError> {
        let url = format!("{}/auth/ticket", self.base_url);
        let resp = self
            .authorize(self.http.post(&url))
            .json(&body)
            .send()
            .await
            .map_err(|source| ClientError::Request { url: url.clone(), source })?;
        if !resp.status().is_success() {
            return Err(Self::error_from_response(resp).await);
        }
        Ok(resp.json().await.map_err(|source| ClientError::Request { url, source })?)
    }

    pub async fn revoke_ticket(&self, id: &str) -> Result<(), ClientError> {
        let url = format!("{}/auth/ticket/{}", self.base_url, id);
        let resp = self
            .authorize(self.http.delete(&url))
            .send()
            .await
            .map_err(|source| ClientError::Request { url: url.clone(), source })?;
        if !resp.status().is_success() {
            return Err(Self::error_from_response(resp).await);
        }
        Ok(())
    }

    // -- Delegated-auth handshake --

    pub async fn handshake_init(&self, pubkey: &str, client_name: Option<&str>) -> Result<serde_json::Value, ClientError> {
        let url = format!("{}/auth/clients/init", self.base_url);
        let resp = self
            .http
            .post(&url)
            .json(&serde_json::json!({ "pubkey": pubkey, "client_name": client_name }))
            .send()
            .await
            .map_err(|source| ClientError::Request { url: url.clone(), source })?;
        if !resp.status().is_success() {
            return Err(Self::error_from_response(resp).await);
        }
        Ok(resp.json().await.map_err(|source| ClientError::Request { url, source })?)
    }

    pub async fn handshake_status(&self, pubkey: &str) -> Result<serde_json::Value, ClientError> {
        let url = format!("{}/auth/clients/status?pubkey={}", self.base_url, pubkey);
        let resp = self
            .http
            .get(&url)
            .send()
            .await
            .map_err(|source| ClientError::Request { url: url.clone(), source })?;
        if !resp.status().is_success() {
            return Err(Self::error_from_response(resp).await);
        }
        Ok(resp.json().await.map_err(|source| ClientError::Request { url, source })?)
    }

    pub async fn handshake_complete(&self, pubkey: &str, code: &str) -> Result<serde_json::Value, ClientError> {
        let url = format!("{}/auth/clients/complete", self.base_url);
        let resp = self
            .authorize(self.http.post(&url))
            .json(&serde_json::json!({ "pubkey": pubkey, "verification_code": code }))
            .send()
            .await
            .map_err(|source| ClientError::Request { url: url.clone(), source })?;
        if !resp.status().is_success() {
            return Err(Self::error_from_response(resp).await);
        }
        Ok(resp.json().await.map_err(|source| ClientError::Request { url, source })?)
    }
}
