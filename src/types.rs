use bytes::Bytes;
use serde::{Deserialize, Deserializer, Serialize};

/// A document known to the backend, placed in a virtual folder
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileRecord {
    /// `/`-delimited folder path, the join key into the folder tree
    #[serde(rename = "folder_name")]
    pub folder_path: String,
    pub file_id: String,
    pub file_name: String,
    /// Whether the backend has finished RAG indexing for this file
    #[serde(default)]
    pub rag_status: bool,
}

impl FileRecord {
    pub fn new(folder_path: &str, file_id: &str, file_name: &str) -> Self {
        Self {
            folder_path: folder_path.to_string(),
            file_id: file_id.to_string(),
            file_name: file_name.to_string(),
            rag_status: false,
        }
    }

    /// The last `/`-separated segment of the file name
    pub fn display_name(&self) -> &str {
        display_name(&self.file_name)
    }
}

pub(crate) fn display_name(file_name: &str) -> &str {
    file_name.rsplit('/').next().unwrap_or(file_name)
}

/// A selected file as the chat and retrieval screens see it
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileRef {
    pub file_id: String,
    pub file_name: String,
}

/// A local file waiting to be uploaded into a folder
#[derive(Debug, Clone)]
pub struct PendingUpload {
    pub file_name: String,
    pub content: Bytes,
}

impl PendingUpload {
    pub fn new(file_name: impl Into<String>, content: impl Into<Bytes>) -> Self {
        Self {
            file_name: file_name.into(),
            content: content.into(),
        }
    }

    pub async fn from_path(path: &std::path::Path) -> crate::Result<Self> {
        let content = tokio::fs::read(path).await?;
        let file_name = path
            .file_name()
            .map(|n| n.to_string_lossy().to_string())
            .unwrap_or_default();
        Ok(Self::new(file_name, content))
    }
}

/// A generated summary document stored by the backend
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SummaryFile {
    pub file_name: String,
    pub s3_url: String,
    #[serde(default)]
    pub source_file_id: Vec<String>,
    pub file_id: String,
    #[serde(default)]
    pub status: String,
}

impl SummaryFile {
    /// Link the document can be downloaded from
    pub fn download_url(&self) -> &str {
        &self.s3_url
    }
}

/// A section extracted from the selected documents
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Section {
    pub section_title: String,
    #[serde(default)]
    pub summary: String,
    #[serde(default)]
    pub pages: Vec<u32>,
}

/// Metadata the retrieval service attaches to each chunk
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ChunkMetadata {
    pub doc_id: String,
    pub thread_id: String,
    pub file_id: String,
    pub file_name: String,
    pub page_number: u32,
    #[serde(rename = "type")]
    pub kind: String,
    pub is_financial_statement: String,
    pub statement_type: String,
    #[serde(rename = "_id")]
    pub id: String,
    #[serde(rename = "_collection_name")]
    pub collection_name: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Chunk {
    #[serde(default)]
    pub id: Option<String>,
    #[serde(default)]
    pub metadata: ChunkMetadata,
    pub page_content: String,
    #[serde(default, rename = "type")]
    pub kind: String,
}

/// Financial statement scope accepted by chunk retrieval
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StatementType {
    Consolidated,
    Standalone,
    Both,
    None,
}

/// Parameters for a chunk retrieval request
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ChunkQuery {
    pub user_query: String,
    pub file_id_list: Vec<String>,
    pub top_k: u32,
    pub page_list: Vec<String>,
    pub statement_type: Vec<StatementType>,
    pub is_financial_statement: String,
}

impl ChunkQuery {
    pub fn new(user_query: impl Into<String>) -> Self {
        Self {
            user_query: user_query.into(),
            file_id_list: Vec::new(),
            top_k: 5,
            page_list: Vec::new(),
            statement_type: Vec::new(),
            is_financial_statement: String::new(),
        }
    }

    pub fn with_top_k(mut self, top_k: u32) -> Self {
        self.top_k = top_k;
        self
    }

    pub fn with_pages(mut self, pages: &str) -> Self {
        self.page_list = Self::parse_page_list(pages);
        self
    }

    pub fn with_statement_types(mut self, types: Vec<StatementType>) -> Self {
        self.statement_type = types;
        self
    }

    pub fn with_financial_statement(mut self, flag: impl Into<String>) -> Self {
        self.is_financial_statement = flag.into();
        self
    }

    /// Split a comma separated page list, dropping blank entries
    pub fn parse_page_list(pages: &str) -> Vec<String> {
        pages
            .split(',')
            .map(str::trim)
            .filter(|p| !p.is_empty())
            .map(String::from)
            .collect()
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChunkResponse {
    pub status_code: u16,
    #[serde(default)]
    pub message: String,
    #[serde(default)]
    pub chunks: Vec<Chunk>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ChatRole {
    User,
    Assistant,
}

/// One entry in the chat transcript
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChatMessage {
    pub role: ChatRole,
    pub content: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ChatRequest {
    pub user_query: String,
    pub file_id_list: Vec<String>,
    pub thread_id: String,
    pub user_id: String,
    pub stream: bool,
}

/// A stored evaluation case for the testing workflow
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TestCase {
    #[serde(deserialize_with = "string_or_number")]
    pub id: String,
    #[serde(default)]
    pub files: Vec<FileRef>,
    #[serde(default, alias = "query")]
    pub prompt: String,
    #[serde(default)]
    pub expected_output: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct NewTestCase {
    pub file_id_list: Vec<String>,
    pub prompt: String,
    pub expected_output: String,
}

fn string_or_number<'de, D>(deserializer: D) -> std::result::Result<String, D::Error>
where
    D: Deserializer<'de>,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum Id {
        Text(String),
        Number(i64),
    }

    Ok(match Id::deserialize(deserializer)? {
        Id::Text(s) => s,
        Id::Number(n) => n.to_string(),
    })
}

/// Account role as reported by the auth service
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Role {
    User,
    Admin,
    SuperAdmin,
    Other(String),
}

impl Role {
    pub fn parse(value: &str) -> Self {
        match value {
            "user" => Role::User,
            "admin" => Role::Admin,
            "super_admin" => Role::SuperAdmin,
            other => Role::Other(other.to_string()),
        }
    }

    pub fn as_str(&self) -> &str {
        match self {
            Role::User => "user",
            Role::Admin => "admin",
            Role::SuperAdmin => "super_admin",
            Role::Other(s) => s,
        }
    }
}

impl std::fmt::Display for Role {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// The signed-in account
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AuthUser {
    pub email: Option<String>,
    pub role: Option<Role>,
}

/// Token grant returned by login and register
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct TokenGrant {
    #[serde(default)]
    pub access_token: Option<String>,
    #[serde(default)]
    pub role: Option<String>,
}

/// Result of checking a stored token
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct TokenStatus {
    #[serde(default)]
    pub valid: bool,
    #[serde(default)]
    pub email: Option<String>,
    #[serde(default)]
    pub role: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NotificationLevel {
    Success,
    Error,
}

/// A transient user-facing message
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Notification {
    pub level: NotificationLevel,
    pub message: String,
}

impl Notification {
    pub fn success(message: impl Into<String>) -> Self {
        Self {
            level: NotificationLevel::Success,
            message: message.into(),
        }
    }

    pub fn error(message: impl Into<String>) -> Self {
        Self {
            level: NotificationLevel::Error,
            message: message.into(),
        }
    }
}
