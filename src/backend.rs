use async_trait::async_trait;
use tokio::sync::mpsc::UnboundedSender;

use crate::{
    error::Result,
    types::{
        ChatRequest, ChunkQuery, ChunkResponse, FileRecord, NewTestCase, PendingUpload, Section,
        SummaryFile, TestCase, TokenGrant, TokenStatus,
    },
};

/// The document-evaluation service the portal delegates to
///
/// Every operation is a single request/response; implementors do not
/// retry. Payloads are validated before they are returned, so callers
/// only ever see well-formed records or an error.
#[async_trait]
pub trait DocumentBackend: Send + Sync {
    /// All files visible to `user_id`
    async fn list_files(&self, user_id: &str) -> Result<Vec<FileRecord>>;

    /// Upload `files` into `folder_path`, returning the records the
    /// backend created for them
    async fn upload_files(
        &self,
        user_id: &str,
        folder_path: &str,
        files: &[PendingUpload],
    ) -> Result<Vec<FileRecord>>;

    /// Start RAG indexing for one file
    async fn create_rag(&self, user_id: &str, file_id: &str) -> Result<()>;

    async fn delete_file(&self, user_id: &str, file_id: &str) -> Result<()>;

    /// Ask a question about the selected files
    ///
    /// Text fragments are forwarded to `updates` as they arrive; the full
    /// reply is returned once the response completes.
    async fn chat(
        &self,
        request: &ChatRequest,
        updates: Option<UnboundedSender<String>>,
    ) -> Result<String>;

    async fn retrieve_chunks(&self, query: &ChunkQuery) -> Result<ChunkResponse>;

    /// Generate a summary document named `file_name` from `file_ids`
    async fn generate_summary(
        &self,
        user_id: &str,
        thread_id: &str,
        file_ids: &[String],
        file_name: &str,
    ) -> Result<()>;

    async fn list_summary_files(&self) -> Result<Vec<SummaryFile>>;

    async fn delete_summary_file(&self, user_id: &str, file_key: &str) -> Result<()>;

    async fn dynamic_sections(&self, user_id: &str, file_ids: &[String]) -> Result<Vec<Section>>;

    async fn login(&self, email: &str, password: &str) -> Result<TokenGrant>;

    async fn register(&self, email: &str, password: &str) -> Result<TokenGrant>;

    /// Invite `email` with `role`, returning the backend's message
    async fn invite(&self, email: &str, role: &str) -> Result<Option<String>>;

    /// Check the stored bearer token
    async fn verify_token(&self) -> Result<TokenStatus>;

    async fn list_test_cases(&self) -> Result<Vec<TestCase>>;

    async fn create_test_case(&self, case: &NewTestCase) -> Result<()>;

    async fn delete_test_case(&self, id: &str) -> Result<()>;

    /// Human-readable identifier for this backend (for logging)
    fn identifier(&self) -> String;
}
