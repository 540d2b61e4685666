use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use tokio::sync::mpsc::UnboundedSender;
use tokio::sync::{RwLock, RwLockReadGuard};
use tokio::task::JoinSet;
use tracing::{debug, info, warn};

use crate::{
    backend::DocumentBackend,
    config::PortalConfig,
    error::{PortalError, Result},
    http::HttpBackend,
    session::Session,
    tree::{build, FilesByFolder, FolderNode},
    types::{
        ChatMessage, ChatRequest, ChatRole, ChunkQuery, ChunkResponse, FileRecord, FileRef,
        NewTestCase, Notification, PendingUpload, Section, SummaryFile, TestCase,
    },
    view::{render, DisplayRow, OpenFolders, Rows, Selection},
};

/// An operation that is in flight, keyed the way the UI disables its
/// controls
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum LoadingKey {
    Files,
    /// Upload into a folder path
    Upload(String),
    /// RAG indexing for a file id
    Rag(String),
    /// Deletion of a file id
    Delete(String),
    Chat,
    Chunks,
    Summary,
    Summaries,
    /// Deletion of a summary file id
    SummaryDelete(String),
    Sections,
    TestCases,
}

impl std::fmt::Display for LoadingKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            LoadingKey::Files => write!(f, "file listing"),
            LoadingKey::Upload(folder) => write!(f, "upload to {}", folder),
            LoadingKey::Rag(id) => write!(f, "RAG for {}", id),
            LoadingKey::Delete(id) => write!(f, "deletion of {}", id),
            LoadingKey::Chat => write!(f, "chat"),
            LoadingKey::Chunks => write!(f, "chunk retrieval"),
            LoadingKey::Summary => write!(f, "summary generation"),
            LoadingKey::Summaries => write!(f, "summary listing"),
            LoadingKey::SummaryDelete(id) => write!(f, "deletion of summary {}", id),
            LoadingKey::Sections => write!(f, "section extraction"),
            LoadingKey::TestCases => write!(f, "test cases"),
        }
    }
}

/// Holds a loading flag until the operation settles or is dropped
struct LoadingGuard {
    state: Arc<RwLock<PortalState>>,
    key: Option<LoadingKey>,
}

impl LoadingGuard {
    /// Clear the flag under a lock the caller already holds
    fn release(mut self, state: &mut PortalState) {
        if let Some(key) = self.key.take() {
            state.loading.remove(&key);
        }
    }
}

impl Drop for LoadingGuard {
    fn drop(&mut self) {
        let Some(key) = self.key.take() else {
            return;
        };
        debug!(%key, "operation cancelled");
        if let Ok(mut state) = self.state.try_write() {
            state.loading.remove(&key);
            return;
        }
        if let Ok(handle) = tokio::runtime::Handle::try_current() {
            let state = self.state.clone();
            handle.spawn(async move {
                state.write().await.loading.remove(&key);
            });
        }
    }
}

/// Everything the portal screens show, owned in one place
///
/// All mutation goes through the methods below; none of them touch the
/// network.
#[derive(Debug, Default)]
pub struct PortalState {
    files: FilesByFolder,
    root: FolderNode,
    open: OpenFolders,
    selection: Selection,
    pending: HashMap<String, Vec<PendingUpload>>,
    loading: HashSet<LoadingKey>,
    summaries: Vec<SummaryFile>,
    sections: Vec<Section>,
    chunks: Option<ChunkResponse>,
    transcript: Vec<ChatMessage>,
    test_cases: Vec<TestCase>,
    notifications: Vec<Notification>,
}

impl PortalState {
    pub fn new() -> Self {
        Self::default()
    }

    /// Replace files and folder tree with a fresh listing
    pub fn apply_listing(&mut self, records: &[FileRecord]) {
        let (files, root) = build(records);
        self.files = files;
        self.root = root;
    }

    pub fn files_by_folder(&self) -> &FilesByFolder {
        &self.files
    }

    pub fn root(&self) -> &FolderNode {
        &self.root
    }

    pub fn open_folders(&self) -> &OpenFolders {
        &self.open
    }

    /// Visible rows of the folder tree
    pub fn rows(&self) -> Rows<'_> {
        render(&self.root, &self.files, &self.open, 0)
    }

    pub fn toggle_folder(&mut self, path: &str) -> bool {
        self.open.toggle(path)
    }

    pub fn toggle_file_selection(&mut self, file_id: &str) -> bool {
        self.selection.toggle(file_id)
    }

    pub fn is_selected(&self, file_id: &str) -> bool {
        self.selection.contains(file_id)
    }

    pub fn selection(&self) -> &Selection {
        &self.selection
    }

    /// Selected files with their names; unknown ids get an empty name
    pub fn selected_files(&self) -> Vec<FileRef> {
        self.selection
            .ids()
            .iter()
            .map(|id| FileRef {
                file_id: id.clone(),
                file_name: self
                    .files
                    .find(id)
                    .map(|f| f.file_name.clone())
                    .unwrap_or_default(),
            })
            .collect()
    }

    /// Add an empty folder under `parent` (or at the top level)
    pub fn create_folder(&mut self, parent: Option<&str>, name: &str) -> Result<String> {
        let name = name.trim();
        if name.is_empty() {
            return Err(PortalError::validation("Folder name cannot be empty"));
        }

        let path = match parent {
            Some(parent) => format!("{}/{}", parent, name),
            None => name.to_string(),
        };
        if self.root.contains(&path) {
            return Err(PortalError::validation("Folder already exists"));
        }

        self.root.ensure_path(&path);
        self.files.ensure_folder(&path);
        Ok(path)
    }

    pub fn queue_upload(&mut self, folder: &str, files: Vec<PendingUpload>) {
        self.pending.entry(folder.to_string()).or_default().extend(files);
    }

    pub fn pending_uploads(&self, folder: &str) -> &[PendingUpload] {
        self.pending.get(folder).map(Vec::as_slice).unwrap_or(&[])
    }

    /// Record uploaded files and drop the first `sent` pending entries
    fn apply_upload(&mut self, folder: &str, sent: usize, records: Vec<FileRecord>) {
        for record in records {
            self.root.ensure_path(&record.folder_path);
            self.files.push(record);
        }
        if let Some(pending) = self.pending.get_mut(folder) {
            pending.drain(..sent.min(pending.len()));
        }
    }

    fn mark_indexed(&mut self, folder: &str, file_id: &str) {
        if let Some(file) = self.files.find_mut(folder, file_id) {
            file.rag_status = true;
        }
    }

    fn remove_file(&mut self, folder: &str, file_id: &str) {
        self.files.remove(folder, file_id);
        if self.selection.contains(file_id) {
            self.selection.toggle(file_id);
        }
    }

    pub fn is_loading(&self, key: &LoadingKey) -> bool {
        self.loading.contains(key)
    }

    pub fn summaries(&self) -> &[SummaryFile] {
        &self.summaries
    }

    pub fn sections(&self) -> &[Section] {
        &self.sections
    }

    pub fn chunks(&self) -> Option<&ChunkResponse> {
        self.chunks.as_ref()
    }

    pub fn transcript(&self) -> &[ChatMessage] {
        &self.transcript
    }

    pub fn test_cases(&self) -> &[TestCase] {
        &self.test_cases
    }

    pub fn notify(&mut self, notification: Notification) {
        self.notifications.push(notification);
    }

    pub fn notifications(&self) -> &[Notification] {
        &self.notifications
    }

    pub fn drain_notifications(&mut self) -> Vec<Notification> {
        std::mem::take(&mut self.notifications)
    }
}

/// Handle to the portal: a backend plus the shared [`PortalState`]
///
/// Clones share state. Operations on different keys run independently;
/// a second operation on a key that is already loading fails with
/// [`PortalError::Busy`]. Failures are also recorded as error
/// notifications and leave the state as it was.
#[derive(Clone)]
pub struct DocumentPortal {
    backend: Arc<dyn DocumentBackend>,
    state: Arc<RwLock<PortalState>>,
    config: Arc<PortalConfig>,
}

impl DocumentPortal {
    pub fn new(backend: Arc<dyn DocumentBackend>, config: PortalConfig) -> Self {
        Self {
            backend,
            state: Arc::new(RwLock::new(PortalState::new())),
            config: Arc::new(config),
        }
    }

    /// Build a portal and session talking to the configured HTTP API
    pub async fn connect(config: PortalConfig) -> Result<(Self, Session)> {
        config.validate()?;
        let store = config.open_store().await?;
        let backend: Arc<dyn DocumentBackend> =
            Arc::new(HttpBackend::new(config.api_url.clone(), store.clone()));
        let session = Session::new(backend.clone(), store);
        info!(backend = %backend.identifier(), "portal connected");
        Ok((Self::new(backend, config), session))
    }

    pub fn config(&self) -> &PortalConfig {
        &self.config
    }

    /// Read access to the current state
    pub async fn state(&self) -> RwLockReadGuard<'_, PortalState> {
        self.state.read().await
    }

    pub async fn rows(&self) -> Vec<DisplayRow> {
        self.state.read().await.rows().collect()
    }

    async fn begin(&self, key: LoadingKey) -> Result<LoadingGuard> {
        let mut state = self.state.write().await;
        if !state.loading.insert(key.clone()) {
            return Err(PortalError::Busy {
                key: key.to_string(),
            });
        }
        debug!(%key, "started");
        Ok(LoadingGuard {
            state: self.state.clone(),
            key: Some(key),
        })
    }

    /// Mark `key` loading while `op` runs, then hand its result to `apply`
    /// under the same write lock that clears the flag
    async fn tracked<T, R, F, A>(&self, key: LoadingKey, op: F, apply: A) -> Result<R>
    where
        F: std::future::Future<Output = Result<T>>,
        A: FnOnce(&mut PortalState, T) -> R,
    {
        let guard = match self.begin(key).await {
            Ok(guard) => guard,
            Err(e) => return self.fail(e).await,
        };
        let result = op.await;

        let mut state = self.state.write().await;
        guard.release(&mut state);
        match result {
            Ok(value) => Ok(apply(&mut state, value)),
            Err(e) => {
                drop(state);
                self.fail(e).await
            }
        }
    }

    async fn fail<T>(&self, err: PortalError) -> Result<T> {
        warn!(error = %err, "operation failed");
        self.state
            .write()
            .await
            .notify(Notification::error(err.user_message()));
        Err(err)
    }

    async fn succeed(&self, message: impl Into<String>) {
        self.state
            .write()
            .await
            .notify(Notification::success(message));
    }

    async fn selected_ids(&self) -> Vec<String> {
        self.state.read().await.selection.ids().to_vec()
    }

    /// Reload all files from the backend and rebuild the folder tree
    pub async fn refresh_files(&self) -> Result<usize> {
        let count = self
            .tracked(
                LoadingKey::Files,
                self.backend.list_files(&self.config.user_id),
                |state, records| {
                    state.apply_listing(&records);
                    records.len()
                },
            )
            .await?;

        info!(files = count, "file listing loaded");
        Ok(count)
    }

    pub async fn create_folder(&self, parent: Option<&str>, name: &str) -> Result<String> {
        let created = self.state.write().await.create_folder(parent, name);
        match created {
            Ok(path) => {
                self.succeed(format!("Folder \"{}\" created successfully!", name.trim()))
                    .await;
                Ok(path)
            }
            Err(e) => self.fail(e).await,
        }
    }

    pub async fn queue_upload(&self, folder: &str, files: Vec<PendingUpload>) {
        self.state.write().await.queue_upload(folder, files);
    }

    /// Upload everything queued for `folder`, returning how many files
    /// were sent. Nothing queued is a no-op.
    pub async fn upload_pending(&self, folder: &str) -> Result<usize> {
        let files = self.state.read().await.pending_uploads(folder).to_vec();
        if files.is_empty() {
            return Ok(0);
        }

        self.tracked(
            LoadingKey::Upload(folder.to_string()),
            self.backend
                .upload_files(&self.config.user_id, folder, &files),
            |state, records| state.apply_upload(folder, files.len(), records),
        )
        .await?;

        info!(folder, count = files.len(), "files uploaded");
        self.succeed("Files uploaded successfully!").await;
        Ok(files.len())
    }

    /// Index one file for retrieval
    pub async fn create_rag(&self, file_id: &str, folder: &str) -> Result<()> {
        self.tracked(
            LoadingKey::Rag(file_id.to_string()),
            self.backend.create_rag(&self.config.user_id, file_id),
            |state, ()| state.mark_indexed(folder, file_id),
        )
        .await?;

        info!(file_id, "RAG created");
        self.succeed("RAG created successfully!").await;
        Ok(())
    }

    /// Index every file in `folder` that is not indexed yet, concurrently.
    /// Returns how many succeeded; failures are reported individually.
    pub async fn index_unprocessed(&self, folder: &str) -> Result<usize> {
        let ids: Vec<String> = self
            .state
            .read()
            .await
            .files
            .get(folder)
            .iter()
            .filter(|f| !f.rag_status)
            .map(|f| f.file_id.clone())
            .collect();

        let mut tasks = JoinSet::new();
        for id in ids {
            let portal = self.clone();
            let folder = folder.to_string();
            tasks.spawn(async move { portal.create_rag(&id, &folder).await });
        }

        let mut indexed = 0;
        while let Some(joined) = tasks.join_next().await {
            if let Ok(Ok(())) = joined {
                indexed += 1;
            }
        }
        Ok(indexed)
    }

    /// Index whatever is not indexed yet in the configured tests folder
    pub async fn index_test_files(&self) -> Result<usize> {
        let folder = self.config.tests_folder.clone();
        self.index_unprocessed(&folder).await
    }

    pub async fn delete_file(&self, file_id: &str, folder: &str) -> Result<()> {
        self.tracked(
            LoadingKey::Delete(file_id.to_string()),
            self.backend.delete_file(&self.config.user_id, file_id),
            |state, ()| state.remove_file(folder, file_id),
        )
        .await?;

        info!(file_id, "file deleted");
        self.succeed("File deleted successfully!").await;
        Ok(())
    }

    pub async fn toggle_folder(&self, path: &str) -> bool {
        self.state.write().await.toggle_folder(path)
    }

    pub async fn toggle_file_selection(&self, file_id: &str) -> bool {
        self.state.write().await.toggle_file_selection(file_id)
    }

    pub async fn is_selected(&self, file_id: &str) -> bool {
        self.state.read().await.is_selected(file_id)
    }

    pub async fn selected_files(&self) -> Vec<FileRef> {
        self.state.read().await.selected_files()
    }

    async fn require_selection(&self) -> Result<Vec<String>> {
        let ids = self.selected_ids().await;
        if ids.is_empty() {
            return self
                .fail(PortalError::validation("Please select at least one file"))
                .await;
        }
        Ok(ids)
    }

    /// Ask about the selected files. Partial replies are forwarded to
    /// `updates` while the answer streams in.
    pub async fn send_chat(
        &self,
        message: &str,
        updates: Option<UnboundedSender<String>>,
    ) -> Result<String> {
        let message = message.trim();
        if message.is_empty() {
            return self
                .fail(PortalError::validation("Please enter a message"))
                .await;
        }
        let file_ids = self.require_selection().await?;

        let request = ChatRequest {
            user_query: message.to_string(),
            file_id_list: file_ids,
            thread_id: self.config.summary_thread_id.clone(),
            user_id: self.config.user_id.clone(),
            stream: updates.is_some(),
        };
        let question = request.user_query.clone();
        self.tracked(
            LoadingKey::Chat,
            self.backend.chat(&request, updates),
            |state, reply: String| {
                state.transcript.push(ChatMessage {
                    role: ChatRole::User,
                    content: question,
                });
                state.transcript.push(ChatMessage {
                    role: ChatRole::Assistant,
                    content: reply.clone(),
                });
                reply
            },
        )
        .await
    }

    /// Retrieve matching chunks from the selected files
    pub async fn retrieve_chunks(&self, query: ChunkQuery) -> Result<ChunkResponse> {
        if query.user_query.trim().is_empty() {
            return self
                .fail(PortalError::validation("Please enter a user query"))
                .await;
        }
        let file_id_list = self.require_selection().await?;
        let query = ChunkQuery {
            file_id_list,
            ..query
        };

        let response = self
            .tracked(
                LoadingKey::Chunks,
                self.backend.retrieve_chunks(&query),
                |state, response: ChunkResponse| {
                    state.chunks = Some(response.clone());
                    response
                },
            )
            .await?;

        let count = response.chunks.len();
        self.succeed(format!("Retrieved {} chunks", count)).await;
        Ok(response)
    }

    /// Generate a summary document from the selected files
    pub async fn generate_summary(&self, file_name: &str) -> Result<()> {
        let file_name = file_name.trim();
        if file_name.is_empty() {
            return self
                .fail(PortalError::validation("Please enter a file name"))
                .await;
        }
        let file_ids = self.require_selection().await?;

        self.tracked(
            LoadingKey::Summary,
            self.backend.generate_summary(
                &self.config.user_id,
                &self.config.summary_thread_id,
                &file_ids,
                file_name,
            ),
            |_, ()| (),
        )
        .await?;

        info!(file_name, "summary generated");
        self.succeed("Summary document generated successfully!")
            .await;
        if let Err(e) = self.refresh_summaries().await {
            debug!(error = %e, "summary list not refreshed");
        }
        Ok(())
    }

    pub async fn refresh_summaries(&self) -> Result<usize> {
        self.tracked(
            LoadingKey::Summaries,
            self.backend.list_summary_files(),
            |state, summaries: Vec<SummaryFile>| {
                state.summaries = summaries;
                state.summaries.len()
            },
        )
        .await
    }

    /// Delete a generated summary by its storage key
    pub async fn delete_summary(&self, file_key: &str, file_id: &str) -> Result<()> {
        self.tracked(
            LoadingKey::SummaryDelete(file_id.to_string()),
            self.backend
                .delete_summary_file(&self.config.user_id, file_key),
            |_, ()| (),
        )
        .await?;

        info!(file_key, "summary deleted");
        self.succeed("Summary file deleted successfully!").await;
        if let Err(e) = self.refresh_summaries().await {
            debug!(error = %e, "summary list not refreshed");
        }
        Ok(())
    }

    /// Re-extract sections for the current selection. An empty selection
    /// clears them without calling the backend.
    pub async fn refresh_sections(&self) -> Result<usize> {
        let file_ids = self.selected_ids().await;
        if file_ids.is_empty() {
            self.state.write().await.sections.clear();
            return Ok(0);
        }

        self.tracked(
            LoadingKey::Sections,
            self.backend
                .dynamic_sections(&self.config.user_id, &file_ids),
            |state, sections: Vec<Section>| {
                state.sections = sections;
                state.sections.len()
            },
        )
        .await
    }

    pub async fn refresh_test_cases(&self) -> Result<usize> {
        self.tracked(
            LoadingKey::TestCases,
            self.backend.list_test_cases(),
            |state, cases: Vec<TestCase>| {
                state.test_cases = cases;
                state.test_cases.len()
            },
        )
        .await
    }

    pub async fn add_test_case(&self, case: NewTestCase) -> Result<()> {
        if case.prompt.trim().is_empty() {
            return self
                .fail(PortalError::validation("Please enter a prompt"))
                .await;
        }
        if case.expected_output.trim().is_empty() {
            return self
                .fail(PortalError::validation("Please enter an expected output"))
                .await;
        }

        self.tracked(
            LoadingKey::TestCases,
            self.backend.create_test_case(&case),
            |_, ()| (),
        )
        .await?;
        self.succeed("Successfully created test case").await;
        if let Err(e) = self.refresh_test_cases().await {
            debug!(error = %e, "test cases not refreshed");
        }
        Ok(())
    }

    pub async fn remove_test_case(&self, id: &str) -> Result<()> {
        self.tracked(
            LoadingKey::TestCases,
            self.backend.delete_test_case(id),
            |_, ()| (),
        )
        .await?;
        self.succeed("Test case deleted").await;
        if let Err(e) = self.refresh_test_cases().await {
            debug!(error = %e, "test cases not refreshed");
        }
        Ok(())
    }

    pub async fn notifications(&self) -> Vec<Notification> {
        self.state.read().await.notifications().to_vec()
    }

    pub async fn drain_notifications(&self) -> Vec<Notification> {
        self.state.write().await.drain_notifications()
    }
}
