//! Integration tests for the portal state and session layers
//!
//! These run against an in-process backend so no network is needed.

use async_trait::async_trait;
use doc_portal::{
    ChatRequest, ChunkQuery, ChunkResponse, DisplayRow, DocumentBackend, DocumentPortal,
    FileRecord, KeyValueStore, LoadingKey, MemoryStore, NewTestCase, NotificationLevel,
    PendingUpload, PortalConfig, PortalError, Role, Section, Session, SummaryFile, TestCase,
    TokenGrant, TokenStatus,
};
use std::collections::HashSet;
use std::sync::{Arc, Mutex};
use tokio::sync::mpsc::UnboundedSender;
use std::time::Duration;
use tokio::sync::Notify;

// Mock backend for testing without network access
#[derive(Default)]
struct MockBackend {
    files: Vec<FileRecord>,
    summaries: Mutex<Vec<SummaryFile>>,
    failing_rag: HashSet<String>,
    upload_gate: Option<Arc<Notify>>,
    grant: Option<TokenGrant>,
    register_error: Option<String>,
    token_valid: bool,
    calls: Mutex<Vec<String>>,
}

impl MockBackend {
    fn with_files(files: Vec<FileRecord>) -> Self {
        Self {
            files,
            ..Default::default()
        }
    }

    fn record(&self, call: impl Into<String>) {
        self.calls.lock().unwrap().push(call.into());
    }

    fn calls(&self) -> Vec<String> {
        self.calls.lock().unwrap().clone()
    }
}

#[async_trait]
impl DocumentBackend for MockBackend {
    async fn list_files(&self, user_id: &str) -> doc_portal::Result<Vec<FileRecord>> {
        self.record(format!("list_files:{}", user_id));
        Ok(self.files.clone())
    }

    async fn upload_files(
        &self,
        _user_id: &str,
        folder_path: &str,
        files: &[PendingUpload],
    ) -> doc_portal::Result<Vec<FileRecord>> {
        if let Some(gate) = &self.upload_gate {
            gate.notified().await;
        }
        self.record(format!("upload:{}:{}", folder_path, files.len()));
        Ok(files
            .iter()
            .enumerate()
            .map(|(i, f)| FileRecord::new(folder_path, &format!("up{}", i), &f.file_name))
            .collect())
    }

    async fn create_rag(&self, _user_id: &str, file_id: &str) -> doc_portal::Result<()> {
        self.record(format!("rag:{}", file_id));
        if self.failing_rag.contains(file_id) {
            return Err(PortalError::Api {
                status: 500,
                message: "indexing failed".to_string(),
            });
        }
        Ok(())
    }

    async fn delete_file(&self, _user_id: &str, file_id: &str) -> doc_portal::Result<()> {
        self.record(format!("delete:{}", file_id));
        Ok(())
    }

    async fn chat(
        &self,
        request: &ChatRequest,
        updates: Option<UnboundedSender<String>>,
    ) -> doc_portal::Result<String> {
        self.record(format!("chat:{}", request.file_id_list.join(",")));
        let parts = ["Revenue ", "grew ", "12%."];
        if let Some(tx) = updates {
            for part in parts {
                tx.send(part.to_string()).unwrap();
            }
        }
        Ok(parts.concat())
    }

    async fn retrieve_chunks(&self, query: &ChunkQuery) -> doc_portal::Result<ChunkResponse> {
        self.record(format!("chunks:{}:{}", query.top_k, query.file_id_list.join(",")));
        Ok(ChunkResponse {
            status_code: 200,
            message: "ok".to_string(),
            chunks: Vec::new(),
        })
    }

    async fn generate_summary(
        &self,
        _user_id: &str,
        _thread_id: &str,
        file_ids: &[String],
        file_name: &str,
    ) -> doc_portal::Result<()> {
        self.record(format!("summary:{}", file_name));
        self.summaries.lock().unwrap().push(SummaryFile {
            file_name: file_name.to_string(),
            s3_url: format!("https://bucket/{}", file_name),
            source_file_id: file_ids.to_vec(),
            file_id: format!("s-{}", file_name),
            status: "done".to_string(),
        });
        Ok(())
    }

    async fn list_summary_files(&self) -> doc_portal::Result<Vec<SummaryFile>> {
        Ok(self.summaries.lock().unwrap().clone())
    }

    async fn delete_summary_file(&self, _user_id: &str, file_key: &str) -> doc_portal::Result<()> {
        self.summaries
            .lock()
            .unwrap()
            .retain(|s| s.file_name != file_key);
        Ok(())
    }

    async fn dynamic_sections(
        &self,
        _user_id: &str,
        file_ids: &[String],
    ) -> doc_portal::Result<Vec<Section>> {
        self.record(format!("sections:{}", file_ids.len()));
        Ok(vec![Section {
            section_title: "Revenue".to_string(),
            summary: "Up".to_string(),
            pages: vec![3, 4],
        }])
    }

    async fn login(&self, _email: &str, _password: &str) -> doc_portal::Result<TokenGrant> {
        self.grant.clone().ok_or(PortalError::Api {
            status: 401,
            message: "bad credentials".to_string(),
        })
    }

    async fn register(&self, email: &str, password: &str) -> doc_portal::Result<TokenGrant> {
        if let Some(detail) = &self.register_error {
            return Err(PortalError::Api {
                status: 400,
                message: detail.clone(),
            });
        }
        self.login(email, password).await
    }

    async fn invite(&self, email: &str, role: &str) -> doc_portal::Result<Option<String>> {
        self.record(format!("invite:{}:{}", email, role));
        Ok(Some(format!("Invited {}", email)))
    }

    async fn verify_token(&self) -> doc_portal::Result<TokenStatus> {
        Ok(TokenStatus {
            valid: self.token_valid,
            email: Some("verified@example.com".to_string()),
            role: Some("admin".to_string()),
        })
    }

    async fn list_test_cases(&self) -> doc_portal::Result<Vec<TestCase>> {
        Ok(Vec::new())
    }

    async fn create_test_case(&self, case: &NewTestCase) -> doc_portal::Result<()> {
        self.record(format!("testcase:{}", case.prompt));
        Ok(())
    }

    async fn delete_test_case(&self, id: &str) -> doc_portal::Result<()> {
        self.record(format!("delete_testcase:{}", id));
        Ok(())
    }

    fn identifier(&self) -> String {
        "mock".to_string()
    }
}

fn sample_files() -> Vec<FileRecord> {
    let mut indexed = FileRecord::new("Project A", "file1", "document1.pdf");
    indexed.rag_status = true;
    vec![
        indexed,
        FileRecord::new("Project A", "file2", "document2.pdf"),
        FileRecord::new("Project B", "file3", "document3.pdf"),
        FileRecord::new("Project B/Research", "file4", "research.pdf"),
        FileRecord::new("Project C/Data/Results", "file5", "results.pdf"),
    ]
}

fn portal_over(backend: Arc<MockBackend>) -> DocumentPortal {
    DocumentPortal::new(
        backend as Arc<dyn DocumentBackend>,
        PortalConfig::new("https://api.example.com", "user123"),
    )
}

#[tokio::test]
async fn test_refresh_builds_tree() {
    let backend = Arc::new(MockBackend::with_files(sample_files()));
    let portal = portal_over(backend.clone());

    assert_eq!(portal.refresh_files().await.unwrap(), 5);
    assert_eq!(backend.calls(), vec!["list_files:user123"]);

    let state = portal.state().await;
    assert!(state.root().contains("Project C/Data"));
    assert_eq!(state.files_by_folder().get("Project A").len(), 2);
    drop(state);

    let top: Vec<_> = portal
        .rows()
        .await
        .iter()
        .map(|r| r.label().to_string())
        .collect();
    assert_eq!(top, vec!["Project A", "Project B", "Project C"]);
}

#[tokio::test]
async fn test_expanded_rows() {
    let portal = portal_over(Arc::new(MockBackend::with_files(sample_files())));
    portal.refresh_files().await.unwrap();

    portal.toggle_folder("Project B").await;
    portal.toggle_folder("Project B/Research").await;

    let rows = portal.rows().await;
    let labels: Vec<_> = rows.iter().map(|r| (r.depth(), r.label())).collect();
    assert_eq!(
        labels,
        vec![
            (0, "Project A"),
            (0, "Project B"),
            (1, "Research"),
            (2, "research.pdf"),
            (1, "document3.pdf"),
            (0, "Project C"),
        ]
    );
    assert!(matches!(&rows[1], DisplayRow::Folder { is_open: true, .. }));
}

#[tokio::test]
async fn test_upload_appends_and_clears_queue() {
    let backend = Arc::new(MockBackend::with_files(sample_files()));
    let portal = portal_over(backend.clone());
    portal.refresh_files().await.unwrap();

    assert_eq!(portal.upload_pending("Project A").await.unwrap(), 0);

    portal
        .queue_upload(
            "Project A",
            vec![
                PendingUpload::new("q1.pdf", "%PDF-1"),
                PendingUpload::new("q2.pdf", "%PDF-2"),
            ],
        )
        .await;
    assert_eq!(portal.upload_pending("Project A").await.unwrap(), 2);

    let state = portal.state().await;
    let names: Vec<_> = state
        .files_by_folder()
        .get("Project A")
        .iter()
        .map(|f| f.file_name.as_str())
        .collect();
    assert_eq!(names, vec!["document1.pdf", "document2.pdf", "q1.pdf", "q2.pdf"]);
    assert!(state.pending_uploads("Project A").is_empty());
    assert_eq!(
        state.notifications().last().map(|n| n.message.as_str()),
        Some("Files uploaded successfully!")
    );
}

#[tokio::test]
async fn test_duplicate_upload_is_busy() {
    let gate = Arc::new(Notify::new());
    let backend = Arc::new(MockBackend {
        upload_gate: Some(gate.clone()),
        ..Default::default()
    });
    let portal = portal_over(backend.clone());
    portal
        .queue_upload("X", vec![PendingUpload::new("a.pdf", "a")])
        .await;

    let first = tokio::spawn({
        let portal = portal.clone();
        async move { portal.upload_pending("X").await }
    });

    let key = LoadingKey::Upload("X".to_string());
    while !portal.state().await.is_loading(&key) {
        tokio::task::yield_now().await;
    }

    assert!(matches!(
        portal.upload_pending("X").await,
        Err(PortalError::Busy { .. })
    ));

    gate.notify_one();
    assert_eq!(first.await.unwrap().unwrap(), 1);
    assert!(!portal.state().await.is_loading(&key));
    assert_eq!(backend.calls(), vec!["upload:X:1"]);
}

#[tokio::test]
async fn test_cancelled_upload_can_retry() {
    let gate = Arc::new(Notify::new());
    let backend = Arc::new(MockBackend {
        upload_gate: Some(gate.clone()),
        ..Default::default()
    });
    let portal = portal_over(backend.clone());
    portal
        .queue_upload("X", vec![PendingUpload::new("a.pdf", "a")])
        .await;

    let cancelled =
        tokio::time::timeout(Duration::from_millis(50), portal.upload_pending("X")).await;
    assert!(cancelled.is_err());

    let key = LoadingKey::Upload("X".to_string());
    assert!(!portal.state().await.is_loading(&key));
    assert_eq!(portal.state().await.pending_uploads("X").len(), 1);

    gate.notify_one();
    assert_eq!(portal.upload_pending("X").await.unwrap(), 1);
    assert!(portal.state().await.pending_uploads("X").is_empty());
    assert_eq!(backend.calls(), vec!["upload:X:1"]);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_racing_uploads_send_each_file_once() {
    let backend = Arc::new(MockBackend::default());
    let portal = portal_over(backend.clone());

    for round in 0..200 {
        let folder = format!("F{}", round);
        portal
            .queue_upload(&folder, vec![PendingUpload::new("a.pdf", "a")])
            .await;

        let first = tokio::spawn({
            let portal = portal.clone();
            let folder = folder.clone();
            async move { portal.upload_pending(&folder).await }
        });
        let second = tokio::spawn({
            let portal = portal.clone();
            let folder = folder.clone();
            async move { portal.upload_pending(&folder).await }
        });
        let _ = first.await.unwrap();
        let _ = second.await.unwrap();
    }

    let uploads = backend
        .calls()
        .iter()
        .filter(|c| c.starts_with("upload:"))
        .count();
    assert_eq!(uploads, 200);
}

#[tokio::test]
async fn test_create_rag_and_failures() {
    let backend = Arc::new(MockBackend {
        files: sample_files(),
        failing_rag: HashSet::from(["file3".to_string()]),
        ..Default::default()
    });
    let portal = portal_over(backend.clone());
    portal.refresh_files().await.unwrap();
    portal.drain_notifications().await;

    portal.create_rag("file2", "Project A").await.unwrap();
    assert!(portal.state().await.files_by_folder().get("Project A")[1].rag_status);

    let err = portal.create_rag("file3", "Project B").await.unwrap_err();
    assert!(matches!(err, PortalError::Api { status: 500, .. }));
    assert!(!portal.state().await.files_by_folder().get("Project B")[0].rag_status);

    let notes = portal.drain_notifications().await;
    assert_eq!(notes.len(), 2);
    assert_eq!(notes[0].level, NotificationLevel::Success);
    assert_eq!(notes[1].level, NotificationLevel::Error);
    assert_eq!(notes[1].message, "indexing failed");
}

#[tokio::test]
async fn test_index_unprocessed_skips_indexed() {
    let backend = Arc::new(MockBackend::with_files(sample_files()));
    let portal = portal_over(backend.clone());
    portal.refresh_files().await.unwrap();

    assert_eq!(portal.index_unprocessed("Project A").await.unwrap(), 1);
    assert!(backend.calls().contains(&"rag:file2".to_string()));
    assert!(!backend.calls().contains(&"rag:file1".to_string()));
    assert!(portal
        .state()
        .await
        .files_by_folder()
        .get("Project A")
        .iter()
        .all(|f| f.rag_status));
}

#[tokio::test]
async fn test_index_test_files_uses_configured_folder() {
    let mut files = sample_files();
    files.push(FileRecord::new("Tests", "case1", "case1.pdf"));
    files.push(FileRecord::new("Tests", "case2", "case2.pdf"));
    let backend = Arc::new(MockBackend::with_files(files));
    let portal = portal_over(backend.clone());
    portal.refresh_files().await.unwrap();

    assert_eq!(portal.index_test_files().await.unwrap(), 2);
    let calls = backend.calls();
    assert!(calls.contains(&"rag:case1".to_string()));
    assert!(calls.contains(&"rag:case2".to_string()));
    assert!(!calls.contains(&"rag:file2".to_string()));
}

#[tokio::test]
async fn test_delete_file_keeps_folder() {
    let portal = portal_over(Arc::new(MockBackend::with_files(sample_files())));
    portal.refresh_files().await.unwrap();
    portal.toggle_file_selection("file3").await;

    portal.delete_file("file3", "Project B").await.unwrap();

    let state = portal.state().await;
    assert!(state.files_by_folder().get("Project B").is_empty());
    assert!(state.root().contains("Project B"));
    assert!(!state.is_selected("file3"));
}

#[tokio::test]
async fn test_chat_requires_selection_and_streams() {
    let backend = Arc::new(MockBackend::with_files(sample_files()));
    let portal = portal_over(backend.clone());
    portal.refresh_files().await.unwrap();

    let err = portal.send_chat("What changed?", None).await.unwrap_err();
    assert!(matches!(err, PortalError::Validation { .. }));
    assert!(portal.state().await.transcript().is_empty());

    portal.toggle_file_selection("file1").await;
    let (tx, mut rx) = tokio::sync::mpsc::unbounded_channel();
    let reply = portal.send_chat("What changed?", Some(tx)).await.unwrap();
    assert_eq!(reply, "Revenue grew 12%.");

    let mut streamed = Vec::new();
    while let Some(part) = rx.recv().await {
        streamed.push(part);
    }
    assert_eq!(streamed.len(), 3);
    assert_eq!(portal.state().await.transcript().len(), 2);
    assert!(backend.calls().contains(&"chat:file1".to_string()));
}

#[tokio::test]
async fn test_retrieve_chunks_uses_selection() {
    let backend = Arc::new(MockBackend::with_files(sample_files()));
    let portal = portal_over(backend.clone());
    portal.toggle_file_selection("file4").await;
    portal.toggle_file_selection("file5").await;

    let err = portal.retrieve_chunks(ChunkQuery::new("  ")).await.unwrap_err();
    assert!(matches!(err, PortalError::Validation { .. }));

    portal
        .retrieve_chunks(ChunkQuery::new("revenue growth").with_top_k(8))
        .await
        .unwrap();
    assert!(backend.calls().contains(&"chunks:8:file4,file5".to_string()));
    assert!(portal.state().await.chunks().is_some());
}

#[tokio::test]
async fn test_summary_lifecycle() {
    let backend = Arc::new(MockBackend::with_files(sample_files()));
    let portal = portal_over(backend.clone());

    assert!(matches!(
        portal.generate_summary("report").await,
        Err(PortalError::Validation { .. })
    ));

    portal.toggle_file_selection("file1").await;
    assert!(matches!(
        portal.generate_summary("   ").await,
        Err(PortalError::Validation { .. })
    ));

    portal.generate_summary(" Q3 report ").await.unwrap();
    {
        let state = portal.state().await;
        assert_eq!(state.summaries().len(), 1);
        assert_eq!(state.summaries()[0].file_name, "Q3 report");
        assert_eq!(state.summaries()[0].download_url(), "https://bucket/Q3 report");
    }

    portal.delete_summary("Q3 report", "s-Q3 report").await.unwrap();
    assert!(portal.state().await.summaries().is_empty());
}

#[tokio::test]
async fn test_sections_follow_selection() {
    let backend = Arc::new(MockBackend::with_files(sample_files()));
    let portal = portal_over(backend.clone());

    assert_eq!(portal.refresh_sections().await.unwrap(), 0);
    assert!(backend.calls().is_empty());

    portal.toggle_file_selection("file1").await;
    assert_eq!(portal.refresh_sections().await.unwrap(), 1);
    assert_eq!(portal.state().await.sections()[0].pages, vec![3, 4]);

    portal.toggle_file_selection("file1").await;
    assert_eq!(portal.refresh_sections().await.unwrap(), 0);
    assert!(portal.state().await.sections().is_empty());
}

#[tokio::test]
async fn test_test_case_validation() {
    let backend = Arc::new(MockBackend::default());
    let portal = portal_over(backend.clone());

    let missing_output = NewTestCase {
        file_id_list: vec!["file1".to_string()],
        prompt: "Summarize".to_string(),
        expected_output: "  ".to_string(),
    };
    assert!(matches!(
        portal.add_test_case(missing_output).await,
        Err(PortalError::Validation { .. })
    ));

    let no_files = NewTestCase {
        file_id_list: Vec::new(),
        prompt: "Summarize".to_string(),
        expected_output: "A summary".to_string(),
    };
    portal.add_test_case(no_files).await.unwrap();
    portal.remove_test_case("7").await.unwrap();
    assert_eq!(
        backend.calls(),
        vec!["testcase:Summarize", "delete_testcase:7"]
    );
}

#[tokio::test]
async fn test_create_folder_notifies() {
    let portal = portal_over(Arc::new(MockBackend::with_files(sample_files())));
    portal.refresh_files().await.unwrap();
    portal.drain_notifications().await;

    portal.create_folder(Some("Project B"), "Drafts").await.unwrap();
    assert!(portal.create_folder(None, "Project A").await.is_err());

    let notes = portal.drain_notifications().await;
    assert_eq!(notes[0].message, "Folder \"Drafts\" created successfully!");
    assert_eq!(notes[1].message, "Folder already exists");
}

#[tokio::test]
async fn test_session_login_and_logout() {
    let store = Arc::new(MemoryStore::new());
    let backend = Arc::new(MockBackend {
        grant: Some(TokenGrant {
            access_token: Some("tok".to_string()),
            role: Some("super_admin".to_string()),
        }),
        token_valid: true,
        ..Default::default()
    });
    let session = Session::new(backend.clone(), store.clone());

    assert!(!session.check_auth().await.unwrap());

    let user = session.login("admin@example.com", "secret").await.unwrap();
    assert_eq!(user.role, Some(Role::SuperAdmin));
    assert_eq!(
        store.get("access_token").await.unwrap().as_deref(),
        Some("tok")
    );

    assert!(session.check_auth().await.unwrap());
    let user = session.current_user().await.unwrap().unwrap();
    assert_eq!(user.email.as_deref(), Some("verified@example.com"));
    assert_eq!(user.role, Some(Role::Admin));

    session.logout().await.unwrap();
    assert!(!session.is_authenticated().await);
    assert!(!store.contains("user_email").await);
}

#[tokio::test]
async fn test_invalid_token_signs_out() {
    let store = Arc::new(MemoryStore::new());
    store.set("access_token", "stale").await.unwrap();
    let session = Session::new(Arc::new(MockBackend::default()), store.clone());

    assert!(!session.check_auth().await.unwrap());
    assert!(!store.contains("access_token").await);
}

#[tokio::test]
async fn test_register_messages() {
    let backend = Arc::new(MockBackend {
        register_error: Some("Email is not invited to register".to_string()),
        ..Default::default()
    });
    let session = Session::new(backend, Arc::new(MemoryStore::new()));

    match session.register("new@example.com", "pw").await {
        Err(PortalError::Api { message, .. }) => {
            assert!(message.starts_with("Your email is not invited"))
        }
        other => panic!("Expected Api error, got {:?}", other.map(|_| ())),
    }
}

#[tokio::test]
async fn test_missing_token_in_grant() {
    let backend = Arc::new(MockBackend {
        grant: Some(TokenGrant {
            access_token: None,
            role: None,
        }),
        ..Default::default()
    });
    let session = Session::new(backend, Arc::new(MemoryStore::new()));

    assert!(matches!(
        session.login("a@b.c", "pw").await,
        Err(PortalError::InvalidResponse { .. })
    ));
    assert!(!session.is_authenticated().await);
}

#[tokio::test]
async fn test_invite_requires_super_admin() {
    let store = Arc::new(MemoryStore::new());
    let backend = Arc::new(MockBackend {
        grant: Some(TokenGrant {
            access_token: Some("tok".to_string()),
            role: Some("user".to_string()),
        }),
        ..Default::default()
    });
    let session = Session::new(backend.clone(), store.clone());
    session.login("u@example.com", "pw").await.unwrap();

    assert!(matches!(
        session.invite("new@example.com", Role::User).await,
        Err(PortalError::Forbidden { .. })
    ));

    store.set("user_role", "super_admin").await.unwrap();
    let message = session.invite("new@example.com", Role::Admin).await.unwrap();
    assert_eq!(message, "Invited new@example.com");
    assert_eq!(backend.calls(), vec!["invite:new@example.com:admin"]);
}

#[tokio::test]
async fn test_concurrent_operations_on_different_keys() {
    let backend = Arc::new(MockBackend::with_files(sample_files()));
    let portal = portal_over(backend.clone());
    portal.refresh_files().await.unwrap();

    let (a, b, c) = tokio::join!(
        portal.create_rag("file2", "Project A"),
        portal.create_rag("file3", "Project B"),
        portal.delete_file("file5", "Project C/Data/Results"),
    );
    assert!(a.is_ok() && b.is_ok() && c.is_ok());

    let state = portal.state().await;
    assert!(state.files_by_folder().get("Project B")[0].rag_status);
    assert!(state.files_by_folder().get("Project C/Data/Results").is_empty());
}
