use async_trait::async_trait;
use reqwest::{multipart, Client, Method, RequestBuilder, Response, StatusCode};
use serde::{de::DeserializeOwned, Deserialize};
use serde_json::json;
use std::sync::Arc;
use tokio::sync::mpsc::UnboundedSender;
use tracing::{debug, info, warn};

use crate::{
    backend::DocumentBackend,
    error::{PortalError, Result},
    store::{clear_session, KeyValueStore, ACCESS_TOKEN_KEY},
    types::{
        ChatRequest, ChunkQuery, ChunkResponse, FileRecord, NewTestCase, PendingUpload, Section,
        SummaryFile, TestCase, TokenGrant, TokenStatus,
    },
};

/// Document backend reached over its REST API
///
/// The bearer token is read from the session store on every request.
/// A 401 from any endpoint clears the session keys.
#[derive(Clone)]
pub struct HttpBackend {
    client: Client,
    base_url: String,
    store: Arc<dyn KeyValueStore>,
}

#[derive(Deserialize)]
#[serde(tag = "status", rename_all = "lowercase")]
enum FilesEnvelope {
    Success { data: Vec<FileRecord> },
    Error {
        #[serde(default)]
        message: String,
    },
}

#[derive(Deserialize)]
#[serde(tag = "status", rename_all = "lowercase")]
enum AckEnvelope {
    Success {
        #[serde(default)]
        message: Option<String>,
    },
    Error {
        #[serde(default)]
        message: String,
    },
}

#[derive(Deserialize)]
struct SummaryFilesEnvelope {
    status_code: u16,
    #[serde(default)]
    data: Vec<SummaryFile>,
    #[serde(default)]
    message: String,
}

#[derive(Deserialize)]
struct SectionsEnvelope {
    status: u16,
    #[serde(default)]
    response: Option<SectionsBody>,
}

#[derive(Deserialize)]
struct SectionsBody {
    #[serde(default)]
    sections: Vec<Section>,
}

impl HttpBackend {
    /// Create a backend rooted at `base_url`
    ///
    /// # Arguments
    /// * `base_url` - API root, e.g. `https://api.example.com`
    /// * `store` - Session store holding the bearer token
    pub fn new(base_url: impl Into<String>, store: Arc<dyn KeyValueStore>) -> Self {
        let client = Client::builder()
            .user_agent(concat!("doc-portal/", env!("CARGO_PKG_VERSION")))
            .build()
            .unwrap_or_else(|_| Client::new());

        Self {
            client,
            base_url: base_url.into(),
            store,
        }
    }

    /// Join the API root with an endpoint path
    fn url(&self, path: &str) -> String {
        format!(
            "{}/{}",
            self.base_url.trim_end_matches('/'),
            path.trim_start_matches('/')
        )
    }

    /// Start a request, attaching the bearer token if one is stored
    async fn request(&self, method: Method, path: &str) -> Result<RequestBuilder> {
        let url = self.url(path);
        debug!(%method, %url, "sending request");

        let mut builder = self.client.request(method, url);
        if let Some(token) = self.store.get(ACCESS_TOKEN_KEY).await? {
            builder = builder.bearer_auth(token);
        }
        Ok(builder)
    }

    /// Send a request and map non-success statuses to errors
    async fn send(&self, builder: RequestBuilder, what: &str) -> Result<Response> {
        self.dispatch(builder, what, true).await
    }

    /// Send a sign-in request. A 401 here means bad credentials, not an
    /// expired session, so the stored session is left alone.
    async fn send_credentials(&self, builder: RequestBuilder, what: &str) -> Result<Response> {
        self.dispatch(builder, what, false).await
    }

    async fn dispatch(
        &self,
        builder: RequestBuilder,
        what: &str,
        session_bound: bool,
    ) -> Result<Response> {
        let response = builder.send().await?;
        let status = response.status();

        if status.is_success() {
            debug!(%status, what, "request succeeded");
            return Ok(response);
        }

        warn!(%status, what, "request failed");
        match status {
            StatusCode::UNAUTHORIZED if session_bound => {
                clear_session(self.store.as_ref()).await?;
                info!("session cleared after unauthorized response");
                Err(PortalError::Unauthorized)
            }
            StatusCode::NOT_FOUND => Err(PortalError::NotFound {
                what: what.to_string(),
            }),
            status => {
                let body = response.text().await.unwrap_or_default();
                Err(PortalError::Api {
                    status: status.as_u16(),
                    message: error_message(&body),
                })
            }
        }
    }

    /// Decode a JSON body, reporting shape mismatches as invalid responses
    async fn decode<T: DeserializeOwned>(response: Response, what: &str) -> Result<T> {
        let body = response.bytes().await?;
        serde_json::from_slice(&body)
            .map_err(|e| PortalError::invalid_response(format!("{}: {}", what, e)))
    }

    async fn acknowledge(response: Response, what: &str) -> Result<Option<String>> {
        match Self::decode::<AckEnvelope>(response, what).await? {
            AckEnvelope::Success { message } => Ok(message),
            AckEnvelope::Error { message } => Err(PortalError::Api {
                status: 200,
                message,
            }),
        }
    }
}

/// Pull the human-readable message out of an error body
///
/// Prefers `detail`, then `message`; falls back to the raw text.
fn error_message(body: &str) -> String {
    if let Ok(value) = serde_json::from_str::<serde_json::Value>(body) {
        for field in ["detail", "message"] {
            if let Some(text) = value.get(field).and_then(|v| v.as_str()) {
                return text.to_string();
            }
        }
    }
    body.trim().to_string()
}

/// Take the longest valid UTF-8 prefix out of `buf`
///
/// An incomplete trailing sequence stays in the buffer for the next chunk;
/// invalid bytes are replaced.
fn take_utf8(buf: &mut Vec<u8>) -> String {
    match std::str::from_utf8(buf) {
        Ok(text) => {
            let text = text.to_string();
            buf.clear();
            text
        }
        Err(e) if e.error_len().is_none() => {
            let valid = e.valid_up_to();
            let rest = buf.split_off(valid);
            let text = String::from_utf8_lossy(buf).to_string();
            *buf = rest;
            text
        }
        Err(_) => {
            let text = String::from_utf8_lossy(buf).to_string();
            buf.clear();
            text
        }
    }
}

fn upload_part(file: &PendingUpload) -> Result<multipart::Part> {
    let mime = if file.file_name.to_ascii_lowercase().ends_with(".pdf") {
        "application/pdf"
    } else {
        "application/octet-stream"
    };
    Ok(multipart::Part::bytes(file.content.to_vec())
        .file_name(file.file_name.clone())
        .mime_str(mime)?)
}

#[async_trait]
impl DocumentBackend for HttpBackend {
    async fn list_files(&self, user_id: &str) -> Result<Vec<FileRecord>> {
        let builder = self
            .request(Method::GET, "/doc-eval/get-files")
            .await?
            .query(&[("user_id", user_id)]);
        let response = self.send(builder, "file listing").await?;

        match Self::decode::<FilesEnvelope>(response, "file listing").await? {
            FilesEnvelope::Success { data } => Ok(data),
            FilesEnvelope::Error { message } => Err(PortalError::Api {
                status: 200,
                message,
            }),
        }
    }

    async fn upload_files(
        &self,
        user_id: &str,
        folder_path: &str,
        files: &[PendingUpload],
    ) -> Result<Vec<FileRecord>> {
        let mut form = multipart::Form::new()
            .text("user_id", user_id.to_string())
            .text("folder_name", folder_path.to_string());
        for file in files {
            form = form.part("files", upload_part(file)?);
        }

        let builder = self
            .request(Method::POST, "/doc-eval/upload-files")
            .await?
            .multipart(form);
        let response = self.send(builder, "upload").await?;

        match Self::decode::<FilesEnvelope>(response, "upload").await? {
            FilesEnvelope::Success { data } => Ok(data),
            FilesEnvelope::Error { message } => Err(PortalError::Api {
                status: 200,
                message,
            }),
        }
    }

    async fn create_rag(&self, user_id: &str, file_id: &str) -> Result<()> {
        let builder = self
            .request(Method::POST, "/doc-eval/create-rag")
            .await?
            .json(&json!({ "file_id": file_id, "user_id": user_id }));
        let response = self.send(builder, "RAG creation").await?;
        Self::acknowledge(response, "RAG creation").await?;
        Ok(())
    }

    async fn delete_file(&self, user_id: &str, file_id: &str) -> Result<()> {
        let builder = self
            .request(Method::DELETE, "/doc-eval/delete-file")
            .await?
            .query(&[("file_id", file_id), ("user_id", user_id)]);
        let response = self.send(builder, "file deletion").await?;
        Self::acknowledge(response, "file deletion").await?;
        Ok(())
    }

    async fn chat(
        &self,
        request: &ChatRequest,
        updates: Option<UnboundedSender<String>>,
    ) -> Result<String> {
        let builder = self.request(Method::POST, "/doc-eval/chat").await?.json(request);
        let mut response = self.send(builder, "chat").await?;

        let mut reply = String::new();
        let mut pending = Vec::new();
        while let Some(chunk) = response.chunk().await? {
            pending.extend_from_slice(&chunk);
            let text = take_utf8(&mut pending);
            if text.is_empty() {
                continue;
            }
            if let Some(tx) = &updates {
                // A dropped receiver only means nobody is watching
                let _ = tx.send(text.clone());
            }
            reply.push_str(&text);
        }
        if !pending.is_empty() {
            let text = String::from_utf8_lossy(&pending).to_string();
            if let Some(tx) = &updates {
                let _ = tx.send(text.clone());
            }
            reply.push_str(&text);
        }

        Ok(reply)
    }

    async fn retrieve_chunks(&self, query: &ChunkQuery) -> Result<ChunkResponse> {
        let builder = self
            .request(Method::POST, "/doc-eval/retrieve-chunks")
            .await?
            .json(query);
        let response = self.send(builder, "chunk retrieval").await?;
        let chunks: ChunkResponse = Self::decode(response, "chunk retrieval").await?;

        if chunks.status_code != 200 {
            return Err(PortalError::Api {
                status: chunks.status_code,
                message: chunks.message,
            });
        }
        Ok(chunks)
    }

    async fn generate_summary(
        &self,
        user_id: &str,
        thread_id: &str,
        file_ids: &[String],
        file_name: &str,
    ) -> Result<()> {
        let builder = self
            .request(Method::POST, "/doc-eval/summary-file")
            .await?
            .json(&json!({
                "thread_id": thread_id,
                "file_id_list": file_ids,
                "file_name": file_name,
                "user_id": user_id,
            }));
        self.send(builder, "summary generation").await?;
        Ok(())
    }

    async fn list_summary_files(&self) -> Result<Vec<SummaryFile>> {
        let builder = self
            .request(Method::GET, "/doc-eval/get-summary-files")
            .await?;
        let response = self.send(builder, "summary listing").await?;
        let envelope: SummaryFilesEnvelope = Self::decode(response, "summary listing").await?;

        if envelope.status_code != 200 {
            return Err(PortalError::Api {
                status: envelope.status_code,
                message: envelope.message,
            });
        }
        Ok(envelope.data)
    }

    async fn delete_summary_file(&self, user_id: &str, file_key: &str) -> Result<()> {
        let builder = self
            .request(Method::DELETE, "/doc-eval/delete-summary-file")
            .await?
            .query(&[("file_key", file_key), ("user_id", user_id)]);
        self.send(builder, "summary deletion").await?;
        Ok(())
    }

    async fn dynamic_sections(&self, user_id: &str, file_ids: &[String]) -> Result<Vec<Section>> {
        let builder = self
            .request(Method::POST, "/doc-eval/get-dynamic-sections")
            .await?
            .json(&json!({ "file_id_list": file_ids, "user_id": user_id }));
        let response = self.send(builder, "section extraction").await?;
        let envelope: SectionsEnvelope = Self::decode(response, "section extraction").await?;

        match envelope {
            SectionsEnvelope {
                status: 200,
                response: Some(body),
            } => Ok(body.sections),
            SectionsEnvelope { status, .. } => Err(PortalError::Api {
                status,
                message: "Failed to fetch dynamic sections".to_string(),
            }),
        }
    }

    async fn login(&self, email: &str, password: &str) -> Result<TokenGrant> {
        let builder = self
            .request(Method::POST, "/auth/login")
            .await?
            .json(&json!({ "email": email, "password": password }));
        let response = self.send_credentials(builder, "login").await?;
        Self::decode(response, "login").await
    }

    async fn register(&self, email: &str, password: &str) -> Result<TokenGrant> {
        let builder = self
            .request(Method::POST, "/auth/register")
            .await?
            .json(&json!({ "email": email, "password": password }));
        let response = self.send_credentials(builder, "registration").await?;
        Self::decode(response, "registration").await
    }

    async fn invite(&self, email: &str, role: &str) -> Result<Option<String>> {
        let builder = self
            .request(Method::POST, "/auth/invite")
            .await?
            .json(&json!({ "email": email, "role": role }));
        let response = self.send(builder, "invitation").await?;
        Self::acknowledge(response, "invitation").await
    }

    async fn verify_token(&self) -> Result<TokenStatus> {
        let builder = self.request(Method::GET, "/auth/verify-token").await?;
        let response = self.send(builder, "token verification").await?;
        Self::decode(response, "token verification").await
    }

    async fn list_test_cases(&self) -> Result<Vec<TestCase>> {
        let builder = self.request(Method::GET, "/testcases/").await?;
        let response = self.send(builder, "test case listing").await?;
        Self::decode(response, "test case listing").await
    }

    async fn create_test_case(&self, case: &NewTestCase) -> Result<()> {
        let builder = self.request(Method::POST, "/testcases/").await?.json(case);
        self.send(builder, "test case creation").await?;
        Ok(())
    }

    async fn delete_test_case(&self, id: &str) -> Result<()> {
        let path = format!("/testcases/{}", id);
        let builder = self.request(Method::DELETE, &path).await?;
        self.send(builder, "test case deletion").await?;
        Ok(())
    }

    fn identifier(&self) -> String {
        self.base_url.clone()
    }
}
