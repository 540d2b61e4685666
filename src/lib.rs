pub mod backend;
pub mod config;
pub mod error;
pub mod http;
pub mod portal;
pub mod session;
pub mod store;
pub mod tree;
pub mod types;
pub mod view;

pub use backend::DocumentBackend;
pub use config::PortalConfig;
pub use error::{PortalError, Result};
pub use http::HttpBackend;
pub use portal::{DocumentPortal, LoadingKey, PortalState};
pub use session::Session;
pub use store::{DiskStore, KeyValueStore, MemoryStore, NoStore};
pub use tree::{build, FilesByFolder, FolderNode};
pub use types::{
    AuthUser, ChatMessage, ChatRequest, ChatRole, Chunk, ChunkMetadata, ChunkQuery, ChunkResponse,
    FileRecord, FileRef, NewTestCase, Notification, NotificationLevel, PendingUpload, Role,
    Section, StatementType, SummaryFile, TestCase, TokenGrant, TokenStatus,
};
pub use view::{render, DisplayRow, OpenFolders, Rows, Selection};
