//! Folder hierarchy built from flat `/`-delimited folder paths.
//!
//! Files are never stored on tree nodes. A node's `path` is the key into
//! [`FilesByFolder`], which is the only place file records live.

use indexmap::IndexMap;

use crate::types::FileRecord;

/// Files grouped by exact folder path, in first-seen order
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FilesByFolder {
    folders: IndexMap<String, Vec<FileRecord>>,
}

impl FilesByFolder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Files directly inside `folder_path`; empty if the folder is unknown
    pub fn get(&self, folder_path: &str) -> &[FileRecord] {
        self.folders
            .get(folder_path)
            .map(Vec::as_slice)
            .unwrap_or(&[])
    }

    pub fn contains_folder(&self, folder_path: &str) -> bool {
        self.folders.contains_key(folder_path)
    }

    /// Append a record under its own folder path
    pub fn push(&mut self, record: FileRecord) {
        self.folders
            .entry(record.folder_path.clone())
            .or_default()
            .push(record);
    }

    /// Make sure `folder_path` has an entry, even if it holds no files
    pub fn ensure_folder(&mut self, folder_path: &str) {
        self.folders.entry(folder_path.to_string()).or_default();
    }

    /// Remove a file from a folder. The folder entry itself stays.
    pub fn remove(&mut self, folder_path: &str, file_id: &str) -> Option<FileRecord> {
        let files = self.folders.get_mut(folder_path)?;
        let index = files.iter().position(|f| f.file_id == file_id)?;
        Some(files.remove(index))
    }

    pub fn find_mut(&mut self, folder_path: &str, file_id: &str) -> Option<&mut FileRecord> {
        self.folders
            .get_mut(folder_path)?
            .iter_mut()
            .find(|f| f.file_id == file_id)
    }

    /// Look a file up by id across every folder
    pub fn find(&self, file_id: &str) -> Option<&FileRecord> {
        self.files().find(|f| f.file_id == file_id)
    }

    pub fn folders(&self) -> impl Iterator<Item = &str> {
        self.folders.keys().map(String::as_str)
    }

    pub fn files(&self) -> impl Iterator<Item = &FileRecord> {
        self.folders.values().flatten()
    }

    /// Number of folder entries
    pub fn len(&self) -> usize {
        self.folders.len()
    }

    pub fn is_empty(&self) -> bool {
        self.folders.is_empty()
    }
}

/// A folder in the tree. The root has an empty name and path.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FolderNode {
    pub name: String,
    pub path: String,
    pub children: IndexMap<String, FolderNode>,
}

impl FolderNode {
    pub fn root() -> Self {
        Self::default()
    }

    /// Walk `folder_path` from this node, creating missing nodes.
    ///
    /// Meant to be called on the root: each created node's path is the
    /// `/`-join of the segments walked so far. Empty segments are kept as
    /// empty-named children.
    pub fn ensure_path(&mut self, folder_path: &str) -> &mut FolderNode {
        let mut current = self;
        let mut path = String::new();
        for (i, segment) in folder_path.split('/').enumerate() {
            if i > 0 {
                path.push('/');
            }
            path.push_str(segment);
            current = current
                .children
                .entry(segment.to_string())
                .or_insert_with(|| FolderNode {
                    name: segment.to_string(),
                    path: path.clone(),
                    children: IndexMap::new(),
                });
        }
        current
    }

    /// The node at `folder_path` below this one
    pub fn find(&self, folder_path: &str) -> Option<&FolderNode> {
        folder_path
            .split('/')
            .try_fold(self, |node, segment| node.children.get(segment))
    }

    pub fn contains(&self, folder_path: &str) -> bool {
        self.find(folder_path).is_some()
    }

    /// Paths of every node below this one, depth first
    pub fn descendant_paths(&self) -> Vec<String> {
        let mut paths = Vec::new();
        let mut stack: Vec<&FolderNode> = self.children.values().rev().collect();
        while let Some(node) = stack.pop() {
            paths.push(node.path.clone());
            stack.extend(node.children.values().rev());
        }
        paths
    }
}

/// Group `records` by folder and materialize the folder tree.
///
/// Intermediate folders are created even when no file sits directly in
/// them. Order everywhere follows first appearance in `records`.
pub fn build(records: &[FileRecord]) -> (FilesByFolder, FolderNode) {
    let mut files = FilesByFolder::new();
    let mut root = FolderNode::root();

    for record in records {
        root.ensure_path(&record.folder_path);
        files.push(record.clone());
    }

    (files, root)
}
