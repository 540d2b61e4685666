//! Flattened, indent-aware rows for the folder tree plus the open-folder
//! and file-selection state that drives them.

use std::collections::{HashMap, HashSet};

use crate::tree::{FilesByFolder, FolderNode};
use crate::types::{display_name, FileRecord};

/// Open/closed state per folder path. Absent means closed.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct OpenFolders {
    state: HashMap<String, bool>,
}

impl OpenFolders {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_open(&self, path: &str) -> bool {
        self.state.get(path).copied().unwrap_or(false)
    }

    /// The recorded state, `None` if the folder was never toggled
    pub fn get(&self, path: &str) -> Option<bool> {
        self.state.get(path).copied()
    }

    /// Flip `path` and return its new state. The first toggle opens.
    pub fn toggle(&mut self, path: &str) -> bool {
        let open = !self.is_open(path);
        self.state.insert(path.to_string(), open);
        open
    }
}

/// Set of checked file ids
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Selection {
    ids: HashSet<String>,
    order: Vec<String>,
}

impl Selection {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add `file_id` if absent, otherwise remove it. Returns whether it is
    /// selected afterwards.
    pub fn toggle(&mut self, file_id: &str) -> bool {
        if self.ids.remove(file_id) {
            self.order.retain(|id| id != file_id);
            false
        } else {
            self.ids.insert(file_id.to_string());
            self.order.push(file_id.to_string());
            true
        }
    }

    pub fn contains(&self, file_id: &str) -> bool {
        self.ids.contains(file_id)
    }

    /// Selected ids in the order they were checked
    pub fn ids(&self) -> &[String] {
        &self.order
    }

    pub fn retain(&mut self, mut keep: impl FnMut(&str) -> bool) {
        self.order.retain(|id| keep(id));
        let order = &self.order;
        self.ids.retain(|id| order.contains(id));
    }

    pub fn len(&self) -> usize {
        self.order.len()
    }

    pub fn is_empty(&self) -> bool {
        self.order.is_empty()
    }

    pub fn clear(&mut self) {
        self.ids.clear();
        self.order.clear();
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DisplayRow {
    Folder {
        path: String,
        name: String,
        depth: usize,
        is_open: bool,
    },
    File {
        file_id: String,
        file_name: String,
        depth: usize,
    },
}

impl DisplayRow {
    pub fn depth(&self) -> usize {
        match self {
            DisplayRow::Folder { depth, .. } | DisplayRow::File { depth, .. } => *depth,
        }
    }

    /// Text shown for the row: folder name, or the file name's last segment
    pub fn label(&self) -> &str {
        match self {
            DisplayRow::Folder { name, .. } => name,
            DisplayRow::File { file_name, .. } => display_name(file_name),
        }
    }
}

enum Frame<'a> {
    Children {
        node: &'a FolderNode,
        next: usize,
        depth: usize,
    },
    Files {
        files: &'a [FileRecord],
        next: usize,
        depth: usize,
    },
}

/// Lazy depth-first walk over the visible part of a folder tree
pub struct Rows<'a> {
    files: &'a FilesByFolder,
    open: &'a OpenFolders,
    stack: Vec<Frame<'a>>,
}

impl<'a> Iterator for Rows<'a> {
    type Item = DisplayRow;

    fn next(&mut self) -> Option<DisplayRow> {
        let (by_folder, open) = (self.files, self.open);
        loop {
            match self.stack.last_mut()? {
                Frame::Children { node, next, depth } => {
                    let node: &'a FolderNode = *node;
                    let Some((_, child)) = node.children.get_index(*next) else {
                        self.stack.pop();
                        continue;
                    };
                    *next += 1;
                    let depth = *depth;
                    let is_open = open.is_open(&child.path);

                    if is_open {
                        // Subfolders come before the folder's own files
                        self.stack.push(Frame::Files {
                            files: by_folder.get(&child.path),
                            next: 0,
                            depth: depth + 1,
                        });
                        self.stack.push(Frame::Children {
                            node: child,
                            next: 0,
                            depth: depth + 1,
                        });
                    }

                    return Some(DisplayRow::Folder {
                        path: child.path.clone(),
                        name: child.name.clone(),
                        depth,
                        is_open,
                    });
                }
                Frame::Files { files, next, depth } => {
                    let files: &'a [FileRecord] = *files;
                    let Some(file) = files.get(*next) else {
                        self.stack.pop();
                        continue;
                    };
                    *next += 1;
                    return Some(DisplayRow::File {
                        file_id: file.file_id.clone(),
                        file_name: file.file_name.clone(),
                        depth: *depth,
                    });
                }
            }
        }
    }
}

/// Rows for the children of `node`, starting at `depth`.
pub fn render<'a>(
    node: &'a FolderNode,
    files: &'a FilesByFolder,
    open: &'a OpenFolders,
    depth: usize,
) -> Rows<'a> {
    Rows {
        files,
        open,
        stack: vec![Frame::Children {
            node,
            next: 0,
            depth,
        }],
    }
}
