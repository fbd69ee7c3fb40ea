//! The local buffer of the open document.

use serde::Serialize;

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct FileDocument {
    pub path: String,
    pub content: String,
    /// Local edits not yet written to the store.
    pub dirty: bool,
}

impl FileDocument {
    /// A buffer freshly loaded from the store.
    pub fn open(path: impl Into<String>, content: impl Into<String>) -> Self {
        Self {
            path: path.into(),
            content: content.into(),
            dirty: false,
        }
    }

    /// Replace the buffer with a user edit. Returns whether anything changed.
    pub fn edit(&mut self, content: impl Into<String>) -> bool {
        let content = content.into();
        if content == self.content {
            return false;
        }
        self.content = content;
        self.dirty = true;
        true
    }

    /// Record that `content` is now what the store holds.
    pub fn commit(&mut self, content: impl Into<String>) {
        self.content = content.into();
        self.dirty = false;
    }
}
