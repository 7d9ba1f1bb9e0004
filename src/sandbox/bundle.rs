//! Tool bundles - the user-submitted files for one execution

use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::path::{Component, Path};

use crate::error::{Error, Result};

/// Maximum number of files accepted in one bundle
pub const MAX_BUNDLE_FILES: usize = 1000;

/// Maximum total bundle size in bytes (50MB)
pub const MAX_BUNDLE_BYTES: u64 = 50 * 1024 * 1024;

/// One submitted file
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BundleFile {
    /// Path relative to the working directory
    pub filename: String,
    /// File contents
    pub content: String,
    /// Declared size; computed from content when absent
    #[serde(default)]
    pub size_bytes: u64,
}

impl BundleFile {
    /// Create a file, deriving its size from the content
    pub fn new(filename: impl Into<String>, content: impl Into<String>) -> Self {
        let content = content.into();
        BundleFile {
            filename: filename.into(),
            size_bytes: content.len() as u64,
            content,
        }
    }

    /// Effective size: the larger of declared and actual
    pub fn effective_size(&self) -> u64 {
        self.size_bytes.max(self.content.len() as u64)
    }

    /// Lowercased extension, if any
    pub fn extension(&self) -> Option<String> {
        Path::new(&self.filename)
            .extension()
            .and_then(|e| e.to_str())
            .map(|e| e.to_ascii_lowercase())
    }
}

/// Ordered list of submitted files
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ToolBundle {
    pub files: Vec<BundleFile>,
}

impl ToolBundle {
    pub fn new(files: Vec<BundleFile>) -> Self {
        ToolBundle { files }
    }

    /// Single-file bundle
    pub fn single(filename: impl Into<String>, content: impl Into<String>) -> Self {
        ToolBundle {
            files: vec![BundleFile::new(filename, content)],
        }
    }

    pub fn is_empty(&self) -> bool {
        self.files.is_empty()
    }

    pub fn len(&self) -> usize {
        self.files.len()
    }

    /// Total effective size of all files
    pub fn total_bytes(&self) -> u64 {
        self.files.iter().map(BundleFile::effective_size).sum()
    }

    /// Find a file by exact name
    pub fn get(&self, filename: &str) -> Option<&BundleFile> {
        self.files.iter().find(|f| f.filename == filename)
    }

    /// Reject bundles that cannot be safely written into a container
    pub fn validate(&self) -> Result<()> {
        if self.files.is_empty() {
            return Err(Error::InvalidInput("Bundle contains no files".to_string()));
        }
        if self.files.len() > MAX_BUNDLE_FILES {
            return Err(Error::InvalidInput(format!(
                "Bundle has {} files, limit is {}",
                self.files.len(),
                MAX_BUNDLE_FILES
            )));
        }
        let total = self.total_bytes();
        if total > MAX_BUNDLE_BYTES {
            return Err(Error::InvalidInput(format!(
                "Bundle is {} bytes, limit is {}",
                total, MAX_BUNDLE_BYTES
            )));
        }

        let mut seen = HashSet::new();
        for file in &self.files {
            validate_filename(&file.filename)?;
            if !seen.insert(file.filename.as_str()) {
                return Err(Error::InvalidInput(format!(
                    "Duplicate filename: {}",
                    file.filename
                )));
            }
        }
        Ok(())
    }
}

fn validate_filename(name: &str) -> Result<()> {
    if name.trim().is_empty() {
        return Err(Error::InvalidInput("Empty filename".to_string()));
    }
    if name.contains('\0') {
        return Err(Error::InvalidInput(format!("Invalid filename: {:?}", name)));
    }
    for component in Path::new(name).components() {
        match component {
            Component::Normal(_) | Component::CurDir => {}
            _ => {
                return Err(Error::InvalidInput(format!(
                    "Filename must be a relative path without '..': {}",
                    name
                )))
            }
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_validate_accepts_nested_paths() {
        let bundle = ToolBundle::new(vec![
            BundleFile::new("index.js", "console.log(1)"),
            BundleFile::new("lib/util.js", "module.exports = {}"),
        ]);
        assert!(bundle.validate().is_ok());
        assert_eq!(bundle.total_bytes(), 14 + 19);
    }

    #[test]
    fn test_validate_rejects_escapes() {
        assert!(ToolBundle::single("../etc/passwd", "x").validate().is_err());
        assert!(ToolBundle::single("/abs.sh", "x").validate().is_err());
        assert!(ToolBundle::default().validate().is_err());
    }

    #[test]
    fn test_validate_rejects_duplicates() {
        let bundle = ToolBundle::new(vec![
            BundleFile::new("a.py", "1"),
            BundleFile::new("a.py", "2"),
        ]);
        assert!(bundle.validate().is_err());
    }

    #[test]
    fn test_declared_size_wins_when_larger() {
        let mut file = BundleFile::new("big.bin", "abc");
        file.size_bytes = 11 * 1024 * 1024;
        assert_eq!(file.effective_size(), 11 * 1024 * 1024);
        assert_eq!(file.extension().as_deref(), Some("bin"));
    }
}
