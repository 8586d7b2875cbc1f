use std::cell::RefCell;
use std::collections::{BTreeMap, VecDeque};
use std::io;
use std::path::Path;
use std::rc::Rc;

use async_trait::async_trait;
use sha2::{Digest, Sha256};

use crate::browser::BrowserResult;
use crate::extract::{DirEntry, DirectoryObserver};

#[derive(Debug, Default)]
struct MemoryFile {
    data: Vec<u8>,
    pending: VecDeque<Vec<u8>>,
}

/// A single flat directory held in memory. Paths are reduced to their file
/// name, so any parent directory addresses the same files.
#[derive(Debug, Clone, Default)]
pub struct MemoryDirectory {
    files: Rc<RefCell<BTreeMap<String, MemoryFile>>>,
}

impl MemoryDirectory {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn put(&self, name: &str, data: Vec<u8>) {
        self.files.borrow_mut().insert(
            name.to_string(),
            MemoryFile {
                data,
                pending: VecDeque::new(),
            },
        );
    }

    /// Creates `name` with the first chunk; every listing afterwards appends
    /// the next chunk, imitating a download still being written.
    pub fn put_growing(&self, name: &str, chunks: Vec<Vec<u8>>) {
        let mut pending: VecDeque<Vec<u8>> = chunks.into();
        let data = pending.pop_front().unwrap_or_default();
        self.files
            .borrow_mut()
            .insert(name.to_string(), MemoryFile { data, pending });
    }

    pub fn contents(&self, name: &str) -> Option<Vec<u8>> {
        self.files.borrow().get(name).map(|file| file.data.clone())
    }

    pub fn names(&self) -> Vec<String> {
        self.files.borrow().keys().cloned().collect()
    }
}

fn file_name(path: &Path) -> BrowserResult<String> {
    path.file_name()
        .map(|name| name.to_string_lossy().into_owned())
        .ok_or_else(|| {
            let message = format!("{} has no file name", path.display());
            io::Error::new(io::ErrorKind::InvalidInput, message).into()
        })
}

fn not_found(name: &str) -> io::Error {
    io::Error::new(io::ErrorKind::NotFound, format!("{name} not found"))
}

#[async_trait(?Send)]
impl DirectoryObserver for MemoryDirectory {
    async fn list(&self, _dir: &Path) -> BrowserResult<Vec<DirEntry>> {
        let mut files = self.files.borrow_mut();
        let mut entries = Vec::with_capacity(files.len());
        for (name, file) in files.iter_mut() {
            entries.push(DirEntry {
                name: name.clone(),
                size: file.data.len() as u64,
                modified: None,
            });
            if let Some(chunk) = file.pending.pop_front() {
                file.data.extend(chunk);
            }
        }
        Ok(entries)
    }

    async fn remove(&self, path: &Path) -> BrowserResult<()> {
        let name = file_name(path)?;
        match self.files.borrow_mut().remove(&name) {
            Some(_) => Ok(()),
            None => Err(not_found(&name).into()),
        }
    }

    async fn rename(&self, from: &Path, to: &Path) -> BrowserResult<()> {
        let from = file_name(from)?;
        let to = file_name(to)?;
        let mut files = self.files.borrow_mut();
        let file = files.remove(&from).ok_or_else(|| not_found(&from))?;
        files.insert(to, file);
        Ok(())
    }

    async fn sha256(&self, path: &Path) -> BrowserResult<String> {
        let name = file_name(path)?;
        let files = self.files.borrow();
        let file = files.get(&name).ok_or_else(|| not_found(&name))?;
        Ok(hex::encode(Sha256::digest(&file.data)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn growing_file_reports_size_before_each_append() {
        let dir = MemoryDirectory::new();
        dir.put_growing("report.csv", vec![vec![1; 10], vec![2; 5]]);
        let sizes = |entries: Vec<DirEntry>| entries.iter().map(|e| e.size).collect::<Vec<_>>();
        assert_eq!(sizes(dir.list(Path::new("/d")).await.unwrap()), vec![10]);
        assert_eq!(sizes(dir.list(Path::new("/d")).await.unwrap()), vec![15]);
        assert_eq!(sizes(dir.list(Path::new("/d")).await.unwrap()), vec![15]);
    }

    #[tokio::test]
    async fn rename_overwrites_destination() {
        let dir = MemoryDirectory::new();
        dir.put("new.csv", b"new".to_vec());
        dir.put("prod.csv", b"old".to_vec());
        dir.rename(Path::new("/d/new.csv"), Path::new("/d/prod.csv"))
            .await
            .unwrap();
        assert_eq!(dir.names(), vec!["prod.csv".to_string()]);
        assert_eq!(dir.contents("prod.csv"), Some(b"new".to_vec()));
        assert!(dir.remove(Path::new("/d/new.csv")).await.is_err());
    }
}
