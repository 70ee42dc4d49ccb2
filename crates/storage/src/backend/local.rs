//! Local filesystem storage backend.
//!
//! This module provides a storage backend implementation for the local
//! filesystem. Objects are files below a configured directory; a key is the
//! file's path relative to that directory, `/`-separated. Handy for running
//! the registry against a mirrored bucket during development.

use crate::backend::ObjectInfoStream;
use crate::error::ErrorKind;
use crate::models::content_type_for;
use crate::{Object, ObjectInfo, StorageBackend, error::Result, key::validate as validate_key};
use async_stream::stream;
use async_trait::async_trait;
use exn::ResultExt;
use std::path::{Component, Path, PathBuf};
use tokio::fs::{self, DirEntry};

enum WalkEntry {
    Object(ObjectInfo),
    Descend(PathBuf),
    Skip,
}

/// Local filesystem storage backend.
///
/// # Examples
///
/// ```no_run
/// use s3reg_storage::backend::LocalBackend;
///
/// # fn example() -> Result<(), Box<dyn std::error::Error>> {
/// let backend = LocalBackend::new("mirror", "/srv/registry").expect("valid root");
/// # Ok(())
/// # }
/// ```
#[derive(Clone, Debug)]
pub struct LocalBackend {
    name: String,
    /// Root directory of the mirrored bucket
    root: PathBuf,
}
impl LocalBackend {
    /// Create a new local filesystem backend.
    ///
    /// # Errors
    ///
    /// Returns an error if the path is not absolute, or exists but is not a
    /// directory. Unlike a writable store, a missing root is not created: an
    /// empty registry is more likely a typo than intent, but it is still
    /// served (as empty) rather than refused.
    pub fn new(name: impl Into<String>, root: impl AsRef<Path>) -> Result<Self> {
        let root = root.as_ref().to_path_buf();
        if !root.is_absolute() {
            exn::bail!(ErrorKind::InvalidKey(root.display().to_string()));
        }
        if root.exists() && !root.is_dir() {
            exn::bail!(ErrorKind::InvalidKey(root.display().to_string()));
        }
        if !root.exists() {
            tracing::warn!(root = %root.display(), "Local storage root does not exist; serving an empty registry");
        }
        Ok(Self { name: name.into(), root })
    }

    /// Get the absolute path for an object key.
    fn absolute_path(&self, key: &str) -> Result<PathBuf> {
        let validated = validate_key(key)?;
        Ok(self.root.join(validated))
    }

    /// Convert an absolute path back into an object key.
    fn key_for(&self, absolute: &Path) -> Result<String> {
        let relative = absolute.strip_prefix(&self.root).or_raise(|| {
            ErrorKind::BackendError(format!("path `{}` is not within root `{}`", absolute.display(), self.root.display()))
        })?;
        let mut segments = Vec::new();
        for component in relative.components() {
            match component {
                Component::Normal(s) => match s.to_str() {
                    Some(s) => segments.push(s),
                    None => exn::bail!(ErrorKind::InvalidKey(relative.to_string_lossy().into_owned())),
                },
                _ => exn::bail!(ErrorKind::InvalidKey(relative.to_string_lossy().into_owned())),
            }
        }
        Ok(segments.join("/"))
    }

    fn map_io_error(e: std::io::Error, key: &str) -> ErrorKind {
        match e.kind() {
            std::io::ErrorKind::NotFound => ErrorKind::NotFound(key.to_string()),
            std::io::ErrorKind::PermissionDenied => ErrorKind::PermissionDenied(key.to_string()),
            _ => ErrorKind::Io(e),
        }
    }

    /// Turns one directory entry into something the walk loop can act on, so
    /// that the loop itself never has to deal with `?`.
    async fn process_entry(&self, entry: DirEntry, prefix: Option<&str>) -> Result<WalkEntry> {
        let path = entry.path();
        let key = self.key_for(&path)?;
        let metadata = entry.metadata().await.map_err(|e| Self::map_io_error(e, &key))?;
        if metadata.is_dir() {
            return Ok(match prefix {
                Some(pfx) if !key.starts_with(pfx) && !pfx.starts_with(&format!("{key}/")) => WalkEntry::Skip,
                _ => WalkEntry::Descend(path),
            });
        }
        if let Some(pfx) = prefix
            && !key.starts_with(pfx)
        {
            return Ok(WalkEntry::Skip);
        }
        if metadata.is_file() {
            return Ok(WalkEntry::Object(ObjectInfo::new(key, metadata.len())));
        }
        // Note: silently drop what is most likely a broken symlink.
        Ok(WalkEntry::Skip)
    }
}

#[async_trait]
impl StorageBackend for LocalBackend {
    fn name(&self) -> &str {
        &self.name
    }

    fn list_stream<'a>(&'a self, prefix: Option<&'a str>) -> ObjectInfoStream<'a> {
        // Walk from the deepest directory the prefix fully names. The prefix
        // "black/lo" starts in "black" and matches "black/lodge/..." as well
        // as "black/lounge/...", same as a bucket would.
        let start_dir = match prefix.and_then(|p| p.rsplit_once('/')).map(|(dir, _)| dir) {
            Some(dir) if !dir.is_empty() => match validate_key(dir) {
                Ok(dir) => self.root.join(dir),
                Err(e) => return Box::pin(futures::stream::once(async { Err(e) })),
            },
            _ => self.root.clone(),
        };
        let mut stack = vec![start_dir];

        Box::pin(stream! {
            'dirs: while let Some(current) = stack.pop() {
                let mut entries = match fs::read_dir(&current).await {
                    Ok(entries) => entries,
                    // To stay consistent with the behaviour of S3-compatible
                    // backends, listing a prefix that doesn't exist results
                    // in an empty list, not an error.
                    Err(err) if err.kind() == std::io::ErrorKind::NotFound => continue,
                    Err(err) => {
                        yield Err(exn::Exn::from(Self::map_io_error(err, &current.display().to_string())));
                        continue 'dirs;
                    }
                };

                'entries: loop {
                    let entry = match entries.next_entry().await {
                        Ok(Some(entry)) => entry,
                        Ok(None) => break 'entries,
                        Err(e) => { yield Err(exn::Exn::from(Self::map_io_error(e, &current.display().to_string()))); continue 'entries; },
                    };
                    match self.process_entry(entry, prefix).await {
                        Ok(WalkEntry::Object(o)) => yield Ok(o),
                        Ok(WalkEntry::Descend(d)) => stack.push(d),
                        Ok(WalkEntry::Skip) => {},
                        Err(e) => yield Err(e),
                    };
                }
            }
        })
    }

    async fn exists(&self, key: &str) -> Result<bool> {
        let abs_path = self.absolute_path(key)?;
        match fs::metadata(&abs_path).await {
            Ok(metadata) => Ok(metadata.is_file()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(false),
            Err(e) => Err(exn::Exn::from(Self::map_io_error(e, key))),
        }
    }

    async fn get(&self, key: &str) -> Result<Object> {
        let abs_path = self.absolute_path(key)?;
        let file = fs::File::open(&abs_path).await.map_err(|e| Self::map_io_error(e, key))?;
        let metadata = file.metadata().await.map_err(|e| Self::map_io_error(e, key))?;
        if !metadata.is_file() {
            exn::bail!(ErrorKind::NotFound(key.to_string()));
        }
        Ok(Object::new(file, metadata.len(), content_type_for(key)))
    }
}
