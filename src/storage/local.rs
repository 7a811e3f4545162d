use super::{is_ignored, ListingEntry, ListingSource};
use crate::error::{ConfigError, ListingError};
use async_trait::async_trait;
use std::path::{Path, PathBuf};
use walkdir::WalkDir;

pub struct LocalListing {
    base_path: PathBuf,
    name: String,
}

impl LocalListing {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        let base_path = path.into();
        let name = format!("local:{}", base_path.display());
        Self { base_path, name }
    }

    fn resolve_path(&self, path: &str) -> PathBuf {
        let path = path.trim_start_matches('/').trim_start_matches('\\');
        if path.is_empty() {
            self.base_path.clone()
        } else {
            self.base_path.join(path)
        }
    }
}

#[async_trait]
impl ListingSource for LocalListing {
    async fn list_children(&self, locator: &str) -> Result<Vec<ListingEntry>, ListingError> {
        let dir = self.resolve_path(locator);

        // 使用 spawn_blocking 避免阻塞 async runtime
        tokio::task::spawn_blocking(move || read_children(&dir))
            .await
            .map_err(|e| ListingError::Task(e.to_string()))?
    }

    fn name(&self) -> &str {
        &self.name
    }
}

/// 列出目录的直接子条目，按文件名排序；隐藏条目（`.` 开头）整个跳过
fn read_children(dir: &Path) -> Result<Vec<ListingEntry>, ListingError> {
    let mut entries = Vec::new();

    for entry in WalkDir::new(dir)
        .min_depth(1)
        .max_depth(1)
        .follow_links(false)
        .sort_by_file_name()
    {
        let entry = entry.map_err(|err| {
            let path = err
                .path()
                .unwrap_or(dir)
                .display()
                .to_string();
            match err.into_io_error() {
                Some(io) if io.kind() == std::io::ErrorKind::PermissionDenied => {
                    ListingError::PermissionDenied(path)
                }
                Some(io) => ListingError::Io { path, source: io },
                None => ListingError::Io {
                    path,
                    source: std::io::Error::other("filesystem loop"),
                },
            }
        })?;

        let name = entry.file_name().to_string_lossy().into_owned();
        if name.starts_with('.') || is_ignored(&name) {
            continue;
        }

        let href = if entry.file_type().is_dir() {
            format!("{}/", name)
        } else {
            name.clone()
        };
        entries.push(ListingEntry::new(name, href));
    }

    Ok(entries)
}

/// 检查目标根目录可写：存在、是目录、属主写权限位已设置
pub fn ensure_writable_dir(path: &Path) -> Result<(), ConfigError> {
    let not_writable = |reason: &str| ConfigError::NotWritable {
        path: path.display().to_string(),
        reason: reason.to_string(),
    };

    let metadata = std::fs::metadata(path).map_err(|_| not_writable("path doesn't exist"))?;

    if !metadata.is_dir() {
        return Err(not_writable("path isn't a directory"));
    }

    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        if metadata.permissions().mode() & 0o200 == 0 {
            return Err(not_writable("write permission bit is not set for user"));
        }
    }

    if metadata.permissions().readonly() {
        return Err(not_writable("directory is read-only"));
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;

    #[tokio::test]
    async fn test_lists_direct_children_sorted() {
        let dir = tempfile::tempdir().unwrap();
        fs::create_dir(dir.path().join("b_dir")).unwrap();
        fs::write(dir.path().join("b_dir").join("nested.txt"), "x").unwrap();
        fs::write(dir.path().join("a.txt"), "a").unwrap();
        fs::write(dir.path().join("c.txt"), "c").unwrap();

        let listing = LocalListing::new(dir.path());
        let children = listing.list_children("").await.unwrap();

        assert_eq!(
            children,
            vec![
                ListingEntry::new("a.txt", "a.txt"),
                ListingEntry::new("b_dir", "b_dir/"),
                ListingEntry::new("c.txt", "c.txt"),
            ]
        );

        let nested = listing.list_children("b_dir/").await.unwrap();
        assert_eq!(nested, vec![ListingEntry::new("nested.txt", "nested.txt")]);
    }

    #[tokio::test]
    async fn test_hidden_entries_are_excluded() {
        let dir = tempfile::tempdir().unwrap();
        fs::create_dir(dir.path().join(".git")).unwrap();
        fs::write(dir.path().join(".git").join("HEAD"), "ref").unwrap();
        fs::write(dir.path().join(".hidden"), "h").unwrap();
        fs::write(dir.path().join("visible"), "v").unwrap();

        let listing = LocalListing::new(dir.path());
        let children = listing.list_children("").await.unwrap();
        assert_eq!(children, vec![ListingEntry::new("visible", "visible")]);
    }

    #[tokio::test]
    async fn test_missing_directory_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let listing = LocalListing::new(dir.path().join("gone"));
        let err = listing.list_children("").await.unwrap_err();
        assert!(!err.is_skippable());
    }

    #[test]
    fn test_ensure_writable_dir() {
        let dir = tempfile::tempdir().unwrap();
        assert!(ensure_writable_dir(dir.path()).is_ok());

        let file = dir.path().join("plain.txt");
        fs::write(&file, "x").unwrap();
        assert!(ensure_writable_dir(&file).is_err());
        assert!(ensure_writable_dir(&dir.path().join("missing")).is_err());
    }

    #[cfg(unix)]
    #[test]
    fn test_ensure_writable_dir_rejects_readonly_mode() {
        use std::os::unix::fs::PermissionsExt;

        let dir = tempfile::tempdir().unwrap();
        let ro = dir.path().join("ro");
        fs::create_dir(&ro).unwrap();
        fs::set_permissions(&ro, fs::Permissions::from_mode(0o555)).unwrap();

        assert!(ensure_writable_dir(&ro).is_err());

        fs::set_permissions(&ro, fs::Permissions::from_mode(0o755)).unwrap();
    }
}
