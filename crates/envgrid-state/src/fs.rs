//! FilesystemStore — one directory per deployment under a common root.
//!
//! Manifests are written atomically (temp file + rename) so a reader never
//! observes a half-written file. Every write touches the deployment
//! directory, which refreshes its modification time.

use std::fs::File;
use std::path::{Path, PathBuf};
use std::time::{Duration, SystemTime};

use flate2::Compression;
use flate2::write::GzEncoder;
use tokio::io::AsyncWriteExt;
use tokio::task::spawn_blocking;
use tracing::debug;

use crate::error::{StateError, StateResult};

/// File name metadata is persisted under inside a deployment directory.
pub const METADATA_FILE: &str = "metadata.json";

const ARCHIVE_EXTENSION: &str = "tar.gz";

/// Deployment directories rooted at `deployments_dir`.
#[derive(Debug, Clone)]
pub struct FilesystemStore {
    root: PathBuf,
}

impl FilesystemStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn deployment_dir(&self, id: &str) -> PathBuf {
        self.root.join(id)
    }

    pub fn manifest_path(&self, id: &str, file_name: &str) -> PathBuf {
        self.deployment_dir(id).join(file_name)
    }

    /// `<root>/<id>.tar.gz`, beside the deployment directories.
    pub fn archive_path(&self, id: &str) -> PathBuf {
        self.root.join(format!("{id}.{ARCHIVE_EXTENSION}"))
    }

    /// Create the deployments root if it does not exist yet.
    pub async fn ensure_root(&self) -> StateResult<()> {
        tokio::fs::create_dir_all(&self.root)
            .await
            .map_err(StateError::io(&self.root))
    }

    pub async fn exists(&self, id: &str) -> bool {
        tokio::fs::metadata(self.deployment_dir(id))
            .await
            .map(|m| m.is_dir())
            .unwrap_or(false)
    }

    /// Create the directory for a new deployment.
    ///
    /// An existing directory is a conflict: it belongs to a live or not yet
    /// reclaimed deployment with the same id.
    pub async fn create_dir(&self, id: &str) -> StateResult<PathBuf> {
        self.ensure_root().await?;
        let dir = self.deployment_dir(id);
        match tokio::fs::create_dir(&dir).await {
            Ok(()) => {
                debug!(deployment_id = %id, path = %dir.display(), "deployment directory created");
                Ok(dir)
            }
            Err(e) if e.kind() == std::io::ErrorKind::AlreadyExists => {
                Err(StateError::Conflict(id.to_string()))
            }
            Err(e) => Err(StateError::Io { path: dir, source: e }),
        }
    }

    /// Atomically replace `file_name` inside the deployment directory.
    pub async fn write_manifest(
        &self,
        id: &str,
        file_name: &str,
        contents: &str,
    ) -> StateResult<PathBuf> {
        let dir = self.deployment_dir(id);
        if !self.exists(id).await {
            return Err(StateError::NotFound(id.to_string()));
        }
        let target = dir.join(file_name);
        let tmp = dir.join(format!(".{file_name}.tmp"));

        let mut file = tokio::fs::File::create(&tmp)
            .await
            .map_err(StateError::io(&tmp))?;
        file.write_all(contents.as_bytes())
            .await
            .map_err(StateError::io(&tmp))?;
        file.sync_all().await.map_err(StateError::io(&tmp))?;
        drop(file);

        tokio::fs::rename(&tmp, &target)
            .await
            .map_err(StateError::io(&target))?;
        debug!(deployment_id = %id, path = %target.display(), bytes = contents.len(), "manifest written");
        Ok(target)
    }

    pub async fn read_manifest(&self, id: &str, file_name: &str) -> StateResult<String> {
        let path = self.manifest_path(id, file_name);
        match tokio::fs::read_to_string(&path).await {
            Ok(text) => Ok(text),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                Err(StateError::NotFound(id.to_string()))
            }
            Err(e) => Err(StateError::Io { path, source: e }),
        }
    }

    pub async fn write_metadata(&self, id: &str, metadata: &serde_json::Value) -> StateResult<()> {
        let text = serde_json::to_string_pretty(metadata)
            .map_err(|e| StateError::Serialize(e.to_string()))?;
        self.write_manifest(id, METADATA_FILE, &text).await?;
        Ok(())
    }

    /// Metadata persisted next to the manifest, if any.
    pub async fn read_metadata(&self, id: &str) -> StateResult<Option<serde_json::Value>> {
        let path = self.manifest_path(id, METADATA_FILE);
        match tokio::fs::read(&path).await {
            Ok(bytes) => serde_json::from_slice(&bytes)
                .map(Some)
                .map_err(|e| StateError::Serialize(e.to_string())),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(StateError::Io { path, source: e }),
        }
    }

    /// Remove the deployment directory and any archive of it.
    ///
    /// Returns whether the directory existed. Removing a missing directory
    /// is not an error.
    pub async fn remove_dir(&self, id: &str) -> StateResult<bool> {
        let archive = self.archive_path(id);
        match tokio::fs::remove_file(&archive).await {
            Ok(()) => debug!(deployment_id = %id, "archive removed"),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => return Err(StateError::Io { path: archive, source: e }),
        }

        let dir = self.deployment_dir(id);
        match tokio::fs::remove_dir_all(&dir).await {
            Ok(()) => {
                debug!(deployment_id = %id, "deployment directory removed");
                Ok(true)
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(false),
            Err(e) => Err(StateError::Io { path: dir, source: e }),
        }
    }

    /// Ids of every deployment directory under the root, sorted.
    pub async fn list_ids(&self) -> StateResult<Vec<String>> {
        let mut entries = match tokio::fs::read_dir(&self.root).await {
            Ok(entries) => entries,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => {
                return Err(StateError::Io {
                    path: self.root.clone(),
                    source: e,
                });
            }
        };

        let mut ids = Vec::new();
        while let Some(entry) = entries
            .next_entry()
            .await
            .map_err(StateError::io(&self.root))?
        {
            let is_dir = entry
                .file_type()
                .await
                .map(|t| t.is_dir())
                .unwrap_or(false);
            if !is_dir {
                continue;
            }
            if let Some(name) = entry.file_name().to_str() {
                if !name.starts_with('.') {
                    ids.push(name.to_string());
                }
            }
        }
        ids.sort();
        Ok(ids)
    }

    /// Modification time of the deployment directory, `None` if it is gone.
    pub async fn modified_at(&self, id: &str) -> StateResult<Option<SystemTime>> {
        let dir = self.deployment_dir(id);
        match tokio::fs::metadata(&dir).await {
            Ok(meta) => meta
                .modified()
                .map(Some)
                .map_err(|e| StateError::Io { path: dir, source: e }),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(StateError::Io { path: dir, source: e }),
        }
    }

    /// Time since the deployment directory was last modified.
    pub async fn age(&self, id: &str) -> StateResult<Option<Duration>> {
        Ok(self.modified_at(id).await?.map(|mtime| {
            SystemTime::now()
                .duration_since(mtime)
                .unwrap_or_default()
        }))
    }

    /// Override the lifecycle clock of a deployment directory.
    pub async fn set_modified_at(&self, id: &str, when: SystemTime) -> StateResult<()> {
        let dir = self.deployment_dir(id);
        let target = dir.clone();
        spawn_blocking(move || File::open(&target)?.set_modified(when))
            .await
            .map_err(|e| StateError::Io {
                path: dir.clone(),
                source: std::io::Error::other(e),
            })?
            .map_err(StateError::io(dir))
    }

    /// Pack the deployment directory into `<root>/<id>.tar.gz`.
    pub async fn archive(&self, id: &str) -> StateResult<PathBuf> {
        if !self.exists(id).await {
            return Err(StateError::NotFound(id.to_string()));
        }
        let src = self.deployment_dir(id);
        let dest = self.archive_path(id);
        let tmp = self.root.join(format!(".{id}.{ARCHIVE_EXTENSION}.tmp"));
        let prefix = PathBuf::from(id);

        let (tmp_path, dest_path) = (tmp.clone(), dest.clone());
        spawn_blocking(move || {
            archive_directory_sync(&src, &prefix, &tmp_path)?;
            std::fs::rename(&tmp_path, &dest_path).map_err(StateError::io(&dest_path))
        })
        .await
        .map_err(|e| StateError::Archive(e.to_string()))??;

        debug!(deployment_id = %id, path = %dest.display(), "deployment archived");
        Ok(dest)
    }
}

fn archive_directory_sync(src: &Path, prefix: &Path, dest: &Path) -> StateResult<()> {
    let file = File::create(dest).map_err(StateError::io(dest))?;
    let mut builder = tar::Builder::new(GzEncoder::new(file, Compression::default()));
    builder.follow_symlinks(false);

    for entry in walkdir::WalkDir::new(src).sort_by_file_name() {
        let entry = entry.map_err(|e| StateError::Archive(e.to_string()))?;
        let relative = entry
            .path()
            .strip_prefix(src)
            .map_err(|e| StateError::Archive(e.to_string()))?;
        let name = prefix.join(relative);
        if entry.file_type().is_dir() {
            builder
                .append_dir(&name, entry.path())
                .map_err(StateError::io(entry.path()))?;
        } else if entry.file_type().is_file() {
            builder
                .append_path_with_name(entry.path(), &name)
                .map_err(StateError::io(entry.path()))?;
        }
    }

    builder
        .into_inner()
        .and_then(|gz| gz.finish())
        .map_err(StateError::io(dest))?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use std::io::Read;

    use flate2::read::GzDecoder;
    use tempfile::TempDir;

    use super::*;

    fn store() -> (TempDir, FilesystemStore) {
        let dir = TempDir::new().unwrap();
        let store = FilesystemStore::new(dir.path().join("deployments"));
        (dir, store)
    }

    #[tokio::test]
    async fn create_write_read_manifest() {
        let (_dir, store) = store();
        store.create_dir("abc").await.unwrap();
        let path = store
            .write_manifest("abc", "docker-compose.yml", "services: {}\n")
            .await
            .unwrap();
        assert!(path.ends_with("abc/docker-compose.yml"));
        assert_eq!(
            store.read_manifest("abc", "docker-compose.yml").await.unwrap(),
            "services: {}\n"
        );
        // The temp file never survives a successful write.
        assert!(!store.deployment_dir("abc").join(".docker-compose.yml.tmp").exists());
    }

    #[tokio::test]
    async fn existing_directory_is_conflict() {
        let (_dir, store) = store();
        store.create_dir("abc").await.unwrap();
        assert!(matches!(
            store.create_dir("abc").await,
            Err(StateError::Conflict(id)) if id == "abc"
        ));
    }

    #[tokio::test]
    async fn read_missing_manifest_is_not_found() {
        let (_dir, store) = store();
        store.create_dir("abc").await.unwrap();
        assert!(matches!(
            store.read_manifest("abc", "docker-compose.yml").await,
            Err(StateError::NotFound(_))
        ));
        assert!(matches!(
            store.write_manifest("nope", "m.yml", "x").await,
            Err(StateError::NotFound(_))
        ));
    }

    #[tokio::test]
    async fn metadata_round_trip() {
        let (_dir, store) = store();
        store.create_dir("abc").await.unwrap();
        assert_eq!(store.read_metadata("abc").await.unwrap(), None);

        let meta = serde_json::json!({"owner": "ci", "ttl": 30});
        store.write_metadata("abc", &meta).await.unwrap();
        assert_eq!(store.read_metadata("abc").await.unwrap(), Some(meta));
    }

    #[tokio::test]
    async fn remove_is_idempotent() {
        let (_dir, store) = store();
        store.create_dir("abc").await.unwrap();
        assert!(store.remove_dir("abc").await.unwrap());
        assert!(!store.remove_dir("abc").await.unwrap());
        assert!(!store.exists("abc").await);
    }

    #[tokio::test]
    async fn list_ids_skips_files_and_missing_root() {
        let (_dir, store) = store();
        assert!(store.list_ids().await.unwrap().is_empty());

        store.create_dir("b").await.unwrap();
        store.create_dir("a").await.unwrap();
        std::fs::write(store.root().join("stray.txt"), "x").unwrap();
        assert_eq!(store.list_ids().await.unwrap(), vec!["a", "b"]);
    }

    #[tokio::test]
    async fn age_follows_modification_time() {
        let (_dir, store) = store();
        assert_eq!(store.age("abc").await.unwrap(), None);

        store.create_dir("abc").await.unwrap();
        let two_hours_ago = SystemTime::now() - Duration::from_secs(7200);
        store.set_modified_at("abc", two_hours_ago).await.unwrap();
        let age = store.age("abc").await.unwrap().unwrap();
        assert!(age >= Duration::from_secs(7199));

        // Rewriting the manifest refreshes the clock.
        store.write_manifest("abc", "m.yml", "x").await.unwrap();
        let age = store.age("abc").await.unwrap().unwrap();
        assert!(age < Duration::from_secs(60));
    }

    #[tokio::test]
    async fn archive_contains_manifest() {
        let (_dir, store) = store();
        store.create_dir("abc").await.unwrap();
        store
            .write_manifest("abc", "docker-compose.yml", "services: {}\n")
            .await
            .unwrap();

        let path = store.archive("abc").await.unwrap();
        assert_eq!(path, store.archive_path("abc"));
        assert_eq!(path.parent(), Some(store.root()));
        assert_eq!(path.file_name().and_then(|n| n.to_str()), Some("abc.tar.gz"));
        // Archives are files, not deployment directories.
        assert_eq!(store.list_ids().await.unwrap(), vec!["abc"]);

        let mut archive = tar::Archive::new(GzDecoder::new(File::open(&path).unwrap()));
        let mut found = None;
        for entry in archive.entries().unwrap() {
            let mut entry = entry.unwrap();
            if entry.path().unwrap().ends_with("docker-compose.yml") {
                let mut text = String::new();
                entry.read_to_string(&mut text).unwrap();
                found = Some(text);
            }
        }
        assert_eq!(found.as_deref(), Some("services: {}\n"));

        store.remove_dir("abc").await.unwrap();
        assert!(!path.exists());
    }

    #[tokio::test]
    async fn archive_missing_is_not_found() {
        let (_dir, store) = store();
        assert!(matches!(
            store.archive("nope").await,
            Err(StateError::NotFound(_))
        ));
    }
}
