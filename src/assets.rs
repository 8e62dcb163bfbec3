//! Uploaded files referenced by records.
//!
//! Records store paths relative to the asset root (`img/posts/cat.png`).
//! Every path handed to this module is checked to stay inside the root.

use std::fs;
use std::io;
use std::path::{Component, Path, PathBuf};

use chrono::Utc;
use rand::Rng;

use crate::db::file::write_atomic;
use crate::db::models::DEFAULT_AVATAR;
use crate::error::{AppError, AppResult};

/// Extensions accepted for any upload, compared case-insensitively.
pub const ALLOWED_EXTENSIONS: &[&str] = &["png", "jpg", "jpeg", "gif", "webp"];

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Bucket {
    PostImages,
    Avatars,
    Banners,
    /// Banners of submissions awaiting moderation. Never served as live.
    StagedBanners,
}

impl Bucket {
    pub fn dir(&self) -> &'static str {
        match self {
            Bucket::PostImages => "img/posts",
            Bucket::Avatars => "img/users",
            Bucket::Banners => "img/conferences",
            Bucket::StagedBanners => "img/conferences/pending",
        }
    }
}

/// An uploaded file as received from the client.
#[derive(Debug, Clone)]
pub struct Upload {
    pub filename: String,
    pub bytes: Vec<u8>,
}

impl Upload {
    pub fn new(filename: impl Into<String>, bytes: impl Into<Vec<u8>>) -> Self {
        Self {
            filename: filename.into(),
            bytes: bytes.into(),
        }
    }
}

/// Reduce a client filename to `[A-Za-z0-9_.-]`, with path separators and
/// whitespace turned into underscores and no leading dots or underscores.
/// `../../etc/passwd.png` becomes `etc_passwd.png`.
pub fn sanitize_filename(name: &str) -> String {
    let spaced: String = name
        .chars()
        .filter(char::is_ascii)
        .map(|c| if c == '/' || c == '\\' { ' ' } else { c })
        .collect();
    let joined = spaced.split_whitespace().collect::<Vec<_>>().join("_");
    let cleaned: String = joined
        .chars()
        .filter(|c| c.is_ascii_alphanumeric() || matches!(c, '_' | '.' | '-'))
        .collect();
    cleaned.trim_matches(|c| c == '.' || c == '_').to_string()
}

/// Lowercased extension if it is on the allow-list.
pub fn allowed_extension(filename: &str) -> Option<String> {
    let (_, ext) = filename.rsplit_once('.')?;
    let ext = ext.to_ascii_lowercase();
    ALLOWED_EXTENSIONS.contains(&ext.as_str()).then_some(ext)
}

#[derive(Debug, Clone)]
pub struct AssetStore {
    root: PathBuf,
    max_upload_bytes: u64,
}

impl AssetStore {
    pub fn new(root: impl Into<PathBuf>, max_upload_bytes: u64) -> Self {
        Self {
            root: root.into(),
            max_upload_bytes,
        }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Check size and type; returns the sanitized filename and its extension.
    pub fn validate(&self, upload: &Upload) -> AppResult<(String, String)> {
        if upload.filename.trim().is_empty() {
            return Err(AppError::validation("No file uploaded"));
        }
        if upload.bytes.len() as u64 > self.max_upload_bytes {
            return Err(AppError::validation(format!(
                "Upload exceeds {} bytes",
                self.max_upload_bytes
            )));
        }
        let name = sanitize_filename(&upload.filename);
        let ext = allowed_extension(&name).ok_or_else(|| {
            AppError::InvalidAssetType(format!(
                "{} (allowed: {})",
                upload.filename,
                ALLOWED_EXTENSIONS.join(", ")
            ))
        })?;
        Ok((name, ext))
    }

    /// Store under the sanitized original name, adding `-N` before the
    /// extension if that name is taken.
    pub fn store(&self, bucket: Bucket, upload: &Upload) -> AppResult<String> {
        let (name, _) = self.validate(upload)?;
        let rel = self.unique_path(bucket, &name);
        self.write(&rel, &upload.bytes)?;
        Ok(rel)
    }

    /// Store as `{stem}.{ext}`, replacing any file of that exact name.
    pub fn store_named(&self, bucket: Bucket, stem: &str, upload: &Upload) -> AppResult<String> {
        let (_, ext) = self.validate(upload)?;
        let stem = sanitize_filename(stem);
        if stem.is_empty() {
            return Err(AppError::validation("Invalid file name"));
        }
        let rel = format!("{}/{}.{}", bucket.dir(), stem, ext);
        self.write(&rel, &upload.bytes)?;
        Ok(rel)
    }

    /// Quarantine an upload awaiting moderation. Staging runs outside the
    /// store lock, so the name carries a random token as well as the time.
    pub fn stage(&self, upload: &Upload) -> AppResult<String> {
        let (name, _) = self.validate(upload)?;
        let token: u32 = rand::thread_rng().gen();
        let prefixed = format!("{}_{:08x}_{}", Utc::now().timestamp_millis(), token, name);
        let rel = self.unique_path(Bucket::StagedBanners, &prefixed);
        self.write(&rel, &upload.bytes)?;
        Ok(rel)
    }

    /// Move a file into `bucket`, keeping its name. Returns the new path.
    pub fn relocate(&self, from: &str, bucket: Bucket) -> AppResult<String> {
        let source = self.resolve(from)?;
        let name = source
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .ok_or_else(|| AppError::validation(format!("Invalid asset path: {}", from)))?;
        let rel = self.unique_path(bucket, &name);
        self.move_file(from, &rel)?;
        Ok(rel)
    }

    /// Rename one stored file to another path under the root.
    pub fn move_file(&self, from: &str, to: &str) -> AppResult<()> {
        let source = self.resolve(from)?;
        let target = self.resolve(to)?;
        if let Some(parent) = target.parent() {
            fs::create_dir_all(parent)?;
        }
        fs::rename(&source, &target)?;
        Ok(())
    }

    /// Remove a stored file. The default avatar and empty references are
    /// never touched; an already missing file counts as removed.
    pub fn delete(&self, rel: &str) -> AppResult<bool> {
        if rel.is_empty() || Self::is_reserved(rel) {
            return Ok(false);
        }
        let path = self.resolve(rel)?;
        match fs::remove_file(&path) {
            Ok(()) => {
                tracing::debug!("Deleted asset {}", rel);
                Ok(true)
            }
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(false),
            Err(e) => Err(e.into()),
        }
    }

    pub fn exists(&self, rel: &str) -> bool {
        self.resolve(rel).map(|p| p.is_file()).unwrap_or(false)
    }

    pub fn is_reserved(rel: &str) -> bool {
        rel == DEFAULT_AVATAR
    }

    /// True when `rel` is the file `store_named` writes for `username` in
    /// the avatar bucket, i.e. `img/users/{username}.{ext}`.
    pub fn is_avatar_of(rel: &str, username: &str) -> bool {
        rel.strip_prefix(Bucket::Avatars.dir())
            .and_then(|rest| rest.strip_prefix('/'))
            .and_then(|file| file.strip_prefix(username))
            .and_then(|rest| rest.strip_prefix('.'))
            .is_some_and(|ext| ALLOWED_EXTENSIONS.contains(&ext))
            && !Self::is_reserved(rel)
    }

    /// Absolute path for a stored relative path. Rejects anything that could
    /// escape the root.
    pub fn resolve(&self, rel: &str) -> AppResult<PathBuf> {
        let path = Path::new(rel);
        let safe = !rel.is_empty()
            && path
                .components()
                .all(|c| matches!(c, Component::Normal(_)));
        if !safe {
            return Err(AppError::validation(format!("Invalid asset path: {}", rel)));
        }
        Ok(self.root.join(path))
    }

    fn write(&self, rel: &str, bytes: &[u8]) -> AppResult<()> {
        let path = self.resolve(rel)?;
        write_atomic(&path, bytes)?;
        Ok(())
    }

    fn unique_path(&self, bucket: Bucket, name: &str) -> String {
        let candidate = format!("{}/{}", bucket.dir(), name);
        if !self.root.join(&candidate).exists() {
            return candidate;
        }
        let (stem, ext) = name.rsplit_once('.').unwrap_or((name, ""));
        (1..)
            .map(|n| {
                if ext.is_empty() {
                    format!("{}/{}-{}", bucket.dir(), stem, n)
                } else {
                    format!("{}/{}-{}.{}", bucket.dir(), stem, n, ext)
                }
            })
            .find(|p| !self.root.join(p).exists())
            .unwrap_or(candidate)
    }
}
