//! Media file storage
//!
//! Uploaded files live flat inside one directory under generated names.
//! Rows in the `medias` table only reference the file name; the directory
//! is the single source of the bytes.

use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use thiserror::Error;
use uuid::Uuid;

/// URL prefix under which stored files are served
pub const MEDIA_URL_PREFIX: &str = "/medias";

#[derive(Error, Debug)]
pub enum MediaError {
    #[error("File extension '{0}' is not allowed! Allowed: {1}")]
    UnsupportedExtension(String, String),
    #[error("File is too large! Limit is {0} bytes")]
    TooLarge(usize),
    #[error("Media file '{0}' not found!")]
    NotFound(String),
    #[error("Media storage error: {0}")]
    Io(#[from] io::Error),
}

pub type MediaResult<T> = Result<T, MediaError>;

#[derive(Debug, Clone)]
pub struct MediaStorage {
    root: PathBuf,
    allowed_extensions: Vec<String>,
    max_bytes: usize,
}

impl MediaStorage {
    pub fn new(root: PathBuf, allowed_extensions: Vec<String>, max_bytes: usize) -> Self {
        let allowed_extensions = allowed_extensions
            .iter()
            .map(|ext| ext.trim().trim_start_matches('.').to_lowercase())
            .filter(|ext| !ext.is_empty())
            .collect();

        Self {
            root,
            allowed_extensions,
            max_bytes,
        }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn max_bytes(&self) -> usize {
        self.max_bytes
    }

    /// Create the storage directory if it is missing
    pub fn ensure_dir(&self) -> MediaResult<()> {
        fs::create_dir_all(&self.root)?;
        Ok(())
    }

    /// Return the normalized extension of `file_name` if it is allowed
    pub fn validate_extension(&self, file_name: &str) -> MediaResult<String> {
        let ext = Path::new(file_name)
            .extension()
            .and_then(|e| e.to_str())
            .map(|e| e.to_lowercase())
            .unwrap_or_default();

        if ext.is_empty() || !self.allowed_extensions.contains(&ext) {
            return Err(MediaError::UnsupportedExtension(
                ext,
                self.allowed_extensions.join(", "),
            ));
        }
        Ok(ext)
    }

    /// Write an upload under a fresh name and return that name
    pub fn save(&self, original_name: &str, data: &[u8]) -> MediaResult<String> {
        let ext = self.validate_extension(original_name)?;
        if data.len() > self.max_bytes {
            return Err(MediaError::TooLarge(self.max_bytes));
        }

        self.ensure_dir()?;
        let file_name = generate_file_name(&ext);
        fs::write(self.root.join(&file_name), data)?;

        log::info!("Stored media {} ({} bytes)", file_name, data.len());
        Ok(file_name)
    }

    pub fn read(&self, file_name: &str) -> MediaResult<Vec<u8>> {
        let path = self.resolve(file_name)?;
        fs::read(&path).map_err(|e| {
            if e.kind() == io::ErrorKind::NotFound {
                MediaError::NotFound(file_name.to_string())
            } else {
                MediaError::Io(e)
            }
        })
    }

    pub fn delete(&self, file_name: &str) -> MediaResult<()> {
        let path = self.resolve(file_name)?;
        fs::remove_file(&path).map_err(|e| {
            if e.kind() == io::ErrorKind::NotFound {
                MediaError::NotFound(file_name.to_string())
            } else {
                MediaError::Io(e)
            }
        })
    }

    /// Public URL of a stored file
    pub fn public_url(&self, file_name: &str) -> String {
        format!("{}/{}", MEDIA_URL_PREFIX, file_name)
    }

    // Only bare file names map into the storage directory
    fn resolve(&self, file_name: &str) -> MediaResult<PathBuf> {
        let is_bare = !file_name.is_empty()
            && file_name != "."
            && file_name != ".."
            && !file_name.contains('/')
            && !file_name.contains('\\');

        if !is_bare {
            return Err(MediaError::NotFound(file_name.to_string()));
        }
        Ok(self.root.join(file_name))
    }
}

/// `<uuid>.<ext>`; unique without coordinating with other writers
pub fn generate_file_name(ext: &str) -> String {
    format!("{}.{}", Uuid::new_v4().simple(), ext)
}

/// Content type for serving a stored file, derived from its extension
pub fn content_type_for(file_name: &str) -> &'static str {
    let ext = Path::new(file_name)
        .extension()
        .and_then(|e| e.to_str())
        .map(|e| e.to_lowercase())
        .unwrap_or_default();

    match ext.as_str() {
        "jpg" | "jpeg" => "image/jpeg",
        "png" => "image/png",
        "gif" => "image/gif",
        "webp" => "image/webp",
        _ => "application/octet-stream",
    }
}
