use std::{
    io::Write,
    path::{Path, PathBuf},
    time::Duration,
};

use anyhow::{anyhow, Context};
use bytes::Bytes;
use tracing::{debug, info};

use crate::error::ApiError;

pub const WRITE_TIMEOUT: Duration = Duration::from_secs(30);

/// Image formats the classifier accepts.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ImageKind {
    Png,
    Jpeg,
}

impl ImageKind {
    /// Extension after the last dot, matched case-insensitively.
    pub fn from_filename(name: &str) -> Option<(Self, String)> {
        let (_, ext) = name.rsplit_once('.')?;
        let ext = ext.to_ascii_lowercase();
        let kind = match ext.as_str() {
            "png" => ImageKind::Png,
            "jpg" | "jpeg" => ImageKind::Jpeg,
            _ => return None,
        };
        Some((kind, ext))
    }

    pub fn mime_type(self) -> &'static str {
        match self {
            ImageKind::Png => "image/png",
            ImageKind::Jpeg => "image/jpeg",
        }
    }
}

/// A file that passed validation and now lives in the upload directory.
#[derive(Debug)]
pub struct StoredImage {
    pub path: PathBuf,
    pub kind: ImageKind,
}

/// Filename checks in the order the endpoint reports them: empty name first,
/// then the extension allow-list.
pub fn validate_filename(name: &str) -> Result<(ImageKind, String), ApiError> {
    if name.is_empty() {
        return Err(ApiError::MissingFile("No selected file"));
    }
    ImageKind::from_filename(name).ok_or(ApiError::UnsupportedType)
}

/// Rewrites a client filename into a single safe path component.
pub fn sanitize_upload_name(original: &str, ext: &str) -> String {
    let cleaned = sanitize_filename::sanitize(original);
    let cleaned = cleaned
        .trim_start_matches(|c: char| c == '.' || c.is_whitespace())
        .trim_end();

    if cleaned.is_empty() {
        return format!("upload.{ext}");
    }
    if cleaned.to_ascii_lowercase().ends_with(&format!(".{ext}")) {
        cleaned.to_string()
    } else {
        format!("{cleaned}.{ext}")
    }
}

/// Joins `name` onto `dir`, refusing anything that is not a direct child.
pub fn contained_path(dir: &Path, name: &str) -> anyhow::Result<PathBuf> {
    let path = dir.join(name);
    let direct_child = path.parent() == Some(dir)
        && path.file_name().and_then(|n| n.to_str()) == Some(name);
    if !direct_child {
        return Err(anyhow!("sanitized name escapes upload dir"));
    }
    Ok(path)
}

/// Writes the upload under its sanitized name. A later upload with the same
/// name replaces the earlier file.
///
/// Bytes go to a temp file in the same directory which is then renamed over
/// the final path, so a reader never sees a half-written file.
pub async fn store_upload(
    upload_dir: &Path,
    original_name: &str,
    kind: ImageKind,
    ext: &str,
    data: Bytes,
    write_timeout: Duration,
) -> Result<StoredImage, ApiError> {
    let name = sanitize_upload_name(original_name, ext);
    let path = contained_path(upload_dir, &name)?;

    tokio::fs::create_dir_all(upload_dir)
        .await
        .with_context(|| format!("create upload dir {}", upload_dir.display()))?;

    let size = data.len();
    let dir = upload_dir.to_path_buf();
    let target = path.clone();
    let write = tokio::task::spawn_blocking(move || write_replacing(&dir, &target, &data));

    tokio::time::timeout(write_timeout, write)
        .await
        .map_err(|_| anyhow!("writing {} timed out", path.display()))?
        .context("upload writer panicked")?
        .with_context(|| format!("write upload {}", path.display()))?;

    debug!(original = %original_name, stored = %name, "sanitized upload name");
    info!(file = %path.display(), size, "stored upload");
    Ok(StoredImage { path, kind })
}

fn write_replacing(dir: &Path, target: &Path, data: &[u8]) -> anyhow::Result<()> {
    let mut tmp = tempfile::Builder::new()
        .prefix(".partial-")
        .tempfile_in(dir)
        .context("create temp upload")?;
    tmp.write_all(data).context("write temp upload")?;
    tmp.as_file().sync_all().context("flush temp upload")?;
    tmp.persist(target).map_err(|e| anyhow!(e.error))?;
    Ok(())
}
