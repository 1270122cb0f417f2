use std::path::Path;

use tokio::fs;

use crate::errors::StoreError;

/// Atomically replaces `path` with `contents` by writing a hidden sibling
/// temp file and renaming it into place.
pub async fn atomic_write(path: &Path, contents: &[u8]) -> std::io::Result<()> {
    let file_name = path
        .file_name()
        .map(|name| name.to_string_lossy().into_owned())
        .unwrap_or_else(|| "file".to_string());
    let temp = match path.parent() {
        Some(parent) => parent.join(format!(".{file_name}.tmp")),
        None => std::path::PathBuf::from(format!(".{file_name}.tmp")),
    };

    fs::write(&temp, contents).await?;
    // Windows cannot rename over an existing file.
    if cfg!(windows) && fs::metadata(path).await.is_ok() {
        fs::remove_file(path).await?;
    }
    fs::rename(&temp, path).await
}

/// Removes whatever sits at `path`, whether it is a file, a symlink or a
/// directory (junctions on Windows lstat as directories).
pub async fn remove_link(path: &Path) -> std::io::Result<()> {
    let metadata = match fs::symlink_metadata(path).await {
        Ok(metadata) => metadata,
        Err(error) if error.kind() == std::io::ErrorKind::NotFound => return Ok(()),
        Err(error) => return Err(error),
    };

    if metadata.is_dir() {
        fs::remove_dir(path).await
    } else {
        fs::remove_file(path).await
    }
}

/// Replaces `link` with a link pointing at the directory `target`.
#[cfg(unix)]
pub async fn replace_dir_link(target: &Path, link: &Path) -> Result<(), StoreError> {
    remove_link(link).await?;
    fs::symlink(target, link).await?;
    Ok(())
}

/// Replaces `link` with a link pointing at the directory `target`.
///
/// A symlink is attempted first and a `mklink /J` junction is the fallback,
/// with the helper's stderr included in the returned error.
#[cfg(windows)]
pub async fn replace_dir_link(target: &Path, link: &Path) -> Result<(), StoreError> {
    remove_link(link).await?;
    if std::os::windows::fs::symlink_dir(target, link).is_ok() {
        return Ok(());
    }
    mklink(target, link, "/J").await
}

/// Replaces `link` with a link pointing at the file `target`.
#[cfg(unix)]
pub async fn replace_file_link(target: &Path, link: &Path) -> Result<(), StoreError> {
    remove_link(link).await?;
    fs::symlink(target, link).await?;
    Ok(())
}

/// Replaces `link` with a link pointing at the file `target`.
///
/// A symlink is attempted first and a hardlink (`mklink /H`) is the
/// fallback.
#[cfg(windows)]
pub async fn replace_file_link(target: &Path, link: &Path) -> Result<(), StoreError> {
    remove_link(link).await?;
    if std::os::windows::fs::symlink_file(target, link).is_ok() {
        return Ok(());
    }
    mklink(target, link, "/H").await
}

#[cfg(windows)]
async fn mklink(target: &Path, link: &Path, flag: &str) -> Result<(), StoreError> {
    let output = tokio::process::Command::new("cmd")
        .arg("/C")
        .arg("mklink")
        .arg(flag)
        .arg(link)
        .arg(target)
        .output()
        .await?;

    if output.status.success() {
        return Ok(());
    }

    Err(StoreError::Link(format!(
        "mklink {flag} {} -> {} failed: {}",
        link.display(),
        target.display(),
        String::from_utf8_lossy(&output.stderr).trim()
    )))
}

/// Whether the metadata describes a file this user could execute.
#[cfg(unix)]
pub fn is_executable(metadata: &std::fs::Metadata) -> bool {
    use std::os::unix::fs::PermissionsExt;
    metadata.is_file() && metadata.permissions().mode() & 0o111 != 0
}

#[cfg(windows)]
pub fn is_executable(metadata: &std::fs::Metadata) -> bool {
    metadata.is_file()
}
