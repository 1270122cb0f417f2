//! Archive extraction with path-traversal and symlink defenses.
//!
//! The format is detected from magic bytes, never from the file name. Every
//! entry path is cleaned and re-anchored under the destination; an entry
//! that would land outside it is an error. Symlink and hardlink entries are
//! skipped outright rather than rejected, so hostile archives cannot alias
//! paths but benign ones still extract.
//!
//! Nothing is cleaned up on failure; the caller owns the destination
//! directory and removes it wholesale.

use std::fs;
use std::io::{Read, Seek, SeekFrom};
use std::path::{Component, Path, PathBuf};

use flate2::read::GzDecoder;
use tar::EntryType;

use crate::errors::ExtractError;

/// How many leading bytes are sniffed for magic numbers.
const SNIFF_LEN: usize = 262;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ArchiveFormat {
    TarGz,
    Zip,
}

/// Extracts an opened archive into `dest` on a blocking thread.
pub async fn extract(archive: fs::File, dest: PathBuf) -> Result<(), ExtractError> {
    tokio::task::spawn_blocking(move || extract_blocking(archive, &dest))
        .await
        .map_err(|error| ExtractError::Io(std::io::Error::other(error)))?
}

/// Synchronous core of [`extract`].
pub fn extract_blocking(mut archive: fs::File, dest: &Path) -> Result<(), ExtractError> {
    let format = detect_format(&mut archive)?;
    match format {
        ArchiveFormat::TarGz => extract_tar_gz(archive, dest),
        ArchiveFormat::Zip => extract_zip(archive, dest),
    }
}

/// Sniffs the archive format from the first bytes and rewinds the handle.
pub fn detect_format(archive: &mut fs::File) -> Result<ArchiveFormat, ExtractError> {
    let mut header = [0u8; SNIFF_LEN];
    let mut read = 0;
    while read < SNIFF_LEN {
        let n = archive.read(&mut header[read..])?;
        if n == 0 {
            break;
        }
        read += n;
    }
    archive.seek(SeekFrom::Start(0))?;

    if read == 0 {
        return Err(ExtractError::EmptyFile);
    }

    let header = &header[..read];
    if header.starts_with(&[0x1f, 0x8b]) {
        return Ok(ArchiveFormat::TarGz);
    }
    if header.len() >= 4 && header.starts_with(b"PK") && matches!(header[2..4], [3, 4] | [5, 6] | [7, 8]) {
        return Ok(ArchiveFormat::Zip);
    }

    Err(ExtractError::UnsupportedFormat)
}

fn extract_tar_gz(archive: fs::File, dest: &Path) -> Result<(), ExtractError> {
    let decompress_stream = GzDecoder::new(archive);
    let mut archive = tar::Archive::new(decompress_stream);

    for entry in archive.entries()? {
        let mut entry = entry?;
        let entry_path = entry.path()?.into_owned();
        let target = clean_join(dest, &entry_path)?;

        match entry.header().entry_type() {
            EntryType::Directory => {
                create_dir(&target)?;
            }
            EntryType::Regular | EntryType::Continuous | EntryType::GNUSparse => {
                if let Some(parent) = target.parent() {
                    if !parent.exists() {
                        create_dir(parent)?;
                    }
                }
                let mode = entry.header().mode().unwrap_or(0o644) & 0o777;
                let mut outfile = fs::File::create(&target)?;
                std::io::copy(&mut entry, &mut outfile)?;
                set_mode(&target, mode)?;
            }
            // Links inside archives are dropped, not errors.
            EntryType::Symlink | EntryType::Link => (),
            // Metadata entries the tar reader surfaces; nothing to write.
            EntryType::XHeader | EntryType::XGlobalHeader | EntryType::GNULongName
            | EntryType::GNULongLink => (),
            other => {
                return Err(ExtractError::UnknownEntryType(format!("{other:?}")));
            }
        }
    }

    Ok(())
}

fn extract_zip(archive: fs::File, dest: &Path) -> Result<(), ExtractError> {
    let mut archive = zip::ZipArchive::new(archive)?;

    for i in 0..archive.len() {
        let mut file = archive.by_index(i)?;
        let entry_path = PathBuf::from(file.name());
        let target = clean_join(dest, &entry_path)?;

        // Mode 0o120000 is S_IFLNK; symlink entries are dropped.
        if file
            .unix_mode()
            .is_some_and(|mode| mode & 0o170000 == 0o120000)
        {
            continue;
        }

        if file.is_dir() {
            create_dir(&target)?;
            continue;
        }

        if let Some(parent) = target.parent() {
            if !parent.exists() {
                create_dir(parent)?;
            }
        }
        let mut outfile = fs::File::create(&target)?;
        std::io::copy(&mut file, &mut outfile)?;
        if let Some(mode) = file.unix_mode() {
            set_mode(&target, mode & 0o777)?;
        }
    }

    Ok(())
}

/// Joins an entry path onto `dest`, resolving `.`/`..` lexically and
/// treating absolute entry names as relative. An entry that would climb out
/// of `dest` is [`ExtractError::IllegalPath`].
fn clean_join(dest: &Path, entry_path: &Path) -> Result<PathBuf, ExtractError> {
    let mut cleaned = PathBuf::new();
    let mut depth: usize = 0;

    for component in entry_path.components() {
        match component {
            Component::Normal(part) => {
                cleaned.push(part);
                depth += 1;
            }
            Component::ParentDir => {
                if depth == 0 {
                    return Err(ExtractError::IllegalPath(entry_path.to_path_buf()));
                }
                cleaned.pop();
                depth -= 1;
            }
            Component::CurDir => (),
            Component::RootDir | Component::Prefix(_) => (),
        }
    }

    Ok(dest.join(cleaned))
}

#[cfg(unix)]
fn create_dir(path: &Path) -> std::io::Result<()> {
    use std::os::unix::fs::DirBuilderExt;
    if path.exists() {
        return Ok(());
    }
    fs::DirBuilder::new().recursive(true).mode(0o755).create(path)
}

#[cfg(windows)]
fn create_dir(path: &Path) -> std::io::Result<()> {
    fs::create_dir_all(path)
}

#[cfg(unix)]
fn set_mode(path: &Path, mode: u32) -> std::io::Result<()> {
    use std::os::unix::fs::PermissionsExt;
    fs::set_permissions(path, fs::Permissions::from_mode(mode))
}

#[cfg(windows)]
fn set_mode(_path: &Path, _mode: u32) -> std::io::Result<()> {
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use flate2::Compression;
    use flate2::write::GzEncoder;
    use std::io::Write;

    fn tar_gz(entries: &[(&str, &[u8], u32)]) -> Vec<u8> {
        let mut builder = tar::Builder::new(Vec::new());
        for (name, content, mode) in entries {
            let mut header = tar::Header::new_gnu();
            let name_bytes = name.as_bytes();
            let gnu = header.as_gnu_mut().unwrap();
            gnu.name[..name_bytes.len()].copy_from_slice(name_bytes);
            header.set_size(content.len() as u64);
            header.set_mode(*mode);
            header.set_cksum();
            builder.append(&header, *content).unwrap();
        }
        let tar_bytes = builder.into_inner().unwrap();

        let mut encoder = GzEncoder::new(Vec::new(), Compression::fast());
        encoder.write_all(&tar_bytes).unwrap();
        encoder.finish().unwrap()
    }

    fn write_archive(dir: &Path, bytes: &[u8]) -> fs::File {
        let path = dir.join("archive.bin");
        fs::write(&path, bytes).unwrap();
        fs::File::open(path).unwrap()
    }

    #[test]
    fn detects_gzip_magic() {
        let temp = tempfile::tempdir().unwrap();
        let bytes = tar_gz(&[("bin/nvim", b"#!/bin/sh\n", 0o755)]);
        let mut file = write_archive(temp.path(), &bytes);
        assert_eq!(detect_format(&mut file).unwrap(), ArchiveFormat::TarGz);
        // the handle is rewound
        assert_eq!(file.stream_position().unwrap(), 0);
    }

    #[test]
    fn empty_file_is_rejected() {
        let temp = tempfile::tempdir().unwrap();
        let mut file = write_archive(temp.path(), b"");
        assert!(matches!(
            detect_format(&mut file),
            Err(ExtractError::EmptyFile)
        ));
    }

    #[test]
    fn unknown_magic_is_rejected() {
        let temp = tempfile::tempdir().unwrap();
        let mut file = write_archive(temp.path(), b"plain text, not an archive");
        assert!(matches!(
            detect_format(&mut file),
            Err(ExtractError::UnsupportedFormat)
        ));
    }

    #[test]
    fn extracts_nested_tree() {
        let temp = tempfile::tempdir().unwrap();
        let dest = temp.path().join("out");
        fs::create_dir(&dest).unwrap();

        let bytes = tar_gz(&[
            ("nvim-linux-x86_64/bin/nvim", b"#!/bin/sh\n", 0o755),
            ("nvim-linux-x86_64/share/nvim/runtime/doc.txt", b"docs", 0o644),
        ]);
        let file = write_archive(temp.path(), &bytes);
        extract_blocking(file, &dest).unwrap();

        let binary = dest.join("nvim-linux-x86_64/bin/nvim");
        assert!(binary.is_file());
        cfg_if::cfg_if! {
            if #[cfg(unix)] {
                use std::os::unix::fs::PermissionsExt;
                let mode = fs::metadata(&binary).unwrap().permissions().mode();
                assert_eq!(mode & 0o777, 0o755);
            }
        }
        assert!(dest.join("nvim-linux-x86_64/share/nvim/runtime/doc.txt").is_file());
    }

    #[test]
    fn traversal_entry_is_illegal_and_writes_nothing_outside() {
        let temp = tempfile::tempdir().unwrap();
        let dest = temp.path().join("out");
        fs::create_dir(&dest).unwrap();

        let bytes = tar_gz(&[("../../etc/passwd", b"root:x", 0o644)]);
        let file = write_archive(temp.path(), &bytes);
        let result = extract_blocking(file, &dest);

        assert!(matches!(result, Err(ExtractError::IllegalPath(_))));
        assert!(fs::read_dir(&dest).unwrap().next().is_none());
        assert!(!temp.path().join("etc/passwd").exists());
    }

    #[test]
    fn dotdot_inside_dest_is_allowed() {
        let temp = tempfile::tempdir().unwrap();
        let dest = temp.path().join("out");
        fs::create_dir(&dest).unwrap();

        let bytes = tar_gz(&[("a/../file.txt", b"ok", 0o644)]);
        let file = write_archive(temp.path(), &bytes);
        extract_blocking(file, &dest).unwrap();
        assert!(dest.join("file.txt").is_file());
    }

    #[test]
    fn absolute_entry_is_anchored_under_dest() {
        let temp = tempfile::tempdir().unwrap();
        let dest = temp.path().join("out");
        fs::create_dir(&dest).unwrap();

        let bytes = tar_gz(&[("/abs/file.txt", b"ok", 0o644)]);
        let file = write_archive(temp.path(), &bytes);
        extract_blocking(file, &dest).unwrap();
        assert!(dest.join("abs/file.txt").is_file());
    }

    #[test]
    fn symlink_entries_are_dropped() {
        let temp = tempfile::tempdir().unwrap();
        let dest = temp.path().join("out");
        fs::create_dir(&dest).unwrap();

        let mut builder = tar::Builder::new(Vec::new());
        let mut header = tar::Header::new_gnu();
        header.set_entry_type(EntryType::Symlink);
        header.set_size(0);
        header.set_cksum();
        builder
            .append_link(&mut header, "evil-link", "/etc/passwd")
            .unwrap();
        let mut file_header = tar::Header::new_gnu();
        file_header.set_size(2);
        file_header.set_mode(0o644);
        file_header.set_cksum();
        builder
            .append_data(&mut file_header, "kept.txt", &b"ok"[..])
            .unwrap();
        let tar_bytes = builder.into_inner().unwrap();
        let mut encoder = GzEncoder::new(Vec::new(), Compression::fast());
        encoder.write_all(&tar_bytes).unwrap();
        let bytes = encoder.finish().unwrap();

        let file = write_archive(temp.path(), &bytes);
        extract_blocking(file, &dest).unwrap();

        assert!(!dest.join("evil-link").exists());
        assert!(dest.join("kept.txt").is_file());
    }

    #[test]
    fn zip_archive_extracts() {
        let temp = tempfile::tempdir().unwrap();
        let dest = temp.path().join("out");
        fs::create_dir(&dest).unwrap();

        let mut buffer = std::io::Cursor::new(Vec::new());
        {
            let mut writer = zip::ZipWriter::new(&mut buffer);
            let options = zip::write::SimpleFileOptions::default();
            writer
                .start_file("nvim-win64/bin/nvim.exe", options)
                .unwrap();
            writer.write_all(b"MZ fake").unwrap();
            writer.finish().unwrap();
        }
        let file = write_archive(temp.path(), buffer.get_ref());

        extract_blocking(file, &dest).unwrap();
        assert!(dest.join("nvim-win64/bin/nvim.exe").is_file());
    }

    #[test]
    fn zip_traversal_is_illegal() {
        let temp = tempfile::tempdir().unwrap();
        let dest = temp.path().join("out");
        fs::create_dir(&dest).unwrap();

        let mut buffer = std::io::Cursor::new(Vec::new());
        {
            let mut writer = zip::ZipWriter::new(&mut buffer);
            let options = zip::write::SimpleFileOptions::default();
            writer.start_file("../escape.txt", options).unwrap();
            writer.write_all(b"no").unwrap();
            writer.finish().unwrap();
        }
        let file = write_archive(temp.path(), buffer.get_ref());

        let result = extract_blocking(file, &dest);
        assert!(matches!(result, Err(ExtractError::IllegalPath(_))));
        assert!(!temp.path().join("escape.txt").exists());
    }
}
