//! Archive extraction with progress reporting and cancellation.
//!
//! Takes a staged ZIP archive and unpacks it under the job's extract root,
//! reporting progress as bytes/files unpacked. Entries whose normalised
//! path would escape the extract root are rejected. Any failure leaves the
//! partially-extracted tree in place for resume and debugging.

use crate::error::{Error, Result};
use std::fs;
use std::io;
use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};

/// Progress callback: (files_done, files_total, percent_by_bytes).
pub type ProgressFn<'a> = &'a mut dyn FnMut(usize, usize, u8);

/// How often extraction progress is published, in files.
const PROGRESS_EVERY: usize = 10;

/// Outcome of a completed extraction.
#[derive(Debug, Clone, Copy)]
pub struct ExtractReport {
    pub files: usize,
    pub bytes: u64,
}

/// Extract `archive_path` into `dest_root`.
///
/// The cancel flag is checked before every entry; on cancel the function
/// returns [`Error::Cancelled`] and whatever was already written stays on
/// disk. `progress` is invoked every [`PROGRESS_EVERY`] files and on the
/// final file, with an integer-rounded percent computed over uncompressed
/// bytes.
pub fn extract_archive(
    archive_path: &Path,
    dest_root: &Path,
    cancel: &AtomicBool,
    progress: ProgressFn<'_>,
) -> Result<ExtractReport> {
    let file = fs::File::open(archive_path)?;
    let mut archive = zip::ZipArchive::new(file).map_err(corrupt)?;

    // Pre-scan for the total uncompressed size so percent is meaningful.
    let mut total_bytes: u64 = 0;
    let mut total_files = 0usize;
    for i in 0..archive.len() {
        let entry = archive.by_index(i).map_err(corrupt)?;
        if !entry.is_dir() {
            total_bytes += entry.size();
            total_files += 1;
        }
    }

    fs::create_dir_all(dest_root)?;

    let mut done_bytes: u64 = 0;
    let mut done_files = 0usize;

    for i in 0..archive.len() {
        if cancel.load(Ordering::Relaxed) {
            return Err(Error::Cancelled);
        }

        let mut entry = archive.by_index(i).map_err(corrupt)?;
        let Some(rel) = entry.enclosed_name() else {
            return Err(Error::PathEscape(entry.name().to_string()));
        };
        let out_path = dest_root.join(rel);

        if entry.is_dir() {
            fs::create_dir_all(&out_path)?;
            continue;
        }

        if let Some(parent) = out_path.parent() {
            fs::create_dir_all(parent)?;
        }
        let mut out = fs::File::create(&out_path)?;
        io::copy(&mut entry, &mut out)?;

        done_bytes += entry.size();
        done_files += 1;

        if done_files % PROGRESS_EVERY == 0 || done_files == total_files {
            let percent = if total_bytes == 0 {
                100
            } else {
                ((done_bytes * 100) / total_bytes) as u8
            };
            progress(done_files, total_files, percent);
        }
    }

    tracing::info!(
        archive = %archive_path.display(),
        dest = %dest_root.display(),
        files = done_files,
        bytes = done_bytes,
        "extraction complete"
    );

    Ok(ExtractReport {
        files: done_files,
        bytes: done_bytes,
    })
}

fn corrupt(e: zip::result::ZipError) -> Error {
    match e {
        zip::result::ZipError::Io(io) => Error::Io(io),
        other => Error::CorruptArchive(other.to_string()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use zip::write::SimpleFileOptions;

    fn build_zip(entries: &[(&str, &str)]) -> tempfile::NamedTempFile {
        let tmp = tempfile::NamedTempFile::new().unwrap();
        let mut writer = zip::ZipWriter::new(tmp.reopen().unwrap());
        let options = SimpleFileOptions::default();
        for (name, content) in entries {
            writer.start_file(*name, options).unwrap();
            writer.write_all(content.as_bytes()).unwrap();
        }
        writer.finish().unwrap();
        tmp
    }

    fn no_cancel() -> AtomicBool {
        AtomicBool::new(false)
    }

    #[test]
    fn extracts_tree_and_reports_progress() {
        let zip = build_zip(&[
            ("export/channels/general/general.txt", "hello"),
            ("export/dms/a-b/a-b.txt", "hi"),
        ]);
        let dest = tempfile::tempdir().unwrap();
        let cancel = no_cancel();
        let mut updates = Vec::new();
        let report = extract_archive(zip.path(), dest.path(), &cancel, &mut |f, t, p| {
            updates.push((f, t, p))
        })
        .unwrap();

        assert_eq!(report.files, 2);
        assert_eq!(report.bytes, 7);
        assert!(dest
            .path()
            .join("export/channels/general/general.txt")
            .is_file());
        // Final file always reports, at 100 percent.
        assert_eq!(updates.last(), Some(&(2, 2, 100)));
    }

    #[test]
    fn zero_byte_archive_is_corrupt() {
        let tmp = tempfile::NamedTempFile::new().unwrap();
        let dest = tempfile::tempdir().unwrap();
        let cancel = no_cancel();
        let err = extract_archive(tmp.path(), dest.path(), &cancel, &mut |_, _, _| {}).unwrap_err();
        assert!(matches!(err, Error::CorruptArchive(_)), "{err}");
    }

    #[test]
    fn path_escape_is_rejected() {
        let zip = build_zip(&[("../evil.txt", "pwned")]);
        let dest = tempfile::tempdir().unwrap();
        let cancel = no_cancel();
        let err = extract_archive(zip.path(), dest.path(), &cancel, &mut |_, _, _| {}).unwrap_err();
        assert!(matches!(err, Error::PathEscape(_)), "{err}");
        assert!(!dest.path().parent().unwrap().join("evil.txt").exists());
    }

    #[test]
    fn cancel_stops_before_next_entry() {
        let zip = build_zip(&[("a.txt", "a"), ("b.txt", "b")]);
        let dest = tempfile::tempdir().unwrap();
        let cancel = AtomicBool::new(true);
        let err = extract_archive(zip.path(), dest.path(), &cancel, &mut |_, _, _| {}).unwrap_err();
        assert!(matches!(err, Error::Cancelled));
        assert!(!dest.path().join("a.txt").exists());
    }

    #[test]
    fn progress_cadence_every_ten_files() {
        let entries: Vec<(String, String)> = (0..25)
            .map(|i| (format!("f{i:02}.txt"), "x".to_string()))
            .collect();
        let borrowed: Vec<(&str, &str)> = entries
            .iter()
            .map(|(n, c)| (n.as_str(), c.as_str()))
            .collect();
        let zip = build_zip(&borrowed);
        let dest = tempfile::tempdir().unwrap();
        let cancel = no_cancel();
        let mut updates = Vec::new();
        extract_archive(zip.path(), dest.path(), &cancel, &mut |f, _, _| {
            updates.push(f)
        })
        .unwrap();
        assert_eq!(updates, [10, 20, 25]);
    }
}
