use std::ffi::OsString;
use std::fs;
use std::io::{self, Write};
use std::path::{Path, PathBuf};

use flate2::write::GzEncoder;
use flate2::Compression;
use log::{debug, error};
use tempfile::NamedTempFile;

use crate::error_handling::types::LifecycleError;

pub const GZIP_SUFFIX: &str = ".gz";

pub fn is_gzip_path(path: &Path) -> bool {
    path.to_string_lossy().ends_with(GZIP_SUFFIX)
}

pub fn gzip_path(path: &Path) -> PathBuf {
    let mut name = OsString::from(path.as_os_str());
    name.push(GZIP_SUFFIX);
    PathBuf::from(name)
}

/// Compresses `source` into `source.gz` and removes `source`.
///
/// The archive is written to a temporary file next to the destination and
/// renamed into place once complete, carrying the source's permissions.
/// Failing to remove the original after a successful rename is logged, not
/// returned.
pub fn gzip_file(source: &Path) -> Result<PathBuf, LifecycleError> {
    if !source.is_file() {
        return Err(LifecycleError::FileMissing(source.to_path_buf()));
    }
    let destination = gzip_path(source);
    let dir = destination
        .parent()
        .filter(|p| !p.as_os_str().is_empty())
        .unwrap_or_else(|| Path::new("."));

    let data = fs::read(source).map_err(|e| LifecycleError::IoError(source.to_path_buf(), e))?;
    let permissions = fs::metadata(source)
        .map_err(|e| LifecycleError::IoError(source.to_path_buf(), e))?
        .permissions();
    let write = || -> io::Result<()> {
        let tmp = NamedTempFile::new_in(dir)?;
        let mut encoder = GzEncoder::new(tmp, Compression::default());
        encoder.write_all(&data)?;
        let tmp = encoder.finish()?;
        // temp files are created 0600; keep the capture's own mode
        tmp.as_file().set_permissions(permissions)?;
        tmp.as_file().sync_all()?;
        tmp.persist(&destination).map_err(|e| e.error)?;
        Ok(())
    };
    write().map_err(|e| LifecycleError::IoError(destination.clone(), e))?;

    if let Err(e) = fs::remove_file(source) {
        error!(
            "Failed to remove original {} after compression: {}",
            source.display(),
            e
        );
    }
    debug!(
        "Compressed {} ({} bytes) to {}",
        source.display(),
        data.len(),
        destination.display()
    );
    Ok(destination)
}

#[cfg(test)]
mod tests {
    use super::*;
    use flate2::read::GzDecoder;
    use std::io::Read;
    use tempfile::TempDir;

    #[test]
    fn test_gzip_replaces_original() {
        let dir = TempDir::new().unwrap();
        let source = dir.path().join("capture.pcap");
        let payload: Vec<u8> = (0..10_000u32).map(|i| (i % 251) as u8).collect();
        fs::write(&source, &payload).unwrap();

        let out = gzip_file(&source).unwrap();
        assert_eq!(out, dir.path().join("capture.pcap.gz"));
        assert!(!source.exists());

        let mut decoded = Vec::new();
        GzDecoder::new(fs::File::open(&out).unwrap())
            .read_to_end(&mut decoded)
            .unwrap();
        assert_eq!(decoded, payload);

        // only the final archive is left behind
        assert_eq!(fs::read_dir(dir.path()).unwrap().count(), 1);
    }

    #[cfg(unix)]
    #[test]
    fn test_gzip_keeps_source_permissions() {
        use std::os::unix::fs::PermissionsExt;

        let dir = TempDir::new().unwrap();
        let source = dir.path().join("capture.pcap");
        fs::write(&source, b"capture bytes").unwrap();
        fs::set_permissions(&source, fs::Permissions::from_mode(0o644)).unwrap();

        let out = gzip_file(&source).unwrap();
        let mode = fs::metadata(&out).unwrap().permissions().mode();
        assert_eq!(mode & 0o777, 0o644);
    }

    #[test]
    fn test_missing_source() {
        let dir = TempDir::new().unwrap();
        assert!(matches!(
            gzip_file(&dir.path().join("absent.pcap")),
            Err(LifecycleError::FileMissing(_))
        ));
    }

    #[test]
    fn test_suffix_helpers() {
        assert!(is_gzip_path(Path::new("/a/b.pcap.gz")));
        assert!(!is_gzip_path(Path::new("/a/b.pcap")));
        assert_eq!(gzip_path(Path::new("/a/b.pcap")), PathBuf::from("/a/b.pcap.gz"));
    }
}
