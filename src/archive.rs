//! Package file trees as tar archives
//!
//! Packages travel as uncompressed tar both inside image layers and over a
//! function's stdin/stdout. Only directories and regular files are
//! accepted; symlinks and special entries are rejected outright.

use crate::api::{PackageContents, PackageResources};
use crate::error::{PorchletError, PorchletResult};
use std::io::Read;
use tar::{Archive, Builder, EntryType, Header};

fn archive_error(e: std::io::Error) -> PorchletError {
    PorchletError::Archive(e.to_string())
}

/// Read a package file tree from a tar stream.
///
/// Fails without returning any partial tree if an entry is not a
/// directory or regular file.
pub fn read_package_archive<R: Read>(reader: R) -> PorchletResult<PackageResources> {
    let mut archive = Archive::new(reader);
    let mut contents = PackageContents::new();

    for entry in archive.entries().map_err(archive_error)? {
        let mut entry = entry.map_err(archive_error)?;
        let raw_path = entry.path().map_err(archive_error)?;
        let path = raw_path
            .to_string_lossy()
            .trim_start_matches("./")
            .to_string();
        let entry_type = entry.header().entry_type();

        match entry_type {
            EntryType::Directory => {}
            EntryType::Symlink => {
                return Err(PorchletError::UnsupportedEntry {
                    path,
                    kind: "symlink".to_string(),
                })
            }
            t if t.is_file() => {
                let mut data = Vec::new();
                entry.read_to_end(&mut data).map_err(|e| {
                    PorchletError::Archive(format!("error reading {:?} from image: {}", path, e))
                })?;
                contents.insert(path, data);
            }
            other => {
                return Err(PorchletError::UnsupportedEntry {
                    path,
                    kind: format!("unsupported entry type {:?}", other),
                })
            }
        }
    }

    Ok(PackageResources { contents })
}

/// Write a package file tree as a reproducible tar archive
pub fn write_package_archive(resources: &PackageResources) -> PorchletResult<Vec<u8>> {
    let mut builder = Builder::new(Vec::new());

    for (path, content) in &resources.contents {
        let mut header = Header::new_ustar();
        header.set_entry_type(EntryType::Regular);
        header.set_size(content.len() as u64);
        header.set_mode(0o644);
        header.set_mtime(0);
        builder
            .append_data(&mut header, path, &content[..])
            .map_err(archive_error)?;
    }

    builder.into_inner().map_err(archive_error)
}
