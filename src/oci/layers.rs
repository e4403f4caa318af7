//! Layer flattening
//!
//! Layers are applied bottom to top. A later layer overrides earlier
//! entries at the same path; `.wh.<name>` removes `<name>` and
//! `.wh..wh..opq` hides everything earlier layers put in its directory.

use crate::error::{PorchletError, PorchletResult};
use std::collections::HashSet;
use std::io::Read;
use tar::{Archive, Builder};

const WHITEOUT_PREFIX: &str = ".wh.";
const OPAQUE_WHITEOUT: &str = ".wh..wh..opq";

/// Merge uncompressed layer tars into a single tar of the final tree.
///
/// Entries are emitted top layer first; each path appears at most once.
pub fn flatten_layers(layers: &[Vec<u8>]) -> PorchletResult<Vec<u8>> {
    if let [single] = layers {
        return Ok(single.clone());
    }

    let mut builder = Builder::new(Vec::new());
    let mut seen: HashSet<String> = HashSet::new();
    let mut whiteouts: HashSet<String> = HashSet::new();
    let mut opaque_dirs: Vec<String> = Vec::new();

    for layer in layers.iter().rev() {
        let mut layer_opaque = Vec::new();
        let mut layer_whiteouts = Vec::new();
        let mut archive = Archive::new(&layer[..]);

        for entry in archive.entries().map_err(archive_err)? {
            let mut entry = entry.map_err(archive_err)?;
            let path = normalize(&entry.path().map_err(archive_err)?.to_string_lossy());
            if path.is_empty() {
                continue;
            }

            let (dir, base) = match path.rsplit_once('/') {
                Some((dir, base)) => (dir.to_string(), base),
                None => (String::new(), path.as_str()),
            };

            if base == OPAQUE_WHITEOUT {
                layer_opaque.push(dir);
                continue;
            }
            if let Some(hidden) = base.strip_prefix(WHITEOUT_PREFIX) {
                layer_whiteouts.push(join(&dir, hidden));
                continue;
            }

            if seen.contains(&path)
                || is_whited_out(&path, &whiteouts)
                || opaque_dirs.iter().any(|d| is_beneath(&path, d))
            {
                continue;
            }
            seen.insert(path.clone());

            let mut data = Vec::new();
            entry.read_to_end(&mut data).map_err(archive_err)?;
            let mut header = entry.header().clone();
            builder
                .append_data(&mut header, &path, &data[..])
                .map_err(archive_err)?;
        }

        // A layer's own whiteouts only affect the layers beneath it
        whiteouts.extend(layer_whiteouts);
        opaque_dirs.extend(layer_opaque);
    }

    builder.into_inner().map_err(archive_err)
}

fn normalize(path: &str) -> String {
    path.trim_start_matches("./").trim_end_matches('/').to_string()
}

fn join(dir: &str, name: &str) -> String {
    if dir.is_empty() {
        name.to_string()
    } else {
        format!("{}/{}", dir, name)
    }
}

fn is_beneath(path: &str, dir: &str) -> bool {
    dir.is_empty() || path.strip_prefix(dir).is_some_and(|rest| rest.starts_with('/'))
}

fn is_whited_out(path: &str, whiteouts: &HashSet<String>) -> bool {
    whiteouts.contains(path) || whiteouts.iter().any(|w| is_beneath(path, w))
}

fn archive_err(e: std::io::Error) -> PorchletError {
    PorchletError::Archive(e.to_string())
}
