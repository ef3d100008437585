//! Tree materialization: the one routine that derives a group member from
//! a template, or an instance from a group.
//!
//! Disk images are large and declared immutable, so they are shared by
//! symlink; everything else (config, asset buckets, key material) is the
//! mutable per-copy surface and gets a real copy. Which files count as
//! immutable is a caller-supplied predicate so both call sites share one
//! walk.

use std::fs;
use std::path::Path;

use crate::error::MoxenError;

/// Recursively mirror `src` into `dst`.
///
/// Directories are recreated, files matched by `link_file` become symlinks
/// to their fully resolved source (so a link to a link still lands on the
/// real disk image), and all other files are copied with permissions
/// intact. `dst` must not already exist.
pub fn materialize_tree(
    src: &Path,
    dst: &Path,
    link_file: &dyn Fn(&Path) -> bool,
) -> Result<(), MoxenError> {
    fs::create_dir_all(dst).map_err(|source| MoxenError::Io {
        context: format!("creating directory {}", dst.display()),
        source,
    })?;

    let entries = fs::read_dir(src).map_err(|source| MoxenError::Io {
        context: format!("reading directory {}", src.display()),
        source,
    })?;

    for entry in entries {
        let entry = entry.map_err(|source| MoxenError::Io {
            context: format!("reading directory {}", src.display()),
            source,
        })?;
        let path = entry.path();
        let target = dst.join(entry.file_name());

        let file_type = entry.file_type().map_err(|source| MoxenError::Io {
            context: format!("inspecting {}", path.display()),
            source,
        })?;

        if file_type.is_dir() {
            materialize_tree(&path, &target, link_file)?;
        } else if link_file(&path) {
            // Resolve before linking: a group's disk is itself a symlink,
            // and the instance copy must point at the template's real image.
            let resolved = path.canonicalize().map_err(|source| MoxenError::Io {
                context: format!("resolving {}", path.display()),
                source,
            })?;
            std::os::unix::fs::symlink(&resolved, &target).map_err(|source| MoxenError::Io {
                context: format!("linking {} -> {}", target.display(), resolved.display()),
                source,
            })?;
        } else {
            fs::copy(&path, &target).map_err(|source| MoxenError::Io {
                context: format!("copying {} to {}", path.display(), target.display()),
                source,
            })?;
        }
    }

    Ok(())
}
