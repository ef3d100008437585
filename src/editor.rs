//! Interactive editor collaborator and the scoped-edit routine used for
//! every config document.
//!
//! The edit is never applied in place: the document is copied to a `.tmp`
//! sibling, the editor runs on the copy, and only a copy that still parses
//! as YAML replaces the original (atomically, via rename). A botched edit
//! therefore leaves the original untouched.

use std::path::{Path, PathBuf};
use std::process::Command;

use crate::error::MoxenError;

const FALLBACK_EDITORS: &[&str] = &["nano", "vim", "vi"];

/// Resolve the editor to launch: `$EDITOR`, then `$VISUAL`, then the first
/// fallback found on `$PATH`.
pub fn resolve_editor() -> Result<String, MoxenError> {
    for var in ["EDITOR", "VISUAL"] {
        if let Ok(value) = std::env::var(var) {
            if !value.is_empty() {
                return Ok(value);
            }
        }
    }

    for candidate in FALLBACK_EDITORS {
        if on_path(candidate) {
            return Ok((*candidate).to_string());
        }
    }

    Err(MoxenError::ExternalTool {
        tool: "editor".to_string(),
        message: "no editor found; set the EDITOR environment variable".to_string(),
    })
}

fn on_path(command: &str) -> bool {
    let Some(path_var) = std::env::var_os("PATH") else {
        return false;
    };
    std::env::split_paths(&path_var).any(|dir| dir.join(command).is_file())
}

/// Launch the resolved editor on `path` and wait for it to exit.
pub fn launch(path: &Path) -> Result<(), MoxenError> {
    let editor = resolve_editor()?;
    let status = Command::new(&editor)
        .arg(path)
        .status()
        .map_err(|source| MoxenError::Io {
            context: format!("running editor '{editor}'"),
            source,
        })?;

    if !status.success() {
        return Err(MoxenError::ExternalTool {
            tool: editor,
            message: format!("exited with {status}"),
        });
    }
    Ok(())
}

/// Edit `file` through a temporary copy, applying the result only if it is
/// still well-formed YAML.
///
/// `edit` is the actual editing step ([`launch`] in production, a closure
/// in tests) and receives the temporary path. On editor failure or a
/// parse failure the temporary file is discarded and `file` is untouched.
pub fn edit_yaml_scoped(
    file: &Path,
    edit: impl FnOnce(&Path) -> Result<(), MoxenError>,
) -> Result<(), MoxenError> {
    let tmp = tmp_path(file);

    std::fs::copy(file, &tmp).map_err(|source| MoxenError::Io {
        context: format!("copying {} for editing", file.display()),
        source,
    })?;

    if let Err(e) = edit(&tmp) {
        let _ = std::fs::remove_file(&tmp);
        return Err(e);
    }

    let edited = match std::fs::read_to_string(&tmp) {
        Ok(contents) => contents,
        Err(source) => {
            let _ = std::fs::remove_file(&tmp);
            return Err(MoxenError::Io {
                context: format!("reading edited file {}", tmp.display()),
                source,
            });
        }
    };

    if let Err(e) = serde_yaml::from_str::<serde_yaml::Value>(&edited) {
        let _ = std::fs::remove_file(&tmp);
        return Err(MoxenError::InvalidConfig {
            path: file.display().to_string(),
            message: e.to_string(),
        });
    }

    std::fs::rename(&tmp, file).map_err(|source| MoxenError::Io {
        context: format!("replacing {}", file.display()),
        source,
    })?;

    tracing::info!(path = %file.display(), "configuration changes applied");
    Ok(())
}

fn tmp_path(file: &Path) -> PathBuf {
    let mut name = file
        .file_name()
        .map(|n| n.to_os_string())
        .unwrap_or_default();
    name.push(".tmp");
    file.with_file_name(name)
}
