//! Cross-reference checks run before destructive operations.

use std::fs;

use crate::error::MoxenError;
use crate::paths::Layout;

/// Names of every group whose member tree currently contains `template`.
///
/// Read-only scan, linear in the number of groups. The result is sorted so
/// callers (and error messages) are deterministic.
pub fn find_references(layout: &Layout, template: &str) -> Result<Vec<String>, MoxenError> {
    let groups_dir = layout.groups_dir();
    if !groups_dir.exists() {
        return Ok(Vec::new());
    }

    let entries = fs::read_dir(&groups_dir).map_err(|source| MoxenError::Io {
        context: format!("reading groups directory {}", groups_dir.display()),
        source,
    })?;

    let mut found = Vec::new();
    for entry in entries {
        let entry = entry.map_err(|source| MoxenError::Io {
            context: format!("reading groups directory {}", groups_dir.display()),
            source,
        })?;
        if !entry.file_type().map(|t| t.is_dir()).unwrap_or(false) {
            continue;
        }
        let Some(group) = entry.file_name().to_str().map(String::from) else {
            continue;
        };
        if layout.group_member_dir(&group, template).exists() {
            found.push(group);
        }
    }

    found.sort();
    Ok(found)
}
