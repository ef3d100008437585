//! Canonical locations of every catalog resource.
//!
//! All state is the directory tree itself: a resource exists when its
//! directory exists. Every component resolves paths through [`Layout`] so
//! the naming rules live in exactly one place. Nothing here touches the
//! filesystem.

use std::path::{Path, PathBuf};

use crate::error::MoxenError;

/// File extension marking the immutable disk image inside a template tree.
pub const DISK_EXTENSION: &str = "qcow2";

/// Who the files in an asset bucket are intended for inside the guest.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AssetOwner {
    User,
    Root,
}

impl AssetOwner {
    pub fn parse(s: &str) -> Result<Self, MoxenError> {
        match s {
            "user" => Ok(AssetOwner::User),
            "root" => Ok(AssetOwner::Root),
            other => Err(MoxenError::InvalidArgument {
                what: "asset owner",
                value: other.to_string(),
                expected: "user, root".to_string(),
            }),
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            AssetOwner::User => "user",
            AssetOwner::Root => "root",
        }
    }
}

/// Whether a bucket holds executables or plain files.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AssetKind {
    Executable,
    File,
}

impl AssetKind {
    pub fn parse(s: &str) -> Result<Self, MoxenError> {
        match s {
            "executable" => Ok(AssetKind::Executable),
            "file" => Ok(AssetKind::File),
            other => Err(MoxenError::InvalidArgument {
                what: "asset kind",
                value: other.to_string(),
                expected: "executable, file".to_string(),
            }),
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            AssetKind::Executable => "executable",
            AssetKind::File => "file",
        }
    }
}

/// Directory name for one of the four permission-scoped asset buckets,
/// e.g. `user_executables` or `root_files`.
pub fn bucket_dir_name(owner: AssetOwner, kind: AssetKind) -> String {
    format!("{}_{}s", owner.as_str(), kind.as_str())
}

/// Path mapper rooted at the configured base directory.
#[derive(Debug, Clone)]
pub struct Layout {
    base: PathBuf,
}

impl Layout {
    pub fn new(base: impl Into<PathBuf>) -> Self {
        Self { base: base.into() }
    }

    pub fn base(&self) -> &Path {
        &self.base
    }

    // ── top-level roots ─────────────────────────────────────────────

    pub fn templates_dir(&self) -> PathBuf {
        self.base.join("vm_templates")
    }

    pub fn groups_dir(&self) -> PathBuf {
        self.base.join("groups")
    }

    pub fn instances_dir(&self) -> PathBuf {
        self.base.join("instances")
    }

    pub fn suspended_dir(&self) -> PathBuf {
        self.base.join("suspended")
    }

    pub fn defaults_dir(&self) -> PathBuf {
        self.base.join("defaults")
    }

    pub fn locks_dir(&self) -> PathBuf {
        self.base.join(".locks")
    }

    // ── templates ───────────────────────────────────────────────────

    pub fn template_dir(&self, name: &str) -> PathBuf {
        self.templates_dir().join(name)
    }

    /// The immutable disk image: `vm_templates/<name>/<name>.qcow2`.
    pub fn template_disk(&self, name: &str) -> PathBuf {
        self.template_dir(name)
            .join(format!("{name}.{DISK_EXTENSION}"))
    }

    /// The config document: `vm_templates/<name>/<name>_config.yaml`.
    pub fn template_config(&self, name: &str) -> PathBuf {
        self.template_dir(name).join(format!("{name}_config.yaml"))
    }

    pub fn asset_bucket(&self, name: &str, owner: AssetOwner, kind: AssetKind) -> PathBuf {
        self.template_dir(name).join(bucket_dir_name(owner, kind))
    }

    /// SSH key material, one file per guest username.
    pub fn ssh_dir(&self, name: &str) -> PathBuf {
        self.template_dir(name).join("ssh")
    }

    // ── groups ──────────────────────────────────────────────────────

    pub fn group_dir(&self, name: &str) -> PathBuf {
        self.groups_dir().join(name)
    }

    pub fn group_snapshots_dir(&self, name: &str) -> PathBuf {
        self.group_dir(name).join("snapshots")
    }

    /// Root of the group's materialized member templates.
    pub fn group_members_dir(&self, name: &str) -> PathBuf {
        self.group_dir(name).join("vm_templates")
    }

    pub fn group_member_dir(&self, group: &str, template: &str) -> PathBuf {
        self.group_members_dir(group).join(template)
    }

    pub fn group_config(&self, name: &str) -> PathBuf {
        self.group_dir(name).join("config.yaml")
    }

    // ── instances ───────────────────────────────────────────────────

    pub fn instance_dir(&self, name: &str) -> PathBuf {
        self.instances_dir().join(name)
    }

    pub fn suspended_instance_dir(&self, name: &str) -> PathBuf {
        self.suspended_dir().join(name)
    }
}

/// Validate a resource name for use as a directory name.
///
/// Names double as directory names, so anything that could escape the
/// tree (path separators, leading dots) is rejected up front.
pub fn validate_name(what: &'static str, name: &str) -> Result<(), MoxenError> {
    let mut chars = name.chars();
    let valid = match chars.next() {
        Some(first) => {
            first.is_ascii_alphanumeric()
                && chars.all(|c| c.is_ascii_alphanumeric() || matches!(c, '.' | '_' | '-'))
        }
        None => false,
    };
    if !valid {
        return Err(MoxenError::InvalidArgument {
            what,
            value: name.to_string(),
            expected: "names matching [A-Za-z0-9][A-Za-z0-9._-]*".to_string(),
        });
    }
    Ok(())
}

/// The predicate behind the copy-vs-link split: disk images are shared by
/// symlink, everything else is copied.
pub fn is_disk_image(path: &Path) -> bool {
    path.extension()
        .and_then(|e| e.to_str())
        .is_some_and(|e| e == DISK_EXTENSION)
}
