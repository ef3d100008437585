//! The group store: named collections of materialized templates.
//!
//! A group holds its own copy of every member template's mutable content
//! and a symlink to the immutable disk image, so group-local edits (asset
//! scripts, config) never leak back into the global catalog and deleting
//! a group never touches a template.

use std::fs;
use std::path::Path;

use crate::editor;
use crate::error::MoxenError;
use crate::lock::ResourceLock;
use crate::materialize::materialize_tree;
use crate::paths::{self, Layout, is_disk_image};
use crate::template::{TemplateStore, list_dir_names};

pub struct GroupStore {
    layout: Layout,
}

impl GroupStore {
    pub fn new(layout: Layout) -> Self {
        Self { layout }
    }

    /// Create an empty group: snapshot area plus an empty member tree.
    pub fn create(&self, name: &str) -> Result<(), MoxenError> {
        paths::validate_name("group name", name)?;

        let dir = self.layout.group_dir(name);
        if dir.exists() {
            return Err(MoxenError::AlreadyExists {
                kind: "group",
                name: name.to_string(),
            });
        }

        let _lock = ResourceLock::acquire(&self.layout, &format!("group-{name}"))?;

        for path in [
            dir.clone(),
            self.layout.group_snapshots_dir(name),
            self.layout.group_members_dir(name),
        ] {
            fs::create_dir_all(&path).map_err(|source| MoxenError::Io {
                context: format!("creating directory {}", path.display()),
                source,
            })?;
        }

        tracing::info!(name, "group created");
        Ok(())
    }

    /// Remove the whole group tree. Members are materialized references,
    /// so nothing cascades into the global template store.
    pub fn delete(&self, name: &str) -> Result<(), MoxenError> {
        let dir = self.layout.group_dir(name);
        if !dir.exists() {
            return Err(MoxenError::NotFound {
                kind: "group",
                name: name.to_string(),
            });
        }

        let _lock = ResourceLock::acquire(&self.layout, &format!("group-{name}"))?;

        fs::remove_dir_all(&dir).map_err(|source| MoxenError::Io {
            context: format!("removing {}", dir.display()),
            source,
        })?;
        tracing::info!(name, "group deleted");
        Ok(())
    }

    /// Materialize `template` into the group's member tree.
    ///
    /// Loading through the template store enforces the structural
    /// invariants first; a corrupted template cannot be added anywhere.
    pub fn add_member(
        &self,
        templates: &TemplateStore,
        group: &str,
        template: &str,
    ) -> Result<(), MoxenError> {
        let group_dir = self.layout.group_dir(group);
        if !group_dir.exists() {
            return Err(MoxenError::NotFound {
                kind: "group",
                name: group.to_string(),
            });
        }

        let loaded = templates.load(template)?;

        let dest = self.layout.group_member_dir(group, template);
        if dest.exists() {
            return Err(MoxenError::AlreadyExists {
                kind: "group member",
                name: template.to_string(),
            });
        }

        let _lock = ResourceLock::acquire(&self.layout, &format!("group-{group}"))?;

        materialize_tree(&loaded.dir, &dest, &is_disk_image)?;
        tracing::info!(group, template, "member materialized");
        Ok(())
    }

    /// Remove the member's subtree, unlinking its disk symlink and never
    /// touching the global disk image.
    pub fn remove_member(&self, group: &str, template: &str) -> Result<(), MoxenError> {
        let group_dir = self.layout.group_dir(group);
        if !group_dir.exists() {
            return Err(MoxenError::NotFound {
                kind: "group",
                name: group.to_string(),
            });
        }

        let member = self.layout.group_member_dir(group, template);
        if !member.exists() {
            return Err(MoxenError::NotFound {
                kind: "group member",
                name: template.to_string(),
            });
        }

        let _lock = ResourceLock::acquire(&self.layout, &format!("group-{group}"))?;

        fs::remove_dir_all(&member).map_err(|source| MoxenError::Io {
            context: format!("removing {}", member.display()),
            source,
        })?;
        tracing::info!(group, template, "member removed");
        Ok(())
    }

    /// Edit the group's own config document, creating it first if the
    /// group has never had one.
    pub fn edit_config(
        &self,
        name: &str,
        edit: impl FnOnce(&Path) -> Result<(), MoxenError>,
    ) -> Result<(), MoxenError> {
        let dir = self.layout.group_dir(name);
        if !dir.exists() {
            return Err(MoxenError::NotFound {
                kind: "group",
                name: name.to_string(),
            });
        }

        let config = self.layout.group_config(name);
        if !config.exists() {
            fs::write(&config, "# Group configuration\n").map_err(|source| MoxenError::Io {
                context: format!("writing {}", config.display()),
                source,
            })?;
        }

        editor::edit_yaml_scoped(&config, edit)
    }

    /// Sorted names of the group's current members.
    pub fn members(&self, name: &str) -> Result<Vec<String>, MoxenError> {
        let dir = self.layout.group_dir(name);
        if !dir.exists() {
            return Err(MoxenError::NotFound {
                kind: "group",
                name: name.to_string(),
            });
        }
        list_dir_names(&self.layout.group_members_dir(name))
    }

    /// Sorted names of every group in the catalog.
    pub fn list(&self) -> Result<Vec<String>, MoxenError> {
        list_dir_names(&self.layout.groups_dir())
    }
}
