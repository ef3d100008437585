//! The template store: on-disk representation and lifecycle of VM
//! templates.
//!
//! A template is a directory under `vm_templates/` holding exactly one
//! immutable disk image, one YAML config document, four permission-scoped
//! asset buckets, and optional per-user SSH key material. The directory's
//! existence is the template's existence; a directory missing its disk or
//! config is corrupted and rejected by everything except deletion.

use std::fs;
use std::os::unix::fs::PermissionsExt;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::domain_xml::DomainSpec;
use crate::editor;
use crate::error::MoxenError;
use crate::hypervisor::{Hypervisor, InstallSpec};
use crate::lock::ResourceLock;
use crate::paths::{self, AssetKind, AssetOwner, Layout, bucket_dir_name};
use crate::refs;

fn default_ssh_port() -> u16 {
    22
}

/// The parsed config document. Unknown keys are operator extension fields
/// and survive load/store untouched.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TemplateConfig {
    #[serde(default = "default_ssh_port")]
    pub ssh_port: u16,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cpus: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub memory_mb: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub disk_size_gb: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub os_variant: Option<String>,
    #[serde(flatten)]
    pub extra: serde_yaml::Mapping,
}

/// A loaded, structurally valid template.
#[derive(Debug)]
pub struct Template {
    pub name: String,
    pub dir: PathBuf,
    pub disk: PathBuf,
    pub config_path: PathBuf,
    pub config: TemplateConfig,
}

/// Inputs to template creation. Exactly one of `iso` (guided install) or
/// `existing_disk` (import) must be set.
#[derive(Debug)]
pub struct CreateTemplate {
    pub name: String,
    pub disk_size_gb: u32,
    pub cpus: u32,
    pub memory_mb: u64,
    pub os_variant: Option<String>,
    pub iso: Option<PathBuf>,
    pub existing_disk: Option<PathBuf>,
}

/// Where a new SSH key comes from.
#[derive(Debug)]
pub enum KeySource {
    /// Copy an existing private key file.
    Copy(PathBuf),
    /// Generate a fresh ed25519 keypair.
    Generate,
}

pub struct TemplateStore {
    layout: Layout,
}

impl TemplateStore {
    pub fn new(layout: Layout) -> Self {
        Self { layout }
    }

    /// Read a template, enforcing the structural invariants: the directory
    /// must exist, and must contain both the disk image and a parseable
    /// config document.
    pub fn load(&self, name: &str) -> Result<Template, MoxenError> {
        let dir = self.layout.template_dir(name);
        if !dir.exists() {
            return Err(MoxenError::NotFound {
                kind: "template",
                name: name.to_string(),
            });
        }

        let disk = self.layout.template_disk(name);
        if !disk.exists() {
            return Err(MoxenError::Corrupted {
                kind: "template",
                name: name.to_string(),
                missing: format!("disk image {}", disk.display()),
            });
        }

        let config_path = self.layout.template_config(name);
        if !config_path.exists() {
            return Err(MoxenError::Corrupted {
                kind: "template",
                name: name.to_string(),
                missing: format!("config file {}", config_path.display()),
            });
        }

        let contents = fs::read_to_string(&config_path).map_err(|source| MoxenError::Io {
            context: format!("reading {}", config_path.display()),
            source,
        })?;
        let config: TemplateConfig =
            serde_yaml::from_str(&contents).map_err(|e| MoxenError::InvalidConfig {
                path: config_path.display().to_string(),
                message: e.to_string(),
            })?;

        Ok(Template {
            name: name.to_string(),
            dir,
            disk,
            config_path,
            config,
        })
    }

    /// Create a new template: directory skeleton, default config, then
    /// disk provisioning through the hypervisor collaborator.
    ///
    /// A provisioning failure rolls the whole directory back so a failed
    /// create never leaves a half-built template behind.
    pub fn create(&self, hv: &dyn Hypervisor, req: &CreateTemplate) -> Result<(), MoxenError> {
        paths::validate_name("template name", &req.name)?;

        let dir = self.layout.template_dir(&req.name);
        if dir.exists() {
            return Err(MoxenError::AlreadyExists {
                kind: "template",
                name: req.name.clone(),
            });
        }

        match (&req.iso, &req.existing_disk) {
            (None, None) => {
                return Err(MoxenError::InvalidArgument {
                    what: "disk source",
                    value: "none".to_string(),
                    expected: "--iso or --existing-disk".to_string(),
                });
            }
            (Some(_), Some(_)) => {
                return Err(MoxenError::InvalidArgument {
                    what: "disk source",
                    value: "both --iso and --existing-disk".to_string(),
                    expected: "exactly one of the two".to_string(),
                });
            }
            _ => {}
        }
        for supplied in [&req.iso, &req.existing_disk].into_iter().flatten() {
            if !supplied.exists() {
                return Err(MoxenError::InvalidArgument {
                    what: "disk source path",
                    value: supplied.display().to_string(),
                    expected: "an existing file".to_string(),
                });
            }
        }

        let _lock = ResourceLock::acquire(&self.layout, &format!("template-{}", req.name))?;

        self.scaffold(req)?;

        if let Err(e) = self.provision(hv, req) {
            let _ = fs::remove_dir_all(&dir);
            tracing::warn!(name = %req.name, "provisioning failed, rolled back template directory");
            return Err(e);
        }

        tracing::info!(name = %req.name, "template created");
        Ok(())
    }

    fn scaffold(&self, req: &CreateTemplate) -> Result<(), MoxenError> {
        let dir = self.layout.template_dir(&req.name);
        let mkdir = |path: &Path| {
            fs::create_dir_all(path).map_err(|source| MoxenError::Io {
                context: format!("creating directory {}", path.display()),
                source,
            })
        };

        mkdir(&dir)?;
        for owner in [AssetOwner::User, AssetOwner::Root] {
            for kind in [AssetKind::Executable, AssetKind::File] {
                mkdir(&self.layout.asset_bucket(&req.name, owner, kind))?;
            }
        }
        mkdir(&self.layout.ssh_dir(&req.name))?;

        let config = TemplateConfig {
            ssh_port: default_ssh_port(),
            cpus: Some(req.cpus),
            memory_mb: Some(req.memory_mb),
            disk_size_gb: Some(req.disk_size_gb),
            os_variant: req.os_variant.clone(),
            extra: serde_yaml::Mapping::new(),
        };
        let contents = serde_yaml::to_string(&config).map_err(|e| MoxenError::InvalidConfig {
            path: self.layout.template_config(&req.name).display().to_string(),
            message: e.to_string(),
        })?;
        let config_path = self.layout.template_config(&req.name);
        fs::write(&config_path, contents).map_err(|source| MoxenError::Io {
            context: format!("writing {}", config_path.display()),
            source,
        })?;

        Ok(())
    }

    fn provision(&self, hv: &dyn Hypervisor, req: &CreateTemplate) -> Result<(), MoxenError> {
        let disk = self.layout.template_disk(&req.name);
        let spec = DomainSpec {
            name: &req.name,
            cpus: req.cpus,
            memory_mb: req.memory_mb,
            disk: &disk,
        };

        if let Some(existing) = &req.existing_disk {
            fs::copy(existing, &disk).map_err(|source| MoxenError::Io {
                context: format!(
                    "copying {} to {}",
                    existing.display(),
                    disk.display()
                ),
                source,
            })?;
            hv.import_image(&spec)
        } else {
            let iso = req.iso.as_deref().expect("checked in create");
            hv.allocate_disk(&disk, req.disk_size_gb)?;
            hv.install_from_iso(&InstallSpec { domain: spec, iso })
        }
    }

    /// Delete a template. Without `force` the delete is blocked while any
    /// group still references it; with `force` the member copy is removed
    /// from every referencing group first. Returns the groups that were
    /// cleaned up.
    pub fn delete(&self, name: &str, force: bool) -> Result<Vec<String>, MoxenError> {
        let dir = self.layout.template_dir(name);
        if !dir.exists() {
            return Err(MoxenError::NotFound {
                kind: "template",
                name: name.to_string(),
            });
        }

        let _lock = ResourceLock::acquire(&self.layout, &format!("template-{name}"))?;

        let groups = refs::find_references(&self.layout, name)?;
        if !groups.is_empty() && !force {
            return Err(MoxenError::Referenced {
                name: name.to_string(),
                groups,
            });
        }

        for group in &groups {
            let member = self.layout.group_member_dir(group, name);
            fs::remove_dir_all(&member).map_err(|source| MoxenError::Io {
                context: format!("removing {}", member.display()),
                source,
            })?;
            tracing::info!(name, group = %group, "removed member copy during forced delete");
        }

        fs::remove_dir_all(&dir).map_err(|source| MoxenError::Io {
            context: format!("removing {}", dir.display()),
            source,
        })?;
        tracing::info!(name, "template deleted");
        Ok(groups)
    }

    // ── asset buckets ───────────────────────────────────────────────

    /// Copy `source` into the resolved bucket. A missing bucket directory
    /// is silently recreated; an existing file of the same name is
    /// overwritten (last write wins).
    pub fn add_asset(
        &self,
        name: &str,
        source: &Path,
        owner: AssetOwner,
        kind: AssetKind,
    ) -> Result<(), MoxenError> {
        self.load(name)?;

        if !source.exists() {
            return Err(MoxenError::NotFound {
                kind: "file",
                name: source.display().to_string(),
            });
        }
        let file_name = source.file_name().ok_or_else(|| MoxenError::InvalidArgument {
            what: "source file",
            value: source.display().to_string(),
            expected: "a path ending in a file name".to_string(),
        })?;

        let bucket = self.layout.asset_bucket(name, owner, kind);
        fs::create_dir_all(&bucket).map_err(|source| MoxenError::Io {
            context: format!("creating bucket {}", bucket.display()),
            source,
        })?;

        let dest = bucket.join(file_name);
        fs::copy(source, &dest).map_err(|e| MoxenError::Io {
            context: format!("copying {} to {}", source.display(), dest.display()),
            source: e,
        })?;

        tracing::info!(name, file = %dest.display(), "asset added");
        Ok(())
    }

    pub fn remove_asset(
        &self,
        name: &str,
        file_name: &str,
        owner: AssetOwner,
        kind: AssetKind,
    ) -> Result<(), MoxenError> {
        self.load(name)?;

        if file_name.contains('/') {
            return Err(MoxenError::InvalidArgument {
                what: "asset name",
                value: file_name.to_string(),
                expected: "a bare file name".to_string(),
            });
        }

        let path = self.layout.asset_bucket(name, owner, kind).join(file_name);
        if !path.exists() {
            return Err(MoxenError::NotFound {
                kind: "asset",
                name: file_name.to_string(),
            });
        }
        fs::remove_file(&path).map_err(|source| MoxenError::Io {
            context: format!("removing {}", path.display()),
            source,
        })?;
        Ok(())
    }

    /// Names in the resolved bucket, sorted. The bucket directory is part
    /// of the template skeleton, so its absence is a structural failure
    /// even though buckets may be empty.
    pub fn list_assets(
        &self,
        name: &str,
        owner: AssetOwner,
        kind: AssetKind,
    ) -> Result<Vec<String>, MoxenError> {
        self.load(name)?;

        let bucket = self.layout.asset_bucket(name, owner, kind);
        if !bucket.exists() {
            return Err(MoxenError::Corrupted {
                kind: "template",
                name: name.to_string(),
                missing: format!("bucket {}", bucket_dir_name(owner, kind)),
            });
        }

        let entries = fs::read_dir(&bucket).map_err(|source| MoxenError::Io {
            context: format!("reading bucket {}", bucket.display()),
            source,
        })?;
        let mut names: Vec<String> = entries
            .filter_map(|e| e.ok())
            .filter_map(|e| e.file_name().to_str().map(String::from))
            .collect();
        names.sort();
        Ok(names)
    }

    // ── ssh keys ────────────────────────────────────────────────────

    /// Install key material for a guest user: either a copy of an existing
    /// private key, or a freshly generated ed25519 pair. The private key
    /// ends up owner-read/write only.
    pub fn add_ssh_key(
        &self,
        name: &str,
        user: &str,
        source: &KeySource,
    ) -> Result<(), MoxenError> {
        self.load(name)?;
        paths::validate_name("username", user)?;

        let ssh_dir = self.layout.ssh_dir(name);
        fs::create_dir_all(&ssh_dir).map_err(|source| MoxenError::Io {
            context: format!("creating {}", ssh_dir.display()),
            source,
        })?;
        let key_path = ssh_dir.join(user);

        match source {
            KeySource::Copy(existing) => {
                if !existing.exists() {
                    return Err(MoxenError::NotFound {
                        kind: "key file",
                        name: existing.display().to_string(),
                    });
                }
                fs::copy(existing, &key_path).map_err(|source| MoxenError::Io {
                    context: format!("copying key to {}", key_path.display()),
                    source,
                })?;
            }
            KeySource::Generate => {
                let key = ssh_key::PrivateKey::random(
                    &mut rand_core::OsRng,
                    ssh_key::Algorithm::Ed25519,
                )
                .map_err(|e| MoxenError::ExternalTool {
                    tool: "key generation".to_string(),
                    message: e.to_string(),
                })?;

                let private = key.to_openssh(ssh_key::LineEnding::LF).map_err(|e| {
                    MoxenError::ExternalTool {
                        tool: "key generation".to_string(),
                        message: e.to_string(),
                    }
                })?;
                fs::write(&key_path, private.as_bytes()).map_err(|source| MoxenError::Io {
                    context: format!("writing {}", key_path.display()),
                    source,
                })?;

                let public = key.public_key().to_openssh().map_err(|e| {
                    MoxenError::ExternalTool {
                        tool: "key generation".to_string(),
                        message: e.to_string(),
                    }
                })?;
                let pub_path = ssh_dir.join(format!("{user}.pub"));
                fs::write(&pub_path, format!("{public}\n")).map_err(|source| {
                    MoxenError::Io {
                        context: format!("writing {}", pub_path.display()),
                        source,
                    }
                })?;
            }
        }

        fs::set_permissions(&key_path, fs::Permissions::from_mode(0o600)).map_err(|source| {
            MoxenError::Io {
                context: format!("restricting permissions on {}", key_path.display()),
                source,
            }
        })?;

        tracing::info!(name, user, "ssh key installed");
        Ok(())
    }

    pub fn remove_ssh_key(&self, name: &str, user: &str) -> Result<(), MoxenError> {
        self.load(name)?;

        let key_path = self.layout.ssh_dir(name).join(user);
        if !key_path.exists() {
            return Err(MoxenError::NotFound {
                kind: "ssh key",
                name: user.to_string(),
            });
        }
        fs::remove_file(&key_path).map_err(|source| MoxenError::Io {
            context: format!("removing {}", key_path.display()),
            source,
        })?;

        let pub_path = self.layout.ssh_dir(name).join(format!("{user}.pub"));
        if pub_path.exists() {
            let _ = fs::remove_file(&pub_path);
        }
        Ok(())
    }

    // ── config ──────────────────────────────────────────────────────

    /// Edit the config document through the scoped-edit routine; `edit`
    /// is the editor invocation (injected so tests need no TTY).
    pub fn edit_config(
        &self,
        name: &str,
        edit: impl FnOnce(&Path) -> Result<(), MoxenError>,
    ) -> Result<(), MoxenError> {
        let template = self.load(name)?;
        editor::edit_yaml_scoped(&template.config_path, edit)
    }

    /// Sorted names of every template in the catalog.
    pub fn list(&self) -> Result<Vec<String>, MoxenError> {
        list_dir_names(&self.layout.templates_dir())
    }
}

/// Sorted directory names under `dir`; an absent `dir` is an empty catalog.
pub(crate) fn list_dir_names(dir: &Path) -> Result<Vec<String>, MoxenError> {
    if !dir.exists() {
        return Ok(Vec::new());
    }
    let entries = fs::read_dir(dir).map_err(|source| MoxenError::Io {
        context: format!("reading {}", dir.display()),
        source,
    })?;
    let mut names: Vec<String> = entries
        .filter_map(|e| e.ok())
        .filter(|e| e.file_type().map(|t| t.is_dir()).unwrap_or(false))
        .filter_map(|e| e.file_name().to_str().map(String::from))
        .collect();
    names.sort();
    Ok(names)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::hypervisor::testing::RecordingHypervisor;

    fn store(dir: &Path) -> TemplateStore {
        TemplateStore::new(Layout::new(dir))
    }

    fn import_request(dir: &Path, name: &str) -> CreateTemplate {
        let source_disk = dir.join("golden.qcow2");
        fs::write(&source_disk, b"golden image bytes").unwrap();
        CreateTemplate {
            name: name.to_string(),
            disk_size_gb: 64,
            cpus: 4,
            memory_mb: 8192,
            os_variant: None,
            iso: None,
            existing_disk: Some(source_disk),
        }
    }

    #[test]
    fn create_then_load_roundtrip() {
        let dir = tempfile::tempdir().unwrap();
        let store = store(dir.path());
        let hv = RecordingHypervisor::new();

        store.create(&hv, &import_request(dir.path(), "web")).unwrap();
        let template = store.load("web").unwrap();

        assert!(template.disk.exists());
        assert!(template.config_path.exists());
        assert_eq!(template.config.ssh_port, 22);
        assert_eq!(template.config.cpus, Some(4));
        assert_eq!(template.config.memory_mb, Some(8192));
        assert_eq!(template.config.disk_size_gb, Some(64));
        assert_eq!(fs::read(&template.disk).unwrap(), b"golden image bytes");
        assert_eq!(hv.recorded(), ["import_image web"]);
    }

    #[test]
    fn create_from_iso_allocates_then_installs() {
        let dir = tempfile::tempdir().unwrap();
        let store = store(dir.path());
        let hv = RecordingHypervisor::new();

        let iso = dir.path().join("install.iso");
        fs::write(&iso, b"iso").unwrap();
        let req = CreateTemplate {
            name: "web".to_string(),
            disk_size_gb: 32,
            cpus: 2,
            memory_mb: 2048,
            os_variant: Some("debian12".to_string()),
            iso: Some(iso.clone()),
            existing_disk: None,
        };
        store.create(&hv, &req).unwrap();

        let disk = Layout::new(dir.path()).template_disk("web");
        assert_eq!(
            hv.recorded(),
            [
                format!("allocate_disk {} 32", disk.display()),
                format!("install_from_iso web {}", iso.display()),
            ]
        );
        assert_eq!(store.load("web").unwrap().config.os_variant.as_deref(), Some("debian12"));
    }

    #[test]
    fn second_create_fails_and_leaves_first_untouched() {
        let dir = tempfile::tempdir().unwrap();
        let store = store(dir.path());
        let hv = RecordingHypervisor::new();
        let req = import_request(dir.path(), "web");

        store.create(&hv, &req).unwrap();
        let config_before =
            fs::read_to_string(Layout::new(dir.path()).template_config("web")).unwrap();

        let err = store.create(&hv, &req).unwrap_err();
        assert!(matches!(err, MoxenError::AlreadyExists { .. }));
        assert_eq!(
            fs::read_to_string(Layout::new(dir.path()).template_config("web")).unwrap(),
            config_before
        );
    }

    #[test]
    fn create_without_a_disk_source_is_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let store = store(dir.path());
        let req = CreateTemplate {
            name: "web".to_string(),
            disk_size_gb: 64,
            cpus: 4,
            memory_mb: 8192,
            os_variant: None,
            iso: None,
            existing_disk: None,
        };
        let err = store.create(&RecordingHypervisor::new(), &req).unwrap_err();
        assert!(matches!(err, MoxenError::InvalidArgument { .. }));
        assert!(!Layout::new(dir.path()).template_dir("web").exists());
    }

    #[test]
    fn create_with_both_disk_sources_is_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let store = store(dir.path());
        let mut req = import_request(dir.path(), "web");
        let iso = dir.path().join("install.iso");
        fs::write(&iso, b"iso").unwrap();
        req.iso = Some(iso);

        let err = store.create(&RecordingHypervisor::new(), &req).unwrap_err();
        assert!(matches!(err, MoxenError::InvalidArgument { .. }));
    }

    #[test]
    fn create_with_missing_source_path_is_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let store = store(dir.path());
        let mut req = import_request(dir.path(), "web");
        req.existing_disk = Some(dir.path().join("no-such.qcow2"));

        let err = store.create(&RecordingHypervisor::new(), &req).unwrap_err();
        assert!(matches!(err, MoxenError::InvalidArgument { .. }));
        assert!(!Layout::new(dir.path()).template_dir("web").exists());
    }

    #[test]
    fn provisioning_failure_rolls_back_the_directory() {
        let dir = tempfile::tempdir().unwrap();
        let store = store(dir.path());
        let hv = RecordingHypervisor {
            fail_provisioning: true,
            ..Default::default()
        };

        let err = store.create(&hv, &import_request(dir.path(), "web")).unwrap_err();
        assert!(matches!(err, MoxenError::Libvirt { .. }));
        assert!(!Layout::new(dir.path()).template_dir("web").exists());
    }

    #[test]
    fn load_missing_template_is_not_found() {
        let dir = tempfile::tempdir().unwrap();
        let err = store(dir.path()).load("ghost").unwrap_err();
        assert!(matches!(err, MoxenError::NotFound { .. }));
    }

    #[test]
    fn load_without_disk_is_corrupted() {
        let dir = tempfile::tempdir().unwrap();
        let layout = Layout::new(dir.path());
        fs::create_dir_all(layout.template_dir("web")).unwrap();
        fs::write(layout.template_config("web"), "ssh_port: 22\n").unwrap();

        let err = store(dir.path()).load("web").unwrap_err();
        assert!(matches!(err, MoxenError::Corrupted { .. }));
    }

    #[test]
    fn load_without_config_is_corrupted() {
        let dir = tempfile::tempdir().unwrap();
        let layout = Layout::new(dir.path());
        fs::create_dir_all(layout.template_dir("web")).unwrap();
        fs::write(layout.template_disk("web"), b"disk").unwrap();

        let err = store(dir.path()).load("web").unwrap_err();
        assert!(matches!(err, MoxenError::Corrupted { .. }));
    }

    #[test]
    fn load_with_unparseable_config_is_invalid_config() {
        let dir = tempfile::tempdir().unwrap();
        let layout = Layout::new(dir.path());
        fs::create_dir_all(layout.template_dir("web")).unwrap();
        fs::write(layout.template_disk("web"), b"disk").unwrap();
        fs::write(layout.template_config("web"), "ssh_port: [nope\n").unwrap();

        let err = store(dir.path()).load("web").unwrap_err();
        assert!(matches!(err, MoxenError::InvalidConfig { .. }));
    }

    #[test]
    fn extension_fields_survive_the_config_roundtrip() {
        let dir = tempfile::tempdir().unwrap();
        let store = store(dir.path());
        store
            .create(&RecordingHypervisor::new(), &import_request(dir.path(), "web"))
            .unwrap();

        let layout = Layout::new(dir.path());
        fs::write(
            layout.template_config("web"),
            "ssh_port: 2222\nrole: frontend\ntags: [a, b]\n",
        )
        .unwrap();

        let template = store.load("web").unwrap();
        assert_eq!(template.config.ssh_port, 2222);
        assert_eq!(
            template.config.extra.get("role"),
            Some(&serde_yaml::Value::String("frontend".to_string()))
        );
        assert!(template.config.extra.contains_key("tags"));
    }

    #[test]
    fn assets_are_added_listed_and_removed() {
        let dir = tempfile::tempdir().unwrap();
        let store = store(dir.path());
        store
            .create(&RecordingHypervisor::new(), &import_request(dir.path(), "web"))
            .unwrap();

        let script = dir.path().join("setup.sh");
        fs::write(&script, b"#!/bin/sh\n").unwrap();
        let notes = dir.path().join("notes.txt");
        fs::write(&notes, b"hi").unwrap();

        store
            .add_asset("web", &script, AssetOwner::Root, AssetKind::Executable)
            .unwrap();
        store
            .add_asset("web", &notes, AssetOwner::Root, AssetKind::Executable)
            .unwrap();

        assert_eq!(
            store
                .list_assets("web", AssetOwner::Root, AssetKind::Executable)
                .unwrap(),
            ["notes.txt", "setup.sh"]
        );
        assert!(store
            .list_assets("web", AssetOwner::User, AssetKind::File)
            .unwrap()
            .is_empty());

        store
            .remove_asset("web", "setup.sh", AssetOwner::Root, AssetKind::Executable)
            .unwrap();
        assert_eq!(
            store
                .list_assets("web", AssetOwner::Root, AssetKind::Executable)
                .unwrap(),
            ["notes.txt"]
        );
    }

    #[test]
    fn duplicate_asset_name_overwrites() {
        let dir = tempfile::tempdir().unwrap();
        let store = store(dir.path());
        store
            .create(&RecordingHypervisor::new(), &import_request(dir.path(), "web"))
            .unwrap();

        let first = dir.path().join("motd");
        fs::write(&first, b"old").unwrap();
        store
            .add_asset("web", &first, AssetOwner::User, AssetKind::File)
            .unwrap();
        fs::write(&first, b"new").unwrap();
        store
            .add_asset("web", &first, AssetOwner::User, AssetKind::File)
            .unwrap();

        let bucket = Layout::new(dir.path()).asset_bucket("web", AssetOwner::User, AssetKind::File);
        assert_eq!(fs::read(bucket.join("motd")).unwrap(), b"new");
    }

    #[test]
    fn add_asset_with_missing_source_is_not_found() {
        let dir = tempfile::tempdir().unwrap();
        let store = store(dir.path());
        store
            .create(&RecordingHypervisor::new(), &import_request(dir.path(), "web"))
            .unwrap();

        let err = store
            .add_asset(
                "web",
                &dir.path().join("nope.sh"),
                AssetOwner::User,
                AssetKind::Executable,
            )
            .unwrap_err();
        assert!(matches!(err, MoxenError::NotFound { .. }));
    }

    #[test]
    fn remove_missing_asset_is_not_found() {
        let dir = tempfile::tempdir().unwrap();
        let store = store(dir.path());
        store
            .create(&RecordingHypervisor::new(), &import_request(dir.path(), "web"))
            .unwrap();

        let err = store
            .remove_asset("web", "ghost.sh", AssetOwner::User, AssetKind::Executable)
            .unwrap_err();
        assert!(matches!(err, MoxenError::NotFound { .. }));
    }

    #[test]
    fn listing_a_vanished_bucket_is_corrupted() {
        let dir = tempfile::tempdir().unwrap();
        let store = store(dir.path());
        store
            .create(&RecordingHypervisor::new(), &import_request(dir.path(), "web"))
            .unwrap();

        let bucket =
            Layout::new(dir.path()).asset_bucket("web", AssetOwner::User, AssetKind::File);
        fs::remove_dir_all(&bucket).unwrap();

        let err = store
            .list_assets("web", AssetOwner::User, AssetKind::File)
            .unwrap_err();
        assert!(matches!(err, MoxenError::Corrupted { .. }));
    }

    #[test]
    fn delete_missing_template_is_not_found() {
        let dir = tempfile::tempdir().unwrap();
        let err = store(dir.path()).delete("ghost", false).unwrap_err();
        assert!(matches!(err, MoxenError::NotFound { .. }));
    }

    #[test]
    fn delete_blocked_by_references_until_forced() {
        let dir = tempfile::tempdir().unwrap();
        let layout = Layout::new(dir.path());
        let store = store(dir.path());
        store
            .create(&RecordingHypervisor::new(), &import_request(dir.path(), "web"))
            .unwrap();
        for group in ["edge", "core"] {
            fs::create_dir_all(layout.group_member_dir(group, "web")).unwrap();
        }

        let err = store.delete("web", false).unwrap_err();
        match err {
            MoxenError::Referenced { groups, .. } => {
                assert_eq!(groups, ["core", "edge"]);
            }
            other => panic!("expected Referenced, got {other:?}"),
        }
        assert!(layout.template_dir("web").exists());

        let removed_from = store.delete("web", true).unwrap();
        assert_eq!(removed_from, ["core", "edge"]);
        assert!(!layout.template_dir("web").exists());
        assert!(!layout.group_member_dir("core", "web").exists());
        assert!(!layout.group_member_dir("edge", "web").exists());
    }

    #[test]
    fn edit_config_applies_valid_yaml() {
        let dir = tempfile::tempdir().unwrap();
        let store = store(dir.path());
        store
            .create(&RecordingHypervisor::new(), &import_request(dir.path(), "web"))
            .unwrap();

        store
            .edit_config("web", |tmp| {
                fs::write(tmp, "ssh_port: 2200\n").unwrap();
                Ok(())
            })
            .unwrap();
        assert_eq!(store.load("web").unwrap().config.ssh_port, 2200);
    }

    #[test]
    fn edit_config_discards_invalid_yaml() {
        let dir = tempfile::tempdir().unwrap();
        let store = store(dir.path());
        store
            .create(&RecordingHypervisor::new(), &import_request(dir.path(), "web"))
            .unwrap();
        let before =
            fs::read_to_string(Layout::new(dir.path()).template_config("web")).unwrap();

        let err = store
            .edit_config("web", |tmp| {
                fs::write(tmp, "ssh_port: [broken\n").unwrap();
                Ok(())
            })
            .unwrap_err();
        assert!(matches!(err, MoxenError::InvalidConfig { .. }));
        assert_eq!(
            fs::read_to_string(Layout::new(dir.path()).template_config("web")).unwrap(),
            before
        );
    }

    #[test]
    fn ssh_key_copy_restricts_permissions() {
        let dir = tempfile::tempdir().unwrap();
        let store = store(dir.path());
        store
            .create(&RecordingHypervisor::new(), &import_request(dir.path(), "web"))
            .unwrap();

        let key = dir.path().join("id_ed25519");
        fs::write(&key, b"PRIVATE KEY BYTES").unwrap();
        store
            .add_ssh_key("web", "deploy", &KeySource::Copy(key))
            .unwrap();

        let installed = Layout::new(dir.path()).ssh_dir("web").join("deploy");
        let mode = fs::metadata(&installed).unwrap().permissions().mode();
        assert_eq!(mode & 0o777, 0o600);
    }

    #[test]
    fn ssh_key_generation_writes_a_keypair() {
        let dir = tempfile::tempdir().unwrap();
        let store = store(dir.path());
        store
            .create(&RecordingHypervisor::new(), &import_request(dir.path(), "web"))
            .unwrap();

        store
            .add_ssh_key("web", "deploy", &KeySource::Generate)
            .unwrap();

        let ssh_dir = Layout::new(dir.path()).ssh_dir("web");
        let private = fs::read_to_string(ssh_dir.join("deploy")).unwrap();
        let public = fs::read_to_string(ssh_dir.join("deploy.pub")).unwrap();
        assert!(private.contains("OPENSSH PRIVATE KEY"));
        assert!(public.starts_with("ssh-ed25519 "));
        let mode = fs::metadata(ssh_dir.join("deploy")).unwrap().permissions().mode();
        assert_eq!(mode & 0o777, 0o600);

        store.remove_ssh_key("web", "deploy").unwrap();
        assert!(!ssh_dir.join("deploy").exists());
        assert!(!ssh_dir.join("deploy.pub").exists());
    }

    #[test]
    fn remove_missing_ssh_key_is_not_found() {
        let dir = tempfile::tempdir().unwrap();
        let store = store(dir.path());
        store
            .create(&RecordingHypervisor::new(), &import_request(dir.path(), "web"))
            .unwrap();

        let err = store.remove_ssh_key("web", "ghost").unwrap_err();
        assert!(matches!(err, MoxenError::NotFound { .. }));
    }
}
