//! The instance materializer: ephemeral running copies of groups.
//!
//! An instance is a uniquely named materialization of a group tree plus an
//! `instance.yaml` manifest recording which libvirt domain belongs to each
//! member template. The manifest is written before any VM starts, so even
//! a partially started instance is fully described on disk. Instances are
//! frozen copies: later changes to the source group never affect them.

use std::collections::{BTreeMap, HashSet};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::{SystemTime, UNIX_EPOCH};

use serde::{Deserialize, Serialize};

use crate::domain_xml::DomainSpec;
use crate::error::MoxenError;
use crate::hypervisor::Hypervisor;
use crate::lock::ResourceLock;
use crate::materialize::materialize_tree;
use crate::paths::{self, Layout, is_disk_image};
use crate::template::{TemplateConfig, list_dir_names};

pub const MANIFEST_FILE: &str = "instance.yaml";

/// Domain ids are disambiguated per template name by a linear scan over
/// this range; running out means the namespace is exhausted.
const MAX_DOMAIN_ID: u32 = 1000;

/// Persisted description of a materialized instance.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InstanceManifest {
    pub group: String,
    pub created: u64,
    /// Member template name → allocated libvirt domain name.
    pub vms: BTreeMap<String, String>,
}

/// Fallback sizing for members whose config does not pin values.
#[derive(Debug, Clone, Copy)]
pub struct LaunchDefaults {
    pub cpus: u32,
    pub memory_mb: u64,
}

/// Result of a fully successful instantiation.
#[derive(Debug)]
pub struct Instantiation {
    pub name: String,
    pub vms: BTreeMap<String, String>,
}

pub struct InstanceStore {
    layout: Layout,
}

impl InstanceStore {
    pub fn new(layout: Layout) -> Self {
        Self { layout }
    }

    /// Materialize `group` into a fresh instance and start every member VM.
    ///
    /// Partial start failures are reported, not rolled back: stopping a
    /// half-booted system is itself fallible, so the instance tree and
    /// manifest are kept and the error lists who started and who did not.
    pub fn instantiate(
        &self,
        hv: &dyn Hypervisor,
        group: &str,
        defaults: LaunchDefaults,
    ) -> Result<Instantiation, MoxenError> {
        let group_dir = self.layout.group_dir(group);
        if !group_dir.exists() {
            return Err(MoxenError::NotFound {
                kind: "group",
                name: group.to_string(),
            });
        }

        let name = self.unique_instance_name(group);
        let dir = self.layout.instance_dir(&name);
        let _lock = ResourceLock::acquire(&self.layout, &format!("instance-{name}"))?;

        materialize_tree(&group_dir, &dir, &is_disk_image)?;

        let members = list_dir_names(&dir.join("vm_templates"))?;
        let mut taken = self.taken_domain_names()?;
        let mut vms = BTreeMap::new();
        for member in &members {
            let domain = match allocate_domain_name(member, &taken) {
                Ok(domain) => domain,
                Err(e) => {
                    // Nothing has started yet; a rolled-back tree beats a
                    // stray instance with no manifest.
                    let _ = fs::remove_dir_all(&dir);
                    return Err(e);
                }
            };
            taken.insert(domain.clone());
            vms.insert(member.clone(), domain);
        }

        let manifest = InstanceManifest {
            group: group.to_string(),
            created: now_secs(),
            vms,
        };
        write_manifest(&dir.join(MANIFEST_FILE), &manifest)?;

        let mut started = Vec::new();
        let mut failed = Vec::new();
        for (member, domain) in &manifest.vms {
            match self.start_member(hv, &dir, member, domain, defaults) {
                Ok(()) => started.push(member.clone()),
                Err(e) => failed.push(format!("{member} ({e})")),
            }
        }

        if failed.is_empty() {
            tracing::info!(instance = %name, group, "instance started");
            Ok(Instantiation {
                name,
                vms: manifest.vms,
            })
        } else {
            Err(MoxenError::PartialStart {
                name,
                started,
                failed,
            })
        }
    }

    fn start_member(
        &self,
        hv: &dyn Hypervisor,
        instance_dir: &Path,
        member: &str,
        domain: &str,
        defaults: LaunchDefaults,
    ) -> Result<(), MoxenError> {
        let member_dir = instance_dir.join("vm_templates").join(member);
        let config = read_member_config(&member_dir, member)?;
        let disk = member_dir.join(format!("{member}.{}", paths::DISK_EXTENSION));

        let spec = DomainSpec {
            name: domain,
            cpus: config.cpus.unwrap_or(defaults.cpus),
            memory_mb: config.memory_mb.unwrap_or(defaults.memory_mb),
            disk: &disk,
        };
        hv.start(&spec)
    }

    /// Stop one member or the whole instance.
    pub fn stop(
        &self,
        hv: &dyn Hypervisor,
        name: &str,
        vm: Option<&str>,
    ) -> Result<(), MoxenError> {
        let (dir, _) = self.resolve(name)?;
        let manifest = self.manifest(&dir, name)?;
        for (member, domain) in targets(&manifest, vm)? {
            hv.stop(&domain)?;
            tracing::info!(instance = name, member = %member, domain = %domain, "vm stopped");
        }
        Ok(())
    }

    /// Suspend one member, or the whole instance, in which case the tree
    /// is parked under `suspended/` so listings reflect its state.
    pub fn suspend(
        &self,
        hv: &dyn Hypervisor,
        name: &str,
        vm: Option<&str>,
    ) -> Result<(), MoxenError> {
        let (dir, parked) = self.resolve(name)?;
        let manifest = self.manifest(&dir, name)?;
        for (member, domain) in targets(&manifest, vm)? {
            hv.suspend(&domain)?;
            tracing::info!(instance = name, member = %member, domain = %domain, "vm suspended");
        }

        if vm.is_none() && !parked {
            let suspended_root = self.layout.suspended_dir();
            fs::create_dir_all(&suspended_root).map_err(|source| MoxenError::Io {
                context: format!("creating {}", suspended_root.display()),
                source,
            })?;
            let dest = self.layout.suspended_instance_dir(name);
            fs::rename(&dir, &dest).map_err(|source| MoxenError::Io {
                context: format!("moving {} to {}", dir.display(), dest.display()),
                source,
            })?;
        }
        Ok(())
    }

    /// Resume one member, or the whole instance, moving a parked tree
    /// back under `instances/`.
    pub fn resume(
        &self,
        hv: &dyn Hypervisor,
        name: &str,
        vm: Option<&str>,
    ) -> Result<(), MoxenError> {
        let (dir, parked) = self.resolve(name)?;
        let manifest = self.manifest(&dir, name)?;
        for (member, domain) in targets(&manifest, vm)? {
            hv.resume(&domain)?;
            tracing::info!(instance = name, member = %member, domain = %domain, "vm resumed");
        }

        if vm.is_none() && parked {
            let instances_root = self.layout.instances_dir();
            fs::create_dir_all(&instances_root).map_err(|source| MoxenError::Io {
                context: format!("creating {}", instances_root.display()),
                source,
            })?;
            let dest = self.layout.instance_dir(name);
            fs::rename(&dir, &dest).map_err(|source| MoxenError::Io {
                context: format!("moving {} to {}", dir.display(), dest.display()),
                source,
            })?;
        }
        Ok(())
    }

    /// Snapshot one member or every member under `label`.
    pub fn snapshot(
        &self,
        hv: &dyn Hypervisor,
        name: &str,
        label: &str,
        vm: Option<&str>,
    ) -> Result<(), MoxenError> {
        paths::validate_name("snapshot label", label)?;
        let (dir, _) = self.resolve(name)?;
        let manifest = self.manifest(&dir, name)?;
        for (member, domain) in targets(&manifest, vm)? {
            hv.snapshot(&domain, label)?;
            tracing::info!(instance = name, member = %member, domain = %domain, label, "snapshot taken");
        }
        Ok(())
    }

    /// Stop everything (best effort) and remove the instance tree,
    /// freeing its domain names.
    pub fn teardown(&self, hv: &dyn Hypervisor, name: &str) -> Result<(), MoxenError> {
        let (dir, _) = self.resolve(name)?;
        let _lock = ResourceLock::acquire(&self.layout, &format!("instance-{name}"))?;

        match self.manifest(&dir, name) {
            Ok(manifest) => {
                for (member, domain) in &manifest.vms {
                    if let Err(e) = hv.stop(domain) {
                        tracing::warn!(instance = name, member = %member, domain = %domain, error = %e, "stop failed during teardown");
                    }
                }
            }
            Err(e) => {
                tracing::warn!(instance = name, error = %e, "no readable manifest, removing tree anyway");
            }
        }

        fs::remove_dir_all(&dir).map_err(|source| MoxenError::Io {
            context: format!("removing {}", dir.display()),
            source,
        })?;
        tracing::info!(instance = name, "instance torn down");
        Ok(())
    }

    /// Open an interactive SSH session to one member VM.
    pub fn ssh(
        &self,
        hv: &dyn Hypervisor,
        name: &str,
        vm: &str,
        user: &str,
    ) -> Result<(), MoxenError> {
        let (dir, _) = self.resolve(name)?;
        let manifest = self.manifest(&dir, name)?;
        let domain = manifest.vms.get(vm).ok_or_else(|| MoxenError::NotFound {
            kind: "instance vm",
            name: vm.to_string(),
        })?;

        let config = read_member_config(&dir.join("vm_templates").join(vm), vm)?;
        let ips = hv.guest_ips(domain)?;
        let ip = ips.first().ok_or_else(|| MoxenError::Libvirt {
            message: format!("no address known for '{domain}'"),
            hint: "the VM may still be booting, or has no DHCP lease yet".to_string(),
        })?;

        let status = std::process::Command::new("ssh")
            .arg("-p")
            .arg(config.ssh_port.to_string())
            .arg(format!("{user}@{ip}"))
            .status()
            .map_err(|source| MoxenError::Io {
                context: "running ssh".to_string(),
                source,
            })?;
        if !status.success() {
            return Err(MoxenError::ExternalTool {
                tool: "ssh".to_string(),
                message: format!("exited with {status}"),
            });
        }
        Ok(())
    }

    /// Instances under one root, each with its manifest when readable.
    pub fn list(&self, suspended: bool) -> Result<Vec<(String, Option<InstanceManifest>)>, MoxenError> {
        let root = if suspended {
            self.layout.suspended_dir()
        } else {
            self.layout.instances_dir()
        };
        let mut out = Vec::new();
        for name in list_dir_names(&root)? {
            let manifest = read_manifest(&root.join(&name).join(MANIFEST_FILE)).ok();
            out.push((name, manifest));
        }
        Ok(out)
    }

    // ── internals ───────────────────────────────────────────────────

    fn resolve(&self, name: &str) -> Result<(PathBuf, bool), MoxenError> {
        let active = self.layout.instance_dir(name);
        if active.exists() {
            return Ok((active, false));
        }
        let parked = self.layout.suspended_instance_dir(name);
        if parked.exists() {
            return Ok((parked, true));
        }
        Err(MoxenError::NotFound {
            kind: "instance",
            name: name.to_string(),
        })
    }

    fn manifest(&self, dir: &Path, name: &str) -> Result<InstanceManifest, MoxenError> {
        let path = dir.join(MANIFEST_FILE);
        if !path.exists() {
            return Err(MoxenError::Corrupted {
                kind: "instance",
                name: name.to_string(),
                missing: MANIFEST_FILE.to_string(),
            });
        }
        read_manifest(&path)
    }

    /// `<group>-<timestamp>`, with `-1`, `-2`… appended until the name is
    /// free in both instance roots.
    fn unique_instance_name(&self, group: &str) -> String {
        let ts = now_secs();
        let mut name = format!("{group}-{ts}");
        let mut n = 0u32;
        while self.layout.instance_dir(&name).exists()
            || self.layout.suspended_instance_dir(&name).exists()
        {
            n += 1;
            name = format!("{group}-{ts}-{n}");
        }
        name
    }

    /// Domain names currently owned by any live instance, running or
    /// suspended. Unreadable manifests are skipped (and logged) rather
    /// than blocking new instances.
    fn taken_domain_names(&self) -> Result<HashSet<String>, MoxenError> {
        let mut taken = HashSet::new();
        for root in [self.layout.instances_dir(), self.layout.suspended_dir()] {
            for name in list_dir_names(&root)? {
                let path = root.join(&name).join(MANIFEST_FILE);
                if !path.exists() {
                    continue;
                }
                match read_manifest(&path) {
                    Ok(manifest) => taken.extend(manifest.vms.into_values()),
                    Err(e) => {
                        tracing::warn!(instance = %name, error = %e, "skipping unreadable manifest");
                    }
                }
            }
        }
        Ok(taken)
    }
}

fn targets(
    manifest: &InstanceManifest,
    vm: Option<&str>,
) -> Result<Vec<(String, String)>, MoxenError> {
    match vm {
        None => Ok(manifest
            .vms
            .iter()
            .map(|(m, d)| (m.clone(), d.clone()))
            .collect()),
        Some(member) => {
            let domain = manifest.vms.get(member).ok_or_else(|| MoxenError::NotFound {
                kind: "instance vm",
                name: member.to_string(),
            })?;
            Ok(vec![(member.to_string(), domain.clone())])
        }
    }
}

fn allocate_domain_name(template: &str, taken: &HashSet<String>) -> Result<String, MoxenError> {
    for id in 0..MAX_DOMAIN_ID {
        let candidate = format!("{template}_{id}");
        if !taken.contains(&candidate) {
            return Ok(candidate);
        }
    }
    Err(MoxenError::ExhaustedNamespace {
        name: template.to_string(),
    })
}

fn read_member_config(member_dir: &Path, member: &str) -> Result<TemplateConfig, MoxenError> {
    let path = member_dir.join(format!("{member}_config.yaml"));
    let contents = fs::read_to_string(&path).map_err(|source| MoxenError::Io {
        context: format!("reading {}", path.display()),
        source,
    })?;
    serde_yaml::from_str(&contents).map_err(|e| MoxenError::InvalidConfig {
        path: path.display().to_string(),
        message: e.to_string(),
    })
}

fn read_manifest(path: &Path) -> Result<InstanceManifest, MoxenError> {
    let contents = fs::read_to_string(path).map_err(|source| MoxenError::Io {
        context: format!("reading {}", path.display()),
        source,
    })?;
    serde_yaml::from_str(&contents).map_err(|e| MoxenError::InvalidConfig {
        path: path.display().to_string(),
        message: e.to_string(),
    })
}

fn write_manifest(path: &Path, manifest: &InstanceManifest) -> Result<(), MoxenError> {
    let contents = serde_yaml::to_string(manifest).map_err(|e| MoxenError::InvalidConfig {
        path: path.display().to_string(),
        message: e.to_string(),
    })?;
    fs::write(path, contents).map_err(|source| MoxenError::Io {
        context: format!("writing {}", path.display()),
        source,
    })
}

fn now_secs() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs())
        .unwrap_or(0)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::group::GroupStore;
    use crate::hypervisor::testing::RecordingHypervisor;
    use crate::template::{CreateTemplate, TemplateStore};

    const DEFAULTS: LaunchDefaults = LaunchDefaults {
        cpus: 4,
        memory_mb: 8192,
    };

    fn catalog(dir: &Path, templates: &[&str]) -> (GroupStore, InstanceStore) {
        let layout = Layout::new(dir);
        let template_store = TemplateStore::new(layout.clone());
        let groups = GroupStore::new(layout.clone());
        groups.create("lab").unwrap();

        for name in templates {
            let source_disk = dir.join(format!("{name}-golden.qcow2"));
            fs::write(&source_disk, format!("{name} bytes")).unwrap();
            template_store
                .create(
                    &RecordingHypervisor::new(),
                    &CreateTemplate {
                        name: name.to_string(),
                        disk_size_gb: 16,
                        cpus: 2,
                        memory_mb: 2048,
                        os_variant: None,
                        iso: None,
                        existing_disk: Some(source_disk),
                    },
                )
                .unwrap();
            groups.add_member(&template_store, "lab", name).unwrap();
        }

        (groups, InstanceStore::new(layout))
    }

    #[test]
    fn two_members_both_get_id_zero() {
        let dir = tempfile::tempdir().unwrap();
        let (_, instances) = catalog(dir.path(), &["db", "web"]);
        let hv = RecordingHypervisor::new();

        let result = instances.instantiate(&hv, "lab", DEFAULTS).unwrap();

        assert_eq!(result.vms["db"], "db_0");
        assert_eq!(result.vms["web"], "web_0");
        assert!(result.name.starts_with("lab-"));

        let calls = hv.recorded();
        assert!(calls.contains(&"start db_0".to_string()));
        assert!(calls.contains(&"start web_0".to_string()));

        // The materialized tree mirrors the group: disks are links back to
        // the global template images.
        let layout = Layout::new(dir.path());
        let disk = layout
            .instance_dir(&result.name)
            .join("vm_templates/web/web.qcow2");
        assert!(disk.symlink_metadata().unwrap().file_type().is_symlink());
        assert_eq!(
            disk.canonicalize().unwrap(),
            layout.template_disk("web").canonicalize().unwrap()
        );
    }

    #[test]
    fn second_instantiation_takes_the_next_free_ids() {
        let dir = tempfile::tempdir().unwrap();
        let (_, instances) = catalog(dir.path(), &["web"]);
        let hv = RecordingHypervisor::new();

        let first = instances.instantiate(&hv, "lab", DEFAULTS).unwrap();
        let second = instances.instantiate(&hv, "lab", DEFAULTS).unwrap();

        assert_ne!(first.name, second.name);
        assert_eq!(first.vms["web"], "web_0");
        assert_eq!(second.vms["web"], "web_1");
    }

    #[test]
    fn teardown_frees_domain_names() {
        let dir = tempfile::tempdir().unwrap();
        let (_, instances) = catalog(dir.path(), &["web"]);
        let hv = RecordingHypervisor::new();

        let first = instances.instantiate(&hv, "lab", DEFAULTS).unwrap();
        instances.teardown(&hv, &first.name).unwrap();
        assert!(!Layout::new(dir.path()).instance_dir(&first.name).exists());
        assert!(hv.recorded().contains(&"stop web_0".to_string()));

        let second = instances.instantiate(&hv, "lab", DEFAULTS).unwrap();
        assert_eq!(second.vms["web"], "web_0");
    }

    #[test]
    fn partial_start_reports_both_lists_and_keeps_the_tree() {
        let dir = tempfile::tempdir().unwrap();
        let (_, instances) = catalog(dir.path(), &["db", "web"]);
        let mut hv = RecordingHypervisor::new();
        hv.fail_start.insert("db".to_string());

        let err = instances.instantiate(&hv, "lab", DEFAULTS).unwrap_err();
        match err {
            MoxenError::PartialStart {
                name,
                started,
                failed,
            } => {
                assert_eq!(started, ["web"]);
                assert_eq!(failed.len(), 1);
                assert!(failed[0].starts_with("db"));

                // Tree and manifest survive for inspection/teardown.
                let dir = Layout::new(dir.path()).instance_dir(&name);
                assert!(dir.join(MANIFEST_FILE).exists());
                assert!(dir.join("vm_templates/db").is_dir());
            }
            other => panic!("expected PartialStart, got {other:?}"),
        }
    }

    #[test]
    fn instantiate_unknown_group_is_not_found() {
        let dir = tempfile::tempdir().unwrap();
        let (_, instances) = catalog(dir.path(), &[]);
        let err = instances
            .instantiate(&RecordingHypervisor::new(), "ghost", DEFAULTS)
            .unwrap_err();
        assert!(matches!(err, MoxenError::NotFound { .. }));
    }

    #[test]
    fn exhausted_namespace_rolls_the_tree_back() {
        let dir = tempfile::tempdir().unwrap();
        let (_, instances) = catalog(dir.path(), &["web"]);
        let layout = Layout::new(dir.path());

        // A synthetic live instance already owning every web_<id> name.
        let hog = layout.instance_dir("hog");
        fs::create_dir_all(&hog).unwrap();
        let vms: BTreeMap<String, String> = (0..MAX_DOMAIN_ID)
            .map(|id| (format!("m{id}"), format!("web_{id}")))
            .collect();
        write_manifest(
            &hog.join(MANIFEST_FILE),
            &InstanceManifest {
                group: "other".to_string(),
                created: 0,
                vms,
            },
        )
        .unwrap();

        let err = instances
            .instantiate(&RecordingHypervisor::new(), "lab", DEFAULTS)
            .unwrap_err();
        assert!(matches!(err, MoxenError::ExhaustedNamespace { .. }));

        // Only the synthetic hog remains under instances/.
        assert_eq!(list_dir_names(&layout.instances_dir()).unwrap(), ["hog"]);
    }

    #[test]
    fn stop_targets_one_member_or_all() {
        let dir = tempfile::tempdir().unwrap();
        let (_, instances) = catalog(dir.path(), &["db", "web"]);
        let hv = RecordingHypervisor::new();
        let inst = instances.instantiate(&hv, "lab", DEFAULTS).unwrap();

        instances.stop(&hv, &inst.name, Some("db")).unwrap();
        assert!(hv.recorded().contains(&"stop db_0".to_string()));
        assert!(!hv.recorded().contains(&"stop web_0".to_string()));

        instances.stop(&hv, &inst.name, None).unwrap();
        assert!(hv.recorded().contains(&"stop web_0".to_string()));
    }

    #[test]
    fn stop_unknown_member_is_not_found() {
        let dir = tempfile::tempdir().unwrap();
        let (_, instances) = catalog(dir.path(), &["web"]);
        let hv = RecordingHypervisor::new();
        let inst = instances.instantiate(&hv, "lab", DEFAULTS).unwrap();

        let err = instances.stop(&hv, &inst.name, Some("ghost")).unwrap_err();
        assert!(matches!(err, MoxenError::NotFound { .. }));
    }

    #[test]
    fn stop_unknown_instance_is_not_found() {
        let dir = tempfile::tempdir().unwrap();
        let (_, instances) = catalog(dir.path(), &["web"]);
        let err = instances
            .stop(&RecordingHypervisor::new(), "lab-0", None)
            .unwrap_err();
        assert!(matches!(err, MoxenError::NotFound { .. }));
    }

    #[test]
    fn whole_instance_suspend_parks_the_tree() {
        let dir = tempfile::tempdir().unwrap();
        let (_, instances) = catalog(dir.path(), &["web"]);
        let hv = RecordingHypervisor::new();
        let layout = Layout::new(dir.path());
        let inst = instances.instantiate(&hv, "lab", DEFAULTS).unwrap();

        instances.suspend(&hv, &inst.name, None).unwrap();
        assert!(hv.recorded().contains(&"suspend web_0".to_string()));
        assert!(!layout.instance_dir(&inst.name).exists());
        assert!(layout.suspended_instance_dir(&inst.name).is_dir());

        // A parked instance still owns its domain names.
        let next = instances.instantiate(&hv, "lab", DEFAULTS).unwrap();
        assert_eq!(next.vms["web"], "web_1");

        instances.resume(&hv, &inst.name, None).unwrap();
        assert!(hv.recorded().contains(&"resume web_0".to_string()));
        assert!(layout.instance_dir(&inst.name).is_dir());
        assert!(!layout.suspended_instance_dir(&inst.name).exists());
    }

    #[test]
    fn single_member_suspend_leaves_the_tree_in_place() {
        let dir = tempfile::tempdir().unwrap();
        let (_, instances) = catalog(dir.path(), &["db", "web"]);
        let hv = RecordingHypervisor::new();
        let layout = Layout::new(dir.path());
        let inst = instances.instantiate(&hv, "lab", DEFAULTS).unwrap();

        instances.suspend(&hv, &inst.name, Some("db")).unwrap();
        assert!(hv.recorded().contains(&"suspend db_0".to_string()));
        assert!(layout.instance_dir(&inst.name).is_dir());
    }

    #[test]
    fn snapshot_reaches_every_member() {
        let dir = tempfile::tempdir().unwrap();
        let (_, instances) = catalog(dir.path(), &["db", "web"]);
        let hv = RecordingHypervisor::new();
        let inst = instances.instantiate(&hv, "lab", DEFAULTS).unwrap();

        instances
            .snapshot(&hv, &inst.name, "pre-upgrade", None)
            .unwrap();
        assert!(hv.recorded().contains(&"snapshot db_0 pre-upgrade".to_string()));
        assert!(hv.recorded().contains(&"snapshot web_0 pre-upgrade".to_string()));
    }

    #[test]
    fn instances_are_frozen_against_group_changes() {
        let dir = tempfile::tempdir().unwrap();
        let (groups, instances) = catalog(dir.path(), &["web"]);
        let hv = RecordingHypervisor::new();
        let layout = Layout::new(dir.path());
        let inst = instances.instantiate(&hv, "lab", DEFAULTS).unwrap();

        groups.delete("lab").unwrap();

        // The instance tree is untouched and its disk link still resolves
        // (it points at the template, not the group copy).
        let disk = layout
            .instance_dir(&inst.name)
            .join("vm_templates/web/web.qcow2");
        assert_eq!(fs::read(&disk).unwrap(), b"web bytes");
        instances.stop(&hv, &inst.name, None).unwrap();
    }

    #[test]
    fn listings_split_by_root() {
        let dir = tempfile::tempdir().unwrap();
        let (_, instances) = catalog(dir.path(), &["web"]);
        let hv = RecordingHypervisor::new();
        let inst = instances.instantiate(&hv, "lab", DEFAULTS).unwrap();

        let active = instances.list(false).unwrap();
        assert_eq!(active.len(), 1);
        assert_eq!(active[0].0, inst.name);
        assert_eq!(active[0].1.as_ref().unwrap().group, "lab");
        assert!(instances.list(true).unwrap().is_empty());

        instances.suspend(&hv, &inst.name, None).unwrap();
        assert!(instances.list(false).unwrap().is_empty());
        assert_eq!(instances.list(true).unwrap().len(), 1);
    }
}
