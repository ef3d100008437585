//! The hypervisor/provisioning collaborator boundary.
//!
//! Everything the catalog needs from the virtualization layer goes through
//! the [`Hypervisor`] trait: disk allocation, guided installs, image
//! imports, and domain lifecycle. The catalog itself never decides *how* a
//! VM runs; it only hands over names, disk paths, and sizing. All calls
//! are synchronous and blocking; a failing collaborator surfaces its own
//! diagnostic text in the returned error.

use std::path::Path;
use std::process::Command;
use std::time::Duration;

use virt::connect::Connect;
use virt::domain::Domain;
use virt::domain_snapshot::DomainSnapshot;
use virt::error as virt_error;

use crate::domain_xml::{self, DomainSpec};
use crate::error::MoxenError;

/// A guided install from an ISO: the domain boots the installer and the
/// operator drives it through a graphical console.
pub struct InstallSpec<'a> {
    pub domain: DomainSpec<'a>,
    pub iso: &'a Path,
}

pub trait Hypervisor {
    /// Allocate a fresh, empty qcow2 image of `size_gb` gibibytes.
    fn allocate_disk(&self, path: &Path, size_gb: u32) -> Result<(), MoxenError>;

    /// Define a domain booting the install ISO, run it until the operator
    /// confirms the installer has finished, shut it down, and eject the
    /// media. The domain definition is kept.
    fn install_from_iso(&self, spec: &InstallSpec) -> Result<(), MoxenError>;

    /// Define a domain around an already-populated disk image.
    fn import_image(&self, spec: &DomainSpec) -> Result<(), MoxenError>;

    /// Launch an ephemeral domain for an instance member. The domain is
    /// transient: stopping it makes it disappear from the hypervisor.
    fn start(&self, spec: &DomainSpec) -> Result<(), MoxenError>;

    /// Gracefully stop a running domain, forcing it off if ACPI shutdown
    /// does not complete in time.
    fn stop(&self, name: &str) -> Result<(), MoxenError>;

    fn suspend(&self, name: &str) -> Result<(), MoxenError>;

    fn resume(&self, name: &str) -> Result<(), MoxenError>;

    fn snapshot(&self, name: &str, label: &str) -> Result<(), MoxenError>;

    fn attach_media(&self, name: &str, iso: &Path) -> Result<(), MoxenError>;

    fn detach_media(&self, name: &str) -> Result<(), MoxenError>;

    /// DHCP-lease addresses of a running domain, if any yet.
    fn guest_ips(&self, name: &str) -> Result<Vec<String>, MoxenError>;
}

// ── libvirt implementation ──────────────────────────────────────────

/// Closes the connection on drop; libvirt leaks connections otherwise.
struct ConnGuard(Connect);

impl std::ops::Deref for ConnGuard {
    type Target = Connect;
    fn deref(&self) -> &Connect {
        &self.0
    }
}

impl Drop for ConnGuard {
    fn drop(&mut self) {
        self.0.close().ok();
    }
}

pub struct LibvirtHypervisor {
    uri: String,
}

impl LibvirtHypervisor {
    pub fn new(uri: impl Into<String>) -> Self {
        Self { uri: uri.into() }
    }

    fn connect(&self) -> Result<ConnGuard, MoxenError> {
        // Suppress libvirt's default error handler that prints to stderr;
        // errors are surfaced through Result only.
        virt_error::clear_error_callback();

        Connect::open(Some(self.uri.as_str()))
            .map(ConnGuard)
            .map_err(|e| MoxenError::Libvirt {
                message: format!("failed to connect to libvirt: {e}"),
                hint: format!("ensure libvirtd is running and you have access to {}", self.uri),
            })
    }
}

fn lookup_domain(conn: &Connect, name: &str) -> Result<Domain, MoxenError> {
    Domain::lookup_by_name(conn, name).map_err(|e| MoxenError::Libvirt {
        message: format!("domain '{name}' lookup failed: {e}"),
        hint: "the VM may already be gone; check `virsh list --all`".to_string(),
    })
}

/// How long to wait for ACPI shutdown before forcing the domain off.
const SHUTDOWN_TIMEOUT_SECS: u64 = 30;

impl Hypervisor for LibvirtHypervisor {
    fn allocate_disk(&self, path: &Path, size_gb: u32) -> Result<(), MoxenError> {
        let output = Command::new("qemu-img")
            .arg("create")
            .args(["-f", "qcow2"])
            .arg(path)
            .arg(format!("{size_gb}G"))
            .output()
            .map_err(|source| MoxenError::Io {
                context: "running qemu-img".to_string(),
                source,
            })?;

        if !output.status.success() {
            return Err(MoxenError::ExternalTool {
                tool: "qemu-img".to_string(),
                message: String::from_utf8_lossy(&output.stderr).trim().to_string(),
            });
        }

        tracing::info!(path = %path.display(), size_gb, "allocated disk image");
        Ok(())
    }

    fn install_from_iso(&self, spec: &InstallSpec) -> Result<(), MoxenError> {
        let conn = self.connect()?;
        let xml = domain_xml::domain_xml(&spec.domain, Some(spec.iso));

        let dom = Domain::define_xml(&conn, &xml).map_err(|e| MoxenError::Libvirt {
            message: format!("failed to define domain '{}': {e}", spec.domain.name),
            hint: "check the generated domain XML for errors".to_string(),
        })?;

        dom.create().map_err(|e| MoxenError::Libvirt {
            message: format!("failed to boot installer for '{}': {e}", spec.domain.name),
            hint: "check `virsh start` for details".to_string(),
        })?;
        tracing::info!(name = spec.domain.name, iso = %spec.iso.display(), "installer booted");

        println!(
            "VM '{}' is booting from {}. Connect with a SPICE viewer to run the installer.",
            spec.domain.name,
            spec.iso.display()
        );
        let done = inquire::Confirm::new("Has the installer finished? The VM will be shut down.")
            .with_default(true)
            .prompt()
            .map_err(|e| MoxenError::ExternalTool {
                tool: "install prompt".to_string(),
                message: e.to_string(),
            })?;
        if !done {
            return Err(MoxenError::ExternalTool {
                tool: "guided install".to_string(),
                message: "aborted by operator".to_string(),
            });
        }

        shutdown_with_timeout(&dom, spec.domain.name)?;

        // Eject the install media from the persisted definition.
        dom.update_device_flags(
            &domain_xml::cdrom_xml(None),
            virt::sys::VIR_DOMAIN_AFFECT_CONFIG,
        )
        .map_err(|e| MoxenError::Libvirt {
            message: format!("failed to eject install media from '{}': {e}", spec.domain.name),
            hint: "eject it manually with `virsh change-media`".to_string(),
        })?;

        Ok(())
    }

    fn import_image(&self, spec: &DomainSpec) -> Result<(), MoxenError> {
        let conn = self.connect()?;
        let xml = domain_xml::domain_xml(spec, None);
        Domain::define_xml(&conn, &xml).map_err(|e| MoxenError::Libvirt {
            message: format!("failed to define domain '{}': {e}", spec.name),
            hint: "check the generated domain XML for errors".to_string(),
        })?;
        tracing::info!(name = spec.name, "domain defined from imported image");
        Ok(())
    }

    fn start(&self, spec: &DomainSpec) -> Result<(), MoxenError> {
        let conn = self.connect()?;
        let xml = domain_xml::domain_xml(spec, None);
        Domain::create_xml(&conn, &xml, 0).map_err(|e| MoxenError::Libvirt {
            message: format!("failed to start '{}': {e}", spec.name),
            hint: "check `virsh list --all` and the libvirt log".to_string(),
        })?;
        tracing::info!(name = spec.name, "domain started");
        Ok(())
    }

    fn stop(&self, name: &str) -> Result<(), MoxenError> {
        let conn = self.connect()?;
        let dom = lookup_domain(&conn, name)?;
        shutdown_with_timeout(&dom, name)
    }

    fn suspend(&self, name: &str) -> Result<(), MoxenError> {
        let conn = self.connect()?;
        let dom = lookup_domain(&conn, name)?;
        dom.suspend().map_err(|e| MoxenError::Libvirt {
            message: format!("failed to suspend '{name}': {e}"),
            hint: "the domain must be running to be suspended".to_string(),
        })?;
        tracing::info!(name, "domain suspended");
        Ok(())
    }

    fn resume(&self, name: &str) -> Result<(), MoxenError> {
        let conn = self.connect()?;
        let dom = lookup_domain(&conn, name)?;
        dom.resume().map_err(|e| MoxenError::Libvirt {
            message: format!("failed to resume '{name}': {e}"),
            hint: "the domain must be suspended to be resumed".to_string(),
        })?;
        tracing::info!(name, "domain resumed");
        Ok(())
    }

    fn snapshot(&self, name: &str, label: &str) -> Result<(), MoxenError> {
        let conn = self.connect()?;
        let dom = lookup_domain(&conn, name)?;
        let xml = format!("<domainsnapshot>\n  <name>{label}</name>\n</domainsnapshot>\n");
        DomainSnapshot::create_xml(&dom, &xml, 0).map_err(|e| MoxenError::Libvirt {
            message: format!("failed to snapshot '{name}' as '{label}': {e}"),
            hint: "snapshots require qcow2 storage and a defined domain".to_string(),
        })?;
        tracing::info!(name, label, "snapshot created");
        Ok(())
    }

    fn attach_media(&self, name: &str, iso: &Path) -> Result<(), MoxenError> {
        let conn = self.connect()?;
        let dom = lookup_domain(&conn, name)?;
        dom.attach_device_flags(&domain_xml::cdrom_xml(Some(iso)), affect_flags(&dom))
            .map_err(|e| MoxenError::Libvirt {
                message: format!("failed to attach {} to '{name}': {e}", iso.display()),
                hint: "check that the ISO path is readable by libvirt".to_string(),
            })?;
        Ok(())
    }

    fn detach_media(&self, name: &str) -> Result<(), MoxenError> {
        let conn = self.connect()?;
        let dom = lookup_domain(&conn, name)?;
        dom.update_device_flags(&domain_xml::cdrom_xml(None), affect_flags(&dom))
            .map_err(|e| MoxenError::Libvirt {
                message: format!("failed to eject media from '{name}': {e}"),
                hint: "eject it manually with `virsh change-media`".to_string(),
            })?;
        Ok(())
    }

    fn guest_ips(&self, name: &str) -> Result<Vec<String>, MoxenError> {
        let conn = self.connect()?;
        let dom = lookup_domain(&conn, name)?;

        let ifaces = dom
            .interface_addresses(virt::sys::VIR_DOMAIN_INTERFACE_ADDRESSES_SRC_LEASE, 0)
            .map_err(|e| MoxenError::Libvirt {
                message: format!("failed to query addresses of '{name}': {e}"),
                hint: "the domain must be running with a DHCP lease on the default network"
                    .to_string(),
            })?;

        let mut ips = Vec::new();
        for iface in &ifaces {
            for addr in &iface.addrs {
                ips.push(addr.addr.clone());
            }
        }
        Ok(ips)
    }
}

fn affect_flags(dom: &Domain) -> u32 {
    if dom.is_active().unwrap_or(false) {
        virt::sys::VIR_DOMAIN_AFFECT_LIVE | virt::sys::VIR_DOMAIN_AFFECT_CONFIG
    } else {
        virt::sys::VIR_DOMAIN_AFFECT_CONFIG
    }
}

/// ACPI shutdown with a bounded wait, then force off.
fn shutdown_with_timeout(dom: &Domain, name: &str) -> Result<(), MoxenError> {
    if !dom.is_active().unwrap_or(false) {
        return Ok(());
    }

    dom.shutdown().map_err(|e| MoxenError::Libvirt {
        message: format!("shutdown of '{name}' failed: {e}"),
        hint: "the VM may not support ACPI shutdown".to_string(),
    })?;

    for _ in 0..SHUTDOWN_TIMEOUT_SECS {
        if !dom.is_active().unwrap_or(false) {
            return Ok(());
        }
        std::thread::sleep(Duration::from_secs(1));
    }

    tracing::warn!(name, "ACPI shutdown timed out, forcing off");
    dom.destroy().map_err(|e| MoxenError::Libvirt {
        message: format!("force stop of '{name}' failed: {e}"),
        hint: "check libvirt permissions".to_string(),
    })?;
    Ok(())
}

// ── test double ─────────────────────────────────────────────────────
