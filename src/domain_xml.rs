//! Libvirt domain XML generation.

use std::path::Path;

/// Everything needed to define or launch a domain backed by one qcow2 disk.
pub struct DomainSpec<'a> {
    pub name: &'a str,
    pub cpus: u32,
    pub memory_mb: u64,
    pub disk: &'a Path,
}

/// Generate domain XML for `spec`.
///
/// With `iso` set, a CD-ROM device is included and boot order prefers it,
/// which is the guided-install shape. Without it the domain boots straight
/// from the disk.
pub fn domain_xml(spec: &DomainSpec, iso: Option<&Path>) -> String {
    let name = spec.name;
    let memory_mb = spec.memory_mb;
    let cpus = spec.cpus;
    let disk = spec.disk.display();

    let boot = match iso {
        Some(_) => "<boot dev='cdrom'/>\n    <boot dev='hd'/>",
        None => "<boot dev='hd'/>",
    };
    let cdrom = match iso {
        Some(iso) => format!("\n    {}", cdrom_xml(Some(iso)).replace('\n', "\n    ")),
        None => String::new(),
    };

    format!(
        r#"<domain type='kvm'>
  <name>{name}</name>
  <memory unit='MiB'>{memory_mb}</memory>
  <vcpu>{cpus}</vcpu>
  <os>
    <type arch='x86_64' machine='q35'>hvm</type>
    {boot}
  </os>
  <features>
    <acpi/>
    <apic/>
  </features>
  <devices>
    <disk type='file' device='disk'>
      <driver name='qemu' type='qcow2'/>
      <source file='{disk}'/>
      <target dev='vda' bus='virtio'/>
    </disk>{cdrom}
    <interface type='network'>
      <source network='default'/>
      <model type='virtio'/>
    </interface>
    <graphics type='spice' port='-1' autoport='yes'/>
    <serial type='pty'>
      <target port='0'/>
    </serial>
    <console type='pty'>
      <target type='serial' port='0'/>
    </console>
  </devices>
</domain>
"#
    )
}

/// The removable-media device fragment.
///
/// With a path this attaches the ISO; with `None` it is the same device
/// with an empty tray, which is how media gets ejected via device update.
pub fn cdrom_xml(iso: Option<&Path>) -> String {
    let source = match iso {
        Some(iso) => format!("\n  <source file='{}'/>", iso.display()),
        None => String::new(),
    };
    format!(
        r#"<disk type='file' device='cdrom'>
  <driver name='qemu' type='raw'/>{source}
  <target dev='sda' bus='sata'/>
  <readonly/>
</disk>"#
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;

    fn spec<'a>(disk: &'a Path) -> DomainSpec<'a> {
        DomainSpec {
            name: "web_0",
            cpus: 2,
            memory_mb: 2048,
            disk,
        }
    }

    #[test]
    fn xml_contains_name_and_resources() {
        let disk = PathBuf::from("/opt/moxen/vm_templates/web/web.qcow2");
        let xml = domain_xml(&spec(&disk), None);
        assert!(xml.contains("<name>web_0</name>"));
        assert!(xml.contains("<memory unit='MiB'>2048</memory>"));
        assert!(xml.contains("<vcpu>2</vcpu>"));
        assert!(xml.contains("<source file='/opt/moxen/vm_templates/web/web.qcow2'/>"));
    }

    #[test]
    fn plain_domain_boots_from_disk_only() {
        let disk = PathBuf::from("/tmp/web.qcow2");
        let xml = domain_xml(&spec(&disk), None);
        assert!(xml.contains("<boot dev='hd'/>"));
        assert!(!xml.contains("<boot dev='cdrom'/>"));
        assert!(!xml.contains("device='cdrom'"));
    }

    #[test]
    fn install_domain_prefers_cdrom_boot() {
        let disk = PathBuf::from("/tmp/web.qcow2");
        let iso = PathBuf::from("/isos/debian.iso");
        let xml = domain_xml(&spec(&disk), Some(&iso));
        assert!(xml.contains("<boot dev='cdrom'/>"));
        assert!(xml.contains("<boot dev='hd'/>"));
        assert!(xml.contains("<source file='/isos/debian.iso'/>"));
        assert!(xml.contains("device='cdrom'"));
    }

    #[test]
    fn empty_cdrom_has_no_source() {
        let xml = cdrom_xml(None);
        assert!(!xml.contains("<source"));
        assert!(xml.contains("device='cdrom'"));
        assert!(xml.contains("bus='sata'"));
    }
}
