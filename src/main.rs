use clap::Parser;
use tracing_subscriber::EnvFilter;

use moxen::cli::{Cli, Command, GroupCommand, InstanceCommand, ListKind, VmCommand};
use moxen::config::{self, Settings};
use moxen::editor;
use moxen::error::MoxenError;
use moxen::group::GroupStore;
use moxen::hypervisor::{Hypervisor, LibvirtHypervisor};
use moxen::instance::{InstanceManifest, InstanceStore, LaunchDefaults};
use moxen::paths::{AssetKind, AssetOwner};
use moxen::template::{CreateTemplate, KeySource, TemplateStore};

fn main() -> miette::Result<()> {
    let cli = Cli::parse();

    let filter = if cli.verbose {
        EnvFilter::new("moxen=debug")
    } else {
        EnvFilter::from_default_env()
            .add_directive("moxen=info".parse().expect("valid log directive"))
    };
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();

    let config_path = cli
        .config
        .clone()
        .unwrap_or_else(config::default_config_path);
    let settings = config::load_settings(&config_path, cli.connect.as_deref())?;
    let layout = settings.layout();
    config::ensure_base_layout(&layout)?;

    let templates = TemplateStore::new(layout.clone());
    let groups = GroupStore::new(layout.clone());
    let instances = InstanceStore::new(layout);
    let hv = LibvirtHypervisor::new(settings.libvirt_uri.clone());

    match cli.command {
        Command::Vm(cmd) => run_vm(cmd, &settings, &templates, &hv)?,
        Command::Group(cmd) => run_group(cmd, &settings, &templates, &groups, &instances, &hv)?,
        Command::Instance(cmd) => run_instance(cmd, &instances, &hv)?,
        Command::List { kind } => run_list(kind, &templates, &groups, &instances)?,
    }

    Ok(())
}

fn run_vm(
    cmd: VmCommand,
    settings: &Settings,
    templates: &TemplateStore,
    hv: &dyn Hypervisor,
) -> Result<(), MoxenError> {
    match cmd {
        VmCommand::Create {
            name,
            size,
            cpus,
            memory,
            os_variant,
            existing_disk,
            iso,
        } => {
            let req = CreateTemplate {
                name: name.clone(),
                disk_size_gb: size.unwrap_or(settings.default_disk_size_gb),
                cpus: cpus.unwrap_or(settings.default_cpus),
                memory_mb: memory.unwrap_or(settings.default_memory_mb),
                os_variant,
                iso,
                existing_disk,
            };
            templates.create(hv, &req)?;
            println!("VM template '{name}' created.");
        }
        VmCommand::Delete { name, force } => {
            let removed_from = templates.delete(&name, force)?;
            if removed_from.is_empty() {
                println!("Deleted VM template '{name}'.");
            } else {
                println!(
                    "Deleted VM template '{name}' (also removed from: {}).",
                    removed_from.join(", ")
                );
            }
        }
        VmCommand::Edit { name } => {
            templates.edit_config(&name, editor::launch)?;
            println!("Configuration changes applied to '{name}'.");
        }
        VmCommand::ListFiles { name, owner, kind } => {
            let owner = AssetOwner::parse(&owner)?;
            let kind = AssetKind::parse(&kind)?;
            let files = templates.list_assets(&name, owner, kind)?;
            if files.is_empty() {
                println!("No {} {}s in '{name}'.", owner.as_str(), kind.as_str());
            } else {
                for file in files {
                    println!("{file}");
                }
            }
        }
        VmCommand::AddFile {
            name,
            source,
            owner,
            kind,
        } => {
            let owner = AssetOwner::parse(&owner)?;
            let kind = AssetKind::parse(&kind)?;
            templates.add_asset(&name, &source, owner, kind)?;
            println!(
                "Added {} '{}' to '{name}' as {}.",
                kind.as_str(),
                source.display(),
                owner.as_str()
            );
        }
        VmCommand::RemoveFile {
            name,
            file,
            owner,
            kind,
        } => {
            let owner = AssetOwner::parse(&owner)?;
            let kind = AssetKind::parse(&kind)?;
            templates.remove_asset(&name, &file, owner, kind)?;
            println!(
                "Removed {} '{file}' from '{name}' as {}.",
                kind.as_str(),
                owner.as_str()
            );
        }
        VmCommand::AddSshKey {
            name,
            user,
            key,
            generate,
        } => {
            let source = match (key, generate) {
                (Some(path), false) => KeySource::Copy(path),
                (None, true) => KeySource::Generate,
                _ => {
                    return Err(MoxenError::InvalidArgument {
                        what: "key source",
                        value: "none".to_string(),
                        expected: "--key <path> or --generate".to_string(),
                    });
                }
            };
            templates.add_ssh_key(&name, &user, &source)?;
            println!("SSH key for '{user}' installed in '{name}'.");
        }
        VmCommand::RemoveSshKey { name, user } => {
            templates.remove_ssh_key(&name, &user)?;
            println!("Removed SSH key for '{user}' from '{name}'.");
        }
    }
    Ok(())
}

fn run_group(
    cmd: GroupCommand,
    settings: &Settings,
    templates: &TemplateStore,
    groups: &GroupStore,
    instances: &InstanceStore,
    hv: &dyn Hypervisor,
) -> Result<(), MoxenError> {
    match cmd {
        GroupCommand::Create { name } => {
            groups.create(&name)?;
            println!("Group '{name}' created.");
        }
        GroupCommand::Delete { name } => {
            groups.delete(&name)?;
            println!("Deleted group '{name}'.");
        }
        GroupCommand::Add { template, group } => {
            groups.add_member(templates, &group, &template)?;
            println!("Added VM template '{template}' to group '{group}'.");
        }
        GroupCommand::Remove { template, group } => {
            groups.remove_member(&group, &template)?;
            println!("Removed VM template '{template}' from group '{group}'.");
        }
        GroupCommand::Instantiate { name } => {
            let defaults = LaunchDefaults {
                cpus: settings.default_cpus,
                memory_mb: settings.default_memory_mb,
            };
            let result = instances.instantiate(hv, &name, defaults)?;
            println!("Instance '{}' started:", result.name);
            for (member, domain) in &result.vms {
                println!("  {member} -> {domain}");
            }
        }
        GroupCommand::Edit { name } => {
            groups.edit_config(&name, editor::launch)?;
            println!("Configuration changes applied to group '{name}'.");
        }
    }
    Ok(())
}

fn run_instance(
    cmd: InstanceCommand,
    instances: &InstanceStore,
    hv: &dyn Hypervisor,
) -> Result<(), MoxenError> {
    match cmd {
        InstanceCommand::Stop { name, vm } => {
            instances.stop(hv, &name, vm.as_deref())?;
            println!("Stopped {}.", target_phrase(&name, vm.as_deref()));
        }
        InstanceCommand::Suspend { name, vm } => {
            instances.suspend(hv, &name, vm.as_deref())?;
            println!("Suspended {}.", target_phrase(&name, vm.as_deref()));
        }
        InstanceCommand::Resume { name, vm } => {
            instances.resume(hv, &name, vm.as_deref())?;
            println!("Resumed {}.", target_phrase(&name, vm.as_deref()));
        }
        InstanceCommand::Snapshot { name, label, vm } => {
            instances.snapshot(hv, &name, &label, vm.as_deref())?;
            println!(
                "Snapshotted {} as '{label}'.",
                target_phrase(&name, vm.as_deref())
            );
        }
        InstanceCommand::Teardown { name } => {
            instances.teardown(hv, &name)?;
            println!("Instance '{name}' torn down.");
        }
        InstanceCommand::Ssh { instance, vm, user } => {
            instances.ssh(hv, &instance, &vm, &user)?;
        }
    }
    Ok(())
}

fn target_phrase(instance: &str, vm: Option<&str>) -> String {
    match vm {
        Some(vm) => format!("VM '{vm}' in instance '{instance}'"),
        None => format!("instance '{instance}'"),
    }
}

fn run_list(
    kind: ListKind,
    templates: &TemplateStore,
    groups: &GroupStore,
    instances: &InstanceStore,
) -> Result<(), MoxenError> {
    match kind {
        ListKind::VmTemplates => {
            let names = templates.list()?;
            if names.is_empty() {
                println!("No VM templates.");
            }
            for name in names {
                println!("{name}");
            }
        }
        ListKind::Groups => {
            let names = groups.list()?;
            if names.is_empty() {
                println!("No groups.");
            }
            for name in names {
                let members = groups.members(&name)?;
                println!("{name}  {} template(s)", members.len());
            }
        }
        ListKind::Instances => print_instances(instances.list(false)?, "No instances."),
        ListKind::Suspended => print_instances(instances.list(true)?, "No suspended instances."),
    }
    Ok(())
}

fn print_instances(rows: Vec<(String, Option<InstanceManifest>)>, empty: &str) {
    if rows.is_empty() {
        println!("{empty}");
    }
    for (name, manifest) in rows {
        match manifest {
            Some(m) => {
                let domains: Vec<&str> = m.vms.values().map(String::as_str).collect();
                println!("{name}  group={}  vms={}", m.group, domains.join(","));
            }
            None => println!("{name}"),
        }
    }
}
