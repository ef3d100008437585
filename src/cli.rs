use clap::{Parser, Subcommand, ValueEnum};
use std::path::PathBuf;

#[derive(Parser, Debug)]
#[command(name = "moxen", about = "VM template, group, and instance catalog on plain directories")]
pub struct Cli {
    /// Path to the moxen config file
    #[arg(long, global = true)]
    pub config: Option<PathBuf>,

    /// Libvirt connection URI (overrides the config file)
    #[arg(long, global = true)]
    pub connect: Option<String>,

    /// Enable verbose output
    #[arg(short, long, global = true)]
    pub verbose: bool,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Manage VM templates
    #[command(subcommand)]
    Vm(VmCommand),

    /// Manage groups of VM templates
    #[command(subcommand)]
    Group(GroupCommand),

    /// Manage running instances
    #[command(subcommand)]
    Instance(InstanceCommand),

    /// List resources of one kind
    List {
        #[arg(value_enum)]
        kind: ListKind,
    },
}

#[derive(Subcommand, Debug)]
pub enum VmCommand {
    /// Create a new VM template from an ISO or an existing disk image
    Create {
        name: String,

        /// Disk size in GB (defaults from config)
        #[arg(short, long)]
        size: Option<u32>,

        /// Number of CPUs (defaults from config)
        #[arg(short, long)]
        cpus: Option<u32>,

        /// Memory size in MB (defaults from config)
        #[arg(short, long)]
        memory: Option<u64>,

        /// OS variant hint recorded in the template config
        #[arg(long)]
        os_variant: Option<String>,

        /// Use an existing disk image instead of installing
        #[arg(long)]
        existing_disk: Option<PathBuf>,

        /// Path to an installation ISO
        #[arg(short, long)]
        iso: Option<PathBuf>,
    },

    /// Delete a VM template
    Delete {
        name: String,

        /// Also remove the template from every group that references it
        #[arg(long)]
        force: bool,
    },

    /// Edit a VM template's configuration
    Edit { name: String },

    /// List files in one of a template's asset buckets
    ListFiles {
        name: String,

        /// Bucket owner: user or root
        #[arg(short, long)]
        owner: String,

        /// Bucket kind: executable or file
        #[arg(short, long)]
        kind: String,
    },

    /// Copy a file into one of a template's asset buckets
    AddFile {
        name: String,
        source: PathBuf,

        /// Bucket owner: user or root
        #[arg(short, long)]
        owner: String,

        /// Bucket kind: executable or file
        #[arg(short, long)]
        kind: String,
    },

    /// Remove a file from one of a template's asset buckets
    RemoveFile {
        name: String,
        file: String,

        /// Bucket owner: user or root
        #[arg(short, long)]
        owner: String,

        /// Bucket kind: executable or file
        #[arg(short, long)]
        kind: String,
    },

    /// Install SSH key material for a guest user
    AddSshKey {
        name: String,
        user: String,

        /// Copy this existing private key
        #[arg(long, conflicts_with = "generate")]
        key: Option<PathBuf>,

        /// Generate a fresh ed25519 keypair instead
        #[arg(long)]
        generate: bool,
    },

    /// Remove a guest user's SSH key material
    RemoveSshKey { name: String, user: String },
}

#[derive(Subcommand, Debug)]
pub enum GroupCommand {
    /// Create a new, empty group
    Create { name: String },

    /// Delete a group (never touches global templates)
    Delete { name: String },

    /// Materialize a template into a group
    Add { template: String, group: String },

    /// Remove a template's materialization from a group
    Remove { template: String, group: String },

    /// Start a new instance of a group
    Instantiate { name: String },

    /// Edit a group's configuration
    Edit { name: String },
}

#[derive(Subcommand, Debug)]
pub enum InstanceCommand {
    /// Stop an instance, or one VM in it
    Stop {
        name: String,

        /// Specific member VM (template name)
        #[arg(long)]
        vm: Option<String>,
    },

    /// Suspend an instance, or one VM in it
    Suspend {
        name: String,

        /// Specific member VM (template name)
        #[arg(long)]
        vm: Option<String>,
    },

    /// Resume a suspended instance, or one VM in it
    Resume {
        name: String,

        /// Specific member VM (template name)
        #[arg(long)]
        vm: Option<String>,
    },

    /// Snapshot an instance, or one VM in it
    Snapshot {
        name: String,
        label: String,

        /// Specific member VM (template name)
        #[arg(long)]
        vm: Option<String>,
    },

    /// Stop every VM and remove the instance tree
    Teardown { name: String },

    /// SSH into one VM of a running instance
    Ssh {
        instance: String,
        vm: String,

        /// Guest username to connect as
        #[arg(long, default_value = "root")]
        user: String,
    },
}

#[derive(ValueEnum, Clone, Copy, Debug)]
pub enum ListKind {
    Instances,
    Suspended,
    #[value(name = "vm_templates", alias = "vm-templates")]
    VmTemplates,
    Groups,
}
