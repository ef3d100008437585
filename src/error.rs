use miette::Diagnostic;
use thiserror::Error;

#[derive(Debug, Error, Diagnostic)]
pub enum MoxenError {
    #[error("{kind} '{name}' not found")]
    NotFound { kind: &'static str, name: String },

    #[error("{kind} '{name}' already exists")]
    AlreadyExists { kind: &'static str, name: String },

    #[error("{kind} '{name}' is corrupted: missing {missing}")]
    #[diagnostic(help("restore the missing piece, or delete the resource and recreate it"))]
    Corrupted {
        kind: &'static str,
        name: String,
        missing: String,
    },

    #[error("invalid configuration in {path}: {message}")]
    InvalidConfig { path: String, message: String },

    #[error("invalid {what} '{value}' (valid choices: {expected})")]
    InvalidArgument {
        what: &'static str,
        value: String,
        expected: String,
    },

    #[error("template '{name}' is still referenced by: {}", .groups.join(", "))]
    #[diagnostic(help("pass --force to remove it from every referencing group as well"))]
    Referenced { name: String, groups: Vec<String> },

    #[error("no free domain id for template '{name}' (ids 0-999 are all taken)")]
    ExhaustedNamespace { name: String },

    #[error("{tool} failed: {message}")]
    ExternalTool { tool: String, message: String },

    #[error("libvirt: {message}")]
    #[diagnostic(help("{hint}"))]
    Libvirt { message: String, hint: String },

    #[error("{context}")]
    Io {
        context: String,
        #[source]
        source: std::io::Error,
    },

    #[error(
        "instance '{name}' started partially (started: {}; failed: {})",
        .started.join(", "),
        .failed.join(", ")
    )]
    #[diagnostic(help("the instance tree was kept; remove it with `moxen instance teardown`"))]
    PartialStart {
        name: String,
        started: Vec<String>,
        failed: Vec<String>,
    },

    #[error("resource '{name}' is locked by another moxen invocation")]
    #[diagnostic(help("wait for the other operation to finish, or remove the stale .locks entry"))]
    Locked { name: String },
}
