#![allow(unused_assignments)] // thiserror/miette proc macros trigger false positives

pub mod cli;
pub mod config;
pub mod domain_xml;
pub mod editor;
pub mod error;
pub mod group;
pub mod hypervisor;
pub mod instance;
pub mod lock;
pub mod materialize;
pub mod paths;
pub mod refs;
pub mod template;
