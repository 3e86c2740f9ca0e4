//! Dynamic extension loading
//!
//! Extensions are shared libraries implementing a capability interface
//! (replay provider, trace sink) behind a minimal C ABI. This module
//! provides:
//! - The bit-exact [`descriptor::ExtensionDescriptor`] every extension
//!   exports for interoperability checks
//! - The [`loader::ExtensionLoader`] performing path search, ABI
//!   verification and reference-counted lifecycle management

pub mod descriptor;
pub mod loader;

use thiserror::Error;

pub use descriptor::{BuildInfoField, ExtensionDescriptor};
pub use loader::{ExtensionCache, ExtensionLoader, LoadedExtension};

/// Errors raised while locating, verifying or instantiating an extension
#[derive(Debug, Error)]
pub enum ExtensionError {
    #[error("no loadable library found for extension '{name}'; consulted search paths: {hints:?}")]
    NotFound { name: String, hints: Vec<String> },

    #[error("failed to open library '{path}': {reason}")]
    OpenFailed { path: String, reason: String },

    #[error("extension returned invalid descriptor")]
    InvalidDescriptor,

    #[error(
        "version mismatch: host version is {host_major}.{host_minor}.{host_patch}, \
         module has version {module_major}.{module_minor}.{module_patch}"
    )]
    VersionMismatch {
        host_major: u32,
        host_minor: u32,
        host_patch: u32,
        module_major: u32,
        module_minor: u32,
        module_patch: u32,
    },

    #[error("build information mismatch: host build info is {host:?}, module build info is {module:?}")]
    BuildInfoMismatch { host: [u32; 5], module: [u32; 5] },

    #[error("required symbol '{symbol}' missing in '{path}'")]
    SymbolMissing { symbol: String, path: String },

    #[error("CreateExtension failed for extension '{name}'")]
    CreationFailed { name: String },

    #[error("extension '{name}' does not expose a replay provider interface")]
    ProviderInterfaceMissing { name: String },
}
