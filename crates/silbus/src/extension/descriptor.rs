//! Extension descriptor ABI
//!
//! Every extension library exports a `silkit_extension_descriptor` symbol
//! pointing to a constant [`ExtensionDescriptor`]. The loader reads it
//! before touching any other symbol and refuses the library unless version
//! and build information match the host exactly. Future revisions may
//! append fields to the descriptor but never reorder them.

use std::ffi::CStr;
use std::os::raw::c_char;

/// Indices into [`ExtensionDescriptor::build_info`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BuildInfoField {
    /// Language edition the host was compiled against
    LanguageLevel = 0,
    /// Tag identifying the compiler family
    Compiler = 1,
    /// Whether the runtime is multithreaded
    Multithread = 2,
    /// Whether this is a debug build
    Debug = 3,
}

/// Compiler tag for rustc builds
pub const COMPILER_TAG_RUSTC: u32 = 4;

/// Interoperability information exported by an extension library.
///
/// The layout is shared across the C ABI boundary and must match the
/// host-side definition bit for bit.
#[repr(C)]
#[derive(Debug, Clone, Copy)]
pub struct ExtensionDescriptor {
    pub version_major: u32,
    pub version_minor: u32,
    pub version_patch: u32,
    pub extension_name: *const c_char,
    pub vendor_name: *const c_char,
    /// E.g. distribution or operating system name
    pub system_name: *const c_char,
    pub build_info: [u32; 5],
}

impl ExtensionDescriptor {
    pub fn version(&self) -> (u32, u32, u32) {
        (self.version_major, self.version_minor, self.version_patch)
    }

    /// Read the extension name.
    ///
    /// # Safety
    /// `extension_name` must be null or point to a NUL-terminated string.
    pub unsafe fn extension_name_str(&self) -> Option<String> {
        cstr_to_string(self.extension_name)
    }

    /// Read the vendor name.
    ///
    /// # Safety
    /// `vendor_name` must be null or point to a NUL-terminated string.
    pub unsafe fn vendor_name_str(&self) -> Option<String> {
        cstr_to_string(self.vendor_name)
    }

    /// Read the system name.
    ///
    /// # Safety
    /// `system_name` must be null or point to a NUL-terminated string.
    pub unsafe fn system_name_str(&self) -> Option<String> {
        cstr_to_string(self.system_name)
    }
}

unsafe fn cstr_to_string(ptr: *const c_char) -> Option<String> {
    if ptr.is_null() {
        return None;
    }
    Some(CStr::from_ptr(ptr).to_string_lossy().into_owned())
}

/// Version triple of this build, taken from the crate version
pub fn host_version() -> (u32, u32, u32) {
    let major = env!("CARGO_PKG_VERSION_MAJOR").parse().unwrap_or(0);
    let minor = env!("CARGO_PKG_VERSION_MINOR").parse().unwrap_or(0);
    let patch = env!("CARGO_PKG_VERSION_PATCH").parse().unwrap_or(0);
    (major, minor, patch)
}

/// Build information of this host build.
///
/// The array is compared element-wise against the extension's descriptor to
/// catch silent ABI drift between runtimes, debug flags or threading models.
pub fn host_build_info() -> [u32; 5] {
    let mut info = [0u32; 5];
    info[BuildInfoField::LanguageLevel as usize] = 2021;
    info[BuildInfoField::Compiler as usize] = COMPILER_TAG_RUSTC;
    info[BuildInfoField::Multithread as usize] = 1;
    info[BuildInfoField::Debug as usize] = cfg!(debug_assertions) as u32;
    info
}

/// Name of the system this host was built for
pub fn host_system_name() -> &'static str {
    if std::env::consts::OS.is_empty() {
        "UNKNOWN"
    } else {
        std::env::consts::OS
    }
}
