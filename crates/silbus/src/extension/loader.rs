//! Extension library search, verification and lifecycle
//!
//! The loader resolves an undecorated extension name against a list of path
//! hints, opens every candidate in discovery order and returns the first one
//! that passes ABI verification. Loaded extensions are shared through
//! reference-counted handles; a weak cache keyed by name hands out the live
//! handle while one exists and reloads the library after the last handle
//! dropped.

use std::collections::HashMap;
use std::env;
use std::os::raw::c_void;
use std::path::PathBuf;
use std::sync::{Arc, Mutex, Weak};

use libloading::Library;
use log::{debug, info, warn};

use super::descriptor::{host_build_info, host_system_name, host_version, ExtensionDescriptor};
use super::ExtensionError;

/// Environment variable holding additional extension search paths
pub const EXTENSION_PATH_ENV: &str = "SILKIT_EXTENSION_PATH";
/// Historical name of the search path variable, still honored
pub const LEGACY_EXTENSION_PATH_ENV: &str = "IB_EXTENSION_PATH";

const DESCRIPTOR_SYMBOL: &[u8] = b"silkit_extension_descriptor\0";
const CREATE_SYMBOL: &[u8] = b"CreateExtension\0";
const RELEASE_SYMBOL: &[u8] = b"ReleaseExtension\0";

type CreateExtensionFn = unsafe extern "C" fn() -> *mut c_void;
type ReleaseExtensionFn = unsafe extern "C" fn(*mut c_void);

/// Candidate file names for an undecorated extension name, in search order
pub(crate) fn candidate_file_names(name: &str) -> Vec<String> {
    let ext = env::consts::DLL_SUFFIX;
    vec![
        name.to_string(),
        // Debug builds first
        format!("lib{}d{}", name, ext),
        format!("{}d{}", name, ext),
        // Release builds
        format!("lib{}{}", name, ext),
        format!("{}{}", name, ext),
    ]
}

/// Resolve one path hint into concrete directories.
///
/// A hint prefixed `ENV:` dereferences the named environment variable as a
/// platform path list; an unset variable resolves to nothing.
pub(crate) fn resolve_hint(hint: &str) -> Vec<PathBuf> {
    if let Some(var) = hint.strip_prefix("ENV:") {
        match env::var_os(var) {
            Some(value) => env::split_paths(&value).collect(),
            None => Vec::new(),
        }
    } else {
        vec![PathBuf::from(hint)]
    }
}

/// Collect every existing candidate file for `name`, in discovery order
pub(crate) fn find_library_candidates(name: &str, hints: &[String]) -> Vec<PathBuf> {
    let file_names = candidate_file_names(name);
    let mut found = Vec::new();
    for hint in hints {
        for dir in resolve_hint(hint) {
            for file_name in &file_names {
                let candidate = dir.join(file_name);
                if candidate.is_file() {
                    found.push(candidate);
                }
            }
        }
    }
    found
}

/// Check a module descriptor against the host build.
///
/// Version triple and build-info array must match exactly; differing system
/// names only produce a warning.
pub(crate) fn verify_descriptor(descriptor: &ExtensionDescriptor) -> Result<(), ExtensionError> {
    let (host_major, host_minor, host_patch) = host_version();
    if descriptor.version() != (host_major, host_minor, host_patch) {
        return Err(ExtensionError::VersionMismatch {
            host_major,
            host_minor,
            host_patch,
            module_major: descriptor.version_major,
            module_minor: descriptor.version_minor,
            module_patch: descriptor.version_patch,
        });
    }

    let host_build = host_build_info();
    if descriptor.build_info != host_build {
        return Err(ExtensionError::BuildInfoMismatch {
            host: host_build,
            module: descriptor.build_info,
        });
    }

    let host_system = host_system_name();
    let module_system = unsafe { descriptor.system_name_str() }
        .unwrap_or_else(|| "UNKNOWN".to_string());
    if host_system == "UNKNOWN" || module_system == "UNKNOWN" {
        warn!("extension verification: build system is misconfigured, the system name is UNKNOWN");
    } else if host_system != module_system {
        warn!(
            "extension verification: host system '{}' differs from module system '{}'",
            host_system, module_system
        );
    }

    Ok(())
}

/// A loaded and verified extension library.
///
/// Dropping the last handle calls the module's `ReleaseExtension` and then
/// unloads the library.
#[derive(Debug)]
pub struct LoadedExtension {
    name: String,
    path: PathBuf,
    extension_name: String,
    vendor_name: String,
    instance: *mut c_void,
    release: ReleaseExtensionFn,
    // Declared last: the library must outlive the release call in drop
    library: Library,
}

// The opaque instance pointer is only handed to the module's own entry
// points, which use no thread-local state per the ABI contract.
unsafe impl Send for LoadedExtension {}
unsafe impl Sync for LoadedExtension {}

impl LoadedExtension {
    /// Undecorated name the extension was requested as
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Path of the library file that was loaded
    pub fn path(&self) -> &PathBuf {
        &self.path
    }

    /// Self-declared extension name from the descriptor
    pub fn extension_name(&self) -> &str {
        &self.extension_name
    }

    /// Self-declared vendor name from the descriptor
    pub fn vendor_name(&self) -> &str {
        &self.vendor_name
    }

    /// Opaque instance handle created by the module
    pub fn instance(&self) -> *mut c_void {
        self.instance
    }

    /// Resolve an additional symbol from the loaded library
    pub fn library(&self) -> &Library {
        &self.library
    }
}

impl Drop for LoadedExtension {
    fn drop(&mut self) {
        // Release the module instance before the library itself unloads
        unsafe { (self.release)(self.instance) };
    }
}

/// Weak cache of loaded values keyed by name.
///
/// Holding only weak references keeps ownership with the consumers: the
/// value is dropped (and the library unloaded) when the last strong handle
/// goes away, and a later request reloads it cleanly.
pub struct ExtensionCache<T> {
    entries: Mutex<HashMap<String, Weak<T>>>,
}

impl<T> ExtensionCache<T> {
    pub fn new() -> Self {
        Self {
            entries: Mutex::new(HashMap::new()),
        }
    }

    /// Return the cached value for `name` if still alive, otherwise create,
    /// cache and return a fresh one.
    pub fn get_or_try_insert_with<E, F>(&self, name: &str, create: F) -> Result<Arc<T>, E>
    where
        F: FnOnce() -> Result<Arc<T>, E>,
    {
        let mut entries = self.entries.lock().unwrap();
        if let Some(weak) = entries.get(name) {
            if let Some(alive) = weak.upgrade() {
                return Ok(alive);
            }
        }
        let fresh = create()?;
        entries.insert(name.to_string(), Arc::downgrade(&fresh));
        Ok(fresh)
    }
}

impl<T> Default for ExtensionCache<T> {
    fn default() -> Self {
        Self::new()
    }
}

/// Locates, verifies and instantiates extension libraries
pub struct ExtensionLoader {
    search_path_hints: Vec<String>,
    cache: ExtensionCache<LoadedExtension>,
}

impl ExtensionLoader {
    /// Create a loader with user-provided search path hints.
    ///
    /// The environment hints, the working directory and the executable
    /// directory are always consulted after the user hints.
    pub fn new(search_path_hints: Vec<String>) -> Self {
        Self {
            search_path_hints,
            cache: ExtensionCache::new(),
        }
    }

    /// Load the extension `name`, or return the live cached handle
    pub fn load(&self, name: &str) -> Result<Arc<LoadedExtension>, ExtensionError> {
        self.cache
            .get_or_try_insert_with(name, || self.load_uncached(name))
    }

    fn hints(&self) -> Vec<String> {
        let mut hints = self.search_path_hints.clone();
        hints.push(format!("ENV:{}", EXTENSION_PATH_ENV));
        hints.push(format!("ENV:{}", LEGACY_EXTENSION_PATH_ENV));
        hints.push(".".to_string());
        if let Some(exe_dir) = env::current_exe()
            .ok()
            .and_then(|exe| exe.parent().map(|dir| dir.to_path_buf()))
        {
            hints.push(exe_dir.display().to_string());
        }
        hints
    }

    fn load_uncached(&self, name: &str) -> Result<Arc<LoadedExtension>, ExtensionError> {
        let hints = self.hints();
        let candidates = find_library_candidates(name, &hints);

        for path in candidates {
            match Self::open_and_verify(&path) {
                Ok(library) => {
                    info!(
                        "Loaded extension '{}' from path '{}'",
                        name,
                        path.display()
                    );
                    return Self::instantiate(name, path, library);
                }
                Err(err) => {
                    debug!(
                        "Failed to verify extension located at path '{}': {}",
                        path.display(),
                        err
                    );
                }
            }
        }

        Err(ExtensionError::NotFound {
            name: name.to_string(),
            hints,
        })
    }

    fn open_and_verify(path: &PathBuf) -> Result<Library, ExtensionError> {
        let library = unsafe { Library::new(path) }.map_err(|err| ExtensionError::OpenFailed {
            path: path.display().to_string(),
            reason: err.to_string(),
        })?;

        {
            let descriptor_ptr = unsafe {
                library.get::<*const ExtensionDescriptor>(DESCRIPTOR_SYMBOL)
            }
            .map_err(|_| ExtensionError::InvalidDescriptor)?;
            if descriptor_ptr.is_null() {
                return Err(ExtensionError::InvalidDescriptor);
            }
            let descriptor: &ExtensionDescriptor = unsafe { &**descriptor_ptr };
            verify_descriptor(descriptor)?;
        }

        Ok(library)
    }

    fn instantiate(
        name: &str,
        path: PathBuf,
        library: Library,
    ) -> Result<Arc<LoadedExtension>, ExtensionError> {
        let symbol_missing = |symbol: &[u8]| ExtensionError::SymbolMissing {
            symbol: String::from_utf8_lossy(&symbol[..symbol.len() - 1]).into_owned(),
            path: path.display().to_string(),
        };

        let (extension_name, vendor_name) = {
            let descriptor_ptr = unsafe {
                library.get::<*const ExtensionDescriptor>(DESCRIPTOR_SYMBOL)
            }
            .map_err(|_| ExtensionError::InvalidDescriptor)?;
            let descriptor: &ExtensionDescriptor = unsafe { &**descriptor_ptr };
            (
                unsafe { descriptor.extension_name_str() }.unwrap_or_default(),
                unsafe { descriptor.vendor_name_str() }.unwrap_or_default(),
            )
        };

        let create: CreateExtensionFn = *unsafe {
            library.get::<CreateExtensionFn>(CREATE_SYMBOL)
        }
        .map_err(|_| symbol_missing(CREATE_SYMBOL))?;
        let release: ReleaseExtensionFn = *unsafe {
            library.get::<ReleaseExtensionFn>(RELEASE_SYMBOL)
        }
        .map_err(|_| symbol_missing(RELEASE_SYMBOL))?;

        // The module returns null instead of unwinding across the ABI
        let instance = unsafe { create() };
        if instance.is_null() {
            return Err(ExtensionError::CreationFailed {
                name: name.to_string(),
            });
        }

        Ok(Arc::new(LoadedExtension {
            name: name.to_string(),
            path,
            extension_name,
            vendor_name,
            instance,
            release,
            library,
        }))
    }
}
