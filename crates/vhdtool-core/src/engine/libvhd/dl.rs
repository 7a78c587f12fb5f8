//! Minimal dynamic library loading for the libvhd binding.
//!
//! `libvhd` is resolved at runtime so the crate builds and its pure parts can
//! be tested on hosts without blktap installed.

use std::ffi::CStr;
use std::os::raw::{c_char, c_int, c_void};

/// Handle to a dynamically loaded shared library.
pub struct DynLib {
    handle: *mut c_void,
}

// SAFETY: The library handle is a process-global resource. The handle itself
// is never mutated after `open`; callers serialise use of the symbols.
unsafe impl Send for DynLib {}
unsafe impl Sync for DynLib {}

impl DynLib {
    /// Open a shared library by name or path.
    ///
    /// Wraps `dlopen` with `RTLD_NOW | RTLD_LOCAL`.
    pub fn open(name: &CStr) -> Result<Self, String> {
        #[cfg(unix)]
        {
            // SAFETY: name is a valid C string. RTLD_NOW surfaces missing
            // dependencies here rather than at first call.
            let handle = unsafe { dlopen(name.as_ptr(), RTLD_NOW | RTLD_LOCAL) };
            if handle.is_null() {
                return Err(last_error().unwrap_or_else(|| "unknown dlopen error".to_string()));
            }
            Ok(Self { handle })
        }

        #[cfg(not(unix))]
        {
            let _ = name;
            Err("dynamic library loading not supported on this platform".to_string())
        }
    }

    /// Look up a symbol by name, returning a raw pointer.
    ///
    /// # Safety
    ///
    /// The caller must cast the returned pointer to the symbol's real
    /// signature before use.
    pub unsafe fn sym(&self, name: &CStr) -> Result<*mut c_void, String> {
        #[cfg(unix)]
        {
            // Clear any previous error.
            dlerror();
            let ptr = dlsym(self.handle, name.as_ptr());
            if let Some(msg) = last_error() {
                return Err(msg);
            }
            if ptr.is_null() {
                return Err(format!("symbol {} resolved to null", name.to_string_lossy()));
            }
            Ok(ptr)
        }

        #[cfg(not(unix))]
        {
            let _ = name;
            Err("dynamic library loading not supported on this platform".to_string())
        }
    }
}

impl Drop for DynLib {
    fn drop(&mut self) {
        #[cfg(unix)]
        if !self.handle.is_null() {
            // SAFETY: handle came from a successful dlopen and is closed once.
            unsafe {
                dlclose(self.handle);
            }
        }
    }
}

#[cfg(unix)]
fn last_error() -> Option<String> {
    // SAFETY: dlerror returns null or a thread-local NUL terminated string
    // that stays valid until the next dl* call on this thread.
    unsafe {
        let err = dlerror();
        if err.is_null() {
            None
        } else {
            Some(CStr::from_ptr(err).to_string_lossy().into_owned())
        }
    }
}

#[cfg(unix)]
const RTLD_NOW: c_int = 2;
#[cfg(unix)]
const RTLD_LOCAL: c_int = 0;

#[cfg(unix)]
extern "C" {
    fn dlopen(filename: *const c_char, flags: c_int) -> *mut c_void;
    fn dlsym(handle: *mut c_void, symbol: *const c_char) -> *mut c_void;
    fn dlclose(handle: *mut c_void) -> c_int;
    fn dlerror() -> *const c_char;
}
