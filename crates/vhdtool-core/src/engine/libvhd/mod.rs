//! [`VhdEngine`] backed by the native `libvhd` from blktap.
//!
//! The library is opened with `dlopen` when the engine is constructed, so
//! nothing in the build links against it.

mod dl;
pub mod ffi;

use std::ffi::{CStr, CString};
use std::os::raw::{c_char, c_int};
use std::path::{Path, PathBuf};
use std::ptr::NonNull;
use std::sync::Arc;

use tracing::{debug, trace};

use self::dl::DynLib;
use self::ffi::*;
use super::errno;
use super::{CheckOptions, CoalesceTarget, CreateFlags, DiskType, OpenFlags, VhdEngine, VhdHandle};
use crate::buffer::AlignedBuffer;
use crate::error::{EngineError, Error, Result};
use crate::vhd::{FOOTER_SIZE, HEADER_SIZE, SECTOR_SIZE};

/// Library names tried when no explicit path is configured.
pub const DEFAULT_LIBRARY_NAMES: [&str; 2] = ["libvhd.so", "libvhd.so.1"];

/// Where to find `libvhd`.
#[derive(Debug, Clone, Default)]
pub struct LibvhdConfig {
    /// Explicit library path. When unset, [`DEFAULT_LIBRARY_NAMES`] are tried
    /// through the dynamic linker's search path.
    pub library_path: Option<PathBuf>,
}

impl LibvhdConfig {
    pub fn with_library_path(path: impl Into<PathBuf>) -> Self {
        Self {
            library_path: Some(path.into()),
        }
    }

    fn candidates(&self) -> Vec<PathBuf> {
        match &self.library_path {
            Some(path) => vec![path.clone()],
            None => DEFAULT_LIBRARY_NAMES.iter().map(PathBuf::from).collect(),
        }
    }
}

/// Resolved libvhd entry points.
struct Libvhd {
    open: VhdOpenFn,
    close: VhdCloseFn,
    io_read: VhdIoFn,
    io_write: VhdIoFn,
    create: VhdCreateFn,
    chain_depth: VhdChainDepthFn,
    header_decode_parent: VhdHeaderDecodeParentFn,
    footer_out: VhdFooterOutFn,
    header_out: VhdHeaderOutFn,
    util_check: VhdUtilCheckFn,
    coalesce_out: VhdCoalesceToFn,
    coalesce_ancestor: VhdCoalesceToFn,
    coalesce_parent: VhdCoalesceParentFn,
    // Keeps every pointer above valid.
    _lib: DynLib,
}

impl Libvhd {
    fn load(config: &LibvhdConfig) -> Result<Self> {
        let mut failures = Vec::new();
        for candidate in config.candidates() {
            let name = c_path(&candidate)?;
            match DynLib::open(&name) {
                Ok(lib) => {
                    debug!(library = %candidate.display(), "loaded libvhd");
                    return Self::resolve(lib);
                }
                Err(e) => failures.push(format!("{}: {}", candidate.display(), e)),
            }
        }
        Err(Error::library_unavailable(failures.join("; ")))
    }

    fn resolve(lib: DynLib) -> Result<Self> {
        // SAFETY: each symbol is cast to the signature libvhd exports it with.
        unsafe {
            Ok(Self {
                open: symbol(&lib, "vhd_open")?,
                close: symbol(&lib, "vhd_close")?,
                io_read: symbol(&lib, "vhd_io_read")?,
                io_write: symbol(&lib, "vhd_io_write")?,
                create: symbol(&lib, "vhd_create")?,
                chain_depth: symbol(&lib, "vhd_chain_depth")?,
                header_decode_parent: symbol(&lib, "vhd_header_decode_parent")?,
                footer_out: symbol(&lib, "vhd_footer_out")?,
                header_out: symbol(&lib, "vhd_header_out")?,
                util_check: symbol(&lib, "vhd_util_check")?,
                coalesce_out: symbol(&lib, "vhd_util_coalesce_out")?,
                coalesce_ancestor: symbol(&lib, "vhd_util_coalesce_ancestor")?,
                coalesce_parent: symbol(&lib, "vhd_util_coalesce_parent")?,
                _lib: lib,
            })
        }
    }
}

/// Resolves `name` and reinterprets it as the function pointer type `T`.
///
/// # Safety
///
/// `T` must be an `extern "C"` function pointer matching the symbol.
unsafe fn symbol<T: Copy>(lib: &DynLib, name: &str) -> Result<T> {
    debug_assert_eq!(
        std::mem::size_of::<T>(),
        std::mem::size_of::<*mut std::os::raw::c_void>()
    );
    let cname = CString::new(name).map_err(|e| Error::library_unavailable(e.to_string()))?;
    let ptr = lib
        .sym(&cname)
        .map_err(|e| Error::library_unavailable(format!("{}: {}", name, e)))?;
    Ok(std::mem::transmute_copy::<*mut std::os::raw::c_void, T>(&ptr))
}

fn c_path(path: &Path) -> Result<CString> {
    #[cfg(unix)]
    let bytes = {
        use std::os::unix::ffi::OsStrExt;
        path.as_os_str().as_bytes().to_vec()
    };
    #[cfg(not(unix))]
    let bytes = path.to_string_lossy().into_owned().into_bytes();

    CString::new(bytes).map_err(|_| {
        Error::io(
            std::io::Error::new(std::io::ErrorKind::InvalidInput, "path contains a NUL byte"),
            path,
        )
    })
}

fn check_ret(operation: &'static str, ret: c_int) -> Result<()> {
    if ret == 0 {
        return Ok(());
    }
    // Capture errno before anything else can clobber it.
    let errno = errno::from_return(ret);
    Err(EngineError::new(operation, ret, errno).into())
}

/// The production engine.
#[derive(Clone)]
pub struct LibvhdEngine {
    lib: Arc<Libvhd>,
}

impl LibvhdEngine {
    /// Loads libvhd and resolves every entry point the engine uses.
    ///
    /// # Errors
    ///
    /// Returns [`Error::LibraryUnavailable`] if no candidate library could be
    /// opened or a symbol is missing.
    pub fn load(config: &LibvhdConfig) -> Result<Self> {
        Ok(Self {
            lib: Arc::new(Libvhd::load(config)?),
        })
    }
}

impl std::fmt::Debug for LibvhdEngine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LibvhdEngine").finish_non_exhaustive()
    }
}

impl VhdEngine for LibvhdEngine {
    type Handle = LibvhdHandle;

    fn create(
        &self,
        path: &Path,
        size_bytes: u64,
        disk_type: DiskType,
        flags: CreateFlags,
    ) -> Result<()> {
        let name = c_path(path)?;
        trace!(path = %path.display(), size_bytes, %disk_type, "vhd_create");
        // SAFETY: name is a valid C string for the duration of the call.
        let ret = unsafe {
            (self.lib.create)(
                name.as_ptr(),
                size_bytes,
                disk_type.code() as c_int,
                flags.bits(),
            )
        };
        check_ret("vhd_create", ret)
    }

    fn open(&self, path: &Path, flags: OpenFlags) -> Result<LibvhdHandle> {
        let name = c_path(path)?;
        let ctx = NonNull::from(Box::leak(VhdContext::zeroed()));
        // SAFETY: ctx points to a zeroed, heap-pinned context; libvhd copies
        // the file name, so `name` only has to outlive the call.
        let ret = unsafe { (self.lib.open)(ctx.as_ptr(), name.as_ptr(), flags.bits() as c_int) };
        let errno = errno::from_return(ret);
        if ret != 0 {
            // SAFETY: ctx came from Box::leak above and libvhd released
            // everything it allocated on the failure path.
            drop(unsafe { Box::from_raw(ctx.as_ptr()) });
            return Err(EngineError::new("vhd_open", ret, errno).into());
        }
        debug!(path = %path.display(), %flags, "opened container");
        Ok(LibvhdHandle {
            lib: Arc::clone(&self.lib),
            ctx,
            path: path.to_path_buf(),
            open: true,
        })
    }

    fn check(&self, path: &Path, options: &CheckOptions) -> Result<()> {
        let args = options
            .to_args(path)
            .into_iter()
            .map(|arg| {
                CString::new(arg).map_err(|_| {
                    Error::io(
                        std::io::Error::new(std::io::ErrorKind::InvalidInput, "argument contains a NUL byte"),
                        path,
                    )
                })
            })
            .collect::<Result<Vec<_>>>()?;
        // getopt may permute the pointer array, never the strings.
        let mut argv: Vec<*mut c_char> = args.iter().map(|a| a.as_ptr() as *mut c_char).collect();
        let argc = argv.len() as c_int;
        argv.push(std::ptr::null_mut());

        trace!(?args, "vhd_util_check");
        // SAFETY: argv is NULL terminated and every entry outlives the call.
        let ret = unsafe { (self.lib.util_check)(argc, argv.as_mut_ptr()) };
        check_ret("vhd_util_check", ret)
    }

    fn coalesce(&self, path: &Path, target: &CoalesceTarget, sparse: bool) -> Result<()> {
        let name = c_path(path)?;
        let other = c_path(target.path())?;
        let sparse = c_int::from(sparse);
        // SAFETY: both names are valid C strings for the duration of the call.
        // Progress reporting is disabled.
        let ret = unsafe {
            match target {
                CoalesceTarget::Output(_) => {
                    (self.lib.coalesce_out)(name.as_ptr(), other.as_ptr(), sparse, 0)
                }
                CoalesceTarget::Ancestor(_) => {
                    (self.lib.coalesce_ancestor)(name.as_ptr(), other.as_ptr(), sparse, 0)
                }
                CoalesceTarget::StepParent(_) => {
                    (self.lib.coalesce_parent)(name.as_ptr(), sparse, 0, other.as_ptr())
                }
            }
        };
        check_ret(
            match target {
                CoalesceTarget::Output(_) => "vhd_util_coalesce_out",
                CoalesceTarget::Ancestor(_) => "vhd_util_coalesce_ancestor",
                CoalesceTarget::StepParent(_) => "vhd_util_coalesce_parent",
            },
            ret,
        )
    }
}

/// A container opened through libvhd. Closed on drop.
pub struct LibvhdHandle {
    lib: Arc<Libvhd>,
    ctx: NonNull<VhdContext>,
    path: PathBuf,
    open: bool,
}

impl LibvhdHandle {
    pub fn path(&self) -> &Path {
        &self.path
    }

    fn context(&self) -> &VhdContext {
        // SAFETY: ctx is owned by this handle and only mutated through
        // libvhd calls that take `&mut self`.
        unsafe { self.ctx.as_ref() }
    }

    fn check_span(buf_len: usize, num_sectors: u32) -> Result<()> {
        let needed = u64::from(num_sectors) * SECTOR_SIZE;
        if needed > buf_len as u64 {
            return Err(Error::invalid_size(format!(
                "{} sectors do not fit a {} byte buffer",
                num_sectors, buf_len
            )));
        }
        Ok(())
    }

    fn release(&mut self) {
        if self.open {
            // SAFETY: the context was opened by vhd_open and is closed once.
            unsafe { (self.lib.close)(self.ctx.as_ptr()) };
            self.open = false;
            debug!(path = %self.path.display(), "closed container");
        }
    }
}

impl VhdHandle for LibvhdHandle {
    fn read(&mut self, buf: &mut AlignedBuffer, start_sector: u64, num_sectors: u32) -> Result<()> {
        Self::check_span(buf.len(), num_sectors)?;
        // SAFETY: the buffer holds at least num_sectors sectors and is
        // sector aligned; the context is open.
        let ret = unsafe {
            (self.lib.io_read)(
                self.ctx.as_ptr(),
                buf.as_mut_ptr() as *mut c_char,
                start_sector,
                num_sectors,
            )
        };
        check_ret("vhd_io_read", ret)
    }

    fn write(&mut self, buf: &AlignedBuffer, start_sector: u64, num_sectors: u32) -> Result<()> {
        Self::check_span(buf.len(), num_sectors)?;
        // SAFETY: as for read; vhd_io_write only reads from the buffer.
        let ret = unsafe {
            (self.lib.io_write)(
                self.ctx.as_ptr(),
                buf.as_ptr() as *mut c_char,
                start_sector,
                num_sectors,
            )
        };
        check_ret("vhd_io_write", ret)
    }

    fn footer_bytes(&self) -> [u8; FOOTER_SIZE] {
        let mut footer = self.context().footer;
        // SAFETY: footer is a private copy; vhd_footer_out byte-swaps in place.
        unsafe {
            (self.lib.footer_out)(&mut footer);
            std::mem::transmute::<VhdFooter, [u8; FOOTER_SIZE]>(footer)
        }
    }

    fn header_bytes(&self) -> [u8; HEADER_SIZE] {
        let mut header = self.context().header;
        // SAFETY: as for footer_bytes.
        unsafe {
            (self.lib.header_out)(&mut header);
            std::mem::transmute::<VhdHeader, [u8; HEADER_SIZE]>(header)
        }
    }

    fn parent_name(&self) -> Result<String> {
        let mut header = self.context().header;
        let mut out: *mut c_char = std::ptr::null_mut();
        // SAFETY: libvhd reads the context and header and stores a malloc'd
        // string in `out`, which is released with free below.
        let ret =
            unsafe { (self.lib.header_decode_parent)(self.ctx.as_ptr(), &mut header, &mut out) };
        check_ret("vhd_header_decode_parent", ret)?;
        if out.is_null() {
            return Err(Error::decode("libvhd returned no parent name"));
        }
        // SAFETY: out is a NUL terminated string owned by us from here on.
        let name = unsafe {
            let name = CStr::from_ptr(out).to_string_lossy().into_owned();
            free(out.cast());
            name
        };
        Ok(name)
    }

    fn chain_depth(&self) -> Result<u32> {
        let mut depth: c_int = 0;
        // SAFETY: depth is a valid out pointer; the context is open.
        let ret = unsafe { (self.lib.chain_depth)(self.ctx.as_ptr(), &mut depth) };
        check_ret("vhd_chain_depth", ret)?;
        u32::try_from(depth).map_err(|_| Error::decode(format!("negative chain depth {}", depth)))
    }

    fn close(mut self) -> Result<()> {
        self.release();
        Ok(())
    }
}

impl Drop for LibvhdHandle {
    fn drop(&mut self) {
        self.release();
        // SAFETY: ctx came from Box::leak in `open` and is freed exactly once.
        drop(unsafe { Box::from_raw(self.ctx.as_ptr()) });
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_candidates() {
        let names: Vec<PathBuf> = LibvhdConfig::default().candidates();
        assert_eq!(names, vec![PathBuf::from("libvhd.so"), PathBuf::from("libvhd.so.1")]);
    }

    #[test]
    fn test_explicit_library_path() {
        let config = LibvhdConfig::with_library_path("/opt/blktap/lib/libvhd.so");
        assert_eq!(config.candidates(), vec![PathBuf::from("/opt/blktap/lib/libvhd.so")]);
    }

    #[test]
    fn test_missing_library_is_reported() {
        let config = LibvhdConfig::with_library_path("/nonexistent/libvhd.so");
        match LibvhdEngine::load(&config) {
            Err(Error::LibraryUnavailable { message }) => {
                assert!(message.contains("/nonexistent/libvhd.so"));
            }
            other => panic!("unexpected result: {:?}", other.map(|_| ())),
        }
    }

    #[test]
    fn test_span_check() {
        assert!(LibvhdHandle::check_span(1024, 2).is_ok());
        assert!(matches!(
            LibvhdHandle::check_span(1024, 3),
            Err(Error::InvalidSize { .. })
        ));
    }
}
