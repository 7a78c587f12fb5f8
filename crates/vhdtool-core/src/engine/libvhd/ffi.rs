//! C layouts and entry point signatures of `libvhd`.
//!
//! libvhd keeps the header and footer inside the context in host byte order.
//! `vhd_footer_out` and `vhd_header_out` convert a copy back to the on-disk
//! big-endian layout, which is what the decoders in [`crate::vhd`] consume.

use std::os::raw::{c_char, c_int, c_void};

use crate::vhd::{FOOTER_SIZE, HEADER_SIZE, LOCATOR_SLOTS};

/// `vhd_parent_locator_t`
#[repr(C)]
#[derive(Debug, Clone, Copy)]
pub struct VhdParentLocator {
    pub code: u32,
    pub data_space: u32,
    pub data_len: u32,
    pub res: u32,
    pub data_offset: u64,
}

/// `vhd_header_t`
#[repr(C)]
#[derive(Clone, Copy)]
pub struct VhdHeader {
    pub cookie: [u8; 8],
    pub data_offset: u64,
    pub table_offset: u64,
    pub hdr_ver: u32,
    pub max_bat_size: u32,
    pub block_size: u32,
    pub checksum: u32,
    pub prt_uuid: [u8; 16],
    pub prt_ts: u32,
    pub res1: u32,
    pub prt_name: [u8; 512],
    pub loc: [VhdParentLocator; LOCATOR_SLOTS],
    pub res2: [u8; 256],
}

/// `vhd_footer_t`
#[repr(C)]
#[derive(Clone, Copy)]
pub struct VhdFooter {
    pub cookie: [u8; 8],
    pub features: u32,
    pub ff_version: u32,
    pub data_offset: u64,
    pub timestamp: u32,
    pub crtr_app: [u8; 4],
    pub crtr_ver: u32,
    pub crtr_os: u32,
    pub orig_size: u64,
    pub curr_size: u64,
    pub geometry: u32,
    pub disk_type: u32,
    pub checksum: u32,
    pub uuid: [u8; 16],
    pub saved: u8,
    pub hidden: u8,
    pub reserved: [u8; 426],
}

// Both records have no interior padding, so their bytes are exactly the
// on-disk layout once converted to big-endian.
const _: () = assert!(std::mem::size_of::<VhdHeader>() == HEADER_SIZE);
const _: () = assert!(std::mem::size_of::<VhdFooter>() == FOOTER_SIZE);

/// `vhd_bat_t`
#[repr(C)]
#[derive(Debug, Clone, Copy)]
pub struct VhdBat {
    pub spb: u32,
    pub entries: u32,
    pub bat: *mut u32,
}

/// `vhd_batmap_header_t`
#[repr(C)]
#[derive(Debug, Clone, Copy)]
pub struct VhdBatmapHeader {
    pub cookie: [u8; 8],
    pub batmap_offset: u64,
    pub batmap_size: u32,
    pub batmap_version: u32,
    pub checksum: u32,
}

/// `vhd_batmap_t`
#[repr(C)]
#[derive(Debug, Clone, Copy)]
pub struct VhdBatmap {
    pub header: VhdBatmapHeader,
    pub map: *mut c_char,
}

/// `struct list_head`
#[repr(C)]
#[derive(Debug, Clone, Copy)]
pub struct ListHead {
    pub next: *mut ListHead,
    pub prev: *mut ListHead,
}

/// `vhd_context_t`
///
/// `next` is a circular list head that libvhd points back into the context
/// itself, so an opened context must not move.
#[repr(C)]
pub struct VhdContext {
    pub fd: c_int,
    pub file: *mut c_char,
    pub oflags: c_int,
    pub is_block: c_int,
    pub spb: u32,
    pub bm_secs: u32,
    pub header: VhdHeader,
    pub footer: VhdFooter,
    pub bat: VhdBat,
    pub batmap: VhdBatmap,
    pub next: ListHead,
    pub custom_parent: *mut c_char,
}

impl VhdContext {
    /// An all-zero context, as libvhd expects before `vhd_open`.
    pub fn zeroed() -> Box<Self> {
        // SAFETY: every field is an integer, byte array or raw pointer, for
        // which the all-zero bit pattern is valid.
        Box::new(unsafe { std::mem::zeroed() })
    }
}

pub type VhdOpenFn = unsafe extern "C" fn(*mut VhdContext, *const c_char, c_int) -> c_int;
pub type VhdCloseFn = unsafe extern "C" fn(*mut VhdContext);
pub type VhdIoFn = unsafe extern "C" fn(*mut VhdContext, *mut c_char, u64, u32) -> c_int;
pub type VhdCreateFn = unsafe extern "C" fn(*const c_char, u64, c_int, u32) -> c_int;
pub type VhdChainDepthFn = unsafe extern "C" fn(*mut VhdContext, *mut c_int) -> c_int;
pub type VhdHeaderDecodeParentFn =
    unsafe extern "C" fn(*mut VhdContext, *mut VhdHeader, *mut *mut c_char) -> c_int;
pub type VhdFooterOutFn = unsafe extern "C" fn(*mut VhdFooter);
pub type VhdHeaderOutFn = unsafe extern "C" fn(*mut VhdHeader);
pub type VhdUtilCheckFn = unsafe extern "C" fn(c_int, *mut *mut c_char) -> c_int;
/// `vhd_util_coalesce_out` and `vhd_util_coalesce_ancestor`:
/// `(name, target, sparse, progress)`.
pub type VhdCoalesceToFn = unsafe extern "C" fn(*const c_char, *const c_char, c_int, c_int) -> c_int;
/// `vhd_util_coalesce_parent`: `(name, sparse, progress, step_parent)`.
pub type VhdCoalesceParentFn =
    unsafe extern "C" fn(*const c_char, c_int, c_int, *const c_char) -> c_int;

extern "C" {
    /// Releases strings libvhd allocates on our behalf.
    pub fn free(ptr: *mut c_void);
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::mem::offset_of;

    #[test]
    fn test_footer_field_offsets() {
        assert_eq!(offset_of!(VhdFooter, data_offset), 16);
        assert_eq!(offset_of!(VhdFooter, orig_size), 40);
        assert_eq!(offset_of!(VhdFooter, checksum), 64);
        assert_eq!(offset_of!(VhdFooter, uuid), 68);
        assert_eq!(offset_of!(VhdFooter, reserved), 86);
    }

    #[test]
    fn test_header_field_offsets() {
        assert_eq!(offset_of!(VhdHeader, checksum), 36);
        assert_eq!(offset_of!(VhdHeader, prt_name), 64);
        assert_eq!(offset_of!(VhdHeader, loc), 576);
        assert_eq!(offset_of!(VhdHeader, res2), 768);
        assert_eq!(std::mem::size_of::<VhdParentLocator>(), 24);
    }
}
