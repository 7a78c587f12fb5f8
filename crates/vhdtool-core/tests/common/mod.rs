//! Shared test fixtures: an in-memory engine and on-disk record builders.

#![allow(dead_code)]

use std::cell::RefCell;
use std::collections::{BTreeSet, HashMap};
use std::io::Write;
use std::path::{Path, PathBuf};
use std::rc::Rc;

use vhdtool_core::buffer::AlignedBuffer;
use vhdtool_core::engine::{
    CheckOptions, CoalesceTarget, CreateFlags, DiskType, OpenFlags, VhdEngine, VhdHandle,
};
use vhdtool_core::vhd::{FOOTER_SIZE, HEADER_SIZE, SECTOR_SIZE};
use vhdtool_core::{EngineError, Error, Result};

pub const SECTOR: usize = SECTOR_SIZE as usize;

const EINVAL: i32 = 22;
const ENOENT: i32 = 2;
const EIO: i32 = 5;
const EROFS: i32 = 30;
const EEXIST: i32 = 17;

fn engine_error(operation: &'static str, errno: i32) -> Error {
    EngineError::new(operation, -errno, Some(errno)).into()
}

pub fn write_be_u32(buf: &mut [u8], offset: usize, value: u32) {
    buf[offset..offset + 4].copy_from_slice(&value.to_be_bytes());
}

pub fn write_be_u64(buf: &mut [u8], offset: usize, value: u64) {
    buf[offset..offset + 8].copy_from_slice(&value.to_be_bytes());
}

/// One's complement byte sum with the checksum field treated as zero.
pub fn vhd_checksum(raw: &[u8], checksum_offset: usize) -> u32 {
    let mut sum = 0u32;
    for (i, b) in raw.iter().enumerate() {
        if (checksum_offset..checksum_offset + 4).contains(&i) {
            continue;
        }
        sum = sum.wrapping_add(*b as u32);
    }
    !sum
}

pub fn make_vhd_footer(virtual_size: u64, disk_type: u32, data_offset: u64) -> [u8; FOOTER_SIZE] {
    let mut footer = [0u8; FOOTER_SIZE];
    footer[0..8].copy_from_slice(b"conectix");
    write_be_u32(&mut footer, 8, 2); // features
    write_be_u32(&mut footer, 12, 0x0001_0000); // file_format_version
    write_be_u64(&mut footer, 16, data_offset);
    write_be_u32(&mut footer, 24, 86_400); // one day after the VHD epoch
    footer[28..32].copy_from_slice(b"tap ");
    write_be_u32(&mut footer, 32, 0x0001_0003); // creator_version
    write_be_u32(&mut footer, 36, 0x5769_326B); // "Wi2k"
    write_be_u64(&mut footer, 40, virtual_size); // original_size
    write_be_u64(&mut footer, 48, virtual_size); // current_size
    write_be_u32(&mut footer, 56, (1024 << 16) | (16 << 8) | 63);
    write_be_u32(&mut footer, 60, disk_type);
    footer[68..84].copy_from_slice(&[
        0x55, 0x0e, 0x84, 0x00, 0xe2, 0x9b, 0x41, 0xd4, 0xa7, 0x16, 0x44, 0x66, 0x55, 0x44, 0x00,
        0x00,
    ]);
    let checksum = vhd_checksum(&footer, 64);
    write_be_u32(&mut footer, 64, checksum);
    footer
}

/// A populated locator slot: `(platform code, data length, data offset)`.
pub type Locator = (u32, u32, u64);

pub fn make_vhd_header(
    max_table_entries: u32,
    parent_name: Option<&str>,
    locators: &[(usize, Locator)],
) -> [u8; HEADER_SIZE] {
    let mut header = [0u8; HEADER_SIZE];
    header[0..8].copy_from_slice(b"cxsparse");
    write_be_u64(&mut header, 8, u64::MAX);
    write_be_u64(&mut header, 16, 1536); // table_offset
    write_be_u32(&mut header, 24, 0x0001_0000);
    write_be_u32(&mut header, 28, max_table_entries);
    write_be_u32(&mut header, 32, 2 * 1024 * 1024);
    if let Some(name) = parent_name {
        header[40..56].copy_from_slice(&[0xAB; 16]);
        write_be_u32(&mut header, 56, 3_600);
        for (i, unit) in name.encode_utf16().enumerate() {
            let at = 64 + i * 2;
            header[at..at + 2].copy_from_slice(&unit.to_be_bytes());
        }
    }
    for &(slot, (code, len, offset)) in locators {
        let at = 576 + slot * 24;
        write_be_u32(&mut header, at, code);
        write_be_u32(&mut header, at + 4, 512);
        write_be_u32(&mut header, at + 8, len);
        write_be_u64(&mut header, at + 16, offset);
    }
    let checksum = vhd_checksum(&header, 36);
    write_be_u32(&mut header, 36, checksum);
    header
}

/// A byte pattern that is non-zero in every sector.
pub fn pattern(len: usize) -> Vec<u8> {
    (0..len).map(|i| (i % 251) as u8 + 1).collect()
}

pub fn write_file(dir: &Path, name: &str, data: &[u8]) -> PathBuf {
    let path = dir.join(name);
    let mut file = std::fs::File::create(&path).expect("Failed to create test file");
    file.write_all(data).expect("Failed to write test data");
    path
}

/// An engine call recorded by [`MemoryEngine`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Call {
    Create {
        path: PathBuf,
        size: u64,
        disk_type: DiskType,
    },
    Open {
        path: PathBuf,
        flags: OpenFlags,
    },
    Read {
        start: u64,
        count: u32,
    },
    Write {
        start: u64,
        count: u32,
    },
    Close,
    Check {
        args: Vec<String>,
    },
    Coalesce {
        path: PathBuf,
        target: CoalesceTarget,
        sparse: bool,
    },
}

/// A container held in memory.
#[derive(Debug, Clone)]
pub struct Disk {
    pub disk_type: DiskType,
    pub data: Vec<u8>,
    /// Sectors that received at least one write.
    pub allocated: BTreeSet<u64>,
    pub parent: Option<String>,
}

#[derive(Default)]
struct State {
    disks: HashMap<PathBuf, Disk>,
    calls: Vec<Call>,
    fail_create: bool,
    /// Zero-based index of the write call that fails with EIO.
    fail_write: Option<usize>,
    /// Zero-based index of the read call that fails with EIO.
    fail_read: Option<usize>,
    fail_parent_name: bool,
    writes: usize,
    reads: usize,
}

/// An in-memory engine that records every call it receives.
#[derive(Clone, Default)]
pub struct MemoryEngine {
    state: Rc<RefCell<State>>,
}

impl MemoryEngine {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&self, path: &Path, disk: Disk) {
        self.state.borrow_mut().disks.insert(path.to_path_buf(), disk);
    }

    pub fn disk(&self, path: &Path) -> Option<Disk> {
        self.state.borrow().disks.get(path).cloned()
    }

    pub fn calls(&self) -> Vec<Call> {
        self.state.borrow().calls.clone()
    }

    pub fn write_calls(&self) -> Vec<(u64, u32)> {
        self.calls()
            .into_iter()
            .filter_map(|call| match call {
                Call::Write { start, count } => Some((start, count)),
                _ => None,
            })
            .collect()
    }

    pub fn fail_create(&self) {
        self.state.borrow_mut().fail_create = true;
    }

    pub fn fail_write(&self, index: usize) {
        self.state.borrow_mut().fail_write = Some(index);
    }

    pub fn fail_read(&self, index: usize) {
        self.state.borrow_mut().fail_read = Some(index);
    }

    pub fn fail_parent_name(&self) {
        self.state.borrow_mut().fail_parent_name = true;
    }

    fn record(&self, call: Call) {
        self.state.borrow_mut().calls.push(call);
    }
}

impl VhdEngine for MemoryEngine {
    type Handle = MemoryHandle;

    fn create(
        &self,
        path: &Path,
        size_bytes: u64,
        disk_type: DiskType,
        _flags: CreateFlags,
    ) -> Result<()> {
        self.record(Call::Create {
            path: path.to_path_buf(),
            size: size_bytes,
            disk_type,
        });
        let mut state = self.state.borrow_mut();
        if state.fail_create || state.disks.contains_key(path) {
            return Err(engine_error("vhd_create", EEXIST));
        }
        if size_bytes % SECTOR_SIZE != 0 {
            return Err(engine_error("vhd_create", EINVAL));
        }
        state.disks.insert(
            path.to_path_buf(),
            Disk {
                disk_type,
                data: vec![0u8; size_bytes as usize],
                allocated: BTreeSet::new(),
                parent: None,
            },
        );
        Ok(())
    }

    fn open(&self, path: &Path, flags: OpenFlags) -> Result<MemoryHandle> {
        self.record(Call::Open {
            path: path.to_path_buf(),
            flags,
        });
        if !self.state.borrow().disks.contains_key(path) {
            return Err(engine_error("vhd_open", ENOENT));
        }
        Ok(MemoryHandle {
            engine: self.clone(),
            path: path.to_path_buf(),
            writable: flags.contains(OpenFlags::RDWR),
        })
    }

    fn check(&self, path: &Path, options: &CheckOptions) -> Result<()> {
        self.record(Call::Check {
            args: options.to_args(path),
        });
        Ok(())
    }

    fn coalesce(&self, path: &Path, target: &CoalesceTarget, sparse: bool) -> Result<()> {
        self.record(Call::Coalesce {
            path: path.to_path_buf(),
            target: target.clone(),
            sparse,
        });
        Ok(())
    }
}

pub struct MemoryHandle {
    engine: MemoryEngine,
    path: PathBuf,
    writable: bool,
}

impl MemoryHandle {
    fn with_disk<T>(&self, f: impl FnOnce(&mut Disk) -> T) -> T {
        let mut state = self.engine.state.borrow_mut();
        let disk = state
            .disks
            .get_mut(&self.path)
            .expect("open handle refers to a missing disk");
        f(disk)
    }

    fn span(&self, buf_len: usize, start: u64, count: u32, op: &'static str) -> Result<std::ops::Range<usize>> {
        let begin = start as usize * SECTOR;
        let len = count as usize * SECTOR;
        let size = self.with_disk(|d| d.data.len());
        if len > buf_len || begin + len > size {
            return Err(engine_error(op, EINVAL));
        }
        Ok(begin..begin + len)
    }
}

impl VhdHandle for MemoryHandle {
    fn read(&mut self, buf: &mut AlignedBuffer, start_sector: u64, num_sectors: u32) -> Result<()> {
        self.engine.record(Call::Read {
            start: start_sector,
            count: num_sectors,
        });
        assert_eq!(buf.as_ptr() as usize % SECTOR, 0, "engine requires aligned buffers");
        {
            let mut state = self.engine.state.borrow_mut();
            let index = state.reads;
            state.reads += 1;
            if state.fail_read == Some(index) {
                return Err(engine_error("vhd_io_read", EIO));
            }
        }
        let range = self.span(buf.len(), start_sector, num_sectors, "vhd_io_read")?;
        let len = range.len();
        let data = self.with_disk(|d| d.data[range].to_vec());
        buf.slice_mut(0, Some(len))?.copy_from_slice(&data);
        Ok(())
    }

    fn write(&mut self, buf: &AlignedBuffer, start_sector: u64, num_sectors: u32) -> Result<()> {
        self.engine.record(Call::Write {
            start: start_sector,
            count: num_sectors,
        });
        assert_eq!(buf.as_ptr() as usize % SECTOR, 0, "engine requires aligned buffers");
        if !self.writable {
            return Err(engine_error("vhd_io_write", EROFS));
        }
        {
            let mut state = self.engine.state.borrow_mut();
            let index = state.writes;
            state.writes += 1;
            if state.fail_write == Some(index) {
                return Err(engine_error("vhd_io_write", EIO));
            }
        }
        let range = self.span(buf.len(), start_sector, num_sectors, "vhd_io_write")?;
        let data = buf.read(0, Some(range.len()))?;
        self.with_disk(|d| {
            d.data[range].copy_from_slice(&data);
            d.allocated
                .extend(start_sector..start_sector + u64::from(num_sectors));
        });
        Ok(())
    }

    fn footer_bytes(&self) -> [u8; FOOTER_SIZE] {
        self.with_disk(|d| {
            let data_offset = if d.disk_type.has_header() { 512 } else { u64::MAX };
            make_vhd_footer(d.data.len() as u64, d.disk_type.code(), data_offset)
        })
    }

    fn header_bytes(&self) -> [u8; HEADER_SIZE] {
        self.with_disk(|d| {
            let entries = (d.data.len() as u64).div_ceil(2 * 1024 * 1024) as u32;
            match &d.parent {
                Some(parent) => {
                    let len = (parent.len() * 2) as u32;
                    make_vhd_header(
                        entries,
                        Some(parent),
                        &[(0, (0x5732_6B75, len, 4096)), (2, (0x5732_7275, len, 8192))],
                    )
                }
                None => make_vhd_header(entries, None, &[]),
            }
        })
    }

    fn parent_name(&self) -> Result<String> {
        if self.engine.state.borrow().fail_parent_name {
            return Err(engine_error("vhd_header_decode_parent", EINVAL));
        }
        Ok(self.with_disk(|d| d.parent.clone().unwrap_or_default()))
    }

    fn chain_depth(&self) -> Result<u32> {
        Ok(if self.with_disk(|d| d.parent.is_some()) { 2 } else { 1 })
    }

    fn close(self) -> Result<()> {
        self.engine.record(Call::Close);
        Ok(())
    }
}
