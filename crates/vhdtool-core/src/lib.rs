//! vhdtool Core Library
//!
//! This crate moves disk data between flat raw images and sparse VHD
//! containers, and decodes a container's on-disk metadata.
//!
//! # Overview
//!
//! Everything that understands a container's allocation table, bitmaps and
//! parent chain belongs to an external engine, reached through the
//! [`engine::VhdEngine`] and [`engine::VhdHandle`] traits. The production
//! engine binds the native `libvhd` at runtime. This crate implements what
//! sits around it: aligned I/O staging, sparse run detection, the streaming
//! conversion pipeline and the footer/header codec.
//!
//! # Modules
//!
//! - [`error`] - Error types and Result alias
//! - [`buffer`] - Aligned scratch buffers for engine I/O
//! - [`vhd`] - Footer, header, locator and version decoding
//! - [`sparse`] - Non-zero sector run detection
//! - [`raw`] - Memory-mapped raw image reader
//! - [`engine`] - The engine seam and its libvhd binding
//! - [`convert`] - Raw to container and container to raw conversion
//! - [`inspect`] - Read-only metadata inspection
//! - [`ops`] - Create, check and coalesce
//!
//! # Quick Start
//!
//! ```no_run
//! use vhdtool_core::engine::libvhd::{LibvhdConfig, LibvhdEngine};
//! use vhdtool_core::{raw_to_container, ConvertOptions};
//! use std::path::Path;
//!
//! let engine = LibvhdEngine::load(&LibvhdConfig::default()).unwrap();
//! raw_to_container(
//!     &engine,
//!     Path::new("disk.img"),
//!     Path::new("disk.vhd"),
//!     &ConvertOptions::sparse(),
//!     None,
//! )
//! .unwrap();
//! ```

pub mod buffer;
pub mod convert;
pub mod engine;
pub mod error;
pub mod inspect;
pub mod ops;
pub mod raw;
pub mod sparse;
pub mod vhd;

pub use error::{EngineError, Error, Result};

// Re-export the conversion pipeline for convenience
pub use convert::{
    container_to_raw, raw_to_container, ConversionPhase, ConversionProgress, ConversionSummary,
    ConvertOptions, ProgressCallback, DEFAULT_CHUNK_SECTORS,
};

pub use buffer::AlignedBuffer;
pub use engine::{CheckOptions, CoalesceTarget, CreateFlags, OpenFlags, VhdEngine, VhdHandle};
pub use inspect::{inspect, inspect_with, ContainerInfo, DEFAULT_INSPECT_FLAGS};
pub use vhd::{DiskType, DiskVersion, FooterRecord, HeaderRecord, LocatorEntry, ParentName};
