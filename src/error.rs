//! Error types for the cache and allocation substrate.

use std::fmt;

/// Errors surfaced by the `Allocator` trait and the budget managers.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AllocError {
    /// The device has no more physical VRAM to satisfy the request.
    OutOfDeviceMemory,
    /// The host has no more memory to satisfy the request.
    OutOfHostMemory,
    /// The allocation would exceed a strict budget.
    OverBudget,
    /// The allocation request was malformed (zero size, bad usage flags, ...).
    InvalidParameters(String),
    /// Mapping a host-visible allocation failed.
    MappingFailed(String),
    /// Catch-all for backend-specific failures.
    Unknown(String),
}

impl fmt::Display for AllocError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::OutOfDeviceMemory => write!(f, "out of device memory"),
            Self::OutOfHostMemory => write!(f, "out of host memory"),
            Self::OverBudget => write!(f, "allocation would exceed strict budget"),
            Self::InvalidParameters(msg) => write!(f, "invalid allocation parameters: {msg}"),
            Self::MappingFailed(msg) => write!(f, "mapping failed: {msg}"),
            Self::Unknown(msg) => write!(f, "allocator error: {msg}"),
        }
    }
}

impl std::error::Error for AllocError {}

/// Errors raised while constructing or managing a cached resource.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CacheError {
    /// The underlying `Create` call failed; the wrapped message comes from
    /// the concrete cache (I/O, shader compilation, Vulkan object creation).
    CreateFailed(String),
    /// An allocation required for construction failed.
    Alloc(AllocError),
    /// `insert(key, params)` was called with a value of the wrong type.
    TypeMismatch,
    /// A cache instance was asked to serve a second, different device.
    DeviceMismatch,
}

impl fmt::Display for CacheError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::CreateFailed(msg) => write!(f, "resource construction failed: {msg}"),
            Self::Alloc(e) => write!(f, "allocation failed during construction: {e}"),
            Self::TypeMismatch => write!(f, "creation parameters type mismatch"),
            Self::DeviceMismatch => write!(f, "cache instance is bound to a different device"),
        }
    }
}

impl std::error::Error for CacheError {}

impl From<AllocError> for CacheError {
    fn from(e: AllocError) -> Self {
        Self::Alloc(e)
    }
}

/// Errors raised while loading or saving persisted cache state.
///
/// These are always non-fatal: a failed load leaves the cache empty, a
/// failed save is logged and reflected in the returned `bool`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SerializationError {
    /// The backing file could not be opened.
    Io(String),
    /// The file was shorter than its declared contents required.
    UnexpectedEof,
    /// The format-version word did not match what this build understands.
    BadVersion { expected: u32, found: u32 },
    /// The backing file's bytes didn't correspond to a valid entry body.
    Corrupt(String),
}

impl fmt::Display for SerializationError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Io(msg) => write!(f, "I/O error: {msg}"),
            Self::UnexpectedEof => write!(f, "unexpected end of file"),
            Self::BadVersion { expected, found } => {
                write!(f, "bad format version: expected {expected}, found {found}")
            }
            Self::Corrupt(msg) => write!(f, "corrupt cache file: {msg}"),
        }
    }
}

impl std::error::Error for SerializationError {}
