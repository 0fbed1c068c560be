//! Environment fingerprint embedded in the snapshot file header
//!
//! A snapshot written by one build is not guaranteed to be readable by
//! another: object layouts follow the crate version, and debug builds
//! may disagree with release builds. The fingerprint captures the
//! identity of the producing build; the reader compares it against its
//! own on open and rejects mismatches.

use serde::{Deserialize, Serialize};
use std::fmt;

/// On-disk format version. Bumped whenever the record layout changes.
pub const FORMAT_VERSION: u32 = 1;

/// Identity of the build that produced a snapshot file.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EnvironmentFingerprint {
    /// Snapshot format version.
    pub format_version: u32,
    /// Producing crate version (compile-time).
    pub package_version: String,
    /// Whether the build had debug assertions enabled.
    pub debug_assertions: bool,
    /// Target operating system.
    pub target_os: String,
    /// Target architecture.
    pub target_arch: String,
    /// Pointer width in bits.
    pub pointer_width: u32,
}

impl EnvironmentFingerprint {
    /// The fingerprint of the running build.
    pub fn current() -> Self {
        Self {
            format_version: FORMAT_VERSION,
            package_version: env!("CARGO_PKG_VERSION").to_string(),
            debug_assertions: cfg!(debug_assertions),
            target_os: std::env::consts::OS.to_string(),
            target_arch: std::env::consts::ARCH.to_string(),
            pointer_width: (std::mem::size_of::<usize>() * 8) as u32,
        }
    }
}

impl fmt::Display for EnvironmentFingerprint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "v{} {} debug={} {}/{} {}bit",
            self.format_version,
            self.package_version,
            self.debug_assertions,
            self.target_os,
            self.target_arch,
            self.pointer_width
        )
    }
}
