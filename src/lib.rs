//! A library for extracting files from
//! [InstallShield](https://en.wikipedia.org/wiki/InstallShield) cabinet sets:
//! the `data1.hdr`, `data1.cab`, `data2.cab`, ... files that installers ship
//! their payload in.
//!
//! A set is opened from the path of any of its volumes.  File data may be
//! raw-deflate compressed, lightly obfuscated, split across volumes, or
//! shared between several file entries; all of that is handled when a file
//! is extracted.
//!
//! ```no_run
//! use iscab::{ExtractOptions, VolumeSet};
//!
//! let set = VolumeSet::open("disk1/data1.hdr").unwrap();
//! for index in 0..set.file_count() {
//!     if set.file_is_valid(index) {
//!         println!("{}", set.file_name(index).unwrap());
//!     }
//! }
//! let report = set.extract_all("out", &ExtractOptions::new()).unwrap();
//! assert!(report.success());
//! ```

#![warn(missing_docs)]

#[macro_use]
mod macros;

mod cancel;
mod checksum;
mod consts;
mod descriptor;
mod error;
mod extract;
mod group;
mod header;
mod index;
mod inflate;
mod obfuscation;
mod reader;
mod string;
mod volume;

pub use crate::cancel::CancellationToken;
pub use crate::descriptor::FileDescriptor;
pub use crate::error::{ExtractError, Result};
pub use crate::extract::{ExtractOptions, ExtractReport, FileOutcome};
pub use crate::group::{Component, Components, FileGroup, FileGroups};
pub use crate::header::{CommonHeader, VolumeHeader};
pub use crate::index::DescriptorIndex;
pub use crate::inflate::{read_chunk, ChunkDecompressor, InflateMode};
pub use crate::obfuscation::{deobfuscate, obfuscate};
pub use crate::reader::{ReaderState, VolumeReader};
pub use crate::volume::{
    probe_first_existing, volume_candidates, volume_pattern, Volume,
    VolumeKind, VolumeSet, Volumes,
};
