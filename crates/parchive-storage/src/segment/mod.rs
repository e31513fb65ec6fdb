//! Archived Segment Format
//!
//! Binary layout of a parameter group segment once it reaches the object
//! store. The layout is columnar: one time column shared by all parameters,
//! then one value column per parameter, each stored as its own block so a
//! reader interested in one parameter decompresses only two blocks.
//!
//! ## Segment File Structure
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │ Header (48 bytes)                                           │
//! │ - Magic bytes: "PARC" (4 bytes)                            │
//! │ - Version: 1 (2 bytes)                                      │
//! │ - Compression: None/Lz4 (2 bytes)                          │
//! │ - Group id (4 bytes)                                        │
//! │ - Interval (8 bytes)                                        │
//! │ - Start timestamp (8 bytes)                                 │
//! │ - End timestamp (8 bytes)                                   │
//! │ - Sample count (4 bytes)                                    │
//! │ - Parameter count (4 bytes)                                 │
//! │ - Reserved (4 bytes)                                        │
//! ├─────────────────────────────────────────────────────────────┤
//! │ Parameter ids (4 bytes each)                                │
//! ├─────────────────────────────────────────────────────────────┤
//! │ Time block: length (4 bytes) + block                        │
//! │ - Timestamp deltas from the start (varint, signed)          │
//! ├─────────────────────────────────────────────────────────────┤
//! │ Value block per parameter: length (4 bytes) + block         │
//! │ - Per sample: type tag (1 byte) + payload                   │
//! ├─────────────────────────────────────────────────────────────┤
//! │ Footer (8 bytes)                                            │
//! │ - CRC32 checksum of everything above (4 bytes)              │
//! │ - Magic bytes: "PARC" again (4 bytes)                      │
//! └─────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Value Payloads
//!
//! | Tag | Type    | Payload                         |
//! |-----|---------|---------------------------------|
//! | 0   | Float64 | 8 bytes, big endian             |
//! | 1   | Float32 | 4 bytes, big endian             |
//! | 2   | Int64   | varint, ZigZag                  |
//! | 3   | UInt64  | varint                          |
//! | 4   | Bool    | 1 byte                          |
//! | 5   | String  | varint length + UTF-8 bytes     |
//! | 6   | Binary  | varint length + bytes           |
//!
//! Blocks are LZ4 compressed (size prepended) when the header says so.
//!
//! ## Usage
//!
//! ```ignore
//! let bytes = SegmentEncoder::new(Compression::Lz4).encode(&segment)?;
//!
//! let decoder = SegmentDecoder::new(bytes)?;
//! let view = decoder.column(parameter_id)?;
//! ```

mod reader;
mod writer;

pub use reader::SegmentDecoder;
pub use writer::SegmentEncoder;

/// Magic bytes for segment files: "PARC"
pub const SEGMENT_MAGIC: [u8; 4] = [0x50, 0x41, 0x52, 0x43];

/// Version number for the segment format
pub const SEGMENT_VERSION: u16 = 1;

/// Segment header size (48 bytes)
pub const HEADER_SIZE: usize = 48;

/// Segment footer size (8 bytes)
pub const FOOTER_SIZE: usize = 8;
