//! Input side of the loader: discovering log files and streaming their lines.

pub mod compression;
pub mod listing;
pub mod reader;

pub use compression::{CompressionCodec, codec_for_path};
pub use listing::{dot_rename, is_processed, list_files};
pub use reader::{LineReader, ReadSummary, open_lines, pump_lines};
