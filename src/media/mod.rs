//! Everything that touches the external media toolchain or the filesystem
//! on behalf of a run.

pub mod extractor;
pub mod tools;
pub mod workspace;

pub use extractor::{ExtractedAudio, ExtractedFrame, MediaExtractor};
pub use tools::{find_in_path, MediaTools};
pub use workspace::{CleanupReport, RunWorkspace};
