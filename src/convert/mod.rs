//! 合并与导出

pub mod export;
pub mod merge;

pub use export::{export_with, ExportError, ExportEvent, ExportJob, ExportResult, ExportSession, Exporter};
pub use merge::{ConvertError, Merger, Mp4BoxMerger};
