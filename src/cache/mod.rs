//! 缓存发现与元数据提取

pub mod parser;
pub mod quality;
pub mod scanner;
pub mod walker;

pub use parser::{parse_technical_descriptor, parse_title_descriptor, CachedVideo};
pub use quality::resolve_quality;
pub use scanner::{ScanControl, ScanError, ScanEvent, ScanOptions, ScanSession, ScanState, Scanner};
pub use walker::{CacheWalker, WalkOptions};
