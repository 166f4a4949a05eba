//! 输出文件命名

pub mod conflict;
pub mod output;

pub use conflict::{resolve_output_path, ConflictError, ConflictStrategy};
pub use output::{output_path, sanitize_filename};
