//! 用户配置

pub mod preferences;

pub use preferences::{
    get_config_path, load_config, resolve_ffmpeg_path, resolve_mp4box_path, save_config, AppConfig,
};
