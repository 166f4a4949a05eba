//! 清晰度代码 → 展示名称

/// B 站清晰度代码表
const QUALITY_NAMES: [(u32, &str); 11] = [
    (127, "8K"),
    (126, "Dolby Vision"),
    (125, "HDR"),
    (120, "4K"),
    (116, "1080P60"),
    (112, "1080P+"),
    (80, "1080P"),
    (74, "720P60"),
    (64, "720P"),
    (32, "480P"),
    (16, "360P"),
];

/// 未收录的代码返回 `{code}P`，0 返回空字符串
pub fn resolve_quality(code: u32) -> String {
    if code == 0 {
        return String::new();
    }
    QUALITY_NAMES
        .iter()
        .find(|(c, _)| *c == code)
        .map(|(_, name)| name.to_string())
        .unwrap_or_else(|| format!("{}P", code))
}

/// 部分缓存以纯数字目录名表示清晰度（如 `.../80/video.m4s`）
pub fn quality_from_dir_name(name: &str) -> Option<u32> {
    name.parse::<u32>().ok().filter(|code| *code > 0)
}
