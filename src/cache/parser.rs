//! 解析 B 站缓存 sidecar 文件（index.json / entry.json）
//! 字段缺失或类型不符时退回默认值，从不报错

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::path::PathBuf;

pub const VIDEO_SEGMENT: &str = "video.m4s";
pub const AUDIO_SEGMENT: &str = "audio.m4s";
/// 分段技术信息（分辨率、帧率）
pub const TECHNICAL_DESCRIPTOR: &str = "index.json";
/// 标题信息，通常位于分段目录的上一级或上两级
pub const TITLE_DESCRIPTOR: &str = "entry.json";
pub const COVER_IMAGE: &str = "cover.jpg";

pub const UNKNOWN_TITLE: &str = "Unknown Title";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CachedVideo {
    /// 同时包含 video.m4s 与 audio.m4s 的目录（本地路径或设备端路径）
    #[serde(serialize_with = "path_to_string", deserialize_with = "string_to_path")]
    pub folder_path: PathBuf,
    #[serde(serialize_with = "path_to_string", deserialize_with = "string_to_path")]
    pub video_path: PathBuf,
    #[serde(serialize_with = "path_to_string", deserialize_with = "string_to_path")]
    pub audio_path: PathBuf,
    pub title: String,
    /// 分 P 标题
    pub part_title: String,
    /// 两个分段的大小之和（MB）
    pub size_mb: f64,
    pub bvid: String,
    /// 清晰度描述，如 1080P、4K
    pub quality: String,
    /// `{width}×{height}`
    pub resolution: String,
    pub frame_rate: String,
    /// 本地封面文件
    pub cover_path: Option<PathBuf>,
}

fn path_to_string<S>(path: &PathBuf, s: S) -> Result<S::Ok, S::Error>
where
    S: serde::Serializer,
{
    s.serialize_str(&path.display().to_string())
}

fn string_to_path<'de, D>(d: D) -> Result<PathBuf, D::Error>
where
    D: serde::Deserializer<'de>,
{
    let st = String::deserialize(d)?;
    Ok(PathBuf::from(st))
}

impl CachedVideo {
    pub fn display_title(&self) -> String {
        if !self.part_title.is_empty() && self.part_title != self.title {
            format!("{} - {}", self.title, self.part_title)
        } else {
            self.title.clone()
        }
    }

    pub fn size_display(&self) -> String {
        if self.size_mb >= 1024.0 {
            format!("{:.2} GB", self.size_mb / 1024.0)
        } else {
            format!("{:.1} MB", self.size_mb)
        }
    }

    /// 分辨率 · 帧率 · 清晰度，省略空项
    pub fn tech_info(&self) -> String {
        let mut parts = Vec::with_capacity(3);
        if !self.resolution.is_empty() {
            parts.push(self.resolution.clone());
        }
        if !self.frame_rate.is_empty() {
            parts.push(format!("{}fps", self.frame_rate));
        }
        if !self.quality.is_empty() {
            parts.push(self.quality.clone());
        }
        parts.join(" · ")
    }
}

pub fn bytes_to_mb(bytes: u64) -> f64 {
    bytes as f64 / (1024.0 * 1024.0)
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TechnicalDescriptor {
    pub resolution: String,
    pub frame_rate: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TitleDescriptor {
    pub title: String,
    pub bvid: String,
    pub part_title: String,
    pub quality_code: u32,
}

/// 解析 index.json：取 `video[0]` 的宽高与帧率
///
/// `video` 不是非空数组、首元素不是对象、宽高不是数字时，两项均为空。
/// 宽高缺失或为 0 时仅分辨率为空。
pub fn parse_technical_descriptor(data: &Value) -> TechnicalDescriptor {
    let Some(first) = data
        .get("video")
        .and_then(Value::as_array)
        .and_then(|list| list.first())
        .and_then(Value::as_object)
    else {
        return TechnicalDescriptor::default();
    };

    let dimension = |key: &str| -> Result<Option<u64>, ()> {
        match first.get(key) {
            None | Some(Value::Null) => Ok(None),
            Some(v) => whole_number(v).map(Some).ok_or(()),
        }
    };
    let (Ok(width), Ok(height)) = (dimension("width"), dimension("height")) else {
        return TechnicalDescriptor::default();
    };

    let resolution = match (width, height) {
        (Some(w), Some(h)) if w > 0 && h > 0 => format!("{}×{}", w, h),
        _ => String::new(),
    };
    let frame_rate = first
        .get("frame_rate")
        .and_then(number_or_numeric_string)
        .map(format_frame_rate)
        .unwrap_or_default();

    TechnicalDescriptor {
        resolution,
        frame_rate,
    }
}

/// 无 entry.json 时的标题：顶层目录名，为空时用 `Unknown Title`
pub fn fallback_title(folder_name: &str) -> &str {
    if folder_name.trim().is_empty() {
        UNKNOWN_TITLE
    } else {
        folder_name
    }
}

/// 解析 entry.json；`fallback_title` 为未提供标题时的默认值
pub fn parse_title_descriptor(data: &Value, fallback_title: &str) -> TitleDescriptor {
    let text = |v: Option<&Value>| v.and_then(Value::as_str).map(str::to_string);

    TitleDescriptor {
        title: text(data.get("title")).unwrap_or_else(|| fallback_title.to_string()),
        bvid: text(data.get("bvid")).unwrap_or_default(),
        part_title: text(data.get("page_data").and_then(|p| p.get("part"))).unwrap_or_default(),
        quality_code: data
            .get("quality")
            .and_then(Value::as_u64)
            .and_then(|q| u32::try_from(q).ok())
            .unwrap_or(0),
    }
}

/// 整数帧率输出整数，否则保留一位小数
pub fn format_frame_rate(fps: f64) -> String {
    if fps.fract() == 0.0 {
        format!("{:.0}", fps)
    } else {
        format!("{:.1}", fps)
    }
}

fn whole_number(v: &Value) -> Option<u64> {
    v.as_u64().or_else(|| {
        v.as_f64()
            .filter(|f| f.is_finite() && *f >= 0.0 && f.fract() == 0.0)
            .map(|f| f as u64)
    })
}

fn number_or_numeric_string(v: &Value) -> Option<f64> {
    let fps = match v {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => s.trim().parse::<f64>().ok(),
        _ => None,
    }?;
    (fps.is_finite() && fps > 0.0).then_some(fps)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn record() -> CachedVideo {
        CachedVideo {
            folder_path: PathBuf::from("/x/80"),
            video_path: PathBuf::from("/x/80/video.m4s"),
            audio_path: PathBuf::from("/x/80/audio.m4s"),
            title: "标题".into(),
            part_title: String::new(),
            size_mb: 12.34,
            bvid: String::new(),
            quality: String::new(),
            resolution: String::new(),
            frame_rate: String::new(),
            cover_path: None,
        }
    }

    #[test]
    fn test_technical_descriptor() {
        let data = json!({"video": [{"width": 1920, "height": 1080, "frame_rate": "30.000"}]});
        let t = parse_technical_descriptor(&data);
        assert_eq!(t.resolution, "1920×1080");
        assert_eq!(t.frame_rate, "30");

        let data = json!({"video": [{"width": 1280, "height": 720, "frame_rate": 23.976}]});
        assert_eq!(parse_technical_descriptor(&data).frame_rate, "24.0");
    }

    #[test]
    fn test_technical_descriptor_degrades() {
        let empty = TechnicalDescriptor::default();
        assert_eq!(parse_technical_descriptor(&json!({})), empty);
        assert_eq!(parse_technical_descriptor(&json!({"video": []})), empty);
        assert_eq!(parse_technical_descriptor(&json!({"video": "x"})), empty);
        assert_eq!(parse_technical_descriptor(&json!({"video": [1]})), empty);
        assert_eq!(
            parse_technical_descriptor(&json!({"video": [{"width": "wide", "height": 1080, "frame_rate": 30}]})),
            empty
        );
        assert_eq!(parse_technical_descriptor(&json!([1, 2])), empty);
    }

    #[test]
    fn test_technical_descriptor_partial() {
        let t = parse_technical_descriptor(&json!({"video": [{"width": 0, "height": 1080, "frame_rate": "abc"}]}));
        assert_eq!(t, TechnicalDescriptor::default());

        let t = parse_technical_descriptor(&json!({"video": [{"frame_rate": 60}]}));
        assert_eq!(t.resolution, "");
        assert_eq!(t.frame_rate, "60");
    }

    #[test]
    fn test_format_frame_rate() {
        assert_eq!(format_frame_rate(30.0), "30");
        assert_eq!(format_frame_rate(23.976), "24.0");
        assert_eq!(format_frame_rate(29.97), "30.0");
        assert_eq!(format_frame_rate(59.94), "59.9");
    }

    #[test]
    fn test_title_descriptor() {
        let data = json!({
            "title": "合集",
            "bvid": "BV1xx411c7mD",
            "page_data": {"page": 2, "part": "第二集"},
            "quality": 80
        });
        let t = parse_title_descriptor(&data, "folder");
        assert_eq!(t.title, "合集");
        assert_eq!(t.bvid, "BV1xx411c7mD");
        assert_eq!(t.part_title, "第二集");
        assert_eq!(t.quality_code, 80);
    }

    #[test]
    fn test_fallback_title() {
        assert_eq!(fallback_title("123456"), "123456");
        assert_eq!(fallback_title(""), "Unknown Title");
        assert_eq!(fallback_title("  "), UNKNOWN_TITLE);
    }

    #[test]
    fn test_title_descriptor_degrades() {
        let t = parse_title_descriptor(&json!({"title": 5, "page_data": "x", "quality": "high"}), "123");
        assert_eq!(t.title, "123");
        assert_eq!(t.bvid, "");
        assert_eq!(t.part_title, "");
        assert_eq!(t.quality_code, 0);

        let t = parse_title_descriptor(&json!({}), "fallback");
        assert_eq!(t.title, "fallback");
    }

    #[test]
    fn test_display_fields() {
        let mut v = record();
        assert_eq!(v.display_title(), "标题");
        v.part_title = "标题".into();
        assert_eq!(v.display_title(), "标题");
        v.part_title = "P2".into();
        assert_eq!(v.display_title(), "标题 - P2");

        assert_eq!(v.size_display(), "12.3 MB");
        v.size_mb = 2048.0;
        assert_eq!(v.size_display(), "2.00 GB");

        assert_eq!(v.tech_info(), "");
        v.resolution = "1920×1080".into();
        v.quality = "1080P".into();
        assert_eq!(v.tech_info(), "1920×1080 · 1080P");
        v.frame_rate = "30".into();
        assert_eq!(v.tech_info(), "1920×1080 · 30fps · 1080P");
    }

    #[test]
    fn test_serialize_paths_as_strings() {
        let s = serde_json::to_value(record()).unwrap();
        assert_eq!(s["video_path"], "/x/80/video.m4s");
        let back: CachedVideo = serde_json::from_value(s).unwrap();
        assert_eq!(back, record());
    }
}
