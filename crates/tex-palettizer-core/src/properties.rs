use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

/// Pixel layout of a source texture.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PixelFormat {
    Rgb,
    Rgba,
    Luminance,
    LuminanceAlpha,
    Alpha,
}

impl PixelFormat {
    pub fn channel_count(self) -> u8 {
        match self {
            PixelFormat::Luminance | PixelFormat::Alpha => 1,
            PixelFormat::LuminanceAlpha => 2,
            PixelFormat::Rgb => 3,
            PixelFormat::Rgba => 4,
        }
    }

    pub fn has_alpha(self) -> bool {
        matches!(
            self,
            PixelFormat::Rgba | PixelFormat::LuminanceAlpha | PixelFormat::Alpha
        )
    }

    /// The format implied by a channel count, as reported by the image
    /// metadata probe.
    pub fn from_channel_count(channels: u8) -> Self {
        match channels {
            1 => PixelFormat::Luminance,
            2 => PixelFormat::LuminanceAlpha,
            3 => PixelFormat::Rgb,
            _ => PixelFormat::Rgba,
        }
    }

    fn token(self) -> &'static str {
        match self {
            PixelFormat::Rgb => "rgb",
            PixelFormat::Rgba => "rgba",
            PixelFormat::Luminance => "lum",
            PixelFormat::LuminanceAlpha => "luma",
            PixelFormat::Alpha => "alpha",
        }
    }
}

impl FromStr for PixelFormat {
    type Err = ();
    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "rgb" => Ok(PixelFormat::Rgb),
            "rgba" => Ok(PixelFormat::Rgba),
            "lum" | "luminance" => Ok(PixelFormat::Luminance),
            "luma" | "luminance-alpha" => Ok(PixelFormat::LuminanceAlpha),
            "alpha" => Ok(PixelFormat::Alpha),
            _ => Err(()),
        }
    }
}

/// Texture filtering mode, as declared by scene references.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FilterMode {
    Nearest,
    Linear,
    Mipmap,
}

impl FilterMode {
    fn token(self) -> &'static str {
        match self {
            FilterMode::Nearest => "n",
            FilterMode::Linear => "l",
            FilterMode::Mipmap => "m",
        }
    }
}

impl FromStr for FilterMode {
    type Err = ();
    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "nearest" => Ok(FilterMode::Nearest),
            "linear" => Ok(FilterMode::Linear),
            "mipmap" => Ok(FilterMode::Mipmap),
            _ => Err(()),
        }
    }
}

/// On-disk file type an atlas is written as.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ImageFileType {
    Png,
    Bmp,
    Tga,
}

impl ImageFileType {
    pub fn extension(self) -> &'static str {
        match self {
            ImageFileType::Png => "png",
            ImageFileType::Bmp => "bmp",
            ImageFileType::Tga => "tga",
        }
    }
}

/// The set of characteristics of a texture that, if different from another
/// texture, prevent the two from sharing an atlas. Pages are keyed by this
/// value within a group; the ordering makes it usable in an ordered map.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub struct TextureProperties {
    pub channel_count: u8,
    pub format: PixelFormat,
    pub min_filter: FilterMode,
    pub mag_filter: FilterMode,
    pub color_type: ImageFileType,
    pub alpha_type: Option<ImageFileType>,
}

impl Default for TextureProperties {
    fn default() -> Self {
        Self {
            channel_count: 4,
            format: PixelFormat::Rgba,
            min_filter: FilterMode::Linear,
            mag_filter: FilterMode::Linear,
            color_type: ImageFileType::Png,
            alpha_type: None,
        }
    }
}

impl TextureProperties {
    pub fn has_alpha(&self) -> bool {
        self.format.has_alpha()
    }

    /// A short string encoding the key, used for the `%p` token in the
    /// atlas naming pattern.
    pub fn string_key(&self) -> String {
        format!(
            "{}{}{}{}",
            self.format.token(),
            self.channel_count,
            self.min_filter.token(),
            self.mag_filter.token()
        )
    }
}

impl fmt::Display for TextureProperties {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.string_key())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ordering_is_total_over_key_fields() {
        let a = TextureProperties {
            channel_count: 3,
            format: PixelFormat::Rgb,
            ..Default::default()
        };
        let b = TextureProperties::default();
        assert!(a < b || b < a);
        assert_eq!(a.cmp(&a), std::cmp::Ordering::Equal);
    }
}
