//! Image identity types
//!
//! Object basenames look like `photo.1920x1080.webp`: a base name, an optional
//! `.WIDTHxHEIGHT` size tag, and an extension.

use std::fmt;
use std::sync::OnceLock;

use regex::Regex;

/// Placeholder substituted with the image name in preview filenames
pub const NAME_PLACEHOLDER: &str = "%s";

/// Identity parse failures
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ImageError {
    #[error("Cannot derive an image name from '{0}'")]
    InvalidFilename(String),

    #[error("Invalid folder name '{0}' (allowed: letters, digits, '_', '.', '-')")]
    InvalidFolder(String),

    #[error("Preview name format must contain exactly one '%s': '{0}'")]
    InvalidPreviewFormat(String),
}

fn filename_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"^(?P<name>.+?)(?:\.(?P<w>\d+)x(?P<h>\d+))?\.(?P<ext>[A-Za-z0-9]+)$")
            .expect("filename pattern is valid")
    })
}

fn folder_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"^[A-Za-z0-9_.-]+$").expect("folder pattern is valid"))
}

/// One logical image within a folder
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ImageInfo {
    /// Literal object basename, size tag and extension included
    pub filename: String,
    /// Base name with size tag and extension stripped; never empty
    pub name: String,
}

impl ImageInfo {
    /// Filename for an uploaded original carrying its size tag
    pub fn with_size(name: &str, width: u32, height: u32, extension: &str) -> Self {
        Self {
            filename: format!("{name}.{width}x{height}.{extension}"),
            name: name.to_string(),
        }
    }
}

/// Parse an object basename into an [`ImageInfo`]
///
/// Returns `None` when there is no extension-delimited, non-empty base.
pub fn parse_image_info(filename: &str) -> Option<ImageInfo> {
    if filename.contains('/') {
        return None;
    }
    let caps = filename_regex().captures(filename)?;
    let name = caps.name("name")?.as_str();
    Some(ImageInfo {
        filename: filename.to_string(),
        name: name.to_string(),
    })
}

/// A validated folder name (one S3 common prefix, no nesting)
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Folder(String);

impl Folder {
    pub fn parse(name: &str) -> Result<Self, ImageError> {
        // "." and ".." match the character class but are not folders
        if folder_regex().is_match(name) && name != "." && name != ".." {
            Ok(Self(name.to_string()))
        } else {
            Err(ImageError::InvalidFolder(name.to_string()))
        }
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for Folder {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl AsRef<str> for Folder {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

/// Preview basename pattern such as `"%s-240"`
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PreviewNameFormat {
    prefix: String,
    suffix: String,
}

impl PreviewNameFormat {
    pub fn parse(pattern: &str) -> Result<Self, ImageError> {
        if pattern.matches(NAME_PLACEHOLDER).count() != 1 {
            return Err(ImageError::InvalidPreviewFormat(pattern.to_string()));
        }
        let (prefix, suffix) = pattern
            .split_once(NAME_PLACEHOLDER)
            .ok_or_else(|| ImageError::InvalidPreviewFormat(pattern.to_string()))?;
        if prefix.is_empty() && suffix.is_empty() {
            // A bare "%s" would make every image its own preview
            return Err(ImageError::InvalidPreviewFormat(pattern.to_string()));
        }
        Ok(Self {
            prefix: prefix.to_string(),
            suffix: suffix.to_string(),
        })
    }

    /// Preview stem for an image name (no extension)
    pub fn apply(&self, name: &str) -> String {
        format!("{}{}{}", self.prefix, name, self.suffix)
    }

    /// If `stem` is a preview stem, the image name it was generated from
    pub fn strip<'a>(&self, stem: &'a str) -> Option<&'a str> {
        let name = stem.strip_prefix(&self.prefix)?.strip_suffix(&self.suffix)?;
        (!name.is_empty()).then_some(name)
    }

    /// Whether an object basename is a generated preview
    pub fn is_preview_filename(&self, filename: &str) -> bool {
        filename
            .rsplit_once('.')
            .is_some_and(|(stem, _)| self.strip(stem).is_some())
    }
}

impl fmt::Display for PreviewNameFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}{}{}", self.prefix, NAME_PLACEHOLDER, self.suffix)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_with_size_tag() {
        let info = parse_image_info("photo.1920x1080.webp").unwrap();
        assert_eq!(info.filename, "photo.1920x1080.webp");
        assert_eq!(info.name, "photo");
    }

    #[test]
    fn test_parse_without_size_tag() {
        let info = parse_image_info("beach.jpg").unwrap();
        assert_eq!(info.name, "beach");
        let dotted = parse_image_info("my.trip.2024.640x480.png").unwrap();
        assert_eq!(dotted.name, "my.trip.2024");
    }

    #[test]
    fn test_parse_rejects_missing_base() {
        assert_eq!(parse_image_info("noextension"), None);
        assert_eq!(parse_image_info(".webp"), None);
        assert_eq!(parse_image_info(""), None);
        assert_eq!(parse_image_info("trip/photo.webp"), None);
    }

    #[test]
    fn test_with_size_round_trips() {
        let info = ImageInfo::with_size("beach", 800, 600, "webp");
        assert_eq!(info.filename, "beach.800x600.webp");
        assert_eq!(parse_image_info(&info.filename), Some(info));
    }

    #[test]
    fn test_folder_validation() {
        assert!(Folder::parse("trip_2024.v-2").is_ok());
        assert!(Folder::parse("").is_err());
        assert!(Folder::parse("a/b").is_err());
        assert!(Folder::parse("with space").is_err());
        assert!(Folder::parse("..").is_err());
    }

    #[test]
    fn test_preview_format() {
        let format = PreviewNameFormat::parse("%s-240").unwrap();
        assert_eq!(format.apply("beach"), "beach-240");
        assert_eq!(format.strip("beach-240"), Some("beach"));
        assert_eq!(format.strip("beach"), None);
        assert!(format.is_preview_filename("beach-240.webp"));
        assert!(!format.is_preview_filename("beach.800x600.webp"));
        assert_eq!(format.to_string(), "%s-240");
    }

    #[test]
    fn test_preview_format_requires_one_placeholder() {
        assert!(PreviewNameFormat::parse("preview").is_err());
        assert!(PreviewNameFormat::parse("%s-%s").is_err());
        assert!(PreviewNameFormat::parse("%s").is_err());
        assert!(PreviewNameFormat::parse("thumb_%s").is_ok());
    }
}
