//! Public URL scheme
//!
//! Originals: `{base}/{prefix}{folder}/{filename}`
//! Previews:  `{base}/{prefix}{folder}/{preview-stem}.webp`

use super::image::{Folder, ImageInfo, PreviewNameFormat};

/// Extension of generated previews and cached blobs
pub const PREVIEW_EXTENSION: &str = "webp";

/// Builds public URLs and object keys from the configured base and prefix
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PublicUrls {
    base: String,
    images_prefix: String,
    preview_format: PreviewNameFormat,
}

impl PublicUrls {
    pub fn new(base: &str, images_prefix: &str, preview_format: PreviewNameFormat) -> Self {
        Self {
            base: base.trim_end_matches('/').to_string(),
            images_prefix: images_prefix.to_string(),
            preview_format,
        }
    }

    pub fn preview_format(&self) -> &PreviewNameFormat {
        &self.preview_format
    }

    /// Object key prefix for a folder (e.g. "images/trip/")
    pub fn folder_prefix(&self, folder: &Folder) -> String {
        format!("{}{}/", self.images_prefix, folder)
    }

    /// Object key of an original
    pub fn original_key(&self, folder: &Folder, image: &ImageInfo) -> String {
        format!("{}{}", self.folder_prefix(folder), image.filename)
    }

    /// Object key of a preview
    pub fn preview_key(&self, folder: &Folder, image: &ImageInfo) -> String {
        format!("{}{}", self.folder_prefix(folder), self.preview_filename(image))
    }

    /// Basename of the preview for an image
    pub fn preview_filename(&self, image: &ImageInfo) -> String {
        format!("{}.{}", self.preview_format.apply(&image.name), PREVIEW_EXTENSION)
    }

    pub fn original_url(&self, folder: &Folder, image: &ImageInfo) -> String {
        self.url_for(folder, &image.filename)
    }

    pub fn preview_url(&self, folder: &Folder, image: &ImageInfo) -> String {
        self.url_for(folder, &self.preview_filename(image))
    }

    fn url_for(&self, folder: &Folder, filename: &str) -> String {
        let mut url = self.base.clone();
        url.push('/');
        url.push_str(&encode_path(&self.images_prefix));
        url.push_str(&urlencoding::encode(folder.as_str()));
        url.push('/');
        url.push_str(&urlencoding::encode(filename));
        url
    }
}

/// Percent-encode each `/`-separated segment, keeping the separators
fn encode_path(path: &str) -> String {
    path.split('/')
        .map(|segment| urlencoding::encode(segment).into_owned())
        .collect::<Vec<_>>()
        .join("/")
}

#[cfg(test)]
mod tests {
    use super::*;

    fn urls() -> PublicUrls {
        PublicUrls::new(
            "https://assets.example.cc/",
            "images/",
            PreviewNameFormat::parse("%s-240").unwrap(),
        )
    }

    fn beach() -> ImageInfo {
        ImageInfo {
            filename: "beach.800x600.webp".to_string(),
            name: "beach".to_string(),
        }
    }

    #[test]
    fn test_preview_url() {
        let folder = Folder::parse("trip").unwrap();
        assert_eq!(
            urls().preview_url(&folder, &beach()),
            "https://assets.example.cc/images/trip/beach-240.webp"
        );
    }

    #[test]
    fn test_original_url_and_keys() {
        let folder = Folder::parse("trip").unwrap();
        let urls = urls();
        assert_eq!(
            urls.original_url(&folder, &beach()),
            "https://assets.example.cc/images/trip/beach.800x600.webp"
        );
        assert_eq!(urls.original_key(&folder, &beach()), "images/trip/beach.800x600.webp");
        assert_eq!(urls.preview_key(&folder, &beach()), "images/trip/beach-240.webp");
    }

    #[test]
    fn test_segments_are_encoded() {
        let urls = PublicUrls::new(
            "https://cdn.example.cc",
            "my images/",
            PreviewNameFormat::parse("%s-240").unwrap(),
        );
        let folder = Folder::parse("trip").unwrap();
        let image = ImageInfo {
            filename: "sea side.webp".to_string(),
            name: "sea side".to_string(),
        };
        assert_eq!(
            urls.original_url(&folder, &image),
            "https://cdn.example.cc/my%20images/trip/sea%20side.webp"
        );
        assert_eq!(
            urls.preview_url(&folder, &image),
            "https://cdn.example.cc/my%20images/trip/sea%20side-240.webp"
        );
    }

    #[test]
    fn test_empty_prefix() {
        let urls = PublicUrls::new("https://cdn.example.cc", "", PreviewNameFormat::parse("%s-240").unwrap());
        let folder = Folder::parse("trip").unwrap();
        assert_eq!(
            urls.preview_url(&folder, &beach()),
            "https://cdn.example.cc/trip/beach-240.webp"
        );
    }
}
