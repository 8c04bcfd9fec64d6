//! Markdown image embed parsing
//!
//! Embeds look like `{% image "https://cdn/images/trip/beach.800x600.webp" %}`.
//! The last two path segments of the URL name the folder and the object.

use std::sync::OnceLock;

use regex::Regex;

use super::image::{parse_image_info, Folder, ImageInfo};

fn embed_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r#"\{%\s*image\s+"(?P<url>[^"]+)"\s*%\}"#).expect("embed pattern is valid")
    })
}

/// An image reference recovered from an embed tag
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ImageEmbed {
    pub url: String,
    pub folder: Folder,
    pub image: ImageInfo,
}

/// Parse the first `{% image "URL" %}` tag in `text`
pub fn parse_image_embed(text: &str) -> Option<ImageEmbed> {
    let caps = embed_regex().captures(text)?;
    let url = caps.name("url")?.as_str();
    let (folder, image) = parse_image_url(url)?;
    Some(ImageEmbed {
        url: url.to_string(),
        folder,
        image,
    })
}

/// Recover folder and image identity from a public URL
pub fn parse_image_url(url: &str) -> Option<(Folder, ImageInfo)> {
    let path = url.split(['?', '#']).next()?;
    let mut segments = path.rsplit('/');
    let filename = urlencoding::decode(segments.next()?).ok()?;
    let folder = urlencoding::decode(segments.next()?).ok()?;

    let folder = Folder::parse(&folder).ok()?;
    let image = parse_image_info(&filename)?;
    Some((folder, image))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_embed() {
        let embed = parse_image_embed(
            r#"Some text {% image "https://assets.example.cc/images/trip/beach.800x600.webp" %} more"#,
        )
        .unwrap();
        assert_eq!(embed.folder.as_str(), "trip");
        assert_eq!(embed.image.name, "beach");
        assert_eq!(embed.image.filename, "beach.800x600.webp");
    }

    #[test]
    fn test_parse_embed_decodes_segments() {
        let embed =
            parse_image_embed(r#"{%image "https://cdn.example.cc/trip/sea%20side.webp"%}"#).unwrap();
        assert_eq!(embed.image.name, "sea side");
    }

    #[test]
    fn test_parse_embed_rejects_bad_input() {
        assert!(parse_image_embed("no tag here").is_none());
        assert!(parse_image_embed(r#"{% image "https://cdn.example.cc/trip/noextension" %}"#).is_none());
        assert!(parse_image_embed(r#"{% image "beach.webp" %}"#).is_none());
    }

    #[test]
    fn test_query_string_ignored() {
        let (folder, image) =
            parse_image_url("https://cdn.example.cc/images/trip/beach.webp?v=2").unwrap();
        assert_eq!(folder.as_str(), "trip");
        assert_eq!(image.filename, "beach.webp");
    }
}
