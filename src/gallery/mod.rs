//! Image library: naming, URLs, embeds, transcoding and the service tying them together

pub mod embed;
pub mod image;
pub mod service;
pub mod transcode;
pub mod urls;

pub use embed::{parse_image_embed, parse_image_url, ImageEmbed};
pub use image::{parse_image_info, Folder, ImageError, ImageInfo, PreviewNameFormat};
pub use service::{GalleryError, GalleryService, UploadOutcome, UploadSource};
pub use transcode::{ImageTranscoder, TranscodeError, TranscodeOptions, Transcoded, WebpTranscoder};
pub use urls::PublicUrls;
