use std::fs;
use std::path::{Path, PathBuf};

use image::ImageFormat;

pub const MAX_MEDIA_BYTES: usize = 10 * 1024 * 1024;

#[derive(Debug, thiserror::Error)]
pub enum MediaError {
    #[error("failed to read media file {path}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },
    #[error("media file is too large ({size} bytes, limit {limit})")]
    TooLarge { size: usize, limit: usize },
    #[error("unsupported media format; use PNG, JPEG, GIF, or WebP")]
    UnsupportedFormat,
}

/// A validated attachment ready to be carried as a multipart file part.
#[derive(Debug, Clone)]
pub struct MediaFile {
    pub path: PathBuf,
    pub file_name: String,
    pub mime: String,
    pub bytes: Vec<u8>,
}

impl MediaFile {
    pub fn load(path: &Path) -> Result<MediaFile, MediaError> {
        let bytes = fs::read(path).map_err(|source| MediaError::Io {
            path: path.display().to_string(),
            source,
        })?;
        if bytes.len() > MAX_MEDIA_BYTES {
            return Err(MediaError::TooLarge {
                size: bytes.len(),
                limit: MAX_MEDIA_BYTES,
            });
        }

        let format = sniff_format(&bytes)?;
        let mime = tree_magic_mini::from_filepath(path)
            .map(str::to_string)
            .unwrap_or_else(|| format.to_mime_type().to_string());

        let file_name = path
            .file_name()
            .map(|name| name.to_string_lossy().into_owned())
            .unwrap_or_else(|| "media".to_string());

        Ok(MediaFile {
            path: path.to_path_buf(),
            file_name,
            mime,
            bytes,
        })
    }
}

fn sniff_format(bytes: &[u8]) -> Result<ImageFormat, MediaError> {
    let format = image::guess_format(bytes).map_err(|_| MediaError::UnsupportedFormat)?;
    match format {
        ImageFormat::Png | ImageFormat::Jpeg | ImageFormat::Gif | ImageFormat::WebP => Ok(format),
        _ => Err(MediaError::UnsupportedFormat),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::{Builder, NamedTempFile};

    const PNG_MAGIC: &[u8] = &[0x89, b'P', b'N', b'G', b'\r', b'\n', 0x1a, b'\n'];

    #[test]
    fn sniff_accepts_png_magic() {
        assert_eq!(sniff_format(PNG_MAGIC).unwrap(), ImageFormat::Png);
    }

    #[test]
    fn sniff_rejects_unknown_bytes() {
        let err = sniff_format(b"definitely not an image").unwrap_err();
        assert!(matches!(err, MediaError::UnsupportedFormat));
    }

    #[test]
    fn load_missing_file_reports_io_error() {
        let err = MediaFile::load(Path::new("/nonexistent/story.png")).unwrap_err();
        assert!(matches!(err, MediaError::Io { .. }));
    }

    #[test]
    fn load_reads_and_names_the_file() {
        let mut file = Builder::new().suffix(".png").tempfile().unwrap();
        file.write_all(PNG_MAGIC).unwrap();
        file.flush().unwrap();
        let media = MediaFile::load(file.path()).unwrap();
        assert!(media.file_name.ends_with(".png"));
        assert_eq!(media.bytes, PNG_MAGIC);
    }

    #[test]
    fn load_rejects_text_files() {
        let mut file = NamedTempFile::new().unwrap();
        file.write_all(b"just words").unwrap();
        file.flush().unwrap();
        let err = MediaFile::load(file.path()).unwrap_err();
        assert!(matches!(err, MediaError::UnsupportedFormat));
    }
}
