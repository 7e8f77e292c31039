//! Preview/thumbnail generation.
//!
//! Raster images are downscaled to a fixed max dimension with a fast
//! nearest filter and re-encoded as PNG. Video previews grab the first
//! frame through the `ffmpeg` CLI when it is installed; a missing ffmpeg
//! degrades to "no thumbnail", never to a hard failure.

use std::io::Cursor;
use std::path::PathBuf;
use std::sync::atomic::{AtomicU64, Ordering};

use image::{imageops::FilterType, ImageFormat};
use thiserror::Error;

/// Longest edge of a generated preview.
pub const PREVIEW_MAX_DIMENSION: u32 = 1024;

static TEMP_COUNTER: AtomicU64 = AtomicU64::new(0);

#[derive(Debug, Error)]
pub enum PreviewError {
    #[error("failed to decode image: {0}")]
    Decode(#[from] image::ImageError),
    #[error("ffmpeg frame extraction failed: {0}")]
    Ffmpeg(String),
    #[error("temp file io: {0}")]
    Io(#[from] std::io::Error),
}

/// A generated preview plus the source's pixel dimensions.
#[derive(Debug, Clone)]
pub struct Preview {
    pub bytes: Vec<u8>,
    pub content_type: &'static str,
    pub source_dimensions: (u32, u32),
}

/// Downscale a raster image (first frame, for animated formats) to the
/// preview size. Images already within bounds are re-encoded as-is.
pub fn build_image_preview(bytes: &[u8]) -> Result<Preview, PreviewError> {
    let img = image::load_from_memory(bytes)?;
    let source_dimensions = (img.width(), img.height());

    let scaled = if img.width() > PREVIEW_MAX_DIMENSION || img.height() > PREVIEW_MAX_DIMENSION {
        img.resize(
            PREVIEW_MAX_DIMENSION,
            PREVIEW_MAX_DIMENSION,
            FilterType::Nearest,
        )
    } else {
        img
    };

    let mut out = Vec::new();
    scaled.write_to(&mut Cursor::new(&mut out), ImageFormat::Png)?;
    Ok(Preview {
        bytes: out,
        content_type: "image/png",
        source_dimensions,
    })
}

/// Extract the first frame of a video with ffmpeg and downscale it.
///
/// Requires the `ffmpeg` binary on PATH; callers treat any error as
/// "thumbnail unavailable" and keep the media record without one.
pub async fn build_video_preview(bytes: &[u8]) -> Result<Preview, PreviewError> {
    let input = temp_path("in");
    let output = temp_path("out.png");

    tokio::fs::write(&input, bytes).await?;
    let result = run_ffmpeg_first_frame(&input, &output).await;
    let _ = tokio::fs::remove_file(&input).await;

    result?;
    let frame = tokio::fs::read(&output).await?;
    let _ = tokio::fs::remove_file(&output).await;

    build_image_preview(&frame)
}

async fn run_ffmpeg_first_frame(input: &PathBuf, output: &PathBuf) -> Result<(), PreviewError> {
    let status = tokio::process::Command::new("ffmpeg")
        .arg("-y")
        .arg("-i")
        .arg(input)
        .arg("-frames:v")
        .arg("1")
        .arg(output)
        .stdout(std::process::Stdio::null())
        .stderr(std::process::Stdio::null())
        .status()
        .await
        .map_err(|err| PreviewError::Ffmpeg(format!("failed to spawn ffmpeg: {err}")))?;

    if !status.success() {
        return Err(PreviewError::Ffmpeg(format!(
            "ffmpeg exited with {status}"
        )));
    }
    Ok(())
}

fn temp_path(suffix: &str) -> PathBuf {
    let n = TEMP_COUNTER.fetch_add(1, Ordering::Relaxed);
    std::env::temp_dir().join(format!(
        "vitrine-preview-{}-{}-{}",
        std::process::id(),
        n,
        suffix
    ))
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::{DynamicImage, RgbaImage};

    fn png_bytes(width: u32, height: u32) -> Vec<u8> {
        let img = DynamicImage::ImageRgba8(RgbaImage::new(width, height));
        let mut out = Vec::new();
        img.write_to(&mut Cursor::new(&mut out), ImageFormat::Png)
            .unwrap();
        out
    }

    #[test]
    fn test_large_image_downscaled() {
        let preview = build_image_preview(&png_bytes(2048, 1024)).unwrap();
        assert_eq!(preview.source_dimensions, (2048, 1024));

        let scaled = image::load_from_memory(&preview.bytes).unwrap();
        assert!(scaled.width() <= PREVIEW_MAX_DIMENSION);
        assert!(scaled.height() <= PREVIEW_MAX_DIMENSION);
        // Aspect ratio preserved.
        assert_eq!(scaled.width(), PREVIEW_MAX_DIMENSION);
    }

    #[test]
    fn test_small_image_kept_at_size() {
        let preview = build_image_preview(&png_bytes(64, 64)).unwrap();
        let scaled = image::load_from_memory(&preview.bytes).unwrap();
        assert_eq!((scaled.width(), scaled.height()), (64, 64));
    }

    #[test]
    fn test_garbage_bytes_rejected() {
        assert!(build_image_preview(&[0u8, 1, 2, 3]).is_err());
    }
}
