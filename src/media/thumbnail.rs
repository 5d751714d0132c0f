/*!
 * 缩略图生成
 *
 * 照片走 image crate 解码、等比缩放到最长边300像素、JPEG质量85；
 * image 无法解码的格式（HEIC）以及视频首帧交给外部 ffmpeg 处理。
 * 无论来源是什么格式，缩略图输出一律是JPEG。
 */

use anyhow::{bail, Context, Result};
use image::codecs::jpeg::JpegEncoder;
use std::io::Cursor;
use std::path::Path;

use super::types::MediaType;

/// 缩略图最长边
pub const THUMBNAIL_MAX_EDGE: u32 = 300;

/// JPEG输出质量
pub const JPEG_QUALITY: u8 = 85;

/// 为已落盘的媒体文件生成缩略图
pub async fn create_thumbnail(
    source_path: &Path,
    media_type: MediaType,
    dest_path: &Path,
) -> Result<()> {
    if let Some(parent) = dest_path.parent() {
        tokio::fs::create_dir_all(parent)
            .await
            .with_context(|| format!("创建缩略图目录失败: {}", parent.display()))?;
    }

    match media_type {
        MediaType::Photo => {
            let bytes = tokio::fs::read(source_path)
                .await
                .with_context(|| format!("读取源文件失败: {}", source_path.display()))?;

            match encode_preview(&bytes) {
                Ok(jpeg) => {
                    tokio::fs::write(dest_path, jpeg)
                        .await
                        .context("写入缩略图失败")?;
                    tracing::info!("成功创建缩略图: {}", dest_path.display());
                    Ok(())
                }
                Err(decode_err) => {
                    // HEIC等image无法解码的格式，降级到ffmpeg
                    tracing::debug!(
                        "image解码失败（{}），降级到ffmpeg: {}",
                        decode_err,
                        source_path.display()
                    );
                    ffmpeg_thumbnail(source_path, dest_path).await
                }
            }
        }
        MediaType::Video => ffmpeg_thumbnail(source_path, dest_path).await,
    }
}

/// 在内存中生成JPEG预览（图搜图的查询侧使用，不落盘）
pub fn encode_preview(content: &[u8]) -> Result<Vec<u8>> {
    let decoded = image::ImageReader::new(Cursor::new(content))
        .with_guessed_format()
        .context("识别图像格式失败")?
        .decode()
        .context("解码图像失败")?;

    // thumbnail 保持纵横比，最长边不超过 THUMBNAIL_MAX_EDGE
    let resized = decoded.thumbnail(THUMBNAIL_MAX_EDGE, THUMBNAIL_MAX_EDGE);
    let rgb = resized.to_rgb8();

    let mut bytes = Vec::new();
    let encoder = JpegEncoder::new_with_quality(Cursor::new(&mut bytes), JPEG_QUALITY);
    rgb.write_with_encoder(encoder).context("编码JPEG失败")?;

    Ok(bytes)
}

/// 读取图片尺寸，无法解码时返回None
pub fn probe_dimensions(content: &[u8]) -> Option<(u32, u32)> {
    image::ImageReader::new(Cursor::new(content))
        .with_guessed_format()
        .ok()?
        .into_dimensions()
        .ok()
}

/// 调用外部ffmpeg提取首帧并缩放输出JPEG
async fn ffmpeg_thumbnail(source_path: &Path, dest_path: &Path) -> Result<()> {
    let output = tokio::process::Command::new("ffmpeg")
        .arg("-y")
        .arg("-i")
        .arg(source_path)
        .arg("-vf")
        .arg(format!(
            "scale='min({},iw)':-2",
            THUMBNAIL_MAX_EDGE
        ))
        .arg("-frames:v")
        .arg("1")
        .arg("-q:v")
        .arg("4")
        .arg(dest_path)
        .output()
        .await
        .context("启动ffmpeg失败，请确认已安装")?;

    if !output.status.success() {
        let stderr = String::from_utf8_lossy(&output.stderr);
        bail!(
            "ffmpeg生成缩略图失败 ({}): {}",
            source_path.display(),
            stderr.lines().last().unwrap_or("未知错误")
        );
    }

    tracing::info!("成功创建视频/HEIC缩略图: {}", dest_path.display());
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::{ImageBuffer, Rgb};

    fn sample_png(width: u32, height: u32) -> Vec<u8> {
        let img: ImageBuffer<Rgb<u8>, Vec<u8>> =
            ImageBuffer::from_fn(width, height, |x, y| Rgb([(x % 256) as u8, (y % 256) as u8, 128]));
        let mut bytes = Vec::new();
        img.write_to(&mut Cursor::new(&mut bytes), image::ImageFormat::Png)
            .unwrap();
        bytes
    }

    #[test]
    fn test_encode_preview_shrinks_and_outputs_jpeg() {
        let png = sample_png(1200, 900);
        let jpeg = encode_preview(&png).unwrap();

        // JPEG魔数
        assert_eq!(&jpeg[..2], &[0xFF, 0xD8]);

        let (w, h) = probe_dimensions(&jpeg).unwrap();
        assert!(w <= THUMBNAIL_MAX_EDGE && h <= THUMBNAIL_MAX_EDGE);
        // 纵横比保持 4:3
        assert_eq!(w * 3, h * 4);
    }

    #[test]
    fn test_encode_preview_small_image_not_upscaled() {
        let png = sample_png(100, 80);
        let jpeg = encode_preview(&png).unwrap();
        let (w, h) = probe_dimensions(&jpeg).unwrap();
        assert_eq!((w, h), (100, 80));
    }

    #[test]
    fn test_encode_preview_rejects_garbage() {
        assert!(encode_preview(b"definitely not an image").is_err());
    }

    #[test]
    fn test_probe_dimensions() {
        let png = sample_png(64, 32);
        assert_eq!(probe_dimensions(&png), Some((64, 32)));
        assert_eq!(probe_dimensions(b"garbage"), None);
    }
}
