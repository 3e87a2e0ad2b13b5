use flux_types::BBox;
use image::codecs::jpeg::JpegEncoder;
use image::ImageFormat;
use thiserror::Error;

/// 报警截图外扩比例（每个方向）
pub const CROP_EXPAND_RATIO: f32 = 0.5;

#[derive(Error, Debug)]
pub enum CropError {
    #[error("Image codec error: {0}")]
    Image(#[from] image::ImageError),

    #[error("Crop region is empty")]
    EmptyRegion,
}

/// 检测框外扩 50% 并裁剪到画面内
pub fn crop_region(bbox: &BBox, width: u32, height: u32) -> BBox {
    bbox.expand_clipped(CROP_EXPAND_RATIO, width, height)
}

/// 从 JPEG 中裁剪出 `region`（向外取整到像素）并重新编码
pub fn crop_jpeg(data: &[u8], region: &BBox, quality: u8) -> Result<Vec<u8>, CropError> {
    let image = image::load_from_memory_with_format(data, ImageFormat::Jpeg)?;
    let (w, h) = (image.width(), image.height());

    let x1 = (region.x1.floor().max(0.0) as u32).min(w);
    let y1 = (region.y1.floor().max(0.0) as u32).min(h);
    let x2 = (region.x2.ceil().max(0.0) as u32).min(w);
    let y2 = (region.y2.ceil().max(0.0) as u32).min(h);
    if x2 <= x1 || y2 <= y1 {
        return Err(CropError::EmptyRegion);
    }

    let cropped = image.crop_imm(x1, y1, x2 - x1, y2 - y1).to_rgb8();
    let mut out = Vec::new();
    JpegEncoder::new_with_quality(&mut out, quality).encode_image(&cropped)?;
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::{Rgb, RgbImage};

    fn test_jpeg(width: u32, height: u32) -> Vec<u8> {
        let img = RgbImage::from_fn(width, height, |x, y| Rgb([(x % 256) as u8, (y % 256) as u8, 128]));
        let mut out = Vec::new();
        JpegEncoder::new_with_quality(&mut out, 90).encode_image(&img).unwrap();
        out
    }

    #[test]
    fn test_crop_region_expands_and_clips() {
        // 100x100 的框，每边外扩 50
        let region = crop_region(&BBox::new(100.0, 100.0, 200.0, 200.0), 1280, 720);
        assert_eq!(region, BBox::new(50.0, 50.0, 250.0, 250.0));

        // 靠近边缘时裁剪到画面内
        let region = crop_region(&BBox::new(10.0, 600.0, 110.0, 700.0), 1280, 720);
        assert_eq!(region, BBox::new(0.0, 550.0, 160.0, 720.0));
    }

    #[test]
    fn test_crop_jpeg_dimensions() {
        let data = test_jpeg(320, 240);
        let region = BBox::new(10.2, 20.7, 50.5, 60.0);

        let out = crop_jpeg(&data, &region, 85).unwrap();
        let decoded = image::load_from_memory_with_format(&out, ImageFormat::Jpeg).unwrap();
        // floor(10.2)=10 .. ceil(50.5)=51, floor(20.7)=20 .. 60
        assert_eq!((decoded.width(), decoded.height()), (41, 40));
    }

    #[test]
    fn test_region_outside_image_is_rejected() {
        let data = test_jpeg(64, 64);
        let region = BBox::new(100.0, 100.0, 120.0, 120.0);
        assert!(matches!(crop_jpeg(&data, &region, 85), Err(CropError::EmptyRegion)));
    }

    #[test]
    fn test_invalid_jpeg_is_reported() {
        let region = BBox::new(0.0, 0.0, 4.0, 4.0);
        assert!(matches!(crop_jpeg(b"not a jpeg", &region, 85), Err(CropError::Image(_))));
    }
}
