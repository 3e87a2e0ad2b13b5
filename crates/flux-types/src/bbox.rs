use serde::{Deserialize, Serialize};

/// 轴对齐边界框（像素坐标，左上角 + 右下角）
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct BBox {
    pub x1: f32,
    pub y1: f32,
    pub x2: f32,
    pub y2: f32,
}

impl BBox {
    pub fn new(x1: f32, y1: f32, x2: f32, y2: f32) -> Self {
        Self { x1, y1, x2, y2 }
    }

    pub fn width(&self) -> f32 {
        self.x2 - self.x1
    }

    pub fn height(&self) -> f32 {
        self.y2 - self.y1
    }

    /// 面积；退化框（宽或高 <= 0）为 0
    pub fn area(&self) -> f32 {
        let (w, h) = (self.width(), self.height());
        if w <= 0.0 || h <= 0.0 {
            0.0
        } else {
            w * h
        }
    }

    pub fn center(&self) -> (f32, f32) {
        ((self.x1 + self.x2) / 2.0, (self.y1 + self.y2) / 2.0)
    }

    /// 交并比，结果在 [0,1]
    ///
    /// 不相交、退化或并集非正的情况一律返回 0。
    pub fn iou(&self, other: &BBox) -> f32 {
        let ix1 = self.x1.max(other.x1);
        let iy1 = self.y1.max(other.y1);
        let ix2 = self.x2.min(other.x2);
        let iy2 = self.y2.min(other.y2);

        if ix2 <= ix1 || iy2 <= iy1 {
            return 0.0;
        }

        let intersection = (ix2 - ix1) * (iy2 - iy1);
        let union = self.area() + other.area() - intersection;
        if union <= 0.0 || !union.is_finite() {
            return 0.0;
        }

        (intersection / union).clamp(0.0, 1.0)
    }

    /// 四个方向各向外扩展 `ratio` 倍的宽/高，并裁剪到 [0,width]×[0,height]
    pub fn expand_clipped(&self, ratio: f32, width: u32, height: u32) -> BBox {
        let dx = self.width().max(0.0) * ratio;
        let dy = self.height().max(0.0) * ratio;
        let (w, h) = (width as f32, height as f32);

        BBox {
            x1: (self.x1 - dx).clamp(0.0, w),
            y1: (self.y1 - dy).clamp(0.0, h),
            x2: (self.x2 + dx).clamp(0.0, w),
            y2: (self.y2 + dy).clamp(0.0, h),
        }
    }
}
