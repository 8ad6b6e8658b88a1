use nalgebra::Point2;
use serde::{Deserialize, Serialize};

/// BBox（正規化座標 0.0〜1.0, 原点は左上）
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct BBox {
    pub x: f32,
    pub y: f32,
    pub width: f32,
    pub height: f32,
}

impl BBox {
    pub fn new(x: f32, y: f32, width: f32, height: f32) -> Self {
        Self { x, y, width, height }
    }

    /// 中心とサイズから作成
    pub fn from_center_size(center: Point2<f32>, width: f32, height: f32) -> Self {
        Self {
            x: center.x - width / 2.0,
            y: center.y - height / 2.0,
            width,
            height,
        }
    }

    /// フレーム全体
    pub fn full() -> Self {
        Self::new(0.0, 0.0, 1.0, 1.0)
    }

    pub fn center(&self) -> Point2<f32> {
        Point2::new(self.x + self.width / 2.0, self.y + self.height / 2.0)
    }

    pub fn diagonal(&self) -> f32 {
        self.width.hypot(self.height)
    }

    /// 中心を保持して factor 倍に拡張
    pub fn expanded(&self, factor: f32) -> Self {
        Self::from_center_size(self.center(), self.width * factor, self.height * factor)
    }

    pub fn contains(&self, point: Point2<f32>) -> bool {
        point.x >= self.x
            && point.x <= self.x + self.width
            && point.y >= self.y
            && point.y <= self.y + self.height
    }

    /// 単位正方形にクリップ
    pub fn clamped_to_unit(&self) -> Self {
        let x0 = self.x.clamp(0.0, 1.0);
        let y0 = self.y.clamp(0.0, 1.0);
        let x1 = (self.x + self.width).clamp(0.0, 1.0);
        let y1 = (self.y + self.height).clamp(0.0, 1.0);
        Self {
            x: x0,
            y: y0,
            width: x1 - x0,
            height: y1 - y0,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_bbox_full() {
        let full = BBox::full();
        assert_eq!(full.center(), Point2::new(0.5, 0.5));
        assert!((full.diagonal() - std::f32::consts::SQRT_2).abs() < 1e-6);
    }

    #[test]
    fn test_expanded_keeps_center() {
        let bbox = BBox::new(0.2, 0.2, 0.2, 0.4);
        let big = bbox.expanded(1.5);
        assert!((big.center().x - bbox.center().x).abs() < 1e-6);
        assert!((big.center().y - bbox.center().y).abs() < 1e-6);
        assert!((big.width - 0.3).abs() < 1e-6);
        assert!((big.height - 0.6).abs() < 1e-6);
    }

    #[test]
    fn test_contains() {
        let bbox = BBox::new(0.1, 0.1, 0.2, 0.2);
        assert!(bbox.contains(Point2::new(0.2, 0.2)));
        assert!(bbox.contains(Point2::new(0.1, 0.3)));
        assert!(!bbox.contains(Point2::new(0.35, 0.2)));
    }

    #[test]
    fn test_clamped_to_unit() {
        let bbox = BBox::from_center_size(Point2::new(0.95, 0.05), 0.2, 0.2).clamped_to_unit();
        assert!((bbox.x - 0.85).abs() < 1e-6);
        assert_eq!(bbox.y, 0.0);
        assert!((bbox.width - 0.15).abs() < 1e-6);
        assert!((bbox.height - 0.15).abs() < 1e-6);
    }
}
