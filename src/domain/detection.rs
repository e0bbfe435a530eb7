use serde::{Deserialize, Serialize};

/// One detected object in pixel coordinates of the frame it came from.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Detection {
    pub x1: f32,
    pub y1: f32,
    pub x2: f32,
    pub y2: f32,
    pub score: f32,
    pub class_id: usize,
    pub label: String,
}

impl Detection {
    pub fn width(&self) -> f32 {
        self.x2 - self.x1
    }

    pub fn height(&self) -> f32 {
        self.y2 - self.y1
    }

    pub fn area(&self) -> f32 {
        self.width().max(0.0) * self.height().max(0.0)
    }

    /// Box center rounded to the nearest pixel.
    pub fn center(&self) -> (i32, i32) {
        (
            ((self.x1 + self.x2) / 2.0).round() as i32,
            ((self.y1 + self.y2) / 2.0).round() as i32,
        )
    }

    pub fn iou(&self, other: &Detection) -> f32 {
        let ix1 = self.x1.max(other.x1);
        let iy1 = self.y1.max(other.y1);
        let ix2 = self.x2.min(other.x2);
        let iy2 = self.y2.min(other.y2);
        let inter = (ix2 - ix1).max(0.0) * (iy2 - iy1).max(0.0);
        if inter == 0.0 {
            return 0.0;
        }
        let union = self.area() + other.area() - inter;
        if union <= 0.0 {
            return 0.0;
        }
        inter / union
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn det(x1: f32, y1: f32, x2: f32, y2: f32) -> Detection {
        Detection { x1, y1, x2, y2, score: 0.9, class_id: 0, label: "drone".into() }
    }

    #[test]
    fn center_rounds_the_midpoint() {
        assert_eq!(det(10.0, 20.0, 30.0, 40.0).center(), (20, 30));
        assert_eq!(det(0.0, 0.0, 5.0, 3.0).center(), (3, 2));
        assert_eq!(det(1.2, 1.2, 2.0, 2.0).center(), (2, 2));
    }

    #[test]
    fn iou_of_identical_and_disjoint_boxes() {
        let a = det(0.0, 0.0, 10.0, 10.0);
        assert!((a.iou(&a) - 1.0).abs() < 1e-6);
        assert_eq!(a.iou(&det(20.0, 20.0, 30.0, 30.0)), 0.0);
        let half = det(5.0, 0.0, 15.0, 10.0);
        assert!((a.iou(&half) - 50.0 / 150.0).abs() < 1e-6);
    }
}
