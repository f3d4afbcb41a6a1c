/// 检测结果叠加绘制
/// Draws posture boxes, skeleton segments and the fall banner onto a frame
use image::{Rgb, RgbImage};
use imageproc::drawing::{
    draw_filled_circle_mut, draw_filled_rect_mut, draw_hollow_rect_mut, draw_line_segment_mut,
};
use imageproc::rect::Rect;

use super::types::{DetectionResult, KeypointLayout, PersonObservation, Posture};

const BANNER_COLOR: Rgb<u8> = Rgb([220, 0, 0]);
const JOINT_COLOR: Rgb<u8> = Rgb([0, 200, 255]);
const BONE_COLOR: Rgb<u8> = Rgb([255, 255, 255]);

/// 在图像上绘制整帧结果
pub fn annotate(image: &mut RgbImage, result: &DetectionResult, layout: KeypointLayout, min_visibility: f32) {
    for person in &result.persons {
        draw_person(image, person, layout, min_visibility);
    }
    if result.fall_detected {
        draw_fall_banner(image);
    }
}

fn draw_person(image: &mut RgbImage, person: &PersonObservation, layout: KeypointLayout, min_visibility: f32) {
    let (w, h) = image.dimensions();
    let color = Rgb(person.posture.color());

    let (x1, y1, x2, y2) = person.bbox.to_pixels(w, h);
    let rect = Rect::at(x1, y1).of_size((x2 - x1).max(1) as u32, (y2 - y1).max(1) as u32);
    draw_hollow_rect_mut(image, rect, color);
    // 跌倒目标加粗
    if person.posture == Posture::Falling {
        let inner = Rect::at(x1 + 1, y1 + 1).of_size((x2 - x1 - 2).max(1) as u32, (y2 - y1 - 2).max(1) as u32);
        draw_hollow_rect_mut(image, inner, color);
    }

    let to_px = |i: usize| -> Option<(f32, f32)> {
        let kp = person.keypoints.get(i)?;
        kp.is_visible(min_visibility)
            .then(|| (kp.x * w as f32, kp.y * h as f32))
    };

    for &(a, b) in layout.skeleton() {
        if let (Some(pa), Some(pb)) = (to_px(a), to_px(b)) {
            draw_line_segment_mut(image, pa, pb, BONE_COLOR);
        }
    }
    for i in 0..person.keypoints.len() {
        if let Some((x, y)) = to_px(i) {
            draw_filled_circle_mut(image, (x as i32, y as i32), 2, JOINT_COLOR);
        }
    }
}

/// 顶部红色告警条
fn draw_fall_banner(image: &mut RgbImage) {
    let (w, h) = image.dimensions();
    if w == 0 || h == 0 {
        return;
    }
    let banner_h = (h / 12).clamp(1, 48);
    draw_filled_rect_mut(image, Rect::at(0, 0).of_size(w, banner_h), BANNER_COLOR);
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::detection::types::{BoundingBox, Keypoint};
    use chrono::Utc;

    fn result(posture: Posture, fall: bool) -> DetectionResult {
        let person = PersonObservation {
            id: "cam1_person_0".into(),
            slot: 0,
            bbox: BoundingBox {
                x: 0.25,
                y: 0.25,
                width: 0.5,
                height: 0.5,
            },
            posture,
            confidence: 0.9,
            body_angle: Some(10.0),
            fall_risk: 0.1,
            keypoints: vec![Keypoint::new(0.5, 0.5, 1.0); 17],
        };
        DetectionResult {
            camera_id: "cam1".into(),
            frame_number: 1,
            timestamp: Utc::now(),
            persons: vec![person],
            fall_detected: fall,
            fall_person_ids: if fall { vec!["cam1_person_0".into()] } else { vec![] },
            processing_time_ms: 1.0,
        }
    }

    #[test]
    fn test_draws_box_in_posture_color() {
        let mut img = RgbImage::new(100, 100);
        annotate(&mut img, &result(Posture::Standing, false), KeypointLayout::Coco17, 0.5);
        assert_eq!(img.get_pixel(25, 40), &Rgb(Posture::Standing.color()));
        // 无告警条
        assert_eq!(img.get_pixel(0, 0), &Rgb([0, 0, 0]));
    }

    #[test]
    fn test_fall_banner() {
        let mut img = RgbImage::new(120, 120);
        annotate(&mut img, &result(Posture::Falling, true), KeypointLayout::Coco17, 0.5);
        assert_eq!(img.get_pixel(60, 2), &BANNER_COLOR);
        assert_eq!(img.get_pixel(30, 60), &Rgb(Posture::Falling.color()));
    }

    #[test]
    fn test_degenerate_box_does_not_panic() {
        let mut r = result(Posture::Unknown, false);
        r.persons[0].bbox = BoundingBox::default();
        let mut img = RgbImage::new(10, 10);
        annotate(&mut img, &r, KeypointLayout::MediaPipe33, 0.5);
    }
}
