//! On-screen indicator for frames recorded after the ignition drops

use image::Rgb;
use imageproc::drawing::{draw_filled_rect_mut, draw_hollow_rect_mut};
use imageproc::rect::Rect;

use crate::VideoFrame;

const MARKER_COLOR: Rgb<u8> = Rgb([255, 0, 0]);
const BORDER_COLOR: Rgb<u8> = Rgb([255, 255, 255]);

/// Copy of `frame` with a red "ignition off" marker in the top-left corner.
///
/// The source frame is left untouched; it may still be shared with the
/// capture thread.
pub fn annotate_power_off(frame: &VideoFrame) -> VideoFrame {
    let Some(mut img) = frame.to_rgb_image() else {
        return frame.clone();
    };

    let (width, height) = img.dimensions();
    let marker_w = (width / 6).max(1);
    let marker_h = (height / 14).max(1);
    let inset = (width / 50).min(25) as i32;

    let marker = Rect::at(inset, inset).of_size(marker_w, marker_h);
    draw_filled_rect_mut(&mut img, marker, MARKER_COLOR);
    if marker_w > 2 && marker_h > 2 {
        draw_hollow_rect_mut(&mut img, marker, BORDER_COLOR);
    }

    VideoFrame::from_rgb_image(img, frame.timestamp_ns, frame.sequence)
}
