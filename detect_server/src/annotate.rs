//! Draw detections onto frames.
//!
use image::{Rgb, RgbImage};
use imageproc::{
    drawing::{draw_hollow_rect_mut, draw_text_mut},
    rect::Rect,
};
use lazy_static::lazy_static;
use rusttype::{Font, Scale};

use crate::detection::Detection;

const BOX_COLOR: Rgb<u8> = Rgb([0, 255, 0]);
const LABEL_SCALE: f32 = 16.0;
/// Gap between the label and the top edge of its box.
const LABEL_OFFSET: i32 = 10;

lazy_static! {
    static ref DEJAVU_MONO: Font<'static> = {
        let font_data: &[u8] = include_bytes!("../resources/DejaVuSansMono.ttf");
        Font::try_from_bytes(font_data).expect("failed to load font")
    };
}

/// Draw bounding boxes with captions onto a copy of `frame`.
///
/// The source frame is left untouched and the result always has its dimensions.
pub fn annotate(frame: &RgbImage, detections: &[Detection]) -> RgbImage {
    let mut annotated = frame.clone();
    let (width, height) = annotated.dimensions();
    if width == 0 || height == 0 {
        return annotated;
    }

    for detection in detections.iter() {
        let bbox = detection.bbox.clamped(width, height);
        let (x_tl, y_tl) = (bbox.x1 as i32, bbox.y1 as i32);
        let rect_width = bbox.width().max(1.0) as u32;
        let rect_height = bbox.height().max(1.0) as u32;

        // Two nested outlines for a 2 px border
        draw_hollow_rect_mut(
            &mut annotated,
            Rect::at(x_tl, y_tl).of_size(rect_width, rect_height),
            BOX_COLOR,
        );
        if rect_width > 2 && rect_height > 2 {
            draw_hollow_rect_mut(
                &mut annotated,
                Rect::at(x_tl + 1, y_tl + 1).of_size(rect_width - 2, rect_height - 2),
                BOX_COLOR,
            );
        }

        // Caption above the box, or inside it at the top border of the image
        let text_y = (y_tl - LABEL_OFFSET - LABEL_SCALE as i32 / 2).max(0);
        draw_text_mut(
            &mut annotated,
            BOX_COLOR,
            x_tl,
            text_y,
            Scale::uniform(LABEL_SCALE),
            &DEJAVU_MONO,
            &detection.caption(),
        );
    }

    annotated
}
