//! Frame annotation
//!
//! Positions are fixed for the 800x600 canonical frame. Text uses a built-in
//! 3x5 bitmap font so no font file is needed at runtime.

use crate::analysis::FaceAnalysis;
use crate::landmarks::{LandmarkSet, Point, POSE_LANDMARKS};
use crate::pose::GuideLines;
use image::{Rgb, RgbImage};
use imageproc::drawing::{
    draw_filled_circle_mut, draw_filled_rect_mut, draw_hollow_rect_mut, draw_line_segment_mut,
};
use imageproc::geometry::convex_hull;
use imageproc::rect::Rect;

/// Frame size the anchors below are laid out for
pub const CANONICAL_SIZE: (u32, u32) = (800, 600);

/// Baseline-left text anchors
pub const FACE_COUNT_POS: (i32, i32) = (10, 20);
pub const MAR_POS: (i32, i32) = (500, 20);
pub const EYES_CLOSED_POS: (i32, i32) = (300, 40);
pub const YAWNING_POS: (i32, i32) = (500, 50);
pub const HEAD_TILT_POS: (i32, i32) = (10, 50);

pub const RED: Rgb<u8> = Rgb([255, 0, 0]);
pub const GREEN: Rgb<u8> = Rgb([0, 255, 0]);
pub const BLUE: Rgb<u8> = Rgb([0, 0, 255]);

const SMALL_TEXT: i32 = 2;
const LARGE_TEXT: i32 = 3;
const GLYPH_WIDTH: i32 = 3;
const GLYPH_HEIGHT: i32 = 5;

fn glyph(ch: char) -> [u8; 5] {
    match ch.to_ascii_uppercase() {
        '0' => [0b111, 0b101, 0b101, 0b101, 0b111],
        '1' => [0b010, 0b110, 0b010, 0b010, 0b111],
        '2' => [0b111, 0b001, 0b111, 0b100, 0b111],
        '3' => [0b111, 0b001, 0b111, 0b001, 0b111],
        '4' => [0b101, 0b101, 0b111, 0b001, 0b001],
        '5' => [0b111, 0b100, 0b111, 0b001, 0b111],
        '6' => [0b111, 0b100, 0b111, 0b101, 0b111],
        '7' => [0b111, 0b001, 0b010, 0b010, 0b010],
        '8' => [0b111, 0b101, 0b111, 0b101, 0b111],
        '9' => [0b111, 0b101, 0b111, 0b001, 0b111],
        'A' => [0b010, 0b101, 0b111, 0b101, 0b101],
        'B' => [0b110, 0b101, 0b110, 0b101, 0b110],
        'C' => [0b011, 0b100, 0b100, 0b100, 0b011],
        'D' => [0b110, 0b101, 0b101, 0b101, 0b110],
        'E' => [0b111, 0b100, 0b110, 0b100, 0b111],
        'F' => [0b111, 0b100, 0b110, 0b100, 0b100],
        'G' => [0b011, 0b100, 0b101, 0b101, 0b011],
        'H' => [0b101, 0b101, 0b111, 0b101, 0b101],
        'I' => [0b111, 0b010, 0b010, 0b010, 0b111],
        'J' => [0b001, 0b001, 0b001, 0b101, 0b010],
        'K' => [0b101, 0b101, 0b110, 0b101, 0b101],
        'L' => [0b100, 0b100, 0b100, 0b100, 0b111],
        'M' => [0b101, 0b111, 0b111, 0b101, 0b101],
        'N' => [0b110, 0b101, 0b101, 0b101, 0b101],
        'O' => [0b010, 0b101, 0b101, 0b101, 0b010],
        'P' => [0b110, 0b101, 0b110, 0b100, 0b100],
        'Q' => [0b010, 0b101, 0b101, 0b110, 0b011],
        'R' => [0b110, 0b101, 0b110, 0b101, 0b101],
        'S' => [0b011, 0b100, 0b010, 0b001, 0b110],
        'T' => [0b111, 0b010, 0b010, 0b010, 0b010],
        'U' => [0b101, 0b101, 0b101, 0b101, 0b111],
        'V' => [0b101, 0b101, 0b101, 0b101, 0b010],
        'W' => [0b101, 0b101, 0b111, 0b111, 0b101],
        'X' => [0b101, 0b101, 0b010, 0b101, 0b101],
        'Y' => [0b101, 0b101, 0b010, 0b010, 0b010],
        'Z' => [0b111, 0b001, 0b010, 0b100, 0b111],
        '.' => [0b000, 0b000, 0b000, 0b000, 0b010],
        ':' => [0b000, 0b010, 0b000, 0b010, 0b000],
        '-' => [0b000, 0b000, 0b111, 0b000, 0b000],
        '!' => [0b010, 0b010, 0b010, 0b000, 0b010],
        '(' => [0b001, 0b010, 0b010, 0b010, 0b001],
        ')' => [0b100, 0b010, 0b010, 0b010, 0b100],
        '%' => [0b101, 0b001, 0b010, 0b100, 0b101],
        '/' => [0b001, 0b001, 0b010, 0b100, 0b100],
        _ => [0b000; 5],
    }
}

fn draw_char(img: &mut RgbImage, x: i32, y: i32, ch: char, scale: i32, color: Rgb<u8>) {
    for (row, bits) in glyph(ch).iter().enumerate() {
        for col in 0..GLYPH_WIDTH {
            if (bits >> (GLYPH_WIDTH - 1 - col)) & 1 == 1 {
                let cell = Rect::at(x + col * scale, y + row as i32 * scale)
                    .of_size(scale as u32, scale as u32);
                draw_filled_rect_mut(img, cell, color);
            }
        }
    }
}

/// Draw `text` with its baseline-left corner at `origin`
pub fn draw_text(img: &mut RgbImage, origin: (i32, i32), text: &str, scale: i32, color: Rgb<u8>) {
    let scale = scale.max(1);
    let top = origin.1 - GLYPH_HEIGHT * scale;
    let mut cursor_x = origin.0;
    for ch in text.chars() {
        draw_char(img, cursor_x, top, ch, scale, color);
        cursor_x += (GLYPH_WIDTH + 1) * scale;
    }
}

fn draw_thick_line(img: &mut RgbImage, start: (i32, i32), end: (i32, i32), color: Rgb<u8>) {
    let (sx, sy) = (start.0 as f32, start.1 as f32);
    let (ex, ey) = (end.0 as f32, end.1 as f32);
    for (dx, dy) in [(0.0, 0.0), (1.0, 0.0), (0.0, 1.0)] {
        draw_line_segment_mut(img, (sx + dx, sy + dy), (ex + dx, ey + dy), color);
    }
}

/// Two-pixel outline of a face box
fn draw_box(img: &mut RgbImage, x: f32, y: f32, width: f32, height: f32, color: Rgb<u8>) {
    let (x, y) = (x.round() as i32, y.round() as i32);
    let (w, h) = (width.round().max(1.0) as u32, height.round().max(1.0) as u32);
    draw_hollow_rect_mut(img, Rect::at(x, y).of_size(w, h), color);
    if w > 2 && h > 2 {
        draw_hollow_rect_mut(img, Rect::at(x + 1, y + 1).of_size(w - 2, h - 2), color);
    }
}

/// Closed outline of the convex hull of `points`
fn draw_hull(img: &mut RgbImage, points: &[Point], color: Rgb<u8>) {
    let pixels: Vec<imageproc::point::Point<i32>> = points
        .iter()
        .map(|p| imageproc::point::Point::new(p.x.round() as i32, p.y.round() as i32))
        .collect();
    let hull = convex_hull(&pixels[..]);
    if hull.is_empty() {
        return;
    }
    for (i, a) in hull.iter().enumerate() {
        let b = hull[(i + 1) % hull.len()];
        draw_line_segment_mut(img, (a.x as f32, a.y as f32), (b.x as f32, b.y as f32), color);
    }
}

fn draw_dot(img: &mut RgbImage, p: &Point, radius: i32, color: Rgb<u8>) {
    draw_filled_circle_mut(img, (p.x as i32, p.y as i32), radius, color);
}

/// Face count banner, drawn only when faces are present
pub fn draw_face_count(img: &mut RgbImage, count: usize) {
    if count > 0 {
        draw_text(img, FACE_COUNT_POS, &format!("{count} FACE(S) FOUND"), SMALL_TEXT, RED);
    }
}

/// Everything drawn for one analysed face
pub fn draw_face(
    img: &mut RgbImage,
    face: &FaceAnalysis,
    landmarks: &LandmarkSet,
    image_points: &[Point; 6],
    guide: Option<&GuideLines>,
) {
    let bbox = &face.bbox;
    draw_box(img, bbox.x, bbox.y, bbox.width, bbox.height, GREEN);

    draw_hull(img, landmarks.left_eye(), GREEN);
    draw_hull(img, landmarks.right_eye(), GREEN);
    if face.eyes_closed {
        draw_text(img, EYES_CLOSED_POS, "EYES CLOSED!", LARGE_TEXT, RED);
    }

    draw_hull(img, landmarks.mouth(), GREEN);
    if let Some(mar) = face.mar {
        draw_text(img, MAR_POS, &format!("MAR: {mar:.2}"), SMALL_TEXT, RED);
    }
    if face.yawning {
        draw_text(img, YAWNING_POS, "YAWNING!", LARGE_TEXT, RED);
    }

    for &index in POSE_LANDMARKS.iter() {
        if let Some(p) = landmarks.point(index) {
            draw_dot(img, p, 2, GREEN);
        }
    }
    for p in image_points {
        draw_dot(img, p, 3, RED);
    }

    if let Some(guide) = guide {
        draw_thick_line(img, guide.start, guide.end, BLUE);
        draw_thick_line(img, guide.start, guide.end_alt, RED);
    }
    if let Some(tilt) = face.head_tilt_degrees {
        draw_text(img, HEAD_TILT_POS, &format!("HEAD TILT: {tilt:.1}"), SMALL_TEXT, RED);
    }
}
