use image::{imageops, ImageBuffer, Rgba, RgbaImage};
use pdfscroll_core::{Frame, HighlightKind, Rect};
use tracing::warn;

/// Colour behind and between pages.
pub const BACKGROUND: Rgba<u8> = Rgba([72, 72, 72, 255]);

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Tint {
    pub color: [u8; 3],
    pub alpha: f32,
}

pub fn tint_for(kind: HighlightKind) -> Tint {
    match kind {
        HighlightKind::Selection => Tint {
            color: [51, 153, 255],
            alpha: 0.35,
        },
        HighlightKind::SearchMatch => Tint {
            color: [255, 200, 0],
            alpha: 0.2,
        },
        HighlightKind::CurrentMatch => Tint {
            color: [255, 140, 0],
            alpha: 0.4,
        },
    }
}

/// Paints a frame into a single viewport-sized bitmap: page images first,
/// then every highlight blended on top.
pub fn compose(frame: &Frame) -> RgbaImage {
    let width = frame.width.round().max(1.0) as u32;
    let height = frame.height.round().max(1.0) as u32;
    let mut canvas = RgbaImage::from_pixel(width, height, BACKGROUND);

    for placement in &frame.pages {
        let bitmap = &placement.image;
        let Some(page) = ImageBuffer::<Rgba<u8>, &[u8]>::from_raw(
            bitmap.width,
            bitmap.height,
            bitmap.pixels.as_slice(),
        ) else {
            warn!(
                page = placement.page,
                width = bitmap.width,
                height = bitmap.height,
                "page bitmap does not match its dimensions, skipping"
            );
            continue;
        };
        imageops::replace(
            &mut canvas,
            &page,
            placement.x.round() as i64,
            placement.y.round() as i64,
        );
    }

    for highlight in &frame.highlights {
        fill_rect(&mut canvas, &highlight.rect, tint_for(highlight.kind));
    }
    canvas
}

/// Blends `tint` over the part of `rect` that lies inside the canvas.
pub fn fill_rect(canvas: &mut RgbaImage, rect: &Rect, tint: Tint) {
    let (width, height) = canvas.dimensions();
    let x0 = rect.x0.floor().clamp(0.0, width as f32) as u32;
    let x1 = rect.x1.ceil().clamp(0.0, width as f32) as u32;
    let y0 = rect.y0.floor().clamp(0.0, height as f32) as u32;
    let y1 = rect.y1.ceil().clamp(0.0, height as f32) as u32;
    if x0 >= x1 || y0 >= y1 {
        return;
    }
    for y in y0..y1 {
        for x in x0..x1 {
            blend_pixel(canvas.get_pixel_mut(x, y), tint);
        }
    }
}

fn blend_pixel(pixel: &mut Rgba<u8>, tint: Tint) {
    let alpha = tint.alpha.clamp(0.0, 1.0);
    let inv = 1.0 - alpha;
    for (channel, color) in pixel.0.iter_mut().take(3).zip(tint.color) {
        *channel = (*channel as f32 * inv + color as f32 * alpha)
            .round()
            .clamp(0.0, 255.0) as u8;
    }
}
