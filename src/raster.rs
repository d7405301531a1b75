use std::collections::HashMap;

use image::GenericImageView;
use tiny_skia::{
    Color, ColorU8, FilterQuality, Paint, Pattern, Pixmap, PixmapPaint, PremultipliedColorU8,
    Rect, SpreadMode, Transform,
};

use crate::atlas::Atlas;
use crate::compositor::{DrawCommand, FrameLayout};
use crate::config::ChatBounds;
use crate::encoding::PixelOrigin;
use crate::error::{RenderError, RenderResult};
use crate::text::{GlyphBitmap, Typeface};
use crate::transcript::EmoticonId;

/// Translucent box drawn behind the chat, extending past the bounds on every side.
pub const CHAT_BACKDROP_COLOR: [u8; 4] = [0x00, 0x00, 0x00, 0x78];
pub const CHAT_BACKDROP_PADDING: f32 = 10.0;

/// One composited frame: straight-alpha RGBA rows, top row first.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PixelBuffer {
    pub width: u32,
    pub height: u32,
    pub data: Vec<u8>,
}

impl PixelBuffer {
    pub fn new(width: u32, height: u32, data: Vec<u8>) -> Self {
        Self {
            width,
            height,
            data,
        }
    }

    pub fn byte_len(width: u32, height: u32) -> usize {
        width as usize * height as usize * 4
    }

    pub fn from_pixmap(pixmap: &Pixmap) -> Self {
        let mut data = Vec::with_capacity(Self::byte_len(pixmap.width(), pixmap.height()));
        for pixel in pixmap.pixels() {
            let color = pixel.demultiply();
            data.extend_from_slice(&[color.red(), color.green(), color.blue(), color.alpha()]);
        }
        Self::new(pixmap.width(), pixmap.height(), data)
    }

    pub fn pixel(&self, x: u32, y: u32) -> Option<[u8; 4]> {
        if x >= self.width || y >= self.height {
            return None;
        }
        let idx = (y as usize * self.width as usize + x as usize) * 4;
        let px = &self.data[idx..idx + 4];
        Some([px[0], px[1], px[2], px[3]])
    }
}

/// Rasterizes compositor layouts into fixed-size frames.
///
/// The chat is drawn into its own surface the size of the chat bounds, with the
/// newest line resting on the bottom edge and older lines scrolling up and out.
pub struct FrameRenderer<'a> {
    bounds: ChatBounds,
    backdrop: Pixmap,
    chat: Pixmap,
    /// One pixmap per atlas region, so filtering never reaches a neighbour.
    sprites: HashMap<EmoticonId, Pixmap>,
    face: &'a dyn Typeface,
    glyphs: HashMap<char, Option<GlyphBitmap>>,
}

impl<'a> FrameRenderer<'a> {
    pub fn new(
        width: u32,
        height: u32,
        bounds: ChatBounds,
        atlas: &Atlas,
        face: &'a dyn Typeface,
    ) -> RenderResult<Self> {
        let mut backdrop = new_pixmap(width, height)?;
        let padded = Rect::from_xywh(
            bounds.x - CHAT_BACKDROP_PADDING,
            bounds.y - CHAT_BACKDROP_PADDING,
            bounds.width + CHAT_BACKDROP_PADDING * 2.0,
            bounds.height + CHAT_BACKDROP_PADDING * 2.0,
        );
        if let Some(rect) = padded {
            let mut paint = Paint::default();
            let [r, g, b, a] = CHAT_BACKDROP_COLOR;
            paint.set_color_rgba8(r, g, b, a);
            backdrop.fill_rect(rect, &paint, Transform::identity(), None);
        }

        let chat = new_pixmap(
            bounds.width.ceil().max(1.0) as u32,
            bounds.height.ceil().max(1.0) as u32,
        )?;

        Ok(Self {
            bounds,
            backdrop,
            chat,
            sprites: sprite_pixmaps(atlas)?,
            face,
            glyphs: HashMap::new(),
        })
    }

    pub fn origin(&self) -> PixelOrigin {
        PixelOrigin::TopLeft
    }

    pub fn render(&mut self, layout: &FrameLayout<'_>) -> PixelBuffer {
        self.chat.fill(Color::TRANSPARENT);

        let chat_height = self.chat.height() as f32;
        let line_height = layout.line_height;
        let ascent = self.face.ascent();

        for command in &layout.commands[first_visible_command(layout, chat_height)..] {
            let lines_below = layout.line_count.saturating_sub(command.line()) as f32;
            let top = chat_height - lines_below * line_height;
            if top + line_height <= 0.0 || top >= chat_height {
                continue;
            }

            match command {
                DrawCommand::Text { x, text, color, .. } => {
                    let mut pen = *x;
                    let baseline = top + ascent;
                    for ch in text.chars() {
                        let face = self.face;
                        let glyph = self
                            .glyphs
                            .entry(ch)
                            .or_insert_with(|| face.rasterize(ch));
                        if let Some(glyph) = glyph {
                            draw_glyph(
                                &mut self.chat,
                                pen.round() as i32 + glyph.offset_x,
                                baseline.round() as i32 + glyph.offset_y,
                                glyph,
                                *color,
                            );
                        }
                        pen += face.advance(ch);
                    }
                }
                DrawCommand::Sprite {
                    x,
                    id,
                    scale,
                    width,
                    height,
                    ..
                } => {
                    let Some(sprite) = self.sprites.get(id) else {
                        continue;
                    };
                    let y = top + (line_height - height) / 2.0;
                    let Some(dest) = Rect::from_xywh(*x, y, *width, *height) else {
                        continue;
                    };
                    let sampling = Transform::from_row(*scale, 0.0, 0.0, *scale, *x, y);
                    let paint = Paint {
                        shader: Pattern::new(
                            sprite.as_ref(),
                            SpreadMode::Pad,
                            FilterQuality::Bilinear,
                            1.0,
                            sampling,
                        ),
                        ..Paint::default()
                    };
                    self.chat
                        .fill_rect(dest, &paint, Transform::identity(), None);
                }
            }
        }

        let mut frame = self.backdrop.clone();
        frame.draw_pixmap(
            self.bounds.x.round() as i32,
            self.bounds.y.round() as i32,
            self.chat.as_ref(),
            &PixmapPaint::default(),
            Transform::identity(),
            None,
        );
        PixelBuffer::from_pixmap(&frame)
    }
}

fn new_pixmap(width: u32, height: u32) -> RenderResult<Pixmap> {
    Pixmap::new(width, height).ok_or(RenderError::Surface { width, height })
}

/// Index of the first command on a line that can still reach the chat surface.
/// Commands are ordered by line, so everything before it is scrolled out.
fn first_visible_command(layout: &FrameLayout<'_>, chat_height: f32) -> usize {
    if layout.line_height <= 0.0 {
        return 0;
    }
    let visible_lines = (chat_height / layout.line_height).ceil() as usize + 1;
    let first_line = layout.line_count.saturating_sub(visible_lines);
    layout
        .commands
        .partition_point(|command| command.line() < first_line)
}

fn sprite_pixmaps(atlas: &Atlas) -> RenderResult<HashMap<EmoticonId, Pixmap>> {
    let mut sprites = HashMap::with_capacity(atlas.len());
    for (id, region) in atlas.regions() {
        if region.width == 0 || region.height == 0 {
            continue;
        }
        let cut = image::imageops::crop_imm(
            atlas.image(),
            region.x,
            region.y,
            region.width,
            region.height,
        );
        let mut pixmap = new_pixmap(region.width, region.height)?;
        for (dst, (_, _, src)) in pixmap.pixels_mut().iter_mut().zip(cut.pixels()) {
            let [r, g, b, a] = src.0;
            *dst = ColorU8::from_rgba(r, g, b, a).premultiply();
        }
        sprites.insert(id.clone(), pixmap);
    }
    Ok(sprites)
}

fn draw_glyph(pixmap: &mut Pixmap, x: i32, y: i32, glyph: &GlyphBitmap, color: [u8; 4]) {
    let width = pixmap.width() as i32;
    let height = pixmap.height() as i32;
    let pixels = pixmap.pixels_mut();

    for row in 0..glyph.height {
        let py = y + row as i32;
        if py < 0 || py >= height {
            continue;
        }
        for col in 0..glyph.width {
            let px = x + col as i32;
            if px < 0 || px >= width {
                continue;
            }
            let coverage = glyph.coverage[row * glyph.width + col];
            if coverage == 0 {
                continue;
            }
            let idx = (py * width + px) as usize;
            pixels[idx] = blend_over(pixels[idx], color, coverage);
        }
    }
}

/// Source-over of a straight-alpha color, scaled by `coverage`, onto a premultiplied pixel.
fn blend_over(dst: PremultipliedColorU8, color: [u8; 4], coverage: u8) -> PremultipliedColorU8 {
    let alpha = mul_div255(color[3], coverage);
    if alpha == 0 {
        return dst;
    }
    let inv = 255 - alpha;
    let red = mul_div255(color[0], alpha) + mul_div255(dst.red(), inv);
    let green = mul_div255(color[1], alpha) + mul_div255(dst.green(), inv);
    let blue = mul_div255(color[2], alpha) + mul_div255(dst.blue(), inv);
    let out_alpha = alpha + mul_div255(dst.alpha(), inv);
    PremultipliedColorU8::from_rgba(red, green, blue, out_alpha).unwrap_or(dst)
}

fn mul_div255(x: u8, y: u8) -> u8 {
    ((u32::from(x) * u32::from(y) + 127) / 255) as u8
}
