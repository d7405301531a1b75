//! Timeline compositor: decides which comments are visible at a given time and
//! lays them out as an append-only, word-wrapped chat log.

use std::ops::Range;

use crate::atlas::{Atlas, AtlasRegion};
use crate::text::Typeface;
use crate::transcript::{Comment, EmoticonId, Fragment};

/// Share of the line height an inline emoticon occupies.
pub const SPRITE_LINE_FILL: f32 = 0.85;

pub const MESSAGE_TEXT_COLOR: [u8; 4] = [255, 255, 255, 255];

/// Index of the next comment that has not been made visible yet.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord)]
pub struct RenderCursor(usize);

impl RenderCursor {
    pub fn index(self) -> usize {
        self.0
    }

    fn advance_to(&mut self, next: usize) {
        debug_assert!(next >= self.0, "render cursor moved backwards");
        self.0 = self.0.max(next);
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum DrawCommand {
    Text {
        line: usize,
        x: f32,
        text: String,
        color: [u8; 4],
    },
    Sprite {
        line: usize,
        x: f32,
        id: EmoticonId,
        region: AtlasRegion,
        scale: f32,
        width: f32,
        height: f32,
    },
}

impl DrawCommand {
    pub fn line(&self) -> usize {
        match self {
            Self::Text { line, .. } | Self::Sprite { line, .. } => *line,
        }
    }
}

/// Everything drawn so far, as seen by one frame. Coordinates are local to the
/// chat bounds: `x` from the left edge, lines counted from the top of the log.
#[derive(Debug, Clone, Copy)]
pub struct FrameLayout<'a> {
    pub commands: &'a [DrawCommand],
    /// Lines holding content; the newest content sits on line `line_count - 1`.
    pub line_count: usize,
    pub line_height: f32,
}

impl FrameLayout<'_> {
    pub fn is_empty(&self) -> bool {
        self.commands.is_empty()
    }
}

#[derive(Debug, Clone, Copy, Default)]
struct LineState {
    line: usize,
    x: f32,
}

pub struct Compositor<'a> {
    comments: Vec<Comment>,
    atlas: &'a Atlas,
    face: &'a dyn Typeface,
    bounds_width: f32,
    cursor: RenderCursor,
    pen: LineState,
    commands: Vec<DrawCommand>,
}

impl<'a> Compositor<'a> {
    pub fn new(
        mut comments: Vec<Comment>,
        atlas: &'a Atlas,
        face: &'a dyn Typeface,
        bounds_width: f32,
    ) -> Self {
        comments.sort_by(|a, b| a.display_time.total_cmp(&b.display_time));
        Self {
            comments,
            atlas,
            face,
            bounds_width,
            cursor: RenderCursor::default(),
            pen: LineState::default(),
            commands: Vec::new(),
        }
    }

    pub fn cursor(&self) -> RenderCursor {
        self.cursor
    }

    pub fn comments(&self) -> &[Comment] {
        &self.comments
    }

    pub fn is_finished(&self) -> bool {
        self.cursor.index() >= self.comments.len()
    }

    /// Lays out every comment with `display_time <= current_time` that is not
    /// visible yet. Returns the indices made visible by this call.
    pub fn advance(&mut self, current_time: f64) -> Range<usize> {
        let start = self.cursor.index();
        let mut end = start;
        while end < self.comments.len() && self.comments[end].display_time <= current_time {
            end += 1;
        }

        for index in start..end {
            self.layout_comment(index);
        }
        self.cursor.advance_to(end);
        start..end
    }

    pub fn layout(&self) -> FrameLayout<'_> {
        let line_count = if self.pen.x > 0.0 {
            self.pen.line + 1
        } else {
            self.pen.line
        };
        FrameLayout {
            commands: &self.commands,
            line_count,
            line_height: self.face.line_height(),
        }
    }

    fn layout_comment(&mut self, index: usize) {
        let comment = &self.comments[index];
        let author_color = comment.author_color.rgba();
        if let Some(raw) = comment.author_color.raw() {
            if crate::transcript::parse_hex_color(raw).is_none() {
                tracing::debug!(author = %comment.author_name, color = raw, "unparsable author color, using default");
            }
        }

        let label = format!("{}:", comment.author_name);
        let fragments = comment.fragments.clone();

        self.place_word(&label, author_color);
        for fragment in &fragments {
            match fragment {
                Fragment::Text(text) => self.place_text(text),
                Fragment::Emoticon { id, label } => match self.atlas.region(id) {
                    Some(region) => self.place_sprite(id, region),
                    None => {
                        tracing::warn!(%id, "emoticon missing from atlas, drawing its label");
                        self.place_text(label);
                    }
                },
            }
        }
        self.line_break();
    }

    fn place_text(&mut self, text: &str) {
        for word in text.split_whitespace() {
            self.place_word(word, MESSAGE_TEXT_COLOR);
        }
    }

    fn place_word(&mut self, word: &str, color: [u8; 4]) {
        let width = self.face.text_width(word);
        self.break_if_overflowing(width);
        self.commands.push(DrawCommand::Text {
            line: self.pen.line,
            x: self.pen.x,
            text: word.to_owned(),
            color,
        });
        self.pen.x += width + self.face.advance(' ');
    }

    fn place_sprite(&mut self, id: &EmoticonId, region: AtlasRegion) {
        if region.width == 0 || region.height == 0 {
            return;
        }
        let scale = self.face.line_height() * SPRITE_LINE_FILL / region.height as f32;
        let width = region.width as f32 * scale;
        let height = region.height as f32 * scale;

        self.break_if_overflowing(width);
        self.commands.push(DrawCommand::Sprite {
            line: self.pen.line,
            x: self.pen.x,
            id: id.clone(),
            region,
            scale,
            width,
            height,
        });
        self.pen.x += width + self.face.advance(' ');
    }

    /// Breaks iff `line_width + unit_width > bounds_width`. A unit on an empty
    /// line never breaks, so overlong words get a line of their own.
    fn break_if_overflowing(&mut self, unit_width: f32) {
        if self.pen.x > 0.0 && self.pen.x + unit_width > self.bounds_width {
            self.line_break();
        }
    }

    fn line_break(&mut self) {
        self.pen.line += 1;
        self.pen.x = 0.0;
    }
}

#[cfg(test)]
mod tests {
    use std::collections::BTreeMap;

    use image::RgbaImage;

    use super::*;
    use crate::text::MonospaceFace;

    fn text(value: &str) -> Fragment {
        Fragment::Text(value.to_owned())
    }

    fn words(layout: &FrameLayout<'_>) -> Vec<(usize, f32, String)> {
        layout
            .commands
            .iter()
            .filter_map(|command| match command {
                DrawCommand::Text { line, x, text, .. } => Some((*line, *x, text.clone())),
                DrawCommand::Sprite { .. } => None,
            })
            .collect()
    }

    #[test]
    fn word_that_exactly_fills_the_line_does_not_break() {
        // "a:" = 20 + space 10 = 30; "bbbbbbb" = 70 -> 30 + 70 == 100.
        let atlas = Atlas::empty();
        let face = MonospaceFace::new(10.0, 20.0);
        let comments = vec![Comment::new(0.0, "a", vec![text("bbbbbbb c")])];
        let mut compositor = Compositor::new(comments, &atlas, &face, 100.0);
        compositor.advance(0.0);

        let layout = compositor.layout();
        assert_eq!(
            words(&layout),
            vec![
                (0, 0.0, "a:".to_owned()),
                (0, 30.0, "bbbbbbb".to_owned()),
                (1, 0.0, "c".to_owned()),
            ]
        );
    }

    #[test]
    fn word_one_pixel_over_breaks() {
        let atlas = Atlas::empty();
        let face = MonospaceFace::new(10.0, 20.0);
        let comments = vec![Comment::new(0.0, "a", vec![text("bbbbbbb")])];
        let mut compositor = Compositor::new(comments, &atlas, &face, 99.0);
        compositor.advance(0.0);
        assert_eq!(words(&compositor.layout())[1], (1, 0.0, "bbbbbbb".to_owned()));
    }

    #[test]
    fn overlong_word_on_empty_line_stays_put() {
        let atlas = Atlas::empty();
        let face = MonospaceFace::new(10.0, 20.0);
        let comments = vec![Comment::new(0.0, "averyveryverylongname", Vec::new())];
        let mut compositor = Compositor::new(comments, &atlas, &face, 50.0);
        compositor.advance(0.0);
        let layout = compositor.layout();
        assert_eq!(words(&layout)[0].0, 0);
        assert_eq!(layout.line_count, 1);
    }

    #[test]
    fn each_comment_starts_on_a_fresh_line() {
        let atlas = Atlas::empty();
        let face = MonospaceFace::new(10.0, 20.0);
        let comments = vec![
            Comment::new(0.0, "a", vec![text("x")]),
            Comment::new(0.0, "b", vec![text("y")]),
        ];
        let mut compositor = Compositor::new(comments, &atlas, &face, 1000.0);
        assert_eq!(compositor.advance(0.0), 0..2);
        let placed = words(&compositor.layout());
        assert_eq!(placed[2], (1, 0.0, "b:".to_owned()));
        assert_eq!(compositor.layout().line_count, 2);
    }

    #[test]
    fn sprite_is_scaled_to_line_and_wraps_like_a_word() {
        let mut images = BTreeMap::new();
        images.insert(EmoticonId::new("25"), RgbaImage::new(28, 34));
        let atlas = Atlas::from_images(images, 256).expect("atlas packs");
        let face = MonospaceFace::new(10.0, 20.0);

        let emote = Fragment::Emoticon {
            id: EmoticonId::new("25"),
            label: "Kappa".to_owned(),
        };
        // "a:" + space = 30, sprite = 28 * (17 / 34) = 14 -> 44 fits, second sprite at 54 would end at 68 > 60.
        let comments = vec![Comment::new(0.0, "a", vec![emote.clone(), emote])];
        let mut compositor = Compositor::new(comments, &atlas, &face, 60.0);
        compositor.advance(0.0);

        let sprites = compositor
            .layout()
            .commands
            .iter()
            .filter_map(|command| match command {
                DrawCommand::Sprite {
                    line,
                    x,
                    width,
                    height,
                    ..
                } => Some((*line, *x, *width, *height)),
                DrawCommand::Text { .. } => None,
            })
            .collect::<Vec<_>>();
        assert_eq!(sprites, vec![(0, 30.0, 14.0, 17.0), (1, 0.0, 14.0, 17.0)]);
    }

    #[test]
    fn missing_sprite_falls_back_to_label() {
        let atlas = Atlas::empty();
        let face = MonospaceFace::new(10.0, 20.0);
        let comments = vec![Comment::new(
            0.0,
            "a",
            vec![Fragment::Emoticon {
                id: EmoticonId::new("404"),
                label: "Kappa".to_owned(),
            }],
        )];
        let mut compositor = Compositor::new(comments, &atlas, &face, 1000.0);
        compositor.advance(0.0);
        assert_eq!(words(&compositor.layout())[1].2, "Kappa");
    }

    #[test]
    fn cursor_never_moves_backwards() {
        let atlas = Atlas::empty();
        let face = MonospaceFace::new(10.0, 20.0);
        let comments = (0..5)
            .map(|idx| Comment::new(idx as f64, format!("u{idx}"), vec![text("hi")]))
            .collect::<Vec<_>>();
        let mut compositor = Compositor::new(comments, &atlas, &face, 500.0);

        assert_eq!(compositor.advance(2.0), 0..3);
        assert_eq!(compositor.advance(0.5), 3..3);
        assert_eq!(compositor.cursor().index(), 3);
        assert_eq!(compositor.advance(10.0), 3..5);
        assert!(compositor.is_finished());
    }

    #[test]
    fn unsorted_input_is_made_visible_in_time_order() {
        let atlas = Atlas::empty();
        let face = MonospaceFace::new(10.0, 20.0);
        let comments = vec![
            Comment::new(3.0, "late", Vec::new()),
            Comment::new(1.0, "early", Vec::new()),
        ];
        let mut compositor = Compositor::new(comments, &atlas, &face, 500.0);
        compositor.advance(1.0);
        assert_eq!(words(&compositor.layout()), vec![(0, 0.0, "early:".to_owned())]);
    }
}
