//! Emoticon texture atlas.
//!
//! Images are packed with a brute-force scanline packer: starting from a small
//! square atlas, images are placed left to right and wrapped into rows. If a
//! pass runs out of room, both dimensions double and the whole pass restarts.
//!
//! Regions use image coordinates: origin at the top-left corner, y pointing
//! down. Samplers with a bottom-left origin should convert with
//! [`AtlasRegion::flipped_y`].

use std::collections::BTreeMap;
use std::path::Path;

use image::RgbaImage;

use crate::emoticons::{distinct_emoticon_ids, EmoticonSource};
use crate::error::{AtlasError, PackingError};
use crate::transcript::{Comment, EmoticonId};

pub const MIN_ATLAS_SIDE: u32 = 256;
pub const MAX_ATLAS_SIDE: u32 = 16_384;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AtlasRegion {
    pub x: u32,
    pub y: u32,
    pub width: u32,
    pub height: u32,
}

impl AtlasRegion {
    pub fn right(&self) -> u32 {
        self.x + self.width
    }

    pub fn bottom(&self) -> u32 {
        self.y + self.height
    }

    pub fn intersects(&self, other: &AtlasRegion) -> bool {
        self.x < other.right()
            && other.x < self.right()
            && self.y < other.bottom()
            && other.y < self.bottom()
    }

    /// Same rectangle expressed with a bottom-left origin (y pointing up).
    /// `y` of the result is the rectangle's lower edge.
    pub fn flipped_y(&self, atlas_height: u32) -> AtlasRegion {
        AtlasRegion {
            x: self.x,
            y: atlas_height.saturating_sub(self.bottom()),
            width: self.width,
            height: self.height,
        }
    }
}

/// Result of one successful packing run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Packing {
    pub width: u32,
    pub height: u32,
    /// One region per input size, same order.
    pub regions: Vec<AtlasRegion>,
    /// How many times the atlas doubled before everything fit.
    pub resizes: u32,
}

/// Packs rectangles of the given sizes, starting from an `initial_side` square.
pub fn pack(sizes: &[(u32, u32)], initial_side: u32) -> Result<Packing, PackingError> {
    let mut side = initial_side.max(1);
    let mut resizes = 0;

    loop {
        if let Some(regions) = scanline_pass(sizes, side, side) {
            return Ok(Packing {
                width: side,
                height: side,
                regions,
                resizes,
            });
        }

        tracing::debug!(side, images = sizes.len(), "atlas pass did not fit, doubling");
        side = match side.checked_mul(2) {
            Some(next) if next <= MAX_ATLAS_SIDE => next,
            _ => {
                return Err(PackingError {
                    images: sizes.len(),
                    max_side: MAX_ATLAS_SIDE,
                    largest_width: sizes.iter().map(|size| size.0).max().unwrap_or(0),
                    largest_height: sizes.iter().map(|size| size.1).max().unwrap_or(0),
                })
            }
        };
        resizes += 1;
    }
}

fn scanline_pass(sizes: &[(u32, u32)], width: u32, height: u32) -> Option<Vec<AtlasRegion>> {
    let mut regions = Vec::with_capacity(sizes.len());
    let (mut x, mut y) = (0_u32, 0_u32);
    let mut row_height = 0_u32;

    for &(w, h) in sizes {
        if x.saturating_add(w) > width {
            x = 0;
            y = y.saturating_add(row_height);
            row_height = 0;
        }
        if x.saturating_add(w) > width || y.saturating_add(h) > height {
            return None;
        }

        regions.push(AtlasRegion {
            x,
            y,
            width: w,
            height: h,
        });
        x += w;
        row_height = row_height.max(h);
    }

    Some(regions)
}

/// Packed emoticon sheet. Built once per run, read-only afterwards.
#[derive(Debug, Clone)]
pub struct Atlas {
    image: RgbaImage,
    regions: BTreeMap<EmoticonId, AtlasRegion>,
}

impl Atlas {
    pub fn empty() -> Self {
        Self {
            image: RgbaImage::new(MIN_ATLAS_SIDE, MIN_ATLAS_SIDE),
            regions: BTreeMap::new(),
        }
    }

    /// Packs already-decoded images, in iteration order of the map.
    pub fn from_images(
        images: BTreeMap<EmoticonId, RgbaImage>,
        initial_side: u32,
    ) -> Result<Self, PackingError> {
        let sizes = images
            .values()
            .map(|image| image.dimensions())
            .collect::<Vec<_>>();
        let packing = pack(&sizes, initial_side)?;

        let mut sheet = RgbaImage::new(packing.width, packing.height);
        let mut regions = BTreeMap::new();
        for ((id, image), region) in images.into_iter().zip(packing.regions) {
            image::imageops::replace(&mut sheet, &image, i64::from(region.x), i64::from(region.y));
            regions.insert(id, region);
        }

        Ok(Self {
            image: sheet,
            regions,
        })
    }

    pub fn region(&self, id: &EmoticonId) -> Option<AtlasRegion> {
        self.regions.get(id).copied()
    }

    pub fn regions(&self) -> impl Iterator<Item = (&EmoticonId, &AtlasRegion)> {
        self.regions.iter()
    }

    pub fn len(&self) -> usize {
        self.regions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.regions.is_empty()
    }

    pub fn width(&self) -> u32 {
        self.image.width()
    }

    pub fn height(&self) -> u32 {
        self.image.height()
    }

    pub fn image(&self) -> &RgbaImage {
        &self.image
    }

    pub fn save_png(&self, path: &Path) -> Result<(), AtlasError> {
        self.image
            .save_with_format(path, image::ImageFormat::Png)
            .map_err(|source| AtlasError::Save {
                path: path.to_path_buf(),
                source,
            })
    }
}

/// Fetches every distinct emoticon referenced by `comments` once and packs them.
pub fn build_atlas(
    comments: &[Comment],
    source: &dyn EmoticonSource,
    initial_side: u32,
) -> Result<Atlas, AtlasError> {
    let ids = distinct_emoticon_ids(comments);
    let mut images = BTreeMap::new();
    for id in ids {
        let image = source.fetch(&id)?;
        images.insert(id, image);
    }

    let atlas = Atlas::from_images(images, initial_side)?;
    tracing::info!(
        emoticons = atlas.len(),
        width = atlas.width(),
        height = atlas.height(),
        "built emoticon atlas"
    );
    Ok(atlas)
}
