use std::path::{Path, PathBuf};

use image::{DynamicImage, Rgba, RgbaImage};
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::config::PackConfig;
use crate::error::Result;
use crate::id::{AtlasId, PageId, PlacementId};
use crate::placement::{OmitReason, TexturePlacement};
use crate::properties::TextureProperties;
use crate::texture::TextureImage;

/// A rectangle cleared this run by a removed placement. The updater
/// blanks these to background instead of regenerating the whole atlas.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClearedRegion {
    pub x: u32,
    pub y: u32,
    pub x_size: u32,
    pub y_size: u32,
}

impl ClearedRegion {
    pub fn of(placement: &TexturePlacement) -> Self {
        Self {
            x: placement.placed.x,
            y: placement.placed.y,
            x_size: placement.placed.x_size,
            y_size: placement.placed.y_size,
        }
    }

    fn clear(&self, canvas: &mut RgbaImage, background: [u8; 4]) {
        let px = Rgba(background);
        for y in self.y..self.y + self.y_size {
            for x in self.x..self.x + self.x_size {
                canvas.put_pixel(x, y, px);
            }
        }
    }
}

/// One packed output raster: the placements it holds, the rectangle each
/// occupies, and the bookkeeping the incremental updater needs.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AtlasImage {
    pub page: PageId,
    /// Position of this atlas within its page's creation order.
    pub index: u32,
    pub x_size: u32,
    pub y_size: u32,
    pub properties: TextureProperties,

    pub basename: String,
    /// Resolved output path (map dir + group dir + basename + extension).
    pub filename: String,

    pub placements: Vec<PlacementId>,
    pub cleared_regions: Vec<ClearedRegion>,
    /// No image file corresponds to this atlas yet (or the old one was
    /// invalidated); the updater must render from scratch.
    pub new_image: bool,
}

impl AtlasImage {
    pub fn new(page: PageId, index: u32, properties: TextureProperties, cfg: &PackConfig) -> Self {
        Self {
            page,
            index,
            x_size: cfg.page_max_x,
            y_size: cfg.page_max_y,
            properties,
            basename: String::new(),
            filename: String::new(),
            placements: Vec::new(),
            cleared_regions: Vec::new(),
            new_image: true,
        }
    }

    /// True when nothing on this atlas is worth generating: no placements,
    /// or a single placement already flagged solitary.
    pub fn is_empty(&self, pool: &[TexturePlacement]) -> bool {
        match self.placements.len() {
            0 => true,
            1 => pool[self.placements[0].index()].omit_reason == OmitReason::Solitary,
            _ => false,
        }
    }

    /// Fraction of the atlas covered by placements.
    pub fn count_utilization(&self, pool: &[TexturePlacement]) -> f64 {
        let used: u64 = self
            .placements
            .iter()
            .map(|pid| {
                let p = &pool[pid.index()].placed;
                p.x_size as u64 * p.y_size as u64
            })
            .sum();
        used as f64 / (self.x_size as u64 * self.y_size as u64) as f64
    }

    /// Top-left hole search. Scans rows top to bottom; within a row it
    /// hops past the first intersecting placement, and the next row starts
    /// at the lowest bottom edge seen, which strictly increases and bounds
    /// the search.
    pub fn find_hole(&self, pool: &[TexturePlacement], x_size: u32, y_size: u32) -> Option<(u32, u32)> {
        let mut y = 0u32;
        while y + y_size <= self.y_size {
            let mut next_y = self.y_size;
            let mut x = 0u32;
            while x + x_size <= self.x_size {
                match self.find_overlap(pool, x, y, x_size, y_size) {
                    None => return Some((x, y)),
                    Some(ov) => {
                        let p = &pool[ov.index()].placed;
                        let next_x = p.x + p.x_size;
                        next_y = next_y.min(p.y + p.y_size);
                        debug_assert!(next_x > x);
                        x = next_x;
                    }
                }
            }
            debug_assert!(next_y > y);
            y = next_y;
        }
        None
    }

    /// The first placement on this atlas intersecting the rectangle, if
    /// any.
    fn find_overlap(
        &self,
        pool: &[TexturePlacement],
        x: u32,
        y: u32,
        x_size: u32,
        y_size: u32,
    ) -> Option<PlacementId> {
        self.placements
            .iter()
            .copied()
            .find(|pid| pool[pid.index()].placed.intersects(x, y, x_size, y_size))
    }

    /// Attempts to place the texture on this atlas. On success the
    /// placement records its slot and joins the atlas's list.
    pub fn place(
        &mut self,
        pool: &mut [TexturePlacement],
        pid: PlacementId,
        self_id: AtlasId,
    ) -> bool {
        let (w, h) = {
            let p = &pool[pid.index()];
            debug_assert!(p.size_known);
            debug_assert!(!p.is_placed());
            (p.desired.x_size, p.desired.y_size)
        };
        if let Some((x, y)) = self.find_hole(pool, w, h) {
            pool[pid.index()].place_at(self_id, x, y);
            self.placements.push(pid);
            true
        } else {
            false
        }
    }

    /// Removes the placement, recording its rectangle for blanking.
    pub fn unplace(&mut self, pool: &mut [TexturePlacement], pid: PlacementId) {
        debug_assert!(pool[pid.index()].is_placed());
        self.placements.retain(|p| *p != pid);
        self.cleared_regions.push(ClearedRegion::of(&pool[pid.index()]));
        pool[pid.index()].clear_image();
    }

    /// Flags a lone occupant `solitary` (scenes then keep referencing the
    /// original texture) or clears stale marks when the atlas has company.
    /// With `omit_solitary` off, only placements already solitary from a
    /// previous pass stay that way.
    pub fn check_solitary(&mut self, pool: &mut [TexturePlacement], omit_solitary: bool) {
        if self.placements.len() == 1 {
            let p = &mut pool[self.placements[0].index()];
            debug_assert!(matches!(
                p.omit_reason,
                OmitReason::None | OmitReason::Solitary
            ));
            if omit_solitary || p.omit_reason == OmitReason::Solitary {
                p.omit_reason = OmitReason::Solitary;
            }
        } else {
            for pid in &self.placements {
                let p = &mut pool[pid.index()];
                debug_assert!(matches!(
                    p.omit_reason,
                    OmitReason::None | OmitReason::Solitary
                ));
                p.omit_reason = OmitReason::None;
            }
        }
    }

    /// Shrinks the atlas as far as repacking allows, halving one axis at a
    /// time. Each candidate size is tried against a simulated repack;
    /// a failed trial leaves every placement exactly where it was, so an
    /// unshrinkable atlas never disturbs its occupants.
    pub fn optimal_resize(&mut self, pool: &mut [TexturePlacement], textures: &[TextureImage]) {
        if self.is_empty(pool) {
            return;
        }

        let mut resized_any = false;
        loop {
            let mut success = false;
            debug_assert!(self.x_size > 0 && self.y_size > 0);
            if self.try_resize(pool, textures, self.x_size / 2, self.y_size) {
                success = true;
                resized_any = true;
            }
            if self.try_resize(pool, textures, self.x_size, self.y_size / 2) {
                success = true;
                resized_any = true;
            }
            if !success {
                break;
            }
        }

        if resized_any {
            info!(
                atlas = %self.filename,
                x_size = self.x_size,
                y_size = self.y_size,
                "resized atlas"
            );
        }
    }

    /// Trial-repacks every placement into an empty `x_size` by `y_size`
    /// canvas, committing the new slots only if all of them fit. The trial
    /// is a full repack, so it orders placements exactly like the initial
    /// pack does.
    fn try_resize(
        &mut self,
        pool: &mut [TexturePlacement],
        textures: &[TextureImage],
        x_size: u32,
        y_size: u32,
    ) -> bool {
        if x_size == 0 || y_size == 0 {
            return false;
        }

        let mut order: Vec<PlacementId> = self.placements.clone();
        order.sort_by(crate::page::placement_pack_order(pool, textures));

        let mut trial: Vec<(u32, u32, u32, u32)> = Vec::with_capacity(order.len());
        let mut slots: Vec<(PlacementId, u32, u32)> = Vec::with_capacity(order.len());
        for pid in &order {
            // The commit below re-places at the desired footprint, so the
            // trial must reserve exactly that.
            let p = &pool[pid.index()].desired;
            match trial_hole(&trial, x_size, y_size, p.x_size, p.y_size) {
                Some((x, y)) => {
                    trial.push((x, y, p.x_size, p.y_size));
                    slots.push((*pid, x, y));
                }
                None => return false,
            }
        }

        // Commit: every occupant moves to its trial slot and must be
        // re-rendered; the file contents are invalid wholesale.
        self.x_size = x_size;
        self.y_size = y_size;
        for (pid, x, y) in slots {
            let p = &mut pool[pid.index()];
            p.desired.x = x;
            p.desired.y = y;
            p.placed = p.desired;
            p.is_filled = false;
        }
        self.cleared_regions.clear();
        self.remove_file();
        self.new_image = true;
        true
    }

    /// Re-resolves the output filename from the naming pattern. Returns
    /// true when it changed, in which case the old files are deleted and
    /// every referencing scene must be rewritten.
    pub fn setup_filename(
        &mut self,
        group_name: &str,
        group_dirname: &str,
        page_key: &str,
        cfg: &PackConfig,
    ) -> bool {
        let mut basename = String::new();
        let mut chars = cfg.image_pattern.chars().peekable();
        while let Some(c) = chars.next() {
            if c != '%' {
                basename.push(c);
                continue;
            }
            match chars.next() {
                Some('%') => basename.push('%'),
                Some('g') => basename.push_str(group_name),
                Some('p') => basename.push_str(page_key),
                Some('i') => basename.push_str(&(self.index + 1).to_string()),
                Some(other) => {
                    basename.push('%');
                    basename.push(other);
                }
                None => basename.push('%'),
            }
        }
        // End the basename with a dot so an embedded dot is not mistaken
        // for the start of a filename extension.
        if !basename.ends_with('.') {
            basename.push('.');
        }

        let mut dir = PathBuf::from(&cfg.map_dir);
        if !group_dirname.is_empty() {
            dir.push(group_dirname);
        }
        let filename = dir
            .join(format!("{}{}", basename, self.properties.color_type.extension()))
            .to_string_lossy()
            .replace('\\', "/");

        let changed = filename != self.filename;
        if changed {
            if !self.filename.is_empty() {
                info!(from = %self.filename, to = %filename, "renaming atlas");
                let old = PathBuf::from(&self.filename);
                if old.exists() {
                    if let Err(e) = std::fs::remove_file(&old) {
                        warn!(file = %self.filename, error = %e, "cannot delete old atlas");
                    }
                }
                self.new_image = true;
            }
            self.basename = basename;
            self.filename = filename;
        }
        changed
    }

    pub fn exists(&self) -> bool {
        !self.filename.is_empty() && Path::new(&self.filename).exists()
    }

    /// Deletes the image file; the atlas will be rendered from scratch if
    /// it is ever needed again.
    pub fn remove_file(&mut self) {
        if self.exists() {
            if let Err(e) = std::fs::remove_file(Path::new(&self.filename)) {
                warn!(file = %self.filename, error = %e, "cannot delete atlas image");
            }
        }
        self.new_image = true;
    }

    /// Regenerates the image file if anything staled it: brand-new atlas,
    /// missing file, vacated rectangles, unfilled placements, or a source
    /// newer than the atlas. Returns whether a write happened.
    pub fn update_image(
        &mut self,
        pool: &mut [TexturePlacement],
        textures: &[TextureImage],
        cfg: &PackConfig,
    ) -> Result<bool> {
        if self.is_empty(pool) && cfg.aggressively_clean {
            self.remove_file();
            return Ok(false);
        }

        if cfg.redo_all {
            self.remove_file();
        }

        let mut needs_update = self.new_image || !self.exists() || !self.cleared_regions.is_empty();

        // Keep scanning after the first hit so every out-of-date source is
        // marked for recopy. Timestamps are only consulted for textures a
        // scanned scene named this run.
        let atlas_mtime = std::fs::metadata(Path::new(&self.filename))
            .and_then(|m| m.modified())
            .ok();
        for pid in &self.placements {
            let p = &mut pool[pid.index()];
            let texture = &textures[p.texture.index()];
            if !p.is_filled {
                needs_update = true;
            } else if texture.seen {
                if let (Some(atlas_time), Some(src_time)) = (atlas_mtime, texture.source_mtime()) {
                    if src_time > atlas_time {
                        p.is_filled = false;
                        needs_update = true;
                    }
                }
            }
        }

        if !needs_update {
            return Ok(false);
        }

        let (mut canvas, fresh) = self.get_image(cfg);
        if fresh {
            // A from-scratch canvas holds nothing; every placement must be
            // re-rendered, whatever its filled flag says.
            for pid in &self.placements {
                pool[pid.index()].is_filled = false;
            }
        }

        for region in self.cleared_regions.drain(..) {
            region.clear(&mut canvas, cfg.background);
        }

        for pid in &self.placements {
            let p = &mut pool[pid.index()];
            if p.is_filled {
                continue;
            }
            let texture = &textures[p.texture.index()];
            match image::open(texture.source_path_buf()) {
                Ok(img) => p.fill_into(&mut canvas, &img.to_rgba8()),
                Err(e) => {
                    warn!(texture = %texture.name, path = %texture.source_path, error = %e,
                          "source unreadable, painting error color");
                    p.fill_error(&mut canvas);
                }
            }
        }

        self.write(canvas)?;
        self.new_image = false;
        Ok(true)
    }

    /// Loads the existing atlas image, or allocates a fresh
    /// background-filled canvas when there is none to extend. The flag
    /// says which happened.
    fn get_image(&mut self, cfg: &PackConfig) -> (RgbaImage, bool) {
        if !self.new_image && self.exists() {
            if let Ok(img) = image::open(Path::new(&self.filename)) {
                let rgba = img.to_rgba8();
                if rgba.dimensions() == (self.x_size, self.y_size) {
                    return (rgba, false);
                }
            }
        }

        info!(atlas = %self.filename, "generating new atlas image");
        self.cleared_regions.clear();
        let mut canvas = RgbaImage::new(self.x_size, self.y_size);
        let bg = Rgba(cfg.background);
        for px in canvas.pixels_mut() {
            *px = bg;
        }
        (canvas, true)
    }

    fn write(&self, canvas: RgbaImage) -> Result<()> {
        let path = PathBuf::from(&self.filename);
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }
        // An alpha-carrying single-channel format keeps its alpha plane.
        let rgba = DynamicImage::ImageRgba8(canvas);
        let out: DynamicImage = match self.properties.channel_count {
            1 if !self.properties.has_alpha() => DynamicImage::ImageLuma8(rgba.to_luma8()),
            1 | 2 => DynamicImage::ImageLumaA8(rgba.to_luma_alpha8()),
            3 => DynamicImage::ImageRgb8(rgba.to_rgb8()),
            _ => rgba,
        };
        out.save(&path)?;
        info!(atlas = %self.filename, "wrote atlas image");
        Ok(())
    }
}

/// The same hole search as [`AtlasImage::find_hole`], run against a list
/// of already-committed trial rectangles instead of live placements.
fn trial_hole(
    rects: &[(u32, u32, u32, u32)],
    atlas_x: u32,
    atlas_y: u32,
    x_size: u32,
    y_size: u32,
) -> Option<(u32, u32)> {
    let overlap = |x: u32, y: u32| {
        rects.iter().copied().find(|&(rx, ry, rw, rh)| {
            !(x >= rx + rw || x + x_size <= rx || y >= ry + rh || y + y_size <= ry)
        })
    };

    let mut y = 0u32;
    while y + y_size <= atlas_y {
        let mut next_y = atlas_y;
        let mut x = 0u32;
        while x + x_size <= atlas_x {
            match overlap(x, y) {
                None => return Some((x, y)),
                Some((rx, ry, rw, rh)) => {
                    x = rx + rw;
                    next_y = next_y.min(ry + rh);
                }
            }
        }
        y = next_y;
    }
    None
}
