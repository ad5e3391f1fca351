use image::{Rgba, RgbaImage};
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::config::PackConfig;
use crate::id::{AtlasId, GroupId, TextureId};
use crate::resample::box_resample;
use crate::scene::{TexCoord, UvTransform, WrapMode};
use crate::texture::TextureImage;

/// Why a texture is not (or not usefully) in an atlas this run.
///
/// `Working` is a transient state while a run is in progress; `None` means
/// successfully placed. `Solitary` placements still occupy an atlas, but
/// scenes are told to keep referencing the original texture file.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OmitReason {
    Working,
    None,
    Solitary,
    Size,
    Repeats,
    Omitted,
    Unknown,
    Coverage,
}

impl OmitReason {
    /// Terminal reasons that keep a texture out of any atlas for the rest
    /// of the run.
    pub fn is_terminal_omit(self) -> bool {
        matches!(
            self,
            OmitReason::Size
                | OmitReason::Repeats
                | OmitReason::Omitted
                | OmitReason::Unknown
                | OmitReason::Coverage
        )
    }
}

/// The pixel footprint of a texture within an atlas: size, UV box, wrap
/// modes, margin, and (once placed) position.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct PlacementRect {
    pub x: u32,
    pub y: u32,
    pub x_size: u32,
    pub y_size: u32,
    pub min_uv: TexCoord,
    pub max_uv: TexCoord,
    pub wrap_u: WrapMode,
    pub wrap_v: WrapMode,
    pub margin: u32,
}

impl Default for PlacementRect {
    fn default() -> Self {
        Self {
            x: 0,
            y: 0,
            x_size: 0,
            y_size: 0,
            min_uv: TexCoord::new(0.0, 0.0),
            max_uv: TexCoord::new(1.0, 1.0),
            wrap_u: WrapMode::Clamp,
            wrap_v: WrapMode::Clamp,
            margin: 0,
        }
    }
}

impl PlacementRect {
    pub fn intersects(&self, x: u32, y: u32, x_size: u32, y_size: u32) -> bool {
        !(x >= self.x + self.x_size
            || x + x_size <= self.x
            || y >= self.y + self.y_size
            || y + y_size <= self.y)
    }
}

/// The UV range and wrap modes of one scene reference, as fed to sizing.
#[derive(Debug, Clone, Copy)]
pub struct UvRef {
    pub uvs: Option<(TexCoord, TexCoord)>,
    pub wrap_u: WrapMode,
    pub wrap_v: WrapMode,
}

/// What the driver must do after `determine_size`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SizeOutcome {
    /// Current atlas slot (if any) remains valid.
    Keep,
    /// The placement must be removed from its atlas before packing.
    Unplace,
}

/// One texture's participation in one group.
///
/// `desired` is what the current scene references ask for; `placed` is
/// what is actually baked into an atlas right now. Keeping them separate
/// lets a later run detect drift without disturbing a still-valid slot.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TexturePlacement {
    pub texture: TextureId,
    pub group: GroupId,
    pub image: Option<AtlasId>,
    pub has_uvs: bool,
    pub size_known: bool,
    pub is_filled: bool,
    pub omit_reason: OmitReason,
    pub desired: PlacementRect,
    pub placed: PlacementRect,
}

impl TexturePlacement {
    pub fn new(texture: TextureId, group: GroupId, size_known: bool) -> Self {
        Self {
            texture,
            group,
            image: None,
            has_uvs: false,
            size_known: false,
            is_filled: false,
            omit_reason: if size_known {
                OmitReason::Working
            } else {
                OmitReason::Unknown
            },
            desired: PlacementRect::default(),
            placed: PlacementRect::default(),
        }
    }

    pub fn is_placed(&self) -> bool {
        self.image.is_some()
    }

    /// Area of the desired UV box; 1.0 is the whole texture, more implies
    /// repetition.
    pub fn uv_area(&self) -> f64 {
        let range_u = self.desired.max_uv.u - self.desired.min_uv.u;
        let range_v = self.desired.max_uv.v - self.desired.min_uv.v;
        range_u * range_v
    }

    /// Recomputes `desired` from the UV coverage of the given references
    /// and decides whether the texture can be placed, setting
    /// `omit_reason` accordingly. Returns whether the driver must vacate
    /// the current atlas slot.
    pub fn determine_size(
        &mut self,
        texture: &TextureImage,
        uv_refs: &[UvRef],
        cfg: &PackConfig,
    ) -> SizeOutcome {
        if !texture.size_known {
            self.omit_reason = OmitReason::Unknown;
            self.size_known = false;
            return SizeOutcome::Unplace;
        }

        if self.omit_reason == OmitReason::Solitary {
            // A previously solitary texture gets a second chance; packing
            // may give it company this run.
            self.omit_reason = OmitReason::None;
        }

        // Fold the UV boxes of every referencing scene; any repeat wrap
        // makes the whole placement repeat on that axis.
        self.has_uvs = false;
        let mut min_uv = TexCoord::new(0.0, 0.0);
        let mut max_uv = TexCoord::new(1.0, 1.0);
        let mut wrap_u = WrapMode::Clamp;
        let mut wrap_v = WrapMode::Clamp;
        for r in uv_refs {
            if let Some((n, x)) = r.uvs {
                if self.has_uvs {
                    min_uv = min_uv.min_with(n);
                    max_uv = max_uv.max_with(x);
                } else {
                    min_uv = n;
                    max_uv = x;
                    self.has_uvs = true;
                }
            }
            if r.wrap_u == WrapMode::Repeat {
                wrap_u = WrapMode::Repeat;
            }
            if r.wrap_v == WrapMode::Repeat {
                wrap_v = WrapMode::Repeat;
            }
        }
        self.desired.wrap_u = wrap_u;
        self.desired.wrap_v = wrap_v;

        // Round the box outward to the configured grid so trivial UV edits
        // do not resize the slot.
        let (rounded_min, rounded_max) = if cfg.round_uvs {
            (
                TexCoord::new(
                    round_down(min_uv.u, cfg.round_unit, cfg.round_fuzz),
                    round_down(min_uv.v, cfg.round_unit, cfg.round_fuzz),
                ),
                TexCoord::new(
                    round_up(max_uv.u, cfg.round_unit, cfg.round_fuzz),
                    round_up(max_uv.v, cfg.round_unit, cfg.round_fuzz),
                ),
            )
        } else {
            (min_uv, max_uv)
        };

        self.compute_size_from_uvs(texture, rounded_min, rounded_max);

        if texture.omit {
            self.omit_reason = OmitReason::Omitted;
            return SizeOutcome::Unplace;
        }

        if self.uv_area() > texture.repeat_threshold_pct / 100.0 {
            self.omit_reason = OmitReason::Repeats;
            return SizeOutcome::Unplace;
        }

        // Too big for an empty page in either dimension, or exactly a full
        // page in both (which would consume an entire page and prevent any
        // sharing).
        if self.desired.x_size > cfg.page_max_x
            || self.desired.y_size > cfg.page_max_y
            || (self.desired.x_size == cfg.page_max_x && self.desired.y_size == cfg.page_max_y)
        {
            self.omit_reason = OmitReason::Size;
            return SizeOutcome::Unplace;
        }

        if self.omit_reason.is_terminal_omit() {
            // Previously omitted, but it fits now.
            self.omit_reason = OmitReason::Working;
            return SizeOutcome::Unplace;
        }

        if self.is_placed() {
            if self.desired.x_size != self.placed.x_size
                || self.desired.y_size != self.placed.y_size
                || self.desired.min_uv.u < self.placed.min_uv.u
                || self.desired.min_uv.v < self.placed.min_uv.v
                || self.desired.max_uv.u > self.placed.max_uv.u
                || self.desired.max_uv.v > self.placed.max_uv.v
            {
                // The slot no longer matches. Before forcing a re-place,
                // see whether the un-rounded box would still have fit in
                // the existing slot; if so, keep the slot and skip the
                // rounding for this texture.
                if cfg.round_uvs {
                    self.compute_size_from_uvs(texture, min_uv, max_uv);
                    let fits = self.desired.x_size <= self.placed.x_size
                        && self.desired.y_size <= self.placed.y_size
                        && self.desired.min_uv.u >= self.placed.min_uv.u
                        && self.desired.min_uv.v >= self.placed.min_uv.v
                        && self.desired.max_uv.u <= self.placed.max_uv.u
                        && self.desired.max_uv.v <= self.placed.max_uv.v;
                    if !fits {
                        self.compute_size_from_uvs(texture, rounded_min, rounded_max);
                        debug!(texture = %self.texture, "placement drifted, forcing re-place");
                        return SizeOutcome::Unplace;
                    }
                } else {
                    debug!(texture = %self.texture, "placement drifted, forcing re-place");
                    return SizeOutcome::Unplace;
                }
            }

            if self.desired.wrap_u != self.placed.wrap_u
                || self.desired.wrap_v != self.placed.wrap_v
            {
                // Wrap change alone keeps the slot but forces a refill.
                self.placed.wrap_u = self.desired.wrap_u;
                self.placed.wrap_v = self.desired.wrap_v;
                self.is_filled = false;
            }
        }

        SizeOutcome::Keep
    }

    /// Computes the pixel footprint from a UV box and the source size,
    /// clamping to the 4px floor and promoting interior margins to
    /// exterior ones when they would eat too much of a tiny texture.
    fn compute_size_from_uvs(&mut self, texture: &TextureImage, min_uv: TexCoord, max_uv: TexCoord) {
        self.desired.min_uv = min_uv;
        self.desired.max_uv = max_uv;

        let (src_x, src_y) = texture.effective_size();
        let range_u = max_uv.u - min_uv.u;
        let range_v = max_uv.v - min_uv.v;

        let x_size = round_half_up(src_x as f64 * range_u).max(4) as u32;
        let y_size = round_half_up(src_y as f64 * range_v).max(4) as u32;
        self.desired.x_size = x_size;
        self.desired.y_size = y_size;

        let margin = texture.margin;
        self.desired.margin = margin;
        if margin as f64 / self.desired.x_size as f64 > 0.10 {
            self.desired.x_size += margin * 2;
        }
        if margin as f64 / self.desired.y_size as f64 > 0.10 {
            self.desired.y_size += margin * 2;
        }

        self.size_known = true;
    }

    /// Records the slot assigned by the packer.
    pub fn place_at(&mut self, image: AtlasId, x: u32, y: u32) {
        debug_assert!(!self.is_placed());
        debug_assert!(self.size_known);
        self.image = Some(image);
        self.is_filled = false;
        self.desired.x = x;
        self.desired.y = y;
        self.placed = self.desired;
        self.omit_reason = OmitReason::None;
    }

    /// Clears the atlas association only. The omit reason is left alone:
    /// a terminal reason set by `determine_size` must survive the vacate,
    /// while a re-place sets `Working` through `mark_working`.
    pub fn clear_image(&mut self) {
        self.image = None;
    }

    /// Returns the placement to the transient packing state.
    pub fn mark_working(&mut self) {
        self.omit_reason = OmitReason::Working;
    }

    /// The inner (margin-free) pixel size of the source as it appears in
    /// the atlas, and the pixel origin of the UV box.
    fn inner_geometry(&self) -> (i64, i64, i64, i64) {
        let inner_w = self.placed.x_size as i64 - self.placed.margin as i64 * 2;
        let inner_h = self.placed.y_size as i64 - self.placed.margin as i64 * 2;

        let range_u = self.placed.max_uv.u - self.placed.min_uv.u;
        let range_v = self.placed.max_uv.v - self.placed.min_uv.v;

        let ox = round_half_up(self.placed.min_uv.u * inner_w as f64 / range_u);
        let oy = round_half_up(self.placed.min_uv.v * inner_h as f64 / range_v);
        let sw = round_half_up(inner_w as f64 / range_u);
        let sh = round_half_up(inner_h as f64 / range_v);
        (ox, oy, sw, sh)
    }

    /// The affine UV transform for scene references to this placement.
    ///
    /// The formula is fixed by compatibility with existing assets and is
    /// reproduced exactly, including its rounding.
    pub fn compute_tex_matrix(&self, atlas_x_size: u32, atlas_y_size: u32) -> UvTransform {
        debug_assert!(self.is_placed());

        let (ox, oy, sw, sh) = self.inner_geometry();

        let x = self.placed.x as i64 + self.placed.margin as i64 - ox;
        let y = -(self.placed.y as i64) + self.placed.margin as i64 - oy;

        let pal_x = atlas_x_size as f64;
        let pal_y = atlas_y_size as f64;

        let tx = x as f64 / pal_x;
        let ty = (atlas_y_size as i64 - 1 - (self.placed.y_size as i64 - 1 - y)) as f64 / pal_y;

        UvTransform {
            sx: sw as f64 / pal_x,
            sy: sh as f64 / pal_y,
            tx,
            ty,
        }
    }

    /// Renders this placement's rectangle into the atlas canvas.
    ///
    /// The source is box-filtered down to the inner size, then copied with
    /// edge behavior per wrap mode: clamp replicates the border pixel,
    /// repeat applies a sign-independent modulo so negative margin pixels
    /// wrap symmetrically. An atlas with alpha gets opaque alpha where the
    /// source has none (the RGBA conversion supplies it).
    pub fn fill_into(&mut self, canvas: &mut RgbaImage, source: &RgbaImage) {
        debug_assert!(self.is_placed());
        self.is_filled = true;

        let (ox, oy, sw, sh) = self.inner_geometry();
        if sw <= 0 || sh <= 0 {
            return;
        }
        let scaled = box_resample(source, sw as u32, sh as u32);

        let margin = self.placed.margin as i64;
        for y in 0..self.placed.y_size as i64 {
            let mut sy = sh - 1 - ((self.placed.y_size as i64 - 1 - y) - margin + oy);
            sy = match self.placed.wrap_v {
                WrapMode::Clamp => sy.clamp(0, sh - 1),
                WrapMode::Repeat => {
                    if sy < 0 {
                        sh - 1 - ((-sy - 1) % sh)
                    } else {
                        sy % sh
                    }
                }
            };
            for x in 0..self.placed.x_size as i64 {
                let mut sx = x - margin + ox;
                sx = match self.placed.wrap_u {
                    WrapMode::Clamp => sx.clamp(0, sw - 1),
                    WrapMode::Repeat => {
                        if sx < 0 {
                            sw - 1 - ((-sx - 1) % sw)
                        } else {
                            sx % sw
                        }
                    }
                };
                let px = *scaled.get_pixel(sx as u32, sy as u32);
                canvas.put_pixel(self.placed.x + x as u32, self.placed.y + y as u32, px);
            }
        }
    }

    /// Paints the placement's rectangle solid red so a broken source is
    /// visible in the output.
    pub fn fill_error(&mut self, canvas: &mut RgbaImage) {
        debug_assert!(self.is_placed());
        self.is_filled = true;
        let red = Rgba([255, 0, 0, 255]);
        for y in self.placed.y..self.placed.y + self.placed.y_size {
            for x in self.placed.x..self.placed.x + self.placed.x_size {
                canvas.put_pixel(x, y, red);
            }
        }
    }
}

/// `floor(v + 0.5)` — the rounding the compatible formulas use.
fn round_half_up(v: f64) -> i64 {
    (v + 0.5).floor() as i64
}

fn round_up(v: f64, unit: f64, fuzz: f64) -> f64 {
    ((v - fuzz) / unit).ceil() * unit
}

fn round_down(v: f64, unit: f64, fuzz: f64) -> f64 {
    ((v + fuzz) / unit).floor() * unit
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rounding_expands_outward() {
        assert_eq!(round_up(1.003, 0.1, 0.01), 1.0);
        assert!(round_up(1.02, 0.1, 0.01) > 1.09);
        assert_eq!(round_down(-0.003, 0.1, 0.01), 0.0);
        assert!(round_down(-0.02, 0.1, 0.01) < -0.09);
    }

    #[test]
    fn half_up_matches_reference_rounding() {
        assert_eq!(round_half_up(1.5), 2);
        assert_eq!(round_half_up(-0.5), 0);
        assert_eq!(round_half_up(2.49), 2);
    }
}
