use std::collections::{BTreeMap, BTreeSet};
use std::path::{Path, PathBuf};
use std::time::SystemTime;

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::error::{PalError, Result};
use crate::id::{GroupId, PlacementId};
use crate::properties::{PixelFormat, TextureProperties};
use crate::rules::MatchedAttrs;
use crate::scene::RefKey;

/// A texture whose UV box covers more than this percentage of its own
/// area repeats too much to be worth copying into an atlas.
pub const DEFAULT_REPEAT_THRESHOLD_PCT: f64 = 200.0;

/// Per-texture record: identity, source metadata, rule-derived properties,
/// the scene references pointing at it, and its placements per assigned
/// group.
///
/// Every placement a texture owns has a group appearing in `placements`'
/// key set; the driver maintains that invariant when groups are
/// reassigned.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TextureImage {
    /// Display name (file stem), the name rule patterns match against.
    pub name: String,
    /// Canonical source path, the identity key across runs.
    pub source_path: String,

    pub size_known: bool,
    pub x_size: u32,
    pub y_size: u32,
    pub channels_known: bool,
    pub properties: TextureProperties,

    pub margin: u32,
    pub repeat_threshold_pct: f64,
    pub omit: bool,
    /// Rule-file override of the source dimensions used for sizing.
    pub size_hint: Option<(u32, u32)>,

    /// Groups requested for this texture by rule lines and by the scenes
    /// that reference it.
    pub requested_groups: BTreeSet<GroupId>,
    pub references: Vec<RefKey>,
    /// One placement per assigned group.
    pub placements: BTreeMap<GroupId, PlacementId>,

    /// Seen in an input scene this run. Not persisted; cleared on load.
    #[serde(skip)]
    pub seen: bool,
}

impl TextureImage {
    pub fn new(name: String, source_path: String) -> Self {
        Self {
            name,
            source_path,
            size_known: false,
            x_size: 0,
            y_size: 0,
            channels_known: false,
            properties: TextureProperties::default(),
            margin: 0,
            repeat_threshold_pct: DEFAULT_REPEAT_THRESHOLD_PCT,
            omit: false,
            size_hint: None,
            requested_groups: BTreeSet::new(),
            references: Vec::new(),
            placements: BTreeMap::new(),
            seen: false,
        }
    }

    /// Source dimensions used for placement sizing: the rule-file size
    /// hint when present, otherwise the probed source size.
    pub fn effective_size(&self) -> (u32, u32) {
        self.size_hint.unwrap_or((self.x_size, self.y_size))
    }

    /// Applies the merged rule attributes for this texture's name. Group
    /// membership is resolved by the driver (names to ids) and is not
    /// handled here.
    pub fn apply_rule_attrs(&mut self, attrs: &MatchedAttrs) {
        if let Some(margin) = attrs.margin {
            self.margin = margin;
        }
        if let Some(pct) = attrs.repeat_threshold_pct {
            self.repeat_threshold_pct = pct;
        }
        if let Some(omit) = attrs.omit {
            self.omit = omit;
        }
        self.size_hint = attrs.size_hint.or(self.size_hint);
    }

    /// Probes the source image for dimensions (header-only read) and, the
    /// first time, for its channel layout (one full decode).
    ///
    /// A missing or unreadable source is reported as `MissingSource` and
    /// leaves `size_known` false; the caller logs it and the run
    /// continues with the placement in the `unknown` omit state.
    pub fn probe_source(&mut self) -> Result<()> {
        let dims = image::ImageReader::open(Path::new(&self.source_path))
            .map_err(image::ImageError::IoError)
            .and_then(|r| r.with_guessed_format().map_err(image::ImageError::IoError))
            .and_then(|r| r.into_dimensions());
        match dims {
            Ok((w, h)) => {
                self.x_size = w;
                self.y_size = h;
                self.size_known = true;
            }
            Err(e) => {
                debug!(texture = %self.name, error = %e, "source image probe failed");
                self.size_known = false;
                return Err(PalError::MissingSource(self.source_path_buf()));
            }
        }

        if !self.channels_known {
            if let Ok(img) = image::open(Path::new(&self.source_path)) {
                let channels = img.color().channel_count();
                self.properties.channel_count = channels;
                self.properties.format = PixelFormat::from_channel_count(channels);
                self.channels_known = true;
            }
        }
        Ok(())
    }

    /// Modification time of the source file, if it exists.
    pub fn source_mtime(&self) -> Option<SystemTime> {
        std::fs::metadata(Path::new(&self.source_path))
            .and_then(|m| m.modified())
            .ok()
    }

    pub fn source_path_buf(&self) -> PathBuf {
        PathBuf::from(&self.source_path)
    }
}
