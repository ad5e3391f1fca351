use serde::{Deserialize, Serialize};

/// All knobs controlling a palettization run.
///
/// The original tool read these through a process-wide singleton; here the
/// value is built once (from the CLI) and threaded explicitly through the
/// placement driver and atlas updater.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PackConfig {
    /// Maximum palette page width in pixels.
    pub page_max_x: u32,
    /// Maximum palette page height in pixels.
    pub page_max_y: u32,

    /// Background color (RGBA, 0..=255) used for unoccupied atlas pixels
    /// and for blanking vacated regions.
    pub background: [u8; 4],

    /// Flag a placement `solitary` when it is the only one on its atlas,
    /// so the scene keeps referencing the original texture file.
    #[serde(default = "default_true")]
    pub omit_solitary: bool,

    /// Round UV boxes outward to a grid before sizing, to stabilize
    /// placements against trivial UV edits.
    #[serde(default = "default_true")]
    pub round_uvs: bool,
    #[serde(default = "default_round_unit")]
    pub round_unit: f64,
    #[serde(default = "default_round_fuzz")]
    pub round_fuzz: f64,

    /// Delete empty atlas images and drop unreferenced textures.
    #[serde(default)]
    pub aggressively_clean: bool,

    /// Ignore mtime checks and regenerate every atlas image.
    #[serde(default)]
    pub redo_all: bool,

    /// Naming template for atlas images. Tokens: `%g` group name,
    /// `%p` page properties string, `%i` 1-based index within the page,
    /// `%%` literal percent.
    #[serde(default = "default_image_pattern")]
    pub image_pattern: String,

    /// Directory receiving atlas images. Group `dir` names become
    /// subdirectories of it.
    #[serde(default = "default_map_dir")]
    pub map_dir: String,

    /// Group assigned to scenes that no rule or in-scene directive assigns.
    #[serde(default = "default_group_name")]
    pub default_group: String,
}

fn default_true() -> bool {
    true
}
fn default_round_unit() -> f64 {
    0.1
}
fn default_round_fuzz() -> f64 {
    0.01
}
fn default_image_pattern() -> String {
    "%g_palette_%p_%i".to_string()
}
fn default_map_dir() -> String {
    ".".to_string()
}
fn default_group_name() -> String {
    "main".to_string()
}

impl Default for PackConfig {
    fn default() -> Self {
        Self {
            page_max_x: 512,
            page_max_y: 512,
            background: [0, 0, 0, 0],
            omit_solitary: true,
            round_uvs: true,
            round_unit: default_round_unit(),
            round_fuzz: default_round_fuzz(),
            aggressively_clean: false,
            redo_all: false,
            image_pattern: default_image_pattern(),
            map_dir: default_map_dir(),
            default_group: default_group_name(),
        }
    }
}

impl PackConfig {
    pub fn builder() -> PackConfigBuilder {
        PackConfigBuilder::new()
    }

    /// Validates the configuration parameters.
    pub fn validate(&self) -> crate::error::Result<()> {
        use crate::error::PalError;

        if self.page_max_x < 4 || self.page_max_y < 4 {
            return Err(PalError::BadConfig(format!(
                "page size {}x{} is below the 4x4 placement floor",
                self.page_max_x, self.page_max_y
            )));
        }
        if self.round_uvs {
            if !(self.round_unit > 0.0) {
                return Err(PalError::BadConfig(format!(
                    "round unit must be positive (got {})",
                    self.round_unit
                )));
            }
            if self.round_fuzz < 0.0 || self.round_fuzz >= self.round_unit {
                return Err(PalError::BadConfig(format!(
                    "round fuzz {} must be in [0, round unit {})",
                    self.round_fuzz, self.round_unit
                )));
            }
        }
        if self.image_pattern.is_empty() {
            return Err(PalError::BadConfig("image pattern is empty".into()));
        }
        if self.default_group.is_empty() {
            return Err(PalError::BadConfig("default group name is empty".into()));
        }
        Ok(())
    }
}

/// Builder for `PackConfig` for ergonomic construction.
#[derive(Debug, Default, Clone)]
pub struct PackConfigBuilder {
    cfg: PackConfig,
}

impl PackConfigBuilder {
    pub fn new() -> Self {
        Self {
            cfg: PackConfig::default(),
        }
    }
    pub fn page_size(mut self, x: u32, y: u32) -> Self {
        self.cfg.page_max_x = x;
        self.cfg.page_max_y = y;
        self
    }
    pub fn background(mut self, rgba: [u8; 4]) -> Self {
        self.cfg.background = rgba;
        self
    }
    pub fn omit_solitary(mut self, v: bool) -> Self {
        self.cfg.omit_solitary = v;
        self
    }
    pub fn round_uvs(mut self, unit: f64, fuzz: f64) -> Self {
        self.cfg.round_uvs = true;
        self.cfg.round_unit = unit;
        self.cfg.round_fuzz = fuzz;
        self
    }
    pub fn no_round(mut self) -> Self {
        self.cfg.round_uvs = false;
        self
    }
    pub fn aggressively_clean(mut self, v: bool) -> Self {
        self.cfg.aggressively_clean = v;
        self
    }
    pub fn redo_all(mut self, v: bool) -> Self {
        self.cfg.redo_all = v;
        self
    }
    pub fn image_pattern(mut self, v: impl Into<String>) -> Self {
        self.cfg.image_pattern = v.into();
        self
    }
    pub fn map_dir(mut self, v: impl Into<String>) -> Self {
        self.cfg.map_dir = v.into();
        self
    }
    pub fn default_group(mut self, v: impl Into<String>) -> Self {
        self.cfg.default_group = v.into();
        self
    }
    pub fn build(self) -> PackConfig {
        self.cfg
    }
}
