//! Core library for the texture palettizer.
//!
//! The palettizer consolidates the many small textures referenced by a
//! collection of scene description files into a few large palette atlases,
//! hands back per-reference UV transforms, and keeps a persistent project
//! snapshot so reruns only redo work invalidated by source changes.
//!
//! - Placement engine: UV-coverage sizing, omit classification, top-left
//!   hole-search packing, atlas composition
//! - Group DAG: dependency closures and the specificity ranking that picks
//!   each texture's group
//! - Incremental state: the [`project::Palettizer`] store and its tagged
//!   binary [`snapshot`]
//!
//! Quick example:
//! ```ignore
//! use tex_palettizer_core::prelude::*;
//!
//! let cfg = PackConfig::builder().page_size(512, 512).build();
//! let rules = RuleFile::load(Path::new("textures.txa"))?;
//! let mut pal = Palettizer::new(cfg);
//! let summary = pal.run(&rules, &scene_inputs)?;
//! println!("wrote {} atlases", summary.atlases_written);
//! ```

pub mod atlas;
pub mod config;
pub mod error;
pub mod group;
pub mod id;
pub mod page;
pub mod placement;
pub mod project;
pub mod properties;
pub mod resample;
pub mod rules;
pub mod scene;
pub mod snapshot;
pub mod texture;

pub use config::{PackConfig, PackConfigBuilder};
pub use error::{PalError, Result};
pub use project::{Palettizer, RefInput, RunSummary, SceneInput};

/// Convenience prelude for common types and functions.
pub mod prelude {
    pub use crate::config::{PackConfig, PackConfigBuilder};
    pub use crate::error::{PalError, Result};
    pub use crate::id::{AtlasId, GroupId, PageId, PlacementId, SceneId, TextureId};
    pub use crate::placement::OmitReason;
    pub use crate::project::{Palettizer, RefInput, RunSummary, SceneInput};
    pub use crate::rules::RuleFile;
    pub use crate::scene::{RefEmit, TexCoord, UvTransform, WrapMode};
    pub use crate::snapshot;
}
