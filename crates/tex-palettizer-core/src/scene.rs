//! The scene-side interface of the palettizer.
//!
//! Scene file I/O lives outside the core: a reader hands the engine a list
//! of texture references (UV range + wrap modes per reference), and after a
//! run the engine hands back, per reference, either "keep the original
//! texture" or "sample this atlas through this UV transform".

use std::collections::BTreeSet;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::id::{AtlasId, GroupId, SceneId, TextureId};

/// Texture-coordinate wrap mode on one axis.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum WrapMode {
    Clamp,
    Repeat,
}

impl FromStr for WrapMode {
    type Err = ();
    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "clamp" => Ok(WrapMode::Clamp),
            "repeat" => Ok(WrapMode::Repeat),
            _ => Err(()),
        }
    }
}

/// A point in texture-coordinate space.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct TexCoord {
    pub u: f64,
    pub v: f64,
}

impl TexCoord {
    pub fn new(u: f64, v: f64) -> Self {
        Self { u, v }
    }

    pub fn min_with(self, other: TexCoord) -> TexCoord {
        TexCoord::new(self.u.min(other.u), self.v.min(other.v))
    }

    pub fn max_with(self, other: TexCoord) -> TexCoord {
        TexCoord::new(self.u.max(other.u), self.v.max(other.v))
    }
}

/// The affine UV transform emitted for a palettized reference, to be
/// applied to the reference's texture coordinates. Only scale and
/// translation are ever produced.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct UvTransform {
    pub sx: f64,
    pub sy: f64,
    pub tx: f64,
    pub ty: f64,
}

impl UvTransform {
    /// Row-major 3x3 matrix form: `((sx,0,0),(0,sy,0),(tx,ty,1))`.
    pub fn to_matrix(self) -> [[f64; 3]; 3] {
        [
            [self.sx, 0.0, 0.0],
            [0.0, self.sy, 0.0],
            [self.tx, self.ty, 1.0],
        ]
    }

    pub fn apply(self, uv: TexCoord) -> TexCoord {
        TexCoord::new(uv.u * self.sx + self.tx, uv.v * self.sy + self.ty)
    }
}

/// What the scene writer should do with one reference after a run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum RefEmit {
    /// Keep referencing the original texture file unchanged.
    Original,
    /// Reference the atlas image instead, with UVs remapped by the
    /// transform.
    Palette {
        atlas: AtlasId,
        transform: UvTransform,
    },
}

/// Identifies one reference within one scene file across the whole store.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub struct RefKey {
    pub scene: SceneId,
    pub index: u32,
}

/// One texture reference inside a scene file.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SceneRef {
    pub texture: TextureId,
    /// UV box actually used by the scene geometry; `None` when the scene
    /// gives no explicit coordinates.
    pub uvs: Option<(TexCoord, TexCoord)>,
    pub wrap_u: WrapMode,
    pub wrap_v: WrapMode,
    /// Decision from the last completed run.
    pub emit: RefEmit,
}

impl SceneRef {
    pub fn new(
        texture: TextureId,
        uvs: Option<(TexCoord, TexCoord)>,
        wrap_u: WrapMode,
        wrap_v: WrapMode,
    ) -> Self {
        Self {
            texture,
            uvs,
            wrap_u,
            wrap_v,
            emit: RefEmit::Original,
        }
    }
}

/// A scene description file known to the palettizer. Groups are the
/// scene's requested palette groups.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SceneFile {
    /// Canonical path, also the identity key across runs.
    pub name: String,
    pub groups: BTreeSet<GroupId>,
    pub refs: Vec<SceneRef>,
    /// Set when an atlas this scene references was renamed or removed, so
    /// an operator knows the scene needs rewriting even if it was not
    /// named on this run's command line.
    pub stale: bool,
}

impl SceneFile {
    pub fn new(name: String) -> Self {
        Self {
            name,
            groups: BTreeSet::new(),
            refs: Vec::new(),
            stale: false,
        }
    }
}
