use std::fmt;

use serde::{Deserialize, Serialize};

/// Arena handles. All palette-engine objects live in one `Vec` per type on
/// the [`Palettizer`](crate::project::Palettizer) store and refer to each
/// other through these small indices; the indices are what the snapshot
/// serializes.
macro_rules! define_id {
    ($(#[$meta:meta])* $name:ident, $tag:literal) => {
        $(#[$meta])*
        #[derive(
            Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
        )]
        pub struct $name(pub(crate) u32);

        impl $name {
            pub fn new(index: usize) -> Self {
                Self(index as u32)
            }
            pub fn index(self) -> usize {
                self.0 as usize
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, concat!($tag, "{}"), self.0)
            }
        }
    };
}

define_id!(
    /// Handle to a palette group.
    GroupId,
    "group#"
);
define_id!(
    /// Handle to a page within a group.
    PageId,
    "page#"
);
define_id!(
    /// Handle to an atlas image.
    AtlasId,
    "atlas#"
);
define_id!(
    /// Handle to a texture placement.
    PlacementId,
    "placement#"
);
define_id!(
    /// Handle to a texture record.
    TextureId,
    "texture#"
);
define_id!(
    /// Handle to a scene file record.
    SceneId,
    "scene#"
);
