use serde::{Deserialize, Serialize};

use crate::atlas::AtlasImage;
use crate::config::PackConfig;
use crate::id::{AtlasId, GroupId, PageId, PlacementId};
use crate::placement::TexturePlacement;
use crate::properties::TextureProperties;
use crate::texture::TextureImage;

/// A bucket within a group collecting placements that share identical
/// atlas-compatible properties. Two textures share an atlas only if their
/// property tuples compare equal; the page owns the atlases they land on,
/// in creation order.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PalettePage {
    pub group: GroupId,
    pub properties: TextureProperties,
    pub images: Vec<AtlasId>,

    /// Placements waiting to be packed this run. Not persisted.
    #[serde(skip)]
    pub assigned: Vec<PlacementId>,
}

impl PalettePage {
    pub fn new(group: GroupId, properties: TextureProperties) -> Self {
        Self {
            group,
            properties,
            images: Vec::new(),
            assigned: Vec::new(),
        }
    }

    /// The `%p` token of the atlas naming pattern.
    pub fn name(&self) -> String {
        self.properties.string_key()
    }

    /// Accepts a placement for the next `place_all`.
    pub fn assign(&mut self, pid: PlacementId) {
        self.assigned.push(pid);
    }

    /// Packs every assigned placement in `placement_pack_order`, walking
    /// the existing atlases in creation order and appending a fresh
    /// page-sized atlas when none has room.
    pub fn place_all(
        &mut self,
        self_id: PageId,
        atlases: &mut Vec<AtlasImage>,
        placements: &mut [TexturePlacement],
        textures: &[TextureImage],
        cfg: &PackConfig,
    ) {
        let mut order = std::mem::take(&mut self.assigned);
        order.sort_by(placement_pack_order(placements, textures));

        for pid in order {
            self.place(pid, self_id, atlases, placements, cfg);
        }
    }

    fn place(
        &mut self,
        pid: PlacementId,
        self_id: PageId,
        atlases: &mut Vec<AtlasImage>,
        placements: &mut [TexturePlacement],
        cfg: &PackConfig,
    ) {
        for aid in &self.images {
            if atlases[aid.index()].place(placements, pid, *aid) {
                return;
            }
        }

        let aid = AtlasId::new(atlases.len());
        let mut image = AtlasImage::new(self_id, self.images.len() as u32, self.properties, cfg);
        let placed = image.place(placements, pid, aid);
        // The placement was vetted against an empty page during sizing.
        debug_assert!(placed);
        atlases.push(image);
        self.images.push(aid);
    }
}

/// Packing order shared by the initial pack and resize trials: biggest
/// area first, ties to the larger maximum dimension, then texture name so
/// reruns are byte-stable.
pub(crate) fn placement_pack_order<'a>(
    pool: &'a [TexturePlacement],
    textures: &'a [TextureImage],
) -> impl Fn(&PlacementId, &PlacementId) -> std::cmp::Ordering + 'a {
    move |a, b| {
        let pa = &pool[a.index()].desired;
        let pb = &pool[b.index()].desired;
        let area_a = pa.x_size as u64 * pa.y_size as u64;
        let area_b = pb.x_size as u64 * pb.y_size as u64;
        area_b
            .cmp(&area_a)
            .then_with(|| pb.x_size.max(pb.y_size).cmp(&pa.x_size.max(pa.y_size)))
            .then_with(|| {
                let na = &textures[pool[a.index()].texture.index()].name;
                let nb = &textures[pool[b.index()].texture.index()].name;
                na.cmp(nb)
            })
    }
}
