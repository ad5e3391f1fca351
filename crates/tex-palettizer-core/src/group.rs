use std::collections::{BTreeMap, BTreeSet};

use serde::{Deserialize, Serialize};

use crate::error::{PalError, Result};
use crate::id::{GroupId, PageId, PlacementId};
use crate::properties::TextureProperties;

/// A named set of textures eligible to share atlases.
///
/// `depends_on` edges mean the depended-on group's atlases are resident at
/// runtime whenever this group's are, so a texture requested here may
/// legally live in any group of the dependency closure. The derived
/// orders rank groups by specificity (see [`is_preferred_over`]).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PaletteGroup {
    pub name: String,
    /// Optional subdirectory (under the map directory) for this group's
    /// atlas images.
    pub dirname: String,
    pub depends_on: BTreeSet<GroupId>,
    /// Number of scene files assigned to this group; recomputed each run.
    pub scene_count: u32,

    pub dependency_level: i32,
    pub dependency_order: i32,
    pub dirname_order: i32,

    pub placements: BTreeSet<PlacementId>,
    pub pages: BTreeMap<TextureProperties, PageId>,
}

impl PaletteGroup {
    pub fn new(name: String) -> Self {
        Self {
            name,
            dirname: String::new(),
            depends_on: BTreeSet::new(),
            scene_count: 0,
            dependency_level: 0,
            dependency_order: 0,
            dirname_order: 0,
            placements: BTreeSet::new(),
            pages: BTreeMap::new(),
        }
    }
}

/// Expands `seed` to its full dependency closure.
pub fn dependency_closure(groups: &[PaletteGroup], seed: &BTreeSet<GroupId>) -> BTreeSet<GroupId> {
    let mut complete = BTreeSet::new();
    let mut stack: Vec<GroupId> = seed.iter().copied().collect();
    while let Some(gid) = stack.pop() {
        if complete.insert(gid) {
            for dep in &groups[gid.index()].depends_on {
                stack.push(*dep);
            }
        }
    }
    complete
}

/// Recomputes dependency levels and the dependency/directory orders.
///
/// A cycle in `depends_on` is a configuration error. Orders are computed
/// by fixed-point iteration: a group's order must strictly exceed any
/// group it depends on, except that groups sharing a directory name take
/// the maximum instead of incrementing. Orders only ever grow, so seeding
/// from a prior snapshot's values keeps an earlier run's resolution of
/// otherwise-ambiguous orderings.
pub fn compute_orders(groups: &mut [PaletteGroup]) -> Result<()> {
    check_acyclic(groups)?;

    // Dependency level: roots (groups nothing depends on) sit at level
    // one; every dependency sits at least one level deeper.
    let mut depended_on = vec![false; groups.len()];
    for g in groups.iter() {
        for dep in &g.depends_on {
            depended_on[dep.index()] = true;
        }
    }
    for g in groups.iter_mut() {
        g.dependency_level = 0;
    }
    for i in 0..groups.len() {
        if !depended_on[i] {
            cascade_level(groups, GroupId::new(i), 1);
        }
    }

    // Orders: iterate to a fixed point.
    loop {
        let mut any_changed = false;
        for i in 0..groups.len() {
            let deps: Vec<GroupId> = groups[i].depends_on.iter().copied().collect();
            for dep in deps {
                let dep_dep_order = groups[dep.index()].dependency_order;
                let dep_dir_order = groups[dep.index()].dirname_order;
                let same_dir = groups[i].dirname == groups[dep.index()].dirname;

                let g = &mut groups[i];
                if g.dependency_order <= dep_dep_order {
                    g.dependency_order = dep_dep_order + 1;
                    any_changed = true;
                }
                if same_dir {
                    if g.dirname_order < dep_dir_order {
                        g.dirname_order = dep_dir_order;
                        any_changed = true;
                    }
                } else if g.dirname_order <= dep_dir_order {
                    g.dirname_order = dep_dir_order + 1;
                    any_changed = true;
                }
            }
        }
        if !any_changed {
            return Ok(());
        }
    }
}

fn cascade_level(groups: &mut [PaletteGroup], gid: GroupId, level: i32) {
    if level > groups[gid.index()].dependency_level {
        groups[gid.index()].dependency_level = level;
        let deps: Vec<GroupId> = groups[gid.index()].depends_on.iter().copied().collect();
        for dep in deps {
            cascade_level(groups, dep, level + 1);
        }
    }
}

fn check_acyclic(groups: &[PaletteGroup]) -> Result<()> {
    // DFS coloring; a back edge names the cycle.
    const WHITE: u8 = 0;
    const GRAY: u8 = 1;
    const BLACK: u8 = 2;
    let mut color = vec![WHITE; groups.len()];

    fn visit(groups: &[PaletteGroup], color: &mut [u8], i: usize) -> Result<()> {
        color[i] = GRAY;
        for dep in &groups[i].depends_on {
            match color[dep.index()] {
                WHITE => visit(groups, color, dep.index())?,
                GRAY => {
                    return Err(PalError::BadConfig(format!(
                        "group dependency cycle through '{}'",
                        groups[dep.index()].name
                    )));
                }
                _ => {}
            }
        }
        color[i] = BLACK;
        Ok(())
    }

    for i in 0..groups.len() {
        if color[i] == WHITE {
            visit(groups, &mut color, i)?;
        }
    }
    Ok(())
}

/// The specificity ordering used to pick the group that actually holds a
/// texture: higher directory order wins, then higher dependency order,
/// then the group shared by fewer scenes.
pub fn is_preferred_over(a: &PaletteGroup, b: &PaletteGroup) -> bool {
    if a.dirname_order != b.dirname_order {
        a.dirname_order > b.dirname_order
    } else if a.dependency_order != b.dependency_order {
        a.dependency_order > b.dependency_order
    } else {
        a.scene_count < b.scene_count
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn group(name: &str) -> PaletteGroup {
        PaletteGroup::new(name.to_string())
    }

    fn build(edges: &[(usize, usize)], n: usize) -> Vec<PaletteGroup> {
        let mut groups: Vec<PaletteGroup> =
            (0..n).map(|i| group(&format!("g{i}"))).collect();
        for &(from, to) in edges {
            groups[from].depends_on.insert(GroupId::new(to));
        }
        groups
    }

    #[test]
    fn orders_exceed_dependencies() {
        // g1 -> g0, g2 -> g0, g3 -> g1,g2
        let mut groups = build(&[(1, 0), (2, 0), (3, 1), (3, 2)], 4);
        compute_orders(&mut groups).unwrap();
        assert!(groups[1].dependency_order > groups[0].dependency_order);
        assert!(groups[3].dependency_order > groups[1].dependency_order);
        assert!(groups[3].dependency_order > groups[2].dependency_order);
    }

    #[test]
    fn shared_dirname_takes_equal_order() {
        let mut groups = build(&[(1, 0)], 2);
        groups[0].dirname = "maps".into();
        groups[1].dirname = "maps".into();
        compute_orders(&mut groups).unwrap();
        assert_eq!(groups[0].dirname_order, groups[1].dirname_order);
        assert!(groups[1].dependency_order > groups[0].dependency_order);
    }

    #[test]
    fn cycle_is_bad_config() {
        let mut groups = build(&[(0, 1), (1, 2), (2, 0)], 3);
        let err = compute_orders(&mut groups).unwrap_err();
        assert!(matches!(err, PalError::BadConfig(_)));
    }

    #[test]
    fn specificity_prefers_fewer_scenes_on_tie() {
        // world and char both depend on base; char is shared by fewer
        // scenes, so it wins the tie.
        let mut groups = build(&[(1, 0), (2, 0)], 3);
        groups[1].scene_count = 3; // world
        groups[2].scene_count = 1; // char
        compute_orders(&mut groups).unwrap();
        assert!(is_preferred_over(&groups[2], &groups[1]));
        assert!(is_preferred_over(&groups[1], &groups[0]));
        assert!(is_preferred_over(&groups[2], &groups[0]));
    }
}
