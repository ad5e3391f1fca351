//! The placement driver and the project store.
//!
//! All palette-engine objects live in one `Vec` arena per type and refer
//! to each other through small integer ids; the snapshot serializes those
//! indices directly. The driver orchestrates a run: ingest scenes, apply
//! rules, assign each texture to its most specific group, size and pack
//! placements, then bring the atlas images and scene emits up to date.

use std::collections::{BTreeMap, BTreeSet};

use tracing::{debug, info, warn};

use crate::atlas::AtlasImage;
use crate::config::PackConfig;
use crate::error::{PalError, Result};
use crate::group::{self, PaletteGroup};
use crate::id::{GroupId, PageId, PlacementId, SceneId, TextureId};
use crate::page::PalettePage;
use crate::placement::{OmitReason, SizeOutcome, TexturePlacement, UvRef};
use crate::rules::RuleFile;
use crate::scene::{RefEmit, RefKey, SceneFile, SceneRef, TexCoord, WrapMode};
use crate::texture::TextureImage;

/// One scene description handed to a run by the scene reader.
#[derive(Debug, Clone, Default)]
pub struct SceneInput {
    /// Canonical path; the identity key across runs.
    pub name: String,
    /// Groups requested by in-scene directives.
    pub groups: Vec<String>,
    /// Textures declared by the scene: (display name, source path).
    pub textures: Vec<(String, String)>,
    /// References: (texture display name, uv box, wrap modes).
    pub refs: Vec<RefInput>,
}

#[derive(Debug, Clone)]
pub struct RefInput {
    pub texture: String,
    pub uvs: Option<(TexCoord, TexCoord)>,
    pub wrap_u: WrapMode,
    pub wrap_v: WrapMode,
}

/// What happened during a run, for reporting and exit-code mapping.
#[derive(Debug, Clone, Default)]
pub struct RunSummary {
    pub textures: usize,
    pub placed: usize,
    pub solitary: usize,
    pub omitted: Vec<(String, OmitReason)>,
    /// Textures whose source image could not be read this run.
    pub missing_sources: usize,
    pub atlases_written: usize,
    pub write_errors: usize,
    /// (filename, utilization) for every non-empty atlas.
    pub utilization: Vec<(String, f64)>,
    /// Scenes needing a rewrite that were not part of this run's input.
    pub stale_scenes: Vec<String>,
}

/// The persistent project: every texture, placement, page, atlas image,
/// group, and scene reference known across runs.
#[derive(Debug, Clone, Default)]
pub struct Palettizer {
    pub config: PackConfig,

    pub groups: Vec<PaletteGroup>,
    pub pages: Vec<PalettePage>,
    pub atlases: Vec<AtlasImage>,
    pub placements: Vec<TexturePlacement>,
    pub textures: Vec<TextureImage>,
    pub scenes: Vec<SceneFile>,

    /// Placements orphaned mid-run (group reassignment, texture removal);
    /// compacted away before the snapshot is written.
    dead_placements: BTreeSet<PlacementId>,
}

impl Palettizer {
    pub fn new(config: PackConfig) -> Self {
        Self {
            config,
            ..Default::default()
        }
    }

    /// Reconciles a freshly loaded store with the options of the current
    /// invocation. A changed page size invalidates every packing; a
    /// changed background invalidates every rendered image.
    pub fn apply_config(&mut self, config: PackConfig) {
        let page_changed = self.config.page_max_x != config.page_max_x
            || self.config.page_max_y != config.page_max_y;
        let background_changed = self.config.background != config.background;

        if page_changed {
            info!(
                from = %format!("{}x{}", self.config.page_max_x, self.config.page_max_y),
                to = %format!("{}x{}", config.page_max_x, config.page_max_y),
                "page size changed, repacking everything"
            );
        }
        self.config = config;

        if page_changed {
            self.reset_images();
        } else if background_changed {
            info!("background changed, regenerating atlas images");
            for atlas in &mut self.atlases {
                atlas.remove_file();
            }
        }
    }

    /// Unpacks every placement and discards every atlas raster, keeping
    /// the object graph so the next `run` repacks from scratch.
    fn reset_images(&mut self) {
        for aid in 0..self.atlases.len() {
            let pids: Vec<PlacementId> = self.atlases[aid].placements.clone();
            for pid in pids {
                self.atlases[aid].unplace(&mut self.placements, pid);
                self.placements[pid.index()].mark_working();
            }
            self.atlases[aid].cleared_regions.clear();
            self.atlases[aid].remove_file();
            self.atlases[aid].x_size = self.config.page_max_x;
            self.atlases[aid].y_size = self.config.page_max_y;
        }
    }

    // ---------- lookups ----------

    pub fn group_by_name(&self, name: &str) -> Option<GroupId> {
        self.groups
            .iter()
            .position(|g| g.name == name)
            .map(GroupId::new)
    }

    fn group_or_create(&mut self, name: &str) -> GroupId {
        match self.group_by_name(name) {
            Some(gid) => gid,
            None => {
                let gid = GroupId::new(self.groups.len());
                self.groups.push(PaletteGroup::new(name.to_string()));
                gid
            }
        }
    }

    pub fn texture_by_path(&self, path: &str) -> Option<TextureId> {
        self.textures
            .iter()
            .position(|t| t.source_path == path)
            .map(TextureId::new)
    }

    pub fn scene_by_name(&self, name: &str) -> Option<SceneId> {
        self.scenes
            .iter()
            .position(|s| s.name == name)
            .map(SceneId::new)
    }

    // ---------- the run pipeline ----------

    pub fn run(&mut self, rules: &RuleFile, inputs: &[SceneInput]) -> Result<RunSummary> {
        self.config.validate()?;

        let mut summary = RunSummary::default();
        self.sync_groups(rules)?;
        self.ingest_scenes(rules, inputs);
        self.apply_rules(rules, &mut summary);
        self.assign_groups();
        self.size_placements();
        self.place_all();
        self.resize_and_check_solitary();
        self.update_filenames_and_images(&mut summary);
        self.emit_transforms();
        self.verify()?;
        if self.config.aggressively_clean {
            self.clean_unreferenced();
        }
        self.compact();
        self.finish_summary(&mut summary);
        Ok(summary)
    }

    /// Creates or updates groups from the rule file's `:group` section.
    /// Groups persist across runs by name; groups named only in `depends`
    /// lists or attributes are created implicitly.
    fn sync_groups(&mut self, rules: &RuleFile) -> Result<()> {
        let default = self.config.default_group.clone();
        self.group_or_create(&default);

        for decl in &rules.groups {
            let gid = self.group_or_create(&decl.name);
            self.groups[gid.index()].dirname = decl.dirname.clone();
        }
        for decl in &rules.groups {
            let deps: Vec<GroupId> = decl
                .depends
                .iter()
                .map(|name| self.group_or_create(name))
                .collect();
            let gid = self.group_by_name(&decl.name).expect("declared above");
            self.groups[gid.index()].depends_on = deps.into_iter().collect();
        }

        group::compute_orders(&mut self.groups)
    }

    /// Rebuilds the scene records named in this run's input, creating
    /// textures on first sight. Scenes known from the snapshot but not
    /// named this run keep their references.
    fn ingest_scenes(&mut self, rules: &RuleFile, inputs: &[SceneInput]) {
        for t in &mut self.textures {
            t.seen = false;
        }

        // A scene known from the snapshot whose file has disappeared no
        // longer references anything; its textures' slots become eligible
        // for vacating. The record itself stays, keyed by name.
        let input_names: BTreeSet<&str> = inputs.iter().map(|i| i.name.as_str()).collect();
        for sid in 0..self.scenes.len() {
            let scene = &self.scenes[sid];
            if input_names.contains(scene.name.as_str()) || scene.refs.is_empty() {
                continue;
            }
            if !std::path::Path::new(&scene.name).exists() {
                info!(scene = %scene.name, "scene file gone, dropping its references");
                let sid = SceneId::new(sid);
                for t in &mut self.textures {
                    t.references.retain(|r| r.scene != sid);
                }
                self.scenes[sid.index()].refs.clear();
                self.scenes[sid.index()].groups.clear();
            }
        }

        for input in inputs {
            let sid = match self.scene_by_name(&input.name) {
                Some(sid) => sid,
                None => {
                    let sid = SceneId::new(self.scenes.len());
                    self.scenes.push(SceneFile::new(input.name.clone()));
                    sid
                }
            };

            // Drop the old references' contribution before rebuilding.
            for t in &mut self.textures {
                t.references.retain(|r| r.scene != sid);
            }

            let mut groups: BTreeSet<GroupId> = input
                .groups
                .iter()
                .map(|name| self.group_or_create(name))
                .collect();
            for g in rules.matched_attrs(&input.name).groups {
                groups.insert(self.group_or_create(&g));
            }
            if groups.is_empty() {
                let default = self.config.default_group.clone();
                groups.insert(self.group_or_create(&default));
            }

            let mut name_to_texture: BTreeMap<&str, TextureId> = BTreeMap::new();
            for (name, path) in &input.textures {
                let tid = match self.texture_by_path(path) {
                    Some(tid) => tid,
                    None => {
                        let tid = TextureId::new(self.textures.len());
                        self.textures
                            .push(TextureImage::new(name.clone(), path.clone()));
                        tid
                    }
                };
                self.textures[tid.index()].seen = true;
                name_to_texture.insert(name.as_str(), tid);
            }

            let mut refs = Vec::new();
            for r in &input.refs {
                let Some(&tid) = name_to_texture.get(r.texture.as_str()) else {
                    warn!(scene = %input.name, texture = %r.texture,
                          "reference to undeclared texture, skipping");
                    continue;
                };
                let index = refs.len() as u32;
                refs.push(SceneRef::new(tid, r.uvs, r.wrap_u, r.wrap_v));
                self.textures[tid.index()]
                    .references
                    .push(RefKey { scene: sid, index });
            }

            let scene = &mut self.scenes[sid.index()];
            scene.groups = groups;
            scene.refs = refs;
            scene.stale = false;
        }

        // Scene counts feed the specificity tie-break and cover every
        // known scene, input or not.
        for g in &mut self.groups {
            g.scene_count = 0;
        }
        for scene in &self.scenes {
            for gid in &scene.groups {
                self.groups[gid.index()].scene_count += 1;
            }
        }
    }

    /// Applies rule-file attributes and probes source metadata. Missing
    /// sources are non-fatal: one line each here, a count in the summary.
    fn apply_rules(&mut self, rules: &RuleFile, summary: &mut RunSummary) {
        for tid in 0..self.textures.len() {
            let attrs = rules.matched_attrs(&self.textures[tid].name);
            let groups: Vec<GroupId> = attrs
                .groups
                .iter()
                .map(|name| self.group_or_create(name))
                .collect();
            let t = &mut self.textures[tid];
            t.apply_rule_attrs(&attrs);
            t.requested_groups = groups.into_iter().collect();
            if let Err(e) = t.probe_source() {
                warn!(texture = %t.name, "{e}");
                summary.missing_sources += 1;
            }
        }
    }

    /// Gives every texture exactly one placement, in the most specific
    /// eligible group. Eligible means: any group requested by a rule or
    /// by a referencing scene, or anything in those groups' dependency
    /// closures (a depended-on group's atlases are resident whenever the
    /// depending group's are).
    fn assign_groups(&mut self) {
        for tid in 0..self.textures.len() {
            let tid = TextureId::new(tid);

            let mut candidates: BTreeSet<GroupId> =
                self.textures[tid.index()].requested_groups.clone();
            for key in &self.textures[tid.index()].references {
                for gid in &self.scenes[key.scene.index()].groups {
                    candidates.insert(*gid);
                }
            }
            if candidates.is_empty() {
                // Nothing references this texture any more and no rule
                // pins it; vacate its slots. The record itself survives
                // until a clean pass.
                let existing: Vec<GroupId> = self.textures[tid.index()]
                    .placements
                    .keys()
                    .copied()
                    .collect();
                for gid in existing {
                    self.destroy_placement(tid, gid);
                }
                continue;
            }

            let eligible = group::dependency_closure(&self.groups, &candidates);
            let mut best = *eligible.iter().next().expect("non-empty closure");
            for gid in eligible.iter().skip(1) {
                if group::is_preferred_over(&self.groups[gid.index()], &self.groups[best.index()])
                {
                    best = *gid;
                }
            }

            let existing: Vec<GroupId> = self.textures[tid.index()]
                .placements
                .keys()
                .copied()
                .collect();
            for gid in existing {
                if gid != best {
                    self.destroy_placement(tid, gid);
                }
            }

            if !self.textures[tid.index()].placements.contains_key(&best) {
                let pid = PlacementId::new(self.placements.len());
                let size_known = self.textures[tid.index()].size_known;
                self.placements
                    .push(TexturePlacement::new(tid, best, size_known));
                self.textures[tid.index()].placements.insert(best, pid);
                self.groups[best.index()].placements.insert(pid);
                debug!(texture = %self.textures[tid.index()].name,
                       group = %self.groups[best.index()].name,
                       "assigned texture to group");
            }
        }
    }

    fn destroy_placement(&mut self, tid: TextureId, gid: GroupId) {
        let Some(pid) = self.textures[tid.index()].placements.remove(&gid) else {
            return;
        };
        if let Some(aid) = self.placements[pid.index()].image {
            self.atlases[aid.index()].unplace(&mut self.placements, pid);
        }
        self.groups[gid.index()].placements.remove(&pid);
        self.dead_placements.insert(pid);
    }

    /// Computes every live placement's desired footprint and omit state,
    /// vacating slots the drift policy no longer accepts.
    fn size_placements(&mut self) {
        let Palettizer {
            config,
            atlases,
            placements,
            textures,
            scenes,
            dead_placements,
            ..
        } = self;

        for pid in 0..placements.len() {
            let pid = PlacementId::new(pid);
            if dead_placements.contains(&pid) {
                continue;
            }
            let tid = placements[pid.index()].texture;
            let texture = &textures[tid.index()];

            let uv_refs: Vec<UvRef> = texture
                .references
                .iter()
                .map(|key| {
                    let r = &scenes[key.scene.index()].refs[key.index as usize];
                    UvRef {
                        uvs: r.uvs,
                        wrap_u: r.wrap_u,
                        wrap_v: r.wrap_v,
                    }
                })
                .collect();

            let outcome = placements[pid.index()].determine_size(texture, &uv_refs, config);
            if outcome == SizeOutcome::Unplace {
                if let Some(aid) = placements[pid.index()].image {
                    atlases[aid.index()].unplace(placements, pid);
                    if placements[pid.index()].omit_reason == OmitReason::None {
                        placements[pid.index()].mark_working();
                    }
                }
            }
        }
    }

    /// Assigns every `working` placement to the page matching its
    /// texture's properties, then packs each page of each group.
    fn place_all(&mut self) {
        for gid in 0..self.groups.len() {
            let gid = GroupId::new(gid);
            let working: Vec<PlacementId> = self.groups[gid.index()]
                .placements
                .iter()
                .copied()
                .filter(|pid| self.placements[pid.index()].omit_reason == OmitReason::Working)
                .collect();

            for pid in working {
                let tid = self.placements[pid.index()].texture;
                let properties = self.textures[tid.index()].properties;
                let page_id = match self.groups[gid.index()].pages.get(&properties) {
                    Some(page_id) => *page_id,
                    None => {
                        let page_id = PageId::new(self.pages.len());
                        self.pages.push(PalettePage::new(gid, properties));
                        self.groups[gid.index()].pages.insert(properties, page_id);
                        page_id
                    }
                };
                self.pages[page_id.index()].assign(pid);
            }

            let page_ids: Vec<PageId> = self.groups[gid.index()].pages.values().copied().collect();
            let Palettizer {
                config,
                pages,
                atlases,
                placements,
                textures,
                ..
            } = self;
            for page_id in page_ids {
                pages[page_id.index()].place_all(page_id, atlases, placements, textures, config);
            }
        }
    }

    fn resize_and_check_solitary(&mut self) {
        let omit_solitary = self.config.omit_solitary;
        for atlas in &mut self.atlases {
            atlas.optimal_resize(&mut self.placements, &self.textures);
            atlas.check_solitary(&mut self.placements, omit_solitary);
        }
    }

    /// Re-resolves atlas filenames (marking scenes stale on renames) and
    /// regenerates whatever images the staleness rules say need it.
    fn update_filenames_and_images(&mut self, summary: &mut RunSummary) {
        let Palettizer {
            config,
            groups,
            pages,
            atlases,
            placements,
            textures,
            scenes,
            ..
        } = self;

        for atlas in atlases.iter_mut() {
            let page = &pages[atlas.page.index()];
            let group = &groups[page.group.index()];

            if atlas.setup_filename(&group.name, &group.dirname, &page.name(), config) {
                // The old filename is gone; every scene referencing a
                // texture on this atlas must be rewritten.
                let on_atlas: BTreeSet<TextureId> = atlas
                    .placements
                    .iter()
                    .map(|pid| placements[pid.index()].texture)
                    .collect();
                for scene in scenes.iter_mut() {
                    if scene.refs.iter().any(|r| on_atlas.contains(&r.texture)) {
                        scene.stale = true;
                    }
                }
            }

            match atlas.update_image(placements, textures, config) {
                Ok(true) => summary.atlases_written += 1,
                Ok(false) => {}
                Err(e) => {
                    warn!(atlas = %atlas.filename, error = %e, "atlas write failed");
                    summary.write_errors += 1;
                }
            }
            if !atlas.is_empty(placements) {
                summary
                    .utilization
                    .push((atlas.filename.clone(), atlas.count_utilization(placements)));
            }
        }
    }

    /// Computes the emit decision and UV transform for every reference.
    fn emit_transforms(&mut self) {
        for sid in 0..self.scenes.len() {
            for i in 0..self.scenes[sid].refs.len() {
                let tid = self.scenes[sid].refs[i].texture;
                let emit = self.textures[tid.index()]
                    .placements
                    .values()
                    .find_map(|pid| {
                        let p = &self.placements[pid.index()];
                        match (p.omit_reason, p.image) {
                            (OmitReason::None, Some(aid)) => {
                                let atlas = &self.atlases[aid.index()];
                                Some(RefEmit::Palette {
                                    atlas: aid,
                                    transform: p.compute_tex_matrix(atlas.x_size, atlas.y_size),
                                })
                            }
                            _ => None,
                        }
                    })
                    .unwrap_or(RefEmit::Original);
                self.scenes[sid].refs[i].emit = emit;
            }
        }
    }

    /// Post-pack invariant verification; failure is the exit-2 class.
    fn verify(&self) -> Result<()> {
        for (i, placement) in self.placements.iter().enumerate() {
            let pid = PlacementId::new(i);
            if self.dead_placements.contains(&pid) {
                continue;
            }

            let placed_like = matches!(
                placement.omit_reason,
                OmitReason::None | OmitReason::Solitary
            );
            if placed_like != placement.image.is_some() {
                return Err(PalError::Invariant(format!(
                    "{pid} has omit reason {:?} but image {:?}",
                    placement.omit_reason, placement.image
                )));
            }

            if !self.groups[placement.group.index()].placements.contains(&pid) {
                return Err(PalError::Invariant(format!(
                    "{pid} missing from its group '{}'",
                    self.groups[placement.group.index()].name
                )));
            }

            if let Some(aid) = placement.image {
                let atlas = &self.atlases[aid.index()];
                if !atlas.placements.contains(&pid) {
                    return Err(PalError::Invariant(format!(
                        "{pid} not listed by its atlas {}",
                        atlas.filename
                    )));
                }
                let p = &placement.placed;
                if p.x + p.x_size > atlas.x_size || p.y + p.y_size > atlas.y_size {
                    return Err(PalError::Invariant(format!(
                        "{pid} extends outside atlas {} ({}x{})",
                        atlas.filename, atlas.x_size, atlas.y_size
                    )));
                }
            }
        }

        for atlas in &self.atlases {
            for (i, a) in atlas.placements.iter().enumerate() {
                for b in &atlas.placements[i + 1..] {
                    let ra = &self.placements[a.index()].placed;
                    let rb = &self.placements[b.index()].placed;
                    if ra.intersects(rb.x, rb.y, rb.x_size, rb.y_size) {
                        return Err(PalError::Invariant(format!(
                            "{a} and {b} overlap on atlas {}",
                            atlas.filename
                        )));
                    }
                }
            }
        }

        Ok(())
    }

    /// Drops textures nothing references any more, with their placements.
    fn clean_unreferenced(&mut self) {
        for tid in 0..self.textures.len() {
            let tid = TextureId::new(tid);
            if !self.textures[tid.index()].references.is_empty() {
                continue;
            }
            let groups: Vec<GroupId> = self.textures[tid.index()]
                .placements
                .keys()
                .copied()
                .collect();
            for gid in groups {
                self.destroy_placement(tid, gid);
            }
        }
    }

    /// Rewrites the texture and placement pools without dead entries,
    /// patching every stored id. Groups, pages, atlases, and scenes are
    /// never compacted; their records persist even when emptied.
    fn compact(&mut self) {
        if self.dead_placements.is_empty() && !self.config.aggressively_clean {
            return;
        }

        // Textures: removable only under the clean flag, and only when
        // both unreferenced and placement-free.
        let texture_kept: Vec<bool> = self
            .textures
            .iter()
            .map(|t| {
                !(self.config.aggressively_clean
                    && t.references.is_empty()
                    && t.placements.is_empty())
            })
            .collect();
        let mut texture_map: Vec<Option<TextureId>> = vec![None; self.textures.len()];
        let mut new_textures = Vec::new();
        for (i, kept) in texture_kept.iter().enumerate() {
            if *kept {
                texture_map[i] = Some(TextureId::new(new_textures.len()));
                new_textures.push(self.textures[i].clone());
            } else {
                info!(texture = %self.textures[i].name, "dropping unreferenced texture");
            }
        }

        let mut placement_map: Vec<Option<PlacementId>> = vec![None; self.placements.len()];
        let mut new_placements = Vec::new();
        for i in 0..self.placements.len() {
            let pid = PlacementId::new(i);
            if self.dead_placements.contains(&pid) {
                continue;
            }
            if texture_map[self.placements[i].texture.index()].is_none() {
                continue;
            }
            placement_map[i] = Some(PlacementId::new(new_placements.len()));
            new_placements.push(self.placements[i].clone());
        }

        for p in &mut new_placements {
            p.texture = texture_map[p.texture.index()].expect("kept placement, kept texture");
        }
        for t in &mut new_textures {
            t.placements = t
                .placements
                .iter()
                .filter_map(|(gid, pid)| placement_map[pid.index()].map(|np| (*gid, np)))
                .collect();
        }
        for g in &mut self.groups {
            g.placements = g
                .placements
                .iter()
                .filter_map(|pid| placement_map[pid.index()])
                .collect();
        }
        for a in &mut self.atlases {
            a.placements = a
                .placements
                .iter()
                .filter_map(|pid| placement_map[pid.index()])
                .collect();
        }
        for s in &mut self.scenes {
            for r in &mut s.refs {
                // References to dropped textures cannot exist: a texture
                // is dropped only when nothing references it.
                r.texture = texture_map[r.texture.index()].expect("referenced texture kept");
            }
        }

        self.textures = new_textures;
        self.placements = new_placements;
        self.dead_placements.clear();
    }

    fn finish_summary(&self, summary: &mut RunSummary) {
        summary.textures = self.textures.len();
        for (i, p) in self.placements.iter().enumerate() {
            if self.dead_placements.contains(&PlacementId::new(i)) {
                continue;
            }
            match p.omit_reason {
                OmitReason::None => summary.placed += 1,
                OmitReason::Solitary => summary.solitary += 1,
                reason => summary
                    .omitted
                    .push((self.textures[p.texture.index()].name.clone(), reason)),
            }
        }
        for scene in &self.scenes {
            if scene.stale {
                summary.stale_scenes.push(scene.name.clone());
            }
        }

        info!(
            textures = summary.textures,
            placed = summary.placed,
            solitary = summary.solitary,
            omitted = summary.omitted.len(),
            missing_sources = summary.missing_sources,
            atlases_written = summary.atlases_written,
            "run complete"
        );
        for (name, reason) in &summary.omitted {
            info!(texture = %name, reason = ?reason, "texture not palettized");
        }
    }
}
