//! Persistent project state.
//!
//! The snapshot is a tagged little-endian record stream: a `(magic,
//! version)` header, the pack options the project was written with, then
//! every object of the store, each prefixed with its type tag and payload
//! length. Cross-object references are stored as pool indices and
//! bounds-checked in a second pass after everything is read, mirroring the
//! two-phase pointer resolution of the original tool's state file.
//!
//! Version policy: a reader accepts any version up to its own. Records
//! are length-delimited, so an older writer's shorter payloads simply
//! leave trailing fields at their defaults; a newer version is rejected
//! outright with `BadVersion`.

use std::collections::BTreeMap;
use std::fs;
use std::path::Path;

use crate::atlas::{AtlasImage, ClearedRegion};
use crate::config::PackConfig;
use crate::error::{PalError, Result};
use crate::group::PaletteGroup;
use crate::id::{AtlasId, GroupId, PageId, PlacementId, SceneId, TextureId};
use crate::page::PalettePage;
use crate::placement::{OmitReason, PlacementRect, TexturePlacement};
use crate::project::Palettizer;
use crate::properties::{FilterMode, ImageFileType, PixelFormat, TextureProperties};
use crate::scene::{RefEmit, RefKey, SceneFile, SceneRef, TexCoord, UvTransform, WrapMode};
use crate::texture::TextureImage;

pub const SNAPSHOT_MAGIC: [u8; 4] = *b"TXPL";
pub const SNAPSHOT_VERSION: u32 = 1;

/// Index value encoding "no reference".
const NONE_INDEX: u32 = u32::MAX;

const TAG_GROUP: u8 = 1;
const TAG_PAGE: u8 = 2;
const TAG_ATLAS: u8 = 3;
const TAG_PLACEMENT: u8 = 4;
const TAG_TEXTURE: u8 = 5;
const TAG_SCENE: u8 = 6;

// ---------- byte-level codec ----------

#[derive(Default)]
struct Writer {
    buf: Vec<u8>,
}

impl Writer {
    fn u8(&mut self, v: u8) {
        self.buf.push(v);
    }
    fn bool(&mut self, v: bool) {
        self.u8(v as u8);
    }
    fn u32(&mut self, v: u32) {
        self.buf.extend_from_slice(&v.to_le_bytes());
    }
    fn i32(&mut self, v: i32) {
        self.buf.extend_from_slice(&v.to_le_bytes());
    }
    fn f64(&mut self, v: f64) {
        self.buf.extend_from_slice(&v.to_le_bytes());
    }
    fn string(&mut self, v: &str) {
        self.u32(v.len() as u32);
        self.buf.extend_from_slice(v.as_bytes());
    }
}

struct Reader<'a> {
    buf: &'a [u8],
    pos: usize,
}

impl<'a> Reader<'a> {
    fn new(buf: &'a [u8]) -> Self {
        Self { buf, pos: 0 }
    }

    fn remaining(&self) -> usize {
        self.buf.len() - self.pos
    }

    fn take(&mut self, n: usize) -> Result<&'a [u8]> {
        if self.remaining() < n {
            return Err(PalError::BadSnapshot(format!(
                "truncated record: wanted {n} bytes, {} left",
                self.remaining()
            )));
        }
        let s = &self.buf[self.pos..self.pos + n];
        self.pos += n;
        Ok(s)
    }

    fn u8(&mut self) -> Result<u8> {
        Ok(self.take(1)?[0])
    }
    fn bool(&mut self) -> Result<bool> {
        Ok(self.u8()? != 0)
    }
    fn u32(&mut self) -> Result<u32> {
        Ok(u32::from_le_bytes(self.take(4)?.try_into().unwrap()))
    }
    fn i32(&mut self) -> Result<i32> {
        Ok(i32::from_le_bytes(self.take(4)?.try_into().unwrap()))
    }
    fn f64(&mut self) -> Result<f64> {
        Ok(f64::from_le_bytes(self.take(8)?.try_into().unwrap()))
    }
    fn string(&mut self) -> Result<String> {
        let len = self.u32()? as usize;
        let bytes = self.take(len)?;
        String::from_utf8(bytes.to_vec())
            .map_err(|_| PalError::BadSnapshot("non-UTF-8 string".into()))
    }
}

// ---------- enum and small-struct encodings ----------

fn write_opt_index(w: &mut Writer, v: Option<u32>) {
    w.u32(v.unwrap_or(NONE_INDEX));
}

fn read_opt_index(r: &mut Reader) -> Result<Option<u32>> {
    let v = r.u32()?;
    Ok(if v == NONE_INDEX { None } else { Some(v) })
}

fn write_wrap(w: &mut Writer, v: WrapMode) {
    w.u8(match v {
        WrapMode::Clamp => 0,
        WrapMode::Repeat => 1,
    });
}

fn read_wrap(r: &mut Reader) -> Result<WrapMode> {
    match r.u8()? {
        0 => Ok(WrapMode::Clamp),
        1 => Ok(WrapMode::Repeat),
        v => Err(PalError::BadSnapshot(format!("bad wrap mode {v}"))),
    }
}

fn write_omit(w: &mut Writer, v: OmitReason) {
    w.u8(match v {
        OmitReason::Working => 0,
        OmitReason::None => 1,
        OmitReason::Solitary => 2,
        OmitReason::Size => 3,
        OmitReason::Repeats => 4,
        OmitReason::Omitted => 5,
        OmitReason::Unknown => 6,
        OmitReason::Coverage => 7,
    });
}

fn read_omit(r: &mut Reader) -> Result<OmitReason> {
    Ok(match r.u8()? {
        0 => OmitReason::Working,
        1 => OmitReason::None,
        2 => OmitReason::Solitary,
        3 => OmitReason::Size,
        4 => OmitReason::Repeats,
        5 => OmitReason::Omitted,
        6 => OmitReason::Unknown,
        7 => OmitReason::Coverage,
        v => return Err(PalError::BadSnapshot(format!("bad omit reason {v}"))),
    })
}

fn write_file_type(w: &mut Writer, v: Option<ImageFileType>) {
    w.u8(match v {
        None => 255,
        Some(ImageFileType::Png) => 0,
        Some(ImageFileType::Bmp) => 1,
        Some(ImageFileType::Tga) => 2,
    });
}

fn read_file_type(r: &mut Reader) -> Result<Option<ImageFileType>> {
    Ok(match r.u8()? {
        255 => None,
        0 => Some(ImageFileType::Png),
        1 => Some(ImageFileType::Bmp),
        2 => Some(ImageFileType::Tga),
        v => return Err(PalError::BadSnapshot(format!("bad file type {v}"))),
    })
}

fn write_properties(w: &mut Writer, p: &TextureProperties) {
    w.u8(p.channel_count);
    w.u8(match p.format {
        PixelFormat::Rgb => 0,
        PixelFormat::Rgba => 1,
        PixelFormat::Luminance => 2,
        PixelFormat::LuminanceAlpha => 3,
        PixelFormat::Alpha => 4,
    });
    for f in [p.min_filter, p.mag_filter] {
        w.u8(match f {
            FilterMode::Nearest => 0,
            FilterMode::Linear => 1,
            FilterMode::Mipmap => 2,
        });
    }
    write_file_type(w, Some(p.color_type));
    write_file_type(w, p.alpha_type);
}

fn read_properties(r: &mut Reader) -> Result<TextureProperties> {
    let channel_count = r.u8()?;
    let format = match r.u8()? {
        0 => PixelFormat::Rgb,
        1 => PixelFormat::Rgba,
        2 => PixelFormat::Luminance,
        3 => PixelFormat::LuminanceAlpha,
        4 => PixelFormat::Alpha,
        v => return Err(PalError::BadSnapshot(format!("bad pixel format {v}"))),
    };
    let mut filters = [FilterMode::Linear; 2];
    for f in &mut filters {
        *f = match r.u8()? {
            0 => FilterMode::Nearest,
            1 => FilterMode::Linear,
            2 => FilterMode::Mipmap,
            v => return Err(PalError::BadSnapshot(format!("bad filter mode {v}"))),
        };
    }
    let color_type = read_file_type(r)?
        .ok_or_else(|| PalError::BadSnapshot("missing color file type".into()))?;
    let alpha_type = read_file_type(r)?;
    Ok(TextureProperties {
        channel_count,
        format,
        min_filter: filters[0],
        mag_filter: filters[1],
        color_type,
        alpha_type,
    })
}

fn write_rect(w: &mut Writer, rect: &PlacementRect) {
    w.u32(rect.x);
    w.u32(rect.y);
    w.u32(rect.x_size);
    w.u32(rect.y_size);
    w.f64(rect.min_uv.u);
    w.f64(rect.min_uv.v);
    w.f64(rect.max_uv.u);
    w.f64(rect.max_uv.v);
    write_wrap(w, rect.wrap_u);
    write_wrap(w, rect.wrap_v);
    w.u32(rect.margin);
}

fn read_rect(r: &mut Reader) -> Result<PlacementRect> {
    Ok(PlacementRect {
        x: r.u32()?,
        y: r.u32()?,
        x_size: r.u32()?,
        y_size: r.u32()?,
        min_uv: TexCoord::new(r.f64()?, r.f64()?),
        max_uv: TexCoord::new(r.f64()?, r.f64()?),
        wrap_u: read_wrap(r)?,
        wrap_v: read_wrap(r)?,
        margin: r.u32()?,
    })
}

// ---------- per-object records ----------

fn write_group(w: &mut Writer, g: &PaletteGroup) {
    w.string(&g.name);
    w.string(&g.dirname);
    w.u32(g.depends_on.len() as u32);
    for dep in &g.depends_on {
        w.u32(dep.0);
    }
    w.u32(g.scene_count);
    w.i32(g.dependency_level);
    w.i32(g.dependency_order);
    w.i32(g.dirname_order);
    w.u32(g.placements.len() as u32);
    for pid in &g.placements {
        w.u32(pid.0);
    }
    w.u32(g.pages.len() as u32);
    for (props, page) in &g.pages {
        write_properties(w, props);
        w.u32(page.0);
    }
}

fn read_group(r: &mut Reader) -> Result<PaletteGroup> {
    let mut g = PaletteGroup::new(r.string()?);
    g.dirname = r.string()?;
    let n = r.u32()?;
    for _ in 0..n {
        g.depends_on.insert(GroupId(r.u32()?));
    }
    g.scene_count = r.u32()?;
    g.dependency_level = r.i32()?;
    g.dependency_order = r.i32()?;
    g.dirname_order = r.i32()?;
    let n = r.u32()?;
    for _ in 0..n {
        g.placements.insert(PlacementId(r.u32()?));
    }
    let n = r.u32()?;
    for _ in 0..n {
        let props = read_properties(r)?;
        g.pages.insert(props, PageId(r.u32()?));
    }
    Ok(g)
}

fn write_page(w: &mut Writer, p: &PalettePage) {
    w.u32(p.group.0);
    write_properties(w, &p.properties);
    w.u32(p.images.len() as u32);
    for aid in &p.images {
        w.u32(aid.0);
    }
}

fn read_page(r: &mut Reader) -> Result<PalettePage> {
    let group = GroupId(r.u32()?);
    let properties = read_properties(r)?;
    let mut page = PalettePage::new(group, properties);
    let n = r.u32()?;
    for _ in 0..n {
        page.images.push(AtlasId(r.u32()?));
    }
    Ok(page)
}

fn write_atlas(w: &mut Writer, a: &AtlasImage) {
    w.u32(a.page.0);
    w.u32(a.index);
    w.u32(a.x_size);
    w.u32(a.y_size);
    write_properties(w, &a.properties);
    w.string(&a.basename);
    w.string(&a.filename);
    w.u32(a.placements.len() as u32);
    for pid in &a.placements {
        w.u32(pid.0);
    }
    w.u32(a.cleared_regions.len() as u32);
    for c in &a.cleared_regions {
        w.u32(c.x);
        w.u32(c.y);
        w.u32(c.x_size);
        w.u32(c.y_size);
    }
    w.bool(a.new_image);
}

fn read_atlas(r: &mut Reader, cfg: &PackConfig) -> Result<AtlasImage> {
    let page = PageId(r.u32()?);
    let index = r.u32()?;
    let x_size = r.u32()?;
    let y_size = r.u32()?;
    let properties = read_properties(r)?;
    let mut atlas = AtlasImage::new(page, index, properties, cfg);
    atlas.x_size = x_size;
    atlas.y_size = y_size;
    atlas.basename = r.string()?;
    atlas.filename = r.string()?;
    let n = r.u32()?;
    for _ in 0..n {
        atlas.placements.push(PlacementId(r.u32()?));
    }
    let n = r.u32()?;
    for _ in 0..n {
        atlas.cleared_regions.push(ClearedRegion {
            x: r.u32()?,
            y: r.u32()?,
            x_size: r.u32()?,
            y_size: r.u32()?,
        });
    }
    atlas.new_image = r.bool()?;
    Ok(atlas)
}

fn write_placement(w: &mut Writer, p: &TexturePlacement) {
    w.u32(p.texture.0);
    w.u32(p.group.0);
    write_opt_index(w, p.image.map(|a| a.0));
    w.bool(p.has_uvs);
    w.bool(p.size_known);
    w.bool(p.is_filled);
    write_omit(w, p.omit_reason);
    write_rect(w, &p.desired);
    write_rect(w, &p.placed);
}

fn read_placement(r: &mut Reader) -> Result<TexturePlacement> {
    let texture = TextureId(r.u32()?);
    let group = GroupId(r.u32()?);
    let mut p = TexturePlacement::new(texture, group, true);
    p.image = read_opt_index(r)?.map(AtlasId);
    p.has_uvs = r.bool()?;
    p.size_known = r.bool()?;
    p.is_filled = r.bool()?;
    p.omit_reason = read_omit(r)?;
    p.desired = read_rect(r)?;
    p.placed = read_rect(r)?;
    Ok(p)
}

fn write_texture(w: &mut Writer, t: &TextureImage) {
    w.string(&t.name);
    w.string(&t.source_path);
    w.bool(t.size_known);
    w.u32(t.x_size);
    w.u32(t.y_size);
    w.bool(t.channels_known);
    write_properties(w, &t.properties);
    w.u32(t.margin);
    w.f64(t.repeat_threshold_pct);
    w.bool(t.omit);
    match t.size_hint {
        Some((x, y)) => {
            w.bool(true);
            w.u32(x);
            w.u32(y);
        }
        None => w.bool(false),
    }
    w.u32(t.requested_groups.len() as u32);
    for gid in &t.requested_groups {
        w.u32(gid.0);
    }
    w.u32(t.references.len() as u32);
    for key in &t.references {
        w.u32(key.scene.0);
        w.u32(key.index);
    }
    w.u32(t.placements.len() as u32);
    for (gid, pid) in &t.placements {
        w.u32(gid.0);
        w.u32(pid.0);
    }
}

fn read_texture(r: &mut Reader) -> Result<TextureImage> {
    let name = r.string()?;
    let source_path = r.string()?;
    let mut t = TextureImage::new(name, source_path);
    t.size_known = r.bool()?;
    t.x_size = r.u32()?;
    t.y_size = r.u32()?;
    t.channels_known = r.bool()?;
    t.properties = read_properties(r)?;
    t.margin = r.u32()?;
    t.repeat_threshold_pct = r.f64()?;
    t.omit = r.bool()?;
    if r.bool()? {
        t.size_hint = Some((r.u32()?, r.u32()?));
    }
    let n = r.u32()?;
    for _ in 0..n {
        t.requested_groups.insert(GroupId(r.u32()?));
    }
    let n = r.u32()?;
    for _ in 0..n {
        t.references.push(RefKey {
            scene: SceneId(r.u32()?),
            index: r.u32()?,
        });
    }
    let n = r.u32()?;
    let mut placements = BTreeMap::new();
    for _ in 0..n {
        placements.insert(GroupId(r.u32()?), PlacementId(r.u32()?));
    }
    t.placements = placements;
    Ok(t)
}

fn write_scene(w: &mut Writer, s: &SceneFile) {
    w.string(&s.name);
    w.u32(s.groups.len() as u32);
    for gid in &s.groups {
        w.u32(gid.0);
    }
    w.u32(s.refs.len() as u32);
    for sr in &s.refs {
        w.u32(sr.texture.0);
        match sr.uvs {
            Some((n, x)) => {
                w.bool(true);
                w.f64(n.u);
                w.f64(n.v);
                w.f64(x.u);
                w.f64(x.v);
            }
            None => w.bool(false),
        }
        write_wrap(w, sr.wrap_u);
        write_wrap(w, sr.wrap_v);
        match &sr.emit {
            RefEmit::Original => w.u8(0),
            RefEmit::Palette { atlas, transform } => {
                w.u8(1);
                w.u32(atlas.0);
                w.f64(transform.sx);
                w.f64(transform.sy);
                w.f64(transform.tx);
                w.f64(transform.ty);
            }
        }
    }
    w.bool(s.stale);
}

fn read_scene(r: &mut Reader) -> Result<SceneFile> {
    let mut s = SceneFile::new(r.string()?);
    let n = r.u32()?;
    for _ in 0..n {
        s.groups.insert(GroupId(r.u32()?));
    }
    let n = r.u32()?;
    for _ in 0..n {
        let texture = TextureId(r.u32()?);
        let uvs = if r.bool()? {
            Some((
                TexCoord::new(r.f64()?, r.f64()?),
                TexCoord::new(r.f64()?, r.f64()?),
            ))
        } else {
            None
        };
        let wrap_u = read_wrap(r)?;
        let wrap_v = read_wrap(r)?;
        let emit = match r.u8()? {
            0 => RefEmit::Original,
            1 => RefEmit::Palette {
                atlas: AtlasId(r.u32()?),
                transform: UvTransform {
                    sx: r.f64()?,
                    sy: r.f64()?,
                    tx: r.f64()?,
                    ty: r.f64()?,
                },
            },
            v => return Err(PalError::BadSnapshot(format!("bad emit tag {v}"))),
        };
        let mut sr = SceneRef::new(texture, uvs, wrap_u, wrap_v);
        sr.emit = emit;
        s.refs.push(sr);
    }
    s.stale = r.bool()?;
    Ok(s)
}

// ---------- top-level save / load ----------

fn write_config(w: &mut Writer, cfg: &PackConfig) {
    w.u32(cfg.page_max_x);
    w.u32(cfg.page_max_y);
    for c in cfg.background {
        w.u8(c);
    }
    w.bool(cfg.omit_solitary);
    w.bool(cfg.round_uvs);
    w.f64(cfg.round_unit);
    w.f64(cfg.round_fuzz);
    w.string(&cfg.image_pattern);
    w.string(&cfg.map_dir);
    w.string(&cfg.default_group);
}

fn read_config(r: &mut Reader) -> Result<PackConfig> {
    let mut cfg = PackConfig {
        page_max_x: r.u32()?,
        page_max_y: r.u32()?,
        ..PackConfig::default()
    };
    for c in &mut cfg.background {
        *c = r.u8()?;
    }
    cfg.omit_solitary = r.bool()?;
    cfg.round_uvs = r.bool()?;
    cfg.round_unit = r.f64()?;
    cfg.round_fuzz = r.f64()?;
    cfg.image_pattern = r.string()?;
    cfg.map_dir = r.string()?;
    cfg.default_group = r.string()?;
    Ok(cfg)
}

/// Serializes the whole store to `path`. The write goes through a
/// temporary sibling file and a rename, so an interrupted run leaves the
/// previous snapshot intact.
pub fn save(pal: &Palettizer, path: &Path) -> Result<()> {
    let mut w = Writer::default();
    w.buf.extend_from_slice(&SNAPSHOT_MAGIC);
    w.u32(SNAPSHOT_VERSION);
    write_config(&mut w, &pal.config);

    let count = pal.groups.len()
        + pal.pages.len()
        + pal.atlases.len()
        + pal.placements.len()
        + pal.textures.len()
        + pal.scenes.len();
    w.u32(count as u32);

    let mut record = |tag: u8, body: Writer, w: &mut Writer| {
        w.u8(tag);
        w.u32(body.buf.len() as u32);
        w.buf.extend_from_slice(&body.buf);
    };

    for g in &pal.groups {
        let mut body = Writer::default();
        write_group(&mut body, g);
        record(TAG_GROUP, body, &mut w);
    }
    for p in &pal.pages {
        let mut body = Writer::default();
        write_page(&mut body, p);
        record(TAG_PAGE, body, &mut w);
    }
    for a in &pal.atlases {
        let mut body = Writer::default();
        write_atlas(&mut body, a);
        record(TAG_ATLAS, body, &mut w);
    }
    for p in &pal.placements {
        let mut body = Writer::default();
        write_placement(&mut body, p);
        record(TAG_PLACEMENT, body, &mut w);
    }
    for t in &pal.textures {
        let mut body = Writer::default();
        write_texture(&mut body, t);
        record(TAG_TEXTURE, body, &mut w);
    }
    for s in &pal.scenes {
        let mut body = Writer::default();
        write_scene(&mut body, s);
        record(TAG_SCENE, body, &mut w);
    }

    let tmp = path.with_extension("tmp");
    fs::write(&tmp, &w.buf)?;
    fs::rename(&tmp, path)?;
    Ok(())
}

/// Reads a snapshot back into a store.
pub fn load(path: &Path) -> Result<Palettizer> {
    let data = fs::read(path)?;
    let mut r = Reader::new(&data);

    let magic = r.take(4)?;
    if magic != SNAPSHOT_MAGIC.as_slice() {
        return Err(PalError::BadSnapshot("bad magic".into()));
    }
    let version = r.u32()?;
    if version > SNAPSHOT_VERSION {
        return Err(PalError::BadVersion {
            found: version,
            supported: SNAPSHOT_VERSION,
        });
    }

    let config = read_config(&mut r)?;
    let mut pal = Palettizer::new(config);

    let count = r.u32()?;
    for _ in 0..count {
        let tag = r.u8()?;
        let len = r.u32()? as usize;
        let body = r.take(len)?;
        let mut br = Reader::new(body);
        match tag {
            TAG_GROUP => pal.groups.push(read_group(&mut br)?),
            TAG_PAGE => pal.pages.push(read_page(&mut br)?),
            TAG_ATLAS => pal.atlases.push(read_atlas(&mut br, &pal.config)?),
            TAG_PLACEMENT => pal.placements.push(read_placement(&mut br)?),
            TAG_TEXTURE => pal.textures.push(read_texture(&mut br)?),
            TAG_SCENE => pal.scenes.push(read_scene(&mut br)?),
            other => {
                return Err(PalError::BadSnapshot(format!("unknown type tag {other}")));
            }
        }
        if br.remaining() != 0 && version == SNAPSHOT_VERSION {
            return Err(PalError::BadSnapshot(format!(
                "record tag {tag} has {} trailing bytes",
                br.remaining()
            )));
        }
    }

    resolve(&pal)?;
    Ok(pal)
}

/// The second pass: every stored index must land inside its pool, and
/// mutually-listing relationships must agree.
fn resolve(pal: &Palettizer) -> Result<()> {
    let bad = |what: String| Err(PalError::BadSnapshot(what));

    let groups = pal.groups.len();
    let pages = pal.pages.len();
    let atlases = pal.atlases.len();
    let placements = pal.placements.len();
    let textures = pal.textures.len();
    let scenes = pal.scenes.len();

    for g in &pal.groups {
        if g.depends_on.iter().any(|d| d.index() >= groups) {
            return bad(format!("group '{}' depends on a missing group", g.name));
        }
        if g.placements.iter().any(|p| p.index() >= placements) {
            return bad(format!("group '{}' lists a missing placement", g.name));
        }
        if g.pages.values().any(|p| p.index() >= pages) {
            return bad(format!("group '{}' lists a missing page", g.name));
        }
    }
    for (i, p) in pal.pages.iter().enumerate() {
        if p.group.index() >= groups {
            return bad(format!("page {i} belongs to a missing group"));
        }
        if p.images.iter().any(|a| a.index() >= atlases) {
            return bad(format!("page {i} lists a missing atlas"));
        }
    }
    for a in &pal.atlases {
        if a.page.index() >= pages {
            return bad(format!("atlas '{}' belongs to a missing page", a.filename));
        }
        if a.placements.iter().any(|p| p.index() >= placements) {
            return bad(format!("atlas '{}' lists a missing placement", a.filename));
        }
    }
    for (i, p) in pal.placements.iter().enumerate() {
        if p.texture.index() >= textures || p.group.index() >= groups {
            return bad(format!("placement {i} has a dangling owner"));
        }
        if let Some(aid) = p.image {
            if aid.index() >= atlases {
                return bad(format!("placement {i} points at a missing atlas"));
            }
            if !pal.atlases[aid.index()]
                .placements
                .contains(&PlacementId(i as u32))
            {
                return bad(format!("placement {i} not listed by its atlas"));
            }
        }
    }
    for t in &pal.textures {
        if t.requested_groups.iter().any(|g| g.index() >= groups) {
            return bad(format!("texture '{}' requests a missing group", t.name));
        }
        for key in &t.references {
            if key.scene.index() >= scenes
                || key.index as usize >= pal.scenes[key.scene.index()].refs.len()
            {
                return bad(format!("texture '{}' has a dangling reference", t.name));
            }
        }
        for (gid, pid) in &t.placements {
            if gid.index() >= groups || pid.index() >= placements {
                return bad(format!("texture '{}' has a dangling placement", t.name));
            }
        }
    }
    for s in &pal.scenes {
        if s.groups.iter().any(|g| g.index() >= groups) {
            return bad(format!("scene '{}' names a missing group", s.name));
        }
        for sr in &s.refs {
            if sr.texture.index() >= textures {
                return bad(format!("scene '{}' references a missing texture", s.name));
            }
            if let RefEmit::Palette { atlas, .. } = &sr.emit {
                if atlas.index() >= atlases {
                    return bad(format!("scene '{}' emit names a missing atlas", s.name));
                }
            }
        }
    }

    Ok(())
}
