use std::collections::BTreeMap;
use std::fs;
use std::path::Path;

use image::{Rgba, RgbaImage};
use tex_palettizer_core::prelude::*;

fn write_png(dir: &Path, name: &str, w: u32, h: u32) -> String {
    let mut img = RgbaImage::new(w, h);
    for p in img.pixels_mut() {
        *p = Rgba([200, 100, 50, 255]);
    }
    let path = dir.join(name);
    img.save(&path).unwrap();
    path.to_string_lossy().replace('\\', "/")
}

fn tile_scene(tmp: &Path, index: usize) -> SceneInput {
    let name = format!("tile{index:02}");
    let path = write_png(tmp, &format!("{name}.png"), 32, 32);
    SceneInput {
        // A path under the temp dir that never exists on disk; dropping
        // it from the input simulates a deleted scene file.
        name: tmp
            .join(format!("scene{index:02}.scn"))
            .to_string_lossy()
            .replace('\\', "/"),
        groups: vec![],
        textures: vec![(name.clone(), path)],
        refs: vec![RefInput {
            texture: name,
            uvs: Some((TexCoord::new(0.0, 0.0), TexCoord::new(1.0, 1.0))),
            wrap_u: WrapMode::Clamp,
            wrap_v: WrapMode::Clamp,
        }],
    }
}

fn config(tmp: &Path) -> PackConfig {
    PackConfig::builder()
        .page_size(128, 128)
        .map_dir(tmp.to_string_lossy().to_string())
        .build()
}

fn slot_map(pal: &Palettizer) -> BTreeMap<String, (u32, u32)> {
    pal.placements
        .iter()
        .filter(|p| p.image.is_some())
        .map(|p| {
            (
                pal.textures[p.texture.index()].name.clone(),
                (p.placed.x, p.placed.y),
            )
        })
        .collect()
}

/// An immediate re-run with identical inputs writes nothing and produces
/// a byte-identical snapshot.
#[test]
fn rerun_without_changes_is_idempotent() {
    let tmp = tempfile::tempdir().unwrap();
    let scenes: Vec<SceneInput> = (0..10).map(|i| tile_scene(tmp.path(), i)).collect();

    let mut pal = Palettizer::new(config(tmp.path()));
    let first = pal.run(&RuleFile::default(), &scenes).unwrap();
    assert_eq!(first.atlases_written, 1);
    let p1 = tmp.path().join("run1.pal");
    snapshot::save(&pal, &p1).unwrap();

    let mut pal = snapshot::load(&p1).unwrap();
    let second = pal.run(&RuleFile::default(), &scenes).unwrap();
    assert_eq!(second.atlases_written, 0);

    let p2 = tmp.path().join("run2.pal");
    snapshot::save(&pal, &p2).unwrap();
    assert_eq!(fs::read(&p1).unwrap(), fs::read(&p2).unwrap());
}

/// Deleting one scene vacates only its texture's slot; the survivors
/// keep their exact coordinates and the hole is blanked to background.
#[test]
fn removing_a_scene_blanks_only_its_slot() {
    let tmp = tempfile::tempdir().unwrap();
    let scenes: Vec<SceneInput> = (0..10).map(|i| tile_scene(tmp.path(), i)).collect();

    let mut pal = Palettizer::new(config(tmp.path()));
    pal.run(&RuleFile::default(), &scenes).unwrap();
    let before = slot_map(&pal);
    let (gone_x, gone_y) = before["tile05"];
    let atlas_file = pal.atlases[0].filename.clone();

    // Scene 5's file never existed on disk, so leaving it out of the
    // input drops its references.
    let remaining: Vec<SceneInput> = scenes
        .iter()
        .filter(|s| !s.name.ends_with("scene05.scn"))
        .cloned()
        .collect();
    let summary = pal.run(&RuleFile::default(), &remaining).unwrap();
    assert_eq!(summary.atlases_written, 1);

    let after = slot_map(&pal);
    assert!(!after.contains_key("tile05"));
    for (name, slot) in &after {
        assert_eq!(slot, &before[name], "{name} moved");
    }

    // The vacated rectangle reads back as background.
    let img = image::open(&atlas_file).unwrap().to_rgba8();
    assert_eq!(img.get_pixel(gone_x + 1, gone_y + 1), &Rgba([0, 0, 0, 0]));
    // A surviving tile still has its pixels.
    let (keep_x, keep_y) = after["tile00"];
    assert_eq!(
        img.get_pixel(keep_x + 1, keep_y + 1),
        &Rgba([200, 100, 50, 255])
    );
}

/// A trivial UV edit inside the rounding grid neither re-places the
/// texture nor rewrites the atlas.
#[test]
fn tiny_uv_drift_keeps_the_placement() {
    let tmp = tempfile::tempdir().unwrap();
    let path = write_png(tmp.path(), "brick.png", 64, 64);
    let scene = |min_u: f64| SceneInput {
        name: "room.scn".into(),
        groups: vec![],
        textures: vec![("brick".into(), path.clone())],
        refs: vec![RefInput {
            texture: "brick".into(),
            uvs: Some((TexCoord::new(min_u, 0.0), TexCoord::new(1.0, 1.0))),
            wrap_u: WrapMode::Clamp,
            wrap_v: WrapMode::Clamp,
        }],
    };

    let mut pal = Palettizer::new(config(tmp.path()));
    let first = pal.run(&RuleFile::default(), &[scene(0.0)]).unwrap();
    assert_eq!(first.atlases_written, 1);
    let placed_before = pal.placements[0].placed;

    let second = pal.run(&RuleFile::default(), &[scene(0.01)]).unwrap();
    assert_eq!(second.atlases_written, 0);
    assert_eq!(pal.placements[0].placed, placed_before);
}

/// Adding a texture never moves an unchanged, already-placed one as long
/// as no resize occurs.
#[test]
fn adding_a_texture_leaves_existing_slots_alone() {
    let tmp = tempfile::tempdir().unwrap();
    // Twelve tiles so the first run cannot shrink the 128x128 page and
    // later runs see a stable atlas size.
    let scenes: Vec<SceneInput> = (0..12).map(|i| tile_scene(tmp.path(), i)).collect();

    let mut pal = Palettizer::new(config(tmp.path()));
    pal.run(&RuleFile::default(), &scenes).unwrap();
    let before = slot_map(&pal);
    assert_eq!((pal.atlases[0].x_size, pal.atlases[0].y_size), (128, 128));

    let mut more = scenes.clone();
    more.push(tile_scene(tmp.path(), 12));
    pal.run(&RuleFile::default(), &more).unwrap();

    let after = slot_map(&pal);
    assert!(after.contains_key("tile12"));
    for (name, slot) in &before {
        assert_eq!(&after[name], slot, "{name} moved when tile12 arrived");
    }
}
