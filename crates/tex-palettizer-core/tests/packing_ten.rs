use std::path::Path;

use image::{Rgba, RgbaImage};
use tex_palettizer_core::prelude::*;

fn write_png(dir: &Path, name: &str, w: u32, h: u32) -> String {
    let mut img = RgbaImage::new(w, h);
    for p in img.pixels_mut() {
        *p = Rgba([128, 128, 128, 255]);
    }
    let path = dir.join(name);
    img.save(&path).unwrap();
    path.to_string_lossy().replace('\\', "/")
}

#[test]
fn ten_tiles_fill_one_page_without_overlap() {
    let tmp = tempfile::tempdir().unwrap();

    let mut scene = SceneInput {
        name: "level.scn".into(),
        ..Default::default()
    };
    for i in 0..10 {
        let name = format!("tile{i:02}");
        let path = write_png(tmp.path(), &format!("{name}.png"), 32, 32);
        scene.textures.push((name.clone(), path));
        scene.refs.push(RefInput {
            texture: name,
            uvs: Some((TexCoord::new(0.0, 0.0), TexCoord::new(1.0, 1.0))),
            wrap_u: WrapMode::Clamp,
            wrap_v: WrapMode::Clamp,
        });
    }

    let cfg = PackConfig::builder()
        .page_size(128, 128)
        .map_dir(tmp.path().to_string_lossy().to_string())
        .build();
    let mut pal = Palettizer::new(cfg);
    let summary = pal.run(&RuleFile::default(), &[scene]).unwrap();

    assert_eq!(summary.placed, 10);
    assert_eq!(summary.omitted.len(), 0);
    assert_eq!(pal.atlases.len(), 1);

    // Ten 32x32 tiles cannot fit a half page, so no resize happens.
    let atlas = &pal.atlases[0];
    assert_eq!((atlas.x_size, atlas.y_size), (128, 128));
    assert_eq!(atlas.placements.len(), 10);

    // No two placements intersect and all lie within bounds.
    for (i, a) in atlas.placements.iter().enumerate() {
        let ra = &pal.placements[a.index()].placed;
        assert!(ra.x + ra.x_size <= atlas.x_size);
        assert!(ra.y + ra.y_size <= atlas.y_size);
        for b in &atlas.placements[i + 1..] {
            let rb = &pal.placements[b.index()].placed;
            assert!(
                !ra.intersects(rb.x, rb.y, rb.x_size, rb.y_size),
                "placements {a} and {b} overlap"
            );
        }
    }

    let expected = 10.0 * 1024.0 / (128.0 * 128.0);
    let (_, utilization) = &summary.utilization[0];
    assert!((utilization - expected).abs() < 1e-9);
}

#[test]
fn overflow_spills_onto_a_second_atlas() {
    let tmp = tempfile::tempdir().unwrap();

    let mut scene = SceneInput {
        name: "level.scn".into(),
        ..Default::default()
    };
    // Seventeen 32x32 tiles exceed a 128x128 page (16 slots).
    for i in 0..17 {
        let name = format!("tile{i:02}");
        let path = write_png(tmp.path(), &format!("{name}.png"), 32, 32);
        scene.textures.push((name.clone(), path));
        scene.refs.push(RefInput {
            texture: name,
            uvs: Some((TexCoord::new(0.0, 0.0), TexCoord::new(1.0, 1.0))),
            wrap_u: WrapMode::Clamp,
            wrap_v: WrapMode::Clamp,
        });
    }

    let cfg = PackConfig::builder()
        .page_size(128, 128)
        .map_dir(tmp.path().to_string_lossy().to_string())
        .build();
    let mut pal = Palettizer::new(cfg);
    let summary = pal.run(&RuleFile::default(), &[scene]).unwrap();

    // The seventeenth tile lands alone on a second atlas and is solitary.
    assert_eq!(pal.atlases.len(), 2);
    assert_eq!(summary.placed, 16);
    assert_eq!(summary.solitary, 1);
}
