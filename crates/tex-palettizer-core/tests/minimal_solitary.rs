use std::path::Path;

use image::{Rgba, RgbaImage};
use tex_palettizer_core::prelude::*;

fn write_png(dir: &Path, name: &str, w: u32, h: u32) -> String {
    let mut img = RgbaImage::new(w, h);
    for p in img.pixels_mut() {
        *p = Rgba([10, 200, 30, 255]);
    }
    let path = dir.join(name);
    img.save(&path).unwrap();
    path.to_string_lossy().replace('\\', "/")
}

fn full_ref(texture: &str) -> RefInput {
    RefInput {
        texture: texture.to_string(),
        uvs: Some((TexCoord::new(0.0, 0.0), TexCoord::new(1.0, 1.0))),
        wrap_u: WrapMode::Clamp,
        wrap_v: WrapMode::Clamp,
    }
}

#[test]
fn single_texture_shrinks_to_fit_and_goes_solitary() {
    let tmp = tempfile::tempdir().unwrap();
    let tex_path = write_png(tmp.path(), "brick.png", 64, 64);

    let cfg = PackConfig::builder()
        .page_size(128, 128)
        .map_dir(tmp.path().to_string_lossy().to_string())
        .build();
    let mut pal = Palettizer::new(cfg);

    let scenes = vec![SceneInput {
        name: "room.scn".into(),
        groups: vec![],
        textures: vec![("brick".into(), tex_path)],
        refs: vec![full_ref("brick")],
    }];

    let summary = pal.run(&RuleFile::default(), &scenes).unwrap();

    assert_eq!(summary.solitary, 1);
    assert_eq!(summary.placed, 0);
    assert_eq!(pal.atlases.len(), 1);

    // Optimal resize halves 128x128 down to the texture's own size.
    let atlas = &pal.atlases[0];
    assert_eq!((atlas.x_size, atlas.y_size), (64, 64));

    let placement = &pal.placements[0];
    assert_eq!(placement.omit_reason, OmitReason::Solitary);
    assert_eq!((placement.placed.x, placement.placed.y), (0, 0));

    // A solitary placement keeps the scene on the original texture file.
    assert!(matches!(pal.scenes[0].refs[0].emit, RefEmit::Original));

    // The image on disk matches the resized atlas.
    let written = image::open(&atlas.filename).unwrap();
    assert_eq!((written.width(), written.height()), (64, 64));
}

#[test]
fn no_omit_solitary_emits_the_palette_reference() {
    let tmp = tempfile::tempdir().unwrap();
    let tex_path = write_png(tmp.path(), "brick.png", 64, 64);

    let cfg = PackConfig::builder()
        .page_size(128, 128)
        .omit_solitary(false)
        .map_dir(tmp.path().to_string_lossy().to_string())
        .build();
    let mut pal = Palettizer::new(cfg);

    let scenes = vec![SceneInput {
        name: "room.scn".into(),
        groups: vec![],
        textures: vec![("brick".into(), tex_path)],
        refs: vec![full_ref("brick")],
    }];

    let summary = pal.run(&RuleFile::default(), &scenes).unwrap();
    assert_eq!(summary.placed, 1);
    assert_eq!(summary.solitary, 0);
    assert!(matches!(
        pal.scenes[0].refs[0].emit,
        RefEmit::Palette { .. }
    ));
}
