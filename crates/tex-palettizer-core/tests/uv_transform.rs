use std::path::Path;

use image::{Rgba, RgbaImage};
use tex_palettizer_core::id::{GroupId, TextureId};
use tex_palettizer_core::placement::TexturePlacement;
use tex_palettizer_core::prelude::*;

/// Hand-checked instance of the fixed transform formula: a margin-free
/// 32x32 placement at (32, 16) on a 128x128 atlas, full UV box.
#[test]
fn transform_matches_the_reference_formula() {
    let mut p = TexturePlacement::new(TextureId::new(0), GroupId::new(0), true);
    p.desired.x = 32;
    p.desired.y = 16;
    p.desired.x_size = 32;
    p.desired.y_size = 32;
    p.desired.min_uv = TexCoord::new(0.0, 0.0);
    p.desired.max_uv = TexCoord::new(1.0, 1.0);
    p.image = Some(AtlasId::new(0));
    p.placed = p.desired;

    let m = p.compute_tex_matrix(128, 128);
    assert!((m.sx - 0.25).abs() < 1e-12);
    assert!((m.sy - 0.25).abs() < 1e-12);
    assert!((m.tx - 0.25).abs() < 1e-12);
    assert!((m.ty - 0.625).abs() < 1e-12);

    let matrix = m.to_matrix();
    assert_eq!(matrix[0][0], m.sx);
    assert_eq!(matrix[1][1], m.sy);
    assert_eq!(matrix[2][0], m.tx);
    assert_eq!(matrix[2][1], m.ty);
    assert_eq!(matrix[2][2], 1.0);
}

fn write_png(dir: &Path, name: &str, w: u32, h: u32) -> String {
    let mut img = RgbaImage::new(w, h);
    for p in img.pixels_mut() {
        *p = Rgba([77, 77, 77, 255]);
    }
    let path = dir.join(name);
    img.save(&path).unwrap();
    path.to_string_lossy().replace('\\', "/")
}

/// Round trip: every emitted transform maps the reference's UV box onto
/// its placement's rectangle on the atlas (bottom-up V convention).
#[test]
fn emitted_transforms_land_inside_their_placements() {
    let tmp = tempfile::tempdir().unwrap();

    let mut scene = SceneInput {
        name: "level.scn".into(),
        ..Default::default()
    };
    for (i, (w, h)) in [(32u32, 32u32), (48, 16), (16, 48), (24, 24)].iter().enumerate() {
        let name = format!("tex{i}");
        let path = write_png(tmp.path(), &format!("{name}.png"), *w, *h);
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
    pal.run(&RuleFile::default(), &[scene]).unwrap();

    for r in &pal.scenes[0].refs {
        let RefEmit::Palette { atlas, transform } = &r.emit else {
            panic!("expected a palette emit");
        };
        let a = &pal.atlases[atlas.index()];
        let placement = pal.textures[r.texture.index()]
            .placements
            .values()
            .next()
            .unwrap();
        let placed = &pal.placements[placement.index()].placed;

        let (min, max) = r.uvs.unwrap();
        for uv in [min, max, TexCoord::new(min.u, max.v), TexCoord::new(max.u, min.v)] {
            let out = transform.apply(uv);
            let px = out.u * a.x_size as f64;
            // V is bottom-up; flip back to pixel rows from the top.
            let py = (1.0 - out.v) * a.y_size as f64;
            assert!(
                px >= placed.x as f64 - 1e-6
                    && px <= (placed.x + placed.x_size) as f64 + 1e-6,
                "u coordinate {px} escapes [{}, {}]",
                placed.x,
                placed.x + placed.x_size
            );
            assert!(
                py >= placed.y as f64 - 1e-6 && py <= (placed.y + placed.y_size) as f64 + 1.0 + 1e-6,
                "v coordinate {py} escapes [{}, {}]",
                placed.y,
                placed.y + placed.y_size
            );
        }
    }
}
