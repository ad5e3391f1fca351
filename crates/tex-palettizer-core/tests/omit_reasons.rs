use std::path::{Path, PathBuf};

use image::{Rgba, RgbaImage};
use tex_palettizer_core::prelude::*;

fn write_png(dir: &Path, name: &str, w: u32, h: u32) -> String {
    let mut img = RgbaImage::new(w, h);
    for p in img.pixels_mut() {
        *p = Rgba([90, 60, 30, 255]);
    }
    let path = dir.join(name);
    img.save(&path).unwrap();
    path.to_string_lossy().replace('\\', "/")
}

fn one_ref_scene(texture: &str, path: String, uvs: (TexCoord, TexCoord), wrap: WrapMode) -> SceneInput {
    SceneInput {
        name: "scene.scn".into(),
        groups: vec![],
        textures: vec![(texture.to_string(), path)],
        refs: vec![RefInput {
            texture: texture.to_string(),
            uvs: Some(uvs),
            wrap_u: wrap,
            wrap_v: wrap,
        }],
    }
}

fn run_one(
    tmp: &tempfile::TempDir,
    rules: &RuleFile,
    scene: SceneInput,
) -> (Palettizer, RunSummary) {
    let cfg = PackConfig::builder()
        .page_size(128, 128)
        .map_dir(tmp.path().to_string_lossy().to_string())
        .build();
    let mut pal = Palettizer::new(cfg);
    let summary = pal.run(rules, &[scene]).unwrap();
    (pal, summary)
}

#[test]
fn heavy_repeats_are_left_unpalettized() {
    let tmp = tempfile::tempdir().unwrap();
    let path = write_png(tmp.path(), "sky.png", 32, 32);
    let rules = RuleFile::parse(&PathBuf::from("t.txa"), "sky : repeat=100\n").unwrap();

    // A 4x4 UV box is 1600% coverage, way past the 100% threshold.
    let scene = one_ref_scene(
        "sky",
        path,
        (TexCoord::new(0.0, 0.0), TexCoord::new(4.0, 4.0)),
        WrapMode::Repeat,
    );
    let (pal, summary) = run_one(&tmp, &rules, scene);

    assert_eq!(summary.placed + summary.solitary, 0);
    assert_eq!(summary.omitted, vec![("sky".to_string(), OmitReason::Repeats)]);
    assert!(pal.placements[0].image.is_none());
    assert!(matches!(pal.scenes[0].refs[0].emit, RefEmit::Original));
}

#[test]
fn mild_repeats_stay_within_a_generous_threshold() {
    let tmp = tempfile::tempdir().unwrap();
    let path = write_png(tmp.path(), "sky.png", 8, 8);
    let rules = RuleFile::parse(&PathBuf::from("t.txa"), "sky : repeat=1700\n").unwrap();

    let scene = one_ref_scene(
        "sky",
        path,
        (TexCoord::new(0.0, 0.0), TexCoord::new(4.0, 4.0)),
        WrapMode::Repeat,
    );
    let (_pal, summary) = run_one(&tmp, &rules, scene);
    assert_eq!(summary.placed + summary.solitary, 1);
}

#[test]
fn oversized_textures_are_omitted_for_size() {
    let tmp = tempfile::tempdir().unwrap();
    let path = write_png(tmp.path(), "big.png", 256, 96);

    let scene = one_ref_scene(
        "big",
        path,
        (TexCoord::new(0.0, 0.0), TexCoord::new(1.0, 1.0)),
        WrapMode::Clamp,
    );
    let (_pal, summary) = run_one(&tmp, &no_rules(), scene);
    assert_eq!(summary.omitted, vec![("big".to_string(), OmitReason::Size)]);
}

#[test]
fn exactly_a_full_page_is_omitted_but_one_pixel_less_fits() {
    let tmp = tempfile::tempdir().unwrap();

    // Consuming the entire page in both dimensions is disqualifying.
    let full = write_png(tmp.path(), "full.png", 128, 128);
    let scene = one_ref_scene(
        "full",
        full,
        (TexCoord::new(0.0, 0.0), TexCoord::new(1.0, 1.0)),
        WrapMode::Clamp,
    );
    let (_pal, summary) = run_one(&tmp, &no_rules(), scene);
    assert_eq!(summary.omitted, vec![("full".to_string(), OmitReason::Size)]);

    // One pixel under in one dimension is accepted.
    let tmp2 = tempfile::tempdir().unwrap();
    let near = write_png(tmp2.path(), "near.png", 127, 128);
    let scene = one_ref_scene(
        "near",
        near,
        (TexCoord::new(0.0, 0.0), TexCoord::new(1.0, 1.0)),
        WrapMode::Clamp,
    );
    let (_pal, summary) = run_one(&tmp2, &no_rules(), scene);
    assert!(summary.omitted.is_empty());
    assert_eq!(summary.placed + summary.solitary, 1);
}

#[test]
fn explicit_omit_wins_over_the_repeat_check() {
    let tmp = tempfile::tempdir().unwrap();
    let path = write_png(tmp.path(), "decal.png", 32, 32);
    let rules =
        RuleFile::parse(&PathBuf::from("t.txa"), "decal : omit=true repeat=100\n").unwrap();

    // Both conditions hold; the omit flag is evaluated first.
    let scene = one_ref_scene(
        "decal",
        path,
        (TexCoord::new(0.0, 0.0), TexCoord::new(4.0, 4.0)),
        WrapMode::Repeat,
    );
    let (_pal, summary) = run_one(&tmp, &rules, scene);
    assert_eq!(
        summary.omitted,
        vec![("decal".to_string(), OmitReason::Omitted)]
    );
}

#[test]
fn unreadable_source_goes_unknown_and_the_run_completes() {
    let tmp = tempfile::tempdir().unwrap();
    let missing = tmp
        .path()
        .join("missing.png")
        .to_string_lossy()
        .replace('\\', "/");

    let scene = one_ref_scene(
        "ghost",
        missing,
        (TexCoord::new(0.0, 0.0), TexCoord::new(1.0, 1.0)),
        WrapMode::Clamp,
    );
    let (pal, summary) = run_one(&tmp, &no_rules(), scene);
    assert_eq!(
        summary.omitted,
        vec![("ghost".to_string(), OmitReason::Unknown)]
    );
    assert_eq!(summary.missing_sources, 1);
    assert!(!pal.textures[0].size_known);
}

fn no_rules() -> RuleFile {
    RuleFile::default()
}
