use std::fs;
use std::path::Path;

use image::{Rgba, RgbaImage};
use tex_palettizer_core::prelude::*;

fn write_png(dir: &Path, name: &str, w: u32, h: u32) -> String {
    let mut img = RgbaImage::new(w, h);
    for p in img.pixels_mut() {
        *p = Rgba([5, 6, 7, 255]);
    }
    let path = dir.join(name);
    img.save(&path).unwrap();
    path.to_string_lossy().replace('\\', "/")
}

fn populated_store(tmp: &tempfile::TempDir) -> Palettizer {
    let mut scene = SceneInput {
        name: "level.scn".into(),
        groups: vec!["world".into()],
        ..Default::default()
    };
    for i in 0..4 {
        let name = format!("tex{i}");
        let path = write_png(tmp.path(), &format!("{name}.png"), 32, 32);
        scene.textures.push((name.clone(), path));
        scene.refs.push(RefInput {
            texture: name,
            uvs: Some((TexCoord::new(0.0, 0.0), TexCoord::new(1.0, 1.0))),
            wrap_u: WrapMode::Clamp,
            wrap_v: WrapMode::Repeat,
        });
    }

    let cfg = PackConfig::builder()
        .page_size(128, 128)
        .map_dir(tmp.path().to_string_lossy().to_string())
        .build();
    let mut pal = Palettizer::new(cfg);
    pal.run(&RuleFile::default(), &[scene]).unwrap();
    pal
}

#[test]
fn save_load_save_is_byte_stable() {
    let tmp = tempfile::tempdir().unwrap();
    let pal = populated_store(&tmp);

    let p1 = tmp.path().join("state1.pal");
    let p2 = tmp.path().join("state2.pal");
    snapshot::save(&pal, &p1).unwrap();

    let loaded = snapshot::load(&p1).unwrap();
    snapshot::save(&loaded, &p2).unwrap();

    assert_eq!(fs::read(&p1).unwrap(), fs::read(&p2).unwrap());
}

#[test]
fn loaded_store_preserves_the_object_graph() {
    let tmp = tempfile::tempdir().unwrap();
    let pal = populated_store(&tmp);
    let path = tmp.path().join("state.pal");
    snapshot::save(&pal, &path).unwrap();

    let loaded = snapshot::load(&path).unwrap();
    assert_eq!(loaded.groups.len(), pal.groups.len());
    assert_eq!(loaded.textures.len(), pal.textures.len());
    assert_eq!(loaded.placements.len(), pal.placements.len());
    assert_eq!(loaded.scenes.len(), pal.scenes.len());
    assert_eq!(loaded.config, pal.config);

    for (a, b) in loaded.placements.iter().zip(&pal.placements) {
        assert_eq!(a.placed, b.placed);
        assert_eq!(a.omit_reason, b.omit_reason);
        assert_eq!(a.image, b.image);
    }
    for (a, b) in loaded.scenes.iter().zip(&pal.scenes) {
        assert_eq!(a.refs.len(), b.refs.len());
        for (ra, rb) in a.refs.iter().zip(&b.refs) {
            assert_eq!(ra.emit, rb.emit);
        }
    }
}

#[test]
fn newer_snapshot_versions_are_rejected() {
    let tmp = tempfile::tempdir().unwrap();
    let path = tmp.path().join("future.pal");

    let mut bytes = Vec::new();
    bytes.extend_from_slice(&snapshot::SNAPSHOT_MAGIC);
    bytes.extend_from_slice(&(snapshot::SNAPSHOT_VERSION + 1).to_le_bytes());
    fs::write(&path, &bytes).unwrap();

    match snapshot::load(&path) {
        Err(PalError::BadVersion { found, supported }) => {
            assert_eq!(found, snapshot::SNAPSHOT_VERSION + 1);
            assert_eq!(supported, snapshot::SNAPSHOT_VERSION);
        }
        other => panic!("expected BadVersion, got {other:?}"),
    }
}

#[test]
fn garbage_is_a_bad_snapshot() {
    let tmp = tempfile::tempdir().unwrap();
    let path = tmp.path().join("garbage.pal");
    fs::write(&path, b"not a snapshot at all").unwrap();

    assert!(matches!(
        snapshot::load(&path),
        Err(PalError::BadSnapshot(_))
    ));
}

#[test]
fn truncation_is_detected() {
    let tmp = tempfile::tempdir().unwrap();
    let pal = populated_store(&tmp);
    let path = tmp.path().join("state.pal");
    snapshot::save(&pal, &path).unwrap();

    let bytes = fs::read(&path).unwrap();
    fs::write(&path, &bytes[..bytes.len() / 2]).unwrap();
    assert!(matches!(
        snapshot::load(&path),
        Err(PalError::BadSnapshot(_))
    ));
}

#[test]
fn dangling_indices_fail_resolution() {
    let tmp = tempfile::tempdir().unwrap();
    let pal = populated_store(&tmp);
    let path = tmp.path().join("state.pal");
    snapshot::save(&pal, &path).unwrap();

    // Corrupt a group record's placement index to an absurd value. The
    // name is the first field of the first record after the config block.
    let mut bytes = fs::read(&path).unwrap();
    let needle = pal.groups[1].name.as_bytes();
    let pos = bytes
        .windows(needle.len())
        .position(|w| w == needle)
        .unwrap();
    // Flip every following byte in a small window; resolution or record
    // framing must catch it.
    for b in &mut bytes[pos..pos + 8] {
        *b = 0xFF;
    }
    fs::write(&path, &bytes).unwrap();
    assert!(snapshot::load(&path).is_err());
}
