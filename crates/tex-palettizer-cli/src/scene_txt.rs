//! Line-oriented scene description I/O.
//!
//! This is the concrete scene collaborator the CLI ships so the tool runs
//! end to end; the core only ever sees the interface types. Input lines:
//!
//! ```text
//! # comment / blank
//! group NAME
//! texture NAME PATH
//! ref NAME u0 v0 u1 v1 WRAP WRAP
//! ref NAME                         (no explicit UVs, clamp on both axes)
//! ```
//!
//! The rewritten scene re-emits the declarations and replaces each
//! palettized `ref` with a `palette` line carrying the atlas path and the
//! four non-trivial entries of the UV transform.

use std::fs;
use std::path::Path;

use anyhow::Context;
use tex_palettizer_core::prelude::*;

/// Parses one scene file into the core's input form. Texture paths are
/// resolved relative to the scene file's directory.
pub fn read_scene(path: &Path) -> anyhow::Result<SceneInput> {
    let text = fs::read_to_string(path).with_context(|| format!("read scene {}", path.display()))?;
    let dir = path.parent().unwrap_or_else(|| Path::new(""));

    let mut input = SceneInput {
        name: scene_key(path),
        ..Default::default()
    };

    for (lineno, raw) in text.lines().enumerate() {
        let line = match raw.find('#') {
            Some(pos) => &raw[..pos],
            None => raw,
        };
        let words: Vec<&str> = line.split_whitespace().collect();
        if words.is_empty() {
            continue;
        }
        let bad = |msg: &str| {
            anyhow::anyhow!("{}:{}: {}", path.display(), lineno + 1, msg)
        };

        match words[0] {
            "group" => {
                let &[_, name] = words.as_slice() else {
                    return Err(bad("expected: group NAME"));
                };
                input.groups.push(name.to_string());
            }
            "texture" => {
                let &[_, name, tex_path] = words.as_slice() else {
                    return Err(bad("expected: texture NAME PATH"));
                };
                let resolved = dir.join(tex_path).to_string_lossy().replace('\\', "/");
                input.textures.push((name.to_string(), resolved));
            }
            "ref" | "palette" => {
                let name = words.get(1).ok_or_else(|| bad("expected a texture name"))?;
                let (uvs, wrap_u, wrap_v) = if words[0] == "ref" && words.len() > 2 {
                    let &[_, _, u0, v0, u1, v1, wu, wv] = words.as_slice() else {
                        return Err(bad("expected: ref NAME u0 v0 u1 v1 WRAP WRAP"));
                    };
                    let parse = |s: &str| -> anyhow::Result<f64> {
                        s.parse().map_err(|_| bad(&format!("bad number '{s}'")))
                    };
                    let uvs = (
                        TexCoord::new(parse(u0)?, parse(v0)?),
                        TexCoord::new(parse(u1)?, parse(v1)?),
                    );
                    let wrap = |s: &str| -> anyhow::Result<WrapMode> {
                        s.parse()
                            .map_err(|_| bad(&format!("bad wrap mode '{s}'")))
                    };
                    (Some(uvs), wrap(wu)?, wrap(wv)?)
                } else if words[0] == "ref" {
                    (None, WrapMode::Clamp, WrapMode::Clamp)
                } else {
                    return Err(bad(
                        "palette lines are output only; rerun from the source scene",
                    ));
                };
                input.refs.push(RefInput {
                    texture: name.to_string(),
                    uvs,
                    wrap_u,
                    wrap_v,
                });
            }
            other => {
                return Err(bad(&format!("unknown directive '{other}'")));
            }
        }
    }

    Ok(input)
}

/// Writes the rewritten form of a scene the store knows, with palettized
/// references pointing at their atlases.
pub fn write_scene(pal: &Palettizer, sid: SceneId, out_path: &Path) -> anyhow::Result<()> {
    let scene = &pal.scenes[sid.index()];
    let mut out = String::new();

    for gid in &scene.groups {
        out.push_str(&format!("group {}\n", pal.groups[gid.index()].name));
    }

    let mut textures: Vec<TextureId> = scene.refs.iter().map(|r| r.texture).collect();
    textures.sort();
    textures.dedup();
    for tid in &textures {
        let t = &pal.textures[tid.index()];
        out.push_str(&format!("texture {} {}\n", t.name, t.source_path));
    }

    for r in &scene.refs {
        let name = &pal.textures[r.texture.index()].name;
        match &r.emit {
            RefEmit::Palette { atlas, transform } => {
                out.push_str(&format!(
                    "palette {} {} {} {} {} {}\n",
                    name,
                    pal.atlases[atlas.index()].filename,
                    transform.sx,
                    transform.sy,
                    transform.tx,
                    transform.ty,
                ));
            }
            RefEmit::Original => match r.uvs {
                Some((n, x)) => {
                    out.push_str(&format!(
                        "ref {} {} {} {} {} {} {}\n",
                        name,
                        n.u,
                        n.v,
                        x.u,
                        x.v,
                        wrap_token(r.wrap_u),
                        wrap_token(r.wrap_v),
                    ));
                }
                None => out.push_str(&format!("ref {name}\n")),
            },
        }
    }

    if let Some(parent) = out_path.parent() {
        if !parent.as_os_str().is_empty() {
            fs::create_dir_all(parent)
                .with_context(|| format!("create {}", parent.display()))?;
        }
    }
    fs::write(out_path, out).with_context(|| format!("write {}", out_path.display()))
}

fn wrap_token(w: WrapMode) -> &'static str {
    match w {
        WrapMode::Clamp => "clamp",
        WrapMode::Repeat => "repeat",
    }
}

/// The canonical store key for a scene path.
pub fn scene_key(path: &Path) -> String {
    path.to_string_lossy().replace('\\', "/")
}

#[cfg(test)]
mod tests {
    use super::*;

    fn write_scene_text(text: &str) -> (tempfile::TempDir, std::path::PathBuf) {
        let tmp = tempfile::tempdir().unwrap();
        let path = tmp.path().join("level.scn");
        fs::write(&path, text).unwrap();
        (tmp, path)
    }

    #[test]
    fn parses_groups_textures_and_refs() {
        let (tmp, path) = write_scene_text(
            "# a level\n\
             group world\n\
             texture brick maps/brick.png\n\
             ref brick 0 0 2.5 1 repeat clamp\n\
             ref brick\n",
        );
        let input = read_scene(&path).unwrap();
        assert_eq!(input.groups, vec!["world".to_string()]);
        assert_eq!(input.textures.len(), 1);
        assert!(input.textures[0].1.starts_with(&scene_key(tmp.path())));
        assert_eq!(input.refs.len(), 2);

        let r = &input.refs[0];
        assert_eq!(r.wrap_u, WrapMode::Repeat);
        assert_eq!(r.wrap_v, WrapMode::Clamp);
        let (min, max) = r.uvs.unwrap();
        assert_eq!((min.u, min.v, max.u, max.v), (0.0, 0.0, 2.5, 1.0));

        assert!(input.refs[1].uvs.is_none());
    }

    #[test]
    fn rejects_malformed_lines() {
        let (_tmp, path) = write_scene_text("texture lonely\n");
        let err = read_scene(&path).unwrap_err().to_string();
        assert!(err.contains(":1:"), "error should carry the line: {err}");

        let (_tmp, path) = write_scene_text("ref brick 0 0 1 1 sideways clamp\n");
        assert!(read_scene(&path).is_err());

        let (_tmp, path) = write_scene_text("sprocket brick\n");
        assert!(read_scene(&path).is_err());
    }
}
