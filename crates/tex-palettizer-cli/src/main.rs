mod scene_txt;

use std::path::{Path, PathBuf};
use std::process::ExitCode;

use anyhow::Context;
use clap::{ArgAction, Parser};
use tex_palettizer_core::prelude::*;
use tracing::{error, info, warn};
use walkdir::WalkDir;

#[derive(Parser, Debug)]
#[command(
    name = "tex-palettizer",
    about = "Pack scene textures into shared palette atlases, incrementally",
    version,
    author
)]
struct Cli {
    // Input/Output
    /// Rule file mapping texture patterns to attributes and declaring
    /// palette groups
    #[arg(long, required = true, help_heading = "Input/Output")]
    rule_file: PathBuf,
    /// Persistent project snapshot; created if absent
    #[arg(long, default_value = "textures.pal", help_heading = "Input/Output")]
    project_state: PathBuf,
    /// Scene description files or directories to scan (*.scn)
    #[arg(help_heading = "Input/Output")]
    scenes: Vec<PathBuf>,
    /// Directory receiving atlas images
    #[arg(long, default_value = ".", help_heading = "Input/Output")]
    map_dir: String,
    /// Directory receiving rewritten scene files
    #[arg(long, default_value = "out_scenes", help_heading = "Input/Output")]
    scene_out_dir: PathBuf,

    // Packing
    /// Maximum palette page size in pixels
    #[arg(long, num_args = 2, value_names = ["W", "H"], default_values_t = [512, 512], help_heading = "Packing")]
    page_size: Vec<u32>,
    /// Background color for unoccupied atlas pixels
    #[arg(long, num_args = 4, value_names = ["R", "G", "B", "A"], default_values_t = [0, 0, 0, 0], help_heading = "Packing")]
    background: Vec<u8>,
    /// Keep a lone texture on its atlas referenced by its original file
    #[arg(long, overrides_with = "no_omit_solitary", help_heading = "Packing")]
    omit_solitary: bool,
    /// Emit palette references even for lone textures
    #[arg(long, help_heading = "Packing")]
    no_omit_solitary: bool,
    /// Round UV boxes outward to a grid: UNIT FUZZ
    #[arg(long, num_args = 2, value_names = ["UNIT", "FUZZ"], help_heading = "Packing")]
    round_uvs: Option<Vec<f64>>,
    /// Disable UV rounding
    #[arg(long, conflicts_with = "round_uvs", help_heading = "Packing")]
    no_round: bool,
    /// Group assigned to scenes no rule assigns
    #[arg(long, default_value = "main", help_heading = "Packing")]
    default_group: String,

    // Maintenance
    /// Delete empty atlases and drop unreferenced textures
    #[arg(long, help_heading = "Maintenance")]
    aggressively_clean: bool,
    /// Ignore mtime checks; regenerate every atlas (also discards a
    /// corrupt snapshot instead of failing)
    #[arg(long, help_heading = "Maintenance")]
    redo_all: bool,
    /// Naming template for atlas images (%g group, %p page, %i index,
    /// %% literal)
    #[arg(long, default_value = "%g_palette_%p_%i", help_heading = "Maintenance")]
    image_pattern: String,

    // Logging/UX
    /// Show a progress bar while scanning scenes
    #[arg(long, default_value_t = true, action = ArgAction::Set, help_heading = "Logging/UX")]
    progress: bool,
    /// Increase verbosity (-v, -vv)
    #[arg(short, long, action = ArgAction::Count, help_heading = "Logging/UX")]
    verbose: u8,
    /// Quiet mode (overrides verbose)
    #[arg(short, long, default_value_t = false, help_heading = "Logging/UX")]
    quiet: bool,
    /// Print the merged configuration as JSON and exit
    #[arg(long, default_value_t = false, help_heading = "Logging/UX")]
    print_config: bool,
    /// Export run statistics (JSON) to this file
    #[arg(long, help_heading = "Logging/UX")]
    export_stats: Option<PathBuf>,
}

fn main() -> ExitCode {
    let cli = Cli::parse();
    init_tracing(&cli);
    match run(&cli) {
        Ok(code) => code,
        Err(e) => {
            error!("{e:#}");
            // Internal invariant violations are the exit-2 class; every
            // other failure names bad input.
            match e.downcast_ref::<PalError>() {
                Some(err) if !err.is_user_error() => ExitCode::from(2),
                _ => ExitCode::from(1),
            }
        }
    }
}

fn run(cli: &Cli) -> anyhow::Result<ExitCode> {
    let config = build_config(cli)?;

    if cli.print_config {
        println!("{}", serde_json::to_string_pretty(&config)?);
        return Ok(ExitCode::SUCCESS);
    }

    let rules = RuleFile::load(&cli.rule_file)?;

    let scene_paths = gather_scenes(&cli.scenes)?;
    let inputs = read_scenes_with_progress(&scene_paths, cli.progress && !cli.quiet)?;
    info!(count = inputs.len(), "scanned scene files");

    let mut pal = load_state(&cli.project_state, &config)?;
    pal.apply_config(config);

    let summary = pal.run(&rules, &inputs)?;

    for input in &inputs {
        let sid = pal
            .scene_by_name(&input.name)
            .expect("input scene is in the store after a run");
        let file_name = Path::new(&input.name)
            .file_name()
            .map(PathBuf::from)
            .unwrap_or_else(|| PathBuf::from("scene.scn"));
        scene_txt::write_scene(&pal, sid, &cli.scene_out_dir.join(file_name))?;
    }

    snapshot::save(&pal, &cli.project_state)?;
    info!(state = %cli.project_state.display(), "snapshot saved");

    report(&summary);
    if let Some(stats_path) = &cli.export_stats {
        export_stats(&summary, stats_path)?;
    }

    if summary.write_errors > 0 {
        error!(count = summary.write_errors, "atlas writes failed");
        return Ok(ExitCode::from(1));
    }
    Ok(ExitCode::SUCCESS)
}

fn build_config(cli: &Cli) -> anyhow::Result<PackConfig> {
    let mut builder = PackConfig::builder()
        .page_size(cli.page_size[0], cli.page_size[1])
        .background([
            cli.background[0],
            cli.background[1],
            cli.background[2],
            cli.background[3],
        ])
        .omit_solitary(cli.omit_solitary || !cli.no_omit_solitary)
        .aggressively_clean(cli.aggressively_clean)
        .redo_all(cli.redo_all)
        .image_pattern(cli.image_pattern.clone())
        .map_dir(cli.map_dir.clone())
        .default_group(cli.default_group.clone());
    if cli.no_round {
        builder = builder.no_round();
    } else if let Some(pair) = &cli.round_uvs {
        builder = builder.round_uvs(pair[0], pair[1]);
    }
    let config = builder.build();
    config.validate()?;
    Ok(config)
}

fn load_state(path: &Path, config: &PackConfig) -> anyhow::Result<Palettizer> {
    if !path.exists() {
        return Ok(Palettizer::new(config.clone()));
    }
    match snapshot::load(path) {
        Ok(pal) => Ok(pal),
        Err(PalError::BadSnapshot(msg)) if config.redo_all => {
            warn!(%msg, "discarding corrupt snapshot (redo-all)");
            Ok(Palettizer::new(config.clone()))
        }
        Err(e) => Err(e).with_context(|| format!("load snapshot {}", path.display())),
    }
}

fn gather_scenes(paths: &[PathBuf]) -> anyhow::Result<Vec<PathBuf>> {
    let mut list = Vec::new();
    for path in paths {
        if path.is_file() {
            list.push(path.clone());
        } else if path.is_dir() {
            for entry in WalkDir::new(path).sort_by_file_name().into_iter() {
                let entry = entry?;
                let p = entry.path();
                if p.is_file() && p.extension().and_then(|e| e.to_str()) == Some("scn") {
                    list.push(p.to_path_buf());
                }
            }
        } else {
            anyhow::bail!("no such scene file or directory: {}", path.display());
        }
    }
    Ok(list)
}

fn read_scenes_with_progress(paths: &[PathBuf], progress: bool) -> anyhow::Result<Vec<SceneInput>> {
    use indicatif::{ProgressBar, ProgressStyle};
    let bar = if progress && !paths.is_empty() {
        let b = ProgressBar::new(paths.len() as u64);
        b.set_style(
            ProgressStyle::with_template(
                "{spinner:.green} scanning {pos}/{len} [{elapsed_precise}] {wide_msg}",
            )
            .unwrap(),
        );
        Some(b)
    } else {
        None
    };
    let mut list = Vec::with_capacity(paths.len());
    for p in paths {
        if let Some(b) = &bar {
            b.set_message(
                p.file_name()
                    .and_then(|s| s.to_str())
                    .unwrap_or("")
                    .to_string(),
            );
        }
        list.push(scene_txt::read_scene(p)?);
        if let Some(b) = &bar {
            b.inc(1);
        }
    }
    if let Some(b) = &bar {
        b.finish_and_clear();
    }
    Ok(list)
}

fn report(summary: &RunSummary) {
    info!(
        textures = summary.textures,
        placed = summary.placed,
        solitary = summary.solitary,
        omitted = summary.omitted.len(),
        missing_sources = summary.missing_sources,
        atlases_written = summary.atlases_written,
        stale_scenes = summary.stale_scenes.len(),
        "palettization finished"
    );
    for (atlas, utilization) in &summary.utilization {
        info!(atlas = %atlas, utilization = %format!("{:.1}%", utilization * 100.0), "atlas utilization");
    }
    for scene in &summary.stale_scenes {
        warn!(scene = %scene, "scene references a renamed atlas and needs rewriting");
    }
}

fn export_stats(summary: &RunSummary, path: &Path) -> anyhow::Result<()> {
    let value = serde_json::json!({
        "textures": summary.textures,
        "placed": summary.placed,
        "solitary": summary.solitary,
        "omitted": summary.omitted.len(),
        "missing_sources": summary.missing_sources,
        "atlases_written": summary.atlases_written,
        "write_errors": summary.write_errors,
        "utilization": summary.utilization.iter()
            .map(|(name, u)| serde_json::json!({"atlas": name, "utilization": u}))
            .collect::<Vec<_>>(),
    });
    std::fs::write(path, serde_json::to_string_pretty(&value)?)
        .with_context(|| format!("write {}", path.display()))?;
    info!(stats = %path.display(), "stats exported");
    Ok(())
}

/// Console logging. `-q`/`-v` pick the default level; an explicit
/// `RUST_LOG` takes precedence over both.
fn init_tracing(cli: &Cli) {
    use tracing_subscriber::EnvFilter;

    let default_level = match (cli.quiet, cli.verbose) {
        (true, _) => "error",
        (false, 0) => "info",
        (false, 1) => "debug",
        (false, _) => "trace",
    };
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));

    let subscriber = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .compact();
    if subscriber.try_init().is_err() {
        eprintln!("logging already initialized, continuing");
    }
}
