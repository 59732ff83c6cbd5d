use anyhow::{Result, anyhow};
use indicatif::{ProgressBar, ProgressStyle};
use std::path::{Path, PathBuf};

use crate::registry;
use colored::*;
use comfy_table::{Attribute, Cell, ContentArrangement, Table, presets::UTF8_FULL};
use switchyard::error::PathFailure;
use switchyard::storage::check_install_root;
use switchyard::verify::{Drift, detect_active, inspect};
use switchyard::{NO_OVERRIDE, Settings, SwitchEngine, SwitchError, launch};

/// Loaded settings plus where they came from.
struct Workspace {
    path: PathBuf,
    settings: Settings,
}

impl Workspace {
    fn load(config: Option<&Path>) -> Result<Self> {
        let path = registry::settings_path(config)?;
        let settings = registry::load_settings(&path)?;
        Ok(Self { path, settings })
    }

    fn dir(&self) -> PathBuf {
        registry::settings_dir(&self.path)
    }

    fn engine(&self) -> Result<(SwitchEngine, String)> {
        let cfg = self.settings.engine_config(&self.dir()).map_err(|e| {
            anyhow!("{} (run `switchyard init <GAME_PATH>` first)", e)
        })?;
        let executable = cfg.executable.clone();
        Ok((SwitchEngine::new(cfg)?, executable))
    }

    fn save(&self) -> Result<()> {
        registry::save_settings(&self.path, &self.settings)
    }
}

pub fn do_init(
    config: Option<&Path>,
    game_path: PathBuf,
    backup_root: Option<PathBuf>,
    payload_root: Option<PathBuf>,
    maa_path: Option<PathBuf>,
) -> Result<()> {
    check_install_root(&game_path)?;
    if let Some(maa) = &maa_path {
        if !maa.is_file() {
            return Err(anyhow!("MAA executable not found at {}", maa.display()));
        }
    }
    let game_path = game_path.canonicalize()?;
    let maa_path = maa_path.map(|p| p.canonicalize()).transpose()?;

    let mut ws = Workspace::load(config)?;
    ws.settings.game_path = Some(game_path.clone());
    if backup_root.is_some() {
        ws.settings.backup_root = backup_root;
    }
    if payload_root.is_some() {
        ws.settings.payload_root = payload_root;
    }
    if maa_path.is_some() {
        ws.settings.maa_path = maa_path;
    }
    ws.save()?;

    println!(
        "{} {}",
        "✔".green().bold(),
        format!("Install root set to {}", game_path.display()).green()
    );
    if let Some(maa) = ws.settings.companion() {
        println!("{} {}", "✔".green().bold(), format!("MAA path set to {}", maa.display()).green());
    }
    println!(
        "{} {}",
        "i".yellow().bold(),
        format!("Settings saved to {}", ws.path.display()).yellow()
    );
    Ok(())
}

pub fn do_switch(
    config: Option<&Path>,
    variant: &str,
    snapshot: Option<String>,
    launch_after: bool,
    yes: bool,
) -> Result<()> {
    let mut ws = Workspace::load(config)?;
    let (engine, executable) = ws.engine()?;
    engine.variants().resolve(variant)?;

    let snapshot = snapshot.filter(|s| !s.is_empty() && s != NO_OVERRIDE);
    if !yes {
        let mut summary = format!("Switch install to '{}'", variant);
        if let Some(name) = &snapshot {
            summary.push_str(&format!(" and restore snapshot '{}'", name));
        }
        summary.push_str(". Files in the game directory will be overwritten. Continue? [y/N] ");
        if !prompt_confirm(&summary)? {
            println!("Aborted.");
            return Ok(());
        }
    }

    let bar = create_progress_bar("Switching");
    let engine = engine.with_progress(bar.clone());
    let result = match engine.apply_variant(variant, snapshot.as_deref()) {
        Ok(result) => result,
        Err(err) => {
            bar.abandon_with_message("Switch failed");
            if let SwitchError::PayloadMissing { cleanup, .. } | SwitchError::Overlay { cleanup, .. } = &err {
                print_warnings(cleanup);
            }
            return Err(err.into());
        }
    };
    bar.finish_with_message(format!("Copied {} files", result.files_copied));

    if !result.stop.denied.is_empty() {
        eprintln!(
            "{} {}: {}",
            "!".yellow().bold(),
            "Warning".yellow(),
            format!("could not stop running process(es) {:?}", result.stop.denied)
        );
    }
    print_warnings(&result.errors);

    ws.settings.last_variant = result.applied_variant.clone();
    ws.save()?;

    println!(
        "{} {}",
        "✔".green().bold(),
        format!("Switched to '{}'", result.applied_variant).green()
    );
    if let Some(name) = &result.snapshot_applied {
        println!("{} {}", "✔".green().bold(), format!("Restored snapshot '{}'", name).green());
    }

    if launch_after {
        let child = launch::launch(engine.install_root(), &executable)?;
        println!(
            "{} {}",
            "✔".green().bold(),
            format!("Started {} (pid {})", executable, child.id()).green()
        );
    }
    Ok(())
}

pub fn do_snapshot_save(config: Option<&Path>, name: &str, variant: Option<String>, yes: bool) -> Result<()> {
    let ws = Workspace::load(config)?;
    let (engine, _) = ws.engine()?;
    let variant = variant.unwrap_or_else(|| ws.settings.last_variant.clone());
    engine.variants().resolve(&variant)?;

    let store = engine.snapshots();
    if store.exists(name)
        && !yes
        && !prompt_confirm(&format!("Snapshot '{}' already exists. Overwrite? [y/N] ", name))?
    {
        println!("Aborted.");
        return Ok(());
    }

    let bar = create_progress_bar("Saving snapshot");
    bar.set_message(name.to_string());
    let snap = store.save(name, &variant, engine.install_root(), engine.session_dirs())?;
    bar.finish_with_message("Snapshot saved");

    if snap.subdirectories.is_empty() {
        println!(
            "{} {}",
            "i".yellow().bold(),
            "No session data found in the install directory; saved an empty snapshot".yellow()
        );
    }
    println!(
        "{} {}",
        "✔".green().bold(),
        format!("Snapshot '{}' saved for '{}'", name, variant).green()
    );
    Ok(())
}

pub fn do_snapshot_list(config: Option<&Path>, variant: Option<String>) -> Result<()> {
    let ws = Workspace::load(config)?;
    let (engine, _) = ws.engine()?;
    let variant = variant.unwrap_or_else(|| ws.settings.last_variant.clone());

    let mut snaps: Vec<_> = engine.snapshots().list(&variant)?.collect();
    if snaps.is_empty() {
        println!(
            "{} {}",
            "i".yellow().bold(),
            format!("No snapshots found for '{}'", variant).yellow()
        );
        return Ok(());
    }
    snaps.sort_by(|a, b| a.name.cmp(&b.name));

    let mut table = Table::new();
    table
        .load_preset(UTF8_FULL)
        .set_content_arrangement(ContentArrangement::Dynamic)
        .set_header(vec![
            Cell::new("Name").add_attribute(Attribute::Bold),
            Cell::new("Variant").add_attribute(Attribute::Bold),
            Cell::new("Saved").add_attribute(Attribute::Bold),
            Cell::new("Contents").add_attribute(Attribute::Bold),
        ]);

    for s in &snaps {
        let saved = s
            .meta
            .saved_at
            .map(|ts| ts.format("%Y-%m-%d %H:%M:%S").to_string())
            .unwrap_or_else(|| "-".to_string());
        let contents = s
            .subdirectories
            .iter()
            .map(|p| p.display().to_string())
            .collect::<Vec<_>>()
            .join(", ");
        table.add_row(vec![
            Cell::new(&s.name),
            Cell::new(s.variant.as_deref().unwrap_or("any")),
            Cell::new(saved),
            Cell::new(contents),
        ]);
    }

    println!("{}", table);
    Ok(())
}

pub fn do_snapshot_delete(config: Option<&Path>, name: &str, yes: bool) -> Result<()> {
    let ws = Workspace::load(config)?;
    let (engine, _) = ws.engine()?;
    let store = engine.snapshots();

    if !store.exists(name) {
        println!("{} {}", "i".yellow().bold(), format!("No snapshot named '{}'", name).yellow());
        store.delete(name)?;
        return Ok(());
    }
    if !yes && !prompt_confirm(&format!("Delete snapshot '{}'? This cannot be undone. [y/N] ", name))? {
        println!("Aborted.");
        return Ok(());
    }

    store.delete(name)?;
    println!(
        "{} {}",
        "✔".green().bold(),
        format!("Deleted snapshot '{}'", name).green()
    );
    Ok(())
}

pub fn do_reset(config: Option<&Path>, yes: bool) -> Result<()> {
    let ws = Workspace::load(config)?;
    let (engine, _) = ws.engine()?;
    let variant = ws.settings.last_variant.clone();

    if !yes {
        println!(
            "{} {}",
            "!".yellow().bold(),
            "Resetting stops the game, removes saved login state and re-applies the payload. You will need to log in again."
                .yellow()
        );
        if !prompt_confirm("Reset session data? [y/N] ")? {
            println!("Aborted.");
            return Ok(());
        }
    }

    let bar = create_progress_bar("Resetting");
    let engine = engine.with_progress(bar.clone());
    let result = engine.reset_session(&variant)?;
    bar.finish_with_message("Reset complete");
    print_warnings(&result.errors);

    println!(
        "{} {}",
        "✔".green().bold(),
        format!("Session data cleared for '{}'", variant).green()
    );
    Ok(())
}

pub fn do_maa(config: Option<&Path>) -> Result<()> {
    let mut ws = Workspace::load(config)?;

    let exe = match ws.settings.companion().filter(|p| p.is_file()) {
        Some(p) => p.to_path_buf(),
        None => {
            println!(
                "{} {}",
                "!".yellow().bold(),
                "MAA is not configured (or its executable has moved).".yellow()
            );
            if !prompt_confirm("Configure the MAA executable path now? [y/N] ")? {
                println!(
                    "{} {}",
                    "i".yellow().bold(),
                    "You can also set it with `switchyard init <GAME_PATH> --maa-path <MAA.exe>`".yellow()
                );
                return Ok(());
            }
            let entered = prompt_line("Path to MAA.exe: ")?;
            let exe = PathBuf::from(entered.trim().trim_matches('"'));
            if !exe.is_file() {
                return Err(anyhow!("MAA executable not found at {}", exe.display()));
            }
            ws.settings.maa_path = Some(exe.clone());
            ws.save()?;
            println!(
                "{} {}",
                "✔".green().bold(),
                format!("MAA path saved to {}", ws.path.display()).green()
            );
            exe
        }
    };

    let child = launch::launch_companion(&exe)?;
    println!(
        "{} {}",
        "✔".green().bold(),
        format!("Started MAA (pid {})", child.id()).green()
    );
    Ok(())
}

pub fn do_status(config: Option<&Path>) -> Result<()> {
    let ws = Workspace::load(config)?;
    let (engine, _) = ws.engine()?;
    check_install_root(engine.install_root())?;

    let mut table = Table::new();
    table
        .load_preset(UTF8_FULL)
        .set_content_arrangement(ContentArrangement::Dynamic)
        .set_header(vec![
            Cell::new("Variant").add_attribute(Attribute::Bold),
            Cell::new("Payload").add_attribute(Attribute::Bold),
            Cell::new("Foreign files").add_attribute(Attribute::Bold),
            Cell::new("Out of date").add_attribute(Attribute::Bold),
        ]);

    for id in engine.variants().ids() {
        let status = inspect(engine.variants(), engine.install_root(), id)?;
        let foreign = status
            .foreign
            .iter()
            .map(|p| p.display().to_string())
            .collect::<Vec<_>>()
            .join(", ");
        let missing = status.drift.iter().filter(|(_, d)| *d == Drift::Missing).count();
        let modified = status.drift.len() - missing;
        table.add_row(vec![
            Cell::new(&status.id),
            Cell::new(if status.payload_present { "present" } else { "missing" }),
            Cell::new(if foreign.is_empty() { "-".to_string() } else { foreign }),
            Cell::new(format!("{} missing, {} changed", missing, modified)),
        ]);
    }
    println!("{}", table);

    match detect_active(engine.variants(), engine.install_root())? {
        Some(id) => println!("{} {}", "✔".green().bold(), format!("Install matches '{}'", id).green()),
        None => println!(
            "{} {}",
            "i".yellow().bold(),
            "Install does not match any variant cleanly; run `switchyard switch <variant>`".yellow()
        ),
    }
    Ok(())
}

pub fn do_variants(config: Option<&Path>) -> Result<()> {
    let ws = Workspace::load(config)?;
    let (engine, _) = ws.engine()?;

    let mut table = Table::new();
    table
        .load_preset(UTF8_FULL)
        .set_header(vec!["Variant", "Payload", "Exclusive paths", "Last used"]);
    for v in engine.variants().iter() {
        let exclusive = v
            .exclusive_paths
            .iter()
            .map(|p| p.display().to_string())
            .collect::<Vec<_>>()
            .join(", ");
        table.add_row(vec![
            v.id.clone(),
            v.overlay_path.display().to_string(),
            exclusive,
            if v.id == ws.settings.last_variant { "yes".to_string() } else { String::new() },
        ]);
    }
    println!("{}", table);
    Ok(())
}

pub fn do_version() {
    println!("{} {}", "switchyard".bold(), env!("CARGO_PKG_VERSION").cyan());
}

fn print_warnings(errors: &[PathFailure]) {
    for err in errors {
        eprintln!("{} {}: {}", "!".yellow().bold(), "Warning".yellow(), err);
    }
}

fn create_progress_bar(prefix: &str) -> ProgressBar {
    let bar = ProgressBar::new_spinner();
    bar.set_style(
        ProgressStyle::with_template("{spinner} {msg}")
            .unwrap_or_else(|_| ProgressStyle::default_spinner())
            .tick_chars("⠁⠂⠄⡀⢀⠠⠐⠈ "),
    );
    bar.set_message(prefix.to_string());
    bar.enable_steady_tick(std::time::Duration::from_millis(80));
    bar
}

fn prompt_confirm(message: &str) -> Result<bool> {
    let ans = prompt_line(message)?.trim().to_lowercase();
    Ok(ans == "y" || ans == "yes")
}

fn prompt_line(message: &str) -> Result<String> {
    use std::io::{self, Write};
    print!("{} {}", "?".cyan().bold(), message.cyan());
    io::stdout().flush()?;
    let mut input = String::new();
    io::stdin().read_line(&mut input)?;
    Ok(input)
}
