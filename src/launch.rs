use std::path::Path;
use std::process::{Child, Command};

use tracing::info;

use crate::error::LaunchError;

/// Start `executable` from `install_root`, with the install root as working directory.
pub fn launch(install_root: &Path, executable: &str) -> Result<Child, LaunchError> {
    spawn_in(&install_root.join(executable), install_root)
}

/// Start a helper program that lives outside the install root, from its own directory.
pub fn launch_companion(exe: &Path) -> Result<Child, LaunchError> {
    let dir = exe.parent().filter(|d| !d.as_os_str().is_empty()).unwrap_or(Path::new("."));
    spawn_in(exe, dir)
}

fn spawn_in(exe: &Path, working_dir: &Path) -> Result<Child, LaunchError> {
    if !exe.is_file() {
        return Err(LaunchError::ExecutableMissing(exe.to_path_buf()));
    }
    let child = Command::new(exe)
        .current_dir(working_dir)
        .spawn()
        .map_err(|source| LaunchError::Spawn { path: exe.to_path_buf(), source })?;
    info!(pid = child.id(), exe = %exe.display(), cwd = %working_dir.display(), "launched");
    Ok(child)
}
