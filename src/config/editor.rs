use anyhow::{bail, Context, Result};
use log::info;
use std::path::Path;
use subprocess::Exec;

/// Program used to open the config file on this platform.
pub fn editor_program() -> String {
    if cfg!(target_os = "macos") {
        "open".to_string()
    } else if cfg!(windows) {
        "notepad".to_string()
    } else {
        std::env::var("EDITOR")
            .ok()
            .filter(|e| !e.trim().is_empty())
            .unwrap_or_else(|| "vi".to_string())
    }
}

/// Opens `path` in the platform editor and waits for it to exit.
pub fn open(path: &Path) -> Result<()> {
    let program = editor_program();
    info!("Opening {} with {}", path.display(), program);

    let status = Exec::cmd(&program)
        .arg(path)
        .join()
        .context(format!("Failed to launch {}", program))?;

    if !status.success() {
        bail!("{} exited with {:?}", program, status);
    }
    Ok(())
}
