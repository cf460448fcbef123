//! Desktop background setter.

use crate::error::{ErrorKind, Result};
use exn::ResultExt;
use std::path::Path;
use tokio::process::Command;

/// Set the image at `path` as the desktop background.
pub async fn set(path: &Path) -> Result<()> {
    let mut command = command(path)?;
    let status = command.status().await.or_raise(|| ErrorKind::Wallpaper)?;
    if !status.success() {
        exn::bail!(ErrorKind::Wallpaper);
    }

    // GNOME 42+ keeps a separate background for the dark style. Older
    // releases don't have the key at all.
    #[cfg(target_os = "linux")]
    if !gsettings("picture-uri-dark", path).status().await.is_ok_and(|s| s.success()) {
        tracing::debug!("no dark style background to set");
    }

    tracing::info!(path = %path.display(), "desktop background set");
    Ok(())
}

#[cfg(target_os = "linux")]
fn command(path: &Path) -> Result<Command> {
    Ok(gsettings("picture-uri", path))
}

#[cfg(target_os = "linux")]
fn gsettings(key: &str, path: &Path) -> Command {
    let mut command = Command::new("gsettings");
    command.args(["set", "org.gnome.desktop.background", key]).arg(format!("file://{}", path.display()));
    command
}

#[cfg(target_os = "macos")]
fn command(path: &Path) -> Result<Command> {
    let escaped = path.display().to_string().replace('\\', "\\\\").replace('"', "\\\"");
    let mut command = Command::new("osascript");
    command
        .arg("-e")
        .arg(format!(r#"tell application "System Events" to tell every desktop to set picture to "{escaped}""#));
    Ok(command)
}

#[cfg(not(any(target_os = "linux", target_os = "macos")))]
fn command(_path: &Path) -> Result<Command> {
    exn::bail!(ErrorKind::UnsupportedPlatform)
}
