//! Launching agent CLIs through the user's login shell.
//!
//! Agent CLIs are usually installed through npm, Homebrew or a version
//! manager, so they are only on PATH after the user's shell profile has run.
//! On Unix every agent is started as `<shell> -l -c '<binary> <args...>'`.
//! Shells that do not understand `-l -c` (fish, nushell, ...) are swapped for
//! bash or sh.

use std::path::Path;
use std::process::Command;

use crate::error::TransportError;

const NON_POSIX_SHELLS: &[&str] = &["fish", "nu", "nushell", "elvish", "xonsh", "ion"];

/// Put the binary's own directory in front of PATH, so a CLI installed next to
/// its runtime (node, bun) finds it even when the profile does not.
fn prepend_binary_dir(cmd: &mut Command, binary_path: &str) {
    if !binary_path.contains('/') {
        return;
    }
    let Some(dir) = Path::new(binary_path).parent().and_then(|d| d.to_str()) else {
        return;
    };
    let path = match std::env::var("PATH") {
        Ok(existing) if !existing.is_empty() => format!("{dir}:{existing}"),
        _ => dir.to_string(),
    };
    cmd.env("PATH", path);
}

/// Build the command that runs `binary_path args...` in a login shell.
///
/// `shell_prefix` overrides the shell invocation (e.g. `/bin/zsh -l -c`); the
/// quoted command line is appended as its last argument.
#[cfg(unix)]
pub fn login_shell_command(
    binary_path: &str,
    args: &[String],
    working_dir: Option<&str>,
    shell_prefix: Option<&str>,
) -> Result<Command, TransportError> {
    let prefix = shell_prefix_or_default(shell_prefix);
    let mut parts = prefix.split_whitespace();
    let program = parts
        .next()
        .ok_or_else(|| TransportError::InvalidCommand("empty shell prefix".to_string()))?;

    let quoted = std::iter::once(binary_path)
        .chain(args.iter().map(String::as_str))
        .map(|word| {
            shlex::try_quote(word)
                .map(|q| q.into_owned())
                .map_err(|_| TransportError::InvalidCommand(format!("cannot quote {word:?}")))
        })
        .collect::<Result<Vec<_>, _>>()?
        .join(" ");

    let mut cmd = Command::new(program);
    cmd.args(parts).arg(quoted);
    if let Some(dir) = working_dir {
        cmd.current_dir(dir);
    }
    prepend_binary_dir(&mut cmd, binary_path);
    Ok(cmd)
}

#[cfg(unix)]
fn shell_prefix_or_default(custom: Option<&str>) -> String {
    if let Some(prefix) = custom.filter(|p| !p.trim().is_empty()) {
        return prefix.to_string();
    }

    let shell = std::env::var("SHELL").unwrap_or_else(|_| "/bin/sh".to_string());
    let name = Path::new(&shell)
        .file_name()
        .and_then(|n| n.to_str())
        .unwrap_or_default();

    if NON_POSIX_SHELLS.contains(&name) {
        let fallback = if Path::new("/bin/bash").exists() {
            "/bin/bash"
        } else {
            "/bin/sh"
        };
        return format!("{fallback} -l -c");
    }
    format!("{shell} -l -c")
}

/// No login shell on Windows; the binary is started directly.
#[cfg(windows)]
pub fn login_shell_command(
    binary_path: &str,
    args: &[String],
    working_dir: Option<&str>,
    _shell_prefix: Option<&str>,
) -> Result<Command, TransportError> {
    let mut cmd = Command::new(binary_path);
    cmd.args(args);
    if let Some(dir) = working_dir {
        cmd.current_dir(dir);
    }
    prepend_binary_dir(&mut cmd, binary_path);
    Ok(cmd)
}
