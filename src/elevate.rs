//! Elevated self-invocation: `upkeep __sudo <action> <params...>`.
//!
//! The unprivileged process re-runs its own binary through the platform's
//! elevation mechanism to perform exactly one filesystem operation. The
//! elevated child is caught by `try_handle_elevated` before any normal
//! argument parsing, dispatches through a fixed table, and exits.

use anyhow::{anyhow, Context, Result};
use std::env;
use std::fs;
use std::path::Path;
use std::process::{Command, ExitStatus};

pub const SUDO_ARG: &str = "__sudo";

/// An operation that needs elevated rights, carried across the
/// self-invocation boundary as plain argv strings.
#[derive(Debug, Clone, PartialEq)]
pub enum ElevatedAction {
    /// Move a staged binary to its final home and mark it executable.
    InstallExecutable { source: String, destination: String },
    /// Move a staged binary onto the running executable itself.
    ReplaceExecutable { new_executable: String },
}

impl ElevatedAction {
    pub fn name(&self) -> &'static str {
        match self {
            ElevatedAction::InstallExecutable { .. } => "installExecutable",
            ElevatedAction::ReplaceExecutable { .. } => "replaceExecutable",
        }
    }

    pub fn params(&self) -> Vec<String> {
        match self {
            ElevatedAction::InstallExecutable {
                source,
                destination,
            } => vec![source.clone(), destination.clone()],
            ElevatedAction::ReplaceExecutable { new_executable } => vec![new_executable.clone()],
        }
    }
}

type Handler = fn(&[String]) -> Result<()>;

/// Dispatch table for elevated sub-invocations. Static so the full set of
/// privileged operations is visible in one place.
const ACTIONS: &[(&str, Handler)] = &[
    ("installExecutable", handle_install_executable),
    ("replaceExecutable", handle_replace_executable),
];

/// Catches elevated self-invocations. Must run before any other argument
/// handling so a `__sudo` launch can never fall through to normal command
/// parsing. Returns quietly when the marker is absent; otherwise the
/// process exits here, reporting diagnostics on stdout per the protocol.
pub fn try_handle_elevated() {
    let args: Vec<String> = env::args().collect();
    if args.len() < 3 || args[1] != SUDO_ARG {
        return;
    }

    match dispatch(&args[2], &args[3..]) {
        Ok(()) => std::process::exit(0),
        Err(err) => {
            println!("Error handling sudo action");
            println!("{:#}", err);
            std::process::exit(1);
        }
    }
}

fn dispatch(action: &str, params: &[String]) -> Result<()> {
    let handler = ACTIONS
        .iter()
        .find(|(name, _)| *name == action)
        .map(|(_, handler)| handler)
        .ok_or_else(|| anyhow!("unknown sudo action '{}'", action))?;

    handler(params)
}

/// Re-runs the current executable with elevated rights to perform one
/// action, blocking until the child exits. The interactive credential
/// prompt is the platform elevator's business.
pub fn call_elevated(action: &ElevatedAction) -> Result<()> {
    let this_exe = env::current_exe().context("Could not resolve current executable")?;

    let mut args = vec![SUDO_ARG.to_string(), action.name().to_string()];
    args.extend(action.params());

    tracing::info!("Requesting elevated privileges for {}", action.name());

    let status = platform_elevator().elevate(&this_exe, &args)?;
    if !status.success() {
        return Err(anyhow!(
            "Elevated {} action failed with status {}",
            action.name(),
            status
        ));
    }

    Ok(())
}

fn handle_install_executable(params: &[String]) -> Result<()> {
    if params.len() < 2 {
        return Err(anyhow!("not enough parameters for installExecutable"));
    }

    let source = &params[0];
    let destination = &params[1];

    if source.is_empty() {
        return Err(anyhow!("missing value for source path"));
    }
    if destination.is_empty() {
        return Err(anyhow!("missing value for destination path"));
    }

    fs::rename(source, destination)
        .with_context(|| format!("Could not move {} to {}", source, destination))?;
    set_executable(Path::new(destination))?;

    Ok(())
}

fn handle_replace_executable(params: &[String]) -> Result<()> {
    if params.is_empty() {
        return Err(anyhow!("not enough parameters for replaceExecutable"));
    }

    let new_executable = &params[0];
    if new_executable.is_empty() {
        return Err(anyhow!("missing value for new executable path"));
    }

    // The destination is always this process's own binary, resolved here
    // rather than taken from argv, so an elevated invocation cannot be
    // pointed at an arbitrary file.
    let this_exe = env::current_exe().context("Could not resolve current executable")?;
    fs::rename(new_executable, &this_exe).with_context(|| {
        format!(
            "Could not move {} onto {}",
            new_executable,
            this_exe.display()
        )
    })?;

    Ok(())
}

fn set_executable(path: &Path) -> Result<()> {
    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        let mut perms = fs::metadata(path)?.permissions();
        perms.set_mode(0o755);
        fs::set_permissions(path, perms)?;
    }
    #[cfg(not(unix))]
    {
        let _ = path;
    }

    Ok(())
}

/// OS mechanism for launching a process with administrator rights.
trait Elevator {
    fn elevate(&self, exe: &Path, args: &[String]) -> Result<ExitStatus>;
}

fn platform_elevator() -> Box<dyn Elevator> {
    #[cfg(any(target_os = "linux", target_os = "android"))]
    {
        Box::new(SudoElevator)
    }
    #[cfg(target_os = "macos")]
    {
        Box::new(OsascriptElevator)
    }
    #[cfg(target_os = "windows")]
    {
        Box::new(RunAsElevator)
    }
    #[cfg(not(any(
        target_os = "linux",
        target_os = "android",
        target_os = "macos",
        target_os = "windows"
    )))]
    {
        Box::new(UnsupportedElevator)
    }
}

/// Drives `sudo`, which prompts on the controlling terminal.
#[cfg(any(target_os = "linux", target_os = "android"))]
struct SudoElevator;

#[cfg(any(target_os = "linux", target_os = "android"))]
impl Elevator for SudoElevator {
    fn elevate(&self, exe: &Path, args: &[String]) -> Result<ExitStatus> {
        Command::new("sudo")
            .arg(exe)
            .args(args)
            .status()
            .context("Could not launch sudo")
    }
}

/// Uses the macOS administrator-privileges prompt via osascript.
#[cfg(target_os = "macos")]
struct OsascriptElevator;

#[cfg(target_os = "macos")]
impl Elevator for OsascriptElevator {
    fn elevate(&self, exe: &Path, args: &[String]) -> Result<ExitStatus> {
        let mut shell_command = shell_quote(&exe.to_string_lossy());
        for arg in args {
            shell_command.push(' ');
            shell_command.push_str(&shell_quote(arg));
        }

        // Escape for embedding in an AppleScript string literal
        let escaped = shell_command.replace('\\', "\\\\").replace('"', "\\\"");
        let script = format!(
            r#"do shell script "{}" with administrator privileges"#,
            escaped
        );

        Command::new("osascript")
            .arg("-e")
            .arg(&script)
            .status()
            .context("Could not launch osascript")
    }
}

#[cfg(target_os = "macos")]
fn shell_quote(value: &str) -> String {
    format!("'{}'", value.replace('\'', r"'\''"))
}

/// Elevates through UAC with PowerShell's RunAs verb, waiting on the child
/// so its exit code can be propagated.
#[cfg(target_os = "windows")]
struct RunAsElevator;

#[cfg(target_os = "windows")]
impl Elevator for RunAsElevator {
    fn elevate(&self, exe: &Path, args: &[String]) -> Result<ExitStatus> {
        let arg_list = args
            .iter()
            .map(|arg| format!("'{}'", arg.replace('\'', "''")))
            .collect::<Vec<_>>()
            .join(",");
        let command = format!(
            "$p = Start-Process -FilePath '{}' -ArgumentList {} -Verb RunAs -Wait -PassThru; exit $p.ExitCode",
            exe.display(),
            arg_list
        );

        Command::new("powershell")
            .args(["-NoProfile", "-Command", &command])
            .status()
            .context("Could not launch powershell for elevation")
    }
}

/// Platforms without a wired-up elevation mechanism.
#[cfg(not(any(
    target_os = "linux",
    target_os = "android",
    target_os = "macos",
    target_os = "windows"
)))]
struct UnsupportedElevator;

#[cfg(not(any(
    target_os = "linux",
    target_os = "android",
    target_os = "macos",
    target_os = "windows"
)))]
impl Elevator for UnsupportedElevator {
    fn elevate(&self, _exe: &Path, _args: &[String]) -> Result<ExitStatus> {
        Err(anyhow!("privilege escalation not supported on this platform"))
    }
}
