//! Host command execution
//!
//! Every phase talks to the host through [`CommandExecutor`] so the pipeline can
//! be exercised against a simulated host in tests.

use anyhow::{Context, Result};
use std::process::{Command, Output, Stdio};

/// Local command execution helpers
pub mod local {
    use super::*;

    pub fn execute(program: &str, args: &[&str]) -> Result<Output> {
        let mut cmd = Command::new(program);
        cmd.args(args);
        cmd.stdout(Stdio::piped());
        cmd.stderr(Stdio::piped());
        cmd.stdin(Stdio::null());
        cmd.output()
            .with_context(|| format!("Failed to execute command: {}", program))
    }

    pub fn check_command_exists(command: &str) -> bool {
        which::which(command).is_ok()
    }

    pub fn read_file(path: impl AsRef<std::path::Path>) -> Result<String> {
        let path_ref = path.as_ref();
        std::fs::read_to_string(path_ref)
            .with_context(|| format!("Failed to read file: {}", path_ref.display()))
    }

    #[cfg(unix)]
    pub fn set_permissions(path: impl AsRef<std::path::Path>, mode: u32) -> Result<()> {
        use std::os::unix::fs::PermissionsExt;
        let path_ref = path.as_ref();
        std::fs::set_permissions(path_ref, std::fs::Permissions::from_mode(mode))
            .with_context(|| format!("Failed to set permissions for: {}", path_ref.display()))
    }
}

/// Capability interface over the host being provisioned
pub trait CommandExecutor {
    /// Run a program with arguments (no shell) and capture its output
    fn execute_simple(&self, program: &str, args: &[&str]) -> Result<Output>;

    /// Check if a command is on PATH
    fn check_command_exists(&self, command: &str) -> Result<bool>;

    /// Read a file
    fn read_file(&self, path: &str) -> Result<String>;

    /// Write a file, replacing any previous content
    fn write_file(&self, path: &str, content: &[u8]) -> Result<()>;

    /// Install `content` at `path` with `mode` by writing a sibling file and
    /// renaming it into place. Running executables at `path` keep their old inode.
    fn replace_file(&self, path: &str, content: &[u8], mode: u32) -> Result<()>;

    /// Create directory recursively
    fn mkdir_p(&self, path: &str) -> Result<()>;

    /// Check if a path exists
    fn file_exists(&self, path: &str) -> Result<bool>;

    /// Set permission bits on a path
    fn set_mode(&self, path: &str, mode: u32) -> Result<()>;

    /// Name of the account the pipeline runs as
    fn get_username(&self) -> Result<String>;
}

/// Executor for the machine kubestrap runs on
#[derive(Debug, Default, Clone, Copy)]
pub struct LocalExecutor;

impl CommandExecutor for LocalExecutor {
    fn execute_simple(&self, program: &str, args: &[&str]) -> Result<Output> {
        tracing::debug!("$ {} {}", program, args.join(" "));
        local::execute(program, args)
    }

    fn check_command_exists(&self, command: &str) -> Result<bool> {
        Ok(local::check_command_exists(command))
    }

    fn read_file(&self, path: &str) -> Result<String> {
        local::read_file(path)
    }

    fn write_file(&self, path: &str, content: &[u8]) -> Result<()> {
        std::fs::write(path, content).with_context(|| format!("Failed to write file: {}", path))
    }

    fn replace_file(&self, path: &str, content: &[u8], mode: u32) -> Result<()> {
        let staged = format!("{}.kubestrap-new", path);
        let result = self
            .write_file(&staged, content)
            .and_then(|_| self.set_mode(&staged, mode))
            .and_then(|_| {
                std::fs::rename(&staged, path)
                    .with_context(|| format!("Failed to move {} into place", path))
            });
        if result.is_err() {
            let _ = std::fs::remove_file(&staged);
        }
        result
    }

    fn mkdir_p(&self, path: &str) -> Result<()> {
        std::fs::create_dir_all(path)
            .with_context(|| format!("Failed to create directory: {}", path))
    }

    fn file_exists(&self, path: &str) -> Result<bool> {
        Ok(std::path::Path::new(path).exists())
    }

    fn set_mode(&self, path: &str, mode: u32) -> Result<()> {
        local::set_permissions(path, mode)
    }

    fn get_username(&self) -> Result<String> {
        Ok(whoami::username())
    }
}

/// Trimmed stdout of a finished command
pub fn stdout_text(output: &Output) -> String {
    String::from_utf8_lossy(&output.stdout).trim().to_string()
}

/// Stdout followed by stderr, for log files and error messages
pub fn combined_output(output: &Output) -> String {
    let mut text = String::from_utf8_lossy(&output.stdout).to_string();
    let stderr = String::from_utf8_lossy(&output.stderr);
    if !stderr.trim().is_empty() {
        if !text.is_empty() && !text.ends_with('\n') {
            text.push('\n');
        }
        text.push_str(&stderr);
    }
    text
}

/// Run a command and fail when it exits non-zero
pub fn run_checked(exec: &dyn CommandExecutor, program: &str, args: &[&str]) -> Result<Output> {
    let output = exec.execute_simple(program, args)?;
    if !output.status.success() {
        anyhow::bail!(
            "'{} {}' exited with code {}: {}",
            program,
            args.join(" "),
            output.status.code().unwrap_or(-1),
            String::from_utf8_lossy(&output.stderr).trim()
        );
    }
    Ok(output)
}

/// Run a command whose failure is tolerable; returns whether it succeeded
pub fn run_best_effort(exec: &dyn CommandExecutor, program: &str, args: &[&str]) -> bool {
    match run_checked(exec, program, args) {
        Ok(_) => true,
        Err(e) => {
            tracing::debug!("{:#}", e);
            false
        }
    }
}

/// Package manager on the host
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PackageManager {
    Apt,
    Yum,
    Dnf,
    Unknown,
}

impl PackageManager {
    /// Detect the package manager available on the system
    pub fn detect(exec: &dyn CommandExecutor) -> Result<Self> {
        if exec.check_command_exists("apt-get")? {
            Ok(PackageManager::Apt)
        } else if exec.check_command_exists("dnf")? {
            Ok(PackageManager::Dnf)
        } else if exec.check_command_exists("yum")? {
            Ok(PackageManager::Yum)
        } else {
            Ok(PackageManager::Unknown)
        }
    }

    pub fn display_name(&self) -> &'static str {
        match self {
            PackageManager::Apt => "apt",
            PackageManager::Yum => "yum",
            PackageManager::Dnf => "dnf",
            PackageManager::Unknown => "unknown",
        }
    }

    /// Only the Debian family is supported
    pub fn is_supported(&self) -> bool {
        matches!(self, PackageManager::Apt)
    }

    /// Refresh package indexes
    pub fn update(&self, exec: &dyn CommandExecutor) -> Result<()> {
        match self {
            PackageManager::Apt => {
                run_checked(exec, "apt-get", &["update", "-q"])?;
            }
            other => anyhow::bail!("{} is not supported", other.display_name()),
        }
        Ok(())
    }

    /// Install packages (`name` or `name=version` specs)
    pub fn install_packages(&self, exec: &dyn CommandExecutor, packages: &[&str]) -> Result<()> {
        match self {
            PackageManager::Apt => {
                let mut args = vec![
                    "install",
                    "-y",
                    "-q",
                    "--allow-downgrades",
                    "--allow-change-held-packages",
                ];
                args.extend(packages.iter().copied());
                run_checked(exec, "apt-get", &args)?;
            }
            other => anyhow::bail!(
                "{} is not supported. Please install {} manually.",
                other.display_name(),
                packages.join(" ")
            ),
        }
        Ok(())
    }

    /// Remove packages if present. Missing packages are not an error.
    pub fn remove_packages(&self, exec: &dyn CommandExecutor, packages: &[&str]) -> Result<()> {
        if let PackageManager::Apt = self {
            let mut args = vec!["remove", "-y", "-q"];
            args.extend(packages.iter().copied());
            // apt-get exits non-zero for unknown packages; nothing to remove then
            let _ = exec.execute_simple("apt-get", &args)?;
        }
        Ok(())
    }

    /// Protect packages from incidental upgrades
    pub fn hold(&self, exec: &dyn CommandExecutor, packages: &[&str]) -> Result<()> {
        match self {
            PackageManager::Apt => {
                let mut args = vec!["hold"];
                args.extend(packages.iter().copied());
                run_checked(exec, "apt-mark", &args)?;
            }
            other => anyhow::bail!("{} does not support holds", other.display_name()),
        }
        Ok(())
    }

    pub fn unhold(&self, exec: &dyn CommandExecutor, packages: &[&str]) -> Result<()> {
        if let PackageManager::Apt = self {
            let mut args = vec!["unhold"];
            args.extend(packages.iter().copied());
            run_checked(exec, "apt-mark", &args)?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::utils::testing::FakeHost;

    #[test]
    fn test_detect_package_manager() {
        let host = FakeHost::new().with_command("apt-get");
        assert_eq!(PackageManager::detect(&host).unwrap(), PackageManager::Apt);

        let host = FakeHost::new().with_command("dnf");
        assert_eq!(PackageManager::detect(&host).unwrap(), PackageManager::Dnf);
        assert!(!PackageManager::Dnf.is_supported());

        let host = FakeHost::new();
        assert_eq!(PackageManager::detect(&host).unwrap(), PackageManager::Unknown);
    }

    #[test]
    fn test_run_checked_reports_failure() {
        let host = FakeHost::new().respond("swapoff -a", 1, "", "swapoff: not permitted");
        let err = run_checked(&host, "swapoff", &["-a"]).unwrap_err();
        assert!(format!("{:#}", err).contains("not permitted"));
        assert!(!run_best_effort(&host, "swapoff", &["-a"]));
    }

    #[test]
    fn test_local_executor_file_roundtrip() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("file.txt");
        let path_str = path.to_str().unwrap();
        let exec = LocalExecutor;

        exec.mkdir_p(dir.path().join("nested").to_str().unwrap())
            .unwrap();
        exec.write_file(path_str, b"hello").unwrap();
        assert!(exec.file_exists(path_str).unwrap());
        assert_eq!(exec.read_file(path_str).unwrap(), "hello");

        exec.set_mode(path_str, 0o600).unwrap();
        use std::os::unix::fs::PermissionsExt;
        let mode = std::fs::metadata(&path).unwrap().permissions().mode();
        assert_eq!(mode & 0o777, 0o600);
    }

    #[test]
    fn test_replace_file_over_running_executable() {
        use std::os::unix::fs::PermissionsExt;
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("containerd-shim-runc-v2");
        let path_str = path.to_str().unwrap();
        std::fs::copy("/bin/sleep", &path).unwrap();

        // A freshly written binary can briefly report ETXTBSY while another test forks
        let mut child = None;
        for _ in 0..50 {
            match Command::new(&path).arg("30").spawn() {
                Ok(c) => {
                    child = Some(c);
                    break;
                }
                Err(_) => std::thread::sleep(std::time::Duration::from_millis(20)),
            }
        }
        let mut child = child.unwrap();

        let result = LocalExecutor.replace_file(path_str, b"#!/bin/sh\n", 0o755);
        child.kill().unwrap();
        child.wait().unwrap();

        result.unwrap();
        assert_eq!(std::fs::read(&path).unwrap(), b"#!/bin/sh\n");
        let mode = std::fs::metadata(&path).unwrap().permissions().mode();
        assert_eq!(mode & 0o777, 0o755);
        assert!(!dir.path().join("containerd-shim-runc-v2.kubestrap-new").exists());
    }
}
