//! Simulated host for unit tests
//!
//! `FakeHost` keeps files in memory, records every command line it is asked to
//! run and answers with scripted exit codes and output. Unscripted commands exit 0
//! with empty output.

use super::download::Downloader;
use super::exec::CommandExecutor;
use anyhow::{Context, Result};
use std::cell::RefCell;
use std::collections::{BTreeMap, BTreeSet};
use std::os::unix::process::ExitStatusExt;
use std::process::{ExitStatus, Output};

struct Response {
    prefix: String,
    code: i32,
    stdout: String,
    stderr: String,
}

struct Effect {
    prefix: String,
    path: String,
    contents: Vec<u8>,
}

pub struct FakeHost {
    files: RefCell<BTreeMap<String, Vec<u8>>>,
    modes: RefCell<BTreeMap<String, u32>>,
    dirs: RefCell<BTreeSet<String>>,
    commands: BTreeSet<String>,
    responses: Vec<Response>,
    effects: Vec<Effect>,
    read_only: Vec<String>,
    username: String,
    log: RefCell<Vec<String>>,
}

impl FakeHost {
    pub fn new() -> Self {
        FakeHost {
            files: RefCell::new(BTreeMap::new()),
            modes: RefCell::new(BTreeMap::new()),
            dirs: RefCell::new(BTreeSet::new()),
            commands: BTreeSet::new(),
            responses: Vec::new(),
            effects: Vec::new(),
            read_only: Vec::new(),
            username: "root".to_string(),
            log: RefCell::new(Vec::new()),
        }
    }

    /// A healthy amd64 Ubuntu host with systemd and cgroup v2
    pub fn ubuntu() -> Self {
        FakeHost::new()
            .with_command("apt-get")
            .with_command("systemctl")
            .respond("uname -s", 0, "Linux\n", "")
            .respond("uname -m", 0, "x86_64\n", "")
            .respond("systemctl is-active containerd", 0, "active\n", "")
            .with_file(
                "/etc/os-release",
                "NAME=\"Ubuntu\"\nID=ubuntu\nVERSION_ID=\"22.04\"\n",
            )
            .with_file("/proc/1/comm", "systemd\n")
            .with_file("/sys/fs/cgroup/cgroup.controllers", "cpu memory\n")
    }

    pub fn with_command(mut self, name: &str) -> Self {
        self.commands.insert(name.to_string());
        self
    }

    pub fn with_file(self, path: &str, contents: &str) -> Self {
        self.files
            .borrow_mut()
            .insert(path.to_string(), contents.as_bytes().to_vec());
        self
    }

    pub fn with_user(mut self, name: &str) -> Self {
        self.username = name.to_string();
        self
    }

    /// Script the result of every command line starting with `prefix`.
    /// Later scripts take precedence over earlier ones.
    pub fn respond(mut self, prefix: &str, code: i32, stdout: &str, stderr: &str) -> Self {
        self.responses.push(Response {
            prefix: prefix.to_string(),
            code,
            stdout: stdout.to_string(),
            stderr: stderr.to_string(),
        });
        self
    }

    /// Running a command starting with `prefix` creates `path`
    pub fn creates(mut self, prefix: &str, path: &str, contents: &str) -> Self {
        self.effects.push(Effect {
            prefix: prefix.to_string(),
            path: path.to_string(),
            contents: contents.as_bytes().to_vec(),
        });
        self
    }

    /// Writes below `dir` fail as if the directory were unwritable
    pub fn read_only(mut self, dir: &str) -> Self {
        self.read_only.push(dir.to_string());
        self
    }

    /// Every command line run so far
    pub fn commands(&self) -> Vec<String> {
        self.log.borrow().clone()
    }

    /// True when some command line starting with `prefix` was run
    pub fn ran(&self, prefix: &str) -> bool {
        self.log.borrow().iter().any(|line| line.starts_with(prefix))
    }

    pub fn file(&self, path: &str) -> Option<String> {
        self.files
            .borrow()
            .get(path)
            .map(|c| String::from_utf8_lossy(c).to_string())
    }

    pub fn file_bytes(&self, path: &str) -> Option<Vec<u8>> {
        self.files.borrow().get(path).cloned()
    }

    pub fn mode(&self, path: &str) -> Option<u32> {
        self.modes.borrow().get(path).copied()
    }

    fn is_read_only(&self, path: &str) -> bool {
        self.read_only
            .iter()
            .any(|dir| path == dir || path.starts_with(&format!("{}/", dir)))
    }
}

impl CommandExecutor for FakeHost {
    fn execute_simple(&self, program: &str, args: &[&str]) -> Result<Output> {
        let line = if args.is_empty() {
            program.to_string()
        } else {
            format!("{} {}", program, args.join(" "))
        };
        self.log.borrow_mut().push(line.clone());

        for effect in self.effects.iter().filter(|e| line.starts_with(&e.prefix)) {
            self.files
                .borrow_mut()
                .insert(effect.path.clone(), effect.contents.clone());
        }

        let response = self
            .responses
            .iter()
            .rev()
            .find(|r| line.starts_with(&r.prefix));
        let (code, stdout, stderr) = match response {
            Some(r) => (r.code, r.stdout.clone(), r.stderr.clone()),
            None => (0, String::new(), String::new()),
        };

        Ok(Output {
            status: ExitStatus::from_raw(code << 8),
            stdout: stdout.into_bytes(),
            stderr: stderr.into_bytes(),
        })
    }

    fn check_command_exists(&self, command: &str) -> Result<bool> {
        Ok(self.commands.contains(command)
            || self
                .files
                .borrow()
                .contains_key(&format!("/usr/local/bin/{}", command)))
    }

    fn read_file(&self, path: &str) -> Result<String> {
        self.file(path)
            .with_context(|| format!("Failed to read file: {}", path))
    }

    fn write_file(&self, path: &str, content: &[u8]) -> Result<()> {
        if self.is_read_only(path) {
            anyhow::bail!("Failed to write file: {}: Permission denied", path);
        }
        self.files
            .borrow_mut()
            .insert(path.to_string(), content.to_vec());
        Ok(())
    }

    fn replace_file(&self, path: &str, content: &[u8], mode: u32) -> Result<()> {
        self.write_file(path, content)?;
        self.set_mode(path, mode)
    }

    fn mkdir_p(&self, path: &str) -> Result<()> {
        if self.is_read_only(path) {
            anyhow::bail!("Failed to create directory: {}: Permission denied", path);
        }
        self.dirs.borrow_mut().insert(path.to_string());
        Ok(())
    }

    fn file_exists(&self, path: &str) -> Result<bool> {
        Ok(self.files.borrow().contains_key(path) || self.dirs.borrow().contains(path))
    }

    fn set_mode(&self, path: &str, mode: u32) -> Result<()> {
        if !self.files.borrow().contains_key(path) {
            anyhow::bail!("Failed to set permissions for: {}", path);
        }
        self.modes.borrow_mut().insert(path.to_string(), mode);
        Ok(())
    }

    fn get_username(&self) -> Result<String> {
        Ok(self.username.clone())
    }
}

/// Serves canned bodies by URL; unknown URLs fail like a 404
pub struct FakeDownloader {
    bodies: BTreeMap<String, Vec<u8>>,
    offline: bool,
    fetched: RefCell<Vec<String>>,
}

impl FakeDownloader {
    pub fn new() -> Self {
        FakeDownloader {
            bodies: BTreeMap::new(),
            offline: false,
            fetched: RefCell::new(Vec::new()),
        }
    }

    pub fn offline() -> Self {
        FakeDownloader {
            offline: true,
            ..FakeDownloader::new()
        }
    }

    pub fn serve(mut self, url: &str, body: &[u8]) -> Self {
        self.bodies.insert(url.to_string(), body.to_vec());
        self
    }

    pub fn fetched(&self) -> Vec<String> {
        self.fetched.borrow().clone()
    }
}

impl Downloader for FakeDownloader {
    fn fetch(&self, url: &str) -> Result<Vec<u8>> {
        self.fetched.borrow_mut().push(url.to_string());
        if self.offline {
            anyhow::bail!("Failed to download {}: network unreachable", url);
        }
        self.bodies
            .get(url)
            .cloned()
            .with_context(|| format!("HTTP error downloading {}: 404 Not Found", url))
    }

    fn probe(&self, url: &str) -> Result<()> {
        if self.offline {
            anyhow::bail!("Cannot reach {}", url);
        }
        Ok(())
    }
}
