//! Admin kubeconfig for root and the account that invoked sudo

use crate::config::paths;
use crate::utils::exec::{CommandExecutor, run_checked, stdout_text};
use anyhow::{Context, Result};

/// Fields of a passwd entry needed to hand over a kubeconfig
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Account {
    pub name: String,
    pub uid: u32,
    pub gid: u32,
    pub home: String,
}

/// Parse `name:x:uid:gid:gecos:home:shell`
pub fn parse_passwd_entry(line: &str) -> Option<Account> {
    let fields: Vec<&str> = line.trim().split(':').collect();
    if fields.len() < 7 {
        return None;
    }
    Some(Account {
        name: fields[0].to_string(),
        uid: fields[2].parse().ok()?,
        gid: fields[3].parse().ok()?,
        home: fields[5].to_string(),
    })
}

pub fn lookup_account(exec: &dyn CommandExecutor, user: &str) -> Result<Account> {
    let output = run_checked(exec, "getent", &["passwd", user])
        .with_context(|| format!("User '{}' not found", user))?;
    parse_passwd_entry(&stdout_text(&output))
        .with_context(|| format!("Malformed passwd entry for '{}'", user))
}

fn install_kubeconfig(exec: &dyn CommandExecutor, home: &str, admin: &str) -> Result<String> {
    let dir = format!("{}/.kube", home.trim_end_matches('/'));
    let path = format!("{}/config", dir);
    exec.mkdir_p(&dir)?;
    exec.write_file(&path, admin.as_bytes())?;
    exec.set_mode(&path, 0o600)?;
    Ok(path)
}

/// Copy admin.conf to `/root/.kube/config` and, when set, to the invoking user's
/// home with that user's ownership. Returns the paths written.
pub fn materialize(exec: &dyn CommandExecutor, invoking_user: Option<&str>) -> Result<Vec<String>> {
    let admin = exec
        .read_file(paths::ADMIN_KUBECONFIG)
        .context("kubeadm init did not produce an admin kubeconfig")?;

    let mut written = vec![install_kubeconfig(exec, "/root", &admin)?];

    if let Some(user) = invoking_user {
        let result = lookup_account(exec, user).and_then(|account| {
            let path = install_kubeconfig(exec, &account.home, &admin)?;
            let owner = format!("{}:{}", account.uid, account.gid);
            let kube_dir = paths::parent(&path).to_string();
            run_checked(exec, "chown", &["-R", &owner, &kube_dir])?;
            Ok(path)
        });
        match result {
            Ok(path) => {
                tracing::info!("kubeconfig for {} written to {}", user, path);
                written.push(path);
            }
            Err(e) => tracing::warn!("Could not set up kubeconfig for {}: {:#}", user, e),
        }
    }

    Ok(written)
}
