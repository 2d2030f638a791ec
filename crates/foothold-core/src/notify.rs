use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::process::{Command, Stdio};

use anyhow::{Context, anyhow};
use serde::Serialize;
use tracing::{debug, info, instrument, warn};

use crate::config::Config;
use crate::item::ItemId;
use crate::reminder::Notifier;

const HOOK_EVENT: &str = "on-remind";

/// Prints reminders to stdout.
#[derive(Debug, Clone, Default)]
pub struct StdoutNotifier;

impl Notifier for StdoutNotifier {
    fn notify(&mut self, item_id: ItemId, title: &str, body: &str) -> anyhow::Result<()> {
        info!(item = item_id, title, body, "reminder");
        let mut out = std::io::stdout().lock();
        writeln!(out, "[reminder] {title}: {body}")?;
        out.flush()?;
        Ok(())
    }
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct HookPayload<'a> {
    item_id: ItemId,
    title: &'a str,
    body: &'a str,
}

/// Runs every executable `on-remind.*` script in the hooks directory with
/// one JSON line on stdin.
#[derive(Debug, Clone)]
pub struct HookNotifier {
    enabled: bool,
    hooks_dir: PathBuf,
}

impl HookNotifier {
    pub fn new(cfg: &Config, data_dir: &Path) -> Self {
        let enabled = cfg.get_bool("notify.hooks").unwrap_or(true);
        let hooks_dir = data_dir.join("hooks");
        debug!(
            enabled,
            hooks_dir = %hooks_dir.display(),
            "initialized hook notifier"
        );
        Self { enabled, hooks_dir }
    }

    #[instrument(skip(self))]
    fn list_scripts(&self) -> anyhow::Result<Vec<PathBuf>> {
        if !self.hooks_dir.exists() {
            return Ok(Vec::new());
        }

        let mut scripts = Vec::new();
        for entry in fs::read_dir(&self.hooks_dir)
            .with_context(|| format!("failed to read hooks dir {}", self.hooks_dir.display()))?
        {
            let path = entry?.path();
            if !path.is_file() {
                continue;
            }

            let Some(name) = path.file_name().and_then(|name| name.to_str()) else {
                continue;
            };
            if !name.starts_with(&format!("{HOOK_EVENT}.")) {
                continue;
            }

            if !is_executable(&path)? {
                debug!(path = %path.display(), "skipping non-executable hook");
                continue;
            }

            scripts.push(path);
        }

        scripts.sort();
        Ok(scripts)
    }
}

impl Notifier for HookNotifier {
    fn notify(&mut self, item_id: ItemId, title: &str, body: &str) -> anyhow::Result<()> {
        if !self.enabled {
            return Ok(());
        }

        let payload = serde_json::to_string(&HookPayload {
            item_id,
            title,
            body,
        })?;

        let mut failures = Vec::new();
        for script in self.list_scripts()? {
            if let Err(err) = run_hook(&script, &payload) {
                warn!(hook = %script.display(), error = %err, "reminder hook failed");
                failures.push(script);
            }
        }

        if failures.is_empty() {
            Ok(())
        } else {
            Err(anyhow!("{} reminder hook(s) failed", failures.len()))
        }
    }
}

/// Fans a notification out to several sinks; one failing sink does not stop
/// the others.
#[derive(Default)]
pub struct NotifierSet {
    sinks: Vec<Box<dyn Notifier>>,
}

impl NotifierSet {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, sink: impl Notifier + 'static) -> Self {
        self.sinks.push(Box::new(sink));
        self
    }

    pub fn len(&self) -> usize {
        self.sinks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sinks.is_empty()
    }
}

impl Notifier for NotifierSet {
    fn notify(&mut self, item_id: ItemId, title: &str, body: &str) -> anyhow::Result<()> {
        let mut last_err = None;
        for sink in &mut self.sinks {
            if let Err(err) = sink.notify(item_id, title, body) {
                last_err = Some(err);
            }
        }
        match last_err {
            Some(err) => Err(err),
            None => Ok(()),
        }
    }
}

fn run_hook(path: &Path, payload: &str) -> anyhow::Result<()> {
    info!(hook = %path.display(), "running hook");
    let mut child = Command::new(path)
        .stdin(Stdio::piped())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .spawn()
        .with_context(|| format!("failed to run hook {}", path.display()))?;

    if let Some(mut stdin) = child.stdin.take() {
        writeln!(stdin, "{payload}")?;
    }

    let output = child
        .wait_with_output()
        .with_context(|| format!("failed to wait for hook {}", path.display()))?;

    let stderr = String::from_utf8_lossy(&output.stderr).trim().to_string();
    if !stderr.is_empty() {
        warn!(hook = %path.display(), stderr = %stderr, "hook wrote stderr");
    }

    if !output.status.success() {
        return Err(anyhow!(
            "hook {} failed with status {}",
            path.display(),
            output
                .status
                .code()
                .map(|code| code.to_string())
                .unwrap_or_else(|| "unknown".to_string())
        ));
    }

    Ok(())
}

#[cfg(unix)]
fn is_executable(path: &Path) -> anyhow::Result<bool> {
    use std::os::unix::fs::PermissionsExt;

    let mode = fs::metadata(path)?.permissions().mode();
    Ok(mode & 0o111 != 0)
}

#[cfg(not(unix))]
fn is_executable(path: &Path) -> anyhow::Result<bool> {
    Ok(path.is_file())
}

#[cfg(all(test, unix))]
mod tests {
    use std::fs;
    use std::os::unix::fs::PermissionsExt;

    use tempfile::tempdir;

    use super::{HookNotifier, NotifierSet};
    use crate::config::Config;
    use crate::reminder::Notifier;

    fn write_script(path: &std::path::Path, body: &str) {
        fs::write(path, body).expect("write script");
        let mut perms = fs::metadata(path).expect("metadata").permissions();
        perms.set_mode(0o755);
        fs::set_permissions(path, perms).expect("chmod");
    }

    // One test so no other test thread forks while a script is still open for writing.
    #[test]
    fn hooks_receive_payload_and_failures_are_reported() {
        let temp = tempdir().expect("tempdir");
        let hooks = temp.path().join("hooks");
        fs::create_dir_all(&hooks).expect("hooks dir");
        let out = temp.path().join("out.json");
        write_script(
            &hooks.join("on-remind.record"),
            &format!("#!/bin/sh\ncat > '{}'\n", out.display()),
        );
        fs::write(hooks.join("on-remind.txt"), "not executable").expect("write");

        let mut notifier = HookNotifier::new(&Config::defaults(), temp.path());
        notifier
            .notify(7, "Standup", "Due in 30 minutes")
            .expect("notify");

        let written = fs::read_to_string(&out).expect("hook output");
        let value: serde_json::Value = serde_json::from_str(written.trim()).expect("json");
        assert_eq!(value["itemId"], 7);
        assert_eq!(value["title"], "Standup");
        assert_eq!(value["body"], "Due in 30 minutes");

        let marker = temp.path().join("ran");
        write_script(&hooks.join("on-remind.0-fail"), "#!/bin/sh\nexit 3\n");
        write_script(
            &hooks.join("on-remind.zz-ok"),
            &format!("#!/bin/sh\ntouch '{}'\n", marker.display()),
        );

        let mut set = NotifierSet::new().with(HookNotifier::new(&Config::defaults(), temp.path()));
        assert!(set.notify(1, "t", "b").is_err());
        assert!(marker.exists());
    }
}
