use std::collections::BTreeMap;
use std::fs;
use std::path::{
  Path,
  PathBuf
};
use std::str::FromStr;

use anyhow::{
  Context,
  anyhow,
  bail
};
use tracing::{
  debug,
  info,
  trace,
  warn
};

const RC_ENV_VAR: &str = "FOOTHOLDRC";
const RC_FILE_NAME: &str = ".footholdrc";
const DATA_DIR_NAME: &str = ".foothold";
const MAX_INCLUDE_DEPTH: usize = 8;

/// Keys foothold reads, with their built-in values. `timezone` has no
/// default: the system zone applies.
const KNOWN_KEYS: &[(&str, Option<&str>)] = &[
  ("data.location", Some("~/.foothold")),
  ("color", Some("on")),
  ("reminder.tick_seconds", Some("30")),
  ("notify.permission", Some("granted")),
  ("notify.hooks", Some("on")),
  ("timezone", None)
];

/// Where the rc file came from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RcSource {
  Flag(PathBuf),
  Env(PathBuf),
  Home(PathBuf),
  /// `$FOOTHOLDRC=/dev/null`.
  Disabled,
  Missing
}

impl RcSource {
  fn path(&self) -> Option<&Path> {
    match self {
      | Self::Flag(path)
      | Self::Env(path)
      | Self::Home(path) => Some(path),
      | Self::Disabled | Self::Missing => {
        None
      }
    }
  }
}

/// One meaningful rc line.
#[derive(Debug, PartialEq, Eq)]
enum RcLine<'a> {
  Include(&'a str),
  Set(&'a str, &'a str)
}

/// Strips comments and splits a line. `Ok(None)` for blank lines.
fn parse_rc_line(
  raw: &str
) -> anyhow::Result<Option<RcLine<'_>>> {
  let line = raw
    .split_once('#')
    .map_or(raw, |(before, _)| before)
    .trim();
  if line.is_empty() {
    return Ok(None);
  }
  if let Some(rest) =
    line.strip_prefix("include ")
  {
    let target = rest.trim();
    if target.is_empty() {
      bail!("include needs a path");
    }
    return Ok(Some(RcLine::Include(
      target
    )));
  }
  match line.split_once('=') {
    | Some((key, value))
      if !key.trim().is_empty() =>
    {
      Ok(Some(RcLine::Set(
        key.trim(),
        value.trim()
      )))
    }
    | _ => bail!("expected key = value")
  }
}

#[derive(Debug, Clone)]
pub struct Config {
  values:           BTreeMap<String, String>,
  pub source:       RcSource,
  pub loaded_files: Vec<PathBuf>
}

impl Config {
  /// Built-in values with no file applied.
  pub fn defaults() -> Self {
    let values = KNOWN_KEYS
      .iter()
      .filter_map(|(key, value)| {
        value.map(|v| {
          (key.to_string(), v.to_string())
        })
      })
      .collect();

    Config {
      values,
      source: RcSource::Missing,
      loaded_files: Vec::new()
    }
  }

  #[tracing::instrument(skip(
    rc_flag
  ))]
  pub fn load(
    rc_flag: Option<&Path>
  ) -> anyhow::Result<Self> {
    let mut cfg = Self::defaults();
    cfg.source = locate_rc(rc_flag);

    match cfg.source.path() {
      | Some(path) => {
        let path = path.to_path_buf();
        info!(rc = %path.display(), "loading config");
        cfg.read_rc(&path, 0)?;
      }
      | None => {
        warn!(source = ?cfg.source, "no rc file; using built-in settings");
      }
    }

    Ok(cfg)
  }

  /// Applies `--rc key=value` pairs; a leading `rc.` is accepted.
  #[tracing::instrument(skip(
    self, overrides
  ))]
  pub fn apply_overrides<I>(
    &mut self,
    overrides: I
  ) where
    I: IntoIterator<
      Item = (String, String)
    >
  {
    for (key, value) in overrides {
      let key = key
        .strip_prefix("rc.")
        .map(str::to_string)
        .unwrap_or(key);
      debug!(%key, %value, "rc override");
      self.set(key, value);
    }
  }

  pub fn get(
    &self,
    key: &str
  ) -> Option<String> {
    self.values.get(key).cloned()
  }

  pub fn get_bool(
    &self,
    key: &str
  ) -> Option<bool> {
    self
      .values
      .get(key)
      .map(|v| parse_bool(v))
  }

  /// Parses `key` with `FromStr`; a present but invalid value is an error.
  pub fn get_parsed<T>(
    &self,
    key: &str
  ) -> anyhow::Result<Option<T>>
  where
    T: FromStr,
    T::Err: std::fmt::Display
  {
    let Some(raw) = self.values.get(key)
    else {
      return Ok(None);
    };
    raw.parse::<T>().map(Some).map_err(
      |err| {
        anyhow!(
          "invalid value for {key}: \
           {raw} ({err})"
        )
      }
    )
  }

  fn set(
    &mut self,
    key: String,
    value: String
  ) {
    if !KNOWN_KEYS
      .iter()
      .any(|(known, _)| *known == key)
    {
      warn!(%key, "unknown config key; keeping it anyway");
    }
    self.values.insert(key, value);
  }

  #[tracing::instrument(skip(self))]
  fn read_rc(
    &mut self,
    path: &Path,
    depth: usize
  ) -> anyhow::Result<()> {
    if depth > MAX_INCLUDE_DEPTH {
      bail!(
        "config includes nest deeper \
         than {MAX_INCLUDE_DEPTH} at {}",
        path.display()
      );
    }
    let path = expand_tilde(path);
    let text = fs::read_to_string(&path)
      .with_context(|| {
        format!(
          "failed to read config {}",
          path.display()
        )
      })?;
    self.loaded_files.push(path.clone());

    for (index, raw) in
      text.lines().enumerate()
    {
      let parsed = parse_rc_line(raw)
        .with_context(|| {
          format!(
            "{}:{}: {}",
            path.display(),
            index + 1,
            raw.trim()
          )
        })?;
      match parsed {
        | None => {}
        | Some(RcLine::Set(key, value)) => {
          trace!(key, value, "config value");
          self.set(
            key.to_string(),
            value.to_string()
          );
        }
        | Some(RcLine::Include(target)) => {
          let include =
            include_path(&path, target);
          if self
            .loaded_files
            .contains(&include)
          {
            warn!(include = %include.display(), "config include cycle; skipping");
          } else if !include.exists() {
            warn!(include = %include.display(), "included config missing; skipping");
          } else {
            debug!(include = %include.display(), line = index + 1, "following include");
            self.read_rc(&include, depth + 1)?;
          }
        }
      }
    }

    Ok(())
  }
}

/// `--data`, else `data.location`, else `~/.foothold`. The directory is
/// created when missing.
#[tracing::instrument(skip(cfg))]
pub fn resolve_data_dir(
  cfg: &Config,
  data_flag: Option<&Path>
) -> anyhow::Result<PathBuf> {
  let dir = match (
    data_flag,
    cfg.get("data.location")
  ) {
    | (Some(path), _) => path.to_path_buf(),
    | (None, Some(location)) => {
      expand_tilde(Path::new(&location))
    }
    | (None, None) => dirs::home_dir()
      .map(|home| home.join(DATA_DIR_NAME))
      .ok_or_else(|| {
        anyhow!(
          "cannot determine home \
           directory for the data store"
        )
      })?
  };

  if !dir.is_dir() {
    info!(dir = %dir.display(), "creating data directory");
    fs::create_dir_all(&dir)
      .with_context(|| {
        format!(
          "failed to create {}",
          dir.display()
        )
      })?;
  }

  Ok(dir)
}

/// `--config`, else `$FOOTHOLDRC`, else `~/.footholdrc` when it exists.
fn locate_rc(
  rc_flag: Option<&Path>
) -> RcSource {
  if let Some(path) = rc_flag {
    return RcSource::Flag(
      path.to_path_buf()
    );
  }
  match std::env::var_os(RC_ENV_VAR) {
    | Some(value) if value == "/dev/null" => {
      return RcSource::Disabled;
    }
    | Some(value) => {
      return RcSource::Env(
        PathBuf::from(value)
      );
    }
    | None => {}
  }
  dirs::home_dir()
    .map(|home| home.join(RC_FILE_NAME))
    .filter(|candidate| {
      candidate.is_file()
    })
    .map_or(RcSource::Missing, RcSource::Home)
}

/// Relative includes resolve against the including file's directory.
fn include_path(
  from: &Path,
  target: &str
) -> PathBuf {
  let expanded =
    expand_tilde(Path::new(target));
  if expanded.is_absolute() {
    return expanded;
  }
  from
    .parent()
    .unwrap_or_else(|| Path::new("."))
    .join(expanded)
}

fn expand_tilde(
  path: &Path
) -> PathBuf {
  match (
    path.strip_prefix("~"),
    dirs::home_dir()
  ) {
    | (Ok(rest), Some(home)) => {
      home.join(rest)
    }
    | _ => path.to_path_buf()
  }
}

fn parse_bool(s: &str) -> bool {
  matches!(
    s.trim()
      .to_ascii_lowercase()
      .as_str(),
    "1" | "y" | "yes" | "on" | "true"
  )
}

#[cfg(test)]
mod tests {
  use std::fs;

  use tempfile::tempdir;

  use super::{
    Config,
    RcLine,
    parse_rc_line
  };

  #[test]
  fn file_values_includes_and_overrides() {
    let temp =
      tempdir().expect("tempdir");
    let extra = temp.path().join("extra");
    fs::write(
      &extra,
      "reminder.tick_seconds = 10\n"
    )
    .expect("write include");
    let rc = temp.path().join("rc");
    fs::write(
      &rc,
      "# comment\ncolor = off  # inline\n\
       include extra\n"
    )
    .expect("write rc");

    let mut cfg = Config::defaults();
    cfg.read_rc(&rc, 0).expect("load rc");
    assert_eq!(
      cfg.get_bool("color"),
      Some(false)
    );
    assert_eq!(
      cfg
        .get_parsed::<u64>(
          "reminder.tick_seconds"
        )
        .expect("parse tick"),
      Some(10)
    );
    assert_eq!(cfg.loaded_files.len(), 2);

    cfg.apply_overrides([(
      "rc.notify.permission".to_string(),
      "denied".to_string()
    )]);
    assert_eq!(
      cfg.get("notify.permission")
        .as_deref(),
      Some("denied")
    );
  }

  #[test]
  fn bad_lines_and_values_are_errors() {
    let temp =
      tempdir().expect("tempdir");
    let rc = temp.path().join("rc");
    fs::write(&rc, "just words\n")
      .expect("write rc");
    let mut cfg = Config::defaults();
    assert!(cfg.read_rc(&rc, 0).is_err());

    cfg.apply_overrides([(
      "reminder.tick_seconds"
        .to_string(),
      "soon".to_string()
    )]);
    assert!(
      cfg
        .get_parsed::<u64>(
          "reminder.tick_seconds"
        )
        .is_err()
    );
  }

  #[test]
  fn rc_lines_strip_comments() {
    assert_eq!(
      parse_rc_line("  # note")
        .expect("comment"),
      None
    );
    assert_eq!(
      parse_rc_line("color = off # x")
        .expect("setting"),
      Some(RcLine::Set("color", "off"))
    );
    assert_eq!(
      parse_rc_line("include ~/more")
        .expect("include"),
      Some(RcLine::Include("~/more"))
    );
    assert!(
      parse_rc_line("= off").is_err()
    );
  }

  #[test]
  fn self_include_is_read_once() {
    let temp =
      tempdir().expect("tempdir");
    let rc = temp.path().join("rc");
    fs::write(
      &rc,
      "color = off
include rc
"
    )
    .expect("write rc");

    let mut cfg = Config::defaults();
    cfg.read_rc(&rc, 0).expect("load rc");
    assert_eq!(cfg.loaded_files.len(), 1);
    assert_eq!(
      cfg.get_bool("color"),
      Some(false)
    );
  }
}
