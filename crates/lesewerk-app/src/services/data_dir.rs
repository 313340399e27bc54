// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// Platform-aware config and data directory resolution.

use std::ffi::OsString;
use std::path::{Path, PathBuf};

use lesewerk_core::EngineConfig;
use lesewerk_core::error::Result;
use tracing::{debug, warn};

const APP_DIR: &str = "lesewerk";
const CONFIG_FILE: &str = "config.json";
#[cfg_attr(not(feature = "ocr"), allow(dead_code))]
const WORDS_DB: &str = "words.db";

/// Default config file: `$XDG_CONFIG_HOME/lesewerk/config.json`, falling
/// back to `~/.config/lesewerk/config.json`.
pub fn default_config_path() -> PathBuf {
    base_dir(
        std::env::var_os("XDG_CONFIG_HOME"),
        std::env::var_os("HOME"),
        ".config",
    )
    .join(APP_DIR)
    .join(CONFIG_FILE)
}

/// Default data directory, creating it if needed.
#[cfg_attr(not(feature = "ocr"), allow(dead_code))]
pub fn data_dir() -> PathBuf {
    let dir = base_dir(
        std::env::var_os("XDG_DATA_HOME"),
        std::env::var_os("HOME"),
        ".local/share",
    )
    .join(APP_DIR);
    if let Err(e) = std::fs::create_dir_all(&dir) {
        warn!(path = %dir.display(), error = %e, "cannot create data directory");
    }
    dir
}

/// Word database to use: `explicit` if given, else `words.db` in the data
/// directory.
#[cfg_attr(not(feature = "ocr"), allow(dead_code))]
pub fn word_db_path(explicit: Option<PathBuf>) -> PathBuf {
    explicit.unwrap_or_else(|| data_dir().join(WORDS_DB))
}

fn base_dir(xdg: Option<OsString>, home: Option<OsString>, home_suffix: &str) -> PathBuf {
    match (xdg, home) {
        (Some(xdg), _) if !xdg.is_empty() => PathBuf::from(xdg),
        (_, Some(home)) => PathBuf::from(home).join(home_suffix),
        // Last resort
        _ => PathBuf::from("/tmp"),
    }
}

/// Load the effective configuration.
///
/// An explicit path must exist and parse. Otherwise the default file is used
/// when present; a broken default file is reported and ignored.
pub fn load_config(explicit: Option<&Path>) -> Result<EngineConfig> {
    if let Some(path) = explicit {
        debug!(path = %path.display(), "loading config");
        return EngineConfig::load(path);
    }

    let path = default_config_path();
    if !path.exists() {
        debug!("no config file; using defaults");
        return Ok(EngineConfig::default());
    }
    match EngineConfig::load(&path) {
        Ok(config) => Ok(config),
        Err(e) => {
            warn!(path = %path.display(), error = %e, "ignoring unreadable config file");
            Ok(EngineConfig::default())
        }
    }
}
