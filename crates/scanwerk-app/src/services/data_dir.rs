// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// Data directory and config file resolution. Lookup only; nothing is created.

use std::ffi::OsString;
use std::path::PathBuf;

/// `$XDG_DATA_HOME`, else `$HOME/.local/share`. Empty or relative XDG values
/// are ignored, as the base directory convention requires.
fn data_home(xdg: Option<OsString>, home: Option<OsString>) -> Option<PathBuf> {
    xdg.map(PathBuf::from)
        .filter(|p| p.is_absolute())
        .or_else(|| {
            home.filter(|h| !h.is_empty())
                .map(|h| PathBuf::from(h).join(".local/share"))
        })
}

/// Scanwerk's data directory, if the environment names one.
pub fn data_dir() -> Option<PathBuf> {
    data_home(std::env::var_os("XDG_DATA_HOME"), std::env::var_os("HOME"))
        .map(|base| base.join("scanwerk"))
}

/// Default location of the driver config file.
pub fn config_path() -> Option<PathBuf> {
    data_dir().map(|dir| dir.join("config.json"))
}
