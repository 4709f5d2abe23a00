// Copyright 2024 Google LLC
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//     http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.

use std::env;
use std::path::Path;
use std::path::PathBuf;
use std::str::FromStr;

use ron::Options;
use ron::extensions::Extensions;
use serde::Deserialize;
use serde::Serialize;
use tracing::Level;
use tracing::metadata::ParseLevelError;

use crate::prelude::*;

/// The environment variable consulted for the clipboard namespace when the
/// config leaves `clipname` unset.
pub const CLIPNAME_ENV: &str = "WAYLAND_PROXY_CLIPNAME";

fn socket_dir() -> PathBuf {
    env::var_os("XDG_RUNTIME_DIR")
        .map(Into::into)
        .unwrap_or_else(env::temp_dir)
}

pub fn default_socket_path() -> PathBuf {
    Path::join(&socket_dir(), "wlrelay-0")
}

pub fn default_config_file() -> PathBuf {
    let config_dir: PathBuf = env::var_os("XDG_CONFIG_HOME")
        .map(Into::into)
        .or_else(|| env::var_os("HOME").map(|home| Path::join(Path::new(&home), ".config")))
        .unwrap_or_else(|| "/etc".into());
    Path::join(&config_dir, "wlrelay.ron")
}

pub fn maybe_read_ron_file<T: for<'de> Deserialize<'de>>(path: &Path) -> Result<Option<T>> {
    if !path.exists() {
        return Ok(None);
    }

    let config_str = std::fs::read_to_string(path)
        .with_context(loc!(), || format!("unable to read config file {path:?}"))?;
    let config: T = Options::default()
        .with_default_extension(Extensions::IMPLICIT_SOME)
        .from_str(&config_str)
        .with_context(loc!(), || format!("error parsing config file {path:?}"))?;
    Ok(Some(config))
}

#[derive(Clone, Debug, Eq, PartialEq)]
pub struct SerializableLevel(pub Level);

impl FromStr for SerializableLevel {
    type Err = ParseLevelError;
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(Self(Level::from_str(s)?))
    }
}

impl Serialize for SerializableLevel {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(self.0.as_str())
    }
}

impl<'de> Deserialize<'de> for SerializableLevel {
    fn deserialize<D: serde::Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        Ok(Self(Level::from_str(&s).map_err(serde::de::Error::custom)?))
    }
}

/// Session configuration. `tag` is prepended to toplevel titles so host-side
/// window lists identify relayed windows; `clipname` overrides the clipboard
/// namespace prefix (empty string disables prefixing).
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Config {
    pub tag: String,
    pub clipname: Option<String>,
    pub xwayland_scale: i32,
    /// Mirror guest shm pools through the allocator instead of passing fds
    /// through. Required when the host cannot map guest fds.
    pub virtualize_shm: bool,
    pub socket_path: PathBuf,
    pub log_level: SerializableLevel,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            tag: String::new(),
            clipname: None,
            xwayland_scale: 1,
            virtualize_shm: false,
            socket_path: default_socket_path(),
            log_level: SerializableLevel(Level::INFO),
        }
    }
}

impl Config {
    /// The clipboard name after the environment fallback: the configured
    /// value wins, then `WAYLAND_PROXY_CLIPNAME`. `None` means "derive the
    /// per-process default".
    pub fn resolved_clipname(&self) -> Option<String> {
        self.clipname.clone().or_else(|| env::var(CLIPNAME_ENV).ok())
    }
}
