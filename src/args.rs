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

use std::path::PathBuf;

use bpaf::Parser;
use bpaf::construct;

use crate::config::Config;
use crate::config::SerializableLevel;
use crate::config::default_config_file;
use crate::config::maybe_read_ron_file;
use crate::prelude::*;

#[derive(Clone, Debug)]
struct CliArgs {
    config_file: Option<PathBuf>,
    tag: Option<String>,
    clipname: Option<String>,
    xwayland_scale: Option<i32>,
    virtualize_shm: bool,
    socket_path: Option<PathBuf>,
    log_level: Option<SerializableLevel>,
    print_default_config: bool,
}

fn cli_args() -> impl Parser<CliArgs> {
    let config_file = bpaf::long("config-file")
        .help("path to a ron config file")
        .argument::<PathBuf>("PATH")
        .optional();
    let tag = bpaf::long("tag")
        .help("prefix prepended to toplevel titles on the host")
        .argument::<String>("TAG")
        .optional();
    let clipname = bpaf::long("clipname")
        .help("clipboard namespace prefix; empty disables prefixing")
        .argument::<String>("NAME")
        .optional();
    let xwayland_scale = bpaf::long("xwayland-scale")
        .help("coordinate scale compensation applied when Xwayland hooks are active")
        .argument::<i32>("N")
        .optional();
    let virtualize_shm = bpaf::long("virtualize-shm")
        .help("mirror guest shm pools instead of passing fds through")
        .switch();
    let socket_path = bpaf::long("socket-path")
        .help("guest-facing listening socket")
        .argument::<PathBuf>("PATH")
        .optional();
    let log_level = bpaf::long("log-level")
        .argument::<SerializableLevel>("LEVEL")
        .optional();
    let print_default_config = bpaf::long("print-default-config")
        .switch();
    construct!(CliArgs {
        config_file,
        tag,
        clipname,
        xwayland_scale,
        virtualize_shm,
        socket_path,
        log_level,
        print_default_config,
    })
}

/// Config file under CLI overrides. `--print-default-config` short-circuits
/// with the serialized default.
pub fn init_config() -> Result<Config> {
    let args = cli_args().to_options().run();

    if args.print_default_config {
        println!(
            "{}",
            ron::ser::to_string_pretty(&Config::default(), ron::ser::PrettyConfig::default())
                .location(loc!())?
        );
        std::process::exit(0);
    }

    let mut config: Config = maybe_read_ron_file(
        &args.config_file.unwrap_or_else(default_config_file),
    )
    .location(loc!())?
    .unwrap_or_default();

    if let Some(tag) = args.tag {
        config.tag = tag;
    }
    if let Some(clipname) = args.clipname {
        config.clipname = Some(clipname);
    }
    if let Some(scale) = args.xwayland_scale {
        config.xwayland_scale = scale;
    }
    if args.virtualize_shm {
        config.virtualize_shm = true;
    }
    if let Some(socket_path) = args.socket_path {
        config.socket_path = socket_path;
    }
    if let Some(log_level) = args.log_level {
        config.log_level = log_level;
    }

    Ok(config)
}
