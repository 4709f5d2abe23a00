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

use std::fs;
use std::io;
use std::os::unix::net::UnixListener;
use std::path::Path;
use std::sync::Arc;

use nix::sys::stat;
use nix::sys::stat::Mode;
use tracing::Level;
use tracing_subscriber::fmt::format::FmtSpan;
use tracing_subscriber::prelude::*;
use wayland_client::Connection;

use wlrelay::args::init_config;
use wlrelay::prelude::*;
use wlrelay::session::Session;
use wlrelay::virtgpu::GpuAllocator;
use wlrelay::virtgpu::MemfdAllocator;

fn configure_tracing(stderr_log_level: Level) -> Result<()> {
    let layer = tracing_subscriber::fmt::layer()
        .with_writer(io::stderr.with_max_level(stderr_log_level))
        .with_file(true)
        .with_line_number(true)
        .with_span_events(FmtSpan::NEW | FmtSpan::CLOSE);
    tracing_subscriber::registry().with(layer).init();
    Ok(())
}

fn bind_user_socket<P: AsRef<Path>>(sock_path: P) -> Result<UnixListener> {
    if sock_path.as_ref().try_exists().location(loc!())? {
        fs::remove_file(&sock_path).location(loc!())?;
    }

    let old_umask = stat::umask(Mode::S_IXUSR | Mode::S_IRWXG | Mode::S_IRWXO);
    let listener = UnixListener::bind(sock_path).location(loc!())?;
    stat::umask(old_umask);

    Ok(listener)
}

fn main() -> Result<()> {
    let config = init_config().location(loc!())?;
    configure_tracing(config.log_level.0).location(loc!())?;

    let gpu: Option<Arc<dyn GpuAllocator>> = config
        .virtualize_shm
        .then(|| Arc::new(MemfdAllocator) as Arc<dyn GpuAllocator>);

    let listener = bind_user_socket(&config.socket_path).location(loc!())?;
    info!("listening on {:?}", config.socket_path);

    for stream in listener.incoming() {
        let stream = stream.location(loc!())?;
        let config = config.clone();
        let gpu = gpu.clone();
        std::thread::spawn(move || {
            let result = Connection::connect_to_env()
                .location(loc!())
                .and_then(|host| Session::run(stream, host, &config, None, gpu));
            if let Err(e) = result {
                error!("session exited with error: {e:?}");
            }
        });
    }

    Ok(())
}
