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

//! Output relaying. Geometry travels verbatim; the advertised scale and the
//! xdg-output logical metrics are rewritten when Xwayland scale compensation
//! is active, so X clients observe the coordinate space Xwayland renders in.

use wayland_client::protocol::wl_output as host_wl_output;
use wayland_client::protocol::wl_output::WlOutput as HostWlOutput;
use wayland_protocols::xdg::xdg_output::zv1::client::zxdg_output_manager_v1::ZxdgOutputManagerV1 as HostXdgOutputManager;
use wayland_protocols::xdg::xdg_output::zv1::client::zxdg_output_v1 as host_zxdg_output_v1;
use wayland_protocols::xdg::xdg_output::zv1::client::zxdg_output_v1::ZxdgOutputV1 as HostXdgOutput;
use wayland_protocols::xdg::xdg_output::zv1::server::zxdg_output_manager_v1;
use wayland_protocols::xdg::xdg_output::zv1::server::zxdg_output_manager_v1::ZxdgOutputManagerV1;
use wayland_protocols::xdg::xdg_output::zv1::server::zxdg_output_v1;
use wayland_protocols::xdg::xdg_output::zv1::server::zxdg_output_v1::ZxdgOutputV1;
use wayland_server::DataInit;
use wayland_server::Dispatch;
use wayland_server::DisplayHandle;
use wayland_server::protocol::wl_output;
use wayland_server::protocol::wl_output::WlOutput;

use crate::objects::Object;
use crate::objects::ObjectKey;
use crate::objects::Pair;
use crate::objects::convert_wenum;
use crate::prelude::*;
use crate::registry::HostGlobal;
use crate::session::RelayState;

impl Dispatch<WlOutput, ObjectKey> for RelayState {
    fn request(
        state: &mut Self,
        _client: &wayland_server::Client,
        _output: &WlOutput,
        request: wl_output::Request,
        key: &ObjectKey,
        _dhandle: &DisplayHandle,
        _data_init: &mut DataInit<'_, Self>,
    ) {
        match request {
            wl_output::Request::Release => {
                let host_output = match state.objects.get(*key) {
                    Ok(Object::Output(pair)) => pair.host.clone(),
                    other => {
                        log_and_return!(Err(anyhow!("wl_output binding missing: {other:?}")))
                    },
                };
                host_output.release();
                state.deferred.defer(&host_output, *key);
            },
            _ => unreachable!(),
        }
    }
}

impl Dispatch<ZxdgOutputManagerV1, HostGlobal<HostXdgOutputManager>> for RelayState {
    fn request(
        state: &mut Self,
        _client: &wayland_server::Client,
        _manager: &ZxdgOutputManagerV1,
        request: zxdg_output_manager_v1::Request,
        host_manager: &HostGlobal<HostXdgOutputManager>,
        _dhandle: &DisplayHandle,
        data_init: &mut DataInit<'_, Self>,
    ) {
        match request {
            zxdg_output_manager_v1::Request::GetXdgOutput { id, output } => {
                let host_output = match state.objects.to_host(&output) {
                    Ok(host_output) => host_output,
                    Err(err) => {
                        data_init.init(id, ObjectKey::INVALID);
                        log_and_return!(Err(err))
                    },
                };
                let qh = state.qh.clone();
                let host_manager = host_manager.clone();
                state.objects.insert_with_key(|key| {
                    let server = data_init.init(id, key);
                    let host = host_manager.get_xdg_output(&host_output, &qh, key);
                    Object::XdgOutput(Pair { server, host })
                });
            },
            zxdg_output_manager_v1::Request::Destroy => host_manager.destroy(),
            _ => unreachable!(),
        }
    }
}

impl Dispatch<ZxdgOutputV1, ObjectKey> for RelayState {
    fn request(
        state: &mut Self,
        _client: &wayland_server::Client,
        _xdg_output: &ZxdgOutputV1,
        request: zxdg_output_v1::Request,
        key: &ObjectKey,
        _dhandle: &DisplayHandle,
        _data_init: &mut DataInit<'_, Self>,
    ) {
        match request {
            zxdg_output_v1::Request::Destroy => {
                let host = match state.objects.get(*key) {
                    Ok(Object::XdgOutput(pair)) => pair.host.clone(),
                    other => {
                        log_and_return!(Err(anyhow!("zxdg_output binding missing: {other:?}")))
                    },
                };
                host.destroy();
                state.deferred.defer(&host, *key);
            },
            _ => unreachable!(),
        }
    }
}

impl wayland_client::Dispatch<HostWlOutput, ObjectKey> for RelayState {
    fn event(
        state: &mut Self,
        _output: &HostWlOutput,
        event: host_wl_output::Event,
        key: &ObjectKey,
        _conn: &wayland_client::Connection,
        _qh: &wayland_client::QueueHandle<Self>,
    ) {
        let server = match state.objects.get(*key) {
            Ok(Object::Output(pair)) => pair.server.clone(),
            _ => {
                trace!("host output event after binding removal");
                return;
            },
        };

        match event {
            host_wl_output::Event::Geometry {
                x,
                y,
                physical_width,
                physical_height,
                subpixel,
                make,
                model,
                transform,
            } => server.geometry(
                x,
                y,
                physical_width,
                physical_height,
                warn_and_return!(convert_wenum(subpixel)),
                make,
                model,
                warn_and_return!(convert_wenum(transform)),
            ),
            host_wl_output::Event::Mode {
                flags,
                width,
                height,
                refresh,
            } => server.mode(warn_and_return!(convert_wenum(flags)), width, height, refresh),
            host_wl_output::Event::Scale { factor } => {
                // Compensates Xwayland's own scaling: X clients see the
                // unscaled coordinate space.
                server.scale(if state.hooks.is_some() {
                    factor / state.scale.factor()
                } else {
                    factor
                });
            },
            host_wl_output::Event::Done => server.done(),
            host_wl_output::Event::Name { name } => server.name(name),
            host_wl_output::Event::Description { description } => server.description(description),
            other => debug!("unhandled host output event: {other:?}"),
        }
    }
}

impl wayland_client::Dispatch<HostXdgOutputManager, ()> for RelayState {
    fn event(
        _state: &mut Self,
        _manager: &HostXdgOutputManager,
        _event: <HostXdgOutputManager as wayland_client::Proxy>::Event,
        _data: &(),
        _conn: &wayland_client::Connection,
        _qh: &wayland_client::QueueHandle<Self>,
    ) {
        unreachable!();
    }
}

impl wayland_client::Dispatch<HostXdgOutput, ObjectKey> for RelayState {
    fn event(
        state: &mut Self,
        _xdg_output: &HostXdgOutput,
        event: host_zxdg_output_v1::Event,
        key: &ObjectKey,
        _conn: &wayland_client::Connection,
        _qh: &wayland_client::QueueHandle<Self>,
    ) {
        let server = match state.objects.get(*key) {
            Ok(Object::XdgOutput(pair)) => pair.server.clone(),
            _ => {
                trace!("host xdg_output event after binding removal");
                return;
            },
        };
        let scale = state.scale;

        match event {
            host_zxdg_output_v1::Event::LogicalPosition { x, y } => {
                server.logical_position(scale.to_client(x), scale.to_client(y));
            },
            host_zxdg_output_v1::Event::LogicalSize { width, height } => {
                server.logical_size(scale.to_client(width), scale.to_client(height));
            },
            host_zxdg_output_v1::Event::Done => server.done(),
            host_zxdg_output_v1::Event::Name { name } => server.name(name),
            host_zxdg_output_v1::Event::Description { description } => {
                server.description(description)
            },
            other => debug!("unhandled host xdg_output event: {other:?}"),
        }
    }
}
