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

//! Per-surface relaying: buffer attachment, commit-time mirror copy, and the
//! deferred-request queue used while Xwayland has not yet configured a
//! surface.

use std::collections::VecDeque;

use wayland_client::Proxy;
use wayland_client::protocol::wl_callback::WlCallback as HostWlCallback;
use wayland_client::protocol::wl_compositor::WlCompositor as HostWlCompositor;
use wayland_client::protocol::wl_output;
use wayland_client::protocol::wl_region::WlRegion as HostWlRegion;
use wayland_client::protocol::wl_surface as host_wl_surface;
use wayland_client::protocol::wl_surface::WlSurface as HostWlSurface;
use wayland_server::DataInit;
use wayland_server::Dispatch;
use wayland_server::DisplayHandle;
use wayland_server::Resource;
use wayland_server::protocol::wl_callback::WlCallback;
use wayland_server::protocol::wl_compositor;
use wayland_server::protocol::wl_compositor::WlCompositor;
use wayland_server::protocol::wl_region;
use wayland_server::protocol::wl_region::WlRegion;
use wayland_server::protocol::wl_surface;
use wayland_server::protocol::wl_surface::WlSurface;

use crate::objects::Object;
use crate::objects::ObjectKey;
use crate::objects::convert_wenum;
use crate::objects::direct_host;
use crate::prelude::*;
use crate::registry::HostGlobal;
use crate::session::RelayState;
use crate::shm::BufferBinding;
use crate::shm::BufferKind;
use crate::shm::BufferView;
use crate::xwayland::ConfigureHandle;
use crate::xwayland::ExtensionSlot;
use crate::xwayland::Visibility;

/// Requests that are routed through the deferred queue while the surface is
/// unconfigured. Object arguments are translated when the request arrives;
/// buffer realization and coordinate scaling happen at apply time.
#[derive(Debug)]
pub enum SurfaceAction {
    Attach {
        buffer: Option<ObjectKey>,
        x: i32,
        y: i32,
    },
    Damage {
        x: i32,
        y: i32,
        width: i32,
        height: i32,
    },
    DamageBuffer {
        x: i32,
        y: i32,
        width: i32,
        height: i32,
    },
    Frame {
        callback: WlCallback,
    },
    SetOpaqueRegion {
        region: Option<HostWlRegion>,
    },
    SetInputRegion {
        region: Option<HostWlRegion>,
    },
    Commit,
    SetBufferTransform {
        transform_raw: u32,
    },
    SetBufferScale {
        scale: i32,
    },
    Offset {
        x: i32,
        y: i32,
    },
}

#[derive(Debug)]
pub enum Lifecycle {
    /// Xwayland hooks are present and have not yet configured the surface;
    /// deferred requests queue in FIFO order.
    Unconfigured(VecDeque<SurfaceAction>),
    Ready,
    Destroyed,
}

#[derive(Debug)]
pub struct SurfaceBinding {
    pub server: WlSurface,
    pub host: HostWlSurface,
    pub lifecycle: Lifecycle,
    pub visibility: Visibility,
    /// Mirror view of the currently attached buffer; the commit copy source
    /// and destination.
    pub view: Option<BufferView>,
    pub extension: ExtensionSlot,
}

impl Dispatch<WlCompositor, HostGlobal<HostWlCompositor>> for RelayState {
    fn request(
        state: &mut Self,
        _client: &wayland_server::Client,
        _compositor: &WlCompositor,
        request: wl_compositor::Request,
        host_compositor: &HostGlobal<HostWlCompositor>,
        _dhandle: &DisplayHandle,
        data_init: &mut DataInit<'_, Self>,
    ) {
        match request {
            wl_compositor::Request::CreateSurface { id } => {
                let qh = state.qh.clone();
                let unconfigured = state.hooks.is_some();
                let key = state.objects.insert_with_key(|key| {
                    let server = data_init.init(id, key);
                    let host = host_compositor.create_surface(&qh, key);
                    Object::Surface(SurfaceBinding {
                        server,
                        host,
                        lifecycle: if unconfigured {
                            Lifecycle::Unconfigured(VecDeque::new())
                        } else {
                            Lifecycle::Ready
                        },
                        visibility: Visibility::Show,
                        view: None,
                        extension: None,
                    })
                });

                if let Some(hooks) = state.hooks.clone() {
                    let configure = ConfigureHandle::new(key, state.hook_tx.clone());
                    let Ok(Object::Surface(binding)) = state.objects.get_mut(key) else {
                        unreachable!();
                    };
                    // Xwayland renders pre-scaled; tell the host so it does
                    // not scale a second time. Reverted for unmanaged
                    // surfaces in set_configured.
                    if !state.scale.is_identity() {
                        binding.host.set_buffer_scale(state.scale.factor());
                    }
                    hooks.on_create_surface(
                        &binding.host.clone(),
                        &binding.server.clone(),
                        configure,
                        &mut binding.extension,
                    );
                }
            },
            wl_compositor::Request::CreateRegion { id } => {
                let host_region = host_compositor.create_region(&state.qh, ());
                data_init.init(id, host_region);
            },
            _ => unreachable!(),
        }
    }
}

impl Dispatch<WlRegion, HostWlRegion> for RelayState {
    fn request(
        _state: &mut Self,
        _client: &wayland_server::Client,
        _region: &WlRegion,
        request: wl_region::Request,
        host_region: &HostWlRegion,
        _dhandle: &DisplayHandle,
        _data_init: &mut DataInit<'_, Self>,
    ) {
        match request {
            wl_region::Request::Add {
                x,
                y,
                width,
                height,
            } => host_region.add(x, y, width, height),
            wl_region::Request::Subtract {
                x,
                y,
                width,
                height,
            } => host_region.subtract(x, y, width, height),
            wl_region::Request::Destroy => host_region.destroy(),
            _ => unreachable!(),
        }
    }
}

impl Dispatch<WlCallback, ()> for RelayState {
    fn request(
        _state: &mut Self,
        _client: &wayland_server::Client,
        _callback: &WlCallback,
        _request: <WlCallback as Resource>::Request,
        _data: &(),
        _dhandle: &DisplayHandle,
        _data_init: &mut DataInit<'_, Self>,
    ) {
        unreachable!();
    }
}

impl Dispatch<WlSurface, ObjectKey> for RelayState {
    fn request(
        state: &mut Self,
        _client: &wayland_server::Client,
        _surface: &WlSurface,
        request: wl_surface::Request,
        key: &ObjectKey,
        _dhandle: &DisplayHandle,
        data_init: &mut DataInit<'_, Self>,
    ) {
        let action = match request {
            wl_surface::Request::Destroy => {
                destroy_surface(state, *key);
                return;
            },
            wl_surface::Request::Attach { buffer, x, y } => {
                let buffer = match buffer {
                    Some(buffer) => match buffer.data::<ObjectKey>() {
                        Some(key) => Some(*key),
                        None => log_and_return!(Err(anyhow!(
                            "attached buffer {} has no binding",
                            buffer.id()
                        ))),
                    },
                    None => None,
                };
                SurfaceAction::Attach { buffer, x, y }
            },
            wl_surface::Request::Damage {
                x,
                y,
                width,
                height,
            } => SurfaceAction::Damage {
                x,
                y,
                width,
                height,
            },
            wl_surface::Request::DamageBuffer {
                x,
                y,
                width,
                height,
            } => SurfaceAction::DamageBuffer {
                x,
                y,
                width,
                height,
            },
            wl_surface::Request::Frame { callback } => SurfaceAction::Frame {
                callback: data_init.init(callback, ()),
            },
            wl_surface::Request::SetOpaqueRegion { region } => SurfaceAction::SetOpaqueRegion {
                region: warn_and_return!(translate_region(region.as_ref())),
            },
            wl_surface::Request::SetInputRegion { region } => SurfaceAction::SetInputRegion {
                region: warn_and_return!(translate_region(region.as_ref())),
            },
            wl_surface::Request::Commit => SurfaceAction::Commit,
            wl_surface::Request::SetBufferTransform { transform } => {
                SurfaceAction::SetBufferTransform {
                    transform_raw: u32::from(transform),
                }
            },
            wl_surface::Request::SetBufferScale { scale } => SurfaceAction::SetBufferScale { scale },
            wl_surface::Request::Offset { x, y } => SurfaceAction::Offset { x, y },
            other => {
                debug!("dropping surface request with no host counterpart: {other:?}");
                return;
            },
        };

        route_surface_action(state, *key, action);
    }
}

fn translate_region(region: Option<&WlRegion>) -> Result<Option<HostWlRegion>> {
    region.map(direct_host).transpose()
}

/// Applies immediately when the surface is `Ready`, queues while it is
/// `Unconfigured`, and drops after `Destroyed`.
pub fn route_surface_action(state: &mut RelayState, key: ObjectKey, action: SurfaceAction) {
    match state.objects.get_mut(key) {
        Ok(Object::Surface(binding)) => match &mut binding.lifecycle {
            Lifecycle::Unconfigured(queue) => {
                queue.push_back(action);
                return;
            },
            Lifecycle::Ready => {},
            Lifecycle::Destroyed => {
                trace!("dropping {action:?} on destroyed surface");
                return;
            },
        },
        other => log_and_return!(Err(anyhow!("wl_surface binding missing: {other:?}"))),
    }
    apply_surface_action(state, key, action);
}

fn apply_surface_action(state: &mut RelayState, key: ObjectKey, action: SurfaceAction) {
    let scale = state.scale;
    let (host, visibility) = match state.objects.get(key) {
        Ok(Object::Surface(binding)) => (binding.host.clone(), binding.visibility),
        other => log_and_return!(Err(anyhow!("wl_surface binding missing: {other:?}"))),
    };

    match action {
        SurfaceAction::Attach { buffer, x, y } => {
            let (x, y) = (scale.to_host(x), scale.to_host(y));
            let resolved = match buffer {
                Some(buffer_key) if visibility != Visibility::Hide => {
                    match resolve_buffer(state, buffer_key) {
                        Ok(resolved) => Some(resolved),
                        Err(e) => {
                            warn!("cannot resolve attached buffer: {e:?}");
                            None
                        },
                    }
                },
                _ => None,
            };
            match resolved {
                Some((host_buffer, view)) => {
                    host.attach(Some(&host_buffer), x, y);
                    set_view(state, key, view);
                },
                None => {
                    host.attach(None, x, y);
                    clear_view(state, key);
                },
            }
        },
        SurfaceAction::Damage {
            x,
            y,
            width,
            height,
        } => host.damage(
            scale.to_host(x),
            scale.to_host(y),
            scale.to_host(width),
            scale.to_host(height),
        ),
        // Buffer-space coordinates are not subject to the Xwayland scale.
        SurfaceAction::DamageBuffer {
            x,
            y,
            width,
            height,
        } => host.damage_buffer(x, y, width, height),
        SurfaceAction::Frame { callback } => {
            host.frame(&state.qh, callback);
        },
        SurfaceAction::SetOpaqueRegion { region } => host.set_opaque_region(region.as_ref()),
        SurfaceAction::SetInputRegion { region } => host.set_input_region(region.as_ref()),
        SurfaceAction::Commit => {
            // TODO: narrow the copy to accumulated damage instead of the
            // whole attached range.
            if let Ok(Object::Surface(binding)) = state.objects.get(key) {
                if let Some(view) = &binding.view {
                    if let Err(e) = view.commit_copy() {
                        warn!("commit copy skipped: {e:?}");
                    }
                }
            }
            host.commit();
        },
        SurfaceAction::SetBufferTransform { transform_raw } => {
            match wl_output::Transform::try_from(transform_raw) {
                Ok(transform) => host.set_buffer_transform(transform),
                Err(_) => warn!("unknown buffer transform {transform_raw}"),
            }
        },
        SurfaceAction::SetBufferScale { scale } => host.set_buffer_scale(scale),
        SurfaceAction::Offset { x, y } => host.offset(scale.to_host(x), scale.to_host(y)),
    }
}

fn resolve_buffer(
    state: &mut RelayState,
    buffer_key: ObjectKey,
) -> Result<(wayland_client::protocol::wl_buffer::WlBuffer, Option<BufferView>)> {
    let qh = state.qh.clone();
    match state.objects.get_mut(buffer_key).location(loc!())? {
        Object::Buffer(BufferBinding { kind, .. }) => match kind {
            BufferKind::Direct { host } => Ok((host.clone(), None)),
            BufferKind::Virtual(vbuf) => {
                let (host, view) = vbuf.realize(&qh, buffer_key).location(loc!())?;
                Ok((host, Some(view)))
            },
        },
        other => bail!("attach argument is not a buffer binding: {other:?}"),
    }
}

fn set_view(state: &mut RelayState, key: ObjectKey, view: Option<BufferView>) {
    if let Ok(Object::Surface(binding)) = state.objects.get_mut(key) {
        binding.view = view;
    }
}

fn clear_view(state: &mut RelayState, key: ObjectKey) {
    set_view(state, key, None);
}

fn destroy_surface(state: &mut RelayState, key: ObjectKey) {
    let host = match state.objects.get_mut(key) {
        Ok(Object::Surface(binding)) => {
            binding.lifecycle = Lifecycle::Destroyed;
            binding.view = None;
            binding.host.clone()
        },
        other => log_and_return!(Err(anyhow!("wl_surface binding missing: {other:?}"))),
    };

    if let Some(hooks) = state.hooks.clone() {
        hooks.on_destroy_surface(&host);
    }

    host.destroy();
    state.deferred.defer(&host, key);
}

/// Xwayland decided how the surface is presented; drain the deferred queue
/// in order and run subsequent requests immediately.
pub fn configure_surface(state: &mut RelayState, key: ObjectKey, visibility: Visibility) {
    let scale = state.scale;
    let queue = match state.objects.get_mut(key) {
        Ok(Object::Surface(binding)) => {
            binding.visibility = visibility;
            if visibility == Visibility::Unmanaged && !scale.is_identity() {
                // Cursors and hidden markers are not pre-scaled by Xwayland.
                binding.host.set_buffer_scale(1);
            }
            match &mut binding.lifecycle {
                Lifecycle::Unconfigured(queue) => {
                    let queue = std::mem::take(queue);
                    binding.lifecycle = Lifecycle::Ready;
                    queue
                },
                Lifecycle::Ready => VecDeque::new(),
                Lifecycle::Destroyed => return,
            }
        },
        Err(_) => {
            // The surface can be gone by the time the hook answers.
            debug!("set_configured for an already-removed surface");
            return;
        },
        other => log_and_return!(Err(anyhow!("wl_surface binding missing: {other:?}"))),
    };

    for action in queue {
        apply_surface_action(state, key, action);
    }
}

impl wayland_client::Dispatch<HostWlSurface, ObjectKey> for RelayState {
    fn event(
        state: &mut Self,
        _surface: &HostWlSurface,
        event: host_wl_surface::Event,
        key: &ObjectKey,
        _conn: &wayland_client::Connection,
        _qh: &wayland_client::QueueHandle<Self>,
    ) {
        let server = match state.objects.get(*key) {
            Ok(Object::Surface(binding)) => binding.server.clone(),
            _ => {
                trace!("host surface event after binding removal");
                return;
            },
        };

        match event {
            host_wl_surface::Event::Enter { output } => {
                let output = warn_and_return!(state.objects.to_client(&output));
                server.enter(&output);
            },
            host_wl_surface::Event::Leave { output } => {
                let output = warn_and_return!(state.objects.to_client(&output));
                server.leave(&output);
            },
            host_wl_surface::Event::PreferredBufferScale { factor } => {
                server.preferred_buffer_scale(factor);
            },
            host_wl_surface::Event::PreferredBufferTransform { transform } => {
                server.preferred_buffer_transform(warn_and_return!(convert_wenum(transform)));
            },
            _ => unreachable!(),
        }
    }
}

impl wayland_client::Dispatch<HostWlCallback, WlCallback> for RelayState {
    fn event(
        _state: &mut Self,
        _callback: &HostWlCallback,
        event: wayland_client::protocol::wl_callback::Event,
        server_callback: &WlCallback,
        _conn: &wayland_client::Connection,
        _qh: &wayland_client::QueueHandle<Self>,
    ) {
        match event {
            wayland_client::protocol::wl_callback::Event::Done { callback_data } => {
                // done is a destructor event; the server library deletes the
                // guest callback after sending it.
                server_callback.done(callback_data);
            },
            _ => unreachable!(),
        }
    }
}

impl wayland_client::Dispatch<HostWlRegion, ()> for RelayState {
    fn event(
        _state: &mut Self,
        _region: &HostWlRegion,
        _event: <HostWlRegion as Proxy>::Event,
        _data: &(),
        _conn: &wayland_client::Connection,
        _qh: &wayland_client::QueueHandle<Self>,
    ) {
        unreachable!();
    }
}

impl wayland_client::Dispatch<HostWlCompositor, ()> for RelayState {
    fn event(
        _state: &mut Self,
        _compositor: &HostWlCompositor,
        _event: <HostWlCompositor as Proxy>::Event,
        _data: &(),
        _conn: &wayland_client::Connection,
        _qh: &wayland_client::QueueHandle<Self>,
    ) {
        unreachable!();
    }
}
