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

//! xdg-shell relaying. Host pings and hook-initiated pings share one strict
//! FIFO pong queue per wm_base; toplevel titles get the session tag prefixed
//! so host-side window lists identify relayed windows.

use std::collections::VecDeque;
use std::sync::mpsc;

use wayland_protocols::xdg::shell::client::xdg_popup as host_xdg_popup;
use wayland_protocols::xdg::shell::client::xdg_popup::XdgPopup as HostXdgPopup;
use wayland_protocols::xdg::shell::client::xdg_positioner::XdgPositioner as HostXdgPositioner;
use wayland_protocols::xdg::shell::client::xdg_surface as host_xdg_surface;
use wayland_protocols::xdg::shell::client::xdg_surface::XdgSurface as HostXdgSurface;
use wayland_protocols::xdg::shell::client::xdg_toplevel as host_xdg_toplevel;
use wayland_protocols::xdg::shell::client::xdg_toplevel::XdgToplevel as HostXdgToplevel;
use wayland_protocols::xdg::shell::client::xdg_wm_base as host_xdg_wm_base;
use wayland_protocols::xdg::shell::client::xdg_wm_base::XdgWmBase as HostXdgWmBase;
use wayland_protocols::xdg::shell::server::xdg_popup;
use wayland_protocols::xdg::shell::server::xdg_popup::XdgPopup;
use wayland_protocols::xdg::shell::server::xdg_positioner;
use wayland_protocols::xdg::shell::server::xdg_positioner::XdgPositioner;
use wayland_protocols::xdg::shell::server::xdg_surface;
use wayland_protocols::xdg::shell::server::xdg_surface::XdgSurface;
use wayland_protocols::xdg::shell::server::xdg_toplevel;
use wayland_protocols::xdg::shell::server::xdg_toplevel::XdgToplevel;
use wayland_protocols::xdg::shell::server::xdg_wm_base;
use wayland_protocols::xdg::shell::server::xdg_wm_base::XdgWmBase;
use wayland_server::DataInit;
use wayland_server::Dispatch;
use wayland_server::DisplayHandle;

use crate::objects::Object;
use crate::objects::ObjectKey;
use crate::objects::Pair;
use crate::objects::convert_wenum;
use crate::objects::direct_host;
use crate::prelude::*;
use crate::session::RelayState;

/// What to do when the guest answers a ping. Host pings forward the pong (at
/// the host's serial); hook pings complete the hook's waitable token.
#[derive(Debug)]
pub enum PongAction {
    ForwardToHost { serial: u32 },
    Notify(mpsc::Sender<()>),
}

/// Strict FIFO: each guest pong pops exactly one queued action; a pong with
/// an empty queue is logged and dropped.
#[derive(Debug, Default)]
pub struct PongQueue {
    pending: VecDeque<PongAction>,
}

impl PongQueue {
    pub fn push(&mut self, action: PongAction) {
        self.pending.push_back(action);
    }

    pub fn pop(&mut self) -> Option<PongAction> {
        self.pending.pop_front()
    }

    pub fn len(&self) -> usize {
        self.pending.len()
    }

    pub fn is_empty(&self) -> bool {
        self.pending.is_empty()
    }
}

#[derive(Debug)]
pub struct WmBaseBinding {
    pub server: XdgWmBase,
    pub host: HostXdgWmBase,
    pub pongs: PongQueue,
}

impl Dispatch<XdgWmBase, ObjectKey> for RelayState {
    fn request(
        state: &mut Self,
        _client: &wayland_server::Client,
        _wm_base: &XdgWmBase,
        request: xdg_wm_base::Request,
        key: &ObjectKey,
        _dhandle: &DisplayHandle,
        data_init: &mut DataInit<'_, Self>,
    ) {
        let host_wm_base = match state.objects.get(*key) {
            Ok(Object::WmBase(binding)) => binding.host.clone(),
            // Unreachable by construction: the binding outlives the resource
            // (deferred removal), and requests stop at the destructor.
            other => log_and_return!(Err(anyhow!("xdg_wm_base binding missing: {other:?}"))),
        };
        let qh = state.qh.clone();

        match request {
            xdg_wm_base::Request::Destroy => {
                host_wm_base.destroy();
                state.deferred.defer(&host_wm_base, *key);
                if state.wm_base == Some(*key) {
                    state.wm_base = None;
                }
            },
            xdg_wm_base::Request::CreatePositioner { id } => {
                let host_positioner = host_wm_base.create_positioner(&qh, ());
                data_init.init(id, host_positioner);
            },
            xdg_wm_base::Request::GetXdgSurface { id, surface } => {
                let host_surface = match state.objects.to_host(&surface) {
                    Ok(host_surface) => host_surface,
                    Err(err) => {
                        data_init.init(id, ObjectKey::INVALID);
                        log_and_return!(Err(err))
                    },
                };
                state.objects.insert_with_key(|key| {
                    let server = data_init.init(id, key);
                    let host = host_wm_base.get_xdg_surface(&host_surface, &qh, key);
                    Object::XdgSurface(Pair { server, host })
                });
            },
            xdg_wm_base::Request::Pong { serial } => {
                let action = match state.objects.get_mut(*key) {
                    Ok(Object::WmBase(binding)) => binding.pongs.pop(),
                    other => {
                        log_and_return!(Err(anyhow!("xdg_wm_base binding missing: {other:?}")))
                    },
                };
                match action {
                    Some(PongAction::ForwardToHost { serial }) => host_wm_base.pong(serial),
                    Some(PongAction::Notify(done)) => {
                        let _ = done.send(());
                    },
                    None => warn!("guest pong({serial}) with no outstanding ping; dropping"),
                }
            },
            _ => unreachable!(),
        }
    }
}

impl Dispatch<XdgPositioner, HostXdgPositioner> for RelayState {
    fn request(
        _state: &mut Self,
        _client: &wayland_server::Client,
        _positioner: &XdgPositioner,
        request: xdg_positioner::Request,
        host: &HostXdgPositioner,
        _dhandle: &DisplayHandle,
        _data_init: &mut DataInit<'_, Self>,
    ) {
        match request {
            xdg_positioner::Request::SetSize { width, height } => host.set_size(width, height),
            xdg_positioner::Request::SetAnchorRect {
                x,
                y,
                width,
                height,
            } => host.set_anchor_rect(x, y, width, height),
            xdg_positioner::Request::SetAnchor { anchor } => {
                host.set_anchor(warn_and_return!(convert_wenum(anchor)));
            },
            xdg_positioner::Request::SetGravity { gravity } => {
                host.set_gravity(warn_and_return!(convert_wenum(gravity)));
            },
            xdg_positioner::Request::SetConstraintAdjustment {
                constraint_adjustment,
            } => {
                host.set_constraint_adjustment(warn_and_return!(convert_wenum(
                    constraint_adjustment
                )));
            },
            xdg_positioner::Request::SetOffset { x, y } => host.set_offset(x, y),
            xdg_positioner::Request::SetReactive => host.set_reactive(),
            xdg_positioner::Request::SetParentSize {
                parent_width,
                parent_height,
            } => host.set_parent_size(parent_width, parent_height),
            xdg_positioner::Request::SetParentConfigure { serial } => {
                host.set_parent_configure(serial)
            },
            xdg_positioner::Request::Destroy => host.destroy(),
            _ => unreachable!(),
        }
    }
}

impl Dispatch<XdgSurface, ObjectKey> for RelayState {
    fn request(
        state: &mut Self,
        _client: &wayland_server::Client,
        _xdg_surface: &XdgSurface,
        request: xdg_surface::Request,
        key: &ObjectKey,
        _dhandle: &DisplayHandle,
        data_init: &mut DataInit<'_, Self>,
    ) {
        let host_result = state.objects.get(*key);

        match request {
            xdg_surface::Request::Destroy => {
                let host_xdg_surface = match host_result {
                    Ok(Object::XdgSurface(pair)) => pair.host.clone(),
                    other => {
                        log_and_return!(Err(anyhow!("xdg_surface binding missing: {other:?}")))
                    },
                };
                host_xdg_surface.destroy();
                state.deferred.defer(&host_xdg_surface, *key);
            },
            xdg_surface::Request::GetToplevel { id } => {
                let host_xdg_surface = match host_result {
                    Ok(Object::XdgSurface(pair)) => pair.host.clone(),
                    other => {
                        data_init.init(id, ObjectKey::INVALID);
                        log_and_return!(Err(anyhow!("xdg_surface binding missing: {other:?}")))
                    },
                };
                let qh = state.qh.clone();
                state.objects.insert_with_key(|key| {
                    let server = data_init.init(id, key);
                    let host = host_xdg_surface.get_toplevel(&qh, key);
                    Object::XdgToplevel(Pair { server, host })
                });
            },
            xdg_surface::Request::GetPopup {
                id,
                parent,
                positioner,
            } => {
                let host_xdg_surface = match host_result {
                    Ok(Object::XdgSurface(pair)) => pair.host.clone(),
                    other => {
                        data_init.init(id, ObjectKey::INVALID);
                        log_and_return!(Err(anyhow!("xdg_surface binding missing: {other:?}")))
                    },
                };
                let qh = state.qh.clone();
                let host_parent = match parent {
                    Some(parent) => match state.objects.to_host(&parent) {
                        Ok(host_parent) => Some(host_parent),
                        Err(err) => {
                            data_init.init(id, ObjectKey::INVALID);
                            log_and_return!(Err(err))
                        },
                    },
                    None => None,
                };
                let host_positioner: HostXdgPositioner = match direct_host(&positioner) {
                    Ok(host_positioner) => host_positioner,
                    Err(err) => {
                        data_init.init(id, ObjectKey::INVALID);
                        log_and_return!(Err(err))
                    },
                };
                state.objects.insert_with_key(|key| {
                    let server = data_init.init(id, key);
                    let host = host_xdg_surface.get_popup(
                        host_parent.as_ref(),
                        &host_positioner,
                        &qh,
                        key,
                    );
                    Object::XdgPopup(Pair { server, host })
                });
            },
            xdg_surface::Request::SetWindowGeometry {
                x,
                y,
                width,
                height,
            } => {
                let host_xdg_surface = match host_result {
                    Ok(Object::XdgSurface(pair)) => pair.host.clone(),
                    other => {
                        log_and_return!(Err(anyhow!("xdg_surface binding missing: {other:?}")))
                    },
                };
                host_xdg_surface.set_window_geometry(x, y, width, height)
            },
            xdg_surface::Request::AckConfigure { serial } => {
                let host_xdg_surface = match host_result {
                    Ok(Object::XdgSurface(pair)) => pair.host.clone(),
                    other => {
                        log_and_return!(Err(anyhow!("xdg_surface binding missing: {other:?}")))
                    },
                };
                host_xdg_surface.ack_configure(serial)
            },
            _ => unreachable!(),
        }
    }
}

impl Dispatch<XdgToplevel, ObjectKey> for RelayState {
    fn request(
        state: &mut Self,
        _client: &wayland_server::Client,
        _toplevel: &XdgToplevel,
        request: xdg_toplevel::Request,
        key: &ObjectKey,
        _dhandle: &DisplayHandle,
        _data_init: &mut DataInit<'_, Self>,
    ) {
        let host = match state.objects.get(*key) {
            Ok(Object::XdgToplevel(pair)) => pair.host.clone(),
            other => log_and_return!(Err(anyhow!("xdg_toplevel binding missing: {other:?}"))),
        };

        match request {
            xdg_toplevel::Request::Destroy => {
                host.destroy();
                state.deferred.defer(&host, *key);
            },
            xdg_toplevel::Request::SetParent { parent } => {
                let host_parent = match parent {
                    Some(parent) => Some(warn_and_return!(state.objects.to_host(&parent))),
                    None => None,
                };
                host.set_parent(host_parent.as_ref());
            },
            xdg_toplevel::Request::SetTitle { title } => {
                host.set_title(format!("{}{}", state.tag, title));
            },
            xdg_toplevel::Request::SetAppId { app_id } => host.set_app_id(app_id),
            xdg_toplevel::Request::ShowWindowMenu { seat, serial, x, y } => {
                let host_seat = warn_and_return!(state.objects.to_host(&seat));
                host.show_window_menu(&host_seat, serial, x, y);
            },
            xdg_toplevel::Request::Move { seat, serial } => {
                let host_seat = warn_and_return!(state.objects.to_host(&seat));
                host._move(&host_seat, serial);
            },
            xdg_toplevel::Request::Resize {
                seat,
                serial,
                edges,
            } => {
                let host_seat = warn_and_return!(state.objects.to_host(&seat));
                host.resize(&host_seat, serial, warn_and_return!(convert_wenum(edges)));
            },
            xdg_toplevel::Request::SetMaxSize { width, height } => {
                host.set_max_size(width, height)
            },
            xdg_toplevel::Request::SetMinSize { width, height } => {
                host.set_min_size(width, height)
            },
            xdg_toplevel::Request::SetMaximized => host.set_maximized(),
            xdg_toplevel::Request::UnsetMaximized => host.unset_maximized(),
            xdg_toplevel::Request::SetFullscreen { output } => {
                let host_output = match output {
                    Some(output) => Some(warn_and_return!(state.objects.to_host(&output))),
                    None => None,
                };
                host.set_fullscreen(host_output.as_ref());
            },
            xdg_toplevel::Request::UnsetFullscreen => host.unset_fullscreen(),
            xdg_toplevel::Request::SetMinimized => host.set_minimized(),
            _ => unreachable!(),
        }
    }
}

impl Dispatch<XdgPopup, ObjectKey> for RelayState {
    fn request(
        state: &mut Self,
        _client: &wayland_server::Client,
        _popup: &XdgPopup,
        request: xdg_popup::Request,
        key: &ObjectKey,
        _dhandle: &DisplayHandle,
        _data_init: &mut DataInit<'_, Self>,
    ) {
        let host = match state.objects.get(*key) {
            Ok(Object::XdgPopup(pair)) => pair.host.clone(),
            other => log_and_return!(Err(anyhow!("xdg_popup binding missing: {other:?}"))),
        };

        match request {
            xdg_popup::Request::Destroy => {
                host.destroy();
                state.deferred.defer(&host, *key);
            },
            xdg_popup::Request::Grab { seat, serial } => {
                let host_seat = warn_and_return!(state.objects.to_host(&seat));
                host.grab(&host_seat, serial);
            },
            xdg_popup::Request::Reposition { positioner, token } => {
                let host_positioner: HostXdgPositioner =
                    warn_and_return!(direct_host(&positioner));
                host.reposition(&host_positioner, token);
            },
            _ => unreachable!(),
        }
    }
}

impl wayland_client::Dispatch<HostXdgWmBase, ObjectKey> for RelayState {
    fn event(
        state: &mut Self,
        _wm_base: &HostXdgWmBase,
        event: host_xdg_wm_base::Event,
        key: &ObjectKey,
        _conn: &wayland_client::Connection,
        _qh: &wayland_client::QueueHandle<Self>,
    ) {
        match event {
            host_xdg_wm_base::Event::Ping { serial } => {
                let server = match state.objects.get_mut(*key) {
                    Ok(Object::WmBase(binding)) => {
                        binding.pongs.push(PongAction::ForwardToHost { serial });
                        binding.server.clone()
                    },
                    _ => {
                        trace!("host ping after wm_base binding removal");
                        return;
                    },
                };
                server.ping(serial);
            },
            _ => unreachable!(),
        }
    }
}

impl wayland_client::Dispatch<HostXdgPositioner, ()> for RelayState {
    fn event(
        _state: &mut Self,
        _positioner: &HostXdgPositioner,
        _event: <HostXdgPositioner as wayland_client::Proxy>::Event,
        _data: &(),
        _conn: &wayland_client::Connection,
        _qh: &wayland_client::QueueHandle<Self>,
    ) {
        unreachable!();
    }
}

impl wayland_client::Dispatch<HostXdgSurface, ObjectKey> for RelayState {
    fn event(
        state: &mut Self,
        _xdg_surface: &HostXdgSurface,
        event: host_xdg_surface::Event,
        key: &ObjectKey,
        _conn: &wayland_client::Connection,
        _qh: &wayland_client::QueueHandle<Self>,
    ) {
        let server = match state.objects.get(*key) {
            Ok(Object::XdgSurface(pair)) => pair.server.clone(),
            _ => {
                trace!("host xdg_surface event after binding removal");
                return;
            },
        };

        match event {
            host_xdg_surface::Event::Configure { serial } => server.configure(serial),
            _ => unreachable!(),
        }
    }
}

impl wayland_client::Dispatch<HostXdgToplevel, ObjectKey> for RelayState {
    fn event(
        state: &mut Self,
        _toplevel: &HostXdgToplevel,
        event: host_xdg_toplevel::Event,
        key: &ObjectKey,
        _conn: &wayland_client::Connection,
        _qh: &wayland_client::QueueHandle<Self>,
    ) {
        let server = match state.objects.get(*key) {
            Ok(Object::XdgToplevel(pair)) => pair.server.clone(),
            _ => {
                trace!("host xdg_toplevel event after binding removal");
                return;
            },
        };

        match event {
            host_xdg_toplevel::Event::Configure {
                width,
                height,
                states,
            } => server.configure(width, height, states),
            host_xdg_toplevel::Event::Close => server.close(),
            host_xdg_toplevel::Event::ConfigureBounds { width, height } => {
                server.configure_bounds(width, height)
            },
            host_xdg_toplevel::Event::WmCapabilities { capabilities } => {
                server.wm_capabilities(capabilities)
            },
            other => debug!("unhandled host xdg_toplevel event: {other:?}"),
        }
    }
}

impl wayland_client::Dispatch<HostXdgPopup, ObjectKey> for RelayState {
    fn event(
        state: &mut Self,
        _popup: &HostXdgPopup,
        event: host_xdg_popup::Event,
        key: &ObjectKey,
        _conn: &wayland_client::Connection,
        _qh: &wayland_client::QueueHandle<Self>,
    ) {
        let server = match state.objects.get(*key) {
            Ok(Object::XdgPopup(pair)) => pair.server.clone(),
            _ => {
                trace!("host xdg_popup event after binding removal");
                return;
            },
        };

        match event {
            host_xdg_popup::Event::Configure {
                x,
                y,
                width,
                height,
            } => server.configure(x, y, width, height),
            host_xdg_popup::Event::PopupDone => server.popup_done(),
            host_xdg_popup::Event::Repositioned { token } => server.repositioned(token),
            other => debug!("unhandled host xdg_popup event: {other:?}"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn pongs_pop_in_fifo_order() {
        let mut queue = PongQueue::default();
        queue.push(PongAction::ForwardToHost { serial: 1 });
        queue.push(PongAction::ForwardToHost { serial: 2 });
        queue.push(PongAction::ForwardToHost { serial: 3 });

        for expected in 1..=3 {
            match queue.pop() {
                Some(PongAction::ForwardToHost { serial }) => assert_eq!(serial, expected),
                other => panic!("expected host pong {expected}, got {other:?}"),
            }
        }
        assert!(queue.pop().is_none());
    }

    #[test]
    fn hook_pings_interleave_with_host_pings() {
        let mut queue = PongQueue::default();
        let (tx, rx) = mpsc::channel();
        queue.push(PongAction::ForwardToHost { serial: 7 });
        queue.push(PongAction::Notify(tx));

        assert!(matches!(
            queue.pop(),
            Some(PongAction::ForwardToHost { serial: 7 })
        ));
        match queue.pop() {
            Some(PongAction::Notify(done)) => done.send(()).unwrap(),
            other => panic!("expected notify entry, got {other:?}"),
        }
        assert!(rx.try_recv().is_ok());
    }

    #[test]
    fn stray_pong_finds_empty_queue() {
        let mut queue = PongQueue::default();
        assert!(queue.pop().is_none());
        assert!(queue.is_empty());
    }
}
