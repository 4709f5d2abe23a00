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

//! Seat, pointer, and keyboard relaying. Touch is not relayed: the
//! capability bits are filtered before the guest sees them, and a guest that
//! requests touch anyway ends the session.

use std::os::fd::AsFd;

use wayland_client::protocol::wl_keyboard as host_wl_keyboard;
use wayland_client::protocol::wl_keyboard::WlKeyboard as HostWlKeyboard;
use wayland_client::protocol::wl_pointer as host_wl_pointer;
use wayland_client::protocol::wl_pointer::WlPointer as HostWlPointer;
use wayland_client::protocol::wl_seat as host_wl_seat;
use wayland_client::protocol::wl_seat::WlSeat as HostWlSeat;
use wayland_server::DataInit;
use wayland_server::Dispatch;
use wayland_server::DisplayHandle;
use wayland_server::Resource;
use wayland_server::protocol::wl_keyboard;
use wayland_server::protocol::wl_keyboard::WlKeyboard;
use wayland_server::protocol::wl_pointer;
use wayland_server::protocol::wl_pointer::WlPointer;
use wayland_server::protocol::wl_seat;
use wayland_server::protocol::wl_seat::WlSeat;
use wayland_server::protocol::wl_touch::WlTouch;

use crate::objects::Object;
use crate::objects::ObjectKey;
use crate::objects::Pair;
use crate::objects::convert_wenum;
use crate::prelude::*;
use crate::xwayland::ForwardEvent;

use crate::session::RelayState;

impl Dispatch<WlSeat, ObjectKey> for RelayState {
    fn request(
        state: &mut Self,
        _client: &wayland_server::Client,
        seat: &WlSeat,
        request: wl_seat::Request,
        key: &ObjectKey,
        _dhandle: &DisplayHandle,
        data_init: &mut DataInit<'_, Self>,
    ) {
        let host_seat = match state.objects.get(*key) {
            Ok(Object::Seat(pair)) => pair.host.clone(),
            other => {
                let err = anyhow!("wl_seat binding missing: {other:?}");
                match request {
                    wl_seat::Request::GetPointer { id } => {
                        data_init.init(id, ObjectKey::INVALID);
                    },
                    wl_seat::Request::GetKeyboard { id } => {
                        data_init.init(id, ObjectKey::INVALID);
                    },
                    wl_seat::Request::GetTouch { id } => {
                        data_init.init(id, ObjectKey::INVALID);
                    },
                    _ => {},
                }
                log_and_return!(Err(err))
            },
        };
        let qh = state.qh.clone();

        match request {
            wl_seat::Request::GetPointer { id } => {
                state.objects.insert_with_key(|key| {
                    let server = data_init.init(id, key);
                    let host = host_seat.get_pointer(&qh, key);
                    Object::Pointer(Pair { server, host })
                });
            },
            wl_seat::Request::GetKeyboard { id } => {
                state.objects.insert_with_key(|key| {
                    let server = data_init.init(id, key);
                    let host = host_seat.get_keyboard(&qh, key);
                    Object::Keyboard(Pair { server, host })
                });
            },
            wl_seat::Request::GetTouch { id } => {
                // Touch capability is never advertised; a guest asking for it
                // is outside the protocol we relay.
                data_init.init(id, ObjectKey::INVALID);
                seat.post_error(wl_seat::Error::MissingCapability, "touch is not relayed");
                state.fail(SessionError::UnsupportedFeature("wl_touch"));
            },
            wl_seat::Request::Release => {
                host_seat.release();
                state.deferred.defer(&host_seat, *key);
            },
            _ => unreachable!(),
        }
    }
}

impl Dispatch<WlTouch, ObjectKey> for RelayState {
    fn request(
        _state: &mut Self,
        _client: &wayland_server::Client,
        _touch: &WlTouch,
        _request: <WlTouch as Resource>::Request,
        _key: &ObjectKey,
        _dhandle: &DisplayHandle,
        _data_init: &mut DataInit<'_, Self>,
    ) {
        // Only reachable on a session already being torn down for
        // UnsupportedFeature.
    }
}

impl Dispatch<WlPointer, ObjectKey> for RelayState {
    fn request(
        state: &mut Self,
        _client: &wayland_server::Client,
        _pointer: &WlPointer,
        request: wl_pointer::Request,
        key: &ObjectKey,
        _dhandle: &DisplayHandle,
        _data_init: &mut DataInit<'_, Self>,
    ) {
        let host_pointer = match state.objects.get(*key) {
            Ok(Object::Pointer(pair)) => pair.host.clone(),
            other => log_and_return!(Err(anyhow!("wl_pointer binding missing: {other:?}"))),
        };

        match request {
            wl_pointer::Request::SetCursor {
                serial,
                surface,
                hotspot_x,
                hotspot_y,
            } => {
                // Cursor surfaces and hotspots are not rescaled.
                let host_surface = match surface {
                    Some(surface) => Some(warn_and_return!(state.objects.to_host(&surface))),
                    None => None,
                };
                host_pointer.set_cursor(serial, host_surface.as_ref(), hotspot_x, hotspot_y);
            },
            wl_pointer::Request::Release => {
                host_pointer.release();
                state.deferred.defer(&host_pointer, *key);
            },
            _ => unreachable!(),
        }
    }
}

impl Dispatch<WlKeyboard, ObjectKey> for RelayState {
    fn request(
        state: &mut Self,
        _client: &wayland_server::Client,
        _keyboard: &WlKeyboard,
        request: wl_keyboard::Request,
        key: &ObjectKey,
        _dhandle: &DisplayHandle,
        _data_init: &mut DataInit<'_, Self>,
    ) {
        match request {
            wl_keyboard::Request::Release => {
                let host_keyboard = match state.objects.get(*key) {
                    Ok(Object::Keyboard(pair)) => pair.host.clone(),
                    other => {
                        log_and_return!(Err(anyhow!("wl_keyboard binding missing: {other:?}")))
                    },
                };
                host_keyboard.release();
                state.deferred.defer(&host_keyboard, *key);
            },
            _ => unreachable!(),
        }
    }
}

impl wayland_client::Dispatch<HostWlSeat, ObjectKey> for RelayState {
    fn event(
        state: &mut Self,
        _seat: &HostWlSeat,
        event: host_wl_seat::Event,
        key: &ObjectKey,
        _conn: &wayland_client::Connection,
        _qh: &wayland_client::QueueHandle<Self>,
    ) {
        let server = match state.objects.get(*key) {
            Ok(Object::Seat(pair)) => pair.server.clone(),
            _ => {
                trace!("host seat event after binding removal");
                return;
            },
        };

        match event {
            host_wl_seat::Event::Capabilities { capabilities } => {
                let relayed = wl_seat::Capability::Pointer | wl_seat::Capability::Keyboard;
                let filtered =
                    wl_seat::Capability::from_bits_truncate(u32::from(capabilities)) & relayed;
                server.capabilities(filtered);
            },
            host_wl_seat::Event::Name { name } => server.name(name),
            other => debug!("unhandled host seat event: {other:?}"),
        }
    }
}

impl wayland_client::Dispatch<HostWlPointer, ObjectKey> for RelayState {
    fn event(
        state: &mut Self,
        _pointer: &HostWlPointer,
        event: host_wl_pointer::Event,
        key: &ObjectKey,
        _conn: &wayland_client::Connection,
        _qh: &wayland_client::QueueHandle<Self>,
    ) {
        let server = match state.objects.get(*key) {
            Ok(Object::Pointer(pair)) => pair.server.clone(),
            _ => {
                trace!("host pointer event after binding removal");
                return;
            },
        };
        let scale = state.scale;

        match event {
            host_wl_pointer::Event::Enter {
                serial,
                surface,
                surface_x,
                surface_y,
            } => {
                state.last_serial = serial;
                let guest_surface = warn_and_return!(state.objects.to_client(&surface));
                let (x, y) = scale.point_to_client(surface_x, surface_y);
                let forward = {
                    let server = server.clone();
                    let guest_surface = guest_surface.clone();
                    ForwardEvent::new(move || server.enter(serial, &guest_surface, x, y))
                };
                match state.hooks.clone() {
                    Some(hooks) => hooks.on_pointer_entry(&guest_surface, forward),
                    None => forward.send(),
                }
            },
            host_wl_pointer::Event::Leave { serial, surface } => {
                state.last_serial = serial;
                let guest_surface = warn_and_return!(state.objects.to_client(&surface));
                server.leave(serial, &guest_surface);
            },
            host_wl_pointer::Event::Motion {
                time,
                surface_x,
                surface_y,
            } => {
                let (x, y) = scale.point_to_client(surface_x, surface_y);
                server.motion(time, x, y);
            },
            host_wl_pointer::Event::Button {
                serial,
                time,
                button,
                state: button_state,
            } => {
                state.last_serial = serial;
                server.button(serial, time, button, warn_and_return!(convert_wenum(button_state)));
            },
            host_wl_pointer::Event::Axis { time, axis, value } => {
                server.axis(time, warn_and_return!(convert_wenum(axis)), value);
            },
            host_wl_pointer::Event::Frame => server.frame(),
            host_wl_pointer::Event::AxisSource { axis_source } => {
                server.axis_source(warn_and_return!(convert_wenum(axis_source)));
            },
            host_wl_pointer::Event::AxisStop { time, axis } => {
                server.axis_stop(time, warn_and_return!(convert_wenum(axis)));
            },
            host_wl_pointer::Event::AxisDiscrete { axis, discrete } => {
                server.axis_discrete(warn_and_return!(convert_wenum(axis)), discrete);
            },
            host_wl_pointer::Event::AxisValue120 { axis, value120 } => {
                server.axis_value120(warn_and_return!(convert_wenum(axis)), value120);
            },
            other => debug!("unhandled host pointer event: {other:?}"),
        }
    }
}

impl wayland_client::Dispatch<HostWlKeyboard, ObjectKey> for RelayState {
    fn event(
        state: &mut Self,
        _keyboard: &HostWlKeyboard,
        event: host_wl_keyboard::Event,
        key: &ObjectKey,
        _conn: &wayland_client::Connection,
        _qh: &wayland_client::QueueHandle<Self>,
    ) {
        let server = match state.objects.get(*key) {
            Ok(Object::Keyboard(pair)) => pair.server.clone(),
            _ => {
                trace!("host keyboard event after binding removal");
                return;
            },
        };

        match event {
            host_wl_keyboard::Event::Keymap { format, fd, size } => {
                server.keymap(warn_and_return!(convert_wenum(format)), fd.as_fd(), size);
                // fd dropped here: ownership of the wire copy moved to the
                // guest message.
            },
            host_wl_keyboard::Event::Enter {
                serial,
                surface,
                keys,
            } => {
                state.last_serial = serial;
                let guest_surface = warn_and_return!(state.objects.to_client(&surface));
                let forward = {
                    let server = server.clone();
                    let guest_surface = guest_surface.clone();
                    ForwardEvent::new(move || server.enter(serial, &guest_surface, keys))
                };
                match state.hooks.clone() {
                    Some(hooks) => hooks.on_keyboard_entry(&guest_surface, forward),
                    None => forward.send(),
                }
            },
            host_wl_keyboard::Event::Leave { serial, surface } => {
                state.last_serial = serial;
                let guest_surface = warn_and_return!(state.objects.to_client(&surface));
                if let Some(hooks) = state.hooks.clone() {
                    hooks.on_keyboard_leave(&guest_surface);
                }
                server.leave(serial, &guest_surface);
            },
            host_wl_keyboard::Event::Key {
                serial,
                time,
                key,
                state: key_state,
            } => {
                state.last_serial = serial;
                server.key(serial, time, key, warn_and_return!(convert_wenum(key_state)));
            },
            host_wl_keyboard::Event::Modifiers {
                serial,
                mods_depressed,
                mods_latched,
                mods_locked,
                group,
            } => {
                state.last_serial = serial;
                server.modifiers(serial, mods_depressed, mods_latched, mods_locked, group);
            },
            host_wl_keyboard::Event::RepeatInfo { rate, delay } => {
                server.repeat_info(rate, delay);
            },
            other => debug!("unhandled host keyboard event: {other:?}"),
        }
    }
}
