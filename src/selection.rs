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

//! Clipboard, drag-and-drop, and primary-selection relaying.
//!
//! Three near-identical flows: wl_data_device_manager, the Zwp
//! primary-selection protocol, and the legacy GTK variant. GTK and Zwp are
//! wire-compatible after a rename, so both guest-facing globals are backed by
//! the host's Zwp global; those bindings pair different interfaces and are
//! excluded from the generic translation functions.
//!
//! Mime types cross the namespace boundary here: guest-advertised types are
//! prefixed host-ward, host-advertised types are stripped guest-ward, and
//! types from a foreign namespace never reach the guest at all.

use std::os::fd::AsFd;
use std::sync::OnceLock;

use wayland_client::Proxy;
use wayland_client::protocol::wl_data_device as host_wl_data_device;
use wayland_client::protocol::wl_data_device::WlDataDevice as HostWlDataDevice;
use wayland_client::protocol::wl_data_device_manager::WlDataDeviceManager as HostWlDataDeviceManager;
use wayland_client::protocol::wl_data_offer as host_wl_data_offer;
use wayland_client::protocol::wl_data_offer::WlDataOffer as HostWlDataOffer;
use wayland_client::protocol::wl_data_source as host_wl_data_source;
use wayland_client::protocol::wl_data_source::WlDataSource as HostWlDataSource;
use wayland_protocols::wp::primary_selection::zv1::client::zwp_primary_selection_device_v1 as host_primary_device;
use wayland_protocols::wp::primary_selection::zv1::client::zwp_primary_selection_device_v1::ZwpPrimarySelectionDeviceV1 as HostPrimaryDevice;
use wayland_protocols::wp::primary_selection::zv1::client::zwp_primary_selection_device_manager_v1::ZwpPrimarySelectionDeviceManagerV1 as HostPrimaryManager;
use wayland_protocols::wp::primary_selection::zv1::client::zwp_primary_selection_offer_v1 as host_primary_offer;
use wayland_protocols::wp::primary_selection::zv1::client::zwp_primary_selection_offer_v1::ZwpPrimarySelectionOfferV1 as HostPrimaryOffer;
use wayland_protocols::wp::primary_selection::zv1::client::zwp_primary_selection_source_v1 as host_primary_source;
use wayland_protocols::wp::primary_selection::zv1::client::zwp_primary_selection_source_v1::ZwpPrimarySelectionSourceV1 as HostPrimarySource;
use wayland_protocols::wp::primary_selection::zv1::server::zwp_primary_selection_device_manager_v1;
use wayland_protocols::wp::primary_selection::zv1::server::zwp_primary_selection_device_manager_v1::ZwpPrimarySelectionDeviceManagerV1;
use wayland_protocols::wp::primary_selection::zv1::server::zwp_primary_selection_device_v1;
use wayland_protocols::wp::primary_selection::zv1::server::zwp_primary_selection_device_v1::ZwpPrimarySelectionDeviceV1;
use wayland_protocols::wp::primary_selection::zv1::server::zwp_primary_selection_offer_v1;
use wayland_protocols::wp::primary_selection::zv1::server::zwp_primary_selection_offer_v1::ZwpPrimarySelectionOfferV1;
use wayland_protocols::wp::primary_selection::zv1::server::zwp_primary_selection_source_v1;
use wayland_protocols::wp::primary_selection::zv1::server::zwp_primary_selection_source_v1::ZwpPrimarySelectionSourceV1;
use wayland_protocols_misc::gtk_primary_selection::server::gtk_primary_selection_device;
use wayland_protocols_misc::gtk_primary_selection::server::gtk_primary_selection_device::GtkPrimarySelectionDevice;
use wayland_protocols_misc::gtk_primary_selection::server::gtk_primary_selection_device_manager;
use wayland_protocols_misc::gtk_primary_selection::server::gtk_primary_selection_device_manager::GtkPrimarySelectionDeviceManager;
use wayland_protocols_misc::gtk_primary_selection::server::gtk_primary_selection_offer;
use wayland_protocols_misc::gtk_primary_selection::server::gtk_primary_selection_offer::GtkPrimarySelectionOffer;
use wayland_protocols_misc::gtk_primary_selection::server::gtk_primary_selection_source;
use wayland_protocols_misc::gtk_primary_selection::server::gtk_primary_selection_source::GtkPrimarySelectionSource;
use wayland_server::DataInit;
use wayland_server::Dispatch;
use wayland_server::DisplayHandle;
use wayland_server::Resource;
use wayland_server::protocol::wl_data_device;
use wayland_server::protocol::wl_data_device::WlDataDevice;
use wayland_server::protocol::wl_data_device_manager;
use wayland_server::protocol::wl_data_device_manager::WlDataDeviceManager;
use wayland_server::protocol::wl_data_offer;
use wayland_server::protocol::wl_data_offer::WlDataOffer;
use wayland_server::protocol::wl_data_source;
use wayland_server::protocol::wl_data_source::WlDataSource;

use crate::objects::Object;
use crate::objects::ObjectKey;
use crate::objects::Pair;
use crate::objects::convert_wenum;
use crate::prelude::*;
use crate::registry::HostGlobal;
use crate::session::RelayState;

/// The two guest-facing renditions of the host's primary-selection global.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum PrimaryFlavor {
    Zwp,
    Gtk,
}

#[derive(Debug)]
pub enum PrimaryDeviceBinding {
    Zwp(Pair<ZwpPrimarySelectionDeviceV1, HostPrimaryDevice>),
    Gtk(Pair<GtkPrimarySelectionDevice, HostPrimaryDevice>),
}

impl PrimaryDeviceBinding {
    pub fn host(&self) -> &HostPrimaryDevice {
        match self {
            Self::Zwp(pair) => &pair.host,
            Self::Gtk(pair) => &pair.host,
        }
    }

    fn flavor(&self) -> PrimaryFlavor {
        match self {
            Self::Zwp(_) => PrimaryFlavor::Zwp,
            Self::Gtk(_) => PrimaryFlavor::Gtk,
        }
    }
}

#[derive(Debug)]
pub enum PrimarySourceBinding {
    Zwp(Pair<ZwpPrimarySelectionSourceV1, HostPrimarySource>),
    Gtk(Pair<GtkPrimarySelectionSource, HostPrimarySource>),
}

impl PrimarySourceBinding {
    pub fn host(&self) -> &HostPrimarySource {
        match self {
            Self::Zwp(pair) => &pair.host,
            Self::Gtk(pair) => &pair.host,
        }
    }
}

#[derive(Debug)]
pub enum PrimaryOfferBinding {
    Zwp(Pair<ZwpPrimarySelectionOfferV1, HostPrimaryOffer>),
    Gtk(Pair<GtkPrimarySelectionOffer, HostPrimaryOffer>),
}

impl PrimaryOfferBinding {
    pub fn host(&self) -> &HostPrimaryOffer {
        match self {
            Self::Zwp(pair) => &pair.host,
            Self::Gtk(pair) => &pair.host,
        }
    }

    fn offer(&self, mime_type: String) {
        match self {
            Self::Zwp(pair) => pair.server.offer(mime_type),
            Self::Gtk(pair) => pair.server.offer(mime_type),
        }
    }
}

/// User data of host-created offer proxies. The binding key only exists once
/// the introducing `data_offer` event has been handled, which the wire order
/// guarantees happens before any event on the offer itself.
#[derive(Debug, Default)]
pub struct OfferData {
    key: OnceLock<ObjectKey>,
}

impl OfferData {
    pub fn key(&self) -> Option<ObjectKey> {
        self.key.get().copied()
    }

    fn set(&self, key: ObjectKey) {
        let _ = self.key.set(key);
    }
}

fn offer_key<P>(proxy: &P) -> Result<ObjectKey>
where
    P: Proxy,
{
    proxy
        .data::<OfferData>()
        .and_then(OfferData::key)
        .ok_or(anyhow!("host offer {} has no binding yet", proxy.id()))
}

// ---------------------------------------------------------------------------
// wl_data_device_manager flow
// ---------------------------------------------------------------------------

impl Dispatch<WlDataDeviceManager, HostGlobal<HostWlDataDeviceManager>> for RelayState {
    fn request(
        state: &mut Self,
        _client: &wayland_server::Client,
        _manager: &WlDataDeviceManager,
        request: wl_data_device_manager::Request,
        host_manager: &HostGlobal<HostWlDataDeviceManager>,
        _dhandle: &DisplayHandle,
        data_init: &mut DataInit<'_, Self>,
    ) {
        let qh = state.qh.clone();
        match request {
            wl_data_device_manager::Request::CreateDataSource { id } => {
                let host_manager = host_manager.clone();
                state.objects.insert_with_key(|key| {
                    let server = data_init.init(id, key);
                    let host = host_manager.create_data_source(&qh, key);
                    Object::DataSource(Pair { server, host })
                });
            },
            wl_data_device_manager::Request::GetDataDevice { id, seat } => {
                let host_seat = match state.objects.to_host(&seat) {
                    Ok(host_seat) => host_seat,
                    Err(err) => {
                        data_init.init(id, ObjectKey::INVALID);
                        log_and_return!(Err(err))
                    },
                };
                let host_manager = host_manager.clone();
                state.objects.insert_with_key(|key| {
                    let server = data_init.init(id, key);
                    let host = host_manager.get_data_device(&host_seat, &qh, key);
                    Object::DataDevice(Pair { server, host })
                });
            },
            _ => unreachable!(),
        }
    }
}

impl Dispatch<WlDataSource, ObjectKey> for RelayState {
    fn request(
        state: &mut Self,
        _client: &wayland_server::Client,
        _source: &WlDataSource,
        request: wl_data_source::Request,
        key: &ObjectKey,
        _dhandle: &DisplayHandle,
        _data_init: &mut DataInit<'_, Self>,
    ) {
        let host = match state.objects.get(*key) {
            Ok(Object::DataSource(pair)) => pair.host.clone(),
            other => log_and_return!(Err(anyhow!("wl_data_source binding missing: {other:?}"))),
        };

        match request {
            wl_data_source::Request::Offer { mime_type } => {
                host.offer(state.mime.to_host(&mime_type));
            },
            wl_data_source::Request::SetActions { dnd_actions } => {
                host.set_actions(warn_and_return!(convert_wenum(dnd_actions)));
            },
            wl_data_source::Request::Destroy => {
                host.destroy();
                state.deferred.defer(&host, *key);
            },
            _ => unreachable!(),
        }
    }
}

impl Dispatch<WlDataDevice, ObjectKey> for RelayState {
    fn request(
        state: &mut Self,
        _client: &wayland_server::Client,
        _device: &WlDataDevice,
        request: wl_data_device::Request,
        key: &ObjectKey,
        _dhandle: &DisplayHandle,
        _data_init: &mut DataInit<'_, Self>,
    ) {
        let host = match state.objects.get(*key) {
            Ok(Object::DataDevice(pair)) => pair.host.clone(),
            other => log_and_return!(Err(anyhow!("wl_data_device binding missing: {other:?}"))),
        };

        match request {
            wl_data_device::Request::StartDrag {
                source,
                origin,
                icon,
                serial,
            } => {
                let host_source = match source {
                    Some(source) => Some(warn_and_return!(state.objects.to_host(&source))),
                    None => None,
                };
                let host_origin = warn_and_return!(state.objects.to_host(&origin));
                let host_icon = match icon {
                    Some(icon) => Some(warn_and_return!(state.objects.to_host(&icon))),
                    None => None,
                };
                host.start_drag(host_source.as_ref(), &host_origin, host_icon.as_ref(), serial);
            },
            wl_data_device::Request::SetSelection { source, serial } => {
                let host_source = match source {
                    Some(source) => Some(warn_and_return!(state.objects.to_host(&source))),
                    None => None,
                };
                host.set_selection(host_source.as_ref(), serial);
            },
            wl_data_device::Request::Release => {
                host.release();
                state.deferred.defer(&host, *key);
            },
            _ => unreachable!(),
        }
    }
}

impl Dispatch<WlDataOffer, ObjectKey> for RelayState {
    fn request(
        state: &mut Self,
        _client: &wayland_server::Client,
        _offer: &WlDataOffer,
        request: wl_data_offer::Request,
        key: &ObjectKey,
        _dhandle: &DisplayHandle,
        _data_init: &mut DataInit<'_, Self>,
    ) {
        let host = match state.objects.get(*key) {
            Ok(Object::DataOffer(pair)) => pair.host.clone(),
            other => log_and_return!(Err(anyhow!("wl_data_offer binding missing: {other:?}"))),
        };

        match request {
            wl_data_offer::Request::Accept { serial, mime_type } => {
                host.accept(serial, mime_type.map(|m| state.mime.to_host(&m)));
            },
            wl_data_offer::Request::Receive { mime_type, fd } => {
                host.receive(state.mime.to_host(&mime_type), fd.as_fd());
                // fd dropped here: the host message owns its duplicate.
            },
            wl_data_offer::Request::Finish => host.finish(),
            wl_data_offer::Request::SetActions {
                dnd_actions,
                preferred_action,
            } => {
                host.set_actions(
                    warn_and_return!(convert_wenum(dnd_actions)),
                    warn_and_return!(convert_wenum(preferred_action)),
                );
            },
            wl_data_offer::Request::Destroy => {
                // The host protocol never deletes superseded offers on its
                // own; destroying here tears down the host twin explicitly
                // and the binding follows once the deletion is confirmed.
                host.destroy();
                state.deferred.defer(&host, *key);
            },
            _ => unreachable!(),
        }
    }
}

impl wayland_client::Dispatch<HostWlDataDeviceManager, ()> for RelayState {
    fn event(
        _state: &mut Self,
        _manager: &HostWlDataDeviceManager,
        _event: <HostWlDataDeviceManager as Proxy>::Event,
        _data: &(),
        _conn: &wayland_client::Connection,
        _qh: &wayland_client::QueueHandle<Self>,
    ) {
        unreachable!();
    }
}

impl wayland_client::Dispatch<HostWlDataDevice, ObjectKey> for RelayState {
    fn event(
        state: &mut Self,
        _device: &HostWlDataDevice,
        event: host_wl_data_device::Event,
        key: &ObjectKey,
        _conn: &wayland_client::Connection,
        _qh: &wayland_client::QueueHandle<Self>,
    ) {
        let server = match state.objects.get(*key) {
            Ok(Object::DataDevice(pair)) => pair.server.clone(),
            _ => {
                trace!("host data_device event after binding removal");
                return;
            },
        };

        match event {
            host_wl_data_device::Event::DataOffer { id } => {
                let client = warn_and_return!(server
                    .client()
                    .ok_or(anyhow!("guest data_device has no client")));
                let dh = state.dh.clone();
                let version = server.version();
                let offer_data: &OfferData = warn_and_return!(id
                    .data()
                    .ok_or(anyhow!("host offer without OfferData")));
                let key = warn_and_return!(state.objects.try_insert_with_key(|key| {
                    let server_offer = client
                        .create_resource::<WlDataOffer, ObjectKey, RelayState>(&dh, version, key)
                        .location(loc!())?;
                    Ok(Object::DataOffer(Pair {
                        server: server_offer,
                        host: id.clone(),
                    }))
                }));
                offer_data.set(key);
                let Ok(Object::DataOffer(pair)) = state.objects.get(key) else {
                    unreachable!();
                };
                server.data_offer(&pair.server);
            },
            host_wl_data_device::Event::Enter {
                serial,
                surface,
                x,
                y,
                id,
            } => {
                state.last_serial = serial;
                let guest_surface = warn_and_return!(state.objects.to_client(&surface));
                let guest_offer = match id {
                    Some(id) => {
                        let key = warn_and_return!(offer_key(&id));
                        match state.objects.get(key) {
                            Ok(Object::DataOffer(pair)) => Some(pair.server.clone()),
                            other => log_and_return!(Err(anyhow!(
                                "enter with unknown offer binding: {other:?}"
                            ))),
                        }
                    },
                    None => None,
                };
                let (x, y) = state.scale.point_to_client(x, y);
                server.enter(serial, &guest_surface, x, y, guest_offer.as_ref());
            },
            host_wl_data_device::Event::Leave => server.leave(),
            host_wl_data_device::Event::Motion { time, x, y } => {
                let (x, y) = state.scale.point_to_client(x, y);
                server.motion(time, x, y);
            },
            host_wl_data_device::Event::Drop => server.drop(),
            host_wl_data_device::Event::Selection { id } => {
                let guest_offer = match id {
                    Some(id) => {
                        let key = warn_and_return!(offer_key(&id));
                        match state.objects.get(key) {
                            Ok(Object::DataOffer(pair)) => Some(pair.server.clone()),
                            other => {
                                warn!("selection with unknown offer binding: {other:?}");
                                return;
                            },
                        }
                    },
                    None => None,
                };
                server.selection(guest_offer.as_ref());
            },
            other => debug!("unhandled host data_device event: {other:?}"),
        }
    }

    wayland_client::event_created_child!(RelayState, HostWlDataDevice, [
        host_wl_data_device::EVT_DATA_OFFER_OPCODE => (HostWlDataOffer, OfferData::default()),
    ]);
}

impl wayland_client::Dispatch<HostWlDataOffer, OfferData> for RelayState {
    fn event(
        state: &mut Self,
        offer: &HostWlDataOffer,
        event: host_wl_data_offer::Event,
        _data: &OfferData,
        _conn: &wayland_client::Connection,
        _qh: &wayland_client::QueueHandle<Self>,
    ) {
        let server = match offer_key(offer).and_then(|key| match state.objects.get(key) {
            Ok(Object::DataOffer(pair)) => Ok(pair.server.clone()),
            other => Err(anyhow!("wl_data_offer binding missing: {other:?}")),
        }) {
            Ok(server) => server,
            Err(e) => {
                trace!("host data_offer event without live binding: {e:?}");
                return;
            },
        };

        match event {
            host_wl_data_offer::Event::Offer { mime_type } => {
                match state.mime.to_clients(&mime_type) {
                    Some(stripped) => server.offer(stripped.to_owned()),
                    None => debug!("dropping offer of foreign mime type {mime_type:?}"),
                }
            },
            host_wl_data_offer::Event::SourceActions { source_actions } => {
                server.source_actions(warn_and_return!(convert_wenum(source_actions)));
            },
            host_wl_data_offer::Event::Action { dnd_action } => {
                server.action(warn_and_return!(convert_wenum(dnd_action)));
            },
            other => debug!("unhandled host data_offer event: {other:?}"),
        }
    }
}

impl wayland_client::Dispatch<HostWlDataSource, ObjectKey> for RelayState {
    fn event(
        state: &mut Self,
        _source: &HostWlDataSource,
        event: host_wl_data_source::Event,
        key: &ObjectKey,
        _conn: &wayland_client::Connection,
        _qh: &wayland_client::QueueHandle<Self>,
    ) {
        let server = match state.objects.get(*key) {
            Ok(Object::DataSource(pair)) => pair.server.clone(),
            _ => {
                trace!("host data_source event after binding removal");
                return;
            },
        };

        match event {
            host_wl_data_source::Event::Target { mime_type } => match mime_type {
                None => server.target(None),
                Some(mime_type) => match state.mime.to_clients(&mime_type) {
                    Some(stripped) => server.target(Some(stripped.to_owned())),
                    None => debug!("dropping target of foreign mime type {mime_type:?}"),
                },
            },
            host_wl_data_source::Event::Send { mime_type, fd } => {
                match state.mime.to_clients(&mime_type) {
                    Some(stripped) => server.send(stripped.to_owned(), fd.as_fd()),
                    None => debug!("dropping send of foreign mime type {mime_type:?}"),
                }
                // fd dropped either way; the guest message (if any) owns its
                // duplicate.
            },
            host_wl_data_source::Event::Cancelled => server.cancelled(),
            host_wl_data_source::Event::DndDropPerformed => server.dnd_drop_performed(),
            host_wl_data_source::Event::DndFinished => server.dnd_finished(),
            host_wl_data_source::Event::Action { dnd_action } => {
                server.action(warn_and_return!(convert_wenum(dnd_action)));
            },
            other => debug!("unhandled host data_source event: {other:?}"),
        }
    }
}

// ---------------------------------------------------------------------------
// Primary selection, Zwp and GTK guest flavors over the Zwp host global
// ---------------------------------------------------------------------------

impl Dispatch<ZwpPrimarySelectionDeviceManagerV1, HostGlobal<HostPrimaryManager>> for RelayState {
    fn request(
        state: &mut Self,
        _client: &wayland_server::Client,
        _manager: &ZwpPrimarySelectionDeviceManagerV1,
        request: zwp_primary_selection_device_manager_v1::Request,
        host_manager: &HostGlobal<HostPrimaryManager>,
        _dhandle: &DisplayHandle,
        data_init: &mut DataInit<'_, Self>,
    ) {
        let qh = state.qh.clone();
        match request {
            zwp_primary_selection_device_manager_v1::Request::CreateSource { id } => {
                let host_manager = host_manager.clone();
                state.objects.insert_with_key(|key| {
                    let server = data_init.init(id, key);
                    let host = host_manager.create_source(&qh, key);
                    Object::PrimarySource(PrimarySourceBinding::Zwp(Pair { server, host }))
                });
            },
            zwp_primary_selection_device_manager_v1::Request::GetDevice { id, seat } => {
                let host_seat = match state.objects.to_host(&seat) {
                    Ok(host_seat) => host_seat,
                    Err(err) => {
                        data_init.init(id, ObjectKey::INVALID);
                        log_and_return!(Err(err))
                    },
                };
                let host_manager = host_manager.clone();
                state.objects.insert_with_key(|key| {
                    let server = data_init.init(id, key);
                    let host = host_manager.get_device(&host_seat, &qh, key);
                    Object::PrimaryDevice(PrimaryDeviceBinding::Zwp(Pair { server, host }))
                });
            },
            zwp_primary_selection_device_manager_v1::Request::Destroy => host_manager.destroy(),
            _ => unreachable!(),
        }
    }
}

impl Dispatch<GtkPrimarySelectionDeviceManager, HostGlobal<HostPrimaryManager>> for RelayState {
    fn request(
        state: &mut Self,
        _client: &wayland_server::Client,
        _manager: &GtkPrimarySelectionDeviceManager,
        request: gtk_primary_selection_device_manager::Request,
        host_manager: &HostGlobal<HostPrimaryManager>,
        _dhandle: &DisplayHandle,
        data_init: &mut DataInit<'_, Self>,
    ) {
        let qh = state.qh.clone();
        match request {
            gtk_primary_selection_device_manager::Request::CreateSource { id } => {
                let host_manager = host_manager.clone();
                state.objects.insert_with_key(|key| {
                    let server = data_init.init(id, key);
                    let host = host_manager.create_source(&qh, key);
                    Object::PrimarySource(PrimarySourceBinding::Gtk(Pair { server, host }))
                });
            },
            gtk_primary_selection_device_manager::Request::GetDevice { id, seat } => {
                let host_seat = match state.objects.to_host(&seat) {
                    Ok(host_seat) => host_seat,
                    Err(err) => {
                        data_init.init(id, ObjectKey::INVALID);
                        log_and_return!(Err(err))
                    },
                };
                let host_manager = host_manager.clone();
                state.objects.insert_with_key(|key| {
                    let server = data_init.init(id, key);
                    let host = host_manager.get_device(&host_seat, &qh, key);
                    Object::PrimaryDevice(PrimaryDeviceBinding::Gtk(Pair { server, host }))
                });
            },
            gtk_primary_selection_device_manager::Request::Destroy => host_manager.destroy(),
            _ => unreachable!(),
        }
    }
}

impl Dispatch<ZwpPrimarySelectionSourceV1, ObjectKey> for RelayState {
    fn request(
        state: &mut Self,
        _client: &wayland_server::Client,
        _source: &ZwpPrimarySelectionSourceV1,
        request: zwp_primary_selection_source_v1::Request,
        key: &ObjectKey,
        _dhandle: &DisplayHandle,
        _data_init: &mut DataInit<'_, Self>,
    ) {
        let host = match state.objects.get(*key) {
            Ok(Object::PrimarySource(binding)) => binding.host().clone(),
            other => log_and_return!(Err(anyhow!("primary source binding missing: {other:?}"))),
        };

        match request {
            zwp_primary_selection_source_v1::Request::Offer { mime_type } => {
                host.offer(state.mime.to_host(&mime_type));
            },
            zwp_primary_selection_source_v1::Request::Destroy => {
                host.destroy();
                state.deferred.defer(&host, *key);
            },
            _ => unreachable!(),
        }
    }
}

impl Dispatch<GtkPrimarySelectionSource, ObjectKey> for RelayState {
    fn request(
        state: &mut Self,
        _client: &wayland_server::Client,
        _source: &GtkPrimarySelectionSource,
        request: gtk_primary_selection_source::Request,
        key: &ObjectKey,
        _dhandle: &DisplayHandle,
        _data_init: &mut DataInit<'_, Self>,
    ) {
        let host = match state.objects.get(*key) {
            Ok(Object::PrimarySource(binding)) => binding.host().clone(),
            other => log_and_return!(Err(anyhow!("primary source binding missing: {other:?}"))),
        };

        match request {
            gtk_primary_selection_source::Request::Offer { mime_type } => {
                host.offer(state.mime.to_host(&mime_type));
            },
            gtk_primary_selection_source::Request::Destroy => {
                host.destroy();
                state.deferred.defer(&host, *key);
            },
            _ => unreachable!(),
        }
    }
}

fn primary_set_selection(
    state: &mut RelayState,
    device_key: ObjectKey,
    source_key: Option<ObjectKey>,
    serial: u32,
) {
    let host_device = match state.objects.get(device_key) {
        Ok(Object::PrimaryDevice(binding)) => binding.host().clone(),
        other => log_and_return!(Err(anyhow!("primary device binding missing: {other:?}"))),
    };
    let host_source = match source_key {
        Some(key) => match state.objects.get(key) {
            Ok(Object::PrimarySource(binding)) => Some(binding.host().clone()),
            other => log_and_return!(Err(anyhow!("primary source binding missing: {other:?}"))),
        },
        None => None,
    };
    host_device.set_selection(host_source.as_ref(), serial);
}

impl Dispatch<ZwpPrimarySelectionDeviceV1, ObjectKey> for RelayState {
    fn request(
        state: &mut Self,
        _client: &wayland_server::Client,
        _device: &ZwpPrimarySelectionDeviceV1,
        request: zwp_primary_selection_device_v1::Request,
        key: &ObjectKey,
        _dhandle: &DisplayHandle,
        _data_init: &mut DataInit<'_, Self>,
    ) {
        match request {
            zwp_primary_selection_device_v1::Request::SetSelection { source, serial } => {
                let source_key = match source {
                    Some(source) => match source.data::<ObjectKey>() {
                        Some(key) => Some(*key),
                        None => log_and_return!(Err(anyhow!("primary source without binding"))),
                    },
                    None => None,
                };
                primary_set_selection(state, *key, source_key, serial);
            },
            zwp_primary_selection_device_v1::Request::Destroy => {
                let host = match state.objects.get(*key) {
                    Ok(Object::PrimaryDevice(binding)) => binding.host().clone(),
                    other => {
                        log_and_return!(Err(anyhow!("primary device binding missing: {other:?}")))
                    },
                };
                host.destroy();
                state.deferred.defer(&host, *key);
            },
            _ => unreachable!(),
        }
    }
}

impl Dispatch<GtkPrimarySelectionDevice, ObjectKey> for RelayState {
    fn request(
        state: &mut Self,
        _client: &wayland_server::Client,
        _device: &GtkPrimarySelectionDevice,
        request: gtk_primary_selection_device::Request,
        key: &ObjectKey,
        _dhandle: &DisplayHandle,
        _data_init: &mut DataInit<'_, Self>,
    ) {
        match request {
            gtk_primary_selection_device::Request::SetSelection { source, serial } => {
                let source_key = match source {
                    Some(source) => match source.data::<ObjectKey>() {
                        Some(key) => Some(*key),
                        None => log_and_return!(Err(anyhow!("primary source without binding"))),
                    },
                    None => None,
                };
                primary_set_selection(state, *key, source_key, serial);
            },
            gtk_primary_selection_device::Request::Destroy => {
                let host = match state.objects.get(*key) {
                    Ok(Object::PrimaryDevice(binding)) => binding.host().clone(),
                    other => {
                        log_and_return!(Err(anyhow!("primary device binding missing: {other:?}")))
                    },
                };
                host.destroy();
                state.deferred.defer(&host, *key);
            },
            _ => unreachable!(),
        }
    }
}

fn primary_offer_receive(state: &mut RelayState, key: ObjectKey, mime_type: String, fd: std::os::fd::OwnedFd) {
    let host = match state.objects.get(key) {
        Ok(Object::PrimaryOffer(binding)) => binding.host().clone(),
        other => log_and_return!(Err(anyhow!("primary offer binding missing: {other:?}"))),
    };
    host.receive(state.mime.to_host(&mime_type), fd.as_fd());
    // fd dropped here after the host message duplicated it.
}

fn primary_offer_destroy(state: &mut RelayState, key: ObjectKey) {
    let host = match state.objects.get(key) {
        Ok(Object::PrimaryOffer(binding)) => binding.host().clone(),
        other => log_and_return!(Err(anyhow!("primary offer binding missing: {other:?}"))),
    };
    host.destroy();
    state.deferred.defer(&host, key);
}

impl Dispatch<ZwpPrimarySelectionOfferV1, ObjectKey> for RelayState {
    fn request(
        state: &mut Self,
        _client: &wayland_server::Client,
        _offer: &ZwpPrimarySelectionOfferV1,
        request: zwp_primary_selection_offer_v1::Request,
        key: &ObjectKey,
        _dhandle: &DisplayHandle,
        _data_init: &mut DataInit<'_, Self>,
    ) {
        match request {
            zwp_primary_selection_offer_v1::Request::Receive { mime_type, fd } => {
                primary_offer_receive(state, *key, mime_type, fd);
            },
            zwp_primary_selection_offer_v1::Request::Destroy => primary_offer_destroy(state, *key),
            _ => unreachable!(),
        }
    }
}

impl Dispatch<GtkPrimarySelectionOffer, ObjectKey> for RelayState {
    fn request(
        state: &mut Self,
        _client: &wayland_server::Client,
        _offer: &GtkPrimarySelectionOffer,
        request: gtk_primary_selection_offer::Request,
        key: &ObjectKey,
        _dhandle: &DisplayHandle,
        _data_init: &mut DataInit<'_, Self>,
    ) {
        match request {
            gtk_primary_selection_offer::Request::Receive { mime_type, fd } => {
                primary_offer_receive(state, *key, mime_type, fd);
            },
            gtk_primary_selection_offer::Request::Destroy => primary_offer_destroy(state, *key),
            _ => unreachable!(),
        }
    }
}

impl wayland_client::Dispatch<HostPrimaryManager, ()> for RelayState {
    fn event(
        _state: &mut Self,
        _manager: &HostPrimaryManager,
        _event: <HostPrimaryManager as Proxy>::Event,
        _data: &(),
        _conn: &wayland_client::Connection,
        _qh: &wayland_client::QueueHandle<Self>,
    ) {
        unreachable!();
    }
}

impl wayland_client::Dispatch<HostPrimaryDevice, ObjectKey> for RelayState {
    fn event(
        state: &mut Self,
        _device: &HostPrimaryDevice,
        event: host_primary_device::Event,
        key: &ObjectKey,
        _conn: &wayland_client::Connection,
        _qh: &wayland_client::QueueHandle<Self>,
    ) {
        let (flavor, device_binding_key) = match state.objects.get(*key) {
            Ok(Object::PrimaryDevice(binding)) => (binding.flavor(), *key),
            _ => {
                trace!("host primary device event after binding removal");
                return;
            },
        };

        match event {
            host_primary_device::Event::DataOffer { offer } => {
                let offer_data: &OfferData = warn_and_return!(offer
                    .data()
                    .ok_or(anyhow!("host primary offer without OfferData")));
                let dh = state.dh.clone();
                let (client, version, announce) = match state.objects.get(device_binding_key) {
                    Ok(Object::PrimaryDevice(PrimaryDeviceBinding::Zwp(pair))) => (
                        pair.server.client(),
                        pair.server.version(),
                        Announce::Zwp(pair.server.clone()),
                    ),
                    Ok(Object::PrimaryDevice(PrimaryDeviceBinding::Gtk(pair))) => (
                        pair.server.client(),
                        pair.server.version(),
                        Announce::Gtk(pair.server.clone()),
                    ),
                    _ => unreachable!(),
                };
                let client =
                    warn_and_return!(client.ok_or(anyhow!("guest primary device has no client")));

                let offer_key = warn_and_return!(state.objects.try_insert_with_key(|key| {
                    Ok(match flavor {
                        PrimaryFlavor::Zwp => {
                            let server_offer = client
                                .create_resource::<ZwpPrimarySelectionOfferV1, ObjectKey, RelayState>(
                                    &dh, version, key,
                                )
                                .location(loc!())?;
                            Object::PrimaryOffer(PrimaryOfferBinding::Zwp(Pair {
                                server: server_offer,
                                host: offer.clone(),
                            }))
                        },
                        PrimaryFlavor::Gtk => {
                            let server_offer = client
                                .create_resource::<GtkPrimarySelectionOffer, ObjectKey, RelayState>(
                                    &dh, version, key,
                                )
                                .location(loc!())?;
                            Object::PrimaryOffer(PrimaryOfferBinding::Gtk(Pair {
                                server: server_offer,
                                host: offer.clone(),
                            }))
                        },
                    })
                }));
                offer_data.set(offer_key);

                let Ok(Object::PrimaryOffer(offer_binding)) = state.objects.get(offer_key) else {
                    unreachable!();
                };
                match (announce, offer_binding) {
                    (Announce::Zwp(device), PrimaryOfferBinding::Zwp(pair)) => {
                        device.data_offer(&pair.server)
                    },
                    (Announce::Gtk(device), PrimaryOfferBinding::Gtk(pair)) => {
                        device.data_offer(&pair.server)
                    },
                    _ => unreachable!(),
                }
            },
            host_primary_device::Event::Selection { id } => {
                let offer_binding_key = match id {
                    Some(id) => Some(warn_and_return!(offer_key(&id))),
                    None => None,
                };
                primary_announce_selection(state, device_binding_key, offer_binding_key);
            },
            other => debug!("unhandled host primary device event: {other:?}"),
        }
    }

    wayland_client::event_created_child!(RelayState, HostPrimaryDevice, [
        host_primary_device::EVT_DATA_OFFER_OPCODE => (HostPrimaryOffer, OfferData::default()),
    ]);
}

enum Announce {
    Zwp(ZwpPrimarySelectionDeviceV1),
    Gtk(GtkPrimarySelectionDevice),
}

/// Relays a `selection` event, matching the offer's flavor against the
/// device's. A mismatch means the host paired an offer we created for the
/// other guest-facing global; that event is dropped.
fn primary_announce_selection(
    state: &mut RelayState,
    device_key: ObjectKey,
    offer_key: Option<ObjectKey>,
) {
    let offer = match offer_key {
        Some(key) => match state.objects.get(key) {
            Ok(Object::PrimaryOffer(binding)) => Some(binding),
            other => log_and_return!(Err(anyhow!("primary offer binding missing: {other:?}"))),
        },
        None => None,
    };
    let device = match state.objects.get(device_key) {
        Ok(Object::PrimaryDevice(binding)) => binding,
        other => log_and_return!(Err(anyhow!("primary device binding missing: {other:?}"))),
    };

    match (device, offer) {
        (PrimaryDeviceBinding::Zwp(device), Some(PrimaryOfferBinding::Zwp(offer))) => {
            device.server.selection(Some(&offer.server));
        },
        (PrimaryDeviceBinding::Gtk(device), Some(PrimaryOfferBinding::Gtk(offer))) => {
            device.server.selection(Some(&offer.server));
        },
        (PrimaryDeviceBinding::Zwp(device), None) => device.server.selection(None),
        (PrimaryDeviceBinding::Gtk(device), None) => device.server.selection(None),
        (_, Some(_)) => warn!("selection offer of mismatched flavor; dropping"),
    }
}

impl wayland_client::Dispatch<HostPrimaryOffer, OfferData> for RelayState {
    fn event(
        state: &mut Self,
        offer: &HostPrimaryOffer,
        event: host_primary_offer::Event,
        _data: &OfferData,
        _conn: &wayland_client::Connection,
        _qh: &wayland_client::QueueHandle<Self>,
    ) {
        match event {
            host_primary_offer::Event::Offer { mime_type } => {
                let key = match offer_key(offer) {
                    Ok(key) => key,
                    Err(e) => {
                        trace!("host primary offer event without live binding: {e:?}");
                        return;
                    },
                };
                let stripped = match state.mime.to_clients(&mime_type) {
                    Some(stripped) => stripped.to_owned(),
                    None => {
                        debug!("dropping primary offer of foreign mime type {mime_type:?}");
                        return;
                    },
                };
                match state.objects.get(key) {
                    Ok(Object::PrimaryOffer(binding)) => binding.offer(stripped),
                    other => {
                        log_and_return!(Err(anyhow!("primary offer binding missing: {other:?}")))
                    },
                }
            },
            other => debug!("unhandled host primary offer event: {other:?}"),
        }
    }
}

impl wayland_client::Dispatch<HostPrimarySource, ObjectKey> for RelayState {
    fn event(
        state: &mut Self,
        _source: &HostPrimarySource,
        event: host_primary_source::Event,
        key: &ObjectKey,
        _conn: &wayland_client::Connection,
        _qh: &wayland_client::QueueHandle<Self>,
    ) {
        let binding = match state.objects.get(*key) {
            Ok(Object::PrimarySource(binding)) => binding,
            _ => {
                trace!("host primary source event after binding removal");
                return;
            },
        };

        match event {
            host_primary_source::Event::Send { mime_type, fd } => {
                let stripped = match state.mime.to_clients(&mime_type) {
                    Some(stripped) => stripped.to_owned(),
                    None => {
                        debug!("dropping primary send of foreign mime type {mime_type:?}");
                        return;
                    },
                };
                match binding {
                    PrimarySourceBinding::Zwp(pair) => pair.server.send(stripped, fd.as_fd()),
                    PrimarySourceBinding::Gtk(pair) => pair.server.send(stripped, fd.as_fd()),
                }
            },
            host_primary_source::Event::Cancelled => match binding {
                PrimarySourceBinding::Zwp(pair) => pair.server.cancelled(),
                PrimarySourceBinding::Gtk(pair) => pair.server.cancelled(),
            },
            other => debug!("unhandled host primary source event: {other:?}"),
        }
    }
}
