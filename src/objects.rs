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

//! Pairings between guest-facing resources and their host-facing twins.
//!
//! Every stateful relayed object lives in the session [`ObjectMap`]; the
//! resource's and the proxy's user data is the entry's [`ObjectKey`], so
//! either side of the wire resolves to the same binding. Stateless objects
//! (wl_region, xdg_positioner) skip the map and carry the host twin directly
//! as user data.

use std::collections::HashMap;

use wayland_backend::client::Backend;
use wayland_backend::client::ObjectId as HostObjectId;
use wayland_client::Proxy;
use wayland_client::protocol::wl_data_device::WlDataDevice as HostWlDataDevice;
use wayland_client::protocol::wl_data_offer::WlDataOffer as HostWlDataOffer;
use wayland_client::protocol::wl_data_source::WlDataSource as HostWlDataSource;
use wayland_client::protocol::wl_keyboard::WlKeyboard as HostWlKeyboard;
use wayland_client::protocol::wl_output::WlOutput as HostWlOutput;
use wayland_client::protocol::wl_pointer::WlPointer as HostWlPointer;
use wayland_client::protocol::wl_seat::WlSeat as HostWlSeat;
use wayland_client::protocol::wl_shm::WlShm as HostWlShm;
use wayland_client::protocol::wl_surface::WlSurface as HostWlSurface;
use wayland_protocols::wp::primary_selection::zv1::client::zwp_primary_selection_device_v1::ZwpPrimarySelectionDeviceV1 as HostPrimaryDevice;
use wayland_protocols::wp::primary_selection::zv1::client::zwp_primary_selection_offer_v1::ZwpPrimarySelectionOfferV1 as HostPrimaryOffer;
use wayland_protocols::wp::primary_selection::zv1::client::zwp_primary_selection_source_v1::ZwpPrimarySelectionSourceV1 as HostPrimarySource;
use wayland_protocols::wp::primary_selection::zv1::server::zwp_primary_selection_device_v1::ZwpPrimarySelectionDeviceV1;
use wayland_protocols::wp::primary_selection::zv1::server::zwp_primary_selection_offer_v1::ZwpPrimarySelectionOfferV1;
use wayland_protocols::wp::primary_selection::zv1::server::zwp_primary_selection_source_v1::ZwpPrimarySelectionSourceV1;
use wayland_protocols::xdg::shell::client::xdg_popup::XdgPopup as HostXdgPopup;
use wayland_protocols::xdg::shell::client::xdg_surface::XdgSurface as HostXdgSurface;
use wayland_protocols::xdg::shell::client::xdg_toplevel::XdgToplevel as HostXdgToplevel;
use wayland_protocols::xdg::shell::server::xdg_popup::XdgPopup;
use wayland_protocols::xdg::shell::server::xdg_surface::XdgSurface;
use wayland_protocols::xdg::shell::server::xdg_toplevel::XdgToplevel;
use wayland_protocols::xdg::xdg_output::zv1::client::zxdg_output_v1::ZxdgOutputV1 as HostXdgOutput;
use wayland_protocols::xdg::xdg_output::zv1::server::zxdg_output_v1::ZxdgOutputV1;
use wayland_protocols_misc::gtk_primary_selection::server::gtk_primary_selection_device::GtkPrimarySelectionDevice;
use wayland_protocols_misc::gtk_primary_selection::server::gtk_primary_selection_offer::GtkPrimarySelectionOffer;
use wayland_protocols_misc::gtk_primary_selection::server::gtk_primary_selection_source::GtkPrimarySelectionSource;
use wayland_server::Resource;
use wayland_server::WEnum;
use wayland_server::protocol::wl_data_device::WlDataDevice;
use wayland_server::protocol::wl_data_offer::WlDataOffer;
use wayland_server::protocol::wl_data_source::WlDataSource;
use wayland_server::protocol::wl_keyboard::WlKeyboard;
use wayland_server::protocol::wl_output::WlOutput;
use wayland_server::protocol::wl_pointer::WlPointer;
use wayland_server::protocol::wl_seat::WlSeat;
use wayland_server::protocol::wl_shm::WlShm;
use wayland_server::protocol::wl_surface::WlSurface;

use crate::prelude::*;
use crate::selection::PrimaryDeviceBinding;
use crate::selection::PrimaryOfferBinding;
use crate::selection::PrimarySourceBinding;
use crate::shell::WmBaseBinding;
use crate::shm::BufferBinding;
use crate::shm::PoolBinding;
use crate::surface::SurfaceBinding;

#[derive(Clone, Copy, Debug, Eq, Hash, Ord, PartialEq, PartialOrd)]
pub struct ObjectKey(u64);

impl ObjectKey {
    /// Key 0 is never allocated. Used to initialize resources whose binding
    /// could not be created, so later requests on them fail lookup instead of
    /// panicking the dispatch.
    pub const INVALID: ObjectKey = ObjectKey(0);
}

/// A same-interface server/host pairing. The two sides always share interface
/// and version; the only cross-interface pairs in the relay are the GTK↔Zwp
/// primary-selection ones, which get their own binding types.
#[derive(Debug)]
pub struct Pair<S, H> {
    pub server: S,
    pub host: H,
}

#[derive(Debug)]
pub enum Object {
    Shm(Pair<WlShm, HostWlShm>),
    Surface(SurfaceBinding),
    Pool(PoolBinding),
    Buffer(BufferBinding),
    Seat(Pair<WlSeat, HostWlSeat>),
    Pointer(Pair<WlPointer, HostWlPointer>),
    Keyboard(Pair<WlKeyboard, HostWlKeyboard>),
    Output(Pair<WlOutput, HostWlOutput>),
    XdgOutput(Pair<ZxdgOutputV1, HostXdgOutput>),
    WmBase(WmBaseBinding),
    XdgSurface(Pair<XdgSurface, HostXdgSurface>),
    XdgToplevel(Pair<XdgToplevel, HostXdgToplevel>),
    XdgPopup(Pair<XdgPopup, HostXdgPopup>),
    DataDevice(Pair<WlDataDevice, HostWlDataDevice>),
    DataSource(Pair<WlDataSource, HostWlDataSource>),
    DataOffer(Pair<WlDataOffer, HostWlDataOffer>),
    PrimaryDevice(PrimaryDeviceBinding),
    PrimarySource(PrimarySourceBinding),
    PrimaryOffer(PrimaryOfferBinding),
}

#[derive(Debug, Default)]
pub struct ObjectMap {
    entries: HashMap<ObjectKey, Object>,
    next: u64,
}

impl ObjectMap {
    /// Reserves a key, builds the binding with it (so the key can be handed
    /// to both wire libraries as user data first), and stores the result.
    pub fn insert_with_key(&mut self, f: impl FnOnce(ObjectKey) -> Object) -> ObjectKey {
        self.next += 1;
        let key = ObjectKey(self.next);
        let object = f(key);
        self.entries.insert(key, object);
        key
    }

    /// Like [`Self::insert_with_key`] for constructors that can fail (e.g.
    /// creating a guest-side resource for a client that just disconnected);
    /// nothing is inserted on failure.
    pub fn try_insert_with_key(
        &mut self,
        f: impl FnOnce(ObjectKey) -> Result<Object>,
    ) -> Result<ObjectKey> {
        self.next += 1;
        let key = ObjectKey(self.next);
        let object = f(key)?;
        self.entries.insert(key, object);
        Ok(key)
    }

    pub fn get(&self, key: ObjectKey) -> Result<&Object> {
        self.entries
            .get(&key)
            .ok_or(anyhow!("no binding for {key:?}"))
    }

    pub fn get_mut(&mut self, key: ObjectKey) -> Result<&mut Object> {
        self.entries
            .get_mut(&key)
            .ok_or(anyhow!("no binding for {key:?}"))
    }

    pub fn remove(&mut self, key: ObjectKey) -> Option<Object> {
        self.entries.remove(&key)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Host twin of a guest resource. Fails when the binding is absent (a
    /// relay bug) or when it is a cross-interface primary-selection pair,
    /// which only the selection relay's own accessors may follow.
    pub fn to_host<S: ServerSide>(&self, resource: &S) -> Result<S::Host> {
        let key = *resource
            .data::<ObjectKey>()
            .ok_or(anyhow!("resource {} carries no binding key", resource.id()))?;
        S::host_of(self.get(key).location(loc!())?).cloned()
    }

    /// Guest twin of a host proxy; inverse of [`Self::to_host`].
    pub fn to_client<H: HostSide>(&self, proxy: &H) -> Result<H::Server> {
        let key = *proxy
            .data::<ObjectKey>()
            .ok_or(anyhow!("proxy {} carries no binding key", proxy.id()))?;
        H::server_of(self.get(key).location(loc!())?).cloned()
    }
}

pub trait ServerSide: Resource + Sized {
    type Host: Proxy + Clone;
    fn host_of(object: &Object) -> Result<&Self::Host>;
}

pub trait HostSide: Proxy + Sized {
    type Server: Resource + Clone;
    fn server_of(object: &Object) -> Result<&Self::Server>;
}

macro_rules! translatable {
    ($server:ty, $host:ty, $pat:pat => ($s:expr, $h:expr)) => {
        impl ServerSide for $server {
            type Host = $host;
            fn host_of(object: &Object) -> Result<&$host> {
                match object {
                    $pat => Ok($h),
                    other => bail!(
                        "binding mismatch: expected {}, found {other:?}",
                        stringify!($server)
                    ),
                }
            }
        }

        impl HostSide for $host {
            type Server = $server;
            fn server_of(object: &Object) -> Result<&$server> {
                match object {
                    $pat => Ok($s),
                    other => bail!(
                        "binding mismatch: expected {}, found {other:?}",
                        stringify!($host)
                    ),
                }
            }
        }
    };
}

translatable!(WlShm, HostWlShm, Object::Shm(p) => (&p.server, &p.host));
translatable!(WlSurface, HostWlSurface, Object::Surface(b) => (&b.server, &b.host));
translatable!(WlSeat, HostWlSeat, Object::Seat(p) => (&p.server, &p.host));
translatable!(WlPointer, HostWlPointer, Object::Pointer(p) => (&p.server, &p.host));
translatable!(WlKeyboard, HostWlKeyboard, Object::Keyboard(p) => (&p.server, &p.host));
translatable!(WlOutput, HostWlOutput, Object::Output(p) => (&p.server, &p.host));
translatable!(ZxdgOutputV1, HostXdgOutput, Object::XdgOutput(p) => (&p.server, &p.host));
translatable!(XdgSurface, HostXdgSurface, Object::XdgSurface(p) => (&p.server, &p.host));
translatable!(XdgToplevel, HostXdgToplevel, Object::XdgToplevel(p) => (&p.server, &p.host));
translatable!(XdgPopup, HostXdgPopup, Object::XdgPopup(p) => (&p.server, &p.host));
translatable!(WlDataDevice, HostWlDataDevice, Object::DataDevice(p) => (&p.server, &p.host));
translatable!(WlDataSource, HostWlDataSource, Object::DataSource(p) => (&p.server, &p.host));
translatable!(WlDataOffer, HostWlDataOffer, Object::DataOffer(p) => (&p.server, &p.host));

// The same-interface Zwp primary-selection pairs translate generically; a Gtk
// flavored binding under the key is the cross-interface case and fails.
translatable!(
    ZwpPrimarySelectionDeviceV1,
    HostPrimaryDevice,
    Object::PrimaryDevice(PrimaryDeviceBinding::Zwp(p)) => (&p.server, &p.host)
);
translatable!(
    ZwpPrimarySelectionSourceV1,
    HostPrimarySource,
    Object::PrimarySource(PrimarySourceBinding::Zwp(p)) => (&p.server, &p.host)
);
translatable!(
    ZwpPrimarySelectionOfferV1,
    HostPrimaryOffer,
    Object::PrimaryOffer(PrimaryOfferBinding::Zwp(p)) => (&p.server, &p.host)
);

macro_rules! cross_interface {
    ($server:ty, $host:ty) => {
        impl ServerSide for $server {
            type Host = $host;
            fn host_of(_: &Object) -> Result<&$host> {
                bail!(
                    "{} pairs across interfaces; use the selection relay accessors",
                    stringify!($server)
                )
            }
        }
    };
}

cross_interface!(GtkPrimarySelectionDevice, HostPrimaryDevice);
cross_interface!(GtkPrimarySelectionSource, HostPrimarySource);
cross_interface!(GtkPrimarySelectionOffer, HostPrimaryOffer);

/// Host twin of a stateless guest resource whose user data is the twin
/// itself (wl_region, xdg_positioner).
pub fn direct_host<S, H>(resource: &S) -> Result<H>
where
    S: Resource,
    H: Proxy + Clone + Send + Sync + 'static,
{
    resource
        .data::<H>()
        .cloned()
        .ok_or(anyhow!("no host twin attached to {}", resource.id()))
}

/// Re-encodes a wire enum across the two bindings. Fails only when one side
/// speaks an enum value the other side's generated binding does not know,
/// which the equal-version invariant makes a peer bug.
pub fn convert_wenum<A, B>(value: WEnum<A>) -> Result<B>
where
    u32: From<WEnum<A>>,
    B: TryFrom<u32>,
    <B as TryFrom<u32>>::Error: std::fmt::Debug,
{
    let raw = u32::from(value);
    B::try_from(raw).map_err(|e| anyhow!("enum value {raw} not representable: {e:?}"))
}

/// Destroyed guest objects whose host twin has not yet been confirmed dead.
///
/// The wire library acknowledges guest-side destructor requests itself, so
/// what the relay defers is the binding: the entry (and with it the refcounts
/// and host references hanging off it) stays alive until the host's deletion
/// of the twin is observed, which keeps any late host events translatable.
#[derive(Debug, Default)]
pub struct DeferredAckQueue {
    pending: Vec<(HostObjectId, ObjectKey)>,
}

impl DeferredAckQueue {
    pub fn defer<P: Proxy>(&mut self, host: &P, key: ObjectKey) {
        self.pending.push((host.id(), key));
    }

    /// Keys whose host twin the backend has confirmed deleted. Run after
    /// each host dispatch batch: events in the batch were handled first, so
    /// dropping the binding here preserves event-before-deletion ordering.
    pub fn reap(&mut self, backend: &Backend) -> Vec<ObjectKey> {
        let mut dead = Vec::new();
        self.pending.retain(|(id, key)| {
            if backend.info(id.clone()).is_err() {
                dead.push(*key);
                false
            } else {
                true
            }
        });
        dead
    }

    pub fn is_empty(&self) -> bool {
        self.pending.is_empty()
    }

    pub fn len(&self) -> usize {
        self.pending.len()
    }
}
