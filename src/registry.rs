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

//! Guest-facing registry. A fixed ordered table of supported globals is
//! matched against what the host advertises; each match is advertised to the
//! guest at `min(max_version, host_version)`, and every guest bind creates
//! the matching host binding.
//!
//! The host's zwp primary-selection global is advertised twice, once under
//! its own name and once as the legacy GTK name. wl_seat stays behind the
//! primary-selection managers in the table: some clients bind the seat first
//! and race their data-device setup otherwise.

use std::sync::Arc;
use std::sync::OnceLock;

use wayland_client::globals::GlobalListContents;
use wayland_client::protocol::wl_compositor::WlCompositor as HostWlCompositor;
use wayland_client::protocol::wl_data_device_manager::WlDataDeviceManager as HostWlDataDeviceManager;
use wayland_client::protocol::wl_output::WlOutput as HostWlOutput;
use wayland_client::protocol::wl_registry as host_wl_registry;
use wayland_client::protocol::wl_seat::WlSeat as HostWlSeat;
use wayland_client::protocol::wl_shm::WlShm as HostWlShm;
use wayland_protocols::wp::primary_selection::zv1::client::zwp_primary_selection_device_manager_v1::ZwpPrimarySelectionDeviceManagerV1 as HostPrimaryManager;
use wayland_protocols::wp::primary_selection::zv1::server::zwp_primary_selection_device_manager_v1::ZwpPrimarySelectionDeviceManagerV1;
use wayland_protocols::xdg::shell::client::xdg_wm_base::XdgWmBase as HostXdgWmBase;
use wayland_protocols::xdg::shell::server::xdg_wm_base::XdgWmBase;
use wayland_protocols::xdg::xdg_output::zv1::client::zxdg_output_manager_v1::ZxdgOutputManagerV1 as HostXdgOutputManager;
use wayland_protocols::xdg::xdg_output::zv1::server::zxdg_output_manager_v1::ZxdgOutputManagerV1;
use wayland_protocols_misc::gtk_primary_selection::server::gtk_primary_selection_device_manager::GtkPrimarySelectionDeviceManager;
use wayland_server::DataInit;
use wayland_server::DisplayHandle;
use wayland_server::GlobalDispatch;
use wayland_server::New;
use wayland_server::Resource;
use wayland_server::protocol::wl_compositor::WlCompositor;
use wayland_server::protocol::wl_data_device_manager::WlDataDeviceManager;
use wayland_server::protocol::wl_output::WlOutput;
use wayland_server::protocol::wl_seat::WlSeat;
use wayland_server::protocol::wl_shm::WlShm;

use crate::objects::Object;
use crate::objects::Pair;
use crate::prelude::*;
use crate::session::RelayState;
use crate::shell::PongQueue;
use crate::shell::WmBaseBinding;

/// Host twin of a guest-bound global whose objects need no per-object state.
/// Filled right after `data_init` hands back the guest resource (the host
/// bind wants the bound version, which only exists then).
#[derive(Debug)]
pub struct HostGlobal<T>(Arc<OnceLock<T>>);

impl<T> Clone for HostGlobal<T> {
    fn clone(&self) -> Self {
        Self(self.0.clone())
    }
}

impl<T> Default for HostGlobal<T> {
    fn default() -> Self {
        Self(Arc::new(OnceLock::new()))
    }
}

impl<T> HostGlobal<T> {
    fn set(&self, value: T) {
        let _ = self.0.set(value);
    }
}

impl<T> std::ops::Deref for HostGlobal<T> {
    type Target = T;
    fn deref(&self) -> &T {
        self.0.get().expect("host global bound at guest bind time")
    }
}

/// Per-advertised-global data: which host global backs it.
#[derive(Clone, Copy, Debug)]
pub struct RegistryEntry {
    pub host_name: u32,
}

struct SupportedGlobal {
    /// Interface advertised to the guest.
    interface: &'static str,
    /// Host interface backing it; differs only for the GTK rename.
    host_interface: &'static str,
    max_version: u32,
    advertise: fn(&DisplayHandle, u32, u32),
}

fn advertise<I>(dh: &DisplayHandle, version: u32, host_name: u32)
where
    I: Resource + 'static,
    RelayState: GlobalDispatch<I, RegistryEntry>,
{
    dh.create_global::<RelayState, I, RegistryEntry>(version, RegistryEntry { host_name });
}

/// Supported globals in advertisement order. wl_seat is intentionally after
/// the primary-selection managers.
const SUPPORTED_GLOBALS: &[SupportedGlobal] = &[
    SupportedGlobal {
        interface: "wl_compositor",
        host_interface: "wl_compositor",
        max_version: 6,
        advertise: advertise::<WlCompositor>,
    },
    SupportedGlobal {
        interface: "wl_shm",
        host_interface: "wl_shm",
        max_version: 1,
        advertise: advertise::<WlShm>,
    },
    SupportedGlobal {
        interface: "wl_output",
        host_interface: "wl_output",
        max_version: 4,
        advertise: advertise::<WlOutput>,
    },
    SupportedGlobal {
        interface: "zxdg_output_manager_v1",
        host_interface: "zxdg_output_manager_v1",
        max_version: 3,
        advertise: advertise::<ZxdgOutputManagerV1>,
    },
    SupportedGlobal {
        interface: "wl_data_device_manager",
        host_interface: "wl_data_device_manager",
        max_version: 3,
        advertise: advertise::<WlDataDeviceManager>,
    },
    SupportedGlobal {
        interface: "zwp_primary_selection_device_manager_v1",
        host_interface: "zwp_primary_selection_device_manager_v1",
        max_version: 1,
        advertise: advertise::<ZwpPrimarySelectionDeviceManagerV1>,
    },
    SupportedGlobal {
        interface: "gtk_primary_selection_device_manager",
        host_interface: "zwp_primary_selection_device_manager_v1",
        max_version: 1,
        advertise: advertise::<GtkPrimarySelectionDeviceManager>,
    },
    SupportedGlobal {
        interface: "wl_seat",
        host_interface: "wl_seat",
        max_version: 8,
        advertise: advertise::<WlSeat>,
    },
    SupportedGlobal {
        interface: "xdg_wm_base",
        host_interface: "xdg_wm_base",
        max_version: 5,
        advertise: advertise::<XdgWmBase>,
    },
];

/// Scans the host registry contents and advertises every supported global to
/// the guest.
pub fn advertise_supported_globals(state: &RelayState, dh: &DisplayHandle) {
    let host_globals = state.globals.contents().clone_list();
    for supported in SUPPORTED_GLOBALS {
        for global in host_globals
            .iter()
            .filter(|g| g.interface == supported.host_interface)
        {
            let version = supported.max_version.min(global.version);
            debug!(
                "advertising {}@v{version} backed by host {}@{}",
                supported.interface, supported.host_interface, global.name
            );
            (supported.advertise)(dh, version, global.name);
        }
    }
}

macro_rules! relay_global_direct {
    ($server:ty, $host:ty) => {
        impl GlobalDispatch<$server, RegistryEntry> for RelayState {
            fn bind(
                state: &mut Self,
                _dh: &DisplayHandle,
                _client: &wayland_server::Client,
                resource: New<$server>,
                entry: &RegistryEntry,
                data_init: &mut DataInit<'_, Self>,
            ) {
                let host = HostGlobal::<$host>::default();
                let server = data_init.init(resource, host.clone());
                host.set(state.globals.registry().bind::<$host, _, RelayState>(
                    entry.host_name,
                    server.version(),
                    &state.qh,
                    (),
                ));
            }
        }
    };
}

relay_global_direct!(WlCompositor, HostWlCompositor);
relay_global_direct!(ZxdgOutputManagerV1, HostXdgOutputManager);
relay_global_direct!(WlDataDeviceManager, HostWlDataDeviceManager);
relay_global_direct!(ZwpPrimarySelectionDeviceManagerV1, HostPrimaryManager);
relay_global_direct!(GtkPrimarySelectionDeviceManager, HostPrimaryManager);

macro_rules! relay_global_keyed {
    ($server:ty, $host:ty, $variant:ident) => {
        impl GlobalDispatch<$server, RegistryEntry> for RelayState {
            fn bind(
                state: &mut Self,
                _dh: &DisplayHandle,
                _client: &wayland_server::Client,
                resource: New<$server>,
                entry: &RegistryEntry,
                data_init: &mut DataInit<'_, Self>,
            ) {
                let qh = state.qh.clone();
                let registry = state.globals.registry().clone();
                let host_name = entry.host_name;
                state.objects.insert_with_key(|key| {
                    let server = data_init.init(resource, key);
                    let host = registry.bind::<$host, _, RelayState>(
                        host_name,
                        server.version(),
                        &qh,
                        key,
                    );
                    Object::$variant(Pair { server, host })
                });
            }
        }
    };
}

relay_global_keyed!(WlShm, HostWlShm, Shm);
relay_global_keyed!(WlOutput, HostWlOutput, Output);
relay_global_keyed!(WlSeat, HostWlSeat, Seat);

impl GlobalDispatch<XdgWmBase, RegistryEntry> for RelayState {
    fn bind(
        state: &mut Self,
        _dh: &DisplayHandle,
        _client: &wayland_server::Client,
        resource: New<XdgWmBase>,
        entry: &RegistryEntry,
        data_init: &mut DataInit<'_, Self>,
    ) {
        let qh = state.qh.clone();
        let registry = state.globals.registry().clone();
        let host_name = entry.host_name;
        let key = state.objects.insert_with_key(|key| {
            let server = data_init.init(resource, key);
            let host =
                registry.bind::<HostXdgWmBase, _, RelayState>(host_name, server.version(), &qh, key);
            Object::WmBase(WmBaseBinding {
                server,
                host,
                pongs: PongQueue::default(),
            })
        });
        state.wm_base = Some(key);
    }
}

impl wayland_client::Dispatch<host_wl_registry::WlRegistry, GlobalListContents> for RelayState {
    fn event(
        _state: &mut Self,
        _registry: &host_wl_registry::WlRegistry,
        _event: host_wl_registry::Event,
        _data: &GlobalListContents,
        _conn: &wayland_client::Connection,
        _qh: &wayland_client::QueueHandle<Self>,
    ) {
        // Registry advertisement is fixed at session start; late host global
        // changes are not relayed.
    }
}
