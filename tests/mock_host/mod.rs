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

//! An in-process host compositor for the relay tests: it accepts the relay's
//! host-facing connection, records everything the relay forwards, and can
//! emit events (offers, pings, sends) on demand.

use std::collections::HashMap;
use std::os::fd::AsFd;
use std::os::fd::OwnedFd;
use std::os::unix::net::UnixStream;
use std::sync::Arc;

use wayland_protocols::wp::primary_selection::zv1::server::zwp_primary_selection_device_manager_v1::{
    self, ZwpPrimarySelectionDeviceManagerV1,
};
use wayland_protocols::wp::primary_selection::zv1::server::zwp_primary_selection_device_v1::{
    self, ZwpPrimarySelectionDeviceV1,
};
use wayland_protocols::wp::primary_selection::zv1::server::zwp_primary_selection_offer_v1::{
    self, ZwpPrimarySelectionOfferV1,
};
use wayland_protocols::wp::primary_selection::zv1::server::zwp_primary_selection_source_v1::{
    self, ZwpPrimarySelectionSourceV1,
};
use wayland_protocols::xdg::shell::server::xdg_popup::XdgPopup;
use wayland_protocols::xdg::shell::server::xdg_positioner::XdgPositioner;
use wayland_protocols::xdg::shell::server::xdg_surface::{self, XdgSurface};
use wayland_protocols::xdg::shell::server::xdg_toplevel::{self, XdgToplevel};
use wayland_protocols::xdg::shell::server::xdg_wm_base::{self, XdgWmBase};
use wayland_protocols::xdg::xdg_output::zv1::server::zxdg_output_manager_v1::{
    self, ZxdgOutputManagerV1,
};
use wayland_protocols::xdg::xdg_output::zv1::server::zxdg_output_v1::{self, ZxdgOutputV1};
use wayland_server::backend::{ClientData, ClientId, DisconnectReason};
use wayland_server::protocol::wl_buffer::{self, WlBuffer};
use wayland_server::protocol::wl_callback::WlCallback;
use wayland_server::protocol::wl_compositor::{self, WlCompositor};
use wayland_server::protocol::wl_data_device::{self, WlDataDevice};
use wayland_server::protocol::wl_data_device_manager::{self, WlDataDeviceManager};
use wayland_server::protocol::wl_data_offer::{self, WlDataOffer};
use wayland_server::protocol::wl_data_source::{self, WlDataSource};
use wayland_server::protocol::wl_keyboard::{self, WlKeyboard};
use wayland_server::protocol::wl_output::{self, WlOutput};
use wayland_server::protocol::wl_pointer::{self, WlPointer};
use wayland_server::protocol::wl_region::{self, WlRegion};
use wayland_server::protocol::wl_seat::{self, WlSeat};
use wayland_server::protocol::wl_shm::{self, WlShm};
use wayland_server::protocol::wl_shm_pool::{self, WlShmPool};
use wayland_server::protocol::wl_surface::{self, WlSurface};
use wayland_server::{
    Client, DataInit, Dispatch, Display, DisplayHandle, GlobalDispatch, New, Resource,
};

use wlrelay::mapping::Mmap;

#[derive(Debug)]
pub struct PoolEntry {
    pub fd: OwnedFd,
    pub size: i32,
}

#[derive(Clone, Debug)]
pub struct BufferEntry {
    pub pool: WlShmPool,
    pub offset: i32,
    pub width: i32,
    pub height: i32,
    pub stride: i32,
}

#[derive(Debug, Default)]
pub struct SurfaceEntry {
    pub attached: Option<WlBuffer>,
    pub commits: u32,
    pub last_commit_bytes: Option<Vec<u8>>,
    pub buffer_scales: Vec<i32>,
}

#[derive(Debug, Default)]
pub struct HostState {
    pub pools_created: u32,
    pub pools: HashMap<WlShmPool, PoolEntry>,
    pub buffers: HashMap<WlBuffer, BufferEntry>,
    pub surfaces: HashMap<WlSurface, SurfaceEntry>,
    pub regions_created: u32,
    pub regions_destroyed: u32,
    pub seat: Option<WlSeat>,
    pub data_sources: HashMap<WlDataSource, Vec<String>>,
    pub selection: Option<WlDataSource>,
    pub data_device: Option<WlDataDevice>,
    pub offer_receives: Vec<String>,
    pub primary_sources: HashMap<ZwpPrimarySelectionSourceV1, Vec<String>>,
    pub primary_selection: Option<ZwpPrimarySelectionSourceV1>,
    pub primary_device: Option<ZwpPrimarySelectionDeviceV1>,
    pub primary_receives: Vec<String>,
    pub wm_base: Option<XdgWmBase>,
    pub pongs: Vec<u32>,
    pub titles: Vec<String>,
}

struct RelayClient;

impl ClientData for RelayClient {
    fn initialized(&self, _client_id: ClientId) {}
    fn disconnected(&self, _client_id: ClientId, _reason: DisconnectReason) {}
}

pub struct MockHost {
    display: Display<HostState>,
    dh: DisplayHandle,
    pub state: HostState,
    client: Option<Client>,
}

impl MockHost {
    pub fn new() -> Self {
        let display = Display::<HostState>::new().unwrap();
        let dh = display.handle();

        dh.create_global::<HostState, WlCompositor, _>(6, ());
        dh.create_global::<HostState, WlShm, _>(1, ());
        dh.create_global::<HostState, WlOutput, _>(4, ());
        dh.create_global::<HostState, ZxdgOutputManagerV1, _>(3, ());
        dh.create_global::<HostState, WlDataDeviceManager, _>(3, ());
        dh.create_global::<HostState, ZwpPrimarySelectionDeviceManagerV1, _>(1, ());
        dh.create_global::<HostState, WlSeat, _>(8, ());
        dh.create_global::<HostState, XdgWmBase, _>(5, ());

        Self {
            display,
            dh,
            state: HostState::default(),
            client: None,
        }
    }

    pub fn connect(&mut self, stream: UnixStream) {
        let client = self.dh.insert_client(stream, Arc::new(RelayClient)).unwrap();
        assert!(self.client.replace(client).is_none());
    }

    pub fn pump(&mut self) {
        self.display.dispatch_clients(&mut self.state).unwrap();
        self.display.flush_clients().unwrap();
    }

    fn client(&self) -> &Client {
        self.client.as_ref().expect("relay not connected")
    }

    /// Announces a clipboard offer advertising `mimes` and makes it the
    /// current selection.
    pub fn create_data_offer(&mut self, mimes: &[&str]) {
        let device = self.state.data_device.clone().expect("no data device bound");
        let offer: WlDataOffer = self
            .client()
            .create_resource::<WlDataOffer, (), HostState>(&self.dh, device.version(), ())
            .unwrap();
        device.data_offer(&offer);
        for mime in mimes {
            offer.offer((*mime).to_owned());
        }
        device.selection(Some(&offer));
        self.display.flush_clients().unwrap();
    }

    /// Same for the zwp primary-selection device.
    pub fn create_primary_offer(&mut self, mimes: &[&str]) {
        let device = self
            .state
            .primary_device
            .clone()
            .expect("no primary device bound");
        let offer: ZwpPrimarySelectionOfferV1 = self
            .client()
            .create_resource::<ZwpPrimarySelectionOfferV1, (), HostState>(
                &self.dh,
                device.version(),
                (),
            )
            .unwrap();
        device.data_offer(&offer);
        for mime in mimes {
            offer.offer((*mime).to_owned());
        }
        device.selection(Some(&offer));
        self.display.flush_clients().unwrap();
    }

    /// Asks the current selection source for data, like a host-side paste.
    pub fn request_selection_data(&mut self, mime: &str, fd: &OwnedFd) {
        let source = self.state.selection.clone().expect("no selection set");
        source.send(mime.to_owned(), fd.as_fd());
        self.display.flush_clients().unwrap();
    }

    pub fn request_primary_data(&mut self, mime: &str, fd: &OwnedFd) {
        let source = self
            .state
            .primary_selection
            .clone()
            .expect("no primary selection set");
        source.send(mime.to_owned(), fd.as_fd());
        self.display.flush_clients().unwrap();
    }

    pub fn ping(&mut self, serial: u32) {
        let wm_base = self.state.wm_base.clone().expect("no wm_base bound");
        wm_base.ping(serial);
        self.display.flush_clients().unwrap();
    }

    pub fn mimes_of_selection(&self) -> Vec<String> {
        let source = self.state.selection.as_ref().expect("no selection set");
        self.state.data_sources.get(source).cloned().unwrap_or_default()
    }

    pub fn mimes_of_primary_selection(&self) -> Vec<String> {
        let source = self
            .state
            .primary_selection
            .as_ref()
            .expect("no primary selection set");
        self.state
            .primary_sources
            .get(source)
            .cloned()
            .unwrap_or_default()
    }
}

impl HostState {
    fn snapshot_commit(&mut self, surface: &WlSurface) {
        let Some(entry) = self.surfaces.get(surface) else {
            return;
        };
        let bytes = entry.attached.as_ref().and_then(|buffer| {
            let buffer = self.buffers.get(buffer)?;
            let pool = self.pools.get(&buffer.pool)?;
            let mapping = Mmap::map_shared(&pool.fd, pool.size as usize).ok()?;
            let start = buffer.offset as usize;
            let len = (buffer.height * buffer.stride) as usize;
            Some(mapping.as_slice()[start..start + len].to_vec())
        });
        let entry = self.surfaces.get_mut(surface).unwrap();
        entry.commits += 1;
        entry.last_commit_bytes = bytes;
    }
}

macro_rules! simple_global {
    ($type:ty) => {
        impl GlobalDispatch<$type, ()> for HostState {
            fn bind(
                _state: &mut Self,
                _dh: &DisplayHandle,
                _client: &Client,
                resource: New<$type>,
                _data: &(),
                data_init: &mut DataInit<'_, Self>,
            ) {
                data_init.init(resource, ());
            }
        }
    };
}

simple_global!(WlCompositor);
simple_global!(ZxdgOutputManagerV1);
simple_global!(WlDataDeviceManager);

impl GlobalDispatch<WlShm, ()> for HostState {
    fn bind(
        _state: &mut Self,
        _dh: &DisplayHandle,
        _client: &Client,
        resource: New<WlShm>,
        _data: &(),
        data_init: &mut DataInit<'_, Self>,
    ) {
        let shm = data_init.init(resource, ());
        shm.format(wl_shm::Format::Argb8888);
        shm.format(wl_shm::Format::Xrgb8888);
    }
}

impl GlobalDispatch<WlOutput, ()> for HostState {
    fn bind(
        _state: &mut Self,
        _dh: &DisplayHandle,
        _client: &Client,
        resource: New<WlOutput>,
        _data: &(),
        data_init: &mut DataInit<'_, Self>,
    ) {
        let output = data_init.init(resource, ());
        output.geometry(
            0,
            0,
            300,
            200,
            wl_output::Subpixel::None,
            "mock".to_owned(),
            "monitor".to_owned(),
            wl_output::Transform::Normal,
        );
        output.mode(wl_output::Mode::Current, 1920, 1080, 60000);
        if output.version() >= 2 {
            output.scale(2);
            output.done();
        }
    }
}

impl GlobalDispatch<WlSeat, ()> for HostState {
    fn bind(
        state: &mut Self,
        _dh: &DisplayHandle,
        _client: &Client,
        resource: New<WlSeat>,
        _data: &(),
        data_init: &mut DataInit<'_, Self>,
    ) {
        let seat = data_init.init(resource, ());
        // Touch included on purpose: the relay must filter it out.
        seat.capabilities(
            wl_seat::Capability::Pointer
                | wl_seat::Capability::Keyboard
                | wl_seat::Capability::Touch,
        );
        if seat.version() >= 2 {
            seat.name("mock-seat".to_owned());
        }
        state.seat = Some(seat);
    }
}

impl GlobalDispatch<ZwpPrimarySelectionDeviceManagerV1, ()> for HostState {
    fn bind(
        _state: &mut Self,
        _dh: &DisplayHandle,
        _client: &Client,
        resource: New<ZwpPrimarySelectionDeviceManagerV1>,
        _data: &(),
        data_init: &mut DataInit<'_, Self>,
    ) {
        data_init.init(resource, ());
    }
}

impl GlobalDispatch<XdgWmBase, ()> for HostState {
    fn bind(
        state: &mut Self,
        _dh: &DisplayHandle,
        _client: &Client,
        resource: New<XdgWmBase>,
        _data: &(),
        data_init: &mut DataInit<'_, Self>,
    ) {
        state.wm_base = Some(data_init.init(resource, ()));
    }
}

impl Dispatch<WlCompositor, ()> for HostState {
    fn request(
        state: &mut Self,
        _client: &Client,
        _compositor: &WlCompositor,
        request: wl_compositor::Request,
        _data: &(),
        _dhandle: &DisplayHandle,
        data_init: &mut DataInit<'_, Self>,
    ) {
        match request {
            wl_compositor::Request::CreateSurface { id } => {
                let surface = data_init.init(id, ());
                state.surfaces.insert(surface, SurfaceEntry::default());
            },
            wl_compositor::Request::CreateRegion { id } => {
                data_init.init(id, ());
                state.regions_created += 1;
            },
            _ => unreachable!(),
        }
    }
}

impl Dispatch<WlSurface, ()> for HostState {
    fn request(
        state: &mut Self,
        _client: &Client,
        surface: &WlSurface,
        request: wl_surface::Request,
        _data: &(),
        _dhandle: &DisplayHandle,
        data_init: &mut DataInit<'_, Self>,
    ) {
        match request {
            wl_surface::Request::Attach { buffer, .. } => {
                if let Some(entry) = state.surfaces.get_mut(surface) {
                    entry.attached = buffer;
                }
            },
            wl_surface::Request::Commit => state.snapshot_commit(surface),
            wl_surface::Request::SetBufferScale { scale } => {
                if let Some(entry) = state.surfaces.get_mut(surface) {
                    entry.buffer_scales.push(scale);
                }
            },
            wl_surface::Request::Frame { callback } => {
                let callback = data_init.init(callback, ());
                callback.done(0);
            },
            wl_surface::Request::Destroy => {
                state.surfaces.remove(surface);
            },
            _ => {},
        }
    }
}

impl Dispatch<WlCallback, ()> for HostState {
    fn request(
        _state: &mut Self,
        _client: &Client,
        _callback: &WlCallback,
        _request: <WlCallback as Resource>::Request,
        _data: &(),
        _dhandle: &DisplayHandle,
        _data_init: &mut DataInit<'_, Self>,
    ) {
        unreachable!();
    }
}

impl Dispatch<WlRegion, ()> for HostState {
    fn request(
        state: &mut Self,
        _client: &Client,
        _region: &WlRegion,
        request: wl_region::Request,
        _data: &(),
        _dhandle: &DisplayHandle,
        _data_init: &mut DataInit<'_, Self>,
    ) {
        match request {
            wl_region::Request::Destroy => state.regions_destroyed += 1,
            _ => {},
        }
    }
}

impl Dispatch<WlShm, ()> for HostState {
    fn request(
        state: &mut Self,
        _client: &Client,
        _shm: &WlShm,
        request: wl_shm::Request,
        _data: &(),
        _dhandle: &DisplayHandle,
        data_init: &mut DataInit<'_, Self>,
    ) {
        match request {
            wl_shm::Request::CreatePool { id, fd, size } => {
                let pool = data_init.init(id, ());
                state.pools_created += 1;
                state.pools.insert(pool, PoolEntry { fd, size });
            },
            _ => unreachable!(),
        }
    }
}

impl Dispatch<WlShmPool, ()> for HostState {
    fn request(
        state: &mut Self,
        _client: &Client,
        pool: &WlShmPool,
        request: wl_shm_pool::Request,
        _data: &(),
        _dhandle: &DisplayHandle,
        data_init: &mut DataInit<'_, Self>,
    ) {
        match request {
            wl_shm_pool::Request::CreateBuffer {
                id,
                offset,
                width,
                height,
                stride,
                ..
            } => {
                let buffer = data_init.init(id, ());
                state.buffers.insert(
                    buffer,
                    BufferEntry {
                        pool: pool.clone(),
                        offset,
                        width,
                        height,
                        stride,
                    },
                );
            },
            wl_shm_pool::Request::Resize { size } => {
                if let Some(entry) = state.pools.get_mut(pool) {
                    entry.size = size;
                }
            },
            wl_shm_pool::Request::Destroy => {
                state.pools.remove(pool);
            },
            _ => unreachable!(),
        }
    }
}

impl Dispatch<WlBuffer, ()> for HostState {
    fn request(
        state: &mut Self,
        _client: &Client,
        buffer: &WlBuffer,
        request: wl_buffer::Request,
        _data: &(),
        _dhandle: &DisplayHandle,
        _data_init: &mut DataInit<'_, Self>,
    ) {
        match request {
            wl_buffer::Request::Destroy => {
                state.buffers.remove(buffer);
            },
            _ => unreachable!(),
        }
    }
}

impl Dispatch<WlSeat, ()> for HostState {
    fn request(
        _state: &mut Self,
        _client: &Client,
        _seat: &WlSeat,
        request: wl_seat::Request,
        _data: &(),
        _dhandle: &DisplayHandle,
        data_init: &mut DataInit<'_, Self>,
    ) {
        match request {
            wl_seat::Request::GetPointer { id } => {
                data_init.init(id, ());
            },
            wl_seat::Request::GetKeyboard { id } => {
                data_init.init(id, ());
            },
            wl_seat::Request::Release => {},
            _ => unreachable!(),
        }
    }
}

impl Dispatch<WlPointer, ()> for HostState {
    fn request(
        _state: &mut Self,
        _client: &Client,
        _pointer: &WlPointer,
        request: wl_pointer::Request,
        _data: &(),
        _dhandle: &DisplayHandle,
        _data_init: &mut DataInit<'_, Self>,
    ) {
        match request {
            wl_pointer::Request::SetCursor { .. } | wl_pointer::Request::Release => {},
            _ => unreachable!(),
        }
    }
}

impl Dispatch<WlKeyboard, ()> for HostState {
    fn request(
        _state: &mut Self,
        _client: &Client,
        _keyboard: &WlKeyboard,
        request: wl_keyboard::Request,
        _data: &(),
        _dhandle: &DisplayHandle,
        _data_init: &mut DataInit<'_, Self>,
    ) {
        match request {
            wl_keyboard::Request::Release => {},
            _ => unreachable!(),
        }
    }
}

impl Dispatch<WlOutput, ()> for HostState {
    fn request(
        _state: &mut Self,
        _client: &Client,
        _output: &WlOutput,
        request: wl_output::Request,
        _data: &(),
        _dhandle: &DisplayHandle,
        _data_init: &mut DataInit<'_, Self>,
    ) {
        match request {
            wl_output::Request::Release => {},
            _ => unreachable!(),
        }
    }
}

impl Dispatch<ZxdgOutputManagerV1, ()> for HostState {
    fn request(
        _state: &mut Self,
        _client: &Client,
        _manager: &ZxdgOutputManagerV1,
        request: zxdg_output_manager_v1::Request,
        _data: &(),
        _dhandle: &DisplayHandle,
        data_init: &mut DataInit<'_, Self>,
    ) {
        match request {
            zxdg_output_manager_v1::Request::GetXdgOutput { id, .. } => {
                let xdg_output = data_init.init(id, ());
                xdg_output.logical_position(0, 0);
                xdg_output.logical_size(960, 540);
                xdg_output.done();
            },
            zxdg_output_manager_v1::Request::Destroy => {},
            _ => unreachable!(),
        }
    }
}

impl Dispatch<ZxdgOutputV1, ()> for HostState {
    fn request(
        _state: &mut Self,
        _client: &Client,
        _xdg_output: &ZxdgOutputV1,
        request: zxdg_output_v1::Request,
        _data: &(),
        _dhandle: &DisplayHandle,
        _data_init: &mut DataInit<'_, Self>,
    ) {
        match request {
            zxdg_output_v1::Request::Destroy => {},
            _ => unreachable!(),
        }
    }
}

impl Dispatch<WlDataDeviceManager, ()> for HostState {
    fn request(
        state: &mut Self,
        _client: &Client,
        _manager: &WlDataDeviceManager,
        request: wl_data_device_manager::Request,
        _data: &(),
        _dhandle: &DisplayHandle,
        data_init: &mut DataInit<'_, Self>,
    ) {
        match request {
            wl_data_device_manager::Request::CreateDataSource { id } => {
                let source = data_init.init(id, ());
                state.data_sources.insert(source, Vec::new());
            },
            wl_data_device_manager::Request::GetDataDevice { id, .. } => {
                state.data_device = Some(data_init.init(id, ()));
            },
            _ => unreachable!(),
        }
    }
}

impl Dispatch<WlDataSource, ()> for HostState {
    fn request(
        state: &mut Self,
        _client: &Client,
        source: &WlDataSource,
        request: wl_data_source::Request,
        _data: &(),
        _dhandle: &DisplayHandle,
        _data_init: &mut DataInit<'_, Self>,
    ) {
        match request {
            wl_data_source::Request::Offer { mime_type } => {
                state.data_sources.entry(source.clone()).or_default().push(mime_type);
            },
            wl_data_source::Request::SetActions { .. } => {},
            wl_data_source::Request::Destroy => {
                state.data_sources.remove(source);
                if state.selection.as_ref() == Some(source) {
                    state.selection = None;
                }
            },
            _ => unreachable!(),
        }
    }
}

impl Dispatch<WlDataDevice, ()> for HostState {
    fn request(
        state: &mut Self,
        _client: &Client,
        _device: &WlDataDevice,
        request: wl_data_device::Request,
        _data: &(),
        _dhandle: &DisplayHandle,
        _data_init: &mut DataInit<'_, Self>,
    ) {
        match request {
            wl_data_device::Request::SetSelection { source, .. } => {
                state.selection = source;
            },
            wl_data_device::Request::StartDrag { .. } => {},
            wl_data_device::Request::Release => {
                state.data_device = None;
            },
            _ => unreachable!(),
        }
    }
}

impl Dispatch<WlDataOffer, ()> for HostState {
    fn request(
        state: &mut Self,
        _client: &Client,
        _offer: &WlDataOffer,
        request: wl_data_offer::Request,
        _data: &(),
        _dhandle: &DisplayHandle,
        _data_init: &mut DataInit<'_, Self>,
    ) {
        match request {
            wl_data_offer::Request::Receive { mime_type, .. } => {
                state.offer_receives.push(mime_type);
            },
            wl_data_offer::Request::Accept { .. }
            | wl_data_offer::Request::Finish
            | wl_data_offer::Request::SetActions { .. }
            | wl_data_offer::Request::Destroy => {},
            _ => unreachable!(),
        }
    }
}

impl Dispatch<ZwpPrimarySelectionDeviceManagerV1, ()> for HostState {
    fn request(
        state: &mut Self,
        _client: &Client,
        _manager: &ZwpPrimarySelectionDeviceManagerV1,
        request: zwp_primary_selection_device_manager_v1::Request,
        _data: &(),
        _dhandle: &DisplayHandle,
        data_init: &mut DataInit<'_, Self>,
    ) {
        match request {
            zwp_primary_selection_device_manager_v1::Request::CreateSource { id } => {
                let source = data_init.init(id, ());
                state.primary_sources.insert(source, Vec::new());
            },
            zwp_primary_selection_device_manager_v1::Request::GetDevice { id, .. } => {
                state.primary_device = Some(data_init.init(id, ()));
            },
            zwp_primary_selection_device_manager_v1::Request::Destroy => {},
            _ => unreachable!(),
        }
    }
}

impl Dispatch<ZwpPrimarySelectionSourceV1, ()> for HostState {
    fn request(
        state: &mut Self,
        _client: &Client,
        source: &ZwpPrimarySelectionSourceV1,
        request: zwp_primary_selection_source_v1::Request,
        _data: &(),
        _dhandle: &DisplayHandle,
        _data_init: &mut DataInit<'_, Self>,
    ) {
        match request {
            zwp_primary_selection_source_v1::Request::Offer { mime_type } => {
                state
                    .primary_sources
                    .entry(source.clone())
                    .or_default()
                    .push(mime_type);
            },
            zwp_primary_selection_source_v1::Request::Destroy => {
                state.primary_sources.remove(source);
                if state.primary_selection.as_ref() == Some(source) {
                    state.primary_selection = None;
                }
            },
            _ => unreachable!(),
        }
    }
}

impl Dispatch<ZwpPrimarySelectionDeviceV1, ()> for HostState {
    fn request(
        state: &mut Self,
        _client: &Client,
        _device: &ZwpPrimarySelectionDeviceV1,
        request: zwp_primary_selection_device_v1::Request,
        _data: &(),
        _dhandle: &DisplayHandle,
        _data_init: &mut DataInit<'_, Self>,
    ) {
        match request {
            zwp_primary_selection_device_v1::Request::SetSelection { source, .. } => {
                state.primary_selection = source;
            },
            zwp_primary_selection_device_v1::Request::Destroy => {
                state.primary_device = None;
            },
            _ => unreachable!(),
        }
    }
}

impl Dispatch<ZwpPrimarySelectionOfferV1, ()> for HostState {
    fn request(
        state: &mut Self,
        _client: &Client,
        _offer: &ZwpPrimarySelectionOfferV1,
        request: zwp_primary_selection_offer_v1::Request,
        _data: &(),
        _dhandle: &DisplayHandle,
        _data_init: &mut DataInit<'_, Self>,
    ) {
        match request {
            zwp_primary_selection_offer_v1::Request::Receive { mime_type, .. } => {
                state.primary_receives.push(mime_type);
            },
            zwp_primary_selection_offer_v1::Request::Destroy => {},
            _ => unreachable!(),
        }
    }
}

impl Dispatch<XdgWmBase, ()> for HostState {
    fn request(
        state: &mut Self,
        _client: &Client,
        _wm_base: &XdgWmBase,
        request: xdg_wm_base::Request,
        _data: &(),
        _dhandle: &DisplayHandle,
        data_init: &mut DataInit<'_, Self>,
    ) {
        match request {
            xdg_wm_base::Request::CreatePositioner { id } => {
                data_init.init(id, ());
            },
            xdg_wm_base::Request::GetXdgSurface { id, .. } => {
                data_init.init(id, ());
            },
            xdg_wm_base::Request::Pong { serial } => state.pongs.push(serial),
            xdg_wm_base::Request::Destroy => {},
            _ => unreachable!(),
        }
    }
}

impl Dispatch<XdgPositioner, ()> for HostState {
    fn request(
        _state: &mut Self,
        _client: &Client,
        _positioner: &XdgPositioner,
        _request: <XdgPositioner as Resource>::Request,
        _data: &(),
        _dhandle: &DisplayHandle,
        _data_init: &mut DataInit<'_, Self>,
    ) {
    }
}

impl Dispatch<XdgSurface, ()> for HostState {
    fn request(
        _state: &mut Self,
        _client: &Client,
        xdg_surface: &XdgSurface,
        request: xdg_surface::Request,
        _data: &(),
        _dhandle: &DisplayHandle,
        data_init: &mut DataInit<'_, Self>,
    ) {
        match request {
            xdg_surface::Request::GetToplevel { id } => {
                let toplevel = data_init.init(id, ());
                toplevel.configure(0, 0, Vec::new());
                xdg_surface.configure(1);
            },
            xdg_surface::Request::GetPopup { id, .. } => {
                data_init.init(id, ());
            },
            xdg_surface::Request::AckConfigure { .. }
            | xdg_surface::Request::SetWindowGeometry { .. }
            | xdg_surface::Request::Destroy => {},
            _ => unreachable!(),
        }
    }
}

impl Dispatch<XdgToplevel, ()> for HostState {
    fn request(
        state: &mut Self,
        _client: &Client,
        _toplevel: &XdgToplevel,
        request: xdg_toplevel::Request,
        _data: &(),
        _dhandle: &DisplayHandle,
        _data_init: &mut DataInit<'_, Self>,
    ) {
        match request {
            xdg_toplevel::Request::SetTitle { title } => state.titles.push(title),
            _ => {},
        }
    }
}

impl Dispatch<XdgPopup, ()> for HostState {
    fn request(
        _state: &mut Self,
        _client: &Client,
        _popup: &XdgPopup,
        _request: <XdgPopup as Resource>::Request,
        _data: &(),
        _dhandle: &DisplayHandle,
        _data_init: &mut DataInit<'_, Self>,
    ) {
    }
}
