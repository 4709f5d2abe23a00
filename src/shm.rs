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

//! Guest shm-pool virtualization.
//!
//! Guest pool fds are not directly shareable with the host when the host sits
//! behind virtio-gpu, so each guest pool is mirrored by a host-resident
//! allocation of the same size. Both regions are mapped into the relay and
//! the guest bytes are copied host-ward on surface commit. The mirror is
//! lazy: nothing is allocated or mapped until a buffer from the pool is
//! actually attached, because Xwayland creates many pools it never attaches.
//!
//! Without an allocator (plain-socket hosts) pools pass through: the guest fd
//! goes to the host verbatim and buffers relay directly.

use std::cell::RefCell;
use std::os::fd::AsFd;
use std::os::fd::OwnedFd;
use std::rc::Rc;
use std::sync::Arc;

use wayland_client::Proxy;
use wayland_client::protocol::wl_buffer::WlBuffer as HostWlBuffer;
use wayland_client::protocol::wl_shm as host_wl_shm;
use wayland_client::protocol::wl_shm::WlShm as HostWlShm;
use wayland_client::protocol::wl_shm_pool::WlShmPool as HostWlShmPool;
use wayland_server::DataInit;
use wayland_server::Dispatch;
use wayland_server::DisplayHandle;
use wayland_server::Resource;
use wayland_server::protocol::wl_buffer;
use wayland_server::protocol::wl_buffer::WlBuffer;
use wayland_server::protocol::wl_shm;
use wayland_server::protocol::wl_shm::WlShm;
use wayland_server::protocol::wl_shm_pool;
use wayland_server::protocol::wl_shm_pool::WlShmPool;

use crate::mapping::Mmap;
use crate::objects::Object;
use crate::objects::ObjectKey;
use crate::objects::Pair;
use crate::objects::convert_wenum;
use crate::prelude::*;
use crate::session::RelayState;
use crate::virtgpu::AllocQuery;
use crate::virtgpu::DRM_FORMAT_R8;
use crate::virtgpu::GpuAllocator;

/// A byte range within a pool; identical on the guest and host sides of the
/// mirror.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct BufferRange {
    pub offset: usize,
    pub len: usize,
}

/// Validates buffer geometry against the pool size and yields the mirrored
/// range. The range length is always height × stride.
pub fn buffer_range(
    offset: i32,
    width: i32,
    height: i32,
    stride: i32,
    pool_size: i32,
) -> Result<BufferRange> {
    if offset < 0 || width <= 0 || height <= 0 || stride <= 0 {
        bail!("invalid buffer geometry: {offset} {width}x{height} stride {stride}");
    }
    let len = i64::from(height) * i64::from(stride);
    let end = i64::from(offset) + len;
    if end > i64::from(pool_size) {
        bail!("buffer range {offset}..{end} exceeds pool of {pool_size} bytes");
    }
    Ok(BufferRange {
        offset: offset as usize,
        len: len as usize,
    })
}

/// The realized host half of a pool mirror.
#[derive(Debug)]
pub struct PoolMapping {
    pub host_pool: HostWlShmPool,
    guest_mem: Mmap,
    host_mem: Mmap,
}

impl PoolMapping {
    /// Commit-time copy: guest bytes into the host mirror, full range.
    pub fn copy_to_host(&mut self, range: BufferRange) -> Result<()> {
        self.host_mem
            .copy_range_from(&self.guest_mem, range.offset, range.len)
    }
}

impl Drop for PoolMapping {
    fn drop(&mut self) {
        if self.host_pool.is_alive() {
            self.host_pool.destroy();
        }
    }
}

/// One guest pool and its (lazily created) host mirror. Shared by the pool
/// binding and every buffer binding carved from it; `refcount` counts exactly
/// those owners, and the guest fd is closed when it reaches zero.
#[derive(Debug)]
pub struct ShmPool {
    host_shm: HostWlShm,
    gpu: Arc<dyn GpuAllocator>,
    size: i32,
    client_fd: Option<OwnedFd>,
    refcount: u32,
    mapping: Option<PoolMapping>,
}

pub type SharedPool = Rc<RefCell<ShmPool>>;

impl ShmPool {
    pub fn new(host_shm: HostWlShm, gpu: Arc<dyn GpuAllocator>, fd: OwnedFd, size: i32) -> Self {
        Self {
            host_shm,
            gpu,
            size,
            client_fd: Some(fd),
            refcount: 1,
            mapping: None,
        }
    }

    pub fn size(&self) -> i32 {
        self.size
    }

    pub fn refcount(&self) -> u32 {
        self.refcount
    }

    pub fn is_mapped(&self) -> bool {
        self.mapping.is_some()
    }

    pub fn retain(&mut self) {
        self.refcount += 1;
    }

    pub fn release(&mut self) {
        self.refcount = self.refcount.saturating_sub(1);
        if self.refcount == 0 {
            self.client_fd = None;
            self.mapping = None;
        }
    }

    /// Resizing to a different size drops the mirror; it is re-created at the
    /// new size on the next attach. Buffers created before the resize are
    /// expected to be re-created by the guest and are not re-sliced.
    pub fn resize(&mut self, new_size: i32) {
        if new_size == self.size {
            return;
        }
        self.size = new_size;
        self.mapping = None;
    }

    pub fn mapping_mut(&mut self) -> Option<&mut PoolMapping> {
        self.mapping.as_mut()
    }

    fn ensure_mapping(
        &mut self,
        qh: &wayland_client::QueueHandle<RelayState>,
    ) -> Result<&mut PoolMapping> {
        if self.mapping.is_none() {
            let size = usize::try_from(self.size)
                .ok()
                .filter(|s| *s > 0)
                .ok_or(anyhow!("cannot map a pool of {} bytes", self.size))?;
            let fd = self
                .client_fd
                .as_ref()
                .ok_or(anyhow!("pool fd already closed"))?;

            let image = self
                .gpu
                .alloc(AllocQuery {
                    width: size as u32,
                    height: 1,
                    drm_format: DRM_FORMAT_R8,
                })
                .location(loc!())?;
            if image.host_size < size as u64 {
                bail!(
                    "allocator returned {} bytes for a {size}-byte pool",
                    image.host_size
                );
            }
            if image.offset != 0 {
                bail!("allocator returned non-zero image offset {}", image.offset);
            }

            let guest_mem = Mmap::map_shared(fd, size).location(loc!())?;
            let host_mem = Mmap::map_shared(&image.fd, size).location(loc!())?;
            let host_pool = self.host_shm.create_pool(image.fd.as_fd(), self.size, qh, ());

            self.mapping = Some(PoolMapping {
                host_pool,
                guest_mem,
                host_mem,
            });
        }
        Ok(self.mapping.as_mut().unwrap())
    }
}

#[derive(Debug)]
pub enum PoolBinding {
    Virtual(SharedPool),
    Direct(HostWlShmPool),
}

/// A buffer's view into its pool's mirror, recorded on the surface while the
/// buffer is attached.
#[derive(Clone, Debug)]
pub struct BufferView {
    pub pool: SharedPool,
    pub range: BufferRange,
}

impl BufferView {
    /// Copies the guest bytes of this view into the host mirror. A view can
    /// outlive its mapping (pool resized or refcount exhausted while still
    /// attached); that skips the copy with a warning rather than writing
    /// through a stale range.
    pub fn commit_copy(&self) -> Result<()> {
        let mut pool = self.pool.borrow_mut();
        match pool.mapping_mut() {
            Some(mapping) => mapping.copy_to_host(self.range),
            None => bail!("attached buffer's pool is no longer mapped"),
        }
    }
}

#[derive(Debug)]
pub struct RealizedBuffer {
    pub host: HostWlBuffer,
    pub range: BufferRange,
}

#[derive(Debug)]
pub struct VirtualBuffer {
    pub pool: SharedPool,
    offset: i32,
    width: i32,
    height: i32,
    stride: i32,
    format_raw: u32,
    realized: Option<RealizedBuffer>,
}

impl VirtualBuffer {
    pub fn realized(&self) -> Option<&RealizedBuffer> {
        self.realized.as_ref()
    }

    /// Forces the lazy half: maps the pool (allocating the host mirror on
    /// first use) and creates the host-side buffer of the same geometry.
    pub fn realize(
        &mut self,
        qh: &wayland_client::QueueHandle<RelayState>,
        key: ObjectKey,
    ) -> Result<(HostWlBuffer, BufferView)> {
        if self.realized.is_none() {
            let mut pool = self.pool.borrow_mut();
            let range = buffer_range(self.offset, self.width, self.height, self.stride, pool.size())
                .location(loc!())?;
            let format = host_wl_shm::Format::try_from(self.format_raw)
                .map_err(|_| anyhow!("unknown shm format {:#x}", self.format_raw))?;
            let mapping = pool.ensure_mapping(qh).location(loc!())?;
            let host = mapping.host_pool.create_buffer(
                self.offset,
                self.width,
                self.height,
                self.stride,
                format,
                qh,
                key,
            );
            self.realized = Some(RealizedBuffer { host, range });
        }

        let realized = self.realized.as_ref().unwrap();
        Ok((
            realized.host.clone(),
            BufferView {
                pool: self.pool.clone(),
                range: realized.range,
            },
        ))
    }
}

#[derive(Debug)]
pub enum BufferKind {
    Direct { host: HostWlBuffer },
    Virtual(VirtualBuffer),
}

#[derive(Debug)]
pub struct BufferBinding {
    pub server: WlBuffer,
    pub kind: BufferKind,
}

impl Dispatch<WlShm, ObjectKey> for RelayState {
    fn request(
        state: &mut Self,
        _client: &wayland_server::Client,
        _shm: &WlShm,
        request: wl_shm::Request,
        key: &ObjectKey,
        _dhandle: &DisplayHandle,
        data_init: &mut DataInit<'_, Self>,
    ) {
        match request {
            wl_shm::Request::CreatePool { id, fd, size } => {
                let host_shm = match state.objects.get(*key) {
                    Ok(Object::Shm(Pair { host, .. })) => host.clone(),
                    other => {
                        let err = anyhow!("wl_shm binding missing: {other:?}");
                        data_init.init(id, ObjectKey::INVALID);
                        log_and_return!(Err(err))
                    },
                };

                match state.gpu.clone() {
                    Some(gpu) => {
                        let pool = Rc::new(RefCell::new(ShmPool::new(host_shm, gpu, fd, size)));
                        state.objects.insert_with_key(|key| {
                            data_init.init(id, key);
                            Object::Pool(PoolBinding::Virtual(pool))
                        });
                    },
                    None => {
                        let qh = state.qh.clone();
                        state.objects.insert_with_key(|key| {
                            data_init.init(id, key);
                            let host_pool = host_shm.create_pool(fd.as_fd(), size, &qh, ());
                            Object::Pool(PoolBinding::Direct(host_pool))
                        });
                        // fd dropped here: the host holds its own duplicate.
                    },
                }
            },
            _ => unreachable!(),
        }
    }
}

impl Dispatch<WlShmPool, ObjectKey> for RelayState {
    fn request(
        state: &mut Self,
        _client: &wayland_server::Client,
        _pool: &WlShmPool,
        request: wl_shm_pool::Request,
        key: &ObjectKey,
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
                format,
            } => {
                let qh = state.qh.clone();
                let binding = match state.objects.get(*key) {
                    Ok(Object::Pool(PoolBinding::Virtual(pool))) => {
                        PoolBinding::Virtual(pool.clone())
                    },
                    Ok(Object::Pool(PoolBinding::Direct(host_pool))) => {
                        PoolBinding::Direct(host_pool.clone())
                    },
                    other => {
                        let err = anyhow!("wl_shm_pool binding missing: {other:?}");
                        data_init.init(id, ObjectKey::INVALID);
                        log_and_return!(Err(err))
                    },
                };

                match binding {
                    PoolBinding::Virtual(pool) => {
                        pool.borrow_mut().retain();
                        state.objects.insert_with_key(|key| {
                            let server = data_init.init(id, key);
                            Object::Buffer(BufferBinding {
                                server,
                                kind: BufferKind::Virtual(VirtualBuffer {
                                    pool,
                                    offset,
                                    width,
                                    height,
                                    stride,
                                    format_raw: u32::from(format),
                                    realized: None,
                                }),
                            })
                        });
                    },
                    PoolBinding::Direct(host_pool) => {
                        let format = match convert_wenum(format) {
                            Ok(format) => format,
                            Err(err) => {
                                data_init.init(id, ObjectKey::INVALID);
                                log_and_return!(Err(err))
                            },
                        };
                        state.objects.insert_with_key(|key| {
                            let server = data_init.init(id, key);
                            let host = host_pool
                                .create_buffer(offset, width, height, stride, format, &qh, key);
                            Object::Buffer(BufferBinding {
                                server,
                                kind: BufferKind::Direct { host },
                            })
                        });
                    },
                }
            },
            wl_shm_pool::Request::Resize { size } => match state.objects.get(*key) {
                Ok(Object::Pool(PoolBinding::Virtual(pool))) => pool.borrow_mut().resize(size),
                Ok(Object::Pool(PoolBinding::Direct(host_pool))) => host_pool.resize(size),
                other => log_and_return!(Err(anyhow!("wl_shm_pool binding missing: {other:?}"))),
            },
            wl_shm_pool::Request::Destroy => {
                let direct_pool = match state.objects.get(*key) {
                    Ok(Object::Pool(PoolBinding::Direct(host_pool))) => Some(host_pool.clone()),
                    Ok(Object::Pool(PoolBinding::Virtual(_))) => None,
                    other => {
                        log_and_return!(Err(anyhow!("wl_shm_pool binding missing: {other:?}")))
                    },
                };
                match direct_pool {
                    Some(host_pool) => {
                        host_pool.destroy();
                        state.deferred.defer(&host_pool, *key);
                    },
                    None => {
                        if let Some(object) = state.objects.remove(*key) {
                            state.release_object(object);
                        }
                    },
                }
            },
            _ => unreachable!(),
        }
    }
}

impl Dispatch<WlBuffer, ObjectKey> for RelayState {
    fn request(
        state: &mut Self,
        _client: &wayland_server::Client,
        _buffer: &WlBuffer,
        request: wl_buffer::Request,
        key: &ObjectKey,
        _dhandle: &DisplayHandle,
        _data_init: &mut DataInit<'_, Self>,
    ) {
        match request {
            wl_buffer::Request::Destroy => {
                let destroy_now = match state.objects.get(*key) {
                    Ok(Object::Buffer(BufferBinding { kind, .. })) => match kind {
                        BufferKind::Direct { host } => {
                            host.destroy();
                            state.deferred.defer(host, *key);
                            false
                        },
                        BufferKind::Virtual(vbuf) => match vbuf.realized() {
                            Some(realized) => {
                                realized.host.destroy();
                                state.deferred.defer(&realized.host, *key);
                                false
                            },
                            // Never attached: there is no host twin to wait
                            // for.
                            None => true,
                        },
                    },
                    other => log_and_return!(Err(anyhow!("wl_buffer binding missing: {other:?}"))),
                };
                if destroy_now {
                    if let Some(object) = state.objects.remove(*key) {
                        state.release_object(object);
                    }
                }
            },
            _ => unreachable!(),
        }
    }
}

impl wayland_client::Dispatch<HostWlShm, ObjectKey> for RelayState {
    fn event(
        state: &mut Self,
        shm: &HostWlShm,
        event: host_wl_shm::Event,
        _key: &ObjectKey,
        _conn: &wayland_client::Connection,
        _qh: &wayland_client::QueueHandle<Self>,
    ) {
        match event {
            host_wl_shm::Event::Format { format } => {
                let server = warn_and_return!(state.objects.to_client(shm));
                server.format(warn_and_return!(convert_wenum(format)));
            },
            _ => unreachable!(),
        }
    }
}

impl wayland_client::Dispatch<HostWlShmPool, ()> for RelayState {
    fn event(
        _state: &mut Self,
        _pool: &HostWlShmPool,
        _event: <HostWlShmPool as Proxy>::Event,
        _data: &(),
        _conn: &wayland_client::Connection,
        _qh: &wayland_client::QueueHandle<Self>,
    ) {
        unreachable!();
    }
}

impl wayland_client::Dispatch<HostWlBuffer, ObjectKey> for RelayState {
    fn event(
        state: &mut Self,
        _buffer: &HostWlBuffer,
        event: wayland_client::protocol::wl_buffer::Event,
        key: &ObjectKey,
        _conn: &wayland_client::Connection,
        _qh: &wayland_client::QueueHandle<Self>,
    ) {
        match event {
            wayland_client::protocol::wl_buffer::Event::Release => {
                match state.objects.get(*key) {
                    Ok(Object::Buffer(BufferBinding { server, .. })) => server.release(),
                    // Raced with destruction; nothing to forward.
                    _ => debug!("release for an already-destroyed buffer"),
                }
            },
            _ => unreachable!(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn range_is_height_times_stride() {
        let range = buffer_range(64, 16, 16, 64, 4096).unwrap();
        assert_eq!(range.offset, 64);
        assert_eq!(range.len, 16 * 64);
    }

    #[test]
    fn range_must_fit_the_pool() {
        assert!(buffer_range(0, 16, 16, 64, 1024).is_ok());
        assert!(buffer_range(1, 16, 16, 64, 1024).is_err());
        assert!(buffer_range(0, 16, 17, 64, 1024).is_err());
    }

    #[test]
    fn range_rejects_degenerate_geometry() {
        assert!(buffer_range(-1, 16, 16, 64, 4096).is_err());
        assert!(buffer_range(0, 0, 16, 64, 4096).is_err());
        assert!(buffer_range(0, 16, -1, 64, 4096).is_err());
        assert!(buffer_range(0, 16, 16, 0, 4096).is_err());
    }

    #[test]
    fn range_survives_large_geometry_without_overflow() {
        assert!(buffer_range(0, i32::MAX, i32::MAX, i32::MAX, i32::MAX).is_err());
    }
}
