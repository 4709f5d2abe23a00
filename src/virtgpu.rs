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

//! The buffer-allocation interface the relay consumes. The virtio-gpu device
//! driver itself lives outside this crate; anything that can hand back an fd
//! the host compositor accepts as a wl_shm fd satisfies `GpuAllocator`.

use std::ffi::CString;
use std::os::fd::OwnedFd;

use nix::sys::memfd::MemFdCreateFlag;
use nix::sys::memfd::memfd_create;
use nix::unistd::ftruncate;

use crate::prelude::*;

/// DRM fourcc for a single-byte-per-pixel image; shm pools are mirrored as a
/// one-row R8 image of width = pool size.
pub const DRM_FORMAT_R8: u32 = u32::from_le_bytes(*b"R8  ");

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct AllocQuery {
    pub width: u32,
    pub height: u32,
    pub drm_format: u32,
}

/// A host-visible buffer. `fd` is acceptable as a Wayland fd on the host
/// connection; `host_size` is the full allocation (may exceed
/// width × height × bpp due to device padding).
#[derive(Debug)]
pub struct GpuImage {
    pub fd: OwnedFd,
    pub host_size: u64,
    pub offset: u32,
    pub stride: u32,
}

pub trait GpuAllocator: std::fmt::Debug {
    fn alloc(&self, query: AllocQuery) -> Result<GpuImage>;
}

/// Allocates `size` zeroed bytes of anonymous shared memory.
pub fn alloc_shm_fd(name: &str, size: u64) -> Result<OwnedFd> {
    let name = CString::new(name).location(loc!())?;
    let fd = memfd_create(name.as_c_str(), MemFdCreateFlag::MFD_CLOEXEC).location(loc!())?;
    ftruncate(&fd, size as i64).location(loc!())?;
    Ok(fd)
}

/// `GpuAllocator` backed by memfds. Used when guest and host can already
/// share memory (tests, same-kernel deployments); deployments behind a real
/// virtio-gpu device plug their driver in through the same trait.
#[derive(Clone, Copy, Debug, Default)]
pub struct MemfdAllocator;

impl GpuAllocator for MemfdAllocator {
    fn alloc(&self, query: AllocQuery) -> Result<GpuImage> {
        let bpp: u64 = match query.drm_format {
            DRM_FORMAT_R8 => 1,
            other => bail!("unsupported drm format {other:#010x}"),
        };
        let stride = u64::from(query.width) * bpp;
        let size = stride * u64::from(query.height);
        let fd = alloc_shm_fd("wlrelay-shm", size).location(loc!())?;
        Ok(GpuImage {
            fd,
            host_size: size,
            offset: 0,
            stride: stride as u32,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn memfd_alloc_matches_query() {
        let image = MemfdAllocator
            .alloc(AllocQuery {
                width: 4096,
                height: 1,
                drm_format: DRM_FORMAT_R8,
            })
            .unwrap();
        assert_eq!(image.host_size, 4096);
        assert_eq!(image.stride, 4096);
        assert_eq!(image.offset, 0);
    }

    #[test]
    fn memfd_alloc_rejects_unknown_formats() {
        assert!(MemfdAllocator
            .alloc(AllocQuery {
                width: 16,
                height: 16,
                drm_format: 0,
            })
            .is_err());
    }
}
