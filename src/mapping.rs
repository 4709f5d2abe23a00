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

use std::num::NonZeroUsize;
use std::os::fd::AsFd;
use std::os::fd::AsRawFd;
use std::ptr::NonNull;

use nix::libc;
use nix::sys::mman::MapFlags;
use nix::sys::mman::ProtFlags;
use nix::sys::mman::mmap;
use nix::sys::mman::munmap;
use nix::sys::stat::fstat;

use crate::prelude::*;

/// A shared mapping of an fd received over the wire or allocated for the
/// host. The requested length is validated against the file size before
/// mapping, so slice accesses can never run past the backing object.
pub struct Mmap {
    ptr: NonNull<libc::c_void>,
    len: usize,
}

// Invariant: the mapping is only reachable through &self/&mut self, and
// munmap happens exactly once, in drop.
unsafe impl Send for Mmap {}
unsafe impl Sync for Mmap {}

impl std::fmt::Debug for Mmap {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Mmap").field("len", &self.len).finish()
    }
}

impl Mmap {
    /// Maps `len` bytes of `fd` read-write and shared. Fails if the file is
    /// shorter than `len`.
    pub fn map_shared<F: AsFd>(fd: F, len: usize) -> Result<Self> {
        let stat = fstat(fd.as_fd().as_raw_fd()).location(loc!())?;
        if (stat.st_size as u64) < len as u64 {
            bail!(
                "refusing to map {len} bytes of an fd of size {}",
                stat.st_size
            );
        }
        let length = NonZeroUsize::new(len).ok_or(anyhow!("cannot map an empty region"))?;

        // SAFETY: length is validated against the file size above; the
        // returned pointer is owned by this struct and unmapped in drop.
        let ptr = unsafe {
            mmap(
                None,
                length,
                ProtFlags::PROT_READ | ProtFlags::PROT_WRITE,
                MapFlags::MAP_SHARED,
                fd,
                0,
            )
            .location(loc!())?
        };

        Ok(Self { ptr, len })
    }

    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    pub fn as_slice(&self) -> &[u8] {
        // SAFETY: ptr is a live MAP_SHARED mapping of exactly len bytes.
        unsafe { std::slice::from_raw_parts(self.ptr.as_ptr().cast::<u8>(), self.len) }
    }

    pub fn as_mut_slice(&mut self) -> &mut [u8] {
        // SAFETY: ptr is a live MAP_SHARED mapping of exactly len bytes and
        // we hold &mut self.
        unsafe { std::slice::from_raw_parts_mut(self.ptr.as_ptr().cast::<u8>(), self.len) }
    }

    /// Copies `src[offset..offset + len]` into the same range of this
    /// mapping. Both ranges are bounds-checked.
    pub fn copy_range_from(&mut self, src: &Mmap, offset: usize, len: usize) -> Result<()> {
        let end = offset
            .checked_add(len)
            .ok_or(anyhow!("range overflow: {offset} + {len}"))?;
        if end > self.len || end > src.len {
            bail!(
                "copy range {offset}..{end} exceeds mappings (dst {}, src {})",
                self.len,
                src.len
            );
        }
        self.as_mut_slice()[offset..end].copy_from_slice(&src.as_slice()[offset..end]);
        Ok(())
    }
}

impl Drop for Mmap {
    fn drop(&mut self) {
        // SAFETY: len is the exact mapped length; ptr has not been unmapped.
        unsafe {
            let _ = munmap(self.ptr, self.len);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::virtgpu::alloc_shm_fd;

    #[test]
    fn map_rejects_oversized_length() {
        let fd = alloc_shm_fd("wlrelay-test", 4096).unwrap();
        assert!(Mmap::map_shared(&fd, 8192).is_err());
        assert!(Mmap::map_shared(&fd, 4096).is_ok());
    }

    #[test]
    fn copy_range_moves_bytes() {
        let src_fd = alloc_shm_fd("wlrelay-test-src", 4096).unwrap();
        let dst_fd = alloc_shm_fd("wlrelay-test-dst", 4096).unwrap();
        let mut src = Mmap::map_shared(&src_fd, 4096).unwrap();
        let mut dst = Mmap::map_shared(&dst_fd, 4096).unwrap();

        src.as_mut_slice()[64..128].fill(0xaa);
        dst.copy_range_from(&src, 64, 64).unwrap();

        assert!(dst.as_slice()[64..128].iter().all(|&b| b == 0xaa));
        assert!(dst.as_slice()[..64].iter().all(|&b| b == 0));
        assert!(dst.as_slice()[128..].iter().all(|&b| b == 0));
    }

    #[test]
    fn copy_range_rejects_out_of_bounds() {
        let src_fd = alloc_shm_fd("wlrelay-test-src", 4096).unwrap();
        let dst_fd = alloc_shm_fd("wlrelay-test-dst", 2048).unwrap();
        let src = Mmap::map_shared(&src_fd, 4096).unwrap();
        let mut dst = Mmap::map_shared(&dst_fd, 2048).unwrap();

        assert!(dst.copy_range_from(&src, 2048, 64).is_err());
        assert!(dst.copy_range_from(&src, 0, 4096).is_err());
    }
}
