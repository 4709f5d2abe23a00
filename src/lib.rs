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

//! A Wayland display-protocol relay. Guest clients connect to wlrelay as if
//! it were the host compositor; requests forward host-ward and events
//! guest-ward with object-id translation, guest shm buffers are mirrored
//! into host-visible allocations, and clipboard mime types are namespaced
//! per guest.

pub mod args;
pub mod clipboard;
pub mod config;
pub mod error;
pub mod mapping;
pub mod objects;
pub mod output;
pub mod prelude;
pub mod registry;
pub mod seat;
pub mod selection;
pub mod session;
pub mod shell;
pub mod shm;
pub mod surface;
pub mod virtgpu;
pub mod xwayland;
