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

//! The Xwayland integration surface the relay consumes. Process supervision
//! and window management live outside this crate; hooks implementing
//! [`XwaylandHooks`] are handed surface and input checkpoints and decide when
//! deferred work proceeds. Hook callbacks run off the session thread, so
//! everything that mutates session state travels back through the session
//! channel.

use std::any::Any;
use std::sync::mpsc;
use std::time::Duration;

use calloop::channel::Sender;
use wayland_client::protocol::wl_surface::WlSurface as HostWlSurface;
use wayland_server::protocol::wl_surface::WlSurface;

use crate::objects::ObjectKey;
use crate::prelude::*;

/// How a configured surface should be presented. `Unmanaged` marks cursors
/// and hidden helper windows, which must not be upscaled.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum Visibility {
    Show,
    Hide,
    Unmanaged,
}

/// Extension-owned state attached to a surface binding; opaque to the relay.
pub type ExtensionSlot = Option<Box<dyn Any + Send + Sync>>;

/// Messages from hook callbacks back into the session loop.
#[derive(Debug)]
pub enum HookEvent {
    Configure {
        key: ObjectKey,
        visibility: Visibility,
    },
    Ping(mpsc::Sender<()>),
}

/// Lets a hook mark a surface configured; the deferred request queue drains
/// on the session thread when the message arrives.
#[derive(Clone)]
pub struct ConfigureHandle {
    key: ObjectKey,
    tx: Sender<HookEvent>,
}

impl std::fmt::Debug for ConfigureHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ConfigureHandle").field("key", &self.key).finish()
    }
}

impl ConfigureHandle {
    pub(crate) fn new(key: ObjectKey, tx: Sender<HookEvent>) -> Self {
        Self { key, tx }
    }

    pub fn set_configured(&self, visibility: Visibility) {
        // A send failure means the session already ended; the surface is gone
        // with it.
        let _ = self.tx.send(HookEvent::Configure {
            key: self.key,
            visibility,
        });
    }
}

/// Hook-initiated liveness ping of the guest. [`PingSender::ping`] queues a
/// ping on the session's xdg_wm_base; the returned token completes when the
/// guest pongs.
#[derive(Clone)]
pub struct PingSender {
    tx: Sender<HookEvent>,
}

impl std::fmt::Debug for PingSender {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("PingSender")
    }
}

impl PingSender {
    pub(crate) fn new(tx: Sender<HookEvent>) -> Self {
        Self { tx }
    }

    pub fn ping(&self) -> PingToken {
        let (done_tx, done_rx) = mpsc::channel();
        let _ = self.tx.send(HookEvent::Ping(done_tx));
        PingToken { done: done_rx }
    }
}

#[derive(Debug)]
pub struct PingToken {
    done: mpsc::Receiver<()>,
}

impl PingToken {
    /// True if the guest answered within `timeout`. Also completes
    /// immediately when the session ends or has no wm_base bound, so callers
    /// cannot deadlock on a dead guest.
    pub fn wait(self, timeout: Duration) -> bool {
        self.done.recv_timeout(timeout).is_ok()
    }
}

/// A deferred input event; the hook decides when (or whether) it reaches the
/// guest.
pub struct ForwardEvent(Box<dyn FnOnce() + Send>);

impl ForwardEvent {
    pub(crate) fn new(f: impl FnOnce() + Send + 'static) -> Self {
        Self(Box::new(f))
    }

    pub fn send(self) {
        (self.0)()
    }
}

impl std::fmt::Debug for ForwardEvent {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("ForwardEvent")
    }
}

pub trait XwaylandHooks: Send + Sync + std::fmt::Debug {
    /// Coordinate compensation factor. Guest-side coordinates are host
    /// coordinates multiplied by this.
    fn scale(&self) -> i32;

    /// Called once at session start with the handle for hook-initiated
    /// pings.
    fn set_ping(&self, _ping: PingSender) {}

    /// A guest surface and its host twin were created. The surface stays
    /// unconfigured (its requests queue) until `configure.set_configured`
    /// runs. `slot` is the extension-owned state for this surface.
    fn on_create_surface(
        &self,
        host_surface: &HostWlSurface,
        guest_surface: &WlSurface,
        configure: ConfigureHandle,
        slot: &mut ExtensionSlot,
    );

    fn on_destroy_surface(&self, host_surface: &HostWlSurface);

    /// The host pointer entered a relayed surface. `forward` delivers the
    /// enter event to the guest; the hook chooses the moment.
    fn on_pointer_entry(&self, guest_surface: &WlSurface, forward: ForwardEvent) {
        forward.send();
    }

    fn on_keyboard_entry(&self, guest_surface: &WlSurface, forward: ForwardEvent) {
        forward.send();
    }

    fn on_keyboard_leave(&self, _guest_surface: &WlSurface) {}
}

/// Coordinate rescaling between the guest and host coordinate spaces.
/// Identity unless Xwayland hooks are installed with a scale other than 1.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct ScaleFactor(i32);

impl Default for ScaleFactor {
    fn default() -> Self {
        Self(1)
    }
}

impl ScaleFactor {
    pub fn new(scale: i32) -> Result<Self> {
        if scale < 1 {
            bail!("xwayland scale must be positive, got {scale}");
        }
        Ok(Self(scale))
    }

    pub fn factor(self) -> i32 {
        self.0
    }

    pub fn is_identity(self) -> bool {
        self.0 == 1
    }

    /// Guest coordinate to host coordinate (integer division).
    pub fn to_host(self, v: i32) -> i32 {
        v / self.0
    }

    /// Host coordinate to guest coordinate.
    pub fn to_client(self, v: i32) -> i32 {
        v * self.0
    }

    /// Host fixed-point surface coordinates to guest coordinates.
    pub fn point_to_client(self, x: f64, y: f64) -> (f64, f64) {
        (x * f64::from(self.0), y * f64::from(self.0))
    }
}

#[cfg(test)]
mod tests {
    use proptest::prelude::*;

    use super::*;

    #[test]
    fn identity_scale_is_a_no_op() {
        let s = ScaleFactor::default();
        assert_eq!(s.to_host(17), 17);
        assert_eq!(s.to_client(17), 17);
        assert_eq!(s.point_to_client(3.5, -2.25), (3.5, -2.25));
    }

    #[test]
    fn rejects_non_positive_scales() {
        assert!(ScaleFactor::new(0).is_err());
        assert!(ScaleFactor::new(-2).is_err());
    }

    proptest! {
        #[test]
        fn host_round_trip_is_lossless(scale in 1..=4i32, v in -10_000..10_000i32) {
            let s = ScaleFactor::new(scale).unwrap();
            // Host values scaled up to the guest and back are unchanged;
            // this is the direction outputs and input events travel.
            prop_assert_eq!(s.to_host(s.to_client(v)), v);
        }
    }
}
