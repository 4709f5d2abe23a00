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

//! One relay session: a single guest client, a single host connection, and
//! the calloop loop that drives both cooperatively on one thread.

use std::os::unix::net::UnixStream;
use std::sync::Arc;

use calloop::EventLoop;
use calloop::LoopSignal;
use calloop::PostAction;
use calloop::channel;
use calloop::generic::Generic;
use calloop::Interest;
use calloop::Mode;
use calloop_wayland_source::WaylandSource;
use wayland_client::Connection;
use wayland_client::QueueHandle;
use wayland_client::globals::GlobalList;
use wayland_client::globals::registry_queue_init;
use wayland_server::Display;
use wayland_server::DisplayHandle;
use wayland_server::backend::ClientData;
use wayland_server::backend::ClientId;
use wayland_server::backend::DisconnectReason;

use crate::clipboard::MimeNamespace;
use crate::config::Config;
use crate::objects::DeferredAckQueue;
use crate::objects::Object;
use crate::objects::ObjectKey;
use crate::objects::ObjectMap;
use crate::prelude::*;
use crate::shell::PongAction;
use crate::shm::BufferBinding;
use crate::shm::BufferKind;
use crate::shm::PoolBinding;
use crate::surface::configure_surface;
use crate::virtgpu::GpuAllocator;
use crate::xwayland::HookEvent;
use crate::xwayland::PingSender;
use crate::xwayland::ScaleFactor;
use crate::xwayland::XwaylandHooks;

/// Shared state of every dispatch handler in the relay: the object table,
/// the rewrite knobs, and the handles needed to create twins on either side.
pub struct RelayState {
    pub dh: DisplayHandle,
    pub qh: QueueHandle<RelayState>,
    pub conn: Connection,
    pub globals: GlobalList,
    pub objects: ObjectMap,
    pub deferred: DeferredAckQueue,
    pub mime: MimeNamespace,
    pub tag: String,
    pub scale: ScaleFactor,
    pub hooks: Option<Arc<dyn XwaylandHooks>>,
    pub hook_tx: channel::Sender<HookEvent>,
    pub gpu: Option<Arc<dyn GpuAllocator>>,
    /// Serial of the most recent serial-carrying input event.
    pub last_serial: u32,
    pub wm_base: Option<ObjectKey>,
    ping_serial: u32,
    failure: Option<SessionError>,
    signal: LoopSignal,
}

impl RelayState {
    /// Records a session-fatal failure and stops the loop; both transports
    /// close on the way out of [`Session::run`].
    pub fn fail(&mut self, error: SessionError) {
        error!("session failed: {error}");
        if self.failure.is_none() {
            self.failure = Some(error);
        }
        self.signal.stop();
    }

    pub(crate) fn next_ping_serial(&mut self) -> u32 {
        self.ping_serial = self.ping_serial.wrapping_add(1);
        self.ping_serial
    }

    /// Drops per-object resources tied to a removed binding. Pool refcounts
    /// live here: the pool entry and each buffer entry own one count.
    pub(crate) fn release_object(&mut self, object: Object) {
        match object {
            Object::Pool(PoolBinding::Virtual(pool)) => pool.borrow_mut().release(),
            Object::Buffer(BufferBinding {
                kind: BufferKind::Virtual(vbuf),
                ..
            }) => vbuf.pool.borrow_mut().release(),
            _ => {},
        }
    }

    /// Runs after each dispatch batch: bindings whose host twin the backend
    /// confirmed dead are removed, which is the deferred-ack completion.
    pub fn after_dispatch(&mut self) {
        let backend = self.conn.backend();
        for key in self.deferred.reap(&backend) {
            if let Some(object) = self.objects.remove(key) {
                self.release_object(object);
            }
        }
    }

    fn handle_hook_event(&mut self, event: HookEvent) {
        match event {
            HookEvent::Configure { key, visibility } => configure_surface(self, key, visibility),
            HookEvent::Ping(done) => {
                let serial = self.next_ping_serial();
                match self.wm_base.and_then(|key| self.objects.get_mut(key).ok()) {
                    Some(Object::WmBase(binding)) => {
                        binding.pongs.push(PongAction::Notify(done));
                        binding.server.ping(serial);
                    },
                    // Dropping the sender completes the token unanswered.
                    _ => debug!("hook ping requested with no xdg_wm_base bound"),
                }
            },
        }
    }
}

struct GuestClient {
    signal: LoopSignal,
}

impl ClientData for GuestClient {
    fn initialized(&self, _client_id: ClientId) {}

    fn disconnected(&self, _client_id: ClientId, reason: DisconnectReason) {
        info!("guest client closed the session: {reason:?}");
        self.signal.stop();
    }
}

pub struct Session;

impl Session {
    /// Relays one guest client against `host` until either side closes.
    ///
    /// `gpu` enables shm virtualization; without it pools pass through to
    /// the host verbatim. `hooks` enables Xwayland surface gating and scale
    /// compensation.
    pub fn run(
        guest: UnixStream,
        host: Connection,
        config: &Config,
        hooks: Option<Arc<dyn XwaylandHooks>>,
        gpu: Option<Arc<dyn GpuAllocator>>,
    ) -> Result<()> {
        let (globals, host_queue) =
            registry_queue_init::<RelayState>(&host).location(loc!())?;
        let qh = host_queue.handle();

        let mut display = Display::<RelayState>::new().location(loc!())?;
        let dh = display.handle();

        let mut event_loop = EventLoop::<RelayState>::try_new().location(loc!())?;
        let signal = event_loop.get_signal();
        let (hook_tx, hook_rx) = channel::channel();

        let scale = match &hooks {
            Some(hooks) => ScaleFactor::new(hooks.scale()).location(loc!())?,
            None => ScaleFactor::default(),
        };

        let mut state = RelayState {
            dh: dh.clone(),
            qh,
            conn: host.clone(),
            globals,
            objects: ObjectMap::default(),
            deferred: DeferredAckQueue::default(),
            mime: MimeNamespace::new(config.resolved_clipname()),
            tag: config.tag.clone(),
            scale,
            hooks: hooks.clone(),
            hook_tx: hook_tx.clone(),
            gpu,
            last_serial: 0,
            wm_base: None,
            ping_serial: 0,
            failure: None,
            signal: signal.clone(),
        };

        if let Some(hooks) = &hooks {
            hooks.set_ping(PingSender::new(hook_tx));
        }

        crate::registry::advertise_supported_globals(&state, &dh);

        dh.insert_client(
            guest,
            Arc::new(GuestClient {
                signal: signal.clone(),
            }),
        )
        .location(loc!())?;

        WaylandSource::new(host, host_queue)
            .insert(event_loop.handle())
            .map_err(|e| anyhow!("insert_source(host wayland) failed: {e}"))?;

        let display_fd = display
            .backend()
            .poll_fd()
            .try_clone_to_owned()
            .location(loc!())?;
        let guest_signal = signal.clone();
        event_loop
            .handle()
            .insert_source(
                Generic::new(display_fd, Interest::READ, Mode::Level),
                move |_, _, state| {
                    if let Err(e) = display.dispatch_clients(state) {
                        // Killed clients surface here too; ClientData has
                        // already logged the reason.
                        debug!("guest dispatch ended: {e}");
                        guest_signal.stop();
                    }
                    Ok(PostAction::Continue)
                },
            )
            .map_err(|e| anyhow!("insert_source(guest display) failed: {e}"))?;

        event_loop
            .handle()
            .insert_source(hook_rx, |event, _, state| match event {
                channel::Event::Msg(event) => state.handle_hook_event(event),
                channel::Event::Closed => {},
            })
            .map_err(|e| anyhow!("insert_source(hook channel) failed: {e:?}"))?;

        let run_result = event_loop.run(None, &mut state, |state| {
            state.after_dispatch();
            if let Err(e) = state.dh.flush_clients() {
                debug!("guest flush failed: {e}");
                state.signal.stop();
            }
        });

        // Transports close when the connection and display drop with us.
        if let Err(e) = run_result {
            let err = SessionError::HostFailure(e.to_string());
            error!("session failed: {err}");
            return Err(err).location(loc!());
        }
        match state.failure.take() {
            Some(err) => Err(err).location(loc!()),
            None => {
                info!("session ended");
                Ok(())
            },
        }
    }
}
