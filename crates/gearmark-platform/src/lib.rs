// SPDX-License-Identifier: CEPL-1.0
//! Window-system interface for the benchmark: one window, polled from the
//! render loop instead of driving it.

use std::time::Duration;

use thiserror::Error;
use tracing::{debug, info};
use winit::{
    application::ApplicationHandler,
    dpi::PhysicalSize,
    event::{ElementState, KeyEvent, WindowEvent},
    event_loop::{ActiveEventLoop, EventLoop},
    keyboard::{KeyCode, PhysicalKey},
    platform::pump_events::{EventLoopExtPumpEvents, PumpStatus},
    window::{Fullscreen, Window, WindowId},
};

pub use winit;

/// Upper bound on pump iterations while waiting for the first window.
const WINDOW_CREATE_ATTEMPTS: u32 = 200;

#[derive(Debug, Error)]
pub enum WsiError {
    #[error("failed to open display: {0}")]
    Display(#[from] winit::error::EventLoopError),
    #[error("failed to create window: {0}")]
    Window(#[from] winit::error::OsError),
    #[error("window was not created by the event loop")]
    NoWindow,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum WsiKey {
    Escape,
    Up,
    Down,
    Left,
    Right,
    A,
}

impl WsiKey {
    fn from_physical(key: PhysicalKey) -> Option<Self> {
        match key {
            PhysicalKey::Code(KeyCode::Escape) => Some(Self::Escape),
            PhysicalKey::Code(KeyCode::ArrowUp) => Some(Self::Up),
            PhysicalKey::Code(KeyCode::ArrowDown) => Some(Self::Down),
            PhysicalKey::Code(KeyCode::ArrowLeft) => Some(Self::Left),
            PhysicalKey::Code(KeyCode::ArrowRight) => Some(Self::Right),
            PhysicalKey::Code(KeyCode::KeyA) => Some(Self::A),
            _ => None,
        }
    }
}

/// Receiver for window events, handed to [`Wsi::update_window`].
pub trait WsiCallbacks {
    fn on_resize(&mut self, width: u32, height: u32);
    fn on_exit(&mut self);
    fn on_key(&mut self, _key: WsiKey) {}
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum WsiEvent {
    Resize(u32, u32),
    Exit,
    Key(WsiKey),
}

fn dispatch(ev: WsiEvent, callbacks: &mut dyn WsiCallbacks) {
    match ev {
        WsiEvent::Resize(w, h) => callbacks.on_resize(w, h),
        WsiEvent::Exit => callbacks.on_exit(),
        WsiEvent::Key(key) => callbacks.on_key(key),
    }
}

#[derive(Debug)]
struct WindowRequest {
    title: String,
    width: u32,
    height: u32,
    fullscreen: bool,
}

#[derive(Default)]
struct WsiState {
    request: Option<WindowRequest>,
    window: Option<Window>,
    create_error: Option<winit::error::OsError>,
    events: Vec<WsiEvent>,
}

impl ApplicationHandler for WsiState {
    fn resumed(&mut self, event_loop: &ActiveEventLoop) {
        if self.window.is_some() {
            return;
        }
        let Some(req) = &self.request else {
            return;
        };
        let mut attrs = Window::default_attributes()
            .with_title(req.title.clone())
            .with_inner_size(PhysicalSize::new(req.width, req.height));
        if req.fullscreen {
            attrs = attrs.with_fullscreen(Some(Fullscreen::Borderless(None)));
        }
        match event_loop.create_window(attrs) {
            Ok(window) => {
                let size = window.inner_size();
                info!("window ready ({}x{})", size.width, size.height);
                self.window = Some(window);
            }
            Err(e) => self.create_error = Some(e),
        }
    }

    fn window_event(&mut self, _event_loop: &ActiveEventLoop, window_id: WindowId, event: WindowEvent) {
        if let Some(window) = &self.window {
            if window_id != window.id() {
                return;
            }
        }

        match event {
            WindowEvent::CloseRequested | WindowEvent::Destroyed => {
                info!("CloseRequested");
                self.events.push(WsiEvent::Exit);
            }
            WindowEvent::Resized(size) => {
                debug!("Resized → {}x{}", size.width, size.height);
                self.events.push(WsiEvent::Resize(size.width, size.height));
            }
            WindowEvent::KeyboardInput {
                event:
                    KeyEvent {
                        physical_key,
                        state: ElementState::Pressed,
                        ..
                    },
                ..
            } => {
                if let Some(key) = WsiKey::from_physical(physical_key) {
                    self.events.push(WsiEvent::Key(key));
                }
            }
            _ => {}
        }
    }
}

/// The display connection plus at most one window.
pub struct Wsi {
    event_loop: EventLoop<()>,
    state: WsiState,
}

impl Wsi {
    pub fn init_display() -> Result<Self, WsiError> {
        let event_loop = EventLoop::new()?;
        Ok(Self {
            event_loop,
            state: WsiState::default(),
        })
    }

    /// Opens the window and pumps the event loop until it exists.
    pub fn init_window(
        &mut self,
        title: &str,
        width: u32,
        height: u32,
        fullscreen: bool,
    ) -> Result<(), WsiError> {
        self.state.request = Some(WindowRequest {
            title: title.to_owned(),
            width,
            height,
            fullscreen,
        });
        for _ in 0..WINDOW_CREATE_ATTEMPTS {
            let _ = self
                .event_loop
                .pump_app_events(Some(Duration::from_millis(5)), &mut self.state);
            if let Some(e) = self.state.create_error.take() {
                return Err(e.into());
            }
            if self.state.window.is_some() {
                return Ok(());
            }
        }
        Err(WsiError::NoWindow)
    }

    pub fn window(&self) -> Option<&Window> {
        self.state.window.as_ref()
    }

    pub fn inner_size(&self) -> Option<(u32, u32)> {
        self.window().map(|w| {
            let s = w.inner_size();
            (s.width, s.height)
        })
    }

    /// Drains pending window events into `callbacks`. Returns false once the
    /// event loop itself has shut down.
    pub fn update_window(&mut self, callbacks: &mut dyn WsiCallbacks) -> bool {
        let status = self
            .event_loop
            .pump_app_events(Some(Duration::ZERO), &mut self.state);
        for ev in self.state.events.drain(..) {
            dispatch(ev, callbacks);
        }
        match status {
            PumpStatus::Continue => true,
            PumpStatus::Exit(code) => {
                debug!("event loop exited with {code}");
                callbacks.on_exit();
                false
            }
        }
    }

    pub fn fini_window(&mut self) {
        if self.state.window.take().is_some() {
            debug!("window closed");
        }
        self.state.request = None;
    }

    pub fn fini_display(mut self) {
        self.fini_window();
        let _ = self
            .event_loop
            .pump_app_events(Some(Duration::ZERO), &mut self.state);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Default)]
    struct Recorder {
        resizes: Vec<(u32, u32)>,
        exits: u32,
        keys: Vec<WsiKey>,
    }

    impl WsiCallbacks for Recorder {
        fn on_resize(&mut self, width: u32, height: u32) {
            self.resizes.push((width, height));
        }
        fn on_exit(&mut self) {
            self.exits += 1;
        }
        fn on_key(&mut self, key: WsiKey) {
            self.keys.push(key);
        }
    }

    #[test]
    fn maps_benchmark_keys_only() {
        assert_eq!(
            WsiKey::from_physical(PhysicalKey::Code(KeyCode::Escape)),
            Some(WsiKey::Escape)
        );
        assert_eq!(
            WsiKey::from_physical(PhysicalKey::Code(KeyCode::KeyA)),
            Some(WsiKey::A)
        );
        assert_eq!(WsiKey::from_physical(PhysicalKey::Code(KeyCode::KeyQ)), None);
    }

    #[test]
    fn default_key_callback_is_a_no_op() {
        struct Minimal(u32);
        impl WsiCallbacks for Minimal {
            fn on_resize(&mut self, _: u32, _: u32) {}
            fn on_exit(&mut self) {
                self.0 += 1;
            }
        }
        let mut m = Minimal(0);
        m.on_key(WsiKey::Up);
        m.on_exit();
        assert_eq!(m.0, 1);
    }

    #[test]
    fn dispatch_preserves_event_order() {
        let mut rec = Recorder::default();
        let events = [
            WsiEvent::Resize(640, 480),
            WsiEvent::Key(WsiKey::Left),
            WsiEvent::Resize(800, 600),
            WsiEvent::Exit,
        ];
        for ev in events {
            dispatch(ev, &mut rec);
        }
        assert_eq!(rec.resizes, vec![(640, 480), (800, 600)]);
        assert_eq!(rec.keys, vec![WsiKey::Left]);
        assert_eq!(rec.exits, 1);
    }
}
