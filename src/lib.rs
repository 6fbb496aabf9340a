//! Binding and resource-lifecycle layer for a native vector-graphics engine.
//!
//! The crate sits between a host application and a native rendering engine that is
//! reached only through an opaque function table ([`native::NativeApi`]). It provides:
//!
//! - a non-blocking backend initialization state machine ([`backend`]) that brings up
//!   a software, immediate-GPU or negotiated-GPU backend through repeated polling;
//! - render surfaces ([`render::RenderSurface`]) that bind the correct kind of target
//!   for each backend and present frames in a fixed update/draw/sync order;
//! - a lifetime manager ([`lifetime`]) that releases every native handle exactly once,
//!   whether the release is explicit, triggered by drop, or deferred by sharing;
//! - typed wrapper objects ([`paint`]) for shapes, scenes, gradients, text, pictures
//!   and animations.
//!
//! ```
//! use canvaskit::backend::{BackendKind, InitStatus};
//! use canvaskit::native::headless::HeadlessEngine;
//! use canvaskit::paint::{Paint, Shape};
//! use canvaskit::{CanvasKit, Platforms};
//!
//! let kit = CanvasKit::new(None, Box::new(HeadlessEngine::new()), Platforms::none()).unwrap();
//! let mut session = kit.initialize_backend(BackendKind::Software);
//! assert_eq!(session.poll(), InitStatus::Ready);
//!
//! let mut surface = kit.create_surface(&session, "#canvas", 4, 4).unwrap();
//! let rect = Shape::new(&kit).unwrap();
//! rect.append_rect(0.0, 0.0, 4.0, 4.0, 0.0, 0.0).unwrap();
//! rect.set_fill_color(255, 0, 0, 255).unwrap();
//! surface.add(&rect).unwrap();
//! surface.present().unwrap();
//! assert_eq!(surface.last_frame().unwrap().pixels[..4], [255, 0, 0, 255]);
//! ```

pub mod backend;
pub mod config;
pub mod engine;
pub mod errors;
pub mod lifetime;
pub mod native;
pub mod paint;
pub mod render;

pub use config::KitConfig;
pub use engine::*;
pub use errors::{KitError, KitResult};
