use crate::backend::BackendKind;
use crate::errors::{KitError, KitResult};
use crate::native::{self, ColorSpace, NativeApi, NativeHandle, PixelTarget};
use crate::render::target::RenderTarget;
use crate::render::SurfaceSize;
use log::debug;
use std::cell::Cell;
use std::ptr::NonNull;

thread_local! {
    static LIVE_BUFFERS: Cell<usize> = const { Cell::new(0) };
}

/// Number of software pixel buffers currently allocated on this thread.
pub fn live_pixel_buffers() -> usize {
    LIVE_BUFFERS.with(Cell::get)
}

/// Heap pixel buffer handed to a software canvas.
struct PixelBuffer {
    data: Box<[u32]>,
}

impl PixelBuffer {
    fn allocate(size: SurfaceSize) -> KitResult<Self> {
        let failed = KitError::ResourceCreation { kind: BackendKind::Software, resource: "pixel buffer" };
        let len = size.area().ok_or_else(|| KitError::InvalidDimensions { width: size.width, height: size.height })?;
        let mut data = Vec::new();
        data.try_reserve_exact(len).map_err(|_| failed)?;
        data.resize(len, 0u32);
        LIVE_BUFFERS.with(|n| n.set(n.get() + 1));
        Ok(Self { data: data.into_boxed_slice() })
    }
}

impl Drop for PixelBuffer {
    fn drop(&mut self) {
        LIVE_BUFFERS.with(|n| n.set(n.get().saturating_sub(1)));
    }
}

/// CPU rasterization target of `width * height` 32-bit pixels.
pub struct SoftwareTarget {
    buffer: Option<PixelBuffer>,
}

impl SoftwareTarget {
    pub fn new() -> Self {
        Self { buffer: None }
    }
}

impl Default for SoftwareTarget {
    fn default() -> Self {
        Self::new()
    }
}

impl RenderTarget for SoftwareTarget {
    fn kind(&self) -> BackendKind {
        BackendKind::Software
    }

    fn new_canvas(&self, native: &dyn NativeApi) -> NativeHandle {
        native.sw_canvas_new()
    }

    fn bind(&mut self, native: &dyn NativeApi, canvas: NativeHandle, size: SurfaceSize, cs: ColorSpace) -> KitResult<()> {
        let mut buffer = PixelBuffer::allocate(size)?;
        let ptr = NonNull::new(buffer.data.as_mut_ptr()).ok_or(KitError::ResourceCreation {
            kind: BackendKind::Software,
            resource: "pixel buffer",
        })?;
        let target = PixelTarget {
            ptr,
            len: buffer.data.len(),
            stride: size.width,
            width: size.width,
            height: size.height,
            color_space: cs,
        };
        native::check("sw_canvas_target", canvas, native.sw_canvas_target(canvas, target))?;

        // The canvas now draws into the new buffer, so the old one can go.
        self.buffer = Some(buffer);
        debug!("software target bound: {}x{} at {:p}", size.width, size.height, ptr);
        Ok(())
    }

    fn release(&mut self) {
        if self.buffer.take().is_some() {
            debug!("software target released");
        }
    }

    fn pixels(&self) -> Option<&[u32]> {
        self.buffer.as_ref().map(|b| &b.data[..])
    }

    fn buffer_identity(&self) -> Option<usize> {
        self.buffer.as_ref().map(|b| b.data.as_ptr() as usize)
    }
}
