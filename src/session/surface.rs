use std::collections::BTreeMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use crate::error::{AccessError, AccessResult};

use super::guard::Watermark;

/// Decoded pixels (or decoded page bytes) currently held by a surface.
#[derive(Debug, Clone, PartialEq)]
pub struct RasterBuffer {
    pub bytes: Vec<u8>,
}

impl RasterBuffer {
    pub fn new(bytes: Vec<u8>) -> Self {
        Self { bytes }
    }

    pub fn is_scrubbed(&self) -> bool {
        self.bytes.iter().all(|b| *b == 0)
    }
}

/// Something a [`super::guard::SessionGuard`] can protect.
pub trait ProtectedSurface: Send + Sync {
    fn apply_watermark(&self, mark: &Watermark) -> AccessResult<()>;
    fn remove_watermark(&self);
    /// Zero every raster buffer currently rendered. Returns how many were scrubbed.
    fn scrub(&self) -> usize;
}

#[derive(Debug, Default)]
struct SurfaceState {
    attached: bool,
    watermark: Option<Watermark>,
    buffers: BTreeMap<u32, RasterBuffer>,
}

/// Headless rendering surface of a session: the watermark overlay plus the
/// decoded buffers, keyed by page number (audiobooks hold none).
#[derive(Debug, Clone, Default)]
pub struct RenderSurface {
    inner: Arc<Mutex<SurfaceState>>,
}

impl RenderSurface {
    pub fn attached() -> Self {
        let surface = Self::default();
        surface.state().attached = true;
        surface
    }

    /// A surface whose host element is gone; watermarking it fails.
    pub fn detached() -> Self {
        Self::default()
    }

    fn state(&self) -> MutexGuard<'_, SurfaceState> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn store(&self, page: u32, buffer: RasterBuffer) {
        self.state().buffers.insert(page, buffer);
    }

    pub fn buffer(&self, page: u32) -> Option<RasterBuffer> {
        self.state().buffers.get(&page).cloned()
    }

    #[cfg(test)]
    pub fn buffer_count(&self) -> usize {
        self.state().buffers.len()
    }

    pub fn watermark(&self) -> Option<Watermark> {
        self.state().watermark.clone()
    }

    /// Drop every decoded buffer and detach.
    pub fn release(&self) {
        let mut state = self.state();
        for buffer in state.buffers.values_mut() {
            buffer.bytes.fill(0);
        }
        state.buffers.clear();
        state.attached = false;
    }
}

impl ProtectedSurface for RenderSurface {
    fn apply_watermark(&self, mark: &Watermark) -> AccessResult<()> {
        let mut state = self.state();
        if !state.attached {
            return Err(AccessError::GuardUnavailable(
                "watermark target is not attached".into(),
            ));
        }
        state.watermark = Some(mark.clone());
        Ok(())
    }

    fn remove_watermark(&self) {
        self.state().watermark = None;
    }

    fn scrub(&self) -> usize {
        let mut state = self.state();
        for buffer in state.buffers.values_mut() {
            buffer.bytes.fill(0);
        }
        state.buffers.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn mark() -> Watermark {
        Watermark {
            label: "reader@example.com".into(),
            fingerprint: "abc".into(),
        }
    }

    #[test]
    fn scrub_zeroes_buffers_in_place() {
        let surface = RenderSurface::attached();
        surface.store(1, RasterBuffer::new(vec![7; 16]));
        surface.store(2, RasterBuffer::new(vec![9; 4]));

        assert_eq!(surface.scrub(), 2);
        assert!(surface.buffer(1).unwrap().is_scrubbed());
        assert_eq!(surface.buffer(1).unwrap().bytes.len(), 16);
    }

    #[test]
    fn detached_surface_refuses_watermark() {
        let surface = RenderSurface::detached();
        let err = surface.apply_watermark(&mark()).unwrap_err();
        assert!(matches!(err, AccessError::GuardUnavailable(_)));

        let surface = RenderSurface::attached();
        surface.apply_watermark(&mark()).unwrap();
        assert_eq!(surface.watermark(), Some(mark()));
        surface.remove_watermark();
        assert!(surface.watermark().is_none());
    }

    #[test]
    fn release_drops_buffers() {
        let surface = RenderSurface::attached();
        surface.store(1, RasterBuffer::new(vec![1, 2, 3]));
        surface.release();
        assert_eq!(surface.buffer_count(), 0);
        assert!(surface.apply_watermark(&mark()).is_err());
    }
}
