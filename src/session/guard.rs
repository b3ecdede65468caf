//! Anti-tampering supervision of a session's rendering surface.
//!
//! A [`TamperMonitor`] is the explicit channel through which violation reports
//! (dev-tools probing, canvas extraction) reach whichever guards are alive.
//! Each [`SessionGuard`] registers an observer when it is built and the
//! registration is removed when the guard is dropped. While enabled, a guard
//! answers a violation by scrubbing the raster buffers of its surface. This is
//! a deterrent, not a cryptographic guarantee.

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, Weak};

use base64::{Engine as _, engine::general_purpose::URL_SAFE_NO_PAD};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::{domain::models::ContentId, error::AccessResult};

use super::surface::ProtectedSurface;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TamperSignal {
    DevTools,
    CanvasExtraction,
    ScreenCapture,
}

/// Visible label plus an invisible fingerprint tying a captured frame to a session.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Watermark {
    pub label: String,
    pub fingerprint: String,
}

impl Watermark {
    pub fn for_session(user_label: &str, content_id: &ContentId, session_id: Uuid) -> Self {
        let user = if user_label.trim().is_empty() {
            "licensed copy"
        } else {
            user_label.trim()
        };
        Watermark {
            label: user.to_string(),
            fingerprint: URL_SAFE_NO_PAD.encode(format!("{}:{}:{}", user, content_id, session_id)),
        }
    }
}

type Observer = Arc<dyn Fn(&TamperSignal) + Send + Sync>;

#[derive(Default)]
struct Registry {
    next_id: u64,
    observers: BTreeMap<u64, Observer>,
}

/// Fan-out point for tamper reports.
#[derive(Clone, Default)]
pub struct TamperMonitor {
    registry: Arc<Mutex<Registry>>,
}

impl TamperMonitor {
    fn lock(registry: &Mutex<Registry>) -> MutexGuard<'_, Registry> {
        registry.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn register(
        &self,
        observer: impl Fn(&TamperSignal) + Send + Sync + 'static,
    ) -> TamperRegistration {
        let mut registry = Self::lock(&self.registry);
        let id = registry.next_id;
        registry.next_id += 1;
        registry.observers.insert(id, Arc::new(observer));
        TamperRegistration {
            id,
            registry: Arc::downgrade(&self.registry),
        }
    }

    /// Deliver a violation to every registered observer. Returns how many were notified.
    pub fn report(&self, signal: TamperSignal) -> usize {
        let observers: Vec<Observer> = Self::lock(&self.registry)
            .observers
            .values()
            .cloned()
            .collect();
        tracing::warn!(?signal, observers = observers.len(), "tamper violation reported");
        for observer in &observers {
            observer(&signal);
        }
        observers.len()
    }

    #[cfg(test)]
    pub fn observer_count(&self) -> usize {
        Self::lock(&self.registry).observers.len()
    }
}

/// Unregisters its observer on drop.
pub struct TamperRegistration {
    id: u64,
    registry: Weak<Mutex<Registry>>,
}

impl Drop for TamperRegistration {
    fn drop(&mut self) {
        if let Some(registry) = self.registry.upgrade() {
            TamperMonitor::lock(&registry).observers.remove(&self.id);
        }
    }
}

#[derive(Default)]
struct GuardState {
    enabled: AtomicBool,
    tampered: AtomicBool,
    surface: Mutex<Option<Arc<dyn ProtectedSurface>>>,
}

impl GuardState {
    fn surface(&self) -> Option<Arc<dyn ProtectedSurface>> {
        self.surface
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    fn on_violation(&self, signal: &TamperSignal) {
        if !self.enabled.load(Ordering::SeqCst) {
            return;
        }
        self.tampered.store(true, Ordering::SeqCst);
        if let Some(surface) = self.surface() {
            let scrubbed = surface.scrub();
            tracing::warn!(?signal, scrubbed, "scrubbed rendered buffers after tamper signal");
        }
    }
}

pub struct SessionGuard {
    state: Arc<GuardState>,
    watermark: Watermark,
    _registration: TamperRegistration,
}

impl SessionGuard {
    pub fn new(monitor: &TamperMonitor, watermark: Watermark) -> Self {
        let state = Arc::new(GuardState::default());
        let observed = state.clone();
        let registration = monitor.register(move |signal| observed.on_violation(signal));
        Self {
            state,
            watermark,
            _registration: registration,
        }
    }

    /// Start observing `surface`: reset the tamper flag and watermark it. If the
    /// surface cannot be watermarked the guard stays off and the caller decides
    /// whether to go on unprotected.
    pub fn enable(&self, surface: Arc<dyn ProtectedSurface>) -> AccessResult<()> {
        self.state.tampered.store(false, Ordering::SeqCst);
        surface.apply_watermark(&self.watermark)?;
        *self
            .state
            .surface
            .lock()
            .unwrap_or_else(PoisonError::into_inner) = Some(surface);
        self.state.enabled.store(true, Ordering::SeqCst);
        tracing::debug!("session guard enabled");
        Ok(())
    }

    /// Stop observing. Returns false when the guard was not enabled, in which case nothing happens.
    pub fn disable(&self) -> bool {
        if !self.state.enabled.swap(false, Ordering::SeqCst) {
            return false;
        }
        let surface = self
            .state
            .surface
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        if let Some(surface) = surface {
            surface.remove_watermark();
        }
        tracing::debug!("session guard disabled");
        true
    }

    #[cfg(test)]
    pub fn is_enabled(&self) -> bool {
        self.state.enabled.load(Ordering::SeqCst)
    }

    pub fn is_tampered(&self) -> bool {
        self.state.tampered.load(Ordering::SeqCst)
    }
}

impl Drop for SessionGuard {
    fn drop(&mut self) {
        self.disable();
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::AtomicUsize;

    use super::*;
    use crate::session::surface::{RasterBuffer, RenderSurface};

    fn guard(monitor: &TamperMonitor) -> SessionGuard {
        let id = ContentId::parse("b1").unwrap();
        SessionGuard::new(monitor, Watermark::for_session("reader@example.com", &id, Uuid::nil()))
    }

    #[test]
    fn violation_scrubs_only_while_enabled() {
        let monitor = TamperMonitor::default();
        let surface = RenderSurface::attached();
        surface.store(1, RasterBuffer::new(vec![255; 8]));
        let guard = guard(&monitor);

        monitor.report(TamperSignal::DevTools);
        assert!(!guard.is_tampered());
        assert!(!surface.buffer(1).unwrap().is_scrubbed());

        guard.enable(Arc::new(surface.clone())).unwrap();
        assert_eq!(surface.watermark().unwrap().label, "reader@example.com");

        assert_eq!(monitor.report(TamperSignal::CanvasExtraction), 1);
        assert!(guard.is_tampered());
        assert!(surface.buffer(1).unwrap().is_scrubbed());

        assert!(guard.disable());
        assert!(surface.watermark().is_none());
        assert!(!guard.disable(), "second disable is a no-op");
    }

    #[test]
    fn enable_resets_tamper_flag() {
        let monitor = TamperMonitor::default();
        let surface = Arc::new(RenderSurface::attached());
        let guard = guard(&monitor);
        guard.enable(surface.clone()).unwrap();
        monitor.report(TamperSignal::ScreenCapture);
        assert!(guard.is_tampered());
        guard.disable();

        guard.enable(surface).unwrap();
        assert!(!guard.is_tampered());
    }

    #[derive(Default)]
    struct CountingSurface {
        applied: AtomicUsize,
        removed: AtomicUsize,
    }

    impl ProtectedSurface for CountingSurface {
        fn apply_watermark(&self, _mark: &Watermark) -> AccessResult<()> {
            self.applied.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }

        fn remove_watermark(&self) {
            self.removed.fetch_add(1, Ordering::SeqCst);
        }

        fn scrub(&self) -> usize {
            0
        }
    }

    #[test]
    fn disable_reaches_the_surface_once() {
        let monitor = TamperMonitor::default();
        let surface = Arc::new(CountingSurface::default());
        let guard = guard(&monitor);
        guard.enable(surface.clone()).unwrap();

        assert!(guard.disable());
        assert!(!guard.disable());
        drop(guard);
        assert_eq!(surface.applied.load(Ordering::SeqCst), 1);
        assert_eq!(surface.removed.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn missing_surface_leaves_guard_off() {
        let monitor = TamperMonitor::default();
        let guard = guard(&monitor);
        assert!(guard.enable(Arc::new(RenderSurface::detached())).is_err());
        assert!(!guard.is_enabled());
        assert!(!guard.disable());
    }

    #[test]
    fn observer_unregisters_on_drop() {
        let monitor = TamperMonitor::default();
        let guard = guard(&monitor);
        assert_eq!(monitor.observer_count(), 1);
        drop(guard);
        assert_eq!(monitor.observer_count(), 0);
        assert_eq!(monitor.report(TamperSignal::DevTools), 0);
    }

    #[test]
    fn fingerprint_is_stable() {
        let id = ContentId::parse("b1").unwrap();
        let a = Watermark::for_session("u", &id, Uuid::nil());
        let b = Watermark::for_session("u", &id, Uuid::nil());
        assert_eq!(a, b);
        assert_eq!(Watermark::for_session(" ", &id, Uuid::nil()).label, "licensed copy");
    }
}
