//! Shared device context: error policy, viewport and bound-target
//! tracking.

use std::cell::Cell;
use std::rc::Rc;
use std::sync::atomic::{AtomicU64, Ordering};

use crate::device::{Device, FramebufferId, HeadlessDevice, Rect};
use crate::error::RenderError;
use crate::options::ErrorMode;

static NEXT_CONTEXT_ID: AtomicU64 = AtomicU64::new(1);

/// Upper bound on error-flag reads per check; a lost context can report
/// errors forever.
const MAX_ERROR_POLLS: usize = 32;

/// Which framebuffer the last `bind_for_rendering` selected.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum BoundTarget {
    /// The window framebuffer.
    Window,
    /// An offscreen framebuffer.
    Offscreen(FramebufferId),
}

/// Owns the device and the per-context bookkeeping every resource shares.
///
/// Resources hold an `Rc<RenderContext>`; combining two resources compares
/// context ids, so a buffer from one device can never be attached to a
/// program of another.
pub struct RenderContext {
    device: Rc<dyn Device>,
    id: u64,
    checks_enabled: Cell<bool>,
    error_mode: Cell<ErrorMode>,
    viewport: Cell<Rect>,
    bound_target: Cell<Option<BoundTarget>>,
}

impl std::fmt::Debug for RenderContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RenderContext")
            .field("id", &self.id)
            .field("checks_enabled", &self.checks_enabled.get())
            .field("error_mode", &self.error_mode.get())
            .finish_non_exhaustive()
    }
}

impl RenderContext {
    /// Wrap a device. Error checks start enabled and fatal.
    #[must_use]
    pub fn new(device: Rc<dyn Device>) -> Rc<Self> {
        let (w, h) = device.default_framebuffer_size();
        Rc::new(Self {
            device,
            id: NEXT_CONTEXT_ID.fetch_add(1, Ordering::Relaxed),
            checks_enabled: Cell::new(true),
            error_mode: Cell::new(ErrorMode::Fatal),
            viewport: Cell::new(Rect::sized(w, h)),
            bound_target: Cell::new(None),
        })
    }

    /// Context over a fresh [`HeadlessDevice`].
    #[must_use]
    pub fn headless() -> Rc<Self> {
        Self::new(Rc::new(HeadlessDevice::new()))
    }

    /// The device all calls go through.
    #[must_use]
    pub fn device(&self) -> &dyn Device {
        self.device.as_ref()
    }

    /// Unique id of this context within the process.
    #[must_use]
    pub const fn id(&self) -> u64 {
        self.id
    }

    /// Fail with `TypeMismatch` unless `other` is this same context.
    ///
    /// # Errors
    ///
    /// Returns [`RenderError::TypeMismatch`] if the contexts differ.
    pub fn ensure_same(&self, other: &Self, what: &str) -> Result<(), RenderError> {
        if self.id == other.id {
            Ok(())
        } else {
            Err(RenderError::TypeMismatch(format!(
                "{what} belongs to a different device context"
            )))
        }
    }

    /// Turn device error polling on or off.
    pub fn set_checks_enabled(&self, enabled: bool) {
        self.checks_enabled.set(enabled);
    }

    /// Whether device error polling is on.
    #[must_use]
    pub fn checks_enabled(&self) -> bool {
        self.checks_enabled.get()
    }

    /// Whether device errors abort or only log.
    pub fn set_error_mode(&self, mode: ErrorMode) {
        self.error_mode.set(mode);
    }

    /// Current error mode.
    #[must_use]
    pub fn error_mode(&self) -> ErrorMode {
        self.error_mode.get()
    }

    /// Drain the device error flag.
    ///
    /// Every pending code is logged. In [`ErrorMode::Fatal`] the first one
    /// is returned as [`RenderError::Device`].
    ///
    /// # Errors
    ///
    /// Returns [`RenderError::Device`] in fatal mode when the device error
    /// flag is set.
    pub fn check_error(&self) -> Result<(), RenderError> {
        if !self.checks_enabled.get() {
            return Ok(());
        }
        let mut first = None;
        for _ in 0..MAX_ERROR_POLLS {
            let Some(code) = self.device.poll_error() else {
                break;
            };
            log::error!("device error: {code}");
            let _ = first.get_or_insert(code);
        }
        match (first, self.error_mode.get()) {
            (Some(code), ErrorMode::Fatal) => Err(RenderError::Device(code)),
            _ => Ok(()),
        }
    }

    /// Set the viewport and remember it for display read-back.
    pub(crate) fn set_viewport(&self, rect: Rect) {
        self.device.viewport(rect);
        self.viewport.set(rect);
    }

    /// Viewport most recently set through this context.
    #[must_use]
    pub fn viewport(&self) -> Rect {
        self.viewport.get()
    }

    pub(crate) fn set_bound_target(&self, target: BoundTarget) {
        self.bound_target.set(Some(target));
    }

    /// Framebuffer most recently bound for rendering.
    #[must_use]
    pub fn bound_target(&self) -> Option<BoundTarget> {
        self.bound_target.get()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::device::DeviceErrorCode;

    fn context() -> (Rc<HeadlessDevice>, Rc<RenderContext>) {
        let device = Rc::new(HeadlessDevice::new());
        let ctx = RenderContext::new(device.clone());
        (device, ctx)
    }

    #[test]
    fn contexts_have_distinct_ids() {
        let a = RenderContext::headless();
        let b = RenderContext::headless();
        assert!(a.ensure_same(&a, "buffer").is_ok());
        assert!(matches!(
            a.ensure_same(&b, "buffer"),
            Err(RenderError::TypeMismatch(_))
        ));
    }

    #[test]
    fn fatal_mode_reports_device_errors() {
        let (device, ctx) = context();
        device.inject_error(DeviceErrorCode::InvalidOperation);
        assert!(matches!(
            ctx.check_error(),
            Err(RenderError::Device(DeviceErrorCode::InvalidOperation))
        ));
        assert!(ctx.check_error().is_ok());
    }

    #[test]
    fn log_only_and_disabled_modes_swallow_errors() {
        let (device, ctx) = context();
        ctx.set_error_mode(ErrorMode::LogOnly);
        device.inject_error(DeviceErrorCode::OutOfMemory);
        assert!(ctx.check_error().is_ok());

        ctx.set_error_mode(ErrorMode::Fatal);
        ctx.set_checks_enabled(false);
        device.inject_error(DeviceErrorCode::InvalidValue);
        assert!(ctx.check_error().is_ok());
        ctx.set_checks_enabled(true);
        assert!(ctx.check_error().is_err());
    }
}
