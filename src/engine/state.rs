//! Fixed-function state methods for Engine

use super::Engine;
use crate::device::{
    BlendFactor, Capability, CompareFunc, Face, StateChange, Winding,
};
use crate::error::RenderError;

/// Depth test and write policy.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DepthMode {
    /// Test less-than, write.
    Less,
    /// Test less-or-equal, write.
    LEqual,
    /// Test less-or-equal, no writes.
    LEqualReadOnly,
    /// Always pass, no writes.
    PassReadOnly,
    /// Test greater-than, write.
    Greater,
    /// No depth test.
    Disable,
}

impl DepthMode {
    fn changes(self) -> Vec<StateChange> {
        let (func, write) = match self {
            Self::Less => (CompareFunc::Less, true),
            Self::LEqual => (CompareFunc::LEqual, true),
            Self::LEqualReadOnly => (CompareFunc::LEqual, false),
            Self::PassReadOnly => (CompareFunc::Always, false),
            Self::Greater => (CompareFunc::Greater, true),
            Self::Disable => {
                return vec![
                    StateChange::Disable(Capability::DepthTest),
                    StateChange::DepthMask(false),
                ]
            }
        };
        vec![
            StateChange::Enable(Capability::DepthTest),
            StateChange::DepthFunc(func),
            StateChange::DepthMask(write),
        ]
    }
}

/// Color blending equation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum BlendMode {
    /// Premultiplied alpha over.
    AlphaOver,
    /// Alpha over, leaving destination alpha untouched.
    OverNoWrite,
    /// Premultiplied alpha under.
    AlphaUnder,
    /// Write zero.
    Zero,
    /// Alpha-weighted color sum with additive alpha.
    WeightedAdd,
    /// Plain additive.
    Add,
    /// Source color scaled by its alpha, replacing the destination.
    Source,
    /// No blending.
    Disable,
}

impl BlendMode {
    fn changes(self) -> Vec<StateChange> {
        use BlendFactor::{
            One, OneMinusDstAlpha, OneMinusSrcAlpha, SrcAlpha, Zero,
        };
        let func = |src, dst| StateChange::BlendFunc { src, dst };
        let blend = match self {
            Self::AlphaOver => func(One, OneMinusSrcAlpha),
            Self::OverNoWrite => StateChange::BlendFuncSeparate {
                src_rgb: SrcAlpha,
                dst_rgb: OneMinusSrcAlpha,
                src_alpha: Zero,
                dst_alpha: One,
            },
            Self::AlphaUnder => func(OneMinusDstAlpha, One),
            Self::Zero => func(Zero, Zero),
            Self::WeightedAdd => StateChange::BlendFuncSeparate {
                src_rgb: SrcAlpha,
                dst_rgb: One,
                src_alpha: One,
                dst_alpha: One,
            },
            Self::Add => func(One, One),
            Self::Source => func(SrcAlpha, Zero),
            Self::Disable => {
                return vec![
                    StateChange::Disable(Capability::Blend),
                    func(SrcAlpha, OneMinusSrcAlpha),
                ]
            }
        };
        vec![StateChange::Enable(Capability::Blend), blend]
    }
}

/// How transparent geometry is composited.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TransparencyMode {
    /// Opaque: alpha-over blending with depth testing.
    None,
    /// Order-independent additive blending without depth testing.
    Simple,
    /// Depth peeling: no blending, depth tested.
    Pretty,
}

impl TransparencyMode {
    /// Blend and depth modes this mode composes.
    #[must_use]
    pub const fn modes(self) -> (BlendMode, DepthMode) {
        match self {
            Self::None => (BlendMode::AlphaOver, DepthMode::Less),
            Self::Simple => (BlendMode::Add, DepthMode::Disable),
            Self::Pretty => (BlendMode::Disable, DepthMode::Less),
        }
    }
}

impl Engine {
    fn apply_all(&self, changes: &[StateChange]) -> Result<(), RenderError> {
        let device = self.ctx.device();
        for change in changes {
            device.apply_state(*change);
        }
        self.ctx.check_error()
    }

    /// Set the depth test and write policy.
    ///
    /// # Errors
    ///
    /// Returns [`RenderError::Device`] if the device raises an error.
    pub fn set_depth_mode(&self, mode: DepthMode) -> Result<(), RenderError> {
        self.apply_all(&mode.changes())
    }

    /// Set the blend equation.
    ///
    /// # Errors
    ///
    /// Returns [`RenderError::Device`] if the device raises an error.
    pub fn set_blend_mode(&self, mode: BlendMode) -> Result<(), RenderError> {
        self.apply_all(&mode.changes())
    }

    /// Enable writes per RGBA channel.
    ///
    /// # Errors
    ///
    /// Returns [`RenderError::Device`] if the device raises an error.
    pub fn set_color_mask(&self, mask: [bool; 4]) -> Result<(), RenderError> {
        self.apply_all(&[StateChange::ColorMask(mask)])
    }

    /// Cull back faces, or stop culling.
    ///
    /// # Errors
    ///
    /// Returns [`RenderError::Device`] if the device raises an error.
    pub fn set_backface_cull(&self, cull: bool) -> Result<(), RenderError> {
        if cull {
            self.apply_all(&[
                StateChange::Enable(Capability::CullFace),
                StateChange::CullFace(Face::Back),
            ])
        } else {
            self.apply_all(&[StateChange::Disable(Capability::CullFace)])
        }
    }

    /// Select the front-face winding. Only issues a change when it differs
    /// from the current winding.
    ///
    /// # Errors
    ///
    /// Returns [`RenderError::Device`] if the device raises an error.
    pub fn set_front_face_ccw(&mut self, ccw: bool) -> Result<(), RenderError> {
        if ccw == self.front_face_ccw {
            return Ok(());
        }
        self.front_face_ccw = ccw;
        let winding = if ccw { Winding::Ccw } else { Winding::Cw };
        self.apply_all(&[StateChange::FrontFace(winding)])
    }

    /// Current front-face winding.
    #[must_use]
    pub fn front_face_ccw(&self) -> bool {
        self.front_face_ccw
    }

    /// Set blend and depth modes for a transparency scheme and remember it.
    ///
    /// # Errors
    ///
    /// Returns [`RenderError::Device`] if the device raises an error. The
    /// stored mode is left unchanged in that case.
    pub fn set_transparency_mode(
        &mut self,
        mode: TransparencyMode,
    ) -> Result<(), RenderError> {
        let (blend, depth) = mode.modes();
        self.set_blend_mode(blend)?;
        self.set_depth_mode(depth)?;
        self.transparency_mode = mode;
        Ok(())
    }

    /// Transparency scheme last applied; [`TransparencyMode::None`] until
    /// one is set.
    #[must_use]
    pub fn transparency_mode(&self) -> TransparencyMode {
        self.transparency_mode
    }
}

#[cfg(test)]
mod tests {
    use std::rc::Rc;

    use super::*;
    use crate::device::{DeviceErrorCode, HeadlessDevice};
    use crate::options::EngineOptions;

    fn engine() -> (Rc<HeadlessDevice>, Engine) {
        let device = Rc::new(HeadlessDevice::new());
        let engine =
            Engine::new(device.clone(), EngineOptions::default()).unwrap();
        device.clear_history();
        (device, engine)
    }

    #[test]
    fn read_only_depth_disables_writes() {
        let (device, engine) = engine();
        engine.set_depth_mode(DepthMode::LEqualReadOnly).unwrap();
        assert_eq!(
            device.state_log(),
            [
                StateChange::Enable(Capability::DepthTest),
                StateChange::DepthFunc(CompareFunc::LEqual),
                StateChange::DepthMask(false),
            ]
        );
        engine.set_depth_mode(DepthMode::Disable).unwrap();
        assert!(!device.is_enabled(Capability::DepthTest));
    }

    #[test]
    fn blend_modes_map_to_factors() {
        let (device, engine) = engine();
        engine.set_blend_mode(BlendMode::AlphaUnder).unwrap();
        assert_eq!(
            device.state_log()[1],
            StateChange::BlendFunc {
                src: BlendFactor::OneMinusDstAlpha,
                dst: BlendFactor::One,
            }
        );
        engine.set_blend_mode(BlendMode::Disable).unwrap();
        assert!(!device.is_enabled(Capability::Blend));
    }

    #[test]
    fn transparency_composes_blend_and_depth() {
        let (device, mut engine) = engine();
        assert_eq!(engine.transparency_mode(), TransparencyMode::None);
        engine.set_transparency_mode(TransparencyMode::Simple).unwrap();
        assert_eq!(engine.transparency_mode(), TransparencyMode::Simple);
        assert!(device.is_enabled(Capability::Blend));
        assert!(!device.is_enabled(Capability::DepthTest));
        assert!(device.state_log().contains(&StateChange::BlendFunc {
            src: BlendFactor::One,
            dst: BlendFactor::One,
        }));
    }

    #[test]
    fn failed_transparency_change_keeps_previous_mode() {
        let (device, mut engine) = engine();
        engine.set_transparency_mode(TransparencyMode::Pretty).unwrap();
        device.inject_error(DeviceErrorCode::OutOfMemory);
        assert!(matches!(
            engine.set_transparency_mode(TransparencyMode::Simple),
            Err(RenderError::Device(DeviceErrorCode::OutOfMemory))
        ));
        assert_eq!(engine.transparency_mode(), TransparencyMode::Pretty);
    }

    #[test]
    fn front_face_changes_only_when_different() {
        let (device, mut engine) = engine();
        engine.set_front_face_ccw(true).unwrap();
        assert!(device.state_log().is_empty());
        engine.set_front_face_ccw(false).unwrap();
        assert_eq!(device.state_log(), [StateChange::FrontFace(Winding::Cw)]);
    }

    #[test]
    fn backface_cull_toggles_capability() {
        let (device, engine) = engine();
        engine.set_backface_cull(true).unwrap();
        assert!(device.is_enabled(Capability::CullFace));
        engine.set_backface_cull(false).unwrap();
        assert!(!device.is_enabled(Capability::CullFace));
        engine.set_color_mask([true, true, true, false]).unwrap();
        assert_eq!(
            device.state_log().last(),
            Some(&StateChange::ColorMask([true, true, true, false]))
        );
    }
}
