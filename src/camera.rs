use nalgebra::Matrix4;

use crate::config::ViewerConfig;

pub struct PerspectiveCamera {
    pub fov_y_degrees: f32,
    pub aspect: f32,
    pub near: f32,
    pub far: f32,
}

impl PerspectiveCamera {
    pub fn new(config: &ViewerConfig, aspect: f32) -> Self {
        Self {
            fov_y_degrees: config.fov_y_degrees,
            aspect,
            near: config.near,
            far: config.far,
        }
    }

    pub fn fov_y(&self) -> f32 {
        self.fov_y_degrees.to_radians()
    }

    /// Right-handed projection into GL clip space.
    pub fn projection_matrix(&self) -> Matrix4<f32> {
        Matrix4::new_perspective(self.aspect, self.fov_y(), self.near, self.far)
    }
}

/// Window dimensions minus the fixed control band on top.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Viewport {
    pub width: f32,
    pub height: f32,
    pub reserved_band: f32,
}

impl Viewport {
    pub fn new(width: f32, height: f32, reserved_band: f32) -> Self {
        Self {
            width,
            height,
            reserved_band,
        }
    }

    /// Height left for the canvas, never below one pixel.
    pub fn canvas_height(&self) -> f32 {
        (self.height - self.reserved_band).max(1.0)
    }

    pub fn canvas_width(&self) -> f32 {
        self.width.max(1.0)
    }

    pub fn aspect(&self) -> f32 {
        self.canvas_width() / self.canvas_height()
    }
}
