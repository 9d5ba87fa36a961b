//! Orbit-style camera control with inertial damping.
//!
//! The camera sits on a sphere around `target`. Pointer input accumulates
//! into pending deltas; [`OrbitControls::update`] applies them once per frame.
//! With damping on, only `damping_factor` of the pending motion is applied per
//! frame and the rest decays, so the camera glides to a stop.

use std::f32::consts::{PI, TAU};

use nalgebra::{Matrix4, Point3, Vector3};

use crate::config::ViewerConfig;

const MIN_POLAR: f32 = 1e-4;
/// Deltas below this are treated as settled.
const REST_EPSILON: f32 = 1e-6;

#[derive(Debug, Clone, Copy, PartialEq)]
struct Spherical {
    radius: f32,
    /// Polar angle from +Y.
    phi: f32,
    /// Azimuth around +Y, measured from +Z.
    theta: f32,
}

impl Spherical {
    fn from_offset(v: Vector3<f32>) -> Self {
        let radius = v.norm();
        if radius == 0.0 {
            return Self {
                radius,
                phi: 0.0,
                theta: 0.0,
            };
        }
        Self {
            radius,
            phi: (v.y / radius).clamp(-1.0, 1.0).acos(),
            theta: v.x.atan2(v.z),
        }
    }

    fn to_offset(self) -> Vector3<f32> {
        let sin_phi = self.phi.sin();
        Vector3::new(
            self.radius * sin_phi * self.theta.sin(),
            self.radius * self.phi.cos(),
            self.radius * sin_phi * self.theta.cos(),
        )
    }
}

#[derive(Debug, Clone)]
pub struct OrbitControls {
    pub target: Point3<f32>,
    pub enable_damping: bool,
    pub damping_factor: f32,
    pub rotate_speed: f32,
    pub zoom_speed: f32,
    pub pan_speed: f32,
    pub min_distance: f32,
    pub max_distance: f32,

    spherical: Spherical,
    home: (Point3<f32>, Spherical),

    // pending input, consumed by `update`
    delta_theta: f32,
    delta_phi: f32,
    pan_offset: Vector3<f32>,
    zoom_scale: f32,
}

impl OrbitControls {
    pub fn new(config: &ViewerConfig) -> Self {
        let target = Point3::origin();
        let spherical = Spherical::from_offset(Vector3::new(0.0, 0.0, config.camera_distance));
        Self {
            target,
            enable_damping: config.enable_damping,
            damping_factor: config.damping_factor,
            rotate_speed: 1.0,
            zoom_speed: 1.0,
            pan_speed: 1.0,
            min_distance: config.near * 2.0,
            max_distance: config.far * 0.5,
            spherical,
            home: (target, spherical),
            delta_theta: 0.0,
            delta_phi: 0.0,
            pan_offset: Vector3::zeros(),
            zoom_scale: 1.0,
        }
    }

    /// Drag by `(dx, dy)` pixels. Dragging across the full canvas height
    /// turns the camera once around.
    pub fn rotate(&mut self, dx: f32, dy: f32, canvas_height: f32) {
        let h = canvas_height.max(1.0);
        self.delta_theta -= TAU * dx / h * self.rotate_speed;
        self.delta_phi -= TAU * dy / h * self.rotate_speed;
    }

    /// Moves the target in the view plane so that the point under the cursor
    /// follows it.
    pub fn pan(&mut self, dx: f32, dy: f32, canvas_height: f32, fov_y: f32) {
        let h = canvas_height.max(1.0);
        let world_per_px = 2.0 * self.spherical.radius * (fov_y * 0.5).tan() / h;
        let (right, up) = self.screen_axes();
        self.pan_offset += (right * -dx + up * dy) * world_per_px * self.pan_speed;
    }

    /// Positive `scroll` moves the camera closer.
    pub fn dolly(&mut self, scroll: f32) {
        if scroll == 0.0 {
            return;
        }
        let step = 0.95_f32.powf(self.zoom_speed * scroll.abs() / 50.0);
        self.zoom_scale *= if scroll > 0.0 { step } else { 1.0 / step };
    }

    /// Applies pending input. Returns `true` when the camera moved.
    pub fn update(&mut self) -> bool {
        let before = (self.target, self.spherical);

        // With damping, each frame consumes a fraction of the pending input so
        // the total motion still adds up to what the pointer asked for.
        let share = if self.enable_damping { self.damping_factor } else { 1.0 };
        let s = &mut self.spherical;
        s.theta = (s.theta + self.delta_theta * share) % TAU;
        s.phi = (s.phi + self.delta_phi * share).clamp(MIN_POLAR, PI - MIN_POLAR);
        s.radius = (s.radius * self.zoom_scale).clamp(self.min_distance, self.max_distance);
        self.target += self.pan_offset * share;

        if self.enable_damping {
            let keep = 1.0 - self.damping_factor;
            self.delta_theta *= keep;
            self.delta_phi *= keep;
            self.pan_offset *= keep;
        } else {
            self.delta_theta = 0.0;
            self.delta_phi = 0.0;
            self.pan_offset = Vector3::zeros();
        }
        // zoom never coasts
        self.zoom_scale = 1.0;

        if self.delta_theta.abs() < REST_EPSILON {
            self.delta_theta = 0.0;
        }
        if self.delta_phi.abs() < REST_EPSILON {
            self.delta_phi = 0.0;
        }
        if self.pan_offset.norm() < REST_EPSILON {
            self.pan_offset = Vector3::zeros();
        }

        before != (self.target, self.spherical)
    }

    /// Drops pending motion and returns to the initial position.
    pub fn reset(&mut self) {
        (self.target, self.spherical) = self.home;
        self.delta_theta = 0.0;
        self.delta_phi = 0.0;
        self.pan_offset = Vector3::zeros();
        self.zoom_scale = 1.0;
    }

    pub fn is_settled(&self) -> bool {
        self.delta_theta == 0.0 && self.delta_phi == 0.0 && self.pan_offset == Vector3::zeros()
    }

    pub fn distance(&self) -> f32 {
        self.spherical.radius
    }

    pub fn eye(&self) -> Point3<f32> {
        self.target + self.spherical.to_offset()
    }

    pub fn view_matrix(&self) -> Matrix4<f32> {
        Matrix4::look_at_rh(&self.eye(), &self.target, &Vector3::y())
    }

    fn screen_axes(&self) -> (Vector3<f32>, Vector3<f32>) {
        let forward = (self.target - self.eye())
            .try_normalize(f32::EPSILON)
            .unwrap_or_else(|| -Vector3::z());
        let right = forward
            .cross(&Vector3::y())
            .try_normalize(f32::EPSILON)
            .unwrap_or_else(Vector3::x);
        (right, right.cross(&forward))
    }
}
