//! Fits a freshly loaded model into a fixed extent around the origin.

use nalgebra::Point3;

use crate::model::{Model, Transform};

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Normalization {
    /// The box was centered and scaled to the target extent.
    Fitted { center: Point3<f32>, scale: f32 },
    /// Zero (or non-finite) largest extent. Centered, scale left at 1.
    Degenerate { center: Point3<f32> },
    /// No vertices. The transform was not touched.
    Empty,
}

/// Centers `model`'s bounding box on the origin and scales it uniformly so
/// its largest axial extent equals `target_extent`.
pub fn normalize(model: &mut Model, target_extent: f32) -> Normalization {
    let Some(bounds) = model.local_bounds() else {
        log::warn!("{}: no geometry, skipping normalization", model.name);
        return Normalization::Empty;
    };
    let center = bounds.center();
    let extent = bounds.max_extent();

    let scale = target_extent / extent;
    if !(extent > 0.0 && scale.is_finite()) {
        log::warn!(
            "{}: degenerate bounding box (largest extent {extent}), centering without scaling",
            model.name
        );
        model.transform = Transform {
            translation: -center.coords,
            scale: 1.0,
        };
        return Normalization::Degenerate { center };
    }

    // The translation is scaled too, so the box center lands on the origin
    // after scaling rather than before.
    model.transform = Transform {
        translation: -center.coords * scale,
        scale,
    };
    log::debug!("{}: centered at {center}, scaled by {scale}", model.name);
    Normalization::Fitted { center, scale }
}
