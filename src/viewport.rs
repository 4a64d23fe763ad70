use serde::{Deserialize, Serialize};

use crate::model::Point;

pub const ZOOM_IN_FACTOR: f64 = 1.1;
pub const ZOOM_OUT_FACTOR: f64 = 0.9;

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ViewportConfig {
    pub min_scale: f64,
    pub max_scale: f64,
}

impl Default for ViewportConfig {
    fn default() -> Self {
        Self {
            min_scale: 0.1,
            max_scale: 3.0,
        }
    }
}

/// Pan/zoom transform between screen and world coordinates.
///
/// Zoom scales around the world origin, not the pointer, so content drifts
/// away from the cursor while zooming.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Viewport {
    pub offset: Point,
    pub scale: f64,
    #[serde(skip)]
    pan_anchor: Option<Point>,
    #[serde(skip)]
    config: ViewportConfig,
}

impl Default for Viewport {
    fn default() -> Self {
        Self::new(ViewportConfig::default())
    }
}

impl Viewport {
    pub fn new(config: ViewportConfig) -> Self {
        Self {
            offset: Point::new(0.0, 0.0),
            scale: 1.0,
            pan_anchor: None,
            config,
        }
    }

    pub fn config(&self) -> ViewportConfig {
        self.config
    }

    pub fn screen_to_world(&self, screen: Point) -> Point {
        let shifted = screen - self.offset;
        Point::new(shifted.x / self.scale, shifted.y / self.scale)
    }

    pub fn world_to_screen(&self, world: Point) -> Point {
        Point::new(world.x * self.scale, world.y * self.scale) + self.offset
    }

    pub fn begin_pan(&mut self, pointer: Point) {
        self.pan_anchor = Some(pointer - self.offset);
    }

    /// Tracks the pointer absolutely from the anchor captured in
    /// [`Viewport::begin_pan`]; returns `false` when no pan is active.
    pub fn pan_to(&mut self, pointer: Point) -> bool {
        match self.pan_anchor {
            Some(anchor) => {
                self.offset = pointer - anchor;
                true
            }
            None => false,
        }
    }

    pub fn end_pan(&mut self) {
        self.pan_anchor = None;
    }

    pub fn is_panning(&self) -> bool {
        self.pan_anchor.is_some()
    }

    /// One wheel tick: positive delta zooms out, anything else zooms in.
    pub fn zoom(&mut self, wheel_delta_y: f64) {
        let factor = if wheel_delta_y > 0.0 {
            ZOOM_OUT_FACTOR
        } else {
            ZOOM_IN_FACTOR
        };
        self.apply_zoom(factor);
    }

    pub fn zoom_in(&mut self) {
        self.apply_zoom(ZOOM_IN_FACTOR);
    }

    pub fn zoom_out(&mut self) {
        self.apply_zoom(ZOOM_OUT_FACTOR);
    }

    pub fn reset(&mut self) {
        *self = Self::new(self.config);
    }

    fn apply_zoom(&mut self, factor: f64) {
        self.scale = (self.scale * factor).clamp(self.config.min_scale, self.config.max_scale);
    }
}
