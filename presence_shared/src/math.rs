//! Math types.
//!
//! World space is a flat 2D plane with the origin at the top-left corner.
//! Positions stay real-valued while animating and are rounded only when
//! they leave the client.

use std::ops::{Add, Mul, Sub};

use serde::{Deserialize, Serialize};

/// 2D world-space position.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize, Default)]
pub struct Position {
    pub x: f64,
    pub y: f64,
}

impl Position {
    pub const ZERO: Self = Self { x: 0.0, y: 0.0 };

    pub const fn new(x: f64, y: f64) -> Self {
        Self { x, y }
    }

    /// True when both axes of `self - other` are strictly below `threshold`.
    pub fn within(self, other: Self, threshold: f64) -> bool {
        let d = other - self;
        d.x.abs() < threshold && d.y.abs() < threshold
    }

    /// Rounds both axes to the nearest integer for transmission.
    pub fn rounded(self) -> GridPosition {
        GridPosition {
            x: self.x.round() as i64,
            y: self.y.round() as i64,
        }
    }
}

impl Add for Position {
    type Output = Self;

    fn add(self, rhs: Self) -> Self {
        Self::new(self.x + rhs.x, self.y + rhs.y)
    }
}

impl Sub for Position {
    type Output = Self;

    fn sub(self, rhs: Self) -> Self {
        Self::new(self.x - rhs.x, self.y - rhs.y)
    }
}

impl Mul<f64> for Position {
    type Output = Self;

    fn mul(self, rhs: f64) -> Self {
        Self::new(self.x * rhs, self.y * rhs)
    }
}

/// Integer position as it travels on the wire.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
pub struct GridPosition {
    pub x: i64,
    pub y: i64,
}

/// Viewport dimensions in display units.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct FieldSize {
    pub width: f64,
    pub height: f64,
}

impl FieldSize {
    pub const fn new(width: f64, height: f64) -> Self {
        Self { width, height }
    }

    /// Display-space center of the field, where the local avatar is drawn.
    pub fn center(self) -> Position {
        Position::new(self.width / 2.0, self.height / 2.0)
    }

    pub fn rounded(self) -> GridSize {
        GridSize {
            width: self.width.max(0.0).round() as u32,
            height: self.height.max(0.0).round() as u32,
        }
    }
}

impl Default for FieldSize {
    fn default() -> Self {
        Self::new(1000.0, 600.0)
    }
}

/// Integer field size as it travels on the wire.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
pub struct GridSize {
    pub width: u32,
    pub height: u32,
}

/// Bounds of the shared world: `[0, width] x [0, height]`.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct WorldSize {
    pub width: f64,
    pub height: f64,
}

impl WorldSize {
    pub const fn new(width: f64, height: f64) -> Self {
        Self { width, height }
    }

    pub fn clamp(self, p: Position) -> Position {
        Position::new(
            p.x.clamp(0.0, self.width.max(0.0)),
            p.y.clamp(0.0, self.height.max(0.0)),
        )
    }

    pub fn contains(self, p: Position) -> bool {
        (0.0..=self.width).contains(&p.x) && (0.0..=self.height).contains(&p.y)
    }
}

impl Default for WorldSize {
    fn default() -> Self {
        Self::new(2000.0, 2000.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rounding_is_nearest_integer() {
        let p = Position::new(10.5, -3.4);
        assert_eq!(p.rounded(), GridPosition { x: 11, y: -3 });
        let s = FieldSize::new(999.6, 600.2);
        assert_eq!(s.rounded(), GridSize { width: 1000, height: 600 });
    }

    #[test]
    fn world_clamp_pins_each_axis() {
        let world = WorldSize::new(2000.0, 1000.0);
        assert_eq!(world.clamp(Position::new(-5.0, 1500.0)), Position::new(0.0, 1000.0));
        assert_eq!(world.clamp(Position::new(30.0, 40.0)), Position::new(30.0, 40.0));
        assert!(world.contains(Position::new(2000.0, 0.0)));
        assert!(!world.contains(Position::new(2000.1, 0.0)));
    }

    #[test]
    fn within_is_strict_on_both_axes() {
        let a = Position::new(0.0, 0.0);
        assert!(a.within(Position::new(2.9, -2.9), 3.0));
        assert!(!a.within(Position::new(3.0, 0.0), 3.0));
        assert!(!a.within(Position::new(0.0, 10.0), 3.0));
    }
}
