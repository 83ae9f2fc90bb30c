//! Input handling.
//!
//! The local avatar is always drawn at the center of the field, so the
//! camera maps display coordinates to world coordinates by shifting the
//! field center onto the avatar's world position.

use presence_shared::math::{FieldSize, Position};

/// Where a click at `display` lands in the world.
pub fn display_to_world(display: Position, field: FieldSize, camera: Position) -> Position {
    display - field.center() + camera
}

/// Where a world position is drawn on the field.
pub fn world_to_display(world: Position, field: FieldSize, camera: Position) -> Position {
    world - camera + field.center()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn click_at_center_is_the_avatar() {
        let field = FieldSize::new(800.0, 600.0);
        let camera = Position::new(1200.0, 50.0);
        assert_eq!(display_to_world(field.center(), field, camera), camera);
    }

    #[test]
    fn click_offsets_from_camera() {
        let field = FieldSize::new(800.0, 600.0);
        let camera = Position::new(1000.0, 1000.0);
        let world = display_to_world(Position::new(0.0, 600.0), field, camera);
        assert_eq!(world, Position::new(600.0, 1300.0));
        assert_eq!(world_to_display(world, field, camera), Position::new(0.0, 600.0));
    }
}
