//! Viewport culling.
//!
//! The field of view is an axis-aligned rectangle of the field size centered
//! on the local user, boundary included. Culling only decides what gets
//! drawn; it never touches the store.

use presence_shared::{
    math::{FieldSize, Position},
    model::Positioned,
};

pub fn is_visible(entity: Position, field: FieldSize, user: Position) -> bool {
    (entity.x - user.x).abs() <= field.width / 2.0
        && (entity.y - user.y).abs() <= field.height / 2.0
}

/// Filters any positioned items down to those inside the viewport.
pub fn visible<'a, T, I>(
    items: I,
    field: FieldSize,
    user: Position,
) -> impl Iterator<Item = &'a T> + 'a
where
    T: Positioned + 'a,
    I: IntoIterator<Item = &'a T>,
    I::IntoIter: 'a,
{
    items
        .into_iter()
        .filter(move |item| is_visible(item.position(), field, user))
}

#[cfg(test)]
mod tests {
    use super::*;

    const FIELD: FieldSize = FieldSize::new(800.0, 600.0);
    const USER: Position = Position::new(1000.0, 1000.0);

    #[test]
    fn boundary_is_inclusive() {
        assert!(is_visible(Position::new(1400.0, 1000.0), FIELD, USER));
        assert!(is_visible(Position::new(600.0, 700.0), FIELD, USER));
        assert!(is_visible(Position::new(1400.0, 1300.0), FIELD, USER));
    }

    #[test]
    fn just_outside_is_culled() {
        assert!(!is_visible(Position::new(1400.5, 1000.0), FIELD, USER));
        assert!(!is_visible(Position::new(1000.0, 699.0), FIELD, USER));
    }

    #[test]
    fn rectangle_not_circle() {
        // Corner of the rectangle is farther than either half-extent.
        assert!(is_visible(Position::new(1399.0, 1299.0), FIELD, USER));
    }

    #[test]
    fn filters_positioned_items() {
        let points = [
            Position::new(1000.0, 1000.0),
            Position::new(2000.0, 1000.0),
            Position::new(900.0, 1250.0),
        ];
        let kept: Vec<_> = visible(points.iter(), FIELD, USER).copied().collect();
        assert_eq!(kept, vec![points[0], points[2]]);
    }
}
