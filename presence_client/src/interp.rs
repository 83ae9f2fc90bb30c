//! Interpolation.
//!
//! The server sends discrete positions; the client eases what it draws
//! toward them. Both the local avatar and remote actors use the same
//! exponential approach: each step closes a fixed fraction of the gap,
//! and once the gap is under [`SNAP_DISTANCE`] on both axes the position
//! snaps exactly onto the target.
//!
//! `tick` applies one reference step (10%). `advance` scales the step by
//! elapsed time so convergence does not depend on how often it is called.

use std::{collections::HashMap, time::Duration};

use presence_shared::{
    math::{Position, WorldSize},
    model::ActorId,
};

use crate::store::Actors;

/// Gap below which easing snaps onto the target, per axis.
pub const SNAP_DISTANCE: f64 = 3.0;

/// Fraction of the gap closed per reference step.
pub const APPROACH_PER_TICK: f64 = 0.1;

/// Step length the per-tick fraction is defined against (60 Hz).
pub const REFERENCE_PERIOD: Duration = Duration::from_nanos(16_666_667);

/// Fraction of the gap to close after `elapsed`, matching
/// [`APPROACH_PER_TICK`] per [`REFERENCE_PERIOD`].
pub fn approach_fraction(elapsed: Duration) -> f64 {
    let steps = elapsed.as_secs_f64() / REFERENCE_PERIOD.as_secs_f64();
    (1.0 - (1.0 - APPROACH_PER_TICK).powf(steps)).clamp(0.0, 1.0)
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Eased {
    Snapped(Position),
    Moved(Position),
}

/// One easing step from `current` toward `target`.
pub fn ease(current: Position, target: Position, fraction: f64) -> Eased {
    if current.within(target, SNAP_DISTANCE) {
        Eased::Snapped(target)
    } else {
        Eased::Moved(current + (target - current) * fraction)
    }
}

/// Outcome of one local avatar step.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum AvatarStep {
    /// No target; the timer should not be running.
    Idle,
    Moving(Position),
    /// Reached the target exactly; the timer should stop.
    Arrived(Position),
}

/// Eases the local avatar toward a clicked world position.
#[derive(Debug, Clone)]
pub struct LocalAvatarMotion {
    world: WorldSize,
    target: Option<Position>,
}

impl LocalAvatarMotion {
    pub fn new(world: WorldSize) -> Self {
        Self {
            world,
            target: None,
        }
    }

    /// Sets a new target, replacing any previous one. Targets outside the
    /// world are clamped onto its edge. Returns the effective target.
    pub fn set_target(&mut self, target: Position) -> Position {
        let target = self.world.clamp(target);
        self.target = Some(target);
        target
    }

    pub fn target(&self) -> Option<Position> {
        self.target
    }

    pub fn clear(&mut self) {
        self.target = None;
    }

    pub fn tick(&mut self, current: Position) -> AvatarStep {
        self.step(current, APPROACH_PER_TICK)
    }

    pub fn advance(&mut self, current: Position, elapsed: Duration) -> AvatarStep {
        self.step(current, approach_fraction(elapsed))
    }

    fn step(&mut self, current: Position, fraction: f64) -> AvatarStep {
        let Some(target) = self.target else {
            return AvatarStep::Idle;
        };
        match ease(current, target, fraction) {
            Eased::Snapped(p) => {
                self.target = None;
                AvatarStep::Arrived(p)
            }
            Eased::Moved(p) => AvatarStep::Moving(self.world.clamp(p)),
        }
    }
}

/// Eases each remote actor's drawn position toward its latest target.
#[derive(Debug, Clone, Default)]
pub struct RemoteActorMotion {
    displayed: HashMap<ActorId, Position>,
}

impl RemoteActorMotion {
    pub fn new() -> Self {
        Self::default()
    }

    /// Starts tracking new actors and forgets departed ones. A new actor
    /// is drawn from where it was before its last move, or at its target
    /// if it never moved.
    pub fn sync(&mut self, actors: &Actors) {
        self.displayed.retain(|id, _| actors.contains_key(id));
        for (id, actor) in actors {
            self.displayed
                .entry(id.clone())
                .or_insert_with(|| actor.previous_position.unwrap_or(actor.position));
        }
    }

    /// One reference step. Returns how many drawn positions changed.
    pub fn tick(&mut self, actors: &Actors) -> usize {
        self.step(actors, APPROACH_PER_TICK)
    }

    pub fn advance(&mut self, actors: &Actors, elapsed: Duration) -> usize {
        self.step(actors, approach_fraction(elapsed))
    }

    fn step(&mut self, actors: &Actors, fraction: f64) -> usize {
        let mut changed = 0;
        for (id, actor) in actors {
            let target = actor.position;
            let shown = self
                .displayed
                .entry(id.clone())
                .or_insert_with(|| actor.previous_position.unwrap_or(target));
            if *shown == target {
                continue;
            }
            *shown = match actor.previous_position {
                None => target,
                Some(_) => match ease(*shown, target, fraction) {
                    Eased::Snapped(p) | Eased::Moved(p) => p,
                },
            };
            changed += 1;
        }
        changed
    }

    pub fn displayed(&self, id: &ActorId) -> Option<Position> {
        self.displayed.get(id).copied()
    }

    pub fn displayed_positions(&self) -> &HashMap<ActorId, Position> {
        &self.displayed
    }
}
