//! Procedural motion generator driving synthetic module values for a point.
//!
//! A [`Fade`] is pure state plus [`Fade::advance`]; scheduling lives in
//! [`engine::FadeEngine`].

pub mod engine;

use std::{fmt, time::Duration};

use serde::{Deserialize, Serialize};

use crate::{
    config::FadeConfig,
    model::{Address, Module, ModuleIdentifier, Priority, Xyz, ROTATION_MODULUS},
};

pub use engine::{FadeEngine, FadeEngineDelegate};

/// Motion pattern followed by a fade.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum FadePattern {
    /// Accelerates from the minimum position towards the maximum, then starts over.
    PositionForward,
    /// Accelerates from the maximum position towards the minimum, then starts over.
    PositionReverse,
    /// Accelerates towards a bound and reflects off it.
    PositionBounce,
    /// Constant angular speed, wrapping at a full turn.
    RotateForward,
    RotateReverse,
}

impl FadePattern {
    pub fn is_rotation(self) -> bool {
        matches!(self, Self::RotateForward | Self::RotateReverse)
    }

    /// The base module this pattern writes.
    pub fn module_identifier(self) -> ModuleIdentifier {
        if self.is_rotation() {
            ModuleIdentifier::Rotation
        } else {
            ModuleIdentifier::Position
        }
    }
}

impl fmt::Display for FadePattern {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::PositionForward => "position forward",
            Self::PositionReverse => "position reverse",
            Self::PositionBounce => "position bounce",
            Self::RotateForward => "rotate forward",
            Self::RotateReverse => "rotate reverse",
        };
        f.write_str(name)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    Increasing,
    Decreasing,
}

impl Direction {
    fn inverted(self) -> Self {
        match self {
            Self::Increasing => Self::Decreasing,
            Self::Decreasing => Self::Increasing,
        }
    }

    fn sign(self) -> i64 {
        match self {
            Self::Increasing => 1,
            Self::Decreasing => -1,
        }
    }

    /// The bound a position fade travelling this way runs into.
    fn bound(self) -> i32 {
        match self {
            Self::Increasing => i32::MAX,
            Self::Decreasing => i32::MIN,
        }
    }

    /// Where a position fade travelling this way starts.
    fn origin(self) -> i32 {
        match self {
            Self::Increasing => i32::MIN,
            Self::Decreasing => i32::MAX,
        }
    }
}

/// Animation state for a single `(address, priority)` pair.
///
/// The point is referenced by key only; the model resolves it on every tick
/// and silently skips fades whose point has gone away.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Fade {
    address: Address,
    priority: Priority,
    pattern: FadePattern,
    location: i32,
    direction: Direction,
    step: i32,
    initial_step: i32,
    step_increment: i32,
    interval: Duration,
    velocity: i32,
    previous_velocity: i32,
    acceleration: i32,
}

impl Fade {
    pub fn new(address: Address, priority: Priority, pattern: FadePattern) -> Self {
        Self::with_config(address, priority, pattern, &FadeConfig::default())
    }

    pub fn with_config(
        address: Address,
        priority: Priority,
        pattern: FadePattern,
        config: &FadeConfig,
    ) -> Self {
        let direction = match pattern {
            FadePattern::PositionReverse | FadePattern::RotateReverse => Direction::Decreasing,
            _ => Direction::Increasing,
        };
        let (location, initial_step, step_increment) = if pattern.is_rotation() {
            (0, config.rotation_step, 0)
        } else {
            (
                direction.origin(),
                config.position_initial_step,
                config.position_step_increment,
            )
        };

        Self {
            address,
            priority,
            pattern,
            location,
            direction,
            step: initial_step,
            initial_step,
            step_increment,
            interval: config.tick_interval(),
            velocity: 0,
            previous_velocity: 0,
            acceleration: 0,
        }
    }

    pub fn address(&self) -> Address {
        self.address
    }

    pub fn priority(&self) -> Priority {
        self.priority
    }

    pub fn key(&self) -> (Address, Priority) {
        (self.address, self.priority)
    }

    pub fn pattern(&self) -> FadePattern {
        self.pattern
    }

    pub fn location(&self) -> i32 {
        self.location
    }

    pub fn direction(&self) -> Direction {
        self.direction
    }

    pub fn step(&self) -> i32 {
        self.step
    }

    /// Units per second over the last tick.
    pub fn velocity(&self) -> i32 {
        self.velocity
    }

    /// Units per second squared over the last tick.
    pub fn acceleration(&self) -> i32 {
        self.acceleration
    }

    /// Moves the fade forward by one tick.
    pub fn advance(&mut self) {
        let travelled = match self.pattern {
            FadePattern::PositionForward | FadePattern::PositionReverse => {
                self.advance_position(false)
            }
            FadePattern::PositionBounce => self.advance_position(true),
            FadePattern::RotateForward | FadePattern::RotateReverse => self.advance_rotation(),
        };

        self.previous_velocity = self.velocity;
        self.velocity = per_second(travelled, self.interval);
        self.acceleration = per_second(
            i64::from(self.velocity) - i64::from(self.previous_velocity),
            self.interval,
        );
    }

    /// Returns the signed distance travelled this tick. A reset is a jump
    /// rather than motion and reports zero.
    fn advance_position(&mut self, bounce: bool) -> i64 {
        let next = match self.direction {
            Direction::Increasing => self.location.checked_add(self.step),
            Direction::Decreasing => self.location.checked_sub(self.step),
        };

        match next {
            Some(location) => {
                let travelled = self.direction.sign() * i64::from(self.step);
                self.location = location;
                self.step = self.step.saturating_add(self.step_increment);
                travelled
            }
            None if bounce => {
                let bound = self.direction.bound();
                let travelled = i64::from(bound) - i64::from(self.location);
                self.location = bound;
                self.direction = self.direction.inverted();
                self.step = self.initial_step;
                travelled
            }
            None => {
                self.location = self.direction.origin();
                self.step = self.initial_step;
                0
            }
        }
    }

    fn advance_rotation(&mut self) -> i64 {
        let modulus = i64::from(ROTATION_MODULUS);
        let travelled = self.direction.sign() * i64::from(self.step);
        // The wrapped value is below the modulus, which fits in an i32.
        self.location = (i64::from(self.location) + travelled).rem_euclid(modulus) as i32;
        travelled
    }

    /// The current sample as a base module and its velocity/acceleration
    /// companion. All three axes carry the same value.
    pub fn module_values(&self) -> (Module, Module) {
        let velocity = Xyz::splat(self.velocity);
        let acceleration = Xyz::splat(self.acceleration);
        if self.pattern.is_rotation() {
            let angle = u32::try_from(self.location).unwrap_or(0);
            (
                Module::Rotation(Xyz::splat(angle)),
                Module::RotationVelAccel {
                    velocity,
                    acceleration,
                },
            )
        } else {
            (
                Module::Position(Xyz::splat(self.location)),
                Module::PositionVelAccel {
                    velocity,
                    acceleration,
                },
            )
        }
    }
}

fn per_second(delta: i64, interval: Duration) -> i32 {
    let micros = i64::try_from(interval.as_micros()).unwrap_or(i64::MAX).max(1);
    let rate = delta.saturating_mul(1_000_000) / micros;
    rate.clamp(i64::from(i32::MIN), i64::from(i32::MAX)) as i32
}
