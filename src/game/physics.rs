//! Hit-volume geometry and projectile kinematics

use glam::Vec3;

/// Gravity acceleration applied to projectiles (scaled per weapon)
pub const GRAVITY: Vec3 = Vec3::new(0.0, -9.81, 0.0);

/// An actor's body hit volume: a vertical capsule standing on `feet`
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct HitVolume {
    pub feet: Vec3,
    pub height: f32,
    pub radius: f32,
}

impl HitVolume {
    pub fn new(feet: Vec3, height: f32, radius: f32) -> Self {
        Self {
            feet,
            height: height.max(radius * 2.0),
            radius,
        }
    }

    fn axis(&self) -> (Vec3, Vec3) {
        let bottom = self.feet + Vec3::Y * self.radius;
        let top = self.feet + Vec3::Y * (self.height - self.radius);
        (bottom, top)
    }

    /// Whether the segment `from..to` passes through the volume. Returns the
    /// fraction along the segment of the closest approach.
    pub fn segment_hit(&self, from: Vec3, to: Vec3) -> Option<f32> {
        let (bottom, top) = self.axis();
        let (dist_sq, t, _) = closest_points(from, to, bottom, top);
        (dist_sq <= self.radius * self.radius).then_some(t)
    }

    /// Ray test limited to `max_distance`. Returns the distance to the
    /// closest approach along the ray.
    pub fn ray_hit(&self, origin: Vec3, direction: Vec3, max_distance: f32) -> Option<f32> {
        let dir = direction.normalize_or_zero();
        if dir == Vec3::ZERO || max_distance <= 0.0 {
            return None;
        }
        self.segment_hit(origin, origin + dir * max_distance)
            .map(|t| t * max_distance)
    }
}

/// Squared distance between segments p1..q1 and p2..q2, with the parameters
/// of the closest points on each.
fn closest_points(p1: Vec3, q1: Vec3, p2: Vec3, q2: Vec3) -> (f32, f32, f32) {
    const EPS: f32 = 1e-6;
    let d1 = q1 - p1;
    let d2 = q2 - p2;
    let r = p1 - p2;
    let a = d1.length_squared();
    let e = d2.length_squared();
    let f = d2.dot(r);

    let (s, t) = if a <= EPS && e <= EPS {
        (0.0, 0.0)
    } else if a <= EPS {
        (0.0, (f / e).clamp(0.0, 1.0))
    } else {
        let c = d1.dot(r);
        if e <= EPS {
            ((-c / a).clamp(0.0, 1.0), 0.0)
        } else {
            let b = d1.dot(d2);
            let denom = a * e - b * b;
            let mut s = if denom > EPS {
                ((b * f - c * e) / denom).clamp(0.0, 1.0)
            } else {
                0.0
            };
            let mut t = (b * s + f) / e;
            if t < 0.0 {
                t = 0.0;
                s = (-c / a).clamp(0.0, 1.0);
            } else if t > 1.0 {
                t = 1.0;
                s = ((b - c) / a).clamp(0.0, 1.0);
            }
            (s, t)
        }
    };

    let c1 = p1 + d1 * s;
    let c2 = p2 + d2 * t;
    (c1.distance_squared(c2), s, t)
}

/// Advance a projectile by `dt`. Returns the new (position, velocity).
pub fn integrate(position: Vec3, velocity: Vec3, gravity_scale: f32, dt: f32) -> (Vec3, Vec3) {
    let velocity = velocity + GRAVITY * gravity_scale * dt;
    (position + velocity * dt, velocity)
}

/// Check if `point` lies within `radius` of `center`
pub fn is_within(point: Vec3, center: Vec3, radius: f32) -> bool {
    point.distance_squared(center) <= radius * radius
}
