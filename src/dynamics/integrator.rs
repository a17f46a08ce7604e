use glam::{Quat, Vec3};

use crate::{
    config::{SimulationMode, SolverParameters},
    core::particles::ParticleStore,
    utils::math::{angular_velocity_to_quat, quat_to_angular_velocity},
};

/// Explicit prediction and velocity reconstruction around the constraint passes.
#[derive(Debug, Clone)]
pub struct Integrator {
    pub gravity: Vec3,
    pub damping: f32,
    pub sleep_threshold: f32,
    pub warm_start: f32,
    pub mode: SimulationMode,
}

impl Default for Integrator {
    fn default() -> Self {
        Self::new(&SolverParameters::default())
    }
}

impl Integrator {
    pub fn new(parameters: &SolverParameters) -> Self {
        Self {
            gravity: parameters.gravity,
            damping: parameters.damping,
            sleep_threshold: parameters.sleep_threshold,
            warm_start: parameters.warm_start,
            mode: parameters.mode,
        }
    }

    fn damping_factor(&self, dt: f32) -> f32 {
        (1.0 - self.damping * dt).max(0.0)
    }

    /// Stores the previous pose and advances every active particle to its predicted pose.
    pub fn predict(&self, particles: &mut ParticleStore, dt: f32) {
        let damping = self.damping_factor(dt);
        let planar = self.mode == SimulationMode::Mode2D;

        for index in 0..particles.active().len() {
            let i = particles.active()[index] as usize;
            particles.prev_positions[i] = particles.positions[i];
            particles.prev_orientations[i] = particles.orientations[i];

            let seed = std::mem::take(&mut particles.warm_start_deltas[i]);
            let inv_mass = particles.inv_masses[i];
            if inv_mass > 0.0 {
                let mut velocity = particles.velocities[i]
                    + (self.gravity + particles.external_forces[i] * inv_mass) * dt;
                velocity *= damping;
                if planar {
                    velocity.z = 0.0;
                }
                particles.velocities[i] = velocity;
                particles.positions[i] += velocity * dt + seed * self.warm_start;
            }

            if particles.inv_rotational_masses[i] > 0.0 {
                let torque = particles.external_torques[i];
                let mut angular = particles.angular_velocities[i]
                    + particles.inv_inertia_tensors[i] * torque * dt;
                angular *= damping;
                if planar {
                    angular.x = 0.0;
                    angular.y = 0.0;
                }
                particles.angular_velocities[i] = angular;
                particles.orientations[i] =
                    (angular_velocity_to_quat(angular, dt) * particles.orientations[i]).normalize();
            }
        }
    }

    /// Derives velocities from the pose change of the substep and puts slow particles to sleep.
    pub fn update_velocities(&self, particles: &mut ParticleStore, dt: f32) {
        if dt <= 0.0 {
            return;
        }
        let planar = self.mode == SimulationMode::Mode2D;

        for index in 0..particles.active().len() {
            let i = particles.active()[index] as usize;
            if particles.inv_masses[i] > 0.0 {
                if planar {
                    particles.positions[i].z = particles.prev_positions[i].z;
                }
                let velocity = (particles.positions[i] - particles.prev_positions[i]) / dt;
                if 0.5 * velocity.length_squared() < self.sleep_threshold {
                    particles.velocities[i] = Vec3::ZERO;
                    particles.positions[i] = particles.prev_positions[i];
                } else {
                    particles.velocities[i] = velocity;
                }
            }

            if particles.inv_rotational_masses[i] > 0.0 {
                let angular = quat_to_angular_velocity(
                    particles.prev_orientations[i],
                    particles.orientations[i],
                    dt,
                );
                if 0.5 * angular.length_squared() < self.sleep_threshold {
                    particles.angular_velocities[i] = Vec3::ZERO;
                    particles.orientations[i] = particles.prev_orientations[i];
                } else {
                    particles.angular_velocities[i] = angular;
                }
            }
        }
    }
}

/// Normalizes `q`, falling back to identity when degenerate.
pub(crate) fn normalize_or_identity(q: Quat) -> Quat {
    let length = q.length();
    if length > 1e-9 && length.is_finite() {
        q / length
    } else {
        Quat::IDENTITY
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn free_fall_matches_explicit_euler() {
        let mut particles = ParticleStore::new(2);
        particles.inv_masses[0] = 1.0;
        particles.set_active(&[0, 1]).unwrap();
        let integrator = Integrator::default();
        let dt = 0.1;

        integrator.predict(&mut particles, dt);
        assert!((particles.velocities[0].y + 0.981).abs() < 1e-5);
        assert!((particles.positions[0].y + 0.0981).abs() < 1e-5);
        // Kinematic particles stay put.
        assert_eq!(particles.positions[1], Vec3::ZERO);

        integrator.update_velocities(&mut particles, dt);
        assert!((particles.velocities[0].y + 0.981).abs() < 1e-4);
    }

    #[test]
    fn slow_particles_fall_asleep() {
        let parameters = SolverParameters {
            gravity: Vec3::ZERO,
            sleep_threshold: 1.0,
            ..Default::default()
        };
        let integrator = Integrator::new(&parameters);
        let mut particles = ParticleStore::new(1);
        particles.inv_masses[0] = 1.0;
        particles.velocities[0] = Vec3::new(0.5, 0.0, 0.0);
        particles.set_active(&[0]).unwrap();

        integrator.predict(&mut particles, 0.1);
        integrator.update_velocities(&mut particles, 0.1);
        assert_eq!(particles.velocities[0], Vec3::ZERO);
        assert_eq!(particles.positions[0], Vec3::ZERO);
    }

    #[test]
    fn planar_mode_locks_depth() {
        let parameters = SolverParameters {
            mode: SimulationMode::Mode2D,
            gravity: Vec3::new(0.0, 0.0, -10.0),
            ..Default::default()
        };
        let integrator = Integrator::new(&parameters);
        let mut particles = ParticleStore::new(1);
        particles.inv_masses[0] = 1.0;
        particles.set_active(&[0]).unwrap();
        integrator.predict(&mut particles, 0.1);
        assert_eq!(particles.positions[0].z, 0.0);
    }
}
