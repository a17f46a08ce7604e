//! Greedy graph coloring of constraints into particle-disjoint phases.

use std::ops::Range;

use crate::error::{SolverError, SolverResult};

/// Set of particle indices backed by 64-bit words.
#[derive(Debug, Clone)]
struct ParticleBits {
    words: Vec<u64>,
}

impl ParticleBits {
    fn new(max_particles: usize) -> Self {
        Self {
            words: vec![0; max_particles.div_ceil(64)],
        }
    }

    fn contains(&self, index: u32) -> bool {
        let index = index as usize;
        self.words[index / 64] & (1 << (index % 64)) != 0
    }

    fn insert(&mut self, index: u32) {
        let index = index as usize;
        self.words[index / 64] |= 1 << (index % 64);
    }

    fn is_disjoint(&self, particles: &[u32]) -> bool {
        particles.iter().all(|&p| !self.contains(p))
    }
}

/// Assigns every constraint the lowest phase whose members share none of its particles.
///
/// Constraints are visited in index order. `particles_of(i, out)` appends the
/// particles constraint `i` writes to. Returns the phase of each constraint.
pub fn color_constraints<F>(count: usize, max_particles: usize, mut particles_of: F) -> SolverResult<Vec<u32>>
where
    F: FnMut(usize, &mut Vec<u32>),
{
    let mut phases: Vec<ParticleBits> = Vec::new();
    let mut assignment = Vec::with_capacity(count);
    let mut scratch = Vec::new();

    for constraint in 0..count {
        scratch.clear();
        particles_of(constraint, &mut scratch);
        if let Some(&index) = scratch.iter().find(|&&p| p as usize >= max_particles) {
            return Err(SolverError::ParticleOutOfRange {
                index: index as usize,
                max: max_particles,
            });
        }

        let phase = match phases.iter().position(|bits| bits.is_disjoint(&scratch)) {
            Some(phase) => phase,
            None => {
                phases.push(ParticleBits::new(max_particles));
                phases.len() - 1
            }
        };
        for &p in &scratch {
            phases[phase].insert(p);
        }
        assignment.push(phase as u32);
    }
    Ok(assignment)
}

/// Stable ordering that groups constraints by phase, plus the size of each phase.
pub fn phase_order(assignment: &[u32]) -> (Vec<usize>, Vec<u32>) {
    let mut order: Vec<usize> = (0..assignment.len()).collect();
    order.sort_by_key(|&i| assignment[i]);

    let phase_count = assignment.iter().max().map_or(0, |&m| m as usize + 1);
    let mut sizes = vec![0u32; phase_count];
    for &phase in assignment {
        sizes[phase as usize] += 1;
    }
    (order, sizes)
}

/// Contiguous constraint ranges described by `sizes`.
pub fn phase_ranges(sizes: &[u32]) -> impl Iterator<Item = Range<usize>> + '_ {
    sizes.iter().scan(0usize, |start, &size| {
        let range = *start..*start + size as usize;
        *start = range.end;
        Some(range)
    })
}

/// Checks that `sizes` cover exactly `count` constraints and that each range is particle-disjoint.
pub fn validate_partition<F>(
    sizes: &[u32],
    count: usize,
    max_particles: usize,
    mut particles_of: F,
) -> SolverResult<()>
where
    F: FnMut(usize, &mut Vec<u32>),
{
    let total: usize = sizes.iter().map(|&s| s as usize).sum();
    if total != count {
        return Err(SolverError::InvalidPhasePartition(format!(
            "phase sizes cover {total} constraints, batch has {count}"
        )));
    }

    let mut scratch = Vec::new();
    for (phase, range) in phase_ranges(sizes).enumerate() {
        let mut bits = ParticleBits::new(max_particles);
        for constraint in range {
            scratch.clear();
            particles_of(constraint, &mut scratch);
            for &p in &scratch {
                if p as usize >= max_particles {
                    return Err(SolverError::ParticleOutOfRange {
                        index: p as usize,
                        max: max_particles,
                    });
                }
            }
            // A constraint may list one particle twice; only conflicts with earlier members count.
            if !bits.is_disjoint(&scratch) {
                return Err(SolverError::InvalidPhasePartition(format!(
                    "constraint {constraint} shares particles with phase {phase}"
                )));
            }
            for &p in &scratch {
                bits.insert(p);
            }
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn chain(pairs: &[[u32; 2]]) -> impl FnMut(usize, &mut Vec<u32>) + '_ {
        move |i, out: &mut Vec<u32>| out.extend_from_slice(&pairs[i])
    }

    #[test]
    fn chain_alternates_between_two_phases() {
        let pairs = [[0, 1], [1, 2], [2, 3], [3, 4]];
        let phases = color_constraints(pairs.len(), 5, chain(&pairs)).unwrap();
        assert_eq!(phases, vec![0, 1, 0, 1]);

        let (order, sizes) = phase_order(&phases);
        assert_eq!(order, vec![0, 2, 1, 3]);
        assert_eq!(sizes, vec![2, 2]);
        assert_eq!(phase_ranges(&sizes).collect::<Vec<_>>(), vec![0..2, 2..4]);
    }

    #[test]
    fn out_of_range_particle_is_rejected() {
        let pairs = [[0, 7]];
        let err = color_constraints(1, 4, chain(&pairs)).unwrap_err();
        assert_eq!(err, SolverError::ParticleOutOfRange { index: 7, max: 4 });
    }

    #[test]
    fn overlapping_partition_is_rejected() {
        let pairs = [[0, 1], [1, 2]];
        assert!(validate_partition(&[2], 2, 3, chain(&pairs)).is_err());
        assert!(validate_partition(&[1, 1], 2, 3, chain(&pairs)).is_ok());
        assert!(validate_partition(&[1], 2, 3, chain(&pairs)).is_err());
    }
}
