use rand::seq::SliceRandom;
use serde::{Deserialize, Serialize};

use crate::error::SequenceError;

// -----------------------------------------------------------------------------
// CONDITIONS
// -----------------------------------------------------------------------------

/// One stimulus type in the experimental sequence.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Condition {
    Sound,
    Deviant,
    Omission,
}

impl Condition {
    /// Sound identifier for audio conditions; omissions are silent.
    pub fn sound_id(&self) -> Option<usize> {
        match self {
            Condition::Sound => Some(0),
            Condition::Deviant => Some(1),
            Condition::Omission => None,
        }
    }
}

// -----------------------------------------------------------------------------
// SEQUENCE GENERATION
// -----------------------------------------------------------------------------

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct SequenceConfig {
    pub n_sound: usize,
    pub n_deviant: usize,
    pub n_omission: usize,
    /// Minimum index distance between two omissions (2 = never adjacent).
    pub omission_min_spacing: usize,
    /// Minimum index distance between two deviants.
    pub deviant_min_spacing: usize,
    /// Percentage of the sequence at each edge kept free of omissions and
    /// deviants.
    pub edge_percent: f64,
    /// Bound on randomization retries before giving up.
    pub max_iter: usize,
}

impl SequenceConfig {
    pub fn total(&self) -> usize {
        self.n_sound + self.n_deviant + self.n_omission
    }
}

/// The ordered series of conditions for one session. Generated once before
/// the session starts; immutable afterwards except for the read cursor.
#[derive(Debug)]
pub struct Sequence {
    conditions: Vec<Condition>,
    cursor: usize,
}

impl Sequence {
    /// Randomized construction with rejection: shuffle candidate placements
    /// and validate the ordering constraints, retrying up to `max_iter`
    /// times.
    pub fn generate(config: &SequenceConfig) -> Result<Self, SequenceError> {
        let total = config.total();
        if total == 0 {
            return Err(SequenceError::Unsatisfiable {
                reason: "sequence length is zero".to_string(),
            });
        }

        let n_edge = (config.edge_percent * total as f64 / 100.0).ceil() as usize;
        if config.n_sound < 2 * n_edge {
            return Err(SequenceError::Unsatisfiable {
                reason: format!(
                    "edge_percent {}% requires {} sounds for the edges, only {} configured",
                    config.edge_percent,
                    2 * n_edge,
                    config.n_sound
                ),
            });
        }

        let middle_len = total - 2 * n_edge;
        // A necessary condition before any shuffling: k constrained elements
        // with spacing s need (k-1)*s + 1 interior slots.
        for (name, count, spacing) in [
            ("omission", config.n_omission, config.omission_min_spacing),
            ("deviant", config.n_deviant, config.deviant_min_spacing),
        ] {
            if count > 1 && (count - 1) * spacing + 1 > middle_len {
                return Err(SequenceError::Unsatisfiable {
                    reason: format!(
                        "{} {}s with min spacing {} cannot fit in {} interior slots",
                        count, name, spacing, middle_len
                    ),
                });
            }
        }

        let mut middle = Vec::with_capacity(middle_len);
        middle.extend(std::iter::repeat(Condition::Sound).take(config.n_sound - 2 * n_edge));
        middle.extend(std::iter::repeat(Condition::Deviant).take(config.n_deviant));
        middle.extend(std::iter::repeat(Condition::Omission).take(config.n_omission));

        let mut rng = rand::thread_rng();
        for _ in 0..config.max_iter {
            middle.shuffle(&mut rng);
            if spacing_satisfied(&middle, Condition::Omission, config.omission_min_spacing)
                && spacing_satisfied(&middle, Condition::Deviant, config.deviant_min_spacing)
            {
                let mut conditions = Vec::with_capacity(total);
                conditions.extend(std::iter::repeat(Condition::Sound).take(n_edge));
                conditions.extend_from_slice(&middle);
                conditions.extend(std::iter::repeat(Condition::Sound).take(n_edge));
                return Ok(Self {
                    conditions,
                    cursor: 0,
                });
            }
        }

        Err(SequenceError::Unsatisfiable {
            reason: format!(
                "randomization did not converge within {} iterations",
                config.max_iter
            ),
        })
    }

    /// Returns the next condition and advances the cursor.
    pub fn next(&mut self) -> Result<Condition, SequenceError> {
        let condition = self
            .conditions
            .get(self.cursor)
            .copied()
            .ok_or(SequenceError::Exhausted)?;
        self.cursor += 1;
        Ok(condition)
    }

    /// Rewinds the cursor without regenerating the ordering.
    pub fn reset(&mut self) {
        self.cursor = 0;
    }

    pub fn len(&self) -> usize {
        self.conditions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.conditions.is_empty()
    }

    pub fn cursor(&self) -> usize {
        self.cursor
    }

    pub fn conditions(&self) -> &[Condition] {
        &self.conditions
    }
}

fn spacing_satisfied(middle: &[Condition], condition: Condition, min_spacing: usize) -> bool {
    let mut last: Option<usize> = None;
    for (i, &c) in middle.iter().enumerate() {
        if c != condition {
            continue;
        }
        if let Some(prev) = last {
            if i - prev < min_spacing {
                return false;
            }
        }
        last = Some(i);
    }
    true
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config(n_sound: usize, n_omission: usize, spacing: usize) -> SequenceConfig {
        SequenceConfig {
            n_sound,
            n_deviant: 0,
            n_omission,
            omission_min_spacing: spacing,
            deviant_min_spacing: 1,
            edge_percent: 0.0,
            max_iter: 500,
        }
    }

    fn omission_indices(sequence: &Sequence) -> Vec<usize> {
        sequence
            .conditions()
            .iter()
            .enumerate()
            .filter(|(_, c)| **c == Condition::Omission)
            .map(|(i, _)| i)
            .collect()
    }

    #[test]
    fn omissions_respect_min_spacing() {
        // Property holds over repeated randomized generations.
        for _ in 0..50 {
            let sequence = Sequence::generate(&config(16, 4, 2)).unwrap();
            assert_eq!(sequence.len(), 20);
            let omissions = omission_indices(&sequence);
            assert_eq!(omissions.len(), 4);
            for pair in omissions.windows(2) {
                assert!(pair[1] - pair[0] >= 2, "omissions too close: {:?}", omissions);
            }
        }
    }

    #[test]
    fn infeasible_counts_fail_fast() {
        let err = Sequence::generate(&config(5, 15, 2)).unwrap_err();
        match err {
            SequenceError::Unsatisfiable { reason } => {
                assert!(reason.contains("omission"), "unexpected reason: {}", reason)
            }
            other => panic!("expected Unsatisfiable, got {:?}", other),
        }
    }

    #[test]
    fn cursor_exhausts_after_length_calls() {
        let mut sequence = Sequence::generate(&config(16, 4, 2)).unwrap();
        for _ in 0..sequence.len() {
            sequence.next().unwrap();
        }
        assert_eq!(sequence.next().unwrap_err(), SequenceError::Exhausted);
    }

    #[test]
    fn counts_are_exact() {
        let config = SequenceConfig {
            n_sound: 50,
            n_deviant: 6,
            n_omission: 10,
            omission_min_spacing: 2,
            deviant_min_spacing: 3,
            edge_percent: 10.0,
            max_iter: 500,
        };
        let sequence = Sequence::generate(&config).unwrap();
        let count = |cond| {
            sequence
                .conditions()
                .iter()
                .filter(|c| **c == cond)
                .count()
        };
        assert_eq!(count(Condition::Sound), 50);
        assert_eq!(count(Condition::Deviant), 6);
        assert_eq!(count(Condition::Omission), 10);
    }

    #[test]
    fn edges_are_sound_only() {
        let config = SequenceConfig {
            n_sound: 50,
            n_deviant: 6,
            n_omission: 10,
            omission_min_spacing: 2,
            deviant_min_spacing: 3,
            edge_percent: 10.0,
            max_iter: 500,
        };
        let sequence = Sequence::generate(&config).unwrap();
        let n_edge = (config.edge_percent * config.total() as f64 / 100.0).ceil() as usize;
        assert!(n_edge > 0);
        for &c in &sequence.conditions()[..n_edge] {
            assert_eq!(c, Condition::Sound);
        }
        for &c in &sequence.conditions()[sequence.len() - n_edge..] {
            assert_eq!(c, Condition::Sound);
        }
    }

    #[test]
    fn reset_rewinds_without_regenerating() {
        let mut sequence = Sequence::generate(&config(16, 4, 2)).unwrap();
        let first: Vec<Condition> = (0..5).map(|_| sequence.next().unwrap()).collect();
        sequence.reset();
        let again: Vec<Condition> = (0..5).map(|_| sequence.next().unwrap()).collect();
        assert_eq!(first, again);
    }
}
