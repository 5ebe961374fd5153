use log::debug;
use ndarray::ArrayD;

use super::MixingCoefficients;
use crate::{
    error::{FederationErr, MismatchKind, Result},
    learner::Learner,
    session::ClientSession,
    state::{GlobalState, ModelSnapshot},
};

/// Blends the exported snapshots of a round's contributors into a new global snapshot.
///
/// Every contribution is validated against `reference` before anything is
/// combined. The primary and auxiliary states are combined independently with
/// the same coefficients.
///
/// # Arguments
/// * `reference` - The current global snapshot, defines the expected keys and shapes.
/// * `contributions` - Each contributor's index and exported snapshot, ascending by index.
/// * `coefficients` - The mixing coefficients, parallel to `contributions`.
///
/// # Returns
/// The new global snapshot, or `StateShapeMismatch` naming the first incompatible contributor.
pub fn aggregate(
    reference: &ModelSnapshot,
    contributions: &[(usize, &ModelSnapshot)],
    coefficients: &MixingCoefficients,
) -> Result<ModelSnapshot> {
    if contributions.is_empty() || contributions.len() != coefficients.len() {
        return Err(FederationErr::config(format!(
            "can't aggregate {} contribution(s) with {} coefficient(s)",
            contributions.len(),
            coefficients.len()
        )));
    }

    for &(session, snapshot) in contributions {
        reference
            .check_compatible(snapshot)
            .map_err(|(key, reason)| FederationErr::StateShapeMismatch {
                session,
                key,
                reason,
            })?;
    }

    let primaries: Vec<_> = contributions
        .iter()
        .map(|&(session, snapshot)| (session, snapshot.primary()))
        .collect();
    let primary = combine(reference.primary(), &primaries, coefficients)?;

    let Some(reference_aux) = reference.auxiliary() else {
        return Ok(ModelSnapshot::new(primary));
    };

    let auxiliaries = contributions
        .iter()
        .map(|&(session, snapshot)| match snapshot.auxiliary() {
            Some(aux) => Ok((session, aux)),
            None => Err(FederationErr::StateShapeMismatch {
                session,
                key: String::new(),
                reason: MismatchKind::AuxiliaryPresence { expected: true },
            }),
        })
        .collect::<Result<Vec<_>>>()?;
    let auxiliary = combine(reference_aux, &auxiliaries, coefficients)?;

    Ok(ModelSnapshot::with_auxiliary(primary, auxiliary))
}

/// Computes `sum_i coefficients[i] * states[i][key]` for every key of `reference`.
///
/// The first state seeds the accumulator and the rest are added in the given
/// order, so for a fixed input the result is bit for bit reproducible.
///
/// # Arguments
/// * `reference` - The state whose keys are combined.
/// * `states` - Each contributor's index and state.
/// * `coefficients` - The mixing coefficients, parallel to `states`.
///
/// # Returns
/// The combined state, or `StateShapeMismatch` if a contributor lacks a key or
/// holds it with another shape.
pub fn combine(
    reference: &GlobalState,
    states: &[(usize, &GlobalState)],
    coefficients: &[f64],
) -> Result<GlobalState> {
    reference
        .iter()
        .map(|(key, expected)| {
            let mut acc: Option<ArrayD<f32>> = None;

            for (&(session, state), &coefficient) in states.iter().zip(coefficients) {
                let local = fetch(state, session, key, expected)?;
                let coefficient = coefficient as f32;

                match acc.as_mut() {
                    None => acc = Some(local.mapv(|x| coefficient * x)),
                    Some(acc) => acc.scaled_add(coefficient, local),
                }
            }

            let acc = acc.ok_or_else(|| FederationErr::config("nothing to combine"))?;
            Ok((key.clone(), acc))
        })
        .collect()
}

/// Looks up `key` in a contributor's state, checking its shape.
fn fetch<'a>(
    state: &'a GlobalState,
    session: usize,
    key: &str,
    expected: &ArrayD<f32>,
) -> Result<&'a ArrayD<f32>> {
    let local = state
        .get(key)
        .ok_or_else(|| FederationErr::StateShapeMismatch {
            session,
            key: key.to_string(),
            reason: MismatchKind::MissingKey,
        })?;

    if local.shape() != expected.shape() {
        return Err(FederationErr::StateShapeMismatch {
            session,
            key: key.to_string(),
            reason: MismatchKind::Shape {
                expected: expected.shape().to_vec(),
                got: local.shape().to_vec(),
            },
        });
    }

    Ok(local)
}

/// Aggregates the last exports of the given sessions.
///
/// # Arguments
/// * `reference` - The current global snapshot.
/// * `sessions` - All the registered sessions.
/// * `contributors` - The ascending indices of the sessions to aggregate.
/// * `coefficients` - The mixing coefficients, parallel to `contributors`.
///
/// # Returns
/// The new global snapshot, or `StateShapeMismatch` if a contributor has no
/// export or an incompatible one.
pub fn aggregate_sessions<L: Learner>(
    reference: &ModelSnapshot,
    sessions: &[ClientSession<L>],
    contributors: &[usize],
    coefficients: &MixingCoefficients,
) -> Result<ModelSnapshot> {
    let contributions = contributors
        .iter()
        .map(|&index| {
            sessions
                .get(index)
                .and_then(ClientSession::exported)
                .map(|snapshot| (index, snapshot))
                .ok_or_else(|| FederationErr::StateShapeMismatch {
                    session: index,
                    key: String::new(),
                    reason: MismatchKind::NoExport,
                })
        })
        .collect::<Result<Vec<_>>>()?;

    debug!(
        "aggregating updated weights of {} clients",
        contributions.len()
    );
    aggregate(reference, &contributions, coefficients)
}

#[cfg(test)]
mod tests {
    use approx::assert_abs_diff_eq;

    use super::*;
    use crate::test::{snapshot, state};

    fn assert_state_eq(got: &GlobalState, expected: &GlobalState) {
        assert!(got.check_compatible(expected).is_ok());
        for (key, tensor) in expected {
            let theirs = got.get(key).unwrap();
            for (a, b) in theirs.iter().zip(tensor) {
                assert_abs_diff_eq!(*a, *b, epsilon = 1e-6);
            }
        }
    }

    #[test]
    fn test_single_contributor_is_reproduced_exactly() {
        let reference = snapshot(&[("w", &[0., 0., 0.]), ("b", &[0.])]);
        let local = snapshot(&[("w", &[0.1, -2.5, 1e-7]), ("b", &[3.25])]);
        let coefficients = MixingCoefficients::from_sample_counts(&[17]).unwrap();

        let result = aggregate(&reference, &[(4, &local)], &coefficients).unwrap();
        assert_eq!(result, local);
    }

    #[test]
    fn test_weighted_average() {
        let reference = snapshot(&[("w", &[0., 0.])]);
        let a = snapshot(&[("w", &[1., 10.])]);
        let b = snapshot(&[("w", &[3., 30.])]);
        let coefficients = MixingCoefficients::from_sample_counts(&[1, 3]).unwrap();

        let result = aggregate(&reference, &[(0, &a), (1, &b)], &coefficients).unwrap();
        assert_state_eq(result.primary(), &state(&[("w", &[2.5, 25.])]));
    }

    #[test]
    fn test_dual_model_uses_same_coefficients() {
        let reference = ModelSnapshot::with_auxiliary(state(&[("w", &[0.])]), state(&[("g", &[0., 0.])]));
        let locals: Vec<_> = [(3., [1., 2.]), (6., [4., 8.]), (9., [7., 14.])]
            .iter()
            .map(|(w, g)| ModelSnapshot::with_auxiliary(state(&[("w", &[*w])]), state(&[("g", g)])))
            .collect();
        let contributions: Vec<_> = locals.iter().enumerate().collect();
        let coefficients = MixingCoefficients::from_sample_counts(&[5, 5, 5]).unwrap();

        let result = aggregate(&reference, &contributions, &coefficients).unwrap();
        assert_state_eq(result.primary(), &state(&[("w", &[6.])]));
        assert_state_eq(result.auxiliary().unwrap(), &state(&[("g", &[4., 8.])]));
    }

    #[test]
    fn test_missing_key_fails() {
        let reference = snapshot(&[("w", &[0.]), ("b", &[0.])]);
        let good = snapshot(&[("w", &[1.]), ("b", &[1.])]);
        let bad = snapshot(&[("w", &[1.])]);
        let coefficients = MixingCoefficients::from_sample_counts(&[1, 1]).unwrap();

        let err = aggregate(&reference, &[(0, &good), (2, &bad)], &coefficients).unwrap_err();
        assert!(matches!(
            err,
            FederationErr::StateShapeMismatch {
                session: 2,
                reason: MismatchKind::MissingKey,
                ..
            }
        ));
    }

    #[test]
    fn test_extra_key_fails() {
        let reference = snapshot(&[("w", &[0.])]);
        let bad = snapshot(&[("w", &[1.]), ("extra", &[1.])]);
        let coefficients = MixingCoefficients::from_sample_counts(&[1]).unwrap();

        let err = aggregate(&reference, &[(0, &bad)], &coefficients).unwrap_err();
        assert!(matches!(
            err,
            FederationErr::StateShapeMismatch {
                reason: MismatchKind::UnexpectedKey,
                ..
            }
        ));
    }

    #[test]
    fn test_shape_mismatch_fails() {
        let reference = snapshot(&[("w", &[0., 0.])]);
        let bad = snapshot(&[("w", &[1., 2., 3.])]);
        let coefficients = MixingCoefficients::from_sample_counts(&[1]).unwrap();

        let err = aggregate(&reference, &[(0, &bad)], &coefficients).unwrap_err();
        assert!(matches!(
            err,
            FederationErr::StateShapeMismatch {
                reason: MismatchKind::Shape { .. },
                ..
            }
        ));
    }

    #[test]
    fn test_coefficient_count_must_match() {
        let reference = snapshot(&[("w", &[0.])]);
        let a = snapshot(&[("w", &[1.])]);
        let coefficients = MixingCoefficients::from_sample_counts(&[1, 1]).unwrap();

        assert!(aggregate(&reference, &[(0, &a)], &coefficients).is_err());
    }

    #[test]
    fn test_aggregation_is_reproducible() {
        let reference = snapshot(&[("w", &[0.; 4])]);
        let locals: Vec<_> = (1..=7)
            .map(|i| {
                let v = i as f32 * 0.1;
                snapshot(&[("w", &[v, v * 3.3, v / 7., -v])])
            })
            .collect();
        let contributions: Vec<_> = locals.iter().enumerate().collect();
        let coefficients =
            MixingCoefficients::from_sample_counts(&[3, 1, 4, 1, 5, 9, 2]).unwrap();

        let first = aggregate(&reference, &contributions, &coefficients).unwrap();
        for _ in 0..10 {
            assert_eq!(aggregate(&reference, &contributions, &coefficients).unwrap(), first);
        }
    }
}
