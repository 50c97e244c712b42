//! Distance-to-terminal simulation.

use crate::errors::FlowstateError;
use crate::step::Step;
use crate::variables::shape::ShapeSpec;
use std::collections::BTreeSet;

/// Counts how many steps must run from a starting key set before some
/// option of the output spec is satisfied.
///
/// Simulates execution without invoking any action: on each round the
/// first step (by declaration order) that has not run, whose consumes
/// are all available, and (when `skip_satisfied`) that still has at
/// least one unavailable produce, runs notionally and contributes its
/// produces.
///
/// # Errors
///
/// Returns `Unreachable` when no runnable step remains and no output
/// option is satisfied.
pub fn count_steps_to_terminal(
    steps: &[Step],
    starting_keys: &BTreeSet<String>,
    output_spec: &ShapeSpec,
    skip_satisfied: bool,
) -> Result<usize, FlowstateError> {
    let mut available = starting_keys.clone();
    let mut executed = vec![false; steps.len()];
    let mut count = 0;

    while !output_spec.is_satisfied(&available) {
        let next = steps.iter().enumerate().position(|(index, step)| {
            if executed[index] {
                return false;
            }
            let runnable = step
                .consumes()
                .iter()
                .all(|key| available.contains(key.name()));
            if !runnable {
                return false;
            }
            !skip_satisfied
                || step
                    .produces()
                    .iter()
                    .any(|key| !available.contains(key.name()))
        });

        match next {
            Some(index) => {
                executed[index] = true;
                for key in steps[index].produces() {
                    available.insert(key.name().to_string());
                }
                count += 1;
            }
            None => return Err(FlowstateError::Unreachable { executed: count }),
        }
    }

    Ok(count)
}
