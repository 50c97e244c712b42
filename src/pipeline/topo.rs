//! Deterministic Kahn scheduling over produces/consumes edges.

use crate::errors::FlowstateError;
use crate::step::Step;
use crate::variables::key::ErasedKey;
use std::collections::{HashMap, VecDeque};

/// Orders steps so every producer precedes its consumers.
///
/// An edge `A -> B` exists when `A.produces` intersects `B.consumes`.
/// In-degrees are counted per `(consumed key, distinct producer)`
/// pair. Ties break by declaration index; the result is fully
/// deterministic.
///
/// # Errors
///
/// Returns `CyclicPipeline` naming the unscheduled steps when the
/// graph has a cycle.
pub(crate) fn topological_order(
    pipeline_id: &str,
    steps: &[Step],
) -> Result<Vec<usize>, FlowstateError> {
    let mut producers: HashMap<&ErasedKey, Vec<usize>> = HashMap::new();
    for (index, step) in steps.iter().enumerate() {
        for key in step.produces() {
            producers.entry(key).or_default().push(index);
        }
    }

    let mut in_degree = vec![0usize; steps.len()];
    for (index, step) in steps.iter().enumerate() {
        for key in step.consumes() {
            if let Some(sources) = producers.get(key) {
                in_degree[index] += sources.iter().filter(|s| **s != index).count();
            }
        }
    }

    let mut queue: VecDeque<usize> = (0..steps.len()).filter(|i| in_degree[*i] == 0).collect();
    let mut order = Vec::with_capacity(steps.len());

    while let Some(popped) = queue.pop_front() {
        order.push(popped);
        for (index, step) in steps.iter().enumerate() {
            if index == popped || in_degree[index] == 0 {
                continue;
            }
            let released = step
                .consumes()
                .iter()
                .filter(|key| steps[popped].produces().contains(key))
                .count();
            if released > 0 {
                in_degree[index] = in_degree[index].saturating_sub(released);
                if in_degree[index] == 0 {
                    queue.push_back(index);
                }
            }
        }
    }

    if order.len() < steps.len() {
        let remaining: Vec<String> = (0..steps.len())
            .filter(|i| !order.contains(i))
            .map(|i| steps[i].name().to_string())
            .collect();
        return Err(FlowstateError::CyclicPipeline {
            pipeline: pipeline_id.to_string(),
            remaining,
        });
    }

    Ok(order)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::variables::key::Key;
    use crate::variables::set::VariableSet;

    fn step(name: &str, consumes: &[&Key<i64>], produces: &[&Key<i64>]) -> Step {
        let mut builder = Step::builder(name);
        for key in consumes {
            builder = builder.consumes(*key);
        }
        for key in produces {
            builder = builder.produces(*key);
        }
        builder.run(|_| async { Ok(()) })
    }

    fn keys(names: &[&str]) -> Vec<Key<i64>> {
        let mut b = VariableSet::builder("vars");
        let keys = names.iter().map(|n| b.int(n)).collect();
        b.build().unwrap();
        keys
    }

    #[test]
    fn test_linear_chain_order() {
        let k = keys(&["a", "b", "c"]);
        // Declared backwards; order must still follow the data flow.
        let steps = vec![
            step("third", &[&k[1]], &[&k[2]]),
            step("second", &[&k[0]], &[&k[1]]),
            step("first", &[], &[&k[0]]),
        ];

        let order = topological_order("p", &steps).unwrap();
        assert_eq!(order, vec![2, 1, 0]);
    }

    #[test]
    fn test_independent_steps_keep_declaration_order() {
        let k = keys(&["a", "b"]);
        let steps = vec![step("x", &[], &[&k[0]]), step("y", &[], &[&k[1]])];

        let order = topological_order("p", &steps).unwrap();
        assert_eq!(order, vec![0, 1]);
    }

    #[test]
    fn test_diamond_respects_edges() {
        let k = keys(&["root", "left", "right", "sink"]);
        let steps = vec![
            step("join", &[&k[1], &k[2]], &[&k[3]]),
            step("left", &[&k[0]], &[&k[1]]),
            step("right", &[&k[0]], &[&k[2]]),
            step("root", &[], &[&k[0]]),
        ];

        let order = topological_order("p", &steps).unwrap();
        let pos = |name: &str| {
            order
                .iter()
                .position(|i| steps[*i].name() == name)
                .unwrap()
        };

        assert!(pos("root") < pos("left"));
        assert!(pos("root") < pos("right"));
        assert!(pos("left") < pos("join"));
        assert!(pos("right") < pos("join"));
        // Tie between the two branches breaks by declaration index.
        assert!(pos("left") < pos("right"));
    }

    #[test]
    fn test_cycle_detected() {
        let k = keys(&["a", "b"]);
        let steps = vec![
            step("ping", &[&k[1]], &[&k[0]]),
            step("pong", &[&k[0]], &[&k[1]]),
        ];

        let result = topological_order("p", &steps);
        match result {
            Err(FlowstateError::CyclicPipeline { remaining, .. }) => {
                assert_eq!(remaining.len(), 2);
            }
            other => panic!("expected cycle, got {other:?}"),
        }
    }

    #[test]
    fn test_self_production_is_not_an_edge() {
        let k = keys(&["a"]);
        // A step consuming its own produce does not depend on itself.
        let steps = vec![step("fold", &[&k[0]], &[&k[0]])];

        let order = topological_order("p", &steps).unwrap();
        assert_eq!(order, vec![0]);
    }
}
