//! Flow validation: run this before building flows.
//!
//! Rules enforced for every flow, without instantiating anything:
//! 1. The root names a Triggerer description.
//! 2. Every other position names a Triggerable description.
//! 3. Every position with targets also names a Triggerer description.
//!
//! Every violation is reported, not just the first one.

use std::collections::VecDeque;

use crate::flow::{FlowForest, FlowNode};
use crate::store::ObjectStore;
use crate::EngineError;

/// Check every flow of `forest` against `store`.
///
/// Returns one [`EngineError::InvalidFlow`] per problem found; an empty
/// list means every flow passed.
pub fn validate_flows(forest: &FlowForest, store: &ObjectStore) -> Vec<EngineError> {
    let mut problems = Vec::new();

    for flow in forest.flows() {
        let root = &flow.root;
        if store.triggerer(&root.name).is_none() {
            let e = if store.triggerable(&root.name).is_some() {
                EngineError::NotATriggerer(root.name.clone())
            } else {
                EngineError::NotFound {
                    name: root.name.clone(),
                    role: "triggerer",
                }
            };
            problems.push(e.in_flow(&flow.name));
        }

        // Breadth-first over the non-root positions.
        let mut queue: VecDeque<&FlowNode> = root.targets.iter().collect();
        while let Some(node) = queue.pop_front() {
            if store.triggerable(&node.name).is_none() {
                problems.push(
                    EngineError::NotFound {
                        name: node.name.clone(),
                        role: "triggerable",
                    }
                    .in_flow(&flow.name),
                );
            }
            if !node.targets.is_empty() && store.triggerer(&node.name).is_none() {
                problems.push(EngineError::NotATriggerer(node.name.clone()).in_flow(&flow.name));
            }
            queue.extend(node.targets.iter());
        }
    }

    problems
}
