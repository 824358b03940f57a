//! Dependency graph over triggerables.
//!
//! An edge `A -> B` means B reads something A writes: A's target
//! intersects one of B's triggers (or, for a relevance condition, contains
//! it). The graph must be acyclic; its topological order is computed once
//! and drives every recalculation sweep.

use std::collections::{BTreeSet, VecDeque};
use std::fmt;

use formdag_core::TreeReference;

use crate::registry::TriggerableRegistry;
use crate::triggerable::TriggerableId;

/// One triggerable taking part in a cycle.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CycleMember {
    pub id: TriggerableId,
    pub kind: &'static str,
    pub target: TreeReference,
}

impl fmt::Display for CycleMember {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {} {}", self.id, self.kind, self.target)
    }
}

/// The triggerables of a dependency cycle, in path order: each member
/// feeds the next and the last feeds the first.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("dependency cycle: {}", render_cycle(.members))]
pub struct CycleError {
    pub members: Vec<CycleMember>,
}

fn render_cycle(members: &[CycleMember]) -> String {
    let mut parts: Vec<String> = members.iter().map(ToString::to_string).collect();
    if let Some(first) = members.first() {
        parts.push(first.id.to_string());
    }
    parts.join(" -> ")
}

#[derive(Clone, Copy, PartialEq, Eq)]
enum Mark {
    Unvisited,
    OnStack,
    Done,
}

/// Edges, cached topological order, and the current concrete targets of
/// every triggerable.
#[derive(Debug, Clone, Default)]
pub struct DependencyGraph {
    successors: Vec<Vec<TriggerableId>>,
    order: Vec<TriggerableId>,
    rank: Vec<usize>,
    concrete_targets: Vec<Vec<TreeReference>>,
}

impl DependencyGraph {
    /// Build the graph for every triggerable in `registry`.
    ///
    /// A value writer that reads its own target is a cycle of one.
    pub fn build(registry: &TriggerableRegistry) -> Result<Self, CycleError> {
        let n = registry.len();
        let mut successors = vec![Vec::new(); n];
        for (a, from) in registry.all() {
            for (b, to) in registry.all() {
                if a == b && !from.kind().writes_value() {
                    continue;
                }
                if to.triggers().iter().any(|trigger| from.feeds(trigger)) {
                    successors[a.0].push(b);
                }
            }
        }

        let order = topological_order(&successors).map_err(|path| CycleError {
            members: path
                .into_iter()
                .filter_map(|id| {
                    registry.get(id).map(|t| CycleMember {
                        id,
                        kind: t.kind().label(),
                        target: t.target().clone(),
                    })
                })
                .collect(),
        })?;

        let mut rank = vec![0; n];
        for (position, id) in order.iter().enumerate() {
            rank[id.0] = position;
        }

        Ok(Self {
            successors,
            order,
            rank,
            concrete_targets: vec![Vec::new(); n],
        })
    }

    /// Every triggerable, dependencies first.
    pub fn order(&self) -> &[TriggerableId] {
        &self.order
    }

    pub fn successors(&self, id: TriggerableId) -> &[TriggerableId] {
        self.successors.get(id.0).map(Vec::as_slice).unwrap_or(&[])
    }

    /// Position of `id` in [`order`](Self::order).
    pub fn rank(&self, id: TriggerableId) -> Option<usize> {
        self.rank.get(id.0).copied()
    }

    pub fn len(&self) -> usize {
        self.order.len()
    }

    pub fn is_empty(&self) -> bool {
        self.order.is_empty()
    }

    pub fn edge_count(&self) -> usize {
        self.successors.iter().map(Vec::len).sum()
    }

    /// The seeds and everything reachable from them, in topological order.
    pub fn affected_by(&self, seeds: impl IntoIterator<Item = TriggerableId>) -> Vec<TriggerableId> {
        let mut reached = BTreeSet::new();
        let mut queue: VecDeque<TriggerableId> = seeds.into_iter().collect();
        while let Some(id) = queue.pop_front() {
            if reached.insert(id) {
                queue.extend(self.successors(id).iter().copied());
            }
        }
        let mut affected: Vec<TriggerableId> = reached.into_iter().collect();
        affected.sort_by_key(|id| self.rank(*id).unwrap_or(usize::MAX));
        affected
    }

    /// Concrete nodes `id` acted on as of the last refresh.
    pub fn concrete_targets(&self, id: TriggerableId) -> &[TreeReference] {
        self.concrete_targets
            .get(id.0)
            .map(Vec::as_slice)
            .unwrap_or(&[])
    }

    pub fn set_concrete_targets(&mut self, id: TriggerableId, targets: Vec<TreeReference>) {
        if let Some(slot) = self.concrete_targets.get_mut(id.0) {
            *slot = targets;
        }
    }
}

/// Depth-first topological sort. Independent triggerables keep their
/// registration order. On a cycle, returns the path from the first
/// revisited node back to itself.
///
/// The walk keeps its own stack of `(node, successors visited)` frames, so
/// chain length is bounded by memory rather than the thread's stack.
fn topological_order(
    successors: &[Vec<TriggerableId>],
) -> Result<Vec<TriggerableId>, Vec<TriggerableId>> {
    let mut marks = vec![Mark::Unvisited; successors.len()];
    let mut finished = Vec::with_capacity(successors.len());
    let mut frames: Vec<(TriggerableId, usize)> = Vec::new();

    for root in (0..successors.len()).rev() {
        if marks[root] != Mark::Unvisited {
            continue;
        }
        marks[root] = Mark::OnStack;
        frames.push((TriggerableId(root), 0));

        while let Some(frame) = frames.last_mut() {
            let (id, visited) = *frame;
            let edges = &successors[id.0];
            if visited == edges.len() {
                frames.pop();
                marks[id.0] = Mark::Done;
                finished.push(id);
                continue;
            }
            frame.1 += 1;

            // Successors are walked last to first.
            let next = edges[edges.len() - 1 - visited];
            match marks[next.0] {
                Mark::Done => {}
                Mark::OnStack => {
                    let start = frames.iter().position(|(f, _)| *f == next).unwrap_or(0);
                    return Err(frames[start..].iter().map(|(f, _)| *f).collect());
                }
                Mark::Unvisited => {
                    marks[next.0] = Mark::OnStack;
                    frames.push((next, 0));
                }
            }
        }
    }
    finished.reverse();
    Ok(finished)
}
