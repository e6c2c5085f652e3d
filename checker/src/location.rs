// Copyright (c) Facebook, Inc. and its affiliates.
//
// This source code is licensed under the MIT license found in the
// LICENSE file in the root directory of this source tree.

use crate::cfa::Cfa;

use itertools::Itertools;
use lazy_static::lazy_static;
use petgraph::graph::NodeIndex;
use std::collections::HashMap;
use std::fmt::{Display, Formatter, Result};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;

/// A program point: a node of the automaton along with the call nodes of the active calls,
/// innermost last.
#[derive(Clone, Debug, Eq, PartialEq, Hash, Ord, PartialOrd)]
pub struct Location {
    pub node: NodeIndex,
    pub call_stack: Vec<NodeIndex>,
}

impl Location {
    pub fn new(node: NodeIndex) -> Location {
        Location {
            node,
            call_stack: vec![],
        }
    }

    pub fn with_call_stack(node: NodeIndex, call_stack: Vec<NodeIndex>) -> Location {
        Location { node, call_stack }
    }

    /// The same call stack at another node.
    pub fn moved_to(&self, node: NodeIndex) -> Location {
        Location {
            node,
            call_stack: self.call_stack.clone(),
        }
    }

    /// The location at the callee node of a call made at the current node.
    pub fn entered(&self, node: NodeIndex) -> Location {
        let mut call_stack = self.call_stack.clone();
        call_stack.push(self.node);
        Location { node, call_stack }
    }

    /// The location at the return node of the innermost call, if there is one.
    pub fn returned(&self, node: NodeIndex) -> Option<Location> {
        let mut call_stack = self.call_stack.clone();
        call_stack.pop()?;
        Some(Location { node, call_stack })
    }

    pub fn innermost_call(&self) -> Option<NodeIndex> {
        self.call_stack.last().copied()
    }

    /// The small integer that identifies this location for the lifetime of the process.
    pub fn id(&self) -> LocationId {
        LocationId::of(self)
    }

    /// A human readable form of the location.
    pub fn describe(&self, cfa: &Cfa) -> String {
        if self.call_stack.is_empty() {
            cfa.label(self.node).to_string()
        } else {
            format!(
                "{} [{}]",
                cfa.label(self.node),
                self.call_stack.iter().map(|n| cfa.label(*n)).join(", ")
            )
        }
    }
}

impl Display for Location {
    fn fmt(&self, f: &mut Formatter<'_>) -> Result {
        write!(f, "N{}", self.node.index())?;
        for call in self.call_stack.iter() {
            write!(f, "/N{}", call.index())?;
        }
        Ok(())
    }
}

/// A stable identifier of a Location within one process. The registry is keyed by node index
/// and call stack only, so locations of different programs analysed in the same process can
/// share an id. Value determination only compares ids of locations of one program.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Hash, Ord, PartialOrd)]
pub struct LocationId(pub usize);

lazy_static! {
    static ref REGISTRY: Mutex<HashMap<Location, usize>> = Mutex::new(HashMap::new());
}

static NEXT_ID: AtomicUsize = AtomicUsize::new(0);

impl LocationId {
    /// Returns the id of the location, allocating one if this is the first request.
    pub fn of(location: &Location) -> LocationId {
        let mut registry = match REGISTRY.lock() {
            Ok(registry) => registry,
            Err(poisoned) => poisoned.into_inner(),
        };
        let id = *registry
            .entry(location.clone())
            .or_insert_with(|| NEXT_ID.fetch_add(1, Ordering::SeqCst));
        LocationId(id)
    }
}

impl Display for LocationId {
    fn fmt(&self, f: &mut Formatter<'_>) -> Result {
        write!(f, "{}", self.0)
    }
}
