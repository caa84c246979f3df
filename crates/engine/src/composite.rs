//! Union and intersection over ascending id sequences
//!
//! - `Any`: min-merge with one pending candidate per source; equal candidates
//!   are emitted once and exhausted sources drop out
//! - `All`: lock-step advance toward the largest candidate, emitting only when
//!   every source sits on the same id; the first exhausted source ends it
//!
//! An empty source list yields nothing in both modes. Sources must be
//! ascending without repeats.

use std::cmp::Reverse;
use std::collections::BinaryHeap;

use tokenscan_core::{EntityId, Result};

use crate::sequence::EntityIdSequence;

/// How a composite combines its sources
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CompositeMode {
    /// Union
    Any,
    /// Intersection
    All,
}

enum CompositeState {
    Any {
        /// Pending candidate of each live source
        heap: BinaryHeap<Reverse<(EntityId, usize)>>,
        primed: bool,
        last: Option<EntityId>,
    },
    All {
        done: bool,
    },
}

/// Lazy union or intersection of id sequences
pub struct CompositeSequence {
    sources: Vec<Box<dyn EntityIdSequence>>,
    state: CompositeState,
    closed: bool,
}

impl CompositeSequence {
    /// Combine `sources` according to `mode`
    pub fn new(mode: CompositeMode, sources: Vec<Box<dyn EntityIdSequence>>) -> Self {
        let state = match mode {
            CompositeMode::Any => CompositeState::Any {
                heap: BinaryHeap::with_capacity(sources.len()),
                primed: false,
                last: None,
            },
            CompositeMode::All => CompositeState::All { done: false },
        };
        CompositeSequence {
            sources,
            state,
            closed: false,
        }
    }

    /// Ids present in any source
    pub fn union(sources: Vec<Box<dyn EntityIdSequence>>) -> Self {
        Self::new(CompositeMode::Any, sources)
    }

    /// Ids present in every source
    pub fn intersection(sources: Vec<Box<dyn EntityIdSequence>>) -> Self {
        Self::new(CompositeMode::All, sources)
    }

    /// Combination mode
    pub fn mode(&self) -> CompositeMode {
        match self.state {
            CompositeState::Any { .. } => CompositeMode::Any,
            CompositeState::All { .. } => CompositeMode::All,
        }
    }
}

fn next_union(
    sources: &mut [Box<dyn EntityIdSequence>],
    heap: &mut BinaryHeap<Reverse<(EntityId, usize)>>,
    primed: &mut bool,
    last: &mut Option<EntityId>,
) -> Result<Option<EntityId>> {
    if !*primed {
        for (index, source) in sources.iter_mut().enumerate() {
            if let Some(id) = source.next_id()? {
                heap.push(Reverse((id, index)));
            }
        }
        *primed = true;
    }

    while let Some(Reverse((id, index))) = heap.pop() {
        if let Some(next) = sources[index].next_id()? {
            heap.push(Reverse((next, index)));
        }
        while let Some(&Reverse((same, other))) = heap.peek() {
            if same != id {
                break;
            }
            heap.pop();
            if let Some(next) = sources[other].next_id()? {
                heap.push(Reverse((next, other)));
            }
        }
        if last.map_or(false, |previous| id <= previous) {
            continue;
        }
        *last = Some(id);
        return Ok(Some(id));
    }
    Ok(None)
}

fn next_intersection(sources: &mut [Box<dyn EntityIdSequence>]) -> Result<Option<EntityId>> {
    let count = sources.len();
    if count == 0 {
        return Ok(None);
    }
    let mut target = match sources[0].next_id()? {
        Some(id) => id,
        None => return Ok(None),
    };

    let mut agreeing = 1;
    let mut index = 1 % count;
    while agreeing < count {
        loop {
            match sources[index].next_id()? {
                None => return Ok(None),
                Some(id) if id < target => continue,
                Some(id) if id == target => {
                    agreeing += 1;
                    break;
                }
                Some(id) => {
                    target = id;
                    agreeing = 1;
                    break;
                }
            }
        }
        index = (index + 1) % count;
    }
    Ok(Some(target))
}

impl EntityIdSequence for CompositeSequence {
    fn next_id(&mut self) -> Result<Option<EntityId>> {
        if self.closed {
            return Ok(None);
        }
        match &mut self.state {
            CompositeState::Any { heap, primed, last } => {
                next_union(&mut self.sources, heap, primed, last)
            }
            CompositeState::All { done } => {
                if *done {
                    return Ok(None);
                }
                let next = next_intersection(&mut self.sources)?;
                if next.is_none() {
                    *done = true;
                }
                Ok(next)
            }
        }
    }

    fn close(&mut self) -> Result<()> {
        if self.closed {
            return Ok(());
        }
        self.closed = true;
        let mut first_error = None;
        for source in &mut self.sources {
            if let Err(e) = source.close() {
                first_error.get_or_insert(e);
            }
        }
        match first_error {
            Some(e) => Err(e),
            None => Ok(()),
        }
    }
}
