use std::collections::HashSet;

use crate::SubstrateResult;

use super::arena::{ArenaState, CellId, Payload};
use super::value::Value;

impl Value {
    /// Number of distinct cells reachable from this one, itself included.
    pub fn cell_count(&self) -> usize {
        let state = self.arena().lock();
        reachable(&state, self.id())
    }

    /// Memory report in the shape scripts expect from `getSizeOf`.
    ///
    /// With `depth == 0` this is the cell count as an Integer. Otherwise it is an array with one
    /// `{ name, size }` object per child of an array or object, where composite children also get
    /// a `more` entry holding the report for `depth - 1` levels. A child that is already being
    /// reported further up (a cycle) gets no `more` entry.
    pub fn size_of(&self, depth: usize) -> SubstrateResult<Value> {
        let arena = self.arena();
        let children = match self.named_children() {
            Some(children) if depth > 0 => children,
            _ => return arena.integer(self.cell_count() as i64),
        };
        let mut on_path = HashSet::from([self.id()]);
        let mut stack = vec![Level::new(self.id(), children, depth)];
        let mut finished: Option<Value> = None;
        while let Some(level) = stack.last_mut() {
            if let Some(more) = finished.take() {
                if let Some(mut entry) = level.open.take() {
                    entry.push(("more".to_string(), more));
                    level.report.push(arena.object(entry)?);
                }
            }
            if let Some((name, child)) = level.children.next() {
                let entry = vec![
                    ("name".to_string(), arena.string(name)?),
                    ("size".to_string(), arena.integer(child.cell_count() as i64)?),
                ];
                let nested = if level.depth > 1 && !on_path.contains(&child.id()) {
                    child.named_children()
                } else {
                    None
                };
                match nested {
                    Some(grandchildren) => {
                        level.open = Some(entry);
                        let next = Level::new(child.id(), grandchildren, level.depth - 1);
                        on_path.insert(child.id());
                        stack.push(next);
                    }
                    None => level.report.push(arena.object(entry)?),
                }
                continue;
            }
            if let Some(level) = stack.pop() {
                on_path.remove(&level.id);
                finished = Some(arena.array(level.report)?);
            }
        }
        Ok(finished.unwrap_or_else(|| arena.undefined()))
    }

    /// Children of an array (named by index) or object; `None` for anything else.
    fn named_children(&self) -> Option<Vec<(String, Value)>> {
        match self.kind() {
            super::CellKind::Array => Some(
                self.elements()
                    .into_iter()
                    .enumerate()
                    .map(|(index, child)| (index.to_string(), child))
                    .collect(),
            ),
            super::CellKind::Object => Some(self.fields()),
            _ => None,
        }
    }
}

/// One container whose report is being assembled.
struct Level {
    id: CellId,
    children: std::vec::IntoIter<(String, Value)>,
    depth: usize,
    report: Vec<Value>,
    /// Entry of the child whose `more` report is being built one level down.
    open: Option<Vec<(String, Value)>>,
}

impl Level {
    fn new(id: CellId, children: Vec<(String, Value)>, depth: usize) -> Self {
        Self {
            id,
            children: children.into_iter(),
            depth,
            report: Vec::new(),
            open: None,
        }
    }
}

fn reachable(state: &ArenaState, root: CellId) -> usize {
    let mut seen = HashSet::new();
    let mut pending = vec![root];
    while let Some(id) = pending.pop() {
        if !seen.insert(id) {
            continue;
        }
        match state.payload(id) {
            Payload::Array(items) => pending.extend(items.iter().copied()),
            Payload::Object(fields) => pending.extend(fields.iter().map(|(_, id)| *id)),
            Payload::View(header) => pending.push(header.buffer),
            Payload::Undefined
            | Payload::Null
            | Payload::Number(_)
            | Payload::Integer(_)
            | Payload::String(_)
            | Payload::ArrayBuffer(_)
            | Payload::NativeFunction(_) => {}
        }
    }
    seen.len()
}
