use std::collections::HashSet;

use serde_json::{Map, Number, Value as Json};

use crate::SubstrateResult;
use crate::view::read_all;

use super::arena::{Arena, ArenaState, CellId, Payload};
use super::value::Value;

impl Arena {
    /// Builds cells from a JSON document. Booleans become the integers 0 and 1.
    pub fn from_json(&self, json: &Json) -> SubstrateResult<Value> {
        match json {
            Json::Null => Ok(self.null()),
            Json::Bool(flag) => self.integer(i64::from(*flag)),
            Json::Number(number) => match number.as_i64() {
                Some(integer) => self.integer(integer),
                None => self.number(number.as_f64().unwrap_or(f64::NAN)),
            },
            Json::String(text) => self.string(text.as_str()),
            Json::Array(items) => {
                let items = items
                    .iter()
                    .map(|item| self.from_json(item))
                    .collect::<SubstrateResult<Vec<_>>>()?;
                self.array(items)
            }
            Json::Object(fields) => {
                let fields = fields
                    .iter()
                    .map(|(name, item)| Ok((name.clone(), self.from_json(item)?)))
                    .collect::<SubstrateResult<Vec<_>>>()?;
                self.object(fields)
            }
        }
    }
}

impl Value {
    /// Renders the cell as JSON.
    ///
    /// Buffers and views become arrays of numbers, `undefined` and non-finite numbers become
    /// `null`, native functions become their signature string and cycles are cut with `null`.
    pub fn to_json(&self) -> Json {
        let state = self.arena().lock();
        render(&state, self.id())
    }
}

/// A container whose children are still being rendered.
enum Frame<'s> {
    Array {
        id: CellId,
        children: std::slice::Iter<'s, CellId>,
        out: Vec<Json>,
    },
    Object {
        id: CellId,
        fields: std::slice::Iter<'s, (String, CellId)>,
        current: Option<&'s str>,
        out: Map<String, Json>,
    },
}

impl<'s> Frame<'s> {
    fn accept(&mut self, json: Json) {
        match self {
            Frame::Array { out, .. } => out.push(json),
            Frame::Object { current, out, .. } => {
                if let Some(name) = current.take() {
                    out.insert(name.to_string(), json);
                }
            }
        }
    }

    fn next_child(&mut self) -> Option<CellId> {
        match self {
            Frame::Array { children, .. } => children.next().copied(),
            Frame::Object {
                fields, current, ..
            } => fields.next().map(|(name, id)| {
                *current = Some(name.as_str());
                *id
            }),
        }
    }

    fn finish(self) -> (CellId, Json) {
        match self {
            Frame::Array { id, out, .. } => (id, Json::Array(out)),
            Frame::Object { id, out, .. } => (id, Json::Object(out)),
        }
    }
}

/// Walks with an explicit stack so nesting depth is limited by the heap, not the native stack.
fn render(state: &ArenaState, root: CellId) -> Json {
    let mut path = HashSet::new();
    let mut stack: Vec<Frame<'_>> = Vec::new();
    let mut value = open(state, root, &mut path, &mut stack);
    loop {
        let Some(frame) = stack.last_mut() else {
            return value.unwrap_or(Json::Null);
        };
        if let Some(json) = value.take() {
            frame.accept(json);
        }
        if let Some(child) = frame.next_child() {
            value = open(state, child, &mut path, &mut stack);
            continue;
        }
        if let Some(frame) = stack.pop() {
            let (id, json) = frame.finish();
            path.remove(&id);
            value = Some(json);
        }
    }
}

/// Renders a leaf, or pushes a frame for a container and returns `None`.
fn open<'s>(
    state: &'s ArenaState,
    id: CellId,
    path: &mut HashSet<CellId>,
    stack: &mut Vec<Frame<'s>>,
) -> Option<Json> {
    match state.payload(id) {
        Payload::Undefined | Payload::Null => Some(Json::Null),
        Payload::Number(value) => Some(Number::from_f64(*value).map_or(Json::Null, Json::Number)),
        Payload::Integer(value) => Some(Json::from(*value)),
        Payload::String(text) => Some(Json::String(text.clone())),
        Payload::ArrayBuffer(backing) => Some(Json::Array(
            backing.bytes().iter().map(|byte| Json::from(*byte)).collect(),
        )),
        Payload::View(header) => Some(match read_all(state, header) {
            Ok(values) => Json::Array(
                values
                    .into_iter()
                    .map(|value| Number::from_f64(value).map_or(Json::Null, Json::Number))
                    .collect(),
            ),
            Err(_) => Json::Null,
        }),
        Payload::NativeFunction(function) => Some(Json::String(function.to_string())),
        Payload::Array(_) | Payload::Object(_) if !path.insert(id) => Some(Json::Null),
        Payload::Array(items) => {
            stack.push(Frame::Array {
                id,
                children: items.iter(),
                out: Vec::with_capacity(items.len()),
            });
            None
        }
        Payload::Object(fields) => {
            stack.push(Frame::Object {
                id,
                fields: fields.iter(),
                current: None,
                out: Map::new(),
            });
            None
        }
    }
}
