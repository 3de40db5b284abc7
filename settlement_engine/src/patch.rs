//! Ordered, keyed patches over JSON documents.
//!
//! A patch is a list of [`PatchOp`]s applied in order to a document. Paths look like JSON pointers with two
//! extensions: an `@<id>` segment selects the element of an array whose `id` field equals `<id>`, and `-` addresses
//! the end of an array. Keyed segments are resolved when the patch is applied, so a patch computed against one
//! version of a document never silently writes to the wrong array element of another.
//!
//! Patches are all-or-nothing: if any op fails, the document is left untouched.
use std::{fmt::Display, str::FromStr};

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum PatchError {
    #[error("Invalid patch path '{0}'. Paths must start with '/'")]
    InvalidPath(String),
    #[error("Patch ops cannot target the document root")]
    RootTarget,
    #[error("Nothing exists at {0}")]
    PathNotFound(String),
    #[error("No element with id '{id}' in the array at {path}")]
    NoElementWithId { path: String, id: String },
    #[error("Index {index} is out of bounds at {path} (length {len})")]
    IndexOutOfBounds { path: String, index: usize, len: usize },
    #[error("{path} is not an object or array")]
    NotAContainer { path: String },
    #[error("'{segment}' cannot address an element of the {kind} at {path}")]
    WrongSegment { path: String, segment: String, kind: &'static str },
    #[error("The {op} op at {path} needs a value")]
    MissingValue { op: PatchKind, path: String },
}

//--------------------------------------        DocPath        ---------------------------------------------------------
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PathSegment {
    /// An object key
    Key(String),
    /// An array position. On objects this is treated as a key.
    Index(usize),
    /// The array element whose `id` equals this value
    Id(String),
    /// One past the last element of an array
    End,
}

impl Display for PathSegment {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            PathSegment::Key(k) => f.write_str(&k.replace('~', "~0").replace('/', "~1")),
            PathSegment::Index(i) => write!(f, "{i}"),
            PathSegment::Id(id) => write!(f, "@{}", id.replace('~', "~0").replace('/', "~1")),
            PathSegment::End => f.write_str("-"),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct DocPath(Vec<PathSegment>);

impl DocPath {
    pub fn root() -> Self {
        Self::default()
    }

    pub fn key(mut self, key: &str) -> Self {
        self.0.push(PathSegment::Key(key.to_string()));
        self
    }

    pub fn index(mut self, index: usize) -> Self {
        self.0.push(PathSegment::Index(index));
        self
    }

    pub fn id<S: Display>(mut self, id: S) -> Self {
        self.0.push(PathSegment::Id(id.to_string()));
        self
    }

    pub fn end(mut self) -> Self {
        self.0.push(PathSegment::End);
        self
    }

    pub fn segments(&self) -> &[PathSegment] {
        &self.0
    }

    fn split_last(&self) -> Option<(&PathSegment, &[PathSegment])> {
        self.0.split_last()
    }
}

impl Display for DocPath {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        if self.0.is_empty() {
            return f.write_str("/");
        }
        for seg in &self.0 {
            write!(f, "/{seg}")?;
        }
        Ok(())
    }
}

fn unescape(token: &str) -> String {
    token.replace("~1", "/").replace("~0", "~")
}

impl FromStr for DocPath {
    type Err = PatchError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        if s == "/" {
            return Ok(Self::root());
        }
        let rest = s.strip_prefix('/').ok_or_else(|| PatchError::InvalidPath(s.to_string()))?;
        let segments = rest
            .split('/')
            .map(|token| {
                if token == "-" {
                    PathSegment::End
                } else if let Some(id) = token.strip_prefix('@') {
                    PathSegment::Id(unescape(id))
                } else if !token.is_empty() && token.bytes().all(|b| b.is_ascii_digit()) {
                    token.parse().map(PathSegment::Index).unwrap_or_else(|_| PathSegment::Key(token.to_string()))
                } else {
                    PathSegment::Key(unescape(token))
                }
            })
            .collect();
        Ok(Self(segments))
    }
}

impl TryFrom<String> for DocPath {
    type Error = PatchError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<DocPath> for String {
    fn from(path: DocPath) -> Self {
        path.to_string()
    }
}

//--------------------------------------        PatchOp        ---------------------------------------------------------
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PatchKind {
    /// Replace the value at the path, or create it if the parent object lacks the key.
    Set,
    /// Insert into an array at the given position (shifting later elements), or add a key to an object.
    Add,
    /// Delete the value at the path. Removing an absent object key is a no-op.
    Remove,
}

impl Display for PatchKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            PatchKind::Set => f.write_str("set"),
            PatchKind::Add => f.write_str("add"),
            PatchKind::Remove => f.write_str("remove"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PatchOp {
    pub op: PatchKind,
    pub path: DocPath,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub value: Option<Value>,
}

impl PatchOp {
    pub fn set(path: DocPath, value: Value) -> Self {
        Self { op: PatchKind::Set, path, value: Some(value) }
    }

    pub fn add(path: DocPath, value: Value) -> Self {
        Self { op: PatchKind::Add, path, value: Some(value) }
    }

    /// Makes `value` the new head of the head-is-latest array at `path`.
    pub fn prepend(path: DocPath, value: Value) -> Self {
        Self::add(path.index(0), value)
    }

    pub fn remove(path: DocPath) -> Self {
        Self { op: PatchKind::Remove, path, value: None }
    }
}

impl Display for PatchOp {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{} {}", self.op, self.path)
    }
}

//--------------------------------------       Applying        ---------------------------------------------------------
/// Applies `ops` in order. On error, `doc` is unchanged.
pub fn apply_patch(doc: &mut Value, ops: &[PatchOp]) -> Result<(), PatchError> {
    let mut working = doc.clone();
    for op in ops {
        apply_op(&mut working, op)?;
    }
    *doc = working;
    Ok(())
}

fn matches_id(element: &Value, id: &str) -> bool {
    match element.get("id") {
        Some(Value::String(s)) => s == id,
        Some(Value::Number(n)) => n.to_string() == id,
        _ => false,
    }
}

fn position_of_id(arr: &[Value], id: &str, path: &str) -> Result<usize, PatchError> {
    arr.iter()
        .position(|e| matches_id(e, id))
        .ok_or_else(|| PatchError::NoElementWithId { path: path.to_string(), id: id.to_string() })
}

fn kind_of(value: &Value) -> &'static str {
    match value {
        Value::Object(_) => "object",
        Value::Array(_) => "array",
        _ => "scalar",
    }
}

fn shown(segments: &[PathSegment]) -> String {
    DocPath(segments.to_vec()).to_string()
}

fn descend<'a>(value: &'a mut Value, segments: &[PathSegment]) -> Result<&'a mut Value, PatchError> {
    let mut current = value;
    for (depth, seg) in segments.iter().enumerate() {
        let here = &segments[..depth];
        current = match (current, seg) {
            (Value::Object(map), PathSegment::Key(k)) => {
                map.get_mut(k).ok_or_else(|| PatchError::PathNotFound(shown(&segments[..=depth])))?
            },
            (Value::Object(map), PathSegment::Index(i)) => {
                map.get_mut(&i.to_string()).ok_or_else(|| PatchError::PathNotFound(shown(&segments[..=depth])))?
            },
            (Value::Array(arr), PathSegment::Index(i)) => {
                let len = arr.len();
                arr.get_mut(*i).ok_or_else(|| PatchError::IndexOutOfBounds { path: shown(here), index: *i, len })?
            },
            (Value::Array(arr), PathSegment::Id(id)) => {
                let pos = position_of_id(arr, id, &shown(here))?;
                &mut arr[pos]
            },
            (other, seg) => {
                return Err(PatchError::WrongSegment {
                    path: shown(here),
                    segment: seg.to_string(),
                    kind: kind_of(other),
                })
            },
        };
    }
    Ok(current)
}

/// Creates an empty array at `array_path` if its parent object lacks the key, or holds `null` there.
fn create_missing_array(doc: &mut Value, array_path: &[PathSegment]) -> Result<(), PatchError> {
    let Some((PathSegment::Key(key), parent_path)) = array_path.split_last() else { return Ok(()) };
    if let Value::Object(map) = descend(doc, parent_path)? {
        if matches!(map.get(key), None | Some(Value::Null)) {
            map.insert(key.clone(), Value::Array(vec![]));
        }
    }
    Ok(())
}

fn apply_op(doc: &mut Value, op: &PatchOp) -> Result<(), PatchError> {
    let (last, parent_path) = op.path.split_last().ok_or(PatchError::RootTarget)?;
    let path = op.path.to_string();
    // Logs that were never written are absent from the document. Adding at their head or tail starts them.
    if op.op == PatchKind::Add && matches!(last, PathSegment::Index(0) | PathSegment::End) {
        create_missing_array(doc, parent_path)?;
    }
    let parent = descend(doc, parent_path)?;
    let value = || op.value.clone().ok_or_else(|| PatchError::MissingValue { op: op.op, path: path.clone() });
    match parent {
        Value::Object(map) => apply_to_object(map, op.op, last, value, &path),
        Value::Array(arr) => apply_to_array(arr, op.op, last, value, &path),
        _ => Err(PatchError::NotAContainer { path: shown(parent_path) }),
    }
}

fn apply_to_object<F>(
    map: &mut Map<String, Value>,
    kind: PatchKind,
    last: &PathSegment,
    value: F,
    path: &str,
) -> Result<(), PatchError>
where
    F: Fn() -> Result<Value, PatchError>,
{
    let key = match last {
        PathSegment::Key(k) => k.clone(),
        PathSegment::Index(i) => i.to_string(),
        seg => {
            return Err(PatchError::WrongSegment { path: path.to_string(), segment: seg.to_string(), kind: "object" })
        },
    };
    match kind {
        PatchKind::Set | PatchKind::Add => {
            map.insert(key, value()?);
        },
        PatchKind::Remove => {
            map.remove(&key);
        },
    }
    Ok(())
}

fn apply_to_array<F>(
    arr: &mut Vec<Value>,
    kind: PatchKind,
    last: &PathSegment,
    value: F,
    path: &str,
) -> Result<(), PatchError>
where
    F: Fn() -> Result<Value, PatchError>,
{
    let len = arr.len();
    let out_of_bounds = |index: usize| PatchError::IndexOutOfBounds { path: path.to_string(), index, len };
    match (kind, last) {
        (PatchKind::Set | PatchKind::Add, PathSegment::End) => arr.push(value()?),
        (PatchKind::Add, PathSegment::Index(i)) => {
            if *i > len {
                return Err(out_of_bounds(*i));
            }
            arr.insert(*i, value()?);
        },
        (PatchKind::Set, PathSegment::Index(i)) => {
            let slot = arr.get_mut(*i).ok_or_else(|| out_of_bounds(*i))?;
            *slot = value()?;
        },
        (PatchKind::Set | PatchKind::Add, PathSegment::Id(id)) => {
            let pos = position_of_id(arr, id, path)?;
            arr[pos] = value()?;
        },
        (PatchKind::Remove, PathSegment::Index(i)) => {
            if *i >= len {
                return Err(out_of_bounds(*i));
            }
            arr.remove(*i);
        },
        (PatchKind::Remove, PathSegment::Id(id)) => {
            let pos = position_of_id(arr, id, path)?;
            arr.remove(pos);
        },
        (_, seg) => {
            return Err(PatchError::WrongSegment { path: path.to_string(), segment: seg.to_string(), kind: "array" })
        },
    }
    Ok(())
}
