//! The record envelope and the `_i` physical-index anchor.
//!
//! A [`Record`] is the unit transported between pipeline nodes: a JSON
//! object carrying business fields plus one framework-owned key, `_i`,
//! the physical index. Operators never see `_i` directly — the node
//! container strips it before invoking the operator ("unboxing") and
//! re-attaches it on write ("boxing").

use serde_json::{Map, Value};

/// The reserved key carrying the physical row index.
pub const INDEX_KEY: &str = "_i";

/// Width of the child-ordinal suffix used when a 1:N operator derives
/// child indices from a parent index (`parent * 10^4 + child`).
pub const CHILD_INDEX_BASE: i64 = 10_000;

/// A boxed record: business fields plus the `_i` anchor.
///
/// Equivalent to a JSON object on the wire (JSONL: one `Record` per line;
/// CSV: one `Record` per row, `_i` as a column).
#[derive(Debug, Clone, PartialEq)]
pub struct Record {
    fields: Map<String, Value>,
}

impl Record {
    /// Build a record from already-boxed fields (must contain `_i`).
    pub fn from_boxed(fields: Map<String, Value>) -> Option<Self> {
        if fields.contains_key(INDEX_KEY) {
            Some(Self { fields })
        } else {
            None
        }
    }

    /// Box a bare business record by attaching the physical index `_i`.
    pub fn boxed(index: i64, mut fields: Map<String, Value>) -> Self {
        fields.insert(INDEX_KEY.to_string(), Value::from(index));
        Self { fields }
    }

    /// The physical index carried by this record.
    ///
    /// # Panics
    /// Panics if `_i` is missing or not an integer; the framework never
    /// constructs a `Record` without a valid index, so this indicates a
    /// logic error upstream (malformed input file, corrupted manifest).
    pub fn index(&self) -> i64 {
        self.fields
            .get(INDEX_KEY)
            .and_then(Value::as_i64)
            .expect("record missing or has non-integer _i")
    }

    /// Strip the envelope, returning only business fields ("unboxing").
    /// The operator never observes `_i`.
    pub fn unbox(self) -> Map<String, Value> {
        let mut fields = self.fields;
        fields.remove(INDEX_KEY);
        fields
    }

    /// The full boxed JSON object, `_i` included.
    pub fn into_boxed(self) -> Map<String, Value> {
        self.fields
    }

    /// Borrow the full boxed JSON object.
    pub fn as_boxed(&self) -> &Map<String, Value> {
        &self.fields
    }

    /// Derive the `_i` for the `child`-th child (0-based) of a 1:N
    /// expansion of the parent at `parent_index`.
    ///
    /// Per spec: `parent_index * 10^4 + child_ordinal`. Callers must keep
    /// `child < CHILD_INDEX_BASE` or fan-out collides across parents.
    pub fn child_index(parent_index: i64, child: usize) -> i64 {
        parent_index * CHILD_INDEX_BASE + child as i64
    }

    /// Box a business record produced as the `child`-th output of a 1:N
    /// operator invocation on the record at `parent_index`.
    pub fn boxed_child(parent_index: i64, child: usize, fields: Map<String, Value>) -> Self {
        Self::boxed(Self::child_index(parent_index, child), fields)
    }
}
