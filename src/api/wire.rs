//! Wire shapes shared by the protocol adapters and their conversion into the
//! crate's model types.

use serde::{Deserialize, Deserializer};
use serde_json::{Map, Value};
use tracing::debug;

use crate::error::{AlignError, Result};
use crate::model::{
    AlignOptions, CandidateAlignment, CandidateLine, Conflict, ConflictDetail, ConflictKind,
    ProcessingItem,
};

/// Line id lists arrive either as real arrays or as JSON arrays inside a string.
pub(crate) fn line_ids<'de, D>(de: D) -> std::result::Result<Vec<i64>, D::Error>
where
    D: Deserializer<'de>,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum Raw {
        List(Vec<i64>),
        Text(String),
        Missing(()),
    }

    match Raw::deserialize(de)? {
        Raw::List(ids) => Ok(ids),
        Raw::Missing(()) => Ok(Vec::new()),
        Raw::Text(s) if s.trim().is_empty() => Ok(Vec::new()),
        Raw::Text(s) => serde_json::from_str(&s).map_err(serde::de::Error::custom),
    }
}

#[derive(Debug, Deserialize)]
pub(crate) struct WireConflict {
    pub id: i64,
    #[serde(default)]
    pub batch_id: i64,
    #[serde(rename = "type", default)]
    pub type_name: String,
    #[serde(default)]
    pub data: Value,
}

impl From<WireConflict> for Conflict {
    fn from(w: WireConflict) -> Self {
        Conflict {
            id: w.id,
            batch_id: w.batch_id,
            kind: ConflictKind::from_wire(&w.type_name, w.data),
        }
    }
}

impl WireConflict {
    pub fn into_detail(
        self,
        left: Vec<String>,
        right: Vec<String>,
        candidates: Vec<Vec<String>>,
    ) -> ConflictDetail {
        ConflictDetail {
            id: self.id,
            batch_id: self.batch_id,
            kind: ConflictKind::from_wire(&self.type_name, self.data),
            left,
            right,
            candidates: candidates.into_iter().map(CandidateAlignment).collect(),
        }
    }
}

/// Flat processing item (current generation).
#[derive(Debug, Deserialize)]
pub(crate) struct FlatItem {
    pub index_id: i64,
    #[serde(default)]
    pub batch_id: i64,
    #[serde(default)]
    pub batch_index_id: i64,
    #[serde(default)]
    pub text_from: String,
    #[serde(default)]
    pub text_to: String,
    #[serde(default, deserialize_with = "line_ids")]
    pub line_id_from: Vec<i64>,
    #[serde(default, deserialize_with = "line_ids")]
    pub line_id_to: Vec<i64>,
    #[serde(default)]
    pub processing_from_id: i64,
    #[serde(default)]
    pub processing_to_id: i64,
}

impl From<FlatItem> for ProcessingItem {
    fn from(w: FlatItem) -> Self {
        ProcessingItem {
            index_id: w.index_id,
            batch_id: w.batch_id,
            batch_index_id: w.batch_index_id,
            text_from: w.text_from,
            text_to: w.text_to,
            line_ids_from: w.line_id_from,
            line_ids_to: w.line_id_to,
            processing_from_id: w.processing_from_id,
            processing_to_id: w.processing_to_id,
        }
    }
}

/// Processing item with a nested `meta` block (legacy generation).
#[derive(Debug, Deserialize)]
pub(crate) struct NestedItem {
    pub id: i64,
    #[serde(default)]
    pub text_from: String,
    #[serde(default)]
    pub text_to: String,
    #[serde(default)]
    pub meta: NestedMeta,
}

#[derive(Debug, Default, Deserialize)]
pub(crate) struct NestedMeta {
    #[serde(default)]
    pub batch_id: i64,
    #[serde(default)]
    pub batch_index_id: i64,
    #[serde(default, deserialize_with = "line_ids")]
    pub line_ids_from: Vec<i64>,
    #[serde(default, deserialize_with = "line_ids")]
    pub line_ids_to: Vec<i64>,
    #[serde(default)]
    pub processing_from_id: i64,
    #[serde(default)]
    pub processing_to_id: i64,
}

impl From<NestedItem> for ProcessingItem {
    fn from(w: NestedItem) -> Self {
        ProcessingItem {
            index_id: w.id,
            batch_id: w.meta.batch_id,
            batch_index_id: w.meta.batch_index_id,
            text_from: w.text_from,
            text_to: w.text_to,
            line_ids_from: w.meta.line_ids_from,
            line_ids_to: w.meta.line_ids_to,
            processing_from_id: w.meta.processing_from_id,
            processing_to_id: w.meta.processing_to_id,
        }
    }
}

#[derive(Debug, Deserialize)]
pub(crate) struct WireCandidate {
    pub id: i64,
    #[serde(default)]
    pub index_id: Option<i64>,
    #[serde(default)]
    pub text: String,
    #[serde(default)]
    pub proxy: Option<String>,
}

impl From<WireCandidate> for CandidateLine {
    fn from(w: WireCandidate) -> Self {
        CandidateLine {
            id: w.id,
            index_id: w.index_id,
            text: w.text,
            proxy: w.proxy.filter(|p| !p.is_empty()),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AlignOp {
    Start,
    Extend,
}

impl AlignOp {
    pub fn as_str(self) -> &'static str {
        match self {
            AlignOp::Start => "start",
            AlignOp::Extend => "extend",
        }
    }
}

/// Serialize `opts` keeping only `accepted` keys. Returns the body and the names
/// of the set options that were dropped.
pub(crate) fn option_body(
    op: AlignOp,
    opts: &AlignOptions,
    accepted: &[&str],
) -> Result<(Value, Vec<String>)> {
    let value = serde_json::to_value(opts).map_err(|e| AlignError::decode("align options", e))?;
    let Value::Object(all) = value else {
        return Ok((Value::Object(Map::new()), Vec::new()));
    };
    let mut kept = Map::new();
    let mut dropped = Vec::new();
    for (key, v) in all {
        if accepted.contains(&key.as_str()) {
            kept.insert(key, v);
        } else {
            dropped.push(key);
        }
    }
    if !dropped.is_empty() {
        debug!(operation = op.as_str(), ?dropped, "dropping options the server does not accept");
    }
    Ok((Value::Object(kept), dropped))
}

/// Pull a list out of `{key: [...]}` and decode each element.
pub(crate) fn list_field<T, W>(mut body: Value, key: &str, what: &'static str) -> Result<Vec<T>>
where
    W: serde::de::DeserializeOwned + Into<T>,
{
    let items = match body.get_mut(key) {
        Some(v) => v.take(),
        None => Value::Array(Vec::new()),
    };
    let items: Vec<W> = match items {
        Value::Null => Vec::new(),
        other => serde_json::from_value(other).map_err(|e| AlignError::decode(what, e))?,
    };
    Ok(items.into_iter().map(Into::into).collect())
}
