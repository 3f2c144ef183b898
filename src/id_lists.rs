//! ID list membership and the differential-fetch bookkeeping.
use std::collections::{HashMap, HashSet};

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::{Error, Result};

/// One server-side ID list: hashed member tokens plus the byte offset already folded in.
///
/// `read_bytes` and `ids` stay coupled: a list is only ever advanced by applying the exact
/// bytes between the old and new offsets, and a change of file identity resets both.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct IdList {
    #[serde(default)]
    pub ids: HashSet<String>,
    #[serde(default)]
    pub read_bytes: u64,
    #[serde(default)]
    pub url: String,
    #[serde(rename = "fileID", default)]
    pub file_id: String,
    #[serde(default)]
    pub creation_time: i64,
}

impl IdList {
    /// Fresh, empty list for a lookup entry.
    pub(crate) fn from_entry(entry: &LookupEntry) -> IdList {
        IdList {
            ids: HashSet::new(),
            read_bytes: 0,
            url: entry.url.clone(),
            file_id: entry.file_id.clone(),
            creation_time: entry.creation_time,
        }
    }

    pub fn contains(&self, token: &str) -> bool {
        self.ids.contains(token)
    }
}

/// A validated entry of the ID-list lookup response.
#[derive(Debug, Clone, PartialEq)]
pub(crate) struct LookupEntry {
    pub url: String,
    pub file_id: String,
    pub size: u64,
    pub creation_time: i64,
}

/// Parse the lookup response.
///
/// The payload is loosely typed; entries whose `url` or `fileID` are not strings are dropped
/// rather than failing the sync. A body that is not a JSON object at all is an error.
pub(crate) fn parse_lookup(raw: &str) -> Result<HashMap<String, LookupEntry>> {
    let parsed: HashMap<String, Value> = serde_json::from_str(raw)
        .map_err(|err| Error::InvalidIdListsResponse(err.to_string()))?;

    let mut lookup = HashMap::with_capacity(parsed.len());
    for (name, entry) in parsed {
        let Some(url) = entry.get("url").and_then(Value::as_str) else {
            continue;
        };
        let Some(file_id) = entry.get("fileID").and_then(Value::as_str) else {
            continue;
        };
        let size = entry.get("size").and_then(Value::as_u64).unwrap_or(0);
        let creation_time = entry
            .get("creationTime")
            .and_then(Value::as_i64)
            .unwrap_or(0);
        lookup.insert(
            name,
            LookupEntry {
                url: url.to_string(),
                file_id: file_id.to_string(),
                size,
                creation_time,
            },
        );
    }
    Ok(lookup)
}

/// Fold one ranged response body into the list.
///
/// Lines are `+<hashedID>` to insert and `-<hashedID>` to remove, applied in order. A
/// trailing partial line (no `\n`) is discarded and not counted toward `read_bytes`; it will
/// be re-fetched whole by the next ranged request.
pub(crate) fn apply_chunk(list: &mut IdList, body: &str, content_length: u64) {
    let complete = match body.rfind('\n') {
        Some(position) => &body[..=position],
        None => "",
    };
    let discarded = (body.len() - complete.len()) as u64;

    for line in complete.lines() {
        if line.len() <= 1 {
            continue;
        }
        let (op, id) = line.split_at(1);
        match op {
            "+" => {
                list.ids.insert(id.to_string());
            }
            "-" => {
                list.ids.remove(id);
            }
            _ => {}
        }
    }

    list.read_bytes += content_length.saturating_sub(discarded);
}
