//! Parsing of ComfyUI `/history` responses.
//!
//! ```json
//! { "<prompt_id>": { "outputs": { "9": { "images": [
//!     { "filename": "out_00001_.png", "subfolder": "", "type": "output" }
//! ] } } } }
//! ```

use std::cmp::Ordering;

use relay_core::image::ImageRef;
use serde::Deserialize;
use serde_json::{Map, Value};

/// One prompt's entry in the history.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct HistoryEntry {
    #[serde(default)]
    pub outputs: Map<String, Value>,
}

impl HistoryEntry {
    /// Extract the entry for `prompt_id` from a history response.
    ///
    /// Returns `None` when the prompt is absent or its entry is not an
    /// object.
    pub fn from_history(history: &Value, prompt_id: &str) -> Option<Self> {
        let entry = history.get(prompt_id)?;
        serde_json::from_value(entry.clone()).ok()
    }

    /// The first image of every output node that lists images.
    ///
    /// Integer-like node ids come first in ascending order, then the
    /// remaining ids in lexical order. Image records that do not decode are
    /// skipped.
    pub fn first_images(&self) -> Vec<(String, ImageRef)> {
        let mut node_ids: Vec<&String> = self.outputs.keys().collect();
        node_ids.sort_by(|a, b| compare_node_ids(a, b));

        node_ids
            .into_iter()
            .filter_map(|node_id| {
                let images = self.outputs.get(node_id)?.get("images")?.as_array()?;
                let image = images
                    .first()
                    .and_then(|v| serde_json::from_value::<ImageRef>(v.clone()).ok())?;
                Some((node_id.clone(), image))
            })
            .collect()
    }
}

fn compare_node_ids(a: &str, b: &str) -> Ordering {
    match (index_key(a), index_key(b)) {
        (Some(x), Some(y)) => x.cmp(&y),
        (Some(_), None) => Ordering::Less,
        (None, Some(_)) => Ordering::Greater,
        (None, None) => a.cmp(b),
    }
}

/// Canonical non-negative integer ids only: "7" but not "07" or "7a".
fn index_key(id: &str) -> Option<u32> {
    let n: u32 = id.parse().ok()?;
    (n.to_string() == id).then_some(n)
}
