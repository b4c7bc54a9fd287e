//! Node-id based progress estimation.
//!
//! The render engine reports which node is executing but not where that node
//! sits in the execution order. The estimate assumes node ids were assigned
//! roughly in creation order and reports `node_id / max_node_id`. Node ids do
//! not have to execute in numeric order, so the estimate can go backwards.

use crate::document::{leading_integer, JobDocument};

/// Reported for node ids that carry no integer.
pub const UNKNOWN_NODE_PERCENT: u8 = 50;

/// Estimate job progress from the node currently executing.
///
/// Returns 0 when no node is given or no document is known, and
/// [`UNKNOWN_NODE_PERCENT`] for node ids without a leading integer.
pub fn estimate_progress(node_id: Option<&str>, document: Option<&JobDocument>) -> u8 {
    let Some(node_id) = node_id.filter(|id| !id.is_empty()) else {
        return 0;
    };
    let Some(document) = document.filter(|doc| !doc.is_empty()) else {
        return 0;
    };
    let Some(node) = leading_integer(node_id) else {
        return UNKNOWN_NODE_PERCENT;
    };

    match document.max_numeric_id() {
        Some(max) if max > 0 => {
            let percent = (node as f64 / max as f64 * 100.0).round();
            percent.clamp(0.0, 100.0) as u8
        }
        _ => 0,
    }
}
