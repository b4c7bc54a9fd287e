//! Job document mutation before submission.
//!
//! Before a document is queued on the render engine the relay:
//!
//! 1. applies per-node user input overrides,
//! 2. replaces every `LoadImage` node with a fresh node pointing at the
//!    uploaded image (with a per-node timestamp so engine-side caching never
//!    serves a stale image),
//! 3. assigns a random seed to every sampler node whose `seed_override`
//!    input is missing or falsy.
//!
//! All functions work on copies; the caller's document is never touched.

use std::collections::BTreeMap;

use rand::Rng;
use serde_json::{json, Map, Value};

use crate::document::{leading_integer, JobDocument, WorkflowNode};
use crate::error::CoreError;
use crate::image::UploadedImage;

/// Image loader node class type.
pub const LOAD_IMAGE_CLASS: &str = "LoadImage";

/// Sampler node class types that receive random seeds.
pub const SAMPLER_CLASSES: [&str; 2] = ["KSampler", "KSamplerAdvanced"];

/// Input that marks a sampler seed as explicitly chosen by the user.
pub const SEED_OVERRIDE_INPUT: &str = "seed_override";

/// Title given to loader nodes that carry none.
pub const DEFAULT_LOAD_IMAGE_TITLE: &str = "Load Image";

/// Random seeds are drawn from `[0, SEED_EXCLUSIVE_MAX)`.
pub const SEED_EXCLUSIVE_MAX: u64 = 4_294_967_295;

/// User overrides: node id -> input name -> value.
pub type UserInputs = BTreeMap<String, Map<String, Value>>;

/// The pre- and post-mutation documents of one execute request.
#[derive(Debug, Clone)]
pub struct PreparedDocument {
    pub source: JobDocument,
    pub submitted: JobDocument,
}

/// Decode a stored document and produce the version to submit.
///
/// User inputs are applied first; the image mutation (loader replacement
/// and seed randomization) runs only when an image is attached.
pub fn prepare_document(
    raw: &Value,
    user_inputs: Option<&UserInputs>,
    image: Option<&UploadedImage>,
) -> Result<PreparedDocument, CoreError> {
    let source = JobDocument::from_value(raw).map_err(|e| CoreError::Mutation(e.to_string()))?;

    let mut submitted = source.clone();
    if let Some(inputs) = user_inputs {
        apply_user_inputs(&mut submitted, inputs);
    }
    if let Some(image) = image {
        submitted = mutate(&submitted, image);
    }

    Ok(PreparedDocument { source, submitted })
}

/// Merge user-supplied input values into matching nodes.
///
/// Node ids absent from the document are ignored. Returns how many nodes
/// were patched.
pub fn apply_user_inputs(document: &mut JobDocument, user_inputs: &UserInputs) -> usize {
    let mut patched = 0;
    for (node_id, inputs) in user_inputs {
        if let Some(node) = document.get_mut(node_id) {
            for (key, value) in inputs {
                node.inputs.insert(key.clone(), value.clone());
            }
            patched += 1;
        }
    }
    patched
}

/// Rewrite a document for the given uploaded image using the current time
/// and the thread-local RNG.
pub fn mutate(document: &JobDocument, image: &UploadedImage) -> JobDocument {
    mutate_with(
        document,
        image,
        chrono::Utc::now().timestamp_millis(),
        &mut rand::rng(),
    )
}

/// Rewrite a document with an explicit base timestamp and RNG.
pub fn mutate_with<R: Rng + ?Sized>(
    document: &JobDocument,
    image: &UploadedImage,
    base_timestamp: i64,
    rng: &mut R,
) -> JobDocument {
    let mut mutated = document.clone();

    for (node_id, node) in mutated.iter_mut() {
        if node.class_type == LOAD_IMAGE_CLASS {
            *node = build_load_image_node(node_id, node, image, base_timestamp);
        } else if SAMPLER_CLASSES.contains(&node.class_type.as_str())
            && !is_truthy(node.inputs.get(SEED_OVERRIDE_INPUT))
        {
            let seed = rng.random_range(0..SEED_EXCLUSIVE_MAX);
            node.inputs.insert("seed".to_string(), json!(seed));
        }
    }

    mutated
}

/// JSON truthiness: absent, `null`, `false`, zero and `""` are false.
fn is_truthy(value: Option<&Value>) -> bool {
    match value {
        None | Some(Value::Null) => false,
        Some(Value::Bool(b)) => *b,
        Some(Value::Number(n)) => n.as_f64().is_some_and(|n| n != 0.0),
        Some(Value::String(s)) => !s.is_empty(),
        Some(Value::Array(_)) | Some(Value::Object(_)) => true,
    }
}

/// Build a replacement loader node. Only the class type and metadata of the
/// original survive.
fn build_load_image_node(
    node_id: &str,
    original: &WorkflowNode,
    image: &UploadedImage,
    base_timestamp: i64,
) -> WorkflowNode {
    let mut meta = original.meta.clone().unwrap_or_default();
    if meta.title.is_none() {
        meta.title = Some(DEFAULT_LOAD_IMAGE_TITLE.to_string());
    }

    let timestamp = match leading_integer(node_id) {
        Some(n) => base_timestamp.saturating_add(n),
        None => base_timestamp,
    };

    let mut inputs = Map::new();
    inputs.insert("image".to_string(), json!(image.filename));
    inputs.insert("upload".to_string(), json!(image.filename));
    if !image.subfolder.is_empty() {
        inputs.insert("subfolder".to_string(), json!(image.subfolder));
    }
    inputs.insert("timestamp".to_string(), json!(timestamp));

    WorkflowNode {
        class_type: original.class_type.clone(),
        meta: Some(meta),
        inputs,
        extra: Map::new(),
    }
}
