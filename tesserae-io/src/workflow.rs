//! Pure functions for mutating an opaque ComfyUI-style node graph.
//!
//! A workflow is a JSON object mapping node-id strings to node objects with
//! a `class_type` and an `inputs` map. These functions never interpret the
//! graph's meaning beyond locating a handful of well-known node shapes; the
//! graph itself is handed through untouched everywhere else.

use serde_json::{Map, Value};

const SAMPLER_CLASSES: &[&str] = &[
    "KSampler",
    "KSamplerAdvanced",
    "SamplerCustom",
    "BNK_TiledKSampler",
    "BNK_TiledKSamplerAdvanced",
    "UltimateSDUpscale",
    "UltimateSDUpscaleNoUpscale",
];

const SAVE_CLASSES: &[&str] = &["SaveImage", "PreviewImage"];
const LOAD_CLASSES: &[&str] = &["LoadImage"];

const PATH_INPUTS: &[(&str, &str)] = &[
    ("CheckpointLoaderSimple", "ckpt_name"),
    ("CheckpointLoader", "ckpt_name"),
    ("UpscaleModelLoader", "model_name"),
    ("ControlNetLoader", "control_net_name"),
    ("LoraLoader", "lora_name"),
    ("VAELoader", "vae_name"),
];

fn nodes(wf: &Value) -> Option<&Map<String, Value>> {
    wf.as_object()
}

fn class_type(node: &Value) -> Option<&str> {
    node.get("class_type").and_then(Value::as_str)
}

fn title(node: &Value) -> Option<&str> {
    node.get("_meta")?.get("title")?.as_str()
}

/// Returns the ids of every node whose `class_type` is in `classes`.
pub fn nodes_by_class(wf: &Value, classes: &[&str]) -> Vec<String> {
    let Some(map) = nodes(wf) else { return Vec::new() };
    map.iter()
        .filter(|(_, node)| class_type(node).is_some_and(|c| classes.contains(&c)))
        .map(|(id, _)| id.clone())
        .collect()
}

/// Returns, among `within` (or all node ids if `None`), those whose title
/// contains any of `needles` (case-insensitive substring match).
pub fn nodes_by_title(wf: &Value, needles: &[&str], within: Option<&[String]>) -> Vec<String> {
    let Some(map) = nodes(wf) else { return Vec::new() };
    let candidates: Vec<String> = within.map(|s| s.to_vec()).unwrap_or_else(|| map.keys().cloned().collect());
    candidates
        .into_iter()
        .filter(|id| {
            map.get(id)
                .and_then(title)
                .map(|t| {
                    let t = t.to_lowercase();
                    needles.iter().any(|n| t.contains(&n.to_lowercase()))
                })
                .unwrap_or(false)
        })
        .collect()
}

/// Locates the node that should receive the input tile image: a node titled
/// "input"/"tile", else traced back from a VAE-encode node's `pixels`
/// input, else the sole `LoadImage` node.
pub fn find_input_image_id(wf: &Value) -> Option<String> {
    let loaders = nodes_by_class(wf, LOAD_CLASSES);
    if loaders.len() == 1 {
        return loaders.into_iter().next();
    }
    let named = nodes_by_title(wf, &["input", "tile"], Some(&loaders));
    if named.len() == 1 {
        return named.into_iter().next();
    }
    let vae = nodes_by_class(wf, &["VAEEncode", "VAEEncodeTiled"]);
    for id in vae {
        if let Some(src) = trace_input_node(wf, &id, "pixels") {
            return Some(src);
        }
    }
    if named.len() > 1 {
        tracing::warn!("multiple candidate input-image nodes; using the first");
        return named.into_iter().next();
    }
    if loaders.len() > 1 {
        tracing::warn!("multiple LoadImage nodes and none named; giving up");
    }
    None
}

fn trace_input_node(wf: &Value, node_id: &str, input_name: &str) -> Option<String> {
    let map = nodes(wf)?;
    let node = map.get(node_id)?;
    let link = node.get("inputs")?.get(input_name)?;
    link.as_array()?.first()?.as_str().map(str::to_string)
}

/// Sets the located input-image node's `image` field to `name`.
pub fn set_input_image(wf: &mut Value, name: &str) {
    let Some(id) = find_input_image_id(wf) else {
        tracing::warn!("no input image node found; workflow left unchanged");
        return;
    };
    if let Some(inputs) = wf.get_mut(&id).and_then(|n| n.get_mut("inputs")) {
        inputs["image"] = Value::String(name.to_string());
    }
}

/// Positive or negative text-conditioning slot.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PromptKind {
    /// The positive ("what to generate") conditioning text.
    Positive,
    /// The negative ("what to avoid") conditioning text.
    Negative,
}

impl PromptKind {
    fn sentinel(self) -> &'static str {
        match self {
            PromptKind::Positive => "<POSITIVE>",
            PromptKind::Negative => "<NEGATIVE>",
        }
    }

    fn sampler_input(self) -> &'static str {
        match self {
            PromptKind::Positive => "positive",
            PromptKind::Negative => "negative",
        }
    }
}

/// Locates `(node_id, input_name)` owning the positive/negative prompt text:
/// first by a literal `<POSITIVE>`/`<NEGATIVE>` sentinel anywhere in any
/// node's inputs, else by tracing a sampler's conditioning input back to the
/// first node with a `text` input.
pub fn find_prompt_info(wf: &Value, kind: PromptKind) -> Option<(String, String)> {
    let map = nodes(wf)?;
    for (id, node) in map {
        if let Some(inputs) = node.get("inputs").and_then(Value::as_object) {
            for (input_name, value) in inputs {
                if value.as_str() == Some(kind.sentinel()) {
                    return Some((id.clone(), input_name.clone()));
                }
            }
        }
    }

    for sampler_id in nodes_by_class(wf, SAMPLER_CLASSES) {
        if let Some(target) = trace_input_node(wf, &sampler_id, kind.sampler_input()) {
            if let Some(found) = find_text_cond_node(wf, &target) {
                return Some(found);
            }
        }
    }
    None
}

fn find_text_cond_node(wf: &Value, node_id: &str) -> Option<(String, String)> {
    let map = nodes(wf)?;
    let node = map.get(node_id)?;
    let inputs = node.get("inputs")?.as_object()?;
    if inputs.contains_key("text") {
        return Some((node_id.to_string(), "text".to_string()));
    }
    for link_name in ["conditioning", "conditioning_1", "conditioning_2", "conditioning_to", "conditioning_from"] {
        if let Some(next) = trace_input_node(wf, node_id, link_name) {
            if let Some(found) = find_text_cond_node(wf, &next) {
                return Some(found);
            }
        }
    }
    None
}

/// Reads the current positive/negative prompt text, if locatable.
pub fn get_prompt_text(wf: &Value, kind: PromptKind) -> Option<String> {
    let (id, input) = find_prompt_info(wf, kind)?;
    wf.get(&id)?.get("inputs")?.get(&input)?.as_str().map(str::to_string)
}

/// Writes `text` into the positive/negative prompt node.
pub fn set_prompt_text(wf: &mut Value, kind: PromptKind, text: &str) {
    let Some((id, input)) = find_prompt_info(wf, kind) else {
        tracing::warn!(?kind, "no prompt node found; workflow left unchanged");
        return;
    };
    if let Some(inputs) = wf.get_mut(&id).and_then(|n| n.get_mut("inputs")) {
        inputs[input] = Value::String(text.to_string());
    }
}

/// No-op passthrough. The original tool never implements seed incrementing;
/// this signature exists only so call sites have a stable place to hook in
/// real behavior later, should someone decide what it should do.
pub fn increment_seed(wf: Value, _amount: i64) -> Value {
    wf
}

/// Operating system tag of the worker a workflow is about to be sent to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TargetOs {
    /// POSIX-style path separators (`/`).
    Posix,
    /// Windows path separators (`\`).
    Windows,
}

/// Replaces `\` with `/` in every known path-bearing loader input.
/// Idempotent; called once at workflow-load time.
pub fn normalize_workflow_path(wf: &mut Value) {
    rewrite_paths(wf, '\\', '/');
}

/// Formats path separators for `os`. No-op unless `os` is [`TargetOs::Windows`].
pub fn format_workflow_path(wf: &mut Value, os: TargetOs) {
    if os == TargetOs::Windows {
        rewrite_paths(wf, '/', '\\');
    }
}

fn rewrite_paths(wf: &mut Value, from: char, to: char) {
    let Some(map) = wf.as_object_mut() else { return };
    for node in map.values_mut() {
        let Some(class) = node.get("class_type").and_then(Value::as_str).map(str::to_string) else {
            continue;
        };
        let Some((_, field)) = PATH_INPUTS.iter().find(|(c, _)| *c == class) else {
            continue;
        };
        if let Some(value) = node.get_mut("inputs").and_then(|i| i.get_mut(*field)) {
            if let Some(s) = value.as_str() {
                if s.contains('/') && s.contains('\\') {
                    tracing::warn!(node_class = class, "path contains both separators");
                }
                *value = Value::String(s.replace(from, &to.to_string()));
            }
        }
    }
}

/// Locates the output-image node: a save/preview node titled "output", else
/// the sole save/preview node, else the first one found.
pub fn find_output_image_id(wf: &Value) -> Option<String> {
    let saves = nodes_by_class(wf, SAVE_CLASSES);
    if saves.is_empty() {
        tracing::warn!("no SaveImage/PreviewImage node found");
        return None;
    }
    if saves.len() == 1 {
        return saves.into_iter().next();
    }
    let named = nodes_by_title(wf, &["output"], Some(&saves));
    match named.len() {
        0 => {
            tracing::warn!("multiple output nodes, none titled \"output\"; using the first");
            saves.into_iter().next()
        }
        1 => named.into_iter().next(),
        _ => {
            tracing::warn!("multiple output nodes titled \"output\"; using the first");
            named.into_iter().next()
        }
    }
}

/// Strips `name` from every node's top-level attributes (e.g. `is_changed`).
pub fn remove_node_attribute(wf: &mut Value, name: &str) {
    let Some(map) = wf.as_object_mut() else { return };
    let mut removed = 0;
    for node in map.values_mut() {
        if let Some(obj) = node.as_object_mut() {
            if obj.remove(name).is_some() {
                removed += 1;
            }
        }
    }
    if removed > 0 {
        tracing::debug!(count = removed, attribute = name, "removed node attribute");
    }
}

/// Normalizes paths and strips transient attributes from a freshly loaded workflow.
pub fn sanitize_workflow(wf: &mut Value) {
    normalize_workflow_path(wf);
    remove_node_attribute(wf, "is_changed");
}

/// Verifies every node's `class_type` is known to at least one of the given
/// workers' reported node classes. Returns the first unknown class, if any.
pub fn verify_nodes<'a>(wf: &Value, known_classes: impl IntoIterator<Item = &'a str>) -> Result<(), String> {
    let known: std::collections::HashSet<&str> = known_classes.into_iter().collect();
    let Some(map) = nodes(wf) else { return Ok(()) };
    for node in map.values() {
        if let Some(class) = class_type(node) {
            if !known.contains(class) {
                return Err(class.to_string());
            }
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn sample_workflow() -> Value {
        json!({
            "1": {"class_type": "LoadImage", "inputs": {"image": "x.png"}, "_meta": {"title": "input tile"}},
            "2": {"class_type": "CLIPTextEncode", "inputs": {"text": ""}, "_meta": {"title": "positive"}},
            "3": {"class_type": "KSampler", "inputs": {"positive": ["2", 0]}},
            "4": {"class_type": "SaveImage", "inputs": {}, "_meta": {"title": "output"}},
        })
    }

    #[test]
    fn finds_input_image_by_single_loader() {
        let wf = sample_workflow();
        assert_eq!(find_input_image_id(&wf), Some("1".to_string()));
    }

    #[test]
    fn sets_input_image_name() {
        let mut wf = sample_workflow();
        set_input_image(&mut wf, "tesserae-1234.png");
        assert_eq!(wf["1"]["inputs"]["image"], "tesserae-1234.png");
    }

    #[test]
    fn traces_prompt_through_sampler() {
        let wf = sample_workflow();
        let found = find_prompt_info(&wf, PromptKind::Positive);
        assert_eq!(found, Some(("2".to_string(), "text".to_string())));
    }

    #[test]
    fn set_prompt_text_writes_through_trace() {
        let mut wf = sample_workflow();
        set_prompt_text(&mut wf, PromptKind::Positive, "a castle");
        assert_eq!(wf["2"]["inputs"]["text"], "a castle");
    }

    #[test]
    fn finds_output_by_title() {
        let wf = sample_workflow();
        assert_eq!(find_output_image_id(&wf), Some("4".to_string()));
    }

    #[test]
    fn increment_seed_is_a_no_op() {
        let wf = sample_workflow();
        let after = increment_seed(wf.clone(), 1);
        assert_eq!(wf, after);
    }

    #[test]
    fn format_path_only_touches_windows_target() {
        let mut wf = json!({
            "5": {"class_type": "CheckpointLoaderSimple", "inputs": {"ckpt_name": "models/sd15.safetensors"}},
        });
        format_workflow_path(&mut wf, TargetOs::Posix);
        assert_eq!(wf["5"]["inputs"]["ckpt_name"], "models/sd15.safetensors");
        format_workflow_path(&mut wf, TargetOs::Windows);
        assert_eq!(wf["5"]["inputs"]["ckpt_name"], "models\\sd15.safetensors");
    }
}
