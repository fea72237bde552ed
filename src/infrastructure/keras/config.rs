//! Parsing of the `model_config` JSON stored in Keras HDF5 files

use std::collections::{HashMap, HashSet};

use serde_json::Value;

use super::error::KerasError;

const INPUT_LAYER: &str = "InputLayer";
const MODEL_CLASSES: &[&str] = &["Sequential", "Functional", "Model"];

/// How the previous tensor is handed to a layer
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InputMode {
    Single,
    /// Wrapped in a one-element list, as some saved graphs call layers
    Collection,
}

/// One layer entry of the model config
#[derive(Debug, Clone)]
pub struct LayerSpec {
    pub class_name: String,
    pub name: String,
    pub config: Value,
    pub input_mode: InputMode,
    /// Major version of the Keras that wrote the file
    pub keras_major: u8,
}

/// A model reduced to a chain of layers
#[derive(Debug, Clone)]
pub struct ModelSpec {
    pub class_name: String,
    pub name: String,
    /// Declared input shape including the batch axis
    pub input_shape: Option<Vec<Option<usize>>>,
    pub layers: Vec<LayerSpec>,
}

impl ModelSpec {
    pub fn parse(json: &str, keras_major: u8) -> Result<Self, KerasError> {
        let root: Value = serde_json::from_str(json)?;
        let class_name = root
            .get("class_name")
            .and_then(Value::as_str)
            .ok_or_else(|| KerasError::config("model config has no class_name"))?;
        let config = root
            .get("config")
            .ok_or_else(|| KerasError::config("model config has no config section"))?;

        match class_name {
            "Sequential" => parse_sequential(config, keras_major),
            "Functional" | "Model" => parse_functional(class_name, config, keras_major),
            other => Err(KerasError::unsupported(format!("model class '{}'", other))),
        }
    }
}

fn parse_sequential(config: &Value, keras_major: u8) -> Result<ModelSpec, KerasError> {
    // Keras < 2.2.3 stored the layer list directly
    let (name, layers) = match config {
        Value::Array(layers) => ("sequential".to_string(), layers),
        Value::Object(map) => {
            let layers = map
                .get("layers")
                .and_then(Value::as_array)
                .ok_or_else(|| KerasError::config("Sequential config has no layer list"))?;
            (model_name(config, "sequential"), layers)
        }
        _ => return Err(KerasError::config("Sequential config is neither a list nor an object")),
    };

    let mut input_shape = None;
    let mut specs = Vec::with_capacity(layers.len());

    for raw in layers {
        let (class_name, layer_name, layer_config) = layer_header(raw)?;

        if input_shape.is_none() {
            input_shape = declared_batch_shape(layer_config)?;
        }

        if class_name == INPUT_LAYER {
            continue;
        }

        specs.push(LayerSpec {
            class_name,
            name: layer_name,
            config: layer_config.clone(),
            input_mode: InputMode::Single,
            keras_major,
        });
    }

    if input_shape.is_none() {
        if let Some(shape) = config.get("build_input_shape") {
            input_shape = parse_shape(shape)?;
        }
    }

    Ok(ModelSpec {
        class_name: "Sequential".to_string(),
        name,
        input_shape,
        layers: specs,
    })
}

fn parse_functional(
    class_name: &str,
    config: &Value,
    keras_major: u8,
) -> Result<ModelSpec, KerasError> {
    let layers = config
        .get("layers")
        .and_then(Value::as_array)
        .ok_or_else(|| KerasError::config("model config has no layer list"))?;

    let mut by_name: HashMap<String, &Value> = HashMap::with_capacity(layers.len());
    for raw in layers {
        let (_, name, _) = layer_header(raw)?;
        let name = raw
            .get("name")
            .and_then(Value::as_str)
            .map(str::to_string)
            .unwrap_or(name);
        by_name.insert(name, raw);
    }

    let input = single_endpoint(config.get("input_layers"), "input")?;
    let output = single_endpoint(config.get("output_layers"), "output")?;

    let mut chain = Vec::new();
    let mut visited = HashSet::new();
    let mut current = output;
    let input_shape;

    loop {
        if !visited.insert(current.clone()) {
            return Err(KerasError::config(format!("cycle at layer '{}'", current)));
        }

        let raw = by_name
            .get(&current)
            .ok_or_else(|| KerasError::config(format!("unknown layer '{}' in graph", current)))?;
        let (class_name, name, layer_config) = layer_header(raw)?;

        if class_name == INPUT_LAYER {
            if name != input && current != input {
                return Err(KerasError::unsupported(format!(
                    "graph reaches input '{}' instead of '{}'",
                    current, input
                )));
            }
            input_shape = declared_batch_shape(layer_config)?;
            break;
        }

        let (parent, input_mode) = inbound(raw, &current)?;
        chain.push(LayerSpec {
            class_name,
            name,
            config: layer_config.clone(),
            input_mode,
            keras_major,
        });
        current = parent;
    }

    chain.reverse();

    Ok(ModelSpec {
        class_name: class_name.to_string(),
        name: model_name(config, "model"),
        input_shape,
        layers: chain,
    })
}

/// `(class_name, name, config)` of a layer entry
fn layer_header(raw: &Value) -> Result<(String, String, &Value), KerasError> {
    let class_name = raw
        .get("class_name")
        .and_then(Value::as_str)
        .ok_or_else(|| KerasError::config("layer entry has no class_name"))?;
    let config = raw
        .get("config")
        .ok_or_else(|| KerasError::config(format!("{} layer has no config", class_name)))?;
    let name = config
        .get("name")
        .or_else(|| raw.get("name"))
        .and_then(Value::as_str)
        .unwrap_or(class_name)
        .to_string();

    if MODEL_CLASSES.contains(&class_name) {
        return Err(KerasError::unsupported(format!(
            "nested model '{}' ({})",
            name, class_name
        )));
    }

    Ok((class_name.to_string(), name, config))
}

fn model_name(config: &Value, default: &str) -> String {
    config
        .get("name")
        .and_then(Value::as_str)
        .unwrap_or(default)
        .to_string()
}

fn declared_batch_shape(config: &Value) -> Result<Option<Vec<Option<usize>>>, KerasError> {
    match config
        .get("batch_input_shape")
        .or_else(|| config.get("batch_shape"))
    {
        Some(shape) => parse_shape(shape),
        None => Ok(None),
    }
}

fn parse_shape(value: &Value) -> Result<Option<Vec<Option<usize>>>, KerasError> {
    let Some(dims) = value.as_array() else {
        return Ok(None);
    };

    dims.iter()
        .map(|dim| match dim {
            Value::Null => Ok(None),
            other => other
                .as_u64()
                .map(|d| Some(d as usize))
                .ok_or_else(|| KerasError::config(format!("invalid dimension {}", other))),
        })
        .collect::<Result<Vec<_>, _>>()
        .map(Some)
}

/// Layer name of the only model input or output
fn single_endpoint(value: Option<&Value>, what: &str) -> Result<String, KerasError> {
    let entries = value
        .and_then(Value::as_array)
        .ok_or_else(|| KerasError::config(format!("model has no {} layers", what)))?;

    // Keras 3 writes a single endpoint as a flat ["name", 0, 0]
    if let Some(name) = entries.first().and_then(Value::as_str) {
        return Ok(name.to_string());
    }

    match entries.as_slice() {
        [endpoint] => endpoint
            .get(0)
            .and_then(Value::as_str)
            .map(str::to_string)
            .ok_or_else(|| KerasError::config(format!("malformed {} layer entry", what))),
        _ => Err(KerasError::unsupported(format!(
            "models with {} {} layers",
            entries.len(),
            what
        ))),
    }
}

/// Parent layer name and input mode of a chain layer
fn inbound(raw: &Value, layer: &str) -> Result<(String, InputMode), KerasError> {
    let nodes = raw
        .get("inbound_nodes")
        .and_then(Value::as_array)
        .ok_or_else(|| KerasError::config(format!("layer '{}' has no inbound nodes", layer)))?;

    let node = match nodes.as_slice() {
        [node] => node,
        [] => {
            return Err(KerasError::config(format!(
                "layer '{}' is not connected",
                layer
            )))
        }
        _ => {
            return Err(KerasError::unsupported(format!(
                "layer '{}' is shared between several calls",
                layer
            )))
        }
    };

    match node {
        // Keras 2: [["parent", node_index, tensor_index, {kwargs}], ...]
        Value::Array(tensors) => match tensors.as_slice() {
            [tensor] => {
                let parent = tensor
                    .get(0)
                    .and_then(Value::as_str)
                    .ok_or_else(|| KerasError::config(format!("bad inbound node on '{}'", layer)))?;
                Ok((parent.to_string(), InputMode::Single))
            }
            _ => Err(multiple_inputs(layer)),
        },
        // Keras 3: {"args": [tensor | [tensor, ...]], "kwargs": {...}}
        Value::Object(_) => {
            let args = node
                .get("args")
                .and_then(Value::as_array)
                .ok_or_else(|| KerasError::config(format!("bad inbound node on '{}'", layer)))?;

            match args.as_slice() {
                [Value::Array(list)] => match list.as_slice() {
                    [tensor] => Ok((keras_history(tensor, layer)?, InputMode::Collection)),
                    _ => Err(multiple_inputs(layer)),
                },
                [tensor] => Ok((keras_history(tensor, layer)?, InputMode::Single)),
                _ => Err(multiple_inputs(layer)),
            }
        }
        _ => Err(KerasError::config(format!("bad inbound node on '{}'", layer))),
    }
}

fn keras_history(tensor: &Value, layer: &str) -> Result<String, KerasError> {
    tensor
        .get("config")
        .and_then(|c| c.get("keras_history"))
        .and_then(|h| h.get(0))
        .and_then(Value::as_str)
        .map(str::to_string)
        .ok_or_else(|| KerasError::config(format!("bad input tensor on '{}'", layer)))
}

fn multiple_inputs(layer: &str) -> KerasError {
    KerasError::unsupported(format!(
        "layer '{}' takes several inputs; only single-chain graphs are supported",
        layer
    ))
}

impl LayerSpec {
    fn field(&self, key: &str) -> Option<&Value> {
        self.config.get(key).filter(|v| !v.is_null())
    }

    fn invalid(&self, key: &str, expected: &str) -> KerasError {
        KerasError::layer(&self.name, format!("config '{}' must be {}", key, expected))
    }

    pub fn usize(&self, key: &str) -> Result<usize, KerasError> {
        self.field(key)
            .and_then(Value::as_u64)
            .map(|v| v as usize)
            .ok_or_else(|| self.invalid(key, "a non-negative integer"))
    }

    pub fn bool_or(&self, key: &str, default: bool) -> Result<bool, KerasError> {
        match self.field(key) {
            None => Ok(default),
            Some(v) => v.as_bool().ok_or_else(|| self.invalid(key, "a boolean")),
        }
    }

    pub fn f32_or(&self, key: &str, default: f32) -> Result<f32, KerasError> {
        match self.field(key) {
            None => Ok(default),
            Some(v) => v
                .as_f64()
                .map(|v| v as f32)
                .ok_or_else(|| self.invalid(key, "a number")),
        }
    }

    pub fn opt_f32(&self, key: &str) -> Result<Option<f32>, KerasError> {
        match self.field(key) {
            None => Ok(None),
            Some(v) => v
                .as_f64()
                .map(|v| Some(v as f32))
                .ok_or_else(|| self.invalid(key, "a number")),
        }
    }

    pub fn str_or<'a>(&'a self, key: &str, default: &'a str) -> Result<&'a str, KerasError> {
        match self.field(key) {
            None => Ok(default),
            Some(v) => v.as_str().ok_or_else(|| self.invalid(key, "a string")),
        }
    }

    /// A 2D window parameter given as `n` or `[h, w]`
    pub fn pair(&self, key: &str) -> Result<(usize, usize), KerasError> {
        self.opt_pair(key)?
            .ok_or_else(|| self.invalid(key, "an integer or a pair of integers"))
    }

    pub fn opt_pair(&self, key: &str) -> Result<Option<(usize, usize)>, KerasError> {
        let Some(value) = self.field(key) else {
            return Ok(None);
        };

        let parsed = match value {
            Value::Number(n) => n.as_u64().map(|n| (n as usize, n as usize)),
            Value::Array(items) => match items.as_slice() {
                [h, w] => h.as_u64().zip(w.as_u64()).map(|(h, w)| (h as usize, w as usize)),
                _ => None,
            },
            _ => None,
        };

        parsed
            .map(Some)
            .ok_or_else(|| self.invalid(key, "an integer or a pair of integers"))
    }

    /// Activation name, accepting Keras 3 serialized function objects
    pub fn activation(&self, key: &str) -> Result<String, KerasError> {
        match self.field(key) {
            None => Ok("linear".to_string()),
            Some(Value::String(name)) => Ok(name.clone()),
            Some(object @ Value::Object(_)) => object
                .get("config")
                .and_then(Value::as_str)
                .or_else(|| {
                    object
                        .get("config")
                        .and_then(|c| c.get("name"))
                        .and_then(Value::as_str)
                })
                .or_else(|| object.get("class_name").and_then(Value::as_str))
                .map(str::to_string)
                .ok_or_else(|| self.invalid(key, "an activation name")),
            Some(_) => Err(self.invalid(key, "an activation name")),
        }
    }

    pub fn require_channels_last(&self) -> Result<(), KerasError> {
        match self.str_or("data_format", "channels_last")? {
            "channels_last" => Ok(()),
            other => Err(KerasError::layer(
                &self.name,
                format!("data_format '{}' is not supported, use channels_last", other),
            )),
        }
    }
}
