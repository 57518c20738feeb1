//! Network weights: named f32 tensors, safetensors I/O, partial loading.

use std::collections::{BTreeMap, HashMap};
use std::path::Path;

use safetensors::SafeTensors;
use safetensors::tensor::{Dtype, TensorView};
use serde::{Deserialize, Serialize};

use crate::error::{MtlError, Result};

/// A dense f32 parameter tensor.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Tensor {
    pub shape: Vec<usize>,
    pub data: Vec<f32>,
}

impl Tensor {
    pub fn new(shape: Vec<usize>, data: Vec<f32>) -> Result<Self> {
        let expected: usize = shape.iter().product();
        if expected != data.len() {
            return Err(MtlError::weights(format!(
                "shape {shape:?} needs {expected} values, got {}",
                data.len()
            )));
        }
        Ok(Self { shape, data })
    }

    pub fn zeros(shape: Vec<usize>) -> Self {
        let len = shape.iter().product();
        Self {
            shape,
            data: vec![0.0; len],
        }
    }

    pub fn numel(&self) -> usize {
        self.data.len()
    }

    pub fn l2_norm(&self) -> f64 {
        self.data
            .iter()
            .map(|v| f64::from(*v) * f64::from(*v))
            .sum::<f64>()
            .sqrt()
    }
}

/// Parameter name -> tensor. Ordered so serialized files are stable.
pub type StateDict = BTreeMap<String, Tensor>;

/// Outcome of applying a state mapping to a module.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct LoadReport {
    pub loaded: Vec<String>,
    /// Module parameters the file did not provide.
    pub missing_keys: Vec<String>,
    /// File entries the module does not have.
    pub unexpected_keys: Vec<String>,
    /// Keys present on both sides with different shapes; skipped.
    pub mismatched_keys: Vec<String>,
}

impl LoadReport {
    pub fn is_complete(&self) -> bool {
        self.missing_keys.is_empty()
            && self.unexpected_keys.is_empty()
            && self.mismatched_keys.is_empty()
    }
}

/// A module whose parameters can be exported and (partially) restored.
pub trait LoadStateDict {
    fn state_dict(&self) -> StateDict;

    /// With `strict == false`, missing, unexpected and shape-mismatched keys
    /// are tolerated and reported; only matching entries are copied.
    fn load_state_dict(&mut self, state: &StateDict, strict: bool) -> Result<LoadReport>;
}

/// Copy every matching entry of `source` into `target`.
pub fn apply_state(target: &mut StateDict, source: &StateDict, strict: bool) -> Result<LoadReport> {
    let mut report = LoadReport::default();

    for (key, current) in target.iter() {
        match source.get(key) {
            None => report.missing_keys.push(key.clone()),
            Some(incoming) if incoming.shape != current.shape => {
                report.mismatched_keys.push(key.clone())
            }
            Some(_) => report.loaded.push(key.clone()),
        }
    }
    report.unexpected_keys = source
        .keys()
        .filter(|k| !target.contains_key(*k))
        .cloned()
        .collect();

    if strict && !report.is_complete() {
        return Err(MtlError::weights(format!(
            "strict load failed: missing {:?}, unexpected {:?}, mismatched {:?}",
            report.missing_keys, report.unexpected_keys, report.mismatched_keys
        )));
    }

    for key in &report.loaded {
        if let (Some(dst), Some(src)) = (target.get_mut(key), source.get(key)) {
            dst.data.clone_from(&src.data);
        }
    }
    Ok(report)
}

/// A plain named-parameter module.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ParamStore {
    params: StateDict,
}

impl ParamStore {
    pub fn new(params: StateDict) -> Self {
        Self { params }
    }

    pub fn get(&self, key: &str) -> Option<&Tensor> {
        self.params.get(key)
    }

    pub fn get_mut(&mut self, key: &str) -> Option<&mut Tensor> {
        self.params.get_mut(key)
    }

    pub fn iter_mut(&mut self) -> impl Iterator<Item = (&String, &mut Tensor)> {
        self.params.iter_mut()
    }

    pub fn len(&self) -> usize {
        self.params.len()
    }

    pub fn is_empty(&self) -> bool {
        self.params.is_empty()
    }

    pub fn l2_norm(&self) -> f64 {
        self.params
            .values()
            .map(|t| t.l2_norm().powi(2))
            .sum::<f64>()
            .sqrt()
    }
}

impl LoadStateDict for ParamStore {
    fn state_dict(&self) -> StateDict {
        self.params.clone()
    }

    fn load_state_dict(&mut self, state: &StateDict, strict: bool) -> Result<LoadReport> {
        apply_state(&mut self.params, state, strict)
    }
}

/// Read a safetensors file into a state mapping. Only f32 tensors are supported.
pub fn load_network(path: &Path) -> Result<StateDict> {
    let bytes = std::fs::read(path)?;
    let tensors = SafeTensors::deserialize(&bytes)?;

    let mut state = StateDict::new();
    for (name, view) in tensors.tensors() {
        if view.dtype() != Dtype::F32 {
            return Err(MtlError::weights(format!(
                "{}: tensor '{name}' has dtype {:?}, expected F32",
                path.display(),
                view.dtype()
            )));
        }
        let data = view
            .data()
            .chunks_exact(4)
            .map(|c| f32::from_le_bytes([c[0], c[1], c[2], c[3]]))
            .collect();
        state.insert(name, Tensor::new(view.shape().to_vec(), data)?);
    }
    Ok(state)
}

/// Serialize a state mapping to safetensors bytes.
pub fn serialize_network(state: &StateDict) -> Result<Vec<u8>> {
    let raw: Vec<(&str, Vec<u8>, Vec<usize>)> = state
        .iter()
        .map(|(name, tensor)| {
            let bytes = tensor.data.iter().flat_map(|v| v.to_le_bytes()).collect();
            (name.as_str(), bytes, tensor.shape.clone())
        })
        .collect();

    let views = raw
        .iter()
        .map(|(name, bytes, shape)| {
            TensorView::new(Dtype::F32, shape.clone(), bytes).map(|view| (*name, view))
        })
        .collect::<std::result::Result<Vec<_>, _>>()?;

    let mut metadata = HashMap::new();
    metadata.insert("format".to_string(), "mtlface".to_string());
    Ok(safetensors::serialize(views, &Some(metadata))?)
}

pub fn save_network(path: &Path, state: &StateDict) -> Result<()> {
    let bytes = serialize_network(state)?;
    crate::persistence::write_atomic(path, &bytes)?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn module() -> ParamStore {
        let mut params = StateDict::new();
        params.insert("conv1.weight".into(), Tensor::zeros(vec![2, 3]));
        params.insert("conv1.bias".into(), Tensor::zeros(vec![2]));
        params.insert("fc.weight".into(), Tensor::zeros(vec![4]));
        ParamStore::new(params)
    }

    #[test]
    fn test_tensor_new_checks_len() {
        assert!(Tensor::new(vec![2, 2], vec![1.0; 3]).is_err());
        assert!(Tensor::new(vec![2, 2], vec![1.0; 4]).is_ok());
    }

    #[test]
    fn test_partial_load_subset_is_tolerated() {
        let mut target = module();
        let mut source = StateDict::new();
        source.insert(
            "conv1.weight".into(),
            Tensor::new(vec![2, 3], vec![1.0; 6]).unwrap(),
        );

        let report = target.load_state_dict(&source, false).unwrap();
        assert_eq!(report.loaded, vec!["conv1.weight".to_string()]);
        assert_eq!(report.missing_keys.len(), 2);
        assert!(report.unexpected_keys.is_empty());
        assert_eq!(target.get("conv1.weight").unwrap().data, vec![1.0; 6]);
        assert_eq!(target.get("fc.weight").unwrap().data, vec![0.0; 4]);
    }

    #[test]
    fn test_partial_load_skips_mismatched_and_unexpected() {
        let mut target = module();
        let mut source = StateDict::new();
        source.insert("fc.weight".into(), Tensor::new(vec![5], vec![2.0; 5]).unwrap());
        source.insert("head.kernel".into(), Tensor::zeros(vec![1]));

        let report = target.load_state_dict(&source, false).unwrap();
        assert!(report.loaded.is_empty());
        assert_eq!(report.mismatched_keys, vec!["fc.weight".to_string()]);
        assert_eq!(report.unexpected_keys, vec!["head.kernel".to_string()]);
        assert_eq!(target.get("fc.weight").unwrap().shape, vec![4]);
    }

    #[test]
    fn test_strict_load_rejects_subset() {
        let mut target = module();
        let source = StateDict::new();
        assert!(target.load_state_dict(&source, true).is_err());
    }

    #[test]
    fn test_safetensors_file_roundtrip() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("backbone.safetensors");

        let mut state = module().state_dict();
        state.get_mut("conv1.bias").unwrap().data = vec![0.5, -1.25];
        save_network(&path, &state).unwrap();

        let loaded = load_network(&path).unwrap();
        assert_eq!(loaded, state);
    }

    #[test]
    fn test_load_network_missing_file() {
        assert!(matches!(
            load_network(Path::new("/nonexistent/weights.safetensors")),
            Err(MtlError::Io(_))
        ));
    }
}
