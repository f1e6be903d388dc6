//! Configuration
//!
//! Training parameters read by the histogram updater.
use crate::constants::DEFAULT_SUB_GROUP_SIZE;
use crate::errors::HistError;
use crate::grower::GrowPolicy;
use crate::sampler::SampleMethod;
use serde::{Deserialize, Serialize};

fn default_max_depth() -> usize {
    6
}
fn default_grow_policy() -> GrowPolicy {
    GrowPolicy::DepthWise
}
fn default_rate() -> f32 {
    1.0
}
fn default_sampling_method() -> SampleMethod {
    SampleMethod::Uniform
}
fn default_min_child_weight() -> f32 {
    1.0
}
fn default_reg_lambda() -> f32 {
    1.0
}
fn default_sub_group_size() -> usize {
    DEFAULT_SUB_GROUP_SIZE
}

/// Parameters of a single tree.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TrainParam {
    /// Maximum depth of the tree, 0 for no limit.
    #[serde(default = "default_max_depth")]
    pub max_depth: usize,
    /// Maximum number of leaves, 0 for no limit.
    #[serde(default)]
    pub max_leaves: usize,
    #[serde(default = "default_grow_policy")]
    pub grow_policy: GrowPolicy,
    /// Fraction of rows used per tree.
    #[serde(default = "default_rate")]
    pub subsample: f32,
    #[serde(default = "default_sampling_method")]
    pub sampling_method: SampleMethod,
    /// Minimum hessian sum of a child.
    #[serde(default = "default_min_child_weight")]
    pub min_child_weight: f32,
    /// L2 regularization on leaf weights.
    #[serde(default = "default_reg_lambda")]
    pub reg_lambda: f32,
    /// L1 regularization on leaf weights.
    #[serde(default)]
    pub reg_alpha: f32,
    /// Cap on the absolute leaf weight, 0 to disable.
    #[serde(default)]
    pub max_delta_step: f32,
    #[serde(default = "default_rate")]
    pub colsample_bytree: f32,
    #[serde(default = "default_rate")]
    pub colsample_bylevel: f32,
    #[serde(default = "default_rate")]
    pub colsample_bynode: f32,
    /// Groups of features allowed to interact, e.g. `"[[0, 1], [2, 3, 4]]"`.
    #[serde(default)]
    pub interaction_constraints: Option<String>,
    #[serde(default)]
    pub seed: u64,
    /// Lanes per split-enumeration group.
    #[serde(default = "default_sub_group_size")]
    pub sub_group_size: usize,
    /// Number of threads, rayon picks when unset.
    #[serde(default)]
    pub num_threads: Option<usize>,
}

impl Default for TrainParam {
    fn default() -> Self {
        TrainParam {
            max_depth: default_max_depth(),
            max_leaves: 0,
            grow_policy: default_grow_policy(),
            subsample: 1.0,
            sampling_method: default_sampling_method(),
            min_child_weight: default_min_child_weight(),
            reg_lambda: default_reg_lambda(),
            reg_alpha: 0.0,
            max_delta_step: 0.0,
            colsample_bytree: 1.0,
            colsample_bylevel: 1.0,
            colsample_bynode: 1.0,
            interaction_constraints: None,
            seed: 0,
            sub_group_size: DEFAULT_SUB_GROUP_SIZE,
            num_threads: None,
        }
    }
}

impl TrainParam {
    /// Load parameters from a json string, then validate them.
    pub fn from_json(json_str: &str) -> Result<Self, HistError> {
        let param = serde_json::from_str::<Self>(json_str).map_err(|e| HistError::UnableToRead(e.to_string()))?;
        param.validate()?;
        Ok(param)
    }

    pub fn json_dump(&self) -> Result<String, HistError> {
        serde_json::to_string(self).map_err(|e| HistError::UnableToRead(e.to_string()))
    }

    pub fn validate(&self) -> Result<(), HistError> {
        if self.max_depth == 0 && self.max_leaves == 0 {
            return Err(HistError::InvalidTreeLimits(
                "max_leaves and max_depth cannot both be unbounded".to_string(),
            ));
        }
        if self.grow_policy == GrowPolicy::DepthWise && self.max_depth == 0 {
            return Err(HistError::InvalidTreeLimits(
                "max_depth cannot be 0 when grow_policy is DepthWise".to_string(),
            ));
        }
        if self.sampling_method != SampleMethod::Uniform {
            return Err(HistError::UnsupportedSampling(format!("{:?}", self.sampling_method)));
        }
        validate_float_parameter(self.subsample, 0.0, 1.0, "subsample")?;
        validate_rate_parameter(self.colsample_bytree, "colsample_bytree")?;
        validate_rate_parameter(self.colsample_bylevel, "colsample_bylevel")?;
        validate_rate_parameter(self.colsample_bynode, "colsample_bynode")?;
        validate_positive_float_parameter(self.min_child_weight, "min_child_weight")?;
        validate_positive_float_parameter(self.reg_lambda, "reg_lambda")?;
        validate_positive_float_parameter(self.reg_alpha, "reg_alpha")?;
        validate_positive_float_parameter(self.max_delta_step, "max_delta_step")?;
        if self.sub_group_size == 0 {
            return Err(HistError::InvalidParameter(
                "sub_group_size".to_string(),
                "positive integer".to_string(),
                "0".to_string(),
            ));
        }
        Ok(())
    }
}

pub fn validate_positive_float_parameter(value: f32, parameter: &str) -> Result<(), HistError> {
    validate_float_parameter(value, 0.0, f32::INFINITY, parameter)
}

pub fn validate_float_parameter(value: f32, min: f32, max: f32, parameter: &str) -> Result<(), HistError> {
    if value.is_nan() || value < min || max < value {
        Err(HistError::InvalidParameter(
            parameter.to_string(),
            format!("real value within range {} and {}", min, max),
            value.to_string(),
        ))
    } else {
        Ok(())
    }
}

/// Column sampling rates must keep at least some features.
fn validate_rate_parameter(value: f32, parameter: &str) -> Result<(), HistError> {
    if value.is_nan() || value <= 0.0 || value > 1.0 {
        Err(HistError::InvalidParameter(
            parameter.to_string(),
            "real value within range (0, 1]".to_string(),
            value.to_string(),
        ))
    } else {
        Ok(())
    }
}
