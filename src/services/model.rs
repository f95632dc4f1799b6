//! Pre-trained regression models.
//!
//! Models are trained offline and stored as JSON. Two formats are accepted:
//! XGBoost's own `save_model` JSON (gradient boosted trees with an identity
//! link) and a plain linear model:
//!
//! ```json
//! { "feature_names": ["hora", "lag_1h"], "coefficients": [0.1, 0.9], "intercept": 1.5 }
//! ```

use serde::Deserialize;
use serde_json::Value;
use std::path::Path;

use super::features::FeatureRow;
use crate::errors::AppError;

/// A model that maps one feature row to the next-hour target value.
pub trait TrainedModel: Send + Sync {
    /// Input columns in the order the model was trained with.
    fn expected_columns(&self) -> &[String];

    fn predict(&self, row: &FeatureRow) -> Result<f64, AppError>;

    fn kind(&self) -> &'static str;
}

fn check_columns(expected: &[String], row: &FeatureRow) -> Result<(), AppError> {
    if row.columns.as_slice() != expected {
        return Err(AppError::ModelApplication(format!(
            "feature row columns [{}] do not match model columns [{}]",
            row.columns.join(", "),
            expected.join(", ")
        )));
    }
    Ok(())
}

fn finite(value: f64) -> Result<f64, AppError> {
    if value.is_finite() {
        Ok(value)
    } else {
        Err(AppError::ModelApplication(format!(
            "model produced a non-finite value ({})",
            value
        )))
    }
}

// ---------------------------------------------------------------------------
// Linear model
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Deserialize)]
pub struct LinearModel {
    feature_names: Vec<String>,
    coefficients: Vec<f64>,
    intercept: f64,
}

impl LinearModel {
    pub fn new(
        feature_names: Vec<String>,
        coefficients: Vec<f64>,
        intercept: f64,
    ) -> Result<Self, AppError> {
        let model = Self {
            feature_names,
            coefficients,
            intercept,
        };
        model.validate()?;
        Ok(model)
    }

    fn validate(&self) -> Result<(), AppError> {
        if self.feature_names.len() != self.coefficients.len() {
            return Err(AppError::ModelFormat(format!(
                "linear model has {} feature names but {} coefficients",
                self.feature_names.len(),
                self.coefficients.len()
            )));
        }
        Ok(())
    }
}

impl TrainedModel for LinearModel {
    fn expected_columns(&self) -> &[String] {
        &self.feature_names
    }

    /// Missing inputs cannot be imputed by a linear model and are rejected.
    fn predict(&self, row: &FeatureRow) -> Result<f64, AppError> {
        check_columns(&self.feature_names, row)?;

        let mut sum = self.intercept;
        for ((name, value), coef) in row.iter().zip(&self.coefficients) {
            let value = value.ok_or_else(|| {
                AppError::ModelApplication(format!("feature '{}' has no value", name))
            })?;
            sum += coef * value;
        }
        finite(sum)
    }

    fn kind(&self) -> &'static str {
        "linear"
    }
}

// ---------------------------------------------------------------------------
// XGBoost tree ensemble
// ---------------------------------------------------------------------------

/// Objectives whose prediction is the raw margin.
const IDENTITY_OBJECTIVES: [&str; 4] = [
    "reg:squarederror",
    "reg:linear",
    "reg:absoluteerror",
    "reg:pseudohubererror",
];

#[derive(Debug, Clone)]
struct Tree {
    left: Vec<i64>,
    right: Vec<i64>,
    split_index: Vec<usize>,
    /// Split thresholds on inner nodes, leaf values on leaves. XGBoost
    /// keeps both in single precision.
    split_condition: Vec<f32>,
    default_left: Vec<bool>,
}

impl Tree {
    fn is_leaf(&self, node: usize) -> bool {
        self.left[node] < 0
    }

    /// Walk from the root to a leaf. Missing inputs follow the node's
    /// default direction.
    fn leaf_value(&self, inputs: &[Option<f64>]) -> Result<f64, AppError> {
        let mut node = 0usize;
        // a valid tree reaches a leaf in fewer steps than it has nodes
        for _ in 0..self.left.len() {
            if self.is_leaf(node) {
                return Ok(f64::from(self.split_condition[node]));
            }
            let go_left = match inputs[self.split_index[node]] {
                // compared in f32, as XGBoost does
                Some(x) => (x as f32) < self.split_condition[node],
                None => self.default_left[node],
            };
            let next = if go_left {
                self.left[node]
            } else {
                self.right[node]
            };
            node = next as usize;
        }
        Err(AppError::ModelApplication(
            "tree traversal did not reach a leaf".to_string(),
        ))
    }
}

#[derive(Debug, Clone)]
pub struct TreeEnsemble {
    feature_names: Vec<String>,
    base_score: f64,
    trees: Vec<Tree>,
}

#[derive(Deserialize)]
struct XgbDocument {
    learner: XgbLearner,
}

#[derive(Deserialize)]
struct XgbLearner {
    #[serde(default)]
    feature_names: Vec<String>,
    learner_model_param: XgbModelParam,
    objective: XgbObjective,
    gradient_booster: XgbBooster,
}

#[derive(Deserialize)]
struct XgbModelParam {
    base_score: String,
    #[serde(default)]
    num_class: Option<String>,
}

#[derive(Deserialize)]
struct XgbObjective {
    name: String,
}

#[derive(Deserialize)]
struct XgbBooster {
    name: String,
    model: Option<XgbTrees>,
}

#[derive(Deserialize)]
struct XgbTrees {
    trees: Vec<XgbTree>,
}

#[derive(Deserialize)]
struct XgbTree {
    left_children: Vec<i64>,
    right_children: Vec<i64>,
    split_indices: Vec<i64>,
    split_conditions: Vec<f32>,
    default_left: Vec<Flag>,
}

/// Older XGBoost releases write `default_left` as 0/1, newer ones as bools.
#[derive(Deserialize)]
#[serde(untagged)]
enum Flag {
    Bool(bool),
    Int(i64),
}

impl Flag {
    fn as_bool(&self) -> bool {
        match self {
            Flag::Bool(b) => *b,
            Flag::Int(i) => *i != 0,
        }
    }
}

/// `base_score` is a string, bracketed (`"[5E-1]"`) since XGBoost 3.
fn parse_base_score(raw: &str) -> Result<f64, AppError> {
    let trimmed = raw.trim().trim_start_matches('[').trim_end_matches(']');
    trimmed
        .split(',')
        .next()
        .unwrap_or_default()
        .trim()
        .parse()
        .map_err(|_| AppError::ModelFormat(format!("invalid base_score '{}'", raw)))
}

impl TreeEnsemble {
    pub fn from_json(value: Value) -> Result<Self, AppError> {
        let doc: XgbDocument = serde_json::from_value(value)
            .map_err(|e| AppError::ModelFormat(format!("not an XGBoost model: {}", e)))?;
        let learner = doc.learner;

        if !IDENTITY_OBJECTIVES.contains(&learner.objective.name.as_str()) {
            return Err(AppError::ModelFormat(format!(
                "objective '{}' is not supported",
                learner.objective.name
            )));
        }
        if let Some(classes) = learner.learner_model_param.num_class.as_deref() {
            if classes.trim().parse::<u32>().unwrap_or(0) > 1 {
                return Err(AppError::ModelFormat(
                    "multi-output models are not supported".to_string(),
                ));
            }
        }
        if learner.gradient_booster.name != "gbtree" {
            return Err(AppError::ModelFormat(format!(
                "booster '{}' is not supported",
                learner.gradient_booster.name
            )));
        }
        if learner.feature_names.is_empty() {
            return Err(AppError::ModelFormat(
                "model does not declare feature_names".to_string(),
            ));
        }

        let base_score = parse_base_score(&learner.learner_model_param.base_score)?;
        let n_features = learner.feature_names.len();

        let trees = learner
            .gradient_booster
            .model
            .map(|m| m.trees)
            .unwrap_or_default()
            .into_iter()
            .enumerate()
            .map(|(i, t)| convert_tree(i, t, n_features))
            .collect::<Result<Vec<_>, _>>()?;

        Ok(Self {
            feature_names: learner.feature_names,
            base_score,
            trees,
        })
    }
}

fn convert_tree(idx: usize, tree: XgbTree, n_features: usize) -> Result<Tree, AppError> {
    let n = tree.left_children.len();
    let bad = |what: &str| AppError::ModelFormat(format!("tree {}: {}", idx, what));

    if n == 0 {
        return Err(bad("no nodes"));
    }
    if tree.right_children.len() != n
        || tree.split_indices.len() != n
        || tree.split_conditions.len() != n
        || tree.default_left.len() != n
    {
        return Err(bad("node arrays have different lengths"));
    }

    let mut split_index = Vec::with_capacity(n);
    for node in 0..n {
        let (l, r) = (tree.left_children[node], tree.right_children[node]);
        if l < 0 {
            split_index.push(0);
            continue;
        }
        if l as usize >= n || r < 0 || r as usize >= n {
            return Err(bad("child index out of range"));
        }
        let feature = tree.split_indices[node];
        if feature < 0 || feature as usize >= n_features {
            return Err(bad("split feature out of range"));
        }
        split_index.push(feature as usize);
    }

    Ok(Tree {
        left: tree.left_children,
        right: tree.right_children,
        split_index,
        split_condition: tree.split_conditions,
        default_left: tree.default_left.iter().map(Flag::as_bool).collect(),
    })
}

impl TrainedModel for TreeEnsemble {
    fn expected_columns(&self) -> &[String] {
        &self.feature_names
    }

    fn predict(&self, row: &FeatureRow) -> Result<f64, AppError> {
        check_columns(&self.feature_names, row)?;

        let mut margin = self.base_score;
        for tree in &self.trees {
            margin += tree.leaf_value(&row.values)?;
        }
        finite(margin)
    }

    fn kind(&self) -> &'static str {
        "xgboost"
    }
}

/// Load a model file, detecting its format from the JSON layout.
pub fn load_model(path: &Path) -> Result<Box<dyn TrainedModel>, AppError> {
    let content = match std::fs::read_to_string(path) {
        Ok(c) => c,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
            return Err(AppError::ModelUnavailable(format!(
                "{} does not exist",
                path.display()
            )))
        }
        Err(e) => {
            return Err(AppError::ModelUnavailable(format!(
                "failed to read {}: {}",
                path.display(),
                e
            )))
        }
    };

    let value: Value = serde_json::from_str(&content)
        .map_err(|e| AppError::ModelFormat(format!("{}: {}", path.display(), e)))?;

    let model: Box<dyn TrainedModel> = if value.get("learner").is_some() {
        Box::new(TreeEnsemble::from_json(value)?)
    } else if value.get("coefficients").is_some() {
        let linear: LinearModel = serde_json::from_value(value)
            .map_err(|e| AppError::ModelFormat(format!("invalid linear model: {}", e)))?;
        linear.validate()?;
        Box::new(linear)
    } else {
        return Err(AppError::ModelFormat(format!(
            "{} is neither an XGBoost nor a linear model",
            path.display()
        )));
    };

    tracing::info!(
        "Loaded {} model from {} ({} input columns)",
        model.kind(),
        path.display(),
        model.expected_columns().len()
    );
    Ok(model)
}
