use std::collections::BTreeMap;
use std::fmt;

use serde::de::DeserializeOwned;

use super::{bias, mean, Algorithm};
use crate::EvalError;

/// Description of one algorithm to evaluate.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct AlgorithmConfig {
    /// Identifier written to every result row. Defaults to `kind`.
    #[serde(default)]
    pub id: Option<String>,
    /// Registered algorithm kind.
    pub kind: String,
    /// Kind-specific parameters.
    #[serde(default)]
    pub params: serde_json::Map<String, serde_json::Value>,
}

impl AlgorithmConfig {
    /// Build a config with no parameters.
    pub fn new<T: Into<String>>(kind: T) -> Self {
        AlgorithmConfig {
            id: None,
            kind: kind.into(),
            params: serde_json::Map::new(),
        }
    }

    /// Set the identifier.
    pub fn id<T: Into<String>>(mut self, id: T) -> Self {
        self.id = Some(id.into());
        self
    }

    /// Set a parameter.
    pub fn param<T: Into<serde_json::Value>>(mut self, name: &str, value: T) -> Self {
        self.params.insert(name.to_owned(), value.into());
        self
    }

    /// The identifier recorded in result rows.
    pub fn algorithm_id(&self) -> &str {
        self.id.as_ref().unwrap_or(&self.kind)
    }

    /// Deserialize the parameters into a kind-specific type.
    pub fn params<T: DeserializeOwned>(&self) -> Result<T, EvalError> {
        serde_json::from_value(serde_json::Value::Object(self.params.clone())).map_err(|err| {
            EvalError::config(format!(
                "invalid parameters for algorithm {}: {}",
                self.algorithm_id(),
                err
            ))
        })
    }
}

/// Builds an algorithm from its configuration.
pub type AlgorithmFactory = Box<dyn Fn(&AlgorithmConfig) -> Result<Box<dyn Algorithm>, EvalError> + Send + Sync>;

/// Resolves algorithm configurations to algorithm instances by kind.
pub struct AlgorithmRegistry {
    factories: BTreeMap<String, AlgorithmFactory>,
}

impl fmt::Debug for AlgorithmRegistry {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.debug_struct("AlgorithmRegistry")
            .field("kinds", &self.factories.keys().collect::<Vec<_>>())
            .finish()
    }
}

impl Default for AlgorithmRegistry {
    fn default() -> Self {
        let mut registry = AlgorithmRegistry::empty();

        registry.register("global_mean", |config| {
            config.params::<serde_json::Map<String, serde_json::Value>>().and_then(|params| {
                if params.is_empty() {
                    Ok(Box::new(mean::GlobalMean::new(config.algorithm_id())) as Box<dyn Algorithm>)
                } else {
                    Err(EvalError::config("global_mean takes no parameters"))
                }
            })
        });
        registry.register("item_mean", |config| {
            let hyper: mean::Hyperparameters = config.params()?;
            let algorithm = hyper
                .build(config.algorithm_id())
                .map_err(|err| EvalError::config(err.to_string()))?;
            Ok(Box::new(algorithm) as Box<dyn Algorithm>)
        });
        registry.register("user_item_bias", |config| {
            let hyper: bias::Hyperparameters = config.params()?;
            let algorithm = hyper
                .build(config.algorithm_id())
                .map_err(|err| EvalError::config(err.to_string()))?;
            Ok(Box::new(algorithm) as Box<dyn Algorithm>)
        });

        registry
    }
}

impl AlgorithmRegistry {
    /// A registry with no algorithm kinds.
    pub fn empty() -> Self {
        AlgorithmRegistry {
            factories: BTreeMap::new(),
        }
    }

    /// Register a factory for `kind`, replacing any previous one.
    pub fn register<T, F>(&mut self, kind: T, factory: F)
    where
        T: Into<String>,
        F: Fn(&AlgorithmConfig) -> Result<Box<dyn Algorithm>, EvalError> + Send + Sync + 'static,
    {
        self.factories.insert(kind.into(), Box::new(factory));
    }

    /// Registered kinds, in sorted order.
    pub fn kinds(&self) -> Vec<&str> {
        self.factories.keys().map(|x| x.as_str()).collect()
    }

    /// Build one algorithm.
    pub fn build(&self, config: &AlgorithmConfig) -> Result<Box<dyn Algorithm>, EvalError> {
        let factory = self.factories.get(&config.kind).ok_or_else(|| {
            EvalError::config(format!(
                "unknown algorithm kind {:?}; known kinds: {}",
                config.kind,
                self.kinds().join(", ")
            ))
        })?;

        factory(config)
    }

    /// Build every configured algorithm, in order.
    pub fn build_all(&self, configs: &[AlgorithmConfig]) -> Result<Vec<Box<dyn Algorithm>>, EvalError> {
        configs.iter().map(|config| self.build(config)).collect()
    }
}
