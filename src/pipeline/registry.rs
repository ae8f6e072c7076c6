//! Calculator and subgraph registry.
//!
//! Graphs name calculators by string. The registry maps those names to a
//! contract function and a factory, and to subgraph configs that get
//! expanded in place. It is an ordinary value built by the embedder;
//! nothing is registered behind its back.

use crate::config::{GraphConfig, NodeOptions};
use crate::error::{Error, Result};
use crate::pipeline::calculator::{Calculator, CalculatorContract, CalculatorType};
use crate::pipeline::nodes;
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

type ContractFn = Arc<dyn Fn(&mut CalculatorContract) -> Result<()> + Send + Sync>;
type FactoryFn = Arc<dyn Fn(&NodeOptions) -> Result<Box<dyn Calculator>> + Send + Sync>;

#[derive(Clone)]
struct CalculatorEntry {
    get_contract: ContractFn,
    factory: FactoryFn,
}

#[derive(Clone, Default)]
pub struct CalculatorRegistry {
    calculators: HashMap<String, CalculatorEntry>,
    subgraphs: HashMap<String, Arc<GraphConfig>>,
}

impl CalculatorRegistry {
    /// Empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Registry holding the built-in calculators.
    pub fn with_builtins() -> Self {
        let mut registry = Self::new();
        nodes::register_builtins(&mut registry);
        registry
    }

    fn check_free(&self, name: &str) -> Result<()> {
        if self.calculators.contains_key(name) || self.subgraphs.contains_key(name) {
            return Err(Error::AlreadyExists(format!("calculator \"{}\"", name)));
        }
        Ok(())
    }

    /// Register a calculator type under `name`.
    pub fn register<T: CalculatorType>(&mut self, name: impl Into<String>) -> Result<()> {
        self.register_fn(name, T::get_contract, |options| {
            Ok(Box::new(T::create(options)?) as Box<dyn Calculator>)
        })
    }

    /// Register a calculator from a contract function and a factory, for
    /// calculators that capture state from the embedder.
    pub fn register_fn<C, F>(&mut self, name: impl Into<String>, get_contract: C, factory: F) -> Result<()>
    where
        C: Fn(&mut CalculatorContract) -> Result<()> + Send + Sync + 'static,
        F: Fn(&NodeOptions) -> Result<Box<dyn Calculator>> + Send + Sync + 'static,
    {
        let name = name.into();
        self.check_free(&name)?;
        tracing::debug!("Registered calculator {}", name);
        self.calculators.insert(
            name,
            CalculatorEntry {
                get_contract: Arc::new(get_contract),
                factory: Arc::new(factory),
            },
        );
        Ok(())
    }

    /// Register a graph config usable as a node.
    pub fn register_subgraph(&mut self, name: impl Into<String>, config: GraphConfig) -> Result<()> {
        let name = name.into();
        self.check_free(&name)?;
        tracing::debug!("Registered subgraph {} ({} nodes)", name, config.nodes.len());
        self.subgraphs.insert(name, Arc::new(config));
        Ok(())
    }

    pub fn contains(&self, name: &str) -> bool {
        self.calculators.contains_key(name) || self.subgraphs.contains_key(name)
    }

    pub fn subgraph(&self, name: &str) -> Option<Arc<GraphConfig>> {
        self.subgraphs.get(name).cloned()
    }

    fn entry(&self, name: &str) -> Result<&CalculatorEntry> {
        self.calculators
            .get(name)
            .ok_or_else(|| Error::NotFound(format!("calculator \"{}\"", name)))
    }

    pub fn get_contract(&self, name: &str, contract: &mut CalculatorContract) -> Result<()> {
        (self.entry(name)?.get_contract)(contract)
    }

    pub fn create(&self, name: &str, options: &NodeOptions) -> Result<Box<dyn Calculator>> {
        (self.entry(name)?.factory)(options)
    }

    /// Registered calculator names, sorted.
    pub fn calculator_names(&self) -> Vec<&str> {
        let mut names: Vec<&str> = self.calculators.keys().map(String::as_str).collect();
        names.sort_unstable();
        names
    }
}

impl fmt::Debug for CalculatorRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut subgraphs: Vec<&str> = self.subgraphs.keys().map(String::as_str).collect();
        subgraphs.sort_unstable();
        f.debug_struct("CalculatorRegistry")
            .field("calculators", &self.calculator_names())
            .field("subgraphs", &subgraphs)
            .finish()
    }
}
