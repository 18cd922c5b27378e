//! Actor behaviors
//!
//! A behavior is the code an actor runs: it is invoked once with the actor's
//! context and its spawn arguments, and the actor lives exactly as long as the
//! returned future. Behaviors are registered by `(module, function)` before the
//! system starts and resolved by name on every spawn.

use crate::context::ActorContext;
use crate::error::{Result, RuntimeError};
use async_trait::async_trait;
use std::collections::HashMap;
use std::fmt;
use std::future::Future;
use std::sync::Arc;
use types::{Dict, Value};

/// Values a behavior hands back when it finishes
pub type BehaviorResult = Result<Vec<Value>>;

/// Trait for actor behavior.
///
/// The future runs on the actor's worker thread and never migrates, so it
/// does not need to be `Send`; the behavior object itself is shared by every
/// worker.
#[async_trait(?Send)]
pub trait Behavior: Send + Sync + 'static {
    async fn run(&self, ctx: ActorContext, args: Dict) -> BehaviorResult;
}

/// Adapter turning an async closure into a [`Behavior`]
pub struct FnBehavior<F> {
    func: F,
}

impl<F> FnBehavior<F> {
    pub fn new(func: F) -> Self {
        Self { func }
    }
}

#[async_trait(?Send)]
impl<F, Fut> Behavior for FnBehavior<F>
where
    F: Fn(ActorContext, Dict) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = BehaviorResult> + 'static,
{
    async fn run(&self, ctx: ActorContext, args: Dict) -> BehaviorResult {
        (self.func)(ctx, args).await
    }
}

/// Behaviors available to `spawn`, keyed by `module.function`
#[derive(Clone, Default)]
pub struct BehaviorRegistry {
    behaviors: HashMap<String, Arc<dyn Behavior>>,
}

fn qualified(module: &str, function: &str) -> String {
    format!("{}.{}", module, function)
}

impl BehaviorRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a behavior; a later registration under the same name replaces it
    pub fn register<B: Behavior>(&mut self, module: &str, function: &str, behavior: B) -> &mut Self {
        self.behaviors.insert(qualified(module, function), Arc::new(behavior));
        self
    }

    /// Register an async closure `|ctx, args| async move { .. }`
    pub fn register_fn<F, Fut>(&mut self, module: &str, function: &str, func: F) -> &mut Self
    where
        F: Fn(ActorContext, Dict) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = BehaviorResult> + 'static,
    {
        self.register(module, function, FnBehavior::new(func))
    }

    pub fn resolve(&self, module: &str, function: &str) -> Result<Arc<dyn Behavior>> {
        self.behaviors
            .get(&qualified(module, function))
            .cloned()
            .ok_or_else(|| RuntimeError::behavior_not_found(module, function))
    }

    pub fn contains(&self, module: &str, function: &str) -> bool {
        self.behaviors.contains_key(&qualified(module, function))
    }

    pub fn len(&self) -> usize {
        self.behaviors.len()
    }

    pub fn is_empty(&self) -> bool {
        self.behaviors.is_empty()
    }

    /// Registered names, sorted
    pub fn names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.behaviors.keys().cloned().collect();
        names.sort();
        names
    }
}

impl fmt::Debug for BehaviorRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BehaviorRegistry")
            .field("behaviors", &self.names())
            .finish()
    }
}
