//! Function registry for dispatching assigned jobs by function name.
//!
//! The registry maps function names to [`FunctionDefinition`]s. Each
//! assignment gets a fresh instance from the definition's factory.
//!
//! # Example
//!
//! ```
//! use gearman_client::worker::{FunctionRegistry, JobContext};
//! use gearman_client::JobResult;
//!
//! let mut registry = FunctionRegistry::new();
//! registry.register_fn("reverse", None, |ctx: &JobContext| {
//!     let mut data = ctx.data().to_vec();
//!     data.reverse();
//!     Ok(JobResult::success(data))
//! });
//!
//! assert!(registry.contains("reverse"));
//! assert!(registry.instantiate("reverse").is_some());
//! ```

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use super::JobContext;
use crate::job::JobResult;

/// Error type user functions fail with.
pub type BoxError = Box<dyn std::error::Error + Send + Sync>;

/// Return type of a function execution.
pub type FunctionResult = std::result::Result<JobResult, BoxError>;

/// An executable function instance.
///
/// Runs on a blocking thread; progress can be reported through the context
/// while it runs.
pub trait GearmanFunction: Send {
    fn execute(&mut self, ctx: &JobContext) -> FunctionResult;
}

impl<F> GearmanFunction for F
where
    F: FnMut(&JobContext) -> FunctionResult + Send,
{
    fn execute(&mut self, ctx: &JobContext) -> FunctionResult {
        self(ctx)
    }
}

/// Produces a new function instance per job.
pub trait FunctionFactory: Send + Sync {
    fn create(&self) -> Box<dyn GearmanFunction>;
}

/// Factory that hands out a shared stateless closure.
struct SharedFn<F>(Arc<F>);

impl<F> FunctionFactory for SharedFn<F>
where
    F: Fn(&JobContext) -> FunctionResult + Send + Sync + 'static,
{
    fn create(&self) -> Box<dyn GearmanFunction> {
        let f = Arc::clone(&self.0);
        Box::new(move |ctx: &JobContext| f(ctx))
    }
}

/// Name, optional execution timeout and factory of one function.
#[derive(Clone)]
pub struct FunctionDefinition {
    name: String,
    timeout: Option<Duration>,
    factory: Arc<dyn FunctionFactory>,
}

impl FunctionDefinition {
    pub fn new(
        name: impl Into<String>,
        timeout: Option<Duration>,
        factory: impl FunctionFactory + 'static,
    ) -> Self {
        Self {
            name: name.into(),
            timeout,
            factory: Arc::new(factory),
        }
    }

    #[inline]
    pub fn name(&self) -> &str {
        &self.name
    }

    #[inline]
    pub fn timeout(&self) -> Option<Duration> {
        self.timeout
    }

    /// Timeout announced with CAN_DO_TIMEOUT, in whole seconds rounded up.
    pub fn timeout_secs(&self) -> Option<u64> {
        self.timeout.map(|t| {
            let secs = t.as_secs();
            if t.subsec_nanos() > 0 {
                secs + 1
            } else {
                secs
            }
        })
    }

    pub fn create(&self) -> Box<dyn GearmanFunction> {
        self.factory.create()
    }
}

impl fmt::Debug for FunctionDefinition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FunctionDefinition")
            .field("name", &self.name)
            .field("timeout", &self.timeout)
            .finish()
    }
}

/// Registry mapping function names to definitions.
#[derive(Default)]
pub struct FunctionRegistry {
    functions: HashMap<String, FunctionDefinition>,
}

impl FunctionRegistry {
    /// Create a new empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a definition, replacing any previous one with the same name.
    ///
    /// Returns the replaced definition.
    pub fn register(&mut self, definition: FunctionDefinition) -> Option<FunctionDefinition> {
        self.functions
            .insert(definition.name.clone(), definition)
    }

    /// Register a stateless closure.
    pub fn register_fn<F>(
        &mut self,
        name: impl Into<String>,
        timeout: Option<Duration>,
        f: F,
    ) -> Option<FunctionDefinition>
    where
        F: Fn(&JobContext) -> FunctionResult + Send + Sync + 'static,
    {
        self.register(FunctionDefinition::new(name, timeout, SharedFn(Arc::new(f))))
    }

    pub fn unregister(&mut self, name: &str) -> Option<FunctionDefinition> {
        self.functions.remove(name)
    }

    pub fn clear(&mut self) {
        self.functions.clear();
    }

    pub fn get(&self, name: &str) -> Option<&FunctionDefinition> {
        self.functions.get(name)
    }

    pub fn contains(&self, name: &str) -> bool {
        self.functions.contains_key(name)
    }

    /// New instance of `name` together with its timeout.
    pub fn instantiate(&self, name: &str) -> Option<(Box<dyn GearmanFunction>, Option<Duration>)> {
        self.functions
            .get(name)
            .map(|def| (def.create(), def.timeout))
    }

    /// Registered function names, sorted.
    pub fn names(&self) -> Vec<String> {
        let mut names: Vec<_> = self.functions.keys().cloned().collect();
        names.sort();
        names
    }

    pub fn definitions(&self) -> impl Iterator<Item = &FunctionDefinition> {
        self.functions.values()
    }

    pub fn len(&self) -> usize {
        self.functions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.functions.is_empty()
    }
}
