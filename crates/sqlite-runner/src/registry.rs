use crate::{Command, Driver, Runner};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::mpsc;

/// Registry maps database names to their live Runner.
/// There is at most one Runner for a name at any instant.
pub struct Registry<D> {
    runners: std::sync::Mutex<HashMap<String, Arc<Runner<D>>>>,
}

/// Outcome of Registry::get_or_create.
pub(crate) enum Lookup<D> {
    /// A Runner of the name was already live.
    Existing(Arc<Runner<D>>),
    /// A new Runner was inserted. It must be started with its queue.
    Created(Arc<Runner<D>>, mpsc::UnboundedReceiver<Command>),
}

impl<D: Driver> Registry<D> {
    pub fn new() -> Self {
        Self {
            runners: Default::default(),
        }
    }

    pub fn get(&self, name: &str) -> Option<Arc<Runner<D>>> {
        self.runners.lock().unwrap().get(name).cloned()
    }

    pub fn contains(&self, name: &str) -> bool {
        self.runners.lock().unwrap().contains_key(name)
    }

    /// Return the live Runner of `name`, or atomically insert a new one.
    pub(crate) fn get_or_create(&self, name: &str) -> Lookup<D> {
        let mut runners = self.runners.lock().unwrap();

        if let Some(runner) = runners.get(name) {
            return Lookup::Existing(runner.clone());
        }
        let (runner, queue) = Runner::new(name);
        runners.insert(name.to_string(), runner.clone());

        Lookup::Created(runner, queue)
    }

    /// Remove the Runner of `name`, if there is one.
    pub fn remove(&self, name: &str) -> Option<Arc<Runner<D>>> {
        self.runners.lock().unwrap().remove(name)
    }

    /// Remove `runner`, but only if it's still the live Runner of its name.
    pub(crate) fn remove_runner(&self, runner: &Arc<Runner<D>>) -> bool {
        let mut runners = self.runners.lock().unwrap();

        match runners.get(runner.name()) {
            Some(live) if Arc::ptr_eq(live, runner) => {
                runners.remove(runner.name());
                true
            }
            _ => false,
        }
    }

    /// Is `runner` the live Runner of its name?
    pub(crate) fn is_live(&self, runner: &Arc<Runner<D>>) -> bool {
        match self.runners.lock().unwrap().get(runner.name()) {
            Some(live) => Arc::ptr_eq(live, runner),
            None => false,
        }
    }

    /// Names of all live Runners, in no particular order.
    pub fn names(&self) -> Vec<String> {
        self.runners.lock().unwrap().keys().cloned().collect()
    }

    pub fn len(&self) -> usize {
        self.runners.lock().unwrap().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl<D: Driver> Default for Registry<D> {
    fn default() -> Self {
        Self::new()
    }
}
