//! Test-only sink injection.
//!
//! A probe descriptor resolves to a factory closure registered by the test,
//! so scenario tests can drive the worker with scripted sinks (failing,
//! sleeping, collecting) through the ordinary configuration path.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Mutex, OnceLock};

use crate::{Error, Result, Sink};

type Factory = Box<dyn Fn() -> Box<dyn Sink> + Send>;

fn factories() -> &'static Mutex<HashMap<u64, Factory>> {
    static FACTORIES: OnceLock<Mutex<HashMap<u64, Factory>>> = OnceLock::new();
    FACTORIES.get_or_init(|| Mutex::new(HashMap::new()))
}

static NEXT_KEY: AtomicU64 = AtomicU64::new(1);

/// Descriptor of a registered probe factory.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProbeSinkConfig {
    key: u64,
}

/// Register a factory and get the descriptor that resolves to it.
pub fn register(factory: impl Fn() -> Box<dyn Sink> + Send + 'static) -> ProbeSinkConfig {
    let key = NEXT_KEY.fetch_add(1, Ordering::Relaxed);
    factories().lock().unwrap().insert(key, Box::new(factory));
    ProbeSinkConfig { key }
}

pub(crate) fn build(config: &ProbeSinkConfig) -> Result<Box<dyn Sink>> {
    let factories = factories().lock().unwrap();
    let factory = factories
        .get(&config.key)
        .ok_or_else(|| Error::Config(format!("unknown probe sink {}", config.key)))?;
    Ok(factory())
}
