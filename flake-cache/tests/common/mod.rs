#![allow(dead_code)]

use async_trait::async_trait;
use flake_cache::{CacheConfig, FlakeCache};
use flake_selector::Selector;
use nix_executor::{CommandError, CommandResult, Evaluated, FlakeEvaluator, FlakeMetadata};
use serde_json::Value;
use std::collections::{HashMap, HashSet};
use std::path::Path;
use std::sync::Mutex;
use std::sync::atomic::{AtomicUsize, Ordering};

/// A `FlakeEvaluator` answering from fixed tables and counting its calls.
#[derive(Default)]
pub struct MockEvaluator {
    values: Mutex<HashMap<String, Value>>,
    absent: HashSet<String>,
    show: Value,
    revision: Mutex<Option<String>>,
    evaluations: AtomicUsize,
    shows: AtomicUsize,
    evaluated: Mutex<Vec<String>>,
}

impl MockEvaluator {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_value(self, selector: &str, value: Value) -> Self {
        self.set_value(selector, value);
        self
    }

    pub fn with_absent(mut self, selector: &str) -> Self {
        self.absent.insert(canonical(selector));
        self
    }

    pub fn with_show(mut self, show: Value) -> Self {
        self.show = show;
        self
    }

    pub fn set_value(&self, selector: &str, value: Value) {
        self.values
            .lock()
            .unwrap()
            .insert(canonical(selector), value);
    }

    pub fn set_revision(&self, revision: &str) {
        *self.revision.lock().unwrap() = Some(revision.to_string());
    }

    pub fn evaluations(&self) -> usize {
        self.evaluations.load(Ordering::SeqCst)
    }

    pub fn shows(&self) -> usize {
        self.shows.load(Ordering::SeqCst)
    }

    pub fn evaluated(&self) -> Vec<String> {
        self.evaluated.lock().unwrap().clone()
    }
}

fn canonical(selector: &str) -> String {
    Selector::parse(selector).unwrap().canonical()
}

#[async_trait]
impl FlakeEvaluator for MockEvaluator {
    async fn evaluate(&self, flake: &str, selector: &Selector) -> CommandResult<Evaluated> {
        self.evaluations.fetch_add(1, Ordering::SeqCst);
        let key = selector.canonical();
        self.evaluated.lock().unwrap().push(key.clone());

        if self.absent.contains(&key) {
            return Ok(Evaluated::Absent);
        }
        match self.values.lock().unwrap().get(&key) {
            Some(value) => Ok(Evaluated::Value(value.clone())),
            None => Err(CommandError::Evaluation {
                command: format!("nix eval --json {flake}#{key}"),
                code: Some(1),
                stderr: format!("error: flake '{flake}' does not provide attribute '{key}'\n"),
            }),
        }
    }

    async fn flake_show(&self, _flake: &str) -> CommandResult<Value> {
        self.shows.fetch_add(1, Ordering::SeqCst);
        Ok(self.show.clone())
    }

    async fn metadata(&self, _flake: &str) -> CommandResult<FlakeMetadata> {
        Ok(FlakeMetadata {
            revision: self.revision.lock().unwrap().clone(),
            ..FlakeMetadata::default()
        })
    }
}

pub fn config(cache_dir: &Path) -> CacheConfig {
    CacheConfig {
        validate_fingerprint: false,
        ..CacheConfig::new(cache_dir)
    }
}

pub fn cache(cache_dir: &Path, evaluator: MockEvaluator) -> FlakeCache<MockEvaluator> {
    FlakeCache::new(evaluator, config(cache_dir))
}
