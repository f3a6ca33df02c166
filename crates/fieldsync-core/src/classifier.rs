use std::collections::HashSet;

use crate::config::ClassifierConfig;
use crate::error::{FieldSyncError, Result};
use crate::models::Classification;

const NAME_DELIMITERS: &[char] = &['.', '/', ':', '-'];

/// Maps intent names onto their offline handling.
///
/// Membership is fixed at construction; the queueable and cacheable sets are
/// disjoint, and any other name is `PassThrough`.
#[derive(Debug, Clone)]
pub struct ActionClassifier {
    queueable: HashSet<String>,
    cacheable: HashSet<String>,
}

impl ActionClassifier {
    pub fn new<Q, C>(queueable: Q, cacheable: C) -> Result<Self>
    where
        Q: IntoIterator,
        Q::Item: Into<String>,
        C: IntoIterator,
        C::Item: Into<String>,
    {
        let queueable = collect_names(queueable, "queueable")?;
        let cacheable = collect_names(cacheable, "cacheable")?;
        let mut overlap = queueable.intersection(&cacheable).cloned().collect::<Vec<_>>();
        if !overlap.is_empty() {
            overlap.sort();
            return Err(FieldSyncError::Config(format!(
                "intents classified as both queueable and cacheable: {}",
                overlap.join(", ")
            )));
        }
        Ok(Self {
            queueable,
            cacheable,
        })
    }

    pub fn from_config(config: &ClassifierConfig) -> Result<Self> {
        Self::new(config.queueable.iter().cloned(), config.cacheable.iter().cloned())
    }

    pub fn classify(&self, name: &str) -> Classification {
        if self.queueable.contains(name) {
            Classification::Queueable
        } else if self.cacheable.contains(name) {
            Classification::Cacheable
        } else {
            Classification::PassThrough
        }
    }

    pub fn queueable_names(&self) -> Vec<&str> {
        sorted_names(&self.queueable)
    }

    pub fn cacheable_names(&self) -> Vec<&str> {
        sorted_names(&self.cacheable)
    }
}

/// Derives the cache key an intent name writes to: delimiter-separated
/// segments joined with `_`, so `orders.setAll` and `orders/setAll` share
/// `orders_setAll`.
pub fn cache_key_for(name: &str) -> String {
    name.split(|ch: char| NAME_DELIMITERS.contains(&ch) || ch.is_whitespace())
        .filter(|segment| !segment.is_empty())
        .collect::<Vec<_>>()
        .join("_")
}

fn collect_names<I>(names: I, set: &str) -> Result<HashSet<String>>
where
    I: IntoIterator,
    I::Item: Into<String>,
{
    let mut out = HashSet::new();
    for name in names {
        let name = name.into();
        if name.trim().is_empty() {
            return Err(FieldSyncError::Config(format!(
                "{set} set contains a blank intent name"
            )));
        }
        out.insert(name);
    }
    Ok(out)
}

fn sorted_names(set: &HashSet<String>) -> Vec<&str> {
    let mut names = set.iter().map(String::as_str).collect::<Vec<_>>();
    names.sort_unstable();
    names
}
