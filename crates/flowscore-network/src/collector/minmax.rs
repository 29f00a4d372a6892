//! Min/max collectors.
//!
//! Neither tracks enough state for a cheap undo (removing the current
//! extremum would need the runner-up), so both declare
//! `supports_retract == false` and rely on the group node's
//! recompute-from-members fallback.

use std::sync::Arc;

use crate::key::KeyValue;
use crate::tuple::Tuple;

use super::{Accumulator, Collector, CollectorError};

type ValueFn = Arc<dyn Fn(&Tuple) -> KeyValue + Send + Sync>;

/// Creates a collector for the smallest extracted key.
pub fn min<K, F>(mapper: F) -> MinCollector
where
    K: Into<KeyValue>,
    F: Fn(&Tuple) -> K + Send + Sync + 'static,
{
    MinCollector {
        mapper: Arc::new(move |t| mapper(t).into()),
    }
}

/// Creates a collector for the largest extracted key.
pub fn max<K, F>(mapper: F) -> MaxCollector
where
    K: Into<KeyValue>,
    F: Fn(&Tuple) -> K + Send + Sync + 'static,
{
    MaxCollector {
        mapper: Arc::new(move |t| mapper(t).into()),
    }
}

/// Minimum collector. Created by [`min()`].
pub struct MinCollector {
    mapper: ValueFn,
}

/// Maximum collector. Created by [`max()`].
pub struct MaxCollector {
    mapper: ValueFn,
}

impl Collector for MinCollector {
    fn create_accumulator(&self) -> Box<dyn Accumulator> {
        Box::new(ExtremumAccumulator {
            mapper: self.mapper.clone(),
            keep_smaller: true,
            best: None,
        })
    }

    fn supports_retract(&self) -> bool {
        false
    }
}

impl Collector for MaxCollector {
    fn create_accumulator(&self) -> Box<dyn Accumulator> {
        Box::new(ExtremumAccumulator {
            mapper: self.mapper.clone(),
            keep_smaller: false,
            best: None,
        })
    }

    fn supports_retract(&self) -> bool {
        false
    }
}

struct ExtremumAccumulator {
    mapper: ValueFn,
    keep_smaller: bool,
    best: Option<KeyValue>,
}

impl Accumulator for ExtremumAccumulator {
    fn accumulate(&mut self, tuple: &Tuple) -> KeyValue {
        let value = (self.mapper)(tuple);
        let replace = match &self.best {
            None => true,
            Some(best) => {
                if self.keep_smaller {
                    value < *best
                } else {
                    value > *best
                }
            }
        };
        if replace {
            self.best = Some(value.clone());
        }
        value
    }

    fn retract(&mut self, _undo: &KeyValue) -> Result<(), CollectorError> {
        Err(CollectorError::RetractUnsupported)
    }

    fn result(&self) -> KeyValue {
        self.best.clone().unwrap_or(KeyValue::None)
    }

    fn reset(&mut self) {
        self.best = None;
    }
}
