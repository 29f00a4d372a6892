//! Sum collector.

use std::sync::Arc;

use crate::key::KeyValue;
use crate::tuple::Tuple;

use super::{Accumulator, Collector, CollectorError};

/// Creates a collector that sums an integer extracted from each member.
///
/// The extracted value is the undo token, so retraction stays correct even
/// after the member's facts changed.
pub fn sum<F>(mapper: F) -> SumCollector
where
    F: Fn(&Tuple) -> i64 + Send + Sync + 'static,
{
    SumCollector {
        mapper: Arc::new(mapper),
    }
}

/// A collector that sums extracted values. Created by [`sum()`].
pub struct SumCollector {
    mapper: Arc<dyn Fn(&Tuple) -> i64 + Send + Sync>,
}

impl Collector for SumCollector {
    fn create_accumulator(&self) -> Box<dyn Accumulator> {
        Box::new(SumAccumulator {
            mapper: self.mapper.clone(),
            sum: 0,
        })
    }
}

struct SumAccumulator {
    mapper: Arc<dyn Fn(&Tuple) -> i64 + Send + Sync>,
    sum: i64,
}

impl Accumulator for SumAccumulator {
    fn accumulate(&mut self, tuple: &Tuple) -> KeyValue {
        let value = (self.mapper)(tuple);
        self.sum += value;
        KeyValue::Int(value)
    }

    fn retract(&mut self, undo: &KeyValue) -> Result<(), CollectorError> {
        match undo {
            KeyValue::Int(value) => {
                self.sum -= value;
                Ok(())
            }
            _ => Err(CollectorError::UndoMismatch),
        }
    }

    fn result(&self) -> KeyValue {
        KeyValue::Int(self.sum)
    }

    fn reset(&mut self) {
        self.sum = 0;
    }
}
