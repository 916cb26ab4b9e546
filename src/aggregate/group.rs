//! Grouped aggregation over input already sorted by group key.

use crate::aggregate::accumulator::AggregateAccumulator;
use crate::expression::error::{ExpressionError, ExpressionResult};
use crate::value::Value;

/// The accumulators of one `SELECT` list, driven together. Input row `i`
/// feeds accumulator `i`.
#[derive(Debug, Clone)]
pub struct AggregateSet {
    accumulators: Vec<AggregateAccumulator>,
}

impl AggregateSet {
    pub fn new(accumulators: Vec<AggregateAccumulator>) -> Self {
        Self { accumulators }
    }

    pub fn len(&self) -> usize {
        self.accumulators.len()
    }

    pub fn is_empty(&self) -> bool {
        self.accumulators.is_empty()
    }

    pub fn accumulators(&self) -> &[AggregateAccumulator] {
        &self.accumulators
    }

    fn check_width(&self, width: usize) -> ExpressionResult<()> {
        if width != self.accumulators.len() {
            return Err(ExpressionError::evaluation(format!(
                "aggregate input has {} values for {} aggregates",
                width,
                self.accumulators.len()
            )));
        }
        Ok(())
    }

    pub fn create_new_group(&mut self, inputs: &[Value]) -> ExpressionResult<()> {
        self.check_width(inputs.len())?;
        for (acc, value) in self.accumulators.iter_mut().zip(inputs) {
            acc.create_new_group(value)?;
        }
        Ok(())
    }

    pub fn add_row_to_group(&mut self, inputs: &[Value]) -> ExpressionResult<()> {
        self.check_width(inputs.len())?;
        for (acc, value) in self.accumulators.iter_mut().zip(inputs) {
            acc.add_row_to_group(value)?;
        }
        Ok(())
    }

    pub fn finish_group(&mut self) -> ExpressionResult<Vec<Value>> {
        self.accumulators
            .iter_mut()
            .map(AggregateAccumulator::finish_group)
            .collect()
    }

    pub fn serialize_states(&self) -> ExpressionResult<Vec<Vec<u8>>> {
        self.accumulators
            .iter()
            .map(AggregateAccumulator::serialize_state)
            .collect()
    }

    pub fn deserialize_states(&mut self, states: &[Vec<u8>]) -> ExpressionResult<()> {
        self.check_width(states.len())?;
        for (acc, bytes) in self.accumulators.iter_mut().zip(states) {
            acc.deserialize_state(bytes)?;
        }
        Ok(())
    }

    pub fn merge_states(&mut self, states: &[Vec<u8>]) -> ExpressionResult<()> {
        self.check_width(states.len())?;
        for (acc, bytes) in self.accumulators.iter_mut().zip(states) {
            acc.merge_state(bytes)?;
        }
        Ok(())
    }
}

/// Stream `(key, inputs)` rows sorted by key and emit one `(key, results)`
/// per run of equal keys.
pub fn aggregate_sorted<K, I>(set: &mut AggregateSet, rows: I) -> ExpressionResult<Vec<(K, Vec<Value>)>>
where
    K: PartialEq,
    I: IntoIterator<Item = (K, Vec<Value>)>,
{
    let mut output = Vec::new();
    let mut current: Option<K> = None;
    for (key, inputs) in rows {
        if current.as_ref() == Some(&key) {
            set.add_row_to_group(&inputs)?;
            continue;
        }
        if let Some(done) = current.take() {
            output.push((done, set.finish_group()?));
        }
        set.create_new_group(&inputs)?;
        current = Some(key);
    }
    if let Some(done) = current {
        output.push((done, set.finish_group()?));
    }
    log::debug!("aggregated {} groups", output.len());
    Ok(output)
}

/// Combine serialized partial states (one per accumulator) sorted by key,
/// as produced by independent passes over disjoint input.
pub fn merge_sorted<K, I>(set: &mut AggregateSet, partials: I) -> ExpressionResult<Vec<(K, Vec<Value>)>>
where
    K: PartialEq,
    I: IntoIterator<Item = (K, Vec<Vec<u8>>)>,
{
    let mut output = Vec::new();
    let mut current: Option<K> = None;
    for (key, states) in partials {
        if current.as_ref() == Some(&key) {
            set.merge_states(&states)?;
            continue;
        }
        if let Some(done) = current.take() {
            output.push((done, set.finish_group()?));
        }
        set.deserialize_states(&states)?;
        current = Some(key);
    }
    if let Some(done) = current {
        output.push((done, set.finish_group()?));
    }
    Ok(output)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::aggregate::accumulator::AggregateFunction;
    use crate::value::DataType;

    fn sum_and_count() -> AggregateSet {
        AggregateSet::new(vec![
            AggregateAccumulator::new(AggregateFunction::Sum, DataType::Int).unwrap(),
            AggregateAccumulator::count_star(false),
        ])
    }

    #[test]
    fn test_aggregate_sorted() {
        let rows = vec![
            ("a", vec![Value::Int(1), Value::Null]),
            ("a", vec![Value::Int(2), Value::Null]),
            ("b", vec![Value::Null, Value::Null]),
            ("c", vec![Value::Int(7), Value::Null]),
        ];
        let mut set = sum_and_count();
        let groups = aggregate_sorted(&mut set, rows).unwrap();
        assert_eq!(
            groups,
            vec![
                ("a", vec![Value::Int(3), Value::Int(2)]),
                ("b", vec![Value::Null, Value::Int(1)]),
                ("c", vec![Value::Int(7), Value::Int(1)]),
            ]
        );
    }

    #[test]
    fn test_merge_sorted_matches_single_pass() {
        let left = vec![(1, vec![Value::Int(5), Value::Null]), (2, vec![Value::Int(1), Value::Null])];
        let right = vec![(1, vec![Value::Int(3), Value::Null])];

        let mut partials = Vec::new();
        for part in [left.clone(), right.clone()] {
            let mut set = sum_and_count();
            for (key, inputs) in part {
                set.create_new_group(&inputs).unwrap();
                partials.push((key, set.serialize_states().unwrap()));
                set.finish_group().unwrap();
            }
        }
        partials.sort_by_key(|(k, _)| *k);

        let mut merged = sum_and_count();
        let result = merge_sorted(&mut merged, partials).unwrap();

        let mut all: Vec<_> = left.into_iter().chain(right).collect();
        all.sort_by_key(|(k, _)| *k);
        let mut single = sum_and_count();
        assert_eq!(result, aggregate_sorted(&mut single, all).unwrap());
        assert_eq!(result[0].1, vec![Value::Int(8), Value::Int(2)]);
    }

    #[test]
    fn test_width_mismatch() {
        let mut set = sum_and_count();
        assert!(set.create_new_group(&[Value::Int(1)]).is_err());
    }
}
