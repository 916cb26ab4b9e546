//! Per-group aggregate accumulators.
//!
//! An accumulator walks `Empty -> Open -> Closed` for every group:
//! `create_new_group` opens a group with its first input, `add_row_to_group`
//! feeds the rest and `finish_group` produces the result. While a group is
//! open its partial state can be serialized and later resumed or merged into
//! another accumulator of the same function.

use crate::expression::error::{ErrorKind, ExpressionError, ExpressionResult};
use crate::value::{compare_values, convert, DataType, Value};
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::mem;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum AggregateFunction {
    Count,
    CountBig,
    Sum,
    Avg,
    Min,
    Max,
    StDev,
    StDevP,
    Var,
    VarP,
}

impl AggregateFunction {
    pub fn from_name(name: &str) -> Option<AggregateFunction> {
        Some(match name.to_ascii_uppercase().as_str() {
            "COUNT" => AggregateFunction::Count,
            "COUNT_BIG" => AggregateFunction::CountBig,
            "SUM" => AggregateFunction::Sum,
            "AVG" => AggregateFunction::Avg,
            "MIN" => AggregateFunction::Min,
            "MAX" => AggregateFunction::Max,
            "STDEV" => AggregateFunction::StDev,
            "STDEVP" => AggregateFunction::StDevP,
            "VAR" => AggregateFunction::Var,
            "VARP" => AggregateFunction::VarP,
            _ => return None,
        })
    }

    pub fn name(&self) -> &'static str {
        match self {
            AggregateFunction::Count => "COUNT",
            AggregateFunction::CountBig => "COUNT_BIG",
            AggregateFunction::Sum => "SUM",
            AggregateFunction::Avg => "AVG",
            AggregateFunction::Min => "MIN",
            AggregateFunction::Max => "MAX",
            AggregateFunction::StDev => "STDEV",
            AggregateFunction::StDevP => "STDEVP",
            AggregateFunction::Var => "VAR",
            AggregateFunction::VarP => "VARP",
        }
    }

    pub fn is_count(&self) -> bool {
        matches!(self, AggregateFunction::Count | AggregateFunction::CountBig)
    }

    fn is_statistical(&self) -> bool {
        matches!(
            self,
            AggregateFunction::StDev
                | AggregateFunction::StDevP
                | AggregateFunction::Var
                | AggregateFunction::VarP
        )
    }

    /// Result type for an input of type `input`.
    pub fn result_type(&self, input: DataType) -> ExpressionResult<DataType> {
        let numeric = input.is_numeric() || input == DataType::Bit;
        match self {
            AggregateFunction::Count => Ok(DataType::Int),
            AggregateFunction::CountBig => Ok(DataType::BigInt),
            AggregateFunction::Min | AggregateFunction::Max => Ok(input),
            AggregateFunction::Sum | AggregateFunction::Avg if numeric => Ok(match input {
                DataType::BigInt => DataType::BigInt,
                DataType::Money => DataType::Money,
                DataType::Numeric => DataType::Numeric,
                DataType::Real | DataType::Float => DataType::Float,
                _ => DataType::Int,
            }),
            f if f.is_statistical() && numeric => Ok(DataType::Float),
            _ => Err(ExpressionError::type_mismatch(DataType::Float, input, self.name())),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GroupPhase {
    Empty,
    Open,
    Closed,
}

/// Everything needed to resume accumulation after a merge boundary.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum PartialState {
    Count { count: i64 },
    IntegerSum { sum: i64, count: i64 },
    MoneySum { sum: i64, count: i64 },
    FloatSum { sum: f64, count: i64 },
    Extreme { value: Value },
    Moments { count: i64, sum: f64, sum_squares: f64 },
}

#[derive(Debug, Clone)]
pub struct AggregateAccumulator {
    function: AggregateFunction,
    input_type: DataType,
    result_type: DataType,
    /// `COUNT(*)`: nulls are counted too
    count_all: bool,
    case_sensitive: bool,
    phase: GroupPhase,
    state: PartialState,
    row_count: Option<u64>,
}

impl AggregateAccumulator {
    pub fn new(function: AggregateFunction, input_type: DataType) -> ExpressionResult<Self> {
        let result_type = function.result_type(input_type)?;
        let mut accumulator = Self {
            function,
            input_type,
            result_type,
            count_all: false,
            case_sensitive: false,
            phase: GroupPhase::Empty,
            state: PartialState::Count { count: 0 },
            row_count: None,
        };
        accumulator.state = accumulator.empty_state();
        Ok(accumulator)
    }

    /// `COUNT(*)` or `COUNT_BIG(*)`.
    pub fn count_star(big: bool) -> Self {
        let function = if big {
            AggregateFunction::CountBig
        } else {
            AggregateFunction::Count
        };
        Self {
            function,
            input_type: DataType::Int,
            result_type: if big { DataType::BigInt } else { DataType::Int },
            count_all: true,
            case_sensitive: false,
            phase: GroupPhase::Empty,
            state: PartialState::Count { count: 0 },
            row_count: None,
        }
    }

    /// Case sensitivity of `MIN`/`MAX` over character input.
    pub fn with_case_sensitivity(mut self, case_sensitive: bool) -> Self {
        self.case_sensitive = case_sensitive;
        self
    }

    pub fn function(&self) -> AggregateFunction {
        self.function
    }

    pub fn input_type(&self) -> DataType {
        self.input_type
    }

    pub fn result_type(&self) -> DataType {
        self.result_type
    }

    pub fn phase(&self) -> GroupPhase {
        self.phase
    }

    pub fn is_count_star(&self) -> bool {
        self.count_all
    }

    fn empty_state(&self) -> PartialState {
        match self.function {
            AggregateFunction::Count | AggregateFunction::CountBig => PartialState::Count { count: 0 },
            AggregateFunction::Min | AggregateFunction::Max => PartialState::Extreme { value: Value::Null },
            AggregateFunction::Sum | AggregateFunction::Avg => match self.result_type {
                DataType::Int | DataType::BigInt => PartialState::IntegerSum { sum: 0, count: 0 },
                DataType::Money => PartialState::MoneySum { sum: 0, count: 0 },
                _ => PartialState::FloatSum { sum: 0.0, count: 0 },
            },
            _ => PartialState::Moments {
                count: 0,
                sum: 0.0,
                sum_squares: 0.0,
            },
        }
    }

    fn invalid(&self, call: &str) -> ExpressionError {
        ErrorKind::InvalidAggregateState {
            call: format!("{}.{}", self.function.name(), call),
            state: format!("{:?}", self.phase),
        }
        .into()
    }

    /// Answer `finish_group` from a known row count instead of counting rows.
    /// Only `COUNT(*)` can take the shortcut.
    pub fn use_row_count(&mut self, rows: u64) -> ExpressionResult<()> {
        if !self.count_all {
            return Err(self.invalid("use_row_count"));
        }
        log::debug!("{}(*) answered from a row count of {}", self.function.name(), rows);
        self.row_count = Some(rows);
        Ok(())
    }

    pub fn create_new_group(&mut self, value: &Value) -> ExpressionResult<()> {
        if self.phase == GroupPhase::Open {
            return Err(self.invalid("create_new_group"));
        }
        self.state = self.empty_state();
        self.phase = GroupPhase::Open;
        self.accumulate(value)
    }

    pub fn add_row_to_group(&mut self, value: &Value) -> ExpressionResult<()> {
        if self.phase != GroupPhase::Open {
            return Err(self.invalid("add_row_to_group"));
        }
        self.accumulate(value)
    }

    /// Close the group and produce its result. Finishing a group that was
    /// never opened yields the empty-input result.
    pub fn finish_group(&mut self) -> ExpressionResult<Value> {
        match self.phase {
            GroupPhase::Closed => return Err(self.invalid("finish_group")),
            GroupPhase::Empty => self.state = self.empty_state(),
            GroupPhase::Open => {}
        }
        self.phase = GroupPhase::Closed;
        if let Some(rows) = self.row_count {
            return convert(Value::BigInt(rows as i64), self.result_type);
        }
        self.result()
    }

    fn accumulate(&mut self, value: &Value) -> ExpressionResult<()> {
        if self.row_count.is_some() {
            return Ok(());
        }
        if value.is_null() {
            if let (true, PartialState::Count { count }) = (self.count_all, &mut self.state) {
                *count += 1;
            }
            return Ok(());
        }
        let overflow = ExpressionError::overflow(self.result_type);
        match &mut self.state {
            PartialState::Count { count } => *count += 1,
            PartialState::IntegerSum { sum, count } => {
                let v = convert(value.clone(), DataType::BigInt)?
                    .as_i64()
                    .ok_or_else(|| ExpressionError::conversion_failed(value, DataType::BigInt))?;
                *sum = sum.checked_add(v).ok_or(overflow)?;
                *count += 1;
            }
            PartialState::MoneySum { sum, count } => {
                let Value::Money(v) = convert(value.clone(), DataType::Money)? else {
                    return Err(ExpressionError::conversion_failed(value, DataType::Money));
                };
                *sum = sum.checked_add(v).ok_or(overflow)?;
                *count += 1;
            }
            PartialState::FloatSum { sum, count } => {
                *sum += float_input(value)?;
                *count += 1;
            }
            PartialState::Extreme { value: current } => {
                let candidate = convert(value.clone(), self.input_type)?;
                let wanted = if self.function == AggregateFunction::Min {
                    Ordering::Less
                } else {
                    Ordering::Greater
                };
                if current.is_null()
                    || compare_values(&candidate, current, self.case_sensitive)? == Some(wanted)
                {
                    *current = candidate;
                }
            }
            PartialState::Moments {
                count,
                sum,
                sum_squares,
            } => {
                let x = float_input(value)?;
                *count += 1;
                *sum += x;
                *sum_squares += x * x;
            }
        }
        Ok(())
    }

    fn result(&self) -> ExpressionResult<Value> {
        let average = self.function == AggregateFunction::Avg;
        match &self.state {
            PartialState::Count { count } => convert(Value::BigInt(*count), self.result_type),
            PartialState::IntegerSum { count: 0, .. }
            | PartialState::MoneySum { count: 0, .. }
            | PartialState::FloatSum { count: 0, .. } => Ok(Value::Null),
            PartialState::IntegerSum { sum, count } => {
                let v = if average { sum / count } else { *sum };
                convert(Value::BigInt(v), self.result_type)
            }
            PartialState::MoneySum { sum, count } => {
                Ok(Value::Money(if average { sum / count } else { *sum }))
            }
            PartialState::FloatSum { sum, count } => {
                let v = if average { sum / *count as f64 } else { *sum };
                convert(Value::Float(v), self.result_type)
            }
            PartialState::Extreme { value } => Ok(value.clone()),
            PartialState::Moments {
                count,
                sum,
                sum_squares,
            } => {
                let population = matches!(
                    self.function,
                    AggregateFunction::StDevP | AggregateFunction::VarP
                );
                let n = *count as f64;
                let divisor = if population { n } else { n - 1.0 };
                if divisor <= 0.0 {
                    return Ok(Value::Null);
                }
                let variance = ((sum_squares - sum * sum / n) / divisor).max(0.0);
                Ok(Value::Float(match self.function {
                    AggregateFunction::StDev | AggregateFunction::StDevP => variance.sqrt(),
                    _ => variance,
                }))
            }
        }
    }

    /// Opaque bytes capturing the open group's partial state.
    pub fn serialize_state(&self) -> ExpressionResult<Vec<u8>> {
        if self.phase != GroupPhase::Open {
            return Err(self.invalid("serialize_state"));
        }
        bincode::serialize(&self.state).map_err(|e| {
            ExpressionError::evaluation(format!("failed to serialize aggregate state: {}", e))
        })
    }

    fn decode(&self, bytes: &[u8]) -> ExpressionResult<PartialState> {
        let state: PartialState = bincode::deserialize(bytes).map_err(|e| {
            ExpressionError::evaluation(format!("failed to deserialize aggregate state: {}", e))
        })?;
        if mem::discriminant(&state) != mem::discriminant(&self.empty_state()) {
            return Err(ErrorKind::InvalidAggregateState {
                call: format!("{}.deserialize_state", self.function.name()),
                state: format!("{:?}", state),
            }
            .into());
        }
        Ok(state)
    }

    /// Resume a group from serialized state; the group is open afterwards.
    pub fn deserialize_state(&mut self, bytes: &[u8]) -> ExpressionResult<()> {
        if self.phase == GroupPhase::Open {
            return Err(self.invalid("deserialize_state"));
        }
        self.state = self.decode(bytes)?;
        self.phase = GroupPhase::Open;
        Ok(())
    }

    /// Fold another partial state of the same function into the open group.
    pub fn merge_state(&mut self, bytes: &[u8]) -> ExpressionResult<()> {
        if self.phase != GroupPhase::Open {
            return Err(self.invalid("merge_state"));
        }
        let other = self.decode(bytes)?;
        if let PartialState::Extreme { value } = &other {
            return self.accumulate(value);
        }
        let overflow = ExpressionError::overflow(self.result_type);
        match (&mut self.state, other) {
            (PartialState::Count { count }, PartialState::Count { count: c }) => *count += c,
            (
                PartialState::IntegerSum { sum, count },
                PartialState::IntegerSum { sum: s, count: c },
            )
            | (PartialState::MoneySum { sum, count }, PartialState::MoneySum { sum: s, count: c }) => {
                *sum = sum.checked_add(s).ok_or(overflow)?;
                *count += c;
            }
            (PartialState::FloatSum { sum, count }, PartialState::FloatSum { sum: s, count: c }) => {
                *sum += s;
                *count += c;
            }
            (
                PartialState::Moments {
                    count,
                    sum,
                    sum_squares,
                },
                PartialState::Moments {
                    count: c,
                    sum: s,
                    sum_squares: q,
                },
            ) => {
                *count += c;
                *sum += s;
                *sum_squares += q;
            }
            _ => return Err(self.invalid("merge_state")),
        }
        Ok(())
    }
}

fn float_input(value: &Value) -> ExpressionResult<f64> {
    convert(value.clone(), DataType::Float)?
        .as_f64()
        .ok_or_else(|| ExpressionError::conversion_failed(value, DataType::Float))
}

/// What the executor knows about the query an aggregate runs in.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct QueryShape {
    pub has_where: bool,
    pub has_group_by: bool,
    pub aggregate_count: usize,
    /// A single table or a cross join of tables, with no filtering operator
    pub plain_source: bool,
}

/// Decides when `COUNT(*)` may be answered from the source's row count.
pub struct CountShortcut;

impl CountShortcut {
    pub fn eligible(shape: &QueryShape, accumulator: &AggregateAccumulator) -> bool {
        accumulator.is_count_star()
            && !shape.has_where
            && !shape.has_group_by
            && shape.aggregate_count == 1
            && shape.plain_source
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn run(function: AggregateFunction, input: DataType, values: &[Value]) -> Value {
        let mut acc = AggregateAccumulator::new(function, input).unwrap();
        let (first, rest) = values.split_first().unwrap();
        acc.create_new_group(first).unwrap();
        for v in rest {
            acc.add_row_to_group(v).unwrap();
        }
        acc.finish_group().unwrap()
    }

    fn ints(values: &[i32]) -> Vec<Value> {
        values.iter().map(|v| Value::Int(*v)).collect()
    }

    #[test]
    fn test_sum_round_trip_through_serialization() {
        let mut acc = AggregateAccumulator::new(AggregateFunction::Sum, DataType::Int).unwrap();
        acc.create_new_group(&Value::Int(5)).unwrap();
        let bytes = acc.serialize_state().unwrap();

        let mut resumed = AggregateAccumulator::new(AggregateFunction::Sum, DataType::Int).unwrap();
        resumed.deserialize_state(&bytes).unwrap();
        resumed.add_row_to_group(&Value::Int(3)).unwrap();

        acc.add_row_to_group(&Value::Int(3)).unwrap();
        assert_eq!(resumed.finish_group().unwrap(), Value::Int(8));
        assert_eq!(acc.finish_group().unwrap(), Value::Int(8));
    }

    #[test]
    fn test_avg_and_stdev() {
        assert_eq!(run(AggregateFunction::Avg, DataType::Int, &ints(&[2, 4, 6])), Value::Int(4));
        // integer input averages with integer division
        assert_eq!(run(AggregateFunction::Avg, DataType::Int, &ints(&[1, 2])), Value::Int(1));

        let data = ints(&[2, 4, 4, 4, 5, 5, 7, 9]);
        let Value::Float(stdev) = run(AggregateFunction::StDev, DataType::Int, &data) else {
            panic!("expected float");
        };
        assert!((stdev - 2.138_089_935_299_395).abs() < 1e-12);
        let Value::Float(stdevp) = run(AggregateFunction::StDevP, DataType::Int, &data) else {
            panic!("expected float");
        };
        assert!((stdevp - 2.0).abs() < 1e-12);
        assert_eq!(
            run(AggregateFunction::VarP, DataType::Int, &data),
            Value::Float(4.0)
        );
    }

    #[test]
    fn test_stdev_of_single_value_is_null() {
        assert_eq!(run(AggregateFunction::StDev, DataType::Float, &[Value::Float(3.0)]), Value::Null);
        assert_eq!(
            run(AggregateFunction::StDevP, DataType::Float, &[Value::Float(3.0)]),
            Value::Float(0.0)
        );
    }

    #[test]
    fn test_nulls_are_ignored() {
        let data = vec![Value::Null, Value::Int(3), Value::Null];
        assert_eq!(run(AggregateFunction::Sum, DataType::Int, &data), Value::Int(3));
        assert_eq!(run(AggregateFunction::Count, DataType::Int, &data), Value::Int(1));
        assert_eq!(run(AggregateFunction::Sum, DataType::Int, &[Value::Null]), Value::Null);
        assert_eq!(run(AggregateFunction::Count, DataType::Int, &[Value::Null]), Value::Int(0));

        let mut star = AggregateAccumulator::count_star(true);
        star.create_new_group(&Value::Null).unwrap();
        star.add_row_to_group(&Value::Null).unwrap();
        assert_eq!(star.finish_group().unwrap(), Value::BigInt(2));
    }

    #[test]
    fn test_min_max_keep_first_of_equals() {
        let data = vec![
            Value::String("b".into()),
            Value::String("A".into()),
            Value::String("a".into()),
            Value::String("c".into()),
        ];
        assert_eq!(
            run(AggregateFunction::Min, DataType::NVarChar, &data),
            Value::String("A".into())
        );
        assert_eq!(
            run(AggregateFunction::Max, DataType::NVarChar, &data),
            Value::String("c".into())
        );
        assert_eq!(
            run(AggregateFunction::Max, DataType::Int, &ints(&[3, 9, 2])),
            Value::Int(9)
        );
    }

    #[test]
    fn test_result_types() {
        let sum_type = |t| AggregateFunction::Sum.result_type(t).unwrap();
        assert_eq!(sum_type(DataType::TinyInt), DataType::Int);
        assert_eq!(sum_type(DataType::BigInt), DataType::BigInt);
        assert_eq!(sum_type(DataType::Money), DataType::Money);
        assert_eq!(sum_type(DataType::Real), DataType::Float);
        assert_eq!(
            AggregateFunction::Max.result_type(DataType::DateTime).unwrap(),
            DataType::DateTime
        );
        let err = AggregateFunction::Avg.result_type(DataType::NVarChar).unwrap_err();
        assert!(matches!(err.kind, ErrorKind::TypeMismatch { .. }));
    }

    #[test]
    fn test_money_sum_and_overflow() {
        let data = vec![Value::money(1, 2_500), Value::money(2, 5_000)];
        assert_eq!(run(AggregateFunction::Sum, DataType::Money, &data), Value::money(3, 7_500));

        let mut acc = AggregateAccumulator::new(AggregateFunction::Sum, DataType::Int).unwrap();
        acc.create_new_group(&Value::Int(i32::MAX)).unwrap();
        acc.add_row_to_group(&Value::Int(1)).unwrap();
        let err = acc.finish_group().unwrap_err();
        assert!(matches!(err.kind, ErrorKind::ArithmeticOverflow { .. }));
    }

    #[test]
    fn test_call_sequence_is_enforced() {
        let mut acc = AggregateAccumulator::new(AggregateFunction::Sum, DataType::Int).unwrap();
        let err = acc.add_row_to_group(&Value::Int(1)).unwrap_err();
        assert!(matches!(err.kind, ErrorKind::InvalidAggregateState { .. }));
        assert!(acc.serialize_state().is_err());

        // an empty group finishes with the empty-input result
        assert_eq!(acc.finish_group().unwrap(), Value::Null);
        assert!(acc.finish_group().is_err());

        acc.create_new_group(&Value::Int(1)).unwrap();
        assert!(acc.create_new_group(&Value::Int(1)).is_err());
        assert_eq!(acc.finish_group().unwrap(), Value::Int(1));
    }

    #[test]
    fn test_merge_state() {
        let mut left = AggregateAccumulator::new(AggregateFunction::Avg, DataType::Float).unwrap();
        left.create_new_group(&Value::Float(1.0)).unwrap();
        left.add_row_to_group(&Value::Float(2.0)).unwrap();

        let mut right = AggregateAccumulator::new(AggregateFunction::Avg, DataType::Float).unwrap();
        right.create_new_group(&Value::Float(6.0)).unwrap();
        left.merge_state(&right.serialize_state().unwrap()).unwrap();
        assert_eq!(left.finish_group().unwrap(), Value::Float(3.0));

        let mut max = AggregateAccumulator::new(AggregateFunction::Max, DataType::Int).unwrap();
        max.create_new_group(&Value::Int(4)).unwrap();
        let mut other = AggregateAccumulator::new(AggregateFunction::Max, DataType::Int).unwrap();
        other.create_new_group(&Value::Int(10)).unwrap();
        max.merge_state(&other.serialize_state().unwrap()).unwrap();
        assert_eq!(max.finish_group().unwrap(), Value::Int(10));
    }

    #[test]
    fn test_mismatched_state_is_rejected() {
        let mut sum = AggregateAccumulator::new(AggregateFunction::Sum, DataType::Int).unwrap();
        sum.create_new_group(&Value::Int(1)).unwrap();
        let bytes = sum.serialize_state().unwrap();

        let mut stdev = AggregateAccumulator::new(AggregateFunction::StDev, DataType::Int).unwrap();
        let err = stdev.deserialize_state(&bytes).unwrap_err();
        assert!(matches!(err.kind, ErrorKind::InvalidAggregateState { .. }));
    }

    #[test]
    fn test_count_shortcut_is_equivalent() {
        let rows = 5u64;
        let mut counted = AggregateAccumulator::count_star(false);
        counted.create_new_group(&Value::Null).unwrap();
        for _ in 1..rows {
            counted.add_row_to_group(&Value::Int(1)).unwrap();
        }

        let shape = QueryShape {
            aggregate_count: 1,
            plain_source: true,
            ..QueryShape::default()
        };
        let mut shortcut = AggregateAccumulator::count_star(false);
        assert!(CountShortcut::eligible(&shape, &shortcut));
        shortcut.use_row_count(rows).unwrap();
        shortcut.create_new_group(&Value::Null).unwrap();
        assert_eq!(shortcut.finish_group().unwrap(), counted.finish_group().unwrap());

        let filtered = QueryShape {
            has_where: true,
            ..shape
        };
        assert!(!CountShortcut::eligible(&filtered, &shortcut));
        let column_count = AggregateAccumulator::new(AggregateFunction::Count, DataType::Int).unwrap();
        assert!(!CountShortcut::eligible(&shape, &column_count));
    }
}
