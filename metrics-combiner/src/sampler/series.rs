use std::{fmt, sync::Arc};

use parking_lot::Mutex;

use super::Sampler;
use crate::{
    combiner::Element,
    data::ReducerSource,
    export::SeriesOptions,
    ops::{Arithmetic, InverseOperator, Operator},
};

/// A ring of the last `LEN` values, plus how many were ever written.
#[derive(Clone, Debug)]
struct Ring<T, const LEN: usize> {
    values: [T; LEN],
    next: usize,
    filled: usize,
}

impl<T: Arithmetic, const LEN: usize> Ring<T, LEN> {
    fn new() -> Self {
        Self { values: [T::ZERO; LEN], next: 0, filled: 0 }
    }

    /// Appends `value`, returning `true` when the ring just wrapped around.
    fn push(&mut self, value: T) -> bool {
        self.values[self.next] = value;
        self.next = (self.next + 1) % LEN;
        self.filled = (self.filled + 1).min(LEN);
        self.next == 0
    }

    fn rollup<Op: Operator<T>>(&self, op: &Op) -> T {
        let mut acc = self.values[0];
        for value in &self.values[1..] {
            op.apply(&mut acc, value);
        }
        if Op::DIVIDE_ON_ADDITION {
            acc = acc.divide(LEN as u64);
        }
        acc
    }

    /// Iterates from oldest to newest, over every slot when `fixed_length` or only over the slots
    /// written so far otherwise.
    fn iter(&self, fixed_length: bool) -> impl Iterator<Item = &T> + '_ {
        let skip = if fixed_length { 0 } else { LEN - self.filled };
        (0..LEN).skip(skip).map(move |i| &self.values[(self.next + i) % LEN])
    }
}

/// Trend history of a value: the last 60 seconds, 60 minutes, 24 hours and 30 days.
///
/// Each time a ring wraps around, its values are rolled up with the operator into a single value
/// for the next coarser ring.  Operators for which [`Operator::DIVIDE_ON_ADDITION`] is set are
/// averaged instead, so a per-second sum reads as a per-second sum at every resolution.
#[derive(Clone, Debug)]
pub struct Series<T> {
    second: Ring<T, 60>,
    minute: Ring<T, 60>,
    hour: Ring<T, 24>,
    day: Ring<T, 30>,
}

impl<T: Arithmetic> Default for Series<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T: Arithmetic> Series<T> {
    /// Creates an empty series.
    pub fn new() -> Self {
        Self { second: Ring::new(), minute: Ring::new(), hour: Ring::new(), day: Ring::new() }
    }

    /// Appends the value of the latest second.
    pub fn append<Op: Operator<T>>(&mut self, value: T, op: &Op) {
        if !self.second.push(value) {
            return;
        }
        if !self.minute.push(self.second.rollup(op)) {
            return;
        }
        if !self.hour.push(self.minute.rollup(op)) {
            return;
        }
        self.day.push(self.hour.rollup(op));
    }

    /// Writes the series as `{"label":"trend","data":[[0,v],[1,v],...]}`.
    ///
    /// Points run from the oldest day to the latest second.
    pub fn describe(&self, w: &mut dyn fmt::Write, options: &SeriesOptions) -> fmt::Result {
        let fixed = options.fixed_length;
        let values = self
            .day
            .iter(fixed)
            .chain(self.hour.iter(fixed))
            .chain(self.minute.iter(fixed))
            .chain(self.second.iter(fixed));

        w.write_str("{\"label\":\"trend\",\"data\":[")?;
        for (i, value) in values.enumerate() {
            if i > 0 {
                w.write_char(',')?;
            }
            write!(w, "[{},{}]", i, value)?;
        }
        w.write_str("]}")
    }
}

/// Appends a reducer's value to its [`Series`] once per collection round.
pub struct SeriesSampler<T, Op, Inv>
where
    T: Element,
    Op: Operator<T>,
    Inv: InverseOperator<T>,
{
    source: Arc<ReducerSource<T, Op, Inv>>,
    series: Mutex<Series<T>>,
}

impl<T, Op, Inv> SeriesSampler<T, Op, Inv>
where
    T: Arithmetic + Element,
    Op: Operator<T>,
    Inv: InverseOperator<T>,
{
    pub(crate) fn new(source: Arc<ReducerSource<T, Op, Inv>>) -> Self {
        Self { source, series: Mutex::new(Series::new()) }
    }

    /// Writes the series collected so far.
    pub fn describe(&self, w: &mut dyn fmt::Write, options: &SeriesOptions) -> fmt::Result {
        self.series.lock().describe(w, options)
    }
}

impl<T, Op, Inv> Sampler for SeriesSampler<T, Op, Inv>
where
    T: Arithmetic + Element,
    Op: Operator<T>,
    Inv: InverseOperator<T>,
{
    fn take_sample(&self) {
        let value = self.source.value();
        self.series.lock().append(value, self.source.operator());
    }
}
