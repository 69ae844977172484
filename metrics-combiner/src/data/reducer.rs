use std::{
    fmt,
    marker::PhantomData,
    ops::Shl,
    sync::{Arc, Weak},
};

use once_cell::sync::OnceCell;
use tracing::error;

use crate::{
    combiner::{AgentCombiner, Combine, Element},
    export::{CacheMetrics, MetricValue, SeriesError, SeriesOptions, Variable},
    ops::{AddTo, Arithmetic, InverseOperator, MaxTo, MinTo, MinusFrom, Operator, VoidOp},
    sampler::{ReducerSampler, SampleSource, Sampler, SeriesSampler},
    window::Windowed,
    Runtime,
};

/// Folds agent values with an [`Operator`].
pub struct ReduceOp<T, Op> {
    op: Op,
    _marker: PhantomData<fn() -> T>,
}

impl<T, Op> Combine for ReduceOp<T, Op>
where
    T: Element,
    Op: Operator<T>,
{
    type Result = T;
    type Element = T;

    fn result_identity(&self) -> T {
        self.op.identity()
    }

    fn element_identity(&self) -> T {
        self.op.identity()
    }

    #[inline]
    fn fold(&self, result: &mut T, element: T) {
        self.op.apply(result, &element);
    }
}

/// The combined state of a [`Reducer`], shared with its samplers.
pub struct ReducerSource<T, Op, Inv>
where
    T: Element,
    Op: Operator<T>,
    Inv: InverseOperator<T>,
{
    combiner: AgentCombiner<ReduceOp<T, Op>>,
    inv: Inv,
}

impl<T, Op, Inv> ReducerSource<T, Op, Inv>
where
    T: Element,
    Op: Operator<T>,
    Inv: InverseOperator<T>,
{
    /// Gets the operator values are reduced with.
    pub fn operator(&self) -> &Op {
        &self.combiner.op().op
    }

    /// Gets the current value.
    pub fn value(&self) -> T {
        self.combiner.combine_agents()
    }
}

impl<T, Op, Inv> SampleSource for ReducerSource<T, Op, Inv>
where
    T: Element,
    Op: Operator<T>,
    Inv: InverseOperator<T>,
{
    type Value = T;
    const INVERTIBLE: bool = Inv::INVERTIBLE;

    fn get_value(&self) -> T {
        self.combiner.combine_agents()
    }

    fn reset(&self) -> T {
        self.combiner.reset_all_agents()
    }

    fn identity(&self) -> T {
        self.operator().identity()
    }

    fn reduce(&self, acc: &mut T, value: &T) {
        self.operator().apply(acc, value);
    }

    fn invert(&self, acc: &mut T, value: &T) {
        self.inv.apply_inverse(acc, value);
    }
}

/// A value reduced from every thread writing to it.
///
/// Writes go to the calling thread's agent and never contend with other writers.  Reads fold
/// every thread's value together.  When `Inv` is a real inverse of `Op`, windows over the reducer
/// are computed in constant time.
pub struct Reducer<T, Op, Inv = VoidOp>
where
    T: Element,
    Op: Operator<T>,
    Inv: InverseOperator<T>,
{
    source: Arc<ReducerSource<T, Op, Inv>>,
    sampler: OnceCell<Arc<ReducerSampler<ReducerSource<T, Op, Inv>>>>,
    series: OnceCell<Arc<SeriesSampler<T, Op, Inv>>>,
}

/// Sums values.
pub type Adder<T> = Reducer<T, AddTo, MinusFrom>;

/// Keeps the largest value.
pub type Maxer<T> = Reducer<T, MaxTo>;

/// Keeps the smallest value.
pub type Miner<T> = Reducer<T, MinTo>;

impl<T, Op, Inv> Reducer<T, Op, Inv>
where
    T: Element,
    Op: Operator<T>,
    Inv: InverseOperator<T>,
{
    /// Creates a new reducer.
    pub fn new() -> Self
    where
        Op: Default,
    {
        Self::with_operator(Op::default())
    }

    /// Creates a new reducer using `op`.
    pub fn with_operator(op: Op) -> Self {
        let combiner = AgentCombiner::new(ReduceOp { op, _marker: PhantomData });
        Self {
            source: Arc::new(ReducerSource { combiner, inv: Inv::default() }),
            sampler: OnceCell::new(),
            series: OnceCell::new(),
        }
    }

    /// Reduces `value` into the calling thread's agent.
    ///
    /// The write is dropped if no agent can be created for the calling thread.
    #[inline]
    pub fn record(&self, value: T) {
        if let Some(agent) = self.source.combiner.get_or_create_tls_agent() {
            let op = self.source.operator();
            agent.modify(|local| op.apply(local, &value));
        }
    }

    /// Gets the current value.
    pub fn get_value(&self) -> T {
        self.source.value()
    }

    /// Resets the value to identity, returning the prior value.
    ///
    /// A reducer without an inverse is drained by its window sampler once one is attached, and
    /// resetting it from elsewhere would corrupt every window.  In that case this logs an error,
    /// leaves the value untouched and returns identity.
    pub fn reset(&self) -> T {
        if !Inv::INVERTIBLE && self.sampler.get().is_some() {
            error!("reset() is not allowed on a windowed reducer without an inverse operator");
            return self.source.identity();
        }
        self.source.combiner.reset_all_agents()
    }

    /// Gets the operator values are reduced with.
    pub fn operator(&self) -> &Op {
        self.source.operator()
    }

    /// Number of threads currently holding an agent for this reducer.
    pub fn live_agents(&self) -> usize {
        self.source.combiner.live_agents()
    }
}

impl<T, Op, Inv> Default for Reducer<T, Op, Inv>
where
    T: Element,
    Op: Operator<T> + Default,
    Inv: InverseOperator<T>,
{
    fn default() -> Self {
        Self::new()
    }
}

impl<T, Op, Inv> Reducer<T, Op, Inv>
where
    T: Arithmetic + Element,
    Op: Operator<T>,
    Inv: InverseOperator<T>,
{
    /// Starts keeping a trend history of the value, sampled by `runtime`.
    pub fn enable_series(&self, runtime: &Runtime) {
        self.series.get_or_init(|| {
            let series = Arc::new(SeriesSampler::new(Arc::clone(&self.source)));
            let weak = Arc::downgrade(&series);
            let weak: Weak<dyn Sampler> = weak;
            runtime.schedule(weak);
            series
        });
    }

    /// Writes the trend history of the value.
    pub fn describe_series(
        &self,
        w: &mut dyn fmt::Write,
        options: &SeriesOptions,
    ) -> Result<(), SeriesError> {
        let series = self.series.get().ok_or(SeriesError::NotAvailable)?;
        series.describe(w, options)?;
        Ok(())
    }
}

impl<'a, T, Op, Inv> Shl<T> for &'a Reducer<T, Op, Inv>
where
    T: Element,
    Op: Operator<T>,
    Inv: InverseOperator<T>,
{
    type Output = &'a Reducer<T, Op, Inv>;

    #[inline]
    fn shl(self, value: T) -> Self::Output {
        self.record(value);
        self
    }
}

impl<T, Op, Inv> Windowed for Reducer<T, Op, Inv>
where
    T: Element,
    Op: Operator<T>,
    Inv: InverseOperator<T>,
{
    type Source = ReducerSource<T, Op, Inv>;

    fn sampler(&self, runtime: &Runtime) -> Arc<ReducerSampler<Self::Source>> {
        let sampler = self.sampler.get_or_init(|| {
            let sampler = Arc::new(ReducerSampler::new(Arc::clone(&self.source), runtime.clock()));
            let weak = Arc::downgrade(&sampler);
            let weak: Weak<dyn Sampler> = weak;
            runtime.schedule(weak);
            sampler
        });
        Arc::clone(sampler)
    }
}

impl<T, Op, Inv> Variable for Reducer<T, Op, Inv>
where
    T: Arithmetic + Element,
    Op: Operator<T>,
    Inv: InverseOperator<T>,
{
    fn describe(&self, w: &mut dyn fmt::Write, _quote_string: bool) -> fmt::Result {
        write!(w, "{}", self.get_value())
    }

    fn describe_series(
        &self,
        w: &mut dyn fmt::Write,
        options: &SeriesOptions,
    ) -> Result<(), SeriesError> {
        Reducer::describe_series(self, w, options)
    }

    fn collect_metrics(&self, metrics: &mut CacheMetrics) {
        metrics.set_value(MetricValue::Gauge(self.get_value().as_f64()));
    }

    fn enable_series(&self, runtime: &Runtime) {
        Reducer::enable_series(self, runtime);
    }
}
