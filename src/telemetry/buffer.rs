//! # Sliding-Window Time-Series Buffer
//!
//! Column-oriented storage for one telemetry stream. Every column has the
//! same length and index `i` across all columns describes one sample.
//!
//! ## Window
//!
//! After every insertion, samples are evicted from the front while
//! `t[last] - t[first] > window`. Eviction never removes the newest sample,
//! so a non-empty buffer stays non-empty.
//!
//! ## Sharing
//!
//! [`SharedBuffer`] wraps the buffer in `Arc<Mutex<_>>`. Ingest and snapshot
//! take the same lock, so a snapshot can never observe a half-appended or
//! half-evicted state.

use serde::Serialize;
use std::collections::VecDeque;
use std::marker::PhantomData;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use super::sample::Schema;
use crate::error::BufferError;

/// Windowed, index-aligned columns for schema `S`
#[derive(Debug, Clone)]
pub struct TimeSeriesBuffer<S: Schema> {
    window: f64,
    columns: Vec<VecDeque<f64>>,
    _schema: PhantomData<S>,
}

impl<S: Schema> TimeSeriesBuffer<S> {
    /// Creates an empty buffer keeping `window` time units of history.
    ///
    /// # Arguments
    ///
    /// * `window` - Maximum newest-minus-oldest timestamp span. Must be positive;
    ///   non-positive values keep only the newest sample.
    pub fn new(window: f64) -> Self {
        Self {
            window,
            columns: vec![VecDeque::new(); S::arity()],
            _schema: PhantomData,
        }
    }

    /// Configured window span
    pub fn window(&self) -> f64 {
        self.window
    }

    /// Number of buffered samples
    pub fn len(&self) -> usize {
        self.columns[0].len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Newest-minus-oldest timestamp, zero for fewer than two samples
    pub fn span(&self) -> f64 {
        let t = &self.columns[0];
        match (t.front(), t.back()) {
            (Some(first), Some(last)) => last - first,
            _ => 0.0,
        }
    }

    /// Appends one sample and evicts stale ones.
    ///
    /// # Errors
    ///
    /// Returns [`BufferError::OutOfOrder`] if `sample` is older than the newest
    /// buffered sample. The buffer is left unchanged.
    pub fn ingest(&mut self, sample: S) -> Result<(), BufferError> {
        let t = sample.timestamp();
        if let Some(&newest) = self.columns[0].back() {
            if t < newest {
                return Err(BufferError::OutOfOrder { stream: S::STREAM, t, newest });
            }
        }

        for (index, column) in self.columns.iter_mut().enumerate() {
            column.push_back(sample.value(index));
        }
        self.evict();
        Ok(())
    }

    /// Appends one sample given as raw column values in file order.
    ///
    /// # Errors
    ///
    /// Returns [`BufferError::FieldCount`] if `values` does not match the schema
    /// arity, or [`BufferError::OutOfOrder`] as for [`ingest`](Self::ingest).
    pub fn ingest_fields(&mut self, values: &[f64]) -> Result<(), BufferError> {
        let sample = S::from_values(values).ok_or(BufferError::FieldCount {
            stream: S::STREAM,
            expected: S::arity(),
            found: values.len(),
        })?;
        self.ingest(sample)
    }

    fn evict(&mut self) {
        while self.len() > 1 && self.span() > self.window {
            for column in &mut self.columns {
                column.pop_front();
            }
        }
    }

    /// Immutable copy of every column
    pub fn snapshot(&self) -> Snapshot {
        Snapshot {
            stream: S::STREAM,
            fields: S::FIELDS,
            columns: self
                .columns
                .iter()
                .map(|column| column.iter().copied().collect())
                .collect(),
        }
    }
}

/// Point-in-time copy of a buffer, handed to renderers
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Snapshot {
    pub stream: &'static str,
    pub fields: &'static [&'static str],
    pub columns: Vec<Vec<f64>>,
}

impl Snapshot {
    /// Empty snapshot for schema `S`
    pub fn empty<S: Schema>() -> Self {
        Self {
            stream: S::STREAM,
            fields: S::FIELDS,
            columns: vec![Vec::new(); S::arity()],
        }
    }

    pub fn len(&self) -> usize {
        self.columns.first().map_or(0, Vec::len)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Column by field name
    pub fn column(&self, field: &str) -> Option<&[f64]> {
        let index = self.fields.iter().position(|&name| name == field)?;
        self.columns.get(index).map(Vec::as_slice)
    }

    /// Timestamp column
    pub fn timestamps(&self) -> &[f64] {
        self.columns.first().map_or(&[], Vec::as_slice)
    }

    /// Newest-minus-oldest timestamp
    pub fn span(&self) -> f64 {
        match self.timestamps() {
            [first, .., last] => last - first,
            _ => 0.0,
        }
    }
}

/// Thread-safe handle to a [`TimeSeriesBuffer`]
#[derive(Debug)]
pub struct SharedBuffer<S: Schema> {
    inner: Arc<Mutex<TimeSeriesBuffer<S>>>,
}

impl<S: Schema> Clone for SharedBuffer<S> {
    fn clone(&self) -> Self {
        Self { inner: Arc::clone(&self.inner) }
    }
}

impl<S: Schema> SharedBuffer<S> {
    pub fn new(window: f64) -> Self {
        Self {
            inner: Arc::new(Mutex::new(TimeSeriesBuffer::new(window))),
        }
    }

    // Ingest never leaves the buffer inconsistent mid-panic, so a poisoned
    // lock still guards valid data.
    fn lock(&self) -> MutexGuard<'_, TimeSeriesBuffer<S>> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Ingest one sample under the lock
    pub fn ingest(&self, sample: S) -> Result<(), BufferError> {
        self.lock().ingest(sample)
    }

    /// Ingest one sample from raw values under the lock
    pub fn ingest_fields(&self, values: &[f64]) -> Result<(), BufferError> {
        self.lock().ingest_fields(values)
    }

    /// Ingest a parsed batch inside a single critical section.
    ///
    /// Every sample is attempted; rejected ones are returned alongside their
    /// error so the caller can report them.
    pub fn ingest_all<I>(&self, samples: I) -> Vec<(S, BufferError)>
    where
        I: IntoIterator<Item = S>,
    {
        let mut buffer = self.lock();
        samples
            .into_iter()
            .filter_map(|sample| buffer.ingest(sample).err().map(|e| (sample, e)))
            .collect()
    }

    /// Consistent copy of the current contents
    pub fn snapshot(&self) -> Snapshot {
        self.lock().snapshot()
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::telemetry::sample::{AccSample, PwmSample};

    fn acc(t: f64) -> AccSample {
        AccSample { t, x: t * 10.0, y: -t, z: 9.81 }
    }

    #[test]
    fn test_new_buffer_is_empty() {
        let buffer = TimeSeriesBuffer::<AccSample>::new(2.0);
        assert!(buffer.is_empty());
        assert_eq!(buffer.span(), 0.0);

        let snapshot = buffer.snapshot();
        assert!(snapshot.is_empty());
        assert_eq!(snapshot.columns.len(), 4, "Empty snapshot still has every column");
    }

    #[test]
    fn test_window_holds_after_every_ingest() {
        let mut buffer = TimeSeriesBuffer::<AccSample>::new(2.0);

        for step in 0..100 {
            buffer.ingest(acc(step as f64 * 0.13)).unwrap();
            assert!(buffer.span() <= 2.0, "span {} exceeds window", buffer.span());
            assert!(!buffer.is_empty());
        }
    }

    #[test]
    fn test_eviction_keeps_boundary_sample() {
        let mut buffer = TimeSeriesBuffer::<AccSample>::new(2.0);
        buffer.ingest(acc(0.0)).unwrap();
        buffer.ingest(acc(1.0)).unwrap();
        buffer.ingest(acc(2.0)).unwrap();

        // Span of exactly the window is allowed
        assert_eq!(buffer.len(), 3);

        buffer.ingest(acc(2.5)).unwrap();
        assert_eq!(buffer.snapshot().timestamps(), &[1.0, 2.0, 2.5]);
    }

    #[test]
    fn test_large_gap_keeps_only_newest_sample() {
        let mut buffer = TimeSeriesBuffer::<AccSample>::new(2.0);
        buffer.ingest(acc(0.0)).unwrap();
        buffer.ingest(acc(0.5)).unwrap();
        buffer.ingest(acc(100.0)).unwrap();

        assert_eq!(buffer.len(), 1, "Eviction stops at one sample");
        assert_eq!(buffer.snapshot().timestamps(), &[100.0]);
    }

    #[test]
    fn test_columns_stay_aligned_after_eviction() {
        let mut buffer = TimeSeriesBuffer::<AccSample>::new(1.0);
        for step in 0..10 {
            buffer.ingest(acc(step as f64 * 0.4)).unwrap();
        }

        let snapshot = buffer.snapshot();
        let t = snapshot.column("t").unwrap();
        let x = snapshot.column("x").unwrap();
        let y = snapshot.column("y").unwrap();
        let z = snapshot.column("z").unwrap();
        assert_eq!(t.len(), x.len());
        assert_eq!(t.len(), y.len());
        assert_eq!(t.len(), z.len());
        for (i, &time) in t.iter().enumerate() {
            assert_eq!(x[i], time * 10.0);
            assert_eq!(y[i], -time);
        }
    }

    #[test]
    fn test_equal_timestamps_are_accepted() {
        let mut buffer = TimeSeriesBuffer::<AccSample>::new(2.0);
        buffer.ingest(acc(1.0)).unwrap();
        buffer.ingest(acc(1.0)).unwrap();
        assert_eq!(buffer.len(), 2);
    }

    #[test]
    fn test_out_of_order_sample_is_rejected() {
        let mut buffer = TimeSeriesBuffer::<AccSample>::new(2.0);
        buffer.ingest(acc(1.0)).unwrap();

        let err = buffer.ingest(acc(0.5)).unwrap_err();
        assert_eq!(err, BufferError::OutOfOrder { stream: "acc", t: 0.5, newest: 1.0 });
        assert_eq!(buffer.len(), 1, "Rejected sample must not be stored");
    }

    #[test]
    fn test_ingest_fields_checks_arity() {
        let mut buffer = TimeSeriesBuffer::<PwmSample>::new(2.0);

        let err = buffer.ingest_fields(&[0.0, 1.0, 2.0, 3.0, 4.0, 5.0]).unwrap_err();
        assert_eq!(
            err,
            BufferError::FieldCount { stream: "pwm", expected: 7, found: 6 }
        );
        assert!(buffer.is_empty());

        buffer.ingest_fields(&[0.0, 1.0, 2.0, 3.0, 4.0, 5.0, 6.0]).unwrap();
        assert_eq!(buffer.snapshot().column("z_freq"), Some(&[6.0][..]));
    }

    #[test]
    fn test_snapshot_unknown_column() {
        let snapshot = Snapshot::empty::<PwmSample>();
        assert!(snapshot.column("nope").is_none());
        assert_eq!(snapshot.column("x_cmd"), Some(&[][..]));
        assert_eq!(snapshot.span(), 0.0);
    }

    #[test]
    fn test_snapshot_is_detached_from_buffer() {
        let shared = SharedBuffer::<AccSample>::new(2.0);
        shared.ingest(acc(0.0)).unwrap();
        let before = shared.snapshot();

        shared.ingest(acc(0.1)).unwrap();
        assert_eq!(before.len(), 1);
        assert_eq!(shared.snapshot().len(), 2);
    }

    #[test]
    fn test_ingest_all_reports_rejects_and_keeps_going() {
        let shared = SharedBuffer::<AccSample>::new(2.0);
        let rejected = shared.ingest_all([acc(1.0), acc(0.5), acc(1.5)]);

        assert_eq!(rejected.len(), 1);
        assert_eq!(rejected[0].0.t, 0.5);
        assert_eq!(shared.snapshot().timestamps(), &[1.0, 1.5]);
    }

    #[test]
    fn test_concurrent_ingest_and_snapshot_stay_consistent() {
        let shared = SharedBuffer::<PwmSample>::new(0.5);
        let writer = {
            let shared = shared.clone();
            std::thread::spawn(move || {
                for step in 0..2000 {
                    let t = step as f64 * 0.001;
                    shared.ingest_fields(&[t, t, t, t, t, t, t]).unwrap();
                }
            })
        };

        for _ in 0..200 {
            let snapshot = shared.snapshot();
            let len = snapshot.len();
            assert!(snapshot.columns.iter().all(|column| column.len() == len));
            assert!(snapshot.span() <= 0.5);
        }

        writer.join().unwrap();
        assert!(!shared.is_empty());
    }
}
