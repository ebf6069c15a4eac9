use crate::padmap::{PadId, PadMap};
use bon::bon;
use num_traits::Zero;
use std::collections::BTreeMap;

/// A value that is guaranteed to be strictly greater than zero.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Positive<T>(T);

impl<T> Positive<T>
where
    T: Zero + PartialOrd,
{
    /// Returns `None` unless `value` is strictly positive.
    ///
    /// # Examples
    ///
    /// ```
    /// use deteff::trigger::Positive;
    ///
    /// assert!(Positive::new(5).is_some());
    /// assert!(Positive::new(0).is_none());
    /// ```
    pub fn new(value: T) -> Option<Self> {
        (value > T::zero()).then_some(Self(value))
    }
}

impl<T> Positive<T> {
    pub fn inner(&self) -> &T {
        &self.0
    }
    pub fn into_inner(self) -> T {
        self.0
    }
}

/// Per-pad traces of an event, indexed by logical pad number.
pub type RawEvent = BTreeMap<PadId, Vec<f64>>;

/// Threshold crossing of a single pad trace.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct TriggerPrimitive {
    /// Time bucket of the first sample above threshold.
    pub time_bucket: usize,
}

/// Per-pad trigger primitives of an event.
pub type TriggerSignals = BTreeMap<PadId, TriggerPrimitive>;

/// Index of the first sample of `trace` strictly above `threshold`.
///
/// Stateless and side-effect free, so traces can be discriminated
/// independently, in parallel, in any order.
///
/// # Examples
///
/// ```
/// use deteff::trigger::discriminate;
///
/// assert_eq!(discriminate(&[0.0, 120.0, 80.0], 100.0), Some(1));
/// assert_eq!(discriminate(&[0.0, 80.0], 100.0), None);
/// ```
pub fn discriminate<T>(trace: &[T], threshold: T) -> Option<usize>
where
    T: PartialOrd + Copy,
{
    trace.iter().position(|&sample| sample > threshold)
}

/// Per-board coincidence counts.
///
/// For every CoBo with at least one firing pad, `counts` holds one bin per
/// candidate coincidence-window start: the number of pads whose trigger gate
/// overlaps a window opening at that time bucket.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct MultiplicitySignal {
    counts: BTreeMap<u8, Vec<u32>>,
}

impl MultiplicitySignal {
    /// Builds a signal directly from per-board bins.
    pub fn from_counts<I>(counts: I) -> Self
    where
        I: IntoIterator<Item = (u8, Vec<u32>)>,
    {
        Self {
            counts: counts.into_iter().collect(),
        }
    }
    /// Count for one board at one window start. Boards with no firing pad and
    /// window starts past the last crossing count zero.
    pub fn count(&self, cobo: u8, window_start: usize) -> u32 {
        self.counts
            .get(&cobo)
            .and_then(|bins| bins.get(window_start))
            .copied()
            .unwrap_or(0)
    }
    /// Largest coincidence count over all boards and window starts.
    pub fn max_count(&self) -> u32 {
        self.counts
            .values()
            .flatten()
            .copied()
            .max()
            .unwrap_or(0)
    }
    pub fn cobos(&self) -> impl Iterator<Item = u8> + '_ {
        self.counts.keys().copied()
    }
}

/// Trigger front-end of the readout: per-pad discrimination, per-board
/// multiplicity, and the final fire/no-fire decision.
///
/// The pad-to-board grouping is derived from the pad map once at construction;
/// it is a static property of the cabling, not of any event.
#[derive(Clone, Debug)]
pub struct Trigger {
    pad_threshold: f64,
    signal_width: Positive<usize>,
    multiplicity_threshold: Positive<u32>,
    multiplicity_window: Positive<usize>,
    grouping: BTreeMap<PadId, u8>,
}

#[bon]
impl Trigger {
    /// # Examples
    ///
    /// ```
    /// use deteff::padmap::PadMap;
    /// use deteff::trigger::{Positive, Trigger};
    ///
    /// let map: PadMap = "0,0,0,0,5\n0,0,0,1,6".parse()?;
    /// let trigger = Trigger::builder()
    ///     .pad_threshold(100.0)
    ///     .signal_width(Positive::new(5).unwrap())
    ///     .multiplicity_threshold(Positive::new(2).unwrap())
    ///     .multiplicity_window(Positive::new(40).unwrap())
    ///     .padmap(&map)
    ///     .build();
    /// # Ok::<(), Box<dyn std::error::Error>>(())
    /// ```
    #[builder]
    pub fn new(
        /// Trace amplitude a pad must exceed to fire.
        pad_threshold: f64,
        /// Time buckets a crossing keeps its trigger line asserted.
        signal_width: Positive<usize>,
        /// Pads that must fire in coincidence on one board.
        multiplicity_threshold: Positive<u32>,
        /// Length of the coincidence window, in time buckets.
        multiplicity_window: Positive<usize>,
        padmap: &PadMap,
    ) -> Self {
        let grouping = padmap.pads().map(|(pad, addr)| (pad, addr.cobo)).collect();

        Self {
            pad_threshold,
            signal_width,
            multiplicity_threshold,
            multiplicity_window,
            grouping,
        }
    }
}

impl Trigger {
    /// Discriminates every trace of an event into a trigger primitive. Pads
    /// that never cross threshold yield no primitive.
    pub fn find_trigger_signals(&self, event: &RawEvent) -> TriggerSignals {
        event
            .iter()
            .filter_map(|(&pad, trace)| {
                discriminate(trace, self.pad_threshold)
                    .map(|time_bucket| (pad, TriggerPrimitive { time_bucket }))
            })
            .collect()
    }

    /// Counts coincident firings per board.
    ///
    /// Each primitive asserts its board's line for `signal_width` buckets
    /// starting at the crossing. A pad joins the window opening at bucket `t`
    /// if its asserted gate overlaps `[t, t + multiplicity_window)`.
    pub fn find_multiplicity_signals(&self, signals: &TriggerSignals) -> MultiplicitySignal {
        let width = *self.signal_width.inner();
        let window = *self.multiplicity_window.inner();

        let mut crossings: BTreeMap<u8, Vec<usize>> = BTreeMap::new();
        for (pad, primitive) in signals {
            let Some(&cobo) = self.grouping.get(pad) else {
                continue;
            };
            crossings.entry(cobo).or_default().push(primitive.time_bucket);
        }

        let counts = crossings
            .into_iter()
            .map(|(cobo, buckets)| {
                // Window starts after the last crossing cannot add pads.
                let horizon = buckets.iter().max().copied().unwrap_or(0) + 1;
                let mut bins = vec![0u32; horizon];
                for &bucket in &buckets {
                    let lo = bucket.saturating_sub(window - 1);
                    let hi = (bucket + width).min(horizon);
                    for bin in &mut bins[lo..hi] {
                        *bin += 1;
                    }
                }
                (cobo, bins)
            })
            .collect();

        MultiplicitySignal { counts }
    }

    /// Fires iff some board reaches the multiplicity threshold within one
    /// coincidence window. Monotonic: raising any bin cannot turn a fired
    /// decision into a non-fired one.
    pub fn did_trigger(&self, multiplicity: &MultiplicitySignal) -> bool {
        multiplicity.max_count() >= *self.multiplicity_threshold.inner()
    }
}
