use crate::kinematics::{EventParameters, KinematicsError};
use crate::padmap::ExclusionSet;
use crate::trigger::{MultiplicitySignal, RawEvent, Trigger, TriggerSignals};
use bon::bon;
use std::fmt;

/// Event parameter generation from relativistic two-body kinematics.
pub mod kinematics;
/// Pad plane cabling and excluded channels.
pub mod padmap;
/// Trigger front-end: discrimination, multiplicity, decision.
pub mod trigger;

/// A trait that defines the interface for an observer of the simulation.
///
/// The default implementation of all methods is a no-op. Users are expected to
/// override the methods they are interested in.
#[allow(unused_variables)]
pub trait Observer {
    /// Called when a sampled parameter row is dropped as unphysical.
    fn on_row_excluded(&mut self, reason: &KinematicsError) {}
    /// Called with the traces that feed the trigger front-end, after excluded
    /// pads have been removed.
    fn on_raw_event(&mut self, event: &RawEvent) {}
    /// Called with the per-pad trigger primitives of an event.
    fn on_trigger_signals(&mut self, signals: &TriggerSignals) {}
    /// Called with the per-board multiplicity of an event.
    fn on_multiplicity(&mut self, multiplicity: &MultiplicitySignal) {}
    /// Called with the decision record of an event.
    fn on_result(&mut self, result: &TriggerResult) {}
}

/// The null observer.
impl Observer for () {}

/// One sample along a simulated trajectory.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct TrackSample {
    pub x: f64,
    pub y: f64,
    pub z: f64,
    pub energy: f64,
}

/// Ordered trajectory samples produced by a [`Tracker`].
pub type Track = Vec<TrackSample>;

/// External particle-propagation collaborator.
pub trait Tracker {
    type Error: std::error::Error + Send + Sync + 'static;

    fn track_particle(&self, params: &EventParameters) -> Result<Track, Self::Error>;
}

/// External induced-signal collaborator: turns trajectory positions and
/// energies into per-pad traces.
pub trait EventGenerator {
    type Error: std::error::Error + Send + Sync + 'static;

    fn make_event(
        &self,
        positions: &[[f64; 3]],
        energies: &[f64],
    ) -> Result<RawEvent, Self::Error>;
}

/// Decision record of one simulated event.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct TriggerResult {
    /// Pads with any signal, after exclusion.
    pub pads_hit: usize,
    pub triggered: bool,
}

/// The error type for a failed external collaborator.
///
/// A failure concerns a single event and is propagated to the caller; whether
/// to retry the event is the caller's policy.
#[derive(Debug)]
pub enum UpstreamError {
    Tracker(Box<dyn std::error::Error + Send + Sync>),
    EventGenerator(Box<dyn std::error::Error + Send + Sync>),
}

impl fmt::Display for UpstreamError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Tracker(_) => write!(f, "external tracker failed"),
            Self::EventGenerator(_) => write!(f, "external event generator failed"),
        }
    }
}

impl std::error::Error for UpstreamError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::Tracker(e) | Self::EventGenerator(e) => {
                let source: &(dyn std::error::Error + 'static) = e.as_ref();
                Some(source)
            }
        }
    }
}

/// The per-event simulation pipeline.
///
/// Holds the two external collaborators plus the immutable trigger
/// configuration and exclusion set. Apart from the observer, no state is
/// carried between events: running the same parameters against the same
/// collaborators yields the same result, and independent workers can each own
/// a `Simulator` with no coordination.
pub struct Simulator<T, G, O> {
    tracker: T,
    event_generator: G,
    exclusion: ExclusionSet,
    trigger: Trigger,
    observer: O,
}

#[bon]
impl<T, G, O> Simulator<T, G, O> {
    #[builder]
    pub fn new(
        tracker: T,
        event_generator: G,
        #[builder(default)] exclusion: ExclusionSet,
        trigger: Trigger,
        observer: O,
    ) -> Self {
        Self {
            tracker,
            event_generator,
            exclusion,
            trigger,
            observer,
        }
    }
}

impl<T, G, O> Simulator<T, G, O>
where
    T: Tracker,
    G: EventGenerator,
    O: Observer,
{
    /// Simulates a single event: track the recoil, synthesize its pad
    /// signals, drop excluded pads, and run the trigger front-end.
    ///
    /// Excluded pads are removed outright, so they count neither toward
    /// `pads_hit` nor toward multiplicity.
    pub fn run(&mut self, params: &EventParameters) -> Result<TriggerResult, UpstreamError> {
        let track = self
            .tracker
            .track_particle(params)
            .map_err(|e| UpstreamError::Tracker(Box::new(e)))?;

        let positions: Vec<[f64; 3]> = track.iter().map(|s| [s.x, s.y, s.z]).collect();
        let energies: Vec<f64> = track.iter().map(|s| s.energy).collect();
        let mut event = self
            .event_generator
            .make_event(&positions, &energies)
            .map_err(|e| UpstreamError::EventGenerator(Box::new(e)))?;

        event.retain(|pad, _| !self.exclusion.contains(*pad));
        self.observer.on_raw_event(&event);

        let signals = self.trigger.find_trigger_signals(&event);
        self.observer.on_trigger_signals(&signals);

        let multiplicity = self.trigger.find_multiplicity_signals(&signals);
        self.observer.on_multiplicity(&multiplicity);

        let result = TriggerResult {
            pads_hit: event.len(),
            triggered: self.trigger.did_trigger(&multiplicity),
        };
        self.observer.on_result(&result);

        Ok(result)
    }

    /// Runs every parameter row in order, stopping at the first collaborator
    /// failure.
    pub fn run_batch(
        &mut self,
        params: &[EventParameters],
    ) -> Result<Vec<TriggerResult>, UpstreamError> {
        params.iter().map(|row| self.run(row)).collect()
    }

    /// Consumes the simulator and returns its observer.
    pub fn into_observer(self) -> O {
        self.observer
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::padmap::PadMap;
    use crate::trigger::Positive;
    use std::convert::Infallible;

    fn params() -> EventParameters {
        EventParameters {
            x0: 0.0,
            y0: 0.0,
            z0: 0.5,
            recoil_energy: 10.0,
            azimuth: 1.0,
            polar: 2.0,
        }
    }

    struct NullTracker;

    impl Tracker for NullTracker {
        type Error = Infallible;

        fn track_particle(&self, _params: &EventParameters) -> Result<Track, Self::Error> {
            Ok(vec![TrackSample {
                x: 0.0,
                y: 0.0,
                z: 0.5,
                energy: 10.0,
            }])
        }
    }

    struct FixedEventGenerator {
        event: RawEvent,
    }

    impl EventGenerator for FixedEventGenerator {
        type Error = Infallible;

        fn make_event(
            &self,
            _positions: &[[f64; 3]],
            _energies: &[f64],
        ) -> Result<RawEvent, Self::Error> {
            Ok(self.event.clone())
        }
    }

    #[derive(Debug)]
    struct Broken;

    impl fmt::Display for Broken {
        fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
            write!(f, "broken collaborator")
        }
    }

    impl std::error::Error for Broken {}

    struct BrokenTracker;

    impl Tracker for BrokenTracker {
        type Error = Broken;

        fn track_particle(&self, _params: &EventParameters) -> Result<Track, Self::Error> {
            Err(Broken)
        }
    }

    #[derive(Default)]
    struct TestObserver {
        raw_events: Vec<RawEvent>,
        signals: Vec<TriggerSignals>,
        multiplicities: Vec<MultiplicitySignal>,
        results: Vec<TriggerResult>,
    }

    impl Observer for TestObserver {
        fn on_raw_event(&mut self, event: &RawEvent) {
            self.raw_events.push(event.clone());
        }

        fn on_trigger_signals(&mut self, signals: &TriggerSignals) {
            self.signals.push(signals.clone());
        }

        fn on_multiplicity(&mut self, multiplicity: &MultiplicitySignal) {
            self.multiplicities.push(multiplicity.clone());
        }

        fn on_result(&mut self, result: &TriggerResult) {
            self.results.push(*result);
        }
    }

    fn two_pad_map() -> PadMap {
        "0,0,0,0,5\n0,0,0,1,6".parse().unwrap()
    }

    fn trigger(map: &PadMap, multiplicity_threshold: u32) -> Trigger {
        Trigger::builder()
            .pad_threshold(100.0)
            .signal_width(Positive::new(1).unwrap())
            .multiplicity_threshold(Positive::new(multiplicity_threshold).unwrap())
            .multiplicity_window(Positive::new(8).unwrap())
            .padmap(map)
            .build()
    }

    fn two_pad_event() -> RawEvent {
        // Pad 5 crosses the 100.0 threshold, pad 6 stays below it.
        RawEvent::from([(5, vec![0.0, 150.0, 0.0]), (6, vec![0.0, 40.0, 0.0])])
    }

    #[test]
    fn one_firing_pad_triggers_at_threshold_one() {
        let map = two_pad_map();
        let mut simulator = Simulator::builder()
            .tracker(NullTracker)
            .event_generator(FixedEventGenerator {
                event: two_pad_event(),
            })
            .trigger(trigger(&map, 1))
            .observer(TestObserver::default())
            .build();

        let result = simulator.run(&params()).unwrap();

        assert_eq!(
            result,
            TriggerResult {
                pads_hit: 2,
                triggered: true,
            }
        );
        let observer = simulator.into_observer();
        assert_eq!(observer.raw_events[0].len(), 2);
        assert_eq!(observer.signals[0].len(), 1);
        assert_eq!(observer.multiplicities[0].max_count(), 1);
        assert_eq!(observer.results, vec![result]);
    }

    #[test]
    fn excluding_the_firing_pad_kills_the_trigger() {
        let map = two_pad_map();
        let exclusion = map.apply_exclusion("0,0,0,0 inhibit").unwrap();
        let mut simulator = Simulator::builder()
            .tracker(NullTracker)
            .event_generator(FixedEventGenerator {
                event: two_pad_event(),
            })
            .exclusion(exclusion)
            .trigger(trigger(&map, 1))
            .observer(TestObserver::default())
            .build();

        let result = simulator.run(&params()).unwrap();

        assert_eq!(
            result,
            TriggerResult {
                pads_hit: 1,
                triggered: false,
            }
        );
        // The excluded pad is gone entirely, not zeroed.
        let observer = simulator.into_observer();
        assert!(!observer.raw_events[0].contains_key(&5));
    }

    #[test]
    fn exclusion_never_increases_pads_hit() {
        let map = two_pad_map();
        let exclusion = map.apply_exclusion("0,0,0,1 low_gain").unwrap();

        let mut bare = Simulator::builder()
            .tracker(NullTracker)
            .event_generator(FixedEventGenerator {
                event: two_pad_event(),
            })
            .trigger(trigger(&map, 1))
            .observer(())
            .build();
        let mut excluded = Simulator::builder()
            .tracker(NullTracker)
            .event_generator(FixedEventGenerator {
                event: two_pad_event(),
            })
            .exclusion(exclusion)
            .trigger(trigger(&map, 1))
            .observer(())
            .build();

        let with_all = bare.run(&params()).unwrap();
        let with_exclusion = excluded.run(&params()).unwrap();

        assert!(with_exclusion.pads_hit <= with_all.pads_hit);
    }

    #[test]
    fn multiplicity_threshold_two_needs_two_pads() {
        let map = two_pad_map();
        // Both pads above threshold, but only one left on the board after
        // exclusion.
        let event = RawEvent::from([(5, vec![0.0, 150.0]), (6, vec![0.0, 140.0])]);
        let exclusion = map.apply_exclusion("0,0,0,0 inhibit").unwrap();

        let mut simulator = Simulator::builder()
            .tracker(NullTracker)
            .event_generator(FixedEventGenerator { event })
            .exclusion(exclusion)
            .trigger(trigger(&map, 2))
            .observer(())
            .build();

        let result = simulator.run(&params()).unwrap();

        assert_eq!(
            result,
            TriggerResult {
                pads_hit: 1,
                triggered: false,
            }
        );
    }

    #[test]
    fn tracker_failure_propagates() {
        let map = two_pad_map();
        let mut simulator = Simulator::builder()
            .tracker(BrokenTracker)
            .event_generator(FixedEventGenerator {
                event: two_pad_event(),
            })
            .trigger(trigger(&map, 1))
            .observer(())
            .build();

        let error = simulator.run(&params()).unwrap_err();

        assert!(matches!(error, UpstreamError::Tracker(_)));
        assert_eq!(
            std::error::Error::source(&error).unwrap().to_string(),
            "broken collaborator"
        );
    }

    #[test]
    fn run_batch_repeats_identical_results() {
        let map = two_pad_map();
        let mut simulator = Simulator::builder()
            .tracker(NullTracker)
            .event_generator(FixedEventGenerator {
                event: two_pad_event(),
            })
            .trigger(trigger(&map, 1))
            .observer(())
            .build();

        let rows = [params(), params(), params()];
        let results = simulator.run_batch(&rows).unwrap();

        assert_eq!(results.len(), 3);
        assert!(results.windows(2).all(|w| w[0] == w[1]));
    }
}
