use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use winnow::ascii::{dec_uint, newline};
use winnow::combinator::{alt, opt, separated, terminated};
use winnow::error::ContextError;
use winnow::Parser;

/// Logical identifier of a single pad on the pad plane.
pub type PadId = u16;

/// Hardware address of a pad in the GET electronics.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct PadAddress {
    pub cobo: u8,
    pub asad: u8,
    pub aget: u8,
    pub channel: u8,
}

impl fmt::Display for PadAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{},{},{},{}",
            self.cobo, self.asad, self.aget, self.channel
        )
    }
}

/// Bijection between logical pad numbers and hardware addresses.
///
/// The map is immutable after construction; every lookup table derived from it
/// (e.g. the trigger grouping) can therefore be built once and shared freely.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct PadMap {
    forward: BTreeMap<PadId, PadAddress>,
    reverse: BTreeMap<PadAddress, PadId>,
}

impl PadMap {
    /// Builds a map from `(address, pad)` records, rejecting any record that
    /// would break the bijection.
    ///
    /// # Examples
    ///
    /// ```
    /// use deteff::padmap::{PadAddress, PadMap};
    ///
    /// let addr = PadAddress { cobo: 0, asad: 0, aget: 0, channel: 0 };
    /// let map = PadMap::from_records([(addr, 5)])?;
    /// assert_eq!(map.pad_at(addr), Some(5));
    /// # Ok::<(), deteff::padmap::IntegrityError>(())
    /// ```
    pub fn from_records<I>(records: I) -> Result<Self, IntegrityError>
    where
        I: IntoIterator<Item = (PadAddress, PadId)>,
    {
        let mut forward = BTreeMap::new();
        let mut reverse = BTreeMap::new();
        for (address, pad) in records {
            if forward.insert(pad, address).is_some() {
                return Err(IntegrityError::DuplicatePad(pad));
            }
            if reverse.insert(address, pad).is_some() {
                return Err(IntegrityError::DuplicateAddress(address));
            }
        }

        Ok(Self { forward, reverse })
    }
    /// Returns the hardware address wired to a logical pad.
    pub fn address_of(&self, pad: PadId) -> Option<PadAddress> {
        self.forward.get(&pad).copied()
    }
    /// Returns the logical pad wired to a hardware address.
    pub fn pad_at(&self, address: PadAddress) -> Option<PadId> {
        self.reverse.get(&address).copied()
    }
    /// Iterates over all `(pad, address)` pairs in pad order.
    pub fn pads(&self) -> impl Iterator<Item = (PadId, PadAddress)> + '_ {
        self.forward.iter().map(|(&pad, &address)| (pad, address))
    }
    pub fn len(&self) -> usize {
        self.forward.len()
    }
    pub fn is_empty(&self) -> bool {
        self.forward.is_empty()
    }
    /// Resolves an exclusion descriptor against this map.
    ///
    /// The descriptor has one entry per line: a hardware address followed by
    /// the reason the channel does not participate in the trigger, either
    /// `inhibit` (trigger inhibited in the electronics configuration) or
    /// `low_gain` (channel configured with a non-default gain).
    ///
    /// # Examples
    ///
    /// ```
    /// use deteff::padmap::PadMap;
    ///
    /// let map: PadMap = "0,0,0,0,5\n0,0,0,1,6".parse()?;
    /// let exclusion = map.apply_exclusion("0,0,0,0 inhibit")?;
    /// assert!(exclusion.contains(5));
    /// assert!(!exclusion.contains(6));
    /// # Ok::<(), Box<dyn std::error::Error>>(())
    /// ```
    pub fn apply_exclusion(&self, input: &str) -> Result<ExclusionSet, ExclusionError> {
        let entries: Vec<(PadAddress, ExclusionKind)> =
            terminated(separated(0.., exclusion_entry, newline), opt(newline))
                .parse(input)
                .map_err(|e| ExclusionError::Parse(ParseError::from_parse(e)))?;

        let mut excluded = BTreeSet::new();
        let mut low_gain = BTreeSet::new();
        for (address, kind) in entries {
            let pad = self
                .pad_at(address)
                .ok_or(ExclusionError::UnknownAddress(address))?;
            match kind {
                ExclusionKind::Inhibit => excluded.insert(pad),
                ExclusionKind::LowGain => low_gain.insert(pad),
            };
        }

        Ok(ExclusionSet { excluded, low_gain })
    }
}

impl std::str::FromStr for PadMap {
    type Err = PadMapError;

    /// Parse a [`PadMap`] from the pad-map file format: one record per line,
    /// `cobo,asad,aget,channel,pad`, where the last field is the logical pad
    /// number.
    ///
    /// # Examples
    ///
    /// ```no_run
    /// # use deteff::padmap::PadMap;
    /// let string = std::fs::read_to_string("padmap.csv")?;
    /// let map: PadMap = string.parse()?;
    /// # Ok::<(), Box<dyn std::error::Error>>(())
    /// ```
    fn from_str(input: &str) -> Result<Self, Self::Err> {
        let records: Vec<(PadAddress, PadId)> =
            terminated(separated(0.., record, newline), opt(newline))
                .parse(input)
                .map_err(|e| PadMapError::Parse(ParseError::from_parse(e)))?;

        Self::from_records(records).map_err(PadMapError::Integrity)
    }
}

/// Pads removed from the trigger path, partitioned by reason.
///
/// Both partitions are treated identically downstream: a pad in either set is
/// dropped from the raw event before the trigger front-end sees it.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct ExclusionSet {
    excluded: BTreeSet<PadId>,
    low_gain: BTreeSet<PadId>,
}

impl ExclusionSet {
    /// Returns `true` if the pad is excluded for any reason.
    pub fn contains(&self, pad: PadId) -> bool {
        self.excluded.contains(&pad) || self.low_gain.contains(&pad)
    }
    /// Iterates over the union of both partitions.
    pub fn iter(&self) -> impl Iterator<Item = PadId> + '_ {
        self.excluded.union(&self.low_gain).copied()
    }
    pub fn excluded(&self) -> &BTreeSet<PadId> {
        &self.excluded
    }
    pub fn low_gain(&self) -> &BTreeSet<PadId> {
        &self.low_gain
    }
    pub fn len(&self) -> usize {
        self.iter().count()
    }
    pub fn is_empty(&self) -> bool {
        self.excluded.is_empty() && self.low_gain.is_empty()
    }
}

#[derive(Clone, Copy, Debug)]
enum ExclusionKind {
    Inhibit,
    LowGain,
}

fn address(input: &mut &str) -> winnow::Result<PadAddress> {
    let cobo = dec_uint.parse_next(input)?;
    let _ = ",".parse_next(input)?;
    let asad = dec_uint.parse_next(input)?;
    let _ = ",".parse_next(input)?;
    let aget = dec_uint.parse_next(input)?;
    let _ = ",".parse_next(input)?;
    let channel = dec_uint.parse_next(input)?;

    Ok(PadAddress {
        cobo,
        asad,
        aget,
        channel,
    })
}

fn record(input: &mut &str) -> winnow::Result<(PadAddress, PadId)> {
    let addr = address.parse_next(input)?;
    let _ = ",".parse_next(input)?;
    let pad = dec_uint.parse_next(input)?;

    Ok((addr, pad))
}

fn exclusion_entry(input: &mut &str) -> winnow::Result<(PadAddress, ExclusionKind)> {
    let addr = address.parse_next(input)?;
    let _ = " ".parse_next(input)?;
    let kind = alt((
        "inhibit".value(ExclusionKind::Inhibit),
        "low_gain".value(ExclusionKind::LowGain),
    ))
    .parse_next(input)?;

    Ok((addr, kind))
}

/// The error type returned when a pad-map or exclusion line is malformed.
#[derive(Debug)]
pub struct ParseError {
    input: String,
    span: std::ops::Range<usize>,
}

impl ParseError {
    fn from_parse(error: winnow::error::ParseError<&str, ContextError>) -> Self {
        let input = error.input().to_string();
        let span = error.char_span();
        Self { input, span }
    }
}

impl fmt::Display for ParseError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let message = annotate_snippets::Level::Error
            .title("invalid record starting here")
            .snippet(
                annotate_snippets::Snippet::source(&self.input)
                    .fold(true)
                    .annotation(annotate_snippets::Level::Error.span(self.span.clone())),
            );
        let renderer = annotate_snippets::Renderer::plain();
        let rendered = renderer.render(message);
        rendered.fmt(f)
    }
}

impl std::error::Error for ParseError {}

/// The error type returned when two records claim the same pad or address.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum IntegrityError {
    DuplicatePad(PadId),
    DuplicateAddress(PadAddress),
}

impl fmt::Display for IntegrityError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::DuplicatePad(pad) => write!(f, "pad `{pad}` is mapped more than once"),
            Self::DuplicateAddress(address) => {
                write!(f, "hardware address `{address}` is mapped more than once")
            }
        }
    }
}

impl std::error::Error for IntegrityError {}

/// The error type returned when parsing a [`PadMap`] fails.
#[derive(Debug)]
pub enum PadMapError {
    Parse(ParseError),
    Integrity(IntegrityError),
}

impl fmt::Display for PadMapError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Parse(e) => e.fmt(f),
            Self::Integrity(e) => e.fmt(f),
        }
    }
}

impl std::error::Error for PadMapError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::Parse(e) => Some(e),
            Self::Integrity(e) => Some(e),
        }
    }
}

/// The error type returned when resolving an exclusion descriptor fails.
#[derive(Debug)]
pub enum ExclusionError {
    Parse(ParseError),
    /// The descriptor references a hardware address that is not in the map.
    UnknownAddress(PadAddress),
}

impl fmt::Display for ExclusionError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Parse(e) => e.fmt(f),
            Self::UnknownAddress(address) => {
                write!(f, "hardware address `{address}` is not in the pad map")
            }
        }
    }
}

impl std::error::Error for ExclusionError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::Parse(e) => Some(e),
            Self::UnknownAddress(_) => None,
        }
    }
}
