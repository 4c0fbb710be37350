//! Query construction: classify requested streams into usage classes and
//! build the predicate rules that narrow the settings database.
//!
//! Each requested stream binds to one virtual sink (`video0..video2`,
//! `still0..still2`). Under the coupled policy both classes merge into one
//! query served by a single pipe; under the dispersed policy each class gets
//! its own query and the matcher later enforces capture-source consistency
//! between the two selected templates.

use crate::error::{GraphError, Result};
use crate::format::PixelFormat;
use smallvec::SmallVec;
use std::collections::BTreeMap;

/// Usage tag of a requested output stream.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StreamUsage {
    /// Preview display stream.
    Preview,
    /// Video record stream.
    Video,
    /// Still capture stream.
    Still,
    /// Raw re-processing input, not supported by the resolver.
    RawInput,
}

/// One requested output stream.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StreamSpec {
    /// Caller-chosen stream handle, stable across the configuration.
    pub id: i32,
    /// Requested width in pixels.
    pub width: u32,
    /// Requested height in lines.
    pub height: u32,
    /// Requested pixel format.
    pub format: PixelFormat,
    /// Usage class tag.
    pub usage: StreamUsage,
}

impl StreamSpec {
    fn is_video_class(&self) -> bool {
        matches!(self.usage, StreamUsage::Preview | StreamUsage::Video)
    }

    fn area(&self) -> u64 {
        u64::from(self.width) * u64::from(self.height)
    }
}

/// Whether the video and still queries are merged into one combined query
/// or kept independent with a later consistency check.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SinkPolicy {
    /// Merge both classes into one query, one pipe serves both.
    Coupled,
    /// Resolve each class independently; the per-class sink budget shrinks
    /// to two slots.
    Dispersed,
}

/// Usage class a bound stream was filed under.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PipeClass {
    /// Preview/video streams.
    Video,
    /// Still capture streams.
    Still,
}

/// A named, descriptor-declared output point a requested stream can bind to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum VirtualSink {
    /// First video sink.
    Video0,
    /// Second video sink.
    Video1,
    /// Third video sink.
    Video2,
    /// First still sink.
    Still0,
    /// Second still sink.
    Still1,
    /// Third still sink.
    Still2,
    /// Synthetic still sink used by temporal-noise-reduction still capture.
    StillTnr0,
}

impl VirtualSink {
    /// The sink name as declared in the graph descriptor.
    pub fn name(self) -> &'static str {
        match self {
            VirtualSink::Video0 => "video0",
            VirtualSink::Video1 => "video1",
            VirtualSink::Video2 => "video2",
            VirtualSink::Still0 => "still0",
            VirtualSink::Still1 => "still1",
            VirtualSink::Still2 => "still2",
            VirtualSink::StillTnr0 => "stilltnr0",
        }
    }

    /// Resolve a descriptor sink name back to its virtual sink.
    pub fn from_name(name: &str) -> Option<VirtualSink> {
        match name {
            "video0" => Some(VirtualSink::Video0),
            "video1" => Some(VirtualSink::Video1),
            "video2" => Some(VirtualSink::Video2),
            "still0" => Some(VirtualSink::Still0),
            "still1" => Some(VirtualSink::Still1),
            "still2" => Some(VirtualSink::Still2),
            "stilltnr0" => Some(VirtualSink::StillTnr0),
            _ => None,
        }
    }
}

const VIDEO_SINKS: [VirtualSink; 3] = [VirtualSink::Video0, VirtualSink::Video1, VirtualSink::Video2];
const STILL_SINKS: [VirtualSink; 3] = [VirtualSink::Still0, VirtualSink::Still1, VirtualSink::Still2];

/// Per-class sink budget when each class resolves independently.
const DISPERSED_MAX_OUTPUTS: usize = 2;

/// Mapping from virtual sink to the requested stream bound to it.
///
/// A sink is either unused or bound to exactly one stream; iteration order is
/// the sink declaration order, keeping resolution deterministic.
pub type StreamToSinkMap = BTreeMap<VirtualSink, StreamSpec>;

/// A predicate set against the settings database: (virtual sink, attribute)
/// pairs that must match exactly, plus root-level entries such as the
/// active-output count (keyed with `None`).
#[derive(Debug, Clone, Default)]
pub struct QueryRule {
    items: BTreeMap<(Option<VirtualSink>, String), String>,
}

impl QueryRule {
    /// Create an empty rule (matches every template).
    pub fn new() -> Self {
        Self::default()
    }

    /// Add one predicate. Keys are unique; a re-insert overwrites.
    pub fn insert(&mut self, sink: Option<VirtualSink>, key: &str, value: impl Into<String>) {
        self.items.insert((sink, key.to_string()), value.into());
    }

    /// Iterate predicates as (sink name, attribute key, required value).
    pub fn iter(&self) -> impl Iterator<Item = (Option<&'static str>, &str, &str)> + '_ {
        self.items
            .iter()
            .map(|((sink, key), value)| (sink.map(VirtualSink::name), key.as_str(), value.as_str()))
    }

    /// Number of predicates.
    pub fn len(&self) -> usize {
        self.items.len()
    }

    /// Whether the rule has no predicates.
    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }
}

/// One class's query: the predicate rule and the sink bindings behind it.
#[derive(Debug, Clone)]
pub struct ClassQuery {
    /// Predicates for the phase-1 raw match.
    pub rule: QueryRule,
    /// The sink bindings this query was built from.
    pub sink_map: StreamToSinkMap,
}

/// The query set for one resolution pass.
///
/// Mirrors the shape of the final resolved graph: one combined (or
/// single-class) query, or an independent video/still pair.
#[derive(Debug, Clone)]
pub enum Queries {
    /// One query; produced by the coupled policy or when only one class has
    /// streams under the dispersed policy.
    Single(ClassQuery),
    /// Independent per-class queries under the dispersed policy.
    Paired {
        /// The video-class query.
        video: ClassQuery,
        /// The still-class query.
        still: ClassQuery,
    },
}

/// Build the query set and sink bindings for a stream configuration.
///
/// Streams are considered in descending pixel-count order. Preview/video
/// streams fill the video sinks, still streams the still sinks; when one
/// class's budget is exhausted the remaining streams spill into the other
/// class. Raw-input streams are rejected outright.
pub fn build_queries(
    streams: &[StreamSpec],
    policy: SinkPolicy,
    dummy_still_sink: bool,
) -> Result<Queries> {
    let mut ordered: Vec<&StreamSpec> = streams.iter().collect();
    ordered.sort_by(|a, b| b.area().cmp(&a.area()));

    let budget = match policy {
        SinkPolicy::Coupled => VIDEO_SINKS.len(),
        SinkPolicy::Dispersed => DISPERSED_MAX_OUTPUTS,
    };

    let mut video_rule = QueryRule::new();
    let mut still_rule = QueryRule::new();
    let mut video_map = StreamToSinkMap::new();
    let mut still_map = StreamToSinkMap::new();
    let mut video_sinks: SmallVec<[VirtualSink; 3]> = VIDEO_SINKS[..budget].iter().rev().copied().collect();
    let mut still_sinks: SmallVec<[VirtualSink; 3]> = STILL_SINKS[..budget].iter().rev().copied().collect();

    for stream in ordered {
        if stream.usage == StreamUsage::RawInput {
            return Err(GraphError::UnsupportedUseCase { stream_id: stream.id });
        }
        // Overflow rule: a video stream spills to still once video slots run
        // out, a still stream spills to video once still slots run out.
        let mut is_video = stream.is_video_class();
        if !video_sinks.is_empty() {
            is_video = is_video || still_sinks.is_empty();
        } else {
            is_video = false;
        }

        let slot = if is_video { video_sinks.pop() } else { still_sinks.pop() };
        let Some(sink) = slot else {
            return Err(GraphError::NoOutputSlot {
                stream_id: stream.id,
                video_bound: video_map.len(),
                still_bound: still_map.len(),
            });
        };
        let (rule, map) = if is_video {
            (&mut video_rule, &mut video_map)
        } else {
            (&mut still_rule, &mut still_map)
        };
        rule.insert(Some(sink), "width", stream.width.to_string());
        rule.insert(Some(sink), "height", stream.height.to_string());
        map.insert(sink, stream.clone());
        tracing::debug!("bound stream {} ({}x{}) to sink {}", stream.id, stream.width, stream.height, sink.name());
    }

    // The synthetic still-tnr sink mirrors the largest still stream. It is a
    // query predicate only and never binds a client stream.
    let mut synthetic_still = false;
    if dummy_still_sink {
        if let Some(largest) = still_map.values().max_by_key(|s| s.area()) {
            still_rule.insert(Some(VirtualSink::StillTnr0), "width", largest.width.to_string());
            still_rule.insert(Some(VirtualSink::StillTnr0), "height", largest.height.to_string());
            synthetic_still = true;
        }
    }

    match policy {
        SinkPolicy::Coupled => {
            // Merge still into video: one query, one pipe for both classes.
            for (sink, key, value) in still_rule.iter() {
                video_rule.insert(sink.and_then(VirtualSink::from_name), key, value);
            }
            for (sink, stream) in still_map {
                video_map.insert(sink, stream);
            }
            video_rule.insert(None, "active_outputs", video_map.len().to_string());
            Ok(Queries::Single(ClassQuery { rule: video_rule, sink_map: video_map }))
        }
        SinkPolicy::Dispersed => {
            if !video_map.is_empty() {
                video_rule.insert(None, "active_outputs", video_map.len().to_string());
            }
            if !still_map.is_empty() {
                let count = still_map.len() + usize::from(synthetic_still);
                still_rule.insert(None, "active_outputs", count.to_string());
            }
            let video = (!video_map.is_empty())
                .then(|| ClassQuery { rule: video_rule, sink_map: video_map });
            let still = (!still_map.is_empty())
                .then(|| ClassQuery { rule: still_rule, sink_map: still_map });
            match (video, still) {
                (Some(video), Some(still)) => Ok(Queries::Paired { video, still }),
                (Some(single), None) | (None, Some(single)) => Ok(Queries::Single(single)),
                (None, None) => Err(GraphError::NoGraphMatch),
            }
        }
    }
}
