//! Pipeline instantiation: turn a selected template into a prepared,
//! queryable pipe.
//!
//! A [`PipelineInstance`] owns a deep copy of the chosen template tree. The
//! preparation pass validates the capture source, resolves every bound sink
//! to its producing port, applies the video-record format override onto the
//! owned copy, and caches the capture-source resolution. Kernel and
//! connection queries then run against the prepared instance; see the
//! [`kernels`] and [`connection`] submodules.

pub mod connection;
pub mod kernels;

use crate::descriptor::{NodeForest, NodeId, NodeKind};
use crate::error::{GraphError, Result};
use crate::format::Resolution;
use crate::matcher::capture_resolution;
use crate::query::{StreamSpec, StreamToSinkMap, StreamUsage, VirtualSink};
use kernels::KernelList;
use std::cell::RefCell;
use std::collections::BTreeMap;
use std::rc::Rc;

/// Port format forced onto the producing port of video-record sinks. The
/// encoder consumes tiled buffers directly, skipping a de-tiling pass.
const VIDEO_RECORDING_FORMAT: &str = "TILE";

/// The capture source a template is driven by.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SourceKind {
    /// Physical sensor input.
    Sensor,
    /// Test pattern generator input.
    Tpg,
}

impl SourceKind {
    /// Path of the source's single output port.
    pub fn port_path(self) -> &'static str {
        match self {
            SourceKind::Sensor => "sensor:port_0",
            SourceKind::Tpg => "tpg:port_0",
        }
    }
}

/// Where a port's data goes, as declared by the template.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PortLink {
    /// Connected to another node.
    Peer(NodeId),
    /// Disabled in this template; carries ownership information only.
    Disabled,
    /// Internal to the pipe, not part of the client-visible connection list.
    Private,
}

/// A prepared pipe: one instantiated template plus everything the
/// preparation pass derived from it.
#[derive(Debug)]
pub struct PipelineInstance {
    pub(crate) forest: NodeForest,
    pub(crate) source: SourceKind,
    /// (sink node, producing port) for every bound virtual sink, in sink
    /// declaration order.
    pub(crate) sink_peers: Vec<(NodeId, NodeId)>,
    pub(crate) sink_map: StreamToSinkMap,
    capture_output: Resolution,
    template_key: i32,
    mc_id: i32,
    pub(crate) kernel_cache: RefCell<BTreeMap<i32, Rc<KernelList>>>,
}

impl PipelineInstance {
    /// Prepare a pipe from an instantiated template tree and the sink
    /// bindings its query was built from.
    ///
    /// Fails when the template's capture source is ambiguous, when a bound
    /// sink or its producing port cannot be resolved, or when the
    /// capture-source resolution is unreadable.
    pub fn prepare(
        forest: NodeForest,
        sink_map: StreamToSinkMap,
        template_key: i32,
        mc_id: i32,
    ) -> Result<Self> {
        let mut instance = Self {
            forest,
            source: SourceKind::Sensor,
            sink_peers: Vec::new(),
            sink_map,
            capture_output: Resolution::default(),
            template_key,
            mc_id,
            kernel_cache: RefCell::new(BTreeMap::new()),
        };
        instance.source = instance.analyze_source_type()?;
        instance.resolve_active_outputs()?;
        instance.apply_port_formats();
        instance.capture_output = capture_resolution(&instance.forest)?;
        tracing::debug!(
            "prepared pipe from template key {}: source {:?}, {} active outputs, capture {}",
            instance.template_key,
            instance.source,
            instance.sink_peers.len(),
            instance.capture_output,
        );
        Ok(instance)
    }

    /// A template must be driven by exactly one source, sensor or tpg.
    fn analyze_source_type(&self) -> Result<SourceKind> {
        let sensors = self.forest.nodes_of_kind(NodeKind::Sensor).len();
        let tpgs = self.forest.nodes_of_kind(NodeKind::Tpg).len();
        match (sensors, tpgs) {
            (1, 0) => Ok(SourceKind::Sensor),
            (0, 1) => Ok(SourceKind::Tpg),
            _ => Err(GraphError::AmbiguousSource),
        }
    }

    /// Resolve every bound virtual sink to the port that produces its data.
    fn resolve_active_outputs(&mut self) -> Result<()> {
        let sinks: Vec<VirtualSink> = self.sink_map.keys().copied().collect();
        for sink in sinks {
            let name = sink.name();
            let sink_node = self
                .forest
                .find_by_name_and_kind(name, NodeKind::Sink)
                .ok_or_else(|| GraphError::SinkNotFound { name: name.to_string() })?;
            let peer = self.peer_of(sink_node)?;
            self.sink_peers.push((sink_node, peer));
        }
        Ok(())
    }

    /// Force the producing port of every video-record sink to the tiled
    /// recording format, creating the attribute when the template omits it.
    /// The override lands on this instance's owned copy only.
    fn apply_port_formats(&mut self) {
        let overrides: Vec<NodeId> = self
            .sink_peers
            .iter()
            .filter(|(sink_node, _)| {
                let name = self.forest.node(*sink_node).name();
                VirtualSink::from_name(name)
                    .and_then(|s| self.sink_map.get(&s))
                    .is_some_and(|stream| stream.usage == StreamUsage::Video)
            })
            .map(|&(_, peer)| peer)
            .collect();
        for peer in overrides {
            tracing::debug!(
                "forcing port '{}' format to {VIDEO_RECORDING_FORMAT}",
                self.forest.full_name(peer),
            );
            self.forest.set_attr(peer, "format", VIDEO_RECORDING_FORMAT);
        }
    }

    /// Resolve a node's declared peer.
    pub(crate) fn peer_of(&self, node: NodeId) -> Result<NodeId> {
        let path = self
            .forest
            .attr_str(node, "peer")
            .ok_or_else(|| GraphError::PeerNotFound { port: self.forest.full_name(node) })?;
        self.forest
            .by_path(path)
            .ok_or_else(|| GraphError::NodeNotFound { path: path.to_string() })
    }

    /// Classify where a port's data goes.
    ///
    /// A port is disabled when its `enabled` attribute is present and zero;
    /// absence means enabled. Private ports stay internal to the pipe.
    pub(crate) fn port_link(&self, port: NodeId) -> Result<PortLink> {
        if self.forest.attr_int(port, "enabled").unwrap_or(1) == 0 {
            return Ok(PortLink::Disabled);
        }
        if self.forest.attr_int(port, "private").unwrap_or(0) != 0 {
            return Ok(PortLink::Private);
        }
        Ok(PortLink::Peer(self.peer_of(port)?))
    }

    /// The capture source driving this pipe.
    pub fn source(&self) -> SourceKind {
        self.source
    }

    /// Capture-source output resolution.
    pub fn capture_output(&self) -> Resolution {
        self.capture_output
    }

    /// Key of the template this pipe was instantiated from.
    pub fn template_key(&self) -> i32 {
        self.template_key
    }

    /// Media-controller id of the underlying template, `-1` when undeclared.
    pub fn mc_id(&self) -> i32 {
        self.mc_id
    }

    /// The sink bindings this pipe serves.
    pub fn sink_map(&self) -> &StreamToSinkMap {
        &self.sink_map
    }

    /// Stream bound to a virtual sink, if any.
    pub fn stream_for_sink(&self, sink: VirtualSink) -> Option<&StreamSpec> {
        self.sink_map.get(&sink)
    }

    /// Stream bound to the virtual sink of the given descriptor name.
    pub fn stream_for_sink_name(&self, name: &str) -> Option<&StreamSpec> {
        VirtualSink::from_name(name).and_then(|s| self.sink_map.get(&s))
    }

    /// Distinct internal stream ids of this pipe's program groups, in
    /// document order.
    pub fn stream_ids(&self) -> Vec<i32> {
        let mut ids = Vec::new();
        for pg in self.forest.nodes_of_kind(NodeKind::ProgramGroup) {
            if let Some(id) = self.forest.attr_int(pg, "stream_id") {
                let id = id as i32;
                if !ids.contains(&id) {
                    ids.push(id);
                }
            }
        }
        ids
    }

    /// Names of this pipe's program groups, in document order.
    pub fn pg_names(&self) -> Vec<String> {
        self.forest
            .nodes_of_kind(NodeKind::ProgramGroup)
            .into_iter()
            .map(|pg| self.forest.node(pg).name().to_string())
            .collect()
    }

    /// Internal stream id of a program group, by name.
    pub fn stream_id_by_pg_name(&self, name: &str) -> Option<i32> {
        let pg = self.forest.find_by_name_and_kind(name, NodeKind::ProgramGroup)?;
        self.forest.attr_int(pg, "stream_id").map(|v| v as i32)
    }

    /// Program-group id of a program group, by name.
    pub fn pg_id_by_pg_name(&self, name: &str) -> Option<i32> {
        let pg = self.forest.find_by_name_and_kind(name, NodeKind::ProgramGroup)?;
        self.forest.attr_int(pg, "pg_id").map(|v| v as i32)
    }
}
