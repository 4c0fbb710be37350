//! Connection extraction: walk the prepared instance and emit the buffer
//! routing table the pipeline executors are built from.
//!
//! Each enabled pixel-data port contributes one connection carrying its
//! resolved format and the (stage, terminal) identities of both ends.
//! Disabled ports still appear, reduced to an ownership record, so the
//! executor layer knows the terminal exists but routes nothing through it.
//! Ports at the pipe edge are tagged: edge inputs switch to the push model
//! and edge outputs are bound to the client stream behind their sink.

use super::{PipelineInstance, PortLink};
use crate::descriptor::{NodeId, NodeKind};
use crate::error::{GraphError, Result};
use crate::format::{bpl_for_graph_format, bpp_for_graph_format};
use crate::query::StreamSpec;
use crate::scaler::{scaler_for_port, ScalerInfo};

/// Buffer hand-off model of a connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ConnectionType {
    /// The source pushes buffers into the sink.
    Push,
    /// The sink pulls buffers from the source.
    #[default]
    Pull,
}

/// Resolved format of one port.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct PortFormat {
    /// Whether the template enables this port.
    pub enabled: bool,
    /// Terminal id of the port.
    pub terminal_id: i32,
    /// Frame width in pixels.
    pub width: u32,
    /// Frame height in lines.
    pub height: u32,
    /// Canonical graph format string.
    pub fourcc: String,
    /// Bytes per line.
    pub bpl: u32,
    /// Bits per pixel.
    pub bpp: u32,
}

/// The two endpoint identities of a connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct ConnectionConfig {
    /// Stage id of the producing side.
    pub source_stage: i32,
    /// Terminal id of the producing side.
    pub source_terminal: i32,
    /// Source iteration, unused by the current executors.
    pub source_iteration: i32,
    /// Stage id of the consuming side.
    pub sink_stage: i32,
    /// Terminal id of the consuming side.
    pub sink_terminal: i32,
    /// Sink iteration, unused by the current executors.
    pub sink_iteration: i32,
    /// Buffer hand-off model.
    pub connection_type: ConnectionType,
}

/// One entry of the routing table.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct Connection {
    /// Resolved format of the port this connection was derived from.
    pub format: PortFormat,
    /// Endpoint identities.
    pub config: ConnectionConfig,
    /// Client stream bound to this connection, for edge outputs only.
    pub stream: Option<StreamSpec>,
    /// Whether the port sits at the edge of the pipe.
    pub has_edge_port: bool,
}

/// Format of a pipe-internal port surfaced outside the routing table.
/// Currently only the temporal-noise-reduction reference output.
#[derive(Debug, Clone, PartialEq)]
pub struct SideChannelFormat {
    /// Internal stream id the port belongs to.
    pub stream_id: i32,
    /// The port's declared format.
    pub format: PortFormat,
}

/// Everything the connection walk produces for one pipe.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ConnectionBundle {
    /// The routing table, in port document order.
    pub connections: Vec<Connection>,
    /// Side-channel formats of surfaced private ports.
    pub side_formats: Vec<SideChannelFormat>,
    /// Per-stream total scaling ratios.
    pub scalers: Vec<ScalerInfo>,
}

const PORT_DIRECTION_INPUT: i64 = 0;

/// Private port surfaced as a side-channel format instead of being dropped.
const TNR_REFERENCE_PORT: &str = "tnr_ref_out";

impl PipelineInstance {
    /// Build the routing table for the program groups named in `pg_list`.
    ///
    /// A program group participates when its name contains any of the given
    /// names; executor configurations name the groups they drive by such
    /// fragments.
    pub fn connections(&self, pg_list: &[String]) -> Result<ConnectionBundle> {
        let mut bundle = ConnectionBundle::default();
        let mut connected: Vec<NodeId> = Vec::new();

        let groups: Vec<NodeId> = self
            .forest
            .nodes_of_kind(NodeKind::ProgramGroup)
            .into_iter()
            .filter(|&pg| {
                let name = self.forest.node(pg).name();
                pg_list.iter().any(|wanted| name.contains(wanted.as_str()))
            })
            .collect();

        for pg in groups {
            for port in self.ports_of(pg) {
                let name = self.forest.node(port).name();
                if self.forest.attr_int(port, "private").unwrap_or(0) != 0 {
                    if name == TNR_REFERENCE_PORT {
                        bundle.side_formats.push(self.private_port_format(port)?);
                    }
                    continue;
                }
                if connected.contains(&port) {
                    continue;
                }
                if self.forest.attr_str(port, "content_type").is_some_and(|c| c != "pixel_data") {
                    tracing::debug!("skipping non-pixel port '{}'", self.forest.full_name(port));
                    continue;
                }

                let format = self.port_format(port)?;
                if !format.enabled {
                    let config = self.port_owner(port)?;
                    bundle.connections.push(Connection {
                        format,
                        config,
                        stream: None,
                        has_edge_port: false,
                    });
                    continue;
                }

                let (mut config, peer) = self.port_connection(port)?;
                let mut stream = None;
                let has_edge_port = self.is_pipe_edge_port(port);
                if has_edge_port {
                    if self.port_direction(port) == PORT_DIRECTION_INPUT {
                        config.connection_type = ConnectionType::Push;
                    } else if self.forest.node(peer).kind() == NodeKind::Sink {
                        let sink_name = self.forest.node(peer).name();
                        stream = self.stream_for_sink_name(sink_name).cloned();
                        if let Some(ref client) = stream {
                            let port_name = self.forest.node(port).name();
                            if let Some(info) = scaler_for_port(self, port_name, client.id) {
                                bundle.scalers.push(info);
                            }
                        }
                    }
                }
                bundle.connections.push(Connection { format, config, stream, has_edge_port });
                connected.push(port);
                connected.push(peer);
            }
        }

        tracing::debug!(
            "built {} connections, {} side formats, {} scalers",
            bundle.connections.len(),
            bundle.side_formats.len(),
            bundle.scalers.len(),
        );
        Ok(bundle)
    }

    fn ports_of(&self, pg: NodeId) -> Vec<NodeId> {
        self.forest
            .descendants(pg)
            .filter(|&n| self.forest.node(n).kind() == NodeKind::Port)
            .collect()
    }

    /// (stage, terminal) identity of a port. The terminal id is declared on
    /// the port, the stage id on its enclosing stage.
    fn port_identity(&self, port: NodeId) -> Result<(i32, i32)> {
        let terminal = match self.forest.attr(port, "terminal_id") {
            None => {
                return Err(GraphError::MissingAttribute {
                    node: self.forest.full_name(port),
                    key: "terminal_id",
                })
            }
            Some(attr) => attr.as_int().ok_or_else(|| GraphError::MalformedAttribute {
                node: self.forest.full_name(port),
                key: "terminal_id",
            })?,
        };
        let stage = self
            .forest
            .node(port)
            .parent()
            .and_then(|parent| self.forest.attr_int(parent, "stage_id"))
            .unwrap_or(0);
        Ok((stage as i32, terminal as i32))
    }

    fn port_direction(&self, port: NodeId) -> i64 {
        self.forest.attr_int(port, "direction").unwrap_or(PORT_DIRECTION_INPUT)
    }

    /// Internal stream id of the stage enclosing a port, `-1` when absent.
    fn port_stream_id(&self, port: NodeId) -> i32 {
        self.forest
            .node(port)
            .parent()
            .and_then(|parent| self.forest.attr_int(parent, "stream_id"))
            .unwrap_or(-1) as i32
    }

    /// Resolve a port's format, inheriting from its peer when the port
    /// itself declares no dimensions.
    fn port_format(&self, port: NodeId) -> Result<PortFormat> {
        let enabled = self.forest.attr_int(port, "enabled").unwrap_or(1) != 0;
        let (_, terminal_id) = self.port_identity(port)?;
        if !enabled {
            return Ok(PortFormat { enabled, terminal_id, ..PortFormat::default() });
        }

        // Ports without an own width carry the format of their peer.
        let carrier = if self.forest.attr_int(port, "width").is_some() {
            port
        } else {
            self.peer_of(port)?
        };
        let require = |key: &'static str| {
            self.forest.attr_int(carrier, key).ok_or_else(|| GraphError::MissingAttribute {
                node: self.forest.full_name(carrier),
                key,
            })
        };
        let width = require("width")? as u32;
        let height = require("height")? as u32;
        let fourcc = self
            .forest
            .attr_str(carrier, "format")
            .ok_or_else(|| GraphError::MissingAttribute {
                node: self.forest.full_name(carrier),
                key: "format",
            })?
            .to_string();

        // Derived bpl loses to an explicit declaration.
        let mut bpl = bpl_for_graph_format(&fourcc, width);
        if let Some(declared) = self.forest.attr_int(carrier, "bytes_per_line") {
            bpl = declared as u32;
        }
        let bpp = bpp_for_graph_format(&fourcc);

        Ok(PortFormat { enabled, terminal_id, width, height, fourcc, bpl, bpp })
    }

    /// Format of a surfaced private port; everything must be declared on the
    /// port itself since private ports have no routable peer.
    fn private_port_format(&self, port: NodeId) -> Result<SideChannelFormat> {
        let (_, terminal_id) = self.port_identity(port)?;
        let require = |key: &'static str| {
            self.forest.attr_int(port, key).ok_or_else(|| GraphError::MissingAttribute {
                node: self.forest.full_name(port),
                key,
            })
        };
        let width = require("width")? as u32;
        let height = require("height")? as u32;
        let fourcc = self
            .forest
            .attr_str(port, "format")
            .ok_or_else(|| GraphError::MissingAttribute {
                node: self.forest.full_name(port),
                key: "format",
            })?
            .to_string();
        let bpl = bpl_for_graph_format(&fourcc, width);
        let bpp = bpp_for_graph_format(&fourcc);
        Ok(SideChannelFormat {
            stream_id: self.port_stream_id(port),
            format: PortFormat {
                enabled: self.forest.attr_int(port, "enabled").unwrap_or(1) != 0,
                terminal_id,
                width,
                height,
                fourcc,
                bpl,
                bpp,
            },
        })
    }

    /// Ownership record of a disabled port: only the port's own side of the
    /// connection is filled in.
    fn port_owner(&self, port: NodeId) -> Result<ConnectionConfig> {
        let (stage, terminal) = self.port_identity(port)?;
        let mut config = ConnectionConfig::default();
        if self.port_direction(port) == PORT_DIRECTION_INPUT {
            config.sink_stage = stage;
            config.sink_terminal = terminal;
        } else {
            config.source_stage = stage;
            config.source_terminal = terminal;
        }
        Ok(config)
    }

    /// Endpoint identities of an enabled port's connection.
    fn port_connection(&self, port: NodeId) -> Result<(ConnectionConfig, NodeId)> {
        let peer = self.peer_of(port)?;
        let peer_is_virtual = self.forest.node(peer).kind() == NodeKind::Sink;
        let (stage, terminal) = self.port_identity(port)?;
        let mut config = ConnectionConfig::default();

        if self.port_direction(port) == PORT_DIRECTION_INPUT {
            config.sink_stage = stage;
            config.sink_terminal = terminal;
            if !peer_is_virtual {
                let (peer_stage, peer_terminal) = self.port_identity(peer)?;
                config.source_stage = peer_stage;
                config.source_terminal = peer_terminal;
            }
        } else {
            config.source_stage = stage;
            config.source_terminal = terminal;
            if !peer_is_virtual {
                let (peer_stage, peer_terminal) = self.port_identity(peer)?;
                config.sink_stage = peer_stage;
                config.sink_terminal = peer_terminal;
            } else if self.forest.node(peer).name().contains(self.forest.node(port).name()) {
                // A hanging port: its sink exists only to terminate the
                // graph. Mirror the source terminal so executor binding can
                // recognize and exclude the connection.
                tracing::debug!(
                    "hanging port '{}' terminated by '{}'",
                    self.forest.full_name(port),
                    self.forest.node(peer).name(),
                );
                config.sink_stage = 0;
                config.sink_terminal = config.source_terminal;
            }
        }
        Ok((config, peer))
    }

    /// A port sits at the pipe edge when it is disabled, when its peer
    /// belongs to a fixed-function block or the common stream, or when its
    /// peer is a virtual sink.
    fn is_pipe_edge_port(&self, port: NodeId) -> bool {
        let peer = match self.port_link(port) {
            Ok(PortLink::Disabled) => return true,
            Ok(PortLink::Private) | Err(_) => return false,
            Ok(PortLink::Peer(peer)) => peer,
        };
        if self.port_stream_id(port) < 0 {
            return false;
        }

        let peer_is_virtual = self.forest.node(peer).kind() == NodeKind::Sink;
        let (peer_is_hw, peer_stream) = match self.forest.node(peer).parent() {
            Some(parent) if !peer_is_virtual => (
                self.forest.node(parent).kind() == NodeKind::HwBlock,
                self.forest.attr_int(parent, "stream_id").unwrap_or(-1) as i32,
            ),
            _ => (false, -1),
        };

        if self.port_direction(port) == PORT_DIRECTION_INPUT {
            peer_is_hw || peer_stream == 0 || peer_stream == -1
        } else {
            peer_is_virtual || peer_stream == 0 || peer_stream == -1
        }
    }
}

/// Merge the still pipe's routing table into the video pipe's.
///
/// A still connection sharing a terminal with a video connection replaces it
/// only when the video side is disabled and the still side enabled; a still
/// connection with a new terminal is appended.
pub(crate) fn merge_connection_vectors(
    video: Vec<Connection>,
    still: Vec<Connection>,
) -> Vec<Connection> {
    if video.is_empty() {
        return still;
    }
    let mut merged = video;
    for still_conn in still {
        match merged
            .iter_mut()
            .find(|c| c.format.terminal_id == still_conn.format.terminal_id)
        {
            Some(existing) => {
                if !existing.format.enabled && still_conn.format.enabled {
                    *existing = still_conn;
                }
            }
            None => merged.push(still_conn),
        }
    }
    merged
}
