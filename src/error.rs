//! Error types for camgraph.

use thiserror::Error;

/// Result type alias using camgraph's Error.
pub type Result<T> = std::result::Result<T, GraphError>;

/// Main error type for graph resolution.
///
/// All matching and instantiation errors are terminal for the current
/// configuration attempt: the resolver is a pure function of its inputs and
/// the cached descriptor, so retrying with the same request reproduces the
/// same failure.
#[derive(Error, Debug)]
pub enum GraphError {
    /// A requested stream carries a usage the resolver cannot serve.
    #[error("unsupported use case for stream {stream_id}: re-processing of raw input is not supported")]
    UnsupportedUseCase {
        /// Identifier of the offending client stream.
        stream_id: i32,
    },

    /// Both class sink budgets were exhausted before all streams were bound.
    #[error("no output slot left for stream {stream_id}: video slots used {video_bound}, still slots used {still_bound}")]
    NoOutputSlot {
        /// Identifier of the stream that could not be bound.
        stream_id: i32,
        /// Number of video sinks already bound.
        video_bound: usize,
        /// Number of still sinks already bound.
        still_bound: usize,
    },

    /// No settings database has been loaded for this camera.
    #[error("no graph settings loaded for camera {camera_id}")]
    DescriptorNotLoaded {
        /// Camera identity the lookup used.
        camera_id: i32,
    },

    /// The raw predicate query matched no template.
    #[error("no graph settings match the request, check the settings database")]
    NoGraphMatch,

    /// Templates matched the request but none supports the active config mode.
    #[error("no matched template supports config mode {mode:?}")]
    ModeMismatch {
        /// The config mode that was requested.
        mode: crate::descriptor::ConfigMode,
    },

    /// No (video, still) candidate pair shares a capture-source resolution.
    #[error("no consistent video/still pair: capture-source resolutions never match")]
    NoConsistentPair,

    /// A template must contain exactly one capture source node.
    #[error("ambiguous capture source: template must contain exactly one of sensor or tpg")]
    AmbiguousSource,

    /// A virtual sink referenced by the stream map is missing from the template.
    #[error("sink node '{name}' not found in selected template")]
    SinkNotFound {
        /// Name of the missing sink.
        name: String,
    },

    /// A port's peer could not be resolved.
    #[error("peer not found for port '{port}'")]
    PeerNotFound {
        /// Full name of the port whose peer lookup failed.
        port: String,
    },

    /// None of the well-known capture-stage output ports exist.
    #[error("couldn't get the resolution of the capture-source output")]
    NoCaptureOutput,

    /// A node lookup by path failed.
    #[error("node not found: '{path}'")]
    NodeNotFound {
        /// The `stage:port` style path that failed to resolve.
        path: String,
    },

    /// A required attribute is absent from a node.
    #[error("node '{node}' lacks required attribute '{key}'")]
    MissingAttribute {
        /// Name of the node.
        node: String,
        /// Attribute key that was required.
        key: &'static str,
    },

    /// An attribute is present but its value has the wrong shape.
    #[error("node '{node}' attribute '{key}' is malformed")]
    MalformedAttribute {
        /// Name of the node.
        node: String,
        /// Attribute key whose value could not be interpreted.
        key: &'static str,
    },
}
