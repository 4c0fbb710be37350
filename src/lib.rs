//! # Camgraph
//!
//! A pipeline-graph resolver for a camera hardware abstraction layer.
//!
//! Camgraph takes the stream configuration a client requests and resolves it
//! against a per-camera database of candidate pipeline templates, producing
//! prepared pipes the executor layer can build: port connections, kernel
//! lists, scaling ratios and capture-source settings.
//!
//! ## Features
//!
//! - **Predicate queries**: Streams bind to virtual sinks, sinks become
//!   width/height predicates against the settings database
//! - **Multi-phase matching**: Raw match, config-mode filter, optional
//!   format refinement, sensor-mode ordering
//! - **Coupled or dispersed pipes**: One combined pipe, or an independent
//!   video/still pair checked for capture-source consistency
//! - **Isolated instantiation**: Every resolution deep-copies its template,
//!   so concurrent cameras never observe each other's port overrides
//!
//! ## Quick Start
//!
//! ```rust,ignore
//! use camgraph::prelude::*;
//!
//! let store = Arc::new(DescriptorStore::new());
//! store.load_once(camera_id, parsed_settings);
//!
//! let resolver = GraphResolver::new(store, camera_id, ConfigMode::Normal, SinkPolicy::Dispersed);
//! let graph = resolver.resolve(&streams, SensorMode::Unknown, false)?;
//! let routing = graph.connections(&pg_list)?;
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod descriptor;
pub mod error;
pub mod format;
pub mod matcher;
pub mod pipe;
pub mod query;
pub mod resolver;
pub mod scaler;

/// Prelude for convenient imports
pub mod prelude {
    pub use crate::descriptor::{ConfigMode, DescriptorStore, SettingsDatabase, Template};
    pub use crate::error::{GraphError, Result};
    pub use crate::format::{PixelFormat, Resolution};
    pub use crate::matcher::SensorMode;
    pub use crate::query::{SinkPolicy, StreamSpec, StreamUsage, VirtualSink};
    pub use crate::resolver::{GraphResolver, ResolvedGraph};
}

pub use error::{GraphError, Result};
