//! The resolver front end: one entry point turning a stream configuration
//! into prepared pipes.
//!
//! ```ignore
//! let resolver = GraphResolver::new(store, camera_id, ConfigMode::Normal, SinkPolicy::Dispersed);
//! let graph = resolver.resolve(&streams, SensorMode::Unknown, false)?;
//! let bundle = graph.connections(&pg_list)?;
//! ```
//!
//! Resolution is a pure function of the request and the loaded settings
//! database: the same streams against the same database always produce the
//! same graph.

use crate::descriptor::{ConfigMode, DescriptorStore, SettingsDatabase, TemplateHandle};
use crate::error::{GraphError, Result};
use crate::format::Resolution;
use crate::matcher::{CandidateMatcher, Selection, SensorMode};
use crate::pipe::connection::{merge_connection_vectors, ConnectionBundle};
use crate::pipe::kernels::{GdcSetting, KernelList, KernelResolution};
use crate::pipe::PipelineInstance;
use crate::query::{build_queries, ClassQuery, Queries, SinkPolicy, StreamSpec, StreamToSinkMap};
use crate::scaler::ScalerInfo;
use std::rc::Rc;
use std::sync::Arc;

/// Resolves stream configurations against one camera's settings database.
#[derive(Debug, Clone)]
pub struct GraphResolver {
    store: Arc<DescriptorStore>,
    camera_id: i32,
    config_mode: ConfigMode,
    policy: SinkPolicy,
}

impl GraphResolver {
    /// Create a resolver bound to one camera and config mode.
    pub fn new(
        store: Arc<DescriptorStore>,
        camera_id: i32,
        config_mode: ConfigMode,
        policy: SinkPolicy,
    ) -> Self {
        Self { store, camera_id, config_mode, policy }
    }

    fn database(&self) -> Result<Arc<SettingsDatabase>> {
        self.store
            .settings(self.camera_id)
            .ok_or(GraphError::DescriptorNotLoaded { camera_id: self.camera_id })
    }

    /// Dry run: check whether the settings database can serve a stream
    /// configuration, without instantiating anything.
    pub fn check(
        &self,
        streams: &[StreamSpec],
        sensor_mode: SensorMode,
        dummy_still_sink: bool,
    ) -> Result<()> {
        let db = self.database()?;
        let queries = build_queries(streams, self.policy, dummy_still_sink)?;
        CandidateMatcher::new(&db, self.config_mode, sensor_mode).select(&queries)?;
        Ok(())
    }

    /// Resolve a stream configuration into prepared pipes.
    pub fn resolve(
        &self,
        streams: &[StreamSpec],
        sensor_mode: SensorMode,
        dummy_still_sink: bool,
    ) -> Result<ResolvedGraph> {
        let db = self.database()?;
        let queries = build_queries(streams, self.policy, dummy_still_sink)?;
        let selection =
            CandidateMatcher::new(&db, self.config_mode, sensor_mode).select(&queries)?;

        match (selection, queries) {
            (Selection::Single(handle), Queries::Single(query)) => {
                Ok(ResolvedGraph::Single(self.instantiate(&db, handle, query)?))
            }
            (
                Selection::Paired { video, still },
                Queries::Paired { video: video_query, still: still_query },
            ) => Ok(ResolvedGraph::Paired {
                video: self.instantiate(&db, video, video_query)?,
                still: self.instantiate(&db, still, still_query)?,
            }),
            // The matcher mirrors the query shape, so the arms above are
            // exhaustive in practice.
            _ => Err(GraphError::NoGraphMatch),
        }
    }

    fn instantiate(
        &self,
        db: &SettingsDatabase,
        handle: TemplateHandle,
        query: ClassQuery,
    ) -> Result<PipelineInstance> {
        let template = db.template(handle);
        tracing::debug!(
            "camera {}: instantiating template key {} for {} stream(s)",
            self.camera_id,
            template.key(),
            query.sink_map.len(),
        );
        PipelineInstance::prepare(
            db.create_instance(handle),
            query.sink_map,
            template.key(),
            template.mc_id(),
        )
    }
}

/// The outcome of a resolution pass: one pipe, or a consistency-checked
/// video/still pair.
///
/// Union accessors prefer the video pipe, matching the executor layer which
/// builds the video pipeline first.
#[derive(Debug)]
pub enum ResolvedGraph {
    /// One pipe serves all streams.
    Single(PipelineInstance),
    /// Independent video and still pipes sharing the capture source.
    Paired {
        /// The video-class pipe.
        video: PipelineInstance,
        /// The still-class pipe.
        still: PipelineInstance,
    },
}

impl ResolvedGraph {
    /// The pipes of this graph, video first.
    pub fn pipes(&self) -> Vec<&PipelineInstance> {
        match self {
            ResolvedGraph::Single(pipe) => vec![pipe],
            ResolvedGraph::Paired { video, still } => vec![video, still],
        }
    }

    /// Capture-source output resolution. For a pair both pipes agree by
    /// construction, so the video pipe's value is authoritative.
    pub fn capture_output(&self) -> Resolution {
        match self {
            ResolvedGraph::Single(pipe) => pipe.capture_output(),
            ResolvedGraph::Paired { video, .. } => video.capture_output(),
        }
    }

    /// The pipe owning an internal stream id, video pipe first.
    fn pipe_for_stream(&self, stream_id: i32) -> &PipelineInstance {
        match self {
            ResolvedGraph::Single(pipe) => pipe,
            ResolvedGraph::Paired { video, still } => {
                if video.stream_ids().contains(&stream_id) {
                    video
                } else {
                    still
                }
            }
        }
    }

    /// Distinct internal stream ids across all pipes, video pipe's first.
    pub fn stream_ids(&self) -> Vec<i32> {
        match self {
            ResolvedGraph::Single(pipe) => pipe.stream_ids(),
            ResolvedGraph::Paired { video, still } => {
                let mut ids = video.stream_ids();
                for id in still.stream_ids() {
                    if !ids.contains(&id) {
                        ids.push(id);
                    }
                }
                ids
            }
        }
    }

    /// Program-group names across all pipes, video pipe's first.
    pub fn pg_names(&self) -> Vec<String> {
        match self {
            ResolvedGraph::Single(pipe) => pipe.pg_names(),
            ResolvedGraph::Paired { video, still } => {
                let mut names = video.pg_names();
                for name in still.pg_names() {
                    if !names.contains(&name) {
                        names.push(name);
                    }
                }
                names
            }
        }
    }

    /// Internal stream id of a program group, searching the video pipe
    /// first.
    pub fn stream_id_by_pg_name(&self, name: &str) -> Option<i32> {
        match self {
            ResolvedGraph::Single(pipe) => pipe.stream_id_by_pg_name(name),
            ResolvedGraph::Paired { video, still } => {
                video.stream_id_by_pg_name(name).or_else(|| still.stream_id_by_pg_name(name))
            }
        }
    }

    /// Program-group id of a program group, searching the video pipe first.
    pub fn pg_id_by_pg_name(&self, name: &str) -> Option<i32> {
        match self {
            ResolvedGraph::Single(pipe) => pipe.pg_id_by_pg_name(name),
            ResolvedGraph::Paired { video, still } => {
                video.pg_id_by_pg_name(name).or_else(|| still.pg_id_by_pg_name(name))
            }
        }
    }

    /// Kernel list of an internal stream, from the pipe owning the stream.
    pub fn kernel_list(&self, stream_id: i32) -> Rc<KernelList> {
        self.pipe_for_stream(stream_id).kernel_list(stream_id)
    }

    /// Resolution descriptor of a kernel, from the pipe owning the stream.
    pub fn kernel_resolution(&self, stream_id: i32, kernel_id: u32) -> Option<KernelResolution> {
        self.pipe_for_stream(stream_id).kernel_resolution(stream_id, kernel_id)
    }

    /// Program-group id carrying a kernel, from the pipe owning the stream.
    pub fn pg_id_for_kernel(&self, stream_id: i32, kernel_id: u32) -> Option<i32> {
        self.pipe_for_stream(stream_id).pg_id_for_kernel(stream_id, kernel_id)
    }

    /// GDC kernel settings of every pipe that declares one, video first.
    pub fn gdc_settings(&self) -> Vec<GdcSetting> {
        self.pipes().iter().filter_map(|pipe| pipe.gdc_setting()).collect()
    }

    /// Scaler ratios of every bound client stream, video pipe's first.
    pub fn scaler_ratios(&self) -> Vec<ScalerInfo> {
        self.pipes().iter().flat_map(|pipe| pipe.scaler_ratios()).collect()
    }

    /// All sink bindings of this graph, merged across pipes.
    pub fn stream_to_sink_map(&self) -> StreamToSinkMap {
        match self {
            ResolvedGraph::Single(pipe) => pipe.sink_map().clone(),
            ResolvedGraph::Paired { video, still } => {
                let mut map = video.sink_map().clone();
                for (&sink, stream) in still.sink_map() {
                    map.insert(sink, stream.clone());
                }
                map
            }
        }
    }

    /// Routing table for the given program groups. For a pair the still
    /// pipe's table is merged into the video pipe's, terminal by terminal;
    /// scalers and side-channel formats concatenate video first.
    pub fn connections(&self, pg_list: &[String]) -> Result<ConnectionBundle> {
        match self {
            ResolvedGraph::Single(pipe) => pipe.connections(pg_list),
            ResolvedGraph::Paired { video, still } => {
                let video_bundle = video.connections(pg_list)?;
                let still_bundle = still.connections(pg_list)?;
                let mut scalers = video_bundle.scalers;
                scalers.extend(still_bundle.scalers);
                let mut side_formats = video_bundle.side_formats;
                side_formats.extend(still_bundle.side_formats);
                Ok(ConnectionBundle {
                    connections: merge_connection_vectors(
                        video_bundle.connections,
                        still_bundle.connections,
                    ),
                    side_formats,
                    scalers,
                })
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::descriptor::{NodeForest, NodeKind, Template};
    use crate::format::PixelFormat;
    use crate::query::{StreamUsage, VirtualSink};

    /// One complete template: sensor -> csi_be -> pg -> sink.
    fn template(
        key: i32,
        pg_name: &str,
        stream_id: i64,
        sink_name: &str,
        sink_res: (i64, i64),
        terminal_base: i64,
    ) -> Template {
        let mut f = NodeForest::new("settings");
        f.set_attr(f.root(), "active_outputs", 1);

        let sensor = f.add_node(f.root(), NodeKind::Sensor, "sensor");
        let sport = f.add_node(sensor, NodeKind::Port, "port_0");
        f.set_attr(sport, "peer", "csi_be:input");

        let csi = f.add_node(f.root(), NodeKind::HwBlock, "csi_be");
        f.set_attr(csi, "stream_id", 0);
        let cin = f.add_node(csi, NodeKind::Port, "input");
        f.set_attr(cin, "terminal_id", terminal_base);
        f.set_attr(cin, "peer", "sensor:port_0");
        let cout = f.add_node(csi, NodeKind::Port, "output");
        f.set_attr(cout, "terminal_id", terminal_base + 1);
        f.set_attr(cout, "direction", 1);
        f.set_attr(cout, "width", 4096);
        f.set_attr(cout, "height", 3072);
        f.set_attr(cout, "format", "Linear");
        f.set_attr(cout, "peer", format!("{pg_name}:input"));

        let pg = f.add_node(f.root(), NodeKind::ProgramGroup, pg_name);
        f.set_attr(pg, "stream_id", stream_id);
        f.set_attr(pg, "pg_id", stream_id + 100);
        f.set_attr(pg, "stage_id", 1);
        let pin = f.add_node(pg, NodeKind::Port, "input");
        f.set_attr(pin, "terminal_id", terminal_base + 10);
        f.set_attr(pin, "direction", 0);
        f.set_attr(pin, "peer", "csi_be:output");
        let main = f.add_node(pg, NodeKind::Port, "main");
        f.set_attr(main, "terminal_id", terminal_base + 11);
        f.set_attr(main, "direction", 1);
        f.set_attr(main, "width", sink_res.0);
        f.set_attr(main, "height", sink_res.1);
        f.set_attr(main, "format", "Linear");
        f.set_attr(main, "peer", sink_name);

        let sink = f.add_node(f.root(), NodeKind::Sink, sink_name);
        f.set_attr(sink, "peer", format!("{pg_name}:main"));
        f.set_attr(sink, "width", sink_res.0);
        f.set_attr(sink, "height", sink_res.1);

        Template::new(key, "NORMAL", f).with_mc_id(key * 10)
    }

    fn loaded_store() -> Arc<DescriptorStore> {
        let store = DescriptorStore::new();
        store.load_once(
            0,
            SettingsDatabase::new(vec![
                template(1, "video_pg", 60006, "video0", (1920, 1080), 10),
                template(2, "still_pg", 60007, "still0", (4032, 3024), 50),
            ]),
        );
        Arc::new(store)
    }

    fn video_stream() -> StreamSpec {
        StreamSpec {
            id: 0,
            width: 1920,
            height: 1080,
            format: PixelFormat::Nv12,
            usage: StreamUsage::Video,
        }
    }

    fn still_stream() -> StreamSpec {
        StreamSpec {
            id: 1,
            width: 4032,
            height: 3024,
            format: PixelFormat::Nv12,
            usage: StreamUsage::Still,
        }
    }

    #[test]
    fn test_resolve_single() {
        let resolver =
            GraphResolver::new(loaded_store(), 0, ConfigMode::Normal, SinkPolicy::Dispersed);
        let graph = resolver.resolve(&[video_stream()], SensorMode::Unknown, false).unwrap();

        let ResolvedGraph::Single(ref pipe) = graph else { panic!("expected single pipe") };
        assert_eq!(pipe.template_key(), 1);
        assert_eq!(pipe.mc_id(), 10);
        assert_eq!(graph.capture_output(), Resolution { width: 4096, height: 3072 });
        assert_eq!(graph.stream_ids(), vec![60006]);
        assert_eq!(graph.pg_id_by_pg_name("video_pg"), Some(60106));
    }

    #[test]
    fn test_resolve_paired_unions() {
        let resolver =
            GraphResolver::new(loaded_store(), 0, ConfigMode::Normal, SinkPolicy::Dispersed);
        let graph = resolver
            .resolve(&[video_stream(), still_stream()], SensorMode::Unknown, false)
            .unwrap();

        assert!(matches!(graph, ResolvedGraph::Paired { .. }));
        assert_eq!(graph.stream_ids(), vec![60006, 60007]);
        assert_eq!(graph.pg_names(), vec!["video_pg".to_string(), "still_pg".to_string()]);
        assert_eq!(graph.stream_id_by_pg_name("still_pg"), Some(60007));

        let map = graph.stream_to_sink_map();
        assert_eq!(map[&VirtualSink::Video0].id, 0);
        assert_eq!(map[&VirtualSink::Still0].id, 1);

        let bundle = graph
            .connections(&["video_pg".to_string(), "still_pg".to_string()])
            .unwrap();
        // Two connections per pipe, all terminals distinct.
        assert_eq!(bundle.connections.len(), 4);
        assert_eq!(bundle.scalers.len(), 2);
        assert_eq!(bundle.scalers[0].stream_id, 0);
        assert_eq!(bundle.scalers[1].stream_id, 1);
    }

    #[test]
    fn test_resolution_is_deterministic() {
        let resolver =
            GraphResolver::new(loaded_store(), 0, ConfigMode::Normal, SinkPolicy::Dispersed);
        let streams = [video_stream(), still_stream()];
        let first = resolver.resolve(&streams, SensorMode::Unknown, false).unwrap();
        let second = resolver.resolve(&streams, SensorMode::Unknown, false).unwrap();

        assert_eq!(first.stream_ids(), second.stream_ids());
        assert_eq!(first.capture_output(), second.capture_output());
        let pg_list = ["video_pg".to_string(), "still_pg".to_string()];
        assert_eq!(first.connections(&pg_list).unwrap(), second.connections(&pg_list).unwrap());
    }

    #[test]
    fn test_check_is_side_effect_free() {
        let store = loaded_store();
        let resolver =
            GraphResolver::new(Arc::clone(&store), 0, ConfigMode::Normal, SinkPolicy::Dispersed);
        resolver.check(&[video_stream()], SensorMode::Unknown, false).unwrap();

        // The dry run must not touch the stored template.
        let db = store.settings(0).unwrap();
        let forest = db.template(db.query(&crate::query::QueryRule::new())[0]).forest();
        let main = forest.by_path("video_pg:main").unwrap();
        assert_eq!(forest.attr_str(main, "format"), Some("Linear"));
    }

    #[test]
    fn test_missing_database() {
        let resolver = GraphResolver::new(
            Arc::new(DescriptorStore::new()),
            3,
            ConfigMode::Normal,
            SinkPolicy::Coupled,
        );
        let err = resolver.resolve(&[video_stream()], SensorMode::Unknown, false).unwrap_err();
        assert!(matches!(err, GraphError::DescriptorNotLoaded { camera_id: 3 }));
    }

    #[test]
    fn test_video_record_override_stays_in_instance() {
        let store = loaded_store();
        let resolver =
            GraphResolver::new(Arc::clone(&store), 0, ConfigMode::Normal, SinkPolicy::Dispersed);
        let graph = resolver.resolve(&[video_stream()], SensorMode::Unknown, false).unwrap();

        let ResolvedGraph::Single(ref pipe) = graph else { panic!("expected single pipe") };
        let bundle = pipe.connections(&["video_pg".to_string()]).unwrap();
        let output = bundle.connections.iter().find(|c| c.stream.is_some()).unwrap();
        assert_eq!(output.format.fourcc, "TILE");

        // The shared template still declares the original format.
        let db = store.settings(0).unwrap();
        let forest = db.template(db.query(&crate::query::QueryRule::new())[0]).forest();
        let main = forest.by_path("video_pg:main").unwrap();
        assert_eq!(forest.attr_str(main, "format"), Some("Linear"));
    }
}
