//! End-to-end resolution scenarios against a hand-built settings database.

use camgraph::descriptor::{DescriptorStore, NodeForest, NodeKind, SettingsDatabase, Template};
use camgraph::matcher::SensorMode;
use camgraph::pipe::connection::ConnectionType;
use camgraph::pipe::kernels::{B2I_DS_KERNELS, GDC3_KERNEL};
use camgraph::prelude::*;
use camgraph::resolver::ResolvedGraph;
use std::sync::Arc;

const VIDEO_PG_STREAM: i32 = 60006;
const STILL_PG_STREAM: i32 = 60007;

fn init_tracing() {
    let _ = tracing_subscriber::fmt().with_test_writer().try_init();
}

struct TemplateSpec {
    key: i32,
    modes: &'static str,
    capture: (i64, i64),
    pg_name: &'static str,
    stream_id: i32,
    sink_name: &'static str,
    sink_res: (i64, i64),
    sink_format: Option<(&'static str, &'static str)>,
    terminal_base: i64,
    kernels: Vec<(u32, (i64, i64, i64, i64))>,
}

impl Default for TemplateSpec {
    fn default() -> Self {
        Self {
            key: 1,
            modes: "NORMAL",
            capture: (4096, 3072),
            pg_name: "video_pg_main",
            stream_id: VIDEO_PG_STREAM,
            sink_name: "video0",
            sink_res: (1920, 1080),
            sink_format: None,
            terminal_base: 10,
            kernels: Vec::new(),
        }
    }
}

fn build_template(spec: TemplateSpec) -> Template {
    let mut f = NodeForest::new("settings");
    f.set_attr(f.root(), "active_outputs", 1);

    let sensor = f.add_node(f.root(), NodeKind::Sensor, "sensor");
    let sport = f.add_node(sensor, NodeKind::Port, "port_0");
    f.set_attr(sport, "peer", "csi_be:input");

    let csi = f.add_node(f.root(), NodeKind::HwBlock, "csi_be");
    f.set_attr(csi, "stream_id", 0);
    let cin = f.add_node(csi, NodeKind::Port, "input");
    f.set_attr(cin, "terminal_id", spec.terminal_base);
    f.set_attr(cin, "peer", "sensor:port_0");
    let cout = f.add_node(csi, NodeKind::Port, "output");
    f.set_attr(cout, "terminal_id", spec.terminal_base + 1);
    f.set_attr(cout, "direction", 1);
    f.set_attr(cout, "width", spec.capture.0);
    f.set_attr(cout, "height", spec.capture.1);
    f.set_attr(cout, "format", "Linear");
    f.set_attr(cout, "peer", format!("{}:input", spec.pg_name));

    let pg = f.add_node(f.root(), NodeKind::ProgramGroup, spec.pg_name);
    f.set_attr(pg, "stream_id", i64::from(spec.stream_id));
    f.set_attr(pg, "pg_id", i64::from(spec.stream_id) + 100);
    f.set_attr(pg, "stage_id", 1);
    let pin = f.add_node(pg, NodeKind::Port, "input");
    f.set_attr(pin, "terminal_id", spec.terminal_base + 10);
    f.set_attr(pin, "direction", 0);
    f.set_attr(pin, "peer", "csi_be:output");
    let main = f.add_node(pg, NodeKind::Port, "main");
    f.set_attr(main, "terminal_id", spec.terminal_base + 11);
    f.set_attr(main, "direction", 1);
    f.set_attr(main, "width", spec.sink_res.0);
    f.set_attr(main, "height", spec.sink_res.1);
    f.set_attr(main, "format", "Linear");
    f.set_attr(main, "peer", spec.sink_name);

    for (id, (iw, ih, ow, oh)) in spec.kernels {
        let k = f.add_node(pg, NodeKind::Kernel, format!("kernel_{id}"));
        f.set_attr(k, "id", i64::from(id));
        f.set_attr(k, "input_width", iw);
        f.set_attr(k, "input_height", ih);
        f.set_attr(k, "output_width", ow);
        f.set_attr(k, "output_height", oh);
    }

    let sink = f.add_node(f.root(), NodeKind::Sink, spec.sink_name);
    f.set_attr(sink, "peer", format!("{}:main", spec.pg_name));
    f.set_attr(sink, "width", spec.sink_res.0);
    f.set_attr(sink, "height", spec.sink_res.1);
    if let Some((fmt, bpp)) = spec.sink_format {
        f.set_attr(sink, "format", fmt);
        f.set_attr(sink, "bpp", bpp);
    }

    Template::new(spec.key, spec.modes, f).with_mc_id(spec.key)
}

fn stream(id: i32, width: u32, height: u32, usage: StreamUsage) -> StreamSpec {
    StreamSpec { id, width, height, format: PixelFormat::Nv12, usage }
}

fn store_with(templates: Vec<Template>) -> Arc<DescriptorStore> {
    let store = DescriptorStore::new();
    store.load_once(0, SettingsDatabase::new(templates));
    Arc::new(store)
}

/// Preview-only configuration through a coupled resolver: one pipe, a full
/// routing table, push at the capture edge.
#[test]
fn test_preview_only_configuration() {
    init_tracing();
    let store = store_with(vec![build_template(TemplateSpec::default())]);
    let resolver = GraphResolver::new(store, 0, ConfigMode::Normal, SinkPolicy::Coupled);

    let graph = resolver
        .resolve(&[stream(0, 1920, 1080, StreamUsage::Preview)], SensorMode::Unknown, false)
        .unwrap();

    let ResolvedGraph::Single(ref pipe) = graph else { panic!("expected single pipe") };
    assert_eq!(pipe.template_key(), 1);
    assert_eq!(graph.capture_output(), Resolution { width: 4096, height: 3072 });
    assert_eq!(graph.stream_ids(), vec![VIDEO_PG_STREAM]);

    let bundle = graph.connections(&["video_pg".to_string()]).unwrap();
    assert_eq!(bundle.connections.len(), 2);
    let input = &bundle.connections[0];
    assert!(input.has_edge_port);
    assert_eq!(input.config.connection_type, ConnectionType::Push);
    let output = &bundle.connections[1];
    assert_eq!(output.stream.as_ref().unwrap().id, 0);
    // Preview keeps the declared linear format.
    assert_eq!(output.format.fourcc, "Linear");
}

/// Video plus still under the dispersed policy: an independent pair agreeing
/// on the capture source, with union accessors preferring the video pipe.
#[test]
fn test_video_and_still_pair() {
    init_tracing();
    let store = store_with(vec![
        build_template(TemplateSpec::default()),
        build_template(TemplateSpec {
            key: 2,
            pg_name: "still_pg_main",
            stream_id: STILL_PG_STREAM,
            sink_name: "still0",
            sink_res: (4032, 3024),
            terminal_base: 50,
            ..TemplateSpec::default()
        }),
        // A still candidate with a mismatched capture source must lose.
        build_template(TemplateSpec {
            key: 3,
            capture: (1920, 1080),
            pg_name: "still_pg_small",
            stream_id: STILL_PG_STREAM,
            sink_name: "still0",
            sink_res: (4032, 3024),
            terminal_base: 90,
            ..TemplateSpec::default()
        }),
    ]);
    let resolver = GraphResolver::new(store, 0, ConfigMode::Normal, SinkPolicy::Dispersed);

    let streams =
        [stream(0, 1920, 1080, StreamUsage::Video), stream(1, 4032, 3024, StreamUsage::Still)];
    let graph = resolver.resolve(&streams, SensorMode::Unknown, false).unwrap();

    let ResolvedGraph::Paired { ref video, ref still } = graph else { panic!("expected a pair") };
    assert_eq!(video.template_key(), 1);
    assert_eq!(still.template_key(), 2);
    assert_eq!(video.capture_output(), still.capture_output());

    assert_eq!(graph.stream_ids(), vec![VIDEO_PG_STREAM, STILL_PG_STREAM]);
    let map = graph.stream_to_sink_map();
    assert_eq!(map[&VirtualSink::Video0].id, 0);
    assert_eq!(map[&VirtualSink::Still0].id, 1);

    // Video-record sinks force the tiled format onto their producing port.
    let pg_list = vec!["video_pg_main".to_string(), "still_pg_main".to_string()];
    let bundle = graph.connections(&pg_list).unwrap();
    assert_eq!(bundle.connections.len(), 4);
    let video_out = bundle
        .connections
        .iter()
        .find(|c| c.stream.as_ref().is_some_and(|s| s.id == 0))
        .unwrap();
    assert_eq!(video_out.format.fourcc, "TILE");
    let still_out = bundle
        .connections
        .iter()
        .find(|c| c.stream.as_ref().is_some_and(|s| s.id == 1))
        .unwrap();
    assert_eq!(still_out.format.fourcc, "Linear");
}

/// No still candidate shares the video capture source: the pair is rejected
/// rather than silently mismatched.
#[test]
fn test_inconsistent_pair_rejected() {
    let store = store_with(vec![
        build_template(TemplateSpec::default()),
        build_template(TemplateSpec {
            key: 2,
            capture: (1920, 1080),
            pg_name: "still_pg_main",
            stream_id: STILL_PG_STREAM,
            sink_name: "still0",
            sink_res: (4032, 3024),
            terminal_base: 50,
            ..TemplateSpec::default()
        }),
    ]);
    let resolver = GraphResolver::new(store, 0, ConfigMode::Normal, SinkPolicy::Dispersed);

    let streams =
        [stream(0, 1920, 1080, StreamUsage::Video), stream(1, 4032, 3024, StreamUsage::Still)];
    assert!(matches!(
        resolver.resolve(&streams, SensorMode::Unknown, false),
        Err(GraphError::NoConsistentPair)
    ));
}

/// Two otherwise-identical templates are told apart by the requested pixel
/// format in the refinement phase.
#[test]
fn test_format_refinement_selects_template() {
    let store = store_with(vec![
        build_template(TemplateSpec {
            key: 1,
            sink_format: Some(("YUY2", "8")),
            ..TemplateSpec::default()
        }),
        build_template(TemplateSpec {
            key: 2,
            sink_format: Some(("Linear", "8")),
            ..TemplateSpec::default()
        }),
    ]);
    let resolver = GraphResolver::new(store, 0, ConfigMode::Normal, SinkPolicy::Coupled);

    // NV12 maps to the linear graph format.
    let graph = resolver
        .resolve(&[stream(0, 1920, 1080, StreamUsage::Preview)], SensorMode::Unknown, false)
        .unwrap();
    let ResolvedGraph::Single(ref pipe) = graph else { panic!("expected single pipe") };
    assert_eq!(pipe.template_key(), 2);

    let yuyv = StreamSpec {
        format: PixelFormat::Yuyv,
        ..stream(0, 1920, 1080, StreamUsage::Preview)
    };
    let graph = resolver.resolve(&[yuyv], SensorMode::Unknown, false).unwrap();
    let ResolvedGraph::Single(ref pipe) = graph else { panic!("expected single pipe") };
    assert_eq!(pipe.template_key(), 1);
}

/// Kernel queries and scaling ratios through the public surface: the total
/// per-stream ratio is the product of the GDC and downscaler contributions.
#[test]
fn test_kernel_and_scaler_queries() {
    let store = store_with(vec![build_template(TemplateSpec {
        kernels: vec![
            (GDC3_KERNEL, (2048, 1536, 1920, 1080)),
            (B2I_DS_KERNELS[0], (4096, 3072, 2048, 1536)),
        ],
        ..TemplateSpec::default()
    })]);
    let resolver = GraphResolver::new(store, 0, ConfigMode::Normal, SinkPolicy::Coupled);

    let graph = resolver
        .resolve(&[stream(0, 1920, 1080, StreamUsage::Preview)], SensorMode::Unknown, false)
        .unwrap();

    let kernels = graph.kernel_list(VIDEO_PG_STREAM);
    assert_eq!(kernels.kernels.len(), 2);
    // Repeated lookups reuse the memoized list.
    assert!(std::rc::Rc::ptr_eq(&kernels, &graph.kernel_list(VIDEO_PG_STREAM)));

    let gdc = graph.gdc_settings();
    assert_eq!(gdc.len(), 1);
    assert_eq!(gdc[0].kernel_id, GDC3_KERNEL);
    assert_eq!(gdc[0].resolution.input_width, 2048);

    assert_eq!(
        graph.pg_id_for_kernel(VIDEO_PG_STREAM, B2I_DS_KERNELS[0]),
        Some(VIDEO_PG_STREAM + 100)
    );

    let bundle = graph.connections(&["video_pg".to_string()]).unwrap();
    assert_eq!(bundle.scalers.len(), 1);
    let scaler = bundle.scalers[0];
    assert_eq!(scaler.stream_id, 0);
    // gdc 2048/1920 x ds 4096/2048, and the vertical counterparts.
    assert!((scaler.scale_width - (2048.0 / 1920.0) * 2.0).abs() < 1e-6);
    assert!((scaler.scale_height - (1536.0 / 1080.0) * 2.0).abs() < 1e-6);

    // The standalone accessor agrees with the routing-table walk.
    assert_eq!(graph.scaler_ratios(), bundle.scalers);
}

/// Streams beyond the sink budget fail up front with the binding counts.
#[test]
fn test_budget_exhaustion_reports_counts() {
    let store = store_with(vec![build_template(TemplateSpec::default())]);
    let resolver = GraphResolver::new(store, 0, ConfigMode::Normal, SinkPolicy::Coupled);

    let streams: Vec<StreamSpec> =
        (0..7).map(|i| stream(i, 640, 480, StreamUsage::Preview)).collect();
    let err = resolver.resolve(&streams, SensorMode::Unknown, false).unwrap_err();
    assert!(matches!(
        err,
        GraphError::NoOutputSlot { video_bound: 3, still_bound: 3, .. }
    ));
}

/// The dry run reports feasibility and leaves no trace in the store.
#[test]
fn test_check_reports_feasibility() {
    let store = store_with(vec![build_template(TemplateSpec::default())]);
    let resolver =
        GraphResolver::new(Arc::clone(&store), 0, ConfigMode::Normal, SinkPolicy::Coupled);

    resolver.check(&[stream(0, 1920, 1080, StreamUsage::Video)], SensorMode::Unknown, false)
        .unwrap();
    assert!(matches!(
        resolver.check(&[stream(0, 640, 360, StreamUsage::Preview)], SensorMode::Unknown, false),
        Err(GraphError::NoGraphMatch)
    ));

    // Even for a video stream the dry run must not apply the format
    // override to the shared template.
    let db = store.settings(0).unwrap();
    let handle = db.query(&camgraph::query::QueryRule::new())[0];
    let forest = db.template(handle).forest();
    let main = forest.by_path("video_pg_main:main").unwrap();
    assert_eq!(forest.attr_str(main, "format"), Some("Linear"));
}

/// Config-mode filtering is terminal when nothing supports the active mode.
#[test]
fn test_config_mode_filter() {
    let store = store_with(vec![build_template(TemplateSpec {
        modes: "STILL_CAPTURE",
        ..TemplateSpec::default()
    })]);
    let resolver = GraphResolver::new(store, 0, ConfigMode::Normal, SinkPolicy::Coupled);

    assert!(matches!(
        resolver.resolve(&[stream(0, 1920, 1080, StreamUsage::Preview)], SensorMode::Unknown, false),
        Err(GraphError::ModeMismatch { mode: ConfigMode::Normal })
    ));

    let still_resolver = GraphResolver::new(
        store_with(vec![build_template(TemplateSpec {
            modes: "NORMAL,STILL_CAPTURE",
            ..TemplateSpec::default()
        })]),
        0,
        ConfigMode::StillCapture,
        SinkPolicy::Coupled,
    );
    assert!(still_resolver
        .resolve(&[stream(0, 1920, 1080, StreamUsage::Preview)], SensorMode::Unknown, false)
        .is_ok());
}

/// Resolution is a pure function of its inputs.
#[test]
fn test_repeated_resolution_is_identical() {
    let store = store_with(vec![
        build_template(TemplateSpec::default()),
        build_template(TemplateSpec {
            key: 2,
            pg_name: "still_pg_main",
            stream_id: STILL_PG_STREAM,
            sink_name: "still0",
            sink_res: (4032, 3024),
            terminal_base: 50,
            ..TemplateSpec::default()
        }),
    ]);
    let resolver = GraphResolver::new(store, 0, ConfigMode::Normal, SinkPolicy::Dispersed);
    let streams =
        [stream(0, 1920, 1080, StreamUsage::Video), stream(1, 4032, 3024, StreamUsage::Still)];
    let pg_list = vec!["video_pg_main".to_string(), "still_pg_main".to_string()];

    let first = resolver.resolve(&streams, SensorMode::Unknown, false).unwrap();
    let second = resolver.resolve(&streams, SensorMode::Unknown, false).unwrap();
    assert_eq!(first.stream_ids(), second.stream_ids());
    assert_eq!(first.pg_names(), second.pg_names());
    assert_eq!(first.connections(&pg_list).unwrap(), second.connections(&pg_list).unwrap());
}
