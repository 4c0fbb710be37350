//! Kernel queries against a prepared pipe.
//!
//! Program groups cluster kernels under an internal stream id. The kernel
//! list of a stream is assembled once from the instance tree and memoized;
//! scaler and geometric-distortion lookups then run against the cached
//! lists. Streams with no kernels memoize an empty list so repeated misses
//! stay cheap.

use super::PipelineInstance;
use crate::descriptor::{NodeId, NodeKind};
use std::rc::Rc;

/// Internal stream id of the video pipe, preferred by scaler and GDC
/// lookups when several streams carry the same kernel.
pub const VIDEO_STREAM_ID: i32 = 60006;

/// Output-scaler kernel ids of the display pitch, both catalog revisions.
pub const DP_SCALER_KERNELS: [u32; 2] = [22660, 27715];
/// Output-scaler kernel ids of the post-processing pitch.
pub const PPP_SCALER_KERNELS: [u32; 2] = [23417, 28155];
/// Bayer-to-ISP downscaler kernel ids.
pub const B2I_DS_KERNELS: [u32; 2] = [11700, 25569];

/// GDC kernel id of revision 3, the default when no GDC kernel is found.
pub const GDC3_KERNEL: u32 = 5021;
/// GDC kernel ids probed in preference order.
pub const GDC_KERNELS: [u32; 4] = [33714, GDC3_KERNEL, 48695, 56475];

/// A crop rectangle in a kernel's resolution descriptor.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Rect {
    /// Left inset in pixels.
    pub left: i32,
    /// Top inset in lines.
    pub top: i32,
    /// Right inset in pixels.
    pub right: i32,
    /// Bottom inset in lines.
    pub bottom: i32,
}

impl Rect {
    fn is_zero(self) -> bool {
        self == Rect::default()
    }
}

/// Resolution descriptor of one kernel: the frame dimensions it reads and
/// writes, plus the crops applied on either side.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct KernelResolution {
    /// Input frame width.
    pub input_width: u32,
    /// Input frame height.
    pub input_height: u32,
    /// Output frame width.
    pub output_width: u32,
    /// Output frame height.
    pub output_height: u32,
    /// Crop applied to the input frame.
    pub input_crop: Rect,
    /// Crop applied to the output frame.
    pub output_crop: Rect,
}

impl KernelResolution {
    /// Width/height scaling ratio of this kernel.
    ///
    /// A ratio other than one is reported only when the dimensions differ
    /// and no crop is involved; a cropping kernel is not a scaler even when
    /// its frame sizes differ.
    pub fn ratio(&self) -> (f32, f32) {
        let scales = self.input_width != self.output_width || self.input_height != self.output_height;
        if scales && self.input_crop.is_zero() && self.output_crop.is_zero() {
            (
                self.input_width as f32 / self.output_width as f32,
                self.input_height as f32 / self.output_height as f32,
            )
        } else {
            (1.0, 1.0)
        }
    }
}

/// One kernel parsed from a program group.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Kernel {
    /// Kernel id, as assigned by the ISP parameter catalog.
    pub id: u32,
    /// Whether this template enables the kernel.
    pub enabled: bool,
    /// Resolution descriptor, absent for non-resizing kernels.
    pub resolution: Option<KernelResolution>,
    /// Accumulated resolution applied upstream of this kernel, when the
    /// template declares one.
    pub resolution_history: Option<KernelResolution>,
}

/// All kernels of one internal stream, in document order.
#[derive(Debug, Clone, Default)]
pub struct KernelList {
    /// The internal stream id these kernels run under.
    pub stream_id: i32,
    /// The kernels, in document order across the stream's program groups.
    pub kernels: Vec<Kernel>,
}

impl KernelList {
    /// Find a kernel by id.
    pub fn kernel(&self, kernel_id: u32) -> Option<&Kernel> {
        self.kernels.iter().find(|k| k.id == kernel_id)
    }
}

/// The GDC kernel a pipe runs, with its resolution descriptor.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct GdcSetting {
    /// Id of the GDC kernel found in the pipe.
    pub kernel_id: u32,
    /// Its resolution descriptor.
    pub resolution: KernelResolution,
}

impl PipelineInstance {
    /// The kernel list of an internal stream, memoized per instance.
    pub fn kernel_list(&self, stream_id: i32) -> Rc<KernelList> {
        if let Some(list) = self.kernel_cache.borrow().get(&stream_id) {
            return Rc::clone(list);
        }
        let list = Rc::new(self.collect_kernels(stream_id));
        self.kernel_cache.borrow_mut().insert(stream_id, Rc::clone(&list));
        list
    }

    fn collect_kernels(&self, stream_id: i32) -> KernelList {
        let mut kernels = Vec::new();
        for pg in self.forest.nodes_of_kind(NodeKind::ProgramGroup) {
            if self.forest.attr_int(pg, "stream_id") != Some(i64::from(stream_id)) {
                continue;
            }
            for node in self.forest.descendants(pg) {
                if self.forest.node(node).kind() != NodeKind::Kernel {
                    continue;
                }
                let Some(id) = self.forest.attr_int(node, "id") else {
                    tracing::warn!(
                        "kernel node '{}' lacks an id, skipping",
                        self.forest.full_name(node),
                    );
                    continue;
                };
                kernels.push(Kernel {
                    id: id as u32,
                    enabled: self.forest.attr_int(node, "enabled").unwrap_or(1) != 0,
                    resolution: self.kernel_resolution_of(node, ""),
                    resolution_history: self.kernel_resolution_of(node, "history_"),
                });
            }
        }
        tracing::debug!("collected {} kernels for stream {stream_id}", kernels.len());
        KernelList { stream_id, kernels }
    }

    /// A kernel carries a resolution descriptor only when all four frame
    /// dimensions are declared; crops default to zero. The history variant
    /// uses the same attribute names under a `history_` prefix.
    fn kernel_resolution_of(&self, node: NodeId, prefix: &str) -> Option<KernelResolution> {
        let dim = |key: &str| {
            self.forest.attr_int(node, &format!("{prefix}{key}")).map(|v| v as u32)
        };
        let crop = |side: &str| Rect {
            left: self.forest.attr_int(node, &format!("{prefix}{side}_crop_left")).unwrap_or(0)
                as i32,
            top: self.forest.attr_int(node, &format!("{prefix}{side}_crop_top")).unwrap_or(0)
                as i32,
            right: self.forest.attr_int(node, &format!("{prefix}{side}_crop_right")).unwrap_or(0)
                as i32,
            bottom: self.forest.attr_int(node, &format!("{prefix}{side}_crop_bottom")).unwrap_or(0)
                as i32,
        };
        Some(KernelResolution {
            input_width: dim("input_width")?,
            input_height: dim("input_height")?,
            output_width: dim("output_width")?,
            output_height: dim("output_height")?,
            input_crop: crop("input"),
            output_crop: crop("output"),
        })
    }

    /// Whether an internal stream carries the given kernel.
    pub fn is_kernel_in_stream(&self, stream_id: i32, kernel_id: u32) -> bool {
        self.kernel_list(stream_id).kernel(kernel_id).is_some()
    }

    /// Resolution descriptor of a kernel in an internal stream.
    pub fn kernel_resolution(&self, stream_id: i32, kernel_id: u32) -> Option<KernelResolution> {
        self.kernel_list(stream_id).kernel(kernel_id).and_then(|k| k.resolution)
    }

    /// Program-group id of the group carrying a kernel in an internal stream.
    pub fn pg_id_for_kernel(&self, stream_id: i32, kernel_id: u32) -> Option<i32> {
        for pg in self.forest.nodes_of_kind(NodeKind::ProgramGroup) {
            if self.forest.attr_int(pg, "stream_id") != Some(i64::from(stream_id)) {
                continue;
            }
            let has_kernel = self.forest.descendants(pg).any(|n| {
                self.forest.node(n).kind() == NodeKind::Kernel
                    && self.forest.attr_int(n, "id") == Some(i64::from(kernel_id))
            });
            if has_kernel {
                return self.forest.attr_int(pg, "pg_id").map(|v| v as i32);
            }
        }
        None
    }

    /// Resolution of the first kernel of a scaler family found in the pipe.
    ///
    /// Streams are scanned in document order; a hit on the video stream ends
    /// the scan, so a video-pipe scaler wins over a still-pipe one when both
    /// exist. Defaults to the family head on the video stream when nothing
    /// is found.
    pub(crate) fn scaler_kernel_resolution(&self, family: &[u32]) -> Option<KernelResolution> {
        let mut stream = VIDEO_STREAM_ID;
        let mut kernel = family[0];
        'streams: for stream_id in self.stream_ids() {
            for &candidate in family {
                if self.is_kernel_in_stream(stream_id, candidate) {
                    stream = stream_id;
                    kernel = candidate;
                    if stream_id == VIDEO_STREAM_ID {
                        break 'streams;
                    }
                    break;
                }
            }
        }
        self.kernel_resolution(stream, kernel)
    }

    /// Scaling ratio contributed by a scaler family, one when absent.
    pub(crate) fn scaler_family_ratio(&self, family: &[u32]) -> (f32, f32) {
        self.scaler_kernel_resolution(family).map(|r| r.ratio()).unwrap_or((1.0, 1.0))
    }

    /// The GDC kernel of this pipe and the stream carrying it.
    ///
    /// GDC revisions are probed in preference order on every stream, the
    /// video stream winning when more than one stream carries a GDC kernel.
    /// Defaults to revision 3 on the video stream.
    fn gdc_lookup(&self) -> (i32, u32) {
        let mut stream = VIDEO_STREAM_ID;
        let mut kernel = GDC3_KERNEL;
        for stream_id in self.stream_ids() {
            let Some(&found) =
                GDC_KERNELS.iter().find(|&&k| self.is_kernel_in_stream(stream_id, k))
            else {
                continue;
            };
            stream = stream_id;
            kernel = found;
            if stream_id == VIDEO_STREAM_ID {
                break;
            }
        }
        (stream, kernel)
    }

    /// Resolution descriptor of this pipe's GDC kernel, if declared.
    pub(crate) fn gdc_kernel_resolution(&self) -> Option<(u32, KernelResolution)> {
        let (stream, kernel) = self.gdc_lookup();
        self.kernel_resolution(stream, kernel).map(|r| (kernel, r))
    }

    /// The GDC kernel setting of this pipe.
    pub fn gdc_setting(&self) -> Option<GdcSetting> {
        let setting = self
            .gdc_kernel_resolution()
            .map(|(kernel_id, resolution)| GdcSetting { kernel_id, resolution });
        if setting.is_none() {
            tracing::debug!("no GDC resolution in this pipe");
        }
        setting
    }
}
