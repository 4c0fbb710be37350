//! Total downscaling ratio per client stream.
//!
//! The ratio a client buffer was scaled by is the product of three factors:
//! the output-scaler pitch serving the port, the geometric-distortion kernel
//! and the bayer-to-ISP downscaler. Downstream 3A code uses the ratio to map
//! statistics coordinates back onto the full capture frame.

use crate::pipe::kernels::{DP_SCALER_KERNELS, PPP_SCALER_KERNELS, B2I_DS_KERNELS};
use crate::pipe::PipelineInstance;

/// Total scaling applied between the capture frame and one client stream.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ScalerInfo {
    /// Client stream the ratio applies to.
    pub stream_id: i32,
    /// Horizontal input/output ratio, greater than one when downscaling.
    pub scale_width: f32,
    /// Vertical input/output ratio.
    pub scale_height: f32,
}

/// Which output-scaler pitch serves an edge port, by port name.
fn output_scaler_family(port_name: &str) -> Option<&'static [u32]> {
    match port_name {
        // The main pitch never scales.
        "main" => Some(&[]),
        "display" => Some(&DP_SCALER_KERNELS),
        "postproc" => Some(&PPP_SCALER_KERNELS),
        _ => None,
    }
}

impl PipelineInstance {
    /// Scaler info for every bound client stream of this pipe, in sink
    /// declaration order. Streams served by an unscaled pitch are omitted.
    pub fn scaler_ratios(&self) -> Vec<ScalerInfo> {
        self.sink_peers
            .iter()
            .filter_map(|&(sink_node, peer)| {
                let sink_name = self.forest.node(sink_node).name();
                let stream = self.stream_for_sink_name(sink_name)?;
                scaler_for_port(self, self.forest.node(peer).name(), stream.id)
            })
            .collect()
    }
}

/// Compute the scaler info of one client-facing edge port, `None` when the
/// port is not one of the scaled output pitches.
pub(crate) fn scaler_for_port(
    pipe: &PipelineInstance,
    port_name: &str,
    stream_id: i32,
) -> Option<ScalerInfo> {
    let family = output_scaler_family(port_name)?;
    let (os_w, os_h) =
        if family.is_empty() { (1.0, 1.0) } else { pipe.scaler_family_ratio(family) };

    let (gdc_w, gdc_h) =
        pipe.gdc_kernel_resolution().map(|(_, r)| r.ratio()).unwrap_or((1.0, 1.0));

    let (ds_w, ds_h) = pipe.scaler_family_ratio(&B2I_DS_KERNELS);

    let info = ScalerInfo {
        stream_id,
        scale_width: os_w * gdc_w * ds_w,
        scale_height: os_h * gdc_h * ds_h,
    };
    tracing::debug!(
        "stream {stream_id} port '{port_name}': scaler ratio {}x{}",
        info.scale_width,
        info.scale_height,
    );
    Some(info)
}
