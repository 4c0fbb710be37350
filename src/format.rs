//! Pixel formats and the resolution/format helpers used across the resolver.
//!
//! The settings database stores port formats as canonical graph strings
//! ("Linear", "YUY2", "TILE", ...). Client streams arrive with concrete
//! pixel formats. This module owns the mapping between the two, plus the
//! bytes-per-line and bits-per-pixel derivations needed when a port format
//! is resolved.

/// A concrete pixel format as requested by a client stream.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PixelFormat {
    /// 8-bit two-plane YUV 4:2:0.
    Nv12,
    /// 10-bit two-plane YUV 4:2:0.
    P010,
    /// 8-bit packed YUV 4:2:2.
    Yuyv,
}

impl PixelFormat {
    /// Canonical graph format string used by the secondary (format) query.
    ///
    /// A template is not required to encode format information, so the
    /// matcher treats an empty secondary query result as "no opinion".
    pub fn graph_format(self) -> &'static str {
        match self {
            PixelFormat::Nv12 | PixelFormat::P010 => "Linear",
            PixelFormat::Yuyv => "YUY2",
        }
    }

    /// Bits-per-pixel string used alongside [`graph_format`](Self::graph_format)
    /// in the secondary query.
    pub fn graph_bpp(self) -> &'static str {
        match self {
            PixelFormat::Nv12 | PixelFormat::Yuyv => "8",
            PixelFormat::P010 => "10",
        }
    }
}

/// A width/height pair in pixels.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Resolution {
    /// Width in pixels.
    pub width: u32,
    /// Height in lines.
    pub height: u32,
}

impl Resolution {
    /// Total pixel count, used for size ordering between candidates.
    pub fn area(self) -> u64 {
        u64::from(self.width) * u64::from(self.height)
    }
}

impl std::fmt::Display for Resolution {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}x{}", self.width, self.height)
    }
}

/// Bits per pixel for a graph format string.
///
/// Unknown formats default to 8 with a warning, matching the behavior of the
/// settings databases in the field which omit exotic formats.
pub fn bpp_for_graph_format(format: &str) -> u32 {
    match format {
        "Linear" | "YUY2" | "TILE" | "NV12" => 8,
        "P010" | "Linear10" | "TILE10" => 10,
        other => {
            tracing::warn!("unknown graph format '{other}', defaulting to 8 bpp");
            8
        }
    }
}

/// Bytes per line for a graph format string at a given width.
///
/// Settings may carry an explicit bytes-per-line attribute which overrides
/// this derivation; see the connection builder.
pub fn bpl_for_graph_format(format: &str, width: u32) -> u32 {
    match format {
        // packed 4:2:2, two bytes per pixel
        "YUY2" => width * 2,
        // 10-bit formats store two bytes per sample
        "P010" | "Linear10" | "TILE10" => width * 2,
        "Linear" | "TILE" | "NV12" => width,
        other => {
            tracing::warn!("unknown graph format '{other}', defaulting bpl to width");
            width
        }
    }
}
