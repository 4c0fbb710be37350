//! Candidate matching: narrow the settings database down to the template(s)
//! a resolution pass will instantiate.
//!
//! Matching runs in phases. Phase one is the raw predicate query built by the
//! query module. Phase two keeps only templates declaring support for the
//! active config mode. Phase three, attempted only while more than one
//! candidate survives, refines by per-sink format and bits-per-pixel; a
//! refinement that would empty the set is discarded, since templates are not
//! required to encode format information. A sensor-mode hint finally orders
//! the survivors by capture-source resolution before one is picked.

use crate::descriptor::{ConfigMode, NodeForest, SettingsDatabase, TemplateHandle};
use crate::error::{GraphError, Result};
use crate::format::Resolution;
use crate::query::{ClassQuery, Queries, QueryRule};

/// Well-known capture-stage output ports, probed in order when reading the
/// capture-source resolution of a template.
const CAPTURE_OUTPUT_PATHS: [&str; 3] = ["csi_be:output", "csi_be_dol:output", "csi_be_soc:output"];

/// Sensor readout hint that orders surviving candidates by capture size.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SensorMode {
    /// Full-resolution readout: prefer the largest capture size.
    Full,
    /// Binned readout: prefer the smallest capture size.
    Binning,
    /// No hint: fall back to the smallest-capture rule.
    #[default]
    Unknown,
}

/// The matcher's verdict, mirroring the query shape.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Selection {
    /// One template serves the whole configuration.
    Single(TemplateHandle),
    /// Independent templates for the two classes, consistency-checked.
    Paired {
        /// Template chosen for the video class.
        video: TemplateHandle,
        /// Template chosen for the still class.
        still: TemplateHandle,
    },
}

/// Read the capture-source output resolution of a template tree.
///
/// Probes the well-known capture-stage output ports in declaration order; the
/// DOL variant exists only in HDR topologies and the SoC variant only in
/// fixed-pipeline ones, so the first hit is unambiguous.
pub fn capture_resolution(forest: &NodeForest) -> Result<Resolution> {
    for path in CAPTURE_OUTPUT_PATHS {
        if let Some(port) = forest.by_path(path) {
            let width = forest.attr_int(port, "width");
            let height = forest.attr_int(port, "height");
            if let (Some(width), Some(height)) = (width, height) {
                return Ok(Resolution { width: width as u32, height: height as u32 });
            }
        }
    }
    Err(GraphError::NoCaptureOutput)
}

/// Multi-phase matcher over one camera's settings database.
#[derive(Debug, Clone, Copy)]
pub struct CandidateMatcher<'a> {
    db: &'a SettingsDatabase,
    mode: ConfigMode,
    sensor_mode: SensorMode,
}

impl<'a> CandidateMatcher<'a> {
    /// Create a matcher for one resolution pass.
    pub fn new(db: &'a SettingsDatabase, mode: ConfigMode, sensor_mode: SensorMode) -> Self {
        Self { db, mode, sensor_mode }
    }

    /// Run all phases and pick the template(s) for this query set.
    pub fn select(&self, queries: &Queries) -> Result<Selection> {
        match queries {
            Queries::Single(query) => {
                let candidates = self.match_class(query)?;
                Ok(Selection::Single(self.pick_single(&candidates)))
            }
            Queries::Paired { video, still } => {
                let video_candidates = self.match_class(video)?;
                let still_candidates = self.match_class(still)?;
                let (video, still) = self.pick_pair(&video_candidates, &still_candidates)?;
                Ok(Selection::Paired { video, still })
            }
        }
    }

    /// Phases one to three plus the sensor-mode ordering, for one class.
    fn match_class(&self, query: &ClassQuery) -> Result<Vec<TemplateHandle>> {
        let raw = self.db.query(&query.rule);
        tracing::debug!("raw query matched {} of {} templates", raw.len(), self.db.len());
        if raw.is_empty() {
            return Err(GraphError::NoGraphMatch);
        }

        let mut candidates: Vec<TemplateHandle> = raw
            .into_iter()
            .filter(|&h| self.db.template(h).supports_mode(self.mode))
            .collect();
        if candidates.is_empty() {
            return Err(GraphError::ModeMismatch { mode: self.mode });
        }

        if candidates.len() > 1 {
            let mut format_rule = QueryRule::new();
            for (&sink, stream) in &query.sink_map {
                format_rule.insert(Some(sink), "format", stream.format.graph_format());
                format_rule.insert(Some(sink), "bpp", stream.format.graph_bpp());
            }
            let refined = self.db.query_subset(&format_rule, &candidates);
            if refined.is_empty() {
                tracing::debug!("format refinement matched nothing, keeping mode-filtered set");
            } else {
                candidates = refined;
            }
        }

        self.order_by_sensor_mode(&mut candidates);
        Ok(candidates)
    }

    fn order_by_sensor_mode(&self, candidates: &mut [TemplateHandle]) {
        let area = |h: TemplateHandle| {
            capture_resolution(self.db.template(h).forest()).map(Resolution::area).unwrap_or(0)
        };
        match self.sensor_mode {
            SensorMode::Full => candidates.sort_by_key(|&h| std::cmp::Reverse(area(h))),
            SensorMode::Binning => candidates.sort_by_key(|&h| area(h)),
            SensorMode::Unknown => {}
        }
    }

    /// One class: the hinted ordering already placed the preferred candidate
    /// first; without a hint, pick the smallest capture size, first-seen on
    /// ties.
    fn pick_single(&self, candidates: &[TemplateHandle]) -> TemplateHandle {
        if self.sensor_mode != SensorMode::Unknown {
            return candidates[0];
        }
        let mut best = candidates[0];
        let mut best_area =
            capture_resolution(self.db.template(best).forest()).map(Resolution::area).unwrap_or(u64::MAX);
        for &h in &candidates[1..] {
            let area = capture_resolution(self.db.template(h).forest())
                .map(Resolution::area)
                .unwrap_or(u64::MAX);
            if area < best_area {
                best = h;
                best_area = area;
            }
        }
        best
    }

    /// Two classes: the pair must agree on the capture-source resolution,
    /// since one sensor feeds both pipes. First agreeing pair in candidate
    /// order wins.
    fn pick_pair(
        &self,
        video: &[TemplateHandle],
        still: &[TemplateHandle],
    ) -> Result<(TemplateHandle, TemplateHandle)> {
        for &v in video {
            let Ok(v_res) = capture_resolution(self.db.template(v).forest()) else {
                continue;
            };
            for &s in still {
                let Ok(s_res) = capture_resolution(self.db.template(s).forest()) else {
                    continue;
                };
                if s_res == v_res {
                    tracing::debug!(
                        "consistent pair: video key {}, still key {}, capture {v_res}",
                        self.db.template(v).key(),
                        self.db.template(s).key(),
                    );
                    return Ok((v, s));
                }
            }
        }
        Err(GraphError::NoConsistentPair)
    }
}
