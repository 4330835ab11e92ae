// src/pipeline.rs
//
// End-to-end run: batch the detection stream per frame, derive features,
// feed the tracker and fan the bound tracks out to the configured sinks.

use crate::config::{Config, OutputConfig};
use crate::features::FeatureDeriver;
use crate::io::{self, CsvStreamWriter, FeatherStreamWriter, RecordReader, RecordWriter};
use crate::overlay::OverlayRenderer;
use crate::tracker::{Tracker, TrackerSummary};
use crate::types::{Detection, Record, Value, ValueMap};
use anyhow::{bail, Context, Result};
use std::fs::File;
use std::path::{Path, PathBuf};
use tracing::{info, warn};
use walkdir::WalkDir;

/// Log a progress line every this many processed frames.
const PROGRESS_INTERVAL: i64 = 100;

#[derive(Debug, Clone, Default)]
pub struct PipelineStats {
    pub frames: u64,
    pub rows_in: u64,
    pub rows_out: u64,
    pub rows_skipped: u64,
    pub tracks_spawned: u64,
    pub tracks_live: usize,
}

/// Expand the configured paths: directories recurse, files pass through.
/// The result is sorted so multi-file inputs concatenate in a stable order.
pub fn find_input_files(paths: &[String]) -> Result<Vec<PathBuf>> {
    let mut files = Vec::new();
    for path in paths {
        let path = Path::new(path);
        if path.is_dir() {
            for entry in WalkDir::new(path)
                .follow_links(true)
                .into_iter()
                .filter_map(|e| e.ok())
            {
                if entry.file_type().is_file() {
                    files.push(entry.path().to_path_buf());
                }
            }
        } else if path.is_file() {
            files.push(path.to_path_buf());
        } else {
            bail!("Input path not found: {}", path.display());
        }
    }
    files.sort();
    if files.is_empty() {
        bail!("Missing input files");
    }
    Ok(files)
}

/// Groups a non-decreasing record stream into per-frame batches.
pub struct FrameBatcher {
    reader: Box<dyn RecordReader>,
    pending: Option<Record>,
    last_frame: Option<i64>,
}

impl FrameBatcher {
    pub fn new(reader: Box<dyn RecordReader>) -> Self {
        Self {
            reader,
            pending: None,
            last_frame: None,
        }
    }

    pub fn total_rows(&self) -> Option<usize> {
        self.reader.total_rows()
    }

    /// All records of the next frame, or `None` at end of stream. A
    /// decreasing frame index is a terminal input error.
    pub fn next_frame(&mut self) -> Result<Option<(i64, Vec<Record>)>> {
        let first = match self.pending.take() {
            Some(record) => record,
            None => match self.reader.read_next()? {
                Some(record) => record,
                None => return Ok(None),
            },
        };
        if let Some(last) = self.last_frame {
            if first.frame < last {
                bail!(
                    "Frame index went backwards: {} after {}",
                    first.frame,
                    last
                );
            }
        }
        let frame = first.frame;
        self.last_frame = Some(frame);

        let mut rows = vec![first];
        while let Some(record) = self.reader.read_next()? {
            if record.frame < frame {
                bail!(
                    "Frame index went backwards: {} after {}",
                    record.frame,
                    frame
                );
            }
            if record.frame == frame {
                rows.push(record);
            } else {
                self.pending = Some(record);
                break;
            }
        }
        Ok(Some((frame, rows)))
    }
}

enum Step {
    Process,
    Skip,
    Done,
}

fn window_step(frame: i64, start: i64, end: Option<i64>, interval: i64) -> Step {
    if let Some(end) = end {
        if frame > end {
            return Step::Done;
        }
    }
    if frame < start || frame % interval != 0 {
        return Step::Skip;
    }
    Step::Process
}

fn debug_sink_path(output: &OutputConfig) -> Option<PathBuf> {
    let base = output.csv.as_ref().or(output.feather.as_ref())?;
    let path = Path::new(base);
    let stem = path.file_stem()?.to_string_lossy().into_owned();
    Some(path.with_file_name(format!("{}_matches.csv", stem)))
}

pub fn run(config: &Config) -> Result<PipelineStats> {
    let files = find_input_files(&config.input.paths)?;
    info!("Tracking {} input file(s)", files.len());
    if let Some(label) = &config.input.id_label {
        info!("Source id column '{}' is carried through, not trusted", label);
    }

    let mut overlay = match (&config.video.input, &config.video.output) {
        (Some(input), Some(output)) => Some(OverlayRenderer::open(
            Path::new(input),
            Path::new(output),
            config.video.draw_coasting,
        )?),
        _ => None,
    };

    // Time-string bounds resolve through the source video's frame rate
    // when one is open, else through the configured rate.
    let fps = overlay.as_ref().map(|o| o.fps()).or(config.input.fps);
    let frame_start = match &config.input.frame_start {
        Some(bound) => bound.resolve(fps)?,
        None => 0,
    };
    let frame_end = match &config.input.frame_end {
        Some(bound) => Some(bound.resolve(fps)?),
        None => None,
    };

    let reader = io::open_reader(&files)?;
    let mut batcher = FrameBatcher::new(reader);
    let total_rows = batcher.total_rows();
    match total_rows {
        Some(total) => info!("Input stream: {} rows", total),
        None => info!("Input stream: row count unknown up front"),
    }

    let mut sinks: Vec<Box<dyn RecordWriter>> = Vec::new();
    if let Some(path) = &config.output.csv {
        sinks.push(Box::new(CsvStreamWriter::create(Path::new(path))?));
        info!("CSV output: {}", path);
    }
    if let Some(path) = &config.output.feather {
        sinks.push(Box::new(FeatherStreamWriter::<File>::create(Path::new(
            path,
        ))?));
        info!("Feather output: {}", path);
    }
    if sinks.is_empty() && overlay.is_none() {
        warn!("No outputs configured; tracking results will be discarded");
    }

    let mut debug_sink = if config.output.debug_mode {
        match debug_sink_path(&config.output) {
            Some(path) => {
                info!("Match diagnostics: {}", path.display());
                Some(CsvStreamWriter::create(&path)?)
            }
            None => {
                warn!("debug_mode is set but no file output is configured");
                None
            }
        }
    } else {
        None
    };

    let deriver = FeatureDeriver::new(config.input.landmarks.clone());
    let mut tracker = Tracker::new(config.tracking.clone());
    let mut stats = PipelineStats::default();
    let mut rows_seen: u64 = 0;

    while let Some((frame, rows)) = batcher.next_frame()? {
        rows_seen += rows.len() as u64;
        match window_step(frame, frame_start, frame_end, config.input.frame_interval) {
            Step::Done => break,
            Step::Skip => continue,
            Step::Process => {}
        }
        stats.rows_in += rows.len() as u64;

        let mut detections: Vec<Detection> = Vec::with_capacity(rows.len());
        for row in &rows {
            match deriver.derive(row) {
                Some(detection) => detections.push(detection),
                None => stats.rows_skipped += 1,
            }
        }

        tracker.process_frame(frame, &detections);
        let tracks = tracker.live_tracks();

        for track in tracks.iter().filter(|t| t.assigned) {
            let mut out = ValueMap::with_capacity(track.original_values.len() + 1);
            out.insert("track_id".to_string(), Value::Int(track.id as i64));
            for (key, value) in &track.original_values {
                if key != "track_id" {
                    out.insert(key.clone(), value.clone());
                }
            }
            for sink in &mut sinks {
                sink.write(&out)?;
            }
            stats.rows_out += 1;
        }

        if let Some(sink) = debug_sink.as_mut() {
            for event in tracker.last_match_events() {
                let mut out = ValueMap::with_capacity(7);
                out.insert("frame".to_string(), Value::Int(event.frame));
                out.insert("track_id".to_string(), Value::Int(event.track_id as i64));
                out.insert("distance".to_string(), Value::Float(event.distance));
                out.insert("match_factor".to_string(), Value::Float(event.match_factor));
                out.insert(
                    "active_factor".to_string(),
                    Value::Float(event.active_factor),
                );
                out.insert("range_factor".to_string(), Value::Float(event.range_factor));
                out.insert(
                    "length_factor".to_string(),
                    Value::Float(event.length_factor),
                );
                sink.write(&out)?;
            }
        }

        if let Some(renderer) = overlay.as_mut() {
            renderer.annotate_frame(frame, tracks)?;
        }

        stats.frames += 1;
        if stats.frames as i64 % PROGRESS_INTERVAL == 0 {
            let live = tracker.live_tracks().len();
            match total_rows {
                Some(total) if total > 0 => info!(
                    "Processed frame {} ({} rows, {:.1}%, {} live tracks)",
                    frame,
                    rows_seen,
                    rows_seen as f64 / total as f64 * 100.0,
                    live
                ),
                _ => info!(
                    "Processed frame {} ({} rows, {} live tracks)",
                    frame, rows_seen, live
                ),
            }
        }
    }

    for sink in &mut sinks {
        sink.close().context("Failed to finalize output")?;
    }
    if let Some(mut sink) = debug_sink {
        sink.close().context("Failed to finalize match diagnostics")?;
    }
    if let Some(mut renderer) = overlay {
        renderer.finish()?;
    }

    let TrackerSummary {
        tracks_spawned,
        tracks_live,
    } = tracker.finish();
    stats.tracks_spawned = tracks_spawned;
    stats.tracks_live = tracks_live;
    Ok(stats)
}

#[cfg(test)]
mod tests {
    use super::*;

    struct VecReader {
        records: Vec<Record>,
        next: usize,
    }

    impl VecReader {
        fn new(frames: &[i64]) -> Box<dyn RecordReader> {
            let records = frames
                .iter()
                .map(|&frame| Record {
                    frame,
                    values: ValueMap::new(),
                })
                .collect();
            Box::new(Self { records, next: 0 })
        }
    }

    impl RecordReader for VecReader {
        fn total_rows(&self) -> Option<usize> {
            Some(self.records.len())
        }

        fn read_next(&mut self) -> Result<Option<Record>> {
            let record = self.records.get(self.next).cloned();
            self.next += 1;
            Ok(record)
        }
    }

    #[test]
    fn test_batcher_groups_by_frame() {
        let mut batcher = FrameBatcher::new(VecReader::new(&[0, 0, 0, 1, 3, 3]));
        let (frame, rows) = batcher.next_frame().unwrap().unwrap();
        assert_eq!(frame, 0);
        assert_eq!(rows.len(), 3);
        let (frame, rows) = batcher.next_frame().unwrap().unwrap();
        assert_eq!(frame, 1);
        assert_eq!(rows.len(), 1);
        // Frame 2 is absent from the stream, not an error.
        let (frame, rows) = batcher.next_frame().unwrap().unwrap();
        assert_eq!(frame, 3);
        assert_eq!(rows.len(), 2);
        assert!(batcher.next_frame().unwrap().is_none());
    }

    #[test]
    fn test_batcher_rejects_decreasing_frames() {
        let mut batcher = FrameBatcher::new(VecReader::new(&[5, 5, 4]));
        assert!(batcher.next_frame().is_err());
    }

    #[test]
    fn test_batcher_empty_stream() {
        let mut batcher = FrameBatcher::new(VecReader::new(&[]));
        assert!(batcher.next_frame().unwrap().is_none());
    }

    #[test]
    fn test_window_step_bounds_and_interval() {
        assert!(matches!(window_step(10, 0, None, 1), Step::Process));
        assert!(matches!(window_step(10, 20, None, 1), Step::Skip));
        assert!(matches!(window_step(30, 0, Some(20), 1), Step::Done));
        // End is inclusive.
        assert!(matches!(window_step(20, 0, Some(20), 1), Step::Process));
        assert!(matches!(window_step(7, 0, None, 5), Step::Skip));
        assert!(matches!(window_step(10, 0, None, 5), Step::Process));
    }

    #[test]
    fn test_debug_sink_path_from_csv_output() {
        let output = OutputConfig {
            csv: Some("results/tracks.csv".to_string()),
            feather: None,
            debug_mode: true,
        };
        assert_eq!(
            debug_sink_path(&output).unwrap(),
            PathBuf::from("results/tracks_matches.csv")
        );
    }

    #[test]
    fn test_debug_sink_path_falls_back_to_feather() {
        let output = OutputConfig {
            csv: None,
            feather: Some("out/run1.feather".to_string()),
            debug_mode: true,
        };
        assert_eq!(
            debug_sink_path(&output).unwrap(),
            PathBuf::from("out/run1_matches.csv")
        );
    }
}
