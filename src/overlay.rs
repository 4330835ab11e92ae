// src/overlay.rs
//
// Optional annotated-video output: draws a position marker and track-id
// label for every bound track onto the source video, frame by frame, at
// the source frame rate.

use crate::tracker::Track;
use anyhow::{bail, Context, Result};
use opencv::{
    core::{self, Mat},
    imgproc,
    prelude::*,
    videoio::{self, VideoCapture, VideoCaptureTrait, VideoCaptureTraitConst, VideoWriter},
};
use std::path::Path;
use tracing::info;

pub struct OverlayRenderer {
    cap: VideoCapture,
    writer: VideoWriter,
    fps: f64,
    /// Index of the next source frame to read.
    next_frame: i64,
    draw_coasting: bool,
    colors: Vec<core::Scalar>,
}

impl OverlayRenderer {
    pub fn open(input: &Path, output: &Path, draw_coasting: bool) -> Result<Self> {
        info!("Opening source video: {}", input.display());
        let cap = VideoCapture::from_file(
            input.to_str().context("Non-UTF8 video path")?,
            videoio::CAP_ANY,
        )?;
        if !cap.is_opened()? {
            bail!("Failed to open video file {}", input.display());
        }

        let fps = VideoCaptureTraitConst::get(&cap, videoio::CAP_PROP_FPS)?;
        let width = VideoCaptureTraitConst::get(&cap, videoio::CAP_PROP_FRAME_WIDTH)? as i32;
        let height = VideoCaptureTraitConst::get(&cap, videoio::CAP_PROP_FRAME_HEIGHT)? as i32;
        info!("Video properties: {}x{} @ {:.1} FPS", width, height, fps);

        let fourcc = VideoWriter::fourcc('m', 'p', '4', 'v')?;
        let writer = VideoWriter::new(
            output.to_str().context("Non-UTF8 video path")?,
            fourcc,
            fps,
            core::Size::new(width, height),
            true,
        )?;
        info!("Annotated video: {}", output.display());

        Ok(Self {
            cap,
            writer,
            fps,
            next_frame: 0,
            draw_coasting,
            colors: vec![
                core::Scalar::new(0.0, 0.0, 255.0, 0.0),   // Red
                core::Scalar::new(0.0, 255.0, 0.0, 0.0),   // Green
                core::Scalar::new(255.0, 0.0, 0.0, 0.0),   // Blue
                core::Scalar::new(0.0, 255.0, 255.0, 0.0), // Yellow
                core::Scalar::new(255.0, 0.0, 255.0, 0.0), // Magenta
                core::Scalar::new(255.0, 255.0, 0.0, 0.0), // Cyan
            ],
        })
    }

    pub fn fps(&self) -> f64 {
        self.fps
    }

    /// Copy source frames through up to `frame_index`, annotating that
    /// frame with the live tracks. Skipped frames pass through unchanged.
    pub fn annotate_frame(&mut self, frame_index: i64, tracks: &[Track]) -> Result<()> {
        while self.next_frame <= frame_index {
            let mut mat = Mat::default();
            if !VideoCaptureTrait::read(&mut self.cap, &mut mat)? || mat.empty() {
                // Detection stream outlives the source video; stop drawing.
                return Ok(());
            }
            if self.next_frame == frame_index {
                self.draw_tracks(&mut mat, tracks)?;
            }
            self.writer.write(&mat)?;
            self.next_frame += 1;
        }
        Ok(())
    }

    fn draw_tracks(&mut self, mat: &mut Mat, tracks: &[Track]) -> Result<()> {
        for track in tracks {
            if !track.assigned && !self.draw_coasting {
                continue;
            }
            let color = self.colors[(track.id as usize) % self.colors.len()];
            let center = core::Point::new(track.position.0 as i32, track.position.1 as i32);
            // Bound tracks are solid, coasting tracks hollow.
            let thickness = if track.assigned { -1 } else { 2 };
            imgproc::circle(mat, center, 6, color, thickness, imgproc::LINE_AA, 0)?;
            imgproc::put_text(
                mat,
                &track.id.to_string(),
                core::Point::new(center.x + 8, center.y - 8),
                imgproc::FONT_HERSHEY_SIMPLEX,
                0.5,
                color,
                1,
                imgproc::LINE_AA,
                false,
            )?;
        }
        Ok(())
    }

    /// Copy any remaining source frames through so the annotated video
    /// keeps the source length.
    pub fn finish(&mut self) -> Result<()> {
        loop {
            let mut mat = Mat::default();
            if !VideoCaptureTrait::read(&mut self.cap, &mut mat)? || mat.empty() {
                break;
            }
            self.writer.write(&mat)?;
        }
        self.writer.release()?;
        Ok(())
    }
}
