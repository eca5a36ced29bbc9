//! GStreamer-backed H.264/H.265 encoding with hardware acceleration when available

use std::collections::VecDeque;

use bytes::Bytes;
use gstreamer as gst;
use gstreamer::prelude::*;
use gstreamer_app as gst_app;
use gstreamer_video as gst_video;
use tracing::{debug, info, warn};

use crate::encoder::{CodecError, CodecOutput, RawFrame, SampleCodec, VideoFormat};

/// How long `drain` waits for each buffered unit before giving up.
const DRAIN_TIMEOUT_MS: u64 = 200;

/// How long `finish` waits for each unit while the encoder empties.
const EOS_TIMEOUT_MS: u64 = 2_000;

/// `appsrc ! encoder ! appsink` pipeline fed with NV12 frames
pub struct GstH26xCodec {
    pipeline: gst::Pipeline,
    appsrc: gst_app::AppSrc,
    appsink: gst_app::AppSink,
    /// Presentation time of every frame pushed but not yet pulled, with its index
    in_flight: VecDeque<(gst::ClockTime, u64)>,
}

impl GstH26xCodec {
    pub fn new(format: &VideoFormat) -> Result<Self, CodecError> {
        gst::init().map_err(|e| internal(format!("Failed to initialize GStreamer: {}", e)))?;

        let pipeline_str = Self::build_pipeline_string(format);
        info!("Encoder pipeline: {}", pipeline_str);

        let pipeline = gst::parse::launch(&pipeline_str)
            .map_err(|e| internal(e.to_string()))?
            .downcast::<gst::Pipeline>()
            .map_err(|_| internal("Failed to create pipeline"))?;

        let appsrc = pipeline
            .by_name("src")
            .ok_or_else(|| internal("Failed to find appsrc element"))?
            .downcast::<gst_app::AppSrc>()
            .map_err(|_| internal("Failed to cast to AppSrc"))?;

        let appsink = pipeline
            .by_name("sink")
            .ok_or_else(|| internal("Failed to find appsink element"))?
            .downcast::<gst_app::AppSink>()
            .map_err(|_| internal("Failed to cast to AppSink"))?;

        let video_info = gst_video::VideoInfo::builder(
            gst_video::VideoFormat::Nv12,
            format.width,
            format.height,
        )
        .fps(gst::Fraction::new(format.framerate as i32, 1))
        .build()
        .map_err(|e| internal(e.to_string()))?;
        let caps = video_info.to_caps().map_err(|e| internal(e.to_string()))?;

        appsrc.set_caps(Some(&caps));
        appsrc.set_format(gst::Format::Time);
        appsrc.set_is_live(true);

        appsink.set_property("emit-signals", false);
        appsink.set_property("sync", false);

        pipeline
            .set_state(gst::State::Playing)
            .map_err(|e| internal(format!("Failed to start pipeline: {:?}", e)))?;

        Ok(Self {
            pipeline,
            appsrc,
            appsink,
            in_flight: VecDeque::new(),
        })
    }

    fn build_pipeline_string(format: &VideoFormat) -> String {
        let kbps = (format.bitrate / 1000).max(1);
        let (encoder, caps) = if format.profile.is_hevc() {
            let encoder = Self::detect_encoder(&["nvh265enc", "vaapih265enc", "x265enc"]);
            (encoder, "video/x-h265,stream-format=byte-stream,alignment=au".to_string())
        } else {
            let encoder = Self::detect_encoder(&["nvh264enc", "vaapih264enc", "x264enc"]);
            let profile = match format.profile {
                crate::encoder::H26xProfile::H264Base => "baseline",
                crate::encoder::H26xProfile::H264Main => "main",
                _ => "high",
            };
            (
                encoder,
                format!("video/x-h264,stream-format=byte-stream,alignment=au,profile={profile}"),
            )
        };

        // Software encoders reorder frames unless told otherwise
        let tuning = match encoder {
            "x264enc" => format!(
                " tune=zerolatency speed-preset=ultrafast key-int-max={}",
                format.framerate
            ),
            "x265enc" => " tune=zerolatency speed-preset=ultrafast".to_string(),
            _ => String::new(),
        };

        format!(
            "appsrc name=src ! \
             queue max-size-buffers=2 max-size-time=0 max-size-bytes=0 ! \
             {encoder} bitrate={kbps}{tuning} ! \
             {caps} ! \
             appsink name=sink"
        )
    }

    /// Pick the best available encoder (hardware > software)
    fn detect_encoder(candidates: &[&'static str]) -> &'static str {
        for &name in candidates {
            if let Some(factory) = gst::ElementFactory::find(name) {
                debug!(
                    "Found encoder: {} - {}",
                    name,
                    factory.metadata("long-name").unwrap_or("")
                );
                return name;
            }
        }

        let fallback = candidates.last().copied().unwrap_or("x264enc");
        warn!("No hardware encoder found, using {}", fallback);
        fallback
    }

    fn pull(&mut self, timeout: gst::ClockTime) -> Result<Option<CodecOutput>, CodecError> {
        let Some(sample) = self.appsink.try_pull_sample(timeout) else {
            return Ok(None);
        };
        let buffer = sample
            .buffer()
            .ok_or_else(|| internal("Sample contains no buffer"))?;
        let map = buffer
            .map_readable()
            .map_err(|_| internal("Failed to map buffer"))?;
        let data = Bytes::copy_from_slice(map.as_slice());

        // Encoded units keep the presentation time of the frame they encode
        let index = match buffer.pts() {
            Some(pts) => {
                let position = self.in_flight.iter().position(|(t, _)| *t == pts);
                match position {
                    Some(at) => {
                        let (_, index) = self.in_flight[at];
                        self.in_flight.drain(..=at);
                        index
                    }
                    None => return Err(internal(format!("Unexpected output pts {}", pts))),
                }
            }
            None => self
                .in_flight
                .pop_front()
                .map(|(_, index)| index)
                .ok_or_else(|| internal("Output without matching input"))?,
        };

        Ok(Some(CodecOutput { index, data }))
    }
}

impl SampleCodec for GstH26xCodec {
    fn encode(&mut self, frame: RawFrame) -> Result<Vec<CodecOutput>, CodecError> {
        let pts = hns_to_clock(frame.sample_time);
        let duration = hns_to_clock(frame.duration);

        let mut buffer = gst::Buffer::from_mut_slice(frame.data);
        {
            let buffer = buffer.make_mut();
            buffer.set_pts(pts);
            buffer.set_duration(duration);
        }

        self.appsrc
            .push_buffer(buffer)
            .map_err(|e| internal(format!("Failed to push frame: {:?}", e)))?;
        self.in_flight.push_back((pts, frame.index));

        let mut outputs = Vec::new();
        while let Some(output) = self.pull(gst::ClockTime::ZERO)? {
            outputs.push(output);
        }
        Ok(outputs)
    }

    fn drain(&mut self) -> Result<Vec<CodecOutput>, CodecError> {
        // A serialized drain query makes the encoder emit its lookahead
        // without ending the stream
        let drained = self
            .appsrc
            .static_pad("src")
            .is_some_and(|pad| pad.peer_query(&mut gst::query::Drain::new()));
        if !drained {
            debug!("Encoder did not answer drain query");
        }

        let mut outputs = Vec::new();
        while !self.in_flight.is_empty() {
            match self.pull(gst::ClockTime::from_mseconds(DRAIN_TIMEOUT_MS))? {
                Some(output) => outputs.push(output),
                None => break,
            }
        }
        Ok(outputs)
    }

    fn finish(&mut self) -> Result<Vec<CodecOutput>, CodecError> {
        self.appsrc
            .end_of_stream()
            .map_err(|e| internal(format!("Failed to end stream: {:?}", e)))?;

        let mut outputs = Vec::new();
        while !self.appsink.is_eos() {
            match self.pull(gst::ClockTime::from_mseconds(EOS_TIMEOUT_MS))? {
                Some(output) => outputs.push(output),
                None if self.appsink.is_eos() => break,
                None => {
                    warn!(
                        "Encoder did not reach end of stream, {} frames outstanding",
                        self.in_flight.len()
                    );
                    break;
                }
            }
        }
        Ok(outputs)
    }
}

impl Drop for GstH26xCodec {
    fn drop(&mut self) {
        let _ = self.appsrc.end_of_stream();
        let _ = self.pipeline.set_state(gst::State::Null);
    }
}

fn hns_to_clock(hns: i64) -> gst::ClockTime {
    gst::ClockTime::from_nseconds(hns.max(0) as u64 * 100)
}

fn internal(message: impl Into<String>) -> CodecError {
    CodecError::Internal(message.into())
}
