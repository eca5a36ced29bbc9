//! Per-sensor calibration tables and the one-shot calibration transfer
//!
//! Field order on the wire, all `f32` little-endian, no length prefixes:
//! `uv2x[P] | uv2y[P] | extrinsics[16] | mapx[P] | mapy[P] | intrinsics[4]`
//! where `P = width * height`.

use std::io::{IoSlice, Write};

use serde::{Deserialize, Serialize};
use tracing::{info, instrument};

use crate::pose::PoseMatrix;
use crate::transport::{write_vectored_all, TransportError};

/// Remap entry for a rectified pixel whose ray misses the sensor.
pub const UNMAPPED: f32 = -1.0;

/// Offset on the unit plane used to measure focal length.
const FOCAL_STEP: f32 = 1e-3;

const UNDISTORT_ITERATIONS: usize = 20;

/// Projection between image pixels and the camera's z = 1 plane.
pub trait CameraModel: Send + Sync {
    /// Pixel to unit-plane point, or `None` when the pixel has no valid ray.
    fn unproject(&self, uv: [f32; 2]) -> Option<[f32; 2]>;

    /// Unit-plane point to pixel, or `None` when it does not land on the sensor model.
    fn project(&self, xy: [f32; 2]) -> Option<[f32; 2]>;
}

/// Pinhole camera with two-term radial distortion
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RadialCamera {
    pub fx: f32,
    pub fy: f32,
    pub cx: f32,
    pub cy: f32,
    pub k1: f32,
    pub k2: f32,
}

impl RadialCamera {
    fn distortion(&self, r2: f32) -> f32 {
        1.0 + self.k1 * r2 + self.k2 * r2 * r2
    }
}

impl Default for RadialCamera {
    fn default() -> Self {
        Self {
            fx: 366.0,
            fy: 366.0,
            cx: 320.0,
            cy: 240.0,
            k1: 0.0,
            k2: 0.0,
        }
    }
}

impl CameraModel for RadialCamera {
    fn unproject(&self, uv: [f32; 2]) -> Option<[f32; 2]> {
        let xd = (uv[0] - self.cx) / self.fx;
        let yd = (uv[1] - self.cy) / self.fy;

        let (mut x, mut y) = (xd, yd);
        for _ in 0..UNDISTORT_ITERATIONS {
            let d = self.distortion(x * x + y * y);
            if d <= 0.0 {
                return None;
            }
            x = xd / d;
            y = yd / d;
        }

        // Reject points where the fixed-point iteration did not settle
        let [u, v] = self.project([x, y])?;
        let tolerance = 1e-2;
        ((u - uv[0]).abs() < tolerance && (v - uv[1]).abs() < tolerance).then_some([x, y])
    }

    fn project(&self, xy: [f32; 2]) -> Option<[f32; 2]> {
        let d = self.distortion(xy[0] * xy[0] + xy[1] * xy[1]);
        if d <= 0.0 {
            return None;
        }
        let u = self.fx * xy[0] * d + self.cx;
        let v = self.fy * xy[1] * d + self.cy;
        (u.is_finite() && v.is_finite()).then_some([u, v])
    }
}

/// Geometric calibration of one sensor
#[derive(Debug, Clone, PartialEq)]
pub struct SensorCalibration {
    pub width: u32,
    pub height: u32,
    /// Unit-plane x for every pixel; NaN where the pixel has no ray
    pub uv2x: Vec<f32>,
    /// Unit-plane y for every pixel; NaN where the pixel has no ray
    pub uv2y: Vec<f32>,
    /// Sensor pose relative to the device rig
    pub extrinsics: PoseMatrix,
    /// Undistortion remap, source x for every rectified pixel
    pub mapx: Vec<f32>,
    /// Undistortion remap, source y for every rectified pixel
    pub mapy: Vec<f32>,
    /// `[fx, fy, cx, cy]` of the rectified pinhole camera
    pub intrinsics: [f32; 4],
}

impl SensorCalibration {
    #[instrument(skip(model, extrinsics))]
    pub fn compute(
        model: &dyn CameraModel,
        width: u32,
        height: u32,
        extrinsics: PoseMatrix,
    ) -> Result<Self, String> {
        let intrinsics = fit_intrinsics(model)?;
        let [fx, fy, cx, cy] = intrinsics;
        let pixels = width as usize * height as usize;

        let mut uv2x = Vec::with_capacity(pixels);
        let mut uv2y = Vec::with_capacity(pixels);
        let mut mapx = Vec::with_capacity(pixels);
        let mut mapy = Vec::with_capacity(pixels);

        for v in 0..height {
            for u in 0..width {
                let (u, v) = (u as f32, v as f32);

                let [x, y] = model.unproject([u, v]).unwrap_or([f32::NAN, f32::NAN]);
                uv2x.push(x);
                uv2y.push(y);

                let ray = [(u - cx) / fx, (v - cy) / fy];
                let [sx, sy] = model.project(ray).unwrap_or([UNMAPPED, UNMAPPED]);
                mapx.push(sx);
                mapy.push(sy);
            }
        }

        info!("Calibration computed for {} pixels", pixels);
        Ok(Self {
            width,
            height,
            uv2x,
            uv2y,
            extrinsics,
            mapx,
            mapy,
            intrinsics,
        })
    }

    pub fn pixel_count(&self) -> usize {
        self.width as usize * self.height as usize
    }

    /// Bytes produced by [`SensorCalibration::write_to`] for `pixels` pixels.
    pub fn wire_len(pixels: usize) -> usize {
        4 * (4 * pixels + 16 + 4)
    }

    /// Send all six tables in one vectored write.
    pub fn write_to<W: Write + ?Sized>(&self, writer: &mut W) -> Result<(), TransportError> {
        let uv2x = le_bytes(&self.uv2x);
        let uv2y = le_bytes(&self.uv2y);
        let extrinsics = self.extrinsics.to_le_bytes();
        let mapx = le_bytes(&self.mapx);
        let mapy = le_bytes(&self.mapy);
        let intrinsics = le_bytes(&self.intrinsics);

        write_vectored_all(
            writer,
            &mut [
                IoSlice::new(&uv2x),
                IoSlice::new(&uv2y),
                IoSlice::new(&extrinsics),
                IoSlice::new(&mapx),
                IoSlice::new(&mapy),
                IoSlice::new(&intrinsics),
            ],
        )?;
        writer.flush()?;
        Ok(())
    }
}

/// Measure the pinhole parameters the model behaves like near the optical axis.
fn fit_intrinsics(model: &dyn CameraModel) -> Result<[f32; 4], String> {
    let [cx, cy] = model
        .project([0.0, 0.0])
        .ok_or("optical axis does not project")?;
    let [ux, _] = model
        .project([FOCAL_STEP, 0.0])
        .ok_or("focal step does not project")?;
    let [_, vy] = model
        .project([0.0, FOCAL_STEP])
        .ok_or("focal step does not project")?;

    let fx = (ux - cx) / FOCAL_STEP;
    let fy = (vy - cy) / FOCAL_STEP;
    if !(fx.is_finite() && fy.is_finite()) || fx.abs() < f32::EPSILON || fy.abs() < f32::EPSILON {
        return Err(format!("degenerate focal length ({fx}, {fy})"));
    }
    Ok([fx, fy, cx, cy])
}

fn le_bytes(values: &[f32]) -> Vec<u8> {
    values.iter().flat_map(|v| v.to_le_bytes()).collect()
}
