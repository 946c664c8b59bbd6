//! Frame sources
//!
//! A [`FrameSource`] hands out one RGB frame per call. The webcam source
//! needs the `camera` feature (OpenCV videoio); [`StillFrame`] replays a
//! fixed image and works everywhere.

use image::RgbImage;
use std::path::Path;
use thiserror::Error;

/// One captured frame, 8-bit RGB at the device's native resolution
pub type Frame = RgbImage;

#[derive(Debug, Error)]
pub enum CaptureError {
    #[error("failed to open capture device {device}: {reason}")]
    Open { device: String, reason: String },

    #[error("capture device disconnected or returned no frame")]
    Disconnected,

    #[error("frame conversion failed: {0}")]
    Conversion(String),

    #[error("failed to load frame image: {0}")]
    Image(#[from] image::ImageError),
}

/// Something that produces frames on demand.
pub trait FrameSource {
    /// Block until the next frame is available.
    fn capture(&mut self) -> Result<Frame, CaptureError>;
}

/// Returns the same frame on every call.
#[derive(Debug, Clone)]
pub struct StillFrame {
    frame: Frame,
}

impl StillFrame {
    pub fn new(frame: Frame) -> Self {
        Self { frame }
    }

    /// Load any image format the `image` crate was built with.
    pub fn open(path: impl AsRef<Path>) -> Result<Self, CaptureError> {
        let frame = image::open(path)?.to_rgb8();
        Ok(Self::new(frame))
    }
}

impl<T: FrameSource + ?Sized> FrameSource for Box<T> {
    fn capture(&mut self) -> Result<Frame, CaptureError> {
        (**self).capture()
    }
}

impl FrameSource for StillFrame {
    fn capture(&mut self) -> Result<Frame, CaptureError> {
        Ok(self.frame.clone())
    }
}

#[cfg(feature = "camera")]
pub use webcam::Webcam;

#[cfg(feature = "camera")]
mod webcam {
    use super::{CaptureError, Frame, FrameSource};
    use opencv::{core::Mat, imgproc, prelude::*, videoio};
    use tracing::info;

    /// Webcam opened through OpenCV's videoio backend.
    pub struct Webcam {
        capture: videoio::VideoCapture,
    }

    impl Webcam {
        /// Open capture device `index` (0 is the first webcam).
        pub fn open(index: i32) -> Result<Self, CaptureError> {
            let open_error = |reason: String| CaptureError::Open {
                device: index.to_string(),
                reason,
            };

            let capture = videoio::VideoCapture::new(index, videoio::CAP_ANY)
                .map_err(|e| open_error(e.to_string()))?;
            if !capture.is_opened().map_err(|e| open_error(e.to_string()))? {
                return Err(open_error("device could not be opened".to_string()));
            }

            info!(device = index, "Webcam opened");
            Ok(Self { capture })
        }
    }

    impl FrameSource for Webcam {
        fn capture(&mut self) -> Result<Frame, CaptureError> {
            let mut bgr = Mat::default();
            let grabbed = self
                .capture
                .read(&mut bgr)
                .map_err(|_| CaptureError::Disconnected)?;
            if !grabbed || bgr.empty() {
                return Err(CaptureError::Disconnected);
            }

            // OpenCV hands out BGR
            let mut rgb = Mat::default();
            imgproc::cvt_color(&bgr, &mut rgb, imgproc::COLOR_BGR2RGB, 0)
                .map_err(|e| CaptureError::Conversion(e.to_string()))?;

            let width = u32::try_from(rgb.cols())
                .map_err(|_| CaptureError::Conversion("negative frame width".to_string()))?;
            let height = u32::try_from(rgb.rows())
                .map_err(|_| CaptureError::Conversion("negative frame height".to_string()))?;
            let bytes = rgb
                .data_bytes()
                .map_err(|e| CaptureError::Conversion(e.to_string()))?
                .to_vec();

            Frame::from_raw(width, height, bytes).ok_or_else(|| {
                CaptureError::Conversion(format!("buffer does not fit {}x{} RGB", width, height))
            })
        }
    }
}
