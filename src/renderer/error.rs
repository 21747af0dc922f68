// renderer/error.rs
use std::sync::{Arc, Mutex};

use crate::renderer::frame::FramePhase;

#[derive(Debug)]
pub enum RenderError {
    Io(std::io::Error),
    Image(String),
    Obj(String),
    Shader { label: String, message: String },
    CubeMap(String),
    Surface(wgpu::SurfaceError),
    Adapter(String),
    Device(String),
    CapacityExceeded { what: &'static str, limit: usize },
    AttachmentLimit { limit: usize },
    MapLimit { limit: usize },
    InvalidInstance { index: usize, len: usize },
    StaleHandle(&'static str),
    FrameOrder { from: FramePhase, to: FramePhase },
    NoFrame,
    GBufferMismatch { required: usize, found: usize },
    MissingDepth(String),
    StaticBuffersStale,
}

impl From<std::io::Error> for RenderError {
    fn from(e: std::io::Error) -> Self {
        RenderError::Io(e)
    }
}

impl From<wgpu::SurfaceError> for RenderError {
    fn from(e: wgpu::SurfaceError) -> Self {
        RenderError::Surface(e)
    }
}

impl std::fmt::Display for RenderError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            RenderError::Io(e) => write!(f, "IO error: {}", e),
            RenderError::Image(e) => write!(f, "Image error: {}", e),
            RenderError::Obj(e) => write!(f, "OBJ error: {}", e),
            RenderError::Shader { label, message } => {
                write!(f, "Shader program '{}' failed: {}", label, message)
            }
            RenderError::CubeMap(e) => write!(f, "Cube map error: {}", e),
            RenderError::Surface(e) => write!(f, "Surface error: {}", e),
            RenderError::Adapter(e) => write!(f, "Adapter error: {}", e),
            RenderError::Device(e) => write!(f, "Device error: {}", e),
            RenderError::CapacityExceeded { what, limit } => {
                write!(f, "{} capacity of {} exceeded", what, limit)
            }
            RenderError::AttachmentLimit { limit } => {
                write!(f, "Render target already has {} color attachments", limit)
            }
            RenderError::MapLimit { limit } => {
                write!(f, "Material already has {} texture maps", limit)
            }
            RenderError::InvalidInstance { index, len } => {
                write!(f, "Instance index {} out of range (count {})", index, len)
            }
            RenderError::StaleHandle(what) => write!(f, "Stale {} handle", what),
            RenderError::FrameOrder { from, to } => {
                write!(f, "Frame pass {:?} cannot follow {:?}", to, from)
            }
            RenderError::NoFrame => write!(f, "No frame in progress"),
            RenderError::GBufferMismatch { required, found } => write!(
                f,
                "G-buffer needs {} color attachments, found {}",
                required, found
            ),
            RenderError::MissingDepth(target) => {
                write!(f, "Render target '{}' has no depth attachment", target)
            }
            RenderError::StaticBuffersStale => {
                write!(f, "Static mesh buffers changed since the last finalize")
            }
        }
    }
}

impl std::error::Error for RenderError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            RenderError::Io(e) => Some(e),
            RenderError::Surface(e) => Some(e),
            _ => None,
        }
    }
}

/// Every error class wgpu reports. Shader translation failures arrive as
/// `Internal`, not `Validation`.
const CAPTURED_FILTERS: [wgpu::ErrorFilter; 3] = [
    wgpu::ErrorFilter::Validation,
    wgpu::ErrorFilter::OutOfMemory,
    wgpu::ErrorFilter::Internal,
];

/// Opens one error scope per filter. Pair with [`pop_error_scopes`].
pub(crate) fn push_error_scopes(device: &wgpu::Device) {
    for filter in CAPTURED_FILTERS {
        device.push_error_scope(filter);
    }
}

/// Closes the scopes opened by [`push_error_scopes`] and returns what they
/// caught, at most one error per scope.
pub(crate) fn pop_error_scopes(device: &wgpu::Device) -> Vec<wgpu::Error> {
    CAPTURED_FILTERS
        .iter()
        .filter_map(|_| pollster::block_on(device.pop_error_scope()))
        .collect()
}

/// Device errors raised outside any error scope.
///
/// Installing the sink replaces wgpu's default handler, which panics. A
/// device has one handler, so the most recently installed sink receives
/// every later error.
#[derive(Debug, Clone, Default)]
pub struct GpuErrorSink {
    errors: Arc<Mutex<Vec<String>>>,
}

impl GpuErrorSink {
    pub fn install(device: &wgpu::Device) -> Self {
        let sink = Self::default();
        let errors = Arc::clone(&sink.errors);
        device.on_uncaptured_error(Arc::new(move |error: wgpu::Error| {
            let message = error.to_string();
            log::debug!("GPU error recorded: {}", message);
            if let Ok(mut errors) = errors.lock() {
                errors.push(message);
            }
        }));
        sink
    }

    pub fn record(&self, message: impl Into<String>) {
        if let Ok(mut errors) = self.errors.lock() {
            errors.push(message.into());
        }
    }

    /// Takes every recorded error, oldest first.
    pub fn drain(&self) -> Vec<String> {
        match self.errors.lock() {
            Ok(mut errors) => std::mem::take(&mut *errors),
            Err(_) => Vec::new(),
        }
    }

    pub fn pending(&self) -> usize {
        self.errors.lock().map_or(0, |errors| errors.len())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sink_drains_every_error_in_order() {
        let sink = GpuErrorSink::default();
        let clone = sink.clone();
        sink.record("first");
        clone.record("second");
        sink.record("third");

        assert_eq!(sink.pending(), 3);
        assert_eq!(sink.drain(), ["first", "second", "third"]);
        assert_eq!(clone.pending(), 0);
        assert!(sink.drain().is_empty());
    }
}
