//! Host capability probing.
//!
//! A read-only snapshot of what this machine can do: GPU adapter presence,
//! hardware H.264 encoder availability, and core count, plus the strategy
//! the selector would recommend for a nominal 1080p/60s export. Consumed by
//! the editor UI for diagnostics only.

use serde::Serialize;

use crate::strategy::{select_strategy, HostProfile, StrategyPlan};

/// Hardware encoder names probed in preference order.
const HARDWARE_ENCODERS: [&str; 3] = ["h264_nvenc", "h264_videotoolbox", "h264_qsv"];

/// Snapshot of host capabilities.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct HostCapabilities {
    /// A usable GPU adapter was found.
    pub gpu_available: bool,
    /// Adapter name, when one was found.
    pub gpu_name: Option<String>,
    /// A hardware H.264 encoder opened successfully.
    pub hardware_encode: bool,
    /// Name of the usable hardware encoder.
    pub hardware_encoder: Option<String>,
    /// Host hardware concurrency.
    pub cores: usize,
    /// Strategy the selector recommends for a nominal 1080p/60s export.
    pub recommended: StrategyPlan,
}

impl HostCapabilities {
    pub fn profile(&self) -> HostProfile {
        HostProfile {
            gpu_available: self.gpu_available,
            hardware_encode: self.hardware_encode,
            cores: self.cores,
        }
    }
}

/// Probe the host once and build a capability snapshot.
pub fn get_capabilities() -> HostCapabilities {
    let gpu_name = probe_gpu();
    let hardware_encoder = probe_hardware_encoder();
    let cores = std::thread::available_parallelism()
        .map(|n| n.get())
        .unwrap_or(1);

    let profile = HostProfile {
        gpu_available: gpu_name.is_some(),
        hardware_encode: hardware_encoder.is_some(),
        cores,
    };
    let recommended = select_strategy(60.0, 1920, 1080, &profile);

    log::info!(
        "[CAPS] gpu={:?} hw_encode={:?} cores={} -> {:?}",
        gpu_name,
        hardware_encoder,
        cores,
        recommended.strategy
    );

    HostCapabilities {
        gpu_available: gpu_name.is_some(),
        gpu_name,
        hardware_encode: hardware_encoder.is_some(),
        hardware_encoder,
        cores,
        recommended,
    }
}

/// Request a high-performance adapter; returns its name when one exists.
fn probe_gpu() -> Option<String> {
    let instance = wgpu::Instance::new(&wgpu::InstanceDescriptor::default());
    let adapter = pollster::block_on(instance.request_adapter(&wgpu::RequestAdapterOptions {
        power_preference: wgpu::PowerPreference::HighPerformance,
        compatible_surface: None,
        force_fallback_adapter: false,
    }))
    .ok()?;
    let info = adapter.get_info();
    log::debug!("[CAPS] GPU adapter: {} ({:?})", info.name, info.backend);
    Some(info.name)
}

/// Try each known hardware encoder until one opens.
///
/// Finding the codec is not enough (the library may be built with NVENC
/// support on a machine without the driver), so a tiny encoder context is
/// actually opened, mirroring the teacher's probe-by-test-encode.
fn probe_hardware_encoder() -> Option<String> {
    if ffmpeg_next::init().is_err() {
        return None;
    }
    for name in HARDWARE_ENCODERS {
        if try_open_encoder(name) {
            log::info!("[CAPS] hardware encoder available: {}", name);
            return Some(name.to_string());
        }
        log::debug!("[CAPS] hardware encoder unavailable: {}", name);
    }
    None
}

/// Open a minimal 256x256 encoder context to verify the codec actually works.
fn try_open_encoder(name: &str) -> bool {
    use ffmpeg_next as ffmpeg;
    use ffmpeg::format::Pixel;
    use ffmpeg::Rational;

    let Some(codec) = ffmpeg::encoder::find_by_name(name) else {
        return false;
    };
    let ctx = ffmpeg::codec::context::Context::new_with_codec(codec);
    let Ok(mut video) = ctx.encoder().video() else {
        return false;
    };
    // NVENC rejects tiny frames; 256x256 clears its minimum size.
    video.set_width(256);
    video.set_height(256);
    video.set_format(Pixel::YUV420P);
    video.set_time_base(Rational::new(1, 30));
    video.set_frame_rate(Some(Rational::new(30, 1)));
    video.open_as(codec).is_ok()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn init_logs() {
        let _ = env_logger::builder().is_test(true).try_init();
    }

    #[test]
    fn test_capabilities_snapshot_is_consistent() {
        init_logs();
        let caps = get_capabilities();
        assert_eq!(caps.gpu_available, caps.gpu_name.is_some());
        assert_eq!(caps.hardware_encode, caps.hardware_encoder.is_some());
        assert!(caps.cores >= 1);
        assert!(!caps.recommended.reason.is_empty());
    }

    #[test]
    fn test_capabilities_serialize_for_diagnostics() {
        let caps = get_capabilities();
        let json = serde_json::to_string(&caps).unwrap();
        assert!(json.contains("gpuAvailable"));
        assert!(json.contains("recommended"));
    }
}
