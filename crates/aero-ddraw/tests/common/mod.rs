#![allow(dead_code)]

use std::sync::{Arc, Once};

use aero_ddraw::device::memory::{MemoryDevice, MemoryDeviceConfig, MemoryDeviceCounters};
use aero_ddraw::format::FOURCC_DXT1;
use aero_ddraw::{
    CompatOptions, DdrawRuntime, LegacyDeviceType, PixelFormat, SurfaceCaps, SurfaceDesc,
};

pub fn init_tracing() {
    static INIT: Once = Once::new();
    INIT.call_once(|| {
        let _ = tracing_subscriber::fmt()
            .with_test_writer()
            .with_max_level(tracing::Level::DEBUG)
            .try_init();
    });
}

pub fn require_webgpu() -> bool {
    std::env::var("AERO_REQUIRE_WEBGPU")
        .ok()
        .map(|raw| {
            let v = raw.trim();
            v == "1"
                || v.eq_ignore_ascii_case("true")
                || v.eq_ignore_ascii_case("yes")
                || v.eq_ignore_ascii_case("on")
        })
        .unwrap_or(false)
}

pub fn skip_or_panic(test_name: &str, reason: &str) {
    if require_webgpu() {
        panic!("AERO_REQUIRE_WEBGPU is enabled but {test_name} cannot run: {reason}");
    }
    eprintln!("skipping {test_name}: {reason}");
}

pub fn argb8888() -> PixelFormat {
    PixelFormat::rgb(32, 0x00FF_0000, 0x0000_FF00, 0x0000_00FF, 0xFF00_0000)
}

pub fn dxt1() -> PixelFormat {
    PixelFormat::fourcc(FOURCC_DXT1)
}

pub fn depth16() -> PixelFormat {
    PixelFormat::depth(16, 0xFFFF, 0)
}

pub fn texture(width: u32, height: u32) -> SurfaceDesc {
    SurfaceDesc::new(SurfaceCaps::TEXTURE)
        .with_size(width, height)
        .with_pixel_format(argb8888())
}

pub fn mip_texture(width: u32, height: u32, pixel_format: PixelFormat) -> SurfaceDesc {
    SurfaceDesc::new(SurfaceCaps::TEXTURE | SurfaceCaps::MIPMAP | SurfaceCaps::COMPLEX)
        .with_size(width, height)
        .with_pixel_format(pixel_format)
}

pub fn render_target(width: u32, height: u32) -> SurfaceDesc {
    SurfaceDesc::new(SurfaceCaps::THREE_D_DEVICE | SurfaceCaps::OFFSCREENPLAIN)
        .with_size(width, height)
        .with_pixel_format(argb8888())
}

pub fn depth_buffer(width: u32, height: u32) -> SurfaceDesc {
    SurfaceDesc::new(SurfaceCaps::ZBUFFER)
        .with_size(width, height)
        .with_pixel_format(depth16())
}

pub fn primary_flip_chain(back_buffers: u32) -> SurfaceDesc {
    SurfaceDesc::new(
        SurfaceCaps::PRIMARYSURFACE
            | SurfaceCaps::FLIP
            | SurfaceCaps::COMPLEX
            | SurfaceCaps::THREE_D_DEVICE,
    )
    .with_back_buffers(back_buffers)
}

/// Byte pattern that differs between rows and columns.
pub fn pattern(len: usize) -> Vec<u8> {
    (0..len).map(|i| (i * 7 + i / 251) as u8).collect()
}

/// Runtime with a [`MemoryDevice`] already attached.
pub fn runtime_with_device(
    options: CompatOptions,
    config: MemoryDeviceConfig,
) -> (DdrawRuntime<MemoryDevice>, Arc<MemoryDeviceCounters>) {
    init_tracing();
    let rt = DdrawRuntime::new(options);
    let device = MemoryDevice::new(config);
    let counters = device.counters();
    rt.create_device(device, LegacyDeviceType::Hal);
    (rt, counters)
}

pub fn default_runtime() -> (DdrawRuntime<MemoryDevice>, Arc<MemoryDeviceCounters>) {
    runtime_with_device(CompatOptions::default(), MemoryDeviceConfig::default())
}
