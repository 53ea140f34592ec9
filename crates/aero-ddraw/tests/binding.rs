mod common;

use aero_ddraw::device::memory::{MemoryDevice, MemoryDeviceConfig};
use aero_ddraw::device::{Placement, ResourceId, ResourceType, Subresource};
use aero_ddraw::format::translate;
use aero_ddraw::{
    BackingResource, BindError, BindOutcome, CompatOptions, D3DFormat, DdrawRuntime,
    DeviceError, GpuDevice, LegacyDeviceType, PixelFormat, SurfaceCaps, SurfaceCaps2,
    SurfaceDesc, SurfaceError, SurfaceKind, UploadOutcome,
};
use pretty_assertions::assert_eq;

use common::*;

#[test]
fn second_bind_reuses_the_resource() {
    let (rt, counters) = default_runtime();
    let id = rt.create_surface(texture(64, 32)).unwrap();

    assert_eq!(
        rt.ensure_bound(id).unwrap(),
        BindOutcome::Bound {
            allocated: true,
            upload: UploadOutcome::Uploaded { levels: 1 },
        }
    );
    let resource = rt.texture_resource(id).unwrap().unwrap();

    assert_eq!(
        rt.ensure_bound(id).unwrap(),
        BindOutcome::Bound {
            allocated: false,
            upload: UploadOutcome::Clean,
        }
    );
    assert_eq!(rt.texture_resource(id).unwrap(), Some(resource));
    assert_eq!(counters.allocations(), 1);
    assert_eq!(rt.stats().snapshot().allocations, 1);

    let desc = rt.with_device(|d| d.resource_desc(resource)).flatten().unwrap();
    assert_eq!(desc.ty, ResourceType::Texture);
    assert_eq!((desc.width, desc.height, desc.levels), (64, 32, 1));
    assert_eq!(desc.format, D3DFormat::A8R8G8B8);
}

#[test]
fn bind_without_device_is_deferred() {
    init_tracing();
    let rt = DdrawRuntime::<MemoryDevice>::default();
    let id = rt.create_surface(texture(8, 8)).unwrap();

    assert_eq!(rt.ensure_bound(id).unwrap(), BindOutcome::Deferred);
    assert_eq!(rt.backing(id).unwrap(), BackingResource::None);
    assert_eq!(rt.texture_resource(id).unwrap(), None);

    rt.create_device(
        MemoryDevice::new(MemoryDeviceConfig::default()),
        LegacyDeviceType::Hal,
    );
    assert!(matches!(
        rt.ensure_bound(id).unwrap(),
        BindOutcome::Bound {
            allocated: true,
            ..
        }
    ));
}

#[test]
fn zero_sized_surface_binds_to_nothing() {
    let (rt, counters) = default_runtime();
    let id = rt.create_surface(texture(8, 8)).unwrap();
    let desc = rt.surface_desc(id).unwrap().with_size(0, 0);
    rt.set_surface_desc(id, desc).unwrap();

    assert_eq!(rt.ensure_bound(id).unwrap(), BindOutcome::ZeroExtent);
    assert_eq!(rt.backing(id).unwrap(), BackingResource::None);
    assert_eq!(counters.allocations(), 0);
}

#[test]
fn allocation_failure_leaves_surface_unbound() {
    let (rt, counters) = default_runtime();
    let id = rt.create_surface(texture(16, 16)).unwrap();
    rt.with_device(|d| d.fail_next_allocations(1));

    let err = rt.ensure_bound(id).unwrap_err();
    assert_eq!(
        err,
        BindError::AllocationFailed {
            kind: SurfaceKind::Texture,
            source: DeviceError::OutOfVideoMemory,
        }
    );
    assert_eq!(rt.backing(id).unwrap(), BackingResource::None);
    assert_eq!(counters.allocations(), 0);

    assert!(matches!(
        rt.ensure_bound(id).unwrap(),
        BindOutcome::Bound {
            allocated: true,
            ..
        }
    ));
    assert_eq!(counters.allocations(), 1);
}

#[test]
fn released_surface_handle_is_rejected() {
    let (rt, _) = default_runtime();
    let id = rt.create_surface(texture(8, 8)).unwrap();
    rt.release_surface(id).unwrap();

    assert_eq!(rt.ensure_bound(id), Err(BindError::UnknownSurface(id)));
    assert!(rt.surface_desc(id).is_err());

    // The slot is reused under a new generation; the old handle still does not resolve.
    let replacement = rt.create_surface(texture(8, 8)).unwrap();
    assert_eq!(replacement.index, id.index);
    assert_ne!(replacement, id);
    assert_eq!(rt.backing(id), Err(BindError::UnknownSurface(id)));
}

#[test]
fn indeterminate_format_follows_the_back_buffer() {
    let (rt, _) = runtime_with_device(
        CompatOptions::default(),
        MemoryDeviceConfig {
            back_buffer_format: D3DFormat::A8R8G8B8,
            ..MemoryDeviceConfig::default()
        },
    );
    let id = rt
        .create_surface(SurfaceDesc::new(SurfaceCaps::OFFSCREENPLAIN).with_size(4, 4))
        .unwrap();
    assert!(rt.surface_desc(id).unwrap().pixel_format.is_none());

    let resource = rt.surface_resource(id).unwrap().unwrap();
    let desc = rt.with_device(|d| d.resource_desc(resource)).flatten().unwrap();
    assert_eq!(desc.format, D3DFormat::A8R8G8B8);
    assert_eq!(rt.stats().snapshot().format_fallbacks, 1);
    assert!(rt.surface_desc(id).unwrap().pixel_format.is_some());
}

#[test]
fn display_mode_supplies_the_format() {
    let (rt, _) = default_runtime();
    rt.set_display_mode(800, 600, D3DFormat::R5G6B5);
    let id = rt
        .create_surface(SurfaceDesc::new(SurfaceCaps::OFFSCREENPLAIN).with_size(4, 4))
        .unwrap();
    assert_eq!(rt.surface_desc(id).unwrap().pitch, 8);

    let resource = rt.surface_resource(id).unwrap().unwrap();
    let desc = rt.with_device(|d| d.resource_desc(resource)).flatten().unwrap();
    assert_eq!(desc.format, D3DFormat::R5G6B5);
    assert_eq!(rt.stats().snapshot().format_fallbacks, 0);
}

#[test]
fn placement_follows_caps() {
    let options = CompatOptions {
        managed_textures_local_on_tnl: true,
        ..CompatOptions::default()
    };
    let (rt, _) = runtime_with_device(options, MemoryDeviceConfig::default());

    let system = rt
        .create_surface(
            SurfaceDesc::new(SurfaceCaps::TEXTURE | SurfaceCaps::SYSTEMMEMORY)
                .with_size(8, 8)
                .with_pixel_format(argb8888()),
        )
        .unwrap();
    let managed = rt
        .create_surface(texture(8, 8).with_caps2(SurfaceCaps2::TEXTUREMANAGE))
        .unwrap();

    let placement_of = |id| {
        let resource = rt.texture_resource(id).unwrap().unwrap();
        rt.with_device(|d| d.resource_desc(resource))
            .flatten()
            .unwrap()
            .placement
    };
    assert_eq!(placement_of(system), Placement::System);
    // Plain HAL keeps managed textures managed even with the option set.
    assert_eq!(placement_of(managed), Placement::Managed);

    let tnl = DdrawRuntime::new(options);
    tnl.create_device(
        MemoryDevice::new(MemoryDeviceConfig::default()),
        LegacyDeviceType::TnlHal,
    );
    let managed = tnl
        .create_surface(texture(8, 8).with_caps2(SurfaceCaps2::TEXTUREMANAGE))
        .unwrap();
    let resource = tnl.texture_resource(managed).unwrap().unwrap();
    let placement = tnl
        .with_device(|d| d.resource_desc(resource))
        .flatten()
        .unwrap()
        .placement;
    assert_eq!(placement, Placement::Local);
}

#[test]
fn typed_accessors_only_answer_for_their_kind() {
    let (rt, _) = default_runtime();
    let tex = rt.create_surface(texture(8, 8)).unwrap();
    let rt_surface = rt.create_surface(render_target(8, 8)).unwrap();
    let depth = rt.create_surface(depth_buffer(8, 8)).unwrap();

    assert!(rt.texture_resource(tex).unwrap().is_some());
    assert_eq!(rt.render_target_resource(tex).unwrap(), None);

    assert!(rt.render_target_resource(rt_surface).unwrap().is_some());
    assert_eq!(rt.texture_resource(rt_surface).unwrap(), None);

    let ds = rt.depth_stencil_resource(depth).unwrap().unwrap();
    let desc = rt.with_device(|d| d.resource_desc(ds)).flatten().unwrap();
    assert_eq!(desc.ty, ResourceType::DepthStencil);
    assert_eq!(desc.format, D3DFormat::D16);
}

fn rejecting(formats: &'static [D3DFormat]) -> MemoryDeviceConfig {
    MemoryDeviceConfig {
        unsupported_formats: formats,
        ..MemoryDeviceConfig::default()
    }
}

fn device_bytes(rt: &DdrawRuntime<MemoryDevice>, resource: ResourceId) -> Vec<u8> {
    rt.with_device(|d| {
        d.subresource_bytes(resource, Subresource::BASE)
            .map(|(_, bytes)| bytes.to_vec())
    })
    .flatten()
    .unwrap()
}

#[test]
fn rejected_format_binds_a_wider_resource() {
    let (rt, counters) =
        runtime_with_device(CompatOptions::default(), rejecting(&[D3DFormat::R5G6B5]));
    let id = rt
        .create_surface(
            SurfaceDesc::new(SurfaceCaps::TEXTURE)
                .with_size(2, 1)
                .with_pixel_format(PixelFormat::rgb(16, 0xF800, 0x07E0, 0x001F, 0)),
        )
        .unwrap();
    // Red, then blue.
    rt.write_surface(id, &[0x00, 0xF8, 0x1F, 0x00]).unwrap();

    let resource = rt.texture_resource(id).unwrap().unwrap();
    let desc = rt.with_device(|d| d.resource_desc(resource)).flatten().unwrap();
    assert_eq!(desc.format, D3DFormat::X8R8G8B8);
    assert_eq!(counters.allocations(), 1);
    assert_eq!(rt.surface_desc(id).unwrap().pitch, 4);

    let stats = rt.stats().snapshot();
    assert_eq!(stats.format_fallbacks, 1);
    assert_eq!(stats.converted_copies, 1);
    assert_eq!(
        &device_bytes(&rt, resource)[..8],
        &[0x00, 0x00, 0xFF, 0x00, 0xFF, 0x00, 0x00, 0x00]
    );

    assert_eq!(
        rt.download(id).unwrap(),
        UploadOutcome::Uploaded { levels: 1 }
    );
    assert_eq!(rt.read_surface(id).unwrap(), vec![0x00, 0xF8, 0x1F, 0x00]);
}

#[test]
fn rejected_block_compression_is_decoded_on_upload() {
    let (rt, _) = runtime_with_device(CompatOptions::default(), rejecting(&[D3DFormat::Dxt1]));
    let id = rt
        .create_surface(texture(4, 4).with_pixel_format(dxt1()))
        .unwrap();
    // One solid red block.
    let block = [0x00, 0xF8, 0x00, 0xF8, 0, 0, 0, 0];
    rt.write_surface(id, &block).unwrap();

    let resource = rt.texture_resource(id).unwrap().unwrap();
    let desc = rt.with_device(|d| d.resource_desc(resource)).flatten().unwrap();
    assert_eq!(desc.format, D3DFormat::A8R8G8B8);
    let bytes = device_bytes(&rt, resource);
    assert_eq!(bytes.len(), 4 * 16);
    assert!(bytes.chunks_exact(4).all(|px| px == [0x00, 0x00, 0xFF, 0xFF]));

    // Decoded pixels cannot be re-encoded; the CPU copy stays as written.
    assert_eq!(rt.download(id).unwrap(), UploadOutcome::Skipped);
    assert_eq!(rt.read_surface(id).unwrap(), block.to_vec());
}

#[test]
fn rejected_format_without_a_fallback_fails_the_bind() {
    let (rt, counters) = runtime_with_device(
        CompatOptions::default(),
        rejecting(&[D3DFormat::A8R8G8B8]),
    );
    let id = rt.create_surface(texture(4, 4)).unwrap();
    assert_eq!(
        rt.ensure_bound(id).unwrap_err(),
        BindError::AllocationFailed {
            kind: SurfaceKind::Texture,
            source: DeviceError::UnsupportedFormat(D3DFormat::A8R8G8B8),
        }
    );
    assert_eq!(rt.backing(id).unwrap(), BackingResource::None);
    assert_eq!(counters.allocations(), 0);
    assert_eq!(rt.stats().snapshot().format_fallbacks, 0);
}

#[test]
fn indeterminate_surface_keeps_content_written_before_binding() {
    init_tracing();
    let rt = DdrawRuntime::<MemoryDevice>::default();
    let id = rt
        .create_surface(SurfaceDesc::new(SurfaceCaps::OFFSCREENPLAIN).with_size(2, 1))
        .unwrap();
    // Blue, then red, laid out as the X8R8G8B8 placeholder.
    let content = [0xFF, 0x00, 0x00, 0x00, 0x00, 0x00, 0xFF, 0x00];
    rt.write_surface(id, &content).unwrap();

    rt.create_device(
        MemoryDevice::new(MemoryDeviceConfig {
            back_buffer_format: D3DFormat::R5G6B5,
            ..MemoryDeviceConfig::default()
        }),
        LegacyDeviceType::Hal,
    );
    let resource = rt.surface_resource(id).unwrap().unwrap();
    let desc = rt.with_device(|d| d.resource_desc(resource)).flatten().unwrap();
    assert_eq!(desc.format, D3DFormat::R5G6B5);

    // The CPU layout is kept and described truthfully.
    let surface = rt.surface_desc(id).unwrap();
    assert_eq!(surface.pitch, 8);
    assert_eq!(
        surface.pixel_format.and_then(|pf| translate(&pf)),
        Some(D3DFormat::X8R8G8B8)
    );
    assert_eq!(rt.read_surface(id).unwrap(), content.to_vec());
    assert_eq!(&device_bytes(&rt, resource)[..4], &[0x1F, 0x00, 0x00, 0xF8]);
    assert_eq!(rt.stats().snapshot().format_fallbacks, 1);
}

#[test]
fn failed_allocation_leaves_the_format_unresolved() {
    let (rt, _) = runtime_with_device(
        CompatOptions::default(),
        MemoryDeviceConfig {
            back_buffer_format: D3DFormat::A8R8G8B8,
            ..MemoryDeviceConfig::default()
        },
    );
    let id = rt
        .create_surface(SurfaceDesc::new(SurfaceCaps::OFFSCREENPLAIN).with_size(4, 4))
        .unwrap();
    let content = pattern(4 * 4 * 4);
    rt.write_surface(id, &content).unwrap();

    rt.with_device(|d| d.fail_next_allocations(1));
    assert!(rt.ensure_bound(id).is_err());
    assert!(rt.surface_desc(id).unwrap().pixel_format.is_none());
    assert_eq!(rt.stats().snapshot().format_fallbacks, 0);
    assert_eq!(rt.read_surface(id).unwrap(), content);

    rt.ensure_bound(id).unwrap();
    assert!(rt.surface_desc(id).unwrap().pixel_format.is_some());
    assert_eq!(rt.stats().snapshot().format_fallbacks, 1);
    let resource = rt.surface_resource(id).unwrap().unwrap();
    assert_eq!(device_bytes(&rt, resource), content);
}

#[test]
fn unknown_kind_render_target_aliases_the_back_buffer() {
    let (rt, counters) = default_runtime();
    let desc = SurfaceDesc::new(SurfaceCaps::empty())
        .with_size(8, 8)
        .with_pixel_format(argb8888());
    let id = rt.create_surface(desc).unwrap();
    assert_eq!(rt.surface_kind(id).unwrap(), SurfaceKind::Unknown);

    assert_eq!(
        rt.set_render_target(id).unwrap(),
        BindOutcome::Bound {
            allocated: true,
            upload: UploadOutcome::Clean,
        }
    );
    let back_buffer = rt.with_device(|d| d.back_buffer(0)).unwrap().unwrap();
    assert_eq!(rt.backing(id).unwrap(), BackingResource::RenderTarget(back_buffer));
    assert_eq!(counters.allocations(), 0);
    assert_eq!(rt.stats().snapshot().allocations, 0);

    // Outside the render-target selection the same kind gets a plain surface of its own.
    let other = rt.create_surface(desc).unwrap();
    let resource = rt.surface_resource(other).unwrap().unwrap();
    assert_ne!(resource, back_buffer);
    assert_eq!(counters.allocations(), 1);
}

#[test]
fn overlays_are_placed_in_local_video_memory() {
    let (rt, _) = default_runtime();
    let placement_of = |caps| {
        let id = rt
            .create_surface(
                SurfaceDesc::new(caps)
                    .with_size(8, 8)
                    .with_pixel_format(argb8888()),
            )
            .unwrap();
        let resource = rt.surface_resource(id).unwrap().unwrap();
        let desc = rt.with_device(|d| d.resource_desc(resource)).flatten().unwrap();
        (rt.surface_kind(id).unwrap(), desc.ty, desc.placement)
    };

    assert_eq!(
        placement_of(SurfaceCaps::OVERLAY | SurfaceCaps::SYSTEMMEMORY),
        (SurfaceKind::Overlay, ResourceType::OffscreenPlain, Placement::Local)
    );
    assert_eq!(
        placement_of(SurfaceCaps::OFFSCREENPLAIN | SurfaceCaps::SYSTEMMEMORY),
        (SurfaceKind::OffscreenPlain, ResourceType::OffscreenPlain, Placement::System)
    );
}

#[test]
fn backing_extent_matches_the_declared_size() {
    let (rt, _) = default_runtime();
    let depth = rt.create_surface(depth_buffer(48, 24)).unwrap();
    let cube = rt
        .create_surface(
            texture(32, 32).with_caps2(SurfaceCaps2::CUBEMAP | SurfaceCaps2::CUBEMAP_ALLFACES),
        )
        .unwrap();
    let plain = rt
        .create_surface(
            SurfaceDesc::new(SurfaceCaps::OFFSCREENPLAIN)
                .with_size(40, 12)
                .with_pixel_format(argb8888()),
        )
        .unwrap();

    let bound = [
        (depth, rt.depth_stencil_resource(depth).unwrap().unwrap()),
        (cube, rt.cube_texture_resource(cube).unwrap().unwrap()),
        (plain, rt.surface_resource(plain).unwrap().unwrap()),
    ];
    for (id, resource) in bound {
        let declared = rt.surface_desc(id).unwrap();
        let desc = rt.with_device(|d| d.resource_desc(resource)).flatten().unwrap();
        assert_eq!(
            (desc.width, desc.height),
            (declared.width, declared.height),
            "{id}"
        );
    }
}

#[test]
fn oversized_surfaces_are_rejected() {
    let (rt, _) = default_runtime();
    assert_eq!(
        rt.create_surface(texture(0x4000_0000, 1)),
        Err(SurfaceError::InvalidDescriptor("surface size overflows"))
    );
    assert_eq!(rt.surface_count(), 0);

    let id = rt.create_surface(texture(8, 8)).unwrap();
    let resource = rt.texture_resource(id).unwrap().unwrap();
    let before = rt.surface_desc(id).unwrap();
    let huge = before.with_size(0x1_0000, 0x1_0000);
    assert_eq!(
        rt.set_surface_desc(id, huge),
        Err(SurfaceError::InvalidDescriptor("surface size overflows"))
    );
    assert_eq!(rt.surface_desc(id).unwrap(), before);
    assert_eq!(rt.texture_resource(id).unwrap(), Some(resource));
}
