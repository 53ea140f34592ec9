//! Expansion of complex surface requests into linked surface records.

use tracing::debug;

use super::{DescFlags, DisplayMode, Surface, SurfaceArena, SurfaceDesc, SurfaceId};
use crate::caps::{classify, CubeFace, SurfaceCaps, SurfaceCaps2, SurfaceKind};
use crate::device::{level_extent, max_mip_levels};
use crate::error::SurfaceError;
use crate::mip::MAX_MIP_SUBLEVELS;

/// Creates the surface described by `desc` together with the implicit attachments a complex
/// request implies (flip-chain back buffers, mip sublevels, cube faces). Returns the primary.
pub(crate) fn create(
    arena: &mut SurfaceArena,
    desc: SurfaceDesc,
    display: Option<DisplayMode>,
) -> Result<SurfaceId, SurfaceError> {
    validate(&desc)?;

    let kind = classify(desc.caps, desc.caps2);
    let complex = desc.caps.contains(SurfaceCaps::COMPLEX);

    if kind == SurfaceKind::FrontBuffer && complex && desc.caps.contains(SurfaceCaps::FLIP) {
        return create_flip_chain(arena, desc, display);
    }
    if kind == SurfaceKind::CubeMap {
        return create_cube(arena, desc, display);
    }

    let top = arena.insert(Surface::new(desc, display)?);
    if wants_mip_chain(&desc) {
        create_mip_chain(arena, top, display)?;
    }
    Ok(top)
}

fn validate(desc: &SurfaceDesc) -> Result<(), SurfaceError> {
    let kind = classify(desc.caps, desc.caps2);
    if kind != SurfaceKind::FrontBuffer && !desc.has_extent() {
        return Err(SurfaceError::InvalidDescriptor(
            "width and height are required for non-primary surfaces",
        ));
    }
    if desc.caps.contains(SurfaceCaps::FLIP | SurfaceCaps::COMPLEX)
        && (!desc.flags.contains(DescFlags::BACKBUFFERCOUNT) || desc.back_buffer_count == 0)
    {
        return Err(SurfaceError::InvalidDescriptor(
            "complex flip chain requires a back buffer count",
        ));
    }
    if kind == SurfaceKind::CubeMap {
        if desc.width != desc.height {
            return Err(SurfaceError::InvalidDescriptor("cube map faces must be square"));
        }
        if !desc.caps2.intersects(SurfaceCaps2::CUBEMAP_ALLFACES) {
            return Err(SurfaceError::InvalidDescriptor("cube map without faces"));
        }
    }
    Ok(())
}

fn wants_mip_chain(desc: &SurfaceDesc) -> bool {
    desc.caps
        .contains(SurfaceCaps::MIPMAP | SurfaceCaps::COMPLEX | SurfaceCaps::TEXTURE)
}

fn desc_of(arena: &SurfaceArena, id: SurfaceId) -> Result<SurfaceDesc, SurfaceError> {
    arena
        .get(id)
        .map(|surface| surface.desc)
        .ok_or(SurfaceError::UnknownSurface(id))
}

fn create_flip_chain(
    arena: &mut SurfaceArena,
    mut desc: SurfaceDesc,
    display: Option<DisplayMode>,
) -> Result<SurfaceId, SurfaceError> {
    let count = desc.back_buffer_count;
    desc.caps |= SurfaceCaps::FRONTBUFFER;
    let front = arena.insert(Surface::new(desc, display)?);
    let base = desc_of(arena, front)?;

    let mut prev = front;
    for index in 0..count {
        let mut caps = base.caps
            - (SurfaceCaps::PRIMARYSURFACE | SurfaceCaps::FRONTBUFFER | SurfaceCaps::VISIBLE);
        if index == 0 {
            caps |= SurfaceCaps::BACKBUFFER;
        }
        let mut child = base;
        child.caps = caps;
        child.back_buffer_count = 0;
        child.flags.remove(DescFlags::BACKBUFFERCOUNT);
        child.flags |= DescFlags::WIDTH | DescFlags::HEIGHT;

        let id = arena.insert(Surface::new(child, display)?);
        arena.link(prev, id, true);
        prev = id;
    }
    // Close the cycle without making the front buffer anyone's child.
    arena.link_weak(prev, front);

    debug!(surface = %front, back_buffers = count, "created flip chain");
    Ok(front)
}

fn create_cube(
    arena: &mut SurfaceArena,
    desc: SurfaceDesc,
    display: Option<DisplayMode>,
) -> Result<SurfaceId, SurfaceError> {
    let faces: Vec<CubeFace> = CubeFace::ALL
        .into_iter()
        .filter(|face| desc.caps2.contains(face.caps2()))
        .collect();

    let root = arena.insert(Surface::new(desc, display)?);
    let mipmapped = wants_mip_chain(&desc);
    if mipmapped {
        create_mip_chain(arena, root, display)?;
    }
    let base = desc_of(arena, root)?;

    for face in faces.into_iter().skip(1) {
        let mut sibling = base;
        sibling.caps2 = (base.caps2 - SurfaceCaps2::CUBEMAP_ALLFACES) | face.caps2();
        let id = arena.insert(Surface::new(sibling, display)?);
        if mipmapped {
            create_mip_chain(arena, id, display)?;
        }
        arena.link(root, id, true);
    }

    debug!(surface = %root, edge = desc.width, "created cube map");
    Ok(root)
}

/// Attaches sublevels 1.. below `top`, each half the size of its parent.
fn create_mip_chain(
    arena: &mut SurfaceArena,
    top: SurfaceId,
    display: Option<DisplayMode>,
) -> Result<u32, SurfaceError> {
    let base = desc_of(arena, top)?;
    let full = max_mip_levels(base.width, base.height).min(MAX_MIP_SUBLEVELS + 1);
    let levels = if base.flags.contains(DescFlags::MIPMAPCOUNT) && base.mip_map_count > 0 {
        base.mip_map_count.min(full)
    } else {
        full
    };

    if let Some(surface) = arena.get_mut(top) {
        surface.desc = surface.desc.with_mip_count(levels);
    }

    let face_bits = CubeFace::from_caps2(base.caps2)
        .map(|face| face.caps2())
        .unwrap_or_default();

    let mut prev = top;
    for level in 1..levels {
        let (width, height) = level_extent(base.width, base.height, level);
        let mut sub = base.with_size(width, height).with_mip_count(levels - level);
        sub.flags.remove(DescFlags::PITCH | DescFlags::LINEARSIZE);
        sub.caps2 = (base.caps2 - SurfaceCaps2::CUBEMAP_ALLFACES)
            | face_bits
            | SurfaceCaps2::MIPMAPSUBLEVEL;

        let id = arena.insert(Surface::new(sub, display)?);
        arena.link(prev, id, true);
        prev = id;
    }
    Ok(levels)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::format::{D3DFormat, PixelFormat};

    fn argb() -> PixelFormat {
        PixelFormat::rgb(32, 0x00FF_0000, 0x0000_FF00, 0x0000_00FF, 0xFF00_0000)
    }

    #[test]
    fn flip_chain_links_back_to_front() {
        let mut arena = SurfaceArena::new();
        let desc = SurfaceDesc::new(
            SurfaceCaps::PRIMARYSURFACE
                | SurfaceCaps::FLIP
                | SurfaceCaps::COMPLEX
                | SurfaceCaps::THREE_D_DEVICE,
        )
        .with_back_buffers(2);
        let display = DisplayMode {
            width: 320,
            height: 200,
            format: D3DFormat::X8R8G8B8,
        };
        let front = create(&mut arena, desc, Some(display)).unwrap();
        assert_eq!(arena.len(), 3);

        let b0 = arena.get(front).unwrap().attachments[0].surface;
        let b1 = arena.get(b0).unwrap().attachments[0].surface;
        let back = arena.get(b1).unwrap().attachments[0];
        assert_eq!(back.surface, front);
        assert!(!back.implicit);
        assert_eq!(arena.get(front).unwrap().parent, None);

        let b0 = arena.get(b0).unwrap();
        assert_eq!(b0.kind, SurfaceKind::BackBuffer);
        assert!(b0.desc.caps.contains(SurfaceCaps::BACKBUFFER));
        assert_eq!(b0.extent(), (320, 200));
        assert_eq!(arena.get(b1).unwrap().kind, SurfaceKind::BackBuffer);
    }

    #[test]
    fn flip_chain_requires_back_buffer_count() {
        let mut arena = SurfaceArena::new();
        let desc = SurfaceDesc::new(
            SurfaceCaps::PRIMARYSURFACE | SurfaceCaps::FLIP | SurfaceCaps::COMPLEX,
        );
        assert!(matches!(
            create(&mut arena, desc, None),
            Err(SurfaceError::InvalidDescriptor(_))
        ));
        assert!(arena.is_empty());
    }

    #[test]
    fn mip_chain_defaults_to_full_chain() {
        let mut arena = SurfaceArena::new();
        let desc = SurfaceDesc::new(
            SurfaceCaps::TEXTURE | SurfaceCaps::MIPMAP | SurfaceCaps::COMPLEX,
        )
        .with_size(8, 4)
        .with_pixel_format(argb());
        let top = create(&mut arena, desc, None).unwrap();
        assert_eq!(arena.len(), 4);
        assert_eq!(arena.get(top).unwrap().desc.mip_map_count, 4);

        let mut extents = vec![arena.get(top).unwrap().extent()];
        let mut cur = top;
        while let Some(next) = arena.get(cur).unwrap().attachments.first() {
            cur = next.surface;
            let s = arena.get(cur).unwrap();
            assert!(s.desc.caps2.contains(SurfaceCaps2::MIPMAPSUBLEVEL));
            extents.push(s.extent());
        }
        assert_eq!(extents, vec![(8, 4), (4, 2), (2, 1), (1, 1)]);
    }

    #[test]
    fn cube_creates_faces_with_own_mip_chains() {
        let mut arena = SurfaceArena::new();
        let desc = SurfaceDesc::new(
            SurfaceCaps::TEXTURE | SurfaceCaps::MIPMAP | SurfaceCaps::COMPLEX,
        )
        .with_caps2(SurfaceCaps2::CUBEMAP | SurfaceCaps2::CUBEMAP_ALLFACES)
        .with_size(16, 16)
        .with_mip_count(3)
        .with_pixel_format(argb());
        let root = create(&mut arena, desc, None).unwrap();
        assert_eq!(arena.len(), 18);

        let root_surface = arena.get(root).unwrap();
        assert_eq!(root_surface.cube_face(), Some(CubeFace::PositiveX));
        let faces: Vec<_> = root_surface
            .attachments
            .iter()
            .filter_map(|a| arena.get(a.surface))
            .filter(|s| !s.desc.caps2.contains(SurfaceCaps2::MIPMAPSUBLEVEL))
            .filter_map(Surface::cube_face)
            .collect();
        assert_eq!(faces, CubeFace::ALL[1..].to_vec());
    }

    #[test]
    fn cube_must_be_square() {
        let mut arena = SurfaceArena::new();
        let desc = SurfaceDesc::new(SurfaceCaps::TEXTURE)
            .with_caps2(SurfaceCaps2::CUBEMAP | SurfaceCaps2::CUBEMAP_ALLFACES)
            .with_size(16, 8);
        assert!(matches!(
            create(&mut arena, desc, None),
            Err(SurfaceError::InvalidDescriptor(_))
        ));
    }

    #[test]
    fn non_primary_surfaces_need_extent() {
        let mut arena = SurfaceArena::new();
        let desc = SurfaceDesc::new(SurfaceCaps::OFFSCREENPLAIN);
        assert!(create(&mut arena, desc, None).is_err());
    }
}
