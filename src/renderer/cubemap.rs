use std::path::Path;

use crate::renderer::error::RenderError;

/// Face order: +X, -X, +Y, -Y, +Z, -Z.
pub const CUBE_FACES: usize = 6;

/// Six-face RGBA8 cube texture sampled by direction.
pub struct CubeMap {
    _texture: wgpu::Texture,
    view: wgpu::TextureView,
    sampler: wgpu::Sampler,
    size: u32,
}

impl CubeMap {
    pub fn from_faces<P: AsRef<Path>>(
        device: &wgpu::Device,
        queue: &wgpu::Queue,
        faces: [P; CUBE_FACES],
    ) -> Result<Self, RenderError> {
        let mut images = Vec::with_capacity(CUBE_FACES);
        for face in &faces {
            let path = face.as_ref();
            let img = image::open(path)
                .map_err(|e| RenderError::CubeMap(format!("{:?}: {}", path, e)))
                .inspect_err(|err| log::error!("{}", err))?;
            images.push(img.to_rgba8());
        }

        let sizes: Vec<(u32, u32)> = images.iter().map(|img| img.dimensions()).collect();
        let size = check_face_sizes(&sizes).inspect_err(|err| log::error!("{}", err))?;

        let extent = wgpu::Extent3d {
            width: size,
            height: size,
            depth_or_array_layers: CUBE_FACES as u32,
        };
        let texture = device.create_texture(&wgpu::TextureDescriptor {
            label: Some("CubeMap"),
            size: extent,
            mip_level_count: 1,
            sample_count: 1,
            dimension: wgpu::TextureDimension::D2,
            format: wgpu::TextureFormat::Rgba8UnormSrgb,
            usage: wgpu::TextureUsages::TEXTURE_BINDING | wgpu::TextureUsages::COPY_DST,
            view_formats: &[],
        });

        for (layer, img) in images.iter().enumerate() {
            queue.write_texture(
                wgpu::TexelCopyTextureInfo {
                    texture: &texture,
                    mip_level: 0,
                    origin: wgpu::Origin3d {
                        x: 0,
                        y: 0,
                        z: layer as u32,
                    },
                    aspect: wgpu::TextureAspect::All,
                },
                img,
                wgpu::TexelCopyBufferLayout {
                    offset: 0,
                    bytes_per_row: Some(4 * size),
                    rows_per_image: Some(size),
                },
                wgpu::Extent3d {
                    width: size,
                    height: size,
                    depth_or_array_layers: 1,
                },
            );
        }

        let view = texture.create_view(&wgpu::TextureViewDescriptor {
            label: Some("CubeMap View"),
            dimension: Some(wgpu::TextureViewDimension::Cube),
            ..Default::default()
        });
        let sampler = device.create_sampler(&wgpu::SamplerDescriptor {
            label: Some("CubeMap Sampler"),
            address_mode_u: wgpu::AddressMode::ClampToEdge,
            address_mode_v: wgpu::AddressMode::ClampToEdge,
            address_mode_w: wgpu::AddressMode::ClampToEdge,
            mag_filter: wgpu::FilterMode::Linear,
            min_filter: wgpu::FilterMode::Linear,
            ..Default::default()
        });

        log::info!("Loaded {}x{} cube map", size, size);
        Ok(Self {
            _texture: texture,
            view,
            sampler,
            size,
        })
    }

    pub fn view(&self) -> &wgpu::TextureView {
        &self.view
    }

    pub fn sampler(&self) -> &wgpu::Sampler {
        &self.sampler
    }

    pub fn size(&self) -> u32 {
        self.size
    }
}

/// All faces must be square and the same size.
pub(crate) fn check_face_sizes(sizes: &[(u32, u32)]) -> Result<u32, RenderError> {
    let Some(&(width, height)) = sizes.first() else {
        return Err(RenderError::CubeMap("no faces".into()));
    };
    if width == 0 || width != height {
        return Err(RenderError::CubeMap(format!(
            "face 0 is {}x{}, faces must be square",
            width, height
        )));
    }
    for (face, &(w, h)) in sizes.iter().enumerate().skip(1) {
        if (w, h) != (width, height) {
            return Err(RenderError::CubeMap(format!(
                "face {} is {}x{}, expected {}x{}",
                face, w, h, width, height
            )));
        }
    }
    Ok(width)
}
