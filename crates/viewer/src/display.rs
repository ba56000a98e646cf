//! The session's outlet to the screen: a float RGBA texture registered with
//! the imgui renderer, overwritten in place on every published batch and
//! recreated only on resize.

use engine::DisplayTarget;

pub(crate) struct DisplaySlot {
    pub texture_id: imgui::TextureId,
}

impl DisplaySlot {
    pub fn new(
        device: &wgpu::Device,
        renderer: &mut imgui_wgpu::Renderer,
        size: (u32, u32),
    ) -> Self {
        let texture = Self::make_texture(device, renderer, size);
        let texture_id = renderer.textures.insert(texture);
        DisplaySlot { texture_id }
    }

    fn make_texture(
        device: &wgpu::Device,
        renderer: &mut imgui_wgpu::Renderer,
        (width, height): (u32, u32),
    ) -> imgui_wgpu::Texture {
        let texture_config = imgui_wgpu::TextureConfig {
            size: wgpu::Extent3d {
                width,
                height,
                depth_or_array_layers: 1,
            },
            label: Some("Resolved Frame Texture"),
            format: Some(wgpu::TextureFormat::Rgba32Float),
            usage: wgpu::TextureUsages::TEXTURE_BINDING | wgpu::TextureUsages::COPY_DST,
            ..Default::default()
        };

        imgui_wgpu::Texture::new(device, renderer, texture_config)
    }
}

/// Per-frame adapter borrowing the GPU handles; the session drives it
/// without knowing anything about wgpu or imgui.
pub(crate) struct WgpuDisplayTarget<'a> {
    pub device: &'a wgpu::Device,
    pub queue: &'a wgpu::Queue,
    pub renderer: &'a mut imgui_wgpu::Renderer,
    pub slot: &'a mut DisplaySlot,
}

impl DisplayTarget for WgpuDisplayTarget<'_> {
    fn recreate(&mut self, width: u32, height: u32) {
        let texture = DisplaySlot::make_texture(self.device, self.renderer, (width, height));
        // same id before and after, so panels holding it stay valid
        self.renderer.textures.replace(self.slot.texture_id, texture);
    }

    fn upload(&mut self, width: u32, height: u32, pixels: &[f32]) {
        let texture = self
            .renderer
            .textures
            .get(self.slot.texture_id)
            .expect("display texture missing from imgui registry");

        self.queue.write_texture(
            wgpu::TexelCopyTextureInfo {
                texture: texture.texture(),
                mip_level: 0,
                origin: wgpu::Origin3d::ZERO,
                aspect: wgpu::TextureAspect::All,
            },
            bytemuck::cast_slice(pixels),
            wgpu::TexelCopyBufferLayout {
                offset: 0,
                bytes_per_row: Some(width * 4 * std::mem::size_of::<f32>() as u32),
                rows_per_image: Some(height),
            },
            wgpu::Extent3d {
                width,
                height,
                depth_or_array_layers: 1,
            },
        );
    }
}
