// renderer.rs — ray-casts the active panorama on a full-screen triangle, then draws egui on top

use std::sync::Arc;

use anyhow::{anyhow, Context};
use glam::Vec2;
use image::{imageops, GenericImage, Rgba, RgbaImage};
use log::{debug, info, warn};
use panorama_tour::ProjectionMode;
use wgpu::util::DeviceExt;
use winit::dpi::PhysicalSize;
use winit::window::Window;

/// Mirrors `struct Camera` in shader_equirect.wgsl.
#[repr(C)]
#[derive(Debug, Copy, Clone, bytemuck::Pod, bytemuck::Zeroable)]
struct ViewUniform {
    aspect: f32,
    fov_rad: f32,
    yaw: f32,
    pitch: f32,
    mode: u32,
    _pad: [f32; 3],
}

impl ViewUniform {
    fn new(size: PhysicalSize<u32>) -> Self {
        Self {
            aspect: size.width.max(1) as f32 / size.height.max(1) as f32,
            fov_rad: 60f32.to_radians(),
            yaw: 0.0,
            pitch: 0.0,
            mode: ProjectionMode::default().shader_index(),
            _pad: [0.0; 3],
        }
    }
}

/// Scales an image down to the GPU limit and pads it to 2:1 with black
/// rows split above and below, so the horizon stays at `v = 0.5`.
pub fn prepare_equirect(img: RgbaImage, max_dimension: u32) -> RgbaImage {
    let (w, h) = img.dimensions();
    let img = if w > max_dimension || h > max_dimension {
        let scale = max_dimension as f32 / w.max(h) as f32;
        let (new_w, new_h) = (((w as f32 * scale) as u32).max(1), ((h as f32 * scale) as u32).max(1));
        warn!("panorama {w}x{h} exceeds GPU limit {max_dimension}, scaling to {new_w}x{new_h}");
        imageops::resize(&img, new_w, new_h, imageops::FilterType::Lanczos3)
    } else {
        img
    };

    let (w, h) = img.dimensions();
    let full_height = w / 2;
    if full_height == 0 || h >= full_height {
        return img;
    }
    debug!("padding {w}x{h} panorama to {w}x{full_height}");
    let mut canvas = RgbaImage::from_pixel(w, full_height, Rgba([0, 0, 0, 255]));
    if let Err(err) = canvas.copy_from(&img, 0, (full_height - h) / 2) {
        warn!("padding panorama failed: {err}");
        return img;
    }
    canvas
}

/// Texture of the current panorama with the bind group that samples it.
struct PanoramaTexture {
    _texture: wgpu::Texture,
    bind_group: wgpu::BindGroup,
}

impl PanoramaTexture {
    fn upload(gpu: &Gpu, img: &RgbaImage, label: &str) -> Self {
        let (width, height) = img.dimensions();
        let size = wgpu::Extent3d { width, height, depth_or_array_layers: 1 };
        let texture = gpu.device.create_texture(&wgpu::TextureDescriptor {
            label: Some(label),
            size,
            mip_level_count: 1,
            sample_count: 1,
            dimension: wgpu::TextureDimension::D2,
            format: wgpu::TextureFormat::Rgba8UnormSrgb,
            usage: wgpu::TextureUsages::TEXTURE_BINDING | wgpu::TextureUsages::COPY_DST,
            view_formats: &[],
        });
        gpu.queue.write_texture(
            wgpu::ImageCopyTexture {
                texture: &texture,
                mip_level: 0,
                origin: wgpu::Origin3d::ZERO,
                aspect: wgpu::TextureAspect::All,
            },
            img,
            wgpu::ImageDataLayout { offset: 0, bytes_per_row: Some(4 * width), rows_per_image: Some(height) },
            size,
        );

        let view = texture.create_view(&wgpu::TextureViewDescriptor::default());
        let bind_group = gpu.device.create_bind_group(&wgpu::BindGroupDescriptor {
            label: Some(label),
            layout: &gpu.layout,
            entries: &[
                wgpu::BindGroupEntry { binding: 0, resource: gpu.view_buffer.as_entire_binding() },
                wgpu::BindGroupEntry { binding: 1, resource: wgpu::BindingResource::TextureView(&view) },
                wgpu::BindGroupEntry { binding: 2, resource: wgpu::BindingResource::Sampler(&gpu.sampler) },
            ],
        });
        Self { _texture: texture, bind_group }
    }
}

/// Device-side objects shared by every panorama texture.
struct Gpu {
    device: wgpu::Device,
    queue: wgpu::Queue,
    layout: wgpu::BindGroupLayout,
    sampler: wgpu::Sampler,
    view_buffer: wgpu::Buffer,
}

pub struct Renderer {
    surface: wgpu::Surface,
    config: wgpu::SurfaceConfiguration,
    pub size: PhysicalSize<u32>,
    gpu: Gpu,
    pipeline: wgpu::RenderPipeline,
    panorama: PanoramaTexture,
    view: ViewUniform,

    pub egui_ctx: egui::Context,
    pub egui_state: egui_winit::State,
    egui_renderer: egui_wgpu::Renderer,
}

fn bind_group_layout(device: &wgpu::Device) -> wgpu::BindGroupLayout {
    let fragment = |binding, ty| wgpu::BindGroupLayoutEntry {
        binding,
        visibility: wgpu::ShaderStages::FRAGMENT,
        ty,
        count: None,
    };
    device.create_bind_group_layout(&wgpu::BindGroupLayoutDescriptor {
        label: Some("panorama_layout"),
        entries: &[
            fragment(
                0,
                wgpu::BindingType::Buffer {
                    ty: wgpu::BufferBindingType::Uniform,
                    has_dynamic_offset: false,
                    min_binding_size: None,
                },
            ),
            fragment(
                1,
                wgpu::BindingType::Texture {
                    multisampled: false,
                    view_dimension: wgpu::TextureViewDimension::D2,
                    sample_type: wgpu::TextureSampleType::Float { filterable: true },
                },
            ),
            fragment(2, wgpu::BindingType::Sampler(wgpu::SamplerBindingType::Filtering)),
        ],
    })
}

fn panorama_pipeline(
    device: &wgpu::Device,
    layout: &wgpu::BindGroupLayout,
    format: wgpu::TextureFormat,
) -> wgpu::RenderPipeline {
    let shader = device.create_shader_module(wgpu::include_wgsl!("shader_equirect.wgsl"));
    let pipeline_layout = device.create_pipeline_layout(&wgpu::PipelineLayoutDescriptor {
        label: Some("panorama_pipeline_layout"),
        bind_group_layouts: &[layout],
        push_constant_ranges: &[],
    });
    device.create_render_pipeline(&wgpu::RenderPipelineDescriptor {
        label: Some("panorama_pipeline"),
        layout: Some(&pipeline_layout),
        // no vertex buffers: vs_main emits one screen-covering triangle
        vertex: wgpu::VertexState { module: &shader, entry_point: "vs_main", buffers: &[] },
        fragment: Some(wgpu::FragmentState {
            module: &shader,
            entry_point: "fs_main",
            targets: &[Some(wgpu::ColorTargetState {
                format,
                blend: Some(wgpu::BlendState::REPLACE),
                write_mask: wgpu::ColorWrites::ALL,
            })],
        }),
        primitive: wgpu::PrimitiveState { cull_mode: None, ..Default::default() },
        depth_stencil: None,
        multisample: wgpu::MultisampleState::default(),
        multiview: None,
    })
}

impl Renderer {
    pub async fn new(window: Arc<Window>) -> anyhow::Result<Self> {
        let size = window.inner_size();
        let instance = wgpu::Instance::new(wgpu::InstanceDescriptor {
            backends: wgpu::Backends::all(),
            ..Default::default()
        });

        // SAFETY: main keeps the window Arc alive for the whole event loop,
        // which outlives the surface.
        let surface = unsafe { instance.create_surface(window.as_ref()) }.context("creating surface")?;
        let adapter = instance
            .request_adapter(&wgpu::RequestAdapterOptions {
                power_preference: wgpu::PowerPreference::HighPerformance,
                compatible_surface: Some(&surface),
                force_fallback_adapter: false,
            })
            .await
            .ok_or_else(|| anyhow!("no suitable GPU adapter"))?;
        info!("using adapter {:?}", adapter.get_info().name);

        let (device, queue) = adapter
            .request_device(
                &wgpu::DeviceDescriptor {
                    label: None,
                    features: wgpu::Features::empty(),
                    limits: wgpu::Limits::default().using_resolution(adapter.limits()),
                },
                None,
            )
            .await
            .context("requesting device")?;

        let caps = surface.get_capabilities(&adapter);
        let format = caps
            .formats
            .iter()
            .copied()
            .find(|f| f.is_srgb())
            .or_else(|| caps.formats.first().copied())
            .ok_or_else(|| anyhow!("surface reports no texture formats"))?;
        let config = wgpu::SurfaceConfiguration {
            usage: wgpu::TextureUsages::RENDER_ATTACHMENT,
            format,
            width: size.width.max(1),
            height: size.height.max(1),
            present_mode: wgpu::PresentMode::Fifo,
            alpha_mode: caps.alpha_modes.first().copied().unwrap_or(wgpu::CompositeAlphaMode::Auto),
            view_formats: vec![],
        };
        surface.configure(&device, &config);

        let view = ViewUniform::new(size);
        let view_buffer = device.create_buffer_init(&wgpu::util::BufferInitDescriptor {
            label: Some("view_uniform"),
            contents: bytemuck::cast_slice(&[view]),
            usage: wgpu::BufferUsages::UNIFORM | wgpu::BufferUsages::COPY_DST,
        });
        let sampler = device.create_sampler(&wgpu::SamplerDescriptor {
            // pan wraps, tilt does not
            address_mode_u: wgpu::AddressMode::Repeat,
            address_mode_v: wgpu::AddressMode::ClampToEdge,
            mag_filter: wgpu::FilterMode::Linear,
            min_filter: wgpu::FilterMode::Linear,
            ..Default::default()
        });
        let layout = bind_group_layout(&device);
        let pipeline = panorama_pipeline(&device, &layout, format);
        let gpu = Gpu { device, queue, layout, sampler, view_buffer };

        // dark grey until the first image has decoded
        let placeholder = RgbaImage::from_pixel(2, 1, Rgba([26, 26, 26, 255]));
        let panorama = PanoramaTexture::upload(&gpu, &placeholder, "placeholder_panorama");

        let egui_ctx = egui::Context::default();
        let mut egui_state = egui_winit::State::new(window.as_ref());
        egui_state.set_pixels_per_point(window.scale_factor() as f32);
        let egui_renderer = egui_wgpu::Renderer::new(&gpu.device, format, None, 1);

        Ok(Self {
            surface,
            config,
            size,
            gpu,
            pipeline,
            panorama,
            view,
            egui_ctx,
            egui_state,
            egui_renderer,
        })
    }

    /// Physical pixel size of the surface.
    pub fn viewport(&self) -> Vec2 {
        Vec2::new(self.size.width as f32, self.size.height as f32)
    }

    pub fn set_vsync(&mut self, enabled: bool) {
        self.config.present_mode = if enabled {
            wgpu::PresentMode::Fifo
        } else {
            wgpu::PresentMode::AutoNoVsync
        };
        self.surface.configure(&self.gpu.device, &self.config);
        info!("vsync {}", if enabled { "on" } else { "off" });
    }

    pub fn resize(&mut self, new_size: PhysicalSize<u32>) {
        if new_size.width == 0 || new_size.height == 0 {
            return;
        }
        self.size = new_size;
        self.config.width = new_size.width;
        self.config.height = new_size.height;
        self.surface.configure(&self.gpu.device, &self.config);
        self.view.aspect = new_size.width as f32 / new_size.height as f32;
    }

    /// Uploads the view; angles in degrees.
    pub fn update_view(&mut self, local_pan: f32, tilt: f32, fov: f32, mode: ProjectionMode) {
        self.view.yaw = local_pan.to_radians();
        // tan() diverges at the poles
        self.view.pitch = tilt.clamp(-89.9, 89.9).to_radians();
        self.view.fov_rad = mode.safe_fov(fov).to_radians();
        self.view.mode = mode.shader_index();
        self.gpu
            .queue
            .write_buffer(&self.gpu.view_buffer, 0, bytemuck::cast_slice(&[self.view]));
    }

    pub fn load_panorama(&mut self, img: RgbaImage) {
        let img = prepare_equirect(img, self.gpu.device.limits().max_texture_dimension_2d);
        self.panorama = PanoramaTexture::upload(&self.gpu, &img, "panorama");
    }

    fn draw_panorama(&self, encoder: &mut wgpu::CommandEncoder, target: &wgpu::TextureView) {
        let mut pass = encoder.begin_render_pass(&wgpu::RenderPassDescriptor {
            label: Some("panorama_pass"),
            color_attachments: &[Some(wgpu::RenderPassColorAttachment {
                view: target,
                resolve_target: None,
                ops: wgpu::Operations { load: wgpu::LoadOp::Clear(wgpu::Color::BLACK), store: true },
            })],
            depth_stencil_attachment: None,
        });
        pass.set_pipeline(&self.pipeline);
        pass.set_bind_group(0, &self.panorama.bind_group, &[]);
        pass.draw(0..3, 0..1);
    }

    fn draw_egui(
        &mut self,
        window: &Window,
        encoder: &mut wgpu::CommandEncoder,
        target: &wgpu::TextureView,
        run_ui: impl FnOnce(&egui::Context),
    ) {
        let raw_input = self.egui_state.take_egui_input(window);
        let output = self.egui_ctx.run(raw_input, run_ui);
        self.egui_state.handle_platform_output(window, &self.egui_ctx, output.platform_output);

        let primitives = self.egui_ctx.tessellate(output.shapes);
        let screen = egui_wgpu::renderer::ScreenDescriptor {
            size_in_pixels: [self.config.width, self.config.height],
            pixels_per_point: window.scale_factor() as f32,
        };

        for (id, delta) in &output.textures_delta.set {
            self.egui_renderer.update_texture(&self.gpu.device, &self.gpu.queue, *id, delta);
        }
        self.egui_renderer
            .update_buffers(&self.gpu.device, &self.gpu.queue, encoder, &primitives, &screen);
        {
            let mut pass = encoder.begin_render_pass(&wgpu::RenderPassDescriptor {
                label: Some("egui_pass"),
                color_attachments: &[Some(wgpu::RenderPassColorAttachment {
                    view: target,
                    resolve_target: None,
                    ops: wgpu::Operations { load: wgpu::LoadOp::Load, store: true },
                })],
                depth_stencil_attachment: None,
            });
            self.egui_renderer.render(&mut pass, &primitives, &screen);
        }
        for id in &output.textures_delta.free {
            self.egui_renderer.free_texture(id);
        }
    }

    /// One frame: the panorama, then whatever `run_ui` paints over it.
    pub fn render_with_ui(&mut self, window: &Window, run_ui: impl FnOnce(&egui::Context)) -> Result<(), wgpu::SurfaceError> {
        let frame = self.surface.get_current_texture()?;
        let target = frame.texture.create_view(&wgpu::TextureViewDescriptor::default());
        let mut encoder = self
            .gpu
            .device
            .create_command_encoder(&wgpu::CommandEncoderDescriptor { label: Some("frame") });

        self.draw_panorama(&mut encoder, &target);
        self.draw_egui(window, &mut encoder, &target, run_ui);

        self.gpu.queue.submit(std::iter::once(encoder.finish()));
        frame.present();
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn short_panorama_is_padded_around_the_horizon() {
        let img = RgbaImage::from_pixel(8, 2, Rgba([255, 255, 255, 255]));
        let out = prepare_equirect(img, 4096);
        assert_eq!(out.dimensions(), (8, 4));
        assert_eq!(out.get_pixel(0, 0), &Rgba([0, 0, 0, 255]));
        assert_eq!(out.get_pixel(0, 1), &Rgba([255, 255, 255, 255]));
        assert_eq!(out.get_pixel(0, 2), &Rgba([255, 255, 255, 255]));
        assert_eq!(out.get_pixel(0, 3), &Rgba([0, 0, 0, 255]));
    }

    #[test]
    fn full_panorama_is_untouched() {
        let img = RgbaImage::from_pixel(8, 4, Rgba([10, 20, 30, 255]));
        assert_eq!(prepare_equirect(img.clone(), 4096), img);
    }

    #[test]
    fn oversized_panorama_is_scaled_to_the_limit() {
        let img = RgbaImage::new(64, 32);
        assert_eq!(prepare_equirect(img, 16).dimensions(), (16, 8));
    }

    #[test]
    fn uniform_matches_shader_layout() {
        assert_eq!(std::mem::size_of::<ViewUniform>(), 32);
    }
}
