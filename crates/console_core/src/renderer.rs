use anyhow::Result;
use glam::Mat4;
use std::collections::HashMap;

use crate::batch::{DrawCommand, DrawingMode, SpriteBatch, MAX_SPRITE_PER_COMMAND};
use crate::error::ConsoleError;
use crate::pixels::{identity_remap, Clipper, ColorPalette, PixelArray};

/// Vertex for the batched sprite/composite stage. The dither pattern rides
/// along per vertex so batches with different patterns never share a draw.
#[repr(C)]
#[derive(Copy, Clone, Debug, bytemuck::Pod, bytemuck::Zeroable)]
pub struct SpriteVertex {
    pub position: [f32; 2],
    pub tex_coords: [f32; 2],
    pub dither: u32,
}

impl SpriteVertex {
    pub fn desc() -> wgpu::VertexBufferLayout<'static> {
        wgpu::VertexBufferLayout {
            array_stride: std::mem::size_of::<SpriteVertex>() as wgpu::BufferAddress,
            step_mode: wgpu::VertexStepMode::Vertex,
            attributes: &[
                wgpu::VertexAttribute {
                    offset: 0,
                    shader_location: 0,
                    format: wgpu::VertexFormat::Float32x2,
                },
                wgpu::VertexAttribute {
                    offset: std::mem::size_of::<[f32; 2]>() as wgpu::BufferAddress,
                    shader_location: 1,
                    format: wgpu::VertexFormat::Float32x2,
                },
                wgpu::VertexAttribute {
                    offset: std::mem::size_of::<[f32; 4]>() as wgpu::BufferAddress,
                    shader_location: 2,
                    format: wgpu::VertexFormat::Uint32,
                },
            ],
        }
    }
}

#[repr(C)]
#[derive(Copy, Clone, Debug, bytemuck::Pod, bytemuck::Zeroable)]
struct PresentVertex {
    position: [f32; 2],
    tex_coords: [f32; 2],
}

/// Opaque per-backend GPU handle: created once at init, threaded through
/// every render call. Engine-level code never looks inside.
pub struct RenderContext {
    pub instance: wgpu::Instance,
    pub adapter: wgpu::Adapter,
    pub device: wgpu::Device,
    pub queue: wgpu::Queue,
}

impl RenderContext {
    /// Device without a surface, for offscreen rendering and tests.
    pub async fn new_headless() -> Result<Self> {
        let instance = wgpu::Instance::new(&wgpu::InstanceDescriptor::default());
        let adapter = instance
            .request_adapter(&wgpu::RequestAdapterOptions {
                power_preference: wgpu::PowerPreference::LowPower,
                compatible_surface: None,
                force_fallback_adapter: false,
            })
            .await
            .ok_or_else(|| ConsoleError::Gpu("no suitable adapter".into()))?;
        Self::from_adapter(instance, adapter).await
    }

    /// Device compatible with the given window surface.
    pub async fn new_for_surface(
        instance: wgpu::Instance,
        surface: &wgpu::Surface<'static>,
    ) -> Result<Self> {
        let adapter = instance
            .request_adapter(&wgpu::RequestAdapterOptions {
                power_preference: wgpu::PowerPreference::default(),
                compatible_surface: Some(surface),
                force_fallback_adapter: false,
            })
            .await
            .ok_or_else(|| ConsoleError::Gpu("no surface-compatible adapter".into()))?;
        Self::from_adapter(instance, adapter).await
    }

    async fn from_adapter(instance: wgpu::Instance, adapter: wgpu::Adapter) -> Result<Self> {
        let (device, queue) = adapter
            .request_device(
                &wgpu::DeviceDescriptor {
                    label: Some("console_device"),
                    required_features: wgpu::Features::empty(),
                    required_limits: wgpu::Limits::downlevel_defaults(),
                    memory_hints: wgpu::MemoryHints::default(),
                },
                None,
            )
            .await
            .map_err(|e| ConsoleError::Gpu(e.to_string()))?;
        Ok(Self {
            instance,
            adapter,
            device,
            queue,
        })
    }
}

const OFFSCREEN_FORMAT: wgpu::TextureFormat = wgpu::TextureFormat::Rgba8Unorm;
const INDEX_FORMAT: wgpu::TextureFormat = wgpu::TextureFormat::R8Uint;
const STENCIL_FORMAT: wgpu::TextureFormat = wgpu::TextureFormat::Stencil8;

struct IndexTexture {
    texture: wgpu::Texture,
    view: wgpu::TextureView,
    width: u32,
    height: u32,
}

struct PaletteTexture {
    texture: wgpu::Texture,
    view: wgpu::TextureView,
}

/// GPU stages for the virtual framebuffer: the sprite-batch stage and the
/// primitive composite stage share one indexed-palette pipeline family (one
/// pipeline per drawing mode); everything lands in a fixed-resolution
/// offscreen target that the present stage later scales to the window.
pub struct VirtualRenderer {
    device: wgpu::Device,
    queue: wgpu::Queue,
    width: u32,
    height: u32,

    pipelines: Vec<(DrawingMode, wgpu::RenderPipeline)>,
    globals_buffer: wgpu::Buffer,
    globals_bind_group: wgpu::BindGroup,
    texture_bind_group_layout: wgpu::BindGroupLayout,

    vertex_buffer: wgpu::Buffer,
    index_buffer: wgpu::Buffer,

    offscreen: wgpu::Texture,
    offscreen_view: wgpu::TextureView,
    stencil_view: wgpu::TextureView,

    palette_texture: PaletteTexture,
    remap_views: HashMap<[u8; 256], wgpu::TextureView>,
    // Slot 0 is the primitive layer; 1..=16 are spritesheets.
    units: Vec<Option<IndexTexture>>,

    draw_calls: u32,
}

impl VirtualRenderer {
    pub fn new(ctx: &RenderContext, width: u32, height: u32) -> Result<Self> {
        let device = ctx.device.clone();
        let queue = ctx.queue.clone();

        let shader = device.create_shader_module(wgpu::ShaderModuleDescriptor {
            label: Some("sprite_shader"),
            source: wgpu::ShaderSource::Wgsl(include_str!("shaders/sprite.wgsl").into()),
        });

        let globals_buffer = device.create_buffer(&wgpu::BufferDescriptor {
            label: Some("globals_buffer"),
            size: 64,
            usage: wgpu::BufferUsages::UNIFORM | wgpu::BufferUsages::COPY_DST,
            mapped_at_creation: false,
        });
        let globals_bind_group_layout =
            device.create_bind_group_layout(&wgpu::BindGroupLayoutDescriptor {
                entries: &[wgpu::BindGroupLayoutEntry {
                    binding: 0,
                    visibility: wgpu::ShaderStages::VERTEX,
                    ty: wgpu::BindingType::Buffer {
                        ty: wgpu::BufferBindingType::Uniform,
                        has_dynamic_offset: false,
                        min_binding_size: None,
                    },
                    count: None,
                }],
                label: Some("globals_bind_group_layout"),
            });
        let globals_bind_group = device.create_bind_group(&wgpu::BindGroupDescriptor {
            layout: &globals_bind_group_layout,
            entries: &[wgpu::BindGroupEntry {
                binding: 0,
                resource: globals_buffer.as_entire_binding(),
            }],
            label: Some("globals_bind_group"),
        });

        let uint_texture_entry = |binding| wgpu::BindGroupLayoutEntry {
            binding,
            visibility: wgpu::ShaderStages::FRAGMENT,
            ty: wgpu::BindingType::Texture {
                multisampled: false,
                view_dimension: wgpu::TextureViewDimension::D2,
                sample_type: wgpu::TextureSampleType::Uint,
            },
            count: None,
        };
        let texture_bind_group_layout =
            device.create_bind_group_layout(&wgpu::BindGroupLayoutDescriptor {
                entries: &[
                    uint_texture_entry(0),
                    uint_texture_entry(1),
                    wgpu::BindGroupLayoutEntry {
                        binding: 2,
                        visibility: wgpu::ShaderStages::FRAGMENT,
                        ty: wgpu::BindingType::Texture {
                            multisampled: false,
                            view_dimension: wgpu::TextureViewDimension::D2,
                            sample_type: wgpu::TextureSampleType::Float { filterable: false },
                        },
                        count: None,
                    },
                ],
                label: Some("texture_bind_group_layout"),
            });

        let pipeline_layout = device.create_pipeline_layout(&wgpu::PipelineLayoutDescriptor {
            label: Some("sprite_pipeline_layout"),
            bind_group_layouts: &[&globals_bind_group_layout, &texture_bind_group_layout],
            push_constant_ranges: &[],
        });

        let pipelines = [
            DrawingMode::Default,
            DrawingMode::AlphaBlend,
            DrawingMode::StencilWrite,
            DrawingMode::StencilTest,
            DrawingMode::StencilNotTest,
        ]
        .into_iter()
        .map(|mode| {
            (
                mode,
                create_mode_pipeline(&device, &pipeline_layout, &shader, mode),
            )
        })
        .collect();

        let vertex_buffer = device.create_buffer(&wgpu::BufferDescriptor {
            label: Some("sprite_vertex_buffer"),
            size: (MAX_SPRITE_PER_COMMAND * 4 * std::mem::size_of::<SpriteVertex>()) as u64,
            usage: wgpu::BufferUsages::VERTEX | wgpu::BufferUsages::COPY_DST,
            mapped_at_creation: false,
        });

        // Static quad indices for the maximum batch size.
        let mut quad_indices: Vec<u16> = Vec::with_capacity(MAX_SPRITE_PER_COMMAND * 6);
        for i in 0..MAX_SPRITE_PER_COMMAND as u16 {
            let base = i * 4;
            quad_indices.extend_from_slice(&[base, base + 1, base + 2, base + 2, base + 3, base]);
        }
        let index_buffer = device.create_buffer(&wgpu::BufferDescriptor {
            label: Some("sprite_index_buffer"),
            size: (quad_indices.len() * std::mem::size_of::<u16>()) as u64,
            usage: wgpu::BufferUsages::INDEX | wgpu::BufferUsages::COPY_DST,
            mapped_at_creation: false,
        });
        queue.write_buffer(&index_buffer, 0, bytemuck::cast_slice(&quad_indices));

        let offscreen = device.create_texture(&wgpu::TextureDescriptor {
            label: Some("offscreen_target"),
            size: wgpu::Extent3d {
                width,
                height,
                depth_or_array_layers: 1,
            },
            mip_level_count: 1,
            sample_count: 1,
            dimension: wgpu::TextureDimension::D2,
            format: OFFSCREEN_FORMAT,
            usage: wgpu::TextureUsages::RENDER_ATTACHMENT
                | wgpu::TextureUsages::TEXTURE_BINDING
                | wgpu::TextureUsages::COPY_SRC,
            view_formats: &[],
        });
        let offscreen_view = offscreen.create_view(&wgpu::TextureViewDescriptor::default());

        let stencil = device.create_texture(&wgpu::TextureDescriptor {
            label: Some("offscreen_stencil"),
            size: wgpu::Extent3d {
                width,
                height,
                depth_or_array_layers: 1,
            },
            mip_level_count: 1,
            sample_count: 1,
            dimension: wgpu::TextureDimension::D2,
            format: STENCIL_FORMAT,
            usage: wgpu::TextureUsages::RENDER_ATTACHMENT,
            view_formats: &[],
        });
        let stencil_view = stencil.create_view(&wgpu::TextureViewDescriptor::default());

        let palette = device.create_texture(&wgpu::TextureDescriptor {
            label: Some("palette_texture"),
            size: wgpu::Extent3d {
                width: 256,
                height: 1,
                depth_or_array_layers: 1,
            },
            mip_level_count: 1,
            sample_count: 1,
            dimension: wgpu::TextureDimension::D2,
            format: OFFSCREEN_FORMAT,
            usage: wgpu::TextureUsages::TEXTURE_BINDING | wgpu::TextureUsages::COPY_DST,
            view_formats: &[],
        });
        let palette_view = palette.create_view(&wgpu::TextureViewDescriptor::default());

        let mut units = Vec::with_capacity(crate::texture_units::MAX_TEXTURE_UNITS);
        units.resize_with(crate::texture_units::MAX_TEXTURE_UNITS, || None);

        let mut renderer = Self {
            device,
            queue,
            width,
            height,
            pipelines,
            globals_buffer,
            globals_bind_group,
            texture_bind_group_layout,
            vertex_buffer,
            index_buffer,
            offscreen,
            offscreen_view,
            stencil_view,
            palette_texture: PaletteTexture {
                texture: palette,
                view: palette_view,
            },
            remap_views: HashMap::new(),
            units,
            draw_calls: 0,
        };

        // Projection: y grows downward, matching the pixel canvas.
        let proj = Mat4::orthographic_lh(0.0, width as f32, height as f32, 0.0, -1000.0, 1000.0);
        renderer.queue.write_buffer(
            &renderer.globals_buffer,
            0,
            bytemuck::cast_slice(&proj.to_cols_array()),
        );
        // The primitive layer always owns unit 0.
        renderer.ensure_unit_texture(0, width, height);
        renderer.remap_view(&identity_remap());
        Ok(renderer)
    }

    pub fn logical_size(&self) -> (u32, u32) {
        (self.width, self.height)
    }

    pub fn offscreen_view(&self) -> &wgpu::TextureView {
        &self.offscreen_view
    }

    pub fn last_draw_calls(&self) -> u32 {
        self.draw_calls
    }

    pub fn set_palette(&mut self, palette: &ColorPalette) {
        let table = palette.lookup_table();
        self.queue.write_texture(
            wgpu::TexelCopyTextureInfo {
                aspect: wgpu::TextureAspect::All,
                texture: &self.palette_texture.texture,
                mip_level: 0,
                origin: wgpu::Origin3d::ZERO,
            },
            &table,
            wgpu::TexelCopyBufferLayout {
                offset: 0,
                bytes_per_row: Some(256 * 4),
                rows_per_image: Some(1),
            },
            wgpu::Extent3d {
                width: 256,
                height: 1,
                depth_or_array_layers: 1,
            },
        );
    }

    /// Upload a spritesheet's index pixels into its assigned unit. Called on
    /// first draw reference and again after hot-reload.
    pub fn upload_sheet(&mut self, unit: u8, pixels: &PixelArray) {
        let (w, h) = (pixels.width() as u32, pixels.height() as u32);
        self.ensure_unit_texture(unit as usize, w, h);
        self.write_unit(unit as usize, pixels);
    }

    fn ensure_unit_texture(&mut self, unit: usize, width: u32, height: u32) {
        let needs_create = match &self.units[unit] {
            Some(t) => t.width != width || t.height != height,
            None => true,
        };
        if needs_create {
            let texture = self.device.create_texture(&wgpu::TextureDescriptor {
                label: Some("index_texture"),
                size: wgpu::Extent3d {
                    width,
                    height,
                    depth_or_array_layers: 1,
                },
                mip_level_count: 1,
                sample_count: 1,
                dimension: wgpu::TextureDimension::D2,
                format: INDEX_FORMAT,
                usage: wgpu::TextureUsages::TEXTURE_BINDING | wgpu::TextureUsages::COPY_DST,
                view_formats: &[],
            });
            let view = texture.create_view(&wgpu::TextureViewDescriptor::default());
            self.units[unit] = Some(IndexTexture {
                texture,
                view,
                width,
                height,
            });
        }
    }

    fn write_unit(&self, unit: usize, pixels: &PixelArray) {
        if let Some(t) = &self.units[unit] {
            self.queue.write_texture(
                wgpu::TexelCopyTextureInfo {
                    aspect: wgpu::TextureAspect::All,
                    texture: &t.texture,
                    mip_level: 0,
                    origin: wgpu::Origin3d::ZERO,
                },
                pixels.pixels(),
                wgpu::TexelCopyBufferLayout {
                    offset: 0,
                    bytes_per_row: Some(t.width),
                    rows_per_image: Some(t.height),
                },
                wgpu::Extent3d {
                    width: t.width,
                    height: t.height,
                    depth_or_array_layers: 1,
                },
            );
        }
    }

    fn remap_view(&mut self, remap: &[u8; 256]) -> wgpu::TextureView {
        if let Some(view) = self.remap_views.get(remap) {
            return view.clone();
        }
        let texture = self.device.create_texture(&wgpu::TextureDescriptor {
            label: Some("remap_texture"),
            size: wgpu::Extent3d {
                width: 256,
                height: 1,
                depth_or_array_layers: 1,
            },
            mip_level_count: 1,
            sample_count: 1,
            dimension: wgpu::TextureDimension::D2,
            format: INDEX_FORMAT,
            usage: wgpu::TextureUsages::TEXTURE_BINDING | wgpu::TextureUsages::COPY_DST,
            view_formats: &[],
        });
        self.queue.write_texture(
            wgpu::TexelCopyTextureInfo {
                aspect: wgpu::TextureAspect::All,
                texture: &texture,
                mip_level: 0,
                origin: wgpu::Origin3d::ZERO,
            },
            remap,
            wgpu::TexelCopyBufferLayout {
                offset: 0,
                bytes_per_row: Some(256),
                rows_per_image: Some(1),
            },
            wgpu::Extent3d {
                width: 256,
                height: 1,
                depth_or_array_layers: 1,
            },
        );
        let view = texture.create_view(&wgpu::TextureViewDescriptor::default());
        self.remap_views.insert(*remap, view.clone());
        view
    }

    fn pipeline(&self, mode: DrawingMode) -> &wgpu::RenderPipeline {
        &self
            .pipelines
            .iter()
            .find(|(m, _)| *m == mode)
            .expect("pipeline exists for every drawing mode")
            .1
    }

    /// Replay one frame's ordered draw commands into the offscreen target.
    /// Each command runs in its own pass so primitive-layer uploads between
    /// draws stay ordered with the draws around them.
    pub fn render_commands(&mut self, commands: &[DrawCommand], palette: &ColorPalette) {
        self.draw_calls = 0;
        let mut stencil_cleared = false;
        for command in commands {
            match command {
                DrawCommand::Clear(color) => {
                    let rgba = palette.rgba(*color);
                    self.clear_pass(rgba, &mut stencil_cleared);
                }
                DrawCommand::Primitives(layer) => {
                    self.write_unit(0, layer);
                    let quad = self.fullscreen_quad();
                    let sheet_view = match &self.units[0] {
                        Some(t) => t.view.clone(),
                        None => continue,
                    };
                    let remap = self.remap_view(&identity_remap());
                    self.draw_pass(
                        &quad,
                        &sheet_view,
                        &remap,
                        DrawingMode::Default,
                        None,
                        &mut stencil_cleared,
                    );
                }
                DrawCommand::Sprites(batch) => {
                    let unit = batch.state.texture_unit as usize;
                    let sheet_view = match self.units.get(unit).and_then(|t| t.as_ref()) {
                        Some(t) => t.view.clone(),
                        // Missing spritesheet: skip drawing, degrade gracefully.
                        None => continue,
                    };
                    let vertices = build_batch_vertices(batch);
                    if vertices.is_empty() {
                        continue;
                    }
                    let remap = self.remap_view(&batch.state.remap);
                    let Some(scissor) = scissor_rect(&batch.state.clip, self.width, self.height)
                    else {
                        continue;
                    };
                    self.draw_pass(
                        &vertices,
                        &sheet_view,
                        &remap,
                        batch.state.mode,
                        Some(scissor),
                        &mut stencil_cleared,
                    );
                }
            }
        }
    }

    fn fullscreen_quad(&self) -> Vec<SpriteVertex> {
        let (w, h) = (self.width as f32, self.height as f32);
        vec![
            SpriteVertex {
                position: [0.0, 0.0],
                tex_coords: [0.0, 0.0],
                dither: 0xFFFF,
            },
            SpriteVertex {
                position: [w, 0.0],
                tex_coords: [w, 0.0],
                dither: 0xFFFF,
            },
            SpriteVertex {
                position: [w, h],
                tex_coords: [w, h],
                dither: 0xFFFF,
            },
            SpriteVertex {
                position: [0.0, h],
                tex_coords: [0.0, h],
                dither: 0xFFFF,
            },
        ]
    }

    fn clear_pass(&mut self, rgba: [u8; 4], stencil_cleared: &mut bool) {
        let mut encoder = self
            .device
            .create_command_encoder(&wgpu::CommandEncoderDescriptor {
                label: Some("clear_encoder"),
            });
        {
            let _pass = encoder.begin_render_pass(&wgpu::RenderPassDescriptor {
                label: Some("clear_pass"),
                color_attachments: &[Some(wgpu::RenderPassColorAttachment {
                    view: &self.offscreen_view,
                    resolve_target: None,
                    ops: wgpu::Operations {
                        load: wgpu::LoadOp::Clear(wgpu::Color {
                            r: rgba[0] as f64 / 255.0,
                            g: rgba[1] as f64 / 255.0,
                            b: rgba[2] as f64 / 255.0,
                            a: rgba[3] as f64 / 255.0,
                        }),
                        store: wgpu::StoreOp::Store,
                    },
                })],
                depth_stencil_attachment: Some(stencil_attachment(
                    &self.stencil_view,
                    stencil_cleared,
                )),
                occlusion_query_set: None,
                timestamp_writes: None,
            });
        }
        self.queue.submit(std::iter::once(encoder.finish()));
    }

    fn draw_pass(
        &mut self,
        vertices: &[SpriteVertex],
        sheet_view: &wgpu::TextureView,
        remap_view: &wgpu::TextureView,
        mode: DrawingMode,
        scissor: Option<(u32, u32, u32, u32)>,
        stencil_cleared: &mut bool,
    ) {
        self.queue
            .write_buffer(&self.vertex_buffer, 0, bytemuck::cast_slice(vertices));
        let bind_group = self.device.create_bind_group(&wgpu::BindGroupDescriptor {
            layout: &self.texture_bind_group_layout,
            entries: &[
                wgpu::BindGroupEntry {
                    binding: 0,
                    resource: wgpu::BindingResource::TextureView(sheet_view),
                },
                wgpu::BindGroupEntry {
                    binding: 1,
                    resource: wgpu::BindingResource::TextureView(remap_view),
                },
                wgpu::BindGroupEntry {
                    binding: 2,
                    resource: wgpu::BindingResource::TextureView(&self.palette_texture.view),
                },
            ],
            label: Some("batch_bind_group"),
        });

        let mut encoder = self
            .device
            .create_command_encoder(&wgpu::CommandEncoderDescriptor {
                label: Some("batch_encoder"),
            });
        {
            let mut pass = encoder.begin_render_pass(&wgpu::RenderPassDescriptor {
                label: Some("batch_pass"),
                color_attachments: &[Some(wgpu::RenderPassColorAttachment {
                    view: &self.offscreen_view,
                    resolve_target: None,
                    ops: wgpu::Operations {
                        load: wgpu::LoadOp::Load,
                        store: wgpu::StoreOp::Store,
                    },
                })],
                depth_stencil_attachment: Some(stencil_attachment(
                    &self.stencil_view,
                    stencil_cleared,
                )),
                occlusion_query_set: None,
                timestamp_writes: None,
            });
            pass.set_pipeline(self.pipeline(mode));
            pass.set_bind_group(0, &self.globals_bind_group, &[]);
            pass.set_bind_group(1, &bind_group, &[]);
            pass.set_stencil_reference(1);
            if let Some((x, y, w, h)) = scissor {
                pass.set_scissor_rect(x, y, w, h);
            }
            pass.set_vertex_buffer(0, self.vertex_buffer.slice(..));
            pass.set_index_buffer(self.index_buffer.slice(..), wgpu::IndexFormat::Uint16);
            let quads = (vertices.len() / 4) as u32;
            pass.draw_indexed(0..quads * 6, 0, 0..1);
        }
        self.queue.submit(std::iter::once(encoder.finish()));
        self.draw_calls += 1;
    }

    /// Read back the composited offscreen target as RGBA bytes. Used by
    /// tests and the screenshot shortcut.
    pub fn read_rgba(&self) -> Result<Vec<u8>> {
        let bytes_per_row = (self.width * 4).next_multiple_of(256);
        let size = (bytes_per_row * self.height) as u64;
        let staging = self.device.create_buffer(&wgpu::BufferDescriptor {
            label: Some("readback"),
            size,
            usage: wgpu::BufferUsages::MAP_READ | wgpu::BufferUsages::COPY_DST,
            mapped_at_creation: false,
        });
        let mut encoder = self
            .device
            .create_command_encoder(&wgpu::CommandEncoderDescriptor {
                label: Some("readback_encoder"),
            });
        encoder.copy_texture_to_buffer(
            wgpu::TexelCopyTextureInfo {
                texture: &self.offscreen,
                mip_level: 0,
                origin: wgpu::Origin3d::ZERO,
                aspect: wgpu::TextureAspect::All,
            },
            wgpu::TexelCopyBufferInfo {
                buffer: &staging,
                layout: wgpu::TexelCopyBufferLayout {
                    offset: 0,
                    bytes_per_row: Some(bytes_per_row),
                    rows_per_image: Some(self.height),
                },
            },
            wgpu::Extent3d {
                width: self.width,
                height: self.height,
                depth_or_array_layers: 1,
            },
        );
        self.queue.submit(Some(encoder.finish()));

        let slice = staging.slice(..);
        slice.map_async(wgpu::MapMode::Read, move |_| {});
        self.device.poll(wgpu::Maintain::Wait);
        let padded = slice.get_mapped_range().to_vec();
        staging.unmap();

        let row = (self.width * 4) as usize;
        let mut data = Vec::with_capacity(row * self.height as usize);
        for y in 0..self.height as usize {
            let start = y * bytes_per_row as usize;
            data.extend_from_slice(&padded[start..start + row]);
        }
        Ok(data)
    }
}

fn stencil_attachment<'a>(
    view: &'a wgpu::TextureView,
    stencil_cleared: &mut bool,
) -> wgpu::RenderPassDepthStencilAttachment<'a> {
    let load = if *stencil_cleared {
        wgpu::LoadOp::Load
    } else {
        *stencil_cleared = true;
        wgpu::LoadOp::Clear(0)
    };
    wgpu::RenderPassDepthStencilAttachment {
        view,
        depth_ops: None,
        stencil_ops: Some(wgpu::Operations {
            load,
            store: wgpu::StoreOp::Store,
        }),
    }
}

fn create_mode_pipeline(
    device: &wgpu::Device,
    layout: &wgpu::PipelineLayout,
    shader: &wgpu::ShaderModule,
    mode: DrawingMode,
) -> wgpu::RenderPipeline {
    let (blend, write_mask) = match mode {
        DrawingMode::AlphaBlend => (
            Some(wgpu::BlendState::ALPHA_BLENDING),
            wgpu::ColorWrites::ALL,
        ),
        // Mask-only pass: stencil is written, color output is suppressed.
        DrawingMode::StencilWrite => (None, wgpu::ColorWrites::empty()),
        _ => (None, wgpu::ColorWrites::ALL),
    };
    let stencil_face = |compare, pass_op| wgpu::StencilFaceState {
        compare,
        fail_op: wgpu::StencilOperation::Keep,
        depth_fail_op: wgpu::StencilOperation::Keep,
        pass_op,
    };
    let face = match mode {
        DrawingMode::StencilWrite => stencil_face(
            wgpu::CompareFunction::Always,
            wgpu::StencilOperation::Replace,
        ),
        DrawingMode::StencilTest => {
            stencil_face(wgpu::CompareFunction::Equal, wgpu::StencilOperation::Keep)
        }
        DrawingMode::StencilNotTest => {
            stencil_face(wgpu::CompareFunction::NotEqual, wgpu::StencilOperation::Keep)
        }
        _ => stencil_face(wgpu::CompareFunction::Always, wgpu::StencilOperation::Keep),
    };
    let stencil_write_mask = if mode == DrawingMode::StencilWrite {
        0xFF
    } else {
        0
    };

    device.create_render_pipeline(&wgpu::RenderPipelineDescriptor {
        label: Some("sprite_pipeline"),
        layout: Some(layout),
        vertex: wgpu::VertexState {
            module: shader,
            entry_point: Some("vs_main"),
            buffers: &[SpriteVertex::desc()],
            compilation_options: wgpu::PipelineCompilationOptions::default(),
        },
        fragment: Some(wgpu::FragmentState {
            module: shader,
            entry_point: Some("fs_main"),
            targets: &[Some(wgpu::ColorTargetState {
                format: OFFSCREEN_FORMAT,
                blend,
                write_mask,
            })],
            compilation_options: wgpu::PipelineCompilationOptions::default(),
        }),
        primitive: wgpu::PrimitiveState::default(),
        depth_stencil: Some(wgpu::DepthStencilState {
            format: STENCIL_FORMAT,
            depth_write_enabled: false,
            depth_compare: wgpu::CompareFunction::Always,
            stencil: wgpu::StencilState {
                front: face,
                back: face,
                read_mask: 0xFF,
                write_mask: stencil_write_mask,
            },
            bias: wgpu::DepthBiasState::default(),
        }),
        multisample: wgpu::MultisampleState::default(),
        multiview: None,
        cache: None,
    })
}

/// Build the vertex quads for one batch: camera applied to destination
/// coordinates, flips applied by swapping texel coordinates.
pub fn build_batch_vertices(batch: &SpriteBatch) -> Vec<SpriteVertex> {
    let mut vertices = Vec::with_capacity(batch.quads.len() * 4);
    let (cam_x, cam_y) = batch.state.camera;
    let dither = batch.state.dither as u32;
    for quad in &batch.quads {
        let x0 = (quad.dst_x - cam_x) as f32;
        let y0 = (quad.dst_y - cam_y) as f32;
        let x1 = x0 + quad.dst_w as f32;
        let y1 = y0 + quad.dst_h as f32;
        let (mut u0, mut u1) = (quad.src_x as f32, (quad.src_x + quad.src_w) as f32);
        let (mut v0, mut v1) = (quad.src_y as f32, (quad.src_y + quad.src_h) as f32);
        if quad.flip_x {
            std::mem::swap(&mut u0, &mut u1);
        }
        if quad.flip_y {
            std::mem::swap(&mut v0, &mut v1);
        }
        vertices.push(SpriteVertex {
            position: [x0, y0],
            tex_coords: [u0, v0],
            dither,
        });
        vertices.push(SpriteVertex {
            position: [x1, y0],
            tex_coords: [u1, v0],
            dither,
        });
        vertices.push(SpriteVertex {
            position: [x1, y1],
            tex_coords: [u1, v1],
            dither,
        });
        vertices.push(SpriteVertex {
            position: [x0, y1],
            tex_coords: [u0, v1],
            dither,
        });
    }
    vertices
}

/// Clip rectangle intersected with the target; `None` when empty.
pub fn scissor_rect(clip: &Clipper, width: u32, height: u32) -> Option<(u32, u32, u32, u32)> {
    let x0 = clip.left.clamp(0, width as i32);
    let y0 = clip.top.clamp(0, height as i32);
    let x1 = clip.right.clamp(0, width as i32);
    let y1 = clip.bottom.clamp(0, height as i32);
    if x1 <= x0 || y1 <= y0 {
        return None;
    }
    Some((x0 as u32, y0 as u32, (x1 - x0) as u32, (y1 - y0) as u32))
}

/// Present stage: draws the offscreen target to the window surface, scaled
/// by the effective zoom and centered with a gutter. Nearest-neighbor
/// filtering is the only correct option for pixel art.
pub struct PresentStage {
    device: wgpu::Device,
    queue: wgpu::Queue,
    surface: wgpu::Surface<'static>,
    config: wgpu::SurfaceConfiguration,
    pipeline: wgpu::RenderPipeline,
    bind_group_layout: wgpu::BindGroupLayout,
    sampler: wgpu::Sampler,
    vertex_buffer: wgpu::Buffer,
    configured_zoom: u32,
}

impl PresentStage {
    pub fn new(
        ctx: &RenderContext,
        surface: wgpu::Surface<'static>,
        width: u32,
        height: u32,
        configured_zoom: u32,
    ) -> Result<Self> {
        let device = ctx.device.clone();
        let queue = ctx.queue.clone();

        let caps = surface.get_capabilities(&ctx.adapter);
        // Prefer a non-sRGB format so palette bytes pass through untouched.
        let format = caps
            .formats
            .iter()
            .find(|f| !f.is_srgb())
            .copied()
            .unwrap_or(caps.formats[0]);
        let config = wgpu::SurfaceConfiguration {
            usage: wgpu::TextureUsages::RENDER_ATTACHMENT,
            format,
            width,
            height,
            present_mode: caps.present_modes[0],
            alpha_mode: caps.alpha_modes[0],
            view_formats: vec![],
            desired_maximum_frame_latency: 2,
        };
        surface.configure(&device, &config);

        let shader = device.create_shader_module(wgpu::ShaderModuleDescriptor {
            label: Some("present_shader"),
            source: wgpu::ShaderSource::Wgsl(include_str!("shaders/present.wgsl").into()),
        });
        let bind_group_layout =
            device.create_bind_group_layout(&wgpu::BindGroupLayoutDescriptor {
                entries: &[
                    wgpu::BindGroupLayoutEntry {
                        binding: 0,
                        visibility: wgpu::ShaderStages::FRAGMENT,
                        ty: wgpu::BindingType::Texture {
                            multisampled: false,
                            view_dimension: wgpu::TextureViewDimension::D2,
                            sample_type: wgpu::TextureSampleType::Float { filterable: true },
                        },
                        count: None,
                    },
                    wgpu::BindGroupLayoutEntry {
                        binding: 1,
                        visibility: wgpu::ShaderStages::FRAGMENT,
                        ty: wgpu::BindingType::Sampler(wgpu::SamplerBindingType::Filtering),
                        count: None,
                    },
                ],
                label: Some("present_bind_group_layout"),
            });
        let pipeline_layout = device.create_pipeline_layout(&wgpu::PipelineLayoutDescriptor {
            label: Some("present_pipeline_layout"),
            bind_group_layouts: &[&bind_group_layout],
            push_constant_ranges: &[],
        });
        let pipeline = device.create_render_pipeline(&wgpu::RenderPipelineDescriptor {
            label: Some("present_pipeline"),
            layout: Some(&pipeline_layout),
            vertex: wgpu::VertexState {
                module: &shader,
                entry_point: Some("vs_main"),
                buffers: &[wgpu::VertexBufferLayout {
                    array_stride: std::mem::size_of::<PresentVertex>() as wgpu::BufferAddress,
                    step_mode: wgpu::VertexStepMode::Vertex,
                    attributes: &[
                        wgpu::VertexAttribute {
                            offset: 0,
                            shader_location: 0,
                            format: wgpu::VertexFormat::Float32x2,
                        },
                        wgpu::VertexAttribute {
                            offset: std::mem::size_of::<[f32; 2]>() as wgpu::BufferAddress,
                            shader_location: 1,
                            format: wgpu::VertexFormat::Float32x2,
                        },
                    ],
                }],
                compilation_options: wgpu::PipelineCompilationOptions::default(),
            },
            fragment: Some(wgpu::FragmentState {
                module: &shader,
                entry_point: Some("fs_main"),
                targets: &[Some(wgpu::ColorTargetState {
                    format,
                    blend: None,
                    write_mask: wgpu::ColorWrites::ALL,
                })],
                compilation_options: wgpu::PipelineCompilationOptions::default(),
            }),
            primitive: wgpu::PrimitiveState::default(),
            depth_stencil: None,
            multisample: wgpu::MultisampleState::default(),
            multiview: None,
            cache: None,
        });

        let sampler = device.create_sampler(&wgpu::SamplerDescriptor {
            address_mode_u: wgpu::AddressMode::ClampToEdge,
            address_mode_v: wgpu::AddressMode::ClampToEdge,
            address_mode_w: wgpu::AddressMode::ClampToEdge,
            mag_filter: wgpu::FilterMode::Nearest,
            min_filter: wgpu::FilterMode::Nearest,
            mipmap_filter: wgpu::FilterMode::Nearest,
            ..Default::default()
        });
        let vertex_buffer = device.create_buffer(&wgpu::BufferDescriptor {
            label: Some("present_vertex_buffer"),
            size: (6 * std::mem::size_of::<PresentVertex>()) as u64,
            usage: wgpu::BufferUsages::VERTEX | wgpu::BufferUsages::COPY_DST,
            mapped_at_creation: false,
        });

        Ok(Self {
            device,
            queue,
            surface,
            config,
            pipeline,
            bind_group_layout,
            sampler,
            vertex_buffer,
            configured_zoom,
        })
    }

    pub fn resize(&mut self, width: u32, height: u32) {
        if width > 0 && height > 0 {
            self.config.width = width;
            self.config.height = height;
            self.surface.configure(&self.device, &self.config);
        }
    }

    pub fn present(&mut self, offscreen: &wgpu::TextureView, logical: (u32, u32)) -> Result<()> {
        let zoom = crate::present_math::effective_zoom(
            self.config.width,
            self.config.height,
            logical.0,
            logical.1,
            self.configured_zoom,
        );
        let rect = crate::present_math::present_rect(
            self.config.width,
            self.config.height,
            logical.0,
            logical.1,
            zoom,
        );
        let quad = crate::present_math::present_quad(rect, self.config.width, self.config.height);
        let vertices: Vec<PresentVertex> = quad
            .iter()
            .map(|v| PresentVertex {
                position: [v[0], v[1]],
                tex_coords: [v[2], v[3]],
            })
            .collect();
        self.queue
            .write_buffer(&self.vertex_buffer, 0, bytemuck::cast_slice(&vertices));

        let bind_group = self.device.create_bind_group(&wgpu::BindGroupDescriptor {
            layout: &self.bind_group_layout,
            entries: &[
                wgpu::BindGroupEntry {
                    binding: 0,
                    resource: wgpu::BindingResource::TextureView(offscreen),
                },
                wgpu::BindGroupEntry {
                    binding: 1,
                    resource: wgpu::BindingResource::Sampler(&self.sampler),
                },
            ],
            label: Some("present_bind_group"),
        });

        let output = self.surface.get_current_texture()?;
        let view = output
            .texture
            .create_view(&wgpu::TextureViewDescriptor::default());
        let mut encoder = self
            .device
            .create_command_encoder(&wgpu::CommandEncoderDescriptor {
                label: Some("present_encoder"),
            });
        {
            let mut pass = encoder.begin_render_pass(&wgpu::RenderPassDescriptor {
                label: Some("present_pass"),
                color_attachments: &[Some(wgpu::RenderPassColorAttachment {
                    view: &view,
                    resolve_target: None,
                    ops: wgpu::Operations {
                        load: wgpu::LoadOp::Clear(wgpu::Color::BLACK),
                        store: wgpu::StoreOp::Store,
                    },
                })],
                depth_stencil_attachment: None,
                occlusion_query_set: None,
                timestamp_writes: None,
            });
            pass.set_pipeline(&self.pipeline);
            pass.set_bind_group(0, &bind_group, &[]);
            pass.set_vertex_buffer(0, self.vertex_buffer.slice(..));
            pass.draw(0..6, 0..1);
        }
        self.queue.submit(std::iter::once(encoder.finish()));
        output.present();
        Ok(())
    }
}
