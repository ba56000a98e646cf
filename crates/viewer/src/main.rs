use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Instant;

use imgui::MouseCursor;
use imgui_wgpu::{Renderer, RendererConfig};
use imgui_winit_support::WinitPlatform;
use pollster::FutureExt;
use winit::{
    application::ApplicationHandler,
    dpi::PhysicalSize,
    event::{Event, WindowEvent},
    event_loop::{ActiveEventLoop, EventLoop},
    window::Window,
};

use engine::{RenderSession, SessionConfig, SoftwareTracer};

use crate::display::{DisplaySlot, WgpuDisplayTarget};
use crate::panel::ViewerPanel;
use crate::present::PresentPass;
use crate::shader_cache::ShaderCache;

mod display;
mod panel;
mod present;
mod shader_cache;

/// Nothing in this application can recover from an engine or GUI error.
/// Log it and leave.
fn fatal(err: &dyn std::fmt::Display) -> ! {
    log::error!("fatal: {err}");
    std::process::exit(1);
}

struct Application {
    window: Option<Arc<Window>>,
    width: u32,
    height: u32,

    wgpu_handles: Option<WgpuHandles<'static>>,
    imgui_state: Option<ImguiInternalState>,

    shader_cache: ShaderCache,
    present_pass: Option<PresentPass>,

    session: Option<RenderSession<SoftwareTracer>>,
    display_slot: Option<DisplaySlot>,
    panel: ViewerPanel,
    pending_resize: Option<(u32, u32)>,
}

struct WgpuHandles<'window> {
    surface: wgpu::Surface<'window>,
    adapter: wgpu::Adapter,
    device: wgpu::Device,
    queue: wgpu::Queue,

    blitter: wgpu::util::TextureBlitter,
    draw_texture: wgpu::Texture,
}

struct ImguiInternalState {
    context: imgui::Context,
    platform: WinitPlatform,
    renderer: Renderer,
    last_cursor: Option<MouseCursor>,
    last_frame: Instant,
}

fn mesh_asset_path() -> PathBuf {
    // assets live at the workspace root, two levels up from this crate
    Path::new(env!("CARGO_MANIFEST_DIR"))
        .parent()
        .and_then(Path::parent)
        .map(|root| root.join("resources/meshes/teapot.obj"))
        .unwrap_or_else(|| PathBuf::from("resources/meshes/teapot.obj"))
}

impl Application {
    fn new() -> Self {
        let config = SessionConfig::default();
        Self {
            window: None,
            width: 1280,
            height: 800,

            wgpu_handles: None,
            imgui_state: None,

            shader_cache: ShaderCache::new(),
            present_pass: None,

            session: None,
            display_slot: None,
            panel: ViewerPanel::new((config.width, config.height)),
            pending_resize: None,
        }
    }

    fn init_wgpu(&self) -> WgpuHandles<'static> {
        let instance_descriptor = wgpu::InstanceDescriptor::from_env_or_default();
        let instance = wgpu::Instance::new(&instance_descriptor);

        let window_clone = Arc::clone(self.window.as_ref().unwrap());
        let surface = instance
            .create_surface(window_clone)
            .expect("Unable to create surface");

        let request_adapter_options = wgpu::RequestAdapterOptions {
            power_preference: wgpu::PowerPreference::default(),
            force_fallback_adapter: false,
            compatible_surface: Some(&surface),
        };

        let adapter = instance
            .request_adapter(&request_adapter_options)
            .block_on()
            .expect("Unable to create adapter (physical device)");

        // the resolved frames are Rgba32Float and get sampled by imgui
        let required_features = wgpu::Features::FLOAT32_FILTERABLE;

        let device_descriptor = wgpu::DeviceDescriptor {
            label: Some("Main Device"),
            required_features,
            required_limits: wgpu::Limits::default(),
            memory_hints: wgpu::MemoryHints::default(),
            trace: wgpu::Trace::Off,
        };

        let (device, queue) = adapter
            .request_device(&device_descriptor)
            .block_on()
            .expect("Unable to get device (logical device)");

        let swapchain_capabilities = surface.get_capabilities(&adapter);
        let swapchain_format = swapchain_capabilities.formats[0];
        log::info!("using swapchain format {swapchain_format:?}");

        let config = surface
            .get_default_config(&adapter, self.width, self.height)
            .expect("Unable to get surface configuration");
        surface.configure(&device, &config);

        // don't use the swapchain directly, draw to a texture then blit
        let blitter = wgpu::util::TextureBlitter::new(&device, swapchain_format);
        let draw_texture = Self::make_draw_texture(self.width, self.height, &device);

        WgpuHandles {
            surface,
            adapter,
            device,
            queue,
            blitter,
            draw_texture,
        }
    }

    fn make_draw_texture(width: u32, height: u32, device: &wgpu::Device) -> wgpu::Texture {
        let texture_desc = wgpu::TextureDescriptor {
            label: Some("Draw Texture"),
            size: wgpu::Extent3d {
                width,
                height,
                depth_or_array_layers: 1,
            },
            mip_level_count: 1,
            sample_count: 1,
            dimension: wgpu::TextureDimension::D2,
            format: wgpu::TextureFormat::Rgba8Unorm,
            // need TEXTURE_BINDING for blitting to the swapchain
            usage: wgpu::TextureUsages::RENDER_ATTACHMENT | wgpu::TextureUsages::TEXTURE_BINDING,
            view_formats: &[wgpu::TextureFormat::Rgba8Unorm],
        };
        device.create_texture(&texture_desc)
    }

    fn init_imgui(&self) -> ImguiInternalState {
        let mut context = imgui::Context::create();
        let mut platform = imgui_winit_support::WinitPlatform::new(&mut context);
        let window = self.window.as_ref().expect("window not created yet");
        let handles = self.wgpu_handles.as_ref().expect("wgpu not initialized");
        platform.attach_window(
            context.io_mut(),
            window,
            // keep mouse coordinates in physical pixels
            imgui_winit_support::HiDpiMode::Locked(1.0),
        );

        context.set_ini_filename(None);

        let renderer_config = RendererConfig {
            texture_format: handles.draw_texture.format(),
            ..Default::default()
        };
        let renderer = Renderer::new(&mut context, &handles.device, &handles.queue, renderer_config);

        ImguiInternalState {
            context,
            platform,
            renderer,
            last_cursor: None,
            last_frame: Instant::now(),
        }
    }

    fn resize_window(&mut self, width: u32, height: u32) {
        let wgpu_handles = self.wgpu_handles.as_mut().expect("wgpu not initialized");
        let config = wgpu_handles
            .surface
            .get_default_config(&wgpu_handles.adapter, width, height)
            .expect("surface not supported");

        // surface width / height must be nonzero
        if width != 0 && height != 0 {
            wgpu_handles.surface.configure(&wgpu_handles.device, &config);
            wgpu_handles.draw_texture =
                Self::make_draw_texture(width, height, &wgpu_handles.device);
        }
    }

    /// One frame: apply any pending render-target resize, run one sample
    /// batch, present the frame texture, draw the GUI, blit, swap.
    fn redraw(&mut self) {
        let wgpu_handles = self.wgpu_handles.as_ref().unwrap();
        let imgui_state = self.imgui_state.as_mut().unwrap();
        let session = self.session.as_mut().unwrap();
        let slot = self.display_slot.as_mut().unwrap();
        let window = self.window.as_ref().unwrap();

        {
            let mut target = WgpuDisplayTarget {
                device: &wgpu_handles.device,
                queue: &wgpu_handles.queue,
                renderer: &mut imgui_state.renderer,
                slot: &mut *slot,
            };

            if let Some((w, h)) = self.pending_resize.take() {
                if let Err(err) = session.resize(w, h, &mut target) {
                    fatal(&err);
                }
                self.panel.on_reset((w, h));
            }

            if let Err(err) = session.advance_one_batch(&mut target) {
                fatal(&err);
            }
        }

        let frame = wgpu_handles
            .surface
            .get_current_texture()
            .expect("Unable to get next swapchain image");

        // pass 1: the resolved frame straight to the draw texture (or just
        // the clear when the two-pass toggle is off)
        let frame_texture_view = imgui_state
            .renderer
            .textures
            .get(slot.texture_id)
            .map(|t| t.texture().create_view(&wgpu::TextureViewDescriptor::default()));
        let draw_view = wgpu_handles
            .draw_texture
            .create_view(&wgpu::TextureViewDescriptor::default());

        let mut encoder = wgpu_handles
            .device
            .create_command_encoder(&wgpu::CommandEncoderDescriptor {
                label: Some("Present Encoder"),
            });
        let source = if self.panel.two_pass() {
            frame_texture_view.as_ref()
        } else {
            None
        };
        self.present_pass
            .as_ref()
            .unwrap()
            .draw(&wgpu_handles.device, &mut encoder, source, &draw_view);
        wgpu_handles.queue.submit(Some(encoder.finish()));

        // pass 2: the GUI on top
        let now = Instant::now();
        imgui_state
            .context
            .io_mut()
            .update_delta_time(now - imgui_state.last_frame);
        imgui_state.last_frame = now;

        imgui_state
            .platform
            .prepare_frame(imgui_state.context.io_mut(), window)
            .expect("Failed to prepare frame");

        let ui = imgui_state.context.new_frame();
        let requests = self
            .panel
            .draw(ui, session.progress(), slot.texture_id, session.size());
        self.pending_resize = requests.resize;

        if imgui_state.last_cursor != ui.mouse_cursor() {
            imgui_state.last_cursor = ui.mouse_cursor();
            imgui_state.platform.prepare_render(ui, window);
        }

        let mut encoder = wgpu_handles
            .device
            .create_command_encoder(&wgpu::CommandEncoderDescriptor {
                label: Some("Gui Encoder"),
            });
        {
            let mut rpass = encoder.begin_render_pass(&wgpu::RenderPassDescriptor {
                label: Some("Gui Pass"),
                color_attachments: &[Some(wgpu::RenderPassColorAttachment {
                    view: &draw_view,
                    resolve_target: None,
                    ops: wgpu::Operations {
                        load: wgpu::LoadOp::Load,
                        store: wgpu::StoreOp::Store,
                    },
                })],
                depth_stencil_attachment: None,
                timestamp_writes: None,
                occlusion_query_set: None,
            });

            imgui_state
                .renderer
                .render(
                    imgui_state.context.render(),
                    &wgpu_handles.queue,
                    &wgpu_handles.device,
                    &mut rpass,
                )
                .expect("Rendering failed");
        }
        wgpu_handles.queue.submit(Some(encoder.finish()));

        // blit the draw texture to the swapchain image
        let mut blit_encoder =
            wgpu_handles
                .device
                .create_command_encoder(&wgpu::CommandEncoderDescriptor {
                    label: Some("Blit Encoder"),
                });
        let dest_view = frame
            .texture
            .create_view(&wgpu::TextureViewDescriptor::default());
        wgpu_handles.blitter.copy(
            &wgpu_handles.device,
            &mut blit_encoder,
            &draw_view,
            &dest_view,
        );
        wgpu_handles.queue.submit(Some(blit_encoder.finish()));

        frame.present();

        // keep the accumulation loop running
        window.request_redraw();
    }
}

impl ApplicationHandler for Application {
    fn resumed(&mut self, event_loop: &ActiveEventLoop) {
        if self.window.is_none() {
            let window_attributes = Window::default_attributes()
                .with_title("Teapot Render Viewer")
                .with_inner_size(PhysicalSize::new(self.width, self.height));
            let window = event_loop
                .create_window(window_attributes)
                .expect("Unable to create window");
            self.window = Some(Arc::new(window));

            self.wgpu_handles = Some(self.init_wgpu());
            self.imgui_state = Some(self.init_imgui());

            let wgpu_handles = self.wgpu_handles.as_ref().unwrap();
            let imgui_state = self.imgui_state.as_mut().unwrap();

            let present_pass = PresentPass::new(
                &wgpu_handles.device,
                &mut self.shader_cache,
                wgpu_handles.draw_texture.format(),
            )
            .unwrap_or_else(|err| fatal(&err));
            self.present_pass = Some(present_pass);

            let config = SessionConfig {
                mesh_path: mesh_asset_path(),
                ..SessionConfig::default()
            };
            self.display_slot = Some(DisplaySlot::new(
                &wgpu_handles.device,
                &mut imgui_state.renderer,
                (config.width, config.height),
            ));
            self.panel = ViewerPanel::new((config.width, config.height));

            let session = RenderSession::initialize(SoftwareTracer::new(), config)
                .unwrap_or_else(|err| fatal(&err));
            self.session = Some(session);
        }
    }

    fn window_event(
        &mut self,
        event_loop: &ActiveEventLoop,
        window_id: winit::window::WindowId,
        event: winit::event::WindowEvent,
    ) {
        match &event {
            WindowEvent::CloseRequested => {
                log::info!("window close requested");

                if let Some(session) = self.session.take() {
                    if let Err(err) = session.shutdown() {
                        fatal(&err);
                    }
                }

                // tear down wgpu before the window goes away
                let wgpu_handles = std::mem::take(&mut self.wgpu_handles);
                drop(wgpu_handles);

                event_loop.exit();
            }

            WindowEvent::RedrawRequested if !event_loop.exiting() => {
                self.redraw();
            }

            WindowEvent::Resized(new_size) => {
                log::debug!("window resized to {new_size:?}");
                self.width = new_size.width;
                self.height = new_size.height;
                self.resize_window(self.width, self.height);
            }

            _ => (),
        }

        if let (Some(imgui_state), Some(window)) = (self.imgui_state.as_mut(), self.window.as_ref())
        {
            imgui_state.platform.handle_event::<()>(
                imgui_state.context.io_mut(),
                window,
                &Event::WindowEvent { window_id, event },
            );
        }
    }
}

fn main() {
    env_logger::init();

    let event_loop = EventLoop::new().expect("Unable to create event loop");
    let mut app = Application::new();

    event_loop.run_app(&mut app).expect("Unable to run application");
}
