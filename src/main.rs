use std::sync::Arc;

use anyhow::{Context, Result};
use clap::Parser;
use winit::{
    application::ApplicationHandler,
    event::*,
    event_loop::{ActiveEventLoop, EventLoop},
    keyboard::{KeyCode, PhysicalKey},
    window::{Window, WindowId},
};

use volumetric_player::cli::Cli;
use volumetric_player::config::{PlayerConfig, RenderMode};
use volumetric_player::core::{GpuContext, SurfaceRenderer};
use volumetric_player::frame::FrameClock;
use volumetric_player::render::RenderDevice;
use volumetric_player::{Player, SimulatedService};

const HEADLESS_HZ: f32 = 60.0;

struct App {
    config: PlayerConfig,
    media_count: u32,
    window: Option<Arc<Window>>,
    surface: Option<SurfaceRenderer>,
    player: Option<Player<SimulatedService>>,
    clock: FrameClock,
}

impl App {
    fn new(config: PlayerConfig, media_count: u32) -> Self {
        Self {
            config,
            media_count,
            window: None,
            surface: None,
            player: None,
            clock: FrameClock::wall(),
        }
    }

    fn create_player(&mut self, window: Arc<Window>) -> Result<()> {
        let surface = SurfaceRenderer::new(window.clone())
            .context("Failed to initialize the window surface")?;
        let gpu = surface.gpu();
        let service = SimulatedService::with_media_count(self.media_count).attach_gpu(gpu.clone());

        let mut player = Player::new(self.config.clone(), service, Some(RenderDevice::new(gpu)));
        let size = window.inner_size();
        player.resize(size.width, size.height);
        player
            .initialize()
            .context("Failed to initialize the media session")?;

        self.window = Some(window);
        self.surface = Some(surface);
        self.player = Some(player);
        self.bind_output();
        Ok(())
    }

    fn bind_output(&mut self) {
        if let (Some(surface), Some(player)) = (&mut self.surface, &self.player) {
            if let Some(view) = player.output_view() {
                surface.set_source(view);
            }
        }
    }

    fn handle_key(&mut self, key: KeyCode) {
        let Some(player) = &mut self.player else {
            return;
        };
        match key {
            KeyCode::KeyN => {
                if let Err(e) = player.next_media() {
                    log::warn!("Next media rejected: {}", e);
                }
            }
            KeyCode::Space => player.toggle_play_pause(),
            KeyCode::KeyS => player.stop(),
            KeyCode::KeyM => {
                let policy = player.cycle_motion();
                log::info!("Motion policy: {:?}", policy);
            }
            KeyCode::KeyR => {
                let mode = match player.presenters().point_cloud.render_mode() {
                    RenderMode::Points => RenderMode::SortedBlend,
                    RenderMode::SortedBlend => RenderMode::Points,
                };
                player.set_render_mode(mode);
                log::info!("Point-cloud render mode: {:?}", mode);
            }
            _ => {}
        }
    }
}

impl ApplicationHandler for App {
    fn resumed(&mut self, event_loop: &ActiveEventLoop) {
        if self.window.is_some() {
            return;
        }
        let window = match event_loop.create_window(
            Window::default_attributes()
                .with_title("Volumetric Player")
                .with_inner_size(winit::dpi::PhysicalSize::new(
                    self.config.window_width,
                    self.config.window_height,
                )),
        ) {
            Ok(w) => Arc::new(w),
            Err(e) => {
                log::error!("Failed to create window: {}", e);
                event_loop.exit();
                return;
            }
        };

        if let Err(e) = self.create_player(window) {
            log::error!("{:#}", e);
            event_loop.exit();
        }
    }

    fn window_event(
        &mut self,
        event_loop: &ActiveEventLoop,
        _window_id: WindowId,
        event: WindowEvent,
    ) {
        match event {
            WindowEvent::CloseRequested
            | WindowEvent::KeyboardInput {
                event:
                    KeyEvent {
                        state: ElementState::Pressed,
                        physical_key: PhysicalKey::Code(KeyCode::Escape),
                        ..
                    },
                ..
            } => {
                if let Some(player) = &mut self.player {
                    player.shutdown();
                }
                event_loop.exit();
            }
            WindowEvent::KeyboardInput {
                event:
                    KeyEvent {
                        state: ElementState::Pressed,
                        physical_key: PhysicalKey::Code(key),
                        repeat: false,
                        ..
                    },
                ..
            } => self.handle_key(key),
            WindowEvent::Resized(size) => {
                if let Some(surface) = &mut self.surface {
                    surface.resize(size.width, size.height);
                }
                if let Some(player) = &mut self.player {
                    player.resize(size.width, size.height);
                }
                self.bind_output();
            }
            WindowEvent::RedrawRequested => {
                let Some(info) = self.clock.next() else {
                    return;
                };
                if let Some(player) = &mut self.player {
                    player.frame(&info);
                }
                if let Some(surface) = &self.surface {
                    if let Err(e) = surface.present() {
                        log::warn!("Present failed: {}", e);
                    }
                }
            }
            _ => {}
        }
    }

    fn about_to_wait(&mut self, _event_loop: &ActiveEventLoop) {
        if let Some(window) = &self.window {
            window.request_redraw();
        }
    }
}

fn run_headless(config: PlayerConfig, media_count: u32, frames: u64) -> Result<()> {
    let gpu = GpuContext::headless().map(Arc::new);
    if gpu.is_none() {
        log::warn!("No GPU adapter available, running the session without rendering");
    }

    let mut service = SimulatedService::with_media_count(media_count);
    if let Some(gpu) = &gpu {
        service = service.attach_gpu(gpu.clone());
    }
    let mut player = Player::new(config, service, gpu.map(RenderDevice::new));
    player
        .initialize()
        .context("Failed to initialize the media session")?;

    for info in FrameClock::fixed(HEADLESS_HZ).take(frames as usize) {
        player.frame(&info);
    }

    log::info!(
        "Headless run finished: {} frames, {} composites, media {} ({}) at {:.1} decoder fps",
        frames,
        player.composites(),
        player.session().current_media_id(),
        player.session().media_name(),
        player.decoder_fps()
    );
    player.shutdown();
    Ok(())
}

fn main() -> Result<()> {
    env_logger::init();

    let cli = Cli::parse();
    let config = cli.player_config().context("Failed to load player config")?;

    if cli.headless {
        return run_headless(config, cli.media_count, cli.frames);
    }

    let event_loop = EventLoop::new().context("Failed to create event loop")?;
    let mut app = App::new(config, cli.media_count);

    log::info!(
        "Controls: N next media, Space pause, S stop, M motion policy, R render mode, Escape quit"
    );
    event_loop.run_app(&mut app).context("Event loop failed")?;

    Ok(())
}
