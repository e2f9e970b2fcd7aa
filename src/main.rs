use std::any::Any;
use std::fmt;
use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;
use std::time::Instant;

use anyhow::{anyhow, Context, Result};
use clap::Parser;
use log::{error, info, warn};
use pollster::block_on;
use winit::dpi::PhysicalSize;
use winit::event::{DeviceEvent, ElementState, Event, MouseButton, WindowEvent};
use winit::event_loop::{ControlFlow, EventLoop};
use winit::keyboard::{KeyCode as WinitKey, PhysicalKey};
use winit::platform::run_on_demand::EventLoopExtRunOnDemand;
use winit::window::{CursorGrabMode, Window, WindowBuilder};

use prism_render::app::{self, FrameStats, HEADLESS_FRAME_DELTA, MAX_FRAME_DELTA};
use prism_render::assets::{self, AssetRequest, LoadedAssets, PendingAssets};
use prism_render::gpu::headless::HeadlessContext;
use prism_render::gpu::native::WgpuContext;
use prism_render::gpu::GraphicsContext;
use prism_render::{DemoConfig, FrameError, InputHandler, KeyCode, KeyEvent, KeyState};

fn main() {
    env_logger::init();
    if let Err(err) = run() {
        eprintln!("Error: {err:?}");
        std::process::exit(1);
    }
}

fn run() -> Result<()> {
    let config = DemoConfig::parse();
    let pending = assets::spawn(AssetRequest {
        textures: config.textures.clone(),
        vertex_shader: config.vertex_shader.clone(),
        fragment_shader: config.fragment_shader.clone(),
    });

    if config.headless {
        return run_headless(&config, pending.join());
    }
    match open_window(&config) {
        Ok((event_loop, window)) => run_interactive(&config, event_loop, window, pending),
        Err(err) => {
            eprintln!(
                "{err}. Falling back to --headless mode (set DISPLAY or WAYLAND_DISPLAY to open a window)."
            );
            run_headless(&config, pending.join())
        }
    }
}

fn run_headless(config: &DemoConfig, assets: LoadedAssets) -> Result<()> {
    let ctx = HeadlessContext::new();
    let mut scene = app::build_demo_scene(&ctx, config, assets)?;
    scene.set_aspect(config.width, config.height);

    let mut input = InputHandler::new();
    let mut stats = FrameStats::default();
    for _ in 0..config.headless_frames() {
        stats.record(HEADLESS_FRAME_DELTA);
        scene.update(HEADLESS_FRAME_DELTA, &mut input);
        if let Err(err) = scene.render() {
            error!("skipping frame: {err}");
        }
    }

    println!(
        "Rendered {} frame(s) on the {} backend",
        scene.frames(),
        ctx.backend_name()
    );
    app::print_final_state(&scene);
    Ok(())
}

fn open_window(config: &DemoConfig) -> Result<(EventLoop<()>, Arc<Window>), WindowInitError> {
    // Some platforms panic instead of erroring when no display is reachable.
    let default_hook = panic::take_hook();
    panic::set_hook(Box::new(|_| {}));
    let event_loop = panic::catch_unwind(AssertUnwindSafe(EventLoop::new));
    panic::set_hook(default_hook);
    let event_loop = event_loop
        .map_err(|panic| WindowInitError::from_panic("event loop", panic))?
        .map_err(|err| WindowInitError::from_error("event loop", err))?;

    let window = WindowBuilder::new()
        .with_title("Prism Render")
        .with_inner_size(PhysicalSize::new(config.width.max(1), config.height.max(1)))
        .build(&event_loop)
        .map_err(|err| WindowInitError::from_error("window", err))?;
    Ok((event_loop, Arc::new(window)))
}

fn run_interactive(
    config: &DemoConfig,
    mut event_loop: EventLoop<()>,
    window: Arc<Window>,
    pending: PendingAssets,
) -> Result<()> {
    let ctx = block_on(WgpuContext::new(window)).context("failed to initialise the GPU")?;
    let mut scene = app::build_demo_scene(&ctx, config, pending.join())?;
    let size = ctx.size();
    scene.set_aspect(size.width, size.height);
    info!("hold the left mouse button to look and move, release it or press Escape to stop");

    let window_id = ctx.window_id();
    let mut input = InputHandler::new();
    let mut stats = FrameStats::default();
    let mut last_frame = Instant::now();
    let mut fatal: Option<anyhow::Error> = None;

    event_loop
        .run_on_demand(|event, elwt| {
            elwt.set_control_flow(ControlFlow::Poll);
            match event {
                Event::WindowEvent {
                    event,
                    window_id: id,
                } if id == window_id => match event {
                    WindowEvent::CloseRequested => elwt.exit(),
                    WindowEvent::Resized(size) => {
                        ctx.resize(size);
                        scene.set_aspect(size.width, size.height);
                    }
                    WindowEvent::MouseInput {
                        state: ElementState::Pressed,
                        button: MouseButton::Left,
                        ..
                    } if !input.is_capturing() => capture_pointer(ctx.window(), &mut input),
                    WindowEvent::MouseInput {
                        state: ElementState::Released,
                        button: MouseButton::Left,
                        ..
                    } => release_pointer(ctx.window(), &mut input),
                    WindowEvent::Focused(false) => release_pointer(ctx.window(), &mut input),
                    WindowEvent::KeyboardInput { event, .. } => {
                        if event.physical_key == PhysicalKey::Code(WinitKey::Escape)
                            && event.state == ElementState::Pressed
                        {
                            release_pointer(ctx.window(), &mut input);
                        } else if let Some(key) = translate_key(&event) {
                            input.handle_key(key);
                        }
                    }
                    WindowEvent::RedrawRequested => {
                        let now = Instant::now();
                        let delta = now
                            .duration_since(last_frame)
                            .as_secs_f32()
                            .min(MAX_FRAME_DELTA);
                        last_frame = now;
                        stats.record(delta);
                        scene.update(delta, &mut input);
                        match scene.render() {
                            Ok(()) => {
                                if config.frames.is_some_and(|limit| scene.frames() >= limit) {
                                    elwt.exit();
                                }
                            }
                            Err(FrameError::OutOfMemory) => {
                                fatal = Some(anyhow!(FrameError::OutOfMemory));
                                elwt.exit();
                            }
                            Err(err) => warn!("skipping frame: {err}"),
                        }
                    }
                    _ => {}
                },
                Event::DeviceEvent {
                    event: DeviceEvent::MouseMotion { delta },
                    ..
                } => input.handle_pointer_motion(delta.0 as f32, delta.1 as f32),
                Event::AboutToWait => ctx.window().request_redraw(),
                _ => {}
            }
        })
        .context("event loop failed")?;

    app::print_final_state(&scene);
    match fatal {
        Some(err) => Err(err),
        None => Ok(()),
    }
}

fn capture_pointer(window: &Window, input: &mut InputHandler) {
    let grabbed = window
        .set_cursor_grab(CursorGrabMode::Locked)
        .or_else(|_| window.set_cursor_grab(CursorGrabMode::Confined));
    if let Err(err) = grabbed {
        warn!("pointer lock unavailable: {err}");
    }
    window.set_cursor_visible(false);
    input.begin_capture();
}

fn release_pointer(window: &Window, input: &mut InputHandler) {
    if !input.is_capturing() {
        return;
    }
    if let Err(err) = window.set_cursor_grab(CursorGrabMode::None) {
        warn!("failed to release the pointer: {err}");
    }
    window.set_cursor_visible(true);
    input.end_capture();
}

fn translate_key(event: &winit::event::KeyEvent) -> Option<KeyEvent> {
    let code = KeyCode::from_winit(event.physical_key)?;
    let state = match event.state {
        ElementState::Pressed => KeyState::Pressed,
        ElementState::Released => KeyState::Released,
    };
    Some(KeyEvent {
        code,
        state,
        repeat: event.repeat,
    })
}

#[derive(Debug)]
struct WindowInitError {
    message: String,
}

impl WindowInitError {
    fn from_panic(stage: &str, panic: Box<dyn Any + Send>) -> Self {
        Self {
            message: format!("failed to initialize {stage}: {}", panic_message(panic)),
        }
    }

    fn from_error(stage: &str, err: impl fmt::Display) -> Self {
        Self {
            message: format!("failed to initialize {stage}: {err}"),
        }
    }
}

impl fmt::Display for WindowInitError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.message)
    }
}

impl std::error::Error for WindowInitError {}

fn panic_message(panic: Box<dyn Any + Send>) -> String {
    match panic.downcast::<String>() {
        Ok(msg) => *msg,
        Err(panic) => match panic.downcast::<&'static str>() {
            Ok(msg) => (*msg).to_string(),
            Err(_) => "unknown panic".into(),
        },
    }
}
