// main.rs — tour viewer window: input, per-frame tick, hot-area overlay and UI

#![cfg_attr(not(debug_assertions), windows_subsystem = "windows")]

mod renderer;
mod viewer;

use std::cell::RefCell;
use std::fs::File;
use std::io::BufReader;
use std::path::{Path, PathBuf};
use std::rc::Rc;
use std::sync::mpsc::{channel, Receiver, Sender};
use std::sync::Arc;
use std::thread;
use std::time::Instant;

use anyhow::Context;
use clap::Parser;
use glam::Vec2;
use image::io::Reader as ImageReader;
use image::GenericImageView;
use log::{error, info, warn};
use winit::{
    dpi::{LogicalSize, PhysicalPosition},
    event::*,
    event_loop::{ControlFlow, EventLoop},
    window::{CursorIcon, Fullscreen, Window, WindowBuilder},
};

use panorama_tour::angle::{lerp, shortest_delta};
use panorama_tour::{
    CancelPolicy, PanoramaEvent, PanoramaId, ProjectionMode, Projector, Scene, TourConfig,
    TransitionScheduler, TransitionSettings, ViewProjection,
};
use renderer::Renderer;
use viewer::{view_angles, PanoramaMesh, ViewCamera, ViewerSettings};

const IMAGE_EXTENSIONS: [&str; 4] = ["jpg", "jpeg", "png", "bmp"];
/// Pointer travel in physical pixels that turns a press into a drag.
const CLICK_SLOP: f32 = 4.0;
/// Points per hot-area edge when tracing outlines.
const EDGE_SEGMENTS: usize = 8;

#[derive(Parser, Debug)]
#[command(name = "panorama_tour", version, about = "360° panorama tour viewer")]
struct Args {
    /// Tour file (.json) or a single equirectangular image
    path: Option<PathBuf>,

    #[arg(long, value_enum, default_value_t = ProjectionMode::Rectilinear)]
    projection: ProjectionMode,

    /// Drag speed multiplier
    #[arg(long, default_value_t = 1.0)]
    sensitivity: f32,

    /// Start fov in degrees, overriding the tour
    #[arg(long)]
    fov: Option<f32>,
}

/// Everything a loaded tour owns.
struct Tour {
    scene: Scene,
    scheduler: TransitionScheduler,
    settings: TransitionSettings,
}

impl Tour {
    fn empty() -> Self {
        Self {
            scene: Scene::new(),
            scheduler: TransitionScheduler::new(),
            settings: TransitionSettings::default(),
        }
    }

    fn open(path: &Path) -> anyhow::Result<Self> {
        let is_tour = path
            .extension()
            .is_some_and(|ext| ext.eq_ignore_ascii_case("json"));
        let config = if is_tour {
            TourConfig::load(path)?
        } else {
            TourConfig::single_image(path)
        };
        let scene = config
            .build_scene()
            .with_context(|| format!("building tour from {}", path.display()))?;
        Ok(Self {
            scene,
            scheduler: TransitionScheduler::new(),
            settings: config.transition,
        })
    }

    /// Hooks the host camera and mesh into every panorama.
    fn attach(&mut self, camera: &Rc<RefCell<ViewCamera>>, mesh: &Rc<RefCell<PanoramaMesh>>, mode: ProjectionMode) {
        self.scene.attach_camera(camera);
        self.scene.attach_object(mesh);
        apply_projection_limits(&mut self.scene, mode);
        reset_view_targets(camera, mesh);
        if let Some(panorama) = self.scene.active_panorama_mut() {
            panorama.orientation.update_rotation();
        }
    }

    fn active_image(&self) -> Option<PathBuf> {
        self.scene.active_panorama().map(|p| p.image.clone())
    }

    fn fov(&self) -> f32 {
        self.scene
            .active_panorama()
            .map(|p| p.orientation.fov())
            .unwrap_or(60.0)
    }

    fn reset_view(&mut self) {
        if let Some(panorama) = self.scene.active_panorama_mut() {
            let [pan, tilt, fov] = panorama.home;
            panorama.orientation.look_at(pan, tilt);
            panorama.orientation.set_fov(fov);
        }
    }
}

/// Narrows every panorama's fov range to what the projection can show.
fn apply_projection_limits(scene: &mut Scene, mode: ProjectionMode) {
    let (min, max) = mode.fov_range();
    let ids: Vec<PanoramaId> = scene.panoramas().map(|(id, _)| id).collect();
    for id in ids {
        if let Some(panorama) = scene.panorama_mut(id) {
            let limits = panorama.limits.with_fov_range(min, max);
            limits.install(&mut panorama.orientation);
        }
    }
}

fn reset_view_targets(camera: &Rc<RefCell<ViewCamera>>, mesh: &Rc<RefCell<PanoramaMesh>>) {
    *camera.borrow_mut() = ViewCamera::default();
    *mesh.borrow_mut() = PanoramaMesh::default();
}

struct Drag {
    start: Vec2,
    last: Vec2,
    moved: bool,
}

enum UiAction {
    Open(PathBuf),
    ResetView,
    ToggleFullscreen,
    ProjectionChanged,
    SetVsync(bool),
    JumpTo(PanoramaId),
    Quit,
}

fn main() -> anyhow::Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();
    let args = Args::parse();

    let event_loop = EventLoop::new();
    let window = Arc::new(
        WindowBuilder::new()
            .with_title("Panorama Tour")
            .with_inner_size(LogicalSize::new(1280, 720))
            .build(&event_loop)
            .context("creating window")?,
    );

    let mut renderer = pollster::block_on(Renderer::new(window.clone()))?;
    let mut settings = ViewerSettings::new(args.projection, args.sensitivity);

    let camera = Rc::new(RefCell::new(ViewCamera::default()));
    let mesh = Rc::new(RefCell::new(PanoramaMesh::default()));

    let mut tour = match args.path.as_deref() {
        Some(path) => Tour::open(path).unwrap_or_else(|err| {
            error!("{err:#}");
            Tour::empty()
        }),
        None => Tour::empty(),
    };
    tour.attach(&camera, &mesh, settings.projection_mode);
    if let (Some(fov), Some(panorama)) = (args.fov, tour.scene.active_panorama_mut()) {
        panorama.orientation.set_fov(fov);
    }

    // images arrive tagged with their path; the start panorama's activation
    // event is still queued and kicks off the first load
    let (tx, rx): (Sender<(PathBuf, image::RgbaImage)>, Receiver<(PathBuf, image::RgbaImage)>) = channel();
    let mut is_loading = false;

    let mut cursor: Option<Vec2> = None;
    let mut drag: Option<Drag> = None;

    let mut last_tick = Instant::now();
    let mut last_frame_time = Instant::now();
    let mut frame_count = 0;
    let mut fps = 0.0;

    event_loop.run(move |event, _, control_flow| {
        *control_flow = ControlFlow::Poll;

        if let Ok((path, rgba)) = rx.try_recv() {
            // a late image for a panorama we already left is dropped
            if tour.active_image().as_deref() == Some(path.as_path()) {
                renderer.load_panorama(rgba);
            }
            is_loading = false;
        }

        match event {
            Event::WindowEvent { event, .. } => {
                let response = renderer.egui_state.on_event(&renderer.egui_ctx, &event);
                if response.consumed {
                    return;
                }

                match event {
                    WindowEvent::CloseRequested => {
                        *control_flow = ControlFlow::Exit;
                    }

                    WindowEvent::Resized(new_size) => {
                        renderer.resize(new_size);
                    }

                    WindowEvent::ScaleFactorChanged { new_inner_size, .. } => {
                        renderer.resize(*new_inner_size);
                    }

                    WindowEvent::KeyboardInput { input, .. } => {
                        if input.state == ElementState::Pressed {
                            match input.virtual_keycode {
                                Some(VirtualKeyCode::O) => {
                                    if let Some(path) = pick_file() {
                                        open_tour(&mut tour, &path, &camera, &mesh, &settings);
                                    }
                                }
                                Some(VirtualKeyCode::F11) => toggle_fullscreen(&window, &mut settings),
                                Some(VirtualKeyCode::Escape) => {
                                    tour.scheduler.cancel_all(CancelPolicy::Revert, &mut tour.scene);
                                }
                                _ => {}
                            }
                        }
                    }

                    WindowEvent::MouseInput { state, button: MouseButton::Left, .. } => match state {
                        ElementState::Pressed => {
                            drag = cursor.map(|at| Drag { start: at, last: at, moved: false });
                        }
                        ElementState::Released => {
                            let clicked = drag.take().is_some_and(|d| !d.moved);
                            if let (true, Some(area)) = (clicked, tour.scene.hovered()) {
                                let Tour { scene, scheduler, settings: transition } = &mut tour;
                                match panorama_tour::tour::trigger(scheduler, scene, area, transition) {
                                    Ok(Some(root)) => info!("hot area {area:?} started transition {root:?}"),
                                    Ok(None) => {}
                                    Err(err) => warn!("hot area {area:?}: {err}"),
                                }
                            }
                        }
                    },

                    WindowEvent::CursorMoved { position, .. } => {
                        let at = Vec2::new(position.x as f32, position.y as f32);
                        cursor = Some(at);
                        if let Some(d) = drag.as_mut() {
                            if !d.moved && at.distance(d.start) > CLICK_SLOP {
                                d.moved = true;
                                tour.scheduler.cancel_all(CancelPolicy::Hold, &mut tour.scene);
                            }
                            if d.moved {
                                let delta = at - d.last;
                                let scale = settings.drag_scale(tour.fov(), renderer.viewport());
                                if let (Some(scale), Some(panorama)) = (scale, tour.scene.active_panorama_mut()) {
                                    let orientation = &mut panorama.orientation;
                                    orientation.look_at(
                                        orientation.pan() - delta.x * scale.x,
                                        orientation.tilt() + delta.y * scale.y,
                                    );
                                }
                            }
                            d.last = at;
                        }
                    }

                    WindowEvent::CursorLeft { .. } => {
                        cursor = None;
                    }

                    WindowEvent::MouseWheel { delta, .. } => {
                        let scroll = match delta {
                            MouseScrollDelta::LineDelta(_, y) => y,
                            MouseScrollDelta::PixelDelta(PhysicalPosition { y, .. }) => y as f32 / 20.0,
                        };
                        if let Some(panorama) = tour.scene.active_panorama_mut() {
                            let fov = panorama.orientation.fov();
                            panorama.orientation.set_fov(fov - scroll * 2.5);
                        }
                    }

                    WindowEvent::DroppedFile(path) => {
                        open_tour(&mut tour, &path, &camera, &mesh, &settings);
                    }

                    _ => {}
                }
            }

            Event::RedrawRequested(_) => {
                frame_count += 1;
                let now = Instant::now();
                if now.duration_since(last_frame_time).as_secs_f32() >= 1.0 {
                    fps = frame_count as f32 / now.duration_since(last_frame_time).as_secs_f32();
                    frame_count = 0;
                    last_frame_time = now;
                }
                let dt = now.duration_since(last_tick).as_secs_f32();
                last_tick = now;

                tour.scene.flush_hot_areas();
                for err in tour.scheduler.tick(dt, &mut tour.scene) {
                    warn!("transition aborted: {err}");
                }
                for event in tour.scene.events_mut().poll() {
                    handle_scene_event(&event, &mut tour, &camera, &mesh, &window, &mut is_loading, &tx);
                }

                let (local_pan, tilt) = view_angles(&camera.borrow(), &mesh.borrow());
                let fov = tour.fov();
                let projection = settings.projection(local_pan, tilt, fov, renderer.viewport());
                renderer.update_view(local_pan, tilt, fov, settings.projection_mode);
                if drag.as_ref().map_or(true, |d| !d.moved) {
                    tour.scene.update_pointer(cursor, &projection);
                }

                let mut actions = Vec::new();
                let render_result = renderer.render_with_ui(&window, |ctx| {
                    draw_ui(ctx, &mut settings, &tour.scene, &projection, fps, is_loading, &mut actions);
                });

                for action in actions {
                    match action {
                        UiAction::Open(path) => {
                            open_tour(&mut tour, &path, &camera, &mesh, &settings)
                        }
                        UiAction::ResetView => tour.reset_view(),
                        UiAction::ToggleFullscreen => toggle_fullscreen(&window, &mut settings),
                        UiAction::ProjectionChanged => {
                            apply_projection_limits(&mut tour.scene, settings.projection_mode);
                        }
                        UiAction::SetVsync(enabled) => renderer.set_vsync(enabled),
                        UiAction::JumpTo(id) => {
                            tour.scheduler.cancel_all(CancelPolicy::Hold, &mut tour.scene);
                            tour.scene.activate(id);
                        }
                        UiAction::Quit => *control_flow = ControlFlow::Exit,
                    }
                }

                match render_result {
                    Ok(_) => {}
                    Err(wgpu::SurfaceError::Lost) => renderer.resize(renderer.size),
                    Err(wgpu::SurfaceError::OutOfMemory) => *control_flow = ControlFlow::Exit,
                    Err(e) => error!("render error: {e:?}"),
                }
            }

            Event::MainEventsCleared => {
                window.request_redraw();
            }

            _ => {}
        }
    })
}

fn pick_file() -> Option<PathBuf> {
    rfd::FileDialog::new()
        .add_filter("Panoramas and tours", &["jpg", "jpeg", "png", "bmp", "json"])
        .add_filter("Images", &IMAGE_EXTENSIONS)
        .add_filter("Tours", &["json"])
        .pick_file()
}

fn toggle_fullscreen(window: &Window, settings: &mut ViewerSettings) {
    settings.is_fullscreen = !settings.is_fullscreen;
    if settings.is_fullscreen {
        window.set_fullscreen(Some(Fullscreen::Borderless(None)));
    } else {
        window.set_fullscreen(None);
    }
}

/// Replaces the running tour; the old one is kept when the new file fails.
/// The new scene's activation event starts the image load.
fn open_tour(
    tour: &mut Tour,
    path: &Path,
    camera: &Rc<RefCell<ViewCamera>>,
    mesh: &Rc<RefCell<PanoramaMesh>>,
    settings: &ViewerSettings,
) {
    match Tour::open(path) {
        Ok(mut next) => {
            tour.scheduler.cancel_all(CancelPolicy::Hold, &mut tour.scene);
            next.attach(camera, mesh, settings.projection_mode);
            *tour = next;
        }
        Err(err) => error!("{err:#}"),
    }
}

fn handle_scene_event(
    event: &PanoramaEvent,
    tour: &mut Tour,
    camera: &Rc<RefCell<ViewCamera>>,
    mesh: &Rc<RefCell<PanoramaMesh>>,
    window: &Window,
    is_loading: &mut bool,
    tx: &Sender<(PathBuf, image::RgbaImage)>,
) {
    match event {
        PanoramaEvent::ActivePanoramaChanged { to, .. } => {
            reset_view_targets(camera, mesh);
            if let Some(panorama) = tour.scene.panorama_mut(*to) {
                panorama.orientation.update_rotation();
                *is_loading = true;
                start_load_image(panorama.image.clone(), tx.clone());
            }
        }
        PanoramaEvent::HotAreaEntered { .. } => window.set_cursor_icon(CursorIcon::Hand),
        PanoramaEvent::HotAreaExited { .. } => window.set_cursor_icon(CursorIcon::Default),
        PanoramaEvent::TransitionFinished { id, cancelled: true } => info!("transition {id:?} cancelled"),
        _ => {}
    }
}

fn start_load_image(path: PathBuf, tx: Sender<(PathBuf, image::RgbaImage)>) {
    thread::spawn(move || {
        info!("loading {} in background", path.display());

        let file = match File::open(&path) {
            Ok(f) => f,
            Err(e) => {
                error!("cannot open {}: {e}", path.display());
                return;
            }
        };
        let reader = BufReader::new(file);

        let img_result = ImageReader::new(reader)
            .with_guessed_format()
            .map_err(image::ImageError::IoError)
            .and_then(|mut r| {
                r.no_limits();
                r.decode()
            });

        match img_result {
            Ok(img) => {
                let (w, h) = img.dimensions();
                info!("decoded {} ({w}x{h})", path.display());
                let rgba = img.to_rgba8();
                if tx.send((path, rgba)).is_err() {
                    warn!("viewer closed before the image arrived");
                }
            }
            Err(e) => error!("cannot decode {}: {e}", path.display()),
        }
    });
}

/// Screen outline of a hot area in egui points, edges subdivided so they
/// follow the projection's curvature.
fn hot_area_outline(vertices: &[[f32; 2]], north_pan: f32, projection: &ViewProjection, ppp: f32) -> Option<Vec<egui::Pos2>> {
    if vertices.len() < 3 {
        return None;
    }
    let mut points = Vec::with_capacity(vertices.len() * EDGE_SEGMENTS);
    for (i, a) in vertices.iter().enumerate() {
        let b = vertices[(i + 1) % vertices.len()];
        let d_pan = shortest_delta(a[0], b[0]);
        for s in 0..EDGE_SEGMENTS {
            let t = s as f32 / EDGE_SEGMENTS as f32;
            let pan = a[0] + d_pan * t + north_pan;
            let tilt = lerp(a[1], b[1], t);
            let at = projection.screen_position_for_angle(pan, tilt)?;
            points.push(egui::pos2(at.x / ppp, at.y / ppp));
        }
    }
    Some(points)
}

fn paint_scene_overlays(ctx: &egui::Context, scene: &Scene, projection: &ViewProjection, show_hot_areas: bool) {
    let ppp = ctx.pixels_per_point();

    if let (true, Some(panorama)) = (show_hot_areas, scene.active_panorama()) {
        let painter = ctx.layer_painter(egui::LayerId::new(egui::Order::Background, egui::Id::new("hot_areas")));
        let north = panorama.orientation.north_pan();
        for area in panorama.hot_areas.iter() {
            let hovered = scene.hovered() == Some(area.id);
            let (width, color) = if hovered {
                (3.0, egui::Color32::from_rgb(255, 210, 60))
            } else {
                (1.5, egui::Color32::from_white_alpha(160))
            };
            let Some(points) = hot_area_outline(area.polygon.vertices(), north, projection, ppp) else {
                continue;
            };
            painter.add(egui::Shape::closed_line(points, egui::Stroke::new(width, color)));

            let [pan, tilt] = area.polygon.center();
            if let Some(at) = projection.screen_position_for_angle(pan + north, tilt) {
                painter.text(
                    egui::pos2(at.x / ppp, at.y / ppp),
                    egui::Align2::CENTER_CENTER,
                    &area.name,
                    egui::FontId::proportional(14.0),
                    color,
                );
            }
        }
    }

    let painter = ctx.layer_painter(egui::LayerId::new(egui::Order::Foreground, egui::Id::new("fades")));
    for (_, overlay) in scene.overlays() {
        if overlay.alpha <= 0.0 {
            continue;
        }
        let [r, g, b] = overlay.color.map(|c| (c.clamp(0.0, 1.0) * 255.0) as u8);
        let a = (overlay.alpha.clamp(0.0, 1.0) * 255.0) as u8;
        painter.rect_filled(ctx.screen_rect(), 0.0, egui::Color32::from_rgba_unmultiplied(r, g, b, a));
    }
}

fn draw_ui(
    ctx: &egui::Context,
    settings: &mut ViewerSettings,
    scene: &Scene,
    projection: &ViewProjection,
    fps: f32,
    is_loading: bool,
    actions: &mut Vec<UiAction>,
) {
    egui::TopBottomPanel::top("menu_bar").show(ctx, |ui| {
        egui::menu::bar(ui, |ui| {
            ui.menu_button("File", |ui| {
                if ui.button("Open image or tour…").clicked() {
                    ui.close_menu();
                    if let Some(path) = pick_file() {
                        actions.push(UiAction::Open(path));
                    }
                }
                if ui.button("Exit").clicked() {
                    actions.push(UiAction::Quit);
                }
            });

            ui.menu_button("View", |ui| {
                if ui.button("Reset view").clicked() {
                    actions.push(UiAction::ResetView);
                    ui.close_menu();
                }
                let fullscreen_label = if settings.is_fullscreen { "Exit fullscreen" } else { "Fullscreen" };
                if ui.button(fullscreen_label).clicked() {
                    actions.push(UiAction::ToggleFullscreen);
                    ui.close_menu();
                }

                ui.separator();
                ui.menu_button("Projection", |ui| {
                    for mode in ProjectionMode::ALL {
                        if ui
                            .radio_value(&mut settings.projection_mode, mode, format!("{mode:?}"))
                            .clicked()
                        {
                            actions.push(UiAction::ProjectionChanged);
                            ui.close_menu();
                        }
                    }
                });

                ui.separator();
                ui.menu_button("Input sensitivity", |ui| {
                    ui.add(egui::Slider::new(&mut settings.sensitivity_scale, 0.1..=5.0).text("multiplier"));
                    if ui.button("Reset to 1.0").clicked() {
                        settings.sensitivity_scale = 1.0;
                    }
                });

                ui.separator();
                ui.checkbox(&mut settings.show_hot_areas, "Show hot areas");
                if ui.checkbox(&mut settings.show_fps, "Show FPS").clicked() {
                    ui.close_menu();
                }
                if ui.checkbox(&mut settings.vsync_enabled, "VSync").clicked() {
                    actions.push(UiAction::SetVsync(settings.vsync_enabled));
                }
            });

            ui.menu_button("Panoramas", |ui| {
                if scene.panoramas().next().is_none() {
                    ui.label("No tour loaded");
                }
                for (id, panorama) in scene.panoramas() {
                    let selected = scene.active() == Some(id);
                    if ui.selectable_label(selected, panorama.name.as_str()).clicked() {
                        actions.push(UiAction::JumpTo(id));
                        ui.close_menu();
                    }
                }
            });
        });
    });

    egui::TopBottomPanel::bottom("status_bar").show(ctx, |ui| {
        ui.horizontal(|ui| {
            if is_loading {
                ui.label(egui::RichText::new("Loading image…").color(egui::Color32::YELLOW));
                ui.label("|");
            }

            if let Some(panorama) = scene.active_panorama() {
                ui.label(panorama.name.as_str());
                ui.label("|");
            }

            ui.label(format!("Mode: {:?}", settings.projection_mode));
            ui.label("|");
            ui.label(format!("FOV: {:.1}°", projection.fov));
            ui.label("|");

            {
                let fov_rad = projection.fov.clamp(0.01, 179.9).to_radians();
                let full_frame_diag = ((36.0f32 * 36.0f32) + (24.0f32 * 24.0f32)).sqrt();
                let equiv_focal = full_frame_diag / (2.0 * (fov_rad * 0.5).tan());
                ui.label(format!("Equiv. focal: {equiv_focal:.1}mm"));
            }

            ui.label("|");
            let pan = scene.active_panorama().map_or(projection.local_pan, |p| p.orientation.pan());
            ui.label(format!("Pan: {pan:.1}°"));
            ui.label("|");
            ui.label(format!("Tilt: {:.1}°", projection.tilt));

            let hovered = scene
                .active_panorama()
                .zip(scene.hovered())
                .and_then(|(panorama, id)| panorama.hot_areas.get(id));
            if let Some(area) = hovered {
                ui.label("|");
                ui.label(egui::RichText::new(&area.name).color(egui::Color32::from_rgb(255, 210, 60)));
            }

            if settings.show_fps {
                ui.label("|");
                ui.label(egui::RichText::new(format!("FPS: {fps:.1}")).color(egui::Color32::GREEN));
            }
        });
    });

    paint_scene_overlays(ctx, scene, projection, settings.show_hot_areas);
}
