use anyhow::{bail, Context};
use canvaskit::backend::{BackendKind, InitStatus};
use canvaskit::native::headless::HeadlessEngine;
use canvaskit::paint::{Gradient, LinearGradient, Paint, Scene, Shape};
use canvaskit::render::{PresentSink, RgbaImage};
use canvaskit::{CanvasKit, KitConfig, Platforms};

struct FrameLog;

impl PresentSink for FrameLog {
    fn submit_frame(&mut self, frame_id: u64, frame: &RgbaImage) {
        log::info!("frame {frame_id}: {}x{}", frame.width, frame.height);
    }
}

fn main() -> anyhow::Result<()> {
    env_logger::init();

    let out = std::env::args().nth(1).unwrap_or_else(|| "headless_software.png".to_string());

    let config = KitConfig::builder().max_surface_dim(1024).build()?;
    let kit = CanvasKit::new(Some(config), Box::new(HeadlessEngine::new()), Platforms::none())?;

    let mut session = kit.initialize_backend(BackendKind::Software);
    if session.poll() != InitStatus::Ready {
        bail!("software backend did not come up: {:?}", session.status());
    }

    let mut surface = kit.create_surface(&session, "", 256, 160)?;
    surface.set_present_sink(Box::new(FrameLog));

    let background = Shape::new(&kit)?;
    background
        .append_rect(0.0, 0.0, 256.0, 160.0, 0.0, 0.0)?
        .set_fill_color(24, 24, 32, 255)?;

    let sky = LinearGradient::new(&kit, 0.0, 0.0, 256.0, 0.0)?;
    sky.set_color_stops(&[(0.0, [255, 94, 58, 255]), (1.0, [88, 86, 214, 255])])?;

    let banner = Shape::new(&kit)?;
    banner.append_rect(16.0, 16.0, 224.0, 48.0, 12.0, 12.0)?.set_fill_gradient(&sky)?;

    let dots = Scene::new(&kit)?;
    for i in 0..5 {
        let dot = Shape::new(&kit)?;
        dot.append_circle(32.0 + i as f32 * 48.0, 112.0, 16.0, 16.0)?
            .set_fill_color(240, 240, 240, 255)?;
        dots.add(&dot)?;
    }
    dots.set_opacity(200)?;

    surface.add_all(&[&background, &banner, &dots])?;
    surface.present()?;

    let frame = surface.last_frame().context("software present produced no frame")?;
    std::fs::write(&out, frame.to_png()?).with_context(|| format!("writing {out}"))?;
    println!("wrote {out} ({:?})", kit.lifetime_stats());

    surface.destroy()?;
    Ok(())
}
