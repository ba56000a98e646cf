//! The viewer panel: size controls, progress bar, elapsed time, and the
//! rendered image itself.

use std::time::{Duration, Instant};

use engine::ProgressState;

const PRESETS: &[(&str, u32, u32)] = &[
    ("800 x 600", 800, 600),
    ("1024 x 768", 1024, 768),
    ("1280 x 720", 1280, 720),
    ("1600 x 900", 1600, 900),
    ("1920 x 1080", 1920, 1080),
];

const MIN_DIM: u32 = 16;
const MAX_DIM: u32 = 4096;

#[derive(Default)]
pub(crate) struct PanelRequests {
    pub resize: Option<(u32, u32)>,
}

pub(crate) struct ViewerPanel {
    width_field: u32,
    height_field: u32,
    resizable: bool,
    two_pass: bool,

    started: Instant,
    elapsed: Option<Duration>,
}

impl ViewerPanel {
    pub fn new((width, height): (u32, u32)) -> Self {
        ViewerPanel {
            width_field: width,
            height_field: height,
            resizable: false,
            two_pass: false,
            started: Instant::now(),
            elapsed: None,
        }
    }

    /// Accumulation restarted at the given render size; restart the timer
    /// and sync the spinners.
    pub fn on_reset(&mut self, (width, height): (u32, u32)) {
        self.width_field = width;
        self.height_field = height;
        self.started = Instant::now();
        self.elapsed = None;
    }

    /// Whether the frame should also be presented behind the GUI windows.
    pub fn two_pass(&self) -> bool {
        self.two_pass
    }

    pub fn draw(
        &mut self,
        ui: &imgui::Ui,
        progress: &ProgressState,
        texture_id: imgui::TextureId,
        render_size: (u32, u32),
    ) -> PanelRequests {
        let mut requests = PanelRequests::default();

        ui.window("Render")
            .size([420.0, 480.0], imgui::Condition::FirstUseEver)
            .build(|| {
                let mut changed = false;
                changed |= ui.input_scalar("Width", &mut self.width_field).build();
                changed |= ui.input_scalar("Height", &mut self.height_field).build();

                let active_preset = PRESETS
                    .iter()
                    .find(|(_, w, h)| (*w, *h) == (self.width_field, self.height_field))
                    .map_or("custom", |(label, _, _)| label);
                if let Some(combo) = ui.begin_combo("Preset", active_preset) {
                    for (label, w, h) in PRESETS {
                        if ui.selectable(label) {
                            self.width_field = *w;
                            self.height_field = *h;
                            changed = true;
                        }
                    }
                    combo.end();
                }

                self.width_field = self.width_field.clamp(MIN_DIM, MAX_DIM);
                self.height_field = self.height_field.clamp(MIN_DIM, MAX_DIM);
                if changed && (self.width_field, self.height_field) != render_size {
                    requests.resize = Some((self.width_field, self.height_field));
                }

                ui.checkbox("Fit image to panel", &mut self.resizable);
                ui.checkbox("Draw behind windows", &mut self.two_pass);
                ui.separator();

                if progress.complete() && self.elapsed.is_none() {
                    self.elapsed = Some(self.started.elapsed());
                }

                let overlay = format!(
                    "{} / {} samples",
                    progress.sample_count(),
                    progress.max_samples()
                );
                imgui::ProgressBar::new(progress.ratio() / 100.0)
                    .size([-1.0, 0.0])
                    .overlay_text(&overlay)
                    .build(ui);

                match self.elapsed {
                    Some(elapsed) => ui.text(format!("rendered in {:.1} s", elapsed.as_secs_f32())),
                    None => ui.text(format!(
                        "rendering... {:.1} s",
                        self.started.elapsed().as_secs_f32()
                    )),
                }
                ui.separator();

                if !progress.ready() {
                    ui.text_disabled("accumulating first samples...");
                }

                let avail = ui.content_region_avail();
                let image_size = if self.resizable {
                    [avail[0].max(1.0), avail[1].max(1.0)]
                } else {
                    fit_to_region(avail, render_size)
                };
                imgui::Image::new(texture_id, image_size).build(ui);

                if self.resizable {
                    let panel_px = (image_size[0] as u32, image_size[1] as u32);
                    if panel_px != render_size
                        && panel_px.0 >= MIN_DIM
                        && panel_px.1 >= MIN_DIM
                        && requests.resize.is_none()
                    {
                        requests.resize = Some(panel_px);
                    }
                }
            });

        requests
    }
}

/// Largest size with the render target's aspect ratio that fits `avail`.
fn fit_to_region(avail: [f32; 2], (width, height): (u32, u32)) -> [f32; 2] {
    if width == 0 || height == 0 || avail[0] < 1.0 || avail[1] < 1.0 {
        return [1.0, 1.0];
    }
    let aspect = width as f32 / height as f32;
    let mut w = avail[0];
    let mut h = w / aspect;
    if h > avail[1] {
        h = avail[1];
        w = h * aspect;
    }
    [w.max(1.0), h.max(1.0)]
}

#[cfg(test)]
mod tests {
    use super::fit_to_region;

    #[test]
    fn fit_is_width_bound_in_tall_regions() {
        let size = fit_to_region([400.0, 1000.0], (800, 600));
        assert_eq!(size, [400.0, 300.0]);
    }

    #[test]
    fn fit_is_height_bound_in_wide_regions() {
        let size = fit_to_region([1000.0, 300.0], (800, 600));
        assert_eq!(size, [400.0, 300.0]);
    }

    #[test]
    fn fit_survives_degenerate_regions() {
        assert_eq!(fit_to_region([0.0, 0.0], (800, 600)), [1.0, 1.0]);
        assert_eq!(fit_to_region([400.0, 300.0], (0, 0)), [1.0, 1.0]);
    }
}
