use crate::core::detector::FaceBox;
use image::DynamicImage;
use std::io::{self, Write};
use crossterm::{
    cursor,
    event::{self, Event, KeyCode, KeyEvent},
    terminal::{self, ClearType},
};

const ASCII_RAMP: &[char] = &[' ', '.', '·', ':', ';', '+', '=', 'x', 'X', '#', '@'];
const DEFAULT_WIDTH: usize = 80;
const DEFAULT_HEIGHT: usize = 30;
const BAR_CELLS: usize = 20;

/// What to draw on top of the camera image.
pub struct Overlay<'a> {
    pub face: Option<&'a FaceBox>,
    pub instruction: &'a str,
    pub percent: u8,
    pub captured: usize,
    pub total: usize,
}

pub struct AsciiRenderer {
    width: usize,
    height: usize,
}

impl AsciiRenderer {
    pub fn new(width: Option<usize>, height: Option<usize>) -> Self {
        let (term_width, term_height) = terminal::size()
            .map(|(w, h)| (w as usize, h as usize))
            .unwrap_or((DEFAULT_WIDTH, DEFAULT_HEIGHT));

        // Half resolution keeps redraws cheap.
        Self {
            width: width.unwrap_or((term_width / 2).min(DEFAULT_WIDTH / 2)).max(BAR_CELLS + 8),
            height: height.unwrap_or((term_height.saturating_sub(5) / 2).min(DEFAULT_HEIGHT / 2)).max(4),
        }
    }

    pub fn height(&self) -> usize {
        self.height
    }

    /// Image, face box, instruction on the first row and the window progress
    /// bar plus captured count on the last.
    pub fn render(&self, image: &DynamicImage, overlay: &Overlay<'_>) -> String {
        let mut grid = self.image_to_ascii(image);

        if let Some(face) = overlay.face {
            self.draw_face_box(&mut grid, face, image.width() as f32, image.height() as f32);
        }

        self.overlay_text(&mut grid, overlay.instruction, self.width / 2, 0);
        let status = format!(
            "{} {}/{}",
            progress_bar(overlay.percent),
            overlay.captured,
            overlay.total
        );
        self.overlay_text(&mut grid, &status, self.width / 2, self.height - 1);

        self.grid_to_string(&grid)
    }

    fn image_to_ascii(&self, image: &DynamicImage) -> Vec<Vec<char>> {
        let mut grid = vec![vec![' '; self.width]; self.height];
        let gray = image.to_luma8();
        let (img_width, img_height) = gray.dimensions();

        for (term_y, row) in grid.iter_mut().enumerate() {
            for (term_x, cell) in row.iter_mut().enumerate() {
                let img_x = (term_x as f32 / self.width as f32 * img_width as f32) as u32;
                let img_y = (term_y as f32 / self.height as f32 * img_height as f32) as u32;
                if img_x < img_width && img_y < img_height {
                    let brightness = gray.get_pixel(img_x, img_y)[0] as usize;
                    *cell = ASCII_RAMP[brightness * (ASCII_RAMP.len() - 1) / 255];
                }
            }
        }

        grid
    }

    fn overlay_text(&self, grid: &mut [Vec<char>], text: &str, center_x: usize, y: usize) {
        if y >= self.height {
            return;
        }
        let start_x = center_x.saturating_sub(text.chars().count() / 2);
        for (i, ch) in text.chars().enumerate() {
            let x = start_x + i;
            if x < self.width {
                grid[y][x] = ch;
            }
        }
    }

    fn draw_face_box(&self, grid: &mut [Vec<char>], face: &FaceBox, img_width: f32, img_height: f32) {
        let scale_x = |v: f32| (((v / img_width) * self.width as f32) as usize).min(self.width - 1);
        let scale_y = |v: f32| (((v / img_height) * self.height as f32) as usize).min(self.height - 1);
        let (x1, x2) = (scale_x(face.x1), scale_x(face.x2));
        let (y1, y2) = (scale_y(face.y1), scale_y(face.y2));
        if x2 <= x1 || y2 <= y1 {
            return;
        }

        for x in x1 + 1..x2 {
            grid[y1][x] = '─';
            grid[y2][x] = '─';
        }
        for row in grid.iter_mut().take(y2).skip(y1 + 1) {
            row[x1] = '│';
            row[x2] = '│';
        }
        grid[y1][x1] = '┌';
        grid[y1][x2] = '┐';
        grid[y2][x1] = '└';
        grid[y2][x2] = '┘';
    }

    fn grid_to_string(&self, grid: &[Vec<char>]) -> String {
        grid.iter()
            .map(|row| row.iter().take(self.width).collect::<String>())
            .collect::<Vec<_>>()
            .join("\r\n")
    }
}

/// `[#########...........]` style bar for 0..=100.
pub fn progress_bar(percent: u8) -> String {
    let filled = (percent.min(100) as usize * BAR_CELLS) / 100;
    format!("[{}{}]", "#".repeat(filled), ".".repeat(BAR_CELLS - filled))
}

/// Redraws a fixed-height block in place.
pub struct PreviewArea {
    height: usize,
}

impl PreviewArea {
    pub fn new() -> Self {
        Self { height: 0 }
    }

    pub fn draw(&mut self, block: &str) -> io::Result<()> {
        let mut out = io::stdout();
        if self.height > 0 {
            crossterm::execute!(out, cursor::MoveUp(self.height.saturating_sub(1) as u16), cursor::MoveToColumn(0))?;
        }
        let lines: Vec<&str> = block.split("\r\n").collect();
        for (i, line) in lines.iter().enumerate() {
            crossterm::execute!(out, terminal::Clear(ClearType::CurrentLine))?;
            if i + 1 < lines.len() {
                write!(out, "{}\r\n", line)?;
            } else {
                write!(out, "{}", line)?;
            }
        }
        out.flush()?;
        self.height = lines.len();
        Ok(())
    }
}

impl Default for PreviewArea {
    fn default() -> Self {
        Self::new()
    }
}

pub fn clear_screen() -> io::Result<()> {
    crossterm::execute!(io::stdout(), terminal::Clear(ClearType::All), cursor::MoveTo(0, 0))?;
    io::stdout().flush()
}

pub fn check_for_escape() -> io::Result<bool> {
    if event::poll(std::time::Duration::from_millis(0))? {
        if let Event::Key(KeyEvent { code, .. }) = event::read()? {
            return Ok(code == KeyCode::Esc);
        }
    }
    Ok(false)
}
