//! Character display for the customer screen
//!
//! The UI thinks in a 16x2 character LCD. [`TftCharDisplay`] renders that
//! grid onto the ST7735 TFT with a 10x20 monospace font; anything else that
//! implements [`CharDisplay`] can stand in for it.

use core::fmt::{self, Write};

use embedded_graphics::mono_font::ascii::FONT_10X20;
use embedded_graphics::mono_font::{MonoTextStyle, MonoTextStyleBuilder};
use embedded_graphics::pixelcolor::Rgb565;
use embedded_graphics::prelude::*;
use embedded_graphics::text::{Baseline, Text};
use heapless::String;

use crate::config::{DISPLAY_HEIGHT, LCD_COLUMNS, LCD_ROWS};

/// Cursor-addressed character output
pub trait CharDisplay {
    fn set_cursor(&mut self, col: u8, row: u8);
    fn write_str(&mut self, text: &str);

    /// Blank every row
    fn clear(&mut self) {
        for row in 0..LCD_ROWS as u8 {
            show_line(self, row, format_args!(""));
        }
    }
}

// ===================================================================
// Line Rendering
// ===================================================================

/// One display row, silently cut at the screen width
#[derive(Default)]
pub struct Line(String<LCD_COLUMNS>);

impl Line {
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Write for Line {
    fn write_str(&mut self, s: &str) -> fmt::Result {
        for c in s.chars() {
            if self.0.push(c).is_err() {
                break;
            }
        }
        Ok(())
    }
}

/// Format `args` into `row`, padded with blanks to the full width
pub fn show_line<D: CharDisplay + ?Sized>(display: &mut D, row: u8, args: fmt::Arguments<'_>) {
    let mut line = Line::default();
    let _ = line.write_fmt(args);
    while line.0.push(' ').is_ok() {}

    display.set_cursor(0, row);
    display.write_str(line.as_str());
}

/// Replace both rows
pub fn show_screen<D: CharDisplay + ?Sized>(display: &mut D, top: fmt::Arguments<'_>, bottom: fmt::Arguments<'_>) {
    show_line(display, 0, top);
    show_line(display, 1, bottom);
}

// ===================================================================
// TFT Character Grid
// ===================================================================

const CELL_WIDTH: i32 = 10;
const CELL_HEIGHT: i32 = 20;
const ROW_PITCH: i32 = 24;
const TOP_MARGIN: i32 = (DISPLAY_HEIGHT as i32 - ROW_PITCH * LCD_ROWS as i32) / 2;

/// 16x2 character grid drawn on a colour TFT
pub struct TftCharDisplay<DT> {
    target: DT,
    style: MonoTextStyle<'static, Rgb565>,
    col: u8,
    row: u8,
}

impl<DT> TftCharDisplay<DT>
where
    DT: DrawTarget<Color = Rgb565>,
{
    pub fn new(mut target: DT) -> Self {
        if target.clear(Rgb565::BLACK).is_err() {
            warn!("Display clear failed");
        }

        let style = MonoTextStyleBuilder::new()
            .font(&FONT_10X20)
            .text_color(Rgb565::WHITE)
            .background_color(Rgb565::BLACK)
            .build();

        Self {
            target,
            style,
            col: 0,
            row: 0,
        }
    }

    fn origin(&self) -> Point {
        Point::new(
            i32::from(self.col) * CELL_WIDTH,
            TOP_MARGIN + i32::from(self.row) * ROW_PITCH,
        )
    }

    pub fn release(self) -> DT {
        self.target
    }
}

impl<DT> CharDisplay for TftCharDisplay<DT>
where
    DT: DrawTarget<Color = Rgb565>,
{
    fn set_cursor(&mut self, col: u8, row: u8) {
        self.col = col.min(LCD_COLUMNS as u8);
        self.row = row.min(LCD_ROWS as u8 - 1);
    }

    fn write_str(&mut self, text: &str) {
        let room = LCD_COLUMNS.saturating_sub(usize::from(self.col));
        let end = text.char_indices().nth(room).map_or(text.len(), |(i, _)| i);
        let visible = &text[..end];
        if visible.is_empty() {
            return;
        }

        let text = Text::with_baseline(visible, self.origin(), self.style, Baseline::Top);
        if text.draw(&mut self.target).is_err() {
            warn!("Display write failed");
        }
        self.col += visible.chars().count() as u8;
    }
}

// ===================================================================
// Test Support
// ===================================================================
