//! VGA text-mode console. This is the `sysputs` / keyboard-echo output
//! path; kernel log lines go to the serial port instead.

use core::fmt::{self, Write};
use core::ptr;

use spin::Mutex;

const BUFFER_HEIGHT: usize = 25;
const BUFFER_WIDTH: usize = 80;
const VGA_BUFFER_ADDR: usize = 0xB8000;

#[allow(dead_code)]
#[derive(Clone, Copy)]
#[repr(u8)]
pub enum Color {
    Black = 0x0,
    Blue = 0x1,
    Green = 0x2,
    Cyan = 0x3,
    Red = 0x4,
    Magenta = 0x5,
    Brown = 0x6,
    LightGray = 0x7,
    DarkGray = 0x8,
    LightBlue = 0x9,
    LightGreen = 0xA,
    LightCyan = 0xB,
    LightRed = 0xC,
    Pink = 0xD,
    Yellow = 0xE,
    White = 0xF,
}

#[derive(Clone, Copy)]
#[repr(transparent)]
struct ColorCode(u8);

impl ColorCode {
    const fn new(foreground: Color, background: Color) -> Self {
        Self((background as u8) << 4 | (foreground as u8))
    }
}

pub struct Writer {
    row: usize,
    column: usize,
    color_code: ColorCode,
    buffer: *mut u16,
}

// The writer is only ever used behind the mutex below.
unsafe impl Send for Writer {}

impl Writer {
    const fn new() -> Self {
        Self {
            row: 0,
            column: 0,
            color_code: ColorCode::new(Color::LightGray, Color::Black),
            buffer: VGA_BUFFER_ADDR as *mut u16,
        }
    }

    fn cell(&self, row: usize, col: usize) -> *mut u16 {
        unsafe { self.buffer.add(row * BUFFER_WIDTH + col) }
    }

    fn put(&mut self, row: usize, col: usize, byte: u8) {
        let value = ((self.color_code.0 as u16) << 8) | byte as u16;
        unsafe { ptr::write_volatile(self.cell(row, col), value) };
    }

    pub fn write_byte(&mut self, byte: u8) {
        match byte {
            b'\n' => self.new_line(),
            0x08 => self.backspace(),
            byte => {
                if self.column >= BUFFER_WIDTH {
                    self.new_line();
                }
                self.put(self.row, self.column, byte);
                self.column += 1;
            }
        }
    }

    fn backspace(&mut self) {
        if self.column > 0 {
            self.column -= 1;
            self.put(self.row, self.column, b' ');
        }
    }

    fn new_line(&mut self) {
        self.column = 0;
        if self.row + 1 < BUFFER_HEIGHT {
            self.row += 1;
            return;
        }
        for row in 1..BUFFER_HEIGHT {
            for col in 0..BUFFER_WIDTH {
                let value = unsafe { ptr::read_volatile(self.cell(row, col)) };
                unsafe { ptr::write_volatile(self.cell(row - 1, col), value) };
            }
        }
        self.clear_row(BUFFER_HEIGHT - 1);
    }

    fn clear_row(&mut self, row: usize) {
        for col in 0..BUFFER_WIDTH {
            self.put(row, col, b' ');
        }
    }

    pub fn clear(&mut self) {
        for row in 0..BUFFER_HEIGHT {
            self.clear_row(row);
        }
        self.row = 0;
        self.column = 0;
    }
}

impl Write for Writer {
    fn write_str(&mut self, s: &str) -> fmt::Result {
        for byte in s.bytes() {
            self.write_byte(byte);
        }
        Ok(())
    }
}

static WRITER: Mutex<Writer> = Mutex::new(Writer::new());

pub fn init() {
    WRITER.lock().clear();
}

pub(crate) fn _print(args: fmt::Arguments<'_>) {
    WRITER.lock().write_fmt(args).ok();
}
