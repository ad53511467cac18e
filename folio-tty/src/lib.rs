use std::io::{self, Write};

use crossterm::{
    cursor,
    event::{Event, KeyCode, KeyEvent, KeyModifiers, MouseButton, MouseEvent, MouseEventKind},
    style::{Attribute, Print, SetAttribute},
    terminal::{Clear, ClearType},
    QueueableCommand,
};
use folio_core::{ActionIntent, Command};

mod layout;

pub use layout::{terminal_selection_settings, SelectionMenu, TextLayout};

#[derive(Debug, Clone, PartialEq)]
pub enum UiEvent {
    /// A viewer command to apply `count` times.
    Command { command: Command, count: usize },
    ScrollBy { rows: isize },
    PointerDown { column: u16, row: u16 },
    PointerDrag { column: u16, row: u16 },
    PointerUp { column: u16, row: u16 },
    Intent(ActionIntent),
    Dismiss,
    Resize { columns: u16, rows: u16 },
    Quit,
    None,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum InputMode {
    #[default]
    Normal,
    /// A selection is live and its action menu is showing.
    Selection,
}

#[derive(Debug, Default)]
pub struct EventMapper {
    pending_count: Option<usize>,
    pending_digits: String,
    mode: InputMode,
}

impl EventMapper {
    pub const WHEEL_ROWS: isize = 3;

    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_mode(&mut self, mode: InputMode) {
        if self.mode != mode {
            self.reset_count();
            self.mode = mode;
        }
    }

    pub fn mode(&self) -> InputMode {
        self.mode
    }

    pub fn map_event(&mut self, event: Event) -> UiEvent {
        match event {
            Event::Key(key) => match self.mode {
                InputMode::Normal => self.map_key_normal(key),
                InputMode::Selection => self.map_key_selection(key),
            },
            Event::Mouse(mouse) => self.map_mouse(mouse),
            Event::Resize(columns, rows) => UiEvent::Resize { columns, rows },
            _ => UiEvent::None,
        }
    }

    fn map_key_selection(&mut self, key: KeyEvent) -> UiEvent {
        match (key.code, key.modifiers) {
            (KeyCode::Char(c @ '1'..='3'), KeyModifiers::NONE) => {
                let index = c as usize - '1' as usize;
                UiEvent::Intent(ActionIntent::ALL[index])
            }
            (KeyCode::Esc, _) => UiEvent::Dismiss,
            _ => self.map_key_normal(key),
        }
    }

    fn map_key_normal(&mut self, key: KeyEvent) -> UiEvent {
        let KeyEvent {
            code, modifiers, ..
        } = key;
        match (code, modifiers) {
            (KeyCode::Char('c'), modifiers) if modifiers.contains(KeyModifiers::CONTROL) => {
                UiEvent::Quit
            }
            (KeyCode::Char(c), KeyModifiers::NONE) if c.is_ascii_digit() => {
                if let Some(digit) = c.to_digit(10) {
                    self.push_digit(digit as usize);
                }
                UiEvent::None
            }
            (KeyCode::Char('j'), KeyModifiers::NONE) | (KeyCode::Down, KeyModifiers::NONE) => {
                let rows = self.take_count() as isize;
                UiEvent::ScrollBy { rows }
            }
            (KeyCode::Char('k'), KeyModifiers::NONE) | (KeyCode::Up, KeyModifiers::NONE) => {
                let rows = self.take_count() as isize;
                UiEvent::ScrollBy { rows: -rows }
            }
            (KeyCode::Char('J'), _) | (KeyCode::PageDown, _) | (KeyCode::Char(' '), _) => {
                self.command(Command::NextPage)
            }
            (KeyCode::Char('K'), _) | (KeyCode::PageUp, _) => self.command(Command::PrevPage),
            (KeyCode::Char('g'), KeyModifiers::NONE) | (KeyCode::Home, _) => {
                let page = self.take_count();
                UiEvent::Command {
                    command: Command::GotoPage { page },
                    count: 1,
                }
            }
            (KeyCode::Char('G'), _) | (KeyCode::End, _) => {
                let page = self.pending_count.take().unwrap_or(usize::MAX);
                self.reset_count();
                UiEvent::Command {
                    command: Command::GotoPage { page },
                    count: 1,
                }
            }
            (KeyCode::Char('+'), _) => self.command(Command::ZoomIn),
            (KeyCode::Char('-'), _) => self.command(Command::ZoomOut),
            (KeyCode::Char('='), _) => {
                self.reset_count();
                UiEvent::Command {
                    command: Command::SetZoom { zoom: 1.0 },
                    count: 1,
                }
            }
            (KeyCode::Esc, _) => {
                self.reset_count();
                UiEvent::Dismiss
            }
            (KeyCode::Char('q'), _) => {
                self.reset_count();
                UiEvent::Quit
            }
            _ => {
                self.reset_count();
                UiEvent::None
            }
        }
    }

    fn map_mouse(&mut self, mouse: MouseEvent) -> UiEvent {
        let MouseEvent {
            kind, column, row, ..
        } = mouse;
        match kind {
            MouseEventKind::Down(MouseButton::Left) => UiEvent::PointerDown { column, row },
            MouseEventKind::Drag(MouseButton::Left) => UiEvent::PointerDrag { column, row },
            MouseEventKind::Up(MouseButton::Left) => UiEvent::PointerUp { column, row },
            MouseEventKind::ScrollDown => UiEvent::ScrollBy {
                rows: Self::WHEEL_ROWS,
            },
            MouseEventKind::ScrollUp => UiEvent::ScrollBy {
                rows: -Self::WHEEL_ROWS,
            },
            _ => UiEvent::None,
        }
    }

    fn command(&mut self, command: Command) -> UiEvent {
        let count = self.take_count();
        UiEvent::Command { command, count }
    }

    fn push_digit(&mut self, digit: usize) {
        let current = self.pending_count.unwrap_or(0);
        let next = current.saturating_mul(10).saturating_add(digit);
        self.pending_count = Some(next);
        if let Some(c) = char::from_digit(digit as u32, 10) {
            self.pending_digits.push(c);
        }
    }

    fn take_count(&mut self) -> usize {
        let count = self
            .pending_count
            .take()
            .filter(|&count| count > 0)
            .unwrap_or(1);
        self.pending_digits.clear();
        count
    }

    fn reset_count(&mut self) {
        self.pending_count = None;
        self.pending_digits.clear();
    }

    pub fn pending_input(&self) -> Option<String> {
        if self.pending_digits.is_empty() {
            None
        } else {
            Some(self.pending_digits.clone())
        }
    }
}

/// Writes `label` on `row`, padded or cut to `width` columns.
pub fn write_status_line<W: Write>(
    writer: &mut W,
    row: u16,
    width: u16,
    label: &str,
) -> io::Result<()> {
    let width = usize::from(width);
    let mut line: String = label.chars().take(width).collect();
    let used = line.chars().count();
    line.extend(std::iter::repeat(' ').take(width - used));
    writer
        .queue(cursor::MoveTo(0, row))?
        .queue(Clear(ClearType::CurrentLine))?
        .queue(SetAttribute(Attribute::Reverse))?
        .queue(Print(line))?
        .queue(SetAttribute(Attribute::Reset))?;
    writer.flush()
}
