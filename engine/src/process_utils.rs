//! Spawning helpers for the sandbox worker process.
//!
//! On Windows a console child opens its own command prompt window unless told
//! not to. Graph rendering spawns one worker per figure, so every spawn goes
//! through [`HideConsoleWindow`].

/// Windows creation flag to prevent console window creation
#[cfg(windows)]
const CREATE_NO_WINDOW: u32 = 0x08000000;

/// Keep spawned workers from opening a console window on Windows.
///
/// On other platforms, this is a no-op.
pub trait HideConsoleWindow {
    fn hide_console_window(&mut self) -> &mut Self;
}

#[cfg(windows)]
impl HideConsoleWindow for tokio::process::Command {
    fn hide_console_window(&mut self) -> &mut Self {
        self.creation_flags(CREATE_NO_WINDOW)
    }
}

#[cfg(not(windows))]
impl HideConsoleWindow for tokio::process::Command {
    fn hide_console_window(&mut self) -> &mut Self {
        self
    }
}
