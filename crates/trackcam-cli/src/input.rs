use crate::shutdown::ShutdownSignal;
use crossterm::event::{self, Event, KeyCode, KeyEvent, KeyEventKind, KeyModifiers};
use std::sync::Arc;
use std::sync::mpsc::Sender;
use std::thread::{self, JoinHandle};
use std::time::Duration;
use tracing::debug;
use trackcam::CameraType;

/// Controller command bound to a key.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum KeyCommand {
    Quit,
    /// Try the next known address for the active camera
    NextAddress,
    SelectCamera(CameraType),
    Rescan,
}

pub const KEY_HELP: &str =
    "Keys: n = next address, c/e/i = cab/external/interior camera, r = rescan, q/Esc = quit";

/// Spawn a thread that turns key presses into [`KeyCommand`]s.
///
/// Quit keys trigger `shutdown` directly; everything else goes to `tx`.
pub fn spawn_keyboard_monitor(
    shutdown: Arc<ShutdownSignal>,
    tx: Sender<KeyCommand>,
) -> JoinHandle<()> {
    thread::spawn(move || {
        debug!("Keyboard monitor started");

        while !shutdown.is_shutdown() {
            if !event::poll(Duration::from_millis(100)).unwrap_or(false) {
                continue;
            }
            let Ok(Event::Key(key_event)) = event::read() else {
                continue;
            };
            match key_command(&key_event) {
                Some(KeyCommand::Quit) => {
                    debug!("Shutdown key pressed: {:?}", key_event.code);
                    shutdown.trigger();
                    break;
                }
                Some(command) => {
                    if tx.send(command).is_err() {
                        break;
                    }
                }
                None => {}
            }
        }

        debug!("Keyboard monitor stopped");
    })
}

fn key_command(event: &KeyEvent) -> Option<KeyCommand> {
    if event.kind == KeyEventKind::Release {
        return None;
    }
    match event.code {
        KeyCode::Esc => Some(KeyCommand::Quit),
        KeyCode::Char('c') if event.modifiers.contains(KeyModifiers::CONTROL) => {
            Some(KeyCommand::Quit)
        }
        KeyCode::Char(c) => match c.to_ascii_lowercase() {
            'q' => Some(KeyCommand::Quit),
            'n' => Some(KeyCommand::NextAddress),
            'r' => Some(KeyCommand::Rescan),
            'c' => Some(KeyCommand::SelectCamera(CameraType::Cab)),
            'e' => Some(KeyCommand::SelectCamera(CameraType::External)),
            'i' => Some(KeyCommand::SelectCamera(CameraType::Interior)),
            _ => None,
        },
        _ => None,
    }
}
