use photo_organizer::CancellationToken;
use std::process;
use tracing::{error, warn};

/// Exit status after a second Ctrl-C.
const INTERRUPTED_EXIT_CODE: i32 = 130;

/// What a Ctrl-C should do given the state of `token`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Interrupt {
    /// First press: stop after the file in flight.
    Cancel,
    /// Already cancelled and still running: give up.
    Exit,
}

pub fn on_interrupt(token: &CancellationToken) -> Interrupt {
    if token.is_cancelled() {
        Interrupt::Exit
    } else {
        token.cancel();
        Interrupt::Cancel
    }
}

/// Token cancelled by the first Ctrl-C. A second Ctrl-C exits at once.
pub fn interrupt_token() -> CancellationToken {
    let token = CancellationToken::new();
    let handler_token = token.clone();
    if let Err(e) = ctrlc::set_handler(move || match on_interrupt(&handler_token) {
        Interrupt::Cancel => {
            warn!("Interrupted, finishing the current file (Ctrl-C again to abort)")
        }
        Interrupt::Exit => {
            error!("Aborted");
            process::exit(INTERRUPTED_EXIT_CODE);
        }
    }) {
        warn!("Could not install Ctrl-C handler: {}", e);
    }
    token
}
