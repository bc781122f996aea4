pub mod interactive;
pub mod render;

use tokio::sync::broadcast;

use crate::core::events::PanelEvent;
use render::Renderer;

pub use interactive::{confirm_terminate, run_dashboard, ControlCommand};

/// Prints every event already queued on `rx`. One-shot commands call this
/// after their operation returns.
pub fn flush_events(rx: &mut broadcast::Receiver<PanelEvent>) -> usize {
    let mut printed = 0;
    loop {
        match rx.try_recv() {
            Ok(event) => {
                Renderer::print(&event);
                printed += 1;
            }
            Err(broadcast::error::TryRecvError::Lagged(_)) => continue,
            Err(_) => break,
        }
    }
    printed
}

/// File name used when saving command output.
pub fn output_file_name(namespace: &str) -> String {
    format!("{}-output.log", namespace.trim())
}
