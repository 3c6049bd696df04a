use crate::model::FinalResult;
use crate::storage;
use anyhow::Result;
use std::sync::mpsc as std_mpsc;
use std::sync::OnceLock;
use std::time::Duration;

use super::state::UiState;

// One long-lived thread owns all clipboard access; started on first copy.
static CLIPBOARD_TX: OnceLock<std_mpsc::Sender<String>> = OnceLock::new();

/// Save the result under the data directory and surface the outcome in the
/// status line.
pub fn save_result(result: &FinalResult, state: &mut UiState) {
    match storage::save_run(result) {
        Ok(path) => {
            state.info = format!("Saved: {}", path.display());
        }
        Err(e) => {
            state.info = format!("Save failed: {e:#}");
        }
    }
}

/// Lazily start the clipboard thread and hand back its sender. Each copied
/// string keeps its clipboard instance alive for a couple of seconds; on
/// Linux the selection is lost as soon as the owning instance drops.
fn clipboard_tx() -> Result<&'static std_mpsc::Sender<String>> {
    CLIPBOARD_TX.get_or_init(|| {
        let (tx, rx) = std_mpsc::channel::<String>();

        std::thread::spawn(move || {
            use arboard::Clipboard;

            for text in rx {
                if let Ok(mut clipboard) = Clipboard::new() {
                    if clipboard.set_text(&text).is_ok() {
                        std::thread::sleep(Duration::from_secs(2));
                    }
                }
            }
        });

        tx
    });

    CLIPBOARD_TX
        .get()
        .ok_or_else(|| anyhow::anyhow!("clipboard thread failed to start"))
}

/// Queue text for the clipboard thread and return immediately; the UI loop
/// must not wait out the hold delay.
pub fn copy_to_clipboard(text: &str) -> Result<()> {
    clipboard_tx()?
        .send(text.to_string())
        .map_err(|_| anyhow::anyhow!("clipboard thread is gone"))?;
    Ok(())
}
