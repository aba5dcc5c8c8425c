//! Sequential block scans with progress reporting and cooperative cancellation.

use crate::error::TableError;
use crate::read_buffer::ReadOnlyBuffer;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

/// Receives progress for long-running scans.
pub trait ProgressNotification: Send + Sync {
    fn on_start(&self, _message: Option<&str>) {}

    /// Fraction of blocks processed so far, in `0.0..=1.0`.
    fn on_progress(&self, _progress: f32) {}

    /// `cancelled` is true when the scan stopped early.
    fn on_complete(&self, _cancelled: bool) {}
}

/// Shared flag that asks running scans to stop at the next block boundary.
#[derive(Clone, Debug, Default)]
pub struct CancellationToken {
    cancelled: Arc<AtomicBool>,
}

impl CancellationToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.cancelled.store(true, Ordering::Release);
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::Acquire)
    }
}

#[derive(Clone, Copy, Default)]
pub struct ScanOptions<'a> {
    pub notify: Option<&'a dyn ProgressNotification>,
    pub message: Option<&'a str>,
    pub cancel: Option<&'a CancellationToken>,
}

impl<'a> ScanOptions<'a> {
    pub fn with_notify(mut self, notify: &'a dyn ProgressNotification) -> Self {
        self.notify = Some(notify);
        self
    }

    pub fn with_message(mut self, message: &'a str) -> Self {
        self.message = Some(message);
        self
    }

    pub fn with_cancel(mut self, cancel: &'a CancellationToken) -> Self {
        self.cancel = Some(cancel);
        self
    }

    fn is_cancelled(&self) -> bool {
        self.cancel.is_some_and(CancellationToken::is_cancelled)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScanStatus {
    Completed,
    Cancelled,
}

/// Fetch every block of `buffer` in index order and hand it to `callback`.
///
/// Block `i + 1` is not fetched until the callback for block `i` has returned.
/// Cancellation is checked before each fetch; a cancelled scan returns
/// [`ScanStatus::Cancelled`] and leaves whatever the callback accumulated.
pub async fn for_each_block<T, B, F, E>(
    buffer: &mut B,
    mut callback: F,
    options: ScanOptions<'_>,
) -> Result<ScanStatus, E>
where
    B: ReadOnlyBuffer<T> + ?Sized,
    F: FnMut(&[T]) -> Result<(), E>,
    E: From<TableError>,
{
    let block_count = buffer.block_count();
    if let Some(notify) = options.notify {
        notify.on_start(options.message);
    }

    for index in 0..block_count {
        if options.is_cancelled() {
            log::debug!(
                "scan{} cancelled after {index} of {block_count} blocks",
                options.message.map(|m| format!(" '{m}'")).unwrap_or_default()
            );
            if let Some(notify) = options.notify {
                notify.on_complete(true);
            }
            return Ok(ScanStatus::Cancelled);
        }

        let block = buffer.get_typed_block(index).await?;
        callback(&block)?;

        if let Some(notify) = options.notify {
            notify.on_progress((index + 1) as f32 / block_count as f32);
        }
    }

    if let Some(notify) = options.notify {
        notify.on_complete(false);
    }
    Ok(ScanStatus::Completed)
}
