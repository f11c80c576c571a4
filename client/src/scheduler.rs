//! Frame-driven drop pacing
//!
//! Pieces fall at a rate measured in frames per drop. Each frame tick adds
//! `frames / frames_per_drop` to a running progress value; every whole unit
//! of progress becomes one row dropped. The remainder carries over so slow
//! or irregular ticks never lose or invent rows.

use log::{debug, warn};
use shared::FRAME_DURATION;
use std::future::Future;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tokio::time::{interval, Instant, Interval, MissedTickBehavior};

/// Ticks later than this many frames are reported as dropped frames
const SLOW_FRAME_THRESHOLD: f64 = 3.0;

/// Fractional row progress of one falling piece
#[derive(Debug, Default, Clone, Copy)]
pub struct DropProgress {
    progress: f64,
}

impl DropProgress {
    /// Returns the rows to drop once progress reaches a whole row
    pub fn advance(&mut self, frames: f64, frames_per_drop: f64) -> Option<u32> {
        self.progress += frames / frames_per_drop;

        if self.progress >= 1.0 {
            let rows = self.progress.floor();
            self.progress %= 1.0;
            Some(rows as u32)
        } else {
            None
        }
    }

    pub fn progress(&self) -> f64 {
        self.progress
    }
}

/// Notifies the scheduler of the next display frame
pub trait FrameSource: Send + 'static {
    /// Waits for the next tick and returns the nominal frames elapsed since
    /// the previous one, or `None` when the source is exhausted
    fn next_frame(&mut self) -> impl Future<Output = Option<f64>> + Send;
}

/// Ticks at the display rate using a tokio interval
pub struct IntervalFrames {
    interval: Interval,
    last_tick: Option<Instant>,
}

impl Default for IntervalFrames {
    fn default() -> Self {
        Self::new()
    }
}

impl IntervalFrames {
    pub fn new() -> Self {
        let mut interval = interval(FRAME_DURATION);
        interval.set_missed_tick_behavior(MissedTickBehavior::Skip);
        Self {
            interval,
            last_tick: None,
        }
    }
}

impl FrameSource for IntervalFrames {
    fn next_frame(&mut self) -> impl Future<Output = Option<f64>> + Send {
        async move {
            let now = self.interval.tick().await;
            let frames = match self.last_tick.replace(now) {
                Some(last) => (now - last).as_secs_f64() / FRAME_DURATION.as_secs_f64(),
                None => 1.0,
            };
            Some(frames)
        }
    }
}

/// Frames pushed by an external driver
pub struct ChannelFrames {
    frames: mpsc::UnboundedReceiver<f64>,
}

impl ChannelFrames {
    pub fn new() -> (mpsc::UnboundedSender<f64>, Self) {
        let (tx, frames) = mpsc::unbounded_channel();
        (tx, Self { frames })
    }
}

impl FrameSource for ChannelFrames {
    fn next_frame(&mut self) -> impl Future<Output = Option<f64>> + Send {
        self.frames.recv()
    }
}

/// Owns at most one running frame loop
///
/// The loop reads the current pace from a watch channel every tick and
/// exits quietly when the pace turns `None`. Rows are delivered on the
/// `drops` channel for the caller to dispatch.
#[derive(Default)]
pub struct FrameScheduler {
    handle: Option<JoinHandle<()>>,
}

impl FrameScheduler {
    pub fn new() -> Self {
        Self { handle: None }
    }

    /// Cancels any running loop, then starts a new one with fresh progress
    pub fn start<S: FrameSource>(
        &mut self,
        frames: S,
        pace: watch::Receiver<Option<f64>>,
        drops: mpsc::UnboundedSender<u32>,
    ) {
        self.cancel();
        self.handle = Some(tokio::spawn(run_frames(frames, pace, drops)));
    }

    pub fn cancel(&mut self) {
        if let Some(handle) = self.handle.take() {
            handle.abort();
        }
    }

    pub fn is_running(&self) -> bool {
        self.handle.as_ref().is_some_and(|h| !h.is_finished())
    }
}

impl Drop for FrameScheduler {
    fn drop(&mut self) {
        self.cancel();
    }
}

async fn run_frames<S: FrameSource>(
    mut frames: S,
    pace: watch::Receiver<Option<f64>>,
    drops: mpsc::UnboundedSender<u32>,
) {
    let mut progress = DropProgress::default();

    while let Some(elapsed) = frames.next_frame().await {
        if elapsed > SLOW_FRAME_THRESHOLD {
            warn!("Perf degraded: {:.0} frames skipped", elapsed - 1.0);
        }

        let current_pace = *pace.borrow();
        let Some(frames_per_drop) = current_pace else {
            debug!("Not all players ready, stopping frame loop");
            return;
        };

        if let Some(rows) = progress.advance(elapsed, frames_per_drop) {
            if drops.send(rows).is_err() {
                return;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use assert_approx_eq::assert_approx_eq;
    use std::time::Duration;
    use tokio::time::timeout;

    #[test]
    fn test_drop_on_whole_row() {
        let mut progress = DropProgress::default();

        assert_eq!(progress.advance(1.0, 4.0), None);
        assert_eq!(progress.advance(1.0, 4.0), None);
        assert_eq!(progress.advance(1.0, 4.0), None);
        assert_eq!(progress.advance(1.0, 4.0), Some(1));
        assert_approx_eq!(progress.progress(), 0.0);
    }

    #[test]
    fn test_remainder_carries_over() {
        let mut progress = DropProgress::default();

        assert_eq!(progress.advance(3.0, 2.0), Some(1));
        assert_approx_eq!(progress.progress(), 0.5);

        assert_eq!(progress.advance(5.0, 2.0), Some(3));
        assert_approx_eq!(progress.progress(), 0.0);
    }

    #[test]
    fn test_accelerated_pace_drops_multiple_rows() {
        let mut progress = DropProgress::default();
        // A 4 frame hitch at 1.5 frames per drop
        assert_eq!(progress.advance(4.0, 1.5), Some(2));
        assert_approx_eq!(progress.progress(), 2.0 / 3.0, 1e-9);
    }

    async fn recv_drop(rx: &mut mpsc::UnboundedReceiver<u32>) -> Option<u32> {
        timeout(Duration::from_secs(1), rx.recv())
            .await
            .expect("frame loop stalled")
    }

    #[tokio::test]
    async fn test_scheduler_emits_one_drop_for_four_frames() {
        let (frame_tx, frames) = ChannelFrames::new();
        let (_pace_tx, pace_rx) = watch::channel(Some(4.0));
        let (drops_tx, mut drops_rx) = mpsc::unbounded_channel();

        let mut scheduler = FrameScheduler::new();
        scheduler.start(frames, pace_rx, drops_tx);

        for _ in 0..4 {
            frame_tx.send(1.0).unwrap();
        }
        drop(frame_tx);

        assert_eq!(recv_drop(&mut drops_rx).await, Some(1));
        // Source exhausted, loop ends without further drops
        assert_eq!(recv_drop(&mut drops_rx).await, None);
    }

    #[tokio::test]
    async fn test_scheduler_stops_when_pace_cleared() {
        let (frame_tx, frames) = ChannelFrames::new();
        let (pace_tx, pace_rx) = watch::channel(Some(1.0));
        let (drops_tx, mut drops_rx) = mpsc::unbounded_channel();

        let mut scheduler = FrameScheduler::new();
        scheduler.start(frames, pace_rx, drops_tx);

        frame_tx.send(1.0).unwrap();
        assert_eq!(recv_drop(&mut drops_rx).await, Some(1));

        pace_tx.send(None).unwrap();
        frame_tx.send(1.0).unwrap();
        assert_eq!(recv_drop(&mut drops_rx).await, None);
        assert!(!scheduler.is_running());
    }

    #[tokio::test]
    async fn test_pace_change_applies_next_tick() {
        let (frame_tx, frames) = ChannelFrames::new();
        let (pace_tx, pace_rx) = watch::channel(Some(48.0));
        let (drops_tx, mut drops_rx) = mpsc::unbounded_channel();

        let mut scheduler = FrameScheduler::new();
        scheduler.start(frames, pace_rx, drops_tx);

        pace_tx.send(Some(0.5)).unwrap();
        frame_tx.send(1.0).unwrap();
        assert_eq!(recv_drop(&mut drops_rx).await, Some(2));
    }

    #[tokio::test]
    async fn test_start_cancels_previous_loop() {
        let (_first_frames_tx, first_frames) = ChannelFrames::new();
        let (_pace_tx, pace_rx) = watch::channel(Some(4.0));
        let (first_drops_tx, mut first_drops_rx) = mpsc::unbounded_channel();

        let mut scheduler = FrameScheduler::new();
        scheduler.start(first_frames, pace_rx.clone(), first_drops_tx);
        assert!(scheduler.is_running());

        let (_second_frames_tx, second_frames) = ChannelFrames::new();
        let (second_drops_tx, _second_drops_rx) = mpsc::unbounded_channel();
        scheduler.start(second_frames, pace_rx, second_drops_tx);

        // Aborting the first loop drops its sender
        assert_eq!(recv_drop(&mut first_drops_rx).await, None);
        assert!(scheduler.is_running());

        scheduler.cancel();
        scheduler.cancel();
        assert!(!scheduler.is_running());
    }

    #[tokio::test(start_paused = true)]
    async fn test_interval_frames_counts_nominal_frames() {
        let mut frames = IntervalFrames::new();

        assert_approx_eq!(frames.next_frame().await.unwrap(), 1.0);
        assert_approx_eq!(frames.next_frame().await.unwrap(), 1.0, 1e-3);
    }
}
