//! Aggregate game statistics
//!
//! High-frequency control actions are counted locally and flushed to the
//! counter sink on an interval. Line and turn counts are forwarded as they
//! happen. Play time is derived from the authoritative action log when a
//! game is deleted, with idle gaps left out.

use log::{debug, info};
use shared::{ActionEnvelope, Game, GameAction, StatCounter, StatsTotals, UserId};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::watch;

/// External counter backend
pub trait StatsSink: Send + Sync {
    fn increment(&self, counter: StatCounter, amount: u64);
}

/// In-process counter backend that notifies watchers on every change
pub struct LocalStatsSink {
    totals: watch::Sender<StatsTotals>,
}

impl Default for LocalStatsSink {
    fn default() -> Self {
        Self::new()
    }
}

impl LocalStatsSink {
    pub fn new() -> Self {
        let (totals, _) = watch::channel(StatsTotals::default());
        Self { totals }
    }

    pub fn subscribe(&self) -> watch::Receiver<StatsTotals> {
        self.totals.subscribe()
    }

    pub fn totals(&self) -> StatsTotals {
        self.totals.borrow().clone()
    }
}

impl StatsSink for LocalStatsSink {
    fn increment(&self, counter: StatCounter, amount: u64) {
        self.totals.send_modify(|totals| totals.add(counter, amount));
    }
}

/// Control action counts accumulated since the last flush
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct PendingCounters {
    pub left: u64,
    pub right: u64,
    pub acceleration: u64,
    pub rotate: u64,
}

impl PendingCounters {
    pub fn is_empty(&self) -> bool {
        *self == Self::default()
    }
}

pub struct StatsAggregator {
    pending: PendingCounters,
    sink: Arc<dyn StatsSink>,
    idle_gap_cutoff_ms: u64,
}

impl StatsAggregator {
    pub fn new(sink: Arc<dyn StatsSink>, idle_gap_cutoff_ms: u64) -> Self {
        Self {
            pending: PendingCounters::default(),
            sink,
            idle_gap_cutoff_ms,
        }
    }

    /// Feeds one applied envelope and the game states around it
    pub fn observe(&mut self, envelope: &ActionEnvelope, game: &Game, prev_game: &Game) {
        self.count_control_action(envelope);
        self.count_lines(envelope, game, prev_game);
        self.count_turns(game, prev_game);
    }

    pub fn count_control_action(&mut self, envelope: &ActionEnvelope) {
        match envelope.action {
            GameAction::MoveLeft => self.pending.left += 1,
            GameAction::MoveRight => self.pending.right += 1,
            GameAction::EnableAcceleration => self.pending.acceleration += 1,
            GameAction::Rotate => self.pending.rotate += 1,
            _ => {}
        }
    }

    /// Forwards lines gained by the acting player
    pub fn count_lines(&self, envelope: &ActionEnvelope, game: &Game, prev_game: &Game) {
        if matches!(envelope.action, GameAction::JoinGame { .. }) {
            return;
        }

        let (Some(player), Some(prev_player)) = (
            game.player(&envelope.user_id),
            prev_game.player(&envelope.user_id),
        ) else {
            return;
        };

        if player.lines > prev_player.lines {
            self.sink
                .increment(StatCounter::Lines, player.lines - prev_player.lines);
        }
    }

    /// A new turn starts when the first player's drop count resets
    pub fn count_turns(&self, game: &Game, prev_game: &Game) {
        if let (Some(player), Some(prev_player)) = (game.players.first(), prev_game.players.first())
        {
            if player.drops == 0 && prev_player.drops > 0 {
                self.sink.increment(StatCounter::Turns, 1);
            }
        }
    }

    /// Drains non-zero pending counters into the sink
    ///
    /// Returns what was flushed.
    pub fn flush(&mut self) -> PendingCounters {
        let flushed = std::mem::take(&mut self.pending);
        if flushed.is_empty() {
            return flushed;
        }

        let counts = [
            (StatCounter::ActionLeft, flushed.left),
            (StatCounter::ActionRight, flushed.right),
            (StatCounter::ActionAcc, flushed.acceleration),
            (StatCounter::ActionRotate, flushed.rotate),
        ];
        for (counter, amount) in counts {
            if amount > 0 {
                self.sink.increment(counter, amount);
            }
        }

        debug!("Flushed action counters {:?}", flushed);
        flushed
    }

    pub fn pending(&self) -> PendingCounters {
        self.pending
    }

    /// Accounts the play time of a deleted game. Returns the seconds forwarded.
    pub fn record_play_time(&self, actions: &[ActionEnvelope]) -> u64 {
        let seconds = play_time_seconds(actions, self.idle_gap_cutoff_ms);
        if seconds > 0 {
            info!("Accounting {}s of play time", seconds);
            self.sink.increment(StatCounter::Seconds, seconds);
        }
        seconds
    }
}

/// Total play time in seconds across all players of an action log
///
/// Per player: action ids sorted ascending, consecutive gaps summed,
/// gaps of `idle_gap_cutoff_ms` or more skipped, rounded to whole seconds.
/// Players with fewer than two actions contribute nothing.
pub fn play_time_seconds(actions: &[ActionEnvelope], idle_gap_cutoff_ms: u64) -> u64 {
    let mut per_player: HashMap<&UserId, Vec<u64>> = HashMap::new();
    for envelope in actions {
        per_player
            .entry(&envelope.user_id)
            .or_default()
            .push(envelope.action_id);
    }

    per_player
        .into_values()
        .filter(|ids| ids.len() > 1)
        .map(|mut ids| {
            ids.sort_unstable();
            let active_ms: u64 = ids
                .windows(2)
                .map(|pair| pair[1] - pair[0])
                .filter(|gap| *gap < idle_gap_cutoff_ms)
                .sum();
            (active_ms + 500) / 1000
        })
        .sum()
}
