//! Entry Signal State Machine
//!
//! Sequences higher-timeframe structure into a single entry per setup:
//! 1. SCANNING - wait for a CHoCH (or a strong MSS/BOS without one)
//! 2. CHOCH_DETECTED - wait for the MSS that confirms the CHoCH
//! 3. MSS_CONFIRMED - wait for an LTF entry zone in the bias direction
//! 4. AWAITING_ENTRY - wait for an LTF candle to trigger inside the zone
//! 5. COOLDOWN - quiet period after a signal, then back to scanning
//!
//! Every phase except SCANNING expires after its validity window. `now` is
//! supplied by the caller and must never go backwards.

use std::collections::VecDeque;

use serde::{Deserialize, Serialize};
use tracing::info;

use super::config::StateMachineConfig;
use super::entry::{detect_trigger, select_entry_zone, stop_level, target_level, target_origin, EntryTrigger};
use crate::structure::{ShiftDetail, StructureEvents, StructureShiftEvent, SwingLink, Zone, ZoneId};
use crate::types::{Candle, Direction};

/// Entry zones dropped by window expiry that are remembered to avoid re-selecting them
const MAX_EXPIRED_ZONES: usize = 64;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Phase {
    Scanning,
    ChochDetected,
    MssConfirmed,
    AwaitingEntry,
    Cooldown,
}

impl std::fmt::Display for Phase {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Phase::Scanning => write!(f, "SCANNING"),
            Phase::ChochDetected => write!(f, "CHOCH_DETECTED"),
            Phase::MssConfirmed => write!(f, "MSS_CONFIRMED"),
            Phase::AwaitingEntry => write!(f, "AWAITING_ENTRY"),
            Phase::Cooldown => write!(f, "COOLDOWN"),
        }
    }
}

/// Lower-timeframe inputs for one `process` call
#[derive(Debug, Clone, Copy)]
pub struct LtfData<'a> {
    pub candle: &'a Candle,
    pub fvgs: &'a [Zone],
    pub order_blocks: &'a [Zone],
}

impl<'a> LtfData<'a> {
    /// Candle only, no zone inventory
    pub fn candle(candle: &'a Candle) -> Self {
        Self {
            candle,
            fvgs: &[],
            order_blocks: &[],
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct EntryDetails {
    pub trigger: EntryTrigger,
    pub entry_price: f64,
    pub entry_zone: Zone,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TransitionResult {
    pub transitioned: bool,
    pub signal_ready: bool,
    pub reason: String,
    pub entry_details: Option<EntryDetails>,
}

impl TransitionResult {
    fn hold(reason: &str) -> Self {
        Self {
            transitioned: false,
            signal_ready: false,
            reason: reason.to_string(),
            entry_details: None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StateTransitionRecord {
    pub from: Phase,
    pub to: Phase,
    pub timestamp: i64,
    pub reason: String,
}

/// Read-only snapshot for order construction
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SignalConditions {
    pub can_take_long: bool,
    pub can_take_short: bool,
    pub entry_zone: Option<Zone>,
    pub stop_level: Option<f64>,
    pub target_level: Option<f64>,
    pub phase: Phase,
    pub htf_bias: Option<Direction>,
}

pub struct EntrySignalStateMachine {
    config: StateMachineConfig,
    phase: Phase,
    phase_entered_at: i64,
    htf_bias: Option<Direction>,
    last_choch: Option<ShiftDetail>,
    last_mss: Option<StructureShiftEvent>,
    entry_zone: Option<Zone>,
    stop_level: Option<f64>,
    target_level: Option<f64>,
    last_signal_time: Option<i64>,
    last_now: Option<i64>,
    expired_zones: VecDeque<ZoneId>,
    liquidity: VecDeque<SwingLink>,
    history: VecDeque<StateTransitionRecord>,
}

impl EntrySignalStateMachine {
    /// Create a state machine after validating the config
    pub fn new(config: StateMachineConfig) -> anyhow::Result<Self> {
        config.validate()?;
        Ok(Self {
            config,
            phase: Phase::Scanning,
            phase_entered_at: 0,
            htf_bias: None,
            last_choch: None,
            last_mss: None,
            entry_zone: None,
            stop_level: None,
            target_level: None,
            last_signal_time: None,
            last_now: None,
            expired_zones: VecDeque::new(),
            liquidity: VecDeque::new(),
            history: VecDeque::new(),
        })
    }

    pub fn config(&self) -> &StateMachineConfig {
        &self.config
    }

    pub fn phase(&self) -> Phase {
        self.phase
    }

    pub fn htf_bias(&self) -> Option<Direction> {
        self.htf_bias
    }

    pub fn last_choch(&self) -> Option<&ShiftDetail> {
        self.last_choch.as_ref()
    }

    pub fn last_mss(&self) -> Option<&StructureShiftEvent> {
        self.last_mss.as_ref()
    }

    pub fn last_signal_time(&self) -> Option<i64> {
        self.last_signal_time
    }

    /// Transition history, oldest first
    pub fn history(&self) -> impl Iterator<Item = &StateTransitionRecord> {
        self.history.iter()
    }

    pub fn get_signal_conditions(&self) -> SignalConditions {
        let awaiting = self.phase == Phase::AwaitingEntry;
        SignalConditions {
            can_take_long: awaiting && self.htf_bias == Some(Direction::Bullish),
            can_take_short: awaiting && self.htf_bias == Some(Direction::Bearish),
            entry_zone: self.entry_zone.clone(),
            stop_level: self.stop_level,
            target_level: self.target_level,
            phase: self.phase,
            htf_bias: self.htf_bias,
        }
    }

    /// Return to SCANNING with no structure, liquidity or history
    pub fn reset(&mut self) {
        self.phase = Phase::Scanning;
        self.phase_entered_at = 0;
        self.last_now = None;
        self.last_signal_time = None;
        self.expired_zones.clear();
        self.liquidity.clear();
        self.history.clear();
        self.clear_structure();
    }

    fn clear_structure(&mut self) {
        self.htf_bias = None;
        self.last_choch = None;
        self.last_mss = None;
        self.clear_entry();
    }

    fn clear_entry(&mut self) {
        self.entry_zone = None;
        self.stop_level = None;
        self.target_level = None;
    }

    fn transition(&mut self, to: Phase, now: i64, reason: String) -> TransitionResult {
        let from = self.phase;
        info!("State machine {} -> {}: {}", from, to, reason);

        self.history.push_back(StateTransitionRecord {
            from,
            to,
            timestamp: now,
            reason: reason.clone(),
        });
        if self.history.len() > self.config.max_history {
            self.history.pop_front();
        }

        self.phase = to;
        self.phase_entered_at = now;
        TransitionResult {
            transitioned: true,
            signal_ready: false,
            reason,
            entry_details: None,
        }
    }

    fn record_liquidity(&mut self, events: &StructureEvents) {
        for swing in &events.new_swings {
            self.liquidity.push_back(swing.link());
            if self.liquidity.len() > self.config.max_liquidity_levels {
                self.liquidity.pop_front();
            }
        }
    }

    /// Advance the machine with this candle's HTF structure events and LTF data.
    ///
    /// At most one transition happens per call; expiry is checked first.
    /// Panics if `now` is earlier than the previous call's `now`.
    pub fn process(&mut self, events: &StructureEvents, ltf: &LtfData<'_>, now: i64) -> TransitionResult {
        if let Some(last) = self.last_now {
            assert!(now >= last, "state machine time went backwards: {} < {}", now, last);
        }
        self.last_now = Some(now);
        self.record_liquidity(events);

        if let Some(result) = self.check_expiry(now) {
            return result;
        }

        match self.phase {
            Phase::Scanning => self.process_scanning(events, now),
            Phase::ChochDetected => self.process_choch_detected(events, now),
            Phase::MssConfirmed => self.process_mss_confirmed(ltf, now),
            Phase::AwaitingEntry => self.process_awaiting_entry(ltf, now),
            Phase::Cooldown => TransitionResult::hold("cooling down"),
        }
    }

    fn check_expiry(&mut self, now: i64) -> Option<TransitionResult> {
        let elapsed = now - self.phase_entered_at;
        match self.phase {
            Phase::Scanning => None,
            Phase::ChochDetected if elapsed > self.config.choch_validity_ms => {
                self.clear_structure();
                Some(self.transition(Phase::Scanning, now, format!("CHoCH expired after {}ms without MSS", elapsed)))
            }
            Phase::MssConfirmed if elapsed > self.config.mss_validity_ms => {
                self.clear_structure();
                Some(self.transition(Phase::Scanning, now, format!("structure expired after {}ms without entry zone", elapsed)))
            }
            Phase::AwaitingEntry if elapsed > self.config.entry_window_ms => {
                if let Some(zone) = self.entry_zone.take() {
                    self.expired_zones.push_back(zone.id);
                    if self.expired_zones.len() > MAX_EXPIRED_ZONES {
                        self.expired_zones.pop_front();
                    }
                }
                self.clear_entry();
                Some(self.transition(Phase::MssConfirmed, now, format!("entry window expired after {}ms", elapsed)))
            }
            Phase::Cooldown => {
                let since = now - self.last_signal_time.unwrap_or(self.phase_entered_at);
                if since <= self.config.cooldown_ms {
                    return None;
                }
                self.clear_structure();
                Some(self.transition(Phase::Scanning, now, "cooldown complete".to_string()))
            }
            _ => None,
        }
    }

    fn process_scanning(&mut self, events: &StructureEvents, now: i64) -> TransitionResult {
        if let Some(StructureShiftEvent::Choch(detail)) = events.choch() {
            self.htf_bias = Some(detail.direction);
            self.last_choch = Some(detail.clone());
            return self.transition(
                Phase::ChochDetected,
                now,
                format!("{} CHoCH at {:.2}", detail.direction, detail.level),
            );
        }

        if let Some(shift) = events.structure_shift() {
            let confidence = shift.confidence();
            if confidence > self.config.min_structure_confidence {
                self.htf_bias = Some(shift.direction());
                self.last_mss = Some(shift.clone());
                return self.transition(
                    Phase::MssConfirmed,
                    now,
                    format!("{} at {:.2} (confidence {:.1}) without CHoCH", shift.kind(), shift.level(), confidence),
                );
            }
        }

        TransitionResult::hold("scanning for structure")
    }

    fn process_choch_detected(&mut self, events: &StructureEvents, now: i64) -> TransitionResult {
        let Some(bias) = self.htf_bias else {
            self.clear_structure();
            return self.transition(Phase::Scanning, now, "no bias recorded".to_string());
        };

        if let Some(mss) = events.mss() {
            if mss.direction() == bias {
                self.last_mss = Some(mss.clone());
                return self.transition(
                    Phase::MssConfirmed,
                    now,
                    format!("{} confirms CHoCH at {:.2}", mss.kind(), mss.level()),
                );
            }
        }

        // An opposite CHoCH replaces the one being watched
        if let Some(StructureShiftEvent::Choch(detail)) = events.choch() {
            if detail.direction != bias {
                self.htf_bias = Some(detail.direction);
                self.last_choch = Some(detail.clone());
                return self.transition(
                    Phase::ChochDetected,
                    now,
                    format!("{} CHoCH at {:.2} replaces {} CHoCH", detail.direction, detail.level, bias),
                );
            }
        }

        TransitionResult::hold("waiting for MSS")
    }

    fn process_mss_confirmed(&mut self, ltf: &LtfData<'_>, now: i64) -> TransitionResult {
        let (Some(bias), Some(structure)) = (self.htf_bias, self.last_mss.as_ref().map(|e| e.detail().clone())) else {
            self.clear_structure();
            return self.transition(Phase::Scanning, now, "no confirmed structure".to_string());
        };

        let excluded: Vec<ZoneId> = self.expired_zones.iter().copied().collect();
        let Some(zone) = select_entry_zone(
            bias,
            ltf.candle.close,
            ltf.fvgs,
            ltf.order_blocks,
            &excluded,
            &self.config,
        ) else {
            return TransitionResult::hold("waiting for entry zone");
        };

        let stop = stop_level(bias, &structure, &zone);
        let target = target_level(bias, &structure, &zone, target_origin(bias, &zone, None), self.liquidity.iter());
        let reason = format!(
            "{} {:?} entry zone {:.2}-{:.2} (stop {:.2}, target {:.2})",
            bias, zone.kind, zone.low, zone.high, stop, target
        );
        self.entry_zone = Some(zone);
        self.stop_level = Some(stop);
        self.target_level = Some(target);
        self.transition(Phase::AwaitingEntry, now, reason)
    }

    fn process_awaiting_entry(&mut self, ltf: &LtfData<'_>, now: i64) -> TransitionResult {
        let (Some(bias), Some(zone)) = (self.htf_bias, self.entry_zone.clone()) else {
            self.clear_entry();
            return self.transition(Phase::MssConfirmed, now, "entry zone missing".to_string());
        };

        let Some(trigger) = detect_trigger(ltf.candle, &zone, bias, self.config.rejection_wick_ratio) else {
            return TransitionResult::hold("waiting for entry trigger");
        };

        let entry_price = ltf.candle.close;
        // Liquidity the entry candle already ran through is no longer a target
        if let Some(structure) = self.last_mss.as_ref().map(|e| e.detail().clone()) {
            let from = target_origin(bias, &zone, Some(entry_price));
            self.target_level = Some(target_level(bias, &structure, &zone, from, self.liquidity.iter()));
        }
        self.last_signal_time = Some(now);
        let mut result = self.transition(
            Phase::Cooldown,
            now,
            format!("{} {} entry at {:.2}", bias, trigger, entry_price),
        );
        result.signal_ready = true;
        result.entry_details = Some(EntryDetails {
            trigger,
            entry_price,
            entry_zone: zone,
        });
        result
    }
}
