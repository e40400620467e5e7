//! Per-sender debounce and correlation of wall-switch message bursts.
//!
//! The Pop bridge reports one physical button press as a `LightSetPower` /
//! `LightSetColor` pair, retransmitted every 50 to 1500 ms for several
//! seconds, possibly from more than one bridge at once. The tracker
//! collapses that stream into at most one [`TriggerEvent`] per distinct
//! physical action, using only a local clock and per-sender memory.

use std::collections::HashMap;
use std::fmt;
use std::net::SocketAddr;
use std::time::{Duration, Instant};

use log::debug;

use crate::protocol::{Message, POWER_ON, Packet};

/// A sender that has gone quiet this long forgets its buffered action.
const IDLE_RESET: Duration = Duration::from_secs(5);

/// Identical reports inside this window after a trigger are absorbed.
const COALESCE_WINDOW: Duration = Duration::from_secs(15);

/// Time source for the idle and coalescing windows.
///
/// The tracker never reads the wall clock directly, so tests can replay
/// recorded message timelines deterministically.
pub trait Clock {
    fn now(&self) -> Instant;
}

/// The real clock.
#[derive(Debug, Default, Clone, Copy)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> Instant {
        Instant::now()
    }
}

// One bridge's buffered half-action. Entries are created lazily on the
// first message from a new address and never removed; a stale entry
// clears itself through the idle rule before any new message is applied.
#[derive(Debug, Default)]
struct BridgeState {
    power_msg: Option<Message>,
    color_msg: Option<Message>,
    last_triggered: Option<Instant>,
}

impl BridgeState {
    fn reset(&mut self) {
        self.power_msg = None;
        self.color_msg = None;
        self.last_triggered = None;
    }
}

/// The light state resolved from one deduplicated button press.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SwitchState {
    pub hue: u16,
    pub saturation: u16,
    pub brightness: u16,
    pub kelvin: u16,
    pub power: bool,
}

impl fmt::Display for SwitchState {
    /// Formats as the switch-filter token syntax, e.g. `25486h,655s,32768b,3612k,on`.
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}h,{}s,{}b,{}k,{}",
            self.hue,
            self.saturation,
            self.brightness,
            self.kelvin,
            if self.power { "on" } else { "off" }
        )
    }
}

/// One resolved, deduplicated user action, ready for routing.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TriggerEvent {
    pub sender: SocketAddr,
    pub state: SwitchState,
}

/// Collapses retransmitted, multi-bridge message bursts into triggers.
///
/// Owns all per-sender state and the cross-sender dedup record; create one
/// per server (or one per test) rather than sharing anything globally.
pub struct Tracker<C: Clock = SystemClock> {
    states: HashMap<SocketAddr, BridgeState>,
    last_trigger: Option<(SocketAddr, Message, Message)>,
    clock: C,
}

impl Tracker<SystemClock> {
    pub fn new() -> Self {
        Self::with_clock(SystemClock)
    }
}

impl Default for Tracker<SystemClock> {
    fn default() -> Self {
        Self::new()
    }
}

impl<C: Clock> Tracker<C> {
    pub fn with_clock(clock: C) -> Self {
        Tracker {
            states: HashMap::new(),
            last_trigger: None,
            clock,
        }
    }

    /// Feed one decoded packet from `sender`.
    ///
    /// Returns a trigger when this packet completes a new action:
    /// - a sender idle for 5 s since its last trigger is reset before the
    ///   packet is applied;
    /// - `LightGet` unconditionally resets the sender (status polling
    ///   carries no action intent);
    /// - a buffered power or color message that differs from the incoming
    ///   one signals a new action and resets the sender first;
    /// - nothing fires until both halves of the pair are buffered;
    /// - the first complete pair fires and opens a 15 s window inside
    ///   which identical reports are absorbed;
    /// - a pair equal to the last one dispatched is suppressed when it
    ///   comes from a different sender (another bridge already reported
    ///   the same physical press); the same sender may re-trigger.
    ///
    /// Never fails; malformed or foreign messages simply never pair up.
    pub fn handle(&mut self, sender: SocketAddr, packet: &Packet) -> Option<TriggerEvent> {
        let now = self.clock.now();
        let state = self.states.entry(sender).or_default();

        if let Some(t) = state.last_triggered
            && now.duration_since(t) >= IDLE_RESET
        {
            state.reset();
        }

        match &packet.message {
            Message::LightGet => state.reset(),
            msg @ Message::LightSetPower { .. } => {
                if state.power_msg.as_ref().is_some_and(|m| m != msg) {
                    state.reset();
                }
                state.power_msg = Some(msg.clone());
            }
            msg @ Message::LightSetColor { .. } => {
                if state.color_msg.as_ref().is_some_and(|m| m != msg) {
                    state.reset();
                }
                state.color_msg = Some(msg.clone());
            }
            _ => {}
        }

        // The bridge reports every action as a power & color pair; only a
        // complete pair describes the full requested state.
        if state.power_msg.is_none() || state.color_msg.is_none() {
            return None;
        }

        match state.last_triggered {
            // First complete pair: open the coalescing window and fall
            // through to fire.
            None => state.last_triggered = Some(now),
            Some(t) if now.duration_since(t) < COALESCE_WINDOW => return None,
            Some(_) => {}
        }

        let (Some(power_msg), Some(color_msg)) = (state.power_msg.clone(), state.color_msg.clone())
        else {
            return None;
        };

        if let Some((last_sender, last_power, last_color)) = &self.last_trigger
            && *last_sender != sender
            && *last_power == power_msg
            && *last_color == color_msg
        {
            debug!("suppressing duplicate trigger from {sender}: already reported by {last_sender}");
            return None;
        }

        let resolved = resolve_state(&power_msg, &color_msg)?;
        self.last_trigger = Some((sender, power_msg, color_msg));
        Some(TriggerEvent {
            sender,
            state: resolved,
        })
    }
}

fn resolve_state(power_msg: &Message, color_msg: &Message) -> Option<SwitchState> {
    let (
        Message::LightSetPower { level, .. },
        Message::LightSetColor {
            hue,
            saturation,
            brightness,
            kelvin,
            ..
        },
    ) = (power_msg, color_msg)
    else {
        return None;
    };
    Some(SwitchState {
        hue: *hue,
        saturation: *saturation,
        brightness: *brightness,
        kelvin: *kelvin,
        power: *level == POWER_ON,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::{Header, POWER_OFF};
    use std::cell::Cell;
    use std::rc::Rc;

    const BRIDGE_1: &str = "10.0.0.1:56700";
    const BRIDGE_2: &str = "10.0.0.2:56700";

    // Offsets (ms) at which a real bridge retransmits one action,
    // alternating SetPower / SetColor.
    const BURST_OFFSETS_MS: [u64; 18] = [
        0, 2, 55, 57, 134, 141, 275, 277, 509, 510, 873, 875, 1469, 1472, 2443, 2444, 4042, 4045,
    ];

    #[derive(Clone)]
    struct TestClock {
        now: Rc<Cell<Instant>>,
    }

    impl Clock for TestClock {
        fn now(&self) -> Instant {
            self.now.get()
        }
    }

    struct Replay {
        tracker: Tracker<TestClock>,
        now: Rc<Cell<Instant>>,
        base: Instant,
    }

    impl Replay {
        fn new() -> Self {
            let base = Instant::now();
            let now = Rc::new(Cell::new(base));
            Replay {
                tracker: Tracker::with_clock(TestClock { now: now.clone() }),
                now,
                base,
            }
        }

        fn replay(&mut self, mut events: Vec<(u64, SocketAddr, Message)>) -> Vec<TriggerEvent> {
            events.sort_by_key(|(ms, _, _)| *ms);
            events
                .into_iter()
                .filter_map(|(ms, sender, message)| self.at(ms, sender, message))
                .collect()
        }

        fn at(&mut self, ms: u64, sender: SocketAddr, message: Message) -> Option<TriggerEvent> {
            self.now.set(self.base + Duration::from_millis(ms));
            self.tracker.handle(sender, &packetize(message))
        }
    }

    fn addr(s: &str) -> SocketAddr {
        s.parse().unwrap()
    }

    fn packetize(message: Message) -> Packet {
        let header = Header {
            size: 0,
            protocol_flags: 0,
            source: 0,
            target: [0; 8],
            site: [0; 6],
            acknowledge: 0,
            sequence: 0,
            timestamp: 0,
            code: message.code(),
            reserved: 0,
        };
        Packet { header, message }
    }

    fn power_msg(on: bool) -> Message {
        Message::LightSetPower {
            level: if on { POWER_ON } else { POWER_OFF },
            duration: 1000,
        }
    }

    fn color_msg() -> Message {
        Message::LightSetColor {
            stream: 0,
            hue: 24102,
            saturation: 31097,
            brightness: 32768,
            kelvin: 3612,
            duration: 1000,
        }
    }

    fn expected_state(on: bool) -> SwitchState {
        SwitchState {
            hue: 24102,
            saturation: 31097,
            brightness: 32768,
            kelvin: 3612,
            power: on,
        }
    }

    // One action's full retransmission burst, optionally cut short at
    // `until_ms` (a bridge stops repeating once a new press starts).
    fn action_burst(
        start_ms: u64,
        sender: SocketAddr,
        on: bool,
        until_ms: u64,
    ) -> Vec<(u64, SocketAddr, Message)> {
        BURST_OFFSETS_MS
            .iter()
            .enumerate()
            .map(|(i, off)| {
                let msg = if i % 2 == 0 { power_msg(on) } else { color_msg() };
                (start_ms + off, sender, msg)
            })
            .filter(|(ms, _, _)| *ms < until_ms)
            .collect()
    }

    #[test]
    fn test_single_bridge_burst_triggers_once() {
        let mut replay = Replay::new();
        let triggers = replay.replay(action_burst(0, addr(BRIDGE_1), true, u64::MAX));
        assert_eq!(triggers.len(), 1);
        assert_eq!(triggers[0].sender, addr(BRIDGE_1));
        assert_eq!(triggers[0].state, expected_state(true));
    }

    #[test]
    fn test_on_then_off_with_delay() {
        let mut replay = Replay::new();
        let triggers = replay.replay(action_burst(0, addr(BRIDGE_1), true, u64::MAX));
        assert_eq!(triggers.len(), 1);
        assert_eq!(triggers[0].state, expected_state(true));

        let triggers = replay.replay(action_burst(10_000, addr(BRIDGE_1), false, u64::MAX));
        assert_eq!(triggers.len(), 1);
        assert_eq!(triggers[0].state, expected_state(false));
    }

    #[test]
    fn test_on_then_off_quickly() {
        // A changed power level inside the window is a new action and
        // must fire without waiting out the 15 s window.
        let mut replay = Replay::new();
        let mut events = action_burst(0, addr(BRIDGE_1), true, 2000);
        events.extend(action_burst(2000, addr(BRIDGE_1), false, u64::MAX));
        let triggers = replay.replay(events);
        assert_eq!(triggers.len(), 2);
        assert_eq!(triggers[0].state, expected_state(true));
        assert_eq!(triggers[1].state, expected_state(false));
    }

    #[test]
    fn test_two_bridges_identical_burst_triggers_once() {
        let mut replay = Replay::new();
        let mut events = action_burst(0, addr(BRIDGE_1), true, u64::MAX);
        events.extend(action_burst(10, addr(BRIDGE_2), true, u64::MAX));
        let triggers = replay.replay(events);
        assert_eq!(triggers.len(), 1);
        // attributed to whichever bridge completed the pair first
        assert_eq!(triggers[0].sender, addr(BRIDGE_1));
        assert_eq!(triggers[0].state, expected_state(true));
    }

    #[test]
    fn test_two_bridges_on_then_off_with_delay() {
        let mut replay = Replay::new();
        let mut events = action_burst(0, addr(BRIDGE_1), true, u64::MAX);
        events.extend(action_burst(10, addr(BRIDGE_2), true, u64::MAX));
        let triggers = replay.replay(events);
        assert_eq!(triggers.len(), 1);
        assert_eq!(triggers[0].sender, addr(BRIDGE_1));

        let mut events = action_burst(10_000, addr(BRIDGE_1), false, u64::MAX);
        events.extend(action_burst(10_010, addr(BRIDGE_2), false, u64::MAX));
        let triggers = replay.replay(events);
        assert_eq!(triggers.len(), 1);
        assert_eq!(triggers[0].sender, addr(BRIDGE_1));
        assert_eq!(triggers[0].state, expected_state(false));
    }

    #[test]
    fn test_two_bridges_on_then_off_quickly() {
        let mut replay = Replay::new();
        let mut events = action_burst(0, addr(BRIDGE_1), true, 2000);
        events.extend(action_burst(10, addr(BRIDGE_2), true, 2010));
        events.extend(action_burst(2000, addr(BRIDGE_1), false, u64::MAX));
        events.extend(action_burst(2010, addr(BRIDGE_2), false, u64::MAX));
        let triggers = replay.replay(events);
        assert_eq!(triggers.len(), 2);
        assert_eq!(triggers[0].state, expected_state(true));
        assert_eq!(triggers[1].state, expected_state(false));
    }

    #[test]
    fn test_two_bridges_on_then_off_second_bridge_slow() {
        // The second bridge keeps repeating the old "on" action for two
        // extra seconds before it reports the "off" press. Its late
        // duplicate of the off pair must still be suppressed.
        let mut replay = Replay::new();
        let mut events = action_burst(0, addr(BRIDGE_1), true, 2000);
        events.extend(action_burst(10, addr(BRIDGE_2), true, 4010));
        events.extend(action_burst(2000, addr(BRIDGE_1), false, u64::MAX));
        events.extend(action_burst(4010, addr(BRIDGE_2), false, u64::MAX));
        let triggers = replay.replay(events);
        assert_eq!(triggers.len(), 2);
        assert_eq!(triggers[0].sender, addr(BRIDGE_1));
        assert_eq!(triggers[0].state, expected_state(true));
        assert_eq!(triggers[1].sender, addr(BRIDGE_1));
        assert_eq!(triggers[1].state, expected_state(false));
    }

    #[test]
    fn test_light_get_resets_pending_pair() {
        let mut replay = Replay::new();
        let sender = addr(BRIDGE_1);
        assert!(replay.at(0, sender, power_msg(true)).is_none());
        assert!(replay.at(10, sender, Message::LightGet).is_none());
        // the buffered power half was discarded; another power message
        // alone cannot complete a pair
        assert!(replay.at(20, sender, power_msg(true)).is_none());
        let trigger = replay.at(30, sender, color_msg());
        assert_eq!(trigger.map(|t| t.state), Some(expected_state(true)));
    }

    #[test]
    fn test_non_action_messages_leave_buffers_alone() {
        let mut replay = Replay::new();
        let sender = addr(BRIDGE_1);
        assert!(replay.at(0, sender, power_msg(true)).is_none());
        assert!(replay.at(3, sender, Message::GetVersion).is_none());
        let trigger = replay.at(20, sender, color_msg());
        assert_eq!(trigger.map(|t| t.state), Some(expected_state(true)));
    }

    #[test]
    fn test_same_sender_may_retrigger_after_idle() {
        // The cross-sender rule only suppresses a *different* sender
        // repeating the identical pair; the same bridge pressing the same
        // button again after going idle fires again.
        let mut replay = Replay::new();
        let triggers = replay.replay(action_burst(0, addr(BRIDGE_1), true, u64::MAX));
        assert_eq!(triggers.len(), 1);
        let triggers = replay.replay(action_burst(10_000, addr(BRIDGE_1), true, u64::MAX));
        assert_eq!(triggers.len(), 1);
    }

    #[test]
    fn test_different_sender_identical_pair_suppressed() {
        let mut replay = Replay::new();
        let triggers = replay.replay(action_burst(0, addr(BRIDGE_1), true, u64::MAX));
        assert_eq!(triggers.len(), 1);
        let triggers = replay.replay(action_burst(10_000, addr(BRIDGE_2), true, u64::MAX));
        assert_eq!(triggers.len(), 0);
    }

    #[test]
    fn test_switch_state_display() {
        assert_eq!(expected_state(true).to_string(), "24102h,31097s,32768b,3612k,on");
        assert_eq!(expected_state(false).to_string(), "24102h,31097s,32768b,3612k,off");
    }
}
