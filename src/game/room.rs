//! Room state and authoritative tick loop
//!
//! A room is a single logical actor: every mutation of its data model
//! happens on its own task, fed by an inbox. The physics loop runs at 60 Hz,
//! snapshots go out at 20 Hz, and the pre-race countdown runs on its own
//! 1 Hz timer.

use dashmap::DashMap;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, AtomicU8, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::time::{interval, MissedTickBehavior};
use tracing::{info, warn};
use uuid::Uuid;

use crate::game::arbiter::RaceArbiter;
use crate::game::physics::{Integrator, PHYSICS_TICK_RATE};
use crate::game::snapshot::{car_snapshot, SnapshotBuilder};
use crate::game::{Car, Outbound, RoomCommand, SessionRegistry, Target};
use crate::store::{LeaderboardStore, RaceReplay, ReplayStore};
use crate::track::Track;
use crate::util::time::unix_millis;
use crate::ws::protocol::{
    codes, GameEvent, PlayerProfile, RaceResult, RoomInfo, RoomPhase, RoomSettings, ServerMsg,
};

pub const MIN_PLAYERS_TO_START: usize = 1;
pub const COUNTDOWN_SECONDS: u32 = 3;
/// Pause between "GO!" and the first simulated tick
pub const GREEN_LIGHT_DELAY_MS: u64 = 500;
/// Waiting rooms idle longer than this are reaped
pub const ROOM_IDLE_TIMEOUT_MS: u64 = 5 * 60 * 1000;
/// Chat messages are truncated to this length
const CHAT_MAX_LEN: usize = 200;

const PLAYER_COLORS: [&str; 8] = [
    "#e6194b", "#3cb44b", "#ffe119", "#4363d8", "#f58231", "#911eb4", "#46f0f0", "#f032e6",
];

/// Lightweight room view shared with the manager for join checks and GC.
/// Only the room task writes it.
#[derive(Debug)]
pub struct RoomMeta {
    pub player_count: AtomicUsize,
    phase: AtomicU8,
    pub last_activity: AtomicU64,
    pub host: Uuid,
    pub max_players: usize,
    pub lap_count: u32,
    pub track_id: String,
    pub is_private: bool,
    pub allow_mid_race_join: bool,
}

impl RoomMeta {
    fn new(host: Uuid, settings: &RoomSettings, track_id: String, now: u64) -> Self {
        Self {
            player_count: AtomicUsize::new(0),
            phase: AtomicU8::new(0),
            last_activity: AtomicU64::new(now),
            host,
            max_players: settings.max_players,
            lap_count: settings.lap_count,
            track_id,
            is_private: settings.is_private,
            allow_mid_race_join: settings.allow_mid_race_join,
        }
    }

    pub fn phase(&self) -> RoomPhase {
        match self.phase.load(Ordering::Relaxed) {
            0 => RoomPhase::Waiting,
            1 => RoomPhase::Countdown,
            2 => RoomPhase::Racing,
            _ => RoomPhase::Results,
        }
    }

    fn set_phase(&self, phase: RoomPhase) {
        let encoded = match phase {
            RoomPhase::Waiting => 0,
            RoomPhase::Countdown => 1,
            RoomPhase::Racing => 2,
            RoomPhase::Results => 3,
        };
        self.phase.store(encoded, Ordering::Relaxed);
    }
}

/// Handle to a running room
#[derive(Debug, Clone)]
pub struct RoomHandle {
    pub id: Uuid,
    pub code: String,
    pub inbox: mpsc::Sender<RoomCommand>,
    pub meta: Arc<RoomMeta>,
}

/// Whether the room task should keep running after a command
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Flow {
    Continue,
    Shutdown,
}

/// All state owned by one room. Methods are synchronous so tests can drive
/// ticks deterministically; the async actor wraps them with timers.
pub struct RoomState {
    pub id: Uuid,
    pub code: String,
    pub host: Uuid,
    pub settings: RoomSettings,
    phase: RoomPhase,
    pub track: Track,
    pub players: HashMap<Uuid, PlayerProfile>,
    pub cars: HashMap<Uuid, Car>,
    arbiter: Option<RaceArbiter>,
    snapshots: SnapshotBuilder,
    pending_events: Vec<GameEvent>,
    countdown: u32,
    /// Epoch ms at which countdown flips into racing
    green_light_at: Option<u64>,
    /// Epoch ms of the green light; origin of the race clock
    race_started_at: Option<u64>,
    pub results: Vec<RaceResult>,
    next_spawn: usize,
    had_players: bool,
    meta: Arc<RoomMeta>,
}

impl RoomState {
    pub fn new(
        id: Uuid,
        code: String,
        host: Uuid,
        settings: RoomSettings,
        track: Track,
        meta: Arc<RoomMeta>,
    ) -> Self {
        Self {
            id,
            code,
            host,
            settings,
            phase: RoomPhase::Waiting,
            track,
            players: HashMap::new(),
            cars: HashMap::new(),
            arbiter: None,
            snapshots: SnapshotBuilder::new(),
            pending_events: Vec::new(),
            countdown: 0,
            green_light_at: None,
            race_started_at: None,
            results: Vec::new(),
            next_spawn: 0,
            had_players: false,
            meta,
        }
    }

    pub fn phase(&self) -> RoomPhase {
        self.phase
    }

    fn set_phase(&mut self, phase: RoomPhase) {
        self.phase = phase;
        self.meta.set_phase(phase);
    }

    pub fn is_empty(&self) -> bool {
        self.had_players && self.players.is_empty()
    }

    /// True while the 1 Hz countdown timer should be running
    pub fn countdown_active(&self) -> bool {
        self.phase == RoomPhase::Countdown && self.green_light_at.is_none()
    }

    pub fn info(&self) -> RoomInfo {
        RoomInfo {
            id: self.id,
            code: self.code.clone(),
            host_id: self.host,
            state: self.phase,
            players: self.players.len(),
            max_players: self.settings.max_players,
            lap_count: self.settings.lap_count,
            track_id: self.track.id.clone(),
            is_private: self.settings.is_private,
        }
    }

    fn touch(&self, now: u64) {
        self.meta.last_activity.store(now, Ordering::Relaxed);
    }

    fn sync_player_count(&self) {
        self.meta
            .player_count
            .store(self.players.len(), Ordering::Relaxed);
    }

    /// Race clock in milliseconds
    fn elapsed(&self, now: u64) -> u64 {
        self.race_started_at
            .map(|start| now.saturating_sub(start))
            .unwrap_or(0)
    }

    /// Apply one inbox command. Returns Shutdown when the room should die.
    pub fn apply(&mut self, cmd: RoomCommand, now: u64, out: &mut Vec<Outbound>) -> Flow {
        self.touch(now);
        match cmd {
            RoomCommand::Join {
                session_id,
                nickname,
                color,
            } => self.handle_join(session_id, nickname, color, out),
            RoomCommand::Leave { session_id } => {
                self.remove_player(session_id, "left", out);
            }
            RoomCommand::Disconnected { session_id } => {
                if let Some(player) = self.players.get_mut(&session_id) {
                    player.connected = false;
                    info!(room_id = %self.id, session_id = %session_id, "player disconnected");
                }
            }
            RoomCommand::Reconnected { session_id } => self.handle_reconnect(session_id, out),
            RoomCommand::Evict { session_id } => {
                let stale = self
                    .players
                    .get(&session_id)
                    .map(|p| !p.connected)
                    .unwrap_or(false);
                if stale {
                    self.remove_player(session_id, "timeout", out);
                }
            }
            RoomCommand::SetReady { session_id, ready } => {
                if let Some(player) = self.players.get_mut(&session_id) {
                    player.ready = ready || player.is_host;
                    out.push(Outbound::all(ServerMsg::PlayerReady {
                        player_id: session_id,
                        ready: player.ready,
                    }));
                }
            }
            RoomCommand::StartGame { session_id } => self.handle_start(session_id, out),
            RoomCommand::Input { session_id, frame } => {
                if matches!(self.phase, RoomPhase::Countdown | RoomPhase::Racing) {
                    if let Some(car) = self.cars.get_mut(&session_id) {
                        if frame.sequence > car.last_input_sequence {
                            car.last_input_sequence = frame.sequence;
                            car.input = frame;
                        }
                    }
                }
            }
            RoomCommand::Chat {
                session_id,
                message,
            } => {
                if self.settings.enable_chat {
                    if let Some(player) = self.players.get(&session_id) {
                        let mut message = message.trim().to_string();
                        message.truncate(CHAT_MAX_LEN);
                        if !message.is_empty() {
                            out.push(Outbound::all(ServerMsg::Chat {
                                player_id: session_id,
                                nickname: player.nickname.clone(),
                                message,
                            }));
                        }
                    }
                }
            }
            RoomCommand::Emote { session_id, emote } => {
                if self.players.contains_key(&session_id) {
                    out.push(Outbound::all(ServerMsg::Emote {
                        player_id: session_id,
                        emote,
                    }));
                }
            }
            RoomCommand::Shutdown => return Flow::Shutdown,
        }
        if self.is_empty() {
            return Flow::Shutdown;
        }
        Flow::Continue
    }

    fn handle_join(
        &mut self,
        session_id: Uuid,
        nickname: String,
        color: Option<String>,
        out: &mut Vec<Outbound>,
    ) {
        if self.players.contains_key(&session_id) {
            // idempotent re-join: resend the room state
            out.push(Outbound::only(
                session_id,
                ServerMsg::RoomJoined {
                    room: self.info(),
                    players: self.players.values().cloned().collect(),
                    player_id: session_id,
                },
            ));
            return;
        }
        if self.players.len() >= self.settings.max_players {
            out.push(Outbound::only(
                session_id,
                ServerMsg::error(codes::JOIN_FAILED, "Room is full"),
            ));
            return;
        }
        if self.phase == RoomPhase::Racing && !self.settings.allow_mid_race_join {
            out.push(Outbound::only(
                session_id,
                ServerMsg::error(codes::JOIN_FAILED, "Race in progress"),
            ));
            return;
        }

        let is_host = session_id == self.host;
        let profile = PlayerProfile {
            player_id: session_id,
            nickname,
            color: color
                .unwrap_or_else(|| PLAYER_COLORS[self.players.len() % PLAYER_COLORS.len()].to_string()),
            ready: is_host,
            is_host,
            connected: true,
        };

        out.push(Outbound::except(
            session_id,
            ServerMsg::PlayerJoined {
                player: profile.clone(),
            },
        ));
        self.players.insert(session_id, profile);
        self.had_players = true;
        self.sync_player_count();

        out.push(Outbound::only(
            session_id,
            ServerMsg::RoomJoined {
                room: self.info(),
                players: self.players.values().cloned().collect(),
                player_id: session_id,
            },
        ));

        info!(
            room_id = %self.id,
            session_id = %session_id,
            player_count = self.players.len(),
            "player joined room"
        );

        // Joiners during countdown take a grid slot; mid-race joiners get a
        // car and the full race context
        if matches!(self.phase, RoomPhase::Countdown | RoomPhase::Racing) {
            self.spawn_car(session_id);
            out.push(Outbound::only(
                session_id,
                ServerMsg::GameStarting {
                    countdown: self.countdown,
                    track: Box::new(self.track.clone()),
                    cars: self.cars.values().map(car_snapshot).collect(),
                },
            ));
            self.snapshots.force_next();
        }
    }

    fn handle_reconnect(&mut self, session_id: Uuid, out: &mut Vec<Outbound>) {
        if let Some(player) = self.players.get_mut(&session_id) {
            player.connected = true;
            info!(room_id = %self.id, session_id = %session_id, "player reconnected");
            out.push(Outbound::only(
                session_id,
                ServerMsg::RoomJoined {
                    room: self.info(),
                    players: self.players.values().cloned().collect(),
                    player_id: session_id,
                },
            ));
            if matches!(self.phase, RoomPhase::Countdown | RoomPhase::Racing) {
                out.push(Outbound::only(
                    session_id,
                    ServerMsg::GameStarting {
                        countdown: self.countdown,
                        track: Box::new(self.track.clone()),
                        cars: self.cars.values().map(car_snapshot).collect(),
                    },
                ));
            }
        }
    }

    fn remove_player(&mut self, session_id: Uuid, reason: &str, out: &mut Vec<Outbound>) {
        if self.players.remove(&session_id).is_none() {
            return;
        }
        self.cars.remove(&session_id);
        self.sync_player_count();
        out.push(Outbound::only(
            session_id,
            ServerMsg::RoomLeft {
                reason: reason.to_string(),
            },
        ));
        out.push(Outbound::all(ServerMsg::PlayerLeft {
            player_id: session_id,
            reason: reason.to_string(),
        }));
        info!(room_id = %self.id, session_id = %session_id, reason, "player left room");
    }

    fn handle_start(&mut self, session_id: Uuid, out: &mut Vec<Outbound>) {
        if session_id != self.host {
            out.push(Outbound::only(
                session_id,
                ServerMsg::error(codes::NOT_HOST, "Only the host can start the race"),
            ));
            return;
        }
        if !matches!(self.phase, RoomPhase::Waiting | RoomPhase::Results) {
            out.push(Outbound::only(
                session_id,
                ServerMsg::error(codes::CANNOT_START, "Race already running"),
            ));
            return;
        }

        let ready: Vec<Uuid> = self
            .players
            .values()
            .filter(|p| p.ready && p.connected)
            .map(|p| p.player_id)
            .collect();
        if ready.len() < MIN_PLAYERS_TO_START {
            out.push(Outbound::only(
                session_id,
                ServerMsg::error(codes::CANNOT_START, "Not enough ready players"),
            ));
            return;
        }

        let arbiter = match RaceArbiter::new(
            &self.track,
            self.settings.lap_count,
            self.settings.auto_respawn,
        ) {
            Some(arbiter) => arbiter,
            None => {
                out.push(Outbound::only(
                    session_id,
                    ServerMsg::error(codes::CANNOT_START, "Track has no finish line"),
                ));
                return;
            }
        };

        // Reset any previous race
        self.cars.clear();
        self.results.clear();
        self.pending_events.clear();
        self.race_started_at = None;
        self.green_light_at = None;

        self.arbiter = Some(arbiter);
        for player_id in ready {
            self.spawn_car(player_id);
        }

        self.countdown = COUNTDOWN_SECONDS;
        self.set_phase(RoomPhase::Countdown);

        out.push(Outbound::all(ServerMsg::GameStarting {
            countdown: COUNTDOWN_SECONDS,
            track: Box::new(self.track.clone()),
            cars: self.cars.values().map(car_snapshot).collect(),
        }));
        info!(room_id = %self.id, cars = self.cars.len(), "race starting");
    }

    fn spawn_car(&mut self, player_id: Uuid) {
        let spawns = self.track.spawns();
        if spawns.is_empty() {
            warn!(room_id = %self.id, "track has no spawns");
            return;
        }
        let spawn = spawns[self.next_spawn % spawns.len()];
        self.next_spawn = self.next_spawn.wrapping_add(1);
        self.cars.insert(player_id, Car::at_spawn(player_id, spawn));
    }

    /// One step of the 1 Hz countdown timer: emit the current count, then
    /// schedule the green light after "GO!".
    pub fn countdown_tick(&mut self, now: u64, out: &mut Vec<Outbound>) {
        if self.phase != RoomPhase::Countdown || self.green_light_at.is_some() {
            return;
        }
        out.push(Outbound::all(ServerMsg::Countdown {
            count: self.countdown,
        }));
        if self.countdown == 0 {
            self.green_light_at = Some(now + GREEN_LIGHT_DELAY_MS);
        } else {
            self.countdown -= 1;
        }
    }

    /// One fixed physics tick
    pub fn tick(&mut self, now: u64, out: &mut Vec<Outbound>) {
        match self.phase {
            RoomPhase::Waiting | RoomPhase::Results => {}
            RoomPhase::Countdown => {
                if let Some(go) = self.green_light_at {
                    if now >= go {
                        self.set_phase(RoomPhase::Racing);
                        self.race_started_at = Some(now);
                        out.push(Outbound::all(ServerMsg::GameStarted { start_time: now }));
                        info!(room_id = %self.id, "race started");
                    }
                }
            }
            RoomPhase::Racing => self.racing_tick(now, out),
        }
    }

    fn racing_tick(&mut self, now: u64, out: &mut Vec<Outbound>) {
        self.touch(now);
        let elapsed = self.elapsed(now);
        let wrap = self.track.wrap_around;
        let (width, height) = (self.track.width as f64, self.track.height as f64);

        for car in self.cars.values_mut() {
            let input = car.input;
            Integrator::step(car, &input);
            if wrap {
                Integrator::wrap_position(car, width, height);
            }
        }

        let mut events = Vec::new();

        {
            let mut car_refs: Vec<&mut Car> = self.cars.values_mut().collect();
            for hit in Integrator::resolve_collisions(&mut car_refs) {
                events.push(GameEvent::Collision {
                    player_id: hit.a,
                    other_id: hit.b,
                    impact: hit.impact,
                });
            }
        }

        if let Some(arbiter) = self.arbiter.as_mut() {
            for car in self.cars.values_mut() {
                arbiter.tick_car(car, elapsed, &mut events);
            }
            let mut car_refs: Vec<&mut Car> = self.cars.values_mut().collect();
            arbiter.recompute_ranks(&mut car_refs);
        }

        // Discrete messages mirror the events bundled into the snapshot
        for event in &events {
            match event {
                GameEvent::Checkpoint {
                    player_id,
                    checkpoint,
                    time,
                } => out.push(Outbound::all(ServerMsg::CheckpointPassed {
                    player_id: *player_id,
                    checkpoint: *checkpoint,
                    time: *time,
                })),
                GameEvent::Lap {
                    player_id,
                    lap,
                    lap_time,
                } => out.push(Outbound::all(ServerMsg::LapCompleted {
                    player_id: *player_id,
                    lap: *lap,
                    lap_time: *lap_time,
                })),
                GameEvent::Finish {
                    player_id,
                    rank,
                    total_time,
                } => out.push(Outbound::all(ServerMsg::PlayerFinished {
                    player_id: *player_id,
                    position: *rank,
                    total_time: *total_time,
                })),
                GameEvent::Collision {
                    player_id,
                    other_id,
                    impact,
                } => out.push(Outbound::all(ServerMsg::Collision {
                    player_id: *player_id,
                    other_id: *other_id,
                    impact: *impact,
                })),
                GameEvent::Respawn { .. } | GameEvent::NitroPickup { .. } => {}
            }
        }
        self.pending_events.extend(events);

        let race_over = self
            .arbiter
            .as_ref()
            .map(|arbiter| arbiter.race_complete(self.cars.values(), elapsed))
            .unwrap_or(false);
        if race_over {
            self.finish_race(out);
            return;
        }

        if self.snapshots.should_send() {
            let events = std::mem::take(&mut self.pending_events);
            let snapshot =
                self.snapshots
                    .build(self.phase, now, elapsed, self.cars.values(), events);
            out.push(Outbound::all(ServerMsg::GameState { snapshot }));
        }
    }

    fn finish_race(&mut self, out: &mut Vec<Outbound>) {
        let mut cars: Vec<&Car> = self.cars.values().collect();
        cars.sort_by_key(|c| c.rank);

        self.results = cars
            .into_iter()
            .map(|car| {
                let nickname = self
                    .players
                    .get(&car.player_id)
                    .map(|p| p.nickname.clone())
                    .unwrap_or_default();
                RaceResult {
                    player_id: car.player_id,
                    nickname,
                    rank: car.rank,
                    finished: car.finished,
                    total_time: car.finish_time,
                    best_lap: car.best_lap(),
                    lap_times: car.lap_times.clone(),
                }
            })
            .collect();

        self.set_phase(RoomPhase::Results);
        out.push(Outbound::all(ServerMsg::RaceFinished {
            results: self.results.clone(),
        }));
        info!(room_id = %self.id, finishers = self.results.iter().filter(|r| r.finished).count(), "race finished");
    }
}

/// The authoritative room actor
pub struct Room {
    pub state: RoomState,
    inbox: mpsc::Receiver<RoomCommand>,
    registry: SessionRegistry,
    session_index: Arc<DashMap<Uuid, Uuid>>,
    leaderboards: Option<LeaderboardStore>,
    replays: Option<ReplayStore>,
}

impl Room {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        id: Uuid,
        code: String,
        host: Uuid,
        settings: RoomSettings,
        track: Track,
        registry: SessionRegistry,
        session_index: Arc<DashMap<Uuid, Uuid>>,
        leaderboards: Option<LeaderboardStore>,
        replays: Option<ReplayStore>,
    ) -> (Self, RoomHandle) {
        let (inbox_tx, inbox_rx) = mpsc::channel(256);
        let meta = Arc::new(RoomMeta::new(
            host,
            &settings,
            track.id.clone(),
            unix_millis(),
        ));

        let handle = RoomHandle {
            id,
            code: code.clone(),
            inbox: inbox_tx,
            meta: meta.clone(),
        };

        let room = Self {
            state: RoomState::new(id, code, host, settings, track, meta),
            inbox: inbox_rx,
            registry,
            session_index,
            leaderboards,
            replays,
        };

        (room, handle)
    }

    /// Run the room until it empties or is shut down
    pub async fn run(mut self) {
        info!(room_id = %self.state.id, code = %self.state.code, "room started");

        let tick_duration = Duration::from_micros(1_000_000 / PHYSICS_TICK_RATE as u64);
        let mut tick = interval(tick_duration);
        tick.set_missed_tick_behavior(MissedTickBehavior::Skip);
        let mut countdown: Option<tokio::time::Interval> = None;

        loop {
            let mut out = Vec::new();
            let mut flow = Flow::Continue;

            tokio::select! {
                maybe = self.inbox.recv() => match maybe {
                    Some(cmd) => flow = self.state.apply(cmd, unix_millis(), &mut out),
                    None => break,
                },
                _ = tick.tick() => {
                    let phase_before = self.state.phase();
                    self.state.tick(unix_millis(), &mut out);
                    if phase_before != RoomPhase::Results
                        && self.state.phase() == RoomPhase::Results
                    {
                        self.submit_results();
                    }
                }
                _ = maybe_tick(countdown.as_mut()) => {
                    self.state.countdown_tick(unix_millis(), &mut out);
                }
            }

            if self.state.countdown_active() {
                if countdown.is_none() {
                    countdown = Some(interval(Duration::from_secs(1)));
                }
            } else {
                countdown = None;
            }

            self.dispatch(out);

            if flow == Flow::Shutdown {
                break;
            }
        }

        // Notify whoever is left and drop their room mapping
        for session_id in self.state.players.keys() {
            self.session_index.remove(session_id);
            if let Some(tx) = self.registry.get(session_id) {
                let _ = tx.send(ServerMsg::RoomLeft {
                    reason: "closed".to_string(),
                });
            }
        }

        info!(room_id = %self.state.id, "room stopped");
    }

    fn dispatch(&self, outs: Vec<Outbound>) {
        for out in outs {
            match out.target {
                Target::All => {
                    for session_id in self.state.players.keys() {
                        self.send_to(*session_id, &out.msg);
                    }
                }
                Target::Except(excluded) => {
                    for session_id in self.state.players.keys() {
                        if *session_id != excluded {
                            self.send_to(*session_id, &out.msg);
                        }
                    }
                }
                Target::Only(session_id) => self.send_to(session_id, &out.msg),
            }
        }
    }

    fn send_to(&self, session_id: Uuid, msg: &ServerMsg) {
        if let Some(tx) = self.registry.get(&session_id) {
            // a closed channel means the session is gone; eviction handles it
            let _ = tx.send(msg.clone());
        }
    }

    /// Persist finisher best laps and the result archive off the tick path
    fn submit_results(&self) {
        let track_id = self.state.track.id.clone();

        if let Some(store) = self.leaderboards.clone() {
            let entries: Vec<(String, u64)> = self
                .state
                .results
                .iter()
                .filter(|r| r.finished)
                .filter_map(|r| r.best_lap.map(|lap| (r.nickname.clone(), lap)))
                .collect();
            if !entries.is_empty() {
                let track_id = track_id.clone();
                tokio::spawn(async move {
                    for (nickname, lap_time) in entries {
                        if let Err(error) = store.submit(&track_id, &nickname, lap_time).await {
                            warn!(%track_id, %error, "leaderboard submit failed");
                        }
                    }
                });
            }
        }

        if let Some(store) = self.replays.clone() {
            let replay = RaceReplay {
                id: Uuid::new_v4(),
                room_id: self.state.id,
                track_id,
                lap_count: self.state.settings.lap_count,
                recorded_at: unix_millis(),
                results: self.state.results.clone(),
            };
            tokio::spawn(async move {
                if let Err(error) = store.save(&replay).await {
                    warn!(room_id = %replay.room_id, %error, "replay save failed");
                }
            });
        }
    }
}

async fn maybe_tick(countdown: Option<&mut tokio::time::Interval>) {
    match countdown {
        Some(interval) => {
            interval.tick().await;
        }
        None => std::future::pending().await,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::game::InputFrame;
    use crate::track::default_track;

    fn test_state() -> (RoomState, Uuid) {
        let host = Uuid::new_v4();
        let settings = RoomSettings::default();
        let track = default_track();
        let meta = Arc::new(RoomMeta::new(host, &settings, track.id.clone(), 0));
        let state = RoomState::new(
            Uuid::new_v4(),
            "AB23CD".to_string(),
            host,
            settings,
            track,
            meta,
        );
        (state, host)
    }

    fn join(state: &mut RoomState, session_id: Uuid, nickname: &str) -> Vec<Outbound> {
        let mut out = Vec::new();
        state.apply(
            RoomCommand::Join {
                session_id,
                nickname: nickname.to_string(),
                color: None,
            },
            0,
            &mut out,
        );
        out
    }

    /// Drive countdown to the green light and into racing
    fn start_racing(state: &mut RoomState, host: Uuid, now: &mut u64) {
        let mut out = Vec::new();
        state.apply(RoomCommand::StartGame { session_id: host }, *now, &mut out);
        assert_eq!(state.phase(), RoomPhase::Countdown);
        for _ in 0..=COUNTDOWN_SECONDS {
            state.countdown_tick(*now, &mut out);
            *now += 1000;
        }
        *now += GREEN_LIGHT_DELAY_MS;
        state.tick(*now, &mut out);
        assert_eq!(state.phase(), RoomPhase::Racing);
    }

    #[test]
    fn join_makes_host_ready_and_broadcasts() {
        let (mut state, host) = test_state();
        let out = join(&mut state, host, "Ada");
        assert!(state.players[&host].is_host);
        assert!(state.players[&host].ready);
        assert!(out
            .iter()
            .any(|o| matches!(&o.msg, ServerMsg::RoomJoined { .. })));
    }

    #[test]
    fn full_room_rejects_joiners() {
        let (mut state, host) = test_state();
        state.settings.max_players = 1;
        join(&mut state, host, "Ada");
        let out = join(&mut state, Uuid::new_v4(), "Bea");
        assert!(out.iter().any(|o| matches!(
            &o.msg,
            ServerMsg::Error { code, .. } if code == codes::JOIN_FAILED
        )));
        assert_eq!(state.players.len(), 1);
    }

    #[test]
    fn only_host_starts_the_race() {
        let (mut state, host) = test_state();
        join(&mut state, host, "Ada");
        let guest = Uuid::new_v4();
        join(&mut state, guest, "Bea");

        let mut out = Vec::new();
        state.apply(RoomCommand::StartGame { session_id: guest }, 0, &mut out);
        assert_eq!(state.phase(), RoomPhase::Waiting);
        assert!(out.iter().any(|o| matches!(
            &o.msg,
            ServerMsg::Error { code, .. } if code == codes::NOT_HOST
        )));
    }

    #[test]
    fn countdown_emits_every_count_down_to_go() {
        let (mut state, host) = test_state();
        join(&mut state, host, "Ada");

        let mut out = Vec::new();
        state.apply(RoomCommand::StartGame { session_id: host }, 0, &mut out);
        assert_eq!(state.phase(), RoomPhase::Countdown);
        assert!(out
            .iter()
            .any(|o| matches!(&o.msg, ServerMsg::GameStarting { countdown: 3, .. })));

        let mut counts = Vec::new();
        let mut now = 0;
        for _ in 0..=COUNTDOWN_SECONDS {
            let mut out = Vec::new();
            state.countdown_tick(now, &mut out);
            for o in out {
                if let ServerMsg::Countdown { count } = o.msg {
                    counts.push(count);
                }
            }
            now += 1000;
        }
        assert_eq!(counts, vec![3, 2, 1, 0]);
        assert!(state.green_light_at.is_some());

        // the timer is idle after GO
        let mut out = Vec::new();
        state.countdown_tick(now, &mut out);
        assert!(out.is_empty());
    }

    #[test]
    fn input_held_through_countdown_moves_car_at_green_light() {
        let (mut state, host) = test_state();
        join(&mut state, host, "Ada");

        let mut now = 0u64;
        let mut out = Vec::new();
        state.apply(RoomCommand::StartGame { session_id: host }, now, &mut out);

        // input lands during the countdown
        state.apply(
            RoomCommand::Input {
                session_id: host,
                frame: InputFrame {
                    sequence: 1,
                    accelerate: true,
                    ..Default::default()
                },
            },
            now,
            &mut out,
        );
        assert_eq!(state.cars[&host].last_input_sequence, 1);
        assert_eq!(state.cars[&host].speed, 0.0);

        for _ in 0..=COUNTDOWN_SECONDS {
            state.countdown_tick(now, &mut out);
            now += 1000;
        }
        now += GREEN_LIGHT_DELAY_MS;
        state.tick(now, &mut out);
        assert_eq!(state.phase(), RoomPhase::Racing);

        // within the first broadcast interval the car is already moving
        let mut snapshot_speed = None;
        for _ in 0..3 {
            now += 17;
            let mut out = Vec::new();
            state.tick(now, &mut out);
            for o in out {
                if let ServerMsg::GameState { snapshot } = o.msg {
                    snapshot_speed = Some(snapshot.cars[0].speed);
                }
            }
        }
        assert!(snapshot_speed.expect("snapshot due after 3 ticks") > 0.0);
    }

    #[test]
    fn snapshot_sequence_is_monotonic_across_broadcasts() {
        let (mut state, host) = test_state();
        join(&mut state, host, "Ada");
        let mut now = 0u64;
        start_racing(&mut state, host, &mut now);

        let mut sequences = Vec::new();
        for _ in 0..12 {
            now += 17;
            let mut out = Vec::new();
            state.tick(now, &mut out);
            for o in out {
                if let ServerMsg::GameState { snapshot } = o.msg {
                    sequences.push(snapshot.sequence);
                }
            }
        }
        assert_eq!(sequences, vec![1, 2, 3, 4]);
    }

    #[test]
    fn wrap_track_keeps_broadcast_positions_in_bounds() {
        let (mut state, host) = test_state();
        state.track.wrap_around = true;
        join(&mut state, host, "Ada");
        let mut now = 0u64;
        start_racing(&mut state, host, &mut now);

        // aim straight up (-y) and drive; the car must wrap, never leave bounds
        state.apply(
            RoomCommand::Input {
                session_id: host,
                frame: InputFrame {
                    sequence: 1,
                    accelerate: true,
                    ..Default::default()
                },
            },
            now,
            &mut out_sink(),
        );
        for _ in 0..60 * 8 {
            now += 17;
            let mut out = Vec::new();
            state.tick(now, &mut out);
            for o in out {
                if let ServerMsg::GameState { snapshot } = o.msg {
                    let car = &snapshot.cars[0];
                    assert!(car.x >= 0.0 && car.x < state.track.width as f64);
                    assert!(car.y >= 0.0 && car.y < state.track.height as f64);
                }
            }
        }
    }

    fn out_sink() -> Vec<Outbound> {
        Vec::new()
    }

    #[test]
    fn leaving_last_player_shuts_the_room_down() {
        let (mut state, host) = test_state();
        join(&mut state, host, "Ada");
        let mut out = Vec::new();
        let flow = state.apply(RoomCommand::Leave { session_id: host }, 0, &mut out);
        assert_eq!(flow, Flow::Shutdown);
    }

    #[test]
    fn evict_only_fires_for_still_disconnected_players() {
        let (mut state, host) = test_state();
        join(&mut state, host, "Ada");
        let guest = Uuid::new_v4();
        join(&mut state, guest, "Bea");

        let mut out = Vec::new();
        state.apply(RoomCommand::Disconnected { session_id: guest }, 0, &mut out);
        state.apply(RoomCommand::Reconnected { session_id: guest }, 1, &mut out);
        state.apply(RoomCommand::Evict { session_id: guest }, 2, &mut out);
        assert!(state.players.contains_key(&guest));

        state.apply(RoomCommand::Disconnected { session_id: guest }, 3, &mut out);
        state.apply(RoomCommand::Evict { session_id: guest }, 4, &mut out);
        assert!(!state.players.contains_key(&guest));
    }

    #[test]
    fn chat_respects_room_setting() {
        let (mut state, host) = test_state();
        join(&mut state, host, "Ada");

        let mut out = Vec::new();
        state.apply(
            RoomCommand::Chat {
                session_id: host,
                message: "  hello  ".to_string(),
            },
            0,
            &mut out,
        );
        assert!(out.iter().any(|o| matches!(
            &o.msg,
            ServerMsg::Chat { message, .. } if message == "hello"
        )));

        state.settings.enable_chat = false;
        let mut out = Vec::new();
        state.apply(
            RoomCommand::Chat {
                session_id: host,
                message: "quiet".to_string(),
            },
            0,
            &mut out,
        );
        assert!(out.is_empty());
    }

    #[test]
    fn mid_race_join_gets_game_context() {
        let (mut state, host) = test_state();
        join(&mut state, host, "Ada");
        let mut now = 0u64;
        start_racing(&mut state, host, &mut now);

        let joiner = Uuid::new_v4();
        let out = join(&mut state, joiner, "Bea");
        assert!(state.cars.contains_key(&joiner));
        assert!(out.iter().any(|o| matches!(
            o,
            Outbound { target: Target::Only(id), msg: ServerMsg::GameStarting { .. } } if *id == joiner
        )));

        state.settings.allow_mid_race_join = false;
        let blocked = Uuid::new_v4();
        let out = join(&mut state, blocked, "Cee");
        assert!(out.iter().any(|o| matches!(
            &o.msg,
            ServerMsg::Error { code, .. } if code == codes::JOIN_FAILED
        )));
    }
}
