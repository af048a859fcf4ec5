use analysis::{normalize, SearchLine};
use engine::{format_uci_move, EngineCommand, EngineError, EngineEvent, GoParams, SearchInfo};
use tokio::sync::{broadcast, mpsc};
use tokio::time::{self, Instant};
use tracing::Instrument;

use crate::commands::{SessionCommand, SessionError};
use crate::events::SessionEvent;
use crate::state::{AnalysisRequest, Deadline, SessionPhase, SessionState};

/// The main session actor loop. Owns all mutable state; commands,
/// engine events, and timer expirations are serialized through one
/// task, so no engine command is ever issued from caller context.
pub(crate) async fn run_session_actor(
    state: SessionState,
    cmd_rx: mpsc::Receiver<SessionCommand>,
    event_tx: broadcast::Sender<SessionEvent>,
) {
    let session_id = state.session_id.clone();
    run_session_actor_inner(state, cmd_rx, event_tx)
        .instrument(tracing::info_span!("session", id = %session_id))
        .await;
}

async fn run_session_actor_inner(
    mut state: SessionState,
    mut cmd_rx: mpsc::Receiver<SessionCommand>,
    event_tx: broadcast::Sender<SessionEvent>,
) {
    tracing::info!("Session actor started");

    // The health check is a periodic tick, not driven by message
    // arrival, so a worker that goes silent (rather than erroring) is
    // still detected.
    let mut health = time::interval(time::Duration::from_secs(1));
    health.set_missed_tick_behavior(time::MissedTickBehavior::Skip);

    loop {
        let (deadline_at, deadline_kind) = match state.next_deadline() {
            Some((at, kind)) => (at, Some(kind)),
            None => (Instant::now() + time::Duration::from_secs(3600), None),
        };

        tokio::select! {
            biased;

            cmd = cmd_rx.recv() => {
                match cmd {
                    Some(SessionCommand::Terminate) | None => {
                        tracing::info!("Session actor terminating");
                        if let Some(mut transport) = state.transport.take() {
                            transport.shutdown().await;
                        }
                        break;
                    }
                    Some(cmd) => handle_command(&mut state, cmd, &event_tx).await,
                }
            }

            event = state.next_engine_event() => {
                handle_engine_event(&mut state, event, &event_tx).await;
            }

            _ = time::sleep_until(deadline_at), if deadline_kind.is_some() => {
                if let Some(kind) = deadline_kind {
                    handle_deadline(&mut state, kind, &event_tx).await;
                }
            }

            _ = health.tick(), if state.phase == SessionPhase::Analyzing => {
                if state.last_activity.elapsed() >= state.config.liveness_timeout {
                    tracing::warn!("No engine activity while analyzing; treating worker as hung");
                    enter_failed(&mut state, &event_tx, SessionError::EngineStalled);
                }
            }
        }
    }

    tracing::info!("Session actor exited");
}

async fn handle_command(
    state: &mut SessionState,
    cmd: SessionCommand,
    event_tx: &broadcast::Sender<SessionEvent>,
) {
    match cmd {
        SessionCommand::Init { reply } => match state.phase {
            SessionPhase::Uninitialized | SessionPhase::Failed => {
                state.init_replies.push(reply);
                // Explicit init resets the retry budget.
                state.recovery_attempts = 0;
                state.next_backoff = state.config.recovery_backoff;
                state.recovery_deadline = None;
                start_worker(state, event_tx).await;
            }
            SessionPhase::Initializing => {
                state.init_replies.push(reply);
            }
            SessionPhase::Ready | SessionPhase::Analyzing | SessionPhase::Stopping => {
                let _ = reply.send(Ok(()));
            }
        },
        SessionCommand::Analyze { position, options } => {
            state.admit_request(position, options);
        }
        SessionCommand::Stop => {
            // Caller-initiated stop also cancels anything still inside
            // its debounce window.
            state.pending = None;
            state.debounce_deadline = None;
            match state.phase {
                SessionPhase::Analyzing => begin_stop(state, event_tx, true).await,
                SessionPhase::Stopping => {
                    if state.aggregator.is_analyzing() {
                        state.aggregator.finalize();
                        emit_eval(state, event_tx);
                    }
                }
                _ => {}
            }
        }
        SessionCommand::SetLineCount { count } => {
            state.line_count = count.clamp(1, analysis::MAX_LINES as u8);
            emit_state(state, event_tx);
        }
        SessionCommand::SetDepth { depth } => {
            state.depth_limit = Some(depth);
            emit_state(state, event_tx);
        }
        SessionCommand::GetSnapshot { reply } => {
            let _ = reply.send(state.snapshot());
        }
        SessionCommand::Subscribe { reply } => {
            let _ = reply.send((state.snapshot(), event_tx.subscribe()));
        }
        SessionCommand::Terminate => unreachable!(),
    }
}

async fn handle_engine_event(
    state: &mut SessionState,
    event: EngineEvent,
    event_tx: &broadcast::Sender<SessionEvent>,
) {
    state.last_activity = Instant::now();

    match event {
        EngineEvent::HandshakeComplete => {
            if state.phase == SessionPhase::Initializing && !state.handshake_done {
                state.handshake_done = true;
                configure_engine(state, event_tx).await;
            } else {
                tracing::debug!("Ignoring unexpected uciok");
            }
        }
        EngineEvent::ReadyAcknowledged => {
            if state.phase == SessionPhase::Initializing && state.handshake_done {
                enter_ready(state, event_tx);
                try_dispatch(state, event_tx).await;
            } else {
                tracing::debug!("Ignoring unexpected readyok");
            }
        }
        EngineEvent::Info(info) => {
            handle_search_info(state, info, event_tx);
        }
        EngineEvent::BestMove { mv, .. } => {
            if state.stale_bestmoves > 0 {
                // Ack from a search we already force-timed-out.
                state.stale_bestmoves -= 1;
                tracing::debug!(mv = %format_uci_move(&mv), "Discarding stale bestmove");
                return;
            }
            match state.phase {
                SessionPhase::Stopping | SessionPhase::Analyzing => {
                    tracing::debug!(mv = %format_uci_move(&mv), "Search finished");
                    finish_search(state, event_tx).await;
                }
                _ => {
                    tracing::debug!(mv = %format_uci_move(&mv), "Ignoring bestmove");
                }
            }
        }
        EngineEvent::Closed { reason } => {
            tracing::warn!("Engine transport closed: {}", reason);
            enter_failed(state, event_tx, SessionError::Transport(reason));
        }
    }
}

fn handle_search_info(
    state: &mut SessionState,
    info: SearchInfo,
    event_tx: &broadcast::Sender<SessionEvent>,
) {
    if !matches!(
        state.phase,
        SessionPhase::Analyzing | SessionPhase::Stopping
    ) {
        return;
    }
    let Some(live) = state.live.as_ref() else {
        return;
    };
    if !info.is_search_record() {
        return;
    }
    let Some(score) = info.score else {
        return;
    };

    // Perspective normalization happens exactly here, at the protocol
    // boundary; everything downstream is reference-side.
    let score = normalize(convert_score(score), live.side_to_move);
    let line = SearchLine {
        multipv: info.multipv.unwrap_or(1),
        score,
        depth: info.depth.unwrap_or(0),
        seldepth: info.seldepth,
        pv: info.pv.iter().map(format_uci_move).collect(),
        nodes: info.nodes,
        nps: info.nps,
        time_ms: info.time_ms,
    };

    let live_id = live.id;
    if state.aggregator.record_line(live_id, line) {
        emit_eval(state, event_tx);
    }
}

fn convert_score(score: engine::Score) -> analysis::Score {
    match score {
        engine::Score::Centipawns(cp) => analysis::Score::Centipawns(cp),
        engine::Score::Mate(m) => analysis::Score::Mate(m),
    }
}

async fn handle_deadline(
    state: &mut SessionState,
    kind: Deadline,
    event_tx: &broadcast::Sender<SessionEvent>,
) {
    match kind {
        Deadline::Debounce => {
            state.debounce_deadline = None;
            try_dispatch(state, event_tx).await;
        }
        Deadline::Init => {
            state.init_deadline = None;
            enter_failed(state, event_tx, SessionError::InitTimeout);
        }
        Deadline::Stop => {
            // Engines are not fully trusted to acknowledge stop under
            // load; force the transition and discount the late ack.
            state.stop_deadline = None;
            state.stale_bestmoves += 1;
            tracing::warn!("No bestmove after stop; forcing transition to ready");
            finish_search(state, event_tx).await;
        }
        Deadline::Recovery => {
            state.recovery_deadline = None;
            tracing::info!(
                attempt = state.recovery_attempts,
                "Attempting engine recovery"
            );
            start_worker(state, event_tx).await;
        }
    }
}

/// Spawn a worker and begin the handshake.
async fn start_worker(state: &mut SessionState, event_tx: &broadcast::Sender<SessionEvent>) {
    state.handshake_done = false;
    state.engine_line_count = None;

    let spawner = state.spawner.clone();
    match spawner.spawn().await {
        Ok(transport) => {
            state.transport = Some(transport);
            state.set_phase(SessionPhase::Initializing);
            state.init_deadline = Some(Instant::now() + state.config.init_timeout);
            emit_state(state, event_tx);
            send_engine(state, event_tx, EngineCommand::Uci).await;
        }
        Err(e) => {
            enter_failed(state, event_tx, SessionError::WorkerStart(e.to_string()));
        }
    }
}

/// `uciok` received: apply options, then the synchronous-ready round
/// trip that completes initialization.
async fn configure_engine(state: &mut SessionState, event_tx: &broadcast::Sender<SessionEvent>) {
    if !send_engine(state, event_tx, EngineCommand::NewGame).await {
        return;
    }

    let line_count = state.line_count;
    if !send_engine(
        state,
        event_tx,
        EngineCommand::SetOption {
            name: "MultiPV".to_string(),
            value: Some(line_count.to_string()),
        },
    )
    .await
    {
        return;
    }
    state.engine_line_count = Some(line_count);

    if let Some(threads) = state.config.threads {
        let threads = threads.clamp(1, 16);
        if !send_engine(
            state,
            event_tx,
            EngineCommand::SetOption {
                name: "Threads".to_string(),
                value: Some(threads.to_string()),
            },
        )
        .await
        {
            return;
        }
    }

    if let Some(hash_mb) = state.config.hash_mb {
        let hash_mb = hash_mb.clamp(1, 2048);
        if !send_engine(
            state,
            event_tx,
            EngineCommand::SetOption {
                name: "Hash".to_string(),
                value: Some(hash_mb.to_string()),
            },
        )
        .await
        {
            return;
        }
    }

    send_engine(state, event_tx, EngineCommand::IsReady).await;
}

/// `readyok` received: initialization is complete.
fn enter_ready(state: &mut SessionState, event_tx: &broadcast::Sender<SessionEvent>) {
    state.init_deadline = None;
    state.recovery_attempts = 0;
    state.next_backoff = state.config.recovery_backoff;
    state.last_error = None;
    state.resolve_init(Ok(()));

    // A request interrupted by a failure is resubmitted automatically,
    // unless a newer one arrived in the meantime.
    if let Some(request) = state.resubmit.take() {
        if state.pending.is_none() {
            tracing::info!(
                request_id = request.id,
                "Resubmitting request interrupted by engine failure"
            );
            state.pending = Some(request);
            state.debounce_deadline = None;
        }
    }

    state.set_phase(SessionPhase::Ready);
    emit_state(state, event_tx);
}

/// Dispatch the pending request if its quiescence window has elapsed
/// and the session can accept it right now.
async fn try_dispatch(state: &mut SessionState, event_tx: &broadcast::Sender<SessionEvent>) {
    let due = state.pending.is_some() && state.debounce_deadline.is_none();
    if !due {
        return;
    }

    match state.phase {
        SessionPhase::Ready => {
            if let Some(request) = state.pending.take() {
                // Only the newest issued id may dispatch; anything else
                // was superseded while waiting.
                if request.id == state.next_request_id {
                    dispatch(state, event_tx, request).await;
                } else {
                    tracing::debug!(request_id = request.id, "Dropping superseded request");
                }
            }
        }
        SessionPhase::Analyzing => begin_stop(state, event_tx, false).await,
        // Stopping: dispatched on the Ready transition.
        // Initializing/Failed: dispatched once init or recovery lands.
        _ => {}
    }
}

async fn dispatch(
    state: &mut SessionState,
    event_tx: &broadcast::Sender<SessionEvent>,
    request: AnalysisRequest,
) {
    tracing::info!(
        request_id = request.id,
        position = %request.position,
        depth = ?request.depth,
        lines = request.line_count,
        "Dispatching analysis"
    );

    // Stale lines are cleared here, synchronously with the dispatch
    // and never on stop alone, so the previous evaluation stays
    // visible right up to the moment its successor takes over.
    state.aggregator.reset(request.id);
    state.live = Some(request.clone());
    state.set_phase(SessionPhase::Analyzing);
    emit_state(state, event_tx);
    emit_eval(state, event_tx);

    if state.engine_line_count != Some(request.line_count) {
        if !send_engine(
            state,
            event_tx,
            EngineCommand::SetOption {
                name: "MultiPV".to_string(),
                value: Some(request.line_count.to_string()),
            },
        )
        .await
        {
            return;
        }
        state.engine_line_count = Some(request.line_count);
    }

    if !send_engine(
        state,
        event_tx,
        EngineCommand::SetPosition {
            fen: request.position,
        },
    )
    .await
    {
        return;
    }

    send_engine(
        state,
        event_tx,
        EngineCommand::Go(GoParams {
            depth: request.depth,
        }),
    )
    .await;
}

/// Ask the engine to stop the running search. With `explicit` the
/// caller wants analysis off: the display flag clears immediately, but
/// the computed lines stay visible.
async fn begin_stop(
    state: &mut SessionState,
    event_tx: &broadcast::Sender<SessionEvent>,
    explicit: bool,
) {
    if state.phase != SessionPhase::Analyzing {
        return;
    }

    if !send_engine(state, event_tx, EngineCommand::Stop).await {
        return;
    }
    state.stop_deadline = Some(Instant::now() + state.config.stop_timeout);
    state.set_phase(SessionPhase::Stopping);
    if explicit {
        state.aggregator.finalize();
        emit_eval(state, event_tx);
    }
    emit_state(state, event_tx);
}

/// The running search ended: bestmove arrived, the stop wait timed
/// out, or a depth-limited search completed naturally.
async fn finish_search(state: &mut SessionState, event_tx: &broadcast::Sender<SessionEvent>) {
    state.stop_deadline = None;
    state.aggregator.finalize();
    state.live = None;
    state.set_phase(SessionPhase::Ready);
    emit_state(state, event_tx);
    emit_eval(state, event_tx);

    // A request queued while stopping dispatches immediately.
    try_dispatch(state, event_tx).await;
}

/// Transport or liveness fault: tear the worker down, keep the work,
/// and schedule a bounded recovery.
fn enter_failed(
    state: &mut SessionState,
    event_tx: &broadcast::Sender<SessionEvent>,
    error: SessionError,
) {
    if state.phase == SessionPhase::Failed {
        return;
    }

    let reason = error.to_string();
    tracing::warn!("Session failed: {}", reason);

    state.resolve_init(Err(error));
    if state.live.is_some() {
        state.resubmit = state.live.take();
    }
    state.release_transport();
    state.handshake_done = false;
    state.engine_line_count = None;
    state.init_deadline = None;
    state.stop_deadline = None;
    state.stale_bestmoves = 0;
    state.aggregator.finalize();
    state.last_error = Some(reason.clone());
    state.set_phase(SessionPhase::Failed);

    if state.recovery_attempts < state.config.max_recovery_attempts {
        state.recovery_attempts += 1;
        state.recovery_deadline = Some(Instant::now() + state.next_backoff);
        state.next_backoff = (state.next_backoff * 2).min(state.config.recovery_backoff_cap);
        tracing::info!(
            attempt = state.recovery_attempts,
            delay = ?state.recovery_deadline,
            "Scheduled engine recovery"
        );
    } else {
        state.recovery_deadline = None;
        tracing::error!("Engine recovery attempts exhausted");
        let _ = event_tx.send(SessionEvent::TerminalError { reason });
    }

    emit_state(state, event_tx);
    emit_eval(state, event_tx);
}

/// Send one command to the worker; a send failure is a transport fault.
/// Returns whether the command was accepted.
async fn send_engine(
    state: &mut SessionState,
    event_tx: &broadcast::Sender<SessionEvent>,
    cmd: EngineCommand,
) -> bool {
    let result = match state.transport.as_mut() {
        Some(transport) => transport.send(cmd).await,
        None => Err(EngineError::WorkerClosed),
    };

    match result {
        Ok(()) => true,
        Err(e) => {
            enter_failed(state, event_tx, SessionError::Transport(e.to_string()));
            false
        }
    }
}

fn emit_state(state: &SessionState, event_tx: &broadcast::Sender<SessionEvent>) {
    let _ = event_tx.send(SessionEvent::StateChanged(state.snapshot()));
}

fn emit_eval(state: &SessionState, event_tx: &broadcast::Sender<SessionEvent>) {
    let _ = event_tx.send(SessionEvent::EvaluationUpdated(state.aggregator.snapshot()));
}
