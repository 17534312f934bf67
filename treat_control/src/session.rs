use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};
use chrono::Local;
use log::{info,warn};
use thermometry::{TempAction, TempMonitor};
use treat_params::TreatParams;
use crate::flags::{OperatorFlags, StatusColor, StatusDisplay};
use crate::sequencer::{BurstSpec, EventSequencer, PulseControl};
use crate::state::{AlertKind, TreatMode, TreatState};

/// polling granularity while waiting on operator flags
pub const IDLE_POLL:Duration = Duration::from_millis(100);
/// polling granularity during an active cooldown countdown
pub const COOLDOWN_POLL:Duration = Duration::from_millis(1);

#[derive(Debug,Clone,Copy,PartialEq)]
pub enum SessionStatus {
    Ok,
    Warning,
    Error,
}

#[derive(Debug,Clone)]
pub struct SessionResult {
    pub status:SessionStatus,
    pub summary:String,
}

#[derive(Debug,Clone,Copy,PartialEq)]
enum ExitCause {
    TemperatureFault,
    OperatorClose,
    AdapterError,
}

enum Tick {
    Proceed,
    Freeze,
    Exit(ExitCause),
}

enum BurstOutcome {
    Completed,
    FreezeRequested,
    Exit(ExitCause),
}

enum CooldownOutcome {
    Ready,
    Frozen,
    Exit(ExitCause),
}

/// one treatment delivery session. All state transitions happen on the
/// thread that calls run(); the UI collaborator talks to it only through
/// the operator flags and the display callback. Every wait loop re-checks
/// temperature and the exit flag each iteration, so a fault or an operator
/// close is observed within one polling interval from any mode.
pub struct Session {
    state:TreatState,
    monitor:TempMonitor,
    sequencer:Box<dyn EventSequencer>,
    flags:Arc<OperatorFlags>,
    display:Box<dyn StatusDisplay>,
    idle_poll:Duration,
    cooldown_poll:Duration,
}

impl Session {

    pub fn new(
        params:TreatParams,
        monitor:TempMonitor,
        sequencer:Box<dyn EventSequencer>,
        flags:Arc<OperatorFlags>,
        display:Box<dyn StatusDisplay>,
    ) -> Self {
        Self {
            state: TreatState::new(params),
            monitor,
            sequencer,
            flags,
            display,
            idle_poll: IDLE_POLL,
            cooldown_poll: COOLDOWN_POLL,
        }
    }

    pub fn set_polling(&mut self,idle:Duration,cooldown:Duration) {
        self.idle_poll = idle;
        self.cooldown_poll = cooldown;
    }

    pub fn state(&self) -> &TreatState {
        &self.state
    }

    pub fn run(&mut self) -> SessionResult {
        {
            let p = self.state.params();
            info!("session: {} bursts of {} pulses at {} s spacing, {} s burst period, {} foci",
                  p.burst_count,p.pulse_count,p.pulse_interval,p.burst_interval,p.num_foci);
        }

        // startup: wait for the operator. Freeze is meaningless before the
        // first burst, so only fault and exit are honored here.
        loop {
            if let Tick::Exit(cause) = self.poll_tick() {
                return self.finish_exit(cause)
            }
            if self.flags.take_start() {
                self.state.operator_start(Instant::now());
                info!("treatment started");
                break
            }
            self.show("ready - waiting for operator start",StatusColor::Idle);
            thread::sleep(self.idle_poll);
        }

        // per-burst loop: transmit, then wait out the rest of the burst
        // period, until the last burst's pulses complete
        loop {
            match self.transmit_burst() {
                BurstOutcome::Completed => {}
                BurstOutcome::FreezeRequested => {
                    match self.frozen_wait() {
                        Some(cause) => return self.finish_exit(cause),
                        // resumed mid-burst; indices were preserved
                        None => continue
                    }
                }
                BurstOutcome::Exit(cause) => return self.finish_exit(cause),
            }

            if self.state.on_last_burst() {
                return self.finish_complete()
            }

            self.state.enter_cooldown();
            match self.cooldown_wait() {
                CooldownOutcome::Ready => self.state.begin_burst(Instant::now()),
                CooldownOutcome::Frozen => {
                    match self.frozen_wait() {
                        Some(cause) => return self.finish_exit(cause),
                        // the interrupted cooldown was finished out during
                        // FreezeCooldown, so the next burst may start now
                        None => self.state.begin_burst(Instant::now()),
                    }
                }
                CooldownOutcome::Exit(cause) => return self.finish_exit(cause),
            }
        }
    }

    /// one polling tick: accumulate treatment time, sample the temperature
    /// monitor, then read the operator flags. Fault beats everything.
    fn poll_tick(&mut self) -> Tick {
        let now = Instant::now();
        self.state.tick(now);
        match self.monitor.check() {
            TempAction::Fault(t) => {
                self.state.push_error(format!(
                    "transducer over-temperature: reading {:.2} C exceeds error limit {:.2} C",
                    t,self.monitor.error_limit));
                return Tick::Exit(ExitCause::TemperatureFault)
            }
            TempAction::Warn(t) => {
                warn!("transducer temperature {:.2} C exceeds warn limit {:.2} C",t,self.monitor.warn_limit);
                self.state.push_warning(format!(
                    "transducer temperature {:.2} C exceeds warn limit {:.2} C",
                    t,self.monitor.warn_limit));
            }
            TempAction::None(_) => {}
        }
        if self.flags.exit_requested() {
            return Tick::Exit(ExitCause::OperatorClose)
        }
        if self.flags.freeze_requested() && self.state.running {
            return Tick::Freeze
        }
        Tick::Proceed
    }

    /// drive the sequencer through the current burst. Temperature and the
    /// operator flags ride the per-event callback so a fault mid-burst stops
    /// the train before the next pulse, not at the burst boundary.
    fn transmit_burst(&mut self) -> BurstOutcome {
        let spec = {
            let p = self.state.params();
            BurstSpec {
                burst_index: self.state.burst_index,
                first_pulse: self.state.pulse_index,
                pulse_count: p.pulse_count,
                pulse_interval: p.pulse_interval,
                num_foci: p.num_foci,
            }
        };
        let mut outcome = BurstOutcome::Completed;
        let Session{state,monitor,sequencer,flags,display,..} = self;
        let burst_count = state.params().burst_count;
        let run = sequencer.run_burst(&spec,&mut ||{
            let now = Instant::now();
            state.advance_pulse();
            state.tick(now);
            match monitor.check() {
                TempAction::Fault(t) => {
                    state.push_error(format!(
                        "transducer over-temperature: reading {:.2} C exceeds error limit {:.2} C",
                        t,monitor.error_limit));
                    outcome = BurstOutcome::Exit(ExitCause::TemperatureFault);
                    return PulseControl::Abort
                }
                TempAction::Warn(t) => {
                    warn!("transducer temperature {:.2} C exceeds warn limit {:.2} C",t,monitor.warn_limit);
                    state.push_warning(format!(
                        "transducer temperature {:.2} C exceeds warn limit {:.2} C",
                        t,monitor.warn_limit));
                }
                TempAction::None(_) => {}
            }
            if flags.exit_requested() {
                outcome = BurstOutcome::Exit(ExitCause::OperatorClose);
                return PulseControl::Abort
            }
            if flags.freeze_requested() && !state.burst_complete() {
                outcome = BurstOutcome::FreezeRequested;
                return PulseControl::Abort
            }
            let msg = format!("transmitting burst {} of {} (pulse {}/{})",
                              spec.burst_index,burst_count,
                              (state.pulse_index.saturating_sub(1)).min(spec.pulse_count),spec.pulse_count);
            display.update(state.progress(now),&msg,StatusColor::Active);
            PulseControl::Continue
        });
        if let Err(e) = run {
            // no resume after an adapter-level failure
            state.push_error(e.to_string());
            outcome = BurstOutcome::Exit(ExitCause::AdapterError);
        }
        outcome
    }

    fn cooldown_wait(&mut self) -> CooldownOutcome {
        loop {
            let now = Instant::now();
            let remaining = self.state.remaining_cooldown(now);
            if remaining.is_zero() {
                return CooldownOutcome::Ready
            }
            match self.poll_tick() {
                Tick::Exit(cause) => return CooldownOutcome::Exit(cause),
                Tick::Freeze => return CooldownOutcome::Frozen,
                Tick::Proceed => {}
            }
            let msg = format!("cooling down - {} until burst {}",
                              utils::format_hms(remaining.as_secs_f32()),
                              self.state.burst_index + 1);
            self.show(&msg,StatusColor::Active);
            thread::sleep(self.cooldown_poll);
        }
    }

    /// freeze entry, the frozen wait, and the unfreeze routing. Returns the
    /// exit cause if the session must terminate while paused, or None once
    /// the operator has resumed (state back in Transmit).
    fn frozen_wait(&mut self) -> Option<ExitCause> {
        self.state.freeze(Instant::now());
        self.state.push_warning("treatment frozen by operator".to_string());
        warn!("frozen at burst {} pulse {}",self.state.burst_index,self.state.pulse_index);

        // frozen: wait for unfreeze. running is false here, so poll_tick
        // cannot return Freeze again.
        loop {
            if let Tick::Exit(cause) = self.poll_tick() {
                return Some(cause)
            }
            if !self.flags.freeze_requested() {
                self.state.request_unfreeze(Instant::now());
                break
            }
            self.show("frozen by operator",StatusColor::Paused);
            thread::sleep(self.idle_poll);
        }

        // an unfreeze inside the interrupted burst period must finish waiting
        // it out before the loop may resume
        if self.state.mode == TreatMode::FreezeCooldown {
            loop {
                let now = Instant::now();
                let remaining = self.state.remaining_cooldown(now);
                if remaining.is_zero() {
                    self.state.finish_freeze_cooldown();
                    break
                }
                if let Tick::Exit(cause) = self.poll_tick() {
                    return Some(cause)
                }
                let msg = format!("waiting out interrupted cooldown - {} remaining",
                                  utils::format_hms(remaining.as_secs_f32()));
                self.show(&msg,StatusColor::Paused);
                thread::sleep(self.cooldown_poll);
            }
        }

        // unfrozen: hand control back to the operator
        loop {
            if let Tick::Exit(cause) = self.poll_tick() {
                return Some(cause)
            }
            if self.flags.take_start() {
                self.state.resume(Instant::now());
                info!("treatment resumed at burst {}",self.state.burst_index);
                return None
            }
            self.show("ready to resume - waiting for operator start",StatusColor::Paused);
            thread::sleep(self.idle_poll);
        }
    }

    fn finish_complete(&mut self) -> SessionResult {
        self.state.complete(Instant::now());
        self.show("treatment complete",StatusColor::Idle);
        self.flush_alerts();
        let (warnings,errors) = (self.state.warning_count(),self.state.error_count());
        let summary = format!("{} bursts delivered in {}; {} warning(s), {} error(s); completion_date={}",
                              self.state.params().burst_count,
                              utils::format_hms(self.state.treatment_time.as_secs_f32()),
                              warnings,errors,
                              Local::now().format("%Y%m%d:%T"));
        info!("{}",summary);
        let status = match (errors,warnings) {
            (0,0) => SessionStatus::Ok,
            (0,_) => SessionStatus::Warning,
            _ => SessionStatus::Error,
        };
        SessionResult{status,summary}
    }

    fn finish_exit(&mut self,cause:ExitCause) -> SessionResult {
        if cause == ExitCause::OperatorClose {
            self.state.push_warning("session closed by operator".to_string());
        }
        self.state.exit(Instant::now());
        self.show("session terminated",StatusColor::Paused);
        self.flush_alerts();
        let (warnings,errors) = (self.state.warning_count(),self.state.error_count());
        let summary = format!("exit at burst {} of {}: {} warning(s), {} error(s)",
                              self.state.burst_index,
                              self.state.params().burst_count,
                              warnings,errors);
        warn!("{}",summary);
        let status = match errors {
            0 => SessionStatus::Warning,
            _ => SessionStatus::Error,
        };
        SessionResult{status,summary}
    }

    /// surface the session's full alert history to the operator, not just the
    /// terminal event
    fn flush_alerts(&self) {
        for alert in &self.state.alerts {
            let kind = match alert.kind {
                AlertKind::Warning => "warning",
                AlertKind::Error => "error",
            };
            println!("{} [{}] {}",alert.time.format("%T"),kind,alert.message);
        }
        println!("{} warning(s), {} error(s) this session",
                 self.state.warning_count(),self.state.error_count());
    }

    fn show(&mut self,message:&str,color:StatusColor) {
        let progress = self.state.progress(Instant::now());
        self.display.update(progress,message,color);
    }
}
