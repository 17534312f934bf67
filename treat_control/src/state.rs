use std::time::{Duration, Instant};
use chrono::{DateTime,Local};
use treat_params::TreatParams;

#[derive(Debug,Clone,Copy,PartialEq)]
pub enum TreatMode {
    Startup,
    Freeze,
    /// finishing out a cooldown that a freeze interrupted
    FreezeCooldown,
    Unfreeze,
    Transmit,
    Cooldown,
    Complete,
    Exit,
}

#[derive(Debug,Clone,Copy,PartialEq)]
pub enum AlertKind {
    Warning,
    Error,
}

#[derive(Debug,Clone)]
pub struct Alert {
    pub kind:AlertKind,
    pub message:String,
    pub time:DateTime<Local>,
}

/// mutable session state, owned exclusively by the delivery control loop.
/// burst_index and pulse_index are 1-based; burst_index is 0 before the
/// operator starts. Cumulative treatment time advances only while running,
/// so freezes are excluded from it.
pub struct TreatState {
    params:TreatParams,
    pub mode:TreatMode,
    pub burst_index:u32,
    pub pulse_index:u32,
    pub last_burst_start:Option<Instant>,
    pub session_start:Option<Instant>,
    pub treatment_time:Duration,
    pub running:bool,
    pub alerts:Vec<Alert>,
    last_tick:Option<Instant>,
}

impl TreatState {

    pub fn new(params:TreatParams) -> Self {
        Self {
            params,
            mode: TreatMode::Startup,
            burst_index: 0,
            pulse_index: 0,
            last_burst_start: None,
            session_start: None,
            treatment_time: Duration::ZERO,
            running: false,
            alerts: Vec::new(),
            last_tick: None,
        }
    }

    pub fn params(&self) -> &TreatParams {
        &self.params
    }

    /// accumulate treatment time up to now. Call once per polling tick and
    /// before any transition that changes `running`.
    pub fn tick(&mut self,now:Instant) {
        if self.running {
            if let Some(last) = self.last_tick {
                self.treatment_time += now.saturating_duration_since(last);
            }
        }
        self.last_tick = Some(now);
    }

    pub fn operator_start(&mut self,now:Instant) {
        self.session_start = Some(now);
        self.burst_index = 1;
        self.pulse_index = 1;
        self.last_burst_start = Some(now);
        self.running = true;
        self.last_tick = Some(now);
        self.mode = TreatMode::Transmit;
    }

    /// advance to the next burst and mark its start time
    pub fn begin_burst(&mut self,now:Instant) {
        self.burst_index += 1;
        self.pulse_index = 1;
        self.last_burst_start = Some(now);
        self.mode = TreatMode::Transmit;
    }

    /// one hardware-confirmed pulse completion
    pub fn advance_pulse(&mut self) {
        self.pulse_index += 1;
    }

    /// all pulses of the current burst have fired
    pub fn burst_complete(&self) -> bool {
        self.pulse_index > self.params.pulse_count
    }

    pub fn on_last_burst(&self) -> bool {
        self.burst_index >= self.params.burst_count
    }

    pub fn enter_cooldown(&mut self) {
        self.mode = TreatMode::Cooldown;
    }

    pub fn freeze(&mut self,now:Instant) {
        self.tick(now);
        self.running = false;
        self.mode = TreatMode::Freeze;
    }

    /// route the operator's unfreeze request: an interrupted cooldown must be
    /// waited out before the loop may resume, never restarted from zero
    pub fn request_unfreeze(&mut self,now:Instant) {
        let satisfied = self.elapsed_since_last_burst(now)
            .map(|e|e >= self.params.burst_interval_duration())
            .unwrap_or(true);
        self.mode = match satisfied {
            true => TreatMode::Unfreeze,
            false => TreatMode::FreezeCooldown,
        };
    }

    pub fn finish_freeze_cooldown(&mut self) {
        self.mode = TreatMode::Unfreeze;
    }

    /// operator start out of Unfreeze: resume the burst loop without
    /// incrementing burst_index a second time
    pub fn resume(&mut self,now:Instant) {
        self.running = true;
        self.last_tick = Some(now);
        self.mode = TreatMode::Transmit;
    }

    pub fn complete(&mut self,now:Instant) {
        self.tick(now);
        self.running = false;
        self.mode = TreatMode::Complete;
    }

    pub fn exit(&mut self,now:Instant) {
        self.tick(now);
        self.running = false;
        self.mode = TreatMode::Exit;
    }

    pub fn is_terminal(&self) -> bool {
        self.mode == TreatMode::Complete || self.mode == TreatMode::Exit
    }

    pub fn elapsed_since_last_burst(&self,now:Instant) -> Option<Duration> {
        self.last_burst_start.map(|t|now.saturating_duration_since(t))
    }

    pub fn remaining_cooldown(&self,now:Instant) -> Duration {
        match self.elapsed_since_last_burst(now) {
            Some(elapsed) => self.params.burst_interval_duration().saturating_sub(elapsed),
            None => Duration::ZERO,
        }
    }

    /// fraction of the whole treatment delivered, for display only. 1.0 is
    /// reported in Complete and nowhere else.
    pub fn progress(&self,now:Instant) -> f32 {
        let p = &self.params;
        let bursts = p.burst_count as f32;
        match self.mode {
            TreatMode::Startup => 0.0,
            TreatMode::Complete => 1.0,
            TreatMode::Transmit => {
                // fraction of one burst period actually spent transmitting
                let frac = p.burst_duration()/p.burst_interval;
                let pulses = self.pulse_index.min(p.pulse_count) as f32/p.pulse_count as f32;
                ((self.burst_index.saturating_sub(1)) as f32 + pulses*frac)/bursts
            }
            _ => {
                let elapsed = self.elapsed_since_last_burst(now)
                    .map(|e|e.as_secs_f32())
                    .unwrap_or(0.0);
                let within = (elapsed/p.burst_interval).min(1.0);
                (((self.burst_index.saturating_sub(1)) as f32 + within)/bursts).min(0.9999)
            }
        }
    }

    pub fn push_warning(&mut self,message:String) {
        self.alerts.push(Alert{kind:AlertKind::Warning,message,time:Local::now()});
    }

    pub fn push_error(&mut self,message:String) {
        self.alerts.push(Alert{kind:AlertKind::Error,message,time:Local::now()});
    }

    pub fn warning_count(&self) -> usize {
        self.alerts.iter().filter(|a|a.kind == AlertKind::Warning).count()
    }

    pub fn error_count(&self) -> usize {
        self.alerts.iter().filter(|a|a.kind == AlertKind::Error).count()
    }
}
